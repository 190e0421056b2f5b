//! Handler signatures and the pipeline flow vocabulary.
//!
//! Every middleware entry and route handler is an async function from a
//! [`Context`] to a [`Flow`]. The [`Flow`] value replaces the classic
//! call-the-continuation-or-don't protocol with an explicit three-way result,
//! so a handler states what happens next instead of signalling it by side
//! effect.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::context::Context;
use crate::http::Status;

/// What the pipeline does after a handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Hand control to the next matching entry; this handler is not a
    /// terminal endpoint.
    Continue,
    /// Record the status and keep the usual termination rules: a non-success
    /// status stops the walk and reaches the error handler, a success status
    /// lets the walk carry on.
    Status(Status),
    /// This handler produced the response; stop the walk without involving
    /// the error handler.
    End,
}

/// A heap-allocated, type-erased future resolving to a [`Flow`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Flow> + Send + 'static>>;

/// A type-erased, reference-counted handler as stored by the pipeline and the
/// router. Cloning is one atomic increment.
pub type HandlerFn = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// A heap-allocated, type-erased error-handler future.
pub type ErrorHandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The configured error handler: invoked exactly once per failed request with
/// the terminal [`Status`] and the request's [`Context`].
pub type ErrorHandler = Arc<dyn Fn(Status, Context) -> ErrorHandlerFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Flow> + Send` that is also
/// `Send + Sync + 'static` implements this trait via the blanket impl below,
/// so registration methods can accept `impl IntoHandler` without repeating
/// the two-type-parameter where-bound at every call site.
///
/// # Examples
///
/// ```
/// use xpress::{Context, Flow, IntoHandler};
///
/// fn takes_handler(_handler: impl IntoHandler) {}
///
/// takes_handler(|ctx: Context| async move {
///     ctx.response().send("hi");
///     Flow::End
/// });
/// ```
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Flow> + Send + 'static,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin((self)(ctx))
    }
}

/// Erase a concrete handler into the [`HandlerFn`] storage form.
pub(crate) fn erase(handler: impl IntoHandler) -> HandlerFn {
    Arc::new(move |ctx| handler.call(ctx))
}
