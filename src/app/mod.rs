//! The application façade and the per-request middleware dispatcher.
//!
//! An [`App`] owns an ordered stack of prefix-gated entries — plain handlers
//! and mounted [`Router`]s in one list, as a tagged variant — plus the
//! process-wide configuration: error handler, view engine, and the
//! `X-Powered-By` banner.
//!
//! [`App::handle`] is the dispatch cycle for one request: build a fresh
//! [`Context`], walk the stack in registration order, and settle the terminal
//! outcome. Handler panics are caught at this boundary and become a 500-class
//! status; the configured error handler runs exactly once for any terminal
//! non-success status.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::{erase, ErrorHandler, Flow, HandlerFn, IntoHandler};
use crate::http::{Request, ResponseContext, Status, StatusCode};
use crate::router::Router;
use crate::server::{Server, ServerError};
use crate::view::ViewEngine;

/// Default `X-Powered-By` banner.
const POWERED_BY: &str = "Xpress application server";

// What a middleware entry holds: matched exhaustively at dispatch time.
enum Entry {
    Handler(HandlerFn),
    Router(Arc<Router>),
}

// One stack entry: a handler or router gated by a path prefix.
struct MiddlewareEntry {
    prefix: String,
    entry: Entry,
}

/// An application: the middleware stack plus process-wide configuration.
///
/// # Examples
///
/// ```no_run
/// use xpress::{App, Context, Flow};
///
/// #[tokio::main]
/// async fn main() -> Result<(), xpress::ServerError> {
///     let mut app = App::new();
///     app.with(xpress::middleware::logger());
///     app.at("/hello", |ctx: Context| async move {
///         ctx.response().send("<h1>hi</h1>");
///         Flow::End
///     });
///     app.listen("127.0.0.1:8080").await
/// }
/// ```
pub struct App {
    stack: Vec<MiddlewareEntry>,
    error_handler: ErrorHandler,
    view_engine: Option<ViewEngine>,
    powered_by: String,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Creates an application with an empty stack and the default error page.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            error_handler: Arc::new(|status, ctx| Box::pin(default_error_page(status, ctx))),
            view_engine: None,
            powered_by: POWERED_BY.to_owned(),
        }
    }

    /// Appends a handler that runs for every request.
    pub fn with(&mut self, handler: impl IntoHandler) -> &mut Self {
        self.push("", Entry::Handler(erase(handler)))
    }

    /// Appends a handler gated by a path prefix.
    ///
    /// The handler runs when the request path equals `prefix` or continues it
    /// after a `/`. A trailing `/` on the prefix is dropped, so `/admin/`
    /// and `/admin` gate identically and `/` means "every path".
    pub fn at(&mut self, prefix: &str, handler: impl IntoHandler) -> &mut Self {
        self.push(prefix, Entry::Handler(erase(handler)))
    }

    /// Mounts a router under a path prefix; the router matches against the
    /// path with the prefix stripped.
    pub fn route(&mut self, prefix: &str, router: Router) -> &mut Self {
        self.push(prefix, Entry::Router(Arc::new(router)))
    }

    fn push(&mut self, prefix: &str, entry: Entry) -> &mut Self {
        self.stack.push(MiddlewareEntry {
            prefix: prefix.trim_end_matches('/').to_owned(),
            entry,
        });
        self
    }

    /// Sets the view engine made available to every response's
    /// [`render`](crate::ResponseContext::render).
    pub fn view_engine(&mut self, engine: ViewEngine) -> &mut Self {
        self.view_engine = Some(engine);
        self
    }

    /// Replaces the error handler invoked for terminal non-success statuses.
    pub fn on_error<H, F>(&mut self, handler: H) -> &mut Self
    where
        H: Fn(Status, Context) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.error_handler = Arc::new(move |status, ctx| Box::pin(handler(status, ctx)));
        self
    }

    /// Overrides the `X-Powered-By` banner added to every response.
    pub fn powered_by(&mut self, banner: impl Into<String>) -> &mut Self {
        self.powered_by = banner.into();
        self
    }

    /// Runs one full dispatch cycle and returns the settled response state.
    ///
    /// This is the whole request lifecycle minus the wire: the server
    /// primitive calls it per request, and tests can call it directly.
    pub async fn handle(&self, request: Request) -> ResponseContext {
        let ctx = Context::new(request);
        if let Some(engine) = &self.view_engine {
            ctx.response().set_view_engine(engine.clone());
        }
        ctx.response().set("X-Powered-By", &self.powered_by);

        let response = ctx.response().clone();

        // The walk borrows shared handles only, so a panicking handler leaves
        // response state (status, headers, any cookie already set) intact.
        if let Err(panic) = AssertUnwindSafe(self.walk(ctx.clone())).catch_unwind().await {
            let details = panic_message(panic);
            warn!(path = %ctx.path(), details = %details, "handler panicked");
            response.report(Status::detailed(StatusCode::InternalServerError, details));
        }

        let status = response.status();
        if !status.is_success() {
            debug!(path = %ctx.path(), status = status.code().as_u16(), "dispatching error handler");
            let error_handler = Arc::clone(&self.error_handler);
            let run = error_handler(status.clone(), ctx.clone());
            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                warn!(path = %ctx.path(), "error handler panicked");
                response.send(format!("{} {}", status.code().as_u16(), status.description()));
            }
        }

        response
    }

    // The middleware walk: entries in registration order, first terminal
    // outcome wins.
    async fn walk(&self, ctx: Context) {
        let path = ctx.path().to_owned();
        let mut matched_any = false;

        for (index, entry) in self.stack.iter().enumerate() {
            if !prefix_matches(&entry.prefix, &path) {
                continue;
            }
            matched_any = true;
            debug!(index, prefix = %entry.prefix, path = %path, "entering middleware");

            let flow = match &entry.entry {
                Entry::Handler(handler) => handler(ctx.clone()).await,
                Entry::Router(router) => router.dispatch(ctx.clone(), &entry.prefix).await,
            };

            match flow {
                Flow::Continue => {}
                Flow::Status(status) => ctx.response().report(status),
                Flow::End => break,
            }
            if !ctx.response().status().is_success() {
                break;
            }
        }

        // Nothing in the stack even looked at this request: make the miss
        // explicit instead of completing an empty 200.
        if !matched_any {
            ctx.response()
                .report(Status::detailed(StatusCode::NotFound, format!("No handler for {path}")));
        }
    }

    /// Binds the server primitive on `addr` and serves this application until
    /// the process ends.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<(), ServerError> {
        let server = Server::bind(addr).await?;
        let app = Arc::new(self);
        server
            .run(move |request| {
                let app = Arc::clone(&app);
                async move { app.handle(request).await }
            })
            .await
    }
}

// An entry runs when its prefix is empty, equals the path, or is a strict
// prefix followed by `/` — `/admin` gates `/admin` and `/admin/page`, never
// `/administrator`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || prefix == path {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// The default error handler: a minimal HTML status page.
async fn default_error_page(status: Status, ctx: Context) {
    let response = ctx.response();
    response.send(format!(
        "<h1>{} {}</h1>",
        status.code().as_u16(),
        status.description()
    ));
    if !status.details().is_empty() {
        response.send(status.details());
    }
    response.end();
}

// Best-effort extraction of a panic payload's message.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unhandled panic".to_owned()
    }
}
