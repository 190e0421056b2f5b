//! # xpress
//!
//! An Express-style async HTTP middleware framework written in Rust.
//!
//! An application is an ordered stack of prefix-gated middleware entries —
//! plain handlers and mounted routers — walked per request in registration
//! order. Each handler returns a [`Flow`]: continue to the next entry, report
//! a terminal [`Status`], or end the response. Cookie-backed, expiring
//! sessions are one more middleware entry over a shared [`SessionManager`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xpress::{App, Context, Flow, Router, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), xpress::ServerError> {
//!     let manager = Arc::new(SessionManager::new(SessionConfig::default()));
//!
//!     let mut app = App::new();
//!     app.with(xpress::middleware::logger());
//!     app.with(xpress::sessions(Arc::clone(&manager)));
//!
//!     let mut pages = Router::new();
//!     pages.get("/hello/:name", |ctx: Context| async move {
//!         let name = ctx.param("name").unwrap_or_default();
//!         ctx.response().send(format!("<h1>Hello, {name}!</h1>"));
//!         Flow::End
//!     });
//!     app.route("/", pages);
//!
//!     app.listen("127.0.0.1:8080").await
//! }
//! ```

pub mod app;
pub mod context;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;
pub mod view;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::App;
pub use context::{Context, Params};
pub use handler::{Flow, HandlerFn, IntoHandler};
pub use http::{Headers, Method, Request, ResponseContext, Status, StatusCode};
pub use router::{Router, RouterConfig};
pub use server::{Server, ServerError};
pub use session::{sessions, Session, SessionConfig, SessionManager, SESSION_COOKIE};
pub use view::{template_engine, ViewData, ViewEngine};
