//! Static file serving middleware.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::{Flow, IntoHandler};
use crate::http::{Status, StatusCode};

/// Static file server configuration.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    /// Directory the request path is resolved under.
    pub root: PathBuf,
    /// File served when the request path is `/`.
    pub default_page: String,
}

impl StaticConfig {
    /// Configuration rooted at `root`, serving `index.html` for `/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_page: "index.html".to_owned(),
        }
    }
}

/// Middleware factory: serves files from [`StaticConfig::root`].
///
/// The request path is resolved under the root directory (`/` maps to the
/// default page). A missing file terminates the request with `404`, a
/// directory or a path containing `..` with `403`. A served file ends the
/// response, so later middleware never runs for it. When an earlier entry
/// already completed the response, the request passes straight through.
pub fn serve_static(config: StaticConfig) -> impl IntoHandler {
    let config = Arc::new(config);
    move |ctx: Context| {
        let config = Arc::clone(&config);
        async move {
            if ctx.response().is_complete() {
                return Flow::Continue;
            }

            let rel = if ctx.path() == "/" {
                format!("/{}", config.default_page)
            } else {
                ctx.path().to_owned()
            };

            if rel.split('/').any(|segment| segment == "..") {
                return Flow::Status(Status::detailed(
                    StatusCode::Forbidden,
                    "Path traversal rejected",
                ));
            }

            let full = config.root.join(rel.trim_start_matches('/'));

            let metadata = match tokio::fs::metadata(&full).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Flow::Status(Status::detailed(
                        StatusCode::NotFound,
                        format!("File not found: {}", full.display()),
                    ));
                }
                Err(e) => {
                    return Flow::Status(Status::detailed(
                        StatusCode::InternalServerError,
                        e.to_string(),
                    ));
                }
            };

            if metadata.is_dir() {
                return Flow::Status(Status::detailed(
                    StatusCode::Forbidden,
                    "Directory listing not allowed",
                ));
            }

            match tokio::fs::read(&full).await {
                Ok(bytes) => {
                    let ext = full.extension().and_then(|e| e.to_str()).unwrap_or("");
                    ctx.response().set("Content-Type", content_type(ext));
                    ctx.response().send_bytes(bytes);
                    ctx.response().end();
                    Flow::End
                }
                Err(e) => Flow::Status(Status::detailed(
                    StatusCode::InternalServerError,
                    e.to_string(),
                )),
            }
        }
    }
}

// Extension → content type, falling back to HTML like the classic servers do.
fn content_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain",
        "gif" => "image/gif",
        "jpeg" | "jpg" => "image/jpeg",
        "bmp" => "image/bmp",
        "png" => "image/png",
        "css" => "text/css",
        "json" => "application/json",
        "js" => "text/javascript",
        "bin" => "application/octet-stream",
        _ => "text/html",
    }
}
