//! Built-in middleware: request logging and body parsing.
//!
//! Every factory here returns an ordinary handler — the pipeline imposes
//! nothing on built-ins that it does not impose on application code.
//!
//! - [`logger`] — one `tracing` line per request.
//! - [`json`] — parses `application/json` bodies into a [`JsonBody`] var.
//! - [`urlencoded`] — parses form bodies into the context form map.
//! - [`serve_static`](files::serve_static) — static file serving.

use std::str;

use tracing::info;

use crate::context::Context;
use crate::handler::{Flow, IntoHandler};
use crate::http::{Status, StatusCode};
use crate::router::parse_query;

pub mod files;

pub use files::{serve_static, StaticConfig};

/// The parsed JSON request body, stored in the context vars by [`json`].
///
/// Retrieve it with `ctx.var::<JsonBody>()`.
#[derive(Debug, Clone)]
pub struct JsonBody(pub serde_json::Value);

/// Minimal request logger: method and path, before the rest of the stack runs.
pub fn logger() -> impl IntoHandler {
    |ctx: Context| async move {
        info!(method = %ctx.method(), path = %ctx.path(), "request");
        Flow::Continue
    }
}

/// Parses `application/json` request bodies into a [`JsonBody`] var.
///
/// A body that fails to parse yields an empty JSON object rather than an
/// error; requests with other content types pass through untouched.
pub fn json() -> impl IntoHandler {
    |ctx: Context| async move {
        let is_json = ctx
            .request()
            .headers()
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let value = serde_json::from_slice(ctx.request().body())
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
            ctx.set_var(JsonBody(value));
        }
        Flow::Continue
    }
}

/// Parses `application/x-www-form-urlencoded` request bodies into the
/// context form map (see [`Context::form_value`](crate::Context::form_value)).
///
/// A body that is not valid UTF-8 terminates the request with `400`.
pub fn urlencoded() -> impl IntoHandler {
    |ctx: Context| async move {
        let is_form = ctx
            .request()
            .headers()
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            match str::from_utf8(ctx.request().body()) {
                Ok(body) => ctx.set_form(parse_query(body)),
                Err(e) => {
                    return Flow::Status(Status::detailed(StatusCode::BadRequest, e.to_string()));
                }
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IntoHandler;
    use crate::http::Request;

    fn make_context(raw: &[u8]) -> Context {
        let (request, _) = Request::parse(raw).unwrap();
        Context::new(request)
    }

    async fn run(handler: &impl IntoHandler, ctx: Context) -> Flow {
        handler.call(ctx).await
    }

    #[tokio::test]
    async fn logger_passes_through() {
        let ctx = make_context(b"GET /x HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(run(&logger(), ctx).await, Flow::Continue);
    }

    #[tokio::test]
    async fn json_body_parsed_into_var() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"name\":\"go\"}";
        let ctx = make_context(raw);
        assert_eq!(run(&json(), ctx.clone()).await, Flow::Continue);
        let body = ctx.var::<JsonBody>().unwrap();
        assert_eq!(body.0["name"], "go");
    }

    #[tokio::test]
    async fn invalid_json_yields_empty_object() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\nnot json!";
        let ctx = make_context(raw);
        assert_eq!(run(&json(), ctx.clone()).await, Flow::Continue);
        let body = ctx.var::<JsonBody>().unwrap();
        assert!(body.0.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_skips_other_content_types() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi";
        let ctx = make_context(raw);
        run(&json(), ctx.clone()).await;
        assert!(ctx.var::<JsonBody>().is_none());
    }

    #[tokio::test]
    async fn urlencoded_fills_form_map() {
        let raw = b"POST /login HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 24\r\n\r\nuser=ada&pass=l0ve%20l4c";
        let ctx = make_context(raw);
        assert_eq!(run(&urlencoded(), ctx.clone()).await, Flow::Continue);
        assert_eq!(ctx.form_value("user"), Some("ada".to_owned()));
        assert_eq!(ctx.form_value("pass"), Some("l0ve l4c".to_owned()));
    }

    #[tokio::test]
    async fn urlencoded_rejects_invalid_utf8() {
        let mut raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 4\r\n\r\n".to_vec();
        raw.extend_from_slice(&[b'a', b'=', 0xff, 0xfe]);
        let ctx = make_context(&raw);
        match run(&urlencoded(), ctx).await {
            Flow::Status(status) => assert_eq!(status.code(), StatusCode::BadRequest),
            other => panic!("expected Status flow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn urlencoded_skips_other_content_types() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\nuser=go";
        let ctx = make_context(raw);
        assert_eq!(run(&urlencoded(), ctx.clone()).await, Flow::Continue);
        assert_eq!(ctx.form_value("user"), None);
    }
}
