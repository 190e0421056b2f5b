//! Mutable response state and HTTP/1.1 wire serialization.
//!
//! [`ResponseContext`] is a cheaply-cloneable handle over the response being
//! built for one request: status, headers, buffered body, and the
//! `headers_sent` / `complete` flags that give writes their one-way semantics.
//! All clones refer to the same state, so the dispatcher keeps a handle that
//! stays valid even when a handler panics mid-request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, BytesMut};

use super::{Headers, Status, StatusCode};
use crate::view::{ViewData, ViewEngine};

/// Default content type written when a body is present and no handler set one.
const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

struct ResponseState {
    status: Status,
    headers: Headers,
    body: Vec<u8>,
    headers_sent: bool,
    complete: bool,
    keep_alive: bool,
    view_engine: Option<ViewEngine>,
}

/// The outgoing side of one request: a shared handle over mutable response
/// state.
///
/// Writes are one-way: the first [`send`](Self::send) marks headers as sent
/// (header changes are ignored from then on), and [`end`](Self::end) marks the
/// response complete — every later write is a no-op.
///
/// # Examples
///
/// ```
/// use xpress::ResponseContext;
///
/// let res = ResponseContext::new();
/// res.set("X-Request-Id", "abc-123");
/// res.send("hello");
/// res.end();
/// res.send("ignored"); // complete — no-op
///
/// let text = String::from_utf8(res.to_wire_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("X-Request-Id: abc-123\r\n"));
/// assert!(text.ends_with("\r\n\r\nhello"));
/// ```
#[derive(Clone)]
pub struct ResponseContext {
    state: Arc<Mutex<ResponseState>>,
}

impl ResponseContext {
    /// Creates response state with a success status and an empty body.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState {
                status: Status::ok(),
                headers: Headers::new(),
                body: Vec::new(),
                headers_sent: false,
                complete: false,
                keep_alive: true,
                view_engine: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a string to the response body.
    ///
    /// The first write fixes the status line: header and status changes are
    /// ignored afterwards. Once the response is complete this is a no-op.
    pub fn send(&self, body: impl Into<String>) -> &Self {
        self.send_bytes(body.into().into_bytes())
    }

    /// Appends raw bytes to the response body. Same semantics as [`send`](Self::send).
    pub fn send_bytes(&self, body: impl Into<Vec<u8>>) -> &Self {
        let mut state = self.state();
        if !state.complete {
            state.headers_sent = true;
            state.body.extend_from_slice(&body.into());
        }
        self
    }

    /// Marks the response complete. Every subsequent write is a no-op.
    pub fn end(&self) -> &Self {
        let mut state = self.state();
        state.headers_sent = true;
        state.complete = true;
        self
    }

    /// Adds a response header. Ignored once headers are sent.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let mut state = self.state();
        if !state.headers_sent {
            state.headers.add(name, value);
        }
        self
    }

    /// Adds a `Set-Cookie` header for the given name/value, scoped to `path`.
    pub fn cookie(&self, name: &str, value: &str, path: &str) -> &Self {
        self.set("Set-Cookie", format!("{name}={value}; Path={path}"))
    }

    /// Adds a `Location` header.
    pub fn location(&self, url: &str) -> &Self {
        self.set("Location", url)
    }

    /// Completes the response as a `302 Found` redirect to `url`.
    pub fn redirect(&self, url: &str) -> &Self {
        self.set_status(Status::new(StatusCode::Found));
        self.set("Refresh", format!("0; url={url}"));
        self.location(url);
        self.end()
    }

    /// Renders `template` through the configured view engine.
    ///
    /// Without a view engine this is a no-op.
    pub fn render(&self, template: &str, data: &ViewData) -> &Self {
        let engine = self.state().view_engine.clone();
        if let Some(engine) = engine {
            // The engine writes through this handle; the lock is not held here.
            engine(template, data, self);
        }
        self
    }

    /// Overwrites the current status. Ignored once headers are sent.
    pub fn set_status(&self, status: Status) -> &Self {
        let mut state = self.state();
        if !state.headers_sent {
            state.status = status;
        }
        self
    }

    /// Records a terminal status, keeping the first non-success one.
    pub(crate) fn report(&self, status: Status) {
        let mut state = self.state();
        if state.status.is_success() {
            state.status = status;
        }
    }

    pub(crate) fn set_view_engine(&self, engine: ViewEngine) {
        self.state().view_engine = Some(engine);
    }

    /// Controls the `Connection` header written on serialization.
    pub fn set_keep_alive(&self, keep_alive: bool) -> &Self {
        self.state().keep_alive = keep_alive;
        self
    }

    /// Returns a snapshot of the current status.
    pub fn status(&self) -> Status {
        self.state().status.clone()
    }

    /// Returns `true` once body bytes have been written.
    pub fn headers_sent(&self) -> bool {
        self.state().headers_sent
    }

    /// Returns `true` once the response has been ended.
    pub fn is_complete(&self) -> bool {
        self.state().complete
    }

    /// Serializes the response into HTTP/1.1 wire format, consuming the
    /// buffered body.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/html; charset=utf-8` if the body is non-empty
    ///   and no `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written, last before the blank line).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn to_wire_bytes(&self) -> BytesMut {
        let mut state = self.state();
        let body = std::mem::take(&mut state.body);

        if !body.is_empty() && !state.headers.contains("content-type") {
            state.headers.add("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        let connection = if state.keep_alive { "keep-alive" } else { "close" };
        state.headers.set("Connection", connection);

        let estimated = 128 + state.headers.len() * 64 + body.len();
        let mut buf = BytesMut::with_capacity(estimated);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                state.status.code().as_u16(),
                state.status.description()
            )
            .as_bytes(),
        );

        for (name, value) in state.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        buf.put(&b"\r\n"[..]);

        if !body.is_empty() {
            buf.put(body.as_slice());
        }

        buf
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new()
    }
}
