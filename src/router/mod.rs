//! Method + path-pattern routing under a mount prefix.
//!
//! A [`Router`] owns an ordered set of `(method filter, pattern)` → handler
//! bindings. Patterns are split into segments; a `:name` segment captures any
//! single non-empty path segment by name, a literal segment must match
//! exactly (case-insensitively by default — see [`RouterConfig`]). Segment
//! counts must be equal: no pattern spans a `/`.
//!
//! Bindings are evaluated in registration order and duplicates are allowed —
//! the first match that terminates wins. A router never decides what a miss
//! means: [`dispatch`](Router::dispatch) reports "not handled" as
//! [`Flow::Continue`] and leaves the verdict to the pipeline that mounted it.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::context::{Context, Params};
use crate::handler::{erase, Flow, HandlerFn, IntoHandler};
use crate::http::Method;

/// Router matching options.
///
/// An explicit struct rather than a free-form option map: unknown options are
/// unrepresentable.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Compare literal pattern segments case-sensitively. Off by default.
    pub case_sensitive: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
        }
    }
}

// A single pattern segment: a literal to compare or a named capture.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

// Compiled representation of a pattern string such as `/users/:id`.
#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    // Split on `/`, ignoring empty segments, so `/users/` and `/users`
    // compile identically and `/` compiles to zero segments.
    fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_owned()),
                None => Segment::Literal(s.to_owned()),
            })
            .collect();
        Self { segments }
    }

    // Segment-for-segment match; returns captured parameters on success.
    fn matches(&self, path: &str, case_sensitive: bool) -> Option<Params> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (segment, path_segment) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    let hit = if case_sensitive {
                        literal == path_segment
                    } else {
                        literal.eq_ignore_ascii_case(path_segment)
                    };
                    if !hit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), path_segment.to_owned());
                }
            }
        }
        Some(params)
    }
}

// One registered binding. `method: None` accepts any method.
struct Route {
    method: Option<Method>,
    pattern: Pattern,
    handler: HandlerFn,
}

impl Route {
    fn accepts(&self, method: &Method) -> bool {
        match &self.method {
            None => true,
            Some(m) => m == method,
        }
    }
}

/// An ordered set of method + pattern bindings, mountable under a path prefix.
///
/// # Examples
///
/// ```
/// use xpress::{Context, Flow, Router};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |ctx: Context| async move {
///     ctx.response().send("pong");
///     Flow::End
/// });
///
/// router.get("/users/:id", |ctx: Context| async move {
///     let id = ctx.param("id").unwrap_or_default();
///     ctx.response().send(id);
///     Flow::End
/// });
/// ```
pub struct Router {
    config: RouterConfig,
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router with default matching options.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Creates an empty router with explicit matching options.
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
        }
    }

    /// Registers a binding for `method` on `pattern`.
    ///
    /// Duplicate `(method, pattern)` pairs are allowed; the earlier
    /// registration is tried first.
    pub fn route(&mut self, method: Method, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.push(Some(method), pattern, erase(handler))
    }

    /// Registers a binding that accepts every method.
    pub fn any(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.push(None, pattern, erase(handler))
    }

    /// Registers a `GET` binding.
    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Get, pattern, handler)
    }

    /// Registers a `POST` binding.
    pub fn post(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Post, pattern, handler)
    }

    /// Registers a `PUT` binding.
    pub fn put(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Put, pattern, handler)
    }

    /// Registers a `DELETE` binding.
    pub fn delete(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Delete, pattern, handler)
    }

    /// Registers a `PATCH` binding.
    pub fn patch(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Patch, pattern, handler)
    }

    /// Registers the same handler for `GET` and `POST`, the classic
    /// render-then-submit form pair.
    pub fn get_post(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        let handler = erase(handler);
        self.push(Some(Method::Get), pattern, handler.clone());
        self.push(Some(Method::Post), pattern, handler)
    }

    /// Registers the same handler for `GET`, `POST`, `PUT`, `PATCH`, and
    /// `DELETE` — typical for a resource endpoint that switches on the method.
    pub fn restful(&mut self, pattern: &str, handler: impl IntoHandler) -> &mut Self {
        let handler = erase(handler);
        for method in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
        ] {
            self.push(Some(method), pattern, handler.clone());
        }
        self
    }

    fn push(&mut self, method: Option<Method>, pattern: &str, handler: HandlerFn) -> &mut Self {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        });
        self
    }

    /// Returns the number of registered bindings.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no bindings have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches a request to the bindings of this router.
    ///
    /// The mount prefix is stripped from the request path before matching.
    /// Bindings are walked in registration order: a matched handler that
    /// returns [`Flow::Continue`] resumes the walk over later bindings, while
    /// [`Flow::Status`] and [`Flow::End`] return to the mounting pipeline
    /// immediately. When nothing matched (or every matched handler
    /// continued), the router reports [`Flow::Continue`] — "not handled" —
    /// and the pipeline moves on to its next entry.
    pub(crate) async fn dispatch(&self, ctx: Context, mount: &str) -> Flow {
        let mount = mount.trim_end_matches('/');
        ctx.set_mount_path(mount);

        let path = ctx.path().to_owned();
        let sub_path = path.strip_prefix(mount).unwrap_or(&path);

        for route in &self.routes {
            if !route.accepts(ctx.method()) {
                continue;
            }
            let Some(params) = route.pattern.matches(sub_path, self.config.case_sensitive) else {
                continue;
            };
            ctx.set_params(params);

            match (route.handler)(ctx.clone()).await {
                Flow::Continue => {}
                terminal => return terminal,
            }
        }

        Flow::Continue
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a map.
///
/// Splits on `&`, then on the first `=` per pair. Values are percent-decoded
/// with `+` treated as space; keys are taken verbatim. A pair without `=`
/// maps the key to the empty string. Output carries no ordering — it is
/// consumed as a mapping.
///
/// # Examples
///
/// ```
/// use xpress::router::parse_query;
///
/// let q = parse_query("name=J%C3%BCrgen&tag=a+b&flag");
/// assert_eq!(q.get("name").map(String::as_str), Some("Jürgen"));
/// assert_eq!(q.get("tag").map(String::as_str), Some("a b"));
/// assert_eq!(q.get("flag").map(String::as_str), Some(""));
/// ```
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => {
                map.insert(key.to_owned(), decode_component(value));
            }
            None => {
                map.insert(pair.to_owned(), String::new());
            }
        }
    }
    map
}

// Percent-decode one query value; `+` is a space. Undecodable input maps to
// the empty string rather than failing the whole request.
fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    percent_decode_str(&raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Status, StatusCode};

    fn make_context(method: &str, path: &str) -> Context {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(request)
    }

    // ── Pattern ───────────────────────────────────────────────────────────────

    #[test]
    fn pattern_literal_match() {
        let p = Pattern::parse("/users");
        assert!(p.matches("/users", true).is_some());
        assert!(p.matches("/posts", true).is_none());
    }

    #[test]
    fn pattern_trailing_slash_normalized() {
        let p = Pattern::parse("/users/");
        assert!(p.matches("/users", true).is_some());
        assert!(Pattern::parse("/users").matches("/users/", true).is_some());
    }

    #[test]
    fn pattern_root() {
        let p = Pattern::parse("/");
        assert!(p.matches("/", true).is_some());
        assert!(p.matches("", true).is_some());
        assert!(p.matches("/other", true).is_none());
    }

    #[test]
    fn pattern_extracts_params() {
        let p = Pattern::parse("/params/:p1/:p2");
        let params = p.matches("/params/7/9", true).unwrap();
        assert_eq!(params.get("p1"), Some("7"));
        assert_eq!(params.get("p2"), Some("9"));
    }

    #[test]
    fn pattern_segment_count_must_match() {
        let p = Pattern::parse("/params/:p1/:p2");
        assert!(p.matches("/params/7", true).is_none());
        assert!(p.matches("/params/7/9/11", true).is_none());
    }

    #[test]
    fn pattern_param_rejects_empty_segment() {
        let p = Pattern::parse("/users/:id");
        // `//` collapses to a single segment list entry short of the pattern.
        assert!(p.matches("/users//", true).is_none());
    }

    #[test]
    fn pattern_case_insensitive_by_default() {
        let p = Pattern::parse("/Users");
        assert!(p.matches("/users", false).is_some());
        assert!(p.matches("/users", true).is_none());
    }

    // ── parse_query ───────────────────────────────────────────────────────────

    #[test]
    fn query_basic_pairs() {
        let q = parse_query("a=1&b=2");
        assert_eq!(q.get("a").map(String::as_str), Some("1"));
        assert_eq!(q.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn query_percent_and_plus_decoding() {
        let q = parse_query("name=hello%20world&tag=a+b");
        assert_eq!(q.get("name").map(String::as_str), Some("hello world"));
        assert_eq!(q.get("tag").map(String::as_str), Some("a b"));
    }

    #[test]
    fn query_missing_equals_maps_to_empty() {
        let q = parse_query("flag&x=1");
        assert_eq!(q.get("flag").map(String::as_str), Some(""));
        assert_eq!(q.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn query_value_may_contain_equals() {
        let q = parse_query("expr=a=b");
        assert_eq!(q.get("expr").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn query_empty_string() {
        assert!(parse_query("").is_empty());
    }

    // ── Router dispatch ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn unmatched_path_reports_continue() {
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async { Flow::End });
        let flow = router.dispatch(make_context("GET", "/world"), "").await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn method_mismatch_reports_continue() {
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async { Flow::End });
        let flow = router.dispatch(make_context("POST", "/hello"), "").await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn any_accepts_every_method() {
        let mut router = Router::new();
        router.any("/hook", |_ctx: Context| async { Flow::End });
        for method in ["GET", "POST", "DELETE"] {
            let flow = router.dispatch(make_context(method, "/hook"), "").await;
            assert_eq!(flow, Flow::End);
        }
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |ctx: Context| async move {
            ctx.response().send("first");
            Flow::End
        });
        router.get("/path", |ctx: Context| async move {
            ctx.response().send("second");
            Flow::End
        });

        let ctx = make_context("GET", "/path");
        let flow = router.dispatch(ctx.clone(), "").await;
        assert_eq!(flow, Flow::End);
        let wire = String::from_utf8(ctx.response().to_wire_bytes().to_vec()).unwrap();
        assert!(wire.ends_with("first"));
    }

    #[tokio::test]
    async fn continue_resumes_walk_over_later_routes() {
        let mut router = Router::new();
        router.get("/path", |ctx: Context| async move {
            ctx.set_var("seen-first".to_owned());
            Flow::Continue
        });
        router.get("/path", |_ctx: Context| async { Flow::End });

        let ctx = make_context("GET", "/path");
        let flow = router.dispatch(ctx.clone(), "").await;
        assert_eq!(flow, Flow::End);
        assert_eq!(ctx.var::<String>(), Some("seen-first".to_owned()));
    }

    #[tokio::test]
    async fn status_flow_propagates_to_caller() {
        let mut router = Router::new();
        router.get("/fail", |_ctx: Context| async {
            Flow::Status(Status::detailed(StatusCode::Unauthorized, "no token"))
        });
        match router.dispatch(make_context("GET", "/fail"), "").await {
            Flow::Status(status) => assert_eq!(status.code(), StatusCode::Unauthorized),
            other => panic!("expected Status flow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn params_populated_into_context() {
        let mut router = Router::new();
        router.get("/params/:p1/:p2", |_ctx: Context| async { Flow::End });

        let ctx = make_context("GET", "/params/7/9");
        router.dispatch(ctx.clone(), "").await;
        assert_eq!(ctx.param("p1"), Some("7".to_owned()));
        assert_eq!(ctx.param("p2"), Some("9".to_owned()));
    }

    #[tokio::test]
    async fn mount_prefix_is_stripped() {
        let mut router = Router::new();
        router.get("/users/:id", |_ctx: Context| async { Flow::End });

        let ctx = make_context("GET", "/api/users/42");
        let flow = router.dispatch(ctx.clone(), "/api").await;
        assert_eq!(flow, Flow::End);
        assert_eq!(ctx.param("id"), Some("42".to_owned()));
        assert_eq!(ctx.mount_path(), "/api");
    }

    #[tokio::test]
    async fn mount_path_exact_hits_root_pattern() {
        let mut router = Router::new();
        router.get("/", |_ctx: Context| async { Flow::End });
        let flow = router.dispatch(make_context("GET", "/api"), "/api").await;
        assert_eq!(flow, Flow::End);
    }

    #[tokio::test]
    async fn case_sensitive_config_rejects_mismatch() {
        let mut router = Router::with_config(RouterConfig {
            case_sensitive: true,
        });
        router.get("/Admin", |_ctx: Context| async { Flow::End });
        let flow = router.dispatch(make_context("GET", "/admin"), "").await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn get_post_registers_both_methods() {
        let mut router = Router::new();
        router.get_post("/form", |_ctx: Context| async { Flow::End });
        assert_eq!(router.len(), 2);
        assert_eq!(
            router.dispatch(make_context("GET", "/form"), "").await,
            Flow::End
        );
        assert_eq!(
            router.dispatch(make_context("POST", "/form"), "").await,
            Flow::End
        );
    }

    #[tokio::test]
    async fn restful_registers_five_methods() {
        let mut router = Router::new();
        router.restful("/thing/:id", |_ctx: Context| async { Flow::End });
        assert_eq!(router.len(), 5);
        for method in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            assert_eq!(
                router.dispatch(make_context(method, "/thing/1"), "").await,
                Flow::End
            );
        }
    }
}
