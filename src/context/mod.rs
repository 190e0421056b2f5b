//! Per-request context — request access plus request-scoped mutable state.
//!
//! A [`Context`] bundles the parsed, read-only [`Request`] with everything the
//! pipeline accumulates while walking the middleware stack: matched route
//! parameters, the parsed query map, parsed form values, the mount path of the
//! router currently dispatching, and a typed vars bag handlers use to pass
//! data forward (the session middleware stores the resolved
//! [`Session`](crate::Session) there).
//!
//! `Context` is a cheap clone: all clones refer to the same per-request state,
//! which is what lets the dispatcher keep a usable handle across a handler
//! panic. It is never shared between requests.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::http::{Method, Request, ResponseContext};
use crate::router::parse_query;

// Typed request-scoped storage keyed by value type: injects per-request state
// into later handlers without the handlers knowing about each other's types.
#[derive(Default)]
struct Vars {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Vars {
    fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters extracted from the matched route pattern.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    /// Creates an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a parameter name to the matched path segment.
    pub fn insert(&mut self, name: String, value: String) {
        self.map.insert(name, value);
    }

    /// Returns the value bound to `name`, if the matched pattern captured it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// Returns the number of captured parameters.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when no parameters were captured.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

struct RequestState {
    params: Params,
    query: HashMap<String, String>,
    form: HashMap<String, String>,
    vars: Vars,
    mount_path: String,
}

/// Everything one in-flight request carries through the middleware stack.
#[derive(Clone)]
pub struct Context {
    request: Arc<Request>,
    state: Arc<Mutex<RequestState>>,
    response: ResponseContext,
}

impl Context {
    /// Builds a fresh context around a parsed request.
    ///
    /// The query string is parsed up front so every handler sees the same map.
    pub fn new(request: Request) -> Self {
        let query = request
            .query_string()
            .map(parse_query)
            .unwrap_or_default();
        Self {
            request: Arc::new(request),
            state: Arc::new(Mutex::new(RequestState {
                params: Params::new(),
                query,
                form: HashMap::new(),
                vars: Vars::default(),
                mount_path: String::new(),
            })),
            response: ResponseContext::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the parsed inbound request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the response side of this request.
    pub fn response(&self) -> &ResponseContext {
        &self.response
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Returns the route parameter bound to `name` by the matched pattern.
    pub fn param(&self, name: &str) -> Option<String> {
        self.state().params.get(name).map(str::to_owned)
    }

    /// Returns the query-string value for `key`.
    pub fn query(&self, key: &str) -> Option<String> {
        self.state().query.get(key).cloned()
    }

    /// Returns the parsed form value for `key`.
    ///
    /// Populated by the urlencoded body middleware; empty until it runs.
    pub fn form_value(&self, key: &str) -> Option<String> {
        self.state().form.get(key).cloned()
    }

    /// Returns the mount path of the router currently dispatching, if any.
    pub fn mount_path(&self) -> String {
        self.state().mount_path.clone()
    }

    /// Stores a request-scoped var, replacing any previous value of the same type.
    pub fn set_var<T: Send + Sync + 'static>(&self, value: T) {
        self.state().vars.insert(value);
    }

    /// Returns a clone of the request-scoped var of type `T`, if set.
    pub fn var<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.state().vars.get::<T>().cloned()
    }

    /// Removes and returns the request-scoped var of type `T`, if set.
    pub fn take_var<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.state().vars.remove::<T>()
    }

    /// Returns the session resolved by the session middleware, if it ran.
    pub fn session(&self) -> Option<crate::session::Session> {
        self.var()
    }

    /// Deserializes the request body as JSON into `T`.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    pub(crate) fn set_params(&self, params: Params) {
        self.state().params = params;
    }

    pub(crate) fn set_form(&self, form: HashMap<String, String>) {
        self.state().form = form;
    }

    pub(crate) fn set_mount_path(&self, mount: &str) {
        self.state().mount_path = mount.to_owned();
    }
}
