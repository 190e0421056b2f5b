//! Cookie-backed server-side sessions with sliding expiry.
//!
//! A [`SessionManager`] owns the only state in this crate that is genuinely
//! shared across concurrent requests: the id → record map, guarded by one
//! coarse lock that also serializes every per-record value operation, and a
//! background sweep task that evicts expired records.
//!
//! Requests interact with it through the [`sessions`] middleware: it resolves
//! the session cookie into a [`Session`] handle, stores the handle in the
//! context vars, and sets the cookie when a record was freshly issued.
//! An unknown, expired, or malformed cookie is never an error — it just
//! yields a fresh session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::debug;

use crate::context::Context;
use crate::handler::{Flow, IntoHandler};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "Xpress-Session-Id";

/// Session store configuration, fixed at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Sliding idle timeout after which a record expires.
    pub timeout: Duration,
    /// Interval between background sweep passes.
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// One stored session: bookkeeping plus the string key/value bag.
struct SessionRecord {
    last_used: Instant,
    timeout: Duration,
    values: HashMap<String, String>,
}

impl SessionRecord {
    fn new(timeout: Duration) -> Self {
        Self {
            last_used: Instant::now(),
            timeout,
            values: HashMap::new(),
        }
    }

    fn expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_used) > self.timeout
    }
}

type Store = Arc<Mutex<HashMap<String, SessionRecord>>>;

fn lock(store: &Store) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The shared session store.
///
/// Constructed once with its [`SessionConfig`] and passed by [`Arc`] to the
/// [`sessions`] middleware factory. There is deliberately no way to
/// reconfigure a live manager.
pub struct SessionManager {
    store: Store,
    config: SessionConfig,
    // Monotonic part of generated ids.
    counter: AtomicU64,
    sweeper_started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    /// Creates a manager with the given configuration. The sweep task starts
    /// lazily on the first [`resolve`](Self::resolve) inside a Tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            config,
            counter: AtomicU64::new(12345),
            sweeper_started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Resolves a presented cookie value into a session.
    ///
    /// Returns the session handle and whether the record was freshly issued —
    /// a fresh record means the caller must set the session cookie. A fresh
    /// record is issued when no cookie was presented, the id is unknown, or
    /// the record behind it has expired; an expired record is removed and
    /// the replacement gets a brand-new id. `last_used` slides forward on
    /// every resolve.
    pub fn resolve(&self, cookie: Option<&str>) -> (Session, bool) {
        self.ensure_sweeper();

        let mut store = lock(&self.store);
        let now = Instant::now();

        if let Some(id) = cookie.filter(|id| !id.is_empty()) {
            let expired = match store.get_mut(id) {
                Some(record) if !record.expired_at(now) => {
                    record.last_used = now;
                    return (self.handle_for(id), false);
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                debug!(id = %id, "session expired, issuing a new one");
                store.remove(id);
            }
        }

        let id = self.generate_id();
        debug!(id = %id, "starting new session");
        store.insert(id.clone(), SessionRecord::new(self.config.timeout));
        (self.handle_for(&id), true)
    }

    /// Returns the number of unexpired-or-not-yet-swept records in the store.
    pub fn active_sessions(&self) -> usize {
        lock(&self.store).len()
    }

    /// Stops the background sweep task, if it was started.
    ///
    /// Records stop being evicted after this; the store itself stays usable.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn handle_for(&self, id: &str) -> Session {
        Session {
            id: id.to_owned(),
            store: Arc::clone(&self.store),
        }
    }

    // Counter + wall-clock nanoseconds, hex-encoded to be cookie-safe.
    // Unique, not unguessable.
    fn generate_id(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        format!("{sequence:x}{stamp:x}")
    }

    // Start the sweep loop once, on the first resolve that runs inside a
    // Tokio runtime.
    fn ensure_sweeper(&self) {
        if self.sweeper_started.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.sweeper_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let store = Arc::clone(&self.store);
        let period = self.config.cleanup_interval.max(Duration::from_millis(10));
        let mut shutdown = self.shutdown.subscribe();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut store = lock(&store);
                        let before = store.len();
                        let now = Instant::now();
                        store.retain(|_, record| !record.expired_at(now));
                        let evicted = before - store.len();
                        if evicted > 0 {
                            debug!(evicted, remaining = store.len(), "expired session cleanup");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}

/// A handle to one session record.
///
/// Cloneable and cheap; every value operation serializes on the store-wide
/// lock, so concurrent handlers sharing a session id (two tabs, one user)
/// cannot corrupt the value map. Operations on a record that was evicted
/// mid-request are quiet no-ops.
#[derive(Clone)]
pub struct Session {
    id: String,
    store: Store,
}

impl Session {
    /// Returns the opaque session id as carried by the cookie.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.store)
            .get(&self.id)
            .and_then(|record| record.values.get(key).cloned())
    }

    /// Stores `value` under `key`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(record) = lock(&self.store).get_mut(&self.id) {
            record.values.insert(key.into(), value.into());
        }
    }

    /// Removes the value stored under `key`.
    pub fn delete(&self, key: &str) {
        if let Some(record) = lock(&self.store).get_mut(&self.id) {
            record.values.remove(key);
        }
    }

    /// Removes every value from this session.
    pub fn clear(&self) {
        if let Some(record) = lock(&self.store).get_mut(&self.id) {
            record.values.clear();
        }
    }

    /// Overrides the idle timeout for this record alone.
    pub fn set_timeout(&self, timeout: Duration) {
        if let Some(record) = lock(&self.store).get_mut(&self.id) {
            record.timeout = timeout;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Middleware factory: resolves the session cookie on every request.
///
/// Stores the [`Session`] handle in the context vars (see
/// [`Context::session`](crate::Context::session)) and sets the
/// [`SESSION_COOKIE`] response cookie whenever the store issued a fresh
/// record.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use xpress::{App, SessionConfig, SessionManager};
///
/// let manager = Arc::new(SessionManager::new(SessionConfig::default()));
/// let mut app = App::new();
/// app.with(xpress::sessions(Arc::clone(&manager)));
/// ```
pub fn sessions(manager: Arc<SessionManager>) -> impl IntoHandler {
    move |ctx: Context| {
        let manager = Arc::clone(&manager);
        async move {
            let cookie = ctx.request().cookie(SESSION_COOKIE);
            let (session, fresh) = manager.resolve(cookie.as_deref());
            if fresh {
                ctx.response().cookie(SESSION_COOKIE, session.id(), "/");
            }
            ctx.set_var(session);
            Flow::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(120),
            cleanup_interval: Duration::from_millis(30),
        }
    }

    #[test]
    fn fresh_session_without_cookie() {
        let manager = SessionManager::new(SessionConfig::default());
        let (session, fresh) = manager.resolve(None);
        assert!(fresh);
        assert!(!session.id().is_empty());
        assert_eq!(manager.active_sessions(), 1);
    }

    #[test]
    fn empty_or_unknown_cookie_yields_fresh_session() {
        let manager = SessionManager::new(SessionConfig::default());
        let (_, fresh) = manager.resolve(Some(""));
        assert!(fresh);
        let (_, fresh) = manager.resolve(Some("no-such-id"));
        assert!(fresh);
    }

    #[test]
    fn known_cookie_returns_same_record() {
        let manager = SessionManager::new(SessionConfig::default());
        let (first, _) = manager.resolve(None);
        first.set("user", "ada");

        let (second, fresh) = manager.resolve(Some(first.id()));
        assert!(!fresh);
        assert_eq!(second.id(), first.id());
        assert_eq!(second.get("user"), Some("ada".to_owned()));
        assert_eq!(manager.active_sessions(), 1);
    }

    #[test]
    fn generated_ids_are_unique() {
        let manager = SessionManager::new(SessionConfig::default());
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            let (session, _) = manager.resolve(None);
            assert!(ids.insert(session.id().to_owned()));
        }
    }

    #[test]
    fn value_operations() {
        let manager = SessionManager::new(SessionConfig::default());
        let (session, _) = manager.resolve(None);

        assert_eq!(session.get("k"), None);
        session.set("k", "v");
        assert_eq!(session.get("k"), Some("v".to_owned()));

        session.delete("k");
        assert_eq!(session.get("k"), None);

        session.set("a", "1");
        session.set("b", "2");
        session.clear();
        assert_eq!(session.get("a"), None);
        assert_eq!(session.get("b"), None);
    }

    #[tokio::test]
    async fn expired_cookie_gets_new_id() {
        let manager = SessionManager::new(quick_config());
        let (first, _) = manager.resolve(None);
        let old_id = first.id().to_owned();

        sleep(Duration::from_millis(300)).await;

        let (second, fresh) = manager.resolve(Some(&old_id));
        assert!(fresh);
        assert_ne!(second.id(), old_id);
    }

    #[tokio::test]
    async fn resolve_slides_expiry_forward() {
        let manager = SessionManager::new(quick_config());
        let (session, _) = manager.resolve(None);
        let id = session.id().to_owned();

        // Keep touching the session well inside the timeout; it must survive.
        for _ in 0..4 {
            sleep(Duration::from_millis(40)).await;
            let (_, fresh) = manager.resolve(Some(&id));
            assert!(!fresh);
        }
    }

    #[tokio::test]
    async fn sweep_evicts_expired_records() {
        let manager = SessionManager::new(quick_config());
        let (session, _) = manager.resolve(None);
        let _ = session;
        assert_eq!(manager.active_sessions(), 1);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(manager.active_sessions(), 0);
        manager.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_the_sweeper() {
        let manager = SessionManager::new(quick_config());
        let (_, _) = manager.resolve(None);
        manager.shutdown();
        sleep(Duration::from_millis(50)).await;

        // With the sweeper gone the expired record stays until resolved again.
        sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test]
    async fn middleware_issues_cookie_once_and_reuses_the_record() {
        let manager = Arc::new(SessionManager::new(SessionConfig::default()));
        let mut app = crate::App::new();
        app.with(sessions(Arc::clone(&manager)));
        app.with(|ctx: Context| async move {
            let session = ctx.session().unwrap();
            let count = session
                .get("count")
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0)
                + 1;
            session.set("count", count.to_string());
            ctx.response().send(count.to_string());
            Flow::End
        });

        let (request, _) =
            crate::Request::parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let response = app.handle(request).await;
        let wire = String::from_utf8(response.to_wire_bytes().to_vec()).unwrap();
        assert!(wire.contains("Set-Cookie: Xpress-Session-Id="));
        assert!(wire.ends_with("1"));

        let id = wire
            .lines()
            .find_map(|line| line.strip_prefix("Set-Cookie: Xpress-Session-Id="))
            .and_then(|rest| rest.split(';').next())
            .unwrap()
            .to_owned();

        let raw = format!("GET / HTTP/1.1\r\nHost: x\r\nCookie: Xpress-Session-Id={id}\r\n\r\n");
        let (request, _) = crate::Request::parse(raw.as_bytes()).unwrap();
        let response = app.handle(request).await;
        let wire = String::from_utf8(response.to_wire_bytes().to_vec()).unwrap();
        // An existing session is not re-issued.
        assert!(!wire.contains("Set-Cookie: Xpress-Session-Id="));
        assert!(wire.ends_with("2"));
        assert_eq!(manager.active_sessions(), 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn concurrent_sets_on_shared_session_never_corrupt() {
        let manager = Arc::new(SessionManager::new(SessionConfig::default()));
        let (session, _) = manager.resolve(None);
        let id = session.id().to_owned();

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let (session, fresh) = manager.resolve(Some(&id));
                assert!(!fresh);
                session.set("winner", i.to_string());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let value = session.get("winner").unwrap();
        let winner: u32 = value.parse().unwrap();
        assert!(winner < 16);
    }

    #[tokio::test]
    async fn concurrent_resolves_for_distinct_sessions() {
        let manager = Arc::new(SessionManager::new(SessionConfig::default()));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                let (session, fresh) = manager.resolve(None);
                assert!(fresh);
                session.id().to_owned()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(manager.active_sessions(), 32);
    }
}
