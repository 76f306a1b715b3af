//! Cookie-keyed sessions.
//!
//! A [`Session`] is loaded (or created) before the route's chain runs and
//! persisted after it returns, but only when something wrote to it.
//!
//! Within a request the map lives in an [`ArcSwap`] and every write is a
//! compare-and-swap retried until it lands. Each write is also recorded as a
//! per-key [`Changes`] entry, and the store merges those entries into the
//! stored map instead of replacing it. Two requests of the same client that
//! write different keys both keep their writes; when they write the same key
//! the request that finishes last wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::Result;
use crate::response::Response;

/// The key-value content of a session.
pub type SessionData = HashMap<String, Value>;

// ── Session ───────────────────────────────────────────────────────────────────

/// A client's session, shared by every handler of one request.
///
/// Reads mark the session *accessed*; writes mark it *accessed* and
/// *modified*. [`is_empty`](Session::is_empty) touches neither flag.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: String,
    fresh: bool,
    state: ArcSwap<State>,
    accessed: AtomicBool,
    modified: AtomicBool,
    invalidated: AtomicBool,
}

#[derive(Clone, Debug, Default)]
struct State {
    data: SessionData,
    changes: Changes,
}

impl Session {
    /// A brand-new session with a random identifier.
    pub fn new() -> Self {
        Self::build(uuid::Uuid::new_v4().to_string(), SessionData::new(), true)
    }

    /// A session restored from a store.
    pub fn load(id: impl Into<String>, data: SessionData) -> Self {
        Self::build(id.into(), data, false)
    }

    fn build(id: String, data: SessionData, fresh: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                fresh,
                state: ArcSwap::from_pointee(State { data, changes: Changes::default() }),
                accessed: AtomicBool::new(false),
                modified: AtomicBool::new(false),
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// `true` when the session was created for this request.
    pub fn is_new(&self) -> bool {
        self.inner.fresh
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.touch();
        self.inner.state.load().data.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.touch();
        self.inner.state.load().data.contains_key(key)
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        let previous = self.swap(|data| {
            data.insert(key.clone(), value.clone());
        });
        previous.data.get(&key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self.swap(|data| {
            data.remove(key);
        });
        previous.data.get(key).cloned()
    }

    /// Removes every entry currently in the map.
    pub fn clear(&self) {
        self.swap(SessionData::clear);
    }

    /// Applies `change` to a copy of the map and swaps it in, retrying if
    /// another writer got there first. `change` may run more than once.
    pub fn update<F>(&self, change: F)
    where
        F: FnMut(&mut SessionData),
    {
        self.swap(change);
    }

    fn swap<F>(&self, mut change: F) -> Arc<State>
    where
        F: FnMut(&mut SessionData),
    {
        self.touch();
        self.inner.modified.store(true, Ordering::Release);
        self.inner.state.rcu(|current| {
            let mut next = State::clone(current);
            change(&mut next.data);
            next.changes.record(&current.data, &next.data);
            next
        })
    }

    /// `true` when the map holds no entries. Does not mark the session accessed.
    pub fn is_empty(&self) -> bool {
        self.inner.state.load().data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.state.load().data.len()
    }

    pub fn accessed(&self) -> bool {
        self.inner.accessed.load(Ordering::Acquire)
    }

    pub fn modified(&self) -> bool {
        self.inner.modified.load(Ordering::Acquire)
    }

    /// Drops the session from the store at the end of the request and
    /// expires the client's cookie.
    pub fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::Release);
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::Acquire)
    }

    /// A copy of the current map.
    pub fn snapshot(&self) -> SessionData {
        self.inner.state.load().data.clone()
    }

    /// Every write made through this session so far.
    pub fn changes(&self) -> Changes {
        self.inner.state.load().changes.clone()
    }

    fn touch(&self) {
        self.inner.accessed.store(true, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ── Changes ───────────────────────────────────────────────────────────────────

/// The writes one request made to a session, by key. A removed key maps to
/// `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changes {
    entries: HashMap<String, Option<Value>>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    /// Replays the writes onto `data`. Keys that were never written keep
    /// their current values.
    pub fn apply(&self, data: &mut SessionData) {
        for (key, value) in &self.entries {
            match value {
                Some(value) => data.insert(key.clone(), value.clone()),
                None => data.remove(key),
            };
        }
    }

    fn record(&mut self, before: &SessionData, after: &SessionData) {
        for (key, value) in after {
            if before.get(key) != Some(value) {
                self.entries.insert(key.clone(), Some(value.clone()));
            }
        }
        for key in before.keys().filter(|key| !after.contains_key(*key)) {
            self.entries.insert(key.clone(), None);
        }
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Where sessions live between requests.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn load(&self, id: &str) -> Result<Option<SessionData>>;

    /// Merges one request's `changes` into the stored session, creating it
    /// when it does not exist yet. Keys the request did not write must keep
    /// whatever other requests stored meanwhile.
    async fn persist(&self, id: &str, changes: &Changes) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<T: SessionStore> SessionStore for Arc<T> {
    async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        T::load(self, id).await
    }

    async fn persist(&self, id: &str, changes: &Changes) -> Result<()> {
        T::persist(self, id, changes).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        T::remove(self, id).await
    }
}

/// In-process session store. Each session is an [`ArcSwap`] slot, so loads
/// never block and merges are compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Arc<ArcSwap<SessionData>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        Ok(self.sessions.get(id).map(|entry| SessionData::clone(&entry.value().load())))
    }

    async fn persist(&self, id: &str, changes: &Changes) -> Result<()> {
        let slot = Arc::clone(
            self.sessions
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(ArcSwap::from_pointee(SessionData::new())))
                .value(),
        );
        slot.rcu(|current| {
            let mut next = SessionData::clone(current);
            changes.apply(&mut next);
            next
        });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

// ── Cookie configuration ──────────────────────────────────────────────────────

/// `SameSite` attribute of the session cookie.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax    => "Lax",
            Self::None   => "None",
        }
    }
}

/// How the session cookie is named and scoped.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "spindle-session".to_owned(),
            cookie_path: "/".to_owned(),
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            max_age_secs: None,
        }
    }
}

impl SessionConfig {
    fn set_cookie(&self, value: &str, max_age: Option<Duration>) -> String {
        let mut cookie = format!("{}={}; Path={}", self.cookie_name, value, self.cookie_path);
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        cookie
    }
}

/// Value of cookie `name` in the request's `cookie` headers.
pub(crate) fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

// ── Layer ─────────────────────────────────────────────────────────────────────

/// Loads sessions before a request and persists them after it.
#[derive(Clone)]
pub(crate) struct SessionLayer {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionLayer {
    pub(crate) fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub(crate) async fn load(&self, headers: &HeaderMap) -> Result<Session> {
        if let Some(id) = cookie(headers, &self.config.cookie_name) {
            if let Some(data) = self.store.load(id).await? {
                return Ok(Session::load(id, data));
            }
            debug!("session cookie refers to an unknown session, starting a new one");
        }
        Ok(Session::new())
    }

    /// Persists a modified session and issues or expires the cookie.
    ///
    /// The response head is already decided at this point, so store failures
    /// are logged rather than turned into an error response.
    pub(crate) async fn finish(&self, session: &Session, res: &mut Response) {
        if session.is_invalidated() {
            if let Err(e) = self.store.remove(session.id()).await {
                error!(error = %e, "failed to remove session");
            }
            if !session.is_new() {
                let expired = self.config.set_cookie("", Some(Duration::ZERO));
                append_cookie(res, &expired);
            }
            return;
        }
        if !session.modified() {
            return;
        }
        if let Err(e) = self.store.persist(session.id(), &session.changes()).await {
            error!(error = %e, "failed to persist session");
            return;
        }
        let max_age = self.config.max_age_secs.map(Duration::from_secs);
        append_cookie(res, &self.config.set_cookie(session.id(), max_age));
    }
}

fn append_cookie(res: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Err(_) => error!("session cookie is not a valid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untouched_session_is_neither_accessed_nor_modified() {
        let session = Session::load("abc", SessionData::new());
        assert!(!session.accessed());
        assert!(!session.modified());
        assert!(session.is_empty());
        assert!(!session.accessed(), "is_empty must not mark the session accessed");
    }

    #[test]
    fn reads_mark_accessed_only() {
        let session = Session::load("abc", SessionData::from([("user".to_owned(), json!("alice"))]));
        assert_eq!(session.get("user"), Some(json!("alice")));
        assert!(session.accessed());
        assert!(!session.modified());
        assert!(!session.is_empty());
    }

    #[test]
    fn writes_mark_accessed_and_modified() {
        let session = Session::new();
        assert_eq!(session.insert("count", 1), None);
        assert!(session.accessed());
        assert!(session.modified());
        assert_eq!(session.insert("count", 2), Some(json!(1)));
        assert_eq!(session.remove("count"), Some(json!(2)));
        assert!(session.is_empty(), "emptiness follows the map, not the flags");
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let session = Session::new();
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let session = session.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        session.insert(format!("{t}-{i}"), i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(session.len(), 400);
    }

    #[test]
    fn cookie_lookup_scans_every_pair() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, "theme=dark; spindle-session=s1".parse().unwrap());
        assert_eq!(cookie(&headers, "spindle-session"), Some("s1"));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[test]
    fn set_cookie_carries_attributes() {
        let config = SessionConfig { secure: true, ..SessionConfig::default() };
        let cookie = config.set_cookie("s1", Some(Duration::from_secs(60)));
        assert_eq!(cookie, "spindle-session=s1; Path=/; Max-Age=60; HttpOnly; Secure; SameSite=Lax");
    }

    #[tokio::test]
    async fn layer_persists_only_modified_sessions() {
        let store = Arc::new(MemoryStore::new());
        let layer = SessionLayer::new(store.clone(), SessionConfig::default());

        let idle = layer.load(&HeaderMap::new()).await.unwrap();
        let mut res = Response::text("ok");
        layer.finish(&idle, &mut res).await;
        assert!(store.is_empty());
        assert!(res.header("set-cookie").is_none());

        let busy = layer.load(&HeaderMap::new()).await.unwrap();
        busy.insert("user", "alice");
        let mut res = Response::text("ok");
        layer.finish(&busy, &mut res).await;
        assert_eq!(store.len(), 1);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, format!("spindle-session={}", busy.id()).parse().unwrap());
        let again = layer.load(&headers).await.unwrap();
        assert_eq!(again.id(), busy.id());
        assert!(!again.is_new());
        assert_eq!(again.get("user"), Some(json!("alice")));
    }

    #[test]
    fn changes_record_writes_and_removals_by_key() {
        let session = Session::load("abc", SessionData::from([("keep".to_owned(), json!(1)), ("drop".to_owned(), json!(2))]));
        session.insert("added", "x");
        session.remove("drop");
        session.insert("keep", 1);

        let mut stored = SessionData::from([("keep".to_owned(), json!(1)), ("drop".to_owned(), json!(2)), ("other".to_owned(), json!(3))]);
        session.changes().apply(&mut stored);
        assert_eq!(stored.get("added"), Some(&json!("x")));
        assert!(!stored.contains_key("drop"));
        assert_eq!(stored.get("other"), Some(&json!(3)), "untouched keys survive");
        assert_eq!(session.changes().iter().count(), 2);
    }

    #[tokio::test]
    async fn overlapping_requests_merge_their_writes() {
        let store = MemoryStore::new();
        let seeded = Session::new();
        seeded.insert("user", "alice");
        store.persist(seeded.id(), &seeded.changes()).await.unwrap();

        let data = store.load(seeded.id()).await.unwrap().unwrap();
        let a = Session::load(seeded.id(), data.clone());
        let b = Session::load(seeded.id(), data);
        a.insert("a", 1);
        b.insert("b", 2);
        store.persist(a.id(), &a.changes()).await.unwrap();
        store.persist(b.id(), &b.changes()).await.unwrap();

        let merged = store.load(seeded.id()).await.unwrap().unwrap();
        assert_eq!(merged.get("user"), Some(&json!("alice")));
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(2)));
    }
}
