//! Keyed query cache with request de-duplication, retry and timed refetch.
//!
//! Every logical query lives in one process-wide entry keyed by
//! [`QueryKey`]. Observers subscribe to an entry and receive
//! [`FetchState`] snapshots; the network call itself runs in a spawned task
//! owned by the entry, so an observer going away never cancels a request
//! another observer (or a later remount) is waiting on. At most one fetch per
//! key is in flight at a time.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::error::FetchError;

pub const DEFAULT_RETRY_COUNT: u32 = 1;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn with_param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.0.push(format!("{name}={value}"));
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.0.len() && prefix.iter().zip(&self.0).all(|(p, s)| p == s)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Refetch on a fixed timer for as long as the observer is alive.
    pub refetch_interval: Option<Duration>,
    /// Additional attempts after a retryable failure.
    pub retry_count: u32,
    /// First backoff step; doubles per attempt up to [`MAX_RETRY_DELAY`].
    pub retry_delay: Duration,
    pub refetch_on_focus: bool,
    /// How long fetched data counts as fresh. Defaults to the refetch
    /// interval, or [`DEFAULT_STALE_TIME`] without one.
    pub stale_time: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            refetch_interval: None,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            refetch_on_focus: false,
            stale_time: None,
        }
    }
}

impl QueryOptions {
    pub fn with_refetch_interval(mut self, interval: Option<Duration>) -> Self {
        self.refetch_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn effective_stale_time(&self) -> Duration {
        self.stale_time
            .or(self.refetch_interval)
            .unwrap_or(DEFAULT_STALE_TIME)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.retry_delay
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Snapshot of one query. `data` survives refetches and failures, so a
/// `Loading` or `Error` state may still carry the previous result.
#[derive(Debug)]
pub struct FetchState<T> {
    pub status: FetchStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> Clone for FetchState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
        }
    }
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            status: FetchStatus::Idle,
            data: None,
            error: None,
            last_fetched_at: None,
        }
    }
}

impl<T> FetchState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self.status, FetchStatus::Idle | FetchStatus::Loading) && self.data.is_none()
    }

    pub fn is_refreshing(&self) -> bool {
        self.status == FetchStatus::Loading && self.data.is_some()
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, FetchStatus::Success | FetchStatus::Error)
    }

    /// The error that ended the latest fetch, if it failed.
    pub fn failure(&self) -> Option<&FetchError> {
        if self.status == FetchStatus::Error {
            self.error.as_ref()
        } else {
            None
        }
    }
}

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;
type InFlight<T> = Shared<BoxFuture<'static, Result<Arc<T>, FetchError>>>;

struct QueryEntry<T> {
    key: QueryKey,
    state: watch::Sender<FetchState<T>>,
    control: Mutex<EntryControl<T>>,
}

struct EntryControl<T> {
    fetch_fn: FetchFn<T>,
    options: QueryOptions,
    inflight: Option<InFlight<T>>,
    fetched_at: Option<Instant>,
    invalidated: bool,
    focus_observers: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + Sync + 'static> QueryEntry<T> {
    fn new(key: QueryKey, fetch_fn: FetchFn<T>, options: QueryOptions) -> Self {
        let (state, _) = watch::channel(FetchState::default());
        Self {
            key,
            state,
            control: Mutex::new(EntryControl {
                fetch_fn,
                options,
                inflight: None,
                fetched_at: None,
                invalidated: false,
                focus_observers: 0,
            }),
        }
    }

    fn register(&self, fetch_fn: FetchFn<T>, options: QueryOptions) {
        let mut control = lock(&self.control);
        control.fetch_fn = fetch_fn;
        control.options = options;
    }

    fn is_fresh(&self) -> bool {
        let control = lock(&self.control);
        if control.invalidated || control.inflight.is_some() {
            return false;
        }
        let stale_time = control.options.effective_stale_time();
        let fresh_window = control
            .fetched_at
            .is_some_and(|fetched_at| fetched_at.elapsed() < stale_time);
        fresh_window && self.state.borrow().data.is_some()
    }

    fn cached(&self) -> Option<Arc<T>> {
        self.state.borrow().data.clone()
    }

    /// Starts a fetch, or joins the one already running for this key.
    fn start_fetch(self: &Arc<Self>) -> InFlight<T> {
        let mut control = lock(&self.control);
        if let Some(inflight) = &control.inflight {
            debug!(query = %self.key, "query: joining in-flight fetch");
            return inflight.clone();
        }

        let fetch_fn = Arc::clone(&control.fetch_fn);
        let options = control.options.clone();
        self.state.send_modify(|state| state.status = FetchStatus::Loading);

        let entry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let attempt = run_with_retry(&entry.key, fetch_fn.as_ref(), &options);
            let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(outcome) => outcome.map(Arc::new),
                Err(_) => Err(FetchError::Transport(format!(
                    "fetch for '{}' panicked",
                    entry.key
                ))),
            };
            entry.settle(&outcome);
            outcome
        });

        let key = self.key.clone();
        let inflight = async move {
            task.await.unwrap_or_else(|err| {
                Err(FetchError::Transport(format!(
                    "fetch task for '{key}' ended unexpectedly: {err}"
                )))
            })
        }
        .boxed()
        .shared();
        control.inflight = Some(inflight.clone());
        inflight
    }

    fn settle(&self, outcome: &Result<Arc<T>, FetchError>) {
        let mut control = lock(&self.control);
        control.inflight = None;
        match outcome {
            Ok(data) => {
                control.fetched_at = Some(Instant::now());
                control.invalidated = false;
                self.state.send_replace(FetchState {
                    status: FetchStatus::Success,
                    data: Some(Arc::clone(data)),
                    error: None,
                    last_fetched_at: Some(Utc::now()),
                });
            }
            Err(err) => {
                self.state.send_modify(|state| {
                    state.status = FetchStatus::Error;
                    state.error = Some(err.clone());
                });
            }
        }
    }

    fn has_observers(&self) -> bool {
        self.state.receiver_count() > 0
    }
}

async fn run_with_retry<T>(
    key: &QueryKey,
    fetch_fn: &(dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync),
    options: &QueryOptions,
) -> Result<T, FetchError> {
    let mut attempt = 0;
    loop {
        match fetch_fn().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(query = %key, attempts = attempt + 1, "query: recovered after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() || attempt >= options.retry_count => {
                warn!(query = %key, attempts = attempt + 1, error = %err, "query: failed");
                return Err(err);
            }
            Err(err) => {
                let delay = options.backoff(attempt);
                warn!(
                    query = %key,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "query: attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Type-erased operations the cache runs over entries of any payload type.
trait CacheEntry: Send + Sync {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn key(&self) -> &QueryKey;
    fn refetch(self: Arc<Self>);
    fn invalidate(self: Arc<Self>);
    fn focus(self: Arc<Self>);
}

impl<T: Send + Sync + 'static> CacheEntry for QueryEntry<T> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn refetch(self: Arc<Self>) {
        let _ = self.start_fetch();
    }

    fn invalidate(self: Arc<Self>) {
        lock(&self.control).invalidated = true;
        if self.has_observers() {
            let _ = self.start_fetch();
        }
    }

    fn focus(self: Arc<Self>) {
        let wants_focus = lock(&self.control).focus_observers > 0;
        if wants_focus && !self.is_fresh() {
            let _ = self.start_fetch();
        }
    }
}

/// Process-wide query cache. Cheap to clone; clones share entries.
#[derive(Clone, Default)]
pub struct QueryClient {
    entries: Arc<Mutex<HashMap<QueryKey, Arc<dyn CacheEntry>>>>,
}

impl QueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry<T, F, Fut>(&self, key: QueryKey, fetch_fn: F, options: QueryOptions) -> Arc<QueryEntry<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let fetch_fn: FetchFn<T> = Arc::new(move || fetch_fn().boxed());
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.get(&key) {
            match Arc::clone(existing).as_any().downcast::<QueryEntry<T>>() {
                Ok(entry) => {
                    entry.register(fetch_fn, options);
                    return entry;
                }
                Err(_) => {
                    warn!(query = %key, "query: key reused with a different payload type; replacing entry");
                }
            }
        }

        let entry = Arc::new(QueryEntry::new(key.clone(), fetch_fn, options));
        entries.insert(key, Arc::clone(&entry) as Arc<dyn CacheEntry>);
        entry
    }

    fn typed_entry<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<QueryEntry<T>>> {
        let entry = lock(&self.entries).get(key).cloned()?;
        entry.as_any().downcast::<QueryEntry<T>>().ok()
    }

    fn matching(&self, predicate: impl Fn(&QueryKey) -> bool) -> Vec<Arc<dyn CacheEntry>> {
        lock(&self.entries)
            .values()
            .filter(|entry| predicate(entry.key()))
            .cloned()
            .collect()
    }

    /// Observes `key`, fetching unless fresh data is already cached.
    pub fn subscribe<T, F, Fut>(&self, key: QueryKey, fetch_fn: F, options: QueryOptions) -> QueryObserver<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let entry = self.entry(key, fetch_fn, options.clone());
        let receiver = entry.state.subscribe();

        if entry.is_fresh() {
            debug!(query = %entry.key, "query: serving fresh cache entry");
        } else {
            let _ = entry.start_fetch();
        }

        if options.refetch_on_focus {
            lock(&entry.control).focus_observers += 1;
        }
        let timer = options
            .refetch_interval
            .map(|interval| spawn_refetch_timer(Arc::downgrade(&entry), interval));

        QueryObserver {
            entry,
            receiver,
            timer,
            refetch_on_focus: options.refetch_on_focus,
        }
    }

    /// One-shot read: cached data when fresh, otherwise the (shared) result
    /// of a fetch.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetch_fn: F, options: QueryOptions) -> Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let entry = self.entry(key, fetch_fn, options);
        if entry.is_fresh() {
            if let Some(data) = entry.cached() {
                return Ok(data);
            }
        }
        entry.start_fetch().await
    }

    pub fn state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<FetchState<T>> {
        self.typed_entry::<T>(key)
            .map(|entry| entry.state.borrow().clone())
    }

    /// Fetches `key` now regardless of freshness. Returns false for keys
    /// that were never registered.
    pub fn refetch(&self, key: &QueryKey) -> bool {
        let entry = lock(&self.entries).get(key).cloned();
        match entry {
            Some(entry) => {
                entry.refetch();
                true
            }
            None => false,
        }
    }

    /// Marks `key` stale; observed entries refetch immediately.
    pub fn invalidate(&self, key: &QueryKey) {
        for entry in self.matching(|candidate| candidate == key) {
            entry.invalidate();
        }
    }

    pub fn invalidate_prefix(&self, prefix: &[&str]) {
        for entry in self.matching(|candidate| candidate.starts_with(prefix)) {
            entry.invalidate();
        }
    }

    /// The application regained focus.
    pub fn notify_focus(&self) {
        for entry in self.matching(|_| true) {
            entry.focus();
        }
    }

    /// Drops every cached entry. Live observers keep their own entries.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spawn_refetch_timer<T: Send + Sync + 'static>(
    entry: Weak<QueryEntry<T>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(entry) = entry.upgrade() else {
                break;
            };
            debug!(query = %entry.key, "query: refetch interval elapsed");
            let _ = entry.start_fetch();
        }
    })
}

/// A live subscription. Dropping it stops its refetch timer; a fetch it
/// started keeps running and fills the cache.
pub struct QueryObserver<T: Send + Sync + 'static> {
    entry: Arc<QueryEntry<T>>,
    receiver: watch::Receiver<FetchState<T>>,
    timer: Option<JoinHandle<()>>,
    refetch_on_focus: bool,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub fn key(&self) -> &QueryKey {
        &self.entry.key
    }

    pub fn state(&self) -> FetchState<T> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next state change. `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<FetchState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Manual refetch; joins a fetch already in flight.
    pub fn refetch(&self) -> impl Future<Output = Result<Arc<T>, FetchError>> {
        self.entry.start_fetch()
    }
}

impl<T: Send + Sync + 'static> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.refetch_on_focus {
            let mut control = lock(&self.entry.control);
            control.focus_observers = control.focus_observers.saturating_sub(1);
        }
    }
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
