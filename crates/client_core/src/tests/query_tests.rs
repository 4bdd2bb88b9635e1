use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::time::{advance, sleep};

fn counted<T, F>(
    calls: &Arc<AtomicUsize>,
    respond: F,
) -> impl Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(usize) -> Result<T, FetchError> + Send + Sync + 'static,
{
    let calls = Arc::clone(calls);
    let respond = Arc::new(respond);
    move || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        let respond = Arc::clone(&respond);
        async move {
            sleep(Duration::from_millis(10)).await;
            respond(attempt)
        }
        .boxed()
    }
}

fn server_error() -> FetchError {
    FetchError::Server {
        status: 503,
        message: "unavailable".to_string(),
    }
}

async fn settled<T: Send + Sync + 'static>(observer: &mut QueryObserver<T>) -> FetchState<T> {
    loop {
        let state = observer.state();
        if state.is_settled() {
            return state;
        }
        observer.changed().await.expect("entry alive");
    }
}

fn key(name: &str) -> QueryKey {
    QueryKey::new(["test", name])
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscribers_share_one_request() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut first = client.subscribe(key("shared"), counted(&calls, |_| Ok(7u32)), QueryOptions::default());
    let mut second = client.subscribe(key("shared"), counted(&calls, |_| Ok(7u32)), QueryOptions::default());

    let a = settled(&mut first).await;
    let b = settled(&mut second).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(
        a.data.as_ref().expect("data"),
        b.data.as_ref().expect("data")
    ));
}

#[tokio::test(start_paused = true)]
async fn concurrent_one_shot_fetches_share_one_request() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        client.fetch(key("once"), counted(&calls, |_| Ok("v".to_string())), QueryOptions::default()),
        client.fetch(key("once"), counted(&calls, |_| Ok("v".to_string())), QueryOptions::default()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a.expect("a"), &b.expect("b")));
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_fetch_independently() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut seven = client.subscribe(
        key("trends").with_param("days", 7),
        counted(&calls, |_| Ok(7u32)),
        QueryOptions::default(),
    );
    let mut thirty = client.subscribe(
        key("trends").with_param("days", 30),
        counted(&calls, |_| Ok(30u32)),
        QueryOptions::default(),
    );

    assert_eq!(settled(&mut seven).await.data.as_deref(), Some(&7));
    assert_eq!(settled(&mut thirty).await.data.as_deref(), Some(&30));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retryable_failure_is_retried_once() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("flaky"),
        counted(&calls, |attempt| if attempt == 0 { Err(server_error()) } else { Ok(1u32) }),
        QueryOptions::default(),
    );

    let state = settled(&mut observer).await;
    assert_eq!(state.status, FetchStatus::Success);
    assert_eq!(state.data.as_deref(), Some(&1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_the_error() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("down"),
        counted(&calls, |_| Err::<u32, _>(server_error())),
        QueryOptions::default(),
    );

    let state = settled(&mut observer).await;
    assert_eq!(state.status, FetchStatus::Error);
    assert_eq!(state.failure(), Some(&server_error()));
    assert!(state.data.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn authorization_failure_is_not_retried() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("denied"),
        counted(&calls, |_| {
            Err::<u32, _>(FetchError::Authorization {
                status: 401,
                message: "expired".to_string(),
            })
        }),
        QueryOptions::default().with_retry(3, Duration::from_secs(1)),
    );

    let state = settled(&mut observer).await;
    assert!(state.failure().is_some_and(FetchError::requires_reauth));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn refetch_keeps_previous_data_while_loading() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("swr"),
        counted(&calls, |attempt| Ok(attempt as u32)),
        QueryOptions::default(),
    );
    assert_eq!(settled(&mut observer).await.data.as_deref(), Some(&0));

    let pending = observer.refetch();
    let during = observer.state();
    assert_eq!(during.status, FetchStatus::Loading);
    assert!(during.is_refreshing());
    assert!(!during.is_loading());
    assert_eq!(during.data.as_deref(), Some(&0));

    assert_eq!(*pending.await.expect("refetch"), 1);
    assert_eq!(settled(&mut observer).await.data.as_deref(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_last_good_data() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("keep"),
        counted(&calls, |attempt| {
            if attempt == 0 {
                Ok(5u32)
            } else {
                Err(FetchError::DataShape("bad".to_string()))
            }
        }),
        QueryOptions::default(),
    );
    settled(&mut observer).await;

    let err = observer.refetch().await.expect_err("second fetch fails");
    assert!(matches!(err, FetchError::DataShape(_)));

    let state = observer.state();
    assert_eq!(state.status, FetchStatus::Error);
    assert_eq!(state.data.as_deref(), Some(&5));
}

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_reused_by_new_subscriber() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = QueryOptions::default().with_stale_time(Duration::from_secs(60));

    let mut first = client.subscribe(key("fresh"), counted(&calls, |_| Ok(1u32)), options.clone());
    settled(&mut first).await;
    drop(first);

    let second = client.subscribe(key("fresh"), counted(&calls, |_| Ok(1u32)), options.clone());
    assert_eq!(second.state().status, FetchStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(second);

    advance(Duration::from_secs(61)).await;
    let mut third = client.subscribe(key("fresh"), counted(&calls, |_| Ok(1u32)), options);
    settled(&mut third).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_observer_does_not_cancel_its_fetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let observer = client.subscribe(key("orphan"), counted(&calls, |_| Ok(9u32)), QueryOptions::default());
    drop(observer);
    sleep(Duration::from_millis(50)).await;

    let state = client.state::<u32>(&key("orphan")).expect("entry cached");
    assert_eq!(state.status, FetchStatus::Success);
    assert_eq!(state.data.as_deref(), Some(&9));

    let again = client.subscribe(key("orphan"), counted(&calls, |_| Ok(9u32)), QueryOptions::default());
    assert_eq!(again.state().data.as_deref(), Some(&9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidate_refetches_observed_entries() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("inv"),
        counted(&calls, |attempt| Ok(attempt as u32)),
        QueryOptions::default(),
    );
    settled(&mut observer).await;

    client.invalidate(&key("inv"));
    observer.changed().await.expect("loading");
    let state = settled(&mut observer).await;

    assert_eq!(state.data.as_deref(), Some(&1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidated_unobserved_entry_refetches_on_next_subscribe() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(key("later"), counted(&calls, |_| Ok(1u32)), QueryOptions::default());
    settled(&mut observer).await;
    drop(observer);

    client.invalidate_prefix(&["test"]);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut again = client.subscribe(key("later"), counted(&calls, |_| Ok(1u32)), QueryOptions::default());
    settled(&mut again).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn focus_refetches_only_stale_opted_in_entries() {
    let client = QueryClient::new();
    let focus_calls = Arc::new(AtomicUsize::new(0));
    let plain_calls = Arc::new(AtomicUsize::new(0));
    let stale_after = Duration::from_secs(10);

    let mut focused = client.subscribe(
        key("focus"),
        counted(&focus_calls, |_| Ok(1u32)),
        QueryOptions::default()
            .with_refetch_on_focus(true)
            .with_stale_time(stale_after),
    );
    let mut plain = client.subscribe(
        key("plain"),
        counted(&plain_calls, |_| Ok(1u32)),
        QueryOptions::default().with_stale_time(stale_after),
    );
    settled(&mut focused).await;
    settled(&mut plain).await;

    client.notify_focus();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(focus_calls.load(Ordering::SeqCst), 1);

    advance(stale_after).await;
    client.notify_focus();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(focus_calls.load(Ordering::SeqCst), 2);
    assert_eq!(plain_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn refetch_interval_stops_when_observer_drops() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let every = Duration::from_secs(30);

    let mut observer = client.subscribe(
        key("poll"),
        counted(&calls, |attempt| Ok(attempt as u32)),
        QueryOptions::default().with_refetch_interval(Some(every)),
    );
    settled(&mut observer).await;

    sleep(every).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    drop(observer);
    sleep(every * 3).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn manual_refetch_of_unknown_key_is_rejected() {
    let client = QueryClient::new();
    assert!(!client.refetch(&key("missing")));
}

#[tokio::test(start_paused = true)]
async fn clear_forgets_cached_entries() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(key("gone"), counted(&calls, |_| Ok(1u32)), QueryOptions::default());
    settled(&mut observer).await;
    drop(observer);

    client.clear();
    assert!(client.is_empty());
    assert!(client.state::<u32>(&key("gone")).is_none());
}

#[tokio::test(start_paused = true)]
async fn panicking_fetch_becomes_transport_error() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut observer = client.subscribe(
        key("panic"),
        counted(&calls, |_| -> Result<u32, FetchError> { panic!("fetcher bug") }),
        QueryOptions::default().with_retry(0, Duration::from_secs(1)),
    );

    let state = settled(&mut observer).await;
    assert!(matches!(state.failure(), Some(FetchError::Transport(_))));
}

#[test]
fn stale_time_defaults_to_refetch_interval() {
    assert_eq!(QueryOptions::default().effective_stale_time(), DEFAULT_STALE_TIME);
    let polled = QueryOptions::default().with_refetch_interval(Some(Duration::from_secs(30)));
    assert_eq!(polled.effective_stale_time(), Duration::from_secs(30));
    let explicit = polled.with_stale_time(Duration::from_secs(5));
    assert_eq!(explicit.effective_stale_time(), Duration::from_secs(5));
}

#[test]
fn backoff_doubles_and_caps() {
    let options = QueryOptions::default();
    assert_eq!(options.backoff(0), Duration::from_secs(1));
    assert_eq!(options.backoff(1), Duration::from_secs(2));
    assert_eq!(options.backoff(3), Duration::from_secs(8));
    assert_eq!(options.backoff(10), MAX_RETRY_DELAY);
    assert_eq!(options.backoff(40), MAX_RETRY_DELAY);
}

#[test]
fn query_key_formats_and_matches_prefixes() {
    let key = QueryKey::new(["dashboard", "trends"]).with_param("days", 30);
    assert_eq!(key.to_string(), "dashboard/trends/days=30");
    assert!(key.starts_with(&["dashboard"]));
    assert!(key.starts_with(&["dashboard", "trends"]));
    assert!(!key.starts_with(&["findings"]));
    assert!(!QueryKey::new(["dashboard"]).starts_with(&["dashboard", "trends"]));
}
