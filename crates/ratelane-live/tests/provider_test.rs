//! Integration tests for the provider, façades, feeds and polling fallback.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use helpers::{MockServer, exact_reconnect, make_provider, recv, settle, test_config, wait_for_state};
use ratelane_live::feeds::{
    ALERT_HISTORY, Alerts, ApiStatus, REQUEST_WINDOW, RequestStream, Stats, Usage,
};
use ratelane_live::{
    Aggregation, Aggregator, ConnectionState, FallbackPoller, FetchFuture, Fetcher, LiveConfig, LiveError, PollDecision,
    PollReason,
};
use ratelane_proto::Plan;
use ratelane_proto::channels::{DASHBOARD_STATS, REQUEST_LOG, USAGE_DATAPOINT};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ==================== Helper Functions ====================

fn usage(api: &str, second: u32, requests: u64) -> serde_json::Value {
    json!({
        "api_id": api,
        "timestamp": format!("2024-05-01T10:00:{second:02}Z"),
        "requests": requests,
        "rate_limited": 0,
        "errors": 0,
    })
}

fn stats(total: u64) -> serde_json::Value {
    json!({
        "total_requests": total,
        "rate_limited_requests": 0,
        "active_apis": 3,
        "error_rate": 0.0,
        "avg_latency_ms": 12.5,
    })
}

/// Fetcher counting calls and returning a fixed document.
#[derive(Clone, Default)]
struct CountingFetcher {
    calls: Arc<AtomicUsize>,
}

impl Fetcher for CountingFetcher {
    fn fetch(&self) -> FetchFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(json!({ "source": "rest" })) })
    }
}

struct FailingFetcher;

impl Fetcher for FailingFetcher {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async { Err(LiveError::Http("503 Service Unavailable".to_string())) })
    }
}

// ==================== Lazy connection ====================

#[tokio::test(start_paused = true)]
async fn test_no_connection_without_subscribers() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let _feed = provider.feed::<Usage>();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(server.open_count(), 0);
    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_two_widgets_share_one_connection() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();

    let feed = provider.feed::<Usage>();
    let sub_a = feed.subscribe(move |p| {
        let _ = tx_a.send(p.requests);
    });
    let sub_b = feed.subscribe(move |p| {
        let _ = tx_b.send(p.requests);
    });
    assert!(sub_a.is_active() && sub_b.is_active());

    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    assert_eq!(server.open_count(), 1);

    server.publish(USAGE_DATAPOINT, usage("payments", 1, 7));
    assert_eq!(recv(&mut rx_a).await, 7);
    assert_eq!(recv(&mut rx_b).await, 7);

    drop(sub_a);
    server.publish(USAGE_DATAPOINT, usage("payments", 2, 9));
    assert_eq!(recv(&mut rx_b).await, 9);
    settle().await;
    assert!(rx_a.try_recv().is_err());
    assert_eq!(server.open_count(), 1);
}

// ==================== Access gating ====================

#[tokio::test(start_paused = true)]
async fn test_free_plan_never_registers_or_connects() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Free));

    let feed = provider.feed::<Usage>();
    let sub = feed.subscribe(|_| {});
    let view = feed.attach();

    assert!(!sub.is_active());
    assert!(!view.is_live());
    assert_eq!(provider.router().subscriber_count(), 0);

    let status = feed.status();
    assert!(!status.has_access);
    assert!(status.should_poll());
    assert!(!status.shows_disconnect_banner());
    assert_eq!(
        feed.facade().poll_decision(),
        PollDecision::Poll {
            interval: Duration::from_secs(30),
            reason: PollReason::NoAccess,
        }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_user_has_no_access() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());

    let feed = provider.feed::<Stats>();
    assert!(!feed.has_access());
    assert!(!feed.subscribe(|_| {}).is_active());
}

#[tokio::test(start_paused = true)]
async fn test_enterprise_channel_needs_enterprise() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let facade = provider.facade(REQUEST_LOG);
    assert_eq!(facade.required_plan(), Plan::Enterprise);
    assert!(!facade.has_access());
    assert!(!facade.subscribe(REQUEST_LOG, |_| Ok(())).is_active());

    provider.set_plan(Some(Plan::Enterprise));
    assert!(facade.has_access());
}

#[tokio::test(start_paused = true)]
async fn test_plan_upgrade_unlocks_live_without_reconnect() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Free));

    let mut view = provider.feed::<Stats>().attach();
    assert!(!view.sync().has_access);
    assert!(!view.is_live());
    assert_eq!(server.open_count(), 0);

    provider.set_plan(Some(Plan::Pro));
    let status = view.sync();
    assert!(status.has_access);
    assert!(view.is_live());

    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    server.publish(DASHBOARD_STATS, stats(42));

    tokio::time::timeout(Duration::from_secs(5), async {
        while view.read(|v| v.get().is_none()) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("stats delivered");
    assert_eq!(view.read(|v| v.get().map(|s| s.total_requests)), Some(42));
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_plan_downgrade_drops_live_handler_on_sync() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let mut view = provider.feed::<Stats>().attach();
    assert!(view.is_live());

    provider.set_plan(Some(Plan::Free));
    let status = view.sync();
    assert!(!status.has_access);
    assert!(!view.is_live());
    assert_eq!(provider.router().subscriber_count(), 0);
}

// ==================== Feeds ====================

#[tokio::test(start_paused = true)]
async fn test_usage_feed_filters_by_api_and_buckets_per_minute() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let view = provider.feed::<Usage>().for_api("payments").attach();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _probe = provider.feed::<Usage>().subscribe(move |p| {
        let _ = tx.send(p.api_id);
    });

    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    server.publish(USAGE_DATAPOINT, usage("payments", 5, 10));
    server.publish(USAGE_DATAPOINT, usage("search", 6, 99));
    server.publish(USAGE_DATAPOINT, usage("payments", 40, 5));
    server.publish(USAGE_DATAPOINT, json!({ "api_id": "broken" }));

    // The unfiltered probe sees all valid payloads; handlers run in order.
    for expected in ["payments", "search", "payments"] {
        assert_eq!(recv(&mut rx).await, expected);
    }

    view.read(|series| {
        assert_eq!(series.len(), 1);
        assert_eq!(series.total_requests(), 15);
    });
    assert_eq!(provider.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_view_push_applies_filter() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Free));

    let view = provider.feed::<ApiStatus>().for_api("search").attach();
    for api in ["search", "payments"] {
        let update = serde_json::from_value(json!({
            "api_id": api,
            "status": "degraded",
            "checked_at": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        view.push(update);
    }

    view.read(|board| {
        assert_eq!(board.len(), 1);
        assert!(board.get("search").is_some());
    });
}

#[test]
fn test_feeds_report_their_aggregation() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());

    assert_eq!(provider.feed::<Usage>().aggregation(), Aggregation::PerMinute);
    assert_eq!(provider.feed::<Stats>().aggregation(), Aggregation::Latest);
    assert_eq!(
        provider.feed::<Alerts>().aggregation(),
        Aggregation::Window(ALERT_HISTORY)
    );
    assert_eq!(
        provider.feed::<RequestStream>().aggregation(),
        Aggregation::Window(REQUEST_WINDOW)
    );
    assert_eq!(provider.feed::<ApiStatus>().aggregation(), Aggregation::LatestPerApi);
}

// ==================== Idle close ====================

#[tokio::test(start_paused = true)]
async fn test_idle_close_after_last_subscriber_leaves() {
    let server = MockServer::new();
    let config = test_config().with_idle_timeout(Duration::from_secs(5));
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));

    let sub = provider.feed::<Stats>().subscribe(|_| {});
    wait_for_state(provider.manager(), ConnectionState::Connected).await;

    drop(sub);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(provider.state(), ConnectionState::Connected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_new_subscriber_cancels_idle_close() {
    let server = MockServer::new();
    let config = test_config().with_idle_timeout(Duration::from_secs(5));
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));

    let feed = provider.feed::<Stats>();
    let first = feed.subscribe(|_| {});
    wait_for_state(provider.manager(), ConnectionState::Connected).await;

    drop(first);
    tokio::time::sleep(Duration::from_secs(3)).await;
    let _second = feed.subscribe(|_| {});
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(provider.state(), ConnectionState::Connected);
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_idle_timeout_closes_immediately() {
    let server = MockServer::new();
    let config = test_config().with_idle_timeout(Duration::ZERO);
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));

    let sub = provider.feed::<Stats>().subscribe(|_| {});
    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    drop(sub);

    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_lazy_connect() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));

    let first = provider.feed::<Stats>().subscribe(|_| {});
    wait_for_state(provider.manager(), ConnectionState::Connected).await;

    provider.shutdown();
    assert_eq!(provider.state(), ConnectionState::Disconnected);

    drop(first);
    let _again = provider.feed::<Stats>().subscribe(|_| {});
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(server.open_count(), 1);
    assert_eq!(provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_shutdown_is_ignored() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Pro));
    let feed = provider.feed::<Stats>();

    let sub = feed.subscribe(|_| {});
    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    provider.shutdown();
    drop(sub);

    feed.reconnect();
    settle().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(provider.state(), ConnectionState::Disconnected);
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_subscribers_closes_when_idle() {
    let server = MockServer::new();
    let config = test_config().with_idle_timeout(Duration::from_secs(5));
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));
    let facade = provider.facade(DASHBOARD_STATS);

    facade.reconnect();
    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    assert_eq!(server.open_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(provider.state(), ConnectionState::Disconnected);
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_subscribers_stays_open_once_one_registers() {
    let server = MockServer::new();
    let config = test_config().with_idle_timeout(Duration::from_secs(5));
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));
    let feed = provider.feed::<Stats>();

    feed.reconnect();
    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    let _sub = feed.subscribe(|_| {});
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(provider.state(), ConnectionState::Connected);
    assert_eq!(server.open_count(), 1);
}

// ==================== Degraded mode ====================

#[tokio::test(start_paused = true)]
async fn test_error_state_switches_to_degraded_polling_and_recovers() {
    let server = MockServer::new();
    server.set_refusing(true);
    let config = LiveConfig::new("ws://mock").with_reconnect(exact_reconnect(1000, 2));
    let provider = make_provider(&server, &config);
    provider.set_plan(Some(Plan::Pro));

    let feed = provider.feed::<Stats>();
    let _sub = feed.subscribe(|_| {});

    let status = feed.status();
    assert!(!status.should_poll(), "connecting must not poll");

    wait_for_state(provider.manager(), ConnectionState::Error).await;
    let status = feed.status();
    assert!(status.should_poll());
    assert!(status.shows_disconnect_banner());
    assert_eq!(
        feed.facade().poll_decision(),
        PollDecision::Poll {
            interval: Duration::from_secs(60),
            reason: PollReason::Degraded,
        }
    );

    server.set_refusing(false);
    feed.reconnect();
    wait_for_state(provider.manager(), ConnectionState::Connected).await;
    assert!(!feed.status().should_poll());
}

// ==================== Polling fallback ====================

#[tokio::test(start_paused = true)]
async fn test_poller_polls_without_access_and_stops_on_upgrade() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());
    provider.set_plan(Some(Plan::Free));

    let fetcher = CountingFetcher::default();
    let calls = Arc::clone(&fetcher.calls);
    let poller = FallbackPoller::new(provider.facade(DASHBOARD_STATS), fetcher);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            poller
                .run(
                    move |doc| {
                        let _ = tx.send(doc);
                    },
                    cancel,
                )
                .await;
        }
    });

    assert_eq!(recv(&mut rx).await["source"], "rest");
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    provider.set_plan(Some(Plan::Pro));
    settle().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poller_survives_fetch_errors() {
    let server = MockServer::new();
    let provider = make_provider(&server, &test_config());

    let poller = FallbackPoller::new(provider.facade(DASHBOARD_STATS), FailingFetcher);
    let cancel = CancellationToken::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    let task = tokio::spawn({
        let cancel = cancel.clone();
        let delivered = Arc::clone(&delivered);
        async move {
            poller
                .run(
                    move |_| {
                        delivered.fetch_add(1, Ordering::SeqCst);
                    },
                    cancel,
                )
                .await;
        }
    });

    tokio::time::sleep(Duration::from_secs(95)).await;
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}
