// Integration tests for graceful shutdown: a shutdown request stops reading
// from APRS-IS and lets queued submissions finish.

mod common;

use std::time::{Duration, Instant};

use check_aprs::config::PoolConfig;
use check_aprs::{Listener, ListenerState, StopReason};
use common::{FakeIcinga, FakeRelay, RelayEnd, test_config};

#[tokio::test]
async fn shutdown_request_drains_pool() {
    let icinga = FakeIcinga::start(&["KC1GDW-10"]).await;
    let lines = (0..5)
        .map(|i| format!("KC1GDW-10>APRS:>beacon {i}").into_bytes())
        .collect();
    let relay = FakeRelay::start(lines, RelayEnd::HoldOpen).await;

    let shutdown = async {
        while icinga.accepted().await.len() < 5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    let mut listener = Listener::new(test_config(&icinga, relay.port)).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), listener.run(shutdown))
        .await
        .expect("listener did not shut down")
        .unwrap();

    assert_eq!(summary.reason, StopReason::ShutdownRequested);
    assert_eq!(summary.frames_received, 5);
    assert_eq!(summary.stats.submitted, 5);
    assert_eq!(summary.stats.failed, 0);
    assert_eq!(listener.state(), ListenerState::Stopped);

    let outputs: Vec<String> = icinga
        .accepted_for("KC1GDW-10")
        .await
        .iter()
        .map(|body| body["plugin_output"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..5).map(|i| format!("OK: beacon {i}")).collect();
    assert_eq!(outputs, expected);
}

#[tokio::test]
async fn shutdown_while_idle() {
    let icinga = FakeIcinga::start(&["N0CALL"]).await;
    let relay = FakeRelay::start(vec![], RelayEnd::HoldOpen).await;

    let mut listener = Listener::new(test_config(&icinga, relay.port)).unwrap();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        listener.run(tokio::time::sleep(Duration::from_millis(300))),
    )
    .await
    .expect("listener did not shut down")
    .unwrap();

    assert_eq!(summary.reason, StopReason::ShutdownRequested);
    assert_eq!(summary.frames_received, 0);
    assert_eq!(relay.connections(), 1);
    assert!(relay.login().await.is_some());
}

#[tokio::test]
async fn queued_submissions_finish_after_shutdown() {
    let icinga = FakeIcinga::start_slow(&["KC1GDW-10"], Duration::from_millis(200)).await;
    let lines = (0..4)
        .map(|i| format!("KC1GDW-10>APRS:>beacon {i}").into_bytes())
        .collect();
    let relay = FakeRelay::start(lines, RelayEnd::HoldOpen).await;

    // Stop reading as soon as the first submission is in flight
    let shutdown = async {
        while icinga.received() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let mut config = test_config(&icinga, relay.port);
    config.pool = PoolConfig {
        workers: 1,
        queue_capacity: 8,
    };

    let mut listener = Listener::new(config).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), listener.run(shutdown))
        .await
        .expect("listener did not shut down")
        .unwrap();

    assert_eq!(summary.reason, StopReason::ShutdownRequested);
    assert_eq!(summary.frames_received, 4);
    assert_eq!(summary.stats.submitted, 4);
    assert_eq!(icinga.accepted().await.len(), 4);
}

#[tokio::test]
async fn hung_backend_does_not_block_shutdown() {
    let icinga = FakeIcinga::start_slow(&["KC1GDW-10"], Duration::from_secs(3600)).await;
    let lines = (0..5)
        .map(|i| format!("KC1GDW-10>APRS:>beacon {i}").into_bytes())
        .collect();
    let relay = FakeRelay::start(lines, RelayEnd::HoldOpen).await;

    // One submission hangs, one frame waits in the queue, the reader waits for a slot
    let mut config = test_config(&icinga, relay.port);
    config.pool = PoolConfig {
        workers: 1,
        queue_capacity: 1,
    };
    config.shutdown_grace = Duration::from_secs(1);

    let started = Instant::now();
    let mut listener = Listener::new(config).unwrap();
    let summary = tokio::time::timeout(
        Duration::from_secs(8),
        listener.run(tokio::time::sleep(Duration::from_millis(300))),
    )
    .await
    .expect("listener did not shut down")
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    assert_eq!(summary.reason, StopReason::ShutdownRequested);
    assert_eq!(summary.stats.submitted, 0);
    assert_eq!(icinga.received(), 1);
    assert!(icinga.accepted().await.is_empty());
    assert_eq!(listener.state(), ListenerState::Stopped);
}
