mod common;

use std::time::Duration;

use common::{app, widget, FakeRemote};
use tokio::sync::broadcast::error::TryRecvError;

use stocktrack_offline::{ConnectivityState, SyncEvent, WorkerTiming};

fn timing(debounce_ms: u64) -> WorkerTiming {
    WorkerTiming {
        // Long enough that no probe tick fires during a test.
        probe_interval: Duration::from_secs(3600),
        reconnect_debounce: Duration::from_millis(debounce_ms),
    }
}

#[tokio::test]
async fn flapping_connectivity_triggers_one_pass() {
    let remote = FakeRemote::new();
    let state = app(remote.clone(), ConnectivityState::Offline);
    state.gateway.create_product(widget()).await.unwrap();

    let handle = state.worker(timing(100)).start();
    let mut events = handle.subscribe();

    state.offline_mode.set_online();
    state.offline_mode.set_offline();
    state.offline_mode.set_online();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no sync event")
        .unwrap();
    assert_eq!(
        event,
        SyncEvent::Completed {
            replayed: 1,
            refreshed: true,
        }
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(remote.count("create_product"), 1);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    handle.shutdown().await;
}

#[tokio::test]
async fn going_offline_cancels_the_scheduled_pass() {
    let remote = FakeRemote::new();
    let state = app(remote.clone(), ConnectivityState::Offline);
    state.gateway.create_product(widget()).await.unwrap();

    let handle = state.worker(timing(100)).start();
    let mut events = handle.subscribe();

    state.offline_mode.set_online();
    tokio::time::sleep(Duration::from_millis(20)).await;
    state.offline_mode.set_offline();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(remote.calls().is_empty());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(state.queue.len().await, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_pass_is_reported() {
    let remote = FakeRemote::new();
    remote.fail_op("create_product");
    let state = app(remote.clone(), ConnectivityState::Offline);
    state.gateway.create_product(widget()).await.unwrap();

    let worker = state.worker(timing(0));
    let mut events = worker.subscribe();

    state.offline_mode.set_online();
    let report = worker.sync_now().await;

    assert_eq!(report.failed.len(), 1);
    match events.try_recv().unwrap() {
        SyncEvent::Failed {
            failed, remaining, error, ..
        } => {
            assert_eq!(failed, 1);
            assert_eq!(remaining, 1);
            assert!(error.unwrap().contains("500"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn probe_tracks_server_health() {
    let remote = FakeRemote::new();
    let state = app(remote.clone(), ConnectivityState::Offline);
    let worker = state.worker(timing(0));

    assert!(worker.probe().await);
    assert!(!state.offline_mode.is_offline());
    assert!(!worker.probe().await);

    remote.set_down(true);
    assert!(worker.probe().await);
    assert!(state.offline_mode.is_offline());
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let state = app(FakeRemote::new(), ConnectivityState::Online);
    let handle = state.worker(timing(0)).start();

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("worker did not stop");
}
