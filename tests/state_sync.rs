//! Integration tests for the parameter synchronizer, its polling fallback and
//! observer fan-out.

use lens_control::camera::mock::MockCamera;
use lens_control::camera::{FocusState, Parameter, ParameterValue};
use lens_control::live_view::{ConnectionStatus, ParameterUpdate, TransportEvent};
use lens_control::sync::{
    ParameterSynchronizer, PollingExit, PollingFallback, StatusChange, UpdateSource,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn focus(n: f64) -> ParameterValue {
    ParameterValue::Focus(FocusState { normalised: n })
}

fn focus_event(n: f64) -> TransportEvent {
    TransportEvent::Parameter(ParameterUpdate {
        parameter: Parameter::Focus,
        value: focus(n),
    })
}

// =============================================================================
// Event / poll interplay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_event_stops_polling() {
    let camera = Arc::new(MockCamera::new());
    let sync = Arc::new(ParameterSynchronizer::new());
    let (tx, rx) = mpsc::channel(16);
    let pump = tokio::spawn(sync.clone().run_event_pump(rx));

    let poller = PollingFallback::new(camera.clone(), sync.clone(), Duration::from_millis(200));
    let ticks = poller.tick_counter();
    let polling = tokio::spawn(poller.run(CancellationToken::new()));

    tokio::time::sleep(Duration::from_millis(1010)).await;
    assert!(ticks.load(Ordering::Relaxed) >= 5);
    assert_eq!(sync.get(Parameter::Focus).unwrap().source, UpdateSource::Poll);

    tx.send(focus_event(0.77)).await.unwrap();
    assert_eq!(polling.await.unwrap(), PollingExit::EventsActive);

    let before = ticks.load(Ordering::Relaxed);
    let reads = camera.reads();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(ticks.load(Ordering::Relaxed), before);
    assert_eq!(camera.reads(), reads);

    let entry = sync.get(Parameter::Focus).unwrap();
    assert_eq!(entry.value, focus(0.77));
    assert_eq!(entry.source, UpdateSource::Event);

    drop(tx);
    pump.await.unwrap();
}

#[tokio::test]
async fn test_last_write_wins_across_channels() {
    let sync = ParameterSynchronizer::new();
    sync.apply(Parameter::Focus, focus(0.1), UpdateSource::Event);
    sync.apply(Parameter::Focus, focus(0.2), UpdateSource::Poll);
    assert_eq!(sync.get(Parameter::Focus).unwrap().value, focus(0.2));

    sync.apply(Parameter::Focus, focus(0.3), UpdateSource::Event);
    assert_eq!(sync.get(Parameter::Focus).unwrap().value, focus(0.3));
    assert!(sync.events_active());
}

#[tokio::test(start_paused = true)]
async fn test_events_before_start_delay_prevent_polling() {
    let camera = Arc::new(MockCamera::new());
    let sync = Arc::new(ParameterSynchronizer::new());
    let poller = PollingFallback::new(camera.clone(), sync.clone(), Duration::from_millis(200))
        .with_start_delay(Duration::from_secs(2));
    let polling = tokio::spawn(poller.run(CancellationToken::new()));

    sync.apply(Parameter::Focus, focus(0.5), UpdateSource::Event);

    assert_eq!(polling.await.unwrap(), PollingExit::EventsActive);
    assert_eq!(camera.reads(), 0);
}

// =============================================================================
// Connection status
// =============================================================================

#[tokio::test]
async fn test_status_is_independent_of_events_active() {
    let sync = Arc::new(ParameterSynchronizer::new());
    let mut status = sync.subscribe_status();
    let (tx, rx) = mpsc::channel(16);
    let pump = tokio::spawn(sync.clone().run_event_pump(rx));

    tx.send(TransportEvent::Status(ConnectionStatus::Connecting)).await.unwrap();
    tx.send(TransportEvent::Status(ConnectionStatus::Connected)).await.unwrap();
    tx.send(TransportEvent::Status(ConnectionStatus::Disconnected {
        reason: "connection reset".into(),
    }))
    .await
    .unwrap();
    drop(tx);
    pump.await.unwrap();

    let seen: Vec<StatusChange> = std::iter::from_fn(|| status.try_recv().ok()).collect();
    assert_eq!(
        seen,
        vec![
            StatusChange {
                connected: false,
                message: "connecting".into()
            },
            StatusChange {
                connected: true,
                message: "connected".into()
            },
            StatusChange {
                connected: false,
                message: "disconnected: connection reset".into()
            },
        ]
    );
    assert!(!sync.events_active());
    assert!(sync.snapshot().is_empty());
}

// =============================================================================
// Observers
// =============================================================================

#[tokio::test]
async fn test_observers_receive_duplicates_in_order() {
    let sync = ParameterSynchronizer::new();
    let mut first = sync.subscribe();
    let mut second = sync.subscribe();

    sync.apply(Parameter::Focus, focus(0.4), UpdateSource::Poll);
    sync.apply(Parameter::Focus, focus(0.4), UpdateSource::Event);
    sync.apply(Parameter::Focus, focus(0.6), UpdateSource::Event);

    for rx in [&mut first, &mut second] {
        let values: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|change| (change.name, change.value, change.source))
            .collect();
        assert_eq!(
            values,
            vec![
                ("focus", serde_json::json!({"normalised": 0.4}), UpdateSource::Poll),
                ("focus", serde_json::json!({"normalised": 0.4}), UpdateSource::Event),
                ("focus", serde_json::json!({"normalised": 0.6}), UpdateSource::Event),
            ]
        );
    }
}
