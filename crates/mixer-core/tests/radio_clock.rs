mod common;

use common::mock_channel::{settings, MockChannel, Metadata, Rig};
use mixer_core::{Clock, TransitionOutcome};
use std::time::{Duration, Instant};

#[tokio::test]
async fn late_entry_seeks_to_broadcast_position() {
    let mut rig = Rig::with_channels(2).await;

    rig.clock.advance(Duration::from_secs(95));
    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Started
    );
    assert_eq!(rig.seeks(1), vec![15.0]);
    assert_eq!(rig.engine.registry().get(1).unwrap().duration(), Some(40.0));
}

#[tokio::test]
async fn channels_of_equal_length_join_in_phase() {
    let mut rig = Rig::with_channels(3).await;

    rig.clock.advance(Duration::from_secs(12));
    rig.engine.request_transition(1, 1.0).await;
    rig.advance_and_tick(2000).await;

    // Channel 1 entered at 12 s and has kept running; 2 joins at 21 s.
    rig.advance_and_tick(7000).await;
    rig.engine.request_transition(2, 1.0).await;

    assert_eq!(rig.seeks(1), vec![12.0]);
    assert_eq!(rig.seeks(2), vec![21.0]);
    let p1 = rig.engine.registry().get(1).unwrap().position();
    assert!((p1 - 21.0).abs() < 1e-9);
}

#[tokio::test]
async fn compute_offset_is_pure() {
    let mut rig = Rig::with_channels(2).await;
    let registry = rig.engine.registry();
    let t = rig.clock.now() + Duration::from_secs(50);

    // Unknown duration: offset 0, however often asked.
    assert_eq!(registry.compute_offset(1, t), 0.0);
    assert_eq!(registry.compute_offset(1, t), 0.0);

    rig.engine.request_transition(1, 1.0).await;
    let registry = rig.engine.registry();
    let first = registry.compute_offset(1, t);
    let second = registry.compute_offset(1, t);
    assert_eq!(first, 10.0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn hanging_metadata_degrades_to_offset_zero() {
    let channels = vec![
        MockChannel::new(40.0),
        MockChannel::new(40.0).with_metadata(Metadata::Hang),
    ];
    let mut rig = Rig::new(channels, settings()).await;
    rig.clock.advance(Duration::from_secs(95));

    let started = Instant::now();
    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Started
    );
    assert_eq!(rig.seeks(1), vec![0.0]);
    assert_eq!(rig.engine.registry().get(1).unwrap().duration(), None);

    // Back to 0, then 1 again: the second lookup does not wait out the timeout.
    rig.advance_and_tick(2000).await;
    rig.engine.request_transition(0, 1.0).await;
    rig.advance_and_tick(2000).await;
    let second_attempt = Instant::now();
    rig.engine.request_transition(1, 1.0).await;
    assert!(second_attempt.elapsed() < Duration::from_millis(50));
    assert_eq!(rig.seeks(1), vec![0.0, 0.0]);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn live_source_without_duration_starts_at_zero() {
    let channels = vec![
        MockChannel::new(40.0),
        MockChannel::new(40.0).with_metadata(Metadata::Missing),
    ];
    let mut rig = Rig::new(channels, settings()).await;
    rig.clock.advance(Duration::from_secs(33));

    rig.engine.request_transition(1, 1.0).await;
    assert_eq!(rig.seeks(1), vec![0.0]);
}
