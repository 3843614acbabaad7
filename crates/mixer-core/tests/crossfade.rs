mod common;

use common::mock_channel::{approx, settings, Call, MockChannel, Rig, Start};
use mixer_core::{RejectReason, TransitionOutcome};
use mixer_proto::config::BusyPolicy;
use mixer_proto::protocol::FadeKind;

/// Channel 0 playing at full gain, no fade.
async fn rig_with_active_zero(n: usize) -> Rig {
    let mut rig = Rig::with_channels(n).await;
    assert_eq!(
        rig.engine.request_transition(0, 1.0).await,
        TransitionOutcome::Adjusted
    );
    assert_eq!(rig.engine.gain(0), 1.0);
    rig
}

#[tokio::test]
async fn crossfade_halfway_and_complete() {
    let mut rig = rig_with_active_zero(2).await;

    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Started
    );
    assert!(rig.engine.state().is_fading());

    rig.advance_and_tick(1000).await;
    assert!(approx(rig.engine.gain(0), 0.5));
    assert!(approx(rig.engine.gain(1), 0.5));
    assert_eq!(rig.engine.state().active, 0);

    rig.advance_and_tick(1000).await;
    assert_eq!(rig.engine.gain(0), 0.0);
    assert_eq!(rig.engine.gain(1), 1.0);
    assert_eq!(rig.engine.state().active, 1);
    assert!(rig.engine.state().fade.is_none());

    let ch0 = rig.engine.registry().get(0).unwrap();
    assert!(!ch0.is_playing());
    assert!(rig.calls(0).contains(&Call::Pause));
}

#[tokio::test]
async fn second_request_during_fade_is_dropped() {
    let mut rig = rig_with_active_zero(3).await;
    rig.clear_calls();

    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Started
    );
    assert_eq!(
        rig.engine.request_transition(2, 1.0).await,
        TransitionOutcome::Rejected(RejectReason::FadeInProgress)
    );

    rig.advance_and_tick(2000).await;
    assert_eq!(rig.engine.state().active, 1);
    assert!(rig.calls(2).is_empty());
    assert_eq!(rig.engine.gain(2), 0.0);
}

#[tokio::test]
async fn rejected_requests_leave_no_trace() {
    let mut rig = rig_with_active_zero(3).await;
    rig.engine.request_transition(1, 1.0).await;
    rig.advance_and_tick(500).await;

    let before = rig.engine.state().clone();
    let gains = rig.gains();
    let calls: Vec<_> = (0..3).map(|i| rig.calls(i)).collect();

    for target in [0, 1, 2, 2, 0] {
        assert_eq!(
            rig.engine.request_transition(target, 0.3).await,
            TransitionOutcome::Rejected(RejectReason::FadeInProgress)
        );
    }

    assert_eq!(rig.engine.state(), &before);
    assert_eq!(rig.gains(), gains);
    for i in 0..3 {
        assert_eq!(rig.calls(i), calls[i]);
    }
}

#[tokio::test]
async fn every_channel_can_become_active() {
    let mut rig = rig_with_active_zero(4).await;
    for target in [3, 1, 2, 0] {
        assert_eq!(
            rig.engine.request_transition(target, 0.8).await,
            TransitionOutcome::Started
        );
        rig.advance_and_tick(2000).await;
        assert_eq!(rig.engine.state().active, target);
        assert!(rig.engine.state().fade.is_none());
        assert!(approx(rig.engine.gain(target), 0.8));
        let audible = rig.gains().iter().filter(|g| **g > 1e-4).count();
        assert_eq!(audible, 1);
    }
}

#[tokio::test]
async fn gains_sum_to_target_on_every_tick() {
    let mut rig = rig_with_active_zero(2).await;
    rig.engine.request_transition(0, 0.6).await;
    rig.engine.request_transition(1, 0.6).await;

    for _ in 0..37 {
        rig.advance_and_tick(57).await;
        let g = rig.gains();
        let sum = g[0] + g[1];
        assert!((sum - 0.6).abs() < 1e-5, "sum {sum} at {:?}", g);
        assert!(g.iter().all(|x| *x <= 0.6 + 1e-6));
    }
}

#[tokio::test]
async fn dropped_frames_do_not_stretch_the_fade() {
    let mut rig = rig_with_active_zero(2).await;
    rig.engine.request_transition(1, 1.0).await;

    // One late frame well past the fade length completes it outright.
    rig.advance_and_tick(5000).await;
    assert_eq!(rig.engine.state().active, 1);
    assert_eq!(rig.engine.gain(1), 1.0);
}

#[tokio::test]
async fn same_channel_changes_volume_directly() {
    let mut rig = rig_with_active_zero(2).await;
    rig.clear_calls();

    assert_eq!(
        rig.engine.request_transition(0, 0.4).await,
        TransitionOutcome::Adjusted
    );
    assert!(approx(rig.engine.gain(0), 0.4));
    assert!(rig.engine.state().fade.is_none());
    assert_eq!(rig.calls(0), vec![Call::SetGain(0.4)]);
}

#[tokio::test]
async fn out_of_range_is_rejected() {
    let mut rig = Rig::with_channels(2).await;
    assert_eq!(
        rig.engine.request_transition(7, 1.0).await,
        TransitionOutcome::Rejected(RejectReason::OutOfRange)
    );
    assert_eq!(rig.engine.state().active, 0);
}

#[tokio::test]
async fn levels_are_clamped_and_stepped() {
    let mut s = settings();
    s.gain_steps = 4;
    let mut rig = Rig::new(vec![MockChannel::new(40.0), MockChannel::new(40.0)], s).await;

    rig.engine.request_transition(0, 0.6).await;
    assert_eq!(rig.engine.gain(0), 0.5);
    rig.engine.request_transition(0, 7.0).await;
    assert_eq!(rig.engine.gain(0), 1.0);
    rig.engine.request_transition(0, f32::NAN).await;
    assert_eq!(rig.engine.gain(0), 0.0);
}

#[tokio::test]
async fn zero_length_fade_switches_on_next_tick() {
    let mut s = settings();
    s.fade_duration = std::time::Duration::ZERO;
    let mut rig = Rig::new(vec![MockChannel::new(40.0), MockChannel::new(40.0)], s).await;
    rig.engine.request_transition(0, 1.0).await;

    rig.engine.request_transition(1, 1.0).await;
    rig.engine.tick().await;
    assert_eq!(rig.engine.state().active, 1);
    assert_eq!(rig.gains(), vec![0.0, 1.0]);
}

#[tokio::test]
async fn latest_policy_replays_last_request() {
    let mut s = settings();
    s.busy_policy = BusyPolicy::Latest;
    let channels = (0..3).map(|_| MockChannel::new(40.0)).collect();
    let mut rig = Rig::new(channels, s).await;
    rig.engine.request_transition(0, 1.0).await;

    rig.engine.request_transition(1, 1.0).await;
    assert_eq!(
        rig.engine.request_transition(0, 1.0).await,
        TransitionOutcome::Queued
    );
    assert_eq!(
        rig.engine.request_transition(2, 0.5).await,
        TransitionOutcome::Queued
    );

    // Completion of 0 → 1 immediately starts 1 → 2.
    rig.advance_and_tick(2000).await;
    let fade = rig.engine.state().fade.expect("queued fade running");
    assert_eq!((fade.from, fade.to), (Some(1), 2));
    assert_eq!(fade.target_gain, 0.5);

    rig.advance_and_tick(2000).await;
    assert_eq!(rig.engine.state().active, 2);
    assert!(approx(rig.engine.gain(2), 0.5));
}

#[tokio::test]
async fn blocked_playback_abandons_transition() {
    let channels = vec![
        MockChannel::new(40.0),
        MockChannel::new(40.0).with_start(Start::Fail),
    ];
    let mut rig = Rig::new(channels, settings()).await;
    rig.engine.request_transition(0, 1.0).await;

    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Abandoned
    );
    assert_eq!(rig.engine.state().active, 0);
    assert!(rig.engine.state().fade.is_none());
    assert_eq!(rig.gains(), vec![1.0, 0.0]);
    assert!(!rig.engine.registry().get(1).unwrap().is_playing());
}

#[tokio::test]
async fn abandoned_transition_keeps_muted_channel_playing() {
    let channels = vec![
        MockChannel::new(40.0),
        MockChannel::new(40.0).with_start(Start::Fail),
    ];
    let mut rig = Rig::new(channels, settings()).await;
    rig.engine.request_transition(0, 0.5).await;
    rig.engine.request_transition(0, 0.0).await;
    assert!(rig.engine.registry().get(0).unwrap().is_playing());
    rig.clear_calls();

    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Abandoned
    );
    assert_eq!(rig.engine.state().active, 0);
    assert!(rig.engine.registry().get(0).unwrap().is_playing());
    assert!(!rig.calls(0).contains(&Call::Pause));
}

#[tokio::test]
async fn readiness_timeout_abandons_transition() {
    let channels = vec![
        MockChannel::new(40.0),
        MockChannel::new(40.0).with_start(Start::Hang),
    ];
    let mut rig = Rig::new(channels, settings()).await;
    rig.engine.request_transition(0, 1.0).await;

    assert_eq!(
        rig.engine.request_transition(1, 1.0).await,
        TransitionOutcome::Abandoned
    );
    assert_eq!(rig.engine.state().active, 0);
    assert!(rig.calls(1).contains(&Call::Pause));

    // The next request is accepted again.
    assert_eq!(
        rig.engine.request_transition(0, 0.5).await,
        TransitionOutcome::Adjusted
    );
}

#[tokio::test]
async fn silent_outgoing_channel_is_not_faded_up() {
    let mut rig = rig_with_active_zero(2).await;
    rig.engine.request_transition(0, 0.0).await;

    rig.engine.request_transition(1, 1.0).await;
    let fade = rig.engine.state().fade.unwrap();
    assert_eq!(fade.from, None);
    assert_eq!(fade.kind, FadeKind::Crossfade);
    assert!(!rig.engine.registry().get(0).unwrap().is_playing());

    rig.advance_and_tick(1000).await;
    assert_eq!(rig.engine.gain(0), 0.0);
    assert!(approx(rig.engine.gain(1), 0.5));
}

#[tokio::test]
async fn tap_cycles_active_level_and_selects_others() {
    let mut rig = Rig::with_channels(2).await;

    // Silence is the last tap level, so the first tap wraps to the first one.
    rig.engine.tap(0).await;
    assert_eq!(rig.engine.gain(0), 0.25);
    rig.engine.tap(0).await;
    assert_eq!(rig.engine.gain(0), 0.5);

    assert_eq!(rig.engine.tap(1).await, TransitionOutcome::Started);
    assert_eq!(rig.engine.state().fade.unwrap().target_gain, 1.0);
}

#[tokio::test]
async fn outgoing_position_snaps_to_incoming() {
    let mut rig = rig_with_active_zero(2).await;
    rig.clock.advance_ms(3_000);
    rig.engine.request_transition(1, 1.0).await;
    rig.advance_and_tick(2000).await;

    let p0 = rig.engine.registry().get(0).unwrap().position();
    let p1 = rig.engine.registry().get(1).unwrap().position();
    assert!((p0 - p1).abs() < 1e-9);
}
