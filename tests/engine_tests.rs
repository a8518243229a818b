//! End-to-end engine behavior against the in-memory protocol.
//!
//! Timings are shrunk so a full transition takes tens of milliseconds. Every
//! check polls with a generous deadline instead of sleeping a fixed amount.

use std::time::{Duration, Instant};

use nightlight::GammaEngine;
use nightlight::config::{EngineTiming, GammaConfig};
use nightlight::logger::Log;
use nightlight::testing::{FakeHandle, FakeProtocol, StaticLocation, ramp_bytes};

const DEADLINE: Duration = Duration::from_secs(5);

fn fast_timing() -> EngineTiming {
    EngineTiming {
        transition_duration: Duration::from_millis(60),
        transition_steps: 6,
        trigger_debounce: Duration::from_millis(5),
        notify_debounce: Duration::from_millis(5),
        retry_base: Duration::from_millis(10),
        max_backoff_doublings: 2,
        max_retries: 3,
        actor_queue_capacity: 256,
        dispatch_interval: Duration::from_millis(2),
    }
}

/// Enabled, no location source: the engine holds the night temperature.
fn night_config(low: u32, high: u32) -> GammaConfig {
    GammaConfig {
        low_temp: low,
        high_temp: high,
        enabled: true,
        ..Default::default()
    }
}

fn start(protocol: FakeProtocol, config: GammaConfig, timing: EngineTiming) -> GammaEngine {
    Log::set_enabled(false);
    GammaEngine::new(
        Box::new(protocol),
        config,
        Box::new(StaticLocation::unavailable()),
        timing,
    )
    .unwrap()
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + DEADLINE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn wait_for_temp(engine: &GammaEngine, temp: u32) {
    wait_until(&format!("current temperature {temp}K"), || {
        engine.get_state().current_temp == temp
    });
}

fn uploads_since(handle: &FakeHandle, mark: usize) -> Vec<Vec<u8>> {
    handle.uploads()[mark..]
        .iter()
        .map(|u| u.bytes.clone())
        .collect()
}

#[test]
fn test_startup_applies_night_temperature() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());

    wait_for_temp(&engine, 3000);
    wait_until("first scheduling pass", || {
        engine.get_state().next_transition.is_some()
    });
    assert_eq!(handle.live_controls(), vec![1]);
    assert_eq!(handle.last_upload(1), Some(ramp_bytes(3000, 1.0)));

    let state = engine.get_state();
    assert!(state.config.enabled);
    assert!(!state.is_day);
}

#[test]
fn test_disabled_start_creates_no_controls() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let config = GammaConfig {
        enabled: false,
        ..night_config(3000, 6500)
    };
    let engine = start(protocol, config, fast_timing());

    wait_until("first scheduling pass", || {
        engine.get_state().next_transition.is_some()
    });
    std::thread::sleep(Duration::from_millis(30));
    assert!(handle.live_controls().is_empty());
    assert_eq!(handle.upload_count(), 0);
    assert_eq!(engine.get_state().current_temp, 6500);
}

#[test]
fn test_enable_after_disabled_start() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let config = GammaConfig {
        enabled: false,
        ..night_config(3000, 6500)
    };
    let engine = start(protocol, config, fast_timing());

    engine.set_enabled(true).unwrap();
    wait_for_temp(&engine, 3000);
    assert_eq!(handle.live_controls(), vec![1]);
}

#[test]
fn test_disable_when_settled_at_day_releases_immediately() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(6500, 6500), fast_timing());

    wait_until("initial upload", || handle.upload_count() > 0);
    wait_until("first scheduling pass", || {
        engine.get_state().next_transition.is_some()
    });
    let uploads = handle.upload_count();

    engine.set_enabled(false).unwrap();
    wait_until("controls released", || handle.live_controls().is_empty());

    assert_eq!(handle.upload_count(), uploads, "no fade when already at day");
    assert!(handle.syncs() >= 1);
    assert_eq!(engine.get_state().current_temp, 6500);
}

#[test]
fn test_disable_fades_to_day_then_releases() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);
    let mark = handle.upload_count();

    engine.set_enabled(false).unwrap();
    wait_until("controls released", || handle.live_controls().is_empty());
    wait_for_temp(&engine, 6500);

    let faded = uploads_since(&handle, mark);
    assert!(faded.len() > 1, "expected intermediate frames, got {}", faded.len());
    assert_eq!(faded.last(), Some(&ramp_bytes(6500, 1.0)));
    assert!(!engine.get_state().config.enabled);
}

#[test]
fn test_day_temperature_change_during_disable_fade_still_releases() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let timing = EngineTiming {
        transition_duration: Duration::from_millis(400),
        transition_steps: 40,
        ..fast_timing()
    };
    let engine = start(protocol, night_config(3000, 6500), timing);
    wait_for_temp(&engine, 3000);

    engine.set_enabled(false).unwrap();
    wait_until("disable fade underway", || {
        engine.get_state().current_temp > 3000
    });
    engine.set_temperature(3000, 6000).unwrap();

    wait_until("controls released", || handle.live_controls().is_empty());
    assert_eq!(handle.last_upload(1), Some(ramp_bytes(6000, 1.0)));
    assert_eq!(engine.get_state().current_temp, 6000);
    assert!(!engine.get_state().config.enabled);
}

#[test]
fn test_reenable_after_disable_recreates_controls() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    engine.set_enabled(false).unwrap();
    wait_until("controls released", || handle.live_controls().is_empty());

    engine.set_enabled(true).unwrap();
    wait_until("controls recreated", || handle.live_controls() == vec![1]);
    wait_for_temp(&engine, 3000);
    assert_eq!(handle.control_creations(1), 2);
}

#[test]
fn test_new_target_supersedes_running_transition() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let timing = EngineTiming {
        transition_duration: Duration::from_millis(400),
        transition_steps: 40,
        ..fast_timing()
    };
    let engine = start(protocol, night_config(6000, 6500), timing);
    wait_for_temp(&engine, 6000);

    engine.set_temperature(2000, 6500).unwrap();
    wait_until("first transition underway", || {
        let temp = engine.get_state().current_temp;
        temp < 6000 && temp > 2000
    });

    let mark = handle.upload_count();
    engine.set_temperature(5000, 6500).unwrap();
    wait_for_temp(&engine, 5000);
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(engine.get_state().current_temp, 5000);
    let stale = ramp_bytes(2000, 1.0);
    assert!(
        uploads_since(&handle, mark).iter().all(|bytes| *bytes != stale),
        "the superseded target must never be applied"
    );
    assert_eq!(handle.last_upload(1), Some(ramp_bytes(5000, 1.0)));
}

#[test]
fn test_gamma_change_reapplies_settled_temperature() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    engine.set_gamma(0.8).unwrap();
    wait_until("re-upload with new gamma", || {
        handle.last_upload(1) == Some(ramp_bytes(3000, 0.8))
    });
}

#[test]
fn test_failed_control_is_recreated_after_backoff() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    handle.fail_next_controls(1, 2);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());

    wait_for_temp(&engine, 3000);
    assert_eq!(handle.control_creations(1), 3);
    assert_eq!(handle.live_controls(), vec![1]);
}

#[test]
fn test_output_abandoned_after_retry_ceiling() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    handle.fail_next_controls(1, 100);
    let _engine = start(protocol, night_config(3000, 6500), fast_timing());

    wait_until("retries exhausted", || handle.control_creations(1) >= 3);
    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(handle.control_creations(1), 3);
    assert!(handle.live_controls().is_empty());
    assert_eq!(handle.upload_count(), 0);
}

#[test]
fn test_abandoned_output_does_not_block_healthy_ones() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1", "DP-2"]);
    handle.fail_next_controls(2, 100);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());

    wait_for_temp(&engine, 3000);
    wait_until("retries on DP-2 exhausted", || handle.control_creations(2) >= 3);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(handle.control_creations(2), 3);
    assert_eq!(handle.live_controls(), vec![1]);

    engine.set_temperature(2500, 6500).unwrap();
    wait_for_temp(&engine, 2500);
    assert_eq!(handle.last_upload(1), Some(ramp_bytes(2500, 1.0)));
    assert_eq!(handle.last_upload(2), None);
}

#[test]
fn test_late_gamma_size_applies_current_target() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    handle.withhold_sizes(true);
    let second = handle.add_output("DP-2");
    wait_until("control requested for DP-2", || {
        handle.live_controls() == vec![1, second]
    });

    engine.set_temperature(2500, 6500).unwrap();
    wait_until("scheduler saw the new config", || {
        engine.get_state().config.low_temp == 2500
    });
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(handle.last_upload(1), Some(ramp_bytes(3000, 1.0)));
    assert_eq!(handle.last_upload(second), None);

    handle.withhold_sizes(false);
    wait_until("both outputs at the new target", || {
        handle.last_upload(second) == Some(ramp_bytes(2500, 1.0))
            && handle.last_upload(1) == Some(ramp_bytes(2500, 1.0))
    });
    assert_eq!(engine.get_state().current_temp, 2500);
}

#[test]
fn test_control_failure_while_running_recovers() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    handle.fail_control(1);
    wait_until("control recreated", || handle.control_creations(1) == 2);
    wait_until("night table re-uploaded", || {
        handle.live_controls() == vec![1] && handle.last_upload(1) == Some(ramp_bytes(3000, 1.0))
    });
}

#[test]
fn test_upload_failure_enters_backoff() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(6000, 6500), fast_timing());
    wait_for_temp(&engine, 6000);

    handle.set_upload_failure(1, true);
    engine.set_temperature(3000, 6500).unwrap();
    wait_until("control recreated after upload failure", || {
        handle.control_creations(1) >= 2
    });

    handle.set_upload_failure(1, false);
    wait_until("night table uploaded", || {
        handle.last_upload(1) == Some(ramp_bytes(3000, 1.0))
    });
}

#[test]
fn test_hotplug_add_and_remove() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    let second = handle.add_output("DP-2");
    wait_until("new output receives the current table", || {
        handle.last_upload(second) == Some(ramp_bytes(3000, 1.0))
    });

    handle.remove_output(1);
    wait_until("removed output released", || {
        handle.live_controls() == vec![second]
    });

    handle.remove_output(second);
    wait_until("all outputs released", || handle.live_controls().is_empty());

    let third = handle.add_output("eDP-1");
    wait_until("controls rebuilt from scratch", || {
        handle.last_upload(third) == Some(ramp_bytes(3000, 1.0))
    });
}

#[test]
fn test_headless_outputs_get_no_control() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1", "HEADLESS-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(handle.live_controls(), vec![1]);
    assert_eq!(handle.control_creations(2), 0);
}

#[test]
fn test_virtual_only_outputs_fail_startup() {
    Log::set_enabled(false);
    let (protocol, handle) = FakeProtocol::with_outputs(&["HEADLESS-1", "HEADLESS-2"]);
    let err = GammaEngine::new(
        Box::new(protocol),
        night_config(3000, 6500),
        Box::new(StaticLocation::unavailable()),
        fast_timing(),
    )
    .err()
    .unwrap();

    assert!(err.to_string().contains("No physical outputs"));
    assert!(handle.is_shut_down());
}

#[test]
fn test_invalid_config_rejected_at_startup() {
    Log::set_enabled(false);
    let (protocol, _handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let result = GammaEngine::new(
        Box::new(protocol),
        night_config(7000, 6500),
        Box::new(StaticLocation::unavailable()),
        fast_timing(),
    );
    assert!(result.is_err());
}

#[test]
fn test_rejected_setter_keeps_previous_config() {
    let (protocol, _handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());

    assert!(engine.set_temperature(7000, 6500).is_err());
    assert!(engine.set_gamma(15.0).is_err());
    assert!(engine.set_location(12.0, 200.0).is_err());

    let config = engine.config();
    assert_eq!((config.low_temp, config.high_temp), (3000, 6500));
    assert_eq!(config.gamma, 1.0);
    assert_eq!(config.latitude, None);
}

#[test]
fn test_location_failure_holds_day_temperature() {
    Log::set_enabled(false);
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let config = GammaConfig {
        use_ip_location: true,
        ..night_config(3000, 6500)
    };
    let engine = GammaEngine::new(
        Box::new(protocol),
        config,
        Box::new(StaticLocation::unavailable()),
        fast_timing(),
    )
    .unwrap();

    wait_until("initial upload", || handle.upload_count() > 0);
    wait_until("first scheduling pass", || {
        engine.get_state().next_transition.is_some()
    });
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.get_state().current_temp, 6500);
    assert_eq!(engine.get_state().sunrise_time, None);
}

#[test]
fn test_subscribers_see_changes_and_shutdown() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    wait_for_temp(&engine, 3000);

    let (current, subscription) = engine.subscribe();
    assert_eq!(current.current_temp, 3000);

    engine.set_temperature(2500, 6500).unwrap();
    let deadline = Instant::now() + DEADLINE;
    loop {
        let snapshot = subscription
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("snapshot before deadline");
        if snapshot.current_temp == 2500 {
            assert_eq!(snapshot.config.low_temp, 2500);
            break;
        }
    }

    engine.close();
    assert!(handle.is_shut_down());
    assert!(handle.live_controls().is_empty());
    while subscription.try_recv().is_ok() {}
    assert!(subscription.recv().is_none());
}

#[test]
fn test_close_is_idempotent() {
    let (protocol, handle) = FakeProtocol::with_outputs(&["DP-1"]);
    let engine = start(protocol, night_config(3000, 6500), fast_timing());
    engine.close();
    engine.close();
    assert!(handle.is_shut_down());
    drop(engine);
}
