/*!
 * Timer Service Tests
 */

use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use tcs_ipc::{Event, IpcConfig, IpcContext, LocalKernel, PulseCode, Status, TimeSpec};

fn timed_pulse(ctx: &IpcContext, timeout: Duration) -> Option<i32> {
    match ctx.receive(Some(timeout)) {
        Ok((
            Event::Pulse {
                code: PulseCode::Timed,
                sender_value,
            },
            _,
        )) => Some(sender_value),
        Ok(other) => panic!("unexpected event {:?}", other),
        Err(e) if e.is_timeout() => None,
        Err(e) => panic!("receive failed: {}", e),
    }
}

#[test]
fn test_periodic_timer_cadence() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "heartbeat", IpcConfig::default());

    let start = Instant::now();
    let timer = ctx
        .create_timed_pulse(TimeSpec::from_millis(100), TimeSpec::from_millis(100))
        .expect("timer");
    let window = Duration::from_millis(1050);

    let mut pulses = 0;
    while let Some(left) = window.checked_sub(start.elapsed()) {
        match timed_pulse(&ctx, left) {
            Some(value) => {
                assert_eq!(value, timer.connection().as_pulse_value());
                pulses += 1;
            }
            None => break,
        }
    }
    assert!(pulses >= 9, "only {} pulses in {:?}", pulses, window);
    timer.cancel().expect("cancel");
}

#[test]
fn test_one_shot_fires_once() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "oneshot", IpcConfig::default());
    let timer = ctx
        .create_timed_pulse(TimeSpec::from_millis(20), TimeSpec::ZERO)
        .expect("timer");

    assert!(timed_pulse(&ctx, Duration::from_secs(1)).is_some());
    assert_eq!(timed_pulse(&ctx, Duration::from_millis(150)), None);
    assert_eq!(timer.interval(), TimeSpec::ZERO);
}

#[test]
fn test_cancel_stops_pulses() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "cancel", IpcConfig::default());
    let timer = ctx
        .create_timed_pulse(TimeSpec::from_millis(10), TimeSpec::from_millis(10))
        .expect("timer");

    assert!(timed_pulse(&ctx, Duration::from_secs(1)).is_some());
    timer.cancel().expect("cancel");

    // Drain whatever fired before the cancel landed
    while timed_pulse(&ctx, Duration::ZERO).is_some() {}
    assert_eq!(timed_pulse(&ctx, Duration::from_millis(60)), None);
}

#[test]
fn test_zero_delay_stays_disarmed_until_rearmed() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "rearm", IpcConfig::default());
    let mut timer = ctx
        .create_timed_pulse(TimeSpec::ZERO, TimeSpec::ZERO)
        .expect("timer");

    assert_eq!(timed_pulse(&ctx, Duration::from_millis(60)), None);
    assert_eq!(ctx.stats().timers_armed, 0);

    ctx.rearm(&mut timer, TimeSpec::from_millis(10), TimeSpec::ZERO)
        .expect("rearm");
    assert_eq!(timer.delay(), TimeSpec::from_millis(10));
    assert_eq!(
        timed_pulse(&ctx, Duration::from_secs(1)),
        Some(timer.connection().as_pulse_value())
    );
    assert_eq!(ctx.stats().timers_armed, 1);
}

#[test]
fn test_duration_converts_to_timespec() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "duration", IpcConfig::default());
    let timer = ctx
        .create_timed_pulse(Duration::from_millis(1500), Duration::ZERO)
        .expect("timer");
    assert_eq!(timer.delay(), TimeSpec::new(1, 500_000_000));
}

#[test]
fn test_timer_needs_live_process() {
    let kernel = LocalKernel::with_defaults();
    let ctx = IpcContext::spawn(&kernel, "gone", IpcConfig::default());
    kernel.terminate(ctx.pid()).expect("terminate");

    let err = ctx
        .create_timed_pulse(TimeSpec::from_millis(10), TimeSpec::ZERO)
        .expect_err("dead process");
    assert!(matches!(err, Status::NoTimer(_)));
}
