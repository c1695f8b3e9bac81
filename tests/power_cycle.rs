//! Wake window / deep sleep behaviour of the whole system on the simulated
//! board. Timer time only moves when a test advances it.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{boot, eventually, short_window};
use pingzee::config::PIN_LIS3DH_INT;
use pingzee::drivers::timer_bank::{ticks_for_secs, TimerChannel};
use pingzee::platform::WakeLevel;
use pingzee::power::WakeActivity;
use pingzee::tasks::app::{AppCmd, AppMsg};

const WAIT: Duration = Duration::from_secs(2);

fn watchdog_unit() -> pingzee::platform::TimerUnit {
    TimerChannel::from_index(short_window().power.watchdog_channel).unit()
}

#[test]
fn idle_window_ends_in_deep_sleep() {
    let rig = boot(short_window());
    rig.sys.start_main_loop();
    assert!(rig.timers.is_running(watchdog_unit()));
    assert!(rig.sys.watchdog_armed.load(Ordering::SeqCst));

    rig.timers.advance(ticks_for_secs(1));
    assert!(rig.sleep.wait_for_sleep(WAIT), "device stayed awake");

    let record = rig.sleep.record();
    assert_eq!(record.timer_wakeup_secs, Some(7));
    assert_eq!(record.ext_wakeup, Some((1u64 << PIN_LIS3DH_INT, WakeLevel::AnyHigh)));
    assert!(record.sleep_entry.is_some());
    assert_eq!(record.entered, 1);
    assert!(!rig.timers.is_running(watchdog_unit()));
}

#[test]
fn window_is_not_over_before_the_alarm() {
    let rig = boot(short_window());
    rig.sys.start_main_loop();
    rig.timers.advance(ticks_for_secs(1) - 1);
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(200)));
    assert_eq!(rig.sys.power.activity(), WakeActivity::Nothing);
}

#[test]
fn accelerometer_interrupt_keeps_the_device_awake() {
    let rig = boot(short_window());
    rig.sys.start_main_loop();

    assert!(rig.irq.is_enabled());
    assert!(rig.irq.fire());
    assert!(eventually(WAIT, || {
        rig.sys.power.activity() == WakeActivity::ExternalEventResponded
    }));
    // The app task cleared the latched source and armed the line again.
    assert!(eventually(WAIT, || rig.irq.is_enabled()));
    assert_eq!(rig.irq.enable_count(), 2);

    rig.timers.advance(ticks_for_secs(1));
    assert!(eventually(WAIT, || !rig.sys.watchdog_armed.load(Ordering::SeqCst)));
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(200)));
    assert!(!rig.timers.is_running(watchdog_unit()));
}

#[test]
fn stop_command_keeps_the_device_awake_until_restarted() {
    let rig = boot(short_window());
    rig.sys.start_main_loop();
    rig.sys.stop_main_loop();
    assert_eq!(rig.sys.power.activity(), WakeActivity::ManuallyStopped);

    rig.timers.advance(ticks_for_secs(1));
    assert!(eventually(WAIT, || !rig.sys.watchdog_armed.load(Ordering::SeqCst)));
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(200)));

    // A new window starts from scratch and, left alone, ends in sleep.
    rig.sys.start_main_loop();
    assert_eq!(rig.sys.power.activity(), WakeActivity::Nothing);
    rig.timers.advance(ticks_for_secs(1));
    assert!(rig.sleep.wait_for_sleep(WAIT));
}

#[test]
fn explicit_sleep_request_programs_the_given_duration() {
    let rig = boot(short_window());
    rig.sys.enter_deep_sleep(42);
    assert!(rig.sleep.wait_for_sleep(WAIT));
    assert_eq!(rig.sleep.record().timer_wakeup_secs, Some(42));
}

#[test]
fn restart_moves_the_end_of_the_window() {
    let rig = boot(short_window());
    let half = ticks_for_secs(1) / 2;
    rig.sys.start_main_loop();
    rig.timers.advance(half);
    rig.sys.start_main_loop();
    assert!(rig.sys.watchdog_armed.load(Ordering::SeqCst));

    // The first window would have ended here.
    rig.timers.advance(half);
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(200)));
    rig.timers.advance(half);
    assert!(rig.sleep.wait_for_sleep(WAIT), "restarted window never ended");
    assert_eq!(rig.sleep.record().entered, 1);
}

#[test]
fn restart_late_in_the_window_still_ends_in_deep_sleep() {
    // Grace shorter than the restart offset: the watchdog's first deadline
    // passes before the restarted window ends.
    let mut config = short_window();
    config.power.watchdog_grace = Duration::from_millis(500);
    let rig = boot(config);
    rig.timers.spawn_clock(Duration::from_millis(10)).expect("clock");

    rig.sys.start_main_loop();
    std::thread::sleep(Duration::from_millis(700));
    rig.sys.start_main_loop();

    assert!(rig.sleep.wait_for_sleep(Duration::from_secs(5)), "idle device stayed awake");
    assert_eq!(rig.sleep.record().timer_wakeup_secs, Some(7));
}

#[test]
fn report_for_a_superseded_window_is_ignored() {
    let rig = boot(short_window());
    rig.sys.start_main_loop();
    let first = rig.sys.power.window();
    rig.sys.start_main_loop();
    assert_eq!(rig.sys.power.window(), first + 1);

    rig.sys
        .app
        .transaction(AppMsg::new(AppCmd::WindowElapsed { window: first }));
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(200)));
    assert!(rig.timers.is_running(watchdog_unit()));
    assert!(rig.sys.watchdog_armed.load(Ordering::SeqCst));

    rig.timers.advance(ticks_for_secs(1));
    assert!(rig.sleep.wait_for_sleep(WAIT));
}

#[test]
fn silent_channel_is_stopped_when_the_watchdog_expires() {
    let mut config = short_window();
    config.power.watchdog_grace = Duration::from_millis(50);
    let rig = boot(config);
    rig.sys.start_main_loop();

    // No timer time passes, so the alarm never comes.
    assert!(eventually(Duration::from_secs(3), || {
        !rig.sys.watchdog_armed.load(Ordering::SeqCst)
    }));
    assert!(!rig.timers.is_running(watchdog_unit()));
    assert!(!rig.sleep.wait_for_sleep(Duration::from_millis(100)));
}
