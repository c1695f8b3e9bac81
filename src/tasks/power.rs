// PingZee - Wake Window Watchdog
//
// One-shot task spawned when the main loop starts. It waits for the watchdog
// timer channel to fire, stops the channel, and reports an idle window to
// the application task, which puts the device to sleep. Then it exits.

use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::STACK_WATCHDOG;
use crate::drivers::timer_bank::TimerChannel;
use crate::power::WakeActivity;
use crate::system::System;
use crate::tasks::app::{AppCmd, AppMsg};
use crate::tasks::timers::TimerMsg;
use crate::tasks::worker::Done;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    SleepRequested,
    StayedAwake(WakeActivity),
    /// The channel never fired within the window plus grace.
    Expired,
}

pub fn spawn_watchdog(sys: &'static System) -> anyhow::Result<JoinHandle<WatchdogOutcome>> {
    let handle = thread::Builder::new()
        .name("watchdog".into())
        .stack_size(STACK_WATCHDOG)
        .spawn(move || watch_wake_window(sys))?;
    Ok(handle)
}

/// Waits out the current wake window. A restart re-initialises the channel,
/// which clears its alarm count: an alarm taken before the restart then
/// counts for nothing and the watchdog keeps waiting with a fresh deadline.
/// The check, the channel stop and clearing `watchdog_armed` happen under
/// the timers lock, which `start` also holds while it opens a window.
fn watch_wake_window(sys: &'static System) -> WatchdogOutcome {
    let cfg = *sys.power.config();
    let channel = TimerChannel::from_index(cfg.watchdog_channel);
    let limit = Duration::from_secs(u64::from(cfg.wake_window_secs)) + cfg.watchdog_grace;
    let mut seen = sys.power.window();

    loop {
        let event = sys.timer_bank.wait_event_timeout(channel, limit);

        let (window, outcome) = {
            let _bank = sys.timers.lock();
            let window = sys.power.window();
            let elapsed = sys.timer_bank.alarm_count(channel) > 0;
            if !elapsed && (event.is_some() || window != seen) {
                log::debug!("watchdog: wake window {} restarted", window);
                seen = window;
                continue;
            }
            sys.timers.call(TimerMsg::stop(channel.index()));
            sys.watchdog_armed.store(false, Ordering::SeqCst);
            let outcome = match (elapsed, sys.power.activity()) {
                (false, _) => WatchdogOutcome::Expired,
                (true, WakeActivity::Nothing) => WatchdogOutcome::SleepRequested,
                (true, activity) => WatchdogOutcome::StayedAwake(activity),
            };
            (window, outcome)
        };

        match outcome {
            WatchdogOutcome::Expired => {
                log::warn!("watchdog: timer {} silent for {:?}", channel.index(), limit)
            }
            WatchdogOutcome::SleepRequested => {
                log::info!("watchdog: wake window {} idle, requesting deep sleep", window);
                sys.app.submit(
                    AppMsg::new(AppCmd::WindowElapsed { window }).with_done(Done::Discard),
                );
            }
            WatchdogOutcome::StayedAwake(activity) => {
                log::info!("watchdog: {:?}, staying awake", activity)
            }
        }
        return outcome;
    }
}
