// PingZee - Power State Machine
//
// Tracks what happened during the current wake window and performs the
// deep-sleep entry / resume bookkeeping.
//
//   start main loop ──► Nothing ──(external event)──► ExternalEventResponded
//                          │
//                          ├──(stop command)──► ManuallyStopped
//                          │
//                          └──(watchdog fires while still Nothing)──► deep sleep
//
// Only the application worker and the deep-sleep entry path mutate it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::PowerConfig;
use crate::fault;
use crate::platform::{SleepControl, WakeLevel};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeActivity {
    Nothing,
    ExternalEventResponded,
    ManuallyStopped,
}

/// Platform-reported reason for the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// Cold boot or any reset that was not a deep-sleep wake.
    Undefined,
    Timer,
    /// External wake; `mask` has one bit per GPIO that was asserted.
    ExternalPin { mask: u64 },
}

impl WakeCause {
    /// Lowest GPIO number in an external wake mask.
    pub fn pin(&self) -> Option<u8> {
        match *self {
            Self::ExternalPin { mask } if mask != 0 => Some(mask.trailing_zeros() as u8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub cause: WakeCause,
    /// Time spent asleep; `None` on a cold boot.
    pub slept_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    /// Bumped each time a wake window opens.
    pub window: u32,
    pub activity: WakeActivity,
    pub last_event_ms: u64,
    pub wake_cause: WakeCause,
    pub slept_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct PowerManager {
    config: PowerConfig,
    state: Mutex<PowerState>,
    sleep: Mutex<Box<dyn SleepControl>>,
}

impl PowerManager {
    pub fn new(sleep: Box<dyn SleepControl>, config: PowerConfig) -> Self {
        let now = sleep.now_ms();
        Self {
            config,
            state: Mutex::new(PowerState {
                window: 0,
                activity: WakeActivity::Nothing,
                last_event_ms: now,
                wake_cause: WakeCause::Undefined,
                slept_ms: None,
            }),
            sleep: Mutex::new(sleep),
        }
    }

    fn state(&self) -> MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self) -> MutexGuard<'_, Box<dyn SleepControl>> {
        self.sleep.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Classify the reset, work out how long the device slept and log it.
    /// Runs once, first thing after boot.
    pub fn resume(&self) -> ResumeReport {
        let (cause, now, entry) = {
            let sleep = self.sleep();
            (sleep.wake_cause(), sleep.now_ms(), sleep.sleep_entry())
        };
        let slept_ms = match cause {
            WakeCause::Undefined => None,
            _ => entry.map(|entry| now.saturating_sub(entry)),
        };

        match (cause, slept_ms) {
            (WakeCause::Timer, Some(ms)) => {
                log::info!("Wake up from timer. Time spent in deep sleep: {} ms", ms)
            }
            (WakeCause::ExternalPin { .. }, Some(ms)) => match cause.pin() {
                Some(pin) => log::info!("Wake up from GPIO {}. Time spent in deep sleep: {} ms", pin, ms),
                None => log::info!("Wake up from GPIO. Time spent in deep sleep: {} ms", ms),
            },
            _ => log::info!("Not a deep sleep reset"),
        }

        let mut state = self.state();
        state.wake_cause = cause;
        state.slept_ms = slept_ms;
        state.last_event_ms = now;
        ResumeReport { cause, slept_ms }
    }

    /// A new wake window starts with nothing observed. Returns its number;
    /// anything tied to an older window is stale from here on.
    pub fn begin_wake_window(&self) -> u32 {
        let now = self.sleep().now_ms();
        let mut state = self.state();
        state.window = state.window.wrapping_add(1);
        state.activity = WakeActivity::Nothing;
        state.last_event_ms = now;
        state.window
    }

    pub fn window(&self) -> u32 {
        self.state().window
    }

    pub fn record(&self, activity: WakeActivity) {
        let now = self.sleep().now_ms();
        let mut state = self.state();
        state.activity = activity;
        state.last_event_ms = now;
    }

    pub fn activity(&self) -> WakeActivity {
        self.state().activity
    }

    pub fn snapshot(&self) -> PowerState {
        *self.state()
    }

    /// Arm the timer and GPIO wake sources, note the entry time and power
    /// down. Refused wake programming halts: sleeping without a way back
    /// would brick the device.
    pub fn enter_deep_sleep(&self, secs: u32) -> ! {
        let mut sleep = self.sleep();
        if let Err(e) = sleep.arm_timer_wakeup(secs) {
            fault!("timer wakeup: {}", e);
        }
        let mask = 1u64 << self.config.wake_pin;
        if let Err(e) = sleep.arm_ext_wakeup(mask, WakeLevel::AnyHigh) {
            fault!("ext wakeup: {}", e);
        }
        let now = sleep.now_ms();
        sleep.store_sleep_entry(now);
        self.state().last_event_ms = now;
        log::info!(
            "Entering deep sleep for {} s (or GPIO {} high)",
            secs,
            self.config.wake_pin
        );
        sleep.enter_sleep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimSleep;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn manager(sleep: &SimSleep) -> PowerManager {
        PowerManager::new(Box::new(sleep.clone()), PowerConfig::default())
    }

    #[test]
    fn timer_wake_reports_elapsed_sleep() {
        let sim = SimSleep::resumed(WakeCause::Timer, 1_000, 21_250);
        let pm = manager(&sim);
        let report = pm.resume();
        assert_eq!(report.cause, WakeCause::Timer);
        assert_eq!(report.slept_ms, Some(20_250));
        assert_eq!(pm.snapshot().slept_ms, Some(20_250));
    }

    #[test]
    fn external_wake_decodes_pin_from_mask() {
        let cause = WakeCause::ExternalPin { mask: 1 << 25 };
        let sim = SimSleep::resumed(cause, 500, 800);
        let pm = manager(&sim);
        let report = pm.resume();
        assert_eq!(report.cause.pin(), Some(25));
        assert_eq!(report.slept_ms, Some(300));
        assert_eq!(pm.snapshot().wake_cause, cause);
    }

    #[test]
    fn cold_boot_has_no_sleep_time() {
        let sim = SimSleep::new();
        let pm = manager(&sim);
        assert_eq!(
            pm.resume(),
            ResumeReport {
                cause: WakeCause::Undefined,
                slept_ms: None
            }
        );
        assert_eq!(WakeCause::ExternalPin { mask: 0 }.pin(), None);
    }

    #[test]
    fn activity_transitions() {
        let sim = SimSleep::new();
        let pm = manager(&sim);
        pm.record(WakeActivity::ManuallyStopped);
        assert_eq!(pm.activity(), WakeActivity::ManuallyStopped);
        let first = pm.begin_wake_window();
        assert_eq!(pm.activity(), WakeActivity::Nothing);
        assert_eq!(pm.begin_wake_window(), first + 1);
        assert_eq!(pm.window(), first + 1);
        sim.set_now(42);
        pm.record(WakeActivity::ExternalEventResponded);
        assert_eq!(pm.snapshot().last_event_ms, 42);
    }

    #[test]
    fn deep_sleep_arms_both_wake_sources() {
        let sim = SimSleep::resumed(WakeCause::Undefined, 0, 7_000);
        let pm = Arc::new(manager(&sim));
        let sleeper = Arc::clone(&pm);
        thread::spawn(move || sleeper.enter_deep_sleep(30));
        assert!(sim.wait_for_sleep(Duration::from_secs(2)));

        let record = sim.record();
        assert_eq!(record.timer_wakeup_secs, Some(30));
        assert_eq!(
            record.ext_wakeup,
            Some((1u64 << PowerConfig::default().wake_pin, WakeLevel::AnyHigh))
        );
        assert_eq!(record.sleep_entry, Some(7_000));
        assert_eq!(record.entered, 1);
    }
}
