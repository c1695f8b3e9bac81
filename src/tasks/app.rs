// PingZee - Application Task
//
// Consumes interrupt messages and the externally triggered power commands,
// and is the only task besides deep-sleep entry that changes the power
// state.

use std::sync::atomic::Ordering;

use crate::config::{APP_QUEUE_LEN, RESULT_QUEUE_LEN};
use crate::drivers::timer_bank::ticks_for_secs;
use crate::platform::stack_headroom;
use crate::power::WakeActivity;
use crate::system::System;
use crate::tasks::accel::{AccelCmd, AccelMsg};
use crate::tasks::power;
use crate::tasks::timers::TimerMsg;
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type AppEndpoint = Endpoint<AppMsg, APP_QUEUE_LEN, RESULT_QUEUE_LEN>;

/// Where an interrupt message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Gpio(u8),
    Timer(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCmd {
    StackRoom,
    Interrupt(InterruptSource),
    StartMainLoop,
    StopMainLoop,
    EnterDeepSleep { secs: u32 },
    /// Watchdog report: wake window `window` ended with nothing observed.
    WindowElapsed { window: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct AppMsg {
    pub cmd: AppCmd,
    pub value: u32,
    pub done: Done<AppMsg>,
}

impl Message for AppMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl AppMsg {
    pub fn new(cmd: AppCmd) -> Self {
        Self {
            cmd,
            value: 0,
            done: Done::Reply,
        }
    }

    /// What the ISR bridges post: nobody waits for a reply.
    pub fn interrupt(source: InterruptSource) -> Self {
        Self::new(AppCmd::Interrupt(source)).with_done(Done::Discard)
    }

    pub fn with_done(mut self, done: Done<AppMsg>) -> Self {
        self.done = done;
        self
    }
}

pub struct AppWorker {
    sys: &'static System,
}

impl AppWorker {
    pub fn new(sys: &'static System) -> Self {
        Self { sys }
    }

    fn on_interrupt(&mut self, source: InterruptSource) {
        match source {
            InterruptSource::Gpio(pin) if pin == self.sys.accel_pin() => {
                let reply = self.sys.accel.transaction(AccelMsg::new(AccelCmd::ClearInterrupt));
                match reply.status {
                    Ok(()) => log::info!("motion interrupt (INT1_SRC 0x{:02x})", reply.int_source),
                    Err(e) => log::warn!("motion interrupt, source not read: {}", e),
                }
                self.sys.power.record(WakeActivity::ExternalEventResponded);
            }
            InterruptSource::Gpio(pin) => {
                log::info!("GPIO {} interrupt", pin);
                self.sys.power.record(WakeActivity::ExternalEventResponded);
            }
            InterruptSource::Timer(channel) => log::info!("timer {} alarm", channel),
        }
    }

    /// Open a wake window: arm the watchdog channel and spawn the one-shot
    /// watchdog unless one is already waiting on it. Holds the timers lock
    /// throughout so a running watchdog sees either the old window or the
    /// new one, never half of each.
    fn start_main_loop(&mut self) {
        let cfg = *self.sys.power.config();
        let timers = &self.sys.timers;
        let _bank = timers.lock();
        let window = self.sys.power.begin_wake_window();
        let ticks = ticks_for_secs(cfg.wake_window_secs);
        timers.call(TimerMsg::init(cfg.watchdog_channel, ticks, None));
        timers.call(TimerMsg::start(cfg.watchdog_channel));

        if self.sys.watchdog_armed.swap(true, Ordering::SeqCst) {
            log::info!("wake window {} restarted ({} s)", window, cfg.wake_window_secs);
            return;
        }
        match power::spawn_watchdog(self.sys) {
            Ok(_) => log::info!("wake window {} open ({} s)", window, cfg.wake_window_secs),
            Err(e) => {
                self.sys.watchdog_armed.store(false, Ordering::SeqCst);
                log::error!("watchdog not started: {:#}", e);
            }
        }
    }

    /// Sleep only if the reported window is still the current one and stayed
    /// idle; a restart after the report supersedes it.
    fn window_elapsed(&mut self, window: u32) {
        let current = self.sys.power.window();
        if window != current {
            log::info!("stale report for wake window {} (now {})", window, current);
            return;
        }
        match self.sys.power.activity() {
            WakeActivity::Nothing => {
                let secs = self.sys.power.config().sleep_secs;
                self.sys.power.enter_deep_sleep(secs)
            }
            activity => log::info!("wake window {} ended with {:?}", window, activity),
        }
    }
}

impl Handler for AppWorker {
    type Msg = AppMsg;

    fn handle(&mut self, msg: &mut AppMsg) {
        match msg.cmd {
            AppCmd::StackRoom => msg.value = stack_headroom().unwrap_or(0),
            AppCmd::Interrupt(source) => self.on_interrupt(source),
            AppCmd::StartMainLoop => self.start_main_loop(),
            AppCmd::StopMainLoop => {
                self.sys.power.record(WakeActivity::ManuallyStopped);
                log::info!("main loop stopped; staying awake");
            }
            AppCmd::EnterDeepSleep { secs } => self.sys.power.enter_deep_sleep(secs),
            AppCmd::WindowElapsed { window } => self.window_elapsed(window),
        }
    }
}
