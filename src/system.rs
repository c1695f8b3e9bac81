// PingZee - System Bring-up
//
// Owns every resource endpoint and wires the worker tasks together.
// Boot order:
//   resume bookkeeping ─► GPIO bridge ─► i2c, spi, timers
//                                       ├─► accel   (after i2c)
//                                       ├─► display (after spi)
//                                       └─► app     (after i2c + timers)
// Every worker blocks on its upstream readiness latches, so the spawn order
// itself does not matter.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use embedded_hal::i2c::I2c;

use crate::config::{
    SystemConfig, STACK_APP, STACK_I2C, STACK_LIS3DH, STACK_OLED, STACK_SPI, STACK_TIMERS,
};
use crate::drivers::timer_bank::TimerBank;
use crate::events::AlarmHandler;
use crate::isr;
use crate::platform::{InterruptLine, SleepControl, SpiHost, TimerHal};
use crate::power::{PowerManager, ResumeReport};
use crate::sync::ResourceLock;
use crate::tasks::accel::{AccelCmd, AccelEndpoint, AccelMsg, AccelWorker};
use crate::tasks::app::{AppCmd, AppEndpoint, AppMsg, AppWorker};
use crate::tasks::display::{DisplayEndpoint, DisplayMsg, DisplayWorker};
use crate::tasks::i2c::{I2cEndpoint, I2cMaster};
use crate::tasks::spi::{SpiEndpoint, SpiMaster};
use crate::tasks::timers::{TimerEndpoint, TimerWorker};
use crate::tasks::worker::{self, Done};

/// The peripherals the firmware runs on, already claimed and configured.
pub struct Board<I> {
    pub i2c: I,
    pub spi: Box<dyn SpiHost>,
    pub timers: Arc<dyn TimerHal>,
    pub sleep: Box<dyn SleepControl>,
    pub accel_irq: Box<dyn InterruptLine>,
}

pub struct System {
    pub config: SystemConfig,
    pub app: AppEndpoint,
    pub timers: TimerEndpoint,
    pub i2c: I2cEndpoint,
    pub spi: SpiEndpoint,
    pub display: DisplayEndpoint,
    pub accel: AccelEndpoint,
    pub timer_bank: TimerBank,
    pub power: PowerManager,
    /// Set while a watchdog task is waiting on the wake window.
    pub watchdog_armed: AtomicBool,
    alarm_bridge: OnceLock<AlarmHandler>,
    accel_pin: u8,
}

impl System {
    /// Build the system, classify the reset and start every worker task.
    /// The returned reference lives for the rest of the program.
    pub fn boot<I>(board: Board<I>, config: SystemConfig) -> anyhow::Result<&'static System>
    where
        I: I2c + Send + 'static,
    {
        let Board {
            i2c,
            spi,
            timers,
            sleep,
            mut accel_irq,
        } = board;
        let lock_timeout = config.lock_timeout;
        let lock = move |name: &'static str| ResourceLock::with_timeout(name, lock_timeout);

        let sys: &'static System = Box::leak(Box::new(System {
            config,
            app: AppEndpoint::with_lock("app", lock("app")),
            timers: TimerEndpoint::with_lock("timers", lock("timers")),
            i2c: I2cEndpoint::with_lock("i2c", lock("i2c")),
            spi: SpiEndpoint::with_lock("spi", lock("spi")),
            display: DisplayEndpoint::with_lock("oled", lock("oled")),
            accel: AccelEndpoint::with_lock("lis3dh", lock("lis3dh")),
            timer_bank: TimerBank::new(timers),
            power: PowerManager::new(sleep, config.power),
            watchdog_armed: AtomicBool::new(false),
            alarm_bridge: OnceLock::new(),
            accel_pin: accel_irq.pin(),
        }));

        let report = sys.power.resume();
        log::debug!("resume: {:?}", report);

        isr::bind_gpio(accel_irq.as_mut(), &sys.app).context("binding the LIS3DH interrupt")?;

        worker::spawn(&sys.i2c, I2cMaster::new(i2c), &[], STACK_I2C).context("spawning i2c")?;
        worker::spawn(&sys.spi, SpiMaster::new(spi), &[], STACK_SPI).context("spawning spi")?;
        worker::spawn(&sys.timers, TimerWorker::new(&sys.timer_bank), &[], STACK_TIMERS)
            .context("spawning timers")?;
        worker::spawn(
            &sys.accel,
            AccelWorker::new(&sys.i2c, accel_irq),
            &[sys.i2c.ready()],
            STACK_LIS3DH,
        )
        .context("spawning lis3dh")?;
        worker::spawn(
            &sys.display,
            DisplayWorker::new(&sys.spi),
            &[sys.spi.ready()],
            STACK_OLED,
        )
        .context("spawning oled")?;
        worker::spawn(
            &sys.app,
            AppWorker::new(sys),
            &[sys.i2c.ready(), sys.timers.ready()],
            STACK_APP,
        )
        .context("spawning app")?;

        Ok(sys)
    }

    /// Wait until every worker finished its init, or `timeout` passed.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        [
            self.i2c.ready(),
            self.spi.ready(),
            self.timers.ready(),
            self.accel.ready(),
            self.display.ready(),
            self.app.ready(),
        ]
        .into_iter()
        .all(|latch| latch.wait_timeout(timeout))
    }

    pub fn accel_pin(&self) -> u8 {
        self.accel_pin
    }

    pub fn resume_report(&self) -> ResumeReport {
        let state = self.power.snapshot();
        ResumeReport {
            cause: state.wake_cause,
            slept_ms: state.slept_ms,
        }
    }

    /// Alarm handler forwarding a channel to the application task. One
    /// instance is shared by every channel that asks for it.
    pub fn alarm_bridge(&'static self) -> AlarmHandler {
        *self.alarm_bridge.get_or_init(|| isr::timer_to_app(&self.app))
    }

    /// Detect and configure the accelerometer, then put a banner on the
    /// display.
    pub fn bring_up_sensors(&self) {
        let found = self.accel.transaction(AccelMsg::new(AccelCmd::CheckPresent));
        if found.present {
            let setup = self.accel.transaction(AccelMsg::new(AccelCmd::Setup(None)));
            if let Err(e) = setup.status {
                log::error!("LIS3DH setup: {}", e);
            }
        }
        let banner = self.display.transaction(DisplayMsg::show(0, 0, "PingZee"));
        if let Err(e) = banner.status {
            log::warn!("OLED banner: {}", e);
        }
    }

    /// Open a wake window; the device sleeps at its end unless something
    /// happens first.
    pub fn start_main_loop(&self) {
        self.app.transaction(AppMsg::new(AppCmd::StartMainLoop));
    }

    pub fn stop_main_loop(&self) {
        self.app.transaction(AppMsg::new(AppCmd::StopMainLoop));
    }

    /// Ask the application task to power down. Does not wait: the task
    /// never replies.
    pub fn enter_deep_sleep(&self, secs: u32) {
        self.app
            .submit(AppMsg::new(AppCmd::EnterDeepSleep { secs }).with_done(Done::Discard));
    }
}
