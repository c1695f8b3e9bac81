//! Simulated board plus the handles a test needs to drive it.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pingzee::config::{PowerConfig, SystemConfig, PIN_LIS3DH_INT};
use pingzee::platform::sim::{SimI2cBus, SimInterruptLine, SimSleep, SimSpi, SimTimers};
use pingzee::system::{Board, System};

pub struct Rig {
    pub sys: &'static System,
    pub timers: Arc<SimTimers>,
    pub i2c: SimI2cBus,
    pub spi: SimSpi,
    pub irq: SimInterruptLine,
    pub sleep: SimSleep,
}

/// One-second wake window; the grace keeps the watchdog from expiring
/// while a test drives the timers by hand.
pub fn short_window() -> SystemConfig {
    SystemConfig {
        power: PowerConfig {
            wake_window_secs: 1,
            sleep_secs: 7,
            watchdog_grace: Duration::from_secs(10),
            ..PowerConfig::default()
        },
        ..SystemConfig::default()
    }
}

pub fn boot(config: SystemConfig) -> Rig {
    let timers = Arc::new(SimTimers::new());
    let i2c = SimI2cBus::with_board_devices();
    let spi = SimSpi::new();
    let irq = SimInterruptLine::new(PIN_LIS3DH_INT);
    let sleep = SimSleep::new();

    let board = Board {
        i2c: i2c.clone(),
        spi: Box::new(spi.clone()),
        timers: timers.clone(),
        sleep: Box::new(sleep.clone()),
        accel_irq: Box::new(irq.clone()),
    };
    let sys = System::boot(board, config).expect("boot");
    assert!(sys.wait_ready(Duration::from_secs(5)), "tasks not ready");
    Rig {
        sys,
        timers,
        i2c,
        spi,
        irq,
        sleep,
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
