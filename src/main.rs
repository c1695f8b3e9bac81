// PingZee - Firmware Entry Point
//
// Boot sequence:
//   1. Logging, then the board (real peripherals or the host simulation).
//   2. Resume bookkeeping and worker tasks (`System::boot`).
//   3. Accelerometer detection/setup and the display banner.
//   4. First wake window: the device sleeps again after it unless an
//      accelerometer interrupt or a `stop` arrives first.
//   5. Serial console on the main thread.

use std::io;
use std::time::Duration;

use pingzee::config::SystemConfig;
use pingzee::console::Console;
use pingzee::system::System;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("PingZee firmware starting");

    let board = pingzee::platform::esp::take_board()?;
    let sys = System::boot(board, SystemConfig::default())?;
    run(sys)
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::thread;

    use pingzee::config::PIN_LIS3DH_INT;
    use pingzee::platform::sim::{SimI2cBus, SimInterruptLine, SimSleep, SimSpi, SimTimers};
    use pingzee::system::Board;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    log::info!("PingZee simulator starting");

    let timers = Arc::new(SimTimers::new());
    timers.spawn_clock(Duration::from_millis(10))?;
    let sleep = SimSleep::new();

    // Simulated deep sleep never returns; end the process instead.
    let sleeper = sleep.clone();
    thread::Builder::new().name("sim-sleep".into()).spawn(move || loop {
        if sleeper.wait_for_sleep(Duration::from_secs(3600)) {
            log::info!("simulated deep sleep entered; exiting");
            std::process::exit(0);
        }
    })?;

    let board = Board {
        i2c: SimI2cBus::with_board_devices(),
        spi: Box::new(SimSpi::new()),
        timers,
        sleep: Box::new(sleep),
        accel_irq: Box::new(SimInterruptLine::new(PIN_LIS3DH_INT)),
    };
    let sys = System::boot(board, SystemConfig::default())?;
    run(sys)
}

fn run(sys: &'static System) -> anyhow::Result<()> {
    if !sys.wait_ready(READY_TIMEOUT) {
        log::warn!("not every task reported ready within {:?}", READY_TIMEOUT);
    }
    sys.bring_up_sensors();
    sys.start_main_loop();

    Console::new().run(sys, io::stdin().lock(), io::stdout())?;

    // Input closed: the tasks keep running.
    loop {
        std::thread::park();
    }
}
