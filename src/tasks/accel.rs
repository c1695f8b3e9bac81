// PingZee - Accelerometer Task
//
// Owns the LIS3DH and its INT1 line. A poll request carries no axis: the
// task answers X, then Y, then Z, then X again.

use crate::config::{LIS3DH_QUEUE_LEN, RESULT_QUEUE_LEN};
use crate::drivers::lis3dh::{Lis3dh, Settings};
use crate::error::TransportError;
use crate::events::{Axis, AxisReading};
use crate::platform::InterruptLine;
use crate::tasks::i2c::I2cEndpoint;
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type AccelEndpoint = Endpoint<AccelMsg, LIS3DH_QUEUE_LEN, RESULT_QUEUE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccelCmd {
    Poll,
    CheckPresent,
    /// `None` applies the defaults.
    Setup(Option<Settings>),
    ClearInterrupt,
}

#[derive(Debug, Clone, Copy)]
pub struct AccelMsg {
    pub cmd: AccelCmd,
    pub present: bool,
    pub reading: Option<AxisReading>,
    pub int_source: u8,
    pub status: Result<(), TransportError>,
    pub done: Done<AccelMsg>,
}

impl Message for AccelMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl AccelMsg {
    pub fn new(cmd: AccelCmd) -> Self {
        Self {
            cmd,
            present: false,
            reading: None,
            int_source: 0,
            status: Ok(()),
            done: Done::Reply,
        }
    }

    pub fn poll() -> Self {
        Self::new(AccelCmd::Poll)
    }

    pub fn with_done(mut self, done: Done<AccelMsg>) -> Self {
        self.done = done;
        self
    }
}

pub struct AccelWorker {
    sensor: Lis3dh,
    irq: Box<dyn InterruptLine>,
    next_axis: Axis,
}

impl AccelWorker {
    pub fn new(i2c: &'static I2cEndpoint, irq: Box<dyn InterruptLine>) -> Self {
        Self {
            sensor: Lis3dh::new(i2c),
            irq,
            next_axis: Axis::X,
        }
    }

    fn poll(&mut self) -> Result<AxisReading, TransportError> {
        let axis = self.next_axis;
        self.next_axis = axis.next();
        self.sensor.read_axis(axis)
    }

    fn setup(&mut self, settings: Option<Settings>) -> Result<(), TransportError> {
        if !self.sensor.is_present() {
            log::warn!("LIS3DH setup skipped: sensor not detected");
            return Ok(());
        }
        self.sensor.apply_settings(settings.unwrap_or_default())?;
        self.sensor.configure_interrupts()
    }

    fn rearm_line(&mut self) {
        if let Err(e) = self.irq.enable() {
            log::error!("LIS3DH: GPIO {} interrupt not re-enabled: {}", self.irq.pin(), e);
        }
    }
}

impl Handler for AccelWorker {
    type Msg = AccelMsg;

    fn init(&mut self) -> anyhow::Result<()> {
        self.irq.enable()?;
        log::info!("LIS3DH interrupt on GPIO {}", self.irq.pin());
        Ok(())
    }

    fn handle(&mut self, msg: &mut AccelMsg) {
        msg.status = match msg.cmd {
            AccelCmd::Poll => self.poll().map(|reading| msg.reading = Some(reading)),
            AccelCmd::CheckPresent => self.sensor.check_present().map(|_| ()),
            AccelCmd::Setup(settings) => self.setup(settings),
            AccelCmd::ClearInterrupt => {
                let cleared = self.sensor.clear_interrupt().map(|src| msg.int_source = src);
                self.rearm_line();
                cleared
            }
        };
        msg.present = self.sensor.is_present();
        if let Err(e) = msg.status {
            log::warn!("lis3dh: {}", e);
        }
    }
}
