// PingZee - SPI Master Task
//
// Owns the VSPI host. Devices are registered through the task, which hands
// back an opaque handle; transfers name that handle and the state of the
// data/command line.

use crate::config::{OLED_WIDTH, RESULT_QUEUE_LEN, SPI_QUEUE_LEN};
use crate::error::TransportError;
use crate::platform::{DeviceHandle, LineMode, SpiHost};
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type SpiEndpoint = Endpoint<SpiMsg, SPI_QUEUE_LEN, RESULT_QUEUE_LEN>;

/// Largest single transfer: one full display page.
pub const SPI_MAX_TX: usize = OLED_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiCmd {
    AddDevice { cs_pin: u8 },
    Transfer,
}

#[derive(Debug, Clone, Copy)]
pub struct SpiMsg {
    pub cmd: SpiCmd,
    pub device: Option<DeviceHandle>,
    pub mode: LineMode,
    pub len: usize,
    pub tx: [u8; SPI_MAX_TX],
    pub status: Result<(), TransportError>,
    pub done: Done<SpiMsg>,
}

impl Message for SpiMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl SpiMsg {
    pub fn add_device(cs_pin: u8) -> Self {
        Self {
            cmd: SpiCmd::AddDevice { cs_pin },
            device: None,
            mode: LineMode::Command,
            len: 0,
            tx: [0; SPI_MAX_TX],
            status: Ok(()),
            done: Done::Reply,
        }
    }

    pub fn transfer(device: DeviceHandle, mode: LineMode, bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() > SPI_MAX_TX {
            return Err(TransportError::Overflow(bytes.len()));
        }
        let mut msg = Self::add_device(0);
        msg.cmd = SpiCmd::Transfer;
        msg.device = Some(device);
        msg.mode = mode;
        msg.len = bytes.len();
        msg.tx[..bytes.len()].copy_from_slice(bytes);
        Ok(msg)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.tx[..self.len.min(SPI_MAX_TX)]
    }
}

pub struct SpiMaster {
    host: Box<dyn SpiHost>,
}

impl SpiMaster {
    pub fn new(host: Box<dyn SpiHost>) -> Self {
        Self { host }
    }
}

impl Handler for SpiMaster {
    type Msg = SpiMsg;

    fn handle(&mut self, msg: &mut SpiMsg) {
        msg.status = match msg.cmd {
            SpiCmd::AddDevice { cs_pin } => self.host.add_device(cs_pin).map(|dev| {
                log::info!("spi: device added on CS {} -> {:?}", cs_pin, dev);
                msg.device = Some(dev);
            }),
            SpiCmd::Transfer => match msg.device {
                Some(dev) => self.host.transfer(dev, msg.mode, msg.bytes()),
                None => Err(TransportError::NoDevice),
            },
        };
        if let Err(e) = msg.status {
            log::warn!("spi: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimSpi;

    #[test]
    fn registered_device_receives_transfers() {
        let sim = SimSpi::new();
        let mut master = SpiMaster::new(Box::new(sim.clone()));

        let mut add = SpiMsg::add_device(5);
        master.handle(&mut add);
        assert_eq!(add.status, Ok(()));
        let dev = add.device.expect("handle");

        let mut xfer = SpiMsg::transfer(dev, LineMode::Data, &[1, 2, 3]).expect("fits");
        master.handle(&mut xfer);
        assert_eq!(xfer.status, Ok(()));

        let log = sim.take_transfers();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].bytes, vec![1, 2, 3]);
        assert_eq!(log[0].mode, LineMode::Data);
        assert_eq!(sim.devices(), vec![5]);
    }

    #[test]
    fn transfer_without_device_fails() {
        let mut master = SpiMaster::new(Box::new(SimSpi::new()));
        let mut msg = SpiMsg::add_device(0);
        msg.cmd = SpiCmd::Transfer;
        master.handle(&mut msg);
        assert_eq!(msg.status, Err(TransportError::NoDevice));
    }
}
