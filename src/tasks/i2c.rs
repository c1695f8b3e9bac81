// PingZee - I2C Master Task
//
// Serialises every access to I2C port 0. A message carries a transmit and a
// receive packet: the worker writes `tx` (if any), waits the bus turnaround,
// then reads `rx.len` bytes (if any). The bus status comes back in the
// message.

use std::thread;

use embedded_hal::i2c::I2c;

use crate::config::{I2C_CONTINUE_RW_DELAY, I2C_MAX_PAYLOAD, I2C_QUEUE_LEN, RESULT_QUEUE_LEN};
use crate::error::TransportError;
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type I2cEndpoint = Endpoint<I2cMsg, I2C_QUEUE_LEN, RESULT_QUEUE_LEN>;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet {
    pub chip: u8,
    pub len: usize,
    pub buf: [u8; I2C_MAX_PAYLOAD],
}

impl Packet {
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len.min(I2C_MAX_PAYLOAD)]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct I2cMsg {
    pub tx: Packet,
    pub rx: Packet,
    pub status: Result<(), TransportError>,
    pub done: Done<I2cMsg>,
}

impl Message for I2cMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl I2cMsg {
    fn new(chip: u8, tx: &[u8], rx_len: usize) -> Result<Self, TransportError> {
        if tx.len() > I2C_MAX_PAYLOAD {
            return Err(TransportError::Overflow(tx.len()));
        }
        if rx_len > I2C_MAX_PAYLOAD {
            return Err(TransportError::Overflow(rx_len));
        }
        let mut out = Packet {
            chip,
            len: tx.len(),
            ..Packet::default()
        };
        out.buf[..tx.len()].copy_from_slice(tx);
        Ok(Self {
            tx: out,
            rx: Packet {
                chip,
                len: rx_len,
                ..Packet::default()
            },
            status: Ok(()),
            done: Done::Reply,
        })
    }

    pub fn write(chip: u8, bytes: &[u8]) -> Result<Self, TransportError> {
        Self::new(chip, bytes, 0)
    }

    pub fn read(chip: u8, len: usize) -> Result<Self, TransportError> {
        Self::new(chip, &[], len)
    }

    pub fn write_read(chip: u8, bytes: &[u8], rx_len: usize) -> Result<Self, TransportError> {
        Self::new(chip, bytes, rx_len)
    }

    pub fn with_done(mut self, done: Done<I2cMsg>) -> Self {
        self.done = done;
        self
    }

    /// Received bytes, or the bus error.
    pub fn received(&self) -> Result<&[u8], TransportError> {
        self.status.map(|()| self.rx.bytes())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct I2cMaster<I> {
    bus: I,
}

impl<I> I2cMaster<I> {
    pub fn new(bus: I) -> Self {
        Self { bus }
    }
}

impl<I> Handler for I2cMaster<I>
where
    I: I2c + Send + 'static,
{
    type Msg = I2cMsg;

    fn handle(&mut self, msg: &mut I2cMsg) {
        msg.status = self.execute(msg);
        if let Err(e) = msg.status {
            log::warn!("i2c: {}", e);
        }
    }
}

impl<I: I2c> I2cMaster<I> {
    fn execute(&mut self, msg: &mut I2cMsg) -> Result<(), TransportError> {
        let tx = msg.tx;
        if tx.len > 0 {
            self.bus
                .write(tx.chip, tx.bytes())
                .map_err(|e| TransportError::from_i2c(tx.chip, &e))?;
            if msg.rx.len > 0 {
                thread::sleep(I2C_CONTINUE_RW_DELAY);
            }
        }
        if msg.rx.len > 0 {
            let chip = msg.rx.chip;
            let len = msg.rx.len;
            self.bus
                .read(chip, &mut msg.rx.buf[..len])
                .map_err(|e| TransportError::from_i2c(chip, &e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock, Transaction};

    #[test]
    fn write_then_read_in_two_bus_operations() {
        let expectations = [
            Transaction::write(0x19, vec![0x0F]),
            Transaction::read(0x19, vec![0x33]),
        ];
        let mut bus = Mock::new(&expectations);
        let mut master = I2cMaster::new(bus.clone());
        let mut msg = I2cMsg::write_read(0x19, &[0x0F], 1).unwrap();
        master.handle(&mut msg);
        assert_eq!(msg.received(), Ok(&[0x33][..]));
        bus.done();
    }

    #[test]
    fn write_only_skips_read() {
        let expectations = [Transaction::write(0x57, vec![0x10, 0xAB])];
        let mut bus = Mock::new(&expectations);
        let mut master = I2cMaster::new(bus.clone());
        let mut msg = I2cMsg::write(0x57, &[0x10, 0xAB]).unwrap();
        master.handle(&mut msg);
        assert_eq!(msg.status, Ok(()));
        assert!(msg.rx.bytes().is_empty());
        bus.done();
    }

    #[test]
    fn nack_on_write_skips_read_and_reports() {
        let expectations = [Transaction::write(0x57, vec![0x00])
            .with_error(ErrorKind::NoAcknowledge(embedded_hal::i2c::NoAcknowledgeSource::Address))];
        let mut bus = Mock::new(&expectations);
        let mut master = I2cMaster::new(bus.clone());
        let mut msg = I2cMsg::write_read(0x57, &[0x00], 1).unwrap();
        master.handle(&mut msg);
        assert_eq!(msg.status, Err(TransportError::Nack { chip: 0x57 }));
        bus.done();
    }

    #[test]
    fn oversized_payload_is_rejected_up_front() {
        assert_eq!(
            I2cMsg::read(0x19, I2C_MAX_PAYLOAD + 1).map(|_| ()),
            Err(TransportError::Overflow(I2C_MAX_PAYLOAD + 1))
        );
    }
}
