// PingZee - LIS3DH Accelerometer Driver
//
// Register-level driver that talks to the I2C task. Each register access is
// one locked I2C transaction; multi-register reads set the auto-increment
// bit of the sub-address.

use crate::config::{I2C_ADDR_LIS3DH, I2C_MAX_PAYLOAD};
use crate::error::TransportError;
use crate::events::{Axis, AxisReading};
use crate::tasks::i2c::{I2cEndpoint, I2cMsg};

// LIS3DH register addresses
pub const REG_WHO_AM_I: u8 = 0x0F;
pub const REG_TEMP_CFG: u8 = 0x1F;
pub const REG_CTRL1: u8 = 0x20;
pub const REG_CTRL3: u8 = 0x22;
pub const REG_CTRL4: u8 = 0x23;
pub const REG_CTRL5: u8 = 0x24;
pub const REG_CTRL6: u8 = 0x25;
pub const REG_OUT_X_L: u8 = 0x28;
pub const REG_OUT_Y_L: u8 = 0x2A;
pub const REG_OUT_Z_L: u8 = 0x2C;
pub const REG_INT1_CFG: u8 = 0x30;
pub const REG_INT1_SRC: u8 = 0x31;
pub const REG_INT1_THS: u8 = 0x32;
pub const REG_INT1_DURATION: u8 = 0x33;
pub const REG_CLICK_CFG: u8 = 0x38;
pub const REG_CLICK_SRC: u8 = 0x39;
pub const REG_CLICK_THS: u8 = 0x3A;
pub const REG_TIME_LIMIT: u8 = 0x3B;
pub const REG_TIME_LATENCY: u8 = 0x3C;
pub const REG_TIME_WINDOW: u8 = 0x3D;

pub const WHO_AM_I_VALUE: u8 = 0x33;
const AUTO_INCREMENT: u8 = 0x80;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub adc_enabled: bool,
    pub temp_enabled: bool,
    /// Hz: 1, 10, 25, 50, 100, 200, 400, 1600 or 5000.
    pub sample_rate: u16,
    /// Full scale in g: 2, 4, 8 or 16.
    pub range_g: u8,
    pub x_enabled: bool,
    pub y_enabled: bool,
    pub z_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adc_enabled: false,
            temp_enabled: false,
            sample_rate: 50,
            range_g: 2,
            x_enabled: true,
            y_enabled: true,
            z_enabled: true,
        }
    }
}

impl Settings {
    pub fn temp_cfg(&self) -> u8 {
        (u8::from(self.adc_enabled) << 7) | (u8::from(self.temp_enabled) << 6)
    }

    pub fn ctrl1(&self) -> u8 {
        let odr: u8 = match self.sample_rate {
            1 => 0x01,
            10 => 0x02,
            25 => 0x03,
            50 => 0x04,
            100 => 0x05,
            200 => 0x06,
            1600 => 0x08,
            5000 => 0x09,
            _ => 0x07, // 400 Hz
        };
        (odr << 4)
            | (u8::from(self.z_enabled) << 2)
            | (u8::from(self.y_enabled) << 1)
            | u8::from(self.x_enabled)
    }

    /// Block data update and high resolution are always on.
    pub fn ctrl4(&self) -> u8 {
        let fs: u8 = match self.range_g {
            2 => 0x00,
            4 => 0x01,
            8 => 0x02,
            _ => 0x03, // 16 g
        };
        0x80 | (fs << 4) | 0x08
    }

    /// Counts per g at the configured range.
    pub fn divisor(&self) -> Option<f32> {
        match self.range_g {
            2 => Some(15987.0),
            4 => Some(7840.0),
            8 => Some(3883.0),
            16 => Some(1280.0),
            _ => None,
        }
    }

    pub fn to_g(&self, raw: i16) -> f32 {
        self.divisor().map_or(0.0, |d| f32::from(raw) / d)
    }
}

// Motion on Y high, clicks on X/Y/Z, event latched on INT1.
const INTERRUPT_CONFIG: [(u8, u8); 9] = [
    (REG_INT1_CFG, 0x08),      // Y high
    (REG_INT1_THS, 0x10),      // 1/8 of range
    (REG_INT1_DURATION, 0x01), // one sample
    (REG_CLICK_CFG, 0x15),     // single click on X, Y, Z
    (REG_CLICK_SRC, 0x07),
    (REG_CLICK_THS, 0x0A),
    (REG_TIME_LIMIT, 0x08),
    (REG_TIME_LATENCY, 0x08),
    (REG_TIME_WINDOW, 0x10),
];

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Lis3dh {
    i2c: &'static I2cEndpoint,
    chip: u8,
    settings: Settings,
    present: bool,
}

impl Lis3dh {
    pub fn new(i2c: &'static I2cEndpoint) -> Self {
        Self {
            i2c,
            chip: I2C_ADDR_LIS3DH,
            settings: Settings::default(),
            present: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    fn transact(&self, msg: I2cMsg) -> Result<I2cMsg, TransportError> {
        let reply = self.i2c.transaction(msg);
        reply.status.map(|()| reply)
    }

    pub fn read_register(&self, reg: u8) -> Result<u8, TransportError> {
        let reply = self.transact(I2cMsg::write_read(self.chip, &[reg], 1)?)?;
        Ok(reply.rx.buf[0])
    }

    pub fn write_register(&self, reg: u8, value: u8) -> Result<(), TransportError> {
        self.transact(I2cMsg::write(self.chip, &[reg, value])?).map(|_| ())
    }

    pub fn read_region(&self, reg: u8, out: &mut [u8]) -> Result<(), TransportError> {
        if out.len() > I2C_MAX_PAYLOAD {
            return Err(TransportError::Overflow(out.len()));
        }
        let reply = self.transact(I2cMsg::write_read(self.chip, &[reg | AUTO_INCREMENT], out.len())?)?;
        out.copy_from_slice(reply.rx.bytes());
        Ok(())
    }

    pub fn read_i16(&self, reg: u8) -> Result<i16, TransportError> {
        let mut buf = [0u8; 2];
        self.read_region(reg, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    pub fn check_present(&mut self) -> Result<bool, TransportError> {
        self.present = self.read_register(REG_WHO_AM_I)? == WHO_AM_I_VALUE;
        if self.present {
            log::info!("LIS3DH found at 0x{:02x}", self.chip);
        } else {
            log::warn!("LIS3DH not responding at 0x{:02x}", self.chip);
        }
        Ok(self.present)
    }

    pub fn apply_settings(&mut self, settings: Settings) -> Result<(), TransportError> {
        self.write_register(REG_TEMP_CFG, settings.temp_cfg())?;
        self.write_register(REG_CTRL1, settings.ctrl1())?;
        self.write_register(REG_CTRL4, settings.ctrl4())?;
        self.settings = settings;
        log::info!(
            "LIS3DH configured ({} Hz, +/-{} g)",
            settings.sample_rate,
            settings.range_g
        );
        Ok(())
    }

    pub fn configure_interrupts(&self) -> Result<(), TransportError> {
        for (reg, value) in INTERRUPT_CONFIG {
            self.write_register(reg, value)?;
        }
        // Latch INT1 until INT1_SRC is read; keep the other CTRL5 bits.
        let ctrl5 = (self.read_register(REG_CTRL5)? & 0xF3) | 0x08;
        self.write_register(REG_CTRL5, ctrl5)?;
        self.write_register(REG_CTRL3, 0x60)?; // AOI1 + AOI2 on INT1
        self.write_register(REG_CTRL6, 0x80) // click on INT2
    }

    /// Read INT1_SRC, which releases the latched interrupt.
    pub fn clear_interrupt(&self) -> Result<u8, TransportError> {
        let source = self.read_register(REG_INT1_SRC)?;
        log::debug!("LIS3DH INT1_SRC 0x{:02x}", source);
        Ok(source)
    }

    pub fn read_axis(&self, axis: Axis) -> Result<AxisReading, TransportError> {
        let reg = match axis {
            Axis::X => REG_OUT_X_L,
            Axis::Y => REG_OUT_Y_L,
            Axis::Z => REG_OUT_Z_L,
        };
        let raw = self.read_i16(reg)?;
        Ok(AxisReading {
            axis,
            raw,
            g: self.settings.to_g(raw),
        })
    }
}
