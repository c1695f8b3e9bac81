// PingZee - SSD1306 OLED Driver (128x32, 4-wire SPI)
//
// Every bus access is a message to the SPI task. Positioning followed by a
// data write is two messages, so both go out under the SPI lock.
// Text is rasterised one 8-pixel page at a time with embedded-graphics.

use core::convert::Infallible;

use embedded_graphics::mono_font::ascii::FONT_5X7;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

use crate::config::{OLED_PAGES, OLED_WIDTH};
use crate::error::TransportError;
use crate::platform::{DeviceHandle, LineMode};
use crate::tasks::spi::{SpiEndpoint, SpiMsg};

// SSD1306 command set (subset)
const CMD_SET_MULTIPLEX_RATIO: u8 = 0xA8;
const CMD_SET_DISPLAY_OFFSET: u8 = 0xD3;
const CMD_SET_START_LINE: u8 = 0x40;
const CMD_SEGMENT_REMAP_COL127: u8 = 0xA1;
const CMD_COM_SCAN_DOWN: u8 = 0xC8;
const CMD_SET_COM_PINS: u8 = 0xDA;
const CMD_SET_CONTRAST: u8 = 0x81;
const CMD_DISPLAY_FOLLOWS_RAM: u8 = 0xA4;
const CMD_NORMAL_DISPLAY: u8 = 0xA6;
const CMD_SET_CLOCK_DIVIDE: u8 = 0xD5;
const CMD_CHARGE_PUMP: u8 = 0x8D;
const CMD_SET_VCOMH: u8 = 0xDB;
const CMD_SET_PRECHARGE: u8 = 0xD9;
const CMD_DISPLAY_ON: u8 = 0xAF;
const CMD_PAGE_ADDRESS: u8 = 0xB0;
const CMD_COLUMN_HIGH: u8 = 0x10;
const CMD_COLUMN_LOW: u8 = 0x00;

const INIT_SEQUENCE: [u8; 21] = [
    CMD_SET_MULTIPLEX_RATIO, 0x1F, // 1/32 duty
    CMD_SET_DISPLAY_OFFSET, 0x00,
    CMD_SET_START_LINE,
    CMD_SEGMENT_REMAP_COL127,
    CMD_COM_SCAN_DOWN,
    CMD_SET_COM_PINS, 0x02,
    CMD_SET_CONTRAST, 0x8F,
    CMD_DISPLAY_FOLLOWS_RAM,
    CMD_NORMAL_DISPLAY,
    CMD_SET_CLOCK_DIVIDE, 0x80,
    CMD_CHARGE_PUMP, 0x14,
    CMD_SET_VCOMH, 0x40,
    CMD_SET_PRECHARGE, 0xF1,
];

// ---------------------------------------------------------------------------
// One display page as a draw target
// ---------------------------------------------------------------------------

/// 128 columns x 8 rows; bit n of a column byte is row n.
pub struct PageStrip {
    pub columns: [u8; OLED_WIDTH],
}

impl PageStrip {
    pub fn new() -> Self {
        Self {
            columns: [0; OLED_WIDTH],
        }
    }

    /// Draw `text` starting at `column`; returns the column range touched.
    pub fn draw_text(&mut self, column: usize, text: &str) -> core::ops::Range<usize> {
        let style = MonoTextStyle::new(&FONT_5X7, BinaryColor::On);
        let origin = Point::new(column as i32, 0);
        let next = match Text::with_baseline(text, origin, style, Baseline::Top).draw(self) {
            Ok(next) => next,
            Err(never) => match never {},
        };
        let end = usize::try_from(next.x).unwrap_or(0).min(OLED_WIDTH);
        column.min(end)..end
    }
}

impl Default for PageStrip {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for PageStrip {
    fn size(&self) -> Size {
        Size::new(OLED_WIDTH as u32, 8)
    }
}

impl DrawTarget for PageStrip {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (usize::try_from(point.x), u8::try_from(point.y)) else {
                continue;
            };
            if x >= OLED_WIDTH || y >= 8 {
                continue;
            }
            let bit = 1u8 << y;
            if color.is_on() {
                self.columns[x] |= bit;
            } else {
                self.columns[x] &= !bit;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Ssd1306 {
    spi: &'static SpiEndpoint,
    device: Option<DeviceHandle>,
}

impl Ssd1306 {
    pub fn new(spi: &'static SpiEndpoint) -> Self {
        Self { spi, device: None }
    }

    /// Register the panel with the SPI task.
    pub fn attach(&mut self, cs_pin: u8) -> Result<DeviceHandle, TransportError> {
        let reply = self.spi.transaction(SpiMsg::add_device(cs_pin));
        reply.status?;
        let device = reply.device.ok_or(TransportError::NoDevice)?;
        self.device = Some(device);
        Ok(device)
    }

    fn send(&self, mode: LineMode, bytes: &[u8]) -> Result<(), TransportError> {
        let device = self.device.ok_or(TransportError::NoDevice)?;
        self.spi.call(SpiMsg::transfer(device, mode, bytes)?).status
    }

    pub fn init(&self) -> Result<(), TransportError> {
        let _bus = self.spi.lock();
        self.send(LineMode::Command, &INIT_SEQUENCE)?;
        self.send(LineMode::Command, &[CMD_DISPLAY_ON])?;
        log::info!("SSD1306 initialised (128x32)");
        Ok(())
    }

    fn position_commands(page: u8, column: u8) -> [u8; 3] {
        [
            CMD_PAGE_ADDRESS | (page & 0x07),
            CMD_COLUMN_HIGH | (column >> 4),
            CMD_COLUMN_LOW | (column & 0x0F),
        ]
    }

    /// Raw column bytes at (page, column), clipped to the right edge.
    pub fn write_raw(&self, page: u8, column: u8, bytes: &[u8]) -> Result<(), TransportError> {
        let room = OLED_WIDTH.saturating_sub(usize::from(column));
        let bytes = &bytes[..bytes.len().min(room)];
        let _bus = self.spi.lock();
        self.send(LineMode::Command, &Self::position_commands(page, column))?;
        self.send(LineMode::Data, bytes)
    }

    /// ASCII text at (page, column). Returns the number of columns written.
    pub fn write_text(&self, page: u8, column: u8, text: &str) -> Result<usize, TransportError> {
        let mut strip = PageStrip::new();
        let range = strip.draw_text(usize::from(column), text);
        let width = range.len();
        self.write_raw(page, column, &strip.columns[range])?;
        Ok(width)
    }

    pub fn clear(&self) -> Result<(), TransportError> {
        let blank = [0u8; OLED_WIDTH];
        for page in 0..OLED_PAGES {
            self.write_raw(page, 0, &blank)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lands_in_its_columns() {
        let mut strip = PageStrip::new();
        let range = strip.draw_text(10, "A");
        assert_eq!(range.start, 10);
        assert!(range.len() >= 5);
        assert!(strip.columns[range.clone()].iter().any(|&c| c != 0));
        assert!(strip.columns[..10].iter().all(|&c| c == 0));
        // 7-pixel font: the bottom row of the page stays dark.
        assert!(strip.columns.iter().all(|&c| c & 0x80 == 0));
    }

    #[test]
    fn text_is_clipped_at_the_edge() {
        let mut strip = PageStrip::new();
        let range = strip.draw_text(120, "WXYZ");
        assert_eq!(range.end, OLED_WIDTH);
    }

    #[test]
    fn position_encodes_page_and_column_nibbles() {
        assert_eq!(Ssd1306::position_commands(3, 0x5A), [0xB3, 0x15, 0x0A]);
    }
}
