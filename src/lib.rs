// PingZee - Firmware Core
//
// Resource-owning worker tasks connected by fixed-capacity mailboxes:
//   app       interrupt messages, wake-window and deep-sleep control
//   timers    four hardware alarm channels
//   i2c       I2C port 0 master (LIS3DH, EEPROM)
//   spi       VSPI master with up to three devices
//   oled      SSD1306 panel on SPI
//   lis3dh    accelerometer on I2C
//
// `platform` abstracts the chip: ESP-IDF on the device, an in-memory board
// on the host.

pub mod config;
pub mod console;
pub mod drivers;
pub mod error;
pub mod events;
pub mod fault;
pub mod isr;
pub mod platform;
pub mod power;
pub mod sync;
pub mod system;
pub mod tasks;
