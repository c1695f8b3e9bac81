// PingZee - Hardware & System Configuration
// Target: ESP32 (Xtensa) devkit with LIS3DH accelerometer, SSD1306 SPI OLED
// and AT30TSE758 temperature sensor / EEPROM.

use std::time::Duration;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions
// ---------------------------------------------------------------------------
pub const PIN_I2C_SDA: i32 = 21;
pub const PIN_I2C_SCL: i32 = 22;
pub const PIN_SPI_MISO: i32 = 19;
pub const PIN_SPI_MOSI: i32 = 23;
pub const PIN_SPI_CLK: i32 = 18;
pub const PIN_OLED_CS: u8 = 5;
pub const PIN_OLED_DC: i32 = 26;
pub const PIN_OLED_RST: i32 = 27;
pub const PIN_LIS3DH_INT: u8 = 25; // RTC-capable, doubles as the deep-sleep wake pin

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_FREQ_HZ: u32 = 100_000;
pub const I2C_ADDR_LIS3DH: u8 = 0x19;
pub const I2C_ADDR_EEPROM: u8 = 0x57;
pub const I2C_MAX_PAYLOAD: usize = 8;
pub const I2C_CONTINUE_RW_DELAY: Duration = Duration::from_micros(50);

// ---------------------------------------------------------------------------
// SPI Bus
// ---------------------------------------------------------------------------
pub const SPI_FREQ_HZ: u32 = 10_000_000;
pub const SPI_MAX_DEVICES: usize = 3;

// ---------------------------------------------------------------------------
// Display (SSD1306 OLED, 128x32)
// ---------------------------------------------------------------------------
pub const OLED_WIDTH: usize = 128;
pub const OLED_PAGES: u8 = 4;

// ---------------------------------------------------------------------------
// Mailbox Depths (messages)
// ---------------------------------------------------------------------------
pub const APP_QUEUE_LEN: usize = 3;
pub const TIMERS_QUEUE_LEN: usize = 2;
pub const I2C_QUEUE_LEN: usize = 2;
pub const SPI_QUEUE_LEN: usize = 4;
pub const OLED_QUEUE_LEN: usize = 4;
pub const OLED_RESULT_LEN: usize = 2;
pub const LIS3DH_QUEUE_LEN: usize = 2;
pub const RESULT_QUEUE_LEN: usize = 1;

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_APP: usize = 6144;
pub const STACK_TIMERS: usize = 4096;
pub const STACK_I2C: usize = 4096;
pub const STACK_SPI: usize = 4096;
pub const STACK_OLED: usize = 6144;
pub const STACK_LIS3DH: usize = 4096;
pub const STACK_WATCHDOG: usize = 4096;
pub const STACK_CONSOLE: usize = 8192;

// ---------------------------------------------------------------------------
// Synchronisation Timeouts
// ---------------------------------------------------------------------------
pub const REQUEST_PUT_TIMEOUT: Duration = Duration::from_millis(100); // 10 ticks
pub const RESULT_PUT_TIMEOUT: Duration = Duration::from_millis(10);
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Hardware Timers
// ---------------------------------------------------------------------------
pub const TIMER_CHANNELS: usize = 4;
pub const TIMER_BASE_CLK_HZ: u64 = 80_000_000;
pub const TIMER_DIVIDER: u32 = 16;
pub const TIMER_SCALE: u64 = TIMER_BASE_CLK_HZ / TIMER_DIVIDER as u64; // ticks per second

// ---------------------------------------------------------------------------
// Power Management
// ---------------------------------------------------------------------------
pub const WAKE_WINDOW_SECS: u32 = 20;
pub const DEEP_SLEEP_SECS: u32 = 20;
pub const WATCHDOG_CHANNEL: u8 = 0;
pub const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Runtime-tunable subset
// ---------------------------------------------------------------------------

/// Power-cycle parameters. Defaults come from the constants above; tests
/// shorten the windows.
#[derive(Debug, Clone, Copy)]
pub struct PowerConfig {
    pub wake_window_secs: u32,
    pub sleep_secs: u32,
    pub wake_pin: u8,
    pub watchdog_channel: u8,
    pub watchdog_grace: Duration,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            wake_window_secs: WAKE_WINDOW_SECS,
            sleep_secs: DEEP_SLEEP_SECS,
            wake_pin: PIN_LIS3DH_INT,
            watchdog_channel: WATCHDOG_CHANNEL,
            watchdog_grace: WATCHDOG_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemConfig {
    pub power: PowerConfig,
    pub lock_timeout: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            power: PowerConfig::default(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }
}
