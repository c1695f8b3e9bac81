// PingZee - Platform Capabilities
//
// Everything the core needs from the chip, expressed as traits. `esp`
// implements them with ESP-IDF; `sim` implements them in memory for the
// host simulator and the test suite. The I2C transport is the
// `embedded_hal::i2c::I2c` trait directly.

use crate::error::{HalError, TransportError};
use crate::events::IsrHandler;
use crate::power::WakeCause;

#[cfg(target_os = "espidf")]
pub mod esp;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

// ---------------------------------------------------------------------------
// Hardware timers
// ---------------------------------------------------------------------------

/// One of the four (group, sub-timer) units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerUnit {
    pub group: u8,
    pub index: u8,
}

/// Timer-group hardware. Every method takes `&self`: the task side and the
/// ISR side both touch it.
pub trait TimerHal: Send + Sync {
    /// Divider, count-up, auto-reload, alarm at `alarm_ticks`, paused,
    /// counter at zero, interrupt disabled and any pending flag cleared.
    fn configure(&self, unit: TimerUnit, divider: u32, alarm_ticks: u64) -> Result<(), HalError>;
    /// Bind `isr` to the unit's alarm interrupt, replacing any previous one.
    fn attach_isr(&self, unit: TimerUnit, isr: IsrHandler) -> Result<(), HalError>;
    fn start(&self, unit: TimerUnit);
    fn pause(&self, unit: TimerUnit);
    fn enable_interrupt(&self, unit: TimerUnit);
    fn disable_interrupt(&self, unit: TimerUnit);
    fn set_counter(&self, unit: TimerUnit, value: u64);
    fn counter(&self, unit: TimerUnit) -> u64;
    /// ISR side: acknowledge the interrupt flag.
    fn clear_interrupt(&self, unit: TimerUnit);
    /// ISR side: set the alarm-enable bit again after it fired.
    fn rearm_alarm(&self, unit: TimerUnit);
}

// ---------------------------------------------------------------------------
// SPI
// ---------------------------------------------------------------------------

/// Opaque handle returned by device registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(pub u8);

/// State of the data/command line for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    Command,
    Data,
}

pub trait SpiHost: Send {
    fn add_device(&mut self, cs_pin: u8) -> Result<DeviceHandle, TransportError>;
    fn transfer(&mut self, device: DeviceHandle, mode: LineMode, bytes: &[u8]) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// GPIO interrupt line
// ---------------------------------------------------------------------------

/// An edge-triggered input. The interrupt disarms itself after firing and
/// must be enabled again once the event has been handled.
pub trait InterruptLine: Send {
    fn pin(&self) -> u8;
    fn attach(&mut self, isr: IsrHandler) -> Result<(), HalError>;
    fn enable(&mut self) -> Result<(), HalError>;
}

// ---------------------------------------------------------------------------
// Sleep / wake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeLevel {
    AllLow,
    AnyHigh,
}

pub trait SleepControl: Send {
    /// Wall-clock milliseconds that keep counting through deep sleep.
    fn now_ms(&self) -> u64;
    fn wake_cause(&self) -> WakeCause;
    fn arm_timer_wakeup(&mut self, secs: u32) -> Result<(), HalError>;
    fn arm_ext_wakeup(&mut self, pin_mask: u64, level: WakeLevel) -> Result<(), HalError>;
    /// Retained across deep sleep, lost on power loss.
    fn store_sleep_entry(&mut self, ms: u64);
    fn sleep_entry(&self) -> Option<u64>;
    fn enter_sleep(&mut self) -> !;
}

// ---------------------------------------------------------------------------
// Task introspection
// ---------------------------------------------------------------------------

/// Minimum free stack of the calling thread, in bytes, when the platform
/// tracks it.
#[cfg(target_os = "espidf")]
pub fn stack_headroom() -> Option<u32> {
    Some(unsafe { esp_idf_sys::uxTaskGetStackHighWaterMark(core::ptr::null_mut()) })
}

#[cfg(not(target_os = "espidf"))]
pub fn stack_headroom() -> Option<u32> {
    None
}

#[cfg(target_os = "espidf")]
pub fn free_heap() -> Option<u32> {
    Some(unsafe { esp_idf_sys::esp_get_free_heap_size() })
}

#[cfg(not(target_os = "espidf"))]
pub fn free_heap() -> Option<u32> {
    None
}
