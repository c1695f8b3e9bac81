// PingZee - ESP32 Platform
//
// ESP-IDF implementations of the platform traits. Timer groups use the
// legacy group/index driver, sleep control the raw `esp_sleep_*` API; SPI and
// GPIO go through esp-idf-hal.

use core::ffi::c_void;
use std::sync::{Arc, Mutex, PoisonError};

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Input, InputPin, InterruptType, Output, OutputPin, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use esp_idf_hal::spi::{config as spi_config, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_sys::{self as sys, esp_err_t, EspError};

use crate::config::{I2C_FREQ_HZ, PIN_LIS3DH_INT, SPI_FREQ_HZ, SPI_MAX_DEVICES, TIMER_CHANNELS};
use crate::error::{HalError, TransportError};
use crate::events::IsrHandler;
use crate::platform::{DeviceHandle, InterruptLine, LineMode, SleepControl, SpiHost, TimerHal, TimerUnit, WakeLevel};
use crate::power::WakeCause;
use crate::sync::mailbox::take_isr_yield;
use crate::system::Board;

fn check(op: &'static str, code: esp_err_t) -> Result<(), HalError> {
    if code == sys::ESP_OK {
        Ok(())
    } else {
        Err(HalError::Platform { op, code })
    }
}

fn platform(op: &'static str) -> impl Fn(EspError) -> HalError {
    move |e| HalError::Platform { op, code: e.code() }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Claim the peripherals and build the board. Pin choice follows `config`.
pub fn take_board() -> anyhow::Result<Board<I2cDriver<'static>>> {
    let p = Peripherals::take()?;

    let i2c = I2cDriver::new(
        p.i2c0,
        p.pins.gpio21, // SDA
        p.pins.gpio22, // SCL
        &I2cConfig::new().baudrate(I2C_FREQ_HZ.Hz()),
    )?;

    let spi = EspSpi::new(
        p.spi2,
        p.pins.gpio18, // CLK
        p.pins.gpio23, // MOSI
        p.pins.gpio19, // MISO
        PinDriver::output(p.pins.gpio26.downgrade_output())?, // OLED DC
        PinDriver::output(p.pins.gpio27.downgrade_output())?, // OLED RST
    )?;

    let accel_irq = EspInterruptLine::new(PIN_LIS3DH_INT, PinDriver::input(p.pins.gpio25.downgrade_input())?)?;

    Ok(Board {
        i2c,
        spi: Box::new(spi),
        timers: Arc::new(EspTimers::new()),
        sleep: Box::new(EspSleep),
        accel_irq: Box::new(accel_irq),
    })
}

// ---------------------------------------------------------------------------
// Timer groups
// ---------------------------------------------------------------------------

/// Legacy timer-group driver. The ISR argument is a leaked `IsrHandler`
/// box; it is reclaimed once its callback has been removed.
pub struct EspTimers {
    isrs: Mutex<[usize; TIMER_CHANNELS]>,
}

impl EspTimers {
    pub fn new() -> Self {
        Self {
            isrs: Mutex::new([0; TIMER_CHANNELS]),
        }
    }

    fn ids(unit: TimerUnit) -> (sys::timer_group_t, sys::timer_idx_t) {
        (unit.group as sys::timer_group_t, unit.index as sys::timer_idx_t)
    }

    fn slot(unit: TimerUnit) -> usize {
        usize::from(unit.group) * 2 + usize::from(unit.index)
    }
}

impl Default for EspTimers {
    fn default() -> Self {
        Self::new()
    }
}

unsafe extern "C" fn timer_trampoline(arg: *mut c_void) -> bool {
    let isr = &*(arg as *const IsrHandler);
    isr();
    // A post that woke a higher-priority task asks the driver to yield.
    take_isr_yield()
}

impl TimerHal for EspTimers {
    fn configure(&self, unit: TimerUnit, divider: u32, alarm_ticks: u64) -> Result<(), HalError> {
        let (group, index) = Self::ids(unit);
        let config = sys::timer_config_t {
            alarm_en: sys::timer_alarm_t_TIMER_ALARM_EN,
            counter_en: sys::timer_start_t_TIMER_PAUSE,
            intr_type: sys::timer_intr_mode_t_TIMER_INTR_LEVEL,
            counter_dir: sys::timer_count_dir_t_TIMER_COUNT_UP,
            auto_reload: sys::timer_autoreload_t_TIMER_AUTORELOAD_EN,
            divider,
            ..Default::default()
        };
        unsafe {
            check("timer_init", sys::timer_init(group, index, &config))?;
            check("timer_set_counter_value", sys::timer_set_counter_value(group, index, 0))?;
            check("timer_set_alarm_value", sys::timer_set_alarm_value(group, index, alarm_ticks))?;
            check("timer_disable_intr", sys::timer_disable_intr(group, index))?;
            sys::timer_group_clr_intr_status_in_isr(group, index);
        }
        Ok(())
    }

    fn attach_isr(&self, unit: TimerUnit, isr: IsrHandler) -> Result<(), HalError> {
        let (group, index) = Self::ids(unit);
        let mut isrs = self.isrs.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut isrs[Self::slot(unit)];
        if *slot != 0 {
            unsafe {
                sys::timer_isr_callback_remove(group, index);
                drop(Box::from_raw(*slot as *mut IsrHandler));
            }
            *slot = 0;
        }
        let arg = Box::into_raw(Box::new(isr));
        let code = unsafe {
            sys::timer_isr_callback_add(group, index, Some(timer_trampoline), arg as *mut c_void, 0)
        };
        if let Err(e) = check("timer_isr_callback_add", code) {
            drop(unsafe { Box::from_raw(arg) });
            return Err(e);
        }
        *slot = arg as usize;
        Ok(())
    }

    fn start(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_start(group, index) };
    }

    fn pause(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_pause(group, index) };
    }

    fn enable_interrupt(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_enable_intr(group, index) };
    }

    fn disable_interrupt(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_disable_intr(group, index) };
    }

    fn set_counter(&self, unit: TimerUnit, value: u64) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_set_counter_value(group, index, value) };
    }

    fn counter(&self, unit: TimerUnit) -> u64 {
        let (group, index) = Self::ids(unit);
        let mut value = 0u64;
        unsafe { sys::timer_get_counter_value(group, index, &mut value) };
        value
    }

    fn clear_interrupt(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_group_clr_intr_status_in_isr(group, index) };
    }

    fn rearm_alarm(&self, unit: TimerUnit) {
        let (group, index) = Self::ids(unit);
        unsafe { sys::timer_group_enable_alarm_in_isr(group, index) };
    }
}

// ---------------------------------------------------------------------------
// SPI host (VSPI) with the OLED data/command and reset lines
// ---------------------------------------------------------------------------

type Device = SpiDeviceDriver<'static, &'static SpiDriver<'static>>;

pub struct EspSpi {
    driver: &'static SpiDriver<'static>,
    devices: heapless::Vec<Device, SPI_MAX_DEVICES>,
    dc: PinDriver<'static, AnyOutputPin, Output>,
    _rst: PinDriver<'static, AnyOutputPin, Output>,
}

impl EspSpi {
    pub fn new(
        spi: esp_idf_hal::spi::SPI2,
        sclk: impl OutputPin + 'static,
        sdo: impl OutputPin + 'static,
        sdi: impl InputPin + 'static,
        dc: PinDriver<'static, AnyOutputPin, Output>,
        mut rst: PinDriver<'static, AnyOutputPin, Output>,
    ) -> anyhow::Result<Self> {
        let driver = SpiDriver::new(spi, sclk, sdo, Some(sdi), &SpiDriverConfig::new())?;
        // Panel reset pulse.
        rst.set_low()?;
        FreeRtos::delay_ms(10);
        rst.set_high()?;
        Ok(Self {
            driver: Box::leak(Box::new(driver)),
            devices: heapless::Vec::new(),
            dc,
            _rst: rst,
        })
    }
}

impl SpiHost for EspSpi {
    fn add_device(&mut self, cs_pin: u8) -> Result<DeviceHandle, TransportError> {
        if self.devices.is_full() {
            return Err(TransportError::DeviceTableFull);
        }
        // SAFETY: the pin number comes from the board configuration and is
        // not claimed by any other driver.
        let cs = unsafe { AnyOutputPin::new(i32::from(cs_pin)) };
        let config = spi_config::Config::new().baudrate(SPI_FREQ_HZ.Hz());
        let device = SpiDeviceDriver::new(self.driver, Some(cs), &config).map_err(|_| TransportError::Spi)?;
        self.devices.push(device).map_err(|_| TransportError::DeviceTableFull)?;
        Ok(DeviceHandle((self.devices.len() - 1) as u8))
    }

    fn transfer(&mut self, device: DeviceHandle, mode: LineMode, bytes: &[u8]) -> Result<(), TransportError> {
        let dev = self
            .devices
            .get_mut(usize::from(device.0))
            .ok_or(TransportError::NoDevice)?;
        let line = match mode {
            LineMode::Command => self.dc.set_low(),
            LineMode::Data => self.dc.set_high(),
        };
        line.map_err(|_| TransportError::Spi)?;
        dev.write(bytes).map_err(|_| TransportError::Spi)
    }
}

// ---------------------------------------------------------------------------
// GPIO interrupt line
// ---------------------------------------------------------------------------

pub struct EspInterruptLine {
    pin: u8,
    driver: PinDriver<'static, AnyInputPin, Input>,
}

impl EspInterruptLine {
    pub fn new(pin: u8, mut driver: PinDriver<'static, AnyInputPin, Input>) -> anyhow::Result<Self> {
        driver.set_interrupt_type(InterruptType::PosEdge)?;
        Ok(Self { pin, driver })
    }
}

impl InterruptLine for EspInterruptLine {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn attach(&mut self, isr: IsrHandler) -> Result<(), HalError> {
        // SAFETY: the handler only posts to a FreeRTOS queue from ISR context.
        unsafe { self.driver.subscribe(move || isr()) }.map_err(platform("gpio subscribe"))
    }

    fn enable(&mut self) -> Result<(), HalError> {
        self.driver.enable_interrupt().map_err(platform("gpio enable_interrupt"))
    }
}

// ---------------------------------------------------------------------------
// Deep sleep
// ---------------------------------------------------------------------------

const SLEEP_ENTRY_MAGIC: u32 = 0x5049_4e47;

// RTC slow memory survives deep sleep; it is reloaded from the image on a
// cold boot.
#[link_section = ".rtc.data"]
static mut SLEEP_ENTRY_MS: u64 = 0;
#[link_section = ".rtc.data"]
static mut SLEEP_ENTRY_VALID: u32 = 0;

pub struct EspSleep;

impl SleepControl for EspSleep {
    fn now_ms(&self) -> u64 {
        let mut tv = sys::timeval { tv_sec: 0, tv_usec: 0 };
        unsafe { sys::gettimeofday(&mut tv, core::ptr::null_mut()) };
        tv.tv_sec as u64 * 1000 + tv.tv_usec as u64 / 1000
    }

    fn wake_cause(&self) -> WakeCause {
        match unsafe { sys::esp_sleep_get_wakeup_cause() } {
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => WakeCause::ExternalPin {
                mask: unsafe { sys::esp_sleep_get_ext1_wakeup_status() },
            },
            _ => WakeCause::Undefined,
        }
    }

    fn arm_timer_wakeup(&mut self, secs: u32) -> Result<(), HalError> {
        let us = u64::from(secs) * 1_000_000;
        check("esp_sleep_enable_timer_wakeup", unsafe { sys::esp_sleep_enable_timer_wakeup(us) })
    }

    fn arm_ext_wakeup(&mut self, pin_mask: u64, level: WakeLevel) -> Result<(), HalError> {
        let mode = match level {
            WakeLevel::AllLow => sys::esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ALL_LOW,
            WakeLevel::AnyHigh => sys::esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ANY_HIGH,
        };
        check("esp_sleep_enable_ext1_wakeup", unsafe { sys::esp_sleep_enable_ext1_wakeup(pin_mask, mode) })
    }

    fn store_sleep_entry(&mut self, ms: u64) {
        unsafe {
            core::ptr::addr_of_mut!(SLEEP_ENTRY_MS).write_volatile(ms);
            core::ptr::addr_of_mut!(SLEEP_ENTRY_VALID).write_volatile(SLEEP_ENTRY_MAGIC);
        }
    }

    fn sleep_entry(&self) -> Option<u64> {
        unsafe {
            (core::ptr::addr_of!(SLEEP_ENTRY_VALID).read_volatile() == SLEEP_ENTRY_MAGIC)
                .then(|| core::ptr::addr_of!(SLEEP_ENTRY_MS).read_volatile())
        }
    }

    fn enter_sleep(&mut self) -> ! {
        unsafe { sys::esp_deep_sleep_start() }
    }
}
