// PingZee - Simulated Board
//
// In-memory stand-ins for the ESP32 peripherals so the whole task system runs
// on a development host. Each simulated part is a cheap `Clone` handle onto
// shared state: one clone goes into the system, the other stays with the
// caller to drive interrupts and inspect traffic.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::config::{I2C_ADDR_EEPROM, I2C_ADDR_LIS3DH, SPI_MAX_DEVICES, TIMER_CHANNELS, TIMER_SCALE};
use crate::drivers::lis3dh;
use crate::error::{HalError, TransportError};
use crate::events::IsrHandler;
use crate::platform::{DeviceHandle, InterruptLine, LineMode, SleepControl, SpiHost, TimerHal, TimerUnit, WakeLevel};
use crate::power::WakeCause;

type SharedIsr = Arc<dyn Fn() + Send + Sync>;

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Timer groups
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct UnitState {
    alarm: u64,
    counter: u64,
    running: bool,
    irq_enabled: bool,
    alarm_armed: bool,
    pending: bool,
}

/// Timer bank whose time only moves when [`SimTimers::advance`] is called,
/// either by a test or by the background clock thread.
pub struct SimTimers {
    units: Mutex<[UnitState; TIMER_CHANNELS]>,
    isrs: Mutex<[Option<SharedIsr>; TIMER_CHANNELS]>,
}

impl SimTimers {
    pub fn new() -> Self {
        Self {
            units: Mutex::new([UnitState::default(); TIMER_CHANNELS]),
            isrs: Mutex::new(Default::default()),
        }
    }

    fn slot(unit: TimerUnit) -> usize {
        usize::from(unit.group) * 2 + usize::from(unit.index)
    }

    fn with_unit<R>(&self, unit: TimerUnit, f: impl FnOnce(&mut UnitState) -> R) -> R {
        f(&mut locked(&self.units)[Self::slot(unit)])
    }

    /// Let `ticks` timer ticks pass on every running unit, calling the ISR
    /// once for every alarm crossing while the interrupt is enabled.
    pub fn advance(&self, ticks: u64) {
        for slot in 0..TIMER_CHANNELS {
            let mut remaining = ticks;
            loop {
                let isr = {
                    let mut units = locked(&self.units);
                    let u = &mut units[slot];
                    if !u.running {
                        break;
                    }
                    let to_alarm = u.alarm.saturating_sub(u.counter);
                    if u.alarm == 0 || remaining < to_alarm {
                        u.counter += remaining;
                        break;
                    }
                    remaining -= to_alarm;
                    u.counter = 0;
                    if !(u.irq_enabled && u.alarm_armed) {
                        continue;
                    }
                    u.alarm_armed = false;
                    u.pending = true;
                    locked(&self.isrs)[slot].clone()
                };
                // ISR runs without the state lock; it calls back into the HAL.
                if let Some(isr) = isr {
                    isr();
                }
            }
        }
    }

    /// Drive the bank from wall-clock time on a background thread.
    pub fn spawn_clock(self: &Arc<Self>, step: Duration) -> anyhow::Result<()> {
        let timers = Arc::clone(self);
        let ticks = TIMER_SCALE * step.as_millis() as u64 / 1000;
        thread::Builder::new()
            .name("sim-clock".into())
            .spawn(move || loop {
                thread::sleep(step);
                timers.advance(ticks);
            })?;
        Ok(())
    }

    pub fn is_running(&self, unit: TimerUnit) -> bool {
        self.with_unit(unit, |u| u.running)
    }

    pub fn interrupt_pending(&self, unit: TimerUnit) -> bool {
        self.with_unit(unit, |u| u.pending)
    }
}

impl Default for SimTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHal for SimTimers {
    fn configure(&self, unit: TimerUnit, _divider: u32, alarm_ticks: u64) -> Result<(), HalError> {
        self.with_unit(unit, |u| {
            *u = UnitState {
                alarm: alarm_ticks,
                alarm_armed: true,
                ..UnitState::default()
            }
        });
        Ok(())
    }

    fn attach_isr(&self, unit: TimerUnit, isr: IsrHandler) -> Result<(), HalError> {
        locked(&self.isrs)[Self::slot(unit)] = Some(Arc::from(isr));
        Ok(())
    }

    fn start(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.running = true);
    }

    fn pause(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.running = false);
    }

    fn enable_interrupt(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.irq_enabled = true);
    }

    fn disable_interrupt(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.irq_enabled = false);
    }

    fn set_counter(&self, unit: TimerUnit, value: u64) {
        self.with_unit(unit, |u| u.counter = value);
    }

    fn counter(&self, unit: TimerUnit) -> u64 {
        self.with_unit(unit, |u| u.counter)
    }

    fn clear_interrupt(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.pending = false);
    }

    fn rearm_alarm(&self, unit: TimerUnit) {
        self.with_unit(unit, |u| u.alarm_armed = true);
    }
}

// ---------------------------------------------------------------------------
// I2C bus with register-file chips
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimChip {
    regs: [u8; 256],
    pointer: u8,
    // LIS3DH style: bit 7 of the sub-address selects auto-increment.
    strip_increment_bit: bool,
}

impl SimChip {
    fn write(&mut self, bytes: &[u8]) {
        let Some((&first, data)) = bytes.split_first() else {
            return;
        };
        self.pointer = if self.strip_increment_bit { first & 0x7F } else { first };
        for &b in data {
            self.regs[usize::from(self.pointer)] = b;
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.regs[usize::from(self.pointer)];
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

#[derive(Clone, Default)]
pub struct SimI2cBus {
    chips: Arc<Mutex<BTreeMap<u8, SimChip>>>,
}

impl SimI2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// LIS3DH at rest (1 g on Z) plus the EEPROM.
    pub fn with_board_devices() -> Self {
        let bus = Self::new();
        bus.add_chip(I2C_ADDR_LIS3DH, true);
        bus.set_register(I2C_ADDR_LIS3DH, lis3dh::REG_WHO_AM_I, lis3dh::WHO_AM_I_VALUE);
        bus.set_axis_raw(lis3dh::REG_OUT_Z_L, 15987);
        bus.set_register(I2C_ADDR_LIS3DH, lis3dh::REG_INT1_SRC, 0x48);
        bus.add_chip(I2C_ADDR_EEPROM, false);
        bus
    }

    pub fn add_chip(&self, address: u8, strip_increment_bit: bool) {
        locked(&self.chips).insert(
            address,
            SimChip {
                regs: [0; 256],
                pointer: 0,
                strip_increment_bit,
            },
        );
    }

    pub fn set_register(&self, address: u8, reg: u8, value: u8) {
        if let Some(chip) = locked(&self.chips).get_mut(&address) {
            chip.regs[usize::from(reg)] = value;
        }
    }

    pub fn register(&self, address: u8, reg: u8) -> Option<u8> {
        locked(&self.chips)
            .get(&address)
            .map(|chip| chip.regs[usize::from(reg)])
    }

    /// Store a little-endian axis sample on the LIS3DH.
    pub fn set_axis_raw(&self, low_reg: u8, raw: i16) {
        let [lo, hi] = raw.to_le_bytes();
        self.set_register(I2C_ADDR_LIS3DH, low_reg, lo);
        self.set_register(I2C_ADDR_LIS3DH, low_reg + 1, hi);
    }
}

impl ErrorType for SimI2cBus {
    type Error = ErrorKind;
}

impl I2c for SimI2cBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let mut chips = locked(&self.chips);
        let chip = chips
            .get_mut(&address)
            .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?;
        for op in operations {
            match op {
                Operation::Write(bytes) => chip.write(bytes),
                Operation::Read(buf) => chip.read(buf),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SPI host that records every transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRecord {
    pub device: DeviceHandle,
    pub mode: LineMode,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct SpiState {
    devices: Vec<u8>,
    transfers: Vec<SpiRecord>,
}

#[derive(Clone, Default)]
pub struct SimSpi {
    state: Arc<Mutex<SpiState>>,
}

impl SimSpi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> Vec<u8> {
        locked(&self.state).devices.clone()
    }

    pub fn take_transfers(&self) -> Vec<SpiRecord> {
        std::mem::take(&mut locked(&self.state).transfers)
    }
}

impl SpiHost for SimSpi {
    fn add_device(&mut self, cs_pin: u8) -> Result<DeviceHandle, TransportError> {
        let mut state = locked(&self.state);
        if state.devices.len() >= SPI_MAX_DEVICES {
            return Err(TransportError::DeviceTableFull);
        }
        state.devices.push(cs_pin);
        Ok(DeviceHandle((state.devices.len() - 1) as u8))
    }

    fn transfer(&mut self, device: DeviceHandle, mode: LineMode, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = locked(&self.state);
        if usize::from(device.0) >= state.devices.len() {
            return Err(TransportError::NoDevice);
        }
        state.transfers.push(SpiRecord {
            device,
            mode,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GPIO interrupt line
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LineState {
    isr: Option<SharedIsr>,
    enabled: bool,
    enables: u32,
}

#[derive(Clone)]
pub struct SimInterruptLine {
    pin: u8,
    state: Arc<Mutex<LineState>>,
}

impl SimInterruptLine {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            state: Arc::new(Mutex::new(LineState::default())),
        }
    }

    /// Raise an edge. Fires the ISR only while the interrupt is enabled and
    /// disarms it, like the device does. Returns whether the ISR ran.
    pub fn fire(&self) -> bool {
        let isr = {
            let mut state = locked(&self.state);
            if !state.enabled {
                return false;
            }
            state.enabled = false;
            state.isr.clone()
        };
        match isr {
            Some(isr) => {
                isr();
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        locked(&self.state).enabled
    }

    /// How many times the line has been (re)enabled.
    pub fn enable_count(&self) -> u32 {
        locked(&self.state).enables
    }
}

impl InterruptLine for SimInterruptLine {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn attach(&mut self, isr: IsrHandler) -> Result<(), HalError> {
        locked(&self.state).isr = Some(Arc::from(isr));
        Ok(())
    }

    fn enable(&mut self) -> Result<(), HalError> {
        let mut state = locked(&self.state);
        state.enabled = true;
        state.enables += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sleep controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SleepRecord {
    pub timer_wakeup_secs: Option<u32>,
    pub ext_wakeup: Option<(u64, WakeLevel)>,
    pub sleep_entry: Option<u64>,
    pub entered: u32,
}

struct SleepState {
    wake_cause: WakeCause,
    manual_now: Option<u64>,
    record: SleepRecord,
}

struct SleepShared {
    state: Mutex<SleepState>,
    entered: Condvar,
    epoch: Instant,
}

/// Records what deep-sleep entry would have programmed. `enter_sleep`
/// parks the calling thread for good, as the real call never returns.
#[derive(Clone)]
pub struct SimSleep {
    shared: Arc<SleepShared>,
}

impl SimSleep {
    /// Cold boot with a wall clock.
    pub fn new() -> Self {
        Self::build(WakeCause::Undefined, None, None)
    }

    /// Pretend the device resumed from deep sleep entered at `entry_ms`,
    /// with the clock frozen at `now_ms`.
    pub fn resumed(cause: WakeCause, entry_ms: u64, now_ms: u64) -> Self {
        Self::build(cause, Some(entry_ms), Some(now_ms))
    }

    fn build(wake_cause: WakeCause, sleep_entry: Option<u64>, manual_now: Option<u64>) -> Self {
        Self {
            shared: Arc::new(SleepShared {
                state: Mutex::new(SleepState {
                    wake_cause,
                    manual_now,
                    record: SleepRecord {
                        timer_wakeup_secs: None,
                        ext_wakeup: None,
                        sleep_entry,
                        entered: 0,
                    },
                }),
                entered: Condvar::new(),
                epoch: Instant::now(),
            }),
        }
    }

    pub fn set_now(&self, ms: u64) {
        locked(&self.shared.state).manual_now = Some(ms);
    }

    pub fn record(&self) -> SleepRecord {
        locked(&self.shared.state).record.clone()
    }

    /// `true` once some thread entered deep sleep within `timeout`.
    pub fn wait_for_sleep(&self, timeout: Duration) -> bool {
        let state = locked(&self.shared.state);
        let (state, _) = self
            .shared
            .entered
            .wait_timeout_while(state, timeout, |s| s.record.entered == 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.record.entered > 0
    }
}

impl Default for SimSleep {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepControl for SimSleep {
    fn now_ms(&self) -> u64 {
        let state = locked(&self.shared.state);
        state
            .manual_now
            .unwrap_or_else(|| self.shared.epoch.elapsed().as_millis() as u64)
    }

    fn wake_cause(&self) -> WakeCause {
        locked(&self.shared.state).wake_cause
    }

    fn arm_timer_wakeup(&mut self, secs: u32) -> Result<(), HalError> {
        locked(&self.shared.state).record.timer_wakeup_secs = Some(secs);
        Ok(())
    }

    fn arm_ext_wakeup(&mut self, pin_mask: u64, level: WakeLevel) -> Result<(), HalError> {
        locked(&self.shared.state).record.ext_wakeup = Some((pin_mask, level));
        Ok(())
    }

    fn store_sleep_entry(&mut self, ms: u64) {
        locked(&self.shared.state).record.sleep_entry = Some(ms);
    }

    fn sleep_entry(&self) -> Option<u64> {
        locked(&self.shared.state).record.sleep_entry
    }

    fn enter_sleep(&mut self) -> ! {
        locked(&self.shared.state).record.entered += 1;
        self.shared.entered.notify_all();
        loop {
            thread::park();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chip_nacks() {
        let mut bus = SimI2cBus::new();
        let mut buf = [0u8; 1];
        assert_eq!(
            bus.read(0x42, &mut buf),
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        );
    }

    #[test]
    fn register_file_auto_increments() {
        let mut bus = SimI2cBus::with_board_devices();
        bus.set_axis_raw(lis3dh::REG_OUT_X_L, -2);
        let mut buf = [0u8; 2];
        assert!(bus.write_read(I2C_ADDR_LIS3DH, &[lis3dh::REG_OUT_X_L | 0x80], &mut buf).is_ok());
        assert_eq!(i16::from_le_bytes(buf), -2);
    }

    #[test]
    fn interrupt_line_disarms_after_firing() {
        let mut line = SimInterruptLine::new(25);
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        assert!(line.attach(Box::new(move || *locked(&counter) += 1)).is_ok());
        assert!(!line.fire());
        assert!(line.enable().is_ok());
        assert!(line.fire());
        assert!(!line.fire());
        assert_eq!(*locked(&hits), 1);
        assert_eq!(line.enable_count(), 1);
    }

    #[test]
    fn spi_rejects_unregistered_device() {
        let mut spi = SimSpi::new();
        assert_eq!(
            spi.transfer(DeviceHandle(0), LineMode::Data, &[1]),
            Err(TransportError::NoDevice)
        );
        let dev = spi.add_device(5);
        assert_eq!(dev, Ok(DeviceHandle(0)));
    }
}
