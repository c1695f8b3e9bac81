// PingZee - Hardware Timer Multiplexer
//
// Four count-up alarm channels over two timer groups:
//
//   channel 0 -> group 0 / timer 0      channel 2 -> group 1 / timer 0
//   channel 1 -> group 0 / timer 1      channel 3 -> group 1 / timer 1
//
// The alarm ISR acknowledges the interrupt, re-arms the alarm, then either
// calls the channel's registered handler or posts a `TimerEvent` to the
// channel's dedicated single-slot mailbox.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{TIMER_CHANNELS, TIMER_DIVIDER, TIMER_SCALE};
use crate::error::HalError;
use crate::events::{AlarmHandler, TimerEvent};
use crate::fault;
use crate::platform::{TimerHal, TimerUnit};
use crate::sync::Mailbox;

/// Alarm ticks for a period of `secs` seconds at the fixed divider.
pub fn ticks_for_secs(secs: u32) -> u64 {
    u64::from(secs) * TIMER_SCALE
}

// ---------------------------------------------------------------------------
// Channel index
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerChannel(u8);

impl TimerChannel {
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < TIMER_CHANNELS).then_some(Self(index))
    }

    /// Out-of-range indices are a programming error and halt.
    #[track_caller]
    pub fn from_index(index: u8) -> Self {
        match Self::new(index) {
            Some(ch) => ch,
            None => fault!("timer channel {} out of range", index),
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn unit(self) -> TimerUnit {
        TimerUnit {
            group: self.0 / 2,
            index: self.0 % 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Bank
// ---------------------------------------------------------------------------

const OUTBOX_NAMES: [&str; TIMER_CHANNELS] = ["timer0", "timer1", "timer2", "timer3"];

pub struct TimerBank {
    hal: Arc<dyn TimerHal>,
    outboxes: [Mailbox<TimerEvent, 1>; TIMER_CHANNELS],
    /// Alarms since the channel was last initialised.
    alarms: [AtomicU32; TIMER_CHANNELS],
}

impl TimerBank {
    pub fn new(hal: Arc<dyn TimerHal>) -> Self {
        Self {
            hal,
            outboxes: OUTBOX_NAMES.map(Mailbox::new),
            alarms: [0; TIMER_CHANNELS].map(AtomicU32::new),
        }
    }

    /// Program `channel` for `alarm_ticks` and bind its ISR. With no
    /// `handler` the alarm posts to the dedicated mailbox. Leaves the
    /// channel paused with its counter at zero.
    pub fn init(
        &'static self,
        channel: TimerChannel,
        alarm_ticks: u64,
        handler: Option<AlarmHandler>,
    ) -> Result<(), HalError> {
        let unit = channel.unit();
        self.hal.configure(unit, TIMER_DIVIDER, alarm_ticks)?;
        while self.outbox(channel).try_get().is_some() {}
        self.alarms[usize::from(channel.index())].store(0, Ordering::SeqCst);
        self.hal
            .attach_isr(unit, Box::new(move || self.on_alarm(channel, handler)))?;
        log::debug!("timer {} armed for {} ticks", channel.index(), alarm_ticks);
        Ok(())
    }

    pub fn start(&self, channel: TimerChannel) {
        let unit = channel.unit();
        self.hal.enable_interrupt(unit);
        self.hal.start(unit);
    }

    pub fn stop(&self, channel: TimerChannel) {
        let unit = channel.unit();
        self.hal.pause(unit);
        self.hal.disable_interrupt(unit);
        self.hal.set_counter(unit, 0);
    }

    pub fn counter_value(&self, channel: TimerChannel) -> u64 {
        self.hal.counter(channel.unit())
    }

    /// ISR body for one channel.
    fn on_alarm(&self, channel: TimerChannel, handler: Option<AlarmHandler>) {
        let unit = channel.unit();
        self.hal.clear_interrupt(unit);
        self.hal.rearm_alarm(unit);
        self.alarms[usize::from(channel.index())].fetch_add(1, Ordering::SeqCst);
        let event = TimerEvent {
            channel: channel.index(),
        };
        match handler {
            Some(handler) => handler(event),
            None => {
                self.post_default(event);
            }
        }
    }

    /// Default alarm action. A custom handler may finish with this to also
    /// wake a blocked receiver. An unread previous event means this one is
    /// dropped.
    pub fn post_default(&self, event: TimerEvent) -> bool {
        self.outbox(TimerChannel::from_index(event.channel))
            .post_from_isr(event)
    }

    /// Alarms fired since the last `init` of `channel`, whoever consumed them.
    pub fn alarm_count(&self, channel: TimerChannel) -> u32 {
        self.alarms[usize::from(channel.index())].load(Ordering::SeqCst)
    }

    pub fn outbox(&self, channel: TimerChannel) -> &Mailbox<TimerEvent, 1> {
        &self.outboxes[usize::from(channel.index())]
    }

    pub fn wait_event_timeout(&self, channel: TimerChannel, timeout: Duration) -> Option<TimerEvent> {
        self.outbox(channel).get_timeout(timeout)
    }
}
