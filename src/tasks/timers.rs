// PingZee - Timer Control Task
//
// Task-side front end of the timer multiplexer: channel programming goes
// through here so it is serialised with every other timer request. Alarm
// delivery bypasses the task (ISR -> handler or dedicated mailbox).

use crate::config::{RESULT_QUEUE_LEN, TIMERS_QUEUE_LEN};
use crate::drivers::timer_bank::{TimerBank, TimerChannel};
use crate::events::AlarmHandler;
use crate::fault;
use crate::platform::stack_headroom;
use crate::tasks::worker::{Done, Endpoint, Handler, Message};

pub type TimerEndpoint = Endpoint<TimerMsg, TIMERS_QUEUE_LEN, RESULT_QUEUE_LEN>;

#[derive(Clone, Copy)]
pub enum TimerCmd {
    Init {
        alarm_ticks: u64,
        handler: Option<AlarmHandler>,
    },
    Start,
    Stop,
    /// Read the counter into `value`.
    Value,
    /// Thread stack headroom into `value`.
    StackRoom,
}

impl core::fmt::Debug for TimerCmd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Init { alarm_ticks, handler } => f
                .debug_struct("Init")
                .field("alarm_ticks", alarm_ticks)
                .field("handler", &handler.is_some())
                .finish(),
            Self::Start => f.write_str("Start"),
            Self::Stop => f.write_str("Stop"),
            Self::Value => f.write_str("Value"),
            Self::StackRoom => f.write_str("StackRoom"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimerMsg {
    pub cmd: TimerCmd,
    pub channel: u8,
    pub value: u64,
    pub done: Done<TimerMsg>,
}

impl Message for TimerMsg {
    fn done(&self) -> Done<Self> {
        self.done
    }
}

impl TimerMsg {
    pub fn new(channel: u8, cmd: TimerCmd) -> Self {
        Self {
            cmd,
            channel,
            value: 0,
            done: Done::Reply,
        }
    }

    pub fn init(channel: u8, alarm_ticks: u64, handler: Option<AlarmHandler>) -> Self {
        Self::new(channel, TimerCmd::Init { alarm_ticks, handler })
    }

    pub fn start(channel: u8) -> Self {
        Self::new(channel, TimerCmd::Start)
    }

    pub fn stop(channel: u8) -> Self {
        Self::new(channel, TimerCmd::Stop)
    }

    pub fn value(channel: u8) -> Self {
        Self::new(channel, TimerCmd::Value)
    }

    pub fn with_done(mut self, done: Done<TimerMsg>) -> Self {
        self.done = done;
        self
    }
}

pub struct TimerWorker {
    bank: &'static TimerBank,
}

impl TimerWorker {
    pub fn new(bank: &'static TimerBank) -> Self {
        Self { bank }
    }
}

impl Handler for TimerWorker {
    type Msg = TimerMsg;

    fn handle(&mut self, msg: &mut TimerMsg) {
        if let TimerCmd::StackRoom = msg.cmd {
            msg.value = stack_headroom().map_or(0, u64::from);
            return;
        }
        let channel = TimerChannel::from_index(msg.channel);
        match msg.cmd {
            TimerCmd::Init { alarm_ticks, handler } => {
                if let Err(e) = self.bank.init(channel, alarm_ticks, handler) {
                    fault!("timer {} init: {}", msg.channel, e);
                }
            }
            TimerCmd::Start => self.bank.start(channel),
            TimerCmd::Stop => self.bank.stop(channel),
            TimerCmd::Value | TimerCmd::StackRoom => {}
        }
        msg.value = self.bank.counter_value(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::timer_bank::ticks_for_secs;
    use crate::platform::sim::SimTimers;
    use crate::platform::TimerHal;
    use crate::tasks::worker;
    use std::sync::Arc;

    #[test]
    fn worker_programs_the_bank() {
        let sim = Arc::new(SimTimers::new());
        let hal: Arc<dyn TimerHal> = sim.clone();
        let bank: &'static TimerBank = Box::leak(Box::new(TimerBank::new(hal)));
        let ep: &'static TimerEndpoint = Box::leak(Box::new(TimerEndpoint::new("timers")));
        assert!(worker::spawn(ep, TimerWorker::new(bank), &[], 16 * 1024).is_ok());

        let period = ticks_for_secs(1);
        assert_eq!(ep.call(TimerMsg::init(2, period, None)).value, 0);
        ep.call(TimerMsg::start(2));
        sim.advance(period / 2);
        assert_eq!(ep.call(TimerMsg::value(2)).value, period / 2);
        sim.advance(period / 2);
        let ch = TimerChannel::from_index(2);
        assert!(bank.wait_event_timeout(ch, std::time::Duration::from_secs(1)).is_some());
        assert_eq!(ep.call(TimerMsg::stop(2)).value, 0);
        assert!(!sim.is_running(ch.unit()));
    }
}
