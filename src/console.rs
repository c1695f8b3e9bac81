// PingZee - Serial Console
//
// Line-oriented shell on the UART (stdin on the host). Every command goes
// through the same locked transactions as the tasks use, so typing at the
// console never interleaves with firmware traffic on a resource.

use std::io::{BufRead, ErrorKind, Write};
use std::thread;
use std::time::Duration;

use crate::config::{I2C_ADDR_EEPROM, OLED_PAGES, OLED_WIDTH, TIMER_CHANNELS};
use crate::drivers::timer_bank::ticks_for_secs;
use crate::error::ConsoleError;
use crate::platform::free_heap;
use crate::system::System;
use crate::tasks::accel::AccelMsg;
use crate::tasks::app::{AppCmd, AppMsg};
use crate::tasks::display::DisplayMsg;
use crate::tasks::i2c::I2cMsg;
use crate::tasks::timers::{TimerCmd, TimerMsg};

const HELP: &str = "\
help\tList commands
res\tShow resources
i2c\tr|w <addr> <value>\tRead/Write EEPROM value from/to address (hex)
oled\t<line> <column> <string>|clean\tline [0-3], column [0-127]
accel\tRead the next accelerometer axis
timer\t<0-3> init|notify <secs>|start|stop|value
start\tOpen a wake window
stop\tStay awake until the next start
sleep\t<secs>\tEnter deep sleep";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    /// Program the alarm period. With `notify` the alarms go to the
    /// application task instead of the channel's own mailbox.
    Init { secs: u32, notify: bool },
    Start,
    Stop,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Resources,
    I2cRead { addr: u8 },
    I2cWrite { addr: u8, value: u8 },
    OledText { page: u8, column: u8, text: String },
    OledClean,
    Accel,
    Timer { channel: u8, op: TimerOp },
    Start,
    Stop,
    Sleep { secs: u32 },
}

/// First word of `s` and the remainder with leading blanks removed.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(at) => (&s[..at], s[at..].trim_start()),
        None => (s, ""),
    }
}

fn hex_u8(word: &str) -> Result<u8, ConsoleError> {
    let digits = word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);
    u8::from_str_radix(digits, 16).map_err(|_| ConsoleError::IncorrectParameter)
}

fn number<T: std::str::FromStr>(word: &str) -> Result<T, ConsoleError> {
    word.parse().map_err(|_| ConsoleError::IncorrectParameter)
}

fn secs(word: &str) -> Result<u32, ConsoleError> {
    match number(word)? {
        0 => Err(ConsoleError::IncorrectParameter),
        secs => Ok(secs),
    }
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let (name, rest) = split_word(line);
        let args: Vec<&str> = rest.split_whitespace().collect();
        let cmd = match (name, args.as_slice()) {
            ("", _) => return Ok(None),
            ("help", []) => Self::Help,
            ("res", []) => Self::Resources,
            ("i2c", ["r", addr]) => Self::I2cRead { addr: hex_u8(addr)? },
            ("i2c", ["w", addr, value]) => Self::I2cWrite {
                addr: hex_u8(addr)?,
                value: hex_u8(value)?,
            },
            ("oled", ["clean"]) => Self::OledClean,
            ("oled", [_, _, ..]) => Self::parse_oled_text(rest)?,
            ("accel", []) => Self::Accel,
            ("timer", [channel, op @ ..]) => Self::parse_timer(channel, op)?,
            ("start", []) => Self::Start,
            ("stop", []) => Self::Stop,
            ("sleep", [s]) => Self::Sleep { secs: secs(s)? },
            ("help" | "res" | "i2c" | "oled" | "accel" | "timer" | "start" | "stop" | "sleep", _) => {
                return Err(ConsoleError::IncorrectParameter)
            }
            (other, _) => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };
        Ok(Some(cmd))
    }

    fn parse_oled_text(rest: &str) -> Result<Self, ConsoleError> {
        let (page, rest) = split_word(rest);
        let (column, text) = split_word(rest);
        let page: u8 = number(page)?;
        let column: usize = number(column)?;
        if page >= OLED_PAGES || column >= OLED_WIDTH || text.is_empty() {
            return Err(ConsoleError::IncorrectParameter);
        }
        Ok(Self::OledText {
            page,
            column: column as u8,
            text: text.trim_end().to_string(),
        })
    }

    fn parse_timer(channel: &str, op: &[&str]) -> Result<Self, ConsoleError> {
        let channel: u8 = number(channel)?;
        if usize::from(channel) >= TIMER_CHANNELS {
            return Err(ConsoleError::IncorrectParameter);
        }
        let op = match op {
            ["init", s] => TimerOp::Init {
                secs: secs(s)?,
                notify: false,
            },
            ["notify", s] => TimerOp::Init {
                secs: secs(s)?,
                notify: true,
            },
            ["start"] => TimerOp::Start,
            ["stop"] => TimerOp::Stop,
            ["value"] => TimerOp::Value,
            _ => return Err(ConsoleError::IncorrectParameter),
        };
        Ok(Self::Timer { channel, op })
    }
}

/// Run `cmd` against the system and render what it prints.
pub fn execute(sys: &'static System, cmd: &ConsoleCommand) -> String {
    match cmd {
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Resources => resources(sys),
        ConsoleCommand::I2cRead { addr } => {
            let reply = I2cMsg::write_read(I2C_ADDR_EEPROM, &[*addr], 1).map(|m| sys.i2c.transaction(m));
            match reply.and_then(|r| r.received().map(|b| b[0])) {
                Ok(value) => format!("value 0x{:02x}", value),
                Err(e) => format!("*** ERROR: {}", e),
            }
        }
        ConsoleCommand::I2cWrite { addr, value } => {
            let reply = I2cMsg::write(I2C_ADDR_EEPROM, &[*addr, *value]).map(|m| sys.i2c.transaction(m));
            match reply.and_then(|r| r.status) {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("*** ERROR: {}", e),
            }
        }
        ConsoleCommand::OledText { page, column, text } => {
            match sys.display.transaction(DisplayMsg::show(*page, *column, text)).status {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("*** ERROR: {}", e),
            }
        }
        ConsoleCommand::OledClean => {
            let _panel = sys.display.lock();
            let failed = (0..OLED_PAGES)
                .map(|page| sys.display.call(DisplayMsg::clean(page, 0, OLED_WIDTH)).status)
                .find_map(Result::err);
            match failed {
                None => "OK".to_string(),
                Some(e) => format!("*** ERROR: {}", e),
            }
        }
        ConsoleCommand::Accel => {
            let reply = sys.accel.transaction(AccelMsg::poll());
            match (reply.status, reply.reading) {
                (Ok(()), Some(r)) => format!("{}: {:.3} g (raw {})", r.axis.label(), r.g, r.raw),
                (Err(e), _) => format!("*** ERROR: {}", e),
                (Ok(()), None) => "no reading".to_string(),
            }
        }
        ConsoleCommand::Timer { channel, op } => timer(sys, *channel, *op),
        ConsoleCommand::Start => {
            sys.start_main_loop();
            "main loop started".to_string()
        }
        ConsoleCommand::Stop => {
            sys.stop_main_loop();
            "main loop stopped".to_string()
        }
        ConsoleCommand::Sleep { secs } => {
            sys.enter_deep_sleep(*secs);
            format!("entering deep sleep for {} s", secs)
        }
    }
}

fn timer(sys: &'static System, channel: u8, op: TimerOp) -> String {
    let msg = match op {
        TimerOp::Init { secs, notify } => {
            let handler = notify.then(|| sys.alarm_bridge());
            TimerMsg::init(channel, ticks_for_secs(secs), handler)
        }
        TimerOp::Start => TimerMsg::start(channel),
        TimerOp::Stop => TimerMsg::stop(channel),
        TimerOp::Value => TimerMsg::value(channel),
    };
    let reply = sys.timers.transaction(msg);
    format!("timer {} value {}", channel, reply.value)
}

fn known_ms(ms: Option<u64>) -> String {
    ms.map_or_else(|| "n/a".to_string(), |ms| ms.to_string())
}

fn resources(sys: &'static System) -> String {
    let known = |v: Option<u32>| v.map_or_else(|| "n/a".to_string(), |v| v.to_string());
    let app = sys.app.transaction(AppMsg::new(AppCmd::StackRoom)).value;
    let timers = sys
        .timers
        .transaction(TimerMsg::new(0, TimerCmd::StackRoom))
        .value;
    let power = sys.power.snapshot();
    let resume = sys.resume_report();
    let mut out = String::new();
    out.push_str(&format!("RAM left {}\n", known(free_heap())));
    out.push_str(&format!("Console task stack: {}\n", known(crate::platform::stack_headroom())));
    out.push_str(&format!("App task stack: {}\n", app));
    out.push_str(&format!("Timer task stack: {}\n", timers));
    out.push_str(&format!("Wake cause: {:?}, slept: {} ms\n", resume.cause, known_ms(resume.slept_ms)));
    out.push_str(&format!("Wake window {}: {:?}", power.window, power.activity));
    out
}

/// Shell state: remembers the last accepted line so that an empty line
/// repeats it.
#[derive(Debug, Default)]
pub struct Console {
    last: Option<String>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one input line. `None` when there is nothing to print.
    pub fn process(&mut self, sys: &'static System, line: &str) -> Option<String> {
        let line = match (line.trim(), &self.last) {
            ("", Some(last)) => last.clone(),
            ("", None) => return None,
            (line, _) => line.to_string(),
        };
        match ConsoleCommand::parse(&line) {
            Ok(Some(cmd)) => {
                self.last = Some(line);
                Some(execute(sys, &cmd))
            }
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    /// Serve `input` until it closes. A non-blocking input (the UART on the
    /// device) is polled.
    pub fn run(
        &mut self,
        sys: &'static System,
        mut input: impl BufRead,
        mut output: impl Write,
    ) -> std::io::Result<()> {
        let mut line = String::new();
        prompt(&mut output)?;
        loop {
            let eof = match input.read_line(&mut line) {
                Ok(0) => true,
                Ok(_) if !line.ends_with('\n') => continue,
                Ok(_) => false,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    thread::sleep(INPUT_POLL);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if eof && line.is_empty() {
                return Ok(());
            }
            if let Some(text) = self.process(sys, &line) {
                writeln!(output, "{}", text)?;
            }
            line.clear();
            if eof {
                return Ok(());
            }
            prompt(&mut output)?;
        }
    }
}

const INPUT_POLL: Duration = Duration::from_millis(50);

fn prompt(output: &mut impl Write) -> std::io::Result<()> {
    write!(output, "> ")?;
    output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
        ConsoleCommand::parse(line)
    }

    #[test]
    fn eeprom_commands_take_hex() {
        assert_eq!(parse("i2c r 1f"), Ok(Some(ConsoleCommand::I2cRead { addr: 0x1f })));
        assert_eq!(
            parse("  i2c  w 0x10 AB "),
            Ok(Some(ConsoleCommand::I2cWrite { addr: 0x10, value: 0xab }))
        );
        assert_eq!(parse("i2c r"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("i2c x 10"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("i2c r 100"), Err(ConsoleError::IncorrectParameter));
    }

    #[test]
    fn oled_text_keeps_inner_spacing() {
        assert_eq!(
            parse("oled 2 10 hello  world"),
            Ok(Some(ConsoleCommand::OledText {
                page: 2,
                column: 10,
                text: "hello  world".into()
            }))
        );
        assert_eq!(parse("oled clean"), Ok(Some(ConsoleCommand::OledClean)));
        assert_eq!(parse("oled 4 0 x"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("oled 0 128 x"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("oled 0 0"), Err(ConsoleError::IncorrectParameter));
    }

    #[test]
    fn timer_channel_and_period_are_checked() {
        assert_eq!(
            parse("timer 3 notify 5"),
            Ok(Some(ConsoleCommand::Timer {
                channel: 3,
                op: TimerOp::Init { secs: 5, notify: true }
            }))
        );
        assert_eq!(
            parse("timer 0 value"),
            Ok(Some(ConsoleCommand::Timer {
                channel: 0,
                op: TimerOp::Value
            }))
        );
        assert_eq!(parse("timer 4 start"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("timer 1 init 0"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(parse("timer 1 reset"), Err(ConsoleError::IncorrectParameter));
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(parse("   "), Ok(None));
        assert_eq!(parse("sleep 30"), Ok(Some(ConsoleCommand::Sleep { secs: 30 })));
        assert_eq!(parse("res now"), Err(ConsoleError::IncorrectParameter));
        assert_eq!(
            parse("reboot"),
            Err(ConsoleError::UnknownCommand("reboot".into()))
        );
        assert_eq!(
            ConsoleError::IncorrectParameter.to_string(),
            "*** ERROR: Incorrect parameter"
        );
    }
}
