// PingZee - Interrupt Bridges
//
// Interrupt bodies bound at init time. Each one only posts a fixed message to
// the application mailbox through the ISR-safe path and returns; a full
// mailbox drops the event.

use crate::error::HalError;
use crate::events::{AlarmHandler, TimerEvent};
use crate::platform::InterruptLine;
use crate::tasks::app::{AppEndpoint, AppMsg, InterruptSource};

/// Route edges on `line` to the application task as `Gpio(pin)` messages.
pub fn bind_gpio(line: &mut dyn InterruptLine, app: &'static AppEndpoint) -> Result<(), HalError> {
    let pin = line.pin();
    line.attach(Box::new(move || {
        app.requests().post_from_isr(AppMsg::interrupt(InterruptSource::Gpio(pin)));
    }))
}

/// Alarm handler that forwards a channel's alarms to the application task
/// instead of the channel's own outbox.
pub fn timer_to_app(app: &'static AppEndpoint) -> AlarmHandler {
    Box::leak(Box::new(move |event: TimerEvent| {
        app.requests().post_from_isr(AppMsg::interrupt(InterruptSource::Timer(event.channel)));
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimInterruptLine;
    use crate::tasks::app::AppCmd;

    #[test]
    fn gpio_edge_posts_one_discarded_message() {
        let app: &'static AppEndpoint = Box::leak(Box::new(AppEndpoint::new("app")));
        let mut line = SimInterruptLine::new(25);
        let handle = line.clone();
        assert!(bind_gpio(&mut line, app).is_ok());
        assert!(line.enable().is_ok());
        assert!(handle.fire());

        let msg = app.requests().try_get().map(|m| (m.cmd, m.done));
        assert_eq!(
            msg,
            Some((AppCmd::Interrupt(InterruptSource::Gpio(25)), crate::tasks::worker::Done::Discard))
        );
        assert!(app.requests().is_empty());
    }

    #[test]
    fn timer_bridge_drops_when_the_mailbox_is_full() {
        let app: &'static AppEndpoint = Box::leak(Box::new(AppEndpoint::new("app")));
        let bridge = timer_to_app(app);
        for _ in 0..app.requests().capacity() + 2 {
            bridge(TimerEvent { channel: 3 });
        }
        assert_eq!(app.requests().len(), app.requests().capacity());
        let first = app.requests().try_get().map(|m| m.cmd);
        assert_eq!(first, Some(AppCmd::Interrupt(InterruptSource::Timer(3))));
    }
}
