// PingZee - General Fault Handler
//
// Synchronisation failures (lock timeout, full mailbox on a put that must
// always drain, bad release) and configuration range errors never return an
// error. They stop the device here.

use std::panic::Location;

/// Halt the device. With `fault-trace` the caller's file and line are
/// logged first.
#[track_caller]
pub fn general_fault(reason: &str) -> ! {
    let location = Location::caller();
    #[cfg(feature = "fault-trace")]
    log::error!("Stopped at {}:{}: {}", location.file(), location.line(), reason);
    halt(location, reason)
}

#[cfg(target_os = "espidf")]
fn halt(_location: &Location<'_>, _reason: &str) -> ! {
    unsafe { esp_idf_sys::esp_system_abort(c"general fault".as_ptr()) }
}

#[cfg(not(target_os = "espidf"))]
fn halt(location: &Location<'_>, reason: &str) -> ! {
    panic!("general fault at {location}: {reason}")
}

/// `fault!("…", args)` formats a reason and calls [`general_fault`].
#[macro_export]
macro_rules! fault {
    ($($arg:tt)*) => {
        $crate::fault::general_fault(&::std::format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "general fault")]
    fn fault_halts() {
        general_fault("wedged");
    }

    #[test]
    #[should_panic(expected = "channel 7")]
    fn fault_macro_formats_reason() {
        crate::fault!("channel {} out of range", 7);
    }
}
