// PingZee - Recoverable Error Types
//
// Transport failures travel back inside the completed message so the caller
// decides what to do. Everything that indicates corrupted state goes through
// `fault::general_fault` instead.

use embedded_hal::i2c::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("I2C chip 0x{chip:02x} did not acknowledge")]
    Nack { chip: u8 },
    #[error("I2C bus error: {0:?}")]
    Bus(ErrorKind),
    #[error("SPI transfer failed")]
    Spi,
    #[error("SPI device not registered")]
    NoDevice,
    #[error("SPI device table full")]
    DeviceTableFull,
    #[error("payload of {0} bytes does not fit the message buffer")]
    Overflow(usize),
    #[error("page {0} is outside the panel")]
    NoSuchPage(u8),
}

impl TransportError {
    /// Classify an `embedded-hal` I2C error against the addressed chip.
    pub fn from_i2c<E: embedded_hal::i2c::Error>(chip: u8, err: &E) -> Self {
        match err.kind() {
            ErrorKind::NoAcknowledge(_) => Self::Nack { chip },
            kind => Self::Bus(kind),
        }
    }
}

/// Platform refused a timer or sleep configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("{op} failed with code {code}")]
    Platform { op: &'static str, code: i32 },
    #[error("{0} is not available on this board")]
    Unsupported(&'static str),
}

/// Console input that could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("*** ERROR: Incorrect parameter")]
    IncorrectParameter,
    #[error("*** ERROR: Unknown command '{0}'")]
    UnknownCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::NoAcknowledgeSource;

    #[test]
    fn nack_keeps_the_chip_address() {
        let err = ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address);
        assert_eq!(
            TransportError::from_i2c(0x57, &err),
            TransportError::Nack { chip: 0x57 }
        );
        assert_eq!(
            TransportError::from_i2c(0x57, &ErrorKind::ArbitrationLoss),
            TransportError::Bus(ErrorKind::ArbitrationLoss)
        );
    }

    #[test]
    fn console_error_text() {
        assert_eq!(
            ConsoleError::IncorrectParameter.to_string(),
            "*** ERROR: Incorrect parameter"
        );
    }
}
