// PingZee - Interrupt Events & Sensor Data Types

// ---------------------------------------------------------------------------
// Interrupt handlers
// ---------------------------------------------------------------------------

/// Body of a platform interrupt. Runs in ISR context on the device: it must
/// not block and must not allocate.
pub type IsrHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// Per-channel timer alarm handler, called from the timer ISR in place of
/// the default mailbox post. Same contract as [`IsrHandler`].
pub type AlarmHandler = &'static (dyn Fn(TimerEvent) + Send + Sync);

// ---------------------------------------------------------------------------
// Timer alarm
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub channel: u8,
}

// ---------------------------------------------------------------------------
// Accelerometer data
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Round-robin successor used by the accelerometer poll.
    pub fn next(self) -> Self {
        match self {
            Self::X => Self::Y,
            Self::Y => Self::Z,
            Self::Z => Self::X,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
        }
    }
}

/// One axis sample in g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReading {
    pub axis: Axis,
    pub raw: i16,
    pub g: f32,
}
