use thiserror::Error;
use ufmt::{uDisplay, uWrite, Formatter};

use crate::XYZId;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ufmt::derive::uDebug)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn is_negative(self) -> bool {
        self == Direction::Negative
    }
}

/// Why the machine stopped. Stored in the halt latch until `recover` clears it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum Fault {
    #[error("endstop hit on {axis:?} moving {direction:?}")]
    Endstop { axis: XYZId, direction: Direction },
    #[error("thermal fault")]
    Thermal,
    #[error("step timer reload out of range")]
    TimerOverflow,
    #[error("move queue indices corrupted")]
    QueueCorrupted,
}

const FAULT_THERMAL: u8 = 1;
const FAULT_TIMER: u8 = 2;
const FAULT_QUEUE: u8 = 3;
const FAULT_ENDSTOP: u8 = 0x10;

impl Fault {
    /// Packs the fault into a single byte so it can live in an atomic. Zero means "no fault".
    pub(crate) fn encode(self) -> u8 {
        match self {
            Fault::Endstop { axis, direction } => FAULT_ENDSTOP | ((axis.index() as u8) << 1) | direction.is_negative() as u8,
            Fault::Thermal => FAULT_THERMAL,
            Fault::TimerOverflow => FAULT_TIMER,
            Fault::QueueCorrupted => FAULT_QUEUE,
        }
    }

    pub(crate) fn decode(value: u8) -> Option<Self> {
        match value {
            FAULT_THERMAL => Some(Fault::Thermal),
            FAULT_TIMER => Some(Fault::TimerOverflow),
            FAULT_QUEUE => Some(Fault::QueueCorrupted),
            v if v & FAULT_ENDSTOP != 0 => {
                let axis = match (v >> 1) & 0b11 {
                    0 => XYZId::X,
                    1 => XYZId::Y,
                    _ => XYZId::Z,
                };
                let direction = if v & 1 == 1 { Direction::Negative } else { Direction::Positive };
                Some(Fault::Endstop { axis, direction })
            }
            _ => None,
        }
    }
}

impl uDisplay for Fault {
    fn fmt<W: uWrite + ?Sized>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error> {
        match self {
            Fault::Endstop { axis, direction } => ufmt::uwrite!(f, "endstop {:?} {:?}", axis, direction),
            Fault::Thermal => f.write_str("thermal"),
            Fault::TimerOverflow => f.write_str("timer overflow"),
            Fault::QueueCorrupted => f.write_str("queue corrupted"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("move queue is full")]
pub struct QueueFull;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum KinematicsError {
    #[error("target is outside the reachable envelope")]
    Unreachable,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum MotionError {
    /// Transient: retry the same call once the step generator has drained a block.
    #[error("move queue is full")]
    QueueFull,
    #[error("target is outside the reachable envelope")]
    Unreachable,
    #[error("machine halted: {0}")]
    Halted(Fault),
}

impl From<QueueFull> for MotionError {
    fn from(_: QueueFull) -> Self {
        MotionError::QueueFull
    }
}

impl From<KinematicsError> for MotionError {
    fn from(value: KinematicsError) -> Self {
        match value {
            KinematicsError::Unreachable => MotionError::Unreachable,
        }
    }
}

impl uDisplay for MotionError {
    fn fmt<W: uWrite + ?Sized>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error> {
        match self {
            MotionError::QueueFull => f.write_str("queue full"),
            MotionError::Unreachable => f.write_str("unreachable"),
            MotionError::Halted(fault) => ufmt::uwrite!(f, "halted: {}", fault),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be positive and finite")]
    NotPositive(&'static str),
    #[error("minimum step interval must be below the idle interval")]
    TimerRange,
    #[error("machine origin is not reachable")]
    UnreachableOrigin,
    #[error("move queue already has a producer and consumer")]
    QueueInUse,
}

impl uDisplay for ConfigError {
    fn fmt<W: uWrite + ?Sized>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error> {
        match self {
            ConfigError::NotPositive(name) => ufmt::uwrite!(f, "{} must be positive", *name),
            ConfigError::TimerRange => f.write_str("bad timer range"),
            ConfigError::UnreachableOrigin => f.write_str("origin unreachable"),
            ConfigError::QueueInUse => f.write_str("queue in use"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error, ufmt::derive::uDebug)]
pub enum RecoveryError {
    #[error("machine is not halted")]
    NotHalted,
    #[error("step generator has not acknowledged the halt yet")]
    NotAcknowledged,
}
