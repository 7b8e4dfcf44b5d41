//! Our error types for programming DER grid-support functions.

use thiserror::Error;

use crate::{commit::CommitState, function::FunctionKind};

pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised below the adapter, by whatever carries register or variable traffic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Communication timeout")]
    Timeout,
    #[error("Serial communication error: {0:?}")]
    Io(embedded_io::ErrorKind),
    #[error("Modbus protocol error: {0}")]
    Modbus(rmodbus::ErrorKind),
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Frame buffer too small")]
    BufferError,
    #[error("Operation not supported by this transport")]
    Unsupported,
    #[error("Remote rejected request: {0}")]
    Remote(String),
}

impl From<rmodbus::ErrorKind> for TransportError {
    fn from(err: rmodbus::ErrorKind) -> Self {
        TransportError::Modbus(err)
    }
}

/// Why a curve was rejected by [`CurveModel::validate`](crate::curve::CurveModel::validate).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFault {
    #[error("more than {max} points")]
    TooManyPoints { max: usize },
    #[error("x is not strictly greater than the previous point")]
    NotAscending,
    #[error("coordinate is not a finite number")]
    NonFinite,
    #[error("reactive power has the wrong sign for this side of nominal voltage")]
    WrongQuadrant,
}

/// Custom error type for DER function programming.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("DER not initialized")]
    DeviceNotInitialized,
    #[error("Function {0} is not supported by this device")]
    UnsupportedFunction(FunctionKind),
    #[error("Unknown device mode '{0}'")]
    UnknownMode(String),
    #[error("Invalid curve point {index}: {reason}")]
    InvalidCurveGeometry { index: usize, reason: GeometryFault },
    #[error("Enabled function has an empty curve")]
    EmptyCurve,
    #[error("Value {0} cannot be represented by the target register")]
    ValueOutOfRange(f64),
    #[error("Unknown flag name '{0}'")]
    UnknownFlagName(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Curve {0} is read-only")]
    ReadOnlyCurve(u8),
    #[error("Curve was not committed, last known state {last_known_state}")]
    CurveNotCommitted { last_known_state: CommitState },
    #[error("Commit cancelled in state {last_known_state}")]
    CommitCancelled { last_known_state: CommitState },
    #[error("Functions still enabled after deactivation: {remaining:?}")]
    DeactivationIncomplete { remaining: Vec<FunctionKind> },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rmodbus::ErrorKind> for Error {
    fn from(err: rmodbus::ErrorKind) -> Self {
        Error::Transport(TransportError::Modbus(err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
