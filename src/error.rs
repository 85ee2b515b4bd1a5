//! Crate-wide error types.
//!
//! [`Error`] is what the unguarded I/O layer returns. The guard in
//! [`crate::instruments::guard`] sorts every variant into a [`Failure`] kind and
//! swallows all of them except [`ValidationError`], which is the only error an
//! instrument method hands back to its caller.

use std::{fmt, io};

use thiserror::Error;

use crate::{protocols::TransportError, scpi::ScpiError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not convert response {response:?}: {reason}")]
    ValueConversion { response: String, reason: String },
    #[error("argument `{parameter}` does not fit the command: {reason}")]
    ParameterType { parameter: String, reason: String },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("instrument reported: {0}")]
    Scpi(#[from] ScpiError),
    #[error("instrument at {0} did not identify itself and no model override was given")]
    Unidentified(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("transfer layer error: {0}")]
    IOError(io::Error),
    #[error("serial protocol error: {0}")]
    SerialError(serial::Error),
    #[error("{0}")]
    Other(#[from] OtherError),
}

/// How the guard treats a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    ValueConversion,
    ParameterType,
    Transport,
    Validation,
    Unclassified,
}

impl Error {
    pub fn value_conversion<E: fmt::Display>(response: &str, reason: E) -> Self {
        Error::ValueConversion {
            response: response.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parameter_type<E: fmt::Display>(parameter: &str, reason: E) -> Self {
        Error::ParameterType {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn from_io(err: io::Error, address: &str) -> Self {
        match TransportError::classify(&err, address) {
            Some(t) => Error::Transport(t),
            None => Error::IOError(err),
        }
    }

    pub fn from_serial(err: serial::Error, address: &str) -> Self {
        match TransportError::classify_serial(&err, address) {
            Some(t) => Error::Transport(t),
            None => Error::SerialError(err),
        }
    }

    pub fn failure(&self) -> Failure {
        match self {
            Error::ValueConversion { .. } => Failure::ValueConversion,
            Error::ParameterType { .. } => Failure::ParameterType,
            Error::Transport(_) => Failure::Transport,
            Error::Validation(_) => Failure::Validation,
            _ => Failure::Unclassified,
        }
    }

    /// Short variant name used when logging unclassified failures.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::ValueConversion { .. } => "ValueConversion",
            Error::ParameterType { .. } => "ParameterType",
            Error::Transport(_) => "Transport",
            Error::Validation(_) => "Validation",
            Error::Scpi(_) => "Scpi",
            Error::Unidentified(_) => "Unidentified",
            Error::UnsupportedModel(_) => "UnsupportedModel",
            Error::Config(_) => "Config",
            Error::IOError(_) => "IOError",
            Error::SerialError(_) => "SerialError",
            Error::Other(_) => "Other",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Transport(TransportError::Timeout) => true,
            Error::IOError(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(t) => Some(t),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::from_io(e, "")
    }
}

/// An argument was rejected before any command was sent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid value for parameter '{parameter}': {value}")]
    InvalidValue { parameter: String, value: String },
    #[error("{operation} is not supported by {model}")]
    Unsupported { operation: String, model: String },
}

impl ValidationError {
    pub fn invalid<V: fmt::Display>(parameter: &str, value: V) -> Self {
        ValidationError::InvalidValue {
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }

    pub fn unsupported(operation: &str, model: &str) -> Self {
        ValidationError::Unsupported {
            operation: operation.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct OtherError(String);

impl fmt::Display for OtherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.0)
    }
}

impl std::error::Error for OtherError {}

impl<'a> From<&'a str> for OtherError {
    fn from(s: &'a str) -> Self {
        Self(s.to_string())
    }
}
impl From<String> for OtherError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'a> From<&'a str> for Error {
    fn from(s: &'a str) -> Self {
        Error::Other(OtherError::from(s))
    }
}
impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(OtherError::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_split_into_transport_and_unclassified() {
        let lost = Error::from_io(io::Error::from(io::ErrorKind::BrokenPipe), "a");
        assert_eq!(lost.failure(), Failure::Transport);
        let weird = Error::from_io(io::Error::new(io::ErrorKind::Other, "?"), "a");
        assert_eq!(weird.failure(), Failure::Unclassified);
        assert_eq!(weird.kind_name(), "IOError");
    }

    #[test]
    fn timeouts_are_recognised_in_both_shapes() {
        assert!(Error::Transport(TransportError::Timeout).is_timeout());
        assert!(Error::IOError(io::Error::from(io::ErrorKind::TimedOut)).is_timeout());
        assert!(!Error::from("boom").is_timeout());
    }

    #[test]
    fn validation_message_names_parameter_and_value() {
        let e = ValidationError::invalid("channel", 3);
        assert_eq!(e.to_string(), "Invalid value for parameter 'channel': 3");
    }
}
