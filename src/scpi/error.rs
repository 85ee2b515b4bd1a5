use thiserror::Error;

use crate::{Error, Result};

/// An entry from the instrument's error queue (`SYST:ERR?`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScpiError {
    #[error("command error {0}: {1}")]
    CommandError(i32, String),
    #[error("execution error {0}: {1}")]
    ExecutionError(i32, String),
    #[error("device-dependent error {0}: {1}")]
    DevDependError(i32, String),
    #[error("query error {0}: {1}")]
    QueryError(i32, String),
    #[error("instrument error {0}: {1}")]
    Vendor(i32, String),
}

impl ScpiError {
    pub fn from_code(code: i32, message: String) -> Self {
        match code {
            -199..=-100 => ScpiError::CommandError(code, message),
            -299..=-200 => ScpiError::ExecutionError(code, message),
            -399..=-300 => ScpiError::DevDependError(code, message),
            -499..=-400 => ScpiError::QueryError(code, message),
            _ => ScpiError::Vendor(code, message),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ScpiError::CommandError(c, _)
            | ScpiError::ExecutionError(c, _)
            | ScpiError::DevDependError(c, _)
            | ScpiError::QueryError(c, _)
            | ScpiError::Vendor(c, _) => *c,
        }
    }

    /// Parses `<code>,"<message>"`; code 0 means the queue is empty.
    pub fn parse_status(response: &str) -> Result<Option<ScpiError>> {
        let text = response.trim();
        let (code, message) = text.split_once(',').unwrap_or((text, ""));
        let code: i32 = code
            .trim()
            .parse()
            .map_err(|e| Error::value_conversion(text, e))?;
        if code == 0 {
            return Ok(None);
        }
        let message = super::unquote(message).to_string();
        Ok(Some(ScpiError::from_code(code, message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue() {
        assert_eq!(ScpiError::parse_status("0,No error").unwrap(), None);
        assert_eq!(ScpiError::parse_status("+0,\"No error\"\n").unwrap(), None);
    }

    #[test]
    fn classes_follow_code_ranges() {
        let e = ScpiError::parse_status("-113,\"Undefined header\"")
            .unwrap()
            .unwrap();
        assert_eq!(e, ScpiError::CommandError(-113, "Undefined header".into()));
        let e = ScpiError::parse_status("-222,Data out of range").unwrap().unwrap();
        assert!(matches!(e, ScpiError::ExecutionError(-222, _)));
        assert_eq!(ScpiError::from_code(201, String::new()).code(), 201);
    }

    #[test]
    fn garbage_is_a_conversion_error() {
        assert!(ScpiError::parse_status("what").is_err());
    }
}
