//! Argument checks that run before any command is sent.
//!
//! ```
//! use labinstruments::instruments::validate::Validate;
//!
//! let channel = 3;
//! let amplitude = 2.5;
//! let res = Validate::new("set_amplitude")
//!     .arg("channel", &channel, |c| (1..=2).contains(c))
//!     .and_then(|v| v.arg("amplitude", &amplitude, |a| (0.0..=10.0).contains(a)));
//! assert!(res.is_err());
//! ```

use std::{fmt::Display, ops::RangeInclusive};

use tracing::debug;

use crate::{error::ValidationError, instruments::guard::Checked};

#[derive(Debug, Clone, Copy)]
pub struct Validate<'a> {
    operation: &'a str,
}

impl<'a> Validate<'a> {
    pub fn new(operation: &'a str) -> Self {
        Self { operation }
    }

    pub fn arg<V, P>(self, name: &str, value: &V, predicate: P) -> Checked<Self>
    where
        V: Display + ?Sized,
        P: FnOnce(&V) -> bool,
    {
        if predicate(value) {
            Ok(self)
        } else {
            debug!(operation = self.operation, parameter = name, %value, "rejected argument");
            Err(ValidationError::invalid(name, value))
        }
    }

    pub fn range<V>(self, name: &str, value: V, range: RangeInclusive<V>) -> Checked<Self>
    where
        V: Display + PartialOrd,
    {
        self.arg(name, &value, |v| range.contains(v))
    }
}

/// Case-insensitive membership; returns the table spelling.
pub fn one_of<'t>(name: &str, value: &str, allowed: &[&'t str]) -> Checked<&'t str> {
    let wanted = value.trim();
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(wanted))
        .copied()
        .ok_or_else(|| ValidationError::invalid(name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_arguments_chain() {
        let v = Validate::new("op")
            .arg("channel", &1, |c| *c == 1)
            .and_then(|v| v.range("level", 5.0, 0.0..=10.0));
        assert!(v.is_ok());
    }

    #[test]
    fn first_failure_names_the_parameter() {
        let err = Validate::new("op")
            .range("count", 101, 1..=100)
            .unwrap_err();
        assert_eq!(err, ValidationError::invalid("count", 101));
    }

    #[test]
    fn membership_is_case_insensitive() {
        assert_eq!(one_of("coupling", "ac", &["AC", "DC", "GND"]), Ok("AC"));
        assert!(one_of("coupling", "XY", &["AC", "DC"]).is_err());
    }
}
