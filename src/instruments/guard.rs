//! Uniform failure policy for instrument I/O.
//!
//! Every operation a driver performs goes through [`run`]. A failure is sorted
//! into a [`Failure`] kind, logged once with the instrument's identity and a
//! hint where one exists, and replaced by the caller's default. Validation
//! errors are the exception: they come back to the caller untouched.

use std::{thread, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{
    error::{Failure, ValidationError},
    logging::LogContext,
    Error, Result,
};

/// Result of a guarded operation: only validation can fail it.
pub type Checked<T> = std::result::Result<T, ValidationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Extra attempts after the first failure. Zero means no retry.
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Returned by numeric reads that failed.
    pub default_reading: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_millis(500),
            default_reading: f64::NAN,
        }
    }
}

impl Policy {
    pub fn with_retries(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
            ..Self::default()
        }
    }
}

fn retriable(err: &Error) -> bool {
    match err.failure() {
        Failure::Transport => err.transport().map_or(false, |t| t.is_transient()),
        Failure::Unclassified => true,
        _ => false,
    }
}

fn report(ctx: &LogContext, operation: &str, err: &Error, attempts_left: Option<u32>) {
    let (instrument, address) = (ctx.instrument(), ctx.address());
    if let Some(left) = attempts_left {
        warn!(
            instrument,
            address,
            operation,
            attempts_left = left,
            "{} failed, retrying: {}",
            operation,
            err
        );
        return;
    }
    match err.failure() {
        Failure::ValueConversion => error!(
            instrument,
            address,
            operation,
            "Value error in {} for {} at {}: {}",
            operation,
            instrument,
            address,
            err
        ),
        Failure::ParameterType => error!(
            instrument,
            address,
            operation,
            "Type error in {} for {} at {}: {}",
            operation,
            instrument,
            address,
            err
        ),
        Failure::Transport => {
            let hint = err.transport().map_or("", |t| t.hint());
            error!(
                instrument,
                address,
                operation,
                hint,
                "Transport error in {} for {} at {}: {}. {}",
                operation,
                instrument,
                address,
                err,
                hint
            )
        }
        Failure::Unclassified | Failure::Validation => {
            warn!(
                instrument,
                address,
                operation,
                kind = err.kind_name(),
                "Unexpected {} error in {} for {} at {}: {}",
                err.kind_name(),
                operation,
                instrument,
                address,
                err
            );
            debug!(operation, "failure detail: {:?}", err);
        }
    }
}

/// Runs `op` under `policy`, returning `default` on any failure other than
/// validation.
pub fn run<T, F>(
    ctx: &LogContext,
    operation: &str,
    policy: &Policy,
    default: T,
    mut op: F,
) -> Checked<T>
where
    F: FnMut() -> Result<T>,
{
    let span = ctx.span(operation);
    let _enter = span.enter();
    let mut remaining = policy.retries;
    loop {
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(Error::Validation(v)) => return Err(v),
            Err(e) => e,
        };
        if remaining > 0 && retriable(&err) {
            report(ctx, operation, &err, Some(remaining));
            remaining -= 1;
            thread::sleep(policy.retry_delay);
            continue;
        }
        report(ctx, operation, &err, None);
        return Ok(default);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::TransportError;
    use tracing_test::traced_test;

    fn ctx() -> LogContext {
        LogContext::new("Keithley 2000", "MOCK::dmm")
    }

    #[test]
    #[traced_test]
    fn value_conversion_returns_default() {
        let out = run(&ctx(), "measure", &Policy::default(), -1.0, || {
            crate::scpi::parse_float("garbage")
        });
        assert_eq!(out, Ok(-1.0));
        assert!(logs_contain("Value error in measure for Keithley 2000 at MOCK::dmm"));
    }

    #[test]
    fn validation_propagates_unchanged() {
        let expected = ValidationError::invalid("channel", 3);
        let out: Checked<()> = run(&ctx(), "set_output", &Policy::default(), (), || {
            Err(ValidationError::invalid("channel", 3).into())
        });
        assert_eq!(out, Err(expected));
    }

    #[test]
    #[traced_test]
    fn transport_failures_log_their_hint() {
        let out = run(&ctx(), "query", &Policy::default(), String::new(), || {
            Err(TransportError::Timeout.into())
        });
        assert_eq!(out, Ok(String::new()));
        assert!(logs_contain("Device may be busy or unresponsive"));
    }

    #[test]
    #[traced_test]
    fn type_failures_are_swallowed() {
        let out = run(&ctx(), "set_voltage", &Policy::default(), (), || {
            Err(Error::parameter_type("ch", "missing"))
        });
        assert_eq!(out, Ok(()));
        assert!(logs_contain("Type error in set_voltage"));
    }

    #[test]
    #[traced_test]
    fn unclassified_failures_log_at_lower_severity_with_detail() {
        let out = run(&ctx(), "fetch", &Policy::default(), 0u8, || {
            Err(Error::from("firmware hiccup"))
        });
        assert_eq!(out, Ok(0));
        logs_assert(|lines: &[&str]| {
            let warn = lines
                .iter()
                .filter(|l| l.contains("WARN") && l.contains("Unexpected Other error"))
                .count();
            let detail = lines
                .iter()
                .filter(|l| l.contains("DEBUG") && l.contains("failure detail"))
                .count();
            match (warn, detail) {
                (1, 1) => Ok(()),
                other => Err(format!("unexpected log counts {:?}", other)),
            }
        });
    }

    #[test]
    fn success_passes_through_without_retry() {
        let mut calls = 0;
        let policy = Policy::with_retries(3, Duration::ZERO);
        let out = run(&ctx(), "read", &policy, 0, || {
            calls += 1;
            Ok(7)
        });
        assert_eq!(out, Ok(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn transient_failures_are_retried_up_to_the_bound() {
        let mut calls = 0;
        let policy = Policy::with_retries(2, Duration::ZERO);
        let out = run(&ctx(), "upload", &policy, false, || {
            calls += 1;
            Err(TransportError::ConnectionLost.into())
        });
        assert_eq!(out, Ok(false));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_at_first_success() {
        let mut calls = 0;
        let policy = Policy::with_retries(5, Duration::ZERO);
        let out = run(&ctx(), "upload", &policy, false, || {
            calls += 1;
            if calls < 3 {
                Err(TransportError::Timeout.into())
            } else {
                Ok(true)
            }
        });
        assert_eq!(out, Ok(true));
        assert_eq!(calls, 3);
    }

    #[test]
    fn conversion_and_permanent_transport_errors_are_not_retried() {
        let policy = Policy::with_retries(4, Duration::ZERO);
        let mut calls = 0;
        let _ = run(&ctx(), "read", &policy, 0.0, || {
            calls += 1;
            crate::scpi::parse_float("x")
        });
        assert_eq!(calls, 1);

        let mut calls = 0;
        let _ = run(&ctx(), "read", &policy, 0.0, || {
            calls += 1;
            Err(TransportError::NoListener("MOCK::dmm".into()).into())
        });
        assert_eq!(calls, 1);
    }
}
