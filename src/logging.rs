//! Logging context handed to every session.
//!
//! Nothing here is global: each [`Session`](crate::instruments::Session) owns a
//! [`LogContext`] describing which instrument it talks to, and every guarded
//! operation runs inside the span that context builds. Installing a subscriber
//! is left to the application ([`init`]) or the test harness.

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    instrument: String,
    address: String,
}

impl LogContext {
    pub fn new<I: Into<String>, A: Into<String>>(instrument: I, address: A) -> Self {
        Self {
            instrument: instrument.into(),
            address: address.into(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Renames the instrument, typically once `*IDN?` has answered.
    pub fn rename<I: Into<String>>(&mut self, instrument: I) {
        self.instrument = instrument.into();
    }

    pub fn span(&self, operation: &str) -> Span {
        tracing::debug_span!(
            "instrument",
            name = %self.instrument,
            address = %self.address,
            operation
        )
    }
}

/// Installs a formatting subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless.
pub fn init(default_filter: &str) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| format!("bad log filter {:?}: {}", default_filter, e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_keeps_address() {
        let mut ctx = LogContext::new("MOCK::dmm", "MOCK::dmm");
        ctx.rename("KEITHLEY INSTRUMENTS 2000");
        assert_eq!(ctx.instrument(), "KEITHLEY INSTRUMENTS 2000");
        assert_eq!(ctx.address(), "MOCK::dmm");
    }
}
