//! Multimeter measurement functions and their spelling variants.

use std::{fmt, str::FromStr};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Function {
    Volt,
    VoltAc,
    Curr,
    CurrAc,
    Res,
    Fres,
}

const SYNONYMS: &[(&str, Function)] = &[
    ("VOLT", Function::Volt),
    ("VOLT:DC", Function::Volt),
    ("VOLTAGE", Function::Volt),
    ("VOLTAGE:DC", Function::Volt),
    ("VDC", Function::Volt),
    ("DCV", Function::Volt),
    ("V", Function::Volt),
    ("VOLT:AC", Function::VoltAc),
    ("VOLTAGE:AC", Function::VoltAc),
    ("VAC", Function::VoltAc),
    ("ACV", Function::VoltAc),
    ("CURR", Function::Curr),
    ("CURR:DC", Function::Curr),
    ("CURRENT", Function::Curr),
    ("CURRENT:DC", Function::Curr),
    ("IDC", Function::Curr),
    ("DCI", Function::Curr),
    ("ADC", Function::Curr),
    ("CURR:AC", Function::CurrAc),
    ("CURRENT:AC", Function::CurrAc),
    ("IAC", Function::CurrAc),
    ("ACI", Function::CurrAc),
    ("AAC", Function::CurrAc),
    ("RES", Function::Res),
    ("RESISTANCE", Function::Res),
    ("OHM", Function::Res),
    ("OHMS", Function::Res),
    ("2W", Function::Res),
    ("FRES", Function::Fres),
    ("FRESISTANCE", Function::Fres),
    ("4W", Function::Fres),
];

impl Function {
    pub const ALL: [Function; 6] = [
        Function::Volt,
        Function::VoltAc,
        Function::Curr,
        Function::CurrAc,
        Function::Res,
        Function::Fres,
    ];

    /// Short SCPI token, e.g. `VOLT:AC`.
    pub fn token(self) -> &'static str {
        match self {
            Function::Volt => "VOLT",
            Function::VoltAc => "VOLT:AC",
            Function::Curr => "CURR",
            Function::CurrAc => "CURR:AC",
            Function::Res => "RES",
            Function::Fres => "FRES",
        }
    }

    /// Fully qualified sense subsystem node, e.g. `VOLT:DC` for NPLC settings.
    pub fn sense_token(self) -> &'static str {
        match self {
            Function::Volt => "VOLT:DC",
            Function::Curr => "CURR:DC",
            other => other.token(),
        }
    }

    /// Base of the simulated reading for this function.
    pub fn seed(self) -> f64 {
        match self {
            Function::Volt => 1.234,
            Function::VoltAc => 0.707,
            Function::Curr => 0.0567,
            Function::CurrAc => 0.0354,
            Function::Res => 1000.56,
            Function::Fres => 1000.57,
        }
    }

    pub fn default_range(self) -> f64 {
        match self {
            Function::Volt | Function::VoltAc => 10.0,
            Function::Curr | Function::CurrAc => 1.0,
            Function::Res | Function::Fres => 10000.0,
        }
    }

    /// Looks a token up without raising; `None` for anything outside the table.
    pub fn lookup(token: &str) -> Option<Function> {
        let token = super::unquote(token).trim();
        let token = token.strip_prefix(':').unwrap_or(token).to_ascii_uppercase();
        SYNONYMS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, f)| *f)
    }
}

impl FromStr for Function {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Function::lookup(s).ok_or_else(|| ValidationError::invalid("function", s))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_voltage_spellings_canonicalise() {
        for s in ["VDC", "DCV", "VOLT:DC", "volt", ":Volt:DC", "\"VOLT\""] {
            assert_eq!(s.parse::<Function>().unwrap(), Function::Volt, "{}", s);
        }
    }

    #[test]
    fn unsupported_tokens_are_validation_errors() {
        let err = "TEMP".parse::<Function>().unwrap_err();
        assert_eq!(err, ValidationError::invalid("function", "TEMP"));
        assert!("".parse::<Function>().is_err());
    }

    #[test]
    fn canonical_set_is_closed() {
        for f in Function::ALL {
            assert_eq!(f.token().parse::<Function>().unwrap(), f);
            assert_eq!(f.sense_token().parse::<Function>().unwrap(), f);
        }
    }
}
