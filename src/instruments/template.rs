use std::{collections::HashMap, fmt::Display};

use strfmt::{strfmt, FmtError};

use crate::{Error, Result};

/// Fills a per-model command template such as `"SOUR{ch}:VOLT {v}"`.
///
/// Numeric precision belongs to the caller; arguments are rendered with
/// their `Display` impl first. A placeholder with no matching argument is a
/// parameter-type failure.
pub fn render(template: &str, args: &[(&str, &dyn Display)]) -> Result<String> {
    let vars: HashMap<String, String> = args
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    strfmt(template, &vars).map_err(|e| match e {
        FmtError::KeyError(msg) => Error::parameter_type(template, msg),
        FmtError::TypeError(msg) | FmtError::Invalid(msg) => Error::parameter_type(template, msg),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;

    #[test]
    fn fills_placeholders() {
        let cmd = render("SOUR{ch}:VOLT {v}", &[("ch", &2), ("v", &1.5)]).unwrap();
        assert_eq!(cmd, "SOUR2:VOLT 1.5");
    }

    #[test]
    fn missing_argument_is_a_type_failure() {
        let err = render("OUTP ON, (@{ch})", &[]).unwrap_err();
        assert_eq!(err.failure(), Failure::ParameterType);
    }

    #[test]
    fn templates_without_placeholders_pass_through() {
        assert_eq!(render("INIT:CONT OFF", &[]).unwrap(), "INIT:CONT OFF");
    }
}
