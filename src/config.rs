//! TOML instrument descriptions.
//!
//! ```toml
//! [instruments.dmm]
//! address = "TCPIP0::192.168.1.20::5025::SOCKET"
//! model = "Keithley 2000"
//! timeout = "3s"
//!
//! [instruments.chamber]
//! address = "ASRL3::INSTR"
//! model = "T-2500SE"
//! identify = false
//! serial = { baud_rate = 9600 }
//! policy = { retries = 2, retry_delay = "250ms" }
//! ```

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    instruments::{session::DEFAULT_TIMEOUT, ConnectOptions, Policy},
    protocols::Serial,
    Error, Result,
};

fn default_identify() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentConfig {
    pub address: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_identify")]
    pub identify: bool,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Skips `*IDN?` based model detection.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub policy: Policy,
    /// Only read for `ASRL` resources.
    #[serde(default)]
    pub serial: Serial,
}

impl InstrumentConfig {
    pub fn new<A: Into<String>>(address: A) -> Self {
        Self {
            address: address.into(),
            nickname: None,
            identify: default_identify(),
            timeout: default_timeout(),
            model: None,
            policy: Policy::default(),
            serial: Serial::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let options = ConnectOptions::new(self.address.as_str())
            .identify(self.identify)
            .timeout(self.timeout)
            .policy(self.policy.clone());
        match &self.nickname {
            Some(nickname) => options.nickname(nickname.as_str()),
            None => options,
        }
    }
}

impl From<&InstrumentConfig> for ConnectOptions {
    fn from(config: &InstrumentConfig) -> Self {
        config.connect_options()
    }
}

/// A bench: named instruments, keyed by the name used on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(default)]
    pub instruments: BTreeMap<String, InstrumentConfig>,
}

impl BenchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    /// The named entry; its nickname defaults to the table key.
    pub fn instrument(&self, name: &str) -> Result<InstrumentConfig> {
        let mut config = self
            .instruments
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no instrument named {:?}", name)))?;
        config.nickname.get_or_insert_with(|| name.to_string());
        Ok(config)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_entry_gets_defaults() {
        let config = InstrumentConfig::from_toml_str(r#"address = "MOCK::dmm""#).unwrap();
        assert_eq!(config.address, "MOCK::dmm");
        assert_eq!(config.model, None);
        assert_eq!(config.serial, Serial::default());
        assert!(config.policy.default_reading.is_nan());
        let options = config.connect_options();
        assert!(options.identify);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn durations_are_human_readable() {
        let config = InstrumentConfig::from_toml_str(
            r#"
            address = "MOCK::psu"
            timeout = "1500ms"
            policy = { retries = 2, retry_delay = "2s" }
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.policy.retries, 2);
        assert_eq!(config.policy.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn typos_are_config_errors() {
        let err = InstrumentConfig::from_toml_str(r#"adress = "MOCK::x""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bench_names_become_nicknames() {
        let bench = BenchConfig::from_toml_str(
            r#"
            [instruments.dmm]
            address = "MOCK::dmm"
            "#,
        )
        .unwrap();
        assert_eq!(bench.instrument("dmm").unwrap().nickname.as_deref(), Some("dmm"));
        assert!(bench.instrument("scope").is_err());
    }
}
