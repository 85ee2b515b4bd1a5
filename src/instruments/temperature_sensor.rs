//! Bench thermometers and multi-channel thermocouple readers.
//!
//! Simple thermometers answer `FETCH?` and read a single channel. Channel readers
//! take `MEAS?<n>`; thermocouple readers also accept a junction type per
//! channel. Readers that do not identify themselves fall back to the simple
//! thermometer.

use std::{
    collections::BTreeMap,
    ops::RangeInclusive,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{
    guard::{Checked, Policy},
    model::{self, Matcher, ModelInfo},
    session::{ConnectOptions, Session},
    template,
    validate::{one_of, Validate},
    Instrument, Resource, ResourceManager,
};
use crate::{error::ValidationError, Error, Result};

const THERMOCOUPLE_TYPES: &[&str] = &["B", "E", "J", "K", "N", "R", "S", "T"];

/// Spellings accepted by [`TemperatureSensor::set_units`] and the unit each
/// stands for.
const UNITS: &[(&str, &str)] = &[
    ("C", "C"),
    ("CEL", "C"),
    ("CELSIUS", "C"),
    ("F", "F"),
    ("FAR", "F"),
    ("FAHRENHEIT", "F"),
    ("K", "K"),
    ("KELVIN", "K"),
];

#[derive(Debug)]
pub struct SensorModel {
    pub name: &'static str,
    pub matcher: Matcher,
    /// Reading query; `{ch}` is the channel.
    pub read: &'static str,
    pub channels: RangeInclusive<u8>,
    /// Junction type command, `{ch}` and `{t}`.
    pub thermocouple_type: Option<&'static str>,
    /// A failed read is tried once more.
    pub retry_read: bool,
}

impl ModelInfo for SensorModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

static MODELS: [SensorModel; 3] = [
    SensorModel {
        name: "Thermometer",
        matcher: Matcher {
            vendors: &[],
            models: &["THERMOMETER"],
        },
        read: "FETCH?",
        channels: 1..=1,
        thermocouple_type: None,
        retry_read: false,
    },
    SensorModel {
        name: "Measuring thermometer",
        matcher: Matcher {
            vendors: &[],
            models: &["MEASURE"],
        },
        read: "MEAS?{ch}",
        channels: 1..=8,
        thermocouple_type: None,
        retry_read: true,
    },
    SensorModel {
        name: "Thermocouple",
        matcher: Matcher {
            vendors: &[],
            models: &["THERMO"],
        },
        read: "MEAS?{ch}",
        channels: 1..=8,
        thermocouple_type: Some("TTYP {ch},{t}"),
        retry_read: false,
    },
];

pub fn models() -> &'static [SensorModel] {
    &MODELS
}

/// Matches on the model field, then on a manufacturer such as `THERMO...`.
fn detect(identity: &super::Identity) -> Option<&'static SensorModel> {
    model::detect(&MODELS, identity).or_else(|| {
        let manufacturer = identity.manufacturer.to_ascii_uppercase();
        manufacturer.contains("THERMO").then_some(&MODELS[2])
    })
}

pub struct TemperatureSensor<R: Resource> {
    session: Session<R>,
    model: &'static SensorModel,
}

impl<R: Resource> Instrument for TemperatureSensor<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> TemperatureSensor<R> {
    /// Opens the sensor named by `model_override`, or whatever `*IDN?`
    /// suggests. Anything unrecognised, silent ones included, is treated as
    /// a simple thermometer.
    pub fn open<M>(
        manager: &mut M,
        options: &ConnectOptions,
        model_override: Option<&str>,
    ) -> Result<Self>
    where
        M: ResourceManager<Resource = R>,
    {
        let options = options.clone().identify(options.identify || model_override.is_none());
        let session = Session::open(manager, &options)?;
        let model = match model_override {
            Some(name) => model::by_name(&MODELS, name)
                .ok_or_else(|| Error::UnsupportedModel(name.to_string()))?,
            None => match session.identity().and_then(detect) {
                Some(model) => model,
                None => {
                    warn!(address = %session.address(), "sensor type unknown, reading with FETCH?");
                    &MODELS[0]
                }
            },
        };
        Ok(Self::with_model(session, model))
    }

    pub fn with_model(session: Session<R>, model: &'static SensorModel) -> Self {
        info!(model = model.name, address = %session.address(), "temperature sensor ready");
        Self { session, model }
    }

    pub fn model(&self) -> &'static SensorModel {
        self.model
    }

    fn channel(&self, operation: &str, ch: u8) -> Checked<()> {
        let channels = self.model.channels.clone();
        Validate::new(operation)
            .arg("channel", &ch, |c| channels.contains(c))
            .map(|_| ())
    }

    /// One reading; the session's default reading on failure.
    pub fn get_temperature(&mut self, ch: u8) -> Checked<f64> {
        self.channel("get_temperature", ch)?;
        let policy = if self.model.retry_read {
            retry_once(self.session.policy())
        } else {
            self.session.policy().clone()
        };
        let read = self.model.read;
        let default = self.session.default_reading();
        self.session
            .guarded_with(&policy, "get_temperature", default, |m| {
                m.query_float(&template::render(read, &[("ch", &ch)])?)
            })
    }

    /// Junction type (`B`, `E`, `J`, `K`, `N`, `R`, `S` or `T`) for one
    /// channel.
    pub fn set_type(&mut self, ch: u8, type_code: &str) -> Checked<()> {
        let command = self
            .model
            .thermocouple_type
            .ok_or_else(|| ValidationError::unsupported("set_type", self.model.name))?;
        self.channel("set_type", ch)?;
        let t = one_of("type", type_code, THERMOCOUPLE_TYPES)?;
        self.session.guarded("set_type", (), |m| {
            m.write(&template::render(command, &[("ch", &ch), ("t", &t)])?)
        })?;
        info!(instrument = %self.session.name(), channel = ch, kind = t, "thermocouple type set");
        Ok(())
    }

    /// `C`, `F` or `K`, spelled out or abbreviated.
    pub fn set_units(&mut self, unit: &str) -> Checked<()> {
        let wanted = unit.trim().to_ascii_uppercase();
        let unit = UNITS
            .iter()
            .find(|(alias, _)| *alias == wanted)
            .map(|(_, unit)| *unit)
            .ok_or_else(|| ValidationError::invalid("unit", unit))?;
        self.session.write(&format!("UNIT:TEMP {}", unit))
    }

    /// One reading per channel, keyed by channel.
    pub fn get_all_temperatures(&mut self, channels: &[u8]) -> Checked<BTreeMap<u8, f64>> {
        let mut readings = BTreeMap::new();
        for &ch in channels {
            readings.insert(ch, self.get_temperature(ch)?);
        }
        Ok(readings)
    }

    /// Reads `ch` every `interval` until `duration` has passed. Each reading
    /// comes with the time it was taken, measured from the start.
    pub fn monitor_temperature(
        &mut self,
        ch: u8,
        duration: Duration,
        interval: Duration,
    ) -> Checked<Vec<(Duration, f64)>> {
        self.channel("monitor_temperature", ch)?;
        info!(instrument = %self.session.name(), channel = ch, ?duration, "monitoring temperature");
        let start = Instant::now();
        let mut readings = Vec::new();
        while start.elapsed() < duration {
            let at = start.elapsed();
            let temperature = self.get_temperature(ch)?;
            debug!(channel = ch, ?at, temperature, "temperature");
            readings.push((at, temperature));
            thread::sleep(interval);
        }
        Ok(readings)
    }
}

fn retry_once(policy: &Policy) -> Policy {
    Policy {
        retries: policy.retries.max(1),
        ..policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermocouple_readers_are_recognised() {
        let by_model = "ACME,THERMOCOUPLE READER,1,1.0".parse().unwrap();
        assert_eq!(detect(&by_model).map(|m| m.name), Some("Thermocouple"));
        let by_vendor = "THERMOTRON,8800,1,1.0".parse().unwrap();
        assert_eq!(detect(&by_vendor).map(|m| m.name), Some("Thermocouple"));
        let plain = "ACME,BENCH THERMOMETER,1,1.0".parse().unwrap();
        assert_eq!(detect(&plain).map(|m| m.name), Some("Thermometer"));
        let unknown = "ACME,T-100,1,1.0".parse().unwrap();
        assert!(detect(&unknown).is_none());
    }

    #[test]
    fn unit_spellings() {
        let found: Vec<&str> = ["cel", "Fahrenheit", "k"]
            .iter()
            .filter_map(|u| {
                let wanted = u.to_ascii_uppercase();
                UNITS.iter().find(|(a, _)| *a == wanted).map(|(_, unit)| *unit)
            })
            .collect();
        assert_eq!(found, vec!["C", "F", "K"]);
    }
}
