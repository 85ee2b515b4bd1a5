//! Thermonics temperature forcing systems and plain ovens.
//!
//! Forcers (T-2500SE, T-2420) keep separate hot and cold setpoints and an air
//! selector; [`TemperatureController::set_temperature`] programs the side the
//! target falls on and selects it. Ovens take a single `{t}C` setpoint.
//! The X-Stream 4300 has no remote temperature commands; its setpoint is only
//! remembered, and reads return it.

use std::{
    ops::RangeInclusive,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{
    guard::Checked,
    model::{self, Matcher, ModelInfo},
    session::{ConnectOptions, Session},
    validate::Validate,
    Instrument, Resource, ResourceManager,
};
use crate::{error::ValidationError, Error, Result};

/// Targets at or below this use the cold setpoint.
pub const AMBIENT: f64 = 25.0;
pub const DEFAULT_TOLERANCE: f64 = 1.0;
pub const DEFAULT_WAIT: Duration = Duration::from_secs(300);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Characterisation profiles, in visiting order.
pub const FULL_INDUSTRIAL_RANGE: [f64; 5] = [25.0, 0.0, -40.0, 125.0, 85.0];
pub const INDUSTRIAL_RANGE: [f64; 5] = [25.0, 0.0, -40.0, 105.0, 55.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Hot/cold setpoints, air selector and compressor.
    Forcer,
    Oven,
    /// Setpoint kept locally.
    XStream,
}

#[derive(Debug)]
pub struct ControllerModel {
    pub name: &'static str,
    pub matcher: Matcher,
    pub kind: Kind,
    pub limits: RangeInclusive<f64>,
}

impl ModelInfo for ControllerModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

static MODELS: [ControllerModel; 4] = [
    ControllerModel {
        name: "Thermonics T-2500SE",
        matcher: Matcher {
            vendors: &[],
            models: &["2500"],
        },
        kind: Kind::Forcer,
        limits: -80.0..=225.0,
    },
    ControllerModel {
        name: "Thermonics T-2420",
        matcher: Matcher {
            vendors: &[],
            models: &["2420"],
        },
        kind: Kind::Forcer,
        limits: -60.0..=200.0,
    },
    ControllerModel {
        name: "Oven",
        matcher: Matcher {
            vendors: &[],
            models: &["OVEN"],
        },
        kind: Kind::Oven,
        limits: 0.0..=300.0,
    },
    ControllerModel {
        name: "X-Stream 4300",
        matcher: Matcher {
            vendors: &[],
            models: &["X-STREAM", "4300"],
        },
        kind: Kind::XStream,
        limits: -100.0..=225.0,
    },
];

pub fn models() -> &'static [ControllerModel] {
    &MODELS
}

pub struct TemperatureController<R: Resource> {
    session: Session<R>,
    model: &'static ControllerModel,
    setpoint: Option<f64>,
    stable: bool,
}

impl<R: Resource> Instrument for TemperatureController<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> TemperatureController<R> {
    /// Opens the controller named by `model_override`, or the one `*IDN?`
    /// reports. Ovens never identify themselves, so they need the override.
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
            None => {
                let identity = session
                    .identity()
                    .ok_or_else(|| Error::Unidentified(session.address().to_string()))?;
                model::detect(&MODELS, identity)
                    .ok_or_else(|| Error::UnsupportedModel(identity.to_string()))?
            }
        };
        Ok(Self::with_model(session, model))
    }

    pub fn with_model(session: Session<R>, model: &'static ControllerModel) -> Self {
        info!(model = model.name, address = %session.address(), "temperature controller ready");
        Self {
            session,
            model,
            setpoint: None,
            stable: false,
        }
    }

    pub fn model(&self) -> &'static ControllerModel {
        self.model
    }

    /// Last target accepted by [`set_temperature`](Self::set_temperature).
    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    fn forcer(&self, operation: &str) -> Checked<()> {
        match self.model.kind {
            Kind::Forcer => Ok(()),
            Kind::Oven | Kind::XStream => {
                Err(ValidationError::unsupported(operation, self.model.name))
            }
        }
    }

    fn in_limits(&self, operation: &str, temperature: f64) -> Checked<()> {
        Validate::new(operation)
            .range("temperature", temperature, self.model.limits.clone())
            .map(|_| ())
    }

    /// Programs and selects the hot side above 25 °C, the cold side otherwise.
    pub fn set_temperature(&mut self, temperature: f64) -> Checked<bool> {
        self.in_limits("set_temperature", temperature)?;
        let commands = match self.model.kind {
            Kind::Forcer if temperature <= AMBIENT => {
                vec![format!("TC{:.1}", temperature), "AC".to_string()]
            }
            Kind::Forcer => vec![format!("TH{:.1}", temperature), "AH".to_string()],
            Kind::Oven => vec![format!("{:.1}C", temperature)],
            Kind::XStream => {
                warn!(model = self.model.name, temperature, "setpoint kept locally, nothing sent");
                Vec::new()
            }
        };
        let accepted = self.session.guarded("set_temperature", false, |m| {
            for command in &commands {
                m.write(command)?;
            }
            Ok(true)
        })?;
        if accepted {
            info!(instrument = %self.session.name(), temperature, "setpoint changed");
            self.setpoint = Some(temperature);
            self.stable = false;
        }
        Ok(accepted)
    }

    /// Air temperature in °C; the session's default reading on failure.
    /// An X-Stream reports its last setpoint.
    pub fn get_temperature(&mut self) -> Checked<f64> {
        let command = match self.model.kind {
            Kind::Forcer => "RA",
            Kind::Oven => "T",
            Kind::XStream => {
                warn!(model = self.model.name, "no temperature readback, using the setpoint");
                return Ok(self
                    .setpoint
                    .unwrap_or_else(|| self.session.default_reading()));
            }
        };
        self.session.query_float(command)
    }

    pub fn set_hot_temperature(&mut self, temperature: f64) -> Checked<()> {
        self.forcer("set_hot_temperature")?;
        self.in_limits("set_hot_temperature", temperature)?;
        self.session.write(&format!("TH{:.1}", temperature))
    }

    pub fn set_cold_temperature(&mut self, temperature: f64) -> Checked<()> {
        self.forcer("set_cold_temperature")?;
        self.in_limits("set_cold_temperature", temperature)?;
        self.session.write(&format!("TC{:.1}", temperature))
    }

    fn select(&mut self, operation: &str, command: &str) -> Checked<()> {
        self.forcer(operation)?;
        debug!(instrument = %self.session.name(), command, "air selector");
        self.session.write(command)
    }

    pub fn select_hot(&mut self) -> Checked<()> {
        self.select("select_hot", "AH")
    }

    pub fn select_cold(&mut self) -> Checked<()> {
        self.select("select_cold", "AC")
    }

    pub fn select_ambient(&mut self) -> Checked<()> {
        self.select("select_ambient", "AA")
    }

    pub fn select_ambient_forced(&mut self) -> Checked<()> {
        self.select("select_ambient_forced", "AF")
    }

    /// Stops forced air by returning to the ambient selection.
    pub fn turn_off_air(&mut self) -> Checked<()> {
        self.select("turn_off_air", "AA")
    }

    pub fn turn_on_compressor(&mut self) -> Checked<()> {
        self.select("turn_on_compressor", "CS")
    }

    pub fn turn_off_compressor(&mut self) -> Checked<()> {
        self.select("turn_off_compressor", "CP")
    }

    /// Logs once when the reading first settles within `tolerance`.
    pub fn check_temperature_stable(&mut self, target: f64, tolerance: f64) -> Checked<bool> {
        Validate::new("check_temperature_stable").arg("tolerance", &tolerance, |t| *t >= 0.0)?;
        let current = self.get_temperature()?;
        let stable = (current - target).abs() <= tolerance;
        if stable && !self.stable {
            info!(instrument = %self.session.name(), current, target, "temperature stable");
        }
        self.stable = stable;
        Ok(stable)
    }

    pub fn wait_for_temperature(
        &mut self,
        target: f64,
        tolerance: f64,
        timeout: Duration,
        interval: Duration,
    ) -> Checked<bool> {
        self.wait_for_temperature_with(target, tolerance, timeout, interval, |_, _| {})
    }

    /// Polls every `interval` until the reading is within `tolerance` of
    /// `target` or `timeout` has passed. `progress` sees each reading and the
    /// time waited so far.
    pub fn wait_for_temperature_with<F>(
        &mut self,
        target: f64,
        tolerance: f64,
        timeout: Duration,
        interval: Duration,
        mut progress: F,
    ) -> Checked<bool>
    where
        F: FnMut(f64, Duration),
    {
        Validate::new("wait_for_temperature").arg("tolerance", &tolerance, |t| *t >= 0.0)?;
        info!(instrument = %self.session.name(), target, tolerance, ?timeout, "waiting for temperature");
        self.stable = false;
        let start = Instant::now();
        loop {
            let current = self.get_temperature()?;
            let elapsed = start.elapsed();
            progress(current, elapsed);
            if (current - target).abs() <= tolerance {
                self.stable = true;
                info!(instrument = %self.session.name(), current, ?elapsed, "temperature stable");
                return Ok(true);
            }
            if elapsed >= timeout {
                warn!(instrument = %self.session.name(), target, current, "timed out waiting for temperature");
                return Ok(false);
            }
            thread::sleep(interval);
        }
    }

    /// Visits each `(temperature, dwell)` in order: set, wait until stable,
    /// then hold for `dwell`. Stops at the first point that never settles.
    pub fn cycle_temperature(
        &mut self,
        profile: &[(f64, Duration)],
        tolerance: f64,
        timeout: Duration,
        interval: Duration,
    ) -> Checked<bool> {
        info!(instrument = %self.session.name(), points = profile.len(), "temperature cycle started");
        for (step, &(temperature, dwell)) in profile.iter().enumerate() {
            debug!(step = step + 1, temperature, ?dwell, "cycle step");
            if !self.set_temperature(temperature)?
                || !self.wait_for_temperature(temperature, tolerance, timeout, interval)?
            {
                return Ok(false);
            }
            thread::sleep(dwell);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forcers_are_found_by_model_number() {
        let idn = "THERMONICS,T-2500SE,123,2.1".parse().unwrap();
        let found = model::detect(&MODELS, &idn).map(|m| m.kind);
        assert_eq!(found, Some(Kind::Forcer));
        assert_eq!(model::by_name(&MODELS, "oven").map(|m| m.kind), Some(Kind::Oven));
        let xstream = "MPI THERMAL,X-Stream 4300,0,1.0".parse().unwrap();
        assert_eq!(model::detect(&MODELS, &xstream).map(|m| m.kind), Some(Kind::XStream));
    }
}
