//! Source/measure units: Keysight B2902A and Keithley 228/238.
//!
//! Every model carries its own command templates. The B2902A numbers its two
//! channels in each command; the Keithleys have one unnumbered output, so
//! their templates leave `{ch}` out and only channel 1 is accepted.

use std::{
    fmt::Display,
    ops::RangeInclusive,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{
    guard::Checked,
    model::{self, Matcher, ModelInfo},
    session::{ConnectOptions, Session},
    template,
    validate::{one_of, Validate},
    Instrument, Resource, ResourceManager,
};
use crate::{error::ValidationError, scpi, utils::linspace, Error, Result};

const FILTER_MODES: &[&str] = &["MOV", "REP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Voltage,
    Current,
}

impl SourceMode {
    pub fn token(self) -> &'static str {
        match self {
            SourceMode::Voltage => "VOLT",
            SourceMode::Current => "CURR",
        }
    }

    /// The quantity held within limits while sourcing this one.
    pub fn compliance(self) -> SourceMode {
        match self {
            SourceMode::Voltage => SourceMode::Current,
            SourceMode::Current => SourceMode::Voltage,
        }
    }

    fn parse(mode: &str) -> Checked<Self> {
        match one_of("mode", mode, &["VOLT", "CURR"])? {
            "VOLT" => Ok(SourceMode::Voltage),
            _ => Ok(SourceMode::Current),
        }
    }
}

/// Command templates. `{ch}` is the channel, `{q}` the quantity token, `{v}`
/// a value.
#[derive(Debug)]
pub struct Commands {
    pub source: &'static str,
    pub source_query: &'static str,
    pub protection: &'static str,
    pub protection_query: &'static str,
    /// Current compliance programmed before a stepped sweep.
    pub sweep_compliance: &'static str,
    pub mode: &'static str,
    pub output: &'static str,
    pub output_query: &'static str,
    pub measure: &'static str,
    pub measure_all: Option<&'static str>,
    pub remote_sense: Option<&'static str>,
    pub range: Option<&'static str>,
    pub auto_range: Option<&'static str>,
}

/// `SENS:NPLC` style integration time and what the model accepts.
#[derive(Debug)]
pub struct Integration {
    pub command: &'static str,
    pub limits: RangeInclusive<f64>,
}

#[derive(Debug)]
pub struct SmuModel {
    pub name: &'static str,
    pub matcher: Matcher,
    pub channels: RangeInclusive<u8>,
    pub max_voltage: f64,
    pub max_current: f64,
    pub init: &'static [&'static str],
    pub commands: Commands,
    pub integration: Option<Integration>,
    /// Moving or repeating average filter (`SENS:AVER`).
    pub filter: bool,
    /// Instrument-driven staircase (`SOUR:VOLT:MODE SWE`).
    pub built_in_sweep: bool,
}

impl ModelInfo for SmuModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

impl SmuModel {
    fn max(&self, q: SourceMode) -> f64 {
        match q {
            SourceMode::Voltage => self.max_voltage,
            SourceMode::Current => self.max_current,
        }
    }
}

const KEITHLEY: Commands = Commands {
    source: "SOUR:{q} {v}",
    source_query: "SOUR:{q}?",
    protection: "SENS:{q}:PROT {v}",
    protection_query: "SENS:{q}:PROT?",
    sweep_compliance: "SOUR:CURR:COMP {v}",
    mode: "SOUR:FUNC:MODE {mode}",
    output: "OUTP {state}",
    output_query: "OUTP?",
    measure: "MEAS:{q}?",
    measure_all: None,
    remote_sense: None,
    range: None,
    auto_range: None,
};

static MODELS: [SmuModel; 3] = [
    SmuModel {
        name: "Keysight B2902A",
        matcher: Matcher {
            vendors: &[],
            models: &["B2902A"],
        },
        channels: 1..=2,
        max_voltage: 210.0,
        max_current: 3.0,
        init: &[],
        commands: Commands {
            source: ":SOUR{ch}:{q} {v}",
            source_query: ":SOUR{ch}:{q}?",
            protection: ":SENS{ch}:{q}:PROT {v}",
            protection_query: ":SENS{ch}:{q}:PROT?",
            sweep_compliance: ":SENS{ch}:CURR:PROT {v}",
            mode: ":SOUR{ch}:FUNC:MODE {mode}",
            output: "OUTP{ch} {state}",
            output_query: "OUTP{ch}?",
            measure: ":MEAS:{q}? (@{ch})",
            measure_all: Some(":MEAS? (@{ch})"),
            remote_sense: Some(":SENS{ch}:REM {state}"),
            range: None,
            auto_range: None,
        },
        integration: Some(Integration {
            command: ":SENS{ch}:CURR:NPLC {v}",
            limits: 0.004..=100.0,
        }),
        filter: false,
        built_in_sweep: false,
    },
    SmuModel {
        name: "Keithley 228",
        matcher: Matcher {
            vendors: &["KEITHLEY"],
            models: &["228"],
        },
        channels: 1..=1,
        max_voltage: 100.0,
        max_current: 1.0,
        init: &["SYST:BEEP:STAT OFF"],
        commands: Commands {
            range: Some("SENS:{q}:RANG {v}"),
            auto_range: Some("SENS:{q}:RANG:AUTO {state}"),
            ..KEITHLEY
        },
        integration: None,
        filter: false,
        built_in_sweep: false,
    },
    SmuModel {
        name: "Keithley 238",
        matcher: Matcher {
            vendors: &["KEITHLEY"],
            models: &["238"],
        },
        channels: 1..=1,
        max_voltage: 110.0,
        max_current: 1.5,
        init: &["SYST:BEEP:STAT OFF"],
        commands: KEITHLEY,
        integration: Some(Integration {
            command: "SENS:NPLC {v}",
            limits: 0.01..=10.0,
        }),
        filter: true,
        built_in_sweep: true,
    },
];

pub fn models() -> &'static [SmuModel] {
    &MODELS
}

/// One point of a stepped sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvPoint {
    pub voltage: f64,
    pub current: f64,
    /// Time since the sweep started.
    pub elapsed: Duration,
}

pub struct Smu<R: Resource> {
    session: Session<R>,
    model: &'static SmuModel,
}

impl<R: Resource> Instrument for Smu<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> Smu<R> {
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

    pub fn with_model(mut session: Session<R>, model: &'static SmuModel) -> Self {
        info!(model = model.name, address = %session.address(), "SMU ready");
        for command in model.init {
            if let Err(e) = session.write(command) {
                warn!(command, "start-up command rejected: {}", e);
            }
        }
        Self { session, model }
    }

    pub fn model(&self) -> &'static SmuModel {
        self.model
    }

    fn require<T>(&self, operation: &str, feature: Option<T>) -> Checked<T> {
        feature.ok_or_else(|| ValidationError::unsupported(operation, self.model.name))
    }

    fn channel<'a>(&self, operation: &'a str, ch: u8) -> Checked<Validate<'a>> {
        let channels = self.model.channels.clone();
        Validate::new(operation).arg("channel", &ch, |c| channels.contains(c))
    }

    fn send(&mut self, operation: &str, command: &str, args: &[(&str, &dyn Display)]) -> Checked<()> {
        self.session
            .guarded(operation, (), |m| m.write(&template::render(command, args)?))
    }

    fn source(&mut self, operation: &str, q: SourceMode, level: f64, ch: u8) -> Checked<()> {
        let max = self.model.max(q);
        self.channel(operation, ch)?.range("level", level, -max..=max)?;
        let command = self.model.commands.source;
        self.send(operation, command, &[("ch", &ch), ("q", &q.token()), ("v", &level)])
    }

    pub fn set_voltage(&mut self, voltage: f64, ch: u8) -> Checked<()> {
        self.source("set_voltage", SourceMode::Voltage, voltage, ch)
    }

    pub fn set_current(&mut self, current: f64, ch: u8) -> Checked<()> {
        self.source("set_current", SourceMode::Current, current, ch)
    }

    /// Programmed source level.
    pub fn get_source_level(&mut self, q: SourceMode, ch: u8) -> Checked<f64> {
        self.channel("get_source_level", ch)?;
        let default = self.session.default_reading();
        let command = self.model.commands.source_query;
        self.session.guarded("get_source_level", default, |m| {
            m.query_float(&template::render(command, &[("ch", &ch), ("q", &q.token())])?)
        })
    }

    fn protect(&mut self, operation: &str, q: SourceMode, limit: f64, ch: u8) -> Checked<()> {
        let max = self.model.max(q);
        self.channel(operation, ch)?.range("limit", limit, 0.0..=max)?;
        let command = self.model.commands.protection;
        self.send(operation, command, &[("ch", &ch), ("q", &q.token()), ("v", &limit)])
    }

    fn protection(&mut self, operation: &str, q: SourceMode, ch: u8) -> Checked<f64> {
        self.channel(operation, ch)?;
        let default = self.session.default_reading();
        let command = self.model.commands.protection_query;
        self.session.guarded(operation, default, |m| {
            m.query_float(&template::render(command, &[("ch", &ch), ("q", &q.token())])?)
        })
    }

    pub fn set_voltage_compliance(&mut self, limit: f64, ch: u8) -> Checked<()> {
        self.protect("set_voltage_compliance", SourceMode::Voltage, limit, ch)
    }

    pub fn get_voltage_compliance(&mut self, ch: u8) -> Checked<f64> {
        self.protection("get_voltage_compliance", SourceMode::Voltage, ch)
    }

    pub fn set_current_compliance(&mut self, limit: f64, ch: u8) -> Checked<()> {
        self.protect("set_current_compliance", SourceMode::Current, limit, ch)
    }

    pub fn get_current_compliance(&mut self, ch: u8) -> Checked<f64> {
        self.protection("get_current_compliance", SourceMode::Current, ch)
    }

    /// Both protection limits; each must be positive and within the model's
    /// ratings.
    pub fn configure_limits(&mut self, voltage_limit: f64, current_limit: f64, ch: u8) -> Checked<()> {
        Validate::new("configure_limits")
            .arg("voltage_limit", &voltage_limit, |v| *v > 0.0)?
            .arg("current_limit", &current_limit, |i| *i > 0.0)?;
        self.protect("configure_limits", SourceMode::Voltage, voltage_limit, ch)?;
        self.protect("configure_limits", SourceMode::Current, current_limit, ch)?;
        info!(instrument = %self.session.name(), voltage_limit, current_limit, "limits set");
        Ok(())
    }

    fn switch(&mut self, operation: &str, ch: u8, on: bool) -> Checked<()> {
        self.channel(operation, ch)?;
        let command = self.model.commands.output;
        self.send(operation, command, &[("ch", &ch), ("state", &scpi::on_off(on))])?;
        info!(instrument = %self.session.name(), channel = ch, on, "output switched");
        Ok(())
    }

    pub fn enable_output(&mut self, ch: u8) -> Checked<()> {
        self.switch("enable_output", ch, true)
    }

    pub fn disable_output(&mut self, ch: u8) -> Checked<()> {
        self.switch("disable_output", ch, false)
    }

    pub fn get_output_state(&mut self, ch: u8) -> Checked<bool> {
        self.channel("get_output_state", ch)?;
        let command = self.model.commands.output_query;
        self.session.guarded("get_output_state", false, |m| {
            m.query_bool(&template::render(command, &[("ch", &ch)])?)
        })
    }

    /// `VOLT` or `CURR`.
    pub fn set_mode(&mut self, mode: &str, ch: u8) -> Checked<()> {
        self.channel("set_mode", ch)?;
        let mode = SourceMode::parse(mode)?;
        let command = self.model.commands.mode;
        self.send("set_mode", command, &[("ch", &ch), ("mode", &mode.token())])
    }

    pub fn configure_output_mode(&mut self, mode: &str, ch: u8) -> Checked<()> {
        self.set_mode(mode, ch)?;
        info!(instrument = %self.session.name(), mode, channel = ch, "source function set");
        Ok(())
    }

    fn measure(&mut self, operation: &str, q: SourceMode, ch: u8) -> Checked<f64> {
        self.channel(operation, ch)?;
        let default = self.session.default_reading();
        let command = self.model.commands.measure;
        self.session.guarded(operation, default, |m| {
            m.query_float(&template::render(command, &[("ch", &ch), ("q", &q.token())])?)
        })
    }

    pub fn measure_voltage(&mut self, ch: u8) -> Checked<f64> {
        self.measure("measure_voltage", SourceMode::Voltage, ch)
    }

    pub fn measure_current(&mut self, ch: u8) -> Checked<f64> {
        self.measure("measure_current", SourceMode::Current, ch)
    }

    /// Voltage then current.
    pub fn measure_both(&mut self, ch: u8) -> Checked<(f64, f64)> {
        Ok((self.measure_voltage(ch)?, self.measure_current(ch)?))
    }

    /// Everything `:MEAS?` reports for the channel, in instrument order.
    pub fn get_all_measurements(&mut self, ch: u8) -> Checked<Vec<f64>> {
        let command = self.require("get_all_measurements", self.model.commands.measure_all)?;
        self.channel("get_all_measurements", ch)?;
        self.session.guarded("get_all_measurements", Vec::new(), |m| {
            m.query_ascii_values(&template::render(command, &[("ch", &ch)])?, ',')
        })
    }

    /// Power-line cycles per reading.
    pub fn set_integration_time(&mut self, nplc: f64, ch: u8) -> Checked<()> {
        let integration = self.require("set_integration_time", self.model.integration.as_ref())?;
        self.channel("set_integration_time", ch)?
            .range("nplc", nplc, integration.limits.clone())?;
        debug!(nplc, channel = ch, "integration time");
        self.send("set_integration_time", integration.command, &[("ch", &ch), ("v", &nplc)])
    }

    /// Four-wire (remote) sensing.
    pub fn set_remote_sense(&mut self, enabled: bool, ch: u8) -> Checked<()> {
        let command = self.require("set_remote_sense", self.model.commands.remote_sense)?;
        self.channel("set_remote_sense", ch)?;
        self.send("set_remote_sense", command, &[("ch", &ch), ("state", &scpi::on_off(enabled))])
    }

    fn set_range(&mut self, operation: &str, q: SourceMode, range: f64, ch: u8) -> Checked<()> {
        let command = self.require(operation, self.model.commands.range)?;
        let max = self.model.max(q);
        self.channel(operation, ch)?
            .arg("range", &range, |r| *r > 0.0 && *r <= max)?;
        self.send(operation, command, &[("ch", &ch), ("q", &q.token()), ("v", &range)])
    }

    pub fn set_voltage_range(&mut self, range: f64, ch: u8) -> Checked<()> {
        self.set_range("set_voltage_range", SourceMode::Voltage, range, ch)
    }

    pub fn set_current_range(&mut self, range: f64, ch: u8) -> Checked<()> {
        self.set_range("set_current_range", SourceMode::Current, range, ch)
    }

    /// Auto-ranging for `VOLT` or `CURR` measurements.
    pub fn set_auto_range(&mut self, mode: &str, enabled: bool, ch: u8) -> Checked<()> {
        let command = self.require("set_auto_range", self.model.commands.auto_range)?;
        self.channel("set_auto_range", ch)?;
        let q = SourceMode::parse(mode)?;
        let state = if enabled { 1 } else { 0 };
        self.send("set_auto_range", command, &[("ch", &ch), ("q", &q.token()), ("state", &state)])
    }

    /// Averages `count` readings, `MOV`ing or `REP`eating.
    pub fn configure_filter(&mut self, count: u32, mode: &str) -> Checked<()> {
        self.require("configure_filter", self.model.filter.then_some(()))?;
        Validate::new("configure_filter").range("count", count, 1..=100)?;
        let mode = one_of("mode", mode, FILTER_MODES)?;
        self.session.guarded("configure_filter", (), |m| {
            m.write(&format!("SENS:AVER:COUN {}", count))?;
            m.write(&format!("SENS:AVER:TCON {}", mode))?;
            m.write("SENS:AVER ON")
        })?;
        debug!(count, mode, "filter configured");
        Ok(())
    }

    /// Programs the instrument's own voltage staircase.
    pub fn configure_built_in_sweep(&mut self, start: f64, stop: f64, steps: u32) -> Checked<()> {
        self.require("configure_built_in_sweep", self.model.built_in_sweep.then_some(()))?;
        let max = self.model.max_voltage;
        Validate::new("configure_built_in_sweep")
            .range("start", start, -max..=max)?
            .range("stop", stop, -max..=max)?
            .arg("steps", &steps, |s| *s > 0)?;
        let step = (stop - start) / f64::from(steps.saturating_sub(1).max(1));
        self.session.guarded("configure_built_in_sweep", (), |m| {
            m.write(&format!("SOUR:VOLT:STAR {}", start))?;
            m.write(&format!("SOUR:VOLT:STOP {}", stop))?;
            m.write(&format!("SOUR:VOLT:STEP {}", step))?;
            m.write("SOUR:VOLT:MODE SWE")
        })?;
        info!(instrument = %self.session.name(), start, stop, steps, "built-in sweep configured");
        Ok(())
    }

    /// Source mode, level and the opposite quantity's compliance in one go.
    pub fn configure_output(
        &mut self,
        mode: &str,
        level: f64,
        compliance: f64,
        ch: u8,
    ) -> Checked<()> {
        let source = SourceMode::parse(mode)?;
        self.set_mode(source.token(), ch)?;
        self.source("configure_output", source, level, ch)?;
        self.protect("configure_output", source.compliance(), compliance, ch)
    }

    /// Steps the voltage from `start` to `stop` in `steps` points, measuring
    /// voltage and current `delay` after each. The output is switched on for
    /// the sweep and left as it was found.
    pub fn perform_voltage_sweep(
        &mut self,
        start: f64,
        stop: f64,
        steps: usize,
        compliance: f64,
        delay: Duration,
        ch: u8,
    ) -> Checked<Vec<IvPoint>> {
        let (max_v, max_i) = (self.model.max_voltage, self.model.max_current);
        self.channel("perform_voltage_sweep", ch)?
            .range("start", start, -max_v..=max_v)?
            .range("stop", stop, -max_v..=max_v)?
            .arg("steps", &steps, |s| *s > 0)?
            .arg("compliance", &compliance, |c| *c > 0.0 && *c <= max_i)?;
        let was_on = self.get_output_state(ch)?;
        let command = self.model.commands.sweep_compliance;
        self.send("perform_voltage_sweep", command, &[("ch", &ch), ("v", &compliance)])?;
        if !was_on {
            self.enable_output(ch)?;
        }
        info!(instrument = %self.session.name(), start, stop, steps, "voltage sweep started");
        let began = Instant::now();
        let mut points = Vec::with_capacity(steps);
        for voltage in linspace(start, stop, steps) {
            self.set_voltage(voltage, ch)?;
            thread::sleep(delay);
            let (voltage, current) = self.measure_both(ch)?;
            points.push(IvPoint {
                voltage,
                current,
                elapsed: began.elapsed(),
            });
        }
        if !was_on {
            self.disable_output(ch)?;
        }
        Ok(points)
    }

    /// Walks the voltage setpoint to `target` in increments of at most
    /// `step`, waiting `delay` after each. Starts from the programmed level,
    /// or 0 V when that cannot be read.
    pub fn ramp_voltage(&mut self, target: f64, step: f64, delay: Duration, ch: u8) -> Checked<()> {
        let max = self.model.max_voltage;
        self.channel("ramp_voltage", ch)?
            .range("target", target, -max..=max)?
            .arg("step", &step, |s| *s > 0.0 && s.is_finite())?;
        let start = self.get_source_level(SourceMode::Voltage, ch)?;
        let mut level = if start.is_finite() { start } else { 0.0 };
        debug!(from = level, to = target, step, "ramping voltage");
        while (target - level).abs() > f64::EPSILON {
            let delta = (target - level).clamp(-step, step);
            level = if (target - level).abs() <= step { target } else { level + delta };
            self.set_voltage(level, ch)?;
            thread::sleep(delay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compliance_is_the_other_quantity() {
        assert_eq!(SourceMode::Voltage.compliance(), SourceMode::Current);
        assert_eq!(SourceMode::Current.compliance().token(), "VOLT");
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(SourceMode::parse("curr"), Ok(SourceMode::Current));
        assert!(SourceMode::parse("RES").is_err());
    }

    #[test]
    fn keithleys_are_told_apart_by_model_number() {
        let idn = "KEITHLEY INSTRUMENTS INC.,MODEL 238,0,B01".parse().unwrap();
        let found = model::detect(&MODELS, &idn).map(|m| m.name);
        assert_eq!(found, Some("Keithley 238"));
        let b2902a = model::by_name(&MODELS, "b2902a").unwrap();
        assert_eq!(b2902a.channels, 1..=2);
    }
}
