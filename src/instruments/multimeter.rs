//! Bench multimeters.
//!
//! One driver serves every supported model; what differs between them lives in
//! a [`MultimeterModel`] table entry. [`Multimeter::open`] has to know the model
//! to configure it, so unlike the other families it refuses to return an
//! unidentified instrument.

use std::{thread, time::Duration};

use tracing::{info, warn};

use super::{
    guard::Checked,
    model::{self, Matcher, ModelInfo},
    session::{reject, ConnectOptions, Session},
    template,
    validate::{one_of, Validate},
    Instrument, Resource, ResourceManager,
};
use crate::{
    error::ValidationError,
    scpi::{self, Function},
    Error, Result,
};

const CONFIGURE: &str = "CONF:{f}";
const MEASURE: &str = "MEAS:{f}?";
const RANGE: &str = "{f}:RANG";
const AUTO_RANGE: &str = "{f}:RANG:AUTO";
const NPLC: &str = "SENS:{f}:NPLC";

pub const THERMOCOUPLE_TYPES: &[&str] = &["J", "K", "T", "E", "R", "S", "B", "N"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontPanel {
    /// Text command template with a `{text}` placeholder, and the clear command.
    Text {
        set: &'static str,
        clear: &'static str,
        width: usize,
    },
    None,
}

#[derive(Debug, PartialEq)]
pub struct MultimeterModel {
    pub name: &'static str,
    pub matcher: Matcher,
    /// Sent once after the session is up.
    pub init: &'static [&'static str],
    /// Sent before every `READ?`.
    pub read_prelude: &'static [&'static str],
    pub trigger_sources: &'static [&'static str],
    pub display: FrontPanel,
    /// Averaging filter (`SENS:AVER`).
    pub filter: bool,
    /// Header of the thermocouple type setting, when the model measures
    /// temperature.
    pub thermocouple: Option<&'static str>,
    pub temperature_unit: bool,
    pub dual_display: bool,
    pub reference_junction: bool,
}

impl ModelInfo for MultimeterModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

const HP_DISPLAY: FrontPanel = FrontPanel::Text {
    set: "DISP:TEXT \"{text}\"",
    clear: "DISP:TEXT:CLE",
    width: 12,
};

pub static MODELS: [MultimeterModel; 4] = [
    MultimeterModel {
        name: "HP 34401A",
        matcher: Matcher {
            vendors: &[],
            models: &["34401A"],
        },
        init: &[],
        read_prelude: &[],
        trigger_sources: &["IMM", "BUS", "EXT"],
        display: HP_DISPLAY,
        filter: false,
        thermocouple: None,
        temperature_unit: false,
        dual_display: false,
        reference_junction: false,
    },
    MultimeterModel {
        name: "Keithley 2000",
        matcher: Matcher {
            vendors: &["KEITHLEY"],
            models: &["2000"],
        },
        init: &["SYST:BEEP:STAT OFF"],
        read_prelude: &["INIT:CONT OFF"],
        trigger_sources: &["IMM", "BUS", "EXT", "TIM", "MAN"],
        display: HP_DISPLAY,
        filter: true,
        thermocouple: Some("TEMP:TC:TYPE"),
        temperature_unit: false,
        dual_display: false,
        reference_junction: false,
    },
    MultimeterModel {
        name: "Keithley 2110",
        matcher: Matcher {
            vendors: &["KEITHLEY"],
            models: &["2110"],
        },
        init: &["SYST:BEEP:STAT OFF"],
        read_prelude: &[],
        trigger_sources: &["IMM", "BUS", "EXT"],
        display: HP_DISPLAY,
        filter: true,
        thermocouple: Some("TC:TYPE"),
        temperature_unit: true,
        dual_display: false,
        reference_junction: false,
    },
    MultimeterModel {
        name: "Tektronix DMM4050",
        matcher: Matcher {
            vendors: &["TEKTRONIX"],
            models: &["DMM4050", "4050"],
        },
        init: &[],
        read_prelude: &[],
        trigger_sources: &["IMM", "BUS", "EXT"],
        display: FrontPanel::Text {
            set: "DISP:TEXT \"{text}\"",
            clear: "DISP:TEXT:CLE",
            width: 16,
        },
        filter: false,
        thermocouple: Some("TEMP:TC:TYPE"),
        temperature_unit: false,
        dual_display: true,
        reference_junction: true,
    },
];

/// Summary of repeated readings. Spread is the population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl Statistics {
    /// `None` when no reading is finite; failed reads (NaN) are skipped.
    pub fn from_readings(readings: &[f64]) -> Option<Self> {
        let valid: Vec<f64> = readings.iter().copied().filter(|r| r.is_finite()).collect();
        if valid.is_empty() {
            return None;
        }
        let n = valid.len() as f64;
        let mean = valid.iter().sum::<f64>() / n;
        let var = valid.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        Some(Statistics {
            samples: valid.len(),
            min: valid.iter().copied().fold(f64::INFINITY, f64::min),
            max: valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std_dev: var.sqrt(),
        })
    }
}

pub struct Multimeter<R: Resource> {
    session: Session<R>,
    model: &'static MultimeterModel,
}

impl<R: Resource> Instrument for Multimeter<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> Multimeter<R> {
    /// Connects and picks the model from `model_override` if given, else from the
    /// identification string.
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

    /// Takes over an open session and sends the model's start-up commands.
    pub fn with_model(mut session: Session<R>, model: &'static MultimeterModel) -> Self {
        info!(model = model.name, address = %session.address(), "multimeter ready");
        for command in model.init {
            if let Err(e) = session.write(command) {
                warn!(command, "start-up command rejected: {}", e);
            }
        }
        Self { session, model }
    }

    pub fn model(&self) -> &'static MultimeterModel {
        self.model
    }

    fn require(&self, operation: &str, supported: bool) -> Checked<()> {
        if supported {
            Ok(())
        } else {
            Err(ValidationError::unsupported(operation, self.model.name))
        }
    }

    /// One-shot `MEAS:<f>?`.
    pub fn measure(&mut self, function: &str) -> Checked<f64> {
        let f: Function = function.parse()?;
        let default = self.session.default_reading();
        self.session.guarded("measure", default, |m| {
            m.query_float(&template::render(MEASURE, &[("f", &f.token())])?)
        })
    }

    /// Triggers and reads with the current configuration.
    pub fn read(&mut self) -> Checked<f64> {
        let prelude = self.model.read_prelude;
        let default = self.session.default_reading();
        self.session.guarded("read", default, |m| {
            for command in prelude {
                m.write(command)?;
            }
            m.query_float("READ?")
        })
    }

    /// Last reading, without triggering.
    pub fn fetch(&mut self) -> Checked<f64> {
        let default = self.session.default_reading();
        self.session.guarded("fetch", default, |m| m.query_float("FETC?"))
    }

    pub fn set_function(&mut self, function: &str) -> Checked<()> {
        let f: Function = function.parse()?;
        self.session.guarded("set_function", (), |m| {
            m.write(&template::render(CONFIGURE, &[("f", &f.token())])?)
        })
    }

    /// `None` when the instrument reports something outside the known set,
    /// such as temperature.
    pub fn get_function(&mut self) -> Checked<Option<Function>> {
        self.session.guarded("get_function", None, |m| {
            Ok(Function::lookup(scpi::unquote(&m.query("FUNC?")?)))
        })
    }

    pub fn set_range(&mut self, function: &str, range: f64) -> Checked<()> {
        let f: Function = function.parse()?;
        Validate::new("set_range").arg("range", &range, |r| *r > 0.0)?;
        self.session.guarded("set_range", (), |m| {
            let header = template::render(RANGE, &[("f", &f.token())])?;
            m.write(&format!("{} {}", header, range))
        })
    }

    pub fn get_range(&mut self, function: &str) -> Checked<f64> {
        let f: Function = function.parse()?;
        let default = self.session.default_reading();
        self.session.guarded("get_range", default, |m| {
            let header = template::render(RANGE, &[("f", &f.token())])?;
            m.query_float(&format!("{}?", header))
        })
    }

    pub fn set_auto_range(&mut self, function: &str, enabled: bool) -> Checked<()> {
        let f: Function = function.parse()?;
        self.session.guarded("set_auto_range", (), |m| {
            let header = template::render(AUTO_RANGE, &[("f", &f.token())])?;
            m.write(&format!("{} {}", header, scpi::on_off(enabled)))
        })
    }

    pub fn get_auto_range(&mut self, function: &str) -> Checked<bool> {
        let f: Function = function.parse()?;
        self.session.guarded("get_auto_range", false, |m| {
            let header = template::render(AUTO_RANGE, &[("f", &f.token())])?;
            m.query_bool(&format!("{}?", header))
        })
    }

    /// Integration time in power-line cycles.
    pub fn set_nplc(&mut self, function: &str, nplc: f64) -> Checked<()> {
        let f: Function = function.parse()?;
        Validate::new("set_nplc").range("nplc", nplc, 0.01..=100.0)?;
        self.session.guarded("set_nplc", (), |m| {
            let header = template::render(NPLC, &[("f", &f.sense_token())])?;
            m.write(&format!("{} {}", header, nplc))
        })
    }

    pub fn get_nplc(&mut self, function: &str) -> Checked<f64> {
        let f: Function = function.parse()?;
        let default = self.session.default_reading();
        self.session.guarded("get_nplc", default, |m| {
            let header = template::render(NPLC, &[("f", &f.sense_token())])?;
            m.query_float(&format!("{}?", header))
        })
    }

    pub fn setup_trigger(&mut self, source: &str, count: u32) -> Checked<()> {
        let source = one_of("source", source, self.model.trigger_sources)?;
        Validate::new("setup_trigger").range("count", count, 1..=50_000)?;
        self.session.guarded("setup_trigger", (), |m| {
            m.write(&format!("TRIG:SOUR {}", source))?;
            m.write(&format!("TRIG:COUN {}", count))
        })
    }

    pub fn set_sample_count(&mut self, count: u32) -> Checked<()> {
        Validate::new("set_sample_count").range("count", count, 1..=50_000)?;
        self.session.guarded("set_sample_count", (), |m| {
            m.write(&format!("SAMP:COUN {}", count))
        })
    }

    /// Arms the trigger system; collect the result with [`fetch`](Self::fetch).
    pub fn initiate(&mut self) -> Checked<bool> {
        self.session
            .guarded("initiate", false, |m| m.write("INIT").map(|_| true))
    }

    /// Selects `function`, takes `samples` readings `delay` apart and
    /// summarises them.
    pub fn measure_statistics(
        &mut self,
        function: &str,
        samples: usize,
        delay: Duration,
    ) -> Checked<Option<Statistics>> {
        Validate::new("measure_statistics").arg("samples", &samples, |n| *n > 0)?;
        self.set_function(function)?;
        let mut readings = Vec::with_capacity(samples);
        for i in 0..samples {
            readings.push(self.read()?);
            if i + 1 < samples {
                thread::sleep(delay);
            }
        }
        let stats = Statistics::from_readings(&readings);
        if let Some(s) = &stats {
            info!(
                instrument = %self.session.name(),
                samples = s.samples,
                mean = s.mean,
                std_dev = s.std_dev,
                "statistics measured"
            );
        }
        Ok(stats)
    }

    pub fn display_text(&mut self, text: &str) -> Checked<()> {
        let (set, width) = match self.model.display {
            FrontPanel::Text { set, width, .. } => (set, width),
            FrontPanel::None => return Err(ValidationError::unsupported("display_text", self.model.name)),
        };
        Validate::new("display_text").arg("text", text, |t: &str| {
            t.chars().count() <= width && !t.contains('"')
        })?;
        self.session.guarded("display_text", (), |m| {
            m.write(&template::render(set, &[("text", &text)])?)
        })
    }

    pub fn clear_display(&mut self) -> Checked<()> {
        match self.model.display {
            FrontPanel::Text { clear, .. } => self.session.write(clear),
            FrontPanel::None => Err(ValidationError::unsupported("clear_display", self.model.name)),
        }
    }

    pub fn set_beeper(&mut self, enabled: bool) -> Checked<()> {
        let command = format!("SYST:BEEP:STAT {}", scpi::on_off(enabled));
        self.session.write(&command)
    }

    /// Averaging filter: `kind` is `MOV` (moving) or `REP` (repeating).
    pub fn set_filter(&mut self, kind: &str, count: u32, enabled: bool) -> Checked<()> {
        self.require("set_filter", self.model.filter)?;
        let kind = one_of("kind", kind, &["MOV", "REP"])?;
        Validate::new("set_filter").range("count", count, 1..=100)?;
        self.session.guarded("set_filter", (), |m| {
            m.write(&format!("SENS:AVER:TCON {}", kind))?;
            m.write(&format!("SENS:AVER:COUN {}", count))?;
            m.write(&format!("SENS:AVER {}", scpi::on_off(enabled)))
        })
    }

    pub fn set_thermocouple_type(&mut self, kind: &str) -> Checked<()> {
        let header = match self.model.thermocouple {
            Some(h) => h,
            None => return Err(ValidationError::unsupported("set_thermocouple_type", self.model.name)),
        };
        let kind = one_of("thermocouple_type", kind, THERMOCOUPLE_TYPES)?;
        self.session.write(&format!("{} {}", header, kind))
    }

    pub fn get_thermocouple_type(&mut self) -> Checked<String> {
        let header = match self.model.thermocouple {
            Some(h) => h,
            None => return Err(ValidationError::unsupported("get_thermocouple_type", self.model.name)),
        };
        self.session
            .query(&format!("{}?", header))
            .map(|t| t.trim().to_string())
    }

    /// `C`/`CEL`, `F`/`FAR` or `K`.
    pub fn set_temperature_unit(&mut self, unit: &str) -> Checked<()> {
        self.require("set_temperature_unit", self.model.temperature_unit)?;
        let unit = match unit.trim().to_ascii_uppercase().as_str() {
            "C" | "CEL" => "CEL",
            "F" | "FAR" => "FAR",
            "K" => "K",
            _ => return reject("unit", unit),
        };
        self.session.write(&format!("UNIT:TEMP {}", unit))
    }

    /// Shows `secondary` on the second display, or turns it off with `None`.
    pub fn set_dual_display(&mut self, secondary: Option<&str>) -> Checked<()> {
        self.require("set_dual_display", self.model.dual_display)?;
        let secondary = secondary.map(str::parse::<Function>).transpose()?;
        self.session.guarded("set_dual_display", (), |m| match secondary {
            Some(f) => {
                m.write(&format!("SENS:FUNC2 \"{}\"", f.token()))?;
                m.write("DISP:WIND2:STAT ON")
            }
            None => m.write("DISP:WIND2:STAT OFF"),
        })
    }

    /// Primary and secondary readings of one trigger.
    pub fn read_dual_display(&mut self) -> Checked<(f64, f64)> {
        self.require("read_dual_display", self.model.dual_display)?;
        let default = self.session.default_reading();
        self.session
            .guarded("read_dual_display", (default, default), |m| {
                let primary = m.query_float("READ?")?;
                let secondary = m.query_float("SENS:DATA2?")?;
                Ok((primary, secondary))
            })
    }

    /// Thermocouple reference junction; `SIM` needs the simulated
    /// temperature in °C.
    pub fn set_reference_junction(&mut self, kind: &str, simulated: Option<f64>) -> Checked<()> {
        self.require("set_reference_junction", self.model.reference_junction)?;
        let kind = one_of("junction", kind, &["INT", "EXT", "SIM"])?;
        let simulated = match (kind, simulated) {
            ("SIM", Some(t)) => {
                Validate::new("set_reference_junction").range("temperature", t, 0.0..=50.0)?;
                Some(t)
            }
            ("SIM", None) => return reject("temperature", "missing"),
            _ => None,
        };
        self.session.guarded("set_reference_junction", (), |m| {
            m.write(&format!("TEMP:TRAN:TC:RJUN:TYPE {}", kind))?;
            match simulated {
                Some(t) => m.write(&format!("TEMP:TRAN:TC:RJUN:SIM {:.1}", t)),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_skip_failed_readings() {
        let s = Statistics::from_readings(&[1.0, f64::NAN, 3.0]).unwrap();
        assert_eq!(s.samples, 2);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.std_dev, 1.0);
        assert!(Statistics::from_readings(&[f64::NAN]).is_none());
    }

    #[test]
    fn every_model_is_reachable_by_name() {
        for m in MODELS.iter() {
            assert_eq!(model::by_name(&MODELS, m.name).map(|f| f.name), Some(m.name));
        }
    }

    #[test]
    fn keithley_models_silence_the_beeper() {
        for name in ["Keithley 2000", "Keithley 2110"] {
            let m = model::by_name(&MODELS, name).unwrap();
            assert!(m.init.contains(&"SYST:BEEP:STAT OFF"));
        }
    }
}
