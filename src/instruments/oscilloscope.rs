//! Tektronix oscilloscopes: TDS and TBS entry models, DPO/MSO2000 and the
//! MDO3000 with its spectrum analyser.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use super::{
    guard::Checked,
    model::{self, Matcher, ModelInfo},
    session::{ConnectOptions, Session},
    validate::{one_of, Validate},
    Instrument, Messenger, Resource, ResourceManager,
};
use crate::{error::ValidationError, scpi, utils::linspace, Error, Result};

pub const RECORD_LENGTH: usize = 10_000;
pub const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_LABEL: usize = 32;

/// Friendly names and the `MEASUrement:IMMed:TYPe` token they stand for.
const MEASUREMENTS: &[(&str, &str)] = &[
    ("FREQUENCY", "FREQ"),
    ("FREQ", "FREQ"),
    ("PERIOD", "PERI"),
    ("PERI", "PERI"),
    ("VPP", "PK2PK"),
    ("PK2PK", "PK2PK"),
    ("MEAN", "MEAN"),
    ("RMS", "RMS"),
    ("CRMS", "CRMS"),
    ("AMPLITUDE", "AMP"),
    ("AMP", "AMP"),
    ("MAX", "MAX"),
    ("MAXIMUM", "MAX"),
    ("MIN", "MINI"),
    ("MINIMUM", "MINI"),
    ("RISE", "RISE"),
    ("FALL", "FALL"),
    ("PWIDTH", "PWI"),
    ("NWIDTH", "NWI"),
    ("HIGH", "HIGH"),
    ("LOW", "LOW"),
];

const ACQUISITION_MODES: &[&str] = &["SAMPLE", "AVERAGE", "ENVELOPE", "PEAKDETECT", "HIRES"];
const GRATICULES: &[&str] = &["GRID", "CROSS", "FRAME", "FULL"];

/// Bandwidth programmed by [`Oscilloscope::set_bandwidth_limit`].
pub const BANDWIDTH_LIMIT: f64 = 20e6;

#[derive(Debug)]
pub struct ScopeModel {
    pub name: &'static str,
    pub matcher: Matcher,
    pub channels: u8,
    /// Frequency-domain acquisition (`SPECTrum:*`).
    pub spectrum: bool,
    /// 20 MHz channel bandwidth limit.
    pub bandwidth_limit: bool,
    /// Trigger holdoff as a percentage of its maximum.
    pub holdoff: bool,
}

impl ModelInfo for ScopeModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

static MODELS: [ScopeModel; 4] = [
    ScopeModel {
        name: "Tektronix TDS2000",
        matcher: Matcher {
            vendors: &["TEKTRONIX"],
            models: &["TDS"],
        },
        channels: 2,
        spectrum: false,
        bandwidth_limit: false,
        holdoff: false,
    },
    ScopeModel {
        name: "Tektronix DPO2000",
        matcher: Matcher {
            vendors: &["TEKTRONIX"],
            models: &["DPO2", "MSO2"],
        },
        channels: 4,
        spectrum: false,
        bandwidth_limit: false,
        holdoff: false,
    },
    ScopeModel {
        name: "Tektronix MDO3000",
        matcher: Matcher {
            vendors: &["TEKTRONIX"],
            models: &["MDO3"],
        },
        channels: 4,
        spectrum: true,
        bandwidth_limit: false,
        holdoff: false,
    },
    ScopeModel {
        name: "Tektronix TBS1000",
        matcher: Matcher {
            vendors: &["TEKTRONIX"],
            models: &["TBS1"],
        },
        channels: 2,
        spectrum: false,
        bandwidth_limit: true,
        holdoff: true,
    },
];

pub fn models() -> &'static [ScopeModel] {
    &MODELS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Comma separated signed samples.
    Ascii,
    /// One unsigned byte per sample in a definite block.
    Binary,
}

impl Encoding {
    fn token(self) -> &'static str {
        match self {
            Encoding::Ascii => "ASCII",
            Encoding::Binary => "RPBINARY",
        }
    }
}

/// Preamble values that turn raw samples into time and volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub y_mult: f64,
    pub y_zero: f64,
    pub x_incr: f64,
    pub pt_off: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveform {
    pub time: Vec<f64>,
    pub volts: Vec<f64>,
}

impl Waveform {
    /// Unsigned binary samples are centred on 127.5 counts; ASCII samples
    /// are already signed.
    pub fn from_samples(samples: &[f64], encoding: Encoding, scale: &Scaling) -> Self {
        let centre = match encoding {
            Encoding::Ascii => 0.0,
            Encoding::Binary => 127.5,
        };
        Waveform {
            time: (0..samples.len())
                .map(|i| i as f64 * scale.x_incr + scale.pt_off)
                .collect(),
            volts: samples
                .iter()
                .map(|adc| (adc - centre) * scale.y_mult + scale.y_zero)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.volts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volts.is_empty()
    }
}

/// Amplitudes from the spectrum analyser against their frequencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementStatistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

fn measurement_token(kind: &str) -> Checked<&'static str> {
    let wanted = kind.trim().to_ascii_uppercase();
    MEASUREMENTS
        .iter()
        .find(|(alias, _)| *alias == wanted)
        .map(|(_, token)| *token)
        .ok_or_else(|| ValidationError::invalid("measurement", kind))
}

pub struct Oscilloscope<R: Resource> {
    session: Session<R>,
    model: &'static ScopeModel,
}

impl<R: Resource> Instrument for Oscilloscope<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> Oscilloscope<R> {
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

    pub fn with_model(session: Session<R>, model: &'static ScopeModel) -> Self {
        info!(model = model.name, address = %session.address(), "oscilloscope ready");
        Self { session, model }
    }

    pub fn model(&self) -> &'static ScopeModel {
        self.model
    }

    fn require(&self, operation: &str, supported: bool) -> Checked<()> {
        if supported {
            Ok(())
        } else {
            Err(ValidationError::unsupported(operation, self.model.name))
        }
    }

    fn channel<'a>(&self, operation: &'a str, ch: u8) -> Checked<Validate<'a>> {
        let max = self.model.channels;
        Validate::new(operation).arg("channel", &ch, |c| (1..=max).contains(c))
    }

    /// Volts per division.
    pub fn set_vertical_scale(&mut self, scale: f64, ch: u8) -> Checked<()> {
        self.channel("set_vertical_scale", ch)?
            .arg("scale", &scale, |s| *s > 0.0)?;
        self.session.write(&format!("CH{}:SCA {}", ch, scale))
    }

    /// Divisions from centre.
    pub fn set_vertical_position(&mut self, position: f64, ch: u8) -> Checked<()> {
        self.channel("set_vertical_position", ch)?
            .range("position", position, -5.0..=5.0)?;
        self.session.write(&format!("CH{}:POSition {}", ch, position))
    }

    pub fn set_coupling(&mut self, coupling: &str, ch: u8) -> Checked<()> {
        self.channel("set_coupling", ch)?;
        let coupling = one_of("coupling", coupling, &["AC", "DC", "GND"])?;
        self.session.write(&format!("CH{}:COUPling {}", ch, coupling))
    }

    pub fn enable_channel(&mut self, ch: u8, enabled: bool) -> Checked<()> {
        self.channel("enable_channel", ch)?;
        self.session
            .write(&format!("SELECT:CH{} {}", ch, if enabled { 1 } else { 0 }))
    }

    pub fn set_channel_label(&mut self, label: &str, ch: u8) -> Checked<()> {
        self.channel("set_channel_label", ch)?.arg("label", label, |l: &str| {
            l.chars().count() <= MAX_LABEL && !l.contains('"')
        })?;
        self.session.write(&format!("CH{}:LAB \"{}\"", ch, label))
    }

    /// Seconds per division.
    pub fn set_horizontal_scale(&mut self, scale: f64) -> Checked<()> {
        Validate::new("set_horizontal_scale").arg("scale", &scale, |s| *s > 0.0)?;
        self.session.write(&format!("HORizontal:SCAle {}", scale))
    }

    pub fn set_trigger_source(&mut self, source: &str) -> Checked<()> {
        let source = one_of("source", source, &["CH1", "CH2", "CH3", "CH4", "EXT", "LINE"])?;
        self.session
            .write(&format!("TRIGger:A:EDGE:SOUrce {}", source))
    }

    pub fn set_trigger_level(&mut self, level: f64) -> Checked<()> {
        Validate::new("set_trigger_level").arg("level", &level, |l| l.is_finite())?;
        self.session.write(&format!("TRIGger:A:LEVel {}", level))
    }

    /// `averages` applies to `AVERAGE` mode only.
    pub fn set_acquisition_mode(&mut self, mode: &str, averages: Option<u32>) -> Checked<()> {
        let mode = one_of("mode", mode, ACQUISITION_MODES)?;
        let averages = match (mode, averages) {
            ("AVERAGE", Some(n)) => {
                Validate::new("set_acquisition_mode").range("averages", n, 2..=512)?;
                Some(n)
            }
            _ => None,
        };
        self.session.guarded("set_acquisition_mode", (), |m| {
            m.write(&format!("ACQuire:MODe {}", mode))?;
            match averages {
                Some(n) => m.write(&format!("ACQuire:NUMAVg {}", n)),
                None => Ok(()),
            }
        })
    }

    /// Immediate measurement such as `frequency` or `vpp` on one channel.
    pub fn measure(&mut self, kind: &str, ch: u8) -> Checked<f64> {
        self.channel("measure", ch)?;
        let token = measurement_token(kind)?;
        let default = self.session.default_reading();
        self.session.guarded("measure", default, |m| {
            m.write(&format!("MEASUrement:IMMed:SOUrce CH{}", ch))?;
            m.write(&format!("MEASUrement:IMMed:TYPe {}", token))?;
            m.query_float("MEASUrement:IMMed:VALue?")
        })
    }

    pub fn get_measurement_statistics(
        &mut self,
        kind: &str,
        ch: u8,
    ) -> Checked<Option<MeasurementStatistics>> {
        self.channel("get_measurement_statistics", ch)?;
        let token = measurement_token(kind)?;
        self.session.guarded("get_measurement_statistics", None, |m| {
            m.write(&format!("MEASUrement:IMMed:SOUrce1 CH{}", ch))?;
            m.write(&format!("MEASUrement:IMMed:TYPe {}", token))?;
            m.write("MEASUrement:IMMed:STATistics:STATE ON")?;
            Ok(Some(MeasurementStatistics {
                mean: m.query_float("MEASUrement:IMMed:STATistics:MEAN?")?,
                min: m.query_float("MEASUrement:IMMed:STATistics:MINimum?")?,
                max: m.query_float("MEASUrement:IMMed:STATistics:MAXimum?")?,
                std_dev: m.query_float("MEASUrement:IMMed:STATistics:STDdev?")?,
            }))
        })
    }

    fn scaling(m: &mut Messenger<R>) -> Result<Scaling> {
        Ok(Scaling {
            y_mult: m.query_float("WFMPRE:YMULT?")?,
            y_zero: m.query_float("WFMPRE:YZERO?")?,
            x_incr: m.query_float("WFMPRE:XINCR?")?,
            pt_off: m.query_float("WFMPRE:PT_OFF?")?,
        })
    }

    /// Transfers one channel's record and scales it to seconds and volts.
    pub fn acquire(&mut self, ch: u8, encoding: Encoding) -> Checked<Waveform> {
        self.channel("acquire", ch)?;
        let waveform = self.session.guarded("acquire", Waveform::default(), |m| {
            m.write(&format!("DATA:SOURCE CH{}", ch))?;
            m.write("DATA:START 1")?;
            m.write(&format!("DATA:STOP {}", RECORD_LENGTH))?;
            m.write(&format!("WFMPRE:ENC {}", encoding.token()))?;
            let samples: Vec<f64> = match encoding {
                Encoding::Ascii => m.query_ascii_values("CURVE?", ',')?,
                Encoding::Binary => m
                    .query_block("CURVE?")?
                    .iter()
                    .map(|b| f64::from(*b))
                    .collect(),
            };
            let scale = Self::scaling(m)?;
            Ok(Waveform::from_samples(&samples, encoding, &scale))
        })?;
        debug!(channel = ch, points = waveform.len(), "waveform acquired");
        Ok(waveform)
    }

    pub fn auto_set(&mut self) -> Checked<()> {
        self.session.write("AUTOSET EXECUTE")
    }

    pub fn run(&mut self) -> Checked<()> {
        self.session.write("ACQUIRE:STATE RUN")
    }

    pub fn stop(&mut self) -> Checked<()> {
        self.session.write("ACQUIRE:STATE STOP")
    }

    pub fn show_message(&mut self, message: &str) -> Checked<()> {
        Validate::new("show_message").arg("message", message, |t: &str| !t.contains('"'))?;
        self.session.write(&format!("MESSage:SHOW \"{}\"", message))
    }

    pub fn remove_message(&mut self) -> Checked<()> {
        self.session.write("MESSage:SHOW \"\"")
    }

    /// `GRID`, `CROSS`, `FRAME` or `FULL`.
    pub fn change_graticule(&mut self, graticule: &str) -> Checked<()> {
        let graticule = one_of("graticule", graticule, GRATICULES)?;
        self.session
            .write(&format!("DISPLAY:INTENSITY:GRATICULE {}", graticule))
    }

    /// Percent of full brightness.
    pub fn change_waveform_intensity(&mut self, intensity: u8) -> Checked<()> {
        Validate::new("change_waveform_intensity").range("intensity", intensity, 0..=100)?;
        self.session
            .write(&format!("DISplay:INTENSITY:WAVEFORM {}", intensity))
    }

    /// Switches between the spectrum analyser and the time domain.
    pub fn set_frequency_domain(&mut self, enabled: bool) -> Checked<()> {
        self.require("set_frequency_domain", self.model.spectrum)?;
        debug!(enabled, "frequency domain");
        self.session
            .write(&format!("SPECTrum:STATE {}", if enabled { 1 } else { 0 }))
    }

    pub fn set_frequency_span(&mut self, start: f64, stop: f64) -> Checked<()> {
        self.require("set_frequency_span", self.model.spectrum)?;
        Validate::new("set_frequency_span")
            .arg("start", &start, |f| *f > 0.0)?
            .arg("stop", &stop, |f| *f > start)?;
        self.session.guarded("set_frequency_span", (), |m| {
            m.write(&format!("SPECTrum:FREQuency:STARt {}", start))?;
            m.write(&format!("SPECTrum:FREQuency:STOP {}", stop))
        })
    }

    /// Spectrum of channel 1 with its frequency axis spread evenly over the
    /// programmed span. Empty on failure.
    pub fn acquire_spectrum(&mut self) -> Checked<Spectrum> {
        self.set_frequency_domain(true)?;
        let spectrum = self.session.guarded("acquire_spectrum", Spectrum::default(), |m| {
            m.write("SPECTrum:SOURce CH1")?;
            m.write("DATa:SOUrce SPECTrum")?;
            m.write("DATa:ENCdg ASCIi")?;
            m.write("WFMOutpre:ENCdg ASCIi")?;
            m.write("CURVE?")?;
            let raw = m.read_raw()?;
            let text = if raw.first() == Some(&b'#') {
                scpi::parse_block(&raw)?
            } else {
                raw
            };
            let amplitudes = scpi::parse_ascii_values(&String::from_utf8_lossy(&text), ',')?;
            let start = m.query_float("SPECTrum:FREQuency:STARt?")?;
            let stop = m.query_float("SPECTrum:FREQuency:STOP?")?;
            Ok(Spectrum {
                frequencies: linspace(start, stop, amplitudes.len()),
                amplitudes,
            })
        })?;
        debug!(points = spectrum.amplitudes.len(), "spectrum acquired");
        Ok(spectrum)
    }

    /// Limits the channel to 20 MHz, or restores full bandwidth.
    pub fn set_bandwidth_limit(&mut self, ch: u8, enabled: bool) -> Checked<()> {
        self.require("set_bandwidth_limit", self.model.bandwidth_limit)?;
        self.channel("set_bandwidth_limit", ch)?;
        let bandwidth = if enabled { BANDWIDTH_LIMIT } else { 0.0 };
        self.session
            .write(&format!("CH{}:BANdwidth {}", ch, bandwidth))
    }

    /// Percent of the longest holdoff.
    pub fn set_trigger_holdoff(&mut self, percent: f64) -> Checked<()> {
        self.require("set_trigger_holdoff", self.model.holdoff)?;
        Validate::new("set_trigger_holdoff").range("percent", percent, 0.0..=100.0)?;
        self.session
            .write(&format!("TRIGger:HOLDoff:PERCent {}", percent))
    }

    pub fn lock_front_panel(&mut self, locked: bool) -> Checked<()> {
        self.session
            .write(if locked { "LOCk ALL" } else { "UNLock ALL" })
    }

    /// Raw hard copy as sent by the instrument. Empty on failure.
    pub fn screenshot(&mut self) -> Checked<Bytes> {
        self.session.write("HARDCOPY START")?;
        let image = self
            .session
            .with_timeout(SCREENSHOT_TIMEOUT, |s| s.read_raw())?;
        info!(instrument = %self.session.name(), bytes = image.len(), "screenshot received");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_samples_are_centred() {
        let scale = Scaling {
            y_mult: 0.1,
            y_zero: 1.0,
            x_incr: 1e-3,
            pt_off: 0.0,
        };
        let w = Waveform::from_samples(&[127.5, 137.5], Encoding::Binary, &scale);
        assert_eq!(w.volts, vec![1.0, 2.0]);
        assert_eq!(w.time, vec![0.0, 1e-3]);
    }

    #[test]
    fn models_follow_the_series_prefix() {
        let tbs = "TEKTRONIX,TBS1052B,C010101,CF:91.1CT FV:v4.00".parse().unwrap();
        let found = model::detect(&MODELS, &tbs).unwrap();
        assert_eq!(found.name, "Tektronix TBS1000");
        assert!(found.holdoff && !found.spectrum);
        let mdo = "TEKTRONIX,MDO3104,C000001,CF:91.1CT FV:v1.26".parse().unwrap();
        assert_eq!(model::detect(&MODELS, &mdo).map(|m| m.channels), Some(4));
    }

    #[test]
    fn measurement_aliases() {
        assert_eq!(measurement_token("frequency"), Ok("FREQ"));
        assert_eq!(measurement_token("Vpp"), Ok("PK2PK"));
        assert!(measurement_token("jitter").is_err());
    }
}
