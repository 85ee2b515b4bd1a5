//! Keysight PNA/ENA-class vector network analyzers.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    guard::Checked,
    session::{ConnectOptions, Session},
    validate::{one_of, Validate},
    Instrument, Resource, ResourceManager,
};
use crate::{scpi, Result};

pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POINTS: u32 = 401;
pub const MAX_POINTS: u32 = 100_001;
/// Name of the single measurement this driver manages.
pub const MEASUREMENT: &str = "Meas1";

pub const S_PARAMETERS: &[&str] = &["S11", "S21", "S12", "S22"];
pub const SWEEP_TYPES: &[&str] = &["LIN", "LOG", "POW", "CW", "SEGM"];
pub const FORMATS: &[&str] = &[
    "MLOG", "MLIN", "PHAS", "UPH", "SWR", "REAL", "IMAG", "POL", "SMIT", "GDEL",
];
pub const IMAGE_FORMATS: &[&str] = &["PNG", "BMP", "JPG"];

/// Trace as returned by [`NetworkAnalyzer::get_trace_data`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub frequencies: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerValue {
    pub frequency: f64,
    pub value: f64,
}

pub struct NetworkAnalyzer<R: Resource> {
    session: Session<R>,
}

impl<R: Resource> Instrument for NetworkAnalyzer<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

fn marker(operation: &str, index: u8) -> Checked<Validate<'_>> {
    Validate::new(operation).arg("marker", &index, |m| (1..=10).contains(m))
}

impl<R: Resource> NetworkAnalyzer<R> {
    pub fn open<M>(manager: &mut M, options: &ConnectOptions) -> Result<Self>
    where
        M: ResourceManager<Resource = R>,
    {
        Ok(Self::new(Session::open(manager, options)?))
    }

    pub fn new(mut session: Session<R>) -> Self {
        if let Err(e) = session.set_timeout(TIMEOUT) {
            warn!(timeout = ?TIMEOUT, "timeout not applied: {}", e);
        }
        info!(address = %session.address(), "network analyzer ready");
        Self { session }
    }

    /// `*RST`, then back to log magnitude on a linear sweep.
    pub fn reset(&mut self) -> Checked<bool> {
        let done = self.session.reset()?;
        self.session.write("CALC:FORM MLOG")?;
        self.session.write("SENS:SWE:TYPE LIN")?;
        Ok(done)
    }

    pub fn set_frequency_range(&mut self, start: f64, stop: f64) -> Checked<()> {
        Validate::new("set_frequency_range")
            .arg("start", &start, |f| *f > 0.0)?
            .arg("stop", &stop, |f| *f > start)?;
        self.session.guarded("set_frequency_range", (), |m| {
            m.write(&format!("SENS:FREQ:STAR {}", start))?;
            m.write(&format!("SENS:FREQ:STOP {}", stop))
        })?;
        debug!(start, stop, "frequency range set");
        Ok(())
    }

    pub fn set_points(&mut self, points: u32) -> Checked<()> {
        Validate::new("set_points").range("points", points, 2..=MAX_POINTS)?;
        self.session.write(&format!("SENS:SWE:POIN {}", points))
    }

    /// Source power in dBm.
    pub fn set_power(&mut self, power: f64) -> Checked<()> {
        Validate::new("set_power").range("power", power, -90.0..=20.0)?;
        self.session.write(&format!("SOUR:POW {}", power))
    }

    pub fn get_power(&mut self) -> Checked<f64> {
        self.session.query_float("SOUR:POW?")
    }

    pub fn set_if_bandwidth(&mut self, bandwidth: f64) -> Checked<()> {
        Validate::new("set_if_bandwidth").arg("bandwidth", &bandwidth, |b| *b > 0.0)?;
        self.session.write(&format!("SENS:BWID {}", bandwidth))
    }

    /// `count` of zero switches averaging off.
    pub fn set_averaging(&mut self, count: u32) -> Checked<()> {
        Validate::new("set_averaging").range("count", count, 0..=65_536)?;
        self.session.guarded("set_averaging", (), |m| {
            if count == 0 {
                return m.write(&format!("SENS:AVER {}", scpi::on_off(false)));
            }
            m.write(&format!("SENS:AVER:COUN {}", count))?;
            m.write(&format!("SENS:AVER {}", scpi::on_off(true)))
        })
    }

    pub fn set_sweep_type(&mut self, sweep: &str) -> Checked<()> {
        let sweep = one_of("sweep_type", sweep, SWEEP_TYPES)?;
        self.session.write(&format!("SENS:SWE:TYPE {}", sweep))
    }

    pub fn set_format(&mut self, format: &str) -> Checked<()> {
        let format = one_of("format", format, FORMATS)?;
        self.session.write(&format!("CALC:FORM {}", format))
    }

    /// Replaces every measurement with a single `parameter` trace in log
    /// magnitude.
    pub fn setup_s_parameter(&mut self, parameter: &str) -> Checked<()> {
        let parameter = one_of("parameter", parameter, S_PARAMETERS)?;
        self.session.guarded("setup_s_parameter", (), |m| {
            m.write("CALC:PAR:DEL:ALL")?;
            m.write(&format!("CALC:PAR:DEF:EXT '{}', {}", MEASUREMENT, parameter))?;
            m.write(&format!("CALC:PAR:SEL '{}'", MEASUREMENT))?;
            m.write("CALC:FORM MLOG")
        })?;
        info!(instrument = %self.session.name(), parameter, "measurement defined");
        Ok(())
    }

    /// Single sweep. With `wait` set, polls `*OPC?` for up to `timeout`.
    pub fn perform_sweep(&mut self, wait: bool, timeout: Duration) -> Checked<bool> {
        let triggered = self.session.guarded("perform_sweep", false, |m| {
            m.write("INIT:CONT OFF")?;
            m.write("INIT:IMM")?;
            Ok(true)
        })?;
        if !triggered {
            return Ok(false);
        }
        if !wait {
            return Ok(true);
        }
        let done = self.session.wait_for_operation_complete(timeout)?;
        if !done {
            warn!(instrument = %self.session.name(), ?timeout, "sweep did not complete");
        }
        Ok(done)
    }

    /// Stimulus values and the real part of the formatted data; the
    /// instrument interleaves real and imaginary parts.
    pub fn get_trace_data(&mut self) -> Checked<Trace> {
        let frequencies = self.session.query_ascii_values("SENS:X:VAL?")?;
        let data = self.session.query_ascii_values("CALC:DATA:FDAT?")?;
        let values: Vec<f64> = data.into_iter().step_by(2).collect();
        if frequencies.len() != values.len() {
            debug!(
                frequencies = frequencies.len(),
                values = values.len(),
                "trace length mismatch"
            );
        }
        Ok(Trace {
            frequencies,
            values,
        })
    }

    /// Defines a measurement for `parameter`, sweeps once and returns the trace.
    pub fn measure_s_parameter(&mut self, parameter: &str, timeout: Duration) -> Checked<Trace> {
        self.setup_s_parameter(parameter)?;
        if !self.perform_sweep(true, timeout)? {
            return Ok(Trace::default());
        }
        self.get_trace_data()
    }

    /// Clears all markers, then places marker `i + 1` at `frequencies[i]`.
    pub fn set_markers(&mut self, frequencies: &[f64]) -> Checked<()> {
        Validate::new("set_markers").arg("markers", &frequencies.len(), |n| (1..=10).contains(n))?;
        self.session.guarded("set_markers", (), |m| {
            m.write("CALC:MARK:AOFF")?;
            for (i, f) in frequencies.iter().enumerate() {
                m.write(&format!("CALC:MARK{}:STAT ON", i + 1))?;
                m.write(&format!("CALC:MARK{}:X {}", i + 1, f))?;
            }
            Ok(())
        })
    }

    pub fn set_marker(&mut self, index: u8, frequency: f64) -> Checked<()> {
        marker("set_marker", index)?.arg("frequency", &frequency, |f| *f > 0.0)?;
        self.session.guarded("set_marker", (), |m| {
            m.write(&format!("CALC:MARK{}:STAT ON", index))?;
            m.write(&format!("CALC:MARK{}:X {}", index, frequency))
        })
    }

    pub fn get_marker_value(&mut self, index: u8) -> Checked<MarkerValue> {
        marker("get_marker_value", index)?;
        let nan = self.session.default_reading();
        let default = MarkerValue {
            frequency: nan,
            value: nan,
        };
        self.session.guarded("get_marker_value", default, |m| {
            Ok(MarkerValue {
                frequency: m.query_float(&format!("CALC:MARK{}:X?", index))?,
                value: m.query_float(&format!("CALC:MARK{}:Y?", index))?,
            })
        })
    }

    /// Stores an `.s2p` file on the instrument's own drive.
    pub fn save_touchstone(&mut self, filename: &str) -> Checked<bool> {
        Validate::new("save_touchstone").arg("filename", filename, |f: &str| !f.trim().is_empty())?;
        self.session.guarded("save_touchstone", false, |m| {
            m.write(&format!("MMEM:STOR:SNP \"{}\"", filename))?;
            Ok(true)
        })
    }

    /// Hardcopy to the instrument's mass memory.
    pub fn save_screenshot(&mut self, filename: &str, format: &str) -> Checked<bool> {
        Validate::new("save_screenshot").arg("filename", filename, |f: &str| !f.trim().is_empty())?;
        let format = one_of("format", format, IMAGE_FORMATS)?;
        self.session.guarded("save_screenshot", false, |m| {
            m.write(&format!("HCOP:DEV:LANG {}", format))?;
            m.write("HCOP:DEST 'MMEM'")?;
            m.write(&format!("MMEM:NAME '{}'", filename))?;
            m.write("HCOP:IMM")?;
            Ok(true)
        })
    }
}
