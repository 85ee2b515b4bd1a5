//! Tektronix AFG3000 series arbitrary function generators.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    guard::{Checked, Policy},
    session::{ConnectOptions, Session},
    validate::{one_of, Validate},
    Instrument, Resource, ResourceManager,
};
use crate::{scpi, Result};

/// AFG3000 commands take longer than the usual session default.
pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SAMPLE_RATE: f64 = 10e6;
pub const MAX_AMPLITUDE: f64 = 10.0;

pub const WAVEFORMS: &[&str] = &[
    "SIN", "SQU", "RAMP", "PULS", "NOIS", "DC", "SINC", "GAUS", "LOR", "ERIS", "EDEC", "HAV",
    "USER",
];

/// Bounded retry used for waveform uploads, which occasionally time out
/// while the instrument commits memory.
pub fn upload_policy() -> Policy {
    Policy::with_retries(3, Duration::from_millis(500))
}

/// Scales `samples` into -1..=1; signals already inside that band are left
/// alone.
pub fn normalize(samples: &[f64]) -> Vec<f32> {
    let peak = samples
        .iter()
        .fold(1.0_f64, |acc, s| acc.max(s.abs()));
    samples.iter().map(|s| (s / peak) as f32).collect()
}

pub struct FunctionGenerator<R: Resource> {
    session: Session<R>,
    upload_policy: Policy,
}

impl<R: Resource> Instrument for FunctionGenerator<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

fn channel(operation: &str, ch: u8) -> Checked<Validate<'_>> {
    Validate::new(operation).arg("channel", &ch, |c| (1..=2).contains(c))
}

impl<R: Resource> FunctionGenerator<R> {
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
        info!(address = %session.address(), "AFG3000 ready");
        Self {
            session,
            upload_policy: upload_policy(),
        }
    }

    pub fn set_upload_policy(&mut self, policy: Policy) {
        self.upload_policy = policy;
    }

    /// `SIN`, `SQU`, `RAMP`, `PULS`, `USER`, ...
    pub fn set_waveform(&mut self, waveform: &str, ch: u8) -> Checked<()> {
        channel("set_waveform", ch)?;
        let waveform = one_of("waveform", waveform, WAVEFORMS)?;
        debug!(channel = ch, waveform, "setting waveform");
        self.session.write(&format!("FUNCtion{} {}", ch, waveform))
    }

    pub fn set_frequency(&mut self, frequency: f64, ch: u8) -> Checked<()> {
        channel("set_frequency", ch)?.arg("frequency", &frequency, |f| *f > 0.0)?;
        self.session.write(&format!("FREQuency{} {}", ch, frequency))
    }

    /// Peak-to-peak amplitude in volts.
    pub fn set_amplitude(&mut self, amplitude: f64, ch: u8) -> Checked<()> {
        channel("set_amplitude", ch)?.range("amplitude", amplitude, 0.0..=MAX_AMPLITUDE)?;
        self.session.write(&format!("VOLTage{} {}", ch, amplitude))
    }

    pub fn set_offset(&mut self, offset: f64, ch: u8) -> Checked<()> {
        channel("set_offset", ch)?.range("offset", offset, -5.0..=5.0)?;
        self.session
            .write(&format!("VOLTage:OFFSet{} {}", ch, offset))
    }

    /// Degrees.
    pub fn set_phase(&mut self, phase: f64, ch: u8) -> Checked<()> {
        channel("set_phase", ch)?.range("phase", phase, -180.0..=180.0)?;
        self.session.write(&format!("PHASe{} {}", ch, phase))
    }

    /// Percent, for pulse waveforms.
    pub fn set_duty_cycle(&mut self, duty_cycle: f64, ch: u8) -> Checked<()> {
        channel("set_duty_cycle", ch)?.range("duty_cycle", duty_cycle, 0.0..=100.0)?;
        self.session
            .write(&format!("PULS:DCYC{} {}", ch, duty_cycle))
    }

    pub fn enable_output(&mut self, ch: u8) -> Checked<()> {
        channel("enable_output", ch)?;
        self.session.write(&format!("OUTPut{}:STATe ON", ch))
    }

    pub fn disable_output(&mut self, ch: u8) -> Checked<()> {
        channel("disable_output", ch)?;
        self.session.write(&format!("OUTPut{}:STATe OFF", ch))
    }

    pub fn get_output_state(&mut self, ch: u8) -> Checked<bool> {
        channel("get_output_state", ch)?;
        self.session.query_bool(&format!("OUTPut{}:STATe?", ch))
    }

    pub fn setup_sweep(&mut self, start: f64, stop: f64, sweep_time: Duration, ch: u8) -> Checked<()> {
        channel("setup_sweep", ch)?
            .arg("start", &start, |f| *f > 0.0)?
            .arg("stop", &stop, |f| *f > 0.0)?;
        let seconds = sweep_time.as_secs_f64();
        self.session.guarded("setup_sweep", (), |m| {
            m.write(&format!("FREQ{}:STAR {}", ch, start))?;
            m.write(&format!("FREQ{}:STOP {}", ch, stop))?;
            m.write(&format!("SWE{}:TIME {}", ch, seconds))?;
            m.write(&format!("SWE{}:STAT {}", ch, scpi::on_off(true)))
        })?;
        info!(channel = ch, start, stop, seconds, "sweep configured");
        Ok(())
    }

    /// Loads `samples` into volatile memory as little-endian f32, selects the
    /// user waveform and sets its sample rate. Transient failures are retried
    /// under the upload policy.
    pub fn upload_arbitrary(&mut self, samples: &[f64], sample_rate: f64, ch: u8) -> Checked<bool> {
        channel("upload_arbitrary", ch)?
            .arg("samples", &samples.len(), |n| *n > 1)?
            .arg("sample_rate", &sample_rate, |r| *r > 0.0)?;
        let data = normalize(samples);
        let header = format!("DATA:DAC{} VOLATILE,", ch);
        let policy = self.upload_policy.clone();
        let loaded = self
            .session
            .guarded_with(&policy, "upload_arbitrary", false, |m| {
                m.write_binary_values(&header, &data, false)?;
                m.write(&format!("FUNCtion{} USER", ch))?;
                m.write(&format!("FUNC{}:USER:FREQ {}", ch, sample_rate))?;
                Ok(true)
            })?;
        if loaded {
            info!(channel = ch, points = data.len(), "arbitrary waveform loaded");
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_only_shrinks_large_signals() {
        assert_eq!(normalize(&[0.5, -0.25]), vec![0.5, -0.25]);
        assert_eq!(normalize(&[2.0, -4.0]), vec![0.5, -1.0]);
    }
}
