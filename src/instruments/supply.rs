//! DC power supplies.
//!
//! Models differ mainly in how a channel is addressed: not at all, by an
//! `INST:SEL` selection sent first, or by a `(@ch)` channel list appended to
//! each command.

use std::{thread, time::Duration};

use tracing::{info, warn};

use super::{
    guard::Checked,
    model::{self, Matcher, ModelInfo},
    session::{ConnectOptions, Session},
    validate::Validate,
    Instrument, Messenger, Resource, ResourceManager,
};
use crate::{scpi, utils::linspace, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Addressing {
    Single,
    /// Output names for `INST:SEL`, channel 1 first.
    Select(&'static [&'static str]),
    List,
}

/// Programmable span of one output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub max_current: f64,
}

const fn limits(min_voltage: f64, max_voltage: f64, max_current: f64) -> Limits {
    Limits {
        min_voltage,
        max_voltage,
        max_current,
    }
}

#[derive(Debug, PartialEq)]
pub struct SupplyModel {
    pub name: &'static str,
    pub matcher: Matcher,
    pub init: &'static [&'static str],
    pub addressing: Addressing,
    /// One entry per channel.
    pub outputs: &'static [Limits],
    /// Voltages up to this use `VOLT:RANG LOW`, above it `HIGH`.
    pub low_range_max: Option<f64>,
}

impl ModelInfo for SupplyModel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

const KEYSIGHT: &[&str] = &["AGILENT", "KEYSIGHT", "HEWLETT"];

pub static MODELS: [SupplyModel; 5] = [
    SupplyModel {
        name: "E3631A",
        matcher: Matcher {
            vendors: KEYSIGHT,
            models: &["E3631A"],
        },
        init: &[],
        addressing: Addressing::Select(&["P6V", "P25V", "N25V"]),
        outputs: &[
            limits(0.0, 6.0, 5.0),
            limits(0.0, 25.0, 1.0),
            limits(-25.0, 0.0, 1.0),
        ],
        low_range_max: None,
    },
    SupplyModel {
        name: "E3632A",
        matcher: Matcher {
            vendors: KEYSIGHT,
            models: &["E3632A"],
        },
        init: &[],
        addressing: Addressing::Single,
        outputs: &[limits(0.0, 30.0, 7.0)],
        low_range_max: Some(15.0),
    },
    SupplyModel {
        name: "E3649A",
        matcher: Matcher {
            vendors: KEYSIGHT,
            models: &["E3649A"],
        },
        init: &[],
        addressing: Addressing::Select(&["OUT1", "OUT2"]),
        outputs: &[limits(0.0, 60.0, 1.4), limits(0.0, 60.0, 1.4)],
        low_range_max: Some(35.0),
    },
    SupplyModel {
        name: "E36313A",
        matcher: Matcher {
            vendors: KEYSIGHT,
            models: &["E36313A", "E36312A", "E36311A"],
        },
        init: &[],
        addressing: Addressing::List,
        outputs: &[
            limits(0.0, 6.0, 10.0),
            limits(0.0, 25.0, 2.0),
            limits(0.0, 25.0, 2.0),
        ],
        low_range_max: None,
    },
    SupplyModel {
        name: "E36234A",
        matcher: Matcher {
            vendors: KEYSIGHT,
            models: &["E36234A"],
        },
        init: &[],
        addressing: Addressing::List,
        outputs: &[limits(0.0, 60.0, 10.0), limits(0.0, 60.0, 10.0)],
        low_range_max: None,
    },
];

/// Fallback for supplies that speak plain SCPI.
pub static GENERIC: SupplyModel = SupplyModel {
    name: "Generic SCPI supply",
    matcher: Matcher {
        vendors: &[],
        models: &[],
    },
    init: &["SYST:REM"],
    addressing: Addressing::Single,
    outputs: &[limits(0.0, 1000.0, 100.0)],
    low_range_max: None,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub voltage: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub set_voltage: f64,
    pub measured_voltage: f64,
    pub measured_current: f64,
}

pub struct Supply<R: Resource> {
    session: Session<R>,
    model: &'static SupplyModel,
}

impl<R: Resource> Instrument for Supply<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        &mut self.session
    }
    fn session_ref(&self) -> &Session<R> {
        &self.session
    }
}

impl<R: Resource> Supply<R> {
    /// Connects and picks the model by name, by identification, or falls back
    /// to the generic supply.
    pub fn open<M>(
        manager: &mut M,
        options: &ConnectOptions,
        model_override: Option<&str>,
    ) -> Result<Self>
    where
        M: ResourceManager<Resource = R>,
    {
        let session = Session::open(manager, options)?;
        let model = match model_override {
            Some(name) => model::by_name(&MODELS, name)
                .ok_or_else(|| Error::UnsupportedModel(name.to_string()))?,
            None => match session.identity().and_then(|id| model::detect(&MODELS, id)) {
                Some(m) => m,
                None => {
                    warn!(address = %session.address(), "no specific supply model, using generic");
                    &GENERIC
                }
            },
        };
        Ok(Self::with_model(session, model))
    }

    pub fn with_model(mut session: Session<R>, model: &'static SupplyModel) -> Self {
        info!(model = model.name, address = %session.address(), "supply ready");
        for command in model.init {
            if let Err(e) = session.write(command) {
                warn!(command, "start-up command rejected: {}", e);
            }
        }
        Self { session, model }
    }

    pub fn model(&self) -> &'static SupplyModel {
        self.model
    }

    fn output(&self, operation: &str, channel: u8) -> Checked<Limits> {
        let count = self.model.outputs.len();
        Validate::new(operation).arg("channel", &channel, |c| (1..=count).contains(&(*c as usize)))?;
        Ok(self.model.outputs[channel as usize - 1])
    }

    /// `header` (and `arg`) addressed to `channel`, preceded by any selection.
    fn addressed(&self, channel: u8, header: &str, arg: &str) -> Vec<String> {
        let plain = if arg.is_empty() {
            header.to_string()
        } else {
            format!("{} {}", header, arg)
        };
        match self.model.addressing {
            Addressing::Single => vec![plain],
            Addressing::Select(names) => vec![
                format!("INST:SEL {}", names[channel as usize - 1]),
                plain,
            ],
            Addressing::List if arg.is_empty() => vec![format!("{} (@{})", header, channel)],
            Addressing::List => vec![format!("{} {}, (@{})", header, arg, channel)],
        }
    }

    fn send_all(m: &mut Messenger<R>, commands: &[String]) -> Result<()> {
        commands.iter().try_for_each(|c| m.write(c))
    }

    fn query_addressed(&mut self, operation: &str, channel: u8, header: &str) -> Checked<f64> {
        self.output(operation, channel)?;
        let mut commands = self.addressed(channel, header, "");
        let query = commands.pop().unwrap_or_default();
        let default = self.session.default_reading();
        self.session.guarded(operation, default, |m| {
            Self::send_all(m, &commands)?;
            m.query_float(&query)
        })
    }

    /// Programs voltage and current limit of one output.
    pub fn set_voltage(&mut self, voltage: f64, current_limit: f64, channel: u8) -> Checked<()> {
        let out = self.output("set_voltage", channel)?;
        Validate::new("set_voltage")
            .range("voltage", voltage, out.min_voltage..=out.max_voltage)?
            .range("current_limit", current_limit, 0.0..=out.max_current)?;
        let mut commands = self.addressed(channel, "VOLT", &format!("{:.4}", voltage));
        if let Some(low_max) = self.model.low_range_max {
            let range = if voltage <= low_max { "LOW" } else { "HIGH" };
            commands.insert(commands.len() - 1, format!("VOLT:RANG {}", range));
        }
        commands.extend(
            self.addressed(channel, "CURR", &format!("{:.4}", current_limit))
                .into_iter()
                .filter(|c| !c.starts_with("INST:SEL")),
        );
        self.session
            .guarded("set_voltage", (), |m| Self::send_all(m, &commands))?;
        info!(channel, voltage, current_limit, "supply output programmed");
        Ok(())
    }

    /// Programmed (not measured) voltage.
    pub fn get_voltage(&mut self, channel: u8) -> Checked<f64> {
        self.query_addressed("get_voltage", channel, "VOLT?")
    }

    pub fn set_current(&mut self, current: f64, channel: u8) -> Checked<()> {
        self.program_current("set_current", current, channel)
    }

    /// Same setting as [`set_current`](Self::set_current): in constant-voltage
    /// operation the programmed current is the limit.
    pub fn set_current_limit(&mut self, limit: f64, channel: u8) -> Checked<()> {
        self.program_current("set_current_limit", limit, channel)
    }

    fn program_current(&mut self, operation: &str, current: f64, channel: u8) -> Checked<()> {
        let out = self.output(operation, channel)?;
        Validate::new(operation).range("current", current, 0.0..=out.max_current)?;
        let commands = self.addressed(channel, "CURR", &format!("{:.4}", current));
        self.session
            .guarded(operation, (), |m| Self::send_all(m, &commands))
    }

    /// `None` switches every output.
    pub fn enable_output(&mut self, channel: Option<u8>) -> Checked<()> {
        self.switch_output("enable_output", channel, true)
    }

    pub fn disable_output(&mut self, channel: Option<u8>) -> Checked<()> {
        self.switch_output("disable_output", channel, false)
    }

    fn switch_output(&mut self, operation: &str, channel: Option<u8>, on: bool) -> Checked<()> {
        let state = scpi::on_off(on);
        let commands = match channel {
            Some(ch) => {
                self.output(operation, ch)?;
                self.addressed(ch, "OUTP", state)
            }
            None => vec![format!("OUTP {}", state)],
        };
        self.session
            .guarded(operation, (), |m| Self::send_all(m, &commands))?;
        info!(instrument = %self.session.name(), ?channel, on, "output switched");
        Ok(())
    }

    pub fn get_output_state(&mut self, channel: u8) -> Checked<bool> {
        self.output("get_output_state", channel)?;
        let mut commands = self.addressed(channel, "OUTP?", "");
        let query = commands.pop().unwrap_or_default();
        self.session.guarded("get_output_state", false, |m| {
            Self::send_all(m, &commands)?;
            m.query_bool(&query)
        })
    }

    pub fn measure_voltage(&mut self, channel: u8) -> Checked<f64> {
        self.query_addressed("measure_voltage", channel, "MEAS:VOLT?")
    }

    pub fn measure_current(&mut self, channel: u8) -> Checked<f64> {
        self.query_addressed("measure_current", channel, "MEAS:CURR?")
    }

    pub fn get_all_measurements(&mut self, channel: u8) -> Checked<ChannelReading> {
        Ok(ChannelReading {
            voltage: self.measure_voltage(channel)?,
            current: self.measure_current(channel)?,
        })
    }

    /// Steps the output from `start` to `stop` in `steps` equal increments,
    /// measuring after `settle` at each one. The output is returned to 0 V
    /// afterwards.
    pub fn voltage_sweep(
        &mut self,
        start: f64,
        stop: f64,
        steps: usize,
        current_limit: f64,
        channel: u8,
        settle: Duration,
    ) -> Checked<Vec<SweepPoint>> {
        let out = self.output("voltage_sweep", channel)?;
        let span = out.min_voltage..=out.max_voltage;
        Validate::new("voltage_sweep")
            .range("start", start, span.clone())?
            .range("stop", stop, span)?
            .arg("steps", &steps, |n| *n > 0)?;

        self.enable_output(Some(channel))?;
        let mut points = Vec::with_capacity(steps);
        for (i, voltage) in linspace(start, stop, steps).into_iter().enumerate() {
            self.set_voltage(voltage, current_limit, channel)?;
            thread::sleep(settle);
            let point = SweepPoint {
                set_voltage: voltage,
                measured_voltage: self.measure_voltage(channel)?,
                measured_current: self.measure_current(channel)?,
            };
            info!(
                step = i + 1,
                steps,
                voltage = point.measured_voltage,
                current = point.measured_current,
                "sweep step"
            );
            points.push(point);
        }
        self.set_voltage(0.0, current_limit, channel)?;
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts_follow_the_tables() {
        let counts: Vec<(&str, usize)> = MODELS.iter().map(|m| (m.name, m.outputs.len())).collect();
        assert_eq!(
            counts,
            vec![
                ("E3631A", 3),
                ("E3632A", 1),
                ("E3649A", 2),
                ("E36313A", 3),
                ("E36234A", 2)
            ]
        );
    }
}
