//! Drivers for SCPI bench instruments.
//!
//! Every driver owns one [`Session`](instruments::Session). Instrument I/O
//! never fails a caller: communication problems are logged and replaced with a
//! default, and only argument validation comes back as an error. A simulated
//! instrument ([`mock`]) lets the drivers run without hardware.

use protocols::Serial;
use serial::SerialPort;

pub mod config;
pub mod error;
pub mod instruments;
pub mod logging;
pub mod mock;
pub mod protocols;
pub mod scpi;
pub mod utils;

pub use error::{Error, ValidationError};

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn config_serial<T: SerialPort>(port: &mut T, config: Serial) -> serial::Result<()> {
    let char_size = config.char_size()?;
    let stop_bits = config.stop_bits()?;
    port.reconfigure(&|settings| {
        settings.set_baud_rate(config.baud_rate())?;
        settings.set_char_size(char_size);
        settings.set_parity(config.parity());
        settings.set_stop_bits(stop_bits);
        settings.set_flow_control(config.flow_control());
        Ok(())
    })
}

pub mod prelude {
    pub use crate::config::{BenchConfig, InstrumentConfig};
    pub use crate::instruments::{
        function_generator::FunctionGenerator, multimeter::Multimeter,
        network_analyzer::NetworkAnalyzer, oscilloscope::Oscilloscope, smu::Smu, supply::Supply,
        temperature_sensor::TemperatureSensor, thermonics::TemperatureController, Checked,
        ConnectOptions, Identifiable, Instrument, Policy, Queryable, ResourceManager, Session,
        SystemResourceManager, Writable,
    };
    pub use crate::mock::{MockResource, MockResourceManager};
    pub use crate::{Error, Result, ValidationError};
}
