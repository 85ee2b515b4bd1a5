use super::{Protocol, Timeouts};
use crate::Error;
use serde::{Deserialize, Serialize};
use serial::{SerialPort, SystemPort};
use std::{io, time::Duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Line settings for an RS-232 instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Serial {
    pub baud_rate: usize,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl Default for Serial {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

impl Serial {
    /// Platform port name for a numbered `ASRL<n>` resource.
    pub fn format_address(number: u8) -> String {
        if cfg!(windows) {
            format!("COM{}", number)
        } else {
            format!("/dev/ttyS{}", number)
        }
    }

    pub(crate) fn baud_rate(&self) -> serial::BaudRate {
        serial::BaudRate::from_speed(self.baud_rate)
    }

    pub(crate) fn char_size(&self) -> serial::Result<serial::CharSize> {
        match self.data_bits {
            5 => Ok(serial::Bits5),
            6 => Ok(serial::Bits6),
            7 => Ok(serial::Bits7),
            8 => Ok(serial::Bits8),
            n => Err(serial::Error::new(
                serial::ErrorKind::InvalidInput,
                format!("unsupported data bits: {}", n),
            )),
        }
    }

    pub(crate) fn parity(&self) -> serial::Parity {
        match self.parity {
            Parity::None => serial::ParityNone,
            Parity::Odd => serial::ParityOdd,
            Parity::Even => serial::ParityEven,
        }
    }

    pub(crate) fn stop_bits(&self) -> serial::Result<serial::StopBits> {
        match self.stop_bits {
            1 => Ok(serial::Stop1),
            2 => Ok(serial::Stop2),
            n => Err(serial::Error::new(
                serial::ErrorKind::InvalidInput,
                format!("unsupported stop bits: {}", n),
            )),
        }
    }

    pub(crate) fn flow_control(&self) -> serial::FlowControl {
        match self.flow_control {
            FlowControl::None => serial::FlowNone,
            FlowControl::Software => serial::FlowSoftware,
            FlowControl::Hardware => serial::FlowHardware,
        }
    }
}

impl Protocol for Serial {
    type Address = String;
    type IO = SystemPort;
    fn connect(self, address: Self::Address, time_out: Duration) -> crate::Result<Self::IO> {
        let mut port = serial::open(&address).map_err(|e| Error::from_serial(e, &address))?;
        crate::config_serial(&mut port, self).map_err(|e| Error::from_serial(e, &address))?;
        port.set_timeout(time_out)
            .map_err(|e| Error::from_serial(e, &address))?;
        Ok(port)
    }
}

impl Timeouts for SystemPort {
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(|e| match e.kind() {
            serial::ErrorKind::Io(kind) => io::Error::new(kind, e),
            _ => io::Error::new(io::ErrorKind::InvalidInput, e),
        })
    }
}
