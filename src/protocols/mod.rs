use std::{
    io::{self, Read, Write},
    time::Duration,
};

pub mod address;
pub mod error;
pub mod serial;
pub mod tcp;

pub use self::address::ResourceAddress;
pub use self::error::TransportError;
pub use self::serial::Serial;
pub use self::tcp::Tcp;

pub trait Protocol {
    type Address;
    type IO: Read + Write + Timeouts;
    fn connect(self, address: Self::Address, timeout: Duration) -> crate::Result<Self::IO>;
}

/// Streams whose blocking reads and writes can be bounded.
pub trait Timeouts {
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}
