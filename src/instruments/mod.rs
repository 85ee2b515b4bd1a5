use std::{
    io::{BufRead, BufReader, Read, Write},
    net::ToSocketAddrs,
    thread,
    time::Duration,
};

use bytes::Bytes;

use crate::{
    protocols::{Protocol, ResourceAddress, Serial, Tcp, Timeouts, TransportError},
    scpi, Error, Result,
};

pub mod function_generator;
pub mod guard;
pub mod model;
pub mod multimeter;
pub mod network_analyzer;
pub mod oscilloscope;
pub mod session;
pub mod smu;
pub mod supply;
pub mod temperature_sensor;
pub mod template;
pub mod thermonics;
pub mod validate;

pub use self::guard::{Checked, Policy};
pub use self::session::{ConnectOptions, Identity, Session};

/// Line terminator appended to every command.
pub const TERMINATOR: u8 = b'\n';

/// One open link to an instrument, with no failure policy of its own.
pub trait Resource {
    fn address(&self) -> &str;
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;
    /// One response message; a definite-length block is returned whole even
    /// when its payload contains the terminator.
    fn read_raw(&mut self) -> Result<Bytes>;
    fn timeout(&self) -> Duration;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

impl<R: Resource + ?Sized> Resource for Box<R> {
    fn address(&self) -> &str {
        (**self).address()
    }
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_raw(data)
    }
    fn read_raw(&mut self) -> Result<Bytes> {
        (**self).read_raw()
    }
    fn timeout(&self) -> Duration {
        (**self).timeout()
    }
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

pub trait ResourceManager {
    type Resource: Resource;
    fn open_resource(&mut self, address: &str, timeout: Duration) -> Result<Self::Resource>;
    fn list_resources(&self) -> Vec<String>;
}

/// A byte stream (socket or serial port) read one message at a time.
pub struct StreamResource<IO: Read + Write + Timeouts> {
    address: String,
    io: Option<BufReader<IO>>,
    timeout: Duration,
    buf: Vec<u8>,
}

impl<IO: Read + Write + Timeouts> StreamResource<IO> {
    pub fn new<A: Into<String>>(address: A, io: IO, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            io: Some(BufReader::new(io)),
            timeout,
            buf: Vec::new(),
        }
    }
}

impl<IO: Read + Write + Timeouts> Resource for StreamResource<IO> {
    fn address(&self) -> &str {
        &self.address
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let Self { address, io, .. } = self;
        let address = address.as_str();
        let io = io.as_mut().ok_or(TransportError::Closed)?.get_mut();
        io.write_all(data)
            .and_then(|_| io.flush())
            .map_err(|e| Error::from_io(e, address))
    }

    fn read_raw(&mut self) -> Result<Bytes> {
        let Self {
            address, io, buf, ..
        } = self;
        let address = address.as_str();
        let reader = io.as_mut().ok_or(TransportError::Closed)?;
        let io_err = |e: std::io::Error| Error::from_io(e, address);
        buf.clear();
        if reader.read_until(TERMINATOR, buf).map_err(io_err)? == 0 {
            return Err(TransportError::ConnectionLost.into());
        }
        if let Some(total) = scpi::block_len(buf)? {
            if buf.len() < total {
                let start = buf.len();
                buf.resize(total, 0);
                reader.read_exact(&mut buf[start..]).map_err(io_err)?;
                let mut rest = Vec::new();
                reader.read_until(TERMINATOR, &mut rest).map_err(io_err)?;
            }
        }
        Ok(Bytes::copy_from_slice(buf))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let Self { address, io, .. } = self;
        let address = address.as_str();
        let io = io.as_mut().ok_or(TransportError::Closed)?;
        io.get_mut()
            .apply_timeout(timeout)
            .map_err(|e| Error::from_io(e, address))?;
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.io = None;
        Ok(())
    }
}

/// Opens sockets and serial ports from resource strings.
#[derive(Debug, Default)]
pub struct SystemResourceManager {
    serial: Serial,
    opened: Vec<String>,
}

impl SystemResourceManager {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            opened: Vec::new(),
        }
    }
}

impl ResourceManager for SystemResourceManager {
    type Resource = Box<dyn Resource + Send>;

    fn open_resource(&mut self, address: &str, timeout: Duration) -> Result<Self::Resource> {
        let resource: Self::Resource = match address.parse::<ResourceAddress>()? {
            ResourceAddress::Socket { host, port } => {
                let socket = (host.as_str(), port)
                    .to_socket_addrs()
                    .map_err(|e| Error::from_io(e, address))?
                    .next()
                    .ok_or_else(|| TransportError::ResourceNotFound(address.to_string()))?;
                Box::new(StreamResource::new(
                    address,
                    Tcp.connect(socket, timeout)?,
                    timeout,
                ))
            }
            ResourceAddress::Serial { port } => Box::new(StreamResource::new(
                address,
                self.serial.connect(port, timeout)?,
                timeout,
            )),
            _ => return Err(TransportError::ResourceNotFound(address.to_string()).into()),
        };
        if !self.opened.iter().any(|a| a == address) {
            self.opened.push(address.to_string());
        }
        Ok(resource)
    }

    fn list_resources(&self) -> Vec<String> {
        self.opened.clone()
    }
}

/// Unguarded message layer over a [`Resource`]: terminators, queries and
/// value parsing. Every method reports failures as plain [`Error`]s.
pub struct Messenger<R: Resource> {
    io: Option<R>,
}

impl<R: Resource> Messenger<R> {
    pub fn new(io: R) -> Self {
        Self { io: Some(io) }
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    fn link(&mut self) -> Result<&mut R> {
        self.io.as_mut().ok_or_else(|| TransportError::Closed.into())
    }

    pub fn write(&mut self, command: &str) -> Result<()> {
        let mut message = Vec::with_capacity(command.len() + 1);
        message.extend_from_slice(command.as_bytes());
        message.push(TERMINATOR);
        self.link()?.write_raw(&message)
    }

    pub fn read_raw(&mut self) -> Result<Bytes> {
        self.link()?.read_raw()
    }

    pub fn read(&mut self) -> Result<String> {
        let raw = self.read_raw()?;
        let text = String::from_utf8_lossy(&raw);
        Ok(text.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    pub fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        self.read()
    }

    pub fn query_with_delay(&mut self, command: &str, delay: Duration) -> Result<String> {
        self.write(command)?;
        thread::sleep(delay);
        self.read()
    }

    pub fn query_float(&mut self, command: &str) -> Result<f64> {
        scpi::parse_float(&self.query(command)?)
    }

    pub fn query_bool(&mut self, command: &str) -> Result<bool> {
        scpi::parse_bool(&self.query(command)?)
    }

    pub fn query_ascii_values(&mut self, command: &str, separator: char) -> Result<Vec<f64>> {
        scpi::parse_ascii_values(&self.query(command)?, separator)
    }

    pub fn query_block(&mut self, command: &str) -> Result<Bytes> {
        self.write(command)?;
        scpi::parse_block(&self.read_raw()?)
    }

    pub fn query_binary_values(&mut self, command: &str, big_endian: bool) -> Result<Vec<f32>> {
        scpi::decode_f32(&self.query_block(command)?, big_endian)
    }

    /// Sends `header` immediately followed by `payload` as a definite block.
    pub fn write_block(&mut self, header: &str, payload: &[u8]) -> Result<()> {
        let block = scpi::encode_block(payload);
        let mut message = Vec::with_capacity(header.len() + block.len() + 1);
        message.extend_from_slice(header.as_bytes());
        message.extend_from_slice(&block);
        message.push(TERMINATOR);
        self.link()?.write_raw(&message)
    }

    pub fn write_binary_values(
        &mut self,
        header: &str,
        values: &[f32],
        big_endian: bool,
    ) -> Result<()> {
        self.write_block(header, &scpi::encode_f32(values, big_endian))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.io.as_ref().map(|io| io.timeout())
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.link()?.set_timeout(timeout)
    }

    /// Drops the link. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.io.take() {
            Some(mut io) => io.close(),
            None => Ok(()),
        }
    }
}

/// Anything that drives one [`Session`].
pub trait Instrument {
    type Resource: Resource;
    fn session(&mut self) -> &mut Session<Self::Resource>;
    fn session_ref(&self) -> &Session<Self::Resource>;
}

pub trait Writable {
    fn write(&mut self, command: &str) -> Checked<()>;
    fn write_binary_values(&mut self, header: &str, values: &[f32]) -> Checked<()>;
}

pub trait Queryable {
    fn query(&mut self, command: &str) -> Checked<String>;
    fn query_float(&mut self, command: &str) -> Checked<f64>;
    fn query_ascii_values(&mut self, command: &str) -> Checked<Vec<f64>>;
    fn query_binary_values(&mut self, command: &str) -> Checked<Vec<f32>>;
}

pub trait Identifiable {
    fn identity(&self) -> Option<&Identity>;
    fn identify(&mut self) -> Checked<Option<Identity>>;
    fn name(&self) -> &str;
}

impl<I: Instrument> Writable for I {
    fn write(&mut self, command: &str) -> Checked<()> {
        Session::write(self.session(), command)
    }
    fn write_binary_values(&mut self, header: &str, values: &[f32]) -> Checked<()> {
        Session::write_binary_values(self.session(), header, values)
    }
}

impl<I: Instrument> Queryable for I {
    fn query(&mut self, command: &str) -> Checked<String> {
        Session::query(self.session(), command)
    }
    fn query_float(&mut self, command: &str) -> Checked<f64> {
        Session::query_float(self.session(), command)
    }
    fn query_ascii_values(&mut self, command: &str) -> Checked<Vec<f64>> {
        Session::query_ascii_values(self.session(), command)
    }
    fn query_binary_values(&mut self, command: &str) -> Checked<Vec<f32>> {
        Session::query_binary_values(self.session(), command)
    }
}

impl<I: Instrument> Identifiable for I {
    fn identity(&self) -> Option<&Identity> {
        Session::identity(self.session_ref())
    }
    fn identify(&mut self) -> Checked<Option<Identity>> {
        Session::identify(self.session())
    }
    fn name(&self) -> &str {
        Session::name(self.session_ref())
    }
}

impl<R: Resource> Instrument for Session<R> {
    type Resource = R;
    fn session(&mut self) -> &mut Session<R> {
        self
    }
    fn session_ref(&self) -> &Session<R> {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;
    use crate::error::Failure;

    /// In-memory link replaying a fixed reply.
    struct Wire {
        reply: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Timeouts for Wire {
        fn apply_timeout(&mut self, _: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn stream(reply: &[u8]) -> StreamResource<Wire> {
        let wire = Wire {
            reply: Cursor::new(reply.to_vec()),
            sent: Vec::new(),
        };
        StreamResource::new("TCPIP0::wire::5025::SOCKET", wire, Duration::from_secs(1))
    }

    #[test]
    fn blocks_spanning_the_terminator_are_read_whole() {
        let mut link = stream(b"#15ab\ncd\n1.5\n");
        assert_eq!(&link.read_raw().unwrap()[..], b"#15ab\ncd");
        assert_eq!(&link.read_raw().unwrap()[..], b"1.5\n");
    }

    #[test]
    fn oversized_block_header_fails_without_reading_on() {
        let mut link = stream(b"#9999999999\n");
        let err = link.read_raw().unwrap_err();
        assert_eq!(err.failure(), Failure::ValueConversion);
    }

    #[test]
    fn closed_stream_refuses_io() {
        let mut link = stream(b"1\n");
        link.write_raw(b"*OPC?\n").unwrap();
        link.close().unwrap();
        assert!(link.read_raw().is_err());
        assert!(link.write_raw(b"*OPC?\n").is_err());
    }
}
