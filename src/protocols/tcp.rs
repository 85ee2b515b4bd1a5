use super::{Protocol, Timeouts};
use crate::Error;
use std::{
    io,
    net::{SocketAddr, TcpStream},
    time::Duration,
};

#[derive(Default, Clone, Copy, Debug)]
pub struct Tcp;

impl Protocol for Tcp {
    type IO = TcpStream;
    type Address = SocketAddr;
    fn connect(self, address: Self::Address, time_out: Duration) -> crate::Result<Self::IO> {
        let mut stream = TcpStream::connect_timeout(&address, time_out)
            .map_err(|e| Error::from_io(e, &address.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::from_io(e, &address.to_string()))?;
        stream
            .apply_timeout(time_out)
            .map_err(|e| Error::from_io(e, &address.to_string()))?;
        Ok(stream)
    }
}

impl Timeouts for TcpStream {
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}
