use std::io;

use thiserror::Error;

/// Communication-layer failures reported by a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no listener at {0}")]
    NoListener(String),
    #[error("operation timed out")]
    Timeout,
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("session is closed")]
    Closed,
}

impl TransportError {
    pub fn hint(&self) -> &'static str {
        match self {
            TransportError::NoListener(_) => {
                "No listeners found. Device may be off or address may be incorrect."
            }
            TransportError::Timeout => "Operation timed out. Device may be busy or unresponsive.",
            TransportError::ResourceNotFound(_) => {
                "Resource not found. Check cables and VISA configuration."
            }
            TransportError::ResourceBusy(_) => {
                "Resource busy. Another session may hold the device."
            }
            TransportError::ConnectionLost => "Connection lost. Check cables and device power.",
            TransportError::Closed => "Invalid object. VISA session may have been closed.",
        }
    }

    /// Whether repeating the operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::ConnectionLost | TransportError::ResourceBusy(_)
        )
    }

    /// Maps an io error onto a transport kind. Kinds that say nothing about the
    /// link are left to the caller.
    pub fn classify(err: &io::Error, address: &str) -> Option<Self> {
        use io::ErrorKind::*;
        match err.kind() {
            TimedOut | WouldBlock => Some(TransportError::Timeout),
            ConnectionRefused => Some(TransportError::NoListener(address.to_string())),
            NotFound | AddrNotAvailable => {
                Some(TransportError::ResourceNotFound(address.to_string()))
            }
            AddrInUse | PermissionDenied => Some(TransportError::ResourceBusy(address.to_string())),
            BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof => {
                Some(TransportError::ConnectionLost)
            }
            _ => None,
        }
    }

    pub fn classify_serial(err: &serial::Error, address: &str) -> Option<Self> {
        match err.kind() {
            serial::ErrorKind::NoDevice => {
                Some(TransportError::ResourceNotFound(address.to_string()))
            }
            serial::ErrorKind::InvalidInput => None,
            serial::ErrorKind::Io(kind) => Self::classify(&io::Error::from(kind), address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_transport_kinds() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            TransportError::classify(&timeout, "x"),
            Some(TransportError::Timeout)
        );
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(
            TransportError::classify(&refused, "TCPIP0::1.2.3.4::5025::SOCKET"),
            Some(TransportError::NoListener(
                "TCPIP0::1.2.3.4::5025::SOCKET".to_string()
            ))
        );
        let other = io::Error::new(io::ErrorKind::Other, "?");
        assert_eq!(TransportError::classify(&other, "x"), None);
    }

    #[test]
    fn only_link_hiccups_are_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::ConnectionLost.is_transient());
        assert!(!TransportError::NoListener("a".into()).is_transient());
        assert!(!TransportError::Closed.is_transient());
    }

    #[test]
    fn every_kind_has_a_distinct_hint() {
        let kinds = [
            TransportError::NoListener("a".into()),
            TransportError::Timeout,
            TransportError::ResourceNotFound("a".into()),
            TransportError::ResourceBusy("a".into()),
            TransportError::ConnectionLost,
            TransportError::Closed,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a.hint(), b.hint());
            }
        }
    }
}
