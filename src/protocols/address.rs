//! VISA-style resource strings.
//!
//! Only the link kinds this crate can open are turned into something
//! connectable; GPIB and USB strings parse but are refused by the system
//! resource manager.

use std::{fmt, str::FromStr};

use super::{Serial, TransportError};

/// Raw SCPI socket port used for `TCPIP::...::INSTR` resources.
pub const SCPI_RAW_PORT: u16 = 5025;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    Socket { host: String, port: u16 },
    Serial { port: String },
    Gpib { board: u8, primary: u8 },
    Usb(String),
    Mock(String),
}

impl ResourceAddress {
    pub fn is_supported(&self) -> bool {
        !matches!(self, ResourceAddress::Gpib { .. } | ResourceAddress::Usb(_))
    }
}

fn board_number(prefix: &str, head: &str) -> Option<u8> {
    let rest = &head[prefix.len()..];
    if rest.is_empty() {
        Some(0)
    } else {
        rest.parse().ok()
    }
}

impl FromStr for ResourceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let not_found = || TransportError::ResourceNotFound(s.to_string());
        let parts: Vec<&str> = s.trim().split("::").collect();
        let head = parts.first().copied().unwrap_or_default();
        let upper = head.to_ascii_uppercase();

        if upper == "MOCK" {
            let name = parts.get(1).ok_or_else(not_found)?;
            return Ok(ResourceAddress::Mock(name.to_string()));
        }
        if upper.starts_with("TCPIP") {
            board_number("TCPIP", &upper).ok_or_else(not_found)?;
            let host = parts.get(1).filter(|h| !h.is_empty()).ok_or_else(not_found)?;
            let class = parts.last().map(|c| c.to_ascii_uppercase());
            return match (parts.len(), class.as_deref()) {
                (4, Some("SOCKET")) => {
                    let port = parts[2].parse().map_err(|_| not_found())?;
                    Ok(ResourceAddress::Socket {
                        host: host.to_string(),
                        port,
                    })
                }
                (3, Some("INSTR")) | (4, Some("INSTR")) => Ok(ResourceAddress::Socket {
                    host: host.to_string(),
                    port: SCPI_RAW_PORT,
                }),
                _ => Err(not_found()),
            };
        }
        if upper.starts_with("ASRL") {
            let rest = &head[4..];
            if rest.is_empty() {
                return Err(not_found());
            }
            let port = match rest.parse::<u8>() {
                Ok(n) => Serial::format_address(n),
                Err(_) => rest.to_string(),
            };
            return Ok(ResourceAddress::Serial { port });
        }
        if upper.starts_with("GPIB") {
            let board = board_number("GPIB", &upper).ok_or_else(not_found)?;
            let primary = parts
                .get(1)
                .and_then(|p| p.parse().ok())
                .ok_or_else(not_found)?;
            return Ok(ResourceAddress::Gpib { board, primary });
        }
        if upper.starts_with("USB") {
            return Ok(ResourceAddress::Usb(s.to_string()));
        }
        Err(not_found())
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            ResourceAddress::Serial { port } => write!(f, "ASRL{}::INSTR", port),
            ResourceAddress::Gpib { board, primary } => {
                write!(f, "GPIB{}::{}::INSTR", board, primary)
            }
            ResourceAddress::Usb(s) => write!(f, "{}", s),
            ResourceAddress::Mock(name) => write!(f, "MOCK::{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_and_instr_forms() {
        assert_eq!(
            "TCPIP0::192.168.1.5::5025::SOCKET".parse::<ResourceAddress>(),
            Ok(ResourceAddress::Socket {
                host: "192.168.1.5".into(),
                port: 5025
            })
        );
        assert_eq!(
            "tcpip::scope.lab::inst0::INSTR".parse::<ResourceAddress>(),
            Ok(ResourceAddress::Socket {
                host: "scope.lab".into(),
                port: SCPI_RAW_PORT
            })
        );
        assert_eq!(
            "TCPIP0::10.0.0.2::INSTR".parse::<ResourceAddress>(),
            Ok(ResourceAddress::Socket {
                host: "10.0.0.2".into(),
                port: SCPI_RAW_PORT
            })
        );
    }

    #[test]
    fn serial_numbers_and_paths() {
        assert_eq!(
            "ASRL/dev/ttyUSB0::INSTR".parse::<ResourceAddress>(),
            Ok(ResourceAddress::Serial {
                port: "/dev/ttyUSB0".into()
            })
        );
        assert_eq!(
            "ASRL3::INSTR".parse::<ResourceAddress>(),
            Ok(ResourceAddress::Serial {
                port: Serial::format_address(3)
            })
        );
    }

    #[test]
    fn gpib_parses_but_is_unsupported() {
        let addr: ResourceAddress = "GPIB0::22::INSTR".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Gpib {
                board: 0,
                primary: 22
            }
        );
        assert!(!addr.is_supported());
    }

    #[test]
    fn garbage_is_not_found() {
        assert!(matches!(
            "nonsense".parse::<ResourceAddress>(),
            Err(TransportError::ResourceNotFound(_))
        ));
        assert!("TCPIP0::host::notaport::SOCKET"
            .parse::<ResourceAddress>()
            .is_err());
    }
}
