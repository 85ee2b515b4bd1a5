//! Small helpers shared by the binary and test benches.

use std::{net::Ipv4Addr, time::Duration};

use tracing::{debug, error, info};

use crate::{
    instruments::{ConnectOptions, Identity, ResourceManager, Session},
    Error, Result,
};

/// `steps` evenly spaced values from `start` to `stop`, both ends included.
pub fn linspace(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        n => (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Number buried in instrument text, e.g. `"12.34V"` or `"Temp: 25C"`.
/// Only digits, decimal points and a leading minus sign are kept.
pub fn parse_numeric(text: &str) -> Result<f64> {
    let mut digits = String::new();
    for c in text.chars() {
        match c {
            '0'..='9' | '.' => digits.push(c),
            '-' if digits.is_empty() => digits.push(c),
            _ => {}
        }
    }
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::value_conversion(text, "no numeric value found"));
    }
    digits
        .parse::<f64>()
        .map_err(|e| Error::value_conversion(text, e))
}

/// [`parse_numeric`], or 0 when nothing parses.
pub fn string_to_float(text: &str) -> f64 {
    parse_numeric(text).unwrap_or_else(|e| {
        error!("failed to convert {:?} to float: {}", text, e);
        0.0
    })
}

/// [`parse_numeric`] truncated towards zero, or 0 when nothing parses.
pub fn string_to_int(text: &str) -> i64 {
    parse_numeric(text).map(|v| v as i64).unwrap_or_else(|e| {
        error!("failed to convert {:?} to integer: {}", text, e);
        0
    })
}

/// Dotted-quad IPv4 address.
pub fn is_valid_ip(address: &str) -> bool {
    address.parse::<Ipv4Addr>().is_ok()
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let n = bytes as f64;
    if n < KB {
        format!("{} B", bytes)
    } else if n < KB * KB {
        format!("{:.2} KB", n / KB)
    } else if n < KB * KB * KB {
        format!("{:.2} MB", n / (KB * KB))
    } else {
        format!("{:.2} GB", n / (KB * KB * KB))
    }
}

/// Opens each address in turn and keeps the ones that answer `*IDN?`.
/// Nothing listening, or silence, just skips the address.
pub fn scan_resources<M, A>(manager: &mut M, addresses: &[A], timeout: Duration) -> Vec<(String, Identity)>
where
    M: ResourceManager,
    A: AsRef<str>,
{
    let mut found = Vec::new();
    for address in addresses.iter().map(AsRef::as_ref) {
        let options = ConnectOptions::new(address).timeout(timeout).identify(false);
        let mut session = match Session::open(manager, &options) {
            Ok(session) => session,
            Err(e) => {
                debug!(address, "nothing at address: {}", e);
                continue;
            }
        };
        match session.identify() {
            Ok(Some(identity)) => {
                info!(address, instrument = %identity, "found instrument");
                found.push((address.to_string(), identity));
            }
            _ => debug!(address, "no identification"),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_pulled_out_of_text() {
        assert_eq!(parse_numeric("12.34V").unwrap(), 12.34);
        assert_eq!(parse_numeric("Temp: 25C").unwrap(), 25.0);
        assert_eq!(parse_numeric("-3.5 mA").unwrap(), -3.5);
        assert!(parse_numeric("volts").is_err());
    }

    #[test]
    fn lenient_conversions_fall_back_to_zero() {
        assert_eq!(string_to_float("abc"), 0.0);
        assert_eq!(string_to_int("42 samples"), 42);
        assert_eq!(string_to_int("7.9"), 7);
        assert_eq!(string_to_int(""), 0);
    }

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn ip_addresses() {
        assert!(is_valid_ip("192.168.1.10"));
        assert!(!is_valid_ip("256.1.1.1"));
        assert!(!is_valid_ip("10.0.0"));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
