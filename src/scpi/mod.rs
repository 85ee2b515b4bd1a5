use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

pub mod com_cmd;
pub mod error;
pub mod function;

pub use self::error::ScpiError;
pub use self::function::Function;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn new<S: ToString>(s: S) -> Self {
        Self(s.to_string())
    }
    pub fn query(&mut self) -> &mut Self {
        self.0.push('?');
        self
    }
    pub fn para<P: AsRef<str>>(&mut self, para: P) -> &mut Self {
        self.0.push(' ');
        self.0.push_str(para.as_ref());
        self
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn into_inner(self) -> String {
        self.0
    }
}
impl AsRef<[u8]> for Command {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}
impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

pub trait ToCommand {
    fn to_command(&self) -> Command;
}
impl<T> ToCommand for T
where
    T: ToString,
{
    fn to_command(&self) -> Command {
        Command(self.to_string())
    }
}

/// Canonical form used to compare commands: upper case outside quotes, no
/// leading colon, single spaces.
pub fn normalize(command: &str) -> String {
    let trimmed = command.trim();
    let trimmed = trimmed.strip_prefix(':').unwrap_or(trimmed);
    let mut out = String::with_capacity(trimmed.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    for c in trimmed.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                out.push(c.to_ascii_uppercase());
            }
        }
    }
    out
}

/// Removes one pair of surrounding quotes, as returned by `FUNC?` and friends.
pub fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        .unwrap_or(s)
}

/// Offsets of the bytes of `data` that lie outside single or double quoted
/// strings. The quote characters themselves are skipped.
pub fn unquoted(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    let mut quote = None;
    data.iter().enumerate().filter_map(move |(i, &b)| match quote {
        Some(q) => {
            if b == q {
                quote = None;
            }
            None
        }
        None if b == b'"' || b == b'\'' => {
            quote = Some(b);
            None
        }
        None => Some(i),
    })
}

/// Splits a program message into its commands at `;` and newlines that are
/// not quoted. Empty commands are dropped.
pub fn split_message(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut commands = Vec::new();
    let mut start = 0;
    for i in unquoted(bytes).filter(|&i| matches!(bytes[i], b';' | b'\n')) {
        commands.push(&text[start..i]);
        start = i + 1;
    }
    commands.push(&text[start..]);
    commands
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Query commands carry `?` in their header (`*IDN?`, `MEAS?1`); a `?` in
/// the arguments does not count.
pub fn is_query(command: &str) -> bool {
    let bytes = command.as_bytes();
    let header_end = unquoted(bytes)
        .find(|&i| bytes[i].is_ascii_whitespace())
        .unwrap_or(bytes.len());
    command[..header_end].contains('?')
}

pub fn parse_float(response: &str) -> Result<f64> {
    let text = response.trim();
    text.parse()
        .map_err(|e| Error::value_conversion(text, e))
}

/// `1`, `ON` and friends.
pub fn parse_bool(response: &str) -> Result<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" => Ok(true),
        "0" | "OFF" | "FALSE" => Ok(false),
        other => parse_float(other).map(|v| v != 0.0),
    }
}

pub fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

pub fn parse_ascii_values(response: &str, separator: char) -> Result<Vec<f64>> {
    let text = response.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(separator).map(parse_float).collect()
}

/// Wraps a payload as an IEEE-488.2 definite-length block.
pub fn encode_block(payload: &[u8]) -> Bytes {
    let len = payload.len().to_string();
    let mut out = BytesMut::with_capacity(payload.len() + len.len() + 2);
    out.put_u8(b'#');
    out.put_slice(len.len().to_string().as_bytes());
    out.put_slice(len.as_bytes());
    out.put_slice(payload);
    out.freeze()
}

/// Largest definite-length block accepted from an instrument.
pub const MAX_BLOCK: usize = 64 * 1024 * 1024;

/// Length of the whole block (header included) if `data` starts with a
/// complete definite-length header. Declared lengths above [`MAX_BLOCK`] are
/// rejected before anything is allocated for them.
pub fn block_len(data: &[u8]) -> Result<Option<usize>> {
    if data.first() != Some(&b'#') {
        return Ok(None);
    }
    let digits = match data.get(1) {
        Some(d) if d.is_ascii_digit() => (d - b'0') as usize,
        Some(_) => return Err(malformed(data, "header digit count is not a digit")),
        None => return Ok(None),
    };
    if digits == 0 {
        return Ok(None);
    }
    let Some(len_text) = data.get(2..2 + digits) else {
        return Ok(None);
    };
    let len: usize = std::str::from_utf8(len_text)
        .ok()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed(data, "length field is not a number"))?;
    if len > MAX_BLOCK {
        return Err(malformed(data, "declared block length is too large"));
    }
    Ok(Some(2 + digits + len))
}

/// Extracts the payload of a definite or indefinite (`#0`) block.
pub fn parse_block(data: &[u8]) -> Result<Bytes> {
    let start = data
        .iter()
        .position(|b| *b == b'#')
        .ok_or_else(|| malformed(data, "no block header"))?;
    let data = &data[start..];
    if data.get(1) == Some(&b'0') {
        let body = &data[2..];
        let body = body.strip_suffix(b"\n").unwrap_or(body);
        return Ok(Bytes::copy_from_slice(body));
    }
    let total = block_len(data)?.ok_or_else(|| malformed(data, "truncated header"))?;
    let header = 2 + (data[1] - b'0') as usize;
    if data.len() < total {
        return Err(malformed(data, "payload shorter than declared length"));
    }
    Ok(Bytes::copy_from_slice(&data[header..total]))
}

fn malformed(data: &[u8], reason: &str) -> Error {
    let shown = String::from_utf8_lossy(&data[..data.len().min(16)]).into_owned();
    Error::value_conversion(&shown, reason)
}

pub fn decode_f32(payload: &[u8], big_endian: bool) -> Result<Vec<f32>> {
    if payload.len() % 4 != 0 {
        return Err(malformed(payload, "payload is not a whole number of f32 values"));
    }
    let mut buf = payload;
    let mut values = Vec::with_capacity(payload.len() / 4);
    while buf.has_remaining() {
        values.push(if big_endian {
            buf.get_f32()
        } else {
            buf.get_f32_le()
        });
    }
    Ok(values)
}

pub fn encode_f32(values: &[f32], big_endian: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(values.len() * 4);
    for v in values {
        if big_endian {
            out.put_f32(*v);
        } else {
            out.put_f32_le(*v);
        }
    }
    out.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusByte(u8);
impl StatusByte {
    pub fn new(b: u8) -> Self {
        Self(b)
    }
    pub fn byte(&self) -> u8 {
        self.0
    }
    pub fn is_error_queue_nonempty(&self) -> bool {
        self.0 & (1 << 2) != 0
    }
    pub fn is_message_available(&self) -> bool {
        self.0 & (1 << 4) != 0
    }
    pub fn is_event_happened(&self) -> bool {
        self.0 & (1 << 5) != 0
    }
    pub fn is_requesting_service(&self) -> bool {
        self.0 & (1 << 6) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatusByte(u8);
impl EventStatusByte {
    pub fn new(b: u8) -> Self {
        Self(b)
    }
    pub fn byte(&self) -> u8 {
        self.0
    }
    pub fn is_command_err(&self) -> bool {
        self.0 & (1 << 5) != 0
    }
    pub fn is_execution_err(&self) -> bool {
        self.0 & (1 << 4) != 0
    }
    pub fn is_device_dep_err(&self) -> bool {
        self.0 & (1 << 3) != 0
    }
    pub fn is_query_err(&self) -> bool {
        self.0 & (1 << 2) != 0
    }
    pub fn is_opera_complete(&self) -> bool {
        self.0 & (1 << 0) != 0
    }
}

/// Status registers come back as decimal text.
pub fn parse_register(response: &str) -> Result<u8> {
    let text = response.trim();
    text.parse::<f64>()
        .ok()
        .filter(|v| (0.0..=255.0).contains(v))
        .map(|v| v as u8)
        .ok_or_else(|| Error::value_conversion(text, "not a register value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_colon_and_spacing() {
        assert_eq!(normalize(":conf:volt"), "CONF:VOLT");
        assert_eq!(normalize("  CONF:VOLT  "), "CONF:VOLT");
        assert_eq!(normalize("trig:sour    bus"), "TRIG:SOUR BUS");
        assert_eq!(normalize("DISP:TEXT \"Hello  World\""), "DISP:TEXT \"Hello  World\"");
    }

    #[test]
    fn command_builder() {
        let mut c = Command::new("SENS:VOLT:DC:NPLC");
        c.para("5");
        assert_eq!(c.as_str(), "SENS:VOLT:DC:NPLC 5");
        let mut q = "*IDN".to_command();
        q.query();
        assert_eq!(q.into_inner(), "*IDN?");
    }

    #[test]
    fn block_header_and_payload() {
        let block = encode_block(b"hello");
        assert_eq!(&block[..], b"#15hello");
        assert_eq!(block_len(&block).unwrap(), Some(8));
        assert_eq!(&parse_block(&block).unwrap()[..], b"hello");
        assert_eq!(&parse_block(b"#0abc\n").unwrap()[..], b"abc");
        assert!(parse_block(b"#19abc").is_err());
        assert!(parse_block(b"no header").is_err());
    }

    #[test]
    fn oversized_block_headers_are_rejected() {
        let err = block_len(b"#9999999999\n").unwrap_err();
        assert_eq!(err.failure(), crate::error::Failure::ValueConversion);
        assert!(parse_block(b"#9999999999abc").is_err());
    }

    #[test]
    fn quoted_text_hides_separators() {
        assert_eq!(
            split_message("DISP:TEXT \"A;B\";*OPC?\n"),
            vec!["DISP:TEXT \"A;B\"", "*OPC?"]
        );
        assert_eq!(split_message("MESS:SHOW 'x\ny'"), vec!["MESS:SHOW 'x\ny'"]);
        assert!(is_query("OUTP? (@2)"));
        assert!(is_query("*IDN?"));
        assert!(is_query("MEAS?2"));
        assert!(!is_query("DISP:TEXT \"Ready?\""));
        assert!(!is_query("DISP:TEXT \"why? not\""));
    }

    #[test]
    fn long_blocks_use_more_digits() {
        let payload = vec![7u8; 1234];
        let block = encode_block(&payload);
        assert_eq!(&block[..6], b"#41234");
        assert_eq!(parse_block(&block).unwrap().len(), 1234);
    }

    #[test]
    fn f32_payloads_respect_endianness() {
        let values = [1.5f32, -2.25];
        let be = encode_f32(&values, true);
        assert_eq!(decode_f32(&be, true).unwrap(), values);
        let le = encode_f32(&values, false);
        assert_eq!(decode_f32(&le, false).unwrap(), values);
        assert!(decode_f32(&[0, 1, 2], true).is_err());
    }

    #[test]
    fn ascii_and_scalar_parsing() {
        assert_eq!(parse_ascii_values("1.1,2.2, 3.3\n", ',').unwrap(), vec![1.1, 2.2, 3.3]);
        assert!(parse_ascii_values("1,x", ',').is_err());
        assert_eq!(parse_float(" +1.234E+00\r\n").unwrap(), 1.234);
        assert!(parse_bool("ON").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert_eq!(unquote("\"VOLT\""), "VOLT");
        assert_eq!(parse_register("48").unwrap(), 48);
    }
}
