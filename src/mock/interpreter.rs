//! Command interpreter behind [`MockResource`](super::MockResource).
//!
//! Commands are normalised with [`scpi::normalize`] and then sorted by header
//! into the categories a bench multimeter (and, loosely, supplies and
//! generators) understands. Anything unrecognised is accepted; if it carried
//! an argument the value is remembered so that `<header>?` can echo it back.

use bytes::Bytes;

use super::MockState;
use crate::scpi::{self, Function};

pub(super) fn split(command: &str) -> (&str, &str) {
    match command.split_once(' ') {
        Some((header, arg)) => (header, arg.trim()),
        None => (command, ""),
    }
}

fn strip_sense(header: &str) -> &str {
    header
        .strip_prefix("SENS:")
        .or_else(|| header.strip_prefix("SENSE:"))
        .unwrap_or(header)
}

/// If `header` ends with one of `nodes`, the part in front of it (possibly
/// empty).
fn scoped<'a>(header: &'a str, nodes: &[&str]) -> Option<&'a str> {
    nodes.iter().find_map(|node| {
        if header == *node {
            Some("")
        } else {
            header
                .strip_suffix(node)
                .and_then(|prefix| prefix.strip_suffix(':'))
        }
    })
}

fn parse_state(arg: &str) -> Option<bool> {
    match arg.trim() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

fn flag(state: bool) -> String {
    if state { "1" } else { "0" }.to_string()
}

/// Channel encoded in an `OUTP`, `OUTP2`, `OUTPUT1:STATE` style header.
fn output_channel(header: &str) -> Option<String> {
    let rest = header
        .strip_prefix("OUTPUT")
        .or_else(|| header.strip_prefix("OUTP"))?;
    let rest = rest
        .strip_suffix(":STATE")
        .or_else(|| rest.strip_suffix(":STAT"))
        .unwrap_or(rest);
    rest.chars()
        .all(|c| c.is_ascii_digit())
        .then(|| rest.to_string())
}

/// Channel from a trailing `(@n)` list, if any.
fn channel_list(arg: &str) -> Option<String> {
    let start = arg.find("(@")?;
    let inner = &arg[start + 2..];
    let end = inner.find(')')?;
    Some(inner[..end].trim().to_string())
}

impl MockState {
    /// Function a header prefix refers to; empty prefix means "current".
    fn function_for(&self, prefix: &str) -> Option<Function> {
        if prefix.is_empty() {
            Some(self.function)
        } else {
            Function::lookup(prefix)
        }
    }

    fn reading(&self, function: Function) -> f64 {
        function.seed() + 0.0001 * self.sample_index as f64
    }

    /// MEAS and READ: take a new sample.
    fn sample(&mut self, function: Function) -> f64 {
        self.function = function;
        self.sample_index += 1;
        let value = self.reading(function);
        self.last_reading = Some(value);
        self.readings.push(value);
        self.armed = false;
        value
    }

    /// `CALC:AVER:<node>?` over the samples taken so far.
    fn statistic(&self, node: &str) -> Option<f64> {
        let n = self.readings.len() as f64;
        let mean = if n > 0.0 { self.readings.iter().sum::<f64>() / n } else { 0.0 };
        let value = match node {
            "COUN" | "COUNT" => n,
            "AVER" | "AVERAGE" => mean,
            "MIN" | "MINIMUM" => self.readings.iter().copied().reduce(f64::min).unwrap_or(0.0),
            "MAX" | "MAXIMUM" => self.readings.iter().copied().reduce(f64::max).unwrap_or(0.0),
            "SDEV" => {
                if n < 2.0 {
                    0.0
                } else {
                    let ss: f64 = self.readings.iter().map(|r| (r - mean).powi(2)).sum();
                    (ss / (n - 1.0)).sqrt()
                }
            }
            _ => return None,
        };
        Some(value)
    }

    /// FETCH: the cached sample, or one computed without advancing.
    fn fetch(&mut self) -> f64 {
        match self.last_reading {
            Some(value) => value,
            None => {
                let value = self.reading(self.function);
                self.last_reading = Some(value);
                value
            }
        }
    }

    pub(crate) fn handle_write(&mut self, command: &str) {
        let (header, arg) = split(command);
        let scoped_header = strip_sense(header);

        if let Some(f) = header
            .strip_prefix("CONF:")
            .or_else(|| header.strip_prefix("CONFIGURE:"))
            .and_then(Function::lookup)
        {
            self.function = f;
            self.last_reading = None;
            return;
        }
        match scoped_header {
            "FUNC" | "FUNC1" | "FUNCTION" => {
                if let Some(f) = Function::lookup(arg) {
                    self.function = f;
                    self.last_reading = None;
                    return;
                }
            }
            "FUNC2" | "FUNCTION2" => {
                if let Some(f) = Function::lookup(arg) {
                    self.secondary = Some(f);
                    return;
                }
            }
            _ => {}
        }
        if let Some(prefix) = scoped(scoped_header, &["RANG:AUTO", "RANGE:AUTO"]) {
            if let (Some(f), Some(state)) = (self.function_for(prefix), parse_state(arg)) {
                self.autorange.insert(f, state);
                return;
            }
        }
        if let Some(prefix) = scoped(scoped_header, &["RANG", "RANGE"]) {
            if let (Some(f), Ok(value)) = (self.function_for(prefix), scpi::parse_float(arg)) {
                self.ranges.insert(f, value);
                self.autorange.insert(f, false);
                return;
            }
        }
        if let Some(prefix) = scoped(scoped_header, &["NPLC", "NPLCYCLES"]) {
            if let (Some(f), Ok(value)) = (self.function_for(prefix), scpi::parse_float(arg)) {
                self.nplc.insert(f, value);
                return;
            }
        }
        match header {
            "TRIG:SOUR" | "TRIGGER:SOURCE" => self.trigger_source = arg.to_string(),
            "TRIG:COUN" | "TRIGGER:COUNT" => self.trigger_count = arg.to_string(),
            "SAMP:COUN" | "SAMPLE:COUNT" => {
                if let Ok(n) = arg.parse() {
                    self.sample_count = n;
                }
            }
            "INIT" | "INIT:IMM" | "INITIATE" | "INITIATE:IMMEDIATE" => self.armed = true,
            "*CLS" => {
                self.errors.clear();
                self.event_status = 0;
            }
            "*OPC" => self.event_status |= 1,
            "DISP:TEXT" | "DISPLAY:TEXT" => self.display_text = scpi::unquote(arg).to_string(),
            "DISP:TEXT:CLE" | "DISP:CLE" | "DISPLAY:TEXT:CLEAR" => self.display_text.clear(),
            "CALC:AVER:CLE" | "CALCULATE:AVERAGE:CLEAR" => self.readings.clear(),
            "DISP:WIND2:STAT" | "DISPLAY:WINDOW2:STATE" => {
                if let Some(state) = parse_state(arg) {
                    self.dual_display = state;
                }
            }
            "SYST:BEEP:STAT" | "SYSTEM:BEEPER:STATE" => {
                if let Some(state) = parse_state(arg) {
                    self.beeper = state;
                }
            }
            _ => {
                if let Some(channel) = output_channel(header) {
                    let state = arg.split(',').next().and_then(parse_state);
                    if let Some(state) = state {
                        let channel = channel_list(arg).unwrap_or(channel);
                        self.outputs.insert(channel, state);
                        return;
                    }
                }
                if !arg.is_empty() {
                    self.settings.insert(header.to_string(), arg.to_string());
                }
            }
        }
    }

    pub(crate) fn handle_query(&mut self, command: &str) -> Bytes {
        if let Some(answer) = self.classified_query(command) {
            return Bytes::from(answer);
        }
        if let Some(canned) = self.responses.get(command) {
            return canned.clone();
        }
        let (header, _) = split(command);
        let header = header.trim_end_matches('?');
        match self.settings.get(header) {
            Some(value) => Bytes::from(value.clone()),
            None => Bytes::from_static(b"0"),
        }
    }

    fn classified_query(&mut self, command: &str) -> Option<String> {
        let (header, arg) = split(command);
        let header = header.trim_end_matches('?');
        let scoped_header = strip_sense(header);

        match header {
            "*IDN" => return Some(self.idn.clone()),
            "*OPC" => return Some("1".into()),
            "*STB" => return Some(self.status_byte().to_string()),
            "*ESR" => return Some(std::mem::take(&mut self.event_status).to_string()),
            "SYST:ERR" | "SYST:ERR:NEXT" | "SYSTEM:ERROR" => {
                return Some(
                    self.errors
                        .pop_front()
                        .unwrap_or_else(|| "0,No error".to_string()),
                )
            }
            "READ" => return Some(self.sample(self.function).to_string()),
            "FETC" | "FETCH" => return Some(self.fetch().to_string()),
            "READ2" | "FETC2" | "FETCH2" | "SENS:DATA2" | "DATA2" => {
                let f = self.secondary.unwrap_or(self.function);
                return Some(self.reading(f).to_string());
            }
            "DISP:TEXT" | "DISPLAY:TEXT" => return Some(format!("\"{}\"", self.display_text)),
            "DISP:WIND2:STAT" | "DISPLAY:WINDOW2:STATE" => return Some(flag(self.dual_display)),
            "SYST:BEEP:STAT" | "SYSTEM:BEEPER:STATE" => return Some(flag(self.beeper)),
            "TRIG:SOUR" | "TRIGGER:SOURCE" => return Some(self.trigger_source.clone()),
            "TRIG:COUN" | "TRIGGER:COUNT" => return Some(self.trigger_count.clone()),
            "SAMP:COUN" | "SAMPLE:COUNT" => return Some(self.sample_count.to_string()),
            _ => {}
        }
        match scoped_header {
            "FUNC" | "FUNC1" | "FUNCTION" | "CONF" => {
                return Some(format!("\"{}\"", self.function.token()))
            }
            "FUNC2" | "FUNCTION2" => {
                return Some(match self.secondary {
                    Some(f) => format!("\"{}\"", f.token()),
                    None => "\"NONE\"".to_string(),
                })
            }
            _ => {}
        }
        if let Some(value) = header
            .strip_prefix("CALC:AVER:")
            .or_else(|| header.strip_prefix("CALCULATE:AVERAGE:"))
            .and_then(|node| self.statistic(node))
        {
            return Some(value.to_string());
        }
        if let Some(f) = header
            .strip_prefix("MEAS:")
            .or_else(|| header.strip_prefix("MEASURE:"))
            .and_then(Function::lookup)
        {
            return Some(self.sample(f).to_string());
        }
        if let Some(f) = scoped(scoped_header, &["RANG:AUTO", "RANGE:AUTO"])
            .and_then(|p| self.function_for(p))
        {
            let state = self.autorange.get(&f).copied().unwrap_or(true);
            return Some(flag(state));
        }
        if let Some(f) =
            scoped(scoped_header, &["RANG", "RANGE"]).and_then(|p| self.function_for(p))
        {
            let range = self.ranges.get(&f).copied().unwrap_or(f.default_range());
            return Some(range.to_string());
        }
        if let Some(f) =
            scoped(scoped_header, &["NPLC", "NPLCYCLES"]).and_then(|p| self.function_for(p))
        {
            let nplc = self.nplc.get(&f).copied().unwrap_or(super::DEFAULT_NPLC);
            return Some(nplc.to_string());
        }
        if let Some(channel) = output_channel(header) {
            let channel = channel_list(arg).unwrap_or(channel);
            let state = self.outputs.get(&channel).copied().unwrap_or(false);
            return Some(flag(state));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: &mut MockState, command: &str) -> Option<String> {
        state
            .execute(command)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    #[test]
    fn scoped_headers() {
        assert_eq!(scoped("VOLT:DC:RANG", &["RANG"]), Some("VOLT:DC"));
        assert_eq!(scoped("RANG", &["RANG"]), Some(""));
        assert_eq!(scoped("VOLT:DC:RANG:AUTO", &["RANG"]), None);
        assert_eq!(scoped("ORANG", &["RANG"]), None);
    }

    #[test]
    fn output_headers() {
        assert_eq!(output_channel("OUTP"), Some(String::new()));
        assert_eq!(output_channel("OUTP2"), Some("2".into()));
        assert_eq!(output_channel("OUTPUT1:STATE"), Some("1".into()));
        assert_eq!(output_channel("OUTP:PROT"), None);
        assert_eq!(channel_list("ON, (@3)"), Some("3".into()));
    }

    #[test]
    fn sense_prefix_and_long_forms_reach_the_same_state() {
        let mut s = MockState::default();
        run(&mut s, "SENS:VOLT:DC:NPLC 5.0");
        assert_eq!(run(&mut s, "VOLT:NPLC?").as_deref(), Some("5"));
        run(&mut s, "CURRENT:DC:RANGE 0.1");
        assert_eq!(run(&mut s, "SENS:CURR:RANG?").as_deref(), Some("0.1"));
        assert_eq!(run(&mut s, "CURR:RANG:AUTO?").as_deref(), Some("0"));
    }

    #[test]
    fn secondary_display_reads_its_own_function() {
        let mut s = MockState::default();
        run(&mut s, "SENS:FUNC2 \"CURR\"");
        run(&mut s, "DISP:WIND2:STAT ON");
        assert_eq!(run(&mut s, "FUNC2?").as_deref(), Some("\"CURR\""));
        assert_eq!(run(&mut s, "DISP:WIND2:STAT?").as_deref(), Some("1"));
        let secondary: f64 = run(&mut s, "SENS:DATA2?").unwrap().parse().unwrap();
        assert_eq!(secondary, Function::Curr.seed());
    }

    #[test]
    fn unknown_settings_echo_back() {
        let mut s = MockState::default();
        assert_eq!(run(&mut s, "TEMP:TC:TYPE J"), None);
        assert_eq!(run(&mut s, "temp:tc:type?").as_deref(), Some("J"));
        assert_eq!(run(&mut s, "NEVER:SET?").as_deref(), Some("0"));
    }

    #[test]
    fn statistics_cover_samples_since_clear() {
        let mut s = MockState::default();
        run(&mut s, "MEAS:VOLT?");
        run(&mut s, "CALC:AVER:CLE");
        run(&mut s, "READ?");
        run(&mut s, "READ?");
        assert_eq!(run(&mut s, "CALC:AVER:COUN?").as_deref(), Some("2"));
        let min: f64 = run(&mut s, "CALC:AVER:MIN?").unwrap().parse().unwrap();
        let max: f64 = run(&mut s, "calc:aver:max?").unwrap().parse().unwrap();
        assert!((min - 1.2342).abs() < 1e-9);
        assert!((max - 1.2343).abs() < 1e-9);
        let sdev: f64 = run(&mut s, "CALC:AVER:SDEV?").unwrap().parse().unwrap();
        assert!(sdev > 0.0);
    }

    #[test]
    fn error_queue_drains_to_no_error() {
        let mut s = MockState::default();
        s.errors.push_back("-113,\"Undefined header\"".into());
        assert_eq!(
            run(&mut s, "SYST:ERR?").as_deref(),
            Some("-113,\"Undefined header\"")
        );
        assert_eq!(run(&mut s, "SYST:ERR?").as_deref(), Some("0,No error"));
    }
}
