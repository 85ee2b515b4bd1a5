//! In-process stand-in for a bench instrument.
//!
//! [`MockResourceManager`] hands out [`MockResource`]s for any address. Each
//! resource keeps a [`MockState`] behind a shared lock, so a test can hold a
//! handle to the same resource a driver is using and inspect what was sent or
//! arrange what comes back.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
    instruments::{Resource, ResourceManager},
    protocols::TransportError,
    scpi::{self, Function},
    Result,
};

mod interpreter;

pub const DEFAULT_IDN: &str = "Mock Instrument,Model 123,SN123456,FW1.0";
pub const DEFAULT_NPLC: f64 = 10.0;

/// Everything the simulated instrument remembers.
#[derive(Debug, Clone)]
pub struct MockState {
    pub idn: String,
    pub function: Function,
    pub secondary: Option<Function>,
    /// Number of samples taken so far.
    pub sample_index: u64,
    pub last_reading: Option<f64>,
    /// Every sample taken since the last `CALC:AVER:CLE`.
    pub readings: Vec<f64>,
    pub ranges: BTreeMap<Function, f64>,
    pub autorange: BTreeMap<Function, bool>,
    pub nplc: BTreeMap<Function, f64>,
    pub trigger_source: String,
    pub trigger_count: String,
    pub sample_count: u32,
    pub armed: bool,
    pub display_text: String,
    pub dual_display: bool,
    pub beeper: bool,
    /// Output state keyed by channel; the empty key is the global output.
    pub outputs: BTreeMap<String, bool>,
    /// Last argument seen for headers with no dedicated handling.
    pub settings: HashMap<String, String>,
    /// Definite-length blocks received, with the header they followed.
    pub blocks: Vec<(String, Bytes)>,
    pub errors: VecDeque<String>,
    /// Standard event status register, cleared by `*ESR?` and `*CLS`.
    pub event_status: u8,
    pub responses: HashMap<String, Bytes>,
    pub command_log: Vec<String>,
    pub timeout: Duration,
    pub closed: bool,
    /// Queries produce no answer, so reads time out.
    pub silent: bool,
    pending: VecDeque<Bytes>,
    faults: VecDeque<TransportError>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            idn: DEFAULT_IDN.to_string(),
            function: Function::Volt,
            secondary: None,
            sample_index: 0,
            last_reading: None,
            readings: Vec::new(),
            ranges: BTreeMap::new(),
            autorange: BTreeMap::new(),
            nplc: BTreeMap::new(),
            trigger_source: "IMM".to_string(),
            trigger_count: "1".to_string(),
            sample_count: 1,
            armed: false,
            display_text: String::new(),
            dual_display: false,
            beeper: true,
            outputs: BTreeMap::new(),
            settings: HashMap::new(),
            blocks: Vec::new(),
            errors: VecDeque::new(),
            event_status: 0,
            responses: HashMap::new(),
            command_log: Vec::new(),
            timeout: Duration::from_secs(5),
            closed: false,
            silent: false,
            pending: VecDeque::new(),
            faults: VecDeque::new(),
        }
    }
}

impl MockState {
    /// Interprets one command. Queries return their answer.
    pub fn execute(&mut self, command: &str) -> Option<Bytes> {
        let command = scpi::normalize(command);
        trace!(%command, "mock received");
        self.command_log.push(command.clone());
        if scpi::is_query(&command) {
            Some(self.handle_query(&command))
        } else if let Some(canned) = self.responses.get(&command) {
            // non-SCPI instruments answer bare commands such as `RA`
            Some(canned.clone())
        } else {
            self.handle_write(&command);
            None
        }
    }

    fn receive(&mut self, data: &[u8]) {
        if let Some((header, payload)) = split_block(data) {
            let header = scpi::normalize(&header);
            self.command_log.push(format!("{} <{} bytes>", header, payload.len()));
            let (name, _) = header.split_once(' ').unwrap_or((header.as_str(), ""));
            self.settings
                .insert(name.trim_end_matches(',').to_string(), format!("#{}", payload.len()));
            self.blocks.push((header, payload));
            return;
        }
        let text = String::from_utf8_lossy(data);
        for command in scpi::split_message(&text) {
            if let Some(answer) = self.execute(command) {
                if !self.silent {
                    self.pending.push_back(answer);
                }
            }
        }
    }

    /// Status byte summarising the error queue, the output queue and the
    /// event status register.
    pub fn status_byte(&self) -> u8 {
        let mut stb = 0;
        if !self.errors.is_empty() {
            stb |= 1 << 2;
        }
        if !self.pending.is_empty() {
            stb |= 1 << 4;
        }
        if self.event_status != 0 {
            stb |= 1 << 5;
        }
        stb
    }

    fn take_fault(&mut self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        match self.faults.pop_front() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }
}

/// Header and payload of a message carrying a definite-length block. A `#`
/// inside quoted text does not start a block.
fn split_block(data: &[u8]) -> Option<(String, Bytes)> {
    let start = scpi::unquoted(data).find(|&i| {
        data[i] == b'#' && matches!(data.get(i + 1), Some(d) if (b'1'..=b'9').contains(d))
    })?;
    let payload = scpi::parse_block(&data[start..]).ok()?;
    let header = String::from_utf8_lossy(&data[..start]).into_owned();
    Some((header, payload))
}

/// Shared handle to one simulated instrument.
#[derive(Debug, Clone)]
pub struct MockResource {
    address: String,
    state: Arc<Mutex<MockState>>,
}

impl MockResource {
    pub fn new<A: Into<String>>(address: A) -> Self {
        Self::with_state(address, MockState::default())
    }

    pub fn with_idn<A: Into<String>, I: Into<String>>(address: A, idn: I) -> Self {
        Self::with_state(
            address,
            MockState {
                idn: idn.into(),
                ..MockState::default()
            },
        )
    }

    pub fn with_state<A: Into<String>>(address: A, state: MockState) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    /// Fixed answer for a query nothing else handles.
    pub fn respond(&self, command: &str, response: &str) {
        self.respond_bytes(command, Bytes::copy_from_slice(response.as_bytes()));
    }

    pub fn respond_bytes(&self, command: &str, response: Bytes) {
        self.state
            .lock()
            .responses
            .insert(scpi::normalize(command), response);
    }

    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().command_log.clone()
    }

    pub fn last_command(&self) -> Option<String> {
        self.state.lock().command_log.last().cloned()
    }

    /// Position of the first logged command equal to `command` once
    /// normalised.
    pub fn position(&self, command: &str) -> Option<usize> {
        let wanted = scpi::normalize(command);
        self.state
            .lock()
            .command_log
            .iter()
            .position(|c| *c == wanted)
    }

    pub fn received(&self, command: &str) -> bool {
        self.position(command).is_some()
    }

    pub fn clear_log(&self) {
        self.state.lock().command_log.clear();
    }

    /// The next `times` link operations fail with `error`.
    pub fn fail_next(&self, error: TransportError, times: usize) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(error).take(times));
    }

    pub fn push_error(&self, entry: &str) {
        self.state.lock().errors.push_back(entry.to_string());
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Resource for MockResource {
    fn address(&self) -> &str {
        &self.address
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault()?;
        state.receive(data);
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Bytes> {
        let mut state = self.state.lock();
        state.take_fault()?;
        state
            .pending
            .pop_front()
            .ok_or_else(|| TransportError::Timeout.into())
    }

    fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault()?;
        state.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        Ok(())
    }
}

/// Resource manager over simulated instruments. Unknown addresses get a
/// fresh instrument with the default identity.
#[derive(Debug, Default)]
pub struct MockResourceManager {
    resources: HashMap<String, MockResource>,
    unreachable: HashSet<String>,
}

impl MockResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: MockResource) -> MockResource {
        self.resources
            .insert(resource.address.clone(), resource.clone());
        resource
    }

    /// Registers an instrument answering `idn` at `address`.
    pub fn add(&mut self, address: &str, idn: &str) -> MockResource {
        self.register(MockResource::with_idn(address, idn))
    }

    pub fn resource(&self, address: &str) -> Option<MockResource> {
        self.resources.get(address).cloned()
    }

    /// Opening `address` will fail as if nothing were listening.
    pub fn unreachable(&mut self, address: &str) {
        self.unreachable.insert(address.to_string());
    }
}

impl ResourceManager for MockResourceManager {
    type Resource = MockResource;

    fn open_resource(&mut self, address: &str, timeout: Duration) -> Result<MockResource> {
        if self.unreachable.contains(address) {
            return Err(TransportError::NoListener(address.to_string()).into());
        }
        let resource = self
            .resources
            .entry(address.to_string())
            .or_insert_with(|| MockResource::new(address))
            .clone();
        {
            let mut state = resource.state();
            state.closed = false;
            state.timeout = timeout;
        }
        debug!(address, "mock resource opened");
        Ok(resource)
    }

    fn list_resources(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.resources.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Failure, instruments::Messenger};

    fn messenger() -> (MockResource, Messenger<MockResource>) {
        let resource = MockResource::new("MOCK::dmm");
        (resource.clone(), Messenger::new(resource))
    }

    #[test]
    fn answers_standard_queries() {
        let (_, mut m) = messenger();
        assert_eq!(m.query("*IDN?").unwrap(), DEFAULT_IDN);
        assert_eq!(m.query("*OPC?").unwrap(), "1");
        assert_eq!(m.query("SYST:ERR?").unwrap(), "0,No error");
        m.write("*RST").unwrap();
        m.write("*CLS").unwrap();
    }

    #[test]
    fn reads_sequence_monotonically() {
        let (_, mut m) = messenger();
        let first = m.query_float("MEAS:VOLT:DC?").unwrap();
        let second = m.query_float("READ?").unwrap();
        assert!((first - 1.2341).abs() < 1e-9);
        assert!(second > first);
        assert_eq!(m.query_float("FETC?").unwrap(), second);
    }

    #[test]
    fn fetch_without_a_measurement_does_not_advance() {
        let (mock, mut m) = messenger();
        assert_eq!(m.query_float("FETCH?").unwrap(), 1.234);
        assert_eq!(mock.state().sample_index, 0);
    }

    #[test]
    fn read_without_a_query_times_out() {
        let (_, mut m) = messenger();
        let err = m.read().unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn silent_instrument_times_out_on_query() {
        let (mock, mut m) = messenger();
        mock.set_silent(true);
        assert!(m.query("*IDN?").unwrap_err().is_timeout());
    }

    #[test]
    fn injected_faults_are_consumed_in_order() {
        let (mock, mut m) = messenger();
        mock.fail_next(TransportError::ConnectionLost, 1);
        let err = m.write("*CLS").unwrap_err();
        assert_eq!(err.failure(), Failure::Transport);
        assert!(m.write("*CLS").is_ok());
    }

    #[test]
    fn canned_responses_are_normalised() {
        let (mock, mut m) = messenger();
        mock.respond("calc:mark1:y?", "-3.5,0");
        assert_eq!(m.query(":CALC:MARK1:Y?").unwrap(), "-3.5,0");
    }

    #[test]
    fn binary_blocks_are_stored() {
        let (mock, mut m) = messenger();
        m.write_block("DATA:DAC1 VOLATILE,", &[0, 1, 2, 10, 3]).unwrap();
        let state = mock.state();
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.blocks[0].0, "DATA:DAC1 VOLATILE,");
        assert_eq!(&state.blocks[0].1[..], &[0, 1, 2, 10, 3]);
    }

    #[test]
    fn display_text_keeps_its_case() {
        let (mock, mut m) = messenger();
        m.write("disp:text \"Hello Bench\"").unwrap();
        assert_eq!(mock.state().display_text, "Hello Bench");
        assert_eq!(m.query("DISP:TEXT?").unwrap(), "\"Hello Bench\"");
    }

    #[test]
    fn question_marks_in_arguments_do_not_make_queries() {
        let (mock, mut m) = messenger();
        m.write("DISP:TEXT \"Ready?\"").unwrap();
        assert_eq!(mock.state().display_text, "Ready?");
        assert_eq!(mock.state().status_byte(), 0);
        assert!(m.read().unwrap_err().is_timeout());
    }

    #[test]
    fn quoted_separators_stay_in_one_command() {
        let (mock, mut m) = messenger();
        m.write("DISP:TEXT \"A;B\";*CLS").unwrap();
        assert_eq!(mock.state().display_text, "A;B");
        assert_eq!(mock.command_log(), vec!["DISP:TEXT \"A;B\"", "*CLS"]);
    }

    #[test]
    fn quoted_hash_is_not_a_block() {
        let (mock, mut m) = messenger();
        m.write("DISP:TEXT \"#1 run\"").unwrap();
        let state = mock.state();
        assert!(state.blocks.is_empty());
        assert_eq!(state.display_text, "#1 run");
    }

    #[test]
    fn reading_the_event_register_clears_it() {
        let (mock, mut m) = messenger();
        m.write("*OPC").unwrap();
        assert_eq!(m.query("*STB?").unwrap(), "32");
        assert_eq!(m.query("*ESR?").unwrap(), "1");
        assert_eq!(m.query("*ESR?").unwrap(), "0");
        assert_eq!(mock.state().event_status, 0);
    }

    #[test]
    fn closed_resource_refuses_io_until_reopened() {
        let mut manager = MockResourceManager::new();
        let mut link = manager
            .open_resource("MOCK::psu", Duration::from_secs(1))
            .unwrap();
        link.close().unwrap();
        assert!(link.write_raw(b"*CLS\n").is_err());
        let mut again = manager
            .open_resource("MOCK::psu", Duration::from_secs(1))
            .unwrap();
        assert!(again.write_raw(b"*CLS\n").is_ok());
        assert_eq!(manager.list_resources(), vec!["MOCK::psu".to_string()]);
    }

    #[test]
    fn unreachable_addresses_fail_to_open() {
        let mut manager = MockResourceManager::new();
        manager.unreachable("TCPIP0::10.0.0.9::5025::SOCKET");
        let err = manager
            .open_resource("TCPIP0::10.0.0.9::5025::SOCKET", Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(
            err.transport(),
            Some(&TransportError::NoListener(
                "TCPIP0::10.0.0.9::5025::SOCKET".into()
            ))
        );
    }
}
