//! Connection lifecycle for one instrument.
//!
//! A [`Session`] is created already connected ([`Session::open`] fails loudly
//! otherwise), may or may not know who it is talking to, and releases its link
//! when dropped. All I/O goes through [`guard::run`] with the session's
//! [`Policy`], so callers only ever see [`ValidationError`]s.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{
    guard::{self, Checked, Policy},
    Messenger, Resource, ResourceManager,
};
use crate::{
    error::ValidationError,
    logging::LogContext,
    scpi::{self, com_cmd, EventStatusByte, ScpiError, StatusByte, ToCommand},
    Result,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Sleep between two `*OPC?` polls.
pub const OPC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parsed `*IDN?` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl FromStr for Identity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(crate::Error::value_conversion(text, "empty identification"));
        }
        let mut fields = text.splitn(4, ',').map(|f| f.trim().to_string());
        let mut next = || fields.next().unwrap_or_default();
        Ok(Identity {
            manufacturer: next(),
            model: next(),
            serial: next(),
            firmware: next(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub address: String,
    pub nickname: Option<String>,
    pub identify: bool,
    pub timeout: Duration,
    pub policy: Policy,
}

impl ConnectOptions {
    pub fn new<A: Into<String>>(address: A) -> Self {
        Self {
            address: address.into(),
            nickname: None,
            identify: true,
            timeout: DEFAULT_TIMEOUT,
            policy: Policy::default(),
        }
    }

    pub fn nickname<N: Into<String>>(mut self, nickname: N) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn identify(mut self, identify: bool) -> Self {
        self.identify = identify;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }
}

pub struct Session<R: Resource> {
    messenger: Messenger<R>,
    address: String,
    nickname: Option<String>,
    identity: Option<Identity>,
    log: LogContext,
    policy: Policy,
}

impl<R: Resource> Session<R> {
    /// Opens the link eagerly. Identification, when asked for, may fail
    /// without failing the open.
    pub fn open<M>(manager: &mut M, options: &ConnectOptions) -> Result<Self>
    where
        M: ResourceManager<Resource = R>,
    {
        let link = manager.open_resource(&options.address, options.timeout)?;
        let mut session = Self::from_resource(link, options);
        info!(address = %session.address, "connected");
        if options.identify {
            if session.identify()?.is_none() {
                warn!(address = %session.address, "connected but unidentified");
            }
        }
        Ok(session)
    }

    /// Wraps an already open resource.
    pub fn from_resource(link: R, options: &ConnectOptions) -> Self {
        let address = link.address().to_string();
        let label = options.nickname.clone().unwrap_or_else(|| address.clone());
        Self {
            messenger: Messenger::new(link),
            log: LogContext::new(label, address.clone()),
            address,
            nickname: options.nickname.clone(),
            identity: None,
            policy: options.policy.clone(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Nickname, else `manufacturer model`, else the address.
    pub fn name(&self) -> &str {
        self.log.instrument()
    }

    pub fn log_context(&self) -> &LogContext {
        &self.log
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    pub fn is_open(&self) -> bool {
        self.messenger.is_open()
    }

    /// Runs `op` against the raw messenger under the session's policy.
    pub fn guarded<T, F>(&mut self, operation: &str, default: T, op: F) -> Checked<T>
    where
        F: FnMut(&mut Messenger<R>) -> Result<T>,
    {
        let policy = self.policy.clone();
        self.guarded_with(&policy, operation, default, op)
    }

    /// Same as [`guarded`](Self::guarded) with an explicit policy, for the few
    /// operations worth retrying.
    pub fn guarded_with<T, F>(
        &mut self,
        policy: &Policy,
        operation: &str,
        default: T,
        mut op: F,
    ) -> Checked<T>
    where
        F: FnMut(&mut Messenger<R>) -> Result<T>,
    {
        let Self { messenger, log, .. } = self;
        guard::run(log, operation, policy, default, || op(&mut *messenger))
    }

    pub fn default_reading(&self) -> f64 {
        self.policy.default_reading
    }

    pub fn write(&mut self, command: &str) -> Checked<()> {
        debug!(command, "write");
        self.guarded("write", (), |m| m.write(command))
    }

    pub fn read(&mut self) -> Checked<String> {
        self.guarded("read", String::new(), |m| m.read())
    }

    pub fn read_raw(&mut self) -> Checked<Bytes> {
        self.guarded("read_raw", Bytes::new(), |m| m.read_raw())
    }

    pub fn query(&mut self, command: &str) -> Checked<String> {
        debug!(command, "query");
        self.guarded("query", String::new(), |m| m.query(command))
    }

    pub fn query_with_delay(&mut self, command: &str, delay: Duration) -> Checked<String> {
        self.guarded("query", String::new(), |m| {
            m.query_with_delay(command, delay)
        })
    }

    pub fn query_float(&mut self, command: &str) -> Checked<f64> {
        let default = self.default_reading();
        self.guarded("query_float", default, |m| m.query_float(command))
    }

    pub fn query_bool(&mut self, command: &str) -> Checked<bool> {
        self.guarded("query_bool", false, |m| m.query_bool(command))
    }

    pub fn query_ascii_values(&mut self, command: &str) -> Checked<Vec<f64>> {
        self.guarded("query_ascii_values", Vec::new(), |m| {
            m.query_ascii_values(command, ',')
        })
    }

    /// Big-endian f32 block, the IEEE-488.2 default.
    pub fn query_binary_values(&mut self, command: &str) -> Checked<Vec<f32>> {
        self.guarded("query_binary_values", Vec::new(), |m| {
            m.query_binary_values(command, true)
        })
    }

    pub fn write_binary_values(&mut self, header: &str, values: &[f32]) -> Checked<()> {
        self.guarded("write_binary_values", (), |m| {
            m.write_binary_values(header, values, true)
        })
    }

    /// Sends `*IDN?` and remembers the answer. `None` when the instrument does
    /// not answer or answers nonsense.
    pub fn identify(&mut self) -> Checked<Option<Identity>> {
        let mut idn = com_cmd::IDN.to_command();
        idn.query();
        let identity = self.guarded("identify", None, |m| {
            m.query(idn.as_str()).and_then(|r| r.parse::<Identity>().map(Some))
        })?;
        if let Some(id) = &identity {
            if self.nickname.is_none() {
                self.log.rename(format!("{} {}", id.manufacturer, id.model));
            }
            info!(instrument = %id, address = %self.address, "identified");
        }
        self.identity = identity.clone();
        Ok(identity)
    }

    pub fn reset(&mut self) -> Checked<bool> {
        self.guarded("reset", false, |m| m.write(com_cmd::RST).map(|_| true))
    }

    pub fn clear(&mut self) -> Checked<bool> {
        self.guarded("clear", false, |m| m.write(com_cmd::CLS).map(|_| true))
    }

    /// Raw `SYST:ERR?` answer.
    pub fn get_error(&mut self) -> Checked<String> {
        let mut cmd = com_cmd::SYST_ERR.to_command();
        cmd.query();
        self.guarded("get_error", String::new(), |m| m.query(cmd.as_str()))
    }

    /// Next entry of the error queue, `None` when it is empty.
    pub fn error_status(&mut self) -> Checked<Option<ScpiError>> {
        let mut cmd = com_cmd::SYST_ERR.to_command();
        cmd.query();
        self.guarded("error_status", None, |m| {
            ScpiError::parse_status(&m.query(cmd.as_str())?)
        })
    }

    pub fn status_byte(&mut self) -> Checked<Option<StatusByte>> {
        let mut cmd = com_cmd::STB.to_command();
        cmd.query();
        self.guarded("status_byte", None, |m| {
            scpi::parse_register(&m.query(cmd.as_str())?).map(|b| Some(StatusByte::new(b)))
        })
    }

    pub fn event_status(&mut self) -> Checked<Option<EventStatusByte>> {
        let mut cmd = com_cmd::ESR.to_command();
        cmd.query();
        self.guarded("event_status", None, |m| {
            scpi::parse_register(&m.query(cmd.as_str())?)
                .map(|b| Some(EventStatusByte::new(b)))
        })
    }

    /// Polls `*OPC?` until it reports completion or `timeout` elapses. Poll
    /// timeouts count as "still busy".
    pub fn wait_for_operation_complete(&mut self, timeout: Duration) -> Checked<bool> {
        let mut cmd = com_cmd::OPC.to_command();
        cmd.query();
        let start = Instant::now();
        let done = self.guarded("wait_for_operation_complete", false, |m| loop {
            match m.query(cmd.as_str()) {
                Ok(r) if scpi::parse_bool(&r).unwrap_or(false) => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e),
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            thread::sleep(OPC_POLL_INTERVAL);
        })?;
        debug!(elapsed = ?start.elapsed(), done, "operation complete wait finished");
        Ok(done)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.messenger.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Checked<()> {
        self.guarded("set_timeout", (), |m| m.set_timeout(timeout))
    }

    /// Runs `f` with a temporary timeout and restores the previous one on every
    /// exit path, unwinding included.
    pub fn with_timeout<T, F>(&mut self, timeout: Duration, f: F) -> T
    where
        F: FnOnce(&mut Self) -> T,
    {
        let previous = self.timeout();
        if let Err(e) = self.set_timeout(timeout) {
            warn!(address = %self.address, ?timeout, "temporary timeout not applied: {}", e);
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        if let Some(previous) = previous {
            if let Err(e) = self.set_timeout(previous) {
                warn!(address = %self.address, ?previous, "timeout not restored: {}", e);
            }
        }
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Releases the link. Safe to call any number of times.
    pub fn close(&mut self) {
        if !self.messenger.is_open() {
            return;
        }
        match self.messenger.close() {
            Ok(()) => info!(instrument = %self.log.instrument(), address = %self.address, "closed"),
            Err(e) => debug!(address = %self.address, "error while closing: {}", e),
        }
    }
}

impl<R: Resource> Drop for Session<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shorthand for drivers that reject an argument outright.
pub(crate) fn reject<T, V: fmt::Display>(parameter: &str, value: V) -> Checked<T> {
    Err(ValidationError::invalid(parameter, value))
}
