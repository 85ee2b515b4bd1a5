use std::{io::Write, time::Duration};

use labinstruments::{
    config::{BenchConfig, InstrumentConfig},
    instruments::{multimeter::Multimeter, thermonics::TemperatureController},
    mock::MockResourceManager,
    Error,
};
use tempfile::NamedTempFile;

const BENCH: &str = r#"
[instruments.dmm]
address = "MOCK::dmm"
model = "Keithley 2000"
timeout = "3s"

[instruments.chamber]
address = "MOCK::chamber"
model = "T-2500SE"
identify = false
serial = { baud_rate = 19200 }
policy = { retries = 2, retry_delay = "250ms" }
"#;

fn file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn bench_file_drives_the_factories() {
    let bench = BenchConfig::load(file(BENCH).path()).unwrap();
    assert_eq!(bench.instruments.len(), 2);

    let mut manager = MockResourceManager::new();
    let dmm_config = bench.instrument("dmm").unwrap();
    let dmm = Multimeter::open(
        &mut manager,
        &dmm_config.connect_options(),
        dmm_config.model.as_deref(),
    )
    .unwrap();
    assert_eq!(dmm.model().name, "Keithley 2000");
    let mock = manager.resource("MOCK::dmm").unwrap();
    assert_eq!(mock.state().timeout, Duration::from_secs(3));

    let chamber_config = bench.instrument("chamber").unwrap();
    assert_eq!(chamber_config.serial.baud_rate, 19200);
    assert_eq!(chamber_config.policy.retries, 2);
    let chamber = TemperatureController::open(
        &mut manager,
        &(&chamber_config).into(),
        chamber_config.model.as_deref(),
    )
    .unwrap();
    assert_eq!(chamber.model().name, "Thermonics T-2500SE");
    assert!(!manager.resource("MOCK::chamber").unwrap().received("*IDN?"));
}

#[test]
fn single_instrument_file() {
    let config = InstrumentConfig::load(
        file("address = \"TCPIP0::192.168.1.20::5025::SOCKET\"\nnickname = \"psu\"\n").path(),
    )
    .unwrap();
    assert_eq!(config.nickname.as_deref(), Some("psu"));
    assert!(config.identify);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = BenchConfig::load(dir.path().join("bench.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(message) if message.contains("bench.toml")));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = BenchConfig::load(file("[instruments.dmm\naddress = 1").path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
