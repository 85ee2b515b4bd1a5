use std::time::Duration;

use labinstruments::{
    instruments::{multimeter::Multimeter, ConnectOptions, Queryable, Writable},
    mock::{MockResource, MockResourceManager},
    scpi::Function,
    Error, ValidationError,
};
use rstest::{fixture, rstest};

const KEITHLEY_2000: &str = "KEITHLEY INSTRUMENTS,2000,1234567,1.0";
const KEITHLEY_2110: &str = "Keithley Instruments Inc.,Model 2110,8011234,02.03-03-20";
const DMM4050: &str = "TEKTRONIX,DMM4050,1234567,08/02/10-11:53";
const HP_34401A: &str = "HEWLETT-PACKARD,34401A,0,11-5-2";

struct Bench {
    manager: MockResourceManager,
    mock: MockResource,
}

impl Bench {
    fn open(&mut self) -> Multimeter<MockResource> {
        Multimeter::open(&mut self.manager, &ConnectOptions::new("MOCK::dmm"), None).unwrap()
    }
}

#[fixture]
fn keithley() -> Bench {
    let mut manager = MockResourceManager::new();
    let mock = manager.add("MOCK::dmm", KEITHLEY_2000);
    Bench { manager, mock }
}

#[rstest]
#[case("VDC")]
#[case("DCV")]
#[case("VOLT:DC")]
#[case("volt")]
fn voltage_synonyms_configure_volt(mut keithley: Bench, #[case] name: &str) {
    let mut dmm = keithley.open();
    dmm.set_function("RES").unwrap();
    dmm.set_function(name).unwrap();
    assert_eq!(dmm.get_function().unwrap(), Some(Function::Volt));
    assert!(keithley.mock.received("CONF:VOLT"));
}

#[rstest]
fn unknown_function_is_rejected(mut keithley: Bench) {
    let mut dmm = keithley.open();
    keithley.mock.clear_log();
    let err = dmm.measure("PLASMA").unwrap_err();
    assert_eq!(err, ValidationError::invalid("function", "PLASMA"));
    assert!(keithley.mock.command_log().is_empty());
}

#[rstest]
fn measurements_advance_and_fetch_repeats(mut keithley: Bench) {
    let mut dmm = keithley.open();
    let first = dmm.measure("VOLT").unwrap();
    let second = dmm.measure("VOLT").unwrap();
    assert_ne!(first, second);
    assert_eq!(dmm.fetch().unwrap(), second);
}

#[rstest]
#[case(":conf:volt")]
#[case("CONF:VOLT")]
#[case("  CONF:VOLT  ")]
fn configure_spellings_reach_the_same_state(mut keithley: Bench, #[case] command: &str) {
    let mut dmm = keithley.open();
    dmm.set_function("CURR").unwrap();
    dmm.write(command).unwrap();
    assert_eq!(keithley.mock.state().function, Function::Volt);
    assert_eq!(dmm.query("FUNC?").unwrap(), "\"VOLT\"");
}

#[rstest]
fn keithley_2000_silences_the_beeper_before_measuring(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.measure("VOLT").unwrap();
    let beeper = keithley.mock.position("SYST:BEEP:STAT OFF").unwrap();
    let measure = keithley.mock.position("MEAS:VOLT?").unwrap();
    assert!(beeper < measure);
    assert!(!keithley.mock.state().beeper);
}

#[rstest]
fn keithley_2000_read_disables_continuous_initiation(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.read().unwrap();
    let log = keithley.mock.command_log();
    let cont = log.iter().position(|c| c == "INIT:CONT OFF").unwrap();
    assert_eq!(log[cont + 1], "READ?");
}

#[rstest]
fn range_reads_back_exactly(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.set_range("VOLT", 10.0).unwrap();
    assert_eq!(dmm.get_range("VOLT").unwrap(), 10.0);
    assert!(!dmm.get_auto_range("VOLT").unwrap());
}

#[rstest]
fn autorange_off_reads_back_false(mut keithley: Bench) {
    let mut dmm = keithley.open();
    assert!(dmm.get_auto_range("CURR").unwrap());
    dmm.set_auto_range("CURR", false).unwrap();
    assert!(!dmm.get_auto_range("CURR").unwrap());
}

#[rstest]
fn nplc_is_remembered_per_function(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.set_nplc("VOLT", 1.0).unwrap();
    assert_eq!(dmm.get_nplc("VOLT").unwrap(), 1.0);
    assert_eq!(dmm.get_nplc("RES").unwrap(), 10.0);
    assert!(dmm.set_nplc("VOLT", 500.0).is_err());
}

#[rstest]
fn trigger_and_sample_count(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.setup_trigger("bus", 5).unwrap();
    dmm.set_sample_count(10).unwrap();
    assert!(dmm.initiate().unwrap());
    let state = keithley.mock.state();
    assert_eq!(state.trigger_source, "BUS");
    assert_eq!(state.trigger_count, "5");
    assert_eq!(state.sample_count, 10);
    assert!(state.armed);
}

#[rstest]
fn statistics_over_simulated_readings(mut keithley: Bench) {
    let mut dmm = keithley.open();
    let stats = dmm
        .measure_statistics("VOLT", 3, Duration::ZERO)
        .unwrap()
        .unwrap();
    assert_eq!(stats.samples, 3);
    assert!((stats.min - 1.2341).abs() < 1e-9);
    assert!((stats.max - 1.2343).abs() < 1e-9);
    assert!((stats.mean - 1.2342).abs() < 1e-9);
    assert!(stats.std_dev > 0.0);
}

#[rstest]
fn display_text_is_shown_and_cleared(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.display_text("Hello").unwrap();
    assert_eq!(keithley.mock.state().display_text, "Hello");
    dmm.clear_display().unwrap();
    assert!(keithley.mock.state().display_text.is_empty());
}

#[rstest]
fn punctuated_display_text_leaves_readings_in_step(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.display_text("Ready?").unwrap();
    assert_eq!(keithley.mock.state().display_text, "Ready?");
    let first = dmm.measure("VOLT").unwrap();
    let second = dmm.measure("VOLT").unwrap();
    assert!((first - 1.2341).abs() < 1e-9);
    assert!((second - 1.2342).abs() < 1e-9);
}

#[rstest]
fn display_text_with_a_semicolon_is_one_command(mut keithley: Bench) {
    let mut dmm = keithley.open();
    keithley.mock.clear_log();
    dmm.display_text("A;B").unwrap();
    assert_eq!(keithley.mock.state().display_text, "A;B");
    let log = keithley.mock.command_log();
    assert_eq!(log.iter().filter(|c| c.starts_with("DISP:TEXT")).count(), 1);
}

#[rstest]
fn thermocouple_type_uses_the_model_header(mut keithley: Bench) {
    let mut dmm = keithley.open();
    dmm.set_thermocouple_type("k").unwrap();
    assert!(keithley.mock.received("TEMP:TC:TYPE K"));
    assert_eq!(dmm.get_thermocouple_type().unwrap(), "K");
    assert!(dmm.set_thermocouple_type("Q").is_err());
}

#[rstest]
fn filter_is_bounded(mut keithley: Bench) {
    let mut dmm = keithley.open();
    assert!(dmm.set_filter("MOV", 10, true).is_ok());
    assert_eq!(
        dmm.set_filter("MOV", 101, true).unwrap_err(),
        ValidationError::invalid("count", 101)
    );
}

#[test]
fn keithley_2110_temperature_units() {
    let mut manager = MockResourceManager::new();
    let mock = manager.add("MOCK::dmm", KEITHLEY_2110);
    let mut dmm = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None).unwrap();
    assert_eq!(dmm.model().name, "Keithley 2110");
    dmm.set_temperature_unit("F").unwrap();
    assert!(mock.received("UNIT:TEMP FAR"));
    dmm.set_thermocouple_type("J").unwrap();
    assert!(mock.received("TC:TYPE J"));
}

#[test]
fn dmm4050_dual_display() {
    let mut manager = MockResourceManager::new();
    let mock = manager.add("MOCK::dmm", DMM4050);
    let mut dmm = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None).unwrap();
    dmm.set_function("VOLT").unwrap();
    dmm.set_dual_display(Some("CURR")).unwrap();
    assert!(mock.state().dual_display);
    let (primary, secondary) = dmm.read_dual_display().unwrap();
    assert!((primary - 1.2341).abs() < 1e-9);
    assert!((secondary - 0.0568).abs() < 1e-9);
    dmm.set_reference_junction("SIM", Some(23.0)).unwrap();
    assert!(mock.received("TEMP:TRAN:TC:RJUN:SIM 23.0"));
    assert!(dmm.set_reference_junction("SIM", Some(80.0)).is_err());
}

#[test]
fn model_specific_operations_are_refused_elsewhere() {
    let mut manager = MockResourceManager::new();
    manager.add("MOCK::dmm", HP_34401A);
    let mut dmm = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None).unwrap();
    assert_eq!(
        dmm.set_filter("REP", 5, true).unwrap_err(),
        ValidationError::unsupported("set_filter", "HP 34401A")
    );
    assert!(dmm.set_dual_display(Some("CURR")).is_err());
}

#[test]
fn override_skips_identification() {
    let mut manager = MockResourceManager::new();
    let mock = manager.add("MOCK::dmm", "ACME,Bench Meter,1,1");
    let dmm = Multimeter::open(
        &mut manager,
        &ConnectOptions::new("MOCK::dmm").identify(false),
        Some("keithley-2000"),
    )
    .unwrap();
    assert_eq!(dmm.model().name, "Keithley 2000");
    assert!(!mock.received("*IDN?"));
}

#[test]
fn unknown_identity_is_unsupported() {
    let mut manager = MockResourceManager::new();
    manager.add("MOCK::dmm", "ACME,Bench Meter,1,1");
    let err = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None)
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnsupportedModel(_)));
}

#[test]
fn unknown_override_is_unsupported() {
    let mut manager = MockResourceManager::new();
    let err = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), Some("Fluke 8846A"))
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnsupportedModel(name) if name == "Fluke 8846A"));
}

#[test]
fn silent_instrument_is_unidentified() {
    let mut manager = MockResourceManager::new();
    manager.add("MOCK::dmm", KEITHLEY_2000).set_silent(true);
    let err = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None)
        .err()
        .unwrap();
    assert!(matches!(err, Error::Unidentified(address) if address == "MOCK::dmm"));
}

#[test]
fn unreachable_address_fails_to_open() {
    let mut manager = MockResourceManager::new();
    manager.unreachable("MOCK::dmm");
    let err = Multimeter::open(&mut manager, &ConnectOptions::new("MOCK::dmm"), None)
        .err()
        .unwrap();
    assert!(err.transport().is_some());
}
