use std::time::Duration;

use labinstruments::{
    instruments::{temperature_sensor::TemperatureSensor, ConnectOptions, Policy},
    mock::{MockResource, MockResourceManager},
    protocols::TransportError,
    ValidationError,
};
use rstest::rstest;
use tracing_test::traced_test;

fn bench(idn: &str) -> (MockResourceManager, MockResource) {
    let mut manager = MockResourceManager::new();
    let mock = manager.add("MOCK::sensor", idn);
    (manager, mock)
}

fn options() -> ConnectOptions {
    ConnectOptions::new("MOCK::sensor").policy(Policy::with_retries(0, Duration::from_millis(1)))
}

#[traced_test]
#[test]
fn unknown_sensors_read_with_fetch() {
    let (mut manager, mock) = bench("ACME,T-100,1,1.0");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    assert_eq!(sensor.model().name, "Thermometer");
    assert!(logs_contain("sensor type unknown"));
    assert_eq!(sensor.get_temperature(1).unwrap(), 1.234);
    assert_eq!(mock.last_command().as_deref(), Some("FETCH?"));
    assert_eq!(
        sensor.get_temperature(2).unwrap_err(),
        ValidationError::invalid("channel", 2)
    );
    assert_eq!(
        sensor.set_type(1, "K").unwrap_err(),
        ValidationError::unsupported("set_type", "Thermometer")
    );
}

#[test]
fn thermocouple_channels_and_types() {
    let (mut manager, mock) = bench("ACME,THERMOCOUPLE READER,1,1.0");
    mock.respond("MEAS?1", "23.5");
    mock.respond("MEAS?2", "24.0");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    assert_eq!(sensor.model().name, "Thermocouple");

    sensor.set_type(2, "k").unwrap();
    assert_eq!(mock.last_command().as_deref(), Some("TTYP 2,K"));
    assert!(sensor.set_type(2, "Q").is_err());
    assert!(sensor.set_type(9, "J").is_err());

    let all = sensor.get_all_temperatures(&[1, 2]).unwrap();
    assert_eq!(all.get(&1), Some(&23.5));
    assert_eq!(all.get(&2), Some(&24.0));
    assert!(sensor.get_all_temperatures(&[1, 9]).is_err());
}

#[rstest]
#[case("C", "UNIT:TEMP C")]
#[case("celsius", "UNIT:TEMP C")]
#[case("Far", "UNIT:TEMP F")]
#[case("kelvin", "UNIT:TEMP K")]
fn units_accept_their_spellings(#[case] unit: &str, #[case] expected: &str) {
    let (mut manager, mock) = bench("ACME,THERMOCOUPLE READER,1,1.0");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    sensor.set_units(unit).unwrap();
    assert_eq!(mock.last_command().as_deref(), Some(expected));
}

#[test]
fn unknown_units_are_rejected() {
    let (mut manager, mock) = bench("ACME,THERMOCOUPLE READER,1,1.0");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    mock.clear_log();
    assert_eq!(
        sensor.set_units("rankine").unwrap_err(),
        ValidationError::invalid("unit", "rankine")
    );
    assert!(mock.command_log().is_empty());
}

#[test]
fn measuring_thermometer_retries_a_lost_read() {
    let (mut manager, mock) = bench("unused");
    mock.respond("MEAS?3", "-12.25");
    let mut sensor = TemperatureSensor::open(
        &mut manager,
        &options().identify(false),
        Some("Measuring thermometer"),
    )
    .unwrap();
    mock.fail_next(TransportError::Timeout, 1);
    assert_eq!(sensor.get_temperature(3).unwrap(), -12.25);
}

#[test]
fn thermocouple_reads_once() {
    let (mut manager, mock) = bench("ACME,THERMOCOUPLE READER,1,1.0");
    mock.respond("MEAS?1", "23.5");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    mock.fail_next(TransportError::Timeout, 1);
    assert!(sensor.get_temperature(1).unwrap().is_nan());
    assert_eq!(sensor.get_temperature(1).unwrap(), 23.5);
}

#[traced_test]
#[test]
fn monitoring_collects_timed_readings() {
    let (mut manager, mock) = bench("ACME,THERMOCOUPLE READER,1,1.0");
    mock.respond("MEAS?4", "85.1");
    let mut sensor = TemperatureSensor::open(&mut manager, &options(), None).unwrap();
    let readings = sensor
        .monitor_temperature(4, Duration::from_millis(30), Duration::from_millis(10))
        .unwrap();
    assert!(!readings.is_empty());
    assert!(readings.iter().all(|(_, t)| *t == 85.1));
    assert!(readings.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(logs_contain("monitoring temperature"));
    assert!(sensor
        .monitor_temperature(0, Duration::ZERO, Duration::ZERO)
        .is_err());
}

#[test]
fn unnamed_sensor_model_is_an_error() {
    let (mut manager, _mock) = bench("unused");
    assert!(TemperatureSensor::open(&mut manager, &options(), Some("pyrometer")).is_err());
}
