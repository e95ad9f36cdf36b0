mod common;

use common::{RecordingListener, device, report, value_report};
use std::sync::Arc;
use tuya_quirks::cluster::{attr, datapoint_attribute, id};
use tuya_quirks::definition::ClusterBinding;
use tuya_quirks::quirks::din_power::{
    CLAMP_ENDPOINTS, ENERGY_BUSES, ENERGY_TOTAL_BUS, POWER_BUSES, POWER_TOTAL_BUS,
};
use tuya_quirks::{
    AttrValue, ClusterSpec, DatapointSpec, DataType, DeviceIdentity, DeviceOptions, QuirkBuilder,
    QuirkError, QuirkRegistry, QuirkedDevice, TransformRule,
};

fn electrical(device: &QuirkedDevice, endpoint: u8, attribute: u16) -> Option<AttrValue> {
    device
        .cluster(endpoint, id::ELECTRICAL_MEASUREMENT)
        .and_then(|c| c.get(attribute))
}

fn metering(device: &QuirkedDevice, attribute: u16) -> Option<AttrValue> {
    device.cluster(1, id::METERING).and_then(|c| c.get(attribute))
}

fn vcp_payload() -> Vec<u8> {
    // 100 W, 1000 mA, 230 V
    vec![0x64, 0x00, 0x00, 0xE8, 0x03, 0x00, 0xE6, 0x00]
}

#[test]
fn tuya_meter_scales_readings() {
    let dev = device("_TZE200_byzdayie");
    let cases = [
        (0x12, 1000, attr::RMS_CURRENT, 1000),
        (0x13, 2000, attr::ACTIVE_POWER, 200),
        (0x14, 2300, attr::RMS_VOLTAGE, 230),
        (0x15, 1500, attr::POWER_FACTOR, 150),
        (0x16, 4500, attr::AC_FREQUENCY, 450),
    ];
    for (dp, raw, attribute, expected) in cases {
        let outcome = dev.handle_datapoint_report(&value_report(dp, raw)).unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.dispatched[0].bindings_fired(), 1);
        assert_eq!(electrical(&dev, 1, attribute), Some(AttrValue::Int(expected)), "dp {}", dp);
    }

    dev.handle_datapoint_report(&value_report(0x11, 10000)).unwrap();
    assert_eq!(metering(&dev, attr::CURRENT_SUMM_DELIVERED), Some(AttrValue::Int(100)));
}

#[test]
fn tuya_meter_keeps_raw_mirror_and_constants() {
    let dev = device("_TZE200_ewxhg6o9");
    dev.handle_datapoint_report(&value_report(0x11, 12345)).unwrap();

    assert_eq!(
        metering(&dev, attr::CURRENT_SUMM_DELIVERED),
        Some(AttrValue::Float(123.45))
    );
    assert_eq!(
        dev.manufacturer_cluster().get(datapoint_attribute(0x11)),
        Some(AttrValue::Int(12345))
    );
    assert_eq!(electrical(&dev, 1, attr::AC_CURRENT_DIVISOR), Some(AttrValue::Int(1000)));
    assert_eq!(electrical(&dev, 1, attr::AC_FREQUENCY_DIVISOR), Some(AttrValue::Int(100)));
    assert_eq!(metering(&dev, attr::UNIT_OF_MEASURE), Some(AttrValue::Int(0)));
}

#[test]
fn tuya_meter_switch_goes_through_bus() {
    let dev = device("_TZE200_byzdayie");
    let outcome = dev.handle_datapoint_report(&report(0x01, 0x01, &[0x01])).unwrap();

    assert_eq!(outcome.dispatched[0].bindings_fired(), 1);
    assert_eq!(
        dev.cluster(1, id::ON_OFF).unwrap().get(attr::ON_OFF),
        Some(AttrValue::Bool(true))
    );
}

#[test]
fn unknown_datapoint_fires_nothing() {
    let dev = device("_TZE200_byzdayie");
    let outcome = dev.handle_datapoint_report(&value_report(0x30, 1000)).unwrap();

    assert_eq!(outcome.unknown().collect::<Vec<_>>(), vec![0x30]);
    assert_eq!(outcome.updates().count(), 0);
    assert!(dev.manufacturer_cluster().unknown_datapoint(0x30).is_some());
    assert_eq!(electrical(&dev, 1, attr::RMS_CURRENT), None);
}

#[test]
fn hiking_splits_voltage_and_current() {
    let dev = device("_TZE200_bkkmqmyo");
    let packed: u32 = (1000 << 16) | 2300;
    let outcome = dev
        .handle_datapoint_report(&report(6, 0x00, &packed.to_be_bytes()))
        .unwrap();

    assert_eq!(outcome.dispatched[0].bindings_fired(), 2);
    assert_eq!(electrical(&dev, 1, attr::RMS_CURRENT), Some(AttrValue::Int(1000)));
    assert_eq!(electrical(&dev, 1, attr::RMS_VOLTAGE), Some(AttrValue::Int(230)));
}

#[test]
fn hiking_power_factor_and_energy() {
    let dev = device("_TZE200_bkkmqmyo");
    dev.handle_datapoint_report(&value_report(111, 950)).unwrap();
    dev.handle_datapoint_report(&value_report(1, 2500)).unwrap();
    dev.handle_datapoint_report(&value_report(102, 300)).unwrap();

    assert_eq!(electrical(&dev, 1, attr::POWER_FACTOR), Some(AttrValue::Int(95)));
    assert_eq!(metering(&dev, attr::CURRENT_SUMM_DELIVERED), Some(AttrValue::Int(25)));
    assert_eq!(metering(&dev, attr::CURRENT_SUMM_RECEIVED), Some(AttrValue::Int(3)));
}

#[test]
fn hiking_switch_lands_on_endpoint_16() {
    let dev = device("_TZE200_bkkmqmyo");
    dev.handle_datapoint_report(&report(16, 0x01, &[0x01])).unwrap();

    assert_eq!(
        dev.cluster(16, id::ON_OFF).unwrap().get(attr::ON_OFF),
        Some(AttrValue::Bool(true))
    );
    assert!(dev.cluster(1, id::ON_OFF).is_none());
}

#[test]
fn zemismart_declares_every_bus() {
    let dev = device("_TZE200_v9hkz2yn");
    for channel in POWER_BUSES
        .iter()
        .chain(ENERGY_BUSES.iter())
        .chain([POWER_TOTAL_BUS, ENERGY_TOTAL_BUS].iter())
    {
        assert!(dev.bus(channel).is_some(), "missing bus {}", channel);
    }
    assert_eq!(dev.endpoint_ids(), vec![1, 10, 20, 30]);
}

#[test]
fn zemismart_vcp_publishes_three_events_per_phase() {
    let dev = device("_TZE200_v9hkz2yn");

    for (phase, dp) in [6u8, 7, 8].into_iter().enumerate() {
        let listener = Arc::new(RecordingListener::default());
        dev.bus(POWER_BUSES[phase]).unwrap().subscribe(listener.clone()).unwrap();

        let outcome = dev.handle_datapoint_report(&report(dp, 0x00, &vcp_payload())).unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.dispatched[0].bindings_fired(), 6);

        assert_eq!(
            listener.events(),
            vec![
                ("power_reported".to_string(), AttrValue::Int(100)),
                ("voltage_reported".to_string(), AttrValue::Int(230)),
                ("current_reported".to_string(), AttrValue::Int(1000)),
            ]
        );

        let clamp = CLAMP_ENDPOINTS[phase];
        assert_eq!(electrical(&dev, clamp, attr::ACTIVE_POWER), Some(AttrValue::Int(100)));
        assert_eq!(electrical(&dev, clamp, attr::RMS_VOLTAGE), Some(AttrValue::Int(230)));
        assert_eq!(electrical(&dev, clamp, attr::RMS_CURRENT), Some(AttrValue::Int(1000)));
        assert_eq!(electrical(&dev, clamp, attr::AC_CURRENT_DIVISOR), Some(AttrValue::Int(1000)));
    }

    assert_eq!(electrical(&dev, 1, attr::ACTIVE_POWER), Some(AttrValue::Int(100)));
    assert_eq!(electrical(&dev, 1, attr::RMS_VOLTAGE_PH_B), Some(AttrValue::Int(230)));
    assert_eq!(electrical(&dev, 1, attr::RMS_CURRENT_PH_C), Some(AttrValue::Int(1000)));
}

#[test]
fn zemismart_phase_a_does_not_touch_other_clamps() {
    let dev = device("_TZE200_v9hkz2yn");
    dev.handle_datapoint_report(&report(6, 0x00, &vcp_payload())).unwrap();

    assert_eq!(electrical(&dev, 10, attr::ACTIVE_POWER), Some(AttrValue::Int(100)));
    assert_eq!(electrical(&dev, 20, attr::ACTIVE_POWER), None);
    assert_eq!(electrical(&dev, 30, attr::ACTIVE_POWER), None);
    assert_eq!(electrical(&dev, 1, attr::ACTIVE_POWER_PH_B), None);
}

#[test]
fn zemismart_short_vcp_payload_is_rejected() {
    let dev = device("_TZE200_v9hkz2yn");
    let outcome = dev.handle_datapoint_report(&report(6, 0x00, &[0x64, 0x00])).unwrap();

    assert_eq!(outcome.failed.len(), 1);
    assert!(matches!(outcome.failed[0].1, QuirkError::InvalidArgument(_)));
    assert_eq!(electrical(&dev, 10, attr::ACTIVE_POWER), None);
    assert_eq!(dev.manufacturer_cluster().get(datapoint_attribute(6)), None);
}

#[test]
fn zemismart_energy_buses() {
    let dev = device("_TZE200_v9hkz2yn");
    let total = Arc::new(RecordingListener::default());
    dev.bus(ENERGY_TOTAL_BUS).unwrap().subscribe(total.clone()).unwrap();

    dev.handle_datapoint_report(&value_report(0x11, 10000)).unwrap();
    assert_eq!(
        total.events(),
        vec![("energy_reported".to_string(), AttrValue::Int(100))]
    );

    for (dp, channel) in [0x15u8, 0x16, 0x17].into_iter().zip(ENERGY_BUSES) {
        let listener = Arc::new(RecordingListener::default());
        dev.bus(channel).unwrap().subscribe(listener.clone()).unwrap();
        dev.handle_datapoint_report(&value_report(dp, 5000)).unwrap();
        assert_eq!(
            listener.events(),
            vec![("energy_reported".to_string(), AttrValue::Int(50))]
        );
    }
}

#[test]
fn zemismart_energy_totals_are_raw() {
    let dev = device("_TZE200_v9hkz2yn");
    dev.handle_datapoint_report(&value_report(2, 4321)).unwrap();
    dev.handle_datapoint_report(&value_report(1, 12)).unwrap();

    assert_eq!(metering(&dev, attr::CURRENT_SUMM_DELIVERED), Some(AttrValue::Int(4321)));
    assert_eq!(metering(&dev, attr::CURRENT_SUMM_RECEIVED), Some(AttrValue::Int(12)));
    assert_eq!(metering(&dev, attr::METERING_DIVISOR), Some(AttrValue::Int(100)));
}

#[test]
fn invalid_phase_is_reported_without_side_effects() {
    common::init_logging();
    let definition = QuirkBuilder::new("_TZE200_badphase", "TS0601")
        .adds(ClusterSpec::electrical_measurement())
        .tuya_dp(
            DatapointSpec::new(6, "vcp_raw", DataType::Raw),
            TransformRule::phase_vcp(3),
            vec![ClusterBinding::phase_attribute(
                1,
                id::ELECTRICAL_MEASUREMENT,
                [attr::ACTIVE_POWER, attr::ACTIVE_POWER_PH_B, attr::ACTIVE_POWER_PH_C],
            )],
        )
        .build()
        .unwrap();

    let mut registry = QuirkRegistry::new();
    registry.register(definition).unwrap();
    let dev = registry
        .create_device(DeviceIdentity::new("_TZE200_badphase", "TS0601"), DeviceOptions::default())
        .unwrap();

    let outcome = dev.handle_datapoint_report(&report(6, 0x00, &[0; 8])).unwrap();
    assert_eq!(outcome.failed.len(), 1);
    let (dp, err) = &outcome.failed[0];
    assert_eq!(*dp, 6);
    assert!(
        err.to_string().contains("Invalid phase 3. Phase must be 0, 1, or 2."),
        "{}",
        err
    );
    assert_eq!(electrical(&dev, 1, attr::ACTIVE_POWER), None);
    assert_eq!(dev.manufacturer_cluster().get(datapoint_attribute(6)), None);
}
