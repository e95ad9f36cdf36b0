//! DIN-rail energy meters.
//!
//! All three families report on the Tuya cluster of endpoint 1 and fan the
//! readings out to Metering (0x0702) and Electrical Measurement (0x0B04).
//! The relay state travels over the `switch` bus to an On/Off cluster, and
//! the Zemismart three-phase meter additionally publishes per-phase telemetry
//! to clamp endpoints 10/20/30.

use crate::builder::{DEFAULT_ENDPOINT, QuirkBuilder};
use crate::cluster::{BusSubscription, ClusterSpec, attr, id};
use crate::definition::{ClusterBinding, DEVICE_TYPE_METER_INTERFACE, DatapointSpec, EndpointComposition};
use crate::error::Result;
use crate::protocol::DataType;
use crate::registry::QuirkRegistry;
use crate::transform::{BitSlice, Scale, TransformRule};

pub const SWITCH_BUS: &str = "switch";
pub const SWITCH_EVENT: &str = "switch_event";

pub const POWER_TOTAL_BUS: &str = "power/abc";
pub const POWER_BUSES: [&str; 3] = ["power/a", "power/b", "power/c"];
pub const ENERGY_TOTAL_BUS: &str = "energy/abc";
pub const ENERGY_BUSES: [&str; 3] = ["energy/a", "energy/b", "energy/c"];

pub const POWER_REPORTED: &str = "power_reported";
pub const VOLTAGE_REPORTED: &str = "voltage_reported";
pub const CURRENT_REPORTED: &str = "current_reported";
pub const ENERGY_REPORTED: &str = "energy_reported";

/// Clamp endpoints of the Zemismart meter, phase A to C.
pub const CLAMP_ENDPOINTS: [u8; 3] = [10, 20, 30];

/// Hiking exposes its relay on a separate endpoint.
const HIKING_SWITCH_ENDPOINT: u8 = 16;

fn value(dp_id: u8, name: &str) -> DatapointSpec {
    DatapointSpec::new(dp_id, name, DataType::Value)
}

fn raw(dp_id: u8, name: &str) -> DatapointSpec {
    DatapointSpec::new(dp_id, name, DataType::Raw)
}

fn switch(dp_id: u8) -> DatapointSpec {
    DatapointSpec::new(dp_id, "switch", DataType::Bool)
}

fn metering(attribute: u16) -> Vec<ClusterBinding> {
    vec![ClusterBinding::attribute(DEFAULT_ENDPOINT, id::METERING, attribute)]
}

fn electrical(attribute: u16) -> Vec<ClusterBinding> {
    vec![ClusterBinding::attribute(
        DEFAULT_ENDPOINT,
        id::ELECTRICAL_MEASUREMENT,
        attribute,
    )]
}

fn publish(channel: &str, event: &str) -> Vec<ClusterBinding> {
    vec![ClusterBinding::bus(channel, event)]
}

/// On/Off cluster driven by the relay datapoint through the switch bus.
fn relay() -> ClusterSpec {
    ClusterSpec::on_off().subscribe(BusSubscription::new(SWITCH_BUS).on(SWITCH_EVENT, attr::ON_OFF))
}

fn watt_metering() -> ClusterSpec {
    ClusterSpec::metering().constant(attr::UNIT_OF_MEASURE, 0u8)
}

/// Electrical Measurement with current in mA and frequency in 1/100 Hz.
fn single_phase_measurement() -> ClusterSpec {
    ClusterSpec::electrical_measurement()
        .constant(attr::AC_CURRENT_MULTIPLIER, 1u16)
        .constant(attr::AC_CURRENT_DIVISOR, 1000u16)
        .constant(attr::AC_FREQUENCY_MULTIPLIER, 1u16)
        .constant(attr::AC_FREQUENCY_DIVISOR, 100u16)
}

fn meter(manufacturer: &str, source: &str) -> QuirkBuilder {
    QuirkBuilder::new(manufacturer, "TS0601")
        .source(source)
        .adds(ClusterSpec::groups())
        .adds(ClusterSpec::scenes())
}

/// `_TZE200_byzdayie` / `_TZE200_ewxhg6o9` single-phase meter with relay.
pub fn tuya_power_meter() -> QuirkBuilder {
    meter("_TZE200_byzdayie", "din_power::tuya_power_meter")
        .applies_to("_TZE200_ewxhg6o9", "TS0601")
        .with_bus(SWITCH_BUS)
        .adds(single_phase_measurement())
        .adds(watt_metering())
        .adds(relay())
        .tuya_dp(
            value(0x11, "energy"),
            TransformRule::linear(100),
            metering(attr::CURRENT_SUMM_DELIVERED),
        )
        .tuya_dp(
            value(0x12, "current"),
            TransformRule::Identity,
            electrical(attr::RMS_CURRENT),
        )
        .tuya_dp(
            value(0x13, "power"),
            TransformRule::linear(10),
            electrical(attr::ACTIVE_POWER),
        )
        .tuya_dp(
            value(0x14, "voltage"),
            TransformRule::linear(10),
            electrical(attr::RMS_VOLTAGE),
        )
        .tuya_dp(
            value(0x15, "power_factor"),
            TransformRule::linear(10),
            electrical(attr::POWER_FACTOR),
        )
        .tuya_dp(
            value(0x16, "ac_frequency"),
            TransformRule::linear(10),
            electrical(attr::AC_FREQUENCY),
        )
        .tuya_dp(
            switch(0x01),
            TransformRule::Identity,
            publish(SWITCH_BUS, SWITCH_EVENT),
        )
}

/// Hiking DDS238-2 (`_TZE200_bkkmqmyo`). Voltage and current share one
/// 32-bit datapoint: current in the high half, decivolts in the low half.
pub fn hiking_power_meter() -> QuirkBuilder {
    let voltage_current = TransformRule::BitField {
        fields: vec![
            BitSlice::new(16, 16, Scale::UNIT),
            BitSlice::new(0, 16, Scale::divide(10)),
        ],
    };

    meter("_TZE200_bkkmqmyo", "din_power::hiking_power_meter")
        .with_bus(SWITCH_BUS)
        .adds(watt_metering())
        .adds(single_phase_measurement())
        .adds_endpoint(EndpointComposition::new(HIKING_SWITCH_ENDPOINT).input(relay()))
        .tuya_dp(
            switch(16),
            TransformRule::Identity,
            publish(SWITCH_BUS, SWITCH_EVENT),
        )
        .tuya_dp(
            value(1, "energy_delivered"),
            TransformRule::linear(100),
            metering(attr::CURRENT_SUMM_DELIVERED),
        )
        .tuya_dp(
            value(102, "energy_received"),
            TransformRule::linear(100),
            metering(attr::CURRENT_SUMM_RECEIVED),
        )
        .tuya_dp(
            raw(6, "voltage_current"),
            voltage_current,
            vec![
                ClusterBinding::attribute(DEFAULT_ENDPOINT, id::ELECTRICAL_MEASUREMENT, attr::RMS_CURRENT),
                ClusterBinding::attribute(DEFAULT_ENDPOINT, id::ELECTRICAL_MEASUREMENT, attr::RMS_VOLTAGE)
                    .field(1),
            ],
        )
        .tuya_dp(
            value(103, "power"),
            TransformRule::Identity,
            electrical(attr::ACTIVE_POWER),
        )
        .tuya_dp(
            value(105, "frequency"),
            TransformRule::Identity,
            electrical(attr::AC_FREQUENCY),
        )
        .tuya_dp(
            value(109, "total_reactive_energy"),
            TransformRule::Identity,
            electrical(attr::TOTAL_REACTIVE_POWER),
        )
        .tuya_dp(
            value(110, "reactive_power"),
            TransformRule::Identity,
            electrical(attr::REACTIVE_POWER),
        )
        .tuya_dp(
            value(111, "power_factor"),
            TransformRule::linear(10),
            electrical(attr::POWER_FACTOR),
        )
}

/// Bindings of one VCP datapoint: the three phase attributes on endpoint 1,
/// then power, voltage and current events on the phase's clamp bus.
fn vcp_bindings() -> Vec<ClusterBinding> {
    const POWER: [u16; 3] = [attr::ACTIVE_POWER, attr::ACTIVE_POWER_PH_B, attr::ACTIVE_POWER_PH_C];
    const VOLTAGE: [u16; 3] = [attr::RMS_VOLTAGE, attr::RMS_VOLTAGE_PH_B, attr::RMS_VOLTAGE_PH_C];
    const CURRENT: [u16; 3] = [attr::RMS_CURRENT, attr::RMS_CURRENT_PH_B, attr::RMS_CURRENT_PH_C];

    let em = id::ELECTRICAL_MEASUREMENT;
    vec![
        ClusterBinding::phase_attribute(DEFAULT_ENDPOINT, em, POWER),
        ClusterBinding::phase_attribute(DEFAULT_ENDPOINT, em, VOLTAGE).field(1),
        ClusterBinding::phase_attribute(DEFAULT_ENDPOINT, em, CURRENT).field(2),
        ClusterBinding::phase_bus(POWER_BUSES, POWER_REPORTED),
        ClusterBinding::phase_bus(POWER_BUSES, VOLTAGE_REPORTED).field(1),
        ClusterBinding::phase_bus(POWER_BUSES, CURRENT_REPORTED).field(2),
    ]
}

/// Per-phase clamp endpoint fed by one power bus.
fn clamp_endpoint(endpoint: u8, channel: &str) -> EndpointComposition {
    let measurement = ClusterSpec::electrical_measurement()
        .constant(attr::AC_CURRENT_DIVISOR, 1000u16)
        .constant(attr::AC_VOLTAGE_DIVISOR, 10u16)
        .subscribe(
            BusSubscription::new(channel)
                .on(POWER_REPORTED, attr::ACTIVE_POWER)
                .on(VOLTAGE_REPORTED, attr::RMS_VOLTAGE)
                .on(CURRENT_REPORTED, attr::RMS_CURRENT),
        );
    EndpointComposition::new(endpoint)
        .device_type(DEVICE_TYPE_METER_INTERFACE)
        .input(measurement)
}

/// Zemismart SPM02 (`_TZE200_v9hkz2yn`), up to three clamps.
pub fn zemismart_power_meter() -> QuirkBuilder {
    let mut builder = meter("_TZE200_v9hkz2yn", "din_power::zemismart_power_meter")
        .adds(watt_metering().constant(attr::METERING_DIVISOR, 100u16))
        .adds(
            ClusterSpec::electrical_measurement()
                .constant(attr::AC_VOLTAGE_MULTIPLIER, 1u16)
                .constant(attr::AC_VOLTAGE_DIVISOR, 10u16)
                .constant(attr::AC_CURRENT_MULTIPLIER, 1u16)
                .constant(attr::AC_CURRENT_DIVISOR, 1000u16),
        )
        .with_bus(POWER_TOTAL_BUS)
        .with_bus(ENERGY_TOTAL_BUS);

    for ((endpoint, power), energy) in CLAMP_ENDPOINTS.into_iter().zip(POWER_BUSES).zip(ENERGY_BUSES) {
        builder = builder
            .with_bus(power)
            .with_bus(energy)
            .adds_endpoint(clamp_endpoint(endpoint, power));
    }

    builder
        .tuya_dp(
            value(2, "energy"),
            TransformRule::Identity,
            metering(attr::CURRENT_SUMM_DELIVERED),
        )
        .tuya_dp(
            value(1, "reverse_energy"),
            TransformRule::Identity,
            metering(attr::CURRENT_SUMM_RECEIVED),
        )
        .tuya_dp(raw(6, "vcp_raw"), TransformRule::phase_vcp(0), vcp_bindings())
        .tuya_dp(raw(7, "vcp_p2_raw"), TransformRule::phase_vcp(1), vcp_bindings())
        .tuya_dp(raw(8, "vcp_p3_raw"), TransformRule::phase_vcp(2), vcp_bindings())
        .tuya_dp(
            value(101, "frequency"),
            TransformRule::Identity,
            electrical(attr::AC_FREQUENCY),
        )
        .tuya_dp(
            value(0x11, "energy_total"),
            TransformRule::linear(100),
            publish(ENERGY_TOTAL_BUS, ENERGY_REPORTED),
        )
        .tuya_dp(
            value(0x15, "energy_a"),
            TransformRule::linear(100),
            publish(ENERGY_BUSES[0], ENERGY_REPORTED),
        )
        .tuya_dp(
            value(0x16, "energy_b"),
            TransformRule::linear(100),
            publish(ENERGY_BUSES[1], ENERGY_REPORTED),
        )
        .tuya_dp(
            value(0x17, "energy_c"),
            TransformRule::linear(100),
            publish(ENERGY_BUSES[2], ENERGY_REPORTED),
        )
}

pub fn register(registry: &mut QuirkRegistry) -> Result<()> {
    tuya_power_meter().add_to_registry(registry)?;
    hiking_power_meter().add_to_registry(registry)?;
    zemismart_power_meter().add_to_registry(registry)?;
    Ok(())
}
