//! Temperature/humidity, soil and contact sensors built on the Tuya MCU.

use crate::builder::{BatteryInfo, EntityOptions, QuirkBuilder};
use crate::cluster::{ClusterSpec, attr};
use crate::definition::EntityPlatform;
use crate::error::Result;
use crate::protocol::DataType;
use crate::registry::QuirkRegistry;
use crate::transform::{Scale, TransformRule};
use std::collections::BTreeMap;

const TEMP_UNIT: [(u8, &str); 2] = [(0, "Celsius"), (1, "Fahrenheit")];
const TEMP_HUMI_ALARM: [(u8, &str); 3] = [(0, "LowerAlarm"), (1, "UpperAlarm"), (2, "Canceled")];

/// Decidegrees where anything past 0x2000 wrapped around 0xFFFF.
///
/// Some firmwares report negative temperatures this way instead of as a
/// proper signed value. 0x2000 itself is still a positive reading.
pub fn wrapped_temperature() -> TransformRule {
    TransformRule::signed(0x2001, 0xFFFF, Scale::multiply(10))
}

fn wrapped_temperature_sensor(manufacturer: &str, source: &str) -> QuirkBuilder {
    QuirkBuilder::new(manufacturer, "TS0601")
        .source(source)
        .tuya_temperature_with(1, wrapped_temperature())
}

/// `_TZE200_bjawzodf` family, humidity in tenths of a percent.
pub fn wrapped_th_decihumidity() -> QuirkBuilder {
    wrapped_temperature_sensor("_TZE200_bjawzodf", "sensor::wrapped_th_decihumidity")
        .applies_to("_TZE200_zl1kmjqx", "TS0601")
        .tuya_humidity(2, 10)
        .tuya_battery(4)
        .skip_configuration()
}

/// `_TZE200_bq5c8xfe` family.
pub fn wrapped_th() -> QuirkBuilder {
    wrapped_temperature_sensor("_TZE200_bq5c8xfe", "sensor::wrapped_th")
        .applies_to("_TZE200_vs0skpuc", "TS0601")
        .applies_to("_TZE200_qyflbnbj", "TS0601")
        .applies_to("_TZE284_qyflbnbj", "TS0601")
        .applies_to("_TZE200_44af8vyi", "TS0601")
        .tuya_humidity(2, 1)
        .tuya_battery(4)
        .skip_configuration()
}

/// Round variant without screen (`_TZE200_a8sdabtg` and rebrands).
pub fn round_th() -> QuirkBuilder {
    QuirkBuilder::new("_TZE200_a8sdabtg", "TS0601")
        .source("sensor::round_th")
        .applies_to("_TZE200_qoy0ekbd", "TS0601")
        .applies_to("_TZE200_znbl8dj5", "TS0601")
        .applies_to("_TZE200_zppcgbdj", "TS0601")
        .applies_to("_TZE204_s139roas", "TS0601")
        .applies_to("_TZE200_s1xgth2u", "TS0601")
        .tuya_temperature(1, 10)
        .tuya_humidity(2, 1)
        .tuya_battery(4)
        .skip_configuration()
}

/// TH01Z: temperature/humidity sensor with clock, alarms and tunable
/// reporting. Its MCU expects plain (non manufacturer-specific) time sync.
pub fn th01z() -> QuirkBuilder {
    let interval = |key: &str, name: &str| {
        EntityOptions::named(key, name)
            .config()
            .device_class("duration")
            .unit("min")
            .range(5.0, 120.0, 5.0)
    };
    let alarm_temperature = |key: &str, name: &str| {
        EntityOptions::named(key, name)
            .config()
            .unit("°C")
            .range(-20.0, 60.0, 1.0)
            .multiplier(0.1)
    };
    let alarm_humidity = |key: &str, name: &str| {
        EntityOptions::named(key, name)
            .config()
            .unit("%")
            .range(0.0, 100.0, 1.0)
    };

    QuirkBuilder::new("_TZE200_lve3dvpy", "TS0601")
        .source("sensor::th01z")
        .applies_to("_TZE200_c7emyjom", "TS0601")
        .applies_to("_TZE200_locansqn", "TS0601")
        .applies_to("_TZE200_qrztc3ev", "TS0601")
        .applies_to("_TZE200_snloy4rw", "TS0601")
        .applies_to("_TZE200_eanjj2pa", "TS0601")
        .applies_to("_TZE200_ydrdfkim", "TS0601")
        .applies_to("_TZE284_locansqn", "TS0601")
        .tuya_temperature(1, 10)
        .tuya_humidity(2, 1)
        .tuya_battery(4)
        .tuya_number(
            17,
            "temperature_report_interval",
            interval("temperature_report_interval", "Temperature report interval"),
        )
        .tuya_number(
            18,
            "humidity_report_interval",
            interval("humidity_report_interval", "Humidity report interval"),
        )
        .tuya_enum(
            9,
            "display_unit",
            &TEMP_UNIT,
            EntityOptions::named("display_unit", "Display unit").config(),
        )
        .tuya_enum(
            14,
            "temperature_alarm",
            &TEMP_HUMI_ALARM,
            EntityOptions::named("temperature_alarm", "Temperature alarm")
                .platform(EntityPlatform::Sensor),
        )
        .tuya_number(
            10,
            "alarm_temperature_max",
            alarm_temperature("alarm_temperature_max", "Alarm temperature max"),
        )
        .tuya_number(
            11,
            "alarm_temperature_min",
            alarm_temperature("alarm_temperature_min", "Alarm temperature min"),
        )
        .tuya_number(
            19,
            "temperature_sensitivity",
            EntityOptions::named("temperature_sensitivity", "Temperature sensitivity")
                .config()
                .unit("°C")
                .range(0.1, 50.0, 0.1)
                .multiplier(0.1),
        )
        .tuya_enum(
            15,
            "humidity_alarm",
            &TEMP_HUMI_ALARM,
            EntityOptions::named("humidity_alarm", "Humidity alarm")
                .platform(EntityPlatform::Sensor),
        )
        .tuya_number(
            12,
            "alarm_humidity_max",
            alarm_humidity("alarm_humidity_max", "Alarm humidity max"),
        )
        .tuya_number(
            13,
            "alarm_humidity_min",
            alarm_humidity("alarm_humidity_min", "Alarm humidity min"),
        )
        .tuya_number(
            20,
            "humidity_sensitivity",
            EntityOptions::named("humidity_sensitivity", "Humidity sensitivity")
                .config()
                .unit("%")
                .range(1.0, 100.0, 1.0),
        )
        .set_time_not_manufacturer_specific()
        .time_epoch(1970)
        .skip_configuration()
}

/// `_TZE200_yjjdcqsq` family: battery reported as a three-level state.
pub fn battery_state_th() -> QuirkBuilder {
    let levels: BTreeMap<i64, i64> = [(0, 50), (1, 100), (2, 200)].into_iter().collect();

    QuirkBuilder::new("_TZE200_yjjdcqsq", "TS0601")
        .source("sensor::battery_state_th")
        .applies_to("_TZE200_9yapgbuv", "TS0601")
        .applies_to("_TZE204_9yapgbuv", "TS0601")
        .applies_to("_TZE200_utkemkbs", "TS0601")
        .applies_to("_TZE204_utkemkbs", "TS0601")
        .applies_to("_TZE204_yjjdcqsq", "TS0601")
        .applies_to("_TZE204_ksz749x8", "TS0601")
        .tuya_temperature(1, 10)
        .tuya_humidity(2, 1)
        .adds(BatteryInfo::two_aaa().apply(ClusterSpec::power_configuration()))
        .tuya_measurement(
            4,
            DataType::Enum,
            ClusterSpec::power_configuration(),
            attr::BATTERY_PERCENTAGE_REMAINING,
            TransformRule::EnumMap { map: levels },
        )
        .skip_configuration()
}

/// Soil sensor reporting temperature in tenths of a degree.
pub fn soil_sensor_decidegrees() -> QuirkBuilder {
    QuirkBuilder::new("_TZE284_aao3yzhs", "TS0601")
        .source("sensor::soil_sensor_decidegrees")
        .applies_to("_TZE284_sgabhwa6", "TS0601")
        .applies_to("_TZE284_nhgdf6qr", "TS0601")
        .tuya_temperature(5, 10)
        .tuya_battery(15)
        .tuya_soil_moisture(3)
        .skip_configuration()
}

/// Soil sensor reporting whole degrees.
pub fn soil_sensor() -> QuirkBuilder {
    QuirkBuilder::new("_TZE200_myd45weu", "TS0601")
        .source("sensor::soil_sensor")
        .applies_to("_TZE200_ga1maeof", "TS0601")
        .applies_to("_TZE200_9cqcpkgb", "TS0601")
        .applies_to("_TZE204_myd45weu", "TS0601")
        .applies_to("_TZE200_2se8efxh", "TS0601")
        .tuya_temperature(5, 1)
        .tuya_battery(15)
        .tuya_soil_moisture(3)
        .skip_configuration()
}

/// Door contact with an illuminance sensor (Cusam ZG-102ZL).
pub fn contact_illuminance() -> QuirkBuilder {
    QuirkBuilder::new("_TZE200_pay2byax", "TS0601")
        .source("sensor::contact_illuminance")
        .applies_to("_TZE200_n8dljorx", "TS0601")
        .tuya_illuminance(101)
        .tuya_contact(1)
        .tuya_battery(2)
        .skip_configuration()
}

pub fn register(registry: &mut QuirkRegistry) -> Result<()> {
    for builder in [
        wrapped_th_decihumidity(),
        wrapped_th(),
        round_th(),
        th01z(),
        battery_state_th(),
        soil_sensor_decidegrees(),
        soil_sensor(),
        contact_illuminance(),
    ] {
        builder.add_to_registry(registry)?;
    }
    Ok(())
}
