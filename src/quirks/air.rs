//! Air-quality sensors (CO2, VOC, formaldehyde, PM2.5).
//!
//! Gas concentrations are stored as fractions (ppm / 1e6) the way the
//! concentration measurement clusters expect them.

use crate::builder::QuirkBuilder;
use crate::error::Result;
use crate::registry::QuirkRegistry;
use crate::transform::{Scale, TransformRule};

/// Temperature in decidegrees as a 16-bit two's-complement value.
pub fn signed_decidegrees() -> TransformRule {
    TransformRule::TwosComplement {
        bits: 16,
        scale: Scale::multiply(10),
    }
}

fn air_quality(manufacturer: &str, source: &str) -> QuirkBuilder {
    QuirkBuilder::new(manufacturer, "TS0601")
        .source(source)
        .tuya_co2(2)
        .tuya_temperature_with(18, signed_decidegrees())
        .tuya_humidity(19, 10)
        .tuya_voc(21)
        .tuya_formaldehyde(22)
}

/// `_TZE200_8ygsuhe1` CO2/VOC/formaldehyde sensor.
pub fn air_quality_sensor() -> QuirkBuilder {
    air_quality("_TZE200_8ygsuhe1", "air::air_quality_sensor")
}

/// `_TZE200_mja3fuja` variant that adds a PM2.5 reading.
pub fn smart_air_sensor() -> QuirkBuilder {
    air_quality("_TZE200_mja3fuja", "air::smart_air_sensor").tuya_pm25(20)
}

pub fn register(registry: &mut QuirkRegistry) -> Result<()> {
    air_quality_sensor().add_to_registry(registry)?;
    smart_air_sensor().add_to_registry(registry)?;
    Ok(())
}
