//! Fluent construction of quirk definitions.
//!
//! [`QuirkBuilder`] accumulates datapoint wiring, replacement clusters and
//! entity metadata, then validates everything in one go when the definition
//! is built or registered. The `tuya_*` convenience methods are shorthands
//! for common sensor and control shapes; each expands to the same
//! [`DatapointSpec`] + [`TransformRule`] + [`ClusterBinding`] primitives that
//! [`QuirkBuilder::tuya_dp`] accepts.

use crate::cluster::{ClusterSpec, attr, id};
use crate::definition::{
    ClusterBinding, DatapointSpec, DatapointWiring, EndpointComposition, EntityMetadata,
    EntityPlatform, EntityType, EnumOption, ManufacturerModel, McuOptions, NumberRange,
    QuirkDefinition,
};
use crate::error::Result;
use crate::protocol::DataType;
use crate::registry::QuirkRegistry;
use crate::transform::{Scale, TransformRule};
use std::sync::Arc;

/// Endpoint that receives the Tuya cluster and the convenience clusters.
pub const DEFAULT_ENDPOINT: u8 = 1;

/// IAS zone type of a contact switch.
const ZONE_TYPE_CONTACT_SWITCH: u16 = 0x0015;

define_wire_enum! {
    /// ZCL battery size (Power Configuration 0x0031).
    pub enum BatterySize {
        NoBattery = 0x00,
        BuiltIn = 0x01,
        Other = 0x02,
        AA = 0x03,
        AAA = 0x04,
        C = 0x05,
        D = 0x06,
        CR2 = 0x07,
        CR123A = 0x08,
    }
}

impl BatterySize {
    /// Nominal cell voltage in 100 mV units.
    pub fn nominal_voltage(self) -> Option<u8> {
        match self {
            BatterySize::AA | BatterySize::AAA | BatterySize::C | BatterySize::D => Some(15),
            BatterySize::CR2 | BatterySize::CR123A => Some(30),
            _ => None,
        }
    }
}

/// Static battery description published through Power Configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryInfo {
    pub size: BatterySize,
    pub quantity: Option<u8>,
    /// 100 mV units; defaults to the cell's nominal voltage when a quantity is set
    pub rated_voltage: Option<u8>,
}

impl BatteryInfo {
    pub fn new(size: BatterySize) -> Self {
        Self {
            size,
            quantity: None,
            rated_voltage: None,
        }
    }

    pub fn quantity(mut self, quantity: u8) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn rated_voltage(mut self, voltage: u8) -> Self {
        self.rated_voltage = Some(voltage);
        self
    }

    /// Two AAA cells, the most common Tuya sensor pack.
    pub fn two_aaa() -> Self {
        Self::new(BatterySize::AAA).quantity(2)
    }

    /// Writes the battery constants onto a Power Configuration cluster.
    pub fn apply(&self, mut cluster: ClusterSpec) -> ClusterSpec {
        cluster = cluster.constant(attr::BATTERY_SIZE, self.size.as_u8());
        if let Some(qty) = self.quantity {
            cluster = cluster.constant(attr::BATTERY_QUANTITY, qty);
            if let Some(v) = self.rated_voltage.or_else(|| self.size.nominal_voltage()) {
                cluster = cluster.constant(attr::BATTERY_RATED_VOLTAGE, v);
            }
        } else if let Some(v) = self.rated_voltage {
            cluster = cluster.constant(attr::BATTERY_RATED_VOLTAGE, v);
        }
        cluster
    }
}

/// Presentation options for the entity a convenience method creates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityOptions {
    pub translation_key: Option<String>,
    pub fallback_name: Option<String>,
    pub entity_type: EntityType,
    pub platform: Option<EntityPlatform>,
    pub unit: Option<String>,
    pub device_class: Option<String>,
    pub range: Option<NumberRange>,
    pub multiplier: Option<f64>,
}

impl EntityOptions {
    pub fn named(translation_key: impl Into<String>, fallback_name: impl Into<String>) -> Self {
        Self {
            translation_key: Some(translation_key.into()),
            fallback_name: Some(fallback_name.into()),
            ..Default::default()
        }
    }

    pub fn config(mut self) -> Self {
        self.entity_type = EntityType::Config;
        self
    }

    pub fn diagnostic(mut self) -> Self {
        self.entity_type = EntityType::Diagnostic;
        self
    }

    pub fn platform(mut self, platform: EntityPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into());
        self
    }

    pub fn range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.range = Some(NumberRange { min, max, step });
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    fn into_entity(self, default_platform: EntityPlatform, attribute_name: &str) -> EntityMetadata {
        let mut e = EntityMetadata::new(self.platform.unwrap_or(default_platform), attribute_name);
        e.endpoint = DEFAULT_ENDPOINT;
        e.cluster = id::TUYA_MANUFACTURER;
        e.entity_type = self.entity_type;
        e.translation_key = self.translation_key;
        e.fallback_name = self.fallback_name;
        e.unit = self.unit;
        e.device_class = self.device_class;
        e.range = self.range;
        e.multiplier = self.multiplier;
        e
    }
}

/// Accumulates one [`QuirkDefinition`].
#[derive(Debug, Clone)]
pub struct QuirkBuilder {
    models: Vec<ManufacturerModel>,
    endpoints: Vec<EndpointComposition>,
    datapoints: Vec<DatapointWiring>,
    entities: Vec<EntityMetadata>,
    buses: Vec<String>,
    mcu: McuOptions,
    skip_configuration: bool,
    read_attributes_on_configure: bool,
    query_on_configure: bool,
    source: Option<String>,
}

impl QuirkBuilder {
    /// Starts a definition with endpoint 1 carrying Basic and the Tuya
    /// manufacturer cluster.
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        let ep = EndpointComposition::new(DEFAULT_ENDPOINT)
            .input(ClusterSpec::basic())
            .input(ClusterSpec::tuya_manufacturer())
            .output(id::TIME)
            .output(id::OTA);
        Self {
            models: vec![ManufacturerModel::new(manufacturer, model)],
            endpoints: vec![ep],
            datapoints: Vec::new(),
            entities: Vec::new(),
            buses: Vec::new(),
            mcu: McuOptions::default(),
            skip_configuration: false,
            read_attributes_on_configure: false,
            query_on_configure: false,
            source: None,
        }
    }

    pub fn applies_to(mut self, manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        self.models.push(ManufacturerModel::new(manufacturer, model));
        self
    }

    /// Names the definition in conflict reports.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    // ---------------------------------------------------------------------
    // Primitives
    // ---------------------------------------------------------------------

    /// Adds (or replaces) a cluster on endpoint 1.
    pub fn adds(self, cluster: ClusterSpec) -> Self {
        self.adds_to(DEFAULT_ENDPOINT, cluster)
    }

    /// Adds (or replaces) a cluster on any endpoint, creating the endpoint.
    pub fn adds_to(mut self, endpoint: u8, cluster: ClusterSpec) -> Self {
        self.endpoint_mut(endpoint).add_input(cluster);
        self
    }

    /// Adds a whole endpoint, replacing one with the same id.
    pub fn adds_endpoint(mut self, endpoint: EndpointComposition) -> Self {
        match self.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => self.endpoints.push(endpoint),
        }
        self
    }

    /// Declares a bus channel created with every device instance.
    pub fn with_bus(mut self, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        if !self.buses.contains(&channel) {
            self.buses.push(channel);
        }
        self
    }

    /// Registers a datapoint with its transform and bindings.
    pub fn tuya_dp(
        mut self,
        spec: DatapointSpec,
        transform: TransformRule,
        bindings: Vec<ClusterBinding>,
    ) -> Self {
        self.datapoints.push(DatapointWiring {
            spec,
            transform,
            bindings,
        });
        self
    }

    /// Registers a datapoint that only lives on the manufacturer cluster.
    pub fn tuya_attribute(self, dp_id: u8, attribute_name: &str, data_type: DataType) -> Self {
        self.tuya_dp(
            DatapointSpec::new(dp_id, attribute_name, data_type),
            TransformRule::Identity,
            Vec::new(),
        )
    }

    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn skip_configuration(mut self) -> Self {
        self.skip_configuration = true;
        self
    }

    /// Ask the device for all datapoints when it is configured.
    pub fn query_on_configure(mut self) -> Self {
        self.query_on_configure = true;
        self
    }

    /// Read the Basic cluster attributes on configure. Many Tuya MCUs stay
    /// silent until this read arrives.
    pub fn read_attributes_on_configure(mut self) -> Self {
        self.read_attributes_on_configure = true;
        self
    }

    /// Sets both join-time requests at once.
    pub fn tuya_enchantment(mut self, read_attributes: bool, data_query: bool) -> Self {
        self.read_attributes_on_configure = read_attributes;
        self.query_on_configure = data_query;
        self
    }

    /// Epoch year for time sync answers.
    pub fn time_epoch(mut self, year: u16) -> Self {
        self.mcu.time_epoch_year = year;
        self
    }

    /// Send `SetTime` answers without the manufacturer code.
    pub fn set_time_not_manufacturer_specific(mut self) -> Self {
        self.mcu.set_time_manufacturer_specific = false;
        self
    }

    // ---------------------------------------------------------------------
    // Convenience shapes
    // ---------------------------------------------------------------------

    /// One datapoint feeding one attribute of a standard cluster on endpoint 1.
    /// An existing cluster with the same id (e.g. one carrying constants) is kept.
    pub fn tuya_measurement(
        mut self,
        dp_id: u8,
        data_type: DataType,
        cluster: ClusterSpec,
        attribute: u16,
        transform: TransformRule,
    ) -> Self {
        let cluster_id = cluster.id;
        let name = cluster.name.clone();
        let ep = self.endpoint_mut(DEFAULT_ENDPOINT);
        if ep.cluster(cluster_id).is_none() {
            ep.add_input(cluster);
        }
        self.tuya_dp(
            DatapointSpec::new(dp_id, name, data_type),
            transform,
            vec![ClusterBinding::attribute(DEFAULT_ENDPOINT, cluster_id, attribute)],
        )
    }

    /// Battery percentage; Tuya reports 0..100, ZCL wants half-percent steps.
    pub fn tuya_battery(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::power_configuration(),
            attr::BATTERY_PERCENTAGE_REMAINING,
            TransformRule::scaled(Scale::multiply(2)),
        )
    }

    /// Battery percentage plus static battery attributes.
    pub fn tuya_battery_with(self, dp_id: u8, battery: BatteryInfo) -> Self {
        self.adds(battery.apply(ClusterSpec::power_configuration()))
            .tuya_battery(dp_id)
    }

    /// Temperature reported in `1/scale` degrees; stored in centidegrees.
    pub fn tuya_temperature(self, dp_id: u8, scale: i64) -> Self {
        self.tuya_temperature_with(dp_id, TransformRule::scaled(Scale::ratio(100, scale)))
    }

    /// Temperature with a family-specific transform (e.g. signed correction).
    pub fn tuya_temperature_with(self, dp_id: u8, transform: TransformRule) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::temperature(),
            attr::MEASURED_VALUE,
            transform,
        )
    }

    /// Relative humidity reported in `1/scale` percent; stored in centipercent.
    pub fn tuya_humidity(self, dp_id: u8, scale: i64) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::humidity(),
            attr::MEASURED_VALUE,
            TransformRule::scaled(Scale::ratio(100, scale)),
        )
    }

    pub fn tuya_soil_moisture(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::soil_moisture(),
            attr::MEASURED_VALUE,
            TransformRule::scaled(Scale::multiply(100)),
        )
    }

    pub fn tuya_illuminance(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::illuminance(),
            attr::MEASURED_VALUE,
            TransformRule::Lux,
        )
    }

    /// Contact sensor on an IAS zone; `true` raises alarm 1.
    pub fn tuya_contact(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Bool,
            ClusterSpec::ias_zone().constant(attr::ZONE_TYPE, ZONE_TYPE_CONTACT_SWITCH),
            attr::ZONE_STATUS,
            TransformRule::scaled(Scale::UNIT),
        )
    }

    pub fn tuya_onoff(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Bool,
            ClusterSpec::on_off(),
            attr::ON_OFF,
            TransformRule::Identity,
        )
    }

    pub fn tuya_metering(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::metering(),
            attr::CURRENT_SUMM_DELIVERED,
            TransformRule::Identity,
        )
    }

    /// CO2 in ppm, stored as a fraction.
    pub fn tuya_co2(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::carbon_dioxide(),
            attr::MEASURED_VALUE,
            TransformRule::linear(1_000_000),
        )
    }

    pub fn tuya_pm25(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::pm25(),
            attr::MEASURED_VALUE,
            TransformRule::Identity,
        )
    }

    pub fn tuya_voc(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::voc_level(),
            attr::MEASURED_VALUE,
            TransformRule::linear(1_000_000),
        )
    }

    pub fn tuya_formaldehyde(self, dp_id: u8) -> Self {
        self.tuya_measurement(
            dp_id,
            DataType::Value,
            ClusterSpec::formaldehyde(),
            attr::MEASURED_VALUE,
            TransformRule::linear(100_000_000),
        )
    }

    /// Writable boolean exposed as a switch.
    pub fn tuya_switch(self, dp_id: u8, attribute_name: &str, options: EntityOptions) -> Self {
        self.tuya_attribute(dp_id, attribute_name, DataType::Bool)
            .entity(options.into_entity(EntityPlatform::Switch, attribute_name))
    }

    pub fn tuya_binary_sensor(self, dp_id: u8, attribute_name: &str, options: EntityOptions) -> Self {
        self.tuya_attribute(dp_id, attribute_name, DataType::Bool)
            .entity(options.into_entity(EntityPlatform::BinarySensor, attribute_name))
    }

    pub fn tuya_sensor(
        self,
        dp_id: u8,
        attribute_name: &str,
        data_type: DataType,
        transform: TransformRule,
        options: EntityOptions,
    ) -> Self {
        self.tuya_dp(
            DatapointSpec::new(dp_id, attribute_name, data_type),
            transform,
            Vec::new(),
        )
        .entity(options.into_entity(EntityPlatform::Sensor, attribute_name))
    }

    /// Writable integer setting. The raw value is stored; the entity's
    /// multiplier and range describe how to show it.
    pub fn tuya_number(self, dp_id: u8, attribute_name: &str, options: EntityOptions) -> Self {
        self.tuya_attribute(dp_id, attribute_name, DataType::Value)
            .entity(options.into_entity(EntityPlatform::Number, attribute_name))
    }

    /// Enum datapoint with named values, exposed as a select unless the
    /// options pick another platform.
    pub fn tuya_enum(
        self,
        dp_id: u8,
        attribute_name: &str,
        values: &[(u8, &str)],
        options: EntityOptions,
    ) -> Self {
        let mut entity = options.into_entity(EntityPlatform::Select, attribute_name);
        entity.options = values
            .iter()
            .map(|(value, name)| EnumOption {
                value: *value,
                name: name.to_string(),
            })
            .collect();
        self.tuya_attribute(dp_id, attribute_name, DataType::Enum)
            .entity(entity)
    }

    // ---------------------------------------------------------------------
    // Finalization
    // ---------------------------------------------------------------------

    /// Validates and returns the definition.
    pub fn build(self) -> Result<QuirkDefinition> {
        let definition = QuirkDefinition {
            models: self.models,
            endpoints: self.endpoints,
            datapoints: self.datapoints,
            entities: self.entities,
            buses: self.buses,
            mcu: self.mcu,
            skip_configuration: self.skip_configuration,
            read_attributes_on_configure: self.read_attributes_on_configure,
            query_on_configure: self.query_on_configure,
            source: self.source,
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn add_to_registry(self, registry: &mut QuirkRegistry) -> Result<Arc<QuirkDefinition>> {
        registry.register(self.build()?)
    }

    fn endpoint_mut(&mut self, endpoint: u8) -> &mut EndpointComposition {
        let idx = match self.endpoints.iter().position(|e| e.id == endpoint) {
            Some(idx) => idx,
            None => {
                self.endpoints.push(EndpointComposition::new(endpoint));
                self.endpoints.len() - 1
            }
        };
        &mut self.endpoints[idx]
    }
}
