//! Standard cluster objects backing a quirked device.
//! Each cluster is an in-memory attribute store; the catalog below names the
//! Zigbee clusters and attributes the Tuya quirks write into.

use crate::bus::BusListener;
use crate::error::Result;
use crate::protocol::{DatapointValue, TUYA_CLUSTER_ID};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Common ZCL cluster ids
pub mod id {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIGURATION: u16 = 0x0001;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const TIME: u16 = 0x000A;
    pub const OTA: u16 = 0x0019;
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const RELATIVE_HUMIDITY: u16 = 0x0405;
    pub const SOIL_MOISTURE: u16 = 0x0408;
    pub const CARBON_DIOXIDE: u16 = 0x040D;
    pub const PM25: u16 = 0x042A;
    pub const FORMALDEHYDE: u16 = 0x042B;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const METERING: u16 = 0x0702;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
    pub const VOC_LEVEL: u16 = 0xFC7E;
    pub const TUYA_MANUFACTURER: u16 = super::TUYA_CLUSTER_ID;
}

/// Attribute ids shared by the measurement clusters
pub mod attr {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const APP_VERSION: u16 = 0x0001;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const ATTRIBUTE_REPORTING_STATUS: u16 = 0xFFFE;

    pub const MEASURED_VALUE: u16 = 0x0000;
    pub const ON_OFF: u16 = 0x0000;
    pub const ZONE_STATUS: u16 = 0x0002;

    pub const BATTERY_VOLTAGE: u16 = 0x0020;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
    pub const BATTERY_SIZE: u16 = 0x0031;
    pub const BATTERY_QUANTITY: u16 = 0x0033;
    pub const BATTERY_RATED_VOLTAGE: u16 = 0x0034;

    pub const CURRENT_SUMM_DELIVERED: u16 = 0x0000;
    pub const CURRENT_SUMM_RECEIVED: u16 = 0x0001;
    pub const UNIT_OF_MEASURE: u16 = 0x0300;
    pub const METERING_DIVISOR: u16 = 0x0302;

    pub const AC_FREQUENCY: u16 = 0x0300;
    pub const TOTAL_REACTIVE_POWER: u16 = 0x0305;
    pub const AC_FREQUENCY_MULTIPLIER: u16 = 0x0400;
    pub const AC_FREQUENCY_DIVISOR: u16 = 0x0401;
    pub const RMS_VOLTAGE: u16 = 0x0505;
    pub const RMS_CURRENT: u16 = 0x0508;
    pub const ACTIVE_POWER: u16 = 0x050B;
    pub const REACTIVE_POWER: u16 = 0x050E;
    pub const POWER_FACTOR: u16 = 0x0510;
    pub const AC_VOLTAGE_MULTIPLIER: u16 = 0x0600;
    pub const AC_VOLTAGE_DIVISOR: u16 = 0x0601;
    pub const AC_CURRENT_MULTIPLIER: u16 = 0x0602;
    pub const AC_CURRENT_DIVISOR: u16 = 0x0603;
    pub const RMS_VOLTAGE_PH_B: u16 = 0x0905;
    pub const RMS_CURRENT_PH_B: u16 = 0x0908;
    pub const ACTIVE_POWER_PH_B: u16 = 0x090B;
    pub const RMS_VOLTAGE_PH_C: u16 = 0x0A05;
    pub const RMS_CURRENT_PH_C: u16 = 0x0A08;
    pub const ACTIVE_POWER_PH_C: u16 = 0x0A0B;

    pub const ZONE_TYPE: u16 = 0x0001;

    /// Base of the manufacturer-cluster attribute space; dp `n` is stored at
    /// `TUYA_DP_BASE | n`.
    pub const TUYA_DP_BASE: u16 = 0xEF00;
    /// Shares the base id; datapoint 0 is never used by Tuya devices
    pub const MCU_VERSION: u16 = TUYA_DP_BASE;
}

/// Attribute id under which a datapoint is mirrored on the Tuya cluster.
pub fn datapoint_attribute(dp_id: u8) -> u16 {
    attr::TUYA_DP_BASE | dp_id as u16
}

/// A domain value ready for attribute storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Bool(b) => Some(*b as i64 as f64),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Bool(b) => Some(*b as i64),
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl From<&DatapointValue> for AttrValue {
    fn from(value: &DatapointValue) -> Self {
        match value {
            DatapointValue::Raw(bytes) => AttrValue::Bytes(bytes.clone()),
            DatapointValue::Bool(b) => AttrValue::Bool(*b),
            DatapointValue::Value(v) => AttrValue::Int(*v as i64),
            DatapointValue::String(s) => AttrValue::Str(s.clone()),
            DatapointValue::Enum(v) => AttrValue::Int(*v as i64),
            DatapointValue::Bitmap(v) => AttrValue::Int(*v as i64),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<u16> for AttrValue {
    fn from(value: u16) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<u8> for AttrValue {
    fn from(value: u8) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(s) => write!(f, "{:?}", s),
            AttrValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// Routes named bus events into attributes of the subscribing cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSubscription {
    pub channel: String,
    /// event name -> attribute id
    pub events: BTreeMap<String, u16>,
}

impl BusSubscription {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            events: BTreeMap::new(),
        }
    }

    pub fn on(mut self, event: impl Into<String>, attribute: u16) -> Self {
        self.events.insert(event.into(), attribute);
        self
    }
}

/// Declarative description of one replacement cluster on an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub id: u16,
    /// Endpoint attribute name, e.g. `temperature` or `electrical_measurement`
    pub name: String,
    /// Attributes that always read the same value (divisors, units, battery data)
    #[serde(default)]
    pub constants: BTreeMap<u16, AttrValue>,
    #[serde(default)]
    pub subscriptions: Vec<BusSubscription>,
}

impl ClusterSpec {
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            constants: BTreeMap::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn constant(mut self, attribute: u16, value: impl Into<AttrValue>) -> Self {
        self.constants.insert(attribute, value.into());
        self
    }

    pub fn subscribe(mut self, subscription: BusSubscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn tuya_manufacturer() -> Self {
        Self::new(id::TUYA_MANUFACTURER, "tuya_manufacturer")
    }

    pub fn basic() -> Self {
        Self::new(id::BASIC, "basic")
    }

    pub fn groups() -> Self {
        Self::new(id::GROUPS, "groups")
    }

    pub fn scenes() -> Self {
        Self::new(id::SCENES, "scenes")
    }

    pub fn power_configuration() -> Self {
        Self::new(id::POWER_CONFIGURATION, "power")
    }

    pub fn on_off() -> Self {
        Self::new(id::ON_OFF, "on_off")
    }

    pub fn temperature() -> Self {
        Self::new(id::TEMPERATURE_MEASUREMENT, "temperature")
    }

    pub fn humidity() -> Self {
        Self::new(id::RELATIVE_HUMIDITY, "humidity")
    }

    pub fn soil_moisture() -> Self {
        Self::new(id::SOIL_MOISTURE, "soil_moisture")
    }

    pub fn illuminance() -> Self {
        Self::new(id::ILLUMINANCE_MEASUREMENT, "illuminance")
    }

    pub fn ias_zone() -> Self {
        Self::new(id::IAS_ZONE, "ias_zone")
    }

    pub fn carbon_dioxide() -> Self {
        Self::new(id::CARBON_DIOXIDE, "carbon_dioxide_concentration")
    }

    pub fn pm25() -> Self {
        Self::new(id::PM25, "pm25")
    }

    pub fn formaldehyde() -> Self {
        Self::new(id::FORMALDEHYDE, "formaldehyde_concentration")
    }

    pub fn voc_level() -> Self {
        Self::new(id::VOC_LEVEL, "voc_level")
    }

    pub fn metering() -> Self {
        Self::new(id::METERING, "smartenergy_metering")
    }

    pub fn electrical_measurement() -> Self {
        Self::new(id::ELECTRICAL_MEASUREMENT, "electrical_measurement")
    }
}

/// Notification emitted for every attribute write, consumed by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUpdate {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute: u16,
    pub value: AttrValue,
}

/// Attribute store interface the dispatch router writes through.
pub trait AttributeStore: Send + Sync {
    fn update_attribute(&self, attribute: u16, value: AttrValue) -> AttributeUpdate;
}

/// A live cluster instance on one endpoint of a quirked device.
pub struct Cluster {
    endpoint: u8,
    spec: ClusterSpec,
    attributes: RwLock<BTreeMap<u16, AttrValue>>,
    /// Unknown datapoints kept for diagnostics (Tuya cluster only)
    unknown: RwLock<BTreeMap<u8, DatapointValue>>,
    updates: broadcast::Sender<AttributeUpdate>,
}

impl Cluster {
    pub fn new(endpoint: u8, spec: ClusterSpec, updates: broadcast::Sender<AttributeUpdate>) -> Self {
        Self {
            endpoint,
            spec,
            attributes: RwLock::new(BTreeMap::new()),
            unknown: RwLock::new(BTreeMap::new()),
            updates,
        }
    }

    pub fn id(&self) -> u16 {
        self.spec.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// Reads an attribute; constants win over stored values.
    pub fn get(&self, attribute: u16) -> Option<AttrValue> {
        if let Some(v) = self.spec.constants.get(&attribute) {
            return Some(v.clone());
        }
        self.attributes.read().get(&attribute).cloned()
    }

    pub fn store_unknown(&self, dp_id: u8, value: DatapointValue) {
        self.unknown.write().insert(dp_id, value);
    }

    pub fn unknown_datapoint(&self, dp_id: u8) -> Option<DatapointValue> {
        self.unknown.read().get(&dp_id).cloned()
    }

    pub fn unknown_datapoints(&self) -> BTreeMap<u8, DatapointValue> {
        self.unknown.read().clone()
    }
}

impl AttributeStore for Cluster {
    fn update_attribute(&self, attribute: u16, value: AttrValue) -> AttributeUpdate {
        self.attributes.write().insert(attribute, value.clone());
        let update = AttributeUpdate {
            endpoint: self.endpoint,
            cluster: self.spec.id,
            attribute,
            value,
        };
        debug!(
            "ep{} {}: attribute 0x{:04X} = {}",
            self.endpoint, self.spec.name, attribute, update.value
        );
        // No observers is fine.
        let _ = self.updates.send(update.clone());
        update
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("endpoint", &self.endpoint)
            .field("id", &format_args!("0x{:04X}", self.spec.id))
            .field("name", &self.spec.name)
            .finish()
    }
}

/// Bus listener that maps event names onto attributes of one cluster.
pub struct EventForwarder {
    cluster: Arc<Cluster>,
    events: BTreeMap<String, u16>,
}

impl EventForwarder {
    pub fn new(cluster: Arc<Cluster>, events: BTreeMap<String, u16>) -> Self {
        Self { cluster, events }
    }
}

impl BusListener for EventForwarder {
    fn on_event(&self, event: &str, value: &AttrValue) -> Result<()> {
        match self.events.get(event) {
            Some(&attribute) => {
                self.cluster.update_attribute(attribute, value.clone());
            }
            None => debug!(
                "ep{} {} ignores event '{}'",
                self.cluster.endpoint, self.cluster.spec.name, event
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(spec: ClusterSpec) -> (Cluster, broadcast::Receiver<AttributeUpdate>) {
        let (tx, rx) = broadcast::channel(8);
        (Cluster::new(1, spec, tx), rx)
    }

    #[test]
    fn constants_shadow_stored_values() {
        let spec = ClusterSpec::electrical_measurement().constant(attr::AC_CURRENT_DIVISOR, 1000);
        let (c, _rx) = cluster(spec);
        c.update_attribute(attr::AC_CURRENT_DIVISOR, AttrValue::Int(1));
        assert_eq!(c.get(attr::AC_CURRENT_DIVISOR), Some(AttrValue::Int(1000)));
    }

    #[test]
    fn updates_are_broadcast() {
        let (c, mut rx) = cluster(ClusterSpec::temperature());
        let update = c.update_attribute(attr::MEASURED_VALUE, AttrValue::Int(2150));
        assert_eq!(rx.try_recv().unwrap(), update);
        assert_eq!(c.get(attr::MEASURED_VALUE), Some(AttrValue::Int(2150)));
    }

    #[test]
    fn forwarder_maps_known_events_only() {
        let (c, _rx) = cluster(ClusterSpec::electrical_measurement());
        let c = Arc::new(c);
        let mut events = BTreeMap::new();
        events.insert("power_reported".to_string(), attr::ACTIVE_POWER);
        let fwd = EventForwarder::new(c.clone(), events);

        fwd.on_event("power_reported", &AttrValue::Int(100)).unwrap();
        fwd.on_event("unrelated", &AttrValue::Int(1)).unwrap();
        assert_eq!(c.get(attr::ACTIVE_POWER), Some(AttrValue::Int(100)));
    }

    #[test]
    fn datapoint_attribute_space() {
        assert_eq!(datapoint_attribute(6), 0xEF06);
        assert_eq!(datapoint_attribute(10), 0xEF0A);
    }
}
