//! Declarative quirk definitions.
//!
//! A [`QuirkDefinition`] is plain data: which manufacturer/model pairs it
//! covers, which clusters each endpoint exposes, how every datapoint is
//! transformed and where the results go, and what entities the presentation
//! layer should render. Definitions are built once at startup (through
//! [`QuirkBuilder`](crate::builder::QuirkBuilder) or loaded from JSON) and
//! never mutated afterwards.

use crate::cluster::{ClusterSpec, id};
use crate::error::{QuirkError, Result};
use crate::protocol::DataType;
use crate::transform::TransformRule;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub const ZHA_PROFILE_ID: u16 = 0x0104;
pub const DEVICE_TYPE_SMART_PLUG: u16 = 0x0051;
pub const DEVICE_TYPE_METER_INTERFACE: u16 = 0x0053;

fn yes() -> bool {
    true
}

fn zha_profile() -> u16 {
    ZHA_PROFILE_ID
}

fn smart_plug() -> u16 {
    DEVICE_TYPE_SMART_PLUG
}

fn unix_epoch() -> u16 {
    1970
}

/// Device identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManufacturerModel {
    pub manufacturer: String,
    pub model: String,
}

impl ManufacturerModel {
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ManufacturerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' '{}'", self.manufacturer, self.model)
    }
}

/// Registration of one datapoint on the manufacturer cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointSpec {
    pub id: u8,
    /// Name of the mirrored attribute on the Tuya cluster
    pub attribute_name: String,
    pub data_type: DataType,
    #[serde(default = "yes")]
    pub reportable: bool,
}

impl DatapointSpec {
    pub fn new(id: u8, attribute_name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            attribute_name: attribute_name.into(),
            data_type,
            reportable: true,
        }
    }
}

/// Where one transformed value goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingTarget {
    /// Update one attribute of a sibling cluster
    Attribute {
        endpoint: u8,
        cluster: u16,
        attribute: u16,
    },
    /// Update the attribute selected by the transform's phase (A, B, C)
    PhaseAttribute {
        endpoint: u8,
        cluster: u16,
        attributes: [u16; 3],
    },
    /// Publish an event on a device bus
    Bus { channel: String, event: String },
    /// Publish on the bus selected by the transform's phase
    PhaseBus { channels: [String; 3], event: String },
}

impl BindingTarget {
    fn is_phased(&self) -> bool {
        matches!(
            self,
            BindingTarget::PhaseAttribute { .. } | BindingTarget::PhaseBus { .. }
        )
    }
}

/// Association of one transform output field with one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBinding {
    /// Index into the transform's output values
    #[serde(default)]
    pub field: usize,
    pub target: BindingTarget,
}

impl ClusterBinding {
    pub fn attribute(endpoint: u8, cluster: u16, attribute: u16) -> Self {
        Self {
            field: 0,
            target: BindingTarget::Attribute {
                endpoint,
                cluster,
                attribute,
            },
        }
    }

    pub fn phase_attribute(endpoint: u8, cluster: u16, attributes: [u16; 3]) -> Self {
        Self {
            field: 0,
            target: BindingTarget::PhaseAttribute {
                endpoint,
                cluster,
                attributes,
            },
        }
    }

    pub fn bus(channel: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            field: 0,
            target: BindingTarget::Bus {
                channel: channel.into(),
                event: event.into(),
            },
        }
    }

    pub fn phase_bus(channels: [&str; 3], event: impl Into<String>) -> Self {
        Self {
            field: 0,
            target: BindingTarget::PhaseBus {
                channels: channels.map(String::from),
                event: event.into(),
            },
        }
    }

    /// Selects which output field of a fan-out transform this binding takes.
    pub fn field(mut self, field: usize) -> Self {
        self.field = field;
        self
    }
}

/// A datapoint's complete wiring: registration, transform and bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointWiring {
    pub spec: DatapointSpec,
    #[serde(default)]
    pub transform: TransformRule,
    /// Fired in order
    #[serde(default)]
    pub bindings: Vec<ClusterBinding>,
}

/// Replacement cluster set of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointComposition {
    pub id: u8,
    #[serde(default = "zha_profile")]
    pub profile_id: u16,
    #[serde(default = "smart_plug")]
    pub device_type: u16,
    #[serde(default)]
    pub input_clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub output_clusters: Vec<u16>,
}

impl EndpointComposition {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            profile_id: ZHA_PROFILE_ID,
            device_type: DEVICE_TYPE_SMART_PLUG,
            input_clusters: Vec::new(),
            output_clusters: Vec::new(),
        }
    }

    pub fn device_type(mut self, device_type: u16) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn input(mut self, cluster: ClusterSpec) -> Self {
        self.add_input(cluster);
        self
    }

    pub fn output(mut self, cluster: u16) -> Self {
        self.output_clusters.push(cluster);
        self
    }

    /// Adds or replaces the input cluster with the same id.
    pub fn add_input(&mut self, cluster: ClusterSpec) {
        match self.input_clusters.iter_mut().find(|c| c.id == cluster.id) {
            Some(existing) => *existing = cluster,
            None => self.input_clusters.push(cluster),
        }
    }

    pub fn cluster(&self, cluster: u16) -> Option<&ClusterSpec> {
        self.input_clusters.iter().find(|c| c.id == cluster)
    }

    pub fn cluster_mut(&mut self, cluster: u16) -> Option<&mut ClusterSpec> {
        self.input_clusters.iter_mut().find(|c| c.id == cluster)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityPlatform {
    Sensor,
    BinarySensor,
    Switch,
    Number,
    Select,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Standard,
    Config,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumOption {
    pub value: u8,
    pub name: String,
}

/// What the presentation layer needs to render one control or sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute_name: String,
    pub platform: EntityPlatform,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub translation_key: Option<String>,
    #[serde(default)]
    pub fallback_name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub range: Option<NumberRange>,
    /// Display factor applied to the stored raw value
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub options: Vec<EnumOption>,
}

impl EntityMetadata {
    pub fn new(platform: EntityPlatform, attribute_name: impl Into<String>) -> Self {
        Self {
            endpoint: 1,
            cluster: id::TUYA_MANUFACTURER,
            attribute_name: attribute_name.into(),
            platform,
            entity_type: EntityType::Standard,
            translation_key: None,
            fallback_name: None,
            unit: None,
            device_class: None,
            range: None,
            multiplier: None,
            options: Vec::new(),
        }
    }
}

/// Behaviour of the replacement Tuya manufacturer cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McuOptions {
    /// Whether `SetTime` answers carry the manufacturer-specific flag.
    /// Datapoint commands never do.
    #[serde(default = "yes")]
    pub set_time_manufacturer_specific: bool,
    /// Epoch year for time sync answers (1970 or 2000)
    #[serde(default = "unix_epoch")]
    pub time_epoch_year: u16,
}

/// Epoch years a Tuya MCU may count time sync seconds from.
pub const SUPPORTED_EPOCHS: [u16; 2] = [1970, 2000];

impl Default for McuOptions {
    fn default() -> Self {
        Self {
            set_time_manufacturer_specific: true,
            time_epoch_year: 1970,
        }
    }
}

/// One immutable device description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuirkDefinition {
    pub models: Vec<ManufacturerModel>,
    pub endpoints: Vec<EndpointComposition>,
    #[serde(default)]
    pub datapoints: Vec<DatapointWiring>,
    #[serde(default)]
    pub entities: Vec<EntityMetadata>,
    /// Bus channels created for every device instance
    #[serde(default)]
    pub buses: Vec<String>,
    #[serde(default)]
    pub mcu: McuOptions,
    #[serde(default)]
    pub skip_configuration: bool,
    /// Read the Basic attributes Tuya firmware waits for before it reports
    #[serde(default)]
    pub read_attributes_on_configure: bool,
    #[serde(default)]
    pub query_on_configure: bool,
    /// Where the definition was declared, for conflict reports
    #[serde(default)]
    pub source: Option<String>,
}

impl QuirkDefinition {
    pub fn wiring(&self, dp_id: u8) -> Option<&DatapointWiring> {
        self.datapoints.iter().find(|w| w.spec.id == dp_id)
    }

    pub fn wiring_by_name(&self, attribute_name: &str) -> Option<&DatapointWiring> {
        self.datapoints
            .iter()
            .find(|w| w.spec.attribute_name == attribute_name)
    }

    pub fn endpoint(&self, endpoint: u8) -> Option<&EndpointComposition> {
        self.endpoints.iter().find(|e| e.id == endpoint)
    }

    /// Endpoint hosting the Tuya manufacturer cluster.
    pub fn manufacturer_endpoint(&self) -> Option<u8> {
        self.endpoints
            .iter()
            .find(|e| e.cluster(id::TUYA_MANUFACTURER).is_some())
            .map(|e| e.id)
    }

    /// Human-readable origin used in log and conflict messages.
    pub fn label(&self) -> String {
        match (&self.source, self.models.first()) {
            (Some(src), _) => src.clone(),
            (None, Some(m)) => m.to_string(),
            (None, None) => "<unnamed quirk>".to_string(),
        }
    }

    fn has_cluster(&self, endpoint: u8, cluster: u16) -> bool {
        self.endpoint(endpoint)
            .is_some_and(|e| e.cluster(cluster).is_some())
    }

    /// Structural validation run before registration.
    pub fn validate(&self) -> Result<()> {
        let label = self.label();
        let invalid = |msg: String| QuirkError::InvalidDefinition(format!("{}: {}", label, msg));

        if self.models.is_empty() {
            return Err(invalid("no manufacturer/model pairs".into()));
        }
        let mut pairs = HashSet::new();
        for m in &self.models {
            if m.manufacturer.trim().is_empty() || m.model.trim().is_empty() {
                return Err(invalid(format!("empty manufacturer or model in {}", m)));
            }
            if !pairs.insert(m) {
                return Err(QuirkError::RegistrationConflict(format!(
                    "{}: {} listed twice",
                    label, m
                )));
            }
        }

        let mut endpoint_ids = HashSet::new();
        for ep in &self.endpoints {
            if !endpoint_ids.insert(ep.id) {
                return Err(invalid(format!("endpoint {} declared twice", ep.id)));
            }
            for c in &ep.input_clusters {
                for sub in &c.subscriptions {
                    if !self.buses.contains(&sub.channel) {
                        return Err(invalid(format!(
                            "cluster {} on endpoint {} subscribes to undeclared bus '{}'",
                            c.name, ep.id, sub.channel
                        )));
                    }
                }
            }
        }
        if self.manufacturer_endpoint().is_none() {
            return Err(invalid("no Tuya manufacturer cluster".into()));
        }

        let mut dp_ids = BTreeSet::new();
        let mut names = HashSet::new();
        for w in &self.datapoints {
            if w.spec.id == 0 {
                return Err(invalid("datapoint 0 is reserved for the MCU version".into()));
            }
            if !dp_ids.insert(w.spec.id) {
                return Err(QuirkError::RegistrationConflict(format!(
                    "{}: datapoint {} registered twice",
                    label, w.spec.id
                )));
            }
            if w.spec.attribute_name.is_empty() || !names.insert(w.spec.attribute_name.as_str()) {
                return Err(invalid(format!(
                    "datapoint {} has an empty or duplicate attribute name '{}'",
                    w.spec.id, w.spec.attribute_name
                )));
            }
            w.transform.validate().map_err(|e| invalid(format!("datapoint {}: {}", w.spec.id, e)))?;
            for b in &w.bindings {
                self.validate_binding(w, b).map_err(invalid)?;
            }
        }

        if !SUPPORTED_EPOCHS.contains(&self.mcu.time_epoch_year) {
            return Err(invalid(format!(
                "time epoch {} is not one of {:?}",
                self.mcu.time_epoch_year, SUPPORTED_EPOCHS
            )));
        }

        for e in &self.entities {
            if let Some(key) = &e.translation_key {
                if e.fallback_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
                    return Err(invalid(format!(
                        "entity '{}' has translation key '{}' but no fallback name",
                        e.attribute_name, key
                    )));
                }
            }
            if !self.has_cluster(e.endpoint, e.cluster) {
                return Err(invalid(format!(
                    "entity '{}' points at missing cluster 0x{:04X} on endpoint {}",
                    e.attribute_name, e.cluster, e.endpoint
                )));
            }
        }

        Ok(())
    }

    fn validate_binding(&self, w: &DatapointWiring, b: &ClusterBinding) -> std::result::Result<(), String> {
        let dp = w.spec.id;
        if b.field >= w.transform.arity() {
            return Err(format!(
                "datapoint {} binds field {} but its transform yields {}",
                dp,
                b.field,
                w.transform.arity()
            ));
        }
        if b.target.is_phased() && !w.transform.is_phased() {
            return Err(format!(
                "datapoint {} has a phase binding without a phased transform",
                dp
            ));
        }
        match &b.target {
            BindingTarget::Attribute { endpoint, cluster, .. }
            | BindingTarget::PhaseAttribute { endpoint, cluster, .. } => {
                if !self.has_cluster(*endpoint, *cluster) {
                    return Err(format!(
                        "datapoint {} targets missing cluster 0x{:04X} on endpoint {}",
                        dp, cluster, endpoint
                    ));
                }
            }
            BindingTarget::Bus { channel, .. } => {
                if !self.buses.contains(channel) {
                    return Err(format!("datapoint {} publishes to undeclared bus '{}'", dp, channel));
                }
            }
            BindingTarget::PhaseBus { channels, .. } => {
                if let Some(c) = channels.iter().find(|c| !self.buses.contains(c)) {
                    return Err(format!("datapoint {} publishes to undeclared bus '{}'", dp, c));
                }
            }
        }
        Ok(())
    }
}
