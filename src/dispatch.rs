//! Datapoint dispatch.
//!
//! Routes one decoded datapoint frame through its registered transform and
//! fires its bindings in registration order. The router itself is stateless
//! apart from an id index; all mutable state lives in the clusters and buses
//! it is handed through [`DispatchTargets`].

use crate::bus::Bus;
use crate::cluster::{AttrValue, AttributeStore, AttributeUpdate, Cluster, datapoint_attribute};
use crate::definition::{BindingTarget, ClusterBinding, DatapointWiring, QuirkDefinition};
use crate::error::{QuirkError, Result};
use crate::protocol::DatapointFrame;
use crate::transform::Transformed;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Live objects a router writes into.
pub trait DispatchTargets {
    /// The Tuya manufacturer cluster, home of mirrored and unknown datapoints.
    fn manufacturer_cluster(&self) -> &Arc<Cluster>;
    fn cluster(&self, endpoint: u8, cluster: u16) -> Option<&Arc<Cluster>>;
    fn bus(&self, channel: &str) -> Option<&Arc<Bus>>;
}

/// Effect of one fired binding.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedUpdate {
    Attribute(AttributeUpdate),
    Published {
        channel: String,
        event: String,
        value: AttrValue,
        /// Number of listeners that accepted the event
        delivered: usize,
    },
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No wiring for this id; the raw value was kept for diagnostics.
    Unknown(u8),
    Applied {
        dp_id: u8,
        /// Raw value mirrored on the manufacturer cluster
        mirror: AttributeUpdate,
        updates: Vec<AppliedUpdate>,
    },
}

impl Dispatch {
    /// Number of bindings that fired.
    pub fn bindings_fired(&self) -> usize {
        match self {
            Dispatch::Unknown(_) => 0,
            Dispatch::Applied { updates, .. } => updates.len(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Dispatch::Unknown(_))
    }
}

/// Maps datapoint ids to their wiring for one definition.
#[derive(Debug, Clone)]
pub struct DispatchRouter {
    definition: Arc<QuirkDefinition>,
    index: HashMap<u8, usize>,
}

impl DispatchRouter {
    pub fn new(definition: Arc<QuirkDefinition>) -> Self {
        let index = definition
            .datapoints
            .iter()
            .enumerate()
            .map(|(i, w)| (w.spec.id, i))
            .collect();
        Self { definition, index }
    }

    pub fn definition(&self) -> &Arc<QuirkDefinition> {
        &self.definition
    }

    pub fn wiring(&self, dp_id: u8) -> Option<&DatapointWiring> {
        self.index.get(&dp_id).map(|&i| &self.definition.datapoints[i])
    }

    /// Dispatches one frame.
    ///
    /// A transform error aborts before any binding fires. A binding error
    /// aborts the remaining bindings of this frame only.
    pub fn dispatch<T>(&self, targets: &T, frame: &DatapointFrame) -> Result<Dispatch>
    where
        T: DispatchTargets + ?Sized,
    {
        let value = frame.value()?;
        let Some(wiring) = self.wiring(frame.id) else {
            debug!(
                "{}: unknown datapoint {} ({:?}) stored for diagnostics",
                self.definition.label(),
                frame.id,
                value
            );
            targets.manufacturer_cluster().store_unknown(frame.id, value);
            return Ok(Dispatch::Unknown(frame.id));
        };

        if frame.data_type != wiring.spec.data_type {
            warn!(
                "{}: datapoint {} ({}) arrived as {:?}, registered as {:?}",
                self.definition.label(),
                frame.id,
                wiring.spec.attribute_name,
                frame.data_type,
                wiring.spec.data_type
            );
        }

        // A failed transform leaves the mirror untouched too.
        let transformed = wiring.transform.apply(&value)?;
        let mirror = targets
            .manufacturer_cluster()
            .update_attribute(datapoint_attribute(frame.id), AttrValue::from(&value));

        let mut updates = Vec::with_capacity(wiring.bindings.len());
        for binding in &wiring.bindings {
            updates.push(self.fire(targets, wiring, binding, &transformed)?);
        }

        Ok(Dispatch::Applied {
            dp_id: frame.id,
            mirror,
            updates,
        })
    }

    fn fire<T>(
        &self,
        targets: &T,
        wiring: &DatapointWiring,
        binding: &ClusterBinding,
        transformed: &Transformed,
    ) -> Result<AppliedUpdate>
    where
        T: DispatchTargets + ?Sized,
    {
        let dp = wiring.spec.id;
        let value = transformed.values.get(binding.field).cloned().ok_or_else(|| {
            QuirkError::InvalidArgument(format!(
                "datapoint {} has no output field {}",
                dp, binding.field
            ))
        })?;
        let phase = || {
            transformed.phase.ok_or_else(|| {
                QuirkError::InvalidArgument(format!("datapoint {} produced no phase", dp))
            })
        };

        match &binding.target {
            BindingTarget::Attribute {
                endpoint,
                cluster,
                attribute,
            } => {
                let c = self.target_cluster(targets, *endpoint, *cluster)?;
                Ok(AppliedUpdate::Attribute(c.update_attribute(*attribute, value)))
            }
            BindingTarget::PhaseAttribute {
                endpoint,
                cluster,
                attributes,
            } => {
                let attribute = attributes[phase()?.index()];
                let c = self.target_cluster(targets, *endpoint, *cluster)?;
                Ok(AppliedUpdate::Attribute(c.update_attribute(attribute, value)))
            }
            BindingTarget::Bus { channel, event } => self.publish(targets, channel, event, value),
            BindingTarget::PhaseBus { channels, event } => {
                let channel = &channels[phase()?.index()];
                self.publish(targets, channel, event, value)
            }
        }
    }

    fn target_cluster<'a, T>(&self, targets: &'a T, endpoint: u8, cluster: u16) -> Result<&'a Arc<Cluster>>
    where
        T: DispatchTargets + ?Sized,
    {
        targets.cluster(endpoint, cluster).ok_or_else(|| {
            QuirkError::InvalidArgument(format!(
                "no cluster 0x{:04X} on endpoint {}",
                cluster, endpoint
            ))
        })
    }

    fn publish<T>(&self, targets: &T, channel: &str, event: &str, value: AttrValue) -> Result<AppliedUpdate>
    where
        T: DispatchTargets + ?Sized,
    {
        let bus = targets
            .bus(channel)
            .ok_or_else(|| QuirkError::InvalidArgument(format!("no bus named '{}'", channel)))?;
        let delivered = bus.publish(event, &value);
        Ok(AppliedUpdate::Published {
            channel: channel.to_string(),
            event: event.to_string(),
            value,
            delivered,
        })
    }
}
