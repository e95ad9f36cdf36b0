//! Quirk definition registry.
//!
//! Definitions are registered once at startup and resolved by
//! (manufacturer, model) when a device joins. Registration is all-or-nothing:
//! a definition that conflicts with anything already registered leaves the
//! registry untouched.

use crate::config::DeviceOptions;
use crate::definition::{ManufacturerModel, QuirkDefinition};
use crate::device::{DeviceIdentity, QuirkedDevice};
use crate::error::{QuirkError, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct LabelEntry {
    fallback_name: String,
    origin: String,
}

/// Lookup table from device identity to quirk definition.
#[derive(Default)]
pub struct QuirkRegistry {
    by_model: HashMap<ManufacturerModel, Arc<QuirkDefinition>>,
    definitions: Vec<Arc<QuirkDefinition>>,
    /// translation key -> fallback name, shared by every definition
    labels: HashMap<String, LabelEntry>,
}

impl QuirkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a definition.
    ///
    /// Fails with `RegistrationConflict` when any of its manufacturer/model
    /// pairs is already covered, or when one of its translation keys is known
    /// under a different fallback name.
    pub fn register(&mut self, definition: QuirkDefinition) -> Result<Arc<QuirkDefinition>> {
        definition.validate()?;
        let label = definition.label();

        for m in &definition.models {
            if let Some(existing) = self.by_model.get(m) {
                return Err(QuirkError::RegistrationConflict(format!(
                    "{} from {} is already covered by {}",
                    m,
                    label,
                    existing.label()
                )));
            }
        }

        let mut new_labels: HashMap<&str, &str> = HashMap::new();
        for e in &definition.entities {
            let (Some(key), Some(name)) = (&e.translation_key, &e.fallback_name) else {
                continue;
            };
            let known = self
                .labels
                .get(key)
                .map(|l| (l.fallback_name.as_str(), l.origin.as_str()))
                .or_else(|| new_labels.get(key.as_str()).map(|n| (*n, label.as_str())));
            if let Some((known_name, origin)) = known {
                if known_name != name {
                    return Err(QuirkError::RegistrationConflict(format!(
                        "translation key '{}' is '{}' in {} but '{}' in {}",
                        key, known_name, origin, name, label
                    )));
                }
            }
            new_labels.insert(key, name);
        }

        // Nothing below can fail.
        let labels: Vec<(String, String)> = new_labels
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let definition = Arc::new(definition);
        for (key, fallback_name) in labels {
            self.labels.entry(key).or_insert_with(|| LabelEntry {
                fallback_name,
                origin: label.clone(),
            });
        }
        for m in &definition.models {
            self.by_model.insert(m.clone(), definition.clone());
        }
        self.definitions.push(definition.clone());

        info!(
            "Registered quirk {} covering {} model(s), {} datapoint(s)",
            label,
            definition.models.len(),
            definition.datapoints.len()
        );
        Ok(definition)
    }

    /// Exact lookup; no fuzzy matching.
    pub fn resolve(&self, manufacturer: &str, model: &str) -> Result<Arc<QuirkDefinition>> {
        self.by_model
            .get(&ManufacturerModel::new(manufacturer, model))
            .cloned()
            .ok_or_else(|| QuirkError::NotFound {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
            })
    }

    /// Resolves the identity and builds a live device from the definition.
    pub fn create_device(
        &self,
        identity: DeviceIdentity,
        options: DeviceOptions,
    ) -> Result<QuirkedDevice> {
        let definition = self.resolve(&identity.manufacturer, &identity.model)?;
        debug!("Applying quirk {} to {}", definition.label(), identity);
        QuirkedDevice::new(identity, definition, options)
    }

    /// Registers a JSON array of definition records, returning how many were
    /// added. Stops at the first failure.
    pub fn register_json(&mut self, json: &str) -> Result<usize> {
        let records: Vec<QuirkDefinition> = serde_json::from_str(json)?;
        let count = records.len();
        for record in records {
            self.register(record)?;
        }
        Ok(count)
    }

    /// Loads definition records from a JSON file.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let count = self.register_json(&text)?;
        info!("Loaded {} quirk(s) from {}", count, path.display());
        Ok(count)
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QuirkDefinition>> {
        self.definitions.iter()
    }

    /// Fallback display name registered for a translation key.
    pub fn fallback_name(&self, translation_key: &str) -> Option<&str> {
        self.labels
            .get(translation_key)
            .map(|l| l.fallback_name.as_str())
    }
}
