//! Per-device event channels.
//!
//! A bus decouples a publisher (usually the Tuya manufacturer cluster) from
//! any number of listeners (standard clusters on other endpoints). Delivery
//! is synchronous, in subscription order, and one failing listener never
//! suppresses delivery to the others.

use crate::cluster::AttrValue;
use crate::error::{QuirkError, Result};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Receiver side of a bus channel.
pub trait BusListener: Send + Sync {
    fn on_event(&self, event: &str, value: &AttrValue) -> Result<()>;
}

/// A named channel with a bounded listener list.
pub struct Bus {
    name: String,
    capacity: usize,
    listeners: RwLock<Vec<Arc<dyn BusListener>>>,
}

impl Bus {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Adds a listener. Subscribing the same listener twice is a no-op.
    pub fn subscribe(&self, listener: Arc<dyn BusListener>) -> Result<()> {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Ok(());
        }
        if listeners.len() >= self.capacity {
            return Err(QuirkError::InvalidArgument(format!(
                "bus '{}' is full ({} listeners)",
                self.name, self.capacity
            )));
        }
        listeners.push(listener);
        Ok(())
    }

    /// Delivers `event` to every listener and returns how many accepted it.
    pub fn publish(&self, event: &str, value: &AttrValue) -> usize {
        // Snapshot so listeners may touch other buses without holding our lock.
        let listeners: Vec<Arc<dyn BusListener>> = self.listeners.read().clone();
        debug!(
            "bus '{}': {} = {} -> {} listener(s)",
            self.name,
            event,
            value,
            listeners.len()
        );

        let mut delivered = 0;
        for listener in listeners {
            match listener.on_event(event, value) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("bus '{}': listener failed on '{}': {}", self.name, event, e),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// The channels of one device, created at construction and dropped with it.
#[derive(Debug, Default)]
pub struct BusSet {
    channels: BTreeMap<String, Arc<Bus>>,
}

impl BusSet {
    pub fn new<I, S>(names: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels = names
            .into_iter()
            .map(|n| {
                let name = n.into();
                (name.clone(), Arc::new(Bus::new(name, capacity)))
            })
            .collect();
        Self { channels }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Bus>> {
        self.channels.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
