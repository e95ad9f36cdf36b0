//! # tuya-quirks
//!
//! Declarative adaptation of Tuya MCU datapoint devices to standard Zigbee
//! clusters: datapoint decoding, value transforms, fan-out to sibling
//! clusters and cross-endpoint buses, plus write-back and time sync.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tuya_quirks::{DeviceIdentity, DeviceOptions, QuirkRegistry, quirks};
//!
//! let mut registry = QuirkRegistry::new();
//! quirks::register_all(&mut registry)?;
//! let device = registry.create_device(
//!     DeviceIdentity::new("_TZE200_8ygsuhe1", "TS0601"),
//!     DeviceOptions::default(),
//! )?;
//! let outcome = device.handle_datapoint_report(&[0x00, 0x02, 0x02, 0x02, 0x00, 0x04, 0, 0, 1, 0x72])?;
//! # Ok::<(), tuya_quirks::QuirkError>(())
//! ```
//!
#[macro_use]
pub mod macros;
pub mod builder;
pub mod bus;
pub mod cluster;
pub mod config;
pub mod definition;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod quirks;
pub mod registry;
pub mod transform;
pub mod zcl;

pub use builder::{BatteryInfo, BatterySize, EntityOptions, QuirkBuilder};
pub use bus::{Bus, BusListener};
pub use cluster::{AttrValue, AttributeUpdate, Cluster, ClusterSpec};
pub use config::DeviceOptions;
pub use definition::{ClusterBinding, DatapointSpec, QuirkDefinition};
pub use device::{
    CommandOutcome, Configured, DeviceIdentity, OutboundCommand, QuirkedDevice, Transport,
};
pub use dispatch::{AppliedUpdate, Dispatch};
pub use error::{QuirkError, Result};
pub use protocol::{CommandType, DataType, DatapointFrame, DatapointValue};
pub use registry::QuirkRegistry;
pub use transform::{Scale, TransformRule};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
