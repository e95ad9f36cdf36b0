//! Built-in device tables.

pub mod air;
pub mod din_power;
pub mod sensor;

use crate::error::Result;
use crate::registry::QuirkRegistry;

/// Registers every built-in quirk. Stops at the first conflict, so callers
/// adding their own definitions should register those afterwards.
pub fn register_all(registry: &mut QuirkRegistry) -> Result<()> {
    din_power::register(registry)?;
    sensor::register(registry)?;
    air::register(registry)?;
    Ok(())
}
