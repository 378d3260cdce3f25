//! Device configuration blocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which configuration block a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigScope {
    /// Basic configuration.
    Basic,
    /// Advanced configuration.
    Advanced,
}

/// Basic configuration as read from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBlock {
    /// Device identifier, stable across reads of the same device.
    pub device_id: u32,
    /// User-assigned device name.
    pub name: String,
    /// Whether a keypad is paired.
    pub has_keypad: bool,
    /// Firmware version string.
    pub firmware: String,
    /// Hardware revision string.
    pub hardware: String,
    /// Remaining settings, keyed by their published names.
    pub values: BTreeMap<String, String>,
}

impl ConfigBlock {
    /// Current value of a remotely settable key, as text.
    pub fn current_value(&self, key: &str) -> Option<&str> {
        if key == "name" {
            return Some(&self.name);
        }
        self.values.get(key).map(String::as_str)
    }
}

/// Advanced configuration as read from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedConfigBlock {
    /// Settings keyed by their published names.
    pub values: BTreeMap<String, String>,
}

impl AdvancedConfigBlock {
    /// Current value of a key, as text.
    pub fn current_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Last successfully read configuration.
///
/// Contents survive a failed read; the `*_valid` flags do not. Consumers
/// must not trust a block whose flag is cleared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSnapshot {
    /// Basic block.
    pub basic: ConfigBlock,
    /// Whether `basic` reflects the device.
    pub basic_valid: bool,
    /// Advanced block.
    pub advanced: AdvancedConfigBlock,
    /// Whether `advanced` reflects the device.
    pub advanced_valid: bool,
}

impl ConfigSnapshot {
    /// Current value of a key in the given scope, when that block is valid.
    pub fn current_value(&self, scope: ConfigScope, key: &str) -> Option<&str> {
        match scope {
            ConfigScope::Basic if self.basic_valid => self.basic.current_value(key),
            ConfigScope::Advanced if self.advanced_valid => self.advanced.current_value(key),
            _ => None,
        }
    }

    /// Invalidates both blocks without dropping their contents.
    pub fn invalidate(&mut self) {
        self.basic_valid = false;
        self.advanced_valid = false;
    }
}
