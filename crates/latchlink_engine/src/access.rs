//! Permission lookups for remote actions and configuration keys.

use crate::config::AclConfig;
use latchlink_protocol::{ActionKind, ConfigScope};

/// Read-only view of the persisted permission bits.
#[derive(Debug, Clone, Default)]
pub struct AccessControlGate {
    actions: Vec<bool>,
    basic_config: Vec<bool>,
    advanced_config: Vec<bool>,
}

impl AccessControlGate {
    /// Loads the gate from configuration.
    pub fn new(acl: &AclConfig) -> Self {
        Self {
            actions: acl.actions.clone(),
            basic_config: acl.basic_config.clone(),
            advanced_config: acl.advanced_config.clone(),
        }
    }

    /// Whether a remote action may run.
    pub fn is_allowed<A: ActionKind>(&self, action: A) -> bool {
        bit(&self.actions, action.acl_index())
    }

    /// Whether the configuration key at `index` in its vocabulary may be changed.
    pub fn is_config_key_allowed(&self, scope: ConfigScope, index: usize) -> bool {
        match scope {
            ConfigScope::Basic => bit(&self.basic_config, index),
            ConfigScope::Advanced => bit(&self.advanced_config, index),
        }
    }
}

fn bit(bits: &[bool], index: usize) -> bool {
    bits.get(index).copied().unwrap_or(false)
}
