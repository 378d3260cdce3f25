//! Remote actions for locks and openers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of slots in the persisted action permission array.
///
/// Lock actions occupy indices 0..=8, opener actions 9..=16.
pub const ACTION_ACL_SIZE: usize = 17;

/// The kind of device managed by an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// A smart lock.
    #[default]
    Lock,
    /// An intercom opener.
    Opener,
}

impl DeviceKind {
    /// Returns the lowercase name of the device kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Lock => "lock",
            DeviceKind::Opener => "opener",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by the lock and opener action vocabularies.
///
/// The engine is written once against this trait; each device kind
/// supplies its own action names, permission indices and configuration
/// key vocabularies.
pub trait ActionKind: Copy + Eq + fmt::Debug + 'static {
    /// The device kind this vocabulary belongs to.
    const DEVICE: DeviceKind;

    /// Every action, in permission-index order.
    const ALL: &'static [Self];

    /// Keys of the basic configuration block that may be changed remotely.
    const BASIC_CONFIG_KEYS: &'static [&'static str];

    /// Keys of the advanced configuration block that may be changed remotely.
    const ADVANCED_CONFIG_KEYS: &'static [&'static str];

    /// The canonical camelCase name.
    fn as_str(&self) -> &'static str;

    /// Index of this action's bit in the permission array.
    fn acl_index(&self) -> usize;

    /// Parses an inbound action name.
    ///
    /// Accepts the canonical name and the same name with its first letter
    /// capitalised.
    fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| matches_name(input, action.as_str()))
    }
}

fn matches_name(input: &str, name: &str) -> bool {
    if input == name {
        return true;
    }
    let (mut a, mut b) = (input.chars(), name.chars());
    match (a.next(), b.next()) {
        (Some(x), Some(y)) if x == y.to_ascii_uppercase() => a.as_str() == b.as_str(),
        _ => false,
    }
}

/// Actions understood by a smart lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockAction {
    /// Retract the bolt.
    Unlock,
    /// Extend the bolt.
    Lock,
    /// Unlock and pull the latch.
    Unlatch,
    /// Unlock, wait, then lock again.
    LockNgo,
    /// Lock 'n' go with unlatching.
    LockNgoUnlatch,
    /// Lock with two full turns.
    FullLock,
    /// Configured key fob action 1.
    FobAction1,
    /// Configured key fob action 2.
    FobAction2,
    /// Configured key fob action 3.
    FobAction3,
}

impl ActionKind for LockAction {
    const DEVICE: DeviceKind = DeviceKind::Lock;

    const ALL: &'static [Self] = &[
        LockAction::Unlock,
        LockAction::Lock,
        LockAction::Unlatch,
        LockAction::LockNgo,
        LockAction::LockNgoUnlatch,
        LockAction::FullLock,
        LockAction::FobAction1,
        LockAction::FobAction2,
        LockAction::FobAction3,
    ];

    const BASIC_CONFIG_KEYS: &'static [&'static str] = &[
        "name",
        "latitude",
        "longitude",
        "autoUnlatch",
        "pairingEnabled",
        "buttonEnabled",
        "ledEnabled",
        "ledBrightness",
        "timeZoneOffset",
        "dstMode",
        "fobAction1",
        "fobAction2",
        "fobAction3",
        "singleLock",
        "advertisingMode",
        "timeZone",
    ];

    const ADVANCED_CONFIG_KEYS: &'static [&'static str] = &[
        "unlockedPositionOffsetDegrees",
        "lockedPositionOffsetDegrees",
        "singleLockedPositionOffsetDegrees",
        "unlockedToLockedTransitionOffsetDegrees",
        "lockNgoTimeout",
        "singleButtonPressAction",
        "doubleButtonPressAction",
        "detachedCylinder",
        "batteryType",
        "automaticBatteryTypeDetection",
        "unlatchDuration",
        "autoLockTimeOut",
        "autoUnLockDisabled",
        "nightModeEnabled",
        "nightModeStartTime",
        "nightModeEndTime",
        "nightModeAutoLockEnabled",
        "nightModeAutoUnlockDisabled",
        "nightModeImmediateLockOnStart",
        "autoLockEnabled",
        "immediateAutoLockEnabled",
        "autoUpdateEnabled",
    ];

    fn as_str(&self) -> &'static str {
        match self {
            LockAction::Unlock => "unlock",
            LockAction::Lock => "lock",
            LockAction::Unlatch => "unlatch",
            LockAction::LockNgo => "lockNgo",
            LockAction::LockNgoUnlatch => "lockNgoUnlatch",
            LockAction::FullLock => "fullLock",
            LockAction::FobAction1 => "fobAction1",
            LockAction::FobAction2 => "fobAction2",
            LockAction::FobAction3 => "fobAction3",
        }
    }

    fn acl_index(&self) -> usize {
        match self {
            LockAction::Unlock => 0,
            LockAction::Lock => 1,
            LockAction::Unlatch => 2,
            LockAction::LockNgo => 3,
            LockAction::LockNgoUnlatch => 4,
            LockAction::FullLock => 5,
            LockAction::FobAction1 => 6,
            LockAction::FobAction2 => 7,
            LockAction::FobAction3 => 8,
        }
    }
}

/// Actions understood by an intercom opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenerAction {
    /// Enable ring-to-open.
    #[serde(rename = "activateRTO")]
    ActivateRto,
    /// Disable ring-to-open.
    #[serde(rename = "deactivateRTO")]
    DeactivateRto,
    /// Buzz the door open.
    #[serde(rename = "electricStrikeActuation")]
    ElectricStrikeActuation,
    /// Enable continuous mode.
    #[serde(rename = "activateCM")]
    ActivateCm,
    /// Disable continuous mode.
    #[serde(rename = "deactivateCM")]
    DeactivateCm,
    /// Configured key fob action 1.
    #[serde(rename = "fobAction1")]
    FobAction1,
    /// Configured key fob action 2.
    #[serde(rename = "fobAction2")]
    FobAction2,
    /// Configured key fob action 3.
    #[serde(rename = "fobAction3")]
    FobAction3,
}

impl ActionKind for OpenerAction {
    const DEVICE: DeviceKind = DeviceKind::Opener;

    const ALL: &'static [Self] = &[
        OpenerAction::ActivateRto,
        OpenerAction::DeactivateRto,
        OpenerAction::ElectricStrikeActuation,
        OpenerAction::ActivateCm,
        OpenerAction::DeactivateCm,
        OpenerAction::FobAction1,
        OpenerAction::FobAction2,
        OpenerAction::FobAction3,
    ];

    const BASIC_CONFIG_KEYS: &'static [&'static str] = &[
        "name",
        "latitude",
        "longitude",
        "pairingEnabled",
        "buttonEnabled",
        "ledFlashEnabled",
        "timeZoneOffset",
        "dstMode",
        "fobAction1",
        "fobAction2",
        "fobAction3",
        "operatingMode",
        "advertisingMode",
        "timeZone",
    ];

    const ADVANCED_CONFIG_KEYS: &'static [&'static str] = &[
        "intercomID",
        "busModeSwitch",
        "shortCircuitDuration",
        "electricStrikeDelay",
        "randomElectricStrikeDelay",
        "electricStrikeDuration",
        "disableRtoAfterRing",
        "rtoTimeout",
        "doorbellSuppression",
        "doorbellSuppressionDuration",
        "soundRing",
        "soundOpen",
        "soundRto",
        "soundCm",
        "soundConfirmation",
        "soundLevel",
        "singleButtonPressAction",
        "doubleButtonPressAction",
        "batteryType",
        "automaticBatteryTypeDetection",
    ];

    fn as_str(&self) -> &'static str {
        match self {
            OpenerAction::ActivateRto => "activateRTO",
            OpenerAction::DeactivateRto => "deactivateRTO",
            OpenerAction::ElectricStrikeActuation => "electricStrikeActuation",
            OpenerAction::ActivateCm => "activateCM",
            OpenerAction::DeactivateCm => "deactivateCM",
            OpenerAction::FobAction1 => "fobAction1",
            OpenerAction::FobAction2 => "fobAction2",
            OpenerAction::FobAction3 => "fobAction3",
        }
    }

    fn acl_index(&self) -> usize {
        match self {
            OpenerAction::ActivateRto => 9,
            OpenerAction::DeactivateRto => 10,
            OpenerAction::ElectricStrikeActuation => 11,
            OpenerAction::ActivateCm => 12,
            OpenerAction::DeactivateCm => 13,
            OpenerAction::FobAction1 => 14,
            OpenerAction::FobAction2 => 15,
            OpenerAction::FobAction3 => 16,
        }
    }
}

/// Outcome published on the action topic right after a command arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionAck {
    /// The action was accepted and queued.
    Ack,
    /// The action name is not part of the device's vocabulary.
    UnknownAction,
    /// The permission bit for the action is cleared.
    Denied,
    /// The engine cannot take actions right now.
    Error,
}

impl ActionAck {
    /// Returns the published string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionAck::Ack => "ack",
            ActionAck::UnknownAction => "unknown_action",
            ActionAck::Denied => "denied",
            ActionAck::Error => "error",
        }
    }
}

impl fmt::Display for ActionAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values the engine itself writes to the action topic.
///
/// Receiving one of these back must not be treated as a new command.
pub const IGNORED_ACTION_VALUES: &[&str] = &["", "--", "ack", "unknown_action", "denied", "error"];

/// Returns true if an inbound action payload is an echo of our own output.
pub fn is_echo(payload: &str) -> bool {
    IGNORED_ACTION_VALUES.contains(&payload.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_and_capitalised() {
        assert_eq!(LockAction::parse("unlock"), Some(LockAction::Unlock));
        assert_eq!(LockAction::parse("Unlock"), Some(LockAction::Unlock));
        assert_eq!(LockAction::parse("LockNgo"), Some(LockAction::LockNgo));
        assert_eq!(LockAction::parse("UNLOCK"), None);
        assert_eq!(LockAction::parse("activateRTO"), None);
        assert_eq!(
            OpenerAction::parse("ElectricStrikeActuation"),
            Some(OpenerAction::ElectricStrikeActuation)
        );
    }

    #[test]
    fn acl_indices_are_disjoint() {
        let mut seen = [false; ACTION_ACL_SIZE];
        for action in LockAction::ALL {
            assert!(!seen[action.acl_index()]);
            seen[action.acl_index()] = true;
        }
        for action in OpenerAction::ALL {
            assert!(!seen[action.acl_index()]);
            seen[action.acl_index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn serde_names_match_as_str() {
        for action in OpenerAction::ALL {
            let json = serde_json::to_string(action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
        for action in LockAction::ALL {
            let json = serde_json::to_string(action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn echo_values_are_ignored() {
        assert!(is_echo("ack"));
        assert!(is_echo(""));
        assert!(is_echo("--"));
        assert!(!is_echo("unlock"));
    }

    #[test]
    fn config_key_vocabularies() {
        assert_eq!(LockAction::BASIC_CONFIG_KEYS.len(), 16);
        assert_eq!(LockAction::ADVANCED_CONFIG_KEYS.len(), 22);
        assert_eq!(OpenerAction::BASIC_CONFIG_KEYS.len(), 14);
        assert_eq!(OpenerAction::ADVANCED_CONFIG_KEYS.len(), 20);
    }
}
