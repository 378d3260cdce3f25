//! Configuration for the engine.
//!
//! The field layout mirrors the persisted settings a gateway stores per
//! device. Every field has a default, so a partial JSON document loads.

use crate::error::EngineResult;
use latchlink_protocol::{
    ActionKind, AuthorizationIdType, DeviceKind, ListKind, LockAction, OpenerAction, QueryKind,
    ACTION_ACL_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

const DEFAULT_STATUS_INTERVAL_SECS: u64 = 1800;
const DEFAULT_HYBRID_STATUS_INTERVAL_SECS: u64 = 600;
const DEFAULT_BATTERY_INTERVAL_SECS: u64 = 1800;
const DEFAULT_CONFIG_INTERVAL_SECS: u64 = 3600;
const DEFAULT_LIST_INTERVAL_SECS: u64 = 1800;
const DEFAULT_RSSI_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const MIN_RETRY_DELAY_MS: u64 = 100;
const DEFAULT_BEACON_TIMEOUT_SECS: i32 = 60;
const MIN_BEACON_TIMEOUT_SECS: i32 = 10;

/// Configuration for one managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Lock or opener.
    pub device_kind: DeviceKind,
    /// Identity used when pairing.
    pub pairing_id_type: AuthorizationIdType,
    /// Retry behaviour for device commands.
    pub retry: RetryConfig,
    /// Poll intervals per query kind.
    pub intervals: PollIntervals,
    /// Seconds without a beacon before a restart. Zero or negative disables.
    pub beacon_timeout_secs: i32,
    /// Permission bits.
    pub acl: AclConfig,
    /// Feature switches.
    pub features: FeatureFlags,
    /// Maximum entries fetched per list.
    pub list_limits: ListLimits,
    /// Highest slot counts seen so far, persisted by the host.
    pub max_slots: MaxSlotCounts,
    /// Device id the configuration must match. Learned on first read when unset.
    pub expected_device_id: Option<u32>,
    /// Wait between requesting a list and fetching it.
    pub settle_delay_ms: u64,
    /// Deadline for an external session to confirm an action.
    pub external_deadline_ms: u64,
}

impl EngineConfig {
    /// Creates a default configuration for the given device kind.
    pub fn new(device_kind: DeviceKind) -> Self {
        Self {
            device_kind,
            pairing_id_type: AuthorizationIdType::default(),
            retry: RetryConfig::default(),
            intervals: PollIntervals::default(),
            beacon_timeout_secs: DEFAULT_BEACON_TIMEOUT_SECS,
            acl: AclConfig::default(),
            features: FeatureFlags::default(),
            list_limits: ListLimits::default(),
            max_slots: MaxSlotCounts::default(),
            expected_device_id: None,
            settle_delay_ms: 5_000,
            external_deadline_ms: 2_000,
        }
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON document from disk.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the poll intervals.
    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Sets the beacon timeout.
    pub fn with_beacon_timeout_secs(mut self, secs: i32) -> Self {
        self.beacon_timeout_secs = secs;
        self
    }

    /// Sets the permission bits.
    pub fn with_acl(mut self, acl: AclConfig) -> Self {
        self.acl = acl;
        self
    }

    /// Sets the feature switches.
    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Sets the list limits.
    pub fn with_list_limits(mut self, limits: ListLimits) -> Self {
        self.list_limits = limits;
        self
    }

    /// Sets the known slot counts.
    pub fn with_max_slots(mut self, slots: MaxSlotCounts) -> Self {
        self.max_slots = slots;
        self
    }

    /// Sets the settle delay.
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Pins the expected device id.
    pub fn with_expected_device_id(mut self, id: u32) -> Self {
        self.expected_device_id = Some(id);
        self
    }

    /// Applies the fail-safe floors and returns what was changed.
    pub fn sanitized(mut self) -> (Self, Vec<Correction>) {
        let mut corrections = Vec::new();
        let mut fix = |field: &'static str, from: String, to: String| {
            warn!(field, %from, %to, "correcting configuration value");
            corrections.push(Correction { field, from, to });
        };

        if self.retry.max_attempts == 0 {
            fix("retry.maxAttempts", "0".into(), DEFAULT_MAX_ATTEMPTS.to_string());
            self.retry.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.retry.delay_ms < MIN_RETRY_DELAY_MS {
            fix(
                "retry.delayMs",
                self.retry.delay_ms.to_string(),
                MIN_RETRY_DELAY_MS.to_string(),
            );
            self.retry.delay_ms = MIN_RETRY_DELAY_MS;
        }

        let intervals = &mut self.intervals;
        for (field, value, default) in [
            ("intervals.statusSecs", &mut intervals.status_secs, DEFAULT_STATUS_INTERVAL_SECS),
            (
                "intervals.hybridStatusSecs",
                &mut intervals.hybrid_status_secs,
                DEFAULT_HYBRID_STATUS_INTERVAL_SECS,
            ),
            ("intervals.batterySecs", &mut intervals.battery_secs, DEFAULT_BATTERY_INTERVAL_SECS),
            ("intervals.configSecs", &mut intervals.config_secs, DEFAULT_CONFIG_INTERVAL_SECS),
            ("intervals.keypadSecs", &mut intervals.keypad_secs, DEFAULT_LIST_INTERVAL_SECS),
            (
                "intervals.timeControlSecs",
                &mut intervals.time_control_secs,
                DEFAULT_LIST_INTERVAL_SECS,
            ),
            (
                "intervals.authorizationSecs",
                &mut intervals.authorization_secs,
                DEFAULT_LIST_INTERVAL_SECS,
            ),
        ] {
            if *value == 0 {
                fix(field, "0".into(), default.to_string());
                *value = default;
            }
        }

        if self.beacon_timeout_secs > 0 && self.beacon_timeout_secs < MIN_BEACON_TIMEOUT_SECS {
            fix(
                "beaconTimeoutSecs",
                self.beacon_timeout_secs.to_string(),
                "-1".into(),
            );
            self.beacon_timeout_secs = -1;
        }

        (self, corrections)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DeviceKind::Lock)
    }
}

/// One value changed by [`EngineConfig::sanitized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// Dotted field path.
    pub field: &'static str,
    /// Original value.
    pub from: String,
    /// Value used instead.
    pub to: String,
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.from, self.to)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempts per command, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay_ms: u64,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, MIN_RETRY_DELAY_MS)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, MIN_RETRY_DELAY_MS)
    }
}

/// Poll intervals, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollIntervals {
    /// Status, while no external session is active.
    pub status_secs: u64,
    /// Status, while an external session is active.
    pub hybrid_status_secs: u64,
    /// Battery.
    pub battery_secs: u64,
    /// Basic configuration.
    pub config_secs: u64,
    /// Keypad list.
    pub keypad_secs: u64,
    /// Time-control list.
    pub time_control_secs: u64,
    /// Authorization list.
    pub authorization_secs: u64,
    /// Signal strength. Zero disables.
    pub rssi_secs: u64,
}

impl PollIntervals {
    /// Interval for a periodic kind, `None` for event-driven or disabled kinds.
    pub fn interval_secs(&self, kind: QueryKind, external_session: bool) -> Option<u64> {
        match kind {
            QueryKind::Status if external_session => Some(self.hybrid_status_secs),
            QueryKind::Status => Some(self.status_secs),
            QueryKind::Battery => Some(self.battery_secs),
            QueryKind::Config => Some(self.config_secs),
            QueryKind::Keypad => Some(self.keypad_secs),
            QueryKind::TimeControl => Some(self.time_control_secs),
            QueryKind::Authorization => Some(self.authorization_secs),
            QueryKind::Rssi => (self.rssi_secs > 0).then_some(self.rssi_secs),
            QueryKind::AdvancedConfig | QueryKind::PinCheck | QueryKind::AuthLog => None,
        }
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            status_secs: DEFAULT_STATUS_INTERVAL_SECS,
            hybrid_status_secs: DEFAULT_HYBRID_STATUS_INTERVAL_SECS,
            battery_secs: DEFAULT_BATTERY_INTERVAL_SECS,
            config_secs: DEFAULT_CONFIG_INTERVAL_SECS,
            keypad_secs: DEFAULT_LIST_INTERVAL_SECS,
            time_control_secs: DEFAULT_LIST_INTERVAL_SECS,
            authorization_secs: DEFAULT_LIST_INTERVAL_SECS,
            rssi_secs: DEFAULT_RSSI_INTERVAL_SECS,
        }
    }
}

/// Persisted permission bits. A missing bit is a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AclConfig {
    /// One bit per action, indexed by [`ActionKind::acl_index`].
    pub actions: Vec<bool>,
    /// One bit per basic configuration key, in vocabulary order.
    pub basic_config: Vec<bool>,
    /// One bit per advanced configuration key, in vocabulary order.
    pub advanced_config: Vec<bool>,
}

impl AclConfig {
    /// Every bit set.
    pub fn allow_all() -> Self {
        let basic = LockAction::BASIC_CONFIG_KEYS
            .len()
            .max(OpenerAction::BASIC_CONFIG_KEYS.len());
        let advanced = LockAction::ADVANCED_CONFIG_KEYS
            .len()
            .max(OpenerAction::ADVANCED_CONFIG_KEYS.len());
        Self {
            actions: vec![true; ACTION_ACL_SIZE],
            basic_config: vec![true; basic],
            advanced_config: vec![true; advanced],
        }
    }

    /// Sets one action bit.
    pub fn with_action<A: ActionKind>(mut self, action: A, allowed: bool) -> Self {
        set_bit(&mut self.actions, action.acl_index(), allowed);
        self
    }

    /// Sets one basic configuration bit.
    pub fn with_basic_config(mut self, index: usize, allowed: bool) -> Self {
        set_bit(&mut self.basic_config, index, allowed);
        self
    }

    /// Sets one advanced configuration bit.
    pub fn with_advanced_config(mut self, index: usize, allowed: bool) -> Self {
        set_bit(&mut self.advanced_config, index, allowed);
        self
    }
}

fn set_bit(bits: &mut Vec<bool>, index: usize, value: bool) {
    if bits.len() <= index {
        bits.resize(index + 1, false);
    }
    bits[index] = value;
}

/// Feature switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Publish the keypad list.
    pub keypad_info: bool,
    /// Accept keypad commands.
    pub keypad_control: bool,
    /// Accept keypad code checks.
    pub keypad_code_check: bool,
    /// Publish the time-control list.
    pub time_control_info: bool,
    /// Accept time-control commands.
    pub time_control_control: bool,
    /// Publish the authorization list.
    pub authorization_info: bool,
    /// Accept authorization commands.
    pub authorization_control: bool,
    /// Publish the authorization log.
    pub publish_auth_log: bool,
    /// Route actions through an active external session.
    pub hybrid_actions: bool,
    /// Fall back to the radio when the external session does not confirm.
    pub hybrid_fallback: bool,
}

impl FeatureFlags {
    /// Every feature enabled.
    pub fn all() -> Self {
        Self {
            keypad_info: true,
            keypad_control: true,
            keypad_code_check: true,
            time_control_info: true,
            time_control_control: true,
            authorization_info: true,
            authorization_control: true,
            publish_auth_log: true,
            hybrid_actions: true,
            hybrid_fallback: true,
        }
    }

    /// Whether the list is published at all.
    pub fn info_enabled(&self, kind: ListKind) -> bool {
        match kind {
            ListKind::Keypad => self.keypad_info,
            ListKind::TimeControl => self.time_control_info,
            ListKind::Authorization => self.authorization_info,
            ListKind::AuthLog => self.publish_auth_log,
        }
    }

    /// Whether remote commands are accepted for the list.
    pub fn control_enabled(&self, kind: ListKind) -> bool {
        match kind {
            ListKind::Keypad => self.keypad_control,
            ListKind::TimeControl => self.time_control_control,
            ListKind::Authorization => self.authorization_control,
            ListKind::AuthLog => false,
        }
    }
}

/// Maximum entries fetched per list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListLimits {
    /// Keypad codes.
    pub keypad: usize,
    /// Time-control rules.
    pub time_control: usize,
    /// Authorizations.
    pub authorization: usize,
    /// Log records.
    pub auth_log: usize,
}

impl ListLimits {
    /// Limit for a list kind.
    pub fn for_kind(&self, kind: ListKind) -> usize {
        match kind {
            ListKind::Keypad => self.keypad,
            ListKind::TimeControl => self.time_control,
            ListKind::Authorization => self.authorization,
            ListKind::AuthLog => self.auth_log,
        }
    }
}

impl Default for ListLimits {
    fn default() -> Self {
        Self {
            keypad: 10,
            time_control: 10,
            authorization: 10,
            auth_log: 5,
        }
    }
}

/// Highest number of entries ever published per list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct MaxSlotCounts {
    /// Keypad codes.
    pub keypad: usize,
    /// Time-control rules.
    pub time_control: usize,
    /// Authorizations.
    pub authorization: usize,
}

impl MaxSlotCounts {
    /// Count for a list kind. The log has no slots.
    pub fn for_kind(&self, kind: ListKind) -> usize {
        match kind {
            ListKind::Keypad => self.keypad,
            ListKind::TimeControl => self.time_control,
            ListKind::Authorization => self.authorization,
            ListKind::AuthLog => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"deviceKind":"opener","retry":{"maxAttempts":5},"intervals":{"rssiSecs":0}}"#,
        )
        .unwrap();

        assert_eq!(config.device_kind, DeviceKind::Opener);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_ms, 100);
        assert_eq!(config.intervals.status_secs, 1800);
        assert_eq!(config.intervals.interval_secs(QueryKind::Rssi, false), None);
        assert_eq!(config.beacon_timeout_secs, 60);
        assert!(config.acl.actions.is_empty());
    }

    #[test]
    fn sanitize_applies_floors() {
        let config = EngineConfig::default()
            .with_retry(RetryConfig::new(0, 20))
            .with_beacon_timeout_secs(5)
            .with_intervals(PollIntervals {
                status_secs: 0,
                ..PollIntervals::default()
            });

        let (fixed, corrections) = config.sanitized();
        assert_eq!(fixed.retry.max_attempts, 3);
        assert_eq!(fixed.retry.delay_ms, 100);
        assert_eq!(fixed.beacon_timeout_secs, -1);
        assert_eq!(fixed.intervals.status_secs, 1800);
        assert_eq!(corrections.len(), 4);
        assert_eq!(corrections[0].to_string(), "retry.maxAttempts: 0 -> 3");
    }

    #[test]
    fn sanitize_keeps_valid_values() {
        let config = EngineConfig::default().with_beacon_timeout_secs(0);
        let (fixed, corrections) = config.clone().sanitized();
        assert_eq!(fixed, config);
        assert!(corrections.is_empty());
    }

    #[test]
    fn status_interval_switches_with_external_session() {
        let intervals = PollIntervals::default();
        assert_eq!(intervals.interval_secs(QueryKind::Status, false), Some(1800));
        assert_eq!(intervals.interval_secs(QueryKind::Status, true), Some(600));
        assert_eq!(intervals.interval_secs(QueryKind::PinCheck, false), None);
    }

    #[test]
    fn acl_builders_grow_bitmaps() {
        let acl = AclConfig::default().with_action(OpenerAction::ActivateCm, true);
        assert_eq!(acl.actions.len(), 13);
        assert!(acl.actions[12]);
        assert!(!acl.actions[0]);
        assert_eq!(AclConfig::allow_all().basic_config.len(), 16);
        assert_eq!(AclConfig::allow_all().advanced_config.len(), 22);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"beaconTimeoutSecs": -1, "settleDelayMs": 2500}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.beacon_timeout_secs, -1);
        assert_eq!(config.settle_delay_ms, 2500);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Io(_)));
    }
}
