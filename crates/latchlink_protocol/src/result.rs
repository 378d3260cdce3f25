//! Outcomes published back to the message bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result of one device command, as published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CmdResult {
    /// The device executed the command.
    Success,
    /// The device rejected the command.
    Failed,
    /// No response within the radio timeout.
    TimeOut,
    /// The device is still busy with a previous command.
    Working,
    /// The gateway is not paired with the device.
    NotPaired,
    /// Protocol or transport error.
    Error,
    /// An external session did not confirm the action in time.
    ExternalTimeout,
}

impl CmdResult {
    /// Returns the published string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CmdResult::Success => "success",
            CmdResult::Failed => "failed",
            CmdResult::TimeOut => "timeOut",
            CmdResult::Working => "working",
            CmdResult::NotPaired => "notPaired",
            CmdResult::Error => "error",
            CmdResult::ExternalTimeout => "externalTimeout",
        }
    }
}

impl fmt::Display for CmdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure of one device operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device answered with an error code.
    #[error("device rejected the command")]
    Rejected,
    /// No answer within the radio timeout.
    #[error("device did not respond in time")]
    Timeout,
    /// The device is busy.
    #[error("device busy")]
    Busy,
    /// The radio connection dropped.
    #[error("device disconnected")]
    Disconnected,
    /// Not paired.
    #[error("not paired with device")]
    NotPaired,
    /// Malformed response or framing error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DeviceError {
    /// Returns true if repeating the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::Timeout | DeviceError::Busy | DeviceError::Disconnected
        )
    }

    /// Maps the failure onto the published command result.
    pub fn cmd_result(&self) -> CmdResult {
        match self {
            DeviceError::Rejected => CmdResult::Failed,
            DeviceError::Timeout | DeviceError::Disconnected => CmdResult::TimeOut,
            DeviceError::Busy => CmdResult::Working,
            DeviceError::NotPaired => CmdResult::NotPaired,
            DeviceError::Protocol(_) => CmdResult::Error,
        }
    }
}

/// Maps any device result onto the published command result.
pub fn cmd_result_of<T>(result: &DeviceResult<T>) -> CmdResult {
    match result {
        Ok(_) => CmdResult::Success,
        Err(e) => e.cmd_result(),
    }
}

/// Reason codes for commands rejected before contacting the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    /// Payload is not a JSON object.
    InvalidJson,
    /// No `action` field.
    NoActionSet,
    /// `action` is not understood.
    InvalidAction,
    /// Configuration not yet read.
    ConfigNotReady,
    /// PIN missing or wrong.
    NoValidPinSet,
    /// Keypad info publishing disabled.
    KeypadDisabled,
    /// Keypad commands disabled.
    KeypadControlDisabled,
    /// No keypad paired with the device.
    KeypadNotAvailable,
    /// Time-control commands disabled.
    TimeControlControlDisabled,
    /// Authorization commands disabled.
    AuthControlDisabled,
    /// Another command for this list is still running.
    Busy,
    /// `id` missing.
    MissingParameterId,
    /// `name` missing.
    MissingParameterName,
    /// `code` missing.
    MissingParameterCode,
    /// `code` is not a valid keypad code.
    CodeInvalid,
    /// `id` not in the cached list.
    UnknownId,
    /// `time` missing.
    MissingParameterTime,
    /// `time` not `HH:MM`.
    InvalidTime,
    /// `lockAction` missing.
    MissingParameterLockAction,
    /// `lockAction` not in the device vocabulary.
    InvalidLockAction,
    /// `allowedFrom` malformed.
    InvalidAllowedFrom,
    /// `allowedUntil` malformed.
    InvalidAllowedUntil,
    /// `allowedFromTime` malformed.
    InvalidAllowedFromTime,
    /// `allowedUntilTime` malformed.
    InvalidAllowedUntilTime,
    /// Authorizations cannot be created remotely.
    AddActionNotSupported,
    /// The entry to update vanished between validation and fetch.
    FailedToRetrieveExistingEntry,
    /// Keypad code checks disabled.
    CheckingKeypadCodesDisabled,
    /// Too many invalid checks in a short time.
    CheckingCodesBlockedTooManyInvalid,
    /// Checked code matches.
    CodeValid,
    /// Checked code does not match.
    CodeNotValid,
}

impl Reason {
    /// Returns the published string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::InvalidJson => "invalidJson",
            Reason::NoActionSet => "noActionSet",
            Reason::InvalidAction => "invalidAction",
            Reason::ConfigNotReady => "configNotReady",
            Reason::NoValidPinSet => "noValidPinSet",
            Reason::KeypadDisabled => "keypadDisabled",
            Reason::KeypadControlDisabled => "keypadControlDisabled",
            Reason::KeypadNotAvailable => "keypadNotAvailable",
            Reason::TimeControlControlDisabled => "timeControlControlDisabled",
            Reason::AuthControlDisabled => "authControlDisabled",
            Reason::Busy => "busy",
            Reason::MissingParameterId => "MissingParameterId",
            Reason::MissingParameterName => "MissingParameterName",
            Reason::MissingParameterCode => "MissingParameterCode",
            Reason::CodeInvalid => "CodeInvalid",
            Reason::UnknownId => "UnknownId",
            Reason::MissingParameterTime => "MissingParameterTime",
            Reason::InvalidTime => "invalidTime",
            Reason::MissingParameterLockAction => "MissingParameterLockAction",
            Reason::InvalidLockAction => "invalidLockAction",
            Reason::InvalidAllowedFrom => "invalidAllowedFrom",
            Reason::InvalidAllowedUntil => "invalidAllowedUntil",
            Reason::InvalidAllowedFromTime => "invalidAllowedFromTime",
            Reason::InvalidAllowedUntilTime => "invalidAllowedUntilTime",
            Reason::AddActionNotSupported => "addActionNotSupported",
            Reason::FailedToRetrieveExistingEntry => "failedToRetrieveExistingEntry",
            Reason::CheckingKeypadCodesDisabled => "checkingKeypadCodesDisabled",
            Reason::CheckingCodesBlockedTooManyInvalid => "checkingCodesBlockedTooManyInvalid",
            Reason::CodeValid => "codeValid",
            Reason::CodeNotValid => "codeNotValid",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal or interim outcome of an entry command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Decided locally.
    Reason(Reason),
    /// Reported by the device.
    Device(CmdResult),
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOutcome::Reason(r) => r.fmt(f),
            EntryOutcome::Device(c) => c.fmt(f),
        }
    }
}

impl From<Reason> for EntryOutcome {
    fn from(reason: Reason) -> Self {
        EntryOutcome::Reason(reason)
    }
}

impl From<CmdResult> for EntryOutcome {
    fn from(result: CmdResult) -> Self {
        EntryOutcome::Device(result)
    }
}

/// Value of the retry counter topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// No action in flight.
    Idle,
    /// The given attempt failed and another follows.
    Attempt(u32),
    /// All attempts failed.
    Failed,
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStatus::Idle => f.write_str("--"),
            RetryStatus::Attempt(n) => write!(f, "{n}"),
            RetryStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome of verifying the stored security PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PinStatus {
    /// Not checked yet.
    #[default]
    Unknown,
    /// No PIN stored on the gateway.
    NotSet,
    /// Stored PIN accepted by the device.
    Valid,
    /// Stored PIN rejected by the device.
    Invalid,
}

impl PinStatus {
    /// Returns the published string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PinStatus::Unknown => "unknown",
            PinStatus::NotSet => "notSet",
            PinStatus::Valid => "valid",
            PinStatus::Invalid => "invalid",
        }
    }
}

/// Identity the gateway pairs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationIdType {
    /// Pair as a phone app.
    #[default]
    App,
    /// Pair as a bridge.
    Bridge,
}
