//! # LatchLink Protocol
//!
//! Device, entry and command types shared by the LatchLink gateway crates.
//!
//! This crate provides:
//! - Lock and opener action vocabularies behind one [`ActionKind`] trait
//! - Status snapshots with change detection
//! - Configuration blocks and the validity-tracking [`ConfigSnapshot`]
//! - Keypad, time-control, authorization and log entries
//! - Inbound entry command decoding and field validation
//! - Published result strings and reason codes
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod command;
mod config;
mod entry;
mod error;
mod query;
mod result;
mod snapshot;

pub use action::{
    is_echo, ActionAck, ActionKind, DeviceKind, LockAction, OpenerAction, ACTION_ACL_SIZE,
    IGNORED_ACTION_VALUES,
};
pub use command::{EntryAction, EntryCommand, Scalar};
pub use config::{AdvancedConfigBlock, ConfigBlock, ConfigScope, ConfigSnapshot};
pub use entry::{
    is_valid_keypad_code, parse_date_time, parse_time, AccessWindow, AuthorizationEntry, Entry,
    KeypadEntry, ListKind, LogEntry, TimeControlEntry, Weekdays, DATE_TIME_FORMAT, TIME_FORMAT,
};
pub use error::{ProtocolError, ProtocolResult};
pub use query::QueryKind;
pub use result::{
    cmd_result_of, AuthorizationIdType, CmdResult, DeviceError, DeviceResult, EntryOutcome,
    PinStatus, Reason, RetryStatus,
};
pub use snapshot::{
    BatteryReport, CompletionStatus, DeviceSnapshot, DeviceState, DoorSensorState, LockState,
    OpenerState, SnapshotField, Trigger,
};
