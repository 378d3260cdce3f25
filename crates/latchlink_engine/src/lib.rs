//! # LatchLink Engine
//!
//! Device synchronization and command orchestration for one BLE smart lock
//! or opener.
//!
//! This crate provides:
//! - [`SyncEngine`]: the tick-driven composition of everything below
//! - [`PollScheduler`]: per-query-kind poll timers and immediate requests
//! - [`RetryPolicy`]: bounded, fixed-delay retries
//! - [`CommandExecutor`]: the single pending remote action
//! - [`EntryReconciler`]: two-phase list reconciliation for keypad codes,
//!   time-control rules and authorizations
//! - [`ConfigUpdater`]: remote configuration writes
//! - [`BeaconWatchdog`]: restart detection for a stuck radio stack
//! - [`AccessControlGate`]: permission bits for actions and configuration keys
//!
//! ## Design Principles
//!
//! - **Single exchange**: a tick performs at most one radio exchange, enforced
//!   by [`Radio`]
//! - **No blocking waits**: settle delays are timed states advanced by ticks
//! - **Injected collaborators**: the device ([`DeviceOps`]), the message bus
//!   ([`CommandSink`]) and time ([`Clock`]) are traits
//! - **One engine, two vocabularies**: locks and openers differ only in their
//!   [`latchlink_protocol::ActionKind`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod clock;
mod config;
mod config_update;
mod device;
mod engine;
mod error;
mod executor;
mod radio;
mod reconciler;
mod retry;
mod scheduler;
mod sink;
mod watchdog;

pub use access::AccessControlGate;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AclConfig, Correction, EngineConfig, FeatureFlags, ListLimits, MaxSlotCounts, PollIntervals,
    RetryConfig,
};
pub use config_update::ConfigUpdater;
pub use device::{DeviceCall, DeviceOps, MockDevice, MockOp};
pub use engine::{
    DeviceEvent, EnginePhase, EngineState, EngineStats, RestartReason, SyncEngine, Tick,
};
pub use error::{EngineError, EngineResult};
pub use executor::{CommandExecutor, ExecutorEvent, PendingAction, Route, SubmitOutcome};
pub use radio::Radio;
pub use reconciler::{EntryContext, EntryIdentityCache, EntryReconciler};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::PollScheduler;
pub use sink::{CommandSink, Published, RecordingSink};
pub use watchdog::{BeaconWatchdog, WatchdogVerdict, BOOT_GRACE_MS, POSTPONE_WINDOW_MS};
