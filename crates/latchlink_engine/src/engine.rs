//! The per-device synchronization engine.
//!
//! [`SyncEngine`] owns one device and drives it from a cooperative host
//! loop. Each call to [`SyncEngine::update`] is one tick and performs at
//! most one radio exchange, chosen in this order:
//!
//! 1. the pending remote action, if an attempt is due
//! 2. the next queued configuration write
//! 3. the next entry list request or write
//! 4. the highest-priority due query
//!
//! While an entry list is settling the radio stays reserved and none of
//! the above run.

use crate::access::AccessControlGate;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::config_update::ConfigUpdater;
use crate::device::DeviceOps;
use crate::error::{EngineError, EngineResult};
use crate::executor::{CommandExecutor, ExecutorEvent, PendingAction, Route, SubmitOutcome};
use crate::radio::Radio;
use crate::reconciler::{EntryContext, EntryReconciler};
use crate::retry::RetryPolicy;
use crate::scheduler::PollScheduler;
use crate::sink::CommandSink;
use crate::watchdog::{BeaconWatchdog, WatchdogVerdict};
use latchlink_protocol::{
    is_echo, ActionAck, ActionKind, ConfigSnapshot, DeviceError, DeviceSnapshot, ListKind,
    PinStatus, QueryKind, SnapshotField,
};
use std::fmt;
use tracing::{debug, error, info, trace, warn};

const CONFIG_RETRY_DELAY_MS: u64 = 10_000;
const MAX_ID_MISMATCHES: u32 = 10;
const STATUS_FOLLOW_UP_MS: u64 = 10_000;
const MAX_STATUS_SIGNALS: u8 = 5;

/// Why the engine asked for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// No beacon within the configured timeout.
    BeaconTimeout,
    /// The radio stack reported an unrecoverable fault.
    BleStackFault,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::BeaconTimeout => f.write_str("beacon timeout"),
            RestartReason::BleStackFault => f.write_str("BLE stack fault"),
        }
    }
}

/// Top-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Not paired; every tick attempts pairing.
    Unpaired,
    /// Paired and synchronizing.
    Paired,
    /// Waiting for the host to restart the device. Terminal.
    RestartPending(RestartReason),
}

/// Externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not paired.
    Unpaired,
    /// Paired with no command work outstanding.
    Idle,
    /// Paired with an action, entry command or configuration write outstanding.
    Busy,
    /// Waiting for a restart.
    RestartPending,
}

impl EngineState {
    /// Returns true if the engine is paired.
    pub fn is_paired(&self) -> bool {
        matches!(self, EngineState::Idle | EngineState::Busy)
    }

    /// Returns true if the engine will not contact the device again.
    pub fn is_halted(&self) -> bool {
        matches!(self, EngineState::RestartPending)
    }
}

/// Outcome of one [`SyncEngine::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep calling `update`.
    Continue,
    /// Restart the device now. Returned once.
    RestartRequested(RestartReason),
    /// A restart was requested earlier; nothing was done.
    Halted,
}

/// Notification pushed by the device outside of the poll schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device reported a status change.
    StatusUpdated,
    /// Re-arms status change notifications.
    StatusReset,
}

/// Counters about engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Ticks run.
    pub ticks: u64,
    /// Radio exchanges made.
    pub exchanges: u64,
    /// Pairing attempts.
    pub pair_attempts: u64,
    /// Actions the device performed.
    pub actions_completed: u64,
    /// Actions abandoned after the last attempt.
    pub actions_failed: u64,
    /// Queries serviced.
    pub queries_serviced: u64,
    /// Queries whose exchange failed.
    pub query_failures: u64,
    /// Entry writes finished, successfully or not.
    pub entry_writes: u64,
    /// Last device error seen by a query.
    pub last_error: Option<String>,
}

/// Synchronizes one lock or opener with the message bus.
pub struct SyncEngine<D: DeviceOps, S: CommandSink, C: Clock> {
    config: EngineConfig,
    radio: Radio<D>,
    sink: S,
    clock: C,
    phase: EnginePhase,
    gate: AccessControlGate,
    policy: RetryPolicy,
    scheduler: PollScheduler,
    executor: CommandExecutor<D::Action>,
    reconciler: EntryReconciler<D::Action>,
    config_updater: ConfigUpdater<D::Action>,
    watchdog: BeaconWatchdog,
    snapshot: Option<DeviceSnapshot>,
    previous_snapshot: Option<DeviceSnapshot>,
    config_snapshot: ConfigSnapshot,
    pin_status: PinStatus,
    expected_device_id: Option<u32>,
    id_mismatches: u32,
    status_updated: bool,
    status_signals: u8,
    status_failures: u32,
    last_state_change_ms: u64,
    external_session: bool,
    bus_connected: bool,
    last_rssi: Option<i32>,
    stats: EngineStats,
}

impl<D: DeviceOps, S: CommandSink, C: Clock> SyncEngine<D, S, C> {
    /// Creates an engine for a device that still has to be paired.
    ///
    /// Configuration values below their floors are corrected. Fails if the
    /// configuration names a different device kind than `D` manages.
    pub fn new(config: EngineConfig, device: D, sink: S, clock: C) -> EngineResult<Self> {
        let (config, corrections) = config.sanitized();
        if config.device_kind != D::Action::DEVICE {
            return Err(EngineError::config(format!(
                "configuration is for a {} but the device is a {}",
                config.device_kind,
                D::Action::DEVICE
            )));
        }
        if !corrections.is_empty() {
            info!(count = corrections.len(), "configuration corrected");
        }

        let now = clock.now_ms();
        let policy = RetryPolicy::from_config(&config.retry);
        info!(
            device = %config.device_kind,
            max_attempts = policy.max_attempts(),
            delay_ms = policy.delay_ms(),
            beacon_timeout_secs = config.beacon_timeout_secs,
            "engine initialized"
        );

        Ok(Self {
            gate: AccessControlGate::new(&config.acl),
            policy,
            scheduler: PollScheduler::new(&config.intervals, now),
            executor: CommandExecutor::new(policy, config.features.hybrid_fallback),
            reconciler: EntryReconciler::new(
                policy,
                config.settle_delay_ms,
                config.list_limits.clone(),
                &config.max_slots,
            ),
            config_updater: ConfigUpdater::new(policy),
            watchdog: BeaconWatchdog::new(config.beacon_timeout_secs),
            expected_device_id: config.expected_device_id,
            radio: Radio::new(device),
            sink,
            clock,
            phase: EnginePhase::Unpaired,
            snapshot: None,
            previous_snapshot: None,
            config_snapshot: ConfigSnapshot::default(),
            pin_status: PinStatus::Unknown,
            id_mismatches: 0,
            status_updated: false,
            status_signals: 0,
            status_failures: 0,
            last_state_change_ms: 0,
            external_session: false,
            bus_connected: true,
            last_rssi: None,
            stats: EngineStats::default(),
            config,
        })
    }

    /// Runs one tick.
    pub fn update(&mut self) -> Tick {
        if let EnginePhase::RestartPending(_) = self.phase {
            return Tick::Halted;
        }
        let now = self.clock.now_ms();
        self.stats.ticks += 1;
        self.radio.begin_tick();

        if self.radio.device().is_stack_faulted() {
            return self.request_restart(RestartReason::BleStackFault);
        }

        let tick = match self.phase {
            EnginePhase::Unpaired => {
                self.try_pair();
                Tick::Continue
            }
            _ => self.paired_tick(now),
        };
        if self.radio.used_this_tick() {
            self.watchdog.postpone(now);
        }
        tick
    }

    fn try_pair(&mut self) {
        self.stats.pair_attempts += 1;
        let id_type = self.config.pairing_id_type;
        match self.radio.exchange(|d| d.pair(id_type)) {
            Some(Ok(())) => {
                info!(attempts = self.stats.pair_attempts, "paired");
                self.phase = EnginePhase::Paired;
                self.scheduler.request_immediate(QueryKind::Config);
            }
            Some(Err(e)) => debug!(error = %e, "pairing failed"),
            None => {}
        }
    }

    fn paired_tick(&mut self, now: u64) -> Tick {
        if let Some(at) = self.radio.device().last_beacon_timestamp() {
            self.watchdog.on_beacon_observed(at);
        }
        if self.watchdog.check_and_maybe_restart(now) == WatchdogVerdict::RestartRequested {
            return self.request_restart(RestartReason::BeaconTimeout);
        }

        if let Some(event) = self.executor.check_external_deadline(&mut self.sink, now) {
            self.on_executor_event(event, now);
        }

        self.reconciler
            .settle(self.radio.device_mut(), &mut self.sink, now);
        if self.reconciler.is_settling() {
            trace!("entry list settling, radio reserved");
            return Tick::Continue;
        }

        if let Some(event) = self.executor.step(&mut self.radio, &mut self.sink, now) {
            self.on_executor_event(event, now);
        }
        if self
            .config_updater
            .step(&mut self.radio, &mut self.sink, now)
        {
            self.scheduler.request_immediate(QueryKind::Config);
        }
        if self
            .reconciler
            .step(&mut self.radio, &mut self.sink, now)
            .is_some()
        {
            self.stats.entry_writes += 1;
        }
        self.service_query(now);
        Tick::Continue
    }

    fn request_restart(&mut self, reason: RestartReason) -> Tick {
        error!(%reason, "restart required");
        self.phase = EnginePhase::RestartPending(reason);
        Tick::RestartRequested(reason)
    }

    fn on_executor_event(&mut self, event: ExecutorEvent<D::Action>, now: u64) {
        match event {
            ExecutorEvent::Completed(action) => {
                self.stats.actions_completed += 1;
                debug!(action = action.as_str(), "refreshing status after action");
                if !self.external_session {
                    self.set_status_updated(true);
                    self.scheduler.request_immediate(QueryKind::Status);
                }
                let interval = self.config.intervals.interval_secs(QueryKind::Status, self.external_session);
                if interval.is_some_and(|secs| secs.saturating_mul(1000) > STATUS_FOLLOW_UP_MS) {
                    self.scheduler
                        .schedule_once(QueryKind::Status, now.saturating_add(STATUS_FOLLOW_UP_MS));
                }
            }
            ExecutorEvent::Exhausted { .. } => self.stats.actions_failed += 1,
        }
    }

    fn set_status_updated(&mut self, updated: bool) {
        if self.status_updated != updated {
            self.status_updated = updated;
            self.sink.publish_status_updated(updated);
        }
    }

    fn is_eligible(&self, kind: QueryKind, radio_free: bool) -> bool {
        let needs_radio = match kind {
            QueryKind::Rssi => false,
            QueryKind::PinCheck => self.radio.device().security_pin_set(),
            _ => true,
        };
        if needs_radio && !radio_free {
            return false;
        }
        if kind != QueryKind::Status && !self.bus_connected {
            return false;
        }
        match kind {
            QueryKind::Status | QueryKind::Battery | QueryKind::Config | QueryKind::Rssi => true,
            QueryKind::AdvancedConfig | QueryKind::PinCheck => self.config_snapshot.basic_valid,
            QueryKind::Keypad
            | QueryKind::TimeControl
            | QueryKind::Authorization
            | QueryKind::AuthLog => list_kind(kind).is_some_and(|list| self.list_eligible(list)),
        }
    }

    fn list_eligible(&self, list: ListKind) -> bool {
        self.config_snapshot.basic_valid
            && self.pin_status == PinStatus::Valid
            && self.config.features.info_enabled(list)
            && (list != ListKind::Keypad || self.config_snapshot.basic.has_keypad)
            && self.reconciler.is_idle(list)
    }

    fn service_query(&mut self, now: u64) {
        let radio_free = self.radio.is_free();
        let Some(kind) = self
            .scheduler
            .next_due(now, |k| self.is_eligible(k, radio_free))
        else {
            return;
        };
        trace!(query = %kind, "servicing query");
        self.stats.queries_serviced += 1;

        match kind {
            QueryKind::Status => self.query_status(now),
            QueryKind::Battery => {
                if let Some(result) = self.radio.exchange(|d| d.request_battery()) {
                    self.scheduler.mark_serviced(kind, now);
                    match result {
                        Ok(report) => self.sink.publish_battery(&report),
                        Err(e) => self.note_failure(kind, &e),
                    }
                }
            }
            QueryKind::Config => self.query_config(now),
            QueryKind::AdvancedConfig => {
                if let Some(result) = self.radio.exchange(|d| d.request_advanced_config()) {
                    self.scheduler.mark_serviced(kind, now);
                    match result {
                        Ok(block) => {
                            self.sink.publish_advanced_config(&block);
                            self.config_snapshot.advanced = block;
                            self.config_snapshot.advanced_valid = true;
                        }
                        Err(e) => {
                            self.config_snapshot.advanced_valid = false;
                            self.note_failure(kind, &e);
                        }
                    }
                }
            }
            QueryKind::PinCheck => self.query_pin(now),
            QueryKind::Keypad
            | QueryKind::TimeControl
            | QueryKind::Authorization
            | QueryKind::AuthLog => {
                self.scheduler.mark_serviced(kind, now);
                if let Some(list) = list_kind(kind) {
                    self.reconciler.request_refresh(list, now);
                    if self
                        .reconciler
                        .step(&mut self.radio, &mut self.sink, now)
                        .is_some()
                    {
                        self.stats.entry_writes += 1;
                    }
                }
            }
            QueryKind::Rssi => {
                self.scheduler.mark_serviced(kind, now);
                let rssi = self.radio.device().signal_strength();
                if let Some(value) = rssi.filter(|v| self.last_rssi != Some(*v)) {
                    self.sink.publish_rssi(value);
                    self.last_rssi = Some(value);
                }
            }
        }
    }

    fn note_failure(&mut self, kind: QueryKind, error: &DeviceError) {
        warn!(query = %kind, %error, transient = error.is_transient(), "query failed");
        self.stats.query_failures += 1;
        self.stats.last_error = Some(error.to_string());
    }

    fn query_status(&mut self, now: u64) {
        let Some(result) = self.radio.exchange(|d| d.request_status()) else {
            return;
        };
        self.scheduler.mark_serviced(QueryKind::Status, now);

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.note_failure(QueryKind::Status, &e);
                self.status_failures += 1;
                if self.status_failures < self.policy.max_attempts() {
                    self.scheduler.schedule_once(
                        QueryKind::Status,
                        now.saturating_add(self.policy.delay_ms()),
                    );
                } else {
                    self.status_failures = 0;
                }
                return;
            }
        };
        self.status_failures = 0;

        let changed = snapshot.diff(self.snapshot.as_ref());
        if changed.contains(&SnapshotField::State) {
            self.last_state_change_ms = now;
        }
        let follow_up = snapshot.state.is_transitional()
            && now.saturating_sub(self.last_state_change_ms) < STATUS_FOLLOW_UP_MS;
        let settled = snapshot.state.is_settled();
        debug!(state = ?snapshot.state, changed = changed.len(), "status read");

        self.sink.publish_status(&snapshot, &changed);
        self.previous_snapshot = self.snapshot.replace(snapshot);

        self.set_status_updated(follow_up);
        if follow_up {
            self.scheduler.schedule_once(
                QueryKind::Status,
                now.saturating_add(self.policy.delay_ms()),
            );
        }
        if settled && self.config.features.publish_auth_log {
            self.scheduler.request_immediate(QueryKind::AuthLog);
        }
    }

    fn query_config(&mut self, now: u64) {
        let Some(result) = self.radio.exchange(|d| d.request_config()) else {
            return;
        };
        self.scheduler.mark_serviced(QueryKind::Config, now);

        let block = match result {
            Ok(block) => block,
            Err(e) => {
                self.note_failure(QueryKind::Config, &e);
                self.config_snapshot.invalidate();
                self.scheduler
                    .schedule_once(QueryKind::Config, now.saturating_add(CONFIG_RETRY_DELAY_MS));
                return;
            }
        };

        match self.expected_device_id {
            None => {
                info!(device_id = block.device_id, "device id learned");
                self.expected_device_id = Some(block.device_id);
            }
            Some(expected) if expected != block.device_id => {
                self.id_mismatches += 1;
                if self.id_mismatches < MAX_ID_MISMATCHES {
                    warn!(
                        expected,
                        reported = block.device_id,
                        mismatches = self.id_mismatches,
                        "configuration belongs to another device"
                    );
                    self.config_snapshot.invalidate();
                    self.scheduler.schedule_once(
                        QueryKind::Config,
                        now.saturating_add(CONFIG_RETRY_DELAY_MS),
                    );
                    return;
                }
                warn!(expected, reported = block.device_id, "adopting reported device id");
                self.expected_device_id = Some(block.device_id);
            }
            Some(_) => {}
        }
        self.id_mismatches = 0;

        self.sink.publish_config(&block);
        self.config_snapshot.basic = block;
        self.config_snapshot.basic_valid = true;

        self.scheduler.request_immediate(QueryKind::AdvancedConfig);
        self.scheduler.request_immediate(QueryKind::PinCheck);
        let features = &self.config.features;
        if features.keypad_info && self.config_snapshot.basic.has_keypad {
            self.scheduler.request_immediate(QueryKind::Keypad);
        }
        if features.time_control_info {
            self.scheduler.request_immediate(QueryKind::TimeControl);
        }
        if features.authorization_info {
            self.scheduler.request_immediate(QueryKind::Authorization);
        }
    }

    fn query_pin(&mut self, now: u64) {
        let status = if !self.radio.device().security_pin_set() {
            PinStatus::NotSet
        } else {
            match self.radio.exchange(|d| d.verify_security_pin()) {
                None => return,
                Some(Ok(())) => PinStatus::Valid,
                Some(Err(DeviceError::Rejected)) => PinStatus::Invalid,
                Some(Err(e)) => {
                    self.note_failure(QueryKind::PinCheck, &e);
                    self.scheduler
                        .schedule_once(QueryKind::PinCheck, now.saturating_add(CONFIG_RETRY_DELAY_MS));
                    PinStatus::Unknown
                }
            }
        };
        self.scheduler.mark_serviced(QueryKind::PinCheck, now);
        if status != self.pin_status {
            info!(?status, "security PIN status");
        }
        self.pin_status = status;
        self.sink.publish_pin_status(status);
    }

    /// Handles an inbound action string.
    ///
    /// Returns the acknowledgement that was published, or `None` for a
    /// value that is an echo of an earlier acknowledgement.
    pub fn on_action_received(&mut self, payload: &str) -> Option<ActionAck> {
        let payload = payload.trim();
        if is_echo(payload) {
            return None;
        }
        let now = self.clock.now_ms();

        let ack = if self.phase != EnginePhase::Paired {
            ActionAck::Error
        } else if let Some(action) = D::Action::parse(payload) {
            let route = if self.external_session && self.config.features.hybrid_actions {
                Route::External {
                    deadline_ms: now.saturating_add(self.config.external_deadline_ms),
                }
            } else {
                Route::Direct
            };
            match self.executor.submit(action, &self.gate, route, now) {
                SubmitOutcome::Denied => ActionAck::Denied,
                SubmitOutcome::Accepted => {
                    if route != Route::Direct {
                        self.sink.publish_external_action(action.as_str());
                    }
                    ActionAck::Ack
                }
            }
        } else {
            debug!(payload, "unknown action");
            ActionAck::UnknownAction
        };

        self.sink.publish_action_ack(ack);
        Some(ack)
    }

    /// Handles an inbound entry command. Returns true if device work was queued.
    pub fn on_entry_command(&mut self, kind: ListKind, payload: &str) -> bool {
        let now = self.clock.now_ms();
        let ctx = EntryContext {
            config: &self.config_snapshot,
            pin: self.pin_status,
            features: &self.config.features,
        };
        self.reconciler
            .submit(kind, payload, ctx, &mut self.sink, now)
    }

    /// Handles an inbound configuration update. Returns true if writes were queued.
    pub fn on_config_update(&mut self, payload: &str) -> bool {
        let now = self.clock.now_ms();
        self.config_updater.submit(
            payload,
            &self.config_snapshot,
            self.pin_status,
            &self.gate,
            &mut self.sink,
            now,
        )
    }

    /// Requests a query on the next opportunity.
    pub fn on_query_request(&mut self, kind: QueryKind) {
        debug!(query = %kind, "immediate query requested");
        self.scheduler.request_immediate(kind);
    }

    /// Handles a notification pushed by the device.
    pub fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::StatusReset => self.status_signals = 0,
            DeviceEvent::StatusUpdated if self.external_session => {
                trace!("status event ignored during external session");
            }
            DeviceEvent::StatusUpdated if self.status_signals >= MAX_STATUS_SIGNALS => {
                trace!("status event ignored until reset");
            }
            DeviceEvent::StatusUpdated => {
                self.status_signals += 1;
                self.set_status_updated(true);
                self.scheduler.request_immediate(QueryKind::Status);
            }
        }
    }

    /// Marks whether an external session controls the device.
    pub fn set_external_session_active(&mut self, active: bool) {
        if self.external_session == active {
            return;
        }
        info!(active, "external session");
        self.external_session = active;
        self.scheduler.set_interval(
            QueryKind::Status,
            self.config.intervals.interval_secs(QueryKind::Status, active),
        );
    }

    /// Applies the external session's answer to a handed-off action.
    pub fn on_external_action_result(&mut self, ok: bool) {
        let now = self.clock.now_ms();
        if let Some(event) = self.executor.on_external_result(ok, &mut self.sink, now) {
            self.on_executor_event(event, now);
        }
    }

    /// Tells the engine whether the message bus is reachable.
    pub fn set_bus_connected(&mut self, connected: bool) {
        self.bus_connected = connected;
    }

    /// Forgets the pairing and all work in progress.
    pub fn unpair(&mut self) -> EngineResult<()> {
        if let EnginePhase::RestartPending(_) = self.phase {
            return Err(EngineError::InvalidStateTransition {
                from: "RestartPending".into(),
                to: "Unpaired".into(),
            });
        }
        if let Some(action) = self.executor.clear() {
            debug!(action = action.as_str(), "dropping pending action");
        }
        self.reconciler.reset();
        self.config_updater.clear();
        self.scheduler.reset_requests();
        self.config_snapshot.invalidate();
        self.pin_status = PinStatus::Unknown;
        self.status_updated = false;
        self.phase = EnginePhase::Unpaired;
        info!("unpaired");
        Ok(())
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Externally visible state.
    pub fn state(&self) -> EngineState {
        match self.phase {
            EnginePhase::Unpaired => EngineState::Unpaired,
            EnginePhase::RestartPending(_) => EngineState::RestartPending,
            EnginePhase::Paired
                if self.executor.has_pending()
                    || self.reconciler.is_busy()
                    || self.config_updater.is_busy() =>
            {
                EngineState::Busy
            }
            EnginePhase::Paired => EngineState::Idle,
        }
    }

    /// Activity counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            exchanges: self.radio.exchanges(),
            ..self.stats.clone()
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// PIN verification outcome.
    pub fn pin_status(&self) -> PinStatus {
        self.pin_status
    }

    /// Last configuration read.
    pub fn config_snapshot(&self) -> &ConfigSnapshot {
        &self.config_snapshot
    }

    /// Current and previous status readings.
    pub fn snapshots(&self) -> (Option<&DeviceSnapshot>, Option<&DeviceSnapshot>) {
        (self.snapshot.as_ref(), self.previous_snapshot.as_ref())
    }

    /// The shared status-updated flag.
    pub fn status_updated(&self) -> bool {
        self.status_updated
    }

    /// The pending action, if any.
    pub fn pending_action(&self) -> Option<&PendingAction<D::Action>> {
        self.executor.pending()
    }

    /// Poll timers.
    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Entry list state.
    pub fn reconciler(&self) -> &EntryReconciler<D::Action> {
        &self.reconciler
    }

    /// The managed device.
    pub fn device(&self) -> &D {
        self.radio.device()
    }

    /// Mutable access to the managed device.
    pub fn device_mut(&mut self) -> &mut D {
        self.radio.device_mut()
    }

    /// The publication sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the publication sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

fn list_kind(kind: QueryKind) -> Option<ListKind> {
    match kind {
        QueryKind::Keypad => Some(ListKind::Keypad),
        QueryKind::TimeControl => Some(ListKind::TimeControl),
        QueryKind::Authorization => Some(ListKind::Authorization),
        QueryKind::AuthLog => Some(ListKind::AuthLog),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AclConfig, FeatureFlags};
    use crate::device::{DeviceCall, MockDevice, MockOp};
    use crate::sink::{Published, RecordingSink};
    use latchlink_protocol::{
        CmdResult, DeviceKind, DeviceState, LockAction, LockState, OpenerAction, RetryStatus,
    };

    type LockEngine = SyncEngine<MockDevice<LockAction>, RecordingSink, ManualClock>;

    fn engine_with(config: EngineConfig, device: MockDevice<LockAction>) -> (LockEngine, ManualClock) {
        let clock = ManualClock::new(0);
        let engine = SyncEngine::new(config, device, RecordingSink::new(), clock.clone()).unwrap();
        (engine, clock)
    }

    fn config() -> EngineConfig {
        EngineConfig::new(DeviceKind::Lock)
            .with_acl(AclConfig::allow_all())
            .with_features(FeatureFlags::all())
    }

    fn run(engine: &mut LockEngine, clock: &ManualClock, ticks: usize) {
        for _ in 0..ticks {
            engine.update();
            clock.advance(1_000);
        }
    }

    #[test]
    fn rejects_mismatched_device_kind() {
        let result = SyncEngine::new(
            EngineConfig::new(DeviceKind::Opener),
            MockDevice::<LockAction>::new(),
            RecordingSink::new(),
            ManualClock::new(0),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));

        let opener = SyncEngine::new(
            EngineConfig::new(DeviceKind::Opener),
            MockDevice::<OpenerAction>::new(),
            RecordingSink::new(),
            ManualClock::new(0),
        );
        assert!(opener.is_ok());
    }

    #[test]
    fn pairs_then_reads_status_and_config() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        assert_eq!(engine.state(), EngineState::Unpaired);
        run(&mut engine, &clock, 2);

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(
            &engine.device().calls()[..2],
            &[DeviceCall::Pair, DeviceCall::RequestStatus]
        );
        run(&mut engine, &clock, 2);
        assert_eq!(engine.device().calls()[3], DeviceCall::RequestConfig);
        assert!(engine.config_snapshot().basic_valid);
    }

    #[test]
    fn failed_status_retries_then_waits_for_interval() {
        let status_calls =
            |engine: &LockEngine| engine.device().count_calls(|c| *c == DeviceCall::RequestStatus);
        let mut device = MockDevice::new();
        device.fail_next(MockOp::Status, DeviceError::Timeout, 3);
        let (mut engine, clock) =
            engine_with(config().with_retry(crate::config::RetryConfig::new(3, 100)), device);

        run(&mut engine, &clock, 60);
        assert_eq!(status_calls(&engine), 3);
        assert_eq!(engine.status_failures, 0);
        assert_eq!(engine.scheduler().once_at_ms(QueryKind::Status), None);
        let next = engine.scheduler().next_due_ms(QueryKind::Status).unwrap();
        assert!(next > clock.now_ms() + 1_700_000);
        assert!(next <= 4_000 + 1_800_000);

        engine.device_mut().fail_next(MockOp::Status, DeviceError::Busy, 1);
        engine.on_device_event(DeviceEvent::StatusUpdated);
        run(&mut engine, &clock, 1);
        assert_eq!(status_calls(&engine), 4);
        assert_eq!(engine.status_failures, 1);
        assert!(engine.scheduler().once_at_ms(QueryKind::Status).is_some());

        run(&mut engine, &clock, 1);
        assert_eq!(status_calls(&engine), 5);
        assert_eq!(engine.status_failures, 0);
        assert!(engine.snapshots().0.is_some());
    }

    #[test]
    fn never_more_than_one_exchange_per_tick() {
        let mut device = MockDevice::new();
        device.set_security_pin(true);
        device.fail_next(MockOp::Status, DeviceError::Timeout, 2);
        let (mut engine, clock) = engine_with(config(), device);

        let mut last = 0;
        for tick in 0..40 {
            if tick == 5 {
                engine.on_action_received("unlock");
                engine.on_entry_command(ListKind::TimeControl, r#"{"action":"add","time":"07:30","lockAction":"lock"}"#);
            }
            engine.update();
            let calls = engine.device().calls().len();
            assert!(calls - last <= 1, "tick {tick} made {} exchanges", calls - last);
            last = calls;
            clock.advance(500);
        }
    }

    #[test]
    fn pin_gates_list_queries() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        run(&mut engine, &clock, 10);
        assert_eq!(engine.pin_status(), PinStatus::NotSet);
        assert_eq!(
            engine
                .device()
                .count_calls(|c| matches!(c, DeviceCall::ListEntries(_))),
            0
        );
        assert!(!engine.on_entry_command(ListKind::Keypad, r#"{"action":"delete","codeId":1}"#));
        assert_eq!(
            engine.sink().entry_results(ListKind::Keypad),
            vec![latchlink_protocol::EntryOutcome::Reason(latchlink_protocol::Reason::NoValidPinSet)]
        );
    }

    #[test]
    fn status_event_is_capped_until_reset() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        run(&mut engine, &clock, 10);
        let before = engine
            .device()
            .count_calls(|c| *c == DeviceCall::RequestStatus);

        for _ in 0..7 {
            engine.on_device_event(DeviceEvent::StatusUpdated);
            run(&mut engine, &clock, 1);
        }
        let after = engine
            .device()
            .count_calls(|c| *c == DeviceCall::RequestStatus);
        assert_eq!(after - before, 5);

        engine.on_device_event(DeviceEvent::StatusReset);
        engine.on_device_event(DeviceEvent::StatusUpdated);
        run(&mut engine, &clock, 1);
        assert_eq!(
            engine
                .device()
                .count_calls(|c| *c == DeviceCall::RequestStatus),
            after + 1
        );
    }

    #[test]
    fn transitional_status_is_followed() {
        let mut device = MockDevice::new();
        device.set_snapshot(DeviceSnapshot::new(DeviceState::Lock(LockState::Unlocking)));
        let (mut engine, clock) = engine_with(config(), device);
        run(&mut engine, &clock, 2);
        assert!(engine.status_updated());

        engine
            .device_mut()
            .set_snapshot(DeviceSnapshot::new(DeviceState::Lock(LockState::Unlocked)));
        run(&mut engine, &clock, 2);
        assert!(!engine.status_updated());
        assert_eq!(
            engine.sink().count(|p| matches!(p, Published::StatusUpdated(_))),
            2
        );
    }

    #[test]
    fn device_id_mismatch_invalidates_config() {
        let config = config().with_expected_device_id(7);
        let (mut engine, clock) = engine_with(config, MockDevice::new());
        run(&mut engine, &clock, 6);
        assert!(!engine.config_snapshot().basic_valid);
        assert_eq!(
            engine.scheduler().once_at_ms(QueryKind::Config).map(|at| at > 10_000),
            Some(true)
        );
    }

    #[test]
    fn completed_action_refreshes_status() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        run(&mut engine, &clock, 10);
        engine.sink_mut().clear();

        assert_eq!(engine.on_action_received("lock"), Some(ActionAck::Ack));
        run(&mut engine, &clock, 1);
        assert_eq!(engine.sink().cmd_results(), vec![CmdResult::Success]);
        assert_eq!(engine.sink().retry_statuses(), vec![RetryStatus::Idle]);
        assert!(engine.scheduler().once_at_ms(QueryKind::Status).is_some());

        let before = engine
            .device()
            .count_calls(|c| *c == DeviceCall::RequestStatus);
        run(&mut engine, &clock, 1);
        assert_eq!(
            engine
                .device()
                .count_calls(|c| *c == DeviceCall::RequestStatus),
            before + 1
        );
    }

    #[test]
    fn actions_before_pairing_are_errors() {
        let mut device = MockDevice::new();
        device.fail_next(MockOp::Pair, DeviceError::Timeout, 10);
        let (mut engine, clock) = engine_with(config(), device);
        run(&mut engine, &clock, 1);

        assert_eq!(engine.on_action_received("unlock"), Some(ActionAck::Error));
        assert_eq!(engine.on_action_received("ack"), None);
        assert_eq!(engine.on_action_received(" denied "), None);
    }

    #[test]
    fn bus_disconnect_only_allows_status() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        engine.set_bus_connected(false);
        run(&mut engine, &clock, 6);
        assert!(engine
            .device()
            .calls()
            .iter()
            .skip(1)
            .all(|c| *c == DeviceCall::RequestStatus));
    }

    #[test]
    fn unpair_resets_and_repairs() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        run(&mut engine, &clock, 5);
        engine.on_action_received("unlock");
        engine.unpair().unwrap();

        assert_eq!(engine.state(), EngineState::Unpaired);
        assert!(engine.pending_action().is_none());
        assert!(!engine.config_snapshot().basic_valid);
        assert_eq!(engine.scheduler().immediate_mask(), 0);

        run(&mut engine, &clock, 1);
        assert_eq!(engine.device().calls().last(), Some(&DeviceCall::Pair));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn stack_fault_halts() {
        let (mut engine, clock) = engine_with(config(), MockDevice::new());
        run(&mut engine, &clock, 3);
        engine.device_mut().set_stack_faulted(true);
        let calls = engine.device().calls().len();

        assert_eq!(
            engine.update(),
            Tick::RestartRequested(RestartReason::BleStackFault)
        );
        assert_eq!(engine.update(), Tick::Halted);
        assert_eq!(engine.device().calls().len(), calls);
        assert!(engine.state().is_halted());
        assert!(matches!(
            engine.unpair(),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }
}
