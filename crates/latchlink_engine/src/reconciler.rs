//! Two-phase reconciliation of device-held entry lists.
//!
//! Reading a list takes two steps: a list request makes the device fill an
//! internal buffer, and after a settle delay the buffer is fetched. Every
//! write (add, update, delete) is followed by a fresh read so the published
//! list always reflects the device. Updates first re-read the list and
//! merge the caller's fields onto the fetched entry.
//!
//! Each list kind runs its own state machine:
//!
//! ```text
//! Idle -> ListRequested -> ListArrived(ready_at) -> Idle
//!                                        \-> Applying -> ListRequested
//! ```

use crate::config::{FeatureFlags, ListLimits, MaxSlotCounts};
use crate::device::DeviceOps;
use crate::radio::Radio;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::sink::CommandSink;
use latchlink_protocol::{
    cmd_result_of, ActionKind, CmdResult, ConfigSnapshot, Entry, EntryAction, EntryCommand,
    EntryOutcome, ListKind, PinStatus, Reason,
};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const CHECK_DECAY_MS: u64 = 120_000;

/// Ids known from the last successful fetch of one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIdentityCache {
    ids: BTreeSet<u32>,
}

impl EntryIdentityCache {
    /// Whether `id` was present in the last fetch.
    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    /// Number of known ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no ids are known.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Known ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    fn replace(&mut self, entries: &[Entry]) {
        self.ids = entries.iter().map(Entry::id).collect();
    }

    fn clear(&mut self) {
        self.ids.clear();
    }
}

/// What the caller of [`EntryReconciler::submit`] needs to know about the engine.
#[derive(Debug, Clone, Copy)]
pub struct EntryContext<'a> {
    /// Current configuration.
    pub config: &'a ConfigSnapshot,
    /// PIN verification outcome.
    pub pin: PinStatus,
    /// Feature switches.
    pub features: &'a FeatureFlags,
}

#[derive(Debug, Clone, PartialEq)]
enum WriteOp {
    Add(Entry),
    Update(Entry),
    Delete(u32),
}

impl WriteOp {
    fn label(&self) -> &'static str {
        match self {
            WriteOp::Add(_) => "add",
            WriteOp::Update(_) => "update",
            WriteOp::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Clone)]
enum Purpose {
    Refresh,
    Merge(EntryCommand),
    Write(WriteOp),
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    ListRequested { purpose: Purpose, retry: RetryState },
    ListArrived { purpose: Purpose, ready_at: u64 },
    Applying { op: WriteOp, retry: RetryState },
}

impl Phase {
    fn holds_command(&self) -> bool {
        match self {
            Phase::Idle => false,
            Phase::Applying { .. } => true,
            Phase::ListRequested { purpose, .. } | Phase::ListArrived { purpose, .. } => {
                !matches!(purpose, Purpose::Refresh)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ClassState {
    kind: ListKind,
    phase: Phase,
    cache: EntryIdentityCache,
    last_entries: Vec<Entry>,
    max_slots: usize,
}

#[derive(Debug, Clone, Default)]
struct CheckThrottle {
    invalid_count: u32,
    last_check_ms: u64,
}

impl CheckThrottle {
    /// Forgives one invalid check once `CHECK_DECAY_MS` per outstanding
    /// failure passed without any check.
    fn decay(&mut self, now: u64) {
        let quiet = CHECK_DECAY_MS.saturating_mul(u64::from(self.invalid_count));
        if self.invalid_count > 0 && now.saturating_sub(quiet) > self.last_check_ms {
            self.invalid_count -= 1;
        }
    }

    fn is_blocked(&self, now: u64) -> bool {
        let penalty = u64::from(self.invalid_count).saturating_pow(5);
        self.invalid_count > 0 && self.last_check_ms.saturating_add(penalty) > now
    }

    fn record_invalid(&mut self) {
        self.invalid_count = self.invalid_count.saturating_add(1);
        debug!(invalid_count = self.invalid_count, "keypad code check failed");
    }
}

/// Reconciliation state for every list kind.
#[derive(Debug, Clone)]
pub struct EntryReconciler<A> {
    classes: [ClassState; 4],
    policy: RetryPolicy,
    settle_delay_ms: u64,
    limits: ListLimits,
    throttle: CheckThrottle,
    _action: PhantomData<A>,
}

impl<A: ActionKind> EntryReconciler<A> {
    /// Creates an idle reconciler.
    pub fn new(
        policy: RetryPolicy,
        settle_delay_ms: u64,
        limits: ListLimits,
        max_slots: &MaxSlotCounts,
    ) -> Self {
        let classes = ListKind::ALL.map(|kind| ClassState {
            kind,
            phase: Phase::Idle,
            cache: EntryIdentityCache::default(),
            last_entries: Vec::new(),
            max_slots: max_slots.for_kind(kind),
        });
        Self {
            classes,
            policy,
            settle_delay_ms,
            limits,
            throttle: CheckThrottle::default(),
            _action: PhantomData,
        }
    }

    /// Ids known for a list.
    pub fn identity_cache(&self, kind: ListKind) -> &EntryIdentityCache {
        &self.classes[kind.index()].cache
    }

    /// Entries from the last fetch of a list.
    pub fn last_entries(&self, kind: ListKind) -> &[Entry] {
        &self.classes[kind.index()].last_entries
    }

    /// Highest slot count published for a list.
    pub fn max_slots(&self, kind: ListKind) -> usize {
        self.classes[kind.index()].max_slots
    }

    /// Whether any list is waiting for the device to fill its buffer.
    pub fn is_settling(&self) -> bool {
        self.classes
            .iter()
            .any(|c| matches!(c.phase, Phase::ListArrived { .. }))
    }

    /// Whether any list has work in progress.
    pub fn is_busy(&self) -> bool {
        self.classes.iter().any(|c| !matches!(c.phase, Phase::Idle))
    }

    /// Whether a list is idle.
    pub fn is_idle(&self, kind: ListKind) -> bool {
        matches!(self.classes[kind.index()].phase, Phase::Idle)
    }

    /// Starts a plain re-read of a list if it is idle.
    pub fn request_refresh(&mut self, kind: ListKind, now: u64) -> bool {
        let class = &mut self.classes[kind.index()];
        if !matches!(class.phase, Phase::Idle) {
            return false;
        }
        debug!(list = %kind, "list refresh requested");
        class.phase = Phase::ListRequested {
            purpose: Purpose::Refresh,
            retry: RetryState::new(now),
        };
        true
    }

    /// Drops all work and forgets every cached list.
    pub fn reset(&mut self) {
        for class in &mut self.classes {
            class.phase = Phase::Idle;
            class.cache.clear();
            class.last_entries.clear();
        }
        self.throttle = CheckThrottle::default();
    }

    /// Validates an inbound command and queues the device work it needs.
    ///
    /// Rejections and keypad check results are published immediately.
    /// Returns true if device work was queued.
    pub fn submit<S: CommandSink>(
        &mut self,
        kind: ListKind,
        payload: &str,
        ctx: EntryContext<'_>,
        sink: &mut S,
        now: u64,
    ) -> bool {
        match self.plan(kind, payload, ctx, now) {
            Ok(()) => true,
            Err(reason) => {
                info!(list = %kind, reason = reason.as_str(), "entry command not queued");
                sink.publish_entry_result(kind, EntryOutcome::Reason(reason));
                false
            }
        }
    }

    fn plan(
        &mut self,
        kind: ListKind,
        payload: &str,
        ctx: EntryContext<'_>,
        now: u64,
    ) -> Result<(), Reason> {
        if !kind.accepts_commands() {
            return Err(Reason::InvalidAction);
        }
        if !ctx.config.basic_valid {
            return Err(Reason::ConfigNotReady);
        }
        if ctx.pin != PinStatus::Valid {
            return Err(Reason::NoValidPinSet);
        }

        let cmd = EntryCommand::from_json(payload).map_err(|_| Reason::InvalidJson)?;
        let action = cmd.entry_action()?;

        if action == EntryAction::Check {
            if kind != ListKind::Keypad {
                return Err(Reason::InvalidAction);
            }
            if !ctx.features.keypad_code_check {
                return Err(Reason::CheckingKeypadCodesDisabled);
            }
            // Checks are answered from the cached list and never queue work.
            return Err(self.check_code(&cmd, now));
        }

        if !ctx.features.control_enabled(kind) {
            return Err(match kind {
                ListKind::Keypad => Reason::KeypadControlDisabled,
                ListKind::TimeControl => Reason::TimeControlControlDisabled,
                _ => Reason::AuthControlDisabled,
            });
        }
        if kind == ListKind::Keypad {
            if !ctx.config.basic.has_keypad {
                return Err(Reason::KeypadNotAvailable);
            }
            if !ctx.features.keypad_info {
                return Err(Reason::KeypadDisabled);
            }
        }

        let class = &self.classes[kind.index()];
        if class.phase.holds_command() {
            return Err(Reason::Busy);
        }

        let next = match action {
            EntryAction::Delete => {
                let id = cmd.entry_id().ok_or(Reason::MissingParameterId)?;
                if !class.cache.contains(id) {
                    return Err(Reason::UnknownId);
                }
                Purpose::Write(WriteOp::Delete(id))
            }
            EntryAction::Add => {
                let entry = match kind {
                    ListKind::Keypad => Entry::Keypad(cmd.keypad_entry(None)?),
                    ListKind::TimeControl => {
                        Entry::TimeControl(cmd.time_control_entry::<A>(None)?)
                    }
                    _ => return Err(Reason::AddActionNotSupported),
                };
                Purpose::Write(WriteOp::Add(entry))
            }
            EntryAction::Update => {
                let id = cmd.entry_id().ok_or(Reason::MissingParameterId)?;
                if !class.cache.contains(id) {
                    return Err(Reason::UnknownId);
                }
                cmd.validate_supplied::<A>()?;
                Purpose::Merge(cmd)
            }
            EntryAction::Check => return Err(Reason::InvalidAction),
        };

        let class = &mut self.classes[kind.index()];
        class.phase = match (std::mem::replace(&mut class.phase, Phase::Idle), next) {
            // A list already settling can be reused for the command.
            (Phase::ListArrived { ready_at, .. }, purpose) => Phase::ListArrived { purpose, ready_at },
            (_, Purpose::Write(op)) => Phase::Applying {
                op,
                retry: RetryState::new(now),
            },
            (_, purpose) => Phase::ListRequested {
                purpose,
                retry: RetryState::new(now),
            },
        };
        info!(list = %kind, action = ?action, "entry command queued");
        Ok(())
    }

    fn check_code(&mut self, cmd: &EntryCommand, now: u64) -> Reason {
        let Some(id) = cmd.entry_id() else {
            return Reason::MissingParameterId;
        };
        let Some(code) = cmd.code_value() else {
            return Reason::MissingParameterCode;
        };

        self.throttle.decay(now);
        // A refused check still counts as an attempt and extends the lockout.
        let blocked = self.throttle.is_blocked(now);
        self.throttle.last_check_ms = now;
        if blocked {
            return Reason::CheckingCodesBlockedTooManyInvalid;
        }

        let stored = self.classes[ListKind::Keypad.index()]
            .last_entries
            .iter()
            .find_map(|e| match e {
                Entry::Keypad(k) if k.id == id => Some(k.code),
                _ => None,
            });
        match stored {
            Some(c) if c == code => {
                self.throttle.invalid_count = 0;
                Reason::CodeValid
            }
            Some(_) => {
                self.throttle.record_invalid();
                Reason::CodeNotValid
            }
            None => {
                self.throttle.record_invalid();
                Reason::UnknownId
            }
        }
    }

    /// Fetches every list whose settle delay elapsed and ages the keypad
    /// code check throttle. Costs no radio exchange.
    pub fn settle<D, S>(&mut self, device: &mut D, sink: &mut S, now: u64)
    where
        D: DeviceOps<Action = A>,
        S: CommandSink,
    {
        self.throttle.decay(now);
        for index in 0..self.classes.len() {
            let ready = matches!(
                self.classes[index].phase,
                Phase::ListArrived { ready_at, .. } if now >= ready_at
            );
            if !ready {
                continue;
            }
            let kind = self.classes[index].kind;
            let limit = self.limits.for_kind(kind);
            let class = &mut self.classes[index];
            let Phase::ListArrived { purpose, .. } = std::mem::replace(&mut class.phase, Phase::Idle)
            else {
                continue;
            };

            let mut entries: Vec<Entry> = device
                .fetch_entries(kind)
                .into_iter()
                .filter(|e| e.kind() == kind)
                .collect();
            if kind == ListKind::AuthLog {
                entries.sort_by_key(|e| std::cmp::Reverse(e.id()));
            } else {
                entries.sort_by_key(Entry::id);
            }
            entries.truncate(limit);
            debug!(list = %kind, count = entries.len(), "list fetched");

            class.cache.replace(&entries);
            sink.publish_entry_list(kind, &entries);
            if kind.has_slots() {
                if entries.len() > class.max_slots {
                    class.max_slots = entries.len();
                    sink.record_max_slot_count(kind, class.max_slots);
                }
                for slot in 0..class.max_slots {
                    sink.publish_entry_slot(kind, slot, entries.get(slot));
                }
            }

            class.phase = match purpose {
                Purpose::Refresh => Phase::Idle,
                Purpose::Write(op) => Phase::Applying {
                    op,
                    retry: RetryState::new(now),
                },
                Purpose::Merge(cmd) => match merge::<A>(&cmd, &entries) {
                    Ok(entry) => Phase::Applying {
                        op: WriteOp::Update(entry),
                        retry: RetryState::new(now),
                    },
                    Err(reason) => {
                        info!(list = %kind, reason = reason.as_str(), "update not applied");
                        sink.publish_entry_result(kind, EntryOutcome::Reason(reason));
                        Phase::Idle
                    }
                },
            };
            class.last_entries = entries;
        }
    }

    /// Performs the next due list request or write, if the radio is free.
    ///
    /// Returns the list and result of a write that finished.
    pub fn step<D, S>(
        &mut self,
        radio: &mut Radio<D>,
        sink: &mut S,
        now: u64,
    ) -> Option<(ListKind, CmdResult)>
    where
        D: DeviceOps<Action = A>,
        S: CommandSink,
    {
        let index = self.classes.iter().position(|c| match &c.phase {
            Phase::ListRequested { retry, .. } | Phase::Applying { retry, .. } => {
                retry.is_due(now)
            }
            _ => false,
        })?;
        if !radio.is_free() {
            return None;
        }

        let kind = self.classes[index].kind;
        let limit = self.limits.for_kind(kind);
        let settle_delay = self.settle_delay_ms;
        let policy = self.policy;
        let class = &mut self.classes[index];

        match std::mem::replace(&mut class.phase, Phase::Idle) {
            Phase::ListRequested { purpose, mut retry } => {
                let count = u32::try_from(limit).unwrap_or(u32::MAX);
                let result = radio.exchange(|d| d.list_entries(kind, 0, count))?;
                class.phase = match retry.record(&policy, result.is_ok(), now) {
                    RetryDecision::Done => Phase::ListArrived {
                        purpose,
                        ready_at: now.saturating_add(settle_delay),
                    },
                    RetryDecision::Retry { .. } => Phase::ListRequested { purpose, retry },
                    RetryDecision::Exhausted => {
                        warn!(list = %kind, "list request failed");
                        if let Purpose::Merge(_) = purpose {
                            sink.publish_entry_result(
                                kind,
                                EntryOutcome::Reason(Reason::FailedToRetrieveExistingEntry),
                            );
                        }
                        Phase::Idle
                    }
                };
                None
            }
            Phase::Applying { op, mut retry } => {
                let result = radio.exchange(|d| match &op {
                    WriteOp::Add(entry) => d.add_entry(entry),
                    WriteOp::Update(entry) => d.update_entry(entry),
                    WriteOp::Delete(id) => d.delete_entry(kind, *id),
                })?;
                let cmd = cmd_result_of(&result);
                match retry.record(&policy, result.is_ok(), now) {
                    RetryDecision::Retry { .. } => {
                        debug!(list = %kind, op = op.label(), result = cmd.as_str(), "entry write failed, retrying");
                        class.phase = Phase::Applying { op, retry };
                        None
                    }
                    RetryDecision::Done | RetryDecision::Exhausted => {
                        info!(list = %kind, op = op.label(), result = cmd.as_str(), "entry write finished");
                        sink.publish_entry_result(kind, EntryOutcome::Device(cmd));
                        class.phase = Phase::ListRequested {
                            purpose: Purpose::Refresh,
                            retry: RetryState::new(now),
                        };
                        Some((kind, cmd))
                    }
                }
            }
            other => {
                class.phase = other;
                None
            }
        }
    }
}

fn merge<A: ActionKind>(cmd: &EntryCommand, entries: &[Entry]) -> Result<Entry, Reason> {
    let id = cmd.entry_id().ok_or(Reason::MissingParameterId)?;
    let base = entries
        .iter()
        .find(|e| e.id() == id)
        .ok_or(Reason::FailedToRetrieveExistingEntry)?;
    Ok(match base {
        Entry::Keypad(b) => Entry::Keypad(cmd.keypad_entry(Some(b))?),
        Entry::TimeControl(b) => Entry::TimeControl(cmd.time_control_entry::<A>(Some(b))?),
        Entry::Authorization(b) => Entry::Authorization(cmd.authorization_entry(b)?),
        Entry::Log(_) => return Err(Reason::InvalidAction),
    })
}
