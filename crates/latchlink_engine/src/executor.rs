//! Drives one remote action to completion.

use crate::access::AccessControlGate;
use crate::device::DeviceOps;
use crate::radio::Radio;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::sink::CommandSink;
use latchlink_protocol::{cmd_result_of, ActionKind, CmdResult, DeviceError, RetryStatus};
use tracing::{debug, info, warn};

/// How an accepted action reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Over the radio.
    Direct,
    /// Through an external session that must confirm before the deadline.
    External {
        /// Time by which the session must confirm.
        deadline_ms: u64,
    },
}

/// The single action slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAction<A> {
    /// The action.
    pub action: A,
    /// Attempt bookkeeping.
    pub retry: RetryState,
    /// Delivery route.
    pub route: Route,
}

/// Result of [`CommandExecutor::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The action now occupies the pending slot.
    Accepted,
    /// The permission bit is cleared; nothing was queued.
    Denied,
}

/// Terminal outcome of a pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorEvent<A> {
    /// The device performed the action.
    Completed(A),
    /// Every attempt failed.
    Exhausted {
        /// The abandoned action.
        action: A,
        /// The last result.
        result: CmdResult,
    },
}

/// Holds at most one pending action and retries it within the policy bound.
///
/// A new action replaces one that has not completed yet.
#[derive(Debug, Clone)]
pub struct CommandExecutor<A> {
    pending: Option<PendingAction<A>>,
    policy: RetryPolicy,
    fallback: bool,
}

impl<A: ActionKind> CommandExecutor<A> {
    /// Creates an executor. With `fallback`, an unconfirmed external action
    /// is retried over the radio instead of failing.
    pub fn new(policy: RetryPolicy, fallback: bool) -> Self {
        Self {
            pending: None,
            policy,
            fallback,
        }
    }

    /// The pending action, if any.
    pub fn pending(&self) -> Option<&PendingAction<A>> {
        self.pending.as_ref()
    }

    /// Whether an action is pending.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drops the pending action.
    pub fn clear(&mut self) -> Option<A> {
        self.pending.take().map(|p| p.action)
    }

    /// Queues an action if the gate allows it.
    pub fn submit(
        &mut self,
        action: A,
        gate: &AccessControlGate,
        route: Route,
        now: u64,
    ) -> SubmitOutcome {
        if !gate.is_allowed(action) {
            info!(action = action.as_str(), "action denied by access control");
            return SubmitOutcome::Denied;
        }
        if let Some(previous) = &self.pending {
            debug!(
                replaced = previous.action.as_str(),
                action = action.as_str(),
                "replacing pending action"
            );
        }
        self.pending = Some(PendingAction {
            action,
            retry: RetryState::new(now),
            route,
        });
        SubmitOutcome::Accepted
    }

    /// Performs the next attempt if one is due and the radio is free.
    pub fn step<D, S>(
        &mut self,
        radio: &mut Radio<D>,
        sink: &mut S,
        now: u64,
    ) -> Option<ExecutorEvent<A>>
    where
        D: DeviceOps<Action = A>,
        S: CommandSink,
    {
        let pending = self.pending.as_mut()?;
        if pending.route != Route::Direct || !pending.retry.is_due(now) {
            return None;
        }

        let action = pending.action;
        let result = radio.exchange(|device| device.perform_action(action))?;
        let cmd = cmd_result_of(&result);
        let transient = result.as_ref().err().is_some_and(DeviceError::is_transient);
        sink.publish_cmd_result(cmd);

        match pending.retry.record(&self.policy, result.is_ok(), now) {
            RetryDecision::Done => {
                info!(action = action.as_str(), attempts = pending.retry.attempts, "action completed");
                self.pending = None;
                sink.publish_retry(RetryStatus::Idle);
                Some(ExecutorEvent::Completed(action))
            }
            RetryDecision::Retry { at } => {
                warn!(
                    action = action.as_str(),
                    attempt = pending.retry.attempts,
                    result = cmd.as_str(),
                    transient,
                    next_at = at,
                    "action failed, retrying"
                );
                sink.publish_retry(RetryStatus::Attempt(pending.retry.attempts));
                None
            }
            RetryDecision::Exhausted => {
                warn!(
                    action = action.as_str(),
                    attempts = pending.retry.attempts,
                    result = cmd.as_str(),
                    transient,
                    "action failed, giving up"
                );
                self.pending = None;
                sink.publish_retry(RetryStatus::Failed);
                Some(ExecutorEvent::Exhausted {
                    action,
                    result: cmd,
                })
            }
        }
    }

    /// Expires an external action whose deadline passed.
    pub fn check_external_deadline<S: CommandSink>(
        &mut self,
        sink: &mut S,
        now: u64,
    ) -> Option<ExecutorEvent<A>> {
        match self.pending.map(|p| p.route) {
            Some(Route::External { deadline_ms }) if now >= deadline_ms => {
                debug!("external session did not confirm in time");
                self.abandon_external(sink, CmdResult::ExternalTimeout, now)
            }
            _ => None,
        }
    }

    /// Applies the external session's confirmation.
    pub fn on_external_result<S: CommandSink>(
        &mut self,
        ok: bool,
        sink: &mut S,
        now: u64,
    ) -> Option<ExecutorEvent<A>> {
        let pending = self.pending?;
        if !matches!(pending.route, Route::External { .. }) {
            return None;
        }
        if ok {
            info!(action = pending.action.as_str(), "external session completed action");
            self.pending = None;
            sink.publish_cmd_result(CmdResult::Success);
            sink.publish_retry(RetryStatus::Idle);
            return Some(ExecutorEvent::Completed(pending.action));
        }
        self.abandon_external(sink, CmdResult::Failed, now)
    }

    fn abandon_external<S: CommandSink>(
        &mut self,
        sink: &mut S,
        result: CmdResult,
        now: u64,
    ) -> Option<ExecutorEvent<A>> {
        let pending = self.pending.as_mut()?;
        if self.fallback {
            info!(action = pending.action.as_str(), "falling back to radio");
            pending.route = Route::Direct;
            pending.retry = RetryState::new(now);
            return None;
        }
        let action = pending.action;
        self.pending = None;
        sink.publish_cmd_result(result);
        sink.publish_retry(RetryStatus::Failed);
        Some(ExecutorEvent::Exhausted { action, result })
    }
}
