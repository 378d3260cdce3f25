//! Remote configuration changes.

use crate::access::AccessControlGate;
use crate::device::DeviceOps;
use crate::radio::Radio;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::sink::CommandSink;
use latchlink_protocol::{
    cmd_result_of, ActionKind, ConfigScope, ConfigSnapshot, DeviceError, PinStatus,
};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const GENERAL_KEY: &str = "general";

#[derive(Debug, Clone)]
struct ConfigWrite {
    scope: ConfigScope,
    key: String,
    value: String,
    retry: RetryState,
}

/// Validates configuration update requests and writes accepted keys one per tick.
#[derive(Debug, Clone)]
pub struct ConfigUpdater<A> {
    queue: VecDeque<ConfigWrite>,
    results: Map<String, Value>,
    policy: RetryPolicy,
    _action: PhantomData<A>,
}

impl<A: ActionKind> ConfigUpdater<A> {
    /// Creates an idle updater.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            results: Map::new(),
            policy,
            _action: PhantomData,
        }
    }

    /// Whether writes are queued.
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Drops queued writes and partial results.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.results.clear();
    }

    /// Handles one update request. Returns true if any write was queued.
    ///
    /// When nothing needs to be written the per-key results are published
    /// right away.
    pub fn submit<S: CommandSink>(
        &mut self,
        payload: &str,
        config: &ConfigSnapshot,
        pin: PinStatus,
        gate: &AccessControlGate,
        sink: &mut S,
        now: u64,
    ) -> bool {
        if self.is_busy() {
            publish_general(sink, "busy");
            return false;
        }
        let object = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(object)) => object,
            _ => {
                publish_general(sink, "invalidJson");
                return false;
            }
        };
        if !config.basic_valid {
            publish_general(sink, "configNotReady");
            return false;
        }
        if pin != PinStatus::Valid {
            publish_general(sink, "noValidPinSet");
            return false;
        }

        for (key, raw) in &object {
            let Some((scope, index)) = lookup::<A>(key) else {
                debug!(key = key.as_str(), "ignoring unknown configuration key");
                continue;
            };
            let value = text_value(raw);
            let outcome = if value.is_empty() {
                Some("noValueSet")
            } else if !gate.is_config_key_allowed(scope, index) {
                Some("accessDenied")
            } else if config.current_value(scope, key) == Some(value.as_str()) {
                Some("unchanged")
            } else {
                None
            };
            match outcome {
                Some(result) => {
                    self.results.insert(key.clone(), Value::from(result));
                }
                None => self.queue.push_back(ConfigWrite {
                    scope,
                    key: key.clone(),
                    value,
                    retry: RetryState::new(now),
                }),
            }
        }

        if self.queue.is_empty() {
            self.flush(sink);
            return false;
        }
        info!(writes = self.queue.len(), "configuration update queued");
        true
    }

    /// Performs the next queued write if it is due and the radio is free.
    ///
    /// Returns true when the last queued write finished.
    pub fn step<D, S>(&mut self, radio: &mut Radio<D>, sink: &mut S, now: u64) -> bool
    where
        D: DeviceOps<Action = A>,
        S: CommandSink,
    {
        let policy = self.policy;
        let Some(write) = self.queue.front_mut() else {
            return false;
        };
        if !write.retry.is_due(now) {
            return false;
        }
        let Some(result) =
            radio.exchange(|d| d.set_config_value(write.scope, &write.key, &write.value))
        else {
            return false;
        };

        let cmd = cmd_result_of(&result);
        let transient = result.as_ref().err().is_some_and(DeviceError::is_transient);
        match write.retry.record(&policy, result.is_ok(), now) {
            RetryDecision::Retry { .. } => {
                debug!(
                    key = write.key.as_str(),
                    result = cmd.as_str(),
                    transient,
                    "configuration write failed, retrying"
                );
                return false;
            }
            RetryDecision::Exhausted => {
                warn!(
                    key = write.key.as_str(),
                    result = cmd.as_str(),
                    transient,
                    "configuration write failed"
                );
            }
            RetryDecision::Done => {
                info!(key = write.key.as_str(), "configuration value written");
            }
        }
        let key = write.key.clone();
        self.queue.pop_front();
        self.results.insert(key, Value::from(cmd.as_str()));

        if self.queue.is_empty() {
            self.flush(sink);
            return true;
        }
        false
    }

    fn flush<S: CommandSink>(&mut self, sink: &mut S) {
        let results = Value::Object(std::mem::take(&mut self.results));
        sink.publish_config_update_result(&results.to_string());
    }
}

fn lookup<A: ActionKind>(key: &str) -> Option<(ConfigScope, usize)> {
    if let Some(index) = A::BASIC_CONFIG_KEYS.iter().position(|k| *k == key) {
        return Some((ConfigScope::Basic, index));
    }
    A::ADVANCED_CONFIG_KEYS
        .iter()
        .position(|k| *k == key)
        .map(|index| (ConfigScope::Advanced, index))
}

fn text_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
        Value::String(s) => s.trim().to_owned(),
        other => other.to_string(),
    }
}

fn publish_general<S: CommandSink>(sink: &mut S, reason: &str) {
    let mut map = Map::new();
    map.insert(GENERAL_KEY.to_owned(), Value::from(reason));
    sink.publish_config_update_result(&Value::Object(map).to_string());
}
