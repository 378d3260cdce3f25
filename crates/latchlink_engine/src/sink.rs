//! Outbound publication interface.

use latchlink_protocol::{
    ActionAck, AdvancedConfigBlock, BatteryReport, CmdResult, ConfigBlock, DeviceSnapshot, Entry,
    EntryOutcome, ListKind, PinStatus, RetryStatus, SnapshotField,
};

/// Receives everything the engine publishes.
///
/// Topic naming and payload encoding belong to the implementation; the
/// engine only decides what to publish and when.
pub trait CommandSink {
    /// Publishes a status reading and the fields that changed since the previous one.
    fn publish_status(&mut self, snapshot: &DeviceSnapshot, changed: &[SnapshotField]);

    /// Mirrors the shared status-updated flag.
    fn publish_status_updated(&mut self, updated: bool);

    /// Publishes a battery report.
    fn publish_battery(&mut self, report: &BatteryReport);

    /// Publishes the basic configuration.
    fn publish_config(&mut self, config: &ConfigBlock);

    /// Publishes the advanced configuration.
    fn publish_advanced_config(&mut self, config: &AdvancedConfigBlock);

    /// Publishes the PIN verification outcome.
    fn publish_pin_status(&mut self, status: PinStatus);

    /// Answers an inbound action.
    fn publish_action_ack(&mut self, ack: ActionAck);

    /// Publishes the result of one action attempt.
    fn publish_cmd_result(&mut self, result: CmdResult);

    /// Publishes the retry counter.
    fn publish_retry(&mut self, status: RetryStatus);

    /// Publishes the outcome of an entry command.
    fn publish_entry_result(&mut self, kind: ListKind, outcome: EntryOutcome);

    /// Publishes a full list.
    fn publish_entry_list(&mut self, kind: ListKind, entries: &[Entry]);

    /// Publishes one slot; `None` clears a slot that is no longer used.
    fn publish_entry_slot(&mut self, kind: ListKind, slot: usize, entry: Option<&Entry>);

    /// Reports a new highest slot count for the host to persist.
    fn record_max_slot_count(&mut self, kind: ListKind, count: usize);

    /// Publishes the per-key outcome of a configuration update, as JSON.
    fn publish_config_update_result(&mut self, json: &str);

    /// Hands an action to the external session.
    fn publish_external_action(&mut self, action: &str);

    /// Publishes the signal strength.
    fn publish_rssi(&mut self, rssi: i32);
}

/// One recorded publication.
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    /// [`CommandSink::publish_status`]
    Status(DeviceSnapshot, Vec<SnapshotField>),
    /// [`CommandSink::publish_status_updated`]
    StatusUpdated(bool),
    /// [`CommandSink::publish_battery`]
    Battery(BatteryReport),
    /// [`CommandSink::publish_config`]
    Config(ConfigBlock),
    /// [`CommandSink::publish_advanced_config`]
    AdvancedConfig(AdvancedConfigBlock),
    /// [`CommandSink::publish_pin_status`]
    PinStatus(PinStatus),
    /// [`CommandSink::publish_action_ack`]
    ActionAck(ActionAck),
    /// [`CommandSink::publish_cmd_result`]
    CmdResult(CmdResult),
    /// [`CommandSink::publish_retry`]
    Retry(RetryStatus),
    /// [`CommandSink::publish_entry_result`]
    EntryResult(ListKind, EntryOutcome),
    /// [`CommandSink::publish_entry_list`]
    EntryList(ListKind, Vec<Entry>),
    /// [`CommandSink::publish_entry_slot`]
    EntrySlot(ListKind, usize, Option<Entry>),
    /// [`CommandSink::record_max_slot_count`]
    MaxSlotCount(ListKind, usize),
    /// [`CommandSink::publish_config_update_result`]
    ConfigUpdateResult(String),
    /// [`CommandSink::publish_external_action`]
    ExternalAction(String),
    /// [`CommandSink::publish_rssi`]
    Rssi(i32),
}

/// A sink that keeps every publication in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    published: Vec<Published>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> &[Published] {
        &self.published
    }

    /// Forgets everything published so far.
    pub fn clear(&mut self) {
        self.published.clear();
    }

    /// Action acknowledgements, oldest first.
    pub fn action_acks(&self) -> Vec<ActionAck> {
        self.published
            .iter()
            .filter_map(|p| match p {
                Published::ActionAck(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    /// Command results, oldest first.
    pub fn cmd_results(&self) -> Vec<CmdResult> {
        self.published
            .iter()
            .filter_map(|p| match p {
                Published::CmdResult(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Retry counter values, oldest first.
    pub fn retry_statuses(&self) -> Vec<RetryStatus> {
        self.published
            .iter()
            .filter_map(|p| match p {
                Published::Retry(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Entry command outcomes for one list, oldest first.
    pub fn entry_results(&self, kind: ListKind) -> Vec<EntryOutcome> {
        self.published
            .iter()
            .filter_map(|p| match p {
                Published::EntryResult(k, o) if *k == kind => Some(*o),
                _ => None,
            })
            .collect()
    }

    /// The most recently published full list.
    pub fn last_list(&self, kind: ListKind) -> Option<&[Entry]> {
        self.published.iter().rev().find_map(|p| match p {
            Published::EntryList(k, entries) if *k == kind => Some(entries.as_slice()),
            _ => None,
        })
    }

    /// Number of publications matching `pred`.
    pub fn count(&self, pred: impl Fn(&Published) -> bool) -> usize {
        self.published.iter().filter(|p| pred(p)).count()
    }
}

impl CommandSink for RecordingSink {
    fn publish_status(&mut self, snapshot: &DeviceSnapshot, changed: &[SnapshotField]) {
        self.published
            .push(Published::Status(snapshot.clone(), changed.to_vec()));
    }

    fn publish_status_updated(&mut self, updated: bool) {
        self.published.push(Published::StatusUpdated(updated));
    }

    fn publish_battery(&mut self, report: &BatteryReport) {
        self.published.push(Published::Battery(report.clone()));
    }

    fn publish_config(&mut self, config: &ConfigBlock) {
        self.published.push(Published::Config(config.clone()));
    }

    fn publish_advanced_config(&mut self, config: &AdvancedConfigBlock) {
        self.published.push(Published::AdvancedConfig(config.clone()));
    }

    fn publish_pin_status(&mut self, status: PinStatus) {
        self.published.push(Published::PinStatus(status));
    }

    fn publish_action_ack(&mut self, ack: ActionAck) {
        self.published.push(Published::ActionAck(ack));
    }

    fn publish_cmd_result(&mut self, result: CmdResult) {
        self.published.push(Published::CmdResult(result));
    }

    fn publish_retry(&mut self, status: RetryStatus) {
        self.published.push(Published::Retry(status));
    }

    fn publish_entry_result(&mut self, kind: ListKind, outcome: EntryOutcome) {
        self.published.push(Published::EntryResult(kind, outcome));
    }

    fn publish_entry_list(&mut self, kind: ListKind, entries: &[Entry]) {
        self.published
            .push(Published::EntryList(kind, entries.to_vec()));
    }

    fn publish_entry_slot(&mut self, kind: ListKind, slot: usize, entry: Option<&Entry>) {
        self.published
            .push(Published::EntrySlot(kind, slot, entry.cloned()));
    }

    fn record_max_slot_count(&mut self, kind: ListKind, count: usize) {
        self.published.push(Published::MaxSlotCount(kind, count));
    }

    fn publish_config_update_result(&mut self, json: &str) {
        self.published
            .push(Published::ConfigUpdateResult(json.to_owned()));
    }

    fn publish_external_action(&mut self, action: &str) {
        self.published
            .push(Published::ExternalAction(action.to_owned()));
    }

    fn publish_rssi(&mut self, rssi: i32) {
        self.published.push(Published::Rssi(rssi));
    }
}
