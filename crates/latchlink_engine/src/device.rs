//! Device operation abstraction.

use latchlink_protocol::{
    ActionKind, AdvancedConfigBlock, AuthorizationIdType, BatteryReport, ConfigBlock, ConfigScope,
    DeviceError, DeviceKind, DeviceResult, DeviceSnapshot, DeviceState, Entry, ListKind,
    LockState, OpenerState,
};
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;

/// Operations offered by the radio link to one lock or opener.
///
/// Every method taking `&mut self` except [`DeviceOps::fetch_entries`] is
/// one blocking radio exchange. The engine never calls two of them in the
/// same tick.
pub trait DeviceOps {
    /// The device's action vocabulary.
    type Action: ActionKind;

    /// Pairs with the device.
    fn pair(&mut self, id_type: AuthorizationIdType) -> DeviceResult<()>;

    /// Reads the current status.
    fn request_status(&mut self) -> DeviceResult<DeviceSnapshot>;

    /// Reads the battery report.
    fn request_battery(&mut self) -> DeviceResult<BatteryReport>;

    /// Reads the basic configuration.
    fn request_config(&mut self) -> DeviceResult<ConfigBlock>;

    /// Reads the advanced configuration.
    fn request_advanced_config(&mut self) -> DeviceResult<AdvancedConfigBlock>;

    /// Whether a security PIN is stored on the gateway side.
    fn security_pin_set(&self) -> bool;

    /// Verifies the stored security PIN against the device.
    fn verify_security_pin(&mut self) -> DeviceResult<()>;

    /// Executes an action.
    fn perform_action(&mut self, action: Self::Action) -> DeviceResult<()>;

    /// Asks the device to fill its buffer with up to `count` entries.
    fn list_entries(&mut self, kind: ListKind, offset: u32, count: u32) -> DeviceResult<()>;

    /// Reads back the buffer filled by [`DeviceOps::list_entries`]. No radio exchange.
    fn fetch_entries(&mut self, kind: ListKind) -> Vec<Entry>;

    /// Creates an entry. The device assigns the id.
    fn add_entry(&mut self, entry: &Entry) -> DeviceResult<()>;

    /// Overwrites an entry with the same id.
    fn update_entry(&mut self, entry: &Entry) -> DeviceResult<()>;

    /// Removes an entry.
    fn delete_entry(&mut self, kind: ListKind, id: u32) -> DeviceResult<()>;

    /// Writes one configuration key.
    fn set_config_value(&mut self, scope: ConfigScope, key: &str, value: &str) -> DeviceResult<()>;

    /// Time of the last received advertisement, on the engine clock.
    fn last_beacon_timestamp(&self) -> Option<u64>;

    /// Signal strength of the last advertisement.
    fn signal_strength(&self) -> Option<i32>;

    /// Whether the radio stack reported an unrecoverable fault.
    fn is_stack_faulted(&self) -> bool {
        false
    }
}

/// Operation classes a [`MockDevice`] can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MockOp {
    /// [`DeviceOps::pair`]
    Pair,
    /// [`DeviceOps::request_status`]
    Status,
    /// [`DeviceOps::request_battery`]
    Battery,
    /// [`DeviceOps::request_config`]
    Config,
    /// [`DeviceOps::request_advanced_config`]
    AdvancedConfig,
    /// [`DeviceOps::verify_security_pin`]
    VerifyPin,
    /// [`DeviceOps::perform_action`]
    Action,
    /// [`DeviceOps::list_entries`]
    ListEntries,
    /// Add, update and delete.
    EntryWrite,
    /// [`DeviceOps::set_config_value`]
    ConfigWrite,
}

/// One recorded radio exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// Pairing attempt.
    Pair,
    /// Status read.
    RequestStatus,
    /// Battery read.
    RequestBattery,
    /// Basic configuration read.
    RequestConfig,
    /// Advanced configuration read.
    RequestAdvancedConfig,
    /// PIN verification.
    VerifyPin,
    /// Action, by canonical name.
    PerformAction(&'static str),
    /// List request.
    ListEntries(ListKind),
    /// Entry creation.
    AddEntry(ListKind),
    /// Entry overwrite.
    UpdateEntry(ListKind, u32),
    /// Entry removal.
    DeleteEntry(ListKind, u32),
    /// Configuration write.
    SetConfig(ConfigScope, String),
}

/// A scripted in-memory device for tests and simulation.
///
/// Every operation succeeds unless a failure was queued with
/// [`MockDevice::fail_next`]. Entry lists behave like the real device: a
/// list request copies the stored entries into a buffer that a later fetch
/// returns.
#[derive(Debug, Clone)]
pub struct MockDevice<A> {
    failures: BTreeMap<MockOp, VecDeque<DeviceError>>,
    snapshot: DeviceSnapshot,
    battery: BatteryReport,
    config: ConfigBlock,
    advanced: AdvancedConfigBlock,
    pin_set: bool,
    pin_valid: bool,
    stored: BTreeMap<ListKind, Vec<Entry>>,
    buffer: BTreeMap<ListKind, Vec<Entry>>,
    beacon: Option<u64>,
    rssi: Option<i32>,
    faulted: bool,
    calls: Vec<DeviceCall>,
    _action: PhantomData<A>,
}

impl<A: ActionKind> MockDevice<A> {
    /// Creates a mock with a valid configuration and no entries.
    pub fn new() -> Self {
        let state = match A::DEVICE {
            DeviceKind::Lock => DeviceState::Lock(LockState::Locked),
            DeviceKind::Opener => DeviceState::Opener(OpenerState::Online),
        };
        Self {
            failures: BTreeMap::new(),
            snapshot: DeviceSnapshot::new(state),
            battery: BatteryReport {
                level_percent: 90,
                voltage_mv: 5_800,
                ..BatteryReport::default()
            },
            config: ConfigBlock {
                device_id: 0x2a,
                name: format!("Mock {}", A::DEVICE),
                firmware: "3.0.0".into(),
                hardware: "5.0".into(),
                ..ConfigBlock::default()
            },
            advanced: AdvancedConfigBlock::default(),
            pin_set: false,
            pin_valid: false,
            stored: BTreeMap::new(),
            buffer: BTreeMap::new(),
            beacon: None,
            rssi: None,
            faulted: false,
            calls: Vec::new(),
            _action: PhantomData,
        }
    }

    /// Queues `times` failures for an operation class.
    pub fn fail_next(&mut self, op: MockOp, error: DeviceError, times: usize) {
        let queue = self.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Replaces the configuration returned by reads.
    pub fn set_config(&mut self, config: ConfigBlock) {
        self.config = config;
    }

    /// Replaces the snapshot returned by status reads.
    pub fn set_snapshot(&mut self, snapshot: DeviceSnapshot) {
        self.snapshot = snapshot;
    }

    /// Stores a PIN on the gateway side and decides whether the device accepts it.
    pub fn set_security_pin(&mut self, valid: bool) {
        self.pin_set = true;
        self.pin_valid = valid;
    }

    /// Replaces the entries stored on the device.
    pub fn set_entries(&mut self, kind: ListKind, entries: Vec<Entry>) {
        self.stored.insert(kind, entries);
    }

    /// Sets the last beacon time.
    pub fn set_beacon(&mut self, at_ms: Option<u64>) {
        self.beacon = at_ms;
    }

    /// Sets the signal strength.
    pub fn set_rssi(&mut self, rssi: Option<i32>) {
        self.rssi = rssi;
    }

    /// Simulates a radio stack fault.
    pub fn set_stack_faulted(&mut self, faulted: bool) {
        self.faulted = faulted;
    }

    /// Entries currently stored on the device.
    pub fn stored_entries(&self, kind: ListKind) -> &[Entry] {
        self.stored.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Configuration as currently stored on the device.
    pub fn config(&self) -> &ConfigBlock {
        &self.config
    }

    /// Every radio exchange made so far.
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Number of recorded exchanges matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn exchange(&mut self, call: DeviceCall, op: MockOp) -> DeviceResult<()> {
        self.calls.push(call);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&self, kind: ListKind) -> u32 {
        self.stored_entries(kind)
            .iter()
            .map(Entry::id)
            .max()
            .map_or(1, |id| id + 1)
    }
}

impl<A: ActionKind> Default for MockDevice<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ActionKind> DeviceOps for MockDevice<A> {
    type Action = A;

    fn pair(&mut self, _id_type: AuthorizationIdType) -> DeviceResult<()> {
        self.exchange(DeviceCall::Pair, MockOp::Pair)
    }

    fn request_status(&mut self) -> DeviceResult<DeviceSnapshot> {
        self.exchange(DeviceCall::RequestStatus, MockOp::Status)?;
        Ok(self.snapshot.clone())
    }

    fn request_battery(&mut self) -> DeviceResult<BatteryReport> {
        self.exchange(DeviceCall::RequestBattery, MockOp::Battery)?;
        Ok(self.battery.clone())
    }

    fn request_config(&mut self) -> DeviceResult<ConfigBlock> {
        self.exchange(DeviceCall::RequestConfig, MockOp::Config)?;
        Ok(self.config.clone())
    }

    fn request_advanced_config(&mut self) -> DeviceResult<AdvancedConfigBlock> {
        self.exchange(DeviceCall::RequestAdvancedConfig, MockOp::AdvancedConfig)?;
        Ok(self.advanced.clone())
    }

    fn security_pin_set(&self) -> bool {
        self.pin_set
    }

    fn verify_security_pin(&mut self) -> DeviceResult<()> {
        self.exchange(DeviceCall::VerifyPin, MockOp::VerifyPin)?;
        if self.pin_valid {
            Ok(())
        } else {
            Err(DeviceError::Rejected)
        }
    }

    fn perform_action(&mut self, action: A) -> DeviceResult<()> {
        self.exchange(DeviceCall::PerformAction(action.as_str()), MockOp::Action)
    }

    fn list_entries(&mut self, kind: ListKind, offset: u32, count: u32) -> DeviceResult<()> {
        self.exchange(DeviceCall::ListEntries(kind), MockOp::ListEntries)?;
        let listed = self
            .stored_entries(kind)
            .iter()
            .skip(offset as usize)
            .take(count as usize)
            .cloned()
            .collect();
        self.buffer.insert(kind, listed);
        Ok(())
    }

    fn fetch_entries(&mut self, kind: ListKind) -> Vec<Entry> {
        self.buffer.remove(&kind).unwrap_or_default()
    }

    fn add_entry(&mut self, entry: &Entry) -> DeviceResult<()> {
        let kind = entry.kind();
        self.exchange(DeviceCall::AddEntry(kind), MockOp::EntryWrite)?;
        let mut created = entry.clone();
        created.set_id(self.next_id(kind));
        self.stored.entry(kind).or_default().push(created);
        Ok(())
    }

    fn update_entry(&mut self, entry: &Entry) -> DeviceResult<()> {
        let kind = entry.kind();
        self.exchange(DeviceCall::UpdateEntry(kind, entry.id()), MockOp::EntryWrite)?;
        let slot = self
            .stored
            .get_mut(&kind)
            .and_then(|list| list.iter_mut().find(|e| e.id() == entry.id()))
            .ok_or(DeviceError::Rejected)?;
        *slot = entry.clone();
        Ok(())
    }

    fn delete_entry(&mut self, kind: ListKind, id: u32) -> DeviceResult<()> {
        self.exchange(DeviceCall::DeleteEntry(kind, id), MockOp::EntryWrite)?;
        let list = self.stored.entry(kind).or_default();
        let before = list.len();
        list.retain(|e| e.id() != id);
        if list.len() == before {
            return Err(DeviceError::Rejected);
        }
        Ok(())
    }

    fn set_config_value(&mut self, scope: ConfigScope, key: &str, value: &str) -> DeviceResult<()> {
        self.exchange(DeviceCall::SetConfig(scope, key.to_owned()), MockOp::ConfigWrite)?;
        match scope {
            ConfigScope::Basic if key == "name" => self.config.name = value.to_owned(),
            ConfigScope::Basic => {
                self.config.values.insert(key.to_owned(), value.to_owned());
            }
            ConfigScope::Advanced => {
                self.advanced.values.insert(key.to_owned(), value.to_owned());
            }
        }
        Ok(())
    }

    fn last_beacon_timestamp(&self) -> Option<u64> {
        self.beacon
    }

    fn signal_strength(&self) -> Option<i32> {
        self.rssi
    }

    fn is_stack_faulted(&self) -> bool {
        self.faulted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchlink_protocol::{AccessWindow, KeypadEntry, LockAction};

    fn keypad(id: u32, name: &str) -> Entry {
        Entry::Keypad(KeypadEntry {
            id,
            name: name.into(),
            code: 123456,
            enabled: true,
            window: AccessWindow::default(),
        })
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let mut device = MockDevice::<LockAction>::new();
        device.fail_next(MockOp::Action, DeviceError::Timeout, 2);

        assert_eq!(
            device.perform_action(LockAction::Unlock),
            Err(DeviceError::Timeout)
        );
        assert_eq!(
            device.perform_action(LockAction::Unlock),
            Err(DeviceError::Timeout)
        );
        assert_eq!(device.perform_action(LockAction::Unlock), Ok(()));
        assert_eq!(
            device.count_calls(|c| matches!(c, DeviceCall::PerformAction("unlock"))),
            3
        );
    }

    #[test]
    fn list_then_fetch_uses_buffer() {
        let mut device = MockDevice::<LockAction>::new();
        device.set_entries(ListKind::Keypad, vec![keypad(1, "a"), keypad(2, "b")]);

        assert!(device.fetch_entries(ListKind::Keypad).is_empty());
        device.list_entries(ListKind::Keypad, 0, 1).unwrap();
        let fetched = device.fetch_entries(ListKind::Keypad);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id(), 1);
    }

    #[test]
    fn entry_writes_modify_storage() {
        let mut device = MockDevice::<LockAction>::new();
        device.set_entries(ListKind::Keypad, vec![keypad(4, "a")]);

        device.add_entry(&keypad(0, "new")).unwrap();
        assert_eq!(device.stored_entries(ListKind::Keypad)[1].id(), 5);

        device.update_entry(&keypad(4, "renamed")).unwrap();
        assert_eq!(device.stored_entries(ListKind::Keypad)[0], keypad(4, "renamed"));

        device.delete_entry(ListKind::Keypad, 4).unwrap();
        assert_eq!(device.stored_entries(ListKind::Keypad).len(), 1);
        assert_eq!(
            device.delete_entry(ListKind::Keypad, 4),
            Err(DeviceError::Rejected)
        );
    }

    #[test]
    fn pin_verification() {
        let mut device = MockDevice::<LockAction>::new();
        assert!(!device.security_pin_set());
        device.set_security_pin(false);
        assert_eq!(device.verify_security_pin(), Err(DeviceError::Rejected));
        device.set_security_pin(true);
        assert_eq!(device.verify_security_pin(), Ok(()));
    }
}
