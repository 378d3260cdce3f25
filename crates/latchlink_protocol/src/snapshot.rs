//! Device status and battery snapshots.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Mechanical state of a smart lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    /// Not yet calibrated.
    Uncalibrated,
    /// Bolt extended.
    Locked,
    /// Moving towards unlocked.
    Unlocking,
    /// Bolt retracted.
    Unlocked,
    /// Moving towards locked.
    Locking,
    /// Latch pulled.
    Unlatched,
    /// Unlocked, lock 'n' go timer running.
    UnlockedLockNgo,
    /// Pulling the latch.
    Unlatching,
    /// Calibration in progress.
    Calibration,
    /// Booting.
    BootRun,
    /// Motor blocked.
    MotorBlocked,
    /// Unknown state.
    Undefined,
}

/// Operating state of an intercom opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpenerState {
    /// Not yet trained on the intercom.
    Untrained,
    /// Ready.
    Online,
    /// Ring-to-open is active.
    RtoActive,
    /// Door strike released.
    Open,
    /// Releasing the strike.
    Opening,
    /// Booting.
    BootRun,
    /// Unknown state.
    Undefined,
}

/// State of either device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceState {
    /// Lock state.
    Lock(LockState),
    /// Opener state.
    Opener(OpenerState),
}

impl DeviceState {
    /// True when the device reached a resting position.
    pub fn is_settled(&self) -> bool {
        match self {
            DeviceState::Lock(s) => matches!(
                s,
                LockState::Locked
                    | LockState::Unlocked
                    | LockState::Unlatched
                    | LockState::UnlockedLockNgo
            ),
            DeviceState::Opener(s) => {
                matches!(s, OpenerState::Online | OpenerState::RtoActive | OpenerState::Open)
            }
        }
    }

    /// True while the device is moving between two resting positions.
    pub fn is_transitional(&self) -> bool {
        match self {
            DeviceState::Lock(s) => matches!(
                s,
                LockState::Unlocking | LockState::Locking | LockState::Unlatching
            ),
            DeviceState::Opener(s) => matches!(s, OpenerState::Opening),
        }
    }
}

/// What triggered the last state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Bluetooth command.
    System,
    /// Turned by hand.
    Manual,
    /// Device button.
    Button,
    /// Time control or geofence.
    Automatic,
    /// Auto lock timer.
    AutoLock,
    /// Unknown.
    #[default]
    Undefined,
}

/// Result of the last mechanical action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    /// Completed.
    Success,
    /// Motor blocked.
    MotorBlocked,
    /// Canceled.
    Canceled,
    /// Rejected, too soon after the previous action.
    TooRecent,
    /// Device busy.
    Busy,
    /// Motor voltage too low.
    LowMotorVoltage,
    /// Clutch failure.
    ClutchFailure,
    /// Motor power failure.
    MotorPowerFailure,
    /// Movement incomplete.
    IncompleteFailure,
    /// Generic failure.
    Failure,
    /// Other error.
    OtherError,
    /// Unknown.
    #[default]
    Undefined,
}

/// Door sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DoorSensorState {
    /// No sensor paired.
    #[default]
    Unavailable,
    /// Sensor disabled.
    Deactivated,
    /// Door closed.
    DoorClosed,
    /// Door open.
    DoorOpened,
    /// Sensor reports unknown.
    DoorStateUnknown,
    /// Calibrating.
    Calibrating,
}

/// One status reading, replaced wholesale on every successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Current lock or opener state.
    pub state: DeviceState,
    /// Trigger of the last state change.
    pub trigger: Trigger,
    /// Completion status of the last action.
    pub completion: CompletionStatus,
    /// Door sensor reading.
    pub door_sensor: DoorSensorState,
    /// Opener continuous mode.
    pub continuous_mode: bool,
    /// Battery critically low.
    pub critical_battery: bool,
    /// Battery is charging.
    pub battery_charging: bool,
    /// Battery level in percent, when the device reports it in status.
    pub battery_percent: Option<u8>,
    /// Keypad battery critically low.
    pub keypad_battery_critical: bool,
    /// Device clock at the time of the reading.
    pub timestamp: Option<NaiveDateTime>,
}

/// Fields that can differ between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotField {
    /// [`DeviceSnapshot::state`]
    State,
    /// [`DeviceSnapshot::trigger`]
    Trigger,
    /// [`DeviceSnapshot::completion`]
    Completion,
    /// [`DeviceSnapshot::door_sensor`]
    DoorSensor,
    /// [`DeviceSnapshot::continuous_mode`]
    ContinuousMode,
    /// Any of the battery flags.
    Battery,
    /// [`DeviceSnapshot::keypad_battery_critical`]
    KeypadBattery,
}

impl DeviceSnapshot {
    /// A reading with the given state and everything else unknown.
    pub fn new(state: DeviceState) -> Self {
        Self {
            state,
            trigger: Trigger::default(),
            completion: CompletionStatus::default(),
            door_sensor: DoorSensorState::default(),
            continuous_mode: false,
            critical_battery: false,
            battery_charging: false,
            battery_percent: None,
            keypad_battery_critical: false,
            timestamp: None,
        }
    }

    /// Lists the fields that differ from `previous`.
    ///
    /// With no previous reading every field counts as changed.
    pub fn diff(&self, previous: Option<&DeviceSnapshot>) -> Vec<SnapshotField> {
        let Some(prev) = previous else {
            return vec![
                SnapshotField::State,
                SnapshotField::Trigger,
                SnapshotField::Completion,
                SnapshotField::DoorSensor,
                SnapshotField::ContinuousMode,
                SnapshotField::Battery,
                SnapshotField::KeypadBattery,
            ];
        };

        let mut changed = Vec::new();
        if self.state != prev.state {
            changed.push(SnapshotField::State);
        }
        if self.trigger != prev.trigger {
            changed.push(SnapshotField::Trigger);
        }
        if self.completion != prev.completion {
            changed.push(SnapshotField::Completion);
        }
        if self.door_sensor != prev.door_sensor {
            changed.push(SnapshotField::DoorSensor);
        }
        if self.continuous_mode != prev.continuous_mode {
            changed.push(SnapshotField::ContinuousMode);
        }
        if self.critical_battery != prev.critical_battery
            || self.battery_charging != prev.battery_charging
            || self.battery_percent != prev.battery_percent
        {
            changed.push(SnapshotField::Battery);
        }
        if self.keypad_battery_critical != prev.keypad_battery_critical {
            changed.push(SnapshotField::KeypadBattery);
        }
        changed
    }
}

/// Battery report from a dedicated battery query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReport {
    /// Battery critically low.
    pub critical: bool,
    /// Battery is charging.
    pub charging: bool,
    /// Charge level in percent.
    pub level_percent: u8,
    /// Battery voltage in millivolts.
    pub voltage_mv: u32,
}
