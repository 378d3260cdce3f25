//! Simulate command implementation.
//!
//! Runs a [`SyncEngine`] against a [`MockDevice`] on a manual clock and
//! traces everything the engine publishes.

use latchlink_engine::{
    AclConfig, Clock, CommandSink, EngineConfig, ManualClock, MockDevice, MockOp, SyncEngine, Tick,
};
use latchlink_protocol::{
    ActionAck, ActionKind, AdvancedConfigBlock, BatteryReport, CmdResult, ConfigBlock, DeviceError,
    DeviceKind, DeviceSnapshot, Entry, EntryOutcome, ListKind, LockAction, OpenerAction,
    PinStatus, RetryStatus, SnapshotField,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Errors specific to a simulation run.
#[derive(Error, Debug)]
pub enum SimulateError {
    /// The requested action is not in the device's vocabulary.
    #[error("unknown action '{action}' for a {device}")]
    UnknownAction {
        /// Requested name.
        action: String,
        /// Simulated device kind.
        device: DeviceKind,
    },
}

/// Options for one simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Configuration file. Without one, defaults with every action allowed.
    pub config: Option<PathBuf>,
    /// Device kind overriding the configuration.
    pub device: Option<DeviceKind>,
    /// Ticks to run.
    pub ticks: u32,
    /// Clock advance per tick.
    pub tick_ms: u64,
    /// Action sent once the engine is paired.
    pub action: Option<String>,
    /// Leading action attempts that fail.
    pub fail_first: usize,
}

/// Sink that writes each publication to the log.
#[derive(Debug, Default)]
pub struct LoggingSink {
    published: usize,
}

impl CommandSink for LoggingSink {
    fn publish_status(&mut self, snapshot: &DeviceSnapshot, changed: &[SnapshotField]) {
        self.published += 1;
        info!(state = ?snapshot.state, ?changed, "status");
    }

    fn publish_status_updated(&mut self, updated: bool) {
        self.published += 1;
        info!(updated, "statusUpdated");
    }

    fn publish_battery(&mut self, report: &BatteryReport) {
        self.published += 1;
        info!(
            level = report.level_percent,
            critical = report.critical,
            "battery"
        );
    }

    fn publish_config(&mut self, config: &ConfigBlock) {
        self.published += 1;
        info!(name = config.name.as_str(), id = config.device_id, "config");
    }

    fn publish_advanced_config(&mut self, config: &AdvancedConfigBlock) {
        self.published += 1;
        info!(keys = config.values.len(), "advancedConfig");
    }

    fn publish_pin_status(&mut self, status: PinStatus) {
        self.published += 1;
        info!(status = status.as_str(), "pinStatus");
    }

    fn publish_action_ack(&mut self, ack: ActionAck) {
        self.published += 1;
        info!(ack = ack.as_str(), "action");
    }

    fn publish_cmd_result(&mut self, result: CmdResult) {
        self.published += 1;
        info!(result = result.as_str(), "commandResult");
    }

    fn publish_retry(&mut self, status: RetryStatus) {
        self.published += 1;
        info!(%status, "retry");
    }

    fn publish_entry_result(&mut self, kind: ListKind, outcome: EntryOutcome) {
        self.published += 1;
        info!(list = kind.as_str(), ?outcome, "entryResult");
    }

    fn publish_entry_list(&mut self, kind: ListKind, entries: &[Entry]) {
        self.published += 1;
        info!(list = kind.as_str(), count = entries.len(), "entryList");
    }

    fn publish_entry_slot(&mut self, kind: ListKind, slot: usize, entry: Option<&Entry>) {
        self.published += 1;
        info!(
            list = kind.as_str(),
            slot,
            id = entry.map(Entry::id),
            "entrySlot"
        );
    }

    fn record_max_slot_count(&mut self, kind: ListKind, count: usize) {
        self.published += 1;
        info!(list = kind.as_str(), count, "maxSlotCount");
    }

    fn publish_config_update_result(&mut self, json: &str) {
        self.published += 1;
        info!(json, "configUpdateResult");
    }

    fn publish_external_action(&mut self, action: &str) {
        self.published += 1;
        info!(action, "externalAction");
    }

    fn publish_rssi(&mut self, rssi: i32) {
        self.published += 1;
        info!(rssi, "rssi");
    }
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &options.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_acl(AclConfig::allow_all()),
    };
    if let Some(device) = options.device {
        config.device_kind = device;
    }

    match config.device_kind {
        DeviceKind::Lock => simulate::<LockAction>(config, options),
        DeviceKind::Opener => simulate::<OpenerAction>(config, options),
    }
}

fn simulate<A: ActionKind>(
    config: EngineConfig,
    options: &SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let action = match &options.action {
        Some(name) if A::parse(name).is_none() => {
            return Err(SimulateError::UnknownAction {
                action: name.clone(),
                device: A::DEVICE,
            }
            .into());
        }
        other => other.clone(),
    };

    let mut device = MockDevice::<A>::new();
    if options.fail_first > 0 {
        device.fail_next(MockOp::Action, DeviceError::Timeout, options.fail_first);
    }
    let clock = ManualClock::new(0);
    let mut engine = SyncEngine::new(config, device, LoggingSink::default(), clock.clone())?;

    println!(
        "Simulating a {} for {} ticks of {} ms",
        A::DEVICE,
        options.ticks,
        options.tick_ms
    );
    println!();

    let mut pending_action = action;
    let mut ticks_run = 0;
    for _ in 0..options.ticks {
        let now = clock.now_ms();
        engine.device_mut().set_beacon(Some(now));
        ticks_run += 1;
        match engine.update() {
            Tick::Continue => {}
            Tick::RestartRequested(reason) => warn!(%reason, "restart requested"),
            Tick::Halted => break,
        }
        if engine.state().is_paired() {
            if let Some(name) = pending_action.take() {
                engine.on_action_received(&name);
            }
        }
        clock.advance(options.tick_ms);
    }

    let mut calls: BTreeMap<String, usize> = BTreeMap::new();
    for call in engine.device().calls() {
        *calls.entry(format!("{:?}", call)).or_default() += 1;
    }

    let stats = engine.stats();
    println!();
    println!("Summary");
    println!("  Ticks run:          {}", ticks_run);
    println!("  Final state:        {:?}", engine.state());
    println!("  Radio exchanges:    {}", stats.exchanges);
    println!("  Actions completed:  {}", stats.actions_completed);
    println!("  Actions failed:     {}", stats.actions_failed);
    println!("  Queries serviced:   {}", stats.queries_serviced);
    println!("  Messages published: {}", engine.sink().published);
    if let Some(error) = &stats.last_error {
        println!("  Last device error:  {}", error);
    }
    println!();
    println!("Device calls:");
    for (call, count) in &calls {
        println!("  {:<40} {}", call, count);
    }

    Ok(())
}
