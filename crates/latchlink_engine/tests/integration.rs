//! End-to-end tests for the synchronization engine against a scripted device.

use latchlink_engine::{
    AclConfig, Clock, DeviceCall, EngineConfig, EngineState, FeatureFlags, ManualClock, MockDevice,
    MockOp, Published, RecordingSink, RetryConfig, SyncEngine, Tick, BOOT_GRACE_MS,
};
use latchlink_protocol::{
    AccessWindow, ActionAck, CmdResult, DeviceError, DeviceKind, Entry, EntryOutcome,
    KeypadEntry, ListKind, LockAction, OpenerAction, QueryKind, Reason, RetryStatus, Weekdays,
};
use proptest::prelude::*;

type Engine = SyncEngine<MockDevice<LockAction>, RecordingSink, ManualClock>;

const TICK_MS: u64 = 1_000;

fn base_config() -> EngineConfig {
    EngineConfig::new(DeviceKind::Lock)
        .with_acl(AclConfig::allow_all())
        .with_features(FeatureFlags::all())
        .with_settle_delay_ms(2_000)
}

fn engine(config: EngineConfig, device: MockDevice<LockAction>) -> (Engine, ManualClock) {
    let clock = ManualClock::new(0);
    let engine = SyncEngine::new(config, device, RecordingSink::new(), clock.clone()).unwrap();
    (engine, clock)
}

fn tick(engine: &mut Engine, clock: &ManualClock) -> Tick {
    let result = engine.update();
    clock.advance(TICK_MS);
    result
}

fn run(engine: &mut Engine, clock: &ManualClock, ticks: usize) {
    for _ in 0..ticks {
        tick(engine, clock);
    }
}

fn keypad(id: u32, name: &str, code: u32) -> Entry {
    Entry::Keypad(KeypadEntry {
        id,
        name: name.into(),
        code,
        enabled: true,
        window: AccessWindow {
            time_limited: true,
            allowed_weekdays: Weekdays(31),
            allowed_from_time: latchlink_protocol::parse_time("08:00"),
            allowed_until_time: latchlink_protocol::parse_time("17:30"),
            ..AccessWindow::default()
        },
    })
}

/// A paired lock with a keypad, a valid PIN and a fetched keypad list.
fn ready_lock(config: EngineConfig) -> (Engine, ManualClock) {
    let mut device = MockDevice::new();
    device.set_security_pin(true);
    let mut block = device.config().clone();
    block.has_keypad = true;
    device.set_config(block);
    device.set_entries(
        ListKind::Keypad,
        vec![keypad(2, "Cleaner", 654321), keypad(5, "Family", 123456)],
    );

    let (mut engine, clock) = engine(config, device);
    for _ in 0..60 {
        tick(&mut engine, &clock);
        if engine.reconciler().identity_cache(ListKind::Keypad).contains(5)
            && !engine.reconciler().is_busy()
        {
            return (engine, clock);
        }
    }
    panic!("keypad list was never fetched");
}

fn run_until_idle(engine: &mut Engine, clock: &ManualClock) {
    for _ in 0..60 {
        tick(engine, clock);
        if engine.state() == EngineState::Idle && !engine.reconciler().is_busy() {
            return;
        }
    }
    panic!("engine never went idle");
}

#[test]
fn pairing_succeeds_on_third_tick() {
    let mut device = MockDevice::new();
    device.fail_next(MockOp::Pair, DeviceError::Timeout, 2);
    let (mut engine, clock) = engine(base_config(), device);

    run(&mut engine, &clock, 2);
    assert_eq!(engine.state(), EngineState::Unpaired);
    run(&mut engine, &clock, 1);
    assert!(engine.state().is_paired());
    assert_eq!(engine.stats().pair_attempts, 3);

    run(&mut engine, &clock, 30);
    let device = engine.device();
    assert_eq!(device.count_calls(|c| *c == DeviceCall::Pair), 3);
    assert_eq!(device.count_calls(|c| *c == DeviceCall::RequestConfig), 1);
}

#[test]
fn unlock_succeeds_on_third_attempt() {
    let config = base_config().with_retry(RetryConfig::new(3, 100));
    let (mut engine, clock) = engine(config, MockDevice::new());
    run(&mut engine, &clock, 8);
    engine.sink_mut().clear();
    engine
        .device_mut()
        .fail_next(MockOp::Action, DeviceError::Timeout, 2);

    assert_eq!(engine.on_action_received("unlock"), Some(ActionAck::Ack));
    run(&mut engine, &clock, 5);

    assert_eq!(
        engine
            .device()
            .count_calls(|c| *c == DeviceCall::PerformAction("unlock")),
        3
    );
    assert!(engine.pending_action().is_none());
    assert_eq!(engine.sink().action_acks(), vec![ActionAck::Ack]);
    assert_eq!(
        engine.sink().cmd_results(),
        vec![CmdResult::TimeOut, CmdResult::TimeOut, CmdResult::Success]
    );
    assert_eq!(
        engine.sink().retry_statuses(),
        vec![
            RetryStatus::Attempt(1),
            RetryStatus::Attempt(2),
            RetryStatus::Idle
        ]
    );
    assert_eq!(RetryStatus::Idle.to_string(), "--");
}

#[test]
fn exhausted_action_reports_failed() {
    let config = base_config().with_retry(RetryConfig::new(2, 100));
    let (mut engine, clock) = engine(config, MockDevice::new());
    run(&mut engine, &clock, 8);
    engine
        .device_mut()
        .fail_next(MockOp::Action, DeviceError::Rejected, 5);

    engine.on_action_received("lockNgo");
    run(&mut engine, &clock, 6);

    assert_eq!(
        engine
            .device()
            .count_calls(|c| matches!(c, DeviceCall::PerformAction(_))),
        2
    );
    assert_eq!(
        engine.sink().retry_statuses().last(),
        Some(&RetryStatus::Failed)
    );
    assert_eq!(engine.stats().actions_failed, 1);
}

#[test]
fn denied_action_never_reaches_device() {
    let acl = AclConfig::allow_all().with_action(LockAction::Unlatch, false);
    let (mut engine, clock) = engine(base_config().with_acl(acl), MockDevice::new());
    run(&mut engine, &clock, 4);

    assert_eq!(engine.on_action_received("unlatch"), Some(ActionAck::Denied));
    assert_eq!(engine.on_action_received("Unlatch"), Some(ActionAck::Denied));
    assert_eq!(engine.on_action_received("openDoor"), Some(ActionAck::UnknownAction));
    run(&mut engine, &clock, 10);

    assert_eq!(
        engine
            .device()
            .count_calls(|c| matches!(c, DeviceCall::PerformAction(_))),
        0
    );
    assert!(engine.pending_action().is_none());
}

#[test]
fn keypad_add_with_zero_digits_is_rejected_locally() {
    let (mut engine, _clock) = ready_lock(base_config());
    let before = engine.device().calls().len();

    let queued = engine.on_entry_command(
        ListKind::Keypad,
        r#"{"action":"add","name":"Guest","code":"101010"}"#,
    );

    assert!(!queued);
    assert_eq!(engine.device().calls().len(), before);
    assert_eq!(
        engine.sink().entry_results(ListKind::Keypad),
        vec![EntryOutcome::Reason(Reason::CodeInvalid)]
    );
}

#[test]
fn keypad_update_merges_with_fetched_entry() {
    let (mut engine, clock) = ready_lock(base_config());
    let original = engine
        .device()
        .stored_entries(ListKind::Keypad)
        .iter()
        .find(|e| e.id() == 5)
        .cloned()
        .unwrap();
    let before = engine.device().calls().len();

    assert!(engine.on_entry_command(
        ListKind::Keypad,
        r#"{"action":"update","codeId":5,"name":"Guest"}"#
    ));
    run_until_idle(&mut engine, &clock);

    let calls = &engine.device().calls()[before..];
    let list_before_update = calls
        .iter()
        .position(|c| *c == DeviceCall::ListEntries(ListKind::Keypad))
        .unwrap();
    let update = calls
        .iter()
        .position(|c| *c == DeviceCall::UpdateEntry(ListKind::Keypad, 5))
        .unwrap();
    assert!(list_before_update < update);
    assert!(calls[update..].contains(&DeviceCall::ListEntries(ListKind::Keypad)));

    let mut expected = original;
    if let Entry::Keypad(k) = &mut expected {
        k.name = "Guest".into();
    }
    let list = engine.sink().last_list(ListKind::Keypad).unwrap();
    assert_eq!(list.iter().find(|e| e.id() == 5), Some(&expected));
    assert_eq!(list.iter().find(|e| e.id() == 2), Some(&keypad(2, "Cleaner", 654321)));
    assert_eq!(
        engine.sink().entry_results(ListKind::Keypad),
        vec![EntryOutcome::Device(CmdResult::Success)]
    );
}

#[test]
fn delete_of_unknown_id_makes_no_device_call() {
    let (mut engine, clock) = ready_lock(base_config());
    let before = engine.device().calls().len();

    assert!(!engine.on_entry_command(ListKind::Keypad, r#"{"action":"delete","codeId":77}"#));
    assert_eq!(engine.device().calls().len(), before);
    assert_eq!(
        engine.sink().entry_results(ListKind::Keypad),
        vec![EntryOutcome::Reason(Reason::UnknownId)]
    );

    assert!(engine.on_entry_command(ListKind::Keypad, r#"{"action":"delete","codeId":2}"#));
    run_until_idle(&mut engine, &clock);
    assert!(!engine.reconciler().identity_cache(ListKind::Keypad).contains(2));
    assert_eq!(engine.sink().last_list(ListKind::Keypad).map(<[Entry]>::len), Some(1));
}

#[test]
fn removed_entries_clear_their_slots() {
    let (mut engine, clock) = ready_lock(base_config());
    assert_eq!(engine.reconciler().max_slots(ListKind::Keypad), 2);
    assert_eq!(
        engine
            .sink()
            .count(|p| matches!(p, Published::MaxSlotCount(ListKind::Keypad, 2))),
        1
    );

    engine.on_entry_command(ListKind::Keypad, r#"{"action":"delete","codeId":5}"#);
    engine.sink_mut().clear();
    run_until_idle(&mut engine, &clock);

    assert!(engine
        .sink()
        .published()
        .contains(&Published::EntrySlot(ListKind::Keypad, 1, None)));
}

#[test]
fn watchdog_requests_restart_exactly_once() {
    let mut device = MockDevice::new();
    device.set_beacon(Some(1_000));
    let (mut engine, clock) = engine(base_config().with_beacon_timeout_secs(60), device);

    let mut restarts = Vec::new();
    let mut halted = 0;
    for _ in 0..120 {
        let now = clock.now_ms();
        match tick(&mut engine, &clock) {
            Tick::RestartRequested(reason) => restarts.push((now, reason)),
            Tick::Halted => halted += 1,
            Tick::Continue => {}
        }
    }

    assert_eq!(restarts.len(), 1);
    assert!(restarts[0].0 > BOOT_GRACE_MS);
    assert!(halted > 0);
    assert!(engine.state().is_halted());
}

#[test]
fn fresh_beacons_keep_watchdog_quiet() {
    let (mut engine, clock) = engine(base_config().with_beacon_timeout_secs(60), MockDevice::new());
    for _ in 0..200 {
        let now = clock.now_ms();
        engine.device_mut().set_beacon(Some(now.max(1)));
        assert_eq!(tick(&mut engine, &clock), Tick::Continue);
    }
}

#[test]
fn immediate_battery_query_preempts_schedule() {
    let (mut engine, clock) = ready_lock(base_config());
    run_until_idle(&mut engine, &clock);
    run(&mut engine, &clock, 10);
    let before = engine
        .device()
        .count_calls(|c| *c == DeviceCall::RequestBattery);
    assert!(!engine.scheduler().is_due(QueryKind::Battery, clock.now_ms()));

    engine.on_query_request(QueryKind::Battery);
    tick(&mut engine, &clock);

    assert_eq!(engine.device().calls().last(), Some(&DeviceCall::RequestBattery));
    assert_eq!(
        engine
            .device()
            .count_calls(|c| *c == DeviceCall::RequestBattery),
        before + 1
    );
    assert_eq!(engine.scheduler().immediate_mask() & QueryKind::Battery.bit(), 0);
}

#[test]
fn external_session_timeout_without_fallback() {
    let features = FeatureFlags {
        hybrid_fallback: false,
        ..FeatureFlags::all()
    };
    let (mut engine, clock) = engine(base_config().with_features(features), MockDevice::new());
    run(&mut engine, &clock, 6);
    engine.set_external_session_active(true);

    assert_eq!(engine.on_action_received("unlock"), Some(ActionAck::Ack));
    assert!(engine
        .sink()
        .published()
        .contains(&Published::ExternalAction("unlock".into())));
    run(&mut engine, &clock, 4);

    assert_eq!(
        engine
            .device()
            .count_calls(|c| matches!(c, DeviceCall::PerformAction(_))),
        0
    );
    assert_eq!(engine.sink().cmd_results(), vec![CmdResult::ExternalTimeout]);
    assert_eq!(CmdResult::ExternalTimeout.as_str(), "externalTimeout");
    assert_eq!(engine.sink().retry_statuses(), vec![RetryStatus::Failed]);
}

#[test]
fn external_session_falls_back_to_radio() {
    let (mut engine, clock) = engine(base_config(), MockDevice::new());
    run(&mut engine, &clock, 6);
    engine.set_external_session_active(true);

    engine.on_action_received("lock");
    run(&mut engine, &clock, 4);

    assert_eq!(
        engine
            .device()
            .count_calls(|c| *c == DeviceCall::PerformAction("lock")),
        1
    );
    assert_eq!(engine.sink().cmd_results(), vec![CmdResult::Success]);
}

#[test]
fn external_session_confirmation_completes_action() {
    let (mut engine, clock) = engine(base_config(), MockDevice::new());
    run(&mut engine, &clock, 6);
    engine.set_external_session_active(true);

    engine.on_action_received("unlock");
    engine.on_external_action_result(true);
    run(&mut engine, &clock, 4);

    assert!(engine.pending_action().is_none());
    assert_eq!(engine.sink().cmd_results(), vec![CmdResult::Success]);
    assert_eq!(
        engine
            .device()
            .count_calls(|c| matches!(c, DeviceCall::PerformAction(_))),
        0
    );
}

#[test]
fn config_update_writes_then_rereads() {
    let (mut engine, clock) = ready_lock(base_config());
    let reads = engine
        .device()
        .count_calls(|c| *c == DeviceCall::RequestConfig);

    assert!(engine.on_config_update(r#"{"name":"Back door","ledBrightness":4}"#));
    run_until_idle(&mut engine, &clock);
    run(&mut engine, &clock, 3);

    assert_eq!(engine.device().config().name, "Back door");
    assert!(engine
        .device()
        .count_calls(|c| *c == DeviceCall::RequestConfig)
        > reads);
    assert_eq!(engine.config_snapshot().basic.name, "Back door");
}

#[test]
fn opener_uses_its_own_vocabulary() {
    let clock = ManualClock::new(0);
    let config = EngineConfig::new(DeviceKind::Opener).with_acl(AclConfig::allow_all());
    let mut engine = SyncEngine::new(
        config,
        MockDevice::<OpenerAction>::new(),
        RecordingSink::new(),
        clock.clone(),
    )
    .unwrap();
    for _ in 0..4 {
        engine.update();
        clock.advance(TICK_MS);
    }

    assert_eq!(engine.on_action_received("unlock"), Some(ActionAck::UnknownAction));
    assert_eq!(
        engine.on_action_received("electricStrikeActuation"),
        Some(ActionAck::Ack)
    );
    engine.update();

    assert_eq!(
        engine.device().calls().last(),
        Some(&DeviceCall::PerformAction("electricStrikeActuation"))
    );
}

#[test]
fn opener_config_is_rejected_by_lock_engine() {
    let result = SyncEngine::new(
        EngineConfig::new(DeviceKind::Opener),
        MockDevice::<LockAction>::new(),
        RecordingSink::new(),
        ManualClock::new(0),
    );
    assert!(result.is_err());
}

#[derive(Debug, Clone)]
enum Input {
    Advance(u64),
    Action(&'static str),
    Entry(ListKind, &'static str),
    StatusEvent,
    Query(QueryKind),
    ExternalSession(bool),
    Fail(MockOp),
}

fn input_strategy() -> impl Strategy<Value = Input> {
    prop_oneof![
        (50u64..3_000).prop_map(Input::Advance),
        prop::sample::select(vec!["unlock", "lock", "unlatch", "fullLock", "bogus"])
            .prop_map(Input::Action),
        prop::sample::select(vec![
            (ListKind::Keypad, r#"{"action":"add","name":"A","code":246813}"#),
            (ListKind::Keypad, r#"{"action":"update","codeId":5,"enabled":0}"#),
            (ListKind::Keypad, r#"{"action":"delete","codeId":2}"#),
            (ListKind::TimeControl, r#"{"action":"add","time":"06:45","lockAction":"unlock"}"#),
        ])
        .prop_map(|(kind, json)| Input::Entry(kind, json)),
        Just(Input::StatusEvent),
        prop::sample::select(QueryKind::ALL.to_vec()).prop_map(Input::Query),
        any::<bool>().prop_map(Input::ExternalSession),
        prop::sample::select(vec![MockOp::Action, MockOp::Status, MockOp::ListEntries, MockOp::EntryWrite])
            .prop_map(Input::Fail),
    ]
}

proptest! {
    #[test]
    fn at_most_one_exchange_per_tick(inputs in prop::collection::vec(input_strategy(), 1..80)) {
        let (mut engine, clock) = ready_lock(base_config());
        for input in inputs {
            match input {
                Input::Advance(ms) => clock.advance(ms),
                Input::Action(name) => {
                    engine.on_action_received(name);
                }
                Input::Entry(kind, json) => {
                    engine.on_entry_command(kind, json);
                }
                Input::StatusEvent => engine.on_device_event(latchlink_engine::DeviceEvent::StatusUpdated),
                Input::Query(kind) => engine.on_query_request(kind),
                Input::ExternalSession(active) => engine.set_external_session_active(active),
                Input::Fail(op) => engine.device_mut().fail_next(op, DeviceError::Busy, 1),
            }
            let before = engine.device().calls().len();
            engine.update();
            let made = engine.device().calls().len() - before;
            prop_assert!(made <= 1, "one tick made {} exchanges", made);
        }
    }
}
