// Station-level behavior: admission, accounting, fault recovery and shutdown, with
// the arm replaced by a recording bus and blocking waits replaced by a recorder.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dofmarket::core_modules::actuator::{ActuatorDriver, MotionTiming, RecordingPacer, ServoBus};
use dofmarket::core_modules::pose::FixedPoses;
use dofmarket::core_modules::sequencer::MotionSequencer;
use dofmarket::core_modules::station::StationTable;
use dofmarket::error::{ActuatorError, PickError};
use dofmarket::{Orchestrator, ShutdownPolicy};

#[derive(Clone, Default)]
struct RecordingBus {
    commands: Arc<Mutex<Vec<[i16; 6]>>>,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
}

impl RecordingBus {
    fn push(&mut self, command: [i16; 6]) -> Result<(), ActuatorError> {
        let mut commands = self.commands.lock().unwrap();
        let index = commands.len();
        if self.panic_at == Some(index) {
            self.panic_at = None;
            drop(commands);
            panic!("servo driver crashed");
        }
        if self.fail_at == Some(index) {
            return Err(ActuatorError::HardwareFault("i2c nack".into()));
        }
        commands.push(command);
        Ok(())
    }

    fn count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

impl ServoBus for RecordingBus {
    fn write_pose(&mut self, angles: [i16; 6], _duration_ms: u16) -> Result<(), ActuatorError> {
        self.push(angles)
    }

    fn write_servo(&mut self, channel: u8, angle: i16, _duration_ms: u16) -> Result<(), ActuatorError> {
        self.push([i16::from(channel), angle, 0, 0, 0, 0])
    }
}

fn station(bus: RecordingBus) -> Orchestrator {
    let driver = ActuatorDriver::with_bus(Box::new(bus), MotionTiming::default())
        .with_pacer(RecordingPacer::new());
    let sequencer = MotionSequencer::new(driver, FixedPoses::default());
    Orchestrator::new(Arc::new(StationTable::new(StationTable::market_defaults())), sequencer)
}

#[tokio::test]
async fn only_one_pick_is_admitted_while_the_arm_moves() {
    let mut orch = station(RecordingBus::default());

    assert_eq!(orch.on_pick_requested("apple"), Ok(()));
    for fruit in ["banana", "kiwi", "apple", "lemon"] {
        assert_eq!(orch.on_pick_requested(fruit), Err(PickError::BusyRejection));
    }
    assert!(orch.is_busy());
    assert!(!orch.panel().controls_enabled);

    orch.wait_for_worker().await;

    assert!(!orch.is_busy());
    assert!(orch.panel().controls_enabled);
    assert_eq!(orch.total(), 20);
    assert_eq!(orch.on_pick_requested("banana"), Ok(()));
    orch.wait_for_worker().await;
    assert_eq!(orch.total(), 45);
}

#[tokio::test]
async fn gate_stays_held_until_the_display_applies_completion() {
    let mut orch = station(RecordingBus::default());
    orch.on_pick_requested("kiwi").unwrap();

    // The worker finishes quickly, but nothing is applied until `pump`.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orch.is_busy());
    assert_eq!(orch.on_pick_requested("kiwi"), Err(PickError::BusyRejection));

    orch.wait_for_worker().await;
    assert_eq!(orch.panel().status, "Ready");
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn ledger_accumulates_and_resets() {
    let mut orch = station(RecordingBus::default());
    for fruit in ["apple", "banana", "kiwi"] {
        orch.on_pick_requested(fruit).unwrap();
        orch.wait_for_worker().await;
    }
    assert_eq!(orch.total(), 75);
    assert_eq!(orch.panel().cost_text(), "Total Cost: Rs 75");

    orch.reset();

    assert_eq!(orch.total(), 0);
    assert_eq!(orch.panel().total, 0);
    assert_eq!(orch.panel().status, "Cost Reset");
}

#[tokio::test]
async fn unknown_station_issues_no_command_and_charges_nothing() {
    let bus = RecordingBus::default();
    let mut orch = station(bus.clone());

    let err = orch.on_pick_requested("durian").unwrap_err();

    assert_eq!(err, PickError::UnknownStation("durian".into()));
    assert!(!orch.is_busy());
    orch.wait_for_worker().await;
    assert_eq!(bus.count(), 0);
    assert_eq!(orch.total(), 0);
}

#[tokio::test]
async fn hardware_fault_releases_gate_and_reports_error() {
    let bus = RecordingBus { fail_at: Some(3), ..RecordingBus::default() };
    let mut orch = station(bus.clone());

    orch.on_pick_requested("lemon").unwrap();
    orch.wait_for_worker().await;

    assert!(orch.panel().status.starts_with("Error: "), "{}", orch.panel().status);
    assert!(orch.panel().status.contains("grabbing"));
    assert!(!orch.is_busy());
    assert!(orch.panel().controls_enabled);
    assert_eq!(bus.count(), 3);
    // The charge precedes the motion.
    assert_eq!(orch.total(), 40);
}

#[tokio::test]
async fn panicking_worker_still_releases_the_gate() {
    let bus = RecordingBus { panic_at: Some(1), ..RecordingBus::default() };
    let mut orch = station(bus);

    orch.on_pick_requested("lychee").unwrap();
    orch.wait_for_worker().await;

    assert!(!orch.is_busy());
    assert!(orch.panel().status.contains("servo driver crashed"));
    assert_eq!(orch.on_pick_requested("apple"), Ok(()));
    orch.wait_for_worker().await;
    assert_eq!(orch.panel().status, "Ready");
}

#[tokio::test]
async fn checkout_closes_the_session() {
    let mut orch = station(RecordingBus::default());
    orch.on_pick_requested("strawberry").unwrap();
    orch.wait_for_worker().await;

    assert_eq!(orch.checkout(), 60);

    assert_eq!(orch.on_pick_requested("apple"), Err(PickError::SessionClosed));
    assert!(!orch.panel().controls_enabled);
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn dispatch_uses_the_bound_station() {
    let mut orch = station(RecordingBus::default());
    let commands = orch.commands();
    assert_eq!(commands[1].key, '2');

    orch.dispatch(&commands[1]).unwrap();
    orch.wait_for_worker().await;

    assert_eq!(orch.total(), 25);
}

#[tokio::test]
async fn shutdown_waits_for_the_sequence() {
    let bus = RecordingBus::default();
    let mut orch = station(bus.clone());
    orch.on_pick_requested("apple").unwrap();

    let total = orch.shutdown(ShutdownPolicy::Wait).await;

    assert_eq!(total, 20);
    assert_eq!(bus.count(), 8);
}

#[tokio::test]
async fn shutdown_can_detach_from_a_running_sequence() {
    let timing = MotionTiming { move_ms: 40, grab_ms: 10, settle_margin_ms: 0 };
    let sequencer = MotionSequencer::new(ActuatorDriver::simulated(timing), FixedPoses::default());
    let mut orch = Orchestrator::new(Arc::new(StationTable::new(StationTable::market_defaults())), sequencer);
    orch.on_pick_requested("apple").unwrap();

    let started = Instant::now();
    orch.shutdown(ShutdownPolicy::Detach).await;

    assert!(started.elapsed() < Duration::from_millis(150));
}
