// THEORY:
// The `Orchestrator` is the top-level API of the station, the way a pipeline is the
// top-level API of a vision engine. The display loop owns it and talks to it from a
// single thread; it turns "the customer pressed Pick Apple" into an admitted, charged
// and executed sale without ever blocking that thread.
//
// Key architectural principles:
// 1.  **Admission Before Mutation**: Unknown stations and a held gate are rejected
//     before anything is touched. Rejected requests are dropped, never queued.
// 2.  **One Worker at a Time**: An accepted pick spawns exactly one blocking worker.
//     The worker owns the `GatePass` for as long as the arm is moving.
// 3.  **Single Writer**: The worker never writes display-visible state. It posts
//     `StationEvent`s; the display loop applies them in `pump`, on its own tick. The
//     final event carries the `GatePass`, so the gate opens on the display context,
//     together with the controls. If that event cannot be delivered, the pass is
//     dropped with it and the gate opens anyway.
// 4.  **Managed Shutdown**: The worker handle is kept. Shutdown either waits for the
//     sequence to finish or explicitly abandons the handle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::MarketConfig;
use crate::core_modules::actuator::ActuatorDriver;
use crate::core_modules::ledger::SessionLedger;
use crate::core_modules::sequencer::MotionSequencer;
use crate::core_modules::station::{PickCommand, Station, StationTable};
use crate::core_modules::task_gate::{GatePass, TaskGate};
use crate::error::{ActuatorError, PickError};

/// Messages posted from the motion worker to the display context.
#[derive(Debug)]
pub enum StationEvent {
    /// New status line.
    Status(String),
    /// Charge the price of `fruit` to the ledger.
    Charge { fruit: String },
    /// The sequence ended. Applying this event releases the gate.
    Finished {
        fruit: String,
        outcome: Result<(), ActuatorError>,
        pass: GatePass,
    },
}

/// Display-visible state, written only on the display context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub status: String,
    pub total: u32,
    pub controls_enabled: bool,
    pub checked_out: bool,
}

impl PanelState {
    pub fn cost_text(&self) -> String {
        format!("Total Cost: Rs {}", self.total)
    }
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            status: "System Ready".to_string(),
            total: 0,
            controls_enabled: true,
            checked_out: false,
        }
    }
}

/// What to do with an in-flight motion worker at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Wait for the sequence to run to completion or fault.
    Wait,
    /// Drop the worker handle. The blocking task still finishes its sequence on the
    /// runtime's blocking pool; nobody observes the result.
    Detach,
}

/// Dispatches pick requests and owns the ledger, the gate and the display state.
pub struct Orchestrator {
    stations: Arc<StationTable>,
    ledger: SessionLedger,
    gate: TaskGate,
    sequencer: Arc<Mutex<MotionSequencer>>,
    events_tx: mpsc::UnboundedSender<StationEvent>,
    events_rx: mpsc::UnboundedReceiver<StationEvent>,
    worker: Option<JoinHandle<()>>,
    panel: PanelState,
}

impl Orchestrator {
    pub fn new(stations: Arc<StationTable>, sequencer: MotionSequencer) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            ledger: SessionLedger::new(Arc::clone(&stations)),
            stations,
            gate: TaskGate::new(),
            sequencer: Arc::new(Mutex::new(sequencer)),
            events_tx,
            events_rx,
            worker: None,
            panel: PanelState::default(),
        }
    }

    /// Builds the station from configuration, binding the arm or simulating it.
    pub fn from_config(config: &MarketConfig) -> Self {
        let driver = ActuatorDriver::connect(&config.arm, config.timing);
        let sequencer = MotionSequencer::new(driver, config.poses);
        Self::new(Arc::new(config.station_table()), sequencer)
    }

    /// Admits a pick for `fruit` and starts the motion worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_pick_requested(&mut self, fruit: &str) -> Result<(), PickError> {
        let station = self
            .stations
            .get(fruit)
            .cloned()
            .ok_or_else(|| PickError::UnknownStation(fruit.to_string()))?;
        if self.panel.checked_out {
            return Err(PickError::SessionClosed);
        }
        let pass = self.gate.try_acquire().ok_or(PickError::BusyRejection)?;

        info!(fruit, price = station.price, "pick accepted");
        self.panel.controls_enabled = false;
        self.panel.status = format!("Picking {fruit}...");

        let events = self.events_tx.clone();
        let sequencer = Arc::clone(&self.sequencer);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            run_worker(station, pass, sequencer, events)
        }));
        Ok(())
    }

    /// Runs a pre-bound command.
    pub fn dispatch(&mut self, command: &PickCommand) -> Result<(), PickError> {
        self.on_pick_requested(&command.station)
    }

    /// Applies every pending worker event. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: StationEvent) {
        match event {
            StationEvent::Status(text) => self.panel.status = text,
            StationEvent::Charge { fruit } => match self.ledger.add_fruit(&fruit) {
                Ok(total) => self.panel.total = total,
                Err(e) => warn!(error = %e, "charge refused"),
            },
            StationEvent::Finished { fruit, outcome, pass } => {
                match outcome {
                    Ok(()) => {
                        info!(fruit, total = self.ledger.total(), "pick complete");
                        self.panel.status = "Ready".to_string();
                    }
                    Err(e) => {
                        error!(fruit, error = %e, "pick failed");
                        self.panel.status = format!("Error: {e}");
                    }
                }
                self.panel.controls_enabled = !self.panel.checked_out;
                pass.release();
            }
        }
    }

    /// Clears the bill.
    pub fn reset(&mut self) {
        self.ledger.reset();
        self.panel.total = 0;
        self.panel.status = "Cost Reset".to_string();
        info!("cost reset");
    }

    /// Closes the session: no further picks are admitted. Returns the final total.
    pub fn checkout(&mut self) -> u32 {
        self.panel.checked_out = true;
        self.panel.controls_enabled = false;
        self.panel.status = "Thank you for your purchase!".to_string();
        info!(total = self.ledger.total(), "checked out");
        self.ledger.total()
    }

    pub fn panel(&self) -> &PanelState {
        &self.panel
    }

    pub fn total(&self) -> u32 {
        self.ledger.total()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    pub fn stations(&self) -> &Arc<StationTable> {
        &self.stations
    }

    pub fn commands(&self) -> Vec<PickCommand> {
        self.stations.commands()
    }

    pub fn is_simulated(&self) -> bool {
        self.sequencer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_simulated()
    }

    /// Waits for the current worker, if any, then applies its events.
    pub async fn wait_for_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "motion worker join failed");
            }
        }
        self.pump();
    }

    /// Stops the station according to `policy` and returns the final total.
    pub async fn shutdown(mut self, policy: ShutdownPolicy) -> u32 {
        match (self.worker.take(), policy) {
            (Some(handle), ShutdownPolicy::Wait) => {
                if !handle.is_finished() {
                    info!("waiting for the arm to finish its sequence");
                }
                if let Err(e) = handle.await {
                    error!(error = %e, "motion worker join failed");
                }
                self.pump();
            }
            (Some(handle), ShutdownPolicy::Detach) => {
                if !handle.is_finished() {
                    warn!("detaching from an in-flight motion sequence");
                }
                drop(handle);
            }
            (None, _) => {}
        }
        self.ledger.total()
    }
}

fn run_worker(
    station: Station,
    pass: GatePass,
    sequencer: Arc<Mutex<MotionSequencer>>,
    events: mpsc::UnboundedSender<StationEvent>,
) {
    let _ = events.send(StationEvent::Charge {
        fruit: station.name.clone(),
    });

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut sequencer = sequencer.lock().unwrap_or_else(PoisonError::into_inner);
        sequencer.run_pick_and_place(&station.pose, |stage| {
            let _ = events.send(StationEvent::Status(stage.status_text().to_string()));
        })
    }))
    .unwrap_or_else(|payload| Err(ActuatorError::WorkerLost(panic_message(payload.as_ref()))));

    // A closed channel hands the event back; dropping it releases the gate.
    let _ = events.send(StationEvent::Finished {
        fruit: station.name,
        outcome,
        pass,
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::actuator::{MotionTiming, RecordingPacer};
    use crate::core_modules::pose::FixedPoses;

    fn simulated_station() -> Orchestrator {
        let driver = ActuatorDriver::simulated(MotionTiming::default()).with_pacer(RecordingPacer::new());
        Orchestrator::new(
            Arc::new(StationTable::new(StationTable::market_defaults())),
            MotionSequencer::new(driver, FixedPoses::default()),
        )
    }

    #[test]
    fn panel_starts_ready_with_zero_cost() {
        let panel = PanelState::default();
        assert!(panel.controls_enabled);
        assert_eq!(panel.cost_text(), "Total Cost: Rs 0");
    }

    #[test]
    fn undelivered_completion_still_releases_the_gate() {
        let gate = TaskGate::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let pass = gate.try_acquire().unwrap();

        let sent = tx.send(StationEvent::Finished {
            fruit: "apple".into(),
            outcome: Ok(()),
            pass,
        });

        assert!(sent.is_err());
        drop(sent);
        assert!(!gate.is_held());
    }

    #[test]
    fn rejection_touches_nothing() {
        let mut orch = simulated_station();
        let before = orch.panel().clone();

        assert!(matches!(orch.on_pick_requested("durian"), Err(PickError::UnknownStation(_))));

        assert_eq!(orch.panel(), &before);
        assert!(!orch.is_busy());
        assert!(orch.is_simulated());
    }

    #[test]
    fn panic_payloads_become_text() {
        let text: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(text.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
    }
}
