// THEORY:
// The building blocks of the station, from the wire up: poses and the station table,
// the servo protocol and the actuator that speaks it, the choreography on top of the
// actuator, and beside them the ledger, the gate and the perception loop. None of
// these know about each other's threads; the orchestrator wires them together.

pub mod actuator;
pub mod dofbot;
pub mod ledger;
pub mod perception;
pub mod pose;
pub mod sequencer;
pub mod station;
pub mod task_gate;
