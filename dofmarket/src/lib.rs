// THEORY:
// This file is the main entry point for the `dofmarket` library crate. It exposes
// the `Orchestrator` and the configuration as the high-level interface of the
// station; a front end (the OpenCV console, the headless runner) owns a camera and a
// display, builds an `Orchestrator` from a `MarketConfig`, and forwards button
// presses to it. The building blocks under `core_modules` stay public so front ends
// can bind their own frame sources, detectors and servo buses.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod orchestrator;

pub use config::MarketConfig;
pub use orchestrator::{Orchestrator, PanelState, ShutdownPolicy, StationEvent};
