// THEORY:
// Every failure the station can meet falls into one of four families, and each family
// has its own enum so callers can match on exactly the cases they are able to handle:
//
// - `ActuatorError`: the arm. `HardwareUnavailable` only happens at startup and turns
//   the driver into a simulator; `HardwareFault` happens mid-sequence and aborts it.
// - `PerceptionError`: the camera and the detector. None of these stop the display
//   loop; a failed grab skips a tick and a missing detector means raw video.
// - `PickError`: admission of a pick request. These are rejections, not faults, and
//   they are raised before any shared state is touched.
// - `ConfigError`: loading and validating the configuration surface. These are the
//   only errors allowed to stop the process, and only before the loop starts.

use std::path::PathBuf;

use thiserror::Error;

use crate::core_modules::sequencer::Stage;

/// Failures of the actuation path.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// No servo bus could be bound at startup.
    #[error("arm hardware unavailable: {0}")]
    HardwareUnavailable(String),
    /// A bus write failed while a command was being issued.
    #[error("hardware fault on servo bus: {0}")]
    HardwareFault(String),
    /// A fault that aborted a pick-and-place sequence at a given stage.
    #[error("sequence aborted while {stage}: {source}")]
    SequenceAborted {
        stage: Stage,
        #[source]
        source: Box<ActuatorError>,
    },
    /// The worker running the sequence died before reporting.
    #[error("motion worker stopped unexpectedly: {0}")]
    WorkerLost(String),
}

/// Failures of the perception path. None of them are fatal to the display loop.
#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("frame acquisition failed: {0}")]
    FrameUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Reasons a pick request is turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("Arm is currently moving! Please wait.")]
    BusyRejection,
    #[error("no station stocks '{0}'")]
    UnknownStation(String),
    #[error("session is checked out")]
    SessionClosed,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}
