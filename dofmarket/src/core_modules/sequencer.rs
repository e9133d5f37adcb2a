// THEORY:
// The `MotionSequencer` is the choreography of a single sale. It knows nothing about
// the gate, the ledger or the display: it is handed the approach pose of a station and
// walks the arm through seven fixed stages, announcing each one through a callback so
// that whoever runs it can report progress somewhere else.
//
// Key architectural principles:
// 1.  **Fixed Script**: The stages and their order never change. Only the approach
//     pose varies, and the lift pose is derived from it by `FixedPoses::lift_from`.
// 2.  **Blocking by Contract**: `run_pick_and_place` returns only when the arm is back
//     home or has faulted. Running it off the display context is the caller's job.
// 3.  **Abort on Fault**: The first failing command ends the sequence. The arm is left
//     at its last commanded pose and the error names the stage it happened in.

use std::fmt;

use crate::core_modules::actuator::ActuatorDriver;
use crate::core_modules::pose::{FixedPoses, JointPose};
use crate::error::ActuatorError;

/// One step of the pick-and-place choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MovingHome,
    Reaching,
    Grabbing,
    Lifting,
    MovingToDrop,
    Dropping,
    ReturningHome,
    /// Reported once after the last stage completes.
    Ready,
}

impl Stage {
    /// The seven working stages, in execution order.
    pub const SEQUENCE: [Stage; 7] = [
        Stage::MovingHome,
        Stage::Reaching,
        Stage::Grabbing,
        Stage::Lifting,
        Stage::MovingToDrop,
        Stage::Dropping,
        Stage::ReturningHome,
    ];

    /// Status text shown to the customer.
    pub fn status_text(&self) -> &'static str {
        match self {
            Stage::MovingHome => "Moving Home...",
            Stage::Reaching => "Reaching for fruit...",
            Stage::Grabbing => "Grabbing...",
            Stage::Lifting => "Lifting fruit...",
            Stage::MovingToDrop => "Moving to drop zone...",
            Stage::Dropping => "Dropping fruit...",
            Stage::ReturningHome => "Returning Home...",
            Stage::Ready => "Ready",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::MovingHome => "moving home",
            Stage::Reaching => "reaching",
            Stage::Grabbing => "grabbing",
            Stage::Lifting => "lifting",
            Stage::MovingToDrop => "moving to drop zone",
            Stage::Dropping => "dropping",
            Stage::ReturningHome => "returning home",
            Stage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Runs the fixed pick-and-place choreography on an owned actuator.
#[derive(Debug)]
pub struct MotionSequencer {
    driver: ActuatorDriver,
    poses: FixedPoses,
}

impl MotionSequencer {
    pub fn new(driver: ActuatorDriver, poses: FixedPoses) -> Self {
        Self { driver, poses }
    }

    pub fn poses(&self) -> &FixedPoses {
        &self.poses
    }

    pub fn is_simulated(&self) -> bool {
        self.driver.is_simulated()
    }

    /// Picks the object at `target` and drops it in the drop zone.
    ///
    /// `on_stage` is called before each stage and with [`Stage::Ready`] once the arm
    /// is home again. A fault aborts the remaining stages.
    pub fn run_pick_and_place(
        &mut self,
        target: &JointPose,
        mut on_stage: impl FnMut(Stage),
    ) -> Result<(), ActuatorError> {
        for stage in Stage::SEQUENCE {
            on_stage(stage);
            self.perform(stage, target)
                .map_err(|source| ActuatorError::SequenceAborted {
                    stage,
                    source: Box::new(source),
                })?;
        }
        on_stage(Stage::Ready);
        Ok(())
    }

    fn perform(&mut self, stage: Stage, target: &JointPose) -> Result<(), ActuatorError> {
        let move_ms = self.driver.timing().move_ms;
        let poses = self.poses;
        match stage {
            Stage::MovingHome => {
                self.driver.move_to(&poses.home, move_ms)?;
                self.driver.set_gripper(poses.gripper_open)
            }
            Stage::Reaching => self.driver.move_to(&poses.approach_open(target), move_ms),
            Stage::Grabbing => self.driver.set_gripper(poses.gripper_close),
            Stage::Lifting => self.driver.move_to(&poses.lift_from(target), move_ms),
            Stage::MovingToDrop => self.driver.move_to(&poses.drop_closed(), move_ms),
            Stage::Dropping => self.driver.set_gripper(poses.gripper_open),
            Stage::ReturningHome => self.driver.move_to(&poses.home, move_ms),
            Stage::Ready => Ok(()),
        }
    }
}
