// THEORY:
// The `pose` module holds the only geometry the station knows about. There is no
// kinematics here: every configuration the arm ever reaches is a precomputed vector
// of servo angles, either read from the station table or derived from one by a fixed
// substitution rule.
//
// A `JointPose` is a "dumb" value type, like a pixel is for the vision layers. It is
// `Copy`, it never changes after construction, and it knows how to produce the six
// element command vector the servo bus expects. `FixedPoses` bundles the handful of
// named poses the choreography needs and owns the one derivation rule that matters:
// the lift pose keeps the base rotation of the approach pose and replaces the
// elevation joints with the lift template.

use serde::{Deserialize, Serialize};

/// Number of arm joints, not counting the gripper.
pub const JOINT_COUNT: usize = 5;

/// An absolute servo configuration: five joint angles and a gripper angle, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i16; 6]", into = "[i16; 6]")]
pub struct JointPose {
    /// Base, shoulder, elbow, wrist pitch and wrist roll.
    pub joints: [i16; JOINT_COUNT],
    pub gripper: i16,
}

impl JointPose {
    pub const fn new(joints: [i16; JOINT_COUNT], gripper: i16) -> Self {
        Self { joints, gripper }
    }

    /// The base (rotation) joint.
    pub fn base(&self) -> i16 {
        self.joints[0]
    }

    /// Same joints, different gripper angle.
    pub fn with_gripper(self, gripper: i16) -> Self {
        Self { gripper, ..self }
    }

    /// The six element vector sent over the servo bus, gripper last.
    pub fn to_command(&self) -> [i16; 6] {
        let [a, b, c, d, e] = self.joints;
        [a, b, c, d, e, self.gripper]
    }
}

impl From<[i16; 6]> for JointPose {
    fn from(v: [i16; 6]) -> Self {
        Self::new([v[0], v[1], v[2], v[3], v[4]], v[5])
    }
}

impl From<JointPose> for [i16; 6] {
    fn from(pose: JointPose) -> Self {
        pose.to_command()
    }
}

impl std::fmt::Display for JointPose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.to_command();
        write!(f, "[{}, {}, {}, {}, {}, {}]", c[0], c[1], c[2], c[3], c[4], c[5])
    }
}

/// The named poses used by the pick-and-place choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedPoses {
    pub home: JointPose,
    pub drop: JointPose,
    /// Shoulder, elbow, wrist pitch and wrist roll used while carrying an object.
    pub lift: [i16; JOINT_COUNT - 1],
    pub gripper_open: i16,
    pub gripper_close: i16,
}

impl Default for FixedPoses {
    fn default() -> Self {
        Self {
            home: JointPose::new([90, 130, 30, 0, 90], 40),
            drop: JointPose::new([90, 110, 0, 10, 90], 40),
            lift: [130, 30, 0, 90],
            gripper_open: 40,
            gripper_close: 138,
        }
    }
}

impl FixedPoses {
    /// Lift pose for a given approach: keep the base rotation, replace the elevation
    /// joints with the lift template, gripper closed.
    pub fn lift_from(&self, approach: &JointPose) -> JointPose {
        let [shoulder, elbow, wrist, roll] = self.lift;
        JointPose::new(
            [approach.base(), shoulder, elbow, wrist, roll],
            self.gripper_close,
        )
    }

    /// The approach pose with the gripper forced open.
    pub fn approach_open(&self, approach: &JointPose) -> JointPose {
        approach.with_gripper(self.gripper_open)
    }

    /// The drop pose while still holding the object.
    pub fn drop_closed(&self) -> JointPose {
        self.drop.with_gripper(self.gripper_close)
    }
}
