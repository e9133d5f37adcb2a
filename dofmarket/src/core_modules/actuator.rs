// THEORY:
// The `ActuatorDriver` is the only component that talks to the arm. It turns a pose
// into a bus command and then blocks its caller for as long as the servos need to get
// there, so that the next command in a choreography is never issued on top of a
// motion that is still running.
//
// Key architectural principles:
// 1.  **Exclusive Ownership**: The driver owns its `ServoBus`. Whoever owns the driver
//     (the motion sequencer) is the only code path that can move the arm.
// 2.  **Degenerate Simulation**: When no bus is bound, the driver logs every command
//     and waits only the nominal duration. Timing stays realistic and nothing can
//     fail, so the whole station runs on a laptop.
// 3.  **Settle Margin**: Real servos overshoot and ring. A hardware move waits the
//     commanded duration plus a fixed margin; the gripper waits its fixed window.
// 4.  **Injectable Pacing**: Blocking waits go through a `Pacer`. Production code
//     sleeps the thread; tests record the requested waits instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core_modules::pose::JointPose;
use crate::error::ActuatorError;

/// Servo channel of the gripper.
pub const GRIPPER_CHANNEL: u8 = 6;

/// The hardware boundary: absolute angle commands with a travel time.
pub trait ServoBus: Send {
    /// Commands all six servos at once, gripper last.
    fn write_pose(&mut self, angles: [i16; 6], duration_ms: u16) -> Result<(), ActuatorError>;
    /// Commands a single servo channel (1-based).
    fn write_servo(&mut self, channel: u8, angle: i16, duration_ms: u16) -> Result<(), ActuatorError>;
}

/// Blocks the calling context for a given time.
pub trait Pacer: Send {
    fn pause(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested waits without sleeping. Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingPacer {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Timing constants of the choreography, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTiming {
    /// Travel time of a full-arm move.
    pub move_ms: u32,
    /// Travel time and settle window of a gripper command.
    pub grab_ms: u32,
    /// Extra wait after a hardware move for mechanical settling.
    pub settle_margin_ms: u32,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            move_ms: 1500,
            grab_ms: 500,
            settle_margin_ms: 100,
        }
    }
}

/// Where the arm lives and whether to use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmSettings {
    /// Never open the bus; always simulate.
    pub simulate: bool,
    /// I2C character device of the expansion board.
    pub i2c_bus: String,
    /// 7-bit I2C address of the expansion board.
    pub i2c_address: u8,
}

impl Default for ArmSettings {
    fn default() -> Self {
        Self {
            simulate: false,
            i2c_bus: "/dev/i2c-1".to_string(),
            i2c_address: 0x15,
        }
    }
}

/// Issues absolute joint and gripper commands, blocking until they complete.
pub struct ActuatorDriver {
    bus: Option<Box<dyn ServoBus>>,
    timing: MotionTiming,
    pacer: Box<dyn Pacer>,
}

impl ActuatorDriver {
    /// A driver with no bus: logs commands and waits the nominal durations.
    pub fn simulated(timing: MotionTiming) -> Self {
        Self {
            bus: None,
            timing,
            pacer: Box::new(ThreadPacer),
        }
    }

    pub fn with_bus(bus: Box<dyn ServoBus>, timing: MotionTiming) -> Self {
        Self {
            bus: Some(bus),
            timing,
            pacer: Box::new(ThreadPacer),
        }
    }

    /// Opens the arm described by `settings`, falling back to simulation when the
    /// hardware cannot be bound. The fallback is permanent for this driver.
    pub fn connect(settings: &ArmSettings, timing: MotionTiming) -> Self {
        if settings.simulate {
            info!("arm simulation requested by configuration");
            return Self::simulated(timing);
        }
        match open_bus(settings) {
            Ok(bus) => {
                info!(bus = %settings.i2c_bus, address = settings.i2c_address, "arm connected");
                Self::with_bus(bus, timing)
            }
            Err(e) => {
                warn!(error = %e, "running without arm, commands will be simulated");
                Self::simulated(timing)
            }
        }
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.bus.is_none()
    }

    pub fn timing(&self) -> &MotionTiming {
        &self.timing
    }

    /// Moves every joint and the gripper to `pose` over `duration_ms`, then waits for
    /// the motion (plus the settle margin on real hardware).
    pub fn move_to(&mut self, pose: &JointPose, duration_ms: u32) -> Result<(), ActuatorError> {
        let nominal = Duration::from_millis(u64::from(duration_ms));
        match self.bus.as_mut() {
            Some(bus) => {
                bus.write_pose(pose.to_command(), wire_duration(duration_ms))?;
                let settle = Duration::from_millis(u64::from(self.timing.settle_margin_ms));
                self.pacer.pause(nominal + settle);
            }
            None => {
                info!(%pose, duration_ms, "[SIM] moving arm");
                self.pacer.pause(nominal);
            }
        }
        Ok(())
    }

    /// Drives the gripper channel alone and waits its fixed settle window.
    pub fn set_gripper(&mut self, angle: i16) -> Result<(), ActuatorError> {
        let grab_ms = self.timing.grab_ms;
        match self.bus.as_mut() {
            Some(bus) => bus.write_servo(GRIPPER_CHANNEL, angle, wire_duration(grab_ms))?,
            None => info!(angle, "[SIM] setting gripper"),
        }
        self.pacer.pause(Duration::from_millis(u64::from(grab_ms)));
        Ok(())
    }
}

impl std::fmt::Debug for ActuatorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorDriver")
            .field("simulated", &self.is_simulated())
            .field("timing", &self.timing)
            .finish()
    }
}

fn wire_duration(duration_ms: u32) -> u16 {
    u16::try_from(duration_ms).unwrap_or(u16::MAX)
}

#[cfg(feature = "hardware")]
fn open_bus(settings: &ArmSettings) -> Result<Box<dyn ServoBus>, ActuatorError> {
    let bus = crate::core_modules::dofbot::DofbotBus::open(&settings.i2c_bus, settings.i2c_address)?;
    Ok(Box::new(bus))
}

#[cfg(not(feature = "hardware"))]
fn open_bus(_settings: &ArmSettings) -> Result<Box<dyn ServoBus>, ActuatorError> {
    Err(ActuatorError::HardwareUnavailable(
        "built without the `hardware` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default, Clone)]
    struct FlakyBus {
        writes: Arc<Mutex<Vec<[i16; 6]>>>,
        fail: bool,
    }

    impl ServoBus for FlakyBus {
        fn write_pose(&mut self, angles: [i16; 6], _duration_ms: u16) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::HardwareFault("i2c nack".into()));
            }
            self.writes.lock().unwrap().push(angles);
            Ok(())
        }

        fn write_servo(&mut self, _channel: u8, _angle: i16, _duration_ms: u16) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::HardwareFault("i2c nack".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn simulated_move_waits_nominal_duration_only() {
        let pacer = RecordingPacer::new();
        let mut driver = ActuatorDriver::simulated(MotionTiming::default()).with_pacer(pacer.clone());

        driver.move_to(&JointPose::from([90, 130, 30, 0, 90, 40]), 1500).unwrap();
        driver.set_gripper(138).unwrap();

        assert_eq!(
            pacer.waits(),
            vec![Duration::from_millis(1500), Duration::from_millis(500)]
        );
    }

    #[test]
    fn hardware_move_adds_settle_margin() {
        let pacer = RecordingPacer::new();
        let bus = FlakyBus::default();
        let mut driver =
            ActuatorDriver::with_bus(Box::new(bus.clone()), MotionTiming::default()).with_pacer(pacer.clone());

        driver.move_to(&JointPose::from([65, 90, -15, 90, 90, 40]), 1500).unwrap();

        assert_eq!(pacer.waits(), vec![Duration::from_millis(1600)]);
        assert_eq!(bus.writes.lock().unwrap().as_slice(), &[[65, 90, -15, 90, 90, 40]]);
    }

    #[test]
    fn bus_failure_is_a_hardware_fault() {
        let pacer = RecordingPacer::new();
        let bus = FlakyBus { fail: true, ..FlakyBus::default() };
        let mut driver = ActuatorDriver::with_bus(Box::new(bus), MotionTiming::default()).with_pacer(pacer.clone());

        let err = driver.move_to(&JointPose::from([90, 90, 90, 90, 90, 40]), 1500).unwrap_err();
        assert!(matches!(err, ActuatorError::HardwareFault(_)));
        assert!(driver.set_gripper(40).is_err());
        assert!(pacer.waits().is_empty());
    }

    #[test]
    fn simulated_driver_blocks_in_real_time() {
        let timing = MotionTiming { move_ms: 40, grab_ms: 20, settle_margin_ms: 100 };
        let mut driver = ActuatorDriver::simulated(timing);
        let start = Instant::now();
        driver.move_to(&JointPose::from([90, 130, 30, 0, 90, 40]), 40).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn simulate_setting_skips_the_bus() {
        let settings = ArmSettings { simulate: true, ..ArmSettings::default() };
        assert!(ActuatorDriver::connect(&settings, MotionTiming::default()).is_simulated());
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn missing_hardware_falls_back_to_simulation() {
        let driver = ActuatorDriver::connect(&ArmSettings::default(), MotionTiming::default());
        assert!(driver.is_simulated());
    }
}
