// THEORY:
// The DOFBOT expansion board exposes its six bus servos as I2C registers. This module
// is the wire format: angle to servo position conversion and the register layout of
// the two commands the station uses. The encoding is pure and always compiled so it
// can be tested anywhere; the `DofbotBus` that actually owns the I2C device only
// exists with the `hardware` feature.
//
// Register layout:
// - `0x1D`: all six servos. Six big-endian positions, then a big-endian duration.
// - `0x10 + channel`: one servo. Position, then duration.

use tracing::warn;

/// Default 7-bit address of the expansion board.
pub const DEFAULT_ADDRESS: u8 = 0x15;

const REG_WRITE_ALL: u8 = 0x1D;
const REG_WRITE_ONE: u8 = 0x10;

const POS_MIN: i32 = 900;
const POS_MAX: i32 = 3100;
const WRIST_ROLL_POS_MIN: i32 = 380;
const WRIST_ROLL_POS_MAX: i32 = 3700;
const WRIST_ROLL_RANGE: i16 = 270;
const SERVO_RANGE: i16 = 180;

/// Converts an angle in degrees to the servo position of a 1-based channel.
/// Out-of-range angles are clamped to what the servo can reach.
pub fn angle_to_position(channel: u8, angle: i16) -> u16 {
    let range = if channel == 5 { WRIST_ROLL_RANGE } else { SERVO_RANGE };
    let clamped = angle.clamp(0, range);
    if clamped != angle {
        warn!(channel, angle, clamped, "servo angle out of range, clamping");
    }
    let position = match channel {
        // Shoulder, elbow and wrist pitch are mounted mirrored.
        2..=4 => scale(SERVO_RANGE - clamped, SERVO_RANGE, POS_MIN, POS_MAX),
        5 => scale(clamped, WRIST_ROLL_RANGE, WRIST_ROLL_POS_MIN, WRIST_ROLL_POS_MAX),
        _ => scale(clamped, SERVO_RANGE, POS_MIN, POS_MAX),
    };
    position as u16
}

fn scale(angle: i16, range: i16, lo: i32, hi: i32) -> i32 {
    lo + (hi - lo) * i32::from(angle) / i32::from(range)
}

/// Register byte followed by the payload of an all-servo write.
pub fn encode_pose(angles: [i16; 6], duration_ms: u16) -> [u8; 15] {
    let mut frame = [0u8; 15];
    frame[0] = REG_WRITE_ALL;
    for (i, angle) in angles.iter().enumerate() {
        let [hi, lo] = angle_to_position(i as u8 + 1, *angle).to_be_bytes();
        frame[1 + i * 2] = hi;
        frame[2 + i * 2] = lo;
    }
    let [hi, lo] = duration_ms.to_be_bytes();
    frame[13] = hi;
    frame[14] = lo;
    frame
}

/// Register byte followed by the payload of a single-servo write.
pub fn encode_servo(channel: u8, angle: i16, duration_ms: u16) -> [u8; 5] {
    let [p_hi, p_lo] = angle_to_position(channel, angle).to_be_bytes();
    let [d_hi, d_lo] = duration_ms.to_be_bytes();
    [REG_WRITE_ONE + channel, p_hi, p_lo, d_hi, d_lo]
}

#[cfg(feature = "hardware")]
pub use bus::DofbotBus;

#[cfg(feature = "hardware")]
mod bus {
    use embedded_hal::i2c::I2c;
    use linux_embedded_hal::I2cdev;

    use super::{encode_pose, encode_servo};
    use crate::core_modules::actuator::ServoBus;
    use crate::error::ActuatorError;

    /// The expansion board on a Linux I2C character device.
    pub struct DofbotBus {
        dev: I2cdev,
        address: u8,
    }

    impl DofbotBus {
        pub fn open(path: &str, address: u8) -> Result<Self, ActuatorError> {
            let dev = I2cdev::new(path)
                .map_err(|e| ActuatorError::HardwareUnavailable(format!("{path}: {e:?}")))?;
            Ok(Self { dev, address })
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), ActuatorError> {
            self.dev
                .write(self.address, frame)
                .map_err(|e| ActuatorError::HardwareFault(format!("i2c write to {:#04x}: {e:?}", self.address)))
        }
    }

    impl ServoBus for DofbotBus {
        fn write_pose(&mut self, angles: [i16; 6], duration_ms: u16) -> Result<(), ActuatorError> {
            self.send(&encode_pose(angles, duration_ms))
        }

        fn write_servo(&mut self, channel: u8, angle: i16, duration_ms: u16) -> Result<(), ActuatorError> {
            self.send(&encode_servo(channel, angle, duration_ms))
        }
    }
}
