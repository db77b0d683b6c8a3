//! Conversion between physical units and raw device steps.
//!
//! Scale factors are fixed per motor: the energy reel runs 75000 raw steps per
//! revolution, both goniometer motors 8000 raw steps per 90 degrees
//! (0.01125 degrees per step). The translation motor has no determined
//! calibration yet and maps one-to-one; its "unit" is the raw step itself.

use crate::motor::Motor;

/// Raw steps per revolution of the energy reel.
pub const STEPS_PER_REVOLUTION: f64 = 75_000.0;

/// Degrees travelled per raw step of a goniometer motor (90 deg / 8000 steps).
pub const DEGREES_PER_STEP: f64 = 90.0 / 8000.0;

/// Convert a physical unit value into raw device steps for one motor.
pub fn to_raw_steps(motor: Motor, value: f64) -> i32 {
    match motor {
        Motor::Energy => (value * STEPS_PER_REVOLUTION).round() as i32,
        Motor::Theta | Motor::TwoTheta => (value / DEGREES_PER_STEP).round() as i32,
        // Calibration undetermined; identity mapping.
        Motor::Translation => value.round() as i32,
    }
}

/// Convert raw device steps back into the motor's physical unit.
pub fn to_unit_value(motor: Motor, raw_steps: i32) -> f64 {
    match motor {
        Motor::Energy => f64::from(raw_steps) / STEPS_PER_REVOLUTION,
        Motor::Theta | Motor::TwoTheta => f64::from(raw_steps) * DEGREES_PER_STEP,
        Motor::Translation => f64::from(raw_steps),
    }
}
