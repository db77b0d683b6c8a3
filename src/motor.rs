//! Motor controller: selection, direction resolution, step-limit splitting and
//! persisted absolute-position accounting.
//!
//! The device's position register is only meaningful since the last selection
//! and is not retained across power cycles, so motors 1-3 carry a logical
//! absolute position persisted in the settings store. It is updated by the
//! raw-step delta *actually achieved* — the full requested amount when a move
//! arrives, the observed device delta when it is interrupted — and written
//! through synchronously after every change. The energy motor has no persisted
//! position; its device-reported position is authoritative.

use log::info;

use crate::cancel::CancelToken;
use crate::convert::{to_raw_steps, to_unit_value};
use crate::device::{Rsm, WaitOutcome, MAX_STEPS_PER_MOVE};
use crate::error::{RsmError, RsmResult};
use crate::link::Transport;
use crate::settings::SettingsStore;

/// Selecting this id removes voltage from all motors (safe idle).
pub const DEENERGIZE_ID: u8 = 4;

/// The four motors of the spectrometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    /// Motor 0: selects the monochromator energy via reel rotation.
    Energy,
    /// Motor 1: theta angle of the sample holder.
    Theta,
    /// Motor 2: two-theta angle of the second detector.
    TwoTheta,
    /// Motor 3: sample holder translation (calibration undetermined).
    Translation,
}

impl Motor {
    pub fn id(self) -> u8 {
        match self {
            Motor::Energy => 0,
            Motor::Theta => 1,
            Motor::TwoTheta => 2,
            Motor::Translation => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Motor::Energy),
            1 => Some(Motor::Theta),
            2 => Some(Motor::TwoTheta),
            3 => Some(Motor::Translation),
            _ => None,
        }
    }

    /// Label of the motor's physical unit.
    pub fn unit(self) -> &'static str {
        match self {
            Motor::Energy => "rev",
            Motor::Theta | Motor::TwoTheta => "deg",
            Motor::Translation => "step",
        }
    }

    /// Motors 1-3 carry a persisted absolute position; motor 0 does not.
    pub fn has_persisted_position(self) -> bool {
        !matches!(self, Motor::Energy)
    }
}

/// Device direction bit for a signed unit step.
///
/// The motors are wired with different positive-rotation conventions: on the
/// two-theta motor the bit is inverted relative to the others.
pub fn direction_bit(motor: Motor, positive: bool) -> u8 {
    match motor {
        Motor::TwoTheta => u8::from(!positive),
        _ => u8::from(positive),
    }
}

/// Direction bit for `step`, or `None` for a zero step (a no-op, not a move).
pub fn direction_for(motor: Motor, step: f64) -> Option<u8> {
    if step == 0.0 {
        None
    } else {
        Some(direction_bit(motor, step > 0.0))
    }
}

/// Split a raw step count into per-command sizes respecting the device's
/// 32767-steps-per-command hard limit. Sizes sum exactly to `total`.
pub fn split_steps(total: u32) -> Vec<u16> {
    let limit = u32::from(MAX_STEPS_PER_MOVE);
    let mut chunks = vec![MAX_STEPS_PER_MOVE; (total / limit) as usize];
    let residual = (total % limit) as u16;
    if residual > 0 {
        chunks.push(residual);
    }
    chunks
}

/// Result of a motor move attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The full requested distance was travelled.
    Arrived { raw_delta: i32 },
    /// The move was interrupted; `raw_delta` is the achieved device delta.
    Stopped { raw_delta: i32 },
    /// A zero step was requested; no command was issued.
    NoOp,
}

/// State machine over motor selection and position bookkeeping.
pub struct MotorDrive<S: SettingsStore> {
    store: S,
}

impl<S: SettingsStore> MotorDrive<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persisted absolute position of a motor, in raw steps.
    pub fn absolute_position(&self, motor: Motor) -> RsmResult<i64> {
        self.store.absolute_position(motor)
    }

    /// Move `motor` by a signed step in its physical unit.
    ///
    /// Resolves the direction, converts to raw steps, splits across the
    /// per-command step limit and waits interruptibly after each sub-move.
    /// The motor is de-energized (id 4 selected) when the sequence ends.
    pub fn move_by<T: Transport>(
        &mut self,
        rsm: &mut Rsm<T>,
        cancel: &CancelToken,
        motor: Motor,
        step: f64,
    ) -> RsmResult<MoveOutcome> {
        let Some(direction) = direction_for(motor, step) else {
            return Ok(MoveOutcome::NoOp);
        };
        let raw = to_raw_steps(motor, step.abs());
        if raw == 0 {
            return Ok(MoveOutcome::NoOp);
        }

        rsm.motor_select(motor.id())?;
        let before = rsm.motor_position()?;
        info!(
            "motor {} moving {:+} {} ({} raw steps) from position {}",
            motor.id(),
            step,
            motor.unit(),
            raw,
            before
        );

        let wait = match self.issue_chunks(rsm, cancel, direction, raw as u32) {
            Ok(wait) => wait,
            Err(e) => {
                // The wire failed mid-sequence; account for whatever the
                // device actually did before surfacing the error.
                self.account_observed_delta(rsm, motor, before);
                return Err(e);
            }
        };

        let requested = if step < 0.0 { -raw } else { raw };
        let achieved = match wait {
            WaitOutcome::Completed => requested,
            WaitOutcome::Interrupted => {
                i32::from(rsm.motor_position()?) - i32::from(before)
            }
        };

        if motor.has_persisted_position() {
            self.store.apply_position_delta(motor, i64::from(achieved))?;
        }
        rsm.motor_select(DEENERGIZE_ID)?;

        match wait {
            WaitOutcome::Completed => {
                info!("motor {} arrived", motor.id());
                Ok(MoveOutcome::Arrived { raw_delta: achieved })
            }
            WaitOutcome::Interrupted => {
                info!(
                    "motor {} stopped after {} raw steps",
                    motor.id(),
                    achieved
                );
                Ok(MoveOutcome::Stopped { raw_delta: achieved })
            }
        }
    }

    /// Move a motor with a persisted position to an absolute unit value.
    pub fn move_to<T: Transport>(
        &mut self,
        rsm: &mut Rsm<T>,
        cancel: &CancelToken,
        motor: Motor,
        target: f64,
    ) -> RsmResult<MoveOutcome> {
        let current_raw = self.store.absolute_position(motor)?;
        let current = to_unit_value(motor, current_raw as i32);
        self.move_by(rsm, cancel, motor, target - current)
    }

    /// Drive a motor to its home switch, zeroing the device position counter.
    ///
    /// The persisted absolute position is left untouched; re-zeroing the
    /// logical position after homing is an operator decision.
    pub fn initialize<T: Transport>(
        &mut self,
        rsm: &mut Rsm<T>,
        cancel: &CancelToken,
        motor: Motor,
    ) -> RsmResult<WaitOutcome> {
        rsm.motor_select(motor.id())?;
        rsm.motor_initialize()?;
        let outcome = rsm.wait_motor_idle(cancel)?;
        rsm.motor_select(DEENERGIZE_ID)?;
        Ok(outcome)
    }

    fn issue_chunks<T: Transport>(
        &self,
        rsm: &mut Rsm<T>,
        cancel: &CancelToken,
        direction: u8,
        total: u32,
    ) -> RsmResult<WaitOutcome> {
        for chunk in split_steps(total) {
            rsm.motor_move_raw(direction, chunk)?;
            if rsm.wait_motor_idle(cancel)? == WaitOutcome::Interrupted {
                return Ok(WaitOutcome::Interrupted);
            }
        }
        Ok(WaitOutcome::Completed)
    }

    /// Best-effort accounting from the device position after a wire failure.
    fn account_observed_delta<T: Transport>(
        &mut self,
        rsm: &mut Rsm<T>,
        motor: Motor,
        before: i16,
    ) {
        if !motor.has_persisted_position() {
            return;
        }
        if let Ok(after) = rsm.motor_position() {
            let achieved = i32::from(after) - i32::from(before);
            if let Err(e) = self.store.apply_position_delta(motor, i64::from(achieved)) {
                log::error!(
                    "failed to persist position delta for motor {}: {}",
                    motor.id(),
                    e
                );
            }
        }
    }
}

impl<S: SettingsStore> MotorDrive<S> {
    /// Validate a motor id coming from an untyped boundary (e.g. the CLI).
    pub fn motor_from_id(id: u8) -> RsmResult<Motor> {
        Motor::from_id(id)
            .ok_or_else(|| RsmError::Validation(format!("unknown motor id {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockTransport;
    use crate::settings::MemorySettings;
    use std::time::Duration;

    fn rsm_with(responses: &[&[u8]]) -> Rsm<MockTransport> {
        let mut mock = MockTransport::new();
        for r in responses {
            mock.queue_response(r);
        }
        Rsm::new(mock).with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_direction_table() {
        assert_eq!(direction_bit(Motor::Energy, true), 1);
        assert_eq!(direction_bit(Motor::Energy, false), 0);
        assert_eq!(direction_bit(Motor::Theta, true), 1);
        assert_eq!(direction_bit(Motor::Theta, false), 0);
        // Two-theta is wired with the opposite convention.
        assert_eq!(direction_bit(Motor::TwoTheta, true), 0);
        assert_eq!(direction_bit(Motor::TwoTheta, false), 1);
        assert_eq!(direction_bit(Motor::Translation, true), 1);
    }

    #[test]
    fn test_zero_step_has_no_direction() {
        assert_eq!(direction_for(Motor::Theta, 0.0), None);
        assert_eq!(direction_for(Motor::Theta, -0.1), Some(0));
    }

    #[test]
    fn test_split_below_limit_is_single_command() {
        assert_eq!(split_steps(889), vec![889]);
        assert_eq!(split_steps(32767), vec![32767]);
    }

    #[test]
    fn test_split_above_limit() {
        let chunks = split_steps(75_000);
        assert_eq!(chunks, vec![32767, 32767, 9466]);
        assert_eq!(chunks.iter().map(|&c| u32::from(c)).sum::<u32>(), 75_000);
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunks = split_steps(2 * 32767);
        assert_eq!(chunks, vec![32767, 32767]);
    }

    #[test]
    fn test_split_sizes_always_sum_to_total() {
        for total in [1u32, 32_766, 32_767, 32_768, 65_534, 100_000, 500_000] {
            let chunks = split_steps(total);
            assert_eq!(chunks.len() as u32, total.div_ceil(32_767));
            assert_eq!(chunks.iter().map(|&c| u32::from(c)).sum::<u32>(), total);
        }
    }

    #[test]
    fn test_zero_step_move_is_noop() {
        let mut rsm = rsm_with(&[]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();

        let outcome = drive
            .move_by(&mut rsm, &cancel, Motor::Theta, 0.0)
            .unwrap();
        assert_eq!(outcome, MoveOutcome::NoOp);
        assert!(rsm.link_mut().transport().sent_frames().is_empty());
    }

    #[test]
    fn test_arrived_move_persists_requested_delta() {
        // SM, GP(before=100), GM, RB(idle), SM(4)
        let mut rsm = rsm_with(&[&[0], &100i16.to_be_bytes(), &[0], &[0x00], &[0]]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();

        let outcome = drive
            .move_by(&mut rsm, &cancel, Motor::Theta, 10.0)
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Arrived { raw_delta: 889 });
        assert_eq!(drive.absolute_position(Motor::Theta).unwrap(), 889);

        let frames = rsm.link_mut().transport().sent_frames();
        assert_eq!(frames[2], b"\x06GM100889\x0d".to_vec());
        assert_eq!(frames.last().unwrap(), &b"\x06SM4\x0d".to_vec());
    }

    #[test]
    fn test_interrupted_move_persists_observed_delta() {
        // SM, GP(before=0), GM, RB(busy), GB, GP(after=300), SM(4)
        let mut rsm = rsm_with(&[
            &[0],
            &0i16.to_be_bytes(),
            &[0],
            &[0x01],
            &[0],
            &300i16.to_be_bytes(),
            &[0],
        ]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = drive
            .move_by(&mut rsm, &cancel, Motor::Theta, 10.0)
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Stopped { raw_delta: 300 });
        // Achieved delta, strictly less than the requested 889.
        assert_eq!(drive.absolute_position(Motor::Theta).unwrap(), 300);
    }

    #[test]
    fn test_long_energy_move_is_split_in_sequence() {
        // SM, GP, then (GM + RB idle) x 3, SM(4)
        let mut rsm = rsm_with(&[
            &[0],
            &0i16.to_be_bytes(),
            &[0],
            &[0x00],
            &[0],
            &[0x00],
            &[0],
            &[0x00],
            &[0],
        ]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();

        let outcome = drive
            .move_by(&mut rsm, &cancel, Motor::Energy, 1.0)
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Arrived { raw_delta: 75_000 });

        let frames = rsm.link_mut().transport().sent_frames();
        let moves: Vec<_> = frames
            .iter()
            .filter(|f| f.starts_with(b"\x06GM"))
            .collect();
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0], &b"\x06GM132767\x0d".to_vec());
        assert_eq!(moves[2], &b"\x06GM109466\x0d".to_vec());
    }

    #[test]
    fn test_energy_motor_has_no_persisted_position() {
        let mut rsm = rsm_with(&[&[0], &0i16.to_be_bytes(), &[0], &[0x00], &[0]]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();

        drive
            .move_by(&mut rsm, &cancel, Motor::Energy, 0.001)
            .unwrap();
        assert!(drive.absolute_position(Motor::Energy).is_err());
    }

    #[test]
    fn test_interrupted_split_stops_issuing_sub_moves() {
        // SM, GP, GM, RB(busy) -> GB, GP(after), SM(4); no second GM.
        let mut rsm = rsm_with(&[
            &[0],
            &0i16.to_be_bytes(),
            &[0],
            &[0x01],
            &[0],
            &1000i16.to_be_bytes(),
            &[0],
        ]);
        let mut drive = MotorDrive::new(MemorySettings::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = drive
            .move_by(&mut rsm, &cancel, Motor::Energy, 1.0)
            .unwrap();
        assert!(matches!(outcome, MoveOutcome::Stopped { raw_delta: 1000 }));

        let moves = rsm
            .link_mut()
            .transport()
            .sent_frames()
            .iter()
            .filter(|f| f.starts_with(b"\x06GM"))
            .count();
        assert_eq!(moves, 1);
    }
}
