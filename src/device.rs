//! Typed command layer over the device link.
//!
//! [`Rsm`] exposes every controller opcode as an ordinary typed method and owns
//! the two interruptible wait loops of the system: motor-busy and
//! remaining-exposure polling. Commands whose response is an error code are
//! checked here — a non-zero code is surfaced as [`RsmError::Device`] and never
//! auto-retried.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::cancel::CancelToken;
use crate::error::{RsmError, RsmResult};
use crate::link::{DeviceLink, Transport};
use crate::protocol::{commands, CommandSpec};

/// Device status bit: a motor is working.
pub const STATUS_MOTOR_BUSY: u8 = 0x01;
/// Device status bit: pulse counters are enabled.
pub const STATUS_COUNTERS_ON: u8 = 0x10;
/// Device status bit: presence of an error.
pub const STATUS_ERROR: u8 = 0x80;

/// Largest step count a single move command may carry.
pub const MAX_STEPS_PER_MOVE: u16 = 32767;

/// Default poll interval of the blocking waits.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The device finished on its own (busy bit cleared / exposure elapsed).
    Completed,
    /// Cancellation was requested; the device was commanded to stop.
    Interrupted,
}

/// The RSM-500 controller, seen through its typed command set.
pub struct Rsm<T: Transport> {
    link: DeviceLink<T>,
    poll_interval: Duration,
}

impl<T: Transport> Rsm<T> {
    pub fn new(transport: T) -> Self {
        Self {
            link: DeviceLink::new(transport),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the poll interval of the blocking waits (tests use a short one).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn link_mut(&mut self) -> &mut DeviceLink<T> {
        &mut self.link
    }

    /// Issue a command whose single response byte is an error code.
    fn checked(&mut self, spec: &'static CommandSpec, args: &[u32]) -> RsmResult<()> {
        let values = self.link.call(spec, args)?;
        let code = values[0] as u8;
        if code != 0 {
            warn!("command {} returned error code {:#04x}", spec.opcode, code);
            return Err(RsmError::Device {
                opcode: spec.opcode,
                code,
            });
        }
        Ok(())
    }

    /// Issue a command with a single-field response and return the scalar.
    fn scalar(&mut self, spec: &'static CommandSpec, args: &[u32]) -> RsmResult<i64> {
        let values = self.link.call(spec, args)?;
        Ok(values[0])
    }

    // --- motors ---------------------------------------------------------

    /// Select a motor (0-3); id 4 removes voltage from all motors.
    pub fn motor_select(&mut self, motor_id: u8) -> RsmResult<()> {
        if motor_id > 4 {
            return Err(RsmError::Validation(format!(
                "motor id {motor_id} out of range 0-4"
            )));
        }
        self.checked(&commands::SELECT_MOTOR, &[u32::from(motor_id)])
    }

    /// Move the selected motor `steps` raw steps in device direction `direction`.
    pub fn motor_move_raw(&mut self, direction: u8, steps: u16) -> RsmResult<()> {
        if direction > 1 {
            return Err(RsmError::Validation(format!(
                "direction bit must be 0 or 1, got {direction}"
            )));
        }
        if steps > MAX_STEPS_PER_MOVE {
            return Err(RsmError::Validation(format!(
                "single move limited to {MAX_STEPS_PER_MOVE} steps, got {steps}"
            )));
        }
        self.checked(&commands::MOVE_MOTOR, &[u32::from(direction), u32::from(steps)])
    }

    /// Motor status register (limit switches, initialization flag).
    pub fn motor_status(&mut self) -> RsmResult<u8> {
        Ok(self.scalar(&commands::MOTOR_STATUS, &[])? as u8)
    }

    /// Drive the selected motor to its home switch and zero its counter.
    pub fn motor_initialize(&mut self) -> RsmResult<()> {
        self.checked(&commands::INIT_MOTOR, &[])
    }

    /// Position counter of the selected motor. Meaningful only since the last
    /// selection; the device does not retain it across power cycles.
    pub fn motor_position(&mut self) -> RsmResult<i16> {
        Ok(self.scalar(&commands::GET_POSITION, &[])? as i16)
    }

    /// Write the position counter; resets the initialization flag.
    pub fn motor_set_position(&mut self, position: u16) -> RsmResult<()> {
        if position > MAX_STEPS_PER_MOVE {
            return Err(RsmError::Validation(format!(
                "position {position} out of range 0-{MAX_STEPS_PER_MOVE}"
            )));
        }
        self.checked(&commands::SET_POSITION, &[u32::from(position)])
    }

    /// Interrupt the current move. The position counter is kept.
    pub fn motor_stop(&mut self) -> RsmResult<()> {
        self.checked(&commands::STOP_MOTOR, &[])
    }

    /// Step-counter mismatch at the last re-initialization. For a serviceable
    /// motor with an accurate limit switch this stays within ±2.
    pub fn motor_step_error(&mut self) -> RsmResult<i16> {
        Ok(self.scalar(&commands::STEP_ERROR, &[])? as i16)
    }

    /// Poll the device status until the motor-busy bit clears.
    ///
    /// Cancellation is checked once per poll; on cancellation the motor is
    /// stopped and the wait returns [`WaitOutcome::Interrupted`]. There is no
    /// hard timeout.
    pub fn wait_motor_idle(&mut self, cancel: &CancelToken) -> RsmResult<WaitOutcome> {
        while self.device_status()? & STATUS_MOTOR_BUSY != 0 {
            thread::sleep(self.poll_interval);
            if cancel.is_cancelled() {
                self.motor_stop()?;
                return Ok(WaitOutcome::Interrupted);
            }
        }
        Ok(WaitOutcome::Completed)
    }

    // --- counters and detectors -----------------------------------------

    /// Set one discrimination threshold of one counter channel (raw dispatch;
    /// range validation happens in the detector layer before any I/O).
    pub fn threshold_set_raw(&mut self, channel: u8, threshold_id: u8, value: u16) -> RsmResult<()> {
        self.checked(
            &commands::SET_THRESHOLD,
            &[u32::from(channel), u32::from(threshold_id), u32::from(value)],
        )
    }

    /// Read one discrimination threshold of one counter channel.
    pub fn threshold_get_raw(&mut self, channel: u8, threshold_id: u8) -> RsmResult<u16> {
        Ok(self.scalar(
            &commands::GET_THRESHOLD,
            &[u32::from(channel), u32::from(threshold_id)],
        )? as u16)
    }

    /// Set the exposure register in tenths of a second.
    pub fn exposure_set_raw(&mut self, tenths: u16) -> RsmResult<()> {
        self.checked(&commands::SET_EXPOSURE, &[u32::from(tenths)])
    }

    /// Turn on all counters for the set exposure.
    pub fn counter_start(&mut self) -> RsmResult<()> {
        self.checked(&commands::START_COUNT, &[])
    }

    /// Stop all counters. Their contents are not reset.
    pub fn counter_stop(&mut self) -> RsmResult<()> {
        self.checked(&commands::STOP_COUNT, &[])
    }

    /// Read the pulse count accumulated in one counter channel.
    pub fn counter_get(&mut self, channel: u8) -> RsmResult<u32> {
        Ok(self.scalar(&commands::GET_COUNT, &[u32::from(channel)])? as u32)
    }

    /// Remaining exposure in tenths of a second.
    pub fn remaining_exposure(&mut self) -> RsmResult<u16> {
        Ok(self.scalar(&commands::REMAINING_EXPOSURE, &[])? as u16)
    }

    /// Poll the remaining exposure until it reaches zero.
    ///
    /// Same cancellation pattern as [`Rsm::wait_motor_idle`]; on cancellation
    /// the count is stopped.
    pub fn wait_exposure_done(&mut self, cancel: &CancelToken) -> RsmResult<WaitOutcome> {
        while self.remaining_exposure()? > 0 {
            thread::sleep(self.poll_interval);
            if cancel.is_cancelled() {
                self.counter_stop()?;
                return Ok(WaitOutcome::Interrupted);
            }
        }
        Ok(WaitOutcome::Completed)
    }

    /// Set the photocathode voltage of one counter channel (raw dispatch).
    pub fn voltage_set_raw(&mut self, channel: u8, value: u16) -> RsmResult<()> {
        self.checked(&commands::SET_VOLTAGE, &[u32::from(channel), u32::from(value)])
    }

    /// Read the photocathode voltage of one counter channel.
    pub fn voltage_get_raw(&mut self, channel: u8) -> RsmResult<u16> {
        Ok(self.scalar(&commands::GET_VOLTAGE, &[u32::from(channel)])? as u16)
    }

    /// Enable or disable the photocathode of one counter channel. Disabled
    /// channels fall back to the standby voltage from the device parameters.
    pub fn photocathode_enable(&mut self, channel: u8, enabled: bool) -> RsmResult<()> {
        self.checked(
            &commands::ENABLE_PHOTOCATHODE,
            &[u32::from(channel), u32::from(enabled)],
        )
    }

    // --- device ----------------------------------------------------------

    /// Busy-status byte of the whole device.
    pub fn device_status(&mut self) -> RsmResult<u8> {
        Ok(self.scalar(&commands::DEVICE_STATUS, &[])? as u8)
    }

    /// Firmware version as `(high, low)`.
    pub fn version(&mut self) -> RsmResult<(u8, u8)> {
        let values = self.link.call(&commands::VERSION, &[])?;
        Ok((values[0] as u8, values[1] as u8))
    }

    /// Software reset. Interrupts all movements and turns detectors off.
    pub fn reset(&mut self) -> RsmResult<()> {
        self.checked(&commands::RESET, &[])
    }

    /// Last error code reported by the controller; zero when none.
    pub fn last_error(&mut self) -> RsmResult<u8> {
        Ok(self.scalar(&commands::LAST_ERROR, &[])? as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockTransport;

    fn rsm_with(responses: &[&[u8]]) -> Rsm<MockTransport> {
        let mut mock = MockTransport::new();
        for r in responses {
            mock.queue_response(r);
        }
        Rsm::new(mock).with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_nonzero_error_code_is_device_error() {
        let mut rsm = rsm_with(&[&[0x21]]);
        let err = rsm.motor_select(1).unwrap_err();
        assert!(matches!(
            err,
            RsmError::Device {
                opcode: "SM",
                code: 0x21
            }
        ));
    }

    #[test]
    fn test_motor_select_rejects_invalid_id() {
        let mut rsm = rsm_with(&[]);
        assert!(matches!(
            rsm.motor_select(5),
            Err(RsmError::Validation(_))
        ));
        // Rejected before any I/O.
        assert!(rsm.link_mut().transport().sent_frames().is_empty());
    }

    #[test]
    fn test_motor_move_raw_rejects_oversized_step() {
        let mut rsm = rsm_with(&[]);
        assert!(matches!(
            rsm.motor_move_raw(1, 32768),
            Err(RsmError::Validation(_))
        ));
    }

    #[test]
    fn test_wait_motor_idle_completes_when_busy_clears() {
        // Busy twice, then idle.
        let mut rsm = rsm_with(&[&[STATUS_MOTOR_BUSY], &[STATUS_MOTOR_BUSY], &[0x00]]);
        let cancel = CancelToken::new();
        assert_eq!(rsm.wait_motor_idle(&cancel).unwrap(), WaitOutcome::Completed);
    }

    #[test]
    fn test_wait_motor_idle_interrupted_issues_stop() {
        let mut rsm = rsm_with(&[&[STATUS_MOTOR_BUSY], &[0x00]]); // RB, then GB reply
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            rsm.wait_motor_idle(&cancel).unwrap(),
            WaitOutcome::Interrupted
        );
        let opcodes = rsm.link_mut().transport().sent_opcodes();
        assert_eq!(opcodes, vec!["RB", "GB"]);
    }

    #[test]
    fn test_wait_exposure_done_interrupted_stops_count() {
        let mut rsm = rsm_with(&[&5u16.to_be_bytes(), &[0x00]]); // EG, then CB reply
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            rsm.wait_exposure_done(&cancel).unwrap(),
            WaitOutcome::Interrupted
        );
        let opcodes = rsm.link_mut().transport().sent_opcodes();
        assert_eq!(opcodes, vec!["EG", "CB"]);
    }

    #[test]
    fn test_version_formatting() {
        let mut rsm = rsm_with(&[&[3, 14]]);
        assert_eq!(rsm.version().unwrap(), (3, 14));
    }
}
