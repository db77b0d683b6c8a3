//! Binary wire protocol of the RSM-500 controller.
//!
//! Command frames are `0x06` + a two-character opcode + each argument rendered as
//! a zero-padded, right-justified ASCII decimal at its declared field width +
//! `0x0d`. Arguments travel as human-auditable decimal, which is convenient when
//! debugging a half-duplex link with a line analyzer. Responses are compact
//! fixed-width big-endian binary, since they are polled at high frequency during
//! blocking waits.
//!
//! Every opcode the controller understands is described by a [`CommandSpec`] in
//! the [`commands`] table. Specs are immutable values; frames are derived per
//! call and never stored.

use crate::error::{RsmError, RsmResult};

/// Frame start byte (ASCII ACK).
pub const FRAME_START: u8 = 0x06;
/// Frame end byte (ASCII CR).
pub const FRAME_END: u8 = 0x0d;

/// One fixed-width binary field of a command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespField {
    /// Unsigned byte, typically an error code or status register.
    U8,
    /// Big-endian signed 16-bit, e.g. the motor position counter.
    I16,
    /// Big-endian unsigned 16-bit.
    U16,
    /// Big-endian unsigned 32-bit, e.g. a pulse count.
    U32,
}

impl RespField {
    /// Width of the field in wire bytes.
    pub const fn width(self) -> usize {
        match self {
            RespField::U8 => 1,
            RespField::I16 | RespField::U16 => 2,
            RespField::U32 => 4,
        }
    }
}

/// Immutable description of one controller command: opcode, response layout and
/// the decimal field widths of its arguments.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Two-character command identifier.
    pub opcode: &'static str,
    /// Ordered fixed-width fields of the response.
    pub response: &'static [RespField],
    /// Decimal digit width of each argument, in order.
    pub arg_widths: &'static [u32],
}

impl CommandSpec {
    pub const fn new(
        opcode: &'static str,
        response: &'static [RespField],
        arg_widths: &'static [u32],
    ) -> Self {
        Self {
            opcode,
            response,
            arg_widths,
        }
    }

    /// Exact number of response bytes to expect from the device.
    pub fn response_len(&self) -> usize {
        self.response.iter().map(|f| f.width()).sum()
    }

    /// Build the wire frame for this command with the given argument values.
    pub fn encode(&self, args: &[u32]) -> RsmResult<Vec<u8>> {
        if args.len() != self.arg_widths.len() {
            return Err(RsmError::Format(format!(
                "command {} takes {} arguments, got {}",
                self.opcode,
                self.arg_widths.len(),
                args.len()
            )));
        }

        let mut frame = Vec::with_capacity(4 + self.arg_widths.iter().sum::<u32>() as usize);
        frame.push(FRAME_START);
        frame.extend_from_slice(self.opcode.as_bytes());
        for (&value, &width) in args.iter().zip(self.arg_widths) {
            if value >= 10u32.pow(width) {
                return Err(RsmError::Format(format!(
                    "command {}: argument {} does not fit {} decimal digits",
                    self.opcode, value, width
                )));
            }
            frame.extend_from_slice(format!("{value:0width$}", width = width as usize).as_bytes());
        }
        frame.push(FRAME_END);
        Ok(frame)
    }

    /// Unpack a response strictly per the fixed-width layout.
    ///
    /// Every field is widened to `i64` so callers can narrow to the concrete
    /// type the opcode documents.
    pub fn decode(&self, response: &[u8]) -> RsmResult<Vec<i64>> {
        let expected = self.response_len();
        if response.len() != expected {
            return Err(RsmError::Framing {
                expected,
                got: response.len(),
            });
        }

        let mut values = Vec::with_capacity(self.response.len());
        let mut offset = 0;
        for field in self.response {
            let bytes = &response[offset..offset + field.width()];
            let value = match field {
                RespField::U8 => i64::from(bytes[0]),
                RespField::I16 => i64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
                RespField::U16 => i64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
                RespField::U32 => i64::from(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])),
            };
            values.push(value);
            offset += field.width();
        }
        Ok(values)
    }
}

/// The complete opcode table of the controller.
pub mod commands {
    use super::{CommandSpec, RespField};

    const ERR: &[RespField] = &[RespField::U8];

    /// SM — select motor (4 de-energizes all motors).
    pub const SELECT_MOTOR: CommandSpec = CommandSpec::new("SM", ERR, &[1]);
    /// GM — move the selected motor n steps in direction d.
    pub const MOVE_MOTOR: CommandSpec = CommandSpec::new("GM", ERR, &[1, 5]);
    /// RG — motor status register (limit switches, flags).
    pub const MOTOR_STATUS: CommandSpec = CommandSpec::new("RG", ERR, &[]);
    /// GI — drive the motor to its home switch and zero the position counter.
    pub const INIT_MOTOR: CommandSpec = CommandSpec::new("GI", ERR, &[]);
    /// GP — read the motor position counter.
    pub const GET_POSITION: CommandSpec = CommandSpec::new("GP", &[RespField::I16], &[]);
    /// GW — write the motor position counter; resets the initialization flag.
    pub const SET_POSITION: CommandSpec = CommandSpec::new("GW", ERR, &[5]);
    /// GB — interrupt the current move; the position counter is kept.
    pub const STOP_MOTOR: CommandSpec = CommandSpec::new("GB", ERR, &[]);
    /// GE — step-counter mismatch observed at the last re-initialization.
    pub const STEP_ERROR: CommandSpec = CommandSpec::new("GE", &[RespField::I16], &[]);
    /// TS — set one discrimination threshold of one counter.
    pub const SET_THRESHOLD: CommandSpec = CommandSpec::new("TS", ERR, &[1, 1, 4]);
    /// TG — read one discrimination threshold.
    pub const GET_THRESHOLD: CommandSpec = CommandSpec::new("TG", &[RespField::U16], &[1, 1]);
    /// ES — set the exposure register in tenths of a second.
    pub const SET_EXPOSURE: CommandSpec = CommandSpec::new("ES", ERR, &[4]);
    /// CS — start counting on all counters for the set exposure.
    pub const START_COUNT: CommandSpec = CommandSpec::new("CS", ERR, &[]);
    /// CB — stop all counters; contents are not reset.
    pub const STOP_COUNT: CommandSpec = CommandSpec::new("CB", ERR, &[]);
    /// CG — read the pulse count of one counter channel.
    pub const GET_COUNT: CommandSpec = CommandSpec::new("CG", &[RespField::U32], &[1]);
    /// EG — read the remaining exposure in tenths of a second.
    pub const REMAINING_EXPOSURE: CommandSpec = CommandSpec::new("EG", &[RespField::U16], &[]);
    /// DS — set the photocathode voltage of one counter channel.
    pub const SET_VOLTAGE: CommandSpec = CommandSpec::new("DS", ERR, &[1, 4]);
    /// DG — read the photocathode voltage of one counter channel.
    pub const GET_VOLTAGE: CommandSpec = CommandSpec::new("DG", &[RespField::U16], &[1]);
    /// DM — enable or disable the photocathode of one counter channel.
    pub const ENABLE_PHOTOCATHODE: CommandSpec = CommandSpec::new("DM", ERR, &[1, 1]);
    /// RB — device busy-status byte (bit 0x01 = a motor is working).
    pub const DEVICE_STATUS: CommandSpec = CommandSpec::new("RB", ERR, &[]);
    /// VS — firmware version, high and low byte.
    pub const VERSION: CommandSpec =
        CommandSpec::new("VS", &[RespField::U8, RespField::U8], &[]);
    /// RS — software reset; interrupts movements and turns detectors off.
    pub const RESET: CommandSpec = CommandSpec::new("RS", ERR, &[]);
    /// RE — last error code, zero when none.
    pub const LAST_ERROR: CommandSpec = CommandSpec::new("RE", ERR, &[]);
}

#[cfg(test)]
mod tests {
    use super::commands::*;
    use super::*;

    #[test]
    fn test_encode_move_frame() {
        let frame = MOVE_MOTOR.encode(&[1, 32767]).unwrap();
        assert_eq!(frame, b"\x06GM132767\x0d");
    }

    #[test]
    fn test_encode_zero_pads_arguments() {
        let frame = SET_THRESHOLD.encode(&[2, 0, 150]).unwrap();
        assert_eq!(frame, b"\x06TS200150\x0d");
    }

    #[test]
    fn test_encode_no_arguments() {
        let frame = DEVICE_STATUS.encode(&[]).unwrap();
        assert_eq!(frame, b"\x06RB\x0d");
    }

    #[test]
    fn test_encode_rejects_oversized_argument() {
        let err = SELECT_MOTOR.encode(&[10]).unwrap_err();
        assert!(matches!(err, RsmError::Format(_)));
    }

    #[test]
    fn test_encode_rejects_argument_count_mismatch() {
        let err = MOVE_MOTOR.encode(&[1]).unwrap_err();
        assert!(matches!(err, RsmError::Format(_)));
    }

    #[test]
    fn test_decode_signed_position() {
        let values = GET_POSITION.decode(&(-123i16).to_be_bytes()).unwrap();
        assert_eq!(values, vec![-123]);
    }

    #[test]
    fn test_decode_u32_count() {
        let values = GET_COUNT.decode(&4_000_000_000u32.to_be_bytes()).unwrap();
        assert_eq!(values, vec![4_000_000_000]);
    }

    #[test]
    fn test_decode_multi_field_version() {
        let values = VERSION.decode(&[3, 14]).unwrap();
        assert_eq!(values, vec![3, 14]);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let err = GET_POSITION.decode(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            RsmError::Framing {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_response_len() {
        assert_eq!(VERSION.response_len(), 2);
        assert_eq!(GET_COUNT.response_len(), 4);
        assert_eq!(SELECT_MOTOR.response_len(), 1);
    }
}
