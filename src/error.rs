//! Error types for the RSM-500 control library.
//!
//! A single `thiserror` enum covers every failure class: validation caught at the
//! API boundary before any device I/O, frame formatting and framing-length
//! mismatches on the wire, non-zero error codes reported by the controller, and
//! the usual I/O and settings-file errors. Interruption of a wait is *not* an
//! error; it is reported through [`crate::device::WaitOutcome`].

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type RsmResult<T> = std::result::Result<T, RsmError>;

/// The primary error type for the library.
#[derive(Error, Debug)]
pub enum RsmError {
    /// Input rejected before any device I/O. No partial mutation has occurred.
    #[error("validation error: {0}")]
    Validation(String),

    /// An argument could not be encoded into its declared decimal field width.
    #[error("frame format error: {0}")]
    Format(String),

    /// Response byte length did not match the command's fixed-width layout.
    /// The wire state is unknown; no automatic resynchronization is attempted.
    #[error("framing error: expected {expected} response bytes, got {got}")]
    Framing { expected: usize, got: usize },

    /// The controller answered a command with a non-zero error code.
    #[error("device error code {code:#04x} from command {opcode}")]
    Device { opcode: &'static str, code: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("data file error: {0}")]
    Data(#[from] csv::Error),

    #[error("settings error: {0}")]
    Settings(String),
}

impl From<toml::de::Error> for RsmError {
    fn from(err: toml::de::Error) -> Self {
        RsmError::Settings(err.to_string())
    }
}

impl From<toml::ser::Error> for RsmError {
    fn from(err: toml::ser::Error) -> Self {
        RsmError::Settings(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = RsmError::Device {
            opcode: "GM",
            code: 0x80,
        };
        assert_eq!(err.to_string(), "device error code 0x80 from command GM");
    }

    #[test]
    fn test_framing_display() {
        let err = RsmError::Framing {
            expected: 2,
            got: 1,
        };
        assert!(err.to_string().contains("expected 2"));
    }
}
