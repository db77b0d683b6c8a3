//! Control library for the RSM-500 X-ray spectrometer monochromator.
//!
//! The crate talks to the motor/detector controller over a half-duplex serial
//! link, executes calibrated motor moves with persisted absolute-position
//! accounting, takes timed pulse-count measurements and runs multi-step scans
//! that stream live snapshots while persisting rows incrementally.

pub mod cancel;
pub mod convert;
pub mod data;
pub mod detector;
pub mod device;
pub mod error;
pub mod link;
pub mod motor;
pub mod protocol;
pub mod scan;
pub mod settings;
