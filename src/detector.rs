//! Detector controller: validated configuration and pulse readback.
//!
//! The two detectors are HV electron multipliers sitting before (detector 1)
//! and after (detector 2) the sample holder; on the controller they occupy
//! counter channels 2 and 3. All range checks happen here, before any device
//! I/O, so an invalid request leaves the hardware untouched.

use crate::device::Rsm;
use crate::error::{RsmError, RsmResult};
use crate::link::Transport;

/// Counter channel of detector 1 (before the sample holder).
pub const COUNTER_1: u8 = 2;
/// Counter channel of detector 2 (after the sample holder).
pub const COUNTER_2: u8 = 3;

/// Discrimination thresholds live in `[0, 4096)`.
pub const THRESHOLD_LIMIT: u16 = 4096;
/// Photocathode voltages live in `[0, 2048)`.
pub const VOLTAGE_LIMIT: u16 = 2048;
/// Largest exposure the register accepts, in tenths of a second.
pub const EXPOSURE_LIMIT: u16 = 9999;

/// Threshold identifiers of one counter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Lower = 0,
    Upper = 1,
}

/// Map a user-facing detector number (1 or 2) to its counter channel.
pub fn channel_for_detector(detector: u8) -> RsmResult<u8> {
    match detector {
        1 => Ok(COUNTER_1),
        2 => Ok(COUNTER_2),
        _ => Err(RsmError::Validation(format!(
            "invalid detector number {detector}, must be 1 or 2"
        ))),
    }
}

fn check_threshold(value: u16) -> RsmResult<()> {
    if value >= THRESHOLD_LIMIT {
        return Err(RsmError::Validation(format!(
            "threshold {value} out of range [0, {THRESHOLD_LIMIT})"
        )));
    }
    Ok(())
}

/// Validate an exposure for a timed count. Zero selects the device's
/// continuous counting mode, which this driver does not support.
pub fn check_exposure_tenths(tenths: u16) -> RsmResult<()> {
    if tenths == 0 || tenths > EXPOSURE_LIMIT {
        return Err(RsmError::Validation(format!(
            "exposure {tenths} tenths out of range [1, {EXPOSURE_LIMIT}]"
        )));
    }
    Ok(())
}

impl<T: Transport> Rsm<T> {
    /// Set both discrimination thresholds of one detector.
    ///
    /// Rejects `low >= up` and out-of-range values before any dispatch; prior
    /// thresholds are left unchanged on rejection.
    pub fn set_thresholds(&mut self, detector: u8, low: u16, up: u16) -> RsmResult<()> {
        let channel = channel_for_detector(detector)?;
        check_threshold(low)?;
        check_threshold(up)?;
        if low >= up {
            return Err(RsmError::Validation(format!(
                "lower threshold {low} must be below upper threshold {up}"
            )));
        }

        self.threshold_set_raw(channel, Threshold::Lower as u8, low)?;
        self.threshold_set_raw(channel, Threshold::Upper as u8, up)
    }

    /// Read `(lower, upper)` thresholds of one detector.
    pub fn thresholds(&mut self, detector: u8) -> RsmResult<(u16, u16)> {
        let channel = channel_for_detector(detector)?;
        let low = self.threshold_get_raw(channel, Threshold::Lower as u8)?;
        let up = self.threshold_get_raw(channel, Threshold::Upper as u8)?;
        Ok((low, up))
    }

    /// Set the photocathode voltage of one detector.
    pub fn set_voltage(&mut self, detector: u8, voltage: u16) -> RsmResult<()> {
        let channel = channel_for_detector(detector)?;
        if voltage >= VOLTAGE_LIMIT {
            return Err(RsmError::Validation(format!(
                "voltage {voltage} out of range [0, {VOLTAGE_LIMIT})"
            )));
        }
        self.voltage_set_raw(channel, voltage)
    }

    /// Read the photocathode voltage of one detector.
    pub fn voltage(&mut self, detector: u8) -> RsmResult<u16> {
        let channel = channel_for_detector(detector)?;
        self.voltage_get_raw(channel)
    }

    /// Enable or disable the photocathode of one detector.
    pub fn set_photocathode_enabled(&mut self, detector: u8, enabled: bool) -> RsmResult<()> {
        let channel = channel_for_detector(detector)?;
        self.photocathode_enable(channel, enabled)
    }

    /// Set the exposure register for a timed count.
    pub fn set_exposure_tenths(&mut self, tenths: u16) -> RsmResult<()> {
        check_exposure_tenths(tenths)?;
        self.exposure_set_raw(tenths)
    }

    /// Read the pulse counts of both detectors, in detector order.
    pub fn read_counts(&mut self) -> RsmResult<(u32, u32)> {
        let count_1 = self.counter_get(COUNTER_1)?;
        let count_2 = self.counter_get(COUNTER_2)?;
        Ok((count_1, count_2))
    }
}

/// Raw pulse count divided by exposure duration.
pub fn counts_per_second(count: u32, exposure_tenths: u16) -> f64 {
    f64::from(count) / (f64::from(exposure_tenths) / 10.0)
}
