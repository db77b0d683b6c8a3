//! Persisted program settings.
//!
//! The settings file carries the serial connection parameters, the output
//! directory for scan data files and the logical absolute positions of motors
//! 1-3. Positions must survive power cycles because the device's own position
//! register is relative to the last selection, so every mutation is written
//! through to disk synchronously. Single-writer use is assumed; no locking.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RsmError, RsmResult};
use crate::motor::Motor;

/// Access to the persisted state the motor controller and scan engine need.
///
/// Implemented by [`TomlSettings`] for the real settings file and by
/// [`MemorySettings`] for tests.
pub trait SettingsStore {
    /// Persisted absolute position of a motor in raw steps (motors 1-3 only).
    fn absolute_position(&self, motor: Motor) -> RsmResult<i64>;

    /// Add an achieved raw-step delta to a motor's absolute position and
    /// persist the result immediately.
    fn apply_position_delta(&mut self, motor: Motor, delta: i64) -> RsmResult<()>;

    /// Directory scan data files are written to.
    fn output_directory(&self) -> &Path;
}

fn reject_energy(motor: Motor) -> RsmResult<()> {
    if !motor.has_persisted_position() {
        return Err(RsmError::Validation(
            "motor 0 has no persisted absolute position".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsolutePositions {
    pub motor_1: i64,
    pub motor_2: i64,
    pub motor_3: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    connection: ConnectionSettings,
    paths: PathSettings,
    absolute_position: AbsolutePositions,
}

/// Settings backed by a TOML file with synchronous write-through.
#[derive(Debug)]
pub struct TomlSettings {
    path: PathBuf,
    file: SettingsFile,
}

impl TomlSettings {
    /// Load settings from `path`, creating the file with defaults when absent.
    pub fn load_or_create(path: impl Into<PathBuf>) -> RsmResult<Self> {
        let path = path.into();
        let file = if path.exists() {
            let text = fs::read_to_string(&path)?;
            toml::from_str(&text)?
        } else {
            SettingsFile::default()
        };
        let settings = Self { path, file };
        settings.save()?;
        Ok(settings)
    }

    pub fn connection(&self) -> &ConnectionSettings {
        &self.file.connection
    }

    pub fn port(&self) -> &str {
        &self.file.connection.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.file.connection.baud_rate
    }

    fn save(&self) -> RsmResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = toml::to_string_pretty(&self.file)?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    fn position_mut(&mut self, motor: Motor) -> &mut i64 {
        match motor {
            Motor::Theta => &mut self.file.absolute_position.motor_1,
            Motor::TwoTheta => &mut self.file.absolute_position.motor_2,
            Motor::Translation => &mut self.file.absolute_position.motor_3,
            Motor::Energy => unreachable!("energy motor position is never stored"),
        }
    }
}

impl SettingsStore for TomlSettings {
    fn absolute_position(&self, motor: Motor) -> RsmResult<i64> {
        reject_energy(motor)?;
        Ok(match motor {
            Motor::Theta => self.file.absolute_position.motor_1,
            Motor::TwoTheta => self.file.absolute_position.motor_2,
            Motor::Translation => self.file.absolute_position.motor_3,
            Motor::Energy => unreachable!(),
        })
    }

    fn apply_position_delta(&mut self, motor: Motor, delta: i64) -> RsmResult<()> {
        reject_energy(motor)?;
        *self.position_mut(motor) += delta;
        self.save()
    }

    fn output_directory(&self) -> &Path {
        &self.file.paths.data_dir
    }
}

/// In-memory settings for tests; no file is touched.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    positions: [i64; 3],
    data_dir: PathBuf,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            positions: [0; 3],
            data_dir: PathBuf::from("."),
        }
    }
}

impl MemorySettings {
    pub fn with_output_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            positions: [0; 3],
            data_dir: dir.into(),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn absolute_position(&self, motor: Motor) -> RsmResult<i64> {
        reject_energy(motor)?;
        Ok(self.positions[motor.id() as usize - 1])
    }

    fn apply_position_delta(&mut self, motor: Motor, delta: i64) -> RsmResult<()> {
        reject_energy(motor)?;
        self.positions[motor.id() as usize - 1] += delta;
        Ok(())
    }

    fn output_directory(&self) -> &Path {
        &self.data_dir
    }
}
