//! Command-line entry point for the RSM-500 control program.
//!
//! Thin typed boundary over the library: each subcommand maps onto one core
//! operation. During a scan or move, pressing Enter requests cancellation; the
//! running wait honors it within one poll interval.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use rsm_control::cancel::CancelToken;
use rsm_control::device::Rsm;
use rsm_control::link::Transport;
use rsm_control::motor::{Motor, MotorDrive, MoveOutcome};
use rsm_control::scan::{ScanEngine, ScanKind, ScanSink, Snapshot};
use rsm_control::settings::TomlSettings;

#[derive(Parser)]
#[command(name = "rsm", about = "RSM-500 X-ray spectrometer monochromator control")]
struct Cli {
    /// Settings file (created with defaults when missing).
    #[arg(long, default_value = "settings.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Energy scan: sweep the reel motor, one row per step.
    Escan {
        /// Exposure per step in seconds.
        exposure: f64,
        /// Number of steps.
        steps: u32,
        /// Step in reel revolutions (signed).
        step: f64,
        /// Start coordinate in reel revolutions.
        start: f64,
    },
    /// Coupled theta/2-theta scan.
    D2scan {
        exposure: f64,
        steps: u32,
        /// Theta step in degrees; the second detector moves twice as far.
        step: f64,
        start: f64,
    },
    /// Continuous counts-per-second monitoring (no files written).
    Mscan {
        exposure: f64,
        /// Trailing window size on the plot.
        #[arg(default_value_t = 30)]
        window: usize,
    },
    /// Move one motor by a signed step in its physical unit.
    Move { motor: u8, step: f64 },
    /// Set the photocathode voltages of both detectors.
    SetVoltage { detector_1: u16, detector_2: u16 },
    /// Read the photocathode voltages back.
    GetVoltage,
    /// Set the discrimination thresholds of one detector.
    SetThreshold { detector: u8, lower: u16, upper: u16 },
    /// Read the thresholds of both detectors.
    GetThreshold,
    /// Report controller status, firmware version and last error code.
    Status,
}

/// Prints the newest point of every snapshot; stands in for the live plotter.
struct ConsoleSink;

impl ScanSink for ConsoleSink {
    fn push(&mut self, snapshot: Snapshot) {
        if let Some((x, c1, c2)) = snapshot.points.last() {
            println!("{x:>12.3}\t{c1:>10}\t{c2:>10}");
        }
    }

    fn finish(&mut self) {}
}

/// Cancel on the next line from stdin (Enter is enough).
fn spawn_cancel_listener(cancel: CancelToken) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_ok() {
            info!("cancellation requested");
            cancel.cancel();
        }
    });
}

fn exposure_tenths(seconds: f64) -> u16 {
    (seconds * 10.0).round() as u16
}

#[cfg(feature = "instrument_serial")]
fn open_transport(settings: &TomlSettings) -> Result<rsm_control::link::SerialTransport> {
    rsm_control::link::SerialTransport::open(settings.port(), settings.baud_rate())
        .context("failed to open the controller serial port")
}

#[cfg(not(feature = "instrument_serial"))]
fn open_transport(_settings: &TomlSettings) -> Result<rsm_control::link::MockTransport> {
    Err(rsm_control::error::RsmError::SerialFeatureDisabled.into())
}

fn run_scan_command<T: Transport>(
    rsm: Rsm<T>,
    drive: MotorDrive<TomlSettings>,
    cancel: CancelToken,
    kind: ScanKind,
    start: f64,
    steps: u32,
    step: f64,
    exposure: f64,
) -> Result<()> {
    let mut engine = ScanEngine::new(rsm, drive, Box::new(ConsoleSink), cancel);
    let run = engine.run_scan(kind, start, steps, step, exposure_tenths(exposure))?;
    if run.stopped {
        println!("scan stopped after {} of {} rows", run.rows.len(), steps);
    } else {
        println!("scan completed with {} rows", run.rows.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let settings =
        TomlSettings::load_or_create(&cli.settings).context("failed to load settings")?;
    let transport = open_transport(&settings)?;
    let mut rsm = Rsm::new(transport);
    let drive = MotorDrive::new(settings);
    let cancel = CancelToken::new();
    spawn_cancel_listener(cancel.clone());

    match cli.command {
        Command::Escan {
            exposure,
            steps,
            step,
            start,
        } => run_scan_command(
            rsm,
            drive,
            cancel,
            ScanKind::Single(Motor::Energy),
            start,
            steps,
            step,
            exposure,
        )?,
        Command::D2scan {
            exposure,
            steps,
            step,
            start,
        } => run_scan_command(
            rsm,
            drive,
            cancel,
            ScanKind::Coupled {
                primary: Motor::Theta,
                secondary: Motor::TwoTheta,
            },
            start,
            steps,
            step,
            exposure,
        )?,
        Command::Mscan { exposure, window } => {
            let mut engine = ScanEngine::new(rsm, drive, Box::new(ConsoleSink), cancel);
            engine.run_manual_scan(exposure_tenths(exposure), window)?;
        }
        Command::Move { motor, step } => {
            let motor = MotorDrive::<TomlSettings>::motor_from_id(motor)?;
            let mut drive = drive;
            match drive.move_by(&mut rsm, &cancel, motor, step)? {
                MoveOutcome::Arrived { raw_delta } => {
                    println!("motor {} arrived ({raw_delta:+} raw steps)", motor.id());
                }
                MoveOutcome::Stopped { raw_delta } => {
                    println!(
                        "motor {} stopped early ({raw_delta:+} raw steps achieved)",
                        motor.id()
                    );
                }
                MoveOutcome::NoOp => println!("zero step, nothing to do"),
            }
            if motor.has_persisted_position() {
                println!(
                    "absolute position: {} raw steps",
                    drive.absolute_position(motor)?
                );
            }
        }
        Command::SetVoltage {
            detector_1,
            detector_2,
        } => {
            rsm.set_voltage(1, detector_1)?;
            rsm.set_voltage(2, detector_2)?;
            println!(
                "photocathode voltages: {} V (1), {} V (2)",
                rsm.voltage(1)?,
                rsm.voltage(2)?
            );
        }
        Command::GetVoltage => {
            println!(
                "photocathode voltages: {} V (1), {} V (2)",
                rsm.voltage(1)?,
                rsm.voltage(2)?
            );
        }
        Command::SetThreshold {
            detector,
            lower,
            upper,
        } => {
            rsm.set_thresholds(detector, lower, upper)?;
            let (low, up) = rsm.thresholds(detector)?;
            println!("detector {detector} thresholds: {low} mV, {up} mV");
        }
        Command::GetThreshold => {
            for detector in [1, 2] {
                let (low, up) = rsm.thresholds(detector)?;
                println!("detector {detector} thresholds: {low} mV, {up} mV");
            }
        }
        Command::Status => {
            let (high, low) = rsm.version()?;
            println!("firmware version: {high}.{low}");
            println!("device status: {:#04x}", rsm.device_status()?);
            println!("last error code: {:#04x}", rsm.last_error()?);
        }
    }

    Ok(())
}
