//! Scan engine: repeated measure-move cycles with live result streaming.
//!
//! A scan alternates timed pulse-count measurements with calibrated motor
//! moves, recording one row per step. Rows are streamed to an outbound
//! [`ScanSink`] after every measurement and appended to the data file
//! immediately, so an interruption or failure loses at most the in-flight
//! step. Interruption is a normal termination path: the run ends with its
//! `stopped` flag set and all completed bookkeeping intact.

use std::collections::VecDeque;
use std::sync::mpsc;

use log::info;

use crate::cancel::CancelToken;
use crate::data::ScanFile;
use crate::detector::{check_exposure_tenths, counts_per_second};
use crate::device::{Rsm, WaitOutcome};
use crate::error::{RsmError, RsmResult};
use crate::link::Transport;
use crate::motor::{Motor, MotorDrive, MoveOutcome, DEENERGIZE_ID};
use crate::settings::SettingsStore;

/// Per-iteration step of the secondary motor relative to the primary in a
/// coupled scan (theta/2-theta geometry).
pub const COUPLED_STEP_RATIO: f64 = 2.0;

/// What a scan sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// One motor moves by `step` each iteration.
    Single(Motor),
    /// Two motors move in the same iteration; the secondary at
    /// [`COUPLED_STEP_RATIO`] times the primary step.
    Coupled { primary: Motor, secondary: Motor },
}

impl ScanKind {
    /// Scan-type tag used in data file headers and snapshots.
    pub fn label(&self) -> &'static str {
        match self {
            ScanKind::Single(Motor::Energy) => "en_scan",
            ScanKind::Single(_) => "d_scan",
            ScanKind::Coupled { .. } => "d2_scan",
        }
    }

    /// Data file name prefix for this scan type.
    pub fn prefix(&self) -> &'static str {
        match self {
            ScanKind::Single(Motor::Energy) => "EN",
            ScanKind::Single(_) => "DM",
            ScanKind::Coupled { .. } => "D2",
        }
    }

    /// The motor whose coordinate is recorded.
    pub fn primary(&self) -> Motor {
        match self {
            ScanKind::Single(motor) => *motor,
            ScanKind::Coupled { primary, .. } => *primary,
        }
    }

    /// Per-iteration moves, in issue order.
    fn moves(&self, step: f64) -> Vec<(Motor, f64)> {
        match self {
            ScanKind::Single(motor) => vec![(*motor, step)],
            ScanKind::Coupled { primary, secondary } => {
                vec![(*primary, step), (*secondary, step * COUPLED_STEP_RATIO)]
            }
        }
    }

    fn motors_label(&self) -> String {
        match self {
            ScanKind::Single(motor) => motor.id().to_string(),
            ScanKind::Coupled { primary, secondary } => {
                format!("{}+{}", primary.id(), secondary.id())
            }
        }
    }

    fn x_label(&self) -> &'static str {
        match self.primary() {
            Motor::Energy => "reel revolutions",
            Motor::Theta | Motor::TwoTheta => "degrees",
            Motor::Translation => "steps",
        }
    }
}

/// One recorded measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRow {
    /// Coordinate in the primary motor's physical unit.
    pub coordinate: f64,
    pub counter_1: u32,
    pub counter_2: u32,
}

/// A finished (or interrupted) scan with its rows in measurement order.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub kind: ScanKind,
    pub start: f64,
    pub step: f64,
    pub step_count: u32,
    pub exposure_tenths: u16,
    pub rows: Vec<ScanRow>,
    pub stopped: bool,
}

/// Full snapshot of accumulated results, pushed after every recorded row.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub label: String,
    pub x_label: String,
    pub y_label: String,
    /// `(coordinate, detector 1, detector 2)` triples.
    pub points: Vec<(f64, f64, f64)>,
}

/// Outbound sink the engine streams snapshots to (the live plotter in
/// production). Pushes must never block the engine.
pub trait ScanSink {
    fn push(&mut self, snapshot: Snapshot);
    /// End-of-run signal. Delivery of the final snapshot is best-effort.
    fn finish(&mut self);
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ScanSink for NullSink {
    fn push(&mut self, _snapshot: Snapshot) {}
    fn finish(&mut self) {}
}

/// Events carried by a [`ChannelSink`].
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Snapshot(Snapshot),
    Finished,
}

/// Sink backed by an unbounded channel; a renderer drains it at its own pace.
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ScanSink for ChannelSink {
    fn push(&mut self, snapshot: Snapshot) {
        // A gone receiver must not fail the producer.
        let _ = self.tx.send(SinkEvent::Snapshot(snapshot));
    }

    fn finish(&mut self) {
        let _ = self.tx.send(SinkEvent::Finished);
    }
}

/// Drives measure-move cycles against the device.
pub struct ScanEngine<T: Transport, S: SettingsStore> {
    rsm: Rsm<T>,
    drive: MotorDrive<S>,
    sink: Box<dyn ScanSink>,
    cancel: CancelToken,
}

impl<T: Transport, S: SettingsStore> ScanEngine<T, S> {
    pub fn new(
        rsm: Rsm<T>,
        drive: MotorDrive<S>,
        sink: Box<dyn ScanSink>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            rsm,
            drive,
            sink,
            cancel,
        }
    }

    pub fn rsm_mut(&mut self) -> &mut Rsm<T> {
        &mut self.rsm
    }

    pub fn drive_mut(&mut self) -> &mut MotorDrive<S> {
        &mut self.drive
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run a multi-step motor scan.
    ///
    /// Precondition: the involved motor(s) are already parked at `start`
    /// (see [`MotorDrive::move_to`]). Each iteration measures, records and
    /// streams a row, persists it, then moves — except after the last row.
    /// Returns the run with `stopped` set when it was interrupted.
    pub fn run_scan(
        &mut self,
        kind: ScanKind,
        start: f64,
        step_count: u32,
        step: f64,
        exposure_tenths: u16,
    ) -> RsmResult<ScanRun> {
        check_exposure_tenths(exposure_tenths)?;
        if step_count == 0 {
            return Err(RsmError::Validation("step count must be positive".into()));
        }
        if step == 0.0 {
            return Err(RsmError::Validation("step value cannot be zero".into()));
        }
        if let ScanKind::Coupled { primary, secondary } = kind {
            if primary == secondary {
                return Err(RsmError::Validation(
                    "coupled scan needs two distinct motors".into(),
                ));
            }
        }

        // Known idle state before the first measurement.
        self.rsm.motor_select(DEENERGIZE_ID)?;

        let exposure_s = f64::from(exposure_tenths) / 10.0;
        let metadata = [
            ("scan_type", kind.label().to_string()),
            ("motor", kind.motors_label()),
            ("exposure", format!("{exposure_s} s")),
            ("steps", step_count.to_string()),
            ("step", step.to_string()),
            ("start", start.to_string()),
            ("date", chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        ];
        let mut file = ScanFile::create(
            self.drive.store().output_directory(),
            kind.prefix(),
            &metadata,
        )?;

        info!(
            "{} started: {} steps of {} from {}, exposure {} s",
            kind.label(),
            step_count,
            step,
            start,
            exposure_s
        );

        let mut run = ScanRun {
            kind,
            start,
            step,
            step_count,
            exposure_tenths,
            rows: Vec::with_capacity(step_count as usize),
            stopped: false,
        };

        'steps: for step_num in 0..step_count {
            let Some((counter_1, counter_2)) = self.measure(exposure_tenths)? else {
                run.stopped = true;
                break;
            };

            let coordinate = start + f64::from(step_num) * step;
            run.rows.push(ScanRow {
                coordinate,
                counter_1,
                counter_2,
            });
            self.sink.push(snapshot_of(&run));
            file.append_row(coordinate, counter_1, counter_2)?;

            // The last row needs no move behind it.
            if step_num + 1 == step_count {
                break;
            }

            for (motor, motor_step) in kind.moves(step) {
                match self.drive.move_by(&mut self.rsm, &self.cancel, motor, motor_step)? {
                    MoveOutcome::Stopped { .. } => {
                        run.stopped = true;
                        break 'steps;
                    }
                    MoveOutcome::Arrived { .. } | MoveOutcome::NoOp => {}
                }
            }
        }

        self.sink.finish();
        self.rsm.motor_select(DEENERGIZE_ID)?;

        if run.stopped {
            info!("{} stopped after {} rows", kind.label(), run.rows.len());
        } else {
            info!("{} completed with {} rows", kind.label(), run.rows.len());
        }
        Ok(run)
    }

    /// Continuous monitoring mode: measure, convert to counts-per-second and
    /// stream a fixed-size trailing window. No motors move and nothing is
    /// persisted; the loop ends only on cancellation during a measurement.
    pub fn run_manual_scan(&mut self, exposure_tenths: u16, window_size: usize) -> RsmResult<()> {
        check_exposure_tenths(exposure_tenths)?;
        if window_size < 2 {
            return Err(RsmError::Validation(
                "window must hold at least two samples".into(),
            ));
        }

        let exposure_s = f64::from(exposure_tenths) / 10.0;
        let mut window: VecDeque<(f64, f64, f64)> = VecDeque::with_capacity(window_size + 1);
        let mut ticks: u32 = 0;

        info!("manual scan started, exposure {} s", exposure_s);

        loop {
            let Some((counter_1, counter_2)) = self.measure(exposure_tenths)? else {
                break;
            };

            window.push_back((
                f64::from(ticks) * exposure_s,
                counts_per_second(counter_1, exposure_tenths),
                counts_per_second(counter_2, exposure_tenths),
            ));
            if window.len() > window_size {
                window.pop_front();
            }

            self.sink.push(Snapshot {
                label: "manual_scan".to_string(),
                x_label: "time, s".to_string(),
                y_label: "CPS".to_string(),
                points: window.iter().copied().collect(),
            });
            ticks += 1;
        }

        self.sink.finish();
        info!("manual scan stopped after {} measurements", ticks);
        Ok(())
    }

    /// One timed measurement: set exposure, start the count and wait it out.
    /// `None` when the wait was interrupted (the count is already stopped).
    fn measure(&mut self, exposure_tenths: u16) -> RsmResult<Option<(u32, u32)>> {
        self.rsm.exposure_set_raw(exposure_tenths)?;
        self.rsm.counter_start()?;
        match self.rsm.wait_exposure_done(&self.cancel)? {
            WaitOutcome::Interrupted => Ok(None),
            WaitOutcome::Completed => Ok(Some(self.rsm.read_counts()?)),
        }
    }
}

fn snapshot_of(run: &ScanRun) -> Snapshot {
    Snapshot {
        label: run.kind.label().to_string(),
        x_label: run.kind.x_label().to_string(),
        y_label: "counts".to_string(),
        points: run
            .rows
            .iter()
            .map(|r| {
                (
                    r.coordinate,
                    f64::from(r.counter_1),
                    f64::from(r.counter_2),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_kind_labels() {
        assert_eq!(ScanKind::Single(Motor::Energy).label(), "en_scan");
        assert_eq!(ScanKind::Single(Motor::Energy).prefix(), "EN");
        assert_eq!(ScanKind::Single(Motor::Theta).label(), "d_scan");
        let coupled = ScanKind::Coupled {
            primary: Motor::Theta,
            secondary: Motor::TwoTheta,
        };
        assert_eq!(coupled.label(), "d2_scan");
        assert_eq!(coupled.prefix(), "D2");
    }

    #[test]
    fn test_coupled_moves_at_double_step() {
        let coupled = ScanKind::Coupled {
            primary: Motor::Theta,
            secondary: Motor::TwoTheta,
        };
        let moves = coupled.moves(0.5);
        assert_eq!(moves, vec![(Motor::Theta, 0.5), (Motor::TwoTheta, 1.0)]);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        sink.push(Snapshot {
            label: "x".into(),
            x_label: "x".into(),
            y_label: "y".into(),
            points: vec![],
        });
        sink.finish();
    }
}
