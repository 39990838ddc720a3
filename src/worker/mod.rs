// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Drive a device through a sweep plan and publish corrected results.
//!
//! The worker owns the device and is meant to run on its own thread; callers
//! observe it through a cloneable [`WorkerControl`] handle and a channel of
//! [`WorkerEvent`]s. Results land segment by segment in shared buffers, so a
//! consumer can render partial sweeps while later segments are still being
//! read.

mod error;
#[cfg(test)]
mod tests;

pub use error::WorkerError;

use std::sync::{Arc, Mutex, RwLock};
use std::thread::sleep;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use itertools::Itertools;
use log::{debug, warn};
use strum_macros::Display;

use crate::{
    c64,
    calibration::{self, Calibration},
    hardware::{Selector, VnaDevice},
    rftools::Datapoint,
    sweep::{Sweep, SweepMode},
};

/// Measurements with a magnitude above this are considered implausible and
/// trigger a re-read.
const VALUE_MAX: f64 = 9.5;
/// Implausible-value retries before a read is abandoned.
const RETRIES_MAX: usize = 10;
const RETRY_PAUSE: Duration = Duration::from_millis(200);
/// Attempts at a segment that keeps coming back inconsistent.
const SEGMENT_RETRIES_MAX: usize = 5;
const SEGMENT_RETRY_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

/// Progress notifications sent while a sweep runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Fresh data for one segment is in the buffers.
    Updated { segment: usize },
    /// The sweep completed (or was cancelled cleanly).
    Finished,
    /// The sweep aborted; the message is suitable for display.
    Error(String),
}

/// The shared result buffers. `data11`/`data21` hold corrected values,
/// `raw_data11`/`raw_data21` the measurements as read.
#[derive(Debug, Default)]
pub struct SweepBuffers {
    pub data11: Vec<Datapoint>,
    pub data21: Vec<Datapoint>,
    pub raw_data11: Vec<Datapoint>,
    pub raw_data21: Vec<Datapoint>,
}

/// A cloneable handle onto a running (or stopped) worker.
#[derive(Clone)]
pub struct WorkerControl {
    state: Arc<AtomicCell<WorkerState>>,
    percentage: Arc<AtomicCell<f64>>,
    buffers: Arc<Mutex<SweepBuffers>>,
}

impl WorkerControl {
    /// Ask the worker to stop at the next checkpoint. A sweep cancelled this
    /// way still ends with a `Finished` event.
    pub fn stop(&self) {
        self.state.store(WorkerState::Stopped);
    }

    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    /// Sweep progress, 0 to 100.
    pub fn percentage(&self) -> f64 {
        self.percentage.load()
    }

    pub fn buffers(&self) -> Arc<Mutex<SweepBuffers>> {
        Arc::clone(&self.buffers)
    }
}

pub struct SweepWorker<D: VnaDevice> {
    device: D,
    sweep: Arc<Mutex<Sweep>>,
    calibration: Arc<RwLock<Calibration>>,
    buffers: Arc<Mutex<SweepBuffers>>,
    state: Arc<AtomicCell<WorkerState>>,
    percentage: Arc<AtomicCell<f64>>,
    events: Sender<WorkerEvent>,
    /// The plan the buffers are currently sized for.
    current: Sweep,
    /// Extra electrical delay applied after calibration \[seconds\].
    pub offset_delay: f64,
}

impl<D: VnaDevice> SweepWorker<D> {
    pub fn new(
        device: D,
        sweep: Arc<Mutex<Sweep>>,
        calibration: Arc<RwLock<Calibration>>,
    ) -> (SweepWorker<D>, Receiver<WorkerEvent>) {
        let (events, receiver) = unbounded();
        let current = sweep.lock().expect("sweep lock poisoned").clone();
        let mut worker = SweepWorker {
            device,
            sweep,
            calibration,
            buffers: Arc::default(),
            state: Arc::new(AtomicCell::new(WorkerState::Stopped)),
            percentage: Arc::new(AtomicCell::new(0.0)),
            events,
            current: current.clone(),
            offset_delay: 0.0,
        };
        worker.init_data(&current);
        (worker, receiver)
    }

    pub fn control(&self) -> WorkerControl {
        WorkerControl {
            state: Arc::clone(&self.state),
            percentage: Arc::clone(&self.percentage),
            buffers: Arc::clone(&self.buffers),
        }
    }

    /// Run one sweep (or keep sweeping, in continuous mode) to completion.
    /// Any error is reported on the event channel; the worker always ends up
    /// `Stopped`.
    pub fn run(&mut self) {
        if let Err(e) = self.run_sweep() {
            warn!("Sweep aborted: {e}");
            let _ = self.events.send(WorkerEvent::Error(e.to_string()));
            self.state.store(WorkerState::Stopped);
        }
    }

    fn run_sweep(&mut self) -> Result<(), WorkerError> {
        if !self.device.connected() {
            debug!("Attempted to sweep without a connected device");
            return Ok(());
        }
        if self
            .state
            .compare_exchange(WorkerState::Stopped, WorkerState::Running)
            .is_err()
        {
            warn!("Duplicate attempt to run the worker");
            return Ok(());
        }
        self.percentage.store(0.0);

        let sweep = self.sweep.lock().expect("sweep lock poisoned").clone();
        if sweep != self.current {
            self.current = sweep.clone();
            self.init_data(&sweep);
        }

        self.run_loop(&sweep)?;

        if sweep.segments() > 1 {
            self.device.reset_sweep(sweep.start(), sweep.end())?;
        }
        self.percentage.store(100.0);
        let _ = self.events.send(WorkerEvent::Finished);
        self.state.store(WorkerState::Stopped);
        Ok(())
    }

    fn run_loop(&mut self, sweep: &Sweep) -> Result<(), WorkerError> {
        let averages = if sweep.properties.mode == SweepMode::Average {
            sweep.properties.averages.0.max(1)
        } else {
            1
        };
        loop {
            for segment in 0..sweep.segments() {
                if self.state.load() == WorkerState::Stopped {
                    debug!("Stopping sweeping as signalled");
                    return Ok(());
                }
                let (start, stop) = sweep.get_index_range(segment);
                match self.read_averaged_segment(start, stop, averages, sweep, segment)? {
                    Some((freqs, values11, values21)) => {
                        self.update_data(sweep, segment, &freqs, &values11, &values21);
                        self.percentage
                            .store((segment + 1) as f64 * 100.0 / sweep.segments() as f64);
                    }
                    None => return Ok(()),
                }
            }
            if sweep.properties.mode != SweepMode::Continuous {
                return Ok(());
            }
        }
    }

    /// Size the buffers for a new plan, pre-filled with zero data at the
    /// planned frequencies so partial sweeps render against the full span.
    fn init_data(&mut self, sweep: &Sweep) {
        let mut buffers = self.buffers.lock().expect("buffer lock poisoned");
        buffers.data11.clear();
        buffers.data21.clear();
        buffers.raw_data11.clear();
        buffers.raw_data21.clear();
        for freq in sweep.get_frequencies() {
            let dp = Datapoint::new(freq, 0.0, 0.0);
            buffers.data11.push(dp);
            buffers.data21.push(dp);
            buffers.raw_data11.push(dp);
            buffers.raw_data21.push(dp);
        }
        debug!("Sweep buffers initialised for {} points", buffers.data11.len());
    }

    /// Read one segment `averages` times and reduce to a single pass.
    /// `Ok(None)` means the sweep was cancelled before the segment completed.
    fn read_averaged_segment(
        &mut self,
        start: u64,
        stop: u64,
        averages: usize,
        sweep: &Sweep,
        segment: usize,
    ) -> Result<Option<(Vec<u64>, Vec<c64>, Vec<c64>)>, WorkerError> {
        debug!("Reading segment {segment} ({start} to {stop} Hz, {averages} passes)");
        let mut freqs = vec![];
        let mut values11: Vec<Vec<c64>> = vec![];
        let mut values21: Vec<Vec<c64>> = vec![];

        for pass in 0..averages {
            // Each averaging pass gets a fresh retry budget.
            let mut retries = 0;
            if self.state.load() == WorkerState::Stopped {
                debug!("Stopping averaging as signalled");
                if averages == 1 {
                    break;
                }
                warn!("Stop during average. Discarding sweep result.");
                return Ok(None);
            }
            debug!("Reading average pass {} / {averages}", pass + 1);

            let (f, v11, v21) = loop {
                match self.read_segment(start, stop)? {
                    Some(data) => break data,
                    None => {
                        retries += 1;
                        if retries > SEGMENT_RETRIES_MAX {
                            return Err(WorkerError::InvalidSegment {
                                retries: SEGMENT_RETRIES_MAX,
                            });
                        }
                        warn!("Re-reading segment {segment}");
                        sleep(SEGMENT_RETRY_PAUSE);
                    }
                }
            };
            freqs = f;
            values11.push(v11);
            values21.push(v21);

            // Absolute progress, so continuous sweeps restart from zero each
            // lap instead of accumulating past 100.
            let step = 100.0 / (sweep.segments() * averages) as f64;
            let base = segment as f64 * 100.0 / sweep.segments() as f64;
            self.percentage.store(base + (pass + 1) as f64 * step);
            let _ = self.events.send(WorkerEvent::Updated { segment });
        }

        // Cancelled before the single pass completed.
        if values11.is_empty() {
            return Ok(None);
        }

        let truncates = sweep.properties.averages.1;
        if truncates > 0 && averages > 1 {
            values11 = truncate(values11, truncates);
            values21 = truncate(values21, truncates);
        }
        let v11 = average_columns(&values11);
        let v21 = average_columns(&values21);
        Ok(Some((freqs, v11, v21)))
    }

    /// One raw pass over a segment. `Ok(None)` flags an invalid read (empty
    /// or mismatched arrays) that the caller should retry.
    fn read_segment(
        &mut self,
        start: u64,
        stop: u64,
    ) -> Result<Option<(Vec<u64>, Vec<c64>, Vec<c64>)>, WorkerError> {
        self.device.set_sweep(start, stop)?;
        let freqs = self.device.read_frequencies()?;
        debug!("Read {} frequencies", freqs.len());
        let values11 = self.read_data(Selector::S11)?;
        let values21 = self.read_data(Selector::S21)?;
        if freqs.is_empty() || freqs.len() != values11.len() || freqs.len() != values21.len() {
            warn!("No valid data during this run");
            return Ok(None);
        }
        Ok(Some((freqs, values11, values21)))
    }

    /// Read one measurement array, retrying implausible values with a device
    /// reconnect between attempts.
    fn read_data(&mut self, selector: Selector) -> Result<Vec<c64>, WorkerError> {
        for retry in 0..RETRIES_MAX {
            let values = self.device.read_values(selector)?;
            if self.device.validate_input() && values.iter().any(|v| v.norm() > VALUE_MAX) {
                warn!("Implausible values in {selector} (retry {retry})");
                sleep(RETRY_PAUSE);
                self.device.reconnect()?;
            } else {
                return Ok(values);
            }
        }
        Err(WorkerError::ReadFailed {
            selector,
            retries: RETRIES_MAX,
        })
    }

    /// Write one segment's results into the shared buffers, applying whatever
    /// corrections are available.
    fn update_data(
        &mut self,
        sweep: &Sweep,
        segment: usize,
        freqs: &[u64],
        values11: &[c64],
        values21: &[c64],
    ) {
        let offset = sweep.points() * segment;
        let cal = self.calibration.read().expect("calibration lock poisoned");
        let apply = cal.is_calculated();
        let mut buffers = self.buffers.lock().expect("buffer lock poisoned");
        for (i, (&freq, (&m11, &m21))) in freqs
            .iter()
            .zip(values11.iter().zip(values21.iter()))
            .enumerate()
        {
            let raw11 = Datapoint::new(freq, m11.re, m11.im);
            let raw21 = Datapoint::new(freq, m21.re, m21.im);
            let mut dp11 = raw11;
            let mut dp21 = raw21;
            if apply {
                if cal.is_valid_1port() {
                    dp11 = cal.correct11(&raw11);
                }
                if cal.is_valid_2port() {
                    dp21 = cal.correct21(&raw21, &raw11);
                }
            }
            if self.offset_delay != 0.0 {
                dp11 = calibration::correct_delay(&dp11, self.offset_delay, true);
                dp21 = calibration::correct_delay(&dp21, self.offset_delay, false);
            }
            buffers.raw_data11[offset + i] = raw11;
            buffers.raw_data21[offset + i] = raw21;
            buffers.data11[offset + i] = dp11;
            buffers.data21[offset + i] = dp21;
        }
        drop(buffers);
        let _ = self.events.send(WorkerEvent::Updated { segment });
    }
}

/// Per frequency, discard the `count` sweep passes furthest from the complex
/// mean. Input and output are rows of passes; a no-op if the request would
/// leave nothing.
pub fn truncate(values: Vec<Vec<c64>>, count: usize) -> Vec<Vec<c64>> {
    let keep = values.len().saturating_sub(count);
    if count < 1 || keep < 1 {
        warn!("Not doing illegal truncate");
        return values;
    }
    debug!("Truncating {} passes to {keep}", values.len());
    let columns = values[0].len();
    let mut kept_columns: Vec<Vec<c64>> = Vec::with_capacity(columns);
    for col in 0..columns {
        let mean = values.iter().map(|row| row[col]).sum::<c64>() / values.len() as f64;
        let kept = values
            .iter()
            .map(|row| row[col])
            .sorted_by(|&a, &b| (a - mean).norm().total_cmp(&(b - mean).norm()))
            .take(keep)
            .collect();
        kept_columns.push(kept);
    }
    (0..keep)
        .map(|row| (0..columns).map(|col| kept_columns[col][row]).collect())
        .collect()
}

fn average_columns(values: &[Vec<c64>]) -> Vec<c64> {
    let rows = values.len() as f64;
    (0..values[0].len())
        .map(|col| values.iter().map(|row| row[col]).sum::<c64>() / rows)
        .collect()
}
