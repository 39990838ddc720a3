// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use crossbeam_channel::Receiver;

use super::*;
use crate::calibration::CalSet;
use crate::hardware::DeviceError;
use crate::sweep::Properties;

/// A scripted in-memory device. Cloning shares the inner state, so tests can
/// keep a handle after moving the device into a worker.
#[derive(Clone)]
struct MockVna {
    inner: Arc<Mutex<MockInner>>,
}

struct MockInner {
    connected: bool,
    validate: bool,
    points: usize,
    current: (u64, u64),
    set_sweeps: Vec<(u64, u64)>,
    resets: Vec<(u64, u64)>,
    reconnects: usize,
    /// Per-read scripted S11/S21 values; the fallback is served once a script
    /// runs dry. Each read returns the value repeated over all points.
    script11: VecDeque<c64>,
    script21: VecDeque<c64>,
    /// Schedule of upcoming `read_frequencies` calls: `true` answers with an
    /// empty array, simulating a device that returns nothing. Reads past the
    /// end of the schedule behave normally.
    empty_reads: VecDeque<bool>,
    fallback11: c64,
    fallback21: c64,
    /// When set, `set_sweep` for any segment after the first asserts that the
    /// first segment's results are already visible in the buffers.
    probe: Option<WorkerControl>,
}

impl MockVna {
    fn new(points: usize) -> MockVna {
        MockVna {
            inner: Arc::new(Mutex::new(MockInner {
                connected: true,
                validate: true,
                points,
                current: (0, 0),
                set_sweeps: vec![],
                resets: vec![],
                reconnects: 0,
                script11: VecDeque::new(),
                script21: VecDeque::new(),
                empty_reads: VecDeque::new(),
                fallback11: c64::new(0.5, 0.0),
                fallback21: c64::new(0.2, 0.0),
                probe: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap()
    }
}

impl VnaDevice for MockVna {
    fn connected(&self) -> bool {
        self.lock().connected
    }

    fn set_sweep(&mut self, start: u64, stop: u64) -> Result<(), DeviceError> {
        let mut inner = self.lock();
        if !inner.set_sweeps.is_empty() {
            if let Some(control) = &inner.probe {
                let buffers = control.buffers();
                let buffers = buffers.lock().unwrap();
                let points = inner.points;
                assert!(
                    buffers.raw_data11[..points].iter().all(|dp| dp.re != 0.0),
                    "earlier segment not published before the next was requested"
                );
            }
        }
        inner.current = (start, stop);
        inner.set_sweeps.push((start, stop));
        Ok(())
    }

    fn read_frequencies(&mut self) -> Result<Vec<u64>, DeviceError> {
        let mut inner = self.lock();
        if inner.empty_reads.pop_front() == Some(true) {
            return Ok(vec![]);
        }
        let (start, stop) = inner.current;
        let step = (stop - start) as f64 / inner.points as f64;
        Ok((0..inner.points)
            .map(|i| (start as f64 + i as f64 * step).round() as u64)
            .collect())
    }

    fn read_values(&mut self, selector: Selector) -> Result<Vec<c64>, DeviceError> {
        let mut inner = self.lock();
        let value = match selector {
            Selector::S11 => inner.script11.pop_front().unwrap_or(inner.fallback11),
            Selector::S21 => inner.script21.pop_front().unwrap_or(inner.fallback21),
        };
        Ok(vec![value; inner.points])
    }

    fn reset_sweep(&mut self, start: u64, stop: u64) -> Result<(), DeviceError> {
        self.lock().resets.push((start, stop));
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), DeviceError> {
        self.lock().reconnects += 1;
        Ok(())
    }

    fn validate_input(&self) -> bool {
        self.lock().validate
    }
}

fn build_worker(
    device: MockVna,
    sweep: Sweep,
) -> (SweepWorker<MockVna>, Receiver<WorkerEvent>) {
    SweepWorker::new(
        device,
        Arc::new(Mutex::new(sweep)),
        Arc::new(RwLock::new(Calibration::new())),
    )
}

fn drain(receiver: &Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    receiver.try_iter().collect()
}

/// What a VNA with the given one-port error network reads for a DUT with true
/// reflection `gamma`.
fn measure(gamma: c64, e00: c64, e11: c64, delta_e: c64) -> c64 {
    (e00 - gamma * delta_e) / (1.0 - gamma * e11)
}

#[test]
fn truncate_discards_the_outlier_pass() {
    let rows = vec![
        vec![c64::new(1.0, 0.0), c64::new(1.0, 0.0)],
        vec![c64::new(1.1, 0.0), c64::new(1.1, 0.0)],
        vec![c64::new(9.0, 0.0), c64::new(9.0, 0.0)],
    ];
    let kept = truncate(rows, 1);
    assert_eq!(kept.len(), 2);
    for row in &kept {
        assert_eq!(row.len(), 2);
        assert!(row.iter().all(|v| v.re < 2.0));
    }
}

#[test]
fn truncate_refuses_illegal_requests() {
    let rows = vec![vec![c64::new(1.0, 0.0)], vec![c64::new(2.0, 0.0)]];
    assert_eq!(truncate(rows.clone(), 0), rows);
    // Discarding everything would leave nothing to average.
    assert_eq!(truncate(rows.clone(), 2), rows);
    assert_eq!(truncate(rows.clone(), 5), rows);
}

#[test]
fn single_sweep_fills_the_buffers() {
    let device = MockVna::new(11);
    let handle = device.clone();
    let sweep = Sweep::new(1_000_000, 11_000_000, 11, 1, Properties::default()).unwrap();
    let expected_freqs: Vec<u64> = sweep.get_frequencies().collect();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert_eq!(control.state(), WorkerState::Stopped);
    assert_eq!(control.percentage(), 100.0);
    let events = drain(&receiver);
    assert!(matches!(events.last(), Some(WorkerEvent::Finished)));
    assert!(events.contains(&WorkerEvent::Updated { segment: 0 }));

    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    assert_eq!(buffers.data11.len(), 11);
    let freqs: Vec<u64> = buffers.data11.iter().map(|dp| dp.freq).collect();
    assert_eq!(freqs, expected_freqs);
    for (dp, raw) in buffers.data11.iter().zip(&buffers.raw_data11) {
        // No calibration loaded, so corrected data is the raw data.
        assert_eq!(dp, raw);
        assert_abs_diff_eq!(dp.re, 0.5, epsilon = 1e-12);
    }

    let inner = handle.lock();
    assert_eq!(inner.set_sweeps, vec![(1_000_000, 11_000_000)]);
    // One segment never touches the device's display range.
    assert!(inner.resets.is_empty());
}

#[test]
fn disconnected_device_is_a_no_op() {
    let device = MockVna::new(11);
    device.lock().connected = false;
    let (mut worker, receiver) = build_worker(device, Sweep::default());
    let control = worker.control();
    worker.run();

    assert_eq!(control.state(), WorkerState::Stopped);
    assert!(drain(&receiver).is_empty());
}

#[test]
fn multi_segment_sweep_publishes_each_segment() {
    let device = MockVna::new(10);
    let handle = device.clone();
    let sweep = Sweep::new(1_000_000, 10_000_000, 10, 3, Properties::default()).unwrap();
    let ranges: Vec<(u64, u64)> = (0..3).map(|i| sweep.get_index_range(i)).collect();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    handle.lock().probe = Some(control.clone());
    worker.run();

    let events = drain(&receiver);
    assert!(matches!(events.last(), Some(WorkerEvent::Finished)));
    for segment in 0..3 {
        assert!(events.contains(&WorkerEvent::Updated { segment }));
    }

    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    assert_eq!(buffers.data11.len(), 30);

    let inner = handle.lock();
    assert_eq!(inner.set_sweeps, ranges);
    // Multi-segment sweeps put the device back on the full range afterwards.
    assert_eq!(inner.resets, vec![(1_000_000, 10_000_000)]);
}

#[test]
fn averaging_discards_outlier_readings() {
    let device = MockVna::new(2);
    {
        let mut inner = device.lock();
        inner.script11 = VecDeque::from(vec![
            c64::new(0.1, 0.0),
            c64::new(0.11, 0.0),
            c64::new(5.0, 0.0),
        ]);
    }
    let mut properties = Properties::default();
    properties.mode = SweepMode::Average;
    properties.averages = (3, 1);
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, properties).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert!(matches!(drain(&receiver).last(), Some(WorkerEvent::Finished)));
    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    for dp in &buffers.data11 {
        // 5.0 is the outlier; the kept pair averages to 0.105.
        assert_abs_diff_eq!(dp.re, 0.105, epsilon = 1e-12);
        assert_abs_diff_eq!(dp.im, 0.0, epsilon = 1e-12);
    }
    for dp in &buffers.data21 {
        assert_abs_diff_eq!(dp.re, 0.2, epsilon = 1e-12);
    }
}

#[test]
fn implausible_values_exhaust_retries() {
    let device = MockVna::new(2);
    device.lock().fallback11 = c64::new(10.0, 0.0);
    let handle = device.clone();
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, Properties::default()).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert_eq!(control.state(), WorkerState::Stopped);
    let events = drain(&receiver);
    match events.last() {
        Some(WorkerEvent::Error(message)) => {
            assert!(message.contains("Failed reading data 0 10 times"));
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    // Every failed retry re-establishes the connection.
    assert_eq!(handle.lock().reconnects, 10);
}

#[test]
fn persistently_empty_reads_are_a_fatal_error() {
    let device = MockVna::new(2);
    device.lock().empty_reads = VecDeque::from(vec![true; 8]);
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, Properties::default()).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert_eq!(control.state(), WorkerState::Stopped);
    let events = drain(&receiver);
    match events.last() {
        Some(WorkerEvent::Error(message)) => {
            assert!(message.contains("failed to read segment 5 times"));
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    // The buffers keep their last-known (zero-initialised) data.
    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    assert!(buffers.raw_data11.iter().all(|dp| dp.re == 0.0));
}

#[test]
fn segment_retry_budget_resets_per_averaging_pass() {
    let device = MockVna::new(2);
    // Four empty reads before each of the two passes: within budget per pass,
    // but over it if the retries were counted across the whole segment.
    let mut schedule = vec![true, true, true, true, false];
    schedule.extend([true, true, true, true, false]);
    device.lock().empty_reads = VecDeque::from(schedule);

    let mut properties = Properties::default();
    properties.mode = SweepMode::Average;
    properties.averages = (2, 0);
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, properties).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert!(matches!(drain(&receiver).last(), Some(WorkerEvent::Finished)));
    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    for dp in &buffers.data11 {
        assert_abs_diff_eq!(dp.re, 0.5, epsilon = 1e-12);
    }
}

#[test]
fn percentage_stays_within_bounds_in_continuous_mode() {
    let device = MockVna::new(2);
    let mut properties = Properties::default();
    properties.mode = SweepMode::Continuous;
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, properties).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    let handle = thread::spawn(move || worker.run());

    for _ in 0..10 {
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("no sweep progress");
        let percentage = control.percentage();
        assert!(
            (0.0..=100.0).contains(&percentage),
            "progress out of bounds: {percentage}"
        );
    }
    control.stop();
    handle.join().unwrap();

    assert_eq!(control.percentage(), 100.0);
    assert!(matches!(drain(&receiver).last(), Some(WorkerEvent::Finished)));
}

#[test]
fn validation_can_be_disabled() {
    let device = MockVna::new(2);
    {
        let mut inner = device.lock();
        inner.validate = false;
        inner.fallback11 = c64::new(10.0, 0.0);
    }
    let handle = device.clone();
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, Properties::default()).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.run();

    assert!(matches!(drain(&receiver).last(), Some(WorkerEvent::Finished)));
    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    assert_abs_diff_eq!(buffers.raw_data11[0].re, 10.0, epsilon = 1e-12);
    assert_eq!(handle.lock().reconnects, 0);
}

#[test]
fn continuous_sweep_stops_on_request() {
    let device = MockVna::new(2);
    let mut properties = Properties::default();
    properties.mode = SweepMode::Continuous;
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, properties).unwrap();

    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    let handle = thread::spawn(move || worker.run());

    // Let a couple of segments through before asking for a stop.
    for _ in 0..2 {
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("no sweep progress");
    }
    control.stop();
    handle.join().unwrap();

    assert_eq!(control.state(), WorkerState::Stopped);
    let events = drain(&receiver);
    assert!(matches!(events.last(), Some(WorkerEvent::Finished)));
}

#[test]
fn duplicate_run_is_rejected() {
    let device = MockVna::new(2);
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, Properties::default()).unwrap();
    let (mut worker, receiver) = build_worker(device, sweep);
    // Simulate a run already in progress.
    worker.control().state.store(WorkerState::Running);
    worker.run();
    assert!(drain(&receiver).is_empty());
}

#[test]
fn offset_delay_rotates_corrected_data() {
    let delay = 1e-9;
    let device = MockVna::new(2);
    {
        let mut inner = device.lock();
        inner.fallback11 = c64::new(1.0, 0.0);
        inner.fallback21 = c64::new(1.0, 0.0);
    }
    let sweep = Sweep::new(1_000_000, 2_000_000, 2, 1, Properties::default()).unwrap();
    let (mut worker, receiver) = build_worker(device, sweep);
    let control = worker.control();
    worker.offset_delay = delay;
    worker.run();
    drain(&receiver);

    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    for (dp11, dp21) in buffers.data11.iter().zip(&buffers.data21) {
        let f = dp11.freq as f64;
        // Reflection sees the delay twice, transmission once.
        let expected11 = c64::new(0.0, -TAU * f * delay * 2.0).exp();
        let expected21 = c64::new(0.0, -TAU * f * delay).exp();
        assert_abs_diff_eq!(dp11.re, expected11.re, epsilon = 1e-12);
        assert_abs_diff_eq!(dp11.im, expected11.im, epsilon = 1e-12);
        assert_abs_diff_eq!(dp21.re, expected21.re, epsilon = 1e-12);
        assert_abs_diff_eq!(dp21.im, expected21.im, epsilon = 1e-12);
    }
    // Raw data is stored unrotated.
    assert_abs_diff_eq!(buffers.raw_data11[0].re, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(buffers.raw_data11[0].im, 0.0, epsilon = 1e-12);
}

#[test]
fn solved_calibration_is_applied_to_both_ports() {
    let e00 = c64::new(0.08, -0.03);
    let e11 = c64::new(0.15, 0.1);
    let delta_e = c64::new(-0.9, 0.05);
    let truth = c64::new(0.4, -0.25);
    let m11 = measure(truth, e00, e11, delta_e);
    let m21 = c64::new(0.5, 0.0);

    let sweep = Sweep::new(1_000_000, 11_000_000, 11, 1, Properties::default()).unwrap();
    let freqs: Vec<u64> = sweep.get_frequencies().collect();

    let mut cal = Calibration::new();
    for (set, gamma) in [
        (CalSet::Short, c64::new(-1.0, 0.0)),
        (CalSet::Open, c64::new(1.0, 0.0)),
        (CalSet::Load, c64::new(0.0, 0.0)),
    ] {
        let m = measure(gamma, e00, e11, delta_e);
        cal.insert(
            set,
            freqs.iter().map(|&f| Datapoint::new(f, m.re, m.im)).collect(),
        );
    }
    cal.insert(
        CalSet::Through,
        freqs.iter().map(|&f| Datapoint::new(f, 1.0, 0.0)).collect(),
    );
    cal.insert(
        CalSet::Isolation,
        freqs.iter().map(|&f| Datapoint::new(f, 0.0, 0.0)).collect(),
    );
    cal.calc_corrections().unwrap();
    // With an ideal measured through, transmission tracking is 1 - e11².
    let e10e32 = 1.0 - e11 * e11;

    let device = MockVna::new(11);
    {
        let mut inner = device.lock();
        inner.fallback11 = m11;
        inner.fallback21 = m21;
    }
    let (mut worker, receiver) = SweepWorker::new(
        device,
        Arc::new(Mutex::new(sweep)),
        Arc::new(RwLock::new(cal)),
    );
    let control = worker.control();
    worker.run();
    assert!(matches!(drain(&receiver).last(), Some(WorkerEvent::Finished)));

    let buffers = control.buffers();
    let buffers = buffers.lock().unwrap();
    let expected21 = m21 / e10e32;
    for (dp11, dp21) in buffers.data11.iter().zip(&buffers.data21) {
        assert_abs_diff_eq!(dp11.re, truth.re, epsilon = 1e-9);
        assert_abs_diff_eq!(dp11.im, truth.im, epsilon = 1e-9);
        assert_abs_diff_eq!(dp21.re, expected21.re, epsilon = 1e-9);
        assert_abs_diff_eq!(dp21.im, expected21.im, epsilon = 1e-9);
    }
    // The raw buffers keep the uncorrected measurements.
    assert_abs_diff_eq!(buffers.raw_data11[0].re, m11.re, epsilon = 1e-12);
}
