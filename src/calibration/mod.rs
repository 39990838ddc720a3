// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! 1-port and 2-port SOLT error correction.
//!
//! A [`Calibration`] collects one measured dataset per standard, solves the
//! closed-form three-standard system for per-frequency error terms, and
//! applies the resulting corrections to raw S11/S21 measurements.

mod error;
mod io;
pub mod standards;

use log::{debug, error, warn};
use num_traits::Zero;
use rayon::prelude::*;

pub use error::CalibrationError;
pub use standards::{
    CalStandards, LoadStandard, OpenStandard, ShortStandard, ThroughStandard,
};

use crate::{c64, rftools::Datapoint};

/// Which measured calibration dataset a sweep belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalSet {
    Short,
    Open,
    Load,
    Through,
    Isolation,
}

/// Per-frequency error terms, index-aligned with the measured datasets (same
/// position implies same frequency).
#[derive(Debug, Clone, Default)]
pub struct ErrorTerms {
    /// The frequencies the terms were solved at \[Hz\], ascending.
    pub freqs: Vec<u64>,
    /// Directivity.
    pub e00: Vec<c64>,
    /// Port match.
    pub e11: Vec<c64>,
    /// Tracking.
    pub delta_e: Vec<c64>,
    /// Leakage (forward isolation).
    pub e30: Vec<c64>,
    /// Transmission tracking.
    pub e10e32: Vec<c64>,
}

/// Stores per-standard raw measurements, solves for error terms, and corrects
/// raw datapoints.
///
/// Lifecycle: created empty, populated with [`Calibration::insert`], solved
/// once with [`Calibration::calc_corrections`], then consumed repeatedly via
/// [`Calibration::correct11`]/[`Calibration::correct21`].
#[derive(Debug, Clone)]
pub struct Calibration {
    short: Vec<Datapoint>,
    open: Vec<Datapoint>,
    load: Vec<Datapoint>,
    through: Vec<Datapoint>,
    isolation: Vec<Datapoint>,

    /// Models of the physical standards used when solving.
    pub standards: CalStandards,

    /// Solved error terms. `None` until `calc_corrections` succeeds; any
    /// mutation of the measured datasets clears it again, so the terms and
    /// the "calculated" state are always published together.
    terms: Option<ErrorTerms>,

    /// Free-text notes, persisted with the calibration file.
    pub notes: Vec<String>,

    /// Where this calibration came from (e.g. a file name).
    pub source: String,
}

impl Default for Calibration {
    fn default() -> Calibration {
        Calibration {
            short: vec![],
            open: vec![],
            load: vec![],
            through: vec![],
            isolation: vec![],
            standards: CalStandards::default(),
            terms: None,
            notes: vec![],
            source: "Manual".to_string(),
        }
    }
}

impl Calibration {
    pub fn new() -> Calibration {
        Calibration::default()
    }

    /// Replace one measured dataset with the results of a completed sweep.
    /// No validation happens here; any previously solved terms are dropped.
    pub fn insert(&mut self, set: CalSet, data: Vec<Datapoint>) {
        *self.dataset_mut(set) = data;
        self.terms = None;
    }

    /// The measured dataset for one standard.
    pub fn dataset(&self, set: CalSet) -> &[Datapoint] {
        match set {
            CalSet::Short => &self.short,
            CalSet::Open => &self.open,
            CalSet::Load => &self.load,
            CalSet::Through => &self.through,
            CalSet::Isolation => &self.isolation,
        }
    }

    fn dataset_mut(&mut self, set: CalSet) -> &mut Vec<Datapoint> {
        match set {
            CalSet::Short => &mut self.short,
            CalSet::Open => &mut self.open,
            CalSet::Load => &mut self.load,
            CalSet::Through => &mut self.through,
            CalSet::Isolation => &mut self.isolation,
        }
    }

    pub(crate) fn clear_datasets(&mut self) {
        self.short.clear();
        self.open.clear();
        self.load.clear();
        self.through.clear();
        self.isolation.clear();
        self.terms = None;
    }

    /// The number of frequencies covered by any measured dataset.
    pub fn size(&self) -> usize {
        [&self.short, &self.open, &self.load, &self.through, &self.isolation]
            .into_iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// The number of datapoints measured for one standard.
    pub fn data_size(&self, set: CalSet) -> usize {
        self.dataset(set).len()
    }

    /// All of short, open and load measured, in lockstep.
    pub fn is_valid_1port(&self) -> bool {
        !self.short.is_empty()
            && self.short.len() == self.open.len()
            && self.short.len() == self.load.len()
    }

    /// 1-port validity plus through and isolation measured, in lockstep.
    pub fn is_valid_2port(&self) -> bool {
        self.is_valid_1port()
            && !self.through.is_empty()
            && self.through.len() == self.short.len()
            && self.isolation.len() == self.short.len()
    }

    /// Whether error terms have been solved and corrections can be applied.
    pub fn is_calculated(&self) -> bool {
        self.terms.is_some()
    }

    /// The solved error terms, if `calc_corrections` has succeeded.
    pub fn terms(&self) -> Option<&ErrorTerms> {
        self.terms.as_ref()
    }

    /// Solve for the per-frequency error terms.
    ///
    /// Fails eagerly on missing or length-mismatched standards, and on any
    /// frequency where the three-standard system is singular; on failure no
    /// terms are published and [`Calibration::is_calculated`] stays false.
    pub fn calc_corrections(&mut self) -> Result<(), CalibrationError> {
        self.terms = None;
        if !self.is_valid_1port() {
            warn!("Tried to calibrate from insufficient data.");
            if self.short.is_empty() || self.open.is_empty() || self.load.is_empty() {
                return Err(CalibrationError::Incomplete);
            }
            return Err(CalibrationError::LengthMismatch {
                short: self.short.len(),
                open: self.open.len(),
                load: self.load.len(),
            });
        }
        debug!("Calculating calibration for {} points.", self.short.len());

        let two_port = self.is_valid_2port();
        let (short, open, load) = (&self.short, &self.open, &self.load);
        let (through, isolation) = (&self.through, &self.isolation);
        let standards = &self.standards;

        let solved = (0..short.len())
            .into_par_iter()
            .map(|i| {
                let freq = short[i].freq;
                let g1 = standards.short.gamma(freq);
                let g2 = standards.open.gamma(freq);
                let g3 = standards.load.gamma(freq);

                let gm1 = short[i].gamma();
                let gm2 = open[i].gamma();
                let gm3 = load[i].gamma();

                let denominator = g1 * (g2 - g3) * gm1 + g2 * g3 * gm2
                    - g2 * g3 * gm3
                    - (g2 * gm2 - g3 * gm3) * g1;
                if denominator.norm() == 0.0 {
                    error!(
                        "Division error - did you use the same measurement \
                         for two of short, open and load?"
                    );
                    return Err(CalibrationError::Singular { freq });
                }

                let e00 = -((g2 * gm3 - g3 * gm3) * g1 * gm2
                    - (g2 * g3 * gm2 - g2 * g3 * gm3 - (g3 * gm2 - g2 * gm3) * g1) * gm1)
                    / denominator;
                let e11 = ((g2 - g3) * gm1 - g1 * (gm2 - gm3) + g3 * gm2 - g2 * gm3)
                    / denominator;
                let delta_e = -((g1 * (gm2 - gm3) - g2 * gm2 + g3 * gm3) * gm1
                    + (g2 * gm3 - g3 * gm3) * gm2)
                    / denominator;

                let (e30, e10e32) = if two_port {
                    let e30 = isolation[i].gamma();
                    let mut s21m = through[i].gamma();
                    if standards.through != ThroughStandard::Ideal {
                        // Divide out the through's modeled electrical length
                        // before deriving transmission tracking.
                        s21m /= standards.through.gamma(freq);
                    }
                    (e30, (s21m - e30) * (1.0 - e11 * e11))
                } else {
                    (c64::zero(), c64::zero())
                };

                Ok((freq, e00, e11, delta_e, e30, e10e32))
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;

        let mut terms = ErrorTerms::default();
        for (freq, e00, e11, delta_e, e30, e10e32) in solved {
            terms.freqs.push(freq);
            terms.e00.push(e00);
            terms.e11.push(e11);
            terms.delta_e.push(delta_e);
            terms.e30.push(e30);
            terms.e10e32.push(e10e32);
        }
        self.terms = Some(terms);
        debug!("Calibration correctly calculated.");
        Ok(())
    }

    /// Correct a raw S11 measurement using the error terms at the nearest
    /// solved frequency (nearest only; never interpolated).
    ///
    /// # Panics
    ///
    /// Panics if called before a successful `calc_corrections`; that is a
    /// programming error in the caller, not a recoverable condition.
    pub fn correct11(&self, dp: &Datapoint) -> Datapoint {
        let terms = self
            .terms
            .as_ref()
            .expect("correct11 called before calc_corrections succeeded");
        let idx = nearest_index(&terms.freqs, dp.freq);
        let m = dp.gamma();
        let s11 = (m - terms.e00[idx]) / (m * terms.e11[idx] - terms.delta_e[idx]);
        Datapoint::new(dp.freq, s11.re, s11.im)
    }

    /// Correct a raw S21 measurement. The error-term row is the one nearest
    /// the paired S11 datapoint's frequency, so both corrections of one
    /// acquisition always use the same row.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful `calc_corrections`.
    pub fn correct21(&self, dp: &Datapoint, dp11: &Datapoint) -> Datapoint {
        let terms = self
            .terms
            .as_ref()
            .expect("correct21 called before calc_corrections succeeded");
        let idx = nearest_index(&terms.freqs, dp11.freq);
        let s21 = (dp.gamma() - terms.e30[idx]) / terms.e10e32[idx];
        Datapoint::new(dp.freq, s21.re, s21.im)
    }
}

/// Rotate a datapoint by the phase of an offset delay \[seconds\]. Reflective
/// paths see the delay twice, transmissive paths once.
pub fn correct_delay(d: &Datapoint, delay: f64, reflect: bool) -> Datapoint {
    let corrected = d.gamma() * standards::delay_rotation(d.freq, delay, reflect);
    Datapoint::new(d.freq, corrected.re, corrected.im)
}

/// Index of the frequency nearest `target` in an ascending list. Binary
/// search; ties go to the lower frequency.
pub(crate) fn nearest_index(freqs: &[u64], target: u64) -> usize {
    debug_assert!(!freqs.is_empty());
    let i = freqs.partition_point(|&f| f < target);
    if i == 0 {
        return 0;
    }
    if i == freqs.len() {
        return freqs.len() - 1;
    }
    if target - freqs[i - 1] <= freqs[i] - target {
        i - 1
    } else {
        i
    }
}

/// The datapoint whose frequency is nearest `target`.
pub(crate) fn nearest_datapoint(data: &[Datapoint], target: u64) -> &Datapoint {
    let i = data.partition_point(|d| d.freq < target);
    if i == 0 {
        return &data[0];
    }
    if i == data.len() {
        return &data[data.len() - 1];
    }
    if target - data[i - 1].freq <= data[i].freq - target {
        &data[i - 1]
    } else {
        &data[i]
    }
}
