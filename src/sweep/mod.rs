// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sweep configuration and frequency-plan generation.
//!
//! A [`Sweep`] expands a `(start, end, points, segments)` description into
//! per-segment frequency ranges and a concrete list of frequencies. Segment
//! boundaries are linear by default, or log-spaced when the sweep is marked
//! logarithmic; within a segment, steps are always linear.

mod error;

use log::debug;
use strum_macros::{Display, EnumIter, EnumString};

pub use error::SweepError;

/// How a sweep run behaves once all segments have been acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum SweepMode {
    /// One pass over all segments.
    Single,
    /// Loop over the segments until stopped.
    Continuous,
    /// One pass, with each segment read several times and averaged.
    Average,
}

/// User-facing sweep properties that don't change the frequency plan's span.
#[derive(Debug, Clone, PartialEq)]
pub struct Properties {
    pub name: String,
    pub mode: SweepMode,
    /// (number of readings, outliers to discard) when averaging.
    pub averages: (usize, usize),
    /// Log-spaced segment boundaries instead of linear ones.
    pub logarithmic: bool,
}

impl Default for Properties {
    fn default() -> Properties {
        Properties {
            name: String::new(),
            mode: SweepMode::Single,
            averages: (3, 0),
            logarithmic: false,
        }
    }
}

/// One sweep configuration. Validated at construction; the field values are
/// immutable afterwards (the mutable [`Properties`] don't affect validity).
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    start: u64,
    end: u64,
    points: usize,
    segments: usize,
    pub properties: Properties,
}

impl Default for Sweep {
    fn default() -> Sweep {
        Sweep {
            start: 3_600_000,
            end: 30_000_000,
            points: 101,
            segments: 1,
            properties: Properties::default(),
        }
    }
}

impl Sweep {
    pub fn new(
        start: u64,
        end: u64,
        points: usize,
        segments: usize,
        properties: Properties,
    ) -> Result<Sweep, SweepError> {
        if segments == 0 {
            return Err(SweepError::NoSegments);
        }
        if points == 0 {
            return Err(SweepError::NoPoints);
        }
        if start == 0 || end == 0 || end <= start {
            return Err(SweepError::InvalidRange { start, end });
        }
        let sweep = Sweep {
            start,
            end,
            points,
            segments,
            properties,
        };
        // points * segments == 1 would leave the stepsize undefined.
        if points * segments < 2 || sweep.stepsize() < 1 {
            return Err(SweepError::DegenerateStepsize {
                points,
                segments,
                span: sweep.span(),
            });
        }
        debug!("{sweep:?}");
        Ok(sweep)
    }

    /// Sweep start frequency \[Hz\].
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Sweep end frequency \[Hz\].
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Points per segment.
    pub fn points(&self) -> usize {
        self.points
    }

    /// Number of segments.
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// The full swept span \[Hz\].
    pub fn span(&self) -> u64 {
        self.end - self.start
    }

    /// The rounded frequency distance between consecutive points \[Hz\].
    pub fn stepsize(&self) -> u64 {
        (self.span() as f64 / (self.points * self.segments - 1) as f64).round() as u64
    }

    fn exp_factor(&self, index: usize) -> f64 {
        1.0 - ((self.segments + 1 - index) as f64).ln() / ((self.segments + 1) as f64).ln()
    }

    /// The `(start, stop)` frequency range of segment `index` \[Hz\].
    ///
    /// Linear sweeps place segments back to back, one stepsize apart.
    /// Logarithmic sweeps warp the segment boundaries exponentially, which
    /// concentrates resolution at the low end of the span.
    pub fn get_index_range(&self, index: usize) -> (u64, u64) {
        let (start, end) = if self.properties.logarithmic {
            (
                (self.start as f64 + self.span() as f64 * self.exp_factor(index)).round() as u64,
                (self.start as f64 + self.span() as f64 * self.exp_factor(index + 1)).round()
                    as u64,
            )
        } else {
            let start = self.start + (index * self.points) as u64 * self.stepsize();
            (start, start + (self.points - 1) as u64 * self.stepsize())
        };
        debug!("get_index_range({index}) -> ({start}, {end})");
        (start, end)
    }

    /// All `points * segments` frequencies of the plan, in sweep order
    /// \[Hz\]. Restartable; the first value equals the sweep start.
    pub fn get_frequencies(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.segments).flat_map(move |segment| {
            let (start, stop) = self.get_index_range(segment);
            let step = (stop - start) as f64 / self.points as f64;
            (0..self.points).map(move |i| (start as f64 + i as f64 * step).round() as u64)
        })
    }
}
