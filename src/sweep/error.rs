// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("A sweep needs at least one segment")]
    NoSegments,

    #[error("A sweep needs at least one point per segment")]
    NoPoints,

    #[error("Sweep range {start} Hz to {end} Hz is invalid; start and end must be positive with start below end")]
    InvalidRange { start: u64, end: u64 },

    #[error("Sweep of {points} x {segments} points over {span} Hz has a stepsize below 1 Hz; the hardware cannot perform it")]
    DegenerateStepsize {
        points: usize,
        segments: usize,
        span: u64,
    },
}
