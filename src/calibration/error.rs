// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all calibration-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("All of short, open and load calibration steps must be completed for calibration to be applied")]
    Incomplete,

    #[error("The short, open and load datasets have mismatched lengths (short: {short}, open: {open}, load: {load}); they must be measured with the same sweep")]
    LengthMismatch {
        short: usize,
        open: usize,
        load: usize,
    },

    #[error("Two of short, open and load returned the same values at frequency {freq} Hz. Did you measure the same standard twice, or swap two standards?")]
    Singular { freq: u64 },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
