// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can abort a sweep.

use thiserror::Error;

use crate::hardware::{DeviceError, Selector};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(
        "Failed reading {selector} {retries} times.\nData outside expected valid ranges, or in an unexpected format.\n\nYou can disable data validation on the device settings screen."
    )]
    ReadFailed { selector: Selector, retries: usize },

    #[error("Tried and failed to read segment {retries} times. Giving up.")]
    InvalidSegment { retries: usize },

    #[error(transparent)]
    Device(#[from] DeviceError),
}
