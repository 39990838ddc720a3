// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The contract a VNA device driver must satisfy.
//!
//! Concrete drivers (serial, USB, simulators) live outside this crate; the
//! sweep worker only needs the small read/write surface below.

use strum_macros::Display;
use thiserror::Error;

use crate::c64;

/// Which measurement array to read from the device. The display form is the
/// literal selector sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Selector {
    /// Reflection (S11).
    #[strum(serialize = "data 0")]
    S11,
    /// Transmission (S21).
    #[strum(serialize = "data 1")]
    S21,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("The device is not connected")]
    NotConnected,

    #[error("Malformed response from the device: {0}")]
    BadResponse(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// A connected VNA device.
///
/// Every call may block on serial I/O; none of these methods should be called
/// from a UI thread.
pub trait VnaDevice {
    fn connected(&self) -> bool;

    /// Configure the device to sweep `start..=stop` Hz.
    fn set_sweep(&mut self, start: u64, stop: u64) -> Result<(), DeviceError>;

    /// The frequencies of the configured sweep \[Hz\]. The length matches the
    /// device's per-segment point count.
    fn read_frequencies(&mut self) -> Result<Vec<u64>, DeviceError>;

    /// Raw complex values for the selected measurement array.
    fn read_values(&mut self, selector: Selector) -> Result<Vec<c64>, DeviceError>;

    /// Reset the device display to the given full range after a multi-segment
    /// sweep.
    fn reset_sweep(&mut self, start: u64, stop: u64) -> Result<(), DeviceError>;

    /// Drop and re-establish the connection; used between read retries.
    fn reconnect(&mut self) -> Result<(), DeviceError>;

    /// Whether read values should be checked against the plausibility
    /// threshold.
    fn validate_input(&self) -> bool {
        true
    }
}
