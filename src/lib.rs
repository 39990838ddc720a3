// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Sweep acquisition and SOLT calibration engine for NanoVNA-style vector
network analyzers.

The crate drives frequency sweeps over a serial device driver, averages
repeated readings with outlier truncation, derives 1-port and 2-port
error-correction terms from measured Short/Open/Load/Through/Isolation
standards, and applies those corrections to raw S-parameter data.
 */

pub mod calibration;
pub mod hardware;
pub mod rftools;
pub mod sweep;
pub mod worker;

// Re-exports.
pub use calibration::{CalSet, CalStandards, Calibration, CalibrationError};
pub use hardware::{DeviceError, Selector, VnaDevice};
pub use rftools::Datapoint;
pub use sweep::{Properties, Sweep, SweepError, SweepMode};
pub use worker::{SweepWorker, WorkerControl, WorkerEvent, WorkerState};

/// A double-precision complex number.
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;

/// The reference impedance all reflection coefficients are relative to
/// \[ohms\].
pub const REFERENCE_IMPEDANCE: f64 = 50.0;

/// Speed of light in a vacuum \[metres/second\].
pub(crate) const SPEED_OF_LIGHT: f64 = 299_792_458.0;
