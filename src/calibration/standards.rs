// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Models of the SOLT calibration standards.
//!
//! Each standard is either ideal, described by polynomial coefficients (the
//! Keysight-style data-sheet model, see <https://arxiv.org/pdf/1606.02446.pdf>
//! (18)-(21)), or backed by a reference measurement. Every variant produces a
//! modeled reflection coefficient Γ(f).

use std::f64::consts::TAU;

use crate::{c64, rftools::Datapoint, REFERENCE_IMPEDANCE};

use super::nearest_datapoint;

pub(crate) const IDEAL_SHORT: c64 = c64::new(-1.0, 0.0);
pub(crate) const IDEAL_OPEN: c64 = c64::new(1.0, 0.0);
pub(crate) const IDEAL_LOAD: c64 = c64::new(0.0, 0.0);
pub(crate) const IDEAL_THROUGH: c64 = c64::new(1.0, 0.0);

/// The phase rotation introduced by a standard's offset delay \[seconds\].
///
/// Reflective standards see the electrical length twice (out and back), so
/// their rotation carries a factor of 2; the transmissive through sees it
/// once. Changing either factor silently breaks the through correction.
pub(crate) fn delay_rotation(freq: u64, delay: f64, reflect: bool) -> c64 {
    let mult = if reflect { 2.0 } else { 1.0 };
    c64::new(0.0, -TAU * freq as f64 * delay * mult).exp()
}

fn impedance_to_gamma(z: c64) -> c64 {
    (z / REFERENCE_IMPEDANCE - 1.0) / (z / REFERENCE_IMPEDANCE + 1.0)
}

/// The short standard.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ShortStandard {
    /// Γ = -1.
    #[default]
    Ideal,
    /// Inductance polynomial L(f) = l0 + l1·f + l2·f² + l3·f³ plus an offset
    /// delay \[seconds\].
    Inductance {
        l0: f64,
        l1: f64,
        l2: f64,
        l3: f64,
        offset_delay: f64,
    },
    /// A reference measurement of the standard; looked up by nearest
    /// frequency.
    File(Vec<Datapoint>),
}

impl ShortStandard {
    /// The coefficient model with the data-sheet defaults NanoVNA-Saver
    /// ships.
    pub fn default_inductance() -> ShortStandard {
        ShortStandard::Inductance {
            l0: 5.7e-12,
            l1: -8.96e-20,
            l2: -1.1e-29,
            l3: -4.12e-37,
            offset_delay: -34.2e-12,
        }
    }

    /// The modeled reflection coefficient at `freq`.
    pub fn gamma(&self, freq: u64) -> c64 {
        match self {
            ShortStandard::Ideal => IDEAL_SHORT,
            ShortStandard::Inductance {
                l0,
                l1,
                l2,
                l3,
                offset_delay,
            } => {
                let f = freq as f64;
                let zsp = c64::new(0.0, TAU * f * (l0 + l1 * f + l2 * f * f + l3 * f * f * f));
                impedance_to_gamma(zsp) * delay_rotation(freq, *offset_delay, true)
            }
            ShortStandard::File(data) => nearest_datapoint(data, freq).gamma(),
        }
    }
}

/// The open standard.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OpenStandard {
    /// Γ = +1.
    #[default]
    Ideal,
    /// Fringing-capacitance polynomial C(f) = c0 + c1·f + c2·f² + c3·f³ plus
    /// an offset delay \[seconds\].
    Capacitance {
        c0: f64,
        c1: f64,
        c2: f64,
        c3: f64,
        offset_delay: f64,
    },
    /// A reference measurement of the standard; looked up by nearest
    /// frequency.
    File(Vec<Datapoint>),
}

impl OpenStandard {
    /// The coefficient model with the data-sheet defaults NanoVNA-Saver
    /// ships.
    pub fn default_capacitance() -> OpenStandard {
        OpenStandard::Capacitance {
            c0: 2.1e-14,
            c1: 5.67e-23,
            c2: -2.39e-31,
            c3: 2.0e-40,
            offset_delay: 0.0,
        }
    }

    /// The modeled reflection coefficient at `freq`.
    pub fn gamma(&self, freq: u64) -> c64 {
        match self {
            OpenStandard::Ideal => IDEAL_OPEN,
            OpenStandard::Capacitance {
                c0,
                c1,
                c2,
                c3,
                offset_delay,
            } => {
                let f = freq as f64;
                let divisor = TAU * f * (c0 + c1 * f + c2 * f * f + c3 * f * f * f);
                // A zero capacitance term leaves the open unmodeled; fall
                // back to the ideal rather than divide by zero.
                if divisor == 0.0 {
                    return IDEAL_OPEN;
                }
                let zop = c64::new(0.0, -1.0) / divisor;
                impedance_to_gamma(zop) * delay_rotation(freq, *offset_delay, true)
            }
            OpenStandard::File(data) => nearest_datapoint(data, freq).gamma(),
        }
    }
}

/// The load standard.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadStandard {
    /// Γ = 0.
    #[default]
    Ideal,
    /// A resistance with an optional parallel capacitance, a series parasitic
    /// inductance, and an offset delay \[seconds\].
    Network {
        resistance: f64,
        inductance: f64,
        capacitance: f64,
        offset_delay: f64,
    },
    /// A reference measurement of the standard; looked up by nearest
    /// frequency.
    File(Vec<Datapoint>),
}

impl LoadStandard {
    /// The modeled reflection coefficient at `freq`.
    pub fn gamma(&self, freq: u64) -> c64 {
        match self {
            LoadStandard::Ideal => IDEAL_LOAD,
            LoadStandard::Network {
                resistance,
                inductance,
                capacitance,
                offset_delay,
            } => {
                let omega = TAU * freq as f64;
                let mut zl = c64::new(*resistance, 0.0);
                if *capacitance > 0.0 {
                    // Parallel RC, then the series inductance.
                    zl = *resistance / c64::new(1.0, omega * capacitance * resistance);
                }
                zl += c64::new(0.0, omega * inductance);
                impedance_to_gamma(zl) * delay_rotation(freq, *offset_delay, true)
            }
            LoadStandard::File(data) => nearest_datapoint(data, freq).gamma(),
        }
    }
}

/// The through standard.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ThroughStandard {
    /// An identity connection; no correction.
    #[default]
    Ideal,
    /// A pure electrical length, applied as a one-way phase rotation.
    Delay { offset_delay: f64 },
}

impl ThroughStandard {
    /// The modeled transmission coefficient at `freq`.
    pub fn gamma(&self, freq: u64) -> c64 {
        match self {
            ThroughStandard::Ideal => IDEAL_THROUGH,
            ThroughStandard::Delay { offset_delay } => {
                delay_rotation(freq, *offset_delay, false)
            }
        }
    }
}

/// The four calibration-standard models used when solving for error terms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalStandards {
    pub short: ShortStandard,
    pub open: OpenStandard,
    pub load: LoadStandard,
    pub through: ThroughStandard,
}
