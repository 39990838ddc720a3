// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The measurement value type and derived RF quantities.


use std::f64::consts::TAU;

use crate::{c64, SPEED_OF_LIGHT};

/// One S-parameter sample: a complex reflection or transmission coefficient
/// at a frequency.
///
/// Derived quantities (impedance, VSWR, gain, ...) are computed on demand,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Frequency \[Hz\].
    pub freq: u64,
    /// Real part of the S-parameter.
    pub re: f64,
    /// Imaginary part of the S-parameter.
    pub im: f64,
}

impl Datapoint {
    pub fn new(freq: u64, re: f64, im: f64) -> Datapoint {
        Datapoint { freq, re, im }
    }

    /// The sample as a complex reflection/transmission coefficient Γ.
    pub fn gamma(&self) -> c64 {
        c64::new(self.re, self.im)
    }

    /// Phase of Γ \[radians\].
    pub fn phase(&self) -> f64 {
        self.gamma().arg()
    }

    /// |Γ| in dB. Meaningful for transmission datapoints.
    pub fn gain(&self) -> f64 {
        let mag = self.gamma().norm();
        if mag > 0.0 {
            20.0 * mag.log10()
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Voltage standing wave ratio. Unbounded as |Γ| approaches 1.
    pub fn vswr(&self) -> f64 {
        let mag = self.gamma().norm();
        if mag < 1.0 {
            (1.0 + mag) / (1.0 - mag)
        } else {
            f64::INFINITY
        }
    }

    /// Free-space wavelength \[metres\].
    pub fn wavelength(&self) -> f64 {
        if self.freq == 0 {
            f64::INFINITY
        } else {
            SPEED_OF_LIGHT / self.freq as f64
        }
    }

    /// The impedance seen at the port, relative to `ref_impedance`.
    pub fn impedance(&self, ref_impedance: f64) -> c64 {
        gamma_to_impedance(self.gamma(), ref_impedance)
    }

    /// Impedance of the sample interpreted as a shunt element across a
    /// through connection.
    pub fn shunt_impedance(&self, ref_impedance: f64) -> c64 {
        let g = self.gamma();
        let div = 1.0 - g;
        if div.norm() == 0.0 {
            return c64::new(f64::INFINITY, f64::INFINITY);
        }
        0.5 * ref_impedance * g / div
    }

    /// Impedance of the sample interpreted as a series element in a through
    /// connection.
    pub fn series_impedance(&self, ref_impedance: f64) -> c64 {
        let g = self.gamma();
        if g.norm() == 0.0 {
            return c64::new(f64::INFINITY, f64::INFINITY);
        }
        2.0 * ref_impedance * (1.0 - g) / g
    }

    /// Q factor of the impedance at this point. -1 when purely reactive.
    pub fn q_factor(&self, ref_impedance: f64) -> f64 {
        let imp = self.impedance(ref_impedance);
        if imp.re == 0.0 {
            -1.0
        } else {
            (imp.im / imp.re).abs()
        }
    }

    /// Equivalent series capacitance \[farads\].
    pub fn capacitive_equivalent(&self, ref_impedance: f64) -> f64 {
        impedance_to_capacitance(self.impedance(ref_impedance), self.freq as f64)
    }

    /// Equivalent series inductance \[henries\].
    pub fn inductive_equivalent(&self, ref_impedance: f64) -> f64 {
        impedance_to_inductance(self.impedance(ref_impedance), self.freq as f64)
    }
}

/// Calculate impedance from a reflection coefficient.
pub fn gamma_to_impedance(gamma: c64, ref_impedance: f64) -> c64 {
    let div = gamma - 1.0;
    if div.norm() == 0.0 {
        return c64::new(f64::INFINITY, f64::INFINITY);
    }
    (-gamma - 1.0) / div * ref_impedance
}

/// Calculate the reflection coefficient of an impedance.
pub fn reflection_coefficient(z: c64, ref_impedance: f64) -> c64 {
    (z - ref_impedance) / (z + ref_impedance)
}

/// Capacitive equivalent of a reactance \[farads\].
pub fn impedance_to_capacitance(z: c64, freq: f64) -> f64 {
    if freq == 0.0 {
        return f64::NEG_INFINITY;
    }
    if z.im == 0.0 {
        f64::INFINITY
    } else {
        -1.0 / (TAU * freq * z.im)
    }
}

/// Inductive equivalent of a reactance \[henries\].
pub fn impedance_to_inductance(z: c64, freq: f64) -> f64 {
    if freq == 0.0 {
        0.0
    } else {
        z.im / (TAU * freq)
    }
}

/// Group delay at `index` \[seconds\], from the phase slope of neighbouring
/// datapoints (clamped at the ends of the sweep).
pub fn group_delay(data: &[Datapoint], index: usize) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let last = data.len() - 1;
    let idx0 = index.saturating_sub(1);
    let idx1 = (index + 1).min(last);
    let delta_angle = data[idx1].phase() - data[idx0].phase();
    let delta_freq = data[idx1].freq as f64 - data[idx0].freq as f64;
    if delta_freq == 0.0 {
        0.0
    } else {
        -delta_angle / TAU / delta_freq
    }
}

/// Undo a known flat attenuation \[dB\] on S21 data.
pub fn corr_att_data(data: &[Datapoint], att: f64) -> Vec<Datapoint> {
    if att <= 0.0 {
        return data.to_vec();
    }
    let factor = 10_f64.powf(att / 20.0);
    data.iter()
        .map(|dp| {
            let corrected = dp.gamma() * factor;
            Datapoint::new(dp.freq, corrected.re, corrected.im)
        })
        .collect()
}
