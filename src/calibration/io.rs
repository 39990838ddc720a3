// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing of calibration files.
//!
//! The format is NanoVNA-Saver's plain-text one: `!` lines are free-text
//! notes, `#` lines before the column header are comments, and each data line
//! carries a frequency plus the measured short/open/load (and optionally
//! through/isolation) values.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use log::warn;

use super::{CalSet, Calibration, CalibrationError};
use crate::rftools::Datapoint;

const FILE_HEADER: &str = "# Calibration data for NanoVNA-Saver";
const COLUMN_HEADER: &str =
    "# Hz ShortR ShortI OpenR OpenI LoadR LoadI ThroughR ThroughI IsolationR IsolationI";

impl Calibration {
    /// Write the measured datasets and notes to `path`.
    ///
    /// The through/isolation columns are omitted entirely when the 2-port
    /// data is absent or invalid, rather than padded with zeros.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        if !self.is_valid_1port() {
            return Err(CalibrationError::Incomplete);
        }
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{FILE_HEADER}")?;
        for note in &self.notes {
            writeln!(file, "! {note}")?;
        }
        writeln!(file, "{COLUMN_HEADER}")?;

        let two_port = self.is_valid_2port();
        let (short, open, load) = (
            self.dataset(CalSet::Short),
            self.dataset(CalSet::Open),
            self.dataset(CalSet::Load),
        );
        let (through, isolation) = (
            self.dataset(CalSet::Through),
            self.dataset(CalSet::Isolation),
        );
        for i in 0..short.len() {
            write!(
                file,
                "{} {} {} {} {} {} {}",
                short[i].freq,
                short[i].re,
                short[i].im,
                open[i].re,
                open[i].im,
                load[i].re,
                load[i].im
            )?;
            if two_port {
                write!(
                    file,
                    " {} {} {} {}",
                    through[i].re, through[i].im, isolation[i].re, isolation[i].im
                )?;
            }
            writeln!(file)?;
        }
        Ok(())
    }

    /// Replace this calibration's datasets and notes with the contents of
    /// `path`. Malformed data lines are logged and skipped.
    pub fn load(&mut self, path: &Path) -> Result<(), CalibrationError> {
        self.source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.clear_datasets();
        self.notes.clear();

        let file = BufReader::new(File::open(path)?);
        let mut parsed_header = false;
        for (line_num, line) in file.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if let Some(note) = line.strip_prefix('!') {
                self.notes
                    .push(note.strip_prefix(' ').unwrap_or(note).to_string());
                continue;
            }
            if line.starts_with('#') {
                if !parsed_header && line == COLUMN_HEADER {
                    parsed_header = true;
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if !parsed_header {
                warn!(
                    "Read calibration data without having read the header; line {}: {}",
                    line_num + 1,
                    line
                );
                continue;
            }

            match parse_data_line(line) {
                Some((freq, values)) => {
                    self.dataset_for_load(CalSet::Short)
                        .push(Datapoint::new(freq, values[0], values[1]));
                    self.dataset_for_load(CalSet::Open)
                        .push(Datapoint::new(freq, values[2], values[3]));
                    self.dataset_for_load(CalSet::Load)
                        .push(Datapoint::new(freq, values[4], values[5]));
                    if values.len() == 10 {
                        self.dataset_for_load(CalSet::Through)
                            .push(Datapoint::new(freq, values[6], values[7]));
                        self.dataset_for_load(CalSet::Isolation)
                            .push(Datapoint::new(freq, values[8], values[9]));
                    }
                }
                None => {
                    warn!(
                        "Illegal data in calibration file; line {}: {}",
                        line_num + 1,
                        line
                    );
                }
            }
        }
        Ok(())
    }

    fn dataset_for_load(&mut self, set: CalSet) -> &mut Vec<Datapoint> {
        // `insert` would clear terms each time; during a load the terms are
        // already cleared, so push directly.
        match set {
            CalSet::Short => &mut self.short,
            CalSet::Open => &mut self.open,
            CalSet::Load => &mut self.load,
            CalSet::Through => &mut self.through,
            CalSet::Isolation => &mut self.isolation,
        }
    }
}

/// Parse one data line: a frequency followed by 6 (1-port) or 10 (2-port)
/// floats. Anything else is malformed.
fn parse_data_line(line: &str) -> Option<(u64, Vec<f64>)> {
    let mut fields = line.split_ascii_whitespace();
    let freq = fields.next()?.parse::<u64>().ok()?;
    let values = fields
        .map(|f| f.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .ok()?;
    if values.len() == 6 || values.len() == 10 {
        Some((freq, values))
    } else {
        None
    }
}
