//! Frequency -> optimal bias voltage map, the hand-off between a calibration
//! run and later sweeps.
//!
//! On disk the map is a two-column CSV (`FREQ,V_G`), one row per calibrated
//! frequency. The header is written but not required when loading.

use std::path::Path;

use log::{info, warn};

use crate::error::{Result, SweepError};

/// Frequencies within this distance (GHz) address the same entry.
const FREQUENCY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyVoltageMap {
    entries: Vec<(f64, f64)>,
}

impl FrequencyVoltageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the voltage for `frequency`, keeping insertion order.
    pub fn insert(&mut self, frequency: f64, voltage: f64) {
        match self.position(frequency) {
            Some(i) => self.entries[i].1 = voltage,
            None => self.entries.push((frequency, voltage)),
        }
    }

    pub fn get(&self, frequency: f64) -> Option<f64> {
        self.position(frequency).map(|i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().copied()
    }

    fn position(&self, frequency: f64) -> Option<usize> {
        self.entries
            .iter()
            .position(|(f, _)| (f - frequency).abs() < FREQUENCY_TOLERANCE)
    }

    /// Write every entry to `path`, replacing previous contents.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["FREQ", "V_G"])?;
        for (frequency, voltage) in self.iter() {
            writer.write_record([frequency.to_string(), voltage.to_string()])?;
        }
        writer.flush()?;
        info!("Saved {} calibration entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a map back. Any read or parse failure, or an empty file, is `None`.
    pub fn load(path: &Path) -> Option<Self> {
        match Self::read(path) {
            Ok(map) if map.is_empty() => {
                warn!("Calibration map {} has no entries", path.display());
                None
            }
            Ok(map) => Some(map),
            Err(e) => {
                warn!("Cannot load calibration map {}: {e}", path.display());
                None
            }
        }
    }

    /// [`FrequencyVoltageMap::load`] for callers that cannot proceed without a map.
    pub fn require(path: &Path) -> Result<Self> {
        Self::load(path).ok_or_else(|| {
            SweepError::CalibrationMapUnavailable(format!(
                "no usable calibration at {}; run a calibration first",
                path.display()
            ))
        })
    }

    fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut map = Self::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != 2 {
                return Err(SweepError::Config(format!(
                    "row {}: expected 2 columns, found {}",
                    row + 1,
                    record.len()
                )));
            }
            let parsed = (record[0].parse::<f64>(), record[1].parse::<f64>());
            match parsed {
                (Ok(frequency), Ok(voltage)) if frequency.is_finite() && voltage.is_finite() => {
                    map.insert(frequency, voltage)
                }
                // header
                (Err(_), Err(_)) if row == 0 => continue,
                _ => {
                    return Err(SweepError::Config(format!(
                        "row {}: cannot parse '{},{}'",
                        row + 1,
                        &record[0],
                        &record[1]
                    )));
                }
            }
        }
        Ok(map)
    }
}

impl FromIterator<(f64, f64)> for FrequencyVoltageMap {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (frequency, voltage) in iter {
            map.insert(frequency, voltage);
        }
        map
    }
}
