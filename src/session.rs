use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::vmap::FrequencyVoltageMap;

/// Calibration state carried across the operations of one process.
///
/// A sweep uses the calibration made earlier in the same process when there
/// is one, and otherwise falls back to the persisted map.
#[derive(Debug)]
pub struct Session {
    calibration: Option<FrequencyVoltageMap>,
    map_path: PathBuf,
}

impl Session {
    pub fn new(map_path: impl Into<PathBuf>) -> Self {
        Self {
            calibration: None,
            map_path: map_path.into(),
        }
    }

    pub fn map_path(&self) -> &Path {
        &self.map_path
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn record_calibration(&mut self, map: FrequencyVoltageMap) {
        self.calibration = Some(map);
    }

    /// The in-memory calibration, or the persisted one.
    ///
    /// Fails with `CalibrationMapUnavailable` when neither is usable.
    pub fn voltage_map(&self) -> Result<FrequencyVoltageMap> {
        match &self.calibration {
            Some(map) if !map.is_empty() => Ok(map.clone()),
            _ => {
                info!(
                    "No calibration in memory; loading {}",
                    self.map_path.display()
                );
                FrequencyVoltageMap::require(&self.map_path)
            }
        }
    }
}
