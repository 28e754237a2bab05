//! Settings for a shell session.
use std::io;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationTable;
use crate::estimator::{EstimatorFactory, DEFAULT_BACKGROUND_DEGREE, DEFAULT_SEARCH_RADIUS};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// A calibration table file, see [`CalibrationTable`]
    pub calibration_table: Option<PathBuf>,
    /// Command files run at startup, in order
    pub batch_files: Vec<PathBuf>,
    /// Command lines run after the batch files
    pub commands: Vec<String>,
    pub background_degree: usize,
    pub search_radius: f64,
    /// Read commands from standard input once the startup commands are done
    pub interactive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibration_table: None,
            batch_files: Vec::new(),
            commands: Vec::new(),
            background_degree: DEFAULT_BACKGROUND_DEGREE,
            search_radius: DEFAULT_SEARCH_RADIUS,
            interactive: true,
        }
    }
}

impl SessionConfig {
    pub fn factory(&self) -> EstimatorFactory {
        EstimatorFactory::new(self.background_degree, self.search_radius)
    }

    /// Load the calibration table, or an empty one if none is configured
    pub fn load_calibrations(&self) -> io::Result<CalibrationTable> {
        match &self.calibration_table {
            Some(path) => {
                let table = CalibrationTable::load(path)?;
                log::info!("Loaded {} calibrations from {}", table.len(), path.display());
                Ok(table)
            }
            None => Ok(CalibrationTable::new()),
        }
    }
}
