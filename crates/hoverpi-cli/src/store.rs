//! Gravity calibration records in an append-only, headerless CSV file.

use csv::{ReaderBuilder, Trim, WriterBuilder};
use hoverpi_core::calibration::{AccelTempModel, CalibrationStore, GravityRecord};
use hoverpi_core::{Error, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct CsvCalibrationStore {
    path: PathBuf,
}

impl CsvCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CalibrationStore for CsvCalibrationStore {
    fn append(&mut self, record: &GravityRecord) -> Result<()> {
        let store_error =
            |e: &dyn std::fmt::Display| Error::CalibrationStore(format!("{}: {e}", self.path.display()));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| store_error(&e))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(record).map_err(|e| store_error(&e))?;
        writer.flush().map_err(|e| store_error(&e))?;
        Ok(())
    }
}

/// Every record in a calibration file, oldest first.
pub fn read_records(path: &Path) -> Result<Vec<GravityRecord>> {
    let data_error = |e: csv::Error| Error::CalibrationData(format!("{}: {e}", path.display()));

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .from_path(path)
        .map_err(data_error)?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<GravityRecord>, _>>()
        .map_err(data_error)
}

/// Accelerometer coefficients fitted from `path`, or the built-in ones.
pub fn load_calibration(path: &Path) -> AccelTempModel {
    if !path.exists() {
        info!(path = %path.display(), "no calibration file, using built-in accelerometer coefficients");
        return AccelTempModel::default();
    }

    match read_records(path).and_then(|records| AccelTempModel::fit(&records)) {
        Ok(model) => {
            info!(
                path = %path.display(),
                ax = model.a.x,
                ay = model.a.y,
                az = model.a.z,
                bx = model.b.x,
                by = model.b.y,
                bz = model.b.z,
                "accelerometer coefficients fitted"
            );
            model
        }
        Err(e) => {
            warn!(error = %e, "falling back to built-in accelerometer coefficients");
            AccelTempModel::default()
        }
    }
}
