//! CSV diagnostics stream, one row per control cycle.

use hoverpi_core::{DiagnosticRecord, DiagnosticsSink, Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub struct CsvDiagnostics<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvDiagnostics<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: Write> CsvDiagnostics<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }
}

impl<W: Write> DiagnosticsSink for CsvDiagnostics<W> {
    fn record(&mut self, record: &DiagnosticRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .map_err(|e| Error::Diagnostics(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::Diagnostics(e.to_string()))
    }
}
