//! Append-only CSV result logs written while a run progresses.
//!
//! Rows are flushed as they are appended so that a fatal error part way
//! through a run still leaves every completed measurement on disk.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::info;

use crate::error::{Result, SweepError};

pub const CALIBRATION_HEADER: [&str; 3] = ["FREQ", "V_G", "MEAS_PWR"];
/// Trace samples, when captured, follow `MEAS_PWR` on the same row.
pub const SWEEP_HEADER: [&str; 4] = ["FREQ", "SWEEP_FREQ", "V_G", "MEAS_PWR"];
pub const FLUCTUATION_HEADER: [&str; 2] = ["NUM", "MEAS_POWER"];

pub struct ResultLog<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl ResultLog<File> {
    pub fn create(path: &Path, header: &[&str]) -> Result<Self> {
        info!("Recording results to {}", path.display());
        Self::new(File::create(path)?, header)
    }
}

impl<W: Write> ResultLog<W> {
    pub fn new(sink: W, header: &[&str]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(sink);
        writer.write_record(header)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append<I, T>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(fields)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows appended so far (header excluded).
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SweepError::Io(e.into_error()))
    }
}
