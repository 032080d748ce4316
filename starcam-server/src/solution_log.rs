//! Append-only log of accepted solutions

use std::fs::{File, OpenOptions};
use std::path::Path;

use serde::Serialize;

use crate::error::ServerResult;

/// One accepted solution, as written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolutionRow {
    pub star_count: usize,
    pub ra: f64,
    pub dec: f64,
    pub field_rotation: f64,
    pub pixel_scale: f64,
    pub altitude: f64,
    pub azimuth: f64,
    pub image_rotation: f64,
    pub solve_ms: f64,
}

/// `|`-delimited rows without a header, appended across restarts.
pub struct SolutionLog {
    writer: csv::Writer<File>,
}

impl SolutionLog {
    pub fn open(path: &Path) -> ServerResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .from_writer(file);
        Ok(Self { writer })
    }

    pub fn append(&mut self, row: &SolutionRow) -> ServerResult<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}
