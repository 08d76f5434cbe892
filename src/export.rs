//! Export of scored tables and spectra.
//!
//! The scored table serializes to delimited or JSON form with undefined
//! scores kept as tagged text (`undefined(zero-norm)`), never as a numeric
//! stand-in.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;

use crate::scorer::ScoredTable;
use crate::spectrum::SpectralRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON write error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("spectra must share a wavelength grid to export as one table ('{0}' differs)")]
    GridMismatch(String),
    #[error("nothing to export")]
    Empty,
}

/// Scored table as CSV: `experiment_id` plus one column per algorithm.
pub fn write_table_csv<W: Write>(table: &ScoredTable, writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["experiment_id".to_string()];
    header.extend(table.algorithms.iter().cloned());
    wtr.write_record(&header)?;

    for row in &table.rows {
        let mut record = vec![row.experiment_id.clone()];
        for algorithm in &table.algorithms {
            record.push(
                row.score(algorithm)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Scored table as pretty JSON with tagged score values.
pub fn write_table_json<W: Write>(table: &ScoredTable, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, table)?;
    Ok(())
}

/// Spectra as wide CSV (wavelength column + one column per experiment).
/// Requires every record to share the first record's grid.
pub fn write_records_csv<W: Write>(
    records: &[SpectralRecord],
    writer: W,
) -> Result<(), ExportError> {
    let first = records.first().ok_or(ExportError::Empty)?;
    for record in &records[1..] {
        if !record.same_grid(first) {
            return Err(ExportError::GridMismatch(
                record.experiment_id().to_string(),
            ));
        }
    }

    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["wavelength".to_string()];
    header.extend(records.iter().map(|r| r.experiment_id().to_string()));
    wtr.write_record(&header)?;

    for (i, &wl) in first.wavelengths().iter().enumerate() {
        let mut row = vec![wl.to_string()];
        row.extend(records.iter().map(|r| r.absorbances()[i].to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Spectra as pretty JSON records.
pub fn write_records_json<W: Write>(
    records: &[SpectralRecord],
    writer: W,
) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, records)?;
    Ok(())
}

/// Timestamped default output path, e.g. `similarity_20240131_093000.csv`.
pub fn default_output_path(dir: &Path, prefix: &str, format: ExportFormat) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{prefix}_{stamp}.{}", format.extension()))
}

/// Write a scored table to `path` in the given format.
pub fn export_table(
    table: &ScoredTable,
    path: &Path,
    format: ExportFormat,
) -> Result<(), ExportError> {
    let file = File::create(path)?;
    match format {
        ExportFormat::Csv => write_table_csv(table, file),
        ExportFormat::Json => write_table_json(table, file),
    }
}
