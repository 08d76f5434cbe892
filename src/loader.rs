//! CSV import.
//!
//! Spectra arrive as wide-format CSV: the first column is the wavelength
//! axis, every further column is one experiment's absorbances, and the
//! header row carries the experiment ids. A column whose values cannot form
//! a valid spectrum is skipped with a warning; structural problems (bad
//! wavelength axis, unparsable cells, duplicate ids) fail the import.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::spectrum::{MetadataValue, SpectralRecord, SpectrumError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{source_name}: {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },
    #[error("{source_name}: need a wavelength column and at least one absorbance column")]
    NotEnoughColumns { source_name: String },
    #[error("{source_name}: row {row}, column '{column}': invalid number '{value}'")]
    InvalidNumber {
        source_name: String,
        row: usize,
        column: String,
        value: String,
    },
    #[error("{source_name}: no usable spectra (every absorbance column was rejected)")]
    NoSpectra { source_name: String },
    #[error("duplicate experiment id '{0}' in batch")]
    DuplicateExperimentId(String),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
}

/// Parse wide-format CSV from any reader. `source_name` labels errors,
/// warnings, and the `source_file` metadata entry.
pub fn parse_csv<R: io::Read>(
    reader: R,
    source_name: &str,
) -> Result<Vec<SpectralRecord>, ImportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| ImportError::Csv {
            source_name: source_name.to_string(),
            source: e,
        })?
        .clone();
    if headers.len() < 2 {
        return Err(ImportError::NotEnoughColumns {
            source_name: source_name.to_string(),
        });
    }

    let n_cols = headers.len();
    let mut wavelengths: Vec<f64> = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); n_cols - 1];

    for (row_idx, result) in rdr.records().enumerate() {
        let row = result.map_err(|e| ImportError::Csv {
            source_name: source_name.to_string(),
            source: e,
        })?;
        // 1-based data row for messages, header excluded
        let row_no = row_idx + 1;

        for col in 0..n_cols {
            let cell = row.get(col).unwrap_or("");
            let value: f64 = cell.parse().map_err(|_| ImportError::InvalidNumber {
                source_name: source_name.to_string(),
                row: row_no,
                column: headers.get(col).unwrap_or("?").to_string(),
                value: cell.to_string(),
            })?;
            if col == 0 {
                wavelengths.push(value);
            } else {
                columns[col - 1].push(value);
            }
        }
    }

    let mut spectra = Vec::with_capacity(columns.len());
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for (i, absorbances) in columns.into_iter().enumerate() {
        let id = headers.get(i + 1).unwrap_or("?").to_string();
        if !seen.insert(id.clone()) {
            return Err(ImportError::DuplicateExperimentId(id));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "source_file".to_string(),
            MetadataValue::String(source_name.to_string()),
        );
        metadata.insert(
            "column_index".to_string(),
            MetadataValue::Integer((i + 1) as i64),
        );

        match SpectralRecord::new(id.clone(), wavelengths.clone(), absorbances, metadata) {
            Ok(record) => spectra.push(record),
            // A bad absorbance column is a per-column problem: warn and keep
            // importing the rest of the file.
            Err(e @ SpectrumError::NonFiniteAbsorbance { .. }) => {
                log::warn!("{source_name}: skipping column '{id}': {e}");
            }
            // Anything else means the shared wavelength axis is unusable.
            Err(e) => return Err(ImportError::Spectrum(e)),
        }
    }

    if spectra.is_empty() {
        return Err(ImportError::NoSpectra {
            source_name: source_name.to_string(),
        });
    }

    log::info!("{source_name}: imported {} spectra", spectra.len());
    Ok(spectra)
}

/// Load one CSV file.
pub fn load_csv(path: &Path) -> Result<Vec<SpectralRecord>, ImportError> {
    let file = File::open(path).map_err(|e| ImportError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("<csv>")
        .to_string();
    parse_csv(io::BufReader::new(file), &name)
}

/// Expand input paths into a deterministic list of CSV files: plain files
/// are taken as-is, directories are walked for `.csv` entries in sorted
/// order.
pub fn collect_csv_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                let supported = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| {
                        crate::SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str())
                    });
                if entry.file_type().is_file() && supported {
                    files.push(p.to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

/// Enforce the batch invariant: every experiment id occurs once.
pub fn check_unique(records: &[SpectralRecord]) -> Result<(), ImportError> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        if !seen.insert(record.experiment_id()) {
            return Err(ImportError::DuplicateExperimentId(
                record.experiment_id().to_string(),
            ));
        }
    }
    Ok(())
}

/// Load every CSV reachable from `paths` into one validated batch.
pub fn load_paths(paths: &[PathBuf]) -> Result<Vec<SpectralRecord>, ImportError> {
    let mut records = Vec::new();
    for file in collect_csv_files(paths) {
        records.extend(load_csv(&file)?);
    }
    check_unique(&records)?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<SpectralRecord>, ImportError> {
        parse_csv(text.as_bytes(), "test.csv")
    }

    #[test]
    fn test_parse_basic_file() {
        let spectra = parse(
            "wavelength,exp1,exp2\n\
             400,0.10,0.30\n\
             410,0.20,0.20\n\
             420,0.15,0.10\n",
        )
        .unwrap();

        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[0].experiment_id(), "exp1");
        assert_eq!(spectra[0].wavelengths(), &[400.0, 410.0, 420.0]);
        assert_eq!(spectra[0].absorbances(), &[0.10, 0.20, 0.15]);
        assert_eq!(spectra[1].experiment_id(), "exp2");
        assert_eq!(
            spectra[1].metadata().get("column_index"),
            Some(&MetadataValue::Integer(2))
        );
        assert_eq!(
            spectra[1].metadata().get("source_file"),
            Some(&MetadataValue::String("test.csv".to_string()))
        );
    }

    #[test]
    fn test_single_column_rejected() {
        let err = parse("wavelength\n400\n410\n").unwrap_err();
        assert!(matches!(err, ImportError::NotEnoughColumns { .. }));
    }

    #[test]
    fn test_invalid_number_carries_context() {
        let err = parse(
            "wavelength,exp1\n\
             400,0.10\n\
             410,abc\n",
        )
        .unwrap_err();
        match err {
            ImportError::InvalidNumber {
                row, column, value, ..
            } => {
                assert_eq!(row, 2);
                assert_eq!(column, "exp1");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nan_column_skipped_others_kept() {
        let spectra = parse(
            "wavelength,bad,good\n\
             400,NaN,0.30\n\
             410,0.20,0.20\n",
        )
        .unwrap();
        assert_eq!(spectra.len(), 1);
        assert_eq!(spectra[0].experiment_id(), "good");
    }

    #[test]
    fn test_every_column_rejected_is_an_error() {
        let err = parse(
            "wavelength,bad\n\
             400,NaN\n\
             410,0.20\n",
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::NoSpectra { .. }));
    }

    #[test]
    fn test_non_increasing_wavelengths_fail_the_file() {
        let err = parse(
            "wavelength,exp1\n\
             410,0.10\n\
             400,0.20\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Spectrum(SpectrumError::NonIncreasingWavelength { .. })
        ));
    }

    #[test]
    fn test_duplicate_column_ids_rejected() {
        let err = parse(
            "wavelength,exp1,exp1\n\
             400,0.10,0.20\n\
             410,0.20,0.30\n",
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::DuplicateExperimentId(id) if id == "exp1"));
    }

    #[test]
    fn test_check_unique_across_batch() {
        let a = parse("wavelength,exp1\n400,0.1\n410,0.2\n").unwrap();
        let b = parse("wavelength,exp1\n400,0.3\n410,0.4\n").unwrap();
        let combined: Vec<SpectralRecord> = a.into_iter().chain(b).collect();
        let err = check_unique(&combined).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateExperimentId(id) if id == "exp1"));
    }
}
