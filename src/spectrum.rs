//! Spectral data model.
//!
//! A [`SpectralRecord`] is one measured UV-Vis curve: a strictly increasing
//! wavelength axis, an aligned absorbance vector, and an experiment id that
//! is unique within a batch. Records are validated once at construction and
//! never mutated — preprocessing produces new records.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpectrumError {
    #[error("'{id}': wavelength and absorbance lengths differ ({wavelengths} vs {absorbances})")]
    LengthMismatch {
        id: String,
        wavelengths: usize,
        absorbances: usize,
    },
    #[error("'{id}': a spectrum needs at least 2 samples, got {len}")]
    TooFewSamples { id: String, len: usize },
    #[error("'{id}': wavelengths must be strictly increasing (index {index})")]
    NonIncreasingWavelength { id: String, index: usize },
    #[error("'{id}': non-finite wavelength at index {index}")]
    NonFiniteWavelength { id: String, index: usize },
    #[error("'{id}': non-finite absorbance at index {index}")]
    NonFiniteAbsorbance { id: String, index: usize },
}

/// A single scalar metadata value attached to a spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

/// One measured spectrum. Fields are private: construction goes through
/// [`SpectralRecord::new`], which enforces the data invariants, and nothing
/// mutates a record afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralRecord {
    experiment_id: String,
    wavelengths: Vec<f64>,
    absorbances: Vec<f64>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl SpectralRecord {
    /// Build a validated record.
    ///
    /// Invariants enforced here: equal vector lengths, at least 2 samples,
    /// strictly increasing finite wavelengths, finite absorbances.
    pub fn new(
        experiment_id: impl Into<String>,
        wavelengths: Vec<f64>,
        absorbances: Vec<f64>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Result<Self, SpectrumError> {
        let experiment_id = experiment_id.into();

        if wavelengths.len() != absorbances.len() {
            return Err(SpectrumError::LengthMismatch {
                id: experiment_id,
                wavelengths: wavelengths.len(),
                absorbances: absorbances.len(),
            });
        }
        if wavelengths.len() < 2 {
            return Err(SpectrumError::TooFewSamples {
                id: experiment_id,
                len: wavelengths.len(),
            });
        }
        for (i, &wl) in wavelengths.iter().enumerate() {
            if !wl.is_finite() {
                return Err(SpectrumError::NonFiniteWavelength {
                    id: experiment_id,
                    index: i,
                });
            }
            if i > 0 && wl <= wavelengths[i - 1] {
                return Err(SpectrumError::NonIncreasingWavelength {
                    id: experiment_id,
                    index: i,
                });
            }
        }
        if let Some(i) = absorbances.iter().position(|a| !a.is_finite()) {
            return Err(SpectrumError::NonFiniteAbsorbance {
                id: experiment_id,
                index: i,
            });
        }

        Ok(Self {
            experiment_id,
            wavelengths,
            absorbances,
            metadata,
        })
    }

    /// Build without re-validating. Reserved for operations on already
    /// validated records (wavelength restriction may legitimately produce
    /// fewer than 2 samples, including zero).
    pub(crate) fn from_parts_unchecked(
        experiment_id: String,
        wavelengths: Vec<f64>,
        absorbances: Vec<f64>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Self {
        Self {
            experiment_id,
            wavelengths,
            absorbances,
            metadata,
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn absorbances(&self) -> &[f64] {
        &self.absorbances
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    /// Number of wavelength/absorbance samples.
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// First and last wavelength, or `None` for an empty record.
    pub fn wavelength_range(&self) -> Option<(f64, f64)> {
        match (self.wavelengths.first(), self.wavelengths.last()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    /// Whether `other` was measured on exactly the same wavelength grid.
    pub fn same_grid(&self, other: &SpectralRecord) -> bool {
        self.wavelengths == other.wavelengths
    }

    /// Stable content fingerprint over id, wavelengths, and absorbances.
    /// Equal content yields equal fingerprints across calls, which is what
    /// the scorer's cache keys on.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        self.experiment_id.hash(&mut hasher);
        for &wl in &self.wavelengths {
            wl.to_bits().hash(&mut hasher);
        }
        for &a in &self.absorbances {
            a.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// New record with absorbances scaled by the maximum value.
    /// A non-positive maximum leaves the curve unchanged.
    pub fn normalized(&self) -> SpectralRecord {
        let max = self.absorbances.iter().copied().fold(f64::MIN, f64::max);
        let absorbances = if max > 0.0 {
            self.absorbances.iter().map(|a| a / max).collect()
        } else {
            self.absorbances.clone()
        };
        SpectralRecord {
            experiment_id: self.experiment_id.clone(),
            wavelengths: self.wavelengths.clone(),
            absorbances,
            metadata: self.metadata.clone(),
        }
    }
}

/// Summary statistics over a batch of spectra.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatistics {
    pub total_spectra: usize,
    pub wavelength_min: f64,
    pub wavelength_max: f64,
    /// Mean step of the first spectrum's grid.
    pub wavelength_step: f64,
    pub points_per_spectrum: usize,
    pub absorbance_mean: f64,
    pub absorbance_std: f64,
    pub absorbance_min: f64,
    pub absorbance_max: f64,
}

/// Compute batch statistics. Returns `None` for an empty batch.
pub fn batch_statistics(records: &[SpectralRecord]) -> Option<BatchStatistics> {
    let first = records.first()?;

    let wavelength_min = records
        .iter()
        .filter_map(|r| r.wavelength_range())
        .map(|(lo, _)| lo)
        .fold(f64::INFINITY, f64::min);
    let wavelength_max = records
        .iter()
        .filter_map(|r| r.wavelength_range())
        .map(|(_, hi)| hi)
        .fold(f64::NEG_INFINITY, f64::max);

    let step = if first.len() > 1 {
        let wl = first.wavelengths();
        (wl[wl.len() - 1] - wl[0]) / (wl.len() - 1) as f64
    } else {
        0.0
    };

    let all: Vec<f64> = records
        .iter()
        .flat_map(|r| r.absorbances().iter().copied())
        .collect();
    let n = all.len() as f64;
    let mean = all.iter().sum::<f64>() / n;
    let var = all.iter().map(|a| (a - mean) * (a - mean)).sum::<f64>() / n;

    Some(BatchStatistics {
        total_spectra: records.len(),
        wavelength_min,
        wavelength_max,
        wavelength_step: step,
        points_per_spectrum: first.len(),
        absorbance_mean: mean,
        absorbance_std: var.sqrt(),
        absorbance_min: all.iter().copied().fold(f64::INFINITY, f64::min),
        absorbance_max: all.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, wl: &[f64], abs: &[f64]) -> SpectralRecord {
        SpectralRecord::new(id, wl.to_vec(), abs.to_vec(), BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_valid_record() {
        let r = record("a", &[400.0, 410.0, 420.0], &[0.1, 0.2, 0.15]);
        assert_eq!(r.len(), 3);
        assert_eq!(r.wavelength_range(), Some((400.0, 420.0)));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = SpectralRecord::new(
            "a",
            vec![400.0, 410.0],
            vec![0.1],
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpectrumError::LengthMismatch { .. }));
    }

    #[test]
    fn test_too_few_samples_rejected() {
        let err =
            SpectralRecord::new("a", vec![400.0], vec![0.1], BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SpectrumError::TooFewSamples { .. }));
    }

    #[test]
    fn test_non_increasing_wavelengths_rejected() {
        let err = SpectralRecord::new(
            "a",
            vec![400.0, 400.0, 420.0],
            vec![0.1, 0.2, 0.3],
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SpectrumError::NonIncreasingWavelength { index: 1, .. }
        ));
    }

    #[test]
    fn test_nan_absorbance_rejected() {
        let err = SpectralRecord::new(
            "a",
            vec![400.0, 410.0],
            vec![0.1, f64::NAN],
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SpectrumError::NonFiniteAbsorbance { index: 1, .. }
        ));
    }

    #[test]
    fn test_fingerprint_stable_and_content_sensitive() {
        let a = record("a", &[400.0, 410.0], &[0.1, 0.2]);
        let same = record("a", &[400.0, 410.0], &[0.1, 0.2]);
        let other = record("a", &[400.0, 410.0], &[0.1, 0.3]);
        let renamed = record("b", &[400.0, 410.0], &[0.1, 0.2]);

        assert_eq!(a.fingerprint(), same.fingerprint());
        assert_ne!(a.fingerprint(), other.fingerprint());
        assert_ne!(a.fingerprint(), renamed.fingerprint());
    }

    #[test]
    fn test_same_grid() {
        let a = record("a", &[400.0, 410.0], &[0.1, 0.2]);
        let b = record("b", &[400.0, 410.0], &[0.5, 0.6]);
        let c = record("c", &[400.0, 411.0], &[0.5, 0.6]);
        assert!(a.same_grid(&b));
        assert!(!a.same_grid(&c));
    }

    #[test]
    fn test_normalized_scales_by_max() {
        let r = record("a", &[400.0, 410.0], &[0.5, 2.0]);
        let n = r.normalized();
        assert_eq!(n.absorbances(), &[0.25, 1.0]);
        // original untouched
        assert_eq!(r.absorbances(), &[0.5, 2.0]);
    }

    #[test]
    fn test_normalized_nonpositive_max_is_noop() {
        let r = record("a", &[400.0, 410.0], &[-0.5, -1.0]);
        assert_eq!(r.normalized().absorbances(), r.absorbances());
    }

    #[test]
    fn test_batch_statistics() {
        let a = record("a", &[400.0, 410.0, 420.0], &[0.0, 0.2, 0.4]);
        let b = record("b", &[400.0, 410.0, 420.0], &[0.4, 0.2, 0.0]);
        let stats = batch_statistics(&[a, b]).unwrap();
        assert_eq!(stats.total_spectra, 2);
        assert_eq!(stats.points_per_spectrum, 3);
        assert!((stats.wavelength_step - 10.0).abs() < 1e-12);
        assert!((stats.absorbance_mean - 0.2).abs() < 1e-12);
        assert_eq!(stats.absorbance_min, 0.0);
        assert_eq!(stats.absorbance_max, 0.4);
    }

    #[test]
    fn test_batch_statistics_empty() {
        assert!(batch_statistics(&[]).is_none());
    }
}
