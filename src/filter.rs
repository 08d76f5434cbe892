//! Filtering of scored results and spectra.
//!
//! A [`FilterSpec`] is plain serializable data: optional wavelength bounds,
//! an optional experiment-id allow-list, and per-algorithm score thresholds.
//! Predicates compose by AND and are evaluated independently per row or
//! record, so applying them in any order yields the same result and applying
//! a spec twice changes nothing.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::scorer::{ScoreRow, ScoredTable};
use crate::spectrum::SpectralRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdDirection {
    /// Keep rows with `score >= bound`.
    AtLeast,
    /// Keep rows with `score <= bound`.
    AtMost,
}

/// A per-algorithm score bound. Undefined scores never pass: degeneracy is
/// not a low score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreThreshold {
    pub algorithm: String,
    pub direction: ThresholdDirection,
    pub bound: f64,
}

impl ScoreThreshold {
    fn accepts(&self, row: &ScoreRow) -> bool {
        let Some(value) = row.score(&self.algorithm).and_then(|s| s.value()) else {
            return false;
        };
        match self.direction {
            ThresholdDirection::AtLeast => value >= self.bound,
            ThresholdDirection::AtMost => value <= self.bound,
        }
    }
}

impl FromStr for ScoreThreshold {
    type Err = String;

    /// Parse `"sam>=0.8"` / `"pearson<=0.2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, direction) = if s.contains(">=") {
            (">=", ThresholdDirection::AtLeast)
        } else if s.contains("<=") {
            ("<=", ThresholdDirection::AtMost)
        } else {
            return Err(format!("expected '<algorithm>>=<bound>' or '<algorithm><=<bound>', got '{s}'"));
        };
        let (algorithm, bound) = s.split_once(op).unwrap();
        let algorithm = algorithm.trim();
        if algorithm.is_empty() {
            return Err(format!("missing algorithm name in '{s}'"));
        }
        let bound: f64 = bound
            .trim()
            .parse()
            .map_err(|_| format!("invalid bound in '{s}'"))?;
        Ok(ScoreThreshold {
            algorithm: algorithm.to_string(),
            direction,
            bound,
        })
    }
}

/// Composable filter over scored tables and spectral records.
/// The default (empty) spec matches everything. An allow-list that is
/// present but empty matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub wavelength_min: Option<f64>,
    pub wavelength_max: Option<f64>,
    pub experiment_ids: Option<BTreeSet<String>>,
    pub thresholds: Vec<ScoreThreshold>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.wavelength_min.is_none()
            && self.wavelength_max.is_none()
            && self.experiment_ids.is_none()
            && self.thresholds.is_empty()
    }

    /// Row-level predicate: id allow-list AND every threshold.
    pub fn matches_row(&self, row: &ScoreRow) -> bool {
        if let Some(ids) = &self.experiment_ids {
            if !ids.contains(&row.experiment_id) {
                return false;
            }
        }
        self.thresholds.iter().all(|t| t.accepts(row))
    }

    /// Reduced table: same reference and columns, fewer rows. Wavelength
    /// bounds do not apply here — score rows carry no wavelengths.
    pub fn apply(&self, table: &ScoredTable) -> ScoredTable {
        ScoredTable {
            reference_id: table.reference_id.clone(),
            algorithms: table.algorithms.clone(),
            rows: table
                .rows
                .iter()
                .filter(|row| self.matches_row(row))
                .cloned()
                .collect(),
        }
    }

    /// Narrow a record set by every active predicate: wavelength restriction
    /// per record, id membership, and score thresholds looked up in `table`.
    /// A threshold that cannot be verified (no table, or no row for the
    /// record) rejects the record.
    pub fn filter_records(
        &self,
        records: &[SpectralRecord],
        table: Option<&ScoredTable>,
    ) -> Vec<SpectralRecord> {
        records
            .iter()
            .filter(|record| {
                if let Some(ids) = &self.experiment_ids {
                    if !ids.contains(record.experiment_id()) {
                        return false;
                    }
                }
                if self.thresholds.is_empty() {
                    return true;
                }
                match table.and_then(|t| t.row(record.experiment_id())) {
                    Some(row) => self.thresholds.iter().all(|t| t.accepts(row)),
                    None => false,
                }
            })
            .map(|record| match (self.wavelength_min, self.wavelength_max) {
                (None, None) => record.clone(),
                (min, max) => restrict_wavelength(
                    record,
                    min.unwrap_or(f64::NEG_INFINITY),
                    max.unwrap_or(f64::INFINITY),
                ),
            })
            .collect()
    }
}

/// New record keeping only samples whose wavelength lies in `[min, max]`
/// (inclusive). An empty result (min > max, or no sample in range) is a
/// valid zero-length record, not an error.
pub fn restrict_wavelength(record: &SpectralRecord, min: f64, max: f64) -> SpectralRecord {
    let mut wavelengths = Vec::new();
    let mut absorbances = Vec::new();
    for (&wl, &a) in record.wavelengths().iter().zip(record.absorbances()) {
        if wl >= min && wl <= max {
            wavelengths.push(wl);
            absorbances.push(a);
        }
    }
    SpectralRecord::from_parts_unchecked(
        record.experiment_id().to_string(),
        wavelengths,
        absorbances,
        record.metadata().clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{Degeneracy, Score};
    use std::collections::BTreeMap;

    fn record(id: &str, wl: &[f64], abs: &[f64]) -> SpectralRecord {
        SpectralRecord::new(id, wl.to_vec(), abs.to_vec(), BTreeMap::new()).unwrap()
    }

    fn row(id: &str, sam: Score) -> ScoreRow {
        let mut scores = BTreeMap::new();
        scores.insert("sam".to_string(), sam);
        ScoreRow {
            experiment_id: id.to_string(),
            scores,
        }
    }

    fn table(rows: Vec<ScoreRow>) -> ScoredTable {
        ScoredTable {
            reference_id: "ref".to_string(),
            algorithms: vec!["sam".to_string()],
            rows,
        }
    }

    fn ids(table: &ScoredTable) -> Vec<&str> {
        table.rows.iter().map(|r| r.experiment_id.as_str()).collect()
    }

    #[test]
    fn test_empty_spec_matches_everything() {
        let t = table(vec![
            row("a", Score::Defined(0.9)),
            row("b", Score::Undefined(Degeneracy::ZeroNorm)),
        ]);
        let spec = FilterSpec::default();
        assert!(spec.is_empty());
        assert_eq!(spec.apply(&t).len(), 2);
    }

    #[test]
    fn test_threshold_at_least() {
        let t = table(vec![
            row("high", Score::Defined(0.95)),
            row("edge", Score::Defined(0.9)),
            row("low", Score::Defined(0.2)),
        ]);
        let spec = FilterSpec {
            thresholds: vec!["sam>=0.9".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(ids(&spec.apply(&t)), vec!["high", "edge"]);
    }

    #[test]
    fn test_threshold_at_most() {
        let t = table(vec![
            row("high", Score::Defined(0.95)),
            row("low", Score::Defined(0.2)),
        ]);
        let spec = FilterSpec {
            thresholds: vec!["sam<=0.5".parse().unwrap()],
            ..Default::default()
        };
        assert_eq!(ids(&spec.apply(&t)), vec!["low"]);
    }

    #[test]
    fn test_undefined_fails_thresholds_in_both_directions() {
        let t = table(vec![row("u", Score::Undefined(Degeneracy::ZeroNorm))]);
        for expr in ["sam>=-1.0", "sam<=1.0"] {
            let spec = FilterSpec {
                thresholds: vec![expr.parse().unwrap()],
                ..Default::default()
            };
            assert!(spec.apply(&t).is_empty(), "{expr} must exclude undefined");
        }
    }

    #[test]
    fn test_allow_list() {
        let t = table(vec![
            row("a", Score::Defined(0.5)),
            row("b", Score::Defined(0.5)),
        ]);
        let spec = FilterSpec {
            experiment_ids: Some(["b".to_string()].into()),
            ..Default::default()
        };
        assert_eq!(ids(&spec.apply(&t)), vec!["b"]);

        // present-but-empty allow-list matches nothing
        let none = FilterSpec {
            experiment_ids: Some(BTreeSet::new()),
            ..Default::default()
        };
        assert!(none.apply(&t).is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let t = table(vec![
            row("a", Score::Defined(0.95)),
            row("b", Score::Defined(0.2)),
        ]);
        let spec = FilterSpec {
            thresholds: vec!["sam>=0.9".parse().unwrap()],
            ..Default::default()
        };
        let once = spec.apply(&t);
        let twice = spec.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_predicate_order_is_immaterial() {
        let records = vec![
            record("a", &[400.0, 410.0, 420.0], &[0.1, 0.2, 0.3]),
            record("b", &[400.0, 410.0, 420.0], &[0.3, 0.2, 0.1]),
            record("c", &[400.0, 410.0, 420.0], &[0.2, 0.2, 0.2]),
        ];
        let t = table(vec![
            row("a", Score::Defined(0.95)),
            row("b", Score::Defined(0.4)),
            row("c", Score::Defined(0.92)),
        ]);

        let combined = FilterSpec {
            wavelength_min: Some(405.0),
            wavelength_max: Some(415.0),
            experiment_ids: Some(["a".to_string(), "b".to_string()].into()),
            thresholds: vec!["sam>=0.9".parse().unwrap()],
        };

        // One pass with everything enabled...
        let all_at_once = combined.filter_records(&records, Some(&t));

        // ...versus three single-predicate passes in a different order.
        let threshold_only = FilterSpec {
            thresholds: combined.thresholds.clone(),
            ..Default::default()
        };
        let ids_only = FilterSpec {
            experiment_ids: combined.experiment_ids.clone(),
            ..Default::default()
        };
        let wavelength_only = FilterSpec {
            wavelength_min: combined.wavelength_min,
            wavelength_max: combined.wavelength_max,
            ..Default::default()
        };
        let staged = wavelength_only.filter_records(
            &ids_only.filter_records(&threshold_only.filter_records(&records, Some(&t)), None),
            None,
        );

        assert_eq!(all_at_once, staged);
        assert_eq!(all_at_once.len(), 1);
        assert_eq!(all_at_once[0].experiment_id(), "a");
        // wavelength restriction applied: only the 410 nm sample survives
        assert_eq!(all_at_once[0].wavelengths(), &[410.0]);
    }

    #[test]
    fn test_restrict_wavelength_inclusive_bounds() {
        let r = record("a", &[400.0, 410.0, 420.0], &[0.1, 0.2, 0.3]);
        let restricted = restrict_wavelength(&r, 405.0, 415.0);
        assert_eq!(restricted.wavelengths(), &[410.0]);
        assert_eq!(restricted.absorbances(), &[0.2]);

        // boundary samples are kept
        let exact = restrict_wavelength(&r, 400.0, 420.0);
        assert_eq!(exact.len(), 3);
    }

    #[test]
    fn test_restrict_wavelength_empty_range_is_empty_record() {
        let r = record("a", &[400.0, 410.0, 420.0], &[0.1, 0.2, 0.3]);

        let inverted = restrict_wavelength(&r, 415.0, 405.0);
        assert!(inverted.is_empty());

        let outside = restrict_wavelength(&r, 500.0, 600.0);
        assert!(outside.is_empty());
        assert_eq!(outside.experiment_id(), "a");
    }

    #[test]
    fn test_threshold_parsing() {
        let t: ScoreThreshold = "sam>=0.8".parse().unwrap();
        assert_eq!(t.algorithm, "sam");
        assert_eq!(t.direction, ThresholdDirection::AtLeast);
        assert!((t.bound - 0.8).abs() < 1e-12);

        let t: ScoreThreshold = "pearson <= -0.25".parse().unwrap();
        assert_eq!(t.direction, ThresholdDirection::AtMost);
        assert!((t.bound + 0.25).abs() < 1e-12);

        assert!("sam=0.8".parse::<ScoreThreshold>().is_err());
        assert!(">=0.8".parse::<ScoreThreshold>().is_err());
        assert!("sam>=abc".parse::<ScoreThreshold>().is_err());
    }

    #[test]
    fn test_spec_round_trips_through_serde() {
        let spec = FilterSpec {
            wavelength_min: Some(405.0),
            wavelength_max: None,
            experiment_ids: Some(["a".to_string()].into()),
            thresholds: vec!["sam>=0.9".parse().unwrap()],
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: FilterSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
