//! Similarity algorithms and the algorithm registry.
//!
//! Every algorithm is a pure function over two equal-length absorbance
//! vectors. Numeric degeneracy (zero norm, zero variance) is data, not an
//! error: it produces a [`Score::Undefined`] cell that stays distinguishable
//! from any valid numeric score, in memory and when exported.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Guard against rounding noise: squared norms / squared deviations below
/// this are treated as zero.
const EPS: f64 = 1e-12;

/// Why an algorithm could not produce a score for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Degeneracy {
    /// One of the vectors has zero magnitude (all-zero absorbances).
    ZeroNorm,
    /// One of the vectors is constant, so correlation is undefined.
    ZeroVariance,
    /// The candidate was not measured on the reference wavelength grid.
    GridMismatch,
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Degeneracy::ZeroNorm => "zero-norm",
            Degeneracy::ZeroVariance => "zero-variance",
            Degeneracy::GridMismatch => "grid-mismatch",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one algorithm on one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Score {
    Defined(f64),
    Undefined(Degeneracy),
}

impl Score {
    pub fn value(&self) -> Option<f64> {
        match self {
            Score::Defined(v) => Some(*v),
            Score::Undefined(_) => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Score::Defined(_))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Defined(v) => write!(f, "{v:.6}"),
            Score::Undefined(reason) => write!(f, "undefined({reason})"),
        }
    }
}

/// A similarity algorithm: pure, deterministic, O(N) in vector length.
/// Both slices are guaranteed equal-length by the batch scorer.
pub type AlgorithmFn = dyn Fn(&[f64], &[f64]) -> Score + Send + Sync;

/// Spectral Angle Mapper: angle between the two vectors in N-space,
/// mapped to [0, 1] via `1 − θ/π`.
pub fn spectral_angle(a: &[f64], b: &[f64]) -> Score {
    let (dot, norm_a_sq, norm_b_sq) = dot_and_norms(a, b);
    if norm_a_sq < EPS || norm_b_sq < EPS {
        return Score::Undefined(Degeneracy::ZeroNorm);
    }
    // Clamp before acos: rounding can push |cos| past 1.
    let cos = (dot / (norm_a_sq.sqrt() * norm_b_sq.sqrt())).clamp(-1.0, 1.0);
    let theta = cos.acos();
    Score::Defined(1.0 - theta / std::f64::consts::PI)
}

/// Cosine similarity in [−1, 1].
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Score {
    let (dot, norm_a_sq, norm_b_sq) = dot_and_norms(a, b);
    if norm_a_sq < EPS || norm_b_sq < EPS {
        return Score::Undefined(Degeneracy::ZeroNorm);
    }
    Score::Defined((dot / (norm_a_sq.sqrt() * norm_b_sq.sqrt())).clamp(-1.0, 1.0))
}

/// Sample Pearson correlation coefficient in [−1, 1].
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Score {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0_f64;
    let mut var_a = 0.0_f64;
    let mut var_b = 0.0_f64;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a < EPS || var_b < EPS {
        return Score::Undefined(Degeneracy::ZeroVariance);
    }
    Score::Defined((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

fn dot_and_norms(a: &[f64], b: &[f64]) -> (f64, f64, f64) {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    (dot, norm_a, norm_b)
}

/// The algorithms shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAlgorithm {
    Sam,
    Cosine,
    Pearson,
}

impl BuiltinAlgorithm {
    pub const ALL: [BuiltinAlgorithm; 3] = [
        BuiltinAlgorithm::Sam,
        BuiltinAlgorithm::Cosine,
        BuiltinAlgorithm::Pearson,
    ];

    /// Canonical registry name.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinAlgorithm::Sam => "sam",
            BuiltinAlgorithm::Cosine => "cosine",
            BuiltinAlgorithm::Pearson => "pearson",
        }
    }

    fn function(&self) -> Arc<AlgorithmFn> {
        match self {
            BuiltinAlgorithm::Sam => Arc::new(spectral_angle),
            BuiltinAlgorithm::Cosine => Arc::new(cosine_similarity),
            BuiltinAlgorithm::Pearson => Arc::new(pearson_correlation),
        }
    }
}

/// Named similarity functions. Built-ins are pre-registered; callers can add
/// or replace algorithms by name without touching the scorer's dispatch.
///
/// Reads take `&self` and registration takes `&mut self`, so registration is
/// forced to happen before the registry is shared with concurrent scoring.
pub struct AlgorithmRegistry {
    algorithms: BTreeMap<String, Arc<AlgorithmFn>>,
}

impl AlgorithmRegistry {
    /// Registry with SAM, cosine, and Pearson pre-registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for builtin in BuiltinAlgorithm::ALL {
            registry.register(builtin.name(), builtin.function());
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            algorithms: BTreeMap::new(),
        }
    }

    /// Register an algorithm under a name. Last write wins.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<AlgorithmFn>) {
        let name = name.into();
        if self.algorithms.insert(name.clone(), function).is_some() {
            log::debug!("algorithm '{name}' replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AlgorithmFn>> {
        self.algorithms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.algorithms.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.algorithms.keys().cloned().collect()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
