//! Batch similarity scoring.
//!
//! [`BatchScorer`] compares a reference spectrum against a set of candidates
//! with every requested algorithm, fanning out across a rayon pool and
//! reassembling rows in candidate order. Results are memoized by content:
//! identical (reference, candidates, algorithms) requests return the cached
//! table, and concurrent requests for the same key share one computation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::similarity::{AlgorithmFn, AlgorithmRegistry, Degeneracy, Score};
use crate::spectrum::SpectralRecord;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("no candidate spectra to score")]
    EmptyCandidates,
    #[error("unknown algorithm: '{0}'")]
    UnknownAlgorithm(String),
    #[error("batch scoring cancelled")]
    Cancelled,
}

/// Scores for one candidate, keyed by algorithm name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub experiment_id: String,
    pub scores: BTreeMap<String, Score>,
}

impl ScoreRow {
    pub fn score(&self, algorithm: &str) -> Option<Score> {
        self.scores.get(algorithm).copied()
    }
}

/// All per-candidate, per-algorithm scores for one reference.
/// Rows preserve candidate input order; columns are sorted algorithm names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTable {
    pub reference_id: String,
    pub algorithms: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

impl ScoredTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, experiment_id: &str) -> Option<&ScoreRow> {
        self.rows.iter().find(|r| r.experiment_id == experiment_id)
    }

    /// Best-scoring candidates for one algorithm, descending. Undefined
    /// scores never rank; ties keep input order.
    pub fn top_by(&self, algorithm: &str, n: usize) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .rows
            .iter()
            .filter_map(|row| {
                row.score(algorithm)
                    .and_then(|s| s.value())
                    .map(|v| (row.experiment_id.as_str(), v))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }
}

/// Cooperative cancellation flag, checked between candidates. Monotonic:
/// once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Content-derived cache key: a new reference, candidate set, or algorithm
/// selection always misses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    reference: u64,
    candidates: Vec<u64>,
    algorithms: Vec<String>,
}

/// One cache entry. The slot mutex serializes same-key computations: the
/// first caller computes while later callers block on the lock, then observe
/// the stored table. Distinct keys hold distinct slots and never contend.
type CacheSlot = Arc<Mutex<Option<Arc<ScoredTable>>>>;

pub struct BatchScorer {
    registry: AlgorithmRegistry,
    pool: rayon::ThreadPool,
    cache: Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl BatchScorer {
    /// Build a scorer over `registry` with a dedicated worker pool.
    /// `workers = 0` lets rayon size the pool to the machine.
    pub fn new(registry: AlgorithmRegistry, workers: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap();
        Self {
            registry,
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    /// Mutable registry access. Requires exclusive ownership, so algorithms
    /// cannot be registered while another thread is scoring.
    pub fn registry_mut(&mut self) -> &mut AlgorithmRegistry {
        &mut self.registry
    }

    /// Score every candidate against `reference` with the requested
    /// algorithms.
    ///
    /// The algorithm list is deduplicated and sorted, so request order never
    /// changes the result or the cache key. A candidate on a different
    /// wavelength grid gets a full row of `undefined(grid-mismatch)` cells
    /// instead of aborting the batch.
    pub fn score(
        &self,
        reference: &SpectralRecord,
        candidates: &[SpectralRecord],
        algorithms: &[String],
        cancel: &CancelToken,
    ) -> Result<Arc<ScoredTable>, ScoreError> {
        if candidates.is_empty() {
            return Err(ScoreError::EmptyCandidates);
        }

        let mut names: Vec<String> = algorithms.to_vec();
        names.sort();
        names.dedup();
        let resolved = self.resolve(&names)?;

        let key = CacheKey {
            reference: reference.fingerprint(),
            candidates: candidates.iter().map(|c| c.fingerprint()).collect(),
            algorithms: names.clone(),
        };

        // Brief outer lock to fetch or create the per-key slot.
        let slot: CacheSlot = {
            let mut cache = self.cache.lock();
            cache.entry(key).or_default().clone()
        };

        let mut guard = slot.lock();
        if let Some(table) = guard.as_ref() {
            log::debug!(
                "cache hit: reference '{}', {} candidates",
                reference.experiment_id(),
                candidates.len()
            );
            return Ok(table.clone());
        }

        let table = Arc::new(self.compute(reference, candidates, names, &resolved, cancel)?);
        *guard = Some(table.clone());
        Ok(table)
    }

    /// Drop every cached table. The import layer calls this when new data
    /// replaces the working set.
    pub fn invalidate_cache(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.len();
        cache.clear();
        if dropped > 0 {
            log::info!("score cache invalidated ({dropped} tables dropped)");
        }
    }

    fn resolve(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, Arc<AlgorithmFn>)>, ScoreError> {
        names
            .iter()
            .map(|name| {
                self.registry
                    .get(name)
                    .cloned()
                    .map(|f| (name.clone(), f))
                    .ok_or_else(|| ScoreError::UnknownAlgorithm(name.clone()))
            })
            .collect()
    }

    fn compute(
        &self,
        reference: &SpectralRecord,
        candidates: &[SpectralRecord],
        names: Vec<String>,
        algorithms: &[(String, Arc<AlgorithmFn>)],
        cancel: &CancelToken,
    ) -> Result<ScoredTable, ScoreError> {
        log::info!(
            "scoring {} candidates against '{}' with {} algorithms",
            candidates.len(),
            reference.experiment_id(),
            algorithms.len()
        );

        // Indexed par_iter + collect keeps rows in candidate order no matter
        // which worker finishes first.
        let rows: Option<Vec<ScoreRow>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(score_candidate(reference, candidate, algorithms))
                })
                .collect()
        });

        // The token is monotonic, so a None row always means cancellation.
        let rows = rows.ok_or(ScoreError::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(ScoreError::Cancelled);
        }

        Ok(ScoredTable {
            reference_id: reference.experiment_id().to_string(),
            algorithms: names,
            rows,
        })
    }
}

/// Score one candidate with every algorithm. A wavelength-grid mismatch
/// marks every cell undefined — one bad record must not block the batch.
fn score_candidate(
    reference: &SpectralRecord,
    candidate: &SpectralRecord,
    algorithms: &[(String, Arc<AlgorithmFn>)],
) -> ScoreRow {
    if !candidate.same_grid(reference) {
        log::warn!(
            "'{}' is not on the reference grid ({} vs {} points) — scores undefined",
            candidate.experiment_id(),
            candidate.len(),
            reference.len()
        );
        let scores = algorithms
            .iter()
            .map(|(name, _)| (name.clone(), Score::Undefined(Degeneracy::GridMismatch)))
            .collect();
        return ScoreRow {
            experiment_id: candidate.experiment_id().to_string(),
            scores,
        };
    }

    let scores = algorithms
        .iter()
        .map(|(name, f)| {
            (
                name.clone(),
                f(reference.absorbances(), candidate.absorbances()),
            )
        })
        .collect();

    ScoreRow {
        experiment_id: candidate.experiment_id().to_string(),
        scores,
    }
}
