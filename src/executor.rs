//! Bounded worker pool for per-observation jobs.
//!
//! Each unit runs on tokio's blocking pool; a semaphore caps how many run at once.
//! A failing unit does not abort the batch: every unit ends up either in
//! [`BatchReport::successes`] or in [`BatchReport::failures`], and the caller
//! decides what a partial batch means.
//!
//! Units share no mutable state. The shared resource is the output filesystem,
//! and each unit only writes below its own staging directory.

use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::layout::ObsidWorkUnit;

/// Aggregate result of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every unit produced a result.
    AllSucceeded { total: usize },
    /// Some units failed.
    Partial { succeeded: usize, total: usize },
}

impl BatchOutcome {
    /// Whether no unit failed.
    pub fn is_complete(&self) -> bool {
        matches!(self, BatchOutcome::AllSucceeded { .. })
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOutcome::AllSucceeded { total } => write!(f, "all {total} units succeeded"),
            BatchOutcome::Partial { succeeded, total } => {
                write!(f, "{succeeded} of {total} units succeeded")
            }
        }
    }
}

/// Per-unit results of one batch, successes sorted by obsid.
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Stage name used in failures and logs.
    pub stage: String,
    /// Units submitted.
    pub total: usize,
    /// Successful units with their results.
    pub successes: Vec<(ObsidWorkUnit, T)>,
    /// One [`CatalogError::UnitFailure`] per failed unit.
    pub failures: Vec<CatalogError>,
}

impl<T> BatchReport<T> {
    /// Summary of the batch.
    pub fn outcome(&self) -> BatchOutcome {
        if self.failures.is_empty() && self.successes.len() == self.total {
            BatchOutcome::AllSucceeded { total: self.total }
        } else {
            BatchOutcome::Partial {
                succeeded: self.successes.len(),
                total: self.total,
            }
        }
    }

    /// Obsids of failed units, sorted.
    pub fn failed_obsids(&self) -> Vec<String> {
        let mut obsids: Vec<String> = self
            .failures
            .iter()
            .filter_map(|e| e.obsid().map(str::to_string))
            .collect();
        obsids.sort();
        obsids
    }
}

/// Runs blocking per-unit jobs with at most `workers` in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// A pool of `workers` slots (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Number of concurrent slots.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` once per `(unit, input)` pair and collects every result.
    ///
    /// Errors and panics inside `job` become `UnitFailure`s naming the unit's
    /// obsid and `stage`; the remaining units keep running.
    pub async fn run<I, T, F>(
        &self,
        stage: &str,
        items: Vec<(ObsidWorkUnit, I)>,
        job: F,
    ) -> BatchReport<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(&ObsidWorkUnit, I) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let total = items.len();
        info!(stage, units = total, workers = self.workers, "starting batch");

        let job = Arc::new(job);
        let mut tasks = JoinSet::new();
        for (unit, input) in items {
            let permits = Arc::clone(&self.permits);
            let job = Arc::clone(&job);
            let stage = stage.to_string();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    let err = CatalogError::unit_failure(&unit.obsid, &stage, "worker pool closed");
                    return (unit, Err(err));
                };
                let worker_unit = unit.clone();
                let result = tokio::task::spawn_blocking(move || job(&worker_unit, input)).await;
                let result = match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(CatalogError::unit_failure(&unit.obsid, &stage, format!("{e:#}"))),
                    Err(e) => Err(CatalogError::unit_failure(&unit.obsid, &stage, e)),
                };
                (unit, result)
            });
        }

        let mut report = BatchReport {
            stage: stage.to_string(),
            total,
            successes: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((unit, Ok(value))) => report.successes.push((unit, value)),
                Ok((unit, Err(e))) => {
                    warn!(obsid = %unit.obsid, stage, error = %e, "unit failed");
                    report.failures.push(e);
                }
                Err(e) => {
                    warn!(stage, error = %e, "worker task lost");
                    report.failures.push(CatalogError::Join(e));
                }
            }
        }
        report.successes.sort_by(|a, b| a.0.cmp(&b.0));

        let outcome = report.outcome();
        if outcome.is_complete() {
            info!(stage, %outcome, "batch finished");
        } else {
            warn!(stage, %outcome, failed = ?report.failed_obsids(), "batch finished with failures");
        }
        report
    }
}
