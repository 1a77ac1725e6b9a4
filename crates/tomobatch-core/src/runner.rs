use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{error, warn};

use crate::aretomo::{StageOutcome, ToolFailure};
use crate::error::{Result, TomoError};

/// Thread-safe progress reporting for catalog construction and batch
/// stages. Implementors drive progress bars or any other feedback; all
/// methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    /// A stage started, with `total` work items.
    fn begin_stage(&self, _label: &str, _total: usize) {}

    /// Worker slot `slot` picked up the named item.
    fn item_started(&self, _slot: usize, _name: &str) {}

    /// Worker slot `slot` is idle again.
    fn item_finished(&self, _slot: usize) {}

    /// One work item completed, whatever its outcome.
    fn advance(&self) {}

    fn finish_stage(&self) {}

    /// Best-effort fractional progress (0.0..=1.0) of a long-running tool,
    /// sampled from its output stream. An estimate, never a completion
    /// signal.
    fn tool_progress(&self, _name: &str, _fraction: f32) {}
}

/// Reporter for headless use and tests.
pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {}

/// Aggregated result of one stage over the whole catalog.
#[derive(Debug, Default)]
pub struct StageReport {
    pub completed: usize,
    pub skipped_existing: usize,
    pub failures: Vec<ToolFailure>,
}

impl StageReport {
    /// How many failed command/output pairs are reported in full.
    const DETAILED_FAILURES: usize = 5;

    pub fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Success => self.completed += 1,
            StageOutcome::AlreadyExists => self.skipped_existing += 1,
            StageOutcome::ToolFailure(failure) => self.failures.push(failure),
        }
    }

    /// Per-stage summary: skipped-existing count plus the first few failed
    /// command lines with their captured output.
    pub fn log_summary(&self, label: &str) {
        if self.skipped_existing > 0 {
            warn!(
                "{label}: {} files already exist and were not overwritten",
                self.skipped_existing
            );
        }
        if self.failures.is_empty() {
            return;
        }
        error!("{label}: {} commands have failed:", self.failures.len());
        for failure in self.failures.iter().take(Self::DETAILED_FAILURES) {
            error!("{} failed with:\n{}", failure.command, failure.output);
        }
        if self.failures.len() > Self::DETAILED_FAILURES {
            error!(
                "... and {} more",
                self.failures.len() - Self::DETAILED_FAILURES
            );
        }
    }
}

/// Default worker count for stages not bound to GPUs.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() + 4)
        .unwrap_or(4)
        .min(32)
}

/// Run `job` once per item on a dedicated pool of `workers` threads.
///
/// Failures are isolated: a failing item degrades the report, never the
/// rest of the batch. A job returning `Err` is recorded as a failure for
/// that item alone. Completion order is concurrency-determined; the
/// summary is logged once every item has finished.
pub fn run_batch<T, N, F>(
    items: &[T],
    workers: usize,
    label: &str,
    reporter: &dyn ProgressReporter,
    name_of: N,
    job: F,
) -> Result<StageReport>
where
    T: Sync,
    N: Fn(&T) -> &str + Sync,
    F: Fn(&T) -> Result<StageOutcome> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| TomoError::Config(format!("could not start worker pool: {e}")))?;

    reporter.begin_stage(label, items.len());
    let report = Mutex::new(StageReport::default());

    pool.install(|| {
        items.par_iter().for_each(|item| {
            let slot = rayon::current_thread_index().unwrap_or(0);
            let name = name_of(item);
            reporter.item_started(slot, name);

            let outcome = job(item).unwrap_or_else(|err| {
                StageOutcome::ToolFailure(ToolFailure {
                    command: name.to_owned(),
                    output: err.to_string(),
                    exit_code: None,
                })
            });

            report
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .record(outcome);
            reporter.item_finished(slot);
            reporter.advance();
        });
    });

    reporter.finish_stage();
    let report = report
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    report.log_summary(label);
    Ok(report)
}
