//! Parallel chunk processing.
//!
//! The [`ChunkOrchestrator`] sits between the chunked reader ([`crate::ingestion`]) and the
//! output writer and provides:
//!
//! - a fixed-size worker pool applying a [`RuleSet`] to each chunk
//! - backpressure (a bound on in-flight chunks)
//! - per-chunk failure isolation
//! - real-time metrics + observer hooks for monitoring
//!
//! Each task works on its own chunk with its own compiled copy of the rules; the only shared
//! state is the immutable `Arc<RuleSet>`.

mod observer;
mod semaphore;

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use thiserror::Error;

use crate::error::{PipelineError, PipelineResult};
use crate::rules::RuleSet;
use crate::types::DataChunk;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver,
    TracingExecutionObserver,
};

use semaphore::Semaphore;

/// Configuration for the [`ChunkOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Number of worker threads.
    pub num_workers: usize,
    /// Upper bound on chunks submitted but not yet finished.
    ///
    /// Submission blocks while the bound is reached, so at most this many chunks (plus the one
    /// being read) are held in memory ahead of the workers.
    pub max_in_flight_chunks: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            num_workers: 4,
            max_in_flight_chunks: 8,
        }
    }
}

/// Why a chunk produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkFailure {
    /// The reader could not produce the chunk.
    #[error("chunk could not be read: {0}")]
    Read(String),
    /// Rule application panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),
    /// The worker exited without reporting a result.
    #[error("worker exited without reporting a result")]
    Lost,
}

/// A failed chunk and its position in the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    pub index: usize,
    pub failure: ChunkFailure,
}

/// Totals for one [`ChunkOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Chunks pulled from the input, including failed and skipped ones.
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    /// Empty chunks that were not submitted.
    pub chunks_skipped: usize,
    pub failed: Vec<FailedChunk>,
    pub rows_in: usize,
    pub rows_out: usize,
    pub elapsed: Duration,
    pub metrics: ExecutionMetricsSnapshot,
}

impl RunSummary {
    pub fn chunks_failed(&self) -> usize {
        self.failed.len()
    }
}

/// Result of a run: successful chunks in completion order, plus the summary.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub chunks: Vec<DataChunk>,
    pub summary: RunSummary,
}

/// Apply `rules` to one chunk.
///
/// A panic during rule application is caught and reported as [`ChunkFailure::Panicked`]; rule
/// evaluation errors are not failures (they null-fill the affected column).
pub fn process_chunk(rules: &RuleSet, chunk: DataChunk) -> Result<DataChunk, ChunkFailure> {
    panic::catch_unwind(AssertUnwindSafe(|| rules.compile().apply(chunk)))
        .map_err(|payload| ChunkFailure::Panicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fans chunks out to a worker pool and gathers results in completion order.
pub struct ChunkOrchestrator {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ChunkOrchestrator {
    /// Create an orchestrator with its own thread pool.
    ///
    /// Fails with [`PipelineError::Configuration`] if `num_workers` or `max_in_flight_chunks` is
    /// zero, or the pool cannot be built.
    pub fn new(opts: ExecutionOptions) -> PipelineResult<Self> {
        if opts.num_workers == 0 {
            return Err(PipelineError::config("num_workers must be > 0"));
        }
        if opts.max_in_flight_chunks == 0 {
            return Err(PipelineError::config("max_in_flight_chunks must be > 0"));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.num_workers)
            .thread_name(|i| format!("chunk-worker-{i}"))
            .panic_handler(|payload| {
                tracing::error!(panic = %panic_message(payload.as_ref()), "worker task panicked");
            })
            .build()
            .map_err(|e| PipelineError::config(format!("failed to build worker pool: {e}")))?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.opts
    }

    /// Process every chunk of `chunks` with `rules`.
    ///
    /// Chunks are pulled and submitted sequentially on the calling thread; this call returns once
    /// every submitted chunk has reported. Unreadable chunks (`Err` items) and chunks whose
    /// processing panicked are recorded in [`RunSummary::failed`] and dropped; empty chunks are
    /// skipped. Failures never abort the run.
    pub fn run<I>(&self, chunks: I, rules: &RuleSet) -> RunOutput
    where
        I: IntoIterator<Item = PipelineResult<DataChunk>>,
    {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            workers: self.opts.num_workers,
            max_in_flight_chunks: self.opts.max_in_flight_chunks,
        });

        let rules = Arc::new(rules.clone());
        let sem = Arc::new(Semaphore::new(self.opts.max_in_flight_chunks));
        let (tx, rx) = mpsc::channel::<(usize, Result<DataChunk, ChunkFailure>)>();

        let mut chunks_total = 0usize;
        let mut chunks_skipped = 0usize;
        let mut rows_in = 0usize;
        let mut failed: Vec<FailedChunk> = Vec::new();
        let mut pending: BTreeSet<usize> = BTreeSet::new();

        for (index, item) in chunks.into_iter().enumerate() {
            chunks_total += 1;
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.metrics.on_chunk_rejected();
                    let failure = ChunkFailure::Read(err.to_string());
                    self.emit(ExecutionEvent::ChunkFailed {
                        chunk: index,
                        error: failure.to_string(),
                    });
                    failed.push(FailedChunk { index, failure });
                    continue;
                }
            };

            if chunk.is_empty() {
                chunks_skipped += 1;
                self.metrics.on_chunk_skipped();
                self.emit(ExecutionEvent::ChunkSkipped { chunk: index });
                continue;
            }

            let (permit, waited) = Semaphore::acquire(&sem);
            if waited > Duration::ZERO {
                self.metrics.on_throttle_wait(waited);
                self.emit(ExecutionEvent::ThrottleWaited { duration: waited });
            }

            let rows = chunk.row_count();
            rows_in += rows;
            self.metrics.on_chunk_submitted();
            self.emit(ExecutionEvent::ChunkSubmitted { chunk: index, rows });
            pending.insert(index);

            let tx = tx.clone();
            let rules = Arc::clone(&rules);
            let metrics = Arc::clone(&self.metrics);
            let observer = self.observer.clone();
            self.pool.spawn(move || {
                let _permit = permit;
                metrics.on_chunk_start();
                emit_to(&observer, ExecutionEvent::ChunkStarted { chunk: index, rows });

                let result = process_chunk(&rules, chunk);
                match &result {
                    Ok(out) => {
                        metrics.on_chunk_end(rows);
                        emit_to(
                            &observer,
                            ExecutionEvent::ChunkFinished {
                                chunk: index,
                                output_rows: out.row_count(),
                            },
                        );
                    }
                    Err(failure) => {
                        metrics.on_chunk_error();
                        emit_to(
                            &observer,
                            ExecutionEvent::ChunkFailed {
                                chunk: index,
                                error: failure.to_string(),
                            },
                        );
                    }
                }
                // The receiver outlives every task; a send error only means the run was torn down.
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        let mut out_chunks: Vec<DataChunk> = Vec::new();
        for (index, result) in rx {
            pending.remove(&index);
            match result {
                Ok(chunk) => out_chunks.push(chunk),
                Err(failure) => {
                    tracing::error!(chunk = index, error = %failure, "dropping failed chunk");
                    failed.push(FailedChunk { index, failure });
                }
            }
        }
        for index in pending {
            tracing::error!(chunk = index, "worker exited without reporting a result");
            failed.push(FailedChunk {
                index,
                failure: ChunkFailure::Lost,
            });
        }
        failed.sort_by_key(|f| f.index);

        let elapsed = start.elapsed();
        self.metrics.end_run(elapsed);
        let metrics = self.metrics.snapshot();
        self.emit(ExecutionEvent::RunFinished {
            elapsed,
            metrics: metrics.clone(),
        });

        let rows_out = out_chunks.iter().map(DataChunk::row_count).sum();
        RunOutput {
            summary: RunSummary {
                chunks_total,
                chunks_succeeded: out_chunks.len(),
                chunks_skipped,
                failed,
                rows_in,
                rows_out,
                elapsed,
                metrics,
            },
            chunks: out_chunks,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        emit_to(&self.observer, event);
    }
}

fn emit_to(observer: &Option<Arc<dyn ExecutionObserver>>, event: ExecutionEvent) {
    if let Some(obs) = observer {
        obs.on_event(&event);
    }
}
