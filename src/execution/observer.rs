use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Execution events emitted by the orchestrator.
///
/// `chunk` is the zero-based position of the chunk in the input stream.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        workers: usize,
        max_in_flight_chunks: usize,
    },
    ThrottleWaited {
        duration: Duration,
    },
    ChunkSubmitted {
        chunk: usize,
        rows: usize,
    },
    ChunkSkipped {
        chunk: usize,
    },
    ChunkStarted {
        chunk: usize,
        rows: usize,
    },
    ChunkFinished {
        chunk: usize,
        output_rows: usize,
    },
    ChunkFailed {
        chunk: usize,
        error: String,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing`.
///
/// Run-level events are logged at `info`, chunk failures at `error`, everything else at `debug`.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted {
                workers,
                max_in_flight_chunks,
            } => tracing::info!(workers, max_in_flight_chunks, "run started"),
            ExecutionEvent::ThrottleWaited { duration } => {
                tracing::debug!(waited = ?duration, "submission throttled")
            }
            ExecutionEvent::ChunkSubmitted { chunk, rows } => {
                tracing::debug!(chunk, rows, "chunk submitted")
            }
            ExecutionEvent::ChunkSkipped { chunk } => tracing::debug!(chunk, "empty chunk skipped"),
            ExecutionEvent::ChunkStarted { chunk, rows } => {
                tracing::debug!(chunk, rows, "chunk started")
            }
            ExecutionEvent::ChunkFinished { chunk, output_rows } => {
                tracing::debug!(chunk, output_rows, "chunk finished")
            }
            ExecutionEvent::ChunkFailed { chunk, error } => {
                tracing::error!(chunk, %error, "chunk failed")
            }
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                tracing::info!(elapsed = ?elapsed, %metrics, "run finished")
            }
        }
    }
}

/// Real-time metrics for an execution run.
///
/// The orchestrator updates these counters during execution; callers can snapshot them at any
/// time, including from another thread while a run is in progress.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,

    rows_processed: AtomicU64,
    chunks_submitted: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,
    chunks_failed: AtomicU64,
    chunks_skipped: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_chunks: AtomicUsize,
    max_active_chunks: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            chunks_submitted: AtomicU64::new(0),
            chunks_started: AtomicU64::new(0),
            chunks_finished: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
            chunks_skipped: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_chunks: AtomicUsize::new(0),
            max_active_chunks: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::SeqCst);
        self.chunks_submitted.store(0, Ordering::SeqCst);
        self.chunks_started.store(0, Ordering::SeqCst);
        self.chunks_finished.store(0, Ordering::SeqCst);
        self.chunks_failed.store(0, Ordering::SeqCst);
        self.chunks_skipped.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_chunks.store(0, Ordering::SeqCst);
        self.max_active_chunks.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_chunk_submitted(&self) {
        let _ = self.chunks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_chunk_skipped(&self) {
        let _ = self.chunks_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_chunk_start(&self) {
        let _ = self.chunks_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_chunks, now);
    }

    /// A started chunk completed successfully after processing `rows` input rows.
    pub fn on_chunk_end(&self, rows: usize) {
        let _ = self.rows_processed.fetch_add(rows as u64, Ordering::SeqCst);
        let _ = self.chunks_finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_chunks.fetch_sub(1, Ordering::SeqCst);
    }

    /// A started chunk failed.
    pub fn on_chunk_error(&self) {
        let _ = self.chunks_failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_chunks.fetch_sub(1, Ordering::SeqCst);
    }

    /// A chunk failed before it could be submitted (unreadable input).
    pub fn on_chunk_rejected(&self) {
        let _ = self.chunks_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let run_id = self.run_id.load(Ordering::SeqCst);
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id,
            elapsed,
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            chunks_submitted: self.chunks_submitted.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
            chunks_failed: self.chunks_failed.load(Ordering::SeqCst),
            chunks_skipped: self.chunks_skipped.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_chunks: self.max_active_chunks.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_processed: u64,
    pub chunks_submitted: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
    pub chunks_failed: u64,
    pub chunks_skipped: u64,
    pub throttle_wait: Duration,
    pub max_active_chunks: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_processed={}, chunks={}/{} (failed={}, skipped={}), max_active_chunks={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.rows_processed,
            self.chunks_finished,
            self.chunks_submitted,
            self.chunks_failed,
            self.chunks_skipped,
            self.max_active_chunks,
            self.throttle_wait,
            self.elapsed
        )
    }
}
