//! Fixed-size worker pool between the collector and the writer.
//!
//! Every worker pulls from the same bounded work queue and pushes serialized records into the
//! same bounded output queue. A full output queue parks the worker mid-item, which is what
//! throttles ingestion when the writer falls behind.

use crate::collector::WorkItem;
use crate::metrics::{ACTIVE_WORKERS, TRANSFORM_DURATION, TRANSFORM_OUTCOMES_TOTAL};
use crate::parsers::{transform, TransformOutcome};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub server_identity: Arc<str>,
}

/// What one worker did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub records: u64,
    pub not_billable: u64,
    pub parse_errors: u64,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.processed += other.processed;
        self.records += other.records;
        self.not_billable += other.not_billable;
        self.parse_errors += other.parse_errors;
    }
}

pub struct Dispatcher {
    workers: Vec<JoinHandle<WorkerStats>>,
}

impl Dispatcher {
    /// Spawns `config.workers` workers. They run until the work queue is closed and drained.
    pub fn start(
        config: DispatcherConfig,
        work_rx: flume::Receiver<WorkItem>,
        output_tx: mpsc::Sender<String>,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let workers = (1..=worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    server_identity: config.server_identity.clone(),
                    work_rx: work_rx.clone(),
                    output_tx: output_tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = worker_count, "dispatcher started");
        Self { workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit. Call after closing the work queue.
    pub async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for (index, handle) in self.workers.into_iter().enumerate() {
            match handle.await {
                Ok(stats) => total.merge(stats),
                Err(err) => warn!(worker = index + 1, error = %err, "worker task failed"),
            }
        }
        info!(
            processed = total.processed,
            records = total.records,
            parse_errors = total.parse_errors,
            "all workers stopped"
        );
        total
    }
}

struct Worker {
    id: usize,
    server_identity: Arc<str>,
    work_rx: flume::Receiver<WorkItem>,
    output_tx: mpsc::Sender<String>,
}

impl Worker {
    async fn run(self) -> WorkerStats {
        ACTIVE_WORKERS.inc();
        let mut stats = WorkerStats::default();

        // recv fails only once every sender is gone and the queue is empty.
        while let Ok(item) = self.work_rx.recv_async().await {
            stats.processed += 1;

            let started = Instant::now();
            let outcome = transform(
                &item.text,
                &item.delimiter,
                item.expected_fields,
                &self.server_identity,
            );
            TRANSFORM_DURATION.observe(started.elapsed().as_secs_f64());

            match outcome {
                Ok(TransformOutcome::Record(json)) => {
                    TRANSFORM_OUTCOMES_TOTAL.with_label_values(&["record"]).inc();
                    if self.output_tx.send(json).await.is_err() {
                        warn!(worker = self.id, "output queue closed; worker exiting early");
                        break;
                    }
                    stats.records += 1;
                }
                Ok(TransformOutcome::NotBillable) => {
                    TRANSFORM_OUTCOMES_TOTAL
                        .with_label_values(&["not_billable"])
                        .inc();
                    stats.not_billable += 1;
                }
                Err(err) => {
                    TRANSFORM_OUTCOMES_TOTAL
                        .with_label_values(&[err.kind()])
                        .inc();
                    warn!(
                        worker = self.id,
                        error = %err,
                        line = %item.text,
                        "error while parsing line"
                    );
                    stats.parse_errors += 1;
                }
            }
        }

        ACTIVE_WORKERS.dec();
        debug!(worker = self.id, processed = stats.processed, "worker stopping");
        stats
    }
}
