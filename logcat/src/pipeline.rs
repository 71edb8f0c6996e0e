//! Wires ingestion, collector, worker pool and writer together and drives ordered shutdown.
//!
//! ```text
//! [LineSource] -> [Collector] -> work queue -> [Worker x N] -> output queue -> [RotatingWriter]
//!                                                                   ^
//!                                                     [hourly_rotation] (rotate events)
//! ```
//!
//! Shutdown always runs in the same order: stop the source, close the work queue and join the
//! workers, then let the writer drain the output queue and close its file.

use crate::collector::{CollectOutcome, Collector, LogFormat};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, DispatcherConfig, WorkerStats};
use crate::output_writer::{hourly_rotation, RotatingWriter, WriterHandle, WriterStats};
use crate::tailer::LineSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub format: LogFormat,
    pub workers: usize,
    pub work_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub server_identity: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, server_identity: impl Into<String>) -> Self {
        Self {
            format: LogFormat::new(&config.input.delimiter, config.input.num_fields),
            workers: config.pipeline.workers,
            work_queue_capacity: config.pipeline.work_queue_capacity,
            output_queue_capacity: config.pipeline.output_queue_capacity,
            server_identity: server_identity.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub lines_received: u64,
    pub lines_queued: u64,
    pub shape_mismatches: u64,
    pub workers: WorkerStats,
    pub writer: WriterStats,
}

pub struct Pipeline {
    collector: Collector,
    dispatcher: Dispatcher,
    writer: WriterHandle,
    rotation_cancel: CancellationToken,
    rotation_task: JoinHandle<()>,
    summary: PipelineSummary,
}

impl Pipeline {
    /// Opens the first output file and starts the writer, rotation schedule and workers.
    ///
    /// Fails if the initial output file cannot be opened; nothing is left running in that case.
    pub async fn start(settings: PipelineSettings, writer: RotatingWriter) -> Result<Self> {
        let (work_tx, work_rx) = flume::bounded(settings.work_queue_capacity.max(1));
        let (output_tx, output_rx) = mpsc::channel(settings.output_queue_capacity.max(1));
        let (rotate_tx, rotate_rx) = mpsc::channel(1);

        let writer = writer
            .start(output_rx, rotate_rx)
            .await
            .context("failed to initialize writer")?;

        let rotation_cancel = CancellationToken::new();
        let rotation_task = tokio::spawn(hourly_rotation(rotate_tx, rotation_cancel.clone()));

        let dispatcher = Dispatcher::start(
            DispatcherConfig {
                workers: settings.workers,
                server_identity: Arc::from(settings.server_identity.as_str()),
            },
            work_rx,
            output_tx,
        );
        let collector = Collector::new(settings.format, work_tx);

        Ok(Self {
            collector,
            dispatcher,
            writer,
            rotation_cancel,
            rotation_task,
            summary: PipelineSummary::default(),
        })
    }

    /// Feeds lines from `source` until `shutdown` fires or the source ends, then shuts down.
    pub async fn run<S>(mut self, source: &mut S, shutdown: CancellationToken) -> Result<PipelineSummary>
    where
        S: LineSource + ?Sized,
    {
        info!("pipeline running; awaiting input lines");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
                maybe_line = source.next_line() => match maybe_line {
                    Some(line) => {
                        if let Err(err) = self.admit(line).await {
                            error!(error = %err, "cannot hand lines to workers; shutting down");
                            break;
                        }
                    }
                    None => {
                        warn!("input stream ended; shutting down");
                        break;
                    }
                },
            }
        }

        if let Err(err) = source.stop().await {
            warn!(error = %err, "failed to gracefully stop tailing input file");
        }

        self.shutdown().await
    }

    async fn admit(&mut self, line: String) -> Result<()> {
        self.summary.lines_received += 1;
        match self.collector.collect(line).await? {
            CollectOutcome::Queued => self.summary.lines_queued += 1,
            CollectOutcome::ShapeMismatch { .. } => self.summary.shape_mismatches += 1,
        }
        Ok(())
    }

    /// Closes the work queue, joins the workers, then waits for the writer to finish.
    pub async fn shutdown(self) -> Result<PipelineSummary> {
        let Pipeline {
            collector,
            dispatcher,
            writer,
            rotation_cancel,
            rotation_task,
            mut summary,
        } = self;

        info!("closing work queue and waiting for workers");
        collector.close();
        summary.workers = dispatcher.join().await;

        // Workers held the only output senders, so the writer's queue is closed now.
        rotation_cancel.cancel();
        if let Err(err) = rotation_task.await {
            warn!(error = %err, "rotation schedule task failed");
        }

        summary.writer = writer.wait().await?;
        info!(
            lines_received = summary.lines_received,
            lines_queued = summary.lines_queued,
            shape_mismatches = summary.shape_mismatches,
            records_written = summary.writer.records_written,
            files_opened = summary.writer.files_opened,
            "pipeline stopped"
        );
        Ok(summary)
    }
}
