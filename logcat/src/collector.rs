//! Shape check in front of the worker pool.
//!
//! Lines whose field count disagrees with the configured log format are dropped here so that
//! truncated writes and format drift never reach the transform.

use crate::metrics::{LINES_RECEIVED_TOTAL, LINES_REJECTED_TOTAL};
use crate::parsers::{line_preview, LINE_PREVIEW_LIMIT};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFormat {
    pub delimiter: Arc<str>,
    pub num_fields: usize,
}

impl LogFormat {
    pub fn new(delimiter: &str, num_fields: usize) -> Self {
        Self {
            delimiter: Arc::from(delimiter),
            num_fields,
        }
    }
}

/// One line accepted for transformation. Owned by whichever queue slot or worker holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub text: String,
    pub delimiter: Arc<str>,
    pub expected_fields: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    Queued,
    ShapeMismatch { found: usize },
}

/// Producer side of the work queue. Dropping the collector closes the queue for the workers.
pub struct Collector {
    format: LogFormat,
    work_tx: flume::Sender<WorkItem>,
}

impl Collector {
    pub fn new(format: LogFormat, work_tx: flume::Sender<WorkItem>) -> Self {
        Self { format, work_tx }
    }

    /// Validates `line` and enqueues it, waiting while the work queue is full.
    ///
    /// Fails only when every worker has gone away.
    pub async fn collect(&self, line: String) -> Result<CollectOutcome> {
        LINES_RECEIVED_TOTAL.inc();

        let found = line.split(self.format.delimiter.as_ref()).count();
        if found != self.format.num_fields {
            LINES_REJECTED_TOTAL
                .with_label_values(&["shape_mismatch"])
                .inc();
            warn!(
                expected = self.format.num_fields,
                found,
                line = %line_preview(&line, LINE_PREVIEW_LIMIT),
                "dropping line with unexpected field count"
            );
            return Ok(CollectOutcome::ShapeMismatch { found });
        }

        let item = WorkItem {
            text: line,
            delimiter: self.format.delimiter.clone(),
            expected_fields: self.format.num_fields,
        };

        self.work_tx
            .send_async(item)
            .await
            .map_err(|_| anyhow!("work queue closed; no workers left to accept lines"))?;

        Ok(CollectOutcome::Queued)
    }

    /// Closes the work queue. Workers drain what is already queued and then exit.
    pub fn close(self) {
        drop(self.work_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queues_lines_with_expected_shape() {
        let (work_tx, work_rx) = flume::bounded(1);
        let collector = Collector::new(LogFormat::new("|", 3), work_tx);

        let outcome = collector.collect("example|log|line".to_string()).await.unwrap();
        assert_eq!(outcome, CollectOutcome::Queued);

        let item = work_rx.try_recv().expect("work item queued");
        assert_eq!(item.text, "example|log|line");
        assert_eq!(item.delimiter.as_ref(), "|");
        assert_eq!(item.expected_fields, 3);
    }

    #[tokio::test]
    async fn drops_lines_with_wrong_field_count() {
        let (work_tx, work_rx) = flume::bounded(4);
        let collector = Collector::new(LogFormat::new("|", 11), work_tx);

        let outcome = collector.collect("too|short".to_string()).await.unwrap();
        assert_eq!(outcome, CollectOutcome::ShapeMismatch { found: 2 });

        let outcome = collector.collect("a|b|c|d|e|f|g|h|i|j|k|l".to_string()).await.unwrap();
        assert_eq!(outcome, CollectOutcome::ShapeMismatch { found: 12 });

        assert!(work_rx.is_empty());
    }

    #[tokio::test]
    async fn closing_disconnects_the_workers() {
        let (work_tx, work_rx) = flume::bounded(1);
        let collector = Collector::new(LogFormat::new("|", 1), work_tx);
        collector.close();

        assert!(matches!(
            work_rx.recv_async().await,
            Err(flume::RecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn fails_once_the_queue_has_no_consumers() {
        let (work_tx, work_rx) = flume::bounded(1);
        drop(work_rx);
        let collector = Collector::new(LogFormat::new("|", 1), work_tx);

        assert!(collector.collect("line".to_string()).await.is_err());
    }
}
