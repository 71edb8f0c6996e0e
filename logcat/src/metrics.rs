//! Prometheus metrics for monitoring logcat throughput and errors.
//!
//! All metrics use the default Prometheus registry and follow naming conventions:
//! - Histograms: *_seconds (for latency)
//! - Counters: *_total (for counts)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ==================== LATENCY METRICS ====================

    pub static ref TRANSFORM_DURATION: Histogram = register_histogram!(
        "logcat_transform_duration_seconds",
        "Time spent transforming one request-log line",
        vec![0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
    )
    .unwrap();

    // ==================== THROUGHPUT METRICS ====================

    pub static ref LINES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "logcat_lines_received_total",
        "Lines handed to the collector by the tailer"
    )
    .unwrap();
    pub static ref LINES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logcat_lines_rejected_total",
        "Lines dropped before reaching a worker",
        &["reason"]
    )
    .unwrap();
    pub static ref TRANSFORM_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logcat_transform_outcomes_total",
        "Transform results by outcome (record, not_billable, or error kind)",
        &["outcome"]
    )
    .unwrap();
    pub static ref RECORDS_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        "logcat_records_written_total",
        "Billing records appended to output files"
    )
    .unwrap();
    pub static ref FILE_ROTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logcat_file_rotations_total",
        "Output files opened after startup by trigger",
        &["trigger"]
    )
    .unwrap();

    // ==================== ERROR COUNTERS ====================

    pub static ref WRITER_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logcat_writer_errors_total",
        "Output file I/O failures by operation",
        &["operation"]
    )
    .unwrap();

    // ==================== GAUGE METRICS ====================

    pub static ref ACTIVE_WORKERS: IntGauge = register_int_gauge!(
        "logcat_active_workers",
        "Transform workers currently running"
    )
    .unwrap();
}
