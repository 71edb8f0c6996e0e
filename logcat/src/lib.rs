//! logcat: follows an Artifactory request log and writes billable remote downloads as
//! hourly-rotated JSON-lines files.

pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod output_writer;
pub mod parsers;
pub mod pipeline;
pub mod runner;
pub mod tailer;
