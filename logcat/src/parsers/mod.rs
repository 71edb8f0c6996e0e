//! Request-log transform: one raw access-log line in, at most one billing record out.

use std::num::ParseIntError;
use thiserror::Error;

pub mod billing;
pub mod repository;
pub mod request_log;
pub(crate) mod utils;

pub use billing::BillingRecord;
pub use repository::{classify, RemoteArtifact};
pub use request_log::ParsedRequest;
pub(crate) use utils::{drain_complete_lines, line_preview, trim_line_bytes, LINE_PREVIEW_LIMIT};

/// Result of transforming a line that did not fail to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// A billable download, already serialized to one JSON line.
    Record(String),
    /// A well-formed line that is not a billable download. Expected and high-frequency.
    NotBillable,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("could not parse timestamp {0:?} from request log")]
    Timestamp(String),
    #[error("could not parse response size {raw:?} from request log")]
    Size {
        raw: String,
        #[source]
        source: Option<ParseIntError>,
    },
    #[error("could not serialize billing record")]
    Serialize(#[source] serde_json::Error),
}

impl TransformError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransformError::FieldCount { .. } => "field_count",
            TransformError::Timestamp(_) => "timestamp",
            TransformError::Size { .. } => "size",
            TransformError::Serialize(_) => "serialize",
        }
    }
}

/// Turns one request-log line into a serialized [`BillingRecord`].
///
/// Lines that are well-formed but not billable (failed requests, anonymous users, local
/// repositories, registry token requests) yield [`TransformOutcome::NotBillable`]. Only a broken
/// shape, timestamp or size is an error.
///
/// # Examples
///
/// ```
/// use logcat::parsers::{transform, TransformOutcome};
///
/// let line = "2023-06-15T12:34:56.789Z|abcdefgh12345678|1.2.3.4|user|GET|/api/docker/registry-docker-remote/v2/alpine/curl/manifests/latest|200|-1|1234|567|user-agent123";
/// let outcome = transform(line, "|", 11, "artifactory.domain").unwrap();
/// assert!(matches!(outcome, TransformOutcome::Record(json) if json.contains(r#""quantity":1234"#)));
/// ```
pub fn transform(
    line: &str,
    delimiter: &str,
    expected_fields: usize,
    server_identity: &str,
) -> Result<TransformOutcome, TransformError> {
    let request = ParsedRequest::extract(line, delimiter, expected_fields)?;
    if !request.is_billable_request() {
        return Ok(TransformOutcome::NotBillable);
    }

    let Some(artifact) = classify(request.path) else {
        return Ok(TransformOutcome::NotBillable);
    };

    let record = BillingRecord::build(&request, artifact, server_identity)?;
    Ok(TransformOutcome::Record(record.to_json_line()?))
}
