use crate::parsers::repository::RemoteArtifact;
use crate::parsers::request_log::ParsedRequest;
use crate::parsers::TransformError;
use serde::Serialize;

pub const SERVICE: &str = "artifactory";
pub const ACTION: &str = "download";
pub const PROJECT: &str = "default";
pub const CONSUMPTION_UNIT: &str = "bytes";

/// One billable download, serialized as a single JSON line in the output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingRecord {
    #[serde(rename = "billing_timestamp")]
    pub timestamp_hour_bucket: String,
    #[serde(rename = "server_name")]
    pub server_identity: String,
    pub service: &'static str,
    pub action: &'static str,
    #[serde(rename = "ip")]
    pub remote_ip: String,
    pub repository: String,
    pub project: &'static str,
    #[serde(rename = "artifactory_path")]
    pub artifact_path: String,
    #[serde(rename = "user_name")]
    pub user: String,
    #[serde(rename = "consumption_unit")]
    pub unit: &'static str,
    pub quantity: i64,
}

impl BillingRecord {
    pub fn build(
        request: &ParsedRequest<'_>,
        artifact: RemoteArtifact,
        server_identity: &str,
    ) -> Result<Self, TransformError> {
        let timestamp_hour_bucket = hour_bucket(request.timestamp_raw)?;
        let quantity = parse_size(request.size_raw)?;

        Ok(Self {
            timestamp_hour_bucket,
            server_identity: server_identity.to_string(),
            service: SERVICE,
            action: ACTION,
            remote_ip: request.remote_ip.to_string(),
            repository: artifact.repository,
            project: PROJECT,
            artifact_path: artifact.artifact_path,
            user: request.user.to_string(),
            unit: CONSUMPTION_UNIT,
            quantity,
        })
    }

    pub fn to_json_line(&self) -> Result<String, TransformError> {
        serde_json::to_string(self).map_err(TransformError::Serialize)
    }
}

/// Truncates `2023-06-15T12:34:56.789Z` to `2023-06-15 12:00:00.000`.
///
/// Billing is hourly, so minutes, seconds and any zone suffix are dropped on purpose.
pub fn hour_bucket(timestamp: &str) -> Result<String, TransformError> {
    let parts: Vec<&str> = timestamp.split('T').collect();
    if parts.len() != 2 {
        return Err(TransformError::Timestamp(timestamp.to_string()));
    }

    let (date, time) = (parts[0], parts[1]);
    let hour = time.split(':').next().unwrap_or_default();

    Ok(format!("{date} {hour}:00:00.000"))
}

pub fn parse_size(raw: &str) -> Result<i64, TransformError> {
    let size = raw.parse::<i64>().map_err(|source| TransformError::Size {
        raw: raw.to_string(),
        source: Some(source),
    })?;
    if size < 0 {
        return Err(TransformError::Size {
            raw: raw.to_string(),
            source: None,
        });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_timestamp_to_the_hour() {
        assert_eq!(
            hour_bucket("2023-06-15T12:34:56.789Z").unwrap(),
            "2023-06-15 12:00:00.000"
        );
        assert_eq!(
            hour_bucket("2024-01-01T00:59:59.999+02:00").unwrap(),
            "2024-01-01 00:00:00.000"
        );
    }

    #[test]
    fn timestamp_without_single_separator_is_an_error() {
        assert!(matches!(
            hour_bucket("2023-06-15 12:34:56"),
            Err(TransformError::Timestamp(_))
        ));
        assert!(hour_bucket("2023T06T15").is_err());
    }

    #[test]
    fn parses_sizes_as_non_negative_integers() {
        assert_eq!(parse_size("1234").unwrap(), 1234);
        assert_eq!(parse_size("9223372036854775807").unwrap(), i64::MAX);
        assert!(matches!(
            parse_size("12kb"),
            Err(TransformError::Size { source: Some(_), .. })
        ));
        assert!(matches!(
            parse_size("-1"),
            Err(TransformError::Size { source: None, .. })
        ));
    }

    #[test]
    fn serializes_with_fixed_key_order() {
        let record = BillingRecord {
            timestamp_hour_bucket: "2023-06-15 12:00:00.000".into(),
            server_identity: "artifactory.domain".into(),
            service: SERVICE,
            action: ACTION,
            remote_ip: "1.2.3.4".into(),
            repository: "registry-docker-remote".into(),
            project: PROJECT,
            artifact_path: "alpine/curl/manifests/latest".into(),
            user: "user".into(),
            unit: CONSUMPTION_UNIT,
            quantity: 1234,
        };

        assert_eq!(
            record.to_json_line().unwrap(),
            r#"{"billing_timestamp":"2023-06-15 12:00:00.000","server_name":"artifactory.domain","service":"artifactory","action":"download","ip":"1.2.3.4","repository":"registry-docker-remote","project":"default","artifactory_path":"alpine/curl/manifests/latest","user_name":"user","consumption_unit":"bytes","quantity":1234}"#
        );
    }
}
