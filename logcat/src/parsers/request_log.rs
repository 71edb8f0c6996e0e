//! Positional view over one line of the Artifactory request log.
//!
//! The request log is pipe-delimited with eleven fields; only a subset matters for billing:
//!
//! | index | field         |
//! |-------|---------------|
//! | 0     | timestamp     |
//! | 2     | remote ip     |
//! | 3     | user          |
//! | 4     | http method   |
//! | 5     | request path  |
//! | 6     | http status   |
//! | 8     | response size |

use crate::parsers::TransformError;

const TIMESTAMP_FIELD: usize = 0;
const REMOTE_IP_FIELD: usize = 2;
const USER_FIELD: usize = 3;
const METHOD_FIELD: usize = 4;
const PATH_FIELD: usize = 5;
const STATUS_FIELD: usize = 6;
const SIZE_FIELD: usize = 8;

const ANONYMOUS_USERS: [&str; 2] = ["non_authenticated_user", "anonymous"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest<'a> {
    pub timestamp_raw: &'a str,
    pub remote_ip: &'a str,
    pub user: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub status: &'a str,
    pub size_raw: &'a str,
}

impl<'a> ParsedRequest<'a> {
    /// Splits `line` on `delimiter` and picks the billing fields by position.
    ///
    /// The field count must match `expected_fields` exactly; anything else means the line was
    /// truncated or the log format drifted.
    pub fn extract(
        line: &'a str,
        delimiter: &str,
        expected_fields: usize,
    ) -> Result<Self, TransformError> {
        let fields: Vec<&'a str> = line.split(delimiter).collect();
        if fields.len() != expected_fields || fields.len() <= SIZE_FIELD {
            return Err(TransformError::FieldCount {
                expected: expected_fields,
                found: fields.len(),
            });
        }

        Ok(Self {
            timestamp_raw: fields[TIMESTAMP_FIELD],
            remote_ip: fields[REMOTE_IP_FIELD],
            user: fields[USER_FIELD],
            method: fields[METHOD_FIELD],
            path: fields[PATH_FIELD],
            status: fields[STATUS_FIELD],
            size_raw: fields[SIZE_FIELD],
        })
    }

    /// Successful, authenticated, non-empty GET downloads are the only billable requests.
    pub fn is_billable_request(&self) -> bool {
        self.status == "200"
            && self.method == "GET"
            && self.size_raw != "0"
            && !ANONYMOUS_USERS.contains(&self.user)
    }
}
