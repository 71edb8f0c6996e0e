//! Maps a request path onto the remote repository that served it.
//!
//! Remote (proxy/cache) repositories follow the `-remote` naming convention. Two layouts exist:
//!
//! - generic remotes are addressed directly: `/<repo>-remote/<artifact path>`
//! - technology remotes sit behind an API prefix:
//!   `/api/<technology>/<repo>-remote/<version>/<artifact path>`

use lazy_static::lazy_static;
use regex::Regex;

const REMOTE_MARKER: &str = "-remote";
const TOKEN_PATH: &str = "token";

lazy_static! {
    static ref REPOSITORY_SEGMENTS: Regex =
        Regex::new(r"/([^/]+)/[^/]+/([^/]+)").expect("repository pattern is valid");
    static ref TECHNOLOGY_PATH: Regex =
        Regex::new(r"/[^/]+/[^/]+/[^/]+/[^/]+/([^/].*)").expect("technology pattern is valid");
    static ref GENERIC_PATH: Regex =
        Regex::new(r"/[^/]+/([^/].*)").expect("generic pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub repository: String,
    pub artifact_path: String,
}

/// Returns the repository and artifact path for downloads from a remote repository, or `None`
/// when the path does not belong to one (or is registry authentication traffic).
pub fn classify(path: &str) -> Option<RemoteArtifact> {
    let segments = REPOSITORY_SEGMENTS.captures(path)?;
    let first = segments.get(1)?.as_str();
    let second = segments.get(2)?.as_str();

    let generic = first.contains(REMOTE_MARKER);
    let technology = second.contains(REMOTE_MARKER);
    if !generic && !technology {
        return None;
    }

    let mut artifact = None;

    if generic {
        let captured = GENERIC_PATH.captures(path)?;
        artifact = Some(RemoteArtifact {
            repository: first.to_string(),
            artifact_path: captured.get(1)?.as_str().to_string(),
        });
    }

    // Technology layout overrides the generic one when both segments look remote.
    if technology {
        let captured = TECHNOLOGY_PATH.captures(path)?;
        let rest = captured.get(1)?.as_str();
        if rest == TOKEN_PATH {
            return None;
        }
        artifact = Some(RemoteArtifact {
            repository: second.to_string(),
            artifact_path: rewrite_technology_path(rest),
        });
    }

    artifact
}

/// Docker-style references are flattened: the first `:` (digest separator) becomes `__` and the
/// first `/blobs/` collapses into `/`.
fn rewrite_technology_path(path: &str) -> String {
    path.replacen(':', "__", 1).replacen("/blobs/", "/", 1)
}
