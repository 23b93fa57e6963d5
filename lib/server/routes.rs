//! Route definitions for the registry's wire surface.
//!
//! The OCI path grammar allows repository names of one to five slash
//! segments, which no static route table can express. Everything under
//! `/v2/` therefore funnels through one wildcard route whose tail is parsed
//! here into a typed route; after that, no component cares about path depth.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get},
    Router,
};

use crate::config::MAX_UPLOAD_BODY_BYTES;

use super::{auth, handlers, state::ServerState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed `/v2/…` path.
#[derive(Debug, PartialEq, Eq)]
pub enum RoutePath {
    /// `<repo>/tags/list`
    Tags {
        /// The repository.
        repo: String,
    },

    /// `<repo>/manifests/<reference>`
    Manifest {
        /// The repository.
        repo: String,

        /// The tag or digest reference, unvalidated.
        reference: String,
    },

    /// `<repo>/blobs/<digest>`
    Blob {
        /// The repository.
        repo: String,

        /// The digest, unvalidated.
        digest: String,
    },

    /// `<repo>/blobs/uploads/`
    UploadStart {
        /// The repository.
        repo: String,
    },

    /// `<repo>/blobs/uploads/<uuid>`
    Upload {
        /// The repository.
        repo: String,

        /// The upload session id, unvalidated.
        id: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the registry router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/v2", get(handlers::base_handler))
        .route("/v2/", get(handlers::base_handler))
        .route("/v2/_catalog", get(handlers::catalog_handler))
        .route("/v2/{*tail}", any(handlers::dispatch_v2))
        .route("/healthz", get(handlers::health_handler))
        .route("/api/cache/stats", get(handlers::cache_stats_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_write_auth,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES))
        .with_state(state)
}

/// Parses the wildcard tail of a `/v2/…` request into a typed route.
/// Repository names keep 1–5 segments; anything else is rejected.
pub fn parse_v2_tail(tail: &str) -> Option<RoutePath> {
    let mut segments: Vec<&str> = tail.split('/').collect();
    // POST …/blobs/uploads/ arrives with a trailing slash
    if segments.last() == Some(&"") {
        segments.pop();
    }
    let n = segments.len();

    if n >= 3 && segments[n - 2] == "tags" && segments[n - 1] == "list" {
        return repo_from(&segments[..n - 2]).map(|repo| RoutePath::Tags { repo });
    }

    if n >= 3 && segments[n - 2] == "manifests" {
        return repo_from(&segments[..n - 2]).map(|repo| RoutePath::Manifest {
            repo,
            reference: segments[n - 1].to_string(),
        });
    }

    if n >= 4 && segments[n - 3] == "blobs" && segments[n - 2] == "uploads" {
        return repo_from(&segments[..n - 3]).map(|repo| RoutePath::Upload {
            repo,
            id: segments[n - 1].to_string(),
        });
    }

    if n >= 3 && segments[n - 2] == "blobs" && segments[n - 1] == "uploads" {
        return repo_from(&segments[..n - 2]).map(|repo| RoutePath::UploadStart { repo });
    }

    if n >= 3 && segments[n - 2] == "blobs" {
        return repo_from(&segments[..n - 2]).map(|repo| RoutePath::Blob {
            repo,
            digest: segments[n - 1].to_string(),
        });
    }

    None
}

/// Joins 1–5 repository segments back into a single name.
fn repo_from(segments: &[&str]) -> Option<String> {
    if segments.is_empty() || segments.len() > 5 || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments.join("/"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_parse_manifest_paths_across_depths() {
        assert_eq!(
            parse_v2_tail("alpine/manifests/latest"),
            Some(RoutePath::Manifest {
                repo: "alpine".to_string(),
                reference: "latest".to_string()
            })
        );
        assert_eq!(
            parse_v2_tail("proxy/docker.io/library/nginx/manifests/sha256:abc"),
            Some(RoutePath::Manifest {
                repo: "proxy/docker.io/library/nginx".to_string(),
                reference: "sha256:abc".to_string()
            })
        );
        // Five repo segments is the ceiling
        assert_eq!(
            parse_v2_tail("a/b/c/d/e/manifests/t"),
            Some(RoutePath::Manifest {
                repo: "a/b/c/d/e".to_string(),
                reference: "t".to_string()
            })
        );
        assert_eq!(parse_v2_tail("a/b/c/d/e/f/manifests/t"), None);
    }

    #[test]
    fn test_routes_parse_blob_and_upload_paths() {
        assert_eq!(
            parse_v2_tail("images/app/blobs/sha256:abc"),
            Some(RoutePath::Blob {
                repo: "images/app".to_string(),
                digest: "sha256:abc".to_string()
            })
        );
        assert_eq!(
            parse_v2_tail("images/app/blobs/uploads/"),
            Some(RoutePath::UploadStart {
                repo: "images/app".to_string()
            })
        );
        assert_eq!(
            parse_v2_tail("images/app/blobs/uploads"),
            Some(RoutePath::UploadStart {
                repo: "images/app".to_string()
            })
        );
        assert_eq!(
            parse_v2_tail("images/app/blobs/uploads/123e4567-e89b-12d3-a456-426614174000"),
            Some(RoutePath::Upload {
                repo: "images/app".to_string(),
                id: "123e4567-e89b-12d3-a456-426614174000".to_string()
            })
        );
    }

    #[test]
    fn test_routes_parse_tags_path() {
        assert_eq!(
            parse_v2_tail("charts/web/tags/list"),
            Some(RoutePath::Tags {
                repo: "charts/web".to_string()
            })
        );
    }

    #[test]
    fn test_routes_parse_rejects_malformed_tails() {
        assert_eq!(parse_v2_tail("just-a-repo"), None);
        assert_eq!(parse_v2_tail("manifests/latest"), None);
        assert_eq!(parse_v2_tail("a//manifests/t"), None);
        assert_eq!(parse_v2_tail(""), None);
    }
}
