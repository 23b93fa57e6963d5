use std::path::PathBuf;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a portside-related operation.
pub type PortsideResult<T> = Result<T, PortsideError>;

/// An error that occurred during a registry operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum PortsideError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred when a Serde JSON error occurred.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error that occurred when a Serde YAML error occurred.
    #[error("serde yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    /// An error that occurred when an invalid digest was supplied.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// An error that occurred when an invalid repository name was supplied.
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// An error that occurred when an invalid tag or digest reference was supplied.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// An error that occurred when an invalid upload session id was supplied.
    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    /// An error that occurred when an upload chunk carried no bytes.
    #[error("empty upload chunk")]
    EmptyChunk,

    /// An error that occurred when no staged upload exists for the given id.
    #[error("unknown upload session: {0}")]
    UploadSessionNotFound(String),

    /// An error that occurred when a manifest was not found.
    #[error("manifest not found: {repo}:{reference}")]
    ManifestNotFound {
        /// The repository that was consulted.
        repo: String,
        /// The tag or digest reference that missed.
        reference: String,
    },

    /// An error that occurred when a blob was not found.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// An error that occurred when a manifest declared a layer size that
    /// disagrees with the blob already on disk.
    #[error("blob size mismatch for {digest}: manifest declares {declared}, stored {actual}")]
    BlobSizeMismatch {
        /// The digest of the offending layer.
        digest: String,
        /// The size the manifest declared.
        declared: u64,
        /// The size of the blob on disk.
        actual: u64,
    },

    /// An error that occurred when an artifact was pushed to a repository
    /// family that cannot hold it.
    #[error("artifact type conflict: {0}")]
    ArtifactConflict(String),

    /// An error that occurred when the upstream registry answered with a
    /// non-success status.
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus {
        /// The HTTP status code the upstream returned.
        status: u16,
        /// The response body, for diagnostics.
        body: String,
    },

    /// An error that occurred when the bearer-token flow against the
    /// upstream failed permanently.
    #[error("upstream authentication failed: {0}")]
    UpstreamUnauthorized(String),

    /// An error that occurred when no upstream registry is configured for a
    /// proxy repository.
    #[error("no upstream registry configured for {0}")]
    UpstreamNotConfigured(String),

    /// An error that occurred when caching a proxied blob failed mid-copy.
    #[error("upstream blob copy failed: {0}")]
    UpstreamCopyFailed(String),

    /// An error that occurred when the caller timed out waiting for an
    /// upstream fetch permit.
    #[error("timed out waiting for an upstream fetch permit")]
    PermitWaitTimeout,

    /// An error that occurred when a chart archive was missing.
    #[error("chart not found: {name}-{version}")]
    ChartNotFound {
        /// The chart name.
        name: String,
        /// The chart version.
        version: String,
    },

    /// An error that occurred when a chart archive carries no `values.yaml`.
    #[error("chart has no values.yaml: {name}-{version}")]
    ChartValuesMissing {
        /// The chart name.
        name: String,
        /// The chart version.
        version: String,
    },

    /// An error that occurred when a chart archive could not be unpacked.
    #[error("chart archive error: {0}")]
    ChartArchive(String),

    /// An error that occurred when a configuration validation error occurred.
    #[error("configuration validation error: {0}")]
    ConfigValidation(String),

    /// An error that occurred when a configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
}
