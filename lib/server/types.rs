//! Wire types for the registry API: the OCI error envelope, info and
//! listing responses, and custom header names.

use axum::{
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::PortsideError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The digest header attached to manifest and blob responses.
pub const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// The upload session header attached to every upload transition.
pub const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// The API version marker header.
pub const DOCKER_DISTRIBUTION_API_VERSION: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The response of the API info endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiInfoResponse {
    /// The registry API version.
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Whether responses carry the digest header.
    #[serde(rename = "docker-content-digest")]
    pub docker_content_digest: bool,

    /// The distribution spec revision implemented.
    #[serde(rename = "oci-distribution-spec")]
    pub oci_distribution_spec: String,
}

/// The response of the catalog endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogResponse {
    /// All repository names, charts first, insertion-order preserved.
    pub repositories: Vec<String>,
}

/// The response of the tag listing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct TagListResponse {
    /// The repository the tags belong to.
    pub name: String,

    /// The tags.
    pub tags: Vec<String>,
}

/// The response of the liveness endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves.
    pub status: String,
}

/// The OCI error envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The errors the request produced.
    pub errors: Vec<WireError>,
}

/// One error inside the envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireError {
    /// The machine-readable error code.
    pub code: String,

    /// The human-readable message.
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ApiInfoResponse {
    /// The info this registry advertises.
    pub fn current() -> Self {
        Self {
            api_version: "2.0".to_string(),
            docker_content_digest: true,
            oci_distribution_spec: "v1.0".to_string(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps an error to its wire status and OCI error code.
pub fn error_code(err: &PortsideError) -> (StatusCode, &'static str) {
    match err {
        PortsideError::InvalidDigest(_) => (StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
        PortsideError::InvalidRepository(_) => (StatusCode::BAD_REQUEST, "NAME_INVALID"),
        PortsideError::InvalidReference(_) => (StatusCode::BAD_REQUEST, "TAG_INVALID"),
        PortsideError::InvalidUploadId(_) => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
        PortsideError::EmptyChunk => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
        PortsideError::UploadSessionNotFound(_) => {
            (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_UNKNOWN")
        }
        PortsideError::BlobSizeMismatch { .. } => (StatusCode::BAD_REQUEST, "BLOB_SIZE_MISMATCH"),
        PortsideError::ArtifactConflict(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED"),
        PortsideError::SerdeJson(_) => (StatusCode::BAD_REQUEST, "MANIFEST_INVALID"),
        PortsideError::ManifestNotFound { .. } => (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN"),
        PortsideError::BlobNotFound(_) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
        PortsideError::ChartNotFound { .. } | PortsideError::ChartValuesMissing { .. } => {
            (StatusCode::NOT_FOUND, "NAME_UNKNOWN")
        }
        PortsideError::PermitWaitTimeout => (StatusCode::REQUEST_TIMEOUT, "TOOMANYREQUESTS"),
        PortsideError::UpstreamStatus { .. }
        | PortsideError::UpstreamUnauthorized(_)
        | PortsideError::UpstreamNotConfigured(_)
        | PortsideError::UpstreamCopyFailed(_)
        | PortsideError::HttpRequest(_)
        | PortsideError::HttpMiddleware(_) => (StatusCode::BAD_GATEWAY, "UNKNOWN"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN"),
    }
}

/// Builds the wire response for an error.
pub fn error_response(err: &PortsideError) -> Response {
    let (status, code) = error_code(err);
    if status.is_server_error() {
        tracing::error!("request failed: {}", err);
    }

    (
        status,
        Json(ErrorEnvelope {
            errors: vec![WireError {
                code: code.to_string(),
                message: err.to_string(),
            }],
        }),
    )
        .into_response()
}

/// Builds a header value, falling back when the input is not valid header
/// material.
pub fn header_value(value: &str, fallback: &'static str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static(fallback))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_error_code_mapping() {
        let (status, code) = error_code(&PortsideError::BlobSizeMismatch {
            digest: "sha256:aa".to_string(),
            declared: 9999,
            actual: 55,
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "BLOB_SIZE_MISMATCH");

        let (status, _) = error_code(&PortsideError::PermitWaitTimeout);
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        let (status, _) = error_code(&PortsideError::UpstreamStatus {
            status: 500,
            body: String::new(),
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_types_api_info_serialises_wire_keys() {
        let json = serde_json::to_value(ApiInfoResponse::current()).unwrap();
        assert_eq!(json["apiVersion"], "2.0");
        assert_eq!(json["docker-content-digest"], true);
        assert_eq!(json["oci-distribution-spec"], "v1.0");
    }

    #[test]
    fn test_types_header_value_fallback() {
        assert_eq!(
            header_value("application/json", "application/octet-stream"),
            HeaderValue::from_static("application/json")
        );
        assert_eq!(
            header_value("bad\nvalue", "application/octet-stream"),
            HeaderValue::from_static("application/octet-stream")
        );
    }
}
