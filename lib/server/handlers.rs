//! HTTP request handlers for the registry wire surface.
//!
//! Handlers validate wire inputs, try local resolution, and fall back to the
//! pull-through engine for `proxy/…` repositories. Cache bookkeeping that
//! cannot affect the bytes a client sees is logged and never fails a
//! request.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use oci_spec::image::Digest;
use tokio_util::io::ReaderStream;

use crate::{
    oci::{
        classify, declared_media_type, digest_bytes, validate_digest, validate_reference,
        validate_repository, validate_upload_id, ArtifactKind, ParsedManifest, Reference,
        OCI_MANIFEST_MEDIA_TYPE,
    },
    proxy::ProxiedBlob,
    store::{leaf_of, ManifestHome},
    utils::{HELM_REPO_PREFIX, PROXY_REPO_PREFIX},
    PortsideError, PortsideResult,
};

use super::{
    routes::{parse_v2_tail, RoutePath},
    state::ServerState,
    types::{
        error_response, header_value, ApiInfoResponse, CatalogResponse, ErrorEnvelope,
        HealthResponse, TagListResponse, WireError, DOCKER_CONTENT_DIGEST,
        DOCKER_DISTRIBUTION_API_VERSION, DOCKER_UPLOAD_UUID,
    },
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Content type served for blob bodies.
const OCTET_STREAM: &str = "application/octet-stream";

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `GET /v2/`, the API version check.
pub async fn base_handler() -> impl IntoResponse {
    (
        [(DOCKER_DISTRIBUTION_API_VERSION, "registry/2.0")],
        Json(ApiInfoResponse::current()),
    )
}

/// Handler for `GET /healthz`.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Handler for `GET /api/cache/stats`.
pub async fn cache_stats_handler(State(state): State<ServerState>) -> Response {
    match state.get_ledger().snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Handler for `GET /v2/_catalog`: chart repositories first, then image
/// repositories, deduplicated in insertion order.
pub async fn catalog_handler(State(state): State<ServerState>) -> Response {
    match catalog(&state).await {
        Ok(repositories) => Json(CatalogResponse { repositories }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Dispatcher for every repository-scoped `/v2/…` endpoint.
pub async fn dispatch_v2(
    State(state): State<ServerState>,
    Path(tail): Path<String>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    // Anything that fails to parse never reaches path construction;
    // traversal attempts that break the route shape die here with a 400
    let Some(route) = parse_v2_tail(&tail) else {
        return error_response(&PortsideError::InvalidRepository(tail));
    };

    match route {
        RoutePath::Tags { repo } if method == Method::GET => list_tags(&state, &repo).await,
        RoutePath::Manifest { repo, reference } if method == Method::GET => {
            get_manifest(&state, &repo, &reference, false).await
        }
        RoutePath::Manifest { repo, reference } if method == Method::HEAD => {
            get_manifest(&state, &repo, &reference, true).await
        }
        RoutePath::Manifest { repo, reference } if method == Method::PUT => {
            put_manifest(&state, &repo, &reference, body).await
        }
        RoutePath::Manifest { repo, reference } if method == Method::DELETE => {
            delete_manifest(&state, &repo, &reference).await
        }
        RoutePath::UploadStart { repo } if method == Method::POST => {
            start_upload(&state, &repo, &headers).await
        }
        RoutePath::Upload { repo, id } if method == Method::PATCH => {
            patch_upload(&state, &repo, &id, &headers, body).await
        }
        RoutePath::Upload { repo, id } if method == Method::PUT => {
            complete_upload(&state, &repo, &id, &uri, body).await
        }
        RoutePath::Blob { repo, digest } if method == Method::GET => {
            get_blob(&state, &repo, &digest, false).await
        }
        RoutePath::Blob { repo, digest } if method == Method::HEAD => {
            get_blob(&state, &repo, &digest, true).await
        }
        RoutePath::Blob { repo, digest } if method == Method::PUT => {
            put_blob_direct(&state, &repo, &digest, body).await
        }
        _ => method_not_allowed(),
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Manifest operations
//--------------------------------------------------------------------------------------------------

/// `GET`/`HEAD` of a manifest: local first, then pull-through for `proxy/…`
/// repositories. Both methods proxy; runtimes resolve tags with HEAD before
/// pulling.
async fn get_manifest(state: &ServerState, repo: &str, reference: &str, is_head: bool) -> Response {
    let (reference, lookup_repo) = match prepare_lookup(state, repo, reference) {
        Ok(prepared) => prepared,
        Err(e) => return error_response(&e),
    };

    let local = match &reference {
        Reference::Tag(tag) => state.get_manifests().find_by_tag(&lookup_repo, tag).await,
        Reference::Digest(digest) => {
            state
                .get_manifests()
                .find_by_digest(&lookup_repo, digest)
                .await
        }
    };

    match local {
        Ok(Some(bytes)) => {
            if lookup_repo.starts_with(PROXY_REPO_PREFIX) {
                if let Reference::Tag(tag) = &reference {
                    let ledger = state.get_ledger().clone();
                    let repo = lookup_repo.clone();
                    let tag = tag.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ledger.touch(&repo, &tag).await {
                            tracing::warn!("access-time update for {}:{} failed: {}", repo, tag, e);
                        }
                    });
                }
            }

            let digest = match digest_bytes(&bytes) {
                Ok(digest) => digest,
                Err(e) => return error_response(&e),
            };
            let content_type =
                declared_media_type(&bytes).unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string());
            manifest_response(bytes.into(), &content_type, &digest, is_head)
        }
        Ok(None) => {
            // Only proxy/ repositories pull through; charts/ and local image
            // repositories answer 404 on a miss
            if repo.starts_with(PROXY_REPO_PREFIX) {
                if let Some(proxy) = state.get_proxy() {
                    return match proxy.proxy_manifest(repo, &reference).await {
                        Ok(proxied) => manifest_response(
                            proxied.bytes,
                            &proxied.content_type,
                            &proxied.digest,
                            is_head,
                        ),
                        Err(e) => error_response(&e),
                    };
                }
            }
            error_response(&PortsideError::ManifestNotFound {
                repo: repo.to_string(),
                reference: reference.to_string(),
            })
        }
        Err(e) => error_response(&e),
    }
}

/// `PUT` of a manifest: byte-exact persistence, classification, and catalog
/// dispatch.
async fn put_manifest(state: &ServerState, repo: &str, reference: &str, body: Bytes) -> Response {
    if repo.starts_with(HELM_REPO_PREFIX) {
        return error_response(&PortsideError::ArtifactConflict(
            "manifests cannot be pushed to helm/ repositories; push charts to charts/".to_string(),
        ));
    }
    if let Err(e) = validate_repository(repo) {
        return error_response(&e);
    }
    let reference = match validate_reference(reference) {
        Ok(reference) => reference,
        Err(e) => return error_response(&e),
    };

    // The body must at least be JSON; a full parse decides the artifact
    // kind, and documents that fit no known shape pass through as Unknown
    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
        return error_response(&PortsideError::SerdeJson(e));
    }
    let parsed = ParsedManifest::parse(&body).ok();
    let kind = parsed.as_ref().map(classify).unwrap_or(ArtifactKind::Unknown);

    if let Some(ParsedManifest::Image(manifest)) = &parsed {
        if kind == ArtifactKind::DockerImage {
            // Layers already on disk must match their declared sizes;
            // absent layers are tolerated (cross-repository mounts)
            for layer in manifest.layers() {
                match state.get_blobs().stat(layer.digest()).await {
                    Ok(Some(actual)) if actual != layer.size() => {
                        return error_response(&PortsideError::BlobSizeMismatch {
                            digest: layer.digest().to_string(),
                            declared: layer.size(),
                            actual,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => return error_response(&e),
                }
            }
        }
    }

    let home = match kind {
        ArtifactKind::HelmChart => ManifestHome::Chart,
        _ => ManifestHome::Image,
    };
    let digest = match state
        .get_manifests()
        .put(repo, &reference.to_string(), &body, home)
        .await
    {
        Ok(digest) => digest,
        Err(e) => return error_response(&e),
    };

    dispatch_projection(state, repo, &reference, &digest, kind, parsed).await;

    (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                header_value(&format!("/v2/{}/manifests/{}", repo, digest), "/v2"),
            ),
            (
                DOCKER_CONTENT_DIGEST,
                header_value(&digest.to_string(), ""),
            ),
        ],
    )
        .into_response()
}

/// `DELETE` of a manifest tag: unlinks the tag's projection, manifest file,
/// and cache entry. Blobs stay in place.
async fn delete_manifest(state: &ServerState, repo: &str, reference: &str) -> Response {
    let (reference, lookup_repo) = match prepare_lookup(state, repo, reference) {
        Ok(prepared) => prepared,
        Err(e) => return error_response(&e),
    };

    let Reference::Tag(tag) = reference else {
        return error_response(&PortsideError::ArtifactConflict(
            "deletion is tag-scoped; digests cannot be deleted".to_string(),
        ));
    };

    if let Err(e) = state.get_images().delete(&lookup_repo, &tag).await {
        return error_response(&e);
    }
    if let Err(e) = state.get_ledger().remove(&lookup_repo, &tag).await {
        return error_response(&e);
    }

    StatusCode::ACCEPTED.into_response()
}

//--------------------------------------------------------------------------------------------------
// Functions: Blob operations
//--------------------------------------------------------------------------------------------------

/// `GET`/`HEAD` of a blob. GET misses under `proxy/…` pull through;
/// HEAD never proxies, so runtimes resolve missing content via GET.
async fn get_blob(state: &ServerState, repo: &str, digest: &str, is_head: bool) -> Response {
    if let Err(e) = validate_repository(repo) {
        return error_response(&e);
    }
    let digest = match validate_digest(digest) {
        Ok(digest) => digest,
        Err(e) => return error_response(&e),
    };

    match state.get_blobs().open_stream(&digest).await {
        Ok((file, size)) => {
            if is_head {
                return blob_head_response(&digest, size);
            }
            let stream = ReaderStream::new(file);
            blob_body_response(&digest, size, Body::from_stream(stream))
        }
        Err(_) => {
            if !is_head && repo.starts_with(PROXY_REPO_PREFIX) {
                if let Some(proxy) = state.get_proxy() {
                    return proxied_blob_response(proxy.proxy_blob(repo, &digest).await, &digest)
                        .await;
                }
            }
            error_response(&PortsideError::BlobNotFound(digest.to_string()))
        }
    }
}

/// `PUT /v2/<repo>/blobs/<digest>`: the direct, single-request blob put.
async fn put_blob_direct(state: &ServerState, repo: &str, digest: &str, body: Bytes) -> Response {
    if let Err(e) = validate_repository(repo) {
        return error_response(&e);
    }
    let claimed = match validate_digest(digest) {
        Ok(digest) => digest,
        Err(e) => return error_response(&e),
    };

    let computed = match digest_bytes(&body) {
        Ok(digest) => digest,
        Err(e) => return error_response(&e),
    };
    if computed.to_string() != claimed.to_string() {
        return error_response(&PortsideError::InvalidDigest(format!(
            "body hashes to {} but path claims {}",
            computed, claimed
        )));
    }

    if let Err(e) = state.get_blobs().put_direct(&body).await {
        return error_response(&e);
    }

    (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                header_value(&format!("/v2/{}/blobs/{}", repo, claimed), "/v2"),
            ),
            (
                DOCKER_CONTENT_DIGEST,
                header_value(&claimed.to_string(), ""),
            ),
        ],
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Functions: Upload session operations
//--------------------------------------------------------------------------------------------------

/// `POST /v2/<repo>/blobs/uploads/`: opens an upload session. The Location
/// is absolute because some image tooling requires it.
async fn start_upload(state: &ServerState, repo: &str, headers: &HeaderMap) -> Response {
    if let Err(e) = validate_repository(repo) {
        return error_response(&e);
    }

    let id = match state.get_blobs().begin_upload().await {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let location = format!(
        "{}/v2/{}/blobs/uploads/{}",
        request_base_url(headers),
        repo,
        id
    );

    (
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, header_value(&location, "/v2")),
            (header::RANGE, header_value("0-0", "0-0")),
            (DOCKER_UPLOAD_UUID, header_value(&id.to_string(), "")),
        ],
    )
        .into_response()
}

/// `PATCH /v2/<repo>/blobs/uploads/<uuid>`: appends a chunk and reports the
/// cumulative range.
async fn patch_upload(
    state: &ServerState,
    repo: &str,
    id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let id = match validate_upload_id(id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let total = match state.get_blobs().append_chunk(&id, &body).await {
        Ok(total) => total,
        Err(e) => return error_response(&e),
    };

    let location = format!(
        "{}/v2/{}/blobs/uploads/{}",
        request_base_url(headers),
        repo,
        id
    );

    (
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, header_value(&location, "/v2")),
            (
                header::RANGE,
                header_value(&format!("0-{}", total.saturating_sub(1)), "0-0"),
            ),
            (DOCKER_UPLOAD_UUID, header_value(&id.to_string(), "")),
        ],
    )
        .into_response()
}

/// `PUT /v2/<repo>/blobs/uploads/<uuid>?digest=…`: finalises the session.
/// Any request body is treated as trailing bytes of the blob.
async fn complete_upload(
    state: &ServerState,
    repo: &str,
    id: &str,
    uri: &Uri,
    body: Bytes,
) -> Response {
    let id = match validate_upload_id(id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let Some(claimed) = query_param(uri, "digest") else {
        return error_response(&PortsideError::InvalidDigest(
            "missing digest query parameter".to_string(),
        ));
    };
    let claimed = match validate_digest(&claimed) {
        Ok(digest) => digest,
        Err(e) => return error_response(&e),
    };

    let trailing = (!body.is_empty()).then_some(&body[..]);
    if let Err(e) = state
        .get_blobs()
        .finalize_upload(&id, &claimed, trailing)
        .await
    {
        return error_response(&e);
    }

    (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                header_value(&format!("/v2/{}/blobs/{}", repo, claimed), "/v2"),
            ),
            (
                DOCKER_CONTENT_DIGEST,
                header_value(&claimed.to_string(), ""),
            ),
        ],
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Functions: Listings
//--------------------------------------------------------------------------------------------------

/// `GET /v2/<repo>/tags/list`: the union of image tags and chart versions
/// for the repository's leaf name.
async fn list_tags(state: &ServerState, repo: &str) -> Response {
    if let Err(e) = validate_repository(repo) {
        return error_response(&e);
    }

    let lookup_repo = normalize_proxy_repo(state, repo);
    let mut tags = match state.get_manifests().list_image_tags(&lookup_repo).await {
        Ok(tags) => tags,
        Err(e) => return error_response(&e),
    };

    match state.get_charts().versions_of(&leaf_of(repo)).await {
        Ok(versions) => {
            for version in versions {
                if !tags.contains(&version) {
                    tags.push(version);
                }
            }
        }
        Err(e) => return error_response(&e),
    }

    Json(TagListResponse {
        name: repo.to_string(),
        tags,
    })
    .into_response()
}

/// Builds the catalog listing.
async fn catalog(state: &ServerState) -> PortsideResult<Vec<String>> {
    let mut repositories = state.get_charts().repository_names().await?;

    for repo in state.get_images().list_repositories().await? {
        if !repositories.contains(&repo) {
            repositories.push(repo);
        }
    }

    Ok(repositories)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Validates the repository and reference and resolves the repository name
/// used for local lookups, canonicalising `proxy/…` names.
fn prepare_lookup(
    state: &ServerState,
    repo: &str,
    reference: &str,
) -> PortsideResult<(Reference, String)> {
    validate_repository(repo)?;
    let reference = validate_reference(reference)?;
    Ok((reference, normalize_proxy_repo(state, repo)))
}

/// Canonicalises `proxy/…` repository names so both Docker Hub spellings
/// share one cache entry.
fn normalize_proxy_repo(state: &ServerState, repo: &str) -> String {
    if repo.starts_with(PROXY_REPO_PREFIX) {
        if let Some(proxy) = state.get_proxy() {
            return proxy.canonical_repo(repo);
        }
    }
    repo.to_string()
}

/// Writes the catalog projection for a stored manifest. Projection failures
/// never fail the push; the manifest itself is already durable.
async fn dispatch_projection(
    state: &ServerState,
    repo: &str,
    reference: &Reference,
    digest: &Digest,
    kind: ArtifactKind,
    parsed: Option<ParsedManifest>,
) {
    let result = match (&kind, &parsed, reference) {
        (ArtifactKind::HelmChart, Some(ParsedManifest::Image(manifest)), _) => {
            state
                .get_charts()
                .record_manifest(repo, reference, manifest)
                .await
        }
        (ArtifactKind::DockerImage, Some(ParsedManifest::Image(manifest)), Reference::Tag(tag)) => {
            state
                .get_images()
                .save_image(repo, tag, manifest, digest)
                .await
        }
        (ArtifactKind::ImageIndex, Some(ParsedManifest::Index(index)), Reference::Tag(tag)) => {
            let total: u64 = index.manifests().iter().map(|m| m.size()).sum();
            state
                .get_images()
                .save_index(repo, tag, index, digest, total)
                .await
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        tracing::warn!("projection for {}:{} not written: {}", repo, reference, e);
    }
}

/// The success response for a manifest, bytes omitted on HEAD.
fn manifest_response(bytes: Bytes, content_type: &str, digest: &Digest, is_head: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header_value(content_type, OCTET_STREAM),
    );
    headers.insert(
        DOCKER_CONTENT_DIGEST,
        header_value(&digest.to_string(), ""),
    );

    if is_head {
        headers.insert(header::CONTENT_LENGTH, bytes.len().into());
        (StatusCode::OK, headers).into_response()
    } else {
        (StatusCode::OK, headers, Body::from(bytes)).into_response()
    }
}

/// The success response for a blob HEAD.
fn blob_head_response(digest: &Digest, size: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(OCTET_STREAM, OCTET_STREAM));
    headers.insert(header::CONTENT_LENGTH, size.into());
    headers.insert(
        DOCKER_CONTENT_DIGEST,
        header_value(&digest.to_string(), ""),
    );
    (StatusCode::OK, headers).into_response()
}

/// The success response for a blob body.
fn blob_body_response(digest: &Digest, size: u64, body: Body) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(OCTET_STREAM, OCTET_STREAM));
    headers.insert(header::CONTENT_LENGTH, size.into());
    headers.insert(
        DOCKER_CONTENT_DIGEST,
        header_value(&digest.to_string(), ""),
    );
    (StatusCode::OK, headers, body).into_response()
}

/// Turns a pull-through blob result into a response.
async fn proxied_blob_response(
    result: PortsideResult<ProxiedBlob>,
    digest: &Digest,
) -> Response {
    match result {
        Ok(ProxiedBlob::Cached { path, size }) => match tokio::fs::File::open(&path).await {
            Ok(file) => blob_body_response(
                digest,
                size,
                Body::from_stream(ReaderStream::new(file)),
            ),
            Err(e) => error_response(&e.into()),
        },
        Ok(ProxiedBlob::Passthrough {
            stream,
            size,
            permit,
        }) => {
            // The permit rides inside the stream so upstream concurrency
            // stays bounded until the body finishes
            let stream = stream.map(move |chunk| {
                let _ = &permit;
                chunk
            });

            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                header_value(OCTET_STREAM, OCTET_STREAM),
            );
            if let Some(size) = size {
                headers.insert(header::CONTENT_LENGTH, size.into());
            }
            headers.insert(
                DOCKER_CONTENT_DIGEST,
                header_value(&digest.to_string(), ""),
            );
            (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// The scheme and authority for absolute Location URLs, taken from the
/// request's own headers.
fn request_base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

/// Reads one query parameter, percent-decoding applied.
fn query_param(uri: &Uri, name: &str) -> Option<String> {
    url::form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// A 405 with the OCI envelope.
fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorEnvelope {
            errors: vec![WireError {
                code: "UNSUPPORTED".to_string(),
                message: "method not allowed on this endpoint".to_string(),
            }],
        }),
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
