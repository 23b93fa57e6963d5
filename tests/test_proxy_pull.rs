//! Pull-through tests against Docker Hub. These hit the network and are
//! ignored by default; run with `cargo test -- --ignored`.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use portside::{
    config::{Portside, ProxyConfig, StorageConfig},
    oci::{digest_bytes, validate_reference},
    proxy::ProxiedBlob,
    server::{create_router, ServerState},
    utils::sha256_hex,
};
use tower::util::ServiceExt;

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

async fn proxy_registry(dir: &tempfile::TempDir, enabled: bool) -> Router {
    let config = Portside::builder()
        .storage(
            StorageConfig::builder()
                .path(dir.path().to_path_buf())
                .build(),
        )
        .proxy(ProxyConfig::builder().enabled(enabled).build())
        .build();

    let state = ServerState::new(config).await.unwrap();
    create_router(state)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

/// Waits for the asynchronous cache writes a proxied fetch schedules.
async fn wait_for(path: &std::path::Path) -> bool {
    for _ in 0..50 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
#[ignore = "requires network access to Docker Hub"]
async fn test_proxy_pull_manifest_caches_locally() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let router = proxy_registry(&dir, true).await;

    let (status, body) = get(&router, "/v2/proxy/docker.io/library/alpine/manifests/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.is_empty());
    let digest = digest_bytes(&body)?;

    // The tag file and the cache entry land asynchronously under the
    // canonical repository name
    let tag_file = dir
        .path()
        .join("images/proxy/docker.io/library/alpine/manifests/latest.json");
    assert!(wait_for(&tag_file).await, "tag manifest was not cached");
    let entry_file = dir
        .path()
        .join("cache/metadata/proxy_docker.io_library_alpine_latest.json");
    assert!(wait_for(&entry_file).await, "cache entry was not written");

    // The entry's digest matches the bytes we served
    let entry: serde_json::Value = serde_json::from_slice(&std::fs::read(&entry_file)?)?;
    assert_eq!(entry["digest"], digest.to_string());
    assert!(entry["size"].as_u64().unwrap() > 0);

    // A registry over the same storage with proxying disabled still answers:
    // the content is local now
    let offline = proxy_registry(&dir, false).await;
    let (status, offline_body) =
        get(&offline, "/v2/proxy/docker.io/library/alpine/manifests/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offline_body, body);
    Ok(())
}

#[test_log::test(tokio::test)]
#[ignore = "requires network access to Docker Hub"]
async fn test_proxy_pull_short_name_shares_cache_with_library_form() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let router = proxy_registry(&dir, true).await;

    let (status, _) = get(&router, "/v2/proxy/docker.io/alpine/manifests/latest").await;
    assert_eq!(status, StatusCode::OK);

    // The cache entry lives under the canonical library/ name
    let entry_file = dir
        .path()
        .join("cache/metadata/proxy_docker.io_library_alpine_latest.json");
    assert!(wait_for(&entry_file).await);
    Ok(())
}

#[test_log::test(tokio::test)]
#[ignore = "requires network access to Docker Hub"]
async fn test_proxy_pull_blob_cached_with_exact_hash() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = Portside::builder()
        .storage(
            StorageConfig::builder()
                .path(dir.path().to_path_buf())
                .build(),
        )
        .build();
    let state = ServerState::new(config).await?;
    let proxy = state.get_proxy().as_ref().unwrap();

    // Resolve a real layer digest out of the current alpine index
    let manifest = proxy
        .proxy_manifest(
            "proxy/docker.io/library/alpine",
            &validate_reference("latest")?,
        )
        .await?;
    let index: serde_json::Value = serde_json::from_slice(&manifest.bytes)?;
    let child_digest = index["manifests"][0]["digest"].as_str().unwrap().to_string();

    let child = proxy
        .proxy_manifest(
            "proxy/docker.io/library/alpine",
            &validate_reference(&child_digest)?,
        )
        .await?;
    let child_manifest: serde_json::Value = serde_json::from_slice(&child.bytes)?;
    let layer = child_manifest["layers"][0].clone();
    let layer_digest = layer["digest"].as_str().unwrap();
    let layer_size = layer["size"].as_u64().unwrap();

    let blob = proxy
        .proxy_blob(
            "proxy/docker.io/library/alpine",
            &portside::oci::validate_digest(layer_digest)?,
        )
        .await?;

    match blob {
        ProxiedBlob::Cached { path, size } => {
            assert_eq!(size, layer_size);
            let bytes = std::fs::read(&path)?;
            assert_eq!(bytes.len() as u64, layer_size);
            assert_eq!(format!("sha256:{}", sha256_hex(&bytes)), layer_digest);
        }
        ProxiedBlob::Passthrough { .. } => panic!("expected the blob to be cached"),
    }
    Ok(())
}
