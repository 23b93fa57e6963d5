//! The pull-through engine: registry-name resolution, manifest and blob
//! proxying, multi-arch prefetch, and cache accounting writes.

use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;
use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use oci_spec::image::{Arch, Descriptor, Digest, ImageIndex, Os};
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};

use crate::{
    config::{ProxyConfig, BLOB_FETCH_TIMEOUT, PERMIT_WAIT_TIMEOUT, PREFETCH_TIMEOUT},
    helm::ChartCatalog,
    oci::{
        classify, digest_bytes, ArtifactKind, ParsedManifest, Reference,
        DOCKER_REFERENCE_TYPE_ANNOTATION,
    },
    store::{BlobStore, ImageCatalog, ManifestStore, ManifestHome},
    utils::sha256_file,
    PortsideError, PortsideResult,
};

use super::{CacheEntry, CacheLedger, ResolvedUpstream, UpstreamClient};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A manifest fetched through the proxy, ready to serve.
#[derive(Debug)]
pub struct ProxiedManifest {
    /// The exact bytes the upstream returned.
    pub bytes: Bytes,

    /// The upstream's content type.
    pub content_type: String,

    /// The computed digest of the bytes.
    pub digest: Digest,
}

/// A blob fetched through the proxy.
pub enum ProxiedBlob {
    /// The blob was cached completely and can be served from disk.
    Cached {
        /// The cache file holding the complete blob.
        path: PathBuf,

        /// The blob's size in bytes.
        size: u64,
    },

    /// Caching was impossible; the upstream stream is served directly. The
    /// permit rides along so upstream concurrency stays bounded while the
    /// response streams.
    Passthrough {
        /// The upstream byte stream.
        stream: BoxStream<'static, PortsideResult<Bytes>>,

        /// The upstream's declared content length, when known.
        size: Option<u64>,

        /// The fetch permit held until the stream is dropped.
        permit: OwnedSemaphorePermit,
    },
}

/// Pull-through for manifests and blobs under `proxy/…` repositories.
#[derive(Debug, Clone)]
pub struct RegistryProxy {
    upstream: Arc<UpstreamClient>,
    blobs: BlobStore,
    manifests: ManifestStore,
    images: ImageCatalog,
    charts: ChartCatalog,
    ledger: Arc<CacheLedger>,
    fetch_permits: Arc<Semaphore>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryProxy {
    /// Creates the proxy engine with a bounded upstream-fetch permit pool.
    pub fn new(
        config: &ProxyConfig,
        blobs: BlobStore,
        manifests: ManifestStore,
        images: ImageCatalog,
        charts: ChartCatalog,
        ledger: Arc<CacheLedger>,
    ) -> Self {
        Self {
            upstream: Arc::new(UpstreamClient::new(config)),
            blobs,
            manifests,
            images,
            charts,
            ledger,
            fetch_permits: Arc::new(Semaphore::new(*config.get_concurrency())),
        }
    }

    /// Returns the canonical local name of a proxy repository, so that
    /// `proxy/docker.io/nginx` and `proxy/docker.io/library/nginx` share one
    /// cache entry. Unresolvable names pass through unchanged.
    pub fn canonical_repo(&self, repo: &str) -> String {
        match self.upstream.resolve(repo) {
            Ok(upstream) => format!(
                "proxy/{}/{}",
                upstream.get_registry_name(),
                upstream.get_repository()
            ),
            Err(_) => repo.to_string(),
        }
    }

    /// Fetches a manifest from the upstream, schedules cache writes, and
    /// returns the bytes for the response.
    ///
    /// The digest-addressed blob copy is written asynchronously; for tag
    /// references the tag file, cache entry, catalog projection, and
    /// platform-child prefetch are scheduled as well. None of those writes
    /// delay or fail the response.
    pub async fn proxy_manifest(
        &self,
        repo: &str,
        reference: &Reference,
    ) -> PortsideResult<ProxiedManifest> {
        let upstream = self.upstream.resolve(repo)?;
        let canonical = format!(
            "proxy/{}/{}",
            upstream.get_registry_name(),
            upstream.get_repository()
        );

        let (bytes, content_type) = self
            .upstream
            .get_manifest(&upstream, &reference.to_string())
            .await?;
        let digest = digest_bytes(&bytes)?;

        {
            let blobs = self.blobs.clone();
            let bytes = bytes.clone();
            tokio::spawn(async move {
                if let Err(e) = blobs.put_direct(&bytes).await {
                    tracing::warn!("caching proxied manifest blob failed: {}", e);
                }
            });
        }

        if let Reference::Tag(tag) = reference {
            let engine = self.clone();
            let tag = tag.clone();
            let bytes = bytes.clone();
            let digest = digest.clone();
            tokio::spawn(async move {
                if let Err(e) = engine
                    .cache_tagged_manifest(&canonical, &tag, &bytes, &digest, &upstream)
                    .await
                {
                    tracing::warn!("cache accounting for {}:{} failed: {}", canonical, tag, e);
                }
            });
        }

        Ok(ProxiedManifest {
            bytes,
            content_type,
            digest,
        })
    }

    /// Fetches a blob from the upstream and serves it complete-then-serve:
    /// the stream is written to the cache file in full before the response
    /// body starts, so concurrent readers never observe truncated bytes from
    /// this request.
    ///
    /// When the cache file cannot even be created the blob streams straight
    /// through without caching. A copy failure removes the partial file.
    pub async fn proxy_blob(&self, repo: &str, digest: &Digest) -> PortsideResult<ProxiedBlob> {
        let permit = timeout(
            PERMIT_WAIT_TIMEOUT,
            self.fetch_permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PortsideError::PermitWaitTimeout)?
        .map_err(|_| PortsideError::PermitWaitTimeout)?;

        let upstream = self.upstream.resolve(repo)?;
        let (mut stream, declared_len) = self
            .upstream
            .get_blob(&upstream, digest, BLOB_FETCH_TIMEOUT)
            .await?;

        let target = self.blobs.path_of(digest);
        let mut file = match File::create(&target).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    "cannot create cache file {}, streaming without caching: {}",
                    target.display(),
                    e
                );
                return Ok(ProxiedBlob::Passthrough {
                    stream,
                    size: declared_len,
                    permit,
                });
            }
        };

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    tokio::fs::remove_file(&target).await.ok();
                    return Err(PortsideError::UpstreamCopyFailed(e.to_string()));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                tokio::fs::remove_file(&target).await.ok();
                return Err(PortsideError::UpstreamCopyFailed(e.to_string()));
            }
        }
        file.flush().await?;
        let size = file.metadata().await?.len();
        drop(file);
        drop(permit);

        let actual = sha256_file(&target).await?;
        if actual != digest.digest() {
            tokio::fs::remove_file(&target).await.ok();
            return Err(PortsideError::UpstreamCopyFailed(format!(
                "cached bytes hash to sha256:{} instead of {}",
                actual, digest
            )));
        }

        Ok(ProxiedBlob::Cached { path: target, size })
    }

    /// Picks the index child matching the requesting client's platform:
    /// `linux/arm64` for arm64 user agents, `linux/amd64` otherwise, falling
    /// back to `linux/amd64` and then the first child.
    pub fn resolve_platform_child<'a>(
        index: &'a ImageIndex,
        user_agent: Option<&str>,
    ) -> Option<&'a Descriptor> {
        let wanted = user_agent
            .map(|ua| {
                let ua = ua.to_ascii_lowercase();
                if ua.contains("arm64") || ua.contains("aarch64") {
                    Arch::ARM64
                } else {
                    Arch::Amd64
                }
            })
            .unwrap_or(Arch::Amd64);

        find_linux_child(index, &wanted)
            .or_else(|| find_linux_child(index, &Arch::Amd64))
            .or_else(|| index.manifests().first())
    }

    /// Writes the per-tag artefacts for a proxied tag fetch: the tag file,
    /// the cache-ledger entry, the catalog projection, and (for indexes) the
    /// platform-child prefetch.
    async fn cache_tagged_manifest(
        &self,
        repo: &str,
        tag: &str,
        bytes: &[u8],
        digest: &Digest,
        upstream: &ResolvedUpstream,
    ) -> PortsideResult<()> {
        let parsed = ParsedManifest::parse(bytes)?;
        let kind = classify(&parsed);

        let home = match kind {
            ArtifactKind::HelmChart => ManifestHome::Chart,
            _ => ManifestHome::Image,
        };
        self.manifests.put(repo, tag, bytes, home).await?;

        let size = match &parsed {
            ParsedManifest::Image(manifest) => {
                manifest.layers().iter().map(|l| l.size()).sum::<u64>()
            }
            ParsedManifest::Index(index) => self.index_total_size(upstream, index).await,
        };

        let now = Utc::now();
        let entry = CacheEntry::builder()
            .name(repo.to_string())
            .tag(tag.to_string())
            .digest(digest.to_string())
            .registry(upstream.get_registry_name().clone())
            .upstream_ref(format!("{}:{}", upstream.get_repository(), tag))
            .size(size)
            .first_cached(now)
            .last_accessed(now)
            .access_count(1)
            .build();
        self.ledger.add(entry).await?;

        match (&kind, &parsed) {
            (ArtifactKind::ImageIndex, ParsedManifest::Index(index)) => {
                self.images
                    .save_index(repo, tag, index, digest, size)
                    .await?;
                self.spawn_platform_prefetch(upstream.clone(), index.clone());
            }
            (ArtifactKind::DockerImage, ParsedManifest::Image(manifest)) => {
                self.images.save_image(repo, tag, manifest, digest).await?;
            }
            (ArtifactKind::HelmChart, ParsedManifest::Image(manifest)) => {
                self.charts
                    .record_manifest(repo, &Reference::Tag(tag.to_string()), manifest)
                    .await?;
            }
            _ => {
                tracing::debug!("no indexer for proxied manifest {}:{}", repo, tag);
            }
        }

        Ok(())
    }

    /// Schedules background fetches of the `linux/amd64` and `linux/arm64`
    /// children of a freshly cached index. Failures are logged, never
    /// propagated.
    fn spawn_platform_prefetch(&self, upstream: ResolvedUpstream, index: ImageIndex) {
        let engine = self.clone();

        tokio::spawn(async move {
            for child in index.manifests() {
                if !is_prefetch_platform(child) || is_attestation(child) {
                    continue;
                }

                let child_digest = child.digest().to_string();
                match timeout(
                    PREFETCH_TIMEOUT,
                    engine.upstream.get_manifest(&upstream, &child_digest),
                )
                .await
                {
                    Ok(Ok((bytes, _))) => {
                        if let Err(e) = engine.blobs.put_direct(&bytes).await {
                            tracing::warn!("prefetch store of {} failed: {}", child_digest, e);
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("prefetch of {} failed: {}", child_digest, e);
                    }
                    Err(_) => {
                        tracing::warn!("prefetch of {} timed out", child_digest);
                    }
                }
            }
        });
    }

    /// Computes the accounted size of an index: the `linux/amd64` child's
    /// config-plus-layer sum when that manifest is fetchable, otherwise the
    /// sum of child descriptor sizes. Non-zero whenever a child resolves.
    async fn index_total_size(&self, upstream: &ResolvedUpstream, index: &ImageIndex) -> u64 {
        let preferred = find_linux_child(index, &Arch::Amd64);

        if let Some(child) = preferred {
            if let Ok((bytes, _)) = self
                .upstream
                .get_manifest(upstream, &child.digest().to_string())
                .await
            {
                if let Ok(ParsedManifest::Image(manifest)) = ParsedManifest::parse(&bytes) {
                    return manifest.config().size()
                        + manifest.layers().iter().map(|l| l.size()).sum::<u64>();
                }
            }
        }

        index.manifests().iter().map(|m| m.size()).sum()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Finds a non-attestation `linux/<arch>` child in an index.
fn find_linux_child<'a>(index: &'a ImageIndex, arch: &Arch) -> Option<&'a Descriptor> {
    index.manifests().iter().find(|m| {
        m.platform()
            .as_ref()
            .map(|p| matches!(p.os(), Os::Linux) && p.architecture() == arch)
            .unwrap_or(false)
            && !is_attestation(m)
    })
}

/// Reports whether a child descriptor is an attestation manifest rather
/// than a runnable platform image.
fn is_attestation(descriptor: &Descriptor) -> bool {
    descriptor
        .annotations()
        .as_ref()
        .map(|a| a.contains_key(DOCKER_REFERENCE_TYPE_ANNOTATION))
        .unwrap_or(false)
}

/// Reports whether a child descriptor is one of the platforms worth
/// prefetching.
fn is_prefetch_platform(descriptor: &Descriptor) -> bool {
    descriptor
        .platform()
        .as_ref()
        .map(|p| {
            matches!(p.os(), Os::Linux)
                && (*p.architecture() == Arch::Amd64 || *p.architecture() == Arch::ARM64)
        })
        .unwrap_or(false)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
