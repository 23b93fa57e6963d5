//! Per-(repository, tag) image metadata projections.
//!
//! Records here are presentation caches derived from manifests plus,
//! opportunistically, the image config blob. They can always be rebuilt from
//! manifests and blobs.

use chrono::{DateTime, Utc};
use getset::Getters;
use oci_spec::image::{Digest, ImageConfiguration, ImageIndex, ImageManifest};
use serde::{Deserialize, Serialize};
use tokio::fs;
use typed_builder::TypedBuilder;
use walkdir::WalkDir;

use crate::{
    oci::safe_reference,
    utils::{prune_empty_dirs, IMAGE_MANIFESTS_SUBDIR, IMAGE_TAGS_SUBDIR},
    PortsideResult,
};

use super::{BlobStore, StoreLayout};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A per-tag image record for listing.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct ImageRecord {
    /// The final path segment of the repository.
    pub(super) name: String,

    /// The full repository name.
    pub(super) repository: String,

    /// The tag this record describes.
    pub(super) tag: String,

    /// The canonical digest of the manifest.
    pub(super) digest: String,

    /// Config plus layer bytes for single-platform images; the supplied
    /// total for indexes.
    pub(super) size: u64,

    /// Creation timestamp from the image config, when readable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) created: Option<DateTime<Utc>>,

    /// Layer summaries; empty for image indexes.
    #[serde(default)]
    #[builder(default)]
    pub(super) layers: Vec<LayerSummary>,

    /// Platforms the record covers, as `os/arch` strings.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(super) platforms: Option<Vec<String>>,
}

/// A summary of one layer of an image manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct LayerSummary {
    /// The layer's digest.
    pub(super) digest: String,

    /// The layer's declared size.
    pub(super) size: u64,

    /// The layer's media type.
    pub(super) media_type: String,
}

/// Records per-tag image metadata and serves the image listing.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    layout: StoreLayout,
    blobs: BlobStore,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageCatalog {
    /// Creates an image catalog over the given layout and blob store.
    pub fn new(layout: StoreLayout, blobs: BlobStore) -> Self {
        Self { layout, blobs }
    }

    /// Persists the projection of a single-platform image manifest.
    ///
    /// The image config blob is consulted for the creation timestamp and
    /// platform; failures there are logged and ignored, the projection is
    /// written either way.
    pub async fn save_image(
        &self,
        repo: &str,
        tag: &str,
        manifest: &ImageManifest,
        digest: &Digest,
    ) -> PortsideResult<()> {
        let size =
            manifest.config().size() + manifest.layers().iter().map(|l| l.size()).sum::<u64>();

        let layers = manifest
            .layers()
            .iter()
            .map(|l| LayerSummary {
                digest: l.digest().to_string(),
                size: l.size(),
                media_type: l.media_type().to_string(),
            })
            .collect();

        let (created, platforms) = match self.read_config(manifest).await {
            Ok(config) => {
                let created = config
                    .created()
                    .as_ref()
                    .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                    .map(|c| c.with_timezone(&Utc));
                let platform = format!("{}/{}", config.os(), config.architecture());
                (created, Some(vec![platform]))
            }
            Err(e) => {
                tracing::debug!("image config unavailable for {}:{}: {}", repo, tag, e);
                (None, None)
            }
        };

        let record = ImageRecord {
            name: leaf_of(repo),
            repository: repo.to_string(),
            tag: tag.to_string(),
            digest: digest.to_string(),
            size,
            created,
            layers,
            platforms,
        };

        self.write_record(repo, tag, &record).await
    }

    /// Persists the projection of an image index.
    ///
    /// The index bytes themselves are already persisted by the manifest
    /// store; this writes only tag metadata. Layers stay empty and the size
    /// is the supplied total.
    pub async fn save_index(
        &self,
        repo: &str,
        tag: &str,
        index: &ImageIndex,
        digest: &Digest,
        total_size: u64,
    ) -> PortsideResult<()> {
        let platforms: Vec<String> = index
            .manifests()
            .iter()
            .filter_map(|m| m.platform().as_ref())
            .map(|p| format!("{}/{}", p.os(), p.architecture()))
            .collect();

        let record = ImageRecord {
            name: leaf_of(repo),
            repository: repo.to_string(),
            tag: tag.to_string(),
            digest: digest.to_string(),
            size: total_size,
            created: None,
            layers: Vec::new(),
            platforms: (!platforms.is_empty()).then_some(platforms),
        };

        self.write_record(repo, tag, &record).await
    }

    /// Lists every image record in the store. Unreadable records are logged
    /// and skipped.
    pub async fn list(&self) -> PortsideResult<Vec<ImageRecord>> {
        let images_dir = self.layout.images_dir();
        let mut records = Vec::new();

        for entry in WalkDir::new(&images_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let in_tags_dir = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n == IMAGE_TAGS_SUBDIR)
                .unwrap_or(false);
            if !in_tags_dir {
                continue;
            }

            match fs::read(path).await {
                Ok(bytes) => match serde_json::from_slice::<ImageRecord>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!("skipping unreadable image record {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    tracing::warn!("skipping unreadable image record {}: {}", path.display(), e)
                }
            }
        }

        records.sort_by(|a, b| (&a.repository, &a.tag).cmp(&(&b.repository, &b.tag)));
        Ok(records)
    }

    /// Lists the repository names present in the image tree, in directory
    /// order.
    pub async fn list_repositories(&self) -> PortsideResult<Vec<String>> {
        let images_dir = self.layout.images_dir();
        let mut repositories = Vec::new();

        for entry in WalkDir::new(&images_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let is_repo_marker = path
                .file_name()
                .map(|n| n == IMAGE_TAGS_SUBDIR || n == IMAGE_MANIFESTS_SUBDIR)
                .unwrap_or(false);
            if !is_repo_marker {
                continue;
            }
            if let Some(repo_dir) = path.parent() {
                if let Ok(relative) = repo_dir.strip_prefix(&images_dir) {
                    let name = relative.to_string_lossy().replace('\\', "/");
                    if !name.is_empty() && !repositories.contains(&name) {
                        repositories.push(name);
                    }
                }
            }
        }

        Ok(repositories)
    }

    /// Removes a tag's projection and manifest files, then prunes emptied
    /// directories up to the image root.
    pub async fn delete(&self, repo: &str, tag: &str) -> PortsideResult<()> {
        let tag_file = self.layout.image_tag_path(repo, tag);
        let manifest_file = self
            .layout
            .image_manifest_dir(repo)
            .join(format!("{}.json", safe_reference(tag)));

        for path in [&tag_file, &manifest_file] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        let images_dir = self.layout.images_dir();
        for dir in [
            self.layout.image_tags_dir(repo),
            self.layout.image_manifest_dir(repo),
        ] {
            prune_empty_dirs(&dir, &images_dir).await?;
        }

        Ok(())
    }

    /// Writes one projection file, creating parent directories on demand.
    async fn write_record(&self, repo: &str, tag: &str, record: &ImageRecord) -> PortsideResult<()> {
        let path = self.layout.image_tag_path(repo, tag);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_vec_pretty(record)?).await?;
        Ok(())
    }

    /// Reads and parses the image config blob a manifest points at.
    async fn read_config(&self, manifest: &ImageManifest) -> PortsideResult<ImageConfiguration> {
        let bytes = self.blobs.read(manifest.config().digest()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The final path segment of a repository name.
pub fn leaf_of(repo: &str) -> String {
    repo.rsplit('/').next().unwrap_or(repo).to_string()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
