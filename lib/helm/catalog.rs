//! The chart catalog: unpacks pushed chart layers into the chart directory
//! and serves the grouped chart listing.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use getset::Getters;
use oci_spec::image::ImageManifest;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    oci::{Reference, HELM_CHART_CONTENT_MEDIA_TYPE},
    store::{leaf_of, BlobStore, StoreLayout},
    PortsideError, PortsideResult,
};

use super::{extract_chart_record, extract_chart_values, ChartRecord, RepoIndexWriter};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One chart name with its versions, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ChartGroup {
    /// The chart name.
    pub(super) name: String,

    /// The chart versions, semver-descending.
    pub(super) versions: Vec<ChartRecord>,
}

/// Unpacks helm chart layers and maintains the chart listing.
///
/// The repository index writer is wired after construction; the catalog is
/// usable without one, it just skips index regeneration.
#[derive(Debug, Clone)]
pub struct ChartCatalog {
    layout: StoreLayout,
    blobs: BlobStore,
    index_writer: Arc<RwLock<Option<Arc<dyn RepoIndexWriter>>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ChartCatalog {
    /// Creates a chart catalog over the given layout and blob store.
    pub fn new(layout: StoreLayout, blobs: BlobStore) -> Self {
        Self {
            layout,
            blobs,
            index_writer: Arc::new(RwLock::new(None)),
        }
    }

    /// Wires the repository index writer. Separate from construction so the
    /// writer can itself depend on the catalog's storage layout.
    pub fn set_index_writer(&self, writer: Arc<dyn RepoIndexWriter>) {
        if let Ok(mut guard) = self.index_writer.write() {
            *guard = Some(writer);
        }
    }

    /// Handles a pushed or proxied helm manifest: locates the chart content
    /// layer, reads its bytes, and files the archive under
    /// `<name>-<version>.tgz`.
    ///
    /// When the reference is a digest the stored version comes from the
    /// archive's own `Chart.yaml`; a tag reference is used verbatim.
    pub async fn record_manifest(
        &self,
        repo: &str,
        reference: &Reference,
        manifest: &ImageManifest,
    ) -> PortsideResult<()> {
        let layer = manifest
            .layers()
            .iter()
            .find(|l| l.media_type().to_string() == HELM_CHART_CONTENT_MEDIA_TYPE)
            .ok_or_else(|| {
                PortsideError::ArtifactConflict(format!(
                    "helm manifest for {} has no chart content layer",
                    repo
                ))
            })?;

        let tgz = self.blobs.read(layer.digest()).await?;

        let version = match reference {
            Reference::Tag(tag) => tag.clone(),
            Reference::Digest(_) => extract_chart_record(&tgz)?.get_version().clone(),
        };

        let name = leaf_of(repo);
        let path = self.layout.chart_archive_path(&name, &version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &tgz).await?;

        tracing::info!("stored chart {}-{}", name, version);
        self.refresh_index().await;

        Ok(())
    }

    /// Lists all charts grouped by name (alphabetical), versions
    /// semver-descending. Archives that fail to parse are logged and
    /// skipped.
    pub async fn list(&self) -> PortsideResult<Vec<ChartGroup>> {
        let mut by_name: BTreeMap<String, Vec<ChartRecord>> = BTreeMap::new();

        let mut entries = match fs::read_dir(self.layout.charts_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tgz") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("skipping unreadable chart {}: {}", path.display(), e);
                    continue;
                }
            };
            match extract_chart_record(&bytes) {
                Ok(record) => by_name
                    .entry(record.get_name().clone())
                    .or_default()
                    .push(record),
                Err(e) => {
                    tracing::warn!("skipping unparsable chart {}: {}", path.display(), e);
                }
            }
        }

        Ok(by_name
            .into_iter()
            .map(|(name, mut versions)| {
                versions
                    .sort_by(|a, b| compare_versions_desc(a.get_version(), b.get_version()));
                ChartGroup { name, versions }
            })
            .collect())
    }

    /// Lists the versions of one chart, newest first.
    pub async fn versions_of(&self, name: &str) -> PortsideResult<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|g| g.name == name)
            .flat_map(|g| g.versions)
            .map(|r| r.get_version().clone())
            .collect())
    }

    /// Lists chart repository names as `charts/<name>`.
    pub async fn repository_names(&self) -> PortsideResult<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|g| format!("charts/{}", g.name))
            .collect())
    }

    /// Returns the `values.yaml` of one chart version.
    pub async fn values(&self, name: &str, version: &str) -> PortsideResult<String> {
        let path = self.layout.chart_archive_path(name, version);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortsideError::ChartNotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        extract_chart_values(&bytes)?.ok_or_else(|| PortsideError::ChartValuesMissing {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Regenerates the repository index after a chart mutation. Failures do
    /// not affect the primary operation.
    async fn refresh_index(&self) {
        let writer = match self.index_writer.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        let Some(writer) = writer else { return };

        match self.list().await {
            Ok(groups) => {
                if let Err(e) = writer.publish(&groups).await {
                    tracing::warn!("repository index regeneration failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("chart listing for index regeneration failed: {}", e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Orders versions newest-first: semver when both sides parse, reverse
/// lexicographic otherwise.
fn compare_versions_desc(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => b.cmp(a),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::chart::tests::build_chart_tgz;
    use crate::oci::digest_bytes;

    async fn catalog() -> (tempfile::TempDir, ChartCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::create(dir.path()).await.unwrap();
        let blobs = BlobStore::new(layout.clone());
        (dir, ChartCatalog::new(layout, blobs))
    }

    fn helm_manifest(layer_digest: &str, size: u64) -> ImageManifest {
        serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.cncf.helm.config.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 10
            },
            "layers": [{
                "mediaType": HELM_CHART_CONTENT_MEDIA_TYPE,
                "digest": layer_digest,
                "size": size
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_chart_catalog_records_tagged_manifest() -> anyhow::Result<()> {
        let (dir, catalog) = catalog().await;
        let tgz = build_chart_tgz("web", "1.4.0", true);
        let digest = catalog.blobs.put_direct(&tgz).await?;

        let manifest = helm_manifest(&digest.to_string(), tgz.len() as u64);
        catalog
            .record_manifest(
                "charts/web",
                &Reference::Tag("1.4.0".to_string()),
                &manifest,
            )
            .await?;

        assert!(dir.path().join("charts/web-1.4.0.tgz").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_chart_catalog_digest_reference_uses_archive_version() -> anyhow::Result<()> {
        let (dir, catalog) = catalog().await;
        let tgz = build_chart_tgz("web", "2.0.0-rc.1", true);
        let digest = catalog.blobs.put_direct(&tgz).await?;

        let manifest = helm_manifest(&digest.to_string(), tgz.len() as u64);
        let reference = Reference::Digest(digest_bytes(b"manifest")?);
        catalog
            .record_manifest("charts/web", &reference, &manifest)
            .await?;

        assert!(dir.path().join("charts/web-2.0.0-rc.1.tgz").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_chart_catalog_rejects_manifest_without_chart_layer() -> anyhow::Result<()> {
        let (_dir, catalog) = catalog().await;
        let manifest: ImageManifest = serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": "application/vnd.cncf.helm.config.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 10
            },
            "layers": []
        }))?;

        assert!(matches!(
            catalog
                .record_manifest("charts/web", &Reference::Tag("1.0.0".into()), &manifest)
                .await,
            Err(PortsideError::ArtifactConflict(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_chart_catalog_lists_grouped_semver_descending() -> anyhow::Result<()> {
        let (dir, catalog) = catalog().await;
        for (name, version) in [
            ("web", "1.2.0"),
            ("web", "1.10.0"),
            ("web", "0.9.0"),
            ("api", "3.0.0"),
        ] {
            let tgz = build_chart_tgz(name, version, true);
            tokio::fs::write(
                dir.path().join(format!("charts/{}-{}.tgz", name, version)),
                &tgz,
            )
            .await?;
        }

        let groups = catalog.list().await?;
        assert_eq!(groups.len(), 2);
        // Groups alphabetical
        assert_eq!(groups[0].get_name(), "api");
        assert_eq!(groups[1].get_name(), "web");
        // Versions semver-descending: 1.10.0 beats 1.2.0
        let versions: Vec<&str> = groups[1]
            .get_versions()
            .iter()
            .map(|r| r.get_version().as_str())
            .collect();
        assert_eq!(versions, vec!["1.10.0", "1.2.0", "0.9.0"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_chart_catalog_unparsable_versions_sort_reverse_lexicographic() {
        let mut versions = vec!["build-a".to_string(), "build-c".to_string(), "build-b".to_string()];
        versions.sort_by(|a, b| compare_versions_desc(a, b));
        assert_eq!(versions, vec!["build-c", "build-b", "build-a"]);
    }

    #[tokio::test]
    async fn test_chart_catalog_values() -> anyhow::Result<()> {
        let (dir, catalog) = catalog().await;
        let tgz = build_chart_tgz("web", "1.0.0", true);
        tokio::fs::write(dir.path().join("charts/web-1.0.0.tgz"), &tgz).await?;
        let bare = build_chart_tgz("bare", "1.0.0", false);
        tokio::fs::write(dir.path().join("charts/bare-1.0.0.tgz"), &bare).await?;

        assert_eq!(catalog.values("web", "1.0.0").await?, "replicaCount: 1\n");
        assert!(matches!(
            catalog.values("bare", "1.0.0").await,
            Err(PortsideError::ChartValuesMissing { .. })
        ));
        assert!(matches!(
            catalog.values("ghost", "9.9.9").await,
            Err(PortsideError::ChartNotFound { .. })
        ));
        Ok(())
    }
}
