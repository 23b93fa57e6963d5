//! Byte-exact manifest persistence.
//!
//! Every manifest write lands twice: once in the blob store under the
//! content's digest (children of an image index are fetched by digest, so
//! the digest-addressed copy makes that lookup O(1)) and once under the
//! repository as a tag-or-reference file. Both copies hold the exact bytes
//! received on the wire.

use oci_spec::image::Digest;
use tokio::fs;

use crate::{oci::safe_digest, utils::sha256_file, PortsideResult};

use super::{BlobStore, StoreLayout};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which repository family a manifest's tag file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestHome {
    /// Helm chart manifests, under the chart manifest tree.
    Chart,

    /// Image manifests, under the per-repository image manifest directory.
    Image,
}

/// Byte-exact manifest persistence keyed by (repo, reference) and digest.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    layout: StoreLayout,
    blobs: BlobStore,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestStore {
    /// Creates a manifest store over the given layout and blob store.
    pub fn new(layout: StoreLayout, blobs: BlobStore) -> Self {
        Self { layout, blobs }
    }

    /// Persists manifest bytes under both the content digest and the
    /// (repo, reference) file, returning the computed digest.
    pub async fn put(
        &self,
        repo: &str,
        reference: &str,
        bytes: &[u8],
        home: ManifestHome,
    ) -> PortsideResult<Digest> {
        let digest = self.blobs.put_direct(bytes).await?;

        let path = match home {
            ManifestHome::Chart => self.layout.chart_manifest_path(repo, reference),
            ManifestHome::Image => self.layout.image_manifest_path(repo, reference),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        Ok(digest)
    }

    /// Looks a manifest up by tag: the chart tree first, then the image
    /// tree.
    pub async fn find_by_tag(&self, repo: &str, tag: &str) -> PortsideResult<Option<Vec<u8>>> {
        for path in [
            self.layout.chart_manifest_path(repo, tag),
            self.layout.image_manifest_path(repo, tag),
        ] {
            match fs::read(&path).await {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Looks a manifest up by digest.
    ///
    /// Consults, in order: the blob path (fast path), the repository's image
    /// manifest directory, the repository's chart manifest directory, and
    /// finally a scan of both directories hashing each file. The scan trades
    /// performance for correctness and only runs when everything else
    /// missed.
    pub async fn find_by_digest(
        &self,
        repo: &str,
        digest: &Digest,
    ) -> PortsideResult<Option<Vec<u8>>> {
        if let Ok(bytes) = self.blobs.read(digest).await {
            return Ok(Some(bytes));
        }

        let safe_name = format!("{}.json", safe_digest(digest));
        for dir in [
            self.layout.image_manifest_dir(repo),
            self.layout.chart_manifest_dir(repo),
        ] {
            match fs::read(dir.join(&safe_name)).await {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.scan_for_digest(repo, digest).await
    }

    /// Lists the tags of an image repository from on-disk manifest
    /// filenames, excluding digest-keyed files.
    pub async fn list_image_tags(&self, repo: &str) -> PortsideResult<Vec<String>> {
        let dir = self.layout.image_manifest_dir(repo);
        let mut tags = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tags),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                if !stem.starts_with("sha256_") {
                    tags.push(stem.to_string());
                }
            }
        }

        tags.sort();
        Ok(tags)
    }

    /// Degraded lookup path: hash every manifest file in the repository
    /// until one matches.
    async fn scan_for_digest(
        &self,
        repo: &str,
        digest: &Digest,
    ) -> PortsideResult<Option<Vec<u8>>> {
        for dir in [
            self.layout.image_manifest_dir(repo),
            self.layout.chart_manifest_dir(repo),
        ] {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match sha256_file(&path).await {
                    Ok(hash) if hash == digest.digest() => {
                        tracing::debug!(
                            "digest {} resolved by directory scan in {}",
                            digest,
                            dir.display()
                        );
                        return Ok(Some(fs::read(&path).await?));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("skipping unreadable manifest {}: {}", path.display(), e);
                    }
                }
            }
        }
        Ok(None)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest_bytes;

    async fn store() -> (tempfile::TempDir, ManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::create(dir.path()).await.unwrap();
        let blobs = BlobStore::new(layout.clone());
        (dir, ManifestStore::new(layout, blobs))
    }

    #[tokio::test]
    async fn test_manifest_put_preserves_bytes_exactly() -> anyhow::Result<()> {
        let (_dir, store) = store().await;
        // Odd spacing must survive: the stored form is never re-serialised
        let bytes = br#"{ "schemaVersion": 2,   "layers": [] }"#;

        let digest = store
            .put("images/app", "v1", bytes, ManifestHome::Image)
            .await?;

        assert_eq!(digest, digest_bytes(bytes)?);
        assert_eq!(
            store.find_by_tag("images/app", "v1").await?.as_deref(),
            Some(bytes.as_slice())
        );
        assert_eq!(
            store
                .find_by_digest("images/app", &digest)
                .await?
                .as_deref(),
            Some(bytes.as_slice())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_manifest_chart_home_and_tag_lookup_order() -> anyhow::Result<()> {
        let (_dir, store) = store().await;
        let chart = br#"{"chart": true}"#;

        store
            .put("charts/app", "1.0.0", chart, ManifestHome::Chart)
            .await?;

        assert_eq!(
            store.find_by_tag("charts/app", "1.0.0").await?.as_deref(),
            Some(chart.as_slice())
        );
        assert_eq!(store.find_by_tag("charts/app", "2.0.0").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_manifest_find_by_digest_falls_back_to_scan() -> anyhow::Result<()> {
        let (dir, store) = store().await;
        let bytes = br#"{"schemaVersion":2}"#;
        let digest = digest_bytes(bytes)?;

        // Simulate a manifest present only as a tag file: no blob copy, no
        // digest-named file
        let tag_path = store.layout.image_manifest_path("images/app", "v2");
        fs::create_dir_all(tag_path.parent().unwrap()).await?;
        fs::write(&tag_path, bytes).await?;

        assert_eq!(
            store
                .find_by_digest("images/app", &digest)
                .await?
                .as_deref(),
            Some(bytes.as_slice())
        );

        drop(dir);
        Ok(())
    }

    #[tokio::test]
    async fn test_manifest_list_image_tags_excludes_digest_files() -> anyhow::Result<()> {
        let (_dir, store) = store().await;
        let bytes = br#"{"schemaVersion":2}"#;
        let digest = digest_bytes(bytes)?;

        store
            .put("images/app", "v1", bytes, ManifestHome::Image)
            .await?;
        store
            .put("images/app", "latest", bytes, ManifestHome::Image)
            .await?;
        store
            .put("images/app", &digest.to_string(), bytes, ManifestHome::Image)
            .await?;

        assert_eq!(
            store.list_image_tags("images/app").await?,
            vec!["latest".to_string(), "v1".to_string()]
        );
        assert_eq!(store.list_image_tags("images/none").await?, Vec::<String>::new());
        Ok(())
    }
}
