//! Deterministic mapping from logical identifiers to filesystem locations.

use std::path::PathBuf;

use getset::Getters;
use oci_spec::image::Digest;
use tokio::fs;
use uuid::Uuid;

use crate::{
    oci::safe_reference,
    utils::{
        BLOBS_SUBDIR, CACHE_METADATA_SUBDIR, CACHE_SUBDIR, CHARTS_SUBDIR, CHART_MANIFESTS_SUBDIR,
        HELM_INDEX_FILENAME, IMAGES_SUBDIR, IMAGE_MANIFESTS_SUBDIR, IMAGE_TAGS_SUBDIR, TEMP_SUBDIR,
    },
    PortsideResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A pure path-mapping layer over the configured storage root.
///
/// Beyond creating the top-level skeleton at construction, this type does no
/// I/O; repository subdirectories are created on demand by the stores that
/// write into them.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct StoreLayout {
    /// The storage root everything lives under.
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StoreLayout {
    /// Creates the layout and the top-level directory skeleton.
    pub async fn create(root: impl Into<PathBuf>) -> PortsideResult<Self> {
        let layout = Self { root: root.into() };

        for dir in [
            layout.temp_dir(),
            layout.blobs_dir(),
            layout.chart_manifests_dir(),
            layout.images_dir(),
            layout.charts_dir(),
            layout.cache_metadata_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }

        Ok(layout)
    }

    /// The staging directory for in-flight uploads.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_SUBDIR)
    }

    /// The staging path of one upload session.
    pub fn temp_upload_path(&self, id: &Uuid) -> PathBuf {
        self.temp_dir().join(id.to_string())
    }

    /// The content-addressed blob directory.
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_SUBDIR)
    }

    /// The path of a blob; the filename is the canonical digest string,
    /// `sha256:` prefix included.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir().join(digest.to_string())
    }

    /// The root of the helm manifest tree.
    pub fn chart_manifests_dir(&self) -> PathBuf {
        self.root.join(CHART_MANIFESTS_SUBDIR)
    }

    /// The helm manifest directory of one repository.
    pub fn chart_manifest_dir(&self, repo: &str) -> PathBuf {
        self.chart_manifests_dir().join(repo)
    }

    /// The helm manifest file of one (repository, reference) pair.
    pub fn chart_manifest_path(&self, repo: &str, reference: &str) -> PathBuf {
        self.chart_manifest_dir(repo)
            .join(format!("{}.json", safe_reference(reference)))
    }

    /// The root of the image tree.
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_SUBDIR)
    }

    /// The directory of one image repository.
    pub fn image_repo_dir(&self, repo: &str) -> PathBuf {
        self.images_dir().join(repo)
    }

    /// The manifest directory of one image repository.
    pub fn image_manifest_dir(&self, repo: &str) -> PathBuf {
        self.image_repo_dir(repo).join(IMAGE_MANIFESTS_SUBDIR)
    }

    /// The manifest file of one (repository, reference) pair, with `:`
    /// replaced by `_` for filesystem safety.
    pub fn image_manifest_path(&self, repo: &str, reference: &str) -> PathBuf {
        self.image_manifest_dir(repo)
            .join(format!("{}.json", safe_reference(reference)))
    }

    /// The per-tag projection directory of one image repository.
    pub fn image_tags_dir(&self, repo: &str) -> PathBuf {
        self.image_repo_dir(repo).join(IMAGE_TAGS_SUBDIR)
    }

    /// The per-tag projection file of one (repository, tag) pair.
    pub fn image_tag_path(&self, repo: &str, tag: &str) -> PathBuf {
        self.image_tags_dir(repo).join(format!("{}.json", tag))
    }

    /// The chart archive directory.
    pub fn charts_dir(&self) -> PathBuf {
        self.root.join(CHARTS_SUBDIR)
    }

    /// The archive path of one chart version.
    pub fn chart_archive_path(&self, name: &str, version: &str) -> PathBuf {
        self.charts_dir().join(format!("{}-{}.tgz", name, version))
    }

    /// The cache metadata directory; the set of files inside IS the cache.
    pub fn cache_metadata_dir(&self) -> PathBuf {
        self.root.join(CACHE_SUBDIR).join(CACHE_METADATA_SUBDIR)
    }

    /// The metadata file of one cached (repository, tag) pair, with `/`
    /// replaced by `_` in the repository name.
    pub fn cache_entry_path(&self, repo: &str, tag: &str) -> PathBuf {
        self.cache_metadata_dir()
            .join(format!("{}_{}.json", repo.replace('/', "_"), tag))
    }

    /// The helm repository index file.
    pub fn helm_index_path(&self) -> PathBuf {
        self.root.join(HELM_INDEX_FILENAME)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest_bytes;

    #[tokio::test]
    async fn test_layout_creates_skeleton() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StoreLayout::create(dir.path()).await?;

        for sub in ["temp", "blobs", "manifests", "images", "charts", "cache/metadata"] {
            assert!(dir.path().join(sub).is_dir(), "missing {}", sub);
        }
        assert_eq!(layout.get_root(), dir.path());
        Ok(())
    }

    #[tokio::test]
    async fn test_layout_paths_are_deterministic() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StoreLayout::create(dir.path()).await?;
        let digest = digest_bytes(b"x")?;

        assert_eq!(
            layout.blob_path(&digest),
            dir.path().join("blobs").join(digest.to_string())
        );
        assert_eq!(
            layout.chart_manifest_path("charts/app", "1.2.3"),
            dir.path().join("manifests/charts/app/1.2.3.json")
        );
        assert_eq!(
            layout.image_manifest_path("proxy/docker.io/library/nginx", &digest.to_string()),
            dir.path()
                .join("images/proxy/docker.io/library/nginx/manifests")
                .join(format!("{}.json", digest.to_string().replace(':', "_")))
        );
        assert_eq!(
            layout.image_tag_path("images/app", "v1"),
            dir.path().join("images/images/app/tags/v1.json")
        );
        assert_eq!(
            layout.cache_entry_path("proxy/docker.io/library/nginx", "alpine"),
            dir.path()
                .join("cache/metadata/proxy_docker.io_library_nginx_alpine.json")
        );
        assert_eq!(
            layout.chart_archive_path("app", "0.1.0"),
            dir.path().join("charts/app-0.1.0.tgz")
        );
        Ok(())
    }
}
