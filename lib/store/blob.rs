//! The content-addressed blob store and its upload state machine.

use oci_spec::image::Digest;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use uuid::Uuid;

use crate::{oci::digest_bytes, utils::sha256_file, PortsideError, PortsideResult};

use super::StoreLayout;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A content-addressed byte store.
///
/// Blobs are immutable once visible: an upload stages bytes under
/// `temp/<uuid>` and the final rename into the blob directory is the point
/// at which readers can observe the content. Writers racing on the same
/// digest are harmless because equal digests imply equal bytes.
#[derive(Debug, Clone)]
pub struct BlobStore {
    layout: StoreLayout,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BlobStore {
    /// Creates a blob store over the given layout.
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Writes bytes directly under their computed digest and returns it.
    pub async fn put_direct(&self, bytes: &[u8]) -> PortsideResult<Digest> {
        let digest = digest_bytes(bytes)?;
        let path = self.layout.blob_path(&digest);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        Ok(digest)
    }

    /// Opens a new upload session and returns its id.
    ///
    /// The session is backed by an empty staging file; chunk appends against
    /// ids with no staging file are rejected.
    pub async fn begin_upload(&self) -> PortsideResult<Uuid> {
        let id = Uuid::new_v4();
        let path = self.layout.temp_upload_path(&id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        File::create(&path).await?;

        tracing::debug!("opened upload session {}", id);
        Ok(id)
    }

    /// Appends a chunk to an upload session and returns the total staged
    /// byte count.
    pub async fn append_chunk(&self, id: &Uuid, bytes: &[u8]) -> PortsideResult<u64> {
        if bytes.is_empty() {
            return Err(PortsideError::EmptyChunk);
        }

        let path = self.layout.temp_upload_path(id);
        if !path.exists() {
            return Err(PortsideError::UploadSessionNotFound(id.to_string()));
        }

        let mut file = OpenOptions::new().append(true).open(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(file.metadata().await?.len())
    }

    /// Finalises an upload session: appends optional trailing bytes,
    /// verifies the claimed digest against the staged content, and renames
    /// the staging file into the blob directory.
    ///
    /// The rename is the linearisation point; the blob is visible to readers
    /// iff it succeeds.
    pub async fn finalize_upload(
        &self,
        id: &Uuid,
        claimed: &Digest,
        trailing: Option<&[u8]>,
    ) -> PortsideResult<()> {
        let staged = self.layout.temp_upload_path(id);
        if !staged.exists() {
            return Err(PortsideError::UploadSessionNotFound(id.to_string()));
        }

        if let Some(bytes) = trailing {
            let mut file = OpenOptions::new().append(true).open(&staged).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
        }

        let actual = sha256_file(&staged).await?;
        if actual != claimed.digest() {
            fs::remove_file(&staged).await.ok();
            return Err(PortsideError::InvalidDigest(format!(
                "content hashes to sha256:{} but upload claimed {}",
                actual, claimed
            )));
        }

        let target = self.layout.blob_path(claimed);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staged, &target).await?;

        tracing::debug!("finalised upload {} as {}", id, claimed);
        Ok(())
    }

    /// Reads a blob fully into memory. Prefer [`Self::open_stream`] for
    /// layer-sized content.
    pub async fn read(&self, digest: &Digest) -> PortsideResult<Vec<u8>> {
        let path = self.layout.blob_path(digest);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortsideError::BlobNotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens a blob for streaming and returns the handle plus its length.
    pub async fn open_stream(&self, digest: &Digest) -> PortsideResult<(File, u64)> {
        let path = self.layout.blob_path(digest);
        match File::open(&path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok((file, len))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortsideError::BlobNotFound(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a blob's size, or `None` when it is absent. Absence is not
    /// fatal; upstream resolution may follow.
    pub async fn stat(&self, digest: &Digest) -> PortsideResult<Option<u64>> {
        match fs::metadata(self.layout.blob_path(digest)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The on-disk path a blob with this digest lives (or would live) at.
    pub fn path_of(&self, digest: &Digest) -> std::path::PathBuf {
        self.layout.blob_path(digest)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{oci::validate_digest, utils::sha256_hex};

    async fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::create(dir.path()).await.unwrap();
        (dir, BlobStore::new(layout))
    }

    #[tokio::test]
    async fn test_blob_put_direct_roundtrip() -> anyhow::Result<()> {
        let (_dir, store) = store().await;

        let digest = store.put_direct(b"layer bytes").await?;
        assert_eq!(digest.to_string(), format!("sha256:{}", sha256_hex(b"layer bytes")));
        assert_eq!(store.read(&digest).await?, b"layer bytes");
        assert_eq!(store.stat(&digest).await?, Some(11));

        // Overwrite with identical content is harmless
        store.put_direct(b"layer bytes").await?;
        assert_eq!(store.read(&digest).await?, b"layer bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_blob_upload_state_machine() -> anyhow::Result<()> {
        let (_dir, store) = store().await;

        let id = store.begin_upload().await?;
        assert_eq!(store.append_chunk(&id, b"hello ").await?, 6);
        assert_eq!(store.append_chunk(&id, b"world").await?, 11);

        let claimed = validate_digest(&format!("sha256:{}", sha256_hex(b"hello world")))?;
        store.finalize_upload(&id, &claimed, None).await?;

        assert_eq!(store.read(&claimed).await?, b"hello world");
        // The staging file is gone after the rename
        assert!(store.append_chunk(&id, b"more").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_blob_upload_trailing_bytes_on_finalise() -> anyhow::Result<()> {
        let (_dir, store) = store().await;

        let id = store.begin_upload().await?;
        store.append_chunk(&id, b"hello ").await?;

        let claimed = validate_digest(&format!("sha256:{}", sha256_hex(b"hello world")))?;
        store.finalize_upload(&id, &claimed, Some(b"world")).await?;

        assert_eq!(store.read(&claimed).await?, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn test_blob_upload_rejects_empty_chunk_and_unknown_session() -> anyhow::Result<()> {
        let (_dir, store) = store().await;

        let id = store.begin_upload().await?;
        assert!(matches!(
            store.append_chunk(&id, b"").await,
            Err(PortsideError::EmptyChunk)
        ));

        let ghost = Uuid::new_v4();
        assert!(matches!(
            store.append_chunk(&ghost, b"x").await,
            Err(PortsideError::UploadSessionNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_blob_upload_rejects_digest_mismatch() -> anyhow::Result<()> {
        let (_dir, store) = store().await;

        let id = store.begin_upload().await?;
        store.append_chunk(&id, b"actual content").await?;

        let wrong = validate_digest(&format!("sha256:{}", sha256_hex(b"claimed content")))?;
        assert!(matches!(
            store.finalize_upload(&id, &wrong, None).await,
            Err(PortsideError::InvalidDigest(_))
        ));
        // The claimed digest never became visible
        assert_eq!(store.stat(&wrong).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_blob_stat_missing_is_none() -> anyhow::Result<()> {
        let (_dir, store) = store().await;
        let digest = digest_bytes(b"never written")?;
        assert_eq!(store.stat(&digest).await?, None);
        assert!(store.read(&digest).await.is_err());
        Ok(())
    }
}
