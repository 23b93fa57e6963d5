//! LRU accounting for the pull-through cache.
//!
//! The single source of truth is the set of per-entry metadata files under
//! the cache metadata directory; there is no in-memory mirror to drift from
//! it. Every cache-affecting operation reads or rewrites those files, and an
//! eviction pass runs after each addition.

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::{fs, sync::Mutex};
use typed_builder::TypedBuilder;

use crate::{
    config::CACHE_LOW_WATER_FRACTION, store::StoreLayout, utils::prune_empty_dirs, PortsideResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A record describing one cached (repository, tag) pair.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct CacheEntry {
    /// The local repository name.
    pub(super) name: String,

    /// The cached tag.
    pub(super) tag: String,

    /// The content digest of the root manifest.
    pub(super) digest: String,

    /// The source registry name.
    pub(super) registry: String,

    /// The upstream reference the entry was fetched as.
    pub(super) upstream_ref: String,

    /// The accumulated size in bytes.
    pub(super) size: u64,

    /// When the entry was first cached.
    pub(super) first_cached: DateTime<Utc>,

    /// When the entry was last served.
    pub(super) last_accessed: DateTime<Utc>,

    /// How many times the entry has been served.
    pub(super) access_count: u64,
}

/// A point-in-time summary of cache usage.
#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CacheState {
    /// Total bytes accounted across all entries.
    pub(super) total_size: u64,

    /// The configured ceiling in bytes.
    pub(super) max_size: u64,

    /// Number of entries.
    pub(super) item_count: usize,

    /// `total_size * 100 / max_size`, or 0 when no ceiling is set.
    pub(super) usage_percent: u64,
}

/// Aggregates on-disk cache metadata, enforces the size ceiling, evicts.
#[derive(Debug)]
pub struct CacheLedger {
    layout: StoreLayout,
    max_bytes: u64,
    evict_guard: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CacheLedger {
    /// Creates a ledger with the given ceiling in GiB.
    pub fn new(layout: StoreLayout, max_size_gb: u64) -> Self {
        Self {
            layout,
            max_bytes: max_size_gb * (1 << 30),
            evict_guard: Mutex::new(()),
        }
    }

    /// Records a cache entry, then runs an eviction check.
    ///
    /// Entries whose tag trips the corruption predicate are dropped with a
    /// warning rather than written.
    pub async fn add(&self, entry: CacheEntry) -> PortsideResult<()> {
        if tag_is_corrupt(&entry.tag) {
            tracing::warn!(
                "refusing cache entry with corrupt tag {:?} for {}",
                entry.tag,
                entry.name
            );
            return Ok(());
        }

        self.write_entry(&entry).await?;
        self.enforce_limit().await
    }

    /// Updates an entry's access time and count. Absence is tolerated; a
    /// concurrent eviction may have removed the file.
    pub async fn touch(&self, repo: &str, tag: &str) -> PortsideResult<()> {
        let path = self.layout.cache_entry_path(repo, tag);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("unreadable cache entry {}: {}", path.display(), e);
                return Ok(());
            }
        };

        entry.last_accessed = Utc::now();
        entry.access_count += 1;
        self.write_entry(&entry).await
    }

    /// Removes an entry's metadata file and the per-tag artefacts it points
    /// at. Shared blobs stay in place.
    pub async fn remove(&self, repo: &str, tag: &str) -> PortsideResult<()> {
        let entry_file = self.layout.cache_entry_path(repo, tag);
        let tag_file = self.layout.image_tag_path(repo, tag);
        let manifest_file = self.layout.image_manifest_path(repo, tag);

        for path in [&entry_file, &tag_file, &manifest_file] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("could not remove {}: {}", path.display(), e);
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

    /// Drops the whole cache: blobs, image tree, and metadata are removed
    /// and the directories recreated.
    pub async fn purge_all(&self) -> PortsideResult<()> {
        for dir in [
            self.layout.blobs_dir(),
            self.layout.images_dir(),
            self.layout.cache_metadata_dir(),
        ] {
            if let Err(e) = fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
            fs::create_dir_all(&dir).await?;
        }

        tracing::info!("cache purged");
        Ok(())
    }

    /// Sums usage across all entries.
    pub async fn snapshot(&self) -> PortsideResult<CacheState> {
        let entries = self.load_entries().await?;
        let total_size = entries.iter().map(|(_, e)| e.size).sum();

        Ok(CacheState {
            total_size,
            max_size: self.max_bytes,
            item_count: entries.len(),
            usage_percent: if self.max_bytes > 0 {
                total_size * 100 / self.max_bytes
            } else {
                0
            },
        })
    }

    /// Evicts least-recently-accessed entries until usage drops below the
    /// low-water mark, whenever the ceiling is crossed.
    ///
    /// Access-time updates are not ordered against this pass; evicting an
    /// entry that was touched a moment ago is acceptable under LRU.
    async fn enforce_limit(&self) -> PortsideResult<()> {
        let _guard = self.evict_guard.lock().await;

        let mut entries = self.load_entries().await?;
        let mut total: u64 = entries.iter().map(|(_, e)| e.size).sum();
        if total <= self.max_bytes {
            return Ok(());
        }

        let low_water = (self.max_bytes as f64 * CACHE_LOW_WATER_FRACTION) as u64;
        entries.sort_by_key(|(_, e)| e.last_accessed);

        for (_, entry) in entries {
            if total <= low_water {
                break;
            }
            tracing::info!(
                "evicting {}:{} ({} bytes, last accessed {})",
                entry.name,
                entry.tag,
                entry.size,
                entry.last_accessed
            );
            self.remove(&entry.name, &entry.tag).await?;
            total = total.saturating_sub(entry.size);
        }

        Ok(())
    }

    /// Reads all parsable entries with valid tags. Unreadable files are
    /// logged and skipped.
    async fn load_entries(&self) -> PortsideResult<Vec<(PathBuf, CacheEntry)>> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(self.layout.cache_metadata_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) if !tag_is_corrupt(&entry.tag) => entries.push((path, entry)),
                    Ok(entry) => {
                        tracing::warn!("ignoring entry with corrupt tag {:?}", entry.tag)
                    }
                    Err(e) => tracing::warn!("skipping cache entry {}: {}", path.display(), e),
                },
                // Readers tolerate transient absence during concurrent writes
                Err(_) => continue,
            }
        }

        Ok(entries)
    }

    /// Writes one entry file atomically (write to a temp name, then rename).
    async fn write_entry(&self, entry: &CacheEntry) -> PortsideResult<()> {
        let path = self.layout.cache_entry_path(&entry.name, &entry.tag);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staged = path.with_extension("json.tmp");
        fs::write(&staged, serde_json::to_vec_pretty(entry)?).await?;
        fs::rename(&staged, &path).await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The corruption predicate for cached tags: digest-shaped strings, colon
/// prefixes, the word "manifest", and out-of-bounds lengths mark entries
/// that must never drive path construction.
pub fn tag_is_corrupt(tag: &str) -> bool {
    tag.starts_with("sha")
        || tag.starts_with(':')
        || tag.contains("manifest")
        || tag.len() < 2
        || tag.len() > 128
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, tag: &str, size: u64, accessed_offset_secs: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry::builder()
            .name(name.to_string())
            .tag(tag.to_string())
            .digest(
                "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                    .to_string(),
            )
            .registry("docker.io".to_string())
            .upstream_ref(format!("library/{}:{}", name, tag))
            .size(size)
            .first_cached(now)
            .last_accessed(now + chrono::Duration::seconds(accessed_offset_secs))
            .access_count(1)
            .build()
    }

    async fn ledger(max_gb: u64) -> (tempfile::TempDir, CacheLedger) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::create(dir.path()).await.unwrap();
        (dir, CacheLedger::new(layout, max_gb))
    }

    #[test]
    fn test_cache_tag_corruption_predicate() {
        assert!(tag_is_corrupt("sha256_abcdef"));
        assert!(tag_is_corrupt(":weird"));
        assert!(tag_is_corrupt("some-manifest-tag"));
        assert!(tag_is_corrupt("a"));
        assert!(tag_is_corrupt(&"x".repeat(129)));

        assert!(!tag_is_corrupt("latest"));
        assert!(!tag_is_corrupt("v1.2.3"));
    }

    #[tokio::test]
    async fn test_cache_add_and_snapshot() -> anyhow::Result<()> {
        let (_dir, ledger) = ledger(10).await;

        ledger
            .add(entry("proxy/docker.io/library/nginx", "alpine", 500, 0))
            .await?;
        ledger
            .add(entry("proxy/docker.io/library/redis", "7.2", 700, 0))
            .await?;

        let state = ledger.snapshot().await?;
        assert_eq!(*state.get_item_count(), 2);
        assert_eq!(*state.get_total_size(), 1200);
        assert_eq!(*state.get_max_size(), 10 * (1 << 30));
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_corrupt_tags_are_dropped_silently() -> anyhow::Result<()> {
        let (_dir, ledger) = ledger(10).await;

        ledger
            .add(entry("proxy/docker.io/library/nginx", "sha256_beef", 500, 0))
            .await?;

        assert_eq!(*ledger.snapshot().await?.get_item_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_touch_bumps_access() -> anyhow::Result<()> {
        let (_dir, ledger) = ledger(10).await;
        ledger
            .add(entry("proxy/docker.io/library/nginx", "alpine", 500, 0))
            .await?;

        ledger.touch("proxy/docker.io/library/nginx", "alpine").await?;

        let entries = ledger.load_entries().await?;
        assert_eq!(*entries[0].1.get_access_count(), 2);

        // Touching an absent entry is a no-op
        ledger.touch("proxy/docker.io/library/ghost", "x1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_eviction_lru_order_and_low_water() -> anyhow::Result<()> {
        let gib = 1u64 << 30;
        let (_dir, ledger) = ledger(10).await;

        // 10 entries of 1 GiB each fit exactly; the 11th crosses the ceiling
        for i in 0..10 {
            ledger
                .add(entry(
                    "proxy/docker.io/library/img",
                    &format!("v{}", 10 + i),
                    gib,
                    i as i64,
                ))
                .await?;
        }
        assert_eq!(*ledger.snapshot().await?.get_item_count(), 10);

        ledger
            .add(entry("proxy/docker.io/library/img", "v99", gib, 100))
            .await?;

        let state = ledger.snapshot().await?;
        assert!(*state.get_item_count() <= 10);
        assert!(*state.get_total_size() <= 9 * gib);

        // The oldest-accessed entries (v10, v11) were the ones evicted
        let tags: Vec<String> = ledger
            .load_entries()
            .await?
            .into_iter()
            .map(|(_, e)| e.tag)
            .collect();
        assert!(!tags.contains(&"v10".to_string()));
        assert!(tags.contains(&"v99".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_remove_unlinks_tag_artifacts_only() -> anyhow::Result<()> {
        let (dir, ledger) = ledger(10).await;
        let repo = "proxy/docker.io/library/nginx";

        // A blob, a tag projection, a manifest file, and the ledger entry
        let blob = dir.path().join("blobs/sha256:aa");
        fs::write(&blob, b"blob").await?;
        let tag_file = ledger.layout.image_tag_path(repo, "alpine");
        fs::create_dir_all(tag_file.parent().unwrap()).await?;
        fs::write(&tag_file, b"{}").await?;
        let manifest_file = ledger.layout.image_manifest_path(repo, "alpine");
        fs::create_dir_all(manifest_file.parent().unwrap()).await?;
        fs::write(&manifest_file, b"{}").await?;
        ledger.add(entry(repo, "alpine", 100, 0)).await?;

        ledger.remove(repo, "alpine").await?;

        assert!(!tag_file.exists());
        assert!(!manifest_file.exists());
        assert_eq!(*ledger.snapshot().await?.get_item_count(), 0);
        // Blobs stay; they may be shared with other tags
        assert!(blob.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_purge_all_recreates_directories() -> anyhow::Result<()> {
        let (dir, ledger) = ledger(10).await;
        fs::write(dir.path().join("blobs/sha256:aa"), b"x").await?;
        ledger
            .add(entry("proxy/docker.io/library/nginx", "alpine", 100, 0))
            .await?;

        ledger.purge_all().await?;

        assert!(dir.path().join("blobs").is_dir());
        assert!(!dir.path().join("blobs/sha256:aa").exists());
        assert_eq!(*ledger.snapshot().await?.get_item_count(), 0);
        Ok(())
    }
}
