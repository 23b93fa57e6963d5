use std::{path::PathBuf, sync::LazyLock, time::Duration};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default port the registry listens on.
pub const DEFAULT_SERVER_PORT: u16 = 5000;

/// The path where all portside data is stored when no `storage.path` is
/// configured.
pub static DEFAULT_STORAGE_ROOT: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap().join(".portside"));

/// The default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The default upstream registry name.
pub const DEFAULT_REGISTRY_NAME: &str = "docker.io";

/// The default upstream registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// The default pull-through cache ceiling, in GiB.
pub const DEFAULT_CACHE_MAX_GB: u64 = 10;

/// The default number of concurrent upstream blob fetches.
pub const DEFAULT_PROXY_CONCURRENCY: usize = 12;

/// Fraction of the cache ceiling eviction shrinks usage down to.
pub const CACHE_LOW_WATER_FRACTION: f64 = 0.9;

/// Timeout for a single upstream manifest fetch.
pub const MANIFEST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single upstream blob fetch; large layers need headroom.
pub const BLOB_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for a background platform-child prefetch.
pub const PREFETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a blob request may wait for an upstream fetch permit.
pub const PERMIT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// The request body ceiling, sized for single-chunk layer uploads.
pub const MAX_UPLOAD_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// The Basic realm advertised on unauthenticated writes.
pub const AUTH_REALM: &str = "portside";
