//! Names of the directories and files that make up the on-disk store.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory where upload sessions stage bytes before finalisation
///
/// Example: <STORAGE_ROOT>/<TEMP_SUBDIR>/<UPLOAD_UUID>
pub const TEMP_SUBDIR: &str = "temp";

/// The directory where content-addressed blobs are stored; the filename is
/// the full canonical digest including the `sha256:` prefix
///
/// Example: <STORAGE_ROOT>/<BLOBS_SUBDIR>/sha256:<HEX>
pub const BLOBS_SUBDIR: &str = "blobs";

/// The directory where helm chart manifests are stored by repository and tag
///
/// Example: <STORAGE_ROOT>/<CHART_MANIFESTS_SUBDIR>/<REPO>/<TAG>.json
pub const CHART_MANIFESTS_SUBDIR: &str = "manifests";

/// The directory under which all image repositories live
///
/// Example: <STORAGE_ROOT>/<IMAGES_SUBDIR>/<REPO>
pub const IMAGES_SUBDIR: &str = "images";

/// The per-repository directory holding image manifests by reference
///
/// Example: <STORAGE_ROOT>/<IMAGES_SUBDIR>/<REPO>/<IMAGE_MANIFESTS_SUBDIR>/<REF>.json
pub const IMAGE_MANIFESTS_SUBDIR: &str = "manifests";

/// The per-repository directory holding per-tag image projections
///
/// Example: <STORAGE_ROOT>/<IMAGES_SUBDIR>/<REPO>/<IMAGE_TAGS_SUBDIR>/<TAG>.json
pub const IMAGE_TAGS_SUBDIR: &str = "tags";

/// The directory where helm chart archives are stored
///
/// Example: <STORAGE_ROOT>/<CHARTS_SUBDIR>/<NAME>-<VERSION>.tgz
pub const CHARTS_SUBDIR: &str = "charts";

/// The directory under which cache bookkeeping lives
pub const CACHE_SUBDIR: &str = "cache";

/// The directory holding one metadata file per cached (repository, tag) pair
///
/// Example: <STORAGE_ROOT>/<CACHE_SUBDIR>/<CACHE_METADATA_SUBDIR>/<SAFE_REPO>_<TAG>.json
pub const CACHE_METADATA_SUBDIR: &str = "metadata";

/// The helm repository index file at the storage root
pub const HELM_INDEX_FILENAME: &str = "index.yaml";

/// The repository prefix that routes misses through the pull-through proxy
pub const PROXY_REPO_PREFIX: &str = "proxy/";

/// The repository prefix reserved for helm chart artifacts; never proxied
pub const CHARTS_REPO_PREFIX: &str = "charts/";

/// The legacy repository prefix that manifest pushes must not use
pub const HELM_REPO_PREFIX: &str = "helm/";

/// The namespace Docker Hub places official images under
pub const DOCKER_HUB_NAMESPACE: &str = "library";
