//! Media-type constants and artifact classification.

use super::ParsedManifest;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The MIME type of a helm chart config blob, the marker for chart manifests.
pub const HELM_CONFIG_MEDIA_TYPE: &str = "application/vnd.cncf.helm.config.v1+json";

/// The MIME type of a packaged helm chart layer.
pub const HELM_CHART_CONTENT_MEDIA_TYPE: &str =
    "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

/// The MIME type for Docker Registry v2 manifests.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The MIME type for Docker Registry v2 manifest lists.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// The MIME type for Docker image configuration blobs.
pub const DOCKER_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// The MIME type for Docker image layers.
pub const DOCKER_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// The MIME type for OCI image manifests.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// The MIME type for OCI image indexes.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// The MIME type for OCI image configuration blobs.
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// The prefix shared by all OCI image layer media types, gzip and zstd
/// variants included.
pub const OCI_LAYER_MEDIA_TYPE_PREFIX: &str = "application/vnd.oci.image.layer.";

/// The annotation key Docker uses to mark attestation manifests inside an
/// image index.
pub const DOCKER_REFERENCE_TYPE_ANNOTATION: &str = "vnd.docker.reference.type";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The artifact kind a manifest resolves to, deciding which catalog indexes
/// its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A packaged helm chart.
    HelmChart,

    /// A single-platform container image.
    DockerImage,

    /// A multi-architecture image index (manifest list).
    ImageIndex,

    /// A manifest whose media types match nothing we index.
    Unknown,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Classifies a parsed manifest into the artifact kind that decides its
/// downstream indexer.
///
/// Rules, in order: helm config type, image config type, helm chart layer,
/// image layer, index media type, unknown.
pub fn classify(manifest: &ParsedManifest) -> ArtifactKind {
    match manifest {
        ParsedManifest::Image(image) => {
            let config_type = image.config().media_type().to_string();

            if config_type == HELM_CONFIG_MEDIA_TYPE {
                return ArtifactKind::HelmChart;
            }
            if config_type == DOCKER_CONFIG_MEDIA_TYPE || config_type == OCI_CONFIG_MEDIA_TYPE {
                return ArtifactKind::DockerImage;
            }

            let layer_types: Vec<String> = image
                .layers()
                .iter()
                .map(|l| l.media_type().to_string())
                .collect();

            if layer_types
                .iter()
                .any(|t| t == HELM_CHART_CONTENT_MEDIA_TYPE)
            {
                return ArtifactKind::HelmChart;
            }
            if layer_types.iter().any(|t| is_image_layer_type(t)) {
                return ArtifactKind::DockerImage;
            }

            ArtifactKind::Unknown
        }
        ParsedManifest::Index(_) => ArtifactKind::ImageIndex,
    }
}

/// Reports whether a media type names a Docker or OCI image layer.
pub fn is_image_layer_type(media_type: &str) -> bool {
    media_type == DOCKER_LAYER_MEDIA_TYPE || media_type.starts_with(OCI_LAYER_MEDIA_TYPE_PREFIX)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(config_type: &str, layer_type: &str) -> ParsedManifest {
        let json = serde_json::json!({
            "schemaVersion": 2,
            "config": {
                "mediaType": config_type,
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 2
            },
            "layers": [{
                "mediaType": layer_type,
                "digest": "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
                "size": 3
            }]
        });
        ParsedManifest::parse(&serde_json::to_vec(&json).unwrap()).unwrap()
    }

    #[test]
    fn test_media_type_helm_config_wins() {
        let manifest = manifest_with(HELM_CONFIG_MEDIA_TYPE, HELM_CHART_CONTENT_MEDIA_TYPE);
        assert_eq!(classify(&manifest), ArtifactKind::HelmChart);
    }

    #[test]
    fn test_media_type_image_config() {
        for config in [DOCKER_CONFIG_MEDIA_TYPE, OCI_CONFIG_MEDIA_TYPE] {
            let manifest = manifest_with(config, DOCKER_LAYER_MEDIA_TYPE);
            assert_eq!(classify(&manifest), ArtifactKind::DockerImage);
        }
    }

    #[test]
    fn test_media_type_layer_fallback() {
        // Unrecognised config types fall through to layer inspection
        let helm = manifest_with("application/x-unknown", HELM_CHART_CONTENT_MEDIA_TYPE);
        assert_eq!(classify(&helm), ArtifactKind::HelmChart);

        let oci = manifest_with(
            "application/x-unknown",
            "application/vnd.oci.image.layer.v1.tar+gzip",
        );
        assert_eq!(classify(&oci), ArtifactKind::DockerImage);
    }

    #[test]
    fn test_media_type_unknown() {
        let manifest = manifest_with("application/x-unknown", "application/x-other");
        assert_eq!(classify(&manifest), ArtifactKind::Unknown);
    }

    #[test]
    fn test_media_type_index() {
        let json = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX_MEDIA_TYPE,
            "manifests": []
        });
        let manifest = ParsedManifest::parse(&serde_json::to_vec(&json).unwrap()).unwrap();
        assert_eq!(classify(&manifest), ArtifactKind::ImageIndex);
    }
}
