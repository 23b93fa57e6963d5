//! Raw-byte-preserving manifest parsing.
//!
//! Parsed structures are used only for classification and projection. The
//! bytes written to the store are always the exact bytes received on the
//! wire; nothing here is ever re-serialised back onto a storage path.

use oci_spec::image::{ImageIndex, ImageManifest};

use crate::PortsideResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A manifest parsed for inspection, either a single image manifest or a
/// multi-architecture image index.
#[derive(Debug, Clone)]
pub enum ParsedManifest {
    /// A single-platform image (or chart) manifest.
    Image(ImageManifest),

    /// A multi-architecture image index / manifest list.
    Index(ImageIndex),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ParsedManifest {
    /// Parses manifest bytes into a typed view.
    ///
    /// The presence of a top-level `manifests` array decides between index
    /// and image; both OCI and Docker v2 schema 2 documents deserialise into
    /// the same shapes.
    pub fn parse(bytes: &[u8]) -> PortsideResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        if value.get("manifests").is_some() {
            let index: ImageIndex = serde_json::from_value(value)?;
            Ok(Self::Index(index))
        } else {
            let manifest: ImageManifest = serde_json::from_value(value)?;
            Ok(Self::Image(manifest))
        }
    }

    /// Returns the manifest's declared top-level media type, if any.
    pub fn media_type(&self) -> Option<String> {
        match self {
            Self::Image(m) => m.media_type().as_ref().map(|t| t.to_string()),
            Self::Index(i) => i.media_type().as_ref().map(|t| t.to_string()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the `mediaType` field out of raw manifest bytes without a full
/// parse. Used when serving stored manifests whose content type must match
/// what the pusher declared.
pub fn declared_media_type(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("mediaType")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE};

    #[test]
    fn test_manifest_parse_docker_schema2() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 100
            },
            "layers": [{
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
                "size": 5000
            }]
        }))
        .unwrap();

        let parsed = ParsedManifest::parse(&bytes).unwrap();
        match &parsed {
            ParsedManifest::Image(m) => {
                assert_eq!(m.layers().len(), 1);
                assert_eq!(m.config().size(), 100);
            }
            _ => panic!("expected image manifest"),
        }
        assert_eq!(
            parsed.media_type().as_deref(),
            Some(DOCKER_MANIFEST_MEDIA_TYPE)
        );
    }

    #[test]
    fn test_manifest_parse_index() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX_MEDIA_TYPE,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 400,
                "platform": { "architecture": "amd64", "os": "linux" }
            }]
        }))
        .unwrap();

        let parsed = ParsedManifest::parse(&bytes).unwrap();
        match &parsed {
            ParsedManifest::Index(i) => assert_eq!(i.manifests().len(), 1),
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn test_manifest_parse_rejects_garbage() {
        assert!(ParsedManifest::parse(b"not json").is_err());
    }

    #[test]
    fn test_manifest_declared_media_type() {
        let bytes = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#;
        assert_eq!(
            declared_media_type(bytes).as_deref(),
            Some(OCI_INDEX_MEDIA_TYPE)
        );
        assert_eq!(declared_media_type(b"{}"), None);
    }
}
