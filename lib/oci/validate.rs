//! Validation of wire-supplied identifiers before any filesystem path is
//! constructed from them.

use std::{fmt, str::FromStr, sync::LazyLock};

use oci_spec::image::Digest;
use regex::Regex;
use uuid::Uuid;

use crate::{PortsideError, PortsideResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Repository names: lowercase path segments joined by `/`, each segment
/// alphanumerics separated by single `.`, `_` or `-`. The grammar cannot
/// produce `..`, a leading `/`, or a trailing `/`.
static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

/// Tags: a word character followed by up to 127 word characters, dots, or
/// dashes.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());

/// Canonical digests: only sha256 is accepted from the wire.
static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A validated tag-or-digest reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A tag reference.
    Tag(String),

    /// A digest reference.
    Digest(Digest),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reference {
    /// Reports whether this reference is a tag.
    pub fn is_tag(&self) -> bool {
        matches!(self, Self::Tag(_))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "{}", tag),
            Self::Digest(digest) => write!(f, "{}", digest),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates a repository name against the OCI grammar.
pub fn validate_repository(name: &str) -> PortsideResult<()> {
    if name.len() <= 255 && REPOSITORY_RE.is_match(name) {
        Ok(())
    } else {
        Err(PortsideError::InvalidRepository(name.to_string()))
    }
}

/// Validates a tag.
pub fn validate_tag(tag: &str) -> PortsideResult<()> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(PortsideError::InvalidReference(tag.to_string()))
    }
}

/// Validates a canonical sha256 digest string and parses it.
pub fn validate_digest(s: &str) -> PortsideResult<Digest> {
    if !DIGEST_RE.is_match(s) {
        return Err(PortsideError::InvalidDigest(s.to_string()));
    }
    Digest::from_str(s).map_err(|e| PortsideError::InvalidDigest(e.to_string()))
}

/// Validates a reference as either a tag or a digest.
pub fn validate_reference(reference: &str) -> PortsideResult<Reference> {
    if reference.starts_with("sha256:") || reference.contains(':') {
        Ok(Reference::Digest(validate_digest(reference)?))
    } else {
        validate_tag(reference)?;
        Ok(Reference::Tag(reference.to_string()))
    }
}

/// Validates an upload session id: canonical hyphenated 36-char UUID form.
pub fn validate_upload_id(s: &str) -> PortsideResult<Uuid> {
    if s.len() != 36 {
        return Err(PortsideError::InvalidUploadId(s.to_string()));
    }
    Uuid::parse_str(s).map_err(|_| PortsideError::InvalidUploadId(s.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_repository_accepts_nested_names() {
        for name in [
            "alpine",
            "library/alpine",
            "proxy/docker.io/library/nginx",
            "charts/my-chart",
            "a/b/c/d/e",
            "img_name.v2",
        ] {
            validate_repository(name).unwrap();
        }
    }

    #[test]
    fn test_validate_repository_rejects_traversal_and_bad_chars() {
        for name in [
            "",
            "/leading",
            "trailing/",
            "a//b",
            "a/../b",
            "..",
            "UPPER/case",
            "sp ace",
            "dot..dot",
        ] {
            assert!(validate_repository(name).is_err(), "accepted {:?}", name);
        }
    }

    #[test]
    fn test_validate_tag_bounds() {
        validate_tag("latest").unwrap();
        validate_tag("v1.2.3-rc.1").unwrap();
        validate_tag(&"a".repeat(128)).unwrap();

        assert!(validate_tag("").is_err());
        assert!(validate_tag(&"a".repeat(129)).is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("has/slash").is_err());
        assert!(validate_tag("has:colon").is_err());
    }

    #[test]
    fn test_validate_digest_strictness() {
        let hex = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        validate_digest(&format!("sha256:{}", hex)).unwrap();

        assert!(validate_digest(hex).is_err());
        assert!(validate_digest(&format!("sha512:{}", hex)).is_err());
        assert!(validate_digest("sha256:short").is_err());
        assert!(validate_digest(&format!("sha256:{}", hex.to_uppercase())).is_err());
        assert!(validate_digest("sha256:../../../etc/passwd").is_err());
    }

    #[test]
    fn test_validate_reference_dispatch() {
        let hex = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert!(matches!(
            validate_reference("stable").unwrap(),
            Reference::Tag(_)
        ));
        assert!(matches!(
            validate_reference(&format!("sha256:{}", hex)).unwrap(),
            Reference::Digest(_)
        ));
        // A colon forces the digest branch, and then fails digest validation
        assert!(validate_reference("sha256:oops").is_err());
        assert!(validate_reference("weird:ref").is_err());
    }

    #[test]
    fn test_validate_upload_id_canonical_form() {
        let id = Uuid::new_v4();
        assert_eq!(validate_upload_id(&id.to_string()).unwrap(), id);

        assert!(validate_upload_id("not-a-uuid").is_err());
        assert!(validate_upload_id(&id.simple().to_string()).is_err());
        assert!(validate_upload_id("../../../etc/passwd").is_err());
    }
}
