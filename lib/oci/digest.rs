//! Digest computation and filesystem-safe digest encodings.

use std::str::FromStr;

use oci_spec::image::Digest;
use sha2::{Digest as _, Sha256};

use crate::{PortsideError, PortsideResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the canonical sha256 digest of a byte slice.
pub fn digest_bytes(bytes: &[u8]) -> PortsideResult<Digest> {
    let hex = hex::encode(Sha256::digest(bytes));
    Digest::from_str(&format!("sha256:{}", hex))
        .map_err(|e| PortsideError::InvalidDigest(e.to_string()))
}

/// Encodes a digest for use as a filename inside repository-scoped manifest
/// directories: `sha256:HEX` becomes `sha256_HEX`.
pub fn safe_digest(digest: &Digest) -> String {
    digest.to_string().replace(':', "_")
}

/// Encodes an arbitrary tag-or-digest reference for use as a filename, with
/// `:` replaced by `_`. Plain tags pass through unchanged.
pub fn safe_reference(reference: &str) -> String {
    reference.replace(':', "_")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
