//! Utility functions for working with files on the store.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::{fs::File, io::AsyncReadExt};

use crate::PortsideResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the lowercase hex sha256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Computes the lowercase hex sha256 of a file without loading it whole into
/// memory.
pub async fn sha256_file(path: &Path) -> PortsideResult<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Removes empty directories starting at `from` and walking up towards
/// `stop`. `stop` itself is never removed. Non-empty directories end the
/// walk.
pub async fn prune_empty_dirs(from: &Path, stop: &Path) -> PortsideResult<()> {
    let mut current = Some(from.to_path_buf());

    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }

        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => current = dir.parent().map(|p| p.to_path_buf()),
            // Not empty or already gone
            Err(_) => break,
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
