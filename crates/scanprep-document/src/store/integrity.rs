// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Artifact fingerprints: SHA-256 over the encoded bytes.

use std::path::Path;

use scanprep_core::error::{Result, ScanprepError};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that the file at `path` still holds the bytes recorded as
/// `expected_hex`.
pub fn verify_file(path: &Path, expected_hex: &str) -> Result<()> {
    let data = std::fs::read(path)
        .map_err(|e| ScanprepError::Storage(format!("cannot read {}: {}", path.display(), e)))?;
    let actual = hash_bytes(&data);
    if actual == expected_hex {
        Ok(())
    } else {
        Err(ScanprepError::Storage(format!(
            "{} changed on disk: expected {}, found {}",
            path.display(),
            expected_hex,
            actual
        )))
    }
}
