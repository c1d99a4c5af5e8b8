// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Artifact store: per-image directories of PNG files, written all or
// nothing.

use std::io::Write;
use std::path::{Path, PathBuf};

use scanprep_core::error::{Result, ScanprepError};
use scanprep_core::{ArtifactKind, ArtifactPaths, ImageId};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::image::buffer::PixelBuffer;
use crate::store::integrity::hash_bytes;

/// Writes the artifacts of one image under `<root>/<image id>/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    public_prefix: String,
}

/// The artifacts written by one `write_all` call.
#[derive(Debug, Default)]
pub struct StoredArtifacts {
    entries: Vec<(ArtifactKind, ArtifactPaths)>,
}

impl StoredArtifacts {
    /// Remove and return the paths of `kind`, if it was written.
    pub fn take(&mut self, kind: ArtifactKind) -> Option<ArtifactPaths> {
        let index = self.entries.iter().position(|(k, _)| *k == kind)?;
        Some(self.entries.swap_remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every artifact of `id`.
    pub fn image_dir(&self, id: &ImageId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn public_path(&self, id: &ImageId, kind: ArtifactKind) -> String {
        format!("{}/{}/{}", self.public_prefix, id, kind.file_name())
    }

    /// Encode and write every artifact.
    ///
    /// Encoding happens before any file is touched. Each file is written to
    /// a temporary sibling and renamed into place; if any write fails, the
    /// files this call already placed are removed again.
    #[instrument(skip(self, artifacts), fields(id = %id, count = artifacts.len()))]
    pub fn write_all(&self, id: &ImageId, artifacts: &[(ArtifactKind, PixelBuffer)]) -> Result<StoredArtifacts> {
        let mut encoded = Vec::with_capacity(artifacts.len());
        for (kind, buffer) in artifacts {
            encoded.push((*kind, buffer.to_png_bytes()?));
        }

        let dir = self.image_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            ScanprepError::Storage(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let mut stored = StoredArtifacts::default();
        for (kind, bytes) in &encoded {
            let target = dir.join(kind.file_name());
            if let Err(err) = write_atomically(&dir, &target, bytes) {
                warn!(
                    error = %err,
                    written = stored.len(),
                    "Artifact write failed; rolling back"
                );
                self.roll_back(&stored);
                return Err(err);
            }
            debug!(path = %target.display(), bytes = bytes.len(), "Artifact written");
            stored.entries.push((
                *kind,
                ArtifactPaths {
                    public_path: self.public_path(id, *kind),
                    local_path: target,
                    sha256: hash_bytes(bytes),
                },
            ));
        }

        info!(dir = %dir.display(), count = stored.len(), "Artifacts stored");
        Ok(stored)
    }

    fn roll_back(&self, stored: &StoredArtifacts) {
        for (_, paths) in &stored.entries {
            if let Err(err) = std::fs::remove_file(&paths.local_path) {
                warn!(path = %paths.local_path.display(), error = %err, "Rollback could not remove artifact");
            }
        }
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let storage_err =
        |e: std::io::Error| ScanprepError::Storage(format!("cannot write {}: {}", target.display(), e));

    let mut tmp = NamedTempFile::new_in(dir).map_err(storage_err)?;
    tmp.write_all(bytes).map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(target).map_err(|e| storage_err(e.error))?;
    Ok(())
}
