// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent image-id counter.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use scanprep_core::ImageId;
use scanprep_core::error::{Result, ScanprepError};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// Hands out increasing numeric ids, persisting the last one as decimal
/// text. A missing or unreadable counter file counts as 1.
///
/// Increments are serialised by a mutex and persisted with a rename, so
/// concurrent callers in one process never receive the same id.
#[derive(Debug)]
pub struct ImageIdAllocator {
    path: PathBuf,
    last: Mutex<u64>,
}

impl ImageIdAllocator {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = read_counter(&path);
        debug!(path = %path.display(), last, "Image id counter opened");
        Self {
            path,
            last: Mutex::new(last),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Increment, persist, and return the new id.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn next_id(&self) -> Result<ImageId> {
        let mut last = self
            .last
            .lock()
            .map_err(|_| ScanprepError::Storage("image id counter lock poisoned".into()))?;
        let next = last
            .checked_add(1)
            .ok_or_else(|| ScanprepError::Storage("image id counter overflow".into()))?;
        persist_counter(&self.path, next)?;
        *last = next;
        debug!(id = next, "Image id allocated");
        Ok(ImageId::from_counter(next))
    }
}

fn read_counter(path: &Path) -> u64 {
    match std::fs::read_to_string(path) {
        Ok(text) => text.trim().parse().unwrap_or_else(|_| {
            warn!(path = %path.display(), "Unparsable id counter; starting at 1");
            1
        }),
        Err(_) => 1,
    }
}

fn persist_counter(path: &Path, value: u64) -> Result<()> {
    let storage_err =
        |e: std::io::Error| ScanprepError::Storage(format!("cannot persist id counter {}: {}", path.display(), e));

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(storage_err)?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(storage_err)?;
    tmp.write_all(value.to_string().as_bytes()).map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn fresh_counter_starts_after_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allocator = ImageIdAllocator::open(dir.path().join("image_id.txt"));
        assert_eq!(allocator.next_id().expect("id").as_str(), "2");
        assert_eq!(allocator.next_id().expect("id").as_str(), "3");
    }

    #[test]
    fn counter_survives_reopening() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image_id.txt");
        std::fs::write(&path, "41\n").expect("seed");

        assert_eq!(ImageIdAllocator::open(&path).next_id().expect("id").as_str(), "42");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "42");
        assert_eq!(ImageIdAllocator::open(&path).next_id().expect("id").as_str(), "43");
    }

    #[test]
    fn garbage_counter_restarts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("image_id.txt");
        std::fs::write(&path, "not a number").expect("seed");
        assert_eq!(ImageIdAllocator::open(&path).next_id().expect("id").as_str(), "2");
    }

    #[test]
    fn concurrent_allocation_yields_unique_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let allocator = Arc::new(ImageIdAllocator::open(dir.path().join("ids").join("counter")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| allocator.next_id().expect("id").as_str().to_owned())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread") {
                assert!(seen.insert(id.clone()), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(
            std::fs::read_to_string(allocator.path()).expect("read"),
            "201"
        );
    }
}
