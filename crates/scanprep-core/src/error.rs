// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanprep.

use thiserror::Error;

/// Top-level error type for all Scanprep operations.
///
/// Only `Decode`, `Encode`, `Storage`, `Io`, and `InvalidImageId` ever abort a
/// pipeline run. `Step` and `Binarize` are produced by individual corrections
/// and are absorbed by their callers.
#[derive(Debug, Error)]
pub enum ScanprepError {
    // -- Input --
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("invalid image id {0:?}")]
    InvalidImageId(String),

    // -- Processing --
    #[error("{step} could not run: {reason}")]
    Step { step: &'static str, reason: String },

    #[error("binarization strategy failed: {0}")]
    Binarize(String),

    // -- Output / persistence --
    #[error("image encoding failed: {0}")]
    Encode(String),

    #[error("artifact storage failed: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanprepError {
    /// Shorthand for a per-step failure.
    pub fn step(step: &'static str, reason: impl Into<String>) -> Self {
        Self::Step {
            step,
            reason: reason.into(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanprepError>;
