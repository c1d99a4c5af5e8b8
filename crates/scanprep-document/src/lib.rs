// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanprep-document: decision-guided preprocessing of scanned document
// images ahead of text recognition.
//
// Provides image decoding (path or bytes, with a declared-format fallback),
// an edge-energy quality metric, and the gated corrections: deskew, contrast
// normalization, noise reduction, sharpening, and adaptive binarization.
// The pipeline writes gray, color, and binary PNG artifacts per image id.

pub mod image;
pub mod scan;
pub mod store;

// Re-export the primary types so callers can use `scanprep_document::PreprocessingPipeline` etc.
pub use crate::image::buffer::{ImageSource, PixelBuffer, decode};
pub use scan::pipeline::{PipelineContext, PreprocessingPipeline, ProcessedImages};
pub use scan::quality::score;
pub use store::artifacts::ArtifactStore;
pub use store::ids::ImageIdAllocator;
