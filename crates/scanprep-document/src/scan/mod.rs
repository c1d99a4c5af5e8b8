// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan corrections: quality metric, deskew, contrast, noise, sharpening,
// binarization, and the orchestrator that sequences them.

pub mod binarize;
pub mod contrast;
pub mod deskew;
pub mod noise;
pub mod pipeline;
pub mod quality;
pub mod sharpen;

pub use binarize::{Binarization, Binarizer, ThresholdStrategy};
pub use contrast::ContrastEnhancer;
pub use deskew::Deskewer;
pub use noise::{NoiseAssessment, NoiseReducer};
pub use pipeline::{PipelineContext, PreprocessingPipeline, ProcessedImages};
pub use sharpen::Sharpener;
