// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanprep preprocessing pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScanprepError;

/// Longest accepted image identifier.
const MAX_IMAGE_ID_LEN: usize = 128;

/// Caller-supplied identifier that namespaces the artifacts of one image.
///
/// Restricted to ASCII alphanumerics, `-` and `_` so an id can never escape
/// its artifact directory or alias another id's directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, ScanprepError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_IMAGE_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(id))
        } else {
            Err(ScanprepError::InvalidImageId(id))
        }
    }

    /// Id produced by the persistent counter.
    pub fn from_counter(value: u64) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ImageId {
    type Error = ScanprepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which corrections a pipeline run may apply.
///
/// Defaults are conservative: every correction risks degrading a clean
/// image, so only contrast enhancement and binarization are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    /// Estimate and undo the rotation of the page content.
    pub auto_deskew: bool,
    /// Tile-based contrast-limited histogram equalization.
    pub enhance_contrast: bool,
    /// Denoise, but only when noise is detected.
    pub reduce_noise: bool,
    /// Unsharp mask, but only when earlier steps lost edge energy.
    pub sharpen: bool,
    /// Emit a two-level image alongside the grayscale one.
    pub binarize: bool,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            auto_deskew: false,
            enhance_contrast: true,
            reduce_noise: false,
            sharpen: false,
            binarize: true,
        }
    }
}

impl PreprocessingOptions {
    /// Every step enabled.
    pub fn all() -> Self {
        Self {
            auto_deskew: true,
            enhance_contrast: true,
            reduce_noise: true,
            sharpen: true,
            binarize: true,
        }
    }

    /// Every step disabled; artifacts are the decoded image as-is.
    pub fn none() -> Self {
        Self {
            auto_deskew: false,
            enhance_contrast: false,
            reduce_noise: false,
            sharpen: false,
            binarize: false,
        }
    }
}

/// Edge-energy estimate of a grayscale buffer (variance of its Laplacian).
///
/// Only meaningful relative to another score of the same image.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityScore(f64);

impl QualityScore {
    /// Wrap a raw variance. Negative or non-finite input clamps to zero.
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Self(value)
        } else {
            Self(0.0)
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// True when this score is strictly below `fraction` of `baseline`.
    pub fn is_below_fraction_of(&self, baseline: QualityScore, fraction: f64) -> bool {
        self.0 < baseline.0 * fraction
    }
}

impl std::fmt::Display for QualityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// The artifacts a run can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Grayscale result after every enabled step except binarization.
    Gray,
    /// Color (or gray expanded to three channels) after deskew and contrast.
    Color,
    /// Two-level result, present only when binarization is enabled.
    Binary,
}

impl ArtifactKind {
    /// File name inside the per-image artifact directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Gray => "preprocessed_gray.png",
            Self::Color => "preprocessed.png",
            Self::Binary => "preprocessed_binary.png",
        }
    }
}

/// Where an emitted artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Caller-facing logical path (e.g. for display in a web page).
    pub public_path: String,
    /// Path on the local filesystem.
    pub local_path: PathBuf,
    /// SHA-256 of the encoded PNG, lowercase hex.
    pub sha256: String,
}

/// States a successful run passes through, in order. A failed run carries
/// only its `Failure` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Loaded,
    Deskewed,
    ContrastEnhanced,
    Denoised,
    Sharpened,
    Binarized,
    Emitted,
}

/// Which thresholding method produced the binary artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarizationMethod {
    /// Global histogram-variance-maximizing threshold.
    Otsu,
    /// Per-pixel threshold from a Gaussian-weighted neighbourhood mean.
    AdaptiveGaussian,
    /// Fixed global threshold used when a candidate method failed.
    Fixed,
}

impl std::fmt::Display for BinarizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Otsu => "otsu",
            Self::AdaptiveGaussian => "adaptive_gaussian",
            Self::Fixed => "fixed",
        };
        f.write_str(name)
    }
}

/// What a successful run measured and decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub image_id: ImageId,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Decoded input dimensions.
    pub input_width: u32,
    pub input_height: u32,
    /// 1 for grayscale sources, 3 for color.
    pub input_channels: u8,
    /// Dimensions of the emitted artifacts (grown by deskew expansion).
    pub output_width: u32,
    pub output_height: u32,
    /// Quality of the grayscale buffer before any correction.
    pub baseline_score: QualityScore,
    /// Quality of the emitted grayscale artifact.
    pub final_score: QualityScore,
    /// Rotation undone by deskew, in degrees, if one was applied.
    pub skew_angle: Option<f64>,
    /// Mean absolute blur residual, if noise detection ran.
    pub noise_level: Option<f64>,
    pub noise_detected: bool,
    pub sharpened: bool,
    pub binarization: Option<BinarizationMethod>,
    pub stages: Vec<PipelineStage>,
}

/// Outcome of one `preprocess` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PreprocessingResult {
    Success {
        gray: ArtifactPaths,
        color: ArtifactPaths,
        binary: Option<ArtifactPaths>,
        /// Local path of the color artifact, the one recognizers consume.
        local_path: PathBuf,
        report: PipelineReport,
    },
    Failure {
        message: String,
    },
}

impl PreprocessingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Local path of the primary artifact, if the run succeeded.
    pub fn local_path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Success { local_path, .. } => Some(local_path),
            Self::Failure { .. } => None,
        }
    }
}

impl From<ScanprepError> for PreprocessingResult {
    fn from(err: ScanprepError) -> Self {
        Self::Failure {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_accepts_counter_and_slug_ids() {
        assert!(ImageId::new("42").is_ok());
        assert!(ImageId::new("scan_2026-10-19").is_ok());
        assert_eq!(ImageId::from_counter(7).as_str(), "7");
    }

    #[test]
    fn image_id_rejects_path_like_values() {
        let too_long = "x".repeat(129);
        for bad in ["", "..", "a/b", "a\\b", "id with space", too_long.as_str()] {
            assert!(ImageId::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn image_id_deserialization_validates() {
        let ok: ImageId = serde_json::from_str("\"page-1\"").expect("valid id");
        assert_eq!(ok.as_str(), "page-1");
        assert!(serde_json::from_str::<ImageId>("\"../etc\"").is_err());
    }

    #[test]
    fn options_default_is_conservative() {
        let opts = PreprocessingOptions::default();
        assert!(!opts.auto_deskew);
        assert!(opts.enhance_contrast);
        assert!(!opts.reduce_noise);
        assert!(!opts.sharpen);
        assert!(opts.binarize);
    }

    #[test]
    fn absent_option_fields_take_documented_defaults() {
        let opts: PreprocessingOptions =
            serde_json::from_str(r#"{"auto_deskew": true}"#).expect("parse");
        assert!(opts.auto_deskew);
        assert!(opts.enhance_contrast);
        assert!(!opts.reduce_noise);
        assert!(!opts.sharpen);
        assert!(opts.binarize);
    }

    #[test]
    fn quality_score_clamps_and_compares() {
        assert_eq!(QualityScore::new(-3.0).value(), 0.0);
        assert_eq!(QualityScore::new(f64::NAN).value(), 0.0);

        let baseline = QualityScore::new(100.0);
        assert!(QualityScore::new(79.9).is_below_fraction_of(baseline, 0.8));
        assert!(!QualityScore::new(80.0).is_below_fraction_of(baseline, 0.8));
    }

    #[test]
    fn artifact_file_names() {
        assert_eq!(ArtifactKind::Gray.file_name(), "preprocessed_gray.png");
        assert_eq!(ArtifactKind::Color.file_name(), "preprocessed.png");
        assert_eq!(ArtifactKind::Binary.file_name(), "preprocessed_binary.png");
    }

    #[test]
    fn failure_serializes_with_status_tag() {
        let result = PreprocessingResult::from(ScanprepError::Decode("truncated".into()));
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["message"], "failed to decode image: truncated");
        assert!(result.local_path().is_none());
    }
}
