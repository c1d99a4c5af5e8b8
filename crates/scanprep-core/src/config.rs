// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanprepError};
use crate::types::PreprocessingOptions;

/// Persistent settings for the preprocessing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanprepConfig {
    /// Directory under which per-image artifact directories are created.
    pub output_root: PathBuf,
    /// Logical prefix used to build caller-facing artifact paths.
    pub public_prefix: String,
    /// File holding the last allocated image id.
    pub id_counter_path: PathBuf,
    /// Master switch. When off, artifacts are written without corrections.
    pub preprocess_enabled: bool,
    /// Options used when a caller does not supply its own.
    pub defaults: PreprocessingOptions,
    /// Numeric constants of the individual steps.
    pub tuning: Tuning,
}

impl Default for ScanprepConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("static/preprocessed"),
            public_prefix: "/static/preprocessed".into(),
            id_counter_path: PathBuf::from("image_id.txt"),
            preprocess_enabled: true,
            defaults: PreprocessingOptions::default(),
            tuning: Tuning::default(),
        }
    }
}

impl ScanprepConfig {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.tuning.validate()?;
        Ok(config)
    }

    /// Write settings as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// Thresholds, window sizes, and blend ratios of the correction steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    // -- Deskew --
    /// Fewer ink pixels than this means there is no usable signal.
    pub min_foreground_pixels: usize,
    /// Luminance strictly below this counts as ink.
    pub ink_threshold: u8,
    /// Estimated angles at or below this magnitude are left alone.
    pub min_skew_degrees: f64,

    // -- Contrast --
    /// Tiles per axis for contrast-limited equalization.
    pub clahe_tiles: u32,
    /// Histogram clip limit, relative to a flat histogram.
    pub clahe_clip_limit: f32,
    /// Weight of the equalized image in the final blend.
    pub contrast_blend: f32,

    // -- Noise --
    /// Sigma of the blur the image is compared against.
    pub noise_blur_sigma: f32,
    /// Mean absolute blur residual above which noise is present.
    pub noise_threshold: f64,
    /// Lower bound of the non-local-means filtering parameter.
    pub denoise_strength: f32,
    /// Radius of the non-local-means search window.
    pub denoise_search_radius: u32,
    /// Radius of the compared patches.
    pub denoise_template_radius: u32,
    /// Weight of the denoised image in the final blend.
    pub denoise_blend: f32,

    // -- Sharpen --
    /// Sharpen only when quality fell below this fraction of the baseline.
    pub sharpen_ratio: f64,
    pub sharpen_sigma: f32,
    /// Unsharp-mask weight: `image * (1 + amount) - blurred * amount`.
    pub sharpen_amount: f32,

    // -- Binarize --
    /// Neighbourhood size of the adaptive threshold (odd).
    pub adaptive_block_size: u32,
    /// Constant subtracted from the neighbourhood mean.
    pub adaptive_offset: i32,
    /// Global threshold used when a candidate method fails.
    pub fallback_threshold: u8,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            min_foreground_pixels: 100,
            ink_threshold: 200,
            min_skew_degrees: 2.0,
            clahe_tiles: 4,
            clahe_clip_limit: 1.5,
            contrast_blend: 0.7,
            noise_blur_sigma: 0.8,
            noise_threshold: 5.0,
            denoise_strength: 5.0,
            denoise_search_radius: 7,
            denoise_template_radius: 2,
            denoise_blend: 0.6,
            sharpen_ratio: 0.8,
            sharpen_sigma: 1.0,
            sharpen_amount: 0.5,
            adaptive_block_size: 15,
            adaptive_offset: 8,
            fallback_threshold: 127,
        }
    }
}

impl Tuning {
    /// Reject values no step can work with.
    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, what: &str| {
            if ok {
                Ok(())
            } else {
                Err(ScanprepError::Config(what.to_owned()))
            }
        };
        let unit = |v: f32| (0.0..=1.0).contains(&v);

        check(
            self.min_skew_degrees >= 0.0 && self.min_skew_degrees < 45.0,
            "min_skew_degrees must be in [0, 45)",
        )?;
        check(self.clahe_tiles >= 1, "clahe_tiles must be at least 1")?;
        check(self.clahe_clip_limit > 0.0, "clahe_clip_limit must be positive")?;
        check(unit(self.contrast_blend), "contrast_blend must be in [0, 1]")?;
        check(self.noise_blur_sigma > 0.0, "noise_blur_sigma must be positive")?;
        check(self.denoise_strength > 0.0, "denoise_strength must be positive")?;
        check(unit(self.denoise_blend), "denoise_blend must be in [0, 1]")?;
        check(
            self.sharpen_ratio > 0.0 && self.sharpen_ratio <= 1.0,
            "sharpen_ratio must be in (0, 1]",
        )?;
        check(self.sharpen_sigma > 0.0, "sharpen_sigma must be positive")?;
        check(self.sharpen_amount >= 0.0, "sharpen_amount must not be negative")?;
        check(
            self.adaptive_block_size >= 3 && self.adaptive_block_size % 2 == 1,
            "adaptive_block_size must be odd and at least 3",
        )?;
        Ok(())
    }
}
