// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sharpness-guided unsharp masking.

use image::GrayImage;
use imageproc::filter::sharpen_gaussian;
use scanprep_core::error::{Result, ScanprepError};
use scanprep_core::{QualityScore, Tuning};
use tracing::{debug, info, instrument, warn};

use crate::scan::pipeline::PipelineContext;
use crate::scan::quality;

/// Re-sharpens only when earlier steps cost a measurable share of the
/// edge energy recorded before the pipeline started.
#[derive(Debug, Clone)]
pub struct Sharpener {
    ratio: f64,
    sigma: f32,
    amount: f32,
}

impl Sharpener {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            ratio: tuning.sharpen_ratio,
            sigma: tuning.sharpen_sigma,
            amount: tuning.sharpen_amount,
        }
    }

    pub fn needs_sharpening(&self, current: QualityScore, baseline: QualityScore) -> bool {
        current.is_below_fraction_of(baseline, self.ratio)
    }

    /// Sharpen when the current score dropped below `ratio * baseline`.
    /// Returns the image and whether it was sharpened.
    #[instrument(skip_all, fields(baseline = context.baseline.value()))]
    pub fn sharpen_if_degraded(&self, gray: GrayImage, context: &PipelineContext) -> (GrayImage, bool) {
        let current = quality::score(&gray);
        if !self.needs_sharpening(current, context.baseline) {
            debug!(current = current.value(), "Sharpness preserved; no sharpening");
            return (gray, false);
        }
        match self.try_unsharp_mask(&gray) {
            Ok(sharpened) => {
                info!(
                    current = current.value(),
                    baseline = context.baseline.value(),
                    "Sharpening applied"
                );
                (sharpened, true)
            }
            Err(err) => {
                warn!(error = %err, "Sharpening skipped");
                (gray, false)
            }
        }
    }

    /// `image * (1 + amount) - blurred * amount`, clipped to 0..=255.
    pub fn try_unsharp_mask(&self, gray: &GrayImage) -> Result<GrayImage> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(ScanprepError::step(
                "sharpen",
                format!("blur sigma {} must be positive", self.sigma),
            ));
        }
        if !(self.amount.is_finite() && self.amount >= 0.0) {
            return Err(ScanprepError::step(
                "sharpen",
                format!("amount {} must be non-negative", self.amount),
            ));
        }
        Ok(sharpen_gaussian(gray, self.sigma, self.amount))
    }
}
