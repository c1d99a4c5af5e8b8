// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Noise detection and gated non-local-means noise reduction.

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use scanprep_core::Tuning;
use scanprep_core::error::{Result, ScanprepError};
use tracing::{debug, info, instrument, warn};

/// Largest accepted search / template radius.
const MAX_RADIUS: u32 = 32;

/// Measured noise of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseAssessment {
    /// Mean absolute difference against a mildly blurred copy.
    pub level: f64,
    pub detected: bool,
}

#[derive(Debug, Clone)]
pub struct NoiseReducer {
    blur_sigma: f32,
    threshold: f64,
    strength: f32,
    search_radius: u32,
    template_radius: u32,
    blend: f32,
}

impl NoiseReducer {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            blur_sigma: tuning.noise_blur_sigma,
            threshold: tuning.noise_threshold,
            strength: tuning.denoise_strength,
            search_radius: tuning.denoise_search_radius,
            template_radius: tuning.denoise_template_radius,
            blend: tuning.denoise_blend,
        }
    }

    /// Mean absolute difference between the image and its blurred copy.
    pub fn noise_level(&self, gray: &GrayImage) -> f64 {
        let pixel_count = gray.width() as u64 * gray.height() as u64;
        if pixel_count == 0 || self.blur_sigma <= 0.0 {
            return 0.0;
        }
        let blurred = gaussian_blur_f32(gray, self.blur_sigma);
        let total: u64 = gray
            .pixels()
            .zip(blurred.pixels())
            .map(|(p, q)| p.0[0].abs_diff(q.0[0]) as u64)
            .sum();
        total as f64 / pixel_count as f64
    }

    pub fn assess(&self, gray: &GrayImage) -> NoiseAssessment {
        let level = self.noise_level(gray);
        let detected = level > self.threshold;
        debug!(level, threshold = self.threshold, detected, "Noise measured");
        NoiseAssessment { level, detected }
    }

    pub fn has_noise(&self, gray: &GrayImage) -> bool {
        self.assess(gray).detected
    }

    /// Denoise only when noise is detected.
    #[instrument(skip_all, fields(width = gray.width(), height = gray.height()))]
    pub fn reduce_if_noisy(&self, gray: GrayImage) -> (GrayImage, NoiseAssessment) {
        let assessment = self.assess(&gray);
        if !assessment.detected {
            return (gray, assessment);
        }
        match self.try_reduce(&gray, assessment.level) {
            Ok(denoised) => {
                info!(level = assessment.level, "Noise reduced");
                (denoised, assessment)
            }
            Err(err) => {
                warn!(error = %err, "Noise reduction skipped");
                (gray, assessment)
            }
        }
    }

    /// Denoise unconditionally. Returns the input unchanged on failure.
    pub fn reduce(&self, gray: GrayImage) -> GrayImage {
        let level = self.noise_level(&gray);
        match self.try_reduce(&gray, level) {
            Ok(denoised) => denoised,
            Err(err) => {
                warn!(error = %err, "Noise reduction skipped");
                gray
            }
        }
    }

    /// Non-local means, blended `blend * denoised + (1 - blend) * original`.
    ///
    /// The filtering parameter grows with the measured `level` so that the
    /// weights are not too selective for the noise actually present.
    pub fn try_reduce(&self, gray: &GrayImage, level: f64) -> Result<GrayImage> {
        if self.search_radius == 0 || self.search_radius > MAX_RADIUS {
            return Err(ScanprepError::step(
                "denoise",
                format!("search radius {} out of range", self.search_radius),
            ));
        }
        if self.template_radius > MAX_RADIUS {
            return Err(ScanprepError::step(
                "denoise",
                format!("template radius {} out of range", self.template_radius),
            ));
        }
        let h = (self.strength as f64).max(1.5 * level);
        if !(h.is_finite() && h > 0.0) {
            return Err(ScanprepError::step("denoise", format!("filter strength {h} is unusable")));
        }

        let denoised = non_local_means(gray, self.search_radius, self.template_radius, h);
        let mut out = GrayImage::new(gray.width(), gray.height());
        for ((dst, &filtered), orig) in out.pixels_mut().zip(&denoised).zip(gray.pixels()) {
            let value = self.blend as f64 * filtered + (1.0 - self.blend as f64) * orig.0[0] as f64;
            *dst = Luma([value.round().clamp(0.0, 255.0) as u8]);
        }
        Ok(out)
    }
}

/// Edge-replicated copy of `gray` with `pad` extra pixels on every side.
struct Padded {
    data: Vec<f64>,
    stride: usize,
}

impl Padded {
    fn new(gray: &GrayImage, pad: u32) -> Self {
        let (w, h) = gray.dimensions();
        let stride = (w + 2 * pad) as usize;
        let rows = (h + 2 * pad) as usize;
        let mut data = Vec::with_capacity(stride * rows);
        for py in 0..rows as i64 {
            let y = (py - pad as i64).clamp(0, h as i64 - 1) as u32;
            for px in 0..stride as i64 {
                let x = (px - pad as i64).clamp(0, w as i64 - 1) as u32;
                data.push(gray.get_pixel(x, y).0[0] as f64);
            }
        }
        Self { data, stride }
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.stride + x]
    }
}

/// Weighted average over every offset of the search window, each neighbour
/// weighted by `exp(-mean patch distance / h^2)`. Patch distances come from
/// an integral image of squared differences per offset.
fn non_local_means(gray: &GrayImage, search: u32, template: u32, h: f64) -> Vec<f64> {
    let (w, ht) = gray.dimensions();
    if w == 0 || ht == 0 {
        return Vec::new();
    }
    let (w, ht) = (w as usize, ht as usize);
    let (s, t) = (search as usize, template as usize);
    let pad = s + t;
    let padded = Padded::new(gray, pad as u32);

    // Region holding every template around every output pixel.
    let rw = w + 2 * t;
    let rh = ht + 2 * t;
    let stride = rw + 1;
    let side = 2 * t + 1;
    let patch_area = (side * side) as f64;
    let inv_h2 = 1.0 / (h * h);

    let mut weights = vec![0.0f64; w * ht];
    let mut sums = vec![0.0f64; w * ht];
    let mut integral = vec![0.0f64; stride * (rh + 1)];

    for dy in 0..=2 * s {
        for dx in 0..=2 * s {
            // Region pixel (rx, ry) sits at padded (rx + s, ry + s); its
            // neighbour at this offset at padded (rx + dx, ry + dy).
            for ry in 0..rh {
                let mut row_sum = 0.0;
                for rx in 0..rw {
                    let d = padded.at(rx + s, ry + s) - padded.at(rx + dx, ry + dy);
                    row_sum += d * d;
                    integral[(ry + 1) * stride + rx + 1] = row_sum + integral[ry * stride + rx + 1];
                }
            }

            for y in 0..ht {
                for x in 0..w {
                    let distance = integral[(y + side) * stride + x + side]
                        - integral[y * stride + x + side]
                        - integral[(y + side) * stride + x]
                        + integral[y * stride + x];
                    let weight = (-(distance / patch_area) * inv_h2).exp();
                    let idx = y * w + x;
                    weights[idx] += weight;
                    sums[idx] += weight * padded.at(x + t + dx, y + t + dy);
                }
            }
        }
    }

    // The zero offset always contributes weight 1, so no division by zero.
    sums.iter().zip(&weights).map(|(s, w)| s / w).collect()
}
