// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Adaptive binarization: several thresholding strategies produce candidate
// black/white images, the Laplacian-variance quality metric picks the
// winner, and a fixed global threshold stands in when any candidate fails.

use image::{GrayImage, Luma};
use scanprep_core::error::{Result, ScanprepError};
use scanprep_core::{BinarizationMethod, QualityScore, Tuning};
use tracing::{debug, info, instrument, warn};

use crate::scan::quality;

const BLACK: u8 = 0;
const WHITE: u8 = 255;

/// One way of turning a grayscale image into a two-level image.
pub trait ThresholdStrategy: Send + Sync {
    fn method(&self) -> BinarizationMethod;

    /// Produce a same-sized image holding only 0 and 255.
    fn apply(&self, gray: &GrayImage) -> Result<GrayImage>;
}

/// Global threshold maximising the between-class variance (Otsu).
#[derive(Debug, Clone, Copy, Default)]
pub struct OtsuThreshold;

impl ThresholdStrategy for OtsuThreshold {
    fn method(&self) -> BinarizationMethod {
        BinarizationMethod::Otsu
    }

    fn apply(&self, gray: &GrayImage) -> Result<GrayImage> {
        if gray.width() == 0 || gray.height() == 0 {
            return Err(ScanprepError::Binarize("image has no pixels".into()));
        }
        let threshold = otsu_threshold(gray);
        debug!(threshold, "Otsu threshold computed");
        Ok(global_threshold(gray, threshold))
    }
}

/// Per-pixel threshold: Gaussian-weighted mean of a `block_size` square
/// neighbourhood minus `offset`.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveGaussianThreshold {
    pub block_size: u32,
    pub offset: i32,
}

impl ThresholdStrategy for AdaptiveGaussianThreshold {
    fn method(&self) -> BinarizationMethod {
        BinarizationMethod::AdaptiveGaussian
    }

    fn apply(&self, gray: &GrayImage) -> Result<GrayImage> {
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(ScanprepError::Binarize(format!(
                "block size {} must be odd and at least 3",
                self.block_size
            )));
        }
        if gray.width() == 0 || gray.height() == 0 {
            return Err(ScanprepError::Binarize("image has no pixels".into()));
        }

        let means = gaussian_local_means(gray, self.block_size);
        let mut out = GrayImage::new(gray.width(), gray.height());
        for ((dst, src), mean) in out.pixels_mut().zip(gray.pixels()).zip(&means) {
            let threshold = mean.round() as i32 - self.offset;
            dst.0[0] = if src.0[0] as i32 > threshold { WHITE } else { BLACK };
        }
        Ok(out)
    }
}

/// The chosen two-level image.
#[derive(Debug, Clone)]
pub struct Binarization {
    pub image: GrayImage,
    pub method: BinarizationMethod,
    pub score: QualityScore,
}

/// Runs every strategy, validates and scores each candidate, and keeps the
/// best. Ties go to the strategy listed later.
pub struct Binarizer {
    strategies: Vec<Box<dyn ThresholdStrategy>>,
    fallback_threshold: u8,
}

impl std::fmt::Debug for Binarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<_> = self.strategies.iter().map(|s| s.method()).collect();
        f.debug_struct("Binarizer")
            .field("strategies", &methods)
            .field("fallback_threshold", &self.fallback_threshold)
            .finish()
    }
}

impl Binarizer {
    /// Otsu, then adaptive Gaussian.
    pub fn new(tuning: &Tuning) -> Self {
        Self::with_strategies(
            vec![
                Box::new(OtsuThreshold),
                Box::new(AdaptiveGaussianThreshold {
                    block_size: tuning.adaptive_block_size,
                    offset: tuning.adaptive_offset,
                }),
            ],
            tuning.fallback_threshold,
        )
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ThresholdStrategy>>, fallback_threshold: u8) -> Self {
        Self {
            strategies,
            fallback_threshold,
        }
    }

    /// Always produces a two-level image of the input's size.
    #[instrument(skip_all, fields(width = gray.width(), height = gray.height()))]
    pub fn binarize(&self, gray: &GrayImage) -> Binarization {
        match self.best_candidate(gray) {
            Ok(best) => {
                info!(method = %best.method, score = best.score.value(), "Binarization selected");
                best
            }
            Err(err) => {
                warn!(
                    error = %err,
                    threshold = self.fallback_threshold,
                    "Binarization falling back to fixed threshold"
                );
                let image = global_threshold(gray, self.fallback_threshold);
                let score = quality::score(&image);
                Binarization {
                    image,
                    method: BinarizationMethod::Fixed,
                    score,
                }
            }
        }
    }

    fn best_candidate(&self, gray: &GrayImage) -> Result<Binarization> {
        let mut best: Option<Binarization> = None;
        for strategy in &self.strategies {
            let method = strategy.method();
            let image = strategy.apply(gray)?;
            validate(gray, &image, method)?;
            let score = quality::score(&image);
            debug!(%method, score = score.value(), "Binarization candidate scored");

            if best.as_ref().is_none_or(|b| score >= b.score) {
                best = Some(Binarization { image, method, score });
            }
        }
        best.ok_or_else(|| ScanprepError::Binarize("no threshold strategy configured".into()))
    }
}

fn validate(gray: &GrayImage, candidate: &GrayImage, method: BinarizationMethod) -> Result<()> {
    if candidate.dimensions() != gray.dimensions() {
        return Err(ScanprepError::Binarize(format!(
            "{method} produced {:?} for a {:?} input",
            candidate.dimensions(),
            gray.dimensions()
        )));
    }
    if candidate.pixels().any(|p| p.0[0] != BLACK && p.0[0] != WHITE) {
        return Err(ScanprepError::Binarize(format!("{method} produced non-binary pixels")));
    }
    Ok(())
}

/// Pixels strictly above `threshold` become white.
pub fn global_threshold(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > threshold { WHITE } else { BLACK };
    }
    out
}

/// Otsu's method over the 256-bin histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total_pixels = gray.width() as u64 * gray.height() as u64;
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0f64;
    let mut weight_background = 0u64;
    let mut max_variance = 0.0f64;
    let mut best_threshold = 0u8;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

/// Separable Gaussian of `size` taps, with the sigma a window of that size
/// conventionally implies.
fn gaussian_kernel(size: u32) -> Vec<f64> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as i64;
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    kernel
}

/// Gaussian-weighted neighbourhood means with edge replication.
fn gaussian_local_means(gray: &GrayImage, size: u32) -> Vec<f64> {
    let kernel = gaussian_kernel(size);
    let half = (size / 2) as i64;
    let (w, h) = (gray.width() as i64, gray.height() as i64);

    let mut horizontal = vec![0.0f64; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k as i64 - half).clamp(0, w - 1);
                acc += weight * gray.get_pixel(sx as u32, y as u32).0[0] as f64;
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    let mut means = vec![0.0f64; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k as i64 - half).clamp(0, h - 1);
                acc += weight * horizontal[(sy * w + x) as usize];
            }
            means[(y * w + x) as usize] = acc;
        }
    }
    means
}
