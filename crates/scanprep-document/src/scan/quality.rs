// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Edge-energy quality metric: variance of the Laplacian response.

use image::GrayImage;
use imageproc::filter::laplacian_filter;
use scanprep_core::QualityScore;

/// Score a grayscale image by the variance of its 4-neighbour Laplacian.
///
/// Many strong edges give a high variance, blur or flat regions a low one.
/// The value depends on content, so it is only used to compare two states
/// of the same image (before/after a step, or two binarization candidates).
pub fn score(gray: &GrayImage) -> QualityScore {
    let pixel_count = gray.width() as u64 * gray.height() as u64;
    if pixel_count == 0 {
        return QualityScore::default();
    }

    let response = laplacian_filter(gray);
    let (mut sum, mut sum_sq) = (0.0f64, 0.0f64);
    for pixel in response.pixels() {
        let v = pixel.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let n = pixel_count as f64;
    let mean = sum / n;
    QualityScore::new(sum_sq / n - mean * mean)
}
