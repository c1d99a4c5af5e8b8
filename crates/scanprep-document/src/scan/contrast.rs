// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Contrast normalization: contrast-limited adaptive histogram equalization
// (CLAHE) over a small tile grid, blended back with the original.

use image::{GrayImage, Luma, Rgb, RgbImage};
use scanprep_core::Tuning;
use scanprep_core::error::{Result, ScanprepError};
use tracing::{debug, instrument, warn};

use crate::image::color::{lab_to_rgb, lightness_to_u8, rgb_to_lab};

/// Locally adaptive contrast enhancement.
#[derive(Debug, Clone)]
pub struct ContrastEnhancer {
    tiles: u32,
    clip_limit: f32,
    blend: f32,
}

impl ContrastEnhancer {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            tiles: tuning.clahe_tiles,
            clip_limit: tuning.clahe_clip_limit,
            blend: tuning.contrast_blend,
        }
    }

    /// Enhance a grayscale image. Returns the input unchanged on failure.
    #[instrument(skip_all, fields(width = gray.width(), height = gray.height()))]
    pub fn enhance(&self, gray: GrayImage) -> GrayImage {
        match self.try_enhance(&gray) {
            Ok(enhanced) => enhanced,
            Err(err) => {
                warn!(error = %err, "Contrast enhancement skipped");
                gray
            }
        }
    }

    /// Equalize, then blend `blend * equalized + (1 - blend) * original`.
    pub fn try_enhance(&self, gray: &GrayImage) -> Result<GrayImage> {
        let equalized = self.clahe(gray)?;
        let blend = self.blend;
        let mut out = GrayImage::new(gray.width(), gray.height());
        for ((dst, eq), orig) in out.pixels_mut().zip(equalized.pixels()).zip(gray.pixels()) {
            dst.0[0] = mix(eq.0[0], orig.0[0], blend);
        }
        debug!(tiles = self.tiles, clip_limit = self.clip_limit, blend, "Contrast enhanced");
        Ok(out)
    }

    /// Enhance only the lightness of a color image, keeping hue and
    /// saturation. Returns the input unchanged on failure.
    #[instrument(skip_all, fields(width = rgb.width(), height = rgb.height()))]
    pub fn enhance_color(&self, rgb: RgbImage) -> RgbImage {
        match self.try_enhance_color(&rgb) {
            Ok(enhanced) => enhanced,
            Err(err) => {
                warn!(error = %err, "Color contrast enhancement skipped");
                rgb
            }
        }
    }

    pub fn try_enhance_color(&self, rgb: &RgbImage) -> Result<RgbImage> {
        let (width, height) = rgb.dimensions();
        let lab: Vec<_> = rgb.pixels().map(|p| rgb_to_lab(p.0)).collect();

        let mut lightness = GrayImage::new(width, height);
        for (dst, px) in lightness.pixels_mut().zip(&lab) {
            *dst = Luma([lightness_to_u8(px.l)]);
        }
        let enhanced = self.try_enhance(&lightness)?;

        let mut out = RgbImage::new(width, height);
        for (((dst, px), before), after) in out
            .pixels_mut()
            .zip(&lab)
            .zip(lightness.pixels())
            .zip(enhanced.pixels())
        {
            let mut shifted = *px;
            let delta = after.0[0] as f32 - before.0[0] as f32;
            shifted.l = (px.l + delta * 100.0 / 255.0).clamp(0.0, 100.0);
            *dst = Rgb(lab_to_rgb(shifted));
        }
        Ok(out)
    }

    /// Contrast-limited equalization with bilinear interpolation between
    /// the mappings of neighbouring tiles.
    fn clahe(&self, gray: &GrayImage) -> Result<GrayImage> {
        let (width, height) = gray.dimensions();
        let n = self.tiles;
        if n == 0 {
            return Err(ScanprepError::step("contrast", "tile grid is empty"));
        }
        if width < n || height < n {
            return Err(ScanprepError::step(
                "contrast",
                format!("{width}x{height} image is smaller than the {n}x{n} tile grid"),
            ));
        }

        let n = n as usize;
        let mut luts = Vec::with_capacity(n * n);
        for ty in 0..n {
            let (y0, y1) = tile_span(ty, n, height);
            for tx in 0..n {
                let (x0, x1) = tile_span(tx, n, width);
                let mut histogram = [0u32; 256];
                for y in y0..y1 {
                    for x in x0..x1 {
                        histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
                    }
                }
                let area = (x1 - x0) * (y1 - y0);
                luts.push(clipped_mapping(&mut histogram, area, self.clip_limit));
            }
        }

        let tile_w = width as f32 / n as f32;
        let tile_h = height as f32 / n as f32;
        let mut out = GrayImage::new(width, height);
        for y in 0..height {
            let (j0, j1, wy) = neighbours(y, tile_h, n);
            for x in 0..width {
                let (i0, i1, wx) = neighbours(x, tile_w, n);
                let v = gray.get_pixel(x, y).0[0] as usize;
                let top = luts[j0 * n + i0][v] * (1.0 - wx) + luts[j0 * n + i1][v] * wx;
                let bottom = luts[j1 * n + i0][v] * (1.0 - wx) + luts[j1 * n + i1][v] * wx;
                let value = top * (1.0 - wy) + bottom * wy;
                out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
            }
        }
        Ok(out)
    }
}

#[inline]
fn mix(enhanced: u8, original: u8, blend: f32) -> u8 {
    (blend * enhanced as f32 + (1.0 - blend) * original as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Pixel range `[start, end)` covered by tile `index` of `count`.
fn tile_span(index: usize, count: usize, extent: u32) -> (u32, u32) {
    let extent = extent as usize;
    ((index * extent / count) as u32, ((index + 1) * extent / count) as u32)
}

/// The two tiles whose centres bracket `coord`, and the weight of the second.
fn neighbours(coord: u32, tile_size: f32, count: usize) -> (usize, usize, f32) {
    let pos = ((coord as f32 + 0.5) / tile_size - 0.5).max(0.0);
    let first = (pos.floor() as usize).min(count - 1);
    let second = (first + 1).min(count - 1);
    let weight = if first == second { 0.0 } else { pos - first as f32 };
    (first, second, weight)
}

/// Clip the histogram, spread the clipped mass over all bins, and turn the
/// result into a cumulative mapping.
fn clipped_mapping(histogram: &mut [u32; 256], area: u32, clip_limit: f32) -> [f32; 256] {
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for bin in histogram.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual as usize).max(1);
        for bin in histogram.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0.0f32; 256];
    let mut cumulative = 0u32;
    for (slot, &count) in lut.iter_mut().zip(histogram.iter()) {
        cumulative += count;
        *slot = (cumulative as f32 * scale).round().min(255.0);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn enhancer() -> ContrastEnhancer {
        ContrastEnhancer::new(&Tuning::default())
    }

    fn mean_abs_change(a: &GrayImage, b: &GrayImage) -> f64 {
        let total: u64 = a
            .pixels()
            .zip(b.pixels())
            .map(|(p, q)| (p.0[0] as i64 - q.0[0] as i64).unsigned_abs())
            .sum();
        total as f64 / (a.width() * a.height()) as f64
    }

    fn low_contrast_noise(seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(128, 128, |_, _| Luma([rng.gen_range(60..=190)]))
    }

    #[test]
    fn clipped_mapping_of_flat_histogram_is_near_identity() {
        let mut histogram = [4u32; 256];
        let lut = clipped_mapping(&mut histogram, 1024, 1.5);
        assert_eq!(lut[255], 255.0);
        for (v, mapped) in lut.iter().enumerate() {
            assert!((mapped - v as f32).abs() <= 1.0, "{v} -> {mapped}");
        }
    }

    #[test]
    fn clipping_conserves_mass() {
        let mut histogram = [0u32; 256];
        histogram[100] = 1000;
        histogram[200] = 24;
        let lut = clipped_mapping(&mut histogram, 1024, 1.5);
        assert_eq!(histogram.iter().sum::<u32>(), 1024);
        assert_eq!(lut[255], 255.0);
    }

    #[test]
    fn stretches_a_narrow_range() {
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 40) as u8]));
        let out = enhancer().enhance(gray.clone());
        let spread = |img: &GrayImage| {
            let (lo, hi) = img
                .pixels()
                .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
            hi - lo
        };
        assert!(spread(&out) > spread(&gray));
    }

    #[test]
    fn second_pass_changes_less_than_first() {
        let original = low_contrast_noise(7);
        let once = enhancer().enhance(original.clone());
        let twice = enhancer().enhance(once.clone());

        let first = mean_abs_change(&original, &once);
        let second = mean_abs_change(&once, &twice);
        assert!(first > 1.0, "first pass did nothing ({first})");
        assert!(
            second < 0.75 * first,
            "no diminishing returns: first {first}, second {second}"
        );
    }

    #[test]
    fn image_smaller_than_grid_is_returned_unchanged() {
        let tiny = GrayImage::from_pixel(3, 3, Luma([10]));
        assert!(enhancer().try_enhance(&tiny).is_err());
        assert_eq!(enhancer().enhance(tiny.clone()), tiny);
    }

    #[test]
    fn color_enhancement_keeps_neutral_pixels_neutral() {
        let rgb = RgbImage::from_fn(64, 64, |x, y| {
            let v = 90 + ((x + y) % 60) as u8;
            Rgb([v, v, v])
        });
        let out = enhancer().enhance_color(rgb.clone());
        assert_ne!(out, rgb);
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!(r.abs_diff(g) <= 1 && g.abs_diff(b) <= 1, "tinted pixel {:?}", p.0);
        }
    }

    #[test]
    fn color_enhancement_keeps_hue() {
        let rgb = RgbImage::from_fn(64, 64, |x, _| Rgb([120 + (x % 50) as u8, 60, 60]));
        let out = enhancer().enhance_color(rgb);
        for p in out.pixels() {
            let lab = rgb_to_lab(p.0);
            assert!(lab.a > 0.0, "red lost its hue: {:?}", p.0);
        }
    }
}
