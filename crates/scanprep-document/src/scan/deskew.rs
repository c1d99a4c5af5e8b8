// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew estimation and correction.
//
// The orientation of the page content is taken from the principal axis of
// the ink pixel cloud: the eigenvector of the largest eigenvalue of the 2x2
// coordinate covariance. Text orientation is ambiguous modulo 90 degrees,
// so only the residual in [-45, 45] is corrected.

use image::{DynamicImage, GrayImage, RgbImage};
use scanprep_core::Tuning;
use scanprep_core::error::{Result, ScanprepError};
use tracing::{debug, info, instrument, warn};

use crate::image::geometry::{rotate_gray_expanded, rotate_rgb_expanded};

/// Background written into the corners uncovered by a rotation.
const PAPER_WHITE: u8 = 255;

/// Outcome of analysing the ink distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkewEstimate {
    /// Too few ink pixels to say anything.
    InsufficientSignal { foreground: usize },
    /// Dominant axis angle in degrees, folded into [-45, 45]. Positive
    /// means the content runs clockwise (downwards to the right).
    Angle { degrees: f64, foreground: usize },
}

/// Estimates and undoes content rotation. Never fails a pipeline: every
/// estimation problem means "no correction".
#[derive(Debug, Clone)]
pub struct Deskewer {
    min_foreground: usize,
    ink_threshold: u8,
    min_degrees: f64,
}

impl Deskewer {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            min_foreground: tuning.min_foreground_pixels,
            ink_threshold: tuning.ink_threshold,
            min_degrees: tuning.min_skew_degrees,
        }
    }

    /// Analyse the ink cloud of a grayscale image.
    pub fn estimate(&self, gray: &GrayImage) -> Result<SkewEstimate> {
        let mut n = 0usize;
        let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel.0[0] < self.ink_threshold {
                n += 1;
                sum_x += x as f64;
                sum_y += y as f64;
            }
        }
        if n < self.min_foreground.max(2) {
            return Ok(SkewEstimate::InsufficientSignal { foreground: n });
        }

        let (mean_x, mean_y) = (sum_x / n as f64, sum_y / n as f64);
        let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel.0[0] < self.ink_threshold {
                let dx = x as f64 - mean_x;
                let dy = y as f64 - mean_y;
                sxx += dx * dx;
                syy += dy * dy;
                sxy += dx * dy;
            }
        }
        let denom = (n - 1) as f64;
        let degrees = principal_axis_degrees(sxx / denom, syy / denom, sxy / denom)?;

        debug!(foreground = n, degrees, "Skew estimated");
        Ok(SkewEstimate::Angle {
            degrees,
            foreground: n,
        })
    }

    /// Angle worth correcting, or `None` when the image should be left
    /// alone (too little ink, angle within tolerance, or estimation failed).
    pub fn correction_angle(&self, gray: &GrayImage) -> Option<f64> {
        match self.estimate(gray) {
            Ok(SkewEstimate::Angle { degrees, .. }) if degrees.abs() > self.min_degrees => {
                Some(degrees)
            }
            Ok(SkewEstimate::Angle { degrees, .. }) => {
                debug!(degrees, tolerance = self.min_degrees, "Skew within tolerance");
                None
            }
            Ok(SkewEstimate::InsufficientSignal { foreground }) => {
                debug!(foreground, "Too little ink to estimate skew");
                None
            }
            Err(err) => {
                warn!(error = %err, "Skew estimation failed; leaving image unrotated");
                None
            }
        }
    }

    /// Rotate a grayscale image by `-angle` onto an expanded white canvas.
    pub fn try_rotate_gray(&self, gray: &GrayImage, angle: f64) -> Result<GrayImage> {
        rotate_gray_expanded(gray, -angle, PAPER_WHITE)
    }

    /// Rotate a color image by `-angle` onto an expanded white canvas.
    pub fn try_rotate_color(&self, rgb: &RgbImage, angle: f64) -> Result<RgbImage> {
        rotate_rgb_expanded(rgb, -angle, [PAPER_WHITE; 3])
    }

    /// Estimate and undo skew of a grayscale image. Returns the input
    /// untouched whenever no confident, non-negligible angle is found.
    #[instrument(skip_all, fields(width = gray.width(), height = gray.height()))]
    pub fn deskew(&self, gray: GrayImage) -> GrayImage {
        let Some(angle) = self.correction_angle(&gray) else {
            return gray;
        };
        match self.try_rotate_gray(&gray, angle) {
            Ok(rotated) => {
                info!(angle, "Deskew applied");
                rotated
            }
            Err(err) => {
                warn!(error = %err, "Deskew rotation failed; returning input");
                gray
            }
        }
    }

    /// Estimate and undo skew of a color image, measuring on its own
    /// luminance.
    #[instrument(skip_all, fields(width = rgb.width(), height = rgb.height()))]
    pub fn deskew_color(&self, rgb: RgbImage) -> RgbImage {
        let luma = DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        let Some(angle) = self.correction_angle(&luma) else {
            return rgb;
        };
        match self.try_rotate_color(&rgb, angle) {
            Ok(rotated) => {
                info!(angle, "Color deskew applied");
                rotated
            }
            Err(err) => {
                warn!(error = %err, "Color deskew rotation failed; returning input");
                rgb
            }
        }
    }
}

/// Direction of the dominant eigenvector of the covariance
/// `[[sxx, sxy], [sxy, syy]]`, in degrees folded into [-45, 45].
fn principal_axis_degrees(sxx: f64, syy: f64, sxy: f64) -> Result<f64> {
    if !(sxx.is_finite() && syy.is_finite() && sxy.is_finite()) {
        return Err(ScanprepError::step("deskew", "covariance is not finite"));
    }
    if sxx + syy <= f64::EPSILON {
        return Err(ScanprepError::step("deskew", "ink pixels have no spread"));
    }

    let half_trace = (sxx + syy) / 2.0;
    let spread = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
    let largest = half_trace + spread;

    let (mut vx, mut vy) = if sxy.abs() > f64::EPSILON * half_trace {
        (largest - syy, sxy)
    } else if sxx >= syy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };
    // Eigenvectors have no sign; pick the one pointing right.
    if vx < 0.0 || (vx == 0.0 && vy < 0.0) {
        vx = -vx;
        vy = -vy;
    }

    let mut degrees = vy.atan2(vx).to_degrees();
    if degrees > 45.0 {
        degrees -= 90.0;
    } else if degrees < -45.0 {
        degrees += 90.0;
    }
    Ok(degrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn deskewer() -> Deskewer {
        Deskewer::new(&Tuning::default())
    }

    /// White page with a wide block of dark text-line bars.
    fn text_page(width: u32, height: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([PAPER_WHITE]));
        let (left, right) = (width / 8, width - width / 8);
        let (top, bottom) = (height / 4, height - height / 4);
        let mut y = top;
        while y + 4 <= bottom {
            for row in y..y + 4 {
                for x in left..right {
                    img.put_pixel(x, row, Luma([20]));
                }
            }
            y += 12;
        }
        img
    }

    fn estimated(gray: &GrayImage) -> f64 {
        match deskewer().estimate(gray).expect("estimate") {
            SkewEstimate::Angle { degrees, .. } => degrees,
            other => panic!("expected an angle, got {other:?}"),
        }
    }

    #[test]
    fn principal_axis_of_axis_aligned_clouds() {
        assert_eq!(principal_axis_degrees(10.0, 1.0, 0.0).expect("axis"), 0.0);
        // A vertical cloud folds to zero as well.
        assert_eq!(principal_axis_degrees(1.0, 10.0, 0.0).expect("axis"), 0.0);
    }

    #[test]
    fn principal_axis_of_diagonal_cloud() {
        // Covariance of points along y = tan(20deg) * x.
        let t = 20f64.to_radians().tan();
        let degrees = principal_axis_degrees(1.0, t * t, t).expect("axis");
        assert!((degrees - 20.0).abs() < 1e-9, "got {degrees}");
    }

    #[test]
    fn degenerate_covariance_is_an_error() {
        assert!(principal_axis_degrees(0.0, 0.0, 0.0).is_err());
        assert!(principal_axis_degrees(f64::NAN, 1.0, 0.0).is_err());
    }

    #[test]
    fn sparse_ink_leaves_image_untouched() {
        let mut img = GrayImage::from_pixel(200, 200, Luma([PAPER_WHITE]));
        // 99 ink pixels on a diagonal: a strong but insufficient signal.
        for i in 0..99 {
            img.put_pixel(i + 50, i / 2 + 50, Luma([0]));
        }
        let out = deskewer().deskew(img.clone());
        assert_eq!(out, img);
        assert!(matches!(
            deskewer().estimate(&img).expect("estimate"),
            SkewEstimate::InsufficientSignal { foreground: 99 }
        ));
    }

    #[test]
    fn blank_page_leaves_image_untouched() {
        let img = GrayImage::from_pixel(120, 80, Luma([PAPER_WHITE]));
        assert_eq!(deskewer().deskew(img.clone()), img);
    }

    #[test]
    fn small_skew_leaves_image_untouched() {
        let page = text_page(400, 300);
        assert_eq!(deskewer().deskew(page.clone()), page);

        let tilted = rotate_gray_expanded(&page, 1.5, PAPER_WHITE).expect("rotate");
        assert!(estimated(&tilted).abs() <= 2.0);
        assert_eq!(deskewer().deskew(tilted.clone()), tilted);
    }

    #[test]
    fn rotation_is_estimated_with_its_sign() {
        let page = text_page(400, 300);
        let tilted = rotate_gray_expanded(&page, 12.0, PAPER_WHITE).expect("rotate");
        let angle = estimated(&tilted);
        assert!((angle - 12.0).abs() < 1.0, "estimated {angle}");

        let tilted = rotate_gray_expanded(&page, -12.0, PAPER_WHITE).expect("rotate");
        let angle = estimated(&tilted);
        assert!((angle + 12.0).abs() < 1.0, "estimated {angle}");
    }

    #[test]
    fn deskew_converges_towards_alignment() {
        let page = text_page(400, 300);
        for theta in [3.5, 10.0, -17.0, 25.0, 40.0] {
            let tilted = rotate_gray_expanded(&page, theta, PAPER_WHITE).expect("rotate");
            let corrected = deskewer().deskew(tilted.clone());
            assert_ne!(corrected, tilted, "theta {theta}: no correction applied");

            let residual = estimated(&corrected);
            assert!(
                residual.abs() < 1.0,
                "theta {theta}: residual skew {residual}"
            );
        }
    }

    #[test]
    fn deskew_is_stable_on_its_own_output() {
        let page = text_page(400, 300);
        let tilted = rotate_gray_expanded(&page, 9.0, PAPER_WHITE).expect("rotate");
        let once = deskewer().deskew(tilted);
        let twice = deskewer().deskew(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn color_deskew_uses_white_fill() {
        let page = text_page(300, 240);
        let tilted = rotate_gray_expanded(&page, 15.0, PAPER_WHITE).expect("rotate");
        let rgb = DynamicImage::ImageLuma8(tilted).to_rgb8();

        let corrected = deskewer().deskew_color(rgb.clone());
        assert_ne!(corrected.dimensions(), rgb.dimensions());
        assert_eq!(corrected.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }
}
