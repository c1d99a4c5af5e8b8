// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rotation about the image centre onto an expanded canvas, so no content is
// clipped. Operates on both 8-bit gray and 8-bit RGB buffers.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use scanprep_core::error::{Result, ScanprepError};
use tracing::debug;

/// Largest canvas side accepted after expansion.
const MAX_CANVAS_SIDE: f64 = 65_535.0;

/// Canvas size and pixel mapping for a clockwise rotation of `degrees`
/// (image coordinates, y pointing down).
fn expanded_rotation(width: u32, height: u32, degrees: f64) -> Result<(Projection, u32, u32)> {
    if !degrees.is_finite() {
        return Err(ScanprepError::step("rotate", format!("angle {degrees} is not finite")));
    }
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let (w, h) = (width as f64, height as f64);

    let new_w = (h * sin + w * cos).round().max(1.0);
    let new_h = (h * cos + w * sin).round().max(1.0);
    if new_w > MAX_CANVAS_SIDE || new_h > MAX_CANVAS_SIDE {
        return Err(ScanprepError::step(
            "rotate",
            format!("rotated canvas {new_w}x{new_h} is too large"),
        ));
    }

    // Move the source centre to the origin, rotate, then move it to the
    // centre of the expanded canvas.
    let projection = Projection::translate(new_w as f32 / 2.0, new_h as f32 / 2.0)
        * Projection::rotate(radians as f32)
        * Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0);

    debug!(degrees, new_w, new_h, "Expanded rotation prepared");
    Ok((projection, new_w as u32, new_h as u32))
}

/// Rotate a grayscale image clockwise by `degrees`, filling uncovered
/// pixels with `fill`.
pub fn rotate_gray_expanded(image: &GrayImage, degrees: f64, fill: u8) -> Result<GrayImage> {
    let (projection, w, h) = expanded_rotation(image.width(), image.height(), degrees)?;
    let mut out = GrayImage::from_pixel(w, h, Luma([fill]));
    warp_into(image, &projection, Interpolation::Bicubic, Luma([fill]), &mut out);
    Ok(out)
}

/// Rotate an RGB image clockwise by `degrees`, filling uncovered pixels
/// with `fill`.
pub fn rotate_rgb_expanded(image: &RgbImage, degrees: f64, fill: [u8; 3]) -> Result<RgbImage> {
    let (projection, w, h) = expanded_rotation(image.width(), image.height(), degrees)?;
    let mut out = RgbImage::from_pixel(w, h, Rgb(fill));
    warp_into(image, &projection, Interpolation::Bicubic, Rgb(fill), &mut out);
    Ok(out)
}
