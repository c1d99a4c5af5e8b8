// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module: decoding into pixel buffers, color-space conversion, and
// canvas-expanding rotation.

pub mod buffer;
pub mod color;
pub mod geometry;

pub use buffer::{ImageSource, PixelBuffer, decode};
