// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image buffer adapter. Turns a path or encoded bytes into a single pixel
// representation (8-bit gray or 8-bit RGB), whatever the container and
// sample layout of the source.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use scanprep_core::error::{Result, ScanprepError};
use tracing::{debug, info, instrument, warn};

/// Where the pixels of an image come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// Encoded bytes, with an optional file extension used when the
    /// container cannot be recognised from its content.
    Bytes {
        data: Vec<u8>,
        format_hint: Option<String>,
    },
}

impl ImageSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            data: data.into(),
            format_hint: None,
        }
    }
}

/// Decoded pixels with one or three 8-bit channels.
///
/// Geometry operations apply to both variants; color-space operations need
/// `Color`.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Gray(GrayImage),
    Color(RgbImage),
}

impl PixelBuffer {
    /// Normalise any decoded layout. Alpha is dropped, 16-bit and float
    /// samples are scaled down to 8 bits.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ScanprepError::UnsupportedLayout(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }
        let buffer = match image {
            DynamicImage::ImageLuma8(gray) => Self::Gray(gray),
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => Self::Gray(image.to_luma8()),
            DynamicImage::ImageRgb8(rgb) => Self::Color(rgb),
            other => Self::Color(other.to_rgb8()),
        };
        Ok(buffer)
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Color(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Color(img) => img.height(),
        }
    }

    pub fn channel_count(&self) -> u8 {
        match self {
            Self::Gray(_) => 1,
            Self::Color(_) => 3,
        }
    }

    /// Luminance derivative used by every grayscale step.
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Self::Gray(img) => img.clone(),
            Self::Color(img) => DynamicImage::ImageRgb8(img.clone()).to_luma8(),
        }
    }

    /// Three-channel view; gray samples are replicated.
    pub fn to_color(&self) -> RgbImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            Self::Color(img) => img.clone(),
        }
    }

    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img),
            Self::Color(img) => DynamicImage::ImageRgb8(img),
        }
    }

    /// Encode as PNG.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        let written = match self {
            Self::Gray(img) => img.write_to(&mut cursor, ImageFormat::Png),
            Self::Color(img) => img.write_to(&mut cursor, ImageFormat::Png),
        };
        written.map_err(|err| ScanprepError::Encode(format!("PNG encoding failed: {}", err)))?;
        Ok(buffer)
    }
}

/// Decode an image source into a `PixelBuffer`.
///
/// The container is first recognised from its content. When that fails the
/// file extension (or `format_hint`) selects the decoder instead. Only when
/// both paths fail is `ScanprepError::Decode` returned.
#[instrument(skip_all)]
pub fn decode(source: &ImageSource) -> Result<PixelBuffer> {
    let buffer = match source {
        ImageSource::Path(path) => {
            let data = std::fs::read(path).map_err(|err| {
                ScanprepError::Decode(format!("failed to read {}: {}", path.display(), err))
            })?;
            decode_bytes(&data, ImageFormat::from_path(path).ok(), Some(path))?
        }
        ImageSource::Bytes { data, format_hint } => {
            let hint = format_hint.as_deref().and_then(ImageFormat::from_extension);
            decode_bytes(data, hint, None)?
        }
    };
    info!(
        width = buffer.width(),
        height = buffer.height(),
        channels = buffer.channel_count(),
        "Image decoded"
    );
    Ok(buffer)
}

fn decode_bytes(
    data: &[u8],
    fallback_format: Option<ImageFormat>,
    origin: Option<&Path>,
) -> Result<PixelBuffer> {
    let label = origin
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("<{} bytes>", data.len()));

    if data.is_empty() {
        return Err(ScanprepError::Decode(format!("{label} is empty")));
    }

    let primary_err = match image::load_from_memory(data) {
        Ok(image) => return PixelBuffer::from_dynamic(image),
        Err(err) => err,
    };

    let Some(format) = fallback_format else {
        return Err(ScanprepError::Decode(format!("{label}: {primary_err}")));
    };

    warn!(
        source = %label,
        ?format,
        error = %primary_err,
        "Content sniffing failed; decoding by declared format"
    );
    let image = image::load_from_memory_with_format(data, format).map_err(|err| {
        ScanprepError::Decode(format!(
            "{label}: {primary_err}; as {format:?}: {err}"
        ))
    })?;
    debug!(?format, "Fallback decoder succeeded");
    PixelBuffer::from_dynamic(image)
}
