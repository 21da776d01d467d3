//! Splits a 2x2 composite into four tightly cropped quadrant artifacts.

use std::io::Cursor;

use atelier_contracts::config::TrimSettings;
use atelier_contracts::error::StudioError;
use atelier_contracts::naming::quadrant_name;
use image::{imageops, DynamicImage, ImageFormat, ImageReader, RgbImage};
use serde::Serialize;

use crate::store::ArtifactStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridSplit {
    pub composite: String,
    /// Written quadrant names in ordinal order. Fewer than four means some
    /// writes failed; see `warnings`.
    pub quadrants: Vec<String>,
    pub warnings: Vec<String>,
}

/// Inclusive bounding box of content pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// Top-left corners of the four quadrants in row-major order.
///
/// Odd widths or heights lose their last column or row; the quadrants are
/// always `(width / 2, height / 2)`.
pub fn quadrant_origins(width: u32, height: u32) -> [(u32, u32); 4] {
    let (qw, qh) = (width / 2, height / 2);
    [(0, 0), (qw, 0), (0, qh), (qw, qh)]
}

pub fn content_bounds(image: &RgbImage, threshold: u8) -> Option<ContentBounds> {
    let mut bounds: Option<ContentBounds> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if !pixel.0.iter().any(|channel| *channel < threshold) {
            continue;
        }
        bounds = Some(match bounds {
            None => ContentBounds {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            },
            Some(current) => ContentBounds {
                min_x: current.min_x.min(x),
                min_y: current.min_y.min(y),
                max_x: current.max_x.max(x),
                max_y: current.max_y.max(y),
            },
        });
    }
    bounds
}

/// Crops near-white margins, keeping `padding` pixels around the content.
/// A quadrant with no content comes back untouched.
pub fn trim_borders(image: RgbImage, trim: TrimSettings) -> RgbImage {
    let Some(bounds) = content_bounds(&image, trim.threshold) else {
        return image;
    };
    let (width, height) = image.dimensions();
    let left = bounds.min_x.saturating_sub(trim.padding);
    let top = bounds.min_y.saturating_sub(trim.padding);
    let right = bounds
        .max_x
        .saturating_add(1)
        .saturating_add(trim.padding)
        .min(width);
    let bottom = bounds
        .max_y
        .saturating_add(1)
        .saturating_add(trim.padding)
        .min(height);
    imageops::crop_imm(&image, left, top, right - left, bottom - top).to_image()
}

pub fn decode_image(name: &str, bytes: &[u8]) -> Result<DynamicImage, StudioError> {
    let decode_err = |reason: String| StudioError::Decode {
        name: name.to_string(),
        reason,
    };
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| decode_err(err.to_string()))?
        .decode()
        .map_err(|err| decode_err(err.to_string()))
}

pub fn encode_image(name: &str, image: DynamicImage) -> Result<Vec<u8>, String> {
    let format = ImageFormat::from_path(name).unwrap_or(ImageFormat::Png);
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), format)
        .map_err(|err| format!("failed to encode {name}: {err}"))?;
    Ok(out)
}

/// Splits `composite` into `<base>_1..4.<ext>` next to it.
///
/// The composite is decoded by content, not extension. When
/// `discard_composite` is set it is removed afterwards, including after a
/// decode failure, so a failed split leaves nothing behind; a failed removal
/// is only logged.
pub fn decompose(
    store: &ArtifactStore,
    composite: &str,
    discard_composite: bool,
    trim: TrimSettings,
) -> Result<GridSplit, StudioError> {
    let bytes = store.read(composite)?;
    let decoded = decode_image(composite, &bytes);
    let image = match decoded {
        Ok(image) => image.to_rgb8(),
        Err(err) => {
            if discard_composite {
                discard(store, composite);
            }
            return Err(err);
        }
    };

    let (width, height) = image.dimensions();
    let (qw, qh) = (width / 2, height / 2);
    let mut quadrants = Vec::with_capacity(4);
    let mut warnings = Vec::new();
    let mut last_storage_err = None;

    for (idx, (x, y)) in quadrant_origins(width, height).into_iter().enumerate() {
        let name = quadrant_name(composite, idx + 1);
        let cell = imageops::crop_imm(&image, x, y, qw, qh).to_image();
        let trimmed = trim_borders(cell, trim);
        let encoded = match encode_image(&name, DynamicImage::ImageRgb8(trimmed)) {
            Ok(encoded) => encoded,
            Err(reason) => {
                tracing::warn!(quadrant = %name, %reason, "quadrant encode failed");
                warnings.push(reason);
                continue;
            }
        };
        match store.write(&name, &encoded) {
            Ok(_) => quadrants.push(name),
            Err(err) => {
                tracing::warn!(quadrant = %name, error = %err, "quadrant write failed");
                warnings.push(err.to_string());
                last_storage_err = Some(err);
            }
        }
    }

    if discard_composite {
        discard(store, composite);
    }

    if quadrants.is_empty() {
        return Err(last_storage_err.unwrap_or_else(|| StudioError::Decode {
            name: composite.to_string(),
            reason: warnings.join("; "),
        }));
    }

    tracing::debug!(composite, count = quadrants.len(), "split composite");
    Ok(GridSplit {
        composite: composite.to_string(),
        quadrants,
        warnings,
    })
}

fn discard(store: &ArtifactStore, composite: &str) {
    if let Err(err) = store.remove(composite) {
        tracing::warn!(composite, error = %err, "could not remove composite");
    }
}
