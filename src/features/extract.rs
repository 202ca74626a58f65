use image::DynamicImage;

use crate::foundation::error::{MosaicError, MosaicResult};
use crate::foundation::math::mean_luma;

/// Default edge above which photos are downsampled before averaging.
pub const DEFAULT_SAMPLE_EDGE: u32 = 128;

/// Mean luma of `photo` in `[0, 255]`.
pub fn extract(photo: &DynamicImage) -> MosaicResult<f64> {
    extract_with(photo, DEFAULT_SAMPLE_EDGE)
}

/// Like [`extract`], downsampling so neither edge exceeds `sample_edge`.
///
/// Downsampling keeps aspect ratio and is deterministic, so the same photo always yields the
/// same signature.
pub fn extract_with(photo: &DynamicImage, sample_edge: u32) -> MosaicResult<f64> {
    let (w, h) = (photo.width(), photo.height());
    if w == 0 || h == 0 {
        return Err(MosaicError::empty_image(format!("photo is {w}x{h}")));
    }

    let edge = sample_edge.max(1);
    let rgb = if w > edge || h > edge {
        photo.thumbnail(edge, edge).to_rgb8()
    } else {
        photo.to_rgb8()
    };
    mean_luma(&rgb).ok_or_else(|| MosaicError::empty_image("downsampled photo has no pixels"))
}

/// Decode uploaded bytes into a raster.
pub fn decode_photo(bytes: &[u8]) -> MosaicResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(MosaicError::decode("upload is empty"));
    }
    let img = image::load_from_memory(bytes).map_err(|e| MosaicError::decode(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(MosaicError::empty_image(format!(
            "photo is {}x{}",
            img.width(),
            img.height()
        )));
    }
    Ok(img)
}

/// Decode and extract in one step.
pub fn extract_bytes(bytes: &[u8], sample_edge: u32) -> MosaicResult<f64> {
    extract_with(&decode_photo(bytes)?, sample_edge)
}
