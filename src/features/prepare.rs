use std::sync::Arc;

use image::{DynamicImage, RgbImage, imageops::FilterType};

use crate::config::EngineConfig;
use crate::features::extract::{DEFAULT_SAMPLE_EDGE, decode_photo, extract_with};
use crate::foundation::error::MosaicResult;

/// A photo reduced to what the engine keeps: a square tile for rendering and its signature.
#[derive(Clone, Debug)]
pub struct PreparedPhoto {
    /// Centre-cropped square, at most `tile_edge` pixels wide.
    pub tile: Arc<RgbImage>,
    /// Mean luma of the full photo.
    pub brightness: f64,
    /// Dimensions of the photo as uploaded.
    pub source_width: u32,
    pub source_height: u32,
}

/// Turns decoded uploads into [`PreparedPhoto`]s. Stateless and cheap to clone, so it can be
/// moved into blocking workers.
#[derive(Clone, Copy, Debug)]
pub struct PhotoPreparer {
    pub tile_edge: u32,
    pub sample_edge: u32,
}

impl Default for PhotoPreparer {
    fn default() -> Self {
        Self {
            tile_edge: 256,
            sample_edge: DEFAULT_SAMPLE_EDGE,
        }
    }
}

impl PhotoPreparer {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            tile_edge: cfg.photo_tile_edge,
            sample_edge: cfg.feature_sample_edge,
        }
    }

    pub fn prepare(&self, photo: &DynamicImage) -> MosaicResult<PreparedPhoto> {
        let brightness = extract_with(photo, self.sample_edge)?;
        let square = center_square(photo);
        let edge = square.width().min(self.tile_edge.max(1));
        let tile = if square.width() == edge {
            square.to_rgb8()
        } else {
            square
                .resize_exact(edge, edge, FilterType::Triangle)
                .to_rgb8()
        };
        Ok(PreparedPhoto {
            tile: Arc::new(tile),
            brightness,
            source_width: photo.width(),
            source_height: photo.height(),
        })
    }

    pub fn prepare_bytes(&self, bytes: &[u8]) -> MosaicResult<PreparedPhoto> {
        self.prepare(&decode_photo(bytes)?)
    }
}

/// Largest centred square of `img`.
pub fn center_square(img: &DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let side = w.min(h);
    img.crop_imm((w - side) / 2, (h - side) / 2, side, side)
}
