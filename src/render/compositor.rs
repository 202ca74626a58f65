use std::sync::Arc;

use image::{Rgb, RgbImage, imageops::FilterType};
use rayon::prelude::*;

use crate::features::prepare::PreparedPhoto;
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::foundation::math::gray_level;
use crate::grid::target::{GridCell, TargetGrid};

/// Everything needed to draw one frame: the grid and, per cell (row-major), its occupant.
///
/// Snapshots only hold `Arc`s, so taking one under the assignment lock is cheap and the
/// expensive drawing happens after the lock is released.
#[derive(Clone, Debug)]
pub struct CompositionSnapshot {
    pub grid: Arc<TargetGrid>,
    pub tiles: Vec<Option<Arc<PreparedPhoto>>>,
}

impl CompositionSnapshot {
    /// Snapshot with every cell empty.
    pub fn empty(grid: Arc<TargetGrid>) -> Self {
        let tiles = vec![None; grid.len()];
        Self { grid, tiles }
    }

    pub fn filled(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }
}

/// Draw the composite for `snapshot`.
///
/// Filled cells get their photo aspect-filled (centre crop) into the cell rectangle; empty cells
/// get a flat gray at the cell's target brightness. Cells are prepared in parallel but copied
/// into the canvas in row-major order, so the output is identical for identical input.
#[tracing::instrument(skip(snapshot), fields(cells = snapshot.tiles.len(), filled = snapshot.filled()))]
pub fn render(snapshot: &CompositionSnapshot) -> MosaicResult<RgbImage> {
    let grid = &snapshot.grid;
    if snapshot.tiles.len() != grid.len() {
        return Err(MosaicError::render(format!(
            "snapshot has {} tiles for {} cells",
            snapshot.tiles.len(),
            grid.len()
        )));
    }

    let patches: Vec<RgbImage> = grid
        .cells()
        .par_iter()
        .zip(snapshot.tiles.par_iter())
        .map(|(cell, tile)| cell_patch(cell, tile.as_deref()))
        .collect();

    let out = grid.output();
    let mut canvas = RgbImage::new(out.width, out.height);
    for (cell, patch) in grid.cells().iter().zip(&patches) {
        image::imageops::replace(
            &mut canvas,
            patch,
            i64::from(cell.rect.x),
            i64::from(cell.rect.y),
        );
    }
    Ok(canvas)
}

fn cell_patch(cell: &GridCell, tile: Option<&PreparedPhoto>) -> RgbImage {
    let (w, h) = (cell.rect.width, cell.rect.height);
    match tile {
        Some(p) => fit_tile(&p.tile, w, h),
        None => {
            let g = gray_level(cell.target);
            RgbImage::from_pixel(w, h, Rgb([g, g, g]))
        }
    }
}

/// Scale `tile` to cover `w`x`h`, cropping the overflow evenly from both sides.
pub fn fit_tile(tile: &RgbImage, w: u32, h: u32) -> RgbImage {
    let (tw, th) = tile.dimensions();
    if tw == 0 || th == 0 {
        return RgbImage::new(w, h);
    }
    if (tw, th) == (w, h) {
        return tile.clone();
    }

    // Largest crop of `tile` with the target aspect ratio.
    let (cw, ch) = if u64::from(tw) * u64::from(h) > u64::from(th) * u64::from(w) {
        let cw = (u64::from(th) * u64::from(w) / u64::from(h)).max(1) as u32;
        (cw.min(tw), th)
    } else {
        let ch = (u64::from(tw) * u64::from(h) / u64::from(w)).max(1) as u32;
        (tw, ch.min(th))
    };
    let cropped = image::imageops::crop_imm(tile, (tw - cw) / 2, (th - ch) / 2, cw, ch).to_image();
    image::imageops::resize(&cropped, w, h, FilterType::Triangle)
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
