use image::{DynamicImage, RgbImage, imageops::FilterType};

use crate::foundation::core::{CellCoord, GridDims, OutputDims, PixelRect};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::foundation::math::{clamp_brightness, mean_luma_in};
use crate::grid::emblem::EmblemSource;
use crate::grid::partition::{cell_rects, partition_axis, validate_layout};

/// One cell of the target grid: where it sits on the canvas and how bright it should look.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridCell {
    pub coord: CellCoord,
    /// Mean luma of the emblem region behind this cell, in `[0, 255]`.
    pub target: f64,
    /// Rectangle in output (composite) space.
    pub rect: PixelRect,
}

/// Immutable per-cell brightness targets derived from an emblem.
///
/// A new layout always produces a new `TargetGrid`; nothing mutates one in place.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetGrid {
    dims: GridDims,
    output: OutputDims,
    cells: Vec<GridCell>,
}

impl TargetGrid {
    /// Decode the emblem and derive targets for a `grid` laid over an `output` canvas.
    #[tracing::instrument(skip(emblem), fields(emblem = %emblem.describe()))]
    pub fn configure(
        grid: GridDims,
        emblem: &EmblemSource,
        output: OutputDims,
    ) -> MosaicResult<Self> {
        validate_layout(grid, output)?;
        let image = emblem.decode()?;
        let out = Self::from_emblem(grid, &image, output)?;
        tracing::info!(
            cols = grid.cols,
            rows = grid.rows,
            width = output.width,
            height = output.height,
            "target grid configured"
        );
        Ok(out)
    }

    /// Derive targets from an already decoded emblem.
    ///
    /// The emblem is split with the same near-equal partition as the canvas. Emblems smaller than
    /// the grid are first upscaled so every region covers at least one pixel.
    pub fn from_emblem(
        grid: GridDims,
        emblem: &DynamicImage,
        output: OutputDims,
    ) -> MosaicResult<Self> {
        validate_layout(grid, output)?;
        if emblem.width() == 0 || emblem.height() == 0 {
            return Err(MosaicError::configuration("emblem image has zero area"));
        }

        let rgb = emblem_rgb_for(grid, emblem);
        let xs = partition_axis(rgb.width(), grid.cols);
        let ys = partition_axis(rgb.height(), grid.rows);

        let mut targets = Vec::with_capacity(grid.cell_count());
        for &(y, height) in &ys {
            for &(x, width) in &xs {
                let region = PixelRect {
                    x,
                    y,
                    width,
                    height,
                };
                let t = mean_luma_in(&rgb, region).ok_or_else(|| {
                    MosaicError::configuration("emblem region has zero area")
                })?;
                targets.push(t);
            }
        }
        Self::from_targets(grid, &targets, output)
    }

    /// Build a grid from explicit row-major targets.
    pub fn from_targets(grid: GridDims, targets: &[f64], output: OutputDims) -> MosaicResult<Self> {
        let rects = cell_rects(grid, output)?;
        if targets.len() != rects.len() {
            return Err(MosaicError::configuration(format!(
                "expected {} targets for a {}x{} grid, got {}",
                rects.len(),
                grid.cols,
                grid.rows,
                targets.len()
            )));
        }
        if targets.iter().any(|t| !t.is_finite()) {
            return Err(MosaicError::configuration("targets must be finite"));
        }

        let cells = rects
            .into_iter()
            .zip(targets)
            .enumerate()
            .map(|(i, (rect, &target))| GridCell {
                coord: grid.coord_of(i),
                target: clamp_brightness(target),
                rect,
            })
            .collect();

        Ok(Self {
            dims: grid,
            output,
            cells,
        })
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn output(&self) -> OutputDims {
        self.output
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, coord: CellCoord) -> Option<&GridCell> {
        if !self.dims.contains(coord) {
            return None;
        }
        self.cells.get(self.dims.index_of(coord))
    }

    pub fn targets(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().map(|c| c.target)
    }
}

fn emblem_rgb_for(grid: GridDims, emblem: &DynamicImage) -> RgbImage {
    let (w, h) = (emblem.width(), emblem.height());
    if w >= grid.cols && h >= grid.rows {
        return emblem.to_rgb8();
    }
    emblem
        .resize_exact(w.max(grid.cols), h.max(grid.rows), FilterType::Triangle)
        .to_rgb8()
}

#[cfg(test)]
#[path = "../../tests/unit/grid/target.rs"]
mod tests;
