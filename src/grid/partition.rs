use crate::foundation::core::{GridDims, OutputDims, PixelRect};
use crate::foundation::error::{MosaicError, MosaicResult};

/// Reject layouts that cannot give every cell at least one pixel.
pub fn validate_layout(grid: GridDims, output: OutputDims) -> MosaicResult<()> {
    GridDims::new(grid.cols, grid.rows)?;
    if output.width < grid.cols || output.height < grid.rows {
        return Err(MosaicError::configuration(format!(
            "output {}x{} is smaller than grid {}x{}",
            output.width, output.height, grid.cols, grid.rows
        )));
    }
    Ok(())
}

/// Split `len` pixels into `parts` contiguous `(start, span)` pairs.
///
/// Every span is `len / parts` wide; the last one also absorbs `len % parts`. Callers guarantee
/// `parts > 0` and `len >= parts`.
pub fn partition_axis(len: u32, parts: u32) -> Vec<(u32, u32)> {
    debug_assert!(parts > 0 && len >= parts);
    let base = len / parts;
    let rem = len % parts;
    (0..parts)
        .map(|i| {
            let start = i * base;
            let span = if i + 1 == parts { base + rem } else { base };
            (start, span)
        })
        .collect()
}

/// Row-major pixel rectangles for every cell; together they tile the canvas exactly.
pub fn cell_rects(grid: GridDims, output: OutputDims) -> MosaicResult<Vec<PixelRect>> {
    validate_layout(grid, output)?;
    let xs = partition_axis(output.width, grid.cols);
    let ys = partition_axis(output.height, grid.rows);
    let mut out = Vec::with_capacity(grid.cell_count());
    for &(y, height) in &ys {
        for &(x, width) in &xs {
            out.push(PixelRect {
                x,
                y,
                width,
                height,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "../../tests/unit/grid/partition.rs"]
mod tests;
