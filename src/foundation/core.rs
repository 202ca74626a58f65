use crate::foundation::error::{MosaicError, MosaicResult};

/// Grid dimensions in cells (`cols` = grid width, `rows` = grid height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GridDims {
    pub cols: u32,
    pub rows: u32,
}

impl GridDims {
    /// Create validated grid dimensions (both axes must be > 0).
    pub fn new(cols: u32, rows: u32) -> MosaicResult<Self> {
        if cols == 0 || rows == 0 {
            return Err(MosaicError::configuration(format!(
                "grid dimensions must be positive, got {cols}x{rows}"
            )));
        }
        Ok(Self { cols, rows })
    }

    pub fn cell_count(self) -> usize {
        (self.cols as usize).saturating_mul(self.rows as usize)
    }

    /// Row-major index of `coord`.
    pub fn index_of(self, coord: CellCoord) -> usize {
        (coord.row as usize) * (self.cols as usize) + (coord.col as usize)
    }

    /// Inverse of [`GridDims::index_of`].
    pub fn coord_of(self, index: usize) -> CellCoord {
        let cols = self.cols as usize;
        CellCoord {
            row: (index / cols) as u32,
            col: (index % cols) as u32,
        }
    }

    pub fn contains(self, coord: CellCoord) -> bool {
        coord.row < self.rows && coord.col < self.cols
    }
}

/// Composite canvas size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OutputDims {
    pub width: u32,
    pub height: u32,
}

impl OutputDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Cell position. Ordering is row-major: smaller row first, then smaller column.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(row {}, col {})", self.row, self.col)
    }
}

/// Axis-aligned pixel rectangle `[x, x + width) x [y, y + height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(self) -> u32 {
        self.y + self.height
    }

    pub fn contains(self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// Photo identity. Ids are handed out from a monotonic counter, so id order is arrival order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PhotoId(pub u64);

impl std::fmt::Display for PhotoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "photo#{}", self.0)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
