use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::features::prepare::PreparedPhoto;
use crate::foundation::core::{CellCoord, PhotoId};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::grid::target::TargetGrid;
use crate::render::compositor::CompositionSnapshot;

/// Deviation charged for a cell nobody fills yet (the largest possible luma distance).
pub const EMPTY_CELL_DEVIATION: f64 = 255.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellState {
    Empty,
    Filled(PhotoId),
}

/// Where a stored photo currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Placement {
    /// Transient: only observable between a re-layout and the replay that follows it.
    Unassigned,
    Assigned { cell: CellCoord },
    /// Held in the overflow queue until a regenerate or an operator replay.
    Overflow,
}

#[derive(Clone, Debug)]
pub struct PhotoRecord {
    pub id: PhotoId,
    pub photo: Arc<PreparedPhoto>,
    pub placement: Placement,
    /// Free-form origin (file name, uploader handle) carried for logs.
    pub label: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentResult {
    Assigned {
        cell: CellCoord,
        /// Occupant moved to the overflow queue to make room.
        evicted: Option<PhotoId>,
    },
    /// Grid full and eviction declined (the `NoCapacity` case).
    Queued,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct RelayoutSummary {
    pub assigned: usize,
    pub queued: usize,
    pub evictions: usize,
}

impl RelayoutSummary {
    fn record(&mut self, r: AssignmentResult) {
        match r {
            AssignmentResult::Assigned { evicted, .. } => {
                self.assigned += 1;
                if evicted.is_some() {
                    self.evictions += 1;
                }
            }
            AssignmentResult::Queued => self.queued += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Empty,
    Partial,
    Full,
}

/// Cell arena + photo arena + overflow queue for one mosaic session.
///
/// Cells store the id of their occupant and photos store the coordinates of their cell; both
/// sides are only ever changed together inside `&mut self` methods, so a caller that owns the
/// engine behind a single lock gets atomic select-and-fill for free.
#[derive(Debug)]
pub struct AssignmentEngine {
    grid: Arc<TargetGrid>,
    cells: Vec<CellState>,
    photos: BTreeMap<PhotoId, PhotoRecord>,
    overflow: BTreeSet<PhotoId>,
    filled: usize,
}

impl AssignmentEngine {
    pub fn new(grid: Arc<TargetGrid>) -> Self {
        let cells = vec![CellState::Empty; grid.len()];
        Self {
            grid,
            cells,
            photos: BTreeMap::new(),
            overflow: BTreeSet::new(),
            filled: 0,
        }
    }

    pub fn grid(&self) -> &Arc<TargetGrid> {
        &self.grid
    }

    /// Take ownership of a new photo and place it.
    pub fn insert(
        &mut self,
        id: PhotoId,
        photo: Arc<PreparedPhoto>,
        label: Option<String>,
    ) -> MosaicResult<AssignmentResult> {
        if self.photos.contains_key(&id) {
            return Err(MosaicError::Other(anyhow::anyhow!(
                "{id} is already owned by this session"
            )));
        }
        self.photos.insert(
            id,
            PhotoRecord {
                id,
                photo,
                placement: Placement::Unassigned,
                label,
            },
        );
        Ok(self.place(id))
    }

    /// Closest empty cell, else evict the worst-fitting occupant if this photo fits its cell
    /// better, else queue.
    fn place(&mut self, id: PhotoId) -> AssignmentResult {
        let brightness = self.photos[&id].photo.brightness;

        if let Some(idx) = self.best_empty_cell(brightness) {
            self.fill(idx, id);
            let cell = self.grid.dims().coord_of(idx);
            tracing::debug!(%id, %cell, brightness, "assigned to empty cell");
            return AssignmentResult::Assigned {
                cell,
                evicted: None,
            };
        }

        if let Some((idx, old)) = self.eviction_candidate(brightness) {
            self.set_placement(old, Placement::Overflow);
            self.overflow.insert(old);
            self.filled -= 1;
            self.fill(idx, id);
            let cell = self.grid.dims().coord_of(idx);
            tracing::info!(%id, evicted = %old, %cell, "evicted occupant to overflow");
            return AssignmentResult::Assigned {
                cell,
                evicted: Some(old),
            };
        }

        self.set_placement(id, Placement::Overflow);
        self.overflow.insert(id);
        tracing::debug!(%id, brightness, "grid full, queued to overflow");
        AssignmentResult::Queued
    }

    fn best_empty_cell(&self, brightness: f64) -> Option<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, CellState::Empty))
            .map(|(i, _)| (i, (self.grid.cells()[i].target - brightness).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i)
    }

    /// The filled cell whose occupant deviates most from its target (row-major first on ties),
    /// provided `brightness` would sit strictly closer to that target.
    fn eviction_candidate(&self, brightness: f64) -> Option<(usize, PhotoId)> {
        let (idx, occupant, worst) = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                CellState::Filled(pid) => Some((i, *pid, self.occupant_deviation(i, *pid))),
                CellState::Empty => None,
            })
            .max_by(|a, b| a.2.total_cmp(&b.2).then(b.0.cmp(&a.0)))?;

        let challenger = (self.grid.cells()[idx].target - brightness).abs();
        (worst > challenger).then_some((idx, occupant))
    }

    fn occupant_deviation(&self, idx: usize, pid: PhotoId) -> f64 {
        (self.grid.cells()[idx].target - self.photos[&pid].photo.brightness).abs()
    }

    fn fill(&mut self, idx: usize, id: PhotoId) {
        let cell = self.grid.dims().coord_of(idx);
        self.cells[idx] = CellState::Filled(id);
        self.filled += 1;
        self.set_placement(id, Placement::Assigned { cell });
    }

    fn set_placement(&mut self, id: PhotoId, placement: Placement) {
        if let Some(rec) = self.photos.get_mut(&id) {
            rec.placement = placement;
        }
    }

    /// Swap in a new grid.
    ///
    /// With `regenerate`, every stored photo (assigned or queued) is replayed in arrival order.
    /// Without it the new grid starts empty and previously assigned photos join the overflow
    /// queue, so none are lost.
    pub fn relayout(&mut self, grid: Arc<TargetGrid>, regenerate: bool) -> RelayoutSummary {
        self.cells = vec![CellState::Empty; grid.len()];
        self.grid = grid;
        self.filled = 0;

        let mut summary = RelayoutSummary::default();
        if regenerate {
            self.overflow.clear();
            let ids: Vec<PhotoId> = self.photos.keys().copied().collect();
            for id in &ids {
                self.set_placement(*id, Placement::Unassigned);
            }
            for id in ids {
                summary.record(self.place(id));
            }
        } else {
            for rec in self.photos.values_mut() {
                if matches!(rec.placement, Placement::Assigned { .. }) {
                    rec.placement = Placement::Overflow;
                    self.overflow.insert(rec.id);
                }
            }
            summary.queued = self.overflow.len();
        }
        summary
    }

    /// Retry every queued photo against the current grid, oldest first.
    ///
    /// Photos evicted during the pass go back to the queue and wait for the next one.
    pub fn replay_overflow(&mut self) -> RelayoutSummary {
        let pending: Vec<PhotoId> = std::mem::take(&mut self.overflow).into_iter().collect();
        let mut summary = RelayoutSummary::default();
        for id in pending {
            self.set_placement(id, Placement::Unassigned);
            summary.record(self.place(id));
        }
        summary
    }

    /// Drop every photo and empty every cell. The grid itself stays.
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = CellState::Empty);
        self.photos.clear();
        self.overflow.clear();
        self.filled = 0;
    }

    pub fn cell_state(&self, coord: CellCoord) -> Option<CellState> {
        if !self.grid.dims().contains(coord) {
            return None;
        }
        self.cells.get(self.grid.dims().index_of(coord)).copied()
    }

    /// Row-major cell states.
    pub fn cell_states(&self) -> &[CellState] {
        &self.cells
    }

    pub fn photo(&self, id: PhotoId) -> Option<&PhotoRecord> {
        self.photos.get(&id)
    }

    /// Stored photos in arrival order.
    pub fn photos(&self) -> impl Iterator<Item = &PhotoRecord> {
        self.photos.values()
    }

    /// Queued photo ids, oldest first.
    pub fn overflow(&self) -> impl Iterator<Item = PhotoId> + '_ {
        self.overflow.iter().copied()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    /// Photos accepted since the last reset. Evictions and re-layouts never change it.
    pub fn contributor_count(&self) -> u64 {
        self.photos.len() as u64
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        self.filled as f64 / self.cells.len() as f64
    }

    pub fn phase(&self) -> SessionPhase {
        match self.filled {
            0 => SessionPhase::Empty,
            n if n == self.cells.len() => SessionPhase::Full,
            _ => SessionPhase::Partial,
        }
    }

    /// Sum of |target - occupant| over filled cells.
    pub fn filled_deviation(&self) -> f64 {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                CellState::Filled(pid) => Some(self.occupant_deviation(i, *pid)),
                CellState::Empty => None,
            })
            .sum()
    }

    /// Whole-mosaic error: filled cells contribute their deviation, empty cells
    /// [`EMPTY_CELL_DEVIATION`]. Never increases across an assignment or eviction.
    pub fn fidelity_error(&self) -> f64 {
        let empty = (self.cells.len() - self.filled) as f64;
        self.filled_deviation() + empty * EMPTY_CELL_DEVIATION
    }

    /// Render input for the current assignments.
    pub fn snapshot(&self) -> CompositionSnapshot {
        let tiles = self
            .cells
            .iter()
            .map(|c| match c {
                CellState::Filled(pid) => Some(self.photos[pid].photo.clone()),
                CellState::Empty => None,
            })
            .collect();
        CompositionSnapshot {
            grid: self.grid.clone(),
            tiles,
        }
    }

    /// Verify that cell and photo back-references agree.
    pub fn consistency_check(&self) -> MosaicResult<()> {
        let fail = |msg: String| Err(MosaicError::Other(anyhow::anyhow!(msg)));
        let dims = self.grid.dims();
        let mut filled = 0usize;

        for (i, c) in self.cells.iter().enumerate() {
            let CellState::Filled(pid) = c else { continue };
            filled += 1;
            let cell = dims.coord_of(i);
            let expected = Placement::Assigned { cell };
            match self.photos.get(pid) {
                Some(rec) if rec.placement == expected => {}
                Some(rec) => {
                    return fail(format!(
                        "cell {cell} holds {pid} but photo says {:?}",
                        rec.placement
                    ));
                }
                None => return fail(format!("cell {cell} holds unknown {pid}")),
            }
        }
        if filled != self.filled {
            return fail(format!("fill counter {} != {filled}", self.filled));
        }

        for rec in self.photos.values() {
            match rec.placement {
                Placement::Assigned { cell } => {
                    if self.cell_state(cell) != Some(CellState::Filled(rec.id)) {
                        return fail(format!("{} claims {cell} it does not hold", rec.id));
                    }
                }
                Placement::Overflow => {
                    if !self.overflow.contains(&rec.id) {
                        return fail(format!("{} marked overflow but not queued", rec.id));
                    }
                }
                Placement::Unassigned => {
                    return fail(format!("{} left unassigned", rec.id));
                }
            }
        }
        if self.overflow.iter().any(|id| !self.photos.contains_key(id)) {
            return fail("overflow references unknown photo".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assign/engine.rs"]
mod tests;
