use image::{Rgb, RgbImage};

use super::*;
use crate::foundation::core::{GridDims, OutputDims};

fn grid(cols: u32, rows: u32, targets: &[f64]) -> Arc<TargetGrid> {
    Arc::new(
        TargetGrid::from_targets(
            GridDims { cols, rows },
            targets,
            OutputDims::new(cols * 4, rows * 4),
        )
        .unwrap(),
    )
}

fn photo(brightness: f64) -> Arc<PreparedPhoto> {
    let g = brightness.round().clamp(0.0, 255.0) as u8;
    Arc::new(PreparedPhoto {
        tile: Arc::new(RgbImage::from_pixel(2, 2, Rgb([g, g, g]))),
        brightness,
        source_width: 2,
        source_height: 2,
    })
}

struct Feeder {
    engine: AssignmentEngine,
    next: u64,
}

impl Feeder {
    fn new(g: Arc<TargetGrid>) -> Self {
        Self {
            engine: AssignmentEngine::new(g),
            next: 1,
        }
    }

    fn feed(&mut self, brightness: f64) -> (PhotoId, AssignmentResult) {
        let id = PhotoId(self.next);
        self.next += 1;
        let r = self.engine.insert(id, photo(brightness), None).unwrap();
        self.engine.consistency_check().unwrap();
        (id, r)
    }
}

fn assigned_cell(r: AssignmentResult) -> CellCoord {
    match r {
        AssignmentResult::Assigned { cell, .. } => cell,
        AssignmentResult::Queued => panic!("expected assignment, got Queued"),
    }
}

#[test]
fn two_by_two_scenario_picks_row_major_first_matches() {
    let mut f = Feeder::new(grid(2, 2, &[10.0, 250.0, 10.0, 250.0]));

    let (_, r) = f.feed(240.0);
    assert_eq!(assigned_cell(r), CellCoord::new(0, 1));
    let (_, r) = f.feed(5.0);
    assert_eq!(assigned_cell(r), CellCoord::new(0, 0));

    assert_eq!(f.engine.filled(), 2);
    assert_eq!(f.engine.cell_state(CellCoord::new(1, 0)), Some(CellState::Empty));
    assert_eq!(f.engine.cell_state(CellCoord::new(1, 1)), Some(CellState::Empty));
    assert_eq!(f.engine.phase(), SessionPhase::Partial);
}

#[test]
fn n_assignments_fill_n_distinct_cells() {
    let targets: Vec<f64> = (0..12).map(|i| (i * 20) as f64).collect();
    let mut f = Feeder::new(grid(4, 3, &targets));
    let mut seen = std::collections::HashSet::new();
    for i in 0..12 {
        let (_, r) = f.feed(((i * 37) % 256) as f64);
        assert!(seen.insert(assigned_cell(r)), "cell filled twice");
        assert!(matches!(r, AssignmentResult::Assigned { evicted: None, .. }));
        assert_eq!(f.engine.filled(), i + 1);
    }
    assert_eq!(f.engine.phase(), SessionPhase::Full);
}

#[test]
fn equal_targets_tie_break_row_major() {
    let mut f = Feeder::new(grid(3, 2, &[100.0; 6]));
    let order: Vec<CellCoord> = (0..6).map(|_| assigned_cell(f.feed(100.0).1)).collect();
    assert_eq!(
        order,
        vec![
            CellCoord::new(0, 0),
            CellCoord::new(0, 1),
            CellCoord::new(0, 2),
            CellCoord::new(1, 0),
            CellCoord::new(1, 1),
            CellCoord::new(1, 2),
        ]
    );
}

#[test]
fn same_state_same_brightness_same_cell() {
    let targets = [30.0, 90.0, 90.0, 200.0];
    let mut a = Feeder::new(grid(2, 2, &targets));
    let mut b = Feeder::new(grid(2, 2, &targets));
    for v in [60.0, 145.0, 60.0] {
        assert_eq!(a.feed(v).1, b.feed(v).1);
    }
}

#[test]
fn full_grid_evicts_worst_occupant_when_newcomer_fits_better() {
    let mut f = Feeder::new(grid(2, 2, &[10.0, 250.0, 10.0, 250.0]));
    f.feed(240.0);
    f.feed(5.0);
    f.feed(100.0);
    let (worst, r) = f.feed(100.0);
    assert_eq!(assigned_cell(r), CellCoord::new(1, 1));
    assert_eq!(f.engine.phase(), SessionPhase::Full);

    let before = f.engine.fidelity_error();
    let (newcomer, r) = f.feed(245.0);
    assert_eq!(
        r,
        AssignmentResult::Assigned {
            cell: CellCoord::new(1, 1),
            evicted: Some(worst),
        }
    );
    assert!(f.engine.fidelity_error() < before);
    assert_eq!(
        f.engine.photo(worst).unwrap().placement,
        Placement::Overflow
    );
    assert_eq!(
        f.engine.photo(newcomer).unwrap().placement,
        Placement::Assigned {
            cell: CellCoord::new(1, 1)
        }
    );
    assert_eq!(f.engine.overflow().collect::<Vec<_>>(), vec![worst]);
    // Evicted photos stay counted; the newcomer adds one.
    assert_eq!(f.engine.contributor_count(), 5);
}

#[test]
fn full_grid_queues_when_eviction_would_not_help() {
    let mut f = Feeder::new(grid(2, 1, &[0.0, 255.0]));
    f.feed(0.0);
    f.feed(255.0);
    let (id, r) = f.feed(128.0);
    assert_eq!(r, AssignmentResult::Queued);
    assert_eq!(f.engine.overflow_len(), 1);
    assert_eq!(f.engine.photo(id).unwrap().placement, Placement::Overflow);
    assert_eq!(f.engine.contributor_count(), 3);
}

#[test]
fn fidelity_never_worsens_over_long_sequences() {
    let mut seed = 0x2545_f491_u64;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((seed >> 33) % 256) as f64
    };
    let targets: Vec<f64> = (0..12).map(|_| next()).collect();
    let mut f = Feeder::new(grid(4, 3, &targets));

    let mut last = f.engine.fidelity_error();
    for _ in 0..80 {
        f.feed(next());
        let now = f.engine.fidelity_error();
        assert!(now <= last + 1e-9, "fidelity worsened: {last} -> {now}");
        last = now;
    }
    assert_eq!(f.engine.contributor_count(), 80);
    assert_eq!(
        f.engine.filled() + f.engine.overflow_len(),
        80,
        "every photo is either on the grid or queued"
    );
}

#[test]
fn regenerate_replays_in_arrival_order() {
    let mut f = Feeder::new(grid(2, 1, &[0.0, 255.0]));
    let (a, _) = f.feed(250.0);
    let (b, _) = f.feed(10.0);
    let (c, r) = f.feed(128.0);
    assert_eq!(r, AssignmentResult::Queued);

    // Wider grid: everyone fits; arrival order decides who gets first pick.
    let summary = f
        .engine
        .relayout(grid(3, 1, &[255.0, 128.0, 0.0]), true);
    f.engine.consistency_check().unwrap();
    assert_eq!(summary.assigned, 3);
    assert_eq!(summary.queued, 0);
    assert_eq!(f.engine.overflow_len(), 0);
    assert_eq!(
        f.engine.photo(a).unwrap().placement,
        Placement::Assigned {
            cell: CellCoord::new(0, 0)
        }
    );
    assert_eq!(
        f.engine.photo(b).unwrap().placement,
        Placement::Assigned {
            cell: CellCoord::new(0, 2)
        }
    );
    assert_eq!(
        f.engine.photo(c).unwrap().placement,
        Placement::Assigned {
            cell: CellCoord::new(0, 1)
        }
    );
    assert_eq!(f.engine.contributor_count(), 3);
}

#[test]
fn relayout_without_regenerate_parks_photos_then_replay_places_them() {
    let mut f = Feeder::new(grid(2, 1, &[0.0, 255.0]));
    f.feed(0.0);
    f.feed(255.0);

    let summary = f.engine.relayout(grid(1, 2, &[255.0, 0.0]), false);
    f.engine.consistency_check().unwrap();
    assert_eq!(summary.queued, 2);
    assert_eq!(f.engine.phase(), SessionPhase::Empty);
    assert_eq!(f.engine.contributor_count(), 2);

    let replay = f.engine.replay_overflow();
    f.engine.consistency_check().unwrap();
    assert_eq!(replay.assigned, 2);
    assert_eq!(f.engine.phase(), SessionPhase::Full);
    assert_eq!(f.engine.filled_deviation(), 0.0);
}

#[test]
fn reset_clears_everything_but_the_grid() {
    let mut f = Feeder::new(grid(2, 2, &[10.0, 250.0, 10.0, 250.0]));
    for v in [10.0, 250.0, 10.0] {
        f.feed(v);
    }
    assert_eq!(f.engine.filled(), 3);

    f.engine.reset();
    f.engine.consistency_check().unwrap();
    assert_eq!(f.engine.filled(), 0);
    assert_eq!(f.engine.contributor_count(), 0);
    assert_eq!(f.engine.overflow_len(), 0);
    assert_eq!(f.engine.total_cells(), 4);
    assert!(
        f.engine
            .cell_states()
            .iter()
            .all(|c| *c == CellState::Empty)
    );
}

#[test]
fn duplicate_ids_are_refused() {
    let mut e = AssignmentEngine::new(grid(1, 1, &[0.0]));
    e.insert(PhotoId(7), photo(0.0), None).unwrap();
    assert!(e.insert(PhotoId(7), photo(0.0), None).is_err());
    e.consistency_check().unwrap();
}

#[test]
fn snapshot_mirrors_cell_states() {
    let mut f = Feeder::new(grid(2, 1, &[0.0, 255.0]));
    f.feed(250.0);
    let snap = f.engine.snapshot();
    assert_eq!(snap.tiles.len(), 2);
    assert!(snap.tiles[0].is_none());
    assert_eq!(snap.tiles[1].as_ref().unwrap().brightness, 250.0);
}
