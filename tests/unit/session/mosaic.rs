use std::io::Cursor;
use std::time::Duration;

use image::{Rgb, RgbImage};

use super::*;
use crate::config::ArtifactFormat;
use crate::render::sink::InMemorySink;

fn png(img: RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Columns alternate dark (10) and light (250).
fn striped_emblem(cols: u32, rows: u32) -> EmblemSource {
    let img = RgbImage::from_fn(cols, rows, |x, _| {
        let v = if x % 2 == 0 { 10 } else { 250 };
        Rgb([v, v, v])
    });
    EmblemSource::from_bytes(png(img))
}

fn gray(v: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([v, v, v])))
}

fn config(cols: u32, rows: u32) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.settings.grid = GridDims { cols, rows };
    cfg.settings.output = OutputDims::new(cols * 10, rows * 10);
    cfg.history_capacity = 64;
    cfg.artifact.format = ArtifactFormat::Png;
    cfg.artifact.write_attempts = 2;
    cfg.photo_tile_edge = 16;
    cfg
}

async fn session_with(cfg: &EngineConfig, sink: &InMemorySink) -> MosaicSession {
    let writer = ArtifactWriter::new(
        Box::new(sink.clone()),
        cfg.artifact.format,
        cfg.artifact.write_attempts,
    )
    .with_backoff(Duration::ZERO);
    let emblem = striped_emblem(cfg.settings.grid.cols, cfg.settings.grid.rows);
    MosaicSession::start_with_writer(cfg, emblem, writer)
        .await
        .unwrap()
}

async fn two_by_two() -> (MosaicSession, InMemorySink) {
    let sink = InMemorySink::new();
    let s = session_with(&config(2, 2), &sink).await;
    (s, sink)
}

async fn ingest(s: &MosaicSession, v: u8) -> IngestOutcome {
    s.ingest_image(gray(v), Some(format!("gray-{v}"))).await.unwrap()
}

fn assigned_cell(o: &IngestOutcome) -> CellCoord {
    match o {
        IngestOutcome::Assigned { cell, .. } => *cell,
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[tokio::test]
async fn start_writes_placeholder_without_event() {
    let (s, sink) = two_by_two().await;
    assert_eq!(sink.frames().len(), 1);
    assert_eq!(sink.frames()[0].0, 0);
    assert!(s.history().is_empty());
    let stats = s.stats();
    assert_eq!(stats.phase, SessionPhase::Empty);
    assert_eq!(stats.composite.map(|c| c.generation), Some(0));
}

#[tokio::test]
async fn fills_two_by_two_by_closest_target() {
    let (s, sink) = two_by_two().await;

    assert_eq!(assigned_cell(&ingest(&s, 12).await), CellCoord::new(0, 0));
    assert_eq!(assigned_cell(&ingest(&s, 245).await), CellCoord::new(0, 1));
    assert_eq!(assigned_cell(&ingest(&s, 15).await), CellCoord::new(1, 0));
    let last = ingest(&s, 240).await;
    assert_eq!(assigned_cell(&last), CellCoord::new(1, 1));
    let IngestOutcome::Assigned { composite, .. } = last else {
        unreachable!()
    };
    assert_eq!(composite.map(|c| c.generation), Some(4));

    let stats = s.stats();
    assert_eq!(stats.phase, SessionPhase::Full);
    assert_eq!(stats.contributor_count, 4);
    assert_eq!(stats.fill_ratio, 1.0);
    assert_eq!(sink.frames().len(), 5);

    let history = s.history();
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|e| e.kind == EventKind::MosaicUpdated));
    let counts: Vec<u64> = history.iter().map(|e| e.contributor_count).collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
    s.inspect(|e| e.consistency_check()).unwrap();
}

#[tokio::test]
async fn full_grid_evicts_worse_occupant() {
    let (s, _sink) = two_by_two().await;
    for v in [12, 245, 15, 240] {
        ingest(&s, v).await;
    }

    let out = ingest(&s, 250).await;
    let IngestOutcome::Assigned { cell, evicted, .. } = out else {
        panic!("expected eviction, got {out:?}");
    };
    assert_eq!(cell, CellCoord::new(1, 1));
    assert_eq!(evicted, Some(PhotoId(4)));

    let stats = s.stats();
    assert_eq!(stats.contributor_count, 5);
    assert_eq!(stats.overflow, 1);
    assert_eq!(stats.filled, 4);
    s.inspect(|e| e.consistency_check()).unwrap();
}

#[tokio::test]
async fn full_grid_queues_when_nothing_improves() {
    let (s, _sink) = two_by_two().await;
    for v in [10, 250, 10, 250] {
        ingest(&s, v).await;
    }

    let out = ingest(&s, 128).await;
    assert_eq!(out, IngestOutcome::Queued { photo: PhotoId(5) });

    let last = s.history().pop().unwrap();
    assert_eq!(last.kind, EventKind::ContributorCountChanged);
    assert_eq!(last.contributor_count, 5);
    assert_eq!(last.composite.map(|c| c.generation), Some(4));
    assert_eq!(s.stats().overflow, 1);
}

#[tokio::test]
async fn reset_clears_everything_and_announces_once() {
    let (s, _sink) = two_by_two().await;
    for v in [12, 245, 15] {
        ingest(&s, v).await;
    }
    assert_eq!(s.stats().phase, SessionPhase::Partial);

    let ev = s.reset().await.unwrap();
    assert_eq!(ev.kind, EventKind::Reset);
    assert_eq!(ev.contributor_count, 0);

    let stats = s.stats();
    assert_eq!(stats.filled, 0);
    assert_eq!(stats.contributor_count, 0);
    assert_eq!(stats.overflow, 0);
    assert_eq!(stats.phase, SessionPhase::Empty);
    let resets = s
        .history()
        .iter()
        .filter(|e| e.kind == EventKind::Reset)
        .count();
    assert_eq!(resets, 1);
}

#[tokio::test]
async fn malformed_upload_is_rejected_without_side_effects() {
    let (s, sink) = two_by_two().await;
    let out = s
        .ingest_bytes(b"definitely not an image".to_vec(), None)
        .await
        .unwrap();
    assert!(matches!(out, IngestOutcome::Rejected { .. }));
    assert_eq!(s.stats().contributor_count, 0);
    assert!(s.history().is_empty());
    assert_eq!(sink.frames().len(), 1);
}

#[tokio::test]
async fn encoded_upload_is_accepted() {
    let (s, _sink) = two_by_two().await;
    let bytes = png(RgbImage::from_pixel(12, 9, Rgb([250, 250, 250])));
    let out = s.ingest_bytes(bytes, Some("upload.png".into())).await.unwrap();
    assert_eq!(assigned_cell(&out), CellCoord::new(0, 1));
}

#[tokio::test]
async fn failed_write_keeps_stale_composite_and_reports_it() {
    let (s, sink) = two_by_two().await;
    ingest(&s, 12).await;

    sink.fail_next(2);
    let out = ingest(&s, 245).await;
    let IngestOutcome::Assigned { composite, .. } = out else {
        panic!("expected assignment");
    };
    assert_eq!(composite.map(|c| c.generation), Some(1));

    let stats = s.stats();
    assert_eq!(stats.failed_renders, 1);
    assert_eq!(stats.filled, 2);
    let last = s.history().pop().unwrap();
    assert_eq!(last.kind, EventKind::ContributorCountChanged);
    assert_eq!(last.contributor_count, 2);

    ingest(&s, 15).await;
    let last = s.history().pop().unwrap();
    assert_eq!(last.kind, EventKind::MosaicUpdated);
    assert_eq!(last.composite.map(|c| c.generation), Some(3));
}

#[tokio::test]
async fn invalid_settings_keep_current_grid() {
    let (s, _sink) = two_by_two().await;
    ingest(&s, 12).await;

    let err = s
        .update_settings(SettingsUpdate {
            grid: GridDims { cols: 0, rows: 2 },
            output: OutputDims::new(20, 20),
            emblem: None,
            regenerate: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MosaicError::Configuration(_)));

    let err = s
        .update_settings(SettingsUpdate {
            grid: GridDims { cols: 2, rows: 2 },
            output: OutputDims::new(20, 20),
            emblem: Some(EmblemSource::from_bytes(b"garbage".to_vec())),
            regenerate: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MosaicError::Configuration(_)));

    let stats = s.stats();
    assert_eq!(stats.grid, GridDims { cols: 2, rows: 2 });
    assert_eq!(stats.filled, 1);
}

#[tokio::test]
async fn regenerate_replays_in_arrival_order() {
    let (s, _sink) = two_by_two().await;
    for v in [12, 245, 15, 240] {
        ingest(&s, v).await;
    }

    let summary = s
        .update_settings(SettingsUpdate {
            grid: GridDims { cols: 2, rows: 1 },
            output: OutputDims::new(20, 10),
            emblem: None,
            regenerate: true,
        })
        .await
        .unwrap();
    assert_eq!(summary.assigned, 2);
    assert_eq!(summary.queued, 2);

    let stats = s.stats();
    assert_eq!(stats.total_cells, 2);
    assert_eq!(stats.contributor_count, 4);
    assert_eq!(stats.overflow, 2);
    s.inspect(|e| {
        assert_eq!(
            e.cell_states(),
            &[
                crate::assign::engine::CellState::Filled(PhotoId(1)),
                crate::assign::engine::CellState::Filled(PhotoId(2)),
            ]
        );
    });
    assert_eq!(
        s.history().pop().map(|e| e.kind),
        Some(EventKind::MosaicUpdated)
    );
}

#[tokio::test]
async fn relayout_without_regenerate_queues_then_replays() {
    let (s, _sink) = two_by_two().await;
    for v in [12, 245] {
        ingest(&s, v).await;
    }
    let summary = s
        .update_settings(SettingsUpdate {
            grid: GridDims { cols: 2, rows: 2 },
            output: OutputDims::new(40, 40),
            emblem: None,
            regenerate: false,
        })
        .await
        .unwrap();
    assert_eq!(summary.queued, 2);
    assert_eq!(s.stats().filled, 0);
    assert_eq!(s.stats().output, OutputDims::new(40, 40));

    let replayed = s.replay_overflow().await.unwrap();
    assert_eq!(replayed.assigned, 2);
    assert_eq!(s.stats().filled, 2);
    assert_eq!(s.stats().overflow, 0);

    let before = s.history().len();
    let nothing = s.replay_overflow().await.unwrap();
    assert_eq!(nothing.assigned, 0);
    assert_eq!(s.history().len(), before);
}

#[tokio::test]
async fn late_viewer_replays_then_follows_live() {
    let (s, _sink) = two_by_two().await;
    for v in [12, 245, 15] {
        ingest(&s, v).await;
    }

    let mut feed = s.subscribe();
    assert_eq!(s.stats().viewers, 1);
    ingest(&s, 240).await;

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(feed.next().await.unwrap());
    }
    let seqs: Vec<u64> = seen.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert_eq!(seen[3].contributor_count, 4);
    assert!(feed.try_next().is_none());
}

#[tokio::test]
async fn abandoned_upload_is_not_committed() {
    let (s, _sink) = two_by_two().await;
    let big = DynamicImage::ImageRgb8(RgbImage::from_pixel(2000, 2000, Rgb([90, 90, 90])));

    let res = tokio::time::timeout(Duration::ZERO, s.ingest_image(big, None)).await;
    assert!(res.is_err());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = s.stats();
    assert_eq!(stats.contributor_count, 0);
    assert_eq!(stats.filled, 0);
    assert!(s.history().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_never_double_fill() {
    let sink = InMemorySink::new();
    let s = Arc::new(session_with(&config(4, 4), &sink).await);

    let mut tasks = Vec::new();
    for i in 0..40u32 {
        let s = s.clone();
        tasks.push(tokio::spawn(async move {
            let v = ((i * 53) % 256) as u8;
            s.ingest_image(gray(v), None).await.unwrap()
        }));
    }
    for t in tasks {
        let out = t.await.unwrap();
        assert!(!matches!(out, IngestOutcome::Rejected { .. }));
    }

    s.inspect(|e| e.consistency_check()).unwrap();
    let stats = s.stats();
    assert_eq!(stats.contributor_count, 40);
    assert_eq!(stats.filled, 16);

    let history = s.history();
    assert_eq!(history.len(), 40);
    assert!(history.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    assert!(
        history
            .windows(2)
            .all(|w| w[1].contributor_count == w[0].contributor_count + 1)
    );
    let generations: Vec<u64> = history
        .iter()
        .filter(|e| e.kind == EventKind::MosaicUpdated)
        .filter_map(|e| e.composite.as_ref().map(|c| c.generation))
        .collect();
    assert!(generations.windows(2).all(|w| w[0] < w[1]));

    let written: Vec<u64> = sink.frames().iter().map(|(g, _)| *g).collect();
    assert!(written.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn shutdown_drains_queued_work() {
    let (s, sink) = two_by_two().await;
    ingest(&s, 12).await;
    s.shutdown().await;
    assert_eq!(sink.frames().len(), 2);
}
