use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::worker::{self, JobDone, RenderJob, RenderStatus};
use crate::assign::engine::{AssignmentEngine, AssignmentResult, RelayoutSummary, SessionPhase};
use crate::broadcast::event::{EventKind, MosaicEvent};
use crate::broadcast::hub::{Broadcaster, ViewerFeed};
use crate::config::{EngineConfig, SettingsLimits};
use crate::features::prepare::{PhotoPreparer, PreparedPhoto};
use crate::foundation::core::{CellCoord, GridDims, OutputDims, PhotoId};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::grid::emblem::EmblemSource;
use crate::grid::target::TargetGrid;
use crate::render::artifact::{ArtifactWriter, CompositeRef};
use crate::render::sink::CompositeSink;

/// What happened to one upload.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Assigned {
        photo: PhotoId,
        cell: CellCoord,
        evicted: Option<PhotoId>,
        /// Composite after this photo, or the previous one if the write failed.
        composite: Option<CompositeRef>,
    },
    /// Grid full and no occupant worth replacing; kept in the overflow queue.
    Queued { photo: PhotoId },
    /// Malformed upload. Session state is untouched.
    Rejected { reason: String },
}

/// Administrator request to change the layout.
#[derive(Clone, Debug)]
pub struct SettingsUpdate {
    pub grid: GridDims,
    pub output: OutputDims,
    /// `None` keeps the current emblem.
    pub emblem: Option<EmblemSource>,
    /// Replay every stored photo against the new grid, in arrival order.
    pub regenerate: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct MosaicStats {
    pub contributor_count: u64,
    pub filled: usize,
    pub total_cells: usize,
    pub fill_ratio: f64,
    pub overflow: usize,
    pub phase: SessionPhase,
    pub generation: u64,
    pub grid: GridDims,
    pub output: OutputDims,
    pub fidelity_error: f64,
    pub failed_renders: u64,
    pub viewers: usize,
    pub composite: Option<CompositeRef>,
}

#[derive(Debug)]
struct SessionState {
    engine: AssignmentEngine,
    emblem: EmblemSource,
    generation: u64,
    next_photo: u64,
}

/// One live mosaic.
///
/// Decoding and feature extraction run on the blocking pool and overlap freely. Selecting and
/// filling a cell happens under one short lock. Rendering and the artifact write happen on a
/// single worker task, in commit order, and each finished render is broadcast.
#[derive(Debug)]
pub struct MosaicSession {
    state: Mutex<SessionState>,
    jobs: mpsc::UnboundedSender<RenderJob>,
    hub: Arc<Broadcaster>,
    status: Arc<RenderStatus>,
    preparer: PhotoPreparer,
    limits: SettingsLimits,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MosaicSession {
    /// Start a session writing its composite where `config.artifact` says.
    pub async fn start(config: &EngineConfig, emblem: EmblemSource) -> MosaicResult<Self> {
        let writer = ArtifactWriter::from_config(&config.artifact);
        Self::start_with_writer(config, emblem, writer).await
    }

    /// Start a session writing into `sink`, with the configured format and retry budget.
    pub async fn start_with_sink(
        config: &EngineConfig,
        emblem: EmblemSource,
        sink: Box<dyn CompositeSink>,
    ) -> MosaicResult<Self> {
        let writer = ArtifactWriter::new(
            sink,
            config.artifact.format,
            config.artifact.write_attempts,
        );
        Self::start_with_writer(config, emblem, writer).await
    }

    /// Configure the target grid, spawn the render worker and write the placeholder composite.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip_all, fields(emblem = %emblem.describe()))]
    pub async fn start_with_writer(
        config: &EngineConfig,
        emblem: EmblemSource,
        writer: ArtifactWriter,
    ) -> MosaicResult<Self> {
        config.validate()?;
        let grid = build_grid(config.settings.grid, config.settings.output, emblem.clone()).await?;

        let hub = Arc::new(Broadcaster::new(
            config.history_capacity,
            config.viewer_buffer,
        ));
        let status = Arc::new(RenderStatus::default());
        let (jobs, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker::run(
            rx,
            Arc::new(Mutex::new(writer)),
            hub.clone(),
            status.clone(),
        ));

        let engine = AssignmentEngine::new(Arc::new(grid));
        let session = Self {
            state: Mutex::new(SessionState {
                engine,
                emblem,
                generation: 0,
                next_photo: 1,
            }),
            jobs,
            hub,
            status,
            preparer: PhotoPreparer::from_config(config),
            limits: config.limits,
            worker: Mutex::new(Some(handle)),
        };

        let done = {
            let state = session.lock();
            session.enqueue(&state, Some(state.engine.snapshot()), None, None)?
        };
        done.await
            .map_err(|_| MosaicError::closed("render worker stopped during start"))?;
        tracing::info!("mosaic session started");
        Ok(session)
    }

    /// Decode an upload and place it.
    ///
    /// Malformed images come back as [`IngestOutcome::Rejected`]. If the caller goes away before
    /// the photo is placed, nothing is committed.
    #[tracing::instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn ingest_bytes(
        &self,
        bytes: Vec<u8>,
        label: Option<String>,
    ) -> MosaicResult<IngestOutcome> {
        let preparer = self.preparer;
        let prepared =
            blocking(move || preparer.prepare_bytes(&bytes), "photo preparation").await;
        self.ingest_prepared(prepared, label).await
    }

    /// Place an already decoded photo.
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn ingest_image(
        &self,
        image: DynamicImage,
        label: Option<String>,
    ) -> MosaicResult<IngestOutcome> {
        let preparer = self.preparer;
        let prepared = blocking(move || preparer.prepare(&image), "photo preparation").await;
        self.ingest_prepared(prepared, label).await
    }

    async fn ingest_prepared(
        &self,
        prepared: MosaicResult<PreparedPhoto>,
        label: Option<String>,
    ) -> MosaicResult<IngestOutcome> {
        let photo = match prepared {
            Ok(p) => Arc::new(p),
            Err(e) if e.is_photo_rejection() => {
                tracing::info!(label = ?label, reason = %e, "photo rejected");
                return Ok(IngestOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        // Select-and-fill plus job hand-off, under one lock.
        let (id, result, done) = {
            let mut state = self.lock();
            let id = PhotoId(state.next_photo);
            state.next_photo += 1;
            let brightness = photo.brightness;
            let result = state.engine.insert(id, photo, label.clone())?;
            tracing::info!(%id, brightness, label = ?label, result = ?result, "photo accepted");

            let done = match result {
                AssignmentResult::Assigned { .. } => {
                    state.generation += 1;
                    let snapshot = state.engine.snapshot();
                    self.enqueue(
                        &state,
                        Some(snapshot),
                        Some(EventKind::MosaicUpdated),
                        Some(EventKind::ContributorCountChanged),
                    )?
                }
                AssignmentResult::Queued => self.enqueue(
                    &state,
                    None,
                    Some(EventKind::ContributorCountChanged),
                    None,
                )?,
            };
            (id, result, done)
        };

        let composite = done.await.ok().and_then(|d| d.composite);
        Ok(match result {
            AssignmentResult::Assigned { cell, evicted } => IngestOutcome::Assigned {
                photo: id,
                cell,
                evicted,
                composite,
            },
            AssignmentResult::Queued => IngestOutcome::Queued { photo: id },
        })
    }

    /// Apply new layout settings.
    ///
    /// Invalid dimensions or an unreadable emblem fail with a configuration error and leave the
    /// current grid in place.
    #[tracing::instrument(skip(self, update), fields(cols = update.grid.cols, rows = update.grid.rows, regenerate = update.regenerate))]
    pub async fn update_settings(&self, update: SettingsUpdate) -> MosaicResult<RelayoutSummary> {
        self.limits.check(update.grid, update.output)?;
        let emblem = match update.emblem {
            Some(e) => e,
            None => self.lock().emblem.clone(),
        };
        let grid = build_grid(update.grid, update.output, emblem.clone()).await?;

        let (summary, done) = {
            let mut state = self.lock();
            let summary = state.engine.relayout(Arc::new(grid), update.regenerate);
            state.emblem = emblem;
            state.generation += 1;
            let snapshot = state.engine.snapshot();
            let done =
                self.enqueue(&state, Some(snapshot), Some(EventKind::MosaicUpdated), None)?;
            (summary, done)
        };
        tracing::info!(
            assigned = summary.assigned,
            queued = summary.queued,
            evictions = summary.evictions,
            "settings applied"
        );
        settle(done).await;
        Ok(summary)
    }

    /// Retry queued photos against the current grid.
    pub async fn replay_overflow(&self) -> MosaicResult<RelayoutSummary> {
        let (summary, done) = {
            let mut state = self.lock();
            let summary = state.engine.replay_overflow();
            if summary.assigned == 0 {
                return Ok(summary);
            }
            state.generation += 1;
            let snapshot = state.engine.snapshot();
            let done =
                self.enqueue(&state, Some(snapshot), Some(EventKind::MosaicUpdated), None)?;
            (summary, done)
        };
        tracing::info!(assigned = summary.assigned, queued = summary.queued, "overflow replayed");
        settle(done).await;
        Ok(summary)
    }

    /// Drop every photo and empty every cell, then announce it with exactly one `reset` event.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) -> MosaicResult<MosaicEvent> {
        let done = {
            let mut state = self.lock();
            state.engine.reset();
            state.generation += 1;
            let snapshot = state.engine.snapshot();
            self.enqueue(
                &state,
                Some(snapshot),
                Some(EventKind::Reset),
                Some(EventKind::Reset),
            )?
        };
        tracing::warn!("session reset, all photos dropped");
        done.await
            .ok()
            .and_then(|d| d.event)
            .ok_or_else(|| MosaicError::closed("render worker stopped before reset was published"))
    }

    pub fn stats(&self) -> MosaicStats {
        let state = self.lock();
        let grid = state.engine.grid();
        MosaicStats {
            contributor_count: state.engine.contributor_count(),
            filled: state.engine.filled(),
            total_cells: state.engine.total_cells(),
            fill_ratio: state.engine.fill_ratio(),
            overflow: state.engine.overflow_len(),
            phase: state.engine.phase(),
            generation: state.generation,
            grid: grid.dims(),
            output: grid.output(),
            fidelity_error: state.engine.fidelity_error(),
            failed_renders: self.status.failed(),
            viewers: self.hub.viewer_count(),
            composite: self.status.latest(),
        }
    }

    /// Connect a viewer: recent history first, then live events.
    pub fn subscribe(&self) -> ViewerFeed {
        self.hub.subscribe()
    }

    pub fn history(&self) -> Vec<MosaicEvent> {
        self.hub.history()
    }

    /// Run `f` against the assignment state. The lock is held for the duration of the call.
    pub fn inspect<R>(&self, f: impl FnOnce(&AssignmentEngine) -> R) -> R {
        f(&self.lock().engine)
    }

    /// Stop accepting work and wait for queued renders to finish.
    pub async fn shutdown(self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(self.jobs);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "render worker ended abnormally");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a render job. Callers hold the state lock, which fixes event order to commit order.
    fn enqueue(
        &self,
        state: &SessionState,
        snapshot: Option<crate::render::compositor::CompositionSnapshot>,
        on_success: Option<EventKind>,
        on_failure: Option<EventKind>,
    ) -> MosaicResult<oneshot::Receiver<JobDone>> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                generation: state.generation,
                snapshot,
                contributor_count: state.engine.contributor_count(),
                on_success,
                on_failure,
                reply: Some(tx),
            })
            .map_err(|_| MosaicError::closed("render worker is not running"))?;
        Ok(rx)
    }
}

/// Wait for a re-layout render. The change itself is already committed.
async fn settle(done: oneshot::Receiver<JobDone>) {
    match done.await {
        Ok(d) if !d.written => {
            tracing::warn!("layout changed but composite still shows the previous frame");
        }
        Ok(_) => {}
        Err(_) => tracing::error!("render worker dropped a queued render"),
    }
}

async fn build_grid(
    grid: GridDims,
    output: OutputDims,
    emblem: EmblemSource,
) -> MosaicResult<TargetGrid> {
    blocking(
        move || TargetGrid::configure(grid, &emblem, output),
        "target grid configuration",
    )
    .await
}

async fn blocking<T, F>(f: F, what: &'static str) -> MosaicResult<T>
where
    F: FnOnce() -> MosaicResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(r) => r,
        Err(e) => Err(anyhow::anyhow!("{what} task failed: {e}").into()),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/mosaic.rs"]
mod tests;
