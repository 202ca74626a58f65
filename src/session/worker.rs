use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::broadcast::event::{EventKind, MosaicEvent};
use crate::broadcast::hub::Broadcaster;
use crate::render::artifact::{ArtifactWriter, CompositeRef};
use crate::render::compositor::{CompositionSnapshot, render};

/// One committed change waiting to be drawn and announced.
///
/// Jobs are queued while the assignment lock is held, so the worker sees them in commit order.
#[derive(Debug)]
pub(crate) struct RenderJob {
    pub generation: u64,
    /// `None` when nothing visible changed (a queued photo).
    pub snapshot: Option<CompositionSnapshot>,
    pub contributor_count: u64,
    /// Event to publish once the composite is written.
    pub on_success: Option<EventKind>,
    /// Event to publish, with the previous composite, if the write failed.
    pub on_failure: Option<EventKind>,
    pub reply: Option<oneshot::Sender<JobDone>>,
}

#[derive(Clone, Debug)]
pub(crate) struct JobDone {
    /// Composite current after the job: the new one, or the stale one on failure.
    pub composite: Option<CompositeRef>,
    /// Whether this job's frame was written.
    pub written: bool,
    pub event: Option<MosaicEvent>,
}

/// Render-side figures readable without waiting on the worker.
#[derive(Debug, Default)]
pub(crate) struct RenderStatus {
    latest: Mutex<Option<CompositeRef>>,
    failed: AtomicU64,
}

impl RenderStatus {
    pub fn latest(&self) -> Option<CompositeRef> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn set_latest(&self, r: CompositeRef) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(r);
    }
}

/// Drain `jobs` in order: render, write the artifact, then publish.
///
/// The artifact writer lives behind its own lock, separate from the assignment lock, and is
/// only ever driven from here. Exits when every job sender is gone.
pub(crate) async fn run(
    mut jobs: mpsc::UnboundedReceiver<RenderJob>,
    writer: Arc<Mutex<ArtifactWriter>>,
    hub: Arc<Broadcaster>,
    status: Arc<RenderStatus>,
) {
    while let Some(job) = jobs.recv().await {
        let RenderJob {
            generation,
            snapshot,
            contributor_count,
            on_success,
            on_failure,
            reply,
        } = job;

        let (written, kind) = match snapshot {
            None => (false, on_success),
            Some(snapshot) => {
                let writer = writer.clone();
                let task = tokio::task::spawn_blocking(move || {
                    let frame = render(&snapshot)?;
                    writer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .commit(generation, &frame)
                });
                let result = match task.await {
                    Ok(r) => r,
                    Err(e) => Err(anyhow::anyhow!("render task failed: {e}").into()),
                };
                match result {
                    Ok(r) => {
                        status.set_latest(r);
                        (true, on_success)
                    }
                    Err(e) => {
                        status.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            generation,
                            error = %e,
                            "composite not updated, previous composite stays current"
                        );
                        (false, on_failure)
                    }
                }
            }
        };

        let composite = status.latest();
        let event = kind.map(|k| hub.publish(k, composite.clone(), contributor_count));
        if let Some(reply) = reply {
            // The requester may have gone away; the change is committed regardless.
            let _ = reply.send(JobDone {
                composite,
                written,
                event,
            });
        }
    }
    tracing::debug!("render worker stopped");
}
