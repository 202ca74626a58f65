use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::event::{EventKind, MosaicEvent, now_ms};
use super::history::HistoryBuffer;
use crate::render::artifact::CompositeRef;

#[derive(Debug)]
struct HubState {
    history: HistoryBuffer,
    next_sequence: u64,
}

/// Publishes events to every connected viewer and remembers the last few for late joiners.
///
/// `publish` and `subscribe` take the same lock: an event is either in a new viewer's replay or
/// in its live stream, never both and never neither.
#[derive(Debug)]
pub struct Broadcaster {
    state: Mutex<HubState>,
    tx: broadcast::Sender<MosaicEvent>,
}

impl Broadcaster {
    pub fn new(history_capacity: usize, viewer_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(viewer_buffer.max(1));
        Self {
            state: Mutex::new(HubState {
                history: HistoryBuffer::new(history_capacity),
                next_sequence: 1,
            }),
            tx,
        }
    }

    /// Stamp, record and fan out an event. Returns what was sent.
    pub fn publish(
        &self,
        kind: EventKind,
        composite: Option<CompositeRef>,
        contributor_count: u64,
    ) -> MosaicEvent {
        let mut state = self.lock();
        let event = MosaicEvent {
            sequence: state.next_sequence,
            kind,
            composite,
            contributor_count,
            timestamp_ms: now_ms(),
        };
        state.next_sequence += 1;
        state.history.push(event.clone());

        // No receivers is fine: the event still lands in history.
        let viewers = self.tx.send(event.clone()).unwrap_or(0);
        tracing::debug!(
            sequence = event.sequence,
            kind = %kind,
            contributor_count,
            viewers,
            "event published"
        );
        event
    }

    /// Connect a viewer: the current history first, then live events.
    pub fn subscribe(&self) -> ViewerFeed {
        let state = self.lock();
        let replay: VecDeque<MosaicEvent> = state.history.iter().cloned().collect();
        let rx = self.tx.subscribe();
        drop(state);

        tracing::debug!(replay = replay.len(), "viewer subscribed");
        ViewerFeed {
            last_sequence: None,
            replay,
            rx,
        }
    }

    /// Current history, oldest first.
    pub fn history(&self) -> Vec<MosaicEvent> {
        self.lock().history.snapshot()
    }

    pub fn latest(&self) -> Option<MosaicEvent> {
        self.lock().history.latest().cloned()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One viewer's stream. Dropping it disconnects the viewer and affects nobody else.
#[derive(Debug)]
pub struct ViewerFeed {
    replay: VecDeque<MosaicEvent>,
    rx: broadcast::Receiver<MosaicEvent>,
    last_sequence: Option<u64>,
}

impl ViewerFeed {
    /// Replay events not yet consumed.
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next event, or `None` once the broadcaster is gone.
    ///
    /// A viewer that falls more than the channel buffer behind skips the missed events and
    /// resumes with the oldest one still buffered; the skip is logged.
    pub async fn next(&mut self) -> Option<MosaicEvent> {
        if let Some(ev) = self.replay.pop_front() {
            self.last_sequence = Some(ev.sequence);
            return Some(ev);
        }
        loop {
            match self.rx.recv().await {
                Ok(ev) => {
                    if self.last_sequence.is_some_and(|s| ev.sequence <= s) {
                        continue;
                    }
                    self.last_sequence = Some(ev.sequence);
                    return Some(ev);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "viewer lagged behind, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`ViewerFeed::next`]. `None` when nothing is ready.
    pub fn try_next(&mut self) -> Option<MosaicEvent> {
        if let Some(ev) = self.replay.pop_front() {
            self.last_sequence = Some(ev.sequence);
            return Some(ev);
        }
        loop {
            match self.rx.try_recv() {
                Ok(ev) => {
                    if self.last_sequence.is_some_and(|s| ev.sequence <= s) {
                        continue;
                    }
                    self.last_sequence = Some(ev.sequence);
                    return Some(ev);
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "viewer lagged behind, skipping events");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/broadcast/hub.rs"]
mod tests;
