use std::collections::VecDeque;

use super::event::MosaicEvent;

/// The last `capacity` events, oldest first. Pushing past capacity drops the oldest.
#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    events: VecDeque<MosaicEvent>,
    capacity: usize,
}

impl HistoryBuffer {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: MosaicEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<MosaicEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MosaicEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&MosaicEvent> {
        self.events.back()
    }
}
