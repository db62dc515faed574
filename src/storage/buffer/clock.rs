use super::Frame;
use crate::storage::page::PageId;
use std::collections::{HashMap, VecDeque};

/// Circular scan queue for second-chance eviction.
///
/// Resident pages are kept in load order. A scan takes pages from the front:
/// pinned pages go to the back untouched, unpinned pages with their reference
/// bit set lose the bit and go to the back, and the first unpinned page with a
/// clear bit is the victim.
#[derive(Debug, Default)]
pub struct Clock {
    queue: VecDeque<PageId>,
}

impl Clock {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, page_id: PageId) {
        self.queue.push_back(page_id);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pages in scan order, starting at the hand.
    pub fn iter(&self) -> impl Iterator<Item = &PageId> {
        self.queue.iter()
    }

    /// Select and dequeue a victim. Returns `None` when every page is pinned.
    pub(super) fn select_victim(&mut self, frames: &mut HashMap<PageId, Frame>) -> Option<PageId> {
        let any_unpinned = self
            .queue
            .iter()
            .any(|page_id| frames.get(page_id).is_some_and(|f| f.pin_count == 0));
        if !any_unpinned {
            return None;
        }

        // Terminates within two laps: every unpinned page loses its bit on the first.
        loop {
            let page_id = self.queue.pop_front()?;
            let Some(frame) = frames.get_mut(&page_id) else {
                continue;
            };

            if frame.pin_count > 0 {
                self.queue.push_back(page_id);
            } else if frame.clock_ref {
                frame.clock_ref = false;
                self.queue.push_back(page_id);
            } else {
                return Some(page_id);
            }
        }
    }
}
