use std::collections::VecDeque;

use crate::Revision;

/// Recurrence state split into the part settled by closed intervals and the
/// part that still depends on the live one.
///
/// `Append` settles the live state and steps from it; `Replace` re-steps from
/// the settled state, so a revised interval never counts twice.
#[derive(Debug, Clone, Default)]
pub(crate) struct Checkpointed<S> {
    committed: S,
    live: S,
}

impl<S: Clone> Checkpointed<S> {
    pub fn apply(&mut self, revision: Revision, step: impl FnOnce(&S) -> S) {
        if revision == Revision::Append {
            self.committed = self.live.clone();
        }
        self.live = step(&self.committed);
    }

    pub fn current(&self) -> &S {
        &self.live
    }
}

/// Bounded window whose newest element can be revised in place.
const PREALLOCATE_MAX: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct RollingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(PREALLOCATE_MAX)),
            capacity,
        }
    }

    pub fn apply(&mut self, revision: Revision, item: T) {
        match (revision, self.items.back_mut()) {
            (Revision::Replace, Some(last)) => *last = item,
            _ => {
                self.items.push_back(item);
                while self.items.len() > self.capacity {
                    self.items.pop_front();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Element `back` positions from the newest (0 = newest).
    pub fn get_back(&self, back: usize) -> Option<&T> {
        self.items
            .len()
            .checked_sub(back + 1)
            .and_then(|idx| self.items.get(idx))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}
