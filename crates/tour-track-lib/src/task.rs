//! Double-buffered hand-off of compiled geometry from the worker to the render thread
//!
//! Two [`Task`] slots live in a [`TaskArena`]. The worker only writes a slot the render
//! thread is not holding, then publishes its index through an atomic. The render thread
//! swaps the index out and from then on reads that slot only. The per-slot mutexes are never
//! contended; they exist so both sides can hold plain `&mut`/`&` access in safe code.

use crate::{RenderTransform, ViewportSnapshot};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

const NO_SLOT: usize = usize::MAX;

/// Geometry compiled by one worker pass, together with the viewport it was compiled for
#[derive(Debug, Default)]
pub struct Task<B> {
    pub(crate) bucket: B,
    pub(crate) viewport: ViewportSnapshot,
    /// Request generation the pass answered
    pub(crate) generation: u64,
    pub(crate) line_count: usize,
}

impl<B> Task<B> {
    #[inline]
    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    /// Viewport snapshot the bucket was built from
    #[inline]
    pub fn viewport(&self) -> &ViewportSnapshot {
        &self.viewport
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Transform for drawing this task under the `live` camera
    pub fn render_transform(&self, live: &ViewportSnapshot) -> RenderTransform {
        self.viewport.render_transform(live)
    }
}

/// Read access to the task currently shown by the render thread
pub struct ActiveTask<'a, B> {
    guard: MutexGuard<'a, Task<B>>,
}

impl<B> Deref for ActiveTask<'_, B> {
    type Target = Task<B>;

    fn deref(&self) -> &Task<B> {
        &self.guard
    }
}

/// Two task slots plus the index of the one published for the render thread
pub(crate) struct TaskArena<B> {
    slots: [Mutex<Task<B>>; 2],
    ready: AtomicUsize,
}

impl<B: Default> TaskArena<B> {
    pub(crate) fn new() -> Self {
        Self {
            slots: [Mutex::default(), Mutex::default()],
            ready: AtomicUsize::new(NO_SLOT),
        }
    }
}

impl<B> TaskArena<B> {
    /// Take back `slot` if the render thread has not picked it up yet
    pub(crate) fn retract(&self, slot: usize) -> bool {
        self.ready
            .compare_exchange(slot, NO_SLOT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Worker side: exclusive access to a slot it owns
    pub(crate) fn write(&self, slot: usize) -> MutexGuard<'_, Task<B>> {
        // A panicking pass is caught before the guard drops, poisoning is not expected
        self.slots[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker side: hand `slot` to the render thread
    pub(crate) fn publish(&self, slot: usize) {
        self.ready.store(slot, Ordering::Release);
    }

    /// Render side: take the most recently published slot, if any
    pub(crate) fn take_ready(&self) -> Option<usize> {
        let slot = self.ready.swap(NO_SLOT, Ordering::AcqRel);
        (slot != NO_SLOT).then_some(slot)
    }

    /// Render side: read a slot without blocking
    pub(crate) fn read(&self, slot: usize) -> Option<ActiveTask<'_, B>> {
        match self.slots[slot].try_lock() {
            Ok(guard) => Some(ActiveTask { guard }),
            Err(TryLockError::Poisoned(poisoned)) => Some(ActiveTask {
                guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(slot, "Active task slot is busy, skipping frame");
                None
            }
        }
    }
}

/// Worker-side bookkeeping of which slot it may write next
#[derive(Debug, Default)]
pub(crate) struct SlotCursor {
    /// Slot held by the worker and not published (after an abandoned pass)
    owned: Option<usize>,
    /// Slot published last
    published: Option<usize>,
}

impl SlotCursor {
    /// Pick a slot the render thread is guaranteed not to be reading
    pub(crate) fn acquire<B>(&mut self, arena: &TaskArena<B>) -> usize {
        if let Some(slot) = self.owned {
            return slot;
        }
        let slot = match self.published {
            None => 0,
            // Not picked up yet: overwrite the stale result
            Some(published) if arena.retract(published) => published,
            // Picked up: the render thread released the other slot
            Some(published) => 1 - published,
        };
        self.owned = Some(slot);
        slot
    }

    pub(crate) fn mark_published(&mut self, slot: usize) {
        self.owned = None;
        self.published = Some(slot);
    }
}
