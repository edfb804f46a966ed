//! Render-thread side of the hand-off
//!
//! Called once per frame. Never blocks: if the worker has nothing new, the previously
//! active task keeps being drawn.

use crate::{ActiveTask, Result, TrackWorker, ViewportSnapshot};

/// Tile and zoom level the live camera sits on; a change calls for re-clipping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewIdentity {
    pub tile_x: i64,
    pub tile_y: i64,
    pub zoom_level: u32,
}

impl ViewIdentity {
    pub fn of(viewport: &ViewportSnapshot) -> Self {
        let scale = viewport.compile_scale();
        Self {
            tile_x: (viewport.x * scale).floor() as i64,
            tile_y: (viewport.y * scale).floor() as i64,
            zoom_level: viewport.zoom_level(),
        }
    }
}

/// Result of one [`RenderConsumer::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUpdate {
    /// Nothing new, keep drawing the active task
    Unchanged,
    /// A freshly published task became active
    Swapped { generation: u64 },
}

/// Per-layer render-thread state
#[derive(Debug, Default)]
pub struct RenderConsumer {
    last_identity: Option<ViewIdentity>,
    active: Option<usize>,
    force: bool,
}

impl RenderConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`RenderConsumer::update`] submit regardless of the view identity
    pub fn invalidate(&mut self) {
        self.force = true;
    }

    /// Submit a pass when the live view moved to another tile or zoom level
    ///
    /// Returns whether a pass was requested.
    pub fn update<B>(&mut self, live: &ViewportSnapshot, worker: &TrackWorker<B>) -> Result<bool> {
        let identity = ViewIdentity::of(live);
        if !self.force && self.last_identity == Some(identity) {
            return Ok(false);
        }
        worker.submit()?;
        tracing::trace!(?identity, forced = self.force, "View identity changed");
        self.last_identity = Some(identity);
        self.force = false;
        Ok(true)
    }

    /// Swap in the latest published task, if any
    pub fn poll<B>(&mut self, worker: &TrackWorker<B>) -> FrameUpdate {
        let Some(slot) = worker.arena().take_ready() else {
            return FrameUpdate::Unchanged;
        };
        self.active = Some(slot);
        let generation = worker
            .arena()
            .read(slot)
            .map_or(0, |task| task.generation());
        FrameUpdate::Swapped { generation }
    }

    /// Task to draw this frame; `None` before the first pass completed
    pub fn active<'a, B>(&self, worker: &'a TrackWorker<B>) -> Option<ActiveTask<'a, B>> {
        worker.arena().read(self.active?)
    }

    /// Whether a task has ever been swapped in
    #[inline]
    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, LayerConfig, LineBucket, PointStore, SharedViewport};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_view_identity() {
        let a = ViewportSnapshot::new(0.5, 0.5, 4.0, 256);
        assert_eq!(
            ViewIdentity::of(&a),
            ViewIdentity {
                tile_x: 2,
                tile_y: 2,
                zoom_level: 2
            }
        );
        // Sub-tile pan keeps the identity, a fractional zoom inside the level too
        let b = ViewportSnapshot::new(0.51, 0.5, 5.0, 256);
        assert_eq!(ViewIdentity::of(&a), ViewIdentity::of(&b));
        let c = ViewportSnapshot::new(0.76, 0.5, 4.0, 256);
        assert_ne!(ViewIdentity::of(&a), ViewIdentity::of(&c));
        let d = ViewportSnapshot::new(0.5, 0.5, 8.0, 256);
        assert_ne!(ViewIdentity::of(&a), ViewIdentity::of(&d));
    }

    fn worker(store: Arc<PointStore>, viewport: Arc<SharedViewport>) -> TrackWorker<LineBucket> {
        TrackWorker::spawn(store, viewport, Arc::new(|| {}), &LayerConfig::default()).unwrap()
    }

    #[test]
    fn test_update_submits_only_on_identity_change() {
        let store = Arc::new(PointStore::new(0));
        let viewport = Arc::new(SharedViewport::default());
        let worker = worker(store, viewport);
        let mut consumer = RenderConsumer::new();

        let live = ViewportSnapshot::new(0.5, 0.5, 4.0, 256);
        assert!(consumer.update(&live, &worker).unwrap());
        assert!(!consumer.update(&live, &worker).unwrap());
        assert!(
            !consumer
                .update(&ViewportSnapshot::new(0.52, 0.5, 4.0, 256), &worker)
                .unwrap()
        );
        consumer.invalidate();
        assert!(consumer.update(&live, &worker).unwrap());
        assert_eq!(worker.generation(), 2);
    }

    #[test]
    fn test_poll_never_blocks_and_swaps_once() {
        let store = Arc::new(PointStore::new(0));
        store
            .set_points(
                vec![
                    GeoPoint::from_degrees(0.0, 0.0).unwrap(),
                    GeoPoint::from_degrees(0.0, 10.0).unwrap(),
                ],
                vec![0],
            )
            .unwrap();
        let viewport = Arc::new(SharedViewport::default());
        let worker = worker(store, viewport);
        let mut consumer = RenderConsumer::new();

        assert_eq!(consumer.poll(&worker), FrameUpdate::Unchanged);
        assert!(consumer.active(&worker).is_none());

        let generation = worker.submit().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut update = FrameUpdate::Unchanged;
        while update == FrameUpdate::Unchanged && Instant::now() < deadline {
            update = consumer.poll(&worker);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(update, FrameUpdate::Swapped { generation });
        assert!(consumer.has_active());
        assert_eq!(consumer.active(&worker).unwrap().line_count(), 1);
        assert_eq!(consumer.poll(&worker), FrameUpdate::Unchanged);
        assert!(consumer.active(&worker).is_some());
    }
}
