//! Track layer: owns the point store, the worker and the render-side consumer

use crate::{
    ActiveTask, COORD_SCALE, ClipWindow, FrameRequester, FrameUpdate, GeoPoint, GeometrySink,
    LineBucket, PointStore, RenderConsumer, Result, TourSet, TrackError, TrackWorker,
    ViewportProvider, ViewportSnapshot,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables of one track layer
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct LayerConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Half extent of the clip window in tiles
    pub clip_tile_multiple: u32,
    /// Decimation threshold in pixels, per axis
    pub min_pixel_distance: f64,
    /// Minimum time between two worker passes
    pub min_submit_interval: Duration,
    /// ARGB color of points added without an explicit color
    pub default_color: u32,
    /// Minimum pixel spacing of direction arrows, `None` to draw none
    pub direction_arrows: Option<f64>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            clip_tile_multiple: 8,
            min_pixel_distance: 3.0,
            min_submit_interval: Duration::from_millis(50),
            default_color: 0xFF_FF_40_00,
            direction_arrows: None,
        }
    }
}

impl LayerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 || self.clip_tile_multiple == 0 {
            return Err(TrackError::InvalidConfig(
                "tile size and clip tile multiple must be positive".to_string(),
            ));
        }
        let packed = self.clip_window().half_extent() * COORD_SCALE as f64;
        if packed > i16::MAX as f64 {
            return Err(TrackError::InvalidConfig(format!(
                "clip window of {} px overflows fixed-point vertices",
                self.clip_window().half_extent()
            )));
        }
        if !self.min_pixel_distance.is_finite() || self.min_pixel_distance < 0.0 {
            return Err(TrackError::InvalidConfig(format!(
                "min pixel distance must be finite and >= 0, got {}",
                self.min_pixel_distance
            )));
        }
        if let Some(spacing) = self.direction_arrows
            && !(spacing.is_finite() && spacing > 0.0)
        {
            return Err(TrackError::InvalidConfig(format!(
                "direction arrow spacing must be finite and > 0, got {spacing}"
            )));
        }
        Ok(())
    }

    pub fn clip_window(&self) -> ClipWindow {
        ClipWindow::for_tile_size(self.tile_size, self.clip_tile_multiple)
    }
}

/// A GPS track overlay compiled in the background
///
/// The owning thread mutates points and calls [`TrackLayer::update`] once per frame;
/// everything else happens on the worker thread.
pub struct TrackLayer<B: GeometrySink + Default = LineBucket> {
    config: LayerConfig,
    store: Arc<PointStore>,
    worker: TrackWorker<B>,
    consumer: RenderConsumer,
    enabled: bool,
}

impl<B: GeometrySink + Default> TrackLayer<B> {
    pub fn new(
        config: LayerConfig,
        viewport: Arc<dyn ViewportProvider>,
        frames: Arc<dyn FrameRequester>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(PointStore::new(config.default_color));
        let worker = TrackWorker::spawn(Arc::clone(&store), viewport, frames, &config)?;
        tracing::info!(
            tile_size = config.tile_size,
            clip_half_extent = config.clip_window().half_extent(),
            "Created track layer"
        );
        Ok(Self {
            config,
            store,
            worker,
            consumer: RenderConsumer::new(),
            enabled: true,
        })
    }

    /// Replace all points and tours; on error the previous points stay
    pub fn set_points(&self, points: Vec<GeoPoint>, tour_starts: Vec<usize>) -> Result<()> {
        self.ensure_running()?;
        self.store.set_points(points, tour_starts).inspect_err(|err| {
            tracing::warn!(%err, "Rejected track points");
        })?;
        self.submit_reprojection().map(drop)
    }

    /// Like [`TrackLayer::set_points`] with one ARGB color per point
    pub fn set_points_with_colors(
        &self,
        points: Vec<GeoPoint>,
        colors: Vec<u32>,
        tour_starts: Vec<usize>,
    ) -> Result<()> {
        self.ensure_running()?;
        self.store
            .set_points_with_colors(points, colors, tour_starts)
            .inspect_err(|err| {
                tracing::warn!(%err, "Rejected track points");
            })?;
        self.submit_reprojection().map(drop)
    }

    /// Replace all points with the concatenated tours of `tours`
    pub fn set_tours(&self, tours: TourSet) -> Result<()> {
        let (points, tour_starts) = tours.into_parts();
        self.set_points(points, tour_starts)
    }

    pub fn append_point(&self, point: GeoPoint) -> Result<()> {
        self.ensure_running()?;
        self.store.append_point(point);
        self.submit_reprojection().map(drop)
    }

    pub fn add_points<I: IntoIterator<Item = GeoPoint>>(&self, points: I) -> Result<()> {
        self.ensure_running()?;
        self.store.add_points(points);
        self.submit_reprojection().map(drop)
    }

    /// Remove every point; the next pass publishes an empty task
    pub fn clear_points(&self) -> Result<()> {
        self.ensure_running()?;
        self.store.clear();
        self.submit_reprojection().map(drop)
    }

    /// Ask the worker to rebuild the geometry for the current viewport
    pub fn submit_reprojection(&self) -> Result<u64> {
        self.worker.submit()
    }

    /// Per-frame entry point: resubmit if the view moved, swap in new results and return
    /// the task to draw
    pub fn update(&mut self, live: &ViewportSnapshot) -> Option<ActiveTask<'_, B>> {
        if !self.enabled || !self.worker.is_running() {
            return None;
        }
        if let Err(err) = self.consumer.update(live, &self.worker) {
            tracing::warn!(%err, "Could not submit track pass");
        }
        self.consumer.poll(&self.worker);
        self.consumer.active(&self.worker)
    }

    /// The newly completed task, or `None` if nothing was published since the last call
    pub fn poll_renderable(&mut self) -> Option<ActiveTask<'_, B>> {
        match self.consumer.poll(&self.worker) {
            FrameUpdate::Unchanged => None,
            FrameUpdate::Swapped { .. } => self.consumer.active(&self.worker),
        }
    }

    /// Task currently drawn, without polling
    pub fn active_task(&self) -> Option<ActiveTask<'_, B>> {
        self.consumer.active(&self.worker)
    }

    /// A disabled layer neither submits nor polls
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.consumer.invalidate();
        }
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn store(&self) -> &Arc<PointStore> {
        &self.store
    }

    #[inline]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    #[inline]
    pub fn worker(&self) -> &TrackWorker<B> {
        &self.worker
    }

    /// Stop the worker thread; every later mutation fails with [`TrackError::Disposed`]
    pub fn dispose(&mut self) {
        self.worker.dispose();
        tracing::info!("Disposed track layer");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.worker.is_running() {
            Ok(())
        } else {
            Err(TrackError::Disposed)
        }
    }
}
