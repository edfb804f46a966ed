//! Camera animation requests, debounced so a burst of "move to" calls lands on the last one

use crate::{
    Clock, CoalescedRequestScheduler, DelayedExecutor, FrameRequester, Result, SchedulerState,
    SharedViewport, TrackError, ViewportSnapshot,
    viewport::MAX_ZOOM_LEVEL,
};
use std::sync::Arc;
use std::time::Duration;

/// Where the camera should end up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    pub lat: f64,
    pub lon: f64,
    pub zoom: f64,
}

impl CameraTarget {
    pub fn new(lat: f64, lon: f64, zoom: f64) -> Self {
        Self { lat, lon, zoom }
    }

    fn validate(&self) -> Result<()> {
        let valid = self.lat.is_finite()
            && self.lon.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (0.0..=MAX_ZOOM_LEVEL as f64).contains(&self.zoom);
        if valid {
            Ok(())
        } else {
            Err(TrackError::InvalidCoordinate(format!("{self:?}")))
        }
    }
}

/// Applies camera targets to a [`SharedViewport`], at most once per threshold window
#[derive(Clone)]
pub struct CameraSync {
    scheduler: CoalescedRequestScheduler<CameraTarget>,
}

impl CameraSync {
    pub fn new(
        threshold: Duration,
        viewport: Arc<SharedViewport>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn DelayedExecutor>,
        frames: Arc<dyn FrameRequester>,
    ) -> Self {
        let scheduler = CoalescedRequestScheduler::new(threshold, clock, executor, {
            move |target: CameraTarget| {
                viewport.update(|current| {
                    *current = ViewportSnapshot::from_wgs84(
                        target.lat,
                        target.lon,
                        target.zoom,
                        current.tile_size,
                    );
                });
                tracing::debug!(
                    lat = target.lat,
                    lon = target.lon,
                    zoom = target.zoom,
                    "Moved camera"
                );
                frames.request_frame();
            }
        });
        Self { scheduler }
    }

    /// Request a camera move; superseded requests are dropped
    pub fn move_to(&self, target: CameraTarget) -> Result<()> {
        target.validate()?;
        self.scheduler.request(target);
        Ok(())
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn generation(&self) -> u64 {
        self.scheduler.generation()
    }
}
