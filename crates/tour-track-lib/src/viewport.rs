//! Camera state captured for a worker pass, and the transform that maps compiled geometry
//! back under a live camera

use crate::{Result, TrackError, utils};
use std::sync::{PoisonError, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Deepest zoom level the pipeline compiles for
pub const MAX_ZOOM_LEVEL: u32 = 30;

/// Map position captured atomically at the start of a worker pass
///
/// `x`/`y` are the camera center in plane units, `scale` is `2^zoom` (fractional zooms
/// allowed), `tile_size` is the tile edge length in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportSnapshot {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub tile_size: u32,
}

impl Default for ViewportSnapshot {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            scale: 1.0,
            tile_size: 256,
        }
    }
}

impl ViewportSnapshot {
    pub fn new(x: f64, y: f64, scale: f64, tile_size: u32) -> Self {
        Self {
            x,
            y,
            scale,
            tile_size,
        }
    }

    /// Camera centered on a WGS84 position at a (possibly fractional) zoom
    pub fn from_wgs84(lat: f64, lon: f64, zoom: f64, tile_size: u32) -> Self {
        let (x, y) = utils::wgs84_to_plane(lat, lon);
        Self::new(x, y, zoom.exp2(), tile_size)
    }

    /// Camera center as (latitude, longitude)
    pub fn center_wgs84(&self) -> (f64, f64) {
        utils::plane_to_wgs84(self.x, self.y)
    }

    /// Integer zoom level the geometry is compiled at
    #[inline]
    pub fn zoom_level(&self) -> u32 {
        (self.scale.max(1.0).log2().floor() as u32).min(MAX_ZOOM_LEVEL)
    }

    /// `2^zoom_level`
    #[inline]
    pub fn compile_scale(&self) -> f64 {
        (1u64 << self.zoom_level()) as f64
    }

    /// Width of the whole world in pixels at the compile scale
    #[inline]
    pub fn world_pixels(&self) -> f64 {
        self.tile_size as f64 * self.compile_scale()
    }

    /// Move the center by a pixel offset at the current (fractional) scale
    ///
    /// x wraps around the world, y is clamped to the plane.
    pub fn panned_by_pixels(&self, dx: f64, dy: f64) -> Self {
        let world = self.tile_size as f64 * self.scale;
        Self {
            x: (self.x + dx / world).rem_euclid(1.0),
            y: (self.y + dy / world).clamp(0.0, 1.0),
            ..*self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(TrackError::InvalidViewport(format!(
                "non-finite center ({}, {})",
                self.x, self.y
            )));
        }
        if !self.scale.is_finite() || self.scale < 1.0 {
            return Err(TrackError::InvalidViewport(format!(
                "scale must be a finite value >= 1, got {}",
                self.scale
            )));
        }
        if self.scale.log2() > (MAX_ZOOM_LEVEL + 1) as f64 {
            return Err(TrackError::InvalidViewport(format!(
                "zoom deeper than level {MAX_ZOOM_LEVEL}"
            )));
        }
        if self.tile_size == 0 {
            return Err(TrackError::InvalidViewport("tile size is zero".to_string()));
        }
        Ok(())
    }

    /// Transform that draws geometry compiled for `self` under the `live` camera
    pub fn render_transform(&self, live: &ViewportSnapshot) -> RenderTransform {
        let tile_scale = live.tile_size as f64 * live.scale;
        RenderTransform {
            translate_x: utils::wrap_plane_delta(self.x - live.x) * tile_scale,
            translate_y: (self.y - live.y) * tile_scale,
            scale: live.scale / self.compile_scale(),
        }
    }
}

/// Translation and scale applied to compiled vertices: `live = compiled * scale + translate`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    pub translate_x: f64,
    pub translate_y: f64,
    pub scale: f64,
}

impl RenderTransform {
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.scale + self.translate_x,
            y * self.scale + self.translate_y,
        )
    }
}

/// Source of the current map camera state
pub trait ViewportProvider: Send + Sync {
    fn viewport(&self) -> ViewportSnapshot;
}

/// A camera state shared between the UI thread and the worker
#[derive(Debug, Default)]
pub struct SharedViewport {
    inner: RwLock<ViewportSnapshot>,
}

impl SharedViewport {
    pub fn new(viewport: ViewportSnapshot) -> Self {
        Self {
            inner: RwLock::new(viewport),
        }
    }

    pub fn get(&self) -> ViewportSnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, viewport: ViewportSnapshot) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = viewport;
    }

    /// Apply `f` to the current state under the write lock
    pub fn update<F: FnOnce(&mut ViewportSnapshot)>(&self, f: F) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }
}

impl ViewportProvider for SharedViewport {
    fn viewport(&self) -> ViewportSnapshot {
        self.get()
    }
}
