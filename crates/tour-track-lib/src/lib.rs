//! Tour Track Library - Asynchronous Track Geometry Pipeline
//!
//! This library turns a live, mutable sequence of GPS points (one or more concatenated tours)
//! into tile-relative, clipped, dateline-safe line segments ready for GPU upload. All the
//! expensive work happens on a dedicated worker thread while the viewport keeps panning and
//! zooming; the render thread only ever swaps in finished results.
//!
//! # Architecture
//!
//! - **[`PointStore`]**: Mutex-guarded point sequence plus tour boundaries
//! - **[`Projector`]**: Geographic to map-plane projection into a reusable [`ProjectedBuffer`]
//! - **[`LineClipper`]**: Cohen-Sutherland clipping against a fixed [`ClipWindow`]
//! - **[`SegmentBuilder`]**: Dateline flips, tour splitting and decimation, feeding a [`GeometrySink`]
//! - **[`TrackWorker`]**: Background thread writing into a two-slot [`Task`] arena
//! - **[`RenderConsumer`]**: Non-blocking per-frame poll on the render thread
//! - **[`CoalescedRequestScheduler`]**: Generation-counted debounce shared by the worker
//!   mailbox and [`CameraSync`]
//! - **[`TrackLayer`]**: High-level owner wiring all of the above together
//! - **[`TourSet`]**: Concatenates tours (e.g. GPX track segments) into points plus tour boundaries
//!
//! # Threading
//!
//! - The owning thread mutates the [`PointStore`] and submits reprojections
//! - One worker thread per layer projects and builds geometry
//! - The render thread polls once per frame and never blocks

mod camera;
mod clipper;
mod consumer;
mod layer;
mod point;
mod projection;
mod scheduler;
mod segment;
mod sink;
mod store;
mod task;
mod tours;
pub mod utils;
mod viewport;
mod worker;

// Public API exports
pub use camera::{CameraSync, CameraTarget};
pub use clipper::{ClipOutcome, ClipWindow, LineClipper};
pub use consumer::{FrameUpdate, RenderConsumer, ViewIdentity};
pub use layer::{LayerConfig, TrackLayer};
pub use point::GeoPoint;
pub use projection::{ProjectedBuffer, Projector};
pub use scheduler::{
    Clock, CoalescedRequestScheduler, CoalescingGate, DelayedExecutor, GateDecision, ManualClock,
    ManualTimer, SchedulerState, SystemClock, TokioTimer,
};
pub use segment::SegmentBuilder;
pub use sink::{COORD_SCALE, GeometrySink, LineBucket};
pub use store::{PointStore, TrackPoints};
pub use task::{ActiveTask, Task};
pub use tours::TourSet;
pub use viewport::{RenderTransform, SharedViewport, ViewportProvider, ViewportSnapshot};
pub use worker::{FrameRequester, TrackWorker};

/// Error types for the track pipeline
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("Invalid tour boundary at position {index} (value {value}): {reason}")]
    InvalidTourBoundaries {
        index: usize,
        value: usize,
        reason: &'static str,
    },

    #[error("Color count mismatch: {points} points but {colors} colors")]
    ColorCountMismatch { points: usize, colors: usize },

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid viewport: {0}")]
    InvalidViewport(String),

    #[error("Invalid layer configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker pass panicked: {0}")]
    WorkerPanicked(String),

    #[error("Track layer has been disposed")]
    Disposed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackError>;
