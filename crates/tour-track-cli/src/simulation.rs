//! Simulated render loop: pans a camera over the loaded tours and reports what each frame
//! gets from the track layer

use crate::loader;
use crate::settings::Settings;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tour_track_lib::{
    CameraSync, CameraTarget, LineBucket, SharedViewport, SystemClock, TokioTimer, TrackLayer,
    ViewportSnapshot,
};

/// Camera jumps are debounced over this window
const CAMERA_COALESCE_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct FrameStats {
    frames: usize,
    swaps: usize,
    woken: usize,
    empty_frames: usize,
    max_vertices: usize,
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let tours = if settings.gpx_files.is_empty() {
        let lat = settings.lat.unwrap_or(47.37);
        let lon = settings.lon.unwrap_or(8.54);
        tracing::info!(points = settings.demo_points, "No GPX files given, using demo tours");
        loader::demo_tours(lat, lon, settings.demo_points)?
    } else {
        loader::load_tours(settings.gpx_files.clone()).await?
    };

    let first = tours.points().first().copied();
    let lat = settings
        .lat
        .or(first.map(|p| p.latitude()))
        .unwrap_or_default();
    let lon = settings
        .lon
        .or(first.map(|p| p.longitude()))
        .unwrap_or_default();
    let start = ViewportSnapshot::from_wgs84(lat, lon, settings.zoom, settings.tile_size);
    start.validate()?;

    let viewport = Arc::new(SharedViewport::new(start));
    let wake = Arc::new(Notify::new());
    let frames = {
        let wake = wake.clone();
        Arc::new(move || wake.notify_one())
    };

    let mut layer: TrackLayer<LineBucket> =
        TrackLayer::new(settings.layer_config(), viewport.clone(), frames.clone())?;
    tracing::info!(
        points = tours.len(),
        tours = tours.tour_count(),
        lat,
        lon,
        zoom = settings.zoom,
        "Loaded track"
    );
    layer.set_tours(tours)?;

    let timer = TokioTimer::current().context("no tokio runtime for the camera timer")?;
    let camera = CameraSync::new(
        CAMERA_COALESCE_WINDOW,
        viewport.clone(),
        Arc::new(SystemClock::new()),
        Arc::new(timer),
        frames,
    );

    let mut stats = FrameStats::default();
    let mut last_generation = None;
    let mut interval = tokio::time::interval(settings.frame_interval());

    while stats.frames < settings.frames {
        tokio::select! {
            _ = interval.tick() => {
                viewport.update(|live| *live = live.panned_by_pixels(settings.pan_step, 0.0));
                stats.frames += 1;
                if settings.camera_jump_every > 0 && stats.frames % settings.camera_jump_every == 0 {
                    request_camera_jump(&camera, &viewport.get(), stats.frames / settings.camera_jump_every)?;
                }
            }
            _ = wake.notified() => {
                stats.woken += 1;
            }
        }

        let live = viewport.get();
        let Some(task) = layer.update(&live) else {
            stats.empty_frames += 1;
            continue;
        };
        let bucket = task.bucket();
        stats.max_vertices = stats.max_vertices.max(bucket.vertex_count());
        if last_generation != Some(task.generation()) {
            last_generation = Some(task.generation());
            stats.swaps += 1;
            let transform = task.render_transform(&live);
            tracing::info!(
                frame = stats.frames,
                generation = task.generation(),
                lines = task.line_count(),
                vertices = bucket.vertex_count(),
                arrows = bucket.arrows().len(),
                fixed_point = bucket.fixed_point_vertices().is_some(),
                "New track geometry"
            );
            tracing::debug!(
                translate_x = transform.translate_x,
                translate_y = transform.translate_y,
                scale = transform.scale,
                "Render transform"
            );
        }
    }

    tracing::info!(
        frames = stats.frames,
        swaps = stats.swaps,
        woken = stats.woken,
        empty_frames = stats.empty_frames,
        max_vertices = stats.max_vertices,
        completed_passes = layer.worker().completed_passes(),
        failed_passes = layer.worker().failed_passes(),
        reprojected_passes = layer.worker().reprojected_passes(),
        "Simulation finished"
    );
    layer.dispose();
    Ok(())
}

/// Alternate between zooming in and out by one level around the live center
fn request_camera_jump(
    camera: &CameraSync,
    live: &ViewportSnapshot,
    jump: usize,
) -> anyhow::Result<()> {
    let (lat, lon) = live.center_wgs84();
    let zoom = live.scale.log2() + if jump % 2 == 1 { 1.0 } else { -1.0 };
    camera.move_to(CameraTarget::new(lat, lon, zoom.max(0.0)))?;
    tracing::debug!(jump, zoom, "Requested camera jump");
    Ok(())
}
