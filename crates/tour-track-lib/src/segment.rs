//! Segment building: turns projected points into clipped, tile-relative polylines
//!
//! Walks the projected track once per pass. Runs are broken at dateline flips, at tour
//! boundaries and wherever the clipper leaves the window, so tours are never joined by a
//! spurious line and nothing wraps across the whole map.

use crate::{ClipOutcome, ClipWindow, GeometrySink, LineClipper, ProjectedBuffer, ViewportSnapshot};
use geo::Coord;

/// Builds polylines for one layer, reusing its scratch buffers between passes
#[derive(Debug)]
pub struct SegmentBuilder {
    clipper: LineClipper,
    /// Consecutive points closer than this (in pixels, per axis) are coalesced
    min_distance: f64,
    /// Minimum pixel spacing between direction arrow anchors, `None` disables arrows
    arrow_spacing: Option<f64>,
    run: Vec<Coord<f32>>,
    run_colors: Vec<u32>,
    /// Most recent point skipped by decimation, flushed when the run closes
    pending: Option<(Coord<f64>, u32)>,
    last_kept: Coord<f64>,
    arrows: Vec<Coord<f32>>,
    last_arrow: Option<Coord<f64>>,
}

/// Per-pass constants derived from the viewport
struct PassFrame {
    center_x: f64,
    center_y: f64,
    world: f64,
    half_world: f64,
}

impl PassFrame {
    fn new(viewport: &ViewportSnapshot) -> Self {
        let world = viewport.world_pixels();
        Self {
            center_x: viewport.x,
            center_y: viewport.y,
            world,
            half_world: world / 2.0,
        }
    }

    /// Pixel position relative to the center, x wrapped onto the nearest world copy
    ///
    /// Also returns the direction of the wrap (-1, 0 or 1).
    #[inline]
    fn to_pixel(&self, (px, py): (f64, f64)) -> (Coord<f64>, i8) {
        let mut x = (px - self.center_x) * self.world;
        let y = (py - self.center_y) * self.world;
        let mut flip = 0;
        if x > self.half_world {
            x -= self.world;
            flip = -1;
        } else if x < -self.half_world {
            x += self.world;
            flip = 1;
        }
        (Coord { x, y }, flip)
    }
}

#[inline]
fn to_f32(c: Coord<f64>) -> Coord<f32> {
    Coord {
        x: c.x as f32,
        y: c.y as f32,
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SegmentBuilder {
    pub fn new(window: ClipWindow, min_distance: f64, arrow_spacing: Option<f64>) -> Self {
        Self {
            clipper: LineClipper::new(window),
            min_distance,
            arrow_spacing,
            run: Vec::new(),
            run_colors: Vec::new(),
            pending: None,
            last_kept: Coord { x: 0.0, y: 0.0 },
            arrows: Vec::new(),
            last_arrow: None,
        }
    }

    #[inline]
    pub fn window(&self) -> &ClipWindow {
        self.clipper.window()
    }

    /// Build all polylines for `projected` under `viewport` into `sink`
    ///
    /// `colors` holds one color per projected point; `tour_starts` is strictly increasing.
    /// The sink is cleared first. Returns the number of polylines emitted.
    pub fn build<S: GeometrySink>(
        &mut self,
        projected: &ProjectedBuffer,
        colors: &[u32],
        tour_starts: &[usize],
        viewport: &ViewportSnapshot,
        sink: &mut S,
    ) -> usize {
        #[cfg(feature = "profiling")]
        profiling::scope!("segment_builder::build");

        sink.clear();
        sink.begin(viewport);
        self.arrows.clear();
        self.last_arrow = None;

        let num_points = projected.len();
        let Some(first) = projected.get(0) else {
            return 0;
        };

        let frame = PassFrame::new(viewport);
        let color_at = |index: usize| colors.get(index).copied().unwrap_or(0);
        let mut next_tours = tour_starts.iter().copied().filter(|&start| start > 0);
        let mut next_tour_start = next_tours.next().unwrap_or(usize::MAX);
        let mut emitted = 0;

        let (mut prev, mut prev_flip) = frame.to_pixel(first);
        self.start_run(prev, color_at(0));

        for index in 1..num_points {
            let Some(projected_point) = projected.get(index) else {
                break;
            };
            let (pixel, flip) = frame.to_pixel(projected_point);
            let color = color_at(index);

            // Tours are never joined, even when geometrically contiguous
            let tour_break = index >= next_tour_start;
            while next_tour_start <= index {
                next_tour_start = next_tours.next().unwrap_or(usize::MAX);
            }

            // Dateline flip: the point was wrapped differently than its predecessor, or
            // sits on the other side of the world
            let dateline_break =
                flip != prev_flip || (pixel.x - prev.x).abs() > frame.half_world;

            if tour_break || dateline_break {
                emitted += self.close_run(sink);
                self.start_run(pixel, color);
                prev = pixel;
                prev_flip = flip;
                continue;
            }

            match self.clipper.clip_next(pixel.x, pixel.y) {
                ClipOutcome::Accept => {
                    self.extend_run(pixel, color);
                    self.collect_arrow(pixel);
                }
                ClipOutcome::AcceptWithBreak => {
                    emitted += self.close_run(sink);
                    let [x0, y0, x1, y1] = self.clipper.segment();
                    sink.add_line(
                        &[
                            to_f32(Coord { x: x0, y: y0 }),
                            to_f32(Coord { x: x1, y: y1 }),
                        ],
                        &[color_at(index - 1), color],
                    );
                    emitted += 1;
                    if self.clipper.prev_inside() {
                        self.push_point(pixel, color);
                    }
                }
                ClipOutcome::Reject => {
                    emitted += self.close_run(sink);
                }
            }
            prev = pixel;
        }

        emitted += self.close_run(sink);
        if self.arrow_spacing.is_some() && !self.arrows.is_empty() {
            sink.add_direction_arrows(&self.arrows);
        }

        tracing::trace!(
            points = num_points,
            lines = emitted,
            arrows = self.arrows.len(),
            "Built track segments"
        );
        emitted
    }

    fn start_run(&mut self, pixel: Coord<f64>, color: u32) {
        self.clipper.clip_start(pixel.x, pixel.y);
        self.run.clear();
        self.run_colors.clear();
        self.pending = None;
        if self.clipper.prev_inside() {
            self.push_point(pixel, color);
            self.collect_arrow(pixel);
        }
    }

    #[inline]
    fn push_point(&mut self, pixel: Coord<f64>, color: u32) {
        self.run.push(to_f32(pixel));
        self.run_colors.push(color);
        self.last_kept = pixel;
        self.pending = None;
    }

    fn extend_run(&mut self, pixel: Coord<f64>, color: u32) {
        let dx = pixel.x - self.last_kept.x;
        let dy = pixel.y - self.last_kept.y;
        if self.run.is_empty() || dx.abs() > self.min_distance || dy.abs() > self.min_distance {
            self.push_point(pixel, color);
        } else {
            self.pending = Some((pixel, color));
        }
    }

    fn collect_arrow(&mut self, pixel: Coord<f64>) {
        let Some(spacing) = self.arrow_spacing else {
            return;
        };
        let far_enough = self.last_arrow.is_none_or(|last| {
            (pixel.x - last.x).abs() > spacing || (pixel.y - last.y).abs() > spacing
        });
        if far_enough {
            self.arrows.push(to_f32(pixel));
            self.last_arrow = Some(pixel);
        }
    }

    /// Emit the current run if it forms a line; returns the number of lines emitted
    fn close_run<S: GeometrySink>(&mut self, sink: &mut S) -> usize {
        if let Some((pixel, color)) = self.pending.take() {
            self.push_point(pixel, color);
        }
        let emitted = if self.run.len() >= 2 {
            sink.add_line(&self.run, &self.run_colors);
            1
        } else {
            0
        };
        self.run.clear();
        self.run_colors.clear();
        emitted
    }
}
