//! Cohen-Sutherland line clipping against a fixed square window
//!
//! Coordinates are device pixels relative to the compile center. The window bounds what
//! reaches the sink, which keeps fixed-point vertex formats from overflowing.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const INSIDE: u8 = 0;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const ABOVE: u8 = 4;
const BELOW: u8 = 8;

/// Each endpoint is moved at most twice, anything beyond that is rounding noise
const MAX_CLIP_ITERATIONS: usize = 4;

/// Square window symmetric about the origin, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClipWindow {
    half_extent: f64,
}

impl ClipWindow {
    pub fn new(half_extent: f64) -> Self {
        Self {
            half_extent: half_extent.abs(),
        }
    }

    /// Window spanning `multiple` tiles on each side of the center
    pub fn for_tile_size(tile_size: u32, multiple: u32) -> Self {
        Self::new(tile_size as f64 * multiple as f64)
    }

    #[inline]
    pub fn half_extent(&self) -> f64 {
        self.half_extent
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.outcode(x, y) == INSIDE
    }

    #[inline]
    fn outcode(&self, x: f64, y: f64) -> u8 {
        let h = self.half_extent;
        let mut code = INSIDE;
        if x < -h {
            code |= LEFT;
        } else if x > h {
            code |= RIGHT;
        }
        if y < -h {
            code |= ABOVE;
        } else if y > h {
            code |= BELOW;
        }
        code
    }
}

/// Result of feeding the next polyline vertex to the clipper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipOutcome {
    /// Both this vertex and the previous one are inside: extend the current run
    Accept,
    /// The segment from the previous vertex is only partly visible; the visible part
    /// is available from [`LineClipper::segment`]
    AcceptWithBreak,
    /// The segment from the previous vertex is entirely outside
    Reject,
}

/// Stateful clipper walking a polyline vertex by vertex
#[derive(Debug, Clone)]
pub struct LineClipper {
    window: ClipWindow,
    prev_x: f64,
    prev_y: f64,
    prev_outcode: u8,
    prev_valid: bool,
    segment: [f64; 4],
}

impl LineClipper {
    pub fn new(window: ClipWindow) -> Self {
        Self {
            window,
            prev_x: 0.0,
            prev_y: 0.0,
            prev_outcode: INSIDE,
            prev_valid: false,
            segment: [0.0; 4],
        }
    }

    #[inline]
    pub fn window(&self) -> &ClipWindow {
        &self.window
    }

    /// Begin a new polyline at `(x, y)`
    pub fn clip_start(&mut self, x: f64, y: f64) {
        self.prev_valid = x.is_finite() && y.is_finite();
        self.prev_x = x;
        self.prev_y = y;
        self.prev_outcode = self.window.outcode(x, y);
    }

    /// Feed the next vertex, classifying the segment from the previous one
    pub fn clip_next(&mut self, x: f64, y: f64) -> ClipOutcome {
        let valid = x.is_finite() && y.is_finite();
        let outcode = self.window.outcode(x, y);

        let outcome = if !valid || !self.prev_valid {
            ClipOutcome::Reject
        } else if outcode == INSIDE && self.prev_outcode == INSIDE {
            ClipOutcome::Accept
        } else if outcode & self.prev_outcode != 0 {
            ClipOutcome::Reject
        } else if self.clip_segment(x, y, outcode) {
            ClipOutcome::AcceptWithBreak
        } else {
            ClipOutcome::Reject
        };

        self.prev_valid = valid;
        self.prev_x = x;
        self.prev_y = y;
        self.prev_outcode = outcode;
        outcome
    }

    /// Whether the last vertex passed in is inside the window
    #[inline]
    pub fn prev_inside(&self) -> bool {
        self.prev_valid && self.prev_outcode == INSIDE
    }

    /// Visible part of the last [`ClipOutcome::AcceptWithBreak`] segment as `[x0, y0, x1, y1]`
    #[inline]
    pub fn segment(&self) -> [f64; 4] {
        self.segment
    }

    /// Clip the segment from the previous vertex to `(x1, y1)`; true if anything remains
    fn clip_segment(&mut self, x1: f64, y1: f64, outcode1: u8) -> bool {
        let h = self.window.half_extent;
        let (mut ax, mut ay, mut a_code) = (self.prev_x, self.prev_y, self.prev_outcode);
        let (mut bx, mut by, mut b_code) = (x1, y1, outcode1);

        for _ in 0..=MAX_CLIP_ITERATIONS {
            if a_code | b_code == INSIDE {
                self.segment = [
                    ax.clamp(-h, h),
                    ay.clamp(-h, h),
                    bx.clamp(-h, h),
                    by.clamp(-h, h),
                ];
                return true;
            }
            if a_code & b_code != 0 {
                return false;
            }

            let out = if a_code != INSIDE { a_code } else { b_code };
            let (x, y) = if out & ABOVE != 0 {
                (ax + (bx - ax) * (-h - ay) / (by - ay), -h)
            } else if out & BELOW != 0 {
                (ax + (bx - ax) * (h - ay) / (by - ay), h)
            } else if out & RIGHT != 0 {
                (h, ay + (by - ay) * (h - ax) / (bx - ax))
            } else {
                (-h, ay + (by - ay) * (-h - ax) / (bx - ax))
            };

            if out == a_code {
                ax = x;
                ay = y;
                a_code = self.window.outcode(ax, ay);
            } else {
                bx = x;
                by = y;
                b_code = self.window.outcode(bx, by);
            }
        }

        tracing::trace!(
            "Clipping did not converge for ({}, {}) -> ({}, {})",
            self.prev_x,
            self.prev_y,
            x1,
            y1
        );
        false
    }
}
