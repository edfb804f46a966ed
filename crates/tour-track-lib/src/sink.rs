//! Geometry sinks: where the segment builder hands over finished polylines
//!
//! The renderer owns the real vertex format; [`LineBucket`] is a plain accumulator used by
//! tools and tests.

use crate::ViewportSnapshot;
use geo::{Coord, LineString};

/// Fixed-point factor used when packing vertices into `i16`
///
/// With the default 2048 px clip window the largest packed value is 16384.
pub const COORD_SCALE: f32 = 8.0;

/// Renderer-owned accumulator of GPU-ready geometry
pub trait GeometrySink: Send + 'static {
    /// Called once at the start of every pass, after [`GeometrySink::clear`]
    fn begin(&mut self, viewport: &ViewportSnapshot) {
        let _ = viewport;
    }

    /// Drop everything accumulated so far
    fn clear(&mut self);

    /// Add one polyline of at least two vertices with one color per vertex
    fn add_line(&mut self, points: &[Coord<f32>], colors: &[u32]);

    /// Anchor positions for direction arrows along the track
    fn add_direction_arrows(&mut self, anchors: &[Coord<f32>]) {
        let _ = anchors;
    }

    fn is_empty(&self) -> bool;
}

/// Polylines in compile-relative pixels with per-vertex colors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineBucket {
    lines: Vec<LineString<f32>>,
    colors: Vec<Vec<u32>>,
    arrows: Vec<Coord<f32>>,
}

impl LineBucket {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn lines(&self) -> &[LineString<f32>] {
        &self.lines
    }

    /// Vertex colors, parallel to [`LineBucket::lines`]
    #[inline]
    pub fn line_colors(&self) -> &[Vec<u32>] {
        &self.colors
    }

    #[inline]
    pub fn arrows(&self) -> &[Coord<f32>] {
        &self.arrows
    }

    pub fn vertex_count(&self) -> usize {
        self.lines.iter().map(|line| line.0.len()).sum()
    }

    /// All vertices packed as `i16` fixed point, or `None` if any would overflow
    pub fn fixed_point_vertices(&self) -> Option<Vec<[i16; 2]>> {
        let pack = |v: f32| {
            let scaled = (v * COORD_SCALE).round();
            (scaled >= i16::MIN as f32 && scaled <= i16::MAX as f32).then_some(scaled as i16)
        };
        self.lines
            .iter()
            .flat_map(|line| line.0.iter())
            .map(|c| Some([pack(c.x)?, pack(c.y)?]))
            .collect()
    }
}

impl GeometrySink for LineBucket {
    fn clear(&mut self) {
        self.lines.clear();
        self.colors.clear();
        self.arrows.clear();
    }

    fn add_line(&mut self, points: &[Coord<f32>], colors: &[u32]) {
        if points.len() < 2 {
            return;
        }
        self.lines.push(LineString::new(points.to_vec()));
        self.colors.push(colors.to_vec());
    }

    fn add_direction_arrows(&mut self, anchors: &[Coord<f32>]) {
        self.arrows.extend_from_slice(anchors);
    }

    fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.arrows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: f32, y: f32) -> Coord<f32> {
        Coord { x, y }
    }

    #[test]
    fn test_add_line_and_clear() {
        let mut bucket = LineBucket::new();
        assert!(bucket.is_empty());

        bucket.add_line(&[coord(0.0, 0.0), coord(1.0, 1.0)], &[1, 2]);
        bucket.add_line(&[coord(5.0, 5.0)], &[3]);
        bucket.add_direction_arrows(&[coord(0.5, 0.5)]);

        assert_eq!(bucket.lines().len(), 1);
        assert_eq!(bucket.line_colors(), &[vec![1, 2]]);
        assert_eq!(bucket.vertex_count(), 2);
        assert_eq!(bucket.arrows().len(), 1);

        bucket.clear();
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_fixed_point_vertices() {
        let mut bucket = LineBucket::new();
        bucket.add_line(&[coord(-2048.0, 2048.0), coord(0.125, -0.5)], &[0, 0]);
        assert_eq!(
            bucket.fixed_point_vertices(),
            Some(vec![[-16384, 16384], [1, -4]])
        );

        bucket.add_line(&[coord(0.0, 0.0), coord(5000.0, 0.0)], &[0, 0]);
        assert_eq!(bucket.fixed_point_vertices(), None);
    }
}
