//! Projection of geographic points onto the normalized map plane

use crate::{GeoPoint, utils};
use rayon::prelude::*;

/// Above this many points the projection is split across the rayon pool
const PARALLEL_THRESHOLD: usize = 16 * 1024;

/// Flat `x, y` pairs in plane units, one pair per projected point
///
/// The backing storage only ever grows so repeated passes do not reallocate.
#[derive(Debug, Clone, Default)]
pub struct ProjectedBuffer {
    coords: Vec<f64>,
    len: usize,
}

impl ProjectedBuffer {
    /// Number of projected points
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in points
    #[inline]
    pub fn capacity(&self) -> usize {
        self.coords.len() / 2
    }

    /// Plane coordinates of point `index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        if index >= self.len {
            return None;
        }
        Some((self.coords[index * 2], self.coords[index * 2 + 1]))
    }

    /// The valid `x, y` pairs
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.coords[..self.len * 2]
    }

    /// Make room for `len` points, keeping already written values
    fn ensure_len(&mut self, len: usize) {
        if len * 2 > self.coords.len() {
            self.coords.resize(len * 2, 0.0);
        }
        self.len = len;
    }
}

/// Projects point sequences into a reusable [`ProjectedBuffer`]
#[derive(Debug, Default)]
pub struct Projector {
    buffer: ProjectedBuffer,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project all points in a single pass, replacing the previous contents
    pub fn project(&mut self, points: &[GeoPoint]) -> &ProjectedBuffer {
        #[cfg(feature = "profiling")]
        profiling::scope!("projector::project");

        self.buffer.ensure_len(points.len());
        let coords = &mut self.buffer.coords[..points.len() * 2];

        if points.len() >= PARALLEL_THRESHOLD {
            coords
                .par_chunks_mut(2)
                .zip(points.par_iter())
                .for_each(|(out, point)| project_point(point, out));
        } else {
            coords
                .chunks_mut(2)
                .zip(points.iter())
                .for_each(|(out, point)| project_point(point, out));
        }

        &self.buffer
    }

    /// Result of the last [`Projector::project`] call
    #[inline]
    pub fn buffer(&self) -> &ProjectedBuffer {
        &self.buffer
    }
}

#[inline(always)]
fn project_point(point: &GeoPoint, out: &mut [f64]) {
    let (x, y) = utils::wgs84_to_plane(point.latitude(), point.longitude());
    out[0] = x;
    out[1] = y;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(n: usize) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| GeoPoint::from_degrees(46.0 + i as f64 * 1e-4, 7.0 + i as f64 * 1e-4).unwrap())
            .collect()
    }

    #[test]
    fn test_project_origin() {
        let mut projector = Projector::new();
        let buffer = projector.project(&[GeoPoint::default()]);
        assert_eq!(buffer.len(), 1);
        let (x, y) = buffer.get(0).unwrap();
        assert!((x - 0.5).abs() < 1e-12);
        assert!((y - 0.5).abs() < 1e-12);
        assert!(buffer.get(1).is_none());
    }

    #[test]
    fn test_buffer_grows_but_never_shrinks() {
        let mut projector = Projector::new();
        projector.project(&track(100));
        assert_eq!(projector.buffer().capacity(), 100);

        projector.project(&track(10));
        assert_eq!(projector.buffer().len(), 10);
        assert_eq!(projector.buffer().capacity(), 100);
        assert_eq!(projector.buffer().as_slice().len(), 20);

        projector.project(&[]);
        assert!(projector.buffer().is_empty());
        assert_eq!(projector.buffer().capacity(), 100);
    }

    #[test]
    fn test_projection_is_deterministic() {
        let points = track(500);
        let mut first = Projector::new();
        let mut second = Projector::new();
        first.project(&points);
        second.project(&track(1000));
        second.project(&points);
        assert_eq!(first.buffer().as_slice(), second.buffer().as_slice());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let points = track(PARALLEL_THRESHOLD + 7);
        let mut projector = Projector::new();
        projector.project(&points);

        for (i, point) in points.iter().enumerate().step_by(997) {
            let (x, y) = utils::wgs84_to_plane(point.latitude(), point.longitude());
            assert_eq!(projector.buffer().get(i), Some((x, y)));
        }
    }
}
