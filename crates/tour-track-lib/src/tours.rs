//! Concatenating several tours into one point sequence with tour boundaries

use crate::GeoPoint;

/// Points of one or more tours, back to back, plus where each tour starts
#[derive(Debug, Clone, PartialEq)]
pub struct TourSet {
    points: Vec<GeoPoint>,
    tour_starts: Vec<usize>,
}

impl Default for TourSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TourSet {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            tour_starts: vec![0],
        }
    }

    /// One tour per GPX track segment; empty segments are skipped
    pub fn from_gpx(gpx: &gpx::Gpx) -> Self {
        let mut tours = Self::new();
        tours.push_gpx(gpx);
        tours
    }

    pub fn push_gpx(&mut self, gpx: &gpx::Gpx) {
        #[cfg(feature = "profiling")]
        profiling::scope!("tours::push_gpx");

        for track in &gpx.tracks {
            for segment in &track.segments {
                self.push_tour(segment.points.iter().filter_map(|waypoint| {
                    let point = waypoint.point();
                    GeoPoint::from_degrees(point.y(), point.x())
                        .inspect_err(|err| tracing::warn!(%err, "Skipping waypoint"))
                        .ok()
                }));
            }
        }
    }

    /// Append a tour; an empty one leaves the set unchanged
    pub fn push_tour<I: IntoIterator<Item = GeoPoint>>(&mut self, points: I) {
        let start = self.points.len();
        self.points.extend(points);
        if self.points.len() > start && start > 0 {
            self.tour_starts.push(start);
        }
    }

    #[inline]
    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    #[inline]
    pub fn tour_starts(&self) -> &[usize] {
        &self.tour_starts
    }

    /// Number of non-empty tours
    pub fn tour_count(&self) -> usize {
        if self.points.is_empty() {
            0
        } else {
            self.tour_starts.len()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_parts(self) -> (Vec<GeoPoint>, Vec<usize>) {
        (self.points, self.tour_starts)
    }
}
