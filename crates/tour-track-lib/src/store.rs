//! PointStore - thread-safe owner of the track point sequence
//!
//! The mutex protects the point list only. Readers take the lock just long enough to
//! clone an [`Arc`] of the current data and reset the dirty flag; projection then runs
//! without holding the lock. Writers replace or copy-on-write that [`Arc`].

use crate::{GeoPoint, Result, TrackError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Immutable view of the point sequence, its colors and its tour boundaries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPoints {
    points: Vec<GeoPoint>,
    /// One ARGB color per point
    colors: Vec<u32>,
    /// Strictly increasing start indices, always beginning with 0
    tour_starts: Vec<usize>,
}

impl TrackPoints {
    #[inline]
    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    #[inline]
    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    #[inline]
    pub fn tour_starts(&self) -> &[usize] {
        &self.tour_starts
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

struct StoreState {
    data: Arc<TrackPoints>,
    dirty: bool,
    /// Bumped on every mutation
    revision: u64,
}

/// Mutex-guarded point sequence shared between the owning thread and the worker
pub struct PointStore {
    default_color: u32,
    state: Mutex<StoreState>,
}

impl PointStore {
    /// Create an empty store; appended points get `default_color`
    pub fn new(default_color: u32) -> Self {
        Self {
            default_color,
            state: Mutex::new(StoreState {
                data: Arc::new(TrackPoints {
                    tour_starts: vec![0],
                    ..Default::default()
                }),
                dirty: true,
                revision: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // The state is replaced wholesale, a panicking writer cannot leave it half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole sequence, coloring every point with the default color
    pub fn set_points(&self, points: Vec<GeoPoint>, tour_starts: Vec<usize>) -> Result<()> {
        let colors = vec![self.default_color; points.len()];
        self.set_points_with_colors(points, colors, tour_starts)
    }

    /// Replace the whole sequence with per-point colors
    ///
    /// On validation failure the previous contents stay in place.
    pub fn set_points_with_colors(
        &self,
        points: Vec<GeoPoint>,
        colors: Vec<u32>,
        tour_starts: Vec<usize>,
    ) -> Result<()> {
        if colors.len() != points.len() {
            return Err(TrackError::ColorCountMismatch {
                points: points.len(),
                colors: colors.len(),
            });
        }
        let tour_starts = normalize_tour_starts(tour_starts, points.len())?;

        let data = Arc::new(TrackPoints {
            points,
            colors,
            tour_starts,
        });

        let mut state = self.lock();
        state.data = data;
        state.dirty = true;
        state.revision += 1;
        tracing::trace!(
            revision = state.revision,
            points = state.data.len(),
            tours = state.data.tour_starts.len(),
            "Replaced track points"
        );
        Ok(())
    }

    /// Append a single point to the last tour
    pub fn append_point(&self, point: GeoPoint) {
        self.add_points(std::iter::once(point));
    }

    /// Append points to the last tour
    ///
    /// Extends in place unless a snapshot of the current contents is still held elsewhere,
    /// in which case the sequence is copied first.
    pub fn add_points<I: IntoIterator<Item = GeoPoint>>(&self, points: I) {
        let default_color = self.default_color;
        let mut state = self.lock();
        let data = Arc::make_mut(&mut state.data);
        let before = data.points.len();
        data.points.extend(points);
        let added = data.points.len() - before;
        if added == 0 {
            return;
        }
        data.colors.resize(data.points.len(), default_color);
        state.dirty = true;
        state.revision += 1;
    }

    /// Remove all points and tours
    pub fn clear(&self) {
        let mut state = self.lock();
        state.data = Arc::new(TrackPoints {
            tour_starts: vec![0],
            ..Default::default()
        });
        state.dirty = true;
        state.revision += 1;
    }

    /// Force the next worker pass to reproject
    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Current contents, regardless of the dirty flag
    pub fn snapshot(&self) -> Arc<TrackPoints> {
        self.lock().data.clone()
    }

    /// Current contents plus whether they changed since the last checkout, clearing the flag
    ///
    /// Callers should drop the returned [`Arc`] once done with it: while a second reference
    /// is alive, every append copies the whole sequence.
    pub fn checkout(&self) -> (Arc<TrackPoints>, bool) {
        let mut state = self.lock();
        let dirty = std::mem::replace(&mut state.dirty, false);
        (state.data.clone(), dirty)
    }

    /// Take the current contents and clear the dirty flag, if anything changed
    pub fn take_if_dirty(&self) -> Option<Arc<TrackPoints>> {
        let (data, dirty) = self.checkout();
        dirty.then_some(data)
    }
}

/// Validate tour start indices, make the leading 0 explicit and drop a terminal N
fn normalize_tour_starts(mut tour_starts: Vec<usize>, num_points: usize) -> Result<Vec<usize>> {
    for (index, &value) in tour_starts.iter().enumerate() {
        if value > num_points {
            return Err(TrackError::InvalidTourBoundaries {
                index,
                value,
                reason: "index past the end of the point sequence",
            });
        }
        if index > 0 && value <= tour_starts[index - 1] {
            return Err(TrackError::InvalidTourBoundaries {
                index,
                value,
                reason: "indices must be strictly increasing",
            });
        }
    }

    // A terminal N only closes the last tour; kept, it would split off appended points
    if num_points > 0 && tour_starts.last() == Some(&num_points) {
        tour_starts.pop();
    }
    if tour_starts.first() != Some(&0) {
        tour_starts.insert(0, 0);
    }
    Ok(tour_starts)
}
