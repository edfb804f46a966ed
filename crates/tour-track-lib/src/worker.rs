//! Background worker compiling track geometry off the render thread
//!
//! One dedicated thread per layer waits on a single-slot mailbox. A new request replaces the
//! pending one, and a [`CoalescingGate`] spaces passes at least `min_submit_interval` apart.
//! Each pass reprojects the points only when the store is dirty, rebuilds the segments for
//! the latest viewport and writes them into the task slot the render thread is not reading.

use crate::scheduler::{Clock, CoalescingGate, GateDecision, SystemClock};
use crate::task::{SlotCursor, Task, TaskArena};
use crate::{
    GeometrySink, LayerConfig, PointStore, Projector, Result, SegmentBuilder, TrackError,
    ViewportProvider,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Wakes the render thread once a new task has been published
pub trait FrameRequester: Send + Sync {
    fn request_frame(&self);
}

impl<F: Fn() + Send + Sync> FrameRequester for F {
    fn request_frame(&self) {
        self()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingPass {
    due: Duration,
    generation: u64,
}

#[derive(Debug, Default)]
struct Mailbox {
    pending: Option<PendingPass>,
    shutdown: bool,
}

struct WorkerShared<B> {
    arena: TaskArena<B>,
    gate: CoalescingGate,
    clock: SystemClock,
    mailbox: Mutex<Mailbox>,
    signal: Condvar,
    completed: AtomicU64,
    failed: AtomicU64,
    reprojected: AtomicU64,
}

impl<B> WorkerShared<B> {
    fn lock_mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a pending pass is due; `None` once shutdown was requested
    fn wait_for_request(&self) -> Option<u64> {
        let mut mailbox = self.lock_mailbox();
        loop {
            if mailbox.shutdown {
                return None;
            }
            let Some(pending) = mailbox.pending else {
                mailbox = self
                    .signal
                    .wait(mailbox)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let now = self.clock.now();
            if pending.due <= now {
                mailbox.pending = None;
                tracing::trace!(generation = pending.generation, "Picked up track pass");
                return Some(pending.generation);
            }
            let (guard, _) = self
                .signal
                .wait_timeout(mailbox, pending.due - now)
                .unwrap_or_else(PoisonError::into_inner);
            mailbox = guard;
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.lock_mailbox().shutdown
    }
}

/// Worker-thread state reused across passes
struct PassContext {
    store: Arc<PointStore>,
    viewport: Arc<dyn ViewportProvider>,
    projector: Projector,
    builder: SegmentBuilder,
}

/// What one successful pass did
#[derive(Debug, Clone, Copy)]
struct PassStats {
    lines: usize,
    points: usize,
    reprojected: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PassContext {
    fn run_pass<B: GeometrySink>(
        &mut self,
        task: &mut Task<B>,
        generation: u64,
    ) -> Result<PassStats> {
        #[cfg(feature = "profiling")]
        profiling::scope!("track_worker::pass");

        // Clean points are exactly what the projector buffer already holds. The snapshot is
        // dropped at the end of the pass so appends between passes extend in place.
        let (points, reprojected) = self.store.checkout();
        if reprojected {
            self.projector.project(points.points());
        }

        // One snapshot per pass: bucket and viewport always belong together
        let viewport = self.viewport.viewport();
        viewport.validate()?;

        let lines = self.builder.build(
            self.projector.buffer(),
            points.colors(),
            points.tour_starts(),
            &viewport,
            &mut task.bucket,
        );
        task.viewport = viewport;
        task.generation = generation;
        task.line_count = lines;
        Ok(PassStats {
            lines,
            points: points.len(),
            reprojected,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the background thread of one track layer
///
/// Dropping the handle stops the thread, see [`TrackWorker::dispose`].
pub struct TrackWorker<B> {
    shared: Arc<WorkerShared<B>>,
    thread: Option<JoinHandle<()>>,
}

impl<B: GeometrySink + Default> TrackWorker<B> {
    /// Spawn the worker thread
    ///
    /// Fails only if the OS refuses to create the thread.
    pub fn spawn(
        store: Arc<PointStore>,
        viewport: Arc<dyn ViewportProvider>,
        frames: Arc<dyn FrameRequester>,
        config: &LayerConfig,
    ) -> Result<Self> {
        let clock = SystemClock::new();
        let shared = Arc::new(WorkerShared {
            arena: TaskArena::new(),
            gate: CoalescingGate::new(config.min_submit_interval, clock.now()),
            clock,
            mailbox: Mutex::new(Mailbox::default()),
            signal: Condvar::new(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            reprojected: AtomicU64::new(0),
        });
        let context = PassContext {
            store,
            viewport,
            projector: Projector::new(),
            builder: SegmentBuilder::new(
                config.clip_window(),
                config.min_pixel_distance,
                config.direction_arrows,
            ),
        };

        let thread = std::thread::Builder::new()
            .name("track-compile-worker".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(shared, context, frames)
            })?;
        tracing::debug!("Spawned track worker");

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }
}

impl<B> TrackWorker<B> {
    /// Request a pass, replacing any pass still waiting in the mailbox
    ///
    /// Returns the request generation.
    pub fn submit(&self) -> Result<u64> {
        let now = self.shared.clock.now();
        let decision = self.shared.gate.request(now);
        let due = match decision {
            GateDecision::Immediate { .. } => now,
            GateDecision::Delayed { delay, .. } => now + delay,
        };
        let generation = decision.generation();

        let mut mailbox = self.shared.lock_mailbox();
        if mailbox.shutdown {
            return Err(TrackError::Disposed);
        }
        let replaced = mailbox.pending;
        mailbox.pending = Some(match replaced {
            Some(pending) => PendingPass {
                due: pending.due.min(due),
                generation: pending.generation.max(generation),
            },
            None => PendingPass { due, generation },
        });
        drop(mailbox);
        self.shared.signal.notify_one();

        tracing::trace!(
            generation,
            replaced = replaced.is_some(),
            delay_ms = due.saturating_sub(now).as_millis() as u64,
            "Submitted track pass"
        );
        Ok(generation)
    }

    /// Drop the pending request, if any; a pass already running is not interrupted
    pub fn cancel(&self) -> bool {
        self.shared.lock_mailbox().pending.take().is_some()
    }

    /// Generation of the most recent request
    pub fn generation(&self) -> u64 {
        self.shared.gate.generation()
    }

    /// Passes published so far
    pub fn completed_passes(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Passes abandoned because of an error or a panic
    pub fn failed_passes(&self) -> u64 {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Passes that had to reproject the points because they changed
    pub fn reprojected_passes(&self) -> u64 {
        self.shared.reprojected.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub(crate) fn arena(&self) -> &TaskArena<B> {
        &self.shared.arena
    }

    /// Stop the thread and wait for it to exit
    ///
    /// A pass in flight completes but is not published. Calling this twice is harmless.
    pub fn dispose(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        {
            let mut mailbox = self.shared.lock_mailbox();
            mailbox.shutdown = true;
            mailbox.pending = None;
        }
        self.shared.signal.notify_all();
        if thread.join().is_err() {
            tracing::error!("Track worker thread terminated abnormally");
        } else {
            tracing::debug!("Track worker stopped");
        }
    }
}

impl<B> Drop for TrackWorker<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run<B: GeometrySink>(
    shared: Arc<WorkerShared<B>>,
    mut context: PassContext,
    frames: Arc<dyn FrameRequester>,
) {
    let mut cursor = SlotCursor::default();

    while let Some(generation) = shared.wait_for_request() {
        shared.gate.record_action(shared.clock.now());
        let slot = cursor.acquire(&shared.arena);

        let outcome = {
            let mut task = shared.arena.write(slot);
            panic::catch_unwind(AssertUnwindSafe(|| {
                context.run_pass(&mut task, generation)
            }))
        };

        let error = match outcome {
            Ok(Ok(stats)) => {
                if stats.reprojected {
                    shared.reprojected.fetch_add(1, Ordering::AcqRel);
                }
                if shared.is_shutting_down() {
                    break;
                }
                shared.arena.publish(slot);
                cursor.mark_published(slot);
                shared.completed.fetch_add(1, Ordering::AcqRel);
                frames.request_frame();
                tracing::debug!(
                    generation,
                    slot,
                    lines = stats.lines,
                    points = stats.points,
                    reprojected = stats.reprojected,
                    "Published track task"
                );
                continue;
            }
            Ok(Err(err)) => err,
            Err(payload) => {
                // The projection buffer may be half written
                context.store.mark_dirty();
                TrackError::WorkerPanicked(panic_message(payload.as_ref()))
            }
        };
        shared.failed.fetch_add(1, Ordering::AcqRel);
        tracing::error!(generation, %error, "Track pass abandoned, keeping previous task");
    }

    tracing::debug!("Track worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, LineBucket, SharedViewport, ViewportSnapshot};
    use geo::Coord;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn points() -> Vec<GeoPoint> {
        (0..50)
            .map(|i| GeoPoint::from_degrees(0.0, i as f64 * 0.001).unwrap())
            .collect()
    }

    struct Fixture<B> {
        store: Arc<PointStore>,
        viewport: Arc<SharedViewport>,
        frames: Arc<AtomicUsize>,
        worker: TrackWorker<B>,
    }

    fn fixture<B: GeometrySink + Default>() -> Fixture<B> {
        let config = LayerConfig::default();
        let store = Arc::new(PointStore::new(config.default_color));
        let viewport = Arc::new(SharedViewport::new(ViewportSnapshot::from_wgs84(
            0.0, 0.0, 10.0, 256,
        )));
        let frames = Arc::new(AtomicUsize::new(0));
        let worker = {
            let frames = frames.clone();
            TrackWorker::spawn(
                store.clone(),
                viewport.clone(),
                Arc::new(move || {
                    frames.fetch_add(1, Ordering::SeqCst);
                }),
                &config,
            )
            .unwrap()
        };
        Fixture {
            store,
            viewport,
            frames,
            worker,
        }
    }

    #[test]
    fn test_pass_publishes_task_and_requests_frame() {
        let f = fixture::<LineBucket>();
        f.store.set_points(points(), vec![0]).unwrap();
        let generation = f.worker.submit().unwrap();

        assert!(wait_until(|| f.worker.completed_passes() == 1));
        assert_eq!(f.frames.load(Ordering::SeqCst), 1);

        let slot = f.worker.arena().take_ready().unwrap();
        let task = f.worker.arena().read(slot).unwrap();
        assert_eq!(task.generation(), generation);
        assert_eq!(task.line_count(), 1);
        assert_eq!(task.bucket().lines().len(), 1);
        assert_eq!(*task.viewport(), f.viewport.get());
    }

    #[test]
    fn test_clean_points_are_not_reprojected() {
        let f = fixture::<LineBucket>();
        f.store.set_points(points(), vec![0]).unwrap();
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 1));
        assert_eq!(f.worker.reprojected_passes(), 1);

        // Viewport-only change: rebuild segments from the cached projection
        f.viewport
            .update(|viewport| *viewport = viewport.panned_by_pixels(10.0, 0.0));
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 2));
        assert_eq!(f.worker.reprojected_passes(), 1);

        f.store
            .append_point(GeoPoint::from_degrees(0.0, 0.05).unwrap());
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 3));
        assert_eq!(f.worker.reprojected_passes(), 2);
    }

    #[test]
    fn test_worker_releases_points_between_passes() {
        let f = fixture::<LineBucket>();
        f.store.set_points(points(), vec![0]).unwrap();
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 1));

        // Only the store and this snapshot hold the data, so appends need no copy
        let snapshot = f.store.snapshot();
        assert_eq!(Arc::strong_count(&snapshot), 2);
    }

    #[test]
    fn test_burst_of_submits_is_coalesced() {
        let f = fixture::<LineBucket>();
        f.store.set_points(points(), vec![0]).unwrap();
        for _ in 0..10 {
            f.worker.submit().unwrap();
        }
        assert!(wait_until(|| f.worker.completed_passes() >= 1));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(f.worker.completed_passes(), 1);
        assert_eq!(f.worker.generation(), 10);
    }

    #[test]
    fn test_cancel_drops_pending_request() {
        let f = fixture::<LineBucket>();
        // Still inside the first coalescing window, so the request waits
        f.worker.submit().unwrap();
        assert!(f.worker.cancel());
        assert!(!f.worker.cancel());
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(f.worker.completed_passes(), 0);
    }

    #[test]
    fn test_dispose_stops_thread() {
        let mut f = fixture::<LineBucket>();
        assert!(f.worker.is_running());
        f.worker.dispose();
        f.worker.dispose();
        assert!(!f.worker.is_running());
        assert!(matches!(f.worker.submit(), Err(TrackError::Disposed)));
    }

    /// Panics for any viewport zoomed in past level 10
    #[derive(Default)]
    struct FragileSink {
        inner: LineBucket,
    }

    impl GeometrySink for FragileSink {
        fn begin(&mut self, viewport: &ViewportSnapshot) {
            assert!(viewport.zoom_level() <= 10, "zoom too deep");
        }

        fn clear(&mut self) {
            self.inner.clear();
        }

        fn add_line(&mut self, points: &[Coord<f32>], colors: &[u32]) {
            self.inner.add_line(points, colors);
        }

        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }
    }

    #[test]
    fn test_panicking_pass_keeps_previous_task() {
        let f = fixture::<FragileSink>();
        f.store.set_points(points(), vec![0]).unwrap();
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 1));
        let active = f.worker.arena().take_ready().unwrap();
        let good_viewport = f.viewport.get();

        f.viewport
            .set(ViewportSnapshot::from_wgs84(0.0, 0.0, 14.0, 256));
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.failed_passes() == 1));

        assert_eq!(f.worker.arena().take_ready(), None);
        let task = f.worker.arena().read(active).unwrap();
        assert_eq!(*task.viewport(), good_viewport);
        assert_eq!(task.line_count(), 1);
        drop(task);

        // The thread survived and the next legitimate request goes through
        f.viewport.set(good_viewport);
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.completed_passes() == 2));
        assert!(f.worker.arena().take_ready().is_some());
    }

    #[test]
    fn test_invalid_viewport_fails_pass() {
        let f = fixture::<LineBucket>();
        f.viewport
            .set(ViewportSnapshot::new(f64::NAN, 0.5, 1.0, 256));
        f.worker.submit().unwrap();
        assert!(wait_until(|| f.worker.failed_passes() == 1));
        assert_eq!(f.worker.completed_passes(), 0);
        assert_eq!(f.worker.arena().take_ready(), None);
    }
}
