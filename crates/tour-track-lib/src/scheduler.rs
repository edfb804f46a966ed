//! Coalescing request scheduling
//!
//! Bursts of requests collapse into the latest one: at most one action runs per threshold
//! window, and the last request before the window closes always wins. Every request bumps a
//! generation counter; a delayed action remembers the generation it was scheduled with and
//! silently does nothing if a newer request has arrived since.
//!
//! [`CoalescingGate`] holds the lock-free core (generation + last action timestamp) and is
//! reused by the worker mailbox; [`CoalescedRequestScheduler`] adds payloads and timers on top.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source, measured from an arbitrary epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Real monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// Runs a callback once after a delay
pub trait DelayedExecutor: Send + Sync {
    fn execute_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Timer backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: tokio::runtime::Handle,
}

impl TokioTimer {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Timer on the runtime of the calling context, if there is one
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl DelayedExecutor for TokioTimer {
    fn execute_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

type TimerTask = Box<dyn FnOnce() + Send>;

/// Deterministic timer driven together with a [`ManualClock`]
pub struct ManualTimer {
    clock: Arc<ManualClock>,
    /// (due time, insertion order, task)
    queue: Mutex<Vec<(Duration, u64, TimerTask)>>,
    sequence: AtomicU64,
}

impl ManualTimer {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Number of armed, not yet fired callbacks
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Move the clock forward, firing due callbacks in order at their due time
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                let earliest = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _, _))| *due <= target)
                    .min_by_key(|(_, (due, seq, _))| (*due, *seq))
                    .map(|(i, _)| i);
                earliest.map(|i| queue.swap_remove(i))
            };
            let Some((due, _, task)) = next else {
                break;
            };
            if due > self.clock.now() {
                self.clock.set(due);
            }
            task();
        }
        self.clock.set(target);
    }
}

impl DelayedExecutor for ManualTimer {
    fn execute_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let due = self.clock.now() + delay;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((due, seq, task));
    }
}

/// What a request should do, decided by [`CoalescingGate::request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The threshold has passed since the last action: act now
    Immediate { generation: u64 },
    /// Act after `delay`, but only if `generation` is still current by then
    Delayed { delay: Duration, generation: u64 },
}

impl GateDecision {
    pub fn generation(&self) -> u64 {
        match *self {
            GateDecision::Immediate { generation } | GateDecision::Delayed { generation, .. } => {
                generation
            }
        }
    }
}

/// Generation counter plus last-action timestamp, both atomic
#[derive(Debug)]
pub struct CoalescingGate {
    threshold: Duration,
    generation: AtomicU64,
    last_action_nanos: AtomicU64,
}

impl CoalescingGate {
    /// `now` counts as the last action, so an initial burst is coalesced too
    pub fn new(threshold: Duration, now: Duration) -> Self {
        Self {
            threshold,
            generation: AtomicU64::new(0),
            last_action_nanos: AtomicU64::new(now.as_nanos() as u64),
        }
    }

    #[inline]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register a new request, superseding every earlier one
    pub fn request(&self, now: Duration) -> GateDecision {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let last_action = Duration::from_nanos(self.last_action_nanos.load(Ordering::Acquire));
        let elapsed = now.saturating_sub(last_action);
        if elapsed > self.threshold {
            GateDecision::Immediate { generation }
        } else {
            GateDecision::Delayed {
                delay: self.threshold - elapsed,
                generation,
            }
        }
    }

    /// Whether no request arrived after the one that got `generation`
    #[inline]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn record_action(&self, now: Duration) {
        self.last_action_nanos
            .store(now.as_nanos() as u64, Ordering::Release);
    }

    pub fn last_action(&self) -> Duration {
        Duration::from_nanos(self.last_action_nanos.load(Ordering::Acquire))
    }
}

/// Observable state of a [`CoalescedRequestScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    PendingImmediate = 1,
    PendingDelayed = 2,
}

impl SchedulerState {
    const BITS: u32 = 2;

    /// Tag the state with the request generation that entered it
    fn pack(self, generation: u64) -> u64 {
        (generation << Self::BITS) | self as u64
    }

    fn unpack(packed: u64) -> (u64, Self) {
        let state = match packed & ((1 << Self::BITS) - 1) {
            1 => SchedulerState::PendingImmediate,
            2 => SchedulerState::PendingDelayed,
            _ => SchedulerState::Idle,
        };
        (packed >> Self::BITS, state)
    }
}

type Action<P> = Box<dyn Fn(P) + Send + Sync>;

struct SchedulerInner<P> {
    gate: CoalescingGate,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn DelayedExecutor>,
    action: Action<P>,
    /// [`SchedulerState`] packed with the generation of the request that set it
    state: AtomicU64,
}

impl<P> SchedulerInner<P> {
    fn perform(&self, payload: P) {
        self.gate.record_action(self.clock.now());
        (self.action)(payload);
    }

    /// Enter `state` for `generation` unless a newer request already moved the state on
    fn enter(&self, generation: u64, state: SchedulerState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let (owner, _) = SchedulerState::unpack(current);
                (owner <= generation).then(|| state.pack(generation))
            });
    }

    /// Back to idle, but only if nothing newer was requested meanwhile, including from
    /// inside the action itself
    fn leave(&self, generation: u64, from: SchedulerState) {
        let _ = self.state.compare_exchange(
            from.pack(generation),
            SchedulerState::Idle.pack(generation),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn fire(&self, generation: u64, payload: P) {
        if !self.gate.is_current(generation) {
            tracing::trace!(
                generation,
                current = self.gate.generation(),
                "Dropping superseded request"
            );
            return;
        }
        self.perform(payload);
        self.leave(generation, SchedulerState::PendingDelayed);
    }
}

/// Debounces requests carrying a payload of type `P`
///
/// Cheap to clone; clones share the same generation counter.
pub struct CoalescedRequestScheduler<P> {
    inner: Arc<SchedulerInner<P>>,
}

impl<P> Clone for CoalescedRequestScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Send + 'static> CoalescedRequestScheduler<P> {
    pub fn new<F>(
        threshold: Duration,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn DelayedExecutor>,
        action: F,
    ) -> Self
    where
        F: Fn(P) + Send + Sync + 'static,
    {
        let gate = CoalescingGate::new(threshold, clock.now());
        Self {
            inner: Arc::new(SchedulerInner {
                gate,
                clock,
                executor,
                action: Box::new(action),
                state: AtomicU64::new(SchedulerState::Idle.pack(0)),
            }),
        }
    }

    /// Request the action with `payload`; may run it right away on the calling thread
    pub fn request(&self, payload: P) {
        let now = self.inner.clock.now();
        match self.inner.gate.request(now) {
            GateDecision::Immediate { generation } => {
                self.inner
                    .enter(generation, SchedulerState::PendingImmediate);
                self.inner.perform(payload);
                self.inner
                    .leave(generation, SchedulerState::PendingImmediate);
            }
            GateDecision::Delayed { delay, generation } => {
                self.inner.enter(generation, SchedulerState::PendingDelayed);
                let inner = Arc::clone(&self.inner);
                self.inner.executor.execute_after(
                    delay,
                    Box::new(move || inner.fire(generation, payload)),
                );
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::unpack(self.inner.state.load(Ordering::Acquire)).1
    }

    pub fn generation(&self) -> u64 {
        self.inner.gate.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    const THRESHOLD: Duration = Duration::from_millis(500);

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    struct Harness {
        clock: Arc<ManualClock>,
        timer: Arc<ManualTimer>,
        fired: Arc<Mutex<Vec<(Duration, u32)>>>,
        scheduler: CoalescedRequestScheduler<u32>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let timer = Arc::new(ManualTimer::new(clock.clone()));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let scheduler = {
            let fired = fired.clone();
            let clock = clock.clone();
            CoalescedRequestScheduler::new(THRESHOLD, clock.clone(), timer.clone(), move |p| {
                fired.lock().unwrap().push((clock.now(), p));
            })
        };
        Harness {
            clock,
            timer,
            fired,
            scheduler,
        }
    }

    #[test]
    fn test_burst_collapses_into_last_request() {
        let h = harness();
        for (t, payload) in [(0, 1), (10, 2), (20, 3), (30, 4)] {
            h.clock.set(ms(t));
            h.scheduler.request(payload);
        }
        assert_eq!(h.scheduler.state(), SchedulerState::PendingDelayed);
        assert_eq!(h.timer.pending(), 4);

        h.timer.advance(ms(1000));

        let fired = h.fired.lock().unwrap();
        assert_eq!(fired.as_slice(), &[(ms(500), 4)]);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert_eq!(h.timer.pending(), 0);
    }

    #[test]
    fn test_request_after_threshold_runs_immediately() {
        let h = harness();
        h.clock.set(ms(600));
        h.scheduler.request(7);
        assert_eq!(h.fired.lock().unwrap().as_slice(), &[(ms(600), 7)]);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert_eq!(h.timer.pending(), 0);
    }

    #[test]
    fn test_at_most_one_action_per_window() {
        let h = harness();
        h.clock.set(ms(600));
        h.scheduler.request(1);

        // Within the window of the immediate action
        h.timer.advance(ms(100));
        h.scheduler.request(2);
        h.timer.advance(ms(100));
        h.scheduler.request(3);
        h.timer.advance(ms(1000));

        let fired = h.fired.lock().unwrap();
        assert_eq!(fired.as_slice(), &[(ms(600), 1), (ms(1100), 3)]);
    }

    #[test]
    fn test_generation_counts_every_request() {
        let h = harness();
        assert_eq!(h.scheduler.generation(), 0);
        h.scheduler.request(1);
        h.scheduler.request(2);
        assert_eq!(h.scheduler.generation(), 2);
    }

    #[test]
    fn test_request_from_inside_action_stays_pending() {
        let clock = Arc::new(ManualClock::new());
        let timer = Arc::new(ManualTimer::new(clock.clone()));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<OnceLock<CoalescedRequestScheduler<u32>>> = Arc::new(OnceLock::new());
        let scheduler = {
            let fired = fired.clone();
            let clock = clock.clone();
            let slot = slot.clone();
            CoalescedRequestScheduler::new(THRESHOLD, clock.clone(), timer.clone(), move |p| {
                fired.lock().unwrap().push((clock.now(), p));
                if p == 1 {
                    slot.get().unwrap().request(2);
                }
            })
        };
        assert!(slot.set(scheduler.clone()).is_ok());

        clock.set(ms(10));
        scheduler.request(1);
        timer.advance(ms(600));

        // The follow-up armed a timer of its own
        assert_eq!(fired.lock().unwrap().as_slice(), &[(ms(500), 1)]);
        assert_eq!(scheduler.state(), SchedulerState::PendingDelayed);
        assert_eq!(timer.pending(), 1);

        timer.advance(ms(1000));
        assert_eq!(
            fired.lock().unwrap().as_slice(),
            &[(ms(500), 1), (ms(1000), 2)]
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_immediate_action_requesting_again_stays_pending() {
        let clock = Arc::new(ManualClock::new());
        let timer = Arc::new(ManualTimer::new(clock.clone()));
        let slot: Arc<OnceLock<CoalescedRequestScheduler<u32>>> = Arc::new(OnceLock::new());
        let scheduler = {
            let slot = slot.clone();
            CoalescedRequestScheduler::new(THRESHOLD, clock.clone(), timer.clone(), move |p| {
                if p == 1 {
                    slot.get().unwrap().request(2);
                }
            })
        };
        assert!(slot.set(scheduler.clone()).is_ok());

        clock.set(ms(600));
        scheduler.request(1);
        assert_eq!(scheduler.state(), SchedulerState::PendingDelayed);

        timer.advance(ms(1000));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_gate_decisions() {
        let gate = CoalescingGate::new(ms(50), ms(0));
        assert_eq!(
            gate.request(ms(20)),
            GateDecision::Delayed {
                delay: ms(30),
                generation: 1
            }
        );
        assert!(gate.is_current(1));
        assert_eq!(gate.request(ms(51)), GateDecision::Immediate { generation: 2 });
        assert!(!gate.is_current(1));

        gate.record_action(ms(51));
        assert_eq!(gate.last_action(), ms(51));
        assert_eq!(gate.request(ms(51)).generation(), 3);
    }

    #[test]
    fn test_tokio_timer_fires_last_request() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let timer = Arc::new(TokioTimer::new(runtime.handle().clone()));
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        let scheduler = CoalescedRequestScheduler::new(
            ms(30),
            Arc::new(SystemClock::new()),
            timer,
            move |p: u32| {
                let _ = tx.lock().unwrap().send(p);
            },
        );

        scheduler.request(1);
        scheduler.request(2);
        scheduler.request(3);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(3));
        assert!(rx.recv_timeout(ms(100)).is_err());
    }
}
