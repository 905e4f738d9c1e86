//! Timer service and deferred binding.
//!
//! Each node (client or server) owns a [`TimerQueue`] and advances it from
//! its fixed-timestep loop. Scheduled callbacks therefore run on the node's
//! single simulation thread, never concurrently with it. The queue is the
//! injected scheduler collaborator: nothing in this crate reaches for an
//! ambient timer singleton.

use std::time::Duration;

/// One-shot callback scheduled on a [`TimerQueue`].
///
/// A callback receives the queue so it can schedule follow-up work (retry
/// chains reschedule themselves through this).
pub type TimerFn = Box<dyn FnOnce(&mut TimerQueue) + Send>;

struct TimerEntry {
    deadline: Duration,
    cb: TimerFn,
}

/// Deterministic one-shot scheduler driven by the owning loop's timestep.
#[derive(Default)]
pub struct TimerQueue {
    now: Duration,
    pending: Vec<TimerEntry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `cb` to run once `delay` has elapsed.
    pub fn schedule(&mut self, delay: Duration, cb: TimerFn) {
        self.pending.push(TimerEntry {
            deadline: self.now + delay,
            cb,
        });
    }

    /// Advances the clock by `dt` and runs callbacks that came due.
    ///
    /// Single pass: callbacks scheduled while running (retry chains) wait
    /// for a later `advance`, so a rescheduled retry fires at most once per
    /// interval.
    pub fn advance(&mut self, dt: Duration) {
        self.now += dt;
        let now = self.now;

        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].deadline <= now {
                due.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }

        for entry in due {
            (entry.cb)(self);
        }
    }

    /// Number of callbacks still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Runs `attempt` now and then once per `interval` until it returns `true`.
///
/// This is the deferred-binding policy: no retry cap, no backoff. A target
/// that never materializes keeps one retry pending forever; destruction of
/// the owning queue is the only cancellation.
pub fn retry_until<F>(timers: &mut TimerQueue, interval: Duration, mut attempt: F)
where
    F: FnMut() -> bool + Send + 'static,
{
    if attempt() {
        return;
    }
    timers.schedule(
        interval,
        Box::new(move |t| retry_until(t, interval, attempt)),
    );
}

/// Clonable late-bound reference to an externally owned collaborator.
///
/// Starts empty; the owning node fills it in once the collaborator exists
/// (controller possession, replicated session state). Clones share the slot.
pub struct LateRef<T>(std::sync::Arc<std::sync::Mutex<Option<T>>>);

impl<T> Clone for LateRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for LateRef<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> LateRef<T> {
    pub fn empty() -> Self {
        Self(std::sync::Arc::new(std::sync::Mutex::new(None)))
    }

    pub fn set(&self, value: T) {
        *self.0.lock().expect("late ref poisoned") = Some(value);
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().expect("late ref poisoned").is_some()
    }
}

impl<T: Clone> LateRef<T> {
    /// Returns the bound value, if the target exists yet.
    pub fn get(&self) -> Option<T> {
        self.0.lock().expect("late ref poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn binds_once_when_target_appears_after_n_intervals() {
        let target: LateRef<u32> = LateRef::empty();
        let binds = Arc::new(AtomicU32::new(0));
        let checks = Arc::new(AtomicU32::new(0));

        let mut timers = TimerQueue::new();
        {
            let target = target.clone();
            let binds = binds.clone();
            let checks = checks.clone();
            retry_until(&mut timers, INTERVAL, move || {
                checks.fetch_add(1, Ordering::SeqCst);
                match target.get() {
                    Some(_) => {
                        binds.fetch_add(1, Ordering::SeqCst);
                        true
                    }
                    None => false,
                }
            });
        }

        // Target appears after exactly 3 retry intervals.
        for i in 0..3 {
            assert_eq!(binds.load(Ordering::SeqCst), 0);
            if i == 2 {
                target.set(7);
            }
            timers.advance(INTERVAL);
        }

        assert_eq!(binds.load(Ordering::SeqCst), 1);
        // Initial check plus three scheduled retries.
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert!(timers.is_empty(), "no further retries scheduled");
    }

    #[test]
    fn immediate_target_binds_without_scheduling() {
        let target: LateRef<u32> = LateRef::empty();
        target.set(1);
        let binds = Arc::new(AtomicU32::new(0));

        let mut timers = TimerQueue::new();
        {
            let target = target.clone();
            let binds = binds.clone();
            retry_until(&mut timers, INTERVAL, move || {
                if target.get().is_some() {
                    binds.fetch_add(1, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            });
        }

        assert_eq!(binds.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn missing_target_keeps_exactly_one_retry_pending() {
        let target: LateRef<u32> = LateRef::empty();
        let mut timers = TimerQueue::new();
        {
            let target = target.clone();
            retry_until(&mut timers, INTERVAL, move || target.get().is_some());
        }

        for _ in 0..5 {
            timers.advance(INTERVAL);
            assert_eq!(timers.len(), 1);
        }
    }

    #[test]
    fn advance_runs_callbacks_in_schedule_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut timers = TimerQueue::new();
        for n in 0..3u32 {
            let order = order.clone();
            timers.schedule(
                INTERVAL,
                Box::new(move |_| order.lock().unwrap().push(n)),
            );
        }
        timers.advance(INTERVAL);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn not_yet_due_callbacks_stay_queued() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerQueue::new();
        {
            let fired = fired.clone();
            timers.schedule(
                Duration::from_millis(100),
                Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        timers.advance(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timers.advance(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
