use crate::runtime::{spawn_cancellable, SharedScheduler, TaskHandle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Coalesces rapid pushes into one settle after a quiet window.
///
/// Every push restarts the timer; only the value of the last push within the
/// window reaches `on_settle`.
pub(crate) struct Debouncer<T: 'static> {
    delay_ms: u64,
    scheduler: SharedScheduler,
    pending: Rc<RefCell<Option<T>>>,
    timer: RefCell<Option<TaskHandle>>,
}

impl<T: 'static> Debouncer<T> {
    pub fn new(delay_ms: u64, scheduler: SharedScheduler) -> Self {
        Self {
            delay_ms,
            scheduler,
            pending: Rc::new(RefCell::new(None)),
            timer: RefCell::new(None),
        }
    }

    pub fn push(&self, value: T, on_settle: impl FnOnce(T) + 'static) {
        self.cancel_timer();
        *self.pending.borrow_mut() = Some(value);

        let pending = Rc::clone(&self.pending);
        let sleep = self.scheduler.sleep(self.delay_ms);
        let handle = spawn_cancellable(&*self.scheduler, async move {
            sleep.await;
            let value = pending.borrow_mut().take();
            if let Some(value) = value {
                on_settle(value);
            }
        });
        *self.timer.borrow_mut() = Some(handle);
    }

    /// Drops the pending value and its timer without settling.
    pub fn cancel(&self) {
        self.cancel_timer();
        self.pending.borrow_mut().take();
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.borrow_mut().take() {
            handle.cancel();
        }
    }
}

impl<T: Clone + 'static> Debouncer<T> {
    pub fn pending(&self) -> Option<T> {
        self.pending.borrow().clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GateDecision {
    /// Ran synchronously.
    Proceed,
    /// Scheduled to run after `wait_ms`.
    Deferred { wait_ms: u64 },
    /// Folded into an already scheduled run.
    Coalesced,
    /// Attempt budget spent; nothing was scheduled.
    LimitExceeded,
}

type DeferredAction = Box<dyn FnOnce()>;

/// Minimum-interval gate with an attempt budget.
///
/// The budget only refills through [`ThrottleGate::reset`].
pub(crate) struct ThrottleGate {
    min_interval_ms: u64,
    max_attempts: u32,
    scheduler: SharedScheduler,
    attempts: Cell<u32>,
    last_proceed_ms: Rc<Cell<Option<i64>>>,
    deferred: Rc<RefCell<Option<DeferredAction>>>,
    timer: RefCell<Option<TaskHandle>>,
}

impl ThrottleGate {
    pub fn new(min_interval_ms: u64, max_attempts: u32, scheduler: SharedScheduler) -> Self {
        Self {
            min_interval_ms,
            max_attempts,
            scheduler,
            attempts: Cell::new(0),
            last_proceed_ms: Rc::new(Cell::new(None)),
            deferred: Rc::new(RefCell::new(None)),
            timer: RefCell::new(None),
        }
    }

    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    pub fn request(&self, action: impl FnOnce() + 'static) -> GateDecision {
        if self.attempts.get() >= self.max_attempts {
            tracing::warn!(
                event = "timing.throttle_limit_exceeded",
                attempts = self.attempts.get(),
                max_attempts = self.max_attempts
            );
            return GateDecision::LimitExceeded;
        }
        self.attempts.set(self.attempts.get() + 1);

        if self.deferred.borrow().is_some() {
            *self.deferred.borrow_mut() = Some(Box::new(action));
            return GateDecision::Coalesced;
        }

        let now = self.scheduler.now_ms();
        let wait_ms = match self.last_proceed_ms.get() {
            None => 0,
            Some(last) => {
                let elapsed = u64::try_from(now - last).unwrap_or(0);
                self.min_interval_ms.saturating_sub(elapsed)
            }
        };

        if wait_ms == 0 {
            self.last_proceed_ms.set(Some(now));
            action();
            return GateDecision::Proceed;
        }

        *self.deferred.borrow_mut() = Some(Box::new(action));

        let deferred = Rc::clone(&self.deferred);
        let last = Rc::clone(&self.last_proceed_ms);
        let scheduler = Rc::clone(&self.scheduler);
        let sleep = self.scheduler.sleep(wait_ms);
        let handle = spawn_cancellable(&*self.scheduler, async move {
            sleep.await;
            let action = deferred.borrow_mut().take();
            if let Some(action) = action {
                last.set(Some(scheduler.now_ms()));
                action();
            }
        });
        *self.timer.borrow_mut() = Some(handle);

        tracing::debug!(event = "timing.throttle_deferred", wait_ms);
        GateDecision::Deferred { wait_ms }
    }

    /// Cancels any deferred run. The attempt counter is kept.
    pub fn cancel(&self) {
        if let Some(handle) = self.timer.borrow_mut().take() {
            handle.cancel();
        }
        self.deferred.borrow_mut().take();
    }

    pub fn reset(&self) {
        self.cancel();
        self.attempts.set(0);
        self.last_proceed_ms.set(None);
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::runtime::default_scheduler;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_debounce_fires_once_with_last_value() {
        LocalSet::new()
            .run_until(async {
                let d = Debouncer::new(300, default_scheduler());
                let seen: Rc<RefCell<Vec<String>>> = Rc::default();

                for text in ["W", "Wa", "War", "Wars", "Warszawa"] {
                    let seen = Rc::clone(&seen);
                    d.push(text.to_string(), move |v| seen.borrow_mut().push(v));
                    sleep(Duration::from_millis(50)).await;
                }
                assert!(d.is_pending());
                assert_eq!(d.pending().as_deref(), Some("Warszawa"));

                sleep(Duration::from_millis(400)).await;
                assert_eq!(*seen.borrow(), vec!["Warszawa".to_string()]);
                assert!(!d.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_cancel_suppresses_settle() {
        LocalSet::new()
            .run_until(async {
                let d = Debouncer::new(100, default_scheduler());
                let fired = Rc::new(Cell::new(0));
                let f2 = Rc::clone(&fired);
                d.push(1, move |_| f2.set(f2.get() + 1));
                d.cancel();

                sleep(Duration::from_millis(500)).await;
                assert_eq!(fired.get(), 0);
                assert!(!d.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_separate_windows_fire_separately() {
        LocalSet::new()
            .run_until(async {
                let d = Debouncer::new(100, default_scheduler());
                let seen: Rc<RefCell<Vec<i32>>> = Rc::default();
                for v in [1, 2] {
                    let seen = Rc::clone(&seen);
                    d.push(v, move |x| seen.borrow_mut().push(x));
                    sleep(Duration::from_millis(150)).await;
                }
                assert_eq!(*seen.borrow(), vec![1, 2]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_proceeds_then_defers_and_coalesces() {
        LocalSet::new()
            .run_until(async {
                let gate = ThrottleGate::new(1000, 10, default_scheduler());
                let runs: Rc<RefCell<Vec<&'static str>>> = Rc::default();

                let r = Rc::clone(&runs);
                assert_eq!(gate.request(move || r.borrow_mut().push("a")), GateDecision::Proceed);

                sleep(Duration::from_millis(200)).await;
                let r = Rc::clone(&runs);
                assert_eq!(
                    gate.request(move || r.borrow_mut().push("b")),
                    GateDecision::Deferred { wait_ms: 800 }
                );
                let r = Rc::clone(&runs);
                assert_eq!(gate.request(move || r.borrow_mut().push("c")), GateDecision::Coalesced);

                sleep(Duration::from_millis(790)).await;
                assert_eq!(*runs.borrow(), vec!["a"]);
                sleep(Duration::from_millis(20)).await;
                assert_eq!(*runs.borrow(), vec!["a", "c"]);
                assert_eq!(gate.attempts(), 3);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_rejects_after_max_attempts() {
        LocalSet::new()
            .run_until(async {
                let gate = ThrottleGate::new(0, 3, default_scheduler());
                let runs = Rc::new(Cell::new(0));
                for _ in 0..3 {
                    let r = Rc::clone(&runs);
                    assert_eq!(gate.request(move || r.set(r.get() + 1)), GateDecision::Proceed);
                }
                let r = Rc::clone(&runs);
                assert_eq!(
                    gate.request(move || r.set(r.get() + 1)),
                    GateDecision::LimitExceeded
                );
                assert_eq!(runs.get(), 3);

                gate.reset();
                let r = Rc::clone(&runs);
                assert_eq!(gate.request(move || r.set(r.get() + 1)), GateDecision::Proceed);
                assert_eq!(runs.get(), 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_cancel_drops_deferred_run() {
        LocalSet::new()
            .run_until(async {
                let gate = ThrottleGate::new(500, 10, default_scheduler());
                let runs = Rc::new(Cell::new(0));
                let r = Rc::clone(&runs);
                gate.request(move || r.set(r.get() + 1));
                let r = Rc::clone(&runs);
                assert!(matches!(
                    gate.request(move || r.set(r.get() + 1)),
                    GateDecision::Deferred { .. }
                ));
                gate.cancel();

                sleep(Duration::from_secs(2)).await;
                assert_eq!(runs.get(), 1);
            })
            .await;
    }
}
