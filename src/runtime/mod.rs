//! Timer and task seam shared by the list controller, the throttle gate and
//! the retrying transport.
//!
//! Everything runs on one cooperative thread: in the browser through
//! `spawn_local` + `setTimeout`, natively through a tokio `LocalSet`.

use futures::future::{AbortHandle, Abortable, LocalBoxFuture};
use std::future::Future;
use std::rc::Rc;

pub(crate) trait Scheduler {
    /// Monotonic milliseconds; only differences are meaningful.
    fn now_ms(&self) -> i64;

    /// Resolves after `ms`. Dropping the future cancels the underlying timer.
    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()>;

    fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>);
}

pub(crate) type SharedScheduler = Rc<dyn Scheduler>;

/// Cancellation handle for a task started with [`spawn_cancellable`].
///
/// Dropping the handle leaves the task running.
#[derive(Debug, Clone)]
pub(crate) struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.abort.is_aborted()
    }
}

pub(crate) fn spawn_cancellable(
    scheduler: &dyn Scheduler,
    fut: impl Future<Output = ()> + 'static,
) -> TaskHandle {
    let (abort, registration) = AbortHandle::new_pair();
    scheduler.spawn_local(Box::pin(async move {
        let _ = Abortable::new(fut, registration).await;
    }));
    TaskHandle { abort }
}

#[cfg(target_arch = "wasm32")]
pub(crate) use browser::BrowserScheduler;

#[cfg(not(target_arch = "wasm32"))]
pub(crate) use native::TokioScheduler;

/// Default scheduler for the current target.
pub(crate) fn default_scheduler() -> SharedScheduler {
    #[cfg(target_arch = "wasm32")]
    {
        Rc::new(BrowserScheduler)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Rc::new(TokioScheduler::new())
    }
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::Scheduler;
    use futures::channel::oneshot;
    use futures::future::LocalBoxFuture;
    use wasm_bindgen::JsCast;

    pub(crate) struct BrowserScheduler;

    /// Clears the browser timeout when the owning sleep future is dropped.
    struct TimeoutGuard {
        id: Option<i32>,
    }

    impl Drop for TimeoutGuard {
        fn drop(&mut self) {
            if let (Some(id), Some(win)) = (self.id, web_sys::window()) {
                win.clear_timeout_with_handle(id);
            }
        }
    }

    impl Scheduler for BrowserScheduler {
        fn now_ms(&self) -> i64 {
            crate::util::now_ms()
        }

        fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
            let (tx, rx) = oneshot::channel::<()>();
            let cb = wasm_bindgen::closure::Closure::once_into_js(move || {
                let _ = tx.send(());
            });

            let timeout = i32::try_from(ms).unwrap_or(i32::MAX);
            let id = web_sys::window().and_then(|win| {
                win.set_timeout_with_callback_and_timeout_and_arguments_0(
                    cb.as_ref().unchecked_ref(),
                    timeout,
                )
                .ok()
            });

            let guard = TimeoutGuard { id };
            Box::pin(async move {
                let _guard = guard;
                let _ = rx.await;
            })
        }

        fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>) {
            leptos::task::spawn_local(fut);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::Scheduler;
    use futures::future::LocalBoxFuture;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Requires a current-thread runtime with an active `LocalSet`.
    pub(crate) struct TokioScheduler {
        origin: Instant,
    }

    impl TokioScheduler {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
            }
        }
    }

    impl Scheduler for TokioScheduler {
        fn now_ms(&self) -> i64 {
            i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
        }

        fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
            Box::pin(tokio::time::sleep(Duration::from_millis(ms)))
        }

        fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>) {
            tokio::task::spawn_local(fut);
        }
    }
}
