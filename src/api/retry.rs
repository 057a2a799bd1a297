//! Classify-and-retry wrapper around [`HttpBackend`].
//!
//! Transient failures (no response, 429, 503) are retried up to
//! `max_retries` times per logical request. Everything else is returned on
//! the first attempt. When the budget runs out a [`RetryExhausted`] event is
//! published before the error is returned.

use super::{redact_sensitive, ApiError, ApiErrorKind, ApiRequest, ApiResult, HttpBackend, RawResponse};
use crate::runtime::SharedScheduler;
use crate::storage::SessionStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limit_delay_ms: u64,
    pub unavailable_delay_ms: u64,
    /// Doubled on every network retry.
    pub network_base_delay_ms: u64,
    /// Upper bound for every computed delay, `Retry-After` included.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            rate_limit_delay_ms: 2000,
            unavailable_delay_ms: 1000,
            network_base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_index` (zero-based), or `None` when
    /// the failure is not retryable.
    pub fn delay_for(&self, err: &ApiError, retry_index: u32) -> Option<u64> {
        let delay = match err.kind {
            ApiErrorKind::Network => self
                .network_base_delay_ms
                .saturating_mul(1u64 << retry_index.min(16)),
            ApiErrorKind::RateLimited => err.retry_after_ms.unwrap_or(self.rate_limit_delay_ms),
            ApiErrorKind::Unavailable => self.unavailable_delay_ms,
            _ => return None,
        };
        Some(delay.min(self.max_delay_ms))
    }
}

/// `Retry-After` in delta-seconds, converted to milliseconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|s| s.saturating_mul(1000))
}

/// Published when a request gives up after spending its retry budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RetryExhausted {
    pub path: String,
    pub attempts: u32,
    pub last_kind: ApiErrorKind,
}

type Subscriber = Rc<dyn Fn(&RetryExhausted)>;

#[derive(Clone, Default)]
pub(crate) struct RetryNotifier {
    subscribers: Rc<RefCell<Vec<(u64, Subscriber)>>>,
    next_id: Rc<Cell<u64>>,
}

impl RetryNotifier {
    pub fn subscribe(&self, f: impl Fn(&RetryExhausted) + 'static) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.subscribers.borrow_mut().push((id, Rc::new(f)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.borrow_mut().retain(|(i, _)| *i != id);
    }

    pub fn publish(&self, event: &RetryExhausted) {
        let subs: Vec<Subscriber> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, s)| Rc::clone(s))
            .collect();
        for s in subs {
            s(event);
        }
    }
}

/// Per logical request; dropped when the request settles.
#[derive(Debug, Default)]
struct FetchAttempt {
    attempt_count: u32,
    last_attempt_ms: i64,
    error_kind: Option<ApiErrorKind>,
}

pub(crate) struct ResilientTransport {
    backend: Rc<dyn HttpBackend>,
    session: Rc<dyn SessionStore>,
    scheduler: SharedScheduler,
    policy: RetryPolicy,
    notifier: RetryNotifier,
}

impl ResilientTransport {
    pub fn new(
        backend: Rc<dyn HttpBackend>,
        session: Rc<dyn SessionStore>,
        scheduler: SharedScheduler,
        policy: RetryPolicy,
        notifier: RetryNotifier,
    ) -> Self {
        Self {
            backend,
            session,
            scheduler,
            policy,
            notifier,
        }
    }

    pub fn notifier(&self) -> &RetryNotifier {
        &self.notifier
    }

    /// Sends `req` until it succeeds, fails terminally or runs out of retries.
    pub async fn execute(&self, req: &ApiRequest) -> ApiResult<RawResponse> {
        let mut attempt = FetchAttempt::default();

        loop {
            attempt.attempt_count += 1;
            attempt.last_attempt_ms = self.scheduler.now_ms();

            let bearer = self.session.bearer_token();
            let err = match self.backend.send(req, bearer).await {
                Ok(raw) if raw.is_success() => return Ok(raw),
                Ok(raw) => ApiError::from_status(&raw, "Request failed"),
                Err(e) => e,
            };
            attempt.error_kind = Some(err.kind);

            let retries_used = attempt.attempt_count - 1;
            let Some(delay_ms) = self.policy.delay_for(&err, retries_used) else {
                self.log_failure(req, &err, &attempt);
                return Err(err);
            };

            if retries_used >= self.policy.max_retries {
                self.log_failure(req, &err, &attempt);
                self.notifier.publish(&RetryExhausted {
                    path: req.path.clone(),
                    attempts: attempt.attempt_count,
                    last_kind: err.kind,
                });
                return Err(ApiError::retries_exhausted(attempt.attempt_count, &err));
            }

            tracing::warn!(
                event = "api.retry_scheduled",
                method = %req.method,
                path = %req.path,
                attempt = attempt.attempt_count,
                kind = ?err.kind,
                delay_ms
            );
            self.scheduler.sleep(delay_ms).await;
        }
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, req: &ApiRequest) -> ApiResult<T> {
        let raw = self.execute(req).await?;
        serde_json::from_str(&raw.body).map_err(ApiError::parse)
    }

    /// For endpoints whose response body is irrelevant.
    pub async fn send(&self, req: &ApiRequest) -> ApiResult<()> {
        self.execute(req).await.map(|_| ())
    }

    fn log_failure(&self, req: &ApiRequest, err: &ApiError, attempt: &FetchAttempt) {
        let body = req.body.as_ref().map(redact_sensitive);
        tracing::error!(
            event = "api.request_failed",
            method = %req.method,
            path = %req.path,
            attempts = attempt.attempt_count,
            last_attempt_ms = attempt.last_attempt_ms,
            kind = ?attempt.error_kind,
            status = ?err.status,
            body = ?body,
            error = %err
        );
    }
}
