use crate::api::retry::{ResilientTransport, RetryExhausted, RetryNotifier};
use crate::api::{ApiErrorKind, ReqwestBackend};
use crate::config::EnvConfig;
use crate::list::{ListDeps, BUSY_MESSAGE, CONNECTIVITY_MESSAGE};
use crate::runtime::{default_scheduler, SharedScheduler};
use crate::storage::LocalStorageSession;
use leptos::prelude::*;
use std::rc::Rc;

const TOAST_TTL_MS: u64 = 5000;
const MAX_TOASTS: usize = 3;

/// Long-lived, browser-bound services shared by every page.
pub(crate) struct Services {
    pub config: EnvConfig,
    pub transport: Rc<ResilientTransport>,
    pub scheduler: SharedScheduler,
}

impl Services {
    pub fn from_config(config: EnvConfig) -> Self {
        let scheduler = default_scheduler();
        let backend = ReqwestBackend::new(config.api_url.clone(), config.request_timeout_ms);
        let transport = ResilientTransport::new(
            Rc::new(backend),
            Rc::new(LocalStorageSession),
            Rc::clone(&scheduler),
            config.retry.clone(),
            RetryNotifier::default(),
        );
        Self {
            transport: Rc::new(transport),
            scheduler,
            config,
        }
    }

    pub fn list_deps(&self) -> ListDeps {
        ListDeps {
            transport: Rc::clone(&self.transport),
            scheduler: Rc::clone(&self.scheduler),
            tuning: self.config.list.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Toast {
    pub id: u64,
    pub message: String,
}

/// Newest last; the oldest toasts are dropped beyond `max`.
pub(crate) fn push_toast(toasts: &mut Vec<Toast>, toast: Toast, max: usize) {
    toasts.push(toast);
    if toasts.len() > max {
        let excess = toasts.len() - max;
        toasts.drain(..excess);
    }
}

pub(crate) fn banner_message(event: &RetryExhausted) -> &'static str {
    match event.last_kind {
        ApiErrorKind::RateLimited | ApiErrorKind::Unavailable => BUSY_MESSAGE,
        _ => CONNECTIVITY_MESSAGE,
    }
}

#[derive(Clone, Copy)]
pub(crate) struct AppState {
    pub services: StoredValue<Services, LocalStorage>,

    /// Set when any request exhausts its retries; cleared by the user.
    pub banner: RwSignal<Option<String>>,

    pub toasts: RwSignal<Vec<Toast>>,
    next_toast_id: StoredValue<u64>,
    banner_subscription: u64,
}

impl AppState {
    pub fn new(config: EnvConfig) -> Self {
        let services = Services::from_config(config);
        let banner: RwSignal<Option<String>> = RwSignal::new(None);

        let banner_subscription = services.transport.notifier().subscribe(move |event| {
            tracing::warn!(
                event = "app.connectivity_degraded",
                path = %event.path,
                attempts = event.attempts,
                last_kind = ?event.last_kind
            );
            banner.set(Some(banner_message(event).to_string()));
        });

        Self {
            services: StoredValue::new_local(services),
            banner,
            toasts: RwSignal::new(Vec::new()),
            next_toast_id: StoredValue::new(0),
            banner_subscription,
        }
    }

    /// Detaches the banner from the retry notifier.
    pub fn dispose(&self) {
        let id = self.banner_subscription;
        let _ = self
            .services
            .try_with_value(|s| s.transport.notifier().unsubscribe(id));
    }

    pub fn dismiss_banner(&self) {
        self.banner.set(None);
    }

    /// Shows `message` for a few seconds.
    pub fn toast(&self, message: impl Into<String>) {
        let id = self.next_toast_id.get_value() + 1;
        self.next_toast_id.set_value(id);
        self.toasts.update(|t| {
            push_toast(
                t,
                Toast {
                    id,
                    message: message.into(),
                },
                MAX_TOASTS,
            )
        });

        let toasts = self.toasts;
        let scheduler = self.services.with_value(|s| Rc::clone(&s.scheduler));
        let sleep = scheduler.sleep(TOAST_TTL_MS);
        scheduler.spawn_local(Box::pin(async move {
            sleep.await;
            toasts.try_update(|t| t.retain(|x| x.id != id));
        }));
    }

    pub fn dismiss_toast(&self, id: u64) {
        self.toasts.update(|t| t.retain(|x| x.id != id));
    }
}

#[derive(Clone, Copy)]
pub(crate) struct AppContext(pub AppState);
