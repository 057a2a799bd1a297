//! Query/results state machine behind one list view.
//!
//! Every mutator funnels into one fetch path:
//! debounce (free-text only) -> throttle gate -> resilient transport.
//! Each trigger bumps a generation counter and a response is applied only
//! when its generation is still the latest, so a slow superseded request can
//! never overwrite newer results.

use crate::api::retry::ResilientTransport;
use crate::api::{ApiError, ApiErrorKind, ApiResult};
use crate::config::ListTuning;
use crate::models::{Page, PageResponse, Query, QuerySchema};
use crate::resources::ListResource;
use crate::runtime::{spawn_cancellable, SharedScheduler, TaskHandle};
use crate::timing::{Debouncer, GateDecision, ThrottleGate};
use crate::url_state::{ListenerGuard, NavigationPort, NavigationSync, WriteMode};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

pub(crate) const CONNECTIVITY_MESSAGE: &str = "Cannot reach the server, check your connection.";
pub(crate) const BUSY_MESSAGE: &str = "The server is busy right now. Please try again in a moment.";
pub(crate) const CLIENT_MESSAGE: &str = "The request could not be completed.";
pub(crate) const UNAUTHORIZED_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub(crate) const SERVER_MESSAGE: &str = "Something went wrong while loading data.";
pub(crate) const THROTTLE_LIMIT_MESSAGE: &str = "Too many attempts, reload the page to try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    Connectivity,
    Busy,
    Client,
    Unauthorized,
    Server,
    ThrottleLimit,
}

/// What the view shows for a terminal failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ErrorDescriptor {
    pub class: ErrorClass,
    pub message: String,
}

impl ErrorDescriptor {
    /// `client_message` is used for 4xx responses only, 401 included.
    pub fn classify(err: &ApiError, client_message: Option<String>) -> Self {
        let kind = match err.kind {
            ApiErrorKind::RetriesExhausted => err.last_kind.unwrap_or(ApiErrorKind::Network),
            k => k,
        };
        let class = match kind {
            ApiErrorKind::Network => ErrorClass::Connectivity,
            ApiErrorKind::RateLimited | ApiErrorKind::Unavailable => ErrorClass::Busy,
            ApiErrorKind::Unauthorized => ErrorClass::Unauthorized,
            ApiErrorKind::ThrottleLimit => ErrorClass::ThrottleLimit,
            ApiErrorKind::Http if err.status.is_some_and(|s| (400..500).contains(&s)) => {
                ErrorClass::Client
            }
            ApiErrorKind::Http
            | ApiErrorKind::Parse
            | ApiErrorKind::Request
            | ApiErrorKind::RetriesExhausted => ErrorClass::Server,
        };
        let message = match class {
            ErrorClass::Connectivity => CONNECTIVITY_MESSAGE.to_string(),
            ErrorClass::Busy => BUSY_MESSAGE.to_string(),
            ErrorClass::Client => client_message.unwrap_or_else(|| CLIENT_MESSAGE.to_string()),
            ErrorClass::Unauthorized => {
                client_message.unwrap_or_else(|| UNAUTHORIZED_MESSAGE.to_string())
            }
            ErrorClass::Server => SERVER_MESSAGE.to_string(),
            ErrorClass::ThrottleLimit => THROTTLE_LIMIT_MESSAGE.to_string(),
        };
        Self { class, message }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListPhase {
    Idle,
    /// Previous results, if any, stay visible.
    Loading,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ListViewState<T> {
    pub query: Query,
    pub results: Option<Page<T>>,
    pub loading: bool,
    pub error: Option<ErrorDescriptor>,
}

impl<T> ListViewState<T> {
    pub fn phase(&self) -> ListPhase {
        if self.loading {
            ListPhase::Loading
        } else if self.error.is_some() {
            ListPhase::Error
        } else {
            ListPhase::Idle
        }
    }
}

#[derive(Clone)]
pub(crate) struct ListDeps {
    pub transport: Rc<ResilientTransport>,
    pub scheduler: SharedScheduler,
    pub tuning: ListTuning,
}

/// Debounced filter edits waiting for the quiet window (`None` clears).
type FilterChanges = BTreeMap<String, Option<String>>;

type StateListener<T> = Rc<dyn Fn(&ListViewState<T>)>;

struct Inner<R: ListResource> {
    resource: R,
    transport: Rc<ResilientTransport>,
    scheduler: SharedScheduler,
    nav: NavigationSync,
    state: RefCell<ListViewState<R::Item>>,
    search: Debouncer<FilterChanges>,
    gate: ThrottleGate,
    generation: Cell<u64>,
    in_flight: RefCell<Vec<(u64, TaskHandle)>>,
    nav_listener: RefCell<Option<ListenerGuard>>,
    listeners: RefCell<Vec<StateListener<R::Item>>>,
    torn_down: Cell<bool>,
}

/// Shared handle; clones drive the same view.
pub(crate) struct ListViewController<R: ListResource> {
    inner: Rc<Inner<R>>,
}

impl<R: ListResource> Clone for ListViewController<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: ListResource> ListViewController<R> {
    /// Reads the query from the address bar, normalizes it in place and
    /// starts listening for back/forward. Fetches unless `seed` is given.
    pub fn mount(
        resource: R,
        deps: ListDeps,
        port: Rc<dyn NavigationPort>,
        seed: Option<Page<R::Item>>,
    ) -> Self {
        let nav = NavigationSync::new(port, resource.schema());
        let query = nav.read();
        nav.write(&query, WriteMode::Replace);

        let seeded = seed.is_some();
        let inner = Rc::new(Inner {
            search: Debouncer::new(deps.tuning.search_debounce_ms, Rc::clone(&deps.scheduler)),
            gate: ThrottleGate::new(
                deps.tuning.throttle_interval_ms,
                deps.tuning.throttle_max_attempts,
                Rc::clone(&deps.scheduler),
            ),
            resource,
            transport: deps.transport,
            scheduler: deps.scheduler,
            nav,
            state: RefCell::new(ListViewState {
                query,
                results: seed,
                loading: false,
                error: None,
            }),
            generation: Cell::new(0),
            in_flight: RefCell::new(Vec::new()),
            nav_listener: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            torn_down: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        let guard = inner.nav.on_external_change(move |query| {
            if let Some(inner) = weak.upgrade() {
                inner.on_external_navigation(query);
            }
        });
        *inner.nav_listener.borrow_mut() = Some(guard);

        tracing::info!(
            event = "list.mounted",
            resource = inner.resource.name(),
            seeded
        );
        if !seeded {
            inner.trigger_fetch();
        }
        Self { inner }
    }

    pub fn schema(&self) -> &'static QuerySchema {
        self.inner.resource.schema()
    }

    pub fn state(&self) -> ListViewState<R::Item> {
        self.inner.state.borrow().clone()
    }

    pub fn query(&self) -> Query {
        self.inner.state.borrow().query.clone()
    }

    /// Called after every state change until teardown.
    pub fn subscribe(&self, listener: impl Fn(&ListViewState<R::Item>) + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Free-text fields wait for the search debounce and are merged with
    /// edits already waiting; every other field commits at once.
    pub fn set_filter<'a>(&self, changes: impl IntoIterator<Item = (&'a str, Option<String>)>) {
        let inner = &self.inner;
        if inner.torn_down.get() {
            return;
        }
        let schema = inner.resource.schema();

        let mut immediate = Vec::new();
        let mut debounced = FilterChanges::new();
        for (key, value) in changes {
            match schema.field(key) {
                Some(field) if field.debounced => {
                    debounced.insert(key.to_string(), value);
                }
                Some(_) => immediate.push((key, value)),
                None => tracing::warn!(
                    event = "list.unknown_filter",
                    resource = inner.resource.name(),
                    key
                ),
            }
        }

        if !debounced.is_empty() {
            let mut pending = inner.search.pending().unwrap_or_default();
            pending.extend(debounced);
            let weak = Rc::downgrade(inner);
            inner.search.push(pending, move |changes| {
                if let Some(inner) = weak.upgrade() {
                    inner.commit_filters(changes.iter().map(|(k, v)| (k.as_str(), v.clone())));
                }
            });
        }
        if !immediate.is_empty() {
            inner.commit_filters(immediate);
        }
    }

    /// Same field flips the direction, a new field sorts ascending. Returns
    /// `false` for fields the resource cannot sort by.
    pub fn set_sort(&self, field: &str) -> bool {
        let next = self
            .inner
            .state
            .borrow()
            .query
            .with_sort_toggled(self.schema(), field);
        match next {
            Some(next) => {
                self.inner.commit(next);
                true
            }
            None => {
                tracing::warn!(
                    event = "list.unknown_sort_field",
                    resource = self.inner.resource.name(),
                    field
                );
                false
            }
        }
    }

    pub fn set_page(&self, index: u32) {
        let next = self.inner.state.borrow().query.with_page(index);
        self.inner.commit(next);
    }

    /// Keeps the page index, clamped to the last page of the last known
    /// total. Returns `false` for sizes the resource does not allow.
    pub fn set_page_size(&self, size: u32) -> bool {
        let next = {
            let state = self.inner.state.borrow();
            let known_total = state.results.as_ref().map(|p| p.total_elements);
            state.query.with_page_size(self.schema(), size, known_total)
        };
        match next {
            Some(next) => {
                self.inner.commit(next);
                true
            }
            None => false,
        }
    }

    /// Back to defaults; the page size is kept. Pending search input is dropped.
    pub fn clear_filters(&self) {
        self.inner.search.cancel();
        let next = self.inner.state.borrow().query.cleared(self.schema());
        self.inner.commit(next);
    }

    pub fn refetch(&self) {
        self.inner.trigger_fetch();
    }

    /// Cancels timers and in-flight requests and stops listening to the
    /// address bar. The controller is inert afterwards.
    pub fn teardown(&self) {
        let inner = &self.inner;
        if inner.torn_down.replace(true) {
            return;
        }
        inner.cancel_pending();
        inner.nav_listener.borrow_mut().take();
        inner.listeners.borrow_mut().clear();
        tracing::info!(event = "list.torn_down", resource = inner.resource.name());
    }
}

impl<R: ListResource> Drop for Inner<R> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

impl<R: ListResource> Inner<R> {
    fn cancel_pending(&self) {
        self.search.cancel();
        // Also forgets the attempt count.
        self.gate.reset();
        for (_, task) in self.in_flight.borrow_mut().drain(..) {
            task.cancel();
        }
    }

    fn commit_filters<'a>(
        self: &Rc<Self>,
        changes: impl IntoIterator<Item = (&'a str, Option<String>)>,
    ) {
        let next = self
            .state
            .borrow()
            .query
            .with_filters(self.resource.schema(), changes);
        self.commit(next);
    }

    /// No-op when `next` equals the current query.
    fn commit(self: &Rc<Self>, next: Query) {
        if self.torn_down.get() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.query == next {
                return;
            }
            state.query = next.clone();
        }
        self.nav.write(&next, WriteMode::Push);
        self.trigger_fetch();
    }

    fn on_external_navigation(self: &Rc<Self>, query: Query) {
        if self.torn_down.get() {
            return;
        }
        self.search.cancel();
        // Malformed values were replaced by defaults; show the normalized form.
        self.nav.write(&query, WriteMode::Replace);

        let changed = {
            let mut state = self.state.borrow_mut();
            if state.query == query {
                false
            } else {
                state.query = query;
                true
            }
        };
        if changed {
            tracing::debug!(
                event = "list.external_navigation",
                resource = self.resource.name()
            );
            self.trigger_fetch();
        }
    }

    fn trigger_fetch(self: &Rc<Self>) {
        if self.torn_down.get() {
            return;
        }
        self.generation.set(self.generation.get() + 1);
        self.update(|s| s.loading = true);

        let weak = Rc::downgrade(self);
        let decision = self.gate.request(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start_fetch();
            }
        });

        match decision {
            GateDecision::LimitExceeded => {
                let error = ErrorDescriptor::classify(&ApiError::throttle_limit(), None);
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(error);
                });
            }
            GateDecision::Deferred { wait_ms } => {
                tracing::debug!(
                    event = "list.fetch_deferred",
                    resource = self.resource.name(),
                    wait_ms
                );
            }
            GateDecision::Proceed | GateDecision::Coalesced => {}
        }
    }

    /// Runs the latest query at the time the gate lets it through.
    fn start_fetch(self: &Rc<Self>) {
        if self.torn_down.get() {
            return;
        }
        let generation = self.generation.get();
        let req = self.resource.request(&self.state.borrow().query);
        tracing::debug!(
            event = "list.fetch_started",
            resource = self.resource.name(),
            generation,
            request = ?req
        );

        let transport = Rc::clone(&self.transport);
        let weak = Rc::downgrade(self);
        let task = spawn_cancellable(&*self.scheduler, async move {
            let result = transport
                .fetch_json::<PageResponse<R::Item>>(&req)
                .await
                .map(Page::from);
            if let Some(inner) = weak.upgrade() {
                inner.settle(generation, result);
            }
        });
        self.in_flight.borrow_mut().push((generation, task));
    }

    fn settle(&self, generation: u64, result: ApiResult<Page<R::Item>>) {
        self.in_flight.borrow_mut().retain(|(g, _)| *g != generation);
        if self.torn_down.get() {
            return;
        }
        if generation != self.generation.get() {
            tracing::debug!(
                event = "list.stale_response_discarded",
                resource = self.resource.name(),
                generation,
                latest = self.generation.get()
            );
            return;
        }

        match result {
            Ok(page) => {
                tracing::debug!(
                    event = "list.fetch_succeeded",
                    resource = self.resource.name(),
                    total_elements = page.total_elements
                );
                self.update(|s| {
                    s.results = Some(page);
                    s.loading = false;
                    s.error = None;
                });
            }
            Err(err) => {
                let error = ErrorDescriptor::classify(&err, self.resource.client_error_message(&err));
                tracing::warn!(
                    event = "list.fetch_failed",
                    resource = self.resource.name(),
                    kind = ?err.kind,
                    class = ?error.class
                );
                self.update(|s| {
                    s.loading = false;
                    s.error = Some(error);
                });
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut ListViewState<R::Item>)) {
        let snapshot = {
            let mut state = self.state.borrow_mut();
            f(&mut state);
            state.clone()
        };
        let listeners: Vec<StateListener<R::Item>> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::api::retry::{RetryNotifier, RetryPolicy};
    use crate::api::testing::{page_json, status, ScriptedBackend};
    use crate::api::RawResponse;
    use crate::models::Center;
    use crate::resources::{AdminCentersResource, CentersResource, DonationsResource};
    use crate::runtime::default_scheduler;
    use crate::storage::StaticSession;
    use crate::url_state::memory::MemoryNavigation;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    struct Harness {
        backend: ScriptedBackend,
        nav: MemoryNavigation,
        deps: ListDeps,
    }

    impl Harness {
        fn new(url: &str, tuning: ListTuning) -> Self {
            let backend = ScriptedBackend::default();
            let scheduler = default_scheduler();
            let transport = ResilientTransport::new(
                Rc::new(backend.clone()),
                Rc::new(StaticSession::default()),
                Rc::clone(&scheduler),
                RetryPolicy::default(),
                RetryNotifier::default(),
            );
            Self {
                backend,
                nav: MemoryNavigation::new(url),
                deps: ListDeps {
                    transport: Rc::new(transport),
                    scheduler,
                    tuning,
                },
            }
        }

        fn mount<R: ListResource>(
            &self,
            resource: R,
            seed: Option<Page<R::Item>>,
        ) -> ListViewController<R> {
            ListViewController::mount(resource, self.deps.clone(), Rc::new(self.nav.clone()), seed)
        }

        fn last_param(&self, key: &str) -> Option<String> {
            self.backend
                .last_call()
                .and_then(|req| req.param(key).map(str::to_string))
        }
    }

    fn unthrottled() -> ListTuning {
        ListTuning {
            throttle_interval_ms: 0,
            ..ListTuning::default()
        }
    }

    fn centers(names: &[&str], number: u32, total: u64) -> ApiResult<RawResponse> {
        let items: Vec<serde_json::Value> = names
            .iter()
            .enumerate()
            .map(|(i, n)| serde_json::json!({"id": i + 1, "name": n, "code": "C", "city": n}))
            .collect();
        page_json(serde_json::Value::Array(items), number, 20, total)
    }

    fn center(name: &str) -> Center {
        Center {
            id: 1,
            name: name.to_string(),
            code: "C".to_string(),
            city: name.to_string(),
            address: None,
            active: true,
            updated_at: None,
        }
    }

    fn names(state: &ListViewState<Center>) -> Vec<String> {
        state
            .results
            .as_ref()
            .map(|p| p.items.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_warszawa_issues_one_debounced_fetch() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", ListTuning::default());
                h.backend.push(centers(&["RCKiK Warszawa"], 0, 1));
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 0, 20, 0)));
                assert_eq!(h.backend.call_count(), 0);

                for text in ["W", "Wa", "War", "Wars", "Warszawa"] {
                    ctl.set_filter([("search", Some(text.to_string()))]);
                    sleep(Duration::from_millis(50)).await;
                }

                // Last keystroke was 50 ms ago.
                sleep(Duration::from_millis(240)).await;
                assert_eq!(h.backend.call_count(), 0);
                assert_eq!(h.nav.current(), "");

                sleep(Duration::from_millis(20)).await;
                assert_eq!(h.backend.call_count(), 1);
                let req = h.backend.last_call().expect("one call");
                assert_eq!(req.param("search"), Some("Warszawa"));
                assert_eq!(req.param("page"), Some("0"));
                assert_eq!(h.nav.current(), "search=Warszawa");
                assert!(!h.nav.current().contains("sortBy"));

                let state = ctl.state();
                assert_eq!(names(&state), vec!["RCKiK Warszawa"]);
                assert_eq!(state.phase(), ListPhase::Idle);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_normalizes_url_and_fetches() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("size=33&foo=1&page=2", ListTuning::default());
                h.backend.push(centers(&["Opole"], 2, 60));
                let ctl = h.mount(CentersResource, None);

                assert_eq!(h.nav.current(), "page=2&size=50");
                assert_eq!(h.nav.len(), 1);
                assert_eq!(ctl.state().phase(), ListPhase::Loading);

                sleep(Duration::from_millis(10)).await;
                let req = h.backend.last_call().expect("initial fetch");
                assert_eq!(req.param("size"), Some("50"));
                assert_eq!(req.param("page"), Some("2"));
                assert_eq!(names(&ctl.state()), vec!["Opole"]);
                assert_eq!(ctl.state().phase(), ListPhase::Idle);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_and_sort_mutators_write_url_and_fetch() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", unthrottled());
                for _ in 0..3 {
                    h.backend.push(centers(&["Kraków"], 0, 100));
                }
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 0, 20, 100)));

                ctl.set_page(3);
                assert_eq!(h.nav.current(), "page=3");
                sleep(Duration::from_millis(10)).await;
                assert_eq!(h.last_param("page").as_deref(), Some("3"));

                assert!(ctl.set_sort("city"));
                assert_eq!(h.nav.current(), "sortBy=city");
                sleep(Duration::from_millis(10)).await;
                let req = h.backend.last_call().expect("sort fetch");
                assert_eq!(req.param("sort"), Some("city,asc"));
                assert_eq!(req.param("page"), Some("0"));

                assert!(ctl.set_sort("city"));
                assert_eq!(h.nav.current(), "sortBy=city&sortDir=desc");
                assert!(!ctl.set_sort("password"));

                sleep(Duration::from_millis(10)).await;
                assert_eq!(h.backend.call_count(), 3);
                assert_eq!(h.nav.len(), 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_query_does_not_fetch() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("page=1", unthrottled());
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 1, 20, 100)));
                ctl.set_page(1);
                ctl.set_filter([("city", None)]);
                sleep(Duration::from_millis(10)).await;
                assert_eq!(h.backend.call_count(), 0);
                assert_eq!(h.nav.len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_keeps_previous_results() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", unthrottled());
                h.backend.push(status(400));
                let ctl = h.mount(
                    CentersResource,
                    Some(Page::new(vec![center("Łódź")], 0, 20, 1)),
                );

                ctl.set_filter([("city", Some("Łódź".to_string()))]);
                sleep(Duration::from_millis(10)).await;

                let state = ctl.state();
                assert_eq!(state.phase(), ListPhase::Error);
                let error = state.error.expect("error");
                assert_eq!(error.class, ErrorClass::Client);
                assert!(error.message.contains("filters are invalid"));
                assert_eq!(names(&ctl.state()), vec!["Łódź"]);
                assert_eq!(h.backend.call_count(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_forbidden_uses_resource_message() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", ListTuning::default());
                h.backend.push(status(403));
                let ctl = h.mount(AdminCentersResource, None);
                sleep(Duration::from_millis(10)).await;
                let error = ctl.state().error.expect("error");
                assert_eq!(error.class, ErrorClass::Client);
                assert!(error.message.contains("permission"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_as_busy() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", ListTuning::default());
                for _ in 0..6 {
                    h.backend.push(status(503));
                }
                let ctl = h.mount(CentersResource, None);

                sleep(Duration::from_secs(10)).await;
                assert_eq!(h.backend.call_count(), 6);
                let error = ctl.state().error.expect("error");
                assert_eq!(error.class, ErrorClass::Busy);
                assert_eq!(error.message, BUSY_MESSAGE);
                assert!(!ctl.state().loading);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_limit_never_reaches_network() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(
                    "",
                    ListTuning {
                        throttle_interval_ms: 0,
                        throttle_max_attempts: 2,
                        ..ListTuning::default()
                    },
                );
                for _ in 0..3 {
                    h.backend.push(centers(&["Kielce"], 0, 1));
                }
                let ctl = h.mount(CentersResource, None);
                ctl.refetch();
                ctl.refetch();

                sleep(Duration::from_millis(10)).await;
                assert_eq!(h.backend.call_count(), 2);
                let state = ctl.state();
                let error = state.error.expect("error");
                assert_eq!(error.class, ErrorClass::ThrottleLimit);
                assert_eq!(error.message, THROTTLE_LIMIT_MESSAGE);
                assert!(!state.loading);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_superseded_response_is_discarded() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", unthrottled());
                h.backend.push_delayed(1000, centers(&["Old"], 0, 40));
                h.backend.push_delayed(10, centers(&["New"], 1, 40));

                let ctl = h.mount(CentersResource, None);
                let seen: Rc<RefCell<Vec<String>>> = Rc::default();
                let s2 = Rc::clone(&seen);
                ctl.subscribe(move |state| s2.borrow_mut().extend(names(state)));

                sleep(Duration::from_millis(50)).await;
                ctl.set_page(1);

                sleep(Duration::from_secs(2)).await;
                let state = ctl.state();
                assert_eq!(names(&state), vec!["New"]);
                assert_eq!(state.results.map(|p| p.page_index), Some(1));
                assert!(!seen.borrow().iter().any(|n| n == "Old"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_work() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", ListTuning::default());
                h.backend.push_delayed(1000, centers(&["Late"], 0, 1));
                let ctl = h.mount(CentersResource, None);
                let updates = Rc::new(Cell::new(0));
                let u2 = Rc::clone(&updates);
                ctl.subscribe(move |_| u2.set(u2.get() + 1));

                sleep(Duration::from_millis(10)).await;
                ctl.set_filter([("search", Some("Kra".to_string()))]);
                ctl.teardown();
                assert_eq!(h.nav.listener_count(), 0);

                sleep(Duration::from_secs(3)).await;
                assert_eq!(h.backend.call_count(), 1);
                assert_eq!(updates.get(), 0);
                assert!(ctl.state().results.is_none());

                ctl.set_page(4);
                ctl.refetch();
                assert_eq!(h.nav.current(), "");
                assert_eq!(h.backend.call_count(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_retry_wait_stops_retrying() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", ListTuning::default());
                for _ in 0..6 {
                    h.backend.push(status(503));
                }
                let ctl = h.mount(CentersResource, None);
                let updates = Rc::new(Cell::new(0));
                let u2 = Rc::clone(&updates);
                ctl.subscribe(move |_| u2.set(u2.get() + 1));

                // First attempt at 0 ms, first retry at 1000 ms, next due at 2000 ms.
                sleep(Duration::from_millis(1500)).await;
                let calls = h.backend.call_count();
                assert_eq!(calls, 2);
                ctl.teardown();

                sleep(Duration::from_secs(20)).await;
                assert_eq!(h.backend.call_count(), calls);
                assert_eq!(updates.get(), 0);
                assert!(ctl.state().error.is_none());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_navigation_refetches_without_pushing() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("", unthrottled());
                h.backend.push(centers(&["Page 2"], 2, 100));
                h.backend.push(centers(&["Page 0"], 0, 100));
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 0, 20, 100)));

                ctl.set_page(2);
                sleep(Duration::from_millis(10)).await;
                assert_eq!(h.nav.current(), "page=2");

                h.nav.back();
                assert_eq!(ctl.query().page.index, 0);
                sleep(Duration::from_millis(10)).await;

                assert_eq!(h.backend.call_count(), 2);
                assert_eq!(h.last_param("page").as_deref(), Some("0"));
                assert_eq!(h.nav.len(), 2);
                assert_eq!(h.nav.current(), "");
                assert_eq!(names(&ctl.state()), vec!["Page 0"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_filters_keeps_page_size() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("city=Opole&size=50&page=3", unthrottled());
                h.backend.push(centers(&[], 0, 0));
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 3, 50, 500)));

                ctl.clear_filters();
                assert_eq!(h.nav.current(), "size=50");
                sleep(Duration::from_millis(10)).await;
                let req = h.backend.last_call().expect("fetch");
                assert_eq!(req.param("size"), Some("50"));
                assert_eq!(req.param("page"), Some("0"));
                assert_eq!(req.param("city"), None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_size_change_clamps_index() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new("page=2", unthrottled());
                h.backend.push(centers(&[], 0, 45));
                let ctl = h.mount(CentersResource, Some(Page::new(vec![], 2, 20, 45)));

                assert!(!ctl.set_page_size(33));
                assert!(ctl.set_page_size(50));
                assert_eq!(h.nav.current(), "size=50");
                assert_eq!(ctl.query().page.index, 0);
            })
            .await;
    }

    #[test]
    fn test_classification_messages() {
        let exhausted = ApiError::retries_exhausted(6, &ApiError::network("refused"));
        let d = ErrorDescriptor::classify(&exhausted, None);
        assert_eq!(d.class, ErrorClass::Connectivity);
        assert_eq!(d.message, CONNECTIVITY_MESSAGE);

        let unauthorized = ApiError::from_status(
            &RawResponse {
                status: 401,
                retry_after: None,
                body: String::new(),
            },
            "x",
        );
        let d = ErrorDescriptor::classify(&unauthorized, None);
        assert_eq!(d.class, ErrorClass::Unauthorized);
        assert_eq!(d.message, UNAUTHORIZED_MESSAGE);

        let d = ErrorDescriptor::classify(
            &unauthorized,
            DonationsResource.client_error_message(&unauthorized),
        );
        assert_eq!(d.class, ErrorClass::Unauthorized);
        assert_eq!(d.message, "Sign in to see your donation diary.");

        let server = ApiError::from_status(
            &RawResponse {
                status: 500,
                retry_after: None,
                body: String::new(),
            },
            "x",
        );
        let d = ErrorDescriptor::classify(&server, Some("ignored".to_string()));
        assert_eq!(d.class, ErrorClass::Server);
        assert_eq!(d.message, SERVER_MESSAGE);

        let d = ErrorDescriptor::classify(&ApiError::parse("eof"), None);
        assert_eq!(d.class, ErrorClass::Server);
    }
}
