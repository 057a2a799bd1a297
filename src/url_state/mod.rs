//! Keeps a list view's [`Query`] and the address bar in step.
//!
//! Only values that differ from the schema defaults are written, so a view in
//! its default state has an empty query string.

use crate::models::{Query, QuerySchema, SortDirection};
use std::rc::Rc;

pub(crate) const SORT_BY_KEY: &str = "sortBy";
pub(crate) const SORT_DIR_KEY: &str = "sortDir";
pub(crate) const PAGE_KEY: &str = "page";
pub(crate) const SIZE_KEY: &str = "size";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Push,
    Replace,
}

/// Removes its listener when dropped.
pub(crate) struct ListenerGuard {
    remove: Option<Box<dyn FnOnce()>>,
}

impl ListenerGuard {
    pub fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// Raw access to the address bar query string (without the leading `?`).
pub(crate) trait NavigationPort {
    fn read_search(&self) -> String;

    /// Must not trigger a page load.
    fn write_search(&self, search: &str, mode: WriteMode);

    /// Fires on back/forward navigation only, never for our own writes.
    fn on_external_change(&self, callback: Rc<dyn Fn()>) -> ListenerGuard;
}

pub(crate) fn to_query_string(schema: &QuerySchema, query: &Query) -> String {
    if schema.is_default(query) {
        return String::new();
    }
    let defaults = schema.defaults();
    let mut pairs: Vec<(&str, String)> = Vec::new();

    for field in schema.filters {
        if let Some(v) = query.filter(field.key) {
            if !v.is_empty() {
                pairs.push((field.key, v.to_string()));
            }
        }
    }
    if query.sort.field != defaults.sort.field {
        pairs.push((SORT_BY_KEY, query.sort.field.clone()));
    }
    if query.sort.direction != defaults.sort.direction {
        pairs.push((SORT_DIR_KEY, query.sort.direction.to_string()));
    }
    if query.page.index != defaults.page.index {
        pairs.push((PAGE_KEY, query.page.index.to_string()));
    }
    if query.page.size != defaults.page.size {
        pairs.push((SIZE_KEY, query.page.size.to_string()));
    }

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Never fails: unknown keys are ignored and malformed values fall back to
/// the field default.
pub(crate) fn from_query_string(schema: &QuerySchema, search: &str) -> Query {
    let pairs = parse_pairs(search);
    let get = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let mut query = schema.defaults();

    for field in schema.filters {
        if let Some(v) = get(field.key).and_then(|raw| schema.coerce_filter(field.key, raw)) {
            query.filters.insert(field.key.to_string(), v);
        }
    }

    if let Some(field) = get(SORT_BY_KEY) {
        if let Some(known) = schema.sort_fields.iter().find(|f| **f == field) {
            query.sort.field = known.to_string();
        }
    }
    if let Some(dir) = get(SORT_DIR_KEY).and_then(|d| d.trim().parse::<SortDirection>().ok()) {
        query.sort.direction = dir;
    }
    if let Some(index) = get(PAGE_KEY).and_then(|v| v.trim().parse::<i64>().ok()) {
        query.page.index = u32::try_from(index.max(0)).unwrap_or(u32::MAX);
    }
    if let Some(size) = get(SIZE_KEY).and_then(|v| v.trim().parse::<i64>().ok()) {
        query.page.size = schema.clamp_page_size(size);
    }

    query
}

fn parse_pairs(search: &str) -> Vec<(String, String)> {
    search
        .trim_start_matches('?')
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((decode_component(k)?, decode_component(v)?))
        })
        .collect()
}

fn decode_component(s: &str) -> Option<String> {
    urlencoding::decode(&s.replace('+', " "))
        .ok()
        .map(|c| c.into_owned())
}

/// Query-level view over a [`NavigationPort`] for one schema.
#[derive(Clone)]
pub(crate) struct NavigationSync {
    port: Rc<dyn NavigationPort>,
    schema: &'static QuerySchema,
}

impl NavigationSync {
    pub fn new(port: Rc<dyn NavigationPort>, schema: &'static QuerySchema) -> Self {
        Self { port, schema }
    }

    pub fn read(&self) -> Query {
        from_query_string(self.schema, &self.port.read_search())
    }

    /// Returns `false` when the address bar already shows `query`.
    pub fn write(&self, query: &Query, mode: WriteMode) -> bool {
        let next = to_query_string(self.schema, query);
        if next == self.port.read_search().trim_start_matches('?') {
            return false;
        }
        tracing::debug!(event = "url_state.write", search = %next, ?mode);
        self.port.write_search(&next, mode);
        true
    }

    pub fn on_external_change(&self, callback: impl Fn(Query) + 'static) -> ListenerGuard {
        let sync = self.clone();
        self.port
            .on_external_change(Rc::new(move || callback(sync.read())))
    }
}

/// `history.pushState` / `replaceState` plus a `popstate` listener.
pub(crate) struct BrowserHistoryPort;

impl NavigationPort for BrowserHistoryPort {
    fn read_search(&self) -> String {
        web_sys::window()
            .and_then(|w| w.location().search().ok())
            .map(|s| s.trim_start_matches('?').to_string())
            .unwrap_or_default()
    }

    fn write_search(&self, search: &str, mode: WriteMode) {
        let Some(win) = web_sys::window() else {
            return;
        };
        let location = win.location();
        let path = location.pathname().unwrap_or_default();
        let hash = location.hash().unwrap_or_default();
        let url = if search.is_empty() {
            format!("{path}{hash}")
        } else {
            format!("{path}?{search}{hash}")
        };

        let Ok(history) = win.history() else {
            return;
        };
        let res = match mode {
            WriteMode::Push => {
                history.push_state_with_url(&wasm_bindgen::JsValue::NULL, "", Some(url.as_str()))
            }
            WriteMode::Replace => {
                history.replace_state_with_url(&wasm_bindgen::JsValue::NULL, "", Some(url.as_str()))
            }
        };
        if res.is_err() {
            tracing::warn!(event = "url_state.history_write_failed", url = %url);
        }
    }

    fn on_external_change(&self, callback: Rc<dyn Fn()>) -> ListenerGuard {
        use wasm_bindgen::JsCast;

        let Some(win) = web_sys::window() else {
            return ListenerGuard::new(|| {});
        };

        let closure = wasm_bindgen::closure::Closure::wrap(Box::new(move || {
            callback();
        }) as Box<dyn FnMut()>);

        let _ = win
            .add_event_listener_with_callback("popstate", closure.as_ref().unchecked_ref());

        ListenerGuard::new(move || {
            let _ = win.remove_event_listener_with_callback(
                "popstate",
                closure.as_ref().unchecked_ref(),
            );
        })
    }
}
