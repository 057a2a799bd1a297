pub(crate) const TOKEN_KEY: &str = "rckik_token";

/// Source of the bearer token attached to every request.
///
/// Read on every attempt so a login or logout between retries is honoured.
pub(crate) trait SessionStore {
    fn bearer_token(&self) -> Option<String>;
}

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

pub(crate) fn load_token() -> Option<String> {
    let token = local_storage()?.get_item(TOKEN_KEY).ok().flatten()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub(crate) fn save_token(token: &str) {
    if let Some(storage) = local_storage() {
        let _ = storage.set_item(TOKEN_KEY, token);
    }
}

pub(crate) fn clear_token() {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(TOKEN_KEY);
    }
}

/// Token kept in `localStorage` under [`TOKEN_KEY`].
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LocalStorageSession;

impl SessionStore for LocalStorageSession {
    fn bearer_token(&self) -> Option<String> {
        load_token()
    }
}

/// Fixed token for tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub(crate) struct StaticSession {
    token: Option<String>,
}

#[cfg(test)]
impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[cfg(test)]
impl SessionStore for StaticSession {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}
