pub(crate) mod retry;
#[cfg(all(test, not(target_arch = "wasm32")))]
pub(crate) mod testing;

use futures::future::LocalBoxFuture;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ApiErrorKind {
    /// No response: timeout, DNS, refused or unreachable.
    Network,
    /// No response for a non-transient reason (bad URL, redirect loop, ...).
    Request,
    RateLimited,
    Unavailable,
    Unauthorized,
    Http,
    Parse,
    RetriesExhausted,
    ThrottleLimit,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub(crate) struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: Option<u16>,
    /// Server-directed delay from `Retry-After`.
    pub retry_after_ms: Option<u64>,
    /// For `RetriesExhausted`: the kind of the final failed attempt.
    pub last_kind: Option<ApiErrorKind>,
}

impl ApiError {
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after_ms: None,
            last_kind: None,
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub(crate) fn request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Request, message)
    }

    pub(crate) fn parse(e: impl std::fmt::Display) -> Self {
        Self::new(ApiErrorKind::Parse, e.to_string())
    }

    pub(crate) fn throttle_limit() -> Self {
        Self::new(
            ApiErrorKind::ThrottleLimit,
            "Request limit reached for this view",
        )
    }

    pub(crate) fn retries_exhausted(attempts: u32, last: &ApiError) -> Self {
        Self {
            last_kind: Some(last.kind),
            status: last.status,
            ..Self::new(
                ApiErrorKind::RetriesExhausted,
                format!("Gave up after {attempts} attempts: {}", last.message),
            )
        }
    }

    /// Maps a non-2xx response.
    pub(crate) fn from_status(raw: &RawResponse, ctx: &str) -> Self {
        let status = raw.status;
        let (kind, retry_after_ms) = match status {
            429 => (
                ApiErrorKind::RateLimited,
                raw.retry_after.as_deref().and_then(retry::parse_retry_after),
            ),
            503 => (ApiErrorKind::Unavailable, None),
            401 => (ApiErrorKind::Unauthorized, None),
            _ => (ApiErrorKind::Http, None),
        };
        Self {
            status: Some(status),
            retry_after_ms,
            ..Self::new(kind, format!("{ctx} ({status}): {}", raw.body))
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if is_transient(&e) {
            Self::network(e.to_string())
        } else {
            Self::request(e.to_string())
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

// fetch() only reports network failures as a generic request error.
#[cfg(target_arch = "wasm32")]
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_request()
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone, PartialEq)]
pub(crate) struct ApiRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn patch(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method: reqwest::Method::PATCH,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    #[cfg(test)]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// Body is redacted so requests can be logged as-is.
impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &self.body.as_ref().map(redact_sensitive))
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP exchange, no retries.
pub(crate) trait HttpBackend {
    fn send(
        &self,
        req: &ApiRequest,
        bearer: Option<String>,
    ) -> LocalBoxFuture<'static, ApiResult<RawResponse>>;
}

#[derive(Clone)]
pub(crate) struct ReqwestBackend {
    base_url: String,
    client: reqwest::Client,
    #[cfg_attr(target_arch = "wasm32", allow(dead_code))]
    timeout_ms: u64,
}

impl ReqwestBackend {
    pub fn new(base_url: String, timeout_ms: u64) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout_ms,
        }
    }

    fn with_auth_headers(
        mut req: reqwest::RequestBuilder,
        token: Option<String>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }
}

impl HttpBackend for ReqwestBackend {
    fn send(
        &self,
        req: &ApiRequest,
        bearer: Option<String>,
    ) -> LocalBoxFuture<'static, ApiResult<RawResponse>> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.client.request(req.method.clone(), url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        builder = Self::with_auth_headers(builder, bearer);
        if let Some(b) = &req.body {
            builder = builder.json(b);
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            builder = builder.timeout(std::time::Duration::from_millis(self.timeout_ms));
        }

        Box::pin(async move {
            let res = builder.send().await.map_err(ApiError::from_reqwest)?;
            let status = res.status().as_u16();
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = res.text().await.map_err(ApiError::from_reqwest)?;
            Ok(RawResponse {
                status,
                retry_after,
                body,
            })
        })
    }
}

const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "credential", "authorization"];

/// Copy of `value` with credential-like fields masked, at any depth.
pub(crate) fn redact_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (k.clone(), Value::String("***".to_string()))
                    } else {
                        (k.clone(), redact_sensitive(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive).collect()),
        other => other.clone(),
    }
}
