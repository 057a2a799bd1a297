//! Scripted [`HttpBackend`] for native tests.

use super::{ApiError, ApiRequest, ApiResult, HttpBackend, RawResponse};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

struct Scripted {
    latency_ms: u64,
    response: ApiResult<RawResponse>,
}

/// Replays queued responses in order and records every call.
///
/// An empty queue answers with a network error.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    responses: Rc<RefCell<VecDeque<Scripted>>>,
    calls: Rc<RefCell<Vec<(ApiRequest, Option<String>)>>>,
}

impl ScriptedBackend {
    pub fn push(&self, response: ApiResult<RawResponse>) {
        self.push_delayed(0, response);
    }

    /// Queues a response that resolves `latency_ms` after the call.
    pub fn push_delayed(&self, latency_ms: u64, response: ApiResult<RawResponse>) {
        self.responses.borrow_mut().push_back(Scripted {
            latency_ms,
            response,
        });
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls(&self) -> Vec<(ApiRequest, Option<String>)> {
        self.calls.borrow().clone()
    }

    pub fn last_call(&self) -> Option<ApiRequest> {
        self.calls.borrow().last().map(|(req, _)| req.clone())
    }
}

impl HttpBackend for ScriptedBackend {
    fn send(
        &self,
        req: &ApiRequest,
        bearer: Option<String>,
    ) -> LocalBoxFuture<'static, ApiResult<RawResponse>> {
        self.calls.borrow_mut().push((req.clone(), bearer));
        let next = self.responses.borrow_mut().pop_front();
        Box::pin(async move {
            match next {
                Some(Scripted {
                    latency_ms,
                    response,
                }) => {
                    if latency_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                    }
                    response
                }
                None => Err(ApiError::network("no scripted response")),
            }
        })
    }
}

pub(crate) fn status(code: u16) -> ApiResult<RawResponse> {
    Ok(RawResponse {
        status: code,
        retry_after: None,
        body: String::new(),
    })
}

pub(crate) fn ok_json(body: &str) -> ApiResult<RawResponse> {
    Ok(RawResponse {
        status: 200,
        retry_after: None,
        body: body.to_string(),
    })
}

/// A Spring-style page body with `items` as content.
pub(crate) fn page_json(
    items: serde_json::Value,
    number: u32,
    size: u32,
    total: u64,
) -> ApiResult<RawResponse> {
    let body = serde_json::json!({
        "content": items,
        "number": number,
        "size": size,
        "totalElements": total,
    });
    ok_json(&body.to_string())
}
