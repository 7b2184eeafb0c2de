use crate::errors::RecorderError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Relative to the server base url, e.g. `/api/sessions`.
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON; `Null` for an empty body, a string for non-JSON text.
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server's `success` flag. Missing means "trust the status code".
    pub fn success_flag(&self) -> bool {
        self.body
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| self.is_success())
    }

    pub fn message(&self) -> Option<String> {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(Value::as_str))
            .or_else(|| self.body.as_str())
            .map(str::to_string)
    }
}

/// Blocking transport. Non-2xx statuses are normal responses; `Err` means
/// the request never completed.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RecorderError>;

    fn get(&self, path: &str) -> Result<HttpResponse, RecorderError> {
        self.send(&HttpRequest {
            method: HttpMethod::Get,
            path: path.to_string(),
            body: None,
        })
    }

    fn post_json(&self, path: &str, body: Value) -> Result<HttpResponse, RecorderError> {
        self.send(&HttpRequest {
            method: HttpMethod::Post,
            path: path.to_string(),
            body: Some(body),
        })
    }

    fn delete(&self, path: &str) -> Result<HttpResponse, RecorderError> {
        self.send(&HttpRequest {
            method: HttpMethod::Delete,
            path: path.to_string(),
            body: None,
        })
    }
}

pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RecorderError> {
        let url = format!("{}{}", self.base_url, request.path);
        tracing::debug!(method = request.method.as_str(), url = %url, "http request");
        let pending = self.agent.request(request.method.as_str(), &url);
        let result = match &request.body {
            Some(body) => pending
                .set("content-type", "application/json")
                .send_string(&body.to_string()),
            None => pending.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(RecorderError::Io(format!(
                    "{} {url}: {err}",
                    request.method.as_str()
                )));
            }
        };
        let status = response.status();
        let text = response
            .into_string()
            .map_err(|e| RecorderError::Io(format!("read response body from {url}: {e}")))?;
        Ok(HttpResponse {
            status,
            body: parse_body(&text),
        })
    }
}

pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queued canned responses; records every request it is given.
#[derive(Default, Clone)]
pub struct FakeTransport {
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, RecorderError>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeTransport {
    pub fn push_json(&self, status: u16, body: Value) {
        guard(&self.responses).push_back(Ok(HttpResponse { status, body }));
    }

    pub fn push_failure(&self, message: &str) {
        guard(&self.responses).push_back(Err(RecorderError::Io(message.to_string())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        guard(&self.requests).clone()
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RecorderError> {
        guard(&self.requests).push(request.clone());
        guard(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(RecorderError::Io("no fake response queued".to_string())))
    }
}
