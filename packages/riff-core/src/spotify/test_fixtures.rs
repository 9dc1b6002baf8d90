//! Shared test fixtures: an in-process stand-in for the Web API and accounts service.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::auth::Token;

/// One recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: String,
}

type Key = (Method, String);

#[derive(Default)]
struct StubState {
    /// Responses are consumed in order; the last one is sticky.
    responses: Mutex<HashMap<Key, VecDeque<(StatusCode, String)>>>,
    calls: Mutex<Vec<Call>>,
}

/// HTTP server on 127.0.0.1 answering `(method, path)` with canned bodies.
///
/// Unrouted requests get `204 No Content`.
pub struct ApiStub {
    pub base: String,
    state: Arc<StubState>,
}

impl ApiStub {
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).expect("status");
        self.state
            .responses
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

async fn handle(State(state): State<Arc<StubState>>, req: Request) -> (StatusCode, String) {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    let path = parts.uri.path().to_string();

    state.calls.lock().push(Call {
        method: parts.method.clone(),
        path: path.clone(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        authorization: parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    let mut responses = state.responses.lock();
    match responses.get_mut(&(parts.method, path)) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or((StatusCode::NO_CONTENT, String::new())),
        Some(queue) => queue
            .front()
            .cloned()
            .unwrap_or((StatusCode::NO_CONTENT, String::new())),
        None => (StatusCode::NO_CONTENT, String::new()),
    }
}

/// A token valid for another hour.
pub fn fresh_token(access: &str) -> Token {
    Token {
        access_token: access.to_string(),
        token_type: "Bearer".into(),
        scope: String::new(),
        expires_in: 3600,
        refresh_token: "refresh-1".into(),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

/// A token that expired a minute ago.
pub fn expired_token(access: &str) -> Token {
    Token {
        expires_at: Utc::now() - Duration::minutes(1),
        ..fresh_token(access)
    }
}
