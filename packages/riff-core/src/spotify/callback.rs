//! Local HTTP listener that receives the OAuth redirect.
//!
//! The listener serves the redirect URI's path, answers the browser with a
//! short HTML page, and hands the first result to the waiting login flow.
//! Later requests get the page but are otherwise ignored.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{SpotifyError, SpotifyResult};

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>riff</title></head><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\"><h1>Authentication Successful</h1><p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>riff</title></head><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\"><h1>Authentication Failed</h1><p>{reason}</p></body></html>";

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// What the browser delivered.
#[derive(Debug)]
enum CallbackOutcome {
    Code { code: String, state: String },
    Denied(String),
}

type Pending = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// A bound, not yet serving, callback listener.
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Binds to the host and port of `redirect_uri`.
    pub async fn bind(redirect_uri: &str) -> SpotifyResult<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| SpotifyError::Auth(format!("invalid redirect URI: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| SpotifyError::Auth("redirect URI has no host".into()))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        let listener = TcpListener::bind((host, port)).await?;
        log::debug!("[Auth] Callback listener on {}:{}{}", host, port, path);
        Ok(Self { listener, path })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until the first callback arrives, `timeout` elapses, or
    /// `cancel` fires, then shuts the listener down.
    ///
    /// Returns the authorization code once its `state` matches
    /// `expected_state`.
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SpotifyResult<String> {
        let (tx, rx) = oneshot::channel();
        let pending: Pending = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route(&self.path, get(handle_callback))
            .with_state(pending);

        let listener = self.listener;
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                log::warn!("[Auth] Callback server error: {}", e);
            }
        });

        let outcome = tokio::select! {
            res = rx => res.map_err(|_| SpotifyError::Auth("callback listener stopped".into())),
            () = tokio::time::sleep(timeout) => {
                Err(SpotifyError::Auth("timed out waiting for authorization".into()))
            }
            () = cancel.cancelled() => Err(SpotifyError::Cancelled),
        };

        shutdown.cancel();
        let _ = server.await;

        match outcome? {
            CallbackOutcome::Denied(reason) => {
                Err(SpotifyError::Auth(format!("authorization denied: {reason}")))
            }
            CallbackOutcome::Code { state, .. } if state != expected_state => {
                Err(SpotifyError::Auth("state mismatch in OAuth callback".into()))
            }
            CallbackOutcome::Code { code, .. } => Ok(code),
        }
    }
}

async fn handle_callback(
    State(pending): State<Pending>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let (outcome, response) = match params {
        CallbackParams {
            error: Some(error), ..
        } => (
            CallbackOutcome::Denied(error.clone()),
            failure(&error),
        ),
        CallbackParams {
            code: Some(code),
            state,
            ..
        } if !code.is_empty() => (
            CallbackOutcome::Code {
                code,
                state: state.unwrap_or_default(),
            },
            (StatusCode::OK, Html(SUCCESS_PAGE.to_string())),
        ),
        _ => (
            CallbackOutcome::Denied("missing authorization code".into()),
            failure("missing authorization code"),
        ),
    };

    if let Some(tx) = pending.lock().take() {
        let _ = tx.send(outcome);
    } else {
        log::debug!("[Auth] Ignoring repeated callback");
    }
    response
}

fn failure(reason: &str) -> (StatusCode, Html<String>) {
    let reason = html_escape::encode_text(reason);
    (
        StatusCode::BAD_REQUEST,
        Html(FAILURE_PAGE.replace("{reason}", &reason)),
    )
}
