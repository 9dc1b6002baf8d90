//! Authenticated Spotify Web API client.
//!
//! Every request goes through [`SpotifyClient::execute`], which attaches a
//! fresh bearer token, classifies the response and retries transient
//! failures. Cancellation is by dropping the returned future.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::api::{
    error_message, DevicesResponse, PlayOffset, PlayRequest, PlayerStateObject, QueueResponse,
    RecentlyPlayedResponse, SearchHit, SearchKind, SearchResponse, TransferRequest, UserObject,
};
use super::auth::{AuthClient, Token};
use super::token_store::TokenStore;
use super::{SpotifyError, SpotifyResult};
use crate::model::{Device, HistoryEntry, PlaybackState, Queue};
use crate::protocol_constants::{
    SPOTIFY_API_BASE, SPOTIFY_MAX_HISTORY_LIMIT, SPOTIFY_MAX_RETRIES, SPOTIFY_RETRY_BASE_DELAY,
};

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: SPOTIFY_MAX_RETRIES,
            base_delay: SPOTIFY_RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

type Query = Vec<(&'static str, String)>;

fn device_query(device_id: Option<&str>) -> Query {
    device_id
        .filter(|id| !id.is_empty())
        .map(|id| vec![("device_id", id.to_string())])
        .unwrap_or_default()
}

/// Spotify REST client with token lifecycle and retry.
pub struct SpotifyClient {
    http: Client,
    api_base: String,
    auth: AuthClient,
    store: Arc<dyn TokenStore>,
    /// Loaded lazily from `store`. Held across refreshes so only one runs.
    token: Mutex<Option<Token>>,
    retry: RetryPolicy,
}

impl SpotifyClient {
    pub fn new(auth: AuthClient, store: Arc<dyn TokenStore>) -> Self {
        Self {
            http: auth.http_client().clone(),
            api_base: SPOTIFY_API_BASE.to_string(),
            auth,
            store,
            token: Mutex::new(None),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Installs a token obtained from a login and persists it.
    pub async fn set_token(&self, token: Token) -> SpotifyResult<()> {
        let mut guard = self.token.lock().await;
        self.store.save(&token)?;
        *guard = Some(token);
        Ok(())
    }

    /// Returns the current token without refreshing it.
    pub async fn token(&self) -> SpotifyResult<Option<Token>> {
        let mut guard = self.token.lock().await;
        if guard.is_none() {
            *guard = self.store.load()?;
        }
        Ok(guard.clone())
    }

    /// Forgets the token in memory and in the store.
    pub async fn logout(&self) -> SpotifyResult<()> {
        let mut guard = self.token.lock().await;
        *guard = None;
        self.store.delete()
    }

    /// Returns a usable access token, refreshing it first if it is within
    /// the expiry buffer.
    ///
    /// The lock is held for the whole refresh, so concurrent callers wait
    /// for and reuse a single refresh.
    pub async fn access_token(&self) -> SpotifyResult<String> {
        let mut guard = self.token.lock().await;
        if guard.is_none() {
            *guard = self.store.load()?;
        }
        let current = guard.clone().ok_or(SpotifyError::NotAuthenticated)?;
        if !current.is_expired() {
            return Ok(current.access_token);
        }

        log::info!("[Spotify] Access token expired, refreshing");
        let fresh = self.auth.refresh(&current).await?;
        self.store.save(&fresh)?;
        let access = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends a request, retrying transport failures, 429 and 5xx.
    ///
    /// Returns `None` for `204 No Content` or an empty body.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&serde_json::Value>,
    ) -> SpotifyResult<Option<String>> {
        let mut retry = 0;
        loop {
            match self.attempt(method.clone(), path, query, body).await {
                Ok(res) => return Ok(res),
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    retry += 1;
                    log::warn!(
                        "[Spotify] {} {} failed: {} (retry {}/{} in {}ms)",
                        method,
                        path,
                        e,
                        retry,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&serde_json::Value>,
    ) -> SpotifyResult<Option<String>> {
        let token = self.access_token().await?;
        let has_body = body.is_some();
        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.api_base, path))
            .bearer_auth(token);
        if !query.is_empty() {
            req = req.query(query);
        }
        req = match body {
            Some(body) => req.json(body),
            // The API answers 411 to body-less PUT/POST without a length.
            None if method != Method::GET => req.header(CONTENT_LENGTH, "0"),
            None => req,
        };

        let res = req.send().await?;
        let status = res.status();
        log::debug!(
            "[Spotify] {} {} -> {}{}",
            method,
            path,
            status.as_u16(),
            if has_body { " (json body)" } else { "" }
        );

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = res.text().await?;
        if !status.is_success() {
            return Err(SpotifyError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok((!text.trim().is_empty()).then_some(text))
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> SpotifyResult<Option<T>> {
        match self.execute(Method::GET, path, query, None).await? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| SpotifyError::Parse(format!("{path}: {e}"))),
            None => Ok(None),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> SpotifyResult<T> {
        self.get_optional(path, query)
            .await?
            .ok_or_else(|| SpotifyError::Parse(format!("{path}: empty response")))
    }

    async fn put(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<serde_json::Value>,
    ) -> SpotifyResult<()> {
        self.execute(Method::PUT, path, query, body.as_ref()).await?;
        Ok(())
    }

    async fn post(&self, path: &str, query: &[(&'static str, String)]) -> SpotifyResult<()> {
        self.execute(Method::POST, path, query, None).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profile, Devices & Search
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn current_user(&self) -> SpotifyResult<UserObject> {
        self.get_json("/me", &[]).await
    }

    /// Devices currently visible to the account. Restricted devices without
    /// an id are skipped.
    pub async fn devices(&self) -> SpotifyResult<Vec<Device>> {
        let res: DevicesResponse = self.get_json("/me/player/devices", &[]).await?;
        Ok(res
            .devices
            .into_iter()
            .filter(|d| d.id.as_deref().is_some_and(|id| !id.is_empty()))
            .map(|d| d.into_device())
            .collect())
    }

    /// Searches the catalog. An empty query returns no results without a
    /// request; no `kinds` means tracks.
    pub async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
    ) -> SpotifyResult<SearchResponse> {
        if query.trim().is_empty() {
            return Ok(SearchResponse::default());
        }
        let kinds = if kinds.is_empty() {
            SearchKind::Track.as_str().to_string()
        } else {
            kinds.iter().map(SearchKind::as_str).collect::<Vec<_>>().join(",")
        };
        let mut params: Query = vec![("q", query.to_string()), ("type", kinds)];
        if limit > 0 {
            params.push(("limit", limit.min(SPOTIFY_MAX_HISTORY_LIMIT).to_string()));
        }
        self.get_json("/search", &params).await
    }

    /// Best match for `query` among items of `kind`.
    pub async fn search_first(
        &self,
        query: &str,
        kind: SearchKind,
    ) -> SpotifyResult<Option<SearchHit>> {
        Ok(self.search(query, &[kind], 1).await?.first(kind))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback State, Queue & History
    // ─────────────────────────────────────────────────────────────────────────

    /// Current playback. `204` (nothing playing) is an empty state.
    pub async fn playback_state(&self) -> SpotifyResult<PlaybackState> {
        let state: Option<PlayerStateObject> = self.get_optional("/me/player", &[]).await?;
        Ok(state.map(PlayerStateObject::into_state).unwrap_or_default())
    }

    pub async fn queue(&self) -> SpotifyResult<Queue> {
        let res: Option<QueueResponse> = self.get_optional("/me/player/queue", &[]).await?;
        Ok(res.map(QueueResponse::into_queue).unwrap_or_default())
    }

    /// Most recent plays, newest first. `limit` is clamped to `1..=50`.
    pub async fn recently_played(&self, limit: u32) -> SpotifyResult<Vec<HistoryEntry>> {
        let limit = limit.clamp(1, SPOTIFY_MAX_HISTORY_LIMIT);
        let res: RecentlyPlayedResponse = self
            .get_json("/me/player/recently-played", &[("limit", limit.to_string())])
            .await?;
        Ok(res.into_history())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback Control
    // ─────────────────────────────────────────────────────────────────────────

    async fn start(&self, device_id: Option<&str>, request: PlayRequest) -> SpotifyResult<()> {
        let body = serde_json::to_value(request).map_err(|e| SpotifyError::Parse(e.to_string()))?;
        self.put("/me/player/play", &device_query(device_id), Some(body))
            .await
    }

    /// Resumes whatever was playing.
    pub async fn resume(&self, device_id: Option<&str>) -> SpotifyResult<()> {
        self.start(device_id, PlayRequest::default()).await
    }

    /// Plays an album, playlist or artist, optionally from a track index.
    pub async fn play_context(
        &self,
        context_uri: &str,
        offset: Option<u32>,
        device_id: Option<&str>,
    ) -> SpotifyResult<()> {
        let request = PlayRequest {
            context_uri: Some(context_uri.to_string()),
            offset: offset.map(|position| PlayOffset { position }),
            ..Default::default()
        };
        self.start(device_id, request).await
    }

    /// Plays a list of track URIs.
    pub async fn play_uris(&self, uris: &[String], device_id: Option<&str>) -> SpotifyResult<()> {
        let request = PlayRequest {
            uris: Some(uris.to_vec()),
            ..Default::default()
        };
        self.start(device_id, request).await
    }

    pub async fn pause(&self, device_id: Option<&str>) -> SpotifyResult<()> {
        self.put("/me/player/pause", &device_query(device_id), None)
            .await
    }

    pub async fn next(&self, device_id: Option<&str>) -> SpotifyResult<()> {
        self.post("/me/player/next", &device_query(device_id)).await
    }

    pub async fn previous(&self, device_id: Option<&str>) -> SpotifyResult<()> {
        self.post("/me/player/previous", &device_query(device_id))
            .await
    }

    pub async fn seek(&self, position_ms: u64, device_id: Option<&str>) -> SpotifyResult<()> {
        let mut query = vec![("position_ms", position_ms.to_string())];
        query.extend(device_query(device_id));
        self.put("/me/player/seek", &query, None).await
    }

    pub async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> SpotifyResult<()> {
        let mut query = vec![("volume_percent", percent.min(100).to_string())];
        query.extend(device_query(device_id));
        self.put("/me/player/volume", &query, None).await
    }

    pub async fn set_shuffle(&self, state: bool, device_id: Option<&str>) -> SpotifyResult<()> {
        let mut query = vec![("state", state.to_string())];
        query.extend(device_query(device_id));
        self.put("/me/player/shuffle", &query, None).await
    }

    pub async fn add_to_queue(&self, uri: &str, device_id: Option<&str>) -> SpotifyResult<()> {
        let mut query = vec![("uri", uri.to_string())];
        query.extend(device_query(device_id));
        self.post("/me/player/queue", &query).await
    }

    /// Moves playback to `device_id`; `play` starts it there immediately.
    pub async fn transfer_playback(&self, device_id: &str, play: bool) -> SpotifyResult<()> {
        log::info!("[Spotify] Transferring playback to {}", device_id);
        let body = serde_json::to_value(TransferRequest {
            device_ids: vec![device_id.to_string()],
            play,
        })
        .map_err(|e| SpotifyError::Parse(e.to_string()))?;
        self.put("/me/player", &[], Some(body)).await
    }
}
