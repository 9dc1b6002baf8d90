//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! [`Pkce::generate`] creates the verifier, challenge and state for one login
//! attempt; [`authorize_url`] builds the browser URL; [`AuthClient`] talks to
//! the accounts service's token endpoint.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::{SpotifyError, SpotifyResult};
use crate::protocol_constants::{
    OAUTH_STATE_LEN, PKCE_VERIFIER_LEN, SPOTIFY_ACCOUNTS_BASE, TOKEN_EXPIRY_BUFFER,
};

// ─────────────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────────────

/// An OAuth token as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Lifetime in seconds as issued.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// True once `now` is within the safety buffer of `expires_at`.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let buffer = chrono::Duration::from_std(TOKEN_EXPIRY_BUFFER).unwrap_or_default();
        now + buffer >= self.expires_at
    }
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    scope: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> Token {
        let refresh_token = match self.refresh_token {
            Some(r) if !r.is_empty() => r,
            _ => previous_refresh.unwrap_or_default().to_string(),
        };
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            scope: self.scope,
            expires_in: self.expires_in,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PKCE
// ─────────────────────────────────────────────────────────────────────────────

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
        .collect()
}

/// Per-login PKCE material.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl Pkce {
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_string(PKCE_VERIFIER_LEN);
        Self {
            challenge: challenge_for(&verifier),
            verifier,
            state: random_string(OAUTH_STATE_LEN),
        }
    }
}

/// S256 challenge: unpadded base64url of the verifier's SHA-256.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Builds the browser authorization URL.
pub fn authorize_url(
    accounts_base: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[&str],
    pkce: &Pkce,
) -> SpotifyResult<String> {
    let mut url = Url::parse(&format!("{accounts_base}/authorize"))
        .map_err(|e| SpotifyError::Auth(format!("invalid accounts URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("code_challenge_method", "S256")
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("state", &pkce.state)
        .append_pair("scope", &scopes.join(" "));
    Ok(url.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Token endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the accounts service token endpoint.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    accounts_base: String,
    client_id: String,
    redirect_uri: String,
}

impl AuthClient {
    #[must_use]
    pub fn new(client: Client, client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client,
            accounts_base: SPOTIFY_ACCOUNTS_BASE.to_string(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Points the client at a different accounts host.
    #[must_use]
    pub fn with_accounts_base(mut self, base: impl Into<String>) -> Self {
        self.accounts_base = base.into();
        self
    }

    /// The shared HTTP client, reused for Web API calls.
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn accounts_base(&self) -> &str {
        &self.accounts_base
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Trades an authorization code for a token.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> SpotifyResult<Token> {
        log::info!("[Auth] Exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", verifier),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_token(None))
    }

    /// Obtains a fresh access token, keeping the old refresh token when the
    /// response omits a new one.
    pub async fn refresh(&self, token: &Token) -> SpotifyResult<Token> {
        if token.refresh_token.is_empty() {
            return Err(SpotifyError::Auth("no refresh token".into()));
        }
        log::debug!("[Auth] Refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_token(Some(&token.refresh_token)))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> SpotifyResult<TokenResponse> {
        let res = self
            .client
            .post(format!("{}/api/token", self.accounts_base))
            .form(form)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(SpotifyError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                token_error_message(&body)
            )));
        }
        serde_json::from_str(&body).map_err(|e| SpotifyError::Parse(e.to_string()))
    }
}

/// Extracts `error_description` (or `error`) from an OAuth error body.
fn token_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct OAuthError {
        error: Option<String>,
        error_description: Option<String>,
    }
    serde_json::from_str::<OAuthError>(body)
        .ok()
        .and_then(|e| e.error_description.or(e.error))
        .unwrap_or_else(|| body.to_string())
}
