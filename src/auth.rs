use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

/// Assumed token lifetime when the token endpoint does not report one.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);
/// Tokens are refreshed this long before they expire.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

/// Bearer-token source for the inventory service.
pub enum TokenSource {
    /// No Authorization header at all.
    Anonymous,
    /// A fixed token; this is the OAuth-bypass mode used by tests.
    Static(String),
    /// OAuth2 client-credentials grant against a token endpoint.
    ClientCredentials(Box<ClientCredentials>),
}

impl TokenSource {
    pub fn anonymous() -> Self {
        TokenSource::Anonymous
    }

    pub fn static_token(token: impl Into<String>) -> Self {
        TokenSource::Static(token.into())
    }

    pub fn client_credentials(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fwsync")
            .timeout(Duration::from_secs(30))
            .build()
            .context("building token HTTP client")?;
        Ok(TokenSource::ClientCredentials(Box::new(ClientCredentials {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            audience: audience.into(),
            client,
            cached: Mutex::new(None),
        })))
    }

    /// Adds the Authorization header to `request` when this source carries
    /// one.
    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match self {
            TokenSource::Anonymous => request,
            TokenSource::Static(token) => request.bearer_auth(token),
            TokenSource::ClientCredentials(grant) => request.bearer_auth(grant.bearer().await?),
        })
    }
}

pub struct ClientCredentials {
    token_url: String,
    client_id: String,
    client_secret: String,
    audience: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl ClientCredentials {
    async fn bearer(&self) -> Result<String> {
        if let Some(cached) = self.cached.lock().as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        debug!(token_url = %self.token_url, "requesting access token");
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("audience", self.audience.as_str()),
            ])
            .send()
            .await
            .context("token request failed")?
            .error_for_status()
            .context("token request rejected")?;
        let token: TokenResponse = resp.json().await.context("parsing token response")?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_LEEWAY);
        *self.cached.lock() = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }
}
