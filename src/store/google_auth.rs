//! Access tokens for the Sheets API.
//!
//! A service-account key is traded for a short-lived OAuth token through the
//! JWT-bearer grant. The token is cached and fetched again shortly before it
//! expires, so a run that outlasts one token keeps working.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Scopes requested for the spreadsheet client.
pub const SHEETS_SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Lifetime of a signed assertion; Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// A cached token is replaced once it has less than this left.
const REFRESH_MARGIN_SECS: i64 = 120;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// The parts of a service-account JSON key needed to sign assertions.
pub struct ServiceAccountKey {
    pub client_email: String,
    pub token_uri: String,
    private_key: SecretString,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        let file: KeyFile =
            serde_json::from_str(json).context("Failed to parse service-account key")?;
        if let Some(kind) = file.kind.as_deref().filter(|kind| *kind != "service_account") {
            anyhow::bail!("Expected a service_account key, found type '{kind}'");
        }
        Ok(Self {
            client_email: file.client_email,
            token_uri: file.token_uri,
            private_key: SecretString::from(file.private_key),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read service-account key: {}", path.display())
        })?;
        Self::from_json(&json)
            .with_context(|| format!("Invalid service-account key: {}", path.display()))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Token source backed by a service-account key.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    scopes: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            scopes: SHEETS_SCOPES.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scopes,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.expose_secret().as_bytes())
            .context("Failed to parse service-account private key")?;
        encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .context("Failed to sign token assertion")
    }

    async fn fetch(&self, client: &Client) -> Result<CachedToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let response = client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed ({status}): {body}");
        }
        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        debug!(account = %self.key.client_email, lifetime, "Fetched Sheets access token");
        Ok(CachedToken {
            token: SecretString::from(token.access_token),
            expires_at: now + Duration::seconds(lifetime),
        })
    }

    /// A current access token, fetching a new one when the cached token is
    /// missing or about to expire.
    pub async fn access_token(&self, client: &Client) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let fresh = cached
            .as_ref()
            .is_some_and(|t| t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now());
        if !fresh {
            *cached = Some(self.fetch(client).await?);
        }
        let token = cached
            .as_ref()
            .context("No Sheets access token available")?;
        Ok(token.token.expose_secret().to_string())
    }
}

/// How requests to the Sheets API are authorized.
pub enum SheetsAuth {
    /// A fixed OAuth access token.
    Token(SecretString),
    ServiceAccount(ServiceAccountAuth),
}

impl SheetsAuth {
    pub async fn bearer(&self, client: &Client) -> Result<String> {
        match self {
            SheetsAuth::Token(token) => Ok(token.expose_secret().to_string()),
            SheetsAuth::ServiceAccount(auth) => auth.access_token(client).await,
        }
    }
}
