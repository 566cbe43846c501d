use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::auth::{AuthResult, Csrf, SignInRequest, SignInResponse};

/// Verifies credentials. Implemented by the auth backend.
#[async_trait]
pub trait CredentialsProvider {
    async fn csrf_token(&self) -> super::Result<Csrf>;

    /// Email of a user whose two-factor login is pending, encoded in the
    /// `totp` link they followed.
    async fn totp_email(&self, encoded: &str) -> super::Result<Option<String>>;

    /// `None` when no result could be obtained at all.
    async fn sign_in(&self, request: &SignInRequest) -> Option<AuthResult>;
}

/// Knows whether an SSO (SAML) connection is configured.
#[async_trait]
pub trait SsoDirectory {
    async fn connection_exists(&self) -> super::Result<bool>;
}

#[derive(Clone, Debug)]
pub struct Config {
    url: Url,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: Url::parse("http://127.0.0.1:3000/").expect("literal url should parse"),
        }
    }
}

impl Config {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn env() -> super::Result<Self> {
        let mut url = env::var("AUTH_BACKEND_URL")?;
        if !url.ends_with('/') {
            url.push('/');
        }
        Ok(Self::new(Url::parse(&url)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Auth backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    http: Arc<reqwest::Client>,
    base: Url,
}

impl HttpBackend {
    pub fn try_new(cfg: &Config) -> super::Result<Self> {
        Ok(Self {
            http: Arc::new(super::init_http_client()?),
            base: cfg.url().clone(),
        })
    }

    fn endpoint(&self, path: &str) -> super::Result<Url> {
        Ok(self.base.join(path)?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfResponse {
    csrf_token: Csrf,
}

#[derive(Deserialize)]
struct TotpResponse {
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SsoConnectionsResponse {
    connection_exists: bool,
}

#[async_trait]
impl CredentialsProvider for HttpBackend {
    async fn csrf_token(&self) -> super::Result<Csrf> {
        let response = self
            .http
            .get(self.endpoint("api/auth/csrf")?)
            .send()
            .await?
            .error_for_status()?;

        let r = response.json::<CsrfResponse>().await?;
        debug!("Obtained {:?}", r.csrf_token);
        Ok(r.csrf_token)
    }

    async fn totp_email(&self, encoded: &str) -> super::Result<Option<String>> {
        let response = self
            .http
            .post(self.endpoint("api/auth/totp")?)
            .json(&serde_json::json!({ "totp": encoded }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("Pending two-factor login could not be decoded");
            return Ok(None);
        }

        let r = response.error_for_status()?.json::<TotpResponse>().await?;
        Ok(r.email)
    }

    async fn sign_in(&self, request: &SignInRequest) -> Option<AuthResult> {
        debug!("Signing in '{}' with credentials", request.email());

        let endpoint = match self.endpoint("api/auth/callback/credentials") {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid sign-in endpoint: {e}");
                return None;
            }
        };

        let response = match self.http.post(endpoint).json(request).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Sign-in request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        match response.json::<SignInResponse>().await {
            Ok(r) => sign_in_result(status, r),
            Err(e) => {
                error!("Malformed sign-in response: {e}");
                None
            }
        }
    }
}

/// The HTTP status overrides whatever the body claims about success.
fn sign_in_result(status: StatusCode, mut body: SignInResponse) -> Option<AuthResult> {
    if !status.is_success() {
        body.ok = false;
    }
    if body.status == 0 {
        body.status = status.as_u16();
    }

    let result = body.into_result();
    if result.is_none() {
        warn!("Sign-in answered {status} without a result");
    }
    result
}

#[async_trait]
impl SsoDirectory for HttpBackend {
    async fn connection_exists(&self) -> super::Result<bool> {
        let response = self
            .http
            .get(self.endpoint("api/sso/connections")?)
            .send()
            .await?
            .error_for_status()?;

        let r = response.json::<SsoConnectionsResponse>().await?;
        Ok(r.connection_exists)
    }
}
