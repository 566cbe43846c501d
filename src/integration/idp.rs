use std::env;

use async_trait::async_trait;
use log::debug;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet, RedirectUrl, Scope,
    StandardRevocableToken, TokenUrl,
    basic::{
        BasicClient, BasicErrorResponse, BasicRevocationErrorResponse,
        BasicTokenIntrospectionResponse, BasicTokenResponse,
    },
};

use crate::auth::Csrf;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Where to send the browser to start an OAuth login, and the state value
/// the provider will echo back.
#[derive(Debug)]
pub struct Authorization {
    pub url: String,
    pub state: Csrf,
}

#[async_trait]
pub trait OAuthProvider {
    async fn authorize(&self) -> super::Result<Authorization>;
}

#[derive(Clone, Debug)]
pub struct Config {
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    redirect_url: String,
}

impl Config {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: GOOGLE_AUTH_URL.into(),
            token_url: GOOGLE_TOKEN_URL.into(),
            redirect_url: redirect_url.into(),
        }
    }

    pub fn env() -> super::Result<Self> {
        Ok(Self::new(
            env::var("GOOGLE_CLIENT_ID")?,
            env::var("GOOGLE_CLIENT_SECRET")?,
            env::var("GOOGLE_REDIRECT_URL")?,
        ))
    }
}

pub type OAuth2Client<
    HasAuthUrl = EndpointSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasIntrospectionUrl = EndpointNotSet,
    HasRevocationUrl = EndpointNotSet,
    HasTokenUrl = EndpointSet,
> = oauth2::Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

impl Config {
    pub fn init_client(&self) -> super::Result<OAuth2Client> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(self.auth_url.clone())?)
            .set_token_uri(TokenUrl::new(self.token_url.clone())?)
            .set_redirect_uri(RedirectUrl::new(self.redirect_url.clone())?);

        Ok(client)
    }
}

pub struct Google {
    oauth2: OAuth2Client,
}

impl Google {
    pub fn try_new(cfg: &Config) -> super::Result<Self> {
        Ok(Self {
            oauth2: cfg.init_client()?,
        })
    }
}

#[async_trait]
impl OAuthProvider for Google {
    async fn authorize(&self) -> super::Result<Authorization> {
        let (auth_url, csrf) = self
            .oauth2
            .authorize_url(CsrfToken::new_random)
            .add_scopes([
                Scope::new("openid".to_string()),
                Scope::new("profile".to_string()),
                Scope::new("email".to_string()),
            ])
            .url();

        let state = Csrf::from(csrf);
        debug!("Starting google login with state {state:?}");

        Ok(Authorization {
            url: auth_url.to_string(),
            state,
        })
    }
}

impl From<CsrfToken> for Csrf {
    fn from(csrf: CsrfToken) -> Self {
        Self::new(csrf.into_secret())
    }
}
