use std::env;
use std::str::FromStr;
use std::time::Duration;
use std::{fs::File, net::SocketAddr};

use axum::http::HeaderValue;
use axum_server::tls_openssl::OpenSSLConfig;
use dotenv::dotenv;
use log::{LevelFilter, warn};
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};
use url::Url;

use crate::redirect::AllowList;

pub mod backend;
pub mod idp;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub enum Env {
    Local,
    Dev,
    Stage,
    Production,
}

impl FromStr for Env {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Env::Local),
            "dev" => Ok(Env::Dev),
            "stg" => Ok(Env::Stage),
            "prod" => Ok(Env::Production),
            _ => Err(Error::InvalidEnv(s.to_string())),
        }
    }
}

impl Env {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Env::Local => SocketAddr::from(([127, 0, 0, 1], 8000)),
            Env::Dev | Env::Stage => SocketAddr::from(([0, 0, 0, 0], 8000)),
            Env::Production => SocketAddr::from(([0, 0, 0, 0], 8443)),
        }
    }

    pub fn ssl_config(&self) -> Result<Option<OpenSSLConfig>> {
        match self {
            Env::Local | Env::Dev | Env::Stage => Ok(None),
            Env::Production => {
                let ssl_config =
                    load_tls(&env::var("SSL_CERT_FILE")?, &env::var("SSL_KEY_FILE")?)?;
                Ok(Some(ssl_config))
            }
        }
    }

    pub fn allow_origin(&self) -> Result<AllowOrigin> {
        match self {
            Env::Local | Env::Dev => Ok(AllowOrigin::any()),
            Env::Stage | Env::Production => {
                let origins = env::var("ALLOW_ORIGIN")?
                    .split(',')
                    .map(HeaderValue::from_str)
                    .collect::<std::result::Result<Vec<HeaderValue>, _>>()?;
                Ok(AllowOrigin::list(origins))
            }
        }
    }

    pub fn allow_methods(&self) -> AllowMethods {
        AllowMethods::any()
    }

    pub fn allow_headers(&self) -> AllowHeaders {
        AllowHeaders::any()
    }
}

fn load_tls(cert: &str, key: &str) -> Result<OpenSSLConfig> {
    OpenSSLConfig::from_pem_file(cert, key)
        .map_err(|e| Error::InvalidTls(format!("{cert}, {key}: {e}")))
}

/// Origins the application is served from. Post-login redirects may only
/// target one of these.
#[derive(Clone, Debug)]
pub struct Origins {
    pub webapp: Url,
    pub website: Url,
    pub console: Url,
    pub embed: Url,
}

impl Default for Origins {
    fn default() -> Self {
        let local = Url::parse("http://localhost:3000").expect("literal url should parse");
        Self {
            webapp: local.clone(),
            website: local.clone(),
            console: local.clone(),
            embed: local,
        }
    }
}

impl Origins {
    pub fn env() -> Result<Self> {
        let webapp = Url::parse(&env::var("WEBAPP_URL")?)?;
        let or_webapp = |name: &str| -> Result<Url> {
            match env::var(name) {
                Ok(v) => Ok(Url::parse(&v)?),
                Err(_) => Ok(webapp.clone()),
            }
        };

        Ok(Self {
            website: or_webapp("WEBSITE_URL")?,
            console: or_webapp("CONSOLE_URL")?,
            embed: or_webapp("EMBED_LIB_URL")?,
            webapp,
        })
    }

    pub fn allow_list(&self) -> AllowList {
        AllowList::new([&self.webapp, &self.website, &self.console, &self.embed])
    }
}

/// Login options exposed to the page.
#[derive(Clone, Debug)]
pub struct Features {
    pub hosted: bool,
    pub google_login: bool,
    pub saml_login: bool,
    pub saml_tenant_id: String,
    pub saml_product_id: String,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            hosted: false,
            google_login: false,
            saml_login: false,
            saml_tenant_id: "app".into(),
            saml_product_id: "app".into(),
        }
    }
}

impl Features {
    pub fn env() -> Self {
        let d = Self::default();
        Self {
            hosted: flag("HOSTED_FEATURES"),
            google_login: flag("GOOGLE_LOGIN_ENABLED"),
            saml_login: flag("SAML_LOGIN_ENABLED"),
            saml_tenant_id: env::var("SAML_TENANT_ID").unwrap_or(d.saml_tenant_id),
            saml_product_id: env::var("SAML_PRODUCT_ID").unwrap_or(d.saml_product_id),
        }
    }
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct Config {
    pub env: Env,

    pub origins: Origins,
    pub features: Features,
    pub backend: backend::Config,

    pub idp: Option<idp::Config>,
}

impl Default for Config {
    fn default() -> Self {
        dotenv().ok();
        init_logger();

        let env = env::var("ENV")
            .map(|env| env.parse().expect("ENV should be one of local|dev|stg|prod"))
            .unwrap_or(Env::Local);

        let features = Features::env();
        let idp = match idp::Config::env() {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                if features.google_login {
                    warn!("Google login is enabled but not configured: {e}");
                }
                None
            }
        };

        Self {
            env,
            origins: Origins::env().unwrap_or_default(),
            features,
            backend: backend::Config::env().unwrap_or_default(),
            idp,
        }
    }
}

fn init_logger() {
    let rust_log = env::var("RUST_LOG").unwrap_or("info".into());
    let level = LevelFilter::from_str(&rust_log).unwrap_or(LevelFilter::Info);
    let log_file = env::var("SERVICE_NAME")
        .map(|pkg| format!("{pkg}.log"))
        .unwrap_or("login_service.log".into());

    CombinedLogger::init(vec![
        TermLogger::new(
            level,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            level,
            simplelog::Config::default(),
            File::create(log_file).expect("Failed to create log file"),
        ),
    ])
    .expect("Failed to initialize logger");
}

pub fn init_http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(5))
        .build()?;

    Ok(client)
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid environment: {0}")]
    InvalidEnv(String),
    #[error("invalid TLS material: {0}")]
    InvalidTls(String),

    #[error(transparent)]
    _Env(#[from] env::VarError),
    #[error(transparent)]
    _Url(#[from] url::ParseError),
    #[error(transparent)]
    _HeaderValue(#[from] axum::http::header::InvalidHeaderValue),
    #[error(transparent)]
    _Io(#[from] std::io::Error),
    #[error(transparent)]
    _Reqwest(#[from] reqwest::Error),
}
