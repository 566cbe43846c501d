use std::sync::Arc;

use axum::extract::FromRef;
use log::info;

use crate::auth;
use crate::auth::service::LoginServiceImpl;
use crate::integration::backend::HttpBackend;
use crate::integration::idp::{self, OAuthProvider};
use crate::integration::{self, Config};
use crate::locale::Locale;
use crate::redirect::Resolver;

#[derive(Clone)]
pub struct AppState {
    login_service: auth::Service,
}

impl AppState {
    pub fn new(login_service: auth::Service) -> Self {
        Self { login_service }
    }

    pub fn init(cfg: &Config) -> integration::Result<Self> {
        let backend = Arc::new(HttpBackend::try_new(&cfg.backend)?);
        let google = match &cfg.idp {
            Some(idp) => {
                let google: Arc<dyn OAuthProvider + Send + Sync> =
                    Arc::new(idp::Google::try_new(idp)?);
                Some(google)
            }
            None => None,
        };

        let resolver = Resolver::new(cfg.origins.webapp.clone(), cfg.origins.allow_list());
        info!("Post-login redirects default to {}", cfg.origins.webapp);

        let login_service = LoginServiceImpl::new(
            cfg.features.clone(),
            resolver,
            Locale::english(),
            backend.clone(),
            backend,
            google,
        );

        Ok(Self::new(Arc::new(login_service)))
    }
}

impl FromRef<AppState> for auth::Service {
    fn from_ref(s: &AppState) -> Self {
        s.login_service.clone()
    }
}
