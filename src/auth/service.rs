use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use email_address::EmailAddress;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;

use super::flow::{LoginFlow, View};
use super::{Credentials, Csrf, Error, FlowId, LastUsed, SignInRequest};
use crate::integration::Features;
use crate::integration::backend::{CredentialsProvider, SsoDirectory};
use crate::integration::idp::{Authorization, OAuthProvider};
use crate::locale::{Locale, Messages};
use crate::redirect::Resolver;
use crate::Raw;

const FLOW_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_FLOWS: usize = 10_000;

type Flows = Arc<RwLock<HashMap<FlowId, LoginFlow>>>;

/// Query of the login page.
#[derive(Debug, Default)]
pub struct PageQuery {
    pub callback_url: String,
    pub totp: Option<String>,
    pub last_used: Option<LastUsed>,
}

/// Everything the login page needs to render its first state.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginPage {
    pub csrf_token: Csrf,
    pub is_google_login_enabled: bool,
    pub is_saml_login_enabled: bool,
    pub display_sso_login: bool,
    pub saml_tenant_id: String,
    pub saml_product_id: String,
    pub totp_email: Option<String>,
    pub last_used: Option<LastUsed>,
    pub callback_url: String,
    pub view: View,
}

/// An OAuth login about to start, with the callback the flow resolved.
#[derive(Debug)]
pub struct OAuthStart {
    pub authorization: Authorization,
    pub callback_url: String,
}

#[async_trait]
pub trait LoginService {
    async fn page(&self, query: PageQuery) -> super::Result<LoginPage>;

    async fn submit(&self, id: &FlowId, credentials: Credentials) -> super::Result<View>;

    async fn go_back(&self, id: &FlowId) -> super::Result<View>;

    async fn lost_access(&self, id: &FlowId) -> super::Result<View>;

    async fn google(&self, id: &FlowId) -> super::Result<OAuthStart>;
}

#[derive(Clone)]
pub struct LoginServiceImpl {
    features: Arc<Features>,
    resolver: Resolver,
    locale: Arc<Locale>,
    messages: Arc<Messages>,
    credentials: Arc<dyn CredentialsProvider + Send + Sync>,
    sso: Arc<dyn SsoDirectory + Send + Sync>,
    google: Option<Arc<dyn OAuthProvider + Send + Sync>>,
    flows: Flows,
    max_flows: usize,
}

impl LoginServiceImpl {
    pub fn new(
        features: Features,
        resolver: Resolver,
        locale: Locale,
        credentials: Arc<dyn CredentialsProvider + Send + Sync>,
        sso: Arc<dyn SsoDirectory + Send + Sync>,
        google: Option<Arc<dyn OAuthProvider + Send + Sync>>,
    ) -> Self {
        Self {
            features: Arc::new(features),
            resolver,
            messages: Arc::new(Messages::new(&locale)),
            locale: Arc::new(locale),
            credentials,
            sso,
            google,
            flows: Arc::new(RwLock::new(HashMap::new())),
            max_flows: MAX_FLOWS,
        }
    }

    /// Caps the number of live flows. The oldest flow is evicted first.
    pub fn with_max_flows(mut self, max_flows: usize) -> Self {
        self.max_flows = max_flows;
        self
    }
}

#[async_trait]
impl LoginService for LoginServiceImpl {
    async fn page(&self, query: PageQuery) -> super::Result<LoginPage> {
        let callback_url = self.resolver.resolve(&query.callback_url);
        let csrf_token = self.credentials.csrf_token().await?;
        let totp_email = match query.totp.as_deref() {
            Some(encoded) => self.credentials.totp_email(encoded).await?,
            None => None,
        };

        let mut flow = LoginFlow::new(FlowId::random(), &callback_url, totp_email.is_some());
        let display_sso_login = self.display_sso_login(&mut flow).await;
        let view = flow.view();

        self.open(flow).await;

        Ok(LoginPage {
            csrf_token,
            is_google_login_enabled: self.google_enabled(),
            is_saml_login_enabled: self.features.saml_login,
            display_sso_login,
            saml_tenant_id: self.features.saml_tenant_id.clone(),
            saml_product_id: self.features.saml_product_id.clone(),
            totp_email,
            last_used: query.last_used,
            callback_url,
            view,
        })
    }

    async fn submit(&self, id: &FlowId, credentials: Credentials) -> super::Result<View> {
        self.validate(&credentials)?;

        let callback_url = {
            let mut flows = self.flows.write().await;
            let flow = flows
                .get_mut(id)
                .ok_or_else(|| Error::FlowNotFound(id.clone()))?;
            flow.begin_submit(
                credentials.totp_code.clone(),
                credentials.backup_code.clone(),
            )?;
            flow.callback_url().to_string()
        };

        let pending = PendingSubmit {
            flows: self.flows.clone(),
            id: id.clone(),
            armed: true,
        };
        let request = SignInRequest::new(credentials, callback_url);
        let result = self.credentials.sign_in(&request).await;

        let mut flows = self.flows.write().await;
        pending.disarm();
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| Error::FlowNotFound(id.clone()))?;
        flow.dispatch(result, &self.messages);
        let view = flow.view();

        if view.redirect_to.is_some() {
            info!("Flow {id} signed in '{}'", request.email());
            flows.remove(id);
        }

        Ok(view)
    }

    async fn go_back(&self, id: &FlowId) -> super::Result<View> {
        let mut flows = self.flows.write().await;
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| Error::FlowNotFound(id.clone()))?;

        flow.go_back()?;
        Ok(flow.view())
    }

    async fn lost_access(&self, id: &FlowId) -> super::Result<View> {
        let mut flows = self.flows.write().await;
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| Error::FlowNotFound(id.clone()))?;

        flow.lose_access()?;
        Ok(flow.view())
    }

    async fn google(&self, id: &FlowId) -> super::Result<OAuthStart> {
        let google = match &self.google {
            Some(g) if self.features.google_login => g,
            _ => return Err(Error::GoogleLoginDisabled),
        };

        let callback_url = {
            let flows = self.flows.read().await;
            let flow = flows
                .get(id)
                .ok_or_else(|| Error::FlowNotFound(id.clone()))?;
            flow.callback_url().to_string()
        };

        let authorization = google.authorize().await?;
        debug!("Flow {id} continues with google");

        Ok(OAuthStart {
            authorization,
            callback_url,
        })
    }
}

impl LoginServiceImpl {
    fn google_enabled(&self) -> bool {
        self.features.google_login && self.google.is_some()
    }

    /// A failed lookup is shown on the page instead of failing it.
    async fn display_sso_login(&self, flow: &mut LoginFlow) -> bool {
        if self.features.hosted {
            return true;
        }

        if !self.features.saml_login {
            return false;
        }

        match self.sso.connection_exists().await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to look up SSO connections: {e}");
                flow.alert(self.messages.generic());
                false
            }
        }
    }

    fn validate(&self, c: &Credentials) -> super::Result<()> {
        let invalid = |field, key: &str| Error::InvalidInput {
            field,
            message: self.locale.t(key),
        };

        if c.email.trim().is_empty() {
            return Err(invalid("email", "error_required_field"));
        }
        if !EmailAddress::is_valid(c.email.trim()) {
            return Err(invalid("email", "enter_valid_email"));
        }
        if c.password.raw().is_empty() {
            return Err(invalid("password", "error_required_field"));
        }

        Ok(())
    }

    async fn open(&self, flow: LoginFlow) {
        let mut flows = self.flows.write().await;

        let before = flows.len();
        flows.retain(|_, f| f.created_at().elapsed() < FLOW_TTL);
        let pruned = before - flows.len();
        if pruned > 0 {
            debug!("Pruned {pruned} expired login flows");
        }

        while flows.len() >= self.max_flows {
            let oldest = flows
                .values()
                .min_by_key(|f| f.created_at())
                .map(|f| f.id().clone());
            let Some(oldest) = oldest else { break };

            warn!("Too many login flows, evicting {oldest}");
            flows.remove(&oldest);
        }

        debug!("Opened login flow {}", flow.id());
        flows.insert(flow.id().clone(), flow);
    }
}

/// Releases the flow when a submission is dropped before its result is
/// dispatched, e.g. when the client disconnects mid-request.
struct PendingSubmit {
    flows: Flows,
    id: FlowId,
    armed: bool,
}

impl PendingSubmit {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSubmit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("Submission for flow {} was abandoned", self.id);
        if let Ok(mut flows) = self.flows.try_write() {
            if let Some(flow) = flows.get_mut(&self.id) {
                flow.abandon_submit();
            }
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let flows = self.flows.clone();
            let id = self.id.clone();
            handle.spawn(async move {
                if let Some(flow) = flows.write().await.get_mut(&id) {
                    flow.abandon_submit();
                }
            });
        }
    }
}
