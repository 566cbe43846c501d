use axum::http::StatusCode;

impl From<&super::Error> for StatusCode {
    fn from(e: &super::Error) -> Self {
        match e {
            super::Error::FlowNotFound(_) => Self::NOT_FOUND,
            super::Error::MissingFlow
            | super::Error::InvalidInput { .. }
            | super::Error::UnknownLoginMethod(_)
            | super::Error::_Uuid(_) => Self::BAD_REQUEST,
            super::Error::SubmissionInFlight | super::Error::ActionNotAllowed(_) => Self::CONFLICT,
            super::Error::GoogleLoginDisabled => Self::FORBIDDEN,
            super::Error::_Integration(_) => Self::BAD_GATEWAY,
        }
    }
}

pub(super) mod api {
    use axum::Form;
    use axum::Json;
    use axum::extract::State;
    use axum::response::{IntoResponse, Redirect};
    use axum_extra::extract::cookie::{Cookie, SameSite};
    use axum_extra::extract::{CookieJar, Query};
    use log::debug;
    use serde::Deserialize;

    use crate::Raw;
    use crate::auth::flow::UiState;
    use crate::auth::service::PageQuery;
    use crate::auth::{self, Credentials, FlowId, LastUsed};

    const CALLBACK_URL_COOKIE: &str = "callback_url";
    const OAUTH_STATE_COOKIE: &str = "oauth_state";

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Params {
        callback_url: Option<String>,
        totp: Option<String>,
    }

    pub async fn page(
        Query(params): Query<Params>,
        login_service: State<auth::Service>,
        jar: CookieJar,
    ) -> crate::Result<impl IntoResponse> {
        let last_used = jar
            .get(LastUsed::COOKIE)
            .and_then(|c| LastUsed::try_from(c).ok());

        let page = login_service
            .page(PageQuery {
                callback_url: params.callback_url.unwrap_or_default(),
                totp: params.totp,
                last_used,
            })
            .await?;

        let flow = Cookie::from(&page.view.flow_id);
        Ok((jar.add(flow), Json(page)))
    }

    pub async fn submit(
        login_service: State<auth::Service>,
        jar: CookieJar,
        Form(credentials): Form<Credentials>,
    ) -> crate::Result<impl IntoResponse> {
        let id = flow_id(&jar)?;
        debug!("Submitting credentials for flow {id}");

        let view = login_service.submit(&id, credentials).await?;

        let jar = if view.state == UiState::Authenticated {
            jar.add(LastUsed::Credentials)
                .remove(Cookie::build(FlowId::COOKIE).path("/"))
        } else {
            jar
        };

        Ok((jar, Json(view)))
    }

    pub async fn go_back(
        login_service: State<auth::Service>,
        jar: CookieJar,
    ) -> crate::Result<impl IntoResponse> {
        let id = flow_id(&jar)?;
        Ok(Json(login_service.go_back(&id).await?))
    }

    pub async fn lost_access(
        login_service: State<auth::Service>,
        jar: CookieJar,
    ) -> crate::Result<impl IntoResponse> {
        let id = flow_id(&jar)?;
        Ok(Json(login_service.lost_access(&id).await?))
    }

    pub async fn google(
        login_service: State<auth::Service>,
        jar: CookieJar,
    ) -> crate::Result<impl IntoResponse> {
        let id = flow_id(&jar)?;
        let start = login_service.google(&id).await?;

        let jar = jar
            .add(LastUsed::Google)
            .add(transient(CALLBACK_URL_COOKIE, start.callback_url))
            .add(transient(
                OAUTH_STATE_COOKIE,
                start.authorization.state.raw().to_string(),
            ));

        Ok((jar, Redirect::to(&start.authorization.url)))
    }

    fn flow_id(jar: &CookieJar) -> auth::Result<FlowId> {
        let c = jar.get(FlowId::COOKIE).ok_or(auth::Error::MissingFlow)?;
        FlowId::try_from(c)
    }

    /// Session cookie read by the auth backend when the provider calls back.
    /// The jar percent-encodes its value.
    fn transient(name: &'static str, value: String) -> Cookie<'static> {
        let mut c = Cookie::new(name, value);
        c.set_path("/");
        c.set_secure(true);
        c.set_http_only(true);
        c.set_same_site(SameSite::Lax);
        c
    }
}
