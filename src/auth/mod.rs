use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::integration;
use crate::state::AppState;
use crate::{Raw, Redact};

pub mod flow;
mod handler;
pub mod service;

pub type Result<T> = std::result::Result<T, Error>;
pub type Service = Arc<dyn service::LoginService + Send + Sync>;

pub fn api<S>(s: AppState) -> Router<S> {
    Router::new()
        .route("/login", get(handler::api::page))
        .route("/login", post(handler::api::submit))
        .route("/login/back", post(handler::api::go_back))
        .route("/login/lost-access", post(handler::api::lost_access))
        .route("/login/google", get(handler::api::google))
        .with_state(s)
}

/// Business error codes reported by the auth backend on a failed sign-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    IncorrectEmailPassword,
    UserNotFound,
    IncorrectPassword,
    MissingPassword,
    SecondFactorRequired,
    IncorrectTwoFactorCode,
    IncorrectBackupCode,
    MissingBackupCodes,
    InternalServerError,
    ThirdPartyIdentityProviderEnabled,
    RateLimitExceeded,
    SocialIdentityProviderRequired,
    UserAccountLocked,
}

impl ErrorCode {
    const ALL: [ErrorCode; 13] = [
        Self::IncorrectEmailPassword,
        Self::UserNotFound,
        Self::IncorrectPassword,
        Self::MissingPassword,
        Self::SecondFactorRequired,
        Self::IncorrectTwoFactorCode,
        Self::IncorrectBackupCode,
        Self::MissingBackupCodes,
        Self::InternalServerError,
        Self::ThirdPartyIdentityProviderEnabled,
        Self::RateLimitExceeded,
        Self::SocialIdentityProviderRequired,
        Self::UserAccountLocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncorrectEmailPassword => "incorrect-email-password",
            Self::UserNotFound => "user-not-found",
            Self::IncorrectPassword => "incorrect-password",
            Self::MissingPassword => "missing-password",
            Self::SecondFactorRequired => "second-factor-required",
            Self::IncorrectTwoFactorCode => "incorrect-two-factor-code",
            Self::IncorrectBackupCode => "incorrect-backup-code",
            Self::MissingBackupCodes => "missing-backup-codes",
            Self::InternalServerError => "internal-server-error",
            Self::ThirdPartyIdentityProviderEnabled => "third-party-identity-provider-enabled",
            Self::RateLimitExceeded => "rate-limit-exceeded",
            Self::SocialIdentityProviderRequired => "social-identity-provider-required",
            Self::UserAccountLocked => "user-account-locked",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Outcome of one credential submission. A transport failure is modelled as
/// the absence of a result (`Option<AuthResult>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    Error(ErrorCode),
    Unrecognized(String),
}

/// Sign-in response as returned by the auth backend.
#[derive(Deserialize, Debug)]
pub struct SignInResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub status: u16,
    pub error: Option<String>,
    pub url: Option<String>,
}

impl SignInResponse {
    /// Only an explicit success counts as one. A body without an error code
    /// that does not report `ok` with a 2xx status yields no result.
    pub fn into_result(self) -> Option<AuthResult> {
        match self.error {
            Some(e) => Some(match e.parse() {
                Ok(code) => AuthResult::Error(code),
                Err(raw) => AuthResult::Unrecognized(raw),
            }),
            None if self.ok && (200..300).contains(&self.status) => Some(AuthResult::Ok),
            None => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FlowId(Uuid);

impl FlowId {
    const COOKIE: &str = "login_flow";

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl TryFrom<&Cookie<'_>> for FlowId {
    type Error = Error;

    fn try_from(c: &Cookie<'_>) -> std::result::Result<Self, Self::Error> {
        c.value().parse()
    }
}

impl From<&FlowId> for Cookie<'_> {
    fn from(id: &FlowId) -> Self {
        let mut c = Cookie::new(FlowId::COOKIE, id.to_string());
        c.set_path("/");
        c.set_secure(true);
        c.set_http_only(true);
        c.set_same_site(SameSite::Lax);
        c
    }
}

/// Login method the browser used last, shown as a hint on the next visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastUsed {
    Credentials,
    Google,
    Saml,
}

impl LastUsed {
    const COOKIE: &str = "last_used";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Google => "google",
            Self::Saml => "saml",
        }
    }
}

impl TryFrom<&Cookie<'_>> for LastUsed {
    type Error = Error;

    fn try_from(c: &Cookie<'_>) -> std::result::Result<Self, Self::Error> {
        match c.value() {
            "credentials" => Ok(Self::Credentials),
            "google" => Ok(Self::Google),
            "saml" => Ok(Self::Saml),
            other => Err(Error::UnknownLoginMethod(other.to_string())),
        }
    }
}

impl From<LastUsed> for Cookie<'_> {
    fn from(m: LastUsed) -> Self {
        let mut c = Cookie::new(LastUsed::COOKIE, m.as_str());
        c.set_path("/");
        c.set_same_site(SameSite::Lax);
        c
    }
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Raw for Password {
    fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// TOTP or backup code typed by the user.
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct OneTimeCode(String);

impl OneTimeCode {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Redact for OneTimeCode {}

impl Raw for OneTimeCode {
    fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OneTimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneTimeCode({})", self.redact())
    }
}

#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct Csrf(String);

impl Csrf {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Redact for Csrf {}

impl Raw for Csrf {
    fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Csrf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Csrf({})", self.redact())
    }
}

/// Values of the login form. Empty code fields are sent by the browser as
/// empty strings and mean "not provided".
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    pub password: Password,
    #[serde(default, deserialize_with = "non_empty")]
    pub totp_code: Option<OneTimeCode>,
    #[serde(default, deserialize_with = "non_empty")]
    pub backup_code: Option<OneTimeCode>,
    pub csrf_token: Csrf,
}

fn non_empty<'de, D>(deserializer: D) -> std::result::Result<Option<OneTimeCode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(OneTimeCode))
}

/// Payload of the credential sign-in call.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    email: String,
    password: Password,
    #[serde(skip_serializing_if = "Option::is_none")]
    totp_code: Option<OneTimeCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backup_code: Option<OneTimeCode>,
    csrf_token: Csrf,
    callback_url: String,
    redirect: bool,
}

impl SignInRequest {
    pub fn new(c: Credentials, callback_url: impl Into<String>) -> Self {
        Self {
            email: c.email,
            password: c.password,
            totp_code: c.totp_code,
            backup_code: c.backup_code,
            csrf_token: c.csrf_token,
            callback_url: callback_url.into(),
            redirect: false,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("login flow not found: {0}")]
    FlowNotFound(FlowId),
    #[error("login flow cookie is missing")]
    MissingFlow,
    #[error("a sign-in attempt is already in progress")]
    SubmissionInFlight,
    #[error("action is not available at step {0:?}")]
    ActionNotAllowed(flow::Step),
    #[error("{field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },
    #[error("unknown login method: {0}")]
    UnknownLoginMethod(String),
    #[error("google login is disabled")]
    GoogleLoginDisabled,

    #[error(transparent)]
    _Integration(#[from] integration::Error),

    #[error(transparent)]
    _Uuid(#[from] uuid::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_parse_known_error_codes() {
        for code in ErrorCode::ALL {
            assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(code));
        }
    }

    #[test]
    fn should_keep_unknown_error_code_raw() {
        let actual = "brand-new-code".parse::<ErrorCode>();

        assert_eq!(actual, Err("brand-new-code".to_string()));
    }

    #[test]
    fn should_map_sign_in_response_to_auth_result() {
        let ok: SignInResponse =
            serde_json::from_str(r#"{"ok":true,"status":200,"error":null,"url":"/"}"#).unwrap();
        let second_factor: SignInResponse =
            serde_json::from_str(r#"{"ok":false,"status":401,"error":"second-factor-required"}"#)
                .unwrap();
        let unknown: SignInResponse =
            serde_json::from_str(r#"{"ok":false,"status":401,"error":"CredentialsSignin"}"#)
                .unwrap();

        assert_eq!(ok.into_result(), Some(AuthResult::Ok));
        assert_eq!(
            second_factor.into_result(),
            Some(AuthResult::Error(ErrorCode::SecondFactorRequired))
        );
        assert_eq!(
            unknown.into_result(),
            Some(AuthResult::Unrecognized("CredentialsSignin".to_string()))
        );
    }

    #[test]
    fn should_not_treat_failed_response_without_error_as_success() {
        let failed: SignInResponse =
            serde_json::from_str(r#"{"ok":false,"status":500,"error":null}"#).unwrap();
        let foreign: SignInResponse =
            serde_json::from_str(r#"{"message":"Internal Server Error"}"#).unwrap();
        let ok_with_bad_status: SignInResponse =
            serde_json::from_str(r#"{"ok":true,"status":502,"error":null}"#).unwrap();

        assert_eq!(failed.into_result(), None);
        assert_eq!(foreign.into_result(), None);
        assert_eq!(ok_with_bad_status.into_result(), None);
    }

    #[test]
    fn should_treat_blank_codes_as_absent() {
        let actual: Credentials = serde_json::from_str(
            r#"{"email":"jora@app.test","password":"pw","totpCode":"  ","backupCode":"","csrfToken":"t"}"#,
        )
        .unwrap();

        assert!(actual.totp_code.is_none());
        assert!(actual.backup_code.is_none());
    }

    #[test]
    fn should_not_leak_secrets_in_debug() {
        let credentials = Credentials {
            email: "jora@app.test".into(),
            password: Password::new("hunter2"),
            totp_code: Some(OneTimeCode::new("123456")),
            backup_code: None,
            csrf_token: Csrf::new("csrf-token-value"),
        };

        let actual = format!("{credentials:?}");

        assert!(!actual.contains("hunter2"));
        assert!(!actual.contains("123456"));
        assert!(!actual.contains("csrf-token-value"));
    }

    #[test]
    fn should_serialize_sign_in_request_without_absent_codes() {
        let credentials = Credentials {
            email: "jora@app.test".into(),
            password: Password::new("pw"),
            totp_code: None,
            backup_code: Some(OneTimeCode::new("abcd-efgh")),
            csrf_token: Csrf::new("t"),
        };

        let actual =
            serde_json::to_value(SignInRequest::new(credentials, "https://app.test/")).unwrap();

        assert_eq!(
            actual,
            serde_json::json!({
                "email": "jora@app.test",
                "password": "pw",
                "backupCode": "abcd-efgh",
                "csrfToken": "t",
                "callbackUrl": "https://app.test/",
                "redirect": false,
            })
        );
    }

    #[test]
    fn should_round_trip_last_used_cookie() {
        let cookie = Cookie::from(LastUsed::Google);

        assert_eq!(cookie.name(), "last_used");
        assert_eq!(LastUsed::try_from(&cookie).unwrap(), LastUsed::Google);
    }
}
