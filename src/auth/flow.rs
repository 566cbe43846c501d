//! Login flow state machine.
//!
//! A [`LoginFlow`] mirrors one open login page. It moves between the
//! credentials, TOTP and backup-code steps in response to sign-in results
//! ([`LoginFlow::dispatch`]) and explicit user actions
//! ([`LoginFlow::go_back`], [`LoginFlow::lose_access`]). Every transition
//! returns the resulting [`UiState`] so the caller never has to re-derive it.

use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use super::{AuthResult, Error, ErrorCode, FlowId, OneTimeCode};
use crate::locale::Messages;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Credentials,
    Totp,
    BackupCode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiState {
    NeedsCredentials,
    NeedsTotp,
    NeedsBackupCode { lost_access: bool },
    Authenticated,
    Failed { message: String, step: Step },
}

/// What the page needs to render after a transition.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub flow_id: FlowId,
    pub state: UiState,
    pub submitting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

#[derive(Debug)]
pub struct LoginFlow {
    id: FlowId,
    step: Step,
    alert: Option<String>,
    totp_code: Option<OneTimeCode>,
    backup_code: Option<OneTimeCode>,
    submitting: bool,
    authenticated: bool,
    callback_url: String,
    created_at: Instant,
}

impl LoginFlow {
    /// Starts on the TOTP step when the page was opened for a pending
    /// two-factor login.
    pub fn new(id: FlowId, callback_url: impl Into<String>, two_factor_pending: bool) -> Self {
        Self {
            id,
            step: if two_factor_pending {
                Step::Totp
            } else {
                Step::Credentials
            },
            alert: None,
            totp_code: None,
            backup_code: None,
            submitting: false,
            authenticated: false,
            callback_url: callback_url.into(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn totp_code(&self) -> Option<&OneTimeCode> {
        self.totp_code.as_ref()
    }

    pub fn backup_code(&self) -> Option<&OneTimeCode> {
        self.backup_code.as_ref()
    }

    pub fn state(&self) -> UiState {
        if self.authenticated {
            return UiState::Authenticated;
        }

        if let Some(message) = &self.alert {
            return UiState::Failed {
                message: message.clone(),
                step: self.step,
            };
        }

        match self.step {
            Step::Credentials => UiState::NeedsCredentials,
            Step::Totp => UiState::NeedsTotp,
            Step::BackupCode => UiState::NeedsBackupCode { lost_access: true },
        }
    }

    pub fn view(&self) -> View {
        let redirect_to = self.authenticated.then(|| {
            if self.callback_url.is_empty() {
                "/".to_string()
            } else {
                self.callback_url.clone()
            }
        });

        View {
            flow_id: self.id.clone(),
            state: self.state(),
            submitting: self.submitting,
            redirect_to,
        }
    }

    /// Shows `message` without changing the step.
    pub fn alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }

    /// Marks a submission as outstanding. Only one may be in flight.
    pub fn begin_submit(
        &mut self,
        totp_code: Option<OneTimeCode>,
        backup_code: Option<OneTimeCode>,
    ) -> super::Result<()> {
        if self.submitting {
            return Err(Error::SubmissionInFlight);
        }

        if self.authenticated {
            return Err(Error::ActionNotAllowed(self.step));
        }

        self.submitting = true;
        self.alert = None;
        self.totp_code = totp_code;
        self.backup_code = backup_code;
        Ok(())
    }

    /// Releases a submission whose result will never be dispatched.
    pub fn abandon_submit(&mut self) {
        self.submitting = false;
    }

    /// Applies the result of the outstanding submission.
    ///
    /// `None` stands for a transport failure: no result came back at all.
    pub fn dispatch(&mut self, result: Option<AuthResult>, messages: &Messages) -> UiState {
        self.submitting = false;

        match result {
            None => {
                warn!("No sign-in result for flow {}", self.id);
                self.alert = Some(messages.for_code(ErrorCode::InternalServerError).to_string());
            }
            Some(AuthResult::Ok) => {
                debug!("Flow {} authenticated", self.id);
                self.authenticated = true;
                self.alert = None;
            }
            Some(AuthResult::Error(ErrorCode::SecondFactorRequired)) => {
                debug!("Flow {} requires a second factor", self.id);
                self.step = Step::Totp;
                self.alert = None;
            }
            Some(AuthResult::Error(
                code @ (ErrorCode::IncorrectBackupCode | ErrorCode::MissingBackupCodes),
            )) => {
                self.alert = Some(messages.for_code(code).to_string());
            }
            Some(AuthResult::Error(code)) => {
                debug!("Flow {} failed with '{code}'", self.id);
                self.step = Step::Credentials;
                self.totp_code = None;
                self.backup_code = None;
                self.alert = Some(messages.for_code(code).to_string());
            }
            Some(AuthResult::Unrecognized(raw)) => {
                warn!("Unrecognized sign-in error '{raw}' for flow {}", self.id);
                self.alert = Some(messages.generic().to_string());
            }
        }

        self.state()
    }

    /// Steps back from a second-factor prompt.
    ///
    /// From the backup-code prompt this returns to the TOTP prompt, from the
    /// TOTP prompt to the credentials form.
    pub fn go_back(&mut self) -> super::Result<UiState> {
        self.ensure_idle()?;

        match self.step {
            Step::BackupCode => {
                self.step = Step::Totp;
                self.backup_code = None;
            }
            Step::Totp => {
                self.step = Step::Credentials;
                self.totp_code = None;
            }
            Step::Credentials => return Err(Error::ActionNotAllowed(self.step)),
        }

        self.alert = None;
        Ok(self.state())
    }

    /// Switches from the TOTP prompt to the backup-code prompt.
    pub fn lose_access(&mut self) -> super::Result<UiState> {
        self.ensure_idle()?;

        if self.step != Step::Totp {
            return Err(Error::ActionNotAllowed(self.step));
        }

        self.step = Step::BackupCode;
        self.totp_code = None;
        self.alert = None;
        Ok(self.state())
    }

    fn ensure_idle(&self) -> super::Result<()> {
        if self.submitting {
            return Err(Error::SubmissionInFlight);
        }
        if self.authenticated {
            return Err(Error::ActionNotAllowed(self.step));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::locale::Locale;

    use super::*;

    const CALLBACK: &str = "https://app.test/dashboard";

    fn messages() -> Messages {
        Messages::new(&Locale::english())
    }

    fn flow() -> LoginFlow {
        LoginFlow::new(FlowId::random(), CALLBACK, false)
    }

    fn flow_at(step: Step) -> LoginFlow {
        let mut f = flow();
        f.step = step;
        f
    }

    fn submit(f: &mut LoginFlow, result: Option<AuthResult>) -> UiState {
        f.begin_submit(None, None).unwrap();
        f.dispatch(result, &messages())
    }

    #[test]
    fn should_start_at_credentials() {
        assert_eq!(flow().state(), UiState::NeedsCredentials);
    }

    #[test]
    fn should_start_at_totp_when_two_factor_is_pending() {
        let f = LoginFlow::new(FlowId::random(), CALLBACK, true);

        assert_eq!(f.state(), UiState::NeedsTotp);
    }

    #[test]
    fn should_fail_with_internal_error_on_transport_failure() {
        for step in [Step::Credentials, Step::Totp, Step::BackupCode] {
            let mut f = flow_at(step);

            let actual = submit(&mut f, None);

            assert_eq!(
                actual,
                UiState::Failed {
                    message: messages()
                        .for_code(ErrorCode::InternalServerError)
                        .to_string(),
                    step,
                }
            );
        }
    }

    #[test]
    fn should_authenticate_from_any_step() {
        for step in [Step::Credentials, Step::Totp, Step::BackupCode] {
            let mut f = flow_at(step);
            f.alert("previous failure");

            let actual = submit(&mut f, Some(AuthResult::Ok));

            assert_eq!(actual, UiState::Authenticated);
            assert_eq!(f.view().redirect_to.as_deref(), Some(CALLBACK));
        }
    }

    #[test]
    fn should_redirect_home_when_callback_was_rejected() {
        let mut f = LoginFlow::new(FlowId::random(), "", false);

        submit(&mut f, Some(AuthResult::Ok));

        assert_eq!(f.view().redirect_to.as_deref(), Some("/"));
    }

    #[test]
    fn should_ask_for_totp_when_second_factor_is_required() {
        let mut f = flow();

        let actual = submit(&mut f, Some(AuthResult::Error(ErrorCode::SecondFactorRequired)));

        assert_eq!(actual, UiState::NeedsTotp);
    }

    #[test]
    fn should_stay_on_backup_code_when_it_is_incorrect() {
        let mut f = flow_at(Step::BackupCode);

        let actual = submit(&mut f, Some(AuthResult::Error(ErrorCode::IncorrectBackupCode)));

        assert_eq!(
            actual,
            UiState::Failed {
                message: "Backup code is incorrect.".to_string(),
                step: Step::BackupCode,
            }
        );
    }

    #[test]
    fn should_stay_on_backup_code_when_codes_are_missing() {
        let mut f = flow_at(Step::BackupCode);

        let actual = submit(&mut f, Some(AuthResult::Error(ErrorCode::MissingBackupCodes)));

        assert_eq!(
            actual,
            UiState::Failed {
                message: "No backup codes found. Please generate them in your settings."
                    .to_string(),
                step: Step::BackupCode,
            }
        );
    }

    #[test]
    fn should_return_to_credentials_on_other_known_error() {
        let mut f = flow_at(Step::Totp);
        f.begin_submit(Some(OneTimeCode::new("000000")), None)
            .unwrap();

        let actual = f.dispatch(
            Some(AuthResult::Error(ErrorCode::IncorrectTwoFactorCode)),
            &messages(),
        );

        assert_eq!(
            actual,
            UiState::Failed {
                message: "Two-factor code is incorrect. Please try again.".to_string(),
                step: Step::Credentials,
            }
        );
        assert!(f.totp_code().is_none());
    }

    #[test]
    fn should_use_generic_message_for_unrecognized_error() {
        let mut f = flow_at(Step::Totp);

        let actual = submit(&mut f, Some(AuthResult::Unrecognized("new-code".into())));

        assert_eq!(
            actual,
            UiState::Failed {
                message: "Something went wrong.".to_string(),
                step: Step::Totp,
            }
        );
    }

    #[test]
    fn should_reject_concurrent_submission() {
        let mut f = flow();
        f.begin_submit(None, None).unwrap();

        let actual = f.begin_submit(None, None);

        assert!(matches!(actual, Err(Error::SubmissionInFlight)));
        assert!(f.view().submitting);
    }

    #[test]
    fn should_accept_submission_after_abandoned_one() {
        let mut f = flow_at(Step::Totp);
        f.begin_submit(None, None).unwrap();

        f.abandon_submit();

        assert!(!f.is_submitting());
        assert!(f.begin_submit(None, None).is_ok());
    }

    #[test]
    fn should_clear_alert_on_new_submission() {
        let mut f = flow();
        submit(&mut f, Some(AuthResult::Error(ErrorCode::IncorrectEmailPassword)));

        f.begin_submit(None, None).unwrap();

        assert_eq!(f.state(), UiState::NeedsCredentials);
    }

    #[test]
    fn should_go_back_from_totp_to_credentials() {
        let mut f = flow_at(Step::Totp);
        f.totp_code = Some(OneTimeCode::new("123456"));
        f.alert("Two-factor code is incorrect.");

        let actual = f.go_back().unwrap();

        assert_eq!(actual, UiState::NeedsCredentials);
        assert!(f.totp_code().is_none());
    }

    #[test]
    fn should_go_back_from_backup_code_to_totp() {
        let mut f = flow_at(Step::BackupCode);
        f.backup_code = Some(OneTimeCode::new("abcd-efgh"));
        f.alert("Backup code is incorrect.");

        let actual = f.go_back().unwrap();

        assert_eq!(actual, UiState::NeedsTotp);
        assert!(f.backup_code().is_none());
    }

    #[test]
    fn should_not_go_back_from_credentials() {
        let actual = flow().go_back();

        assert!(matches!(
            actual,
            Err(Error::ActionNotAllowed(Step::Credentials))
        ));
    }

    #[test]
    fn should_switch_to_backup_code_on_lost_access() {
        let mut f = flow_at(Step::Totp);
        f.totp_code = Some(OneTimeCode::new("123456"));
        f.alert("Two-factor code is incorrect.");

        let actual = f.lose_access().unwrap();

        assert_eq!(actual, UiState::NeedsBackupCode { lost_access: true });
        assert!(f.totp_code().is_none());
    }

    #[test]
    fn should_not_lose_access_outside_totp() {
        for step in [Step::Credentials, Step::BackupCode] {
            let actual = flow_at(step).lose_access();

            assert!(matches!(actual, Err(Error::ActionNotAllowed(s)) if s == step));
        }
    }

    #[test]
    fn should_reject_actions_after_authentication() {
        let mut f = flow_at(Step::Totp);
        submit(&mut f, Some(AuthResult::Ok));

        assert!(f.go_back().is_err());
        assert!(f.lose_access().is_err());
        assert!(f.begin_submit(None, None).is_err());
    }

    #[test]
    fn should_serialize_view() {
        let mut f = flow_at(Step::BackupCode);
        f.alert("Backup code is incorrect.");

        let actual = serde_json::to_value(f.view()).unwrap();

        assert_eq!(actual["state"]["kind"], "failed");
        assert_eq!(actual["state"]["step"], "backup_code");
        assert_eq!(actual["submitting"], false);
        assert!(actual.get("redirectTo").is_none());
    }
}
