use std::collections::HashMap;

use log::debug;

use crate::auth::ErrorCode;

const EN: &str = include_str!("../../locales/en/common.json");

/// Flat key → text catalog for one language.
#[derive(Clone, Debug)]
pub struct Locale {
    lang: String,
    entries: HashMap<String, String>,
}

impl Locale {
    pub fn from_json(lang: impl Into<String>, json: &str) -> serde_json::Result<Self> {
        Ok(Self {
            lang: lang.into(),
            entries: serde_json::from_str(json)?,
        })
    }

    pub fn english() -> Self {
        Self::from_json("en", EN).expect("bundled english catalog should be valid json")
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Looks up `key`, echoing the key back when it has no translation.
    pub fn t(&self, key: &str) -> String {
        match self.entries.get(key) {
            Some(text) => text.clone(),
            None => {
                debug!("Missing '{}' translation for '{key}'", self.lang);
                key.to_string()
            }
        }
    }
}

/// User-facing alert text per [`ErrorCode`], built once from a [`Locale`].
#[derive(Clone, Debug)]
pub struct Messages {
    table: HashMap<ErrorCode, String>,
    generic: String,
}

impl Messages {
    pub fn new(locale: &Locale) -> Self {
        let t = |key: &str| locale.t(key);

        let table = HashMap::from([
            (ErrorCode::SecondFactorRequired, t("2fa_enabled_instructions")),
            (ErrorCode::IncorrectEmailPassword, t("incorrect_email_password")),
            (
                ErrorCode::IncorrectTwoFactorCode,
                format!("{} {}", t("incorrect_2fa_code"), t("please_try_again")),
            ),
            (
                ErrorCode::InternalServerError,
                format!(
                    "{} {}",
                    t("something_went_wrong"),
                    t("please_try_again_and_contact_us")
                ),
            ),
            (
                ErrorCode::ThirdPartyIdentityProviderEnabled,
                t("account_created_with_identity_provider"),
            ),
            (ErrorCode::IncorrectBackupCode, t("incorrect_backup_code")),
            (ErrorCode::MissingBackupCodes, t("missing_backup_codes")),
            (ErrorCode::RateLimitExceeded, t("rate_limit_exceeded")),
            (ErrorCode::UserAccountLocked, t("user_account_locked")),
        ]);

        Self {
            table,
            generic: t("something_went_wrong"),
        }
    }

    /// Codes without an entry fall back to the generic message.
    pub fn for_code(&self, code: ErrorCode) -> &str {
        self.table.get(&code).unwrap_or(&self.generic)
    }

    pub fn generic(&self) -> &str {
        &self.generic
    }
}

impl From<&Locale> for Messages {
    fn from(locale: &Locale) -> Self {
        Self::new(locale)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_load_bundled_english_catalog() {
        let locale = Locale::english();

        assert_eq!(locale.lang(), "en");
        assert_eq!(locale.t("please_try_again"), "Please try again.");
    }

    #[test]
    fn should_echo_missing_key() {
        assert_eq!(Locale::english().t("no_such_key"), "no_such_key");
    }

    #[test]
    fn should_compose_two_factor_message() {
        let messages = Messages::new(&Locale::english());

        assert_eq!(
            messages.for_code(ErrorCode::IncorrectTwoFactorCode),
            "Two-factor code is incorrect. Please try again."
        );
    }

    #[test]
    fn should_fall_back_to_generic_message() {
        let messages = Messages::new(&Locale::english());

        assert_eq!(
            messages.for_code(ErrorCode::UserNotFound),
            "Something went wrong."
        );
        assert_eq!(messages.generic(), "Something went wrong.");
    }

    #[test]
    fn should_use_injected_catalog() {
        let locale = Locale::from_json(
            "de",
            r#"{"incorrect_email_password": "E-Mail oder Passwort falsch.", "something_went_wrong": "Etwas ist schiefgelaufen."}"#,
        )
        .unwrap();

        let messages = Messages::from(&locale);

        assert_eq!(
            messages.for_code(ErrorCode::IncorrectEmailPassword),
            "E-Mail oder Passwort falsch."
        );
        assert_eq!(messages.generic(), "Etwas ist schiefgelaufen.");
    }
}
