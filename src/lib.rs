use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;

use crate::state::AppState;

pub mod auth;
pub mod error;
pub mod integration;
pub mod locale;
pub mod redirect;
pub mod state;

pub type Result<T> = std::result::Result<T, error::Error>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth::api(state))
        .route("/health", get(|| async { StatusCode::OK }))
}

pub trait Raw {
    fn raw(&self) -> &str;
}

/// Masks a secret for logs, keeping only enough of it to tell values apart.
pub trait Redact: Raw {
    fn redact(&self) -> String {
        let raw = self.raw();
        let len = raw.chars().count();
        if len <= 4 {
            return "*".repeat(len);
        }

        let head = raw.chars().take(2).collect::<String>();
        format!("{head}{}", "*".repeat(len - 2))
    }
}
