use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{debug, error};
use serde::Serialize;

use crate::{auth, integration};

#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    _Auth(#[from] auth::Error),
    _Integration(#[from] integration::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let status = match &self {
            Self::_Auth(e) => StatusCode::from(e),
            Self::_Integration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status.is_server_error() {
            error!("{self}");
            match status {
                StatusCode::BAD_GATEWAY => "Authentication service unavailable".to_owned(),
                _ => "Something went wrong".to_owned(),
            }
        } else {
            debug!("{self}");
            self.to_string()
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}
