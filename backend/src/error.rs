use axum::{http::StatusCode, Json};
use shared::ApiError;
use thiserror::Error;

use crate::normalize::InputError;
use crate::osrm::SnapError;
use crate::session::SessionError;
use crate::store::StoreError;

/// Everything a survey action can fail with. All variants are
/// recoverable at the UI boundary: the action is aborted, no session
/// state mutates, and the respondent can retry.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("could not parse drawing: {0}")]
    Input(#[from] InputError),
    #[error(transparent)]
    Snap(#[from] SnapError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SurveyError {
    fn status(&self) -> StatusCode {
        match self {
            SurveyError::Input(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SurveyError::Snap(SnapError::InsufficientPoints) => StatusCode::BAD_REQUEST,
            SurveyError::Snap(SnapError::NoRouteFound) => StatusCode::NOT_FOUND,
            SurveyError::Snap(_) => StatusCode::BAD_GATEWAY,
            SurveyError::Session(SessionError::Store { .. }) => StatusCode::BAD_GATEWAY,
            SurveyError::Session(_) => StatusCode::BAD_REQUEST,
            SurveyError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Convert a SurveyError into the API error shape handlers return.
pub fn to_api_error(err: SurveyError) -> (StatusCode, Json<ApiError>) {
    (
        err.status(),
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}
