use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::problem::ProblemResponse;

/// Failures of the browser-facing OAuth and channel setup flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no authorization code was received")]
    MissingCode,
    #[error("state mismatch - the authorization was not started from this browser or has expired")]
    StateMismatch,
    #[error("authorization was denied: {0}")]
    AuthorizationDenied(String),
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("upstream request failed: {0}")]
    UpstreamError(String),
    #[error("not authenticated, start at /auth")]
    Unauthenticated,
    #[error("failed to render page")]
    Render(#[from] askama::Error),
}

impl FlowError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCode
            | Self::StateMismatch
            | Self::AuthorizationDenied(_)
            | Self::TokenExchangeFailed(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn problem_type(&self) -> &'static str {
        match self {
            Self::MissingCode => "missing_code",
            Self::StateMismatch => "state_mismatch",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::TokenExchangeFailed(_) => "token_exchange_failed",
            Self::UpstreamError(_) => "upstream_error",
            Self::Unauthenticated => "unauthenticated",
            Self::Render(_) => "render_failed",
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        ProblemResponse::new(self.status(), self.problem_type(), self.to_string()).into_response()
    }
}
