pub mod api;
pub mod oauth;

pub use api::{ApiError, Channel, KickApiClient, SubscriptionResult, CHAT_MESSAGE_EVENT};
pub use oauth::{AuthorizeUrlParams, KickOAuthClient, OAuthError, TokenResponse};
