use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

/// Event name for chat messages posted in a channel.
pub const CHAT_MESSAGE_EVENT: &str = "chat.message.sent";
const CHAT_MESSAGE_EVENT_VERSION: u32 = 1;

/// Client for the Kick public API endpoints used during channel setup.
#[derive(Clone)]
pub struct KickApiClient {
    http: Client,
    base_url: Url,
}

impl KickApiClient {
    /// Creates a new API client. `base_url` is expected to look like
    /// `https://api.kick.com/public/v1/`.
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    /// Lists the channels owned by the authenticated user.
    pub async fn list_channels(&self, access_token: &str) -> Result<Vec<Channel>, ApiError> {
        let url = self.base_url.join("channels")?;
        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        let envelope: DataEnvelope<Channel> = parse_json(response).await?;
        Ok(envelope.data)
    }

    /// Registers a webhook subscription for chat messages of the given broadcaster.
    ///
    /// Any HTTP status is returned as a [`SubscriptionResult`]; only transport
    /// failures surface as errors.
    pub async fn create_chat_subscription(
        &self,
        access_token: &str,
        broadcaster_user_id: &str,
    ) -> Result<SubscriptionResult, ApiError> {
        let url = self.base_url.join("events/subscriptions")?;
        let body = json!({
            "broadcaster_user_id": broadcaster_id_value(broadcaster_user_id),
            "events": [
                { "name": CHAT_MESSAGE_EVENT, "version": CHAT_MESSAGE_EVENT_VERSION }
            ],
            "method": "webhook",
        });

        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok(SubscriptionResult { status, body })
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http.request(method, url).bearer_auth(access_token)
    }
}

// Kick uses numeric broadcaster ids on the wire.
fn broadcaster_id_value(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::from(id),
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
}

/// Channel entry returned by `GET /channels`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Channel {
    #[serde(deserialize_with = "string_or_number")]
    pub broadcaster_user_id: String,
    pub slug: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(value) => value,
        Raw::Number(value) => value.to_string(),
    })
}

/// Raw outcome of a subscription request, surfaced for manual inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResult {
    pub status: StatusCode,
    pub body: String,
}

/// Errors produced by the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

async fn parse_json<T>(response: Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(ApiError::Status { status, body });
    }

    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}
