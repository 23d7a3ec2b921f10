use thiserror::Error;

use crate::types::ChatMessageEvent;

/// Event type header value for chat messages.
pub const CHAT_MESSAGE_EVENT_TYPE: &str = "chat.message.sent";

/// Errors that can occur while decoding incoming webhook payloads.
#[derive(Debug, Error)]
pub enum NormalizerError {
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),
    #[error("failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes webhook bodies into [`ChatMessageEvent`] values.
pub struct Normalizer;

impl Normalizer {
    /// Decodes a webhook body. `event_type` is the value of the delivery's event
    /// type header, when the sender supplied one.
    pub fn normalize(
        event_type: Option<&str>,
        body: &[u8],
    ) -> Result<ChatMessageEvent, NormalizerError> {
        if let Some(event_type) = event_type {
            if event_type != CHAT_MESSAGE_EVENT_TYPE {
                return Err(NormalizerError::UnsupportedEventType(event_type.to_string()));
            }
        }

        Ok(serde_json::from_slice(body)?)
    }
}
