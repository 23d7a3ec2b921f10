use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Chat message delivered by a `chat.message.sent` webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessageEvent {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub broadcaster: Option<BroadcasterRef>,
    #[serde(default)]
    pub sender: ChatSender,
    pub content: String,
}

/// Channel the chat message was posted in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BroadcasterRef {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_slug: Option<String>,
}

/// Author of a chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatSender {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub identity: SenderIdentity,
}

/// Chat identity of the sender, including badges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SenderIdentity {
    #[serde(default)]
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Badge {
    #[serde(default, rename = "type")]
    pub badge_type: Option<String>,
}

impl ChatSender {
    /// Returns `true` when any badge marks the sender as a channel moderator.
    pub fn is_moderator(&self) -> bool {
        self.identity
            .badges
            .iter()
            .any(|badge| badge.badge_type.as_deref() == Some(MODERATOR_BADGE))
    }
}

const MODERATOR_BADGE: &str = "moderator";

/// Channel resolved for the authenticated broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub broadcaster_user_id: String,
    pub channel_slug: String,
}

impl ChannelIdentity {
    /// Case-insensitive comparison of a chat username against the channel slug.
    pub fn is_owner(&self, username: &str) -> bool {
        !username.is_empty() && username.to_lowercase() == self.channel_slug.to_lowercase()
    }
}

/// Why a webhook delivery did not change the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnsupportedEventType,
    MalformedPayload,
    ChannelUnresolved,
    ForeignChannel,
    NotACommand,
    Unauthorized,
    InvalidArgument,
    Duplicate,
    StorageFailure,
}

impl IgnoreReason {
    /// Returns the label used for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedEventType => "unsupported_event_type",
            Self::MalformedPayload => "malformed_payload",
            Self::ChannelUnresolved => "channel_unresolved",
            Self::ForeignChannel => "foreign_channel",
            Self::NotACommand => "not_a_command",
            Self::Unauthorized => "unauthorized",
            Self::InvalidArgument => "invalid_argument",
            Self::Duplicate => "duplicate",
            Self::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { delta: i64, total: i64 },
    Ignored(IgnoreReason),
}

impl WebhookOutcome {
    /// Returns the label used for metrics and logs.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Ignored(reason) => reason.as_str(),
        }
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(value) => value,
        Raw::Number(value) => value.to_string(),
    }))
}
