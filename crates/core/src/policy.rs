use crate::command::{is_calories_command, parse_calories};
use crate::types::{ChannelIdentity, ChatMessageEvent, IgnoreReason};

/// What should happen to the counter for a given chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Apply { delta: i64 },
    Ignore {
        reason: IgnoreReason,
        detail: Option<String>,
    },
}

impl Decision {
    fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignore {
            reason,
            detail: None,
        }
    }
}

/// Evaluates a chat message against the active channel.
///
/// A message may change the counter only when it starts with `!calories`,
/// carries a numeric amount, and comes from the channel owner or a moderator.
pub fn evaluate(event: &ChatMessageEvent, channel: Option<&ChannelIdentity>) -> Decision {
    let Some(channel) = channel else {
        return Decision::ignored(IgnoreReason::ChannelUnresolved);
    };

    if let Some(user_id) = event
        .broadcaster
        .as_ref()
        .and_then(|broadcaster| broadcaster.user_id.as_deref())
    {
        if user_id != channel.broadcaster_user_id {
            return Decision::ignored(IgnoreReason::ForeignChannel);
        }
    }

    if !is_calories_command(&event.content) {
        return Decision::ignored(IgnoreReason::NotACommand);
    }

    if !(channel.is_owner(&event.sender.username) || event.sender.is_moderator()) {
        return Decision::ignored(IgnoreReason::Unauthorized);
    }

    match parse_calories(&event.content) {
        Ok(delta) => Decision::Apply { delta },
        Err(err) => Decision::Ignore {
            reason: IgnoreReason::InvalidArgument,
            detail: Some(err.to_string()),
        },
    }
}
