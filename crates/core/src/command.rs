use thiserror::Error;

/// Chat prefix that triggers a counter update.
pub const CALORIES_PREFIX: &str = "!calories";

/// Errors raised while reading the `!calories` argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("missing amount after {CALORIES_PREFIX}")]
    MissingArgument,
    #[error("amount must be a non-negative integer (got {0:?})")]
    NotNumeric(String),
    #[error("amount {0} is too large")]
    OutOfRange(String),
}

/// Returns `true` when the message content starts with the `!calories` prefix.
pub fn is_calories_command(content: &str) -> bool {
    content.starts_with(CALORIES_PREFIX)
}

/// Parses the amount of a `!calories <n>` message.
///
/// The content is split on its first space and the remainder must consist
/// solely of ASCII digits.
pub fn parse_calories(content: &str) -> Result<i64, CommandError> {
    let Some((_, argument)) = content.split_once(' ') else {
        return Err(CommandError::MissingArgument);
    };

    if argument.is_empty() || !argument.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(CommandError::NotNumeric(argument.to_string()));
    }

    argument
        .parse::<i64>()
        .map_err(|_| CommandError::OutOfRange(argument.to_string()))
}
