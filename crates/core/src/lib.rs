//! Domain rules for chat-driven counter updates.
//!
//! Everything here is free of I/O: payload parsing, the `!calories` command
//! grammar and the sender authorization predicate.

pub mod command;
pub mod normalizer;
pub mod policy;
pub mod types;
