//! Wire messages: client commands, hub events, and replies.

pub mod serializer;
pub mod types;
pub mod validator;

pub use types::{Action, Command, Event, Reply};
