//! Transport-neutral frame type the pumps read and write.
//!
//! The HTTP layer adapts its WebSocket implementation to a
//! `Stream<Item = Result<Frame, E>>` and a `Sink<Frame>`.

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message.
    Text(String),
    /// Binary message; not part of the protocol and ignored on read.
    Binary(Vec<u8>),
    /// Liveness check.
    Ping,
    /// Liveness answer.
    Pong,
    /// Orderly close.
    Close,
}
