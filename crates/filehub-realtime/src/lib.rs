//! # filehub-realtime
//!
//! Real-time event hub for FileHub. Provides:
//!
//! - A connection registry with a folder subscription index
//! - Folder-, user- and global broadcast with drop-on-full backpressure
//! - Per-connection read/write pumps with keepalive and read deadline
//! - The JSON wire protocol for commands, events and replies

pub mod connection;
pub mod hub;
pub mod message;
pub mod registry;

pub use connection::{Frame, serve_connection};
pub use hub::Hub;
pub use message::{Action, Command, Event, Reply};
pub use registry::{Delivery, FolderKey, Registry};
