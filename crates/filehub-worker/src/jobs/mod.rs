//! Built-in job handler implementations.

pub mod notification;

pub use notification::NotificationJobHandler;
