//! Active connection set and folder subscription index.

#[allow(clippy::module_inception)]
pub mod registry;
pub mod types;

pub use registry::Registry;
pub use types::{Delivery, FolderKey};
