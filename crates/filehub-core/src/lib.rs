//! # filehub-core
//!
//! Core crate for FileHub's realtime hub and job engine. Contains the
//! configuration schema, typed identifiers, and the unified error system.
//!
//! This crate has **no** internal dependencies on other FileHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
