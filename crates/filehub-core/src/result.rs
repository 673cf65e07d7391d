//! Convenience result type alias for FileHub.

use crate::error::AppError;

/// A specialized `Result` type for FileHub operations.
pub type AppResult<T> = Result<T, AppError>;
