//! Convenience result type alias for Zipline.

use crate::error::AppError;

/// A specialized `Result` type for Zipline operations.
pub type AppResult<T> = Result<T, AppError>;
