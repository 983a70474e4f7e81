//! # zipline-core
//!
//! Core crate for Zipline. Contains the content-store and notifier
//! traits, configuration schemas, upload events, and the unified error
//! system.
//!
//! This crate has **no** internal dependencies on other Zipline crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
