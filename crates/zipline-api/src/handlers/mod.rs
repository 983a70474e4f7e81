//! Route handlers organized by domain.

pub mod health;
pub mod incomplete;
pub mod raw;
pub mod upload;
