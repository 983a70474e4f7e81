//! Request middleware.

pub mod logging;
