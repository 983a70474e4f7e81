//! Background processing for Zipline chunked uploads.
//!
//! This crate provides:
//! - A bounded worker pool that assembles finished uploads
//! - The assembly job that folds fragments into the content store
//! - A cron scheduler that reaps abandoned sessions and fragments

pub mod executor;
pub mod jobs;
pub mod pool;
pub mod scheduler;

pub use executor::JobHandler;
pub use jobs::{AssemblyHandler, SessionReaper};
pub use pool::{ActiveUploads, AssemblyPool};
pub use scheduler::CronScheduler;
