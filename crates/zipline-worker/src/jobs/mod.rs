//! Job implementations run by the pool and the scheduler.

pub mod assembly;
pub mod cleanup;

pub use assembly::{AssemblyError, AssemblyHandler, AssemblyStage};
pub use cleanup::{ReapReport, SessionReaper};
