//! Background job entities.

pub mod payload;

pub use payload::AssemblyJob;
