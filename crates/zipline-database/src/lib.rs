//! # zipline-database
//!
//! PostgreSQL connection management, the repository traits used by the
//! upload pipeline, their sqlx implementations, and an in-memory
//! implementation for tests and single-node development.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use repositories::{
    FileRepository, FolderRepository, IncompleteFileRepository, Repositories, UserRepository,
};
