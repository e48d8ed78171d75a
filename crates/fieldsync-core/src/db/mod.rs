//! Database layer for fieldsync

mod cache_repository;
mod connection;
mod failure_repository;
mod meta_repository;
mod migrations;
mod queue_repository;

pub use cache_repository::{CacheRepository, SqliteCacheRepository};
pub use connection::Database;
pub use failure_repository::SqliteFailureRepository;
pub use meta_repository::SqliteMetaRepository;
pub use queue_repository::{OperationQueueRepository, SqliteOperationQueueRepository};
