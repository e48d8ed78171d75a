pub mod cache;
pub mod common;
pub mod completions;
pub mod enqueue;
pub mod failures;
pub mod pending;
pub mod status;
pub mod sync;
