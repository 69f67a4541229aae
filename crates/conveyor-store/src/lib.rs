//! # conveyor-store
//!
//! Queue storage backends for conveyor.
//!
//! [`QueueStore`] is the contract the engine runs against. [`PgmqStore`]
//! binds it to the PGMQ Postgres extension; [`MemoryStore`] is an
//! in-process implementation for tests and development.

pub mod memory;
pub mod pgmq;
pub mod pool;
pub mod store;

// Re-export commonly used types at crate root
pub use memory::MemoryStore;
pub use pgmq::PgmqStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use store::QueueStore;
