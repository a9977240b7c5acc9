// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::disk::DiskManager;
pub use index::hash::LinearProbeHashTable;
pub use transaction::wal::log_manager::LogManager;
pub use transaction::wal::recovery::LogRecovery;
pub use transaction::TransactionManager;
