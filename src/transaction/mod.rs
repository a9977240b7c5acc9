pub mod wal;
pub mod transaction;

// Public exports
pub use transaction::{Transaction, TransactionManager};
pub use wal::log_manager::LogManager;
pub use wal::log_record::{LogRecord, LogRecordType};
