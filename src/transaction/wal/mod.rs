pub mod log_record;
pub mod log_manager;
pub mod recovery;

pub use log_manager::{LogManager, LogManagerConfig, LOG_BUFFER_SIZE};
pub use log_record::{LogRecord, LogRecordType};
pub use recovery::LogRecovery;
