pub mod types;
pub mod rwlatch;

pub use rwlatch::ReaderWriterLatch;
