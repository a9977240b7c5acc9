use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordError};

/// Default size of each of the two in-memory log buffers, and the chunk size
/// recovery reads the log file in.
pub const LOG_BUFFER_SIZE: usize = 32 * 1024;

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Log record error: {0}")]
    LogRecordError(#[from] LogRecordError),

    #[error("Log record of {0} bytes exceeds the log buffer")]
    RecordTooLarge(usize),

    #[error("Log flush failed; durability cannot be guaranteed")]
    FlushFailed,
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Size in bytes of each log buffer
    pub buffer_size: usize,

    /// Upper bound on how long appended records sit in memory before the
    /// flush thread writes them out
    pub log_timeout: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: LOG_BUFFER_SIZE,
            log_timeout: Duration::from_millis(300),
        }
    }
}

struct LogInner {
    /// Active buffer that `append_log_record` serializes into
    buffer: Vec<u8>,
    /// Bytes used in the active buffer
    offset: usize,
    /// Next LSN to hand out
    next_lsn: Lsn,
    /// A waiter needs the buffer written out ahead of the timeout
    flush_requested: bool,
    /// Stop protocol has begun; the flush thread drains and exits
    shutting_down: bool,
}

/// Manager for write-ahead logging.
///
/// Appenders serialize records into the active buffer under the log mutex,
/// which also assigns LSNs, so LSNs are dense and strictly increasing. A
/// background thread periodically swaps the active buffer against a flush
/// buffer and writes the swapped-out bytes to the disk manager's log file;
/// `persistent_lsn` advances only after the write returns. Callers needing
/// durability (commit, page eviction) block on `force_flush`/`flush_until`.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    config: LogManagerConfig,
    inner: Mutex<LogInner>,
    /// Wakes the flush thread
    flush_cv: Condvar,
    /// Wakes appenders and durability waiters after a flush completes
    done_cv: Condvar,
    /// Highest LSN known durable on the log file
    persistent_lsn: AtomicU64,
    /// True while the flush thread runs
    enabled: AtomicBool,
    /// Set when a flush write fails; durability waiters bail out
    flush_failed: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    /// Create a log manager over the disk manager's log file.
    ///
    /// If the log file already holds records (restart after a crash), LSN
    /// assignment resumes after the highest LSN found there.
    pub fn new(disk_manager: Arc<DiskManager>, config: LogManagerConfig) -> Result<Self> {
        let max_lsn = Self::scan_max_lsn(&disk_manager, config.buffer_size)?;

        Ok(Self {
            disk_manager,
            inner: Mutex::new(LogInner {
                buffer: vec![0u8; config.buffer_size],
                offset: 0,
                next_lsn: max_lsn + 1,
                flush_requested: false,
                shutting_down: false,
            }),
            config,
            flush_cv: Condvar::new(),
            done_cv: Condvar::new(),
            persistent_lsn: AtomicU64::new(max_lsn),
            enabled: AtomicBool::new(false),
            flush_failed: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
        })
    }

    /// Find the highest LSN already durable in the log file
    fn scan_max_lsn(disk_manager: &DiskManager, chunk_size: usize) -> Result<Lsn> {
        let mut max_lsn = INVALID_LSN;
        let mut buf = vec![0u8; chunk_size];
        let mut file_offset = 0u64;

        while disk_manager.read_log(&mut buf, file_offset)? {
            let mut pos = 0;
            while let Some((record, size)) = LogRecord::deserialize(&buf[pos..]) {
                max_lsn = max_lsn.max(record.lsn);
                pos += size;
            }
            file_offset += chunk_size as u64;
        }

        Ok(max_lsn)
    }

    /// Append a log record, assigning its LSN.
    ///
    /// If the active buffer cannot take the record, the flush thread is
    /// signalled and the appender waits for the in-flight flush to complete
    /// before retrying. The record is durable only once a later flush covers
    /// its LSN.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Result<Lsn> {
        let mut bytes = record.serialize()?;
        if bytes.len() >= self.config.buffer_size {
            return Err(LogManagerError::RecordTooLarge(bytes.len()));
        }

        let mut inner = self.inner.lock();

        // Waiting releases the lock, so the LSN is assigned only once space
        // is secured; other appenders may slot in ahead of us meanwhile.
        while inner.offset + bytes.len() >= self.config.buffer_size {
            if self.enabled.load(Ordering::SeqCst) {
                inner.flush_requested = true;
                self.flush_cv.notify_one();
                self.done_cv.wait(&mut inner);
            } else {
                self.flush_locked(&mut inner)?;
            }
        }

        record.lsn = inner.next_lsn;
        inner.next_lsn += 1;
        LittleEndian::write_u64(&mut bytes[4..12], record.lsn);

        let offset = inner.offset;
        inner.buffer[offset..offset + bytes.len()].copy_from_slice(&bytes);
        inner.offset += bytes.len();

        Ok(record.lsn)
    }

    /// Highest LSN guaranteed durable on the log file
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Next LSN that will be assigned
    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Block until every record appended so far is durable
    pub fn force_flush(&self) -> Result<()> {
        let target = {
            let inner = self.inner.lock();
            inner.next_lsn - 1
        };
        self.flush_until(target)
    }

    /// Block until the log is durable up to `lsn`.
    ///
    /// The buffer pool calls this before writing back a dirty page whose LSN
    /// is not yet covered by `persistent_lsn`.
    pub fn flush_until(&self, lsn: Lsn) -> Result<()> {
        if self.persistent_lsn() >= lsn {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        // Nothing beyond what has ever been appended can be awaited
        let target = lsn.min(inner.next_lsn.saturating_sub(1));

        if self.enabled.load(Ordering::SeqCst) {
            while self.persistent_lsn() < target {
                if self.flush_failed.load(Ordering::SeqCst) {
                    return Err(LogManagerError::FlushFailed);
                }
                inner.flush_requested = true;
                self.flush_cv.notify_one();
                self.done_cv.wait(&mut inner);
            }
        } else {
            self.flush_locked(&mut inner)?;
        }

        Ok(())
    }

    /// Start the background flush thread.
    ///
    /// The thread wakes every `log_timeout`, or earlier when an appender
    /// fills the buffer or a caller forces a flush.
    pub fn run_flush_thread(self: &Arc<Self>) {
        let mut handle = self.flush_thread.lock();
        if handle.is_some() {
            return;
        }
        self.enabled.store(true, Ordering::SeqCst);

        let manager = Arc::clone(self);
        *handle = Some(std::thread::spawn(move || manager.flush_loop()));
    }

    /// Stop and join the flush thread; buffered records are drained first
    pub fn stop_flush_thread(&self) {
        let thread = {
            let mut handle = self.flush_thread.lock();
            handle.take()
        };

        {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            self.flush_cv.notify_all();
        }

        if let Some(thread) = thread {
            let _ = thread.join();
        }

        // Only after the join may synchronous flushing take over; this keeps
        // buffer writes to the log file in append order.
        self.enabled.store(false, Ordering::SeqCst);
        self.inner.lock().shutting_down = false;
    }

    fn flush_loop(&self) {
        let mut flush_buffer = vec![0u8; self.config.buffer_size];

        loop {
            let mut inner = self.inner.lock();
            if !inner.flush_requested && !inner.shutting_down {
                let _ = self
                    .flush_cv
                    .wait_for(&mut inner, self.config.log_timeout);
            }
            let shutting_down = inner.shutting_down;

            // Swap buffers under the lock, write outside it
            let flush_len = inner.offset;
            let last_lsn = inner.next_lsn - 1;
            mem::swap(&mut inner.buffer, &mut flush_buffer);
            inner.offset = 0;
            inner.flush_requested = false;
            drop(inner);

            let mut write_ok = true;
            if flush_len > 0 {
                if let Err(e) = self.disk_manager.write_log(&flush_buffer[..flush_len]) {
                    error!("log flush failed: {}", e);
                    self.flush_failed.store(true, Ordering::SeqCst);
                    write_ok = false;
                } else {
                    debug!("flushed {} log bytes up to LSN {}", flush_len, last_lsn);
                }
            }

            let _inner = self.inner.lock();
            if write_ok {
                self.persistent_lsn.fetch_max(last_lsn, Ordering::SeqCst);
            }
            self.done_cv.notify_all();
            drop(_inner);

            if shutting_down {
                break;
            }
        }
    }

    /// Synchronous flush used when no flush thread is running
    fn flush_locked(&self, inner: &mut LogInner) -> Result<()> {
        if inner.offset > 0 {
            self.disk_manager.write_log(&inner.buffer[..inner.offset])?;
            inner.offset = 0;
        }
        self.persistent_lsn
            .fetch_max(inner.next_lsn - 1, Ordering::SeqCst);
        self.done_cv.notify_all();
        Ok(())
    }
}
