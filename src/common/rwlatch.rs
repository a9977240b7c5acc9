use parking_lot::{Condvar, Mutex};

const MAX_READERS: u32 = u32::MAX;

#[derive(Default)]
struct LatchState {
    reader_count: u32,
    writer_entered: bool,
}

/// Writer-preferring reader-writer latch.
///
/// Once a writer has entered, new readers block until the writer leaves,
/// so a steady stream of readers cannot starve writers.
pub struct ReaderWriterLatch {
    state: Mutex<LatchState>,
    readers: Condvar,
    writers: Condvar,
}

impl Default for ReaderWriterLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderWriterLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            readers: Condvar::new(),
            writers: Condvar::new(),
        }
    }

    /// Acquire a read latch.
    pub fn rlock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered || state.reader_count == MAX_READERS {
            self.readers.wait(&mut state);
        }
        state.reader_count += 1;
    }

    /// Release a read latch.
    pub fn runlock(&self) {
        let mut state = self.state.lock();
        state.reader_count -= 1;
        if state.writer_entered {
            // Wake the entered writer once the last reader drains out
            if state.reader_count == 0 {
                self.writers.notify_one();
            }
        } else if state.reader_count == MAX_READERS - 1 {
            self.readers.notify_one();
        }
    }

    /// Acquire a write latch.
    pub fn wlock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered {
            self.readers.wait(&mut state);
        }
        state.writer_entered = true;
        while state.reader_count > 0 {
            self.writers.wait(&mut state);
        }
    }

    /// Release a write latch.
    pub fn wunlock(&self) {
        let mut state = self.state.lock();
        state.writer_entered = false;
        self.readers.notify_all();
    }

    /// RAII read lock
    pub fn read(&self) -> ReadLatchGuard<'_> {
        self.rlock();
        ReadLatchGuard { latch: self }
    }

    /// RAII write lock
    pub fn write(&self) -> WriteLatchGuard<'_> {
        self.wlock();
        WriteLatchGuard { latch: self }
    }
}

pub struct ReadLatchGuard<'a> {
    latch: &'a ReaderWriterLatch,
}

impl Drop for ReadLatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.runlock();
    }
}

pub struct WriteLatchGuard<'a> {
    latch: &'a ReaderWriterLatch,
}

impl Drop for WriteLatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.wunlock();
    }
}
