mod block_page;
mod encoding;
mod error;
mod header_page;
mod table;

pub use block_page::{block_slot_count, HashBlockPage, HashBlockPageMut};
pub use encoding::FixedSlot;
pub use error::HashIndexError;
pub use header_page::{hash_header_max_blocks, HashHeaderPage, HashHeaderPageMut};
pub use table::LinearProbeHashTable;
