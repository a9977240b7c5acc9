use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Insufficient space in page")]
    InsufficientSpace,

    #[error("Invalid slot number: {0}")]
    InvalidSlot(u32),

    #[error("Slot {0} is already occupied")]
    SlotOccupied(u32),

    #[error("No tuple at slot {0}")]
    TupleNotFound(u32),
}
