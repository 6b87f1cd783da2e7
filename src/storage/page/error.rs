use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Not enough space in page")]
    InsufficientSpace,
    #[error("Tuple not found")]
    TupleNotFound,
    #[error("Invalid slot {0}")]
    InvalidSlot(u32),
    #[error("Slot {0} already holds a tuple")]
    SlotOccupied(u32),
}
