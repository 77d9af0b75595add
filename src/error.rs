use thiserror::Error;

/// Result type returned by arena operations.
pub type Result<T> = core::result::Result<T, ArenaError>;

/// Errors reported by the arena and its blocks.
///
/// Allocation exhaustion is not an error: [`Arena::allocate`] reports it as
/// `Ok(None)`. A double free is not an error either, it is logged and ignored.
///
/// [`Arena::allocate`]: struct.Arena.html#method.allocate
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena buffer is null")]
    NullBuffer,

    #[error("arena of {size} bytes does not exceed the minimum heap size of {minimum} bytes")]
    HeapTooSmall { size: usize, minimum: usize },

    #[error("span of {size} bytes cannot hold a block header of {header} bytes")]
    SpanTooSmall { size: usize, header: usize },

    #[error("allocation size must be greater than zero")]
    ZeroSize,

    #[error("address 0x{0:x} is outside the arena")]
    OutOfBounds(usize),

    #[error("address 0x{0:x} does not start a block payload")]
    NotAPayload(usize),

    #[error("arena is not initialized")]
    Uninitialized,

    #[error("arena is already initialized")]
    AlreadyInitialized,

    #[error("corrupted block at 0x{0:x}")]
    CorruptedBlock(usize),

    #[error("free block at 0x{0:x} follows another free block")]
    UncoalescedBlocks(usize),

    #[error("blocks account for {actual} bytes, arena holds {expected} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("cursor 0x{0:x} does not reference a live block")]
    DanglingCursor(usize),
}

impl ArenaError {
    /// Whether this error reports a corrupted block list, as detected by
    /// [`Arena::validate`](struct.Arena.html#method.validate).
    pub fn is_corruption(&self) -> bool {
        match self {
            ArenaError::CorruptedBlock(_)
            | ArenaError::UncoalescedBlocks(_)
            | ArenaError::SizeMismatch { .. }
            | ArenaError::DanglingCursor(_) => true,
            _ => false,
        }
    }
}
