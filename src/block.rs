//! In-place block headers.
//!
//! Every region of the arena, free or in use, starts with a [`Block`] header
//! immediately followed by its payload. Headers are linked in ascending
//! address order, so the payload of one block always ends exactly where the
//! header of the next one starts.

use core::fmt;
use core::mem::align_of;
use core::mem::size_of;
use core::ptr::NonNull;

use super::error::ArenaError;
use super::error::Result;

/// Size of a block header, in bytes.
pub const HEADER_SIZE: usize = size_of::<Block>();

/// Alignment of a block header, and of every payload handed out.
pub const BLOCK_ALIGN: usize = align_of::<Block>();

/// The metadata header prefixed to every region of the arena.
#[repr(C)]
pub struct Block {
    pub next: Option<NonNull<Block>>,
    pub prev: Option<NonNull<Block>>,
    /// Payload capacity, excluding this header.
    pub size: usize,
    pub free: bool,
}

/// Initialize a span of memory as a new, unlinked, free block.
///
/// # Safety
///
/// `memory` must be valid for writes of `size` bytes and aligned to
/// [`BLOCK_ALIGN`].
pub unsafe fn create_block(memory: *mut u8, size: usize) -> Result<NonNull<Block>> {
    let block = NonNull::new(memory as *mut Block).ok_or(ArenaError::NullBuffer)?;
    if size <= HEADER_SIZE {
        return Err(ArenaError::SpanTooSmall {
            size,
            header: HEADER_SIZE,
        });
    }
    debug_assert_eq!(memory as usize % BLOCK_ALIGN, 0);

    block.as_ptr().write(Block {
        next: None,
        prev: None,
        size: size - HEADER_SIZE,
        free: true,
    });
    Ok(block)
}

/// Check the local invariants of a block: both links point back to it,
/// and its payload is not empty.
///
/// # Safety
///
/// `block` and its neighbours must be initialized headers.
pub unsafe fn validate_block(block: NonNull<Block>) -> bool {
    let b = block.as_ptr();
    if let Some(next) = (*b).next {
        if (*next.as_ptr()).prev != Some(block) {
            return false;
        }
    }
    if let Some(prev) = (*b).prev {
        if (*prev.as_ptr()).next != Some(block) {
            return false;
        }
    }
    (*b).size > 0
}

/// Address of the first payload byte of `block`.
///
/// # Safety
///
/// `block` must be an initialized header.
pub unsafe fn payload(block: NonNull<Block>) -> NonNull<u8> {
    NonNull::new_unchecked((block.as_ptr() as *mut u8).add(HEADER_SIZE))
}

/// A snapshot of one block, as reported by the arena diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub address: usize,
    /// Payload capacity in bytes.
    pub size: usize,
    pub free: bool,
}

impl BlockInfo {
    /// # Safety
    ///
    /// `block` must be an initialized header.
    pub(crate) unsafe fn of(block: NonNull<Block>) -> Self {
        BlockInfo {
            address: block.as_ptr() as usize,
            size: (*block.as_ptr()).size,
            free: (*block.as_ptr()).free,
        }
    }

    /// Address of the first payload byte.
    pub fn payload(&self) -> usize {
        self.address + HEADER_SIZE
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "address[0x{:x}] | size[{}] | free[{}]",
            self.address, self.size, self.free as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    fn buffer(words: usize) -> Vec<u64> {
        vec![0; words]
    }

    #[test]
    fn test_create_block() {
        let mut buf = buffer(16);
        let block = unsafe { create_block(buf.as_mut_ptr() as *mut u8, 128) }.unwrap();
        unsafe {
            let b = block.as_ptr();
            assert!((*b).free);
            assert_eq!((*b).size, 128 - HEADER_SIZE);
            assert!((*b).next.is_none());
            assert!((*b).prev.is_none());
            assert!(validate_block(block));
            assert_eq!(
                payload(block).as_ptr() as usize,
                buf.as_ptr() as usize + HEADER_SIZE
            );
        }
    }

    #[test]
    fn test_create_block_null() {
        let res = unsafe { create_block(ptr::null_mut(), 128) };
        assert_eq!(res.err(), Some(ArenaError::NullBuffer));
    }

    #[test]
    fn test_create_block_too_small() {
        let mut buf = buffer(16);
        let res = unsafe { create_block(buf.as_mut_ptr() as *mut u8, HEADER_SIZE) };
        assert_eq!(
            res.err(),
            Some(ArenaError::SpanTooSmall {
                size: HEADER_SIZE,
                header: HEADER_SIZE
            })
        );
        let res = unsafe { create_block(buf.as_mut_ptr() as *mut u8, HEADER_SIZE + 1) };
        assert_eq!(unsafe { (*res.unwrap().as_ptr()).size }, 1);
    }

    #[test]
    fn test_validate_block_links() {
        let mut buf = buffer(32);
        let base = buf.as_mut_ptr() as *mut u8;
        unsafe {
            let first = create_block(base, 128).unwrap();
            let second = create_block(base.add(128), 128).unwrap();
            (*first.as_ptr()).next = Some(second);
            assert!(!validate_block(first));

            (*second.as_ptr()).prev = Some(first);
            assert!(validate_block(first));
            assert!(validate_block(second));

            (*second.as_ptr()).size = 0;
            assert!(!validate_block(second));
        }
    }

    #[test]
    fn test_block_info_display() {
        let info = BlockInfo {
            address: 0x1000,
            size: 96,
            free: true,
        };
        assert_eq!(info.to_string(), "address[0x1000] | size[96] | free[1]");
        assert_eq!(info.payload(), 0x1000 + HEADER_SIZE);
    }
}
