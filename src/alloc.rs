use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::cmp::min;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::ptr::NonNull;

use typenum::consts::U1024;
use typenum::consts::U32;
use typenum::Unsigned;

use super::block;
use super::block::Block;
use super::block::BlockInfo;
use super::block::BLOCK_ALIGN;
use super::block::HEADER_SIZE;
use super::error::ArenaError;
use super::error::Result;
use super::utils::align_up;
use super::Mutex;

/// The block list embedded in the arena buffer.
struct BlockList {
    head: NonNull<Block>,
    /// Most recently allocated block. Merges retarget it to the surviving
    /// block; the first-fit scan never reads it.
    cursor: Option<NonNull<Block>>,
    start: usize,
    heap_size: usize,
}

// The list is only ever reached through the arena mutex.
unsafe impl Send for BlockList {}

struct Blocks {
    current: Option<NonNull<Block>>,
}

impl Iterator for Blocks {
    type Item = NonNull<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        self.current = unsafe { (*block.as_ptr()).next };
        Some(block)
    }
}

/// Outcome of a granted allocation, logged once the lock is released.
struct Grant {
    payload: NonNull<u8>,
    size: usize,
    split: Option<usize>,
}

enum Target {
    Block(NonNull<Block>),
    Stale,
}

/// Outcome of a release, logged once the lock is released.
enum Release {
    Freed {
        size: usize,
        merged_prev: bool,
        merged_next: bool,
    },
    DoubleFree,
    /// Aligned address inside a free payload, possibly a merged block.
    Stale,
}

impl BlockList {
    fn iter(&self) -> Blocks {
        Blocks {
            current: Some(self.head),
        }
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr - self.start < self.heap_size
    }

    fn first_fit(&self, bytes: usize) -> Option<NonNull<Block>> {
        self.iter()
            .find(|block| unsafe { (*block.as_ptr()).free && (*block.as_ptr()).size >= bytes })
    }

    /// Recover the block released through `addr`.
    ///
    /// An aligned address inside a free payload is where a block merged into
    /// its neighbour used to start, and is reported as stale.
    fn resolve(&self, addr: usize) -> Result<Target> {
        if !self.contains(addr) {
            return Err(ArenaError::OutOfBounds(addr));
        }
        let block = self
            .iter()
            .take_while(|block| block.as_ptr() as usize + HEADER_SIZE <= addr)
            .last()
            .ok_or(ArenaError::NotAPayload(addr))?;

        let info = unsafe { BlockInfo::of(block) };
        let offset = addr - info.payload();
        if offset == 0 {
            Ok(Target::Block(block))
        } else if info.free && offset < info.size && offset >= HEADER_SIZE && offset % BLOCK_ALIGN == 0 {
            Ok(Target::Stale)
        } else {
            Err(ArenaError::NotAPayload(addr))
        }
    }

    /// Mark `block` as used, splitting its tail into a new free block when
    /// at least a header and `min_free` bytes would remain.
    unsafe fn take(&mut self, block: NonNull<Block>, bytes: usize, min_free: usize) -> Result<Grant> {
        let b = block.as_ptr();
        let reserved = align_up(bytes, BLOCK_ALIGN).map_or((*b).size, |r| min(r, (*b).size));
        let remaining = (*b).size - reserved;

        let mut split = None;
        // the new block needs a non-empty payload even when `min_free` is 0
        if remaining > HEADER_SIZE && remaining >= HEADER_SIZE + min_free {
            let span = block::payload(block).as_ptr().add(reserved);
            let tail = block::create_block(span, remaining)?;
            let t = tail.as_ptr();
            (*t).next = (*b).next;
            (*t).prev = Some(block);
            if let Some(next) = (*t).next {
                (*next.as_ptr()).prev = Some(tail);
            }
            (*b).next = Some(tail);
            (*b).size = reserved;
            split = Some((*t).size);
        }

        (*b).free = false;
        let payload = block::payload(block);
        ptr::write_bytes(payload.as_ptr(), 0, (*b).size);
        self.cursor = Some(block);

        Ok(Grant {
            payload,
            size: (*b).size,
            split,
        })
    }

    /// Fold `next` into `block`, reclaiming its header.
    unsafe fn absorb(&mut self, block: NonNull<Block>, next: NonNull<Block>) {
        let (b, n) = (block.as_ptr(), next.as_ptr());
        (*b).size += HEADER_SIZE + (*n).size;
        (*b).next = (*n).next;
        if let Some(after) = (*n).next {
            (*after.as_ptr()).prev = Some(block);
        }
        if self.cursor == Some(next) {
            self.cursor = Some(block);
        }
    }

    unsafe fn merge_prev(&mut self, block: NonNull<Block>, prev: NonNull<Block>) -> NonNull<Block> {
        self.absorb(prev, block);
        prev
    }

    unsafe fn merge_next(&mut self, block: NonNull<Block>, next: NonNull<Block>) {
        self.absorb(block, next);
    }

    unsafe fn release(&mut self, block: NonNull<Block>) -> Release {
        if (*block.as_ptr()).free {
            return Release::DoubleFree;
        }
        (*block.as_ptr()).free = true;

        let mut block = block;
        let mut merged_prev = false;
        let mut merged_next = false;
        if let Some(prev) = (*block.as_ptr()).prev {
            if (*prev.as_ptr()).free {
                block = self.merge_prev(block, prev);
                merged_prev = true;
            }
        }
        if let Some(next) = (*block.as_ptr()).next {
            if (*next.as_ptr()).free {
                self.merge_next(block, next);
                merged_next = true;
            }
        }

        Release::Freed {
            size: (*block.as_ptr()).size,
            merged_prev,
            merged_next,
        }
    }

    fn validate(&self) -> Result<()> {
        let end = self.start + self.heap_size;
        let mut expected = self.start;
        let mut total = 0;
        let mut cursor_live = self.cursor.is_none();
        let mut prev: Option<NonNull<Block>> = None;

        for block in self.iter() {
            let addr = block.as_ptr() as usize;
            // headers must tile the arena before their links can be followed
            if addr != expected || end - addr <= HEADER_SIZE {
                return Err(ArenaError::CorruptedBlock(addr));
            }
            let (info, next, back) = unsafe {
                let b = block.as_ptr();
                (BlockInfo::of(block), (*b).next, (*b).prev)
            };
            total = info.size.saturating_add(HEADER_SIZE).saturating_add(total);
            if total > self.heap_size {
                break;
            }
            expected = addr + HEADER_SIZE + info.size;
            let next_misplaced = next.map_or(false, |n| {
                n.as_ptr() as usize != expected || end - expected <= HEADER_SIZE
            });
            if back != prev || next_misplaced || !unsafe { block::validate_block(block) } {
                return Err(ArenaError::CorruptedBlock(addr));
            }
            let prev_free = prev.map_or(false, |p| unsafe { (*p.as_ptr()).free });
            if info.free && prev_free {
                return Err(ArenaError::UncoalescedBlocks(addr));
            }
            cursor_live |= self.cursor == Some(block);
            prev = Some(block);
        }

        if total != self.heap_size {
            return Err(ArenaError::SizeMismatch {
                expected: self.heap_size,
                actual: total,
            });
        }
        match self.cursor {
            Some(cursor) if !cursor_live => Err(ArenaError::DanglingCursor(cursor.as_ptr() as usize)),
            _ => Ok(()),
        }
    }

    fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            heap_size: self.heap_size,
            ..ArenaStats::default()
        };
        for block in self.iter() {
            let info = unsafe { BlockInfo::of(block) };
            stats.blocks += 1;
            if info.free {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
            } else {
                stats.used_blocks += 1;
                stats.used_bytes += info.size;
            }
        }
        stats
    }
}

/// Usage summary of an arena, taken under its lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total bytes managed, headers included.
    pub heap_size: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    /// Payload bytes available in free blocks.
    pub free_bytes: usize,
    /// Payload bytes handed out to callers.
    pub used_bytes: usize,
    /// Payload size of the largest free block.
    pub largest_free: usize,
}

/// A first-fit allocator over a single fixed buffer.
///
/// The buffer is split into blocks, each one prefixed by a [`Block`] header
/// and linked to its neighbours in address order. Allocation takes the first
/// free block large enough for the request and splits off its tail when the
/// remainder is worth keeping. Deallocation coalesces the freed block with
/// free neighbours on both sides.
///
/// # Compile-time configuration
///
/// Policy constants are given as numeric types from the
/// [`typenum`](https://docs.rs/typenum) crate:
///
/// * **MH** (minimum heap size): construction fails for buffers of this size
///   or smaller.
/// * **MF** (minimum free block): a split only happens if the new free block
///   would have at least this many payload bytes.
///
/// # Synchronisation
///
/// Every operation holds a single spinning mutex for its whole duration.
/// Log records are emitted after the lock is released.
pub struct Arena<MH = U1024, MF = U32>
where
    MH: Unsigned,
    MF: Unsigned,
{
    __min_heap: PhantomData<MH>,
    __min_free: PhantomData<MF>,
    list: Mutex<Option<BlockList>>,
}

impl<MH, MF> Arena<MH, MF>
where
    MH: Unsigned,
    MF: Unsigned,
{
    /// Create an arena with no backing buffer.
    ///
    /// Every operation fails with [`ArenaError::Uninitialized`] until
    /// [`init`](#method.init) is called.
    pub const fn empty() -> Self {
        Arena {
            __min_heap: PhantomData,
            __min_free: PhantomData,
            list: Mutex::new(None),
        }
    }

    /// Create an arena managing `heap_size` bytes starting at `heap_start`.
    ///
    /// # Safety
    ///
    /// The buffer must be valid for reads and writes, must not be used by
    /// anything else, and must outlive the arena.
    pub unsafe fn new(heap_start: *mut u8, heap_size: usize) -> Result<Self> {
        let arena = Self::empty();
        arena.init(heap_start, heap_size)?;
        Ok(arena)
    }

    /// Create an arena managing a static buffer.
    pub fn from_slice(buffer: &'static mut [u8]) -> Result<Self> {
        unsafe { Self::new(buffer.as_mut_ptr(), buffer.len()) }
    }

    /// Attach a buffer to an empty arena.
    ///
    /// The start of the buffer is rounded up to the block alignment; skipped
    /// bytes are not part of the arena.
    ///
    /// # Safety
    ///
    /// Same contract as [`new`](#method.new).
    pub unsafe fn init(&self, heap_start: *mut u8, heap_size: usize) -> Result<()> {
        if heap_start.is_null() {
            return Err(ArenaError::NullBuffer);
        }

        let start = heap_start as usize;
        let padding = align_up(start, BLOCK_ALIGN)
            .map(|aligned| aligned - start)
            .ok_or(ArenaError::OutOfBounds(start))?;
        let usable = heap_size.saturating_sub(padding);
        if usable <= Self::minimum_heap_size() {
            return Err(ArenaError::HeapTooSmall {
                size: usable,
                minimum: Self::minimum_heap_size(),
            });
        }

        let mut lock = self.list.lock();
        if lock.is_some() {
            return Err(ArenaError::AlreadyInitialized);
        }
        let head = block::create_block(heap_start.add(padding), usable)?;
        *lock = Some(BlockList {
            head,
            cursor: None,
            start: head.as_ptr() as usize,
            heap_size: usable,
        });
        drop(lock);

        debug!(
            "arena initialized at {:p} with {} bytes ({} usable)",
            head, usable, usable - HEADER_SIZE
        );
        Ok(())
    }

    /// Buffers of this size or smaller are rejected.
    pub fn minimum_heap_size() -> usize {
        MH::to_usize()
    }

    /// Smallest payload a block created by splitting may have.
    pub fn minimum_free_block() -> usize {
        MF::to_usize()
    }

    /// Allocate `bytes` zeroed bytes.
    ///
    /// Returns `Ok(None)` when no free block is large enough; the arena is
    /// left untouched in that case.
    pub fn allocate(&self, bytes: usize) -> Result<Option<NonNull<u8>>> {
        let mut lock = self.list.lock();
        let list = lock.as_mut().ok_or(ArenaError::Uninitialized)?;
        if bytes == 0 {
            return Err(ArenaError::ZeroSize);
        }

        let grant = match list.first_fit(bytes) {
            Some(block) => unsafe { list.take(block, bytes, Self::minimum_free_block())? },
            None => {
                drop(lock);
                trace!("allocate({}) -> no fitting block", bytes);
                return Ok(None);
            }
        };
        drop(lock);

        match grant.split {
            Some(tail) => trace!(
                "allocate({}) -> {:p} ({} bytes), split off {} free bytes",
                bytes,
                grant.payload,
                grant.size,
                tail
            ),
            None => trace!("allocate({}) -> {:p} ({} bytes)", bytes, grant.payload, grant.size),
        }
        Ok(Some(grant.payload))
    }

    /// Release memory previously returned by [`allocate`](#method.allocate).
    ///
    /// A null pointer is ignored. A pointer outside the arena, or inside it
    /// but not at the start of a payload, is rejected without touching the
    /// arena. Releasing a block that is already free, including one that has
    /// since been merged into a free neighbour, is logged and ignored.
    pub fn deallocate(&self, memory: *mut u8) -> Result<()> {
        let mut lock = self.list.lock();
        let list = lock.as_mut().ok_or(ArenaError::Uninitialized)?;
        let addr = match NonNull::new(memory) {
            Some(memory) => memory.as_ptr() as usize,
            None => return Ok(()),
        };

        let outcome = list.resolve(addr).map(|target| match target {
            Target::Block(block) => unsafe { list.release(block) },
            Target::Stale => Release::Stale,
        });
        drop(lock);

        match outcome {
            Ok(Release::Freed {
                size,
                merged_prev,
                merged_next,
            }) => {
                trace!(
                    "deallocate({:p}) -> free block of {} bytes (merged prev: {}, next: {})",
                    memory,
                    size,
                    merged_prev,
                    merged_next
                );
                Ok(())
            }
            Ok(Release::DoubleFree) => {
                warn!("deallocate({:p}): memory already free", memory);
                Ok(())
            }
            Ok(Release::Stale) => {
                warn!(
                    "deallocate({:p}): stale or unknown pointer inside a free block, ignored",
                    memory
                );
                Ok(())
            }
            Err(err) => {
                error!("deallocate({:p}): {}", memory, err);
                Err(err)
            }
        }
    }

    /// Check the whole block list.
    ///
    /// Fails if a block is badly linked or empty, if blocks do not tile the
    /// arena exactly, if two free blocks are adjacent, or if the cursor does
    /// not name a live block.
    pub fn validate(&self) -> Result<()> {
        let lock = self.list.lock();
        lock.as_ref().ok_or(ArenaError::Uninitialized)?.validate()
    }

    pub fn stats(&self) -> Result<ArenaStats> {
        let lock = self.list.lock();
        Ok(lock.as_ref().ok_or(ArenaError::Uninitialized)?.stats())
    }

    /// Visit every block in address order.
    ///
    /// The lock is held during the walk: `visit` must not call back into
    /// this arena.
    pub fn blocks<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(BlockInfo),
    {
        let lock = self.list.lock();
        let list = lock.as_ref().ok_or(ArenaError::Uninitialized)?;
        list.iter()
            .for_each(|block| visit(unsafe { BlockInfo::of(block) }));
        Ok(())
    }

    /// Write one line per block to `out`.
    pub fn print<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let lock = self.list.lock();
        if let Some(list) = lock.as_ref() {
            for (i, block) in list.iter().enumerate() {
                writeln!(out, "block[{}] | {}", i, unsafe { BlockInfo::of(block) })?;
            }
        }
        Ok(())
    }
}

impl<MH, MF> Default for Arena<MH, MF>
where
    MH: Unsigned,
    MF: Unsigned,
{
    fn default() -> Self {
        Self::empty()
    }
}

impl<MH, MF> fmt::Debug for Arena<MH, MF>
where
    MH: Unsigned,
    MF: Unsigned,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Arena")
            .field("minimum_heap_size", &Self::minimum_heap_size())
            .field("minimum_free_block", &Self::minimum_free_block())
            .field("stats", &self.stats().ok())
            .finish()
    }
}

unsafe impl<MH, MF> GlobalAlloc for Arena<MH, MF>
where
    MH: Unsigned,
    MF: Unsigned,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // payloads are only ever aligned to the header
        if layout.align() > BLOCK_ALIGN {
            return ptr::null_mut();
        }
        match self.allocate(layout.size().max(1)) {
            Ok(Some(memory)) => memory.as_ptr(),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // rejected pointers are already logged by `deallocate`
        let _ = self.deallocate(ptr);
    }
}
