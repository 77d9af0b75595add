#![allow(dead_code)]

use std::slice;

use blockarena::Arena;
use blockarena::BlockInfo;
use blockarena::HEADER_SIZE;

pub const MEM_SIZE: usize = 10000;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A leaked buffer of `bytes` bytes, aligned for block headers.
pub fn buffer(bytes: usize) -> &'static mut [u8] {
    let words = Box::leak(vec![0u64; (bytes + 7) / 8].into_boxed_slice());
    unsafe { slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, bytes) }
}

pub fn arena(bytes: usize) -> Arena {
    init_logger();
    Arena::from_slice(buffer(bytes)).unwrap()
}

pub fn blocks(arena: &Arena) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    arena.blocks(|info| blocks.push(info)).unwrap();
    blocks
}

/// Payload size of the single block of a fresh arena.
pub fn usable(bytes: usize) -> usize {
    bytes - HEADER_SIZE
}

/// Assert the arena is back to one free block spanning all of it.
pub fn assert_pristine(arena: &Arena, bytes: usize) {
    arena.validate().unwrap();
    let blocks = blocks(arena);
    assert_eq!(blocks.len(), 1, "{:?}", blocks);
    assert!(blocks[0].free);
    assert_eq!(blocks[0].size, usable(bytes));
}

pub fn alloc_dealloc(arena: &Arena, bytes: usize) {
    let memory = arena.allocate(bytes).unwrap().expect("arena exhausted");
    unsafe { memory.as_ptr().write_bytes(0x5a, bytes) };
    arena.deallocate(memory.as_ptr()).unwrap();
}
