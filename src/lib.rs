// Copyright (c) 2018-2019 Martin Larralde (martin.larralde@ens-paris-saclay.fr)
//
// Licensed under MIT license (the COPYING file). This file may not be
// copied, modified, or distributed except according to those terms.

//! A fixed-capacity allocator managing a single caller-supplied buffer.
//!
//! Designed for embedded or constrained environments, where the heap must not
//! grow and an application wants full control over a bounded memory region.
//!
//! # Algorithm
//!
//! The [`Arena`] splits its buffer into *blocks*. Each block starts with a
//! small [`Block`] header (links to its neighbours, a free flag and the
//! payload size) immediately followed by the payload handed to callers.
//! Headers form a doubly-linked list kept in address order, and the blocks
//! tile the buffer without gaps.
//!
//! ## Allocation
//!
//! When a request is made to allocate memory, the arena walks the list from
//! its head, using a **first-fit** method: the first free block large enough
//! is taken. If enough space would remain for a header and a minimum free
//! payload, the tail of the block is split off as a new free block. The
//! payload is zeroed before being returned. If no block fits, the allocation
//! returns `None` and the arena is left untouched.
//!
//! ## Deallocation
//!
//! The header is recovered from the payload address, after checking that the
//! address lies within the arena and starts a payload. The block is marked
//! free and merged with its free neighbours, so two free blocks are never
//! adjacent. Releasing a block twice is logged and otherwise ignored.
//!
//! ## Synchronisation
//!
//! A single *spinning mutex* from the [`spin`] crate guards every operation
//! for its whole duration, so the arena can be shared between threads.
//!
//! ## Configuration
//!
//! The minimum heap size and the minimum free block size are given at compile
//! time using numerics from the [`typenum`] crate, and default to `1kB` and
//! `32B`.
//!
//! # Usage
//!
//! ```rust
//! extern crate blockarena;
//!
//! use blockarena::Arena;
//!
//! # fn main() {
//! let mut buffer = vec![0u64; 1250];
//! let arena: Arena = unsafe { Arena::new(buffer.as_mut_ptr() as *mut u8, 10000) }.unwrap();
//!
//! let memory = arena.allocate(125).unwrap().expect("arena exhausted");
//! arena.deallocate(memory.as_ptr()).unwrap();
//! arena.validate().unwrap();
//! # }
//! ```
//!
//! [`spin`]: https://docs.rs/spin/
//! [`typenum`]: https://docs.rs/typenum/
//! [`Arena`]: struct.Arena.html
//! [`Block`]: struct.Block.html

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate spin;
extern crate thiserror;
extern crate typenum;

mod alloc;
mod block;
mod error;
mod utils;

pub use self::alloc::Arena;
pub use self::alloc::ArenaStats;
pub use self::block::create_block;
pub use self::block::validate_block;
pub use self::block::Block;
pub use self::block::BlockInfo;
pub use self::block::BLOCK_ALIGN;
pub use self::block::HEADER_SIZE;
pub use self::error::ArenaError;
pub use self::error::Result;

use spin::Mutex;
