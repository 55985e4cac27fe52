//! An in-process shadow tag store.
//!
//! Memory tags are kept in lazily allocated pages of one tag per byte.
//! Each thread gets its own register file of [`TAGS_PER_GPR`] tags per general purpose register.

use super::{Tag, TagStorage};
use crate::instrumentation::TAGS_PER_GPR;
use crate::prelude::*;
use fnv::FnvHashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// The number of bytes covered by one shadow page.
pub const SHADOW_PAGE_SIZE: u64 = 4096;

type RegisterFile = [[Tag; TAGS_PER_GPR]; 16];

/// A [`TagStorage`] backend keeping all tags in process memory.
pub struct ShadowStorage {
    /// Register files indexed by thread.
    registers: RwLock<FnvHashMap<ThreadId, Mutex<RegisterFile>>>,
    /// Memory tag pages indexed by page number.
    memory: RwLock<FnvHashMap<u64, Box<[Tag]>>>,
    /// The next candidate value of the tag allocator.
    next_tag: AtomicU32,
    /// Tags the allocator must never hand out.
    reserved: BTreeSet<Tag>,
    initialized: AtomicBool,
}

impl Default for ShadowStorage {
    fn default() -> Self {
        ShadowStorage::new()
    }
}

impl ShadowStorage {
    /// Create an empty storage.
    pub fn new() -> ShadowStorage {
        ShadowStorage {
            registers: RwLock::new(FnvHashMap::default()),
            memory: RwLock::new(FnvHashMap::default()),
            next_tag: AtomicU32::new(1),
            reserved: BTreeSet::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Exclude the given tag from allocation,
    /// so that it keeps a special meaning (e.g. as a sentinel tag).
    pub fn with_reserved_tag(mut self, tag: Tag) -> ShadowStorage {
        self.reserved.insert(tag);
        self
    }

    /// Returns `true` between a successful [`init`](TagStorage::init)
    /// and the following [`teardown`](TagStorage::teardown).
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The number of shadow pages currently allocated.
    pub fn page_count(&self) -> usize {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn page_of(address: u64) -> (u64, usize) {
        (
            address / SHADOW_PAGE_SIZE,
            (address % SHADOW_PAGE_SIZE) as usize,
        )
    }
}

impl TagStorage for ShadowStorage {
    fn init(&self) -> Result<(), Error> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("Shadow tag storage is already initialized."));
        }
        Ok(())
    }

    fn teardown(&self) {
        self.registers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.initialized.store(false, Ordering::SeqCst);
    }

    fn allocate_tag(&self) -> Tag {
        loop {
            let tag = Tag::new(self.next_tag.fetch_add(1, Ordering::Relaxed));
            if tag.is_tainted() && !self.reserved.contains(&tag) {
                return tag;
            }
        }
    }

    fn register_tag(&self, thread: ThreadId, register: RegisterFamily, slot: usize) -> Tag {
        let files = self
            .registers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match files.get(&thread) {
            Some(file) => {
                let file = file.lock().unwrap_or_else(PoisonError::into_inner);
                file[register.index()]
                    .get(slot)
                    .copied()
                    .unwrap_or_default()
            }
            None => Tag::UNTAINTED,
        }
    }

    fn set_register_tag(&self, thread: ThreadId, register: RegisterFamily, slot: usize, tag: Tag) {
        if slot >= TAGS_PER_GPR {
            return;
        }
        {
            let files = self
                .registers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(file) = files.get(&thread) {
                file.lock().unwrap_or_else(PoisonError::into_inner)[register.index()][slot] = tag;
                return;
            }
        }
        let mut files = self
            .registers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let file = files
            .entry(thread)
            .or_insert_with(|| Mutex::new([[Tag::UNTAINTED; TAGS_PER_GPR]; 16]));
        file.get_mut().unwrap_or_else(PoisonError::into_inner)[register.index()][slot] = tag;
    }

    fn memory_tag(&self, address: u64) -> Tag {
        let (page, offset) = Self::page_of(address);
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
            .map(|tags| tags[offset])
            .unwrap_or_default()
    }

    fn set_memory_tag(&self, address: u64, tag: Tag) {
        let (page, offset) = Self::page_of(address);
        let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(tags) = memory.get_mut(&page) {
            tags[offset] = tag;
        } else if tag.is_tainted() {
            // Untainted pages need no backing storage.
            let mut tags = vec![Tag::UNTAINTED; SHADOW_PAGE_SIZE as usize].into_boxed_slice();
            tags[offset] = tag;
            memory.insert(page, tags);
        }
    }
}
