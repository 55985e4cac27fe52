//! The taint tag model.
//!
//! A [`Tag`] is a small opaque integer attached to a storage location.
//! The tag `0` means "untainted", all other values are handed out by the tag allocator
//! of the [`TagStorage`] backend.
//! The [`TagModel`] offers reads and writes at register and memory granularity on top of the backend.

use crate::instrumentation::TAGS_PER_GPR;
use crate::prelude::*;
use derive_more::*;
use itertools::Itertools;
use std::sync::Arc;

pub mod shadow;

/// A taint tag (sometimes called a color).
#[derive(
    Serialize,
    Deserialize,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Default,
    Display,
    From,
    Into,
)]
#[serde(transparent)]
pub struct Tag(u32);

impl Tag {
    /// The tag of locations that are not tainted.
    pub const UNTAINTED: Tag = Tag(0);

    /// Create a new tag with the given value.
    pub const fn new(value: u32) -> Tag {
        Tag(value)
    }

    /// Returns `true` for every tag except [`Tag::UNTAINTED`].
    pub fn is_tainted(self) -> bool {
        self != Tag::UNTAINTED
    }
}

/// A coordinate into the shadow tag store.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TaggedLocation {
    /// All sub-slots covered by a register in the register file of a thread.
    Register { thread: ThreadId, register: Register },
    /// A single sub-slot of a general purpose register.
    RegisterSlot {
        thread: ThreadId,
        register: RegisterFamily,
        slot: usize,
    },
    /// A byte of process memory.
    Memory { address: u64 },
}

/// The storage backend holding the tags of all memory bytes and register sub-slots.
///
/// Register tags are kept per thread. Memory tags are shared by all threads of the process.
/// Implementations must be safe to use from all threads of the monitored process.
pub trait TagStorage: Send + Sync {
    /// Initialize the storage. Has to be called once before any other method.
    fn init(&self) -> Result<(), Error>;

    /// Release all resources. Called once at the end of the process.
    fn teardown(&self);

    /// Return a fresh nonzero tag.
    fn allocate_tag(&self) -> Tag;

    /// Get the tag of a register sub-slot of a thread.
    fn register_tag(&self, thread: ThreadId, register: RegisterFamily, slot: usize) -> Tag;

    /// Set the tag of a register sub-slot of a thread.
    fn set_register_tag(&self, thread: ThreadId, register: RegisterFamily, slot: usize, tag: Tag);

    /// Get the tag of a memory byte.
    fn memory_tag(&self, address: u64) -> Tag;

    /// Set the tag of a memory byte.
    fn set_memory_tag(&self, address: u64, tag: Tag);
}

/// Read and write access to tags at register and memory granularity.
///
/// Cloning a `TagModel` is cheap, all clones share the same storage backend.
#[derive(Clone)]
pub struct TagModel {
    storage: Arc<dyn TagStorage>,
}

impl TagModel {
    /// Create a new tag model on top of the given storage backend.
    pub fn new(storage: Arc<dyn TagStorage>) -> TagModel {
        TagModel { storage }
    }

    /// Get a fresh nonzero tag from the storage backend.
    pub fn allocate_tag(&self) -> Tag {
        self.storage.allocate_tag()
    }

    /// Set the tag of a location.
    ///
    /// Writing to a register sets all of its sub-slots.
    /// Registers without tag storage are ignored.
    pub fn write(&self, location: &TaggedLocation, tag: Tag) {
        match *location {
            TaggedLocation::Register { thread, register } => {
                if let Some((family, slots)) = register.tag_slots() {
                    for slot in slots {
                        self.storage.set_register_tag(thread, family, slot, tag);
                    }
                }
            }
            TaggedLocation::RegisterSlot {
                thread,
                register,
                slot,
            } => self.storage.set_register_tag(thread, register, slot, tag),
            TaggedLocation::Memory { address } => self.storage.set_memory_tag(address, tag),
        }
    }

    /// Get the tag of a location.
    ///
    /// For registers the first nonzero tag of its sub-slots is returned.
    pub fn read(&self, location: &TaggedLocation) -> Tag {
        match *location {
            TaggedLocation::Register { thread, register } => self
                .register_tags(thread, register)
                .into_iter()
                .find(|tag| tag.is_tainted())
                .unwrap_or_default(),
            TaggedLocation::RegisterSlot {
                thread,
                register,
                slot,
            } => self.storage.register_tag(thread, register, slot),
            TaggedLocation::Memory { address } => self.storage.memory_tag(address),
        }
    }

    /// Get the tags of all sub-slots covered by the register, in slot order.
    ///
    /// Returns an empty vector for registers without tag storage.
    pub fn register_tags(&self, thread: ThreadId, register: Register) -> Vec<Tag> {
        match register.tag_slots() {
            Some((family, slots)) => slots
                .map(|slot| self.storage.register_tag(thread, family, slot))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Set the tag of every byte in `[address, address + size)`.
    pub fn write_memory_range(&self, address: u64, size: u64, tag: Tag) {
        for offset in 0..size {
            self.storage
                .set_memory_tag(address.wrapping_add(offset), tag);
        }
    }

    /// Get the tags of every byte in `[address, address + size)`.
    pub fn memory_tags(&self, address: u64, size: u64) -> Vec<Tag> {
        (0..size)
            .map(|offset| self.storage.memory_tag(address.wrapping_add(offset)))
            .collect()
    }

    /// Print the sub-slot tags of all general purpose registers of the thread,
    /// one register per line.
    pub fn dump_registers(&self, thread: ThreadId) -> String {
        RegisterFamily::ALL
            .iter()
            .map(|family| {
                let tags = (0..TAGS_PER_GPR)
                    .map(|slot| self.storage.register_tag(thread, *family, slot))
                    .join(", ");
                format!("{} : {}", Register::full(*family), tags)
            })
            .join("\n")
    }
}
