//! The interface to the dynamic binary instrumentation engine.
//!
//! The engine announces every loaded image to the registered [`ImageListener`]s
//! and every newly decoded instruction to the registered [`InstructionListener`]s.
//! During these callbacks the listeners may insert hooks through the given [`HookRegistry`].
//! The engine then executes the hooks inline on the thread that reaches the hooked program point.

use crate::prelude::*;
use derive_more::*;
use std::sync::Arc;

mod image;
pub use image::*;
mod instruction;
pub use instruction::*;
mod register;
pub use register::*;

/// The identifier of a thread of the monitored process, as assigned by the engine.
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
pub struct ThreadId(u32);

impl ThreadId {
    /// Create a new thread identifier.
    pub fn new(id: u32) -> ThreadId {
        ThreadId(id)
    }
}

/// The information available to a hook inserted before the entry of a routine.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RoutineEntry {
    /// The thread entering the routine.
    pub thread: ThreadId,
    /// The entry address of the routine.
    pub routine_address: u64,
    /// For each argument position the address of the storage location of the argument at function entry.
    pub argument_references: Vec<u64>,
}

impl RoutineEntry {
    /// Get the entry reference of the argument at the given position.
    pub fn argument_reference(&self, position: u32) -> Option<u64> {
        self.argument_references.get(position as usize).copied()
    }
}

/// The information available to a hook inserted before an instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InstructionExecution {
    /// The thread executing the instruction.
    pub thread: ThreadId,
    /// The address of the instruction.
    pub address: u64,
}

/// A hook executed before the entry of a routine.
pub type RoutineHook = Box<dyn Fn(&RoutineEntry) + Send + Sync>;

/// A hook executed before an instruction.
pub type InstructionHook = Box<dyn Fn(&InstructionExecution) + Send + Sync>;

/// The hook insertion capabilities offered to listeners during instrumentation callbacks.
pub trait HookRegistry {
    /// Get the loaded image containing the given address.
    fn image_containing(&self, address: u64) -> Option<&Image>;

    /// Insert a hook that runs whenever the routine is entered,
    /// before its first instruction executes.
    fn insert_routine_entry_call(&mut self, routine: &Routine, hook: RoutineHook);

    /// Insert a hook that runs before the instruction executes,
    /// but only if the instruction's predicate allows it to execute.
    fn insert_predicated_call(&mut self, instruction: &Instruction, hook: InstructionHook);
}

/// Receives a notification once per loaded image.
pub trait ImageListener: Send + Sync {
    /// Called when the image gets loaded, before any of its code runs.
    fn on_image_load(&self, image: &Image, registry: &mut dyn HookRegistry);
}

/// Receives a notification once per decoded instruction.
pub trait InstructionListener: Send + Sync {
    /// Called when the instruction gets decoded for the first time.
    fn on_instruction_decoded(&self, instruction: &Instruction, registry: &mut dyn HookRegistry);
}

/// A dynamic binary instrumentation engine.
pub trait InstrumentationEngine {
    /// Register a listener for image load notifications.
    fn add_image_instrumentation(&mut self, listener: Arc<dyn ImageListener>);

    /// Register a listener for instruction decode notifications.
    fn add_instruction_instrumentation(&mut self, listener: Arc<dyn InstructionListener>);

    /// Run the monitored program to completion.
    fn start_program(&mut self) -> Result<(), Error>;
}
