//! A deterministic instrumentation engine replaying recorded execution traces.
//!
//! A [`Trace`] lists the images of the process, the decoded instructions
//! and the sequence of events that happened during execution.
//! The [`ReplayEngine`] announces all images to the image listeners when the program starts
//! and announces each instruction to the instruction listeners when it is executed for the first time.
//! Hooks run in event order.
//!
//! Since the core analyses do not propagate taint themselves,
//! the trace also contains the tag transfers performed by the tag storage backend,
//! e.g. loading the tags of memory bytes into a register.

use crate::instrumentation::*;
use crate::prelude::*;
use crate::taint::{TagModel, TagStorage, TaggedLocation};
use fnv::{FnvHashMap, FnvHashSet};
use std::path::Path;
use std::sync::Arc;

/// An event of a recorded execution.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A thread enters the routine at the given address.
    Call {
        thread: ThreadId,
        routine: u64,
        /// The entry references of the arguments.
        #[serde(default)]
        arguments: Vec<u64>,
    },
    /// A thread reaches the instruction at the given address.
    /// `executes` is `false` if the predicate of the instruction prevented its execution.
    Execute {
        thread: ThreadId,
        address: u64,
        #[serde(default = "default_executes")]
        executes: bool,
    },
    /// The backend copies the tags of the bytes at `address` into the sub-slots of the register.
    LoadRegister {
        thread: ThreadId,
        register: Register,
        address: u64,
    },
    /// The backend copies the sub-slot tags of `from` into `to`.
    /// Sub-slots of `to` without counterpart in `from` become untainted.
    MoveRegister {
        thread: ThreadId,
        from: Register,
        to: Register,
    },
    /// The backend untaints all sub-slots of the register.
    ClearRegister { thread: ThreadId, register: Register },
}

fn default_executes() -> bool {
    true
}

/// A recorded execution.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct Trace {
    /// The images loaded into the process.
    #[serde(default)]
    pub images: Vec<Image>,
    /// The decoded instructions referenced by `execute` events.
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// The events in execution order.
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

impl Trace {
    /// Read a trace from a JSON file.
    pub fn from_file(path: &Path) -> Result<Trace, Error> {
        let file = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read trace file {}", path.display()))?;
        serde_json::from_str(&file)
            .with_context(|| format!("Could not parse trace file {}", path.display()))
    }

    /// Get the image of the main executable.
    pub fn main_executable_mut(&mut self) -> Option<&mut Image> {
        self.images
            .iter_mut()
            .find(|image| image.is_main_executable)
    }
}

/// Counters of a finished replay.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct ReplayStatistics {
    /// The number of replayed events.
    pub events: usize,
    /// The number of routine entry hooks that ran.
    pub routine_hooks_run: usize,
    /// The number of instruction hooks that ran.
    pub instruction_hooks_run: usize,
    /// The number of instruction hooks not run because the predicate was false.
    pub predicated_hooks_skipped: usize,
}

#[derive(Default)]
struct HookTable {
    routine_hooks: FnvHashMap<u64, Vec<RoutineHook>>,
    instruction_hooks: FnvHashMap<u64, Vec<InstructionHook>>,
}

/// The view of the engine handed to listeners during callbacks.
struct Registry<'a> {
    images: &'a [Image],
    hooks: &'a mut HookTable,
}

impl<'a> HookRegistry for Registry<'a> {
    fn image_containing(&self, address: u64) -> Option<&Image> {
        self.images.iter().find(|image| image.contains(address))
    }

    fn insert_routine_entry_call(&mut self, routine: &Routine, hook: RoutineHook) {
        self.hooks
            .routine_hooks
            .entry(routine.address)
            .or_default()
            .push(hook);
    }

    fn insert_predicated_call(&mut self, instruction: &Instruction, hook: InstructionHook) {
        self.hooks
            .instruction_hooks
            .entry(instruction.address)
            .or_default()
            .push(hook);
    }
}

/// An [`InstrumentationEngine`] replaying a [`Trace`].
pub struct ReplayEngine {
    trace: Trace,
    model: TagModel,
    image_listeners: Vec<Arc<dyn ImageListener>>,
    instruction_listeners: Vec<Arc<dyn InstructionListener>>,
    statistics: ReplayStatistics,
}

impl ReplayEngine {
    /// Create an engine replaying `trace`.
    /// Tag transfers of the trace are applied to `storage`.
    pub fn new(trace: Trace, storage: Arc<dyn TagStorage>) -> ReplayEngine {
        ReplayEngine {
            trace,
            model: TagModel::new(storage),
            image_listeners: Vec::new(),
            instruction_listeners: Vec::new(),
            statistics: ReplayStatistics::default(),
        }
    }

    /// The counters of the last replay.
    pub fn statistics(&self) -> ReplayStatistics {
        self.statistics
    }

    fn load_register(&self, thread: ThreadId, register: Register, address: u64) {
        if let Some((family, slots)) = register.tag_slots() {
            for (offset, slot) in slots.enumerate() {
                let tag = self.model.read(&TaggedLocation::Memory {
                    address: address.wrapping_add(offset as u64),
                });
                self.model.write(
                    &TaggedLocation::RegisterSlot {
                        thread,
                        register: family,
                        slot,
                    },
                    tag,
                );
            }
        }
    }

    fn move_register(&self, thread: ThreadId, from: Register, to: Register) {
        let tags = self.model.register_tags(thread, from);
        if let Some((family, slots)) = to.tag_slots() {
            for (offset, slot) in slots.enumerate() {
                self.model.write(
                    &TaggedLocation::RegisterSlot {
                        thread,
                        register: family,
                        slot,
                    },
                    tags.get(offset).copied().unwrap_or_default(),
                );
            }
        }
    }
}

impl InstrumentationEngine for ReplayEngine {
    fn add_image_instrumentation(&mut self, listener: Arc<dyn ImageListener>) {
        self.image_listeners.push(listener);
    }

    fn add_instruction_instrumentation(&mut self, listener: Arc<dyn InstructionListener>) {
        self.instruction_listeners.push(listener);
    }

    fn start_program(&mut self) -> Result<(), Error> {
        let mut statistics = ReplayStatistics::default();
        let mut hooks = HookTable::default();
        let mut decoded = FnvHashSet::default();
        let instructions: FnvHashMap<u64, &Instruction> = self
            .trace
            .instructions
            .iter()
            .map(|instruction| (instruction.address, instruction))
            .collect();

        for image in self.trace.images.iter() {
            for listener in self.image_listeners.iter() {
                let mut registry = Registry {
                    images: &self.trace.images,
                    hooks: &mut hooks,
                };
                listener.on_image_load(image, &mut registry);
            }
        }

        for (number, event) in self.trace.events.iter().enumerate() {
            statistics.events += 1;
            match event {
                TraceEvent::Call {
                    thread,
                    routine,
                    arguments,
                } => {
                    if let Some(routine_hooks) = hooks.routine_hooks.get(routine) {
                        let entry = RoutineEntry {
                            thread: *thread,
                            routine_address: *routine,
                            argument_references: arguments.clone(),
                        };
                        for hook in routine_hooks {
                            hook(&entry);
                            statistics.routine_hooks_run += 1;
                        }
                    }
                }
                TraceEvent::Execute {
                    thread,
                    address,
                    executes,
                } => {
                    let instruction = instructions.get(address).ok_or_else(|| {
                        anyhow!("Event {}: no instruction known at {:#x}", number, address)
                    })?;
                    if decoded.insert(*address) {
                        for listener in self.instruction_listeners.iter() {
                            let mut registry = Registry {
                                images: &self.trace.images,
                                hooks: &mut hooks,
                            };
                            listener.on_instruction_decoded(instruction, &mut registry);
                        }
                    }
                    let instruction_hooks = match hooks.instruction_hooks.get(address) {
                        Some(instruction_hooks) => instruction_hooks,
                        None => continue,
                    };
                    if !*executes {
                        statistics.predicated_hooks_skipped += instruction_hooks.len();
                        continue;
                    }
                    let execution = InstructionExecution {
                        thread: *thread,
                        address: *address,
                    };
                    for hook in instruction_hooks {
                        hook(&execution);
                        statistics.instruction_hooks_run += 1;
                    }
                }
                TraceEvent::LoadRegister {
                    thread,
                    register,
                    address,
                } => self.load_register(*thread, *register, *address),
                TraceEvent::MoveRegister { thread, from, to } => {
                    self.move_register(*thread, *from, *to)
                }
                TraceEvent::ClearRegister { thread, register } => self.model.write(
                    &TaggedLocation::Register {
                        thread: *thread,
                        register: *register,
                    },
                    Tag::UNTAINTED,
                ),
            }
        }
        self.statistics = statistics;
        Ok(())
    }
}
