use crate::instrumentation::*;

/// A hook registry that records the inserted hooks so that tests can run them by hand.
pub struct MockRegistry {
    pub images: Vec<Image>,
    pub routine_hooks: Vec<(Routine, RoutineHook)>,
    pub instruction_hooks: Vec<(u64, InstructionHook)>,
}

impl MockRegistry {
    /// A registry knowing a main executable at `0x400000..=0x40ffff`
    /// that contains the routine `main` at `0x401000`,
    /// and a library at `0x7f0000000000..=0x7f000000ffff`.
    pub fn mock() -> MockRegistry {
        let mut main_executable = Image::mock(0, "prog", true, 0x400000, 0x40ffff);
        main_executable.routines.push(Routine {
            name: "main".to_string(),
            address: 0x401000,
        });
        let library = Image::mock(1, "libc.so.6", false, 0x7f0000000000, 0x7f000000ffff);
        MockRegistry {
            images: vec![main_executable, library],
            routine_hooks: Vec::new(),
            instruction_hooks: Vec::new(),
        }
    }

    /// Run all routine hooks as if `thread` entered the routine at `address`.
    pub fn enter_routine(&self, thread: ThreadId, address: u64, argument_references: Vec<u64>) {
        let entry = RoutineEntry {
            thread,
            routine_address: address,
            argument_references,
        };
        for (routine, hook) in self.routine_hooks.iter() {
            if routine.address == address {
                hook(&entry);
            }
        }
    }

    /// Run all instruction hooks as if `thread` executed the instruction at `address`.
    pub fn execute(&self, thread: ThreadId, address: u64) {
        let execution = InstructionExecution { thread, address };
        for (hook_address, hook) in self.instruction_hooks.iter() {
            if *hook_address == address {
                hook(&execution);
            }
        }
    }
}

impl HookRegistry for MockRegistry {
    fn image_containing(&self, address: u64) -> Option<&Image> {
        self.images.iter().find(|image| image.contains(address))
    }

    fn insert_routine_entry_call(&mut self, routine: &Routine, hook: RoutineHook) {
        self.routine_hooks.push((routine.clone(), hook));
    }

    fn insert_predicated_call(&mut self, instruction: &Instruction, hook: InstructionHook) {
        self.instruction_hooks.push((instruction.address, hook));
    }
}
