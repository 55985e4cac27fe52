//! Selection of the memory reads that get instrumented as taint sinks.

use crate::instrumentation::{HookRegistry, Instruction};
use crate::prelude::*;

/// Which instructions count as memory reads through a base and an index register.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OperandForm {
    /// Every two-operand instruction whose second operand is a memory reference.
    /// The registers are checked at the width used in the instruction.
    AnyMemoryOperand,
    /// Only move-class instructions that read from memory.
    /// The index register is normalized to its full-width register.
    NormalizedLoad,
}

/// The address registers of an instrumented memory read.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MemoryReadOperand {
    /// The base register of the effective address.
    pub base: Register,
    /// The index register of the effective address.
    pub index: Register,
}

/// The reason why an instruction is not instrumented.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Skip {
    /// The instruction does not belong to the main executable.
    NotMainExecutable,
    /// The instruction does not have exactly two operands.
    OperandCount(usize),
    /// The second operand is not a memory reference.
    SecondOperandNotMemory,
    /// The instruction is not a move-class memory read.
    NotALoad,
    /// The memory reference has no base register.
    MissingBase,
    /// The memory reference has no index register.
    MissingIndex,
    /// A checked register has no tag storage.
    UnsupportedRegister(Register),
}

impl std::fmt::Display for Skip {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::NotMainExecutable => write!(formatter, "not part of the main executable"),
            Skip::OperandCount(count) => write!(formatter, "{} operands instead of 2", count),
            Skip::SecondOperandNotMemory => {
                write!(formatter, "second operand is not a memory reference")
            }
            Skip::NotALoad => write!(formatter, "not a move-class memory read"),
            Skip::MissingBase => write!(formatter, "memory reference without base register"),
            Skip::MissingIndex => write!(formatter, "memory reference without index register"),
            Skip::UnsupportedRegister(register) => {
                write!(formatter, "register {} has no tag storage", register)
            }
        }
    }
}

impl Skip {
    /// Returns `true` for skips of instructions that address memory
    /// but still do not qualify as a sink.
    /// Only these are worth a debug message.
    pub fn is_notable(&self) -> bool {
        !matches!(
            self,
            Skip::NotMainExecutable | Skip::OperandCount(_) | Skip::SecondOperandNotMemory
        )
    }
}

/// Extracts the address registers of memory reads.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OperandResolver {
    form: OperandForm,
}

impl OperandResolver {
    /// Create a resolver for the given operand form.
    pub fn new(form: OperandForm) -> OperandResolver {
        OperandResolver { form }
    }

    /// Decide whether the instruction is a memory read through a base and an index register
    /// and return these registers if it is.
    pub fn resolve(
        &self,
        instruction: &Instruction,
        registry: &dyn HookRegistry,
    ) -> Result<MemoryReadOperand, Skip> {
        match registry.image_containing(instruction.address) {
            Some(image) if image.is_main_executable => (),
            _ => return Err(Skip::NotMainExecutable),
        }
        if instruction.operand_count() != 2 {
            return Err(Skip::OperandCount(instruction.operand_count()));
        }
        let memory = instruction
            .memory_operand(1)
            .ok_or(Skip::SecondOperandNotMemory)?;
        if self.form == OperandForm::NormalizedLoad
            && !(instruction.is_memory_read && instruction.is_mov())
        {
            return Err(Skip::NotALoad);
        }
        let base = memory.base.ok_or(Skip::MissingBase)?;
        let index = memory.index.ok_or(Skip::MissingIndex)?;
        match self.form {
            OperandForm::AnyMemoryOperand => {
                for register in [base, index] {
                    if !register.has_tag_storage() {
                        return Err(Skip::UnsupportedRegister(register));
                    }
                }
                Ok(MemoryReadOperand { base, index })
            }
            OperandForm::NormalizedLoad => {
                // Only the index register gets inspected at the sink.
                let index = index.full_width();
                if !index.has_tag_storage() {
                    return Err(Skip::UnsupportedRegister(index));
                }
                Ok(MemoryReadOperand { base, index })
            }
        }
    }
}
