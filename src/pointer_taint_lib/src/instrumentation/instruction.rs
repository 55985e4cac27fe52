//! Decoded instructions as supplied by the instrumentation engine.

use super::Register;
use crate::prelude::*;
use itertools::Itertools;

/// Mnemonics of the move-class instructions that count as loads.
pub const MOVE_MNEMONICS: [&str; 5] = ["mov", "movzx", "movsx", "movsxd", "movabs"];

/// A memory reference operand `[base + index*scale + displacement]`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct MemoryOperand {
    /// The base register, if any.
    #[serde(default)]
    pub base: Option<Register>,
    /// The index register, if any.
    #[serde(default)]
    pub index: Option<Register>,
    /// The scale factor applied to the index register.
    #[serde(default = "default_scale")]
    pub scale: u8,
    /// The constant displacement.
    #[serde(default)]
    pub displacement: i64,
}

fn default_scale() -> u8 {
    1
}

impl std::fmt::Display for MemoryOperand {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(base) = self.base {
            parts.push(base.to_string());
        }
        if let Some(index) = self.index {
            if self.scale == 1 {
                parts.push(index.to_string());
            } else {
                parts.push(format!("{}*{}", index, self.scale));
            }
        }
        if self.displacement != 0 || parts.is_empty() {
            parts.push(format!("{:#x}", self.displacement));
        }
        write!(formatter, "[{}]", parts.join(" + "))
    }
}

/// An operand of a decoded instruction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// A register operand.
    Register { register: Register },
    /// A memory reference.
    Memory(MemoryOperand),
    /// An immediate value.
    Immediate { value: i64 },
}

impl std::fmt::Display for Operand {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register { register } => write!(formatter, "{}", register),
            Operand::Memory(memory) => write!(formatter, "{}", memory),
            Operand::Immediate { value } => write!(formatter, "{:#x}", value),
        }
    }
}

/// A decoded instruction.
///
/// Operands are given in Intel order, i.e. the destination comes first.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Instruction {
    /// The address of the instruction.
    pub address: u64,
    /// The mnemonic, e.g. `mov`.
    pub mnemonic: String,
    /// The explicit operands of the instruction.
    pub operands: Vec<Operand>,
    /// Set if executing the instruction reads from memory.
    #[serde(default)]
    pub is_memory_read: bool,
}

impl Instruction {
    /// The number of explicit operands.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Get the memory operand at the given operand position,
    /// or `None` if the operand does not exist or is not a memory reference.
    pub fn memory_operand(&self, position: usize) -> Option<&MemoryOperand> {
        match self.operands.get(position) {
            Some(Operand::Memory(memory)) => Some(memory),
            _ => None,
        }
    }

    /// Returns `true` for move-class instructions.
    pub fn is_mov(&self) -> bool {
        let mnemonic = self.mnemonic.to_ascii_lowercase();
        MOVE_MNEMONICS.contains(&mnemonic.as_str())
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{:#x}: {}", self.address, self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(formatter, " {}", self.operands.iter().join(", "))?;
        }
        Ok(())
    }
}
