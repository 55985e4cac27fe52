//! x86-64 registers as seen by the tag storage.
//!
//! Every general purpose register owns [`TAGS_PER_GPR`] tag sub-slots, one per byte.
//! Sub-registers like `eax` or `ah` are views onto a part of the sub-slots of their 64-bit parent.

use crate::prelude::*;
use std::ops::Range;
use std::str::FromStr;

/// The number of tag sub-slots of a general purpose register.
pub const TAGS_PER_GPR: usize = 8;

/// The integer argument registers of the System V AMD64 calling convention, in argument order.
pub const SYSTEM_V_INTEGER_ARGUMENTS: [RegisterFamily; 6] = [
    RegisterFamily::Rdi,
    RegisterFamily::Rsi,
    RegisterFamily::Rdx,
    RegisterFamily::Rcx,
    RegisterFamily::R8,
    RegisterFamily::R9,
];

/// Get the register holding the integer argument at the given position.
///
/// Returns `None` for positions that are not passed in registers.
pub fn integer_argument_register(position: u32) -> Option<RegisterFamily> {
    SYSTEM_V_INTEGER_ARGUMENTS.get(position as usize).copied()
}

/// A 64-bit general purpose register together with all of its sub-registers.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum RegisterFamily {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl RegisterFamily {
    /// All general purpose registers in tag storage order.
    pub const ALL: [RegisterFamily; 16] = [
        RegisterFamily::Rax,
        RegisterFamily::Rbx,
        RegisterFamily::Rcx,
        RegisterFamily::Rdx,
        RegisterFamily::Rsi,
        RegisterFamily::Rdi,
        RegisterFamily::Rbp,
        RegisterFamily::Rsp,
        RegisterFamily::R8,
        RegisterFamily::R9,
        RegisterFamily::R10,
        RegisterFamily::R11,
        RegisterFamily::R12,
        RegisterFamily::R13,
        RegisterFamily::R14,
        RegisterFamily::R15,
    ];

    /// The index of the register file entry of this register.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The names of the views onto this register,
    /// ordered as `[64-bit, 32-bit, 16-bit, low 8-bit, high 8-bit]`.
    fn view_names(self) -> [Option<&'static str>; 5] {
        use RegisterFamily::*;
        let names = match self {
            Rax => ["rax", "eax", "ax", "al", "ah"],
            Rbx => ["rbx", "ebx", "bx", "bl", "bh"],
            Rcx => ["rcx", "ecx", "cx", "cl", "ch"],
            Rdx => ["rdx", "edx", "dx", "dl", "dh"],
            Rsi => ["rsi", "esi", "si", "sil", ""],
            Rdi => ["rdi", "edi", "di", "dil", ""],
            Rbp => ["rbp", "ebp", "bp", "bpl", ""],
            Rsp => ["rsp", "esp", "sp", "spl", ""],
            R8 => ["r8", "r8d", "r8w", "r8b", ""],
            R9 => ["r9", "r9d", "r9w", "r9b", ""],
            R10 => ["r10", "r10d", "r10w", "r10b", ""],
            R11 => ["r11", "r11d", "r11w", "r11b", ""],
            R12 => ["r12", "r12d", "r12w", "r12b", ""],
            R13 => ["r13", "r13d", "r13w", "r13b", ""],
            R14 => ["r14", "r14d", "r14w", "r14b", ""],
            R15 => ["r15", "r15d", "r15w", "r15b", ""],
        };
        names.map(|name| if name.is_empty() { None } else { Some(name) })
    }

    /// Get the name of the given view onto this register,
    /// or `None` if the view does not exist (e.g. there is no high byte of `rsi`).
    pub fn view_name(self, view: RegisterView) -> Option<&'static str> {
        self.view_names()[view.name_index()]
    }
}

/// The part of a general purpose register that an instruction operand refers to.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum RegisterView {
    /// The full 64-bit register, e.g. `rax`.
    Full64,
    /// The lower 32 bits, e.g. `eax`.
    Low32,
    /// The lower 16 bits, e.g. `ax`.
    Low16,
    /// The lowest byte, e.g. `al`.
    Low8,
    /// The second lowest byte, e.g. `ah`.
    High8,
}

impl RegisterView {
    const ALL: [RegisterView; 5] = [
        RegisterView::Full64,
        RegisterView::Low32,
        RegisterView::Low16,
        RegisterView::Low8,
        RegisterView::High8,
    ];

    fn name_index(self) -> usize {
        self as usize
    }

    /// The tag sub-slots of the parent register covered by this view.
    pub fn tag_slots(self) -> Range<usize> {
        match self {
            RegisterView::Full64 => 0..TAGS_PER_GPR,
            RegisterView::Low32 => 0..4,
            RegisterView::Low16 => 0..2,
            RegisterView::Low8 => 0..1,
            RegisterView::High8 => 1..2,
        }
    }
}

/// A register operand.
///
/// Registers are (de)serialized by their lower-case assembly name, e.g. `"ecx"`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[serde(try_from = "String", into = "String")]
pub enum Register {
    /// A general purpose register or one of its sub-registers.
    General {
        family: RegisterFamily,
        view: RegisterView,
    },
    /// The instruction pointer. It has no tag storage.
    Rip,
}

impl Register {
    /// The full 64-bit view of the given register.
    pub fn full(family: RegisterFamily) -> Register {
        Register::General {
            family,
            view: RegisterView::Full64,
        }
    }

    /// Return the register of full architectural width that contains `self`.
    /// E.g. `ecx` gets normalized to `rcx`.
    pub fn full_width(self) -> Register {
        match self {
            Register::General { family, .. } => Register::full(family),
            Register::Rip => Register::Rip,
        }
    }

    /// Get the register file entry and the sub-slots of it that hold the tags of this register.
    ///
    /// Returns `None` for registers without tag storage.
    pub fn tag_slots(self) -> Option<(RegisterFamily, Range<usize>)> {
        match self {
            Register::General { family, view } => Some((family, view.tag_slots())),
            Register::Rip => None,
        }
    }

    /// Returns `true` if the tag storage holds tags for this register.
    pub fn has_tag_storage(self) -> bool {
        self.tag_slots().is_some()
    }

    /// The assembly name of the register.
    pub fn name(self) -> &'static str {
        match self {
            // Only views with a name can be constructed.
            Register::General { family, view } => family.view_name(view).unwrap_or("invalid"),
            Register::Rip => "rip",
        }
    }
}

impl FromStr for Register {
    type Err = Error;

    fn from_str(name: &str) -> Result<Register, Error> {
        let name = name.to_ascii_lowercase();
        if name == "rip" {
            return Ok(Register::Rip);
        }
        for family in RegisterFamily::ALL {
            for view in RegisterView::ALL {
                if family.view_name(view) == Some(name.as_str()) {
                    return Ok(Register::General { family, view });
                }
            }
        }
        Err(anyhow!("Unknown register name {}", name))
    }
}

impl TryFrom<String> for Register {
    type Error = Error;

    fn try_from(name: String) -> Result<Register, Error> {
        name.parse()
    }
}

impl From<Register> for String {
    fn from(register: Register) -> String {
        register.name().to_string()
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.name())
    }
}
