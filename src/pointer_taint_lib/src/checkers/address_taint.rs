//! This module implements a check for tainted addresses of memory reads.
//!
//! If data that an attacker controls flows unchecked into the address computation of a memory read,
//! the attacker may read (or through a following write, modify) arbitrary memory.
//!
//! ## How the check works
//!
//! Whenever the configured function is entered, the System V integer argument registers
//! of the configured argument positions are tainted with a freshly allocated tag.
//! Before every two-operand instruction of the main executable whose second operand is a memory reference
//! with both a base and an index register, the tags of both registers are summed up.
//! A nonzero sum generates a warning.
//!
//! ## False Positives
//!
//! - The tainted value may have been bounds-checked before it is used for addressing.
//! - Instructions like `lea` that compute an address without reading memory are checked as well.
//!
//! ## False Negatives
//!
//! - Arguments passed on the stack (position 6 and above) cannot be tainted.
//! - Taint only reaches the address registers if the tag storage backend propagates it.
//! - Memory reads addressed through only one register are not checked.

use crate::analysis::operand_resolver::OperandForm;
use crate::analysis::policy::PolicyKind;
use crate::analysis::source_binder::BindingMode;
use crate::{CheckModule, Variant};

/// The module name, version and variant
pub static CHECK_MODULE: CheckModule = CheckModule {
    name: "AddressTaint",
    version: "0.1",
    variant: Variant {
        binding: BindingMode::Register,
        operand_form: OperandForm::AnyMemoryOperand,
        policy: PolicyKind::TagSum,
    },
};
