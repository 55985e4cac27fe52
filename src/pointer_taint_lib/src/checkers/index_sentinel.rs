//! This module implements a check for bounds-check-bypass gadgets
//! (Spectre variant 1, see <https://spectreattack.com/>).
//!
//! A gadget of the form `if (x < size) { y = array[x]; }` lets an attacker
//! read out of bounds during speculative execution if `x` is attacker controlled.
//!
//! ## How the check works
//!
//! Whenever the configured function is entered, the memory referenced by each configured argument
//! is tainted with the sentinel tag (`sentinel_tag` in *config.json*, default `1`).
//! Before every move-class memory read of the main executable with both a base and an index register
//! the sub-slots of the full-width index register are compared to the sentinel tag.
//! The first matching sub-slot generates a warning.
//!
//! ## False Positives
//!
//! - The read may be guarded by a serializing instruction or other speculation barrier.
//!
//! ## False Negatives
//!
//! - Taint only reaches the index register if the tag storage backend propagates it.
//! - Tainted base registers are not reported.
//! - Tags other than the sentinel tag are ignored, even if they stem from the source.

use crate::analysis::operand_resolver::OperandForm;
use crate::analysis::policy::PolicyKind;
use crate::analysis::source_binder::BindingMode;
use crate::prelude::*;
use crate::{CheckModule, Variant};

/// The module name, version and variant
pub static CHECK_MODULE: CheckModule = CheckModule {
    name: "IndexSentinel",
    version: "0.1",
    variant: Variant {
        binding: BindingMode::Reference,
        operand_form: OperandForm::NormalizedLoad,
        policy: PolicyKind::SentinelMatch,
    },
};

/// The sentinel tag used if the configuration does not name one.
pub const DEFAULT_SENTINEL_TAG: Tag = Tag::new(1);
