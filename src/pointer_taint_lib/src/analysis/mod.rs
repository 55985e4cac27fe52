//! The instrumentation policies of the tool.
//!
//! - The [`source_binder`] tags the arguments of the configured function whenever it is entered.
//! - The [`operand_resolver`] decides which instructions are memory reads
//! through a base and an index register.
//! - The [`sink_checker`] instruments these memory reads with a check
//! that applies the [`policy`] of the check module to the tags of the address registers.

pub mod operand_resolver;
pub mod policy;
pub mod sink_checker;
pub mod source_binder;

#[cfg(test)]
pub mod mock_registry;
