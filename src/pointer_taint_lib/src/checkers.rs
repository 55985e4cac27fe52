//! The implemented check modules.
//! See their module descriptions for detailed information about each check.
//!
//! Both checks share the same [source binder](crate::analysis::source_binder)
//! and [sink checker](crate::analysis::sink_checker).
//! They differ in the [`Variant`](crate::Variant) they run with.

pub mod address_taint;
pub mod index_sentinel;
