/*!
The main library of pointer_taint containing the taint model, the instrumentation policies
and the check modules built on top of them.

# What is pointer_taint

pointer_taint is a dynamic information-flow tracking tool.
It marks the arguments of a chosen function as tainted whenever the function is entered
and checks every memory read of the monitored executable
on whether the registers used to compute the effective address carry taint.
Tainted base or index registers in a memory read are characteristic for pointer-taint bugs
and for speculative-execution (Spectre-style) bounds-check-bypass gadgets.

The tool itself does not decode instructions or propagate taint through arithmetic.
It relies on two collaborators:
- an instrumentation engine that announces loaded images and decoded instructions
  and executes the hooks inserted by this library,
  see [`InstrumentationEngine`](crate::instrumentation::InstrumentationEngine),
- a tag storage backend that stores one tag per memory byte and per register sub-slot,
  see [`TagStorage`](crate::taint::TagStorage).

The library ships an in-process [`ShadowStorage`](crate::taint::shadow::ShadowStorage) backend
and a deterministic [`ReplayEngine`](crate::replay::ReplayEngine)
that replays recorded execution traces.

# Usage

```sh
pointer_taint TRACE --func parse_input --arg-index 0 --arg-size 8
```
The detection policy is selected with the `--policy` command line option.
Use the `--module-versions` option to get a list of all known check modules.
One can also provide a custom configuration file through the `--config` command line option.
Start by taking a look at the standard configuration file located at `src/config.json`
and read the [check-specific documentation](crate::checkers) for more details.
*/

pub mod analysis;
pub mod checkers;
pub mod instrumentation;
pub mod pipeline;
pub mod replay;
pub mod taint;
pub mod utils;

mod prelude {
    pub use serde::{Deserialize, Serialize};

    pub use crate::instrumentation::{Register, RegisterFamily, ThreadId};
    pub use crate::taint::Tag;
    pub use anyhow::{anyhow, Context as _, Error};
}
use prelude::*;

use analysis::operand_resolver::OperandForm;
use analysis::policy::PolicyKind;
use analysis::source_binder::BindingMode;

/// The combination of source binding, operand selection and detection policy
/// that makes up one detection strategy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Variant {
    /// How the configured arguments are tagged at function entry.
    pub binding: BindingMode,
    /// Which memory reads get instrumented.
    pub operand_form: OperandForm,
    /// How register tags at the sink are judged.
    pub policy: PolicyKind,
}

/// A structure containing general information about a check module,
/// including the variant it runs with.
pub struct CheckModule {
    /// The name of the check.
    pub name: &'static str,
    /// The version number of the check.
    /// Should be incremented whenever significant changes are made to the check.
    pub version: &'static str,
    /// The detection strategy of the check.
    pub variant: Variant,
}

impl std::fmt::Display for CheckModule {
    /// Print the module name and its version number.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, r#""{}": "{}""#, self.name, self.version)
    }
}

/// Get a list of all known check modules.
pub fn get_modules() -> Vec<&'static CheckModule> {
    vec![
        &crate::checkers::address_taint::CHECK_MODULE,
        &crate::checkers::index_sentinel::CHECK_MODULE,
    ]
}

/// Find the check module with the given name.
pub fn get_module(name: &str) -> Result<&'static CheckModule, Error> {
    get_modules()
        .into_iter()
        .find(|module| module.name == name)
        .ok_or_else(|| anyhow!("{} is not a valid module name.", name))
}
