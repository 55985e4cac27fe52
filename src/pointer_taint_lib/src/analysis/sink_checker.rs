//! Checking the address registers of memory reads for taint.

use super::operand_resolver::{MemoryReadOperand, OperandResolver};
use super::policy::DetectionPolicy;
use crate::instrumentation::*;
use crate::taint::TagModel;
use crate::utils::log::{LogMessage, LogThreadMsg, TaintWarning};
use crate::CheckModule;

/// The instruction listener inserting a taint check before every qualifying memory read.
pub struct SinkChecker {
    module: &'static CheckModule,
    resolver: OperandResolver,
    policy: DetectionPolicy,
    model: TagModel,
    log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    verbose: bool,
}

impl SinkChecker {
    /// The name used as source of log messages.
    pub const NAME: &'static str = "SinkChecker";

    /// Create a new sink checker generating warnings in the name of the given check module.
    ///
    /// If `verbose` is set, every executed check logs a dump of the register tags.
    pub fn new(
        module: &'static CheckModule,
        policy: DetectionPolicy,
        model: TagModel,
        log_sender: crossbeam_channel::Sender<LogThreadMsg>,
        verbose: bool,
    ) -> SinkChecker {
        SinkChecker {
            module,
            resolver: OperandResolver::new(module.variant.operand_form),
            policy,
            model,
            log_sender,
            verbose,
        }
    }

    fn create_hook(&self, instruction: &Instruction, operand: MemoryReadOperand) -> InstructionHook {
        let module = self.module;
        let policy = self.policy;
        let model = self.model.clone();
        let log_sender = self.log_sender.clone();
        let verbose = self.verbose;
        let disassembly = instruction.to_string();
        Box::new(move |execution: &InstructionExecution| {
            if verbose {
                let message = LogMessage::new_debug(format!(
                    "Thread {} checks {}\n{}",
                    execution.thread,
                    disassembly,
                    model.dump_registers(execution.thread)
                ));
                let _ = log_sender.send(
                    message
                        .location(execution.address)
                        .source(Self::NAME)
                        .into(),
                );
            }
            if let Some(detection) = policy.evaluate(&model, execution.thread, &operand) {
                let description = format!(
                    "(Tainted Address) {} reads memory through tainted {}",
                    disassembly, detection
                );
                let warning = TaintWarning::new(module.name, module.version, description)
                    .addresses(vec![format!("{:#x}", execution.address)])
                    .thread(execution.thread)
                    .registers(detection.registers())
                    .other(detection.details());
                let _ = log_sender.send(warning.into());
            }
        })
    }
}

impl InstructionListener for SinkChecker {
    fn on_instruction_decoded(&self, instruction: &Instruction, registry: &mut dyn HookRegistry) {
        match self.resolver.resolve(instruction, registry) {
            Ok(operand) => {
                let hook = self.create_hook(instruction, operand);
                registry.insert_predicated_call(instruction, hook);
            }
            Err(skip) if skip.is_notable() => {
                let message = LogMessage::new_debug(format!("Not instrumented: {}", skip))
                    .location(instruction.address)
                    .source(Self::NAME);
                let _ = self.log_sender.send(message.into());
            }
            Err(_) => (),
        }
    }
}
