//! This module contains functions and structs helpful for building a complete analysis pipeline
//! from a check module, its configuration and an instrumentation engine.

mod config;
pub use config::Config;

use crate::analysis::policy::{DetectionPolicy, PolicyKind};
use crate::analysis::sink_checker::SinkChecker;
use crate::analysis::source_binder::{SourceBinder, TagSelection};
use crate::instrumentation::InstrumentationEngine;
use crate::prelude::*;
use crate::taint::{TagModel, TagStorage};
use crate::utils::log::LogThreadMsg;
use crate::CheckModule;
use std::sync::Arc;

/// Instrument the monitored program with the given check module and run it to completion.
///
/// The configuration is validated and the tag storage is initialized before any instrumentation happens.
/// If initialization fails, the storage is torn down and the error is returned.
/// Warnings and log messages are sent to `log_sender`.
pub fn run(
    engine: &mut dyn InstrumentationEngine,
    storage: Arc<dyn TagStorage>,
    module: &'static CheckModule,
    config: &Config,
    verbose: bool,
    log_sender: crossbeam_channel::Sender<LogThreadMsg>,
) -> Result<(), Error> {
    let source = config.taint_source()?;
    let sentinel = match module.variant.policy {
        PolicyKind::SentinelMatch => config.sentinel()?,
        PolicyKind::TagSum => Tag::UNTAINTED,
    };
    if let Err(err) = storage.init() {
        storage.teardown();
        return Err(err.context("Initialization of the tag storage failed"));
    }
    let model = TagModel::new(storage.clone());
    let selection = match module.variant.policy {
        PolicyKind::TagSum => TagSelection::Allocate,
        PolicyKind::SentinelMatch => TagSelection::Fixed(sentinel),
    };
    engine.add_image_instrumentation(Arc::new(SourceBinder::new(
        source,
        module.variant.binding,
        selection,
        model.clone(),
        log_sender.clone(),
        verbose,
    )));
    engine.add_instruction_instrumentation(Arc::new(SinkChecker::new(
        module,
        DetectionPolicy::new(module.variant.policy, sentinel),
        model,
        log_sender,
        verbose,
    )));
    let result = engine.start_program();
    storage.teardown();
    result
}
