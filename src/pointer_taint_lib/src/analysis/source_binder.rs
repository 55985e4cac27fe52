//! Tagging of the arguments of the taint source function.
//!
//! For every loaded main executable the binder looks up the configured function
//! and inserts one hook per configured argument before the entry of the function.
//! Each time the function is entered the hooks overwrite the tags of the argument storage
//! with a newly selected tag.

use crate::instrumentation::*;
use crate::prelude::*;
use crate::taint::{TagModel, TaggedLocation};
use crate::utils::log::{LogMessage, LogThreadMsg};

/// How the configured arguments are tagged at function entry.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BindingMode {
    /// Tag all sub-slots of the System V integer argument register of the argument.
    Register,
    /// Tag `size` bytes of memory starting at the entry reference of the argument.
    Reference,
}

/// How the tag for a tainting is chosen.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TagSelection {
    /// Allocate a fresh tag for every argument on every call.
    Allocate,
    /// Always use the given tag.
    Fixed(Tag),
}

impl TagSelection {
    /// Get the tag to use for the next tainting.
    pub fn select(&self, model: &TagModel) -> Tag {
        match self {
            TagSelection::Allocate => model.allocate_tag(),
            TagSelection::Fixed(tag) => *tag,
        }
    }
}

/// An argument of the taint source function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ArgumentSpec {
    /// The zero-based position of the argument.
    pub position: u32,
    /// The number of bytes to taint when binding by reference.
    pub size: u64,
}

/// The function whose arguments get tainted.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct TaintSource {
    /// The symbol name of the function.
    pub function: String,
    /// The arguments to taint. Never empty.
    pub arguments: Vec<ArgumentSpec>,
}

/// The image listener inserting the taint source hooks.
pub struct SourceBinder {
    source: TaintSource,
    mode: BindingMode,
    selection: TagSelection,
    model: TagModel,
    log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    verbose: bool,
}

impl SourceBinder {
    /// The name used as source of log messages.
    pub const NAME: &'static str = "SourceBinder";

    /// Create a new source binder.
    ///
    /// If `verbose` is set, every tainting gets logged together with a dump of the register tags.
    pub fn new(
        source: TaintSource,
        mode: BindingMode,
        selection: TagSelection,
        model: TagModel,
        log_sender: crossbeam_channel::Sender<LogThreadMsg>,
        verbose: bool,
    ) -> SourceBinder {
        SourceBinder {
            source,
            mode,
            selection,
            model,
            log_sender,
            verbose,
        }
    }

    fn log(&self, message: LogMessage) {
        let _ = self.log_sender.send(message.source(Self::NAME).into());
    }

    /// Create the entry hook for one argument.
    /// Returns `None` if the argument cannot be bound.
    fn create_hook(&self, argument: ArgumentSpec, routine: &Routine) -> Option<RoutineHook> {
        let model = self.model.clone();
        let selection = self.selection;
        let log_sender = self.log_sender.clone();
        let verbose = self.verbose;
        match self.mode {
            BindingMode::Register => {
                let Some(family) = integer_argument_register(argument.position) else {
                    self.log(
                        LogMessage::new_error(format!(
                            "Argument {} of {} is not passed in a register. Unsupported.",
                            argument.position, routine.name
                        ))
                        .location(routine.address),
                    );
                    return None;
                };
                let register = Register::full(family);
                Some(Box::new(move |entry: &RoutineEntry| {
                    let tag = selection.select(&model);
                    model.write(
                        &TaggedLocation::Register {
                            thread: entry.thread,
                            register,
                        },
                        tag,
                    );
                    if verbose {
                        let message = LogMessage::new_debug(format!(
                            "Thread {} tainted {} with tag {}\n{}",
                            entry.thread,
                            register,
                            tag,
                            model.dump_registers(entry.thread)
                        ));
                        let _ = log_sender.send(
                            message
                                .location(entry.routine_address)
                                .source(Self::NAME)
                                .into(),
                        );
                    }
                }))
            }
            BindingMode::Reference => Some(Box::new(move |entry: &RoutineEntry| {
                let message = match entry.argument_reference(argument.position) {
                    Some(reference) => {
                        let tag = selection.select(&model);
                        model.write_memory_range(reference, argument.size, tag);
                        if !verbose {
                            return;
                        }
                        LogMessage::new_debug(format!(
                            "Thread {} tainted {} bytes at {:#x} with tag {}",
                            entry.thread, argument.size, reference, tag
                        ))
                    }
                    None => LogMessage::new_error(format!(
                        "No entry reference for argument {}. Not tainted.",
                        argument.position
                    )),
                };
                let _ = log_sender.send(
                    message
                        .location(entry.routine_address)
                        .source(Self::NAME)
                        .into(),
                );
            })),
        }
    }
}

impl ImageListener for SourceBinder {
    fn on_image_load(&self, image: &Image, registry: &mut dyn HookRegistry) {
        if !image.is_main_executable {
            self.log(LogMessage::new_debug(format!(
                "Image {} is not the main executable",
                image.name
            )));
            return;
        }
        let Some(routine) = image.find_routine(&self.source.function) else {
            self.log(LogMessage::new_error(format!(
                "Function {} not found in {}",
                self.source.function, image.name
            )));
            return;
        };
        let mut inserted = 0;
        for argument in self.source.arguments.iter() {
            if let Some(hook) = self.create_hook(*argument, routine) {
                registry.insert_routine_entry_call(routine, hook);
                inserted += 1;
            }
        }
        self.log(
            LogMessage::new_info(format!(
                "Inserted {} source hooks into {}",
                inserted, routine.name
            ))
            .location(routine.address),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::mock_registry::MockRegistry;
    use crate::taint::shadow::ShadowStorage;
    use crate::utils::log::{LogLevel, LogThread};
    use std::sync::Arc;

    impl TaintSource {
        pub fn mock(function: &str, arguments: &[(u32, u64)]) -> TaintSource {
            TaintSource {
                function: function.to_string(),
                arguments: arguments
                    .iter()
                    .map(|(position, size)| ArgumentSpec {
                        position: *position,
                        size: *size,
                    })
                    .collect(),
            }
        }
    }

    fn binder(
        source: TaintSource,
        mode: BindingMode,
        selection: TagSelection,
    ) -> (SourceBinder, TagModel, LogThread) {
        let model = TagModel::new(Arc::new(ShadowStorage::new()));
        let log_thread = LogThread::spawn(LogThread::collect_all);
        let binder = SourceBinder::new(
            source,
            mode,
            selection,
            model.clone(),
            log_thread.get_msg_sender(),
            false,
        );
        (binder, model, log_thread)
    }

    fn register_tags(model: &TagModel, thread: ThreadId, name: &str) -> Vec<Tag> {
        model.register_tags(thread, name.parse().unwrap())
    }

    #[test]
    fn register_binding() {
        let (binder, model, _log_thread) = binder(
            TaintSource::mock("main", &[(0, 4)]),
            BindingMode::Register,
            TagSelection::Allocate,
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);
        assert_eq!(registry.routine_hooks.len(), 1);

        let thread = ThreadId::new(1);
        registry.enter_routine(thread, 0x401000, vec![]);
        let tags = register_tags(&model, thread, "rdi");
        assert_eq!(tags.len(), 8);
        assert!(tags[0].is_tainted());
        assert!(tags.iter().all(|tag| *tag == tags[0]));
        assert!(register_tags(&model, thread, "rsi")
            .iter()
            .all(|tag| !tag.is_tainted()));
    }

    #[test]
    fn reentry_overwrites_tag() {
        let (binder, model, _log_thread) = binder(
            TaintSource::mock("main", &[(1, 4)]),
            BindingMode::Register,
            TagSelection::Allocate,
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);

        let thread = ThreadId::new(1);
        registry.enter_routine(thread, 0x401000, vec![]);
        let first = register_tags(&model, thread, "rsi");
        registry.enter_routine(thread, 0x401000, vec![]);
        let second = register_tags(&model, thread, "rsi");
        assert_ne!(first[0], second[0]);
        assert!(second.iter().all(|tag| *tag == second[0]));
    }

    #[test]
    fn distinct_tag_per_position() {
        let (binder, model, _log_thread) = binder(
            TaintSource::mock("main", &[(0, 8), (1, 8)]),
            BindingMode::Register,
            TagSelection::Allocate,
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);

        let thread = ThreadId::new(1);
        registry.enter_routine(thread, 0x401000, vec![]);
        let rdi = register_tags(&model, thread, "rdi");
        let rsi = register_tags(&model, thread, "rsi");
        assert!(rdi[0].is_tainted() && rsi[0].is_tainted());
        assert_ne!(rdi[0], rsi[0]);
    }

    #[test]
    fn stack_argument_is_not_hooked() {
        let (binder, _model, log_thread) = binder(
            TaintSource::mock("main", &[(6, 8), (5, 8)]),
            BindingMode::Register,
            TagSelection::Allocate,
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);
        assert_eq!(registry.routine_hooks.len(), 1);
        drop(binder);

        let (logs, _) = log_thread.collect().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(
            logs[0].text,
            "Argument 6 of main is not passed in a register. Unsupported."
        );
        assert_eq!(logs[1].text, "Inserted 1 source hooks into main");
    }

    #[test]
    fn unsupported_argument_survives_deduplication() {
        let log_thread = LogThread::spawn(LogThread::collect_and_deduplicate);
        let binder = SourceBinder::new(
            TaintSource::mock("main", &[(6, 8), (0, 8)]),
            BindingMode::Register,
            TagSelection::Allocate,
            TagModel::new(Arc::new(ShadowStorage::new())),
            log_thread.get_msg_sender(),
            false,
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);
        drop(binder);

        let (logs, _) = log_thread.collect().unwrap();
        let texts: Vec<String> = logs.iter().map(|log| format!("{}", log)).collect();
        assert_eq!(
            texts,
            vec![
                "ERROR: SourceBinder @ 0x401000: Argument 6 of main is not passed in a register. Unsupported.".to_string(),
                "INFO: SourceBinder @ 0x401000: Inserted 1 source hooks into main".to_string(),
            ]
        );
    }

    #[test]
    fn reference_binding() {
        let (binder, model, _log_thread) = binder(
            TaintSource::mock("main", &[(1, 8)]),
            BindingMode::Reference,
            TagSelection::Fixed(Tag::new(1)),
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);

        registry.enter_routine(ThreadId::new(1), 0x401000, vec![0x7ffd0000, 0x601000]);
        assert_eq!(model.memory_tags(0x601000, 8), vec![Tag::new(1); 8]);
        assert_eq!(model.memory_tags(0x601008, 1), vec![Tag::UNTAINTED]);
        assert_eq!(model.memory_tags(0x600fff, 1), vec![Tag::UNTAINTED]);
        assert_eq!(model.memory_tags(0x7ffd0000, 1), vec![Tag::UNTAINTED]);
    }

    #[test]
    fn missing_reference() {
        let (binder, model, log_thread) = binder(
            TaintSource::mock("main", &[(2, 8)]),
            BindingMode::Reference,
            TagSelection::Fixed(Tag::new(1)),
        );
        let mut registry = MockRegistry::mock();
        let image = registry.images[0].clone();
        binder.on_image_load(&image, &mut registry);
        registry.enter_routine(ThreadId::new(1), 0x401000, vec![0x601000]);
        assert_eq!(model.memory_tags(0x601000, 1), vec![Tag::UNTAINTED]);
        drop(binder);
        drop(registry);

        let (logs, _) = log_thread.collect().unwrap();
        assert_eq!(logs[1].level, LogLevel::Error);
        assert_eq!(logs[1].location, Some(0x401000));
    }

    #[test]
    fn only_main_executable() {
        let (binder, _model, log_thread) = binder(
            TaintSource::mock("main", &[(0, 8)]),
            BindingMode::Register,
            TagSelection::Allocate,
        );
        let mut registry = MockRegistry::mock();
        let mut library = registry.images[1].clone();
        library.routines = registry.images[0].routines.clone();
        binder.on_image_load(&library, &mut registry);
        assert!(registry.routine_hooks.is_empty());

        let mut stripped = registry.images[0].clone();
        stripped.routines.clear();
        binder.on_image_load(&stripped, &mut registry);
        assert!(registry.routine_hooks.is_empty());
        drop(binder);

        let (logs, _) = log_thread.collect().unwrap();
        assert_eq!(logs[0].level, LogLevel::Debug);
        assert_eq!(logs[1].level, LogLevel::Error);
        assert_eq!(logs[1].text, "Function main not found in prog");
    }
}
