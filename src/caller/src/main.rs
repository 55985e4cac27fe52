//! This crate defines the command line interface for pointer_taint.
//! General documentation about pointer_taint is contained in the [`pointer_taint_lib`] crate.

extern crate pointer_taint_lib; // Needed for the docstring-link to work

use anyhow::{anyhow, Context, Error};
use pointer_taint_lib::analysis::policy::PolicyKind;
use pointer_taint_lib::pipeline::{self, Config};
use pointer_taint_lib::replay::{ReplayEngine, Trace};
use pointer_taint_lib::taint::shadow::ShadowStorage;
use pointer_taint_lib::taint::Tag;
use pointer_taint_lib::utils::log::{
    add_debug_log_statistics, print_all_messages, LogMessage, LogThread,
};
use pointer_taint_lib::utils::read_config_file;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
/// Find memory reads addressed through tainted registers in recorded program executions
struct CmdlineArgs {
    /// The path to the execution trace.
    #[structopt(required_unless("module-versions"), validator(check_file_existence))]
    trace: Option<String>,

    /// Path to a custom configuration file to use instead of the standard one.
    #[structopt(long, short, validator(check_file_existence))]
    config: Option<String>,

    /// The check module to run, e.g. 'AddressTaint' or 'IndexSentinel'.
    ///
    /// Use the "--module-versions" command line option to get a list of all valid check names.
    #[structopt(long, short, default_value = "AddressTaint")]
    policy: String,

    /// The function whose arguments get tainted. Overrides the configuration file.
    #[structopt(long)]
    func: Option<String>,

    /// The zero-based position of an argument to taint. Can be given multiple times.
    /// Overrides the configuration file.
    #[structopt(long)]
    arg_index: Vec<u32>,

    /// The number of bytes to taint for the argument at the same position in the list of '--arg-index' values.
    /// Can be given multiple times. Overrides the configuration file.
    #[structopt(long)]
    arg_size: Vec<u64>,

    /// The sentinel tag looked for by the 'IndexSentinel' check. Overrides the configuration file.
    #[structopt(long)]
    sentinel_tag: Option<u32>,

    /// Path to the main executable of the trace.
    /// Its function symbols are added to the routines known for the main executable.
    #[structopt(long, short, validator(check_file_existence))]
    binary: Option<String>,

    /// Write the results to a file instead of stdout.
    /// This only affects taint warnings. Log messages are still printed to stdout.
    #[structopt(long, short)]
    out: Option<String>,

    /// Generate JSON output.
    #[structopt(long, short)]
    json: bool,

    /// Do not print log messages. This prevents polluting stdout for json output.
    #[structopt(long, short)]
    quiet: bool,

    /// Log every tainting and every executed check together with a dump of the register tags.
    #[structopt(long, short)]
    verbose: bool,

    /// Report at most one warning per instruction address.
    #[structopt(long)]
    deduplicate: bool,

    /// Prints out the version numbers of all known modules.
    #[structopt(long)]
    module_versions: bool,
}

fn main() -> Result<(), Error> {
    let cmdline_args = CmdlineArgs::from_args();

    run_with_replay(cmdline_args)
}

/// Check the existence of a file
fn check_file_existence(file_path: String) -> Result<(), String> {
    if std::fs::metadata(&file_path)
        .map_err(|err| format!("{}", err))?
        .is_file()
    {
        Ok(())
    } else {
        Err(format!("{} is not a file.", file_path))
    }
}

/// Apply the command line overrides to the configuration of the selected module.
fn get_config(args: &CmdlineArgs, module: &pointer_taint_lib::CheckModule) -> Result<Config, Error> {
    let config_json = read_config_file(args.config.as_deref())?;
    let mut config = Config::from_json(&config_json, module)?;
    if let Some(function) = &args.func {
        config.function = function.clone();
    }
    if !args.arg_index.is_empty() {
        config.arg_index = args.arg_index.clone();
    }
    if !args.arg_size.is_empty() {
        config.arg_size = args.arg_size.clone();
    }
    if let Some(tag) = args.sentinel_tag {
        config.sentinel_tag = Some(Tag::new(tag));
    }
    Ok(config)
}

/// Replay the given trace with the selected check module.
fn run_with_replay(args: CmdlineArgs) -> Result<(), Error> {
    if args.module_versions {
        // Only print the module versions and then quit.
        println!("[pointer_taint] module_versions:");
        for module in pointer_taint_lib::get_modules() {
            println!("{}", module);
        }
        return Ok(());
    }
    let module = pointer_taint_lib::get_module(&args.policy)?;
    let config = get_config(&args, module)?;

    let trace_path = PathBuf::from(
        args.trace
            .as_deref()
            .ok_or_else(|| anyhow!("No trace file given."))?,
    );
    let mut trace = Trace::from_file(&trace_path)?;
    if let Some(binary_path) = &args.binary {
        let binary = std::fs::read(binary_path)
            .with_context(|| format!("Could not read from binary file path {}", binary_path))?;
        trace
            .main_executable_mut()
            .context("The trace contains no main executable.")?
            .add_elf_symbols(&binary)
            .context("Could not read function symbols from the binary.")?;
    }

    let storage = match module.variant.policy {
        PolicyKind::SentinelMatch => ShadowStorage::new().with_reserved_tag(config.sentinel()?),
        PolicyKind::TagSum => ShadowStorage::new(),
    };
    let storage = Arc::new(storage);
    let mut engine = ReplayEngine::new(trace, storage.clone());
    let log_thread = if args.deduplicate {
        LogThread::spawn(LogThread::collect_and_deduplicate)
    } else {
        LogThread::spawn(LogThread::collect_all)
    };
    pipeline::run(
        &mut engine,
        storage,
        module,
        &config,
        args.verbose,
        log_thread.get_msg_sender(),
    )?;
    let (mut all_logs, all_warnings) = log_thread.collect()?;

    if args.verbose {
        let statistics = engine.statistics();
        all_logs.push(LogMessage::new_info(format!(
            "Replayed {} events. Ran {} source hooks and {} checks, skipped {} checks with false predicate.",
            statistics.events,
            statistics.routine_hooks_run,
            statistics.instruction_hooks_run,
            statistics.predicated_hooks_skipped
        )));
        add_debug_log_statistics(&mut all_logs);
    }
    if args.quiet {
        all_logs = Vec::new(); // Suppress all log messages since the `--quiet` flag is set.
    }
    print_all_messages(all_logs, all_warnings, args.out.as_deref(), args.json)
}
