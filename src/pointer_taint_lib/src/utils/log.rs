//! Log messages and taint warnings, and the collector thread gathering them from the hooks.

use crate::prelude::*;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::thread::JoinHandle;

/// A report about a memory read whose address registers carry taint.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Default)]
pub struct TaintWarning {
    /// The name of the check module that generated the warning, e.g. `AddressTaint`.
    pub name: String,
    /// The version of the check module.
    pub version: String,
    /// The address of the reporting instruction comes first, formatted as hex string.
    pub addresses: Vec<String>,
    /// The thread that was about to execute the memory read.
    pub thread: Option<ThreadId>,
    /// The tainted address registers.
    pub registers: Vec<String>,
    /// Check-specific details, for the sink checker one `[role, register, tags]` entry per register.
    pub other: Vec<Vec<String>>,
    /// Human readable summary including the disassembly of the instruction.
    pub description: String,
}

impl TaintWarning {
    /// A warning of the given check without addresses or register details.
    pub fn new(
        name: impl ToString,
        version: impl ToString,
        description: impl ToString,
    ) -> TaintWarning {
        TaintWarning {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            ..TaintWarning::default()
        }
    }

    pub fn addresses(self, addresses: Vec<String>) -> TaintWarning {
        TaintWarning { addresses, ..self }
    }

    pub fn thread(self, thread: ThreadId) -> TaintWarning {
        TaintWarning {
            thread: Some(thread),
            ..self
        }
    }

    pub fn registers(self, registers: Vec<String>) -> TaintWarning {
        TaintWarning { registers, ..self }
    }

    pub fn other(self, other: Vec<Vec<String>>) -> TaintWarning {
        TaintWarning { other, ..self }
    }
}

impl std::fmt::Display for TaintWarning {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "[{}] ({}) {}",
            self.name, self.version, self.description
        )
    }
}

/// How important a [`LogMessage`] is.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostics, e.g. skipped instructions or register dumps.
    Debug,
    /// Problems with the configuration that leave parts of the program uninstrumented.
    Error,
    /// Progress messages for the user.
    Info,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(formatter, "DEBUG"),
            LogLevel::Error => write!(formatter, "ERROR"),
            LogLevel::Info => write!(formatter, "INFO"),
        }
    }
}

/// A diagnostic message of the instrumentation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LogMessage {
    pub text: String,
    pub level: LogLevel,
    /// The program address the message refers to.
    pub location: Option<u64>,
    /// The component that generated the message, e.g. `SourceBinder`.
    pub source: Option<String>,
}

impl LogMessage {
    fn with_level(level: LogLevel, text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level,
            location: None,
            source: None,
        }
    }

    pub fn new_info(text: impl Into<String>) -> LogMessage {
        LogMessage::with_level(LogLevel::Info, text)
    }

    pub fn new_debug(text: impl Into<String>) -> LogMessage {
        LogMessage::with_level(LogLevel::Debug, text)
    }

    pub fn new_error(text: impl Into<String>) -> LogMessage {
        LogMessage::with_level(LogLevel::Error, text)
    }

    /// Attach the program address the message refers to.
    pub fn location(self, location: u64) -> LogMessage {
        LogMessage {
            location: Some(location),
            ..self
        }
    }

    /// Attach the name of the generating component.
    pub fn source(self, source: impl Into<String>) -> LogMessage {
        LogMessage {
            source: Some(source.into()),
            ..self
        }
    }
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}: ", self.level)?;
        if let Some(source) = &self.source {
            write!(formatter, "{}", source)?;
            if let Some(location) = self.location {
                write!(formatter, " @ {:#x}", location)?;
            }
            write!(formatter, ": ")?;
        } else if let Some(location) = self.location {
            write!(formatter, "{:#x}: ", location)?;
        }
        write!(formatter, "{}", self.text)
    }
}

/// Print the log messages to stdout and the warnings to stdout or, if `out_path` is given, to that file.
/// With `emit_json` the warnings are printed as a JSON array, otherwise one warning per line.
pub fn print_all_messages(
    logs: Vec<LogMessage>,
    warnings: Vec<TaintWarning>,
    out_path: Option<&str>,
    emit_json: bool,
) -> Result<(), Error> {
    logs.iter().for_each(|log| println!("{}", log));
    let output = if emit_json {
        serde_json::to_string_pretty(&warnings)?
    } else {
        warnings
            .iter()
            .map(|warning| format!("{}\n", warning))
            .collect::<String>()
    };
    match out_path {
        Some(file_path) => std::fs::write(file_path, output)
            .with_context(|| format!("Could not write warnings to {}", file_path)),
        None => {
            print!("{}", output);
            Ok(())
        }
    }
}

/// Append one info message per component stating how many debug messages it generated,
/// plus one for the debug messages without component.
pub fn add_debug_log_statistics(all_logs: &mut Vec<LogMessage>) {
    let mut counts: BTreeMap<Option<String>, u64> = BTreeMap::new();
    for log in all_logs.iter().filter(|log| log.level == LogLevel::Debug) {
        *counts.entry(log.source.clone()).or_default() += 1;
    }
    // Without component (`None`) sorts first, but is reported last.
    let general = counts.remove(&None);
    for (source, count) in counts {
        let mut message = LogMessage::new_info(format!("Logged {} debug log messages.", count));
        message.source = source;
        all_logs.push(message);
    }
    if let Some(count) = general {
        all_logs.push(LogMessage::new_info(format!(
            "Logged {} general debug log messages.",
            count
        )));
    }
}

/// A message sent from a hook to the [`LogThread`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogThreadMsg {
    Log(LogMessage),
    Warning(TaintWarning),
    /// Stop collecting and hand out everything received so far.
    Terminate,
}

impl From<LogMessage> for LogThreadMsg {
    fn from(msg: LogMessage) -> Self {
        Self::Log(msg)
    }
}

impl From<TaintWarning> for LogThreadMsg {
    fn from(warning: TaintWarning) -> Self {
        Self::Warning(warning)
    }
}

type Collected = (Vec<LogMessage>, Vec<TaintWarning>);

/// A thread collecting the messages that hooks send over a channel.
///
/// Hooks run on the threads of the monitored program and must never block on reporting.
/// They only push into an unbounded channel and ignore send errors,
/// the collecting happens here.
///
/// The collector strategy is chosen on [`spawn`](LogThread::spawn),
/// [`collect`](LogThread::collect) stops the thread and returns what it gathered.
/// Dropping a `LogThread` without collecting discards all messages.
pub struct LogThread {
    msg_sender: crossbeam_channel::Sender<LogThreadMsg>,
    thread_handle: Option<JoinHandle<Collected>>,
}

impl Drop for LogThread {
    fn drop(&mut self) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LogThread {
    /// Start a collector thread running `collector_func` on the receiving end of a fresh channel.
    /// The function has to return once it receives [`LogThreadMsg::Terminate`].
    pub fn spawn<F>(collector_func: F) -> LogThread
    where
        F: FnOnce(crossbeam_channel::Receiver<LogThreadMsg>) -> Collected + Send + 'static,
    {
        let (msg_sender, receiver) = crossbeam_channel::unbounded();
        LogThread {
            msg_sender,
            thread_handle: Some(std::thread::spawn(move || collector_func(receiver))),
        }
    }

    /// A sender whose messages go nowhere.
    pub fn create_disconnected_sender() -> crossbeam_channel::Sender<LogThreadMsg> {
        crossbeam_channel::unbounded().0
    }

    pub fn get_msg_sender(&self) -> crossbeam_channel::Sender<LogThreadMsg> {
        self.msg_sender.clone()
    }

    /// Stop the collector thread and return the messages it gathered.
    pub fn collect(mut self) -> Result<Collected, Error> {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        let Some(handle) = self.thread_handle.take() else {
            return Ok(Collected::default());
        };
        handle
            .join()
            .map_err(|_| anyhow!("The log collector thread panicked."))
    }

    /// Keep every message in arrival order.
    /// Each execution of a triggering sink yields its own warning.
    pub fn collect_all(receiver: crossbeam_channel::Receiver<LogThreadMsg>) -> Collected {
        let mut collected = Collected::default();
        for msg in receiver.iter() {
            match msg {
                LogThreadMsg::Log(log) => collected.0.push(log),
                LogThreadMsg::Warning(warning) => collected.1.push(warning),
                LogThreadMsg::Terminate => break,
            }
        }
        collected
    }

    /// Keep only the last warning per program address, ordered by address.
    ///
    /// Warnings are keyed by their first address.
    /// Warnings without a parseable address are all kept and come after the keyed ones.
    /// Log messages keep their arrival order, only exact repeats are dropped.
    pub fn collect_and_deduplicate(
        receiver: crossbeam_channel::Receiver<LogThreadMsg>,
    ) -> Collected {
        let mut warnings_by_address = BTreeMap::new();
        let (mut logs, mut unlocated_warnings) = Collected::default();
        for msg in receiver.iter() {
            match msg {
                LogThreadMsg::Log(log) => logs.push(log),
                LogThreadMsg::Warning(warning) => {
                    match warning.addresses.first().and_then(|address| parse_address(address)) {
                        Some(address) => {
                            warnings_by_address.insert(address, warning);
                        }
                        None => unlocated_warnings.push(warning),
                    }
                }
                LogThreadMsg::Terminate => break,
            }
        }
        (
            logs.into_iter().unique().collect(),
            warnings_by_address
                .into_values()
                .chain(unlocated_warnings)
                .collect(),
        )
    }
}

/// Parse a hexadecimal address as printed in warnings.
fn parse_address(address: &str) -> Option<u64> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    u64::from_str_radix(digits, 16).ok()
}
