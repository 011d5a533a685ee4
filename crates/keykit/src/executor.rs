//! Command execution with a complete diagnostic trace.

use crate::backend::CommandRunner;
use crate::error::{Error, Result};
use crate::template::{split_command, unresolved};
use crate::types::CommandRecord;

/// Append-only debugging log for one reconciliation.
///
/// Also remembers the last record a command produced, so a run that
/// aborts later can still report it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    entries: Vec<String>,
    last_record: Option<CommandRecord>,
}

impl Trace {
    /// An empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Entries in the order they were pushed.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record of the most recent command that ran, if any.
    pub fn last_record(&self) -> Option<&CommandRecord> {
        self.last_record.as_ref()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was traced yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the entries, dropping the remembered record.
    pub fn into_inner(self) -> Vec<String> {
        self.entries
    }
}

/// Runs rendered commands and records each one in the trace.
pub struct CommandExecutor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CommandExecutor<'a> {
    /// Executor over the given runner.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Execute a fully rendered command, optionally piping `input`.
    ///
    /// The command and its outcome are traced before returning, on the
    /// failing paths too.
    pub fn execute(
        &self,
        command: &str,
        input: Option<&[u8]>,
        trace: &mut Trace,
    ) -> Result<CommandRecord> {
        trace.push(format!("command: {command}"));
        log::debug!("running: {command}");

        let result = self.run(command, input);
        match &result {
            Ok(record) => {
                log::debug!("exit code {}", record.exit_code);
                trace.push(format!("result: {record}"));
                trace.last_record = Some(record.clone());
            }
            Err(e) => trace.push(format!("error: {e}")),
        }
        result
    }

    fn run(&self, command: &str, input: Option<&[u8]>) -> Result<CommandRecord> {
        let missing = unresolved(command);
        if !missing.is_empty() {
            return Err(Error::InvalidCommand(format!(
                "'{command}' has unresolved placeholders: {}",
                missing.join(", ")
            )));
        }

        let args = split_command(command);
        if args.is_empty() {
            return Err(Error::InvalidCommand("empty command".to_string()));
        }

        self.runner.run(&args, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoRunner {
        calls: Mutex<Vec<(Vec<String>, Option<Vec<u8>>)>>,
        exit_code: i32,
    }

    impl EchoRunner {
        fn new(exit_code: i32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                exit_code,
            }
        }
    }

    impl CommandRunner for EchoRunner {
        fn run(&self, args: &[String], input: Option<&[u8]>) -> Result<CommandRecord> {
            self.calls
                .lock()
                .unwrap()
                .push((args.to_vec(), input.map(<[u8]>::to_vec)));
            Ok(CommandRecord::new(self.exit_code, args.join(" "), "gpg: stderr\n"))
        }
    }

    #[test]
    fn test_execute_traces_command_and_record() {
        let runner = EchoRunner::new(0);
        let mut trace = Trace::new();
        let record = CommandExecutor::new(&runner)
            .execute("/usr/bin/gpg  --list-keys ABC", None, &mut trace)
            .unwrap();

        assert_eq!(record.stdout, "/usr/bin/gpg --list-keys ABC");
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.entries()[0], "command: /usr/bin/gpg  --list-keys ABC");
        assert!(trace.entries()[1].starts_with("result: {rc: 0"));
        assert_eq!(trace.last_record(), Some(&record));
    }

    #[test]
    fn test_execute_traces_failures() {
        let runner = EchoRunner::new(2);
        let mut trace = Trace::new();
        let record = CommandExecutor::new(&runner)
            .execute("/usr/bin/gpg --list-keys ABC", None, &mut trace)
            .unwrap();

        assert_eq!(record.exit_code, 2);
        assert!(trace.entries()[1].contains("rc: 2"));
    }

    #[test]
    fn test_execute_pipes_input() {
        let runner = EchoRunner::new(0);
        let mut trace = Trace::new();
        CommandExecutor::new(&runner)
            .execute("gpg --batch --import", Some(b"KEY"), &mut trace)
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].1.as_deref(), Some(&b"KEY"[..]));
    }

    #[test]
    fn test_execute_rejects_unresolved_placeholders() {
        let runner = EchoRunner::new(0);
        let mut trace = Trace::new();
        let err = CommandExecutor::new(&runner)
            .execute("gpg --list-keys {key_id}", None, &mut trace)
            .unwrap_err();

        assert!(matches!(err, Error::InvalidCommand(_)));
        assert!(err.to_string().contains("key_id"));
        assert!(runner.calls.lock().unwrap().is_empty());
        assert_eq!(trace.len(), 2);
        assert!(trace.entries()[1].starts_with("error: "));
        assert!(trace.last_record().is_none());
    }

    #[test]
    fn test_execute_rejects_empty_command() {
        let runner = EchoRunner::new(0);
        let mut trace = Trace::new();
        let result = CommandExecutor::new(&runner).execute("  ", None, &mut trace);
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
    }
}
