//! Real process backend using `std::process::Command`.

use crate::backend::CommandRunner;
use crate::error::{Error, Result};
use crate::types::CommandRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// Backend that spawns the key tool as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Runner spawning real processes.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, args: &[String], input: Option<&[u8]>) -> Result<CommandRecord> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Error::InvalidCommand("empty command".to_string()))?;
        let spawn_err = |source| Error::Spawn {
            command: args.join(" "),
            source,
        };

        let mut child = Command::new(program)
            .args(rest)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin from a separate thread so a chatty child can't block on
        // a full stdout pipe while we are still writing.
        let output = thread::scope(|scope| {
            if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
                scope.spawn(move || {
                    // The child may exit before reading everything; its exit
                    // code reports that.
                    let _ = stdin.write_all(data);
                });
            }
            child.wait_with_output()
        })
        .map_err(spawn_err)?;

        Ok(CommandRecord {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Resolve the key tool to an executable path.
///
/// Bare names are looked up in `PATH`; paths must point at an executable.
pub fn resolve_tool(tool: &Path) -> Result<PathBuf> {
    which::which(tool).map_err(|e| Error::ToolNotFound(format!("{}: {e}", tool.display())))
}
