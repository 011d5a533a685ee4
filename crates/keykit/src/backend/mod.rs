//! External collaborators of the reconciler.
//!
//! The [`CommandRunner`] and [`KeyFetcher`] traits abstract the key tool
//! process and the remote identity service, enabling:
//! - Real process execution and HTTP retrieval
//! - Scripted implementations for testing

pub mod keybase;
pub mod process;

use crate::error::Result;
use crate::types::CommandRecord;

/// Runs one external command to completion.
pub trait CommandRunner: Send + Sync {
    /// Run `args[0]` with the remaining arguments.
    ///
    /// `input`, when present, is written to the process's standard input.
    /// A nonzero exit is reported in the record, not as an error; errors are
    /// reserved for processes that could not be run at all.
    fn run(&self, args: &[String], input: Option<&[u8]>) -> Result<CommandRecord>;
}

/// Retrieves public key material for a remote identity handle.
pub trait KeyFetcher: Send + Sync {
    /// URL the key material for `user` is retrieved from.
    fn url_for(&self, user: &str) -> String;

    /// Fetch the raw key material, unparsed.
    fn fetch(&self, user: &str) -> Result<Vec<u8>>;
}
