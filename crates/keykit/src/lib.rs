//! # keykit
//!
//! Converge a PGP key-pair in the local keyring to a declared state.
//!
//! This crate provides:
//! - A [`DesiredState`] descriptor: how the key is sourced (explicit
//!   identifier, local key file, or a remote identity service) and whether
//!   it should be present, absent, or refreshed to the latest material
//! - Permissive, two-phase command templates for the wrapped key tool
//! - Fingerprint resolution from key inspection output
//! - A [`Reconciler`] that detects the current state, runs exactly one
//!   converging command, and reports whether anything changed
//!
//! ## Example
//!
//! ```no_run
//! use keykit::backend::{keybase::KeybaseFetcher, process::ProcessRunner};
//! use keykit::{DesiredState, KeyParams, LifecycleState, ReconcileOptions, Reconciler};
//!
//! let desired = DesiredState::from_params(KeyParams {
//!     key_file: Some("/etc/keys/release.asc".into()),
//!     state: LifecycleState::Present,
//!     ..KeyParams::default()
//! })
//! .expect("invalid parameters");
//!
//! let runner = ProcessRunner::new();
//! let fetcher = KeybaseFetcher::new();
//! let reconciler = Reconciler::new(&runner, &fetcher, ReconcileOptions::default());
//!
//! let result = reconciler.reconcile(&desired).expect("reconciliation failed");
//! println!("changed: {}", result.changed);
//! ```
//!
//! ## External tool
//!
//! The default templates target `gpg`. The exact command lines, and the
//! stderr pattern that marks an unchanged refresh, are configurable through
//! [`ReconcileOptions`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod reconcile;
pub mod template;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use fingerprint::{Fingerprint, resolve_fingerprint};
pub use reconcile::{Plan, ReconcileOptions, Reconciler, select_action};
pub use template::CommandTemplates;
pub use types::{
    AcquisitionMode, Action, CommandRecord, DEFAULT_TOOL_PATH, DesiredState, Diagnostics, KeyKind,
    KeyParams, LifecycleState, Presence, ReconciliationResult,
};
