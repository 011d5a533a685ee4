//! Core types for key reconciliation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default location of the key tool binary.
pub const DEFAULT_TOOL_PATH: &str = "/usr/bin/gpg";

// ============================================================================
// Desired State
// ============================================================================

/// Desired end-state of the key in the local keyring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// The key must exist.
    #[default]
    Present,
    /// The key must not exist.
    Absent,
    /// The key must exist and be refreshed from its source.
    Latest,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
            Self::Latest => write!(f, "latest"),
        }
    }
}

/// Kind of key material held in a local key file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Public key material.
    #[default]
    Public,
    /// Secret key material.
    Private,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// How the key material is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMode {
    /// The key is addressed by a known identifier.
    ExplicitId,
    /// Public key material from a local file, identifier unknown.
    LocalFilePublic,
    /// Secret key material from a local file, identifier unknown.
    LocalFilePrivate,
    /// Public key material fetched from the remote identity service.
    RemoteIdentity,
}

impl AcquisitionMode {
    /// Whether the identifier must be resolved from the key file first.
    pub fn needs_resolution(&self) -> bool {
        matches!(self, Self::LocalFilePublic | Self::LocalFilePrivate)
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitId => write!(f, "explicit-id"),
            Self::LocalFilePublic => write!(f, "local-file-public"),
            Self::LocalFilePrivate => write!(f, "local-file-private"),
            Self::RemoteIdentity => write!(f, "remote-identity"),
        }
    }
}

/// Raw invocation parameters, before validation.
#[derive(Debug, Clone, Default)]
pub struct KeyParams {
    /// Handle on the remote identity service.
    pub remote_user: Option<String>,
    /// Key identifier, normally a 40 character fingerprint.
    pub identifier: Option<String>,
    /// Kind of material in `key_file`.
    pub kind: KeyKind,
    /// Path to local key material.
    pub key_file: Option<PathBuf>,
    /// Key tool binary. Falls back to [`DEFAULT_TOOL_PATH`].
    pub tool_path: Option<PathBuf>,
    /// Desired lifecycle state.
    pub state: LifecycleState,
    /// Annotate every command with the tool's non-mutating flag.
    pub dry_run: bool,
}

/// Immutable desired-state descriptor for one reconciliation.
///
/// Built once from [`KeyParams`]. Once a fingerprint has been resolved from
/// a key file, [`DesiredState::with_identifier`] produces the re-targeted
/// descriptor; the original value is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    mode: AcquisitionMode,
    state: LifecycleState,
    kind: KeyKind,
    identifier: Option<String>,
    key_file: Option<PathBuf>,
    remote_user: Option<String>,
    tool_path: PathBuf,
    dry_run: bool,
}

impl DesiredState {
    /// Validate parameters and derive the acquisition mode.
    ///
    /// A remote user and a key file are mutually exclusive, one of them is
    /// required, and a remote user must be paired with an identifier.
    pub fn from_params(params: KeyParams) -> Result<Self> {
        let remote_user = non_empty(params.remote_user);
        let identifier = non_empty(params.identifier);
        let key_file = params.key_file.filter(|p| !p.as_os_str().is_empty());

        let mode = match (&remote_user, &key_file, &identifier) {
            (Some(_), Some(_), _) => {
                return Err(Error::InvalidDesiredState(
                    "remote user and key file are mutually exclusive".to_string(),
                ));
            }
            (Some(_), None, None) => {
                return Err(Error::InvalidDesiredState(
                    "remote user requires an identifier".to_string(),
                ));
            }
            (Some(_), None, Some(_)) => AcquisitionMode::RemoteIdentity,
            (None, Some(_), Some(_)) => AcquisitionMode::ExplicitId,
            (None, Some(_), None) => match params.kind {
                KeyKind::Public => AcquisitionMode::LocalFilePublic,
                KeyKind::Private => AcquisitionMode::LocalFilePrivate,
            },
            (None, None, _) => {
                return Err(Error::InvalidDesiredState(
                    "one of remote user or key file is required".to_string(),
                ));
            }
        };

        if let Some(id) = &identifier {
            if id.chars().any(char::is_whitespace) {
                return Err(Error::InvalidDesiredState(format!(
                    "identifier '{id}' contains whitespace"
                )));
            }
        }

        Ok(Self {
            mode,
            state: params.state,
            kind: params.kind,
            identifier,
            key_file,
            remote_user,
            tool_path: params
                .tool_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOL_PATH)),
            dry_run: params.dry_run,
        })
    }

    /// Re-target this descriptor at a resolved identifier.
    pub fn with_identifier(&self, identifier: impl Into<String>) -> Self {
        Self {
            mode: AcquisitionMode::ExplicitId,
            identifier: Some(identifier.into()),
            ..self.clone()
        }
    }

    /// How the key material is sourced.
    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Desired lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Kind of material in the key file.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Key identifier, if given or resolved.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Local key file, if any.
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    /// Remote identity handle, if any.
    pub fn remote_user(&self) -> Option<&str> {
        self.remote_user.as_deref()
    }

    /// Key tool binary.
    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    /// Whether commands run in the tool's non-mutating mode.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Commands and Results
// ============================================================================

/// Outcome of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Process exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandRecord {
    /// Record from its parts.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Record standing in for "nothing had to run".
    pub fn synthetic_success() -> Self {
        Self::default()
    }

    /// Whether the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for CommandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{rc: {}, stdout: {:?}, stderr: {:?}}}",
            self.exit_code, self.stdout, self.stderr
        )
    }
}

/// Whether the key currently exists in the keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// The check command exited 0.
    Present,
    /// The check command exited nonzero.
    Absent,
    /// No usable identifier, so nothing could be checked.
    Unknown,
}

impl Presence {
    /// Presence as reported by a check command.
    pub fn from_record(record: &CommandRecord) -> Self {
        if record.success() {
            Self::Present
        } else {
            Self::Absent
        }
    }

    /// Whether the key is known to be present.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }
}

/// The single converging action selected for a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Already converged.
    NoOp,
    /// Delete the key.
    Delete,
    /// Re-import remote material over the existing key.
    RefreshRemote,
    /// Re-import the local key file over the existing key.
    RefreshFile,
    /// Import the local key file.
    ImportFile,
    /// Fetch remote material and import it.
    ImportRemote,
}

impl Action {
    /// Whether this action runs a command that can change the keyring.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Whether `changed` is decided by the unchanged-output pattern.
    pub fn is_refresh(&self) -> bool {
        matches!(self, Self::RefreshRemote | Self::RefreshFile)
    }

    /// Whether the action pipes remote material into the tool.
    pub fn needs_remote_material(&self) -> bool {
        matches!(self, Self::RefreshRemote | Self::ImportRemote)
    }

    /// Name of the command template the action runs.
    pub fn template_name(&self) -> Option<&'static str> {
        match self {
            Self::NoOp => None,
            Self::Delete => Some("delete"),
            Self::RefreshRemote | Self::ImportRemote => Some("import-remote"),
            Self::RefreshFile | Self::ImportFile => Some("import-key"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoOp => "no change",
            Self::Delete => "delete key",
            Self::RefreshRemote => "refresh from remote",
            Self::RefreshFile => "refresh from key file",
            Self::ImportFile => "import key file",
            Self::ImportRemote => "import from remote",
        };
        write!(f, "{label}")
    }
}

/// Debugging payload surfaced with every result and every command failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Rendered command templates, by name.
    pub commands_used: BTreeMap<String, String>,
    /// Record of the last command that ran.
    pub last_record: CommandRecord,
    /// Ordered debugging trace.
    pub trace: Vec<String>,
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Whether the keyring was modified.
    pub changed: bool,
    /// The action that ran.
    pub action: Action,
    /// Commands, last record and trace.
    pub diagnostics: Diagnostics,
}

impl ReconciliationResult {
    /// The debugging trace.
    pub fn trace(&self) -> &[String] {
        &self.diagnostics.trace
    }

    /// Record of the converging command.
    pub fn last_record(&self) -> &CommandRecord {
        &self.diagnostics.last_record
    }
}
