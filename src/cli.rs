use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use keykit::{KeyKind, KeyParams, LifecycleState};
use std::path::PathBuf;

use crate::config::expand_path;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Keep a PGP key present, absent, or up to date in your keyring", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ~/.config/keyward/config.toml)
    #[arg(long, global = true, env = "KEYWARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the keyring to the desired key state
    Apply(ApplyArgs),

    /// Show what apply would do, without running the converging command
    Plan(KeyArgs),

    /// Print the fingerprint of a key file
    Fingerprint {
        /// Key file to inspect
        file: PathBuf,

        /// Key tool binary
        #[arg(long)]
        tool: Option<PathBuf>,
    },

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Key Arguments
// ============================================================================

#[derive(Args, Clone)]
pub struct KeyArgs {
    /// Remote identity (keybase) user to fetch the public key from
    #[arg(long, visible_alias = "keybase-user", requires = "id", conflicts_with = "key_file")]
    pub remote_user: Option<String>,

    /// Key identifier (fingerprint)
    #[arg(long)]
    pub id: Option<String>,

    /// Kind of key material in --key-file
    #[arg(long, value_enum, default_value_t = KindArg::Public)]
    pub kind: KindArg,

    /// Local key file to import
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Key tool binary (overrides the configured tool)
    #[arg(long)]
    pub tool: Option<PathBuf>,

    /// Desired key state
    #[arg(long, value_enum, default_value_t = StateArg::Present)]
    pub state: StateArg,

    /// Dry run - run every command in the key tool's non-mutating mode
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

impl KeyArgs {
    /// Convert to library parameters; the tool path is filled in later.
    pub fn to_params(&self) -> KeyParams {
        KeyParams {
            remote_user: self.remote_user.clone(),
            identifier: self.id.clone(),
            kind: self.kind.into(),
            key_file: self.key_file.as_deref().map(expand_path),
            tool_path: None,
            state: self.state.into(),
            dry_run: self.dry_run,
        }
    }
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Public,
    Private,
}

impl From<KindArg> for KeyKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Public => KeyKind::Public,
            KindArg::Private => KeyKind::Private,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StateArg {
    Present,
    Absent,
    Latest,
}

impl From<StateArg> for LifecycleState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Present => LifecycleState::Present,
            StateArg::Absent => LifecycleState::Absent,
            StateArg::Latest => LifecycleState::Latest,
        }
    }
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the configuration file location
    Path,
}
