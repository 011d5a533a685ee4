//! The reconciliation state machine.
//!
//! A reconciliation runs in two steps:
//!
//! 1. [`Reconciler::plan`] resolves the key identifier from a key file when
//!    needed, checks whether the key is in the keyring and selects exactly
//!    one converging [`Action`].
//! 2. [`Reconciler::execute`] runs that action and decides `changed`.
//!
//! [`Reconciler::reconcile`] does both. Everything is sequential: at most
//! one identifier resolution, one presence check, one remote fetch and one
//! converging command per run. A failing converging command aborts with the
//! full diagnostics.

use crate::backend::{CommandRunner, KeyFetcher};
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, Trace};
use crate::fingerprint::{Fingerprint, resolve_fingerprint};
use crate::template::{CommandTemplates, Values, quote};
use crate::types::{
    AcquisitionMode, Action, CommandRecord, DesiredState, Diagnostics, KeyKind, LifecycleState,
    Presence, ReconciliationResult,
};
use regex::Regex;

/// Stderr pattern gpg prints when an import left the key untouched.
pub const DEFAULT_UNCHANGED_PATTERN: &str = r"gpg:\s+unchanged: 1\n";

/// Flag passed to the key tool in dry-run mode.
pub const DRY_RUN_FLAG: &str = "--dry-run";

/// Tunables for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Command templates, by name.
    pub templates: CommandTemplates,
    /// Matches refresh stderr when nothing changed.
    pub unchanged_pattern: Regex,
    /// Check the keyring in remote-identity mode instead of assuming absence.
    pub verify_remote_presence: bool,
}

impl ReconcileOptions {
    /// Use a different unchanged-output pattern.
    pub fn with_unchanged_pattern(mut self, pattern: &str) -> Result<Self> {
        self.unchanged_pattern = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(self)
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            templates: CommandTemplates::default(),
            unchanged_pattern: Regex::new(DEFAULT_UNCHANGED_PATTERN)
                .expect("default unchanged pattern is valid"),
            verify_remote_presence: false,
        }
    }
}

/// Outcome of the planning step.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Descriptor the action applies to, re-targeted if an identifier was
    /// resolved from the key file.
    pub desired: DesiredState,
    /// Key presence as detected.
    pub presence: Presence,
    /// The selected converging action.
    pub action: Action,
    /// Rendered commands.
    pub commands: CommandTemplates,
    /// Trace so far.
    pub trace: Trace,
}

/// Drives the key tool until the keyring matches a [`DesiredState`].
pub struct Reconciler<'a> {
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn KeyFetcher,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    /// Reconciler over a command runner and a remote key fetcher.
    pub fn new(
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn KeyFetcher,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            runner,
            fetcher,
            options,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Plan and execute in one go.
    pub fn reconcile(&self, desired: &DesiredState) -> Result<ReconciliationResult> {
        let plan = self.plan(desired)?;
        self.execute(plan)
    }

    /// Detect the current state and select the converging action.
    ///
    /// A failing step returns [`Error::Aborted`] with the trace so far.
    pub fn plan(&self, desired: &DesiredState) -> Result<Plan> {
        let executor = CommandExecutor::new(self.runner);
        let mut trace = Trace::new();
        let mut commands = self.options.templates.render(&setup_values(desired));
        trace.push(format!("set up commands: {:?}", commands.as_map()));

        let (desired, presence) = match self.detect(&executor, desired, &mut commands, &mut trace)
        {
            Ok(detected) => detected,
            Err(err) => return Err(err.with_diagnostics(collect_diagnostics(&commands, trace))),
        };

        let action = select_action(presence, &desired);
        log::info!(
            "key {} is {:?}, want {}: {action}",
            desired.identifier().unwrap_or("<unresolved>"),
            presence,
            desired.state()
        );
        trace.push(format!("presence: {presence:?}, action: {action}"));

        Ok(Plan {
            desired,
            presence,
            action,
            commands,
            trace,
        })
    }

    /// Resolve the fingerprint of the descriptor's key file, and nothing else.
    pub fn resolve_identifier(&self, desired: &DesiredState) -> Result<(Option<Fingerprint>, Trace)> {
        if desired.key_file().is_none() {
            return Err(Error::InvalidDesiredState(
                "resolving an identifier needs a key file".to_string(),
            ));
        }
        let executor = CommandExecutor::new(self.runner);
        let mut trace = Trace::new();
        let commands = self.options.templates.render(&setup_values(desired));
        match inspect_fingerprint(&executor, &commands, &mut trace) {
            Ok(fpr) => Ok((fpr, trace)),
            Err(err) => Err(err.with_diagnostics(collect_diagnostics(&commands, trace))),
        }
    }

    /// Run the planned action and decide whether anything changed.
    pub fn execute(&self, plan: Plan) -> Result<ReconciliationResult> {
        let Plan {
            desired,
            action,
            commands,
            mut trace,
            ..
        } = plan;
        let executor = CommandExecutor::new(self.runner);

        let record = match self.converge(&executor, &desired, action, &commands, &mut trace) {
            Ok(record) => record,
            Err(err) => return Err(err.with_diagnostics(collect_diagnostics(&commands, trace))),
        };

        let changed = match action {
            Action::NoOp => false,
            _ if action.is_refresh() => !self.options.unchanged_pattern.is_match(&record.stderr),
            _ => record.success(),
        };

        let diagnostics = Diagnostics {
            commands_used: commands.as_map().clone(),
            last_record: record,
            trace: trace.into_inner(),
        };

        if !diagnostics.last_record.success() {
            return Err(Error::CommandFailure(Box::new(diagnostics)));
        }

        Ok(ReconciliationResult {
            changed,
            action,
            diagnostics,
        })
    }

    /// Find out whether the key is in the keyring.
    ///
    /// Key-file modes resolve the fingerprint first and return the
    /// re-targeted descriptor; `commands` gets the identifier bound.
    fn detect(
        &self,
        executor: &CommandExecutor<'_>,
        desired: &DesiredState,
        commands: &mut CommandTemplates,
        trace: &mut Trace,
    ) -> Result<(DesiredState, Presence)> {
        if desired.mode().needs_resolution() {
            let Some(fpr) = inspect_fingerprint(executor, commands, trace)? else {
                log::warn!(
                    "no fingerprint found in {}",
                    desired.key_file().map(|p| p.display().to_string()).unwrap_or_default()
                );
                trace.push("no fingerprint found, presence unknown");
                return Ok((desired.clone(), Presence::Unknown));
            };

            trace.push(format!("resolved fingerprint: {fpr}"));
            let retargeted = desired.with_identifier(fpr.as_str());
            *commands = commands.render(&key_id_values(&retargeted));
            trace.push(format!("set up commands: {:?}", commands.as_map()));

            let check = match desired.kind() {
                KeyKind::Public => "check-public",
                KeyKind::Private => "check-private",
            };
            let record = executor.execute(commands.require(check)?, None, trace)?;
            return Ok((retargeted, Presence::from_record(&record)));
        }

        if desired.mode() == AcquisitionMode::RemoteIdentity && !self.options.verify_remote_presence
        {
            trace.push("remote identity: presence check skipped");
            return Ok((desired.clone(), Presence::Unknown));
        }

        let record = executor.execute(commands.require("check")?, None, trace)?;
        Ok((desired.clone(), Presence::from_record(&record)))
    }

    /// Fetch remote material when needed and run the action's command.
    fn converge(
        &self,
        executor: &CommandExecutor<'_>,
        desired: &DesiredState,
        action: Action,
        commands: &CommandTemplates,
        trace: &mut Trace,
    ) -> Result<CommandRecord> {
        let Some(name) = action.template_name() else {
            return Ok(CommandRecord::synthetic_success());
        };

        let material = if action.needs_remote_material() {
            let user = desired.remote_user().ok_or_else(|| {
                Error::InvalidDesiredState(format!("{action} needs a remote user"))
            })?;
            let url = self.fetcher.url_for(user);
            trace.push(format!("fetching {url}"));
            match self.fetcher.fetch(user) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    trace.push(format!("error: {err}"));
                    return Err(err);
                }
            }
        } else {
            None
        };

        executor.execute(commands.require(name)?, material.as_deref(), trace)
    }
}

/// Diagnostics for a run that stopped before its converging command
/// produced a record.
fn collect_diagnostics(commands: &CommandTemplates, trace: Trace) -> Diagnostics {
    Diagnostics {
        commands_used: commands.as_map().clone(),
        last_record: trace.last_record().cloned().unwrap_or_default(),
        trace: trace.into_inner(),
    }
}

/// Select the converging action, first match wins:
///
/// 1. present, want absent: delete
/// 2. present, want latest: refresh from the remote user, else the key file
/// 3. not present, want present or latest: import
/// 4. otherwise nothing to do
///
/// An unknown presence counts as not present.
pub fn select_action(presence: Presence, desired: &DesiredState) -> Action {
    match (presence.is_present(), desired.state()) {
        (true, LifecycleState::Absent) => Action::Delete,
        (true, LifecycleState::Latest) => {
            if desired.remote_user().is_some() {
                Action::RefreshRemote
            } else {
                Action::RefreshFile
            }
        }
        (false, LifecycleState::Present | LifecycleState::Latest) => {
            if desired.mode() == AcquisitionMode::RemoteIdentity {
                Action::ImportRemote
            } else {
                Action::ImportFile
            }
        }
        _ => Action::NoOp,
    }
}

fn inspect_fingerprint(
    executor: &CommandExecutor<'_>,
    commands: &CommandTemplates,
    trace: &mut Trace,
) -> Result<Option<Fingerprint>> {
    let inspect = executor.execute(commands.require("inspect")?, None, trace)?;
    trace.push(format!("keyinfo: {}", inspect.stdout));
    Ok(resolve_fingerprint(&inspect.stdout))
}

/// Values known once the descriptor is built.
fn setup_values(desired: &DesiredState) -> Values {
    let mut values = Values::new();
    values.insert(
        "bin_path".to_string(),
        quote(&desired.tool_path().display().to_string()),
    );
    values.insert(
        "check_mode".to_string(),
        if desired.dry_run() { DRY_RUN_FLAG } else { "" }.to_string(),
    );
    if let Some(path) = desired.key_file() {
        values.insert("key_file".to_string(), quote(&path.display().to_string()));
    }
    values.extend(key_id_values(desired));
    values
}

fn key_id_values(desired: &DesiredState) -> Values {
    desired
        .identifier()
        .map(|id| ("key_id".to_string(), quote(id)))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyParams;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const FPR: &str = "4F3A9C1B2D5E6F708192A3B4C5D6E7F801234567";
    const UNCHANGED_STDERR: &str = "gpg: key C5D6E7F801234567: \"Alice <alice@example.com>\" not changed\n\
                                    gpg: Total number processed: 1\n\
                                    gpg:              unchanged: 1\n";
    const IMPORTED_STDERR: &str = "gpg: key C5D6E7F801234567: \"Alice <alice@example.com>\" 1 new signature\n\
                                   gpg: Total number processed: 1\n\
                                   gpg:         new signatures: 1\n";

    /// Replays scripted records and remembers every command it was given.
    #[derive(Default)]
    struct ScriptedRunner {
        replies: Mutex<VecDeque<CommandRecord>>,
        calls: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<CommandRecord>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, args: &[String], input: Option<&[u8]>) -> Result<CommandRecord> {
            self.calls
                .lock()
                .unwrap()
                .push((args.join(" "), input.map(<[u8]>::to_vec)));
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected command"))
        }
    }

    enum Remote {
        Key(&'static [u8]),
        Status(u16),
    }

    struct StubFetcher {
        remote: Remote,
        fetches: Mutex<usize>,
    }

    impl StubFetcher {
        fn key() -> Self {
            Self::with(Remote::Key(b"-----BEGIN PGP PUBLIC KEY BLOCK-----\n"))
        }

        fn with(remote: Remote) -> Self {
            Self {
                remote,
                fetches: Mutex::new(0),
            }
        }
    }

    impl KeyFetcher for StubFetcher {
        fn url_for(&self, user: &str) -> String {
            format!("https://keybase.io/{user}/pgp_keys.asc")
        }

        fn fetch(&self, user: &str) -> Result<Vec<u8>> {
            *self.fetches.lock().unwrap() += 1;
            match self.remote {
                Remote::Key(bytes) => Ok(bytes.to_vec()),
                Remote::Status(status) => Err(Error::RemoteStatus {
                    url: self.url_for(user),
                    status,
                    body: "user not found".to_string(),
                }),
            }
        }
    }

    fn ok(stdout: &str, stderr: &str) -> CommandRecord {
        CommandRecord::new(0, stdout, stderr)
    }

    fn fail(stderr: &str) -> CommandRecord {
        CommandRecord::new(2, "", stderr)
    }

    fn inspect_output() -> CommandRecord {
        ok(
            &format!("pub:-:4096:1:C5D6E7F801234567:1514764800:::-:::scESC:\nfpr:::::::::{FPR}:\n"),
            "",
        )
    }

    fn explicit(state: LifecycleState) -> DesiredState {
        DesiredState::from_params(KeyParams {
            identifier: Some(FPR.into()),
            key_file: Some("/keys/alice.asc".into()),
            state,
            ..KeyParams::default()
        })
        .unwrap()
    }

    fn local_file(kind: KeyKind, state: LifecycleState) -> DesiredState {
        DesiredState::from_params(KeyParams {
            key_file: Some("/keys/alice.asc".into()),
            kind,
            state,
            ..KeyParams::default()
        })
        .unwrap()
    }

    fn remote(state: LifecycleState) -> DesiredState {
        DesiredState::from_params(KeyParams {
            remote_user: Some("alice".into()),
            identifier: Some(FPR.into()),
            state,
            ..KeyParams::default()
        })
        .unwrap()
    }

    fn reconcile(
        runner: &ScriptedRunner,
        fetcher: &StubFetcher,
        desired: &DesiredState,
    ) -> Result<ReconciliationResult> {
        Reconciler::new(runner, fetcher, ReconcileOptions::default()).reconcile(desired)
    }

    #[test]
    fn test_absent_and_already_absent_is_noop() {
        let no_key = || fail("gpg: error reading key: No public key\n");
        let cases = [
            (explicit(LifecycleState::Absent), vec![no_key()]),
            (
                local_file(KeyKind::Public, LifecycleState::Absent),
                vec![inspect_output(), no_key()],
            ),
            (
                local_file(KeyKind::Private, LifecycleState::Absent),
                vec![inspect_output(), no_key()],
            ),
            (remote(LifecycleState::Absent), vec![]),
        ];
        for (desired, replies) in cases {
            let runner = ScriptedRunner::new(replies);
            let fetcher = StubFetcher::key();
            let result = reconcile(&runner, &fetcher, &desired).unwrap();

            assert!(!result.changed, "{:?}", desired.mode());
            assert_eq!(result.action, Action::NoOp);
            assert_eq!(result.last_record(), &CommandRecord::synthetic_success());
            assert!(
                runner
                    .commands()
                    .iter()
                    .all(|c| !c.contains("--delete") && !c.contains("--import")),
                "{:?}",
                runner.commands()
            );
            assert_eq!(*fetcher.fetches.lock().unwrap(), 0);
        }
    }

    #[test]
    fn test_explicit_id_present_key_is_deleted() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", ""), ok("", "")]);
        let result = reconcile(&runner, &StubFetcher::key(), &explicit(LifecycleState::Absent))
            .unwrap();

        assert!(result.changed);
        assert_eq!(result.action, Action::Delete);
        assert_eq!(
            runner.commands(),
            vec![
                format!("/usr/bin/gpg --list-keys {FPR}"),
                format!("/usr/bin/gpg --batch --yes --delete-secret-and-public-keys {FPR}"),
            ]
        );
    }

    #[test]
    fn test_present_and_present_is_noop() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", "")]);
        let result = reconcile(&runner, &StubFetcher::key(), &explicit(LifecycleState::Present))
            .unwrap();
        assert!(!result.changed);
        assert_eq!(result.action, Action::NoOp);
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_latest_refresh_unchanged() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", ""), ok("", UNCHANGED_STDERR)]);
        let result = reconcile(&runner, &StubFetcher::key(), &explicit(LifecycleState::Latest))
            .unwrap();

        assert_eq!(result.action, Action::RefreshFile);
        assert!(!result.changed);
        assert_eq!(
            runner.commands()[1],
            "/usr/bin/gpg --batch --import /keys/alice.asc"
        );
    }

    #[test]
    fn test_latest_refresh_changed() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", ""), ok("", IMPORTED_STDERR)]);
        let result = reconcile(&runner, &StubFetcher::key(), &explicit(LifecycleState::Latest))
            .unwrap();
        assert!(result.changed);
    }

    #[test]
    fn test_latest_refresh_from_remote_when_verified() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", ""), ok("", UNCHANGED_STDERR)]);
        let fetcher = StubFetcher::key();
        let options = ReconcileOptions {
            verify_remote_presence: true,
            ..ReconcileOptions::default()
        };
        let result = Reconciler::new(&runner, &fetcher, options)
            .reconcile(&remote(LifecycleState::Latest))
            .unwrap();

        assert_eq!(result.action, Action::RefreshRemote);
        assert!(!result.changed);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, format!("/usr/bin/gpg --list-keys {FPR}"));
        assert_eq!(calls[1].0, "/usr/bin/gpg --batch --import");
        assert_eq!(
            calls[1].1.as_deref(),
            Some(&b"-----BEGIN PGP PUBLIC KEY BLOCK-----\n"[..])
        );
    }

    #[test]
    fn test_unchanged_pattern_is_configurable() {
        let runner = ScriptedRunner::new(vec![ok("pub ...", ""), ok("", "keytool: nothing to do\n")]);
        let fetcher = StubFetcher::key();
        let options = ReconcileOptions::default()
            .with_unchanged_pattern("nothing to do")
            .unwrap();
        let result = Reconciler::new(&runner, &fetcher, options)
            .reconcile(&explicit(LifecycleState::Latest))
            .unwrap();
        assert!(!result.changed);

        assert!(matches!(
            ReconcileOptions::default().with_unchanged_pattern("("),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_local_file_resolves_and_retargets() {
        let runner = ScriptedRunner::new(vec![
            inspect_output(),
            fail("gpg: error reading key: No secret key\n"),
            ok("", "gpg: secret key imported\n"),
        ]);
        let fetcher = StubFetcher::key();
        let reconciler = Reconciler::new(&runner, &fetcher, ReconcileOptions::default());
        let desired = local_file(KeyKind::Private, LifecycleState::Present);

        let plan = reconciler.plan(&desired).unwrap();
        assert_eq!(plan.desired.mode(), AcquisitionMode::ExplicitId);
        assert_eq!(plan.desired.identifier(), Some(FPR));
        assert_eq!(plan.presence, Presence::Absent);
        assert_eq!(plan.action, Action::ImportFile);
        // the caller's descriptor is untouched
        assert_eq!(desired.mode(), AcquisitionMode::LocalFilePrivate);

        let result = reconciler.execute(plan).unwrap();
        assert!(result.changed);
        assert_eq!(
            runner.commands(),
            vec![
                "/usr/bin/gpg --with-colons --with-fingerprint /keys/alice.asc".to_string(),
                format!("/usr/bin/gpg --list-secret-keys {FPR}"),
                "/usr/bin/gpg --batch --import /keys/alice.asc".to_string(),
            ]
        );
        assert!(
            result.diagnostics.commands_used["delete"].ends_with(FPR),
            "second render pass binds the resolved identifier"
        );
    }

    #[test]
    fn test_resolve_identifier_only_inspects() {
        let runner = ScriptedRunner::new(vec![inspect_output()]);
        let fetcher = StubFetcher::key();
        let reconciler = Reconciler::new(&runner, &fetcher, ReconcileOptions::default());

        let (fpr, trace) = reconciler
            .resolve_identifier(&local_file(KeyKind::Public, LifecycleState::Present))
            .unwrap();
        assert_eq!(fpr.map(String::from), Some(FPR.to_string()));
        assert_eq!(runner.commands().len(), 1);
        assert!(trace.entries().iter().any(|t| t.starts_with("keyinfo: ")));

        assert!(matches!(
            reconciler.resolve_identifier(&remote(LifecycleState::Present)),
            Err(Error::InvalidDesiredState(_))
        ));
    }

    #[test]
    fn test_local_file_public_uses_public_listing() {
        let runner = ScriptedRunner::new(vec![inspect_output(), ok("pub ...", "")]);
        let result = reconcile(
            &runner,
            &StubFetcher::key(),
            &local_file(KeyKind::Public, LifecycleState::Present),
        )
        .unwrap();
        assert!(!result.changed);
        assert_eq!(runner.commands()[1], format!("/usr/bin/gpg --list-public-keys {FPR}"));
    }

    #[test]
    fn test_resolution_miss_skips_presence_check_and_imports() {
        let runner = ScriptedRunner::new(vec![
            ok("", "gpg: no valid OpenPGP data found.\n"),
            ok("", "gpg: key imported\n"),
        ]);
        let result = reconcile(
            &runner,
            &StubFetcher::key(),
            &local_file(KeyKind::Public, LifecycleState::Present),
        )
        .unwrap();

        assert!(result.changed);
        assert_eq!(result.action, Action::ImportFile);
        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| !c.contains("--list-")));
        assert!(result.trace().iter().any(|t| t.contains("no fingerprint found")));
        // key_id stays a placeholder: it was never learned
        assert!(result.diagnostics.commands_used["check"].contains("{key_id}"));
    }

    #[test]
    fn test_remote_identity_skips_presence_and_imports() {
        let runner = ScriptedRunner::new(vec![ok("", "gpg: key imported\n")]);
        let fetcher = StubFetcher::key();
        let result = reconcile(&runner, &fetcher, &remote(LifecycleState::Latest)).unwrap();

        assert_eq!(result.action, Action::ImportRemote);
        assert!(result.changed);
        assert_eq!(runner.commands(), vec!["/usr/bin/gpg --batch --import"]);
        assert_eq!(*fetcher.fetches.lock().unwrap(), 1);
    }

    #[test]
    fn test_remote_not_found_is_fatal_before_import() {
        let runner = ScriptedRunner::new(vec![]);
        let fetcher = StubFetcher::with(Remote::Status(404));
        let err = reconcile(&runner, &fetcher, &remote(LifecycleState::Present)).unwrap_err();

        match err.root() {
            Error::RemoteStatus { status, .. } => assert_eq!(*status, 404),
            other => panic!("Expected RemoteStatus, got {other:?}"),
        }
        assert!(runner.commands().is_empty());

        let diag = err.diagnostics().expect("fetch failure diagnostics");
        assert!(diag.trace.iter().any(|t| t == "remote identity: presence check skipped"));
        assert!(
            diag.trace
                .last()
                .is_some_and(|t| t.starts_with("error: ") && t.contains("404"))
        );
        assert!(diag.commands_used.contains_key("import-remote"));
    }

    #[test]
    fn test_failed_converging_command_surfaces_diagnostics() {
        let runner = ScriptedRunner::new(vec![
            fail("gpg: error reading key: No public key\n"),
            fail("gpg: can't open '/keys/alice.asc': No such file or directory\n"),
        ]);
        let err = reconcile(&runner, &StubFetcher::key(), &explicit(LifecycleState::Present))
            .unwrap_err();

        let diag = err.diagnostics().expect("command failure diagnostics");
        assert_eq!(diag.last_record.exit_code, 2);
        assert!(diag.last_record.stderr.contains("can't open"));
        assert!(diag.commands_used.contains_key("import-key"));
        assert_eq!(
            diag.trace.iter().filter(|t| t.starts_with("command: ")).count(),
            2
        );
        assert!(diag.trace.iter().any(|t| t.starts_with("set up commands: ")));
    }

    #[test]
    fn test_dry_run_annotates_every_command() {
        let runner = ScriptedRunner::new(vec![
            fail("gpg: error reading key: No public key\n"),
            ok("", ""),
        ]);
        let desired = DesiredState::from_params(KeyParams {
            identifier: Some(FPR.into()),
            key_file: Some("/keys/alice.asc".into()),
            dry_run: true,
            ..KeyParams::default()
        })
        .unwrap();
        let result = reconcile(&runner, &StubFetcher::key(), &desired).unwrap();

        assert!(result.changed);
        assert_eq!(
            runner.commands(),
            vec![
                format!("/usr/bin/gpg --dry-run --list-keys {FPR}"),
                "/usr/bin/gpg --dry-run --batch --import /keys/alice.asc".to_string(),
            ]
        );
        assert!(
            result
                .diagnostics
                .commands_used
                .values()
                .all(|c| c.contains(DRY_RUN_FLAG))
        );
    }

    #[test]
    fn test_dry_run_failure_exit_code_is_reported() {
        let runner = ScriptedRunner::new(vec![fail("no key\n"), fail("gpg: dry-run import failed\n")]);
        let desired = DesiredState::from_params(KeyParams {
            identifier: Some(FPR.into()),
            key_file: Some("/keys/alice.asc".into()),
            dry_run: true,
            ..KeyParams::default()
        })
        .unwrap();
        assert!(matches!(
            reconcile(&runner, &StubFetcher::key(), &desired),
            Err(Error::CommandFailure(_))
        ));
    }

    #[test]
    fn test_paths_with_spaces_stay_one_argument() {
        let runner = ScriptedRunner::new(vec![fail("no key\n"), ok("", "")]);
        let desired = DesiredState::from_params(KeyParams {
            identifier: Some(FPR.into()),
            key_file: Some("/home/me/My Keys/alice.asc".into()),
            ..KeyParams::default()
        })
        .unwrap();
        reconcile(&runner, &StubFetcher::key(), &desired).unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].0, "/usr/bin/gpg --batch --import /home/me/My Keys/alice.asc");
    }

    #[test]
    fn test_select_action_table() {
        let file = explicit(LifecycleState::Present);
        let cases = [
            (Presence::Present, LifecycleState::Absent, Action::Delete),
            (Presence::Present, LifecycleState::Latest, Action::RefreshFile),
            (Presence::Present, LifecycleState::Present, Action::NoOp),
            (Presence::Absent, LifecycleState::Present, Action::ImportFile),
            (Presence::Absent, LifecycleState::Latest, Action::ImportFile),
            (Presence::Absent, LifecycleState::Absent, Action::NoOp),
            (Presence::Unknown, LifecycleState::Present, Action::ImportFile),
            (Presence::Unknown, LifecycleState::Absent, Action::NoOp),
        ];
        for (presence, state, expected) in cases {
            let desired = DesiredState::from_params(KeyParams {
                identifier: file.identifier().map(str::to_string),
                key_file: file.key_file().map(Into::into),
                state,
                ..KeyParams::default()
            })
            .unwrap();
            assert_eq!(select_action(presence, &desired), expected, "{presence:?} {state}");
        }

        assert_eq!(
            select_action(Presence::Unknown, &remote(LifecycleState::Present)),
            Action::ImportRemote
        );
        assert_eq!(
            select_action(Presence::Present, &remote(LifecycleState::Latest)),
            Action::RefreshRemote
        );
    }

    #[test]
    fn test_invalid_converging_command_keeps_presence_trace() {
        let runner = ScriptedRunner::new(vec![fail("gpg: error reading key: No public key\n")]);
        let fetcher = StubFetcher::key();
        let options = ReconcileOptions {
            templates: CommandTemplates::default()
                .with_overrides([("import-key", "{bin_path} --import {keyfile}")]),
            ..ReconcileOptions::default()
        };
        let err = Reconciler::new(&runner, &fetcher, options)
            .reconcile(&explicit(LifecycleState::Present))
            .unwrap_err();

        assert!(matches!(err.root(), Error::InvalidCommand(_)));
        assert!(err.to_string().contains("keyfile"));

        let diag = err.diagnostics().expect("aborted run keeps its diagnostics");
        assert!(
            diag.trace
                .iter()
                .any(|t| t.starts_with("command: ") && t.ends_with(&format!("--list-keys {FPR}")))
        );
        assert!(diag.trace.iter().any(|t| t.starts_with("presence: Absent")));
        assert!(
            diag.trace
                .last()
                .is_some_and(|t| t.starts_with("error: ") && t.contains("keyfile"))
        );
        assert_eq!(diag.last_record.exit_code, 2, "last record is the presence check");
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_failing_presence_check_spawn_keeps_trace() {
        struct MissingTool;

        impl CommandRunner for MissingTool {
            fn run(&self, args: &[String], _input: Option<&[u8]>) -> Result<CommandRecord> {
                Err(Error::Spawn {
                    command: args.join(" "),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                })
            }
        }

        let fetcher = StubFetcher::key();
        let err = Reconciler::new(&MissingTool, &fetcher, ReconcileOptions::default())
            .plan(&explicit(LifecycleState::Present))
            .unwrap_err();

        assert!(matches!(err.root(), Error::Spawn { .. }));
        let diag = err.diagnostics().expect("aborted run keeps its diagnostics");
        assert_eq!(diag.trace.len(), 3);
        assert!(diag.trace[0].starts_with("set up commands: "));
        assert!(diag.trace[2].starts_with("error: failed to execute"));
        assert_eq!(diag.last_record, CommandRecord::default());
    }

    #[test]
    fn test_key_file_with_quote_characters_is_passed_verbatim() {
        let runner = ScriptedRunner::new(vec![fail("no key\n"), ok("", "")]);
        let desired = DesiredState::from_params(KeyParams {
            identifier: Some(FPR.into()),
            key_file: Some("/keys/bob's.asc".into()),
            ..KeyParams::default()
        })
        .unwrap();
        reconcile(&runner, &StubFetcher::key(), &desired).unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].0, "/usr/bin/gpg --batch --import /keys/bob's.asc");
    }
}
