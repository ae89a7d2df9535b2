use std::process::Command;

use anyhow::Result;
use atomic_update_core::{
    classify, CommandRunner, Config, FailureClass, Snapshot, SnapshotTag, UpdateError,
};
use atomic_update_host::{active_and_default, dist_upgrade_command, dist_upgrade_dry_run, volumes};
use atomic_update_stage::{apply_live, diff, reboot, stage, verify, Phase, TransactionContext};
use tracing::{debug, info, warn};

use crate::render::TerminalRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionState {
    Idle,
    Staged,
    PreVerified,
    PayloadRunning,
    PostVerified,
    Committed,
    Discarded,
}

impl TransactionState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Staged => "staged",
            Self::PreVerified => "pre-verified",
            Self::PayloadRunning => "payload-running",
            Self::PostVerified => "post-verified",
            Self::Committed => "committed",
            Self::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Payload {
    Upgrade,
    Run(Vec<String>),
}

impl Payload {
    pub(crate) fn command(&self, root: &std::path::Path, interactive: bool) -> Command {
        match self {
            Self::Upgrade => dist_upgrade_command(root, interactive),
            Self::Run(args) => {
                let mut command = Command::new("chroot");
                command.arg(root).arg("bash").arg("-c");
                match args.as_slice() {
                    [script] => {
                        command.arg(script);
                    }
                    _ => {
                        command.arg("\"$@\"").arg("bash").args(args);
                    }
                }
                command
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Upgrade => "zypper dist-upgrade".to_string(),
            Self::Run(args) => args.join(" "),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TransactionOptions {
    pub(crate) reboot: bool,
    pub(crate) apply: bool,
    pub(crate) shell: bool,
    /// `Some(None)` continues from the default snapshot, `Some(Some(n))`
    /// from snapshot `n`.
    pub(crate) continue_from: Option<Option<u32>>,
    pub(crate) skip_verify: bool,
    pub(crate) interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Committed {
        snapshot: u32,
        base: u32,
        device: String,
    },
    NothingToDo,
}

struct Transaction<'a> {
    ctx: &'a TransactionContext,
    options: &'a TransactionOptions,
    renderer: TerminalRenderer,
    state: TransactionState,
}

/// Runs one mutating transaction to completion. Every failure discards the
/// candidate and cleans up before the error is returned, except after an
/// interrupt, where the interrupt handler owns teardown.
pub(crate) fn execute(
    ctx: &TransactionContext,
    payload: &Payload,
    options: &TransactionOptions,
    renderer: TerminalRenderer,
) -> Result<Outcome> {
    let mut transaction = Transaction {
        ctx,
        options,
        renderer,
        state: TransactionState::Idle,
    };

    match transaction.drive(payload) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let committed = transaction.state == TransactionState::Committed;
            if !committed {
                transaction.advance(TransactionState::Discarded);
            }
            if ctx.is_interrupted() {
                return Err(err);
            }
            let teardown = match classify(&err).map(UpdateError::class) {
                Some(FailureClass::Precondition) => ctx.cleanup(),
                _ if committed => ctx.cleanup(),
                _ => ctx.discard(ctx.candidate()),
            };
            if let Err(cleanup_err) = teardown {
                warn!("Cleanup after failure was incomplete: {cleanup_err:#}");
            }
            Err(err)
        }
    }
}

/// Base snapshot for a new candidate: the running snapshot, or the default
/// one when continuing or applying, or an explicit continuation target.
pub(crate) fn select_base(snapshots: &[Snapshot], options: &TransactionOptions) -> Result<u32> {
    let (active, default) = active_and_default(snapshots)?;
    match options.continue_from {
        Some(Some(id)) => {
            if snapshots.iter().any(|snapshot| snapshot.id == id) {
                Ok(id)
            } else {
                Err(UpdateError::UnknownSnapshot(id).into())
            }
        }
        Some(None) => Ok(default.id),
        None if options.apply => Ok(default.id),
        None => Ok(active.id),
    }
}

impl Transaction<'_> {
    fn advance(&mut self, state: TransactionState) {
        debug!(from = self.state.as_str(), to = state.as_str(), "transaction state");
        self.state = state;
    }

    fn drive(&mut self, payload: &Payload) -> Result<Outcome> {
        let ctx = self.ctx;
        let runner = ctx.runner();
        ctx.checkpoint()?;

        let store = ctx.store()?;
        let snapshots = store.list_snapshots()?;
        let base = select_base(&snapshots, self.options)?;
        let (_, default) = active_and_default(&snapshots)?;
        if base != default.id {
            warn!(
                "Snapshot {base} is not the default snapshot {}; changes made in between will not be part of the update",
                default.id
            );
        }

        ctx.checkpoint()?;
        let candidate = store
            .create(base, SnapshotTag::Created)
            .map_err(|err| UpdateError::SnapshotCreation {
                base,
                detail: format!("{err:#}"),
            })?;
        ctx.record_candidate(candidate);
        store.set_tag(candidate, SnapshotTag::Pending)?;

        let subvolume = ctx.config().snapshot_subvolume(candidate);
        if !volumes::subvolume_exists(runner, &subvolume)? {
            return Err(UpdateError::SubvolumeNotFound {
                snapshot: candidate,
                subvolume,
            }
            .into());
        }
        let device = volumes::root_device(runner)?;

        ctx.checkpoint()?;
        let staged = stage(runner, ctx.workspace(), &device, &subvolume)?;
        if !staged.is_complete() {
            warn!(
                "Staging was incomplete ({}); continuing",
                staged.failed_steps.join(", ")
            );
        }
        self.advance(TransactionState::Staged);

        let baseline = if self.options.skip_verify {
            None
        } else {
            Some(self.verify_phase(Phase::Pre)?)
        };
        self.advance(TransactionState::PreVerified);

        let mountpoint = ctx.workspace().mountpoint();
        if *payload == Payload::Upgrade {
            ctx.checkpoint()?;
            let dry_run = dist_upgrade_dry_run(runner, mountpoint)?;
            if dry_run.nothing_to_do() {
                info!("Nothing to do");
                ctx.cleanup()?;
                self.advance(TransactionState::Discarded);
                return Ok(Outcome::NothingToDo);
            }
            if dry_run.conflicts && !self.options.interactive {
                return Err(UpdateError::Discarded(
                    "the upgrade has conflicts that need manual resolution; rerun with --interactive"
                        .to_string(),
                )
                .into());
            }
            self.renderer.print_status(
                "ok",
                &format!("{} packages to change", dry_run.packages_to_change),
            );
        }

        ctx.checkpoint()?;
        self.advance(TransactionState::PayloadRunning);
        let mut command = payload.command(mountpoint, self.options.interactive);
        let status = runner.interactive(&mut command)?;
        if status != 0 {
            if !self.options.shell {
                return Err(UpdateError::PayloadFailed {
                    command: payload.describe(),
                    status,
                }
                .into());
            }
            warn!(
                "{} returned exit code {status}; the shell decides whether to continue",
                payload.describe()
            );
        }

        if self.options.shell {
            ctx.checkpoint()?;
            let mut shell = Command::new("chroot");
            shell.arg(mountpoint).arg("bash");
            info!("Opening a shell in the staged snapshot; exit non-zero to discard it");
            let shell_status = runner.interactive(&mut shell)?;
            if shell_status != 0 {
                return Err(UpdateError::Discarded(format!(
                    "shell exited with status {shell_status}"
                ))
                .into());
            }
        }

        if let Some(baseline) = baseline {
            ctx.checkpoint()?;
            let report = self.verify_phase(Phase::Post)?;
            let regressions = diff(&baseline, &report);
            if !regressions.is_empty() {
                return Err(UpdateError::Regression {
                    units: regressions.newly_failed_units.into_iter().collect(),
                    programs: regressions.newly_failed_programs.into_iter().collect(),
                }
                .into());
            }
        }
        self.advance(TransactionState::PostVerified);

        ctx.checkpoint()?;
        store.set_tag(candidate, SnapshotTag::Finished)?;
        store.promote(candidate)?;
        self.advance(TransactionState::Committed);
        info!("Snapshot {candidate} is the new default");

        ctx.cleanup()?;
        Ok(Outcome::Committed {
            snapshot: candidate,
            base,
            device,
        })
    }

    fn verify_phase(&self, phase: Phase) -> Result<atomic_update_core::VerificationReport> {
        let spinner = self
            .renderer
            .start_spinner(&format!("{}-update verification", phase.as_str()));
        match verify(self.ctx, phase) {
            Ok(report) => {
                spinner.finish_success();
                Ok(report)
            }
            Err(err) => {
                spinner.finish_abandon();
                Err(err)
            }
        }
    }
}

/// Reboots, applies live, or tells the operator how to switch over.
pub(crate) fn follow_up(
    runner: &dyn CommandRunner,
    config: &Config,
    outcome: &Outcome,
    options: &TransactionOptions,
    renderer: TerminalRenderer,
) -> Result<()> {
    if let Outcome::Committed {
        snapshot, device, ..
    } = outcome
    {
        if options.reboot {
            renderer.print_status("ok", &outcome_message(outcome, options));
            return reboot(runner);
        }
        if options.apply {
            apply_live(runner, config, *snapshot, device).map_err(|err| {
                UpdateError::LiveApply {
                    snapshot: *snapshot,
                    detail: format!("{err:#}"),
                }
            })?;
        }
    }
    renderer.print_status("ok", &outcome_message(outcome, options));
    Ok(())
}

pub(crate) fn outcome_message(outcome: &Outcome, options: &TransactionOptions) -> String {
    match outcome {
        Outcome::NothingToDo => "Nothing to do".to_string(),
        Outcome::Committed { snapshot, .. } if options.reboot => {
            format!("Rebooting into snapshot {snapshot}")
        }
        Outcome::Committed { snapshot, .. } if options.apply => {
            format!("Applied snapshot {snapshot} to the running system")
        }
        Outcome::Committed { snapshot, .. } => {
            format!("Reboot to switch into snapshot {snapshot}")
        }
    }
}
