use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use atomic_update_core::{
    describe_command, CommandRunner, RegressionDiff, UpdateError, VerificationReport,
};
use atomic_update_host::machines;
use tracing::{debug, info, warn};

use crate::{Phase, TransactionContext};

/// X11 programs that only understand the single-dash flag.
const SINGLE_DASH_VERSION: [&str; 2] = ["xterm", "xclock"];

/// A booted ephemeral container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    machine: String,
}

impl InstanceHandle {
    pub fn machine(&self) -> &str {
        &self.machine
    }
}

/// Starts the staged tree as an ephemeral container and waits for it to
/// register with the machine manager.
pub fn boot_isolated(ctx: &TransactionContext, phase: Phase) -> Result<InstanceHandle> {
    let runner = ctx.runner();
    let machine = ctx.workspace().machine_name(phase);
    machines::spawn_ephemeral(
        runner,
        &machine,
        ctx.workspace().mountpoint(),
        &ctx.config().masked_units,
    )
    .map_err(|err| UpdateError::BootTimeout {
        machine: machine.clone(),
        detail: format!("failed starting container: {err:#}"),
    })?;

    let registered = ctx.config().timeouts.discovery_policy().poll(|| {
        let listed = machines::list_machines(runner)?;
        Ok(listed
            .into_iter()
            .find(|record| record.machine.starts_with(&machine))
            .map(|record| record.machine))
    })?;

    match registered {
        Some(name) => {
            debug!(machine = %name, "container registered");
            Ok(InstanceHandle { machine: name })
        }
        None => Err(UpdateError::BootTimeout {
            machine,
            detail: "container never registered".to_string(),
        }
        .into()),
    }
}

/// Waits until the container's init system reports startup as finished.
/// On timeout the console is logged and the container stopped.
pub fn await_boot_completion(ctx: &TransactionContext, handle: &InstanceHandle) -> Result<()> {
    let runner = ctx.runner();
    let finished = ctx
        .config()
        .timeouts
        .boot_policy()
        .poll(|| Ok(machines::boot_finished(runner, handle.machine())?.then_some(())))?;
    if finished.is_some() {
        return Ok(());
    }

    match machines::console_output(runner, handle.machine()) {
        Ok(console) => warn!("Console of {}:\n{console}", handle.machine()),
        Err(err) => warn!("Could not read console of {}: {err:#}", handle.machine()),
    }
    if let Err(err) = stop(ctx, handle) {
        warn!("{err:#}");
    }
    Err(UpdateError::BootTimeout {
        machine: handle.machine.clone(),
        detail: "startup did not finish".to_string(),
    }
    .into())
}

/// Unit states from the booted container plus a program check run in the
/// static staged tree.
pub fn collect_report(
    ctx: &TransactionContext,
    handle: &InstanceHandle,
) -> Result<VerificationReport> {
    let runner = ctx.runner();
    let units = machines::list_units(runner, handle.machine()).map_err(|err| {
        UpdateError::BootTimeout {
            machine: handle.machine.clone(),
            detail: format!("failed listing units: {err:#}"),
        }
    })?;

    let mut report = VerificationReport::default();
    for unit in units {
        if unit.is_failed() {
            report.failed_units.insert(unit.unit.clone());
        }
        report.all_units.insert(unit.unit);
    }

    let mountpoint = ctx.workspace().mountpoint();
    let user = &ctx.config().unprivileged_user;
    for program in ctx.config().checked_programs() {
        if !program_present(runner, mountpoint, &program)? {
            debug!(program = %program, "not installed in staged tree, skipping");
            continue;
        }
        if !program_healthy(runner, mountpoint, user, &program)? {
            warn!("{program} fails to start in the staged tree");
            report.failed_programs.insert(program);
        }
    }

    info!(
        "{}: {} units, {} failed, {} failed programs",
        handle.machine(),
        report.all_units.len(),
        report.failed_units.len(),
        report.failed_programs.len()
    );
    Ok(report)
}

/// Stops the container. An unknown or already stopped machine is fine.
pub fn stop(ctx: &TransactionContext, handle: &InstanceHandle) -> Result<()> {
    let stopped = machines::terminate_machine(ctx.runner(), handle.machine())
        .with_context(|| format!("failed stopping {}", handle.machine()))?;
    if stopped {
        debug!(machine = %handle.machine(), "container stopped");
    }
    Ok(())
}

/// Full verification pass: boot, wait, survey, stop.
pub fn verify(ctx: &TransactionContext, phase: Phase) -> Result<VerificationReport> {
    let handle = boot_isolated(ctx, phase)?;
    let report = await_boot_completion(ctx, &handle).and_then(|()| collect_report(ctx, &handle));
    let stopped = stop(ctx, &handle);
    match (report, stopped) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), stopped) => {
            if let Err(stop_err) = stopped {
                warn!("{stop_err:#}");
            }
            Err(err)
        }
    }
}

pub fn diff(pre: &VerificationReport, post: &VerificationReport) -> RegressionDiff {
    post.regressions_since(pre)
}

fn program_present(runner: &dyn CommandRunner, root: &Path, program: &str) -> Result<bool> {
    let mut command = Command::new("chroot");
    command
        .arg(root)
        .arg("/bin/sh")
        .arg("-c")
        .arg("command -v \"$1\"")
        .arg("sh")
        .arg(program);
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    Ok(output.success())
}

fn program_healthy(
    runner: &dyn CommandRunner,
    root: &Path,
    user: &str,
    program: &str,
) -> Result<bool> {
    let flag = if SINGLE_DASH_VERSION.contains(&program) {
        "-version"
    } else {
        "--version"
    };
    let mut command = Command::new("chroot");
    command
        .arg(format!("--userspec={user}:{user}"))
        .arg(root)
        .arg(program)
        .arg(flag);
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    if !output.success() {
        debug!(program, status = output.status, detail = %output.combined(), "program check failed");
    }
    Ok(output.success())
}
