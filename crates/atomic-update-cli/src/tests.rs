use super::*;
use std::path::Path;
use std::sync::Arc;

use atomic_update_core::testing::{dry_run_xml, SimulatedHost, SIM_ROOT_DEVICE};
use atomic_update_core::{classify, command_line, Snapshot, Timeouts, UpdateError};
use atomic_update_stage::Phase;
use clap::CommandFactory;

use crate::preflight::{ensure_engine_unlocked, ensure_programs, ensure_root};
use crate::render::{format_elapsed, render_status_line, resolve_output_style, OutputStyle};
use crate::transaction::{outcome_message, select_base, Outcome};

fn test_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "atomic-update-cli-tests-{name}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn test_config(name: &str) -> Config {
    Config {
        tmp_dir: test_dir(name),
        timeouts: Timeouts {
            discovery_interval_ms: 0,
            discovery_attempts: 2,
            boot_interval_ms: 0,
            boot_deadline_secs: 0,
            unmount_interval_ms: 0,
        },
        ..Config::default()
    }
}

fn context(host: &Arc<SimulatedHost>, name: &str) -> TransactionContext {
    let config = test_config(name);
    let workspace = Workspace::acquire(&config).expect("must acquire workspace");
    TransactionContext::new(host.clone(), config, workspace)
}

fn plain() -> TerminalRenderer {
    TerminalRenderer::from_style(OutputStyle::Plain)
}

fn run_true() -> Payload {
    Payload::Run(vec!["true".to_string()])
}

fn assert_clean(host: &SimulatedHost, ctx: &TransactionContext) {
    let root = ctx.workspace().root().to_string_lossy().into_owned();
    assert!(
        host.unfinished_snapshots().is_empty(),
        "unfinished snapshots left: {:?}",
        host.unfinished_snapshots()
    );
    assert!(
        host.mounts_under(&root).is_empty(),
        "mounts left: {:?}",
        host.mounts_under(&root)
    );
    assert!(
        !host
            .machines()
            .iter()
            .any(|machine| ctx.workspace().owns_machine(machine)),
        "machines left: {:?}",
        host.machines()
    );
    assert!(!ctx.workspace().root().exists());
}

fn assert_no_stray_candidate(host: &SimulatedHost) {
    let default = host.default_snapshot();
    let stray = host
        .snapshots()
        .into_keys()
        .filter(|id| ![0, 1, 5].contains(id) && Some(*id) != default)
        .collect::<Vec<_>>();
    assert!(stray.is_empty(), "stray snapshots: {stray:?}");
}

fn snapshot(id: u32, active: bool, default: bool) -> Snapshot {
    Snapshot {
        id,
        base: None,
        read_write: false,
        tag: None,
        is_default: default,
        is_active: active,
        description: String::new(),
    }
}

#[test]
fn run_true_commits_new_default_and_keeps_base() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = context(&host, "run-true");
    let options = TransactionOptions::default();

    let outcome = execute(&ctx, &run_true(), &options, plain()).expect("must commit");
    assert_eq!(
        outcome,
        Outcome::Committed {
            snapshot: 6,
            base: 5,
            device: SIM_ROOT_DEVICE.to_string(),
        }
    );
    assert_eq!(host.default_snapshot(), Some(6));
    assert_eq!(host.snapshot_tag(6).as_deref(), Some("finished"));
    assert!(host.snapshots().contains_key(&5));
    assert_eq!(host.snapshot_tag(5), None);
    assert_clean(&host, &ctx);

    let calls = host.calls();
    let mountpoint = ctx.workspace().mountpoint().display().to_string();
    assert!(calls.contains(&format!("chroot {mountpoint} bash -c true")));
    for phase in [Phase::Pre, Phase::Post] {
        let machine = ctx.workspace().machine_name(phase);
        assert!(
            calls
                .iter()
                .any(|call| call.starts_with(&format!("systemd-run --unit {machine} "))),
            "{machine} was never booted"
        );
    }
    assert_eq!(
        outcome_message(&outcome, &options),
        "Reboot to switch into snapshot 6"
    );
}

#[test]
fn upgrade_with_nothing_to_do_keeps_default() {
    let host = Arc::new(SimulatedHost::new());
    host.set_dry_run(&dry_run_xml(0), 0);
    let ctx = context(&host, "nothing-to-do");

    let outcome = execute(
        &ctx,
        &Payload::Upgrade,
        &TransactionOptions::default(),
        plain(),
    )
    .expect("nothing to do is success");
    assert_eq!(outcome, Outcome::NothingToDo);
    assert_eq!(host.default_snapshot(), Some(5));
    assert!(!host.snapshots().contains_key(&6));
    assert!(!host
        .calls()
        .iter()
        .any(|call| call.starts_with("zypper") && !call.contains("--dry-run")));
    assert_clean(&host, &ctx);
}

#[test]
fn upgrade_runs_non_interactive_package_manager() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = context(&host, "upgrade");

    execute(
        &ctx,
        &Payload::Upgrade,
        &TransactionOptions::default(),
        plain(),
    )
    .expect("must commit");
    let mountpoint = ctx.workspace().mountpoint().display().to_string();
    assert!(host.calls().contains(&format!(
        "zypper --root {mountpoint} --non-interactive --no-cd dist-upgrade"
    )));
    assert_eq!(host.default_snapshot(), Some(6));
}

#[test]
fn base_defaults_to_active_snapshot_and_warns_about_default() {
    let host = Arc::new(SimulatedHost::with_snapshots(&[
        (5, true, false),
        (7, false, true),
    ]));
    let ctx = context(&host, "base-active");

    let outcome = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect("must commit");
    assert!(matches!(outcome, Outcome::Committed { snapshot: 8, base: 5, .. }));
    assert!(host
        .calls()
        .iter()
        .any(|call| call.contains(" create ") && call.contains("--from 5")));
}

#[test]
fn select_base_follows_continue_and_apply() {
    let snapshots = vec![
        snapshot(1, false, false),
        snapshot(5, true, false),
        snapshot(7, false, true),
    ];

    let default = TransactionOptions::default();
    assert_eq!(select_base(&snapshots, &default).expect("base"), 5);

    let apply = TransactionOptions {
        apply: true,
        ..TransactionOptions::default()
    };
    assert_eq!(select_base(&snapshots, &apply).expect("base"), 7);

    let resume = TransactionOptions {
        continue_from: Some(None),
        ..TransactionOptions::default()
    };
    assert_eq!(select_base(&snapshots, &resume).expect("base"), 7);

    let explicit = TransactionOptions {
        continue_from: Some(Some(1)),
        apply: true,
        ..TransactionOptions::default()
    };
    assert_eq!(select_base(&snapshots, &explicit).expect("base"), 1);

    let unknown = TransactionOptions {
        continue_from: Some(Some(42)),
        ..TransactionOptions::default()
    };
    let err = select_base(&snapshots, &unknown).expect_err("unknown snapshot");
    assert_eq!(exit_code_for(&err), 1);
}

#[test]
fn unknown_continuation_target_creates_nothing() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = context(&host, "unknown-base");
    let options = TransactionOptions {
        continue_from: Some(Some(42)),
        ..TransactionOptions::default()
    };

    let err = execute(&ctx, &run_true(), &options, plain()).expect_err("must fail");
    assert!(matches!(classify(&err), Some(UpdateError::UnknownSnapshot(42))));
    assert!(!host.calls().iter().any(|call| call.contains(" create ")));
    assert_clean(&host, &ctx);
}

#[test]
fn failed_unit_after_payload_discards_candidate() {
    let host = Arc::new(SimulatedHost::new());
    host.set_units(
        "post",
        &[
            ("sshd.service", "failed"),
            ("dbus.service", "active"),
            ("systemd-journald.service", "active"),
            ("brand-new.service", "failed"),
        ],
    );
    let ctx = context(&host, "unit-regression");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("regression must discard");
    assert_eq!(exit_code_for(&err), 9);
    match classify(&err) {
        Some(UpdateError::Regression { units, programs }) => {
            assert_eq!(units, &vec!["sshd.service".to_string()]);
            assert!(programs.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(host.default_snapshot(), Some(5));
    assert!(!host.snapshots().contains_key(&6));
    assert_clean(&host, &ctx);
}

#[test]
fn broken_program_after_payload_discards_candidate() {
    let host = Arc::new(SimulatedHost::new());
    host.set_present_programs(&["bash", "zypper"]);
    host.set_failing_programs(&[], &["bash"]);
    let ctx = context(&host, "program-regression");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("regression must discard");
    assert!(err.to_string().contains("programs: [bash]"));
    assert_eq!(host.default_snapshot(), Some(5));
    assert_clean(&host, &ctx);
}

#[test]
fn payload_failure_discards_without_post_verification() {
    let host = Arc::new(SimulatedHost::new());
    host.set_command_status(3);
    let ctx = context(&host, "payload-failure");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("payload failure");
    assert_eq!(exit_code_for(&err), 9);
    assert!(err.to_string().contains("true returned exit code 3"));
    let post = ctx.workspace().machine_name(Phase::Post);
    assert!(!host.calls().iter().any(|call| call.contains(&post)));
    assert!(!host.snapshots().contains_key(&6));
    assert_clean(&host, &ctx);
}

#[test]
fn shell_exit_status_overrides_payload_failure() {
    let host = Arc::new(SimulatedHost::new());
    host.set_command_status(3);
    host.set_shell_status(0);
    let ctx = context(&host, "shell-fixes");
    let options = TransactionOptions {
        shell: true,
        ..TransactionOptions::default()
    };

    execute(&ctx, &run_true(), &options, plain()).expect("shell accepted the snapshot");
    assert_eq!(host.default_snapshot(), Some(6));
    let mountpoint = ctx.workspace().mountpoint().display().to_string();
    assert!(host.calls().contains(&format!("chroot {mountpoint} bash")));
    assert_clean(&host, &ctx);
}

#[test]
fn failing_shell_discards_successful_payload() {
    let host = Arc::new(SimulatedHost::new());
    host.set_shell_status(1);
    let ctx = context(&host, "shell-rejects");
    let options = TransactionOptions {
        shell: true,
        ..TransactionOptions::default()
    };

    let err = execute(&ctx, &run_true(), &options, plain()).expect_err("shell rejected");
    assert!(matches!(classify(&err), Some(UpdateError::Discarded(_))));
    assert_eq!(host.default_snapshot(), Some(5));
    assert_clean(&host, &ctx);
}

#[test]
fn conflicts_discard_unless_interactive() {
    let conflict = "<?xml version='1.0'?>\n<stream>\n<prompt id=\"1\"><text>Problem: nothing provides libfoo</text></prompt>\n</stream>\n";

    let host = Arc::new(SimulatedHost::new());
    host.set_dry_run(conflict, 4);
    let ctx = context(&host, "conflicts");
    let err = execute(
        &ctx,
        &Payload::Upgrade,
        &TransactionOptions::default(),
        plain(),
    )
    .expect_err("conflicts discard");
    assert!(matches!(classify(&err), Some(UpdateError::Discarded(_))));
    assert_clean(&host, &ctx);

    let host = Arc::new(SimulatedHost::new());
    host.set_dry_run(conflict, 4);
    let ctx = context(&host, "conflicts-interactive");
    let options = TransactionOptions {
        interactive: true,
        ..TransactionOptions::default()
    };
    execute(&ctx, &Payload::Upgrade, &options, plain()).expect("operator resolves conflicts");
    let mountpoint = ctx.workspace().mountpoint().display().to_string();
    assert!(host
        .calls()
        .contains(&format!("zypper --root {mountpoint} --no-cd dist-upgrade")));
    assert_eq!(host.default_snapshot(), Some(6));
}

#[test]
fn invisible_subvolume_is_classified_and_candidate_removed() {
    let host = Arc::new(SimulatedHost::new());
    host.hide_new_subvolumes();
    let ctx = context(&host, "hidden");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("subvolume missing");
    assert_eq!(exit_code_for(&err), 7);
    assert!(!host.snapshots().contains_key(&6));
    assert_clean(&host, &ctx);
}

#[test]
fn snapshot_creation_failure_is_classified() {
    let host = Arc::new(SimulatedHost::new());
    host.fail_when_contains(" create ");
    let ctx = context(&host, "create-fails");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("creation fails");
    assert_eq!(exit_code_for(&err), 6);
    assert_clean(&host, &ctx);
}

#[test]
fn unreachable_store_is_classified() {
    let host = Arc::new(SimulatedHost::new());
    host.set_store_unavailable(true);
    let ctx = context(&host, "store-down");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("store down");
    assert_eq!(exit_code_for(&err), 10);
    assert!(!ctx.workspace().root().exists());
}

#[test]
fn boot_timeout_discards_candidate() {
    let host = Arc::new(SimulatedHost::new());
    host.set_machines_register(false);
    let ctx = context(&host, "boot-timeout");

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("boot never registers");
    assert!(matches!(classify(&err), Some(UpdateError::BootTimeout { .. })));
    assert!(!host.snapshots().contains_key(&6));
    assert_clean(&host, &ctx);
}

#[test]
fn skipping_verification_boots_nothing() {
    let host = Arc::new(SimulatedHost::new());
    host.set_machines_register(false);
    let ctx = context(&host, "no-verify");
    let options = TransactionOptions {
        skip_verify: true,
        ..TransactionOptions::default()
    };

    execute(&ctx, &run_true(), &options, plain()).expect("must commit");
    assert!(!host.calls().iter().any(|call| call.starts_with("systemd-run")));
    assert_eq!(host.default_snapshot(), Some(6));
    assert_clean(&host, &ctx);
}

#[test]
fn interrupted_context_stops_before_creating_anything() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = context(&host, "pre-interrupted");
    ctx.mark_interrupted();

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("interrupted");
    assert_eq!(exit_code_for(&err), 130);
    assert!(!host.calls().iter().any(|call| call.contains(" create ")));
    assert!(ctx.workspace().root().exists(), "teardown belongs to the handler");

    ctx.interrupt().expect("handler teardown");
    assert_clean(&host, &ctx);
}

#[test]
fn interrupt_after_any_step_discards_the_transaction() {
    let reference = Arc::new(SimulatedHost::new());
    let reference_ctx = context(&reference, "interrupt-reference");
    execute(&reference_ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect("uninterrupted run commits");
    let total = reference.call_count();
    let _ = std::fs::remove_dir_all(&reference_ctx.config().tmp_dir);

    for step in 1..=total {
        let host = Arc::new(SimulatedHost::new());
        let ctx = Arc::new(context(&host, "interrupt-step"));
        let handle = Arc::downgrade(&ctx);
        host.after_calls(step, move || {
            if let Some(ctx) = handle.upgrade() {
                ctx.mark_interrupted();
            }
        });

        let result = execute(&ctx, &run_true(), &TransactionOptions::default(), plain());
        ctx.interrupt()
            .unwrap_or_else(|err| panic!("teardown after step {step} failed: {err:#}"));

        assert_clean(&host, &ctx);
        assert_no_stray_candidate(&host);
        if result.is_err() {
            assert_eq!(host.default_snapshot(), Some(5), "after step {step}");
        }
        let _ = std::fs::remove_dir_all(&ctx.config().tmp_dir);
    }
}

#[test]
fn interrupt_between_finishing_and_promoting_deletes_candidate() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = Arc::new(context(&host, "interrupt-before-promote"));
    let handle = Arc::downgrade(&ctx);
    host.after_call_containing("atomic-update=finished", move || {
        if let Some(ctx) = handle.upgrade() {
            ctx.mark_interrupted();
        }
    });

    let err = execute(&ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect_err("promotion must be refused");
    assert_eq!(exit_code_for(&err), 130);
    assert!(!host.calls().iter().any(|call| call.contains("--default")));
    assert_eq!(host.snapshot_tag(6).as_deref(), Some("finished"));

    ctx.interrupt().expect("handler teardown");
    assert!(!host.snapshots().contains_key(&6));
    assert_eq!(host.default_snapshot(), Some(5));
    assert_clean(&host, &ctx);
}

#[test]
fn host_failure_at_any_point_is_recoverable_by_cleanup() {
    let reference = Arc::new(SimulatedHost::new());
    let reference_ctx = context(&reference, "halt-reference");
    execute(&reference_ctx, &run_true(), &TransactionOptions::default(), plain())
        .expect("uninterrupted run commits");
    let total = reference.call_count();
    let _ = std::fs::remove_dir_all(&reference_ctx.config().tmp_dir);

    for halt_at in 0..=total {
        let host = Arc::new(SimulatedHost::new());
        let ctx = context(&host, "halt");
        host.halt_after(halt_at);

        let _ = execute(&ctx, &run_true(), &TransactionOptions::default(), plain());
        host.resume();
        ctx.cleanup()
            .unwrap_or_else(|err| panic!("cleanup after halt at {halt_at} failed: {err:#}"));

        assert_clean(&host, &ctx);
        let _ = std::fs::remove_dir_all(&ctx.config().tmp_dir);
    }
}

#[test]
fn follow_up_reboots_or_applies_on_request() {
    let outcome = Outcome::Committed {
        snapshot: 5,
        base: 1,
        device: SIM_ROOT_DEVICE.to_string(),
    };
    let config = test_config("follow-up");

    let host = SimulatedHost::new();
    follow_up(&host, &config, &outcome, &TransactionOptions::default(), plain())
        .expect("reminder only");
    assert!(host.calls().is_empty());

    let reboot = TransactionOptions {
        reboot: true,
        ..TransactionOptions::default()
    };
    follow_up(&host, &config, &outcome, &reboot, plain()).expect("must reboot");
    assert_eq!(host.calls(), vec!["systemctl reboot".to_string()]);
    assert_eq!(outcome_message(&outcome, &reboot), "Rebooting into snapshot 5");

    let host = SimulatedHost::new();
    let apply = TransactionOptions {
        apply: true,
        ..TransactionOptions::default()
    };
    follow_up(&host, &config, &outcome, &apply, plain()).expect("must apply");
    assert!(host.calls().contains(&"systemctl daemon-reexec".to_string()));

    follow_up(&host, &config, &Outcome::NothingToDo, &apply, plain()).expect("nothing");
    assert_eq!(
        outcome_message(&Outcome::NothingToDo, &apply),
        "Nothing to do"
    );
    let _ = std::fs::remove_dir_all(&config.tmp_dir);
}

#[test]
fn failed_live_apply_has_its_own_exit_code() {
    let outcome = Outcome::Committed {
        snapshot: 5,
        base: 1,
        device: SIM_ROOT_DEVICE.to_string(),
    };
    let config = test_config("apply-fails");
    let host = SimulatedHost::new();
    host.fail_when_contains("--bind");
    let apply = TransactionOptions {
        apply: true,
        ..TransactionOptions::default()
    };

    let err = follow_up(&host, &config, &outcome, &apply, plain()).expect_err("apply fails");
    assert_eq!(exit_code_for(&err), 12);
    assert!(matches!(
        classify(&err),
        Some(UpdateError::LiveApply { snapshot: 5, .. })
    ));
    assert_eq!(host.default_snapshot(), Some(5));
    let _ = std::fs::remove_dir_all(&config.tmp_dir);
}

#[test]
fn run_payload_keeps_argument_boundaries() {
    let root = Path::new("/tmp/atomic-update_x/rootfs");

    let payload = Payload::Run(vec!["touch".to_string(), "/a b".to_string()]);
    assert_eq!(
        command_line(&payload.command(root, false)),
        vec![
            "chroot",
            "/tmp/atomic-update_x/rootfs",
            "bash",
            "-c",
            "\"$@\"",
            "bash",
            "touch",
            "/a b",
        ]
    );

    let script = Payload::Run(vec!["zypper refresh && zypper patch".to_string()]);
    assert_eq!(
        command_line(&script.command(root, false)),
        vec![
            "chroot",
            "/tmp/atomic-update_x/rootfs",
            "bash",
            "-c",
            "zypper refresh && zypper patch",
        ]
    );
}

#[test]
fn run_with_several_arguments_commits() {
    let host = Arc::new(SimulatedHost::new());
    let ctx = context(&host, "run-argv");
    let payload = Payload::Run(vec!["touch".to_string(), "/a b".to_string()]);

    execute(&ctx, &payload, &TransactionOptions::default(), plain()).expect("must commit");
    let mountpoint = ctx.workspace().mountpoint().display().to_string();
    assert!(host
        .calls()
        .contains(&format!("chroot {mountpoint} bash -c \"$@\" bash touch /a b")));
    assert_eq!(host.default_snapshot(), Some(6));
    assert_clean(&host, &ctx);
}

#[test]
fn preflight_reports_distinct_failures() {
    let err = ensure_root(false).expect_err("not root");
    assert_eq!(exit_code_for(&err), 2);
    ensure_root(true).expect("root passes");

    let err = ensure_programs(&["snapper", "zypper"], |program| program != "zypper")
        .expect_err("zypper missing");
    assert_eq!(exit_code_for(&err), 3);
    assert!(err.to_string().contains("'zypper'"));
    ensure_programs(&["snapper"], |_| true).expect("all present");

    let dir = test_dir("preflight");
    let proc_root = dir.join("proc");
    std::fs::create_dir_all(proc_root.join("77")).expect("must create proc entry");
    std::fs::write(proc_root.join("77").join("comm"), "packagekitd\n").expect("must write comm");
    let lock_file = dir.join("zypp.pid");
    ensure_engine_unlocked(&lock_file, &proc_root).expect("no lock file");
    std::fs::write(&lock_file, "77\n").expect("must write lock");
    let err = ensure_engine_unlocked(&lock_file, &proc_root).expect_err("locked");
    assert_eq!(exit_code_for(&err), 4);
    assert!(err.to_string().contains("pid 77 (packagekitd)"));
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
    assert!(Cli::command()
        .render_version()
        .starts_with("atomic-update v"));
}

#[test]
fn cli_parses_continue_with_and_without_value() {
    let cli = Cli::try_parse_from(["atomic-update", "--continue", "run", "true"])
        .expect("must parse");
    assert_eq!(cli.continue_from, Some(None));

    let cli = Cli::try_parse_from(["atomic-update", "--continue=3", "dup"]).expect("must parse");
    assert_eq!(cli.continue_from, Some(Some(3)));
    assert_eq!(cli.command, Commands::Upgrade);

    let cli = Cli::try_parse_from(["atomic-update", "upgrade"]).expect("must parse");
    assert_eq!(cli.continue_from, None);
}

#[test]
fn cli_run_keeps_command_arguments_verbatim() {
    let cli = Cli::try_parse_from(["atomic-update", "run", "--shell", "ls", "-la", "--color"])
        .expect("must parse");
    assert!(cli.shell);
    assert_eq!(
        cli.command,
        Commands::Run {
            command: vec!["ls".to_string(), "-la".to_string(), "--color".to_string()],
        }
    );

    let err = Cli::try_parse_from(["atomic-update", "run"]).expect_err("command required");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn cli_rejects_reboot_with_apply_and_reports_version() {
    let err = Cli::try_parse_from(["atomic-update", "--reboot", "--apply", "upgrade"])
        .expect_err("conflicting follow-ups");
    assert_eq!(err.kind(), ErrorKind::ArgumentConflict);

    let err = Cli::try_parse_from(["atomic-update", "--version"]).expect_err("version exits");
    assert_eq!(err.kind(), ErrorKind::DisplayVersion);

    let cli = Cli::try_parse_from(["atomic-update", "rollback", "4", "--no-verify"])
        .expect("must parse");
    assert_eq!(cli.command, Commands::Rollback { snapshot: Some(4) });
    assert!(cli.transaction_options().skip_verify);
}

#[test]
fn status_lines_follow_output_style() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "Reboot to switch into snapshot 6"),
        "Reboot to switch into snapshot 6"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "staging incomplete"),
        "[WARN] staging incomplete"
    );
    assert_eq!(
        format_elapsed(std::time::Duration::from_millis(2_045)),
        "2.045s"
    );
}
