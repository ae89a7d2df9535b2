//! In-memory stand-in for the host's external collaborators, driven through
//! [`CommandRunner`]. It understands exactly the command shapes issued by the
//! adapters and keeps enough state (snapshots, subvolumes, mounts, machines,
//! unit states, package engine answers) to check cleanup invariants without
//! root privileges.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::{command_line, CommandOutput, CommandRunner};

pub const SIM_ROOT_DEVICE: &str = "/dev/vda2";
pub const SIM_ESP_DEVICE: &str = "/dev/vda1";
pub const SIM_CONFIG: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSnapshot {
    pub is_default: bool,
    pub is_active: bool,
    pub description: String,
    pub userdata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMount {
    pub target: String,
    pub source: String,
    pub fstype: String,
}

#[derive(Debug)]
struct HostState {
    configs: Vec<(String, String)>,
    snapshots: BTreeMap<u32, SimSnapshot>,
    subvolumes: Vec<String>,
    mounts: Vec<SimMount>,
    machines: BTreeSet<String>,
    units: BTreeMap<String, Vec<(String, String)>>,
    present_programs: BTreeSet<String>,
    failing_programs_before: BTreeSet<String>,
    failing_programs_after: BTreeSet<String>,
    payload_ran: bool,
    dry_run_xml: String,
    dry_run_status: i32,
    upgrade_status: i32,
    command_status: i32,
    shell_status: i32,
    machines_register: bool,
    boot_finishes: bool,
    hide_new_subvolumes: bool,
    store_unavailable: bool,
    failures: Vec<String>,
    halt_after: Option<usize>,
    calls: Vec<String>,
}

/// Simulated host. Every method takes `&self` so the host can be shared
/// behind an `Arc<dyn CommandRunner>` while tests keep a handle to inspect it.
#[derive(Debug)]
pub struct SimulatedHost {
    state: Mutex<HostState>,
    hook: Mutex<Option<CallHook>>,
}

/// Action run once, right after the first command matching `trigger`
/// completes.
struct CallHook {
    trigger: HookTrigger,
    action: Arc<dyn Fn() + Send + Sync>,
}

#[derive(Debug)]
enum HookTrigger {
    Position(usize),
    Containing(String),
}

impl fmt::Debug for CallHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHook")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Snapshot 5 is both active and default; 1 is an older snapshot.
    pub fn new() -> Self {
        Self::with_snapshots(&[(1, false, false), (5, true, true)])
    }

    /// `(id, active, default)` triples.
    pub fn with_snapshots(snapshots: &[(u32, bool, bool)]) -> Self {
        let mut subvolumes = vec![
            "@".to_string(),
            "@/.snapshots".to_string(),
            "@/home".to_string(),
            "@/usr/local".to_string(),
            "@/var".to_string(),
            "@/boot/grub2/x86_64-efi".to_string(),
        ];
        let mut table = BTreeMap::new();
        table.insert(
            0,
            SimSnapshot {
                is_default: false,
                is_active: false,
                description: "current".to_string(),
                userdata: BTreeMap::new(),
            },
        );
        let mut active = 0;
        for &(id, is_active, is_default) in snapshots {
            table.insert(
                id,
                SimSnapshot {
                    is_default,
                    is_active,
                    description: format!("snapshot {id}"),
                    userdata: BTreeMap::new(),
                },
            );
            subvolumes.push(format!("@/.snapshots/{id}/snapshot"));
            if is_active {
                active = id;
            }
        }

        let mounts = vec![
            SimMount {
                target: "/".to_string(),
                source: format!("{SIM_ROOT_DEVICE}[/@/.snapshots/{active}/snapshot]"),
                fstype: "btrfs".to_string(),
            },
            SimMount {
                target: "/proc".to_string(),
                source: "proc".to_string(),
                fstype: "proc".to_string(),
            },
            SimMount {
                target: "/home".to_string(),
                source: format!("{SIM_ROOT_DEVICE}[/@/home]"),
                fstype: "btrfs".to_string(),
            },
            SimMount {
                target: "/boot/efi".to_string(),
                source: SIM_ESP_DEVICE.to_string(),
                fstype: "vfat".to_string(),
            },
        ];

        let units = vec![
            ("sshd.service".to_string(), "active".to_string()),
            ("dbus.service".to_string(), "active".to_string()),
            ("systemd-journald.service".to_string(), "active".to_string()),
        ];

        Self {
            state: Mutex::new(HostState {
                configs: vec![(SIM_CONFIG.to_string(), "/".to_string())],
                snapshots: table,
                subvolumes,
                mounts,
                machines: BTreeSet::new(),
                units: BTreeMap::from([("default".to_string(), units)]),
                present_programs: BTreeSet::new(),
                failing_programs_before: BTreeSet::new(),
                failing_programs_after: BTreeSet::new(),
                payload_ran: false,
                dry_run_xml: dry_run_xml(3),
                dry_run_status: 0,
                upgrade_status: 0,
                command_status: 0,
                shell_status: 0,
                machines_register: true,
                boot_finishes: true,
                hide_new_subvolumes: false,
                store_unavailable: false,
                failures: Vec::new(),
                halt_after: None,
                calls: Vec::new(),
            }),
            hook: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_configs(&self, configs: &[(&str, &str)]) {
        self.lock().configs = configs
            .iter()
            .map(|(name, subvolume)| (name.to_string(), subvolume.to_string()))
            .collect();
    }

    /// Units reported by machines whose name ends with `-<phase>`; `default`
    /// applies to every phase without its own entry.
    pub fn set_units(&self, phase: &str, units: &[(&str, &str)]) {
        self.lock().units.insert(
            phase.to_string(),
            units
                .iter()
                .map(|(unit, state)| (unit.to_string(), state.to_string()))
                .collect(),
        );
    }

    pub fn set_present_programs(&self, programs: &[&str]) {
        self.lock().present_programs = programs.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_failing_programs(&self, before_payload: &[&str], after_payload: &[&str]) {
        let mut state = self.lock();
        state.failing_programs_before = before_payload.iter().map(|p| p.to_string()).collect();
        state.failing_programs_after = after_payload.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_dry_run(&self, xml: &str, status: i32) {
        let mut state = self.lock();
        state.dry_run_xml = xml.to_string();
        state.dry_run_status = status;
    }

    pub fn set_upgrade_status(&self, status: i32) {
        self.lock().upgrade_status = status;
    }

    pub fn set_command_status(&self, status: i32) {
        self.lock().command_status = status;
    }

    pub fn set_shell_status(&self, status: i32) {
        self.lock().shell_status = status;
    }

    pub fn set_machines_register(&self, register: bool) {
        self.lock().machines_register = register;
    }

    pub fn set_boot_finishes(&self, finishes: bool) {
        self.lock().boot_finishes = finishes;
    }

    pub fn hide_new_subvolumes(&self) {
        self.lock().hide_new_subvolumes = true;
    }

    pub fn set_store_unavailable(&self, unavailable: bool) {
        self.lock().store_unavailable = unavailable;
    }

    /// Any command whose rendered line contains `needle` exits with status 1.
    pub fn fail_when_contains(&self, needle: &str) {
        self.lock().failures.push(needle.to_string());
    }

    pub fn remove_mount(&self, target: &str) {
        self.lock().mounts.retain(|mount| mount.target != target);
    }

    /// After `calls` more commands every command errors, as if the process
    /// had been interrupted mid-flight.
    pub fn halt_after(&self, calls: usize) {
        let mut state = self.lock();
        state.halt_after = Some(state.calls.len() + calls);
    }

    pub fn resume(&self) {
        self.lock().halt_after = None;
    }

    /// Runs `action` once, right after the `calls`-th command from now has
    /// completed and before its output is returned to the caller.
    pub fn after_calls<F>(&self, calls: usize, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let position = self.lock().calls.len() + calls;
        self.set_hook(HookTrigger::Position(position), action);
    }

    /// Runs `action` once, right after the first command whose rendered
    /// line contains `needle` has completed.
    pub fn after_call_containing<F>(&self, needle: &str, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set_hook(HookTrigger::Containing(needle.to_string()), action);
    }

    fn set_hook<F>(&self, trigger: HookTrigger, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(CallHook {
            trigger,
            action: Arc::new(action),
        });
    }

    fn fire_hook(&self, rendered: &str) {
        let calls = self.call_count();
        let mut hook = self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = match hook.as_ref().map(|pending| &pending.trigger) {
            Some(HookTrigger::Position(position)) => *position == calls,
            Some(HookTrigger::Containing(needle)) => rendered.contains(needle.as_str()),
            None => false,
        };
        if !due {
            return;
        }
        if let Some(fired) = hook.take() {
            drop(hook);
            (fired.action)();
        }
    }

    /// Marks snapshot `id` with a lifecycle tag directly in the store.
    pub fn seed_tagged_snapshot(&self, id: u32, tag: &str) {
        let mut state = self.lock();
        let mut userdata = BTreeMap::new();
        userdata.insert("atomic-update".to_string(), tag.to_string());
        state.snapshots.insert(
            id,
            SimSnapshot {
                is_default: false,
                is_active: false,
                description: format!("Atomic update seeded #{id}"),
                userdata,
            },
        );
        state.subvolumes.push(format!("@/.snapshots/{id}/snapshot"));
    }

    pub fn seed_machine(&self, name: &str) {
        self.lock().machines.insert(name.to_string());
    }

    pub fn seed_mount(&self, target: &str) {
        self.lock().mounts.push(SimMount {
            target: target.to_string(),
            source: "tmpfs".to_string(),
            fstype: "tmpfs".to_string(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn snapshots(&self) -> BTreeMap<u32, SimSnapshot> {
        self.lock().snapshots.clone()
    }

    pub fn snapshot_tag(&self, id: u32) -> Option<String> {
        self.lock()
            .snapshots
            .get(&id)
            .and_then(|snapshot| snapshot.userdata.get("atomic-update").cloned())
    }

    pub fn default_snapshot(&self) -> Option<u32> {
        self.lock()
            .snapshots
            .iter()
            .find(|(_, snapshot)| snapshot.is_default)
            .map(|(id, _)| *id)
    }

    pub fn unfinished_snapshots(&self) -> Vec<u32> {
        self.lock()
            .snapshots
            .iter()
            .filter(|(_, snapshot)| {
                matches!(
                    snapshot.userdata.get("atomic-update").map(String::as_str),
                    Some("created" | "pending")
                )
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn mounts(&self) -> Vec<SimMount> {
        self.lock().mounts.clone()
    }

    pub fn mounts_under(&self, root: &str) -> Vec<String> {
        let prefix = format!("{}/", root.trim_end_matches('/'));
        self.lock()
            .mounts
            .iter()
            .filter(|mount| mount.target == root || mount.target.starts_with(&prefix))
            .map(|mount| mount.target.clone())
            .collect()
    }

    pub fn machines(&self) -> Vec<String> {
        self.lock().machines.iter().cloned().collect()
    }

    fn dispatch(&self, command: &Command) -> Result<CommandOutput> {
        let line = command_line(command);
        let rendered = line.join(" ");
        let mut state = self.lock();
        if let Some(limit) = state.halt_after {
            if state.calls.len() >= limit {
                return Err(anyhow!("simulated interrupt before: {rendered}"));
            }
        }
        state.calls.push(rendered.clone());

        if state
            .failures
            .iter()
            .any(|needle| rendered.contains(needle.as_str()))
        {
            return Ok(status(1, "", "simulated failure"));
        }

        let args = line.iter().skip(1).map(String::as_str).collect::<Vec<_>>();
        let output = match line[0].as_str() {
            "snapper" => state.snapper(&args),
            "btrfs" => state.btrfs(&args),
            "findmnt" => state.findmnt(),
            "mount" => state.mount(&args),
            "umount" => state.umount(&args),
            "chroot" => state.chroot(&args),
            "zypper" => state.zypper(&args),
            "systemd-run" => state.systemd_run(&args),
            "machinectl" => state.machinectl(&args),
            "systemd-analyze" => state.systemd_analyze(&args),
            "journalctl" => ok("[  OK  ] Reached target Basic System.\n"),
            "systemctl" => state.systemctl(&args),
            "systemd-tmpfiles" => ok(""),
            other => status(127, "", &format!("{other}: command not found")),
        };
        Ok(output)
    }
}

impl CommandRunner for SimulatedHost {
    fn output(&self, command: &mut Command) -> Result<CommandOutput> {
        let output = self.dispatch(command);
        self.fire_hook(&command_line(command).join(" "));
        output
    }

    fn interactive(&self, command: &mut Command) -> Result<i32> {
        Ok(self.output(command)?.status)
    }
}

impl HostState {
    fn snapper(&mut self, args: &[&str]) -> CommandOutput {
        if self.store_unavailable {
            return status(1, "", "Failure (error.something).");
        }

        let mut index = 0;
        let mut config = None;
        while index < args.len() && args[index].starts_with('-') {
            if args[index] == "-c" {
                config = args.get(index + 1).copied();
                index += 1;
            }
            index += 1;
        }
        let Some(subcommand) = args.get(index).copied() else {
            return status(64, "", "missing command");
        };
        let rest = &args[index + 1..];

        match subcommand {
            "list-configs" => {
                let configs = self
                    .configs
                    .iter()
                    .map(|(config, subvolume)| json!({"config": config, "subvolume": subvolume}))
                    .collect::<Vec<_>>();
                ok(&json!({ "configs": configs }).to_string())
            }
            "list" => {
                let config = config.unwrap_or(SIM_CONFIG);
                let entries = self
                    .snapshots
                    .iter()
                    .map(|(id, snapshot)| {
                        let userdata = if snapshot.userdata.is_empty() {
                            serde_json::Value::Null
                        } else {
                            json!(snapshot.userdata)
                        };
                        json!({
                            "subvolume": "/",
                            "number": id,
                            "default": snapshot.is_default,
                            "active": snapshot.is_active,
                            "description": snapshot.description,
                            "userdata": userdata,
                        })
                    })
                    .collect::<Vec<_>>();
                ok(&json!({ config: entries }).to_string())
            }
            "create" => self.snapper_create(rest),
            "modify" => self.snapper_modify(rest),
            "delete" => {
                let Some(id) = rest.last().and_then(|id| id.parse::<u32>().ok()) else {
                    return status(64, "", "missing snapshot number");
                };
                if self.snapshots.remove(&id).is_none() {
                    return status(1, "", &format!("Snapshot '{id}' not found."));
                }
                let subvolume = format!("@/.snapshots/{id}/snapshot");
                self.subvolumes.retain(|path| *path != subvolume);
                ok("")
            }
            "rollback" => {
                let target = rest.last().and_then(|id| id.parse::<u32>().ok());
                let target = target.or_else(|| {
                    self.snapshots
                        .iter()
                        .find(|(_, snapshot)| snapshot.is_active)
                        .map(|(id, _)| *id)
                });
                match target {
                    Some(id) if self.snapshots.contains_key(&id) => {
                        self.set_default(id);
                        ok(&format!("Setting default subvolume to snapshot {id}.\n"))
                    }
                    _ => status(1, "", "Snapshot not found."),
                }
            }
            _ => status(64, "", "unknown command"),
        }
    }

    fn snapper_create(&mut self, args: &[&str]) -> CommandOutput {
        let mut description = String::new();
        let mut userdata = BTreeMap::new();
        let mut index = 0;
        while index < args.len() {
            match args[index] {
                "-c" | "--from" => index += 1,
                "-d" => {
                    description = args.get(index + 1).unwrap_or(&"").to_string();
                    index += 1;
                }
                "-u" => {
                    merge_userdata(&mut userdata, args.get(index + 1).unwrap_or(&""));
                    index += 1;
                }
                _ => {}
            }
            index += 1;
        }

        let id = self.snapshots.keys().max().copied().unwrap_or(0) + 1;
        self.snapshots.insert(
            id,
            SimSnapshot {
                is_default: false,
                is_active: false,
                description,
                userdata,
            },
        );
        if !self.hide_new_subvolumes {
            self.subvolumes.push(format!("@/.snapshots/{id}/snapshot"));
        }
        ok(&format!("{id}\n"))
    }

    fn snapper_modify(&mut self, args: &[&str]) -> CommandOutput {
        let Some(id) = args.last().and_then(|id| id.parse::<u32>().ok()) else {
            return status(64, "", "missing snapshot number");
        };
        if !self.snapshots.contains_key(&id) {
            return status(1, "", &format!("Snapshot '{id}' not found."));
        }

        let mut index = 0;
        while index + 1 < args.len() {
            match args[index] {
                "-u" => {
                    if let Some(snapshot) = self.snapshots.get_mut(&id) {
                        merge_userdata(&mut snapshot.userdata, args[index + 1]);
                    }
                    index += 1;
                }
                "--default" => self.set_default(id),
                _ => {}
            }
            index += 1;
        }
        ok("")
    }

    fn set_default(&mut self, id: u32) {
        for (number, snapshot) in self.snapshots.iter_mut() {
            snapshot.is_default = *number == id;
        }
    }

    fn btrfs(&self, args: &[&str]) -> CommandOutput {
        if args.first() != Some(&"subvolume") || args.get(1) != Some(&"list") {
            return status(1, "", "unsupported btrfs invocation");
        }
        let lines = self
            .subvolumes
            .iter()
            .enumerate()
            .map(|(index, path)| format!("ID {} gen 100 top level 5 path {path}", 256 + index))
            .collect::<Vec<_>>();
        ok(&format!("{}\n", lines.join("\n")))
    }

    fn findmnt(&self) -> CommandOutput {
        let filesystems = self
            .mounts
            .iter()
            .map(|mount| {
                json!({"target": mount.target, "source": mount.source, "fstype": mount.fstype})
            })
            .collect::<Vec<_>>();
        ok(&json!({ "filesystems": filesystems }).to_string())
    }

    fn mount(&mut self, args: &[&str]) -> CommandOutput {
        match args {
            ["-o", options, device, target] => {
                let subvolume = options.strip_prefix("subvol=").unwrap_or(options);
                let subvolume = subvolume.trim_start_matches('/');
                if !self.subvolumes.iter().any(|path| path == subvolume) {
                    return status(32, "", "mount: wrong fs type, bad option, bad superblock");
                }
                self.push_mount(target, &format!("{device}[/{subvolume}]"), "btrfs");
                ok("")
            }
            ["--rbind", "--make-rslave", source, target] => {
                self.push_mount(target, source, "none");
                match *source {
                    "/dev" => self.push_mount(&format!("{target}/pts"), "devpts", "devpts"),
                    "/sys" => self.push_mount(&format!("{target}/fs/cgroup"), "cgroup2", "cgroup2"),
                    _ => {}
                }
                ok("")
            }
            ["--bind", "--make-slave", source, target] => {
                self.push_mount(target, source, "none");
                ok("")
            }
            _ => status(1, "", "unsupported mount invocation"),
        }
    }

    fn push_mount(&mut self, target: &str, source: &str, fstype: &str) {
        self.mounts.push(SimMount {
            target: target.to_string(),
            source: source.to_string(),
            fstype: fstype.to_string(),
        });
    }

    fn umount(&mut self, args: &[&str]) -> CommandOutput {
        let Some(target) = args.last().copied() else {
            return status(1, "", "umount: bad usage");
        };
        let nested_prefix = format!("{}/", target.trim_end_matches('/'));
        if self
            .mounts
            .iter()
            .any(|mount| mount.target.starts_with(&nested_prefix))
        {
            return status(32, "", &format!("umount: {target}: target is busy."));
        }
        match self.mounts.iter().rposition(|mount| mount.target == target) {
            Some(position) => {
                self.mounts.remove(position);
                ok("")
            }
            None => status(32, "", &format!("umount: {target}: not mounted.")),
        }
    }

    fn chroot(&mut self, args: &[&str]) -> CommandOutput {
        let args = match args.first() {
            Some(first) if first.starts_with("--userspec=") => &args[1..],
            _ => args,
        };
        if args.is_empty() {
            return status(125, "", "chroot: missing operand");
        }
        // args[0] is the new root.
        match &args[1..] {
            ["mount", "-a", ..] => ok(""),
            ["/bin/sh", "-c", _, "sh", program] => {
                if self.present_programs.contains(*program) {
                    ok(&format!("/usr/bin/{program}\n"))
                } else {
                    status(1, "", "")
                }
            }
            ["bash", "-c", _, ..] => {
                self.payload_ran = true;
                status(self.command_status, "", "")
            }
            ["bash"] => status(self.shell_status, "", ""),
            [program, "--version" | "-version"] => {
                let failing = if self.payload_ran {
                    &self.failing_programs_after
                } else {
                    &self.failing_programs_before
                };
                if failing.contains(*program) {
                    status(1, "", &format!("{program}: error while loading shared libraries"))
                } else {
                    ok(&format!("{program} 1.0\n"))
                }
            }
            _ => status(127, "", "chroot: unsupported invocation"),
        }
    }

    fn zypper(&mut self, args: &[&str]) -> CommandOutput {
        if args.contains(&"--dry-run") {
            return status(self.dry_run_status, &self.dry_run_xml.clone(), "");
        }
        self.payload_ran = true;
        status(self.upgrade_status, "", "")
    }

    fn systemd_run(&mut self, args: &[&str]) -> CommandOutput {
        let machine = args
            .iter()
            .position(|arg| *arg == "--machine")
            .and_then(|index| args.get(index + 1));
        match machine {
            Some(machine) => {
                if self.machines_register {
                    self.machines.insert(machine.to_string());
                }
                ok(&format!("Running as unit: {machine}.service\n"))
            }
            None => status(1, "", "missing --machine"),
        }
    }

    fn machinectl(&mut self, args: &[&str]) -> CommandOutput {
        match args {
            ["list", ..] => {
                let machines = self
                    .machines
                    .iter()
                    .map(|machine| {
                        json!({
                            "machine": machine,
                            "class": "container",
                            "service": "systemd-nspawn",
                            "os": "opensuse-tumbleweed",
                            "version": null,
                            "addresses": "-",
                        })
                    })
                    .collect::<Vec<_>>();
                ok(&serde_json::Value::Array(machines).to_string())
            }
            ["terminate", machine] => {
                if self.machines.remove(*machine) {
                    ok("")
                } else {
                    status(1, "", &format!("No machine '{machine}' known"))
                }
            }
            _ => status(1, "", "unsupported machinectl invocation"),
        }
    }

    fn systemd_analyze(&self, args: &[&str]) -> CommandOutput {
        let machine = args
            .iter()
            .position(|arg| *arg == "--machine")
            .and_then(|index| args.get(index + 1))
            .copied()
            .unwrap_or_default();
        if self.machines.contains(machine) && self.boot_finishes {
            ok("Startup finished in 1.204s (userspace)\nmulti-user.target reached after 1.1s in userspace.\n")
        } else {
            status(
                1,
                "",
                "Bootup is not yet finished (org.freedesktop.systemd1.Manager.FinishTimestampMonotonic=0).",
            )
        }
    }

    fn systemctl(&self, args: &[&str]) -> CommandOutput {
        match args {
            ["--machine", machine, "list-units", ..] => {
                if !self.machines.contains(*machine) {
                    return status(1, "", "Failed to connect to bus: Host is down");
                }
                let phase = machine.rsplit('-').next().unwrap_or_default();
                let units = self
                    .units
                    .get(phase)
                    .or_else(|| self.units.get("default"))
                    .cloned()
                    .unwrap_or_default();
                let records = units
                    .iter()
                    .map(|(unit, active)| {
                        json!({
                            "unit": unit,
                            "load": "loaded",
                            "active": active,
                            "sub": if active == "failed" { "failed" } else { "running" },
                            "description": unit,
                        })
                    })
                    .collect::<Vec<_>>();
                ok(&serde_json::Value::Array(records).to_string())
            }
            ["reboot"] | ["daemon-reexec"] => ok(""),
            _ => status(1, "", "unsupported systemctl invocation"),
        }
    }
}

/// Dry-run report announcing `packages` changes.
pub fn dry_run_xml(packages: u32) -> String {
    format!(
        "<?xml version='1.0'?>\n<stream>\n<message type=\"info\">Loading repository data...</message>\n<message type=\"info\">Computing distribution upgrade...</message>\n<install-summary download-size=\"1024\" space-usage-diff=\"2048\" packages-to-change=\"{packages}\">\n<to-upgrade>\n<solvable type=\"package\" name=\"kernel-default\" edition=\"6.9.1-1.1\"/>\n</to-upgrade>\n</install-summary>\n</stream>\n"
    )
}

fn merge_userdata(userdata: &mut BTreeMap<String, String>, raw: &str) {
    for pair in raw.split(',').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if value.is_empty() {
            userdata.remove(key);
        } else {
            userdata.insert(key.to_string(), value.to_string());
        }
    }
}

fn ok(stdout: &str) -> CommandOutput {
    status(0, stdout, "")
}

fn status(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        status: code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}
