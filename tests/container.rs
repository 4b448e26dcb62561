//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container handle behaviour against the in-memory runtime

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use nix::sys::wait::{waitpid, WaitStatus};
use tempfile::TempDir;

use lxcctl::runtime::MemoryRuntime;
use lxcctl::{
    AttachOptions, CloneOptions, ConsoleLogOptions, Container, EnvPolicy, Error, Lifecycle, MigrateCommand,
    MigrateFeatures, MigrateOptions, Operation, Runtime, Snapshot, State, TemplateOptions,
};

struct Fixture {
    dir: TempDir,
    memory: MemoryRuntime,
    runtime: Arc<dyn Runtime>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryRuntime::new(dir.path());
        let runtime: Arc<dyn Runtime> = Arc::new(memory.clone());
        Self { dir, memory, runtime }
    }

    fn handle(&self, name: &str) -> Container {
        Container::new(self.runtime.clone(), name, Some(self.dir.path())).unwrap()
    }

    fn created(&self, name: &str) -> Container {
        let c = self.handle(name);
        c.create(&TemplateOptions::new("busybox")).unwrap();
        c
    }

    fn running(&self, name: &str) -> Container {
        let c = self.created(name);
        c.start().unwrap();
        c
    }
}

#[test]
fn undefined_container_rejects_lifecycle_calls() {
    let fx = Fixture::new();
    let c = fx.handle("ghost");

    assert!(!c.defined());
    assert_eq!(c.lifecycle(), Lifecycle::Undefined);
    assert!(matches!(c.start(), Err(Error::NotDefined)));
    assert!(matches!(c.stop(), Err(Error::NotDefined)));
    assert!(matches!(c.destroy(), Err(Error::NotDefined)));
    assert!(matches!(c.freeze(), Err(Error::NotDefined)));
}

#[test]
fn create_start_stop() {
    let fx = Fixture::new();
    let c = fx.created("web");

    assert!(c.defined());
    assert_eq!(c.state(), State::Stopped);
    assert!(matches!(
        c.create(&TemplateOptions::new("busybox")),
        Err(Error::AlreadyDefined)
    ));
    assert!(matches!(c.stop(), Err(Error::NotRunning)));

    c.start().unwrap();
    assert!(c.running());
    assert_eq!(c.state(), State::Running);
    assert!(c.init_pid().is_some());
    assert!(matches!(c.start(), Err(Error::AlreadyRunning)));
    assert!(matches!(c.destroy(), Err(Error::AlreadyRunning)));

    c.stop().unwrap();
    assert_eq!(c.state(), State::Stopped);
    assert!(c.init_pid().is_none());

    c.destroy().unwrap();
    assert!(!c.defined());
}

#[test]
fn failed_create_carries_runtime_error() {
    let fx = Fixture::new();
    fx.memory.reject_template("broken");
    let c = fx.handle("web");

    match c.create(&TemplateOptions::new("broken")) {
        Err(Error::Failed { op, fault }) => {
            assert_eq!(op, Operation::Create);
            let fault = fault.unwrap();
            assert_eq!(fault.code, libc::EINVAL);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!c.defined());
}

#[test]
fn freeze_keeps_init_pid() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let pid = c.init_pid();

    assert!(matches!(c.unfreeze(), Err(Error::NotFrozen)));
    c.freeze().unwrap();
    assert_eq!(c.state(), State::Frozen);
    assert_eq!(c.lifecycle(), Lifecycle::Frozen);
    assert!(matches!(c.freeze(), Err(Error::AlreadyFrozen)));

    c.unfreeze().unwrap();
    assert_eq!(c.state(), State::Running);
    assert_eq!(c.init_pid(), pid);
}

#[test]
fn config_survives_save_and_reload() {
    let fx = Fixture::new();
    let c = fx.created("web");

    c.set_config_item("lxc.start.auto", "1").unwrap();
    c.save_config().unwrap();

    let other = fx.handle("web");
    assert_eq!(other.config_item("lxc.start.auto").unwrap().as_deref(), Some("1"));
    assert_eq!(other.config_item("lxc.uts.name").unwrap().as_deref(), Some("web"));

    other.clear_config_item("lxc.start.auto").unwrap();
    assert_eq!(other.config_item("lxc.start.auto").unwrap(), None);
    assert!(other.set_config_item("lxc.no.such.key", "x").is_err());
}

#[test]
fn config_file_export_and_import() {
    let fx = Fixture::new();
    let c = fx.created("web");
    c.set_config_item("lxc.environment", "A=1").unwrap();
    c.set_config_item("lxc.environment", "B=2").unwrap();

    let file = fx.dir.path().join("exported.conf");
    c.save_config_file(&file).unwrap();

    let other = fx.created("db");
    other.load_config_file(&file).unwrap();
    assert_eq!(
        other.config_item_values("lxc.environment").unwrap(),
        vec!["A=1".to_string(), "B=2".to_string()]
    );
}

#[test]
fn attach_reports_exit_codes() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let opts = AttachOptions::new();

    let status = c.run_command_status(&["sh", "-c", "exit 37"], &opts).unwrap();
    assert_eq!(status.code(), Some(37));
    assert!(c.run_command(&["true"], &opts).unwrap());
    assert!(!c.run_command(&["false"], &opts).unwrap());
}

#[test]
fn attach_failures() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let opts = AttachOptions::new();

    assert!(matches!(
        c.run_command_status(&["/no/such/program"], &opts),
        Err(Error::AttachFailed)
    ));
    // indistinguishable from a failed exec
    assert!(matches!(
        c.run_command_status(&["sh", "-c", "exit 255"], &opts),
        Err(Error::AttachFailed)
    ));
    assert!(matches!(
        c.run_command_status(&[] as &[&str], &opts),
        Err(Error::InsufficientArguments)
    ));

    c.stop().unwrap();
    assert!(matches!(
        c.run_command_status(&["true"], &opts),
        Err(Error::NotRunning)
    ));
}

#[test]
fn attach_environment() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let opts = AttachOptions::new().clear_env(true).env("GREETING", "hello");

    assert!(c
        .run_command(&["/bin/sh", "-c", "test \"$GREETING\" = hello && test -z \"$HOME\""], &opts)
        .unwrap());
}

/// Run `env` in the container with stdout captured, as a sorted set of
/// `KEY=VALUE` lines.
fn captured_env(c: &Container, dir: &Path, opts: AttachOptions) -> BTreeSet<String> {
    let path = dir.join("env.out");
    let out = File::create(&path).unwrap();
    let opts = opts.stdio(0, out.as_raw_fd(), 2);
    assert!(c.run_command(&["env"], &opts).unwrap());
    drop(out);
    fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn cleared_environment_keeps_only_listed_variables() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let path = std::env::var("PATH").unwrap();

    let opts = AttachOptions::new()
        .env_policy(EnvPolicy::Clear)
        .keep_env("PATH")
        .keep_env("LXCCTL_NOT_SET_ANYWHERE")
        .env("GREETING", "hello");
    let env = captured_env(&c, fx.dir.path(), opts);

    let expected: BTreeSet<String> = [format!("PATH={}", path), "GREETING=hello".to_string()]
        .into_iter()
        .collect();
    assert_eq!(env, expected);
}

#[test]
fn extra_variable_overrides_inherited_one() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let path = format!("{}:/lxcctl-extra", std::env::var("PATH").unwrap());

    let opts = AttachOptions::new().env_policy(EnvPolicy::Keep).env("PATH", path.clone());
    let env = captured_env(&c, fx.dir.path(), opts);

    let paths: Vec<_> = env.iter().filter(|line| line.starts_with("PATH=")).collect();
    assert_eq!(paths, vec![&format!("PATH={}", path)]);
    // the rest of the caller's environment is still there
    assert!(env.len() > 1);
}

#[test]
fn attach_without_waiting_returns_reapable_pid() {
    let fx = Fixture::new();
    let c = fx.running("web");

    let pid = c
        .run_command_no_wait(&["sh", "-c", "exit 4"], &AttachOptions::new())
        .unwrap();
    assert!(pid.as_raw() > 0);
    assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 4));

    c.stop().unwrap();
    assert!(matches!(
        c.run_command_no_wait(&["true"], &AttachOptions::new()),
        Err(Error::NotRunning)
    ));
}

#[test]
fn attach_shell_reads_the_given_stdin() {
    let fx = Fixture::new();
    let c = fx.running("web");

    let script = fx.dir.path().join("script.sh");
    fs::write(&script, "echo attached\nexit 7\n").unwrap();
    let stdin = File::open(&script).unwrap();
    let output = fx.dir.path().join("shell.out");
    let stdout = File::create(&output).unwrap();

    let opts = AttachOptions::new().stdio(stdin.as_raw_fd(), stdout.as_raw_fd(), 2);
    let status = c.attach_shell(&opts).unwrap();
    assert_eq!(status.code(), Some(7));
    assert_eq!(fs::read_to_string(&output).unwrap(), "attached\n");

    c.stop().unwrap();
    assert!(matches!(c.attach_shell(&opts), Err(Error::NotRunning)));
}

#[test]
fn execute_runs_application_container() {
    let fx = Fixture::new();
    let c = fx.handle("job");

    let output = c.execute(&["sh", "-c", "echo out; echo err >&2"]).unwrap();
    assert_eq!(output, b"out\nerr\n");
    assert!(!c.defined());

    match c.execute(&["false"]) {
        Err(Error::Failed { op, fault }) => {
            assert_eq!(op, Operation::Execute);
            assert_eq!(fault.unwrap().code, libc::EIO);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        c.execute(&[] as &[&str]),
        Err(Error::InsufficientArguments)
    ));

    let defined = fx.created("web");
    assert!(matches!(defined.execute(&["true"]), Err(Error::AlreadyDefined)));
}

#[test]
fn wait_returns_immediately_for_current_state() {
    let fx = Fixture::new();
    let c = fx.created("web");

    let started = Instant::now();
    assert!(c.wait(State::Stopped, Some(Duration::from_secs(5))));
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(!c.wait(State::Running, Some(Duration::from_millis(10))));
}

#[test]
fn wait_sees_other_handles() {
    let fx = Fixture::new();
    let c = Arc::new(fx.created("web"));

    let waiter = {
        let c = c.clone();
        thread::spawn(move || c.wait(State::Running, Some(Duration::from_secs(10))))
    };
    thread::sleep(Duration::from_millis(50));
    fx.handle("web").start().unwrap();

    assert!(waiter.join().unwrap());
}

#[test]
fn concurrent_starts_run_once() {
    let fx = Fixture::new();
    let c = Arc::new(fx.created("web"));

    let results: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            thread::spawn(move || c.start())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::AlreadyRunning)));
}

#[test]
fn shutdown_timeout() {
    let fx = Fixture::new();
    fx.memory.ignore_halt("stubborn");
    let c = fx.running("stubborn");

    assert!(matches!(
        c.shutdown(Some(Duration::from_millis(100))),
        Err(Error::Timeout(State::Stopped))
    ));
    assert!(c.running());

    let polite = fx.running("polite");
    polite.shutdown(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(polite.state(), State::Stopped);
}

#[test]
fn reboot_replaces_init() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let before = c.init_pid();

    c.reboot().unwrap();
    assert!(c.running());
    assert_ne!(c.init_pid(), before);
}

#[test]
fn snapshots() {
    let fx = Fixture::new();
    let c = fx.created("web");

    assert!(matches!(c.snapshots(), Err(Error::NoSnapshot)));

    let first = c.create_snapshot().unwrap();
    assert_eq!(first.name, "snap0");
    assert!(first.created_at().is_some());

    c.set_config_item("lxc.start.auto", "1").unwrap();
    c.save_config().unwrap();
    let second = c.create_snapshot().unwrap();
    assert_eq!(second.name, "snap1");
    assert_eq!(c.snapshots().unwrap().len(), 2);

    // roll back in place to before the config change
    c.restore_snapshot(&first, "web").unwrap();
    assert_eq!(c.config_item("lxc.start.auto").unwrap(), None);

    // and restore the later one as a new container
    c.restore_snapshot(&second, "web-copy").unwrap();
    let copy = fx.handle("web-copy");
    assert!(copy.defined());
    assert_eq!(copy.config_item("lxc.start.auto").unwrap().as_deref(), Some("1"));

    c.destroy_snapshot(&Snapshot::named("snap0")).unwrap();
    assert_eq!(c.snapshots().unwrap().len(), 1);
    assert!(c.destroy().is_err());

    c.destroy_all_snapshots().unwrap();
    assert!(matches!(c.snapshots(), Err(Error::NoSnapshot)));
    c.destroy().unwrap();
}

#[test]
fn snapshot_requires_stopped_container() {
    let fx = Fixture::new();
    let c = fx.running("web");
    assert!(matches!(c.create_snapshot(), Err(Error::AlreadyRunning)));
}

#[test]
fn checkpoint_and_restore() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let pid = c.init_pid();
    let image = fx.dir.path().join("ckpt");

    c.checkpoint(&image, true, false).unwrap();
    assert_eq!(c.state(), State::Stopped);

    c.restore(&image, false).unwrap();
    assert!(c.running());
    assert_eq!(c.init_pid(), pid);

    let missing = fx.created("db");
    assert!(matches!(
        missing.restore(&fx.dir.path().join("nothing-here"), false),
        Err(Error::Failed { op: Operation::Restore, .. })
    ));
}

#[test]
fn migrate_steps() {
    let fx = Fixture::new();
    let c = fx.running("web");
    let dir = fx.dir.path().join("migrate");

    assert!(c
        .migrate_features_supported(MigrateFeatures::MEM_TRACK | MigrateFeatures::LAZY_PAGES)
        .unwrap());

    c.migrate(MigrateCommand::PreDump, &MigrateOptions::new(&dir)).unwrap();
    c.migrate(MigrateCommand::Dump, &MigrateOptions::new(&dir).stop(true)).unwrap();
    assert_eq!(c.state(), State::Stopped);
    assert!(matches!(
        c.migrate(MigrateCommand::Dump, &MigrateOptions::new(&dir)),
        Err(Error::NotRunning)
    ));

    c.migrate(MigrateCommand::Restore, &MigrateOptions::new(&dir)).unwrap();
    assert!(c.running());
}

#[test]
fn resource_usage() {
    let fx = Fixture::new();
    let c = fx.created("web");
    assert!(matches!(c.memory_usage(), Err(Error::NotRunning)));

    c.start().unwrap();
    assert_eq!(c.memory_usage().unwrap(), ByteSize::b(8_388_608));
    assert_eq!(c.memory_limit().unwrap(), None);

    c.set_memory_limit(Some(ByteSize::mib(256))).unwrap();
    assert_eq!(c.memory_limit().unwrap(), Some(ByteSize::mib(256)));
    c.set_memory_limit(None).unwrap();
    assert_eq!(c.memory_limit().unwrap(), None);

    c.set_soft_memory_limit(Some(ByteSize::mib(128))).unwrap();
    assert_eq!(c.cgroup_item("memory.high").unwrap().as_deref(), Some("134217728"));

    assert_eq!(c.cpu_time().unwrap(), Duration::from_micros(1500));
    assert_eq!(c.kernel_memory_usage().unwrap(), ByteSize::b(1_048_576));

    // unified hierarchy: no kernel memory limit file
    assert!(matches!(
        c.kernel_memory_limit(),
        Err(Error::NotSupported("kernel memory limit"))
    ));
    assert!(matches!(
        c.set_kernel_memory_limit(Some(ByteSize::mib(64))),
        Err(Error::NotSupported("kernel memory limit"))
    ));
}

#[test]
fn clone_and_rename() {
    let fx = Fixture::new();
    let c = fx.created("web");

    c.clone("web2", &CloneOptions::new()).unwrap();
    let copy = fx.handle("web2");
    assert!(copy.defined());
    assert_eq!(copy.config_item("lxc.uts.name").unwrap().as_deref(), Some("web2"));

    c.clone("web3", &CloneOptions::new().keep_name(true)).unwrap();
    assert_eq!(
        fx.handle("web3").config_item("lxc.uts.name").unwrap().as_deref(),
        Some("web")
    );

    copy.rename("db").unwrap();
    assert_eq!(copy.name(), "db");
    assert!(!fx.handle("web2").defined());
    assert!(fx.handle("db").defined());
}

#[test]
fn listing() {
    let fx = Fixture::new();
    fx.created("a");
    fx.running("b");

    let all = fx.runtime.container_names(Some(fx.dir.path())).unwrap();
    assert_eq!(all, vec!["a".to_string(), "b".to_string()]);
    let active = fx.runtime.active_container_names(Some(fx.dir.path())).unwrap();
    assert_eq!(active, vec!["b".to_string()]);

    let handles = Container::all(fx.runtime.clone(), Some(fx.dir.path())).unwrap();
    assert_eq!(handles.len(), 2);
}

#[test]
fn console_log_needs_running_container() {
    let fx = Fixture::new();
    let c = fx.created("web");
    assert!(c.console_log(&ConsoleLogOptions::read()).is_err());

    c.start().unwrap();
    let log = c.console_log(&ConsoleLogOptions::read()).unwrap();
    assert!(String::from_utf8_lossy(&log).contains("started"));
}

#[test]
fn descriptor_getters_need_extensions() {
    let fx = Fixture::new();
    let c = fx.running("web");
    assert!(matches!(c.init_pidfd(), Err(Error::NotSupported(_))));
}

#[test]
fn names_with_nul_are_rejected() {
    let fx = Fixture::new();
    assert!(matches!(
        Container::new(fx.runtime.clone(), "bad\0name", None),
        Err(Error::NulByte(_))
    ));
    let c = fx.created("web");
    assert!(matches!(
        c.set_config_item("lxc.uts.name", "a\0b"),
        Err(Error::NulByte(_))
    ));
}

#[test]
fn release_consumes_handle() {
    let fx = Fixture::new();
    let c = fx.created("web");
    c.release().unwrap();
    assert!(fx.handle("web").defined());
}

#[test]
fn distinct_handles_do_not_block_each_other() {
    let fx = Fixture::new();
    let blocked = Arc::new(fx.created("a"));
    fx.created("b");

    let waiter = {
        let blocked = blocked.clone();
        thread::spawn(move || blocked.wait(State::Running, Some(Duration::from_secs(2))))
    };
    thread::sleep(Duration::from_millis(50));

    // "a" is busy waiting; "b" still answers at once
    let started = Instant::now();
    let other = fx.handle("b");
    other.start().unwrap();
    assert!(other.running());
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(!waiter.join().unwrap());
}

#[test]
fn network_introspection() {
    let fx = Fixture::new();
    let c = fx.created("web");
    c.set_config_item("lxc.net.0.type", "veth").unwrap();
    c.set_config_item("lxc.net.0.name", "eth0").unwrap();
    c.set_config_item("lxc.net.0.ipv4.address", "10.0.3.5/24").unwrap();
    c.set_config_item("lxc.net.0.ipv6.address", "fd00::5/64").unwrap();
    c.save_config().unwrap();

    assert!(matches!(c.interfaces(), Err(Error::NotRunning)));
    c.start().unwrap();

    assert_eq!(c.interfaces().unwrap(), vec!["lo".to_string(), "eth0".to_string()]);
    assert_eq!(c.ipv4_addresses().unwrap(), vec!["10.0.3.5".to_string()]);
    assert_eq!(c.ipv6_addresses().unwrap(), vec!["fd00::5".to_string()]);
    assert_eq!(c.ip_address("lo").unwrap().len(), 2);
    assert!(c.ip_address("eth9").unwrap().is_empty());

    c.attach_interface("veth-host", Some("eth1")).unwrap();
    assert!(c.interfaces().unwrap().contains(&"eth1".to_string()));
    c.detach_interface("eth1", None).unwrap();
    assert!(c.detach_interface("eth1", None).is_err());
}

#[test]
fn device_nodes() {
    let fx = Fixture::new();
    let c = fx.running("web");

    c.add_device_node("/dev/null", Some("/dev/extra-null")).unwrap();
    c.remove_device_node("/dev/null", Some("/dev/extra-null")).unwrap();
    assert!(c.remove_device_node("/dev/null", Some("/dev/extra-null")).is_err());
    assert!(c.add_device_node("/dev/does-not-exist", None).is_err());
}

#[test]
fn log_settings_are_config_items() {
    use lxcctl::LogLevel;

    let fx = Fixture::new();
    let c = fx.created("web");
    assert_eq!(c.log_level().unwrap(), None);

    c.set_log_level(LogLevel::Debug).unwrap();
    c.set_log_file(&fx.dir.path().join("web.log")).unwrap();
    assert_eq!(c.log_level().unwrap(), Some(LogLevel::Debug));
    assert_eq!(c.log_file().unwrap(), Some(fx.dir.path().join("web.log")));
}
