//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Lifecycle against a real liblxc. These need root, a working LXC setup
//! and network access for the download template; run them with
//! `cargo test --test native -- --ignored`.
#![cfg(liblxc)]

use std::time::Duration;

use lxcctl::{runtime, AttachOptions, Container, State, TemplateOptions};

const NAME: &str = "lxcctl-native-test";

fn handle() -> Container {
    Container::new(runtime::native().unwrap(), NAME, None).unwrap()
}

#[test]
#[ignore]
fn busybox_lifecycle() {
    let c = handle();
    if c.defined() {
        let _ = c.stop();
        c.destroy_with_all_snapshots().unwrap();
    }

    c.create(&TemplateOptions::new("busybox")).unwrap();
    c.start().unwrap();
    assert!(c.wait(State::Running, Some(Duration::from_secs(30))));

    let status = c
        .run_command_status(&["/bin/sh", "-c", "exit 3"], &AttachOptions::new())
        .unwrap();
    assert_eq!(status.code(), Some(3));

    c.freeze().unwrap();
    assert_eq!(c.state(), State::Frozen);
    c.unfreeze().unwrap();

    c.stop().unwrap();
    let snap = c.create_snapshot().unwrap();
    assert_eq!(snap.name, "snap0");
    c.destroy_with_all_snapshots().unwrap();
    assert!(!c.defined());
}

#[test]
#[ignore]
fn runtime_reports_version() {
    let rt = runtime::native().unwrap();
    assert!(!rt.version().is_empty());
    assert!(rt.default_config_path().is_some());
}
