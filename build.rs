//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Build script to compile the liblxc shim and link with Rust
//!
//! This build script handles:
//! 1. Probing for liblxc (>= 3.0) through pkg-config
//! 2. Compiling `csrc/lxc_shim.c` against the discovered headers
//! 3. Enabling the `liblxc` cfg so the native runtime is compiled in
//!
//! If liblxc is not available (or LXCCTL_SKIP_LIBLXC is set), the crate is
//! built without the native runtime and only the in-memory runtime is usable.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(liblxc)");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=csrc/lxc_shim.c");
    println!("cargo:rerun-if-changed=csrc/lxc_shim.h");
    println!("cargo:rerun-if-env-changed=LXCCTL_SKIP_LIBLXC");

    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("linux") {
        println!("cargo:warning=liblxc is Linux-only - building without the native runtime");
        return;
    }

    if env::var("LXCCTL_SKIP_LIBLXC").is_ok() {
        println!("cargo:warning=Skipping liblxc (LXCCTL_SKIP_LIBLXC=1)");
        return;
    }

    // 1. Locate liblxc
    let library = match pkg_config::Config::new()
        .atleast_version("3.0")
        .cargo_metadata(false)
        .probe("lxc")
    {
        Ok(library) => library,
        Err(e) => {
            println!("cargo:warning=liblxc not found ({}) - native runtime disabled", first_line(&e.to_string()));
            return;
        }
    };

    // 2. Build the shim
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let csrc = manifest_dir.join("csrc");

    let mut build = cc::Build::new();
    build
        .file(csrc.join("lxc_shim.c"))
        .include(&csrc)
        .warnings(false);
    for path in &library.include_paths {
        build.include(path);
    }
    build.compile("lxcshim");

    // 3. Link liblxc after the shim archive, then turn on the native runtime
    for path in &library.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
    }
    for lib in &library.libs {
        println!("cargo:rustc-link-lib={}", lib);
    }
    println!("cargo:rustc-link-lib=util");
    println!("cargo:rustc-cfg=liblxc");
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}
