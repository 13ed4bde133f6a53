//! Fake tools for driving the pipeline without verilator.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use vlimport::{Importer, Toolchain, WorkspaceLocation};
use xshell::{Shell, TempDir};

/// Tests spawning processes run one at a time. A script that is still open for writing in a
/// process forked by another test can not be executed (`ETXTBSY`).
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|err| err.into_inner())
}

pub fn data_file(name: &str) -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

/// Whether the host C++ compiler can be run, tests that link a real library are skipped
/// otherwise.
pub fn have_cxx() -> bool {
    let Ok(tool) = toolchain::discover(None) else { return false };
    Command::new(&tool.path).arg("--version").output().map_or(false, |out| out.status.success())
}

pub struct Sandbox {
    pub sh: Shell,
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Sandbox {
        let sh = Shell::new().unwrap();
        let dir = sh.create_temp_dir().unwrap();
        Sandbox { sh, dir }
    }

    pub fn path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_owned()).unwrap()
    }

    /// Where workspaces are created.
    pub fn build_dir(&self) -> Utf8PathBuf {
        self.path().join("build")
    }

    /// A file a fake tool creates to prove it was started.
    pub fn marker(&self, tool: &str) -> Utf8PathBuf {
        self.path().join(format!("{tool}.ran"))
    }

    pub fn script(&self, name: &str, body: &str) -> Utf8PathBuf {
        let path = self.path().join("bin").join(name);
        self.sh.write_file(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A script that only records that it was started.
    pub fn touch_tool(&self, name: &str) -> Utf8PathBuf {
        let marker = self.marker(name);
        self.script(name, &format!("touch '{marker}'"))
    }

    /// A verilator replacement that copies `model` into the `-Mdir` directory and logs its
    /// arguments to `verilator.args`.
    pub fn fake_verilator(&self, model: &[(&str, &str)]) -> Utf8PathBuf {
        let template = self.path().join("model");
        fs::create_dir_all(&template).unwrap();
        for (file, contents) in model {
            self.sh.write_file(template.join(file), contents).unwrap();
        }
        let log = self.path().join("verilator.args");
        let body = format!(
            r#"echo "$@" >> '{log}'
mdir=
while [ $# -gt 0 ]; do
    case "$1" in
        -Mdir) mdir="$2"; shift ;;
    esac
    shift
done
if [ -z "$mdir" ]; then
    echo "%Error: missing -Mdir" >&2
    exit 2
fi
cp '{template}'/* "$mdir"/"#
        );
        self.script("verilator", &body)
    }

    /// An installation with empty runtime sources.
    pub fn runtime_root(&self) -> Utf8PathBuf {
        let root = self.path().join("verilator_root");
        for file in ["verilated.cpp", "verilated_threads.cpp"] {
            self.sh.write_file(root.join("include").join(file), "// runtime stub\n").unwrap();
        }
        root
    }

    pub fn toolchain(&self, verilator: Utf8PathBuf) -> Toolchain {
        Toolchain {
            verilator,
            verilator_root: Some(self.runtime_root()),
            timeout: Some(Duration::from_secs(120)),
            ..Toolchain::default()
        }
    }

    pub fn importer(&self, toolchain: Toolchain) -> Importer {
        Importer::new(toolchain, WorkspaceLocation::Dir(self.build_dir()))
    }
}

pub const ADDER_HEADER: &str = r#"#pragma once
#include <cstdint>

class VAdder {
public:
    uint32_t a = 0;
    uint32_t b = 0;
    uint32_t c = 0;
    void eval();
    void final() {}
};
"#;

pub const ADDER_MODEL: &str = r#"#include "VAdder.h"

void VAdder::eval() { c = a + b; }
"#;

pub const WIDE_HEADER: &str = r#"#pragma once
#include <cstdint>

class VWide {
public:
    uint8_t clk = 0;
    uint32_t data[3] = {};
    uint32_t sum[4] = {};
    void eval();
    void final() {}
};
"#;

pub const WIDE_MODEL: &str = r#"#include "VWide.h"

void VWide::eval() {
    for (int i = 0; i < 3; ++i) sum[i] = data[i];
    sum[3] = clk;
}
"#;
