use std::process::Command;
use std::time::Instant;

use crate::config::Toolchain;
use crate::descriptor::ModuleDescriptor;
use crate::error::Stage;
use crate::tool::run_tool;
use crate::workspace::Workspace;
use crate::{Error, Result};

/// Arguments passed to verilator to generate the C++ model of `descriptor` into `workspace`.
pub fn hardware_compiler_args(
    toolchain: &Toolchain,
    descriptor: &ModuleDescriptor,
    workspace: &Workspace,
) -> Vec<String> {
    let mut args = vec![
        descriptor.source_path().to_string(),
        "--cc".to_owned(),
        "-Wall".to_owned(),
        "-Mdir".to_owned(),
        workspace.root().to_string(),
        "--prefix".to_owned(),
        workspace.prefix(),
    ];
    if let Some(include) = descriptor.include_path() {
        args.push("-y".to_owned());
        args.push(include.to_string());
    }
    args.extend(toolchain.verilator_args.iter().cloned());
    args
}

/// Runs verilator on the source of `descriptor`. On success the workspace contains the model
/// sources named by its [`ModelConvention`](crate::ModelConvention).
pub fn compile_hardware(
    toolchain: &Toolchain,
    descriptor: &ModuleDescriptor,
    workspace: &Workspace,
) -> Result<()> {
    let start = Instant::now();
    let mut cmd = Command::new(&toolchain.verilator);
    cmd.args(hardware_compiler_args(toolchain, descriptor, workspace));
    run_tool(Stage::HardwareCompile, &mut cmd, toolchain.timeout)?;

    let header = workspace.model_header();
    if !header.exists() {
        return Err(Error::MissingModelOutput { path: header });
    }

    log::info!(
        "verilated {} in {:.2}s",
        descriptor.source_path(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
