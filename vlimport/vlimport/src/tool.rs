use std::process::Command;
use std::time::{Duration, Instant};

use toolchain::Captured;

use crate::error::{ExitStatus, Stage, ToolFailure};
use crate::Result;

/// Runs one external tool to completion. Anything but a zero exit status becomes a
/// [`ToolFailure`] carrying the captured output.
pub(crate) fn run_tool(
    stage: Stage,
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<Captured> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    log::debug!("{stage}: {cmd:?}");

    let start = Instant::now();
    let res = toolchain::run(cmd, timeout).map_err(|err| ToolFailure {
        stage,
        program: program.clone(),
        status: ExitStatus::Spawn(err.to_string()),
        output: String::new(),
    })?;

    if !res.status.success() {
        return Err(ToolFailure {
            stage,
            program,
            status: res.status.into(),
            output: res.diagnostics(),
        }
        .into());
    }

    log::trace!("{stage} finished in {:.2}s", start.elapsed().as_secs_f64());
    Ok(res)
}
