use std::fmt;
use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;
use toolchain::Status;

use crate::descriptor::DescriptorError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid module descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    #[error("failed to create workspace {path}: {source}")]
    Workspace { path: Utf8PathBuf, source: io::Error },

    #[error(transparent)]
    ToolFailure(#[from] ToolFailure),

    #[error("{stage} produced output that could not be split into arguments:\n{output}")]
    MalformedToolOutput { stage: Stage, output: String },

    #[error("verilator reported success but did not generate {path}")]
    MissingModelOutput { path: Utf8PathBuf },

    #[error("failed to write {path}: {source}")]
    Io { path: Utf8PathBuf, source: io::Error },

    #[error("no C++ compiler found: {0}\nhelp: set VLIMPORT_CXX to the compiler to use")]
    CompilerNotFound(String),

    #[error(transparent)]
    LoadFailure(#[from] LoadFailure),

    #[error("module {0} is already being built")]
    AlreadyBuilding(String),
}

impl Error {
    /// The stage that failed, if the failure came from an external tool.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::ToolFailure(failure) => Some(failure.stage),
            Error::MalformedToolOutput { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// One of the external programs the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    HardwareCompile,
    RuntimeQuery,
    EmbedFlagsQuery,
    NativeCompile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::HardwareCompile => "hardware compilation",
            Stage::RuntimeQuery => "verilator runtime query",
            Stage::EmbedFlagsQuery => "embedding flags query",
            Stage::NativeCompile => "native compilation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signal,
    TimedOut(std::time::Duration),
    /// The program could not be started at all.
    Spawn(String),
}

impl From<Status> for ExitStatus {
    fn from(status: Status) -> ExitStatus {
        match status {
            Status::Success => ExitStatus::Code(0),
            Status::Code(code) => ExitStatus::Code(code),
            Status::Signal => ExitStatus::Signal,
            Status::TimedOut(limit) => ExitStatus::TimedOut(limit),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal => write!(f, "terminated by signal"),
            ExitStatus::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
            ExitStatus::Spawn(err) => write!(f, "could not be started: {err}"),
        }
    }
}

/// An external tool did not finish successfully. `output` holds everything it printed,
/// stderr first.
#[derive(Error, Debug, Clone)]
#[error("{stage} failed: `{program}` {status}\n{output}")]
pub struct ToolFailure {
    pub stage: Stage,
    pub program: String,
    pub status: ExitStatus,
    pub output: String,
}

impl ToolFailure {
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExitStatus::Code(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadFailure {
    #[error("no library for module {module} in {search_path:?}")]
    NotFound { module: String, search_path: Vec<Utf8PathBuf> },

    #[error("failed to load {path}: {source}")]
    Open { path: Utf8PathBuf, source: libloading::Error },

    #[error("{path} does not export {symbol}: {source}")]
    MissingSymbol { path: Utf8PathBuf, symbol: String, source: libloading::Error },

    #[error("{path} was built for binding ABI {found}, expected {expected}")]
    AbiMismatch { path: Utf8PathBuf, expected: u32, found: u32 },

    #[error(
        "{path} exposes {found_inputs} inputs and {found_outputs} outputs but the descriptor \
         declares {inputs} and {outputs}\nhelp: the library is stale or was loaded before it \
         was rebuilt"
    )]
    PortMismatch {
        path: Utf8PathBuf,
        inputs: usize,
        outputs: usize,
        found_inputs: usize,
        found_outputs: usize,
    },

    #[error(
        "{path} was built with the ports `{found}` but the descriptor declares `{expected}`\n\
         help: a library that is already loaded can only be replaced by restarting the process"
    )]
    Stale { path: Utf8PathBuf, expected: String, found: String },
}
