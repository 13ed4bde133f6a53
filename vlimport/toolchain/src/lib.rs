//! Invocation of the external programs a build depends on.
//!
//! [`exec`] runs a subprocess to completion (or until a deadline) while capturing everything it
//! prints. [`cxx`] builds the command line for the native C++ compiler in a flavor agnostic
//! way so callers only describe *what* they want (a shared library from these sources) and not
//! how a specific compiler spells it.

pub mod cxx;
pub mod exec;


pub use crate::cxx::{compiler, discover, Command, Compiler, CompilerFlavor, CompilerTool};
pub use crate::exec::{escape_output, run, Captured, Status};

/// The target triple this crate was compiled for. Native code produced at runtime must match
/// it to be loadable into the current process.
pub fn host_triple() -> &'static str {
    env!("CFG_COMPILER_HOST_TRIPLE")
}

/// Splits `flags` according to POSIX shell word rules.
/// Returns `None` if the string contains unbalanced quotes or a trailing escape.
pub fn split_flags(flags: &str) -> Option<Vec<String>> {
    shlex::split(flags)
}
