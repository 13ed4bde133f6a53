use std::ffi::{OsStr, OsString};
use std::fmt::{self, Write as _};
use std::mem::take;
use std::path::{Path, PathBuf};

use camino::Utf8Path;

use crate::host_triple;

/// The command line dialect a C++ compiler speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompilerFlavor {
    /// `g++`, `clang++` and anything else that accepts GCC style flags
    Gnu,
    /// `cl.exe`
    Msvc,
}

impl CompilerFlavor {
    /// Guesses the flavor from the name of the compiler executable.
    pub fn from_program(path: &Path) -> CompilerFlavor {
        let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
        if stem.eq_ignore_ascii_case("cl") || stem.eq_ignore_ascii_case("clang-cl") {
            CompilerFlavor::Msvc
        } else {
            CompilerFlavor::Gnu
        }
    }
}

/// A C++ compiler found on this machine together with the arguments and environment it
/// requires to produce code for the host.
#[derive(Clone, Debug)]
pub struct CompilerTool {
    pub path: PathBuf,
    pub flavor: CompilerFlavor,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl CompilerTool {
    pub fn new(path: impl Into<PathBuf>) -> CompilerTool {
        let path = path.into();
        let flavor = CompilerFlavor::from_program(&path);
        CompilerTool { path, flavor, args: Vec::new(), env: Vec::new() }
    }
}

/// Locates the C++ compiler. An explicitly configured program is used as is, otherwise the
/// host compiler is discovered the same way build scripts do it (respecting `CXX` and
/// `CXXFLAGS`). For MSVC this also sets up the environment `cl.exe` needs to find its headers.
pub fn discover(explicit: Option<&Utf8Path>) -> Result<CompilerTool, cc::Error> {
    if let Some(path) = explicit {
        return Ok(CompilerTool::new(path.as_std_path()));
    }

    let triple = host_triple();
    let tool = cc::Build::new()
        .cpp(true)
        .cargo_metadata(false)
        .warnings(false)
        .debug(false)
        .opt_level(3)
        .target(triple)
        .host(triple)
        .try_get_compiler()?;

    let flavor = if tool.is_like_msvc() { CompilerFlavor::Msvc } else { CompilerFlavor::Gnu };
    Ok(CompilerTool {
        path: tool.path().to_owned(),
        flavor,
        args: tool.args().to_vec(),
        env: tool.env().to_vec(),
    })
}

/// Disables non-English messages from localized compilers so that captured diagnostics stay
/// searchable and do not run into text encoding issues.
fn disable_localization(cmd: &mut Command) {
    // Unix-style compilers.
    cmd.env("LC_ALL", "C");
    // MSVC's `cl.exe`.
    cmd.env("VSLANG", "1033");
}

/// Creates the flavor specific command builder for `tool`.
pub fn compiler(tool: &CompilerTool) -> Box<dyn Compiler> {
    let mut cmd = Command::new(tool.path.clone());
    disable_localization(&mut cmd);
    for (key, val) in &tool.env {
        cmd.env(key, val);
    }
    cmd.args(&tool.args);
    match tool.flavor {
        CompilerFlavor::Gnu => Box::new(GnuCompiler { cmd }),
        CompilerFlavor::Msvc => Box::new(MsvcCompiler { cmd }),
    }
}

/// Compiler abstraction used to build up the command that turns several C++ translation units
/// into one loadable shared library.
///
/// Each method represents the meaning of an option; the implementations translate that into
/// the spelling of a GNU-like compiler or of MSVC.
pub trait Compiler {
    fn cmd(&mut self) -> &mut Command;
    fn optimize(&mut self);
    /// Position independent code linked into a shared library.
    fn shared_library(&mut self);
    fn cxx_standard(&mut self);
    fn threads(&mut self);
    fn include_dir(&mut self, dir: &Utf8Path);
    fn add_source(&mut self, path: &Utf8Path);
    fn output_filename(&mut self, path: &Utf8Path);
}

impl dyn Compiler + '_ {
    pub fn args<I: AsRef<OsStr>>(&mut self, args: impl IntoIterator<Item = I>) {
        self.cmd().args(args);
    }

    pub fn take_cmd(&mut self) -> std::process::Command {
        let cmd = self.cmd();
        let mut res = std::process::Command::new(cmd.program.as_os_str());
        res.args(cmd.args.iter()).envs(take(&mut cmd.env));
        res
    }
}

pub struct GnuCompiler {
    cmd: Command,
}

impl Compiler for GnuCompiler {
    fn cmd(&mut self) -> &mut Command {
        &mut self.cmd
    }

    fn optimize(&mut self) {
        self.cmd.arg("-O3");
    }

    fn shared_library(&mut self) {
        self.cmd.arg("-fPIC").arg("-shared");
    }

    fn cxx_standard(&mut self) {
        self.cmd.arg("-std=c++17");
    }

    fn threads(&mut self) {
        self.cmd.arg("-pthread");
    }

    fn include_dir(&mut self, dir: &Utf8Path) {
        self.cmd.arg("-I").arg(dir.as_str());
    }

    fn add_source(&mut self, path: &Utf8Path) {
        self.cmd.arg(path.as_str());
    }

    fn output_filename(&mut self, path: &Utf8Path) {
        self.cmd.arg("-o").arg(path.as_str());
    }
}

pub struct MsvcCompiler {
    cmd: Command,
}

impl Compiler for MsvcCompiler {
    fn cmd(&mut self) -> &mut Command {
        &mut self.cmd
    }

    fn optimize(&mut self) {
        self.cmd.arg("/O2");
    }

    fn shared_library(&mut self) {
        self.cmd.arg("/LD");
    }

    fn cxx_standard(&mut self) {
        self.cmd.arg("/std:c++17").arg("/EHsc");
    }

    // the MSVC runtime is always thread safe
    fn threads(&mut self) {}

    fn include_dir(&mut self, dir: &Utf8Path) {
        self.cmd.arg(format!("/I{dir}"));
    }

    fn add_source(&mut self, path: &Utf8Path) {
        self.cmd.arg(path.as_str());
    }

    fn output_filename(&mut self, path: &Utf8Path) {
        // keep the object files next to the library instead of the working directory
        if let Some(dir) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
            self.cmd.arg(format!("/Fo{dir}\\"));
        }
        self.cmd.arg(format!("/Fe{path}"));
    }
}

/// A command line that is still being assembled.
#[derive(Clone, Debug)]
pub struct Command {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl Command {
    pub fn new(program: PathBuf) -> Command {
        Command { program, args: Vec::new(), env: Vec::new() }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn args<I: AsRef<OsStr>>(&mut self, args: impl IntoIterator<Item = I>) {
        self.args.extend(args.into_iter().map(|arg| arg.as_ref().to_owned()))
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn env(&mut self, env: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> &mut Self {
        self.env.push((env.as_ref().to_owned(), val.as_ref().to_owned()));
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            {
                write!(line, " {arg:?}")?
            } else {
                write!(line, " {arg}")?
            }
        }
        f.write_str(&line)
    }
}
