use std::fs::{self, remove_file};
use std::process::Command;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use toolchain::{compiler, escape_output, split_flags, CompilerTool};

use crate::config::Toolchain;
use crate::descriptor::ModuleDescriptor;
use crate::error::Stage;
use crate::tool::run_tool;
use crate::workspace::Workspace;
use crate::{Error, Result};

/// The shared library produced for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    path: Utf8PathBuf,
}

impl BuildArtifact {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// A file that is deleted when this guard goes out of scope.
struct ScopedFile {
    path: Utf8PathBuf,
}

impl ScopedFile {
    fn create(path: Utf8PathBuf, contents: &str) -> Result<ScopedFile> {
        match fs::write(&path, contents) {
            Ok(()) => Ok(ScopedFile { path }),
            Err(source) => {
                // a partially written file is still ours to clean up
                let _ = remove_file(&path);
                Err(Error::Io { path, source })
            }
        }
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if let Err(err) = remove_file(&self.path) {
            log::debug!("failed to delete {}: {err}", self.path);
        }
    }
}

/// The verilator installation providing the runtime headers and sources.
pub fn runtime_root(toolchain: &Toolchain) -> Result<Utf8PathBuf> {
    if let Some(root) = &toolchain.verilator_root {
        return Ok(root.clone());
    }

    let mut cmd = Command::new(&toolchain.verilator);
    cmd.args(["--getenv", "VERILATOR_ROOT"]);
    let res = run_tool(Stage::RuntimeQuery, &mut cmd, toolchain.timeout)?;
    let root = escape_output(&res.stdout);
    let root = root.trim();
    if root.is_empty() || root.lines().count() != 1 {
        return Err(Error::MalformedToolOutput {
            stage: Stage::RuntimeQuery,
            output: root.to_owned(),
        });
    }
    Ok(root.into())
}

/// Flags reported by the configured embedding flags query, if any.
pub fn embed_flags(toolchain: &Toolchain) -> Result<Vec<String>> {
    let Some(query) = &toolchain.embed_flags else { return Ok(Vec::new()) };
    let mut cmd = Command::new(&query.program);
    cmd.args(&query.args);
    let res = run_tool(Stage::EmbedFlagsQuery, &mut cmd, toolchain.timeout)?;
    let output = escape_output(&res.stdout);
    split_flags(&output)
        .ok_or(Error::MalformedToolOutput { stage: Stage::EmbedFlagsQuery, output })
}

/// Everything the compiler invocation depends on besides the toolchain configuration.
pub struct NativeInputs<'a> {
    pub runtime_root: &'a Utf8Path,
    pub embed_flags: &'a [String],
    pub binding: &'a Utf8Path,
}

pub fn native_compiler_command(
    toolchain: &Toolchain,
    tool: &CompilerTool,
    workspace: &Workspace,
    inputs: NativeInputs<'_>,
) -> Result<Command> {
    let convention = workspace.convention();
    let runtime_include = inputs.runtime_root.join("include");

    let mut cxx = compiler(tool);
    cxx.optimize();
    cxx.shared_library();
    cxx.cxx_standard();
    if convention.needs_threads() {
        cxx.threads();
    }
    cxx.include_dir(workspace.root());
    cxx.include_dir(&runtime_include);
    cxx.include_dir(&runtime_include.join("vltstd"));
    for dir in &toolchain.binding_includes {
        cxx.include_dir(dir);
    }
    cxx.args(inputs.embed_flags);
    cxx.args(&toolchain.cxx_args);

    for source in workspace.model_sources()? {
        cxx.add_source(&source);
    }
    for source in convention.runtime_sources() {
        cxx.add_source(&runtime_include.join(source));
    }
    cxx.add_source(inputs.binding);
    cxx.output_filename(&workspace.artifact_path());

    Ok(cxx.take_cmd())
}

/// Compiles the verilated model, the verilator runtime and `binding_source` into the shared
/// library of `workspace`. The binding is only kept on disk while the compiler runs.
pub fn compile_native(
    toolchain: &Toolchain,
    descriptor: &ModuleDescriptor,
    workspace: &Workspace,
    binding_source: &str,
) -> Result<BuildArtifact> {
    let start = Instant::now();
    let binding = ScopedFile::create(workspace.binding_source(), binding_source)?;

    let embed_flags = embed_flags(toolchain)?;
    let runtime_root = runtime_root(toolchain)?;
    let tool = toolchain::discover(toolchain.cxx.as_deref())
        .map_err(|err| Error::CompilerNotFound(err.to_string()))?;

    let inputs = NativeInputs {
        runtime_root: &runtime_root,
        embed_flags: &embed_flags,
        binding: &binding.path,
    };
    let mut cmd = native_compiler_command(toolchain, &tool, workspace, inputs)?;
    run_tool(Stage::NativeCompile, &mut cmd, toolchain.timeout)?;
    drop(binding);

    log::info!("finished building {} in {:.2}s", descriptor.name(), start.elapsed().as_secs_f64());
    Ok(BuildArtifact { path: workspace.artifact_path() })
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;
    use crate::ModelConvention;

    fn command_line(convention: ModelConvention) -> String {
        let base = std::env::temp_dir().join(format!(
            "vlimport-native-{}-{}",
            convention.version(),
            std::process::id()
        ));
        let base = Utf8PathBuf::from_path_buf(base).unwrap();
        let _ = fs::remove_dir_all(&base);
        let ws = Workspace::acquire(&base, "Adder", convention).unwrap();
        for file in ["VAdder.cpp", "VAdder__Syms.cpp", "VAdder__Slow.cpp"] {
            fs::write(ws.root().join(file), "").unwrap();
        }

        let mut toolchain = Toolchain::default();
        toolchain.binding_includes.push("/opt/bindings/include".into());
        toolchain.cxx_args.push("-g".to_owned());
        let embed = ["-I/usr/include/host".to_owned(), "-lhost".to_owned()];
        let inputs = NativeInputs {
            runtime_root: Utf8Path::new("/usr/share/verilator"),
            embed_flags: &embed,
            binding: &ws.root().join("binding.cpp"),
        };
        let cmd = native_compiler_command(&toolchain, &CompilerTool::new("g++"), &ws, inputs)
            .unwrap();
        let line: Vec<_> = cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()).collect();
        let line = line.join(" ").replace(ws.root().as_str(), "$WS");
        fs::remove_dir_all(&base).unwrap();
        line.replace(&format!("Adder.{}", std::env::consts::DLL_EXTENSION), "Adder.$DLL")
    }

    #[test]
    fn split_command_line() {
        expect![[r#"-O3 -fPIC -shared -std=c++17 -pthread -I $WS -I /usr/share/verilator/include -I /usr/share/verilator/include/vltstd -I /opt/bindings/include -I/usr/include/host -lhost -g $WS/VAdder.cpp $WS/VAdder__Slow.cpp $WS/VAdder__Syms.cpp /usr/share/verilator/include/verilated.cpp /usr/share/verilator/include/verilated_threads.cpp $WS/binding.cpp -o $WS/Adder.$DLL"#]]
            .assert_eq(&command_line(ModelConvention::Split));
    }

    #[test]
    fn legacy_command_line() {
        expect![[r#"-O3 -fPIC -shared -std=c++17 -I $WS -I /usr/share/verilator/include -I /usr/share/verilator/include/vltstd -I /opt/bindings/include -I/usr/include/host -lhost -g $WS/VAdder.cpp $WS/VAdder__Syms.cpp /usr/share/verilator/include/verilated.cpp $WS/binding.cpp -o $WS/Adder.$DLL"#]]
            .assert_eq(&command_line(ModelConvention::Legacy));
    }

    #[test]
    fn scoped_file_is_removed() {
        let path = std::env::temp_dir().join(format!("vlimport-scoped-{}.cpp", std::process::id()));
        let path = Utf8PathBuf::from_path_buf(path).unwrap();
        let file = ScopedFile::create(path.clone(), "int x;").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "int x;");
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn configured_runtime_root_skips_query() {
        let toolchain = Toolchain {
            verilator: "/nonexistent/verilator".into(),
            verilator_root: Some("/opt/verilator".into()),
            ..Toolchain::default()
        };
        assert_eq!(runtime_root(&toolchain).unwrap().as_str(), "/opt/verilator");
        assert_eq!(embed_flags(&toolchain).unwrap(), Vec::<String>::new());
    }
}
