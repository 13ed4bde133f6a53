//! Compiles a Verilog module with verilator, wraps the generated model in a small C ABI and
//! loads the result into the running process.
//!
//! ```no_run
//! use vlimport::{import_hardware_module, ModuleDescriptor};
//!
//! let desc = ModuleDescriptor::new("Adder").input("a", 32).input("b", 32).output("c", 32);
//! let adder = import_hardware_module(&desc)?;
//! let mut top = adder.instantiate(None)?;
//! top.set("a", 1)?;
//! top.set("b", 2)?;
//! top.eval();
//! assert_eq!(top.get("c")?, 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Instant;

pub use crate::binding::{render_binding, CxxShim, BINDING_ABI_VERSION};
pub use crate::config::{FlagsQuery, Toolchain, DEFAULT_TIMEOUT};
pub use crate::descriptor::{
    is_identifier, validate, DescriptorError, Direction, ModuleDescriptor, Port,
};
pub use crate::error::{Error, ExitStatus, LoadFailure, Result, Stage, ToolFailure};
pub use crate::hardware::{compile_hardware, hardware_compiler_args};
pub use crate::loader::{load, AccessError, Instance, LoadedModule};
pub use crate::native::{
    compile_native, embed_flags, native_compiler_command, runtime_root, BuildArtifact, NativeInputs,
};
pub use crate::registry::{BuildGuard, Registry};
pub use crate::workspace::{ModelConvention, Workspace, WorkspaceLocation};

mod binding;
mod config;
mod descriptor;
mod error;
mod hardware;
mod loader;
mod native;
mod registry;
mod tool;
mod workspace;

/// Runs the whole pipeline for one descriptor.
#[derive(Debug, Clone, Default)]
pub struct Importer {
    pub toolchain: Toolchain,
    pub location: WorkspaceLocation,
    registry: Arc<Registry>,
}

impl Importer {
    pub fn new(toolchain: Toolchain, location: WorkspaceLocation) -> Importer {
        Importer { toolchain, location, registry: Arc::default() }
    }

    /// An importer sharing the search path and loaded modules of `registry`.
    pub fn with_registry(
        toolchain: Toolchain,
        location: WorkspaceLocation,
        registry: Arc<Registry>,
    ) -> Importer {
        Importer { toolchain, location, registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validates `descriptor`, verilates its source, compiles the model together with a
    /// generated binding and loads the resulting library. The first failing step aborts the
    /// import, nothing is retried.
    pub fn import(&self, descriptor: &ModuleDescriptor) -> Result<Arc<LoadedModule>> {
        let start = Instant::now();
        validate(descriptor)?;
        let name = descriptor.name();
        let _guard = self.registry.begin_build(name)?;

        let base = self.location.base_dir()?;
        let workspace = Workspace::acquire(&base, name, self.toolchain.convention)?;
        workspace.record_descriptor(descriptor)?;

        compile_hardware(&self.toolchain, descriptor, &workspace)?;
        let binding = render_binding(descriptor, workspace.convention());
        compile_native(&self.toolchain, descriptor, &workspace, &binding)?;
        let module = load(&self.registry, descriptor, &workspace)?;

        log::info!("imported {name} in {:.2}s", start.elapsed().as_secs_f64());
        Ok(module)
    }
}

/// Imports `descriptor` with a process wide importer configured from the environment
/// ([`Toolchain::from_env`]) that builds in the system temporary directory.
pub fn import_hardware_module(descriptor: &ModuleDescriptor) -> Result<Arc<LoadedModule>> {
    static DEFAULT: OnceLock<Importer> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Importer::new(Toolchain::from_env(), WorkspaceLocation::Temp))
        .import(descriptor)
}
