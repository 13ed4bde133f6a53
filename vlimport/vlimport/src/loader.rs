use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr::NonNull;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use libloading::Library;
use thiserror::Error;

use crate::binding::{getter_symbol, setter_symbol, symbol, BINDING_ABI_VERSION};
use crate::descriptor::{Direction, ModuleDescriptor, Port};
use crate::error::LoadFailure;
use crate::registry::Registry;
use crate::workspace::Workspace;
use crate::Result;

/// Definitions of the functions exported by a generated binding
mod binding_fn {
    use std::ffi::c_void;
    use std::os::raw::c_char;

    pub type Count = unsafe extern "C" fn() -> u32;
    pub type Doc = unsafe extern "C" fn() -> *const c_char;
    pub type New = unsafe extern "C" fn(*const c_char) -> *mut c_void;
    // delete, eval and final
    pub type Model = unsafe extern "C" fn(*mut c_void);
    pub type Get = unsafe extern "C" fn(*const c_void) -> u64;
    pub type Set = unsafe extern "C" fn(*mut c_void, u64);
    pub type GetWide = unsafe extern "C" fn(*const c_void, *mut u32);
    pub type SetWide = unsafe extern "C" fn(*mut c_void, *const u32);
}

#[derive(Debug, Clone, Copy)]
enum Accessor {
    Scalar { get: binding_fn::Get, set: Option<binding_fn::Set> },
    Wide { get: binding_fn::GetWide, set: Option<binding_fn::SetWide> },
}

#[derive(Debug)]
struct PortHandle {
    port: Port,
    direction: Direction,
    access: Accessor,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("module {module} has no port `{port}`")]
    UnknownPort { module: String, port: String },
    #[error("`{0}` is an output and can not be written")]
    ReadOnly(String),
    #[error("`{0}` is wider than 64 bits, use the word based accessors")]
    Wide(String),
    #[error("`{0}` fits into 64 bits, use the scalar accessors")]
    NotWide(String),
    #[error("`{port}` is stored in {expected} words but {found} were supplied")]
    WordCount { port: String, expected: usize, found: usize },
    #[error("value does not fit into the {width} bits of `{port}`")]
    Overflow { port: String, width: u32 },
    #[error("instance name must not contain NUL bytes")]
    InvalidName,
    #[error("the constructor of {0} threw an exception")]
    Construction(String),
}

/// A module library loaded into this process.
#[derive(Debug)]
pub struct LoadedModule {
    name: String,
    doc: String,
    path: Utf8PathBuf,
    ports: IndexMap<String, PortHandle>,
    new: binding_fn::New,
    delete: binding_fn::Model,
    eval: binding_fn::Model,
    finalize: binding_fn::Model,
    // keeps the function pointers above valid
    _lib: Library,
}

/// Adds the workspace to the search path of `registry` and loads the library of `descriptor`.
///
/// The library in `workspace` is preferred (it was just built there); other directories on the
/// search path are only consulted if it is missing. All symbols are resolved up front so a
/// library that does not match `descriptor` is rejected here instead of on first use.
pub fn load(
    registry: &Registry,
    descriptor: &ModuleDescriptor,
    workspace: &Workspace,
) -> Result<Arc<LoadedModule>> {
    registry.add_search_path(workspace.root());
    let own = workspace.artifact_path();
    let path = if own.is_file() { Some(own) } else { registry.locate(descriptor.name()) };
    let Some(path) = path else {
        return Err(LoadFailure::NotFound {
            module: descriptor.name().to_owned(),
            search_path: registry.search_path(),
        }
        .into());
    };

    // SAFETY: the library was produced by the native compilation stage from a binding whose
    // initializers only construct verilator runtime globals
    let lib = unsafe { Library::new(path.as_std_path()) }
        .map_err(|source| LoadFailure::Open { path: path.clone(), source })?;
    let module = Arc::new(LoadedModule::resolve(lib, path, descriptor)?);
    registry.insert(module.clone());
    log::info!("loaded {} from {}", module.name, module.path);
    Ok(module)
}

/// SAFETY: `T` must be the function pointer type the binding declares for `name`
unsafe fn resolve_fn<T: Copy>(lib: &Library, path: &Utf8Path, name: &str) -> Result<T, LoadFailure> {
    let mut sym_name = name.as_bytes().to_vec();
    sym_name.push(0);
    lib.get::<T>(&sym_name).map(|sym| *sym).map_err(|source| LoadFailure::MissingSymbol {
        path: path.to_owned(),
        symbol: name.to_owned(),
        source,
    })
}

impl LoadedModule {
    fn resolve(
        lib: Library,
        path: Utf8PathBuf,
        descriptor: &ModuleDescriptor,
    ) -> Result<LoadedModule, LoadFailure> {
        let module = descriptor.name();
        let sym = |item: &str| symbol(module, item);

        // SAFETY: the signatures match the declarations emitted by `CxxShim`
        unsafe {
            let abi: binding_fn::Count = resolve_fn(&lib, &path, &sym("abi"))?;
            let found = abi();
            if found != BINDING_ABI_VERSION {
                return Err(LoadFailure::AbiMismatch {
                    path,
                    expected: BINDING_ABI_VERSION,
                    found,
                });
            }

            let num_inputs: binding_fn::Count = resolve_fn(&lib, &path, &sym("num_inputs"))?;
            let num_outputs: binding_fn::Count = resolve_fn(&lib, &path, &sym("num_outputs"))?;
            let (found_inputs, found_outputs) = (num_inputs() as usize, num_outputs() as usize);
            let (inputs, outputs) = (descriptor.inputs().len(), descriptor.outputs().len());
            if (found_inputs, found_outputs) != (inputs, outputs) {
                return Err(LoadFailure::PortMismatch {
                    path,
                    inputs,
                    outputs,
                    found_inputs,
                    found_outputs,
                });
            }

            // the accessor signatures below depend on the widths, check them before resolving
            let signature: binding_fn::Doc = resolve_fn(&lib, &path, &sym("ports"))?;
            let found = CStr::from_ptr(signature()).to_string_lossy().into_owned();
            let expected = descriptor.port_signature();
            if found != expected {
                return Err(LoadFailure::Stale { path, expected, found });
            }

            let doc: binding_fn::Doc = resolve_fn(&lib, &path, &sym("doc"))?;
            let doc = CStr::from_ptr(doc()).to_string_lossy().into_owned();

            let mut ports = IndexMap::with_capacity(inputs + outputs);
            for (direction, port) in descriptor.ports() {
                let getter = getter_symbol(module, port.name());
                let setter = setter_symbol(module, port.name());
                let writable = direction == Direction::Input;
                let access = if port.is_wide() {
                    Accessor::Wide {
                        get: resolve_fn(&lib, &path, &getter)?,
                        set: if writable { Some(resolve_fn(&lib, &path, &setter)?) } else { None },
                    }
                } else {
                    Accessor::Scalar {
                        get: resolve_fn(&lib, &path, &getter)?,
                        set: if writable { Some(resolve_fn(&lib, &path, &setter)?) } else { None },
                    }
                };
                let handle = PortHandle { port: port.clone(), direction, access };
                ports.insert(port.name().to_owned(), handle);
            }

            Ok(LoadedModule {
                name: module.to_owned(),
                doc,
                new: resolve_fn(&lib, &path, &sym("new"))?,
                delete: resolve_fn(&lib, &path, &sym("delete"))?,
                eval: resolve_fn(&lib, &path, &sym("eval"))?,
                finalize: resolve_fn(&lib, &path, &sym("final"))?,
                path,
                ports,
                _lib: lib,
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The docstring of the descriptor the library was built from.
    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Port> + '_ {
        self.ports_in(Direction::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Port> + '_ {
        self.ports_in(Direction::Output)
    }

    fn ports_in(&self, direction: Direction) -> impl Iterator<Item = &Port> + '_ {
        self.ports.values().filter(move |handle| handle.direction == direction).map(|h| &h.port)
    }

    pub fn port(&self, name: &str) -> Option<(Direction, &Port)> {
        self.ports.get(name).map(|handle| (handle.direction, &handle.port))
    }

    /// Creates a new simulation model. The name is only kept on the host side, the model
    /// itself is always constructed with its default name.
    pub fn instantiate(&self, name: Option<&str>) -> Result<Instance<'_>, AccessError> {
        let name = name.unwrap_or("TOP");
        let c_name = CString::new(name).map_err(|_| AccessError::InvalidName)?;
        // SAFETY: `new` has the signature emitted by the binding and copies nothing from `name`
        let raw = unsafe { (self.new)(c_name.as_ptr() as *const c_char) };
        let model = NonNull::new(raw).ok_or_else(|| AccessError::Construction(self.name.clone()))?;
        Ok(Instance { module: self, model, name: name.to_owned() })
    }

    fn handle(&self, port: &str) -> Result<&PortHandle, AccessError> {
        self.ports.get(port).ok_or_else(|| AccessError::UnknownPort {
            module: self.name.clone(),
            port: port.to_owned(),
        })
    }
}

/// One simulation model. The native model is destroyed when the instance is dropped.
#[derive(Debug)]
pub struct Instance<'m> {
    module: &'m LoadedModule,
    model: NonNull<c_void>,
    name: String,
}

impl<'m> Instance<'m> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &'m LoadedModule {
        self.module
    }

    /// Evaluates the model once, propagating the current inputs to the outputs.
    pub fn eval(&mut self) {
        // SAFETY: `model` was created by `new` of the same library and is not aliased
        unsafe { (self.module.eval)(self.model.as_ptr()) }
    }

    /// Runs the `final` blocks of the design.
    pub fn finalize(&mut self) {
        // SAFETY: see `eval`
        unsafe { (self.module.finalize)(self.model.as_ptr()) }
    }

    pub fn get(&self, port: &str) -> Result<u64, AccessError> {
        match self.module.handle(port)?.access {
            // SAFETY: the getter belongs to this model's class
            Accessor::Scalar { get, .. } => Ok(unsafe { get(self.model.as_ptr()) }),
            Accessor::Wide { .. } => Err(AccessError::Wide(port.to_owned())),
        }
    }

    pub fn set(&mut self, port: &str, value: u64) -> Result<(), AccessError> {
        let handle = self.module.handle(port)?;
        let set = match handle.access {
            Accessor::Scalar { set: Some(set), .. } => set,
            Accessor::Scalar { set: None, .. } => return Err(AccessError::ReadOnly(port.into())),
            Accessor::Wide { .. } => return Err(AccessError::Wide(port.to_owned())),
        };
        if value & !handle.port.mask() != 0 {
            return Err(AccessError::Overflow { port: port.to_owned(), width: handle.port.width() });
        }
        // SAFETY: the setter belongs to this model's class
        unsafe { set(self.model.as_ptr(), value) }
        Ok(())
    }

    /// Reads a port wider than 64 bits, least significant word first.
    pub fn get_wide(&self, port: &str) -> Result<Vec<u32>, AccessError> {
        let handle = self.module.handle(port)?;
        match handle.access {
            Accessor::Wide { get, .. } => {
                let mut words = vec![0u32; handle.port.words()];
                // SAFETY: the getter writes exactly `words()` words
                unsafe { get(self.model.as_ptr(), words.as_mut_ptr()) };
                Ok(words)
            }
            Accessor::Scalar { .. } => Err(AccessError::NotWide(port.to_owned())),
        }
    }

    pub fn set_wide(&mut self, port: &str, words: &[u32]) -> Result<(), AccessError> {
        let handle = self.module.handle(port)?;
        let set = match handle.access {
            Accessor::Wide { set: Some(set), .. } => set,
            Accessor::Wide { set: None, .. } => return Err(AccessError::ReadOnly(port.into())),
            Accessor::Scalar { .. } => return Err(AccessError::NotWide(port.to_owned())),
        };
        let expected = handle.port.words();
        if words.len() != expected {
            return Err(AccessError::WordCount {
                port: port.to_owned(),
                expected,
                found: words.len(),
            });
        }
        if u64::from(words[expected - 1]) & !handle.port.mask() != 0 {
            return Err(AccessError::Overflow { port: port.to_owned(), width: handle.port.width() });
        }
        // SAFETY: the setter reads exactly `words()` words
        unsafe { set(self.model.as_ptr(), words.as_ptr()) }
        Ok(())
    }
}

impl Drop for Instance<'_> {
    fn drop(&mut self) {
        // SAFETY: `model` was created by `new` and is never used after this point
        unsafe { (self.module.delete)(self.model.as_ptr()) }
    }
}
