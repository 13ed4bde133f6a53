use std::env::consts::DLL_EXTENSION;
use std::fs::{self, create_dir_all};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::descriptor::ModuleDescriptor;
use crate::{Error, Result};

const FINGERPRINT_FILE: &str = ".vlimport-descriptor";

/// The names of the files verilator generates for a model and the runtime sources that have to
/// be compiled alongside them. Both stages use this type instead of repeating file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelConvention {
    /// One model source plus a symbol table (verilator 4.0 and older).
    Legacy,
    /// The model is split across many `V<name>*.cpp` files and the runtime needs threading
    /// support (verilator 4.2 and newer).
    #[default]
    Split,
}

impl ModelConvention {
    pub fn version(self) -> u32 {
        match self {
            ModelConvention::Legacy => 1,
            ModelConvention::Split => 2,
        }
    }

    /// Runtime sources relative to `$VERILATOR_ROOT/include`.
    pub fn runtime_sources(self) -> &'static [&'static str] {
        match self {
            ModelConvention::Legacy => &["verilated.cpp"],
            ModelConvention::Split => &["verilated.cpp", "verilated_threads.cpp"],
        }
    }

    /// Old runtimes call `sc_time_stamp` without providing a definition.
    pub fn needs_time_stamp(self) -> bool {
        self == ModelConvention::Legacy
    }

    pub fn needs_threads(self) -> bool {
        self == ModelConvention::Split
    }
}

/// Where workspaces are created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkspaceLocation {
    /// The system temporary directory.
    #[default]
    Temp,
    /// The per user cache directory of vlimport.
    Cache,
    Dir(Utf8PathBuf),
}

impl WorkspaceLocation {
    pub fn base_dir(&self) -> Result<Utf8PathBuf> {
        match self {
            WorkspaceLocation::Temp => utf8(std::env::temp_dir()),
            WorkspaceLocation::Cache => {
                let dirs = directories_next::ProjectDirs::from("org", "vlimport", "vlimport")
                    .ok_or_else(|| Error::Workspace {
                        path: Utf8PathBuf::new(),
                        source: io::Error::new(
                            io::ErrorKind::NotFound,
                            "failed to find cache directory",
                        ),
                    })?;
                utf8(dirs.cache_dir().to_owned())
            }
            WorkspaceLocation::Dir(dir) => Ok(dir.clone()),
        }
    }
}

fn utf8(path: std::path::PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|path| Error::Workspace {
        path: path.to_string_lossy().into_owned().into(),
        source: io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
    })
}

/// Scratch directory owning every generated file of one module.
///
/// At most one build per module name may be in flight at a time, the directory itself is not
/// locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: Utf8PathBuf,
    module_name: String,
    convention: ModelConvention,
}

impl Workspace {
    /// Returns the workspace for `module_name` below `base`, creating the directory if it does
    /// not exist yet. Files left over from earlier builds are kept.
    pub fn acquire(
        base: &Utf8Path,
        module_name: &str,
        convention: ModelConvention,
    ) -> Result<Workspace> {
        let root = base.join(model_prefix(module_name));
        create_dir_all(&root).map_err(|source| Error::Workspace { path: root.clone(), source })?;
        Ok(Workspace { root, module_name: module_name.to_owned(), convention })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn convention(&self) -> ModelConvention {
        self.convention
    }

    /// Name of the generated model class, also the prefix of every generated file.
    pub fn prefix(&self) -> String {
        model_prefix(&self.module_name)
    }

    pub fn model_header(&self) -> Utf8PathBuf {
        self.root.join(format!("{}.h", self.prefix()))
    }

    /// Model sources verilator generated, in the order they are passed to the compiler.
    pub fn model_sources(&self) -> Result<Vec<Utf8PathBuf>> {
        let prefix = self.prefix();
        match self.convention {
            ModelConvention::Legacy => Ok(vec![
                self.root.join(format!("{prefix}.cpp")),
                self.root.join(format!("{prefix}__Syms.cpp")),
            ]),
            ModelConvention::Split => {
                let entries = self.root.read_dir_utf8().map_err(|source| Error::Io {
                    path: self.root.clone(),
                    source,
                })?;
                let mut sources = Vec::new();
                for entry in entries {
                    let entry =
                        entry.map_err(|source| Error::Io { path: self.root.clone(), source })?;
                    let name = entry.file_name();
                    if name.starts_with(&prefix) && name.ends_with(".cpp") {
                        sources.push(entry.into_path());
                    }
                }
                sources.sort();
                Ok(sources)
            }
        }
    }

    /// Where the generated binding is written while the native compiler runs.
    pub fn binding_source(&self) -> Utf8PathBuf {
        self.root.join(format!("vlimport_{}_binding_{}.cpp", self.module_name, std::process::id()))
    }

    pub fn artifact_path(&self) -> Utf8PathBuf {
        self.root.join(format!("{}.{DLL_EXTENSION}", self.module_name))
    }

    /// Stores a fingerprint of `descriptor` in the workspace. Returns `true` if a fingerprint
    /// of a different descriptor was found, meaning artifacts from another design are about to
    /// be overwritten.
    pub fn record_descriptor(&self, descriptor: &ModuleDescriptor) -> Result<bool> {
        let path = self.root.join(FINGERPRINT_FILE);
        let digest = format!("{:x}", fingerprint(descriptor, self.convention));
        let changed = match fs::read(&path) {
            Ok(old) => String::from_utf8_lossy(&old).trim() != digest,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(source) => return Err(Error::Io { path, source }),
        };
        if changed {
            log::warn!(
                "workspace {} was last used by a different descriptor of {}, \
                 its contents will be overwritten",
                self.root,
                self.module_name
            );
        }
        fs::write(&path, digest).map_err(|source| Error::Io { path, source })?;
        Ok(changed)
    }
}

pub(crate) fn model_prefix(module_name: &str) -> String {
    format!("V{module_name}")
}

fn fingerprint(descriptor: &ModuleDescriptor, convention: ModelConvention) -> md5::Digest {
    let mut hash_builder = md5::Context::new();
    hash_builder.consume(convention.version().to_le_bytes());
    hash_builder.consume(descriptor.name());
    hash_builder.consume([0u8]);
    hash_builder.consume(descriptor.source_path().as_str());
    hash_builder.consume([0u8]);
    if let Some(include) = descriptor.include_path() {
        hash_builder.consume(include.as_str());
    }
    hash_builder.consume([0u8]);
    for (dir, port) in descriptor.ports() {
        hash_builder.consume(dir.to_string());
        hash_builder.consume(port.name());
        hash_builder.consume(port.width().to_le_bytes());
    }
    hash_builder.consume(descriptor.doc());
    hash_builder.compute()
}
