use std::collections::HashSet;
use std::env::consts::DLL_EXTENSION;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::loader::LoadedModule;
use crate::{Error, Result};

/// Directories searched for module libraries, the modules loaded from them and the modules
/// currently being built.
///
/// Search directories are only ever appended: libraries stay mapped into the process until it
/// exits, so there is no teardown. Callers that need isolation from other imports use a
/// separate registry (or process).
#[derive(Debug, Default)]
pub struct Registry {
    search_path: Mutex<Vec<Utf8PathBuf>>,
    modules: Mutex<IndexMap<String, Arc<LoadedModule>>>,
    building: Mutex<HashSet<String>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Appends `dir` to the search path unless it is already present.
    /// Returns whether the search path changed.
    pub fn add_search_path(&self, dir: &Utf8Path) -> bool {
        let mut search_path = self.search_path.lock();
        if search_path.iter().any(|known| known.as_path() == dir) {
            return false;
        }
        search_path.push(dir.to_owned());
        true
    }

    pub fn search_path(&self) -> Vec<Utf8PathBuf> {
        self.search_path.lock().clone()
    }

    /// The first `<dir>/<module_name>.<dll extension>` on the search path that exists.
    pub fn locate(&self, module_name: &str) -> Option<Utf8PathBuf> {
        let file_name = format!("{module_name}.{DLL_EXTENSION}");
        self.search_path.lock().iter().map(|dir| dir.join(&file_name)).find(|path| path.is_file())
    }

    /// Claims the right to build `module_name` until the returned guard is dropped.
    pub fn begin_build(&self, module_name: &str) -> Result<BuildGuard<'_>> {
        if !self.building.lock().insert(module_name.to_owned()) {
            return Err(Error::AlreadyBuilding(module_name.to_owned()));
        }
        Ok(BuildGuard { registry: self, module_name: module_name.to_owned() })
    }

    pub fn is_building(&self, module_name: &str) -> bool {
        self.building.lock().contains(module_name)
    }

    pub fn get(&self, module_name: &str) -> Option<Arc<LoadedModule>> {
        self.modules.lock().get(module_name).cloned()
    }

    /// Names of all loaded modules in the order they were first loaded.
    pub fn loaded(&self) -> Vec<String> {
        self.modules.lock().keys().cloned().collect()
    }

    pub(crate) fn insert(&self, module: Arc<LoadedModule>) {
        self.modules.lock().insert(module.name().to_owned(), module);
    }
}

#[derive(Debug)]
#[must_use = "the build slot is released as soon as the guard is dropped"]
pub struct BuildGuard<'a> {
    registry: &'a Registry,
    module_name: String,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.registry.building.lock().remove(&self.module_name);
    }
}
