//! The module registry: compiled units, their states, and `.mn` path
//! resolution through the library search list.

use crate::compiler::chunk::CodeChunk;
use crate::core::value::ModuleId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MODULE_EXTENSION: &str = "mn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    NotCompiled,
    Ready,
}

#[derive(Debug)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub state: ModuleState,
    pub chunk: Arc<CodeChunk>,
    pub path: Option<PathBuf>,
}

/// Owns every compiled module and maps id ↔ name ↔ path.
#[derive(Debug, Default)]
pub struct AstRegistry {
    modules: Vec<ModuleInfo>,
    by_name: HashMap<String, ModuleId>,
    pub library_path: Vec<PathBuf>,
    anonymous: u32,
}

impl AstRegistry {
    /// Seed the library path from the executable's install directory and
    /// the `MINT_LIBRARY_PATH` environment variable (PATH-separator
    /// split).
    pub fn new() -> Self {
        let mut library_path = Vec::new();
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                library_path.push(dir.to_path_buf());
            }
        }
        if let Ok(paths) = std::env::var("MINT_LIBRARY_PATH") {
            for entry in std::env::split_paths(&paths) {
                if !entry.as_os_str().is_empty() {
                    library_path.push(entry);
                }
            }
        }
        Self {
            modules: Vec::new(),
            by_name: HashMap::new(),
            library_path,
            anonymous: 0,
        }
    }

    pub fn add_library_path(&mut self, path: PathBuf) {
        self.library_path.push(path);
    }

    /// The entry module of the running program.
    pub fn create_main_module(&mut self, chunk: Arc<CodeChunk>) -> ModuleId {
        self.register("main".to_string(), chunk, None)
    }

    pub fn create_module(
        &mut self,
        name: String,
        chunk: Arc<CodeChunk>,
        path: Option<PathBuf>,
    ) -> ModuleId {
        self.register(name, chunk, path)
    }

    /// A module compiled from an in-memory buffer, e.g. one REPL input.
    pub fn create_anonymous_module(&mut self, chunk: Arc<CodeChunk>) -> ModuleId {
        self.anonymous += 1;
        self.register(format!("buffer-{}", self.anonymous), chunk, None)
    }

    fn register(&mut self, name: String, chunk: Arc<CodeChunk>, path: Option<PathBuf>) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.modules.push(ModuleInfo {
            id,
            name,
            state: ModuleState::Ready,
            chunk,
            path,
        });
        id
    }

    /// Record a module whose compilation failed; subsequent loads see the
    /// `NotCompiled` state instead of retrying.
    pub fn mark_failed(&mut self, name: String, path: Option<PathBuf>) -> ModuleId {
        let id = self.register(name, Arc::new(CodeChunk::default()), path);
        if let Some(info) = self.get_mut(id) {
            info.state = ModuleState::NotCompiled;
        }
        id
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleInfo> {
        self.modules.get_mut(id.0 as usize)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn module_name(&self, id: ModuleId) -> &str {
        if id == ModuleId::BUILTIN {
            return "builtin";
        }
        self.get(id).map(|info| info.name.as_str()).unwrap_or("?")
    }

    /// Source line of the instruction at `ip`, for tracebacks.
    pub fn line_of(&self, id: ModuleId, ip: usize) -> u32 {
        self.get(id)
            .and_then(|info| info.chunk.lines.get(ip).copied())
            .unwrap_or(0)
    }

    /// Map a dotted module path to a file: `a.b.c` → `a/b/c.mn` resolved
    /// against the library search list.
    pub fn resolve_path(&self, name: &str) -> Option<PathBuf> {
        let relative = module_relative_path(name);
        self.library_path
            .iter()
            .map(|base| base.join(&relative))
            .find(|candidate| candidate.is_file())
    }
}

fn module_relative_path(name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in name.split('.') {
        path.push(part);
    }
    path.set_extension(MODULE_EXTENSION);
    path
}

/// True when the argument already names a module file on disk.
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == MODULE_EXTENSION)
        .unwrap_or(false)
        && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_map_to_nested_paths() {
        let path = module_relative_path("a.b.c");
        assert_eq!(path, PathBuf::from("a/b/c.mn"));
    }

    #[test]
    fn registry_maps_ids_and_names() {
        let mut registry = AstRegistry::default();
        let chunk = Arc::new(CodeChunk::default());
        let main = registry.create_main_module(chunk.clone());
        let other = registry.create_module("lib.text".to_string(), chunk, None);

        assert_eq!(registry.find_by_name("main"), Some(main));
        assert_eq!(registry.find_by_name("lib.text"), Some(other));
        assert_eq!(registry.module_name(other), "lib.text");
    }
}
