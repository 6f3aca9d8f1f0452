use crate::core::gc::Trace;
use crate::core::value::{ClassId, Handle, PackageId, Symbol};
use crate::vm::symbols::SymbolTable;
use indexmap::IndexMap;

/// A namespace: top-level bindings, nested packages and the classes
/// registered under it.
///
/// Resolution never falls back to the parent; the compiler emits explicit
/// package opens.
#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub symbols: SymbolTable,
    pub packages: IndexMap<Symbol, PackageId>,
    pub classes: IndexMap<Symbol, ClassId>,
    pub parent: Option<PackageId>,
}

impl Package {
    pub fn new(name: String, parent: Option<PackageId>) -> Self {
        Self {
            name,
            symbols: SymbolTable::new(),
            packages: IndexMap::new(),
            classes: IndexMap::new(),
            parent,
        }
    }

    pub fn find_package(&self, symbol: Symbol) -> Option<PackageId> {
        self.packages.get(&symbol).copied()
    }

    pub fn find_class(&self, symbol: Symbol) -> Option<ClassId> {
        self.classes.get(&symbol).copied()
    }

    pub fn register_class(&mut self, symbol: Symbol, class: ClassId) {
        self.classes.insert(symbol, class);
    }
}

impl Trace for Package {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        self.symbols.trace(mark);
    }
}
