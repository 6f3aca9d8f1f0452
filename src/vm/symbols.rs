use crate::core::gc::Trace;
use crate::core::value::{Handle, Reference, Symbol};
use indexmap::IndexMap;

/// Ordered map from symbol to reference with a fast-slot side table.
///
/// Compiled code addresses locals with known offsets through the fast
/// slots; named lookup goes through the map. Both views stay in sync: a
/// fast declaration also inserts the named binding.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    map: IndexMap<Symbol, Reference>,
    fast: Vec<Option<Reference>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: Symbol) -> Option<Reference> {
        self.map.get(&symbol).copied()
    }

    pub fn insert(&mut self, symbol: Symbol, reference: Reference) {
        self.map.insert(symbol, reference);
    }

    pub fn contains(&self, symbol: Symbol) -> bool {
        self.map.contains_key(&symbol)
    }

    pub fn erase(&mut self, symbol: Symbol) {
        self.map.shift_remove(&symbol);
    }

    fn slot_mut(&mut self, index: usize) -> &mut Option<Reference> {
        if index >= self.fast.len() {
            self.fast.resize(index + 1, None);
        }
        &mut self.fast[index]
    }

    pub fn get_fast(&self, symbol: Symbol, index: usize) -> Option<Reference> {
        if let Some(Some(reference)) = self.fast.get(index) {
            return Some(*reference);
        }
        self.map.get(&symbol).copied()
    }

    pub fn insert_fast(&mut self, symbol: Symbol, index: usize, reference: Reference) {
        *self.slot_mut(index) = Some(reference);
        self.map.insert(symbol, reference);
    }

    pub fn erase_fast(&mut self, symbol: Symbol, index: usize) {
        *self.slot_mut(index) = None;
        self.map.shift_remove(&symbol);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Reference)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Trace for SymbolTable {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        for reference in self.map.values() {
            mark(reference.handle);
        }
        for slot in self.fast.iter().flatten() {
            mark(slot.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_slots_shadow_named_lookup() {
        let mut table = SymbolTable::new();
        let symbol = Symbol(3);

        table.insert_fast(symbol, 0, Reference::new(Handle(7)));
        assert_eq!(table.get_fast(symbol, 0).unwrap().handle, Handle(7));
        assert_eq!(table.get(symbol).unwrap().handle, Handle(7));

        table.erase_fast(symbol, 0);
        assert!(table.get_fast(symbol, 0).is_none());
        assert!(table.get(symbol).is_none());
    }
}
