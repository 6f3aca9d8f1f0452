//! Garbage-collected value heap.
//!
//! Every language-observable value lives in a [`GcHeap`] slot and is
//! addressed by `Handle`. Collection is stop-the-world mark-and-sweep: the
//! caller gathers roots (operand stacks, symbol tables, waiting calls,
//! global tables) and hands them to [`GcHeap::collect`]; cells with a
//! non-zero pin count are roots on their own, which is how long-lived VM
//! anchors get strong-reference semantics without a separate root table.

use crate::core::error::MintError;
use crate::core::value::{Handle, Object, Payload, Reference, Val};

/// Enumerates the handles a value keeps alive.
pub trait Trace {
    fn trace(&self, mark: &mut dyn FnMut(Handle));
}

impl Trace for Reference {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        mark(self.handle);
    }
}

impl Trace for Val {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        match self {
            Val::Object(object) => object.trace(mark),
            Val::Function(function) => {
                if let Some(capture) = &function.capture {
                    for reference in capture.values() {
                        mark(reference.handle);
                    }
                }
            }
            Val::None | Val::Null | Val::Number(_) | Val::Boolean(_) | Val::Package(_) => {}
        }
    }
}

impl Trace for Object {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        for slot in &self.slots {
            mark(slot.handle);
        }
        match &self.payload {
            Payload::Array(values) => {
                for item in values {
                    mark(item.handle);
                }
            }
            Payload::Hash(values) => {
                for (key, value) in values {
                    if let crate::core::value::HashKey::Identity(handle) = key {
                        mark(*handle);
                    }
                    mark(value.handle);
                }
            }
            Payload::Iterator(context) => context.trace(mark),
            Payload::User | Payload::String(_) | Payload::Regex(_) | Payload::Library(_) => {}
        }
    }
}

/// One heap slot: the value plus its strong-root pin count.
#[derive(Debug)]
pub struct Cell {
    pub value: Val,
    pins: u32,
}

/// Slot-arena heap with mark-and-sweep collection.
#[derive(Debug, Default)]
pub struct GcHeap {
    storage: Vec<Option<Cell>>,
    free_slots: Vec<usize>,
    marks: Vec<bool>,
    live_count: usize,
    /// Collection triggers when the live count crosses this mark; it is
    /// doubled from the surviving count after every cycle.
    high_water: usize,
    collecting: bool,
}

const INITIAL_HIGH_WATER: usize = 1024;

impl GcHeap {
    pub fn new() -> Self {
        Self {
            storage: Vec::with_capacity(1024),
            free_slots: Vec::new(),
            marks: Vec::with_capacity(1024),
            live_count: 0,
            high_water: INITIAL_HIGH_WATER,
            collecting: false,
        }
    }

    /// Create a cell and return its handle. Ownership stays with the heap.
    pub fn alloc(&mut self, value: Val) -> Result<Handle, MintError> {
        if self.collecting {
            return Err(MintError::AllocationDuringCollect);
        }
        self.live_count += 1;

        let cell = Cell { value, pins: 0 };
        if let Some(index) = self.free_slots.pop() {
            self.storage[index] = Some(cell);
            self.marks[index] = false;
            return Ok(Handle(index as u32));
        }

        let index = self.storage.len();
        self.storage.push(Some(cell));
        self.marks.push(false);
        Ok(Handle(index as u32))
    }

    /// # Panics
    /// Panics if the handle refers to a freed slot.
    pub fn get(&self, handle: Handle) -> &Val {
        &self.cell(handle).value
    }

    /// # Panics
    /// Panics if the handle refers to a freed slot.
    pub fn get_mut(&mut self, handle: Handle) -> &mut Val {
        &mut self
            .storage[handle.0 as usize]
            .as_mut()
            .expect("use-after-free: handle refers to collected slot")
            .value
    }

    fn cell(&self, handle: Handle) -> &Cell {
        self.storage[handle.0 as usize]
            .as_ref()
            .expect("use-after-free: handle refers to collected slot")
    }

    /// Raise the cell's pin count, anchoring it as a GC root independent of
    /// tracing.
    pub fn pin(&mut self, handle: Handle) {
        let cell = self.storage[handle.0 as usize]
            .as_mut()
            .expect("use-after-free: handle refers to collected slot");
        cell.pins += 1;
    }

    /// Drop one pin. Reaching zero un-roots the cell but never frees it;
    /// the next collect does, if nothing else reaches it.
    pub fn unpin(&mut self, handle: Handle) {
        let cell = self.storage[handle.0 as usize]
            .as_mut()
            .expect("use-after-free: handle refers to collected slot");
        cell.pins = cell.pins.saturating_sub(1);
    }

    pub fn pins(&self, handle: Handle) -> u32 {
        self.cell(handle).pins
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// True once the live count crosses the high-water mark.
    pub fn should_collect(&self) -> bool {
        self.live_count >= self.high_water
    }

    /// Mark from `roots` plus every pinned cell, then sweep. Returns the
    /// number of cells freed.
    pub fn collect(&mut self, roots: &[Handle]) -> usize {
        self.collecting = true;

        for mark in self.marks.iter_mut() {
            *mark = false;
        }

        let mut worklist: Vec<Handle> = roots.to_vec();
        for (index, slot) in self.storage.iter().enumerate() {
            if let Some(cell) = slot {
                if cell.pins > 0 {
                    worklist.push(Handle(index as u32));
                }
            }
        }

        while let Some(handle) = worklist.pop() {
            let index = handle.0 as usize;
            if index >= self.marks.len() || self.marks[index] {
                continue;
            }
            self.marks[index] = true;

            if let Some(cell) = &self.storage[index] {
                cell.value.trace(&mut |child| {
                    let child_index = child.0 as usize;
                    if child_index < self.marks.len() && !self.marks[child_index] {
                        worklist.push(child);
                    }
                });
            }
        }

        let mut collected = 0;
        for index in 0..self.storage.len() {
            if !self.marks[index] && self.storage[index].is_some() {
                self.storage[index] = None;
                self.free_slots.push(index);
                collected += 1;
            }
        }

        self.live_count = self.live_count.saturating_sub(collected);
        self.high_water = (self.live_count * 2).max(INITIAL_HIGH_WATER);
        self.collecting = false;

        collected
    }

    /// Write a top-level copy of `source` into a fresh cell: scalars copy
    /// the cell, objects copy the slot array, containers copy their
    /// structure but share the inner references.
    pub fn clone_cell(&mut self, source: Handle) -> Result<Handle, MintError> {
        let copy = self.clone_value(source);
        self.alloc(copy)
    }

    fn clone_value(&self, source: Handle) -> Val {
        match self.get(source) {
            Val::None => Val::None,
            Val::Null => Val::Null,
            Val::Number(value) => Val::Number(*value),
            Val::Boolean(value) => Val::Boolean(*value),
            Val::Package(id) => Val::Package(*id),
            Val::Function(function) => Val::Function(function.clone()),
            Val::Object(object) => Val::Object(Object {
                class: object.class,
                slots: object.slots.clone(),
                payload: match &object.payload {
                    Payload::User => Payload::User,
                    Payload::String(text) => Payload::String(text.clone()),
                    Payload::Regex(data) => Payload::Regex(data.clone()),
                    Payload::Array(values) => Payload::Array(values.clone()),
                    Payload::Hash(values) => Payload::Hash(values.clone()),
                    Payload::Iterator(context) => Payload::Iterator(context.clone()),
                    Payload::Library(_) => Payload::Library(Default::default()),
                },
                prototype: object.prototype,
            }),
        }
    }

    #[cfg(test)]
    fn set_collecting(&mut self, collecting: bool) {
        self.collecting = collecting;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{ClassId, HashKey, Payload};
    use indexmap::IndexMap;

    #[test]
    fn alloc_and_get_roundtrip() {
        let mut heap = GcHeap::new();
        let h = heap.alloc(Val::Number(42.0)).unwrap();
        assert_eq!(*heap.get(h), Val::Number(42.0));
    }

    #[test]
    fn collect_frees_unreachable() {
        let mut heap = GcHeap::new();
        let root = heap.alloc(Val::Number(1.0)).unwrap();
        let _dead = heap.alloc(Val::Number(2.0)).unwrap();
        assert_eq!(heap.len(), 2);

        let collected = heap.collect(&[root]);
        assert_eq!(collected, 1);
        assert_eq!(heap.len(), 1);
        assert_eq!(*heap.get(root), Val::Number(1.0));
    }

    #[test]
    fn collect_traces_cycles() {
        let mut heap = GcHeap::new();

        let a = heap.alloc(Val::Null).unwrap();
        let b = heap.alloc(Val::Null).unwrap();

        let mut object = Object::new(ClassId(0), Payload::Array(vec![Reference::new(b)]));
        object.slots.push(Reference::new(b));
        *heap.get_mut(a) = Val::Object(object);
        *heap.get_mut(b) = Val::Object(Object::new(ClassId(0), Payload::Array(vec![Reference::new(a)])));

        // Unreachable cycle dies as one unit.
        assert_eq!(heap.collect(&[]), 2);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn collect_keeps_reachable_cycle() {
        let mut heap = GcHeap::new();

        let a = heap.alloc(Val::Null).unwrap();
        let b = heap.alloc(Val::Null).unwrap();
        *heap.get_mut(a) = Val::Object(Object::new(ClassId(0), Payload::Array(vec![Reference::new(b)])));
        *heap.get_mut(b) = Val::Object(Object::new(ClassId(0), Payload::Array(vec![Reference::new(a)])));

        assert_eq!(heap.collect(&[a]), 0);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn pinned_cells_survive_without_roots() {
        let mut heap = GcHeap::new();
        let pinned = heap.alloc(Val::Number(7.0)).unwrap();
        heap.pin(pinned);

        assert_eq!(heap.collect(&[]), 0);
        assert_eq!(*heap.get(pinned), Val::Number(7.0));

        // Unpinning to zero un-roots but does not free.
        heap.unpin(pinned);
        assert_eq!(*heap.get(pinned), Val::Number(7.0));
        assert_eq!(heap.collect(&[]), 1);
    }

    #[test]
    fn collect_traces_hash_identity_keys() {
        let mut heap = GcHeap::new();
        let key = heap.alloc(Val::Null).unwrap();
        let value = heap.alloc(Val::Number(1.0)).unwrap();

        let mut entries = IndexMap::new();
        entries.insert(HashKey::Identity(key), Reference::new(value));
        let hash = heap
            .alloc(Val::Object(Object::new(ClassId(0), Payload::Hash(entries))))
            .unwrap();

        assert_eq!(heap.collect(&[hash]), 0);
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn alloc_during_collect_is_rejected() {
        let mut heap = GcHeap::new();
        heap.set_collecting(true);
        assert!(matches!(
            heap.alloc(Val::Null),
            Err(MintError::AllocationDuringCollect)
        ));
    }

    #[test]
    fn slot_reuse_after_collect() {
        let mut heap = GcHeap::new();
        let _a = heap.alloc(Val::Number(1.0)).unwrap();
        let _b = heap.alloc(Val::Number(2.0)).unwrap();
        let keep = heap.alloc(Val::Number(3.0)).unwrap();

        heap.collect(&[keep]);
        let reused = heap.alloc(Val::Number(4.0)).unwrap();
        assert!(reused.0 < 3);
    }

    #[test]
    fn clone_cell_shares_container_elements() {
        let mut heap = GcHeap::new();
        let inner = heap.alloc(Val::Number(1.0)).unwrap();
        let array = heap
            .alloc(Val::Object(Object::new(
                ClassId(0),
                Payload::Array(vec![Reference::new(inner)]),
            )))
            .unwrap();

        let copy = heap.clone_cell(array).unwrap();
        assert_ne!(copy, array);

        // The copy owns its own structure but shares the element cell.
        let shared = match heap.get(copy) {
            Val::Object(object) => match &object.payload {
                Payload::Array(values) => values[0].handle,
                _ => panic!("expected array payload"),
            },
            _ => panic!("expected object"),
        };
        assert_eq!(shared, inner);
    }
}
