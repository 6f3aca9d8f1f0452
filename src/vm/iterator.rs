//! The iterator engine.
//!
//! An iterator object owns one of three context variants: a ring buffer of
//! items (the default form and the target of `copy` for the others), a
//! numeric range walked lazily in either direction, or a generator — an
//! items buffer extended with a parked interpreter frame. Suspension and
//! resumption of generator frames is driven by the cursor; this module only
//! owns the data.

use crate::core::error::MintError;
use crate::core::gc::{GcHeap, Trace};
use crate::core::value::{Handle, HashKey, Metatype, Payload, Reference, RefFlags, Val};
use crate::runtime::global::GlobalData;
use crate::vm::frame::SavedState;
use std::collections::VecDeque;

/// Ring buffer of references; grows by doubling.
#[derive(Debug, Clone, Default)]
pub struct ItemsIterator {
    items: VecDeque<Reference>,
}

impl ItemsIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn value(&self) -> Option<Reference> {
        self.items.front().copied()
    }

    pub fn last(&self) -> Option<Reference> {
        self.items.back().copied()
    }

    pub fn yield_item(&mut self, item: Reference) {
        self.items.push_back(item);
    }

    /// Drop the head. Calling this on an empty buffer is a precondition
    /// violation.
    pub fn next(&mut self) {
        debug_assert!(!self.items.is_empty());
        self.items.pop_front();
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn reserve(&mut self, capacity: usize) {
        if self.items.capacity() < capacity {
            self.items.reserve(capacity - self.items.len());
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.items.iter()
    }
}

/// Lazy numeric range. Head and tail are heap cells so `value` hands out a
/// stable reference; `next` rebinds the head to a fresh cell.
#[derive(Debug, Clone)]
pub struct RangeIterator {
    head: Reference,
    /// Last value of the walk, inclusive.
    tail: Reference,
    ascending: bool,
}

impl RangeIterator {
    fn new(heap: &mut GcHeap, begin: f64, end: f64) -> Result<Self, MintError> {
        Ok(Self {
            head: Reference::new(heap.alloc(Val::Number(begin))?),
            tail: Reference::new(heap.alloc(Val::Number(end - 1.0))?),
            ascending: begin < end,
        })
    }

    /// `begin..end`; the bound is adjusted outward so `end` is produced.
    pub fn inclusive(heap: &mut GcHeap, begin: f64, end: f64) -> Result<Self, MintError> {
        if begin <= end {
            Self::new(heap, begin, end + 1.0)
        } else {
            Self::new(heap, begin, end - 1.0)
        }
    }

    /// `begin...end`; `end` itself is not produced.
    pub fn exclusive(heap: &mut GcHeap, begin: f64, end: f64) -> Result<Self, MintError> {
        Self::new(heap, begin, end)
    }

    fn head_value(&self, heap: &GcHeap) -> f64 {
        heap.get(self.head.handle).as_number().unwrap_or(0.0)
    }

    fn tail_value(&self, heap: &GcHeap) -> f64 {
        heap.get(self.tail.handle).as_number().unwrap_or(0.0)
    }

    pub fn value(&self) -> Reference {
        self.head
    }

    pub fn last(&self) -> Reference {
        self.tail
    }

    pub fn next(&mut self, heap: &mut GcHeap) -> Result<(), MintError> {
        let step = if self.ascending { 1.0 } else { -1.0 };
        let advanced = self.head_value(heap) + step;
        self.head = Reference::new(heap.alloc(Val::Number(advanced))?);
        Ok(())
    }

    pub fn is_empty(&self, heap: &GcHeap) -> bool {
        (self.head_value(heap) - (self.tail_value(heap) + 1.0)).abs() < 1.0
    }

    pub fn size(&self, heap: &GcHeap) -> usize {
        let head = self.head_value(heap);
        let end = self.tail_value(heap) + 1.0;
        let span = if self.ascending { end - head } else { head - end };
        if span > 0.0 { span as usize } else { 0 }
    }

    pub fn clear(&mut self) {
        self.head = self.tail;
    }
}

/// How a generator body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Yields append and execution continues — an eager comprehension.
    SinglePass,
    /// Yields snapshot the interpreter and suspend the body.
    Interruptible,
}

/// Items buffer plus the parked interpreter state of a generator body.
#[derive(Debug, Clone)]
pub struct GeneratorIterator {
    pub items: ItemsIterator,
    pub state: Option<SavedState>,
    /// Operand-stack slice above `stack_base`, moved here on suspension.
    pub stored_stack: Vec<Reference>,
    /// First operand-stack slot belonging to the generator body.
    pub stack_base: usize,
    pub mode: ExecutionMode,
}

impl GeneratorIterator {
    pub fn new(stack_base: usize, mode: ExecutionMode) -> Self {
        Self {
            items: ItemsIterator::new(),
            state: None,
            stored_stack: Vec::new(),
            stack_base,
            mode,
        }
    }

    /// Running, suspended with a valid saved state, or finalized.
    pub fn is_suspended(&self) -> bool {
        self.state.is_some()
    }
}

/// The polymorphic iterator payload.
#[derive(Debug, Clone)]
pub enum IteratorContext {
    Items(ItemsIterator),
    Range(RangeIterator),
    Generator(Box<GeneratorIterator>),
}

impl IteratorContext {
    pub fn empty_items() -> Self {
        IteratorContext::Items(ItemsIterator::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IteratorContext::Items(_) => "items",
            IteratorContext::Range(_) => "range",
            IteratorContext::Generator(_) => "generator",
        }
    }

    /// The head element, without advancing.
    pub fn value(&self, heap: &GcHeap) -> Option<Reference> {
        match self {
            IteratorContext::Items(items) => items.value(),
            IteratorContext::Range(range) => {
                if range.is_empty(heap) {
                    None
                } else {
                    Some(range.value())
                }
            }
            IteratorContext::Generator(generator) => generator.items.value(),
        }
    }

    pub fn last(&self) -> Option<Reference> {
        match self {
            IteratorContext::Items(items) => items.last(),
            IteratorContext::Range(range) => Some(range.last()),
            // A suspended generator must be finalized by the cursor before
            // its last element is meaningful.
            IteratorContext::Generator(generator) => generator.items.last(),
        }
    }

    pub fn yield_item(&mut self, item: Reference) -> Result<(), MintError> {
        match self {
            IteratorContext::Items(items) => {
                items.yield_item(item);
                Ok(())
            }
            IteratorContext::Range(_) => Err(MintError::System(
                "yield is not supported on a range iterator".into(),
            )),
            IteratorContext::Generator(generator) => {
                generator.items.yield_item(item);
                Ok(())
            }
        }
    }

    /// Advance past the head. Generator resumption is layered on top by
    /// the cursor, which restores the saved frame after this pop.
    pub fn next(&mut self, heap: &mut GcHeap) -> Result<(), MintError> {
        match self {
            IteratorContext::Items(items) => {
                items.next();
                Ok(())
            }
            IteratorContext::Range(range) => range.next(heap),
            IteratorContext::Generator(generator) => {
                generator.items.next();
                Ok(())
            }
        }
    }

    pub fn is_empty(&self, heap: &GcHeap) -> bool {
        match self {
            IteratorContext::Items(items) => items.is_empty(),
            IteratorContext::Range(range) => range.is_empty(heap),
            IteratorContext::Generator(generator) => {
                generator.items.is_empty() && generator.state.is_none()
            }
        }
    }

    pub fn size(&self, heap: &GcHeap) -> usize {
        match self {
            IteratorContext::Items(items) => items.size(),
            IteratorContext::Range(range) => range.size(heap),
            IteratorContext::Generator(generator) => generator.items.size(),
        }
    }

    pub fn capacity(&self, _heap: &GcHeap) -> usize {
        match self {
            IteratorContext::Items(items) => items.capacity(),
            // A range only ever materializes its two bounds.
            IteratorContext::Range(_) => 2,
            IteratorContext::Generator(generator) => generator.items.capacity(),
        }
    }

    pub fn reserve(&mut self, capacity: usize) -> Result<(), MintError> {
        match self {
            IteratorContext::Items(items) => {
                items.reserve(capacity);
                Ok(())
            }
            IteratorContext::Range(_) => Err(MintError::System(
                "reserve is not supported on a range iterator".into(),
            )),
            IteratorContext::Generator(generator) => {
                generator.items.reserve(capacity);
                Ok(())
            }
        }
    }

    pub fn clear(&mut self) {
        match self {
            IteratorContext::Items(items) => items.clear(),
            IteratorContext::Range(range) => range.clear(),
            IteratorContext::Generator(generator) => generator.items.clear(),
        }
    }

    /// Snapshot into the default items form, sharing the buffered
    /// references. Suspended generators are finalized by the cursor before
    /// this is called.
    pub fn copy_to_items(&self, heap: &mut GcHeap) -> Result<ItemsIterator, MintError> {
        match self {
            IteratorContext::Items(items) => Ok(items.clone()),
            IteratorContext::Generator(generator) => Ok(generator.items.clone()),
            IteratorContext::Range(range) => {
                let mut items = ItemsIterator::with_capacity(range.size(heap));
                let mut walker = range.clone();
                while !walker.is_empty(heap) {
                    items.yield_item(walker.value());
                    walker.next(heap)?;
                }
                Ok(items)
            }
        }
    }
}

impl Trace for IteratorContext {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        match self {
            IteratorContext::Items(items) => {
                for item in items.iter() {
                    mark(item.handle);
                }
            }
            IteratorContext::Range(range) => {
                mark(range.head.handle);
                mark(range.tail.handle);
            }
            IteratorContext::Generator(generator) => {
                for item in generator.items.iter() {
                    mark(item.handle);
                }
                for item in &generator.stored_stack {
                    mark(item.handle);
                }
                if let Some(state) = &generator.state {
                    state.trace(mark);
                }
            }
        }
    }
}

/// Borrow the iterator context of a cell known to hold an iterator
/// object.
pub fn context_of(heap: &GcHeap, handle: Handle) -> Result<&IteratorContext, MintError> {
    match heap.get(handle) {
        Val::Object(object) => match &object.payload {
            Payload::Iterator(context) => Ok(context),
            _ => Err(MintError::TypeMismatch {
                expected: "iterator",
                got: object.metatype().name().to_string(),
                operation: "iterator access",
            }),
        },
        other => Err(MintError::TypeMismatch {
            expected: "iterator",
            got: other.format_name().to_string(),
            operation: "iterator access",
        }),
    }
}

pub fn context_of_mut(
    heap: &mut GcHeap,
    handle: Handle,
) -> Result<&mut IteratorContext, MintError> {
    match heap.get_mut(handle) {
        Val::Object(object) => match &mut object.payload {
            Payload::Iterator(context) => Ok(context),
            other => Err(MintError::TypeMismatch {
                expected: "iterator",
                got: match other {
                    Payload::User => "object",
                    Payload::String(_) => "string",
                    Payload::Regex(_) => "regex",
                    Payload::Array(_) => "array",
                    Payload::Hash(_) => "hash",
                    Payload::Iterator(_) => "iterator",
                    Payload::Library(_) => "library",
                }
                .to_string(),
                operation: "iterator access",
            }),
        },
        other => Err(MintError::TypeMismatch {
            expected: "iterator",
            got: other.format_name().to_string(),
            operation: "iterator access",
        }),
    }
}

/// Return an iterator over `source`:
/// an iterator as-is; a string per code point; an array per element (by
/// share); a hash as `[key, value]` sub-iterators; `none` empty; any other
/// value as a single element.
pub fn iterator_init(
    heap: &mut GcHeap,
    globals: &GlobalData,
    source: Reference,
) -> Result<Reference, MintError> {
    if let Val::Object(object) = heap.get(source.handle) {
        if object.metatype() == Metatype::Iterator {
            return Ok(source);
        }
    }

    let context = iterator_context_over(heap, globals, source)?;
    globals.alloc_iterator(heap, context)
}

fn iterator_context_over(
    heap: &mut GcHeap,
    globals: &GlobalData,
    source: Reference,
) -> Result<IteratorContext, MintError> {
    let mut items = ItemsIterator::new();
    match heap.get(source.handle) {
        Val::None => {}
        Val::Object(object) => match &object.payload {
            Payload::String(text) => {
                let chars: Vec<String> = text.chars().map(|c| c.to_string()).collect();
                for c in chars {
                    items.yield_item(globals.alloc_string(heap, c)?);
                }
            }
            Payload::Array(values) => {
                for item in values.clone() {
                    items.yield_item(item.share());
                }
            }
            Payload::Hash(values) => {
                let entries: Vec<(HashKey, Reference)> =
                    values.iter().map(|(k, v)| (k.clone(), *v)).collect();
                for (key, value) in entries {
                    let mut pair = ItemsIterator::with_capacity(2);
                    pair.yield_item(hash_key_reference(heap, globals, &key)?);
                    pair.yield_item(value.share());
                    let element =
                        globals.alloc_iterator(heap, IteratorContext::Items(pair))?;
                    items.yield_item(Reference::with_flags(
                        element.handle,
                        RefFlags::CONST_ADDRESS | RefFlags::CONST_VALUE,
                    ));
                }
            }
            _ => items.yield_item(source),
        },
        _ => items.yield_item(source),
    }
    Ok(IteratorContext::Items(items))
}

/// Materialize a hash key back into a value reference. Folded keys rebuild
/// a scalar cell; identity keys share the original cell.
pub fn hash_key_reference(
    heap: &mut GcHeap,
    globals: &GlobalData,
    key: &HashKey,
) -> Result<Reference, MintError> {
    match key {
        HashKey::Number(bits) => Ok(Reference::new(
            heap.alloc(Val::Number(f64::from_bits(*bits)))?,
        )),
        HashKey::Boolean(value) => Ok(Reference::new(heap.alloc(Val::Boolean(*value))?)),
        HashKey::String(text) => globals.alloc_string(heap, text.clone()),
        HashKey::Identity(handle) => Ok(Reference::new(*handle)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_ring_buffer_fifo() {
        let mut items = ItemsIterator::new();
        items.yield_item(Reference::new(Handle(1)));
        items.yield_item(Reference::new(Handle(2)));

        assert_eq!(items.value().unwrap().handle, Handle(1));
        assert_eq!(items.last().unwrap().handle, Handle(2));
        items.next();
        assert_eq!(items.value().unwrap().handle, Handle(2));
        items.next();
        assert!(items.is_empty());
    }

    #[test]
    fn inclusive_range_walks_both_directions() {
        let mut heap = GcHeap::new();

        let mut up = RangeIterator::inclusive(&mut heap, 1.0, 5.0).unwrap();
        let mut produced = Vec::new();
        while !up.is_empty(&heap) {
            produced.push(heap.get(up.value().handle).as_number().unwrap());
            up.next(&mut heap).unwrap();
        }
        assert_eq!(produced, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut down = RangeIterator::inclusive(&mut heap, 5.0, 1.0).unwrap();
        let mut produced = Vec::new();
        while !down.is_empty(&heap) {
            produced.push(heap.get(down.value().handle).as_number().unwrap());
            down.next(&mut heap).unwrap();
        }
        assert_eq!(produced, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn exclusive_range_stops_before_bound() {
        let mut heap = GcHeap::new();

        let mut down = RangeIterator::exclusive(&mut heap, 5.0, 1.0).unwrap();
        let mut produced = Vec::new();
        while !down.is_empty(&heap) {
            produced.push(heap.get(down.value().handle).as_number().unwrap());
            down.next(&mut heap).unwrap();
        }
        assert_eq!(produced, vec![5.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn range_rejects_yield() {
        let mut heap = GcHeap::new();
        let range = RangeIterator::inclusive(&mut heap, 1.0, 3.0).unwrap();
        let mut context = IteratorContext::Range(range);
        assert!(context.yield_item(Reference::new(Handle(0))).is_err());
    }

    #[test]
    fn range_size_counts_remaining() {
        let mut heap = GcHeap::new();
        let mut range = RangeIterator::inclusive(&mut heap, 1.0, 5.0).unwrap();
        assert_eq!(range.size(&heap), 5);
        range.next(&mut heap).unwrap();
        assert_eq!(range.size(&heap), 4);
    }
}
