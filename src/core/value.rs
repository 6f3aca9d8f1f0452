use crate::vm::iterator::IteratorContext;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Index of a value cell in the garbage-collected heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// Interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Symbol(pub u32);

/// Index into the global class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Index into the global package tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(pub u32);

impl PackageId {
    /// The root package; toplevel module symbols land here.
    pub const ROOT: PackageId = PackageId(0);
}

/// Identifier of a compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Sentinel module owning builtin callables instead of bytecode.
    pub const BUILTIN: ModuleId = ModuleId(u32::MAX);
}

/// Marks a class member that has no instance slot (static globals).
pub const INVALID_OFFSET: usize = usize::MAX;

/// Access and mutability bits carried by a [`Reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefFlags(pub u8);

impl RefFlags {
    pub const DEFAULT: RefFlags = RefFlags(0x00);
    /// The handle may not be rebound.
    pub const CONST_ADDRESS: RefFlags = RefFlags(0x01);
    /// The pointee may not be mutated.
    pub const CONST_VALUE: RefFlags = RefFlags(0x02);
    pub const GLOBAL: RefFlags = RefFlags(0x04);
    pub const PRIVATE: RefFlags = RefFlags(0x08);
    pub const PROTECTED: RefFlags = RefFlags(0x10);
    pub const PACKAGE: RefFlags = RefFlags(0x20);

    pub fn contains(self, other: RefFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RefFlags {
    type Output = RefFlags;

    fn bitor(self, rhs: RefFlags) -> RefFlags {
        RefFlags(self.0 | rhs.0)
    }
}

/// A handle to a heap cell plus its access flags.
///
/// References are freely copyable; two references holding the same handle
/// observe the same cell. Strong-root behavior is not a reference kind but a
/// pin count on the cell itself (see `GcHeap::pin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub handle: Handle,
    pub flags: RefFlags,
}

impl Reference {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            flags: RefFlags::DEFAULT,
        }
    }

    pub fn with_flags(handle: Handle, flags: RefFlags) -> Self {
        Self { handle, flags }
    }

    /// Another handle to the same cell.
    pub fn share(&self) -> Reference {
        *self
    }

    pub fn is_const_value(&self) -> bool {
        self.flags.contains(RefFlags::CONST_VALUE)
    }

    pub fn is_const_address(&self) -> bool {
        self.flags.contains(RefFlags::CONST_ADDRESS)
    }
}

/// The format axis of every heap cell.
#[derive(Debug)]
pub enum Val {
    /// Absent value; not raisable, rejected by every operator.
    None,
    /// The raisable null marker.
    Null,
    Number(f64),
    Boolean(bool),
    Object(Object),
    Package(PackageId),
    Function(FunctionValue),
}

impl Val {
    pub fn format_name(&self) -> &'static str {
        match self {
            Val::None => "none",
            Val::Null => "null",
            Val::Number(_) => "number",
            Val::Boolean(_) => "boolean",
            Val::Object(_) => "object",
            Val::Package(_) => "package",
            Val::Function(_) => "function",
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Val::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Val::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Val::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Val::Object(object) => match &object.payload {
                Payload::String(text) => Some(text),
                _ => None,
            },
            _ => None,
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::None, Val::None) => true,
            (Val::Null, Val::Null) => true,
            (Val::Number(a), Val::Number(b)) => a == b,
            (Val::Boolean(a), Val::Boolean(b)) => a == b,
            (Val::Object(a), Val::Object(b)) => match (&a.payload, &b.payload) {
                (Payload::String(a), Payload::String(b)) => a == b,
                _ => false,
            },
            (Val::Package(a), Val::Package(b)) => a == b,
            _ => false,
        }
    }
}

/// Builtin object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metatype {
    Object,
    String,
    Regex,
    Array,
    Hash,
    Iterator,
    Library,
    LibObject,
}

impl Metatype {
    pub fn name(self) -> &'static str {
        match self {
            Metatype::Object => "object",
            Metatype::String => "string",
            Metatype::Regex => "regex",
            Metatype::Array => "array",
            Metatype::Hash => "hash",
            Metatype::Iterator => "iterator",
            Metatype::Library => "library",
            Metatype::LibObject => "libobject",
        }
    }
}

/// A value of format `object`: class metadata, instance member slots, and
/// the metatype payload for builtin container kinds.
#[derive(Debug)]
pub struct Object {
    pub class: ClassId,
    /// One slot per declared instance member; the class layout maps member
    /// symbols to offsets in this array.
    pub slots: Vec<Reference>,
    pub payload: Payload,
    /// Set on the cell a class name resolves to; calling it instantiates.
    pub prototype: bool,
}

impl Object {
    pub fn new(class: ClassId, payload: Payload) -> Self {
        Self {
            class,
            slots: Vec::new(),
            payload,
            prototype: false,
        }
    }

    pub fn metatype(&self) -> Metatype {
        match &self.payload {
            Payload::User => Metatype::Object,
            Payload::String(_) => Metatype::String,
            Payload::Regex(_) => Metatype::Regex,
            Payload::Array(_) => Metatype::Array,
            Payload::Hash(_) => Metatype::Hash,
            Payload::Iterator(_) => Metatype::Iterator,
            Payload::Library(_) => Metatype::Library,
        }
    }
}

/// Metatype-specific storage of an [`Object`].
#[derive(Debug)]
pub enum Payload {
    /// Plain user object; state lives in the member slots.
    User,
    /// Owned UTF-8 text, indexed by code points.
    String(String),
    Regex(RegexData),
    Array(Vec<Reference>),
    Hash(IndexMap<HashKey, Reference>),
    Iterator(IteratorContext),
    Library(Library),
}

/// Compiled pattern plus the `/.../flags` text it came from.
#[derive(Debug, Clone)]
pub struct RegexData {
    pub initializer: String,
    pub pattern: regex::Regex,
}

/// Placeholder for a loadable plugin; resolution is delegated to the host.
#[derive(Debug, Default)]
pub struct Library {
    pub path: Option<String>,
}

/// Key of a hash entry. Numbers, booleans and strings fold to comparable
/// keys; every other value keys by cell identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Number(u64),
    Boolean(bool),
    String(String),
    Identity(Handle),
}

impl HashKey {
    pub fn from_number(value: f64) -> Self {
        // Fold -0.0 with 0.0 so both index the same entry.
        let normalized = if value == 0.0 { 0.0 } else { value };
        HashKey::Number(normalized.to_bits())
    }
}

/// One callable body: where it starts and how it enters.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHandle {
    pub module: ModuleId,
    /// Entry instruction offset, or the builtin index for
    /// [`ModuleId::BUILTIN`] handles.
    pub offset: usize,
    pub generator: bool,
}

/// A polymorphic callable: a map from signature to handle.
///
/// Exact arities key positive entries; a body taking `n` fixed parameters
/// plus extras keys `-(n + 1)`. Extra arguments are packed into a `va_args`
/// iterator at function entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionValue {
    pub mapping: BTreeMap<i32, FunctionHandle>,
    /// Captured bindings injected into the callee frame, set on closures.
    pub capture: Option<IndexMap<Symbol, Reference>>,
}

impl FunctionValue {
    pub fn single(signature: i32, handle: FunctionHandle) -> Self {
        let mut mapping = BTreeMap::new();
        mapping.insert(signature, handle);
        Self {
            mapping,
            capture: None,
        }
    }

    /// Pick the body for `argc` arguments: the exact arity if declared,
    /// otherwise the variadic signature with the most fixed parameters that
    /// still fits. Returns the handle and the extra-argument count.
    pub fn resolve(&self, argc: usize) -> Option<(&FunctionHandle, usize)> {
        if let Some(handle) = self.mapping.get(&(argc as i32)) {
            return Some((handle, 0));
        }
        self.mapping
            .iter()
            .filter_map(|(&signature, handle)| {
                if signature < 0 {
                    let fixed = (-signature - 1) as usize;
                    if fixed <= argc {
                        return Some((fixed, handle));
                    }
                }
                None
            })
            .max_by_key(|(fixed, _)| *fixed)
            .map(|(fixed, handle)| (handle, argc - fixed))
    }

    /// Merge the signatures of `other` into this value, the effect of a
    /// redeclaration with a different parameter list.
    pub fn merge(&mut self, other: &FunctionValue) {
        for (&signature, handle) in &other.mapping {
            self.mapping.insert(signature, handle.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(offset: usize) -> FunctionHandle {
        FunctionHandle {
            module: ModuleId(0),
            offset,
            generator: false,
        }
    }

    #[test]
    fn resolve_exact_arity() {
        let mut value = FunctionValue::single(1, handle(10));
        value.merge(&FunctionValue::single(2, handle(20)));

        assert_eq!(value.resolve(1).unwrap().0.offset, 10);
        assert_eq!(value.resolve(2).unwrap().0.offset, 20);
        assert!(value.resolve(3).is_none());
    }

    #[test]
    fn resolve_variadic_collects_extras() {
        let mut value = FunctionValue::single(1, handle(10));
        value.merge(&FunctionValue::single(-3, handle(20)));

        // Two fixed parameters plus extras.
        let (body, extra) = value.resolve(5).unwrap();
        assert_eq!(body.offset, 20);
        assert_eq!(extra, 3);

        // The exact arity still wins when declared.
        let (body, extra) = value.resolve(1).unwrap();
        assert_eq!(body.offset, 10);
        assert_eq!(extra, 0);
    }

    #[test]
    fn hash_key_folds_signed_zero() {
        assert_eq!(HashKey::from_number(0.0), HashKey::from_number(-0.0));
        assert_ne!(HashKey::from_number(1.0), HashKey::from_number(2.0));
    }
}
