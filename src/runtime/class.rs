//! Class descriptions and their runtime realization.
//!
//! A [`ClassDescription`] is the compile-time declaration; realizing it
//! (`GlobalData::generate_class`) lays out member offsets (flattening base
//! classes), allocates default cells, installs operator overloads and
//! produces the runtime [`Class`] plus the prototype cell its name
//! resolves to.

use crate::compiler::chunk::FunctionProto;
use crate::core::error::MintError;
use crate::core::gc::{GcHeap, Trace};
use crate::core::value::{
    ClassId, Handle, Metatype, PackageId, Reference, RefFlags, Symbol, Val, INVALID_OFFSET,
};
use indexmap::IndexMap;

/// Overloadable operator kinds, one slot per kind in the class operator
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOperator {
    New,
    Delete,
    Copy,
    Call,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    In,
    Is,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Inc,
    Dec,
    Not,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Pos,
    Neg,
    ShiftLeft,
    ShiftRight,
    InclusiveRange,
    ExclusiveRange,
    Subscript,
    SubscriptMove,
    RegexMatch,
    RegexUnmatch,
}

pub const OPERATOR_COUNT: usize = ClassOperator::RegexUnmatch as usize + 1;

impl ClassOperator {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol_text(self) -> &'static str {
        match self {
            ClassOperator::New => "new",
            ClassOperator::Delete => "delete",
            ClassOperator::Copy => ":=",
            ClassOperator::Call => "()",
            ClassOperator::Add => "+",
            ClassOperator::Sub => "-",
            ClassOperator::Mul => "*",
            ClassOperator::Div => "/",
            ClassOperator::Pow => "**",
            ClassOperator::Mod => "%",
            ClassOperator::In => "in",
            ClassOperator::Is => "is",
            ClassOperator::Eq => "==",
            ClassOperator::Ne => "!=",
            ClassOperator::Lt => "<",
            ClassOperator::Gt => ">",
            ClassOperator::Le => "<=",
            ClassOperator::Ge => ">=",
            ClassOperator::Inc => "++",
            ClassOperator::Dec => "--",
            ClassOperator::Not => "!",
            ClassOperator::And => "&&",
            ClassOperator::Or => "||",
            ClassOperator::BitAnd => "&",
            ClassOperator::BitOr => "|",
            ClassOperator::BitXor => "^",
            ClassOperator::BitNot => "~",
            ClassOperator::Pos => "+(unary)",
            ClassOperator::Neg => "-(unary)",
            ClassOperator::ShiftLeft => "<<",
            ClassOperator::ShiftRight => ">>",
            ClassOperator::InclusiveRange => "..",
            ClassOperator::ExclusiveRange => "...",
            ClassOperator::Subscript => "[]",
            ClassOperator::SubscriptMove => "[]=",
            ClassOperator::RegexMatch => "=~",
            ClassOperator::RegexUnmatch => "!~",
        }
    }
}

/// One declared member after layout: its slot offset (or
/// [`INVALID_OFFSET`] for methods and statics) and its default cell.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub offset: usize,
    /// Template cell cloned into the instance slot at construction, or the
    /// shared function cell for methods.
    pub value: Reference,
    pub flags: RefFlags,
}

/// Runtime descriptor of a user or builtin type.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub metatype: Metatype,
    pub members: IndexMap<Symbol, MemberInfo>,
    /// Class-level (static) bindings.
    pub globals: IndexMap<Symbol, Reference>,
    pub operators: Vec<Option<Reference>>,
    pub package: PackageId,
    /// Number of instance slots; equals the declared variable count.
    pub slot_count: usize,
    /// The cell the class name resolves to.
    pub prototype: Option<Reference>,
}

impl Class {
    pub fn new(name: String, metatype: Metatype, package: PackageId) -> Self {
        Self {
            name,
            metatype,
            members: IndexMap::new(),
            globals: IndexMap::new(),
            operators: vec![None; OPERATOR_COUNT],
            package,
            slot_count: 0,
            prototype: None,
        }
    }

    pub fn find_member(&self, symbol: Symbol) -> Option<&MemberInfo> {
        self.members.get(&symbol)
    }

    pub fn find_operator(&self, operator: ClassOperator) -> Option<Reference> {
        self.operators[operator.index()]
    }
}

impl Trace for Class {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        for member in self.members.values() {
            mark(member.value.handle);
        }
        for global in self.globals.values() {
            mark(global.handle);
        }
        for operator in self.operators.iter().flatten() {
            mark(operator.handle);
        }
        if let Some(prototype) = &self.prototype {
            mark(prototype.handle);
        }
    }
}

/// What a declared member is backed by.
#[derive(Debug, Clone)]
pub enum MemberKind {
    /// Instance variable with a constant default.
    Variable(crate::compiler::chunk::ConstValue),
    /// Class-level binding shared by all instances.
    Global(crate::compiler::chunk::ConstValue),
    Method(FunctionProto),
    Operator(ClassOperator, FunctionProto),
}

#[derive(Debug, Clone)]
pub struct MemberDescription {
    pub symbol: Symbol,
    pub flags: u8,
    pub kind: MemberKind,
}

/// Compile-time class declaration, realized by [`generate`].
#[derive(Debug, Clone)]
pub struct ClassDescription {
    pub name: Symbol,
    pub bases: Vec<Symbol>,
    pub members: Vec<MemberDescription>,
}

/// Run a fresh object's initialization: size the slot array and clone each
/// declared variable's default into its slot.
pub fn construct_object(
    heap: &mut GcHeap,
    globals: &crate::runtime::global::GlobalData,
    class_id: ClassId,
    handle: Handle,
) -> Result<(), MintError> {
    let class = globals.class(class_id);
    let defaults: Vec<(usize, Handle)> = class
        .members
        .values()
        .filter(|member| member.offset != INVALID_OFFSET)
        .map(|member| (member.offset, member.value.handle))
        .collect();
    let slot_count = class.slot_count;

    let mut slots = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        slots.push(Reference::new(heap.alloc(Val::None)?));
    }
    for (offset, default) in defaults {
        let copy = heap.clone_cell(default)?;
        slots[offset] = Reference::new(copy);
    }

    match heap.get_mut(handle) {
        Val::Object(object) => {
            object.slots = slots;
            Ok(())
        }
        other => Err(MintError::TypeMismatch {
            expected: "object",
            got: other.format_name().to_string(),
            operation: "construct",
        }),
    }
}
