//! Process-global data: the interner, the class table with its builtin
//! singletons, the package tree, and the builtin callable registry.
//!
//! Everything here is shared under the step lock and is part of the GC
//! root set; cells created at bootstrap are pinned so they behave as
//! strong roots for the whole run.

use crate::compiler::chunk::ConstValue;
use crate::core::error::MintError;
use crate::core::gc::{GcHeap, Trace};
use crate::core::interner::Interner;
use crate::core::value::{
    ClassId, FunctionHandle, FunctionValue, Handle, Library, Metatype, ModuleId, Object,
    PackageId, Payload, Reference, RefFlags, Symbol, Val, INVALID_OFFSET,
};
use crate::runtime::class::{
    Class, ClassDescription, ClassOperator, MemberInfo, MemberKind,
};
use crate::runtime::package::Package;
use crate::vm::cursor::Machine;
use crate::vm::iterator::IteratorContext;

pub type BuiltinFn = fn(&mut Machine) -> Result<(), MintError>;

/// A host-implemented callable; `arity` counts the receiver.
pub struct BuiltinMethod {
    pub arity: usize,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for BuiltinMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinMethod")
            .field("arity", &self.arity)
            .finish()
    }
}

/// Interned names the runtime looks up on hot paths.
#[derive(Debug, Clone, Copy)]
pub struct Names {
    pub va_args: Symbol,
    pub new_member: Symbol,
    pub print: Symbol,
    pub next: Symbol,
    pub value: Symbol,
    pub is_empty: Symbol,
    pub size: Symbol,
}

#[derive(Debug)]
pub struct GlobalData {
    pub interner: Interner,
    pub classes: Vec<Class>,
    pub packages: Vec<Package>,
    pub builtins: Vec<BuiltinMethod>,
    pub names: Names,
    builtin_classes: [ClassId; 8],
}

fn metatype_index(metatype: Metatype) -> usize {
    match metatype {
        Metatype::Object => 0,
        Metatype::String => 1,
        Metatype::Regex => 2,
        Metatype::Array => 3,
        Metatype::Hash => 4,
        Metatype::Iterator => 5,
        Metatype::Library => 6,
        Metatype::LibObject => 7,
    }
}

impl GlobalData {
    /// Build the root package, the builtin class singletons and their
    /// builtin members.
    pub fn bootstrap(heap: &mut GcHeap) -> Result<Self, MintError> {
        let mut interner = Interner::new();
        let names = Names {
            va_args: interner.intern("va_args"),
            new_member: interner.intern("new"),
            print: interner.intern("print"),
            next: interner.intern("next"),
            value: interner.intern("value"),
            is_empty: interner.intern("isEmpty"),
            size: interner.intern("size"),
        };

        let mut globals = Self {
            interner,
            classes: Vec::new(),
            packages: vec![Package::new(String::new(), None)],
            builtins: Vec::new(),
            names,
            builtin_classes: [ClassId(0); 8],
        };

        for metatype in [
            Metatype::Object,
            Metatype::String,
            Metatype::Regex,
            Metatype::Array,
            Metatype::Hash,
            Metatype::Iterator,
            Metatype::Library,
            Metatype::LibObject,
        ] {
            let id = ClassId(globals.classes.len() as u32);
            globals.classes.push(Class::new(
                metatype.name().to_string(),
                metatype,
                PackageId::ROOT,
            ));
            globals.builtin_classes[metatype_index(metatype)] = id;
        }

        globals.install_builtin_members(heap)?;
        Ok(globals)
    }

    fn install_builtin_members(&mut self, heap: &mut GcHeap) -> Result<(), MintError> {
        let names = self.names;

        let iterator = self.builtin_class(Metatype::Iterator);
        self.create_builtin_member(heap, iterator, names.next, 1, builtin_iterator_next)?;
        self.create_builtin_member(heap, iterator, names.value, 1, builtin_iterator_value)?;
        self.create_builtin_member(heap, iterator, names.is_empty, 1, builtin_iterator_is_empty)?;

        let array = self.builtin_class(Metatype::Array);
        self.create_builtin_member(heap, array, names.size, 1, builtin_container_size)?;
        self.create_builtin_member(heap, array, names.is_empty, 1, builtin_container_is_empty)?;

        let hash = self.builtin_class(Metatype::Hash);
        self.create_builtin_member(heap, hash, names.size, 1, builtin_container_size)?;
        self.create_builtin_member(heap, hash, names.is_empty, 1, builtin_container_is_empty)?;

        let string = self.builtin_class(Metatype::String);
        self.create_builtin_member(heap, string, names.size, 1, builtin_container_size)?;
        self.create_builtin_member(heap, string, names.is_empty, 1, builtin_container_is_empty)?;

        Ok(())
    }

    fn create_builtin_member(
        &mut self,
        heap: &mut GcHeap,
        class: ClassId,
        symbol: Symbol,
        arity: usize,
        func: BuiltinFn,
    ) -> Result<(), MintError> {
        let index = self.builtins.len();
        self.builtins.push(BuiltinMethod { arity, func });

        let value = FunctionValue::single(
            arity as i32,
            FunctionHandle {
                module: ModuleId::BUILTIN,
                offset: index,
                generator: false,
            },
        );
        let handle = heap.alloc(Val::Function(value))?;
        heap.pin(handle);

        self.classes[class.0 as usize].members.insert(
            symbol,
            MemberInfo {
                offset: INVALID_OFFSET,
                value: Reference::with_flags(handle, RefFlags::CONST_ADDRESS),
                flags: RefFlags::CONST_ADDRESS,
            },
        );
        Ok(())
    }

    pub fn builtin_class(&self, metatype: Metatype) -> ClassId {
        self.builtin_classes[metatype_index(metatype)]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0 as usize]
    }

    pub fn get_or_create_package(&mut self, parent: PackageId, symbol: Symbol) -> PackageId {
        if let Some(existing) = self.package(parent).find_package(symbol) {
            return existing;
        }
        let name = self.interner.name(symbol);
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(Package::new(name, Some(parent)));
        self.package_mut(parent).packages.insert(symbol, id);
        id
    }

    // Allocation helpers for builtin-typed objects.

    pub fn alloc_string(&self, heap: &mut GcHeap, text: String) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::String);
        let handle = heap.alloc(Val::Object(Object::new(class, Payload::String(text))))?;
        Ok(Reference::new(handle))
    }

    pub fn alloc_array(
        &self,
        heap: &mut GcHeap,
        values: Vec<Reference>,
    ) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::Array);
        let handle = heap.alloc(Val::Object(Object::new(class, Payload::Array(values))))?;
        Ok(Reference::new(handle))
    }

    pub fn alloc_hash(
        &self,
        heap: &mut GcHeap,
        values: indexmap::IndexMap<crate::core::value::HashKey, Reference>,
    ) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::Hash);
        let handle = heap.alloc(Val::Object(Object::new(class, Payload::Hash(values))))?;
        Ok(Reference::new(handle))
    }

    pub fn alloc_iterator(
        &self,
        heap: &mut GcHeap,
        context: IteratorContext,
    ) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::Iterator);
        let handle = heap.alloc(Val::Object(Object::new(class, Payload::Iterator(context))))?;
        Ok(Reference::new(handle))
    }

    pub fn alloc_regex(
        &self,
        heap: &mut GcHeap,
        data: crate::core::value::RegexData,
    ) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::Regex);
        let handle = heap.alloc(Val::Object(Object::new(class, Payload::Regex(data))))?;
        Ok(Reference::new(handle))
    }

    pub fn alloc_library(&self, heap: &mut GcHeap) -> Result<Reference, MintError> {
        let class = self.builtin_class(Metatype::Library);
        let handle = heap.alloc(Val::Object(Object::new(
            class,
            Payload::Library(Library::default()),
        )))?;
        Ok(Reference::new(handle))
    }

    /// Materialize a constant-table entry into a fresh cell.
    pub fn materialize_const(
        &self,
        heap: &mut GcHeap,
        constant: &ConstValue,
        module: ModuleId,
    ) -> Result<Reference, MintError> {
        match constant {
            ConstValue::None => Ok(Reference::new(heap.alloc(Val::None)?)),
            ConstValue::Null => Ok(Reference::new(heap.alloc(Val::Null)?)),
            ConstValue::Boolean(value) => Ok(Reference::new(heap.alloc(Val::Boolean(*value))?)),
            ConstValue::Number(value) => Ok(Reference::new(heap.alloc(Val::Number(*value))?)),
            ConstValue::String(text) => self.alloc_string(heap, text.clone()),
            ConstValue::Regex(data) => self.alloc_regex(heap, data.clone()),
            ConstValue::Function(proto) => Ok(Reference::new(
                heap.alloc(Val::Function(proto.materialize(module)))?,
            )),
        }
    }

    /// Realize a class description into a runtime class: flatten base
    /// members, lay out slot offsets, allocate default cells, install
    /// operator overloads, register the class and bind its prototype in
    /// the package.
    pub fn generate_class(
        &mut self,
        heap: &mut GcHeap,
        package: PackageId,
        description: &ClassDescription,
        module: ModuleId,
    ) -> Result<ClassId, MintError> {
        let name = self.interner.name(description.name);
        let mut class = Class::new(name.clone(), Metatype::Object, package);

        for base_symbol in &description.bases {
            let base_id = self
                .package(package)
                .find_class(*base_symbol)
                .or_else(|| self.package(PackageId::ROOT).find_class(*base_symbol))
                .ok_or_else(|| MintError::UndefinedSymbol {
                    name: self.interner.name(*base_symbol),
                })?;
            let base = self.class(base_id);
            for (symbol, member) in &base.members {
                class.members.insert(*symbol, member.clone());
            }
            for (symbol, global) in &base.globals {
                class.globals.insert(*symbol, *global);
            }
            for (index, operator) in base.operators.iter().enumerate() {
                if class.operators[index].is_none() {
                    class.operators[index] = *operator;
                }
            }
            class.slot_count = class.slot_count.max(base.slot_count);
        }

        for member in &description.members {
            let flags = RefFlags(member.flags);
            match &member.kind {
                MemberKind::Variable(default) => {
                    let offset = match class.members.get(&member.symbol) {
                        // A base already declared this variable; the
                        // override keeps its slot.
                        Some(existing) if existing.offset != INVALID_OFFSET => existing.offset,
                        _ => {
                            let offset = class.slot_count;
                            class.slot_count += 1;
                            offset
                        }
                    };
                    let value = self.materialize_const(heap, default, module)?;
                    heap.pin(value.handle);
                    class.members.insert(
                        member.symbol,
                        MemberInfo {
                            offset,
                            value,
                            flags,
                        },
                    );
                }
                MemberKind::Global(default) => {
                    let value = self.materialize_const(heap, default, module)?;
                    heap.pin(value.handle);
                    class.globals.insert(
                        member.symbol,
                        Reference::with_flags(value.handle, flags),
                    );
                }
                MemberKind::Method(proto) => {
                    let materialized = proto.materialize(module);
                    match class.members.get_mut(&member.symbol) {
                        Some(existing) if existing.offset == INVALID_OFFSET => {
                            // Redeclaration with another signature
                            // overloads the inherited or earlier body.
                            if let Val::Function(function) = heap.get_mut(existing.value.handle) {
                                function.merge(&materialized);
                                continue;
                            }
                            let handle = heap.alloc(Val::Function(materialized))?;
                            heap.pin(handle);
                            existing.value = Reference::with_flags(handle, flags);
                        }
                        _ => {
                            let handle = heap.alloc(Val::Function(materialized))?;
                            heap.pin(handle);
                            class.members.insert(
                                member.symbol,
                                MemberInfo {
                                    offset: INVALID_OFFSET,
                                    value: Reference::with_flags(handle, flags),
                                    flags,
                                },
                            );
                        }
                    }
                }
                MemberKind::Operator(operator, proto) => {
                    let handle = heap.alloc(Val::Function(proto.materialize(module)))?;
                    heap.pin(handle);
                    class.operators[operator.index()] =
                        Some(Reference::with_flags(handle, flags));
                }
            }
        }

        let id = ClassId(self.classes.len() as u32);
        let prototype = heap.alloc(Val::Object(Object {
            class: id,
            slots: Vec::new(),
            payload: Payload::User,
            prototype: true,
        }))?;
        heap.pin(prototype);
        class.prototype = Some(Reference::with_flags(
            prototype,
            RefFlags::CONST_ADDRESS | RefFlags::CONST_VALUE,
        ));

        self.classes.push(class);
        let prototype_ref = Reference::with_flags(
            prototype,
            RefFlags::CONST_ADDRESS | RefFlags::CONST_VALUE,
        );
        let package_data = self.package_mut(package);
        package_data.register_class(description.name, id);
        package_data.symbols.insert(description.name, prototype_ref);
        Ok(id)
    }

    /// Name used in diagnostics for the value's dynamic type.
    pub fn type_name(&self, heap: &GcHeap, handle: Handle) -> String {
        match heap.get(handle) {
            Val::Object(object) => self.class(object.class).name.clone(),
            other => other.format_name().to_string(),
        }
    }

    /// Class operator table entry for an object value, following §4.5
    /// lookup: the object's class only (builtins install their overloads
    /// at bootstrap).
    pub fn find_operator(&self, heap: &GcHeap, handle: Handle, operator: ClassOperator) -> Option<Reference> {
        match heap.get(handle) {
            Val::Object(object) => self.class(object.class).find_operator(operator),
            _ => None,
        }
    }
}

impl Trace for GlobalData {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        for class in &self.classes {
            class.trace(mark);
        }
        for package in &self.packages {
            package.trace(mark);
        }
    }
}

// Builtin members. Each consumes its receiver (and arguments) from the
// operand stack and pushes its result.

fn builtin_iterator_next(machine: &mut Machine) -> Result<(), MintError> {
    let receiver = machine.pop()?;
    let empty = crate::vm::iterator::context_of(&machine.state.heap, receiver.handle)?
        .is_empty(&machine.state.heap);
    if empty {
        let none = machine.state.heap.alloc(Val::None)?;
        machine.push(Reference::new(none));
        return Ok(());
    }
    let value = crate::vm::iterator::context_of(&machine.state.heap, receiver.handle)?
        .value(&machine.state.heap)
        .ok_or(MintError::StackUnderflow { operation: "next" })?;
    // The advance can resume a suspended body, so push the value first.
    machine.push(value.share());
    machine.iterator_advance(receiver.handle)
}

fn builtin_iterator_value(machine: &mut Machine) -> Result<(), MintError> {
    let receiver = machine.pop()?;
    let value = crate::vm::iterator::context_of(&machine.state.heap, receiver.handle)?
        .value(&machine.state.heap);
    match value {
        Some(value) => machine.push(value.share()),
        None => {
            let none = machine.state.heap.alloc(Val::None)?;
            machine.push(Reference::new(none));
        }
    }
    Ok(())
}

fn builtin_iterator_is_empty(machine: &mut Machine) -> Result<(), MintError> {
    let receiver = machine.pop()?;
    let empty = crate::vm::iterator::context_of(&machine.state.heap, receiver.handle)?
        .is_empty(&machine.state.heap);
    let result = machine.state.heap.alloc(Val::Boolean(empty))?;
    machine.push(Reference::new(result));
    Ok(())
}

fn container_len(machine: &Machine, handle: Handle) -> Result<usize, MintError> {
    match machine.state.heap.get(handle) {
        Val::Object(object) => match &object.payload {
            Payload::String(text) => Ok(text.chars().count()),
            Payload::Array(values) => Ok(values.len()),
            Payload::Hash(values) => Ok(values.len()),
            Payload::Iterator(context) => Ok(context.size(&machine.state.heap)),
            _ => Err(MintError::TypeMismatch {
                expected: "container",
                got: machine.state.globals.type_name(&machine.state.heap, handle),
                operation: "size",
            }),
        },
        other => Err(MintError::TypeMismatch {
            expected: "container",
            got: other.format_name().to_string(),
            operation: "size",
        }),
    }
}

fn builtin_container_size(machine: &mut Machine) -> Result<(), MintError> {
    let receiver = machine.pop()?;
    let len = container_len(machine, receiver.handle)?;
    let result = machine.state.heap.alloc(Val::Number(len as f64))?;
    machine.push(Reference::new(result));
    Ok(())
}

fn builtin_container_is_empty(machine: &mut Machine) -> Result<(), MintError> {
    let receiver = machine.pop()?;
    let len = container_len(machine, receiver.handle)?;
    let result = machine.state.heap.alloc(Val::Boolean(len == 0))?;
    machine.push(Reference::new(result));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::FunctionProto;
    use crate::runtime::class::{ClassDescription, MemberDescription};

    fn description(
        globals: &mut GlobalData,
        name: &str,
        members: Vec<MemberDescription>,
    ) -> ClassDescription {
        ClassDescription {
            name: globals.interner.intern(name),
            bases: Vec::new(),
            members,
        }
    }

    #[test]
    fn generation_lays_out_slots_in_declaration_order() {
        let mut heap = GcHeap::new();
        let mut globals = GlobalData::bootstrap(&mut heap).unwrap();

        let x = globals.interner.intern("x");
        let y = globals.interner.intern("y");
        let area = globals.interner.intern("area");
        let members = vec![
            MemberDescription {
                symbol: x,
                flags: 0,
                kind: MemberKind::Variable(ConstValue::Number(0.0)),
            },
            MemberDescription {
                symbol: y,
                flags: 0,
                kind: MemberKind::Variable(ConstValue::Number(0.0)),
            },
            MemberDescription {
                symbol: area,
                flags: 0,
                kind: MemberKind::Method(FunctionProto::single(1, 10, false)),
            },
        ];
        let description = description(&mut globals, "Rect", members);
        let id = globals
            .generate_class(&mut heap, PackageId::ROOT, &description, ModuleId(0))
            .unwrap();

        let class = globals.class(id);
        assert_eq!(class.slot_count, 2);
        assert_eq!(class.find_member(x).unwrap().offset, 0);
        assert_eq!(class.find_member(y).unwrap().offset, 1);
        assert_eq!(class.find_member(area).unwrap().offset, INVALID_OFFSET);

        // The class name resolves to its prototype in the package.
        let binding = globals
            .package(PackageId::ROOT)
            .symbols
            .get(description.name)
            .unwrap();
        assert!(matches!(
            heap.get(binding.handle),
            Val::Object(object) if object.prototype
        ));
    }

    #[test]
    fn base_members_flatten_before_derived() {
        let mut heap = GcHeap::new();
        let mut globals = GlobalData::bootstrap(&mut heap).unwrap();

        let a = globals.interner.intern("a");
        let b = globals.interner.intern("b");
        let base = description(
            &mut globals,
            "Base",
            vec![MemberDescription {
                symbol: a,
                flags: 0,
                kind: MemberKind::Variable(ConstValue::Number(1.0)),
            }],
        );
        globals
            .generate_class(&mut heap, PackageId::ROOT, &base, ModuleId(0))
            .unwrap();

        let derived = ClassDescription {
            name: globals.interner.intern("Derived"),
            bases: vec![base.name],
            members: vec![MemberDescription {
                symbol: b,
                flags: 0,
                kind: MemberKind::Variable(ConstValue::Number(2.0)),
            }],
        };
        let id = globals
            .generate_class(&mut heap, PackageId::ROOT, &derived, ModuleId(0))
            .unwrap();

        let class = globals.class(id);
        assert_eq!(class.slot_count, 2);
        assert_eq!(class.find_member(a).unwrap().offset, 0);
        assert_eq!(class.find_member(b).unwrap().offset, 1);
    }

    #[test]
    fn constructed_instances_match_their_layout() {
        let mut heap = GcHeap::new();
        let mut globals = GlobalData::bootstrap(&mut heap).unwrap();

        let label = globals.interner.intern("label");
        let description = description(
            &mut globals,
            "Tag",
            vec![MemberDescription {
                symbol: label,
                flags: 0,
                kind: MemberKind::Variable(ConstValue::String("tag".to_string())),
            }],
        );
        let id = globals
            .generate_class(&mut heap, PackageId::ROOT, &description, ModuleId(0))
            .unwrap();

        let instance = heap
            .alloc(Val::Object(Object::new(id, Payload::User)))
            .unwrap();
        crate::runtime::class::construct_object(&mut heap, &globals, id, instance).unwrap();

        match heap.get(instance) {
            Val::Object(object) => {
                // The slot array length equals the declared member count.
                assert_eq!(object.slots.len(), 1);
                let default = heap.get(object.slots[0].handle);
                assert_eq!(default.as_string(), Some("tag"));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn construct_rejects_wrong_formats() {
        let mut heap = GcHeap::new();
        let mut globals = GlobalData::bootstrap(&mut heap).unwrap();
        let description = description(&mut globals, "Empty", Vec::new());
        let id = globals
            .generate_class(&mut heap, PackageId::ROOT, &description, ModuleId(0))
            .unwrap();

        let number = heap.alloc(Val::Number(1.0)).unwrap();
        let result = crate::runtime::class::construct_object(&mut heap, &globals, id, number);
        assert!(matches!(result, Err(MintError::TypeMismatch { .. })));
    }
}
