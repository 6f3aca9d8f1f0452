//! The cursor and its bytecode dispatch loop.
//!
//! A [`Cursor`] is one execution context: an operand stack of references, a
//! call stack of frames, and the waiting-call stack of partially-built call
//! sites. The interpreter is a reentrant step function over cursor state:
//! [`Machine::run_quantum`] executes a bounded number of instructions with
//! the step lock held, so a cursor can be parked mid-program and resumed on
//! any scheduler turn — generators are suspended and revived the same way.

use crate::compiler::chunk::{CodeChunk, ConstValue};
use crate::core::error::MintError;
use crate::core::gc::{GcHeap, Trace};
use crate::core::value::{
    Handle, Metatype, ModuleId, Object, PackageId, Payload, Reference, RefFlags, Symbol, Val,
};
use crate::runtime::class::{construct_object, ClassOperator};
use crate::runtime::global::GlobalData;
use crate::runtime::module::{AstRegistry, ModuleState};
use crate::vm::frame::{Frame, RetrievePoint, SavedState, WaitingCall};
use crate::vm::iterator::{
    context_of, context_of_mut, iterator_init, ExecutionMode, GeneratorIterator, IteratorContext,
    ItemsIterator,
};
use crate::vm::opcode::Op;
use crate::vm::ops;
use crate::vm::printer::Printer;
use std::collections::HashMap;
use std::sync::Arc;

/// Executed instructions per scheduler turn. Large enough that context
/// switches are rare.
pub const QUANTUM: usize = 64 * 1024;

/// One execution context.
#[derive(Debug, Default)]
pub struct Cursor {
    pub stack: Vec<Reference>,
    pub frames: Vec<Frame>,
    pub waiting_calls: Vec<WaitingCall>,
    /// Package context opened by the executing module, innermost last.
    pub packages: Vec<PackageId>,
    /// Process id of the cursor this one was forked from.
    pub parent: Option<u32>,
}

impl Cursor {
    pub fn new(module: ModuleId) -> Self {
        Self {
            stack: Vec::with_capacity(64),
            frames: vec![Frame::new(module, 0)],
            waiting_calls: Vec::new(),
            packages: Vec::new(),
            parent: None,
        }
    }

    /// Build a cursor around a parked generator activation.
    pub fn from_saved_state(state: SavedState) -> Self {
        Self {
            stack: Vec::new(),
            frames: vec![state.frame],
            waiting_calls: Vec::new(),
            packages: Vec::new(),
            parent: None,
        }
    }

    pub fn current_package(&self) -> PackageId {
        self.packages.last().copied().unwrap_or(PackageId::ROOT)
    }

    /// Call trace, innermost first: `(module, ip)` pairs.
    pub fn dump(&self) -> Vec<(ModuleId, usize)> {
        self.frames
            .iter()
            .rev()
            .map(|frame| (frame.module, frame.ip.saturating_sub(1)))
            .collect()
    }
}

impl Trace for Cursor {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        for reference in &self.stack {
            mark(reference.handle);
        }
        for frame in &self.frames {
            frame.trace(mark);
        }
        for call in &self.waiting_calls {
            call.trace(mark);
        }
    }
}

/// Everything shared under the step lock: the heap, the global tables, the
/// module registry, and the cursors parked between quanta.
#[derive(Debug)]
pub struct MachineState {
    pub heap: GcHeap,
    pub globals: GlobalData,
    pub registry: AstRegistry,
    /// Cursors of processes not currently running a quantum, keyed by
    /// process id; part of the GC root set.
    pub parked: HashMap<u32, Cursor>,
    /// Saved generator states queued for `create_generator`.
    pub pending_generators: Vec<SavedState>,
    pub exit_requested: Option<i32>,
    pub default_printer: Printer,
}

impl MachineState {
    pub fn new() -> Result<Self, MintError> {
        let mut heap = GcHeap::new();
        let globals = GlobalData::bootstrap(&mut heap)?;
        Ok(Self {
            heap,
            globals,
            registry: AstRegistry::new(),
            parked: HashMap::new(),
            pending_generators: Vec::new(),
            exit_requested: None,
            default_printer: Printer::Stdout,
        })
    }

    /// Roots for a collect cycle: the global tables, every parked cursor,
    /// every queued generator state, plus the running cursor if any.
    /// Pinned cells are roots on their own.
    pub fn gather_roots(&self, running: Option<&Cursor>) -> Vec<Handle> {
        let mut roots = Vec::new();
        {
            let mut mark = |handle: Handle| roots.push(handle);
            self.globals.trace(&mut mark);
            for cursor in self.parked.values() {
                cursor.trace(&mut mark);
            }
            for state in &self.pending_generators {
                state.trace(&mut mark);
            }
            if let Some(cursor) = running {
                cursor.trace(&mut mark);
            }
        }
        roots
    }

    /// Explicit collection at scheduler quiescence.
    pub fn collect_now(&mut self) -> usize {
        let roots = self.gather_roots(None);
        self.heap.collect(&roots)
    }
}

/// Outcome of a quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Quantum exhausted, more work remains.
    Continue,
    /// The cursor completed.
    Finished,
    /// `exit_exec` requested process-wide shutdown with this code.
    Exited(i32),
}

enum StepFlow {
    Continue,
    Finished,
    Exited(i32),
}

/// A cursor joined with the shared state for the duration of a quantum.
pub struct Machine<'a> {
    pub state: &'a mut MachineState,
    pub cursor: &'a mut Cursor,
}

impl<'a> Machine<'a> {
    pub fn new(state: &'a mut MachineState, cursor: &'a mut Cursor) -> Self {
        Self { state, cursor }
    }

    /// Run at most `quantum` instructions. Returns `Continue` while the
    /// cursor has more to do. A raised value that finds no retrieve point
    /// escapes as `MintError::Raised`.
    pub fn run_quantum(&mut self, quantum: usize) -> Result<RunStatus, MintError> {
        for _ in 0..quantum {
            self.maybe_collect();
            match self.step() {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Finished) => return Ok(RunStatus::Finished),
                Ok(StepFlow::Exited(code)) => return Ok(RunStatus::Exited(code)),
                Err(MintError::Raised(handle)) => {
                    // A language exception looking for its retrieve point.
                    self.raise_value(Reference::new(handle))?;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(RunStatus::Continue)
    }

    /// Execute frames until the call stack shrinks back to `depth`. Used
    /// to drain a finalized generator without leaving the current
    /// instruction.
    fn run_to_depth(&mut self, depth: usize) -> Result<(), MintError> {
        while self.cursor.frames.len() > depth {
            match self.step() {
                Ok(StepFlow::Continue) => {}
                Ok(_) => break,
                Err(MintError::Raised(handle)) => {
                    self.raise_value(Reference::new(handle))?;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn maybe_collect(&mut self) {
        if self.state.heap.should_collect() {
            let roots = self.state.gather_roots(Some(self.cursor));
            self.state.heap.collect(&roots);
        }
    }

    fn chunk(&self, module: ModuleId) -> Result<Arc<CodeChunk>, MintError> {
        self.state
            .registry
            .get(module)
            .map(|info| info.chunk.clone())
            .ok_or_else(|| MintError::System(format!("unknown module id {}", module.0)))
    }

    fn step(&mut self) -> Result<StepFlow, MintError> {
        let (module, ip) = match self.cursor.frames.last() {
            Some(frame) => (frame.module, frame.ip),
            None => return Ok(StepFlow::Finished),
        };
        let chunk = self.chunk(module)?;
        let op = match chunk.code.get(ip) {
            Some(op) => *op,
            None => return self.exit_module(),
        };
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame.ip += 1;
        }

        match op {
            Op::LoadModule(index) => self.load_module(&chunk, index)?,
            Op::LoadFast(symbol, index) => {
                let reference = self.load_fast(symbol, index as usize)?;
                self.push(reference);
            }
            Op::LoadSymbol(symbol) => {
                let reference = self.load_symbol(symbol)?;
                self.push(reference);
            }
            Op::LoadMember(symbol) => {
                let object = self.pop()?;
                let member = self.member_of(object, symbol)?;
                self.push(member);
            }
            Op::LoadOperator(operator) => {
                let object = self.pop()?;
                let entry = self
                    .state
                    .globals
                    .find_operator(&self.state.heap, object.handle, operator)
                    .ok_or_else(|| MintError::NoMatchingOperator {
                        operator: operator.symbol_text(),
                        lhs: self.state.globals.type_name(&self.state.heap, object.handle),
                    })?;
                self.push(entry);
            }
            Op::LoadConstant(index) => {
                let reference = self.materialize(&chunk, module, index)?;
                self.push(reference);
            }
            Op::LoadVarSymbol => {
                let name = self.pop_symbol_name()?;
                let symbol = self.state.globals.interner.intern(&name);
                let reference = self.load_symbol(symbol)?;
                self.push(reference);
            }
            Op::LoadVarMember => {
                let name = self.pop_symbol_name()?;
                let symbol = self.state.globals.interner.intern(&name);
                let object = self.pop()?;
                let member = self.member_of(object, symbol)?;
                self.push(member);
            }
            Op::CloneReference => {
                let original = self.pop()?;
                self.finalize_if_generator(original.handle)?;
                let copy = self.state.heap.clone_cell(original.handle)?;
                self.push(Reference::new(copy));
                self.push(original);
            }
            Op::ReloadReference => {
                let top = self.peek()?;
                self.push(top.share());
            }
            Op::UnloadReference => {
                self.pop()?;
            }
            Op::LoadExtraArguments => self.load_extra_arguments()?,
            Op::ResetSymbol(symbol) => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.erase(symbol);
                }
            }
            Op::ResetFast(symbol, index) => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.erase_fast(symbol, index as usize);
                }
            }
            Op::StoreSymbol(symbol) => self.store_symbol(symbol)?,
            Op::StoreFast(symbol, index) => self.store_fast(symbol, index as usize)?,
            Op::StoreMember(symbol) => self.store_member(symbol)?,
            Op::CopyValue => ops::container::copy_value(self)?,

            Op::DeclareFast(symbol, index, flags) => {
                let handle = self.state.heap.alloc(Val::None)?;
                let reference = Reference::with_flags(handle, RefFlags(flags));
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.insert_fast(symbol, index as usize, reference);
                }
            }
            Op::DeclareSymbol(symbol, flags) => self.declare_symbol(symbol, RefFlags(flags))?,
            Op::DeclareFunction(symbol, flags) => self.declare_function(symbol, RefFlags(flags))?,
            Op::FunctionOverload => self.function_overload()?,

            Op::AllocIterator => {
                let iterator = self
                    .state
                    .globals
                    .alloc_iterator(&mut self.state.heap, IteratorContext::empty_items())?;
                self.cursor.waiting_calls.push(WaitingCall::new(
                    Reference::with_flags(iterator.handle, RefFlags::CONST_ADDRESS),
                ));
            }
            Op::InitIterator(count) => ops::container::init_iterator(self, count as usize)?,
            Op::AllocArray => {
                let array = self
                    .state
                    .globals
                    .alloc_array(&mut self.state.heap, Vec::new())?;
                self.cursor.waiting_calls.push(WaitingCall::new(
                    Reference::with_flags(array.handle, RefFlags::CONST_ADDRESS),
                ));
            }
            Op::InitArray(count) => ops::container::init_array(self, count as usize)?,
            Op::AllocHash => {
                let hash = self
                    .state
                    .globals
                    .alloc_hash(&mut self.state.heap, indexmap::IndexMap::new())?;
                self.cursor.waiting_calls.push(WaitingCall::new(
                    Reference::with_flags(hash.handle, RefFlags::CONST_ADDRESS),
                ));
            }
            Op::InitHash(count) => ops::container::init_hash(self, count as usize)?,
            Op::CreateLib => {
                let library = self.state.globals.alloc_library(&mut self.state.heap)?;
                self.push(library);
            }

            Op::Add => ops::arithmetic::add(self)?,
            Op::Sub => ops::arithmetic::sub(self)?,
            Op::Mul => ops::arithmetic::mul(self)?,
            Op::Div => ops::arithmetic::div(self)?,
            Op::Mod => ops::arithmetic::modulo(self)?,
            Op::Pow => ops::arithmetic::pow(self)?,
            Op::ShiftLeft => ops::arithmetic::shift_left(self)?,
            Op::ShiftRight => ops::arithmetic::shift_right(self)?,
            Op::BitAnd => ops::arithmetic::bit_and(self)?,
            Op::BitOr => ops::arithmetic::bit_or(self)?,
            Op::BitXor => ops::arithmetic::bit_xor(self)?,
            Op::Eq => ops::comparison::eq(self)?,
            Op::Ne => ops::comparison::ne(self)?,
            Op::Lt => ops::comparison::lt(self)?,
            Op::Gt => ops::comparison::gt(self)?,
            Op::Le => ops::comparison::le(self)?,
            Op::Ge => ops::comparison::ge(self)?,
            Op::StrictEq => ops::comparison::strict_eq(self)?,
            Op::StrictNe => ops::comparison::strict_ne(self)?,
            Op::Is => ops::comparison::is_op(self)?,
            Op::RegexMatch => ops::container::regex_match(self)?,
            Op::RegexUnmatch => ops::container::regex_unmatch(self)?,
            Op::InclusiveRange => ops::container::inclusive_range(self)?,
            Op::ExclusiveRange => ops::container::exclusive_range(self)?,
            Op::Subscript => ops::container::subscript(self)?,
            Op::SubscriptMove => ops::container::subscript_move(self)?,
            Op::In => ops::container::in_op(self)?,

            Op::Not => ops::comparison::not_op(self)?,
            Op::BitNot => ops::arithmetic::bit_not(self)?,
            Op::Neg => ops::arithmetic::neg(self)?,
            Op::Pos => ops::arithmetic::pos(self)?,
            Op::Inc => ops::arithmetic::inc(self)?,
            Op::Dec => ops::arithmetic::dec(self)?,
            Op::Typeof => ops::container::typeof_op(self)?,
            Op::Membersof => ops::container::membersof(self)?,

            Op::FindDefinedSymbol(symbol) => {
                let reference = match self.try_load_symbol(symbol) {
                    Some(reference) => reference,
                    None => Reference::new(self.state.heap.alloc(Val::None)?),
                };
                self.push(reference);
            }
            Op::FindDefinedMember(symbol) => self.find_defined_member(symbol)?,
            Op::FindDefinedVarSymbol => {
                let name = self.pop_symbol_name()?;
                let symbol = self.state.globals.interner.intern(&name);
                let reference = match self.try_load_symbol(symbol) {
                    Some(reference) => reference,
                    None => Reference::new(self.state.heap.alloc(Val::None)?),
                };
                self.push(reference);
            }
            Op::FindDefinedVarMember => {
                let name = self.pop_symbol_name()?;
                let symbol = self.state.globals.interner.intern(&name);
                self.find_defined_member(symbol)?;
            }
            Op::CheckDefined => {
                let value = self.pop()?;
                let defined = !matches!(self.state.heap.get(value.handle), Val::None);
                let result = self.state.heap.alloc(Val::Boolean(defined))?;
                self.push(Reference::new(result));
            }

            Op::FindInit => ops::container::find_init(self)?,
            Op::FindNext => {
                let iterator = self.peek()?;
                self.iterator_advance(iterator.handle)?;
            }
            Op::FindCheck(target) => ops::container::find_check(self, target as usize)?,
            Op::RangeInit => {
                let source = self.pop()?;
                let iterator =
                    iterator_init(&mut self.state.heap, &self.state.globals, source)?;
                self.push(iterator);
            }
            Op::RangeNext => {
                let iterator = self.peek()?;
                self.iterator_advance(iterator.handle)?;
            }
            Op::RangeCheck(target) => self.range_check(target as usize, false)?,
            Op::RangeIteratorCheck(target) => self.range_check(target as usize, true)?,

            Op::BeginGeneratorExpression => {
                let iterator = self.state.globals.alloc_iterator(
                    &mut self.state.heap,
                    IteratorContext::Generator(Box::new(GeneratorIterator::new(
                        self.cursor.stack.len(),
                        ExecutionMode::SinglePass,
                    ))),
                )?;
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.expr_generators.push(iterator.handle);
                }
            }
            Op::EndGeneratorExpression => {
                let handle = self
                    .cursor
                    .frames
                    .last_mut()
                    .and_then(|frame| frame.expr_generators.pop())
                    .ok_or_else(|| {
                        MintError::System("no generator expression is open".to_string())
                    })?;
                self.push(Reference::new(handle));
            }
            Op::YieldExpression => {
                let value = self.pop()?;
                let handle = self
                    .cursor
                    .frames
                    .last()
                    .and_then(|frame| frame.expr_generators.last().copied())
                    .ok_or_else(|| {
                        MintError::System("no generator expression is open".to_string())
                    })?;
                context_of_mut(&mut self.state.heap, handle)?.yield_item(value)?;
            }
            Op::Yield => {
                let value = self.pop()?;
                self.yield_value(value, false)?;
            }
            Op::ExitGenerator => self.exit_generator()?,
            Op::YieldExitGenerator => {
                let value = self.pop()?;
                self.yield_value(value, true)?;
            }

            Op::OpenPrinter => self.open_printer()?,
            Op::ClosePrinter => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.printers.pop();
                }
            }
            Op::Print => self.print_value()?,

            Op::OrPreCheck(target) => {
                let value = self.peek()?;
                if ops::cast::to_boolean(&self.state.heap, value) {
                    self.jump(target as usize);
                } else {
                    self.pop()?;
                }
            }
            Op::AndPreCheck(target) => {
                let value = self.peek()?;
                if ops::cast::to_boolean(&self.state.heap, value) {
                    self.pop()?;
                } else {
                    self.jump(target as usize);
                }
            }

            Op::CaseJump(target) => {
                let matched = self.pop()?;
                if ops::cast::to_boolean(&self.state.heap, matched) {
                    self.jump(target as usize);
                    // The subject is consumed by the taken branch.
                    self.pop()?;
                }
            }
            Op::JumpZero(target) => {
                let value = self.pop()?;
                if !ops::cast::to_boolean(&self.state.heap, value) {
                    self.jump(target as usize);
                }
            }
            Op::Jump(target) => self.jump(target as usize),

            Op::SetRetrievePoint(target) => {
                let depth = self.cursor.stack.len();
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.retrieve_points.push(RetrievePoint {
                        ip: target as usize,
                        stack_depth: depth,
                    });
                }
            }
            Op::UnsetRetrievePoint => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.retrieve_points.pop();
                }
            }
            Op::Raise => {
                let value = self.pop()?;
                self.raise_value(value)?;
            }

            Op::OpenPackage(index) => {
                let name = self.constant_text(&chunk, index)?;
                let symbol = self.state.globals.interner.intern(&name);
                let parent = self.cursor.current_package();
                let package = self.state.globals.get_or_create_package(parent, symbol);
                // First open also binds the package as a value in its
                // parent so dotted references resolve.
                if !self
                    .state
                    .globals
                    .package(parent)
                    .symbols
                    .contains(symbol)
                {
                    let cell = self.state.heap.alloc(Val::Package(package))?;
                    self.state.heap.pin(cell);
                    self.state.globals.package_mut(parent).symbols.insert(
                        symbol,
                        Reference::with_flags(cell, RefFlags::CONST_ADDRESS),
                    );
                }
                self.cursor.packages.push(package);
            }
            Op::ClosePackage => {
                self.cursor.packages.pop();
            }
            Op::RegisterClass(index) => {
                let description = chunk
                    .classes
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| MintError::System("unknown class description".into()))?;
                let package = self.cursor.current_package();
                self.state.globals.generate_class(
                    &mut self.state.heap,
                    package,
                    &description,
                    module,
                )?;
            }

            Op::InitCall => {
                let callee = self.pop()?;
                self.init_call(callee)?;
            }
            Op::InitMemberCall(symbol) => self.init_member_call(symbol)?,
            Op::InitOperatorCall(operator) => {
                let object = self.pop()?;
                let entry = self
                    .state
                    .globals
                    .find_operator(&self.state.heap, object.handle, operator)
                    .ok_or_else(|| MintError::NoMatchingOperator {
                        operator: operator.symbol_text(),
                        lhs: self.state.globals.type_name(&self.state.heap, object.handle),
                    })?;
                let mut call = WaitingCall::new(entry);
                call.self_ref = Some(object);
                self.cursor.waiting_calls.push(call);
            }
            Op::InitVarMemberCall => {
                let name = self.pop_symbol_name()?;
                let symbol = self.state.globals.interner.intern(&name);
                self.init_member_call(symbol)?;
            }
            Op::InitException(symbol) => {
                let value = self.pop()?;
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.insert(symbol, value);
                }
            }
            Op::ResetException(symbol) => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.erase(symbol);
                }
            }
            Op::InitParam(symbol, flags, index) => {
                let value = self.pop()?;
                let reference = Reference::with_flags(value.handle, RefFlags(flags));
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.insert_fast(symbol, index as usize, reference);
                }
            }
            Op::InitCapture => {
                let function = self.pop()?;
                let cloned = match self.state.heap.get(function.handle) {
                    Val::Function(value) => {
                        let mut value = value.clone();
                        value.capture = Some(indexmap::IndexMap::new());
                        value
                    }
                    other => {
                        return Err(MintError::TypeMismatch {
                            expected: "function",
                            got: other.format_name().to_string(),
                            operation: "capture",
                        })
                    }
                };
                let handle = self.state.heap.alloc(Val::Function(cloned))?;
                self.push(Reference::new(handle));
            }
            Op::CaptureSymbol(symbol) => {
                let binding = self.load_symbol(symbol)?;
                self.capture_into_top(symbol, binding)?;
            }
            Op::CaptureAs(symbol) => {
                let value = self.pop()?;
                self.capture_into_top(symbol, value)?;
            }
            Op::CaptureAll => {
                let bindings: Vec<(Symbol, Reference)> = self
                    .cursor
                    .frames
                    .last()
                    .map(|frame| {
                        frame
                            .symbols
                            .iter()
                            .map(|(symbol, reference)| (*symbol, *reference))
                            .collect()
                    })
                    .unwrap_or_default();
                for (symbol, reference) in bindings {
                    self.capture_into_top(symbol, reference)?;
                }
            }
            Op::Call(argc) => self.finish_call(argc as usize, false)?,
            Op::CallMember(argc) => self.finish_call(argc as usize, true)?,
            Op::CallBuiltin(index) => self.call_builtin(index as usize)?,
            Op::ExitCall => self.exit_call()?,

            Op::ExitThread => return Ok(StepFlow::Finished),
            Op::ExitExec => {
                let value = self.pop()?;
                let code = ops::cast::to_number(self, value)? as i32;
                return Ok(StepFlow::Exited(code));
            }
            Op::ExitModule => return self.exit_module(),
        }

        Ok(StepFlow::Continue)
    }

    // ---- operand stack ----

    pub fn push(&mut self, reference: Reference) {
        self.cursor.stack.push(reference);
    }

    pub fn pop(&mut self) -> Result<Reference, MintError> {
        self.cursor
            .stack
            .pop()
            .ok_or(MintError::StackUnderflow { operation: "pop" })
    }

    pub fn peek(&self) -> Result<Reference, MintError> {
        self.cursor
            .stack
            .last()
            .copied()
            .ok_or(MintError::StackUnderflow { operation: "peek" })
    }

    pub fn peek_at(&self, offset: usize) -> Result<Reference, MintError> {
        let len = self.cursor.stack.len();
        if offset >= len {
            return Err(MintError::StackUnderflow { operation: "peek" });
        }
        Ok(self.cursor.stack[len - 1 - offset])
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame.ip = target;
        }
    }

    /// Redirect the current frame, for operators that own a loop shape.
    pub fn jump_to(&mut self, target: usize) {
        self.jump(target);
    }

    fn pop_symbol_name(&mut self) -> Result<String, MintError> {
        let value = self.pop()?;
        match self.state.heap.get(value.handle).as_string() {
            Some(text) => Ok(text.to_string()),
            None => Err(MintError::TypeMismatch {
                expected: "string",
                got: self.state.heap.get(value.handle).format_name().to_string(),
                operation: "variable symbol",
            }),
        }
    }

    fn constant_text(&self, chunk: &CodeChunk, index: u16) -> Result<String, MintError> {
        match chunk.constants.get(index as usize) {
            Some(ConstValue::String(text)) => Ok(text.clone()),
            _ => Err(MintError::System("expected string constant".into())),
        }
    }

    fn materialize(
        &mut self,
        chunk: &CodeChunk,
        module: ModuleId,
        index: u16,
    ) -> Result<Reference, MintError> {
        let constant = chunk
            .constants
            .get(index as usize)
            .ok_or_else(|| MintError::System("constant index out of range".into()))?;
        self.state
            .globals
            .materialize_const(&mut self.state.heap, constant, module)
    }

    // ---- symbols ----

    fn load_fast(&mut self, symbol: Symbol, index: usize) -> Result<Reference, MintError> {
        if let Some(frame) = self.cursor.frames.last() {
            if let Some(reference) = frame.symbols.get_fast(symbol, index) {
                return Ok(reference);
            }
        }
        self.load_symbol(symbol)
    }

    /// Name resolution: frame locals, then the open package chain, then
    /// the root package.
    fn try_load_symbol(&self, symbol: Symbol) -> Option<Reference> {
        if let Some(frame) = self.cursor.frames.last() {
            if let Some(reference) = frame.symbols.get(symbol) {
                return Some(reference);
            }
        }
        for package in self.cursor.packages.iter().rev() {
            if let Some(reference) = self.state.globals.package(*package).symbols.get(symbol) {
                return Some(reference);
            }
        }
        self.state
            .globals
            .package(PackageId::ROOT)
            .symbols
            .get(symbol)
    }

    fn load_symbol(&mut self, symbol: Symbol) -> Result<Reference, MintError> {
        self.try_load_symbol(symbol)
            .ok_or_else(|| MintError::UndefinedSymbol {
                name: self.state.globals.interner.name(symbol),
            })
    }

    fn store_symbol(&mut self, symbol: Symbol) -> Result<(), MintError> {
        let value = self.pop()?;
        // Rebind wherever the name is already bound; fall back to a new
        // local binding.
        if let Some(frame) = self.cursor.frames.last_mut() {
            if let Some(existing) = frame.symbols.get(symbol) {
                if existing.is_const_address() {
                    return Err(MintError::ConstValueWrite { operation: "store" });
                }
                frame
                    .symbols
                    .insert(symbol, Reference::with_flags(value.handle, existing.flags));
                self.push(Reference::with_flags(value.handle, existing.flags));
                return Ok(());
            }
        }
        let packages: Vec<PackageId> = self
            .cursor
            .packages
            .iter()
            .rev()
            .copied()
            .chain(std::iter::once(PackageId::ROOT))
            .collect();
        for package in packages {
            let table = &mut self.state.globals.package_mut(package).symbols;
            if let Some(existing) = table.get(symbol) {
                if existing.is_const_address() {
                    return Err(MintError::ConstValueWrite { operation: "store" });
                }
                table.insert(symbol, Reference::with_flags(value.handle, existing.flags));
                self.push(Reference::with_flags(value.handle, existing.flags));
                return Ok(());
            }
        }
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame.symbols.insert(symbol, value);
        }
        self.push(value);
        Ok(())
    }

    fn store_fast(&mut self, symbol: Symbol, index: usize) -> Result<(), MintError> {
        let value = self.pop()?;
        if let Some(frame) = self.cursor.frames.last_mut() {
            if let Some(existing) = frame.symbols.get_fast(symbol, index) {
                if existing.is_const_address() {
                    return Err(MintError::ConstValueWrite { operation: "store" });
                }
            }
            frame.symbols.insert_fast(symbol, index, value);
        }
        self.push(value);
        Ok(())
    }

    fn declare_symbol(&mut self, symbol: Symbol, flags: RefFlags) -> Result<(), MintError> {
        if flags.contains(RefFlags::GLOBAL) {
            let package = self.cursor.current_package();
            if !self.state.globals.package(package).symbols.contains(symbol) {
                let handle = self.state.heap.alloc(Val::None)?;
                self.state
                    .globals
                    .package_mut(package)
                    .symbols
                    .insert(symbol, Reference::with_flags(handle, flags));
            }
            return Ok(());
        }
        let handle = self.state.heap.alloc(Val::None)?;
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame
                .symbols
                .insert(symbol, Reference::with_flags(handle, flags));
        }
        Ok(())
    }

    fn declare_function(&mut self, symbol: Symbol, flags: RefFlags) -> Result<(), MintError> {
        let value = self.pop()?;
        let target = if flags.contains(RefFlags::GLOBAL) {
            Some(self.cursor.current_package())
        } else {
            None
        };

        // Redeclaration of a function name merges the new signatures into
        // the existing value, which is how overload sets are built.
        let existing = match target {
            Some(package) => self.state.globals.package(package).symbols.get(symbol),
            None => self
                .cursor
                .frames
                .last()
                .and_then(|frame| frame.symbols.get(symbol)),
        };
        if let Some(existing) = existing {
            let addition = match self.state.heap.get(value.handle) {
                Val::Function(function) => Some(function.clone()),
                _ => None,
            };
            if let (Some(addition), Val::Function(function)) =
                (addition, self.state.heap.get_mut(existing.handle))
            {
                function.merge(&addition);
                return Ok(());
            }
        }

        let reference = Reference::with_flags(value.handle, flags);
        match target {
            Some(package) => {
                self.state
                    .globals
                    .package_mut(package)
                    .symbols
                    .insert(symbol, reference);
            }
            None => {
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.symbols.insert(symbol, reference);
                }
            }
        }
        Ok(())
    }

    fn function_overload(&mut self) -> Result<(), MintError> {
        let addition = self.pop()?;
        let target = self.peek()?;
        let addition = match self.state.heap.get(addition.handle) {
            Val::Function(function) => function.clone(),
            other => {
                return Err(MintError::TypeMismatch {
                    expected: "function",
                    got: other.format_name().to_string(),
                    operation: "overload",
                })
            }
        };
        match self.state.heap.get_mut(target.handle) {
            Val::Function(function) => {
                function.merge(&addition);
                Ok(())
            }
            other => Err(MintError::TypeMismatch {
                expected: "function",
                got: other.format_name().to_string(),
                operation: "overload",
            }),
        }
    }

    // ---- members ----

    /// Member lookup on a value: package bindings, instance slots, class
    /// methods and class globals.
    pub fn member_of(
        &mut self,
        object: Reference,
        symbol: Symbol,
    ) -> Result<Reference, MintError> {
        match self.state.heap.get(object.handle) {
            Val::Package(package) => self
                .state
                .globals
                .package(*package)
                .symbols
                .get(symbol)
                .ok_or_else(|| MintError::UndefinedSymbol {
                    name: self.state.globals.interner.name(symbol),
                }),
            Val::Object(data) => {
                let class = self.state.globals.class(data.class);
                if let Some(member) = class.find_member(symbol) {
                    if member.offset != crate::core::value::INVALID_OFFSET && !data.prototype {
                        return data.slots.get(member.offset).copied().ok_or_else(|| {
                            MintError::System("member slot missing".into())
                        });
                    }
                    return Ok(member.value);
                }
                if let Some(global) = class.globals.get(&symbol) {
                    return Ok(*global);
                }
                Err(MintError::UndefinedMember {
                    class: class.name.clone(),
                    member: self.state.globals.interner.name(symbol),
                })
            }
            other => Err(MintError::TypeMismatch {
                expected: "object",
                got: other.format_name().to_string(),
                operation: "member access",
            }),
        }
    }

    /// `[object, value]`: rebind the named member. Instance slots rebind
    /// in the slot array, class-level members rebind the class global.
    fn store_member(&mut self, symbol: Symbol) -> Result<(), MintError> {
        let value = self.pop()?;
        let object = self.pop()?;
        if object.is_const_value() {
            return Err(MintError::ConstValueWrite { operation: "store" });
        }

        enum Target {
            Slot(usize),
            Global(crate::core::value::ClassId),
        }

        let target = match self.state.heap.get(object.handle) {
            Val::Object(data) => {
                let class = self.state.globals.class(data.class);
                match class.find_member(symbol) {
                    Some(member)
                        if member.offset != crate::core::value::INVALID_OFFSET
                            && !data.prototype =>
                    {
                        Target::Slot(member.offset)
                    }
                    _ if class.globals.contains_key(&symbol) => Target::Global(data.class),
                    _ => {
                        return Err(MintError::UndefinedMember {
                            class: class.name.clone(),
                            member: self.state.globals.interner.name(symbol),
                        })
                    }
                }
            }
            other => {
                return Err(MintError::TypeMismatch {
                    expected: "object",
                    got: other.format_name().to_string(),
                    operation: "member store",
                })
            }
        };

        match target {
            Target::Slot(offset) => match self.state.heap.get_mut(object.handle) {
                Val::Object(data) => {
                    let flags = data
                        .slots
                        .get(offset)
                        .map(|slot| slot.flags)
                        .unwrap_or(RefFlags::DEFAULT);
                    data.slots[offset] = Reference::with_flags(value.handle, flags);
                }
                _ => unreachable!("object changed format"),
            },
            Target::Global(class) => {
                let existing = self
                    .state
                    .globals
                    .class(class)
                    .globals
                    .get(&symbol)
                    .copied();
                let flags = existing.map(|r| r.flags).unwrap_or(RefFlags::DEFAULT);
                self.state
                    .globals
                    .class_mut(class)
                    .globals
                    .insert(symbol, Reference::with_flags(value.handle, flags));
            }
        }
        self.push(value);
        Ok(())
    }

    fn find_defined_member(&mut self, symbol: Symbol) -> Result<(), MintError> {
        let object = self.pop()?;
        if matches!(self.state.heap.get(object.handle), Val::None) {
            self.push(object);
            return Ok(());
        }
        let member = match self.member_of(object, symbol) {
            Ok(member) => member,
            Err(_) => Reference::new(self.state.heap.alloc(Val::None)?),
        };
        self.push(member);
        Ok(())
    }

    // ---- calls ----

    fn init_call(&mut self, callee: Reference) -> Result<(), MintError> {
        self.cursor.waiting_calls.push(WaitingCall::new(callee));
        Ok(())
    }

    fn init_member_call(&mut self, symbol: Symbol) -> Result<(), MintError> {
        let object = self.pop()?;
        let member = self.member_of(object, symbol)?;
        let mut call = WaitingCall::new(member);
        call.self_ref = Some(object);
        self.cursor.waiting_calls.push(call);
        Ok(())
    }

    /// Steps 3–4 of the call protocol: pop the waiting call, pick the
    /// signature, build the callee frame (or instantiate, or enter the
    /// class call operator) and resume at its entry point.
    fn finish_call(&mut self, argc: usize, member: bool) -> Result<(), MintError> {
        let call = self
            .cursor
            .waiting_calls
            .pop()
            .ok_or(MintError::StackUnderflow {
                operation: "call without init",
            })?;

        let mut argc = argc + call.extra_args;
        let is_prototype = matches!(
            self.state.heap.get(call.reference.handle),
            Val::Object(object) if object.prototype
        );
        if member && !is_prototype {
            let receiver = call.self_ref.unwrap_or(call.reference);
            let position = self
                .cursor
                .stack
                .len()
                .checked_sub(argc)
                .ok_or(MintError::StackUnderflow { operation: "call" })?;
            self.cursor.stack.insert(position, receiver);
            argc += 1;
        }

        match self.state.heap.get(call.reference.handle) {
            Val::Function(function) => {
                let capture = function.capture.clone();
                let (handle, extra) =
                    function
                        .resolve(argc)
                        .map(|(h, e)| (h.clone(), e))
                        .ok_or_else(|| MintError::BadArity {
                            name: "function".to_string(),
                            got: argc,
                        })?;

                if handle.module == ModuleId::BUILTIN {
                    return self.invoke_builtin(handle.offset);
                }

                let stack_base = self
                    .cursor
                    .stack
                    .len()
                    .checked_sub(argc)
                    .ok_or(MintError::StackUnderflow { operation: "call" })?;
                let mut frame = Frame::new(handle.module, handle.offset);
                frame.stack_base = stack_base;
                frame.extra_args = extra;
                if let Some(capture) = capture {
                    for (symbol, reference) in capture {
                        frame.symbols.insert(symbol, reference);
                    }
                }
                if handle.generator {
                    let iterator = self.state.globals.alloc_iterator(
                        &mut self.state.heap,
                        IteratorContext::Generator(Box::new(GeneratorIterator::new(
                            stack_base,
                            ExecutionMode::Interruptible,
                        ))),
                    )?;
                    frame.generator = Some(iterator.handle);
                    frame.result_on_exit = Some(iterator);
                }
                self.cursor.frames.push(frame);
                Ok(())
            }
            Val::Object(object) if object.prototype => {
                let class_id = object.class;
                self.instantiate(class_id, argc)
            }
            Val::Object(object) => {
                let class = self.state.globals.class(object.class);
                let operator = class
                    .find_operator(ClassOperator::Call)
                    .ok_or_else(|| MintError::NoMatchingOperator {
                        operator: "()",
                        lhs: class.name.clone(),
                    })?;
                let receiver = call.reference;
                let mut nested = WaitingCall::new(operator);
                nested.self_ref = Some(receiver);
                self.cursor.waiting_calls.push(nested);
                self.finish_call(argc, true)
            }
            other => Err(MintError::TypeMismatch {
                expected: "function",
                got: other.format_name().to_string(),
                operation: "call",
            }),
        }
    }

    /// Allocate and construct an instance, then run its `new` member if
    /// declared. The instance is the call result either way.
    fn instantiate(&mut self, class_id: crate::core::value::ClassId, argc: usize) -> Result<(), MintError> {
        let handle = self.state.heap.alloc(Val::Object(Object::new(
            class_id,
            Payload::User,
        )))?;
        {
            let state = &mut *self.state;
            construct_object(&mut state.heap, &state.globals, class_id, handle)?;
        }

        let instance = Reference::new(handle);
        let constructor = self
            .state
            .globals
            .class(class_id)
            .find_member(self.state.globals.names.new_member)
            .map(|member| member.value);

        match constructor {
            Some(constructor) => {
                let mut call = WaitingCall::new(constructor);
                call.self_ref = Some(instance);
                self.cursor.waiting_calls.push(call);
                self.finish_call(argc, true)?;
                if let Some(frame) = self.cursor.frames.last_mut() {
                    frame.result_on_exit = Some(instance);
                }
                Ok(())
            }
            None => {
                // No constructor: drop the argument values, produce the
                // instance.
                let keep = self
                    .cursor
                    .stack
                    .len()
                    .checked_sub(argc)
                    .ok_or(MintError::StackUnderflow { operation: "call" })?;
                self.cursor.stack.truncate(keep);
                self.push(instance);
                Ok(())
            }
        }
    }

    fn invoke_builtin(&mut self, index: usize) -> Result<(), MintError> {
        let func = self
            .state
            .globals
            .builtins
            .get(index)
            .map(|method| method.func)
            .ok_or_else(|| MintError::System(format!("unknown builtin {}", index)))?;
        func(self)
    }

    fn call_builtin(&mut self, index: usize) -> Result<(), MintError> {
        self.invoke_builtin(index)
    }

    fn capture_into_top(
        &mut self,
        symbol: Symbol,
        reference: Reference,
    ) -> Result<(), MintError> {
        let top = self.peek()?;
        match self.state.heap.get_mut(top.handle) {
            Val::Function(function) => {
                function
                    .capture
                    .get_or_insert_with(indexmap::IndexMap::new)
                    .insert(symbol, reference);
                Ok(())
            }
            other => Err(MintError::TypeMismatch {
                expected: "function",
                got: other.format_name().to_string(),
                operation: "capture",
            }),
        }
    }

    fn load_extra_arguments(&mut self) -> Result<(), MintError> {
        let extra = self
            .cursor
            .frames
            .last()
            .map(|frame| frame.extra_args)
            .unwrap_or(0);
        let split = self
            .cursor
            .stack
            .len()
            .checked_sub(extra)
            .ok_or(MintError::StackUnderflow {
                operation: "extra arguments",
            })?;
        let extras = crate::vm::frame::ArgList::from_vec(self.cursor.stack.split_off(split));

        let mut items = ItemsIterator::with_capacity(extras.len());
        for item in extras {
            items.yield_item(item);
        }
        let iterator = self
            .state
            .globals
            .alloc_iterator(&mut self.state.heap, IteratorContext::Items(items))?;
        let va_args = self.state.globals.names.va_args;
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame.symbols.insert(va_args, iterator);
        }
        Ok(())
    }

    /// Unwind the top frame, leaving a single result on the operand stack.
    fn exit_call(&mut self) -> Result<(), MintError> {
        let mut frame = self
            .cursor
            .frames
            .pop()
            .ok_or(MintError::StackUnderflow { operation: "exit" })?;
        let result = self.pop()?;
        self.cursor.stack.truncate(frame.stack_base);
        if let Some(result) = frame.result_on_exit.take() {
            self.push(result);
        } else if !frame.discard_result {
            self.push(result);
        }
        Ok(())
    }

    fn exit_module(&mut self) -> Result<StepFlow, MintError> {
        if self.cursor.frames.len() <= 1 {
            self.cursor.frames.pop();
            return Ok(StepFlow::Finished);
        }
        let mut frame = self
            .cursor
            .frames
            .pop()
            .ok_or(MintError::StackUnderflow { operation: "exit" })?;
        self.cursor.stack.truncate(frame.stack_base);
        if let Some(result) = frame.result_on_exit.take() {
            self.push(result);
        }
        Ok(StepFlow::Continue)
    }

    // ---- exceptions ----

    /// Unwind to the innermost retrieve point: truncate the operand stack
    /// to the recorded depth, push the raised value and resume at the
    /// handler. With no retrieve point in this cursor the exception
    /// escapes to the scheduler.
    pub fn raise_value(&mut self, value: Reference) -> Result<(), MintError> {
        while let Some(frame) = self.cursor.frames.last_mut() {
            if let Some(point) = frame.retrieve_points.pop() {
                frame.ip = point.ip;
                self.cursor.stack.truncate(point.stack_depth);
                self.push(value);
                return Ok(());
            }
            self.cursor.frames.pop();
        }
        Err(MintError::Raised(value.handle))
    }

    /// Raise a host-formatted message as a language exception.
    pub fn raise_message(&mut self, message: String) -> Result<(), MintError> {
        let value = self
            .state
            .globals
            .alloc_string(&mut self.state.heap, message)?;
        self.raise_value(value)
    }

    // ---- generators ----

    fn generator_handle(&self) -> Result<Handle, MintError> {
        self.cursor
            .frames
            .last()
            .and_then(|frame| frame.generator)
            .ok_or_else(|| MintError::System("yield outside of a generator body".into()))
    }

    /// `yield`: append to the frame's generator; in interruptible mode
    /// additionally snapshot the operand stack above the generator's base
    /// and park the frame. `exit_after` handles the terminal
    /// yield-and-return form without arming a resume.
    fn yield_value(&mut self, value: Reference, exit_after: bool) -> Result<(), MintError> {
        let handle = self.generator_handle()?;
        let mode = match context_of_mut(&mut self.state.heap, handle)? {
            IteratorContext::Generator(generator) => {
                generator.items.yield_item(value);
                generator.mode
            }
            context => {
                context.yield_item(value)?;
                return Ok(());
            }
        };

        match mode {
            ExecutionMode::SinglePass => {
                if exit_after {
                    self.exit_generator()?;
                }
                Ok(())
            }
            ExecutionMode::Interruptible => {
                if exit_after {
                    // Final yield: the body is done, nothing to resume.
                    return self.exit_generator();
                }
                let mut frame = self
                    .cursor
                    .frames
                    .pop()
                    .ok_or(MintError::StackUnderflow { operation: "yield" })?;
                let result = frame.result_on_exit.take();
                let base = frame.stack_base;
                let stored: Vec<Reference> = self.cursor.stack.split_off(base);
                match context_of_mut(&mut self.state.heap, handle)? {
                    IteratorContext::Generator(generator) => {
                        generator.stored_stack = stored;
                        generator.stack_base = base;
                        generator.state = Some(SavedState { frame });
                    }
                    _ => unreachable!("generator context changed kind"),
                }
                if let Some(result) = result {
                    self.push(result);
                }
                Ok(())
            }
        }
    }

    fn exit_generator(&mut self) -> Result<(), MintError> {
        let mut frame = self
            .cursor
            .frames
            .pop()
            .ok_or(MintError::StackUnderflow { operation: "exit" })?;
        self.cursor.stack.truncate(frame.stack_base);
        if let Some(result) = frame.result_on_exit.take() {
            self.push(result);
        }
        Ok(())
    }

    /// Advance an iterator. For a suspended generator this also restores
    /// the stored stack onto this cursor and pushes the parked frame so
    /// the body resumes on the following steps.
    pub fn iterator_advance(&mut self, handle: Handle) -> Result<(), MintError> {
        let needs_heap = matches!(
            context_of(&self.state.heap, handle)?,
            IteratorContext::Range(_)
        );
        if needs_heap {
            let mut context = self.take_context(handle)?;
            let result = context.next(&mut self.state.heap);
            self.put_context(handle, context)?;
            return result;
        }

        let resume = match context_of_mut(&mut self.state.heap, handle)? {
            IteratorContext::Items(items) => {
                items.next();
                None
            }
            IteratorContext::Generator(generator) => {
                generator.items.next();
                generator.state.take().map(|state| {
                    let stored = std::mem::take(&mut generator.stored_stack);
                    (state, stored)
                })
            }
            IteratorContext::Range(_) => None,
        };

        if let Some((state, stored)) = resume {
            let base = self.cursor.stack.len();
            self.cursor.stack.extend(stored);
            let mut frame = state.frame;
            frame.stack_base = base;
            match context_of_mut(&mut self.state.heap, handle)? {
                IteratorContext::Generator(generator) => generator.stack_base = base,
                _ => unreachable!("generator context changed kind"),
            }
            self.cursor.frames.push(frame);
        }
        Ok(())
    }

    /// Force a suspended generator to completion eagerly: flip to
    /// single-pass, restore the parked frame and drain it on this cursor.
    pub fn finalize_if_generator(&mut self, handle: Handle) -> Result<(), MintError> {
        let is_iterator = matches!(
            self.state.heap.get(handle),
            Val::Object(object) if object.metatype() == Metatype::Iterator
        );
        if !is_iterator {
            return Ok(());
        }
        let resume = match context_of_mut(&mut self.state.heap, handle)? {
            IteratorContext::Generator(generator) => {
                generator.mode = ExecutionMode::SinglePass;
                generator.state.take().map(|state| {
                    let stored = std::mem::take(&mut generator.stored_stack);
                    (state, stored)
                })
            }
            _ => None,
        };
        if let Some((state, stored)) = resume {
            let depth = self.cursor.frames.len();
            let base = self.cursor.stack.len();
            self.cursor.stack.extend(stored);
            let mut frame = state.frame;
            frame.stack_base = base;
            frame.result_on_exit = None;
            self.cursor.frames.push(frame);
            self.run_to_depth(depth)?;
        }
        Ok(())
    }

    fn take_context(&mut self, handle: Handle) -> Result<IteratorContext, MintError> {
        let context = context_of_mut(&mut self.state.heap, handle)?;
        Ok(std::mem::replace(context, IteratorContext::empty_items()))
    }

    fn put_context(&mut self, handle: Handle, context: IteratorContext) -> Result<(), MintError> {
        *context_of_mut(&mut self.state.heap, handle)? = context;
        Ok(())
    }

    /// Loop head of a for-in: with the iterator exhausted, pop it and jump
    /// past the loop; otherwise push the current element.
    fn range_check(&mut self, target: usize, expect_iterator: bool) -> Result<(), MintError> {
        let iterator = self.peek()?;
        let context = context_of(&self.state.heap, iterator.handle)?;
        if context.is_empty(&self.state.heap) {
            self.pop()?;
            self.jump(target);
            return Ok(());
        }
        let value = context
            .value(&self.state.heap)
            .ok_or(MintError::StackUnderflow { operation: "range" })?;
        if expect_iterator {
            let ok = matches!(
                self.state.heap.get(value.handle),
                Val::Object(object) if object.metatype() == Metatype::Iterator
            );
            if !ok {
                return Err(MintError::TypeMismatch {
                    expected: "iterator",
                    got: self.state.heap.get(value.handle).format_name().to_string(),
                    operation: "unpack",
                });
            }
        }
        self.push(value.share());
        Ok(())
    }

    // ---- printing ----

    fn open_printer(&mut self) -> Result<(), MintError> {
        let target = self.pop()?;
        let printer = match self.state.heap.get(target.handle) {
            Val::Number(fd) => Printer::from_fd(*fd as i64),
            Val::Object(object) => match &object.payload {
                Payload::String(path) => {
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map_err(|e| {
                            MintError::System(format!("cannot open '{}': {}", path, e))
                        })?;
                    Printer::File(std::sync::Arc::new(std::sync::Mutex::new(file)))
                }
                _ => Printer::Object(target),
            },
            other => {
                return Err(MintError::TypeMismatch {
                    expected: "printer",
                    got: other.format_name().to_string(),
                    operation: "open printer",
                })
            }
        };
        if let Some(frame) = self.cursor.frames.last_mut() {
            frame.printers.push(printer);
        }
        Ok(())
    }

    fn current_printer(&self) -> Printer {
        for frame in self.cursor.frames.iter().rev() {
            if let Some(printer) = frame.printers.last() {
                return printer.clone();
            }
        }
        self.state.default_printer.clone()
    }

    fn print_value(&mut self) -> Result<(), MintError> {
        let value = self.pop()?;
        match self.current_printer() {
            Printer::Object(target) => {
                // Forward to the target's own print member.
                let print = self.state.globals.names.print;
                let member = self.member_of(target, print)?;
                let mut call = WaitingCall::new(member);
                call.self_ref = Some(target);
                self.cursor.waiting_calls.push(call);
                self.push(value);
                let depth = self.cursor.frames.len();
                self.finish_call(1, true)?;
                // A bytecode print member produces a value nobody reads; a
                // builtin one already completed.
                if self.cursor.frames.len() > depth {
                    if let Some(frame) = self.cursor.frames.last_mut() {
                        frame.discard_result = true;
                    }
                } else {
                    self.pop()?;
                }
                Ok(())
            }
            printer => {
                let mut text =
                    ops::cast::to_string(&self.state.heap, &self.state.globals, value);
                text.push('\n');
                printer.write(&text)
            }
        }
    }

    // ---- modules ----

    /// `load_module`: a READY module pushes its package and continues; a
    /// new module is resolved on the library path, compiled and executed
    /// in a new frame before control returns here.
    fn load_module(&mut self, chunk: &CodeChunk, index: u16) -> Result<(), MintError> {
        let name = self.constant_text(chunk, index)?;

        if let Some(id) = self.state.registry.find_by_name(&name) {
            match self.state.registry.get(id).map(|info| info.state) {
                Some(ModuleState::Ready) => {
                    let package = self
                        .state
                        .heap
                        .alloc(Val::Package(PackageId::ROOT))?;
                    self.push(Reference::new(package));
                    return Ok(());
                }
                _ => {
                    return Err(MintError::System(format!(
                        "module '{}' previously failed to compile",
                        name
                    )))
                }
            }
        }

        let path = self
            .state
            .registry
            .resolve_path(&name)
            .ok_or_else(|| MintError::ModuleNotFound { name: name.clone() })?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| MintError::System(format!("cannot read '{}': {}", path.display(), e)))?;

        let compiled = match crate::compiler::emitter::compile(
            &source,
            &name,
            &mut self.state.globals.interner,
        ) {
            Ok(compiled) => compiled,
            Err(error) => {
                self.state
                    .registry
                    .mark_failed(name.clone(), Some(path));
                return Err(MintError::System(format!(
                    "cannot compile module '{}': {}",
                    name, error
                )));
            }
        };

        let id = self
            .state
            .registry
            .create_module(name, Arc::new(compiled), Some(path));

        let package = self.state.heap.alloc(Val::Package(PackageId::ROOT))?;
        let mut frame = Frame::new(id, 0);
        frame.stack_base = self.cursor.stack.len();
        frame.result_on_exit = Some(Reference::new(package));
        self.cursor.frames.push(frame);
        Ok(())
    }

    /// Operator dispatch step 1: if the left operand's class overloads the
    /// operator, enter the overload as a member call and report `true`.
    pub fn try_operator_overload(
        &mut self,
        operator: ClassOperator,
        lhs: Reference,
        args: &[Reference],
    ) -> Result<bool, MintError> {
        let entry = self
            .state
            .globals
            .find_operator(&self.state.heap, lhs.handle, operator);
        let entry = match entry {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let mut call = WaitingCall::new(entry);
        call.self_ref = Some(lhs);
        self.cursor.waiting_calls.push(call);
        for arg in args {
            self.push(*arg);
        }
        self.finish_call(args.len(), true)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::{CodeChunk, ConstValue};

    fn machine_for(ops: Vec<Op>, constants: Vec<ConstValue>) -> (MachineState, Cursor) {
        let mut state = MachineState::new().unwrap();
        let lines = vec![1; ops.len()];
        let chunk = CodeChunk {
            name: "test".to_string(),
            code: ops,
            constants,
            lines,
            classes: Vec::new(),
        };
        let module = state.registry.create_main_module(Arc::new(chunk));
        (state, Cursor::new(module))
    }

    fn run(ops: Vec<Op>, constants: Vec<ConstValue>) -> (MachineState, Cursor, RunStatus) {
        let (mut state, mut cursor) = machine_for(ops, constants);
        let status = Machine::new(&mut state, &mut cursor)
            .run_quantum(QUANTUM)
            .unwrap();
        (state, cursor, status)
    }

    #[test]
    fn case_jump_consumes_subject_on_match() {
        // subject, matched=true -> jump taken, both values gone.
        let (_, cursor, status) = run(
            vec![
                Op::LoadConstant(0),
                Op::LoadConstant(1),
                Op::CaseJump(4),
                Op::LoadConstant(0), // skipped branch filler
                Op::ExitModule,
            ],
            vec![ConstValue::Number(9.0), ConstValue::Boolean(true)],
        );
        assert_eq!(status, RunStatus::Finished);
        assert!(cursor.stack.is_empty());
    }

    #[test]
    fn case_jump_keeps_subject_on_miss() {
        let (_, cursor, status) = run(
            vec![
                Op::LoadConstant(0),
                Op::LoadConstant(1),
                Op::CaseJump(4),
                Op::ExitThread,
                Op::ExitModule,
            ],
            vec![ConstValue::Number(9.0), ConstValue::Boolean(false)],
        );
        assert_eq!(status, RunStatus::Finished);
        // Only the comparison result was consumed.
        assert_eq!(cursor.stack.len(), 1);
    }

    #[test]
    fn declare_fast_seeds_a_none_cell() {
        let symbol = Symbol(100);
        let (state, cursor, _) = run(
            vec![
                Op::DeclareFast(symbol, 0, 0),
                Op::LoadFast(symbol, 0),
                Op::ExitThread,
            ],
            vec![],
        );
        let top = cursor.stack.last().unwrap();
        assert!(matches!(state.heap.get(top.handle), Val::None));
    }

    #[test]
    fn increment_produces_a_fresh_cell() {
        let (state, cursor, _) = run(
            vec![Op::LoadConstant(0), Op::Inc, Op::ExitThread],
            vec![ConstValue::Number(4.0)],
        );
        let top = cursor.stack.last().unwrap();
        assert_eq!(*state.heap.get(top.handle), Val::Number(5.0));
    }

    #[test]
    fn clone_reference_leaves_copy_below_original() {
        let (state, cursor, _) = run(
            vec![Op::LoadConstant(0), Op::CloneReference, Op::ExitThread],
            vec![ConstValue::Number(8.0)],
        );
        assert_eq!(cursor.stack.len(), 2);
        let copy = cursor.stack[0];
        let original = cursor.stack[1];
        assert_ne!(copy.handle, original.handle);
        assert_eq!(*state.heap.get(copy.handle), Val::Number(8.0));
    }

    #[test]
    fn printers_nest_per_frame() {
        let (buffer_printer, buffer) = Printer::capture();
        let (mut state, mut cursor) = machine_for(
            vec![
                Op::LoadConstant(0),
                Op::Print,
                Op::ExitThread,
            ],
            vec![ConstValue::String("redirected".to_string())],
        );
        if let Some(frame) = cursor.frames.last_mut() {
            frame.printers.push(buffer_printer);
        }
        Machine::new(&mut state, &mut cursor)
            .run_quantum(QUANTUM)
            .unwrap();
        assert_eq!(&*buffer.lock().unwrap(), b"redirected\n");
    }

    #[test]
    fn retrieve_point_restores_stack_depth() {
        // Push filler, arm a handler, push garbage, raise: the handler
        // sees the recorded depth plus the raised value.
        let (_, cursor, status) = run(
            vec![
                Op::LoadConstant(0),
                Op::SetRetrievePoint(6),
                Op::LoadConstant(0),
                Op::LoadConstant(0),
                Op::LoadConstant(1),
                Op::Raise,
                Op::ExitThread,
            ],
            vec![
                ConstValue::Number(0.0),
                ConstValue::String("err".to_string()),
            ],
        );
        assert_eq!(status, RunStatus::Finished);
        // Filler plus the raised value.
        assert_eq!(cursor.stack.len(), 2);
    }

    #[test]
    fn generator_expressions_collect_yields() {
        let (state, cursor, _) = run(
            vec![
                Op::BeginGeneratorExpression,
                Op::LoadConstant(0),
                Op::YieldExpression,
                Op::LoadConstant(1),
                Op::YieldExpression,
                Op::EndGeneratorExpression,
                Op::ExitThread,
            ],
            vec![ConstValue::Number(1.0), ConstValue::Number(2.0)],
        );
        let top = cursor.stack.last().unwrap();
        let context = context_of(&state.heap, top.handle).unwrap();
        assert_eq!(context.size(&state.heap), 2);
    }

    #[test]
    fn call_builtin_dispatches_by_index() {
        // Builtin 0 is the iterator `next`; hand it an empty iterator.
        let (mut state, mut cursor) = machine_for(
            vec![Op::AllocIterator, Op::InitIterator(0), Op::CallBuiltin(0), Op::ExitThread],
            vec![],
        );
        Machine::new(&mut state, &mut cursor)
            .run_quantum(QUANTUM)
            .unwrap();
        let top = cursor.stack.last().unwrap();
        assert!(matches!(state.heap.get(top.handle), Val::None));
    }
}
