//! Bytecode emission: one pass over the syntax tree into a module chunk.
//!
//! Function bodies are emitted inline, jumped over, and referenced by
//! entry offset from function prototypes in the constant table. Locals
//! with statically-known names get fast-slot offsets per function scope.

use crate::compiler::chunk::{CodeChunk, ConstValue, FunctionProto};
use crate::core::interner::Interner;
use crate::core::value::RefFlags;
use crate::parser::ast::*;
use crate::parser::parser::{parse, ParseError};
use crate::runtime::class::{ClassDescription, MemberDescription, MemberKind};
use crate::vm::opcode::Op;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        Self {
            message: error.message,
            line: error.line,
        }
    }
}

impl std::error::Error for CompileError {}

pub fn compile(
    source: &str,
    name: &str,
    interner: &mut Interner,
) -> Result<CodeChunk, CompileError> {
    compile_with_options(source, name, interner, false)
}

/// `repl_globals` makes toplevel name assignments bind package-globally so
/// bindings survive from one interactive buffer to the next.
pub fn compile_with_options(
    source: &str,
    name: &str,
    interner: &mut Interner,
    repl_globals: bool,
) -> Result<CodeChunk, CompileError> {
    let program = parse(source)?;
    let mut emitter = Emitter {
        chunk: CodeChunk {
            name: name.to_string(),
            ..Default::default()
        },
        interner,
        scopes: vec![Scope::default()],
        loops: Vec::new(),
        generator: vec![false],
        armed_retrieves: 0,
        current_line: 1,
        repl_globals,
        none_const: None,
    };
    emitter.emit_statements(&program)?;
    emitter.emit(Op::ExitModule);
    Ok(emitter.chunk)
}

#[derive(Default)]
struct Scope {
    locals: HashMap<String, u16>,
    next_fast: u16,
}

struct LoopContext {
    /// Jump target of the loop head (condition or range check).
    head: usize,
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
    /// for-in loops keep their iterator on the operand stack; `break`
    /// pops it on the way out.
    is_for: bool,
    /// Retrieve points armed outside this loop; jumping out must disarm
    /// anything armed inside.
    armed_at: usize,
}

struct Emitter<'a> {
    chunk: CodeChunk,
    interner: &'a mut Interner,
    scopes: Vec<Scope>,
    loops: Vec<LoopContext>,
    generator: Vec<bool>,
    /// Retrieve points textually armed at the emission point.
    armed_retrieves: usize,
    current_line: u32,
    repl_globals: bool,
    none_const: Option<u16>,
}

impl<'a> Emitter<'a> {
    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError {
            message: message.into(),
            line: self.current_line,
        }
    }

    fn emit(&mut self, op: Op) -> usize {
        self.chunk.code.push(op);
        self.chunk.lines.push(self.current_line);
        self.chunk.code.len() - 1
    }

    fn here(&self) -> usize {
        self.chunk.code.len()
    }

    /// Rewrite a forward jump to land on the current instruction.
    fn patch(&mut self, index: usize) {
        let target = self.here() as u32;
        let op = self.chunk.code[index];
        self.chunk.code[index] = match op {
            Op::Jump(_) => Op::Jump(target),
            Op::JumpZero(_) => Op::JumpZero(target),
            Op::CaseJump(_) => Op::CaseJump(target),
            Op::SetRetrievePoint(_) => Op::SetRetrievePoint(target),
            Op::RangeCheck(_) => Op::RangeCheck(target),
            Op::RangeIteratorCheck(_) => Op::RangeIteratorCheck(target),
            Op::FindCheck(_) => Op::FindCheck(target),
            Op::OrPreCheck(_) => Op::OrPreCheck(target),
            Op::AndPreCheck(_) => Op::AndPreCheck(target),
            other => other,
        };
    }

    fn add_const(&mut self, constant: ConstValue) -> Result<u16, CompileError> {
        if self.chunk.constants.len() >= u16::MAX as usize {
            return Err(self.error("too many constants in one module"));
        }
        self.chunk.constants.push(constant);
        Ok((self.chunk.constants.len() - 1) as u16)
    }

    fn none_const(&mut self) -> Result<u16, CompileError> {
        if let Some(index) = self.none_const {
            return Ok(index);
        }
        let index = self.add_const(ConstValue::None)?;
        self.none_const = Some(index);
        Ok(index)
    }

    fn sym(&mut self, name: &str) -> crate::core::value::Symbol {
        self.interner.intern(name)
    }

    fn scope(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    fn local(&self, name: &str) -> Option<u16> {
        self.scopes
            .last()
            .and_then(|scope| scope.locals.get(name).copied())
    }

    fn declare_local(&mut self, name: &str) -> u16 {
        if let Some(index) = self.local(name) {
            return index;
        }
        let scope = self.scope();
        let index = scope.next_fast;
        scope.next_fast += 1;
        scope.locals.insert(name.to_string(), index);
        index
    }

    fn at_toplevel(&self) -> bool {
        self.scopes.len() == 1
    }

    fn in_generator(&self) -> bool {
        self.generator.last().copied().unwrap_or(false)
    }

    // ---- statements ----

    fn emit_statements(&mut self, statements: &[Stmt]) -> Result<(), CompileError> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, statement: &Stmt) -> Result<(), CompileError> {
        self.current_line = statement.line;
        match &statement.kind {
            StmtKind::Expr(expr) => {
                self.emit_expr(expr)?;
                self.emit(Op::UnloadReference);
            }
            StmtKind::Print(expr) => {
                self.emit_expr(expr)?;
                self.emit(Op::Print);
            }
            StmtKind::Assign { target, op, value } => self.emit_assign(target, *op, value)?,
            StmtKind::If {
                branches,
                otherwise,
            } => {
                let mut exits = Vec::new();
                let mut next_branch = None;
                for (condition, body) in branches {
                    if let Some(previous) = next_branch.take() {
                        self.patch(previous);
                    }
                    self.emit_expr(condition)?;
                    next_branch = Some(self.emit(Op::JumpZero(0)));
                    self.emit_statements(body)?;
                    exits.push(self.emit(Op::Jump(0)));
                }
                if let Some(previous) = next_branch.take() {
                    self.patch(previous);
                }
                if let Some(body) = otherwise {
                    self.emit_statements(body)?;
                }
                for exit in exits {
                    self.patch(exit);
                }
            }
            StmtKind::While { condition, body } => {
                let head = self.here();
                self.emit_expr(condition)?;
                let exit = self.emit(Op::JumpZero(0));
                self.loops.push(LoopContext {
                    head,
                    break_jumps: Vec::new(),
                    continue_jumps: Vec::new(),
                    is_for: false,
                    armed_at: self.armed_retrieves,
                });
                self.emit_statements(body)?;
                let context = self.loops.pop().expect("loop context");
                for jump in context.continue_jumps {
                    let op = self.chunk.code[jump];
                    if let Op::Jump(_) = op {
                        self.chunk.code[jump] = Op::Jump(head as u32);
                    }
                }
                self.emit(Op::Jump(head as u32));
                self.patch(exit);
                for jump in context.break_jumps {
                    self.patch(jump);
                }
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                self.emit_expr(iterable)?;
                self.emit(Op::RangeInit);
                let head = self.here();
                let exit = self.emit(Op::RangeCheck(0));

                let symbol = self.sym(binding);
                let index = self.declare_local(binding);
                self.emit(Op::StoreFast(symbol, index));
                self.emit(Op::UnloadReference);

                self.loops.push(LoopContext {
                    head,
                    break_jumps: Vec::new(),
                    continue_jumps: Vec::new(),
                    is_for: true,
                    armed_at: self.armed_retrieves,
                });
                self.emit_statements(body)?;
                let context = self.loops.pop().expect("loop context");

                // `continue` lands on the advance step.
                for jump in context.continue_jumps {
                    self.patch(jump);
                }
                self.emit(Op::RangeNext);
                self.emit(Op::Jump(head as u32));
                self.patch(exit);
                for jump in context.break_jumps {
                    self.patch(jump);
                }
            }
            StmtKind::Def { name, function } => {
                let proto = self.emit_function_body(function)?;
                let index = self.add_const(ConstValue::Function(proto))?;
                self.emit(Op::LoadConstant(index));
                let symbol = self.sym(name);
                let flags = if self.at_toplevel() {
                    RefFlags::GLOBAL.0
                } else {
                    RefFlags::DEFAULT.0
                };
                self.emit(Op::DeclareFunction(symbol, flags));
            }
            StmtKind::Return(value) => {
                if self.in_generator() {
                    if let Some(value) = value {
                        self.emit_expr(value)?;
                        self.emit(Op::UnloadReference);
                    }
                    self.emit(Op::ExitGenerator);
                } else {
                    match value {
                        Some(value) => self.emit_expr(value)?,
                        None => {
                            let none = self.none_const()?;
                            self.emit(Op::LoadConstant(none));
                        }
                    }
                    self.emit(Op::ExitCall);
                }
            }
            StmtKind::Yield(value) => {
                self.emit_expr(value)?;
                self.emit(Op::Yield);
            }
            StmtKind::Raise(value) => {
                self.emit_expr(value)?;
                self.emit(Op::Raise);
            }
            StmtKind::Try {
                body,
                binding,
                handler,
            } => {
                let point = self.emit(Op::SetRetrievePoint(0));
                self.armed_retrieves += 1;
                self.emit_statements(body)?;
                self.emit(Op::UnsetRetrievePoint);
                self.armed_retrieves -= 1;
                let done = self.emit(Op::Jump(0));
                self.patch(point);
                // The raise consumed the point before entering the
                // handler.
                let symbol = self.sym(binding);
                self.emit(Op::InitException(symbol));
                self.emit_statements(handler)?;
                self.emit(Op::ResetException(symbol));
                self.patch(done);
            }
            StmtKind::Class(class) => self.emit_class(class)?,
            StmtKind::Package { name, body } => {
                let index = self.add_const(ConstValue::String(name.clone()))?;
                self.emit(Op::OpenPackage(index));
                self.emit_statements(body)?;
                self.emit(Op::ClosePackage);
            }
            StmtKind::Load(path) => {
                let index = self.add_const(ConstValue::String(path.clone()))?;
                self.emit(Op::LoadModule(index));
                self.emit(Op::UnloadReference);
            }
            StmtKind::Exit(value) => {
                match value {
                    Some(value) => self.emit_expr(value)?,
                    None => {
                        let zero = self.add_const(ConstValue::Number(0.0))?;
                        self.emit(Op::LoadConstant(zero));
                    }
                }
                self.emit(Op::ExitExec);
            }
            StmtKind::Break => {
                let (is_for, armed_at) = self
                    .loops
                    .last()
                    .map(|context| (context.is_for, context.armed_at))
                    .ok_or_else(|| self.error("'break' outside of a loop"))?;
                for _ in armed_at..self.armed_retrieves {
                    self.emit(Op::UnsetRetrievePoint);
                }
                if is_for {
                    // Drop the loop iterator on the way out.
                    self.emit(Op::UnloadReference);
                }
                let jump = self.emit(Op::Jump(0));
                self.loops
                    .last_mut()
                    .expect("loop context")
                    .break_jumps
                    .push(jump);
            }
            StmtKind::Continue => {
                let (is_for, armed_at, head) = self
                    .loops
                    .last()
                    .map(|context| (context.is_for, context.armed_at, context.head))
                    .ok_or_else(|| self.error("'continue' outside of a loop"))?;
                for _ in armed_at..self.armed_retrieves {
                    self.emit(Op::UnsetRetrievePoint);
                }
                if is_for {
                    let jump = self.emit(Op::Jump(0));
                    self.loops
                        .last_mut()
                        .expect("loop context")
                        .continue_jumps
                        .push(jump);
                } else {
                    self.emit(Op::Jump(head as u32));
                }
            }
        }
        Ok(())
    }

    fn emit_assign(
        &mut self,
        target: &AssignTarget,
        op: AssignOp,
        value: &Expr,
    ) -> Result<(), CompileError> {
        match op {
            AssignOp::Move => self.emit_move(target, value),
            AssignOp::Copy => {
                self.emit_target_load(target)?;
                self.emit_expr(value)?;
                self.emit(Op::CopyValue);
                self.emit(Op::UnloadReference);
                Ok(())
            }
            AssignOp::Add | AssignOp::Sub | AssignOp::Mul | AssignOp::Div => {
                let binary = match op {
                    AssignOp::Add => Op::Add,
                    AssignOp::Sub => Op::Sub,
                    AssignOp::Mul => Op::Mul,
                    AssignOp::Div => Op::Div,
                    _ => unreachable!(),
                };
                match target {
                    AssignTarget::Name(_) | AssignTarget::Global(_) => {
                        self.emit_target_load(target)?;
                        self.emit_expr(value)?;
                        self.emit(binary);
                        self.emit_store(target)?;
                    }
                    AssignTarget::Member(object, member) => {
                        self.emit_expr(object)?;
                        self.emit(Op::ReloadReference);
                        let symbol = self.sym(member);
                        self.emit(Op::LoadMember(symbol));
                        self.emit_expr(value)?;
                        self.emit(binary);
                        self.emit(Op::StoreMember(symbol));
                        self.emit(Op::UnloadReference);
                    }
                    AssignTarget::Index(object, index) => {
                        self.emit_expr(object)?;
                        self.emit_expr(index)?;
                        self.emit_expr(object)?;
                        self.emit_expr(index)?;
                        self.emit(Op::Subscript);
                        self.emit_expr(value)?;
                        self.emit(binary);
                        self.emit(Op::SubscriptMove);
                        self.emit(Op::UnloadReference);
                    }
                }
                Ok(())
            }
        }
    }

    fn emit_move(&mut self, target: &AssignTarget, value: &Expr) -> Result<(), CompileError> {
        match target {
            AssignTarget::Name(name) => {
                if self.repl_globals && self.at_toplevel() {
                    let symbol = self.sym(name);
                    self.emit(Op::DeclareSymbol(symbol, RefFlags::GLOBAL.0));
                    self.emit_expr(value)?;
                    self.emit(Op::StoreSymbol(symbol));
                } else {
                    self.emit_expr(value)?;
                    let symbol = self.sym(name);
                    let index = self.declare_local(name);
                    self.emit(Op::StoreFast(symbol, index));
                }
                self.emit(Op::UnloadReference);
            }
            AssignTarget::Global(name) => {
                let symbol = self.sym(name);
                self.emit(Op::DeclareSymbol(symbol, RefFlags::GLOBAL.0));
                self.emit_expr(value)?;
                self.emit(Op::StoreSymbol(symbol));
                self.emit(Op::UnloadReference);
            }
            AssignTarget::Member(object, member) => {
                self.emit_expr(object)?;
                self.emit_expr(value)?;
                let symbol = self.sym(member);
                self.emit(Op::StoreMember(symbol));
                self.emit(Op::UnloadReference);
            }
            AssignTarget::Index(object, index) => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit_expr(value)?;
                self.emit(Op::SubscriptMove);
                self.emit(Op::UnloadReference);
            }
        }
        Ok(())
    }

    /// Load the target as a reference sharing its cell, for `:=`.
    fn emit_target_load(&mut self, target: &AssignTarget) -> Result<(), CompileError> {
        match target {
            AssignTarget::Name(name) => {
                let expr = Expr::Name(name.clone());
                self.emit_expr(&expr)
            }
            AssignTarget::Global(name) => {
                let expr = Expr::Global(name.clone());
                self.emit_expr(&expr)
            }
            AssignTarget::Member(object, member) => {
                self.emit_expr(object)?;
                let symbol = self.sym(member);
                self.emit(Op::LoadMember(symbol));
                Ok(())
            }
            AssignTarget::Index(object, index) => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Op::Subscript);
                Ok(())
            }
        }
    }

    fn emit_store(&mut self, target: &AssignTarget) -> Result<(), CompileError> {
        match target {
            AssignTarget::Name(name) => {
                if self.repl_globals && self.at_toplevel() {
                    let symbol = self.sym(name);
                    self.emit(Op::StoreSymbol(symbol));
                } else {
                    let symbol = self.sym(name);
                    let index = self.declare_local(name);
                    self.emit(Op::StoreFast(symbol, index));
                }
                self.emit(Op::UnloadReference);
                Ok(())
            }
            AssignTarget::Global(name) => {
                let symbol = self.sym(name);
                self.emit(Op::StoreSymbol(symbol));
                self.emit(Op::UnloadReference);
                Ok(())
            }
            _ => Err(self.error("invalid store target")),
        }
    }

    // ---- functions ----

    fn emit_function_body(&mut self, function: &FunctionDef) -> Result<FunctionProto, CompileError> {
        let skip = self.emit(Op::Jump(0));
        let entry = self.here();

        self.scopes.push(Scope::default());
        self.generator.push(function.is_generator);
        // Retrieve points are per activation.
        let outer_armed = std::mem::replace(&mut self.armed_retrieves, 0);

        if function.variadic {
            self.emit(Op::LoadExtraArguments);
        }
        let mut param_slots = Vec::new();
        for name in &function.params {
            let symbol = self.sym(name);
            let index = self.declare_local(name);
            param_slots.push((symbol, index));
        }
        // Arguments pop in reverse declaration order.
        for (symbol, index) in param_slots.iter().rev() {
            self.emit(Op::InitParam(*symbol, RefFlags::DEFAULT.0, *index));
        }

        let trailing_yield = function.is_generator
            && matches!(function.body.last().map(|s| &s.kind), Some(StmtKind::Yield(_)));
        if trailing_yield {
            let (head, last) = function
                .body
                .split_at(function.body.len() - 1);
            self.emit_statements(head)?;
            if let StmtKind::Yield(value) = &last[0].kind {
                self.current_line = last[0].line;
                self.emit_expr(value)?;
                self.emit(Op::YieldExitGenerator);
            }
        } else {
            self.emit_statements(&function.body)?;
            if function.is_generator {
                self.emit(Op::ExitGenerator);
            } else {
                let none = self.none_const()?;
                self.emit(Op::LoadConstant(none));
                self.emit(Op::ExitCall);
            }
        }

        self.armed_retrieves = outer_armed;
        self.generator.pop();
        self.scopes.pop();
        self.patch(skip);

        let signature = if function.variadic {
            -(function.params.len() as i32 + 1)
        } else {
            function.params.len() as i32
        };
        Ok(FunctionProto::single(
            signature,
            entry,
            function.is_generator,
        ))
    }

    fn emit_class(&mut self, class: &ClassDef) -> Result<(), CompileError> {
        let name = self.sym(&class.name);
        let bases = class.bases.iter().map(|base| self.interner.intern(base)).collect();

        let mut members = Vec::new();
        for (member, default) in &class.vars {
            let symbol = self.sym(member);
            let constant = self.literal_const(default)?;
            members.push(MemberDescription {
                symbol,
                flags: RefFlags::DEFAULT.0,
                kind: MemberKind::Variable(constant),
            });
        }

        for method in &class.methods {
            let proto = self.emit_function_body(&method.function)?;
            let (symbol, kind) = match &method.name {
                MethodName::Named(text) => (self.sym(text), MemberKind::Method(proto)),
                MethodName::Operator(operator) => (
                    self.sym(operator.symbol_text()),
                    MemberKind::Operator(*operator, proto),
                ),
            };
            members.push(MemberDescription {
                symbol,
                flags: RefFlags::DEFAULT.0,
                kind,
            });
        }

        if self.chunk.classes.len() >= u16::MAX as usize {
            return Err(self.error("too many classes in one module"));
        }
        self.chunk.classes.push(ClassDescription {
            name,
            bases,
            members,
        });
        let index = (self.chunk.classes.len() - 1) as u16;
        self.emit(Op::RegisterClass(index));
        Ok(())
    }

    fn literal_const(&mut self, expr: &Expr) -> Result<ConstValue, CompileError> {
        match expr {
            Expr::Number(value) => Ok(ConstValue::Number(*value)),
            Expr::Str(text) => Ok(ConstValue::String(text.clone())),
            Expr::Boolean(value) => Ok(ConstValue::Boolean(*value)),
            Expr::None => Ok(ConstValue::None),
            Expr::Null => Ok(ConstValue::Null),
            Expr::Regex(pattern, flags) => Ok(ConstValue::Regex(self.build_regex(pattern, flags)?)),
            Expr::Unary(UnaryOp::Neg, inner) => match &**inner {
                Expr::Number(value) => Ok(ConstValue::Number(-value)),
                _ => Err(self.error("member defaults must be literals")),
            },
            _ => Err(self.error("member defaults must be literals")),
        }
    }

    fn build_regex(
        &self,
        pattern: &str,
        flags: &str,
    ) -> Result<crate::core::value::RegexData, CompileError> {
        let source = if flags.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{}){}", flags, pattern)
        };
        let initializer = format!("/{}/{}", pattern, flags);
        crate::vm::ops::container::compile_regex(&initializer, &source)
            .map_err(|error| self.error(error.to_string()))
    }

    // ---- expressions ----

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Number(value) => {
                let index = self.add_const(ConstValue::Number(*value))?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::Str(text) => {
                let index = self.add_const(ConstValue::String(text.clone()))?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::Regex(pattern, flags) => {
                let data = self.build_regex(pattern, flags)?;
                let index = self.add_const(ConstValue::Regex(data))?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::Boolean(value) => {
                let index = self.add_const(ConstValue::Boolean(*value))?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::None => {
                let index = self.none_const()?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::Null => {
                let index = self.add_const(ConstValue::Null)?;
                self.emit(Op::LoadConstant(index));
            }
            Expr::Name(name) => {
                let symbol = self.sym(name);
                match self.local(name) {
                    Some(index) => {
                        self.emit(Op::LoadFast(symbol, index));
                    }
                    None => {
                        self.emit(Op::LoadSymbol(symbol));
                    }
                }
            }
            Expr::Global(name) => {
                let symbol = self.sym(name);
                self.emit(Op::LoadSymbol(symbol));
            }
            Expr::Member(object, member) => {
                self.emit_expr(object)?;
                let symbol = self.sym(member);
                self.emit(Op::LoadMember(symbol));
            }
            Expr::Index(object, index) => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Op::Subscript);
            }
            Expr::Call(callee, args) => {
                if args.len() > u8::MAX as usize {
                    return Err(self.error("too many call arguments"));
                }
                match &**callee {
                    Expr::Member(object, member) => {
                        self.emit_expr(object)?;
                        let symbol = self.sym(member);
                        self.emit(Op::InitMemberCall(symbol));
                        for arg in args {
                            self.emit_expr(arg)?;
                        }
                        self.emit(Op::CallMember(args.len() as u8));
                    }
                    _ => {
                        self.emit_expr(callee)?;
                        self.emit(Op::InitCall);
                        for arg in args {
                            self.emit_expr(arg)?;
                        }
                        self.emit(Op::Call(args.len() as u8));
                    }
                }
            }
            Expr::Array(elements) => {
                self.emit(Op::AllocArray);
                for element in elements {
                    self.emit_expr(element)?;
                }
                self.emit(Op::InitArray(self.counted(elements.len())?));
            }
            Expr::Hash(entries) => {
                self.emit(Op::AllocHash);
                for (key, value) in entries {
                    self.emit_expr(key)?;
                    self.emit_expr(value)?;
                }
                self.emit(Op::InitHash(self.counted(entries.len())?));
            }
            Expr::IteratorLit(elements) => {
                self.emit(Op::AllocIterator);
                for element in elements {
                    self.emit_expr(element)?;
                }
                self.emit(Op::InitIterator(self.counted(elements.len())?));
            }
            Expr::Unary(op, operand) => {
                self.emit_expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Pos => Op::Pos,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::BitNot => Op::BitNot,
                    UnaryOp::Typeof => Op::Typeof,
                    UnaryOp::Membersof => Op::Membersof,
                };
                self.emit(op);
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                self.emit_expr(lhs)?;
                let short = self.emit(Op::AndPreCheck(0));
                self.emit_expr(rhs)?;
                self.patch(short);
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                self.emit_expr(lhs)?;
                let short = self.emit(Op::OrPreCheck(0));
                self.emit_expr(rhs)?;
                self.patch(short);
            }
            Expr::Binary(BinOp::In, lhs, rhs) => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.emit(Op::In);
            }
            Expr::Binary(op, lhs, rhs) => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                let op = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Pow => Op::Pow,
                    BinOp::Shl => Op::ShiftLeft,
                    BinOp::Shr => Op::ShiftRight,
                    BinOp::BitAnd => Op::BitAnd,
                    BinOp::BitOr => Op::BitOr,
                    BinOp::BitXor => Op::BitXor,
                    BinOp::Eq => Op::Eq,
                    BinOp::Ne => Op::Ne,
                    BinOp::StrictEq => Op::StrictEq,
                    BinOp::StrictNe => Op::StrictNe,
                    BinOp::Lt => Op::Lt,
                    BinOp::Gt => Op::Gt,
                    BinOp::Le => Op::Le,
                    BinOp::Ge => Op::Ge,
                    BinOp::Is => Op::Is,
                    BinOp::Match => Op::RegexMatch,
                    BinOp::NotMatch => Op::RegexUnmatch,
                    BinOp::InclusiveRange => Op::InclusiveRange,
                    BinOp::ExclusiveRange => Op::ExclusiveRange,
                    BinOp::And | BinOp::Or | BinOp::In => unreachable!(),
                };
                self.emit(op);
            }
            Expr::Defined(target) => {
                self.emit_defined(target)?;
                self.emit(Op::CheckDefined);
            }
            Expr::Lambda(function) => {
                let proto = self.emit_function_body(function)?;
                let index = self.add_const(ConstValue::Function(proto))?;
                self.emit(Op::LoadConstant(index));
                match &function.captures {
                    CaptureSpec::None => {}
                    CaptureSpec::All => {
                        self.emit(Op::InitCapture);
                        self.emit(Op::CaptureAll);
                    }
                    CaptureSpec::Names(names) => {
                        self.emit(Op::InitCapture);
                        for name in names.clone() {
                            let symbol = self.sym(&name);
                            self.emit(Op::CaptureSymbol(symbol));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_defined(&mut self, target: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Name(name) | Expr::Global(name) => {
                let symbol = self.sym(name);
                self.emit(Op::FindDefinedSymbol(symbol));
                Ok(())
            }
            Expr::Member(object, member) => {
                self.emit_defined(object)?;
                let symbol = self.sym(member);
                self.emit(Op::FindDefinedMember(symbol));
                Ok(())
            }
            other => {
                self.emit_expr(other)?;
                Ok(())
            }
        }
    }

    fn counted(&self, count: usize) -> Result<u16, CompileError> {
        u16::try_from(count).map_err(|_| self.error("too many elements in one literal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_expression_statements() {
        let mut interner = Interner::new();
        let chunk = compile("print 1 + 2 * 3", "main", &mut interner).unwrap();
        assert!(chunk.code.contains(&Op::Add));
        assert!(chunk.code.contains(&Op::Mul));
        assert!(chunk.code.contains(&Op::Print));
        assert_eq!(chunk.code.last(), Some(&Op::ExitModule));
        assert_eq!(chunk.code.len(), chunk.lines.len());
    }

    #[test]
    fn for_loops_use_range_commands() {
        let mut interner = Interner::new();
        let chunk = compile("for x in [1, 2] { print x }", "main", &mut interner).unwrap();
        assert!(chunk.code.contains(&Op::RangeInit));
        assert!(chunk.code.contains(&Op::RangeNext));
        assert!(
            chunk
                .code
                .iter()
                .any(|op| matches!(op, Op::RangeCheck(_)))
        );
    }

    #[test]
    fn functions_become_prototypes() {
        let mut interner = Interner::new();
        let chunk = compile("def f(a, b) { return a + b }", "main", &mut interner).unwrap();
        let proto = chunk.constants.iter().find_map(|constant| match constant {
            ConstValue::Function(proto) => Some(proto),
            _ => None,
        });
        let proto = proto.expect("function prototype");
        assert_eq!(proto.mapping.len(), 1);
        assert_eq!(proto.mapping[0].0, 2);
    }

    #[test]
    fn variadic_signature_is_negative() {
        let mut interner = Interner::new();
        let chunk = compile("def f(a, ...) { return a }", "main", &mut interner).unwrap();
        let proto = chunk
            .constants
            .iter()
            .find_map(|constant| match constant {
                ConstValue::Function(proto) => Some(proto),
                _ => None,
            })
            .expect("function prototype");
        assert_eq!(proto.mapping[0].0, -2);
        assert!(chunk.code.contains(&Op::LoadExtraArguments));
    }

    #[test]
    fn try_blocks_arm_retrieve_points() {
        let mut interner = Interner::new();
        let chunk = compile(
            "try { raise \"x\" } catch (e) { print e }",
            "main",
            &mut interner,
        )
        .unwrap();
        assert!(
            chunk
                .code
                .iter()
                .any(|op| matches!(op, Op::SetRetrievePoint(_)))
        );
        assert!(chunk.code.contains(&Op::UnsetRetrievePoint));
        assert!(chunk.code.contains(&Op::Raise));
    }
}
