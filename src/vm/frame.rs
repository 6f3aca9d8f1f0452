use crate::core::gc::Trace;
use crate::core::value::{Handle, ModuleId, Reference};
use crate::vm::printer::Printer;
use crate::vm::symbols::SymbolTable;
use smallvec::SmallVec;

pub const INLINE_ARG_CAPACITY: usize = 8;
pub type ArgList = SmallVec<[Reference; INLINE_ARG_CAPACITY]>;

/// Saved `(handler ip, stack depth)` for language-level exception
/// resumption within a frame.
#[derive(Debug, Clone, Copy)]
pub struct RetrievePoint {
    pub ip: usize,
    pub stack_depth: usize,
}

/// One call-stack entry. The top frame carries the cursor's current
/// execution position.
#[derive(Debug, Clone)]
pub struct Frame {
    pub module: ModuleId,
    pub ip: usize,
    /// Local bindings of this activation.
    pub symbols: SymbolTable,
    /// Innermost-last exception handlers armed in this frame.
    pub retrieve_points: Vec<RetrievePoint>,
    /// Non-null while this frame runs a generator body.
    pub generator: Option<Handle>,
    /// Targets of enclosing generator expressions, innermost last.
    pub expr_generators: Vec<Handle>,
    /// Open `print` redirection targets, innermost last.
    pub printers: Vec<Printer>,
    /// First operand-stack slot owned by this frame.
    pub stack_base: usize,
    /// Extra arguments beyond the fixed arity, still on the stack until
    /// `LoadExtraArguments` packs them into `va_args`.
    pub extra_args: usize,
    /// Pushed as the call result when this frame pops or interrupts.
    pub result_on_exit: Option<Reference>,
    /// Drop the callee's result instead of pushing it.
    pub discard_result: bool,
}

impl Frame {
    pub fn new(module: ModuleId, ip: usize) -> Self {
        Self {
            module,
            ip,
            symbols: SymbolTable::new(),
            retrieve_points: Vec::new(),
            generator: None,
            expr_generators: Vec::new(),
            printers: Vec::new(),
            stack_base: 0,
            extra_args: 0,
            result_on_exit: None,
            discard_result: false,
        }
    }
}

impl Trace for Frame {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        self.symbols.trace(mark);
        if let Some(generator) = self.generator {
            mark(generator);
        }
        for generator in &self.expr_generators {
            mark(*generator);
        }
        for printer in &self.printers {
            if let Printer::Object(reference) = printer {
                mark(reference.handle);
            }
        }
        if let Some(result) = &self.result_on_exit {
            mark(result.handle);
        }
    }
}

/// A partially-built call site: the callee is known, its arguments are
/// still being evaluated on the operand stack.
#[derive(Debug, Clone)]
pub struct WaitingCall {
    pub reference: Reference,
    /// Receiver for member and operator calls.
    pub self_ref: Option<Reference>,
    pub extra_args: usize,
}

impl WaitingCall {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            self_ref: None,
            extra_args: 0,
        }
    }
}

impl Trace for WaitingCall {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        mark(self.reference.handle);
        if let Some(receiver) = &self.self_ref {
            mark(receiver.handle);
        }
    }
}

/// A parked generator activation: the interrupted frame, resumed by
/// pushing it back onto a cursor.
#[derive(Debug, Clone)]
pub struct SavedState {
    pub frame: Frame,
}

impl Trace for SavedState {
    fn trace(&self, mark: &mut dyn FnMut(Handle)) {
        self.frame.trace(mark);
    }
}
