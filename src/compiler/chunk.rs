use crate::core::value::{FunctionHandle, FunctionValue, ModuleId, RegexData};
use crate::runtime::class::ClassDescription;
use crate::vm::opcode::Op;

/// Compile-time template for a function value. Signatures are arities
/// (negative-encoded for variadic bodies, see `FunctionValue`); offsets
/// are entry points in the declaring module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionProto {
    pub mapping: Vec<(i32, usize, bool)>,
}

impl FunctionProto {
    pub fn single(signature: i32, offset: usize, generator: bool) -> Self {
        Self {
            mapping: vec![(signature, offset, generator)],
        }
    }

    /// Realize the template against the module it was compiled in.
    pub fn materialize(&self, module: ModuleId) -> FunctionValue {
        let mut value = FunctionValue::default();
        for &(signature, offset, generator) in &self.mapping {
            value.mapping.insert(
                signature,
                FunctionHandle {
                    module,
                    offset,
                    generator,
                },
            );
        }
        value
    }
}

/// A literal in the constant table, materialized into a fresh cell on each
/// load.
#[derive(Debug, Clone)]
pub enum ConstValue {
    None,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Regex(RegexData),
    Function(FunctionProto),
}

/// One compiled module: its instructions, literals, class declarations and
/// per-instruction source lines.
#[derive(Debug, Default)]
pub struct CodeChunk {
    pub name: String,
    pub code: Vec<Op>,
    pub constants: Vec<ConstValue>,
    pub lines: Vec<u32>,
    pub classes: Vec<ClassDescription>,
}
