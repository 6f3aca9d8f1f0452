//! Operator dispatch.
//!
//! Every operator is a free function over the machine that consumes its
//! operands from the operand stack and pushes the result. Lookup order for
//! a binary operator: the left operand's class operator table first (the
//! overload enters as a member call), then the primitive implementation
//! keyed on the operand formats; with no match the operator raises
//! `no-matching-operator` as a language exception. `none` is rejected by
//! every operator except equality.

pub mod arithmetic;
pub mod cast;
pub mod comparison;
pub mod container;

use crate::core::error::MintError;
use crate::core::value::{Reference, Val};
use crate::vm::cursor::Machine;

pub(crate) fn binary_operands(machine: &mut Machine) -> Result<(Reference, Reference), MintError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    Ok((lhs, rhs))
}

pub(crate) fn reject_none(
    machine: &Machine,
    reference: Reference,
    operation: &'static str,
) -> Result<(), MintError> {
    if matches!(machine.state.heap.get(reference.handle), Val::None) {
        return Err(MintError::InvalidUseOfNone { operation });
    }
    Ok(())
}

pub(crate) fn is_object(machine: &Machine, reference: Reference) -> bool {
    matches!(machine.state.heap.get(reference.handle), Val::Object(_))
}

pub(crate) fn push_number(machine: &mut Machine, value: f64) -> Result<(), MintError> {
    let handle = machine.state.heap.alloc(Val::Number(value))?;
    machine.push(Reference::new(handle));
    Ok(())
}

pub(crate) fn push_boolean(machine: &mut Machine, value: bool) -> Result<(), MintError> {
    let handle = machine.state.heap.alloc(Val::Boolean(value))?;
    machine.push(Reference::new(handle));
    Ok(())
}

pub(crate) fn push_string(machine: &mut Machine, text: String) -> Result<(), MintError> {
    let reference = machine
        .state
        .globals
        .alloc_string(&mut machine.state.heap, text)?;
    machine.push(reference);
    Ok(())
}

/// Step 3 of operator lookup: nothing matched.
pub(crate) fn no_matching_operator(
    machine: &mut Machine,
    operator: &'static str,
    lhs: Reference,
) -> Result<(), MintError> {
    let type_name = machine
        .state
        .globals
        .type_name(&machine.state.heap, lhs.handle);
    machine.raise_message(format!(
        "no matching operator '{}' for '{}'",
        operator, type_name
    ))
}
