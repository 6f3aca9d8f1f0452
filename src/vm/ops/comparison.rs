//! Equality, ordering and logic operators.

use super::{
    binary_operands, is_object, no_matching_operator, push_boolean, reject_none,
};
use crate::core::error::MintError;
use crate::core::gc::GcHeap;
use crate::core::value::{Payload, Reference, Val};
use crate::runtime::class::ClassOperator;
use crate::vm::cursor::Machine;
use crate::vm::ops::cast;

/// Structural value equality for the scalar formats and strings. `None`
/// means the formats need class-operator or identity treatment.
pub fn ref_equals(heap: &GcHeap, lhs: Reference, rhs: Reference) -> Option<bool> {
    let a = heap.get(lhs.handle);
    let b = heap.get(rhs.handle);
    match (a, b) {
        (Val::None, Val::None) => Some(true),
        (Val::None, _) | (_, Val::None) => Some(false),
        (Val::Null, Val::Null) => Some(true),
        (Val::Null, _) | (_, Val::Null) => Some(false),
        (Val::Number(_) | Val::Boolean(_), Val::Number(_) | Val::Boolean(_)) => {
            Some(scalar(a) == scalar(b))
        }
        (Val::Object(x), Val::Object(y)) => match (&x.payload, &y.payload) {
            (Payload::String(s), Payload::String(t)) => Some(s == t),
            _ => None,
        },
        _ => None,
    }
}

fn scalar(value: &Val) -> f64 {
    match value {
        Val::Number(v) => *v,
        Val::Boolean(v) => {
            if *v {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

pub fn eq(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    if let Some(result) = ref_equals(&machine.state.heap, lhs, rhs) {
        return push_boolean(machine, result);
    }
    if is_object(machine, lhs) && machine.try_operator_overload(ClassOperator::Eq, lhs, &[rhs])? {
        return Ok(());
    }
    // Identity compare when the class leaves `==` unimplemented.
    push_boolean(machine, lhs.handle == rhs.handle)
}

pub fn ne(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    if let Some(result) = ref_equals(&machine.state.heap, lhs, rhs) {
        return push_boolean(machine, !result);
    }
    if is_object(machine, lhs) && machine.try_operator_overload(ClassOperator::Ne, lhs, &[rhs])? {
        return Ok(());
    }
    push_boolean(machine, lhs.handle != rhs.handle)
}

#[derive(Clone, Copy)]
enum Ordering {
    Lt,
    Gt,
    Le,
    Ge,
}

fn ordered(
    machine: &mut Machine,
    ordering: Ordering,
    operator: ClassOperator,
    symbol: &'static str,
) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, symbol)?;
    reject_none(machine, rhs, symbol)?;

    let a = machine.state.heap.get(lhs.handle);
    let b = machine.state.heap.get(rhs.handle);
    // Ordering is defined on numbers and strings out of the box; other
    // types must override.
    match (a, b) {
        (Val::Number(_) | Val::Boolean(_), Val::Number(_) | Val::Boolean(_)) => {
            let x = scalar(a);
            let y = scalar(b);
            let result = match ordering {
                Ordering::Lt => x < y,
                Ordering::Gt => x > y,
                Ordering::Le => x <= y,
                Ordering::Ge => x >= y,
            };
            push_boolean(machine, result)
        }
        (Val::Object(x), Val::Object(y)) => match (&x.payload, &y.payload) {
            (Payload::String(s), Payload::String(t)) => {
                // UTF-8 code-point order.
                let result = match ordering {
                    Ordering::Lt => s < t,
                    Ordering::Gt => s > t,
                    Ordering::Le => s <= t,
                    Ordering::Ge => s >= t,
                };
                push_boolean(machine, result)
            }
            _ => {
                if machine.try_operator_overload(operator, lhs, &[rhs])? {
                    Ok(())
                } else {
                    no_matching_operator(machine, symbol, lhs)
                }
            }
        },
        _ => {
            if is_object(machine, lhs) && machine.try_operator_overload(operator, lhs, &[rhs])? {
                Ok(())
            } else {
                no_matching_operator(machine, symbol, lhs)
            }
        }
    }
}

pub fn lt(machine: &mut Machine) -> Result<(), MintError> {
    ordered(machine, Ordering::Lt, ClassOperator::Lt, "<")
}

pub fn gt(machine: &mut Machine) -> Result<(), MintError> {
    ordered(machine, Ordering::Gt, ClassOperator::Gt, ">")
}

pub fn le(machine: &mut Machine) -> Result<(), MintError> {
    ordered(machine, Ordering::Le, ClassOperator::Le, "<=")
}

pub fn ge(machine: &mut Machine) -> Result<(), MintError> {
    ordered(machine, Ordering::Ge, ClassOperator::Ge, ">=")
}

/// `===`: identity of the underlying cell.
pub fn strict_eq(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    push_boolean(machine, lhs.handle == rhs.handle)
}

pub fn strict_ne(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    push_boolean(machine, lhs.handle != rhs.handle)
}

pub fn is_op(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    if is_object(machine, lhs) && machine.try_operator_overload(ClassOperator::Is, lhs, &[rhs])? {
        return Ok(());
    }
    push_boolean(machine, lhs.handle == rhs.handle)
}

pub fn not_op(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::Not, value, &[])?
    {
        return Ok(());
    }
    let truthy = cast::to_boolean(&machine.state.heap, value);
    push_boolean(machine, !truthy)
}
