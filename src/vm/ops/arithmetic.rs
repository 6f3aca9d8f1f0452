//! Arithmetic and bitwise operators.

use super::{
    binary_operands, is_object, no_matching_operator, push_number, push_string, reject_none,
};
use crate::core::error::MintError;
use crate::core::value::Val;
use crate::runtime::class::ClassOperator;
use crate::vm::cursor::Machine;
use crate::vm::ops::cast;

macro_rules! numeric_binary {
    ($name:ident, $operator:expr, $symbol:expr, $apply:expr) => {
        pub fn $name(machine: &mut Machine) -> Result<(), MintError> {
            let (lhs, rhs) = binary_operands(machine)?;
            reject_none(machine, lhs, $symbol)?;
            reject_none(machine, rhs, $symbol)?;
            if is_object(machine, lhs) && machine.try_operator_overload($operator, lhs, &[rhs])? {
                return Ok(());
            }
            if numeric_operand(machine, lhs) && numeric_operand(machine, rhs) {
                let a = cast::to_number(machine, lhs)?;
                let b = cast::to_number(machine, rhs)?;
                let apply: fn(f64, f64) -> f64 = $apply;
                return push_number(machine, apply(a, b));
            }
            no_matching_operator(machine, $symbol, lhs)
        }
    };
}

fn numeric_operand(machine: &Machine, reference: crate::core::value::Reference) -> bool {
    matches!(
        machine.state.heap.get(reference.handle),
        Val::Number(_) | Val::Boolean(_)
    )
}

fn string_operand(machine: &Machine, reference: crate::core::value::Reference) -> bool {
    machine.state.heap.get(reference.handle).as_string().is_some()
}

/// `+`: numeric addition with boolean promotion; concatenation when either
/// operand is a string.
pub fn add(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, "+")?;
    reject_none(machine, rhs, "+")?;
    if string_operand(machine, lhs) || string_operand(machine, rhs) {
        let mut text = cast::to_string(&machine.state.heap, &machine.state.globals, lhs);
        text.push_str(&cast::to_string(
            &machine.state.heap,
            &machine.state.globals,
            rhs,
        ));
        return push_string(machine, text);
    }
    if is_object(machine, lhs) && machine.try_operator_overload(ClassOperator::Add, lhs, &[rhs])? {
        return Ok(());
    }
    if numeric_operand(machine, lhs) && numeric_operand(machine, rhs) {
        let a = cast::to_number(machine, lhs)?;
        let b = cast::to_number(machine, rhs)?;
        return push_number(machine, a + b);
    }
    no_matching_operator(machine, "+", lhs)
}

numeric_binary!(sub, ClassOperator::Sub, "-", |a, b| a - b);
numeric_binary!(mul, ClassOperator::Mul, "*", |a, b| a * b);
numeric_binary!(div, ClassOperator::Div, "/", |a, b| a / b);
numeric_binary!(modulo, ClassOperator::Mod, "%", |a, b| a % b);
numeric_binary!(pow, ClassOperator::Pow, "**", |a, b| a.powf(b));
numeric_binary!(shift_left, ClassOperator::ShiftLeft, "<<", |a, b| {
    (((a as i64) << (b as i64 & 63)) as f64)
});
numeric_binary!(shift_right, ClassOperator::ShiftRight, ">>", |a, b| {
    (((a as i64) >> (b as i64 & 63)) as f64)
});
numeric_binary!(bit_and, ClassOperator::BitAnd, "&", |a, b| {
    ((a as i64) & (b as i64)) as f64
});
numeric_binary!(bit_or, ClassOperator::BitOr, "|", |a, b| {
    ((a as i64) | (b as i64)) as f64
});
numeric_binary!(bit_xor, ClassOperator::BitXor, "^", |a, b| {
    ((a as i64) ^ (b as i64)) as f64
});

pub fn neg(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    reject_none(machine, value, "-")?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::Neg, value, &[])?
    {
        return Ok(());
    }
    let number = cast::to_number(machine, value)?;
    push_number(machine, -number)
}

pub fn pos(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    reject_none(machine, value, "+")?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::Pos, value, &[])?
    {
        return Ok(());
    }
    let number = cast::to_number(machine, value)?;
    push_number(machine, number)
}

pub fn bit_not(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    reject_none(machine, value, "~")?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::BitNot, value, &[])?
    {
        return Ok(());
    }
    let number = cast::to_integer(machine, value)?;
    push_number(machine, !number as f64)
}

pub fn inc(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    reject_none(machine, value, "++")?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::Inc, value, &[])?
    {
        return Ok(());
    }
    let number = cast::to_number(machine, value)?;
    push_number(machine, number + 1.0)
}

pub fn dec(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    reject_none(machine, value, "--")?;
    if is_object(machine, value)
        && machine.try_operator_overload(ClassOperator::Dec, value, &[])?
    {
        return Ok(());
    }
    let number = cast::to_number(machine, value)?;
    push_number(machine, number - 1.0)
}
