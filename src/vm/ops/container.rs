//! Container, range, regex and introspection operators.

use super::{
    binary_operands, is_object, no_matching_operator, push_boolean, push_string, reject_none,
};
use crate::core::error::MintError;
use crate::core::gc::GcHeap;
use crate::core::value::{HashKey, Payload, Reference, RegexData, Val};
use crate::runtime::class::ClassOperator;
use crate::vm::cursor::Machine;
use crate::vm::iterator::{context_of, iterator_init, IteratorContext, RangeIterator};
use crate::vm::ops::cast;
use crate::vm::ops::comparison::ref_equals;

/// Fold a key value for hash storage. Numbers, booleans and strings fold
/// into comparable keys; other values key by cell identity.
pub fn hash_key_of(heap: &GcHeap, reference: Reference) -> HashKey {
    match heap.get(reference.handle) {
        Val::Number(value) => HashKey::from_number(*value),
        Val::Boolean(value) => HashKey::Boolean(*value),
        Val::Object(object) => match &object.payload {
            Payload::String(text) => HashKey::String(text.clone()),
            _ => HashKey::Identity(reference.handle),
        },
        _ => HashKey::Identity(reference.handle),
    }
}

/// The copy operator: write a top-level copy of the source value into the
/// target cell, observable through every reference sharing it.
pub fn copy_value(machine: &mut Machine) -> Result<(), MintError> {
    let source = machine.pop()?;
    let target = machine.peek()?;
    if target.is_const_value() {
        return Err(MintError::ConstValueWrite { operation: ":=" });
    }
    if is_object(machine, target)
        && machine.try_operator_overload(ClassOperator::Copy, target, &[source])?
    {
        return Ok(());
    }
    machine.finalize_if_generator(source.handle)?;
    let copy = machine.state.heap.clone_cell(source.handle)?;
    let value = std::mem::replace(machine.state.heap.get_mut(copy), Val::None);
    *machine.state.heap.get_mut(target.handle) = value;
    Ok(())
}

fn waiting_container(machine: &mut Machine) -> Result<(Reference, usize), MintError> {
    let call = machine
        .cursor
        .waiting_calls
        .pop()
        .ok_or(MintError::StackUnderflow {
            operation: "container init",
        })?;
    Ok((call.reference, call.extra_args))
}

fn split_elements(machine: &mut Machine, count: usize) -> Result<Vec<Reference>, MintError> {
    let split = machine
        .cursor
        .stack
        .len()
        .checked_sub(count)
        .ok_or(MintError::StackUnderflow {
            operation: "container init",
        })?;
    Ok(machine.cursor.stack.split_off(split))
}

pub fn init_array(machine: &mut Machine, count: usize) -> Result<(), MintError> {
    let (reference, extra) = waiting_container(machine)?;
    let elements = split_elements(machine, count + extra)?;
    match machine.state.heap.get_mut(reference.handle) {
        Val::Object(object) => match &mut object.payload {
            Payload::Array(values) => {
                *values = elements.iter().map(|item| item.share()).collect();
            }
            _ => return Err(MintError::System("array init on non-array".into())),
        },
        _ => return Err(MintError::System("array init on non-array".into())),
    }
    machine.push(reference);
    Ok(())
}

pub fn init_hash(machine: &mut Machine, count: usize) -> Result<(), MintError> {
    let (reference, _) = waiting_container(machine)?;
    let elements = split_elements(machine, count * 2)?;
    let mut entries = indexmap::IndexMap::with_capacity(count);
    for pair in elements.chunks(2) {
        let key = hash_key_of(&machine.state.heap, pair[0]);
        entries.insert(key, pair[1].share());
    }
    match machine.state.heap.get_mut(reference.handle) {
        Val::Object(object) => match &mut object.payload {
            Payload::Hash(values) => *values = entries,
            _ => return Err(MintError::System("hash init on non-hash".into())),
        },
        _ => return Err(MintError::System("hash init on non-hash".into())),
    }
    machine.push(reference);
    Ok(())
}

pub fn init_iterator(machine: &mut Machine, count: usize) -> Result<(), MintError> {
    let (reference, extra) = waiting_container(machine)?;
    let elements = split_elements(machine, count + extra)?;
    let context = crate::vm::iterator::context_of_mut(&mut machine.state.heap, reference.handle)?;
    context.reserve(elements.len())?;
    for element in elements {
        context.yield_item(element)?;
    }
    machine.push(reference);
    Ok(())
}

fn char_index(text: &str, index: i64) -> Option<usize> {
    let len = text.chars().count() as i64;
    let wrapped = if index < 0 { index + len } else { index };
    if wrapped < 0 || wrapped >= len {
        None
    } else {
        Some(wrapped as usize)
    }
}

pub fn subscript(machine: &mut Machine) -> Result<(), MintError> {
    let (container, index) = binary_operands(machine)?;
    reject_none(machine, container, "[]")?;
    reject_none(machine, index, "[]")?;

    enum Plan {
        Array(usize),
        ArrayOut(i64, usize),
        Hash(Option<Reference>),
        Char(Option<String>),
        /// Buffered element at the given offset; 0 is the current value.
        IteratorNth(i64),
        Overload,
        NotContainer(&'static str),
    }

    let plan = match machine.state.heap.get(container.handle) {
        Val::Object(object) => match &object.payload {
            Payload::Array(values) => {
                let len = values.len();
                let raw = match machine.state.heap.get(index.handle) {
                    Val::Number(v) => *v as i64,
                    Val::Boolean(v) => *v as i64,
                    _ => {
                        return Err(MintError::TypeMismatch {
                            expected: "number",
                            got: machine.state.heap.get(index.handle).format_name().into(),
                            operation: "[]",
                        })
                    }
                };
                let wrapped = if raw < 0 { raw + len as i64 } else { raw };
                if wrapped < 0 || wrapped >= len as i64 {
                    Plan::ArrayOut(raw, len)
                } else {
                    Plan::Array(wrapped as usize)
                }
            }
            Payload::Hash(values) => {
                let key = hash_key_of(&machine.state.heap, index);
                Plan::Hash(values.get(&key).copied())
            }
            Payload::String(text) => {
                let raw = match machine.state.heap.get(index.handle) {
                    Val::Number(v) => *v as i64,
                    _ => {
                        return Err(MintError::TypeMismatch {
                            expected: "number",
                            got: machine.state.heap.get(index.handle).format_name().into(),
                            operation: "[]",
                        })
                    }
                };
                Plan::Char(
                    char_index(text, raw)
                        .and_then(|i| text.chars().nth(i))
                        .map(|c| c.to_string()),
                )
            }
            Payload::Iterator(_) => {
                let raw = match machine.state.heap.get(index.handle) {
                    Val::Number(v) => *v as i64,
                    _ => 0,
                };
                Plan::IteratorNth(raw)
            }
            _ => Plan::Overload,
        },
        other => Plan::NotContainer(other.format_name()),
    };

    match plan {
        Plan::Array(position) => {
            let element = match machine.state.heap.get(container.handle) {
                Val::Object(object) => match &object.payload {
                    Payload::Array(values) => values[position],
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            };
            machine.push(element.share());
            Ok(())
        }
        Plan::ArrayOut(raw, len) => machine.raise_message(format!(
            "array index {} is out of range (size {})",
            raw, len
        )),
        Plan::Hash(Some(value)) => {
            machine.push(value.share());
            Ok(())
        }
        Plan::Hash(None) => {
            let key = cast::to_string(&machine.state.heap, &machine.state.globals, index);
            machine.raise_message(format!("hash has no key '{}'", key))
        }
        Plan::Char(Some(text)) => push_string(machine, text),
        Plan::Char(None) => machine.raise_message("string index is out of range".to_string()),
        Plan::IteratorNth(offset) => {
            let value = if offset <= 0 {
                context_of(&machine.state.heap, container.handle)?.value(&machine.state.heap)
            } else {
                let snapshot = context_of(&machine.state.heap, container.handle)?.clone();
                let items = snapshot.copy_to_items(&mut machine.state.heap)?;
                items.iter().nth(offset as usize).copied()
            };
            match value {
                Some(value) => {
                    machine.push(value.share());
                    Ok(())
                }
                None => {
                    let none = machine.state.heap.alloc(Val::None)?;
                    machine.push(Reference::new(none));
                    Ok(())
                }
            }
        }
        Plan::Overload => {
            if machine.try_operator_overload(ClassOperator::Subscript, container, &[index])? {
                Ok(())
            } else {
                no_matching_operator(machine, "[]", container)
            }
        }
        Plan::NotContainer(_) => no_matching_operator(machine, "[]", container),
    }
}

pub fn subscript_move(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    let index = machine.pop()?;
    let container = machine.pop()?;
    reject_none(machine, container, "[]=")?;
    reject_none(machine, index, "[]=")?;
    if container.is_const_value() {
        return Err(MintError::ConstValueWrite { operation: "[]=" });
    }

    let key = hash_key_of(&machine.state.heap, index);
    let index_number = machine.state.heap.get(index.handle).as_number();
    let replacement = cast::to_string(&machine.state.heap, &machine.state.globals, value);

    enum Outcome {
        Done,
        RaiseRange(i64, usize),
        Overload,
    }

    let outcome = match machine.state.heap.get_mut(container.handle) {
        Val::Object(object) => match &mut object.payload {
            Payload::Array(values) => {
                let len = values.len();
                let raw = index_number.unwrap_or(0.0) as i64;
                let wrapped = if raw < 0 { raw + len as i64 } else { raw };
                if wrapped < 0 || wrapped >= len as i64 {
                    Outcome::RaiseRange(raw, len)
                } else {
                    values[wrapped as usize] = value.share();
                    Outcome::Done
                }
            }
            Payload::Hash(values) => {
                // A missing key inserts.
                values.insert(key, value.share());
                Outcome::Done
            }
            Payload::String(text) => {
                let raw = index_number.unwrap_or(0.0) as i64;
                match char_index(text, raw) {
                    Some(position) => {
                        let mut rebuilt = String::with_capacity(text.len());
                        for (i, c) in text.chars().enumerate() {
                            if i == position {
                                rebuilt.push_str(&replacement);
                            } else {
                                rebuilt.push(c);
                            }
                        }
                        *text = rebuilt;
                        Outcome::Done
                    }
                    None => Outcome::RaiseRange(raw, 0),
                }
            }
            _ => Outcome::Overload,
        },
        _ => Outcome::Overload,
    };

    match outcome {
        Outcome::Done => {
            machine.push(value);
            Ok(())
        }
        Outcome::RaiseRange(raw, len) => machine.raise_message(format!(
            "index {} is out of range (size {})",
            raw, len
        )),
        Outcome::Overload => {
            if machine.try_operator_overload(
                ClassOperator::SubscriptMove,
                container,
                &[index, value],
            )? {
                Ok(())
            } else {
                no_matching_operator(machine, "[]=", container)
            }
        }
    }
}

/// Membership: an element against a container. Hashes test keys, strings
/// test substrings, arrays and iterators test element equality.
pub fn in_op(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, "in")?;
    reject_none(machine, rhs, "in")?;

    if is_object(machine, rhs) && machine.try_operator_overload(ClassOperator::In, rhs, &[lhs])? {
        return Ok(());
    }

    machine.finalize_if_generator(rhs.handle)?;

    enum Plan {
        Elements(Vec<Reference>),
        HashKey,
        Substring(String),
        Snapshot(IteratorContext),
        Miss,
    }

    let plan = match machine.state.heap.get(rhs.handle) {
        Val::Object(object) => match &object.payload {
            Payload::Array(values) => Plan::Elements(values.clone()),
            Payload::Hash(_) => Plan::HashKey,
            Payload::String(text) => Plan::Substring(text.clone()),
            Payload::Iterator(context) => Plan::Snapshot(context.clone()),
            _ => Plan::Miss,
        },
        _ => Plan::Miss,
    };

    let found = match plan {
        Plan::Elements(values) => values.iter().any(|item| {
            ref_equals(&machine.state.heap, lhs, *item).unwrap_or(item.handle == lhs.handle)
        }),
        Plan::HashKey => {
            let key = hash_key_of(&machine.state.heap, lhs);
            match machine.state.heap.get(rhs.handle) {
                Val::Object(object) => match &object.payload {
                    Payload::Hash(values) => values.contains_key(&key),
                    _ => false,
                },
                _ => false,
            }
        }
        Plan::Substring(text) => {
            let needle = cast::to_string(&machine.state.heap, &machine.state.globals, lhs);
            text.contains(&needle)
        }
        Plan::Snapshot(snapshot) => {
            // Walk a snapshot so the original is not consumed.
            let items = snapshot.copy_to_items(&mut machine.state.heap)?;
            items.iter().any(|item| {
                ref_equals(&machine.state.heap, lhs, *item).unwrap_or(item.handle == lhs.handle)
            })
        }
        Plan::Miss => false,
    };
    push_boolean(machine, found)
}

pub fn inclusive_range(machine: &mut Machine) -> Result<(), MintError> {
    range_operator(machine, true)
}

pub fn exclusive_range(machine: &mut Machine) -> Result<(), MintError> {
    range_operator(machine, false)
}

fn range_operator(machine: &mut Machine, inclusive: bool) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, "..")?;
    reject_none(machine, rhs, "..")?;
    let operator = if inclusive {
        ClassOperator::InclusiveRange
    } else {
        ClassOperator::ExclusiveRange
    };
    if is_object(machine, lhs) && machine.try_operator_overload(operator, lhs, &[rhs])? {
        return Ok(());
    }
    let begin = cast::to_number(machine, lhs)?;
    let end = cast::to_number(machine, rhs)?;
    let range = if inclusive {
        RangeIterator::inclusive(&mut machine.state.heap, begin, end)?
    } else {
        RangeIterator::exclusive(&mut machine.state.heap, begin, end)?
    };
    let iterator = machine
        .state
        .globals
        .alloc_iterator(&mut machine.state.heap, IteratorContext::Range(range))?;
    machine.push(iterator);
    Ok(())
}

pub fn typeof_op(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    let name = machine
        .state
        .globals
        .type_name(&machine.state.heap, value.handle);
    push_string(machine, name)
}

pub fn membersof(machine: &mut Machine) -> Result<(), MintError> {
    let value = machine.pop()?;
    let names: Vec<String> = match machine.state.heap.get(value.handle) {
        Val::Object(object) => {
            let class = machine.state.globals.class(object.class);
            class
                .members
                .keys()
                .chain(class.globals.keys())
                .map(|symbol| machine.state.globals.interner.name(*symbol))
                .collect()
        }
        Val::Package(package) => machine
            .state
            .globals
            .package(*package)
            .symbols
            .iter()
            .map(|(symbol, _)| machine.state.globals.interner.name(*symbol))
            .collect(),
        _ => Vec::new(),
    };

    let mut elements = Vec::with_capacity(names.len());
    for name in names {
        elements.push(
            machine
                .state
                .globals
                .alloc_string(&mut machine.state.heap, name)?,
        );
    }
    let array = machine
        .state
        .globals
        .alloc_array(&mut machine.state.heap, elements)?;
    machine.push(array);
    Ok(())
}

fn regex_of(machine: &mut Machine, reference: Reference) -> Result<regex::Regex, MintError> {
    if let Val::Object(object) = machine.state.heap.get(reference.handle) {
        if let Payload::Regex(data) = &object.payload {
            return Ok(data.pattern.clone());
        }
    }
    let text = cast::to_string(&machine.state.heap, &machine.state.globals, reference);
    regex::Regex::new(&text).map_err(|_| {
        MintError::System(format!("regular expression '/{}/' is not valid", text))
    })
}

pub fn regex_match(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, "=~")?;
    reject_none(machine, rhs, "=~")?;
    let pattern = regex_of(machine, rhs)?;
    let subject = cast::to_string(&machine.state.heap, &machine.state.globals, lhs);
    push_boolean(machine, pattern.is_match(&subject))
}

pub fn regex_unmatch(machine: &mut Machine) -> Result<(), MintError> {
    let (lhs, rhs) = binary_operands(machine)?;
    reject_none(machine, lhs, "!~")?;
    reject_none(machine, rhs, "!~")?;
    let pattern = regex_of(machine, rhs)?;
    let subject = cast::to_string(&machine.state.heap, &machine.state.globals, lhs);
    push_boolean(machine, !pattern.is_match(&subject))
}

/// Arm a membership find loop: `[lhs, rhs]` becomes `[lhs, iterator]`.
pub fn find_init(machine: &mut Machine) -> Result<(), MintError> {
    let source = machine.pop()?;
    let iterator = iterator_init(&mut machine.state.heap, &machine.state.globals, source)?;
    machine.push(iterator);
    Ok(())
}

/// Loop head of a find: exhausted pushes `false` and leaves; a matching
/// head pushes `true` and leaves; otherwise fall through to `FindNext`.
pub fn find_check(machine: &mut Machine, target: usize) -> Result<(), MintError> {
    let iterator = machine.peek()?;
    let needle = machine.peek_at(1)?;
    let context = context_of(&machine.state.heap, iterator.handle)?;
    if context.is_empty(&machine.state.heap) {
        machine.pop()?;
        machine.pop()?;
        push_boolean(machine, false)?;
        machine.jump_to(target);
        return Ok(());
    }
    let head = context
        .value(&machine.state.heap)
        .ok_or(MintError::StackUnderflow { operation: "find" })?;
    let matched = ref_equals(&machine.state.heap, needle, head)
        .unwrap_or(needle.handle == head.handle);
    if matched {
        machine.pop()?;
        machine.pop()?;
        push_boolean(machine, true)?;
        machine.jump_to(target);
    }
    Ok(())
}

/// Creating a RegexData from literal text, shared by the lexer-facing
/// compiler path.
pub fn compile_regex(initializer: &str, pattern: &str) -> Result<RegexData, MintError> {
    let compiled = regex::Regex::new(pattern).map_err(|_| {
        MintError::System(format!(
            "regular expression '{}' is not valid",
            initializer
        ))
    })?;
    Ok(RegexData {
        initializer: initializer.to_string(),
        pattern: compiled,
    })
}
