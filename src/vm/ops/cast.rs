//! Format coercions shared by the operator primitives.

use crate::core::error::MintError;
use crate::core::gc::GcHeap;
use crate::core::value::{Payload, Reference, Val};
use crate::runtime::global::GlobalData;
use crate::vm::cursor::Machine;

/// Truthiness. `none` and `null` are false, numbers compare against zero,
/// iterators test non-empty, everything else is true.
pub fn to_boolean(heap: &GcHeap, reference: Reference) -> bool {
    match heap.get(reference.handle) {
        Val::None | Val::Null => false,
        Val::Number(value) => *value != 0.0,
        Val::Boolean(value) => *value,
        Val::Object(object) => match &object.payload {
            Payload::Iterator(context) => !context.is_empty(heap),
            _ => true,
        },
        _ => true,
    }
}

/// Numeric coercion. `none` is a host error, `null` is raised, strings
/// parse (with `0x`/`0o`/`0b` prefixes), an iterator converts through its
/// current element.
pub fn to_number(machine: &mut Machine, reference: Reference) -> Result<f64, MintError> {
    match machine.state.heap.get(reference.handle) {
        Val::None => Err(MintError::InvalidUseOfNone {
            operation: "number conversion",
        }),
        Val::Null => Err(MintError::Raised(reference.handle)),
        Val::Number(value) => Ok(*value),
        Val::Boolean(value) => Ok(if *value { 1.0 } else { 0.0 }),
        Val::Object(object) => match &object.payload {
            Payload::String(text) => Ok(parse_number(text)),
            Payload::Iterator(context) => {
                let current = context.value(&machine.state.heap);
                match current {
                    Some(item) => to_number(machine, item),
                    None => Err(MintError::InvalidUseOfNone {
                        operation: "number conversion",
                    }),
                }
            }
            _ => Err(MintError::TypeMismatch {
                expected: "number",
                got: machine
                    .state
                    .globals
                    .type_name(&machine.state.heap, reference.handle),
                operation: "number conversion",
            }),
        },
        other => Err(MintError::TypeMismatch {
            expected: "number",
            got: other.format_name().to_string(),
            operation: "number conversion",
        }),
    }
}

pub fn to_integer(machine: &mut Machine, reference: Reference) -> Result<i64, MintError> {
    Ok(to_number(machine, reference)? as i64)
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let parsed = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok().map(|v| v as f64)
    } else if let Some(oct) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok().map(|v| v as f64)
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok().map(|v| v as f64)
    } else {
        body.parse::<f64>().ok()
    };
    let value = parsed.unwrap_or(0.0);
    if negative { -value } else { value }
}

/// Text rendering used by `print`, string concatenation and tracebacks.
pub fn to_string(heap: &GcHeap, globals: &GlobalData, reference: Reference) -> String {
    match heap.get(reference.handle) {
        Val::None => String::new(),
        Val::Null => "(null)".to_string(),
        Val::Number(value) => format_number(*value),
        Val::Boolean(value) => if *value { "true" } else { "false" }.to_string(),
        Val::Object(object) => match &object.payload {
            Payload::String(text) => text.clone(),
            Payload::Regex(data) => data.initializer.clone(),
            Payload::Array(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|item| to_string(heap, globals, *item))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Payload::Hash(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            crate::core::value::HashKey::Number(bits) => {
                                format_number(f64::from_bits(*bits))
                            }
                            crate::core::value::HashKey::Boolean(v) => {
                                if *v { "true" } else { "false" }.to_string()
                            }
                            crate::core::value::HashKey::String(text) => text.clone(),
                            crate::core::value::HashKey::Identity(handle) => {
                                to_string(heap, globals, Reference::new(*handle))
                            }
                        };
                        format!("{} : {}", key, to_string(heap, globals, *value))
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Payload::Iterator(context) => match context.value(heap) {
                Some(item) => to_string(heap, globals, item),
                None => String::new(),
            },
            Payload::User => {
                if object.prototype {
                    "(class)".to_string()
                } else {
                    "(object)".to_string()
                }
            }
            Payload::Library(_) => "(library)".to_string(),
        },
        Val::Package(_) => "(package)".to_string(),
        Val::Function(_) => "(function)".to_string(),
    }
}

/// Integral doubles print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_format_like_integers_when_integral() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(1.5), "1.5");
    }

    #[test]
    fn numeric_strings_parse_with_radix_prefixes() {
        assert_eq!(parse_number("42"), 42.0);
        assert_eq!(parse_number("  -1.5 "), -1.5);
        assert_eq!(parse_number("0x10"), 16.0);
        assert_eq!(parse_number("0b101"), 5.0);
        assert_eq!(parse_number("bogus"), 0.0);
    }
}
