//! Primitive implementations backing the prelude dictionaries.
//!
//! Every function here has the uniform shape `fn(&[Value]) -> Result<Value,
//! PrimError>` so the linker can bind them as dictionary method values.
//! Arity is validated by the evaluator before dispatch.

use std::rc::Rc;

use crate::value::{PrimError, Value};

fn int_arg(args: &[Value], index: usize) -> Result<i64, PrimError> {
    match &args[index] {
        Value::Int(v) => Ok(*v),
        other => Err(PrimError::new(
            "EVA003",
            format!("expected Int, got {}", other.type_name()),
        )),
    }
}

fn float_arg(args: &[Value], index: usize) -> Result<f64, PrimError> {
    match &args[index] {
        Value::Float(v) => Ok(*v),
        other => Err(PrimError::new(
            "EVA003",
            format!("expected Float, got {}", other.type_name()),
        )),
    }
}

// ── Num[Int] ───────────────────────────────────────────────────────────

pub fn add_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Int(int_arg(args, 0)?.wrapping_add(int_arg(args, 1)?)))
}

pub fn sub_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Int(int_arg(args, 0)?.wrapping_sub(int_arg(args, 1)?)))
}

pub fn mul_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Int(int_arg(args, 0)?.wrapping_mul(int_arg(args, 1)?)))
}

pub fn div_int(args: &[Value]) -> Result<Value, PrimError> {
    let lhs = int_arg(args, 0)?;
    let rhs = int_arg(args, 1)?;
    if rhs == 0 {
        return Err(PrimError::new("RT003", "division by zero"));
    }
    Ok(Value::Int(lhs.wrapping_div(rhs)))
}

pub fn mod_int(args: &[Value]) -> Result<Value, PrimError> {
    let lhs = int_arg(args, 0)?;
    let rhs = int_arg(args, 1)?;
    if rhs == 0 {
        return Err(PrimError::new("RT003", "modulo by zero"));
    }
    Ok(Value::Int(lhs.wrapping_rem(rhs)))
}

pub fn neg_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Int(int_arg(args, 0)?.wrapping_neg()))
}

// ── Num[Float] ─────────────────────────────────────────────────────────

pub fn add_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(float_arg(args, 0)? + float_arg(args, 1)?))
}

pub fn sub_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(float_arg(args, 0)? - float_arg(args, 1)?))
}

pub fn mul_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(float_arg(args, 0)? * float_arg(args, 1)?))
}

/// Float division keeps IEEE semantics: dividing by zero yields an
/// infinity or NaN, never a runtime error.
pub fn div_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(float_arg(args, 0)? / float_arg(args, 1)?))
}

pub fn mod_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(float_arg(args, 0)? % float_arg(args, 1)?))
}

pub fn neg_float(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Float(-float_arg(args, 0)?))
}

// ── Eq ─────────────────────────────────────────────────────────────────

/// Structural equality. Floats are NaN-reflexive so `x == x` holds for
/// every value (the Eq law); this deliberately diverges from IEEE.
pub fn values_equal(a: &Value, b: &Value) -> Result<bool, PrimError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        (Value::Float(x), Value::Float(y)) => Ok(x == y || (x.is_nan() && y.is_nan())),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Unit, Value::Unit) => Ok(true),
        (Value::Char(x), Value::Char(y)) => Ok(x == y),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (xi, yi) in x.iter().zip(y.iter()) {
                if !values_equal(xi, yi)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Record(x), Value::Record(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (name, xv) in x.iter() {
                match y.get(name) {
                    Some(yv) if values_equal(xv, yv)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (
            Value::Ctor { name: xn, fields: xf },
            Value::Ctor { name: yn, fields: yf },
        ) => {
            if xn != yn || xf.len() != yf.len() {
                return Ok(false);
            }
            for (xi, yi) in xf.iter().zip(yf.iter()) {
                if !values_equal(xi, yi)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Closure(_) | Value::Builtin(_), _) | (_, Value::Closure(_) | Value::Builtin(_)) => Err(
            PrimError::new("EVA003", "functions cannot be compared for equality"),
        ),
        _ => Err(PrimError::new(
            "EVA003",
            format!("cannot compare {} with {}", a.type_name(), b.type_name()),
        )),
    }
}

pub fn eq_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(values_equal(&args[0], &args[1])?))
}

pub fn neq_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(!values_equal(&args[0], &args[1])?))
}

/// Monomorphic Int equality: rejects non-Int operands so a lowering bug
/// surfaces as a runtime type error instead of a wrong answer.
pub fn eq_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(int_arg(args, 0)? == int_arg(args, 1)?))
}

pub fn neq_int(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(int_arg(args, 0)? != int_arg(args, 1)?))
}

/// Monomorphic Float equality, NaN-reflexive.
pub fn eq_float(args: &[Value]) -> Result<Value, PrimError> {
    let a = float_arg(args, 0)?;
    let b = float_arg(args, 1)?;
    Ok(Value::Bool(a == b || (a.is_nan() && b.is_nan())))
}

pub fn neq_float(args: &[Value]) -> Result<Value, PrimError> {
    match eq_float(args)? {
        Value::Bool(v) => Ok(Value::Bool(!v)),
        _ => unreachable!("eq_float returns Bool"),
    }
}

// ── Ord ────────────────────────────────────────────────────────────────

/// Three-way comparison on ordered values. Float comparisons keep IEEE
/// semantics: any comparison involving NaN returns `None`, which every
/// ordering operator treats as false.
fn compare(a: &Value, b: &Value) -> Result<Option<std::cmp::Ordering>, PrimError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Char(x), Value::Char(y)) => Ok(Some(x.cmp(y))),
        (Value::Bool(x), Value::Bool(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                match compare(xi, yi)? {
                    Some(std::cmp::Ordering::Equal) => {}
                    other => return Ok(other),
                }
            }
            Ok(Some(x.len().cmp(&y.len())))
        }
        _ => Err(PrimError::new(
            "EVA003",
            format!("cannot order {} against {}", a.type_name(), b.type_name()),
        )),
    }
}

pub fn lt_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(matches!(
        compare(&args[0], &args[1])?,
        Some(std::cmp::Ordering::Less)
    )))
}

pub fn lte_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(matches!(
        compare(&args[0], &args[1])?,
        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
    )))
}

pub fn gt_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(matches!(
        compare(&args[0], &args[1])?,
        Some(std::cmp::Ordering::Greater)
    )))
}

pub fn gte_value(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::Bool(matches!(
        compare(&args[0], &args[1])?,
        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
    )))
}

// ── Show ───────────────────────────────────────────────────────────────

/// Renders a value in source-like form. Strings and chars are quoted;
/// floats use the shortest round-trip representation.
#[must_use]
pub fn show_value(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Float(v) => {
            if v.is_nan() {
                "NaN".to_owned()
            } else if v.is_infinite() {
                if *v > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
            } else {
                let mut buffer = ryu::Buffer::new();
                buffer.format(*v).to_owned()
            }
        }
        Value::Str(s) => format!("{s:?}"),
        Value::Bool(v) => v.to_string(),
        Value::Unit => "()".to_owned(),
        Value::Char(c) => format!("{c:?}"),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(show_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(show_value).collect();
            format!("({})", rendered.join(", "))
        }
        Value::Record(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", show_value(value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Value::Ctor { name, fields } => {
            if fields.is_empty() {
                name.to_string()
            } else {
                let rendered: Vec<String> = fields.iter().map(show_value).collect();
                format!("{name}({})", rendered.join(", "))
            }
        }
        Value::Closure(c) => match &c.name {
            Some(name) => format!("<func {name}>"),
            None => "<func>".to_owned(),
        },
        Value::Builtin(b) => format!("<builtin {}>", b.name),
        Value::Dict(d) => format!("<dict {}::{}>", d.class, d.head),
        Value::Indirect(cell) => match cell.read() {
            Ok(value) => show_value(&value),
            Err(_) => format!("<uninitialized {}>", cell.name),
        },
    }
}

pub fn show(args: &[Value]) -> Result<Value, PrimError> {
    Ok(Value::str(show_value(&args[0])))
}

// ── Concat ─────────────────────────────────────────────────────────────

pub fn concat_string(args: &[Value]) -> Result<Value, PrimError> {
    match (&args[0], &args[1]) {
        (Value::Str(a), Value::Str(b)) => {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::str(out))
        }
        (a, b) => Err(PrimError::new(
            "EVA003",
            format!("++ expects two Strings, got {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

pub fn concat_list(args: &[Value]) -> Result<Value, PrimError> {
    match (&args[0], &args[1]) {
        (Value::List(a), Value::List(b)) => {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend(a.iter().cloned());
            out.extend(b.iter().cloned());
            Ok(Value::List(Rc::new(out)))
        }
        (a, b) => Err(PrimError::new(
            "EVA003",
            format!("++ expects two lists, got {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

/// Dynamic `++` used when the operand type stayed polymorphic.
pub fn concat_value(args: &[Value]) -> Result<Value, PrimError> {
    match &args[0] {
        Value::Str(_) => concat_string(args),
        Value::List(_) => concat_list(args),
        other => Err(PrimError::new(
            "EVA003",
            format!("++ is not defined for {}", other.type_name()),
        )),
    }
}

// ── Bool ───────────────────────────────────────────────────────────────

pub fn not_bool(args: &[Value]) -> Result<Value, PrimError> {
    match &args[0] {
        Value::Bool(v) => Ok(Value::Bool(!v)),
        other => Err(PrimError::new(
            "EVA003",
            format!("! expects Bool, got {}", other.type_name()),
        )),
    }
}

/// Dynamic arithmetic used when an operation stayed fully polymorphic
/// after defaulting: dispatch on the runtime head.
pub fn num_dyn(method: &'static str) -> fn(&[Value]) -> Result<Value, PrimError> {
    match method {
        "add" => |args| match args[0] {
            Value::Float(_) => add_float(args),
            _ => add_int(args),
        },
        "sub" => |args| match args[0] {
            Value::Float(_) => sub_float(args),
            _ => sub_int(args),
        },
        "mul" => |args| match args[0] {
            Value::Float(_) => mul_float(args),
            _ => mul_int(args),
        },
        "div" => |args| match args[0] {
            Value::Float(_) => div_float(args),
            _ => div_int(args),
        },
        "mod" => |args| match args[0] {
            Value::Float(_) => mod_float(args),
            _ => mod_int(args),
        },
        "neg" => |args| match args[0] {
            Value::Float(_) => neg_float(args),
            _ => neg_int(args),
        },
        _ => |_| Err(PrimError::new("EVA003", "unknown dynamic numeric method")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_division_by_zero_is_rt003() {
        let err = div_int(&[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.code, "RT003");
    }

    #[test]
    fn float_division_by_zero_is_ieee() {
        let Value::Float(v) = div_float(&[Value::Float(1.0), Value::Float(0.0)]).unwrap() else {
            panic!()
        };
        assert!(v.is_infinite());
    }

    #[test]
    fn nan_equals_nan() {
        let nan = Value::Float(f64::NAN);
        assert!(values_equal(&nan, &nan).unwrap());
    }

    #[test]
    fn nan_ordering_is_ieee_false() {
        let nan = Value::Float(f64::NAN);
        assert!(matches!(lt_value(&[nan.clone(), nan.clone()]).unwrap(), Value::Bool(false)));
        assert!(matches!(gte_value(&[nan.clone(), nan]).unwrap(), Value::Bool(false)));
    }

    #[test]
    fn structural_equality_on_containers() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(values_equal(&a, &b).unwrap());
    }

    #[test]
    fn comparing_functions_errors() {
        let b = Value::Builtin(Rc::new(crate::value::BuiltinVal {
            name: "f".to_owned(),
            arity: 1,
            kind: crate::value::BuiltinKind::Prim(not_bool),
        }));
        assert!(values_equal(&b, &b).is_err());
    }

    #[test]
    fn show_forms() {
        assert_eq!(show_value(&Value::Int(42)), "42");
        assert_eq!(show_value(&Value::str("hi")), "\"hi\"");
        assert_eq!(show_value(&Value::Float(1.5)), "1.5");
        assert_eq!(
            show_value(&Value::Ctor {
                name: "Some".into(),
                fields: Rc::new(vec![Value::Int(1)])
            }),
            "Some(1)"
        );
    }
}
