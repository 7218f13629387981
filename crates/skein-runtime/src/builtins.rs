//! Table des fonctions natives builtin.
//!
//! L'ordre de `BUILTINS` fixe l'opérande de `GETBUILTIN` dans le bytecode
//! compilé : on ajoute en fin de table, on ne réordonne jamais.

use std::rc::Rc;

use crate::error::ordinal;
use crate::{skein_native, Object, RuntimeError};

/// Table ordonnée `(nom, implémentation)`.
pub static BUILTINS: [(&str, crate::NativeFn); 31] = [
    ("len", builtin_len),
    ("copy", builtin_copy),
    ("append", builtin_append),
    ("delete", builtin_delete),
    ("splice", builtin_splice),
    ("string", builtin_string),
    ("int", builtin_int),
    ("bool", builtin_bool),
    ("float", builtin_float),
    ("char", builtin_char),
    ("bytes", builtin_bytes),
    ("time", builtin_time),
    ("is_int", builtin_is_int),
    ("is_float", builtin_is_float),
    ("is_string", builtin_is_string),
    ("is_bool", builtin_is_bool),
    ("is_char", builtin_is_char),
    ("is_bytes", builtin_is_bytes),
    ("is_array", builtin_is_array),
    ("is_immutable_array", builtin_is_immutable_array),
    ("is_map", builtin_is_map),
    ("is_immutable_map", builtin_is_immutable_map),
    ("is_iterable", builtin_is_iterable),
    ("is_time", builtin_is_time),
    ("is_error", builtin_is_error),
    ("is_undefined", builtin_is_undefined),
    ("is_function", builtin_is_function),
    ("is_callable", builtin_is_callable),
    ("type_name", builtin_type_name),
    ("format", builtin_format),
    ("range", builtin_range),
];

/// Objets `BuiltinFunction` dans l'ordre de la table.
pub fn builtin_objects() -> Vec<Object> {
    BUILTINS.iter().map(|&(name, func)| Object::builtin(name, func)).collect()
}

/// Index et objet d'un builtin par nom.
pub fn find_builtin(name: &str) -> Option<(usize, Object)> {
    BUILTINS
        .iter()
        .position(|&(n, _)| n == name)
        .map(|idx| (idx, Object::builtin(BUILTINS[idx].0, BUILTINS[idx].1)))
}

/* ─────────────────────────── Arité ─────────────────────────── */

fn arity(args: &[Object], want: usize) -> Result<(), RuntimeError> {
    if args.len() != want {
        return Err(RuntimeError::wrong_args(want.to_string(), args.len()));
    }
    Ok(())
}

fn arity_between(args: &[Object], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::wrong_args(format!("{min}..{max}"), args.len()));
    }
    Ok(())
}

fn arity_at_least(args: &[Object], min: usize) -> Result<(), RuntimeError> {
    if args.len() < min {
        return Err(RuntimeError::wrong_args(format!(">={min}"), args.len()));
    }
    Ok(())
}

fn bad_arg(idx: usize, expected: &str, found: &Object) -> RuntimeError {
    RuntimeError::arg_type(ordinal(idx), expected, found.type_name())
}

/// Valeur de repli d'une conversion ratée : 2e argument ou `undefined`.
fn fallback(args: &[Object]) -> Object {
    args.get(1).cloned().unwrap_or_default()
}

fn int_arg(args: &[Object], idx: usize) -> Result<i64, RuntimeError> {
    match &args[idx] {
        Object::Int(v) => Ok(*v),
        other => Err(bad_arg(idx, "int", other)),
    }
}

/* ─────────────────────────── Conteneurs ─────────────────────────── */

skein_native!(builtin_len |_ctx, args| {
    arity(args, 1)?;
    let n = match &args[0] {
        Object::Array(a) => a.borrow().len(),
        Object::ImmutableArray(a) => a.len(),
        Object::String(s) => s.chars().count(),
        Object::Bytes(b) => b.borrow().len(),
        Object::Map(m) => m.borrow().len(),
        Object::ImmutableMap(m) => m.len(),
        other => return Err(bad_arg(0, "array/string/bytes/map", other)),
    };
    Ok(Object::Int(i64::try_from(n).unwrap_or(i64::MAX)))
});

skein_native!(builtin_copy |_ctx, args| {
    arity(args, 1)?;
    Ok(args[0].copy())
});

skein_native!(builtin_append |ctx, args| {
    arity_at_least(args, 1)?;
    let base = match &args[0] {
        Object::Array(a) => a.borrow().len(),
        Object::ImmutableArray(a) => a.len(),
        other => return Err(bad_arg(0, "array", other)),
    };
    ctx.limits().check_array(base + args.len() - 1)?;
    let mut items = match &args[0] {
        Object::Array(a) => a.borrow().clone(),
        Object::ImmutableArray(a) => a.to_vec(),
        _ => Vec::new(),
    };
    items.extend_from_slice(&args[1..]);
    Ok(Object::array(items))
});

skein_native!(builtin_delete |_ctx, args| {
    arity(args, 2)?;
    let Object::Map(map) = &args[0] else {
        return Err(bad_arg(0, "map", &args[0]));
    };
    let Object::String(key) = &args[1] else {
        return Err(bad_arg(1, "string", &args[1]));
    };
    map.borrow_mut().shift_remove(&**key);
    Ok(Object::Undefined)
});

skein_native!(builtin_splice |ctx, args| {
    arity_at_least(args, 1)?;
    let Object::Array(array) = &args[0] else {
        return Err(bad_arg(0, "array", &args[0]));
    };
    let len = array.borrow().len();
    let start = match args.get(1) {
        None => 0,
        Some(_) => usize::try_from(int_arg(args, 1)?).map_err(|_| RuntimeError::IndexOutOfBounds)?,
    };
    if start > len {
        return Err(RuntimeError::IndexOutOfBounds);
    }
    let count = match args.get(2) {
        None => len - start,
        Some(_) => usize::try_from(int_arg(args, 2)?).map_err(|_| RuntimeError::IndexOutOfBounds)?,
    };
    let end = start.saturating_add(count).min(len);
    let inserting = args.len().saturating_sub(3);
    ctx.limits().check_array(len - (end - start) + inserting)?;
    let inserted = args.get(3..).unwrap_or_default().iter().cloned();
    let deleted: Vec<Object> = array.borrow_mut().splice(start..end, inserted).collect();
    Ok(Object::array(deleted))
});

/* ─────────────────────────── Conversions ─────────────────────────── */

skein_native!(builtin_string |ctx, args| {
    arity_between(args, 1, 2)?;
    match &args[0] {
        s @ Object::String(_) => Ok(s.clone()),
        Object::Undefined => Ok(fallback(args)),
        other => {
            let s = other.to_plain_string_within(ctx.limits().max_string_len)?;
            Ok(Object::from(s))
        }
    }
});

skein_native!(builtin_int |_ctx, args| {
    arity_between(args, 1, 2)?;
    Ok(args[0].to_int().map_or_else(|| fallback(args), Object::Int))
});

skein_native!(builtin_bool |_ctx, args| {
    arity(args, 1)?;
    match &args[0] {
        b @ Object::Bool(_) => Ok(b.clone()),
        other => Ok(Object::Bool(!other.is_falsy())),
    }
});

skein_native!(builtin_float |_ctx, args| {
    arity_between(args, 1, 2)?;
    Ok(args[0].to_float().map_or_else(|| fallback(args), Object::Float))
});

skein_native!(builtin_char |_ctx, args| {
    arity_between(args, 1, 2)?;
    Ok(args[0].to_char().map_or_else(|| fallback(args), Object::Char))
});

skein_native!(builtin_bytes |ctx, args| {
    arity_between(args, 1, 2)?;
    match &args[0] {
        b @ Object::Bytes(_) => Ok(b.clone()),
        Object::Int(n) => match usize::try_from(*n) {
            Ok(n) => {
                ctx.limits().check_bytes(n)?;
                Ok(Object::bytes(vec![0; n]))
            }
            Err(_) => Ok(fallback(args)),
        },
        Object::String(s) => {
            ctx.limits().check_bytes(s.len())?;
            Ok(Object::bytes(s.as_bytes().to_vec()))
        }
        _ => Ok(fallback(args)),
    }
});

skein_native!(builtin_time |_ctx, args| {
    arity_between(args, 1, 2)?;
    Ok(args[0].to_time().map_or_else(|| fallback(args), Object::Time))
});

/* ─────────────────────────── Prédicats ─────────────────────────── */

macro_rules! type_predicate {
    ($name:ident, $pat:pat) => {
        skein_native!($name |_ctx, args| {
            arity(args, 1)?;
            Ok(Object::Bool(matches!(&args[0], $pat)))
        });
    };
}

type_predicate!(builtin_is_int, Object::Int(_));
type_predicate!(builtin_is_float, Object::Float(_));
type_predicate!(builtin_is_string, Object::String(_));
type_predicate!(builtin_is_bool, Object::Bool(_));
type_predicate!(builtin_is_char, Object::Char(_));
type_predicate!(builtin_is_bytes, Object::Bytes(_));
type_predicate!(builtin_is_array, Object::Array(_));
type_predicate!(builtin_is_immutable_array, Object::ImmutableArray(_));
type_predicate!(builtin_is_map, Object::Map(_));
type_predicate!(builtin_is_immutable_map, Object::ImmutableMap(_));
type_predicate!(builtin_is_time, Object::Time(_));
type_predicate!(builtin_is_error, Object::Error(_));
type_predicate!(builtin_is_undefined, Object::Undefined);
type_predicate!(builtin_is_function, Object::CompiledFunction(_));

skein_native!(builtin_is_iterable |_ctx, args| {
    arity(args, 1)?;
    Ok(Object::Bool(args[0].can_iterate()))
});

skein_native!(builtin_is_callable |_ctx, args| {
    arity(args, 1)?;
    Ok(Object::Bool(args[0].can_call()))
});

skein_native!(builtin_type_name |_ctx, args| {
    arity(args, 1)?;
    Ok(Object::String(Rc::from(&*args[0].type_name())))
});

/* ─────────────────────────── format / range ─────────────────────────── */

skein_native!(builtin_format |ctx, args| {
    arity_at_least(args, 1)?;
    let Object::String(fmt) = &args[0] else {
        return Err(bad_arg(0, "string", &args[0]));
    };
    if args.len() == 1 {
        return Ok(args[0].clone());
    }
    let s = crate::format::format(fmt, &args[1..], ctx.limits())?;
    Ok(Object::from(s))
});

skein_native!(builtin_range |ctx, args| {
    arity_between(args, 2, 3)?;
    let start = int_arg(args, 0)?;
    let stop = int_arg(args, 1)?;
    let step = if args.len() == 3 { int_arg(args, 2)? } else { 1 };
    if step <= 0 {
        return Err(RuntimeError::InvalidRangeStep);
    }
    // nombre d'éléments calculé avant toute allocation
    let span = (i128::from(stop) - i128::from(start)).unsigned_abs();
    let count = span.div_ceil(u128::from(step.unsigned_abs()));
    ctx.limits().check_array(usize::try_from(count).unwrap_or(usize::MAX))?;
    let mut out = Vec::new();
    let mut i = start;
    if start <= stop {
        while i < stop {
            out.push(Object::Int(i));
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    } else {
        while i > stop {
            out.push(Object::Int(i));
            i = match i.checked_sub(step) {
                Some(next) => next,
                None => break,
            };
        }
    }
    Ok(Object::array(out))
});

/* ─────────────────────────── Tests ─────────────────────────── */
