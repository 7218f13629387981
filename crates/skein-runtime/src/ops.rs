//! Opérateurs binaires et unaires.
//!
//! L'arithmétique entière est en complément à deux (débordement enroulé),
//! comme les décalages : un décalage ≥ 64 donne 0 (ou le signe pour `>>`).

use chrono::Duration;
use skein_core::Operator;

use crate::{Limits, Object, RuntimeError};

fn unsupported(op: Operator, lhs: &Object, rhs: &Object) -> RuntimeError {
    RuntimeError::UnsupportedOperands {
        op: op.symbol().to_owned(),
        lhs: lhs.type_name().into_owned(),
        rhs: rhs.type_name().into_owned(),
    }
}

fn compare<T: PartialOrd>(op: Operator, a: T, b: T) -> Option<bool> {
    Some(match op {
        Operator::Less => a < b,
        Operator::Greater => a > b,
        Operator::LessEq => a <= b,
        Operator::GreaterEq => a >= b,
        _ => return None,
    })
}

fn shift_count(n: i64) -> Option<u32> {
    u32::try_from(n).ok().filter(|&n| n < 64)
}

fn int_op(op: Operator, a: i64, b: i64) -> Result<Option<Object>, RuntimeError> {
    Ok(Some(Object::Int(match op {
        Operator::Add => a.wrapping_add(b),
        Operator::Sub => a.wrapping_sub(b),
        Operator::Mul => a.wrapping_mul(b),
        Operator::Quo => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        Operator::Rem => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        Operator::And => a & b,
        Operator::Or => a | b,
        Operator::Xor => a ^ b,
        Operator::AndNot => a & !b,
        // compte négatif : interprété comme très grand (résultat 0 / signe)
        Operator::Shl => shift_count(b).map_or(0, |n| a.wrapping_shl(n)),
        Operator::Shr => shift_count(b).map_or(if a < 0 { -1 } else { 0 }, |n| a >> n),
        cmp => return Ok(compare(cmp, a, b).map(Object::Bool)),
    })))
}

fn float_op(op: Operator, a: f64, b: f64) -> Option<Object> {
    Some(Object::Float(match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Quo => a / b,
        cmp => return compare(cmp, a, b).map(Object::Bool),
    }))
}

fn char_from(code: i64) -> Result<Object, RuntimeError> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(Object::Char)
        .ok_or(RuntimeError::InvalidChar(code))
}

fn char_op(op: Operator, a: i64, b: i64) -> Result<Option<Object>, RuntimeError> {
    match op {
        Operator::Add => char_from(a.wrapping_add(b)).map(Some),
        Operator::Sub => char_from(a.wrapping_sub(b)).map(Some),
        cmp => Ok(compare(cmp, a, b).map(Object::Bool)),
    }
}

impl Object {
    /// `self op rhs`. Toute combinaison hors table échoue avec
    /// `UnsupportedOperands`.
    pub fn binary_op(&self, op: Operator, rhs: &Object, limits: &Limits) -> Result<Object, RuntimeError> {
        use Object as O;
        #[allow(clippy::cast_precision_loss)]
        let res = match (self, rhs) {
            (O::Int(a), O::Int(b)) => int_op(op, *a, *b)?,
            (O::Int(a), O::Float(b)) => float_op(op, *a as f64, *b),
            (O::Float(a), O::Float(b)) => float_op(op, *a, *b),
            (O::Float(a), O::Int(b)) => float_op(op, *a, *b as f64),
            (O::Int(a), O::Char(b)) => char_op(op, *a, i64::from(u32::from(*b)))?,
            (O::Char(a), O::Int(b)) => char_op(op, i64::from(u32::from(*a)), *b)?,
            (O::Char(a), O::Char(b)) => char_op(op, i64::from(u32::from(*a)), i64::from(u32::from(*b)))?,
            (O::String(a), O::String(b)) => match op {
                Operator::Add => {
                    limits.check_string(a.len() + b.len())?;
                    Some(Object::from(format!("{a}{b}")))
                }
                cmp => compare(cmp, a, b).map(Object::Bool),
            },
            (O::String(a), O::Char(c)) if op == Operator::Add => {
                limits.check_string(a.len() + c.len_utf8())?;
                Some(Object::from(format!("{a}{c}")))
            }
            (O::Bytes(a), O::Bytes(b)) if op == Operator::Add => {
                limits.check_bytes(a.borrow().len() + b.borrow().len())?;
                Some(Object::bytes([a.borrow().as_slice(), b.borrow().as_slice()].concat()))
            }
            (O::Array(_) | O::ImmutableArray(_), O::Array(_) | O::ImmutableArray(_)) if op == Operator::Add => {
                limits.check_array(element_count(self) + element_count(rhs))?;
                let mut joined = elements(self);
                joined.extend(elements(rhs));
                Some(Object::array(joined))
            }
            (O::Time(t), O::Int(ns)) => match op {
                Operator::Add => Some(Object::Time(
                    t.checked_add_signed(Duration::nanoseconds(*ns)).ok_or(RuntimeError::TimeOutOfRange)?,
                )),
                Operator::Sub => Some(Object::Time(
                    t.checked_sub_signed(Duration::nanoseconds(*ns)).ok_or(RuntimeError::TimeOutOfRange)?,
                )),
                _ => None,
            },
            (O::Time(a), O::Time(b)) => match op {
                Operator::Sub => {
                    let d = *a - *b;
                    // au-delà de ±292 ans : saturation
                    let ns = d.num_nanoseconds().unwrap_or(if d > Duration::zero() { i64::MAX } else { i64::MIN });
                    Some(Object::Int(ns))
                }
                cmp => compare(cmp, a, b).map(Object::Bool),
            },
            _ => None,
        };
        res.ok_or_else(|| unsupported(op, self, rhs))
    }

    /// `-self`.
    pub fn neg(&self) -> Result<Object, RuntimeError> {
        match self {
            Object::Int(v) => Ok(Object::Int(v.wrapping_neg())),
            Object::Float(v) => Ok(Object::Float(-v)),
            other => Err(RuntimeError::UnsupportedUnary { op: "-", operand: other.type_name().into_owned() }),
        }
    }

    /// `^self` (complément bit à bit).
    pub fn bit_not(&self) -> Result<Object, RuntimeError> {
        match self {
            Object::Int(v) => Ok(Object::Int(!v)),
            other => Err(RuntimeError::UnsupportedUnary { op: "^", operand: other.type_name().into_owned() }),
        }
    }
}

fn element_count(o: &Object) -> usize {
    match o {
        Object::Array(a) => a.borrow().len(),
        Object::ImmutableArray(a) => a.len(),
        _ => 0,
    }
}

fn elements(o: &Object) -> Vec<Object> {
    match o {
        Object::Array(a) => a.borrow().clone(),
        Object::ImmutableArray(a) => a.to_vec(),
        _ => Vec::new(),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
