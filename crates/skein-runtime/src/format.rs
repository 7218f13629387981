//! Mise en forme `printf` du builtin `format`.
//!
//! Verbes : `%v %d %s %q %t %c %x %X %o %b %f %F %e %E %g %G %%`, drapeaux
//! `- + 0 espace`, largeur et précision décimales. Un argument du mauvais
//! type donne `%!d(string=abc)`, un argument manquant `%!d(MISSING)`, des
//! arguments en trop sont listés dans un suffixe `%!(EXTRA ...)`.

use std::fmt::Write as _;

use crate::{Limits, Object, RuntimeError};

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    minus: bool,
    plus: bool,
    zero: bool,
    space: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Applique `fmt` à `args`. Le résultat (et chaque remplissage) respecte
/// `limits.max_string_len`.
pub fn format(fmt: &str, args: &[Object], limits: &Limits) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.minus = true,
                '+' => spec.plus = true,
                '0' => spec.zero = true,
                ' ' => spec.space = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(read_number(&mut chars).unwrap_or(0));
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.get(next_arg) else {
            let _ = write!(out, "%!{verb}(MISSING)");
            continue;
        };
        next_arg += 1;

        // largeur et précision viennent du script : bornées avant de rendre
        let width = spec.width.unwrap_or(0);
        let precision = if is_float_verb(verb) { spec.precision.unwrap_or(0) } else { 0 };
        limits.check_string(out.len().saturating_add(width.max(precision)))?;
        let budget = limits.max_string_len.saturating_sub(out.len());
        let body = match render(verb, &spec, arg, budget)? {
            Some(body) => body,
            None => format!("%!{verb}({}={})", arg.type_name(), arg.to_plain_string_within(budget)?),
        };
        limits.check_string(out.len() + body.len().max(width))?;
        pad(&mut out, &body, &spec, is_numeric_verb(verb));
    }

    if next_arg < args.len() {
        out.push_str("%!(EXTRA ");
        for (i, arg) in args[next_arg..].iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let budget = limits.max_string_len.saturating_sub(out.len());
            let _ = write!(out, "{}={}", arg.type_name(), arg.to_plain_string_within(budget)?);
        }
        out.push(')');
    }
    limits.check_string(out.len())?;
    Ok(out)
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut n: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = Some(n.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    n
}

const fn is_float_verb(verb: char) -> bool {
    matches!(verb, 'f' | 'F' | 'e' | 'E' | 'g' | 'G')
}

const fn is_numeric_verb(verb: char) -> bool {
    matches!(verb, 'd' | 'x' | 'X' | 'o' | 'b' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G')
}

fn signed(spec: &Spec, negative: bool, digits: String) -> String {
    let sign = if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    };
    format!("{sign}{digits}")
}

fn render(verb: char, spec: &Spec, arg: &Object, budget: usize) -> Result<Option<String>, RuntimeError> {
    Ok(Some(match (verb, arg) {
        ('v', Object::Float(v)) => float_g(*v, spec),
        ('v', Object::Int(v)) => signed(spec, *v < 0, v.unsigned_abs().to_string()),
        ('v' | 's', other) => truncate(other.to_plain_string_within(budget)?, spec.precision),
        ('d', Object::Int(v)) => signed(spec, *v < 0, v.unsigned_abs().to_string()),
        ('d', Object::Char(c)) => u32::from(*c).to_string(),
        ('q', Object::String(s)) => format!("{:?}", &**s),
        ('q', Object::Char(c)) => format!("{c:?}"),
        ('t', Object::Bool(b)) => b.to_string(),
        ('c', Object::Char(c)) => c.to_string(),
        ('c', Object::Int(v)) => match u32::try_from(*v).ok().and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => return Ok(None),
        },
        ('x', Object::Int(v)) => signed(spec, *v < 0, format!("{:x}", v.unsigned_abs())),
        ('X', Object::Int(v)) => signed(spec, *v < 0, format!("{:X}", v.unsigned_abs())),
        ('o', Object::Int(v)) => signed(spec, *v < 0, format!("{:o}", v.unsigned_abs())),
        ('b', Object::Int(v)) => signed(spec, *v < 0, format!("{:b}", v.unsigned_abs())),
        ('x' | 'X', Object::String(s)) => {
            limits_hex(s.len(), budget)?;
            hex(s.as_bytes(), verb == 'X')
        }
        ('x' | 'X', Object::Bytes(b)) => {
            limits_hex(b.borrow().len(), budget)?;
            hex(&b.borrow(), verb == 'X')
        }
        ('f' | 'F', Object::Float(v)) => {
            signed(spec, v.is_sign_negative(), format!("{:.*}", spec.precision.unwrap_or(6), v.abs()))
        }
        ('e' | 'E', Object::Float(v)) => {
            let s = float_e(v.abs(), spec.precision.unwrap_or(6));
            signed(spec, v.is_sign_negative(), if verb == 'E' { s.to_uppercase() } else { s })
        }
        ('g' | 'G', Object::Float(v)) => {
            let s = float_g(*v, spec);
            if verb == 'G' {
                s.to_uppercase()
            } else {
                s
            }
        }
        _ => return Ok(None),
    }))
}

/// Le rendu hexadécimal double la taille de l'entrée.
fn limits_hex(len: usize, budget: usize) -> Result<(), RuntimeError> {
    if len.saturating_mul(2) > budget {
        return Err(RuntimeError::StringLimit);
    }
    Ok(())
}

fn truncate(s: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s,
    }
}

fn hex(bytes: &[u8], upper: bool) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = if upper { write!(acc, "{b:02X}") } else { write!(acc, "{b:02x}") };
        acc
    })
}

/// `1.500000e+00` : exposant signé sur au moins deux chiffres.
fn float_e(v: f64, precision: usize) -> String {
    let raw = format!("{v:.precision$e}");
    exp_style(&raw)
}

fn exp_style(raw: &str) -> String {
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = exp.strip_prefix('-').map_or(("+", exp), |d| ("-", d));
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw.to_owned(),
    }
}

/// `%g` : notation la plus courte, scientifique pour les exposants extrêmes.
fn float_g(v: f64, spec: &Spec) -> String {
    if v.is_nan() {
        return "NaN".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf" } else { "-Inf" }.to_owned();
    }
    let negative = v.is_sign_negative() && v != 0.0;
    let a = v.abs();
    let body = match spec.precision {
        None => {
            let exp = exponent_of(&format!("{a:e}"));
            if exp < -4 || exp >= 21 {
                exp_style(&format!("{a:e}"))
            } else {
                format!("{a}")
            }
        }
        Some(p) => {
            let p = p.max(1);
            let sci = format!("{:.*e}", p - 1, a);
            let exp = exponent_of(&sci);
            if exp < -4 || exp >= p as i32 {
                let (mantissa, rest) = sci.split_once('e').unwrap_or((&sci, "0"));
                exp_style(&format!("{}e{rest}", trim_zeros(mantissa)))
            } else {
                let decimals = usize::try_from(p as i32 - 1 - exp).unwrap_or(0);
                trim_zeros(&format!("{a:.decimals$}")).to_owned()
            }
        }
    };
    signed(spec, negative, body)
}

fn exponent_of(sci: &str) -> i32 {
    sci.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0)
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn pad(out: &mut String, body: &str, spec: &Spec, numeric: bool) {
    let len = body.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        out.push_str(body);
        return;
    }
    let fill = width - len;
    if spec.minus {
        out.push_str(body);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if spec.zero && numeric {
        // zéros entre le signe et les chiffres
        let (sign, digits) = match body.chars().next() {
            Some(s @ ('-' | '+' | ' ')) => body.split_at(s.len_utf8()),
            _ => ("", body),
        };
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn f(fmt: &str, args: &[Object]) -> String {
        format(fmt, args, &Limits::default()).unwrap()
    }

    #[test]
    fn common_verbs() {
        assert_eq!(f("%d-%s-%v", &[Object::Int(5), Object::from("x"), Object::from("y")]), "5-x-y");
        assert_eq!(f("%q %t %c", &[Object::from("a\"b"), Object::Bool(true), Object::Char('z')]), "\"a\\\"b\" true z");
        assert_eq!(f("%x %X", &[Object::Int(255), Object::from("hi")]), "ff 6869");
        assert_eq!(f("100%%", &[]), "100%");
    }

    #[test]
    fn width_precision_and_flags() {
        assert_eq!(f("[%5d|%-5d|%05d]", &[Object::Int(42), Object::Int(42), Object::Int(-42)]), "[   42|42   |-0042]");
        assert_eq!(f("%.2f", &[Object::Float(3.14159)]), "3.14");
        assert_eq!(f("%+d", &[Object::Int(3)]), "+3");
        assert_eq!(f("%e", &[Object::Float(1500.0)]), "1.500000e+03");
        assert_eq!(f("%g %g", &[Object::Float(0.5), Object::Float(1e21)]), "0.5 1e+21");
        assert_eq!(f("%.3g", &[Object::Float(3.14159)]), "3.14");
    }

    #[test]
    fn bad_missing_and_extra_arguments() {
        assert_eq!(f("%d", &[Object::from("abc")]), "%!d(string=abc)");
        assert_eq!(f("%d %d", &[Object::Int(1)]), "1 %!d(MISSING)");
        assert_eq!(f("%d", &[Object::Int(1), Object::Bool(true)]), "1%!(EXTRA bool=true)");
    }

    #[test]
    fn padding_is_size_limited() {
        let limits = Limits { max_string_len: 8, ..Limits::default() };
        assert_eq!(format("%100d", &[Object::Int(1)], &limits), Err(RuntimeError::StringLimit));
    }

    #[test]
    fn huge_precision_is_rejected_before_rendering() {
        let limits = Limits { max_string_len: 16, ..Limits::default() };
        assert_eq!(format("%.2000000000f", &[Object::Float(1.0)], &limits), Err(RuntimeError::StringLimit));
        assert_eq!(format("%.2000000000e", &[Object::Float(1.0)], &limits), Err(RuntimeError::StringLimit));
        assert_eq!(format("%99999999999999999999d", &[Object::Int(1)], &limits), Err(RuntimeError::StringLimit));
        // %s tronque : la précision n'alloue rien
        assert_eq!(format("%.2000000000s", &[Object::from("ab")], &limits), Ok("ab".to_owned()));
        assert_eq!(format("%.2f", &[Object::Float(1.0)], &limits), Ok("1.00".to_owned()));
    }

    #[test]
    fn large_arguments_are_bounded() {
        let limits = Limits { max_string_len: 8, ..Limits::default() };
        let big = Object::array((0..100).map(Object::Int).collect());
        assert_eq!(format("%v", &[big.clone()], &limits), Err(RuntimeError::StringLimit));
        assert_eq!(format("%d", &[big.clone()], &limits), Err(RuntimeError::StringLimit));
        assert_eq!(format("x", &[big], &limits), Err(RuntimeError::StringLimit));
        assert_eq!(format("%x", &[Object::bytes(vec![0; 5])], &limits), Err(RuntimeError::StringLimit));
    }
}
