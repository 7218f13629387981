//! Opérateurs binaires encodés dans l'opérande de `BINARYOP`.

use core::fmt;

use crate::CoreError;

/// Opérateur binaire (hors `==`/`!=`, qui ont leurs propres opcodes, et
/// hors `&&`/`||`, compilés en sauts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operator {
    /// `+`
    Add = 0,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Quo,
    /// `%`
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `&^`
    AndNot,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessEq,
    /// `>=`
    GreaterEq,
}

impl Operator {
    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Quo => "/",
            Operator::Rem => "%",
            Operator::And => "&",
            Operator::Or => "|",
            Operator::Xor => "^",
            Operator::Shl => "<<",
            Operator::Shr => ">>",
            Operator::AndNot => "&^",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessEq => "<=",
            Operator::GreaterEq => ">=",
        }
    }

    /// Vrai pour `< > <= >=`.
    pub const fn is_comparison(self) -> bool {
        matches!(self, Operator::Less | Operator::Greater | Operator::LessEq | Operator::GreaterEq)
    }
}

impl TryFrom<u8> for Operator {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Operator::Add,
            1 => Operator::Sub,
            2 => Operator::Mul,
            3 => Operator::Quo,
            4 => Operator::Rem,
            5 => Operator::And,
            6 => Operator::Or,
            7 => Operator::Xor,
            8 => Operator::Shl,
            9 => Operator::Shr,
            10 => Operator::AndNot,
            11 => Operator::Less,
            12 => Operator::Greater,
            13 => Operator::LessEq,
            14 => Operator::GreaterEq,
            other => return Err(CoreError::UnknownOperator(other)),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for code in 0..=14u8 {
            let op = Operator::try_from(code).unwrap();
            assert_eq!(op as u8, code);
        }
        assert_eq!(Operator::try_from(15), Err(CoreError::UnknownOperator(15)));
    }
}
