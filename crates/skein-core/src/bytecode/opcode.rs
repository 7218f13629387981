//! Opcodes, largeurs d'opérandes, encodage/décodage.

use crate::{CoreError, CoreResult};

/// Révision du jeu d'instructions. Toute modification de la numérotation ou
/// des largeurs d'opérandes doit l'incrémenter : un bytecode sérialisé avec
/// une autre révision est refusé au chargement.
pub const OPCODE_REVISION: u16 = 1;

/// Opcodes de la VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Empile `constants[u16]`.
    Constant = 0,
    /// Dépile et jette le sommet.
    Pop,
    /// Empile `true`.
    True,
    /// Empile `false`.
    False,
    /// Empile `undefined`.
    Null,
    /// `==` sur les deux sommets.
    Equal,
    /// `!=` sur les deux sommets.
    NotEqual,
    /// Négation arithmétique.
    Minus,
    /// Négation logique.
    LNot,
    /// Complément bit à bit.
    BComplement,
    /// Opération binaire ; l'opérande (u8) est un `Operator`.
    BinaryOp,
    /// Saut absolu (u32) si le sommet dépilé est falsy.
    JumpFalsy,
    /// `&&` : saute (u32) en gardant le sommet s'il est falsy, sinon le dépile.
    AndJump,
    /// `||` : saute (u32) en gardant le sommet s'il est truthy, sinon le dépile.
    OrJump,
    /// Saut inconditionnel (u32).
    Jump,
    /// Construit un tableau à partir des `u16` sommets.
    Array,
    /// Construit une map à partir de `u16` sommets (clé, valeur alternées).
    Map,
    /// Enveloppe le sommet dans une valeur `error`.
    Error,
    /// Rend le sommet immuable (tableau/map).
    Immutable,
    /// `a[i]`.
    Index,
    /// `a[lo:hi]`.
    SliceIndex,
    /// Appel : nombre d'arguments (u8), spread (u8).
    Call,
    /// Retour : 0 ou 1 valeur (u8).
    Return,
    /// Lit la globale `u16`.
    GetGlobal,
    /// Écrit la globale `u16`.
    SetGlobal,
    /// Affectation indexée d'une globale : index (u16), nb de sélecteurs (u8).
    SetSelGlobal,
    /// Lit la locale `u8`.
    GetLocal,
    /// Réaffecte la locale `u8` (à travers sa cellule si elle est capturée).
    SetLocal,
    /// Première liaison de la locale `u8` (nouvelle cellule).
    DefineLocal,
    /// Affectation indexée d'une locale : index (u8), nb de sélecteurs (u8).
    SetSelLocal,
    /// Lit la variable libre `u8`.
    GetFree,
    /// Écrit la variable libre `u8`.
    SetFree,
    /// Empile la cellule de la variable libre `u8`.
    GetFreePtr,
    /// Empile la cellule de la locale `u8` (créée à la première capture).
    GetLocalPtr,
    /// Affectation indexée d'une variable libre : index (u8), nb de sélecteurs (u8).
    SetSelFree,
    /// Empile la fonction native `u8` de la table des builtins.
    GetBuiltin,
    /// Fermeture : constante (u16), nombre de cellules capturées (u8).
    Closure,
    /// Remplace le sommet par un itérateur.
    IteratorInit,
    /// Avance l'itérateur et empile un booléen « élément courant ».
    IteratorNext,
    /// Empile la clé courante.
    IteratorKey,
    /// Empile la valeur courante.
    IteratorValue,
    /// Fin du programme principal sans valeur de retour.
    Suspend,
}

const ALL: [Opcode; 42] = [
    Opcode::Constant,
    Opcode::Pop,
    Opcode::True,
    Opcode::False,
    Opcode::Null,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::Minus,
    Opcode::LNot,
    Opcode::BComplement,
    Opcode::BinaryOp,
    Opcode::JumpFalsy,
    Opcode::AndJump,
    Opcode::OrJump,
    Opcode::Jump,
    Opcode::Array,
    Opcode::Map,
    Opcode::Error,
    Opcode::Immutable,
    Opcode::Index,
    Opcode::SliceIndex,
    Opcode::Call,
    Opcode::Return,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::SetSelGlobal,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::DefineLocal,
    Opcode::SetSelLocal,
    Opcode::GetFree,
    Opcode::SetFree,
    Opcode::GetFreePtr,
    Opcode::GetLocalPtr,
    Opcode::SetSelFree,
    Opcode::GetBuiltin,
    Opcode::Closure,
    Opcode::IteratorInit,
    Opcode::IteratorNext,
    Opcode::IteratorKey,
    Opcode::IteratorValue,
    Opcode::Suspend,
];

impl Opcode {
    /// Décode un octet d'opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        ALL.get(byte as usize).copied()
    }

    /// Mnémonique utilisé par le désassembleur.
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "CONST",
            Opcode::Pop => "POP",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Null => "NULL",
            Opcode::Equal => "EQL",
            Opcode::NotEqual => "NEQ",
            Opcode::Minus => "NEG",
            Opcode::LNot => "NOT",
            Opcode::BComplement => "BCOMPL",
            Opcode::BinaryOp => "BINARYOP",
            Opcode::JumpFalsy => "JMPF",
            Opcode::AndJump => "ANDJMP",
            Opcode::OrJump => "ORJMP",
            Opcode::Jump => "JMP",
            Opcode::Array => "ARR",
            Opcode::Map => "MAP",
            Opcode::Error => "ERROR",
            Opcode::Immutable => "IMMUT",
            Opcode::Index => "INDEX",
            Opcode::SliceIndex => "SLICE",
            Opcode::Call => "CALL",
            Opcode::Return => "RET",
            Opcode::GetGlobal => "GETG",
            Opcode::SetGlobal => "SETG",
            Opcode::SetSelGlobal => "SETSG",
            Opcode::GetLocal => "GETL",
            Opcode::SetLocal => "SETL",
            Opcode::DefineLocal => "DEFL",
            Opcode::SetSelLocal => "SETSL",
            Opcode::GetFree => "GETF",
            Opcode::SetFree => "SETF",
            Opcode::GetFreePtr => "GETFP",
            Opcode::GetLocalPtr => "GETLP",
            Opcode::SetSelFree => "SETSF",
            Opcode::GetBuiltin => "BUILTIN",
            Opcode::Closure => "CLOSURE",
            Opcode::IteratorInit => "ITER",
            Opcode::IteratorNext => "ITNXT",
            Opcode::IteratorKey => "ITKEY",
            Opcode::IteratorValue => "ITVAL",
            Opcode::Suspend => "SUSPEND",
        }
    }

    /// Largeur (en octets) de chaque opérande.
    pub const fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant | Opcode::Array | Opcode::Map | Opcode::GetGlobal | Opcode::SetGlobal => &[2],
            Opcode::JumpFalsy | Opcode::AndJump | Opcode::OrJump | Opcode::Jump => &[4],
            Opcode::BinaryOp
            | Opcode::Return
            | Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::DefineLocal
            | Opcode::GetFree
            | Opcode::SetFree
            | Opcode::GetFreePtr
            | Opcode::GetLocalPtr
            | Opcode::GetBuiltin => &[1],
            Opcode::Call | Opcode::SetSelLocal | Opcode::SetSelFree => &[1, 1],
            Opcode::SetSelGlobal | Opcode::Closure => &[2, 1],
            Opcode::Pop
            | Opcode::True
            | Opcode::False
            | Opcode::Null
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Minus
            | Opcode::LNot
            | Opcode::BComplement
            | Opcode::Error
            | Opcode::Immutable
            | Opcode::Index
            | Opcode::SliceIndex
            | Opcode::IteratorInit
            | Opcode::IteratorNext
            | Opcode::IteratorKey
            | Opcode::IteratorValue
            | Opcode::Suspend => &[],
        }
    }

    /// Taille totale de l'instruction (opcode compris).
    pub fn instruction_len(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    /// Vrai pour les sauts dont l'opérande est une cible d'instruction.
    pub const fn is_jump(self) -> bool {
        matches!(self, Opcode::JumpFalsy | Opcode::AndJump | Opcode::OrJump | Opcode::Jump)
    }
}

/// Encode une instruction. Les opérandes sont tronqués à leur largeur.
pub fn make_instruction(op: Opcode, operands: &[u32]) -> Vec<u8> {
    let widths = op.operand_widths();
    let mut out = Vec::with_capacity(op.instruction_len());
    out.push(op as u8);
    for (&width, &operand) in widths.iter().zip(operands) {
        let be = operand.to_be_bytes();
        out.extend_from_slice(&be[4 - width..]);
    }
    // opérandes manquants : zéro (placeholder de saut)
    for &width in widths.iter().skip(operands.len()) {
        out.extend(core::iter::repeat(0).take(width));
    }
    out
}

/// Décode les opérandes qui suivent un opcode. Retourne les valeurs et le
/// nombre d'octets lus.
pub fn read_operands(op: Opcode, ins: &[u8]) -> CoreResult<(Vec<u32>, usize)> {
    let mut operands = Vec::with_capacity(op.operand_widths().len());
    let mut offset = 0;
    for &width in op.operand_widths() {
        let end = offset + width;
        let bytes = ins.get(offset..end).ok_or(CoreError::UnexpectedEof {
            needed: width as u64,
            at: offset as u64,
        })?;
        operands.push(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)));
        offset = end;
    }
    Ok((operands, offset))
}

/// Lit un opérande u8 à `at` (chemin rapide de la VM).
#[inline]
pub fn read_u8(ins: &[u8], at: usize) -> usize {
    ins[at] as usize
}

/// Lit un opérande u16 BE à `at`.
#[inline]
pub fn read_u16(ins: &[u8], at: usize) -> usize {
    (ins[at] as usize) << 8 | ins[at + 1] as usize
}

/// Lit un opérande u32 BE à `at`.
#[inline]
pub fn read_u32(ins: &[u8], at: usize) -> usize {
    u32::from_be_bytes([ins[at], ins[at + 1], ins[at + 2], ins[at + 3]]) as usize
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn opcode_bytes_are_dense() {
        for (i, op) in ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Opcode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(ALL.len() as u8), None);
    }

    #[test]
    fn encodes_big_endian_operands() {
        assert_eq!(make_instruction(Opcode::Constant, &[65534]), vec![0, 0xFF, 0xFE]);
        assert_eq!(make_instruction(Opcode::Jump, &[0x0102_0304]), vec![Opcode::Jump as u8, 1, 2, 3, 4]);
        assert_eq!(make_instruction(Opcode::Closure, &[2, 3]), vec![Opcode::Closure as u8, 0, 2, 3]);
        assert_eq!(make_instruction(Opcode::Pop, &[]), vec![Opcode::Pop as u8]);
    }

    #[test]
    fn missing_operands_become_placeholders() {
        assert_eq!(make_instruction(Opcode::JumpFalsy, &[]), vec![Opcode::JumpFalsy as u8, 0, 0, 0, 0]);
    }

    #[test]
    fn truncated_operands_are_an_error() {
        assert!(read_operands(Opcode::Jump, &[0, 0]).is_err());
    }

    proptest! {
        #[test]
        fn operands_survive_encoding(a in 0u32..=u16::MAX as u32, b in 0u32..=u8::MAX as u32) {
            for op in [Opcode::SetSelGlobal, Opcode::Closure] {
                let ins = make_instruction(op, &[a, b]);
                let (operands, read) = read_operands(op, &ins[1..]).unwrap();
                prop_assert_eq!(operands, vec![a, b]);
                prop_assert_eq!(read, ins.len() - 1);
            }
        }

        #[test]
        fn jump_targets_survive_encoding(target in any::<u32>()) {
            let ins = make_instruction(Opcode::Jump, &[target]);
            prop_assert_eq!(read_u32(&ins, 1), target as usize);
        }
    }
}
