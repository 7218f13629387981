//! skein-core — primitives partagées du moteur de script
//!
//! Fournit :
//! - `Pos`, `SourceFile`, `SourceFileSet`, `SourceFilePos` (positions source)
//! - le jeu d'instructions (`Opcode`, largeurs d'opérandes, encodage/décodage)
//! - la table des opérateurs binaires (`Operator`)
//! - IO mémoire big-endian : `ByteWriter`, `ByteReader`
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Features :
//! - `serde` : derive (dé)sérialisation sur les positions et le FileSet

#![deny(missing_docs)]

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Instructions, opérateurs et listing textuel.
pub mod bytecode;
/// Positions source et table des fichiers.
pub mod pos;

mod bytes;

pub use bytecode::{
    format_instructions, make_instruction, read_operands, read_u16, read_u32, read_u8, Opcode,
    Operator, OPCODE_REVISION,
};
pub use bytes::{ByteReader, ByteWriter};
pub use pos::{Pos, SourceFile, SourceFilePos, SourceFileSet, NO_POS};

use thiserror::Error;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes (lecture binaire, opcodes).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Fin de buffer inattendue.
    #[error("unexpected EOF: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d'octets manquants.
        needed: u64,
        /// Offset où l'erreur s'est produite.
        at: u64,
    },
    /// Octet d'opcode inconnu.
    #[error("unknown opcode 0x{byte:02X} at {at}")]
    UnknownOpcode {
        /// Octet lu.
        byte: u8,
        /// Offset de l'instruction.
        at: usize,
    },
    /// Opérateur binaire inconnu.
    #[error("unknown operator code {0}")]
    UnknownOperator(u8),
    /// UTF-8 invalide.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// Données corrompues (format).
    #[error("corrupted: {0}")]
    Corrupted(String),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<String>) -> Self {
        CoreError::Corrupted(msg.into())
    }
}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        make_instruction, read_operands, ByteReader, ByteWriter, CoreError, CoreResult, Opcode,
        Operator, Pos, SourceFilePos, SourceFileSet, NO_POS,
    };
}
