//! Erreurs d'exécution.
//!
//! Toutes les erreurs qui arrêtent la VM passent par `RuntimeError`. Les
//! erreurs « douces » des builtins (conversion ratée…) ne sont pas des
//! `RuntimeError` : elles renvoient une valeur (`undefined`, défaut, ou un
//! objet `error`) visible du script.

use core::fmt::Write as _;

use skein_core::SourceFilePos;
use thiserror::Error;

/// Erreur fatale d'exécution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Arité invalide.
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongNumArguments {
        /// Arité attendue (`1`, `1..2`, `>=1`…).
        want: String,
        /// Nombre reçu.
        got: usize,
    },

    /// Argument de mauvais type.
    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    InvalidArgumentType {
        /// Nom ou ordinal (`first`, `second`…).
        name: String,
        /// Type(s) attendu(s).
        expected: String,
        /// Type reçu.
        found: String,
    },

    /// Opérandes non supportés par l'opérateur.
    #[error("invalid operation: {lhs} {op} {rhs}")]
    UnsupportedOperands {
        /// Symbole de l'opérateur.
        op: String,
        /// Type de gauche.
        lhs: String,
        /// Type de droite.
        rhs: String,
    },

    /// Opérateur unaire non supporté.
    #[error("invalid operation: {op}{operand}")]
    UnsupportedUnary {
        /// Symbole.
        op: &'static str,
        /// Type de l'opérande.
        operand: String,
    },

    /// Division (ou modulo) entier par zéro.
    #[error("division by zero")]
    DivisionByZero,

    /// Accès hors bornes (ou bornes de `splice` invalides).
    #[error("index out of bounds")]
    IndexOutOfBounds,

    /// Type d'index refusé par le conteneur.
    #[error("invalid index type: {0}")]
    InvalidIndexType(String),

    /// Type de valeur refusé par `index_set` (bytes).
    #[error("invalid index value type: {0}")]
    InvalidIndexValueType(String),

    /// Seul `err.value` est lisible sur une erreur.
    #[error("invalid index on error")]
    InvalidIndexOnError,

    /// Bornes de slice inversées.
    #[error("invalid slice index: {low} > {high}")]
    InvalidSliceIndex {
        /// Borne basse.
        low: i64,
        /// Borne haute.
        high: i64,
    },

    /// Objet non indexable.
    #[error("not indexable: {0}")]
    NotIndexable(String),

    /// Objet non modifiable par index.
    #[error("not index-assignable: {0}")]
    NotIndexAssignable(String),

    /// Objet non itérable.
    #[error("not iterable: {0}")]
    NotIterable(String),

    /// Objet non appelable.
    #[error("not callable: {0}")]
    NotCallable(String),

    /// `range` avec un pas nul ou négatif.
    #[error("range step must be greater than 0")]
    InvalidRangeStep,

    /// Point de code invalide produit par une opération sur `char`.
    #[error("invalid char value: {0}")]
    InvalidChar(i64),

    /// Instant hors de la plage représentable.
    #[error("time out of range")]
    TimeOutOfRange,

    /// Chaîne trop longue.
    #[error("exceeding string size limit")]
    StringLimit,

    /// Bytes trop longs.
    #[error("exceeding bytes size limit")]
    BytesLimit,

    /// Tableau trop long.
    #[error("exceeding array size limit")]
    ArrayLimit,

    /// Plafond d'allocations atteint.
    #[error("object allocation limit exceeded")]
    ObjectAllocLimit,

    /// Pile de valeurs ou de frames pleine.
    #[error("stack overflow")]
    StackOverflow,

    /// Index de globale hors de la table.
    #[error("global index out of range: {0}")]
    GlobalOutOfRange(usize),

    /// Octet d'instruction invalide.
    #[error("invalid instruction 0x{0:02X}")]
    InvalidInstruction(u8),

    /// Annulation demandée par l'hôte (toujours fatale).
    #[error("execution aborted")]
    Aborted,

    /// Message libre (fonctions natives de l'hôte).
    #[error("{0}")]
    Custom(String),

    /// Erreur enrichie de la pile d'appels du script.
    #[error("{}", traced_report(.source, .trace))]
    Traced {
        /// Cause.
        source: Box<RuntimeError>,
        /// Positions, frame courante d'abord.
        trace: Vec<SourceFilePos>,
    },
}

/// Rapport `Runtime Error: ...\n\tat pos` d'une erreur tracée.
fn traced_report(source: &RuntimeError, trace: &[SourceFilePos]) -> String {
    let mut out = format!("Runtime Error: {source}");
    for pos in trace {
        let _ = write!(out, "\n\tat {pos}");
    }
    out
}

impl RuntimeError {
    /// Raccourci pour `WrongNumArguments`.
    pub fn wrong_args(want: impl Into<String>, got: usize) -> Self {
        RuntimeError::WrongNumArguments { want: want.into(), got }
    }

    /// Raccourci pour `InvalidArgumentType`.
    pub fn arg_type(name: impl Into<String>, expected: impl Into<String>, found: impl Into<String>) -> Self {
        RuntimeError::InvalidArgumentType { name: name.into(), expected: expected.into(), found: found.into() }
    }

    /// Message libre.
    pub fn custom(msg: impl Into<String>) -> Self {
        RuntimeError::Custom(msg.into())
    }

    /// Cause d'origine (sans les couches de trace).
    pub fn root(&self) -> &RuntimeError {
        match self {
            RuntimeError::Traced { source, .. } => source.root(),
            other => other,
        }
    }

    /// Vrai pour une annulation.
    pub fn is_aborted(&self) -> bool {
        matches!(self.root(), RuntimeError::Aborted)
    }

    /// Ajoute des positions à la trace (crée la couche si besoin).
    #[must_use]
    pub fn with_trace(self, frames: impl IntoIterator<Item = SourceFilePos>) -> Self {
        match self {
            RuntimeError::Traced { source, mut trace } => {
                trace.extend(frames);
                RuntimeError::Traced { source, trace }
            }
            other => RuntimeError::Traced { source: Box::new(other), trace: frames.into_iter().collect() },
        }
    }
}

/// Ordinal anglais utilisé dans les messages d'argument.
pub fn ordinal(idx: usize) -> &'static str {
    const NAMES: [&str; 8] = ["first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth"];
    NAMES.get(idx).copied().unwrap_or("nth")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn traced_report_lists_frames() {
        let pos = |line| SourceFilePos { filename: "main".into(), offset: 0, line, column: 3 };
        let err = RuntimeError::DivisionByZero.with_trace([pos(4)]).with_trace([pos(9)]);
        assert_eq!(err.to_string(), "Runtime Error: division by zero\n\tat main:4:3\n\tat main:9:3");
        assert_eq!(err.root(), &RuntimeError::DivisionByZero);
    }

    #[test]
    fn aborted_survives_tracing() {
        assert!(RuntimeError::Aborted.with_trace([]).is_aborted());
        assert!(!RuntimeError::StackOverflow.is_aborted());
    }
}
