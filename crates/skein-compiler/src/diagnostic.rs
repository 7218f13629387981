//! Diagnostics de compilation.

use core::fmt;

use skein_core::SourceFilePos;
use thiserror::Error;

/// Une erreur de compilation positionnée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Message.
    pub message: String,
    /// Position résolue (`-` si inconnue).
    pub pos: SourceFilePos,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compile Error: {}\n\tat {}", self.message, self.pos)
    }
}

/// Échec de compilation : les premiers diagnostics, plus le nombre
/// d'erreurs au-delà du plafond.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.diagnostics, .overflow))]
pub struct CompileError {
    /// Diagnostics enregistrés, dans l'ordre d'apparition.
    pub diagnostics: Vec<Diagnostic>,
    /// Erreurs non enregistrées (plafond atteint).
    pub overflow: usize,
}

impl CompileError {
    /// Premier diagnostic.
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }
}

fn render(diagnostics: &[Diagnostic], overflow: &usize) -> String {
    let mut out = diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
    if *overflow > 0 {
        out.push_str(&format!("\n(and {overflow} more errors)"));
    }
    out
}
