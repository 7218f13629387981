//! Frame d'appel.

use std::rc::Rc;

use skein_core::{Opcode, SourceFilePos, SourceFileSet};
use skein_runtime::CompiledFunction;

/// Activation d'une fonction compilée.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub func: Rc<CompiledFunction>,
    /// Prochaine instruction.
    pub ip: usize,
    /// Début de l'instruction en cours (positions d'erreur).
    pub at: usize,
    /// Premier slot local ; l'appelé est juste en dessous.
    pub base: usize,
}

impl Frame {
    pub fn new(func: Rc<CompiledFunction>, base: usize) -> Self {
        Self { func, ip: 0, at: 0, base }
    }

    /// Position source de l'instruction en cours.
    pub fn position(&self, file_set: &SourceFileSet) -> SourceFilePos {
        file_set.position(self.func.source_pos(self.at))
    }

    /// Vrai si l'instruction suivante est `RETURN 1` (appel terminal).
    pub fn returns_next(&self) -> bool {
        let ins = &self.func.instructions;
        ins.get(self.ip) == Some(&(Opcode::Return as u8)) && ins.get(self.ip + 1) == Some(&1)
    }
}
