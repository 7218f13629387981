//! skein-compiler — de l'AST au bytecode
//!
//! - Entrée : `skein_ast::File` (programme principal) + `SourceFileSet`
//! - Sortie : `skein_bytecode::Bytecode` (constantes dédupliquées par défaut)
//! - Diagnostics : `CompileError` (plafonné, positions `fichier:ligne:col`)
//! - Table des symboles en arène (`SymbolTable`), modules (`ModuleMap`)
//!
//! API principale :
//! ```
//! use skein_ast::build::*;
//! use skein_compiler::{compile, CompilerOptions, SymbolTable};
//! use skein_core::SourceFileSet;
//!
//! let file = file("main", vec![define("x", bin(int(1), skein_ast::BinaryOp::Add, int(2)))]);
//! let mut symbols = SymbolTable::with_builtins();
//! let bc = compile(&file, SourceFileSet::new(), &mut symbols, CompilerOptions::default()).unwrap();
//! assert_eq!(symbols.global_index("x"), Some(0));
//! assert!(!bc.format_instructions().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod compiler;
mod diagnostic;
mod modules;
mod symbols;

pub use compiler::Compiler;
pub use diagnostic::{CompileError, Diagnostic};
pub use modules::{Module, ModuleMap};
pub use symbols::{ScopeId, Symbol, SymbolId, SymbolScope, SymbolTable};

use skein_ast::File;
use skein_bytecode::Bytecode;
use skein_core::SourceFileSet;

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options du compilateur
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Nombre maximal d'erreurs enregistrées (0 = illimité). Au-delà, les
    /// erreurs sont seulement comptées et la compilation s'arrête à la
    /// prochaine instruction de premier niveau.
    pub max_errors: usize,
    /// Journalise (niveau `trace`) le listing de chaque fonction compilée.
    pub trace: bool,
    /// Modules importables.
    pub modules: ModuleMap,
    /// Fusionne les constantes identiques après compilation.
    pub remove_duplicates: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { max_errors: 10, trace: false, modules: ModuleMap::new(), remove_duplicates: true }
    }
}

impl CompilerOptions {
    /// Remplace la table des modules.
    #[must_use]
    pub fn with_modules(mut self, modules: ModuleMap) -> Self {
        self.modules = modules;
        self
    }

    /// Change le plafond d'erreurs.
    #[must_use]
    pub const fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entrée
// ─────────────────────────────────────────────────────────────────────────────

/// Compile `file`. `symbols` porte les builtins et les globales de l'hôte ;
/// il reçoit les globales du programme (pour relire la VM après coup).
pub fn compile(
    file: &File,
    file_set: SourceFileSet,
    symbols: &mut SymbolTable,
    options: CompilerOptions,
) -> Result<Bytecode, CompileError> {
    Compiler::new(file_set, symbols, options).compile(file)
}
