//! skein-vm — interpréteur à pile du bytecode skein
//!
//! - Une pile de valeurs partagée par toutes les frames, une pile de frames
//! - Globales dans un tableau de taille fixe, adressées par index
//! - Fermetures : une locale capturée vit dans une cellule partagée
//! - Annulation coopérative (`CancelToken`) vérifiée toutes les
//!   `check_interval` instructions et avant chaque appel natif
//! - Rappels natifs → script via `NativeContext::call` (trait `Invoke`)
//!
//! Cycle de vie : `Ready → Running → {Suspended | Aborted}`.
//!
//! ```
//! use skein_ast::build::*;
//! use skein_compiler::{compile, CompilerOptions, SymbolTable};
//! use skein_core::SourceFileSet;
//! use skein_runtime::Object;
//! use skein_vm::ExecContext;
//!
//! let file = file("main", vec![define("x", bin(int(40), skein_ast::BinaryOp::Add, int(2)))]);
//! let mut symbols = SymbolTable::with_builtins();
//! let bc = compile(&file, SourceFileSet::new(), &mut symbols, CompilerOptions::default()).unwrap();
//!
//! let mut globals = Vec::new();
//! skein_vm::run(&bc, &ExecContext::default(), &mut globals).unwrap();
//! assert_eq!(globals[symbols.global_index("x").unwrap()], Object::Int(42));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod frame;
mod vm;

pub use vm::{Vm, VmState};

use skein_bytecode::Bytecode;
use skein_runtime::{CancelToken, Limits, Object, RuntimeError};

/* ─────────────────────────── Configuration ─────────────────────────── */

/// Dimensions de la VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Taille maximale de la pile de valeurs.
    pub stack_size: usize,
    /// Profondeur maximale d'appels.
    pub max_frames: usize,
    /// Nombre de slots globaux.
    pub globals_size: usize,
    /// Nombre d'instructions entre deux vérifications d'annulation.
    pub check_interval: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { stack_size: 2048, max_frames: 1024, globals_size: 1024, check_interval: 1024 }
    }
}

/// Contexte d'une exécution : limites de ressources et jeton d'annulation.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    /// Plafonds appliqués aux objets produits.
    pub limits: Limits,
    /// Arrêt demandé par l'hôte (ou échéance).
    pub cancel: CancelToken,
}

impl ExecContext {
    /// Contexte avec ces limites.
    pub fn new(limits: Limits, cancel: CancelToken) -> Self {
        Self { limits, cancel }
    }
}

/* ─────────────────────────── Entrée ─────────────────────────── */

/// Exécute `bytecode` avec la configuration par défaut.
///
/// `globals` est prêté à la VM puis rendu (étendu à `globals_size` slots) :
/// l'hôte y relit les variables du script via les index du compilateur.
/// Retourne `undefined` à la fin normale du programme (`SUSPEND`).
pub fn run(bytecode: &Bytecode, ctx: &ExecContext, globals: &mut Vec<Object>) -> Result<Object, RuntimeError> {
    let mut vm = Vm::new(bytecode.clone(), std::mem::take(globals), VmConfig::default(), ctx.clone());
    let result = vm.run();
    *globals = vm.into_globals();
    result
}
