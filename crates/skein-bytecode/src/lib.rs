//! skein-bytecode — conteneur du programme compilé
//!
//! Un `Bytecode` regroupe :
//! - la fonction principale (`main_function`)
//! - le pool de constantes référencé par index depuis les instructions
//! - la table des fichiers sources (`file_set`) pour les diagnostics
//!
//! Il est produit une fois par le compilateur, éventuellement sérialisé
//! (`encode` / `decode`, format SKBC), puis confié à la VM. Seul
//! `remove_duplicates` le modifie, avant exécution.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
mod dedup;
mod error;

use std::fs;
use std::path::Path;
use std::rc::Rc;

use skein_core::{read_operands, CoreError, Opcode, SourceFileSet};
use skein_runtime::{CompiledFunction, MapValue, Object, BUILTINS};

pub use codec::{FORMAT_VERSION, MAGIC};
pub use error::{BytecodeError, Result};

/* ─────────────────────────── Modules builtin ─────────────────────────── */

/// Source des modules builtin de l'hôte, utilisée pour relier les natives
/// d'un module au décodage.
pub trait BuiltinModules {
    /// Attributs du module `name`.
    fn builtin_module(&self, name: &str) -> Option<&MapValue>;
}

/// Aucun module : seules les natives de la table builtin se relient.
impl BuiltinModules for () {
    fn builtin_module(&self, _name: &str) -> Option<&MapValue> {
        None
    }
}

/* ─────────────────────────── Bytecode ─────────────────────────── */

/// Programme compilé.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    /// Fichiers sources (positions des diagnostics).
    pub file_set: SourceFileSet,
    /// Point d'entrée.
    pub main_function: Rc<CompiledFunction>,
    /// Pool de constantes.
    pub constants: Vec<Object>,
}

impl Bytecode {
    /// Sérialise au format SKBC.
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Relit un programme SKBC ; les natives sont reliées par nom.
    pub fn decode(data: &[u8], modules: &dyn BuiltinModules) -> Result<Self> {
        codec::decode(data, modules)
    }

    /// Écrit le programme dans un fichier.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.encode()?)?;
        Ok(())
    }

    /// Lit un programme depuis un fichier.
    pub fn read_file(path: impl AsRef<Path>, modules: &dyn BuiltinModules) -> Result<Self> {
        Self::decode(&fs::read(path)?, modules)
    }

    /// Vérifie que chaque instruction se décode et que les index de
    /// constantes et de builtins sont dans les bornes.
    pub fn validate(&self) -> Result<()> {
        let len = self.constants.len();
        let check = |ins: &[u8]| {
            walk_instructions(ins, |_, op, operands| match op {
                Opcode::Constant | Opcode::Closure if operands[0] as usize >= len => {
                    Err(BytecodeError::ConstantOutOfRange { index: operands[0] as usize, len })
                }
                Opcode::GetBuiltin if operands[0] as usize >= BUILTINS.len() => {
                    Err(CoreError::corrupted(format!("builtin index {} out of range", operands[0])).into())
                }
                _ => Ok(()),
            })
        };
        check(&self.main_function.instructions)?;
        for c in &self.constants {
            if let Object::CompiledFunction(f) = c {
                check(&f.instructions)?;
            }
        }
        Ok(())
    }

    /// Nombre d'objets portés par le programme (fonction principale,
    /// constantes et leur contenu).
    pub fn count_objects(&self) -> usize {
        1 + self.constants.iter().map(count_object).sum::<usize>()
    }

    /// Listing du pool de constantes ; les fonctions sont suivies de leurs
    /// instructions indentées.
    pub fn format_constants(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (idx, c) in self.constants.iter().enumerate() {
            match c {
                Object::CompiledFunction(f) => {
                    out.push(format!("[{idx:>3}] (compiled-function|params={}|locals={})", f.num_parameters, f.num_locals));
                    out.extend(skein_core::format_instructions(&f.instructions, 0).into_iter().map(|l| format!("     {l}")));
                }
                other => out.push(format!("[{idx:>3}] {other} ({})", other.type_name())),
            }
        }
        out
    }

    /// Listing de la fonction principale.
    pub fn format_instructions(&self) -> Vec<String> {
        skein_core::format_instructions(&self.main_function.instructions, 0)
    }
}

/// Égalité structurelle (sert aux tests d'aller-retour) : les fonctions
/// compilées se comparent par contenu, les flottants bit à bit.
impl PartialEq for Bytecode {
    fn eq(&self, other: &Self) -> bool {
        self.file_set == other.file_set
            && same_function(&self.main_function, &other.main_function)
            && self.constants.len() == other.constants.len()
            && self.constants.iter().zip(&other.constants).all(|(a, b)| same_object(a, b))
    }
}

fn same_function(a: &CompiledFunction, b: &CompiledFunction) -> bool {
    a.instructions == b.instructions
        && a.num_locals == b.num_locals
        && a.num_parameters == b.num_parameters
        && a.var_args == b.var_args
        && a.source_map == b.source_map
        && a.free.len() == b.free.len()
}

fn same_seq(a: &[Object], b: &[Object]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_object(x, y))
}

fn same_entries(a: &MapValue, b: &MapValue) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka == kb && same_object(va, vb))
}

fn same_object(a: &Object, b: &Object) -> bool {
    match (a, b) {
        (Object::Float(x), Object::Float(y)) => x.to_bits() == y.to_bits(),
        (Object::CompiledFunction(x), Object::CompiledFunction(y)) => same_function(x, y),
        (Object::Array(x), Object::Array(y)) => same_seq(&x.borrow(), &y.borrow()),
        (Object::ImmutableArray(x), Object::ImmutableArray(y)) => same_seq(x, y),
        (Object::Map(x), Object::Map(y)) => same_entries(&x.borrow(), &y.borrow()),
        (Object::ImmutableMap(x), Object::ImmutableMap(y)) => same_entries(x, y),
        (Object::Error(x), Object::Error(y)) => same_object(x, y),
        _ => std::mem::discriminant(a) == std::mem::discriminant(b) && a == b,
    }
}

fn count_object(o: &Object) -> usize {
    1 + match o {
        Object::Array(a) => a.borrow().iter().map(count_object).sum(),
        Object::ImmutableArray(a) => a.iter().map(count_object).sum(),
        Object::Map(m) => m.borrow().values().map(count_object).sum(),
        Object::ImmutableMap(m) => m.values().map(count_object).sum(),
        Object::Error(e) => count_object(e),
        _ => 0,
    }
}

/// Parcourt `ins` instruction par instruction : `f(offset, opcode, opérandes)`.
pub fn walk_instructions(ins: &[u8], mut f: impl FnMut(usize, Opcode, &[u32]) -> Result<()>) -> Result<()> {
    let mut ip = 0;
    while ip < ins.len() {
        let byte = ins[ip];
        let op = Opcode::from_u8(byte).ok_or(CoreError::UnknownOpcode { byte, at: ip })?;
        let (operands, read) = read_operands(op, &ins[ip + 1..])?;
        f(ip, op, &operands)?;
        ip += 1 + read;
    }
    Ok(())
}

/* ─────────────────────────── Tests ─────────────────────────── */
