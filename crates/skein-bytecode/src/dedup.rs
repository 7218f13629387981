//! Déduplication du pool de constantes.

use std::collections::HashMap;
use std::rc::Rc;

use skein_runtime::{CompiledFunction, Object};
use tracing::debug;

use crate::{walk_instructions, Bytecode};
use skein_core::{Opcode, Pos};

/// Index pas encore attribué.
const UNMAPPED: usize = usize::MAX;

#[derive(Default)]
struct Pool {
    constants: Vec<Object>,
    ints: HashMap<i64, usize>,
    floats: HashMap<u64, usize>,
    chars: HashMap<char, usize>,
    strings: HashMap<Rc<str>, usize>,
    modules: HashMap<Rc<str>, usize>,
    functions: HashMap<FunctionKey, usize>,
}

/// Deux fonctions ne fusionnent que si tout ce qui est observable coïncide,
/// positions source comprises (elles apparaissent dans les erreurs).
#[derive(PartialEq, Eq, Hash)]
struct FunctionKey {
    instructions: Vec<u8>,
    num_locals: usize,
    num_parameters: usize,
    var_args: bool,
    source_map: Vec<(usize, Pos)>,
}

impl FunctionKey {
    fn new(f: &CompiledFunction, instructions: Vec<u8>) -> Self {
        Self {
            instructions,
            num_locals: f.num_locals,
            num_parameters: f.num_parameters,
            var_args: f.var_args,
            source_map: f.source_map.iter().map(|(&ip, &pos)| (ip, pos)).collect(),
        }
    }
}

fn push(constants: &mut Vec<Object>, o: Object) -> usize {
    constants.push(o);
    constants.len() - 1
}

impl Pool {
    fn interned<K: Eq + std::hash::Hash>(
        constants: &mut Vec<Object>,
        table: &mut HashMap<K, usize>,
        key: K,
        o: &Object,
    ) -> usize {
        *table.entry(key).or_insert_with(|| {
            constants.push(o.clone());
            constants.len() - 1
        })
    }
}

/// Réécrit les opérandes de constante de `ins` selon `mapping`.
/// `None` si une instruction vise un index pas encore attribué.
fn rewrite(ins: &[u8], mapping: &[usize]) -> Option<Vec<u8>> {
    let mut out = ins.to_vec();
    let mut complete = true;
    let walked = walk_instructions(ins, |ip, op, operands| {
        if matches!(op, Opcode::Constant | Opcode::Closure) {
            let old = operands[0] as usize;
            match mapping.get(old) {
                Some(&UNMAPPED) => complete = false,
                Some(&new) => out[ip + 1..ip + 3].copy_from_slice(&(new as u16).to_be_bytes()),
                // index hors pool : laissé tel quel, la validation le rejettera
                None => {}
            }
        }
        Ok(())
    });
    (walked.is_ok() && complete).then_some(out)
}

impl Bytecode {
    /// Fusionne les constantes structurellement égales (entiers, flottants,
    /// caractères, chaînes, modules builtin par nom, fonctions compilées à
    /// instructions et positions source identiques) et réécrit chaque
    /// instruction qui les référence. Idempotent.
    pub fn remove_duplicates(&mut self) {
        let old = std::mem::take(&mut self.constants);
        let mut mapping = vec![UNMAPPED; old.len()];
        let mut pool = Pool::default();
        let mut deferred = Vec::new();

        for (i, c) in old.iter().enumerate() {
            let Pool { constants, ints, floats, chars, strings, modules, functions } = &mut pool;
            let new = match c {
                Object::Int(v) => Pool::interned(constants, ints, *v, c),
                Object::Float(v) => Pool::interned(constants, floats, v.to_bits(), c),
                Object::Char(v) => Pool::interned(constants, chars, *v, c),
                Object::String(s) => Pool::interned(constants, strings, Rc::clone(s), c),
                Object::ImmutableMap(_) => match c.module_name() {
                    Some(name) => Pool::interned(constants, modules, name, c),
                    None => push(constants, c.clone()),
                },
                Object::CompiledFunction(f) => match rewrite(&f.instructions, &mapping) {
                    Some(ins) => {
                        let key = FunctionKey::new(f, ins.clone());
                        let rewritten = Object::CompiledFunction(Rc::new(with_instructions(f, ins)));
                        Pool::interned(constants, functions, key, &rewritten)
                    }
                    None => {
                        let idx = push(constants, c.clone());
                        deferred.push(idx);
                        idx
                    }
                },
                _ => push(constants, c.clone()),
            };
            mapping[i] = new;
        }

        // références en avant : tout est attribué maintenant
        for idx in deferred {
            let fixed = match &pool.constants[idx] {
                Object::CompiledFunction(f) => {
                    rewrite(&f.instructions, &mapping).map(|ins| Rc::new(with_instructions(f, ins)))
                }
                _ => None,
            };
            if let Some(f) = fixed {
                pool.constants[idx] = Object::CompiledFunction(f);
            }
        }
        if let Some(ins) = rewrite(&self.main_function.instructions, &mapping) {
            self.main_function = Rc::new(with_instructions(&self.main_function, ins));
        }

        debug!(before = old.len(), after = pool.constants.len(), "constants deduplicated");
        self.constants = pool.constants;
    }
}

fn with_instructions(f: &CompiledFunction, ins: Vec<u8>) -> CompiledFunction {
    CompiledFunction { instructions: Rc::from(ins), ..f.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use skein_core::make_instruction;

    fn constant_operands(ins: &[u8]) -> Vec<u32> {
        let mut out = Vec::new();
        walk_instructions(ins, |_, op, operands| {
            if op == Opcode::Constant {
                out.push(operands[0]);
            }
            Ok(())
        })
        .unwrap();
        out
    }

    fn program(constants: Vec<Object>, refs: &[u32]) -> Bytecode {
        let mut ins = Vec::new();
        for &r in refs {
            ins.extend(make_instruction(Opcode::Constant, &[r]));
            ins.extend(make_instruction(Opcode::Pop, &[]));
        }
        ins.extend(make_instruction(Opcode::Suspend, &[]));
        Bytecode {
            main_function: Rc::new(CompiledFunction { instructions: Rc::from(ins), ..CompiledFunction::default() }),
            constants,
            ..Bytecode::default()
        }
    }

    #[test]
    fn collapses_repeated_ints() {
        let ints = [1, 2, 3, 1, 3].map(Object::Int).to_vec();
        let mut bc = program(ints, &[0, 1, 2, 3, 4]);
        bc.remove_duplicates();
        assert_eq!(bc.constants, vec![Object::Int(1), Object::Int(2), Object::Int(3)]);
        assert_eq!(constant_operands(&bc.main_function.instructions), vec![0, 1, 2, 0, 2]);
    }

    #[test]
    fn is_idempotent() {
        let consts = vec![Object::from("a"), Object::Float(1.5), Object::from("a"), Object::Char('x'), Object::Float(1.5)];
        let mut bc = program(consts, &[0, 1, 2, 3, 4]);
        bc.remove_duplicates();
        let once = bc.clone();
        bc.remove_duplicates();
        assert_eq!(bc, once);
        assert_eq!(bc.constants.len(), 3);
    }

    #[test]
    fn merges_identical_functions_and_rewrites_their_bodies() {
        let body = |c: u32| {
            let mut ins = make_instruction(Opcode::Constant, &[c]);
            ins.extend(make_instruction(Opcode::Return, &[1]));
            Object::CompiledFunction(Rc::new(CompiledFunction { instructions: Rc::from(ins), ..CompiledFunction::default() }))
        };
        // f(0) et f(2) lisent la même valeur une fois dédupliquée
        let consts = vec![Object::Int(7), Object::Int(8), Object::Int(7), body(0), body(2)];
        let mut bc = program(consts, &[3, 4]);
        bc.remove_duplicates();
        assert_eq!(bc.constants.len(), 3);
        assert_eq!(constant_operands(&bc.main_function.instructions), vec![2, 2]);
    }

    #[test]
    fn functions_at_different_positions_stay_apart() {
        let at = |pos: u32| {
            let ins = make_instruction(Opcode::Return, &[0]);
            let source_map = std::collections::BTreeMap::from([(0, Pos(pos))]);
            Object::CompiledFunction(Rc::new(CompiledFunction {
                instructions: Rc::from(ins),
                source_map: Rc::new(source_map),
                ..CompiledFunction::default()
            }))
        };
        let mut bc = program(vec![at(3), at(40), at(3)], &[0, 1, 2]);
        bc.remove_duplicates();
        assert_eq!(bc.constants.len(), 2);
        assert_eq!(constant_operands(&bc.main_function.instructions), vec![0, 1, 0]);
    }

    #[test]
    fn mutable_containers_are_never_merged() {
        let consts = vec![Object::array(vec![]), Object::array(vec![])];
        let mut bc = program(consts, &[0, 1]);
        bc.remove_duplicates();
        assert_eq!(bc.constants.len(), 2);
    }
}
