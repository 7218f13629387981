//! Table des symboles (arène de portées).
//!
//! Une portée est soit une *fonction* (globale à la racine), soit un *bloc*
//! imbriqué dans une fonction. Les blocs ne possèdent pas leurs slots : ils
//! numérotent à la suite de leur parent, et les définitions d'un bloc au
//! niveau global sont comptées à la racine.
//!
//! Résolution : locale → libre → globale → builtin. Un nom local trouvé
//! dans une fonction englobante devient une variable *libre* de chaque
//! fonction traversée.

use std::collections::HashMap;

use skein_runtime::BUILTINS;

/// Identifiant d'une portée dans l'arène.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Identifiant d'un symbole dans l'arène.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

/// Portée d'un symbole résolu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// Slot global.
    Global,
    /// Slot local de la fonction courante.
    Local,
    /// Native de la table builtin.
    Builtin,
    /// Variable capturée.
    Free,
}

/// Symbole défini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Nom.
    pub name: String,
    /// Portée.
    pub scope: SymbolScope,
    /// Index de slot (global, local, libre ou builtin selon `scope`).
    pub index: usize,
    /// La locale a déjà reçu une valeur (sert à la capture anticipée des
    /// fonctions récursives).
    pub local_assigned: bool,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    block: bool,
    store: HashMap<String, SymbolId>,
    num_definition: usize,
    max_definition: usize,
    free: Vec<SymbolId>,
}

/// Arène des portées et symboles d'une compilation.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    builtins: Vec<SymbolId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Portée globale du programme principal.
    pub const ROOT: ScopeId = ScopeId(0);

    /// Table vide (racine seule, aucun builtin).
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()], symbols: Vec::new(), builtins: Vec::new() }
    }

    /// Table dont la racine connaît toutes les natives builtin.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for (idx, (name, _)) in BUILTINS.iter().enumerate() {
            table.define_builtin(Self::ROOT, idx, name);
        }
        table
    }

    /// Nouvelle racine indépendante (compilation d'un module source), qui
    /// hérite des builtins déjà déclarés.
    pub fn new_root(&mut self) -> ScopeId {
        let root = self.push_scope(Scope::default());
        for &id in &self.builtins {
            let name = self.symbols[id.0].name.clone();
            self.scopes[root.0].store.insert(name, id);
        }
        root
    }

    /// Portée enfant : fonction (`block = false`) ou bloc.
    pub fn fork(&mut self, parent: ScopeId, block: bool) -> ScopeId {
        self.push_scope(Scope { parent: Some(parent), block, ..Scope::default() })
    }

    /// Parent de `scope` ; `skip_block` remonte jusqu'à la fonction.
    pub fn parent(&self, scope: ScopeId, skip_block: bool) -> Option<ScopeId> {
        let s = &self.scopes[scope.0];
        match s.parent {
            Some(p) if skip_block && s.block => self.parent(p, true),
            other => other,
        }
    }

    /// Définit `name` dans `scope` et retourne le nouveau symbole.
    pub fn define(&mut self, scope: ScopeId, name: &str) -> SymbolId {
        let index = self.next_index(scope);
        self.scopes[scope.0].num_definition += 1;

        let kind = if self.parent(scope, true).is_none() {
            // bloc de niveau global : le slot est compté à la racine
            if let Some(mut root) = self.scopes[scope.0].parent {
                while let Some(p) = self.scopes[root.0].parent {
                    root = p;
                }
                self.scopes[scope.0].num_definition -= 1;
                self.scopes[root.0].num_definition += 1;
            }
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };

        let id = self.push_symbol(Symbol { name: name.to_owned(), scope: kind, index, local_assigned: false });
        self.scopes[scope.0].store.insert(name.to_owned(), id);
        self.update_max_defs(scope, index + 1);
        id
    }

    /// Déclare la native `index` sous `name`.
    pub fn define_builtin(&mut self, scope: ScopeId, index: usize, name: &str) -> SymbolId {
        let id = self.push_symbol(Symbol {
            name: name.to_owned(),
            scope: SymbolScope::Builtin,
            index,
            local_assigned: false,
        });
        self.scopes[scope.0].store.insert(name.to_owned(), id);
        self.builtins.push(id);
        id
    }

    /// Résout `name` depuis `scope`. Retourne le symbole et la profondeur
    /// (0 = défini dans `scope` même). Peut définir des variables libres
    /// dans les fonctions traversées.
    pub fn resolve(&mut self, scope: ScopeId, name: &str) -> Option<(SymbolId, usize)> {
        self.resolve_in(scope, name, false)
    }

    fn resolve_in(&mut self, scope: ScopeId, name: &str, recur: bool) -> Option<(SymbolId, usize)> {
        if let Some(&id) = self.scopes[scope.0].store.get(name) {
            let sym = &self.symbols[id.0];
            // une locale pas encore affectée n'est visible que depuis une
            // portée plus profonde
            if sym.scope != SymbolScope::Local || sym.local_assigned || recur {
                return Some((id, 0));
            }
        }

        let parent = self.scopes[scope.0].parent?;
        let (id, depth) = self.resolve_in(parent, name, true)?;
        let depth = depth + 1;

        let kind = self.symbols[id.0].scope;
        if !self.scopes[scope.0].block && !matches!(kind, SymbolScope::Global | SymbolScope::Builtin) {
            return Some((self.define_free(scope, id), depth));
        }
        Some((id, depth))
    }

    fn define_free(&mut self, scope: ScopeId, original: SymbolId) -> SymbolId {
        let index = self.scopes[scope.0].free.len();
        self.scopes[scope.0].free.push(original);
        let name = self.symbols[original.0].name.clone();
        let id = self.push_symbol(Symbol { name: name.clone(), scope: SymbolScope::Free, index, local_assigned: false });
        self.scopes[scope.0].store.insert(name, id);
        id
    }

    /// Symbole par identifiant.
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    /// Marque une locale comme affectée.
    pub fn mark_assigned(&mut self, id: SymbolId) {
        self.symbols[id.0].local_assigned = true;
    }

    /// Symboles d'origine capturés par la fonction `scope`, dans l'ordre
    /// des index libres.
    pub fn free_symbols(&self, scope: ScopeId) -> &[SymbolId] {
        &self.scopes[scope.0].free
    }

    /// Nombre de slots nécessaires à `scope` (blocs imbriqués compris).
    pub fn max_symbols(&self, scope: ScopeId) -> usize {
        self.scopes[scope.0].max_definition
    }

    /// Noms définis directement dans `scope`.
    pub fn names(&self, scope: ScopeId) -> Vec<&str> {
        let mut names: Vec<&str> = self.scopes[scope.0].store.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Raccourci hôte : définit une globale.
    pub fn define_global(&mut self, name: &str) -> usize {
        let id = self.define(Self::ROOT, name);
        self.symbols[id.0].index
    }

    /// Raccourci hôte : index de la globale `name`, s'il existe.
    pub fn global_index(&self, name: &str) -> Option<usize> {
        let id = self.scopes[Self::ROOT.0].store.get(name)?;
        let sym = &self.symbols[id.0];
        (sym.scope == SymbolScope::Global).then_some(sym.index)
    }

    fn next_index(&self, scope: ScopeId) -> usize {
        let s = &self.scopes[scope.0];
        match s.parent {
            Some(p) if s.block => self.next_index(p) + s.num_definition,
            _ => s.num_definition,
        }
    }

    fn update_max_defs(&mut self, scope: ScopeId, defs: usize) {
        let s = &mut self.scopes[scope.0];
        s.max_definition = s.max_definition.max(defs);
        if let (true, Some(p)) = (s.block, s.parent) {
            self.update_max_defs(p, defs);
        }
    }

    fn push_scope(&mut self, scope: Scope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId(self.scopes.len() - 1)
    }

    fn push_symbol(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.push(symbol);
        SymbolId(self.symbols.len() - 1)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sym(t: &mut SymbolTable, scope: ScopeId, name: &str) -> (SymbolScope, usize) {
        let (id, _) = t.resolve(scope, name).unwrap();
        let s = t.symbol(id);
        (s.scope, s.index)
    }

    #[test]
    fn globals_and_locals() {
        let mut t = SymbolTable::new();
        t.define(SymbolTable::ROOT, "a");
        t.define(SymbolTable::ROOT, "b");

        let f = t.fork(SymbolTable::ROOT, false);
        let c = t.define(f, "c");
        t.mark_assigned(c);

        assert_eq!(sym(&mut t, f, "a"), (SymbolScope::Global, 0));
        assert_eq!(sym(&mut t, f, "b"), (SymbolScope::Global, 1));
        assert_eq!(sym(&mut t, f, "c"), (SymbolScope::Local, 0));
        assert!(t.resolve(SymbolTable::ROOT, "c").is_none());
    }

    #[test]
    fn global_blocks_count_at_root() {
        let mut t = SymbolTable::new();
        t.define(SymbolTable::ROOT, "a");
        let blk = t.fork(SymbolTable::ROOT, true);
        let x = t.define(blk, "x");
        assert_eq!(t.symbol(x).scope, SymbolScope::Global);
        assert_eq!(t.symbol(x).index, 1);
        // un second bloc ne réutilise pas le slot global
        let blk2 = t.fork(SymbolTable::ROOT, true);
        let y = t.define(blk2, "y");
        assert_eq!(t.symbol(y).index, 2);
        assert_eq!(t.max_symbols(SymbolTable::ROOT), 3);
    }

    #[test]
    fn local_blocks_reuse_slots_and_track_max() {
        let mut t = SymbolTable::new();
        let f = t.fork(SymbolTable::ROOT, false);
        t.define(f, "p");
        let b1 = t.fork(f, true);
        let x = t.define(b1, "x");
        let y = t.define(b1, "y");
        assert_eq!((t.symbol(x).index, t.symbol(y).index), (1, 2));
        let b2 = t.fork(f, true);
        let z = t.define(b2, "z");
        assert_eq!(t.symbol(z).index, 1);
        assert_eq!(t.max_symbols(f), 3);
    }

    #[test]
    fn free_variables_propagate_through_functions() {
        let mut t = SymbolTable::new();
        let outer = t.fork(SymbolTable::ROOT, false);
        let a = t.define(outer, "a");
        t.mark_assigned(a);
        let middle = t.fork(outer, false);
        let blk = t.fork(middle, true);
        let inner = t.fork(blk, false);

        assert_eq!(sym(&mut t, inner, "a"), (SymbolScope::Free, 0));
        // la fonction intermédiaire capture aussi `a`
        assert_eq!(t.free_symbols(middle), &[a]);
        let middle_free = t.free_symbols(inner)[0];
        assert_eq!(t.symbol(middle_free).scope, SymbolScope::Free);
        // un bloc ne capture jamais
        assert!(t.free_symbols(blk).is_empty());
    }

    #[test]
    fn builtins_resolve_everywhere() {
        let mut t = SymbolTable::with_builtins();
        let f = t.fork(SymbolTable::ROOT, false);
        assert_eq!(sym(&mut t, f, "len"), (SymbolScope::Builtin, 0));
        assert!(t.free_symbols(f).is_empty());

        let module = t.new_root();
        assert_eq!(sym(&mut t, module, "append").0, SymbolScope::Builtin);
    }

    #[test]
    fn unassigned_local_is_hidden_at_same_depth() {
        let mut t = SymbolTable::new();
        let f = t.fork(SymbolTable::ROOT, false);
        t.define(f, "x");
        assert!(t.resolve(f, "x").is_none());
        let inner = t.fork(f, false);
        assert_eq!(sym(&mut t, inner, "x"), (SymbolScope::Free, 0));
    }

    #[test]
    fn host_globals() {
        let mut t = SymbolTable::with_builtins();
        assert_eq!(t.define_global("config"), 0);
        assert_eq!(t.global_index("config"), Some(0));
        assert_eq!(t.global_index("len"), None);
        assert!(t.names(SymbolTable::ROOT).contains(&"config"));
    }
}
