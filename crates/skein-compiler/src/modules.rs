//! Modules importables : builtin (attributs natifs de l'hôte) ou source
//! (AST compilé à la demande, une fois par compilation).

use std::rc::Rc;

use indexmap::IndexMap;
use skein_ast::File;
use skein_bytecode::BuiltinModules;
use skein_runtime::{MapValue, Object};

/// Module enregistré.
#[derive(Debug, Clone)]
pub enum Module {
    /// Map immuable d'attributs, marquée de son nom.
    Builtin(Object),
    /// Fichier source ; sa valeur est celle de son `export`.
    Source(Rc<File>),
}

/// Nom → module.
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    modules: IndexMap<String, Module>,
}

impl ModuleMap {
    /// Table vide.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un module builtin.
    pub fn add_builtin_module(&mut self, name: &str, attrs: MapValue) -> &mut Self {
        self.modules.insert(name.to_owned(), Module::Builtin(Object::module(name, attrs)));
        self
    }

    /// Enregistre un module source (son AST, positions dans le même
    /// `SourceFileSet` que le programme).
    pub fn add_source_module(&mut self, name: &str, file: File) -> &mut Self {
        self.modules.insert(name.to_owned(), Module::Source(Rc::new(file)));
        self
    }

    /// Ajoute tous les modules de `other` (écrase les homonymes).
    pub fn add_map(&mut self, other: &ModuleMap) -> &mut Self {
        for (name, module) in &other.modules {
            self.modules.insert(name.clone(), module.clone());
        }
        self
    }

    /// Retire un module.
    pub fn remove(&mut self, name: &str) -> Option<Module> {
        self.modules.shift_remove(name)
    }

    /// Module `name`.
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Noms, dans l'ordre d'enregistrement.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Nombre de modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Vrai si aucun module.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl BuiltinModules for ModuleMap {
    fn builtin_module(&self, name: &str) -> Option<&MapValue> {
        match self.modules.get(name) {
            Some(Module::Builtin(Object::ImmutableMap(attrs))) => Some(attrs.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_ast::build::file;

    #[test]
    fn builtin_modules_expose_attributes() {
        let mut attrs = MapValue::new();
        attrs.insert("pi".into(), Object::Float(3.0));
        let mut map = ModuleMap::new();
        map.add_builtin_module("math", attrs).add_source_module("util", file("util", vec![]));

        let math = map.builtin_module("math").unwrap();
        assert_eq!(math.get("pi"), Some(&Object::Float(3.0)));
        assert!(map.builtin_module("util").is_none());
        assert_eq!(map.names().collect::<Vec<_>>(), ["math", "util"]);

        let mut other = ModuleMap::new();
        other.add_map(&map);
        assert!(other.remove("util").is_some());
        assert_eq!(other.len(), 1);
    }
}
