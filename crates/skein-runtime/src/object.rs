//! Modèle objet : valeurs dynamiques partagées par le code compilé et les natives.
//!
//! Les conteneurs mutables (`Array`, `Map`, `Bytes`) sont des handles
//! `Rc<RefCell<..>>` : deux liaisons vers le même tableau observent les
//! mutations l'une de l'autre. Les variantes immuables sont des `Rc` simples.
//! Cloner un `Object` ne copie jamais le contenu d'un conteneur ; `copy()`
//! le fait.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use indexmap::IndexMap;
use skein_core::{Pos, NO_POS};

use crate::{NativeContext, RuntimeError};

/// Contenu d'une map.
pub type MapValue = IndexMap<String, Object>;

/// Cellule partagée d'une variable capturée par une fermeture.
pub type Cell = Rc<RefCell<Object>>;

/// Signature d'une fonction native.
pub type NativeFn = fn(&mut NativeContext<'_>, &[Object]) -> Result<Object, RuntimeError>;

/// Clé réservée qui nomme un module builtin (map immuable d'attributs).
pub const MODULE_NAME_KEY: &str = "__module_name__";

/* ─────────────────────────── Fonctions ─────────────────────────── */

/// Fonction native nommée.
#[derive(Clone)]
pub struct BuiltinFunction {
    /// Nom (sert aussi à relier les fonctions après désérialisation).
    pub name: Cow<'static, str>,
    /// Implémentation.
    pub func: NativeFn,
}

impl BuiltinFunction {
    /// Construit une native.
    pub fn new(name: impl Into<Cow<'static, str>>, func: NativeFn) -> Self {
        Self { name: name.into(), func }
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

/// Fonction compilée ; immuable une fois produite par le compilateur.
/// Une fermeture partage les instructions de son prototype et porte ses
/// cellules capturées dans `free`.
#[derive(Clone, Default)]
pub struct CompiledFunction {
    /// Instructions.
    pub instructions: Rc<[u8]>,
    /// Nombre de slots locaux (paramètres compris).
    pub num_locals: usize,
    /// Nombre de paramètres déclarés.
    pub num_parameters: usize,
    /// Le dernier paramètre collecte les arguments surnuméraires.
    pub var_args: bool,
    /// Offset d'instruction → position source.
    pub source_map: Rc<BTreeMap<usize, Pos>>,
    /// Cellules capturées (fermetures uniquement).
    pub free: Vec<Cell>,
}

impl CompiledFunction {
    /// Position source de l'instruction à `ip` (ou de la plus proche avant).
    pub fn source_pos(&self, ip: usize) -> Pos {
        self.source_map.range(..=ip).next_back().map_or(NO_POS, |(_, &pos)| pos)
    }

    /// Fermeture sur ce prototype.
    pub fn with_free(&self, free: Vec<Cell>) -> Self {
        Self {
            instructions: Rc::clone(&self.instructions),
            num_locals: self.num_locals,
            num_parameters: self.num_parameters,
            var_args: self.var_args,
            source_map: Rc::clone(&self.source_map),
            free,
        }
    }
}

// `free` peut contenir la fonction elle-même (récursion) : pas de Debug profond.
impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("instructions", &self.instructions.len())
            .field("num_locals", &self.num_locals)
            .field("num_parameters", &self.num_parameters)
            .field("var_args", &self.var_args)
            .field("free", &self.free.len())
            .finish()
    }
}

/* ─────────────────────────── Itérateurs ─────────────────────────── */

/// Curseur sur un tableau (instantané des éléments à l'initialisation).
#[derive(Debug, Clone)]
pub struct ArrayIterator {
    elements: Vec<Object>,
    next: usize,
}

/// Curseur sur les caractères d'une chaîne.
#[derive(Debug, Clone)]
pub struct StringIterator {
    chars: Vec<char>,
    next: usize,
}

/// Curseur sur une map (instantané des entrées à l'initialisation).
#[derive(Debug, Clone)]
pub struct MapIterator {
    entries: Vec<(String, Object)>,
    next: usize,
}

/* ─────────────────────────── Object ─────────────────────────── */

/// Valeur dynamique.
#[derive(Debug, Clone, Default)]
pub enum Object {
    /// Absence de valeur (instance canonique).
    #[default]
    Undefined,
    /// Entier signé 64 bits.
    Int(i64),
    /// Flottant 64 bits.
    Float(f64),
    /// Point de code Unicode.
    Char(char),
    /// Booléen.
    Bool(bool),
    /// Chaîne immuable.
    String(Rc<str>),
    /// Buffer mutable partagé.
    Bytes(Rc<RefCell<Vec<u8>>>),
    /// Tableau mutable partagé.
    Array(Rc<RefCell<Vec<Object>>>),
    /// Tableau immuable.
    ImmutableArray(Rc<Vec<Object>>),
    /// Map mutable partagée (clés chaînes).
    Map(Rc<RefCell<MapValue>>),
    /// Map immuable (aussi : modules builtin).
    ImmutableMap(Rc<MapValue>),
    /// Instant UTC.
    Time(DateTime<Utc>),
    /// Erreur portée par le script.
    Error(Rc<Object>),
    /// Fonction native.
    BuiltinFunction(Rc<BuiltinFunction>),
    /// Fonction compilée (ou fermeture).
    CompiledFunction(Rc<CompiledFunction>),
    /// Itérateur de tableau.
    ArrayIterator(Rc<RefCell<ArrayIterator>>),
    /// Itérateur de chaîne.
    StringIterator(Rc<RefCell<StringIterator>>),
    /// Itérateur de map.
    MapIterator(Rc<RefCell<MapIterator>>),
}

/// Instant « zéro » (1er janvier de l'an 1, UTC), falsy.
pub fn zero_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MIN_UTC, |naive| naive.and_utc())
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}
impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}
impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}
impl From<char> for Object {
    fn from(v: char) -> Self {
        Object::Char(v)
    }
}
impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::String(Rc::from(v))
    }
}
impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::String(Rc::from(v))
    }
}
impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::array(v)
    }
}

impl Object {
    /* ───── constructeurs ───── */

    /// Nouveau tableau mutable.
    pub fn array(elements: Vec<Object>) -> Self {
        Object::Array(Rc::new(RefCell::new(elements)))
    }

    /// Nouvelle map mutable.
    pub fn map(entries: MapValue) -> Self {
        Object::Map(Rc::new(RefCell::new(entries)))
    }

    /// Nouveau buffer.
    pub fn bytes(data: Vec<u8>) -> Self {
        Object::Bytes(Rc::new(RefCell::new(data)))
    }

    /// Enveloppe une valeur dans une erreur.
    pub fn error(value: Object) -> Self {
        Object::Error(Rc::new(value))
    }

    /// Fonction native.
    pub fn builtin(name: impl Into<Cow<'static, str>>, func: NativeFn) -> Self {
        Object::BuiltinFunction(Rc::new(BuiltinFunction::new(name, func)))
    }

    /// Module builtin : map immuable d'attributs marquée par son nom.
    pub fn module(name: &str, mut attrs: MapValue) -> Self {
        attrs.insert(MODULE_NAME_KEY.to_owned(), Object::from(name));
        Object::ImmutableMap(Rc::new(attrs))
    }

    /// Nom d'un module builtin.
    pub fn module_name(&self) -> Option<Rc<str>> {
        match self {
            Object::ImmutableMap(m) => match m.get(MODULE_NAME_KEY) {
                Some(Object::String(name)) => Some(Rc::clone(name)),
                _ => None,
            },
            _ => None,
        }
    }

    /* ───── contrat commun ───── */

    /// Nom du type tel que vu par le script.
    pub fn type_name(&self) -> Cow<'static, str> {
        Cow::Borrowed(match self {
            Object::Undefined => "undefined",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Char(_) => "char",
            Object::Bool(_) => "bool",
            Object::String(_) => "string",
            Object::Bytes(_) => "bytes",
            Object::Array(_) => "array",
            Object::ImmutableArray(_) => "immutable-array",
            Object::Map(_) => "map",
            Object::ImmutableMap(_) => "immutable-map",
            Object::Time(_) => "time",
            Object::Error(_) => "error",
            Object::BuiltinFunction(f) => return Cow::Owned(format!("builtin-function:{}", f.name)),
            Object::CompiledFunction(_) => "compiled-function",
            Object::ArrayIterator(_) => "array-iterator",
            Object::StringIterator(_) => "string-iterator",
            Object::MapIterator(_) => "map-iterator",
        })
    }

    /// Vérité au sens du script.
    pub fn is_falsy(&self) -> bool {
        match self {
            Object::Int(v) => *v == 0,
            Object::Float(v) => v.is_nan(),
            Object::Char(c) => *c == '\0',
            Object::Bool(b) => !b,
            Object::String(s) => s.is_empty(),
            Object::Bytes(b) => b.borrow().is_empty(),
            Object::Array(a) => a.borrow().is_empty(),
            Object::ImmutableArray(a) => a.is_empty(),
            Object::Map(m) => m.borrow().is_empty(),
            Object::ImmutableMap(m) => m.is_empty(),
            Object::Time(t) => *t == zero_time(),
            Object::BuiltinFunction(_) | Object::CompiledFunction(_) => false,
            Object::Undefined
            | Object::Error(_)
            | Object::ArrayIterator(_)
            | Object::StringIterator(_)
            | Object::MapIterator(_) => true,
        }
    }

    /// Vrai pour `undefined`.
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Object::Undefined)
    }

    /// Vrai pour les fonctions (natives ou compilées).
    pub const fn can_call(&self) -> bool {
        matches!(self, Object::BuiltinFunction(_) | Object::CompiledFunction(_))
    }

    /// Vrai si `iterate()` réussit.
    pub const fn can_iterate(&self) -> bool {
        matches!(
            self,
            Object::Array(_) | Object::ImmutableArray(_) | Object::Map(_) | Object::ImmutableMap(_) | Object::String(_)
        )
    }

    /// Valeur « brute » : chaîne sans guillemets, autres via `Display`.
    pub fn to_plain_string(&self) -> String {
        match self {
            Object::String(s) => s.to_string(),
            Object::Bytes(b) => String::from_utf8_lossy(&b.borrow()).into_owned(),
            other => other.to_string(),
        }
    }

    /// Comme `to_plain_string`, mais abandonne avec `StringLimit` dès que le
    /// rendu dépasse `max` octets (rien au-delà n'est alloué).
    pub fn to_plain_string_within(&self, max: usize) -> Result<String, RuntimeError> {
        let mut out = BoundedWriter { buf: String::new(), max, overflow: false };
        let written = match self {
            Object::String(s) => fmt::Write::write_str(&mut out, s),
            Object::Bytes(b) => {
                let b = b.borrow();
                if b.len() > max {
                    return Err(RuntimeError::StringLimit);
                }
                fmt::Write::write_str(&mut out, &String::from_utf8_lossy(&b))
            }
            other => fmt::write(&mut out, format_args!("{other}")),
        };
        if out.overflow {
            return Err(RuntimeError::StringLimit);
        }
        written.map_err(|e| RuntimeError::custom(e.to_string()))?;
        Ok(out.buf)
    }

    /// Copie profonde des conteneurs mutables. La copie d'un conteneur
    /// immuable est un conteneur mutable. Un conteneur atteint deux fois
    /// n'est copié qu'une fois : partages et cycles sont reproduits.
    #[must_use]
    pub fn copy(&self) -> Object {
        self.copy_in(&mut HashMap::new())
    }

    fn copy_in(&self, seen: &mut HashMap<Addr, Object>) -> Object {
        match self {
            Object::Bytes(b) => Object::bytes(b.borrow().clone()),
            Object::Array(a) => copy_seq(addr(a), &a.borrow(), seen),
            Object::ImmutableArray(a) => copy_seq(addr(a), a, seen),
            Object::Map(m) => copy_map(addr(m), &m.borrow(), seen),
            Object::ImmutableMap(m) => copy_map(addr(m), m, seen),
            Object::Error(e) => Object::error(e.copy_in(seen)),
            Object::ArrayIterator(it) => Object::ArrayIterator(Rc::new(RefCell::new(it.borrow().clone()))),
            Object::StringIterator(it) => Object::StringIterator(Rc::new(RefCell::new(it.borrow().clone()))),
            Object::MapIterator(it) => Object::MapIterator(Rc::new(RefCell::new(it.borrow().clone()))),
            other => other.clone(),
        }
    }

    /// Instantané immuable (tableaux et maps) ; identité sinon.
    #[must_use]
    pub fn to_immutable(&self) -> Object {
        match self {
            Object::Array(a) => Object::ImmutableArray(Rc::new(a.borrow().clone())),
            Object::Map(m) => Object::ImmutableMap(Rc::new(m.borrow().clone())),
            other => other.clone(),
        }
    }

    /* ───── indexation ───── */

    /// `self[index]`. Lecture hors bornes d'une séquence → `IndexOutOfBounds` ;
    /// clé absente d'une map → `undefined`.
    pub fn index_get(&self, index: &Object) -> Result<Object, RuntimeError> {
        match self {
            Object::Array(a) => seq_get(&a.borrow(), index),
            Object::ImmutableArray(a) => seq_get(a, index),
            Object::Map(m) => Ok(m.borrow().get(&map_key(index)?).cloned().unwrap_or_default()),
            Object::ImmutableMap(m) => Ok(m.get(&map_key(index)?).cloned().unwrap_or_default()),
            Object::String(s) => {
                let i = int_index(index)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(Object::Char)
                    .ok_or(RuntimeError::IndexOutOfBounds)
            }
            Object::Bytes(b) => {
                let i = int_index(index)?;
                let b = b.borrow();
                usize::try_from(i)
                    .ok()
                    .and_then(|i| b.get(i))
                    .map(|&v| Object::Int(v.into()))
                    .ok_or(RuntimeError::IndexOutOfBounds)
            }
            Object::Error(e) => match index {
                Object::String(s) if &**s == "value" => Ok((**e).clone()),
                _ => Err(RuntimeError::InvalidIndexOnError),
            },
            Object::Undefined => Ok(Object::Undefined),
            other => Err(RuntimeError::NotIndexable(other.type_name().into_owned())),
        }
    }

    /// `self[index] = value`. Écriture hors bornes → erreur.
    pub fn index_set(&self, index: &Object, value: Object) -> Result<(), RuntimeError> {
        match self {
            Object::Array(a) => {
                let i = int_index(index)?;
                let mut a = a.borrow_mut();
                let slot = usize::try_from(i).ok().and_then(|i| a.get_mut(i)).ok_or(RuntimeError::IndexOutOfBounds)?;
                *slot = value;
                Ok(())
            }
            Object::Map(m) => {
                let key = map_key(index)?;
                m.borrow_mut().insert(key, value);
                Ok(())
            }
            Object::Bytes(b) => {
                let i = int_index(index)?;
                let Object::Int(v) = value else {
                    return Err(RuntimeError::InvalidIndexValueType(value.type_name().into_owned()));
                };
                let mut b = b.borrow_mut();
                let slot = usize::try_from(i).ok().and_then(|i| b.get_mut(i)).ok_or(RuntimeError::IndexOutOfBounds)?;
                // troncature sur l'octet de poids faible
                *slot = v.to_le_bytes()[0];
                Ok(())
            }
            other => Err(RuntimeError::NotIndexAssignable(other.type_name().into_owned())),
        }
    }

    /// `self[low:high]` ; bornes absentes = début/fin, bornes bornées à la
    /// longueur. Le résultat ne partage rien avec la source.
    pub fn slice(&self, low: &Object, high: &Object) -> Result<Object, RuntimeError> {
        let len = match self {
            Object::Array(a) => a.borrow().len(),
            Object::ImmutableArray(a) => a.len(),
            Object::String(s) => s.chars().count(),
            Object::Bytes(b) => b.borrow().len(),
            other => return Err(RuntimeError::NotIndexable(other.type_name().into_owned())),
        };
        let bound = |o: &Object, default: usize| -> Result<usize, RuntimeError> {
            match o {
                Object::Undefined => Ok(default),
                Object::Int(v) => Ok(usize::try_from((*v).max(0)).unwrap_or(usize::MAX).min(len)),
                other => Err(RuntimeError::InvalidIndexType(other.type_name().into_owned())),
            }
        };
        let (lo, hi) = (bound(low, 0)?, bound(high, len)?);
        if lo > hi {
            return Err(RuntimeError::InvalidSliceIndex { low: lo as i64, high: hi as i64 });
        }
        Ok(match self {
            Object::Array(a) => Object::array(a.borrow()[lo..hi].to_vec()),
            Object::ImmutableArray(a) => Object::array(a[lo..hi].to_vec()),
            Object::String(s) => Object::from(s.chars().skip(lo).take(hi - lo).collect::<String>()),
            Object::Bytes(b) => Object::bytes(b.borrow()[lo..hi].to_vec()),
            _ => Object::Undefined,
        })
    }

    /* ───── itération ───── */

    /// Itérateur neuf positionné avant le premier élément.
    pub fn iterate(&self) -> Result<Object, RuntimeError> {
        Ok(match self {
            Object::Array(a) => array_iter(a.borrow().clone()),
            Object::ImmutableArray(a) => array_iter((**a).clone()),
            Object::Map(m) => map_iter(&m.borrow()),
            Object::ImmutableMap(m) => map_iter(m),
            Object::String(s) => {
                Object::StringIterator(Rc::new(RefCell::new(StringIterator { chars: s.chars().collect(), next: 0 })))
            }
            other => return Err(RuntimeError::NotIterable(other.type_name().into_owned())),
        })
    }

    /// Avance un itérateur ; `false` quand il est épuisé.
    pub fn iter_next(&self) -> Result<bool, RuntimeError> {
        Ok(match self {
            Object::ArrayIterator(it) => {
                let mut it = it.borrow_mut();
                it.next += 1;
                it.next <= it.elements.len()
            }
            Object::StringIterator(it) => {
                let mut it = it.borrow_mut();
                it.next += 1;
                it.next <= it.chars.len()
            }
            Object::MapIterator(it) => {
                let mut it = it.borrow_mut();
                it.next += 1;
                it.next <= it.entries.len()
            }
            other => return Err(RuntimeError::NotIterable(other.type_name().into_owned())),
        })
    }

    /// Clé courante (index pour tableaux et chaînes).
    pub fn iter_key(&self) -> Result<Object, RuntimeError> {
        Ok(match self {
            Object::ArrayIterator(it) => Object::Int(it.borrow().next as i64 - 1),
            Object::StringIterator(it) => Object::Int(it.borrow().next as i64 - 1),
            Object::MapIterator(it) => {
                let it = it.borrow();
                it.next.checked_sub(1).and_then(|i| it.entries.get(i)).map_or(Object::Undefined, |(k, _)| Object::from(k.as_str()))
            }
            other => return Err(RuntimeError::NotIterable(other.type_name().into_owned())),
        })
    }

    /// Valeur courante.
    pub fn iter_value(&self) -> Result<Object, RuntimeError> {
        Ok(match self {
            Object::ArrayIterator(it) => {
                let it = it.borrow();
                it.next.checked_sub(1).and_then(|i| it.elements.get(i)).cloned().unwrap_or_default()
            }
            Object::StringIterator(it) => {
                let it = it.borrow();
                it.next.checked_sub(1).and_then(|i| it.chars.get(i)).map_or(Object::Undefined, |&c| Object::Char(c))
            }
            Object::MapIterator(it) => {
                let it = it.borrow();
                it.next.checked_sub(1).and_then(|i| it.entries.get(i)).map_or(Object::Undefined, |(_, v)| v.clone())
            }
            other => return Err(RuntimeError::NotIterable(other.type_name().into_owned())),
        })
    }

    /* ───── conversions (builtins) ───── */

    /// Conversion en entier.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Object::Int(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Object::Float(v) => Some(*v as i64),
            Object::Char(c) => Some(i64::from(u32::from(*c))),
            Object::Bool(b) => Some(i64::from(*b)),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Conversion en flottant.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Object::Int(v) => Some(*v as f64),
            Object::Float(v) => Some(*v),
            Object::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Conversion en caractère.
    pub fn to_char(&self) -> Option<char> {
        match self {
            Object::Char(c) => Some(*c),
            Object::Int(v) => u32::try_from(*v).ok().and_then(char::from_u32),
            Object::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Conversion en instant (un entier = secondes Unix).
    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Object::Time(t) => Some(*t),
            Object::Int(v) => Utc.timestamp_opt(*v, 0).single(),
            _ => None,
        }
    }
}

/// Tampon d'écriture qui refuse de dépasser `max` octets.
struct BoundedWriter {
    buf: String,
    max: usize,
    overflow: bool,
}

impl fmt::Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() > self.max {
            self.overflow = true;
            return Err(fmt::Error);
        }
        self.buf.push_str(s);
        Ok(())
    }
}

fn copy_seq(at: Addr, items: &[Object], seen: &mut HashMap<Addr, Object>) -> Object {
    if let Some(done) = seen.get(&at) {
        return done.clone();
    }
    let fresh = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
    seen.insert(at, Object::Array(Rc::clone(&fresh)));
    let copied: Vec<Object> = items.iter().map(|item| item.copy_in(seen)).collect();
    *fresh.borrow_mut() = copied;
    Object::Array(fresh)
}

fn copy_map(at: Addr, m: &MapValue, seen: &mut HashMap<Addr, Object>) -> Object {
    if let Some(done) = seen.get(&at) {
        return done.clone();
    }
    let fresh = Rc::new(RefCell::new(MapValue::with_capacity(m.len())));
    seen.insert(at, Object::Map(Rc::clone(&fresh)));
    let copied: MapValue = m.iter().map(|(k, v)| (k.clone(), v.copy_in(seen))).collect();
    *fresh.borrow_mut() = copied;
    Object::Map(fresh)
}

fn array_iter(elements: Vec<Object>) -> Object {
    Object::ArrayIterator(Rc::new(RefCell::new(ArrayIterator { elements, next: 0 })))
}

fn map_iter(m: &MapValue) -> Object {
    let entries = m.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Object::MapIterator(Rc::new(RefCell::new(MapIterator { entries, next: 0 })))
}

fn int_index(index: &Object) -> Result<i64, RuntimeError> {
    match index {
        Object::Int(i) => Ok(*i),
        other => Err(RuntimeError::InvalidIndexType(other.type_name().into_owned())),
    }
}

fn seq_get(items: &[Object], index: &Object) -> Result<Object, RuntimeError> {
    let i = int_index(index)?;
    usize::try_from(i).ok().and_then(|i| items.get(i)).cloned().ok_or(RuntimeError::IndexOutOfBounds)
}

/// Clé de map : les chaînes telles quelles, le reste via son affichage brut.
fn map_key(index: &Object) -> Result<String, RuntimeError> {
    match index {
        Object::Undefined => Err(RuntimeError::InvalidIndexType("undefined".to_owned())),
        other => Ok(other.to_plain_string()),
    }
}

/* ─────────────────────────── Égalité ─────────────────────────── */

/// Identité d'un conteneur, pour repérer les cycles.
type Addr = *const ();

fn addr<T: ?Sized>(rc: &Rc<T>) -> Addr {
    Rc::as_ptr(rc).cast::<()>()
}

/// Égalité du script (`==`) : structurelle pour les valeurs et conteneurs,
/// identité pour les fonctions compilées et les itérateurs. Une paire de
/// conteneurs déjà en cours de comparaison est supposée égale, ce qui
/// termine sur les structures cycliques.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        equals_in(self, other, &mut Vec::new())
    }
}

fn equals_in(lhs: &Object, rhs: &Object, path: &mut Vec<(Addr, Addr)>) -> bool {
    use Object as O;
    match (lhs, rhs) {
        (O::Undefined, O::Undefined) => true,
        (O::Int(a), O::Int(b)) => a == b,
        (O::Float(a), O::Float(b)) => a == b,
        (O::Char(a), O::Char(b)) => a == b,
        (O::Bool(a), O::Bool(b)) => a == b,
        (O::String(a), O::String(b)) => a == b,
        (O::Bytes(a), O::Bytes(b)) => *a.borrow() == *b.borrow(),
        (O::Array(a), O::Array(b)) => Rc::ptr_eq(a, b) || seq_eq((addr(a), addr(b)), &a.borrow(), &b.borrow(), path),
        (O::Array(a), O::ImmutableArray(b)) | (O::ImmutableArray(b), O::Array(a)) => {
            seq_eq((addr(a), addr(b)), &a.borrow(), b, path)
        }
        (O::ImmutableArray(a), O::ImmutableArray(b)) => Rc::ptr_eq(a, b) || seq_eq((addr(a), addr(b)), a, b, path),
        (O::Map(a), O::Map(b)) => Rc::ptr_eq(a, b) || map_eq((addr(a), addr(b)), &a.borrow(), &b.borrow(), path),
        (O::Map(a), O::ImmutableMap(b)) | (O::ImmutableMap(b), O::Map(a)) => {
            map_eq((addr(a), addr(b)), &a.borrow(), b, path)
        }
        (O::ImmutableMap(a), O::ImmutableMap(b)) => Rc::ptr_eq(a, b) || map_eq((addr(a), addr(b)), a, b, path),
        (O::Time(a), O::Time(b)) => a == b,
        (O::Error(a), O::Error(b)) => equals_in(a, b, path),
        (O::BuiltinFunction(a), O::BuiltinFunction(b)) => a.name == b.name,
        (O::CompiledFunction(a), O::CompiledFunction(b)) => Rc::ptr_eq(a, b),
        (O::ArrayIterator(a), O::ArrayIterator(b)) => Rc::ptr_eq(a, b),
        (O::StringIterator(a), O::StringIterator(b)) => Rc::ptr_eq(a, b),
        (O::MapIterator(a), O::MapIterator(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn seq_eq(pair: (Addr, Addr), a: &[Object], b: &[Object], path: &mut Vec<(Addr, Addr)>) -> bool {
    if path.contains(&pair) {
        return true;
    }
    if a.len() != b.len() {
        return false;
    }
    path.push(pair);
    let same = a.iter().zip(b).all(|(x, y)| equals_in(x, y, path));
    path.pop();
    same
}

fn map_eq(pair: (Addr, Addr), a: &MapValue, b: &MapValue, path: &mut Vec<(Addr, Addr)>) -> bool {
    if path.contains(&pair) {
        return true;
    }
    if a.len() != b.len() {
        return false;
    }
    path.push(pair);
    let same = a.iter().all(|(k, x)| b.get(k).is_some_and(|y| equals_in(x, y, path)));
    path.pop();
    same
}

/* ─────────────────────────── Affichage ─────────────────────────── */

/// Représentation du script : chaînes entre guillemets, conteneurs
/// `[a, b]` / `{k: v}`. Un conteneur qui se contient s'affiche `[...]` ou
/// `{...}` au point de récursion.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_in(self, f, &mut Vec::new())
    }
}

fn display_in(o: &Object, f: &mut fmt::Formatter<'_>, path: &mut Vec<Addr>) -> fmt::Result {
    match o {
        Object::Undefined => f.write_str("<undefined>"),
        Object::Int(v) => write!(f, "{v}"),
        Object::Float(v) => fmt_float(f, *v),
        Object::Char(c) => write!(f, "{c}"),
        Object::Bool(b) => write!(f, "{b}"),
        Object::String(s) => write!(f, "{:?}", &**s),
        Object::Bytes(b) => f.write_str(&String::from_utf8_lossy(&b.borrow())),
        Object::Array(a) => fmt_seq(f, addr(a), &a.borrow(), path),
        Object::ImmutableArray(a) => fmt_seq(f, addr(a), a, path),
        Object::Map(m) => fmt_map(f, addr(m), &m.borrow(), path),
        Object::ImmutableMap(m) => fmt_map(f, addr(m), m, path),
        Object::Time(t) => write!(f, "{t}"),
        Object::Error(e) => {
            f.write_str("error: ")?;
            display_in(e, f, path)
        }
        Object::BuiltinFunction(_) => f.write_str("<builtin-function>"),
        Object::CompiledFunction(_) => f.write_str("<compiled-function>"),
        Object::ArrayIterator(_) => f.write_str("<array-iterator>"),
        Object::StringIterator(_) => f.write_str("<string-iterator>"),
        Object::MapIterator(_) => f.write_str("<map-iterator>"),
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_infinite() {
        return f.write_str(if v > 0.0 { "+Inf" } else { "-Inf" });
    }
    write!(f, "{v}")
}

fn fmt_seq(f: &mut fmt::Formatter<'_>, at: Addr, items: &[Object], path: &mut Vec<Addr>) -> fmt::Result {
    if path.contains(&at) {
        return f.write_str("[...]");
    }
    path.push(at);
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        display_in(item, f, path)?;
    }
    path.pop();
    f.write_str("]")
}

fn fmt_map(f: &mut fmt::Formatter<'_>, at: Addr, m: &MapValue, path: &mut Vec<Addr>) -> fmt::Result {
    if path.contains(&at) {
        return f.write_str("{...}");
    }
    path.push(at);
    f.write_str("{")?;
    for (i, (k, v)) in m.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{k}: ")?;
        display_in(v, f, path)?;
    }
    path.pop();
    f.write_str("}")
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn arr(items: &[i64]) -> Object {
        Object::array(items.iter().copied().map(Object::Int).collect())
    }

    #[test]
    fn falsy_table() {
        assert!(Object::Int(0).is_falsy());
        assert!(!Object::Int(-1).is_falsy());
        assert!(Object::Float(f64::NAN).is_falsy());
        assert!(!Object::Float(0.0).is_falsy());
        assert!(Object::from("").is_falsy());
        assert!(Object::array(vec![]).is_falsy());
        assert!(Object::error(Object::Int(1)).is_falsy());
        assert!(Object::Time(zero_time()).is_falsy());
        assert!(!Object::Time(Utc::now()).is_falsy());
        assert!(arr(&[1]).iterate().unwrap().is_falsy());
    }

    #[test]
    fn mutable_containers_alias() {
        let a = arr(&[1, 2]);
        let alias = a.clone();
        alias.index_set(&Object::Int(0), Object::Int(9)).unwrap();
        assert_eq!(a.index_get(&Object::Int(0)).unwrap(), Object::Int(9));

        let copy = a.copy();
        copy.index_set(&Object::Int(1), Object::Int(7)).unwrap();
        assert_eq!(a.index_get(&Object::Int(1)).unwrap(), Object::Int(2));
    }

    #[test]
    fn empty_and_distinct_arrays_compare_by_content() {
        let a = Object::array(vec![]);
        let b = Object::array(vec![]);
        assert_eq!(a, b);
        if let (Object::Array(x), Object::Array(y)) = (&a, &b) {
            assert!(!Rc::ptr_eq(x, y));
        }
    }

    #[test]
    fn out_of_range_sequence_access_fails() {
        let a = arr(&[1]);
        assert_eq!(a.index_get(&Object::Int(5)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(a.index_get(&Object::Int(-1)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(a.to_immutable().index_get(&Object::Int(1)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(Object::from("ab").index_get(&Object::Int(2)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(Object::bytes(vec![7]).index_get(&Object::Int(1)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(a.index_set(&Object::Int(1), Object::Int(0)), Err(RuntimeError::IndexOutOfBounds));
        assert_eq!(
            a.index_get(&Object::from("x")),
            Err(RuntimeError::InvalidIndexType("string".into()))
        );
    }

    #[test]
    fn missing_map_key_reads_undefined() {
        let m = Object::map(MapValue::new());
        assert_eq!(m.index_get(&Object::from("nope")), Ok(Object::Undefined));
        assert_eq!(m.to_immutable().index_get(&Object::from("nope")), Ok(Object::Undefined));
    }

    #[test]
    fn cyclic_arrays_compare_print_and_copy() {
        let a = arr(&[0]);
        a.index_set(&Object::Int(0), a.clone()).unwrap();
        assert_eq!(a.to_string(), "[[...]]");
        assert_eq!(a, a.clone());

        let b = arr(&[0]);
        b.index_set(&Object::Int(0), b.clone()).unwrap();
        assert_eq!(a, b);

        let copy = a.copy();
        let Object::Array(inner) = copy.index_get(&Object::Int(0)).unwrap() else { panic!("not an array") };
        let Object::Array(outer) = &copy else { panic!("not an array") };
        assert!(Rc::ptr_eq(&inner, outer));
        let Object::Array(orig) = &a else { unreachable!() };
        assert!(!Rc::ptr_eq(outer, orig));

        let mut m = MapValue::new();
        m.insert("k".into(), Object::Int(1));
        let map = Object::map(m);
        map.index_set(&Object::from("me"), map.clone()).unwrap();
        assert_eq!(map.to_string(), "{k: 1, me: {...}}");
        assert_eq!(map.copy(), map);
    }

    #[test]
    fn immutable_rejects_writes() {
        let frozen = arr(&[1]).to_immutable();
        assert_eq!(
            frozen.index_set(&Object::Int(0), Object::Int(2)),
            Err(RuntimeError::NotIndexAssignable("immutable-array".into()))
        );
    }

    #[test]
    fn string_index_and_slice_use_chars() {
        let s = Object::from("héllo");
        assert_eq!(s.index_get(&Object::Int(1)).unwrap(), Object::Char('é'));
        assert_eq!(s.slice(&Object::Int(1), &Object::Int(3)).unwrap(), Object::from("él"));
        assert_eq!(s.slice(&Object::Undefined, &Object::Int(99)).unwrap(), s);
        assert!(s.slice(&Object::Int(3), &Object::Int(1)).is_err());
    }

    #[test]
    fn error_exposes_value() {
        let e = Object::error(Object::from("boom"));
        assert_eq!(e.index_get(&Object::from("value")).unwrap(), Object::from("boom"));
        assert_eq!(e.index_get(&Object::from("other")), Err(RuntimeError::InvalidIndexOnError));
        assert_eq!(e.to_string(), "error: \"boom\"");
    }

    #[test]
    fn map_iteration_yields_entries() {
        let mut m = MapValue::new();
        m.insert("a".into(), Object::Int(1));
        m.insert("b".into(), Object::Int(2));
        let it = Object::map(m).iterate().unwrap();
        let mut seen = vec![];
        while it.iter_next().unwrap() {
            seen.push((it.iter_key().unwrap(), it.iter_value().unwrap()));
        }
        assert_eq!(seen, vec![(Object::from("a"), Object::Int(1)), (Object::from("b"), Object::Int(2))]);
    }

    #[test]
    fn display_quotes_nested_strings() {
        let a = Object::array(vec![Object::from("x"), Object::Int(1), Object::Char('c')]);
        assert_eq!(a.to_string(), "[\"x\", 1, c]");
        assert_eq!(Object::from("x").to_plain_string(), "x");
        assert_eq!(Object::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn source_pos_falls_back_to_previous_entry() {
        let mut map = BTreeMap::new();
        map.insert(0, Pos(3));
        map.insert(5, Pos(9));
        let f = CompiledFunction { source_map: Rc::new(map), ..CompiledFunction::default() };
        assert_eq!(f.source_pos(4), Pos(3));
        assert_eq!(f.source_pos(7), Pos(9));
    }
}
