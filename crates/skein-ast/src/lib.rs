// src/lib.rs
//! skein AST (Abstract Syntax Tree)
//!
//! Structures produites par le parser externe et consommées par
//! `skein-compiler`. Le compilateur ne dépend jamais de la syntaxe concrète :
//! il ne voit que ces nœuds et leurs positions (`skein_core::Pos`, offsets
//! globaux dans le `SourceFileSet` du programme).
//!
//! Chaque nœud porte la position de son premier token ; c'est elle qui
//! alimente la table de positions du bytecode et les diagnostics.
//!
//! Le module [`build`] fournit des constructeurs courts pour écrire des
//! programmes à la main (tests, benchs, hôtes sans parser).
//!
//! # Features
//! - `serde` : sérialisation/désérialisation de l'AST
//!
//! # Exemple
//! ```rust
//! use skein_ast::build::*;
//!
//! let file = file("main", vec![define("a", int(1)), expr_stmt(call(ident("len"), vec![str("ab")]))]);
//! assert_eq!(file.stmts.len(), 2);
//! ```

#![deny(missing_docs)]

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use skein_core::{Pos, NO_POS};

pub mod build;

/* ─────────────────────────── Fichier / blocs ─────────────────────────── */

/// Un fichier source parsé (programme principal ou module).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct File {
    /// Nom du fichier (tel qu'enregistré dans le `SourceFileSet`).
    pub name: String,
    /// Instructions top-level.
    pub stmts: Vec<Stmt>,
}

/// Un bloc `{ ... }`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Instructions du bloc.
    pub stmts: Vec<Stmt>,
    /// Position de `{`.
    pub pos: Pos,
}

/// Identifiant (nom + position).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ident {
    /// Nom.
    pub name: String,
    /// Position.
    pub pos: Pos,
}

impl Ident {
    /// Identifiant sans position.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), pos: NO_POS }
    }
}

/* ─────────────────────────── Instructions ─────────────────────────── */

/// Instruction positionnée.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stmt {
    /// Nature de l'instruction.
    pub kind: StmtKind,
    /// Position du premier token.
    pub pos: Pos,
}

/// Nature d'une instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StmtKind {
    /// Expression évaluée pour ses effets.
    Expr(Expr),
    /// `lhs op rhs` (`:=`, `=`, `+=`…). Le parser peut produire plusieurs
    /// opérandes ; le compilateur refuse les tuples.
    Assign {
        /// Cibles.
        lhs: Vec<Expr>,
        /// Valeurs.
        rhs: Vec<Expr>,
        /// Opérateur d'affectation.
        op: AssignOp,
    },
    /// `x++` / `x--`.
    IncDec {
        /// Cible.
        expr: Expr,
        /// `true` pour `++`.
        inc: bool,
    },
    /// Bloc imbriqué.
    Block(Block),
    /// `if [init;] cond { } [else ...]`.
    If {
        /// Instruction d'initialisation (portée du `if`).
        init: Option<Box<Stmt>>,
        /// Condition.
        cond: Expr,
        /// Branche vraie.
        body: Block,
        /// Branche `else` : un `Block` ou un autre `If`.
        else_stmt: Option<Box<Stmt>>,
    },
    /// `for [init]; [cond]; [post] { }` (toutes parties optionnelles).
    For {
        /// Initialisation.
        init: Option<Box<Stmt>>,
        /// Condition (absente = boucle infinie).
        cond: Option<Expr>,
        /// Post-instruction.
        post: Option<Box<Stmt>>,
        /// Corps.
        body: Block,
    },
    /// `for key, value in iterable { }`. `_` ignore la variable.
    ForIn {
        /// Clé (ou valeur si `value` est absente).
        key: Ident,
        /// Valeur.
        value: Option<Ident>,
        /// Expression itérée.
        iterable: Expr,
        /// Corps.
        body: Block,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `return [expr]`.
    Return(Option<Expr>),
    /// `export expr` (modules uniquement).
    Export(Expr),
    /// `;` isolé.
    Empty,
    /// Instruction que le parser n'a pas pu construire.
    Bad(String),
}

/// Opérateurs d'affectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignOp {
    /// `:=`
    Define,
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Quo,
    /// `%=`
    Rem,
    /// `&=`
    And,
    /// `|=`
    Or,
    /// `^=`
    Xor,
    /// `<<=`
    Shl,
    /// `>>=`
    Shr,
    /// `&^=`
    AndNot,
}

impl AssignOp {
    /// Opérateur binaire sous-jacent d'une affectation composée.
    pub const fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Define | AssignOp::Assign => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Quo => BinaryOp::Quo,
            AssignOp::Rem => BinaryOp::Rem,
            AssignOp::And => BinaryOp::And,
            AssignOp::Or => BinaryOp::Or,
            AssignOp::Xor => BinaryOp::Xor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
            AssignOp::AndNot => BinaryOp::AndNot,
        })
    }
}

/* ─────────────────────────── Expressions ─────────────────────────── */

/// Expression positionnée.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expr {
    /// Nature de l'expression.
    pub kind: ExprKind,
    /// Position du premier token.
    pub pos: Pos,
}

/// Nature d'une expression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprKind {
    /// Référence à un nom.
    Ident(String),
    /// Littéral entier.
    Int(i64),
    /// Littéral flottant.
    Float(f64),
    /// Littéral caractère.
    Char(char),
    /// Littéral chaîne.
    Str(String),
    /// `true` / `false`.
    Bool(bool),
    /// `undefined`.
    Undefined,
    /// `[a, b, ...]`.
    Array(Vec<Expr>),
    /// `{k: v, ...}` ; les clés sont des chaînes.
    Map(Vec<MapElement>),
    /// `lhs op rhs` (y compris `&&`, `||`, `==`).
    Binary {
        /// Gauche.
        lhs: Box<Expr>,
        /// Opérateur.
        op: BinaryOp,
        /// Droite.
        rhs: Box<Expr>,
    },
    /// `op expr`.
    Unary {
        /// Opérateur.
        op: UnaryOp,
        /// Opérande.
        expr: Box<Expr>,
    },
    /// `func(args...)`, `func(args, rest...)` si `spread`.
    Call {
        /// Appelé.
        func: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
        /// Le dernier argument est étalé (`...`).
        spread: bool,
    },
    /// `expr[index]`.
    Index {
        /// Conteneur.
        expr: Box<Expr>,
        /// Index.
        index: Box<Expr>,
    },
    /// `expr.sel` (sucre pour `expr["sel"]`).
    Selector {
        /// Conteneur.
        expr: Box<Expr>,
        /// Nom sélectionné.
        sel: String,
    },
    /// `expr[low:high]`.
    Slice {
        /// Conteneur.
        expr: Box<Expr>,
        /// Borne basse.
        low: Option<Box<Expr>>,
        /// Borne haute.
        high: Option<Box<Expr>>,
    },
    /// `cond ? a : b`.
    Cond {
        /// Condition.
        cond: Box<Expr>,
        /// Valeur si vrai.
        then_expr: Box<Expr>,
        /// Valeur si faux.
        else_expr: Box<Expr>,
    },
    /// Littéral de fonction.
    Func(FuncLit),
    /// `error(expr)`.
    Error(Box<Expr>),
    /// `immutable(expr)`.
    Immutable(Box<Expr>),
    /// `import("name")`.
    Import(String),
    /// `(expr)`.
    Paren(Box<Expr>),
    /// Expression que le parser n'a pas pu construire.
    Bad(String),
}

/// Élément d'un littéral de map.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapElement {
    /// Clé.
    pub key: String,
    /// Position de la clé.
    pub key_pos: Pos,
    /// Valeur.
    pub value: Expr,
}

/// Littéral de fonction `func(a, b, ...rest) { }`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FuncLit {
    /// Paramètres.
    pub params: Vec<Ident>,
    /// Le dernier paramètre collecte les arguments surnuméraires.
    pub var_args: bool,
    /// Corps.
    pub body: Block,
}

/// Opérateurs binaires (tokens).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Quo,
    /// `%`
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `&^`
    AndNot,
    /// `&&`
    LAnd,
    /// `||`
    LOr,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessEq,
    /// `>=`
    GreaterEq,
}

impl BinaryOp {
    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Quo => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::AndNot => "&^",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEq => "<=",
            BinaryOp::GreaterEq => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Opérateurs unaires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `^x` (complément bit à bit)
    BitNot,
    /// `+x` (identité)
    Plus,
}

/* ─────────────────────────── Positions ─────────────────────────── */

impl Expr {
    /// Nouvelle expression sans position.
    pub const fn new(kind: ExprKind) -> Self {
        Self { kind, pos: NO_POS }
    }

    /// Remplace la position (chaînable).
    #[must_use]
    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }
}

impl Stmt {
    /// Nouvelle instruction sans position.
    pub const fn new(kind: StmtKind) -> Self {
        Self { kind, pos: NO_POS }
    }

    /// Remplace la position (chaînable).
    #[must_use]
    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    /// Vrai si l'instruction termine inconditionnellement le flot du bloc
    /// courant (`return`, `break`, `continue`).
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
