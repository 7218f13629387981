//! Constructeurs courts (positions à `NO_POS`, à fixer avec `.at(pos)`).

use crate::{AssignOp, BinaryOp, Block, Expr, ExprKind, File, FuncLit, Ident, MapElement, Stmt, StmtKind, UnaryOp, NO_POS};

/// Fichier.
pub fn file(name: &str, stmts: Vec<Stmt>) -> File {
    File { name: name.to_owned(), stmts }
}

/// Bloc.
pub fn block(stmts: Vec<Stmt>) -> Block {
    Block { stmts, pos: NO_POS }
}

/* ───── expressions ───── */

/// Identifiant.
pub fn ident(name: &str) -> Expr {
    Expr::new(ExprKind::Ident(name.to_owned()))
}

/// Entier.
pub fn int(v: i64) -> Expr {
    Expr::new(ExprKind::Int(v))
}

/// Flottant.
pub fn float(v: f64) -> Expr {
    Expr::new(ExprKind::Float(v))
}

/// Caractère.
pub fn chr(c: char) -> Expr {
    Expr::new(ExprKind::Char(c))
}

/// Chaîne.
pub fn str(s: &str) -> Expr {
    Expr::new(ExprKind::Str(s.to_owned()))
}

/// Booléen.
pub fn boolean(b: bool) -> Expr {
    Expr::new(ExprKind::Bool(b))
}

/// `undefined`.
pub fn undefined() -> Expr {
    Expr::new(ExprKind::Undefined)
}

/// `[...]`.
pub fn array(elements: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Array(elements))
}

/// `{k: v, ...}`.
pub fn map(elements: Vec<(&str, Expr)>) -> Expr {
    let elements = elements
        .into_iter()
        .map(|(key, value)| MapElement { key: key.to_owned(), key_pos: NO_POS, value })
        .collect();
    Expr::new(ExprKind::Map(elements))
}

/// `lhs op rhs`.
pub fn bin(lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
    let pos = lhs.pos;
    Expr::new(ExprKind::Binary { lhs: Box::new(lhs), op, rhs: Box::new(rhs) }).at(pos)
}

/// `op expr`.
pub fn unary(op: UnaryOp, expr: Expr) -> Expr {
    Expr::new(ExprKind::Unary { op, expr: Box::new(expr) })
}

/// `func(args...)`.
pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    let pos = func.pos;
    Expr::new(ExprKind::Call { func: Box::new(func), args, spread: false }).at(pos)
}

/// `func(args, last...)`.
pub fn call_spread(func: Expr, args: Vec<Expr>) -> Expr {
    let pos = func.pos;
    Expr::new(ExprKind::Call { func: Box::new(func), args, spread: true }).at(pos)
}

/// `expr[index]`.
pub fn index(expr: Expr, index: Expr) -> Expr {
    let pos = expr.pos;
    Expr::new(ExprKind::Index { expr: Box::new(expr), index: Box::new(index) }).at(pos)
}

/// `expr.sel`.
pub fn sel(expr: Expr, sel: &str) -> Expr {
    let pos = expr.pos;
    Expr::new(ExprKind::Selector { expr: Box::new(expr), sel: sel.to_owned() }).at(pos)
}

/// `expr[low:high]`.
pub fn slice(expr: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
    let pos = expr.pos;
    Expr::new(ExprKind::Slice { expr: Box::new(expr), low: low.map(Box::new), high: high.map(Box::new) }).at(pos)
}

/// `cond ? a : b`.
pub fn cond(cond: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
    let pos = cond.pos;
    Expr::new(ExprKind::Cond {
        cond: Box::new(cond),
        then_expr: Box::new(then_expr),
        else_expr: Box::new(else_expr),
    })
    .at(pos)
}

/// `func(params) { body }`.
pub fn func(params: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::new(ExprKind::Func(FuncLit {
        params: params.iter().map(|p| Ident::new(*p)).collect(),
        var_args: false,
        body: block(body),
    }))
}

/// `func(params, ...last) { body }`.
pub fn func_var_args(params: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::new(ExprKind::Func(FuncLit {
        params: params.iter().map(|p| Ident::new(*p)).collect(),
        var_args: true,
        body: block(body),
    }))
}

/// `error(expr)`.
pub fn error(expr: Expr) -> Expr {
    Expr::new(ExprKind::Error(Box::new(expr)))
}

/// `immutable(expr)`.
pub fn immutable(expr: Expr) -> Expr {
    Expr::new(ExprKind::Immutable(Box::new(expr)))
}

/// `import("name")`.
pub fn import(name: &str) -> Expr {
    Expr::new(ExprKind::Import(name.to_owned()))
}

/// `(expr)`.
pub fn paren(expr: Expr) -> Expr {
    let pos = expr.pos;
    Expr::new(ExprKind::Paren(Box::new(expr))).at(pos)
}

/* ───── instructions ───── */

/// Instruction-expression.
pub fn expr_stmt(expr: Expr) -> Stmt {
    let pos = expr.pos;
    Stmt::new(StmtKind::Expr(expr)).at(pos)
}

/// `name := value`.
pub fn define(name: &str, value: Expr) -> Stmt {
    assign_op(ident(name), AssignOp::Define, value)
}

/// `name = value`.
pub fn assign(name: &str, value: Expr) -> Stmt {
    assign_op(ident(name), AssignOp::Assign, value)
}

/// `lhs op value` pour une cible quelconque.
pub fn assign_op(lhs: Expr, op: AssignOp, value: Expr) -> Stmt {
    let pos = lhs.pos;
    Stmt::new(StmtKind::Assign { lhs: vec![lhs], rhs: vec![value], op }).at(pos)
}

/// `expr++`.
pub fn inc(expr: Expr) -> Stmt {
    let pos = expr.pos;
    Stmt::new(StmtKind::IncDec { expr, inc: true }).at(pos)
}

/// `expr--`.
pub fn dec(expr: Expr) -> Stmt {
    let pos = expr.pos;
    Stmt::new(StmtKind::IncDec { expr, inc: false }).at(pos)
}

/// `{ ... }` en position d'instruction.
pub fn block_stmt(stmts: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::Block(block(stmts)))
}

/// `if cond { body }`.
pub fn if_(cond: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::If { init: None, cond, body: block(body), else_stmt: None })
}

/// `if cond { body } else { other }`.
pub fn if_else(cond: Expr, body: Vec<Stmt>, other: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::If {
        init: None,
        cond,
        body: block(body),
        else_stmt: Some(Box::new(block_stmt(other))),
    })
}

/// `for init; cond; post { body }`.
pub fn for_(init: Option<Stmt>, cond: Option<Expr>, post: Option<Stmt>, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::For {
        init: init.map(Box::new),
        cond,
        post: post.map(Box::new),
        body: block(body),
    })
}

/// `for key, value in iterable { body }`.
pub fn for_in(key: &str, value: Option<&str>, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::ForIn {
        key: Ident::new(key),
        value: value.map(Ident::new),
        iterable,
        body: block(body),
    })
}

/// `break`.
pub fn brk() -> Stmt {
    Stmt::new(StmtKind::Break)
}

/// `continue`.
pub fn cont() -> Stmt {
    Stmt::new(StmtKind::Continue)
}

/// `return [expr]`.
pub fn ret(expr: Option<Expr>) -> Stmt {
    Stmt::new(StmtKind::Return(expr))
}

/// `export expr`.
pub fn export(expr: Expr) -> Stmt {
    Stmt::new(StmtKind::Export(expr))
}
