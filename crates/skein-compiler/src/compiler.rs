//! Émission de bytecode depuis l'AST.
//!
//! Une passe unique : chaque fonction (programme principal, module source,
//! littéral `func`) a son propre tampon d'instructions et sa table
//! offset → position. Les sauts sont émis avec une cible provisoire puis
//! corrigés (`change_operand`) quand la cible est connue.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::rc::Rc;

use skein_ast::{AssignOp, BinaryOp, Block, Expr, ExprKind, File, FuncLit, Ident, Stmt, StmtKind, UnaryOp};
use skein_bytecode::Bytecode;
use skein_core::{format_instructions, make_instruction, Opcode, Operator, Pos, SourceFileSet, NO_POS};
use skein_runtime::{CompiledFunction, Object};
use tracing::{debug, trace, warn};

use crate::modules::Module;
use crate::symbols::{ScopeId, Symbol, SymbolId, SymbolScope, SymbolTable};
use crate::{CompileError, CompilerOptions, Diagnostic};

// ─────────────────────────────────────────────────────────────────────────────
/* Portées de compilation */
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FuncKind {
    #[default]
    Main,
    Module,
    Function,
}

/// Sauts en attente d'une boucle.
#[derive(Debug, Default)]
struct Loop {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Tampon d'une fonction en cours de compilation.
#[derive(Debug, Default)]
struct CompilationScope {
    kind: FuncKind,
    instructions: Vec<u8>,
    source_map: BTreeMap<usize, Pos>,
    loops: Vec<Loop>,
}

/// Maillon d'une cible d'affectation `a.b[c]`.
enum Selector<'e> {
    Key(&'e str, Pos),
    Index(&'e Expr),
}

fn operand(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

const fn operator_for(op: BinaryOp) -> Option<Operator> {
    Some(match op {
        BinaryOp::Add => Operator::Add,
        BinaryOp::Sub => Operator::Sub,
        BinaryOp::Mul => Operator::Mul,
        BinaryOp::Quo => Operator::Quo,
        BinaryOp::Rem => Operator::Rem,
        BinaryOp::And => Operator::And,
        BinaryOp::Or => Operator::Or,
        BinaryOp::Xor => Operator::Xor,
        BinaryOp::Shl => Operator::Shl,
        BinaryOp::Shr => Operator::Shr,
        BinaryOp::AndNot => Operator::AndNot,
        BinaryOp::Less => Operator::Less,
        BinaryOp::Greater => Operator::Greater,
        BinaryOp::LessEq => Operator::LessEq,
        BinaryOp::GreaterEq => Operator::GreaterEq,
        BinaryOp::LAnd | BinaryOp::LOr | BinaryOp::Equal | BinaryOp::NotEqual => return None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compilateur */
// ─────────────────────────────────────────────────────────────────────────────

/// Compilateur d'un fichier (et des modules qu'il importe).
pub struct Compiler<'a> {
    file_set: SourceFileSet,
    symbols: &'a mut SymbolTable,
    scope: ScopeId,
    options: CompilerOptions,
    constants: Vec<Object>,
    current: CompilationScope,
    enclosing: Vec<CompilationScope>,
    compiled_modules: HashMap<String, Rc<CompiledFunction>>,
    import_stack: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    overflow: usize,
}

impl<'a> Compiler<'a> {
    /// Prépare une compilation. Les globales déjà définies dans `symbols`
    /// (variables de l'hôte) restent visibles et gardent leurs slots.
    pub fn new(file_set: SourceFileSet, symbols: &'a mut SymbolTable, options: CompilerOptions) -> Self {
        Self {
            file_set,
            symbols,
            scope: SymbolTable::ROOT,
            options,
            constants: Vec::new(),
            current: CompilationScope::default(),
            enclosing: Vec::new(),
            compiled_modules: HashMap::new(),
            import_stack: Vec::new(),
            diagnostics: Vec::new(),
            overflow: 0,
        }
    }

    /// Compile `file` en programme principal (terminé par `SUSPEND`).
    pub fn compile(mut self, file: &File) -> Result<Bytecode, CompileError> {
        self.compile_top_level(&file.stmts);
        self.emit(NO_POS, Opcode::Suspend, &[]);

        if !self.diagnostics.is_empty() {
            warn!(errors = self.diagnostics.len() + self.overflow, file = %file.name, "compilation failed");
            return Err(CompileError { diagnostics: self.diagnostics, overflow: self.overflow });
        }

        let main = mem::take(&mut self.current);
        let main = CompiledFunction {
            instructions: Rc::from(main.instructions),
            source_map: Rc::new(main.source_map),
            ..CompiledFunction::default()
        };
        self.trace_function("main", &main);

        let mut bytecode =
            Bytecode { file_set: self.file_set, main_function: Rc::new(main), constants: self.constants };
        if self.options.remove_duplicates {
            bytecode.remove_duplicates();
        }
        debug!(
            file = %file.name,
            constants = bytecode.constants.len(),
            globals = self.symbols.max_symbols(SymbolTable::ROOT),
            "compiled"
        );
        Ok(bytecode)
    }

    // ───── diagnostics ─────

    fn error(&mut self, pos: Pos, message: impl Into<String>) {
        let cap = self.options.max_errors;
        if cap == 0 || self.diagnostics.len() < cap {
            let pos = self.file_set.position(pos);
            self.diagnostics.push(Diagnostic { message: message.into(), pos });
        } else {
            self.overflow += 1;
        }
    }

    fn too_many_errors(&self) -> bool {
        self.options.max_errors > 0 && self.diagnostics.len() >= self.options.max_errors
    }

    fn trace_function(&self, label: &str, func: &CompiledFunction) {
        if self.options.trace {
            for line in format_instructions(&func.instructions, 0) {
                trace!(target: "skein::compiler", "{label}: {line}");
            }
        }
    }

    // ───── émission ─────

    fn position(&self) -> usize {
        self.current.instructions.len()
    }

    fn emit(&mut self, pos: Pos, op: Opcode, operands: &[u32]) -> usize {
        let at = self.current.instructions.len();
        self.current.instructions.extend(make_instruction(op, operands));
        self.current.source_map.insert(at, pos);
        at
    }

    /// Réécrit l'opérande unique de l'instruction à `at` (cible de saut).
    fn change_operand(&mut self, at: usize, value: usize) {
        let ins = &mut self.current.instructions;
        if let Some(op) = Opcode::from_u8(ins[at]) {
            let patched = make_instruction(op, &[operand(value)]);
            ins[at..at + patched.len()].copy_from_slice(&patched);
        }
    }

    fn patch_here(&mut self, at: usize) {
        let here = self.position();
        self.change_operand(at, here);
    }

    fn add_constant(&mut self, pos: Pos, value: Object) -> u32 {
        if self.constants.len() > usize::from(u16::MAX) {
            self.error(pos, "too many constants");
            return 0;
        }
        self.constants.push(value);
        operand(self.constants.len() - 1)
    }

    fn emit_constant(&mut self, pos: Pos, value: Object) {
        let idx = self.add_constant(pos, value);
        self.emit(pos, Opcode::Constant, &[idx]);
    }

    fn enter(&mut self, kind: FuncKind) {
        let outer = mem::replace(&mut self.current, CompilationScope { kind, ..CompilationScope::default() });
        self.enclosing.push(outer);
    }

    fn leave(&mut self) -> CompilationScope {
        let outer = self.enclosing.pop().unwrap_or_default();
        mem::replace(&mut self.current, outer)
    }

    // ───── symboles ─────

    /// Index de slot vérifié contre la largeur d'opérande.
    fn slot(&mut self, pos: Pos, sym: &Symbol) -> u32 {
        let max = match sym.scope {
            SymbolScope::Global => usize::from(u16::MAX),
            _ => usize::from(u8::MAX),
        };
        if sym.index > max {
            self.error(pos, format!("too many variables: '{}'", sym.name));
        }
        operand(sym.index)
    }

    fn load_symbol(&mut self, pos: Pos, id: SymbolId) {
        let sym = self.symbols.symbol(id).clone();
        let op = match sym.scope {
            SymbolScope::Global => Opcode::GetGlobal,
            SymbolScope::Local => Opcode::GetLocal,
            SymbolScope::Builtin => Opcode::GetBuiltin,
            SymbolScope::Free => Opcode::GetFree,
        };
        let idx = self.slot(pos, &sym);
        self.emit(pos, op, &[idx]);
    }

    /// Première liaison d'une variable de boucle.
    fn bind_loop_var(&mut self, pos: Pos, id: SymbolId) {
        let sym = self.symbols.symbol(id).clone();
        let idx = self.slot(pos, &sym);
        if sym.scope == SymbolScope::Global {
            self.emit(pos, Opcode::SetGlobal, &[idx]);
        } else {
            self.symbols.mark_assigned(id);
            self.emit(pos, Opcode::DefineLocal, &[idx]);
        }
    }

    fn with_block<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let outer = self.scope;
        self.scope = self.symbols.fork(outer, true);
        let out = f(self);
        self.scope = outer;
        out
    }

    // ─────────────────────────────────────────────────────────────────────
    /* Instructions */
    // ─────────────────────────────────────────────────────────────────────

    /// Instructions de premier niveau d'un fichier. S'arrête au premier
    /// transfert inconditionnel, ou dès que le plafond d'erreurs est atteint.
    fn compile_top_level(&mut self, stmts: &[Stmt]) -> bool {
        for stmt in stmts {
            if self.too_many_errors() {
                warn!(recorded = self.diagnostics.len(), more = self.overflow, "too many errors");
                return false;
            }
            if self.compile_stmt(stmt) {
                return true;
            }
        }
        false
    }

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> bool {
        stmts.iter().any(|stmt| self.compile_stmt(stmt))
    }

    fn compile_block(&mut self, block: &Block) -> bool {
        if block.stmts.is_empty() {
            return false;
        }
        self.with_block(|c| c.compile_stmts(&block.stmts))
    }

    /// Compile une instruction ; `true` si elle transfère le contrôle
    /// inconditionnellement (le reste du bloc est alors ignoré).
    fn compile_stmt(&mut self, stmt: &Stmt) -> bool {
        let pos = stmt.pos;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr);
                self.emit(pos, Opcode::Pop, &[]);
            }
            StmtKind::Assign { lhs, rhs, op } => self.compile_assign(pos, lhs, rhs, *op),
            StmtKind::IncDec { expr, inc } => {
                let one = Expr::new(ExprKind::Int(1)).at(pos);
                let op = if *inc { AssignOp::Add } else { AssignOp::Sub };
                self.compile_assign(pos, std::slice::from_ref(expr), std::slice::from_ref(&one), op);
            }
            StmtKind::Block(block) => return self.compile_block(block),
            StmtKind::If { init, cond, body, else_stmt } => {
                self.compile_if(pos, init.as_deref(), cond, body, else_stmt.as_deref());
            }
            StmtKind::For { init, cond, post, body } => {
                self.compile_for(pos, init.as_deref(), cond.as_ref(), post.as_deref(), body);
            }
            StmtKind::ForIn { key, value, iterable, body } => {
                self.compile_for_in(pos, key, value.as_ref(), iterable, body);
            }
            StmtKind::Break => return self.compile_branch(pos, true),
            StmtKind::Continue => return self.compile_branch(pos, false),
            StmtKind::Return(value) => return self.compile_return(pos, value.as_ref()),
            StmtKind::Export(expr) => return self.compile_export(pos, expr),
            StmtKind::Empty => {}
            StmtKind::Bad(msg) => self.error(pos, msg.clone()),
        }
        false
    }

    fn compile_if(&mut self, pos: Pos, init: Option<&Stmt>, cond: &Expr, body: &Block, else_stmt: Option<&Stmt>) {
        self.with_block(|c| {
            if let Some(init) = init {
                c.compile_stmt(init);
            }
            c.compile_expr(cond);
            let jump_falsy = c.emit(pos, Opcode::JumpFalsy, &[0]);
            c.compile_block(body);
            match else_stmt {
                Some(other) => {
                    let jump_end = c.emit(pos, Opcode::Jump, &[0]);
                    c.patch_here(jump_falsy);
                    c.compile_stmt(other);
                    c.patch_here(jump_end);
                }
                None => c.patch_here(jump_falsy),
            }
        });
    }

    fn compile_for(&mut self, pos: Pos, init: Option<&Stmt>, cond: Option<&Expr>, post: Option<&Stmt>, body: &Block) {
        self.with_block(|c| {
            if let Some(init) = init {
                c.compile_stmt(init);
            }
            let pre_cond = c.position();
            let exit = cond.map(|cond| {
                c.compile_expr(cond);
                c.emit(pos, Opcode::JumpFalsy, &[0])
            });

            c.current.loops.push(Loop::default());
            c.compile_block(body);
            let lp = c.current.loops.pop().unwrap_or_default();

            let post_body = c.position();
            if let Some(post) = post {
                c.compile_stmt(post);
            }
            c.emit(pos, Opcode::Jump, &[operand(pre_cond)]);

            let end = c.position();
            if let Some(exit) = exit {
                c.change_operand(exit, end);
            }
            c.close_loop(lp, end, post_body);
        });
    }

    /// `for k, v in it { }` se compile comme :
    /// `:it := iter(it); for :it.next() { k := :it.key(); v := :it.value(); ... }`
    /// (`:` ne peut pas apparaître dans un nom source).
    fn compile_for_in(&mut self, pos: Pos, key: &Ident, value: Option<&Ident>, iterable: &Expr, body: &Block) {
        // une seule variable : c'est la valeur
        let (key, value) = match value {
            Some(value) => (Some(key), Some(value)),
            None => (None, Some(key)),
        };
        self.with_block(|c| {
            let it = c.symbols.define(c.scope, ":it");
            c.compile_expr(iterable);
            c.emit(pos, Opcode::IteratorInit, &[]);
            c.bind_loop_var(pos, it);

            let pre_cond = c.position();
            c.load_symbol(pos, it);
            c.emit(pos, Opcode::IteratorNext, &[]);
            let exit = c.emit(pos, Opcode::JumpFalsy, &[0]);

            c.current.loops.push(Loop::default());
            for (ident, op) in [(key, Opcode::IteratorKey), (value, Opcode::IteratorValue)] {
                let Some(ident) = ident.filter(|i| i.name != "_") else { continue };
                let id = c.symbols.define(c.scope, &ident.name);
                c.load_symbol(pos, it);
                c.emit(pos, op, &[]);
                c.bind_loop_var(ident.pos, id);
            }
            c.compile_block(body);
            let lp = c.current.loops.pop().unwrap_or_default();

            let post_body = c.position();
            c.emit(pos, Opcode::Jump, &[operand(pre_cond)]);
            let end = c.position();
            c.change_operand(exit, end);
            c.close_loop(lp, end, post_body);
        });
    }

    fn close_loop(&mut self, lp: Loop, end: usize, post_body: usize) {
        for at in lp.breaks {
            self.change_operand(at, end);
        }
        for at in lp.continues {
            self.change_operand(at, post_body);
        }
    }

    fn compile_branch(&mut self, pos: Pos, is_break: bool) -> bool {
        if self.current.loops.is_empty() {
            let what = if is_break { "break" } else { "continue" };
            self.error(pos, format!("{what} not allowed outside loop"));
            return false;
        }
        let at = self.emit(pos, Opcode::Jump, &[0]);
        if let Some(lp) = self.current.loops.last_mut() {
            if is_break {
                lp.breaks.push(at);
            } else {
                lp.continues.push(at);
            }
        }
        true
    }

    fn compile_return(&mut self, pos: Pos, value: Option<&Expr>) -> bool {
        if self.current.kind == FuncKind::Main {
            self.error(pos, "return not allowed outside function");
            return false;
        }
        match value {
            Some(value) => {
                self.compile_expr(value);
                self.emit(pos, Opcode::Return, &[1]);
            }
            None => {
                self.emit(pos, Opcode::Return, &[0]);
            }
        }
        true
    }

    fn compile_export(&mut self, pos: Pos, expr: &Expr) -> bool {
        match self.current.kind {
            FuncKind::Function => {
                self.error(pos, "export not allowed inside function");
                false
            }
            // hors module, `export` n'a pas d'effet
            FuncKind::Main => false,
            FuncKind::Module => {
                self.compile_expr(expr);
                self.emit(pos, Opcode::Immutable, &[]);
                self.emit(pos, Opcode::Return, &[1]);
                true
            }
        }
    }

    // ───── affectation ─────

    fn assign_target(expr: &Expr) -> Option<(&str, Vec<Selector<'_>>)> {
        match &expr.kind {
            ExprKind::Ident(name) => Some((name.as_str(), Vec::new())),
            ExprKind::Selector { expr: inner, sel } => {
                let (name, mut selectors) = Self::assign_target(inner)?;
                selectors.push(Selector::Key(sel, expr.pos));
                Some((name, selectors))
            }
            ExprKind::Index { expr: inner, index } => {
                let (name, mut selectors) = Self::assign_target(inner)?;
                selectors.push(Selector::Index(index));
                Some((name, selectors))
            }
            _ => None,
        }
    }

    fn compile_assign(&mut self, pos: Pos, lhs: &[Expr], rhs: &[Expr], op: AssignOp) {
        let ([target], [value]) = (lhs, rhs) else {
            self.error(pos, "tuple assignment not allowed");
            return;
        };
        let Some((name, selectors)) = Self::assign_target(target) else {
            self.error(target.pos, "cannot assign to this expression");
            return;
        };
        if op == AssignOp::Define && !selectors.is_empty() {
            self.error(pos, "operator ':=' not allowed with selector");
            return;
        }

        let is_func = matches!(value.kind, ExprKind::Func(_));
        let resolved = self.symbols.resolve(self.scope, name);
        let mut symbol = None;
        if op == AssignOp::Define {
            if matches!(resolved, Some((_, 0))) {
                self.error(pos, format!("'{name}' redeclared in this block"));
                return;
            }
            // défini avant le corps : une fonction locale peut s'appeler elle-même
            if is_func {
                symbol = Some(self.symbols.define(self.scope, name));
            }
        } else {
            let Some((id, _)) = resolved else {
                self.error(target.pos, format!("unresolved reference '{name}'"));
                return;
            };
            symbol = Some(id);
        }

        let binary = op.binary();
        if binary.is_some() {
            self.compile_expr(target);
        }
        self.compile_expr(value);
        let id = match symbol {
            Some(id) => id,
            None => self.symbols.define(self.scope, name),
        };
        if let Some(operator) = binary.and_then(operator_for) {
            self.emit(pos, Opcode::BinaryOp, &[operator as u32]);
        }

        for sel in selectors.iter().rev() {
            match sel {
                Selector::Key(key, at) => self.emit_constant(*at, Object::from(*key)),
                Selector::Index(index) => self.compile_expr(index),
            }
        }

        let sym = self.symbols.symbol(id).clone();
        let idx = self.slot(pos, &sym);
        let n = operand(selectors.len());
        match (sym.scope, selectors.is_empty()) {
            (SymbolScope::Global, true) => {
                self.emit(pos, Opcode::SetGlobal, &[idx]);
            }
            (SymbolScope::Global, false) => {
                self.emit(pos, Opcode::SetSelGlobal, &[idx, n]);
            }
            (SymbolScope::Local, true) => {
                let op = if op == AssignOp::Define && !sym.local_assigned { Opcode::DefineLocal } else { Opcode::SetLocal };
                self.emit(pos, op, &[idx]);
                self.symbols.mark_assigned(id);
            }
            (SymbolScope::Local, false) => {
                self.emit(pos, Opcode::SetSelLocal, &[idx, n]);
                self.symbols.mark_assigned(id);
            }
            (SymbolScope::Free, true) => {
                self.emit(pos, Opcode::SetFree, &[idx]);
            }
            (SymbolScope::Free, false) => {
                self.emit(pos, Opcode::SetSelFree, &[idx, n]);
            }
            (SymbolScope::Builtin, _) => self.error(pos, format!("cannot assign to builtin function '{name}'")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    /* Expressions */
    // ─────────────────────────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &Expr) {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Ident(name) => match self.symbols.resolve(self.scope, name) {
                Some((id, _)) => self.load_symbol(pos, id),
                None => self.error(pos, format!("unresolved reference '{name}'")),
            },
            ExprKind::Int(v) => self.emit_constant(pos, Object::Int(*v)),
            ExprKind::Float(v) => self.emit_constant(pos, Object::Float(*v)),
            ExprKind::Char(v) => self.emit_constant(pos, Object::Char(*v)),
            ExprKind::Str(s) => self.emit_constant(pos, Object::from(s.as_str())),
            ExprKind::Bool(true) => {
                self.emit(pos, Opcode::True, &[]);
            }
            ExprKind::Bool(false) => {
                self.emit(pos, Opcode::False, &[]);
            }
            ExprKind::Undefined => {
                self.emit(pos, Opcode::Null, &[]);
            }
            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                let n = self.count(pos, items.len(), usize::from(u16::MAX), "array literal");
                self.emit(pos, Opcode::Array, &[n]);
            }
            ExprKind::Map(elements) => {
                for el in elements {
                    self.emit_constant(el.key_pos, Object::from(el.key.as_str()));
                    self.compile_expr(&el.value);
                }
                let n = self.count(pos, elements.len() * 2, usize::from(u16::MAX), "map literal");
                self.emit(pos, Opcode::Map, &[n]);
            }
            ExprKind::Binary { lhs, op, rhs } => self.compile_binary(pos, lhs, *op, rhs),
            ExprKind::Unary { op, expr: inner } => {
                self.compile_expr(inner);
                let op = match op {
                    UnaryOp::Neg => Opcode::Minus,
                    UnaryOp::Not => Opcode::LNot,
                    UnaryOp::BitNot => Opcode::BComplement,
                    UnaryOp::Plus => return,
                };
                self.emit(pos, op, &[]);
            }
            ExprKind::Call { func, args, spread } => {
                self.compile_expr(func);
                for arg in args {
                    self.compile_expr(arg);
                }
                let n = self.count(pos, args.len(), usize::from(u8::MAX), "call");
                self.emit(pos, Opcode::Call, &[n, u32::from(*spread)]);
            }
            ExprKind::Index { expr: inner, index } => {
                self.compile_expr(inner);
                self.compile_expr(index);
                self.emit(pos, Opcode::Index, &[]);
            }
            ExprKind::Selector { expr: inner, sel } => {
                self.compile_expr(inner);
                self.emit_constant(pos, Object::from(sel.as_str()));
                self.emit(pos, Opcode::Index, &[]);
            }
            ExprKind::Slice { expr: inner, low, high } => {
                self.compile_expr(inner);
                for bound in [low, high] {
                    match bound {
                        Some(b) => self.compile_expr(b),
                        None => {
                            self.emit(pos, Opcode::Null, &[]);
                        }
                    }
                }
                self.emit(pos, Opcode::SliceIndex, &[]);
            }
            ExprKind::Cond { cond, then_expr, else_expr } => {
                self.compile_expr(cond);
                let jump_falsy = self.emit(pos, Opcode::JumpFalsy, &[0]);
                self.compile_expr(then_expr);
                let jump_end = self.emit(pos, Opcode::Jump, &[0]);
                self.patch_here(jump_falsy);
                self.compile_expr(else_expr);
                self.patch_here(jump_end);
            }
            ExprKind::Func(lit) => self.compile_func(pos, lit),
            ExprKind::Error(inner) => {
                self.compile_expr(inner);
                self.emit(pos, Opcode::Error, &[]);
            }
            ExprKind::Immutable(inner) => {
                self.compile_expr(inner);
                self.emit(pos, Opcode::Immutable, &[]);
            }
            ExprKind::Import(name) => self.compile_import(pos, name),
            ExprKind::Paren(inner) => self.compile_expr(inner),
            ExprKind::Bad(msg) => self.error(pos, msg.clone()),
        }
    }

    fn count(&mut self, pos: Pos, n: usize, max: usize, what: &str) -> u32 {
        if n > max {
            self.error(pos, format!("too many elements in {what}"));
        }
        operand(n)
    }

    fn compile_binary(&mut self, pos: Pos, lhs: &Expr, op: BinaryOp, rhs: &Expr) {
        self.compile_expr(lhs);
        match op {
            BinaryOp::LAnd | BinaryOp::LOr => {
                let jump = if op == BinaryOp::LAnd { Opcode::AndJump } else { Opcode::OrJump };
                let at = self.emit(pos, jump, &[0]);
                self.compile_expr(rhs);
                self.patch_here(at);
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                self.compile_expr(rhs);
                let eq = if op == BinaryOp::Equal { Opcode::Equal } else { Opcode::NotEqual };
                self.emit(pos, eq, &[]);
            }
            other => {
                self.compile_expr(rhs);
                if let Some(operator) = operator_for(other) {
                    self.emit(pos, Opcode::BinaryOp, &[operator as u32]);
                }
            }
        }
    }

    fn compile_func(&mut self, pos: Pos, lit: &FuncLit) {
        let outer = self.scope;
        let fn_scope = self.symbols.fork(outer, false);
        self.scope = fn_scope;
        self.enter(FuncKind::Function);

        for param in &lit.params {
            let id = self.symbols.define(fn_scope, &param.name);
            self.symbols.mark_assigned(id);
        }
        if !self.compile_block(&lit.body) {
            self.emit(pos, Opcode::Return, &[0]);
        }

        let body = self.leave();
        self.scope = outer;

        let func = CompiledFunction {
            instructions: Rc::from(body.instructions),
            num_locals: self.symbols.max_symbols(fn_scope),
            num_parameters: lit.params.len(),
            var_args: lit.var_args,
            source_map: Rc::new(body.source_map),
            free: Vec::new(),
        };
        self.trace_function("func", &func);

        let free = self.symbols.free_symbols(fn_scope).to_vec();
        let idx = self.add_constant(pos, Object::CompiledFunction(Rc::new(func)));
        if free.is_empty() {
            self.emit(pos, Opcode::Constant, &[idx]);
            return;
        }

        for id in &free {
            let sym = self.symbols.symbol(*id).clone();
            let slot = self.slot(pos, &sym);
            match sym.scope {
                SymbolScope::Local => {
                    // capture d'une locale pas encore affectée (fonction
                    // locale récursive) : on crée sa cellule maintenant
                    if !sym.local_assigned {
                        self.emit(pos, Opcode::Null, &[]);
                        self.emit(pos, Opcode::DefineLocal, &[slot]);
                        self.symbols.mark_assigned(*id);
                    }
                    self.emit(pos, Opcode::GetLocalPtr, &[slot]);
                }
                SymbolScope::Free => {
                    self.emit(pos, Opcode::GetFreePtr, &[slot]);
                }
                SymbolScope::Global | SymbolScope::Builtin => {}
            }
        }
        let n = self.count(pos, free.len(), usize::from(u8::MAX), "closure captures");
        self.emit(pos, Opcode::Closure, &[idx, n]);
    }

    // ───── modules ─────

    fn compile_import(&mut self, pos: Pos, name: &str) {
        match self.options.modules.get(name).cloned() {
            None => self.error(pos, format!("module '{name}' not found")),
            Some(Module::Builtin(attrs)) => self.emit_constant(pos, attrs),
            Some(Module::Source(file)) => {
                if self.import_stack.iter().any(|m| m == name) {
                    self.error(pos, format!("cyclic module import: {name}"));
                    return;
                }
                let func = match self.compiled_modules.get(name) {
                    Some(func) => Rc::clone(func),
                    None => {
                        let func = self.compile_module(name, &file);
                        self.compiled_modules.insert(name.to_owned(), Rc::clone(&func));
                        func
                    }
                };
                self.emit_constant(pos, Object::CompiledFunction(func));
                self.emit(pos, Opcode::Call, &[0, 0]);
            }
        }
    }

    /// Un module source devient une fonction sans paramètre : ses
    /// variables de premier niveau sont des locales et sa valeur est
    /// celle de son `export` (sinon `undefined`).
    fn compile_module(&mut self, name: &str, file: &File) -> Rc<CompiledFunction> {
        self.import_stack.push(name.to_owned());
        let outer = self.scope;
        let root = self.symbols.new_root();
        let mod_scope = self.symbols.fork(root, false);
        self.scope = mod_scope;
        self.enter(FuncKind::Module);

        if !self.compile_top_level(&file.stmts) {
            self.emit(NO_POS, Opcode::Return, &[0]);
        }

        let body = self.leave();
        self.scope = outer;
        self.import_stack.pop();

        let func = CompiledFunction {
            instructions: Rc::from(body.instructions),
            num_locals: self.symbols.max_symbols(mod_scope),
            source_map: Rc::new(body.source_map),
            ..CompiledFunction::default()
        };
        debug!(module = name, locals = func.num_locals, "module compiled");
        self.trace_function(name, &func);
        Rc::new(func)
    }
}
