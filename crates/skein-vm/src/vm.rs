//! Boucle d'exécution.

use std::cell::RefCell;
use std::rc::Rc;

use skein_bytecode::Bytecode;
use skein_core::{read_u16, read_u32, read_u8, Opcode, Operator, SourceFilePos, SourceFileSet};
use skein_runtime::{
    BuiltinFunction, Cell, CompiledFunction, Invoke, MapValue, NativeContext, Object, RuntimeError, BUILTINS,
};
use tracing::{debug, instrument, trace};

use crate::frame::Frame;
use crate::{ExecContext, VmConfig};

type VResult<T> = Result<T, RuntimeError>;

/// État du cycle de vie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Construite, jamais lancée.
    Ready,
    /// Boucle en cours.
    Running,
    /// Fin normale (`SUSPEND` ou retour du programme principal).
    Suspended,
    /// Erreur ou annulation.
    Aborted,
}

/// Issue d'une instruction.
enum Flow {
    Continue,
    Return(Object),
    Suspend,
}

/// Machine virtuelle.
///
/// Les locales d'une frame occupent `stack[base..base + num_locals]`. Une
/// locale capturée par une fermeture est déplacée dans une cellule
/// (`cells[slot]`) : lectures et écritures passent alors par elle, ce qui
/// rend les mutations visibles des deux côtés. `DEFINE_LOCAL` détache le
/// slot de sa cellule, donc une variable redéclarée (tour de boucle) en
/// obtient une nouvelle à la capture suivante.
pub struct Vm {
    file_set: SourceFileSet,
    main: Rc<CompiledFunction>,
    constants: Vec<Object>,
    globals: Vec<Object>,
    stack: Vec<Object>,
    cells: Vec<Option<Cell>>,
    /// Cellules empilées par `GET_LOCAL_PTR`/`GET_FREE_PTR`, consommées par `CLOSURE`.
    captures: Vec<Cell>,
    frames: Vec<Frame>,
    config: VmConfig,
    ctx: ExecContext,
    allocs: i64,
    ticks: usize,
    state: VmState,
}

impl Vm {
    /// Prépare l'exécution ; `globals` est complété jusqu'à `globals_size`.
    pub fn new(bytecode: Bytecode, mut globals: Vec<Object>, config: VmConfig, ctx: ExecContext) -> Self {
        if globals.len() < config.globals_size {
            globals.resize(config.globals_size, Object::Undefined);
        }
        let Bytecode { file_set, main_function, constants } = bytecode;
        Self {
            file_set,
            main: main_function,
            constants,
            globals,
            stack: Vec::with_capacity(config.stack_size.min(256)),
            cells: Vec::new(),
            captures: Vec::new(),
            frames: Vec::new(),
            allocs: ctx.limits.max_allocs,
            config,
            ctx,
            ticks: 0,
            state: VmState::Ready,
        }
    }

    /* ───── accès hôte ───── */

    /// État courant.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Globales (index attribués par le compilateur).
    pub fn globals(&self) -> &[Object] {
        &self.globals
    }

    /// Globale `index`.
    pub fn global(&self, index: usize) -> Option<&Object> {
        self.globals.get(index)
    }

    /// Rend les globales.
    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// Jeton d'annulation (à cloner vers un autre thread).
    pub fn cancel_token(&self) -> &skein_runtime::CancelToken {
        &self.ctx.cancel
    }

    /// Demande l'arrêt : la boucle échoue avec `Aborted` à la prochaine
    /// vérification.
    pub fn abort(&self) {
        self.ctx.cancel.cancel();
    }

    /// Allocations encore permises (-1 = illimité).
    pub fn remaining_allocs(&self) -> i64 {
        self.allocs
    }

    /* ───── exécution ───── */

    /// Exécute le programme principal depuis le début.
    ///
    /// Retourne `undefined` sur `SUSPEND`, ou la valeur d'un `RETURN` du
    /// programme principal.
    #[instrument(level = "debug", skip_all, fields(constants = self.constants.len()))]
    pub fn run(&mut self) -> VResult<Object> {
        self.stack.clear();
        self.cells.clear();
        self.captures.clear();
        self.frames.clear();
        self.allocs = self.ctx.limits.max_allocs;
        self.ticks = 0;
        self.state = VmState::Running;

        let result = self.start();
        match result {
            Ok(value) => {
                self.state = VmState::Suspended;
                debug!("suspended");
                Ok(value.unwrap_or_default())
            }
            Err(err) => {
                self.state = VmState::Aborted;
                self.frames.clear();
                self.stack.clear();
                debug!(error = %err.root(), "aborted");
                Err(err)
            }
        }
    }

    fn start(&mut self) -> VResult<Option<Object>> {
        self.ctx.cancel.check()?;
        let main = Rc::clone(&self.main);
        self.enter(main, 0)?;
        self.run_loop(0)
    }

    /// Appelle `callee` (fonction compilée ou native) avec `args` et rend sa
    /// valeur de retour. Sert à l'hôte après `run()` et aux natives qui
    /// rappellent le script.
    pub fn run_compiled(&mut self, callee: &Object, args: &[Object]) -> VResult<Object> {
        let (sp, depth) = (self.stack.len(), self.frames.len());
        let result = self.call_value(callee, args);
        if result.is_err() {
            self.stack.truncate(sp);
            self.frames.truncate(depth);
            self.cells.truncate(sp);
        }
        result
    }

    fn call_value(&mut self, callee: &Object, args: &[Object]) -> VResult<Object> {
        self.ctx.cancel.check()?;
        let floor = self.frames.len();
        self.push(callee.clone())?;
        for arg in args {
            self.push(arg.clone())?;
        }
        match callee {
            Object::CompiledFunction(f) => {
                self.call_compiled(Rc::clone(f), args.len(), false)?;
                Ok(self.run_loop(floor)?.unwrap_or_default())
            }
            Object::BuiltinFunction(b) => {
                self.call_native(b, args.len())?;
                self.pop()
            }
            other => Err(RuntimeError::NotCallable(other.type_name().into_owned())),
        }
    }

    /// Exécute jusqu'à ce que la pile de frames redescende à `floor`.
    fn run_loop(&mut self, floor: usize) -> VResult<Option<Object>> {
        loop {
            match self.step(floor) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => return Ok(Some(value)),
                Ok(Flow::Suspend) => return Ok(None),
                Err(err) => {
                    let trace = self.trace(floor);
                    return Err(err.with_trace(trace));
                }
            }
        }
    }

    /// Positions des frames actives au-dessus de `floor`, la plus récente
    /// d'abord.
    fn trace(&self, floor: usize) -> Vec<SourceFilePos> {
        self.frames.iter().skip(floor).rev().map(|f| f.position(&self.file_set)).collect()
    }

    /* ───── décodage ───── */

    fn fetch(&mut self) -> VResult<(Opcode, [usize; 2])> {
        let frame = self.frames.last_mut().ok_or_else(|| RuntimeError::custom("no active frame"))?;
        let ins = &frame.func.instructions;
        let start = frame.ip;
        let byte = *ins.get(start).ok_or_else(|| RuntimeError::custom("instruction pointer out of range"))?;
        let op = Opcode::from_u8(byte).ok_or(RuntimeError::InvalidInstruction(byte))?;
        if start + op.instruction_len() > ins.len() {
            return Err(RuntimeError::InvalidInstruction(byte));
        }
        let mut operands = [0usize; 2];
        let mut at = start + 1;
        for (slot, &width) in operands.iter_mut().zip(op.operand_widths()) {
            *slot = match width {
                1 => read_u8(ins, at),
                2 => read_u16(ins, at),
                _ => read_u32(ins, at),
            };
            at += width;
        }
        frame.at = start;
        frame.ip = at;
        Ok((op, operands))
    }

    fn tick(&mut self) -> VResult<()> {
        self.ticks += 1;
        if self.ticks >= self.config.check_interval.max(1) {
            self.ticks = 0;
            self.ctx.cancel.check()?;
        }
        Ok(())
    }

    /* ───── instructions ───── */

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, floor: usize) -> VResult<Flow> {
        self.tick()?;
        let (op, [a, b]) = self.fetch()?;
        match op {
            Opcode::Constant => {
                let value = self.constants.get(a).cloned().ok_or_else(|| RuntimeError::custom(format!("constant {a} out of range")))?;
                self.push(value)?;
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::True => self.push(Object::Bool(true))?,
            Opcode::False => self.push(Object::Bool(false))?,
            Opcode::Null => self.push(Object::Undefined)?,
            Opcode::Equal | Opcode::NotEqual => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Object::Bool((lhs == rhs) == (op == Opcode::Equal)))?;
            }
            Opcode::Minus => {
                let value = self.pop()?.neg()?;
                self.alloc()?;
                self.push(value)?;
            }
            Opcode::LNot => {
                let value = self.pop()?;
                self.push(Object::Bool(value.is_falsy()))?;
            }
            Opcode::BComplement => {
                let value = self.pop()?.bit_not()?;
                self.alloc()?;
                self.push(value)?;
            }
            Opcode::BinaryOp => {
                #[allow(clippy::cast_possible_truncation)]
                let operator = Operator::try_from(a as u8).map_err(|_| RuntimeError::InvalidInstruction(op as u8))?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let value = lhs.binary_op(operator, &rhs, &self.ctx.limits)?;
                self.alloc()?;
                self.push(value)?;
            }
            Opcode::JumpFalsy => {
                if self.pop()?.is_falsy() {
                    self.jump(a)?;
                }
            }
            Opcode::AndJump => {
                if self.top()?.is_falsy() {
                    self.jump(a)?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::OrJump => {
                if self.top()?.is_falsy() {
                    self.pop()?;
                } else {
                    self.jump(a)?;
                }
            }
            Opcode::Jump => self.jump(a)?,
            Opcode::Array => {
                self.ctx.limits.check_array(a)?;
                let elements = self.pop_n(a)?;
                self.alloc()?;
                self.push(Object::array(elements))?;
            }
            Opcode::Map => {
                let items = self.pop_n(a)?;
                let mut entries = MapValue::with_capacity(items.len() / 2);
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    entries.insert(key.to_plain_string(), value);
                }
                self.alloc()?;
                self.push(Object::map(entries))?;
            }
            Opcode::Error => {
                let value = self.pop()?;
                self.alloc()?;
                self.push(Object::error(value))?;
            }
            Opcode::Immutable => {
                let value = self.pop()?.to_immutable();
                self.alloc()?;
                self.push(value)?;
            }
            Opcode::Index => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = target.index_get(&index)?;
                self.push(value)?;
            }
            Opcode::SliceIndex => {
                let high = self.pop()?;
                let low = self.pop()?;
                let target = self.pop()?;
                let value = target.slice(&low, &high)?;
                self.alloc()?;
                self.push(value)?;
            }
            Opcode::Call => self.call(a, b != 0)?,
            Opcode::Return => {
                let value = if a == 1 { self.pop()? } else { Object::Undefined };
                let frame = self.frames.pop().ok_or_else(|| RuntimeError::custom("return without frame"))?;
                self.stack.truncate(frame.base.saturating_sub(1));
                self.cells.truncate(frame.base);
                if self.frames.len() <= floor {
                    return Ok(Flow::Return(value));
                }
                self.push(value)?;
            }
            Opcode::GetGlobal => {
                let value = self.globals.get(a).cloned().ok_or(RuntimeError::GlobalOutOfRange(a))?;
                self.push(value)?;
            }
            Opcode::SetGlobal => {
                let value = self.pop()?;
                *self.globals.get_mut(a).ok_or(RuntimeError::GlobalOutOfRange(a))? = value;
            }
            Opcode::SetSelGlobal => {
                let (value, selectors) = self.pop_selectors(b)?;
                let target = self.globals.get(a).cloned().ok_or(RuntimeError::GlobalOutOfRange(a))?;
                index_assign(&target, value, &selectors)?;
            }
            Opcode::GetLocal => {
                let value = self.local(a)?;
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let value = self.pop()?;
                let slot = self.slot(a)?;
                match self.cells.get(slot).and_then(Option::as_ref) {
                    Some(cell) => *cell.borrow_mut() = value,
                    None => self.stack[slot] = value,
                }
            }
            Opcode::DefineLocal => {
                let value = self.pop()?;
                let slot = self.slot(a)?;
                self.stack[slot] = value;
                if let Some(cell) = self.cells.get_mut(slot) {
                    *cell = None;
                }
            }
            Opcode::SetSelLocal => {
                let (value, selectors) = self.pop_selectors(b)?;
                let target = self.local(a)?;
                index_assign(&target, value, &selectors)?;
            }
            Opcode::GetFree => {
                let value = self.free(a)?.borrow().clone();
                self.push(value)?;
            }
            Opcode::SetFree => {
                let value = self.pop()?;
                *self.free(a)?.borrow_mut() = value;
            }
            Opcode::GetFreePtr => {
                let cell = self.free(a)?;
                self.captures.push(cell);
            }
            Opcode::GetLocalPtr => {
                let cell = self.local_cell(a)?;
                self.captures.push(cell);
            }
            Opcode::SetSelFree => {
                let (value, selectors) = self.pop_selectors(b)?;
                let target = self.free(a)?.borrow().clone();
                index_assign(&target, value, &selectors)?;
            }
            Opcode::GetBuiltin => {
                let (name, func) = BUILTINS.get(a).ok_or(RuntimeError::InvalidInstruction(op as u8))?;
                self.push(Object::BuiltinFunction(Rc::new(BuiltinFunction::new(*name, *func))))?;
            }
            Opcode::Closure => {
                let Some(Object::CompiledFunction(proto)) = self.constants.get(a) else {
                    return Err(RuntimeError::custom(format!("constant {a} is not a function")));
                };
                let proto = Rc::clone(proto);
                let start =
                    self.captures.len().checked_sub(b).ok_or_else(|| RuntimeError::custom("missing captured cells"))?;
                let free = self.captures.split_off(start);
                self.alloc()?;
                self.push(Object::CompiledFunction(Rc::new(proto.with_free(free))))?;
            }
            Opcode::IteratorInit => {
                let iter = self.pop()?.iterate()?;
                self.alloc()?;
                self.push(iter)?;
            }
            Opcode::IteratorNext => {
                let more = self.pop()?.iter_next()?;
                self.push(Object::Bool(more))?;
            }
            Opcode::IteratorKey => {
                let key = self.pop()?.iter_key()?;
                self.push(key)?;
            }
            Opcode::IteratorValue => {
                let value = self.pop()?.iter_value()?;
                self.push(value)?;
            }
            Opcode::Suspend => return Ok(Flow::Suspend),
        }
        Ok(Flow::Continue)
    }

    /* ───── appels ───── */

    fn call(&mut self, num_args: usize, spread: bool) -> VResult<()> {
        let mut n = num_args;
        if spread {
            let last = self.pop()?;
            let items = match &last {
                Object::Array(a) => a.borrow().clone(),
                Object::ImmutableArray(a) => a.to_vec(),
                other => return Err(RuntimeError::arg_type("last", "array", other.type_name())),
            };
            n = n.saturating_sub(1) + items.len();
            for item in items {
                self.push(item)?;
            }
        }
        let at = self.stack.len().checked_sub(n + 1).ok_or_else(stack_underflow)?;
        match &self.stack[at] {
            Object::CompiledFunction(f) => {
                let f = Rc::clone(f);
                self.call_compiled(f, n, true)
            }
            Object::BuiltinFunction(b) => {
                let b = Rc::clone(b);
                self.call_native(&b, n)
            }
            other => Err(RuntimeError::NotCallable(other.type_name().into_owned())),
        }
    }

    fn call_compiled(&mut self, f: Rc<CompiledFunction>, mut n: usize, allow_tail: bool) -> VResult<()> {
        if f.var_args {
            let fixed = f.num_parameters.saturating_sub(1);
            if n < fixed {
                return Err(RuntimeError::wrong_args(format!("at least {fixed}"), n));
            }
            let rest = self.pop_n(n - fixed)?;
            self.alloc()?;
            self.push(Object::array(rest))?;
            n = fixed + 1;
        }
        if n != f.num_parameters {
            return Err(RuntimeError::wrong_args(f.num_parameters.to_string(), n));
        }

        if allow_tail {
            if let Some(frame) = self.frames.last_mut() {
                if Rc::ptr_eq(&frame.func, &f) && frame.returns_next() {
                    trace!(base = frame.base, "tail call");
                    let base = frame.base;
                    frame.ip = 0;
                    let args = self.stack.split_off(self.stack.len() - n);
                    self.stack.truncate(base);
                    self.stack.extend(args);
                    self.reserve_locals(&f, base)?;
                    return Ok(());
                }
            }
        }

        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow);
        }
        let base = self.stack.len() - n;
        self.enter(f, base)
    }

    /// Empile une frame dont les locales commencent à `base`.
    fn enter(&mut self, f: Rc<CompiledFunction>, base: usize) -> VResult<()> {
        self.reserve_locals(&f, base)?;
        self.frames.push(Frame::new(f, base));
        Ok(())
    }

    /// Complète les locales à `undefined` et les détache de toute cellule.
    fn reserve_locals(&mut self, f: &CompiledFunction, base: usize) -> VResult<()> {
        let top = base + f.num_locals;
        if top > self.config.stack_size {
            return Err(RuntimeError::StackOverflow);
        }
        if self.stack.len() < top {
            self.stack.resize(top, Object::Undefined);
        }
        if self.cells.len() < top {
            self.cells.resize(top, None);
        }
        for cell in &mut self.cells[base..top] {
            *cell = None;
        }
        Ok(())
    }

    fn call_native(&mut self, b: &BuiltinFunction, n: usize) -> VResult<()> {
        self.ctx.cancel.check()?;
        let args = self.pop_n(n)?;
        self.pop()?;
        let func = b.func;
        let (limits, cancel) = (self.ctx.limits, self.ctx.cancel.clone());
        let value = {
            let mut native = NativeContext::new(limits, cancel).with_invoker(self);
            func(&mut native, &args)?
        };
        self.alloc()?;
        self.push(value)
    }

    /* ───── pile ───── */

    fn push(&mut self, value: Object) -> VResult<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VResult<Object> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn top(&self) -> VResult<&Object> {
        self.stack.last().ok_or_else(stack_underflow)
    }

    fn pop_n(&mut self, n: usize) -> VResult<Vec<Object>> {
        let at = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(self.stack.split_off(at))
    }

    /// Dépile `n` sélecteurs puis la valeur à affecter. Les sélecteurs sont
    /// rendus dans l'ordre de la pile (le dernier est le plus externe).
    fn pop_selectors(&mut self, n: usize) -> VResult<(Object, Vec<Object>)> {
        let selectors = self.pop_n(n)?;
        let value = self.pop()?;
        Ok((value, selectors))
    }

    fn jump(&mut self, target: usize) -> VResult<()> {
        let frame = self.frames.last_mut().ok_or_else(|| RuntimeError::custom("no active frame"))?;
        frame.ip = target;
        Ok(())
    }

    /// Décompte d'allocation ; `max_allocs < 0` = illimité.
    fn alloc(&mut self) -> VResult<()> {
        match self.allocs {
            0 => Err(RuntimeError::ObjectAllocLimit),
            n if n > 0 => {
                self.allocs -= 1;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /* ───── variables ───── */

    fn slot(&self, index: usize) -> VResult<usize> {
        let frame = self.frames.last().ok_or_else(|| RuntimeError::custom("no active frame"))?;
        let slot = frame.base + index;
        if slot >= self.stack.len() {
            return Err(RuntimeError::custom(format!("local {index} out of range")));
        }
        Ok(slot)
    }

    fn local(&self, index: usize) -> VResult<Object> {
        let slot = self.slot(index)?;
        Ok(match self.cells.get(slot).and_then(Option::as_ref) {
            Some(cell) => cell.borrow().clone(),
            None => self.stack[slot].clone(),
        })
    }

    /// Cellule de la locale `index`, créée à la première capture.
    fn local_cell(&mut self, index: usize) -> VResult<Cell> {
        let slot = self.slot(index)?;
        if self.cells.len() <= slot {
            self.cells.resize(slot + 1, None);
        }
        let value = &self.stack[slot];
        let cell = self.cells[slot].get_or_insert_with(|| Rc::new(RefCell::new(value.clone())));
        Ok(Rc::clone(cell))
    }

    fn free(&self, index: usize) -> VResult<Cell> {
        let frame = self.frames.last().ok_or_else(|| RuntimeError::custom("no active frame"))?;
        frame.func.free.get(index).cloned().ok_or_else(|| RuntimeError::custom(format!("free variable {index} out of range")))
    }
}

impl Invoke for Vm {
    fn invoke(&mut self, callee: &Object, args: &[Object]) -> Result<Object, RuntimeError> {
        self.run_compiled(callee, args)
    }
}

fn stack_underflow() -> RuntimeError {
    RuntimeError::custom("stack underflow")
}

/// `target[s_{n-1}]…[s_1][s_0] = value` : les sélecteurs externes sont lus,
/// seul le dernier est écrit.
fn index_assign(target: &Object, value: Object, selectors: &[Object]) -> VResult<()> {
    let Some((last, path)) = selectors.split_first() else {
        return Err(RuntimeError::NotIndexAssignable(target.type_name().into_owned()));
    };
    let mut dst = target.clone();
    for sel in path.iter().rev() {
        dst = dst.index_get(sel)?;
    }
    dst.index_set(last, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use skein_core::make_instruction;
    use skein_runtime::{CancelToken, Limits};

    fn program(parts: &[(Opcode, &[u32])]) -> Rc<CompiledFunction> {
        let instructions: Vec<u8> = parts.iter().flat_map(|(op, operands)| make_instruction(*op, operands)).collect();
        Rc::new(CompiledFunction { instructions: instructions.into(), ..CompiledFunction::default() })
    }

    fn vm(main: Rc<CompiledFunction>, constants: Vec<Object>, limits: Limits) -> Vm {
        let bc = Bytecode { main_function: main, constants, ..Bytecode::default() };
        Vm::new(bc, Vec::new(), VmConfig::default(), ExecContext::new(limits, CancelToken::new()))
    }

    #[test]
    fn adds_constants_into_a_global() {
        let main = program(&[
            (Opcode::Constant, &[0]),
            (Opcode::Constant, &[1]),
            (Opcode::BinaryOp, &[Operator::Add as u32]),
            (Opcode::SetGlobal, &[0]),
            (Opcode::Suspend, &[]),
        ]);
        let mut vm = vm(main, vec![Object::Int(40), Object::Int(2)], Limits::default());
        assert_eq!(vm.state(), VmState::Ready);
        assert_eq!(vm.run(), Ok(Object::Undefined));
        assert_eq!(vm.state(), VmState::Suspended);
        assert_eq!(vm.global(0), Some(&Object::Int(42)));
    }

    #[test]
    fn and_or_jumps_keep_the_deciding_operand() {
        let main = program(&[
            (Opcode::Constant, &[0]), // 0
            (Opcode::AndJump, &[9]),  // 3
            (Opcode::True, &[]),      // 8
            (Opcode::SetGlobal, &[0]), // 9
            (Opcode::Constant, &[0]), // 12
            (Opcode::OrJump, &[21]),  // 15
            (Opcode::True, &[]),      // 20
            (Opcode::SetGlobal, &[1]), // 21
            (Opcode::Suspend, &[]),
        ]);
        let mut vm = vm(main, vec![Object::Int(0)], Limits::default());
        vm.run().unwrap();
        assert_eq!(vm.globals()[..2], [Object::Int(0), Object::Bool(true)]);
    }

    #[test]
    fn allocation_ceiling_stops_the_loop() {
        let main = program(&[
            (Opcode::Array, &[0]),
            (Opcode::Pop, &[]),
            (Opcode::Jump, &[0]),
        ]);
        let mut vm = vm(main, vec![], Limits { max_allocs: 5, ..Limits::default() });
        let err = vm.run().unwrap_err();
        assert_eq!(err.root(), &RuntimeError::ObjectAllocLimit);
        assert_eq!(vm.state(), VmState::Aborted);
        assert_eq!(vm.remaining_allocs(), 0);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let main = Rc::new(CompiledFunction { instructions: vec![0xEE].into(), ..CompiledFunction::default() });
        let mut vm = vm(main, vec![], Limits::default());
        assert_eq!(vm.run().unwrap_err().root(), &RuntimeError::InvalidInstruction(0xEE));
    }

    #[test]
    fn truncated_operand_is_rejected() {
        let main = Rc::new(CompiledFunction {
            instructions: vec![Opcode::Constant as u8, 0].into(),
            ..CompiledFunction::default()
        });
        let mut vm = vm(main, vec![Object::Int(1)], Limits::default());
        assert_eq!(vm.run().unwrap_err().root(), &RuntimeError::InvalidInstruction(Opcode::Constant as u8));
    }

    #[test]
    fn main_return_value_is_handed_back() {
        let main = program(&[(Opcode::Constant, &[0]), (Opcode::Return, &[1])]);
        let mut vm = vm(main, vec![Object::from("done")], Limits::default());
        assert_eq!(vm.run(), Ok(Object::from("done")));
    }

    #[test]
    fn nested_selector_assignment() {
        let inner = Object::map(MapValue::from_iter([("b".to_owned(), Object::Int(1))]));
        let outer = Object::map(MapValue::from_iter([("a".to_owned(), inner.clone())]));
        // outer.a.b = 5 : sélecteurs empilés à l'envers ["b", "a"]
        index_assign(&outer, Object::Int(5), &[Object::from("b"), Object::from("a")]).unwrap();
        assert_eq!(inner.index_get(&Object::from("b")), Ok(Object::Int(5)));
    }
}
