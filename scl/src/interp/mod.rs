//! Tree-walking evaluator.
//!
//! Executes the AST directly: lexically scoped frames over a simulated
//! byte-addressed memory, 32-bit modular arithmetic, and emulated MCU
//! peripherals behind the [`Devices`] seam.
mod devices;
mod env;
mod memory;

pub use devices::{
    BufferDevices, Devices, GpioPin, Peripherals, StdioDevices, TimerState, UartState,
};

use std::collections::HashMap;

use log::{trace, warn};
use smol_str::SmolStr;

use crate::{
    ast::{
        ArrayDecl, BinOp, Expr, FuncCall, FuncDef, Global, Item, LValue, Program, PtrDecl, Stmt,
        Ty, UnOp, VarDecl,
    },
    error::{Pos, RuntimeError, SclResult},
};

use self::{
    env::{FrameId, Frames, Slot},
    memory::{Memory, WORD},
};

/// Arity of an intrinsic, or `None` for ordinary identifiers.
///
/// Intrinsic names resolve before user functions at call time, for both
/// the interpreter and the code generator.
#[rustfmt::skip]
pub(crate) fn intrinsic_arity(name: &str) -> Option<usize> {
    let arity = match name {
        "uart_set_baud"      => 1,
        "uart_get_status"    => 0,
        "uart_read"          => 0,
        "uart_write"         => 1,
        "gpio_set"           => 3,
        "gpio_read"          => 1,
        "gpio_write"         => 2,
        "timer_set_mode"     => 1,
        "timer_set_period"   => 1,
        "timer_start"        => 0,
        "timer_stop"         => 0,
        "timer_reset"        => 0,
        "timer_get_value"    => 0,
        "timer_expired"      => 0,
        "enable_interrupts"  => 0,
        "disable_interrupts" => 0,
        "set_bit"            => 2,
        "clear_bit"          => 2,
        "toggle_bit"         => 2,
        "get_bit"            => 2,
        "delay_ms"           => 1,
        "delay_us"           => 1,
        "delay_cycles"       => 1,
        _ => return None,
    };
    Some(arity)
}

/// Interpreter tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct InterpConf {
    /// Size of the simulated memory in bytes.
    pub memory_size: u32,
    /// Hard cap on nested calls.
    pub max_call_depth: usize,
    /// How far the emulated timer advances per poll. Must be nonzero so
    /// `timer_expired()` makes progress.
    pub timer_tick: u32,
}

impl Default for InterpConf {
    fn default() -> Self {
        Self {
            memory_size: 64 * 1024,
            max_call_depth: 256,
            timer_tick: 1,
        }
    }
}

/// Control signal threaded through statement execution.
///
/// Statements only run in the `Normal` state; sequences drain to the
/// nearest handler otherwise. Loops clear `Break`/`Continue` at their
/// boundary, calls clear `Return` after extracting the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Return(u32),
    Break,
    Continue,
}

/// A 32-bit word tagged with the signedness it picked up from
/// declarations, which drives `/`, `%`, comparisons and pointer
/// scaling.
#[derive(Debug, Clone, Copy)]
struct Word {
    bits: u32,
    ty: Ty,
}

impl Word {
    #[inline]
    fn unsigned(bits: u32) -> Self {
        Self { bits, ty: Ty::U32 }
    }
}

pub struct Interpreter<'a, D: Devices = StdioDevices> {
    program: &'a Program,
    functions: HashMap<SmolStr, &'a FuncDef>,
    frames: Frames,
    memory: Memory,
    /// Hardware register file r0-r31 for `register` variables.
    registers: [u32; 32],
    periph: Peripherals,
    devices: D,
    conf: InterpConf,
    call_depth: usize,
}

impl<'a> Interpreter<'a, StdioDevices> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_devices(program, InterpConf::default(), StdioDevices)
    }
}

impl<'a, D: Devices> Interpreter<'a, D> {
    pub fn with_devices(program: &'a Program, conf: InterpConf, devices: D) -> Self {
        let mut functions = HashMap::new();
        for func in program.functions() {
            functions.insert(func.name.clone(), func);
        }
        Self {
            program,
            functions,
            frames: Frames::new(),
            memory: Memory::new(conf.memory_size),
            registers: [0; 32],
            periph: Peripherals::new(),
            devices,
            conf,
            call_depth: 0,
        }
    }

    /// Host access to the bound devices, e.g. to inspect UART traffic.
    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn peripherals(&self) -> &Peripherals {
        &self.periph
    }

    /// Declare the globals, then execute `main` and return its value.
    /// A function that ends without `return` yields 0.
    pub fn run(&mut self) -> SclResult<u32> {
        let program = self.program;
        let global = self.frames.global();
        for item in &program.items {
            if let Item::Global(decl) = item {
                match decl {
                    Global::Var(decl) => self.exec_var_decl(global, decl)?,
                    Global::Array(decl) => self.exec_array_decl(global, decl)?,
                    Global::Ptr(decl) => self.exec_ptr_decl(global, decl)?,
                }
            }
        }

        let main = match self.functions.get("main") {
            Some(func) => *func,
            None => {
                return Err(RuntimeError::UndefinedFunction {
                    name: SmolStr::new("main"),
                    pos: Pos {
                        file: SmolStr::new(""),
                        line: 1,
                        column: 1,
                    },
                }
                .into())
            }
        };
        if !main.params.is_empty() {
            return Err(RuntimeError::WrongArity {
                name: main.name.clone(),
                expected: 0,
                found: main.params.len(),
                pos: main.pos.clone(),
            }
            .into());
        }
        let pos = main.pos.clone();
        Ok(self.call_function(main, &[], &pos)?)
    }

    // --- Calls -----------------------------------------------------------

    fn call_function(
        &mut self,
        func: &'a FuncDef,
        args: &[u32],
        call_pos: &Pos,
    ) -> Result<u32, RuntimeError> {
        if args.len() != func.params.len() {
            return Err(RuntimeError::WrongArity {
                name: func.name.clone(),
                expected: func.params.len(),
                found: args.len(),
                pos: call_pos.clone(),
            });
        }
        if self.call_depth >= self.conf.max_call_depth {
            return Err(RuntimeError::RecursionLimit {
                limit: self.conf.max_call_depth,
                pos: call_pos.clone(),
            });
        }

        self.call_depth += 1;
        // A call frame parents to the global frame, never to the
        // caller: there are no closures, so no dynamic scoping.
        let frame = self.frames.push(self.frames.global());
        let mark = self.memory.stack_mark();

        let result = self.exec_function_body(frame, func, args);

        self.frames.pop(frame);
        self.memory.stack_release(mark);
        self.call_depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(0),
        }
    }

    fn exec_function_body(
        &mut self,
        frame: FrameId,
        func: &'a FuncDef,
        args: &[u32],
    ) -> Result<Flow, RuntimeError> {
        for (param, value) in func.params.iter().zip(args) {
            let addr = self
                .memory
                .alloc_stack(1)
                .ok_or_else(|| RuntimeError::OutOfMemory {
                    pos: func.pos.clone(),
                })?;
            self.store(addr, *value, &func.pos)?;
            self.frames.declare(
                frame,
                param.clone(),
                Slot::Scalar {
                    addr,
                    ty: Ty::U32,
                    volatile: false,
                },
            );
        }

        let mut flow = Flow::Normal;
        for stmt in &func.body.stmts {
            flow = self.exec_stmt(frame, stmt)?;
            if flow != Flow::Normal {
                break;
            }
        }
        Ok(flow)
    }

    // --- Statements ------------------------------------------------------

    fn exec_stmt(&mut self, frame: FrameId, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Var(decl) => {
                self.exec_var_decl(frame, decl)?;
                Ok(Flow::Normal)
            }
            Stmt::Array(decl) => {
                self.exec_array_decl(frame, decl)?;
                Ok(Flow::Normal)
            }
            Stmt::Ptr(decl) => {
                self.exec_ptr_decl(frame, decl)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value, .. } => {
                let word = self.eval_expr(frame, value)?;
                self.write_lvalue(frame, target, word.bits)?;
                Ok(Flow::Normal)
            }
            Stmt::CompoundAssign {
                target,
                op,
                value,
                pos,
            } => {
                let current = self.read_lvalue(frame, target)?;
                let rhs = self.eval_expr(frame, value)?;
                let result = self.apply_binop(*op, current, rhs, pos)?;
                self.write_lvalue(frame, target, result.bits)?;
                Ok(Flow::Normal)
            }
            Stmt::Incr { name, pos } => {
                self.step_var(frame, name, pos, true)?;
                Ok(Flow::Normal)
            }
            Stmt::Decr { name, pos } => {
                self.step_var(frame, name, pos, false)?;
                Ok(Flow::Normal)
            }
            Stmt::Call(call) => {
                self.eval_call(frame, call)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval_expr(frame, cond)?.bits != 0 {
                    self.exec_stmt(frame, then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(frame, else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body, .. } => {
                loop {
                    if self.eval_expr(frame, cond)?.bits == 0 {
                        break;
                    }
                    match self.exec_stmt(frame, body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond, .. } => {
                loop {
                    match self.exec_stmt(frame, body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    if self.eval_expr(frame, cond)?.bits == 0 {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                // The header gets its own scope which also encloses the
                // body.
                let for_frame = self.frames.push(frame);
                let mark = self.memory.stack_mark();
                let result = self.exec_for(for_frame, init, cond, step, body);
                self.frames.pop(for_frame);
                self.memory.stack_release(mark);
                result
            }
            Stmt::Return { value, .. } => {
                let bits = match value {
                    Some(expr) => self.eval_expr(frame, expr)?.bits,
                    None => 0,
                };
                Ok(Flow::Return(bits))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Block(block) => {
                let block_frame = self.frames.push(frame);
                let mark = self.memory.stack_mark();
                let mut flow = Flow::Normal;
                let mut result = Ok(());
                for stmt in &block.stmts {
                    match self.exec_stmt(block_frame, stmt) {
                        Ok(f) => flow = f,
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                    if flow != Flow::Normal {
                        break;
                    }
                }
                self.frames.pop(block_frame);
                self.memory.stack_release(mark);
                result?;
                Ok(flow)
            }
            Stmt::Asm { pos, .. } => {
                warn!("ignoring inline assembly block at {}", pos);
                Ok(Flow::Normal)
            }
        }
    }

    #[allow(clippy::borrowed_box)]
    fn exec_for(
        &mut self,
        frame: FrameId,
        init: &Option<Box<Stmt>>,
        cond: &Option<Expr>,
        step: &Option<Box<Stmt>>,
        body: &Stmt,
    ) -> Result<Flow, RuntimeError> {
        if let Some(init) = init {
            self.exec_stmt(frame, init)?;
        }
        loop {
            if let Some(cond) = cond {
                if self.eval_expr(frame, cond)?.bits == 0 {
                    break;
                }
            }
            match self.exec_stmt(frame, body)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => break,
                flow @ Flow::Return(_) => return Ok(flow),
            }
            if let Some(step) = step {
                self.exec_stmt(frame, step)?;
            }
        }
        Ok(Flow::Normal)
    }

    // --- Declarations ----------------------------------------------------

    fn exec_var_decl(&mut self, frame: FrameId, decl: &VarDecl) -> Result<(), RuntimeError> {
        let value = match &decl.init {
            Some(expr) => self.eval_expr(frame, expr)?.bits,
            None => 0,
        };

        if let Some(reg) = decl.register {
            self.registers[reg as usize] = value;
            self.frames.declare(
                frame,
                decl.name.clone(),
                Slot::HardReg { reg, ty: decl.ty },
            );
            return Ok(());
        }

        let addr = self.alloc_cell(frame, &decl.pos)?;
        self.store(addr, value, &decl.pos)?;
        self.frames.declare(
            frame,
            decl.name.clone(),
            Slot::Scalar {
                addr,
                ty: decl.ty,
                volatile: decl.volatile,
            },
        );
        Ok(())
    }

    fn exec_array_decl(&mut self, frame: FrameId, decl: &ArrayDecl) -> Result<(), RuntimeError> {
        let base = if frame == self.frames.global() {
            self.memory.alloc_data(decl.len)
        } else {
            self.memory.alloc_stack(decl.len)
        }
        .ok_or_else(|| RuntimeError::OutOfMemory {
            pos: decl.pos.clone(),
        })?;

        // The stack region is reused across frames; cells start zeroed.
        for i in 0..decl.len {
            self.store(base + i * WORD, 0, &decl.pos)?;
        }
        if let Some(values) = &decl.init {
            for (i, expr) in values.iter().enumerate() {
                let value = self.eval_expr(frame, expr)?.bits;
                self.store(base + i as u32 * WORD, value, expr.pos())?;
            }
        }
        self.frames.declare(
            frame,
            decl.name.clone(),
            Slot::Array {
                base,
                len: decl.len,
                ty: decl.ty,
            },
        );
        Ok(())
    }

    fn exec_ptr_decl(&mut self, frame: FrameId, decl: &PtrDecl) -> Result<(), RuntimeError> {
        let value = match &decl.init {
            Some(expr) => self.eval_expr(frame, expr)?.bits,
            None => 0,
        };
        let addr = self.alloc_cell(frame, &decl.pos)?;
        self.store(addr, value, &decl.pos)?;
        self.frames.declare(
            frame,
            decl.name.clone(),
            Slot::Scalar {
                addr,
                ty: Ty::Ptr,
                volatile: decl.volatile,
            },
        );
        Ok(())
    }

    fn alloc_cell(&mut self, frame: FrameId, pos: &Pos) -> Result<u32, RuntimeError> {
        let addr = if frame == self.frames.global() {
            self.memory.alloc_data(1)
        } else {
            self.memory.alloc_stack(1)
        };
        addr.ok_or_else(|| RuntimeError::OutOfMemory { pos: pos.clone() })
    }

    /// `++x` / `--x`. Pointers step by one 4-byte cell, like `p = p + 1`.
    fn step_var(
        &mut self,
        frame: FrameId,
        name: &SmolStr,
        pos: &Pos,
        up: bool,
    ) -> Result<(), RuntimeError> {
        let current = self.read_var(frame, name, pos)?;
        let delta = if current.ty == Ty::Ptr { WORD } else { 1 };
        let bits = if up {
            current.bits.wrapping_add(delta)
        } else {
            current.bits.wrapping_sub(delta)
        };
        self.write_var(frame, name, bits, pos)
    }

    // --- Expressions -----------------------------------------------------

    fn eval_expr(&mut self, frame: FrameId, expr: &Expr) -> Result<Word, RuntimeError> {
        match expr {
            Expr::Literal { value, .. } => Ok(Word::unsigned(*value)),
            Expr::Ident { name, pos } => self.read_var(frame, name, pos),
            Expr::Binary { op, lhs, rhs, pos } => match op {
                // Short-circuit: the right operand only runs if needed.
                BinOp::LogicalAnd => {
                    if self.eval_expr(frame, lhs)?.bits == 0 {
                        return Ok(Word::unsigned(0));
                    }
                    let rhs = self.eval_expr(frame, rhs)?;
                    Ok(Word::unsigned((rhs.bits != 0) as u32))
                }
                BinOp::LogicalOr => {
                    if self.eval_expr(frame, lhs)?.bits != 0 {
                        return Ok(Word::unsigned(1));
                    }
                    let rhs = self.eval_expr(frame, rhs)?;
                    Ok(Word::unsigned((rhs.bits != 0) as u32))
                }
                _ => {
                    let l = self.eval_expr(frame, lhs)?;
                    let r = self.eval_expr(frame, rhs)?;
                    self.apply_binop(*op, l, r, pos)
                }
            },
            Expr::Unary { op, operand, .. } => {
                let word = self.eval_expr(frame, operand)?;
                Ok(match op {
                    UnOp::Not => Word::unsigned((word.bits == 0) as u32),
                    UnOp::BitNot => Word {
                        bits: !word.bits,
                        ty: word.ty,
                    },
                    UnOp::Neg => Word {
                        bits: word.bits.wrapping_neg(),
                        ty: Ty::I32,
                    },
                })
            }
            Expr::Call(call) => self.eval_call(frame, call),
            Expr::Index { name, index, pos } => {
                let index = self.eval_expr(frame, index)?.bits;
                let (addr, ty) = self.array_elem_addr(frame, name, index, pos)?;
                Ok(Word {
                    bits: self.load(addr, pos)?,
                    ty,
                })
            }
            Expr::AddrOf { target, pos } => {
                let addr = self.lvalue_addr(frame, target, pos)?;
                Ok(Word {
                    bits: addr,
                    ty: Ty::Ptr,
                })
            }
            Expr::Deref { addr, pos } => {
                let addr = self.eval_expr(frame, addr)?.bits;
                Ok(Word::unsigned(self.load(addr, pos)?))
            }
        }
    }

    fn apply_binop(
        &self,
        op: BinOp,
        l: Word,
        r: Word,
        pos: &Pos,
    ) -> Result<Word, RuntimeError> {
        use BinOp as B;

        let ty = l.ty.combine(r.ty);
        let signed = l.ty.is_signed() || r.ty.is_signed();

        let word = match op {
            B::Add => {
                // Pointer arithmetic scales the integer side by the
                // 4-byte cell size; raw integers add unscaled.
                if l.ty == Ty::Ptr && r.ty != Ty::Ptr {
                    Word {
                        bits: l.bits.wrapping_add(r.bits.wrapping_mul(WORD)),
                        ty: Ty::Ptr,
                    }
                } else if r.ty == Ty::Ptr && l.ty != Ty::Ptr {
                    Word {
                        bits: r.bits.wrapping_add(l.bits.wrapping_mul(WORD)),
                        ty: Ty::Ptr,
                    }
                } else {
                    Word {
                        bits: l.bits.wrapping_add(r.bits),
                        ty,
                    }
                }
            }
            B::Sub => {
                if l.ty == Ty::Ptr && r.ty != Ty::Ptr {
                    Word {
                        bits: l.bits.wrapping_sub(r.bits.wrapping_mul(WORD)),
                        ty: Ty::Ptr,
                    }
                } else {
                    Word {
                        bits: l.bits.wrapping_sub(r.bits),
                        ty,
                    }
                }
            }
            B::Mul => Word {
                bits: l.bits.wrapping_mul(r.bits),
                ty,
            },
            B::Div => {
                if r.bits == 0 {
                    return Err(RuntimeError::DivideByZero { pos: pos.clone() });
                }
                let bits = if signed {
                    (l.bits as i32).wrapping_div(r.bits as i32) as u32
                } else {
                    l.bits / r.bits
                };
                Word { bits, ty }
            }
            B::Rem => {
                if r.bits == 0 {
                    return Err(RuntimeError::DivideByZero { pos: pos.clone() });
                }
                let bits = if signed {
                    (l.bits as i32).wrapping_rem(r.bits as i32) as u32
                } else {
                    l.bits % r.bits
                };
                Word { bits, ty }
            }
            B::BitAnd => Word {
                bits: l.bits & r.bits,
                ty,
            },
            B::BitOr => Word {
                bits: l.bits | r.bits,
                ty,
            },
            B::BitXor => Word {
                bits: l.bits ^ r.bits,
                ty,
            },
            B::Shl => Word {
                bits: l.bits.wrapping_shl(r.bits & 0x1F),
                ty,
            },
            B::Shr => Word {
                bits: l.bits.wrapping_shr(r.bits & 0x1F),
                ty,
            },
            B::Eq => Word::unsigned((l.bits == r.bits) as u32),
            B::Ne => Word::unsigned((l.bits != r.bits) as u32),
            B::Lt => Word::unsigned(compare(l.bits, r.bits, signed, |o| o.is_lt())),
            B::Le => Word::unsigned(compare(l.bits, r.bits, signed, |o| o.is_le())),
            B::Gt => Word::unsigned(compare(l.bits, r.bits, signed, |o| o.is_gt())),
            B::Ge => Word::unsigned(compare(l.bits, r.bits, signed, |o| o.is_ge())),
            // Non-short-circuit forms, reached from compound contexts.
            B::LogicalAnd => Word::unsigned((l.bits != 0 && r.bits != 0) as u32),
            B::LogicalOr => Word::unsigned((l.bits != 0 || r.bits != 0) as u32),
        };
        Ok(word)
    }

    // --- Storage ---------------------------------------------------------

    fn slot(&self, frame: FrameId, name: &str) -> Option<Slot> {
        self.frames.lookup(frame, name).cloned()
    }

    fn read_var(
        &mut self,
        frame: FrameId,
        name: &SmolStr,
        pos: &Pos,
    ) -> Result<Word, RuntimeError> {
        match self.slot(frame, name) {
            Some(Slot::Scalar { addr, ty, .. }) => Ok(Word {
                bits: self.load(addr, pos)?,
                ty,
            }),
            // An array name decays to its base address.
            Some(Slot::Array { base, .. }) => Ok(Word {
                bits: base,
                ty: Ty::Ptr,
            }),
            Some(Slot::HardReg { reg, ty }) => Ok(Word {
                bits: self.registers[reg as usize],
                ty,
            }),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    fn write_var(
        &mut self,
        frame: FrameId,
        name: &SmolStr,
        bits: u32,
        pos: &Pos,
    ) -> Result<(), RuntimeError> {
        match self.slot(frame, name) {
            Some(Slot::Scalar { addr, .. }) => self.store(addr, bits, pos),
            Some(Slot::HardReg { reg, .. }) => {
                self.registers[reg as usize] = bits;
                Ok(())
            }
            Some(Slot::Array { .. }) => Err(RuntimeError::AssignToArray {
                name: name.clone(),
                pos: pos.clone(),
            }),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    fn read_lvalue(&mut self, frame: FrameId, target: &LValue) -> Result<Word, RuntimeError> {
        match target {
            LValue::Name { name, pos } => self.read_var(frame, name, pos),
            LValue::Index { name, index, pos } => {
                let index = self.eval_expr(frame, index)?.bits;
                let (addr, ty) = self.array_elem_addr(frame, name, index, pos)?;
                Ok(Word {
                    bits: self.load(addr, pos)?,
                    ty,
                })
            }
            LValue::Deref { addr, pos } => {
                let addr = self.eval_expr(frame, addr)?.bits;
                Ok(Word::unsigned(self.load(addr, pos)?))
            }
        }
    }

    fn write_lvalue(
        &mut self,
        frame: FrameId,
        target: &LValue,
        bits: u32,
    ) -> Result<(), RuntimeError> {
        match target {
            LValue::Name { name, pos } => self.write_var(frame, name, bits, pos),
            LValue::Index { name, index, pos } => {
                let index = self.eval_expr(frame, index)?.bits;
                let (addr, _) = self.array_elem_addr(frame, name, index, pos)?;
                self.store(addr, bits, pos)
            }
            LValue::Deref { addr, pos } => {
                let addr = self.eval_expr(frame, addr)?.bits;
                self.store(addr, bits, pos)
            }
        }
    }

    /// Address of `name[index]`, bounds-checked against the declared
    /// length.
    fn array_elem_addr(
        &mut self,
        frame: FrameId,
        name: &SmolStr,
        index: u32,
        pos: &Pos,
    ) -> Result<(u32, Ty), RuntimeError> {
        match self.slot(frame, name) {
            Some(Slot::Array { base, len, ty }) => {
                if index >= len {
                    return Err(RuntimeError::IndexOutOfBounds {
                        name: name.clone(),
                        index,
                        len,
                        pos: pos.clone(),
                    });
                }
                Ok((base + index * WORD, ty))
            }
            Some(_) => Err(RuntimeError::NotAnArray {
                name: name.clone(),
                pos: pos.clone(),
            }),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    fn lvalue_addr(
        &mut self,
        frame: FrameId,
        target: &LValue,
        _pos: &Pos,
    ) -> Result<u32, RuntimeError> {
        match target {
            LValue::Name { name, pos } => match self.slot(frame, name) {
                Some(Slot::Scalar { addr, .. }) => Ok(addr),
                Some(Slot::Array { base, .. }) => Ok(base),
                Some(Slot::HardReg { .. }) => Err(RuntimeError::AddressOfRegister {
                    name: name.clone(),
                    pos: pos.clone(),
                }),
                None => Err(RuntimeError::UndefinedVariable {
                    name: name.clone(),
                    pos: pos.clone(),
                }),
            },
            LValue::Index { name, index, pos } => {
                let index = self.eval_expr(frame, index)?.bits;
                let (addr, _) = self.array_elem_addr(frame, name, index, pos)?;
                Ok(addr)
            }
            LValue::Deref { addr, .. } => Ok(self.eval_expr(frame, addr)?.bits),
        }
    }

    fn load(&self, addr: u32, pos: &Pos) -> Result<u32, RuntimeError> {
        self.memory
            .load(addr)
            .ok_or_else(|| RuntimeError::MemoryTrap {
                address: addr,
                pos: pos.clone(),
            })
    }

    fn store(&mut self, addr: u32, value: u32, pos: &Pos) -> Result<(), RuntimeError> {
        self.memory
            .store(addr, value)
            .ok_or_else(|| RuntimeError::MemoryTrap {
                address: addr,
                pos: pos.clone(),
            })
    }

    // --- Calls and intrinsics --------------------------------------------

    fn eval_call(&mut self, frame: FrameId, call: &FuncCall) -> Result<Word, RuntimeError> {
        if let Some(arity) = intrinsic_arity(&call.name) {
            if call.args.len() != arity {
                return Err(RuntimeError::WrongArity {
                    name: call.name.clone(),
                    expected: arity,
                    found: call.args.len(),
                    pos: call.pos.clone(),
                });
            }
            let mut args = Vec::with_capacity(arity);
            for arg in &call.args {
                args.push(self.eval_expr(frame, arg)?.bits);
            }
            return self
                .call_intrinsic(&call.name, &args, &call.pos)
                .map(Word::unsigned);
        }

        let func = match self.functions.get(call.name.as_str()) {
            Some(func) => *func,
            None => {
                return Err(RuntimeError::UndefinedFunction {
                    name: call.name.clone(),
                    pos: call.pos.clone(),
                })
            }
        };
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.eval_expr(frame, arg)?.bits);
        }
        self.call_function(func, &args, &call.pos)
            .map(Word::unsigned)
    }

    fn call_intrinsic(
        &mut self,
        name: &str,
        args: &[u32],
        pos: &Pos,
    ) -> Result<u32, RuntimeError> {
        let value = match name {
            "uart_set_baud" => {
                self.periph.uart.baud = args[0];
                0
            }
            "uart_get_status" => {
                let rx_ready = self.devices.uart_rx_ready() as u32;
                self.periph.uart.tx_ready as u32 | rx_ready << 1
            }
            "uart_read" => match self.devices.uart_rx() {
                Some(byte) => byte as u32,
                None => 0,
            },
            "uart_write" => {
                let byte = (args[0] & 0xFF) as u8;
                trace!("uart tx {:#04x}", byte);
                self.devices.uart_tx(byte);
                0
            }
            "gpio_set" => {
                let pin = self.pin(args[0], pos)?;
                self.periph.gpio[pin] = GpioPin {
                    configured: true,
                    direction: args[1],
                    mode: args[2],
                    value: 0,
                };
                0
            }
            "gpio_read" => {
                let pin = self.pin(args[0], pos)?;
                if !self.periph.gpio[pin].configured {
                    return Err(RuntimeError::UnconfiguredPin {
                        pin: args[0],
                        pos: pos.clone(),
                    });
                }
                self.periph.gpio[pin].value
            }
            "gpio_write" => {
                let pin = self.pin(args[0], pos)?;
                if !self.periph.gpio[pin].configured {
                    return Err(RuntimeError::UnconfiguredPin {
                        pin: args[0],
                        pos: pos.clone(),
                    });
                }
                self.periph.gpio[pin].value = args[1] & 1;
                0
            }
            "timer_set_mode" => {
                self.periph.timer.mode = args[0];
                0
            }
            "timer_set_period" => {
                self.periph.timer.period = args[0];
                0
            }
            "timer_start" => {
                self.periph.timer.running = true;
                self.periph.timer.value = 0;
                0
            }
            "timer_stop" => {
                self.periph.timer.running = false;
                0
            }
            "timer_reset" => {
                self.periph.timer.value = 0;
                0
            }
            "timer_get_value" => {
                self.tick_timer();
                self.periph.timer.value
            }
            "timer_expired" => {
                // Polling advances the emulated clock, so a wait loop
                // always terminates.
                self.tick_timer();
                let timer = &self.periph.timer;
                (timer.running && timer.period > 0 && timer.value >= timer.period) as u32
            }
            "enable_interrupts" => {
                self.periph.interrupts_enabled = true;
                0
            }
            "disable_interrupts" => {
                self.periph.interrupts_enabled = false;
                0
            }
            "set_bit" => args[0] | 1u32.wrapping_shl(args[1] & 0x1F),
            "clear_bit" => args[0] & !1u32.wrapping_shl(args[1] & 0x1F),
            "toggle_bit" => args[0] ^ 1u32.wrapping_shl(args[1] & 0x1F),
            "get_bit" => (args[0] & 1u32.wrapping_shl(args[1] & 0x1F) != 0) as u32,
            // No wall-clock delays in the simulator.
            "delay_ms" | "delay_us" | "delay_cycles" => 0,
            _ => {
                return Err(RuntimeError::UndefinedFunction {
                    name: SmolStr::new(name),
                    pos: pos.clone(),
                })
            }
        };
        Ok(value)
    }

    fn tick_timer(&mut self) {
        if self.periph.timer.running {
            self.periph.timer.value = self
                .periph
                .timer
                .value
                .wrapping_add(self.conf.timer_tick.max(1));
        }
    }

    fn pin(&self, pin: u32, pos: &Pos) -> Result<usize, RuntimeError> {
        if pin < 32 {
            Ok(pin as usize)
        } else {
            Err(RuntimeError::PinOutOfRange {
                pin,
                pos: pos.clone(),
            })
        }
    }
}

/// 0/1 comparison result, signed or unsigned as the operands dictate.
fn compare(l: u32, r: u32, signed: bool, check: fn(std::cmp::Ordering) -> bool) -> u32 {
    let ordering = if signed {
        (l as i32).cmp(&(r as i32))
    } else {
        l.cmp(&r)
    };
    check(ordering) as u32
}
