//! Assembly code generator.
//!
//! Lowers the AST into a textual listing for the external assembler:
//! a `format binary` header, an ISA include, a data section for
//! globals, then per-function code with `main` first. Control flow is
//! label-based, with conditional moves into `r31`; the software stack
//! grows downward through `r30` in 4-byte cells. Output is fully
//! deterministic, including label numbering.
mod registers;

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;

use crate::{
    ast::{
        ArrayDecl, BinOp, Expr, FuncCall, FuncDef, Global, LValue, Program, PtrDecl, Stmt, Ty,
        UnOp, VarDecl,
    },
    error::{CodegenError, Pos},
    interp::intrinsic_arity,
};

use self::registers::RegisterPool;
pub use self::registers::{ARG_FIRST, LOCAL_FIRST, LOCAL_LAST, PC, SP, TEMP_FIRST, TEMP_LAST};

/// Size of one stack cell in bytes.
const WORD: u32 = 4;

/// Code generator tuning.
#[derive(Debug, Clone)]
pub struct CodegenConf {
    /// Path written into the `include` directive of the listing.
    pub isa_include: String,
    /// Initial value of the stack pointer, loaded in `main`'s prologue.
    pub stack_top: u32,
}

impl Default for CodegenConf {
    fn default() -> Self {
        Self {
            isa_include: "ISA.inc".to_string(),
            stack_top: 0x10000,
        }
    }
}

/// Where a name lives during lowering.
#[derive(Debug, Clone)]
enum Binding {
    /// Local scalar held in a local-class register.
    Reg { reg: u8, ty: Ty },
    /// Stack cell, `offset` bytes below the frame's link cell.
    /// Negative offsets address caller-pushed cells above the link.
    Stack { offset: i32, ty: Ty },
    StackArray { offset: i32, len: u32, ty: Ty },
    Global { ty: Ty },
    GlobalArray { len: u32, ty: Ty },
    /// `register`-qualified variable pinned to a hardware register.
    HardReg { reg: u8, ty: Ty },
}

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<SmolStr, Binding>,
    /// Local registers to release at scope exit, in allocation order.
    regs: Vec<u8>,
    /// Stack bytes to pop at scope exit.
    stack_bytes: u32,
}

#[derive(Debug, Clone)]
struct LoopLabels {
    break_label: String,
    continue_label: String,
    /// Frame depth at loop entry; break/continue rewind to it.
    depth: u32,
}

pub struct CodeGen<'a> {
    program: &'a Program,
    conf: CodegenConf,
    data: Vec<String>,
    code: Vec<String>,
    label_counters: HashMap<&'static str, u32>,
    pool: RegisterPool,
    scopes: Vec<Scope>,
    loop_stack: Vec<LoopLabels>,
    /// Bytes the current function has allocated below its link cell at
    /// the current emission point. Statically tracked; stack-relative
    /// addressing depends on it.
    frame_depth: u32,
    current_fn: SmolStr,
    is_main: bool,
    /// Scalars whose address is taken somewhere in the current
    /// function; they live on the stack instead of in registers.
    addr_taken: HashSet<SmolStr>,
    user_functions: HashSet<SmolStr>,
    /// Register-qualified globals, reserved in every function.
    global_hard_regs: Vec<u8>,
    /// `register` globals with literal initializers, loaded in `main`'s
    /// prologue.
    pending_reg_inits: Vec<(u8, u32)>,
    needs_udiv: bool,
    needs_umod: bool,
}

impl<'a> CodeGen<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_conf(program, CodegenConf::default())
    }

    pub fn with_conf(program: &'a Program, conf: CodegenConf) -> Self {
        Self {
            program,
            conf,
            data: Vec::new(),
            code: Vec::new(),
            label_counters: HashMap::new(),
            pool: RegisterPool::new(),
            scopes: Vec::new(),
            loop_stack: Vec::new(),
            frame_depth: 0,
            current_fn: SmolStr::new(""),
            is_main: false,
            addr_taken: HashSet::new(),
            user_functions: HashSet::new(),
            global_hard_regs: Vec::new(),
            pending_reg_inits: Vec::new(),
            needs_udiv: false,
            needs_umod: false,
        }
    }

    /// Produce the complete listing.
    pub fn generate(mut self) -> Result<String, CodegenError> {
        let program = self.program;
        self.user_functions = program.functions().map(|f| f.name.clone()).collect();

        self.scopes.push(Scope::default());
        self.gen_globals()?;

        let main = match program.functions().find(|f| f.name == "main") {
            Some(main) => main,
            None => {
                return Err(CodegenError::UndefinedFunction {
                    name: SmolStr::new("main"),
                    pos: Pos {
                        file: SmolStr::new(""),
                        line: 1,
                        column: 1,
                    },
                })
            }
        };
        self.gen_function(main)?;
        for func in program.functions() {
            if func.name != "main" {
                self.gen_function(func)?;
            }
        }

        if self.needs_udiv {
            self.emit_udiv();
        }
        if self.needs_umod {
            self.emit_umod();
        }

        let mut out = String::new();
        out.push_str("format binary\n");
        out.push_str(&format!("include \"{}\"\n", self.conf.isa_include));
        out.push('\n');
        // Execution starts at the top of the image; hop over the data
        // section into the entry function.
        out.push_str("\tmov r31, main addr\n");
        if !self.data.is_empty() {
            out.push('\n');
            out.push_str("; data\n");
            for line in &self.data {
                out.push_str(line);
                out.push('\n');
            }
        }
        for line in &self.code {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    // --- Globals ---------------------------------------------------------

    fn gen_globals(&mut self) -> Result<(), CodegenError> {
        let program = self.program;
        for global in program.globals() {
            match global {
                Global::Var(decl) => self.gen_global_var(decl)?,
                Global::Ptr(decl) => self.gen_global_ptr(decl)?,
                Global::Array(decl) => self.gen_global_array(decl)?,
            }
        }
        Ok(())
    }

    fn gen_global_var(&mut self, decl: &VarDecl) -> Result<(), CodegenError> {
        let value = self.const_init(decl.init.as_ref(), &decl.name, &decl.pos)?;
        if let Some(reg) = decl.register {
            self.global_hard_regs.push(reg);
            self.pending_reg_inits.push((reg, value));
            self.bind_global(decl.name.clone(), Binding::HardReg { reg, ty: decl.ty });
            return Ok(());
        }
        self.data.push(format!("{} dd {}", decl.name, value));
        self.bind_global(decl.name.clone(), Binding::Global { ty: decl.ty });
        Ok(())
    }

    fn gen_global_ptr(&mut self, decl: &PtrDecl) -> Result<(), CodegenError> {
        let value = self.const_init(decl.init.as_ref(), &decl.name, &decl.pos)?;
        self.data.push(format!("{} dd {}", decl.name, value));
        self.bind_global(decl.name.clone(), Binding::Global { ty: Ty::Ptr });
        Ok(())
    }

    fn gen_global_array(&mut self, decl: &ArrayDecl) -> Result<(), CodegenError> {
        let mut values = vec![0u32; decl.len as usize];
        if let Some(init) = &decl.init {
            for (i, expr) in init.iter().enumerate() {
                values[i] = match expr {
                    Expr::Literal { value, .. } => *value,
                    other => {
                        return Err(CodegenError::NonConstantInit {
                            name: decl.name.clone(),
                            pos: other.pos().clone(),
                        })
                    }
                };
            }
        }
        let rendered = values
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.data.push(format!("{} dd {}", decl.name, rendered));
        self.bind_global(
            decl.name.clone(),
            Binding::GlobalArray {
                len: decl.len,
                ty: decl.ty,
            },
        );
        Ok(())
    }

    /// Globals get zero or constant initializers in the data section.
    fn const_init(
        &self,
        init: Option<&Expr>,
        name: &SmolStr,
        pos: &Pos,
    ) -> Result<u32, CodegenError> {
        match init {
            None => Ok(0),
            Some(Expr::Literal { value, .. }) => Ok(*value),
            Some(other) => Err(CodegenError::NonConstantInit {
                name: name.clone(),
                pos: other.pos().clone(),
            }),
        }
    }

    fn bind_global(&mut self, name: SmolStr, binding: Binding) {
        self.scopes[0].bindings.insert(name, binding);
    }

    // --- Functions -------------------------------------------------------

    fn gen_function(&mut self, func: &'a FuncDef) -> Result<(), CodegenError> {
        self.pool = RegisterPool::new();
        for reg in &self.global_hard_regs {
            self.pool.reserve(*reg);
        }
        self.frame_depth = 0;
        self.loop_stack.clear();
        self.current_fn = func.name.clone();
        self.is_main = func.name == "main";
        self.addr_taken = collect_addr_taken(func);

        self.blank();
        if self.is_main {
            self.emit_label("main");
        } else {
            let label = format!("func_{}", func.name);
            self.emit_label(&label);
        }
        self.emit_comment(&format!("function {}", func.name));

        self.push_scope();

        if self.is_main {
            self.emit(format!("mov r30, {}", self.conf.stack_top));
            let inits = std::mem::take(&mut self.pending_reg_inits);
            for (reg, value) in inits {
                self.emit(format!("mov r{}, {}", reg, value));
            }
        } else {
            if func.params.len() > 5 {
                return Err(CodegenError::TooManyParams {
                    function: func.name.clone(),
                    pos: func.pos.clone(),
                });
            }
            for (i, param) in func.params.iter().enumerate() {
                if i == 4 {
                    // The fifth argument travels on the stack, in the
                    // cell the caller pushed just above the link.
                    self.bind(
                        param.clone(),
                        Binding::Stack {
                            offset: -(WORD as i32),
                            ty: Ty::U32,
                        },
                    );
                    continue;
                }
                let arg_reg = ARG_FIRST + i as u8;
                if !self.addr_taken.contains(param) {
                    if let Some(reg) = self.pool.alloc_local() {
                        self.scope_regs_push(reg);
                        self.emit(format!("mov r{}, r{}", reg, arg_reg));
                        self.bind(param.clone(), Binding::Reg { reg, ty: Ty::U32 });
                        continue;
                    }
                }
                self.emit(format!("sub r30, r30, {}", WORD));
                self.frame_depth += WORD;
                self.scope_stack_grow(WORD);
                self.emit(format!("lds [r30], r{}", arg_reg));
                self.bind(
                    param.clone(),
                    Binding::Stack {
                        offset: self.frame_depth as i32,
                        ty: Ty::U32,
                    },
                );
            }
        }

        for stmt in &func.body.stmts {
            self.gen_stmt(stmt)?;
        }

        let explicit_return = matches!(func.body.stmts.last(), Some(Stmt::Return { .. }));
        if explicit_return {
            self.pop_scope_silent();
        } else {
            self.pop_scope();
            self.emit_comment("implicit return 0");
            self.emit("mov r0, 0");
            self.gen_epilogue();
        }
        Ok(())
    }

    /// Return to the caller. The link sits in the frame's first cell;
    /// `r10` is free for the reload because every live value is either
    /// dead or caller-saved at this point.
    fn gen_epilogue(&mut self) {
        if self.is_main {
            self.emit("hlt");
        } else {
            self.emit("lds r10, [r30]");
            self.emit(format!("add r30, r30, {}", WORD));
            self.emit("mov r31, r10");
        }
    }

    // --- Statements ------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Var(decl) => self.gen_var_decl(decl),
            Stmt::Ptr(decl) => self.gen_ptr_decl(decl),
            Stmt::Array(decl) => self.gen_array_decl(decl),
            Stmt::Assign { target, value, .. } => {
                let value = self.gen_expr(value)?;
                self.store_lvalue(target, value)?;
                self.release(value);
                Ok(())
            }
            Stmt::CompoundAssign {
                target, op, value, ..
            } => {
                let target_ty = self.lvalue_ty(target);
                let value_ty = self.expr_ty(value);
                let current = self.load_lvalue(target)?;
                let rhs = self.gen_expr(value)?;
                let result = self.gen_binop(*op, current, rhs, target_ty, value_ty)?;
                self.store_lvalue(target, result)?;
                self.release(result);
                Ok(())
            }
            Stmt::Incr { name, pos } => self.gen_step(name, pos, true),
            Stmt::Decr { name, pos } => self.gen_step(name, pos, false),
            Stmt::Call(call) => {
                let result = self.gen_call(call)?;
                self.release(result);
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let cond = self.gen_expr(cond)?;
                let end = self.label("if_end");
                match else_branch {
                    Some(else_branch) => {
                        let else_label = self.label("if_else");
                        self.emit(format!("cmovz r31, r{}, {} addr", cond, else_label));
                        self.release(cond);
                        self.gen_stmt(then_branch)?;
                        self.emit(format!("mov r31, {} addr", end));
                        self.emit_label(&else_label);
                        self.gen_stmt(else_branch)?;
                    }
                    None => {
                        self.emit(format!("cmovz r31, r{}, {} addr", cond, end));
                        self.release(cond);
                        self.gen_stmt(then_branch)?;
                    }
                }
                self.emit_label(&end);
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                let start = self.label("while_start");
                let end = self.label("while_end");
                self.emit_label(&start);
                let cond = self.gen_expr(cond)?;
                self.emit(format!("cmovz r31, r{}, {} addr", cond, end));
                self.release(cond);
                self.loop_stack.push(LoopLabels {
                    break_label: end.clone(),
                    continue_label: start.clone(),
                    depth: self.frame_depth,
                });
                self.gen_stmt(body)?;
                self.loop_stack.pop();
                self.emit(format!("mov r31, {} addr", start));
                self.emit_label(&end);
                Ok(())
            }
            Stmt::DoWhile { body, cond, .. } => {
                let start = self.label("do_start");
                let cond_label = self.label("do_cond");
                let end = self.label("do_end");
                self.emit_label(&start);
                self.loop_stack.push(LoopLabels {
                    break_label: end.clone(),
                    continue_label: cond_label.clone(),
                    depth: self.frame_depth,
                });
                self.gen_stmt(body)?;
                self.loop_stack.pop();
                self.emit_label(&cond_label);
                let cond = self.gen_expr(cond)?;
                self.emit(format!("cmovnz r31, r{}, {} addr", cond, start));
                self.release(cond);
                self.emit_label(&end);
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.push_scope();
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                let start = self.label("for_start");
                let step_label = self.label("for_step");
                let end = self.label("for_end");
                self.emit_label(&start);
                if let Some(cond) = cond {
                    let cond = self.gen_expr(cond)?;
                    self.emit(format!("cmovz r31, r{}, {} addr", cond, end));
                    self.release(cond);
                }
                self.loop_stack.push(LoopLabels {
                    break_label: end.clone(),
                    continue_label: step_label.clone(),
                    depth: self.frame_depth,
                });
                self.gen_stmt(body)?;
                self.loop_stack.pop();
                self.emit_label(&step_label);
                if let Some(step) = step {
                    self.gen_stmt(step)?;
                }
                self.emit(format!("mov r31, {} addr", start));
                self.emit_label(&end);
                self.pop_scope();
                Ok(())
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(expr) => {
                        let value = self.gen_expr(expr)?;
                        self.emit(format!("mov r0, r{}", value));
                        self.release(value);
                    }
                    None => self.emit("mov r0, 0"),
                }
                if self.frame_depth > 0 {
                    self.emit(format!("add r30, r30, {}", self.frame_depth));
                }
                self.gen_epilogue();
                Ok(())
            }
            Stmt::Break { .. } => {
                if let Some(labels) = self.loop_stack.last().cloned() {
                    self.rewind_to(labels.depth);
                    self.emit(format!("mov r31, {} addr", labels.break_label));
                }
                Ok(())
            }
            Stmt::Continue { .. } => {
                if let Some(labels) = self.loop_stack.last().cloned() {
                    self.rewind_to(labels.depth);
                    self.emit(format!("mov r31, {} addr", labels.continue_label));
                }
                Ok(())
            }
            Stmt::Block(block) => {
                self.push_scope();
                for stmt in &block.stmts {
                    self.gen_stmt(stmt)?;
                }
                self.pop_scope();
                Ok(())
            }
            Stmt::Asm { body, pos } => {
                self.emit_comment(&format!("asm block ({}:{})", pos.file, pos.line));
                for line in body.lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        self.emit(line);
                    }
                }
                self.emit_comment("end asm block");
                Ok(())
            }
        }
    }

    /// Pop stack cells opened since the given frame depth, without
    /// touching the static bookkeeping (the fall-through path still
    /// owns them).
    fn rewind_to(&mut self, depth: u32) {
        if self.frame_depth > depth {
            self.emit(format!("add r30, r30, {}", self.frame_depth - depth));
        }
    }

    fn gen_var_decl(&mut self, decl: &VarDecl) -> Result<(), CodegenError> {
        if let Some(reg) = decl.register {
            self.pool.reserve(reg);
            self.bind(decl.name.clone(), Binding::HardReg { reg, ty: decl.ty });
            if let Some(init) = &decl.init {
                let value = self.gen_expr(init)?;
                if value != reg {
                    self.emit(format!("mov r{}, r{}", reg, value));
                }
                self.release(value);
            }
            return Ok(());
        }
        self.gen_scalar_decl(&decl.name, decl.ty, decl.init.as_ref())
    }

    fn gen_ptr_decl(&mut self, decl: &PtrDecl) -> Result<(), CodegenError> {
        self.gen_scalar_decl(&decl.name, Ty::Ptr, decl.init.as_ref())
    }

    fn gen_scalar_decl(
        &mut self,
        name: &SmolStr,
        ty: Ty,
        init: Option<&Expr>,
    ) -> Result<(), CodegenError> {
        if !self.addr_taken.contains(name) {
            if let Some(reg) = self.pool.alloc_local() {
                self.scope_regs_push(reg);
                match init {
                    Some(expr) => {
                        let value = self.gen_expr(expr)?;
                        if value != reg {
                            self.emit(format!("mov r{}, r{}", reg, value));
                        }
                        self.release(value);
                    }
                    None => self.emit(format!("mov r{}, 0", reg)),
                }
                self.bind(name.clone(), Binding::Reg { reg, ty });
                return Ok(());
            }
        }

        // Address taken, or the local pool ran dry: spill to a stack
        // cell. The initializer runs before the cell opens so stack
        // addressing inside it stays consistent.
        let value = match init {
            Some(expr) => Some(self.gen_expr(expr)?),
            None => None,
        };
        self.emit(format!("sub r30, r30, {}", WORD));
        self.frame_depth += WORD;
        self.scope_stack_grow(WORD);
        match value {
            Some(value) => {
                self.emit(format!("lds [r30], r{}", value));
                self.release(value);
            }
            None => {
                let zero = self.alloc_temp()?;
                self.emit(format!("mov r{}, 0", zero));
                self.emit(format!("lds [r30], r{}", zero));
                self.pool.release_temp(zero);
            }
        }
        self.bind(
            name.clone(),
            Binding::Stack {
                offset: self.frame_depth as i32,
                ty,
            },
        );
        Ok(())
    }

    fn gen_array_decl(&mut self, decl: &ArrayDecl) -> Result<(), CodegenError> {
        let bytes = decl.len * WORD;
        self.emit(format!("sub r30, r30, {}", bytes));
        self.frame_depth += bytes;
        self.scope_stack_grow(bytes);

        // Stack cells are reused; every element gets a defined value.
        let empty = Vec::new();
        let init = decl.init.as_ref().unwrap_or(&empty);
        for i in 0..decl.len {
            let value = match init.get(i as usize) {
                Some(expr) => self.gen_expr(expr)?,
                None => {
                    let zero = self.alloc_temp()?;
                    self.emit(format!("mov r{}, 0", zero));
                    zero
                }
            };
            let addr = self.alloc_temp()?;
            self.emit(format!("mov r{}, r30", addr));
            if i > 0 {
                self.emit(format!("add r{}, r{}, {}", addr, addr, i * WORD));
            }
            self.emit(format!("lds [r{}], r{}", addr, value));
            self.pool.release_temp(addr);
            self.release(value);
        }

        self.bind(
            decl.name.clone(),
            Binding::StackArray {
                offset: self.frame_depth as i32,
                len: decl.len,
                ty: decl.ty,
            },
        );
        Ok(())
    }

    /// `++name;` / `--name;`. Pointers step by one 4-byte cell.
    fn gen_step(&mut self, name: &SmolStr, pos: &Pos, up: bool) -> Result<(), CodegenError> {
        let op = if up { "add" } else { "sub" };
        match self.binding(name) {
            Some(Binding::Reg { reg, ty }) | Some(Binding::HardReg { reg, ty }) => {
                let delta = if ty == Ty::Ptr { WORD } else { 1 };
                self.emit(format!("{} r{}, r{}, {}", op, reg, reg, delta));
                Ok(())
            }
            Some(Binding::Stack { offset, ty }) => {
                let delta = if ty == Ty::Ptr { WORD } else { 1 };
                let addr = self.stack_addr(offset)?;
                let value = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", value, addr));
                self.emit(format!("{} r{}, r{}, {}", op, value, value, delta));
                self.emit(format!("lds [r{}], r{}", addr, value));
                self.pool.release_temp(value);
                self.pool.release_temp(addr);
                Ok(())
            }
            Some(Binding::Global { ty }) => {
                let delta = if ty == Ty::Ptr { WORD } else { 1 };
                let addr = self.alloc_temp()?;
                self.emit(format!("mov r{}, {} addr", addr, name));
                let value = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", value, addr));
                self.emit(format!("{} r{}, r{}, {}", op, value, value, delta));
                self.emit(format!("lds [r{}], r{}", addr, value));
                self.pool.release_temp(value);
                self.pool.release_temp(addr);
                Ok(())
            }
            Some(Binding::StackArray { .. }) | Some(Binding::GlobalArray { .. }) => {
                Err(CodegenError::InvalidAssignTarget {
                    name: name.clone(),
                    pos: pos.clone(),
                })
            }
            None => Err(CodegenError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    // --- L-values --------------------------------------------------------

    fn store_lvalue(&mut self, target: &LValue, value: u8) -> Result<(), CodegenError> {
        match target {
            LValue::Name { name, pos } => match self.binding(name) {
                Some(Binding::Reg { reg, .. }) | Some(Binding::HardReg { reg, .. }) => {
                    if reg != value {
                        self.emit(format!("mov r{}, r{}", reg, value));
                    }
                    Ok(())
                }
                Some(Binding::Stack { offset, .. }) => {
                    let addr = self.stack_addr(offset)?;
                    self.emit(format!("lds [r{}], r{}", addr, value));
                    self.pool.release_temp(addr);
                    Ok(())
                }
                Some(Binding::Global { .. }) => {
                    let addr = self.alloc_temp()?;
                    self.emit(format!("mov r{}, {} addr", addr, name));
                    self.emit(format!("lds [r{}], r{}", addr, value));
                    self.pool.release_temp(addr);
                    Ok(())
                }
                Some(Binding::StackArray { .. }) | Some(Binding::GlobalArray { .. }) => {
                    Err(CodegenError::InvalidAssignTarget {
                        name: name.clone(),
                        pos: pos.clone(),
                    })
                }
                None => Err(CodegenError::UndefinedVariable {
                    name: name.clone(),
                    pos: pos.clone(),
                }),
            },
            LValue::Index { name, index, pos } => {
                let addr = self.gen_elem_addr(name, index, pos)?;
                self.emit(format!("lds [r{}], r{}", addr, value));
                self.pool.release_temp(addr);
                Ok(())
            }
            LValue::Deref { addr, .. } => {
                let addr = self.gen_expr(addr)?;
                self.emit(format!("lds [r{}], r{}", addr, value));
                self.release(addr);
                Ok(())
            }
        }
    }

    fn load_lvalue(&mut self, target: &LValue) -> Result<u8, CodegenError> {
        match target {
            LValue::Name { name, pos } => self.gen_ident(name, pos),
            LValue::Index { name, index, pos } => {
                let addr = self.gen_elem_addr(name, index, pos)?;
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.pool.release_temp(addr);
                Ok(out)
            }
            LValue::Deref { addr, .. } => {
                let addr = self.gen_expr(addr)?;
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.release(addr);
                Ok(out)
            }
        }
    }

    fn lvalue_ty(&self, target: &LValue) -> Ty {
        match target {
            LValue::Name { name, .. } => match self.binding(name) {
                Some(
                    Binding::Reg { ty, .. }
                    | Binding::Stack { ty, .. }
                    | Binding::Global { ty }
                    | Binding::HardReg { ty, .. },
                ) => ty,
                Some(Binding::StackArray { .. } | Binding::GlobalArray { .. }) => Ty::Ptr,
                None => Ty::U32,
            },
            LValue::Index { name, .. } => match self.binding(name) {
                Some(Binding::StackArray { ty, .. } | Binding::GlobalArray { ty, .. }) => ty,
                _ => Ty::U32,
            },
            LValue::Deref { .. } => Ty::U32,
        }
    }

    /// Address of `name[index]` in a fresh temporary.
    fn gen_elem_addr(
        &mut self,
        name: &SmolStr,
        index: &Expr,
        pos: &Pos,
    ) -> Result<u8, CodegenError> {
        match self.binding(name) {
            Some(Binding::GlobalArray { .. }) => {
                let index = self.gen_expr(index)?;
                let scaled = self.alloc_temp()?;
                self.emit(format!("shl r{}, r{}, 2", scaled, index));
                self.release(index);
                let addr = self.alloc_temp()?;
                self.emit(format!("mov r{}, {} addr", addr, name));
                self.emit(format!("add r{}, r{}, r{}", addr, addr, scaled));
                self.pool.release_temp(scaled);
                Ok(addr)
            }
            Some(Binding::StackArray { offset, .. }) => {
                let index = self.gen_expr(index)?;
                let scaled = self.alloc_temp()?;
                self.emit(format!("shl r{}, r{}, 2", scaled, index));
                self.release(index);
                let addr = self.stack_addr(offset)?;
                self.emit(format!("add r{}, r{}, r{}", addr, addr, scaled));
                self.pool.release_temp(scaled);
                Ok(addr)
            }
            Some(_) => Err(CodegenError::NotAnArray {
                name: name.clone(),
                pos: pos.clone(),
            }),
            None => Err(CodegenError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    // --- Expressions -----------------------------------------------------

    fn gen_expr(&mut self, expr: &Expr) -> Result<u8, CodegenError> {
        match expr {
            Expr::Literal { value, .. } => {
                let out = self.alloc_temp()?;
                self.emit(format!("mov r{}, {}", out, value));
                Ok(out)
            }
            Expr::Ident { name, pos } => self.gen_ident(name, pos),
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinOp::LogicalAnd => self.gen_logical(lhs, rhs, true),
                BinOp::LogicalOr => self.gen_logical(lhs, rhs, false),
                _ => {
                    let lhs_ty = self.expr_ty(lhs);
                    let rhs_ty = self.expr_ty(rhs);
                    let lhs = self.gen_expr(lhs)?;
                    let rhs = self.gen_expr(rhs)?;
                    self.gen_binop(*op, lhs, rhs, lhs_ty, rhs_ty)
                }
            },
            Expr::Unary { op, operand, .. } => {
                let value = self.gen_expr(operand)?;
                match op {
                    UnOp::BitNot => {
                        let out = self.alloc_temp()?;
                        self.emit(format!("not r{}, r{}", out, value));
                        self.release(value);
                        Ok(out)
                    }
                    UnOp::Neg => {
                        let zero = self.alloc_temp()?;
                        self.emit(format!("mov r{}, 0", zero));
                        let out = self.alloc_temp()?;
                        self.emit(format!("sub r{}, r{}, r{}", out, zero, value));
                        self.pool.release_temp(zero);
                        self.release(value);
                        Ok(out)
                    }
                    UnOp::Not => {
                        let zero = self.alloc_temp()?;
                        self.emit(format!("mov r{}, 0", zero));
                        let flag = self.alloc_temp()?;
                        self.emit(format!("cmpe r{}, r{}, r{}", flag, value, zero));
                        self.pool.release_temp(zero);
                        self.release(value);
                        self.materialize_flag(flag, true)
                    }
                }
            }
            Expr::Call(call) => self.gen_call(call),
            Expr::Index { name, index, pos } => {
                let addr = self.gen_elem_addr(name, index, pos)?;
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.pool.release_temp(addr);
                Ok(out)
            }
            Expr::AddrOf { target, .. } => match &**target {
                LValue::Name { name, pos } => match self.binding(name) {
                    Some(Binding::Stack { offset, .. })
                    | Some(Binding::StackArray { offset, .. }) => self.stack_addr(offset),
                    Some(Binding::Global { .. }) | Some(Binding::GlobalArray { .. }) => {
                        let out = self.alloc_temp()?;
                        self.emit(format!("mov r{}, {} addr", out, name));
                        Ok(out)
                    }
                    Some(Binding::Reg { .. }) | Some(Binding::HardReg { .. }) => {
                        Err(CodegenError::AddressOfRegister {
                            name: name.clone(),
                            pos: pos.clone(),
                        })
                    }
                    None => Err(CodegenError::UndefinedVariable {
                        name: name.clone(),
                        pos: pos.clone(),
                    }),
                },
                LValue::Index { name, index, pos } => self.gen_elem_addr(name, index, pos),
                LValue::Deref { addr, .. } => self.gen_expr(addr),
            },
            Expr::Deref { addr, .. } => {
                let addr = self.gen_expr(addr)?;
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.release(addr);
                Ok(out)
            }
        }
    }

    fn gen_ident(&mut self, name: &SmolStr, pos: &Pos) -> Result<u8, CodegenError> {
        match self.binding(name) {
            Some(Binding::Reg { reg, .. }) | Some(Binding::HardReg { reg, .. }) => Ok(reg),
            Some(Binding::Stack { offset, .. }) => {
                let addr = self.stack_addr(offset)?;
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.pool.release_temp(addr);
                Ok(out)
            }
            // Array names decay to their base address.
            Some(Binding::StackArray { offset, .. }) => self.stack_addr(offset),
            Some(Binding::Global { .. }) => {
                let addr = self.alloc_temp()?;
                self.emit(format!("mov r{}, {} addr", addr, name));
                let out = self.alloc_temp()?;
                self.emit(format!("lds r{}, [r{}]", out, addr));
                self.pool.release_temp(addr);
                Ok(out)
            }
            Some(Binding::GlobalArray { .. }) => {
                let out = self.alloc_temp()?;
                self.emit(format!("mov r{}, {} addr", out, name));
                Ok(out)
            }
            None => Err(CodegenError::UndefinedVariable {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    fn gen_binop(
        &mut self,
        op: BinOp,
        lhs: u8,
        rhs: u8,
        lhs_ty: Ty,
        rhs_ty: Ty,
    ) -> Result<u8, CodegenError> {
        use BinOp as B;

        match op {
            B::Add => {
                if (lhs_ty == Ty::Ptr) ^ (rhs_ty == Ty::Ptr) {
                    let (base, index) = if lhs_ty == Ty::Ptr {
                        (lhs, rhs)
                    } else {
                        (rhs, lhs)
                    };
                    let scaled = self.alloc_temp()?;
                    self.emit(format!("shl r{}, r{}, 2", scaled, index));
                    let out = self.alloc_temp()?;
                    self.emit(format!("add r{}, r{}, r{}", out, base, scaled));
                    self.pool.release_temp(scaled);
                    self.release(lhs);
                    self.release(rhs);
                    Ok(out)
                } else {
                    self.gen_simple_binop("add", lhs, rhs)
                }
            }
            B::Sub => {
                if lhs_ty == Ty::Ptr && rhs_ty != Ty::Ptr {
                    let scaled = self.alloc_temp()?;
                    self.emit(format!("shl r{}, r{}, 2", scaled, rhs));
                    let out = self.alloc_temp()?;
                    self.emit(format!("sub r{}, r{}, r{}", out, lhs, scaled));
                    self.pool.release_temp(scaled);
                    self.release(lhs);
                    self.release(rhs);
                    Ok(out)
                } else {
                    self.gen_simple_binop("sub", lhs, rhs)
                }
            }
            B::BitAnd => self.gen_simple_binop("and", lhs, rhs),
            B::BitOr => self.gen_simple_binop("or", lhs, rhs),
            B::BitXor => self.gen_simple_binop("xor", lhs, rhs),
            B::Shl => self.gen_simple_binop("shl", lhs, rhs),
            B::Shr => self.gen_simple_binop("shr", lhs, rhs),
            B::Mul => self.gen_mul(lhs, rhs),
            B::Div => {
                self.needs_udiv = true;
                self.gen_runtime_call("udiv32", &[lhs, rhs])
            }
            B::Rem => {
                self.needs_umod = true;
                self.gen_runtime_call("umod32", &[lhs, rhs])
            }
            B::Eq => self.gen_compare("cmpe", lhs, rhs, true),
            B::Ne => self.gen_compare("cmpe", lhs, rhs, false),
            B::Lt => self.gen_compare("cmpb", lhs, rhs, true),
            B::Ge => self.gen_compare("cmpb", lhs, rhs, false),
            B::Gt => self.gen_compare("cmpa", lhs, rhs, true),
            B::Le => self.gen_compare("cmpa", lhs, rhs, false),
            // Non-short-circuit forms for compound contexts; expression
            // position routes through gen_logical instead.
            B::LogicalAnd => {
                let lhs = self.gen_bool(lhs)?;
                let rhs = self.gen_bool(rhs)?;
                self.gen_simple_binop("and", lhs, rhs)
            }
            B::LogicalOr => {
                let lhs = self.gen_bool(lhs)?;
                let rhs = self.gen_bool(rhs)?;
                self.gen_simple_binop("or", lhs, rhs)
            }
        }
    }

    fn gen_simple_binop(&mut self, mnemonic: &str, lhs: u8, rhs: u8) -> Result<u8, CodegenError> {
        let out = self.alloc_temp()?;
        self.emit(format!("{} r{}, r{}, r{}", mnemonic, out, lhs, rhs));
        self.release(lhs);
        self.release(rhs);
        Ok(out)
    }

    /// Relational lowering: compare into a flag (-1 true, 0 false),
    /// then materialize 0/1 with a conditional move.
    fn gen_compare(
        &mut self,
        mnemonic: &str,
        lhs: u8,
        rhs: u8,
        on_flag: bool,
    ) -> Result<u8, CodegenError> {
        let flag = self.alloc_temp()?;
        self.emit(format!("{} r{}, r{}, r{}", mnemonic, flag, lhs, rhs));
        self.release(lhs);
        self.release(rhs);
        self.materialize_flag(flag, on_flag)
    }

    /// Turn a -1/0 flag register into 1/0. `on_flag` selects whether
    /// the set flag or the clear flag produces the 1.
    fn materialize_flag(&mut self, flag: u8, on_flag: bool) -> Result<u8, CodegenError> {
        let out = self.alloc_temp()?;
        let one = self.alloc_temp()?;
        self.emit(format!("mov r{}, 0", out));
        self.emit(format!("mov r{}, 1", one));
        let cmov = if on_flag { "cmovnz" } else { "cmovz" };
        self.emit(format!("{} r{}, r{}, r{}", cmov, out, flag, one));
        self.pool.release_temp(flag);
        self.pool.release_temp(one);
        Ok(out)
    }

    /// Normalize a register to 0/1.
    fn gen_bool(&mut self, value: u8) -> Result<u8, CodegenError> {
        let zero = self.alloc_temp()?;
        self.emit(format!("mov r{}, 0", zero));
        let flag = self.alloc_temp()?;
        self.emit(format!("cmpe r{}, r{}, r{}", flag, value, zero));
        self.pool.release_temp(zero);
        self.release(value);
        self.materialize_flag(flag, false)
    }

    /// Short-circuit `&&` / `||`: the second operand's code is jumped
    /// over when the first already decides the result.
    fn gen_logical(&mut self, lhs: &Expr, rhs: &Expr, is_and: bool) -> Result<u8, CodegenError> {
        let out = self.alloc_temp()?;
        let end = self.label(if is_and { "and_end" } else { "or_end" });
        let cmov = if is_and { "cmovz" } else { "cmovnz" };

        self.emit(format!("mov r{}, {}", out, if is_and { 0 } else { 1 }));
        let lhs = self.gen_expr(lhs)?;
        self.emit(format!("{} r31, r{}, {} addr", cmov, lhs, end));
        self.release(lhs);
        let rhs = self.gen_expr(rhs)?;
        self.emit(format!("{} r31, r{}, {} addr", cmov, rhs, end));
        self.release(rhs);
        self.emit(format!("mov r{}, {}", out, if is_and { 1 } else { 0 }));
        self.emit_label(&end);
        Ok(out)
    }

    /// Inline shift-and-add multiply; wraps modulo 2^32 like the
    /// hardware add it is built from.
    fn gen_mul(&mut self, lhs: u8, rhs: u8) -> Result<u8, CodegenError> {
        let acc = self.alloc_temp()?;
        let x = self.alloc_temp()?;
        let y = self.alloc_temp()?;
        self.emit(format!("mov r{}, 0", acc));
        self.emit(format!("mov r{}, r{}", x, lhs));
        self.emit(format!("mov r{}, r{}", y, rhs));
        self.release(lhs);
        self.release(rhs);

        let start = self.label("mul_start");
        let skip = self.label("mul_skip");
        let end = self.label("mul_end");
        let bit = self.alloc_temp()?;

        self.emit_label(&start);
        self.emit(format!("cmovz r31, r{}, {} addr", y, end));
        self.emit(format!("mov r{}, 1", bit));
        self.emit(format!("and r{}, r{}, r{}", bit, y, bit));
        self.emit(format!("cmovz r31, r{}, {} addr", bit, skip));
        self.emit(format!("add r{}, r{}, r{}", acc, acc, x));
        self.emit_label(&skip);
        self.emit(format!("shl r{}, r{}, 1", x, x));
        self.emit(format!("shr r{}, r{}, 1", y, y));
        self.emit(format!("mov r31, {} addr", start));
        self.emit_label(&end);

        self.pool.release_temp(bit);
        self.pool.release_temp(x);
        self.pool.release_temp(y);
        Ok(acc)
    }

    // --- Calls -----------------------------------------------------------

    fn gen_call(&mut self, call: &FuncCall) -> Result<u8, CodegenError> {
        if let Some(arity) = intrinsic_arity(&call.name) {
            if call.args.len() != arity {
                return Err(CodegenError::IntrinsicArity {
                    name: call.name.clone(),
                    expected: arity,
                    found: call.args.len(),
                    pos: call.pos.clone(),
                });
            }
            return self.gen_intrinsic(call);
        }

        if !self.user_functions.contains(&call.name) {
            return Err(CodegenError::UndefinedFunction {
                name: call.name.clone(),
                pos: call.pos.clone(),
            });
        }
        if call.args.len() > 5 {
            return Err(CodegenError::TooManyParams {
                function: call.name.clone(),
                pos: call.pos.clone(),
            });
        }

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.gen_expr(arg)?);
        }
        let target = if call.name == "main" {
            "main".to_string()
        } else {
            format!("func_{}", call.name)
        };
        self.gen_runtime_call(&target, &args)
    }

    /// Emit a full call sequence: caller-save live registers, load the
    /// argument slots, push the return-address link through `r30`, jump
    /// to the callee, then capture `r0` and restore.
    fn gen_runtime_call(&mut self, target: &str, args: &[u8]) -> Result<u8, CodegenError> {
        // Argument temporaries die at the call; everything else live
        // must survive the callee's register usage.
        let mut saved = self.pool.live();
        saved.retain(|reg| !(args.contains(reg) && *reg <= TEMP_LAST));

        for reg in &saved {
            self.emit(format!("sub r30, r30, {}", WORD));
            self.emit(format!("lds [r30], r{}", reg));
        }

        for (i, arg) in args.iter().take(4).enumerate() {
            self.emit(format!("mov r{}, r{}", ARG_FIRST + i as u8, arg));
        }
        if args.len() == 5 {
            self.emit(format!("sub r30, r30, {}", WORD));
            self.emit(format!("lds [r30], r{}", args[4]));
        }
        for arg in args {
            self.release(*arg);
        }

        let ret = self.label("ret_addr");
        let link = self.alloc_temp()?;
        self.emit(format!("mov r{}, {} addr", link, ret));
        self.emit(format!("sub r30, r30, {}", WORD));
        self.emit(format!("lds [r30], r{}", link));
        self.pool.release_temp(link);
        self.emit(format!("mov r31, {} addr", target));
        self.emit_label(&ret);
        if args.len() == 5 {
            self.emit(format!("add r30, r30, {}", WORD));
        }

        let out = self.alloc_temp()?;
        self.emit(format!("mov r{}, r0", out));
        for reg in saved.iter().rev() {
            self.emit(format!("lds r{}, [r30]", reg));
            self.emit(format!("add r30, r30, {}", WORD));
        }
        Ok(out)
    }

    /// Hardware intrinsics with a direct ISA lowering. Everything else
    /// in the intrinsic set only exists in the interpreter.
    fn gen_intrinsic(&mut self, call: &FuncCall) -> Result<u8, CodegenError> {
        match call.name.as_str() {
            "uart_write" => {
                let data = self.gen_expr(&call.args[0])?;
                self.emit(format!("outu r{}", data));
                self.release(data);
                self.zero_result()
            }
            "uart_read" => {
                let out = self.alloc_temp()?;
                self.emit(format!("inu r{}", out));
                Ok(out)
            }
            "uart_set_baud" => {
                let baud = self.gen_expr(&call.args[0])?;
                self.emit(format!("setu r{}", baud));
                self.release(baud);
                self.zero_result()
            }
            "gpio_set" => {
                let pin = self.gen_expr(&call.args[0])?;
                let dir = self.gen_expr(&call.args[1])?;
                let mode = self.gen_expr(&call.args[2])?;
                let packed = self.alloc_temp()?;
                self.emit(format!("shl r{}, r{}, 16", packed, pin));
                let shifted = self.alloc_temp()?;
                self.emit(format!("shl r{}, r{}, 8", shifted, dir));
                self.emit(format!("or r{}, r{}, r{}", packed, packed, shifted));
                self.emit(format!("or r{}, r{}, r{}", packed, packed, mode));
                self.emit(format!("setg r{}", packed));
                self.pool.release_temp(shifted);
                self.pool.release_temp(packed);
                self.release(pin);
                self.release(dir);
                self.release(mode);
                self.zero_result()
            }
            "gpio_read" => {
                let pin = self.gen_expr(&call.args[0])?;
                self.release(pin);
                let out = self.alloc_temp()?;
                self.emit(format!("getg r{}", out));
                Ok(out)
            }
            "gpio_write" => {
                let pin = self.gen_expr(&call.args[0])?;
                let value = self.gen_expr(&call.args[1])?;
                let packed = self.alloc_temp()?;
                self.emit(format!("shl r{}, r{}, 8", packed, pin));
                self.emit(format!("or r{}, r{}, r{}", packed, packed, value));
                self.emit(format!("outg r{}", packed));
                self.pool.release_temp(packed);
                self.release(pin);
                self.release(value);
                self.zero_result()
            }
            _ => Err(CodegenError::UnknownIntrinsic {
                name: call.name.clone(),
                pos: call.pos.clone(),
            }),
        }
    }

    fn zero_result(&mut self) -> Result<u8, CodegenError> {
        let out = self.alloc_temp()?;
        self.emit(format!("mov r{}, 0", out));
        Ok(out)
    }

    // --- Types -----------------------------------------------------------

    /// Static type of an expression, for pointer scaling. Unresolvable
    /// names default to u32; the real diagnostic surfaces when the
    /// expression itself is lowered.
    fn expr_ty(&self, expr: &Expr) -> Ty {
        match expr {
            Expr::Literal { .. } => Ty::U32,
            Expr::Ident { name, .. } => match self.binding(name) {
                Some(
                    Binding::Reg { ty, .. }
                    | Binding::Stack { ty, .. }
                    | Binding::Global { ty }
                    | Binding::HardReg { ty, .. },
                ) => ty,
                Some(Binding::StackArray { .. } | Binding::GlobalArray { .. }) => Ty::Ptr,
                None => Ty::U32,
            },
            Expr::Binary { op, lhs, rhs, .. } => {
                let lhs = self.expr_ty(lhs);
                let rhs = self.expr_ty(rhs);
                match op {
                    BinOp::Add | BinOp::Sub => {
                        if lhs == Ty::Ptr || rhs == Ty::Ptr {
                            Ty::Ptr
                        } else {
                            lhs.combine(rhs)
                        }
                    }
                    BinOp::Mul
                    | BinOp::Div
                    | BinOp::Rem
                    | BinOp::BitAnd
                    | BinOp::BitOr
                    | BinOp::BitXor
                    | BinOp::Shl
                    | BinOp::Shr => lhs.combine(rhs),
                    _ => Ty::U32,
                }
            }
            Expr::Unary { op: UnOp::Neg, .. } => Ty::I32,
            Expr::Unary { .. } => Ty::U32,
            Expr::Call(_) => Ty::U32,
            Expr::Index { name, .. } => match self.binding(name) {
                Some(Binding::StackArray { ty, .. } | Binding::GlobalArray { ty, .. }) => ty,
                _ => Ty::U32,
            },
            Expr::AddrOf { .. } => Ty::Ptr,
            Expr::Deref { .. } => Ty::U32,
        }
    }

    // --- Scopes and stack ------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Close a scope, emitting the stack pop and releasing its local
    /// registers in reverse allocation order.
    fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            if scope.stack_bytes > 0 {
                self.emit(format!("add r30, r30, {}", scope.stack_bytes));
                self.frame_depth -= scope.stack_bytes;
            }
            for reg in scope.regs.iter().rev() {
                self.pool.release_local(*reg);
            }
        }
    }

    /// Close a scope without emitting the pop, when an explicit return
    /// already rewound the stack.
    fn pop_scope_silent(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.frame_depth -= scope.stack_bytes;
            for reg in scope.regs.iter().rev() {
                self.pool.release_local(*reg);
            }
        }
    }

    fn bind(&mut self, name: SmolStr, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name, binding);
        }
    }

    fn binding(&self, name: &str) -> Option<Binding> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.bindings.get(name) {
                return Some(binding.clone());
            }
        }
        None
    }

    fn scope_regs_push(&mut self, reg: u8) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.regs.push(reg);
        }
    }

    fn scope_stack_grow(&mut self, bytes: u32) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.stack_bytes += bytes;
        }
    }

    /// Materialize the address of a stack slot. Slot addresses are
    /// `r30` plus the statically known distance between the current
    /// frame depth and the slot's offset below the link cell.
    fn stack_addr(&mut self, offset: i32) -> Result<u8, CodegenError> {
        let out = self.alloc_temp()?;
        self.emit(format!("mov r{}, r30", out));
        let delta = self.frame_depth as i32 - offset;
        if delta != 0 {
            self.emit(format!("add r{}, r{}, {}", out, out, delta));
        }
        Ok(out)
    }

    // --- Emission --------------------------------------------------------

    fn alloc_temp(&mut self) -> Result<u8, CodegenError> {
        self.pool
            .alloc_temp()
            .ok_or_else(|| CodegenError::RegisterExhausted {
                function: self.current_fn.clone(),
            })
    }

    /// Free an expression result. Home registers of variables pass
    /// through unchanged; only real temporaries return to the pool.
    fn release(&mut self, reg: u8) {
        self.pool.release_temp(reg);
    }

    fn emit(&mut self, instr: impl Into<String>) {
        self.code.push(format!("\t{}", instr.into()));
    }

    fn emit_label(&mut self, label: &str) {
        self.code.push(format!("{}:", label));
    }

    fn emit_comment(&mut self, text: &str) {
        self.code.push(format!("\t; {}", text));
    }

    fn blank(&mut self) {
        self.code.push(String::new());
    }

    /// Next label in a category: `if_end_0`, `if_end_1`, ... Counters
    /// are scoped to the whole run so listings are deterministic.
    fn label(&mut self, category: &'static str) -> String {
        let counter = self.label_counters.entry(category).or_insert(0);
        let label = format!("{}_{}", category, counter);
        *counter += 1;
        label
    }

    // --- Runtime helpers -------------------------------------------------

    /// `r0 = r26 / r27` by repeated subtraction; 0 when the divisor is
    /// 0 (the machine has no traps).
    fn emit_udiv(&mut self) {
        self.blank();
        self.emit_label("udiv32");
        self.emit_comment("runtime helper: r0 = r26 / r27, 0 on divide-by-zero");
        self.emit("mov r0, 0");
        self.emit("cmovz r31, r27, udiv32_done addr");
        self.emit("mov r1, r26");
        self.emit_label("udiv32_loop");
        self.emit("cmpb r2, r1, r27");
        self.emit("cmovnz r31, r2, udiv32_done addr");
        self.emit("sub r1, r1, r27");
        self.emit("add r0, r0, 1");
        self.emit("mov r31, udiv32_loop addr");
        self.emit_label("udiv32_done");
        self.emit("lds r2, [r30]");
        self.emit(format!("add r30, r30, {}", WORD));
        self.emit("mov r31, r2");
    }

    /// `r0 = r26 % r27`; 0 when the divisor is 0.
    fn emit_umod(&mut self) {
        self.blank();
        self.emit_label("umod32");
        self.emit_comment("runtime helper: r0 = r26 % r27, 0 on divide-by-zero");
        self.emit("mov r0, r26");
        self.emit("cmovz r31, r27, umod32_div0 addr");
        self.emit_label("umod32_loop");
        self.emit("cmpb r1, r0, r27");
        self.emit("cmovnz r31, r1, umod32_done addr");
        self.emit("sub r0, r0, r27");
        self.emit("mov r31, umod32_loop addr");
        self.emit_label("umod32_div0");
        self.emit("mov r0, 0");
        self.emit_label("umod32_done");
        self.emit("lds r1, [r30]");
        self.emit(format!("add r30, r30, {}", WORD));
        self.emit("mov r31, r1");
    }
}

/// Names whose address is taken anywhere in the function. These
/// scalars must live in memory rather than a register.
fn collect_addr_taken(func: &FuncDef) -> HashSet<SmolStr> {
    let mut names = HashSet::new();
    for stmt in &func.body.stmts {
        scan_stmt(stmt, &mut names);
    }
    names
}

fn scan_stmt(stmt: &Stmt, out: &mut HashSet<SmolStr>) {
    match stmt {
        Stmt::Var(decl) => {
            if let Some(init) = &decl.init {
                scan_expr(init, out);
            }
        }
        Stmt::Ptr(decl) => {
            if let Some(init) = &decl.init {
                scan_expr(init, out);
            }
        }
        Stmt::Array(decl) => {
            if let Some(init) = &decl.init {
                for expr in init {
                    scan_expr(expr, out);
                }
            }
        }
        Stmt::Assign { target, value, .. } => {
            scan_lvalue(target, out);
            scan_expr(value, out);
        }
        Stmt::CompoundAssign { target, value, .. } => {
            scan_lvalue(target, out);
            scan_expr(value, out);
        }
        Stmt::Incr { .. } | Stmt::Decr { .. } => {}
        Stmt::Call(call) => {
            for arg in &call.args {
                scan_expr(arg, out);
            }
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            scan_expr(cond, out);
            scan_stmt(then_branch, out);
            if let Some(else_branch) = else_branch {
                scan_stmt(else_branch, out);
            }
        }
        Stmt::While { cond, body, .. } => {
            scan_expr(cond, out);
            scan_stmt(body, out);
        }
        Stmt::DoWhile { body, cond, .. } => {
            scan_stmt(body, out);
            scan_expr(cond, out);
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            if let Some(init) = init {
                scan_stmt(init, out);
            }
            if let Some(cond) = cond {
                scan_expr(cond, out);
            }
            if let Some(step) = step {
                scan_stmt(step, out);
            }
            scan_stmt(body, out);
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                scan_expr(value, out);
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Asm { .. } => {}
        Stmt::Block(block) => {
            for stmt in &block.stmts {
                scan_stmt(stmt, out);
            }
        }
    }
}

fn scan_expr(expr: &Expr, out: &mut HashSet<SmolStr>) {
    match expr {
        Expr::Literal { .. } | Expr::Ident { .. } => {}
        Expr::Binary { lhs, rhs, .. } => {
            scan_expr(lhs, out);
            scan_expr(rhs, out);
        }
        Expr::Unary { operand, .. } => scan_expr(operand, out),
        Expr::Call(call) => {
            for arg in &call.args {
                scan_expr(arg, out);
            }
        }
        Expr::Index { index, .. } => scan_expr(index, out),
        Expr::AddrOf { target, .. } => {
            if let LValue::Name { name, .. } = &**target {
                out.insert(name.clone());
            }
            scan_lvalue(target, out);
        }
        Expr::Deref { addr, .. } => scan_expr(addr, out),
    }
}

fn scan_lvalue(target: &LValue, out: &mut HashSet<SmolStr>) {
    match target {
        LValue::Name { .. } => {}
        LValue::Index { index, .. } => scan_expr(index, out),
        LValue::Deref { addr, .. } => scan_expr(addr, out),
    }
}
