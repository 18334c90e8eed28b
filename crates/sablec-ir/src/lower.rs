//! AST → IR lowering.
//!
//! A reducer over the checked AST: expression lowering returns the IR
//! value it produced, statement lowering threads the block cursor through
//! the [`FunctionBuilder`]. Scope frames map names to entry-block stack
//! slots; monomorphization specializes generic declarations on demand
//! through the [`MonoCache`] work queue; async functions lower to a
//! promise, a heap state struct, and a driver with a state-index dispatch.
//!
//! Lowering errors are per-function: a failed function reports `C002` and
//! is discarded while the rest of the module proceeds.

use indexmap::IndexMap;
use sablec_par::{
    Expr, ExprId, ExprKind, InterpPart, Lit, LogOp, MatchArm, Pattern, PatternKind, SelectOp,
    Stmt, StmtKind, UnOp,
};
use sablec_sem::{Analysis, CallTarget, ClassInfo, FuncInfo, TypeId, TypeKind, TypeTable};
use sablec_util::{FxHashMap, Pos, ReportCode, Reporter, Symbol};

use crate::builder::FunctionBuilder;
use crate::ir::{
    BinOp, BlockId, Callee, CastKind, CmpOp, ExternDecl, GlobalDef, Instr, IrType, Module,
    StructLayout, Terminator, ValueId,
};
use crate::mono::{self, MonoCache, MonoItem, MonoKind};

/// Lower a checked analysis to an IR module.
pub fn lower(analysis: &Analysis, reporter: &Reporter) -> Module {
    let mut lowerer = Lowerer {
        analysis,
        reporter,
        types: analysis.types.clone(),
        module: Module::default(),
        mono: MonoCache::new(),
        counter: 0,
    };
    lowerer.run();
    lowerer.module
}

struct LowerError {
    msg: String,
    pos: Pos,
}

type LResult<T> = Result<T, LowerError>;

fn err<T>(msg: impl Into<String>, pos: Pos) -> LResult<T> {
    Err(LowerError {
        msg: msg.into(),
        pos,
    })
}

/// One named slot: the address of a stack (or state-struct) cell plus the
/// source-level type stored there.
#[derive(Clone, Copy)]
struct Slot {
    ptr: ValueId,
    ty: TypeId,
    mutable: bool,
}

struct CatchTarget {
    block: BlockId,
    slot: ValueId,
}

struct AsyncCtx {
    state_struct: Symbol,
    state_ptr: ValueId,
    /// Local name → address of its state-struct field, computed in the
    /// driver's entry block so it dominates every state.
    field_ptrs: FxHashMap<Symbol, ValueId>,
    /// Address of the state-index field.
    state_idx_ptr: ValueId,
    /// Address of the awaited-future field.
    awaited_ptr: ValueId,
    /// Field index holding the promise.
    promise_index: u32,
    driver_name: Symbol,
    /// Resume blocks; state `k` resumes at `resume_blocks[k - 1]`.
    resume_blocks: Vec<BlockId>,
}

struct FnCtx {
    b: FunctionBuilder,
    scopes: Vec<Vec<(Symbol, Slot)>>,
    defers: Vec<Vec<Stmt>>,
    drops: Vec<Vec<(ValueId, Symbol)>>,
    subst: FxHashMap<Symbol, TypeId>,
    ret_ty: TypeId,
    /// True only for the IR `main`, whose return narrows to i32.
    is_main: bool,
    /// Module whose key space resolves bare global names.
    module_ctx: Symbol,
    loop_stack: Vec<(BlockId, BlockId)>,
    catch_stack: Vec<CatchTarget>,
    exc_slot: Option<ValueId>,
    async_ctx: Option<AsyncCtx>,
}

impl FnCtx {
    fn lookup(&self, name: Symbol) -> Option<Slot> {
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.iter().rev().find(|(n, _)| *n == name))
            .map(|(_, slot)| *slot)
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
        self.defers.push(Vec::new());
        self.drops.push(Vec::new());
    }
}

struct Lowerer<'a> {
    analysis: &'a Analysis,
    reporter: &'a Reporter,
    /// Mutable clone of the checker's table; lowering interns substituted
    /// types without touching the analysis.
    types: TypeTable,
    module: Module,
    mono: MonoCache,
    counter: u32,
}

impl<'a> Lowerer<'a> {
    fn run(&mut self) {
        self.declare_externals();
        self.declare_globals();
        self.declare_layouts();

        // Non-generic functions, extensions, and methods.
        let function_keys: Vec<Symbol> = self.analysis.functions.keys().copied().collect();
        for key in function_keys {
            let info = self.analysis.functions[&key].clone();
            if info.decl.is_none() || !info.generics.is_empty() {
                continue;
            }
            let ir_name = Symbol::intern(&sanitize(key.as_str()));
            self.lower_function_guarded(ir_name, &info, FxHashMap::default(), None);
        }
        let class_keys: Vec<Symbol> = self.analysis.classes.keys().copied().collect();
        for class_key in class_keys {
            let class = self.analysis.classes[&class_key].clone();
            if !class.generics.is_empty() {
                continue;
            }
            for (method_name, method) in &class.methods {
                if method.decl.is_none() || !method.generics.is_empty() {
                    continue;
                }
                let ir_name =
                    Symbol::intern(&format!("{}_{}", sanitize(class_key.as_str()), method_name));
                self.lower_function_guarded(ir_name, method, FxHashMap::default(), Some(&class));
            }
        }

        // Synthesize `main` when the user did not provide one; the user
        // main was lowered above under its own name.
        if !self.module.functions.contains_key(&Symbol::intern("main")) {
            self.synthesize_main();
        }

        // Drain the monomorphization queue; instantiations may enqueue
        // further instantiations.
        while let Some(item) = self.mono.queue.pop() {
            self.lower_mono_item(item);
        }
    }

    fn lower_mono_item(&mut self, item: MonoItem) {
        match item.kind {
            MonoKind::Func(key) => {
                let Some(info) = self.analysis.functions.get(&key).cloned() else {
                    return;
                };
                let subst = build_subst(&info.generics, &item.type_args);
                self.lower_function_guarded(item.mangled, &info, subst, None);
            }
            MonoKind::Method(class_key, method_name) => {
                let Some(class) = self.analysis.classes.get(&class_key).cloned() else {
                    return;
                };
                let Some(method) = class.methods.get(&method_name).cloned() else {
                    return;
                };
                let subst = build_subst(&class.generics, &item.type_args);
                self.lower_function_guarded(item.mangled, &method, subst, Some(&class));
            }
        }
    }

    // =========================================================================
    // MODULE-LEVEL DECLARATIONS
    // =========================================================================

    fn declare_externals(&mut self) {
        let mut ext = |name: &str, params: Vec<IrType>, ret: IrType, variadic: bool| {
            let name = Symbol::intern(name);
            self.module.externals.insert(
                name,
                ExternDecl {
                    name,
                    params,
                    ret,
                    variadic,
                },
            );
        };
        ext("malloc", vec![IrType::I64], IrType::Ptr, false);
        ext("free", vec![IrType::Ptr], IrType::Void, false);
        ext("printf", vec![IrType::Ptr], IrType::I32, true);
        ext("print", vec![IrType::Ptr], IrType::Void, false);
        ext("string_concat", vec![IrType::Ptr, IrType::Ptr], IrType::Ptr, false);
        ext("int_to_string", vec![IrType::I64], IrType::Ptr, false);
        ext("float_to_string", vec![IrType::F64], IrType::Ptr, false);
        ext("to_string", vec![IrType::Ptr], IrType::Ptr, false);
        ext("Promise_create", vec![], IrType::Ptr, false);
        ext("Promise_getFuture", vec![IrType::Ptr], IrType::Ptr, false);
        ext("Future_get", vec![IrType::Ptr], IrType::Ptr, false);
        ext("runtime_spawn", vec![IrType::Ptr, IrType::Ptr], IrType::Void, false);
        ext("chan_send", vec![IrType::Ptr, IrType::Ptr], IrType::Void, false);
        ext("chan_recv", vec![IrType::Ptr, IrType::Ptr], IrType::Void, false);
        ext("select_execute", vec![IrType::Ptr, IrType::I32], IrType::I32, false);
    }

    fn declare_globals(&mut self) {
        let keys: Vec<Symbol> = self.analysis.globals.keys().copied().collect();
        for key in keys {
            let ty = self.analysis.globals[&key].ty;
            let ir = self.ir_ty(ty);
            let name = Symbol::intern(&sanitize(key.as_str()));
            self.module.globals.insert(name, GlobalDef { name, ty: ir });
        }
    }

    fn declare_layouts(&mut self) {
        // Fixed container and closure layouts.
        self.add_layout("list", vec![IrType::I64, IrType::Ptr]);
        self.add_layout("closure", vec![IrType::Ptr, IrType::Ptr]);
        self.add_layout("select_entry", vec![IrType::I32, IrType::Ptr, IrType::Ptr]);

        // Non-generic classes and enums.
        let class_keys: Vec<Symbol> = self.analysis.classes.keys().copied().collect();
        for key in class_keys {
            if self.analysis.classes[&key].generics.is_empty() {
                self.ensure_class_layout(key, &[]);
            }
        }
        let enum_keys: Vec<Symbol> = self.analysis.enums.keys().copied().collect();
        for key in enum_keys {
            if self.analysis.enums[&key].generics.is_empty() {
                self.ensure_enum_layouts(key, &[]);
            }
        }
    }

    fn add_layout(&mut self, name: &str, fields: Vec<IrType>) -> Symbol {
        let name = Symbol::intern(name);
        self.module
            .structs
            .entry(name)
            .or_insert(StructLayout { name, fields });
        name
    }

    /// Fields of a class flattened root-first through the base chain.
    fn flattened_fields(&self, class_key: Symbol) -> Vec<(Symbol, TypeId)> {
        let mut chain = Vec::new();
        let mut current = Some(class_key);
        let mut fuel = 64;
        while let Some(key) = current {
            let Some(class) = self.analysis.classes.get(&key) else {
                break;
            };
            chain.push(key);
            current = class.base;
            fuel -= 1;
            if fuel == 0 {
                break;
            }
        }
        let mut fields = Vec::new();
        for key in chain.iter().rev() {
            fields.extend(self.analysis.classes[key].fields.iter().copied());
        }
        fields
    }

    fn ensure_class_layout(&mut self, class_key: Symbol, type_args: &[TypeId]) -> Symbol {
        let generics = self
            .analysis
            .classes
            .get(&class_key)
            .map(|c| c.generics.clone())
            .unwrap_or_default();
        let subst = build_subst(&generics, type_args);
        let name = if type_args.is_empty() {
            Symbol::intern(&sanitize(class_key.as_str()))
        } else {
            self.mono.layout_name(&self.types, class_key, type_args)
        };
        if self.module.structs.contains_key(&name) {
            return name;
        }
        let fields: Vec<IrType> = self
            .flattened_fields(class_key)
            .iter()
            .map(|&(_, ty)| {
                let concrete = self.types.substitute(ty, &subst);
                self.ir_ty(concrete)
            })
            .collect();
        self.module
            .structs
            .insert(name, StructLayout { name, fields });
        name
    }

    /// Header layout (tag only) plus per-variant layouts; returns the base
    /// name.
    fn ensure_enum_layouts(&mut self, enum_key: Symbol, type_args: &[TypeId]) -> Symbol {
        let base = if type_args.is_empty() {
            Symbol::intern(&sanitize(enum_key.as_str()))
        } else {
            self.mono.layout_name(&self.types, enum_key, type_args)
        };
        if self.module.structs.contains_key(&base) {
            return base;
        }
        self.module.structs.insert(
            base,
            StructLayout {
                name: base,
                fields: vec![IrType::I32],
            },
        );
        let Some(info) = self.analysis.enums.get(&enum_key).cloned() else {
            return base;
        };
        let subst = build_subst(&info.generics, type_args);
        for variant in &info.variants {
            let mut fields = vec![IrType::I32];
            for &payload in &variant.payload {
                let concrete = self.types.substitute(payload, &subst);
                fields.push(self.ir_ty(concrete));
            }
            let name = Symbol::intern(&format!("{}_{}", base, variant.name));
            self.module
                .structs
                .insert(name, StructLayout { name, fields });
        }
        base
    }

    fn synthesize_main(&mut self) {
        let name = Symbol::intern("main");
        let mut ctx = FnCtx {
            b: FunctionBuilder::new(name, vec![IrType::I32, IrType::Ptr], IrType::I32),
            scopes: Vec::new(),
            defers: Vec::new(),
            drops: Vec::new(),
            subst: FxHashMap::default(),
            ret_ty: self.types.int(),
            is_main: true,
            module_ctx: self.analysis.entry,
            loop_stack: Vec::new(),
            catch_stack: Vec::new(),
            exc_slot: None,
            async_ctx: None,
        };
        ctx.push_scope();
        let result = self.lower_module_tops(&mut ctx);
        match result {
            Ok(()) => {
                let zero = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I32,
                        value: 0,
                    },
                    IrType::I32,
                );
                ctx.b.terminate(Terminator::Ret { value: Some(zero) });
                self.module.functions.insert(name, ctx.b.finish());
            }
            Err(e) => self.report_discard(name, e),
        }
    }

    /// Module initialization: global stores and top-level effectful
    /// statements, in dependency order, emitted into `main`'s prologue.
    fn lower_module_tops(&mut self, ctx: &mut FnCtx) -> LResult<()> {
        let tops = self.analysis.module_tops.clone();
        for (module, stmts) in &tops {
            ctx.module_ctx = *module;
            self.lower_top_stmts(ctx, stmts)?;
        }
        ctx.module_ctx = self.analysis.entry;
        Ok(())
    }

    fn lower_top_stmts(&mut self, ctx: &mut FnCtx, stmts: &[Stmt]) -> LResult<()> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Func(_)
                | StmtKind::Class(_)
                | StmtKind::Enum(_)
                | StmtKind::Trait(_)
                | StmtKind::Impl(_)
                | StmtKind::Import(_)
                | StmtKind::Export(_)
                | StmtKind::Error => {}
                StmtKind::Module(name, body) => {
                    let saved = ctx.module_ctx;
                    ctx.module_ctx = *name;
                    self.lower_top_stmts(ctx, body)?;
                    ctx.module_ctx = saved;
                }
                StmtKind::Let(l) => {
                    let key = self.global_key(ctx.module_ctx, l.name);
                    let Some(global) = self.analysis.globals.get(&key) else {
                        continue;
                    };
                    let ty = global.ty;
                    if let Some(init) = &l.init {
                        let value = self.lower_expr(ctx, init)?;
                        let init_ty = self.ty_of(ctx, init.id);
                        let value = self.coerce(ctx, value, init_ty, ty);
                        let addr = ctx.b.push(
                            Instr::GlobalAddr {
                                name: Symbol::intern(&sanitize(key.as_str())),
                            },
                            IrType::Ptr,
                        );
                        let ir = self.ir_ty(ty);
                        ctx.b.push(
                            Instr::Store {
                                ty: ir,
                                ptr: addr,
                                value,
                            },
                            IrType::Void,
                        );
                    }
                }
                _ => self.lower_stmt(ctx, stmt)?,
            }
        }
        Ok(())
    }

    // =========================================================================
    // FUNCTIONS
    // =========================================================================

    fn lower_function_guarded(
        &mut self,
        ir_name: Symbol,
        info: &FuncInfo,
        subst: FxHashMap<Symbol, TypeId>,
        class: Option<&ClassInfo>,
    ) {
        if info.is_async {
            if let Err(e) = self.lower_async_function(ir_name, info, &subst) {
                self.report_discard(ir_name, e);
            }
            return;
        }
        if let Err(e) = self.lower_plain_function(ir_name, info, subst, class) {
            self.report_discard(ir_name, e);
        }
    }

    fn report_discard(&mut self, name: Symbol, e: LowerError) {
        self.reporter.error(
            ReportCode::C002,
            format!("cannot generate code for '{}': {}", name, e.msg),
            e.pos,
        );
        self.module.functions.shift_remove(&name);
    }

    fn lower_plain_function(
        &mut self,
        ir_name: Symbol,
        info: &FuncInfo,
        subst: FxHashMap<Symbol, TypeId>,
        _class: Option<&ClassInfo>,
    ) -> LResult<()> {
        let is_main = ir_name.as_str() == "main";
        let param_tys: Vec<IrType> = info
            .params
            .iter()
            .map(|p| {
                let concrete = self.types.substitute(p.ty, &subst);
                self.ir_ty(concrete)
            })
            .collect();
        let ret_sable = self.types.substitute(info.ret, &subst);
        let ret_ir = if is_main { IrType::I32 } else { self.ir_ty(ret_sable) };

        let mut ctx = FnCtx {
            b: FunctionBuilder::new(ir_name, param_tys, ret_ir),
            scopes: Vec::new(),
            defers: Vec::new(),
            drops: Vec::new(),
            subst,
            ret_ty: ret_sable,
            is_main,
            module_ctx: info.module,
            loop_stack: Vec::new(),
            catch_stack: Vec::new(),
            exc_slot: None,
            async_ctx: None,
        };
        ctx.push_scope();

        // Parameters spill into entry-block stack slots.
        for (i, param) in info.params.iter().enumerate() {
            let ty = self.types.substitute(param.ty, &ctx.subst);
            let ty = match self.types.kind(ty) {
                TypeKind::RvalueRef(inner) => *inner,
                _ => ty,
            };
            let ir = self.ir_ty(ty);
            let slot = ctx.b.push_entry(Instr::Alloc { ty: ir }, IrType::Ptr);
            let value = ctx.b.param(i);
            ctx.b.push(
                Instr::Store {
                    ty: ir,
                    ptr: slot,
                    value,
                },
                IrType::Void,
            );
            ctx.scopes.last_mut().unwrap().push((
                param.name,
                Slot {
                    ptr: slot,
                    ty,
                    mutable: false,
                },
            ));
        }

        // `main` runs module initialization before its own body.
        if is_main {
            self.lower_module_tops(&mut ctx)?;
        }

        let body = info.decl.as_ref().map(|d| d.body.clone()).unwrap_or_default();
        for stmt in &body {
            self.lower_stmt(&mut ctx, stmt)?;
        }

        if !ctx.b.is_terminated() {
            self.emit_scope_exit(&mut ctx, 0)?;
            if is_main {
                let zero = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I32,
                        value: 0,
                    },
                    IrType::I32,
                );
                ctx.b.terminate(Terminator::Ret { value: Some(zero) });
            } else {
                ctx.b.terminate(Terminator::Ret { value: None });
            }
        }

        self.module.functions.insert(ir_name, ctx.b.finish());
        Ok(())
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn lower_stmt(&mut self, ctx: &mut FnCtx, stmt: &Stmt) -> LResult<()> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                // Statement-position awaits are the supported suspension
                // points.
                if let ExprKind::Await(inner) = &e.kind {
                    self.lower_await(ctx, inner, e.id)?;
                    return Ok(());
                }
                self.lower_expr(ctx, e)?;
                Ok(())
            }
            StmtKind::Let(l) => {
                let (value, init_ty) = match &l.init {
                    Some(init) => {
                        if let ExprKind::Await(inner) = &init.kind {
                            let v = self.lower_await(ctx, inner, init.id)?;
                            (Some(v), Some(self.ty_of(ctx, init.id)))
                        } else {
                            let v = self.lower_expr(ctx, init)?;
                            (Some(v), Some(self.ty_of(ctx, init.id)))
                        }
                    }
                    None => (None, None),
                };
                // The slot type comes from the initializer; annotated
                // uninitialized bindings get a zero value of the
                // annotation's shape.
                let slot_ty = match (init_ty, &l.ty) {
                    (Some(t), _) => t,
                    (None, Some(te)) => self.annotation_hint(te),
                    (None, None) => self.types.error(),
                };
                let slot = self.declare_local(ctx, l.name, slot_ty, l.mutable)?;
                let ir = self.ir_ty(slot_ty);
                let value = match value {
                    Some(v) => self.coerce(ctx, v, init_ty.unwrap(), slot_ty),
                    None => self.zero_value(ctx, ir),
                };
                ctx.b.push(
                    Instr::Store {
                        ty: ir,
                        ptr: slot.ptr,
                        value,
                    },
                    IrType::Void,
                );
                // Fresh allocations with destructors drop at scope exit.
                if let Some(init) = &l.init {
                    if matches!(init.kind, ExprKind::New(..)) {
                        if let Some(class_key) = self.deinit_class_of(slot_ty) {
                            ctx.drops.last_mut().unwrap().push((slot.ptr, class_key));
                        }
                    }
                }
                Ok(())
            }
            StmtKind::Block(stmts) => self.lower_block(ctx, stmts),
            StmtKind::If(ifs) => {
                let merge = ctx.b.new_block("ifend");
                let mut arms: Vec<(&Expr, &[Stmt])> = vec![(&ifs.cond, &ifs.then_body)];
                for (cond, body) in &ifs.elifs {
                    arms.push((cond, body));
                }
                for (cond, body) in arms {
                    let then_bb = ctx.b.new_block("then");
                    let else_bb = ctx.b.new_block("else");
                    let cond_val = self.lower_condition(ctx, cond)?;
                    ctx.b.terminate(Terminator::CondBr {
                        cond: cond_val,
                        then_bb,
                        else_bb,
                    });
                    ctx.b.switch_to(then_bb);
                    self.lower_block(ctx, body)?;
                    ctx.b.terminate(Terminator::Br { target: merge });
                    ctx.b.switch_to(else_bb);
                }
                if let Some(body) = &ifs.else_body {
                    self.lower_block(ctx, body)?;
                }
                ctx.b.terminate(Terminator::Br { target: merge });
                ctx.b.switch_to(merge);
                Ok(())
            }
            StmtKind::While(cond, body) => {
                let cond_bb = ctx.b.new_block("cond");
                let body_bb = ctx.b.new_block("body");
                let after_bb = ctx.b.new_block("after");
                ctx.b.terminate(Terminator::Br { target: cond_bb });
                ctx.b.switch_to(cond_bb);
                let cond_val = self.lower_condition(ctx, cond)?;
                ctx.b.terminate(Terminator::CondBr {
                    cond: cond_val,
                    then_bb: body_bb,
                    else_bb: after_bb,
                });
                ctx.b.switch_to(body_bb);
                ctx.loop_stack.push((cond_bb, after_bb));
                self.lower_block(ctx, body)?;
                ctx.loop_stack.pop();
                ctx.b.terminate(Terminator::Br { target: cond_bb });
                ctx.b.switch_to(after_bb);
                Ok(())
            }
            StmtKind::For(name, iterable, body) => self.lower_for(ctx, *name, iterable, body),
            StmtKind::Return(value) => {
                let result = match value {
                    Some(e) => {
                        let v = if let ExprKind::Await(inner) = &e.kind {
                            self.lower_await(ctx, inner, e.id)?
                        } else {
                            self.lower_expr(ctx, e)?
                        };
                        let from = self.ty_of(ctx, e.id);
                        Some(self.coerce(ctx, v, from, ctx.ret_ty))
                    }
                    None => None,
                };
                self.emit_return(ctx, result)
            }
            StmtKind::Match(m) => self.lower_match_stmt(ctx, m),
            StmtKind::Try(t) => self.lower_try(ctx, t),
            StmtKind::Throw(e) => {
                let value = self.lower_expr(ctx, e)?;
                self.emit_throw(ctx, value)
            }
            StmtKind::Break => match ctx.loop_stack.last().copied() {
                Some((_, after)) => {
                    ctx.b.terminate(Terminator::Br { target: after });
                    Ok(())
                }
                None => err("break outside of a loop", stmt.pos),
            },
            StmtKind::Continue => match ctx.loop_stack.last().copied() {
                Some((cond, _)) => {
                    ctx.b.terminate(Terminator::Br { target: cond });
                    Ok(())
                }
                None => err("continue outside of a loop", stmt.pos),
            },
            StmtKind::Defer(inner) => {
                ctx.defers.last_mut().unwrap().push((**inner).clone());
                Ok(())
            }
            StmtKind::Go(e) => self.lower_go(ctx, e),
            StmtKind::Select(arms) => self.lower_select(ctx, arms),
            StmtKind::Func(decl) => err(
                format!(
                    "nested function '{}' is not supported; use a lambda",
                    decl.name
                ),
                decl.pos,
            ),
            StmtKind::Error => Ok(()),
            _ => err("declaration is not lowerable in function position", stmt.pos),
        }
    }

    fn lower_block(&mut self, ctx: &mut FnCtx, stmts: &[Stmt]) -> LResult<()> {
        ctx.push_scope();
        for stmt in stmts {
            self.lower_stmt(ctx, stmt)?;
        }
        self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
        ctx.scopes.pop();
        ctx.defers.pop();
        ctx.drops.pop();
        Ok(())
    }

    /// Run one scope's defers (reverse registration order) and destructors
    /// (reverse declaration order). `index` selects the frame.
    fn emit_scope_exit(&mut self, ctx: &mut FnCtx, index: usize) -> LResult<()> {
        if ctx.b.is_terminated() {
            return Ok(());
        }
        let defers: Vec<Stmt> = ctx.defers.get(index).cloned().unwrap_or_default();
        for stmt in defers.iter().rev() {
            self.lower_stmt(ctx, stmt)?;
        }
        let drops: Vec<(ValueId, Symbol)> = ctx.drops.get(index).cloned().unwrap_or_default();
        for (slot, class_key) in drops.iter().rev() {
            let obj = ctx.b.push(
                Instr::Load {
                    ty: IrType::Ptr,
                    ptr: *slot,
                },
                IrType::Ptr,
            );
            let deinit = Symbol::intern(&format!("{}_deinit", sanitize(class_key.as_str())));
            ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(deinit),
                    args: vec![obj],
                    ty: IrType::Void,
                },
                IrType::Void,
            );
        }
        Ok(())
    }

    /// Unwind every open scope (defers, then drops, innermost first) and
    /// return.
    fn emit_return(&mut self, ctx: &mut FnCtx, value: Option<ValueId>) -> LResult<()> {
        for index in (0..ctx.scopes.len()).rev() {
            self.emit_scope_exit(ctx, index)?;
        }
        if let Some(async_ctx) = &ctx.async_ctx {
            // Complete the promise: the result is stored through the
            // promise pointer, where Future_get reads it.
            let state_struct = async_ctx.state_struct;
            let state_ptr = async_ctx.state_ptr;
            let promise_index = async_ctx.promise_index;
            if let Some(v) = value {
                let promise_ptr = ctx.b.push(
                    Instr::FieldPtr {
                        struct_name: state_struct,
                        base: state_ptr,
                        index: promise_index,
                    },
                    IrType::Ptr,
                );
                let promise = ctx.b.push(
                    Instr::Load {
                        ty: IrType::Ptr,
                        ptr: promise_ptr,
                    },
                    IrType::Ptr,
                );
                let ty = ctx.b.value_ty(v);
                ctx.b.push(
                    Instr::Store {
                        ty,
                        ptr: promise,
                        value: v,
                    },
                    IrType::Void,
                );
            }
            ctx.b.terminate(Terminator::Ret { value: None });
            return Ok(());
        }
        let value = match (value, ctx.is_main) {
            (Some(v), true) => {
                // The driver convention narrows main's int to an i32 exit
                // code.
                Some(ctx.b.push(
                    Instr::Cast {
                        kind: CastKind::Trunc,
                        value: v,
                        ty: IrType::I32,
                    },
                    IrType::I32,
                ))
            }
            (v, _) => v,
        };
        ctx.b.terminate(Terminator::Ret { value });
        Ok(())
    }

    fn emit_throw(&mut self, ctx: &mut FnCtx, value: ValueId) -> LResult<()> {
        match ctx.catch_stack.last() {
            Some(target) => {
                let block = target.block;
                let slot = target.slot;
                ctx.b.push(
                    Instr::Store {
                        ty: IrType::Ptr,
                        ptr: slot,
                        value,
                    },
                    IrType::Void,
                );
                // Defers run on a propagating throw.
                for index in (0..ctx.scopes.len()).rev() {
                    self.emit_scope_exit(ctx, index)?;
                }
                ctx.b.terminate(Terminator::Br { target: block });
                Ok(())
            }
            None => {
                // Uncaught: abort. Defers do not run on panic.
                let msg = ctx.b.push(
                    Instr::ConstStr {
                        value: Symbol::intern("uncaught exception\n"),
                    },
                    IrType::Ptr,
                );
                ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("printf")),
                        args: vec![msg, value],
                        ty: IrType::I32,
                    },
                    IrType::I32,
                );
                ctx.b.terminate(Terminator::Unreachable);
                Ok(())
            }
        }
    }

    fn lower_try(&mut self, ctx: &mut FnCtx, t: &sablec_par::TryStmt) -> LResult<()> {
        let exc_slot = match ctx.exc_slot {
            Some(slot) => slot,
            None => {
                let slot = ctx.b.push_entry(Instr::Alloc { ty: IrType::Ptr }, IrType::Ptr);
                ctx.exc_slot = Some(slot);
                slot
            }
        };
        let catch_bb = ctx.b.new_block("catch");
        let after_bb = ctx.b.new_block("tryend");

        ctx.catch_stack.push(CatchTarget {
            block: catch_bb,
            slot: exc_slot,
        });
        self.lower_block(ctx, &t.body)?;
        ctx.catch_stack.pop();
        if let Some(finally) = &t.finally {
            self.lower_block(ctx, finally)?;
        }
        ctx.b.terminate(Terminator::Br { target: after_bb });

        // Exception dispatch has no runtime type information; the first
        // catch clause receives every exception.
        ctx.b.switch_to(catch_bb);
        if let Some(catch) = t.catches.first() {
            ctx.push_scope();
            let exc = ctx.b.push(
                Instr::Load {
                    ty: IrType::Ptr,
                    ptr: exc_slot,
                },
                IrType::Ptr,
            );
            let err_ty = self.types.error();
            let slot = self.declare_local(ctx, catch.name, err_ty, false)?;
            ctx.b.push(
                Instr::Store {
                    ty: IrType::Ptr,
                    ptr: slot.ptr,
                    value: exc,
                },
                IrType::Void,
            );
            for stmt in &catch.body {
                self.lower_stmt(ctx, stmt)?;
            }
            self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
            ctx.scopes.pop();
            ctx.defers.pop();
            ctx.drops.pop();
        }
        if let Some(finally) = &t.finally {
            self.lower_block(ctx, finally)?;
        }
        ctx.b.terminate(Terminator::Br { target: after_bb });
        ctx.b.switch_to(after_bb);
        Ok(())
    }

    fn lower_for(
        &mut self,
        ctx: &mut FnCtx,
        name: Symbol,
        iterable: &Expr,
        body: &[Stmt],
    ) -> LResult<()> {
        let iter_ty = self.ty_of(ctx, iterable.id);

        // Range iteration avoids materializing a range value.
        if let ExprKind::Range(lo, hi, inclusive) = &iterable.kind {
            let lo_v = self.lower_expr(ctx, lo)?;
            let hi_v = self.lower_expr(ctx, hi)?;
            return self.lower_counted_loop(ctx, name, lo_v, hi_v, *inclusive, body);
        }

        match self.types.kind(iter_ty).clone() {
            TypeKind::Generic(n, args) if n.as_str() == "list" => {
                let elem_ty = args[0];
                let elem_ir = self.ir_ty(elem_ty);
                let hdr = self.lower_expr(ctx, iterable)?;
                let list_sym = Symbol::intern("list");
                // Load length and data pointer from the list header.
                let len_ptr = ctx.b.push(
                    Instr::FieldPtr {
                        struct_name: list_sym,
                        base: hdr,
                        index: 0,
                    },
                    IrType::Ptr,
                );
                let len = ctx.b.push(
                    Instr::Load {
                        ty: IrType::I64,
                        ptr: len_ptr,
                    },
                    IrType::I64,
                );
                let data_ptr = ctx.b.push(
                    Instr::FieldPtr {
                        struct_name: list_sym,
                        base: hdr,
                        index: 1,
                    },
                    IrType::Ptr,
                );
                let data = ctx.b.push(
                    Instr::Load {
                        ty: IrType::Ptr,
                        ptr: data_ptr,
                    },
                    IrType::Ptr,
                );

                // Synthesized index counter.
                let idx_slot = ctx.b.push_entry(Instr::Alloc { ty: IrType::I64 }, IrType::Ptr);
                let zero = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: 0,
                    },
                    IrType::I64,
                );
                ctx.b.push(
                    Instr::Store {
                        ty: IrType::I64,
                        ptr: idx_slot,
                        value: zero,
                    },
                    IrType::Void,
                );

                let cond_bb = ctx.b.new_block("forcond");
                let body_bb = ctx.b.new_block("forbody");
                let step_bb = ctx.b.new_block("forstep");
                let after_bb = ctx.b.new_block("forend");
                ctx.b.terminate(Terminator::Br { target: cond_bb });

                ctx.b.switch_to(cond_bb);
                let idx = ctx.b.push(
                    Instr::Load {
                        ty: IrType::I64,
                        ptr: idx_slot,
                    },
                    IrType::I64,
                );
                let in_bounds = ctx.b.push(
                    Instr::Cmp {
                        op: CmpOp::Lt,
                        ty: IrType::I64,
                        lhs: idx,
                        rhs: len,
                    },
                    IrType::I1,
                );
                ctx.b.terminate(Terminator::CondBr {
                    cond: in_bounds,
                    then_bb: body_bb,
                    else_bb: after_bb,
                });

                ctx.b.switch_to(body_bb);
                ctx.push_scope();
                let elem_addr = ctx.b.push(
                    Instr::IndexPtr {
                        elem_ty: elem_ir,
                        base: data,
                        index: idx,
                    },
                    IrType::Ptr,
                );
                let elem = ctx.b.push(
                    Instr::Load {
                        ty: elem_ir,
                        ptr: elem_addr,
                    },
                    elem_ir,
                );
                let slot = self.declare_local(ctx, name, elem_ty, false)?;
                ctx.b.push(
                    Instr::Store {
                        ty: elem_ir,
                        ptr: slot.ptr,
                        value: elem,
                    },
                    IrType::Void,
                );
                ctx.loop_stack.push((step_bb, after_bb));
                for stmt in body {
                    self.lower_stmt(ctx, stmt)?;
                }
                ctx.loop_stack.pop();
                self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
                ctx.scopes.pop();
                ctx.defers.pop();
                ctx.drops.pop();
                ctx.b.terminate(Terminator::Br { target: step_bb });

                ctx.b.switch_to(step_bb);
                let idx2 = ctx.b.push(
                    Instr::Load {
                        ty: IrType::I64,
                        ptr: idx_slot,
                    },
                    IrType::I64,
                );
                let one = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: 1,
                    },
                    IrType::I64,
                );
                let next = ctx.b.push(
                    Instr::Bin {
                        op: BinOp::Add,
                        ty: IrType::I64,
                        lhs: idx2,
                        rhs: one,
                    },
                    IrType::I64,
                );
                ctx.b.push(
                    Instr::Store {
                        ty: IrType::I64,
                        ptr: idx_slot,
                        value: next,
                    },
                    IrType::Void,
                );
                ctx.b.terminate(Terminator::Br { target: cond_bb });
                ctx.b.switch_to(after_bb);
                Ok(())
            }
            TypeKind::Generic(n, args) if n.as_str() == "Channel" => {
                let elem_ty = args[0];
                let elem_ir = self.ir_ty(elem_ty);
                let chan = self.lower_expr(ctx, iterable)?;
                let buf = ctx.b.push_entry(Instr::Alloc { ty: elem_ir }, IrType::Ptr);

                let body_bb = ctx.b.new_block("recvbody");
                let after_bb = ctx.b.new_block("recvend");
                ctx.b.terminate(Terminator::Br { target: body_bb });
                ctx.b.switch_to(body_bb);
                ctx.push_scope();
                ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("chan_recv")),
                        args: vec![chan, buf],
                        ty: IrType::Void,
                    },
                    IrType::Void,
                );
                let elem = ctx.b.push(
                    Instr::Load {
                        ty: elem_ir,
                        ptr: buf,
                    },
                    elem_ir,
                );
                let slot = self.declare_local(ctx, name, elem_ty, false)?;
                ctx.b.push(
                    Instr::Store {
                        ty: elem_ir,
                        ptr: slot.ptr,
                        value: elem,
                    },
                    IrType::Void,
                );
                ctx.loop_stack.push((body_bb, after_bb));
                for stmt in body {
                    self.lower_stmt(ctx, stmt)?;
                }
                ctx.loop_stack.pop();
                self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
                ctx.scopes.pop();
                ctx.defers.pop();
                ctx.drops.pop();
                ctx.b.terminate(Terminator::Br { target: body_bb });
                ctx.b.switch_to(after_bb);
                Ok(())
            }
            TypeKind::Generic(n, _) if n.as_str() == "Range" => {
                err("range values are only iterable as literal ranges", iterable.pos)
            }
            _ => err("type is not iterable in lowering", iterable.pos),
        }
    }

    fn lower_counted_loop(
        &mut self,
        ctx: &mut FnCtx,
        name: Symbol,
        lo: ValueId,
        hi: ValueId,
        inclusive: bool,
        body: &[Stmt],
    ) -> LResult<()> {
        let idx_slot = ctx.b.push_entry(Instr::Alloc { ty: IrType::I64 }, IrType::Ptr);
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: idx_slot,
                value: lo,
            },
            IrType::Void,
        );
        let cond_bb = ctx.b.new_block("forcond");
        let body_bb = ctx.b.new_block("forbody");
        let step_bb = ctx.b.new_block("forstep");
        let after_bb = ctx.b.new_block("forend");
        ctx.b.terminate(Terminator::Br { target: cond_bb });

        ctx.b.switch_to(cond_bb);
        let idx = ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: idx_slot,
            },
            IrType::I64,
        );
        let op = if inclusive { CmpOp::Le } else { CmpOp::Lt };
        let in_bounds = ctx.b.push(
            Instr::Cmp {
                op,
                ty: IrType::I64,
                lhs: idx,
                rhs: hi,
            },
            IrType::I1,
        );
        ctx.b.terminate(Terminator::CondBr {
            cond: in_bounds,
            then_bb: body_bb,
            else_bb: after_bb,
        });

        ctx.b.switch_to(body_bb);
        ctx.push_scope();
        let int = self.types.int();
        let slot = self.declare_local(ctx, name, int, false)?;
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: slot.ptr,
                value: idx,
            },
            IrType::Void,
        );
        ctx.loop_stack.push((step_bb, after_bb));
        for stmt in body {
            self.lower_stmt(ctx, stmt)?;
        }
        ctx.loop_stack.pop();
        self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
        ctx.scopes.pop();
        ctx.defers.pop();
        ctx.drops.pop();
        ctx.b.terminate(Terminator::Br { target: step_bb });

        ctx.b.switch_to(step_bb);
        let idx2 = ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: idx_slot,
            },
            IrType::I64,
        );
        let one = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: 1,
            },
            IrType::I64,
        );
        let next = ctx.b.push(
            Instr::Bin {
                op: BinOp::Add,
                ty: IrType::I64,
                lhs: idx2,
                rhs: one,
            },
            IrType::I64,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: idx_slot,
                value: next,
            },
            IrType::Void,
        );
        ctx.b.terminate(Terminator::Br { target: cond_bb });
        ctx.b.switch_to(after_bb);
        Ok(())
    }

    // =========================================================================
    // LOCALS, COERCIONS, HELPERS
    // =========================================================================

    fn declare_local(
        &mut self,
        ctx: &mut FnCtx,
        name: Symbol,
        ty: TypeId,
        mutable: bool,
    ) -> LResult<Slot> {
        let ir = self.ir_ty(ty);
        let ptr = if let Some(async_ctx) = &ctx.async_ctx {
            match async_ctx.field_ptrs.get(&name).copied() {
                Some(ptr) => ptr,
                // Bindings without a state field (pattern binds) fall back
                // to the stack; they do not survive a suspension.
                None => ctx.b.push_entry(Instr::Alloc { ty: ir }, IrType::Ptr),
            }
        } else {
            ctx.b.push_entry(Instr::Alloc { ty: ir }, IrType::Ptr)
        };
        let slot = Slot { ptr, ty, mutable };
        ctx.scopes
            .last_mut()
            .expect("function context has a scope")
            .push((name, slot));
        Ok(slot)
    }

    fn ty_of(&mut self, ctx: &FnCtx, id: ExprId) -> TypeId {
        let ty = self.analysis.expr_type(id);
        self.types.substitute(ty, &ctx.subst)
    }

    /// Best-effort slot type for an annotation without an initializer.
    /// Primitives map exactly; everything else is pointer-shaped anyway.
    fn annotation_hint(&mut self, te: &sablec_par::TypeExpr) -> TypeId {
        use sablec_par::TypeExprKind;
        match &te.kind {
            TypeExprKind::Name(n) => match n.as_str() {
                "int" => self.types.int(),
                "float32" => self.types.float32(),
                "float64" => self.types.float64(),
                "bool" => self.types.bool(),
                "string" => self.types.str(),
                _ => self.types.error(),
            },
            TypeExprKind::Nullable(inner) => {
                let t = self.annotation_hint(inner);
                self.types.nullable(t)
            }
            _ => self.types.error(),
        }
    }

    fn ir_ty(&self, ty: TypeId) -> IrType {
        match self.types.kind(ty) {
            TypeKind::Void => IrType::Void,
            TypeKind::Int => IrType::I64,
            TypeKind::Float32 => IrType::F32,
            TypeKind::Float64 => IrType::F64,
            TypeKind::Bool => IrType::I1,
            _ => IrType::Ptr,
        }
    }

    /// True when `T?` boxes its payload (value-typed payloads).
    fn boxed_nullable(&self, inner: TypeId) -> bool {
        matches!(
            self.types.kind(inner),
            TypeKind::Int | TypeKind::Float32 | TypeKind::Float64 | TypeKind::Bool
        )
    }

    fn zero_value(&mut self, ctx: &mut FnCtx, ir: IrType) -> ValueId {
        match ir {
            IrType::F32 | IrType::F64 => ctx.b.push(
                Instr::ConstFloat { ty: ir, value: 0.0 },
                ir,
            ),
            IrType::I1 => ctx.b.push(Instr::ConstBool { value: false }, IrType::I1),
            IrType::Ptr => ctx.b.push(Instr::ConstNull, IrType::Ptr),
            _ => ctx.b.push(Instr::ConstInt { ty: ir, value: 0 }, ir),
        }
    }

    /// Insert the conversions assignability allows: numeric widening,
    /// boxing into nullable, nil to null.
    fn coerce(&mut self, ctx: &mut FnCtx, value: ValueId, from: TypeId, to: TypeId) -> ValueId {
        if from == to {
            return value;
        }
        match (self.types.kind(from).clone(), self.types.kind(to).clone()) {
            (TypeKind::Nil, _) => ctx.b.push(Instr::ConstNull, IrType::Ptr),
            (TypeKind::Int, TypeKind::Float64) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::IntToFloat,
                    value,
                    ty: IrType::F64,
                },
                IrType::F64,
            ),
            (TypeKind::Float32, TypeKind::Float64) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::FloatExt,
                    value,
                    ty: IrType::F64,
                },
                IrType::F64,
            ),
            (_, TypeKind::Nullable(inner)) => {
                let payload = self.coerce(ctx, value, from, inner);
                if self.boxed_nullable(inner) {
                    self.box_value(ctx, payload, inner)
                } else {
                    payload
                }
            }
            _ => value,
        }
    }

    fn box_value(&mut self, ctx: &mut FnCtx, value: ValueId, ty: TypeId) -> ValueId {
        let ir = self.ir_ty(ty);
        let size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: 8,
            },
            IrType::I64,
        );
        let boxed = ctx.b.push(Instr::Malloc { size }, IrType::Ptr);
        ctx.b.push(
            Instr::Store {
                ty: ir,
                ptr: boxed,
                value,
            },
            IrType::Void,
        );
        boxed
    }

    fn global_key(&self, module: Symbol, name: Symbol) -> Symbol {
        if module == self.analysis.entry {
            name
        } else {
            Symbol::intern(&format!("{}::{}", module, name))
        }
    }

    fn deinit_class_of(&self, ty: TypeId) -> Option<Symbol> {
        let TypeKind::Named(key) = self.types.kind(ty) else {
            return None;
        };
        let mut current = *key;
        let mut fuel = 64;
        loop {
            let class = self.analysis.classes.get(&current)?;
            if class.has_deinit {
                return Some(current);
            }
            current = class.base?;
            fuel -= 1;
            if fuel == 0 {
                return None;
            }
        }
    }

    fn fresh(&mut self, prefix: &str) -> Symbol {
        self.counter += 1;
        Symbol::intern(&format!("{}_{}", prefix, self.counter))
    }
}

fn build_subst(generics: &[Symbol], args: &[TypeId]) -> FxHashMap<Symbol, TypeId> {
    generics
        .iter()
        .zip(args.iter())
        .map(|(&g, &a)| (g, a))
        .collect()
}

fn sanitize(name: &str) -> String {
    name.replace("::", "_").replace('.', "_")
}

mod concurrency;
mod expr_lowering;
mod matching;
