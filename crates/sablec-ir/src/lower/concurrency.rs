//! Concurrency lowering: channels, select, go, and async functions.
//!
//! Everything funnels into the fixed runtime surface: `chan_send`,
//! `chan_recv`, `select_execute`, `runtime_spawn`, and the async triple
//! `Promise_create` / `Promise_getFuture` / `Future_get`.
//!
//! An `async def f` produces three functions: `f`, which allocates the
//! heap state struct and the promise, stores the parameters, runs the
//! driver once, and returns the future; `f_drive`, the state machine with
//! a state-index dispatch whose suspension points store the awaited
//! future, advance the state, schedule themselves with `runtime_spawn`,
//! and return; and `f_sync`, which calls `f` and blocks on `Future_get`.
//! All locals of an async function live in the state struct, so whatever
//! is live at a suspension point survives the resume.

use super::*;
use sablec_par::SelectArm;

impl<'a> Lowerer<'a> {
    pub(super) fn lower_send(
        &mut self,
        ctx: &mut FnCtx,
        chan: &Expr,
        value: &Expr,
    ) -> LResult<ValueId> {
        let chan_ty = self.ty_of(ctx, chan.id);
        let elem_ty = self.channel_elem(chan_ty, chan.pos)?;
        let elem_ir = self.ir_ty(elem_ty);
        let ch = self.lower_expr(ctx, chan)?;
        let v = self.lower_expr(ctx, value)?;
        let from = self.ty_of(ctx, value.id);
        let v = self.coerce(ctx, v, from, elem_ty);

        // The runtime takes the value by address.
        let buf = ctx.b.push_entry(Instr::Alloc { ty: elem_ir }, IrType::Ptr);
        ctx.b.push(
            Instr::Store {
                ty: elem_ir,
                ptr: buf,
                value: v,
            },
            IrType::Void,
        );
        Ok(ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("chan_send")),
                args: vec![ch, buf],
                ty: IrType::Void,
            },
            IrType::Void,
        ))
    }

    pub(super) fn lower_recv(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        chan: &Expr,
    ) -> LResult<ValueId> {
        let elem_ty = self.ty_of(ctx, e.id);
        let elem_ir = self.ir_ty(elem_ty);
        let ch = self.lower_expr(ctx, chan)?;
        let buf = ctx.b.push_entry(Instr::Alloc { ty: elem_ir }, IrType::Ptr);
        ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("chan_recv")),
                args: vec![ch, buf],
                ty: IrType::Void,
            },
            IrType::Void,
        );
        Ok(ctx.b.push(Instr::Load { ty: elem_ir, ptr: buf }, elem_ir))
    }

    fn channel_elem(&self, chan_ty: TypeId, pos: Pos) -> LResult<TypeId> {
        match self.types.kind(chan_ty) {
            TypeKind::Generic(name, args) if name.as_str() == "Channel" && args.len() == 1 => {
                Ok(args[0])
            }
            _ => err("channel operation on a non-channel value", pos),
        }
    }

    /// `go f(args)`: evaluate the arguments now, pack them into a heap
    /// environment, and spawn a thunk that unpacks and calls the target.
    pub(super) fn lower_go(&mut self, ctx: &mut FnCtx, e: &Expr) -> LResult<()> {
        let ExprKind::Call(_callee, args) = &e.kind else {
            return err("go requires a call expression", e.pos);
        };
        let target = match self.analysis.call_targets.get(&e.id).cloned() {
            Some(CallTarget::Func { key, type_args }) => {
                let concrete: Vec<TypeId> = type_args
                    .iter()
                    .map(|&t| self.types.substitute(t, &ctx.subst))
                    .collect();
                if concrete.is_empty() {
                    Symbol::intern(&sanitize(key.as_str()))
                } else {
                    self.mono.instantiate_func(&self.types, key, &concrete)
                }
            }
            Some(CallTarget::Builtin { name }) => name,
            _ => return err("go targets must be named functions", e.pos),
        };

        // Evaluate arguments in the spawning task.
        let mut values = Vec::new();
        let mut irs = Vec::new();
        for arg in args {
            let v = self.lower_expr(ctx, arg)?;
            let ty = self.ty_of(ctx, arg.id);
            values.push(v);
            irs.push(self.ir_ty(ty));
        }

        let env_layout = self.fresh("go_env");
        self.module.structs.insert(
            env_layout,
            StructLayout {
                name: env_layout,
                fields: irs.clone(),
            },
        );
        let env_size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: i64::from((irs.len() as u32).max(1) * 8),
            },
            IrType::I64,
        );
        let env = ctx.b.push(Instr::Malloc { size: env_size }, IrType::Ptr);
        for (i, (&v, &ir)) in values.iter().zip(irs.iter()).enumerate() {
            let field = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: env_layout,
                    base: env,
                    index: i as u32,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: ir,
                    ptr: field,
                    value: v,
                },
                IrType::Void,
            );
        }

        // The spawned thunk: unpack and call.
        let thunk = self.fresh("go_thunk");
        let mut tb = FunctionBuilder::new(thunk, vec![IrType::Ptr], IrType::Void);
        let env_param = tb.param(0);
        let mut call_args = Vec::new();
        for (i, &ir) in irs.iter().enumerate() {
            let field = tb.push(
                Instr::FieldPtr {
                    struct_name: env_layout,
                    base: env_param,
                    index: i as u32,
                },
                IrType::Ptr,
            );
            call_args.push(tb.push(Instr::Load { ty: ir, ptr: field }, ir));
        }
        tb.push(
            Instr::Call {
                callee: Callee::Direct(target),
                args: call_args,
                ty: IrType::Void,
            },
            IrType::Void,
        );
        tb.push(Instr::Free { ptr: env_param }, IrType::Void);
        tb.terminate(Terminator::Ret { value: None });
        self.module.functions.insert(thunk, tb.finish());

        let code = ctx.b.push(Instr::FuncAddr { name: thunk }, IrType::Ptr);
        ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("runtime_spawn")),
                args: vec![code, env],
                ty: IrType::Void,
            },
            IrType::Void,
        );
        Ok(())
    }

    /// `select`: build the (op, channel, buffer) table, call
    /// `select_execute`, and dispatch on the returned index.
    pub(super) fn lower_select(&mut self, ctx: &mut FnCtx, arms: &[SelectArm]) -> LResult<()> {
        const ENTRY_STRIDE: i64 = 24;
        const OP_RECV: i64 = 0;
        const OP_SEND: i64 = 1;
        const OP_DEFAULT: i64 = 2;

        let entry_sym = Symbol::intern("select_entry");
        let n = arms.len() as i64;
        let table_size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: n.max(1) * ENTRY_STRIDE,
            },
            IrType::I64,
        );
        let table = ctx.b.push(Instr::Malloc { size: table_size }, IrType::Ptr);

        let mut buffers: Vec<Option<(ValueId, TypeId)>> = Vec::new();
        for (i, arm) in arms.iter().enumerate() {
            let offset = ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I64,
                    value: i as i64 * ENTRY_STRIDE,
                },
                IrType::I64,
            );
            let entry = ctx.b.push(
                Instr::IndexPtr {
                    elem_ty: IrType::I8,
                    base: table,
                    index: offset,
                },
                IrType::Ptr,
            );
            let (op, chan_v, buf) = match &arm.op {
                SelectOp::Recv { chan, .. } => {
                    let chan_ty = self.ty_of(ctx, chan.id);
                    let elem_ty = self.channel_elem(chan_ty, chan.pos)?;
                    let elem_ir = self.ir_ty(elem_ty);
                    let ch = self.lower_expr(ctx, chan)?;
                    let buf = ctx.b.push_entry(Instr::Alloc { ty: elem_ir }, IrType::Ptr);
                    buffers.push(Some((buf, elem_ty)));
                    (OP_RECV, ch, buf)
                }
                SelectOp::Send { chan, value } => {
                    let chan_ty = self.ty_of(ctx, chan.id);
                    let elem_ty = self.channel_elem(chan_ty, chan.pos)?;
                    let elem_ir = self.ir_ty(elem_ty);
                    let ch = self.lower_expr(ctx, chan)?;
                    let v = self.lower_expr(ctx, value)?;
                    let from = self.ty_of(ctx, value.id);
                    let v = self.coerce(ctx, v, from, elem_ty);
                    let buf = ctx.b.push_entry(Instr::Alloc { ty: elem_ir }, IrType::Ptr);
                    ctx.b.push(
                        Instr::Store {
                            ty: elem_ir,
                            ptr: buf,
                            value: v,
                        },
                        IrType::Void,
                    );
                    buffers.push(None);
                    (OP_SEND, ch, buf)
                }
                SelectOp::Default => {
                    let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
                    buffers.push(None);
                    (OP_DEFAULT, null, null)
                }
            };

            let op_v = ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I32,
                    value: op,
                },
                IrType::I32,
            );
            let op_ptr = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: entry_sym,
                    base: entry,
                    index: 0,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: IrType::I32,
                    ptr: op_ptr,
                    value: op_v,
                },
                IrType::Void,
            );
            let chan_ptr = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: entry_sym,
                    base: entry,
                    index: 1,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: IrType::Ptr,
                    ptr: chan_ptr,
                    value: chan_v,
                },
                IrType::Void,
            );
            let buf_ptr = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: entry_sym,
                    base: entry,
                    index: 2,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: IrType::Ptr,
                    ptr: buf_ptr,
                    value: buf,
                },
                IrType::Void,
            );
        }

        let count = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I32,
                value: n,
            },
            IrType::I32,
        );
        let chosen = ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("select_execute")),
                args: vec![table, count],
                ty: IrType::I32,
            },
            IrType::I32,
        );
        ctx.b.push(Instr::Free { ptr: table }, IrType::Void);

        // Jump-table dispatch on the returned index.
        let end_bb = ctx.b.new_block("selend");
        for (i, arm) in arms.iter().enumerate() {
            let arm_bb = ctx.b.new_block("selarm");
            let next_bb = ctx.b.new_block("selnext");
            let idx = ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I32,
                    value: i as i64,
                },
                IrType::I32,
            );
            let hit = ctx.b.push(
                Instr::Cmp {
                    op: CmpOp::Eq,
                    ty: IrType::I32,
                    lhs: chosen,
                    rhs: idx,
                },
                IrType::I1,
            );
            ctx.b.terminate(Terminator::CondBr {
                cond: hit,
                then_bb: arm_bb,
                else_bb: next_bb,
            });

            ctx.b.switch_to(arm_bb);
            ctx.push_scope();
            if let (SelectOp::Recv { bind: Some(bind), .. }, Some((buf, elem_ty))) =
                (&arm.op, buffers[i])
            {
                let slot = self.declare_local(ctx, *bind, elem_ty, false)?;
                let ir = self.ir_ty(elem_ty);
                let received = ctx.b.push(Instr::Load { ty: ir, ptr: buf }, ir);
                ctx.b.push(
                    Instr::Store {
                        ty: ir,
                        ptr: slot.ptr,
                        value: received,
                    },
                    IrType::Void,
                );
            }
            for stmt in &arm.body {
                self.lower_stmt(ctx, stmt)?;
            }
            self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
            ctx.scopes.pop();
            ctx.defers.pop();
            ctx.drops.pop();
            ctx.b.terminate(Terminator::Br { target: end_bb });
            ctx.b.switch_to(next_bb);
        }
        ctx.b.terminate(Terminator::Br { target: end_bb });
        ctx.b.switch_to(end_bb);
        Ok(())
    }

    // =========================================================================
    // ASYNC
    // =========================================================================

    pub(super) fn lower_async_function(
        &mut self,
        ir_name: Symbol,
        info: &FuncInfo,
        subst: &FxHashMap<Symbol, TypeId>,
    ) -> LResult<()> {
        let body = info
            .decl
            .as_ref()
            .map(|d| d.body.clone())
            .unwrap_or_default();
        let ret_sable = self.types.substitute(info.ret, subst);

        // State layout: state index, promise, awaited future, parameters,
        // then every local the body declares.
        let mut field_names: Vec<(Symbol, TypeId)> = Vec::new();
        for param in &info.params {
            let ty = self.types.substitute(param.ty, subst);
            field_names.push((param.name, ty));
        }
        self.collect_async_locals(subst, &body, &mut field_names);

        let state_struct = Symbol::intern(&format!("{}_state", ir_name));
        let mut fields = vec![IrType::I32, IrType::Ptr, IrType::Ptr];
        for &(_, ty) in &field_names {
            fields.push(self.ir_ty(ty));
        }
        self.module.structs.insert(
            state_struct,
            StructLayout {
                name: state_struct,
                fields,
            },
        );
        let driver_name = Symbol::intern(&format!("{}_drive", ir_name));

        self.lower_async_driver(
            driver_name,
            state_struct,
            &field_names,
            &body,
            info,
            subst,
            ret_sable,
        )?;
        self.lower_async_entry(ir_name, driver_name, state_struct, &field_names, info, subst)?;
        self.lower_async_sync_wrapper(ir_name, info, subst, ret_sable)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_async_driver(
        &mut self,
        driver_name: Symbol,
        state_struct: Symbol,
        field_names: &[(Symbol, TypeId)],
        body: &[Stmt],
        info: &FuncInfo,
        subst: &FxHashMap<Symbol, TypeId>,
        ret_sable: TypeId,
    ) -> LResult<()> {
        let mut ctx = FnCtx {
            b: FunctionBuilder::new(driver_name, vec![IrType::Ptr], IrType::Void),
            scopes: Vec::new(),
            defers: Vec::new(),
            drops: Vec::new(),
            subst: subst.clone(),
            ret_ty: ret_sable,
            is_main: false,
            module_ctx: info.module,
            loop_stack: Vec::new(),
            catch_stack: Vec::new(),
            exc_slot: None,
            async_ctx: None,
        };
        let state_ptr = ctx.b.param(0);

        // Field addresses are computed in the entry block so they dominate
        // every state's blocks.
        let state_idx_ptr = ctx.b.push_entry(
            Instr::FieldPtr {
                struct_name: state_struct,
                base: state_ptr,
                index: 0,
            },
            IrType::Ptr,
        );
        let awaited_ptr = ctx.b.push_entry(
            Instr::FieldPtr {
                struct_name: state_struct,
                base: state_ptr,
                index: 2,
            },
            IrType::Ptr,
        );
        let mut field_ptrs = FxHashMap::default();
        for (i, &(name, _)) in field_names.iter().enumerate() {
            let ptr = ctx.b.push_entry(
                Instr::FieldPtr {
                    struct_name: state_struct,
                    base: state_ptr,
                    index: (i + 3) as u32,
                },
                IrType::Ptr,
            );
            field_ptrs.entry(name).or_insert(ptr);
        }

        ctx.async_ctx = Some(AsyncCtx {
            state_struct,
            state_ptr,
            field_ptrs,
            state_idx_ptr,
            awaited_ptr,
            promise_index: 1,
            driver_name,
            resume_blocks: Vec::new(),
        });

        let dispatch_bb = ctx.b.new_block("dispatch");
        let state0_bb = ctx.b.new_block("state");
        ctx.b.terminate(Terminator::Br { target: dispatch_bb });

        // Body of state 0 onward.
        ctx.b.switch_to(state0_bb);
        ctx.push_scope();
        for param in &info.params {
            let ty = self.types.substitute(param.ty, &ctx.subst);
            let ptr = ctx.async_ctx.as_ref().unwrap().field_ptrs[&param.name];
            ctx.scopes.last_mut().unwrap().push((
                param.name,
                Slot {
                    ptr,
                    ty,
                    mutable: false,
                },
            ));
        }
        for stmt in body {
            self.lower_stmt(&mut ctx, stmt)?;
        }
        if !ctx.b.is_terminated() {
            self.emit_return(&mut ctx, None)?;
        }

        // Dispatch chain: state 0 enters the body, state k resumes after
        // the k-th suspension.
        let resume_blocks = ctx
            .async_ctx
            .as_ref()
            .map(|a| a.resume_blocks.clone())
            .unwrap_or_default();
        ctx.b.switch_to(dispatch_bb);
        let idx = ctx.b.push(
            Instr::Load {
                ty: IrType::I32,
                ptr: state_idx_ptr,
            },
            IrType::I32,
        );
        let mut targets = vec![state0_bb];
        targets.extend(resume_blocks);
        for (k, &target) in targets.iter().enumerate() {
            let next_bb = ctx.b.new_block("dispnext");
            let k_const = ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I32,
                    value: k as i64,
                },
                IrType::I32,
            );
            let hit = ctx.b.push(
                Instr::Cmp {
                    op: CmpOp::Eq,
                    ty: IrType::I32,
                    lhs: idx,
                    rhs: k_const,
                },
                IrType::I1,
            );
            ctx.b.terminate(Terminator::CondBr {
                cond: hit,
                then_bb: target,
                else_bb: next_bb,
            });
            ctx.b.switch_to(next_bb);
        }
        ctx.b.terminate(Terminator::Unreachable);

        self.module.functions.insert(driver_name, ctx.b.finish());
        Ok(())
    }

    /// The future-returning entry: allocate the state, create the promise,
    /// store the parameters, run the driver once, return the future.
    fn lower_async_entry(
        &mut self,
        ir_name: Symbol,
        driver_name: Symbol,
        state_struct: Symbol,
        field_names: &[(Symbol, TypeId)],
        info: &FuncInfo,
        subst: &FxHashMap<Symbol, TypeId>,
    ) -> LResult<()> {
        let param_irs: Vec<IrType> = info
            .params
            .iter()
            .map(|p| {
                let t = self.types.substitute(p.ty, subst);
                self.ir_ty(t)
            })
            .collect();
        let mut b = FunctionBuilder::new(ir_name, param_irs.clone(), IrType::Ptr);

        let size_bytes = self.module.structs[&state_struct].size();
        let size = b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: i64::from(size_bytes),
            },
            IrType::I64,
        );
        let state = b.push(Instr::Malloc { size }, IrType::Ptr);

        let zero = b.push(
            Instr::ConstInt {
                ty: IrType::I32,
                value: 0,
            },
            IrType::I32,
        );
        let idx_ptr = b.push(
            Instr::FieldPtr {
                struct_name: state_struct,
                base: state,
                index: 0,
            },
            IrType::Ptr,
        );
        b.push(
            Instr::Store {
                ty: IrType::I32,
                ptr: idx_ptr,
                value: zero,
            },
            IrType::Void,
        );

        let promise = b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("Promise_create")),
                args: vec![],
                ty: IrType::Ptr,
            },
            IrType::Ptr,
        );
        let promise_ptr = b.push(
            Instr::FieldPtr {
                struct_name: state_struct,
                base: state,
                index: 1,
            },
            IrType::Ptr,
        );
        b.push(
            Instr::Store {
                ty: IrType::Ptr,
                ptr: promise_ptr,
                value: promise,
            },
            IrType::Void,
        );

        for (i, param) in info.params.iter().enumerate() {
            let field_index = field_names
                .iter()
                .position(|(n, _)| *n == param.name)
                .unwrap_or(i);
            let field = b.push(
                Instr::FieldPtr {
                    struct_name: state_struct,
                    base: state,
                    index: (field_index + 3) as u32,
                },
                IrType::Ptr,
            );
            let value = b.param(i);
            b.push(
                Instr::Store {
                    ty: param_irs[i],
                    ptr: field,
                    value,
                },
                IrType::Void,
            );
        }

        b.push(
            Instr::Call {
                callee: Callee::Direct(driver_name),
                args: vec![state],
                ty: IrType::Void,
            },
            IrType::Void,
        );
        let future = b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("Promise_getFuture")),
                args: vec![promise],
                ty: IrType::Ptr,
            },
            IrType::Ptr,
        );
        b.terminate(Terminator::Ret {
            value: Some(future),
        });
        self.module.functions.insert(ir_name, b.finish());
        Ok(())
    }

    /// The synchronous wrapper: call the async variant, block on
    /// `Future_get`, and return the unwrapped result.
    fn lower_async_sync_wrapper(
        &mut self,
        ir_name: Symbol,
        info: &FuncInfo,
        subst: &FxHashMap<Symbol, TypeId>,
        ret_sable: TypeId,
    ) -> LResult<()> {
        let wrapper_name = Symbol::intern(&format!("{}_sync", ir_name));
        let param_irs: Vec<IrType> = info
            .params
            .iter()
            .map(|p| {
                let t = self.types.substitute(p.ty, subst);
                self.ir_ty(t)
            })
            .collect();
        let ret_ir = self.ir_ty(ret_sable);
        let mut b = FunctionBuilder::new(wrapper_name, param_irs.clone(), ret_ir);
        let args: Vec<ValueId> = (0..param_irs.len()).map(|i| b.param(i)).collect();
        let future = b.push(
            Instr::Call {
                callee: Callee::Direct(ir_name),
                args,
                ty: IrType::Ptr,
            },
            IrType::Ptr,
        );
        let result_ptr = b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("Future_get")),
                args: vec![future],
                ty: IrType::Ptr,
            },
            IrType::Ptr,
        );
        if ret_ir == IrType::Void {
            b.terminate(Terminator::Ret { value: None });
        } else {
            let value = b.push(
                Instr::Load {
                    ty: ret_ir,
                    ptr: result_ptr,
                },
                ret_ir,
            );
            b.terminate(Terminator::Ret { value: Some(value) });
        }
        self.module.functions.insert(wrapper_name, b.finish());
        Ok(())
    }

    /// One suspension point: store the future and the next state index,
    /// schedule the driver, return; the resume block fetches the result.
    pub(super) fn lower_await(
        &mut self,
        ctx: &mut FnCtx,
        future_expr: &Expr,
        await_id: ExprId,
    ) -> LResult<ValueId> {
        let Some(async_ctx) = &ctx.async_ctx else {
            return err(
                "await outside of an async function reached lowering",
                future_expr.pos,
            );
        };
        let awaited_ptr = async_ctx.awaited_ptr;
        let state_idx_ptr = async_ctx.state_idx_ptr;
        let state_ptr = async_ctx.state_ptr;
        let driver = async_ctx.driver_name;
        let next_state = async_ctx.resume_blocks.len() as i64 + 1;

        let future = self.lower_expr(ctx, future_expr)?;
        ctx.b.push(
            Instr::Store {
                ty: IrType::Ptr,
                ptr: awaited_ptr,
                value: future,
            },
            IrType::Void,
        );
        let k = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I32,
                value: next_state,
            },
            IrType::I32,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I32,
                ptr: state_idx_ptr,
                value: k,
            },
            IrType::Void,
        );
        let code = ctx.b.push(Instr::FuncAddr { name: driver }, IrType::Ptr);
        ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("runtime_spawn")),
                args: vec![code, state_ptr],
                ty: IrType::Void,
            },
            IrType::Void,
        );
        ctx.b.terminate(Terminator::Ret { value: None });

        let resume_bb = ctx.b.new_block("resume");
        ctx.async_ctx
            .as_mut()
            .expect("async context")
            .resume_blocks
            .push(resume_bb);
        ctx.b.switch_to(resume_bb);

        let awaited = ctx.b.push(
            Instr::Load {
                ty: IrType::Ptr,
                ptr: awaited_ptr,
            },
            IrType::Ptr,
        );
        let result_ptr = ctx.b.push(
            Instr::Call {
                callee: Callee::Direct(Symbol::intern("Future_get")),
                args: vec![awaited],
                ty: IrType::Ptr,
            },
            IrType::Ptr,
        );
        let result_ty = self.ty_of(ctx, await_id);
        let ir = self.ir_ty(result_ty);
        if ir == IrType::Void {
            Ok(result_ptr)
        } else {
            Ok(ctx.b.push(Instr::Load { ty: ir, ptr: result_ptr }, ir))
        }
    }

    /// Locals of an async function body (lets and loop variables), for
    /// state-struct placement. First declaration of a name wins.
    fn collect_async_locals(
        &mut self,
        subst: &FxHashMap<Symbol, TypeId>,
        stmts: &[Stmt],
        out: &mut Vec<(Symbol, TypeId)>,
    ) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Let(l) => {
                    let ty = l
                        .init
                        .as_ref()
                        .map(|init| {
                            let t = self.analysis.expr_type(init.id);
                            self.types.substitute(t, subst)
                        })
                        .unwrap_or_else(|| self.types.error());
                    if !out.iter().any(|(n, _)| *n == l.name) {
                        out.push((l.name, ty));
                    }
                }
                StmtKind::For(name, iterable, body) => {
                    let iter_ty = self.analysis.expr_type(iterable.id);
                    let iter_ty = self.types.substitute(iter_ty, subst);
                    let elem = match self.types.kind(iter_ty) {
                        TypeKind::Generic(n, args)
                            if matches!(n.as_str(), "list" | "Channel") && !args.is_empty() =>
                        {
                            args[0]
                        }
                        _ => self.types.int(),
                    };
                    if !out.iter().any(|(n, _)| *n == *name) {
                        out.push((*name, elem));
                    }
                    self.collect_async_locals(subst, body, out);
                }
                StmtKind::Block(body) => self.collect_async_locals(subst, body, out),
                StmtKind::If(ifs) => {
                    self.collect_async_locals(subst, &ifs.then_body, out);
                    for (_, body) in &ifs.elifs {
                        self.collect_async_locals(subst, body, out);
                    }
                    if let Some(body) = &ifs.else_body {
                        self.collect_async_locals(subst, body, out);
                    }
                }
                StmtKind::While(_, body) => self.collect_async_locals(subst, body, out),
                StmtKind::Match(m) => {
                    for arm in &m.arms {
                        self.collect_async_locals(subst, &arm.body, out);
                    }
                }
                StmtKind::Try(t) => {
                    self.collect_async_locals(subst, &t.body, out);
                    for catch in &t.catches {
                        self.collect_async_locals(subst, &catch.body, out);
                    }
                    if let Some(body) = &t.finally {
                        self.collect_async_locals(subst, body, out);
                    }
                }
                StmtKind::Select(arms) => {
                    for arm in arms {
                        self.collect_async_locals(subst, &arm.body, out);
                    }
                }
                _ => {}
            }
        }
    }
}
