//! Expression lowering: values, places, calls, closures, and the
//! null-safety operators.

use super::*;

impl<'a> Lowerer<'a> {
    pub(super) fn lower_expr(&mut self, ctx: &mut FnCtx, e: &Expr) -> LResult<ValueId> {
        match &e.kind {
            ExprKind::Lit(lit) => Ok(self.lower_lit(ctx, lit)),
            ExprKind::Var(name) => self.lower_var(ctx, e, *name),
            ExprKind::Qualified(module, name) => self.lower_qualified(ctx, e, *module, *name),
            ExprKind::Group(inner) | ExprKind::Move(inner) => self.lower_expr(ctx, inner),
            ExprKind::Unary(op, operand) => self.lower_unary(ctx, e, *op, operand),
            ExprKind::Binary(op, lhs, rhs) => self.lower_binary(ctx, e, *op, lhs, rhs),
            ExprKind::Logical(op, lhs, rhs) => self.lower_logical(ctx, *op, lhs, rhs),
            ExprKind::Assign(target, op, value) => self.lower_assign(ctx, target, *op, value),
            ExprKind::Call(callee, args) => self.lower_call(ctx, e, callee, args),
            ExprKind::Member(recv, name) => self.lower_member_get(ctx, e, recv, *name),
            ExprKind::SafeMember(recv, name) => self.lower_safe_member(ctx, e, recv, *name),
            ExprKind::Index(base, index) => {
                let (ptr, elem_ty) = self.lower_index_place(ctx, base, index)?;
                let ir = self.ir_ty(elem_ty);
                Ok(ctx.b.push(Instr::Load { ty: ir, ptr }, ir))
            }
            ExprKind::List(elems) => self.lower_list(ctx, e, elems),
            ExprKind::Map(_) => err("map literals require runtime support", e.pos),
            ExprKind::Lambda(params, _, body) => self.lower_lambda(ctx, e, params, body),
            ExprKind::Await(_) => err(
                "await is only supported in statement position (let, assignment, return, or a bare statement)",
                e.pos,
            ),
            ExprKind::New(_, args) => self.lower_new(ctx, e, args),
            ExprKind::Delete(operand) => self.lower_delete(ctx, operand),
            ExprKind::Interp(parts) => self.lower_interp(ctx, parts, e.pos),
            ExprKind::Match(scrutinee, arms) => self.lower_match_expr(ctx, e, scrutinee, arms),
            ExprKind::NotNull(operand) => {
                let v = self.lower_expr(ctx, operand)?;
                let ty = self.ty_of(ctx, operand.id);
                Ok(self.unbox_nullable(ctx, v, ty))
            }
            ExprKind::Elvis(operand, fallback) | ExprKind::Coalesce(operand, fallback) => {
                self.lower_elvis(ctx, e, operand, fallback)
            }
            ExprKind::Send(chan, value) => self.lower_send(ctx, chan, value),
            ExprKind::Recv(chan) => self.lower_recv(ctx, e, chan),
            ExprKind::Incr(target, prefix) => self.lower_step(ctx, target, 1, *prefix),
            ExprKind::Decr(target, prefix) => self.lower_step(ctx, target, -1, *prefix),
            ExprKind::Cast(operand, _) => self.lower_cast(ctx, e, operand),
            ExprKind::TypeTest(..) => {
                err("type tests require runtime type information", e.pos)
            }
            ExprKind::Range(..) => err("range values are only usable in for loops", e.pos),
            ExprKind::Error => err("cannot lower an expression hole", e.pos),
        }
    }

    fn lower_lit(&mut self, ctx: &mut FnCtx, lit: &Lit) -> ValueId {
        match lit {
            Lit::Int(n) => ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I64,
                    value: *n,
                },
                IrType::I64,
            ),
            Lit::Float32(f) => ctx.b.push(
                Instr::ConstFloat {
                    ty: IrType::F32,
                    value: *f as f64,
                },
                IrType::F32,
            ),
            Lit::Float64(f) => ctx.b.push(
                Instr::ConstFloat {
                    ty: IrType::F64,
                    value: *f,
                },
                IrType::F64,
            ),
            Lit::Str(s) => ctx.b.push(Instr::ConstStr { value: *s }, IrType::Ptr),
            Lit::Bool(b) => ctx.b.push(Instr::ConstBool { value: *b }, IrType::I1),
            Lit::Nil => ctx.b.push(Instr::ConstNull, IrType::Ptr),
        }
    }

    fn lower_var(&mut self, ctx: &mut FnCtx, e: &Expr, name: Symbol) -> LResult<ValueId> {
        if let Some(slot) = ctx.lookup(name) {
            let ir = self.ir_ty(slot.ty);
            return Ok(ctx.b.push(Instr::Load { ty: ir, ptr: slot.ptr }, ir));
        }
        if let Some(target) = self.analysis.call_targets.get(&e.id).cloned() {
            match target {
                CallTarget::Func { key, .. } => {
                    return self.make_function_closure(ctx, key);
                }
                CallTarget::Variant {
                    enum_key,
                    index,
                    type_args,
                } => {
                    let args: Vec<TypeId> = type_args
                        .iter()
                        .map(|&t| self.types.substitute(t, &ctx.subst))
                        .collect();
                    return self.construct_variant(ctx, enum_key, index, &args, &[]);
                }
                _ => {}
            }
        }
        self.lower_global_load(ctx, name, ctx.module_ctx, e.pos)
    }

    fn lower_qualified(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        module: Symbol,
        name: Symbol,
    ) -> LResult<ValueId> {
        if let Some(CallTarget::Func { key, .. }) = self.analysis.call_targets.get(&e.id).cloned()
        {
            return self.make_function_closure(ctx, key);
        }
        self.lower_global_load(ctx, name, module, e.pos)
    }

    fn lower_global_load(
        &mut self,
        ctx: &mut FnCtx,
        name: Symbol,
        module: Symbol,
        pos: Pos,
    ) -> LResult<ValueId> {
        let key = self.global_key(module, name);
        let key = if self.analysis.globals.contains_key(&key) {
            key
        } else if self.analysis.globals.contains_key(&name) {
            name
        } else {
            return err(format!("unresolved name '{}'", name), pos);
        };
        let ty = self.analysis.globals[&key].ty;
        let ir = self.ir_ty(ty);
        let addr = ctx.b.push(
            Instr::GlobalAddr {
                name: Symbol::intern(&sanitize(key.as_str())),
            },
            IrType::Ptr,
        );
        Ok(ctx.b.push(Instr::Load { ty: ir, ptr: addr }, ir))
    }

    // =========================================================================
    // PLACES
    // =========================================================================

    pub(super) fn lower_place(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
    ) -> LResult<(ValueId, TypeId)> {
        match &e.kind {
            ExprKind::Var(name) => {
                if let Some(slot) = ctx.lookup(*name) {
                    return Ok((slot.ptr, slot.ty));
                }
                let key = self.global_key(ctx.module_ctx, *name);
                let key = if self.analysis.globals.contains_key(&key) {
                    key
                } else if self.analysis.globals.contains_key(name) {
                    *name
                } else {
                    return err(format!("unresolved name '{}'", name), e.pos);
                };
                let ty = self.analysis.globals[&key].ty;
                let addr = ctx.b.push(
                    Instr::GlobalAddr {
                        name: Symbol::intern(&sanitize(key.as_str())),
                    },
                    IrType::Ptr,
                );
                Ok((addr, ty))
            }
            ExprKind::Member(recv, field) => {
                let recv_val = self.lower_expr(ctx, recv)?;
                let recv_ty = self.ty_of(ctx, recv.id);
                self.field_place(ctx, recv_val, recv_ty, *field, e.pos)
            }
            ExprKind::Index(base, index) => self.lower_index_place(ctx, base, index),
            ExprKind::Group(inner) => self.lower_place(ctx, inner),
            _ => err("expression is not assignable", e.pos),
        }
    }

    fn field_place(
        &mut self,
        ctx: &mut FnCtx,
        recv: ValueId,
        recv_ty: TypeId,
        field: Symbol,
        pos: Pos,
    ) -> LResult<(ValueId, TypeId)> {
        let (class_key, class_args) = match self.types.kind(recv_ty).clone() {
            TypeKind::Named(key) => (key, Vec::new()),
            TypeKind::Generic(key, args) if self.analysis.classes.contains_key(&key) => {
                (key, args)
            }
            _ => return err("field access on non-class value", pos),
        };
        let fields = self.flattened_fields(class_key);
        let Some(index) = fields.iter().position(|(f, _)| *f == field) else {
            return err(format!("no field '{}' in lowering", field), pos);
        };
        let generics = self
            .analysis
            .classes
            .get(&class_key)
            .map(|c| c.generics.clone())
            .unwrap_or_default();
        let subst = build_subst(&generics, &class_args);
        let field_ty = self.types.substitute(fields[index].1, &subst);
        let layout = self.ensure_class_layout(class_key, &class_args);
        let ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: layout,
                base: recv,
                index: index as u32,
            },
            IrType::Ptr,
        );
        Ok((ptr, field_ty))
    }

    fn lower_index_place(
        &mut self,
        ctx: &mut FnCtx,
        base: &Expr,
        index: &Expr,
    ) -> LResult<(ValueId, TypeId)> {
        let base_ty = self.ty_of(ctx, base.id);
        match self.types.kind(base_ty).clone() {
            TypeKind::Generic(n, args) if n.as_str() == "list" => {
                let elem_ty = args[0];
                let elem_ir = self.ir_ty(elem_ty);
                let hdr = self.lower_expr(ctx, base)?;
                let idx = self.lower_expr(ctx, index)?;
                let list_sym = Symbol::intern("list");
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
                let ptr = ctx.b.push(
                    Instr::IndexPtr {
                        elem_ty: elem_ir,
                        base: data,
                        index: idx,
                    },
                    IrType::Ptr,
                );
                Ok((ptr, elem_ty))
            }
            _ => err("indexing this type requires runtime support", base.pos),
        }
    }

    fn lower_assign(
        &mut self,
        ctx: &mut FnCtx,
        target: &Expr,
        op: Option<sablec_par::BinOp>,
        value: &Expr,
    ) -> LResult<ValueId> {
        let (ptr, slot_ty) = self.lower_place(ctx, target)?;
        let ir = self.ir_ty(slot_ty);

        let stored = match op {
            None => {
                let v = self.lower_expr(ctx, value)?;
                let from = self.ty_of(ctx, value.id);
                self.coerce(ctx, v, from, slot_ty)
            }
            Some(op) => {
                let current = ctx.b.push(Instr::Load { ty: ir, ptr }, ir);
                let rhs = self.lower_expr(ctx, value)?;
                let rhs_ty = self.ty_of(ctx, value.id);
                let rhs = self.coerce(ctx, rhs, rhs_ty, slot_ty);
                self.emit_binop(ctx, op, slot_ty, current, rhs, target.pos)?
            }
        };
        ctx.b.push(
            Instr::Store {
                ty: ir,
                ptr,
                value: stored,
            },
            IrType::Void,
        );
        Ok(stored)
    }

    fn lower_step(
        &mut self,
        ctx: &mut FnCtx,
        target: &Expr,
        delta: i64,
        prefix: bool,
    ) -> LResult<ValueId> {
        let (ptr, slot_ty) = self.lower_place(ctx, target)?;
        let ir = self.ir_ty(slot_ty);
        let old = ctx.b.push(Instr::Load { ty: ir, ptr }, ir);
        let step = ctx.b.push(
            Instr::ConstInt {
                ty: ir,
                value: delta,
            },
            ir,
        );
        let new = ctx.b.push(
            Instr::Bin {
                op: BinOp::Add,
                ty: ir,
                lhs: old,
                rhs: step,
            },
            ir,
        );
        ctx.b.push(
            Instr::Store {
                ty: ir,
                ptr,
                value: new,
            },
            IrType::Void,
        );
        Ok(if prefix { new } else { old })
    }

    // =========================================================================
    // OPERATORS
    // =========================================================================

    fn lower_unary(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        op: UnOp,
        operand: &Expr,
    ) -> LResult<ValueId> {
        let v = self.lower_expr(ctx, operand)?;
        let ty = self.ty_of(ctx, operand.id);
        match op {
            UnOp::Neg => match self.types.kind(ty) {
                TypeKind::Int => {
                    let zero = ctx.b.push(
                        Instr::ConstInt {
                            ty: IrType::I64,
                            value: 0,
                        },
                        IrType::I64,
                    );
                    Ok(ctx.b.push(
                        Instr::Bin {
                            op: BinOp::Sub,
                            ty: IrType::I64,
                            lhs: zero,
                            rhs: v,
                        },
                        IrType::I64,
                    ))
                }
                TypeKind::Float32 | TypeKind::Float64 => {
                    let ir = self.ir_ty(ty);
                    let zero = ctx.b.push(Instr::ConstFloat { ty: ir, value: 0.0 }, ir);
                    Ok(ctx.b.push(
                        Instr::Bin {
                            op: BinOp::FSub,
                            ty: ir,
                            lhs: zero,
                            rhs: v,
                        },
                        ir,
                    ))
                }
                _ => err("cannot negate this type", e.pos),
            },
            UnOp::Not => {
                let b = self.to_bool(ctx, v, ty);
                let t = ctx.b.push(Instr::ConstBool { value: true }, IrType::I1);
                Ok(ctx.b.push(
                    Instr::Bin {
                        op: BinOp::Xor,
                        ty: IrType::I1,
                        lhs: b,
                        rhs: t,
                    },
                    IrType::I1,
                ))
            }
            UnOp::BitNot => {
                let ones = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: -1,
                    },
                    IrType::I64,
                );
                Ok(ctx.b.push(
                    Instr::Bin {
                        op: BinOp::Xor,
                        ty: IrType::I64,
                        lhs: v,
                        rhs: ones,
                    },
                    IrType::I64,
                ))
            }
        }
    }

    fn lower_binary(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        op: sablec_par::BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> LResult<ValueId> {
        // Operator methods on user types were resolved by the checker.
        if let Some(CallTarget::Method { class, method, .. }) =
            self.analysis.call_targets.get(&e.id).cloned()
        {
            let recv = self.lower_expr(ctx, lhs)?;
            let arg = self.lower_expr(ctx, rhs)?;
            let name = Symbol::intern(&format!("{}_{}", sanitize(class.as_str()), method));
            let ret_ty = self.ty_of(ctx, e.id);
            let ir = self.ir_ty(ret_ty);
            return Ok(ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(name),
                    args: vec![recv, arg],
                    ty: ir,
                },
                ir,
            ));
        }

        use sablec_par::BinOp as B;
        let l_ty = self.ty_of(ctx, lhs.id);
        let r_ty = self.ty_of(ctx, rhs.id);
        let l = self.lower_expr(ctx, lhs)?;
        let r = self.lower_expr(ctx, rhs)?;

        match op {
            B::Add | B::Sub | B::Mul | B::Div | B::Rem | B::Pow => {
                let result_ty = self.ty_of(ctx, e.id);
                let l = self.coerce(ctx, l, l_ty, result_ty);
                let r = self.coerce(ctx, r, r_ty, result_ty);
                self.emit_binop(ctx, op, result_ty, l, r, e.pos)
            }
            B::Shl | B::Shr | B::BitAnd | B::BitOr | B::BitXor => {
                let int = self.types.int();
                self.emit_binop(ctx, op, int, l, r, e.pos)
            }
            B::Eq | B::Ne | B::StrictEq | B::StrictNe | B::Lt | B::Le | B::Gt | B::Ge => {
                self.emit_compare(ctx, op, l, l_ty, r, r_ty, e.pos)
            }
        }
    }

    pub(super) fn emit_binop(
        &mut self,
        ctx: &mut FnCtx,
        op: sablec_par::BinOp,
        operand_ty: TypeId,
        l: ValueId,
        r: ValueId,
        pos: Pos,
    ) -> LResult<ValueId> {
        use sablec_par::BinOp as B;
        match self.types.kind(operand_ty).clone() {
            TypeKind::Str => match op {
                B::Add => Ok(ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("string_concat")),
                        args: vec![l, r],
                        ty: IrType::Ptr,
                    },
                    IrType::Ptr,
                )),
                _ => err("string operator requires runtime support", pos),
            },
            TypeKind::Int => {
                let ir_op = match op {
                    B::Add => BinOp::Add,
                    B::Sub => BinOp::Sub,
                    B::Mul => BinOp::Mul,
                    B::Div => BinOp::Div,
                    B::Rem => BinOp::Rem,
                    B::Shl => BinOp::Shl,
                    B::Shr => BinOp::Shr,
                    B::BitAnd => BinOp::And,
                    B::BitOr => BinOp::Or,
                    B::BitXor => BinOp::Xor,
                    B::Pow => return self.lower_int_pow(ctx, l, r),
                    _ => return err("operator is not integer arithmetic", pos),
                };
                Ok(ctx.b.push(
                    Instr::Bin {
                        op: ir_op,
                        ty: IrType::I64,
                        lhs: l,
                        rhs: r,
                    },
                    IrType::I64,
                ))
            }
            TypeKind::Float32 | TypeKind::Float64 => {
                let ir = self.ir_ty(operand_ty);
                let ir_op = match op {
                    B::Add => BinOp::FAdd,
                    B::Sub => BinOp::FSub,
                    B::Mul => BinOp::FMul,
                    B::Div => BinOp::FDiv,
                    B::Rem => BinOp::FRem,
                    B::Pow => {
                        return err("float exponentiation requires runtime support", pos)
                    }
                    _ => return err("operator is not float arithmetic", pos),
                };
                Ok(ctx.b.push(
                    Instr::Bin {
                        op: ir_op,
                        ty: ir,
                        lhs: l,
                        rhs: r,
                    },
                    ir,
                ))
            }
            TypeKind::Error => err("cannot lower arithmetic on an error type", pos),
            _ => err("operator is not defined for this type in lowering", pos),
        }
    }

    /// `base ** exp` on integers as an inline multiply loop.
    fn lower_int_pow(&mut self, ctx: &mut FnCtx, base: ValueId, exp: ValueId) -> LResult<ValueId> {
        let acc_slot = ctx.b.push_entry(Instr::Alloc { ty: IrType::I64 }, IrType::Ptr);
        let i_slot = ctx.b.push_entry(Instr::Alloc { ty: IrType::I64 }, IrType::Ptr);
        let one = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: 1,
            },
            IrType::I64,
        );
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
                ptr: acc_slot,
                value: one,
            },
            IrType::Void,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: i_slot,
                value: zero,
            },
            IrType::Void,
        );
        let cond_bb = ctx.b.new_block("powcond");
        let body_bb = ctx.b.new_block("powbody");
        let end_bb = ctx.b.new_block("powend");
        ctx.b.terminate(Terminator::Br { target: cond_bb });

        ctx.b.switch_to(cond_bb);
        let i = ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: i_slot,
            },
            IrType::I64,
        );
        let going = ctx.b.push(
            Instr::Cmp {
                op: CmpOp::Lt,
                ty: IrType::I64,
                lhs: i,
                rhs: exp,
            },
            IrType::I1,
        );
        ctx.b.terminate(Terminator::CondBr {
            cond: going,
            then_bb: body_bb,
            else_bb: end_bb,
        });

        ctx.b.switch_to(body_bb);
        let acc = ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: acc_slot,
            },
            IrType::I64,
        );
        let next = ctx.b.push(
            Instr::Bin {
                op: BinOp::Mul,
                ty: IrType::I64,
                lhs: acc,
                rhs: base,
            },
            IrType::I64,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: acc_slot,
                value: next,
            },
            IrType::Void,
        );
        let i2 = ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: i_slot,
            },
            IrType::I64,
        );
        let i3 = ctx.b.push(
            Instr::Bin {
                op: BinOp::Add,
                ty: IrType::I64,
                lhs: i2,
                rhs: one,
            },
            IrType::I64,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: i_slot,
                value: i3,
            },
            IrType::Void,
        );
        ctx.b.terminate(Terminator::Br { target: cond_bb });

        ctx.b.switch_to(end_bb);
        Ok(ctx.b.push(
            Instr::Load {
                ty: IrType::I64,
                ptr: acc_slot,
            },
            IrType::I64,
        ))
    }

    fn emit_compare(
        &mut self,
        ctx: &mut FnCtx,
        op: sablec_par::BinOp,
        l: ValueId,
        l_ty: TypeId,
        r: ValueId,
        r_ty: TypeId,
        pos: Pos,
    ) -> LResult<ValueId> {
        use sablec_par::BinOp as B;
        let numeric = |k: &TypeKind| matches!(k, TypeKind::Int | TypeKind::Float32 | TypeKind::Float64);
        let float = matches!(self.types.kind(l_ty), TypeKind::Float32 | TypeKind::Float64)
            || matches!(self.types.kind(r_ty), TypeKind::Float32 | TypeKind::Float64);

        if numeric(self.types.kind(l_ty)) && numeric(self.types.kind(r_ty)) {
            if float {
                let f64_ty = self.types.float64();
                let l = self.coerce(ctx, l, l_ty, f64_ty);
                let r = self.coerce(ctx, r, r_ty, f64_ty);
                let cmp = match op {
                    B::Eq | B::StrictEq => CmpOp::FEq,
                    B::Ne | B::StrictNe => CmpOp::FNe,
                    B::Lt => CmpOp::FLt,
                    B::Le => CmpOp::FLe,
                    B::Gt => CmpOp::FGt,
                    B::Ge => CmpOp::FGe,
                    _ => return err("not a comparison", pos),
                };
                return Ok(ctx.b.push(
                    Instr::Cmp {
                        op: cmp,
                        ty: IrType::F64,
                        lhs: l,
                        rhs: r,
                    },
                    IrType::I1,
                ));
            }
            let cmp = match op {
                B::Eq | B::StrictEq => CmpOp::Eq,
                B::Ne | B::StrictNe => CmpOp::Ne,
                B::Lt => CmpOp::Lt,
                B::Le => CmpOp::Le,
                B::Gt => CmpOp::Gt,
                B::Ge => CmpOp::Ge,
                _ => return err("not a comparison", pos),
            };
            return Ok(ctx.b.push(
                Instr::Cmp {
                    op: cmp,
                    ty: IrType::I64,
                    lhs: l,
                    rhs: r,
                },
                IrType::I1,
            ));
        }

        // Booleans compare as integers.
        if matches!(self.types.kind(l_ty), TypeKind::Bool) {
            let cmp = match op {
                B::Eq | B::StrictEq => CmpOp::Eq,
                B::Ne | B::StrictNe => CmpOp::Ne,
                _ => return err("bool supports only equality", pos),
            };
            return Ok(ctx.b.push(
                Instr::Cmp {
                    op: cmp,
                    ty: IrType::I1,
                    lhs: l,
                    rhs: r,
                },
                IrType::I1,
            ));
        }

        // Pointer-shaped values (strings, classes, nullables, nil):
        // identity comparison.
        let cmp = match op {
            B::Eq | B::StrictEq => CmpOp::Eq,
            B::Ne | B::StrictNe => CmpOp::Ne,
            _ => return err("ordering on this type requires runtime support", pos),
        };
        Ok(ctx.b.push(
            Instr::Cmp {
                op: cmp,
                ty: IrType::Ptr,
                lhs: l,
                rhs: r,
            },
            IrType::I1,
        ))
    }

    fn lower_logical(
        &mut self,
        ctx: &mut FnCtx,
        op: LogOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> LResult<ValueId> {
        let l = self.lower_expr(ctx, lhs)?;
        let l_ty = self.ty_of(ctx, lhs.id);
        let l_bool = self.to_bool(ctx, l, l_ty);
        let short = ctx.b.push(
            Instr::ConstBool {
                value: matches!(op, LogOp::Or),
            },
            IrType::I1,
        );
        let lhs_end = ctx.b.current_block();

        let rhs_bb = ctx.b.new_block("rhs");
        let merge_bb = ctx.b.new_block("logend");
        match op {
            LogOp::And => ctx.b.terminate(Terminator::CondBr {
                cond: l_bool,
                then_bb: rhs_bb,
                else_bb: merge_bb,
            }),
            LogOp::Or => ctx.b.terminate(Terminator::CondBr {
                cond: l_bool,
                then_bb: merge_bb,
                else_bb: rhs_bb,
            }),
        }

        ctx.b.switch_to(rhs_bb);
        let r = self.lower_expr(ctx, rhs)?;
        let r_ty = self.ty_of(ctx, rhs.id);
        let r_bool = self.to_bool(ctx, r, r_ty);
        let rhs_end = ctx.b.current_block();
        ctx.b.terminate(Terminator::Br { target: merge_bb });

        ctx.b.switch_to(merge_bb);
        Ok(ctx.b.push(
            Instr::Phi {
                ty: IrType::I1,
                incomings: vec![(lhs_end, short), (rhs_end, r_bool)],
            },
            IrType::I1,
        ))
    }

    /// Truthiness: bool as-is; nonzero int; nonzero float; non-null
    /// pointer.
    pub(super) fn to_bool(&mut self, ctx: &mut FnCtx, v: ValueId, ty: TypeId) -> ValueId {
        match self.types.kind(ty) {
            TypeKind::Bool => v,
            TypeKind::Int => {
                let zero = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: 0,
                    },
                    IrType::I64,
                );
                ctx.b.push(
                    Instr::Cmp {
                        op: CmpOp::Ne,
                        ty: IrType::I64,
                        lhs: v,
                        rhs: zero,
                    },
                    IrType::I1,
                )
            }
            TypeKind::Float32 | TypeKind::Float64 => {
                let ir = self.ir_ty(ty);
                let zero = ctx.b.push(Instr::ConstFloat { ty: ir, value: 0.0 }, ir);
                ctx.b.push(
                    Instr::Cmp {
                        op: CmpOp::FNe,
                        ty: ir,
                        lhs: v,
                        rhs: zero,
                    },
                    IrType::I1,
                )
            }
            _ => {
                let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
                ctx.b.push(
                    Instr::Cmp {
                        op: CmpOp::Ne,
                        ty: IrType::Ptr,
                        lhs: v,
                        rhs: null,
                    },
                    IrType::I1,
                )
            }
        }
    }

    pub(super) fn lower_condition(&mut self, ctx: &mut FnCtx, cond: &Expr) -> LResult<ValueId> {
        let v = self.lower_expr(ctx, cond)?;
        let ty = self.ty_of(ctx, cond.id);
        Ok(self.to_bool(ctx, v, ty))
    }

    // =========================================================================
    // NULL SAFETY
    // =========================================================================

    pub(super) fn unbox_nullable(&mut self, ctx: &mut FnCtx, v: ValueId, ty: TypeId) -> ValueId {
        match self.types.kind(ty) {
            TypeKind::Nullable(inner) if self.boxed_nullable(*inner) => {
                let ir = self.ir_ty(*inner);
                ctx.b.push(Instr::Load { ty: ir, ptr: v }, ir)
            }
            _ => v,
        }
    }

    fn lower_elvis(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        operand: &Expr,
        fallback: &Expr,
    ) -> LResult<ValueId> {
        let lhs = self.lower_expr(ctx, operand)?;
        let lhs_ty = self.ty_of(ctx, operand.id);
        if !self.types.is_nullable(lhs_ty) {
            return Ok(lhs);
        }
        let inner = self.types.strip_nullable(lhs_ty);
        let result_ty = self.ty_of(ctx, e.id);
        let result_ir = self.ir_ty(result_ty);

        let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
        let is_null = ctx.b.push(
            Instr::Cmp {
                op: CmpOp::Eq,
                ty: IrType::Ptr,
                lhs,
                rhs: null,
            },
            IrType::I1,
        );
        let none_bb = ctx.b.new_block("elnone");
        let some_bb = ctx.b.new_block("elsome");
        let merge_bb = ctx.b.new_block("elend");
        ctx.b.terminate(Terminator::CondBr {
            cond: is_null,
            then_bb: none_bb,
            else_bb: some_bb,
        });

        ctx.b.switch_to(some_bb);
        let unboxed = self.unbox_nullable(ctx, lhs, lhs_ty);
        let some_v = self.coerce(ctx, unboxed, inner, result_ty);
        let some_end = ctx.b.current_block();
        ctx.b.terminate(Terminator::Br { target: merge_bb });

        ctx.b.switch_to(none_bb);
        let fb = self.lower_expr(ctx, fallback)?;
        let fb_ty = self.ty_of(ctx, fallback.id);
        let none_v = self.coerce(ctx, fb, fb_ty, result_ty);
        let none_end = ctx.b.current_block();
        ctx.b.terminate(Terminator::Br { target: merge_bb });

        ctx.b.switch_to(merge_bb);
        Ok(ctx.b.push(
            Instr::Phi {
                ty: result_ir,
                incomings: vec![(some_end, some_v), (none_end, none_v)],
            },
            result_ir,
        ))
    }

    fn lower_safe_member(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        recv: &Expr,
        name: Symbol,
    ) -> LResult<ValueId> {
        let recv_v = self.lower_expr(ctx, recv)?;
        let recv_ty = self.ty_of(ctx, recv.id);
        let base_ty = self.types.strip_nullable(recv_ty);
        let result_ty = self.ty_of(ctx, e.id);

        let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
        let is_null = ctx.b.push(
            Instr::Cmp {
                op: CmpOp::Eq,
                ty: IrType::Ptr,
                lhs: recv_v,
                rhs: null,
            },
            IrType::I1,
        );
        let entry_end = ctx.b.current_block();
        let some_bb = ctx.b.new_block("safesome");
        let merge_bb = ctx.b.new_block("safeend");
        ctx.b.terminate(Terminator::CondBr {
            cond: is_null,
            then_bb: merge_bb,
            else_bb: some_bb,
        });

        ctx.b.switch_to(some_bb);
        let (field_ptr, field_ty) = self.field_place(ctx, recv_v, base_ty, name, e.pos)?;
        let ir = self.ir_ty(field_ty);
        let loaded = ctx.b.push(Instr::Load { ty: ir, ptr: field_ptr }, ir);
        let wrapped = self.coerce(ctx, loaded, field_ty, result_ty);
        let some_end = ctx.b.current_block();
        ctx.b.terminate(Terminator::Br { target: merge_bb });

        ctx.b.switch_to(merge_bb);
        Ok(ctx.b.push(
            Instr::Phi {
                ty: IrType::Ptr,
                incomings: vec![(entry_end, null), (some_end, wrapped)],
            },
            IrType::Ptr,
        ))
    }

    fn lower_member_get(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        recv: &Expr,
        name: Symbol,
    ) -> LResult<ValueId> {
        let recv_ty = self.ty_of(ctx, recv.id);
        // `len` as a property on lists.
        if name.as_str() == "len" {
            if let TypeKind::Generic(n, _) = self.types.kind(recv_ty) {
                if n.as_str() == "list" {
                    let hdr = self.lower_expr(ctx, recv)?;
                    let len_ptr = ctx.b.push(
                        Instr::FieldPtr {
                            struct_name: Symbol::intern("list"),
                            base: hdr,
                            index: 0,
                        },
                        IrType::Ptr,
                    );
                    return Ok(ctx.b.push(
                        Instr::Load {
                            ty: IrType::I64,
                            ptr: len_ptr,
                        },
                        IrType::I64,
                    ));
                }
            }
        }
        let recv_v = self.lower_expr(ctx, recv)?;
        let (ptr, field_ty) = self.field_place(ctx, recv_v, recv_ty, name, e.pos)?;
        let ir = self.ir_ty(field_ty);
        Ok(ctx.b.push(Instr::Load { ty: ir, ptr }, ir))
    }

    fn lower_cast(&mut self, ctx: &mut FnCtx, e: &Expr, operand: &Expr) -> LResult<ValueId> {
        let v = self.lower_expr(ctx, operand)?;
        let from = self.ty_of(ctx, operand.id);
        let to = self.ty_of(ctx, e.id);
        if from == to {
            return Ok(v);
        }
        use TypeKind::*;
        let out = match (self.types.kind(from).clone(), self.types.kind(to).clone()) {
            (Int, Float64) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::IntToFloat,
                    value: v,
                    ty: IrType::F64,
                },
                IrType::F64,
            ),
            (Int, Float32) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::IntToFloat,
                    value: v,
                    ty: IrType::F32,
                },
                IrType::F32,
            ),
            (Float32, Int) | (Float64, Int) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::FloatToInt,
                    value: v,
                    ty: IrType::I64,
                },
                IrType::I64,
            ),
            (Float32, Float64) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::FloatExt,
                    value: v,
                    ty: IrType::F64,
                },
                IrType::F64,
            ),
            (Float64, Float32) => ctx.b.push(
                Instr::Cast {
                    kind: CastKind::FloatTrunc,
                    value: v,
                    ty: IrType::F32,
                },
                IrType::F32,
            ),
            // Class up/down casts carry the type on the operation.
            _ => {
                let ir = self.ir_ty(to);
                ctx.b.push(Instr::Bitcast { value: v, ty: ir }, ir)
            }
        };
        Ok(out)
    }

    // =========================================================================
    // CONTAINERS AND INTERPOLATION
    // =========================================================================

    fn lower_list(&mut self, ctx: &mut FnCtx, e: &Expr, elems: &[Expr]) -> LResult<ValueId> {
        let list_ty = self.ty_of(ctx, e.id);
        let elem_ty = match self.types.kind(list_ty) {
            TypeKind::Generic(_, args) if !args.is_empty() => args[0],
            _ => return err("list literal without an element type", e.pos),
        };
        let elem_ir = self.ir_ty(elem_ty);

        let hdr_size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: 16,
            },
            IrType::I64,
        );
        let hdr = ctx.b.push(Instr::Malloc { size: hdr_size }, IrType::Ptr);
        let data_size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: (elems.len() as i64).max(1) * i64::from(elem_ir.size()),
            },
            IrType::I64,
        );
        let data = ctx.b.push(Instr::Malloc { size: data_size }, IrType::Ptr);

        let list_sym = Symbol::intern("list");
        let len = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: elems.len() as i64,
            },
            IrType::I64,
        );
        let len_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: list_sym,
                base: hdr,
                index: 0,
            },
            IrType::Ptr,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I64,
                ptr: len_ptr,
                value: len,
            },
            IrType::Void,
        );
        let data_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: list_sym,
                base: hdr,
                index: 1,
            },
            IrType::Ptr,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::Ptr,
                ptr: data_ptr,
                value: data,
            },
            IrType::Void,
        );

        for (i, elem) in elems.iter().enumerate() {
            let v = self.lower_expr(ctx, elem)?;
            let from = self.ty_of(ctx, elem.id);
            let v = self.coerce(ctx, v, from, elem_ty);
            let idx = ctx.b.push(
                Instr::ConstInt {
                    ty: IrType::I64,
                    value: i as i64,
                },
                IrType::I64,
            );
            let slot = ctx.b.push(
                Instr::IndexPtr {
                    elem_ty: elem_ir,
                    base: data,
                    index: idx,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: elem_ir,
                    ptr: slot,
                    value: v,
                },
                IrType::Void,
            );
        }
        Ok(hdr)
    }

    fn lower_interp(
        &mut self,
        ctx: &mut FnCtx,
        parts: &[InterpPart],
        pos: Pos,
    ) -> LResult<ValueId> {
        let mut acc: Option<ValueId> = None;
        for part in parts {
            let piece = match part {
                InterpPart::Text(text) => {
                    ctx.b.push(Instr::ConstStr { value: *text }, IrType::Ptr)
                }
                InterpPart::Expr(inner) => {
                    let v = self.lower_expr(ctx, inner)?;
                    let ty = self.ty_of(ctx, inner.id);
                    self.stringify(ctx, v, ty)
                }
            };
            acc = Some(match acc {
                None => piece,
                Some(prev) => ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("string_concat")),
                        args: vec![prev, piece],
                        ty: IrType::Ptr,
                    },
                    IrType::Ptr,
                ),
            });
        }
        Ok(acc.unwrap_or_else(|| {
            let _ = pos;
            ctx.b.push(
                Instr::ConstStr {
                    value: Symbol::intern(""),
                },
                IrType::Ptr,
            )
        }))
    }

    pub(super) fn stringify(&mut self, ctx: &mut FnCtx, v: ValueId, ty: TypeId) -> ValueId {
        match self.types.kind(ty).clone() {
            TypeKind::Str => v,
            TypeKind::Int => ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(Symbol::intern("int_to_string")),
                    args: vec![v],
                    ty: IrType::Ptr,
                },
                IrType::Ptr,
            ),
            TypeKind::Bool => {
                let wide = ctx.b.push(
                    Instr::Cast {
                        kind: CastKind::SExt,
                        value: v,
                        ty: IrType::I64,
                    },
                    IrType::I64,
                );
                ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("int_to_string")),
                        args: vec![wide],
                        ty: IrType::Ptr,
                    },
                    IrType::Ptr,
                )
            }
            TypeKind::Float64 => ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(Symbol::intern("float_to_string")),
                    args: vec![v],
                    ty: IrType::Ptr,
                },
                IrType::Ptr,
            ),
            TypeKind::Float32 => {
                let wide = ctx.b.push(
                    Instr::Cast {
                        kind: CastKind::FloatExt,
                        value: v,
                        ty: IrType::F64,
                    },
                    IrType::F64,
                );
                ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(Symbol::intern("float_to_string")),
                        args: vec![wide],
                        ty: IrType::Ptr,
                    },
                    IrType::Ptr,
                )
            }
            _ => ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(Symbol::intern("to_string")),
                    args: vec![v],
                    ty: IrType::Ptr,
                },
                IrType::Ptr,
            ),
        }
    }

    // =========================================================================
    // ALLOCATION
    // =========================================================================

    fn lower_new(&mut self, ctx: &mut FnCtx, e: &Expr, args: &[Expr]) -> LResult<ValueId> {
        let ty = self.ty_of(ctx, e.id);
        match self.types.kind(ty).clone() {
            TypeKind::Generic(name, _) if name.as_str() == "Channel" => {
                // The runtime owns the channel representation; lowering
                // allocates its block.
                for arg in args {
                    self.lower_expr(ctx, arg)?;
                }
                let size = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: 64,
                    },
                    IrType::I64,
                );
                Ok(ctx.b.push(Instr::Malloc { size }, IrType::Ptr))
            }
            TypeKind::Named(class_key) => self.lower_class_new(ctx, e, class_key, &[], args),
            TypeKind::Generic(class_key, type_args)
                if self.analysis.classes.contains_key(&class_key) =>
            {
                self.lower_class_new(ctx, e, class_key, &type_args, args)
            }
            _ => err("cannot construct this type", e.pos),
        }
    }

    fn lower_class_new(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        class_key: Symbol,
        type_args: &[TypeId],
        args: &[Expr],
    ) -> LResult<ValueId> {
        let Some(class) = self.analysis.classes.get(&class_key).cloned() else {
            return err("unknown class in lowering", e.pos);
        };
        let layout = self.ensure_class_layout(class_key, type_args);
        let size_bytes = self.module.structs[&layout].size();
        let size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: i64::from(size_bytes),
            },
            IrType::I64,
        );
        let obj = ctx.b.push(Instr::Malloc { size }, IrType::Ptr);

        let subst = build_subst(&class.generics, type_args);
        let init_name = Symbol::intern("init");
        if class.methods.contains_key(&init_name) {
            // malloc plus constructor call.
            let ctor = if type_args.is_empty() {
                Symbol::intern(&format!("{}_init", sanitize(class_key.as_str())))
            } else {
                self.mono
                    .instantiate_method(&self.types, class_key, init_name, type_args)
            };
            let mut call_args = vec![obj];
            for arg in args {
                let v = self.lower_expr(ctx, arg)?;
                call_args.push(v);
            }
            ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(ctor),
                    args: call_args,
                    ty: IrType::Void,
                },
                IrType::Void,
            );
            return Ok(obj);
        }

        // Field-wise construction; missing arguments take declared
        // defaults or zero values.
        let fields = self.flattened_fields(class_key);
        let defaults: Vec<Option<Expr>> = {
            let mut out = Vec::new();
            let mut chain = Vec::new();
            let mut current = Some(class_key);
            while let Some(key) = current {
                let Some(c) = self.analysis.classes.get(&key) else { break };
                chain.push(key);
                current = c.base;
            }
            for key in chain.iter().rev() {
                for fd in &self.analysis.classes[key].field_decls {
                    out.push(fd.default.clone());
                }
            }
            out
        };
        for (i, (_, field_ty)) in fields.iter().enumerate() {
            let concrete = self.types.substitute(*field_ty, &subst);
            let ir = self.ir_ty(concrete);
            let value = if let Some(arg) = args.get(i) {
                let v = self.lower_expr(ctx, arg)?;
                let from = self.ty_of(ctx, arg.id);
                self.coerce(ctx, v, from, concrete)
            } else if let Some(Some(default)) = defaults.get(i) {
                let v = self.lower_expr(ctx, default)?;
                let from = self.ty_of(ctx, default.id);
                self.coerce(ctx, v, from, concrete)
            } else {
                self.zero_value(ctx, ir)
            };
            let field_ptr = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: layout,
                    base: obj,
                    index: i as u32,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: ir,
                    ptr: field_ptr,
                    value,
                },
                IrType::Void,
            );
        }
        Ok(obj)
    }

    fn lower_delete(&mut self, ctx: &mut FnCtx, operand: &Expr) -> LResult<ValueId> {
        let v = self.lower_expr(ctx, operand)?;
        let ty = self.ty_of(ctx, operand.id);
        if let Some(class_key) = self.deinit_class_of(ty) {
            let deinit = Symbol::intern(&format!("{}_deinit", sanitize(class_key.as_str())));
            ctx.b.push(
                Instr::Call {
                    callee: Callee::Direct(deinit),
                    args: vec![v],
                    ty: IrType::Void,
                },
                IrType::Void,
            );
        }
        Ok(ctx.b.push(Instr::Free { ptr: v }, IrType::Void))
    }

    // =========================================================================
    // VARIANTS
    // =========================================================================

    pub(super) fn construct_variant(
        &mut self,
        ctx: &mut FnCtx,
        enum_key: Symbol,
        index: u32,
        type_args: &[TypeId],
        args: &[(ValueId, TypeId)],
    ) -> LResult<ValueId> {
        let base = self.ensure_enum_layouts(enum_key, type_args);
        let Some(info) = self.analysis.enums.get(&enum_key).cloned() else {
            return err("unknown enum in lowering", Pos::dummy());
        };
        let variant = &info.variants[index as usize];
        let layout = Symbol::intern(&format!("{}_{}", base, variant.name));
        let subst = build_subst(&info.generics, type_args);

        let size_bytes = self.module.structs[&layout].size();
        let size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: i64::from(size_bytes),
            },
            IrType::I64,
        );
        let obj = ctx.b.push(Instr::Malloc { size }, IrType::Ptr);

        let tag = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I32,
                value: i64::from(index),
            },
            IrType::I32,
        );
        let tag_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: layout,
                base: obj,
                index: 0,
            },
            IrType::Ptr,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::I32,
                ptr: tag_ptr,
                value: tag,
            },
            IrType::Void,
        );

        for (i, ((value, value_ty), payload_ty)) in
            args.iter().zip(variant.payload.clone()).enumerate()
        {
            let concrete = self.types.substitute(payload_ty, &subst);
            let ir = self.ir_ty(concrete);
            let v = self.coerce(ctx, *value, *value_ty, concrete);
            let field_ptr = ctx.b.push(
                Instr::FieldPtr {
                    struct_name: layout,
                    base: obj,
                    index: (i + 1) as u32,
                },
                IrType::Ptr,
            );
            ctx.b.push(
                Instr::Store {
                    ty: ir,
                    ptr: field_ptr,
                    value: v,
                },
                IrType::Void,
            );
        }
        Ok(obj)
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    fn lower_call(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        callee: &Expr,
        args: &[Expr],
    ) -> LResult<ValueId> {
        let target = self.analysis.call_targets.get(&e.id).cloned();
        match target {
            Some(CallTarget::Builtin { name }) => self.lower_builtin_call(ctx, e, name, callee, args),
            Some(CallTarget::Func { key, type_args }) => {
                let info = self
                    .analysis
                    .functions
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| LowerError {
                        msg: format!("unknown function '{}'", key),
                        pos: e.pos,
                    })?;
                // Instantiation arguments may mention the enclosing
                // function's type parameters.
                let concrete_args: Vec<TypeId> = type_args
                    .iter()
                    .map(|&t| self.types.substitute(t, &ctx.subst))
                    .collect();
                let name = if concrete_args.is_empty() {
                    Symbol::intern(&sanitize(key.as_str()))
                } else {
                    if concrete_args.iter().any(|&t| self.types.contains_param(t)) {
                        return err("unresolved type argument at call site", e.pos);
                    }
                    self.mono.instantiate_func(&self.types, key, &concrete_args)
                };
                let subst = build_subst(&info.generics, &concrete_args);
                let mut lowered = Vec::new();
                for (i, arg) in args.iter().enumerate() {
                    let v = self.lower_expr(ctx, arg)?;
                    let from = self.ty_of(ctx, arg.id);
                    let to = info
                        .params
                        .get(i)
                        .map(|p| {
                            let t = self.types.substitute(p.ty, &subst);
                            match self.types.kind(t) {
                                TypeKind::RvalueRef(inner) => *inner,
                                _ => t,
                            }
                        })
                        .unwrap_or(from);
                    lowered.push(self.coerce(ctx, v, from, to));
                }
                let ret_ty = self.ty_of(ctx, e.id);
                let ir = self.ir_ty(ret_ty);
                Ok(ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(name),
                        args: lowered,
                        ty: ir,
                    },
                    ir,
                ))
            }
            Some(CallTarget::Method {
                class,
                method,
                type_args,
            }) => {
                if !type_args.is_empty() {
                    return err("generic methods are not supported in lowering", e.pos);
                }
                let (recv, safe) = match &callee.kind {
                    ExprKind::Member(recv, _) => (recv, false),
                    ExprKind::SafeMember(recv, _) => (recv, true),
                    _ => return err("method call without a receiver", e.pos),
                };
                if safe {
                    return err("safe method calls are not supported in lowering", e.pos);
                }
                let recv_v = self.lower_expr(ctx, recv)?;
                let recv_ty = self.ty_of(ctx, recv.id);
                let name = match self.types.kind(recv_ty).clone() {
                    TypeKind::Generic(key, class_args)
                        if self.analysis.classes.contains_key(&key) =>
                    {
                        self.ensure_class_layout(key, &class_args);
                        self.mono
                            .instantiate_method(&self.types, key, method, &class_args)
                    }
                    _ => Symbol::intern(&format!("{}_{}", sanitize(class.as_str()), method)),
                };
                let mut lowered = vec![recv_v];
                for arg in args {
                    lowered.push(self.lower_expr(ctx, arg)?);
                }
                let ret_ty = self.ty_of(ctx, e.id);
                let ir = self.ir_ty(ret_ty);
                Ok(ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(name),
                        args: lowered,
                        ty: ir,
                    },
                    ir,
                ))
            }
            Some(CallTarget::Extension { key }) => {
                let recv = match &callee.kind {
                    ExprKind::Member(recv, _) | ExprKind::SafeMember(recv, _) => recv,
                    _ => return err("extension call without a receiver", e.pos),
                };
                let recv_v = self.lower_expr(ctx, recv)?;
                let mut lowered = vec![recv_v];
                for arg in args {
                    lowered.push(self.lower_expr(ctx, arg)?);
                }
                let name = Symbol::intern(&sanitize(key.as_str()));
                let ret_ty = self.ty_of(ctx, e.id);
                let ir = self.ir_ty(ret_ty);
                Ok(ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(name),
                        args: lowered,
                        ty: ir,
                    },
                    ir,
                ))
            }
            Some(CallTarget::Variant {
                enum_key,
                index,
                type_args,
            }) => {
                let concrete: Vec<TypeId> = type_args
                    .iter()
                    .map(|&t| self.types.substitute(t, &ctx.subst))
                    .collect();
                let mut lowered = Vec::new();
                for arg in args {
                    let v = self.lower_expr(ctx, arg)?;
                    let ty = self.ty_of(ctx, arg.id);
                    lowered.push((v, ty));
                }
                self.construct_variant(ctx, enum_key, index, &concrete, &lowered)
            }
            Some(CallTarget::Closure) | None => {
                let closure = self.lower_expr(ctx, callee)?;
                self.lower_closure_call(ctx, e, closure, args)
            }
        }
    }

    fn lower_closure_call(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        closure: ValueId,
        args: &[Expr],
    ) -> LResult<ValueId> {
        let closure_sym = Symbol::intern("closure");
        let code_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: closure_sym,
                base: closure,
                index: 0,
            },
            IrType::Ptr,
        );
        let code = ctx.b.push(
            Instr::Load {
                ty: IrType::Ptr,
                ptr: code_ptr,
            },
            IrType::Ptr,
        );
        let env_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: closure_sym,
                base: closure,
                index: 1,
            },
            IrType::Ptr,
        );
        let env = ctx.b.push(
            Instr::Load {
                ty: IrType::Ptr,
                ptr: env_ptr,
            },
            IrType::Ptr,
        );
        // Closure ABI: (code, env) with the environment as the leading
        // argument.
        let mut lowered = vec![env];
        for arg in args {
            lowered.push(self.lower_expr(ctx, arg)?);
        }
        let ret_ty = self.ty_of(ctx, e.id);
        let ir = self.ir_ty(ret_ty);
        Ok(ctx.b.push(
            Instr::Call {
                callee: Callee::Indirect(code),
                args: lowered,
                ty: ir,
            },
            ir,
        ))
    }

    fn lower_builtin_call(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        name: Symbol,
        callee: &Expr,
        args: &[Expr],
    ) -> LResult<ValueId> {
        match name.as_str() {
            "len" => {
                let recv = match &callee.kind {
                    ExprKind::Member(recv, _) => recv,
                    _ => return err("len() without a receiver", e.pos),
                };
                let recv_ty = self.ty_of(ctx, recv.id);
                match self.types.kind(recv_ty) {
                    TypeKind::Generic(n, _) if n.as_str() == "list" => {
                        let hdr = self.lower_expr(ctx, recv)?;
                        let len_ptr = ctx.b.push(
                            Instr::FieldPtr {
                                struct_name: Symbol::intern("list"),
                                base: hdr,
                                index: 0,
                            },
                            IrType::Ptr,
                        );
                        Ok(ctx.b.push(
                            Instr::Load {
                                ty: IrType::I64,
                                ptr: len_ptr,
                            },
                            IrType::I64,
                        ))
                    }
                    _ => err("len() on this type requires runtime support", e.pos),
                }
            }
            "to_string" => {
                let arg = args
                    .first()
                    .ok_or_else(|| LowerError {
                        msg: "to_string without an argument".to_owned(),
                        pos: e.pos,
                    })?;
                let v = self.lower_expr(ctx, arg)?;
                let ty = self.ty_of(ctx, arg.id);
                Ok(self.stringify(ctx, v, ty))
            }
            _ => {
                let mut lowered = Vec::new();
                for arg in args {
                    lowered.push(self.lower_expr(ctx, arg)?);
                }
                let ret_ty = self.ty_of(ctx, e.id);
                let ir = self.ir_ty(ret_ty);
                Ok(ctx.b.push(
                    Instr::Call {
                        callee: Callee::Direct(name),
                        args: lowered,
                        ty: ir,
                    },
                    ir,
                ))
            }
        }
    }

    // =========================================================================
    // CLOSURES
    // =========================================================================

    /// A named function as a value: wrap it in a thunk that discards the
    /// closure environment.
    fn make_function_closure(&mut self, ctx: &mut FnCtx, key: Symbol) -> LResult<ValueId> {
        let Some(info) = self.analysis.functions.get(&key).cloned() else {
            return err(format!("unknown function '{}'", key), Pos::dummy());
        };
        let target = Symbol::intern(&sanitize(key.as_str()));
        let thunk_name = self.fresh(&format!("{}_thunk", sanitize(key.as_str())));

        let param_irs: Vec<IrType> = info
            .params
            .iter()
            .map(|p| {
                let t = self.types.substitute(p.ty, &ctx.subst);
                self.ir_ty(t)
            })
            .collect();
        let ret_ir = {
            let t = self.types.substitute(info.ret, &ctx.subst);
            if info.is_async {
                IrType::Ptr
            } else {
                self.ir_ty(t)
            }
        };
        let mut thunk_params = vec![IrType::Ptr];
        thunk_params.extend(param_irs.iter().copied());
        let mut tb = FunctionBuilder::new(thunk_name, thunk_params, ret_ir);
        let call_args: Vec<ValueId> = (0..param_irs.len()).map(|i| tb.param(i + 1)).collect();
        let result = tb.push(
            Instr::Call {
                callee: Callee::Direct(target),
                args: call_args,
                ty: ret_ir,
            },
            ret_ir,
        );
        tb.terminate(Terminator::Ret {
            value: (ret_ir != IrType::Void).then_some(result),
        });
        self.module.functions.insert(thunk_name, tb.finish());

        self.build_closure_value(ctx, thunk_name, None)
    }

    fn build_closure_value(
        &mut self,
        ctx: &mut FnCtx,
        code: Symbol,
        env: Option<ValueId>,
    ) -> LResult<ValueId> {
        let closure_sym = Symbol::intern("closure");
        let size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: 16,
            },
            IrType::I64,
        );
        let obj = ctx.b.push(Instr::Malloc { size }, IrType::Ptr);
        let code_val = ctx.b.push(Instr::FuncAddr { name: code }, IrType::Ptr);
        let code_slot = ctx.b.push(
            Instr::FieldPtr {
                struct_name: closure_sym,
                base: obj,
                index: 0,
            },
            IrType::Ptr,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::Ptr,
                ptr: code_slot,
                value: code_val,
            },
            IrType::Void,
        );
        let env_val = match env {
            Some(v) => v,
            None => ctx.b.push(Instr::ConstNull, IrType::Ptr),
        };
        let env_slot = ctx.b.push(
            Instr::FieldPtr {
                struct_name: closure_sym,
                base: obj,
                index: 1,
            },
            IrType::Ptr,
        );
        ctx.b.push(
            Instr::Store {
                ty: IrType::Ptr,
                ptr: env_slot,
                value: env_val,
            },
            IrType::Void,
        );
        Ok(obj)
    }

    /// Lambda lowering: capture analysis, a heap environment struct, and a
    /// lifted function taking the environment as its leading parameter.
    fn lower_lambda(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        params: &[sablec_par::Param],
        body: &Expr,
    ) -> LResult<ValueId> {
        let fn_ty = self.ty_of(ctx, e.id);
        let (param_tys, ret_ty) = match self.types.kind(fn_ty).clone() {
            TypeKind::Fn(params, ret) => (params, ret),
            _ => return err("lambda without a function type", e.pos),
        };

        // Free variables that resolve to enclosing locals are captured:
        // by value normally, by reference (slot address) when mutable.
        let mut bound: Vec<Symbol> = params.iter().map(|p| p.name).collect();
        let mut free = Vec::new();
        collect_free_vars(body, &mut bound, &mut free);
        let captures: Vec<(Symbol, Slot)> = free
            .into_iter()
            .filter_map(|name| ctx.lookup(name).map(|slot| (name, slot)))
            .collect();

        let env_fields: Vec<IrType> = captures
            .iter()
            .map(|(_, slot)| {
                if slot.mutable {
                    IrType::Ptr
                } else {
                    self.ir_ty(slot.ty)
                }
            })
            .collect();
        let env_layout = self.fresh("lambda_env");
        self.module.structs.insert(
            env_layout,
            StructLayout {
                name: env_layout,
                fields: env_fields.clone(),
            },
        );

        // Materialize the environment.
        let env_size = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I64,
                value: i64::from((env_fields.len() as u32).max(1) * 8),
            },
            IrType::I64,
        );
        let env = ctx.b.push(Instr::Malloc { size: env_size }, IrType::Ptr);
        for (i, (_, slot)) in captures.iter().enumerate() {
            let (value, ir) = if slot.mutable {
                (slot.ptr, IrType::Ptr)
            } else {
                let ir = self.ir_ty(slot.ty);
                let v = ctx.b.push(Instr::Load { ty: ir, ptr: slot.ptr }, ir);
                (v, ir)
            };
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
                    value,
                },
                IrType::Void,
            );
        }

        // The lifted function.
        let lifted = self.fresh("lambda");
        let mut lifted_params = vec![IrType::Ptr];
        for &p in &param_tys {
            lifted_params.push(self.ir_ty(p));
        }
        let ret_ir = self.ir_ty(ret_ty);
        let mut sub = FnCtx {
            b: FunctionBuilder::new(lifted, lifted_params, ret_ir),
            scopes: Vec::new(),
            defers: Vec::new(),
            drops: Vec::new(),
            subst: ctx.subst.clone(),
            ret_ty,
            is_main: false,
            module_ctx: ctx.module_ctx,
            loop_stack: Vec::new(),
            catch_stack: Vec::new(),
            exc_slot: None,
            async_ctx: None,
        };
        sub.push_scope();
        let env_param = sub.b.param(0);
        for (i, (name, slot)) in captures.iter().enumerate() {
            let field = sub.b.push(
                Instr::FieldPtr {
                    struct_name: env_layout,
                    base: env_param,
                    index: i as u32,
                },
                IrType::Ptr,
            );
            let ptr = if slot.mutable {
                // The environment holds the outer slot's address.
                sub.b.push(
                    Instr::Load {
                        ty: IrType::Ptr,
                        ptr: field,
                    },
                    IrType::Ptr,
                )
            } else {
                field
            };
            sub.scopes.last_mut().unwrap().push((
                *name,
                Slot {
                    ptr,
                    ty: slot.ty,
                    mutable: slot.mutable,
                },
            ));
        }
        for (i, (param, &p_ty)) in params.iter().zip(param_tys.iter()).enumerate() {
            let ir = self.ir_ty(p_ty);
            let slot_ptr = sub.b.push_entry(Instr::Alloc { ty: ir }, IrType::Ptr);
            let value = sub.b.param(i + 1);
            sub.b.push(
                Instr::Store {
                    ty: ir,
                    ptr: slot_ptr,
                    value,
                },
                IrType::Void,
            );
            sub.scopes.last_mut().unwrap().push((
                param.name,
                Slot {
                    ptr: slot_ptr,
                    ty: p_ty,
                    mutable: false,
                },
            ));
        }
        let result = self.lower_expr(&mut sub, body)?;
        let body_ty = self.ty_of(&sub, body.id);
        let result = self.coerce(&mut sub, result, body_ty, ret_ty);
        sub.b.terminate(Terminator::Ret {
            value: (ret_ir != IrType::Void).then_some(result),
        });
        self.module.functions.insert(lifted, sub.b.finish());

        self.build_closure_value(ctx, lifted, Some(env))
    }
}

/// Syntactic free-variable walk: names read by the expression that are
/// not bound within it.
pub(super) fn collect_free_vars(e: &Expr, bound: &mut Vec<Symbol>, free: &mut Vec<Symbol>) {
    match &e.kind {
        ExprKind::Var(name) => {
            if !bound.contains(name) && !free.contains(name) {
                free.push(*name);
            }
        }
        ExprKind::Lit(_) | ExprKind::Qualified(..) | ExprKind::Error => {}
        ExprKind::Unary(_, a)
        | ExprKind::Group(a)
        | ExprKind::NotNull(a)
        | ExprKind::Await(a)
        | ExprKind::Recv(a)
        | ExprKind::Delete(a)
        | ExprKind::Move(a)
        | ExprKind::Cast(a, _)
        | ExprKind::TypeTest(a, _)
        | ExprKind::Incr(a, _)
        | ExprKind::Decr(a, _) => collect_free_vars(a, bound, free),
        ExprKind::Binary(_, a, b)
        | ExprKind::Logical(_, a, b)
        | ExprKind::Elvis(a, b)
        | ExprKind::Coalesce(a, b)
        | ExprKind::Send(a, b)
        | ExprKind::Index(a, b)
        | ExprKind::Range(a, b, _) => {
            collect_free_vars(a, bound, free);
            collect_free_vars(b, bound, free);
        }
        ExprKind::Assign(a, _, b) => {
            collect_free_vars(a, bound, free);
            collect_free_vars(b, bound, free);
        }
        ExprKind::Call(callee, args) => {
            collect_free_vars(callee, bound, free);
            for arg in args {
                collect_free_vars(arg, bound, free);
            }
        }
        ExprKind::Member(a, _) | ExprKind::SafeMember(a, _) => collect_free_vars(a, bound, free),
        ExprKind::List(elems) => {
            for elem in elems {
                collect_free_vars(elem, bound, free);
            }
        }
        ExprKind::Map(entries) => {
            for (k, v) in entries {
                collect_free_vars(k, bound, free);
                collect_free_vars(v, bound, free);
            }
        }
        ExprKind::Lambda(params, _, body) => {
            let depth = bound.len();
            bound.extend(params.iter().map(|p| p.name));
            collect_free_vars(body, bound, free);
            bound.truncate(depth);
        }
        ExprKind::New(_, args) => {
            for arg in args {
                collect_free_vars(arg, bound, free);
            }
        }
        ExprKind::Interp(parts) => {
            for part in parts {
                if let InterpPart::Expr(inner) = part {
                    collect_free_vars(inner, bound, free);
                }
            }
        }
        ExprKind::Match(scrutinee, arms) => {
            collect_free_vars(scrutinee, bound, free);
            for arm in arms {
                let depth = bound.len();
                collect_pattern_names(&arm.pattern, bound);
                if let Some(guard) = &arm.guard {
                    collect_free_vars(guard, bound, free);
                }
                collect_free_vars(&arm.body, bound, free);
                bound.truncate(depth);
            }
        }
    }
}

fn collect_pattern_names(pattern: &Pattern, bound: &mut Vec<Symbol>) {
    match &pattern.kind {
        PatternKind::Bind(name) => bound.push(*name),
        PatternKind::Ctor(_, subs) | PatternKind::Tuple(subs) => {
            for sub in subs {
                collect_pattern_names(sub, bound);
            }
        }
        PatternKind::Struct(_, fields, _) => {
            for (_, sub) in fields {
                collect_pattern_names(sub, bound);
            }
        }
        PatternKind::Or(a, b) => {
            collect_pattern_names(a, bound);
            collect_pattern_names(b, bound);
        }
        _ => {}
    }
}
