//! Match lowering.
//!
//! The scrutinee is lowered once into a stack slot; each arm gets a test
//! sequence that either falls through into the arm body or branches to the
//! next arm's test block. Bindings are stored into fresh slots before the
//! body runs. The final unmatched block is unreachable: the checker has
//! already proven exhaustiveness.

use super::*;
use sablec_par::{MatchExprArm, MatchStmt};

impl<'a> Lowerer<'a> {
    pub(super) fn lower_match_stmt(&mut self, ctx: &mut FnCtx, m: &MatchStmt) -> LResult<()> {
        let scrut_ty = self.ty_of(ctx, m.scrutinee.id);
        let scrut_ir = self.ir_ty(scrut_ty);
        let scrut_v = self.lower_expr(ctx, &m.scrutinee)?;
        let slot = ctx.b.push_entry(Instr::Alloc { ty: scrut_ir }, IrType::Ptr);
        ctx.b.push(
            Instr::Store {
                ty: scrut_ir,
                ptr: slot,
                value: scrut_v,
            },
            IrType::Void,
        );

        let end_bb = ctx.b.new_block("matchend");
        for arm in &m.arms {
            let fail_bb = ctx.b.new_block("matcharm");
            let scrut = ctx.b.push(
                Instr::Load {
                    ty: scrut_ir,
                    ptr: slot,
                },
                scrut_ir,
            );
            ctx.push_scope();
            self.lower_pattern_test(ctx, &arm.pattern, scrut, scrut_ty, fail_bb)?;
            if let Some(guard) = &arm.guard {
                let cond = self.lower_condition(ctx, guard)?;
                let body_bb = ctx.b.new_block("armbody");
                ctx.b.terminate(Terminator::CondBr {
                    cond,
                    then_bb: body_bb,
                    else_bb: fail_bb,
                });
                ctx.b.switch_to(body_bb);
            }
            for stmt in &arm.body {
                self.lower_stmt(ctx, stmt)?;
            }
            self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
            ctx.scopes.pop();
            ctx.defers.pop();
            ctx.drops.pop();
            ctx.b.terminate(Terminator::Br { target: end_bb });
            ctx.b.switch_to(fail_bb);
        }
        // Exhaustiveness holds; the fall-off block cannot execute.
        ctx.b.terminate(Terminator::Unreachable);
        ctx.b.switch_to(end_bb);
        Ok(())
    }

    pub(super) fn lower_match_expr(
        &mut self,
        ctx: &mut FnCtx,
        e: &Expr,
        scrutinee: &Expr,
        arms: &[MatchExprArm],
    ) -> LResult<ValueId> {
        let result_ty = self.ty_of(ctx, e.id);
        let result_ir = self.ir_ty(result_ty);
        let result_slot = ctx.b.push_entry(
            Instr::Alloc {
                ty: if result_ir == IrType::Void {
                    IrType::I64
                } else {
                    result_ir
                },
            },
            IrType::Ptr,
        );

        let scrut_ty = self.ty_of(ctx, scrutinee.id);
        let scrut_ir = self.ir_ty(scrut_ty);
        let scrut_v = self.lower_expr(ctx, scrutinee)?;
        let slot = ctx.b.push_entry(Instr::Alloc { ty: scrut_ir }, IrType::Ptr);
        ctx.b.push(
            Instr::Store {
                ty: scrut_ir,
                ptr: slot,
                value: scrut_v,
            },
            IrType::Void,
        );

        let end_bb = ctx.b.new_block("matchend");
        for arm in arms {
            let fail_bb = ctx.b.new_block("matcharm");
            let scrut = ctx.b.push(
                Instr::Load {
                    ty: scrut_ir,
                    ptr: slot,
                },
                scrut_ir,
            );
            ctx.push_scope();
            self.lower_pattern_test(ctx, &arm.pattern, scrut, scrut_ty, fail_bb)?;
            if let Some(guard) = &arm.guard {
                let cond = self.lower_condition(ctx, guard)?;
                let body_bb = ctx.b.new_block("armbody");
                ctx.b.terminate(Terminator::CondBr {
                    cond,
                    then_bb: body_bb,
                    else_bb: fail_bb,
                });
                ctx.b.switch_to(body_bb);
            }
            let value = self.lower_expr(ctx, &arm.body)?;
            let body_ty = self.ty_of(ctx, arm.body.id);
            let value = self.coerce(ctx, value, body_ty, result_ty);
            if result_ir != IrType::Void {
                ctx.b.push(
                    Instr::Store {
                        ty: result_ir,
                        ptr: result_slot,
                        value,
                    },
                    IrType::Void,
                );
            }
            self.emit_scope_exit(ctx, ctx.scopes.len() - 1)?;
            ctx.scopes.pop();
            ctx.defers.pop();
            ctx.drops.pop();
            ctx.b.terminate(Terminator::Br { target: end_bb });
            ctx.b.switch_to(fail_bb);
        }
        ctx.b.terminate(Terminator::Unreachable);
        ctx.b.switch_to(end_bb);
        if result_ir == IrType::Void {
            Ok(ctx.b.push(Instr::ConstNull, IrType::Ptr))
        } else {
            Ok(ctx.b.push(
                Instr::Load {
                    ty: result_ir,
                    ptr: result_slot,
                },
                result_ir,
            ))
        }
    }

    /// Emit the tests for one pattern. On success control continues in
    /// the current block with bindings stored; on mismatch control
    /// branches to `fail_bb`.
    fn lower_pattern_test(
        &mut self,
        ctx: &mut FnCtx,
        pattern: &Pattern,
        value: ValueId,
        ty: TypeId,
        fail_bb: BlockId,
    ) -> LResult<()> {
        // Nullable scrutinees split into the nil case and the payload.
        if let TypeKind::Nullable(inner) = *self.types.kind(ty) {
            match &pattern.kind {
                PatternKind::Lit(Lit::Nil) => {
                    let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
                    let is_nil = ctx.b.push(
                        Instr::Cmp {
                            op: CmpOp::Eq,
                            ty: IrType::Ptr,
                            lhs: value,
                            rhs: null,
                        },
                        IrType::I1,
                    );
                    self.branch_on(ctx, is_nil, fail_bb);
                    return Ok(());
                }
                PatternKind::Wildcard => return Ok(()),
                PatternKind::Bind(name) => {
                    self.bind_value(ctx, *name, value, ty)?;
                    return Ok(());
                }
                _ => {
                    let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
                    let non_nil = ctx.b.push(
                        Instr::Cmp {
                            op: CmpOp::Ne,
                            ty: IrType::Ptr,
                            lhs: value,
                            rhs: null,
                        },
                        IrType::I1,
                    );
                    self.branch_on(ctx, non_nil, fail_bb);
                    let unboxed = self.unbox_nullable(ctx, value, ty);
                    return self.lower_pattern_test(ctx, pattern, unboxed, inner, fail_bb);
                }
            }
        }

        match &pattern.kind {
            PatternKind::Wildcard => Ok(()),
            PatternKind::Bind(name) => {
                // A bare name that is a nullary variant of the scrutinee's
                // enum tests the tag instead of binding.
                if let Some((enum_key, args)) = self.enum_instance_of(ty) {
                    if let Some(info) = self.analysis.enums.get(&enum_key).cloned() {
                        if let Some(idx) = info
                            .variants
                            .iter()
                            .position(|v| v.name == *name && v.payload.is_empty())
                        {
                            return self.test_variant_tag(
                                ctx, value, enum_key, &args, idx as u32, fail_bb,
                            );
                        }
                    }
                }
                self.bind_value(ctx, *name, value, ty)
            }
            PatternKind::Lit(lit) => {
                let cond = match lit {
                    Lit::Int(n) => {
                        let c = ctx.b.push(
                            Instr::ConstInt {
                                ty: IrType::I64,
                                value: *n,
                            },
                            IrType::I64,
                        );
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::Eq,
                                ty: IrType::I64,
                                lhs: value,
                                rhs: c,
                            },
                            IrType::I1,
                        )
                    }
                    Lit::Bool(b) => {
                        let c = ctx.b.push(Instr::ConstBool { value: *b }, IrType::I1);
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::Eq,
                                ty: IrType::I1,
                                lhs: value,
                                rhs: c,
                            },
                            IrType::I1,
                        )
                    }
                    Lit::Float32(f) => {
                        let c = ctx.b.push(
                            Instr::ConstFloat {
                                ty: IrType::F32,
                                value: *f as f64,
                            },
                            IrType::F32,
                        );
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::FEq,
                                ty: IrType::F32,
                                lhs: value,
                                rhs: c,
                            },
                            IrType::I1,
                        )
                    }
                    Lit::Float64(f) => {
                        let c = ctx.b.push(
                            Instr::ConstFloat {
                                ty: IrType::F64,
                                value: *f,
                            },
                            IrType::F64,
                        );
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::FEq,
                                ty: IrType::F64,
                                lhs: value,
                                rhs: c,
                            },
                            IrType::I1,
                        )
                    }
                    Lit::Str(s) => {
                        // Identity comparison; interned literals share
                        // storage.
                        let c = ctx.b.push(Instr::ConstStr { value: *s }, IrType::Ptr);
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::Eq,
                                ty: IrType::Ptr,
                                lhs: value,
                                rhs: c,
                            },
                            IrType::I1,
                        )
                    }
                    Lit::Nil => {
                        let null = ctx.b.push(Instr::ConstNull, IrType::Ptr);
                        ctx.b.push(
                            Instr::Cmp {
                                op: CmpOp::Eq,
                                ty: IrType::Ptr,
                                lhs: value,
                                rhs: null,
                            },
                            IrType::I1,
                        )
                    }
                };
                self.branch_on(ctx, cond, fail_bb);
                Ok(())
            }
            PatternKind::Ctor(name, subs) => {
                let Some((enum_key, args)) = self.enum_instance_of(ty) else {
                    return err("constructor pattern on non-enum value", pattern.pos);
                };
                let Some(info) = self.analysis.enums.get(&enum_key).cloned() else {
                    return err("unknown enum in lowering", pattern.pos);
                };
                let Some(idx) = info.variants.iter().position(|v| v.name == *name) else {
                    return err("unknown variant in lowering", pattern.pos);
                };
                self.test_variant_tag(ctx, value, enum_key, &args, idx as u32, fail_bb)?;

                let base = self.ensure_enum_layouts(enum_key, &args);
                let layout = Symbol::intern(&format!("{}_{}", base, info.variants[idx].name));
                let subst = build_subst(&info.generics, &args);
                for (i, sub) in subs.iter().enumerate() {
                    let payload_ty = self
                        .types
                        .substitute(info.variants[idx].payload[i], &subst);
                    let ir = self.ir_ty(payload_ty);
                    let field_ptr = ctx.b.push(
                        Instr::FieldPtr {
                            struct_name: layout,
                            base: value,
                            index: (i + 1) as u32,
                        },
                        IrType::Ptr,
                    );
                    let payload = ctx.b.push(Instr::Load { ty: ir, ptr: field_ptr }, ir);
                    self.lower_pattern_test(ctx, sub, payload, payload_ty, fail_bb)?;
                }
                Ok(())
            }
            PatternKind::Tuple(subs) => {
                let TypeKind::Named(class_key) = *self.types.kind(ty) else {
                    return err("tuple pattern on non-class value", pattern.pos);
                };
                let fields = self.flattened_fields(class_key);
                let layout = self.ensure_class_layout(class_key, &[]);
                for (i, sub) in subs.iter().enumerate() {
                    let field_ty = fields[i].1;
                    let ir = self.ir_ty(field_ty);
                    let field_ptr = ctx.b.push(
                        Instr::FieldPtr {
                            struct_name: layout,
                            base: value,
                            index: i as u32,
                        },
                        IrType::Ptr,
                    );
                    let field = ctx.b.push(Instr::Load { ty: ir, ptr: field_ptr }, ir);
                    self.lower_pattern_test(ctx, sub, field, field_ty, fail_bb)?;
                }
                Ok(())
            }
            PatternKind::Struct(_, fields, _) => {
                let TypeKind::Named(class_key) = *self.types.kind(ty) else {
                    return err("struct pattern on non-class value", pattern.pos);
                };
                let class_fields = self.flattened_fields(class_key);
                let layout = self.ensure_class_layout(class_key, &[]);
                for (field_name, sub) in fields {
                    let Some(index) =
                        class_fields.iter().position(|(f, _)| f == field_name)
                    else {
                        return err("unknown field in struct pattern", pattern.pos);
                    };
                    let field_ty = class_fields[index].1;
                    let ir = self.ir_ty(field_ty);
                    let field_ptr = ctx.b.push(
                        Instr::FieldPtr {
                            struct_name: layout,
                            base: value,
                            index: index as u32,
                        },
                        IrType::Ptr,
                    );
                    let field = ctx.b.push(Instr::Load { ty: ir, ptr: field_ptr }, ir);
                    self.lower_pattern_test(ctx, sub, field, field_ty, fail_bb)?;
                }
                Ok(())
            }
            PatternKind::Or(a, b) => {
                if self.pattern_binds(a, ty) || self.pattern_binds(b, ty) {
                    return err(
                        "or-patterns with bindings are not supported in lowering",
                        pattern.pos,
                    );
                }
                let ok_bb = ctx.b.new_block("orok");
                let try_b = ctx.b.new_block("orelse");
                self.lower_pattern_test(ctx, a, value, ty, try_b)?;
                ctx.b.terminate(Terminator::Br { target: ok_bb });
                ctx.b.switch_to(try_b);
                self.lower_pattern_test(ctx, b, value, ty, fail_bb)?;
                ctx.b.terminate(Terminator::Br { target: ok_bb });
                ctx.b.switch_to(ok_bb);
                Ok(())
            }
            PatternKind::Range(lo, hi, inclusive) => {
                let (Lit::Int(a), Lit::Int(b)) = (lo, hi) else {
                    return err("non-integer range pattern", pattern.pos);
                };
                let lo_c = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: *a,
                    },
                    IrType::I64,
                );
                let ge = ctx.b.push(
                    Instr::Cmp {
                        op: CmpOp::Ge,
                        ty: IrType::I64,
                        lhs: value,
                        rhs: lo_c,
                    },
                    IrType::I1,
                );
                self.branch_on(ctx, ge, fail_bb);
                let hi_c = ctx.b.push(
                    Instr::ConstInt {
                        ty: IrType::I64,
                        value: *b,
                    },
                    IrType::I64,
                );
                let op = if *inclusive { CmpOp::Le } else { CmpOp::Lt };
                let le = ctx.b.push(
                    Instr::Cmp {
                        op,
                        ty: IrType::I64,
                        lhs: value,
                        rhs: hi_c,
                    },
                    IrType::I1,
                );
                self.branch_on(ctx, le, fail_bb);
                Ok(())
            }
            PatternKind::TypeTest(_) => err(
                "type-test patterns require runtime type information",
                pattern.pos,
            ),
        }
    }

    fn test_variant_tag(
        &mut self,
        ctx: &mut FnCtx,
        value: ValueId,
        enum_key: Symbol,
        type_args: &[TypeId],
        index: u32,
        fail_bb: BlockId,
    ) -> LResult<()> {
        let base = self.ensure_enum_layouts(enum_key, type_args);
        let tag_ptr = ctx.b.push(
            Instr::FieldPtr {
                struct_name: base,
                base: value,
                index: 0,
            },
            IrType::Ptr,
        );
        let tag = ctx.b.push(
            Instr::Load {
                ty: IrType::I32,
                ptr: tag_ptr,
            },
            IrType::I32,
        );
        let expected = ctx.b.push(
            Instr::ConstInt {
                ty: IrType::I32,
                value: i64::from(index),
            },
            IrType::I32,
        );
        let matches = ctx.b.push(
            Instr::Cmp {
                op: CmpOp::Eq,
                ty: IrType::I32,
                lhs: tag,
                rhs: expected,
            },
            IrType::I1,
        );
        self.branch_on(ctx, matches, fail_bb);
        Ok(())
    }

    /// Continue in a fresh block when `cond` holds; branch to `fail_bb`
    /// otherwise.
    fn branch_on(&mut self, ctx: &mut FnCtx, cond: ValueId, fail_bb: BlockId) {
        let cont = ctx.b.new_block("pat");
        ctx.b.terminate(Terminator::CondBr {
            cond,
            then_bb: cont,
            else_bb: fail_bb,
        });
        ctx.b.switch_to(cont);
    }

    fn bind_value(
        &mut self,
        ctx: &mut FnCtx,
        name: Symbol,
        value: ValueId,
        ty: TypeId,
    ) -> LResult<()> {
        let slot = self.declare_local(ctx, name, ty, false)?;
        let ir = self.ir_ty(ty);
        ctx.b.push(
            Instr::Store {
                ty: ir,
                ptr: slot.ptr,
                value,
            },
            IrType::Void,
        );
        Ok(())
    }

    fn enum_instance_of(&self, ty: TypeId) -> Option<(Symbol, Vec<TypeId>)> {
        match self.types.kind(ty) {
            TypeKind::Named(key) if self.analysis.enums.contains_key(key) => {
                Some((*key, Vec::new()))
            }
            TypeKind::Generic(key, args) if self.analysis.enums.contains_key(key) => {
                Some((*key, args.clone()))
            }
            _ => None,
        }
    }

    /// True when the pattern introduces a real binding. Bare names that
    /// resolve to nullary variants of the scrutinee's enum do not bind.
    fn pattern_binds(&self, pattern: &Pattern, ty: TypeId) -> bool {
        match &pattern.kind {
            PatternKind::Bind(name) => {
                if let Some((enum_key, _)) = self.enum_instance_of(ty) {
                    if let Some(info) = self.analysis.enums.get(&enum_key) {
                        if info
                            .variants
                            .iter()
                            .any(|v| v.name == *name && v.payload.is_empty())
                        {
                            return false;
                        }
                    }
                }
                true
            }
            PatternKind::Ctor(_, subs) | PatternKind::Tuple(subs) => {
                // Sub-pattern types are not threaded here; any bare name
                // in a sub-pattern counts as a binding.
                subs.iter().any(|p| self.shallow_binds(p))
            }
            PatternKind::Struct(_, fields, _) => {
                fields.iter().any(|(_, p)| self.shallow_binds(p))
            }
            PatternKind::Or(a, b) => self.pattern_binds(a, ty) || self.pattern_binds(b, ty),
            _ => false,
        }
    }

    fn shallow_binds(&self, pattern: &Pattern) -> bool {
        match &pattern.kind {
            PatternKind::Bind(_) => true,
            PatternKind::Ctor(_, subs) | PatternKind::Tuple(subs) => {
                subs.iter().any(|p| self.shallow_binds(p))
            }
            PatternKind::Struct(_, fields, _) => {
                fields.iter().any(|(_, p)| self.shallow_binds(p))
            }
            PatternKind::Or(a, b) => self.shallow_binds(a) || self.shallow_binds(b),
            _ => false,
        }
    }
}
