//! Ownership and borrow checking.
//!
//! A pass over the checked AST enforcing move/borrow discipline:
//!
//! - every binding starts owned by its declaring scope;
//! - assignment from a binding moves ownership (the source becomes MOVED;
//!   any later use on the same path is `B001`, reported once per binding
//!   per statement);
//! - argument passing borrows for the duration of the call unless the
//!   parameter is an rvalue reference, which moves at the call site;
//! - container and variant construction, channel sends, and returns
//!   consume their operands;
//! - mutation requires a mutable binding (`B003`) that is not currently
//!   borrowed (`B002`);
//! - moving a borrowed value is `B004`; `move` of a non-place is `B006`;
//! - copy types (the primitives) never move.
//!
//! Branches are checked independently and merged conservatively: a binding
//! moved on any branch counts as moved afterwards.

use sablec_par::{Expr, ExprKind, FuncDecl, SelectOp, Stmt, StmtKind};
use sablec_util::{FxHashMap, FxHashSet, Pos, ReportCode, Reporter, Symbol};

use crate::check::{Analysis, CallTarget, FuncInfo, ParamInfo};
use crate::types::TypeKind;

/// Run the ownership pass over every function body in the analysis,
/// including methods, extensions, and module top-level statements.
pub fn check_ownership(analysis: &Analysis, reporter: &Reporter) {
    let mut checker = OwnChecker::new(analysis, reporter);
    for info in analysis.functions.values() {
        if let Some(decl) = &info.decl {
            checker.check_function(decl, &info.params);
        }
    }
    for class in analysis.classes.values() {
        for method in class.methods.values() {
            if let Some(decl) = &method.decl {
                checker.check_function(decl, &method.params);
            }
        }
    }
    for (_, top) in &analysis.module_tops {
        checker.check_top_level(top);
    }
}

#[derive(Clone, Debug)]
struct VarState {
    moved: bool,
    mutable: bool,
    /// Copy types never move.
    copy: bool,
    /// Transient borrows held across a call's argument evaluation.
    borrows: u32,
}

type Frames = Vec<FxHashMap<Symbol, VarState>>;

struct OwnChecker<'a> {
    analysis: &'a Analysis,
    reporter: &'a Reporter,
    scopes: Frames,
    /// Bindings already reported this statement (first violation per
    /// binding per statement).
    reported: FxHashSet<Symbol>,
}

impl<'a> OwnChecker<'a> {
    fn new(analysis: &'a Analysis, reporter: &'a Reporter) -> Self {
        Self {
            analysis,
            reporter,
            scopes: vec![FxHashMap::default()],
            reported: FxHashSet::default(),
        }
    }

    fn check_function(&mut self, decl: &FuncDecl, params: &[ParamInfo]) {
        self.scopes = vec![FxHashMap::default()];
        self.reported.clear();
        for param in params {
            let copy = self.is_copy_ty(param.ty);
            self.declare(param.name, true, copy);
        }
        self.walk_block(&decl.body);
    }

    fn check_top_level(&mut self, stmts: &[Stmt]) {
        self.scopes = vec![FxHashMap::default()];
        self.reported.clear();
        for stmt in stmts {
            // Declarations own their own bodies; everything else is
            // straight-line module initialization.
            match &stmt.kind {
                StmtKind::Func(_)
                | StmtKind::Class(_)
                | StmtKind::Enum(_)
                | StmtKind::Trait(_)
                | StmtKind::Impl(_)
                | StmtKind::Import(_)
                | StmtKind::Export(_)
                | StmtKind::Module(..) => {}
                _ => {
                    self.reported.clear();
                    self.walk_stmt(stmt);
                }
            }
        }
    }

    fn is_copy_ty(&self, ty: crate::types::TypeId) -> bool {
        let stripped = match self.analysis.types.kind(ty) {
            TypeKind::RvalueRef(inner) => *inner,
            _ => ty,
        };
        self.analysis.types.is_copy(stripped)
    }

    // =========================================================================
    // STATE
    // =========================================================================

    fn declare(&mut self, name: Symbol, mutable: bool, copy: bool) {
        self.scopes
            .last_mut()
            .expect("ownership scopes never empty")
            .insert(
                name,
                VarState {
                    moved: false,
                    mutable,
                    copy,
                    borrows: 0,
                },
            );
    }

    fn lookup_mut(&mut self, name: Symbol) -> Option<&mut VarState> {
        self.scopes.iter_mut().rev().find_map(|f| f.get_mut(&name))
    }

    fn snapshot(&self) -> Frames {
        self.scopes.clone()
    }

    fn restore(&mut self, frames: Frames) {
        self.scopes = frames;
    }

    /// Merge: a binding moved on any branch is moved afterwards.
    fn merge_moved(&mut self, other: &Frames) {
        for (frame, other_frame) in self.scopes.iter_mut().zip(other.iter()) {
            for (name, state) in frame.iter_mut() {
                if let Some(other_state) = other_frame.get(name) {
                    state.moved |= other_state.moved;
                }
            }
        }
    }

    // =========================================================================
    // USES AND MOVES
    // =========================================================================

    fn use_var(&mut self, name: Symbol, pos: Pos) {
        let Some(state) = self.lookup_mut(name) else {
            return; // globals and function references are out of scope here
        };
        if state.moved && self.reported.insert(name) {
            self.reporter.error(
                ReportCode::B001,
                format!("use of moved value '{}'", name),
                pos,
            );
        }
    }

    fn move_var(&mut self, name: Symbol, pos: Pos) {
        let Some(state) = self.lookup_mut(name) else {
            return;
        };
        if state.copy {
            return;
        }
        if state.moved {
            if self.reported.insert(name) {
                self.reporter.error(
                    ReportCode::B001,
                    format!("use of moved value '{}'", name),
                    pos,
                );
            }
            return;
        }
        if state.borrows > 0 {
            self.reporter.error(
                ReportCode::B004,
                format!("cannot move '{}' while it is borrowed", name),
                pos,
            );
            return;
        }
        state.moved = true;
    }

    /// Consume an expression: a bare binding moves; anything else is an
    /// ordinary read whose result is a temporary the consumer owns.
    fn consume_expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Var(name) => {
                self.use_var(*name, e.pos);
                self.move_var(*name, e.pos);
            }
            ExprKind::Group(inner) => self.consume_expr(inner),
            ExprKind::Move(inner) => self.walk_move(inner, e.pos),
            _ => self.walk_expr(e),
        }
    }

    fn walk_move(&mut self, operand: &Expr, pos: Pos) {
        match &operand.kind {
            ExprKind::Var(name) => {
                self.use_var(*name, operand.pos);
                self.move_var(*name, pos);
            }
            ExprKind::Group(inner) => self.walk_move(inner, pos),
            _ => {
                self.reporter.error(
                    ReportCode::B006,
                    "cannot move out of this expression".to_owned(),
                    pos,
                );
                self.walk_expr(operand);
            }
        }
    }

    /// The binding at the root of a place expression.
    fn root_var(e: &Expr) -> Option<(Symbol, Pos)> {
        match &e.kind {
            ExprKind::Var(name) => Some((*name, e.pos)),
            ExprKind::Member(base, _)
            | ExprKind::SafeMember(base, _)
            | ExprKind::Index(base, _)
            | ExprKind::Group(base)
            | ExprKind::NotNull(base) => Self::root_var(base),
            _ => None,
        }
    }

    fn require_mutable_root(&mut self, target: &Expr) {
        let Some((name, pos)) = Self::root_var(target) else {
            return;
        };
        if let Some(state) = self.lookup_mut(name) {
            let mutable = state.mutable;
            let borrows = state.borrows;
            if !mutable {
                self.reporter.error(
                    ReportCode::B003,
                    format!("cannot mutate immutable binding '{}'", name),
                    pos,
                );
            } else if borrows > 0 {
                self.reporter.error(
                    ReportCode::B002,
                    format!("cannot mutate '{}' while it is borrowed", name),
                    pos,
                );
            }
        }
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn walk_block(&mut self, stmts: &[Stmt]) {
        self.scopes.push(FxHashMap::default());
        for stmt in stmts {
            self.reported.clear();
            self.walk_stmt(stmt);
        }
        // Scope exit drops owned bindings in reverse declaration order and
        // releases any outstanding borrows originating here.
        self.scopes.pop();
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.walk_expr(e),
            StmtKind::Let(l) => {
                if let Some(init) = &l.init {
                    self.consume_expr(init);
                }
                let ty = l
                    .init
                    .as_ref()
                    .map(|init| self.analysis.expr_type(init.id));
                let copy = ty.map(|t| self.is_copy_ty(t)).unwrap_or(true);
                self.declare(l.name, l.mutable, copy);
            }
            StmtKind::Block(stmts) => self.walk_block(stmts),
            StmtKind::If(ifs) => {
                self.walk_expr(&ifs.cond);
                let base = self.snapshot();
                let mut outcomes: Vec<Frames> = Vec::new();

                self.walk_block(&ifs.then_body);
                outcomes.push(self.snapshot());

                for (cond, body) in &ifs.elifs {
                    self.restore(base.clone());
                    self.walk_expr(cond);
                    self.walk_block(body);
                    outcomes.push(self.snapshot());
                }

                match &ifs.else_body {
                    Some(body) => {
                        self.restore(base.clone());
                        self.walk_block(body);
                        outcomes.push(self.snapshot());
                    }
                    // Fall-through path keeps the pre-branch state.
                    None => outcomes.push(base.clone()),
                }

                self.restore(base);
                for outcome in &outcomes {
                    self.merge_moved(outcome);
                }
            }
            StmtKind::While(cond, body) => {
                self.walk_expr(cond);
                let base = self.snapshot();
                self.walk_block(body);
                let after = self.snapshot();
                self.restore(base);
                self.merge_moved(&after);
            }
            StmtKind::For(name, iterable, body) => {
                self.walk_expr(iterable);
                self.scopes.push(FxHashMap::default());
                let elem_copy = {
                    let iter_ty = self.analysis.expr_type(iterable.id);
                    match self.analysis.types.kind(iter_ty) {
                        TypeKind::Generic(_, args) if !args.is_empty() => {
                            self.analysis.types.is_copy(args[0])
                        }
                        _ => true,
                    }
                };
                self.declare(*name, false, elem_copy);
                for inner in body {
                    self.reported.clear();
                    self.walk_stmt(inner);
                }
                self.scopes.pop();
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.consume_expr(value);
                }
            }
            StmtKind::Match(m) => {
                self.walk_expr(&m.scrutinee);
                let base = self.snapshot();
                let mut outcomes = Vec::new();
                for arm in &m.arms {
                    self.restore(base.clone());
                    self.scopes.push(FxHashMap::default());
                    declare_pattern_bindings(self, &arm.pattern);
                    if let Some(guard) = &arm.guard {
                        self.walk_expr(guard);
                    }
                    for inner in &arm.body {
                        self.reported.clear();
                        self.walk_stmt(inner);
                    }
                    self.scopes.pop();
                    outcomes.push(self.snapshot());
                }
                self.restore(base);
                for outcome in &outcomes {
                    self.merge_moved(outcome);
                }
            }
            StmtKind::Try(t) => {
                self.walk_block(&t.body);
                for catch in &t.catches {
                    self.scopes.push(FxHashMap::default());
                    self.declare(catch.name, false, true);
                    for inner in &catch.body {
                        self.reported.clear();
                        self.walk_stmt(inner);
                    }
                    self.scopes.pop();
                }
                if let Some(finally) = &t.finally {
                    self.walk_block(finally);
                }
            }
            StmtKind::Throw(e) => self.consume_expr(e),
            StmtKind::Defer(inner) => self.walk_stmt(inner),
            StmtKind::Go(e) => self.walk_expr(e),
            StmtKind::Select(arms) => {
                for arm in arms {
                    self.scopes.push(FxHashMap::default());
                    match &arm.op {
                        SelectOp::Recv { bind, chan } => {
                            self.walk_expr(chan);
                            if let Some(bind) = bind {
                                self.declare(*bind, false, true);
                            }
                        }
                        SelectOp::Send { chan, value } => {
                            self.walk_expr(chan);
                            self.consume_expr(value);
                        }
                        SelectOp::Default => {}
                    }
                    for inner in &arm.body {
                        self.reported.clear();
                        self.walk_stmt(inner);
                    }
                    self.scopes.pop();
                }
            }
            StmtKind::Func(nested) => {
                // Nested functions capture by reference; their bodies are
                // checked with fresh parameter state.
                self.declare(nested.name, false, true);
                self.scopes.push(FxHashMap::default());
                for param in &nested.params {
                    self.declare(param.name, false, true);
                }
                for inner in &nested.body {
                    self.reported.clear();
                    self.walk_stmt(inner);
                }
                self.scopes.pop();
            }
            _ => {}
        }
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn walk_expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Var(name) => self.use_var(*name, e.pos),
            ExprKind::Lit(_) | ExprKind::Qualified(..) | ExprKind::Error => {}
            ExprKind::Unary(_, inner)
            | ExprKind::Group(inner)
            | ExprKind::NotNull(inner)
            | ExprKind::Await(inner)
            | ExprKind::Recv(inner)
            | ExprKind::Delete(inner) => self.walk_expr(inner),
            ExprKind::Move(inner) => self.walk_move(inner, e.pos),
            ExprKind::Binary(_, l, r)
            | ExprKind::Logical(_, l, r)
            | ExprKind::Elvis(l, r)
            | ExprKind::Coalesce(l, r)
            | ExprKind::Range(l, r, _) => {
                self.walk_expr(l);
                self.walk_expr(r);
            }
            ExprKind::Assign(target, op, value) => {
                if op.is_none() {
                    self.consume_expr(value);
                } else {
                    self.walk_expr(value);
                }
                match &target.kind {
                    ExprKind::Var(name) => {
                        if let Some(state) = self.lookup_mut(*name) {
                            let (moved, mutable, borrows) =
                                (state.moved, state.mutable, state.borrows);
                            if moved {
                                // MOVED → * transitions are forbidden for
                                // the same binding.
                                if self.reported.insert(*name) {
                                    self.reporter.error(
                                        ReportCode::B001,
                                        format!("assignment to moved binding '{}'", name),
                                        target.pos,
                                    );
                                }
                            } else if !mutable {
                                self.reporter.error(
                                    ReportCode::B003,
                                    format!("cannot assign to immutable binding '{}'", name),
                                    target.pos,
                                );
                            } else if borrows > 0 {
                                self.reporter.error(
                                    ReportCode::B002,
                                    format!("cannot assign to '{}' while it is borrowed", name),
                                    target.pos,
                                );
                            }
                        }
                    }
                    _ => {
                        if let ExprKind::Member(base, _) | ExprKind::Index(base, _) = &target.kind {
                            self.walk_expr(base);
                        }
                        self.require_mutable_root(target);
                    }
                }
            }
            ExprKind::Call(callee, args) => self.walk_call(e, callee, args),
            ExprKind::Member(recv, _) | ExprKind::SafeMember(recv, _) => self.walk_expr(recv),
            ExprKind::Index(base, index) => {
                self.walk_expr(base);
                self.walk_expr(index);
            }
            ExprKind::List(elems) => {
                for elem in elems {
                    self.consume_expr(elem);
                }
            }
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    self.consume_expr(k);
                    self.consume_expr(v);
                }
            }
            ExprKind::Lambda(params, _, body) => {
                self.scopes.push(FxHashMap::default());
                for param in params {
                    self.declare(param.name, false, true);
                }
                self.walk_expr(body);
                self.scopes.pop();
            }
            ExprKind::New(_, args) => {
                for arg in args {
                    self.consume_expr(arg);
                }
            }
            ExprKind::Interp(parts) => {
                for part in parts {
                    if let sablec_par::InterpPart::Expr(inner) = part {
                        self.walk_expr(inner);
                    }
                }
            }
            ExprKind::Match(scrutinee, arms) => {
                self.walk_expr(scrutinee);
                for arm in arms {
                    self.scopes.push(FxHashMap::default());
                    declare_pattern_bindings(self, &arm.pattern);
                    if let Some(guard) = &arm.guard {
                        self.walk_expr(guard);
                    }
                    self.walk_expr(&arm.body);
                    self.scopes.pop();
                }
            }
            ExprKind::Send(chan, value) => {
                self.walk_expr(chan);
                self.consume_expr(value);
            }
            ExprKind::Incr(target, _) | ExprKind::Decr(target, _) => {
                self.walk_expr(target);
                self.require_mutable_root(target);
            }
            ExprKind::Cast(inner, _) | ExprKind::TypeTest(inner, _) => self.walk_expr(inner),
        }
    }

    /// Calls: plain arguments take a transient immutable borrow for the
    /// call's duration; rvalue-reference parameters move at the call site.
    fn walk_call(&mut self, call: &Expr, callee: &Expr, args: &[Expr]) {
        self.walk_expr(callee);

        let moved_flags = self.param_moved_flags(call, args.len());

        // First pass: transient borrows for borrowed bare-binding args.
        let mut borrowed: Vec<Symbol> = Vec::new();
        for (arg, moved) in args.iter().zip(moved_flags.iter()) {
            if !moved {
                if let ExprKind::Var(name) = &arg.kind {
                    self.use_var(*name, arg.pos);
                    if let Some(state) = self.lookup_mut(*name) {
                        if !state.copy && !state.moved {
                            state.borrows += 1;
                            borrowed.push(*name);
                        }
                    }
                } else {
                    self.walk_expr(arg);
                }
            }
        }
        // Second pass: moving arguments, with the borrows still active so
        // a move of a borrowed binding is caught.
        for (arg, moved) in args.iter().zip(moved_flags.iter()) {
            if *moved {
                self.consume_expr(arg);
            }
        }
        // Borrows are returned when the callee's frame exits.
        for name in borrowed {
            if let Some(state) = self.lookup_mut(name) {
                state.borrows = state.borrows.saturating_sub(1);
            }
        }
    }

    fn param_moved_flags(&self, call: &Expr, argc: usize) -> Vec<bool> {
        let flags_from = |params: &[ParamInfo], skip_self: bool| -> Vec<bool> {
            let params = if skip_self && !params.is_empty() {
                &params[1..]
            } else {
                params
            };
            let mut flags: Vec<bool> = params.iter().map(|p| p.moved).collect();
            flags.resize(argc, false);
            flags
        };

        match self.analysis.call_targets.get(&call.id) {
            Some(CallTarget::Func { key, .. }) | Some(CallTarget::Extension { key }) => self
                .analysis
                .functions
                .get(key)
                .map(|info: &FuncInfo| {
                    flags_from(&info.params, matches!(
                        self.analysis.call_targets.get(&call.id),
                        Some(CallTarget::Extension { .. })
                    ))
                })
                .unwrap_or_else(|| vec![false; argc]),
            Some(CallTarget::Method { class, method, .. }) => self
                .analysis
                .find_method(*class, *method)
                .map(|(_, info)| flags_from(&info.params, true))
                .unwrap_or_else(|| vec![false; argc]),
            // Variant construction and `new` take ownership of payloads.
            Some(CallTarget::Variant { .. }) => vec![true; argc],
            _ => vec![false; argc],
        }
    }
}

/// Declare every name a pattern binds. Binding types are not tracked here;
/// pattern bindings are treated as copy so reuse never false-positives.
fn declare_pattern_bindings(checker: &mut OwnChecker<'_>, pattern: &sablec_par::Pattern) {
    use sablec_par::PatternKind;
    match &pattern.kind {
        PatternKind::Bind(name) => checker.declare(*name, false, true),
        PatternKind::Ctor(_, subs) | PatternKind::Tuple(subs) => {
            for sub in subs {
                declare_pattern_bindings(checker, sub);
            }
        }
        PatternKind::Struct(_, fields, _) => {
            for (_, sub) in fields {
                declare_pattern_bindings(checker, sub);
            }
        }
        PatternKind::Or(a, b) => {
            declare_pattern_bindings(checker, a);
            declare_pattern_bindings(checker, b);
        }
        _ => {}
    }
}
