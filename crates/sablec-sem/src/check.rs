//! The type checker.
//!
//! A visitor over the AST threading the scope stack, the expected return
//! type, the in-async flag, and the reporter. Every expression's resolved
//! type is recorded exactly once in a side table keyed by `ExprId`; error
//! holes resolve to the internal error type, which unifies with anything
//! and suppresses cascade diagnostics.
//!
//! Checking runs in passes over the module set in dependency order:
//! declaration names, imports, signatures, then bodies. The ownership pass
//! (see [`crate::ownership`]) runs last over the checked AST.

use indexmap::IndexMap;
use sablec_par::{
    CatchClause, ClassDecl, EnumDecl, Expr, ExprId, ExprKind, ExportStmt, FieldDecl, FuncDecl,
    ImplBlock, ImportStmt, InterpPart, LetStmt, Lit, LogOp, MatchArm, Param, Pattern, PatternKind,
    SelectOp, Stmt, StmtKind, TraitDecl, TypeExpr, TypeExprKind, UnOp,
};
use sablec_par::BinOp;
use sablec_util::{
    FxHashMap, FxHashSet, Idx, IndexVec, Pos, ReportCode, Reporter, Symbol,
};

use crate::exhaust::{self, ArmPat, ColTy, Pat};
use crate::modules::{ExportSet, ModuleSet};
use crate::ownership;
use crate::scope::{Binding, BindingKind, ScopeStack};
use crate::types::{TypeId, TypeKind, TypeTable};

/// One checked parameter.
#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: Symbol,
    pub ty: TypeId,
    /// True for `T&&` parameters: the callee takes ownership.
    pub moved: bool,
    pub has_default: bool,
}

/// A checked function: signature plus the declaration body kept for
/// lowering. Builtins have no declaration.
#[derive(Clone, Debug)]
pub struct FuncInfo {
    pub key: Symbol,
    /// Module the function was declared in; global references in its body
    /// resolve against this module's key space.
    pub module: Symbol,
    pub generics: Vec<Symbol>,
    pub params: Vec<ParamInfo>,
    pub ret: TypeId,
    pub is_async: bool,
    pub decl: Option<FuncDecl>,
}

/// A checked class.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub key: Symbol,
    pub generics: Vec<Symbol>,
    pub base: Option<Symbol>,
    pub fields: Vec<(Symbol, TypeId)>,
    pub field_decls: Vec<FieldDecl>,
    pub methods: IndexMap<Symbol, FuncInfo>,
    /// True when a `deinit` destructor is declared.
    pub has_deinit: bool,
    /// True when any field is movable; such classes get synthesized move
    /// semantics (movable fields move, the rest copy, self-assignment is a
    /// no-op).
    pub movable: bool,
}

/// One enum variant.
#[derive(Clone, Debug)]
pub struct VariantInfo {
    pub name: Symbol,
    pub payload: Vec<TypeId>,
}

/// A checked enum.
#[derive(Clone, Debug)]
pub struct EnumInfo {
    pub key: Symbol,
    pub generics: Vec<Symbol>,
    pub variants: Vec<VariantInfo>,
}

/// A checked trait.
#[derive(Clone, Debug)]
pub struct TraitInfo {
    pub key: Symbol,
    pub methods: Vec<Symbol>,
}

/// A module-level variable.
#[derive(Clone, Debug)]
pub struct GlobalInfo {
    pub ty: TypeId,
    pub mutable: bool,
}

/// How a call site resolves; recorded per call expression for lowering.
#[derive(Clone, Debug)]
pub enum CallTarget {
    /// Direct call of a declared function; `type_args` are the inferred
    /// generic arguments, empty for non-generic callees.
    Func { key: Symbol, type_args: Vec<TypeId> },
    /// Method call: the class that owns the method (after base-chain
    /// lookup) and the method name.
    Method {
        class: Symbol,
        method: Symbol,
        type_args: Vec<TypeId>,
    },
    /// Extension-function call.
    Extension { key: Symbol },
    /// Built-in function.
    Builtin { name: Symbol },
    /// Enum variant construction.
    Variant {
        enum_key: Symbol,
        index: u32,
        type_args: Vec<TypeId>,
    },
    /// Indirect call through a function-typed value.
    Closure,
}

/// The product of semantic analysis, consumed by IR lowering.
pub struct Analysis {
    pub types: TypeTable,
    pub expr_types: IndexVec<ExprId, Option<TypeId>>,
    pub functions: IndexMap<Symbol, FuncInfo>,
    pub classes: IndexMap<Symbol, ClassInfo>,
    pub enums: IndexMap<Symbol, EnumInfo>,
    pub traits: IndexMap<Symbol, TraitInfo>,
    /// (type name, method name) → function key.
    pub extensions: FxHashMap<(Symbol, Symbol), Symbol>,
    pub globals: IndexMap<Symbol, GlobalInfo>,
    pub call_targets: FxHashMap<ExprId, CallTarget>,
    /// Top-level statements per module, in check order.
    pub module_tops: Vec<(Symbol, Vec<Stmt>)>,
    pub entry: Symbol,
}

impl Analysis {
    /// Resolved type of an expression; error for holes.
    pub fn expr_type(&self, id: ExprId) -> TypeId {
        self.expr_types
            .get(id)
            .copied()
            .flatten()
            .unwrap_or_else(|| self.types.error())
    }

    /// Look up a method, walking the base chain.
    pub fn find_method(&self, class: Symbol, name: Symbol) -> Option<(Symbol, &FuncInfo)> {
        let mut current = class;
        let mut fuel = 64;
        loop {
            let info = self.classes.get(&current)?;
            if let Some(m) = info.methods.get(&name) {
                return Some((current, m));
            }
            current = info.base?;
            fuel -= 1;
            if fuel == 0 {
                return None;
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeclKind {
    Func,
    Class,
    Enum,
    Trait,
    Global,
}

#[derive(Clone, Copy, Debug)]
struct DeclRef {
    kind: DeclKind,
    key: Symbol,
}

/// Run semantic analysis over a loaded module set.
pub fn analyze(set: &ModuleSet, reporter: &Reporter) -> Analysis {
    let mut checker = Checker::new(reporter, set);
    checker.register_builtins();

    // Names → imports → signatures, per module in dependency order.
    for name in &set.order {
        let Some(record) = set.get(*name) else { continue };
        if record.poisoned {
            continue;
        }
        checker.current_module = *name;
        checker.names_pass(&record.ast);
        checker.imports_pass(&record.ast);
        checker.signatures_pass(&record.ast);
    }

    // Bodies.
    let mut module_tops = Vec::new();
    for name in &set.order {
        let Some(record) = set.get(*name) else { continue };
        if record.poisoned {
            continue;
        }
        checker.current_module = *name;
        checker.bodies_pass(&record.ast);
        module_tops.push((*name, record.ast.clone()));
    }

    let analysis = Analysis {
        types: checker.types,
        expr_types: checker.expr_types,
        functions: checker.functions,
        classes: checker.classes,
        enums: checker.enums,
        traits: checker.traits,
        extensions: checker.extensions,
        globals: checker.globals,
        call_targets: checker.call_targets,
        module_tops,
        entry: set.entry,
    };

    ownership::check_ownership(&analysis, reporter);
    analysis
}

struct Checker<'a> {
    reporter: &'a Reporter,
    types: TypeTable,
    expr_types: IndexVec<ExprId, Option<TypeId>>,

    functions: IndexMap<Symbol, FuncInfo>,
    classes: IndexMap<Symbol, ClassInfo>,
    enums: IndexMap<Symbol, EnumInfo>,
    traits: IndexMap<Symbol, TraitInfo>,
    extensions: FxHashMap<(Symbol, Symbol), Symbol>,
    globals: IndexMap<Symbol, GlobalInfo>,
    call_targets: FxHashMap<ExprId, CallTarget>,
    variant_owner: FxHashMap<Symbol, Symbol>,

    decl_index: FxHashMap<(Symbol, Symbol), DeclRef>,
    imported: FxHashMap<Symbol, FxHashSet<Symbol>>,
    module_exports: FxHashMap<Symbol, ExportSet>,

    scopes: ScopeStack,
    entry: Symbol,
    builtin_module: Symbol,
    current_module: Symbol,
    ret_ty: TypeId,
    in_async: bool,
    loop_depth: u32,
    generic_scope: Vec<Symbol>,
    current_class: Option<Symbol>,
}

impl<'a> Checker<'a> {
    fn new(reporter: &'a Reporter, set: &ModuleSet) -> Self {
        let types = TypeTable::new();
        let void = types.void();
        let mut module_exports = FxHashMap::default();
        for (name, record) in &set.records {
            module_exports.insert(*name, record.exports.clone());
        }
        Self {
            reporter,
            expr_types: IndexVec::from_elem(None, set.expr_count as usize),
            types,
            functions: IndexMap::new(),
            classes: IndexMap::new(),
            enums: IndexMap::new(),
            traits: IndexMap::new(),
            extensions: FxHashMap::default(),
            globals: IndexMap::new(),
            call_targets: FxHashMap::default(),
            variant_owner: FxHashMap::default(),
            decl_index: FxHashMap::default(),
            imported: FxHashMap::default(),
            module_exports,
            scopes: ScopeStack::new(),
            entry: set.entry,
            builtin_module: Symbol::intern("<builtin>"),
            current_module: set.entry,
            ret_ty: void,
            in_async: false,
            loop_depth: 0,
            generic_scope: Vec::new(),
            current_class: None,
        }
    }

    // =========================================================================
    // BUILTINS
    // =========================================================================

    fn register_builtins(&mut self) {
        let builtin = self.builtin_module;
        let t = Symbol::intern("T");
        let e = Symbol::intern("E");

        // Option<T> and Result<T, E>.
        let option_key = Symbol::intern("Option");
        let param_t = self.types.param(t);
        let param_e = self.types.param(e);
        self.enums.insert(
            option_key,
            EnumInfo {
                key: option_key,
                generics: vec![t],
                variants: vec![
                    VariantInfo {
                        name: Symbol::intern("Some"),
                        payload: vec![param_t],
                    },
                    VariantInfo {
                        name: Symbol::intern("None"),
                        payload: vec![],
                    },
                ],
            },
        );
        let result_key = Symbol::intern("Result");
        self.enums.insert(
            result_key,
            EnumInfo {
                key: result_key,
                generics: vec![t, e],
                variants: vec![
                    VariantInfo {
                        name: Symbol::intern("Ok"),
                        payload: vec![param_t],
                    },
                    VariantInfo {
                        name: Symbol::intern("Err"),
                        payload: vec![param_e],
                    },
                ],
            },
        );
        self.decl_index.insert(
            (builtin, option_key),
            DeclRef {
                kind: DeclKind::Enum,
                key: option_key,
            },
        );
        self.decl_index.insert(
            (builtin, result_key),
            DeclRef {
                kind: DeclKind::Enum,
                key: result_key,
            },
        );
        self.variant_owner.insert(Symbol::intern("Some"), option_key);
        self.variant_owner.insert(Symbol::intern("None"), option_key);
        self.variant_owner.insert(Symbol::intern("Ok"), result_key);
        self.variant_owner.insert(Symbol::intern("Err"), result_key);

        // Built-in functions (externals provided by the runtime).
        let string = self.types.str();
        let int = self.types.int();
        let f64_ = self.types.float64();
        let void = self.types.void();
        let mut builtin_fn = |checker: &mut Self, name: &str, params: Vec<TypeId>, ret: TypeId| {
            let key = Symbol::intern(name);
            checker.functions.insert(
                key,
                FuncInfo {
                    key,
                    module: checker.builtin_module,
                    generics: Vec::new(),
                    params: params
                        .into_iter()
                        .enumerate()
                        .map(|(i, ty)| ParamInfo {
                            name: Symbol::intern(&format!("arg{}", i)),
                            ty,
                            moved: false,
                            has_default: false,
                        })
                        .collect(),
                    ret,
                    is_async: false,
                    decl: None,
                },
            );
            checker.decl_index.insert(
                (checker.builtin_module, key),
                DeclRef {
                    kind: DeclKind::Func,
                    key,
                },
            );
        };
        builtin_fn(self, "print", vec![string], void);
        builtin_fn(self, "printf", vec![string], int);
        builtin_fn(self, "int_to_string", vec![int], string);
        builtin_fn(self, "float_to_string", vec![f64_], string);
        builtin_fn(self, "string_concat", vec![string, string], string);
        // to_string accepts any single argument; the parameter type is
        // refined per call site.
        let any = self.types.error();
        builtin_fn(self, "to_string", vec![any], string);
    }

    fn is_builtin_generic(name: Symbol) -> bool {
        matches!(
            name.as_str(),
            "list" | "Map" | "Channel" | "Future" | "Option" | "Result" | "Range"
        )
    }

    // =========================================================================
    // DECLARATION PASSES
    // =========================================================================

    fn key_for(&self, name: Symbol) -> Symbol {
        if self.current_module == self.entry {
            name
        } else {
            Symbol::intern(&format!("{}::{}", self.current_module, name))
        }
    }

    fn declare_decl(&mut self, name: Symbol, kind: DeclKind, pos: Pos) -> Symbol {
        let key = self.key_for(name);
        let slot = (self.current_module, name);
        if self.decl_index.contains_key(&slot) {
            self.reporter.error(
                ReportCode::M001,
                format!("duplicate definition of '{}'", name),
                pos,
            );
        } else {
            self.decl_index.insert(slot, DeclRef { kind, key });
        }
        key
    }

    /// Register the names a module declares, including nested `module`
    /// blocks (which behave as implicitly imported pseudo-modules).
    fn names_pass(&mut self, ast: &[Stmt]) {
        for stmt in ast {
            let stmt = unwrap_export(stmt);
            match &stmt.kind {
                StmtKind::Func(f) if f.receiver.is_none() => {
                    self.declare_decl(f.name, DeclKind::Func, f.pos);
                }
                StmtKind::Func(_) => {} // extensions register in signatures
                StmtKind::Class(c) => {
                    self.declare_decl(c.name, DeclKind::Class, c.pos);
                }
                StmtKind::Enum(e) => {
                    let key = self.declare_decl(e.name, DeclKind::Enum, e.pos);
                    for variant in &e.variants {
                        self.variant_owner.entry(variant.name).or_insert(key);
                    }
                }
                StmtKind::Trait(t) => {
                    self.declare_decl(t.name, DeclKind::Trait, t.pos);
                }
                StmtKind::Let(l) => {
                    self.declare_decl(l.name, DeclKind::Global, stmt.pos);
                }
                StmtKind::Module(name, body) => {
                    let saved = self.current_module;
                    self.imported.entry(saved).or_default().insert(*name);
                    self.current_module = *name;
                    self.names_pass(body);
                    self.current_module = saved;
                }
                _ => {}
            }
        }
    }

    fn imports_pass(&mut self, ast: &[Stmt]) {
        for stmt in ast {
            let StmtKind::Import(import) = &stmt.kind else {
                // Nested module blocks may not import.
                continue;
            };
            self.check_import(import);
        }
    }

    fn check_import(&mut self, import: &ImportStmt) {
        let module = import.module;
        self.imported
            .entry(self.current_module)
            .or_default()
            .insert(module);

        let Some(items) = &import.items else {
            return;
        };
        for (name, alias) in items {
            let exported = self
                .module_exports
                .get(&module)
                .map(|e| e.contains(*name))
                .unwrap_or(false);
            if !exported {
                self.reporter.error(
                    ReportCode::M010,
                    format!("module '{}' does not export '{}'", module, name),
                    import.pos,
                );
                continue;
            }
            let Some(decl) = self.decl_index.get(&(module, *name)).copied() else {
                continue;
            };
            let local = alias.unwrap_or(*name);
            self.decl_index.insert((self.current_module, local), decl);
        }
    }

    fn signatures_pass(&mut self, ast: &[Stmt]) {
        for stmt in ast {
            let stmt = unwrap_export(stmt);
            match &stmt.kind {
                StmtKind::Func(f) => self.signature_of_func(f),
                StmtKind::Class(c) => self.signature_of_class(c),
                StmtKind::Enum(e) => self.signature_of_enum(e),
                StmtKind::Trait(t) => self.signature_of_trait(t),
                StmtKind::Impl(i) => self.signature_of_impl(i),
                StmtKind::Let(l) => {
                    let key = self.key_for(l.name);
                    let ty = match &l.ty {
                        Some(te) => self.resolve_type(te),
                        None => self.types.error(), // refined in the body pass
                    };
                    self.globals.insert(
                        key,
                        GlobalInfo {
                            ty,
                            mutable: l.mutable,
                        },
                    );
                }
                StmtKind::Module(name, body) => {
                    let saved = self.current_module;
                    self.current_module = *name;
                    self.signatures_pass(body);
                    self.current_module = saved;
                }
                _ => {}
            }
        }
    }

    fn func_info_from_decl(&mut self, key: Symbol, decl: &FuncDecl, self_ty: Option<TypeId>) -> FuncInfo {
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(decl.generics.iter().copied());

        let mut params = Vec::new();
        if let Some(self_ty) = self_ty {
            params.push(ParamInfo {
                name: Symbol::intern("self"),
                ty: self_ty,
                moved: false,
                has_default: false,
            });
        }
        for param in &decl.params {
            if param.name.as_str() == "self" && self_ty.is_some() {
                continue; // already injected
            }
            let ty = match &param.ty {
                Some(te) => self.resolve_type(te),
                None => {
                    self.reporter.error(
                        ReportCode::T009,
                        format!("parameter '{}' needs a type annotation", param.name),
                        param.pos,
                    );
                    self.types.error()
                }
            };
            params.push(ParamInfo {
                name: param.name,
                ty,
                moved: param.moved,
                has_default: param.default.is_some(),
            });
        }
        let ret = match &decl.ret {
            Some(te) => self.resolve_type(te),
            None => self.types.void(),
        };

        self.generic_scope.truncate(saved_generics);
        FuncInfo {
            key,
            module: self.current_module,
            generics: decl.generics.clone(),
            params,
            ret,
            is_async: decl.is_async,
            decl: Some(decl.clone()),
        }
    }

    fn signature_of_func(&mut self, decl: &FuncDecl) {
        match decl.receiver {
            None => {
                let key = self.key_for(decl.name);
                let info = self.func_info_from_decl(key, decl, None);
                self.functions.insert(key, info);
            }
            Some(receiver) => {
                // Extension function: keyed `Type.method`, registered in
                // the extension table for member lookup fallback.
                let recv_ty = self.resolve_type_name(receiver, decl.pos);
                let key = Symbol::intern(&format!("{}.{}", receiver, decl.name));
                let info = self.func_info_from_decl(key, decl, Some(recv_ty));
                self.functions.insert(key, info);
                let type_name = self.type_lookup_name(recv_ty).unwrap_or(receiver);
                self.extensions.insert((type_name, decl.name), key);
            }
        }
    }

    fn signature_of_class(&mut self, decl: &ClassDecl) {
        let key = self.key_for(decl.name);
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(decl.generics.iter().copied());

        let base = decl.base.and_then(|b| {
            let resolved = self.lookup_decl(b);
            match resolved {
                Some(DeclRef {
                    kind: DeclKind::Class,
                    key: base_key,
                }) => {
                    self.types.register_base(key, base_key);
                    Some(base_key)
                }
                _ => {
                    self.reporter.error(
                        ReportCode::T004,
                        format!("undefined base class '{}'", b),
                        decl.pos,
                    );
                    None
                }
            }
        });

        let mut fields = Vec::new();
        for field in &decl.fields {
            let ty = self.resolve_type(&field.ty);
            fields.push((field.name, ty));
        }

        let self_ty = if decl.generics.is_empty() {
            self.types.named(key)
        } else {
            let args: Vec<TypeId> = decl
                .generics
                .iter()
                .map(|g| self.types.param(*g))
                .collect();
            self.types.generic(key, args)
        };

        let mut methods = IndexMap::new();
        for method in &decl.methods {
            let info = self.func_info_from_decl(method.name, method, Some(self_ty));
            if methods.insert(method.name, info).is_some() {
                self.reporter.error(
                    ReportCode::M001,
                    format!("duplicate method '{}' on class '{}'", method.name, decl.name),
                    method.pos,
                );
            }
        }

        let has_deinit = methods.contains_key(&Symbol::intern("deinit"));
        let movable = fields.iter().any(|&(_, ty)| !self.types.is_copy(ty));

        self.generic_scope.truncate(saved_generics);
        self.classes.insert(
            key,
            ClassInfo {
                key,
                generics: decl.generics.clone(),
                base,
                fields,
                field_decls: decl.fields.clone(),
                methods,
                has_deinit,
                movable,
            },
        );
    }

    fn signature_of_enum(&mut self, decl: &EnumDecl) {
        let key = self.key_for(decl.name);
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(decl.generics.iter().copied());

        let variants = decl
            .variants
            .iter()
            .map(|v| VariantInfo {
                name: v.name,
                payload: v.payload.iter().map(|te| self.resolve_type(te)).collect(),
            })
            .collect();

        self.generic_scope.truncate(saved_generics);
        self.enums.insert(
            key,
            EnumInfo {
                key,
                generics: decl.generics.clone(),
                variants,
            },
        );
    }

    fn signature_of_trait(&mut self, decl: &TraitDecl) {
        let key = self.key_for(decl.name);
        self.traits.insert(
            key,
            TraitInfo {
                key,
                methods: decl.methods.iter().map(|m| m.name).collect(),
            },
        );
    }

    fn signature_of_impl(&mut self, decl: &ImplBlock) {
        let Some(DeclRef {
            kind: DeclKind::Class,
            key: class_key,
        }) = self.lookup_decl(decl.self_ty)
        else {
            self.reporter.error(
                ReportCode::T004,
                format!("undefined class '{}' in impl", decl.self_ty),
                decl.pos,
            );
            return;
        };

        if let Some(trait_name) = decl.trait_name {
            match self.lookup_decl(trait_name) {
                Some(DeclRef {
                    kind: DeclKind::Trait,
                    key: trait_key,
                }) => {
                    self.types.register_impl(class_key, trait_key);
                    let trait_methods = self
                        .traits
                        .get(&trait_key)
                        .map(|t| t.methods.clone())
                        .unwrap_or_default();
                    for method in &decl.methods {
                        if !trait_methods.contains(&method.name) {
                            self.reporter.error(
                                ReportCode::T005,
                                format!(
                                    "method '{}' is not a member of trait '{}'",
                                    method.name, trait_name
                                ),
                                method.pos,
                            );
                        }
                    }
                }
                _ => {
                    self.reporter.error(
                        ReportCode::T004,
                        format!("undefined trait '{}'", trait_name),
                        decl.pos,
                    );
                }
            }
        }

        let self_ty = self.types.named(class_key);
        let mut infos = Vec::new();
        for method in &decl.methods {
            infos.push(self.func_info_from_decl(method.name, method, Some(self_ty)));
        }
        if let Some(class) = self.classes.get_mut(&class_key) {
            for info in infos {
                class.methods.insert(info.key, info);
            }
        }
    }

    // =========================================================================
    // BODIES
    // =========================================================================

    fn bodies_pass(&mut self, ast: &[Stmt]) {
        // Each module gets its own frame so globals don't leak between
        // modules.
        self.scopes.push();
        // Pre-declare this module's globals so bodies can reference them
        // regardless of order.
        let module_globals: Vec<(Symbol, Symbol)> = ast
            .iter()
            .map(unwrap_export)
            .filter_map(|s| match &s.kind {
                StmtKind::Let(l) => Some((l.name, self.key_for(l.name))),
                _ => None,
            })
            .collect();
        for (name, key) in &module_globals {
            if let Some(info) = self.globals.get(key) {
                let binding = Binding {
                    kind: BindingKind::Variable,
                    ty: info.ty,
                    mutable: info.mutable,
                    pos: Pos::dummy(),
                };
                let _ = self.scopes.declare(*name, binding);
            }
        }

        for stmt in ast {
            self.check_top_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_top_stmt(&mut self, stmt: &Stmt) {
        let stmt = unwrap_export(stmt);
        match &stmt.kind {
            StmtKind::Func(f) => self.check_func_body(f),
            StmtKind::Class(c) => self.check_class_body(c),
            StmtKind::Impl(i) => {
                if let Some(DeclRef { key, .. }) = self.lookup_decl(i.self_ty) {
                    for method in &i.methods {
                        self.check_method_body(key, method);
                    }
                }
            }
            StmtKind::Enum(_) | StmtKind::Trait(_) | StmtKind::Import(_) => {}
            StmtKind::Module(name, body) => {
                let saved = self.current_module;
                self.current_module = *name;
                for inner in body {
                    self.check_top_stmt(inner);
                }
                self.current_module = saved;
            }
            StmtKind::Let(l) => self.check_global_let(stmt.pos, l),
            _ => self.check_stmt(stmt),
        }
    }

    fn check_global_let(&mut self, pos: Pos, l: &LetStmt) {
        let key = self.key_for(l.name);
        let declared = self.globals.get(&key).map(|g| g.ty);
        let annotated = l.ty.is_some();
        let init_ty = l
            .init
            .as_ref()
            .map(|init| self.check_expr_expecting(init, declared.filter(|_| annotated)));

        match (annotated, init_ty) {
            (true, Some(init_ty)) => {
                let declared = declared.unwrap_or_else(|| self.types.error());
                if !self.types.assignable(init_ty, declared) {
                    self.type_mismatch(pos, declared, init_ty);
                }
            }
            (true, None) => {} // zero-initialized by the back-end contract
            (false, Some(init_ty)) => {
                // Inferred: refine the placeholder.
                if let Some(info) = self.globals.get_mut(&key) {
                    info.ty = init_ty;
                }
                if let Some(binding) = self.scopes.resolve_mut(l.name) {
                    binding.ty = init_ty;
                }
            }
            (false, None) => {
                self.reporter.error(
                    ReportCode::T009,
                    format!("binding '{}' needs a type annotation or initializer", l.name),
                    pos,
                );
            }
        }
    }

    fn check_func_body(&mut self, decl: &FuncDecl) {
        match decl.receiver {
            None => {
                let key = self.key_for(decl.name);
                let Some(info) = self.functions.get(&key).cloned() else {
                    return;
                };
                self.check_body_with(&info, None, decl);
            }
            Some(receiver) => {
                let key = Symbol::intern(&format!("{}.{}", receiver, decl.name));
                let Some(info) = self.functions.get(&key).cloned() else {
                    return;
                };
                self.check_body_with(&info, None, decl);
            }
        }
    }

    fn check_class_body(&mut self, decl: &ClassDecl) {
        let key = self.key_for(decl.name);
        let Some(class) = self.classes.get(&key).cloned() else {
            return;
        };

        // Field defaults.
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(class.generics.iter().copied());
        for (field, (_, ty)) in decl.fields.iter().zip(class.fields.iter()) {
            if let Some(default) = &field.default {
                let got = self.check_expr_expecting(default, Some(*ty));
                if !self.types.assignable(got, *ty) {
                    self.type_mismatch(field.pos, *ty, got);
                }
            }
        }
        self.generic_scope.truncate(saved_generics);

        for method in &decl.methods {
            self.check_method_body(key, method);
        }
    }

    fn check_method_body(&mut self, class_key: Symbol, decl: &FuncDecl) {
        let Some(class) = self.classes.get(&class_key) else {
            return;
        };
        let class_generics = class.generics.clone();
        let Some(info) = class.methods.get(&decl.name).cloned() else {
            return;
        };
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(class_generics);
        let saved_class = self.current_class.replace(class_key);
        self.check_body_with(&info, Some(class_key), decl);
        self.current_class = saved_class;
        self.generic_scope.truncate(saved_generics);
    }

    fn check_body_with(&mut self, info: &FuncInfo, _class: Option<Symbol>, decl: &FuncDecl) {
        let saved_generics = self.generic_scope.len();
        self.generic_scope.extend(info.generics.iter().copied());
        let saved_ret = self.ret_ty;
        let saved_async = self.in_async;
        self.ret_ty = info.ret;
        self.in_async = info.is_async;

        self.scopes.push();
        for param in &info.params {
            let binding = Binding {
                kind: BindingKind::Variable,
                ty: param.ty,
                mutable: false,
                pos: decl.pos,
            };
            if self.scopes.declare(param.name, binding).is_err() {
                self.reporter.error(
                    ReportCode::M001,
                    format!("duplicate parameter '{}'", param.name),
                    decl.pos,
                );
            }
        }
        // Default values are checked against the parameter types.
        for (param, ast_param) in info.params.iter().zip(padded_params(info, decl)) {
            if let Some(ast_param) = ast_param {
                if let Some(default) = &ast_param.default {
                    let got = self.check_expr_expecting(default, Some(param.ty));
                    if !self.types.assignable(got, param.ty) {
                        self.type_mismatch(ast_param.pos, param.ty, got);
                    }
                }
            }
        }

        for stmt in &decl.body {
            self.check_stmt(stmt);
        }

        self.scopes.pop();
        self.ret_ty = saved_ret;
        self.in_async = saved_async;
        self.generic_scope.truncate(saved_generics);
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.check_expr(e);
            }
            StmtKind::Let(l) => self.check_let(stmt.pos, l),
            StmtKind::Block(stmts) => {
                self.scopes.push();
                for inner in stmts {
                    self.check_stmt(inner);
                }
                self.scopes.pop();
            }
            StmtKind::If(ifs) => {
                self.check_condition(&ifs.cond);
                self.check_block(&ifs.then_body);
                for (cond, body) in &ifs.elifs {
                    self.check_condition(cond);
                    self.check_block(body);
                }
                if let Some(body) = &ifs.else_body {
                    self.check_block(body);
                }
            }
            StmtKind::While(cond, body) => {
                self.check_condition(cond);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::For(name, iterable, body) => {
                let iter_ty = self.check_expr(iterable);
                let elem_ty = self.element_type(iter_ty).unwrap_or_else(|| {
                    if !matches!(self.types.kind(iter_ty), TypeKind::Error) {
                        self.reporter.error(
                            ReportCode::T001,
                            format!("type '{}' is not iterable", self.types.display(iter_ty)),
                            iterable.pos,
                        );
                    }
                    self.types.error()
                });
                self.loop_depth += 1;
                self.scopes.push();
                let binding = Binding {
                    kind: BindingKind::Variable,
                    ty: elem_ty,
                    mutable: false,
                    pos: stmt.pos,
                };
                let _ = self.scopes.declare(*name, binding);
                for inner in body {
                    self.check_stmt(inner);
                }
                self.scopes.pop();
                self.loop_depth -= 1;
            }
            StmtKind::Return(value) => {
                let expected = self.ret_ty;
                match value {
                    Some(e) => {
                        let got = self.check_expr_expecting(e, Some(expected));
                        if !self.types.assignable(got, expected) {
                            self.reporter.error(
                                ReportCode::T014,
                                format!(
                                    "cannot return '{}' from a function returning '{}'",
                                    self.types.display(got),
                                    self.types.display(expected)
                                ),
                                e.pos,
                            );
                        }
                    }
                    None => {
                        if expected != self.types.void()
                            && !matches!(self.types.kind(expected), TypeKind::Error)
                        {
                            self.reporter.error(
                                ReportCode::T014,
                                format!(
                                    "bare return in a function returning '{}'",
                                    self.types.display(expected)
                                ),
                                stmt.pos,
                            );
                        }
                    }
                }
            }
            StmtKind::Func(nested) => {
                // Nested functions are closures; declared as a
                // function-typed binding and checked in place.
                let info = {
                    let key = nested.name;
                    self.func_info_from_decl(key, nested, None)
                };
                let fn_ty = {
                    let params: Vec<TypeId> = info.params.iter().map(|p| p.ty).collect();
                    self.types.func(params, info.ret)
                };
                let binding = Binding {
                    kind: BindingKind::Function,
                    ty: fn_ty,
                    mutable: false,
                    pos: nested.pos,
                };
                if self.scopes.declare(nested.name, binding).is_err() {
                    self.reporter.error(
                        ReportCode::M001,
                        format!("duplicate definition of '{}'", nested.name),
                        nested.pos,
                    );
                }
                self.check_body_with(&info, None, nested);
            }
            StmtKind::Class(c) => {
                self.reporter.error(
                    ReportCode::S007,
                    format!("class '{}' must be declared at module scope", c.name),
                    c.pos,
                );
            }
            StmtKind::Enum(e) => {
                self.reporter.error(
                    ReportCode::S013,
                    format!("enum '{}' must be declared at module scope", e.name),
                    e.pos,
                );
            }
            StmtKind::Trait(_) | StmtKind::Impl(_) | StmtKind::Module(..) => {
                self.reporter.error(
                    ReportCode::S018,
                    "declaration must appear at module scope".to_owned(),
                    stmt.pos,
                );
            }
            StmtKind::Import(_) | StmtKind::Export(_) => {
                if self.scopes.depth() > 1 {
                    self.reporter.error(
                        ReportCode::S008,
                        "imports and exports must appear at module scope".to_owned(),
                        stmt.pos,
                    );
                }
            }
            StmtKind::Match(m) => {
                let scrut_ty = self.check_expr(&m.scrutinee);
                self.check_match_arms(stmt.pos, scrut_ty, &m.arms);
            }
            StmtKind::Try(t) => {
                self.check_block(&t.body);
                for catch in &t.catches {
                    self.check_catch(catch);
                }
                if let Some(finally) = &t.finally {
                    self.check_block(finally);
                }
            }
            StmtKind::Throw(e) => {
                let ty = self.check_expr(e);
                let throwable = matches!(
                    self.types.kind(ty),
                    TypeKind::Named(_) | TypeKind::Str | TypeKind::Error
                );
                if !throwable {
                    self.reporter.error(
                        ReportCode::T001,
                        format!("type '{}' is not throwable", self.types.display(ty)),
                        e.pos,
                    );
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.reporter.error(
                        ReportCode::S011,
                        "break/continue outside of a loop".to_owned(),
                        stmt.pos,
                    );
                }
            }
            StmtKind::Defer(inner) => self.check_stmt(inner),
            StmtKind::Go(e) => {
                if !matches!(e.kind, ExprKind::Call(..)) {
                    self.reporter.error(
                        ReportCode::C013,
                        "go requires a call expression".to_owned(),
                        e.pos,
                    );
                }
                self.check_expr(e);
            }
            StmtKind::Select(arms) => self.check_select(stmt.pos, arms),
            StmtKind::Error | StmtKind::Export(_) => {}
        }
    }

    fn check_block(&mut self, stmts: &[Stmt]) {
        self.scopes.push();
        for stmt in stmts {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_condition(&mut self, cond: &Expr) {
        let ty = self.check_expr(cond);
        if !self.types.truthy_convertible(ty) {
            self.reporter.error(
                ReportCode::T001,
                format!(
                    "condition of type '{}' is not convertible to bool",
                    self.types.display(ty)
                ),
                cond.pos,
            );
        }
    }

    fn check_let(&mut self, pos: Pos, l: &LetStmt) {
        let annotated = l.ty.as_ref().map(|te| self.resolve_type(te));
        let init_ty = l
            .init
            .as_ref()
            .map(|init| self.check_expr_expecting(init, annotated));

        let ty = match (annotated, init_ty) {
            (Some(declared), Some(got)) => {
                if !self.types.assignable(got, declared) {
                    self.type_mismatch(pos, declared, got);
                }
                declared
            }
            (Some(declared), None) => declared, // zero value from the back end
            (None, Some(got)) => got,
            (None, None) => {
                self.reporter.error(
                    ReportCode::T009,
                    format!("binding '{}' needs a type annotation or initializer", l.name),
                    pos,
                );
                self.types.error()
            }
        };

        let binding = Binding {
            kind: BindingKind::Variable,
            ty,
            mutable: l.mutable,
            pos,
        };
        if let Err(prev) = self.scopes.declare(l.name, binding) {
            self.reporter.error(
                ReportCode::M001,
                format!(
                    "'{}' is already declared in this scope (previous declaration at {})",
                    l.name, prev
                ),
                pos,
            );
        }
    }

    fn check_catch(&mut self, catch: &CatchClause) {
        self.scopes.push();
        let ty = match &catch.ty {
            Some(te) => {
                let resolved = self.resolve_type(te);
                let ok = matches!(
                    self.types.kind(resolved),
                    TypeKind::Named(_) | TypeKind::Str | TypeKind::Error
                );
                if !ok {
                    self.reporter.error(
                        ReportCode::T001,
                        format!("type '{}' is not throwable", self.types.display(resolved)),
                        catch.pos,
                    );
                }
                resolved
            }
            None => self.types.error(),
        };
        let binding = Binding {
            kind: BindingKind::Variable,
            ty,
            mutable: false,
            pos: catch.pos,
        };
        let _ = self.scopes.declare(catch.name, binding);
        for stmt in &catch.body {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn check_select(&mut self, pos: Pos, arms: &[sablec_par::SelectArm]) {
        let mut defaults = 0;
        for arm in arms {
            self.scopes.push();
            match &arm.op {
                SelectOp::Recv { bind, chan } => {
                    let chan_ty = self.check_expr(chan);
                    let elem = self.channel_element(chan_ty, chan.pos);
                    if let Some(bind) = bind {
                        let binding = Binding {
                            kind: BindingKind::Variable,
                            ty: elem,
                            mutable: false,
                            pos: arm.pos,
                        };
                        let _ = self.scopes.declare(*bind, binding);
                    }
                }
                SelectOp::Send { chan, value } => {
                    let chan_ty = self.check_expr(chan);
                    let elem = self.channel_element(chan_ty, chan.pos);
                    let got = self.check_expr(value);
                    if !self.types.assignable(got, elem) {
                        self.type_mismatch(value.pos, elem, got);
                    }
                }
                SelectOp::Default => defaults += 1,
            }
            for stmt in &arm.body {
                self.check_stmt(stmt);
            }
            self.scopes.pop();
        }
        if defaults > 1 {
            self.reporter.error(
                ReportCode::C012,
                "select may have at most one default arm".to_owned(),
                pos,
            );
        }
    }

    fn channel_element(&mut self, chan_ty: TypeId, pos: Pos) -> TypeId {
        match self.types.kind(chan_ty) {
            TypeKind::Generic(name, args) if name.as_str() == "Channel" && args.len() == 1 => {
                args[0]
            }
            TypeKind::Error => self.types.error(),
            _ => {
                self.reporter.error(
                    ReportCode::C001,
                    format!(
                        "channel operation on non-channel type '{}'",
                        self.types.display(chan_ty)
                    ),
                    pos,
                );
                self.types.error()
            }
        }
    }

    fn element_type(&mut self, iter_ty: TypeId) -> Option<TypeId> {
        match self.types.kind(iter_ty) {
            TypeKind::Generic(name, args) => match (name.as_str(), args.len()) {
                ("list", 1) | ("Channel", 1) => Some(args[0]),
                ("Range", 1) => Some(self.types.int()),
                ("Map", 2) => Some(args[0]),
                _ => None,
            },
            TypeKind::Error => Some(self.types.error()),
            _ => None,
        }
    }

    // =========================================================================
    // MATCH
    // =========================================================================

    fn check_match_arms(&mut self, pos: Pos, scrut_ty: TypeId, arms: &[MatchArm]) {
        let mut lowered = Vec::new();
        for arm in arms {
            self.scopes.push();
            let pat = self.check_pattern(&arm.pattern, scrut_ty);
            if let Some(guard) = &arm.guard {
                self.check_condition(guard);
            }
            for stmt in &arm.body {
                self.check_stmt(stmt);
            }
            self.scopes.pop();
            lowered.push(ArmPat {
                pat,
                guarded: arm.guard.is_some(),
                pos: arm.pos,
            });
        }
        let col = self.col_ty(scrut_ty, 0);
        exhaust::check_match(self.reporter, pos, &col, &lowered);
    }

    /// Check a pattern against the scrutinee type, binding names in the
    /// current scope, and lower it for the exhaustiveness engine.
    fn check_pattern(&mut self, pattern: &Pattern, ty: TypeId) -> Pat {
        // A nullable scrutinee splits into nil and the payload space.
        if let TypeKind::Nullable(inner) = *self.types.kind(ty) {
            return match &pattern.kind {
                PatternKind::Lit(Lit::Nil) => Pat::Nil,
                PatternKind::Wildcard => Pat::Wild,
                PatternKind::Bind(name) => {
                    self.bind_pattern_name(*name, ty, pattern.pos);
                    Pat::Wild
                }
                PatternKind::Or(a, b) => self.check_or_pattern(a, b, ty, pattern.pos),
                _ => Pat::NotNil(Box::new(self.check_pattern(pattern, inner))),
            };
        }

        match &pattern.kind {
            PatternKind::Wildcard => Pat::Wild,
            PatternKind::Lit(lit) => self.check_lit_pattern(lit, ty, pattern.pos),
            PatternKind::Bind(name) => {
                // A bare name matching a nullary variant of the scrutinee's
                // enum is the variant, not a binding.
                if let Some((enum_key, args)) = self.enum_instance(ty) {
                    if let Some(owner) = self.variant_owner.get(name).copied() {
                        if owner == enum_key {
                            let info = self.enums.get(&enum_key).cloned();
                            if let Some(info) = info {
                                if let Some(idx) =
                                    info.variants.iter().position(|v| v.name == *name)
                                {
                                    if info.variants[idx].payload.is_empty() {
                                        let _ = args;
                                        return Pat::Variant(idx as u32, Vec::new());
                                    }
                                }
                            }
                        }
                    }
                }
                self.bind_pattern_name(*name, ty, pattern.pos);
                Pat::Wild
            }
            PatternKind::Ctor(name, subs) => {
                let Some((enum_key, args)) = self.enum_instance(ty) else {
                    self.reporter.error(
                        ReportCode::P005,
                        format!(
                            "constructor pattern '{}' against non-enum type '{}'",
                            name,
                            self.types.display(ty)
                        ),
                        pattern.pos,
                    );
                    return Pat::Wild;
                };
                let Some(info) = self.enums.get(&enum_key).cloned() else {
                    return Pat::Wild;
                };
                let Some(idx) = info.variants.iter().position(|v| v.name == *name) else {
                    self.reporter.error(
                        ReportCode::P005,
                        format!("enum '{}' has no variant '{}'", enum_key, name),
                        pattern.pos,
                    );
                    return Pat::Wild;
                };
                let variant = &info.variants[idx];
                if variant.payload.len() != subs.len() {
                    self.reporter.error(
                        ReportCode::T007,
                        format!(
                            "variant '{}' expects {} fields, pattern has {}",
                            name,
                            variant.payload.len(),
                            subs.len()
                        ),
                        pattern.pos,
                    );
                    return Pat::Variant(idx as u32, vec![Pat::Wild; variant.payload.len()]);
                }
                let subst = build_subst(&info.generics, &args);
                let sub_pats = subs
                    .iter()
                    .zip(variant.payload.clone())
                    .map(|(sub, payload_ty)| {
                        let concrete = self.types.substitute(payload_ty, &subst);
                        self.check_pattern(sub, concrete)
                    })
                    .collect();
                Pat::Variant(idx as u32, sub_pats)
            }
            PatternKind::Tuple(subs) => {
                let TypeKind::Named(class_key) = *self.types.kind(ty) else {
                    self.reporter.error(
                        ReportCode::P005,
                        format!(
                            "tuple pattern against non-class type '{}'",
                            self.types.display(ty)
                        ),
                        pattern.pos,
                    );
                    return Pat::Wild;
                };
                let Some(class) = self.classes.get(&class_key).cloned() else {
                    return Pat::Wild;
                };
                if class.fields.len() != subs.len() {
                    self.reporter.error(
                        ReportCode::T007,
                        format!(
                            "class '{}' has {} fields, pattern has {}",
                            class_key,
                            class.fields.len(),
                            subs.len()
                        ),
                        pattern.pos,
                    );
                    return Pat::Wild;
                }
                let sub_pats = subs
                    .iter()
                    .zip(class.fields.iter())
                    .map(|(sub, &(_, field_ty))| self.check_pattern(sub, field_ty))
                    .collect();
                Pat::Tuple(sub_pats)
            }
            PatternKind::Struct(name, fields, rest) => {
                let TypeKind::Named(class_key) = *self.types.kind(ty) else {
                    self.reporter.error(
                        ReportCode::P005,
                        format!(
                            "struct pattern against non-class type '{}'",
                            self.types.display(ty)
                        ),
                        pattern.pos,
                    );
                    return Pat::Wild;
                };
                let Some(class) = self.classes.get(&class_key).cloned() else {
                    return Pat::Wild;
                };
                if class_key != *name && !self.types.is_subclass_of(class_key, *name) {
                    self.reporter.error(
                        ReportCode::P005,
                        format!("struct pattern '{}' does not match '{}'", name, class_key),
                        pattern.pos,
                    );
                }
                let mut by_field: FxHashMap<Symbol, &Pattern> = FxHashMap::default();
                for (field, sub) in fields {
                    if !class.fields.iter().any(|(f, _)| f == field) {
                        self.reporter.error(
                            ReportCode::T005,
                            format!("class '{}' has no field '{}'", class_key, field),
                            pattern.pos,
                        );
                        continue;
                    }
                    by_field.insert(*field, sub);
                }
                if !rest && by_field.len() < class.fields.len() {
                    self.reporter.error(
                        ReportCode::P003,
                        "struct pattern misses fields; add '..' to ignore the rest".to_owned(),
                        pattern.pos,
                    );
                }
                let sub_pats = class
                    .fields
                    .iter()
                    .map(|&(field, field_ty)| match by_field.get(&field) {
                        Some(sub) => self.check_pattern(sub, field_ty),
                        None => Pat::Wild,
                    })
                    .collect();
                Pat::Tuple(sub_pats)
            }
            PatternKind::Or(a, b) => self.check_or_pattern(a, b, ty, pattern.pos),
            PatternKind::Range(lo, hi, inclusive) => match (lo, hi) {
                (Lit::Int(a), Lit::Int(b)) => {
                    if !matches!(self.types.kind(ty), TypeKind::Int | TypeKind::Error) {
                        self.reporter.error(
                            ReportCode::P005,
                            format!(
                                "range pattern against non-integer type '{}'",
                                self.types.display(ty)
                            ),
                            pattern.pos,
                        );
                    }
                    let end = if *inclusive { *b } else { b - 1 };
                    Pat::IntRange(*a, end)
                }
                _ => {
                    self.reporter.error(
                        ReportCode::P005,
                        "range patterns require integer endpoints".to_owned(),
                        pattern.pos,
                    );
                    Pat::Wild
                }
            },
            PatternKind::TypeTest(te) => {
                let tested = self.resolve_type(te);
                let name = self.type_lookup_name(tested).unwrap_or_else(Symbol::empty);
                Pat::TypeIs(name)
            }
        }
    }

    fn check_or_pattern(&mut self, a: &Pattern, b: &Pattern, ty: TypeId, pos: Pos) -> Pat {
        // Both sides must produce identical binding sets with identical
        // types; each side is checked in a probe frame and compared.
        self.scopes.push();
        let pat_a = self.check_pattern(a, ty);
        let frame_a = self.scopes.pop();
        self.scopes.push();
        let pat_b = self.check_pattern(b, ty);
        let frame_b = self.scopes.pop();

        let mut names_a: Vec<_> = frame_a.iter().map(|(n, b)| (*n, b.ty)).collect();
        let mut names_b: Vec<_> = frame_b.iter().map(|(n, b)| (*n, b.ty)).collect();
        names_a.sort();
        names_b.sort();
        if names_a != names_b {
            self.reporter.error(
                ReportCode::P003,
                "both sides of an or-pattern must bind the same names with the same types"
                    .to_owned(),
                pos,
            );
        }
        // Re-declare the (agreed) bindings in the enclosing arm scope.
        for (name, binding) in frame_a {
            let _ = self.scopes.declare(name, binding);
        }
        Pat::Or(vec![pat_a, pat_b])
    }

    fn check_lit_pattern(&mut self, lit: &Lit, ty: TypeId, pos: Pos) -> Pat {
        let (pat, lit_ty) = match lit {
            Lit::Int(n) => (Pat::Int(*n), self.types.int()),
            Lit::Float32(f) => (Pat::Float((*f as f64).to_bits()), self.types.float32()),
            Lit::Float64(f) => (Pat::Float(f.to_bits()), self.types.float64()),
            Lit::Str(s) => (Pat::Str(*s), self.types.str()),
            Lit::Bool(b) => (Pat::Bool(*b), self.types.bool()),
            Lit::Nil => (Pat::Nil, self.types.nil()),
        };
        if ty != lit_ty && !matches!(self.types.kind(ty), TypeKind::Error) {
            self.reporter.error(
                ReportCode::P005,
                format!(
                    "literal pattern of type '{}' against scrutinee of type '{}'",
                    self.types.display(lit_ty),
                    self.types.display(ty)
                ),
                pos,
            );
        }
        pat
    }

    fn bind_pattern_name(&mut self, name: Symbol, ty: TypeId, pos: Pos) {
        let binding = Binding {
            kind: BindingKind::Variable,
            ty,
            mutable: false,
            pos,
        };
        if self.scopes.declare(name, binding).is_err() {
            self.reporter.error(
                ReportCode::P003,
                format!("name '{}' bound more than once in this pattern", name),
                pos,
            );
        }
    }

    /// Build the exhaustiveness column type for a scrutinee.
    fn col_ty(&mut self, ty: TypeId, depth: u32) -> ColTy {
        if depth > 8 {
            return ColTy::Open;
        }
        match self.types.kind(ty).clone() {
            TypeKind::Bool => ColTy::Bool,
            TypeKind::Int => ColTy::Int,
            TypeKind::Nullable(inner) => ColTy::Nullable(Box::new(self.col_ty(inner, depth + 1))),
            TypeKind::Named(key) | TypeKind::Generic(key, _) => {
                if let Some((enum_key, args)) = self.enum_instance(ty) {
                    let Some(info) = self.enums.get(&enum_key).cloned() else {
                        return ColTy::Open;
                    };
                    let subst = build_subst(&info.generics, &args);
                    let variants = info
                        .variants
                        .iter()
                        .map(|v| {
                            let cols = v
                                .payload
                                .iter()
                                .map(|&p| {
                                    let concrete = self.types.substitute(p, &subst);
                                    self.col_ty(concrete, depth + 1)
                                })
                                .collect();
                            (v.name, cols)
                        })
                        .collect();
                    return ColTy::Enum(variants);
                }
                if let Some(class) = self.classes.get(&key).cloned() {
                    let cols = class
                        .fields
                        .iter()
                        .map(|&(_, f)| self.col_ty(f, depth + 1))
                        .collect();
                    return ColTy::Tuple(cols);
                }
                ColTy::Open
            }
            _ => ColTy::Open,
        }
    }

    /// `(enum key, type args)` when the type is an enum instance.
    fn enum_instance(&self, ty: TypeId) -> Option<(Symbol, Vec<TypeId>)> {
        match self.types.kind(ty) {
            TypeKind::Named(key) if self.enums.contains_key(key) => Some((*key, Vec::new())),
            TypeKind::Generic(key, args) if self.enums.contains_key(key) => {
                Some((*key, args.clone()))
            }
            _ => None,
        }
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn record(&mut self, id: ExprId, ty: TypeId) -> TypeId {
        while self.expr_types.len() <= id.index() {
            self.expr_types.push(None);
        }
        let slot = &mut self.expr_types[id];
        debug_assert!(slot.is_none(), "resolved type rewritten for {:?}", id);
        *slot = Some(ty);
        ty
    }

    fn type_mismatch(&self, pos: Pos, expected: TypeId, got: TypeId) {
        if matches!(self.types.kind(expected), TypeKind::Error)
            || matches!(self.types.kind(got), TypeKind::Error)
        {
            return;
        }
        self.reporter.error(
            ReportCode::T001,
            format!(
                "type mismatch: expected '{}', found '{}'",
                self.types.display(expected),
                self.types.display(got)
            ),
            pos,
        );
    }

    fn check_expr(&mut self, e: &Expr) -> TypeId {
        self.check_expr_expecting(e, None)
    }

    fn check_expr_expecting(&mut self, e: &Expr, expected: Option<TypeId>) -> TypeId {
        let ty = self.expr_ty(e, expected);
        self.record(e.id, ty)
    }

    fn expr_ty(&mut self, e: &Expr, expected: Option<TypeId>) -> TypeId {
        match &e.kind {
            ExprKind::Lit(lit) => match lit {
                Lit::Int(_) => self.types.int(),
                Lit::Float32(_) => self.types.float32(),
                Lit::Float64(_) => self.types.float64(),
                Lit::Str(_) => self.types.str(),
                Lit::Bool(_) => self.types.bool(),
                Lit::Nil => self.types.nil(),
            },
            ExprKind::Var(name) => self.check_var(e, *name, expected),
            ExprKind::Qualified(module, name) => self.check_qualified(e, *module, *name),
            ExprKind::Unary(op, operand) => {
                let operand_ty = self.check_expr(operand);
                self.unary_result(*op, operand_ty, e.pos)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.check_expr(lhs);
                let r = self.check_expr(rhs);
                self.binary_result(e, *op, l, r)
            }
            ExprKind::Logical(_, lhs, rhs) => {
                self.check_condition_operand(lhs);
                self.check_condition_operand(rhs);
                self.types.bool()
            }
            ExprKind::Assign(target, op, value) => self.check_assign(e.pos, target, *op, value),
            ExprKind::Group(inner) => self.check_expr_expecting(inner, expected),
            ExprKind::Call(..) => self.check_call(e, expected),
            ExprKind::Member(recv, name) => {
                let recv_ty = self.check_expr(recv);
                if self.types.is_nullable(recv_ty) {
                    self.reporter.error(
                        ReportCode::T001,
                        format!(
                            "member access on nullable type '{}' requires '?.'",
                            self.types.display(recv_ty)
                        ),
                        e.pos,
                    );
                    return self.types.error();
                }
                self.member_type(recv_ty, *name, e.pos)
            }
            ExprKind::SafeMember(recv, name) => {
                let recv_ty = self.check_expr(recv);
                if !self.types.is_nullable(recv_ty)
                    && !matches!(self.types.kind(recv_ty), TypeKind::Error)
                {
                    self.reporter.warning(
                        ReportCode::G001,
                        format!(
                            "'?.' on non-nullable type '{}'",
                            self.types.display(recv_ty)
                        ),
                        e.pos,
                    );
                }
                let base = self.types.strip_nullable(recv_ty);
                let member = self.member_type(base, *name, e.pos);
                self.types.nullable(member)
            }
            ExprKind::Index(base, index) => {
                let base_ty = self.check_expr(base);
                let index_ty = self.check_expr(index);
                self.index_result(base_ty, index_ty, e.pos)
            }
            ExprKind::List(elems) => {
                let expected_elem = expected.and_then(|exp| match self.types.kind(exp) {
                    TypeKind::Generic(name, args)
                        if name.as_str() == "list" && args.len() == 1 =>
                    {
                        Some(args[0])
                    }
                    _ => None,
                });
                let mut elem_ty = expected_elem;
                for elem in elems {
                    let got = self.check_expr_expecting(elem, expected_elem);
                    elem_ty = match elem_ty {
                        None => Some(got),
                        Some(current) => match self.types.common_type(current, got) {
                            Some(joined) => Some(joined),
                            None => {
                                self.type_mismatch(elem.pos, current, got);
                                Some(current)
                            }
                        },
                    };
                }
                match elem_ty {
                    Some(elem) => self.types.list(elem),
                    None => {
                        self.reporter.error(
                            ReportCode::T009,
                            "cannot infer element type of empty list literal".to_owned(),
                            e.pos,
                        );
                        self.types.error()
                    }
                }
            }
            ExprKind::Map(entries) => {
                let expected_kv = expected.and_then(|exp| match self.types.kind(exp) {
                    TypeKind::Generic(name, args) if name.as_str() == "Map" && args.len() == 2 => {
                        Some((args[0], args[1]))
                    }
                    _ => None,
                });
                let mut key_ty = expected_kv.map(|(k, _)| k);
                let mut val_ty = expected_kv.map(|(_, v)| v);
                for (key, value) in entries {
                    let got_k = self.check_expr(key);
                    let got_v = self.check_expr(value);
                    key_ty = join_or_report(self, key.pos, key_ty, got_k);
                    val_ty = join_or_report(self, value.pos, val_ty, got_v);
                }
                match (key_ty, val_ty) {
                    (Some(k), Some(v)) => self.types.map(k, v),
                    _ => {
                        self.reporter.error(
                            ReportCode::T009,
                            "cannot infer key/value types of empty map literal".to_owned(),
                            e.pos,
                        );
                        self.types.error()
                    }
                }
            }
            ExprKind::Lambda(params, ret, body) => self.check_lambda(params, ret, body, expected),
            ExprKind::Await(operand) => {
                if !self.in_async {
                    self.reporter.error(
                        ReportCode::C019,
                        "await outside of an async function".to_owned(),
                        e.pos,
                    );
                }
                let operand_ty = self.check_expr(operand);
                match self.types.kind(operand_ty) {
                    TypeKind::Generic(name, args)
                        if name.as_str() == "Future" && args.len() == 1 =>
                    {
                        args[0]
                    }
                    TypeKind::Error => self.types.error(),
                    _ => {
                        self.reporter.error(
                            ReportCode::C019,
                            format!(
                                "await requires a Future, found '{}'",
                                self.types.display(operand_ty)
                            ),
                            operand.pos,
                        );
                        self.types.error()
                    }
                }
            }
            ExprKind::New(te, args) => self.check_new(e.pos, te, args),
            ExprKind::Delete(operand) => {
                let ty = self.check_expr(operand);
                if !matches!(
                    self.types.kind(ty),
                    TypeKind::Named(_) | TypeKind::Generic(..) | TypeKind::Error
                ) {
                    self.reporter.error(
                        ReportCode::T001,
                        format!("cannot delete value of type '{}'", self.types.display(ty)),
                        operand.pos,
                    );
                }
                self.types.void()
            }
            ExprKind::Interp(parts) => {
                for part in parts {
                    if let InterpPart::Expr(inner) = part {
                        let ty = self.check_expr(inner);
                        if !self.types.string_convertible(ty) {
                            self.reporter.error(
                                ReportCode::T001,
                                format!(
                                    "value of type '{}' cannot be interpolated into a string",
                                    self.types.display(ty)
                                ),
                                inner.pos,
                            );
                        }
                    }
                }
                self.types.str()
            }
            ExprKind::Match(scrutinee, arms) => {
                let scrut_ty = self.check_expr(scrutinee);
                let mut result: Option<TypeId> = None;
                let mut lowered = Vec::new();
                for arm in arms {
                    self.scopes.push();
                    let pat = self.check_pattern(&arm.pattern, scrut_ty);
                    if let Some(guard) = &arm.guard {
                        self.check_condition(guard);
                    }
                    let body_ty = self.check_expr(&arm.body);
                    self.scopes.pop();
                    result = join_or_report(self, arm.body.pos, result, body_ty);
                    lowered.push(ArmPat {
                        pat,
                        guarded: arm.guard.is_some(),
                        pos: arm.pos,
                    });
                }
                let col = self.col_ty(scrut_ty, 0);
                exhaust::check_match(self.reporter, e.pos, &col, &lowered);
                result.unwrap_or_else(|| self.types.void())
            }
            ExprKind::NotNull(operand) => {
                let ty = self.check_expr(operand);
                if !self.types.is_nullable(ty) && !matches!(self.types.kind(ty), TypeKind::Error) {
                    self.reporter.warning(
                        ReportCode::G001,
                        format!(
                            "not-null assertion on non-nullable type '{}'",
                            self.types.display(ty)
                        ),
                        e.pos,
                    );
                }
                self.types.strip_nullable(ty)
            }
            ExprKind::Elvis(operand, fallback) | ExprKind::Coalesce(operand, fallback) => {
                let lhs = self.check_expr(operand);
                if !self.types.is_nullable(lhs) && !matches!(self.types.kind(lhs), TypeKind::Error)
                {
                    self.reporter.warning(
                        ReportCode::G001,
                        format!(
                            "null-coalescing on non-nullable type '{}'",
                            self.types.display(lhs)
                        ),
                        e.pos,
                    );
                }
                let stripped = self.types.strip_nullable(lhs);
                let rhs = self.check_expr(fallback);
                match self.types.common_type(stripped, rhs) {
                    Some(joined) => joined,
                    None => {
                        self.type_mismatch(fallback.pos, stripped, rhs);
                        stripped
                    }
                }
            }
            ExprKind::Move(operand) => self.check_expr(operand),
            ExprKind::Send(chan, value) => {
                let chan_ty = self.check_expr(chan);
                let elem = self.channel_element(chan_ty, chan.pos);
                let got = self.check_expr_expecting(value, Some(elem));
                if !self.types.assignable(got, elem) {
                    self.type_mismatch(value.pos, elem, got);
                }
                self.types.void()
            }
            ExprKind::Recv(chan) => {
                let chan_ty = self.check_expr(chan);
                self.channel_element(chan_ty, chan.pos)
            }
            ExprKind::Incr(target, _) | ExprKind::Decr(target, _) => {
                let ty = self.check_expr(target);
                if !target.is_place() {
                    self.reporter.error(
                        ReportCode::S005,
                        "increment/decrement target must be assignable".to_owned(),
                        target.pos,
                    );
                }
                if !matches!(self.types.kind(ty), TypeKind::Int | TypeKind::Error) {
                    self.reporter.error(
                        ReportCode::T006,
                        format!(
                            "increment/decrement requires an integer, found '{}'",
                            self.types.display(ty)
                        ),
                        target.pos,
                    );
                }
                ty
            }
            ExprKind::Cast(operand, te) => {
                let from = self.check_expr(operand);
                let to = self.resolve_type(te);
                let numeric = |t: &TypeKind| {
                    matches!(t, TypeKind::Int | TypeKind::Float32 | TypeKind::Float64)
                };
                let ok = matches!(self.types.kind(from), TypeKind::Error)
                    || matches!(self.types.kind(to), TypeKind::Error)
                    || (numeric(self.types.kind(from)) && numeric(self.types.kind(to)))
                    || self.types.assignable(from, to)
                    || self.types.assignable(to, from);
                if !ok {
                    self.reporter.error(
                        ReportCode::T011,
                        format!(
                            "invalid cast from '{}' to '{}'",
                            self.types.display(from),
                            self.types.display(to)
                        ),
                        e.pos,
                    );
                }
                to
            }
            ExprKind::TypeTest(operand, te) => {
                self.check_expr(operand);
                self.resolve_type(te);
                self.types.bool()
            }
            ExprKind::Range(lo, hi, _) => {
                let lo_ty = self.check_expr(lo);
                let hi_ty = self.check_expr(hi);
                let int = self.types.int();
                if !self.types.assignable(lo_ty, int) || !self.types.assignable(hi_ty, int) {
                    self.reporter.error(
                        ReportCode::T001,
                        "range endpoints must be integers".to_owned(),
                        e.pos,
                    );
                }
                self.types.range()
            }
            ExprKind::Error => self.types.error(),
        }
    }

    fn check_condition_operand(&mut self, e: &Expr) {
        let ty = self.check_expr(e);
        if !self.types.truthy_convertible(ty) {
            self.reporter.error(
                ReportCode::T006,
                format!(
                    "logical operand of type '{}' is not convertible to bool",
                    self.types.display(ty)
                ),
                e.pos,
            );
        }
    }

    fn check_var(&mut self, e: &Expr, name: Symbol, expected: Option<TypeId>) -> TypeId {
        if let Some(binding) = self.scopes.resolve(name) {
            return binding.ty;
        }

        if let Some(decl) = self.lookup_decl(name) {
            match decl.kind {
                DeclKind::Func => {
                    let Some(info) = self.functions.get(&decl.key) else {
                        return self.types.error();
                    };
                    if !info.generics.is_empty() {
                        self.reporter.error(
                            ReportCode::T016,
                            format!("generic function '{}' must be called directly", name),
                            e.pos,
                        );
                        return self.types.error();
                    }
                    let params: Vec<TypeId> = info.params.iter().map(|p| p.ty).collect();
                    let ret = if info.is_async {
                        self.types.future(info.ret)
                    } else {
                        info.ret
                    };
                    self.call_targets.insert(
                        e.id,
                        CallTarget::Func {
                            key: decl.key,
                            type_args: Vec::new(),
                        },
                    );
                    return self.types.func(params, ret);
                }
                DeclKind::Global => {
                    return self
                        .globals
                        .get(&decl.key)
                        .map(|g| g.ty)
                        .unwrap_or_else(|| self.types.error());
                }
                DeclKind::Class | DeclKind::Enum | DeclKind::Trait => {
                    self.reporter.error(
                        ReportCode::T002,
                        format!("'{}' is a type, not a value", name),
                        e.pos,
                    );
                    return self.types.error();
                }
            }
        }

        // Nullary variant in value position: needs the enum's type
        // arguments from context.
        if let Some(enum_key) = self.variant_owner.get(&name).copied() {
            if let Some(info) = self.enums.get(&enum_key).cloned() {
                if let Some(idx) = info.variants.iter().position(|v| v.name == name) {
                    if info.variants[idx].payload.is_empty() {
                        let args = match expected.and_then(|exp| self.enum_instance(exp)) {
                            Some((exp_key, args)) if exp_key == enum_key => args,
                            _ if info.generics.is_empty() => Vec::new(),
                            _ => {
                                self.reporter.error(
                                    ReportCode::T009,
                                    format!(
                                        "cannot infer type arguments for variant '{}'",
                                        name
                                    ),
                                    e.pos,
                                );
                                return self.types.error();
                            }
                        };
                        self.call_targets.insert(
                            e.id,
                            CallTarget::Variant {
                                enum_key,
                                index: idx as u32,
                                type_args: args.clone(),
                            },
                        );
                        return if info.generics.is_empty() {
                            self.types.named(enum_key)
                        } else {
                            self.types.generic(enum_key, args)
                        };
                    }
                }
            }
        }

        self.reporter.error(
            ReportCode::T002,
            format!("undefined variable '{}'", name),
            e.pos,
        );
        self.types.error()
    }

    fn check_qualified(&mut self, e: &Expr, module: Symbol, name: Symbol) -> TypeId {
        if !self.module_accessible(module) {
            self.reporter.error(
                ReportCode::M004,
                format!("module '{}' is not imported", module),
                e.pos,
            );
            return self.types.error();
        }
        let Some(decl) = self.decl_index.get(&(module, name)).copied() else {
            self.reporter.error(
                ReportCode::T002,
                format!("module '{}' has no symbol '{}'", module, name),
                e.pos,
            );
            return self.types.error();
        };
        if !self.symbol_visible(module, name) {
            self.reporter.error(
                ReportCode::M010,
                format!("module '{}' does not export '{}'", module, name),
                e.pos,
            );
            return self.types.error();
        }
        match decl.kind {
            DeclKind::Func => {
                let Some(info) = self.functions.get(&decl.key) else {
                    return self.types.error();
                };
                let params: Vec<TypeId> = info.params.iter().map(|p| p.ty).collect();
                let ret = if info.is_async {
                    self.types.future(info.ret)
                } else {
                    info.ret
                };
                self.call_targets.insert(
                    e.id,
                    CallTarget::Func {
                        key: decl.key,
                        type_args: Vec::new(),
                    },
                );
                self.types.func(params, ret)
            }
            DeclKind::Global => self
                .globals
                .get(&decl.key)
                .map(|g| g.ty)
                .unwrap_or_else(|| self.types.error()),
            _ => {
                self.reporter.error(
                    ReportCode::T002,
                    format!("'{}::{}' is a type, not a value", module, name),
                    e.pos,
                );
                self.types.error()
            }
        }
    }

    fn module_accessible(&self, module: Symbol) -> bool {
        self.imported
            .get(&self.current_module)
            .map(|s| s.contains(&module))
            .unwrap_or(false)
    }

    fn symbol_visible(&self, module: Symbol, name: Symbol) -> bool {
        // Pseudo-modules (`module` blocks) have no export sets: everything
        // is visible qualified.
        match self.module_exports.get(&module) {
            Some(exports) => exports.contains(name),
            None => true,
        }
    }

    fn unary_result(&mut self, op: UnOp, operand: TypeId, pos: Pos) -> TypeId {
        if matches!(self.types.kind(operand), TypeKind::Error) {
            return self.types.error();
        }
        match op {
            UnOp::Neg => match self.types.kind(operand) {
                TypeKind::Int | TypeKind::Float32 | TypeKind::Float64 => operand,
                _ => {
                    self.reporter.error(
                        ReportCode::T006,
                        format!("cannot negate '{}'", self.types.display(operand)),
                        pos,
                    );
                    self.types.error()
                }
            },
            UnOp::Not => {
                if !self.types.truthy_convertible(operand) {
                    self.reporter.error(
                        ReportCode::T006,
                        format!("cannot apply '!' to '{}'", self.types.display(operand)),
                        pos,
                    );
                }
                self.types.bool()
            }
            UnOp::BitNot => match self.types.kind(operand) {
                TypeKind::Int => operand,
                _ => {
                    self.reporter.error(
                        ReportCode::T006,
                        format!("cannot apply '~' to '{}'", self.types.display(operand)),
                        pos,
                    );
                    self.types.error()
                }
            },
        }
    }

    fn binary_result(&mut self, e: &Expr, op: BinOp, l: TypeId, r: TypeId) -> TypeId {
        use TypeKind::*;
        if matches!(self.types.kind(l), Error) || matches!(self.types.kind(r), Error) {
            return self.types.error();
        }
        let numeric =
            |t: &TypeKind| matches!(t, Int | Float32 | Float64);
        let promote = |checker: &Self, l: TypeId, r: TypeId| -> TypeId {
            let (lk, rk) = (checker.types.kind(l), checker.types.kind(r));
            if matches!(lk, Float64) || matches!(rk, Float64) {
                checker.types.float64()
            } else if matches!(lk, Float32) || matches!(rk, Float32) {
                if matches!(lk, Int) || matches!(rk, Int) {
                    checker.types.float64()
                } else {
                    checker.types.float32()
                }
            } else {
                checker.types.int()
            }
        };

        match op {
            BinOp::Add if matches!(self.types.kind(l), Str) && matches!(self.types.kind(r), Str) => {
                self.types.str()
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow => {
                if numeric(self.types.kind(l)) && numeric(self.types.kind(r)) {
                    promote(self, l, r)
                } else if let Some(ret) = self.operator_method(e, op, l, r) {
                    ret
                } else {
                    self.operator_error(op, l, r, e.pos)
                }
            }
            BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if matches!(self.types.kind(l), Int) && matches!(self.types.kind(r), Int) {
                    self.types.int()
                } else {
                    self.operator_error(op, l, r, e.pos)
                }
            }
            BinOp::Eq | BinOp::Ne => {
                let comparable = self.types.assignable(l, r)
                    || self.types.assignable(r, l)
                    || (self.types.is_nullable(l) && matches!(self.types.kind(r), Nil))
                    || (self.types.is_nullable(r) && matches!(self.types.kind(l), Nil));
                if comparable {
                    self.types.bool()
                } else if let Some(_ret) = self.operator_method(e, op, l, r) {
                    self.types.bool()
                } else {
                    self.operator_error(op, l, r, e.pos)
                }
            }
            BinOp::StrictEq | BinOp::StrictNe => {
                if l == r || self.types.assignable(l, r) || self.types.assignable(r, l) {
                    self.types.bool()
                } else {
                    self.operator_error(op, l, r, e.pos)
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordered = (numeric(self.types.kind(l)) && numeric(self.types.kind(r)))
                    || (matches!(self.types.kind(l), Str) && matches!(self.types.kind(r), Str));
                if ordered {
                    self.types.bool()
                } else if let Some(_ret) = self.operator_method(e, op, l, r) {
                    self.types.bool()
                } else {
                    self.operator_error(op, l, r, e.pos)
                }
            }
        }
    }

    /// Operator dispatch on user types: a declared method (or extension)
    /// named after the operator.
    fn operator_method(&mut self, e: &Expr, op: BinOp, l: TypeId, r: TypeId) -> Option<TypeId> {
        fn operator_method_name(op: BinOp) -> Option<&'static str> {
            Some(match op {
                BinOp::Eq => "eq",
                BinOp::Ne => "ne",
                BinOp::Lt => "lt",
                BinOp::Le => "le",
                BinOp::Gt => "gt",
                BinOp::Ge => "ge",
                _ => return None,
            })
        }
        let method = Symbol::intern(operator_method_name(op)?);
        let class_key = match self.types.kind(l) {
            TypeKind::Named(key) => *key,
            _ => return None,
        };
        let (owner, sig) = self.method_sig(class_key, method)?;
        if sig.params.len() != 2 {
            return None;
        }
        if !self.types.assignable(r, sig.params[1].ty) {
            return None;
        }
        self.call_targets.insert(
            e.id,
            CallTarget::Method {
                class: owner,
                method,
                type_args: Vec::new(),
            },
        );
        Some(sig.ret)
    }

    fn operator_error(&mut self, op: BinOp, l: TypeId, r: TypeId, pos: Pos) -> TypeId {
        self.reporter.error(
            ReportCode::T006,
            format!(
                "invalid operator '{:?}' for '{}' and '{}'",
                op,
                self.types.display(l),
                self.types.display(r)
            ),
            pos,
        );
        self.types.error()
    }

    fn check_assign(
        &mut self,
        pos: Pos,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
    ) -> TypeId {
        let target_ty = self.check_expr(target);
        let value_ty = self.check_expr_expecting(value, op.is_none().then_some(target_ty));

        let effective = match op {
            None => value_ty,
            // Compound assignment re-uses the binary rules.
            Some(op) => self.compound_result(op, target_ty, value_ty, pos),
        };
        if !self.types.assignable(effective, target_ty) {
            self.reporter.error(
                ReportCode::T013,
                format!(
                    "cannot assign '{}' to '{}'",
                    self.types.display(effective),
                    self.types.display(target_ty)
                ),
                pos,
            );
        }
        target_ty
    }

    fn compound_result(&mut self, op: BinOp, l: TypeId, r: TypeId, pos: Pos) -> TypeId {
        use TypeKind::*;
        if matches!(self.types.kind(l), Error) || matches!(self.types.kind(r), Error) {
            return self.types.error();
        }
        let numeric = |t: &TypeKind| matches!(t, Int | Float32 | Float64);
        match op {
            BinOp::Add if matches!(self.types.kind(l), Str) && matches!(self.types.kind(r), Str) => {
                self.types.str()
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow
                if numeric(self.types.kind(l)) && numeric(self.types.kind(r)) =>
            {
                l
            }
            BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
                if matches!(self.types.kind(l), Int) && matches!(self.types.kind(r), Int) =>
            {
                self.types.int()
            }
            _ => self.operator_error(op, l, r, pos),
        }
    }

    fn check_lambda(
        &mut self,
        params: &[Param],
        ret: &Option<TypeExpr>,
        body: &Expr,
        expected: Option<TypeId>,
    ) -> TypeId {
        let expected_fn = expected.and_then(|exp| match self.types.kind(exp) {
            TypeKind::Fn(params, ret) => Some((params.clone(), *ret)),
            _ => None,
        });

        self.scopes.push();
        let mut param_tys = Vec::new();
        for (i, param) in params.iter().enumerate() {
            let ty = match &param.ty {
                Some(te) => self.resolve_type(te),
                None => match expected_fn.as_ref().and_then(|(ps, _)| ps.get(i).copied()) {
                    Some(from_context) => from_context,
                    None => {
                        self.reporter.error(
                            ReportCode::T009,
                            format!(
                                "lambda parameter '{}' needs a type annotation",
                                param.name
                            ),
                            param.pos,
                        );
                        self.types.error()
                    }
                },
            };
            param_tys.push(ty);
            let binding = Binding {
                kind: BindingKind::Variable,
                ty,
                mutable: false,
                pos: param.pos,
            };
            if self.scopes.declare(param.name, binding).is_err() {
                self.reporter.error(
                    ReportCode::M001,
                    format!("duplicate parameter '{}'", param.name),
                    param.pos,
                );
            }
        }

        let body_ty = self.check_expr(body);
        self.scopes.pop();

        let ret_ty = match ret {
            Some(te) => {
                let declared = self.resolve_type(te);
                if !self.types.assignable(body_ty, declared) {
                    self.type_mismatch(body.pos, declared, body_ty);
                }
                declared
            }
            None => body_ty,
        };
        self.types.func(param_tys, ret_ty)
    }

    fn check_new(&mut self, pos: Pos, te: &TypeExpr, args: &[Expr]) -> TypeId {
        let ty = self.resolve_type(te);
        match self.types.kind(ty).clone() {
            TypeKind::Generic(name, type_args) if name.as_str() == "Channel" => {
                // Channels take an optional integer capacity.
                for (i, arg) in args.iter().enumerate() {
                    let got = self.check_expr(arg);
                    let int = self.types.int();
                    if i > 0 || !self.types.assignable(got, int) {
                        self.reporter.error(
                            ReportCode::T007,
                            "Channel takes at most one integer capacity argument".to_owned(),
                            arg.pos,
                        );
                    }
                }
                let _ = type_args;
                ty
            }
            TypeKind::Named(key) | TypeKind::Generic(key, _) => {
                let Some(class) = self.classes.get(&key).cloned() else {
                    self.reporter.error(
                        ReportCode::T004,
                        format!("cannot construct non-class type '{}'", self.types.display(ty)),
                        pos,
                    );
                    for arg in args {
                        self.check_expr(arg);
                    }
                    return self.types.error();
                };
                let type_args = match self.types.kind(ty) {
                    TypeKind::Generic(_, args) => args.clone(),
                    _ => Vec::new(),
                };
                let subst = build_subst(&class.generics, &type_args);

                if let Some(init) = class.methods.get(&Symbol::intern("init")).cloned() {
                    // Explicit constructor (skipping self).
                    self.check_args_against(&init.params[1..], args, &subst, pos);
                } else {
                    // Field-wise construction: all fields or none.
                    if !args.is_empty() && args.len() != class.fields.len() {
                        self.reporter.error(
                            ReportCode::T007,
                            format!(
                                "constructor of '{}' expects {} arguments, found {}",
                                key,
                                class.fields.len(),
                                args.len()
                            ),
                            pos,
                        );
                        for arg in args {
                            self.check_expr(arg);
                        }
                    } else {
                        for (arg, &(_, field_ty)) in args.iter().zip(class.fields.iter()) {
                            let concrete = self.types.substitute(field_ty, &subst);
                            let got = self.check_expr_expecting(arg, Some(concrete));
                            if !self.types.assignable(got, concrete) {
                                self.type_mismatch(arg.pos, concrete, got);
                            }
                        }
                    }
                }
                ty
            }
            TypeKind::Error => {
                for arg in args {
                    self.check_expr(arg);
                }
                self.types.error()
            }
            _ => {
                self.reporter.error(
                    ReportCode::T004,
                    format!("cannot construct non-class type '{}'", self.types.display(ty)),
                    pos,
                );
                for arg in args {
                    self.check_expr(arg);
                }
                self.types.error()
            }
        }
    }

    fn check_args_against(
        &mut self,
        params: &[ParamInfo],
        args: &[Expr],
        subst: &FxHashMap<Symbol, TypeId>,
        pos: Pos,
    ) {
        let required = params.iter().filter(|p| !p.has_default).count();
        if args.len() < required || args.len() > params.len() {
            self.reporter.error(
                ReportCode::T007,
                format!(
                    "expected {} argument(s), found {}",
                    params.len(),
                    args.len()
                ),
                pos,
            );
        }
        for (arg, param) in args.iter().zip(params.iter()) {
            let expected = self.types.substitute(param.ty, subst);
            let expected = match self.types.kind(expected) {
                TypeKind::RvalueRef(inner) => *inner,
                _ => expected,
            };
            let got = self.check_expr_expecting(arg, Some(expected));
            if !self.types.assignable(got, expected) {
                self.type_mismatch(arg.pos, expected, got);
            }
        }
        // Arguments beyond the parameter list were already counted above;
        // still give them types for later passes.
        for arg in args.iter().skip(params.len()) {
            self.check_expr(arg);
        }
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    fn check_call(&mut self, e: &Expr, _expected: Option<TypeId>) -> TypeId {
        let ExprKind::Call(callee, args) = &e.kind else {
            unreachable!("check_call on non-call");
        };

        match &callee.kind {
            ExprKind::Var(name) => {
                // Local function-typed binding shadows declarations.
                if let Some(binding) = self.scopes.resolve(*name) {
                    let callee_ty = binding.ty;
                    self.record(callee.id, callee_ty);
                    self.call_targets.insert(e.id, CallTarget::Closure);
                    return self.check_closure_call(callee_ty, args, e.pos);
                }
                if let Some(decl) = self.lookup_decl(*name) {
                    if decl.kind == DeclKind::Func {
                        return self.check_direct_call(e, callee, decl.key, args);
                    }
                    if decl.kind == DeclKind::Class {
                        self.reporter.error(
                            ReportCode::T003,
                            format!("use 'new {}(...)' to construct a class", name),
                            e.pos,
                        );
                        self.record(callee.id, self.types.error());
                        for arg in args {
                            self.check_expr(arg);
                        }
                        return self.types.error();
                    }
                }
                // Variant construction.
                if let Some(enum_key) = self.variant_owner.get(name).copied() {
                    return self.check_variant_call(e, callee, enum_key, *name, args);
                }
                self.reporter.error(
                    ReportCode::T003,
                    format!("undefined function '{}'", name),
                    callee.pos,
                );
                self.record(callee.id, self.types.error());
                for arg in args {
                    self.check_expr(arg);
                }
                self.types.error()
            }
            ExprKind::Qualified(module, name) => {
                let callee_ty = self.check_qualified(callee, *module, *name);
                self.record(callee.id, callee_ty);
                // check_qualified recorded a Func target on the callee;
                // re-key it onto the call expression.
                if let Some(CallTarget::Func { key, .. }) =
                    self.call_targets.get(&callee.id).cloned()
                {
                    return self.check_direct_call_keyed(e, key, args);
                }
                self.check_closure_call(callee_ty, args, e.pos)
            }
            ExprKind::Member(recv, method) => {
                self.check_method_call(e, callee, recv, *method, args, false)
            }
            ExprKind::SafeMember(recv, method) => {
                self.check_method_call(e, callee, recv, *method, args, true)
            }
            _ => {
                let callee_ty = self.check_expr(callee);
                self.call_targets.insert(e.id, CallTarget::Closure);
                self.check_closure_call(callee_ty, args, e.pos)
            }
        }
    }

    fn check_direct_call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        key: Symbol,
        args: &[Expr],
    ) -> TypeId {
        let ty = self.check_direct_call_keyed(e, key, args);
        // The callee expression gets the (instantiated) function type for
        // completeness.
        let callee_ty = {
            let Some(info) = self.functions.get(&key) else {
                return self.record(callee.id, self.types.error());
            };
            let params: Vec<TypeId> = info.params.iter().map(|p| p.ty).collect();
            let ret = info.ret;
            self.types.func(params, ret)
        };
        self.record(callee.id, callee_ty);
        ty
    }

    fn check_direct_call_keyed(&mut self, e: &Expr, key: Symbol, args: &[Expr]) -> TypeId {
        let Some(info) = self.functions.get(&key).cloned() else {
            for arg in args {
                self.check_expr(arg);
            }
            return self.types.error();
        };

        // Special-cased builtins with relaxed arity or parameter types.
        match key.as_str() {
            "printf" => {
                if args.is_empty() {
                    self.reporter.error(
                        ReportCode::T007,
                        "printf requires a format string".to_owned(),
                        e.pos,
                    );
                } else {
                    let fmt_ty = self.check_expr(&args[0]);
                    let string = self.types.str();
                    if !self.types.assignable(fmt_ty, string) {
                        self.type_mismatch(args[0].pos, string, fmt_ty);
                    }
                    for arg in &args[1..] {
                        self.check_expr(arg);
                    }
                }
                self.call_targets
                    .insert(e.id, CallTarget::Builtin { name: key });
                return self.types.int();
            }
            "to_string" => {
                if args.len() != 1 {
                    self.reporter.error(
                        ReportCode::T007,
                        format!("to_string expects 1 argument, found {}", args.len()),
                        e.pos,
                    );
                }
                for arg in args {
                    self.check_expr(arg);
                }
                self.call_targets
                    .insert(e.id, CallTarget::Builtin { name: key });
                return self.types.str();
            }
            _ => {}
        }

        // Infer generic arguments from the argument types.
        let arg_tys: Vec<TypeId> = args.iter().map(|a| self.check_expr(a)).collect();
        let subst = self.infer_generics(&info.generics, &info.params, &arg_tys, e.pos);

        self.check_arity_and_args(&info.params, args, &arg_tys, &subst, e.pos);

        let type_args: Vec<TypeId> = info
            .generics
            .iter()
            .map(|g| subst.get(g).copied().unwrap_or_else(|| self.types.error()))
            .collect();
        let target = if info.decl.is_none() {
            CallTarget::Builtin { name: key }
        } else {
            CallTarget::Func {
                key,
                type_args: type_args.clone(),
            }
        };
        self.call_targets.insert(e.id, target);

        let ret = self.types.substitute(info.ret, &subst);
        if info.is_async {
            self.types.future(ret)
        } else {
            ret
        }
    }

    fn check_variant_call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        enum_key: Symbol,
        name: Symbol,
        args: &[Expr],
    ) -> TypeId {
        self.record(callee.id, self.types.error());
        let Some(info) = self.enums.get(&enum_key).cloned() else {
            return self.types.error();
        };
        let Some(idx) = info.variants.iter().position(|v| v.name == name) else {
            return self.types.error();
        };
        let variant = info.variants[idx].clone();
        if variant.payload.len() != args.len() {
            self.reporter.error(
                ReportCode::T007,
                format!(
                    "variant '{}' expects {} argument(s), found {}",
                    name,
                    variant.payload.len(),
                    args.len()
                ),
                e.pos,
            );
        }

        let arg_tys: Vec<TypeId> = args.iter().map(|a| self.check_expr(a)).collect();
        let mut subst = FxHashMap::default();
        for (&param_ty, &arg_ty) in variant.payload.iter().zip(arg_tys.iter()) {
            self.unify_into(param_ty, arg_ty, &info.generics, &mut subst);
        }
        for g in &info.generics {
            if !subst.contains_key(g) {
                self.reporter.error(
                    ReportCode::T016,
                    format!("cannot infer type argument '{}' for variant '{}'", g, name),
                    e.pos,
                );
                subst.insert(*g, self.types.error());
            }
        }
        for (&param_ty, (arg, &arg_ty)) in variant
            .payload
            .iter()
            .zip(args.iter().zip(arg_tys.iter()))
        {
            let expected = self.types.substitute(param_ty, &subst);
            if !self.types.assignable(arg_ty, expected) {
                self.type_mismatch(arg.pos, expected, arg_ty);
            }
        }

        let type_args: Vec<TypeId> = info
            .generics
            .iter()
            .map(|g| subst[g])
            .collect();
        self.call_targets.insert(
            e.id,
            CallTarget::Variant {
                enum_key,
                index: idx as u32,
                type_args: type_args.clone(),
            },
        );
        if info.generics.is_empty() {
            self.types.named(enum_key)
        } else {
            self.types.generic(enum_key, type_args)
        }
    }

    fn check_method_call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        recv: &Expr,
        method: Symbol,
        args: &[Expr],
        safe: bool,
    ) -> TypeId {
        let recv_ty_full = self.check_expr(recv);
        let recv_ty = if safe {
            if !self.types.is_nullable(recv_ty_full)
                && !matches!(self.types.kind(recv_ty_full), TypeKind::Error)
            {
                self.reporter.warning(
                    ReportCode::G001,
                    format!(
                        "'?.' on non-nullable type '{}'",
                        self.types.display(recv_ty_full)
                    ),
                    e.pos,
                );
            }
            self.types.strip_nullable(recv_ty_full)
        } else {
            if self.types.is_nullable(recv_ty_full) {
                self.reporter.error(
                    ReportCode::T001,
                    format!(
                        "method call on nullable type '{}' requires '?.'",
                        self.types.display(recv_ty_full)
                    ),
                    e.pos,
                );
                self.record(callee.id, self.types.error());
                for arg in args {
                    self.check_expr(arg);
                }
                return self.types.error();
            }
            recv_ty_full
        };

        if matches!(self.types.kind(recv_ty), TypeKind::Error) {
            self.record(callee.id, self.types.error());
            for arg in args {
                self.check_expr(arg);
            }
            return self.types.error();
        }

        // Built-in members of the container types.
        if let Some(ret) = self.builtin_member_call(e, recv_ty, method, args) {
            self.record(callee.id, self.types.error());
            return if safe { self.types.nullable(ret) } else { ret };
        }

        let (class_key, class_args) = match self.types.kind(recv_ty).clone() {
            TypeKind::Named(key) => (key, Vec::new()),
            TypeKind::Generic(key, args) if self.classes.contains_key(&key) => (key, args),
            _ => {
                // Extension fallback for non-class receivers.
                if let Some(ret) = self.extension_call(e, recv_ty, method, args) {
                    self.record(callee.id, self.types.error());
                    return if safe { self.types.nullable(ret) } else { ret };
                }
                self.reporter.error(
                    ReportCode::T005,
                    format!(
                        "no method '{}' on type '{}'",
                        method,
                        self.types.display(recv_ty)
                    ),
                    e.pos,
                );
                self.record(callee.id, self.types.error());
                for arg in args {
                    self.check_expr(arg);
                }
                return self.types.error();
            }
        };

        // Inherent lookup first (walking the base chain); extensions are a
        // strict fallback.
        if let Some((owner, sig)) = self.method_sig(class_key, method) {
            let class_generics = self
                .classes
                .get(&class_key)
                .map(|c| c.generics.clone())
                .unwrap_or_default();
            let mut subst = build_subst(&class_generics, &class_args);

            let arg_tys: Vec<TypeId> = args.iter().map(|a| self.check_expr(a)).collect();
            // Infer the method's own generics on top of the class's.
            for (param, &arg_ty) in sig.params.iter().skip(1).zip(arg_tys.iter()) {
                self.unify_into(param.ty, arg_ty, &sig.generics, &mut subst);
            }
            for g in &sig.generics {
                if !subst.contains_key(g) {
                    self.reporter.error(
                        ReportCode::T016,
                        format!("cannot infer type argument '{}' for method '{}'", g, method),
                        e.pos,
                    );
                    subst.insert(*g, self.types.error());
                }
            }
            self.check_arity_and_args(&sig.params[1..], args, &arg_tys, &subst, e.pos);

            let method_type_args: Vec<TypeId> =
                sig.generics.iter().map(|g| subst[g]).collect();
            self.call_targets.insert(
                e.id,
                CallTarget::Method {
                    class: owner,
                    method,
                    type_args: method_type_args,
                },
            );
            self.record(callee.id, self.types.error());
            let ret = self.types.substitute(sig.ret, &subst);
            let ret = if sig.is_async {
                self.types.future(ret)
            } else {
                ret
            };
            return if safe { self.types.nullable(ret) } else { ret };
        }

        if let Some(ret) = self.extension_call(e, recv_ty, method, args) {
            self.record(callee.id, self.types.error());
            return if safe { self.types.nullable(ret) } else { ret };
        }

        self.reporter.error(
            ReportCode::T005,
            format!("no method '{}' on class '{}'", method, class_key),
            e.pos,
        );
        self.record(callee.id, self.types.error());
        for arg in args {
            self.check_expr(arg);
        }
        self.types.error()
    }

    fn builtin_member_call(
        &mut self,
        e: &Expr,
        recv_ty: TypeId,
        method: Symbol,
        args: &[Expr],
    ) -> Option<TypeId> {
        let is_len = method.as_str() == "len";
        if !is_len {
            return None;
        }
        let supported = match self.types.kind(recv_ty) {
            TypeKind::Str => true,
            TypeKind::Generic(name, _) => matches!(name.as_str(), "list" | "Map"),
            _ => false,
        };
        if !supported {
            return None;
        }
        if !args.is_empty() {
            self.reporter.error(
                ReportCode::T007,
                "len() takes no arguments".to_owned(),
                e.pos,
            );
            for arg in args {
                self.check_expr(arg);
            }
        }
        self.call_targets.insert(
            e.id,
            CallTarget::Builtin {
                name: Symbol::intern("len"),
            },
        );
        Some(self.types.int())
    }

    fn extension_call(
        &mut self,
        e: &Expr,
        recv_ty: TypeId,
        method: Symbol,
        args: &[Expr],
    ) -> Option<TypeId> {
        let type_name = self.type_lookup_name(recv_ty)?;
        let key = *self.extensions.get(&(type_name, method))?;
        let info = self.functions.get(&key).cloned()?;

        let arg_tys: Vec<TypeId> = args.iter().map(|a| self.check_expr(a)).collect();
        let subst = FxHashMap::default();
        self.check_arity_and_args(&info.params[1..], args, &arg_tys, &subst, e.pos);
        self.call_targets
            .insert(e.id, CallTarget::Extension { key });
        Some(info.ret)
    }

    fn check_closure_call(&mut self, callee_ty: TypeId, args: &[Expr], pos: Pos) -> TypeId {
        match self.types.kind(callee_ty).clone() {
            TypeKind::Fn(params, ret) => {
                if params.len() != args.len() {
                    self.reporter.error(
                        ReportCode::T007,
                        format!(
                            "expected {} argument(s), found {}",
                            params.len(),
                            args.len()
                        ),
                        pos,
                    );
                }
                for (arg, &param_ty) in args.iter().zip(params.iter()) {
                    let got = self.check_expr_expecting(arg, Some(param_ty));
                    if !self.types.assignable(got, param_ty) {
                        self.type_mismatch(arg.pos, param_ty, got);
                    }
                }
                for arg in args.iter().skip(params.len()) {
                    self.check_expr(arg);
                }
                ret
            }
            TypeKind::Error => {
                for arg in args {
                    self.check_expr(arg);
                }
                self.types.error()
            }
            _ => {
                self.reporter.error(
                    ReportCode::T003,
                    format!(
                        "value of type '{}' is not callable",
                        self.types.display(callee_ty)
                    ),
                    pos,
                );
                for arg in args {
                    self.check_expr(arg);
                }
                self.types.error()
            }
        }
    }

    fn check_arity_and_args(
        &mut self,
        params: &[ParamInfo],
        args: &[Expr],
        arg_tys: &[TypeId],
        subst: &FxHashMap<Symbol, TypeId>,
        pos: Pos,
    ) {
        let required = params.iter().filter(|p| !p.has_default).count();
        if args.len() < required || args.len() > params.len() {
            self.reporter.error(
                ReportCode::T007,
                format!(
                    "expected {} argument(s), found {}",
                    params.len(),
                    args.len()
                ),
                pos,
            );
        }
        for ((arg, &arg_ty), param) in args.iter().zip(arg_tys.iter()).zip(params.iter()) {
            let expected = self.types.substitute(param.ty, subst);
            let expected = match self.types.kind(expected) {
                TypeKind::RvalueRef(inner) => *inner,
                _ => expected,
            };
            if !self.types.assignable(arg_ty, expected) {
                self.type_mismatch(arg.pos, expected, arg_ty);
            }
        }
    }

    fn infer_generics(
        &mut self,
        generics: &[Symbol],
        params: &[ParamInfo],
        arg_tys: &[TypeId],
        pos: Pos,
    ) -> FxHashMap<Symbol, TypeId> {
        let mut subst = FxHashMap::default();
        if generics.is_empty() {
            return subst;
        }
        for (param, &arg_ty) in params.iter().zip(arg_tys.iter()) {
            self.unify_into(param.ty, arg_ty, generics, &mut subst);
        }
        for g in generics {
            if !subst.contains_key(g) {
                self.reporter.error(
                    ReportCode::T016,
                    format!("cannot infer type argument '{}'", g),
                    pos,
                );
                subst.insert(*g, self.types.error());
            }
        }
        subst
    }

    /// Structural one-way unification: bind `Param` leaves of `param_ty`
    /// that belong to `generics` against the shape of `arg_ty`.
    fn unify_into(
        &mut self,
        param_ty: TypeId,
        arg_ty: TypeId,
        generics: &[Symbol],
        subst: &mut FxHashMap<Symbol, TypeId>,
    ) {
        match (
            self.types.kind(param_ty).clone(),
            self.types.kind(arg_ty).clone(),
        ) {
            (TypeKind::Param(name), _) if generics.contains(&name) => {
                subst.entry(name).or_insert(arg_ty);
            }
            (TypeKind::Generic(n1, a1), TypeKind::Generic(n2, a2))
                if n1 == n2 && a1.len() == a2.len() =>
            {
                for (&p, &a) in a1.iter().zip(a2.iter()) {
                    self.unify_into(p, a, generics, subst);
                }
            }
            (TypeKind::Nullable(p), TypeKind::Nullable(a))
            | (TypeKind::RvalueRef(p), TypeKind::RvalueRef(a)) => {
                self.unify_into(p, a, generics, subst);
            }
            (TypeKind::RvalueRef(p), _) => self.unify_into(p, arg_ty, generics, subst),
            (TypeKind::Nullable(p), _) => self.unify_into(p, arg_ty, generics, subst),
            (TypeKind::Fn(p1, r1), TypeKind::Fn(p2, r2)) if p1.len() == p2.len() => {
                for (&p, &a) in p1.iter().zip(p2.iter()) {
                    self.unify_into(p, a, generics, subst);
                }
                self.unify_into(r1, r2, generics, subst);
            }
            _ => {}
        }
    }

    // =========================================================================
    // MEMBERS AND TYPES
    // =========================================================================

    fn member_type(&mut self, recv_ty: TypeId, name: Symbol, pos: Pos) -> TypeId {
        if matches!(self.types.kind(recv_ty), TypeKind::Error) {
            return self.types.error();
        }

        if let Some((class_key, class_args)) = self.class_instance(recv_ty) {
            let class_generics = self
                .classes
                .get(&class_key)
                .map(|c| c.generics.clone())
                .unwrap_or_default();
            let subst = build_subst(&class_generics, &class_args);

            // Fields (walking the base chain).
            let mut current = class_key;
            let mut fuel = 64;
            loop {
                let Some(class) = self.classes.get(&current) else {
                    break;
                };
                if let Some(&(_, field_ty)) = class.fields.iter().find(|(f, _)| *f == name) {
                    return self.types.substitute(field_ty, &subst);
                }
                match class.base {
                    Some(base) => current = base,
                    None => break,
                }
                fuel -= 1;
                if fuel == 0 {
                    break;
                }
            }

            // Methods as bound values.
            if let Some((_, sig)) = self.method_sig(class_key, name) {
                let params: Vec<TypeId> = sig
                    .params
                    .iter()
                    .skip(1)
                    .map(|p| self.types.substitute(p.ty, &subst))
                    .collect();
                let ret = self.types.substitute(sig.ret, &subst);
                return self.types.func(params, ret);
            }
        }

        // Extensions are the strict fallback.
        if let Some(type_name) = self.type_lookup_name(recv_ty) {
            if let Some(&key) = self.extensions.get(&(type_name, name)) {
                if let Some(info) = self.functions.get(&key) {
                    let params: Vec<TypeId> = info.params.iter().skip(1).map(|p| p.ty).collect();
                    let ret = info.ret;
                    return self.types.func(params, ret);
                }
            }
        }

        // `len` as a readable property on the container types.
        if name.as_str() == "len" {
            let supported = match self.types.kind(recv_ty) {
                TypeKind::Str => true,
                TypeKind::Generic(n, _) => matches!(n.as_str(), "list" | "Map"),
                _ => false,
            };
            if supported {
                return self.types.int();
            }
        }

        self.reporter.error(
            ReportCode::T005,
            format!(
                "no member '{}' on type '{}'",
                name,
                self.types.display(recv_ty)
            ),
            pos,
        );
        self.types.error()
    }

    fn index_result(&mut self, base_ty: TypeId, index_ty: TypeId, pos: Pos) -> TypeId {
        match self.types.kind(base_ty).clone() {
            TypeKind::Generic(name, args) if name.as_str() == "list" && args.len() == 1 => {
                let int = self.types.int();
                if !self.types.assignable(index_ty, int) {
                    self.type_mismatch(pos, int, index_ty);
                }
                args[0]
            }
            TypeKind::Generic(name, args) if name.as_str() == "Map" && args.len() == 2 => {
                if !self.types.assignable(index_ty, args[0]) {
                    self.type_mismatch(pos, args[0], index_ty);
                }
                args[1]
            }
            TypeKind::Str => {
                let int = self.types.int();
                if !self.types.assignable(index_ty, int) {
                    self.type_mismatch(pos, int, index_ty);
                }
                self.types.str()
            }
            TypeKind::Error => self.types.error(),
            _ => {
                self.reporter.error(
                    ReportCode::T006,
                    format!(
                        "type '{}' does not support indexing",
                        self.types.display(base_ty)
                    ),
                    pos,
                );
                self.types.error()
            }
        }
    }

    fn class_instance(&self, ty: TypeId) -> Option<(Symbol, Vec<TypeId>)> {
        match self.types.kind(ty) {
            TypeKind::Named(key) if self.classes.contains_key(key) => Some((*key, Vec::new())),
            TypeKind::Generic(key, args) if self.classes.contains_key(key) => {
                Some((*key, args.clone()))
            }
            _ => None,
        }
    }

    /// The name under which a type participates in extension lookup.
    fn type_lookup_name(&self, ty: TypeId) -> Option<Symbol> {
        match self.types.kind(ty) {
            TypeKind::Int => Some(Symbol::intern("int")),
            TypeKind::Float32 => Some(Symbol::intern("float32")),
            TypeKind::Float64 => Some(Symbol::intern("float64")),
            TypeKind::Bool => Some(Symbol::intern("bool")),
            TypeKind::Str => Some(Symbol::intern("string")),
            TypeKind::Named(key) | TypeKind::Generic(key, _) => Some(*key),
            _ => None,
        }
    }

    fn method_sig(&self, class: Symbol, name: Symbol) -> Option<(Symbol, FuncInfo)> {
        let mut current = class;
        let mut fuel = 64;
        loop {
            let info = self.classes.get(&current)?;
            if let Some(m) = info.methods.get(&name) {
                let mut sig = m.clone();
                sig.decl = None; // the signature view needs no body
                return Some((current, sig));
            }
            current = info.base?;
            fuel -= 1;
            if fuel == 0 {
                return None;
            }
        }
    }

    fn lookup_decl(&self, name: Symbol) -> Option<DeclRef> {
        self.decl_index
            .get(&(self.current_module, name))
            .or_else(|| self.decl_index.get(&(self.builtin_module, name)))
            .copied()
    }

    fn resolve_type_name(&mut self, name: Symbol, pos: Pos) -> TypeId {
        match name.as_str() {
            "int" => return self.types.int(),
            "float32" => return self.types.float32(),
            "float64" => return self.types.float64(),
            "bool" => return self.types.bool(),
            "string" => return self.types.str(),
            "void" => return self.types.void(),
            "nil" => return self.types.nil(),
            _ => {}
        }
        if self.generic_scope.contains(&name) {
            return self.types.param(name);
        }
        if let Some(decl) = self.lookup_decl(name) {
            match decl.kind {
                DeclKind::Class | DeclKind::Trait => return self.types.named(decl.key),
                DeclKind::Enum => {
                    let generic = self
                        .enums
                        .get(&decl.key)
                        .map(|e| !e.generics.is_empty())
                        .unwrap_or(false);
                    if generic {
                        self.reporter.error(
                            ReportCode::T016,
                            format!("enum '{}' requires type arguments", name),
                            pos,
                        );
                        return self.types.error();
                    }
                    return self.types.named(decl.key);
                }
                _ => {}
            }
        }
        self.reporter.error(
            ReportCode::T004,
            format!("undefined type '{}'", name),
            pos,
        );
        self.types.error()
    }

    fn resolve_type(&mut self, te: &TypeExpr) -> TypeId {
        match &te.kind {
            TypeExprKind::Name(name) => self.resolve_type_name(*name, te.pos),
            TypeExprKind::Qualified(module, name) => {
                if !self.module_accessible(*module) {
                    self.reporter.error(
                        ReportCode::M004,
                        format!("module '{}' is not imported", module),
                        te.pos,
                    );
                    return self.types.error();
                }
                match self.decl_index.get(&(*module, *name)).copied() {
                    Some(DeclRef {
                        kind: DeclKind::Class | DeclKind::Enum | DeclKind::Trait,
                        key,
                    }) => self.types.named(key),
                    _ => {
                        self.reporter.error(
                            ReportCode::T004,
                            format!("undefined type '{}::{}'", module, name),
                            te.pos,
                        );
                        self.types.error()
                    }
                }
            }
            TypeExprKind::Generic(name, args) => {
                let resolved_args: Vec<TypeId> =
                    args.iter().map(|a| self.resolve_type(a)).collect();
                if Self::is_builtin_generic(*name) {
                    let expected_arity = match name.as_str() {
                        "Map" | "Result" => 2,
                        _ => 1,
                    };
                    if resolved_args.len() != expected_arity {
                        self.reporter.error(
                            ReportCode::T016,
                            format!(
                                "'{}' expects {} type argument(s), found {}",
                                name,
                                expected_arity,
                                resolved_args.len()
                            ),
                            te.pos,
                        );
                        return self.types.error();
                    }
                    return self.types.generic(*name, resolved_args);
                }
                match self.lookup_decl(*name) {
                    Some(DeclRef {
                        kind: DeclKind::Class,
                        key,
                    }) => {
                        let arity = self
                            .classes
                            .get(&key)
                            .map(|c| c.generics.len())
                            .unwrap_or(0);
                        if arity != resolved_args.len() {
                            self.reporter.error(
                                ReportCode::T016,
                                format!(
                                    "'{}' expects {} type argument(s), found {}",
                                    name,
                                    arity,
                                    resolved_args.len()
                                ),
                                te.pos,
                            );
                            return self.types.error();
                        }
                        self.types.generic(key, resolved_args)
                    }
                    Some(DeclRef {
                        kind: DeclKind::Enum,
                        key,
                    }) => {
                        let arity = self
                            .enums
                            .get(&key)
                            .map(|e| e.generics.len())
                            .unwrap_or(0);
                        if arity != resolved_args.len() {
                            self.reporter.error(
                                ReportCode::T016,
                                format!(
                                    "'{}' expects {} type argument(s), found {}",
                                    name,
                                    arity,
                                    resolved_args.len()
                                ),
                                te.pos,
                            );
                            return self.types.error();
                        }
                        self.types.generic(key, resolved_args)
                    }
                    _ => {
                        self.reporter.error(
                            ReportCode::T004,
                            format!("undefined generic type '{}'", name),
                            te.pos,
                        );
                        self.types.error()
                    }
                }
            }
            TypeExprKind::Fn(params, ret) => {
                let params: Vec<TypeId> = params.iter().map(|p| self.resolve_type(p)).collect();
                let ret = self.resolve_type(ret);
                self.types.func(params, ret)
            }
            TypeExprKind::Nullable(inner) => {
                let inner = self.resolve_type(inner);
                self.types.nullable(inner)
            }
            TypeExprKind::Union(alts) => {
                let alts: Vec<TypeId> = alts.iter().map(|a| self.resolve_type(a)).collect();
                self.types.union(alts)
            }
            TypeExprKind::RvalueRef(inner) => {
                let inner = self.resolve_type(inner);
                self.types.rvalue_ref(inner)
            }
        }
    }
}

fn join_or_report(
    checker: &mut Checker<'_>,
    pos: Pos,
    current: Option<TypeId>,
    got: TypeId,
) -> Option<TypeId> {
    match current {
        None => Some(got),
        Some(current_ty) => match checker.types.common_type(current_ty, got) {
            Some(joined) => Some(joined),
            None => {
                checker.type_mismatch(pos, current_ty, got);
                Some(current_ty)
            }
        },
    }
}

fn build_subst(generics: &[Symbol], args: &[TypeId]) -> FxHashMap<Symbol, TypeId> {
    generics
        .iter()
        .zip(args.iter())
        .map(|(&g, &a)| (g, a))
        .collect()
}

fn unwrap_export(stmt: &Stmt) -> &Stmt {
    match &stmt.kind {
        StmtKind::Export(ExportStmt::Decl(inner)) => inner,
        _ => stmt,
    }
}

/// Pair checked parameters with their AST declarations, accounting for the
/// injected `self`.
fn padded_params<'d>(info: &FuncInfo, decl: &'d FuncDecl) -> Vec<Option<&'d Param>> {
    let mut out = Vec::with_capacity(info.params.len());
    let offset = info.params.len().saturating_sub(decl.params.len());
    for i in 0..info.params.len() {
        if i < offset {
            out.push(None);
        } else {
            out.push(decl.params.get(i - offset));
        }
    }
    out
}
