//! AST node definitions.
//!
//! The AST is a tree of tagged variants; consumers dispatch by pattern
//! matching rather than through virtual visitors. Every node carries the
//! position of its defining token so diagnostics at any later stage can
//! point into the source.
//!
//! Expressions additionally carry a parser-assigned [`ExprId`]. Resolved
//! types never live on the nodes themselves: the type checker records them
//! in a side table keyed by `ExprId`, written exactly once per expression.

use sablec_util::{define_idx, Pos, Symbol};

define_idx!(
    /// Identity of an expression node, unique across a compilation unit.
    ExprId
);

/// A literal value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lit {
    /// Integer literal.
    Int(i64),
    /// 32-bit float literal.
    Float32(f32),
    /// 64-bit float literal.
    Float64(f64),
    /// String literal (processed value, interned).
    Str(Symbol),
    /// Boolean literal.
    Bool(bool),
    /// The nil literal.
    Nil,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

/// Short-circuiting logical operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOp {
    And,
    Or,
}

/// Unary prefix operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// An expression node.
#[derive(Clone, Debug)]
pub struct Expr {
    /// Unique id; key into the checker's resolved-type table.
    pub id: ExprId,
    /// Position of the defining token.
    pub pos: Pos,
    /// The expression itself.
    pub kind: ExprKind,
}

/// Expression variants.
#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),
    /// Variable reference.
    Var(Symbol),
    /// Qualified reference `module::name`.
    Qualified(Symbol, Symbol),
    /// Unary prefix operation.
    Unary(UnOp, Box<Expr>),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Short-circuiting logical operation.
    Logical(LogOp, Box<Expr>, Box<Expr>),
    /// Assignment; the operator is present for compound forms (`+=` etc.).
    Assign(Box<Expr>, Option<BinOp>, Box<Expr>),
    /// Parenthesized grouping.
    Group(Box<Expr>),
    /// Call: callee plus arguments.
    Call(Box<Expr>, Vec<Expr>),
    /// Member access `recv.name`.
    Member(Box<Expr>, Symbol),
    /// Safe member access `recv?.name`.
    SafeMember(Box<Expr>, Symbol),
    /// Indexing `base[index]`.
    Index(Box<Expr>, Box<Expr>),
    /// List literal.
    List(Vec<Expr>),
    /// Map literal.
    Map(Vec<(Expr, Expr)>),
    /// Lambda: parameters, optional return annotation, expression body.
    Lambda(Vec<Param>, Option<TypeExpr>, Box<Expr>),
    /// `await e`.
    Await(Box<Expr>),
    /// `new T(args)`.
    New(TypeExpr, Vec<Expr>),
    /// `delete e`.
    Delete(Box<Expr>),
    /// String interpolation assembled from template-literal fragments.
    Interp(Vec<InterpPart>),
    /// Match used in expression position; arms carry expression bodies.
    Match(Box<Expr>, Vec<MatchExprArm>),
    /// Not-null assertion `e!`.
    NotNull(Box<Expr>),
    /// Elvis `e ?: fallback`.
    Elvis(Box<Expr>, Box<Expr>),
    /// Null coalescing `e ?? fallback`.
    Coalesce(Box<Expr>, Box<Expr>),
    /// Explicit ownership transfer `move e`.
    Move(Box<Expr>),
    /// Channel send `ch <- value`.
    Send(Box<Expr>, Box<Expr>),
    /// Channel receive `<- ch`.
    Recv(Box<Expr>),
    /// Increment; `prefix` distinguishes `++e` from `e++`.
    Incr(Box<Expr>, bool),
    /// Decrement; `prefix` distinguishes `--e` from `e--`.
    Decr(Box<Expr>, bool),
    /// Cast `e as T`.
    Cast(Box<Expr>, TypeExpr),
    /// Type test `e is T`.
    TypeTest(Box<Expr>, TypeExpr),
    /// Range `lo..hi` (exclusive) or `lo...hi` (inclusive).
    Range(Box<Expr>, Box<Expr>, bool),
    /// Hole left by parser recovery.
    Error,
}

/// One piece of a string interpolation.
#[derive(Clone, Debug)]
pub enum InterpPart {
    /// Literal text fragment.
    Text(Symbol),
    /// Embedded expression.
    Expr(Box<Expr>),
}

/// An arm of a match expression (`case pattern: expr`).
#[derive(Clone, Debug)]
pub struct MatchExprArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub pos: Pos,
}

/// A statement node.
#[derive(Clone, Debug)]
pub struct Stmt {
    /// Position of the defining token.
    pub pos: Pos,
    /// The statement itself.
    pub kind: StmtKind,
}

/// Statement variants.
#[derive(Clone, Debug)]
pub enum StmtKind {
    /// Expression in statement position.
    Expr(Expr),
    /// `let`/`const` binding.
    Let(LetStmt),
    /// Explicit block (indentation suite).
    Block(Vec<Stmt>),
    /// `if`/`elif`/`else` chain.
    If(IfStmt),
    /// `while cond:` loop.
    While(Expr, Vec<Stmt>),
    /// `for name in iterable:` loop.
    For(Symbol, Expr, Vec<Stmt>),
    /// `return [expr]`.
    Return(Option<Expr>),
    /// Function declaration (`def`, possibly `async`, possibly extension).
    Func(FuncDecl),
    /// Class declaration.
    Class(ClassDecl),
    /// Enum declaration.
    Enum(EnumDecl),
    /// Trait declaration.
    Trait(TraitDecl),
    /// Implementation block.
    Impl(ImplBlock),
    /// `import M` / `from M import a, b as c`.
    Import(ImportStmt),
    /// `export <declaration>` or `export name`.
    Export(ExportStmt),
    /// `module name:` block.
    Module(Symbol, Vec<Stmt>),
    /// Match statement.
    Match(MatchStmt),
    /// `try`/`catch`/`finally`.
    Try(TryStmt),
    /// `throw expr`.
    Throw(Expr),
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `defer <stmt>`.
    Defer(Box<Stmt>),
    /// `go expr`.
    Go(Expr),
    /// `select:` with channel arms.
    Select(Vec<SelectArm>),
    /// Hole left by parser recovery.
    Error,
}

/// `let`/`const` binding.
#[derive(Clone, Debug)]
pub struct LetStmt {
    pub name: Symbol,
    /// Type annotation, if written.
    pub ty: Option<TypeExpr>,
    /// Initializer, if written.
    pub init: Option<Expr>,
    /// `let` bindings are mutable; `const` bindings are not.
    pub mutable: bool,
}

/// `if`/`elif`/`else` chain.
#[derive(Clone, Debug)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub elifs: Vec<(Expr, Vec<Stmt>)>,
    pub else_body: Option<Vec<Stmt>>,
}

/// Function parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Symbol,
    /// Annotation; lambdas may omit it and rely on context.
    pub ty: Option<TypeExpr>,
    /// Default value.
    pub default: Option<Expr>,
    /// True for `T&&` parameters: the callee takes ownership.
    pub moved: bool,
    pub pos: Pos,
}

/// Function declaration.
#[derive(Clone, Debug)]
pub struct FuncDecl {
    pub name: Symbol,
    /// Generic parameter names.
    pub generics: Vec<Symbol>,
    pub params: Vec<Param>,
    /// Declared return type; `None` means void.
    pub ret: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    /// For extension functions `def Type.name(...)`: the receiver type name.
    pub receiver: Option<Symbol>,
    pub pos: Pos,
}

/// Class field.
#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: Symbol,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
    pub pos: Pos,
}

/// Class declaration.
#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub name: Symbol,
    pub generics: Vec<Symbol>,
    /// Single base class, if any.
    pub base: Option<Symbol>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FuncDecl>,
    pub pos: Pos,
}

/// Enum variant.
#[derive(Clone, Debug)]
pub struct VariantDecl {
    pub name: Symbol,
    /// Payload types; empty for unit variants.
    pub payload: Vec<TypeExpr>,
    pub pos: Pos,
}

/// Enum declaration.
#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: Symbol,
    pub generics: Vec<Symbol>,
    pub variants: Vec<VariantDecl>,
    pub pos: Pos,
}

/// Method signature inside a trait.
#[derive(Clone, Debug)]
pub struct FuncSig {
    pub name: Symbol,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub pos: Pos,
}

/// Trait declaration.
#[derive(Clone, Debug)]
pub struct TraitDecl {
    pub name: Symbol,
    pub generics: Vec<Symbol>,
    pub methods: Vec<FuncSig>,
    pub pos: Pos,
}

/// `impl Trait for Type:` block.
#[derive(Clone, Debug)]
pub struct ImplBlock {
    /// Trait being implemented, `None` for inherent impls.
    pub trait_name: Option<Symbol>,
    pub self_ty: Symbol,
    pub methods: Vec<FuncDecl>,
    pub pos: Pos,
}

/// Import statement.
#[derive(Clone, Debug)]
pub struct ImportStmt {
    pub module: Symbol,
    /// `None` for `import M`; `Some` for `from M import a, b as c`,
    /// pairing each imported name with its optional alias.
    pub items: Option<Vec<(Symbol, Option<Symbol>)>>,
    pub pos: Pos,
}

/// Export statement.
#[derive(Clone, Debug)]
pub enum ExportStmt {
    /// `export <declaration>`.
    Decl(Box<Stmt>),
    /// `export name`.
    Name(Symbol),
}

/// One arm of a match statement.
#[derive(Clone, Debug)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

/// Match statement.
#[derive(Clone, Debug)]
pub struct MatchStmt {
    pub scrutinee: Expr,
    pub arms: Vec<MatchArm>,
}

/// Catch clause.
#[derive(Clone, Debug)]
pub struct CatchClause {
    pub name: Symbol,
    pub ty: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

/// `try`/`catch`/`finally`.
#[derive(Clone, Debug)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Vec<Stmt>>,
}

/// One arm of a `select` statement.
#[derive(Clone, Debug)]
pub struct SelectArm {
    pub op: SelectOp,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

/// The channel operation a select arm waits on.
#[derive(Clone, Debug)]
pub enum SelectOp {
    /// `case [name =] <- ch:`
    Recv { bind: Option<Symbol>, chan: Expr },
    /// `case ch <- value:`
    Send { chan: Expr, value: Expr },
    /// `default:`
    Default,
}

/// A pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub pos: Pos,
    pub kind: PatternKind,
}

/// Pattern variants.
#[derive(Clone, Debug)]
pub enum PatternKind {
    /// `_`
    Wildcard,
    /// Literal pattern.
    Lit(Lit),
    /// Bare name: binds, unless the checker resolves it to a nullary
    /// variant of the scrutinee's enum.
    Bind(Symbol),
    /// Constructor pattern `Name(p1, ..., pn)`.
    Ctor(Symbol, Vec<Pattern>),
    /// Tuple pattern `(p1, ..., pn)`; decomposes class fields positionally.
    Tuple(Vec<Pattern>),
    /// Struct pattern `Name { field: p, .. }`; `rest` when `..` was written.
    Struct(Symbol, Vec<(Symbol, Pattern)>, bool),
    /// Or-pattern `p | q`.
    Or(Box<Pattern>, Box<Pattern>),
    /// Range pattern `lo..hi` / `lo...hi`.
    Range(Lit, Lit, bool),
    /// Type test `is T`.
    TypeTest(TypeExpr),
}

/// A syntactic type.
#[derive(Clone, Debug)]
pub struct TypeExpr {
    pub pos: Pos,
    pub kind: TypeExprKind,
}

/// Type syntax variants.
#[derive(Clone, Debug)]
pub enum TypeExprKind {
    /// A bare name: primitive, class, enum, trait, or type parameter.
    Name(Symbol),
    /// Qualified name `module::Name`.
    Qualified(Symbol, Symbol),
    /// Generic application `Name<T1, ..., Tn>`.
    Generic(Symbol, Vec<TypeExpr>),
    /// Function type `(T1, ..., Tn) -> R`.
    Fn(Vec<TypeExpr>, Box<TypeExpr>),
    /// Nullable `T?`.
    Nullable(Box<TypeExpr>),
    /// Union `A | B`.
    Union(Vec<TypeExpr>),
    /// Rvalue reference `T&&`.
    RvalueRef(Box<TypeExpr>),
}

impl Expr {
    /// Build an error hole at `pos`.
    pub fn error(id: ExprId, pos: Pos) -> Expr {
        Expr {
            id,
            pos,
            kind: ExprKind::Error,
        }
    }

    /// True for expressions that are legal in statement position because
    /// they can have effects.
    pub fn has_effects(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call(..)
                | ExprKind::Assign(..)
                | ExprKind::Await(..)
                | ExprKind::Send(..)
                | ExprKind::Recv(..)
                | ExprKind::Incr(..)
                | ExprKind::Decr(..)
                | ExprKind::Delete(..)
                | ExprKind::New(..)
                | ExprKind::Match(..)
                | ExprKind::Error
        ) || match &self.kind {
            ExprKind::SafeMember(recv, _) => recv.has_effects(),
            _ => false,
        }
    }

    /// True for expressions that may appear on the left of an assignment.
    pub fn is_place(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_)
                | ExprKind::Qualified(..)
                | ExprKind::Member(..)
                | ExprKind::Index(..)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_expr(kind: ExprKind) -> Expr {
        Expr {
            id: ExprId(0),
            pos: Pos::dummy(),
            kind,
        }
    }

    #[test]
    fn test_has_effects() {
        let var = dummy_expr(ExprKind::Var(Symbol::intern("x")));
        assert!(!var.has_effects());

        let call = dummy_expr(ExprKind::Call(Box::new(var.clone()), vec![]));
        assert!(call.has_effects());

        let assign = dummy_expr(ExprKind::Assign(
            Box::new(var.clone()),
            None,
            Box::new(dummy_expr(ExprKind::Lit(Lit::Int(1)))),
        ));
        assert!(assign.has_effects());

        let lit = dummy_expr(ExprKind::Lit(Lit::Int(3)));
        assert!(!lit.has_effects());
    }

    #[test]
    fn test_is_place() {
        let var = dummy_expr(ExprKind::Var(Symbol::intern("x")));
        assert!(var.is_place());

        let member = dummy_expr(ExprKind::Member(Box::new(var.clone()), Symbol::intern("f")));
        assert!(member.is_place());

        let lit = dummy_expr(ExprKind::Lit(Lit::Bool(true)));
        assert!(!lit.is_place());
    }
}
