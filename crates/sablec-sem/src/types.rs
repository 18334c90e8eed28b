//! Type representation and the type table.
//!
//! Types are interned: [`TypeTable`] memoizes structural identity behind
//! [`TypeId`] handles, so two structurally equal types always share one id
//! and type equality is an integer comparison. Construction goes through
//! factory methods that canonicalize primitives and normalize compounds
//! (unions are flattened, deduplicated, and sorted; nullability collapses).
//!
//! A substitution map `parameter name → TypeId` is the sole mechanism of
//! generic instantiation; [`TypeTable::substitute`] rewrites parameter
//! leaves and is idempotent on closed types.

use sablec_util::{define_idx, FxHashMap, FxHashSet, IndexVec, Symbol};

define_idx!(
    /// Handle into the [`TypeTable`]. Equal ids mean equal types.
    TypeId
);

/// The structure of a type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Internal hole; unifies with anything and suppresses cascades.
    Error,
    /// 64-bit signed integer.
    Int,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// String.
    Str,
    /// No value.
    Void,
    /// The type of `nil`.
    Nil,
    /// User declaration referenced by qualified name.
    Named(Symbol),
    /// Generic application `Name<T1, ..., Tn>`.
    Generic(Symbol, Vec<TypeId>),
    /// Function type: parameter types and return type.
    Fn(Vec<TypeId>, TypeId),
    /// Union of alternatives, canonically sorted.
    Union(Vec<TypeId>),
    /// Nullable `T?`.
    Nullable(TypeId),
    /// Rvalue reference `T&&`: a movable temporary.
    RvalueRef(TypeId),
    /// Type parameter bound in a generic scope.
    Param(Symbol),
}

/// Interning table for types, plus the nominal relations (class bases and
/// trait implementations) registered during declaration collection.
#[derive(Clone)]
pub struct TypeTable {
    kinds: IndexVec<TypeId, TypeKind>,
    lookup: FxHashMap<TypeKind, TypeId>,
    // Canonical primitives.
    error: TypeId,
    int: TypeId,
    float32: TypeId,
    float64: TypeId,
    bool_: TypeId,
    str_: TypeId,
    void: TypeId,
    nil: TypeId,
    /// class name → base class name.
    bases: FxHashMap<Symbol, Symbol>,
    /// (type name, trait name) pairs from impl blocks.
    impls: FxHashSet<(Symbol, Symbol)>,
}

impl TypeTable {
    /// Create a table with the primitives pre-interned.
    pub fn new() -> Self {
        let mut kinds = IndexVec::new();
        let mut lookup = FxHashMap::default();
        let mut prim = |kind: TypeKind| -> TypeId {
            let id = kinds.push(kind.clone());
            lookup.insert(kind, id);
            id
        };
        let error = prim(TypeKind::Error);
        let int = prim(TypeKind::Int);
        let float32 = prim(TypeKind::Float32);
        let float64 = prim(TypeKind::Float64);
        let bool_ = prim(TypeKind::Bool);
        let str_ = prim(TypeKind::Str);
        let void = prim(TypeKind::Void);
        let nil = prim(TypeKind::Nil);
        Self {
            kinds,
            lookup,
            error,
            int,
            float32,
            float64,
            bool_,
            str_,
            void,
            nil,
            bases: FxHashMap::default(),
            impls: FxHashSet::default(),
        }
    }

    /// Intern a kind, returning the canonical id.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.lookup.get(&kind) {
            return id;
        }
        let id = self.kinds.push(kind.clone());
        self.lookup.insert(kind, id);
        id
    }

    /// The structure behind an id.
    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id]
    }

    // Primitive accessors.
    pub fn error(&self) -> TypeId {
        self.error
    }
    pub fn int(&self) -> TypeId {
        self.int
    }
    pub fn float32(&self) -> TypeId {
        self.float32
    }
    pub fn float64(&self) -> TypeId {
        self.float64
    }
    pub fn bool(&self) -> TypeId {
        self.bool_
    }
    pub fn str(&self) -> TypeId {
        self.str_
    }
    pub fn void(&self) -> TypeId {
        self.void
    }
    pub fn nil(&self) -> TypeId {
        self.nil
    }

    /// Named user type.
    pub fn named(&mut self, name: Symbol) -> TypeId {
        self.intern(TypeKind::Named(name))
    }

    /// Generic application.
    pub fn generic(&mut self, name: Symbol, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Generic(name, args))
    }

    /// Function type.
    pub fn func(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern(TypeKind::Fn(params, ret))
    }

    /// Type parameter.
    pub fn param(&mut self, name: Symbol) -> TypeId {
        self.intern(TypeKind::Param(name))
    }

    /// Union; flattens nested unions, deduplicates, sorts. A single
    /// alternative collapses to itself.
    pub fn union(&mut self, alts: Vec<TypeId>) -> TypeId {
        let mut flat = Vec::new();
        for alt in alts {
            match self.kind(alt) {
                TypeKind::Union(inner) => flat.extend(inner.iter().copied()),
                _ => flat.push(alt),
            }
        }
        flat.sort();
        flat.dedup();
        match flat.len() {
            0 => self.void,
            1 => flat[0],
            _ => self.intern(TypeKind::Union(flat)),
        }
    }

    /// Nullable wrapper; `T??` collapses to `T?`, and nil/error stay
    /// themselves.
    pub fn nullable(&mut self, inner: TypeId) -> TypeId {
        match self.kind(inner) {
            TypeKind::Nullable(_) | TypeKind::Nil | TypeKind::Error => inner,
            _ => self.intern(TypeKind::Nullable(inner)),
        }
    }

    /// Rvalue reference wrapper.
    pub fn rvalue_ref(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKind::RvalueRef(inner))
    }

    // Built-in generic constructors.
    pub fn option(&mut self, t: TypeId) -> TypeId {
        let name = Symbol::intern("Option");
        self.generic(name, vec![t])
    }
    pub fn result(&mut self, t: TypeId, e: TypeId) -> TypeId {
        let name = Symbol::intern("Result");
        self.generic(name, vec![t, e])
    }
    pub fn future(&mut self, t: TypeId) -> TypeId {
        let name = Symbol::intern("Future");
        self.generic(name, vec![t])
    }
    pub fn channel(&mut self, t: TypeId) -> TypeId {
        let name = Symbol::intern("Channel");
        self.generic(name, vec![t])
    }
    pub fn list(&mut self, t: TypeId) -> TypeId {
        let name = Symbol::intern("list");
        self.generic(name, vec![t])
    }
    pub fn map(&mut self, k: TypeId, v: TypeId) -> TypeId {
        let name = Symbol::intern("Map");
        self.generic(name, vec![k, v])
    }
    pub fn range(&mut self) -> TypeId {
        let name = Symbol::intern("Range");
        let int = self.int;
        self.generic(name, vec![int])
    }

    /// True for `T?` and `nil`.
    pub fn is_nullable(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Nullable(_) | TypeKind::Nil)
    }

    /// `T?` → `T`; anything else unchanged.
    pub fn strip_nullable(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            TypeKind::Nullable(inner) => *inner,
            _ => id,
        }
    }

    /// Copy types never move: the primitives.
    pub fn is_copy(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Int
                | TypeKind::Float32
                | TypeKind::Float64
                | TypeKind::Bool
                | TypeKind::Nil
                | TypeKind::Void
                | TypeKind::Error
                | TypeKind::Fn(..)
        )
    }

    /// True when the type still contains free type parameters.
    pub fn contains_param(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::Param(_) => true,
            TypeKind::Generic(_, args) => args.iter().any(|&a| self.contains_param(a)),
            TypeKind::Fn(params, ret) => {
                params.iter().any(|&p| self.contains_param(p)) || self.contains_param(*ret)
            }
            TypeKind::Union(alts) => alts.iter().any(|&a| self.contains_param(a)),
            TypeKind::Nullable(inner) | TypeKind::RvalueRef(inner) => self.contains_param(*inner),
            _ => false,
        }
    }

    /// Record a class's declared base.
    pub fn register_base(&mut self, class: Symbol, base: Symbol) {
        self.bases.insert(class, base);
    }

    /// Record a trait implementation.
    pub fn register_impl(&mut self, ty: Symbol, trait_name: Symbol) {
        self.impls.insert((ty, trait_name));
    }

    /// Declared base of a class, if any.
    pub fn base_of(&self, class: Symbol) -> Option<Symbol> {
        self.bases.get(&class).copied()
    }

    /// Walks the base chain.
    pub fn is_subclass_of(&self, sub: Symbol, sup: Symbol) -> bool {
        if sub == sup {
            return true;
        }
        let mut current = sub;
        let mut fuel = 64;
        while let Some(base) = self.bases.get(&current) {
            if *base == sup {
                return true;
            }
            current = *base;
            fuel -= 1;
            if fuel == 0 {
                break;
            }
        }
        false
    }

    /// True when `ty` (or a base of it) implements `trait_name`.
    pub fn implements(&self, ty: Symbol, trait_name: Symbol) -> bool {
        let mut current = ty;
        let mut fuel = 64;
        loop {
            if self.impls.contains(&(current, trait_name)) {
                return true;
            }
            match self.bases.get(&current) {
                Some(base) => current = *base,
                None => return false,
            }
            fuel -= 1;
            if fuel == 0 {
                return false;
            }
        }
    }

    /// Apply a substitution, rewriting `Param` leaves.
    pub fn substitute(&mut self, id: TypeId, map: &FxHashMap<Symbol, TypeId>) -> TypeId {
        if map.is_empty() || !self.contains_param(id) {
            return id;
        }
        match self.kind(id).clone() {
            TypeKind::Param(name) => map.get(&name).copied().unwrap_or(id),
            TypeKind::Generic(name, args) => {
                let args = args.into_iter().map(|a| self.substitute(a, map)).collect();
                self.generic(name, args)
            }
            TypeKind::Fn(params, ret) => {
                let params = params
                    .into_iter()
                    .map(|p| self.substitute(p, map))
                    .collect();
                let ret = self.substitute(ret, map);
                self.func(params, ret)
            }
            TypeKind::Union(alts) => {
                let alts = alts.into_iter().map(|a| self.substitute(a, map)).collect();
                self.union(alts)
            }
            TypeKind::Nullable(inner) => {
                let inner = self.substitute(inner, map);
                self.nullable(inner)
            }
            TypeKind::RvalueRef(inner) => {
                let inner = self.substitute(inner, map);
                self.rvalue_ref(inner)
            }
            _ => id,
        }
    }

    /// Assignability `from → to`.
    ///
    /// Identical ids; error holes; nil into nullable; `T` into `T?`;
    /// numeric widening (`int → float64`, `float32 → float64`); union on
    /// the right (any alternative) and on the left (all alternatives);
    /// invariant-by-pairwise generic arguments; contravariant parameters
    /// and covariant returns on function types; declared inheritance and
    /// trait bounds on named types. Everything else fails.
    pub fn assignable(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        match (self.kind(from), self.kind(to)) {
            (TypeKind::Error, _) | (_, TypeKind::Error) => true,
            (TypeKind::Nullable(fi), TypeKind::Nullable(ti)) => self.assignable(*fi, *ti),
            (TypeKind::Nil, TypeKind::Nullable(_)) => true,
            (_, TypeKind::Nullable(ti)) => self.assignable(from, *ti),
            (TypeKind::Int, TypeKind::Float64) => true,
            (TypeKind::Float32, TypeKind::Float64) => true,
            (TypeKind::Union(alts), _) => alts.iter().all(|&a| self.assignable(a, to)),
            (_, TypeKind::Union(alts)) => alts.iter().any(|&a| self.assignable(from, a)),
            (TypeKind::RvalueRef(fi), _) => self.assignable(*fi, to),
            (_, TypeKind::RvalueRef(ti)) => self.assignable(from, *ti),
            (TypeKind::Generic(n1, a1), TypeKind::Generic(n2, a2)) => {
                n1 == n2
                    && a1.len() == a2.len()
                    && a1
                        .iter()
                        .zip(a2.iter())
                        .all(|(&x, &y)| self.assignable(x, y))
            }
            (TypeKind::Fn(p1, r1), TypeKind::Fn(p2, r2)) => {
                p1.len() == p2.len()
                    && p2
                        .iter()
                        .zip(p1.iter())
                        .all(|(&x, &y)| self.assignable(x, y))
                    && self.assignable(*r1, *r2)
            }
            (TypeKind::Named(a), TypeKind::Named(b)) => {
                self.is_subclass_of(*a, *b) || self.implements(*a, *b)
            }
            _ => false,
        }
    }

    /// Least common type of two types, if one exists.
    pub fn common_type(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if self.assignable(a, b) {
            Some(b)
        } else if self.assignable(b, a) {
            Some(a)
        } else {
            None
        }
    }

    /// Structural equality modulo consistent renaming of type parameters.
    pub fn equal_modulo_params(&self, a: TypeId, b: TypeId) -> bool {
        let mut map = FxHashMap::default();
        self.equal_modulo(a, b, &mut map)
    }

    fn equal_modulo(&self, a: TypeId, b: TypeId, map: &mut FxHashMap<Symbol, Symbol>) -> bool {
        if a == b {
            return true;
        }
        match (self.kind(a), self.kind(b)) {
            (TypeKind::Param(x), TypeKind::Param(y)) => match map.get(x) {
                Some(bound) => bound == y,
                None => {
                    map.insert(*x, *y);
                    true
                }
            },
            (TypeKind::Generic(n1, a1), TypeKind::Generic(n2, a2)) => {
                n1 == n2
                    && a1.len() == a2.len()
                    && a1
                        .iter()
                        .zip(a2.iter())
                        .all(|(&x, &y)| self.equal_modulo(x, y, map))
            }
            (TypeKind::Fn(p1, r1), TypeKind::Fn(p2, r2)) => {
                p1.len() == p2.len()
                    && p1
                        .iter()
                        .zip(p2.iter())
                        .all(|(&x, &y)| self.equal_modulo(x, y, map))
                    && self.equal_modulo(*r1, *r2, map)
            }
            (TypeKind::Union(u1), TypeKind::Union(u2)) => {
                u1.len() == u2.len()
                    && u1
                        .iter()
                        .zip(u2.iter())
                        .all(|(&x, &y)| self.equal_modulo(x, y, map))
            }
            (TypeKind::Nullable(x), TypeKind::Nullable(y))
            | (TypeKind::RvalueRef(x), TypeKind::RvalueRef(y)) => self.equal_modulo(*x, *y, map),
            _ => false,
        }
    }

    /// True when a value of this type is accepted where a condition is
    /// required: bool, numerics (non-zero is true), nullables and named
    /// references (non-null is true).
    pub fn truthy_convertible(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Bool
                | TypeKind::Int
                | TypeKind::Float32
                | TypeKind::Float64
                | TypeKind::Nullable(_)
                | TypeKind::Nil
                | TypeKind::Named(_)
                | TypeKind::Error
        )
    }

    /// True when interpolation can render the type.
    pub fn string_convertible(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::Void => false,
            TypeKind::Nullable(inner) => self.string_convertible(*inner),
            _ => true,
        }
    }

    /// Render a type for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Error => "<error>".to_owned(),
            TypeKind::Int => "int".to_owned(),
            TypeKind::Float32 => "float32".to_owned(),
            TypeKind::Float64 => "float64".to_owned(),
            TypeKind::Bool => "bool".to_owned(),
            TypeKind::Str => "string".to_owned(),
            TypeKind::Void => "void".to_owned(),
            TypeKind::Nil => "nil".to_owned(),
            TypeKind::Named(name) | TypeKind::Param(name) => name.as_str().to_owned(),
            TypeKind::Generic(name, args) => {
                let args: Vec<_> = args.iter().map(|&a| self.display(a)).collect();
                format!("{}<{}>", name, args.join(", "))
            }
            TypeKind::Fn(params, ret) => {
                let params: Vec<_> = params.iter().map(|&p| self.display(p)).collect();
                format!("({}) -> {}", params.join(", "), self.display(*ret))
            }
            TypeKind::Union(alts) => {
                let alts: Vec<_> = alts.iter().map(|&a| self.display(a)).collect();
                alts.join(" | ")
            }
            TypeKind::Nullable(inner) => format!("{}?", self.display(*inner)),
            TypeKind::RvalueRef(inner) => format!("{}&&", self.display(*inner)),
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TypeTable {
        TypeTable::new()
    }

    #[test]
    fn test_primitives_are_canonical() {
        let mut t = table();
        assert_eq!(t.int(), t.intern(TypeKind::Int));
        assert_eq!(t.str(), t.intern(TypeKind::Str));
    }

    #[test]
    fn test_structural_interning() {
        let mut t = table();
        let int = t.int();
        let a = t.list(int);
        let b = t.list(int);
        assert_eq!(a, b);

        let f64 = t.float64();
        let c = t.list(f64);
        assert_ne!(a, c);
    }

    #[test]
    fn test_union_normalization() {
        let mut t = table();
        let int = t.int();
        let s = t.str();
        let u1 = t.union(vec![int, s]);
        let u2 = t.union(vec![s, int, int]);
        assert_eq!(u1, u2);

        let single = t.union(vec![int]);
        assert_eq!(single, int);

        // Nested unions flatten.
        let b = t.bool();
        let nested = t.union(vec![u1, b]);
        let flat = t.union(vec![int, s, b]);
        assert_eq!(nested, flat);
    }

    #[test]
    fn test_nullable_collapse() {
        let mut t = table();
        let int = t.int();
        let n1 = t.nullable(int);
        let n2 = t.nullable(n1);
        assert_eq!(n1, n2);

        let nil = t.nil();
        assert_eq!(t.nullable(nil), nil);
    }

    #[test]
    fn test_assignable_identity_and_error() {
        let mut t = table();
        let int = t.int();
        let s = t.str();
        assert!(t.assignable(int, int));
        assert!(!t.assignable(int, s));
        assert!(t.assignable(t.error(), s));
        assert!(t.assignable(s, t.error()));
    }

    #[test]
    fn test_assignable_nullable() {
        let mut t = table();
        let int = t.int();
        let opt_int = t.nullable(int);
        // T → T? yes; nil → T? yes; T? → T no.
        assert!(t.assignable(int, opt_int));
        assert!(t.assignable(t.nil(), opt_int));
        assert!(!t.assignable(opt_int, int));
    }

    #[test]
    fn test_numeric_widening() {
        let t = table();
        assert!(t.assignable(t.int(), t.float64()));
        assert!(t.assignable(t.float32(), t.float64()));
        // Narrowing is explicit.
        assert!(!t.assignable(t.float64(), t.int()));
        assert!(!t.assignable(t.float64(), t.float32()));
        assert!(!t.assignable(t.int(), t.float32()));
    }

    #[test]
    fn test_union_assignability() {
        let mut t = table();
        let int = t.int();
        let s = t.str();
        let u = t.union(vec![int, s]);
        assert!(t.assignable(int, u));
        assert!(t.assignable(s, u));
        assert!(!t.assignable(t.bool(), u));
        // Union on the left: all alternatives must fit.
        assert!(t.assignable(u, u));
        assert!(!t.assignable(u, int));
    }

    #[test]
    fn test_generic_invariance_by_pairwise() {
        let mut t = table();
        let int = t.int();
        let f = t.float64();
        let li = t.list(int);
        let lf = t.list(f);
        assert!(t.assignable(li, li));
        // int → float64 widens, so list<int> → list<float64> by the
        // pairwise rule.
        assert!(t.assignable(li, lf));
        assert!(!t.assignable(lf, li));
    }

    #[test]
    fn test_function_variance() {
        let mut t = table();
        let int = t.int();
        let f64 = t.float64();
        // (float64) -> int  assignable to  (int) -> float64:
        // parameters contravariant, return covariant.
        let from = t.func(vec![f64], int);
        let to = t.func(vec![int], f64);
        assert!(t.assignable(from, to));
        assert!(!t.assignable(to, from));
    }

    #[test]
    fn test_inheritance_and_traits() {
        let mut t = table();
        let dog = Symbol::intern("Dog");
        let animal = Symbol::intern("Animal");
        let pet = Symbol::intern("Pet");
        t.register_base(dog, animal);
        t.register_impl(dog, pet);

        let dog_t = t.named(dog);
        let animal_t = t.named(animal);
        let pet_t = t.named(pet);
        assert!(t.assignable(dog_t, animal_t));
        assert!(t.assignable(dog_t, pet_t));
        assert!(!t.assignable(animal_t, dog_t));
    }

    #[test]
    fn test_substitution() {
        let mut t = table();
        let p = t.param(Symbol::intern("T"));
        let list_p = t.list(p);
        let opt = t.option(list_p);

        let mut map = FxHashMap::default();
        map.insert(Symbol::intern("T"), t.int());
        let result = t.substitute(opt, &map);

        let int = t.int();
        let list_int = t.list(int);
        let expected = t.option(list_int);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_substitution_idempotent_on_closed_types() {
        let mut t = table();
        let int = t.int();
        let closed = t.list(int);
        let mut map = FxHashMap::default();
        map.insert(Symbol::intern("T"), t.str());
        assert_eq!(t.substitute(closed, &map), closed);
        let once = t.substitute(closed, &map);
        assert_eq!(t.substitute(once, &map), once);
    }

    #[test]
    fn test_equal_modulo_params() {
        let mut t = table();
        let p1 = t.param(Symbol::intern("T"));
        let p2 = t.param(Symbol::intern("U"));
        let f1 = t.func(vec![p1], p1);
        let f2 = t.func(vec![p2], p2);
        assert!(t.equal_modulo_params(f1, f2));

        // Inconsistent renaming fails: (T, T) vs (U, V).
        let p3 = t.param(Symbol::intern("V"));
        let g1 = t.func(vec![p1, p1], t.void());
        let g2 = t.func(vec![p2, p3], t.void());
        assert!(!t.equal_modulo_params(g1, g2));
    }

    #[test]
    fn test_display() {
        let mut t = table();
        let int = t.int();
        let li = t.list(int);
        assert_eq!(t.display(li), "list<int>");
        let n = t.nullable(int);
        assert_eq!(t.display(n), "int?");
        let f = t.func(vec![int], t.bool());
        assert_eq!(t.display(f), "(int) -> bool");
    }

    #[test]
    fn test_is_copy() {
        let mut t = table();
        assert!(t.is_copy(t.int()));
        assert!(t.is_copy(t.bool()));
        assert!(!t.is_copy(t.str()));
        let named = t.named(Symbol::intern("Point"));
        assert!(!t.is_copy(named));
    }
}
