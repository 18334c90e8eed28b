//! Monomorphization bookkeeping.
//!
//! Generic declarations are never lowered eagerly: each unique
//! instantiation (declaration plus tuple of canonical type-argument
//! handles) produces one specialized function or struct. The cache is
//! keyed structurally; the mangled name is a pure projection of the key
//! used only for IR emission.

use sablec_sem::{TypeKind, TypeTable};
use sablec_util::{FxHashMap, Symbol};
use sablec_sem::TypeId;

/// What a queued instantiation specializes.
#[derive(Clone, Debug)]
pub enum MonoKind {
    /// A generic free function (or extension) by key.
    Func(Symbol),
    /// A method of a generic class: (class key, method name).
    Method(Symbol, Symbol),
}

/// One pending instantiation.
#[derive(Clone, Debug)]
pub struct MonoItem {
    pub kind: MonoKind,
    pub type_args: Vec<TypeId>,
    pub mangled: Symbol,
}

/// Structural instantiation cache plus the work queue of specializations
/// still to lower.
#[derive(Default)]
pub struct MonoCache {
    done: FxHashMap<(Symbol, Vec<TypeId>), Symbol>,
    pub queue: Vec<MonoItem>,
}

impl MonoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the instantiation of a generic function; returns the
    /// specialized name, enqueueing the lowering work the first time a
    /// given (declaration, type-argument tuple) pair is seen.
    pub fn instantiate_func(
        &mut self,
        types: &TypeTable,
        key: Symbol,
        type_args: &[TypeId],
    ) -> Symbol {
        let cache_key = (key, type_args.to_vec());
        if let Some(&mangled) = self.done.get(&cache_key) {
            return mangled;
        }
        let mangled = Symbol::intern(&mangle(types, key, type_args));
        self.done.insert(cache_key, mangled);
        self.queue.push(MonoItem {
            kind: MonoKind::Func(key),
            type_args: type_args.to_vec(),
            mangled,
        });
        mangled
    }

    /// Request the instantiation of a generic class's method.
    pub fn instantiate_method(
        &mut self,
        types: &TypeTable,
        class: Symbol,
        method: Symbol,
        type_args: &[TypeId],
    ) -> Symbol {
        let decl = Symbol::intern(&format!("{}::{}", class, method));
        let cache_key = (decl, type_args.to_vec());
        if let Some(&mangled) = self.done.get(&cache_key) {
            return mangled;
        }
        let class_mangled = mangle(types, class, type_args);
        let mangled = Symbol::intern(&format!("{}{}", class_mangled, method));
        self.done.insert(cache_key, mangled);
        self.queue.push(MonoItem {
            kind: MonoKind::Method(class, method),
            type_args: type_args.to_vec(),
            mangled,
        });
        mangled
    }

    /// Register an instantiation that needs no lowering work (layout-only
    /// specialization, e.g. a generic enum). Returns the mangled name.
    pub fn layout_name(&mut self, types: &TypeTable, key: Symbol, type_args: &[TypeId]) -> Symbol {
        let cache_key = (key, type_args.to_vec());
        if let Some(&mangled) = self.done.get(&cache_key) {
            return mangled;
        }
        let mangled = Symbol::intern(&mangle(types, key, type_args));
        self.done.insert(cache_key, mangled);
        mangled
    }
}

/// Stable mangled name: `base_arg1_arg2_`. A non-generic base is left
/// untouched.
pub fn mangle(types: &TypeTable, base: Symbol, type_args: &[TypeId]) -> String {
    let base = sanitize(base.as_str());
    if type_args.is_empty() {
        return base;
    }
    let mut out = base;
    for &arg in type_args {
        out.push('_');
        out.push_str(&mangle_type(types, arg));
    }
    out.push('_');
    out
}

fn sanitize(name: &str) -> String {
    name.replace("::", "_").replace('.', "_")
}

fn mangle_type(types: &TypeTable, ty: TypeId) -> String {
    match types.kind(ty) {
        TypeKind::Error => "err".to_owned(),
        TypeKind::Int => "int".to_owned(),
        TypeKind::Float32 => "float32".to_owned(),
        TypeKind::Float64 => "float64".to_owned(),
        TypeKind::Bool => "bool".to_owned(),
        TypeKind::Str => "string".to_owned(),
        TypeKind::Void => "void".to_owned(),
        TypeKind::Nil => "nil".to_owned(),
        TypeKind::Named(name) | TypeKind::Param(name) => sanitize(name.as_str()),
        TypeKind::Generic(name, args) => {
            let mut out = sanitize(name.as_str());
            for &arg in args {
                out.push('_');
                out.push_str(&mangle_type(types, arg));
            }
            out
        }
        TypeKind::Fn(..) => "fn".to_owned(),
        TypeKind::Union(_) => "union".to_owned(),
        TypeKind::Nullable(inner) => format!("opt_{}", mangle_type(types, *inner)),
        TypeKind::RvalueRef(inner) => mangle_type(types, *inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_shapes() {
        let mut types = TypeTable::new();
        let int = types.int();
        let s = types.str();
        assert_eq!(mangle(&types, Symbol::intern("id"), &[int]), "id_int_");
        assert_eq!(mangle(&types, Symbol::intern("id"), &[s]), "id_string_");
        assert_eq!(mangle(&types, Symbol::intern("plain"), &[]), "plain");

        let li = types.list(int);
        assert_eq!(
            mangle(&types, Symbol::intern("sum"), &[li]),
            "sum_list_int_"
        );
    }

    #[test]
    fn test_identical_tuples_share_one_instantiation() {
        let mut types = TypeTable::new();
        let int = types.int();
        let mut cache = MonoCache::new();
        let a = cache.instantiate_func(&types, Symbol::intern("id"), &[int]);
        let b = cache.instantiate_func(&types, Symbol::intern("id"), &[int]);
        assert_eq!(a, b);
        assert_eq!(cache.queue.len(), 1);

        let s = types.str();
        let c = cache.instantiate_func(&types, Symbol::intern("id"), &[s]);
        assert_ne!(a, c);
        assert_eq!(cache.queue.len(), 2);
    }

    #[test]
    fn test_structural_key_not_string_key() {
        // Two structurally equal arguments interned separately still hit
        // the same cache entry because TypeIds are canonical.
        let mut types = TypeTable::new();
        let int = types.int();
        let l1 = types.list(int);
        let l2 = types.list(int);
        assert_eq!(l1, l2);
        let mut cache = MonoCache::new();
        cache.instantiate_func(&types, Symbol::intern("f"), &[l1]);
        cache.instantiate_func(&types, Symbol::intern("f"), &[l2]);
        assert_eq!(cache.queue.len(), 1);
    }
}
