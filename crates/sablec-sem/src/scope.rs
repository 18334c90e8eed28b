//! Lexical scopes.
//!
//! Scopes form a stack of frames; `resolve` walks outward. Each binding
//! carries its kind, type, and mutability. Move/borrow state is not
//! tracked here: the ownership pass (see [`crate::ownership`]) keeps its
//! own per-binding records as it walks the checked AST.

use sablec_util::{FxHashMap, Pos, Symbol};

use crate::types::TypeId;

/// What a name is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Variable,
    Function,
    Class,
    Enum,
    Trait,
    Module,
    TypeParam,
}

/// One scope entry.
#[derive(Clone, Debug)]
pub struct Binding {
    pub kind: BindingKind,
    pub ty: TypeId,
    pub mutable: bool,
    pub pos: Pos,
}

/// A stack of scope frames.
pub struct ScopeStack {
    frames: Vec<FxHashMap<Symbol, Binding>>,
}

impl ScopeStack {
    /// Create a stack with one (global) frame.
    pub fn new() -> Self {
        Self {
            frames: vec![FxHashMap::default()],
        }
    }

    /// Enter a new frame.
    pub fn push(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    /// Exit the innermost frame, returning its bindings for drop
    /// processing.
    pub fn pop(&mut self) -> FxHashMap<Symbol, Binding> {
        debug_assert!(self.frames.len() > 1, "cannot pop the global frame");
        self.frames.pop().unwrap_or_default()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Declare in the innermost frame. On duplicate, returns the position
    /// of the previous declaration.
    pub fn declare(&mut self, name: Symbol, binding: Binding) -> Result<(), Pos> {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        if let Some(existing) = frame.get(&name) {
            return Err(existing.pos);
        }
        frame.insert(name, binding);
        Ok(())
    }

    /// Resolve a name, walking frames outward.
    pub fn resolve(&self, name: Symbol) -> Option<&Binding> {
        self.frames.iter().rev().find_map(|f| f.get(&name))
    }

    /// Mutable resolve, walking frames outward.
    pub fn resolve_mut(&mut self, name: Symbol) -> Option<&mut Binding> {
        self.frames.iter_mut().rev().find_map(|f| f.get_mut(&name))
    }

    /// True when the innermost frame already declares `name`.
    pub fn declared_in_current(&self, name: Symbol) -> bool {
        self.frames
            .last()
            .map(|f| f.contains_key(&name))
            .unwrap_or(false)
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTable;

    fn binding(ty: TypeId, mutable: bool) -> Binding {
        Binding {
            kind: BindingKind::Variable,
            ty,
            mutable,
            pos: Pos::dummy(),
        }
    }

    #[test]
    fn test_declare_and_resolve() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let x = Symbol::intern("x");
        scopes.declare(x, binding(t.int(), true)).unwrap();
        assert!(scopes.resolve(x).is_some());
        assert!(scopes.resolve(Symbol::intern("y")).is_none());
    }

    #[test]
    fn test_duplicate_in_same_frame() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let x = Symbol::intern("dup");
        scopes.declare(x, binding(t.int(), true)).unwrap();
        assert!(scopes.declare(x, binding(t.int(), true)).is_err());
    }

    #[test]
    fn test_shadowing_in_inner_frame() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let x = Symbol::intern("shadowed");
        scopes.declare(x, binding(t.int(), true)).unwrap();
        scopes.push();
        scopes.declare(x, binding(t.str(), true)).unwrap();
        assert_eq!(scopes.resolve(x).unwrap().ty, t.str());
        scopes.pop();
        assert_eq!(scopes.resolve(x).unwrap().ty, t.int());
    }

    #[test]
    fn test_lookup_walks_outward() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let outer = Symbol::intern("outer_var");
        scopes.declare(outer, binding(t.bool(), false)).unwrap();
        scopes.push();
        scopes.push();
        assert!(scopes.resolve(outer).is_some());
        assert!(!scopes.declared_in_current(outer));
    }

    #[test]
    fn test_duplicate_reports_previous_position() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let x = Symbol::intern("previous_pos");
        let first = Binding {
            kind: BindingKind::Variable,
            ty: t.int(),
            mutable: true,
            pos: Pos::new(Symbol::intern("a.sbl"), 3, 7),
        };
        scopes.declare(x, first).unwrap();
        let prev = scopes.declare(x, binding(t.int(), true)).unwrap_err();
        assert_eq!(prev.line, 3);
        assert_eq!(prev.column, 7);
    }

    #[test]
    fn test_resolve_mut_updates_binding() {
        let t = TypeTable::new();
        let mut scopes = ScopeStack::new();
        let x = Symbol::intern("refined");
        scopes.declare(x, binding(t.int(), true)).unwrap();
        scopes.resolve_mut(x).unwrap().ty = t.str();
        assert_eq!(scopes.resolve(x).unwrap().ty, t.str());
    }
}
