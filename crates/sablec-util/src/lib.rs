//! sablec-util - Core Utilities and Foundation Types
//!
//! This crate provides the foundation types shared by every phase of the
//! Sable compiler:
//!
//! - [`Symbol`]: interned strings with O(1) equality, used for identifiers,
//!   keywords, string literal values, and filenames. Interned strings live
//!   for the process lifetime.
//! - [`Pos`]: source positions (interned filename, line, column) that flow
//!   from the lexer through the AST into diagnostics.
//! - [`Reporter`]: the thread-safe diagnostic accumulator with stable,
//!   coded, severity-graded diagnostics.
//! - [`IndexVec`] and the [`define_idx!`] macro: typed index spaces so that
//!   expression IDs, block IDs, and value IDs cannot be mixed up.
//!
//! These utilities are zero-cost abstractions: a `Symbol` is a `u32`, a
//! typed index compiles to the same code as a raw integer, and `Pos` is
//! `Copy`.

mod index_vec;
mod pos;
mod symbol;

pub mod diagnostic;

pub use diagnostic::{Diagnostic, ReportCode, Reporter, Severity};
pub use index_vec::{Idx, IndexVec};
pub use pos::Pos;
pub use symbol::Symbol;

// Re-export the hashing types used throughout the compiler so downstream
// crates agree on one hasher.
pub use rustc_hash::{FxHashMap, FxHashSet};
