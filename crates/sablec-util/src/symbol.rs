//! String interning.
//!
//! Identifiers, keywords, string literal values, and filenames are repeated
//! constantly through a compilation. Interning stores one copy of each
//! distinct string in a process-global table and hands out 4-byte [`Symbol`]
//! handles, so equality is an integer comparison and a token stays `Copy`.
//!
//! Interned strings are never freed: the set of distinct strings in a
//! program is bounded, and leak-on-purpose storage is what lets `as_str`
//! return `&'static str`.

use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// An interned string.
///
/// Two symbols are equal exactly when their strings are equal.
///
/// # Examples
///
/// ```
/// use sablec_util::Symbol;
///
/// let a = Symbol::intern("main");
/// let b = Symbol::intern("main");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "main");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

struct Interner {
    strings: Vec<&'static str>,
    lookup: FxHashMap<&'static str, u32>,
}

fn interner() -> &'static RwLock<Interner> {
    static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        RwLock::new(Interner {
            strings: Vec::new(),
            lookup: FxHashMap::default(),
        })
    })
}

impl Symbol {
    /// Intern a string, returning its symbol.
    ///
    /// Thread-safe; repeated interning of the same string returns the same
    /// symbol.
    pub fn intern(string: &str) -> Symbol {
        {
            let table = interner().read();
            if let Some(&index) = table.lookup.get(string) {
                return Symbol(index);
            }
        }

        let mut table = interner().write();
        // Re-check under the write lock: another thread may have interned
        // the string between the two lock acquisitions.
        if let Some(&index) = table.lookup.get(string) {
            return Symbol(index);
        }

        let stored: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let index = table.strings.len() as u32;
        table.strings.push(stored);
        table.lookup.insert(stored, index);
        Symbol(index)
    }

    /// The interned string.
    pub fn as_str(self) -> &'static str {
        interner().read().strings[self.0 as usize]
    }

    /// The raw table index.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// An empty-string symbol, used for synthetic tokens.
    pub fn empty() -> Symbol {
        Symbol::intern("")
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_string_same_symbol() {
        let a = Symbol::intern("hello");
        let b = Symbol::intern("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_strings_different_symbols() {
        let a = Symbol::intern("alpha");
        let b = Symbol::intern("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn test_as_str_round_trip() {
        let s = Symbol::intern("round_trip");
        assert_eq!(s.as_str(), "round_trip");
    }

    #[test]
    fn test_empty_string() {
        let e = Symbol::empty();
        assert_eq!(e.as_str(), "");
        assert_eq!(e, Symbol::intern(""));
    }

    #[test]
    fn test_display() {
        let s = Symbol::intern("display_me");
        assert_eq!(format!("{}", s), "display_me");
    }
}
