//! Scoped interning for index and array names.
//!
//! Unlike a process-global symbol table, a [`SymbolTable`] is owned by a
//! single [`crate::core::store::Store`] and dropped with it — per §3 and §6
//! of the specification there is no persisted state beyond the option
//! defaults, so interning lives and dies with one `compile` call.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use std::sync::Arc;

new_key_type! {
    /// An interned name, cheap to copy and compare (key-equality only).
    pub struct Sym;
}

/// Arena mapping names to [`Sym`] keys for the lifetime of one analysis.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: SlotMap<Sym, Arc<str>>,
    by_name: FxHashMap<Arc<str>, Sym>,
}

impl SymbolTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing symbol if already present.
    pub fn intern(&mut self, name: &str) -> Sym {
        if let Some(sym) = self.by_name.get(name) {
            return *sym;
        }
        let arc: Arc<str> = Arc::from(name);
        let sym = self.names.insert(arc.clone());
        self.by_name.insert(arc, sym);
        sym
    }

    /// Look up the textual name behind a symbol.
    ///
    /// # Panics
    /// Panics if `sym` was not interned by this table.
    #[must_use]
    pub fn name(&self, sym: Sym) -> &str {
        &self.names[sym]
    }

    /// Number of distinct interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table has no interned names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("i");
        let b = table.intern("i");
        let c = table.intern("j");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.name(a), "i");
        assert_eq!(table.name(c), "j");
    }
}
