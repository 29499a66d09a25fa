//! Scoped name resolution and storage allocation.
//!
//! One flat address space backs every procedure and every temporary. The
//! bump offset is shared across all scopes and only ever grows: nothing is
//! reclaimed when a scope or a temporary's lifetime ends. That trades memory
//! for the absence of address-collision bugs.

use rustc_hash::FxHashMap;

use crate::ast::Name;
use crate::error::CodegenError;

/// Storage record for one declared name.
///
/// A scalar occupies one cell. An array occupies `end - start + 1` cells
/// starting at `address`. A parameter occupies one cell holding the caller
/// supplied address, regardless of scalar/array kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub address: u64,
    pub is_array: bool,
    pub array_start: u64,
    pub array_end: u64,
    pub is_param: bool,
    pub is_iterator: bool,
    pub is_initialized: bool,
}

impl Symbol {
    fn scalar(address: u64) -> Self {
        Self {
            address,
            is_array: false,
            array_start: 0,
            array_end: 0,
            is_param: false,
            is_iterator: false,
            is_initialized: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<FxHashMap<String, Symbol>>,
    next_offset: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
            next_offset: 0,
        }
    }

    /// Pushes a scope frame. Paired with [`exit_scope`](Self::exit_scope)
    /// around every procedure body and the main body.
    pub fn enter_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    pub fn exit_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop the outermost scope");
        self.scopes.pop();
    }

    fn innermost(&mut self) -> &mut FxHashMap<String, Symbol> {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
    }

    fn check_free(&mut self, name: &Name) -> Result<(), CodegenError> {
        if self.innermost().contains_key(&name.text) {
            return Err(CodegenError::DuplicateDeclaration {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(())
    }

    /// Allocates one cell and registers a scalar in the innermost scope.
    pub fn declare_variable(&mut self, name: &Name) -> Result<Symbol, CodegenError> {
        self.check_free(name)?;
        let symbol = Symbol::scalar(self.bump(1));
        self.innermost().insert(name.text.clone(), symbol);
        Ok(symbol)
    }

    /// Like [`declare_variable`](Self::declare_variable) but the new symbol
    /// is born carrying the iterator flag.
    pub fn declare_iterator(&mut self, name: &Name) -> Result<Symbol, CodegenError> {
        self.check_free(name)?;
        let symbol = Symbol {
            is_iterator: true,
            ..Symbol::scalar(self.bump(1))
        };
        self.innermost().insert(name.text.clone(), symbol);
        Ok(symbol)
    }

    /// Allocates `end - start + 1` contiguous cells; logical index `i` maps
    /// to physical address `base + (i - start)`.
    pub fn declare_array(
        &mut self,
        name: &Name,
        start: u64,
        end: u64,
    ) -> Result<Symbol, CodegenError> {
        self.check_free(name)?;
        if start > end {
            return Err(CodegenError::InvalidArrayRange {
                name: name.text.clone(),
                start,
                end,
                span: name.span,
            });
        }
        let symbol = Symbol {
            is_array: true,
            array_start: start,
            array_end: end,
            ..Symbol::scalar(self.bump(end - start + 1))
        };
        self.innermost().insert(name.text.clone(), symbol);
        Ok(symbol)
    }

    /// Allocates exactly one pointer cell for a parameter, array or not.
    pub fn declare_param(&mut self, name: &Name, is_array: bool) -> Result<Symbol, CodegenError> {
        self.check_free(name)?;
        let symbol = Symbol {
            is_param: true,
            is_array,
            ..Symbol::scalar(self.bump(1))
        };
        self.innermost().insert(name.text.clone(), symbol);
        Ok(symbol)
    }

    /// Scans scopes innermost to outermost, so inner declarations shadow
    /// outer ones.
    pub fn lookup(&self, name: &Name) -> Result<Symbol, CodegenError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name.text))
            .copied()
            .ok_or_else(|| CodegenError::UndeclaredVariable {
                name: name.text.clone(),
                span: name.span,
            })
    }

    /// A fresh, never reused cell for an intermediate value.
    pub fn allocate_temp(&mut self) -> u64 {
        self.bump(1)
    }

    /// Flips the iterator flag on the nearest visible binding of `name` and
    /// returns the previous value, so nested loops over the same name can
    /// restore it.
    pub fn set_iterator(&mut self, name: &str, flag: bool) -> bool {
        let symbol = self
            .find_mut(name)
            .expect("iterator flag is only set on resolved names");
        std::mem::replace(&mut symbol.is_iterator, flag)
    }

    /// Records a first write; feeds diagnostics only, nothing is enforced
    /// at run time.
    pub fn mark_initialized(&mut self, name: &str) {
        if let Some(symbol) = self.find_mut(name) {
            symbol.is_initialized = true;
        }
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    fn bump(&mut self, cells: u64) -> u64 {
        let base = self.next_offset;
        self.next_offset += cells;
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SourceId, Span};

    fn name(text: &str) -> Name {
        Name {
            text: text.to_string(),
            span: Span::top(SourceId(0)),
        }
    }

    #[test]
    fn allocates_cells_monotonically() {
        let mut table = SymbolTable::new();
        let x = table.declare_variable(&name("x")).expect("declare");
        let tab = table.declare_array(&name("tab"), 5, 9).expect("declare");
        let y = table.declare_variable(&name("y")).expect("declare");
        assert_eq!(x.address, 0);
        assert_eq!(tab.address, 1);
        assert_eq!(y.address, 6);
        assert_eq!(table.allocate_temp(), 7);
        assert_eq!(table.allocate_temp(), 8);
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut table = SymbolTable::new();
        table.declare_variable(&name("x")).expect("declare");
        let err = table.declare_variable(&name("x")).expect_err("must fail");
        assert!(matches!(err, CodegenError::DuplicateDeclaration { .. }));
    }

    #[test]
    fn inner_scope_shadows_and_duplicate_check_is_per_scope() {
        let mut table = SymbolTable::new();
        let outer = table.declare_variable(&name("x")).expect("declare");
        table.enter_scope();
        // Same name again is fine in a fresh scope, and shadows the outer one.
        let inner = table.declare_variable(&name("x")).expect("declare");
        assert_ne!(outer.address, inner.address);
        assert_eq!(table.lookup(&name("x")).expect("lookup"), inner);
        table.exit_scope();
        assert_eq!(table.lookup(&name("x")).expect("lookup"), outer);
    }

    #[test]
    fn lookup_reaches_enclosing_scopes() {
        let mut table = SymbolTable::new();
        let x = table.declare_variable(&name("x")).expect("declare");
        table.enter_scope();
        assert_eq!(table.lookup(&name("x")).expect("lookup"), x);
    }

    #[test]
    fn names_vanish_when_their_scope_exits() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.declare_variable(&name("local")).expect("declare");
        table.exit_scope();
        let err = table.lookup(&name("local")).expect_err("must fail");
        assert!(matches!(err, CodegenError::UndeclaredVariable { .. }));
    }

    #[test]
    fn array_range_must_not_be_inverted() {
        let mut table = SymbolTable::new();
        let err = table
            .declare_array(&name("tab"), 10, 5)
            .expect_err("must fail");
        assert!(matches!(err, CodegenError::InvalidArrayRange { .. }));
        // A single-cell range is the boundary case and is fine.
        table.declare_array(&name("one"), 7, 7).expect("declare");
    }

    #[test]
    fn params_take_one_pointer_cell_regardless_of_kind() {
        let mut table = SymbolTable::new();
        let tab = table.declare_param(&name("tab"), true).expect("declare");
        let n = table.declare_param(&name("n"), false).expect("declare");
        assert!(tab.is_param && tab.is_array);
        assert!(n.is_param && !n.is_array);
        assert_eq!(n.address, tab.address + 1);
    }

    #[test]
    fn iterator_flag_can_be_saved_and_restored() {
        let mut table = SymbolTable::new();
        table.declare_variable(&name("i")).expect("declare");
        assert!(!table.set_iterator("i", true));
        assert!(table.set_iterator("i", true));
        assert!(table.set_iterator("i", false));
        assert!(!table.lookup(&name("i")).expect("lookup").is_iterator);
    }

    #[test]
    fn scope_exit_never_rewinds_the_allocator() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.declare_variable(&name("a")).expect("declare");
        table.declare_variable(&name("b")).expect("declare");
        table.exit_scope();
        assert_eq!(table.allocate_temp(), 2);
    }
}
