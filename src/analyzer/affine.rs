//! Affine index decomposition (§4.B "Affine index decomposition").
//!
//! Reduces one raw index expression against one array axis to either a
//! single-symbol affine form (range + index symbol) or an entangled pair.

use crate::core::error::CompileError;
use crate::core::expr::RawIndex;
use crate::core::store::RangeExpr;
use crate::core::symbol::Sym;

/// The result of decomposing one index position.
#[derive(Debug, Clone)]
pub enum Decomposed {
    /// A constant position: contributes no index, no range.
    Constant,
    /// A single free index, with the range it implies against the axis it
    /// was found on (already shift/scale-adjusted).
    Single { index: Sym, range: RangeExpr, shifted: bool },
    /// Two indices entangled by addition (`i + j`), range tied to the
    /// containing axis for both, unresolved individually.
    Pair { i: Sym, j: Sym, range: RangeExpr },
}

/// Decompose `expr`, which indexes position `position` of `array`.
///
/// # Errors
/// Returns [`CompileError::UnsupportedAffine`] for any shape besides the
/// ones enumerated in §4.B (bare symbol, `i+c`, `c+i`, `a*i+c`, `i+j`,
/// integer literal).
pub fn decompose(expr: &RawIndex, array: Sym, position: usize) -> Result<Decomposed, CompileError> {
    let axis = RangeExpr::AxisOf { array, position };
    decompose_against(expr, axis)
}

fn decompose_against(expr: &RawIndex, axis: RangeExpr) -> Result<Decomposed, CompileError> {
    match expr {
        RawIndex::Int(_) => Ok(Decomposed::Constant),
        RawIndex::Symbol(sym) => Ok(Decomposed::Single { index: *sym, range: axis, shifted: false }),
        RawIndex::Add(lhs, rhs) => decompose_add(lhs, rhs, axis),
        RawIndex::Mul(lhs, rhs) => decompose_scale(lhs, rhs, axis),
        RawIndex::Neg(_) => Err(unsupported(expr)),
    }
}

fn as_constant(expr: &RawIndex) -> Option<i64> {
    match expr {
        RawIndex::Int(n) => Some(*n),
        RawIndex::Neg(inner) => as_constant(inner).map(|n| -n),
        _ => None,
    }
}

fn as_bare_symbol(expr: &RawIndex) -> Option<Sym> {
    match expr {
        RawIndex::Symbol(s) => Some(*s),
        _ => None,
    }
}

fn decompose_add(lhs: &RawIndex, rhs: &RawIndex, axis: RangeExpr) -> Result<Decomposed, CompileError> {
    if let Some(c) = as_constant(rhs) {
        return finish_shift(lhs, c, axis);
    }
    if let Some(c) = as_constant(lhs) {
        return finish_shift(rhs, c, axis);
    }
    // Neither side is a bare constant: either both are (affinely) bare
    // symbols (entangled pair), or one side is itself a scaled symbol.
    if let (Some(i), Some(j)) = (as_bare_symbol(lhs), as_bare_symbol(rhs)) {
        return Ok(Decomposed::Pair { i, j, range: axis });
    }
    Err(unsupported(&RawIndex::Add(Box::new(lhs.clone()), Box::new(rhs.clone()))))
}

fn finish_shift(base: &RawIndex, offset: i64, axis: RangeExpr) -> Result<Decomposed, CompileError> {
    match base {
        RawIndex::Symbol(sym) => Ok(Decomposed::Single {
            index: *sym,
            range: RangeExpr::Shifted { base: Box::new(axis), offset },
            shifted: true,
        }),
        RawIndex::Mul(lhs, rhs) => {
            let scaled = decompose_scale(lhs, rhs, axis)?;
            match scaled {
                Decomposed::Single { index, range, .. } => {
                    Ok(Decomposed::Single { index, range: RangeExpr::Shifted { base: Box::new(range), offset }, shifted: true })
                }
                other => Ok(other),
            }
        }
        _ => Err(unsupported(base)),
    }
}

fn decompose_scale(lhs: &RawIndex, rhs: &RawIndex, axis: RangeExpr) -> Result<Decomposed, CompileError> {
    if let (Some(factor), Some(sym)) = (as_constant(lhs), as_bare_symbol(rhs)) {
        return Ok(Decomposed::Single {
            index: sym,
            range: RangeExpr::Scaled { base: Box::new(axis), factor },
            shifted: true,
        });
    }
    if let (Some(sym), Some(factor)) = (as_bare_symbol(lhs), as_constant(rhs)) {
        return Ok(Decomposed::Single {
            index: sym,
            range: RangeExpr::Scaled { base: Box::new(axis), factor },
            shifted: true,
        });
    }
    Err(unsupported(&RawIndex::Mul(Box::new(lhs.clone()), Box::new(rhs.clone()))))
}

fn unsupported(expr: &RawIndex) -> CompileError {
    CompileError::UnsupportedAffine { text: format!("{expr:?}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symbol::SymbolTable;

    #[test]
    fn bare_symbol_is_unshifted() {
        let mut t = SymbolTable::new();
        let i = t.intern("i");
        let a = t.intern("A");
        let d = decompose(&RawIndex::Symbol(i), a, 0).expect("decompose");
        match d {
            Decomposed::Single { shifted, .. } => assert!(!shifted),
            _ => unreachable!("expected Single"),
        }
    }

    #[test]
    fn shift_by_constant_is_shifted() {
        let mut t = SymbolTable::new();
        let i = t.intern("i");
        let a = t.intern("A");
        let expr = RawIndex::Add(Box::new(RawIndex::Symbol(i)), Box::new(RawIndex::Int(1)));
        let d = decompose(&expr, a, 0).expect("decompose");
        match d {
            Decomposed::Single { shifted, range, .. } => {
                assert!(shifted);
                assert!(matches!(range, RangeExpr::Shifted { .. }));
            }
            _ => unreachable!("expected Single"),
        }
    }

    #[test]
    fn entangled_pair_detected() {
        let mut t = SymbolTable::new();
        let i = t.intern("i");
        let j = t.intern("j");
        let a = t.intern("A");
        let expr = RawIndex::Add(Box::new(RawIndex::Symbol(i)), Box::new(RawIndex::Symbol(j)));
        let d = decompose(&expr, a, 0).expect("decompose");
        assert!(matches!(d, Decomposed::Pair { .. }));
    }

    #[test]
    fn integer_literal_is_constant() {
        let mut t = SymbolTable::new();
        let a = t.intern("A");
        let d = decompose(&RawIndex::Int(3), a, 0).expect("decompose");
        assert!(matches!(d, Decomposed::Constant));
    }
}
