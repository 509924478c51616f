//! RHS canonicalization (§4.B "RHS canonicalization"): walks the parsed
//! expression tree bottom-up, interning names into the [`Store`]'s symbol
//! table and performing rewrites 3, 5, 6, 7 from the numbered list.
//!
//! Rewrites 1, 2, and 4 (subfield/nested-index detection, structural
//! suppression, and prime-folding) have no counterpart here: this crate's
//! grammar (§B′) has no subfield access, no nested `[...][...]` chaining,
//! no comparison/tuple/broadcast-dot syntax, and folds primes during
//! lexing — so the constructs those rewrites guard against cannot be
//! parsed in the first place, and the `noavx`/`nograd` flags they'd raise
//! are simply never reachable through this entry point.

use crate::core::store::IndexSet;
use crate::core::symbol::Sym;
use super::affine::{self, Decomposed};
use crate::core::error::CompileError;
use crate::core::expr::{Expr, RawIndex};
use crate::core::store::{PairConstraint, Store};
use crate::functions;
use crate::parser::ast::{PExpr, PIndex};
use rustc_hash::FxHashMap;

/// Per-array index sets gathered while canonicalizing, used afterward to
/// compute `sharedind` (§3 `sharedind`: "intersection of index sets across
/// all RHS arrays").
pub type PerArrayIndices = FxHashMap<Sym, IndexSet>;

/// Canonicalize `rhs` into a [`Expr`] tree, threading every array/scalar
/// reference and index constraint it implies into `store`, and returning
/// the per-array index sets needed to compute `sharedind`.
///
/// `ranks` gives the rank of every array name the caller has bound; an
/// array referenced in `rhs` but absent from `ranks` is reported as
/// unsupported, since the RHS can only be analyzed against concrete shapes.
///
/// # Errors
/// See §7: unknown function, wrong arity, rank mismatch, unsupported
/// affine index form, unbound array name.
pub fn canonicalize_rhs(
    store: &mut Store,
    rhs: &PExpr,
    ranks: &FxHashMap<String, usize>,
) -> Result<(Expr, PerArrayIndices), CompileError> {
    let mut per_array = PerArrayIndices::default();
    let expr = convert(store, rhs, ranks, &mut per_array)?;
    Ok((expr, per_array))
}

fn convert(
    store: &mut Store,
    expr: &PExpr,
    ranks: &FxHashMap<String, usize>,
    per_array: &mut PerArrayIndices,
) -> Result<Expr, CompileError> {
    match expr {
        PExpr::Number(n) => Ok(Expr::number(*n)),
        PExpr::Ident(name) | PExpr::Scalar(name) => {
            let sym = store.symbols.intern(name);
            store.scalars.insert(sym);
            Ok(Expr::scalar(sym))
        }
        PExpr::Array { name, indices } => convert_array(store, name, indices, ranks, per_array),
        PExpr::Neg(inner) => Ok(convert(store, inner, ranks, per_array)?.negate()),
        PExpr::Sum(terms) => {
            store.cost += terms.len().saturating_sub(1) as u64;
            let converted =
                terms.iter().map(|t| convert(store, t, ranks, per_array)).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::sum(converted))
        }
        PExpr::Product(factors) => {
            store.cost += 2 * factors.len().saturating_sub(1) as u64;
            let converted =
                factors.iter().map(|f| convert(store, f, ranks, per_array)).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::product(converted))
        }
        PExpr::Div(a, b) => {
            store.cost += 3;
            Ok(Expr::div(convert(store, a, ranks, per_array)?, convert(store, b, ranks, per_array)?))
        }
        PExpr::Pow(a, b) => {
            store.cost += 10;
            Ok(Expr::pow(convert(store, a, ranks, per_array)?, convert(store, b, ranks, per_array)?))
        }
        PExpr::Call { name, args } => convert_call(store, name, args, ranks, per_array),
    }
}

fn convert_array(
    store: &mut Store,
    name: &str,
    indices: &[PIndex],
    ranks: &FxHashMap<String, usize>,
    per_array: &mut PerArrayIndices,
) -> Result<Expr, CompileError> {
    let Some(&rank) = ranks.get(name) else {
        return Err(CompileError::unsupported_equation(format!("array '{name}' has no bound value")));
    };
    if rank != indices.len() {
        return Err(CompileError::RankMismatch { array: name.to_string(), expected: indices.len(), got: rank });
    }
    let asym = store.symbols.intern(name);
    store.arrays.insert(asym);
    store.out_pre.push(format!("assert rank({name}) == {}", indices.len()));
    let used = per_array.entry(asym).or_default();

    let mut raw_indices = Vec::with_capacity(indices.len());
    for (position, raw) in indices.iter().enumerate() {
        let converted = convert_index(store, raw);
        let decomposed = affine::decompose(&converted, asym, position)?;
        match decomposed {
            Decomposed::Constant => {}
            Decomposed::Single { index, range, shifted } => {
                store.rightind.insert(index);
                used.insert(index);
                if shifted {
                    store.shiftedind.insert(index);
                }
                store.constraints.entry(index).or_default().push(range);
            }
            Decomposed::Pair { i, j, range } => {
                store.rightind.insert(i);
                store.rightind.insert(j);
                used.insert(i);
                used.insert(j);
                store.shiftedind.insert(i);
                store.shiftedind.insert(j);
                store.pairconstraints.push(PairConstraint { i, j, range_i: range.clone(), range_j: range });
            }
        }
        raw_indices.push(converted);
    }
    store.cost += 1;
    Ok(Expr::array(asym, raw_indices))
}

fn convert_index(store: &mut Store, index: &PIndex) -> RawIndex {
    match index {
        PIndex::Symbol(name) => RawIndex::Symbol(store.symbols.intern(name)),
        PIndex::Int(n) => RawIndex::Int(*n),
        PIndex::Neg(inner) => RawIndex::Neg(Box::new(convert_index(store, inner))),
        PIndex::Add(a, b) => RawIndex::Add(Box::new(convert_index(store, a)), Box::new(convert_index(store, b))),
        PIndex::Mul(a, b) => RawIndex::Mul(Box::new(convert_index(store, a)), Box::new(convert_index(store, b))),
    }
}

fn convert_call(
    store: &mut Store,
    name: &str,
    args: &[PExpr],
    ranks: &FxHashMap<String, usize>,
    per_array: &mut PerArrayIndices,
) -> Result<Expr, CompileError> {
    let def = functions::lookup(name)
        .ok_or_else(|| CompileError::unsupported_equation(format!("unknown function '{name}'")))?;
    if !def.accepts_arity(args.len()) {
        return Err(CompileError::unsupported_equation(format!(
            "'{name}' does not accept {} argument(s)",
            args.len()
        )));
    }
    store.cost += def.cost;
    let converted =
        args.iter().map(|a| convert(store, a, ranks, per_array)).collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::call(def.name, converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_equation;

    #[test]
    fn matmul_rhs_records_arrays_and_reduction_index() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let mut store = Store::new();
        let ranks: FxHashMap<String, usize> = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let (_, per_array) = canonicalize_rhs(&mut store, &eq.rhs, &ranks).expect("canonicalize");
        assert_eq!(store.arrays.len(), 2);
        assert_eq!(per_array.len(), 2);
        assert!(store.rightind.len() >= 3); // i, j, k
    }

    #[test]
    fn unbound_array_is_reported() {
        let eq = parse_equation("Z[i] := A[i]").expect("parse");
        let mut store = Store::new();
        let ranks: FxHashMap<String, usize> = FxHashMap::default();
        assert!(canonicalize_rhs(&mut store, &eq.rhs, &ranks).is_err());
    }

    #[test]
    fn rank_mismatch_is_reported() {
        let eq = parse_equation("Z[i] := A[i,i]").expect("parse");
        let mut store = Store::new();
        let ranks: FxHashMap<String, usize> = [("A".to_string(), 1)].into_iter().collect();
        let err = canonicalize_rhs(&mut store, &eq.rhs, &ranks).expect_err("should fail");
        assert!(matches!(err, CompileError::RankMismatch { .. }));
    }
}
