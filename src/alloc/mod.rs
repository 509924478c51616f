//! The allocator planner (§4.D): decides the output array's axes, infers
//! its element type, and allocates storage.
//!
//! Element-type inference is the one place this crate can't just mirror the
//! source language's compile-time type dispatch: there is no `TYP` type
//! parameter here, only `f64`. So "inference" is done for real instead —
//! evaluate the canonicalized RHS once at the first in-range coordinate of
//! every resolved axis and require the result to be finite. That single
//! probe both stands in for choosing an element type and doubles as an
//! allocation-time sanity check that every array/scalar the equation
//! references is actually bound.

use crate::core::error::CompileError;
use crate::core::options::Options;
use crate::core::store::{LhsIndex, Store};
use crate::eval;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

/// The output array's planned axes, in LHS index order. A pinned scalar
/// position (`Z[$t, i]`) contributes a unit axis at the scalar argument's
/// (rounded) value, exactly like an integer literal pin.
///
/// # Errors
/// [`CompileError::OffsetWithoutSupport`] if an axis isn't 1-origin and
/// `opts.offset_arrays` is `false`; [`CompileError::unsupported_equation`]
/// if a pinned scalar position is unbound or not integer-valued;
/// [`CompileError::UnconstrainedIndex`] if an LHS symbol was never
/// resolved by the range solver (the solver runs over `leftind ∪ redind`,
/// so this only fires if `output_axes` is called before [`crate::constraints::solve`]).
pub fn output_axes(
    store: &Store,
    opts: &Options,
    scalars: &FxHashMap<String, f64>,
) -> Result<Vec<RangeInclusive<i64>>, CompileError> {
    let mut axes = Vec::new();
    for raw in &store.leftraw {
        if let Some(axis) = resolve_one(store, raw, opts, scalars)? {
            axes.push(axis);
        }
    }
    Ok(axes)
}

fn resolve_one(
    store: &Store,
    idx: &LhsIndex,
    opts: &Options,
    scalars: &FxHashMap<String, f64>,
) -> Result<Option<RangeInclusive<i64>>, CompileError> {
    match idx {
        LhsIndex::Symbol(sym) => {
            let def = store
                .axisdefs
                .iter()
                .find(|d| d.index == *sym)
                .ok_or_else(|| CompileError::UnconstrainedIndex { index: store.symbols.name(*sym).to_string() })?;
            let axis = def.range.clone();
            if !opts.offset_arrays && *axis.start() != 1 {
                return Err(CompileError::OffsetWithoutSupport { index: store.symbols.name(*sym).to_string() });
            }
            Ok(Some(axis))
        }
        LhsIndex::Int(n) => Ok(Some(*n..=*n)),
        LhsIndex::Scalar(sym) => {
            let name = store.symbols.name(*sym);
            let value = scalars
                .get(name)
                .ok_or_else(|| CompileError::unsupported_equation(format!("scalar '{name}' has no bound value")))?;
            if value.fract().abs() > f64::EPSILON {
                return Err(CompileError::unsupported_equation(format!("scalar '{name}' used as an index must be integer-valued")));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, reason = "checked integer-valued above")]
            let pinned = *value as i64;
            Ok(Some(pinned..=pinned))
        }
        LhsIndex::Named(_, inner) => resolve_one(store, inner, opts, scalars),
    }
}

/// Evaluate the RHS once at the first coordinate of every resolved index,
/// both to select `f64` as the element type and to sanity-check that
/// every referenced array/scalar is bound and every function argument is
/// in-domain before committing to an allocation.
///
/// # Errors
/// Any [`CompileError`] the evaluator can raise (unbound name, out-of-range
/// index, out-of-domain function argument), plus
/// [`CompileError::unsupported_equation`] if the probe value is non-finite.
pub fn probe_element_type(
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
) -> Result<(), CompileError> {
    let indices = store.axisdefs.iter().map(|d| (d.index, *d.range.start())).collect();
    let probe = eval::eval(&store.right, store, arrays, scalars, &indices)?;
    if !probe.is_finite() {
        return Err(CompileError::unsupported_equation(format!(
            "right-hand side evaluates to {probe} at the first in-range index; refusing to allocate"
        )));
    }
    Ok(())
}

/// Plan and allocate the output array, zero-filled per §4.D.4 (this
/// crate's `Tensor::zeros` always zero-fills, so the `flags.zero`
/// "re-zero on overwrite" case costs nothing extra here — it would only
/// matter for a storage backend that leaves fresh allocations
/// uninitialized).
///
/// # Errors
/// See [`output_axes`] and [`probe_element_type`].
pub fn allocate(
    store: &Store,
    opts: &Options,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
) -> Result<Tensor, CompileError> {
    probe_element_type(store, arrays, scalars)?;
    if store.leftscalar.is_some() && store.leftind.is_empty() {
        return Ok(Tensor::scalar(0.0));
    }
    let axes = output_axes(store, opts, scalars)?;
    Ok(Tensor::zeros(axes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::constraints;
    use crate::parser::parse_equation;

    fn array_map(pairs: Vec<(&str, Tensor)>) -> FxHashMap<String, Tensor> {
        pairs.into_iter().map(|(n, t)| (n.to_string(), t)).collect()
    }

    #[test]
    fn matmul_output_has_rank_two_matching_outer_axes() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::zeros(vec![1..=2, 1..=3])), ("B", Tensor::zeros(vec![1..=3, 1..=2]))]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let out = allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        assert_eq!(out.rank(), 2);
        assert_eq!(out.axes(), &[1..=2, 1..=2]);
    }

    #[test]
    fn scalar_reduction_allocates_rank_zero() {
        let eq = parse_equation("s := A[i] * A[i]").expect("parse");
        let ranks = [("A".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=2], vec![2.0, 3.0]))]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let out = allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        assert_eq!(out.rank(), 0);
    }

    #[test]
    fn offset_axis_rejected_when_support_disabled() {
        let eq = parse_equation("Z[i] := A[i]").expect("parse");
        let ranks = [("A".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::zeros(vec![0..=4]))]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let mut opts = Options::default();
        opts.offset_arrays = false;
        let err = output_axes(&store, &opts, &FxHashMap::default()).expect_err("should reject");
        assert!(matches!(err, CompileError::OffsetWithoutSupport { .. }));
    }
}
