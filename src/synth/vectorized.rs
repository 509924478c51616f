//! The `HostVectorizable` specialization (§4.E point 2, §9 ambient note):
//! batches the innermost reduction loop through real `wide::f64x4` lanes
//! instead of emitting a vectorization annotation for an external backend
//! to interpret — this crate has no LLVM/PTX backend of its own, so the
//! honest thing to vectorize is the accumulator combine step itself.
//!
//! Each RHS term is still evaluated one scalar coordinate at a time (the
//! expression tree is arbitrary, not something this crate can lane-pack
//! automatically); what gets batched is the `ReductionOp::combine` calls
//! that fold four consecutive reduction-loop terms into a SIMD register
//! before a final horizontal reduce.

use super::{for_each_combo, output_coords, reduction_specs, Keep};
use crate::core::error::CompileError;
use crate::core::store::{ReductionOp, Store};
use crate::core::symbol::Sym;
use crate::eval;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;
use wide::f64x4;

fn combine_simd(op: ReductionOp, a: f64x4, b: f64x4) -> f64x4 {
    match op {
        ReductionOp::Add => a + b,
        ReductionOp::Mul => a * b,
        ReductionOp::Max => a.max(b),
        ReductionOp::Min => a.min(b),
    }
}

fn horizontal_reduce(op: ReductionOp, v: f64x4) -> f64 {
    let lanes = v.to_array();
    let mut acc = lanes[0];
    for lane in &lanes[1..] {
        acc = op.combine(acc, *lane);
    }
    acc
}

fn compute_at(
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    outer: &FxHashMap<Sym, i64>,
    reduction: &[(Sym, RangeInclusive<i64>)],
    current: Option<f64>,
    keep: Keep,
) -> Result<f64, CompileError> {
    let mut combos = Vec::new();
    let mut idx = outer.clone();
    for_each_combo(reduction, &mut idx, &mut |full| combos.push(full.clone()));

    let mut err = None;
    let mut vacc = f64x4::splat(store.redfun.init());
    let mut chunks = combos.chunks_exact(4);
    for chunk in &mut chunks {
        let mut lanes = [0.0_f64; 4];
        for (lane, combo) in lanes.iter_mut().zip(chunk) {
            match eval::eval(&store.right, store, arrays, scalars, combo) {
                Ok(v) => *lane = v,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        if err.is_some() {
            break;
        }
        vacc = combine_simd(store.redfun, vacc, f64x4::new(lanes));
    }
    if let Some(e) = err {
        return Err(e);
    }
    let mut acc = horizontal_reduce(store.redfun, vacc);
    for combo in chunks.remainder() {
        acc = store.redfun.combine(acc, eval::eval(&store.right, store, arrays, scalars, combo)?);
    }
    Ok(match keep {
        Keep::Fresh => acc,
        Keep::Continue => store.redfun.combine(current.unwrap_or(store.redfun.init()), acc),
    })
}

/// Run the forward kernel with the reduction loop batched through
/// `wide::f64x4` lanes. Falls back to the identity reduction (no
/// batching benefit, but still correct) when there is no reduction axis
/// to batch over.
///
/// # Errors
/// Any [`CompileError`] the evaluator raises.
pub fn apply(
    store: &Store,
    out: &mut Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    outer_specs: &[(Sym, RangeInclusive<i64>)],
    keep: Keep,
) -> Result<(), CompileError> {
    let reduction = reduction_specs(store);
    if reduction.is_empty() {
        return super::apply(store, out, arrays, scalars, outer_specs, keep);
    }
    let mut err = None;
    let mut outer_vars = FxHashMap::default();
    for_each_combo(outer_specs, &mut outer_vars, &mut |outer| {
        if err.is_some() {
            return;
        }
        let coords = output_coords(store, outer);
        let current = matches!(keep, Keep::Continue).then(|| out.get(&coords)).flatten();
        match compute_at(store, arrays, scalars, outer, &reduction, current, keep) {
            Ok(value) => out.set(&coords, value),
            Err(e) => err = Some(e),
        }
    });
    err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc;
    use crate::analyzer::analyze;
    use crate::constraints;
    use crate::core::options::Options;
    use crate::parser::parse_equation;

    #[test]
    fn vectorized_matmul_matches_scalar_kernel() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        // A 2x8, B 8x2 so the reduction axis (length 8) exercises two full
        // SIMD chunks with no remainder.
        let a_data: Vec<f64> = (1..=16).map(f64::from).collect();
        let b_data: Vec<f64> = (1..=16).map(f64::from).collect();
        let arrays: FxHashMap<String, Tensor> = [
            ("A".to_string(), Tensor::from_data(vec![1..=2, 1..=8], a_data)),
            ("B".to_string(), Tensor::from_data(vec![1..=8, 1..=2], b_data)),
        ]
        .into_iter()
        .collect();
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();

        let mut scalar_out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        super::super::apply(&store, &mut scalar_out, &arrays, &FxHashMap::default(), &super::super::outer_specs(&store), Keep::Fresh)
            .expect("scalar apply");

        let mut vector_out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        apply(&store, &mut vector_out, &arrays, &FxHashMap::default(), &super::super::outer_specs(&store), Keep::Fresh)
            .expect("vectorized apply");

        assert_eq!(scalar_out.data(), vector_out.data());
    }
}
