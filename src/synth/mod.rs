//! The loop-nest synthesizer (§4.E): executes the outer/inner loop nest
//! the specification describes as an emitted `apply!` kernel.
//!
//! This crate has no macro-expansion step and no external code emitter, so
//! "synthesizing a kernel" means building a directly callable executor
//! instead of source text: [`apply`] walks the same outer-free /
//! inner-reduction structure the kernel body template describes, and
//! [`storage_kind_of`] dispatches on [`StorageKind`] exactly as the
//! specification's storage-tag dispatch does, just without a second,
//! annotation-only version of the same loop for a backend this crate
//! can't itself target.

pub mod threader;
#[cfg(feature = "parallel")]
pub mod vectorized;

use crate::core::options::{Avx, Options};
use crate::core::store::{LhsIndex, Store};
use crate::core::symbol::Sym;
use crate::eval;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

pub use threader::{SequentialThreader, Threader};
#[cfg(feature = "parallel")]
pub use threader::RayonThreader;

/// Storage-tag dispatch target (§9 redesign note: "dynamic dispatch on
/// storage tag via type-matching method overloads" re-expressed as an enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Plain scalar loop nest.
    Host,
    /// Innermost reduction loop batched through SIMD lanes (`parallel` feature).
    HostVectorizable,
    /// A capability flag plus a grid-mapping function; no device codegen happens here.
    Device,
}

/// Probe which [`StorageKind`] applies, given the analyzed equation and
/// the options in force. Mirrors §4.E's three specializations: GPU wins if
/// a block size is configured, vectorization if enabled and not suppressed
/// by RHS canonicalization, plain scalar otherwise.
#[must_use]
pub fn storage_kind_of(store: &Store, opts: &Options) -> StorageKind {
    if opts.cuda > 0 {
        return StorageKind::Device;
    }
    let vectorizable = !store.flags.noavx && !matches!(opts.avx, Avx::Disabled);
    if vectorizable && cfg!(feature = "parallel") {
        StorageKind::HostVectorizable
    } else {
        StorageKind::Host
    }
}

/// Whether a kernel call continues accumulating into the existing output
/// (`keep = true`) or starts fresh (`keep = nothing`), per §4.E/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// Start the accumulator from `redfun`'s identity element.
    Fresh,
    /// Continue accumulating from the output's current value.
    Continue,
}

fn axis_of<'a>(store: &'a Store, sym: Sym) -> &'a RangeInclusive<i64> {
    &store
        .axisdefs
        .iter()
        .find(|d| d.index == sym)
        .unwrap_or_else(|| panic!("index '{}' left unresolved by the range solver", store.symbols.name(sym)))
        .range
}

pub(crate) fn for_each_combo(specs: &[(Sym, RangeInclusive<i64>)], current: &mut FxHashMap<Sym, i64>, f: &mut dyn FnMut(&FxHashMap<Sym, i64>)) {
    let Some(((sym, range), rest)) = specs.split_first() else {
        f(current);
        return;
    };
    for v in range.clone() {
        current.insert(*sym, v);
        for_each_combo(rest, current, f);
    }
}

pub(crate) fn output_coords(store: &Store, outer: &FxHashMap<Sym, i64>) -> Vec<i64> {
    fn one(store: &Store, idx: &LhsIndex, outer: &FxHashMap<Sym, i64>) -> Option<i64> {
        match idx {
            LhsIndex::Symbol(sym) => Some(*outer.get(sym).expect("outer index bound by caller")),
            LhsIndex::Int(n) => Some(*n),
            LhsIndex::Scalar(sym) => Some(*axis_of(store, *sym).start()),
            LhsIndex::Named(_, inner) => one(store, inner, outer),
        }
    }
    store.leftraw.iter().filter_map(|idx| one(store, idx, outer)).collect()
}

pub(crate) fn reduction_specs(store: &Store) -> Vec<(Sym, RangeInclusive<i64>)> {
    store.redind.iter().map(|s| (s, axis_of(store, s).clone())).collect()
}

/// Evaluate the accumulator for one outer-index combination: the inner
/// loop over `reduction_specs`, seeded per `keep`.
fn compute_at(
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    outer: &FxHashMap<Sym, i64>,
    reduction_specs: &[(Sym, RangeInclusive<i64>)],
    current: Option<f64>,
    keep: Keep,
) -> Result<f64, crate::core::error::CompileError> {
    if reduction_specs.is_empty() {
        let value = eval::eval(&store.right, store, arrays, scalars, outer)?;
        return Ok(match keep {
            Keep::Fresh => value,
            Keep::Continue => store.redfun.combine(current.unwrap_or(store.redfun.init()), value),
        });
    }
    let mut acc = match keep {
        Keep::Fresh => store.redfun.init(),
        Keep::Continue => current.unwrap_or(store.redfun.init()),
    };
    let mut indices = outer.clone();
    let mut err = None;
    for_each_combo(reduction_specs, &mut indices, &mut |full| {
        if err.is_some() {
            return;
        }
        match eval::eval(&store.right, store, arrays, scalars, full) {
            Ok(term) => acc = store.redfun.combine(acc, term),
            Err(e) => err = Some(e),
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(acc)
}

/// Run the forward kernel once over the full outer/reduction index space,
/// writing into `out`. Exposed as a free function so [`threader`]
/// implementations can call it per sub-range of the outer axes.
///
/// `keep` follows §6's three-valued contract collapsed to two cases
/// (there is no separate "nothing" kernel call variant here: the caller
/// decides per sub-range).
///
/// # Errors
/// Any [`crate::core::error::CompileError`] the evaluator raises.
pub fn apply(
    store: &Store,
    out: &mut Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    outer_specs: &[(Sym, RangeInclusive<i64>)],
    keep: Keep,
) -> Result<(), crate::core::error::CompileError> {
    let reduction = reduction_specs(store);
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

/// Compute one sub-range ("chunk") of the outer free-index space without
/// touching any shared storage, returning `(coordinates, value)` pairs for
/// the caller to write in afterward. Since an outer-axis split always
/// writes disjoint coordinates, every chunk uses `Keep::Fresh`
/// internally — used by [`threader::RayonThreader`] so concurrent workers
/// never alias a `Tensor`'s backing storage.
///
/// # Errors
/// Any [`crate::core::error::CompileError`] the evaluator raises.
pub fn compute_chunk(
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    chunk_specs: &[(Sym, RangeInclusive<i64>)],
) -> Result<Vec<(Vec<i64>, f64)>, crate::core::error::CompileError> {
    let reduction = reduction_specs(store);
    let mut out = Vec::new();
    let mut err = None;
    let mut outer_vars = FxHashMap::default();
    for_each_combo(chunk_specs, &mut outer_vars, &mut |outer| {
        if err.is_some() {
            return;
        }
        let coords = output_coords(store, outer);
        match compute_at(store, arrays, scalars, outer, &reduction, None, Keep::Fresh) {
            Ok(value) => out.push((coords, value)),
            Err(e) => err = Some(e),
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(out)
}

/// The outer free-index axes, in `leftind` order — the split unit a
/// [`Threader`] distributes across workers.
#[must_use]
pub fn outer_specs(store: &Store) -> Vec<(Sym, RangeInclusive<i64>)> {
    store.leftind.iter().map(|s| (s, axis_of(store, s).clone())).collect()
}

/// `block_threshold = BLOCK_BASE ÷ cost` (§4.E "Dispatch entry point"),
/// clamped to at least 1 so a free-standing zero-cost equation never
/// divides into an empty block.
const BLOCK_BASE: u64 = 4096;

#[must_use]
pub fn block_threshold(store: &Store) -> usize {
    (BLOCK_BASE / store.cost.max(1)).max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc;
    use crate::analyzer::analyze;
    use crate::constraints;
    use crate::parser::parse_equation;

    fn array_map(pairs: Vec<(&str, Tensor)>) -> FxHashMap<String, Tensor> {
        pairs.into_iter().map(|(n, t)| (n.to_string(), t)).collect()
    }

    #[test]
    fn matmul_kernel_matches_textbook_product() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=2, 1..=2], vec![1.0, 2.0, 3.0, 4.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=2], vec![5.0, 6.0, 7.0, 8.0])),
        ]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        apply(&store, &mut out, &arrays, &FxHashMap::default(), &outer_specs(&store), Keep::Fresh).expect("apply");
        assert_eq!(out.get(&[1, 1]), Some(19.0));
        assert_eq!(out.get(&[1, 2]), Some(22.0));
        assert_eq!(out.get(&[2, 1]), Some(43.0));
        assert_eq!(out.get(&[2, 2]), Some(50.0));
    }

    #[test]
    fn max_reduction_picks_row_maximum() {
        let eq = parse_equation("Z[i] := max(A[i,j])").expect("parse");
        let ranks = [("A".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=2, 1..=3], vec![1.0, 9.0, 2.0, 8.0, 3.0, 7.0]))]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        apply(&store, &mut out, &arrays, &FxHashMap::default(), &outer_specs(&store), Keep::Fresh).expect("apply");
        assert_eq!(out.get(&[1]), Some(9.0));
        assert_eq!(out.get(&[2]), Some(8.0));
    }

    #[test]
    fn scalar_reduction_sums_to_dot_product() {
        let eq = parse_equation("s := A[i] * A[i]").expect("parse");
        let ranks = [("A".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0]))]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        apply(&store, &mut out, &arrays, &FxHashMap::default(), &outer_specs(&store), Keep::Fresh).expect("apply");
        assert_eq!(out.as_scalar(), 14.0);
    }

    #[test]
    fn accumulate_continues_from_existing_output() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=1, 1..=2], vec![1.0, 2.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=1], vec![3.0, 4.0])),
        ]);
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        apply(&store, &mut out, &arrays, &FxHashMap::default(), &outer_specs(&store), Keep::Fresh).expect("first apply");
        assert_eq!(out.get(&[1, 1]), Some(11.0)); // 1*3 + 2*4

        let arrays2 = array_map(vec![
            ("A", Tensor::from_data(vec![1..=1, 1..=2], vec![5.0, 1.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=1], vec![1.0, 1.0])),
        ]);
        apply(&store, &mut out, &arrays2, &FxHashMap::default(), &outer_specs(&store), Keep::Continue).expect("second apply");
        assert_eq!(out.get(&[1, 1]), Some(17.0)); // 11 + (5*1 + 1*1)
    }
}
