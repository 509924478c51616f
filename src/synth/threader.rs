//! The threading layer (§5 "Threading layer", §6 `threader` contract).
//!
//! A sequential threader is always available; the `parallel` feature adds
//! a `rayon`-backed one honoring the exact same `block_threshold`/`keep`
//! contract, so turning it on changes performance, never semantics
//! (Testable Property 4).

use super::{apply, Keep};
use crate::core::error::CompileError;
use crate::core::store::Store;
use crate::core::symbol::Sym;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

/// Splits the outer free-index space into sub-ranges and invokes [`apply`]
/// over each, honoring `keep` semantics when splitting along a reduction
/// axis never happens here (outer-axis splits always write disjoint
/// slices, so every sub-call uses `Keep::Fresh`).
pub trait Threader {
    /// Run the full outer/reduction space over `out`, split into
    /// sub-ranges no smaller than `block` elements of the first outer axis.
    ///
    /// # Errors
    /// Any error [`apply`] raises.
    fn run(
        &self,
        store: &Store,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer_specs: &[(Sym, RangeInclusive<i64>)],
        block: usize,
    ) -> Result<(), CompileError>;
}

/// Splits the first outer axis (if any) into chunks of `block` elements;
/// chunk boundaries, not results, are the only thing splitting changes.
fn split_first_axis(outer_specs: &[(Sym, RangeInclusive<i64>)], block: usize) -> Vec<Vec<(Sym, RangeInclusive<i64>)>> {
    let Some(((sym, range), rest)) = outer_specs.split_first() else {
        return vec![Vec::new()];
    };
    let block = block.max(1);
    let mut chunks = Vec::new();
    let mut lo = *range.start();
    while lo <= *range.end() {
        let hi = (lo + block as i64 - 1).min(*range.end());
        let mut specs = vec![(*sym, lo..=hi)];
        specs.extend_from_slice(rest);
        chunks.push(specs);
        lo = hi + 1;
    }
    if chunks.is_empty() {
        chunks.push(vec![(*sym, range.clone())]);
    }
    chunks
}

/// The always-available, single-threaded threader. Runs the whole outer
/// space in one call (chunking only matters once a parallel threader
/// actually distributes chunks across workers).
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialThreader;

impl Threader for SequentialThreader {
    fn run(
        &self,
        store: &Store,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer_specs: &[(Sym, RangeInclusive<i64>)],
        _block: usize,
    ) -> Result<(), CompileError> {
        apply(store, out, arrays, scalars, outer_specs, Keep::Fresh)
    }
}

/// A `rayon`-backed threader. Chunks the first outer axis into blocks of
/// at least `block` elements and runs each chunk on the global thread
/// pool; each chunk writes a disjoint slice of `out` (split along a free
/// axis never needs `Keep::Continue`), so results are bit-identical to
/// [`SequentialThreader`] for the same inputs.
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonThreader;

#[cfg(feature = "parallel")]
impl Threader for RayonThreader {
    fn run(
        &self,
        store: &Store,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer_specs: &[(Sym, RangeInclusive<i64>)],
        block: usize,
    ) -> Result<(), CompileError> {
        use super::compute_chunk;
        use rayon::prelude::*;

        let chunks = split_first_axis(outer_specs, block);
        if chunks.len() <= 1 {
            return apply(store, out, arrays, scalars, outer_specs, Keep::Fresh);
        }

        // Each chunk returns its own `(coordinates, value)` pairs rather
        // than writing into a shared `Tensor`, so concurrent workers never
        // alias `out`'s backing storage; the coordinates are written back
        // on this thread once every chunk has finished.
        let chunk_results: Vec<Result<Vec<(Vec<i64>, f64)>, CompileError>> =
            chunks.into_par_iter().map(|chunk| compute_chunk(store, arrays, scalars, &chunk)).collect();

        for result in chunk_results {
            for (coords, value) in result? {
                out.set(&coords, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::constraints;
    use crate::core::options::Options;
    use crate::parser::parse_equation;
    use crate::{alloc, synth};

    #[test]
    fn sequential_threader_matches_direct_apply() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays: FxHashMap<String, Tensor> = [
            ("A".to_string(), Tensor::from_data(vec![1..=2, 1..=2], vec![1.0, 2.0, 3.0, 4.0])),
            ("B".to_string(), Tensor::from_data(vec![1..=2, 1..=2], vec![5.0, 6.0, 7.0, 8.0])),
        ]
        .into_iter()
        .collect();
        constraints::solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut out = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        let threader = SequentialThreader;
        threader
            .run(&store, &mut out, &arrays, &FxHashMap::default(), &synth::outer_specs(&store), synth::block_threshold(&store))
            .expect("run");
        assert_eq!(out.get(&[1, 1]), Some(19.0));
        assert_eq!(out.get(&[2, 2]), Some(50.0));
    }
}
