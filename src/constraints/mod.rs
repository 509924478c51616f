//! Constraint store & range solver (§4.C): assigns each loop index a
//! concrete `RangeInclusive<i64>` axis.

use crate::core::error::CompileError;
use crate::core::options::RangeDecl;
use crate::core::store::{AxisDef, RangeExpr, Store};
use crate::core::symbol::Sym;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

/// Feed user-declared ranges (§4.A "extra range declarations", §6 `i ∈
/// 1:N`) into `store.constraints` as [`RangeExpr::Literal`] candidates,
/// interning each declared name against `store.symbols` so it lines up
/// with the same symbol the equation itself uses. Call this after
/// [`crate::analyzer::analyze`] and before [`solve`].
pub fn apply_declarations(store: &mut Store, declarations: &[RangeDecl]) {
    for decl in declarations {
        let sym = store.symbols.intern(&decl.index);
        store.constraints.entry(sym).or_default().push(RangeExpr::Literal { lo: decl.lo, hi: decl.hi });
    }
}

/// Resolve a [`RangeExpr`] to a concrete axis, given the caller's bound
/// arrays (by name, matching [`Store::symbols`]).
fn resolve(expr: &RangeExpr, store: &Store, arrays: &FxHashMap<String, Tensor>) -> Result<RangeInclusive<i64>, CompileError> {
    match expr {
        RangeExpr::AxisOf { array, position } => {
            let name = store.symbols.name(*array);
            let tensor = arrays
                .get(name)
                .ok_or_else(|| CompileError::unsupported_equation(format!("array '{name}' has no bound value")))?;
            tensor
                .axes()
                .get(*position)
                .cloned()
                .ok_or_else(|| CompileError::RankMismatch { array: name.to_string(), expected: *position + 1, got: tensor.rank() })
        }
        RangeExpr::Literal { lo, hi } => Ok(*lo..=*hi),
        RangeExpr::Shifted { base, offset } => {
            let inner = resolve(base, store, arrays)?;
            Ok((*inner.start() - offset)..=(*inner.end() - offset))
        }
        RangeExpr::Scaled { base, factor } => {
            let inner = resolve(base, store, arrays)?;
            if *factor == 0 {
                return Err(CompileError::UnsupportedAffine { text: "scale factor of zero".to_string() });
            }
            Ok(div_floor(*inner.start(), *factor)..=div_floor(*inner.end(), *factor))
        }
    }
}

fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) { q - 1 } else { q }
}

fn describe(store: &Store, expr: &RangeExpr) -> String {
    match expr {
        RangeExpr::AxisOf { array, position } => format!("axis({}, {})", store.symbols.name(*array), position),
        RangeExpr::Literal { lo, hi } => format!("{lo}:{hi}"),
        RangeExpr::Shifted { base, offset } => format!("{}+{}", describe(store, base), offset),
        RangeExpr::Scaled { base, factor } => format!("{}*{}", describe(store, base), factor),
    }
}

fn ranges_equal(a: &RangeInclusive<i64>, b: &RangeInclusive<i64>) -> bool {
    a.start() == b.start() && a.end() == b.end()
}

fn intersect(a: &RangeInclusive<i64>, b: &RangeInclusive<i64>) -> RangeInclusive<i64> {
    (*a.start()).max(*b.start())..=(*a.end()).min(*b.end())
}

/// The range of `i` such that `i + known` stays inside `axis` for every
/// value `known` can take (§4.C step 2: resolving the *other* half of an
/// entangled pair once one half has independent range evidence). This is a
/// Minkowski difference, not a re-use of `known`'s own range: `A[i+x]` with
/// `x` resolved to `1..=3` against `A`'s axis `1..=5` must give `i` the
/// range `0..=2`, the widest range for which every `i+x` combination stays
/// in bounds.
///
/// # Errors
/// [`CompileError::UnconstrainedIndex`] if no value of `i` keeps every
/// `i+x` combination in bounds (the axis is narrower than `known`'s span).
fn minkowski_diff(index: Sym, store: &Store, axis: &RangeInclusive<i64>, known: &RangeInclusive<i64>) -> Result<RangeInclusive<i64>, CompileError> {
    let lo = axis.start() - known.start();
    let hi = axis.end() - known.end();
    if lo > hi {
        return Err(CompileError::UnconstrainedIndex { index: store.symbols.name(index).to_string() });
    }
    Ok(lo..=hi)
}

/// Solve every index in `store.leftind ∪ store.redind` to a concrete axis,
/// appending bindings to `store.axisdefs`.
///
/// # Errors
/// [`CompileError::UnconstrainedIndex`] if an index has no evidence,
/// [`CompileError::RangeDisagreement`] if an unshifted index's candidate
/// ranges disagree.
pub fn solve(store: &mut Store, arrays: &FxHashMap<String, Tensor>) -> Result<(), CompileError> {
    let mut todo: Vec<Sym> = store.leftind.iter().chain(store.redind.iter()).collect();
    todo.dedup();

    // Entangled pairs (§4.C step 2): neither index's range is
    // determinable alone. Resolve whichever side has independent
    // constraint evidence, then feed the Minkowski difference of the
    // containing axis and that resolved range as a *new candidate
    // constraint* for the other side — not a wholesale replacement, so a
    // separately user-declared or multiply-entangled range on `other`
    // still gets intersected against it by the general loop below. Only
    // the side resolved here is removed from `todo`.
    let pairs = store.pairconstraints.clone();
    for pair in &pairs {
        let i_has_direct = store.constraints.get(&pair.i).is_some_and(|c| !c.is_empty());
        let j_has_direct = store.constraints.get(&pair.j).is_some_and(|c| !c.is_empty());
        let (resolved_first, other) = if i_has_direct {
            (pair.i, pair.j)
        } else if j_has_direct {
            (pair.j, pair.i)
        } else {
            continue;
        };
        if !store.axisdefs.iter().any(|d| d.index == resolved_first) {
            let candidates = store.constraints.get(&resolved_first).cloned().unwrap_or_default();
            let mut resolved = resolve(&candidates[0], store, arrays)?;
            for c in &candidates[1..] {
                resolved = intersect(&resolved, &resolve(c, store, arrays)?);
            }
            store.axisdefs.push(AxisDef { index: resolved_first, range: resolved });
        }
        todo.retain(|s| *s != resolved_first);

        let resolved_range = store.axisdefs.iter().find(|d| d.index == resolved_first).expect("just inserted").range.clone();
        let axis_expr = if other == pair.i { &pair.range_i } else { &pair.range_j };
        let axis_range = resolve(axis_expr, store, arrays)?;
        let other_range = minkowski_diff(other, store, &axis_range, &resolved_range)?;
        store.constraints.entry(other).or_default().push(RangeExpr::Literal { lo: *other_range.start(), hi: *other_range.end() });
    }

    for index in todo {
        if store.axisdefs.iter().any(|d| d.index == index) {
            continue;
        }
        let candidates = store.constraints.get(&index).cloned().unwrap_or_default();
        if candidates.is_empty() {
            return Err(CompileError::UnconstrainedIndex { index: store.symbols.name(index).to_string() });
        }
        let shifted = store.shiftedind.contains(&index);
        let resolved = if shifted {
            let mut acc = resolve(&candidates[0], store, arrays)?;
            for c in &candidates[1..] {
                acc = intersect(&acc, &resolve(c, store, arrays)?);
            }
            acc
        } else {
            let nominal = resolve(&candidates[0], store, arrays)?;
            for c in &candidates[1..] {
                let other = resolve(c, store, arrays)?;
                if !ranges_equal(&nominal, &other) {
                    return Err(CompileError::RangeDisagreement {
                        index: store.symbols.name(index).to_string(),
                        first: describe(store, &candidates[0]),
                        other: describe(store, c),
                    });
                }
            }
            nominal
        };
        store.axisdefs.push(AxisDef { index, range: resolved });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::parser::parse_equation;

    fn array_map(pairs: Vec<(&str, Tensor)>) -> FxHashMap<String, Tensor> {
        pairs.into_iter().map(|(n, t)| (n.to_string(), t)).collect()
    }

    #[test]
    fn matmul_axes_match_array_shapes() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let ranks = [("A".to_string(), 2), ("B".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![
            ("A", Tensor::zeros(vec![1..=2, 1..=3])),
            ("B", Tensor::zeros(vec![1..=3, 1..=2])),
        ]);
        solve(&mut store, &arrays).expect("solve");
        assert_eq!(store.axisdefs.len(), 3); // i, j, k
        for def in &store.axisdefs {
            let name = store.symbols.name(def.index);
            match name {
                "i" => assert_eq!(def.range, 1..=2),
                "j" => assert_eq!(def.range, 1..=3),
                "k" => assert_eq!(def.range, 1..=2),
                other => unreachable!("unexpected index {other}"),
            }
        }
    }

    #[test]
    fn entangled_index_resolves_by_minkowski_difference() {
        // §8 scenario 3: `x` resolves directly from `K`'s axis (`1..=3`);
        // `i` is entangled with it in `A[i+x]`, so `i` must shrink `A`'s
        // axis (`1..=5`) by `x`'s range rather than copy it — otherwise
        // `i+x` overruns `A` at the top end of both ranges.
        let eq = parse_equation("Z[i,j] := A[i+x,j+y] * K[x,y]").expect("parse");
        let ranks = [("A".to_string(), 2), ("K".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![
            ("A", Tensor::zeros(vec![1..=5, 1..=5])),
            ("K", Tensor::zeros(vec![1..=3, 1..=3])),
        ]);
        solve(&mut store, &arrays).expect("solve");
        let i = store.axisdefs.iter().find(|d| store.symbols.name(d.index) == "i").expect("i resolved");
        assert_eq!(i.range, 0..=2);
        let j = store.axisdefs.iter().find(|d| store.symbols.name(d.index) == "j").expect("j resolved");
        assert_eq!(j.range, 0..=2);
    }

    #[test]
    fn entangled_stencil_forward_kernel_stays_in_bounds() {
        // Runs the actual forward kernel for §8 scenario 3 end to end:
        // every `A[i+x,j+y]` access must land inside `A`'s 5x5 bounds for
        // the whole 3x3 span of `x`/`y`. Before the Minkowski-difference
        // fix this overran `A` and `forward`-equivalent evaluation failed
        // with an out-of-range error instead of producing `Z = 3x3 of 9`.
        use crate::alloc;
        use crate::core::options::Options;
        use crate::synth;

        let eq = parse_equation("Z[i,j] := A[i+x,j+y] * K[x,y]").expect("parse");
        let ranks = [("A".to_string(), 2), ("K".to_string(), 2)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=5, 1..=5], vec![1.0; 25])),
            ("K", Tensor::from_data(vec![1..=3, 1..=3], vec![1.0; 9])),
        ]);
        solve(&mut store, &arrays).expect("solve");
        let opts = Options::default();
        let mut z = alloc::allocate(&store, &opts, &arrays, &FxHashMap::default()).expect("allocate");
        let outer = synth::outer_specs(&store);
        synth::apply(&store, &mut z, &arrays, &FxHashMap::default(), &outer, synth::Keep::Fresh).expect("apply");
        assert_eq!(z.axes(), &[0..=2, 0..=2]);
        assert!(z.data().iter().all(|&v| v == 9.0));
    }

    #[test]
    fn unconstrained_index_fails() {
        // Neither `i` nor `j` is given a range anywhere else, so the
        // entangled pair from `A[i+j]` can't be resolved (§8 negative test 3).
        let eq = parse_equation("Z[i] := A[i+j]").expect("parse");
        let ranks = [("A".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::zeros(vec![1..=5]))]);
        let err = solve(&mut store, &arrays).expect_err("should fail");
        assert!(matches!(err, CompileError::UnconstrainedIndex { .. }));
    }

    #[test]
    fn a_declared_range_resolves_an_otherwise_unconstrained_entangled_index() {
        // Same shape as `unconstrained_index_fails`, but with `j` given a
        // declared range (§4.A, §6 `i ∈ 1:N`) — `j` resolves directly, and
        // `i` is then solved from it by the same Minkowski-difference
        // resolution as the §8 scenario 3 tests above.
        use crate::core::options::RangeDecl;

        let eq = parse_equation("Z[i] := A[i+j]").expect("parse");
        let ranks = [("A".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays = array_map(vec![("A", Tensor::zeros(vec![1..=5]))]);
        apply_declarations(&mut store, &[RangeDecl { index: "j".to_string(), lo: 1, hi: 2 }]);
        solve(&mut store, &arrays).expect("solve");
        let i = store.axisdefs.iter().find(|d| store.symbols.name(d.index) == "i").expect("i resolved");
        assert_eq!(i.range, 0..=3); // axis(A) 1..=5 minus j's 1..=2
    }
}
