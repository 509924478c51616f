//! The gradient synthesizer (§4.F): produces the gradient with respect to
//! every array argument on the right-hand side, given the adjoint of the
//! forward output.
//!
//! Two strategies read from the same rule table —
//! [`crate::functions::lookup`]'s `partial` entries — mirroring the
//! teacher's single `functions::registry::Registry` serving evaluation,
//! cost accounting, and differentiation alike: [`symbolic`] builds one
//! [`crate::core::expr::Expr`] derivative per RHS array occurrence and
//! evaluates it once per index combination; [`dual`] propagates the same
//! rule table numerically through forward-mode dual arithmetic instead of
//! building an intermediate expression tree.

pub mod dual;
pub mod symbolic;

use crate::core::error::CompileError;
use crate::core::expr::{Expr, ExprKind};
use crate::core::options::{GradStrategy, Options};
use crate::core::store::{ReductionOp, Store};
use crate::core::symbol::Sym;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;

/// One RHS array occurrence: which array, where in the expression tree (a
/// child-index path from the root), and its raw index-subscript syntax.
/// Two occurrences of the same array at different index tuples (`A[i,k]`
/// and `A[k,j]` in `A[i,k]*A[k,j]`) get independent entries, since each
/// contributes its own gradient term.
#[derive(Debug, Clone)]
pub(crate) struct Occurrence {
    pub array: Sym,
    pub path: Vec<usize>,
    pub indices: Vec<crate::core::expr::RawIndex>,
}

/// Walk `expr`, recording every `Array` leaf matching `filter` (every leaf,
/// if `filter` is `None`), tagged with the child-index path that reaches it.
pub(crate) fn collect_occurrences(expr: &Expr, filter: Option<Sym>) -> Vec<Occurrence> {
    fn walk(expr: &Expr, filter: Option<Sym>, path: &mut Vec<usize>, out: &mut Vec<Occurrence>) {
        match &expr.kind {
            ExprKind::Array { name, indices } => {
                if filter.map_or(true, |f| f == *name) {
                    out.push(Occurrence { array: *name, path: path.clone(), indices: indices.clone() });
                }
            }
            ExprKind::Sum(terms) => {
                for (i, t) in terms.iter().enumerate() {
                    path.push(i);
                    walk(t, filter, path, out);
                    path.pop();
                }
            }
            ExprKind::Product(factors) => {
                for (i, t) in factors.iter().enumerate() {
                    path.push(i);
                    walk(t, filter, path, out);
                    path.pop();
                }
            }
            ExprKind::Div(a, b) | ExprKind::Pow(a, b) => {
                path.push(0);
                walk(a, filter, path, out);
                path.pop();
                path.push(1);
                walk(b, filter, path, out);
                path.pop();
            }
            ExprKind::Call { args, .. } => {
                for (i, a) in args.iter().enumerate() {
                    path.push(i);
                    walk(a, filter, path, out);
                    path.pop();
                }
            }
            ExprKind::Number(_) | ExprKind::Scalar(_) => {}
        }
    }
    let mut out = Vec::new();
    walk(expr, filter, &mut Vec::new(), &mut out);
    out
}

/// `∂(reduce terms via redfun)/∂terms[k]`, one factor per term.
///
/// `Add`'s factor is always `1`; `Mul`'s is the product of every other term
/// (computed by division when `terms[k] != 0`, by explicit exclusion
/// otherwise); `Max`/`Min` route the whole gradient to the first term
/// achieving the extreme value, the same argmax/argmin convention
/// max-pooling layers use elsewhere, and leave every other factor `0`.
pub(crate) fn reduction_derivative_factors(redfun: ReductionOp, terms: &[f64]) -> Vec<f64> {
    match redfun {
        ReductionOp::Add => vec![1.0; terms.len()],
        ReductionOp::Mul => terms
            .iter()
            .enumerate()
            .map(|(k, &t)| {
                if t != 0.0 {
                    terms.iter().product::<f64>() / t
                } else {
                    terms.iter().enumerate().filter(|(i, _)| *i != k).map(|(_, v)| *v).product()
                }
            })
            .collect(),
        ReductionOp::Max => route_to_extreme(terms, f64::max),
        ReductionOp::Min => route_to_extreme(terms, f64::min),
    }
}

fn route_to_extreme(terms: &[f64], combine: fn(f64, f64) -> f64) -> Vec<f64> {
    let extreme = terms.iter().copied().fold(terms[0], combine);
    let mut assigned = false;
    terms
        .iter()
        .map(|&t| {
            if !assigned && t == extreme {
                assigned = true;
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Add `delta` to the element of `tensor` at `coords`.
///
/// # Errors
/// [`CompileError::unsupported_equation`] if `coords` falls outside `tensor`.
pub(crate) fn accumulate(tensor: &mut Tensor, array_name: &str, coords: &[i64], delta: f64) -> Result<(), CompileError> {
    let current = tensor
        .get(coords)
        .ok_or_else(|| CompileError::unsupported_equation(format!("gradient index out of range for '{array_name}'")))?;
    tensor.set(coords, current + delta);
    Ok(())
}

fn zero_gradients(store: &Store, arrays: &FxHashMap<String, Tensor>) -> FxHashMap<String, Tensor> {
    store
        .arrays
        .iter()
        .map(|a| {
            let name = store.symbols.name(a).to_string();
            let shape = arrays.get(&name).map_or_else(Vec::new, |t| t.axes().to_vec());
            (name, Tensor::zeros(shape))
        })
        .collect()
}

/// Synthesize the gradient of the output with respect to every RHS array,
/// given the adjoint `dz` (shaped like the forward output) and the same
/// bindings the forward kernel ran with.
///
/// Returns an empty map without evaluating anything when `opts.grad` is
/// [`GradStrategy::None`] or the equation raised `nograd` during
/// canonicalization (§4.F).
///
/// # Errors
/// Any [`CompileError`] the chosen strategy's evaluator raises.
pub fn gradient(
    store: &Store,
    opts: &Options,
    dz: &Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
) -> Result<FxHashMap<String, Tensor>, CompileError> {
    if store.flags.nograd {
        return Ok(FxHashMap::default());
    }
    let mut grads = zero_gradients(store, arrays);
    match opts.grad {
        GradStrategy::None => return Ok(FxHashMap::default()),
        GradStrategy::Symbolic => symbolic::accumulate_into(store, dz, arrays, scalars, &mut grads)?,
        GradStrategy::Dual => dual::accumulate_into(store, dz, arrays, scalars, &mut grads)?,
    }
    Ok(grads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::ReductionOp;

    #[test]
    fn add_factors_are_all_one() {
        assert_eq!(reduction_derivative_factors(ReductionOp::Add, &[1.0, 2.0, 3.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn mul_factors_are_product_of_the_others() {
        let factors = reduction_derivative_factors(ReductionOp::Mul, &[2.0, 3.0, 4.0]);
        assert!((factors[0] - 12.0).abs() < 1e-9);
        assert!((factors[1] - 8.0).abs() < 1e-9);
        assert!((factors[2] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn max_routes_entirely_to_the_first_extreme() {
        assert_eq!(reduction_derivative_factors(ReductionOp::Max, &[1.0, 9.0, 9.0, 3.0]), vec![0.0, 1.0, 0.0, 0.0]);
    }
}
