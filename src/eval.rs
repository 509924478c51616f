//! Scalar evaluation of a canonicalized RHS tree against concrete index
//! values. Shared by the allocator's element-type probe (§4.D.1), the
//! plain-scalar kernel path (§4.E), and dual-number gradient evaluation
//! (§4.F) — one evaluator, not three, the same consolidation the
//! specification's `[AMBIENT]` note makes for the function registry.

use crate::core::error::CompileError;
use crate::core::expr::{Expr, ExprKind, RawIndex};
use crate::core::store::Store;
use crate::core::symbol::Sym;
use crate::functions;
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;

/// Evaluate one raw index expression to a concrete coordinate.
#[must_use]
pub fn eval_raw_index(idx: &RawIndex, indices: &FxHashMap<Sym, i64>) -> i64 {
    match idx {
        RawIndex::Symbol(s) => *indices.get(s).unwrap_or(&0),
        RawIndex::Int(n) => *n,
        RawIndex::Neg(inner) => -eval_raw_index(inner, indices),
        RawIndex::Add(a, b) => eval_raw_index(a, indices) + eval_raw_index(b, indices),
        RawIndex::Mul(a, b) => eval_raw_index(a, indices) * eval_raw_index(b, indices),
    }
}

/// Evaluate `expr` to an `f64`, resolving array/scalar references by name
/// against `arrays`/`scalars` and free indices against `indices`.
///
/// # Errors
/// Returns an error if a referenced array/scalar is unbound, an index is
/// out of range, or a function argument is out of its domain.
pub fn eval(
    expr: &Expr,
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    indices: &FxHashMap<Sym, i64>,
) -> Result<f64, CompileError> {
    match &expr.kind {
        ExprKind::Number(n) => Ok(n.0),
        ExprKind::Scalar(s) => {
            let name = store.symbols.name(*s);
            scalars
                .get(name)
                .copied()
                .ok_or_else(|| CompileError::unsupported_equation(format!("scalar '{name}' has no bound value")))
        }
        ExprKind::Array { name, indices: idxs } => {
            let tname = store.symbols.name(*name);
            let tensor = arrays
                .get(tname)
                .ok_or_else(|| CompileError::unsupported_equation(format!("array '{tname}' has no bound value")))?;
            let coords: Vec<i64> = idxs.iter().map(|ri| eval_raw_index(ri, indices)).collect();
            tensor
                .get(&coords)
                .ok_or_else(|| CompileError::unsupported_equation(format!("index out of range for '{tname}'")))
        }
        ExprKind::Sum(terms) => {
            let mut acc = 0.0;
            for t in terms {
                acc += eval(t, store, arrays, scalars, indices)?;
            }
            Ok(acc)
        }
        ExprKind::Product(factors) => {
            let mut acc = 1.0;
            for f in factors {
                acc *= eval(f, store, arrays, scalars, indices)?;
            }
            Ok(acc)
        }
        ExprKind::Div(a, b) => Ok(eval(a, store, arrays, scalars, indices)? / eval(b, store, arrays, scalars, indices)?),
        ExprKind::Pow(a, b) => Ok(eval(a, store, arrays, scalars, indices)?.powf(eval(b, store, arrays, scalars, indices)?)),
        ExprKind::Call { name, args } => {
            let def = functions::lookup(name)
                .ok_or_else(|| CompileError::unsupported_equation(format!("unknown function '{name}'")))?;
            let vals = args
                .iter()
                .map(|a| eval(a, store, arrays, scalars, indices))
                .collect::<Result<Vec<_>, _>>()?;
            (def.eval)(&vals).ok_or_else(|| CompileError::unsupported_equation(format!("'{name}' argument out of domain")))
        }
    }
}
