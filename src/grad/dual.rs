//! The dual-number strategy (§4.F): propagates the same functions-registry
//! rule table numerically instead of building an `Expr` per occurrence.
//! Every RHS array occurrence gets its own perturbation component, so two
//! occurrences of the same array at different index tuples (`A[i,k]` and
//! `A[k,j]` in `A[i,k]*A[k,j]`) don't get conflated into one derivative.

use super::{accumulate, collect_occurrences, reduction_derivative_factors, Occurrence};
use crate::core::error::CompileError;
use crate::core::expr::{Expr, ExprKind};
use crate::core::store::Store;
use crate::core::symbol::Sym;
use crate::eval;
use crate::functions;
use crate::synth::{for_each_combo, output_coords, outer_specs, reduction_specs};
use crate::tensor::Tensor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

/// A real value paired with one partial-derivative component per tracked
/// array occurrence. First order only — `eps[i]*eps[j]` cross terms are
/// dropped, the usual dual-number linearization.
#[derive(Debug, Clone)]
struct Dual {
    re: f64,
    eps: Vec<f64>,
}

impl Dual {
    fn constant(re: f64, n: usize) -> Self {
        Dual { re, eps: vec![0.0; n] }
    }

    fn add(&self, other: &Dual) -> Dual {
        Dual { re: self.re + other.re, eps: self.eps.iter().zip(&other.eps).map(|(a, b)| a + b).collect() }
    }

    fn mul(&self, other: &Dual) -> Dual {
        Dual {
            re: self.re * other.re,
            eps: self.eps.iter().zip(&other.eps).map(|(a, b)| a * other.re + b * self.re).collect(),
        }
    }

    fn div(&self, other: &Dual) -> Dual {
        let denom = other.re * other.re;
        Dual {
            re: self.re / other.re,
            eps: self.eps.iter().zip(&other.eps).map(|(a, b)| (a * other.re - self.re * b) / denom).collect(),
        }
    }

    fn pow(&self, other: &Dual) -> Dual {
        let re = self.re.powf(other.re);
        let d_base = other.re * self.re.powf(other.re - 1.0);
        let d_exp = if self.re > 0.0 { re * self.re.ln() } else { 0.0 };
        Dual { re, eps: self.eps.iter().zip(&other.eps).map(|(a, b)| d_base * a + d_exp * b).collect() }
    }
}

#[allow(clippy::too_many_arguments, reason = "mirrors eval::eval's context plus the occurrence tracking this strategy adds")]
fn eval_dual(
    expr: &Expr,
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    indices: &FxHashMap<Sym, i64>,
    occurrences: &[Occurrence],
    path: &mut Vec<usize>,
    n: usize,
) -> Result<Dual, CompileError> {
    match &expr.kind {
        ExprKind::Number(lit) => Ok(Dual::constant(lit.0, n)),
        ExprKind::Scalar(s) => {
            let name = store.symbols.name(*s);
            let value = scalars
                .get(name)
                .copied()
                .ok_or_else(|| CompileError::unsupported_equation(format!("scalar '{name}' has no bound value")))?;
            Ok(Dual::constant(value, n))
        }
        ExprKind::Array { .. } => {
            let re = eval::eval(expr, store, arrays, scalars, indices)?;
            let mut d = Dual::constant(re, n);
            if let Some(pos) = occurrences.iter().position(|occ| occ.path == *path) {
                d.eps[pos] = 1.0;
            }
            Ok(d)
        }
        ExprKind::Sum(terms) => {
            let mut acc = Dual::constant(0.0, n);
            for (i, t) in terms.iter().enumerate() {
                path.push(i);
                let d = eval_dual(t, store, arrays, scalars, indices, occurrences, path, n)?;
                path.pop();
                acc = acc.add(&d);
            }
            Ok(acc)
        }
        ExprKind::Product(factors) => {
            let mut acc = Dual::constant(1.0, n);
            for (i, f) in factors.iter().enumerate() {
                path.push(i);
                let d = eval_dual(f, store, arrays, scalars, indices, occurrences, path, n)?;
                path.pop();
                acc = acc.mul(&d);
            }
            Ok(acc)
        }
        ExprKind::Div(a, b) => {
            path.push(0);
            let da = eval_dual(a, store, arrays, scalars, indices, occurrences, path, n)?;
            path.pop();
            path.push(1);
            let db = eval_dual(b, store, arrays, scalars, indices, occurrences, path, n)?;
            path.pop();
            Ok(da.div(&db))
        }
        ExprKind::Pow(a, b) => {
            path.push(0);
            let da = eval_dual(a, store, arrays, scalars, indices, occurrences, path, n)?;
            path.pop();
            path.push(1);
            let db = eval_dual(b, store, arrays, scalars, indices, occurrences, path, n)?;
            path.pop();
            Ok(da.pow(&db))
        }
        ExprKind::Call { name, args } => {
            let def = functions::lookup(name).ok_or_else(|| CompileError::unsupported_equation(format!("unknown function '{name}'")))?;
            let mut arg_duals = Vec::with_capacity(args.len());
            for (i, a) in args.iter().enumerate() {
                path.push(i);
                arg_duals.push(eval_dual(a, store, arrays, scalars, indices, occurrences, path, n)?);
                path.pop();
            }
            let reals: Vec<f64> = arg_duals.iter().map(|d| d.re).collect();
            let re = (def.eval)(&reals).ok_or_else(|| CompileError::unsupported_equation(format!("'{name}' argument out of domain")))?;
            let mut eps = vec![0.0; n];
            for (i, ad) in arg_duals.iter().enumerate() {
                let partial_expr = (def.partial)(args, i);
                let partial_val = eval::eval(&partial_expr, store, arrays, scalars, indices)?;
                if partial_val == 0.0 {
                    continue;
                }
                for (k, e) in eps.iter_mut().enumerate() {
                    *e += partial_val * ad.eps[k];
                }
            }
            Ok(Dual { re, eps })
        }
    }
}

/// Accumulate every RHS array's dual-number gradient contribution into `grads`.
///
/// # Errors
/// Any [`CompileError`] the evaluator raises while walking the index space.
pub fn accumulate_into(
    store: &Store,
    dz: &Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    grads: &mut FxHashMap<String, Tensor>,
) -> Result<(), CompileError> {
    let occurrences = collect_occurrences(&store.right, None);
    let n = occurrences.len();
    let outer = outer_specs(store);
    let reduction = reduction_specs(store);

    let mut err = None;
    let mut outer_vars = FxHashMap::default();
    for_each_combo(&outer, &mut outer_vars, &mut |combo| {
        if err.is_some() {
            return;
        }
        if let Err(e) = accumulate_outer(store, dz, arrays, scalars, &occurrences, n, combo, &reduction, grads) {
            err = Some(e);
        }
    });
    err.map_or(Ok(()), Err)
}

#[allow(clippy::too_many_arguments, reason = "mirrors the forward kernel's own combo/reduction/grads threading")]
fn accumulate_outer(
    store: &Store,
    dz: &Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    occurrences: &[Occurrence],
    n: usize,
    outer: &FxHashMap<Sym, i64>,
    reduction: &[(Sym, RangeInclusive<i64>)],
    grads: &mut FxHashMap<String, Tensor>,
) -> Result<(), CompileError> {
    let out_coords = output_coords(store, outer);
    let dz_val = dz.get(&out_coords).ok_or_else(|| CompileError::unsupported_equation("adjoint index out of range"))?;
    if dz_val == 0.0 {
        return Ok(());
    }

    if reduction.is_empty() {
        let d = eval_dual(&store.right, store, arrays, scalars, outer, occurrences, &mut Vec::new(), n)?;
        return contribute(store, occurrences, outer, dz_val, &d.eps, grads);
    }

    let mut combos = Vec::new();
    let mut idx = outer.clone();
    for_each_combo(reduction, &mut idx, &mut |full| combos.push(full.clone()));

    let mut duals = Vec::with_capacity(combos.len());
    for combo in &combos {
        duals.push(eval_dual(&store.right, store, arrays, scalars, combo, occurrences, &mut Vec::new(), n)?);
    }
    let terms: Vec<f64> = duals.iter().map(|d| d.re).collect();
    let factors = reduction_derivative_factors(store.redfun, &terms);

    for ((combo, dual), factor) in combos.iter().zip(duals.iter()).zip(factors.iter()) {
        if *factor == 0.0 {
            continue;
        }
        contribute(store, occurrences, combo, dz_val * factor, &dual.eps, grads)?;
    }
    Ok(())
}

fn contribute(
    store: &Store,
    occurrences: &[Occurrence],
    combo: &FxHashMap<Sym, i64>,
    weight: f64,
    eps: &[f64],
    grads: &mut FxHashMap<String, Tensor>,
) -> Result<(), CompileError> {
    for (occ, component) in occurrences.iter().zip(eps) {
        if *component == 0.0 {
            continue;
        }
        let coords: Vec<i64> = occ.indices.iter().map(|ri| eval::eval_raw_index(ri, combo)).collect();
        let name = store.symbols.name(occ.array);
        if let Some(tensor) = grads.get_mut(name) {
            accumulate(tensor, name, &coords, weight * component)?;
        }
    }
    Ok(())
}
