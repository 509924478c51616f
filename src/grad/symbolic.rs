//! The symbolic strategy (§4.F): builds one [`Expr`] derivative per RHS
//! array occurrence — treating every other leaf, including other
//! occurrences of the same array, as constant — and evaluates it once per
//! index combination, scaled by the adjoint and the reduction operator's
//! per-term derivative factor.

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

/// `∂expr/∂(the array occurrence reached by `path`)`.
fn diff_at(expr: &Expr, path: &[usize]) -> Expr {
    let Some((&head, rest)) = path.split_first() else {
        return Expr::number(1.0);
    };
    match &expr.kind {
        ExprKind::Sum(terms) => diff_at(&terms[head], rest),
        ExprKind::Product(factors) => {
            let others: Vec<Expr> = factors.iter().enumerate().filter(|(i, _)| *i != head).map(|(_, f)| (**f).clone()).collect();
            Expr::product(vec![Expr::product(others), diff_at(&factors[head], rest)])
        }
        ExprKind::Div(a, b) => {
            if head == 0 {
                Expr::product(vec![Expr::div(Expr::number(1.0), (**b).clone()), diff_at(a, rest)])
            } else {
                let slope = Expr::div((**a).clone(), Expr::pow((**b).clone(), Expr::number(2.0))).negate();
                Expr::product(vec![slope, diff_at(b, rest)])
            }
        }
        ExprKind::Pow(a, b) => {
            if head == 0 {
                let exponent_minus_one = Expr::sum(vec![(**b).clone(), Expr::number(-1.0)]);
                Expr::product(vec![(**b).clone(), Expr::pow((**a).clone(), exponent_minus_one), diff_at(a, rest)])
            } else {
                let log_term = Expr::call("ln", vec![(**a).clone()]);
                Expr::product(vec![Expr::pow((**a).clone(), (**b).clone()), log_term, diff_at(b, rest)])
            }
        }
        ExprKind::Call { name, args } => {
            let def = functions::lookup(name).expect("occurrence path only walks registered calls");
            let outer = (def.partial)(args, head);
            Expr::product(vec![outer, diff_at(&args[head], rest)])
        }
        ExprKind::Number(_) | ExprKind::Scalar(_) | ExprKind::Array { .. } => {
            unreachable!("occurrence path ended one step early")
        }
    }
}

/// Accumulate every RHS array's symbolic gradient contribution into `grads`.
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
    let partials: Vec<(Occurrence, Expr)> =
        collect_occurrences(&store.right, None).into_iter().map(|occ| { let d = diff_at(&store.right, &occ.path); (occ, d) }).collect();

    let outer = outer_specs(store);
    let reduction = reduction_specs(store);

    let mut err = None;
    let mut outer_vars = FxHashMap::default();
    for_each_combo(&outer, &mut outer_vars, &mut |combo| {
        if err.is_some() {
            return;
        }
        if let Err(e) = accumulate_outer(store, dz, arrays, scalars, &partials, combo, &reduction, grads) {
            err = Some(e);
        }
    });
    err.map_or(Ok(()), Err)
}

fn accumulate_outer(
    store: &Store,
    dz: &Tensor,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    partials: &[(Occurrence, Expr)],
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
        return contribute(store, arrays, scalars, partials, outer, dz_val, grads);
    }

    let mut combos = Vec::new();
    let mut idx = outer.clone();
    for_each_combo(reduction, &mut idx, &mut |full| combos.push(full.clone()));

    let mut terms = Vec::with_capacity(combos.len());
    for combo in &combos {
        terms.push(eval::eval(&store.right, store, arrays, scalars, combo)?);
    }
    let factors = reduction_derivative_factors(store.redfun, &terms);

    for (combo, factor) in combos.iter().zip(factors.iter()) {
        if *factor == 0.0 {
            continue;
        }
        contribute(store, arrays, scalars, partials, combo, dz_val * factor, grads)?;
    }
    Ok(())
}

fn contribute(
    store: &Store,
    arrays: &FxHashMap<String, Tensor>,
    scalars: &FxHashMap<String, f64>,
    partials: &[(Occurrence, Expr)],
    combo: &FxHashMap<Sym, i64>,
    weight: f64,
    grads: &mut FxHashMap<String, Tensor>,
) -> Result<(), CompileError> {
    for (occ, partial) in partials {
        let partial_val = eval::eval(partial, store, arrays, scalars, combo)?;
        if partial_val == 0.0 {
            continue;
        }
        let coords: Vec<i64> = occ.indices.iter().map(|ri| eval::eval_raw_index(ri, combo)).collect();
        let name = store.symbols.name(occ.array);
        if let Some(tensor) = grads.get_mut(name) {
            accumulate(tensor, name, &coords, weight * partial_val)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc;
    use crate::analyzer::analyze;
    use crate::constraints;
    use crate::core::options::Options;
    use crate::parser::parse_equation;
    use crate::synth;

    #[test]
    fn matmul_gradient_matches_hand_worked_adjoint() {
        // Z[i,k] := A[i,j] * B[j,k]; dZ all ones => dA[i,j] = sum_k B[j,k], dB[j,k] = sum_i A[i,j]
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
        synth::apply(&store, &mut out, &arrays, &FxHashMap::default(), &synth::outer_specs(&store), synth::Keep::Fresh).expect("apply");

        let dz = Tensor::filled(out.axes().to_vec(), 1.0);
        let mut grads = FxHashMap::default();
        grads.insert("A".to_string(), Tensor::zeros(vec![1..=2, 1..=2]));
        grads.insert("B".to_string(), Tensor::zeros(vec![1..=2, 1..=2]));
        accumulate_into(&store, &dz, &arrays, &FxHashMap::default(), &mut grads).expect("gradient");

        let da = &grads["A"];
        // dA[i,j] = sum_k dZ[i,k]*B[j,k] = B[j,1]+B[j,2]
        assert!((da.get(&[1, 1]).unwrap() - (5.0 + 6.0)).abs() < 1e-9);
        assert!((da.get(&[1, 2]).unwrap() - (7.0 + 8.0)).abs() < 1e-9);

        let db = &grads["B"];
        // dB[j,k] = sum_i dZ[i,k]*A[i,j] = A[1,j]+A[2,j]
        assert!((db.get(&[1, 1]).unwrap() - (1.0 + 3.0)).abs() < 1e-9);
        assert!((db.get(&[2, 1]).unwrap() - (2.0 + 4.0)).abs() < 1e-9);
    }

    #[test]
    fn dot_product_gradient_is_the_other_operand() {
        let eq = parse_equation("s := A[i] * B[i]").expect("parse");
        let ranks = [("A".to_string(), 1), ("B".to_string(), 1)].into_iter().collect();
        let mut store = analyze(&eq, &ranks).expect("analyze");
        let arrays: FxHashMap<String, Tensor> = [
            ("A".to_string(), Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0])),
            ("B".to_string(), Tensor::from_data(vec![1..=3], vec![4.0, 5.0, 6.0])),
        ]
        .into_iter()
        .collect();
        constraints::solve(&mut store, &arrays).expect("solve");
        let dz = Tensor::scalar(1.0);
        let mut grads = FxHashMap::default();
        grads.insert("A".to_string(), Tensor::zeros(vec![1..=3]));
        grads.insert("B".to_string(), Tensor::zeros(vec![1..=3]));
        accumulate_into(&store, &dz, &arrays, &FxHashMap::default(), &mut grads).expect("gradient");
        assert_eq!(grads["A"].data(), &[4.0, 5.0, 6.0]);
        assert_eq!(grads["B"].data(), &[1.0, 2.0, 3.0]);
    }
}
