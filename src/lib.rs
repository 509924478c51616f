//! Tensor-contraction equation compiler.
//!
//! Analyzes one Einstein-summation-style equation string (or a
//! [`parser::builder::EquationBuilder`] tree) against a set of bound
//! arrays/scalars, solves every free and reduction index to a concrete
//! axis, and produces a forward kernel — and, on request, its gradient —
//! directly callable against [`Tensor`] storage. There is no macro
//! expansion and no external code emitter: [`CompiledEquation`] holds the
//! analyzed [`Store`] and runs the loop nest itself (§4.E).
//!
//! # Usage Examples
//!
//! ## One-shot contraction
//! ```
//! use rustc_hash::FxHashMap;
//! use tensorein::{contract, Tensor};
//!
//! let mut arrays = FxHashMap::default();
//! arrays.insert("A".to_string(), Tensor::from_data(vec![1..=2, 1..=2], vec![1.0, 2.0, 3.0, 4.0]));
//! arrays.insert("B".to_string(), Tensor::from_data(vec![1..=2, 1..=2], vec![5.0, 6.0, 7.0, 8.0]));
//!
//! let z = contract("Z[i,k] := A[i,j] * B[j,k]", &arrays).unwrap();
//! assert_eq!(z.get(&[1, 1]), Some(19.0));
//! ```
//!
//! ## Reusing an analyzed equation, then differentiating it
//! ```
//! use rustc_hash::FxHashMap;
//! use tensorein::{CompiledEquation, Options, Tensor};
//!
//! let mut arrays = FxHashMap::default();
//! arrays.insert("A".to_string(), Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0]));
//! arrays.insert("B".to_string(), Tensor::from_data(vec![1..=3], vec![4.0, 5.0, 6.0]));
//!
//! let compiled = CompiledEquation::compile("s := A[i] * B[i]", &arrays, Options::default()).unwrap();
//! let out = compiled.forward(&arrays, &FxHashMap::default()).unwrap();
//! assert_eq!(out.as_scalar(), 32.0);
//!
//! let mut opts = Options::default();
//! opts.grad = tensorein::GradStrategy::Symbolic;
//! let compiled = CompiledEquation::compile("s := A[i] * B[i]", &arrays, opts).unwrap();
//! let dz = Tensor::scalar(1.0);
//! let grads = compiled.gradient(&dz, &arrays, &FxHashMap::default()).unwrap();
//! assert_eq!(grads["A"].data(), &[4.0, 5.0, 6.0]);
//! ```

pub mod alloc;
pub mod analyzer;
pub mod backend;
pub mod constraints;
pub mod core;
pub mod eval;
pub mod functions;
pub mod grad;
pub mod parser;
pub mod synth;
pub mod tensor;

pub use crate::core::{
    Avx, CompileError, CudaBlock, Expr, ExprKind, Flags, GradStrategy, Options, RangeDecl, RawIndex, ReductionOp, Span, Store, Sym, SymbolTable,
    Threads,
};
pub use backend::{
    registration_fragments, tracked_array_names, AdjointRule, BackendCapabilities, DifferentiationRule, RegistrationFragment, TrackedArrayOverload,
};
pub use parser::{parse_equation, parse_range_decls, AssignOp, Equation, EquationBuilder, LhsIndexArg, PExpr, PIndex, PLhs, PLhsIndex};
pub use synth::{Keep, StorageKind};
pub use tensor::Tensor;

use rustc_hash::FxHashMap;
use synth::Threader;

fn ranks_of(arrays: &FxHashMap<String, Tensor>) -> FxHashMap<String, usize> {
    arrays.iter().map(|(name, t)| (name.clone(), t.rank())).collect()
}

/// One equation, analyzed and range-solved against a particular set of
/// bound array shapes (§3/§4.B/§4.C). Reusable across many `forward`/
/// `gradient` calls as long as the bound arrays keep the same shapes —
/// exactly the "compile once, run many times" split the specification's
/// driver/kernel separation describes.
#[derive(Debug)]
pub struct CompiledEquation {
    store: Store,
    opts: Options,
}

impl CompiledEquation {
    /// Parse `equation`, analyze it, and solve every index range against
    /// `arrays`' shapes (§4.B/§4.C). `opts` governs every later `forward`/
    /// `gradient` call.
    ///
    /// # Errors
    /// Any [`CompileError`] raised while parsing, analyzing, or range-solving.
    pub fn compile(equation: &str, arrays: &FxHashMap<String, Tensor>, opts: Options) -> Result<Self, CompileError> {
        Self::compile_with_declarations(equation, &[], arrays, opts)
    }

    /// As [`CompiledEquation::compile`], plus user-declared index ranges
    /// (§4.A/§6, `i ∈ 1:N`) parsed with [`parse_range_decls`]. Lets an
    /// otherwise-unconstrained index — e.g. the entangled `j` in `A[i+j]`,
    /// where neither side is resolvable from an array shape alone — become
    /// solvable.
    ///
    /// # Errors
    /// Any [`CompileError`] raised while parsing, analyzing, or range-solving.
    pub fn compile_with_declarations(
        equation: &str,
        declarations: &[RangeDecl],
        arrays: &FxHashMap<String, Tensor>,
        opts: Options,
    ) -> Result<Self, CompileError> {
        let parsed = parse_equation(equation)?;
        Self::from_equation_with_declarations(&parsed, declarations, arrays, opts)
    }

    /// As [`CompiledEquation::compile`], but from an already-built
    /// [`Equation`] tree (e.g. from [`EquationBuilder`]) instead of source text.
    ///
    /// # Errors
    /// Any [`CompileError`] raised while analyzing or range-solving.
    pub fn from_equation(equation: &Equation, arrays: &FxHashMap<String, Tensor>, opts: Options) -> Result<Self, CompileError> {
        Self::from_equation_with_declarations(equation, &[], arrays, opts)
    }

    /// As [`CompiledEquation::from_equation`], plus user-declared index
    /// ranges (§4.A/§6). See [`CompiledEquation::compile_with_declarations`].
    ///
    /// # Errors
    /// Any [`CompileError`] raised while analyzing or range-solving.
    pub fn from_equation_with_declarations(
        equation: &Equation,
        declarations: &[RangeDecl],
        arrays: &FxHashMap<String, Tensor>,
        opts: Options,
    ) -> Result<Self, CompileError> {
        let ranks = ranks_of(arrays);
        let mut store = analyzer::analyze(equation, &ranks)?;
        constraints::apply_declarations(&mut store, declarations);
        constraints::solve(&mut store, arrays)?;
        Ok(CompiledEquation { store, opts })
    }

    /// The analyzed store, for introspection (e.g. [`Store::verbose_dump`]).
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The options this equation was compiled with.
    #[must_use]
    pub fn options(&self) -> Options {
        self.opts
    }

    /// Allocate a fresh output array and run the forward kernel once
    /// (§4.D/§4.E), dispatching on [`Options::threads`] and the storage
    /// specialization [`synth::storage_kind_of`] selects.
    ///
    /// # Errors
    /// Any [`CompileError`] the allocator or kernel raises.
    pub fn forward(&self, arrays: &FxHashMap<String, Tensor>, scalars: &FxHashMap<String, f64>) -> Result<Tensor, CompileError> {
        let mut out = alloc::allocate(&self.store, &self.opts, arrays, scalars)?;
        self.forward_into(&mut out, arrays, scalars, Keep::Fresh)?;
        Ok(out)
    }

    /// Run the forward kernel into an existing array, per `keep` (§6): a
    /// repeated call with `keep = Keep::Continue` accumulates into `out`
    /// rather than starting from `redfun`'s identity.
    ///
    /// # Errors
    /// Any [`CompileError`] the kernel raises.
    pub fn forward_into(
        &self,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        keep: Keep,
    ) -> Result<(), CompileError> {
        let outer = synth::outer_specs(&self.store);
        match self.opts.threads {
            Threads::Disabled => self.run_unthreaded(out, arrays, scalars, &outer, keep),
            Threads::Auto => {
                let block = synth::block_threshold(&self.store);
                self.run_threaded(out, arrays, scalars, &outer, block, keep)
            }
            Threads::MinBlock(block) => self.run_threaded(out, arrays, scalars, &outer, block, keep),
        }
    }

    fn run_unthreaded(
        &self,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer: &[(Sym, std::ops::RangeInclusive<i64>)],
        keep: Keep,
    ) -> Result<(), CompileError> {
        match synth::storage_kind_of(&self.store, &self.opts) {
            StorageKind::Host | StorageKind::Device => synth::apply(&self.store, out, arrays, scalars, outer, keep),
            StorageKind::HostVectorizable => self.run_vectorized(out, arrays, scalars, outer, keep),
        }
    }

    #[cfg(feature = "parallel")]
    fn run_vectorized(
        &self,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer: &[(Sym, std::ops::RangeInclusive<i64>)],
        keep: Keep,
    ) -> Result<(), CompileError> {
        synth::vectorized::apply(&self.store, out, arrays, scalars, outer, keep)
    }

    #[cfg(not(feature = "parallel"))]
    fn run_vectorized(
        &self,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer: &[(Sym, std::ops::RangeInclusive<i64>)],
        keep: Keep,
    ) -> Result<(), CompileError> {
        // storage_kind_of only returns HostVectorizable when the `parallel`
        // feature (which also gates `wide`) is enabled, so this arm is
        // unreachable without it; kept so the match above stays exhaustive
        // across feature combinations.
        synth::apply(&self.store, out, arrays, scalars, outer, keep)
    }

    fn run_threaded(
        &self,
        out: &mut Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
        outer: &[(Sym, std::ops::RangeInclusive<i64>)],
        block: usize,
        keep: Keep,
    ) -> Result<(), CompileError> {
        if !matches!(keep, Keep::Fresh) {
            // A threaded split hands each worker a disjoint output slice
            // (§5); `Keep::Continue` reads the *current* output first, so
            // it only has well-defined semantics run un-split.
            return self.run_unthreaded(out, arrays, scalars, outer, keep);
        }
        #[cfg(feature = "parallel")]
        {
            synth::RayonThreader.run(&self.store, out, arrays, scalars, outer, block)
        }
        #[cfg(not(feature = "parallel"))]
        {
            synth::SequentialThreader.run(&self.store, out, arrays, scalars, outer, block)
        }
    }

    /// Synthesize the gradient with respect to every RHS array (§4.F),
    /// given the adjoint `dz` of the forward output and the same
    /// bindings the forward kernel ran with. Returns an empty map if
    /// [`Options::grad`] is [`GradStrategy::None`] or the equation raised
    /// `nograd` during canonicalization.
    ///
    /// # Errors
    /// Any [`CompileError`] the chosen strategy's evaluator raises.
    pub fn gradient(
        &self,
        dz: &Tensor,
        arrays: &FxHashMap<String, Tensor>,
        scalars: &FxHashMap<String, f64>,
    ) -> Result<FxHashMap<String, Tensor>, CompileError> {
        grad::gradient(&self.store, &self.opts, dz, arrays, scalars)
    }

    /// Build backend registration descriptors for this equation (§4.G),
    /// naming both kernels after `fingerprint` and listing the RHS arrays
    /// eligible for whichever idiom `caps` enables.
    #[must_use]
    pub fn backend_fragments(&self, caps: BackendCapabilities, fingerprint: &str) -> Vec<RegistrationFragment> {
        let tracked = tracked_array_names(&self.store.symbols, self.store.arrays.iter());
        registration_fragments(caps, fingerprint, &tracked)
    }
}

/// Parse, analyze, range-solve, and run `equation` against `arrays` in one
/// call, with [`Options::default`] and no scalar bindings. Equivalent to
/// `CompiledEquation::compile(equation, arrays, Options::default())?.forward(arrays, &FxHashMap::default())`.
///
/// # Errors
/// Any [`CompileError`] raised while compiling or running the equation.
///
/// # Note
/// For scalar interpolation, non-default options, or a reusable compiled
/// kernel, use [`CompiledEquation`] directly.
pub fn contract(equation: &str, arrays: &FxHashMap<String, Tensor>) -> Result<Tensor, CompileError> {
    CompiledEquation::compile(equation, arrays, Options::default())?.forward(arrays, &FxHashMap::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_map(pairs: Vec<(&str, Tensor)>) -> FxHashMap<String, Tensor> {
        pairs.into_iter().map(|(n, t)| (n.to_string(), t)).collect()
    }

    #[test]
    fn contract_runs_a_matmul_end_to_end() {
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=2, 1..=2], vec![1.0, 2.0, 3.0, 4.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=2], vec![5.0, 6.0, 7.0, 8.0])),
        ]);
        let z = contract("Z[i,k] := A[i,j] * B[j,k]", &arrays).expect("contract");
        assert_eq!(z.get(&[1, 1]), Some(19.0));
        assert_eq!(z.get(&[2, 2]), Some(50.0));
    }

    #[test]
    fn compiled_equation_can_be_reused_across_forward_calls() {
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=1, 1..=2], vec![1.0, 2.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=1], vec![3.0, 4.0])),
        ]);
        let compiled = CompiledEquation::compile("Z[i,k] := A[i,j] * B[j,k]", &arrays, Options::default()).expect("compile");
        let first = compiled.forward(&arrays, &FxHashMap::default()).expect("first forward");
        assert_eq!(first.get(&[1, 1]), Some(11.0));

        let other = array_map(vec![
            ("A", Tensor::from_data(vec![1..=1, 1..=2], vec![5.0, 1.0])),
            ("B", Tensor::from_data(vec![1..=2, 1..=1], vec![1.0, 1.0])),
        ]);
        let second = compiled.forward(&other, &FxHashMap::default()).expect("second forward");
        assert_eq!(second.get(&[1, 1]), Some(6.0));
    }

    #[test]
    fn gradient_is_empty_when_strategy_is_none() {
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0]))]);
        let compiled = CompiledEquation::compile("s := A[i] * A[i]", &arrays, Options::default()).expect("compile");
        let dz = Tensor::scalar(1.0);
        let grads = compiled.gradient(&dz, &arrays, &FxHashMap::default()).expect("gradient");
        assert!(grads.is_empty());
    }

    #[test]
    fn gradient_strategy_symbolic_differentiates_a_dot_product() {
        let arrays = array_map(vec![
            ("A", Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0])),
            ("B", Tensor::from_data(vec![1..=3], vec![4.0, 5.0, 6.0])),
        ]);
        let mut opts = Options::default();
        opts.grad = GradStrategy::Symbolic;
        let compiled = CompiledEquation::compile("s := A[i] * B[i]", &arrays, opts).expect("compile");
        let dz = Tensor::scalar(1.0);
        let grads = compiled.gradient(&dz, &arrays, &FxHashMap::default()).expect("gradient");
        assert_eq!(grads["A"].data(), &[4.0, 5.0, 6.0]);
        assert_eq!(grads["B"].data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn backend_fragments_name_kernels_after_the_fingerprint() {
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0]))]);
        let compiled = CompiledEquation::compile("s := A[i] * A[i]", &arrays, Options::default()).expect("compile");
        let caps = BackendCapabilities { adjoint_rule: true, ..BackendCapabilities::none() };
        let fragments = compiled.backend_fragments(caps, "eq_0");
        assert_eq!(fragments.len(), 1);
    }

    #[test]
    fn compile_with_declarations_resolves_an_otherwise_unconstrained_index() {
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=5], vec![1.0, 2.0, 3.0, 4.0, 5.0]))]);
        let declarations = parse_range_decls("j ∈ 1:2").expect("parse declarations");
        let compiled = CompiledEquation::compile_with_declarations("Z[i] := A[i+j]", &declarations, &arrays, Options::default()).expect("compile");
        let out = compiled.forward(&arrays, &FxHashMap::default()).expect("forward");
        assert_eq!(out.axes(), &[0..=3]);
        assert_eq!(out.get(&[0]), Some(3.0));
    }

    #[test]
    fn equation_builder_round_trips_through_compile() {
        let arrays = array_map(vec![("A", Tensor::from_data(vec![1..=3], vec![1.0, 2.0, 3.0]))]);
        let equation = EquationBuilder::new("s").rhs(PExpr::Array { name: "A".into(), indices: vec![PIndex::Symbol("i".into())] }).build().expect("build");
        let compiled = CompiledEquation::from_equation(&equation, &arrays, Options::default()).expect("compile");
        let out = compiled.forward(&arrays, &FxHashMap::default()).expect("forward");
        assert_eq!(out.as_scalar(), 6.0);
    }
}
