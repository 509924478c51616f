//! Call-site options (§4.A) and the process-wide default snapshot (§9).
//!
//! The source language mutates module-scoped cells whenever an invocation
//! carries no equation. Re-expressed here as an explicit
//! [`set_defaults`]/[`defaults`] pair over one `RwLock<Options>`, seeded
//! lazily from the environment the first time it is touched.

use std::sync::{OnceLock, RwLock};

/// Threading strategy: disabled, automatic, or a fixed minimum block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threads {
    /// Never split work across threads.
    Disabled,
    /// Split automatically once per-call work exceeds a cost-derived threshold.
    Auto,
    /// Split once a sub-range's estimated work exceeds this many elements.
    MinBlock(usize),
}

/// Vectorization strategy: disabled, automatic, or a fixed unroll factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Avx {
    /// Never vectorize the innermost loop.
    Disabled,
    /// Vectorize with the backend's natural lane width.
    Auto,
    /// Vectorize with an explicit unroll factor.
    Unroll(usize),
}

/// Gradient synthesis strategy (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradStrategy {
    /// No gradient kernel is synthesized.
    None,
    /// Reverse-mode via a symbolic differentiation rule table.
    Symbolic,
    /// Reverse-mode via dual-number evaluation.
    Dual,
}

/// GPU block size; `0` disables the device specialization.
pub type CudaBlock = u32;

/// One user-declared index range (§4.A "extra range declarations", §4.C
/// "user-declared range" candidate, §6 `i ∈ 1:N` syntax), supplied at the
/// call site alongside — not inside — the equation text. Feeding this into
/// [`crate::constraints::apply_declarations`] before
/// [`crate::constraints::solve`] lets an otherwise-unconstrained index (an
/// entangled `A[i+j]` with neither side resolvable from an array shape)
/// become solvable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDecl {
    /// The index symbol this range is declared for.
    pub index: String,
    /// Inclusive lower bound.
    pub lo: i64,
    /// Inclusive upper bound.
    pub hi: i64,
}

/// The options recognized at a call site (§4.A), after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Dump the `Store` after analysis.
    pub verbose: bool,
    /// Threading strategy.
    pub threads: Threads,
    /// Gradient synthesis strategy.
    pub grad: GradStrategy,
    /// Vectorization strategy.
    pub avx: Avx,
    /// GPU block size (`0` disables).
    pub cuda: CudaBlock,
    /// Whether the allocator may assume non-1-origin ("offset") axes are
    /// supported by the storage backend (§4.D.3). This crate's `Tensor`
    /// always supports them; set to `false` to exercise the 1-origin
    /// fallback path.
    pub offset_arrays: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            verbose: false,
            threads: Threads::Auto,
            grad: GradStrategy::None,
            avx: Avx::Auto,
            cuda: 0,
            offset_arrays: true,
        }
    }
}

static DEFAULTS: OnceLock<RwLock<Options>> = OnceLock::new();

fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.as_str() {
        "0" | "false" | "off" => Some(false),
        "1" | "true" | "on" => Some(true),
        _ => None,
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn seed_from_environment() -> Options {
    let mut opts = Options::default();
    if let Some(t) = env_flag("TENSOREIN_THREADS") {
        opts.threads = if t { Threads::Auto } else { Threads::Disabled };
    }
    if let Some(n) = env_usize("TENSOREIN_THREADS") {
        opts.threads = Threads::MinBlock(n);
    }
    if let Some(a) = env_flag("TENSOREIN_AVX") {
        opts.avx = if a { Avx::Auto } else { Avx::Disabled };
    }
    if let Some(n) = env_usize("TENSOREIN_AVX") {
        opts.avx = Avx::Unroll(n);
    }
    if let Some(n) = env_usize("TENSOREIN_CUDA") {
        #[allow(clippy::cast_possible_truncation, reason = "block sizes fit comfortably in u32")]
        {
            opts.cuda = n as u32;
        }
    }
    if let Ok(g) = std::env::var("TENSOREIN_GRAD") {
        opts.grad = match g.as_str() {
            "symbolic" => GradStrategy::Symbolic,
            "dual" => GradStrategy::Dual,
            _ => GradStrategy::None,
        };
    }
    opts
}

fn registry() -> &'static RwLock<Options> {
    DEFAULTS.get_or_init(|| RwLock::new(seed_from_environment()))
}

/// Read a snapshot of the current process-wide option defaults.
///
/// # Panics
/// Panics if the default registry lock is poisoned.
#[must_use]
pub fn defaults() -> Options {
    *registry().read().expect("option defaults lock poisoned")
}

/// Overwrite the process-wide option defaults. Mirrors the source
/// language's "invocation with no equation updates defaults" behavior,
/// made an explicit call instead of a side effect of option parsing.
///
/// # Panics
/// Panics if the default registry lock is poisoned.
pub fn set_defaults(opts: Options) {
    *registry().write().expect("option defaults lock poisoned") = opts;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let mut custom = Options::default();
        custom.verbose = true;
        custom.threads = Threads::MinBlock(64);
        set_defaults(custom);
        let read_back = defaults();
        assert!(read_back.verbose);
        assert_eq!(read_back.threads, Threads::MinBlock(64));
        // restore so other tests in this process see the documented default
        set_defaults(Options::default());
    }
}
