//! Backend hooks (§4.G): registration-fragment descriptors for whichever
//! reverse-mode AD framework a caller has in scope.
//!
//! The core never links against a concrete AD crate — §9's redesign note
//! re-expresses "register the forward/adjoint pair per framework idiom" as
//! an explicit capability flag set at driver construction, with one small
//! descriptor builder per registration idiom. A caller combines a
//! [`BackendCapabilities`] set with a compiled equation to decide which
//! descriptors, if any, to hand to its own AD framework's registration API.

use crate::core::symbol::Sym;

/// Which reverse-mode AD registration idioms a caller's scope exposes.
/// Every field defaults to `false`; a caller turns on only the idioms its
/// own dependencies actually provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// An adjoint-rule idiom (`@adjoint`-style): register a forward
    /// function alongside a closure computing its pullback.
    pub adjoint_rule: bool,
    /// A tracked-array overload idiom: the forward function is overloaded
    /// to accept a tracked array wrapper that records the operation graph.
    pub tracked_array_overload: bool,
    /// A differentiation-rule idiom: register a standalone
    /// forward-derivative pair keyed by operator name.
    pub differentiation_rule: bool,
}

impl BackendCapabilities {
    /// No backend hooks — the default.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any registration idiom is enabled.
    #[must_use]
    pub fn any(self) -> bool {
        self.adjoint_rule || self.tracked_array_overload || self.differentiation_rule
    }
}

/// A descriptor for registering `create`/`∇create` with an adjoint-rule
/// idiom: the AD framework associates `forward_name` with a pullback
/// built from `gradient_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjointRule {
    /// The forward kernel's generated name.
    pub forward_name: String,
    /// The gradient kernel's generated name.
    pub gradient_name: String,
    /// RHS arrays the pullback must be wired for, in appearance order.
    pub tracked_arrays: Vec<String>,
}

/// A descriptor for registering a tracked-array overload: the forward
/// kernel gains an additional dispatch path accepting the framework's
/// tracked-array wrapper type in place of any of `tracked_arrays`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedArrayOverload {
    /// The forward kernel's generated name.
    pub forward_name: String,
    /// RHS arrays eligible for the tracked wrapper, in appearance order.
    pub tracked_arrays: Vec<String>,
}

/// A descriptor for registering a standalone differentiation rule: the
/// framework looks up `gradient_name` by `forward_name` rather than
/// wrapping either one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferentiationRule {
    /// The forward kernel's generated name.
    pub forward_name: String,
    /// The gradient kernel's generated name.
    pub gradient_name: String,
}

/// Build every registration descriptor `caps` asks for, naming both
/// kernels after `fingerprint` (a caller-chosen stable identifier for the
/// compiled equation) and listing `tracked_arrays` in first-appearance
/// order.
#[must_use]
pub fn registration_fragments(
    caps: BackendCapabilities,
    fingerprint: &str,
    tracked_arrays: &[String],
) -> Vec<RegistrationFragment> {
    let forward_name = format!("{fingerprint}::create");
    let gradient_name = format!("{fingerprint}::grad_create");
    let mut fragments = Vec::new();
    if caps.adjoint_rule {
        fragments.push(RegistrationFragment::Adjoint(AdjointRule {
            forward_name: forward_name.clone(),
            gradient_name: gradient_name.clone(),
            tracked_arrays: tracked_arrays.to_vec(),
        }));
    }
    if caps.tracked_array_overload {
        fragments.push(RegistrationFragment::TrackedArray(TrackedArrayOverload {
            forward_name: forward_name.clone(),
            tracked_arrays: tracked_arrays.to_vec(),
        }));
    }
    if caps.differentiation_rule {
        fragments.push(RegistrationFragment::Differentiation(DifferentiationRule { forward_name, gradient_name }));
    }
    fragments
}

/// One of the descriptor kinds [`registration_fragments`] can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFragment {
    /// See [`AdjointRule`].
    Adjoint(AdjointRule),
    /// See [`TrackedArrayOverload`].
    TrackedArray(TrackedArrayOverload),
    /// See [`DifferentiationRule`].
    Differentiation(DifferentiationRule),
}

/// Render `arrays` (RHS array symbols, first-appearance order) to the
/// plain string names [`registration_fragments`] expects.
#[must_use]
pub fn tracked_array_names(symbols: &crate::core::symbol::SymbolTable, arrays: impl IntoIterator<Item = Sym>) -> Vec<String> {
    arrays.into_iter().map(|a| symbols.name(a).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_capabilities_yields_no_fragments() {
        let fragments = registration_fragments(BackendCapabilities::none(), "eq_1", &["A".to_string()]);
        assert!(fragments.is_empty());
    }

    #[test]
    fn adjoint_capability_names_both_kernels_after_the_fingerprint() {
        let caps = BackendCapabilities { adjoint_rule: true, ..BackendCapabilities::none() };
        let fragments = registration_fragments(caps, "eq_7", &["A".to_string(), "B".to_string()]);
        assert_eq!(fragments.len(), 1);
        match &fragments[0] {
            RegistrationFragment::Adjoint(rule) => {
                assert_eq!(rule.forward_name, "eq_7::create");
                assert_eq!(rule.gradient_name, "eq_7::grad_create");
                assert_eq!(rule.tracked_arrays, vec!["A".to_string(), "B".to_string()]);
            }
            other => unreachable!("expected Adjoint, got {other:?}"),
        }
    }

    #[test]
    fn every_capability_produces_its_own_fragment() {
        let caps = BackendCapabilities { adjoint_rule: true, tracked_array_overload: true, differentiation_rule: true };
        assert!(caps.any());
        let fragments = registration_fragments(caps, "eq_9", &[]);
        assert_eq!(fragments.len(), 3);
    }
}
