//! Configuration for the compiler front end.
//!
//! This module provides [`CompilerConfig`], which controls the inlining policy, the
//! node budget and the optional local optimizations applied while the graph is
//! constructed, plus [`UnresolvedPolicy`], which decides how database answers of
//! "not yet resolved" are reported.

/// How the graph builder reports references the program database could not resolve.
///
/// Both policies build the same graph: an unresolved access gets a full state
/// snapshot, is flagged as needing patching and is excluded from memory-cache
/// optimizations and inlining. Neither policy turns an unresolved reference into a
/// bailout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Snapshot state and continue; nothing else is recorded.
    #[default]
    Conservative,
    /// Snapshot state and record a [`crate::compiler::RecompileHint`] for every
    /// unresolved entity, so a higher layer can recompile once it is loaded.
    DeferRecompile,
}

/// Configuration for one compile request.
///
/// Controls the inlining thresholds, the node budget and which of the local
/// optimizations run during graph construction. A single configuration can be shared
/// by any number of concurrent compiles.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Bytecode size limit for callees inlined into the root method (default: 35).
    pub max_inline_size: usize,

    /// Lower bound for the size limit of nested inlining scopes (default: 6).
    pub max_trivial_size: usize,

    /// Percentage of the parent scope's size limit granted to a nested scope (default: 90).
    pub nested_inlining_size_ratio: usize,

    /// Maximum inlining depth (default: 9).
    pub max_inline_level: usize,

    /// Maximum number of times one method may appear on the inlining chain (default: 1).
    pub max_recursive_inline_level: usize,

    /// Maximum `max_stack + max_locals - parameter slots` of a non-recursive callee (default: 10).
    pub inline_stack_limit: usize,

    /// Total bytecode size that may be inlined into one compile (default: 8000).
    pub desired_method_limit: usize,

    /// Node budget for one compile; reaching it is a bailout (default: 37000).
    pub instruction_count_cutoff: usize,

    /// Enable inlining of statically bindable calls.
    pub enable_inlining: bool,

    /// Allow inlining callees that declare exception handlers.
    pub inline_methods_with_exception_handlers: bool,

    /// Allow inlining synchronized callees.
    pub inline_synchronized_methods: bool,

    /// Run the canonicalizer on every node before it is appended.
    pub canonicalize_nodes: bool,

    /// Enable the memory value cache for field loads and stores.
    pub eliminate_field_access: bool,

    /// Enable per-block value numbering of pure nodes.
    pub use_local_value_numbering: bool,

    /// Only create phis at loop headers for locals written inside a loop.
    ///
    /// When disabled every local gets a phi at every loop header.
    pub selective_phi_functions: bool,

    /// Run the phi simplifier after construction.
    pub eliminate_redundant_phis: bool,

    /// Reporting policy for unresolved references.
    pub unresolved_policy: UnresolvedPolicy,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_inline_size: 35,
            max_trivial_size: 6,
            nested_inlining_size_ratio: 90,
            max_inline_level: 9,
            max_recursive_inline_level: 1,
            inline_stack_limit: 10,
            desired_method_limit: 8000,
            instruction_count_cutoff: 37000,
            enable_inlining: true,
            inline_methods_with_exception_handlers: true,
            inline_synchronized_methods: true,
            canonicalize_nodes: true,
            eliminate_field_access: true,
            use_local_value_numbering: true,
            selective_phi_functions: true,
            eliminate_redundant_phis: true,
            unresolved_policy: UnresolvedPolicy::Conservative,
        }
    }
}

impl CompilerConfig {
    /// Creates a new configuration with default settings.
    ///
    /// # Returns
    ///
    /// A new `CompilerConfig` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that never inlines.
    ///
    /// Every call is emitted as an `Invoke`; all other optimizations stay enabled.
    #[must_use]
    pub fn no_inlining() -> Self {
        Self {
            enable_inlining: false,
            ..Self::default()
        }
    }

    /// Creates an "aggressive" configuration with raised inlining limits.
    ///
    /// This configuration uses:
    /// - Larger callees (100 bytes at the top level)
    /// - Deeper inlining chains (15 levels) with two levels of recursion
    /// - A doubled inlined-bytecode budget
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_inline_size: 100,
            max_inline_level: 15,
            max_recursive_inline_level: 2,
            inline_stack_limit: 20,
            desired_method_limit: 16000,
            ..Self::default()
        }
    }

    /// Sets the unresolved-reference policy.
    ///
    /// # Arguments
    ///
    /// * `policy` - The policy to apply.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_unresolved_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    /// Sets the node budget.
    #[must_use]
    pub fn with_instruction_count_cutoff(mut self, cutoff: usize) -> Self {
        self.instruction_count_cutoff = cutoff;
        self
    }

    /// Returns the callee size limit for a scope at the given inlining level.
    ///
    /// The root method's direct callees get `max_inline_size`; each nested level
    /// shrinks the limit by `nested_inlining_size_ratio`, never below
    /// `max_trivial_size`.
    #[must_use]
    pub fn inline_size_for_level(&self, parent_limit: usize, level: usize) -> usize {
        if level == 0 {
            self.max_inline_size
        } else {
            (parent_limit * self.nested_inlining_size_ratio / 100).max(self.max_trivial_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.max_inline_size, 35);
        assert_eq!(config.instruction_count_cutoff, 37000);
        assert!(config.enable_inlining);
        assert_eq!(config.unresolved_policy, UnresolvedPolicy::Conservative);
    }

    #[test]
    fn test_presets() {
        assert!(!CompilerConfig::no_inlining().enable_inlining);
        let aggressive = CompilerConfig::aggressive();
        assert!(aggressive.max_inline_size > CompilerConfig::default().max_inline_size);
        assert!(aggressive.canonicalize_nodes);
    }

    #[test]
    fn test_nested_inline_size() {
        let config = CompilerConfig::default();
        assert_eq!(config.inline_size_for_level(0, 0), 35);
        assert_eq!(config.inline_size_for_level(35, 1), 31);
        assert_eq!(config.inline_size_for_level(5, 3), 6);
    }
}
