//! Compile entry points.
//!
//! A compile builds the graph of one method with the [`GraphBuilder`] and then runs
//! the post-construction passes on it:
//!
//! ```text
//! bytecode ──► BlockListBuilder ──► GraphBuilder ──► PhiSimplifier ──► Compilation
//!                                      │    ▲
//!                                      │    └── Canonicalizer, MemoryValueCache,
//!                                      │        ValueMap (per appended node)
//!                                      └──────► inlined callees (recursively)
//! ```
//!
//! A bailout anywhere in construction skips the passes and is returned as
//! [`crate::Error::Bailout`]. Each compile owns every structure it uses, so
//! [`compile_methods`] can run independent compiles on the rayon thread pool.

mod passes;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    builder::GraphBuilder,
    database::{MethodId, ProgramDatabase},
    ir::Graph,
    CompilerConfig, Result,
};

pub use crate::builder::{
    InlineDecision, InlineOutcome, InlineRejection, RecompileHint, UnresolvedKind,
};
pub use passes::{fold_arithmetic, fold_convert, Canonical, Canonicalizer, PhiSimplifier};

/// The result of a successful compile.
#[derive(Debug)]
pub struct Compilation {
    /// The compiled method.
    pub method: MethodId,
    /// The finished graph.
    pub graph: Graph,
    /// Every call site considered for inlining, in parse order.
    pub inlining: Vec<InlineDecision>,
    /// Unresolved entities, recorded under
    /// [`crate::UnresolvedPolicy::DeferRecompile`].
    pub recompile_hints: Vec<RecompileHint>,
    /// Number of nodes appended during construction.
    pub instruction_count: usize,
    /// Number of phis removed by the phi simplifier.
    pub phis_removed: usize,
}

/// Compiles `method` from its first bytecode.
///
/// # Arguments
/// * `db` - The program database the method and its references are resolved in
/// * `method` - The method to compile
/// * `config` - Inlining limits and optimization switches
///
/// # Errors
/// Returns [`crate::Error::MethodNotFound`] for an unknown method and
/// [`crate::Error::Bailout`] when graph construction was abandoned.
pub fn compile_method(
    db: &dyn ProgramDatabase,
    method: MethodId,
    config: &CompilerConfig,
) -> Result<Compilation> {
    compile(db, method, None, config)
}

/// Compiles `method` with an additional on-stack-replacement entry at `osr_bci`.
///
/// The graph gets an OSR entry block that loads the interpreter's locals and jumps
/// to the block starting at `osr_bci`.
///
/// # Errors
/// As [`compile_method`]; additionally bails out if the OSR bci is never reached or
/// has values on the operand stack.
pub fn compile_osr_method(
    db: &dyn ProgramDatabase,
    method: MethodId,
    osr_bci: u32,
    config: &CompilerConfig,
) -> Result<Compilation> {
    compile(db, method, Some(osr_bci), config)
}

/// Compiles independent methods in parallel.
///
/// Results are returned in the order of `methods`; a bailout of one method does not
/// affect the others.
pub fn compile_methods(
    db: &(dyn ProgramDatabase + Sync),
    methods: &[MethodId],
    config: &CompilerConfig,
) -> Vec<Result<Compilation>> {
    methods
        .par_iter()
        .map(|&method| compile_method(db, method, config))
        .collect()
}

fn compile(
    db: &dyn ProgramDatabase,
    method: MethodId,
    osr_bci: Option<u32>,
    config: &CompilerConfig,
) -> Result<Compilation> {
    let output = GraphBuilder::build(db, config, method, osr_bci)?;
    let mut graph = output.graph;
    let phis_removed = if config.eliminate_redundant_phis {
        PhiSimplifier::new().run(&mut graph)
    } else {
        0
    };
    debug!(
        target: "jitfront::builder",
        %method,
        nodes = output.instruction_count,
        phis_removed,
        inlined = output
            .inlining
            .iter()
            .filter(|d| d.outcome == InlineOutcome::Inlined)
            .count(),
        "compilation finished"
    );
    Ok(Compilation {
        method,
        graph,
        inlining: output.inlining,
        recompile_hints: output.recompile_hints,
        instruction_count: output.instruction_count,
        phis_removed,
    })
}
