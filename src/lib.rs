// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # jitfront
//!
//! The front end of a method JIT: it turns one method's stack-oriented bytecode into a
//! typed, block-structured, SSA-style intermediate representation ready for lowering.
//!
//! ## Features
//!
//! - **Block discovery** - A single linear scan finds basic block boundaries, exception
//!   edges and loop headers (depth-first, with reverse-postorder numbering)
//! - **Graph construction** - An abstract interpretation of the operand stack and
//!   locals builds value nodes, merges states at block joins with phis and threads
//!   exception edges through every trapping instruction
//! - **Inlining** - Statically bindable calls are inlined recursively, with a shared
//!   continuation block and elision of the trivial single-return case
//! - **Local optimizations** - A canonicalizer folds and simplifies every node as it is
//!   built, a memory value cache removes redundant field loads and default stores, and
//!   local value numbering reuses pure nodes within a block
//! - **Phi simplification** - Redundant phis are resolved after construction
//!
//! ## Architecture
//!
//! - [`bytecode`] - Opcodes, the bytecode decoder and an assembler with labels
//! - [`database`] - The [`database::ProgramDatabase`] the compiler resolves references
//!   against, plus an in-memory implementation
//! - [`ir`] - The arena-backed graph: value nodes, blocks, state snapshots
//! - [`builder`] - Block discovery and the graph builder
//! - [`compiler`] - Compile entry points and the post-construction passes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jitfront::prelude::*;
//!
//! let mut asm = BytecodeAssembler::new();
//! asm.iconst(2).iconst(3).op(Opcode::Iadd).op(Opcode::Ireturn);
//!
//! let mut db = InMemoryDatabase::new();
//! let id = db.add_method(
//!     Method::new("answer", Signature::new(vec![], BasicType::Int))
//!         .with_flags(MethodFlags::STATIC)
//!         .with_code(asm.finish()?, 2, 0),
//! );
//!
//! let compilation = compile_method(&db, id, &CompilerConfig::default())?;
//! println!("{} blocks", compilation.graph.reachable_blocks().len());
//! ```
//!
//! ## Error Handling
//!
//! A compile ends in success, in a structural bailout ([`Error::Bailout`]) or in a
//! request error (unknown method, undecodable bytecode). Declined inlining and
//! unresolved references are not errors; they are recorded on the
//! [`compiler::Compilation`].
//!
//! ## Logging
//!
//! All components emit [`tracing`] events under `jitfront::*` targets. The library
//! never installs a subscriber.

#[macro_use]
pub(crate) mod error;

/// Compiler configuration: inlining thresholds, node budget and optimization switches.
pub mod config;

/// Small shared data structures.
pub mod utils;

/// Bytecode opcodes, decoding and assembly.
///
/// # Key Types
///
/// - [`bytecode::Opcode`] - The opcode set
/// - [`bytecode::DecodedCode`] - A method body decoded into instructions with a bci index
/// - [`bytecode::BytecodeAssembler`] - Emits bytecode with symbolic labels
pub mod bytecode;

/// The program database consumed by the compiler.
pub mod database;

/// The intermediate representation produced by graph construction.
///
/// Nodes, blocks, state snapshots and scopes all live in one [`ir::Graph`] arena and
/// refer to each other through typed indices.
pub mod ir;

/// Block discovery and graph construction.
pub mod builder;

/// Compile entry points and post-construction passes.
pub mod compiler;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub use config::{CompilerConfig, UnresolvedPolicy};
pub use error::{Bailout, BailoutReason, Error};

/// The result type used throughout jitfront.
pub type Result<T> = std::result::Result<T, Error>;
