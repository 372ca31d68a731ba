//! # jitfront Prelude
//!
//! This module provides the types needed to describe a method, compile it and inspect
//! the resulting graph. Import it with a glob to get started quickly.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

pub use crate::{Bailout, BailoutReason, CompilerConfig, Error, Result, UnresolvedPolicy};

// ================================================================================================
// Bytecode
// ================================================================================================

pub use crate::bytecode::{BytecodeAssembler, DecodedCode, Insn, Opcode, Operand};

// ================================================================================================
// Program Database
// ================================================================================================

pub use crate::database::{
    ClassId, ClassRef, ExceptionHandler, FieldRef, InMemoryDatabase, Method, MethodFlags,
    MethodId, MethodRef, ProgramDatabase, Signature,
};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

pub use crate::ir::{
    BasicType, Block, BlockFlags, BlockId, ConstValue, Graph, Instruction, Node, NodeFlags,
    ValueId, ValueStack, ValueType,
};

// ================================================================================================
// Compilation
// ================================================================================================

pub use crate::compiler::{
    compile_method, compile_methods, compile_osr_method, Compilation, InlineDecision,
    RecompileHint,
};
