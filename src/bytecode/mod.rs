//! Bytecode opcodes, decoding and assembly.
//!
//! The compiler consumes method bodies in a JVM-style stack bytecode: big-endian
//! operands, branch offsets relative to the branching instruction, 4-byte aligned
//! switch tables and a `wide` prefix for 16-bit local indices.
//!
//! # Key Components
//!
//! - [`Opcode`] - The opcode set with lengths and control-flow classification
//! - [`BytecodeStream`] / [`decode_insn`] - Instruction decoding
//! - [`DecodedCode`] - A fully decoded and validated method body
//! - [`BytecodeAssembler`] - Bytecode emission with labels, used by tests and benches

mod assembler;
mod opcode;
mod stream;

pub use assembler::BytecodeAssembler;
pub use opcode::Opcode;
pub use stream::{
    decode_insn, BigEndian, BytecodeStream, DecodedCode, Insn, LookupSwitch, Operand,
    TableSwitch,
};
