//! A small bytecode assembler with symbolic labels.
//!
//! [`BytecodeAssembler`] emits the encoded form of each instruction as it is called,
//! picking the shortest encoding for constants and locals, and resolves branch labels
//! (including forward references) in [`BytecodeAssembler::finish`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use jitfront::bytecode::{BytecodeAssembler, Opcode};
//!
//! // int abs(int x) { return x < 0 ? -x : x; }
//! let mut asm = BytecodeAssembler::new();
//! asm.iload(0)
//!     .branch(Opcode::Ifge, "positive")
//!     .iload(0)
//!     .op(Opcode::Ineg)
//!     .op(Opcode::Ireturn)
//!     .label("positive")
//!     .iload(0)
//!     .op(Opcode::Ireturn);
//! let code = asm.finish()?;
//! ```

use std::collections::HashMap;

use crate::{bytecode::Opcode, ir::BasicType, Result};

#[derive(Debug)]
struct Fixup {
    /// Offset of the operand to patch.
    at: usize,
    /// Bci of the instruction owning the operand; offsets are relative to it.
    base: u32,
    label: String,
    wide: bool,
}

/// Emits bytecode with symbolic branch labels.
#[derive(Debug, Default)]
pub struct BytecodeAssembler {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
    /// Problems found while emitting, reported by `finish`.
    errors: Vec<String>,
}

impl BytecodeAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bci the next instruction will be emitted at.
    #[must_use]
    pub fn pos(&self) -> u32 {
        self.code.len() as u32
    }

    /// Binds `name` to the current position.
    pub fn label(&mut self, name: &str) -> &mut Self {
        let pos = self.pos();
        if self.labels.insert(name.to_string(), pos).is_some() {
            self.errors.push(format!("Label '{name}' defined twice"));
        }
        self
    }

    /// Emits an instruction without operands.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.code.push(opcode.byte());
        self
    }

    /// Emits an instruction followed by raw operand bytes.
    pub fn raw(&mut self, opcode: Opcode, operands: &[u8]) -> &mut Self {
        self.code.push(opcode.byte());
        self.code.extend_from_slice(operands);
        self
    }

    /// Pushes an int constant using `iconst_<n>`, `bipush` or `sipush`.
    ///
    /// Values outside the `sipush` range need `ldc` and a constant pool entry; passing
    /// one here is reported by [`Self::finish`].
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => {
                let byte = (Opcode::Iconst0.byte() as i32 + value) as u8;
                self.code.push(byte);
            }
            v if i8::try_from(v).is_ok() => {
                self.raw(Opcode::Bipush, &[v as i8 as u8]);
            }
            v => match i16::try_from(v) {
                Ok(short) => {
                    self.raw(Opcode::Sipush, &short.to_be_bytes());
                }
                Err(_) => self.errors.push(format!("Constant {v} needs ldc")),
            },
        }
        self
    }

    fn local_op(&mut self, long_form: Opcode, short_form: Opcode, index: u16) -> &mut Self {
        match index {
            0..=3 => {
                self.code.push(short_form.byte() + index as u8);
            }
            4..=255 => {
                self.raw(long_form, &[index as u8]);
            }
            _ => {
                self.code.push(Opcode::Wide.byte());
                self.raw(long_form, &index.to_be_bytes());
            }
        }
        self
    }

    /// Emits `iload`.
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Iload, Opcode::Iload0, index)
    }

    /// Emits `lload`.
    pub fn lload(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Lload, Opcode::Lload0, index)
    }

    /// Emits `fload`.
    pub fn fload(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Fload, Opcode::Fload0, index)
    }

    /// Emits `dload`.
    pub fn dload(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Dload, Opcode::Dload0, index)
    }

    /// Emits `aload`.
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Aload, Opcode::Aload0, index)
    }

    /// Emits `istore`.
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Istore, Opcode::Istore0, index)
    }

    /// Emits `lstore`.
    pub fn lstore(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Lstore, Opcode::Lstore0, index)
    }

    /// Emits `fstore`.
    pub fn fstore(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Fstore, Opcode::Fstore0, index)
    }

    /// Emits `dstore`.
    pub fn dstore(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Dstore, Opcode::Dstore0, index)
    }

    /// Emits `astore`.
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.local_op(Opcode::Astore, Opcode::Astore0, index)
    }

    /// Emits `iinc`, widened when the local or delta needs it.
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        match (u8::try_from(index), i8::try_from(delta)) {
            (Ok(index), Ok(delta)) => self.raw(Opcode::Iinc, &[index, delta as u8]),
            _ => {
                self.code.push(Opcode::Wide.byte());
                self.op(Opcode::Iinc);
                self.code.extend_from_slice(&index.to_be_bytes());
                self.code.extend_from_slice(&delta.to_be_bytes());
                self
            }
        }
    }

    /// Emits `ret`.
    pub fn ret(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(index) => self.raw(Opcode::Ret, &[index]),
            Err(_) => {
                self.code.push(Opcode::Wide.byte());
                self.raw(Opcode::Ret, &index.to_be_bytes())
            }
        }
    }

    /// Emits an instruction with a two-byte constant pool index
    /// (field access, invokes, `new`, `checkcast`, `ldc_w`, ...).
    pub fn index_op(&mut self, opcode: Opcode, index: u16) -> &mut Self {
        self.raw(opcode, &index.to_be_bytes())
    }

    /// Emits `ldc`, or `ldc_w` for indices beyond 255.
    pub fn ldc(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(short) => self.raw(Opcode::Ldc, &[short]),
            Err(_) => self.index_op(Opcode::LdcW, index),
        }
    }

    /// Emits `invokeinterface`.
    pub fn invokeinterface(&mut self, index: u16, count: u8) -> &mut Self {
        let [hi, lo] = index.to_be_bytes();
        self.raw(Opcode::Invokeinterface, &[hi, lo, count, 0])
    }

    /// Emits `newarray` for a primitive element type.
    pub fn newarray(&mut self, elem: BasicType) -> &mut Self {
        match elem.newarray_code() {
            Some(code) => self.raw(Opcode::Newarray, &[code]),
            None => {
                self.errors.push(format!("newarray of non-primitive {elem}"));
                self
            }
        }
    }

    /// Emits `multianewarray`.
    pub fn multianewarray(&mut self, index: u16, dims: u8) -> &mut Self {
        let [hi, lo] = index.to_be_bytes();
        self.raw(Opcode::Multianewarray, &[hi, lo, dims])
    }

    /// Emits a two-byte branch (`if*`, `goto`, `jsr`) to `label`.
    pub fn branch(&mut self, opcode: Opcode, label: &str) -> &mut Self {
        let base = self.pos();
        self.op(opcode);
        self.fixup(base, label, false);
        self
    }

    /// Emits `goto label`.
    pub fn goto(&mut self, label: &str) -> &mut Self {
        self.branch(Opcode::Goto, label)
    }

    /// Emits `goto_w label`.
    pub fn goto_w(&mut self, label: &str) -> &mut Self {
        let base = self.pos();
        self.op(Opcode::GotoW);
        self.fixup(base, label, true);
        self
    }

    /// Emits `jsr label`.
    pub fn jsr(&mut self, label: &str) -> &mut Self {
        self.branch(Opcode::Jsr, label)
    }

    /// Emits a `tableswitch` with keys `low..low + targets.len()`.
    pub fn tableswitch(&mut self, low: i32, targets: &[&str], default: &str) -> &mut Self {
        let base = self.pos();
        self.op(Opcode::Tableswitch);
        self.pad();
        self.fixup(base, default, true);
        let high = low + targets.len() as i32 - 1;
        self.code.extend_from_slice(&low.to_be_bytes());
        self.code.extend_from_slice(&high.to_be_bytes());
        for target in targets {
            self.fixup(base, target, true);
        }
        self
    }

    /// Emits a `lookupswitch`; `pairs` must be sorted by key.
    pub fn lookupswitch(&mut self, pairs: &[(i32, &str)], default: &str) -> &mut Self {
        let base = self.pos();
        self.op(Opcode::Lookupswitch);
        self.pad();
        self.fixup(base, default, true);
        self.code
            .extend_from_slice(&(pairs.len() as i32).to_be_bytes());
        for (key, target) in pairs {
            self.code.extend_from_slice(&key.to_be_bytes());
            self.fixup(base, target, true);
        }
        self
    }

    fn pad(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn fixup(&mut self, base: u32, label: &str, wide: bool) {
        self.fixups.push(Fixup {
            at: self.code.len(),
            base,
            label: label.to_string(),
            wide,
        });
        let width = if wide { 4 } else { 2 };
        self.code.resize(self.code.len() + width, 0);
    }

    /// Resolves all labels and returns the bytecode.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for undefined or duplicate labels, for
    /// operands that could not be encoded and for short branches whose offset does not
    /// fit in 16 bits.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        if let Some(message) = self.errors.first() {
            return Err(malformed_error!(message));
        }

        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let Some(&target) = self.labels.get(&fixup.label) else {
                return Err(malformed_error!("Undefined label '{}'", fixup.label));
            };
            let offset = i64::from(target) - i64::from(fixup.base);
            if fixup.wide {
                let offset = offset as i32;
                code[fixup.at..fixup.at + 4].copy_from_slice(&offset.to_be_bytes());
            } else {
                let Ok(offset) = i16::try_from(offset) else {
                    return Err(malformed_error!(
                        "Branch to '{}' is out of range for a short offset",
                        fixup.label
                    ));
                };
                code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }

        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{DecodedCode, Operand};

    #[test]
    fn test_constants_pick_short_forms() {
        let mut asm = BytecodeAssembler::new();
        asm.iconst(-1).iconst(5).iconst(100).iconst(1000);
        let code = asm.finish().expect("assemble failed");
        assert_eq!(code, vec![0x02, 0x08, 0x10, 100, 0x11, 0x03, 0xe8]);
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let mut asm = BytecodeAssembler::new();
        asm.label("top")
            .iload(0)
            .branch(Opcode::Ifeq, "done")
            .iinc(0, -1)
            .goto("top")
            .label("done")
            .op(Opcode::Return);
        let code = asm.finish().expect("assemble failed");

        let decoded = DecodedCode::decode(&code).expect("decode failed");
        assert_eq!(decoded.at(1).map(|i| i.operand.clone()), Some(Operand::Branch(10)));
        assert_eq!(decoded.at(7).map(|i| i.operand.clone()), Some(Operand::Branch(0)));
    }

    #[test]
    fn test_switch_round_trip() {
        let mut asm = BytecodeAssembler::new();
        asm.iload(0)
            .lookupswitch(&[(1, "one"), (7, "seven")], "other")
            .label("one")
            .iconst(1)
            .op(Opcode::Ireturn)
            .label("seven")
            .iconst(7)
            .op(Opcode::Ireturn)
            .label("other")
            .iconst(0)
            .op(Opcode::Ireturn);
        let code = asm.finish().expect("assemble failed");
        let decoded = DecodedCode::decode(&code).expect("decode failed");
        let switch = decoded.at(1).expect("no switch");
        assert_eq!(switch.branch_targets().len(), 3);
    }

    #[test]
    fn test_label_errors() {
        let mut asm = BytecodeAssembler::new();
        asm.goto("nowhere");
        assert!(asm.finish().is_err());

        let mut asm = BytecodeAssembler::new();
        asm.label("a").label("a").op(Opcode::Return);
        assert!(asm.finish().is_err());
    }

    #[test]
    fn test_wide_locals() {
        let mut asm = BytecodeAssembler::new();
        asm.iload(300).istore(4).op(Opcode::Return);
        let code = asm.finish().expect("assemble failed");
        assert_eq!(&code[..4], &[0xc4, 0x15, 0x01, 0x2c]);
        assert_eq!(&code[4..6], &[0x36, 4]);
    }
}
