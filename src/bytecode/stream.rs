//! Bytecode decoding.
//!
//! [`BytecodeStream`] is a bounds-checked big-endian cursor over a method body, and
//! [`decode_insn`] reads one instruction from it. [`DecodedCode::decode`] decodes a
//! whole method once, validates every branch target and keeps a bci to instruction
//! index so the block discovery and the graph builder can both walk it without
//! re-decoding.

use crate::{
    bytecode::Opcode,
    Error::{self, OutOfBounds},
    Result,
};

/// Types that can be read in big-endian order from a [`BytecodeStream`].
pub trait BigEndian: Sized + Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decodes a value from exactly `SIZE` bytes.
    fn from_be_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_big_endian {
    ($($ty:ty),*) => {
        $(
            impl BigEndian for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_be_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_be_bytes(raw)
                }
            }
        )*
    };
}

impl_big_endian!(u8, i8, u16, i16, u32, i32);

/// A cursor over bytecode with bounds-checked big-endian reads.
///
/// # Examples
///
/// ```rust,ignore
/// use jitfront::bytecode::BytecodeStream;
///
/// let code = [0x11, 0x01, 0x00];
/// let mut stream = BytecodeStream::new(&code);
/// assert_eq!(stream.read_be::<u8>()?, 0x11);
/// assert_eq!(stream.read_be::<i16>()?, 256);
/// ```
pub struct BytecodeStream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BytecodeStream<'a> {
    /// Create a new stream at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        BytecodeStream { data, position: 0 }
    }

    /// Returns the length of the underlying bytecode.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if there is no bytecode.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if the cursor has not reached the end.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current offset.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the cursor to `pos`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Skip the padding that aligns switch operands to a multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.seek(self.position + padding)
    }

    /// Read a big-endian value and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `T::SIZE` bytes remain.
    pub fn read_be<T: BigEndian>(&mut self) -> Result<T> {
        let end = self.position + T::SIZE;
        let Some(bytes) = self.data.get(self.position..end) else {
            return Err(OutOfBounds);
        };

        self.position = end;
        Ok(T::from_be_slice(bytes))
    }
}

/// Case table of a `tableswitch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSwitch {
    /// Absolute target when the key is out of range.
    pub default: u32,
    /// Key of the first entry in `targets`.
    pub low: i32,
    /// Absolute targets for keys `low..=high`.
    pub targets: Vec<u32>,
}

impl TableSwitch {
    /// Returns the highest key.
    #[must_use]
    pub fn high(&self) -> i32 {
        self.low + self.targets.len() as i32 - 1
    }
}

/// Case table of a `lookupswitch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSwitch {
    /// Absolute target when no key matches.
    pub default: u32,
    /// `(key, absolute target)` pairs in encoded order.
    pub pairs: Vec<(i32, u32)>,
}

/// The decoded operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand (or the local is implied by the opcode).
    None,
    /// A local variable slot.
    Local(u16),
    /// An immediate (`bipush`, `sipush`).
    Int(i32),
    /// A constant pool index.
    Index(u16),
    /// The element type code of a `newarray`.
    ArrayType(u8),
    /// `iinc` local and delta.
    Iinc {
        /// Local slot
        local: u16,
        /// Signed increment
        delta: i16,
    },
    /// An absolute branch target.
    Branch(u32),
    /// `tableswitch` table.
    TableSwitch(Box<TableSwitch>),
    /// `lookupswitch` table.
    LookupSwitch(Box<LookupSwitch>),
    /// `invokeinterface` operands.
    InvokeInterface {
        /// Constant pool index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `multianewarray` operands.
    MultiANewArray {
        /// Constant pool index of the array class
        index: u16,
        /// Number of dimensions to pop
        dims: u8,
    },
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Bytecode index of the first byte (the `wide` prefix, if any).
    pub bci: u32,
    /// The opcode; for `wide` forms this is the modified opcode.
    pub opcode: Opcode,
    /// The operand.
    pub operand: Operand,
    /// Encoded length in bytes.
    pub len: u32,
    /// `true` if the instruction was prefixed with `wide`.
    pub wide: bool,
}

impl Insn {
    /// Returns the bci of the following instruction.
    #[must_use]
    pub const fn next_bci(&self) -> u32 {
        self.bci + self.len
    }

    /// Returns the local slot the instruction reads or writes, if any.
    #[must_use]
    pub fn local(&self) -> Option<u16> {
        match self.operand {
            Operand::Local(index) | Operand::Iinc { local: index, .. } => Some(index),
            _ => self.opcode.implicit_local(),
        }
    }

    /// Returns every local control transfer target, including switch defaults.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::TableSwitch(table) => std::iter::once(table.default)
                .chain(table.targets.iter().copied())
                .collect(),
            Operand::LookupSwitch(table) => std::iter::once(table.default)
                .chain(table.pairs.iter().map(|&(_, target)| target))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn branch_target(bci: u32, offset: i32) -> Result<u32> {
    let target = i64::from(bci) + i64::from(offset);
    u32::try_from(target).map_err(|_| malformed_error!("Branch at {} leaves the method", bci))
}

/// Decode the instruction at the stream's current position.
///
/// # Arguments
/// * `stream` - The stream, positioned at the first byte of an instruction
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown opcodes and invalid `wide` forms,
/// and [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_insn(stream: &mut BytecodeStream) -> Result<Insn> {
    let start = stream.pos();
    let bci = start as u32;
    let byte = stream.read_be::<u8>()?;
    let Some(opcode) = Opcode::from_repr(byte) else {
        return Err(malformed_error!("Invalid opcode: {:02X} at {}", byte, bci));
    };

    if opcode == Opcode::Wide {
        return decode_wide(stream, bci);
    }

    let operand = match opcode {
        Opcode::Bipush => Operand::Int(i32::from(stream.read_be::<i8>()?)),
        Opcode::Sipush => Operand::Int(i32::from(stream.read_be::<i16>()?)),
        Opcode::Ldc => Operand::Index(u16::from(stream.read_be::<u8>()?)),
        Opcode::Newarray => Operand::ArrayType(stream.read_be::<u8>()?),
        Opcode::Iload
        | Opcode::Lload
        | Opcode::Fload
        | Opcode::Dload
        | Opcode::Aload
        | Opcode::Istore
        | Opcode::Lstore
        | Opcode::Fstore
        | Opcode::Dstore
        | Opcode::Astore
        | Opcode::Ret => Operand::Local(u16::from(stream.read_be::<u8>()?)),
        Opcode::Iinc => {
            let local = u16::from(stream.read_be::<u8>()?);
            let delta = i16::from(stream.read_be::<i8>()?);
            Operand::Iinc { local, delta }
        }
        Opcode::LdcW
        | Opcode::Ldc2W
        | Opcode::Getstatic
        | Opcode::Putstatic
        | Opcode::Getfield
        | Opcode::Putfield
        | Opcode::Invokevirtual
        | Opcode::Invokespecial
        | Opcode::Invokestatic
        | Opcode::New
        | Opcode::Anewarray
        | Opcode::Checkcast
        | Opcode::Instanceof => Operand::Index(stream.read_be::<u16>()?),
        Opcode::Invokeinterface => {
            let index = stream.read_be::<u16>()?;
            let count = stream.read_be::<u8>()?;
            let _zero = stream.read_be::<u8>()?;
            Operand::InvokeInterface { index, count }
        }
        Opcode::Invokedynamic => {
            let index = stream.read_be::<u16>()?;
            let _zero = stream.read_be::<u16>()?;
            Operand::Index(index)
        }
        Opcode::Multianewarray => {
            let index = stream.read_be::<u16>()?;
            let dims = stream.read_be::<u8>()?;
            Operand::MultiANewArray { index, dims }
        }
        Opcode::GotoW | Opcode::JsrW => {
            Operand::Branch(branch_target(bci, stream.read_be::<i32>()?)?)
        }
        op if op.is_conditional_branch() || matches!(op, Opcode::Goto | Opcode::Jsr) => {
            Operand::Branch(branch_target(bci, i32::from(stream.read_be::<i16>()?))?)
        }
        Opcode::Tableswitch => {
            stream.align(4)?;
            let default = branch_target(bci, stream.read_be::<i32>()?)?;
            let low = stream.read_be::<i32>()?;
            let high = stream.read_be::<i32>()?;
            if high < low {
                return Err(malformed_error!("tableswitch at {} has high < low", bci));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            if count > stream.len() {
                return Err(OutOfBounds);
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch_target(bci, stream.read_be::<i32>()?)?);
            }
            Operand::TableSwitch(Box::new(TableSwitch {
                default,
                low,
                targets,
            }))
        }
        Opcode::Lookupswitch => {
            stream.align(4)?;
            let default = branch_target(bci, stream.read_be::<i32>()?)?;
            let npairs = stream.read_be::<i32>()?;
            let Ok(npairs) = usize::try_from(npairs) else {
                return Err(malformed_error!("lookupswitch at {} has negative size", bci));
            };
            if npairs > stream.len() {
                return Err(OutOfBounds);
            }
            let mut pairs = Vec::with_capacity(npairs);
            for _ in 0..npairs {
                let key = stream.read_be::<i32>()?;
                pairs.push((key, branch_target(bci, stream.read_be::<i32>()?)?));
            }
            Operand::LookupSwitch(Box::new(LookupSwitch { default, pairs }))
        }
        _ => Operand::None,
    };

    Ok(Insn {
        bci,
        opcode,
        operand,
        len: (stream.pos() - start) as u32,
        wide: false,
    })
}

fn decode_wide(stream: &mut BytecodeStream, bci: u32) -> Result<Insn> {
    let byte = stream.read_be::<u8>()?;
    let opcode = match Opcode::from_repr(byte) {
        Some(
            op @ (Opcode::Iload
            | Opcode::Lload
            | Opcode::Fload
            | Opcode::Dload
            | Opcode::Aload
            | Opcode::Istore
            | Opcode::Lstore
            | Opcode::Fstore
            | Opcode::Dstore
            | Opcode::Astore
            | Opcode::Ret
            | Opcode::Iinc),
        ) => op,
        _ => return Err(malformed_error!("Invalid wide opcode {:02X} at {}", byte, bci)),
    };

    let local = stream.read_be::<u16>()?;
    let operand = if opcode == Opcode::Iinc {
        Operand::Iinc {
            local,
            delta: stream.read_be::<i16>()?,
        }
    } else {
        Operand::Local(local)
    };

    Ok(Insn {
        bci,
        opcode,
        operand,
        len: stream.pos() as u32 - bci,
        wide: true,
    })
}

/// A method body decoded into instructions.
#[derive(Debug, Clone, Default)]
pub struct DecodedCode {
    insns: Vec<Insn>,
    /// For every bci, the index of the instruction starting there.
    index: Vec<Option<u32>>,
}

impl DecodedCode {
    /// Decode a complete method body.
    ///
    /// # Arguments
    /// * `code` - The raw bytecode
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an instruction is invalid, if a branch
    /// targets the middle of an instruction or leaves the method, or if the body is
    /// empty.
    pub fn decode(code: &[u8]) -> Result<Self> {
        if code.is_empty() {
            return Err(malformed_error!("Empty method body"));
        }

        let mut stream = BytecodeStream::new(code);
        let mut insns = Vec::new();
        let mut index = vec![None; code.len()];
        while stream.has_more_data() {
            let insn = decode_insn(&mut stream)?;
            index[insn.bci as usize] = Some(insns.len() as u32);
            insns.push(insn);
        }

        let decoded = DecodedCode { insns, index };
        for insn in &decoded.insns {
            for target in insn.branch_targets() {
                if decoded.index_of(target).is_none() {
                    return Err(malformed_error!(
                        "Branch at {} targets {} which is not an instruction start",
                        insn.bci,
                        target
                    ));
                }
            }
        }

        Ok(decoded)
    }

    /// Returns the instructions in bci order.
    #[must_use]
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// Returns the code size in bytes.
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.index.len() as u32
    }

    /// Returns the position in [`Self::insns`] of the instruction starting at `bci`.
    #[must_use]
    pub fn index_of(&self, bci: u32) -> Option<usize> {
        self.index
            .get(bci as usize)
            .copied()
            .flatten()
            .map(|i| i as usize)
    }

    /// Returns the instruction starting at `bci`.
    #[must_use]
    pub fn at(&self, bci: u32) -> Option<&Insn> {
        self.index_of(bci).map(|i| &self.insns[i])
    }

    /// Returns `true` if the body contains `jsr` or `ret`.
    #[must_use]
    pub fn has_subroutines(&self) -> bool {
        self.insns
            .iter()
            .any(|insn| matches!(insn.opcode, Opcode::Jsr | Opcode::JsrW | Opcode::Ret))
    }
}

impl TryFrom<&[u8]> for DecodedCode {
    type Error = Error;

    fn try_from(code: &[u8]) -> Result<Self> {
        DecodedCode::decode(code)
    }
}
