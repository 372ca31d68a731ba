//! Value types, declared types and constants.

use std::hash::{Hash, Hasher};

use strum::Display;

use crate::database::ClassId;

/// The type tag of a value in the graph.
///
/// Sub-int declared types (`boolean`, `byte`, `char`, `short`) are all `Int` once on
/// the operand stack. `Long` and `Double` occupy two stack and local slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ValueType {
    /// No value (calls returning nothing, stores, control flow).
    Void,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// Object reference, including arrays and null.
    Object,
    /// Subroutine return address pushed by `jsr`.
    Address,
    /// A phi whose inputs disagree in type.
    Illegal,
}

impl ValueType {
    /// Returns the number of stack or local slots a value of this type occupies.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            ValueType::Void => 0,
            ValueType::Long | ValueType::Double => 2,
            _ => 1,
        }
    }

    /// Returns `true` for the two-slot types.
    #[must_use]
    pub const fn is_double_word(self) -> bool {
        matches!(self, ValueType::Long | ValueType::Double)
    }

    /// Returns `true` for `Float` and `Double`.
    #[must_use]
    pub const fn is_float_kind(self) -> bool {
        matches!(self, ValueType::Float | ValueType::Double)
    }
}

/// A declared type from a signature, field or array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
#[allow(missing_docs)]
pub enum BasicType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
    Object,
    Array,
    Void,
}

impl BasicType {
    /// Returns the stack type values of this declared type take.
    #[must_use]
    pub const fn value_type(self) -> ValueType {
        match self {
            BasicType::Boolean
            | BasicType::Char
            | BasicType::Byte
            | BasicType::Short
            | BasicType::Int => ValueType::Int,
            BasicType::Long => ValueType::Long,
            BasicType::Float => ValueType::Float,
            BasicType::Double => ValueType::Double,
            BasicType::Object | BasicType::Array => ValueType::Object,
            BasicType::Void => ValueType::Void,
        }
    }

    /// Returns the number of slots a parameter of this type takes.
    #[must_use]
    pub const fn slots(self) -> usize {
        self.value_type().size()
    }

    /// Returns `true` for the declared types narrower than `int`.
    #[must_use]
    pub const fn is_subword(self) -> bool {
        matches!(
            self,
            BasicType::Boolean | BasicType::Byte | BasicType::Char | BasicType::Short
        )
    }

    /// Decodes the element type operand of `newarray`.
    #[must_use]
    pub const fn from_newarray_code(code: u8) -> Option<Self> {
        Some(match code {
            4 => BasicType::Boolean,
            5 => BasicType::Char,
            6 => BasicType::Float,
            7 => BasicType::Double,
            8 => BasicType::Byte,
            9 => BasicType::Short,
            10 => BasicType::Int,
            11 => BasicType::Long,
            _ => return None,
        })
    }

    /// Returns the `newarray` operand for a primitive element type.
    #[must_use]
    pub const fn newarray_code(self) -> Option<u8> {
        Some(match self {
            BasicType::Boolean => 4,
            BasicType::Char => 5,
            BasicType::Float => 6,
            BasicType::Double => 7,
            BasicType::Byte => 8,
            BasicType::Short => 9,
            BasicType::Int => 10,
            BasicType::Long => 11,
            _ => return None,
        })
    }

    /// Returns the default value a fresh field or array element of this type holds.
    #[must_use]
    pub const fn default_value(self) -> ConstValue {
        match self.value_type() {
            ValueType::Long => ConstValue::Long(0),
            ValueType::Float => ConstValue::Float(0.0),
            ValueType::Double => ConstValue::Double(0.0),
            ValueType::Object => ConstValue::Null,
            _ => ConstValue::Int(0),
        }
    }
}

/// A compile-time constant.
///
/// Floating point constants compare and hash by bit pattern, so `NaN` equals an
/// identical `NaN` and `0.0` differs from `-0.0`; this is what value numbering and
/// folding need.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    /// An `int` constant.
    Int(i32),
    /// A `long` constant.
    Long(i64),
    /// A `float` constant.
    Float(f32),
    /// A `double` constant.
    Double(f64),
    /// The null reference.
    Null,
    /// A resolved, non-null object constant (string or other pool object), by handle.
    Object(u32),
    /// The class mirror of a loaded class.
    Class(ClassId),
    /// An object constant whose class is not loaded yet; needs patching.
    Unloaded,
    /// A subroutine return address.
    Address(u32),
}

impl ConstValue {
    /// Returns the value type of the constant.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            ConstValue::Int(_) => ValueType::Int,
            ConstValue::Long(_) => ValueType::Long,
            ConstValue::Float(_) => ValueType::Float,
            ConstValue::Double(_) => ValueType::Double,
            ConstValue::Null
            | ConstValue::Object(_)
            | ConstValue::Class(_)
            | ConstValue::Unloaded => ValueType::Object,
            ConstValue::Address(_) => ValueType::Address,
        }
    }

    /// Returns `true` if this is the zero/null default of its type.
    #[must_use]
    pub fn is_default(&self) -> bool {
        match *self {
            ConstValue::Int(v) => v == 0,
            ConstValue::Long(v) => v == 0,
            ConstValue::Float(v) => v.to_bits() == 0,
            ConstValue::Double(v) => v.to_bits() == 0,
            ConstValue::Null => true,
            _ => false,
        }
    }

    /// Returns `true` if the constant is a known non-null reference.
    #[must_use]
    pub const fn is_non_null_object(&self) -> bool {
        matches!(self, ConstValue::Object(_) | ConstValue::Class(_))
    }

    /// Returns the `int` payload.
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            ConstValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `long` payload.
    #[must_use]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            ConstValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    fn key(&self) -> (u8, u64) {
        match *self {
            ConstValue::Int(v) => (0, v as u32 as u64),
            ConstValue::Long(v) => (1, v as u64),
            ConstValue::Float(v) => (2, u64::from(v.to_bits())),
            ConstValue::Double(v) => (3, v.to_bits()),
            ConstValue::Null => (4, 0),
            ConstValue::Object(handle) => (5, u64::from(handle)),
            ConstValue::Class(class) => (6, u64::from(class.0)),
            ConstValue::Unloaded => (7, 0),
            ConstValue::Address(bci) => (8, u64::from(bci)),
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
