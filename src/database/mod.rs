//! The program database the compiler resolves references against.
//!
//! The compiler never loads classes itself. Every constant pool reference in a method
//! body is resolved through [`ProgramDatabase`], which answers with a description of
//! the field, method, class or constant. A reference may be known to exist but not be
//! loaded yet; the answer then carries `None` for the parts that need loading
//! (offset, target method, class id) and the compiler emits a patchable access
//! instead of failing.
//!
//! # Key Components
//!
//! - [`ProgramDatabase`] - The resolution interface
//! - [`Method`] - An immutable method description: signature, flags, code, handlers
//! - [`FieldRef`], [`MethodRef`], [`ClassRef`] - Resolution answers
//! - [`InMemoryDatabase`] - A map-backed implementation for tests and tools

mod memory;

use std::fmt;

use bitflags::bitflags;

use crate::ir::{BasicType, ConstValue};

pub use memory::InMemoryDatabase;

/// Identifies a method in a [`ProgramDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identifies a loaded class in a [`ProgramDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u32);

bitflags! {
    /// Access and property flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        /// No receiver
        const STATIC = 0x0001;
        /// Runs holding the receiver's (or class mirror's) monitor
        const SYNCHRONIZED = 0x0002;
        /// Cannot be overridden
        const FINAL = 0x0004;
        /// Not virtually dispatched
        const PRIVATE = 0x0008;
        /// Implemented outside bytecode
        const NATIVE = 0x0010;
        /// No implementation
        const ABSTRACT = 0x0020;
    }
}

/// Parameter and return types of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Declared parameter types, excluding the receiver.
    pub params: Vec<BasicType>,
    /// Declared return type.
    pub ret: BasicType,
    /// Declared classes of reference parameters, by parameter position; missing
    /// entries are unknown.
    pub param_classes: Vec<Option<ClassId>>,
    /// Declared class of a reference return value.
    pub ret_class: Option<ClassId>,
}

impl Signature {
    /// Creates a signature.
    #[must_use]
    pub fn new(params: Vec<BasicType>, ret: BasicType) -> Self {
        Signature {
            params,
            ret,
            param_classes: Vec::new(),
            ret_class: None,
        }
    }

    /// Declares the class of reference parameter `index`.
    #[must_use]
    pub fn with_param_class(mut self, index: usize, class: ClassId) -> Self {
        if self.param_classes.len() <= index {
            self.param_classes.resize(index + 1, None);
        }
        self.param_classes[index] = Some(class);
        self
    }

    /// Declares the class of a reference return value.
    #[must_use]
    pub fn with_return_class(mut self, class: ClassId) -> Self {
        self.ret_class = Some(class);
        self
    }

    /// Returns the declared class of parameter `index`, if known.
    #[must_use]
    pub fn param_class(&self, index: usize) -> Option<ClassId> {
        self.param_classes.get(index).copied().flatten()
    }

    /// Returns the number of argument slots, excluding the receiver.
    #[must_use]
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(|p| p.slots()).sum()
    }
}

/// One declared exception handler of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First covered bci.
    pub start_pc: u32,
    /// First bci past the covered range.
    pub end_pc: u32,
    /// Entry bci of the handler.
    pub handler_pc: u32,
    /// Constant pool index of the caught class, 0 for catch-all.
    pub catch_type: u16,
}

/// An immutable method description.
#[derive(Debug, Clone)]
pub struct Method {
    /// Method name, for diagnostics.
    pub name: String,
    /// Declaring class.
    pub holder: Option<ClassId>,
    /// Parameter and return types.
    pub signature: Signature,
    /// Access flags.
    pub flags: MethodFlags,
    /// Maximum operand stack depth in slots.
    pub max_stack: u16,
    /// Number of local slots, including parameters.
    pub max_locals: u16,
    /// The bytecode; empty for native and abstract methods.
    pub code: Vec<u8>,
    /// Declared exception handlers, in table order.
    pub handlers: Vec<ExceptionHandler>,
}

impl Method {
    /// Creates a method without code.
    #[must_use]
    pub fn new(name: &str, signature: Signature) -> Self {
        Method {
            name: name.to_string(),
            holder: None,
            signature,
            flags: MethodFlags::empty(),
            max_stack: 0,
            max_locals: 0,
            code: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Sets the access flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the declaring class.
    #[must_use]
    pub fn with_holder(mut self, holder: ClassId) -> Self {
        self.holder = Some(holder);
        self
    }

    /// Sets the bytecode and its stack and locals sizes.
    #[must_use]
    pub fn with_code(mut self, code: Vec<u8>, max_stack: u16, max_locals: u16) -> Self {
        self.code = code;
        self.max_stack = max_stack;
        self.max_locals = max_locals;
        self
    }

    /// Appends an exception handler.
    #[must_use]
    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Returns `true` if the method has no receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` if the method runs holding a monitor.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.flags.contains(MethodFlags::SYNCHRONIZED)
    }

    /// Returns `true` if the method has bytecode.
    #[must_use]
    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
            && !self
                .flags
                .intersects(MethodFlags::NATIVE | MethodFlags::ABSTRACT)
    }

    /// Returns the bytecode size.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Returns the number of argument slots including the receiver.
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.signature.param_slots() + usize::from(!self.is_static())
    }
}

/// Resolution answer for a class reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    /// Class name, for diagnostics.
    pub name: String,
    /// The loaded class, or `None` if it is not loaded yet.
    pub id: Option<ClassId>,
    /// `true` once static initialization has run.
    pub is_initialized: bool,
}

impl ClassRef {
    /// A loaded and initialized class.
    #[must_use]
    pub fn loaded(name: &str, id: ClassId) -> Self {
        ClassRef {
            name: name.to_string(),
            id: Some(id),
            is_initialized: true,
        }
    }

    /// A class that is not loaded yet.
    #[must_use]
    pub fn unloaded(name: &str) -> Self {
        ClassRef {
            name: name.to_string(),
            id: None,
            is_initialized: false,
        }
    }

    /// Returns `true` if the class is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.id.is_some()
    }
}

/// Resolution answer for a field reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Declaring class.
    pub holder: ClassRef,
    /// Field name, for diagnostics.
    pub name: String,
    /// Declared type.
    pub ty: BasicType,
    /// Offset of the field, or `None` while unresolved.
    pub offset: Option<u32>,
    /// `true` for static fields.
    pub is_static: bool,
    /// `true` for final fields.
    pub is_final: bool,
    /// `true` for volatile fields.
    pub is_volatile: bool,
    /// Compile-time constant value of a static final field.
    pub constant_value: Option<ConstValue>,
    /// Declared class of a reference field.
    pub declared_class: Option<ClassId>,
}

impl FieldRef {
    /// A resolved instance field.
    #[must_use]
    pub fn instance(holder: ClassRef, name: &str, ty: BasicType, offset: u32) -> Self {
        FieldRef {
            holder,
            name: name.to_string(),
            ty,
            offset: Some(offset),
            is_static: false,
            is_final: false,
            is_volatile: false,
            constant_value: None,
            declared_class: None,
        }
    }

    /// Declares the class of a reference field.
    #[must_use]
    pub fn with_declared_class(mut self, class: ClassId) -> Self {
        self.declared_class = Some(class);
        self
    }

    /// A resolved static field.
    #[must_use]
    pub fn static_field(holder: ClassRef, name: &str, ty: BasicType, offset: u32) -> Self {
        FieldRef {
            is_static: true,
            ..FieldRef::instance(holder, name, ty, offset)
        }
    }

    /// A field that is not resolved yet.
    #[must_use]
    pub fn unresolved(holder: ClassRef, name: &str, ty: BasicType, is_static: bool) -> Self {
        FieldRef {
            offset: None,
            is_static,
            ..FieldRef::instance(holder, name, ty, 0)
        }
    }

    /// Returns `true` if the field offset and holder are known.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.offset.is_some() && self.holder.is_loaded()
    }
}

/// Resolution answer for a method reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    /// Declaring class.
    pub holder: ClassRef,
    /// Method name, for diagnostics.
    pub name: String,
    /// Signature, always known from the reference itself.
    pub signature: Signature,
    /// The resolved method, or `None` while unresolved.
    pub target: Option<MethodId>,
    /// `true` if the target cannot be overridden (final, private, or final holder).
    pub is_final: bool,
    /// `true` for static methods.
    pub is_static: bool,
}

impl MethodRef {
    /// A resolved reference to `target`.
    #[must_use]
    pub fn resolved(holder: ClassRef, name: &str, signature: Signature, target: MethodId) -> Self {
        MethodRef {
            holder,
            name: name.to_string(),
            signature,
            target: Some(target),
            is_final: false,
            is_static: false,
        }
    }

    /// A reference whose target is not resolved yet.
    #[must_use]
    pub fn unresolved(holder: ClassRef, name: &str, signature: Signature) -> Self {
        MethodRef {
            holder,
            name: name.to_string(),
            signature,
            target: None,
            is_final: false,
            is_static: false,
        }
    }

    /// Marks the target as not overridable.
    #[must_use]
    pub fn with_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Marks the target as static.
    #[must_use]
    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Returns `true` if the target is known.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// Returns `true` if the declaring class has been initialized.
    #[must_use]
    pub fn holder_initialized(&self) -> bool {
        self.holder.is_initialized
    }
}

/// Resolves the references of method bodies.
///
/// Constant pool indices are interpreted relative to the method whose body contains
/// them. Returning `None` means the index does not exist at all, which the compiler
/// reports as malformed bytecode; a reference that exists but is not loaded is
/// expressed inside the returned description.
///
/// Implementations must be `Sync` to be used with
/// [`crate::compiler::compile_methods`]; a single compile only needs shared access.
pub trait ProgramDatabase {
    /// Returns the method with this id.
    fn method(&self, id: MethodId) -> Option<&Method>;

    /// Returns the bytecode of a method.
    fn method_bytecode(&self, id: MethodId) -> Option<&[u8]> {
        self.method(id).map(|m| m.code.as_slice())
    }

    /// Returns the declared exception handlers of a method.
    fn exception_handlers(&self, id: MethodId) -> &[ExceptionHandler] {
        self.method(id).map_or(&[][..], |m| m.handlers.as_slice())
    }

    /// Resolves a field reference.
    fn resolve_field(&self, method: MethodId, index: u16) -> Option<FieldRef>;

    /// Resolves a method reference.
    fn resolve_method(&self, caller: MethodId, index: u16) -> Option<MethodRef>;

    /// Resolves a class reference.
    fn resolve_class(&self, method: MethodId, index: u16) -> Option<ClassRef>;

    /// Loads an `ldc` constant. Object constants of unloaded classes are
    /// [`ConstValue::Unloaded`].
    fn load_constant(&self, method: MethodId, index: u16) -> Option<ConstValue>;

    /// Returns `true` if `sub` is `sup` or a subtype of it.
    fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool;

    /// Returns the only implementation of a virtual method if the class hierarchy
    /// proves there is exactly one.
    fn find_monomorphic_target(&self, _method: MethodId) -> Option<MethodId> {
        None
    }
}
