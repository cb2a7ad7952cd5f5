//! The immutable constant model shared across input files.
//!
//! # Architecture
//!
//! Every cross-referenced value of the container (strings, types,
//! prototypes, field/method references, method handles, call sites) is
//! represented as an immutable value type wrapped in [`std::sync::Arc`].
//! The [`crate::pool::GlobalPool`] interns these by structural equality, so
//! after resolution two references to `Foo.bar:I` contributed by different
//! input files are literally the same allocation.
//!
//! Structural ordering doubles as the final index-assignment order of the
//! serialized output:
//!
//! - strings sort by UTF-16 code-unit sequence (lexical),
//! - types by descriptor string,
//! - prototypes by return type, then parameter list,
//! - fields by defining class, then name, then type,
//! - methods by defining class, then name, then prototype.
//!
//! [`DexString`] keeps its MUTF-8 payload verbatim next to the decoded
//! code-unit sequence: equality and ordering use the decoded units, while
//! serialization re-emits the original bytes.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use strum::FromRepr;

use crate::{file::mutf8, value::EncodedValue, Result};

bitflags! {
    /// Access flags for classes, fields and methods.
    ///
    /// The same bit space is shared by all three member kinds; bits 0x40 and
    /// 0x80 are overloaded (volatile/bridge and transient/varargs) and kept
    /// verbatim by the merge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct AccessFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only to the defining class.
        const PRIVATE = 0x0002;
        /// Accessible to the package and subclasses.
        const PROTECTED = 0x0004;
        /// Static member.
        const STATIC = 0x0008;
        /// Not overridable / not assignable.
        const FINAL = 0x0010;
        /// Synchronized method.
        const SYNCHRONIZED = 0x0020;
        /// Volatile field, or bridge method.
        const VOLATILE_OR_BRIDGE = 0x0040;
        /// Transient field, or varargs method.
        const TRANSIENT_OR_VARARGS = 0x0080;
        /// Native method.
        const NATIVE = 0x0100;
        /// Interface class.
        const INTERFACE = 0x0200;
        /// Abstract class or method.
        const ABSTRACT = 0x0400;
        /// Strict floating-point method.
        const STRICT = 0x0800;
        /// Compiler-introduced member.
        const SYNTHETIC = 0x1000;
        /// Annotation class.
        const ANNOTATION = 0x2000;
        /// Enum class or enum constant field.
        const ENUM = 0x4000;
        /// Constructor method.
        const CONSTRUCTOR = 0x10000;
        /// Method declared synchronized (runtime flag).
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    /// Whether a method with these flags belongs in the direct-method table
    /// (private, static or constructor) rather than the virtual one.
    #[must_use]
    pub fn is_direct(self) -> bool {
        self.intersects(AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::CONSTRUCTOR)
    }
}

/// An interned string constant.
///
/// Carries both the verbatim MUTF-8 payload (re-emitted on serialization)
/// and the decoded UTF-16 code-unit sequence (used for equality, hashing and
/// the lexical sort order of the output string table). Valid dex strings may
/// contain unpaired surrogates, so the unit sequence, not a Rust `String`,
/// is the canonical form.
#[derive(Debug, Clone)]
pub struct DexString {
    utf16_size: u32,
    data: Box<[u8]>,
    units: Box<[u16]>,
}

impl DexString {
    /// Build a string from a declared UTF-16 unit count and its MUTF-8
    /// payload, validating both.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on invalid MUTF-8 or a count
    /// mismatch.
    pub fn from_parts(utf16_size: u32, data: &[u8]) -> Result<Self> {
        let units = mutf8::decode(data)?;
        if units.len() as u32 != utf16_size {
            return Err(malformed_error!(
                "String declares {} UTF-16 units but decodes to {}",
                utf16_size,
                units.len()
            ));
        }

        Ok(DexString {
            utf16_size,
            data: data.into(),
            units: units.into(),
        })
    }

    /// Encode a Rust string.
    #[must_use]
    pub fn new(s: &str) -> Self {
        let (utf16_size, data) = mutf8::encode_str(s);
        let units: Vec<u16> = s.encode_utf16().collect();
        DexString {
            utf16_size,
            data: data.into(),
            units: units.into(),
        }
    }

    /// The declared length in UTF-16 code units.
    #[must_use]
    pub fn utf16_size(&self) -> u32 {
        self.utf16_size
    }

    /// The verbatim MUTF-8 payload (without the trailing NUL).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The decoded UTF-16 code units.
    #[must_use]
    pub fn code_units(&self) -> &[u16] {
        &self.units
    }

    /// Decode to a Rust string, replacing unpaired surrogates.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }
}

impl PartialEq for DexString {
    fn eq(&self, other: &Self) -> bool {
        self.units == other.units
    }
}

impl Eq for DexString {}

impl PartialOrd for DexString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.units.cmp(&other.units)
    }
}

impl std::hash::Hash for DexString {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.units.hash(state);
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// An interned type constant, identified by its descriptor string
/// (`Ljava/lang/Object;`, `I`, `[J`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DexType {
    descriptor: Arc<DexString>,
}

impl DexType {
    /// Wrap a descriptor string.
    #[must_use]
    pub fn new(descriptor: Arc<DexString>) -> Self {
        DexType { descriptor }
    }

    /// The descriptor string.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<DexString> {
        &self.descriptor
    }

    /// The `void` primitive as a process-wide sentinel.
    ///
    /// `V` is the one primitive that can never appear as a field or
    /// parameter type, only as a return type, and callers needing it (e.g.
    /// synthesized `()V` prototypes in tests) share this instance instead of
    /// routing it through a pool. Deliberately not generalized to other
    /// primitives.
    #[must_use]
    pub fn void() -> &'static Arc<DexType> {
        static VOID: OnceLock<Arc<DexType>> = OnceLock::new();
        VOID.get_or_init(|| Arc::new(DexType::new(Arc::new(DexString::new("V")))))
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor)
    }
}

/// An interned method prototype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proto {
    /// The shorty descriptor (`VL`, `ILL`, ...).
    pub shorty: Arc<DexString>,
    /// Return type.
    pub return_type: Arc<DexType>,
    /// Parameter types in declaration order.
    pub parameters: Vec<Arc<DexType>>,
}

impl PartialOrd for Proto {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Proto {
    fn cmp(&self, other: &Self) -> Ordering {
        // Return-type major, parameter list minor: the output proto table
        // sort order. The shorty is derived from the other two and only
        // participates as a final tiebreaker for consistency with Eq.
        self.return_type
            .cmp(&other.return_type)
            .then_with(|| self.parameters.cmp(&other.parameters))
            .then_with(|| self.shorty.cmp(&other.shorty))
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.parameters {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

/// An interned field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Defining class.
    pub class: Arc<DexType>,
    /// Field type.
    pub ty: Arc<DexType>,
    /// Field name.
    pub name: Arc<DexString>,
}

impl PartialOrd for FieldRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldRef {
    fn cmp(&self, other: &Self) -> Ordering {
        // Defining class, then name, then type: the field_id sort order
        self.class
            .cmp(&other.class)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.ty.cmp(&other.ty))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.ty)
    }
}

/// An interned method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Defining class.
    pub class: Arc<DexType>,
    /// Method prototype.
    pub proto: Arc<Proto>,
    /// Method name.
    pub name: Arc<DexString>,
}

impl PartialOrd for MethodRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MethodRef {
    fn cmp(&self, other: &Self) -> Ordering {
        // Defining class, then name, then prototype: the method_id sort order
        self.class
            .cmp(&other.class)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.proto.cmp(&other.proto))
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.proto)
    }
}

/// The nine method handle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromRepr)]
#[repr(u16)]
pub enum MethodHandleKind {
    /// Set a static field.
    StaticPut = 0x00,
    /// Get a static field.
    StaticGet = 0x01,
    /// Set an instance field.
    InstancePut = 0x02,
    /// Get an instance field.
    InstanceGet = 0x03,
    /// Invoke a static method.
    InvokeStatic = 0x04,
    /// Invoke an instance method.
    InvokeInstance = 0x05,
    /// Invoke a constructor.
    InvokeConstructor = 0x06,
    /// Invoke a private method directly.
    InvokeDirect = 0x07,
    /// Invoke an interface method.
    InvokeInterface = 0x08,
}

impl MethodHandleKind {
    /// Whether this kind targets a field (the accessor kinds 0x00–0x03).
    #[must_use]
    pub fn is_field_kind(self) -> bool {
        matches!(
            self,
            MethodHandleKind::StaticPut
                | MethodHandleKind::StaticGet
                | MethodHandleKind::InstancePut
                | MethodHandleKind::InstanceGet
        )
    }
}

/// The member a method handle points at: a field for accessor kinds, a
/// method for invocation kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberRef {
    /// Field target.
    Field(Arc<FieldRef>),
    /// Method target.
    Method(Arc<MethodRef>),
}

/// An interned method handle constant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodHandle {
    /// Handle kind.
    pub kind: MethodHandleKind,
    /// The referenced member; its variant must match the kind.
    pub member: MemberRef,
}

/// An interned call site constant: the bootstrap triple plus any extra
/// bootstrap arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSite {
    /// Bootstrap method handle.
    pub bootstrap: Arc<MethodHandle>,
    /// Target method name passed to the bootstrap.
    pub method_name: Arc<DexString>,
    /// Target method type passed to the bootstrap.
    pub method_type: Arc<Proto>,
    /// Additional bootstrap arguments.
    pub extra_args: Vec<EncodedValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Arc<DexString> {
        Arc::new(DexString::new(text))
    }

    fn ty(descriptor: &str) -> Arc<DexType> {
        Arc::new(DexType::new(s(descriptor)))
    }

    #[test]
    fn string_ordering_is_utf16_lexical() {
        let mut strings = vec![
            DexString::new("b"),
            DexString::new("a"),
            DexString::new("ab"),
            DexString::new(""),
        ];
        strings.sort();

        let order: Vec<String> = strings.iter().map(DexString::to_string_lossy).collect();
        assert_eq!(order, ["", "a", "ab", "b"]);
    }

    #[test]
    fn string_equality_ignores_payload_spelling() {
        // NUL has exactly one legal spelling produced by our encoder, but
        // equality is defined over decoded units either way
        let a = DexString::from_parts(1, &[0xC0, 0x80]).unwrap();
        let b = DexString::new("\0");
        assert_eq!(a, b);
    }

    #[test]
    fn field_ordering_class_name_type() {
        let f = |class: &str, name: &str, desc: &str| FieldRef {
            class: ty(class),
            ty: ty(desc),
            name: s(name),
        };

        let mut fields = vec![
            f("LB;", "a", "I"),
            f("LA;", "b", "I"),
            f("LA;", "a", "J"),
            f("LA;", "a", "I"),
        ];
        fields.sort();

        let order: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        assert_eq!(order, ["LA;.a:I", "LA;.a:J", "LA;.b:I", "LB;.a:I"]);
    }

    #[test]
    fn proto_ordering_return_then_parameters() {
        let p = |ret: &str, params: &[&str], shorty: &str| Proto {
            shorty: s(shorty),
            return_type: ty(ret),
            parameters: params.iter().map(|d| ty(d)).collect(),
        };

        let a = p("I", &[], "I");
        let b = p("I", &["I"], "II");
        let c = p("V", &[], "V");

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn void_sentinel_is_shared() {
        let a = DexType::void();
        let b = DexType::void();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.descriptor().to_string_lossy(), "V");
    }

    #[test]
    fn method_handle_kinds() {
        assert_eq!(
            MethodHandleKind::from_repr(0x04),
            Some(MethodHandleKind::InvokeStatic)
        );
        assert_eq!(MethodHandleKind::from_repr(0x09), None);
        assert!(MethodHandleKind::StaticGet.is_field_kind());
        assert!(!MethodHandleKind::InvokeDirect.is_field_kind());
    }

    #[test]
    fn direct_method_predicate() {
        assert!(AccessFlags::PRIVATE.is_direct());
        assert!(AccessFlags::STATIC.is_direct());
        assert!(AccessFlags::CONSTRUCTOR.is_direct());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::FINAL).is_direct());
    }
}
