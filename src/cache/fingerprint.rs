use crate::address::Address;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shared object compared by reference. Holding the `Arc` keeps the referent alive, so
/// its address cannot be reused by another allocation while a key refers to it.
#[derive(Clone)]
pub struct SharedRef(Arc<dyn Any + Send + Sync>);

impl SharedRef {
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for SharedRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for SharedRef {}

impl Hash for SharedRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Debug for SharedRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedRef(@{:x})", self.addr())
    }
}

/// One element of a fingerprint.
///
/// Primitives compare by value, `Identity` by the address of the shared object it was
/// taken from. Variants never compare equal to each other, so `Str("1") != U64(1)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Part {
    Absent,
    Bool(bool),
    U64(u64),
    I64(i64),
    Str(Arc<str>),
    Identity(SharedRef),
    List(Vec<Part>),
}

impl Part {
    /// Reference identity of a shared object.
    pub fn identity_of<T: Any + Send + Sync>(value: &Arc<T>) -> Self {
        let shared: Arc<dyn Any + Send + Sync> = value.clone();
        Part::Identity(SharedRef(shared))
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Part::Absent => out.push('~'),
            Part::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Part::U64(v) => out.push_str(&format!("u{v}")),
            Part::I64(v) => out.push_str(&format!("i{v}")),
            Part::Str(s) => {
                out.push('"');
                out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
            }
            Part::Identity(shared) => out.push_str(&format!("@{:x}", shared.addr())),
            Part::List(parts) => {
                out.push('[');
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    part.write_canonical(out);
                }
                out.push(']');
            }
        }
    }
}

impl From<&str> for Part {
    fn from(value: &str) -> Self {
        Part::Str(Arc::from(value))
    }
}

impl From<String> for Part {
    fn from(value: String) -> Self {
        Part::Str(Arc::from(value))
    }
}

impl From<&String> for Part {
    fn from(value: &String) -> Self {
        Part::Str(Arc::from(value.as_str()))
    }
}

impl From<u64> for Part {
    fn from(value: u64) -> Self {
        Part::U64(value)
    }
}

impl From<usize> for Part {
    fn from(value: usize) -> Self {
        Part::U64(value as u64)
    }
}

impl From<i64> for Part {
    fn from(value: i64) -> Self {
        Part::I64(value)
    }
}

impl From<bool> for Part {
    fn from(value: bool) -> Self {
        Part::Bool(value)
    }
}

impl From<&Address> for Part {
    fn from(value: &Address) -> Self {
        Part::Str(Arc::from(value.as_str()))
    }
}

impl From<Address> for Part {
    fn from(value: Address) -> Self {
        Part::from(&value)
    }
}

impl<T: Into<Part>> From<Option<T>> for Part {
    fn from(value: Option<T>) -> Self {
        value.map_or(Part::Absent, Into::into)
    }
}

/// Structural, order-sensitive cache key identifying one logical query.
///
/// Built fresh from current inputs on every lookup. Every input that distinguishes two
/// queries (operation, actor, connection, source set) must be part of it, or the two
/// queries will share one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    parts: Vec<Part>,
}

impl Fingerprint {
    /// Start a fingerprint with the operation name.
    pub fn new(operation: &str) -> Self {
        Self { parts: vec![Part::from(operation)] }
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn with(mut self, part: impl Into<Part>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Append an ordered nested list, e.g. the identifiers of a source set.
    pub fn with_list<I, P>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Part>,
    {
        self.parts.push(Part::List(items.into_iter().map(Into::into).collect()));
        self
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Operation name (first string part), used for log and notification text.
    pub fn operation(&self) -> &str {
        match self.parts.first() {
            Some(Part::Str(s)) => s,
            _ => "query",
        }
    }

    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (idx, part) in self.parts.iter().enumerate() {
            if idx > 0 {
                out.push('|');
            }
            part.write_canonical(&mut out);
        }
        out
    }

    /// First 8 bytes of the SHA-256 of the canonical form, hex encoded. For logs only.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.canonical().as_bytes());
        hash.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
