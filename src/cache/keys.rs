//! Cache key definitions.
//!
//! An [`Identifier`] is the ordered list of components naming one logical
//! resource. [`derive_key`] renders it into the namespaced string used by the
//! key-value store.

use std::fmt::{self, Display, Write as _};

use thiserror::Error;

/// Namespace prepended to every derived key.
pub const KEY_PREFIX: &str = "ProxyPageCache_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("identifier must contain at least one component")]
    Empty,
}

/// Ordered, non-empty sequence of identifying components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    parts: Vec<String>,
}

impl Identifier {
    /// Build an identifier from any sequence of displayable components.
    ///
    /// Order is kept as given; duplicates are kept too.
    pub fn new<I, T>(parts: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        let parts: Vec<String> = parts.into_iter().map(|part| part.to_string()).collect();
        if parts.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { parts })
    }

    /// Identifier made of exactly one component.
    pub fn single(part: impl Display) -> Self {
        Self {
            parts: vec![part.to_string()],
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn cache_key(&self) -> String {
        derive_key(self)
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.parts.join(", "))
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self { parts: vec![value] }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self::single(value)
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self::single(value)
    }
}

/// Render an identifier as `ProxyPageCache_[a,b,...]`.
///
/// Separator, bracket, escape and whitespace/control bytes inside a component
/// are written as `%XX`, so distinct identifiers never share a key and the
/// result is always a legal memcached key body.
pub fn derive_key(id: &Identifier) -> String {
    let mut key = String::with_capacity(
        KEY_PREFIX.len() + 2 + id.parts.iter().map(|p| p.len() + 1).sum::<usize>(),
    );
    key.push_str(KEY_PREFIX);
    key.push('[');
    for (index, part) in id.parts.iter().enumerate() {
        if index > 0 {
            key.push(',');
        }
        escape_component(part, &mut key);
    }
    key.push(']');
    key
}

fn escape_component(part: &str, out: &mut String) {
    for ch in part.chars() {
        if needs_escape(ch) {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                // Writing into a String cannot fail.
                let _ = write!(out, "%{byte:02X}");
            }
        } else {
            out.push(ch);
        }
    }
}

fn needs_escape(ch: char) -> bool {
    matches!(ch, '%' | ',' | '[' | ']') || ch.is_whitespace() || ch.is_control()
}
