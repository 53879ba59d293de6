//! Key qualification under a namespace prefix.

use crate::core::error::{RegistryError, RegistryResult};

/// The key prefix scoping one logical registry.
///
/// Callers use keys relative to the namespace; the store only ever sees
/// qualified keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Create a namespace from a prefix such as `/turing-awards/`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Qualify a relative key. Empty keys are rejected.
    pub fn qualify(&self, key: &str) -> RegistryResult<String> {
        if key.is_empty() {
            return Err(RegistryError::invalid("key must not be empty"));
        }
        Ok(format!("{}{}", self.prefix, key))
    }

    /// Qualify a relative key prefix. The empty prefix covers the whole
    /// namespace.
    pub fn qualify_prefix(&self, prefix: &str) -> String {
        format!("{}{}", self.prefix, prefix)
    }

    /// Strip the namespace prefix from a qualified key.
    pub fn localize<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_and_localize() {
        let ns = Namespace::new("/turing-awards/");
        let full = ns.qualify("Knuth").unwrap();
        assert_eq!(full, "/turing-awards/Knuth");
        assert_eq!(ns.localize(&full), "Knuth");
    }

    #[test]
    fn test_empty_key_rejected() {
        let ns = Namespace::new("/ns/");
        assert_eq!(ns.qualify("").unwrap_err().code(), "InvalidRequest");
        assert_eq!(ns.qualify_prefix(""), "/ns/");
    }
}
