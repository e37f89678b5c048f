//! Handler registry (spec.md §4.6, §9): maps `/Filter` names to handler
//! variants and, within each handler kind, `/CFM` method names to crypt
//! filter factories. Subclassing a registry copies its maps rather than
//! sharing them, so local registrations never leak upward to the parent.

use crate::error::HandlerError;
use indexmap::IndexMap;

/// Which concrete handler a `/Filter` name resolves to (spec.md §9's tagged
/// sum over class inheritance).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Standard,
    PubKey,
}

/// A registry of `/Filter` names to handler kinds, plus a crypt-filter
/// method registry owned independently per handler kind (mirroring the
/// source's per-subclass crypt-filter factory tables).
#[derive(Clone, Debug)]
pub struct HandlerRegistry {
    handlers: IndexMap<String, HandlerKind>,
    crypt_filter_methods: IndexMap<HandlerKind, IndexMap<String, ()>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = HandlerRegistry {
            handlers: IndexMap::new(),
            crypt_filter_methods: IndexMap::new(),
        };
        registry.handlers.insert("Standard".to_string(), HandlerKind::Standard);
        registry.handlers.insert("Adobe.PubSec".to_string(), HandlerKind::PubKey);

        let mut standard_methods = IndexMap::new();
        standard_methods.insert("V2".to_string(), ());
        standard_methods.insert("AESV2".to_string(), ());
        standard_methods.insert("AESV3".to_string(), ());
        standard_methods.insert("None".to_string(), ());
        registry.crypt_filter_methods.insert(HandlerKind::Standard, standard_methods.clone());
        registry.crypt_filter_methods.insert(HandlerKind::PubKey, standard_methods);

        registry
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry { handlers: IndexMap::new(), crypt_filter_methods: IndexMap::new() }
    }

    /// Registers which handler kind a `/Filter` name dispatches to,
    /// replacing any existing mapping for that name (spec.md §4.6,
    /// `register(subclass)`).
    pub fn register(&mut self, filter_name: impl Into<String>, kind: HandlerKind) {
        let filter_name = filter_name.into();
        if self.handlers.contains_key(&filter_name) {
            log::warn!("handler registry: replacing handler class for /Filter {filter_name:?}");
        }
        self.handlers.insert(filter_name, kind);
        self.crypt_filter_methods.entry(kind).or_default();
    }

    pub fn lookup(&self, filter_name: &str) -> Result<HandlerKind, HandlerError> {
        self.handlers
            .get(filter_name)
            .copied()
            .ok_or_else(|| HandlerError::PdfRead(format!("no handler registered for /Filter {filter_name:?}")))
    }

    /// Adds a crypt-filter method to the registry scoped to `kind`, logging
    /// an overwrite of an existing factory at warn level.
    pub fn register_crypt_filter_method(&mut self, kind: HandlerKind, method: impl Into<String>) {
        let method = method.into();
        let methods = self.crypt_filter_methods.entry(kind).or_default();
        if methods.contains_key(&method) {
            log::warn!("handler registry: replacing crypt-filter method {method:?} for {kind:?}");
        }
        methods.insert(method, ());
    }

    pub fn supports_crypt_filter_method(&self, kind: HandlerKind, method: &str) -> bool {
        self.crypt_filter_methods.get(&kind).is_some_and(|methods| methods.contains_key(method))
    }

    /// Produces a registry that inherits `self`'s entries by value. Further
    /// registrations on the returned registry (or on `self`) are invisible
    /// to the other — the "copy, never share" rule spec.md §9 pins down as
    /// the fix for the upward-leak bug the original's tests guard against.
    pub fn subclass(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_standard_and_pubkey() {
        let registry = HandlerRegistry::default();
        assert_eq!(registry.lookup("Standard").unwrap(), HandlerKind::Standard);
        assert_eq!(registry.lookup("Adobe.PubSec").unwrap(), HandlerKind::PubKey);
        assert!(registry.lookup("Nonexistent").is_err());
    }

    #[test]
    fn subclass_registrations_do_not_leak_upward() {
        let parent = HandlerRegistry::default();
        let mut child = parent.subclass();

        child.register_crypt_filter_method(HandlerKind::Standard, "CustomMethod");
        assert!(child.supports_crypt_filter_method(HandlerKind::Standard, "CustomMethod"));
        assert!(!parent.supports_crypt_filter_method(HandlerKind::Standard, "CustomMethod"));

        child.register("MyFilter", HandlerKind::Standard);
        assert!(child.lookup("MyFilter").is_ok());
        assert!(parent.lookup("MyFilter").is_err());
    }

    #[test]
    fn registering_known_methods_reports_support() {
        let registry = HandlerRegistry::default();
        assert!(registry.supports_crypt_filter_method(HandlerKind::Standard, "AESV3"));
        assert!(!registry.supports_crypt_filter_method(HandlerKind::Standard, "AESV4"));
    }
}
