//! # Handler registry: job names, handlers, and their hooks.
//!
//! [`HandlerRegistry`] maps each job name to its handler plus ordered lists
//! of before/after/error hooks, with a parallel set of global hooks that
//! apply to every name.
//!
//! ## Rules
//! - Mutation happens in setup code before the daemon reaches steady state;
//!   afterwards every runner reads the table concurrently.
//! - A single `RwLock` covers the whole table: register/remove are atomic as
//!   a unit, reads never observe a partially updated entry.
//! - `*_for(name)` resolution returns global hooks first, then name-scoped
//!   ones, each in registration order.
//! - Hooks may be attached before the handler for their name is registered;
//!   the entry exists either way and `register` preserves it.
//! - `remove(name)` drops the handler and all scoped hooks for that name
//!   atomically.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::jobs::handler::{ErrorHookRef, HandlerRef, HookRef};

#[derive(Default)]
struct HandlerEntry {
    handler: Option<HandlerRef>,
    before: Vec<HookRef>,
    after: Vec<HookRef>,
    error: Vec<ErrorHookRef>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, HandlerEntry>,
    before: Vec<HookRef>,
    after: Vec<HookRef>,
    error: Vec<ErrorHookRef>,
}

/// Concurrently readable table of handlers and hooks.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<Inner>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `name`.
    ///
    /// Idempotent: re-registering overwrites the handler and keeps any hooks
    /// already attached to the name.
    pub fn register(&self, name: impl Into<String>, handler: HandlerRef) {
        let mut inner = self.write();
        inner.entries.entry(name.into()).or_default().handler = Some(handler);
    }

    /// Removes the handler and every scoped hook for `name` atomically.
    ///
    /// Returns whether a handler was registered under the name.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.write();
        inner
            .entries
            .remove(name)
            .map(|entry| entry.handler.is_some())
            .unwrap_or(false)
    }

    /// Looks up the handler for `name`.
    pub fn handler_for(&self, name: &str) -> Option<HandlerRef> {
        self.read()
            .entries
            .get(name)
            .and_then(|entry| entry.handler.clone())
    }

    /// Attaches a before hook; `scope = None` applies it to every job name.
    pub fn before(&self, scope: Option<&str>, hook: HookRef) {
        let mut inner = self.write();
        match scope {
            None => inner.before.push(hook),
            Some(name) => inner
                .entries
                .entry(name.to_string())
                .or_default()
                .before
                .push(hook),
        }
    }

    /// Attaches an after hook; `scope = None` applies it to every job name.
    pub fn after(&self, scope: Option<&str>, hook: HookRef) {
        let mut inner = self.write();
        match scope {
            None => inner.after.push(hook),
            Some(name) => inner
                .entries
                .entry(name.to_string())
                .or_default()
                .after
                .push(hook),
        }
    }

    /// Attaches an error hook; `scope = None` applies it to every job name.
    pub fn error(&self, scope: Option<&str>, hook: ErrorHookRef) {
        let mut inner = self.write();
        match scope {
            None => inner.error.push(hook),
            Some(name) => inner
                .entries
                .entry(name.to_string())
                .or_default()
                .error
                .push(hook),
        }
    }

    /// Before hooks for `name`: global first, then scoped, registration order.
    pub fn before_for(&self, name: &str) -> Vec<HookRef> {
        let inner = self.read();
        let mut hooks = inner.before.clone();
        if let Some(entry) = inner.entries.get(name) {
            hooks.extend(entry.before.iter().cloned());
        }
        hooks
    }

    /// After hooks for `name`: global first, then scoped, registration order.
    pub fn after_for(&self, name: &str) -> Vec<HookRef> {
        let inner = self.read();
        let mut hooks = inner.after.clone();
        if let Some(entry) = inner.entries.get(name) {
            hooks.extend(entry.after.iter().cloned());
        }
        hooks
    }

    /// Error hooks for `name`: global first, then scoped, registration order.
    pub fn error_for(&self, name: &str) -> Vec<ErrorHookRef> {
        let inner = self.read();
        let mut hooks = inner.error.clone();
        if let Some(entry) = inner.entries.get(name) {
            hooks.extend(entry.error.iter().cloned());
        }
        hooks
    }

    /// Sorted names with a registered handler.
    pub fn names(&self) -> Vec<String> {
        let inner = self.read();
        let mut names: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.handler.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Whether `name` has a registered handler.
    pub fn contains(&self, name: &str) -> bool {
        self.read()
            .entries
            .get(name)
            .map(|entry| entry.handler.is_some())
            .unwrap_or(false)
    }

    /// Whether any handler is registered.
    pub fn is_empty(&self) -> bool {
        !self.read().entries.values().any(|e| e.handler.is_some())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::jobs::handler::{ErrorHookFn, HandlerFn, HookFn};
    use serde_json::Value;

    fn noop_handler() -> HandlerRef {
        HandlerFn::arc(|_: Value| async { Ok(()) })
    }

    fn noop_hook() -> HookRef {
        HookFn::arc(|_| async { Ok(()) })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.handler_for("a").is_none());

        registry.register("a", noop_handler());
        assert!(!registry.is_empty());
        assert!(registry.handler_for("a").is_some());
        assert!(registry.contains("a"));
        assert_eq!(registry.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_register_is_idempotent_and_keeps_hooks() {
        let registry = HandlerRegistry::new();
        registry.register("a", noop_handler());
        registry.before(Some("a"), noop_hook());
        registry.register("a", noop_handler());
        assert_eq!(registry.before_for("a").len(), 1);
    }

    #[test]
    fn test_remove_drops_handler_and_hooks() {
        let registry = HandlerRegistry::new();
        registry.register("a", noop_handler());
        registry.before(Some("a"), noop_hook());
        registry.error(Some("a"), ErrorHookFn::arc(|_: JobError, _| async {}));

        assert!(registry.remove("a"));
        assert!(registry.handler_for("a").is_none());
        assert!(registry.before_for("a").is_empty());
        assert!(registry.error_for("a").is_empty());
        assert!(!registry.remove("a"));
    }

    #[test]
    fn test_hooks_attach_before_handler_registration() {
        let registry = HandlerRegistry::new();
        registry.after(Some("late"), noop_hook());
        // no handler yet: the name is not announced...
        assert!(!registry.contains("late"));
        assert!(registry.names().is_empty());
        // ...but the hook is kept for when it arrives
        registry.register("late", noop_handler());
        assert_eq!(registry.after_for("late").len(), 1);
    }

    #[test]
    fn test_resolution_is_global_then_scoped() {
        let registry = HandlerRegistry::new();
        registry.before(Some("a"), noop_hook());
        registry.before(None, noop_hook());
        registry.before(None, noop_hook());

        // scoped hooks come after both globals despite being attached first
        assert_eq!(registry.before_for("a").len(), 3);
        assert_eq!(registry.before_for("other").len(), 2);
    }

    #[test]
    fn test_global_hooks_survive_remove() {
        let registry = HandlerRegistry::new();
        registry.register("a", noop_handler());
        registry.before(None, noop_hook());
        registry.remove("a");
        assert_eq!(registry.before_for("b").len(), 1);
    }
}
