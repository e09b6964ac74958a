//! Listener registry: registration, wildcard matching, priority ordering
//!
//! The registry owns three mappings: exact-key buckets, wildcard-key buckets
//! (any key containing `*`), and a resolution cache keyed by concrete event
//! name. The cache is derived state, never authoritative, and is cleared
//! wholesale on every registration or removal: a single wildcard
//! registration can affect resolution for many concrete names whose
//! relationship to the pattern is not pre-indexed, so correctness, not
//! precision, motivates the blanket invalidation.
//!
//! # Delivery order
//!
//! For a concrete event name, matching entries are merged exact-first then
//! wildcard, each group ordered by registration, and stable-sorted by
//! priority descending. Ties therefore break by merge order: exact entries
//! before wildcard entries, registration order within each group.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::types::ListenerRef;

/// Priority assigned when a registration does not specify one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A single registration: listener, priority, and registration order.
#[derive(Debug, Clone)]
pub struct ListenerEntry {
    /// The registered listener.
    pub listener: ListenerRef,
    /// Higher priorities are delivered first.
    pub priority: i32,
    /// Registry-global registration counter, used for deterministic
    /// tie-breaking.
    pub insertion: u64,
}

/// Owns listener registrations and resolves the delivery order for a
/// concrete event name.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    /// Exact event name -> registrations, in registration order.
    listeners: HashMap<String, Vec<ListenerEntry>>,
    /// Wildcard pattern -> registrations, in registration order.
    wildcards: HashMap<String, Vec<ListenerEntry>>,
    /// Concrete event name -> merged and sorted listener refs. Derived.
    cache: HashMap<String, Vec<ListenerRef>>,
    /// Monotonic registration counter.
    insertion_counter: u64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under an event key.
    ///
    /// Keys containing `*` go into the wildcard bucket for that exact
    /// pattern string; everything else into the exact bucket. The resolution
    /// cache is cleared unconditionally.
    pub fn register(&mut self, key: &str, listener: ListenerRef, priority: i32) {
        let entry = ListenerEntry {
            listener,
            priority,
            insertion: self.insertion_counter,
        };
        self.insertion_counter += 1;

        if is_wildcard(key) {
            self.wildcards.entry(key.to_string()).or_default().push(entry);
        } else {
            self.listeners.entry(key.to_string()).or_default().push(entry);
        }

        debug!(key, priority, "listener registered");
        self.cache.clear();
    }

    /// Remove every registration under an event key.
    ///
    /// Removes the wildcard bucket when the key is a pattern, else the exact
    /// bucket. No-op for an absent key; the cache is cleared either way.
    pub fn forget(&mut self, key: &str) {
        if is_wildcard(key) {
            self.wildcards.remove(key);
        } else {
            self.listeners.remove(key);
        }
        self.cache.clear();
    }

    /// Whether any registration exists for this key: an exact bucket, a
    /// wildcard bucket keyed by exactly this pattern, or a stored pattern
    /// matching the key as a concrete name.
    pub fn has(&self, key: &str) -> bool {
        self.listeners.contains_key(key)
            || self.wildcards.contains_key(key)
            || self.has_wildcard(key)
    }

    /// Whether some stored wildcard pattern matches this concrete name.
    pub fn has_wildcard(&self, name: &str) -> bool {
        self.wildcards.keys().any(|pattern| pattern_matches(pattern, name))
    }

    /// Resolve the delivery order for a concrete event name.
    ///
    /// `aliases` are additional exact keys the event answers to. The result
    /// is cached under the concrete name; the returned vector is a value
    /// snapshot, so callers may mutate the registry while iterating it.
    pub fn listeners_for(&mut self, name: &str, aliases: &[String]) -> Vec<ListenerRef> {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let resolved = self.resolve(name, aliases);
        self.cache.insert(name.to_string(), resolved.clone());
        resolved
    }

    fn resolve(&self, name: &str, aliases: &[String]) -> Vec<ListenerRef> {
        // The event's own bucket stays ahead of alias buckets; within the
        // alias group, registration order decides.
        let mut exact: Vec<&ListenerEntry> = Vec::new();
        if let Some(bucket) = self.listeners.get(name) {
            exact.extend(bucket.iter());
        }
        let mut aliased: Vec<&ListenerEntry> = Vec::new();
        for alias in aliases {
            if alias == name {
                continue;
            }
            if let Some(bucket) = self.listeners.get(alias) {
                aliased.extend(bucket.iter());
            }
        }
        aliased.sort_by_key(|entry| entry.insertion);
        exact.extend(aliased);

        let mut wild: Vec<&ListenerEntry> = self
            .wildcards
            .iter()
            .filter(|(pattern, _)| pattern_matches(pattern, name))
            .flat_map(|(_, bucket)| bucket.iter())
            .collect();
        wild.sort_by_key(|entry| entry.insertion);

        // Exact before wildcard, then a stable sort by priority descending,
        // so ties keep the merge order.
        let mut merged = exact;
        merged.extend(wild);
        merged.sort_by(|a, b| b.priority.cmp(&a.priority));

        merged.into_iter().map(|entry| entry.listener.clone()).collect()
    }

    /// Snapshot of the exact buckets, for enumeration and bulk cleanup.
    pub fn all(&self) -> HashMap<String, Vec<ListenerEntry>> {
        self.listeners.clone()
    }

    /// Exact event keys currently registered.
    pub fn exact_keys(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}

/// Whether an event key is a wildcard pattern.
pub(crate) fn is_wildcard(key: &str) -> bool {
    key.contains('*')
}

/// Anchored, case-sensitive glob match where `*` matches any substring.
pub(crate) fn pattern_matches(pattern: &str, name: &str) -> bool {
    if !is_wildcard(pattern) {
        return pattern == name;
    }

    let expression = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    Regex::new(&expression)
        .map(|matcher| matcher.is_match(name))
        .unwrap_or(false)
}
