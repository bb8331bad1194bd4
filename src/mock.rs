//! Test doubles for the installer's collaborators
//!
//! Each mock lives next to the trait it implements; this module re-exports
//! them together with the shared [`Journal`] used to assert cross-collaborator
//! ordering.

use std::sync::{Arc, Mutex};

pub use crate::engine::mock::MockEngine;
pub use crate::fetch::mock::MockFetcher;
pub use crate::process::mock::MockRunner;
pub use crate::stages::preflight::StaticProbe;

/// Append-only log of calls shared between mocks
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    /// Number of entries starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_is_shared() {
        let journal = Journal::new();
        let other = journal.clone();

        journal.push("fetch: a");
        other.push("engine: pull b");
        journal.push("fetch: c");

        assert_eq!(other.entries().len(), 3);
        assert_eq!(journal.position("engine:"), Some(1));
        assert_eq!(journal.count("fetch:"), 2);
        assert!(!journal.contains("run:"));
    }
}
