//! Mock fetcher for testing

use async_trait::async_trait;
use std::collections::HashMap;

use super::Fetcher;
use crate::InstallError;
use crate::mock::Journal;

/// Mock fetcher serving canned bodies
///
/// Unknown URLs answer with a small placeholder script so tests only need to
/// register the bodies they care about.
#[derive(Debug, Default)]
pub struct MockFetcher {
    journal: Journal,
    bodies: HashMap<String, Vec<u8>>,
    failing: Vec<String>,
    unreachable: bool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Serve `body` for `url`
    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    /// Fail every fetch of URLs starting with `prefix`
    pub fn with_failure(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    /// Fail every probe and fetch
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn fails(&self, url: &str) -> bool {
        self.unreachable || self.failing.iter().any(|p| url.starts_with(p.as_str()))
    }

    fn error(url: &str) -> InstallError {
        InstallError::Fetch {
            url: url.to_string(),
            attempts: 6,
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn probe(&self, url: &str) -> Result<(), InstallError> {
        self.journal.push(format!("probe: {}", url));
        if self.unreachable {
            return Err(Self::error(url));
        }
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, InstallError> {
        self.journal.push(format!("fetch: {}", url));
        if self.fails(url) {
            return Err(Self::error(url));
        }
        Ok(self
            .bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| b"#!/bin/sh\nexit 0\n".to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetcher_bodies_and_failures() {
        let journal = Journal::new();
        let fetcher = MockFetcher::new()
            .with_journal(journal.clone())
            .with_body("https://x/rules", "KERNEL==\"ttyACM*\"")
            .with_failure("https://x/broken");

        assert_eq!(
            fetcher.fetch_text("https://x/rules").await.unwrap(),
            "KERNEL==\"ttyACM*\""
        );
        assert!(fetcher.fetch("https://x/broken/script.sh").await.is_err());
        assert!(fetcher.probe("https://x").await.is_ok());
        assert_eq!(journal.count("fetch:"), 2);
    }

    #[tokio::test]
    async fn test_mock_fetcher_unreachable() {
        let fetcher = MockFetcher::new().unreachable();
        assert!(fetcher.probe("https://x").await.is_err());
        assert!(fetcher.fetch("https://x/a").await.is_err());
    }
}
