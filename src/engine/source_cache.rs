//! Memoized source text for display
//!
//! Text is fetched lazily, split into lines once, and kept until
//! [`SourceCache::flush`]. Entries keyed by source reference only make sense
//! for the adapter session that handed out the reference.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use crate::common::{Error, Result};

/// Shared, immutable line list
pub type Lines = Arc<Vec<String>>;

fn split_lines(text: &str) -> Lines {
    Arc::new(text.lines().map(str::to_string).collect())
}

#[derive(Debug, Default)]
pub struct SourceCache {
    by_reference: HashMap<i64, Lines>,
    by_path: HashMap<String, Lines>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for an adapter source reference, fetching on first use
    pub async fn get_by_reference<F, Fut>(&mut self, reference: i64, fetch: F) -> Result<Lines>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(lines) = self.by_reference.get(&reference) {
            return Ok(Arc::clone(lines));
        }

        let lines = split_lines(&fetch(reference).await?);
        tracing::debug!(reference, lines = lines.len(), "Cached source by reference");
        self.by_reference.insert(reference, Arc::clone(&lines));
        Ok(lines)
    }

    /// Lines for a local file, reading it on first use
    pub async fn get_by_path(&mut self, path: &str) -> Result<Lines> {
        if let Some(lines) = self.by_path.get(path) {
            return Ok(Arc::clone(lines));
        }

        let text = tokio::fs::read_to_string(Path::new(path))
            .await
            .map_err(|e| Error::FileRead {
                path: path.to_string(),
                error: e.to_string(),
            })?;
        let lines = split_lines(&text);
        tracing::debug!(path, lines = lines.len(), "Cached source by path");
        self.by_path.insert(path.to_string(), Arc::clone(&lines));
        Ok(lines)
    }

    /// Drop everything
    pub fn flush(&mut self) {
        self.by_reference.clear();
        self.by_path.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty() && self.by_path.is_empty()
    }
}
