//! Durable, user-facing breakpoint list
//!
//! The registry exists independently of any adapter session. Breakpoints
//! are numbered once, in creation order, and keep that number until they
//! are deleted; numbers are never reused.

use std::collections::{BTreeMap, HashMap};

use crate::common::{Error, Result};

/// A user breakpoint and what the adapter last told us about it
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    index: u32,
    path: Option<String>,
    line: u32,
    enabled: bool,
    verified: bool,
    adapter_id: Option<i64>,
    message: Option<String>,
}

impl Breakpoint {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Source path; `None` for breakpoints not tied to a file
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn adapter_id(&self) -> Option<i64> {
        self.adapter_id
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
    }

    pub fn set_adapter_id(&mut self, id: i64) {
        self.adapter_id = Some(id);
    }

    pub fn set_message(&mut self, message: Option<String>) {
        self.message = message;
    }
}

/// Ordered breakpoint list with a per-path grouping
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    /// Breakpoints in index order
    breakpoints: Vec<Breakpoint>,
    /// Indices per source path, in insertion order
    by_path: HashMap<String, Vec<u32>>,
    next_index: u32,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enabled, unverified breakpoint and return its index
    pub fn add_source_breakpoint(&mut self, path: &str, line: u32) -> u32 {
        self.next_index += 1;
        let index = self.next_index;

        self.breakpoints.push(Breakpoint {
            index,
            path: Some(path.to_string()),
            line,
            enabled: true,
            verified: false,
            adapter_id: None,
            message: None,
        });
        self.by_path.entry(path.to_string()).or_default().push(index);

        tracing::debug!(index, path, line, "Breakpoint added");
        index
    }

    pub fn get_all_breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    fn position(&self, index: u32) -> Result<usize> {
        // Indices are strictly increasing, so the list stays sorted
        self.breakpoints
            .binary_search_by_key(&index, |bp| bp.index)
            .map_err(|_| Error::BreakpointNotFound(index))
    }

    pub fn get_breakpoint_by_index(&self, index: u32) -> Result<&Breakpoint> {
        let pos = self.position(index)?;
        Ok(&self.breakpoints[pos])
    }

    pub fn get_breakpoint_by_index_mut(&mut self, index: u32) -> Result<&mut Breakpoint> {
        let pos = self.position(index)?;
        Ok(&mut self.breakpoints[pos])
    }

    pub fn get_breakpoint_by_id(&self, id: i64) -> Result<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.adapter_id == Some(id))
            .ok_or(Error::BreakpointIdNotFound(id))
    }

    pub fn get_breakpoint_by_id_mut(&mut self, id: i64) -> Result<&mut Breakpoint> {
        self.breakpoints
            .iter_mut()
            .find(|bp| bp.adapter_id == Some(id))
            .ok_or(Error::BreakpointIdNotFound(id))
    }

    /// Enabled breakpoints for one path, in insertion order
    pub fn get_all_enabled_breakpoints_for_source(&self, path: &str) -> Vec<&Breakpoint> {
        self.by_path
            .get(path)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| self.get_breakpoint_by_index(i).ok())
                    .filter(|bp| bp.enabled)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Enabled breakpoints grouped by path; paths with none enabled are omitted
    pub fn get_all_enabled_breakpoints_by_path(&self) -> BTreeMap<&str, Vec<&Breakpoint>> {
        self.by_path
            .keys()
            .filter_map(|path| {
                let enabled = self.get_all_enabled_breakpoints_for_source(path);
                (!enabled.is_empty()).then_some((path.as_str(), enabled))
            })
            .collect()
    }

    /// Remove a breakpoint from the list and from its path group
    pub fn delete_breakpoint(&mut self, index: u32) -> Result<Breakpoint> {
        let pos = self.position(index)?;
        let removed = self.breakpoints.remove(pos);

        if let Some(path) = &removed.path {
            if let Some(group) = self.by_path.get_mut(path) {
                group.retain(|&i| i != index);
                if group.is_empty() {
                    self.by_path.remove(path);
                }
            }
        }

        tracing::debug!(index, "Breakpoint deleted");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}
