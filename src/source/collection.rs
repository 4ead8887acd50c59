//! The collection: an ordered, handle-addressable catalog of sources, plus
//! the active-source and active-group state that lets users omit `@handle`
//! in queries.

use super::{handle_group, valid_handle, Source};
use crate::error::SqError;
use eyre::Result;
use serde::{Deserialize, Serialize};

/// Ordered mapping of handle → source. Cloning produces an independent deep
/// copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    active_group: String,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Registers a source. The handle must be valid and unique.
    pub fn add(&mut self, src: Source) -> Result<()> {
        valid_handle(&src.handle)?;
        if self.sources.iter().any(|s| s.handle == src.handle) {
            return Err(SqError::invalid_source(format!(
                "source already exists: {}",
                src.handle
            ))
            .into());
        }
        self.sources.push(src);
        Ok(())
    }

    pub fn get(&self, handle: &str) -> Result<&Source> {
        self.sources
            .iter()
            .find(|s| s.handle == handle)
            .ok_or_else(|| SqError::not_exist(format!("source not found: {handle}")).into())
    }

    /// Removes a source. If it was the active source, active state is
    /// cleared.
    pub fn remove(&mut self, handle: &str) -> Result<()> {
        let idx = self
            .sources
            .iter()
            .position(|s| s.handle == handle)
            .ok_or_else(|| SqError::not_exist(format!("source not found: {handle}")))?;

        self.sources.remove(idx);
        if self.active.as_deref() == Some(handle) {
            self.active = None;
        }
        Ok(())
    }

    /// The active source, if one is set.
    pub fn active(&self) -> Option<&Source> {
        let handle = self.active.as_deref()?;
        self.sources.iter().find(|s| s.handle == handle)
    }

    /// Sets the active source, which must exist in the collection.
    pub fn set_active(&mut self, handle: &str) -> Result<&Source> {
        let src = self
            .sources
            .iter()
            .find(|s| s.handle == handle)
            .ok_or_else(|| SqError::not_exist(format!("source not found: {handle}")))?;
        self.active = Some(src.handle.clone());
        Ok(src)
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn active_group(&self) -> &str {
        &self.active_group
    }

    /// Sets the active group. The root group `""` always exists; any other
    /// group must contain at least one source.
    pub fn set_active_group(&mut self, group: &str) -> Result<()> {
        if !group.is_empty() && !self.sources.iter().any(|s| in_group(&s.handle, group)) {
            return Err(SqError::not_exist(format!("group not found: {group}")).into());
        }
        self.active_group = group.to_string();
        Ok(())
    }

    /// Sources whose handle path lies within `group` (segment-aligned).
    /// The root group `""` contains everything.
    pub fn sources_in_group(&self, group: &str) -> Vec<&Source> {
        self.sources
            .iter()
            .filter(|s| in_group(&s.handle, group))
            .collect()
    }

    /// All distinct group paths present, root included, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups = vec![String::new()];
        for src in &self.sources {
            let g = handle_group(&src.handle);
            if !g.is_empty() {
                // Each ancestor path is itself a group.
                let mut path = String::new();
                for seg in g.split('.') {
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(seg);
                    if !groups.contains(&path) {
                        groups.push(path.clone());
                    }
                }
            }
        }
        groups.sort();
        groups
    }
}

fn in_group(handle: &str, group: &str) -> bool {
    if group.is_empty() {
        return true;
    }
    let hg = handle_group(handle);
    hg == group || hg.starts_with(group) && hg.as_bytes().get(group.len()) == Some(&b'.')
}
