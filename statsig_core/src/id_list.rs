//! ID lists: server-managed membership sets used by `in_segment_list` conditions.
use std::collections::HashSet;

use crate::spec::IdListDescriptor;

/// One named ID list and the portion of its upstream file consumed so far.
///
/// A published `IdList` is never modified. Applying a delta produces a new list that the spec
/// store swaps in, so evaluations keep seeing the membership they started with.
///
/// `file_id` and `creation_time` identify one upstream file. When the server recreates the file,
/// the spec store replaces the whole `IdList` instead of diffing it.
#[derive(Debug, Clone)]
pub struct IdList {
    pub name: String,
    pub url: String,
    pub file_id: String,
    pub creation_time: i64,
    /// Bytes of the upstream file already applied.
    size: u64,
    ids: HashSet<String>,
}

impl IdList {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        file_id: impl Into<String>,
        creation_time: i64,
    ) -> IdList {
        IdList {
            name: name.into(),
            url: url.into(),
            file_id: file_id.into(),
            creation_time,
            size: 0,
            ids: HashSet::new(),
        }
    }

    /// Create an empty list for a descriptor. Returns `None` if the descriptor lacks a URL or
    /// a file ID.
    pub fn from_descriptor(descriptor: &IdListDescriptor) -> Option<IdList> {
        Some(IdList::new(
            descriptor.name.clone(),
            descriptor.url.clone()?,
            descriptor.file_id.clone()?,
            descriptor.creation_time,
        ))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn contains(&self, hashed_id: &str) -> bool {
        self.ids.contains(hashed_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Copy of this list with a newline-delimited `+id` / `-id` diff applied in order, and
    /// `size` bytes marked as consumed. Lines with any other prefix are skipped.
    pub fn with_delta(&self, delta: &str, size: u64) -> IdList {
        let mut next = self.clone();
        for line in delta.lines() {
            let line = line.trim();
            if let Some(id) = line.strip_prefix('+') {
                if !id.is_empty() {
                    next.ids.insert(id.to_owned());
                }
            } else if let Some(id) = line.strip_prefix('-') {
                if !id.is_empty() {
                    next.ids.remove(id);
                }
            }
        }
        next.size = size;
        next
    }
}
