//! Run-scoped element identity.
//!
//! The map is an arena rebuilt from scratch on every snapshot. Identifiers
//! are `el_<index>` strings into the arena; node handles carry the snapshot
//! generation so a handle from an earlier snapshot never matches.

use crate::page::NodeRef;
use crate::types::ElementDescriptor;

const ID_PREFIX: &str = "el_";

#[derive(Debug, Clone)]
pub struct ElementEntry {
    pub node: NodeRef,
    pub descriptor: ElementDescriptor,
}

#[derive(Debug, Default)]
pub struct ElementMap {
    generation: u64,
    entries: Vec<ElementEntry>,
}

impl ElementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry and open a new generation for the next capture.
    pub fn begin(&mut self) -> u64 {
        self.entries.clear();
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Identifier the next inserted entry will receive.
    pub fn next_id(&self) -> String {
        format_id(self.entries.len())
    }

    /// Append an entry for the current generation. Returns `false` (and
    /// stores nothing) for a node stamped by another capture.
    pub fn insert(&mut self, node: NodeRef, descriptor: ElementDescriptor) -> bool {
        if node.generation != self.generation {
            return false;
        }
        self.entries.push(ElementEntry { node, descriptor });
        true
    }

    pub fn resolve(&self, id: &str) -> Option<&ElementEntry> {
        let index = parse_id(id)?;
        self.entries
            .get(index)
            .filter(|entry| entry.node.generation == self.generation)
    }

    /// Reverse lookup: identifier currently assigned to a node.
    pub fn id_of(&self, node: NodeRef) -> Option<String> {
        if node.generation != self.generation {
            return None;
        }
        self.entries
            .iter()
            .position(|entry| entry.node == node)
            .map(format_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn format_id(index: usize) -> String {
    format!("{ID_PREFIX}{index}")
}

pub fn parse_id(id: &str) -> Option<usize> {
    let digits = id.strip_prefix(ID_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
