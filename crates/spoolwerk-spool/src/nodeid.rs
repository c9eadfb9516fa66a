// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spooler node name table.
//
// Node names are interned into small integer ids with reference counts.
// The local node is assigned first and therefore always gets id 0.  Slots
// whose count falls to zero are reused by the next assignment.

use spoolwerk_core::types::NodeId;
use tracing::debug;

/// Result of looking a node name up for matching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMatch {
    /// `*`: matches every node.
    Wildcard,
    /// A known node.
    Node(NodeId),
    /// A name nobody has assigned.  Matches nothing.
    Unknown,
}

impl NodeMatch {
    pub fn matches(&self, node: NodeId) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Node(id) => *id == node,
            Self::Unknown => false,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeSlot {
    name: String,
    refs: usize,
}

/// Reference-counted node name interner.
#[derive(Debug, Default)]
pub struct NodeTable {
    slots: Vec<Option<NodeSlot>>,
}

impl NodeTable {
    /// Create a table with `local` already assigned as id 0.
    pub fn with_local(local: &str) -> Self {
        let mut table = Self::default();
        table.assign(local);
        table
    }

    /// Return the id for `name`, creating it if needed, and take a reference.
    pub fn assign(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.lookup(name) {
            if let Some(slot) = self.slots[id.0].as_mut() {
                slot.refs += 1;
            }
            return id;
        }

        let slot = NodeSlot {
            name: name.to_string(),
            refs: 1,
        };
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(slot);
                free
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        debug!(node = name, id = index, "node name assigned");
        NodeId(index)
    }

    /// Drop one reference; the slot is reclaimed when none remain.
    pub fn free(&mut self, id: NodeId) {
        let Some(entry) = self.slots.get_mut(id.0) else {
            return;
        };
        let reclaim = match entry.as_mut() {
            Some(slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if reclaim {
            debug!(id = id.0, "node name reclaimed");
            *entry = None;
        }
    }

    /// Find an existing id without allocating.
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.name == name))
            .map(NodeId)
    }

    /// Resolve a name from a command, honouring the `*` wildcard.
    pub fn matcher(&self, name: &str) -> NodeMatch {
        if name == "*" {
            return NodeMatch::Wildcard;
        }
        match self.lookup(name) {
            Some(id) => NodeMatch::Node(id),
            None => NodeMatch::Unknown,
        }
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.name.as_str())
            .unwrap_or("?")
    }

    pub fn refs(&self, id: NodeId) -> usize {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map_or(0, |s| s.refs)
    }

    pub fn is_local(&self, id: NodeId) -> bool {
        id == NodeId::LOCAL
    }
}
