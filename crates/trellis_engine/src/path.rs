//! Segment and path linking.
//!
//! A node is linked while it can let matches through: an adapter once a fact
//! has passed it, a join or exists node while its right memory holds a fact.
//! Not, accumulate and terminal nodes are always linked. A segment is linked
//! when all of its nodes are, and a rule's path when all of its segments are.
//! Only a linked path owns an agenda item and may produce activations.
//!
//! Left tuples are materialized only in nodes that some linked path crosses.
//! While every path through a node is unlinked its left memory stays empty,
//! and it is rebuilt from its parent's memory when a path through it links.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::network::{NodeId, NodeKind, RuleBase, SegmentId};

/// A change in a rule's path state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathChange {
    /// Terminal of the rule.
    pub terminal: NodeId,
    /// Rule name.
    pub rule: Arc<str>,
    /// Whether the path became linked.
    pub linked: bool,
}

/// Link state of one rule.
#[derive(Clone, Debug)]
pub struct PathMemory {
    /// Rule name.
    pub rule: Arc<str>,
    /// Segments from the root, with their link bit.
    pub segments: Vec<(SegmentId, bool)>,
    /// Set while every segment is linked.
    pub agenda_item: bool,
}

impl PathMemory {
    fn all_linked(&self) -> bool {
        self.segments.iter().all(|(_, linked)| *linked)
    }
}

/// Link state of every node, segment and rule path in a session.
#[derive(Debug)]
pub struct PathMemories {
    nodes: HashMap<NodeId, bool>,
    unlinked_in_segment: Vec<usize>,
    paths: HashMap<NodeId, PathMemory>,
    materialized: HashSet<NodeId>,
}

impl PathMemories {
    /// Computes the initial state: nodes that need input start unlinked.
    #[must_use]
    pub fn new(base: &RuleBase) -> Self {
        let mut nodes = HashMap::new();
        let mut unlinked_in_segment = vec![0; base.segments().len()];
        for segment in base.segments() {
            for id in &segment.nodes {
                let linked = base
                    .node(*id)
                    .map(|n| starts_linked(&n.kind))
                    .unwrap_or(true);
                nodes.insert(*id, linked);
                if !linked {
                    unlinked_in_segment[segment.id.0] += 1;
                }
            }
        }

        let paths = base
            .rules()
            .into_iter()
            .map(|rule| {
                let segments = rule
                    .path
                    .iter()
                    .map(|s| (*s, unlinked_in_segment[s.0] == 0))
                    .collect();
                let mut memory = PathMemory {
                    rule: Arc::clone(&rule.name),
                    segments,
                    agenda_item: false,
                };
                memory.agenda_item = memory.all_linked();
                (rule.terminal, memory)
            })
            .collect();

        Self {
            nodes,
            unlinked_in_segment,
            paths,
            materialized: HashSet::new(),
        }
    }

    /// Sets a node's link bit and returns the rule paths whose state changed.
    pub fn set_node(&mut self, base: &RuleBase, node: NodeId, linked: bool) -> Vec<PathChange> {
        let Some(current) = self.nodes.get_mut(&node) else {
            return Vec::new();
        };
        if *current == linked {
            return Vec::new();
        }
        *current = linked;

        let Some(segment) = base.segment_of(node) else {
            return Vec::new();
        };
        let count = &mut self.unlinked_in_segment[segment.id.0];
        let before = *count == 0;
        if linked {
            *count = count.saturating_sub(1);
        } else {
            *count += 1;
        }
        let after = *count == 0;
        if before == after {
            return Vec::new();
        }
        tracing::trace!(segment = segment.id.0, linked = after, "segment link changed");

        let mut changes = Vec::new();
        for terminal in &segment.rules {
            let Some(path) = self.paths.get_mut(terminal) else {
                continue;
            };
            for (id, bit) in &mut path.segments {
                if *id == segment.id {
                    *bit = after;
                }
            }
            let item = path.all_linked();
            if item != path.agenda_item {
                path.agenda_item = item;
                changes.push(PathChange {
                    terminal: *terminal,
                    rule: Arc::clone(&path.rule),
                    linked: item,
                });
            }
        }
        changes
    }

    /// Returns true if a linked rule path crosses a left-input node.
    #[must_use]
    pub fn is_node_active(&self, base: &RuleBase, node: NodeId) -> bool {
        base.segment_of(node)
            .is_some_and(|s| s.rules.iter().any(|t| self.is_rule_linked(*t)))
    }

    /// Returns true if a node's left memory is being kept.
    #[must_use]
    pub fn is_materialized(&self, node: NodeId) -> bool {
        self.materialized.contains(&node)
    }

    pub(crate) fn set_materialized(&mut self, node: NodeId, materialized: bool) {
        if materialized {
            self.materialized.insert(node);
        } else {
            self.materialized.remove(&node);
        }
    }

    /// Returns true if every node of a segment is linked.
    #[must_use]
    pub fn is_segment_linked(&self, segment: SegmentId) -> bool {
        self.unlinked_in_segment
            .get(segment.0)
            .is_some_and(|count| *count == 0)
    }

    /// Returns true if a rule's path owns an agenda item.
    #[must_use]
    pub fn is_rule_linked(&self, terminal: NodeId) -> bool {
        self.paths.get(&terminal).is_some_and(|p| p.agenda_item)
    }

    /// Path state of a rule.
    #[must_use]
    pub fn path(&self, terminal: NodeId) -> Option<&PathMemory> {
        self.paths.get(&terminal)
    }
}

fn starts_linked(kind: &NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::LeftInputAdapter { .. } | NodeKind::Join(_) | NodeKind::Exists(_)
    )
}
