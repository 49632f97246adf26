//! The compiled match network.
//!
//! A [`RuleBase`] is an immutable arena of nodes plus the lookup tables
//! derived from it: object-type dispatch per entry point and type, alpha
//! hash dispatch, listened field masks, and path segments. It is shared by
//! every session through an `Arc` and never mutated after [`RuleBaseBuilder::build`].

mod builder;
mod node;

pub use builder::RuleBaseBuilder;
pub use node::{AccumulateSpec, BetaNode, Node, NodeId, NodeKind};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use trellis_foundation::{Error, FieldId, Interner, Result, TypeId, Value};

use crate::config::RuleBaseConfig;
use crate::mask::BitMask;
use crate::rule::{Consequence, Salience};
use crate::schema::TypeRegistry;

/// Identifier of a path segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub(crate) usize);

/// A run of left-input nodes with no branching.
///
/// Segments end where a node feeds more than one left sink, so rules sharing
/// a prefix share its segments.
#[derive(Clone, Debug)]
pub struct Segment {
    /// The segment's id.
    pub id: SegmentId,
    /// Nodes in propagation order.
    pub nodes: Vec<NodeId>,
    /// Terminals of the rules whose path crosses the segment.
    pub rules: Vec<NodeId>,
}

/// Hash dispatch over literal-equality alpha children of one node.
#[derive(Clone, Debug)]
pub struct AlphaDispatch {
    /// The tested field.
    pub field: FieldId,
    /// Child to take for each literal.
    pub table: HashMap<Value, NodeId>,
    /// Children reached through the table instead of being tested.
    pub hashed: HashSet<NodeId>,
}

/// A rule after compilation.
#[derive(Clone)]
pub struct CompiledRule {
    /// Rule name.
    pub name: Arc<str>,
    /// Activation priority.
    pub salience: Salience,
    /// Agenda group.
    pub agenda_group: Arc<str>,
    /// Focus the group on activation.
    pub auto_focus: bool,
    /// Suppress matches made by the rule's own consequence.
    pub no_loop: bool,
    /// Action.
    pub consequence: Consequence,
    /// Terminal node.
    pub terminal: NodeId,
    /// Hidden leading positions (the initial-fact anchor).
    pub offset: usize,
    /// Node feeding each match position.
    pub inputs: Vec<NodeId>,
    /// Fields of each position whose modification re-activates the rule.
    pub listened: Vec<BitMask>,
    /// Segments from the root to the terminal.
    pub path: Vec<SegmentId>,
    /// Order the rule was added in.
    pub order: usize,
}

impl CompiledRule {
    /// Number of match positions, hidden ones included.
    #[must_use]
    pub fn positions(&self) -> usize {
        self.inputs.len()
    }
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .field("offset", &self.offset)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Immutable compiled network shared by sessions.
#[derive(Debug)]
pub struct RuleBase {
    pub(crate) config: RuleBaseConfig,
    pub(crate) interner: Interner,
    pub(crate) types: TypeRegistry,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) entry_points: HashMap<Arc<str>, NodeId>,
    pub(crate) dispatch: HashMap<Arc<str>, HashMap<TypeId, Vec<NodeId>>>,
    pub(crate) alpha_dispatch: HashMap<NodeId, Vec<AlphaDispatch>>,
    pub(crate) listened: HashMap<NodeId, BitMask>,
    pub(crate) rules: HashMap<NodeId, CompiledRule>,
    pub(crate) rule_names: HashMap<Arc<str>, NodeId>,
    pub(crate) segments: Vec<Segment>,
    pub(crate) node_segment: HashMap<NodeId, SegmentId>,
}

impl RuleBase {
    /// Build options.
    #[must_use]
    pub fn config(&self) -> &RuleBaseConfig {
        &self.config
    }

    /// Names of types and fields.
    #[must_use]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Declared fact types.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns a network error if the id is not a live node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::network(format!("no node {id:?}")))
    }

    /// Live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Entry point node by name.
    #[must_use]
    pub fn entry_point(&self, name: &str) -> Option<NodeId> {
        self.entry_points.get(name).copied()
    }

    /// Object-type nodes a fact of `fact_type` entering `entry_point` reaches.
    #[must_use]
    pub fn object_type_nodes(&self, entry_point: &str, fact_type: TypeId) -> &[NodeId] {
        self.dispatch
            .get(entry_point)
            .and_then(|types| types.get(&fact_type))
            .map_or(&[], Vec::as_slice)
    }

    /// Hash dispatch tables below a node.
    #[must_use]
    pub fn alpha_dispatch(&self, node: NodeId) -> &[AlphaDispatch] {
        self.alpha_dispatch.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Fields a left-input adapter or beta right input reacts to.
    #[must_use]
    pub fn listened(&self, node: NodeId) -> BitMask {
        self.listened.get(&node).copied().unwrap_or(BitMask::ALL)
    }

    /// Rule owning a terminal node.
    #[must_use]
    pub fn rule(&self, terminal: NodeId) -> Option<&CompiledRule> {
        self.rules.get(&terminal)
    }

    /// Rule by name.
    #[must_use]
    pub fn rule_by_name(&self, name: &str) -> Option<&CompiledRule> {
        self.rule_names.get(name).and_then(|t| self.rules.get(t))
    }

    /// Rules in the order they were added.
    #[must_use]
    pub fn rules(&self) -> Vec<&CompiledRule> {
        let mut rules: Vec<&CompiledRule> = self.rules.values().collect();
        rules.sort_by_key(|r| r.order);
        rules
    }

    /// Path segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment a left-input node belongs to.
    #[must_use]
    pub fn segment_of(&self, node: NodeId) -> Option<&Segment> {
        self.node_segment
            .get(&node)
            .and_then(|id| self.segments.get(id.0))
    }

    /// Looks up a segment.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0)
    }
}
