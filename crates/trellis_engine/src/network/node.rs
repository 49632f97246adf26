//! Node kinds of the match network.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use trellis_foundation::TypeId;

use crate::constraint::{AlphaConstraint, BetaConstraint};
use crate::index::IndexSpec;
use crate::mask::BitMask;
use crate::rule::{AccumulateFunction, ResultFilter};

/// Node identifier. Ids of removed nodes are reused.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared part of every beta node.
#[derive(Clone, Debug)]
pub struct BetaNode {
    /// Left input: an adapter or another beta node.
    pub left: NodeId,
    /// Right input: an object-type or alpha node.
    pub right: NodeId,
    /// Constraints as declared.
    pub constraints: Vec<BetaConstraint>,
    /// Equalities answered by the memory index.
    pub index: IndexSpec,
    /// Constraints evaluated per candidate, cheapest first.
    pub residual: Vec<BetaConstraint>,
    /// Hidden leading positions of matches flowing through the node.
    pub offset: usize,
    /// Position of the node's output in the match.
    pub position: usize,
}

impl BetaNode {
    fn same_shape(&self, other: &Self) -> bool {
        self.left == other.left
            && self.right == other.right
            && self.offset == other.offset
            && self.constraints == other.constraints
    }

    /// Fields of the fact at match `position` read by this node.
    #[must_use]
    pub fn left_mask(&self, position: usize) -> BitMask {
        let Some(condition) = position.checked_sub(self.offset) else {
            return BitMask::EMPTY;
        };
        self.constraints
            .iter()
            .fold(BitMask::EMPTY, |mask, c| {
                mask.union(c.left_mask(condition))
            })
    }
}

/// Aggregate of an accumulate node.
#[derive(Clone, Debug)]
pub struct AccumulateSpec {
    /// The aggregate.
    pub function: AccumulateFunction,
    /// Test on the result.
    pub filter: Option<ResultFilter>,
}

impl AccumulateSpec {
    fn same_shape(&self, other: &Self) -> bool {
        self.function.key() == other.function.key()
            && self.filter.as_ref().map(|f| &f.key) == other.filter.as_ref().map(|f| &f.key)
    }
}

/// What a node does.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Root of a fact partition.
    EntryPoint {
        /// Partition name.
        name: Arc<str>,
    },
    /// Passes facts of one type (or its subtypes).
    ObjectType {
        /// Entry point node feeding it.
        parent: NodeId,
        /// Owning entry point.
        entry_point: Arc<str>,
        /// Accepted type.
        fact_type: TypeId,
    },
    /// Tests one fact.
    Alpha {
        /// The test.
        constraint: AlphaConstraint,
        /// Preceding alpha or object-type node.
        parent: NodeId,
        /// Type of the object-type node heading the chain.
        fact_type: TypeId,
    },
    /// Turns facts into one-position matches.
    LeftInputAdapter {
        /// Alpha or object-type node feeding it.
        parent: NodeId,
    },
    /// Extends a match with each matching fact.
    Join(BetaNode),
    /// Passes a match while no fact matches.
    Not(BetaNode),
    /// Passes a match once while any fact matches.
    Exists(BetaNode),
    /// Passes a match with an aggregate over the matching facts.
    Accumulate(BetaNode, AccumulateSpec),
    /// Turns complete matches into activations.
    Terminal {
        /// Rule name.
        rule: Arc<str>,
        /// Last node of the rule.
        left: NodeId,
    },
}

impl NodeKind {
    /// Beta part, for join, not, exists and accumulate nodes.
    #[must_use]
    pub fn beta(&self) -> Option<&BetaNode> {
        match self {
            Self::Join(b) | Self::Not(b) | Self::Exists(b) | Self::Accumulate(b, _) => Some(b),
            _ => None,
        }
    }

    /// Returns true if another node with this kind can be reused for `other`.
    #[must_use]
    pub fn shares_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::EntryPoint { name: a }, Self::EntryPoint { name: b }) => a == b,
            (
                Self::ObjectType {
                    entry_point: e1,
                    fact_type: t1,
                    ..
                },
                Self::ObjectType {
                    entry_point: e2,
                    fact_type: t2,
                    ..
                },
            ) => e1 == e2 && t1 == t2,
            (
                Self::Alpha {
                    constraint: c1,
                    parent: p1,
                    ..
                },
                Self::Alpha {
                    constraint: c2,
                    parent: p2,
                    ..
                },
            ) => c1 == c2 && p1 == p2,
            (Self::LeftInputAdapter { parent: a }, Self::LeftInputAdapter { parent: b }) => a == b,
            (Self::Join(a), Self::Join(b))
            | (Self::Not(a), Self::Not(b))
            | (Self::Exists(a), Self::Exists(b)) => a.same_shape(b),
            (Self::Accumulate(a, x), Self::Accumulate(b, y)) => a.same_shape(b) && x.same_shape(y),
            _ => false,
        }
    }

    /// Nodes this one receives input from.
    #[must_use]
    pub fn parents(&self) -> Vec<NodeId> {
        match self {
            Self::EntryPoint { .. } => Vec::new(),
            Self::ObjectType { parent, .. }
            | Self::Alpha { parent, .. }
            | Self::LeftInputAdapter { parent } => vec![*parent],
            Self::Join(b) | Self::Not(b) | Self::Exists(b) | Self::Accumulate(b, _) => {
                vec![b.left, b.right]
            }
            Self::Terminal { left, .. } => vec![*left],
        }
    }

    /// Short kind name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntryPoint { .. } => "entry-point",
            Self::ObjectType { .. } => "object-type",
            Self::Alpha { .. } => "alpha",
            Self::LeftInputAdapter { .. } => "left-input-adapter",
            Self::Join(_) => "join",
            Self::Not(_) => "not",
            Self::Exists(_) => "exists",
            Self::Accumulate(..) => "accumulate",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// A network node.
#[derive(Clone, Debug)]
pub struct Node {
    /// The node's id.
    pub id: NodeId,
    /// What it does.
    pub kind: NodeKind,
    /// Nodes it feeds.
    pub sinks: Vec<NodeId>,
    /// Rules using the node, with use counts.
    pub associations: BTreeMap<Arc<str>, usize>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            sinks: Vec::new(),
            associations: BTreeMap::new(),
        }
    }

    /// Returns true if no rule uses the node.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.associations.is_empty() && self.sinks.is_empty()
    }
}
