//! Incremental construction of the node network.
//!
//! Rules are compiled into the node arena one at a time. Each node is shared
//! with any existing node of the same shape under the same parent, and keeps
//! a bag of the rules using it. Removing a rule decrements the bag; nodes left
//! with no rules and no sinks are unlinked and their ids reused.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use trellis_foundation::{Error, FieldId, Interner, Result, TypeId, Value};

use super::node::{AccumulateSpec, BetaNode, Node, NodeId, NodeKind};
use super::{AlphaDispatch, CompiledRule, RuleBase, Segment, SegmentId};
use crate::config::RuleBaseConfig;
use crate::index::IndexSpec;
use crate::mask::BitMask;
use crate::rule::{Condition, DEFAULT_ENTRY_POINT, Pattern, Rule};
use crate::schema::{FactSchema, TypeDef, TypeRegistry};

struct RuleEntry {
    compiled: CompiledRule,
    nodes: Vec<NodeId>,
}

/// Builds a [`RuleBase`].
///
/// The builder can keep changing after `build`; every build snapshots the
/// current network into a new immutable rule base.
pub struct RuleBaseBuilder {
    config: RuleBaseConfig,
    interner: Interner,
    types: TypeRegistry,
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    entry_points: HashMap<Arc<str>, NodeId>,
    rules: HashMap<Arc<str>, RuleEntry>,
    next_order: usize,
}

impl Default for RuleBaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBaseBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuleBaseConfig::default())
    }

    /// Creates a builder with the given configuration.
    #[must_use]
    pub fn with_config(config: RuleBaseConfig) -> Self {
        Self {
            config,
            interner: Interner::new(),
            types: TypeRegistry::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            entry_points: HashMap::new(),
            rules: HashMap::new(),
            next_order: 0,
        }
    }

    // --- Types ---

    /// Declares a fact type.
    ///
    /// # Errors
    ///
    /// Propagates declaration errors from the type registry.
    pub fn declare(&mut self, schema: &FactSchema) -> Result<TypeId> {
        self.types.declare(&mut self.interner, schema)
    }

    /// Resolves a declared type by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if no such type was declared.
    pub fn type_id(&self, name: &str) -> Result<TypeId> {
        self.interner
            .lookup_type(name)
            .filter(|id| self.types.get(*id).is_some())
            .ok_or_else(|| Error::unknown_type(name))
    }

    /// Resolves a field declared on a type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` or `UnknownField`.
    pub fn field(&self, type_name: &str, field: &str) -> Result<FieldId> {
        let def = self.types.require(self.type_id(type_name)?)?;
        self.interner
            .lookup_field(field)
            .filter(|f| def.field_type(*f).is_some())
            .ok_or_else(|| Error::unknown_field(type_name, field))
    }

    /// Names of types and fields.
    #[must_use]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Declared types.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Build options.
    #[must_use]
    pub fn config(&self) -> &RuleBaseConfig {
        &self.config
    }

    // --- Inspection ---

    /// Number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if a rule with this name exists.
    #[must_use]
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Looks up a live node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Terminal node of a rule.
    #[must_use]
    pub fn terminal_of(&self, rule: &str) -> Option<NodeId> {
        self.rules.get(rule).map(|e| e.compiled.terminal)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    // --- Rule Addition ---

    /// Compiles a rule into the network.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRule` for duplicate names, empty rules, missing
    /// consequences and references to later or fact-less conditions;
    /// `UnknownType`/`UnknownField` for undeclared names.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        self.validate(&rule)?;
        let name = Arc::clone(&rule.name);
        let consequence = rule
            .consequence
            .clone()
            .ok_or_else(|| Error::invalid_rule(name.as_ref(), "rule has no consequence"))?;
        let offset = usize::from(!rule.conditions.first().is_some_and(Condition::binds_fact));

        let mut used = Vec::new();
        let mut inputs = Vec::new();
        let mut left = None;

        if offset == 1 {
            let otn = self.object_type(DEFAULT_ENTRY_POINT, TypeId::INITIAL_FACT, &name, &mut used)?;
            let lia = self.attach(NodeKind::LeftInputAdapter { parent: otn }, &name, &mut used)?;
            inputs.push(lia);
            left = Some(lia);
        }

        for (index, condition) in rule.conditions.iter().enumerate() {
            let alpha = self.alpha_chain(condition.pattern(), &name, &mut used)?;
            let node = match left {
                None => {
                    self.attach(NodeKind::LeftInputAdapter { parent: alpha }, &name, &mut used)?
                }
                Some(left) => {
                    let beta = self.beta_node(&rule, left, alpha, offset, index);
                    let kind = match condition {
                        Condition::Pattern(_) => NodeKind::Join(beta),
                        Condition::Not(_) => NodeKind::Not(beta),
                        Condition::Exists(_) => NodeKind::Exists(beta),
                        Condition::Accumulate(acc) => NodeKind::Accumulate(
                            beta,
                            AccumulateSpec {
                                function: acc.function.clone(),
                                filter: acc.filter.clone(),
                            },
                        ),
                    };
                    self.attach(kind, &name, &mut used)?
                }
            };
            inputs.push(node);
            left = Some(node);
        }

        let left = left.ok_or_else(|| Error::internal("rule compiled to no nodes"))?;
        let terminal = self.attach(
            NodeKind::Terminal {
                rule: Arc::clone(&name),
                left,
            },
            &name,
            &mut used,
        )?;

        let compiled = CompiledRule {
            name: Arc::clone(&name),
            salience: rule.salience.clone(),
            agenda_group: Arc::clone(&rule.agenda_group),
            auto_focus: rule.auto_focus,
            no_loop: rule.no_loop,
            consequence,
            terminal,
            offset,
            inputs,
            listened: self.listened_masks(&rule, offset),
            path: Vec::new(),
            order: self.next_order,
        };
        self.next_order += 1;
        tracing::debug!(rule = %name, ?terminal, nodes = used.len(), "rule added");
        self.rules.insert(
            name,
            RuleEntry {
                compiled,
                nodes: used,
            },
        );
        Ok(())
    }

    fn validate(&self, rule: &Rule) -> Result<()> {
        let invalid = |message: String| Error::invalid_rule(rule.name.as_ref(), message);
        if self.rules.contains_key(&rule.name) {
            return Err(invalid("a rule with this name already exists".into()));
        }
        if rule.conditions.is_empty() {
            return Err(invalid("rule has no conditions".into()));
        }
        if rule.consequence.is_none() {
            return Err(invalid("rule has no consequence".into()));
        }

        for (index, condition) in rule.conditions.iter().enumerate() {
            let pattern = condition.pattern();
            if pattern.fact_type == TypeId::INITIAL_FACT {
                return Err(invalid(format!("condition {index} matches the initial fact")));
            }
            let def = self.types.require(pattern.fact_type)?;
            for constraint in &pattern.alpha {
                self.check_fields(def, constraint.fields())?;
            }
            self.check_fields(def, pattern.watch.iter().copied())?;
            if let Condition::Accumulate(acc) = condition {
                self.check_fields(def, acc.function.reads())?;
            }
            for constraint in &pattern.beta {
                self.check_fields(def, constraint.right_fields())?;
                for (earlier, field) in constraint.left_fields() {
                    if earlier >= index {
                        return Err(invalid(format!(
                            "condition {index} refers to condition {earlier}, which does not precede it"
                        )));
                    }
                    let target = &rule.conditions[earlier];
                    if !target.binds_fact() {
                        return Err(invalid(format!(
                            "condition {index} refers to condition {earlier}, which binds no fact"
                        )));
                    }
                    let target_def = self.types.require(target.pattern().fact_type)?;
                    self.check_fields(target_def, [field])?;
                }
            }
        }
        Ok(())
    }

    fn check_fields(&self, def: &TypeDef, fields: impl IntoIterator<Item = FieldId>) -> Result<()> {
        for field in fields {
            if def.field_type(field).is_none() {
                let name = self.interner.field_name(field).unwrap_or("?");
                return Err(Error::unknown_field(def.name.as_ref(), name));
            }
        }
        Ok(())
    }

    fn listened_masks(&self, rule: &Rule, offset: usize) -> Vec<BitMask> {
        let mut masks = vec![BitMask::EMPTY; offset];
        for (index, condition) in rule.conditions.iter().enumerate() {
            if !self.config.property_reactive {
                masks.push(BitMask::ALL);
                continue;
            }
            let pattern = condition.pattern();
            let mut mask = pattern
                .alpha
                .iter()
                .fold(BitMask::EMPTY, |m, c| m.union(c.mask()));
            mask = pattern.beta.iter().fold(mask, |m, c| m.union(c.right_mask()));
            mask = mask.union(BitMask::of_fields(pattern.watch.iter().copied()));
            if let Condition::Accumulate(acc) = condition {
                mask = mask.union(acc.function.mask());
            }
            for later in &rule.conditions[index + 1..] {
                mask = later
                    .pattern()
                    .beta
                    .iter()
                    .fold(mask, |m, c| m.union(c.left_mask(index)));
            }
            masks.push(mask);
        }
        masks
    }

    fn beta_node(
        &self,
        rule: &Rule,
        left: NodeId,
        right: NodeId,
        offset: usize,
        index: usize,
    ) -> BetaNode {
        let pattern = rule.conditions[index].pattern();
        let stable = |earlier: usize, left_field: FieldId, right_field: FieldId| {
            let hashes = |ty: TypeId, field: FieldId| {
                self.types
                    .get(ty)
                    .and_then(|d| d.field_type(field))
                    .is_some_and(trellis_foundation::Type::has_stable_hash)
            };
            rule.conditions
                .get(earlier)
                .is_some_and(|c| hashes(c.pattern().fact_type, left_field))
                && hashes(pattern.fact_type, right_field)
        };
        let (index_spec, residual) =
            IndexSpec::select(&pattern.beta, self.config.indexing_enabled, stable);
        BetaNode {
            left,
            right,
            constraints: pattern.beta.clone(),
            index: index_spec,
            residual,
            offset,
            position: index + offset,
        }
    }

    fn entry_point(
        &mut self,
        name: &str,
        rule: &Arc<str>,
        used: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let id = self.attach(NodeKind::EntryPoint { name: name.into() }, rule, used)?;
        self.entry_points.insert(name.into(), id);
        Ok(id)
    }

    fn object_type(
        &mut self,
        entry_point: &str,
        fact_type: TypeId,
        rule: &Arc<str>,
        used: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let parent = self.entry_point(entry_point, rule, used)?;
        self.attach(
            NodeKind::ObjectType {
                parent,
                entry_point: entry_point.into(),
                fact_type,
            },
            rule,
            used,
        )
    }

    fn alpha_chain(
        &mut self,
        pattern: &Pattern,
        rule: &Arc<str>,
        used: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let mut parent = self.object_type(&pattern.entry_point, pattern.fact_type, rule, used)?;
        let mut constraints: Vec<_> = pattern.alpha.iter().collect();
        constraints.sort_by_key(|c| c.cost());
        for constraint in constraints {
            parent = self.attach(
                NodeKind::Alpha {
                    constraint: constraint.clone(),
                    parent,
                    fact_type: pattern.fact_type,
                },
                rule,
                used,
            )?;
        }
        Ok(parent)
    }

    /// Finds or creates a node and records the rule's use of it.
    fn attach(&mut self, kind: NodeKind, rule: &Arc<str>, used: &mut Vec<NodeId>) -> Result<NodeId> {
        let parents = kind.parents();
        let existing = match parents.first() {
            Some(parent) => self.node(*parent).and_then(|p| {
                p.sinks
                    .iter()
                    .copied()
                    .find(|s| self.node(*s).is_some_and(|n| n.kind.shares_with(&kind)))
            }),
            None => self
                .nodes
                .iter()
                .flatten()
                .find(|n| n.kind.shares_with(&kind))
                .map(|n| n.id),
        };

        let id = match existing {
            Some(id) => id,
            None => {
                let id = match self.free.pop() {
                    Some(id) => id,
                    None => NodeId::from_raw(
                        u32::try_from(self.nodes.len())
                            .map_err(|_| Error::network("node id space exhausted"))?,
                    ),
                };
                tracing::trace!(?id, kind = kind.name(), "node created");
                let node = Node::new(id, kind);
                if id.index() < self.nodes.len() {
                    self.nodes[id.index()] = Some(node);
                } else {
                    self.nodes.push(Some(node));
                }
                for parent in parents {
                    if let Some(p) = self.node_mut(parent) {
                        p.sinks.push(id);
                    }
                }
                id
            }
        };

        if let Some(node) = self.node_mut(id) {
            *node.associations.entry(Arc::clone(rule)).or_insert(0) += 1;
        }
        used.push(id);
        Ok(id)
    }

    // --- Rule Removal ---

    /// Removes a rule, deleting nodes no other rule uses.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRule` if no rule has this name.
    pub fn remove_rule(&mut self, name: &str) -> Result<()> {
        let entry = self
            .rules
            .remove(name)
            .ok_or_else(|| Error::invalid_rule(name, "no such rule"))?;

        for id in &entry.nodes {
            if let Some(node) = self.node_mut(*id) {
                if let Some(count) = node.associations.get_mut(name) {
                    *count -= 1;
                    if *count == 0 {
                        node.associations.remove(name);
                    }
                }
            }
        }

        let mut removed = 0;
        for id in entry.nodes.iter().rev() {
            if !self.node(*id).is_some_and(Node::is_orphan) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
                continue;
            };
            for parent in node.kind.parents() {
                if let Some(p) = self.node_mut(parent) {
                    p.sinks.retain(|s| s != id);
                }
            }
            if let NodeKind::EntryPoint { name } = &node.kind {
                self.entry_points.remove(name);
            }
            self.free.push(*id);
            removed += 1;
        }
        tracing::debug!(rule = name, removed, "rule removed");
        Ok(())
    }

    // --- Build ---

    /// Snapshots the network into an immutable rule base.
    ///
    /// # Errors
    ///
    /// Returns a network error if a rule's nodes are inconsistent.
    pub fn build(&self) -> Result<Arc<RuleBase>> {
        let (mut segments, node_segment) = self.segments();
        let mut rules = HashMap::new();
        let mut rule_names = HashMap::new();
        let mut listened: HashMap<NodeId, BitMask> = HashMap::new();

        let mut entries: Vec<&RuleEntry> = self.rules.values().collect();
        entries.sort_by_key(|e| e.compiled.order);
        for entry in entries {
            let mut compiled = entry.compiled.clone();
            let mut path: Vec<SegmentId> = Vec::new();
            for node in compiled.inputs.iter().chain([&compiled.terminal]) {
                let segment = node_segment.get(node).copied().ok_or_else(|| {
                    Error::network(format!("node {node:?} of {} has no segment", compiled.name))
                })?;
                if !path.contains(&segment) {
                    path.push(segment);
                }
            }
            for segment in &path {
                segments[segment.0].rules.push(compiled.terminal);
            }
            compiled.path = path;

            for (position, input) in compiled.inputs.iter().enumerate() {
                let mask = listened.entry(*input).or_insert(BitMask::EMPTY);
                *mask = mask.union(compiled.listened[position]);
            }
            rule_names.insert(Arc::clone(&compiled.name), compiled.terminal);
            rules.insert(compiled.terminal, compiled);
        }

        let base = RuleBase {
            config: self.config.clone(),
            interner: self.interner.clone(),
            types: self.types.clone(),
            nodes: self.nodes.clone(),
            entry_points: self.entry_points.clone(),
            dispatch: self.object_type_dispatch(),
            alpha_dispatch: self.alpha_dispatch_tables(),
            listened,
            rules,
            rule_names,
            segments,
            node_segment,
        };
        tracing::debug!(
            rules = base.rules.len(),
            nodes = base.node_count(),
            segments = base.segments.len(),
            "rule base built"
        );
        Ok(Arc::new(base))
    }

    fn object_type_dispatch(&self) -> HashMap<Arc<str>, HashMap<TypeId, Vec<NodeId>>> {
        let mut dispatch: HashMap<Arc<str>, HashMap<TypeId, Vec<NodeId>>> = HashMap::new();
        for node in self.nodes.iter().flatten() {
            let NodeKind::ObjectType {
                entry_point,
                fact_type,
                ..
            } = &node.kind
            else {
                continue;
            };
            for def in self.types.iter() {
                if def.ancestors.contains(fact_type) {
                    dispatch
                        .entry(Arc::clone(entry_point))
                        .or_default()
                        .entry(def.id)
                        .or_default()
                        .push(node.id);
                }
            }
        }
        for types in dispatch.values_mut() {
            for nodes in types.values_mut() {
                nodes.sort();
            }
        }
        dispatch
    }

    fn alpha_dispatch_tables(&self) -> HashMap<NodeId, Vec<AlphaDispatch>> {
        let mut tables = HashMap::new();
        for node in self.nodes.iter().flatten() {
            let fact_type = match &node.kind {
                NodeKind::ObjectType { fact_type, .. } | NodeKind::Alpha { fact_type, .. } => {
                    *fact_type
                }
                _ => continue,
            };
            let Some(def) = self.types.get(fact_type) else {
                continue;
            };

            let mut groups: BTreeMap<FieldId, Vec<(Value, NodeId)>> = BTreeMap::new();
            for sink in &node.sinks {
                let Some(NodeKind::Alpha { constraint, .. }) = self.node(*sink).map(|n| &n.kind)
                else {
                    continue;
                };
                if let Some((field, value)) = constraint.hash_key() {
                    if hashable(def, field, value) {
                        groups.entry(field).or_default().push((value.clone(), *sink));
                    }
                }
            }

            let dispatch: Vec<AlphaDispatch> = groups
                .into_iter()
                .filter(|(_, members)| members.len() >= self.config.alpha_hash_threshold)
                .map(|(field, members)| AlphaDispatch {
                    field,
                    hashed: members.iter().map(|(_, id)| *id).collect::<HashSet<_>>(),
                    table: members.into_iter().collect(),
                })
                .collect();
            if !dispatch.is_empty() {
                tables.insert(node.id, dispatch);
            }
        }
        tables
    }

    /// Splits left-input chains into segments at every branching node.
    fn segments(&self) -> (Vec<Segment>, HashMap<NodeId, SegmentId>) {
        let mut segments = Vec::new();
        let mut node_segment = HashMap::new();
        let mut roots: Vec<NodeId> = self
            .nodes
            .iter()
            .flatten()
            .filter(|n| matches!(n.kind, NodeKind::LeftInputAdapter { .. }))
            .map(|n| n.id)
            .collect();
        roots.sort_by(|a, b| b.cmp(a));
        let mut stack = roots;

        while let Some(start) = stack.pop() {
            let id = SegmentId(segments.len());
            let mut nodes = Vec::new();
            let mut cursor = start;
            loop {
                nodes.push(cursor);
                node_segment.insert(cursor, id);
                let sinks = self.node(cursor).map(|n| n.sinks.as_slice()).unwrap_or(&[]);
                match sinks {
                    [only] => cursor = *only,
                    many => {
                        stack.extend(many.iter().rev());
                        break;
                    }
                }
            }
            segments.push(Segment {
                id,
                nodes,
                rules: Vec::new(),
            });
        }
        (segments, node_segment)
    }
}

fn hashable(def: &TypeDef, field: FieldId, value: &Value) -> bool {
    let value_type = value.value_type();
    !value.is_nil()
        && value_type.has_stable_hash()
        && def
            .field_type(field)
            .is_some_and(|ty| ty.has_stable_hash() && ty.accepts(&value_type))
}
