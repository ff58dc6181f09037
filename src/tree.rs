//! A regression tree over an arena of nodes. The tree owns a permutation
//! of the training indices; every node views a contiguous span of it, and
//! a split stable-partitions its span in place. This keeps the partition
//! invariant cheap to check and makes rejection a span restore.

use std::fmt::Write as _;

use crate::data::{DataSet, VariableType};
use crate::error::BartError;
use crate::node::{LeafScratch, Node, NodeId, NodeKind, Rule, NODE_NONE};

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Permutation of 0..n; leaf spans tile it.
    indices: Vec<u32>,
}

/// Saved state sufficient to undo one structural proposal.
pub struct TreeSnapshot {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    span_start: usize,
    span: Vec<u32>,
}

impl Tree {
    /// A single root leaf holding every observation.
    pub fn new(num_observations: usize, scratch: LeafScratch) -> Self {
        Self {
            nodes: vec![Node::new_leaf(NODE_NONE, 0, num_observations, scratch)],
            free: Vec::new(),
            root: 0,
            indices: (0..num_observations as u32).collect(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    /// The observation indices a node owns.
    pub fn span(&self, id: NodeId) -> &[u32] {
        let node = self.node(id);
        &self.indices[node.start..node.start + node.count]
    }

    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while self.nodes[current as usize].parent != NODE_NONE {
            depth += 1;
            current = self.nodes[current as usize].parent;
        }
        depth
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.free.push(id);
    }

    /// Leaf ids in depth-first order, left before right.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.visit_preorder(self.root, &mut |tree, id| {
            if tree.node(id).is_leaf() {
                result.push(id);
            }
        });
        result
    }

    /// Leaf ids of the subtree under `id`, depth-first.
    pub fn leaves_below(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.visit_preorder(id, &mut |tree, current| {
            if tree.node(current).is_leaf() {
                result.push(current);
            }
        });
        result
    }

    /// Assigns enumeration indices 0..num_leaves in traversal order and
    /// returns the leaves.
    pub fn enumerate_leaves(&mut self) -> Vec<NodeId> {
        let leaves = self.leaves();
        for (position, &id) in leaves.iter().enumerate() {
            if let NodeKind::Leaf {
                enumeration_index, ..
            } = &mut self.nodes[id as usize].kind
            {
                *enumeration_index = position;
            }
        }
        leaves
    }

    /// Internal node ids in depth-first order.
    pub fn branches(&self) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.visit_preorder(self.root, &mut |tree, id| {
            if !tree.node(id).is_leaf() {
                result.push(id);
            }
        });
        result
    }

    fn visit_preorder(&self, start: NodeId, visit: &mut impl FnMut(&Tree, NodeId)) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            visit(self, id);
            if let Some((left, right)) = self.node(id).children() {
                stack.push(right);
                stack.push(left);
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// Branches whose children are both leaves; the death-eligible set.
    pub fn parents_of_two_leaves(&self) -> Vec<NodeId> {
        self.branches()
            .into_iter()
            .filter(|&id| {
                let (left, right) = self.node(id).children().unwrap();
                self.node(left).is_leaf() && self.node(right).is_leaf()
            })
            .collect()
    }

    /// Branches with at least one internal child; the swap-eligible set.
    pub fn branches_with_internal_child(&self) -> Vec<NodeId> {
        self.branches()
            .into_iter()
            .filter(|&id| {
                let (left, right) = self.node(id).children().unwrap();
                !self.node(left).is_leaf() || !self.node(right).is_leaf()
            })
            .collect()
    }

    /// The admissible cut-index range `[low, high)` for an ordinal variable
    /// at a node, given its ancestors' rules.
    pub fn ordinal_cut_range(&self, id: NodeId, variable: usize, data: &DataSet) -> (u32, u32) {
        let mut low = 0u32;
        let mut high = data.cut_points[variable].len() as u32;

        let mut child = id;
        let mut parent = self.node(id).parent;
        while parent != NODE_NONE {
            let parent_node = self.node(parent);
            if let Some(&Rule::Ordinal {
                variable: split_variable,
                cut_index,
            }) = parent_node.rule()
            {
                if split_variable == variable {
                    let (left, _) = parent_node.children().unwrap();
                    if left == child {
                        high = high.min(cut_index);
                    } else {
                        low = low.max(cut_index + 1);
                    }
                }
            }
            child = parent;
            parent = parent_node.parent;
        }
        (low, high.max(low))
    }

    /// Mask of category codes still reaching a node.
    pub fn available_categories(&self, id: NodeId, variable: usize, data: &DataSet) -> u64 {
        let num_categories = data.num_categories[variable];
        let mut available = if num_categories >= 64 {
            u64::MAX
        } else {
            (1u64 << num_categories) - 1
        };

        let mut child = id;
        let mut parent = self.node(id).parent;
        while parent != NODE_NONE {
            let parent_node = self.node(parent);
            if let Some(&Rule::Categorical {
                variable: split_variable,
                category_mask,
            }) = parent_node.rule()
            {
                if split_variable == variable {
                    let (left, _) = parent_node.children().unwrap();
                    if left == child {
                        available &= category_mask;
                    } else {
                        available &= !category_mask;
                    }
                }
            }
            child = parent;
            parent = parent_node.parent;
        }
        available
    }

    /// Whether any split on `variable` remains feasible at the node.
    pub fn variable_is_splittable(&self, id: NodeId, variable: usize, data: &DataSet) -> bool {
        match data.variable_types[variable] {
            VariableType::Ordinal => {
                let (low, high) = self.ordinal_cut_range(id, variable, data);
                high > low
            }
            VariableType::Categorical => {
                self.available_categories(id, variable, data).count_ones() >= 2
            }
        }
    }

    /// Variables with a nonempty feasible-rule set at the node.
    pub fn splittable_variables(&self, id: NodeId, data: &DataSet) -> Vec<usize> {
        (0..data.num_predictors())
            .filter(|&variable| self.variable_is_splittable(id, variable, data))
            .collect()
    }

    /// Stable-partitions a span by the rule; returns the left count.
    fn partition_span(&mut self, start: usize, count: usize, rule: &Rule, data: &DataSet) -> usize {
        let mut left = Vec::with_capacity(count);
        let mut right = Vec::with_capacity(count);
        for &index in &self.indices[start..start + count] {
            if rule.sends_left(data.xt_row(index as usize), data) {
                left.push(index);
            } else {
                right.push(index);
            }
        }
        let num_left = left.len();
        self.indices[start..start + num_left].copy_from_slice(&left);
        self.indices[start + num_left..start + count].copy_from_slice(&right);
        num_left
    }

    /// Turns a leaf into a branch with two fresh leaves. Returns None
    /// without changing topology when either side would be empty.
    pub fn split_leaf(
        &mut self,
        leaf: NodeId,
        rule: Rule,
        data: &DataSet,
        child_scratch: impl Fn() -> LeafScratch,
    ) -> Option<(NodeId, NodeId)> {
        let (start, count) = {
            let node = self.node(leaf);
            (node.start, node.count)
        };
        let num_left = self.partition_span(start, count, &rule, data);
        if num_left == 0 || num_left == count {
            return None;
        }

        let left = self.allocate(Node::new_leaf(leaf, start, num_left, child_scratch()));
        let right = self.allocate(Node::new_leaf(
            leaf,
            start + num_left,
            count - num_left,
            child_scratch(),
        ));
        self.nodes[leaf as usize].kind = NodeKind::Branch { rule, left, right };
        Some((left, right))
    }

    /// Collapses a parent-of-two-leaves back into a leaf. The merged span
    /// is already contiguous, so only the topology changes.
    pub fn collapse_branch(&mut self, branch: NodeId, scratch: LeafScratch) {
        let (left, right) = self
            .node(branch)
            .children()
            .expect("collapse target must be a branch");
        debug_assert!(self.node(left).is_leaf() && self.node(right).is_leaf());
        self.release(left);
        self.release(right);
        self.nodes[branch as usize].kind = NodeKind::Leaf {
            scratch,
            enumeration_index: 0,
        };
    }

    /// Recomputes the observation partition of the subtree under `id` from
    /// its rules. Returns false as soon as some leaf would come up empty;
    /// the caller restores from its snapshot in that case.
    pub fn update_memberships_below(&mut self, id: NodeId, data: &DataSet) -> bool {
        let (start, count) = {
            let node = self.node(id);
            (node.start, node.count)
        };
        let branch = match &self.node(id).kind {
            NodeKind::Leaf { .. } => None,
            NodeKind::Branch { rule, left, right } => Some((*rule, *left, *right)),
        };
        match branch {
            None => count > 0,
            Some((rule, left, right)) => {
                let num_left = self.partition_span(start, count, &rule, data);
                if num_left == 0 || num_left == count {
                    return false;
                }
                {
                    let left_node = self.node_mut(left);
                    left_node.start = start;
                    left_node.count = num_left;
                }
                {
                    let right_node = self.node_mut(right);
                    right_node.start = start + num_left;
                    right_node.count = count - num_left;
                }
                self.update_memberships_below(left, data) && self.update_memberships_below(right, data)
            }
        }
    }

    /// Descends a predictor row to its leaf.
    pub fn leaf_for_row(&self, row: &[f64], data: &DataSet) -> NodeId {
        let mut id = self.root;
        loop {
            match &self.node(id).kind {
                NodeKind::Leaf { .. } => return id,
                NodeKind::Branch { rule, left, right } => {
                    id = if rule.sends_left(row, data) { *left } else { *right };
                }
            }
        }
    }

    /// Adds each branch's split variable into `counts`.
    pub fn count_variable_uses(&self, counts: &mut [u32]) {
        for id in self.branches() {
            if let Some(rule) = self.node(id).rule() {
                counts[rule.variable()] += 1;
            }
        }
    }

    /// Snapshot covering the subtree under `id`: the arena (small) and the
    /// node's span of the index permutation.
    pub fn snapshot(&self, id: NodeId) -> TreeSnapshot {
        let node = self.node(id);
        TreeSnapshot {
            nodes: self.nodes.clone(),
            free: self.free.clone(),
            span_start: node.start,
            span: self.indices[node.start..node.start + node.count].to_vec(),
        }
    }

    pub fn restore(&mut self, snapshot: TreeSnapshot) {
        self.nodes = snapshot.nodes;
        self.free = snapshot.free;
        self.indices[snapshot.span_start..snapshot.span_start + snapshot.span.len()]
            .copy_from_slice(&snapshot.span);
    }

    /// Newline-free preorder encoding of rules and leaf parameters, doubles
    /// written bit-exactly.
    pub fn to_state_string(&self) -> String {
        let mut out = String::new();
        self.write_node_string(self.root, &mut out);
        out
    }

    fn write_node_string(&self, id: NodeId, out: &mut String) {
        if !out.is_empty() {
            out.push(' ');
        }
        match &self.node(id).kind {
            NodeKind::Branch { rule, left, right } => {
                match rule {
                    Rule::Ordinal {
                        variable,
                        cut_index,
                    } => {
                        let _ = write!(out, "o{variable}:{cut_index}");
                    }
                    Rule::Categorical {
                        variable,
                        category_mask,
                    } => {
                        let _ = write!(out, "c{variable}:{category_mask}");
                    }
                }
                let (left, right) = (*left, *right);
                self.write_node_string(left, out);
                self.write_node_string(right, out);
            }
            NodeKind::Leaf { scratch, .. } => match scratch {
                LeafScratch::Mean {
                    mu,
                    num_effective_observations,
                } => {
                    let _ = write!(
                        out,
                        "m{}:{}",
                        mu.to_bits(),
                        num_effective_observations.to_bits()
                    );
                }
                LeafScratch::LinReg { coefficients, .. } => {
                    out.push('r');
                    for (i, beta) in coefficients.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "{}", beta.to_bits());
                    }
                }
            },
        }
    }

    /// Rebuilds a tree from `to_state_string` output; memberships are
    /// recomputed from the data afterwards.
    pub fn from_state_string(
        encoded: &str,
        data: &DataSet,
        num_observations: usize,
    ) -> Result<Self, BartError> {
        let mut tokens = encoded.split_whitespace();
        let mut tree = Self::new(
            num_observations,
            LeafScratch::Mean {
                mu: 0.0,
                num_effective_observations: 0.0,
            },
        );
        tree.nodes.clear();
        let root = read_node_tokens(&mut tree, &mut tokens, NODE_NONE)?;
        tree.root = root;
        if tokens.next().is_some() {
            return Err(BartError::Format("trailing tokens in tree string".into()));
        }

        let root_id = tree.root;
        {
            let root_node = tree.node_mut(root_id);
            root_node.start = 0;
            root_node.count = num_observations;
        }
        if !tree.update_memberships_below(root_id, data) {
            return Err(BartError::Format(
                "stored tree is inconsistent with the data".into(),
            ));
        }
        Ok(tree)
    }
}

fn read_node_tokens<'a>(
    tree: &mut Tree,
    tokens: &mut impl Iterator<Item = &'a str>,
    parent: NodeId,
) -> Result<NodeId, BartError> {
    let token = tokens
        .next()
        .ok_or_else(|| BartError::Format("truncated tree string".into()))?;
    let bad_token = || BartError::Format(format!("unparseable tree token: {token}"));

    let (tag, body) = token.split_at(1);
    match tag {
        "o" | "c" => {
            let (variable, value) = body.split_once(':').ok_or_else(|| bad_token())?;
            let variable: usize = variable.parse().map_err(|_| bad_token())?;
            let rule = if tag == "o" {
                Rule::Ordinal {
                    variable,
                    cut_index: value.parse().map_err(|_| bad_token())?,
                }
            } else {
                Rule::Categorical {
                    variable,
                    category_mask: value.parse().map_err(|_| bad_token())?,
                }
            };
            let id = tree.allocate(Node {
                parent,
                start: 0,
                count: 0,
                kind: NodeKind::Leaf {
                    scratch: LeafScratch::Mean {
                        mu: 0.0,
                        num_effective_observations: 0.0,
                    },
                    enumeration_index: 0,
                },
            });
            let left = read_node_tokens(tree, tokens, id)?;
            let right = read_node_tokens(tree, tokens, id)?;
            tree.nodes[id as usize].kind = NodeKind::Branch { rule, left, right };
            Ok(id)
        }
        "m" => {
            let (mu, count) = body.split_once(':').ok_or_else(|| bad_token())?;
            let mu = f64::from_bits(mu.parse().map_err(|_| bad_token())?);
            let num_effective_observations = f64::from_bits(count.parse().map_err(|_| bad_token())?);
            Ok(tree.allocate(Node::new_leaf(
                parent,
                0,
                0,
                LeafScratch::Mean {
                    mu,
                    num_effective_observations,
                },
            )))
        }
        "r" => {
            let coefficients = body
                .split(',')
                .map(|bits| bits.parse().map(f64::from_bits).map_err(|_| bad_token()))
                .collect::<Result<Vec<f64>, BartError>>()?;
            Ok(tree.allocate(Node::new_leaf(
                parent,
                0,
                0,
                LeafScratch::LinReg {
                    xt: Vec::new(),
                    y: Vec::new(),
                    r_factor: Vec::new(),
                    coefficients,
                },
            )))
        }
        _ => Err(bad_token()),
    }
}
