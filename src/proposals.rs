//! Structural Metropolis-Hastings moves on a single tree: BIRTH, DEATH,
//! SWAP, and CHANGE. Each move snapshots the affected subtree, mutates in
//! place, and either keeps the result or restores the snapshot. A proposal
//! that would leave a leaf empty is rejected outright.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPool;

use crate::data::DataSet;
use crate::node::{NodeId, NodeKind, Rule};
use crate::priors::{EndNodePrior, LeafContext, TreePrior};
use crate::tree::Tree;

/// Borrowed view of the fit state one tree update needs.
pub struct ProposalContext<'a> {
    pub data: &'a DataSet,
    pub pool: Option<&'a ThreadPool>,
    pub tree_prior: &'a dyn TreePrior,
    pub end_node_prior: &'a dyn EndNodePrior,
    /// Partial residuals this tree is fit against.
    pub residuals: &'a [f64],
    pub sigma_sq: f64,
    pub birth_or_death_probability: f64,
    pub swap_probability: f64,
    pub birth_probability: f64,
}

impl ProposalContext<'_> {
    fn num_observations(&self) -> usize {
        self.residuals.len()
    }
}

/// Recomputes one leaf's scratch from its current memberships and the
/// tree's residuals.
pub fn prepare_leaf(tree: &mut Tree, id: NodeId, ctx: &ProposalContext<'_>) {
    let indices: Vec<u32> = tree.span(id).to_vec();
    let leaf_ctx = LeafContext {
        data: ctx.data,
        pool: ctx.pool,
        residuals: ctx.residuals,
        indices: &indices,
        is_top: indices.len() == ctx.num_observations(),
    };
    ctx.end_node_prior.prepare_scratch(
        &leaf_ctx,
        tree.node_mut(id).scratch_mut(),
        ctx.sigma_sq,
    );
}

/// Prepares every leaf of the tree; establishes the READY-state invariant
/// before a structural step.
pub fn prepare_all_leaves(tree: &mut Tree, ctx: &ProposalContext<'_>) {
    for id in tree.leaves() {
        prepare_leaf(tree, id, ctx);
    }
}

/// Integrated log-likelihood of one leaf from its prepared scratch.
pub fn leaf_log_likelihood(tree: &Tree, id: NodeId, ctx: &ProposalContext<'_>) -> f64 {
    let indices = tree.span(id);
    let leaf_ctx = LeafContext {
        data: ctx.data,
        pool: ctx.pool,
        residuals: ctx.residuals,
        indices,
        is_top: indices.len() == ctx.num_observations(),
    };
    ctx.end_node_prior
        .log_integrated_likelihood(&leaf_ctx, tree.node(id).scratch(), ctx.sigma_sq)
}

fn log_likelihood_below(tree: &Tree, id: NodeId, ctx: &ProposalContext<'_>) -> f64 {
    tree.leaves_below(id)
        .into_iter()
        .map(|leaf| leaf_log_likelihood(tree, leaf, ctx))
        .sum()
}

fn prepare_leaves_below(tree: &mut Tree, id: NodeId, ctx: &ProposalContext<'_>) {
    for leaf in tree.leaves_below(id) {
        prepare_leaf(tree, leaf, ctx);
    }
}

fn birth_eligible_leaves(tree: &Tree, data: &DataSet) -> Vec<NodeId> {
    tree.leaves()
        .into_iter()
        .filter(|&id| !tree.splittable_variables(id, data).is_empty())
        .collect()
}

/// One structural step: selects a move family by the configured
/// probabilities and runs its accept/reject.
pub fn draw_from_tree_structure_posterior(
    rng: &mut ChaCha8Rng,
    tree: &mut Tree,
    ctx: &ProposalContext<'_>,
) {
    let u: f64 = rng.gen();
    if u < ctx.birth_or_death_probability {
        birth_or_death(rng, tree, ctx);
    } else if u < ctx.birth_or_death_probability + ctx.swap_probability {
        swap(rng, tree, ctx);
    } else {
        change(rng, tree, ctx);
    }
}

fn birth_or_death(rng: &mut ChaCha8Rng, tree: &mut Tree, ctx: &ProposalContext<'_>) {
    let birth_eligible = birth_eligible_leaves(tree, ctx.data);
    let death_eligible = tree.parents_of_two_leaves();

    let birth_possible = !birth_eligible.is_empty();
    let death_possible = !death_eligible.is_empty();

    if !birth_possible && !death_possible {
        return;
    }

    let take_birth = if birth_possible && death_possible {
        rng.gen::<f64>() < ctx.birth_probability
    } else {
        birth_possible
    };

    if take_birth {
        let step_probability = if death_possible {
            ctx.birth_probability
        } else {
            1.0
        };
        birth(rng, tree, ctx, &birth_eligible, step_probability);
    } else {
        let step_probability = if birth_possible {
            1.0 - ctx.birth_probability
        } else {
            1.0
        };
        death(rng, tree, ctx, &death_eligible, step_probability);
    }
}

fn birth(
    rng: &mut ChaCha8Rng,
    tree: &mut Tree,
    ctx: &ProposalContext<'_>,
    eligible: &[NodeId],
    forward_step_probability: f64,
) {
    let leaf = eligible[rng.gen_range(0..eligible.len())];
    let depth = tree.depth(leaf);

    let old_log_likelihood = leaf_log_likelihood(tree, leaf, ctx);

    let drawn = match ctx.tree_prior.draw_rule(rng, tree, leaf, ctx.data) {
        Some(drawn) => drawn,
        None => return,
    };
    let log_rule_probability =
        ctx.tree_prior
            .log_rule_probability(tree, leaf, &drawn.rule, ctx.data);

    let grow_leaf = ctx.tree_prior.growth_probability_at_depth(depth, true);
    let grow_left = ctx
        .tree_prior
        .growth_probability_at_depth(depth + 1, !drawn.exhausted_left_splits);
    let grow_right = ctx
        .tree_prior
        .growth_probability_at_depth(depth + 1, !drawn.exhausted_right_splits);

    let snapshot = tree.snapshot(leaf);
    let end_node_prior = ctx.end_node_prior;
    let (left, right) = match tree.split_leaf(leaf, drawn.rule, ctx.data, || {
        end_node_prior.initial_scratch()
    }) {
        Some(children) => children,
        // an empty child is rejected by construction
        None => return,
    };

    prepare_leaf(tree, left, ctx);
    prepare_leaf(tree, right, ctx);
    let new_log_likelihood =
        leaf_log_likelihood(tree, left, ctx) + leaf_log_likelihood(tree, right, ctx);

    // the reverse move must choose death and then this parent
    let num_death_eligible_after = tree.parents_of_two_leaves().len();
    let birth_possible_after = !birth_eligible_leaves(tree, ctx.data).is_empty();
    let reverse_step_probability = if birth_possible_after {
        1.0 - ctx.birth_probability
    } else {
        1.0
    };

    let log_prior_ratio = grow_leaf.ln() - (1.0 - grow_leaf).ln()
        + (1.0 - grow_left).ln()
        + (1.0 - grow_right).ln()
        + log_rule_probability;
    let log_transition_ratio = (reverse_step_probability / num_death_eligible_after as f64).ln()
        - (forward_step_probability / eligible.len() as f64).ln()
        - log_rule_probability;

    let log_ratio =
        log_prior_ratio + log_transition_ratio + new_log_likelihood - old_log_likelihood;

    if rng.gen::<f64>().ln() >= log_ratio {
        tree.restore(snapshot);
    }
}

fn death(
    rng: &mut ChaCha8Rng,
    tree: &mut Tree,
    ctx: &ProposalContext<'_>,
    eligible: &[NodeId],
    forward_step_probability: f64,
) {
    let branch = eligible[rng.gen_range(0..eligible.len())];
    let (left, right) = tree.node(branch).children().unwrap();
    let depth = tree.depth(branch);

    let old_log_likelihood =
        leaf_log_likelihood(tree, left, ctx) + leaf_log_likelihood(tree, right, ctx);

    let rule = *tree.node(branch).rule().unwrap();
    let log_rule_probability = ctx
        .tree_prior
        .log_rule_probability(tree, branch, &rule, ctx.data);

    let grow_branch = ctx.tree_prior.growth_probability_at_depth(depth, true);
    let grow_left = ctx.tree_prior.growth_probability(tree, left, ctx.data);
    let grow_right = ctx.tree_prior.growth_probability(tree, right, ctx.data);

    let snapshot = tree.snapshot(branch);
    tree.collapse_branch(branch, ctx.end_node_prior.initial_scratch());
    prepare_leaf(tree, branch, ctx);
    let new_log_likelihood = leaf_log_likelihood(tree, branch, ctx);

    // the reverse move must choose birth, this leaf, and this rule
    let num_birth_eligible_after = birth_eligible_leaves(tree, ctx.data).len();
    let death_possible_after = !tree.parents_of_two_leaves().is_empty();
    let reverse_step_probability = if death_possible_after {
        ctx.birth_probability
    } else {
        1.0
    };

    let log_prior_ratio = -(grow_branch.ln() - (1.0 - grow_branch).ln()
        + (1.0 - grow_left).ln()
        + (1.0 - grow_right).ln()
        + log_rule_probability);
    let log_transition_ratio = (reverse_step_probability / num_birth_eligible_after as f64).ln()
        + log_rule_probability
        - (forward_step_probability / eligible.len() as f64).ln();

    let log_ratio =
        log_prior_ratio + log_transition_ratio + new_log_likelihood - old_log_likelihood;

    if rng.gen::<f64>().ln() >= log_ratio {
        tree.restore(snapshot);
    }
}

fn swap(rng: &mut ChaCha8Rng, tree: &mut Tree, ctx: &ProposalContext<'_>) {
    let eligible = tree.branches_with_internal_child();
    if eligible.is_empty() {
        return;
    }
    let node = eligible[rng.gen_range(0..eligible.len())];
    let (left, right) = tree.node(node).children().unwrap();
    let left_internal = !tree.node(left).is_leaf();
    let right_internal = !tree.node(right).is_leaf();

    let old_log_likelihood = log_likelihood_below(tree, node, ctx);
    let old_log_prior = ctx.tree_prior.log_subtree_probability(tree, node, ctx.data);

    let snapshot = tree.snapshot(node);

    let parent_rule = *tree.node(node).rule().unwrap();
    if left_internal
        && right_internal
        && tree.node(left).rule() == tree.node(right).rule()
    {
        // double swap: both children share a rule, so the parent exchanges
        // with both at once, left child first
        let shared_rule = *tree.node(left).rule().unwrap();
        set_rule(tree, node, shared_rule);
        set_rule(tree, left, parent_rule);
        set_rule(tree, right, parent_rule);
    } else {
        let child = if left_internal && right_internal {
            if rng.gen::<f64>() < 0.5 {
                left
            } else {
                right
            }
        } else if left_internal {
            left
        } else {
            right
        };
        let child_rule = *tree.node(child).rule().unwrap();
        set_rule(tree, node, child_rule);
        set_rule(tree, child, parent_rule);
    }

    if !tree.update_memberships_below(node, ctx.data) {
        tree.restore(snapshot);
        return;
    }
    let new_log_prior = ctx.tree_prior.log_subtree_probability(tree, node, ctx.data);
    if new_log_prior == f64::NEG_INFINITY {
        tree.restore(snapshot);
        return;
    }

    prepare_leaves_below(tree, node, ctx);
    let new_log_likelihood = log_likelihood_below(tree, node, ctx);

    let log_ratio =
        new_log_prior - old_log_prior + new_log_likelihood - old_log_likelihood;

    if rng.gen::<f64>().ln() >= log_ratio {
        tree.restore(snapshot);
    }
}

fn change(rng: &mut ChaCha8Rng, tree: &mut Tree, ctx: &ProposalContext<'_>) {
    let branches = tree.branches();
    if branches.is_empty() {
        return;
    }
    let node = branches[rng.gen_range(0..branches.len())];

    let old_log_likelihood = log_likelihood_below(tree, node, ctx);
    let old_log_prior = ctx.tree_prior.log_subtree_probability(tree, node, ctx.data);
    let old_rule = *tree.node(node).rule().unwrap();
    let old_rule_log_probability = ctx
        .tree_prior
        .log_rule_probability(tree, node, &old_rule, ctx.data);

    let drawn = match ctx.tree_prior.draw_rule(rng, tree, node, ctx.data) {
        Some(drawn) => drawn,
        None => return,
    };
    let new_rule_log_probability =
        ctx.tree_prior
            .log_rule_probability(tree, node, &drawn.rule, ctx.data);

    let snapshot = tree.snapshot(node);
    set_rule(tree, node, drawn.rule);

    if !tree.update_memberships_below(node, ctx.data) {
        tree.restore(snapshot);
        return;
    }

    let new_log_prior = ctx.tree_prior.log_subtree_probability(tree, node, ctx.data);
    prepare_leaves_below(tree, node, ctx);
    let new_log_likelihood = log_likelihood_below(tree, node, ctx);

    // the changed node's own prior term cancels against the proposal
    // density, leaving the descendants' rule and growth terms
    let log_ratio = new_log_likelihood - old_log_likelihood + new_log_prior - old_log_prior
        - (new_rule_log_probability - old_rule_log_probability);

    if rng.gen::<f64>().ln() >= log_ratio {
        tree.restore(snapshot);
    }
}

fn set_rule(tree: &mut Tree, id: NodeId, rule: Rule) {
    match &mut tree.node_mut(id).kind {
        NodeKind::Branch { rule: slot, .. } => *slot = rule,
        NodeKind::Leaf { .. } => unreachable!("rule assignment targets a branch"),
    }
}
