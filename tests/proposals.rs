use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use mh_bart::config::Data;
use mh_bart::data::DataSet;
use mh_bart::node::LeafScratch;
use mh_bart::priors::{CgmTreePrior, EndNodePrior, MeanNormalPrior};
use mh_bart::proposals::{self, ProposalContext};
use mh_bart::tree::Tree;

/// A sharp step in the response at x = 9.5, scaled to [-0.5, 0.5].
fn step_data(n: usize) -> DataSet {
    let x = Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect()).unwrap();
    let y = Array1::from(
        (0..n)
            .map(|i| if i < n / 2 { 0.0 } else { 1.0 })
            .collect::<Vec<_>>(),
    );
    DataSet::prepare(Data::new(y, x), false, true, false).unwrap()
}

fn context<'a>(
    data: &'a DataSet,
    tree_prior: &'a CgmTreePrior,
    end_node_prior: &'a MeanNormalPrior,
    residuals: &'a [f64],
) -> ProposalContext<'a> {
    ProposalContext {
        data,
        pool: None,
        tree_prior,
        end_node_prior,
        residuals,
        sigma_sq: 0.01,
        birth_or_death_probability: 0.5,
        swap_probability: 0.1,
        birth_probability: 0.5,
    }
}

fn assert_partition_invariant(tree: &Tree, n: usize) {
    let mut seen = vec![false; n];
    for leaf in tree.leaves() {
        assert!(!tree.span(leaf).is_empty(), "empty leaf after a move");
        for &i in tree.span(leaf) {
            assert!(!seen[i as usize], "index {i} in two leaves");
            seen[i as usize] = true;
        }
    }
    assert!(seen.iter().all(|&s| s), "partition lost an index");
}

#[test]
fn test_prepared_leaf_mean_matches_residual_mean() {
    let n = 16;
    let data = step_data(n);
    let tree_prior = CgmTreePrior::new(0.95, 2.0);
    let end_node_prior = MeanNormalPrior::new(2.0, 1, false);
    let residuals: Vec<f64> = data.y_scaled.clone();
    let ctx = context(&data, &tree_prior, &end_node_prior, &residuals);

    let mut tree = Tree::new(n, end_node_prior.initial_scratch());
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..40 {
        proposals::prepare_all_leaves(&mut tree, &ctx);
        proposals::draw_from_tree_structure_posterior(&mut rng, &mut tree, &ctx);
    }
    proposals::prepare_all_leaves(&mut tree, &ctx);

    for leaf in tree.leaves() {
        let span = tree.span(leaf);
        let expected = span.iter().map(|&i| residuals[i as usize]).sum::<f64>() / span.len() as f64;
        match tree.node(leaf).scratch() {
            LeafScratch::Mean {
                mu,
                num_effective_observations,
            } => {
                assert!(
                    (mu - expected).abs() < 1e-12,
                    "leaf mean {mu} vs residual mean {expected}"
                );
                assert_eq!(*num_effective_observations, span.len() as f64);
            }
            _ => panic!("unexpected scratch variant"),
        }
    }
}

#[test]
fn test_structural_steps_preserve_the_partition() {
    let n = 24;
    let data = step_data(n);
    let tree_prior = CgmTreePrior::new(0.95, 2.0);
    let end_node_prior = MeanNormalPrior::new(2.0, 1, false);
    let residuals: Vec<f64> = data.y_scaled.clone();
    let ctx = context(&data, &tree_prior, &end_node_prior, &residuals);

    let mut tree = Tree::new(n, end_node_prior.initial_scratch());
    let mut rng = ChaCha8Rng::seed_from_u64(4);

    for _ in 0..200 {
        proposals::prepare_all_leaves(&mut tree, &ctx);
        proposals::draw_from_tree_structure_posterior(&mut rng, &mut tree, &ctx);
        assert_partition_invariant(&tree, n);
    }
}

#[test]
fn test_births_are_accepted_on_a_sharp_step() {
    let n = 20;
    let data = step_data(n);
    let tree_prior = CgmTreePrior::new(0.95, 2.0);
    let end_node_prior = MeanNormalPrior::new(2.0, 1, false);
    let residuals: Vec<f64> = data.y_scaled.clone();
    let ctx = context(&data, &tree_prior, &end_node_prior, &residuals);

    let mut tree = Tree::new(n, end_node_prior.initial_scratch());
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    for _ in 0..100 {
        proposals::prepare_all_leaves(&mut tree, &ctx);
        proposals::draw_from_tree_structure_posterior(&mut rng, &mut tree, &ctx);
    }

    // the step in the residuals makes at least one split overwhelmingly
    // favorable over 100 attempts
    assert!(tree.num_leaves() > 1, "no birth was ever accepted");
}

#[test]
fn test_single_observation_tree_never_splits() {
    let tree_prior = CgmTreePrior::new(0.95, 2.0);
    let end_node_prior = MeanNormalPrior::new(2.0, 1, false);

    // one observation: a constant column has no cut points, so the
    // feasible-rule set is empty and every step is a no-op
    let x = Array2::from_shape_vec((1, 1), vec![0.0]).unwrap();
    let y = Array1::from(vec![0.5]);
    let single = DataSet::prepare(Data::new(y, x), false, true, false).unwrap();
    let residuals = single.y_scaled.clone();
    let ctx = ProposalContext {
        data: &single,
        pool: None,
        tree_prior: &tree_prior,
        end_node_prior: &end_node_prior,
        residuals: &residuals,
        sigma_sq: 1.0,
        birth_or_death_probability: 0.5,
        swap_probability: 0.1,
        birth_probability: 0.5,
    };

    let mut tree = Tree::new(1, end_node_prior.initial_scratch());
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    for _ in 0..50 {
        proposals::prepare_all_leaves(&mut tree, &ctx);
        proposals::draw_from_tree_structure_posterior(&mut rng, &mut tree, &ctx);
    }
    assert_eq!(tree.num_leaves(), 1);
}
