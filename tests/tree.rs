use ndarray::{Array1, Array2};

use mh_bart::config::Data;
use mh_bart::data::DataSet;
use mh_bart::node::{LeafScratch, Rule};
use mh_bart::tree::Tree;

fn mean_scratch() -> LeafScratch {
    LeafScratch::Mean {
        mu: 0.0,
        num_effective_observations: 0.0,
    }
}

fn line_data(n: usize) -> DataSet {
    let x = Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect()).unwrap();
    let y = Array1::from((0..n).map(|i| i as f64).collect::<Vec<_>>());
    DataSet::prepare(Data::new(y, x), false, true, false).unwrap()
}

#[test]
fn test_tree_primitives() {
    let data = line_data(6);
    let mut tree = Tree::new(6, mean_scratch());
    let root = tree.root();

    assert!(tree.node(root).is_leaf());
    assert_eq!(tree.span(root), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(tree.depth(root), 0);

    // cut 2 is the midpoint between 2 and 3
    let rule = Rule::Ordinal {
        variable: 0,
        cut_index: 2,
    };
    let (left, right) = tree.split_leaf(root, rule, &data, mean_scratch).unwrap();

    assert!(!tree.node(root).is_leaf());
    assert_eq!(tree.span(left), &[0, 1, 2]);
    assert_eq!(tree.span(right), &[3, 4, 5]);
    assert_eq!(tree.depth(left), 1);
    assert_eq!(tree.num_leaves(), 2);

    // collapsing brings back the original leaf span
    tree.collapse_branch(root, mean_scratch());
    assert!(tree.node(root).is_leaf());
    assert_eq!(tree.span(root), &[0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_leaf_spans_partition_the_training_set() {
    let data = line_data(8);
    let mut tree = Tree::new(8, mean_scratch());
    let root = tree.root();

    let (left, _right) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 4,
            },
            &data,
            mean_scratch,
        )
        .unwrap();
    tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 0,
            cut_index: 1,
        },
        &data,
        mean_scratch,
    )
    .unwrap();

    let mut seen = vec![false; 8];
    for leaf in tree.leaves() {
        for &i in tree.span(leaf) {
            assert!(!seen[i as usize], "index {i} appears in two leaves");
            seen[i as usize] = true;
        }
    }
    assert!(seen.iter().all(|&s| s), "some index fell out of the partition");
}

#[test]
fn test_split_with_empty_side_is_refused() {
    let data = line_data(4);
    let mut tree = Tree::new(4, mean_scratch());
    let root = tree.root();

    let (left, _right) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 0,
            },
            &data,
            mean_scratch,
        )
        .unwrap();

    // the left leaf holds only observation 0; every cut routes it left
    assert_eq!(tree.span(left), &[0]);
    let refused = tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 0,
            cut_index: 1,
        },
        &data,
        mean_scratch,
    );
    assert!(refused.is_none());
    assert!(tree.node(left).is_leaf());
}

#[test]
fn test_ordinal_cut_ranges_narrow_with_depth() {
    let data = line_data(10);
    let num_cuts = data.cut_points[0].len() as u32;
    let mut tree = Tree::new(10, mean_scratch());
    let root = tree.root();

    assert_eq!(tree.ordinal_cut_range(root, 0, &data), (0, num_cuts));

    let (left, right) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 4,
            },
            &data,
            mean_scratch,
        )
        .unwrap();

    assert_eq!(tree.ordinal_cut_range(left, 0, &data), (0, 4));
    assert_eq!(tree.ordinal_cut_range(right, 0, &data), (5, num_cuts));
}

#[test]
fn test_exhausted_nodes_are_not_splittable() {
    let data = line_data(4);
    let mut tree = Tree::new(4, mean_scratch());
    let root = tree.root();

    let (left, _right) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 0,
            },
            &data,
            mean_scratch,
        )
        .unwrap();

    assert!(tree.splittable_variables(left, &data).is_empty());
}

#[test]
fn test_enumeration_indices_follow_traversal_order() {
    let data = line_data(8);
    let mut tree = Tree::new(8, mean_scratch());
    let root = tree.root();

    let (left, _) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 4,
            },
            &data,
            mean_scratch,
        )
        .unwrap();
    tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 0,
            cut_index: 1,
        },
        &data,
        mean_scratch,
    )
    .unwrap();

    let leaves = tree.enumerate_leaves();
    assert_eq!(leaves.len(), 3);
    // spans in traversal order tile 0..8 from the left
    let starts: Vec<u32> = leaves.iter().map(|&id| tree.span(id)[0]).collect();
    assert_eq!(starts, vec![0, 2, 5]);
}

#[test]
fn test_snapshot_restores_topology_and_spans() {
    let data = line_data(8);
    let mut tree = Tree::new(8, mean_scratch());
    let root = tree.root();
    tree.split_leaf(
        root,
        Rule::Ordinal {
            variable: 0,
            cut_index: 4,
        },
        &data,
        mean_scratch,
    )
    .unwrap();

    let before = tree.clone();
    let snapshot = tree.snapshot(root);

    let (left, _) = tree.node(root).children().unwrap();
    tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 0,
            cut_index: 1,
        },
        &data,
        mean_scratch,
    )
    .unwrap();
    assert_ne!(tree, before);

    tree.restore(snapshot);
    assert_eq!(tree, before, "restore must be byte-identical");
}

#[test]
fn test_state_string_round_trip() {
    let data = line_data(8);
    let mut tree = Tree::new(8, mean_scratch());
    let root = tree.root();
    let (left, _) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 4,
            },
            &data,
            mean_scratch,
        )
        .unwrap();
    tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 0,
            cut_index: 1,
        },
        &data,
        mean_scratch,
    )
    .unwrap();

    let encoded = tree.to_state_string();
    assert!(!encoded.contains('\n'));

    let decoded = Tree::from_state_string(&encoded, &data, 8).unwrap();
    assert_eq!(decoded.num_leaves(), tree.num_leaves());
    assert_eq!(decoded.to_state_string(), encoded);

    // memberships were recomputed from the rules
    let leaves: Vec<Vec<u32>> = decoded
        .leaves()
        .into_iter()
        .map(|id| decoded.span(id).to_vec())
        .collect();
    assert_eq!(leaves, vec![vec![0, 1], vec![2, 3, 4], vec![5, 6, 7]]);
}

#[test]
fn test_variable_use_counting() {
    let x = Array2::from_shape_vec(
        (6, 2),
        vec![
            0.0, 5.0, //
            1.0, 4.0, //
            2.0, 3.0, //
            3.0, 2.0, //
            4.0, 1.0, //
            5.0, 0.0,
        ],
    )
    .unwrap();
    let y = Array1::from(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let data = DataSet::prepare(Data::new(y, x), false, true, false).unwrap();

    let mut tree = Tree::new(6, mean_scratch());
    let root = tree.root();
    let (left, _) = tree
        .split_leaf(
            root,
            Rule::Ordinal {
                variable: 0,
                cut_index: 2,
            },
            &data,
            mean_scratch,
        )
        .unwrap();
    tree.split_leaf(
        left,
        Rule::Ordinal {
            variable: 1,
            cut_index: 3,
        },
        &data,
        mean_scratch,
    )
    .unwrap();

    let mut counts = vec![0u32; 2];
    tree.count_variable_uses(&mut counts);
    assert_eq!(counts, vec![1, 1]);
}

#[test]
fn test_categorical_rules_route_by_mask() {
    let x = Array2::from_shape_vec((6, 1), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]).unwrap();
    let y = Array1::from(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let mut options = Data::new(y, x);
    options.variable_types = vec![mh_bart::VariableType::Categorical];
    let data = DataSet::prepare(options, false, true, false).unwrap();

    assert_eq!(data.num_categories[0], 3);

    let mut tree = Tree::new(6, mean_scratch());
    let root = tree.root();
    // categories {0, 2} go left
    let (left, right) = tree
        .split_leaf(
            root,
            Rule::Categorical {
                variable: 0,
                category_mask: 0b101,
            },
            &data,
            mean_scratch,
        )
        .unwrap();

    assert_eq!(tree.span(left), &[0, 2, 3, 5]);
    assert_eq!(tree.span(right), &[1, 4]);

    // the left child can still separate 0 from 2, the right child cannot
    assert_eq!(tree.available_categories(left, 0, &data), 0b101);
    assert!(tree.splittable_variables(right, &data).is_empty());
}
