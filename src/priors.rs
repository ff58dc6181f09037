//! The three priors behind the sampler: the Chipman-George-McCulloch tree
//! prior, the conjugate end-node families, and the scaled-inverse-chi-squared
//! residual-variance prior. Each is a small trait looked up rarely, so they
//! sit behind vtables while the hot leaf scratch stays a plain enum.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::ThreadPool;

use crate::data::{DataSet, VariableType};
use crate::math;
use crate::node::{LeafScratch, NodeId, Rule};
use crate::sampling;
use crate::tree::Tree;

/// Everything a leaf update gets to see: the data, the per-tree residuals,
/// the leaf's index span, and the thread pool for reductions.
pub struct LeafContext<'a> {
    pub data: &'a DataSet,
    pub pool: Option<&'a ThreadPool>,
    /// Partial residuals the tree is currently fit against.
    pub residuals: &'a [f64],
    /// The leaf's observation indices.
    pub indices: &'a [u32],
    /// True when the leaf covers the whole training set.
    pub is_top: bool,
}

/// A drawn rule along with whether it exhausts a child's feasible splits.
pub struct DrawnRule {
    pub rule: Rule,
    pub exhausted_left_splits: bool,
    pub exhausted_right_splits: bool,
}

/// Prior over tree topologies and split rules.
pub trait TreePrior {
    /// Probability that a node at this position grows; zero when no split
    /// is feasible there.
    fn growth_probability(&self, tree: &Tree, id: NodeId, data: &DataSet) -> f64;

    /// Growth probability at `depth` for a hypothetical node known to have
    /// feasible splits remaining (or not).
    fn growth_probability_at_depth(&self, depth: usize, has_feasible_split: bool) -> f64;

    /// Log-probability of drawing `rule` at the node under the prior;
    /// `-inf` when the rule is not in the node's feasible set.
    fn log_rule_probability(&self, tree: &Tree, id: NodeId, rule: &Rule, data: &DataSet) -> f64;

    /// Sum of growth and rule terms over the subtree rooted at `id`.
    fn log_subtree_probability(&self, tree: &Tree, id: NodeId, data: &DataSet) -> f64;

    /// Draws a rule uniformly over feasible variables and their feasible
    /// rules; None when the node has nothing to split on.
    fn draw_rule(
        &self,
        rng: &mut ChaCha8Rng,
        tree: &Tree,
        id: NodeId,
        data: &DataSet,
    ) -> Option<DrawnRule>;
}

/// `P(split at depth d) = base / (1 + d)^power`.
pub struct CgmTreePrior {
    pub base: f64,
    pub power: f64,
}

impl CgmTreePrior {
    pub fn new(base: f64, power: f64) -> Self {
        Self { base, power }
    }
}

impl TreePrior for CgmTreePrior {
    fn growth_probability(&self, tree: &Tree, id: NodeId, data: &DataSet) -> f64 {
        let has_split = tree.splittable_variables(id, data).into_iter().next().is_some();
        self.growth_probability_at_depth(tree.depth(id), has_split)
    }

    fn growth_probability_at_depth(&self, depth: usize, has_feasible_split: bool) -> f64 {
        if !has_feasible_split {
            return 0.0;
        }
        self.base / (1.0 + depth as f64).powf(self.power)
    }

    fn log_rule_probability(&self, tree: &Tree, id: NodeId, rule: &Rule, data: &DataSet) -> f64 {
        let num_variables = tree.splittable_variables(id, data).len();
        if num_variables == 0 {
            return f64::NEG_INFINITY;
        }
        let log_variable_term = -(num_variables as f64).ln();

        match *rule {
            Rule::Ordinal {
                variable,
                cut_index,
            } => {
                let (low, high) = tree.ordinal_cut_range(id, variable, data);
                if cut_index < low || cut_index >= high {
                    return f64::NEG_INFINITY;
                }
                log_variable_term - f64::from(high - low).ln()
            }
            Rule::Categorical {
                variable,
                category_mask,
            } => {
                let available = tree.available_categories(id, variable, data);
                let num_available = available.count_ones();
                if num_available < 2
                    || category_mask & !available != 0
                    || category_mask == 0
                    || category_mask == available
                {
                    return f64::NEG_INFINITY;
                }
                let num_assignments = (2.0f64).powi(num_available as i32) - 2.0;
                log_variable_term - num_assignments.ln()
            }
        }
    }

    fn log_subtree_probability(&self, tree: &Tree, id: NodeId, data: &DataSet) -> f64 {
        let mut total = 0.0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let growth = self.growth_probability(tree, current, data);
            match tree.node(current).children() {
                Some((left, right)) => {
                    let rule = tree.node(current).rule().unwrap();
                    total += growth.ln();
                    total += self.log_rule_probability(tree, current, rule, data);
                    stack.push(right);
                    stack.push(left);
                }
                None => total += (1.0 - growth).ln(),
            }
            if total == f64::NEG_INFINITY {
                return total;
            }
        }
        total
    }

    fn draw_rule(
        &self,
        rng: &mut ChaCha8Rng,
        tree: &Tree,
        id: NodeId,
        data: &DataSet,
    ) -> Option<DrawnRule> {
        let variables = tree.splittable_variables(id, data);
        if variables.is_empty() {
            return None;
        }
        let variable = variables[rng.gen_range(0..variables.len())];
        let others_splittable = variables.len() > 1;

        match data.variable_types[variable] {
            VariableType::Ordinal => {
                let (low, high) = tree.ordinal_cut_range(id, variable, data);
                let cut_index = rng.gen_range(low..high);
                Some(DrawnRule {
                    rule: Rule::Ordinal {
                        variable,
                        cut_index,
                    },
                    // a child is exhausted when its sub-range collapses and
                    // no other variable remains splittable
                    exhausted_left_splits: !others_splittable && cut_index == low,
                    exhausted_right_splits: !others_splittable && cut_index + 1 == high,
                })
            }
            VariableType::Categorical => {
                let available = tree.available_categories(id, variable, data);
                let mask = loop {
                    let candidate = rng.gen::<u64>() & available;
                    if candidate != 0 && candidate != available {
                        break candidate;
                    }
                };
                Some(DrawnRule {
                    rule: Rule::Categorical {
                        variable,
                        category_mask: mask,
                    },
                    exhausted_left_splits: !others_splittable && mask.count_ones() < 2,
                    exhausted_right_splits: !others_splittable
                        && (available & !mask).count_ones() < 2,
                })
            }
        }
    }
}

/// Conjugate family living in the leaves.
pub trait EndNodePrior {
    /// Fresh scratch for a newly created leaf.
    fn initial_scratch(&self) -> LeafScratch;

    /// Rebuilds the scratch from the leaf's memberships and residuals so
    /// that likelihood and posterior calls are valid.
    fn prepare_scratch(&self, ctx: &LeafContext<'_>, scratch: &mut LeafScratch, sigma_sq: f64);

    /// Likelihood of the leaf's residuals with the parameter integrated
    /// out. Requires prepared scratch.
    fn log_integrated_likelihood(
        &self,
        ctx: &LeafContext<'_>,
        scratch: &LeafScratch,
        sigma_sq: f64,
    ) -> f64;

    /// Replaces the scratch summary with a parameter drawn from its
    /// posterior.
    fn draw_from_posterior(&self, rng: &mut ChaCha8Rng, scratch: &mut LeafScratch, sigma_sq: f64);

    /// Evaluates the leaf's drawn parameter at one predictor row.
    fn predict(&self, scratch: &LeafScratch, row: &[f64]) -> f64;
}

/// Constant leaf mean with prior `mu ~ N(0, 1/precision)`, the precision
/// derived from `k` so that `sigma_mu = (binary ? 3.0 : 0.5) / (k sqrt(T))`.
pub struct MeanNormalPrior {
    pub precision: f64,
}

impl MeanNormalPrior {
    pub fn new(k: f64, num_trees: usize, response_is_binary: bool) -> Self {
        let numerator = if response_is_binary { 3.0 } else { 0.5 };
        let sigma_mu = numerator / (k * (num_trees as f64).sqrt());
        Self {
            precision: 1.0 / (sigma_mu * sigma_mu),
        }
    }

    /// Recovers the `k` hyperparameter this precision was derived from.
    pub fn k(&self, num_trees: usize, response_is_binary: bool) -> f64 {
        let numerator = if response_is_binary { 3.0 } else { 0.5 };
        let sigma_mu = (1.0 / self.precision).sqrt();
        numerator / (sigma_mu * (num_trees as f64).sqrt())
    }
}

impl EndNodePrior for MeanNormalPrior {
    fn initial_scratch(&self) -> LeafScratch {
        LeafScratch::Mean {
            mu: 0.0,
            num_effective_observations: 0.0,
        }
    }

    fn prepare_scratch(&self, ctx: &LeafContext<'_>, scratch: &mut LeafScratch, _sigma_sq: f64) {
        let LeafScratch::Mean {
            mu,
            num_effective_observations,
        } = scratch
        else {
            unreachable!("mean-normal prior paired with a foreign scratch");
        };

        match (&ctx.data.weights, ctx.is_top) {
            (None, true) => {
                *mu = math::compute_mean(ctx.pool, ctx.residuals);
                *num_effective_observations = ctx.indices.len() as f64;
            }
            (None, false) => {
                *mu = math::compute_indexed_mean(ctx.pool, ctx.residuals, ctx.indices);
                *num_effective_observations = ctx.indices.len() as f64;
            }
            (Some(weights), true) => {
                let weights = weights.as_slice().unwrap();
                (*mu, *num_effective_observations) =
                    math::compute_weighted_mean(ctx.pool, ctx.residuals, weights);
            }
            (Some(weights), false) => {
                let weights = weights.as_slice().unwrap();
                (*mu, *num_effective_observations) = math::compute_indexed_weighted_mean(
                    ctx.pool,
                    ctx.residuals,
                    ctx.indices,
                    weights,
                );
            }
        }
    }

    fn log_integrated_likelihood(
        &self,
        ctx: &LeafContext<'_>,
        scratch: &LeafScratch,
        sigma_sq: f64,
    ) -> f64 {
        if ctx.indices.is_empty() {
            return 0.0;
        }
        let LeafScratch::Mean {
            mu: y_bar,
            num_effective_observations,
        } = scratch
        else {
            unreachable!("mean-normal prior paired with a foreign scratch");
        };

        let sum_of_squares = match (&ctx.data.weights, ctx.is_top) {
            (None, true) => math::compute_sum_of_squares(ctx.pool, ctx.residuals, *y_bar),
            (None, false) => {
                math::compute_indexed_sum_of_squares(ctx.pool, ctx.residuals, ctx.indices, *y_bar)
            }
            (Some(weights), true) => math::compute_weighted_sum_of_squares(
                ctx.pool,
                ctx.residuals,
                weights.as_slice().unwrap(),
                *y_bar,
            ),
            (Some(weights), false) => math::compute_indexed_weighted_sum_of_squares(
                ctx.pool,
                ctx.residuals,
                ctx.indices,
                weights.as_slice().unwrap(),
                *y_bar,
            ),
        };

        let data_precision = num_effective_observations / sigma_sq;
        0.5 * (self.precision / (self.precision + data_precision)).ln()
            - 0.5 * sum_of_squares / sigma_sq
            - 0.5 * (self.precision * y_bar) * (data_precision * y_bar)
                / (self.precision + data_precision)
    }

    fn draw_from_posterior(&self, rng: &mut ChaCha8Rng, scratch: &mut LeafScratch, sigma_sq: f64) {
        let LeafScratch::Mean {
            mu,
            num_effective_observations,
        } = scratch
        else {
            unreachable!("mean-normal prior paired with a foreign scratch");
        };

        let posterior_precision = *num_effective_observations / sigma_sq;
        let posterior_mean = posterior_precision * *mu / (self.precision + posterior_precision);
        let posterior_sd = 1.0 / (self.precision + posterior_precision).sqrt();

        let z: f64 = StandardNormal.sample(rng);
        *mu = posterior_mean + posterior_sd * z;
    }

    fn predict(&self, scratch: &LeafScratch, _row: &[f64]) -> f64 {
        match scratch {
            LeafScratch::Mean { mu, .. } => *mu,
            LeafScratch::LinReg { .. } => {
                unreachable!("mean-normal prior paired with a foreign scratch")
            }
        }
    }
}

/// Per-leaf linear regression with coefficient prior `beta_i ~ N(0, 1/lambda_i)`
/// over the intercept-augmented design. Posterior precision `X'X + Lambda sigma^2`
/// is kept as its upper Cholesky factor.
pub struct LinRegNormalPrior {
    pub precisions: Vec<f64>,
}

impl LinRegNormalPrior {
    pub fn new(precisions: Vec<f64>) -> Self {
        Self { precisions }
    }

    fn dim(&self) -> usize {
        self.precisions.len()
    }
}

impl EndNodePrior for LinRegNormalPrior {
    fn initial_scratch(&self) -> LeafScratch {
        LeafScratch::LinReg {
            xt: Vec::new(),
            y: Vec::new(),
            r_factor: Vec::new(),
            coefficients: vec![0.0; self.dim()],
        }
    }

    fn prepare_scratch(&self, ctx: &LeafContext<'_>, scratch: &mut LeafScratch, sigma_sq: f64) {
        let LeafScratch::LinReg {
            xt,
            y,
            r_factor,
            coefficients,
        } = scratch
        else {
            unreachable!("linear-regression prior paired with a foreign scratch");
        };

        let dim = self.dim();
        let count = ctx.indices.len();

        xt.clear();
        xt.reserve(count * dim);
        y.clear();
        y.reserve(count);
        for &index in ctx.indices {
            xt.push(1.0);
            xt.extend_from_slice(ctx.data.xt_row(index as usize));
            y.push(ctx.residuals[index as usize]);
        }

        r_factor.resize(dim * dim, 0.0);
        math::crossproduct_upper(xt, dim, count, r_factor);
        for (i, &precision) in self.precisions.iter().enumerate() {
            r_factor[i * dim + i] += precision * sigma_sq;
        }
        let factored = math::cholesky_upper_in_place(r_factor, dim);
        debug_assert!(factored, "posterior precision must be positive definite");

        coefficients.resize(dim, 0.0);
        math::design_transpose_times_vector(xt, dim, y, coefficients);
        math::solve_upper_triangular_transposed(r_factor, dim, coefficients);
    }

    fn log_integrated_likelihood(
        &self,
        _ctx: &LeafContext<'_>,
        scratch: &LeafScratch,
        sigma_sq: f64,
    ) -> f64 {
        let LeafScratch::LinReg {
            xt,
            y,
            r_factor,
            coefficients,
        } = scratch
        else {
            unreachable!("linear-regression prior paired with a foreign scratch");
        };
        if y.is_empty() {
            return 0.0;
        }

        let dim = self.dim();
        let mut determinant_term = 0.0;
        for i in 0..dim {
            determinant_term -= r_factor[i * dim + i].ln();
        }

        // coefficients currently hold R^-T X'y
        let mut beta_tilde = coefficients.clone();
        math::solve_upper_triangular(r_factor, dim, &mut beta_tilde);

        let mut y_hat = vec![0.0; y.len()];
        math::design_times_vector(xt, dim, &beta_tilde, &mut y_hat);

        let exponential_term =
            0.5 * (math::dot_product(y, &y_hat) - math::dot_product(y, y)) / sigma_sq;

        determinant_term + exponential_term
    }

    fn draw_from_posterior(&self, rng: &mut ChaCha8Rng, scratch: &mut LeafScratch, sigma_sq: f64) {
        let LeafScratch::LinReg {
            r_factor,
            coefficients,
            ..
        } = scratch
        else {
            unreachable!("linear-regression prior paired with a foreign scratch");
        };

        let sigma = sigma_sq.sqrt();
        for beta in coefficients.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *beta += z * sigma;
        }
        math::solve_upper_triangular(r_factor, self.dim(), coefficients);
    }

    fn predict(&self, scratch: &LeafScratch, row: &[f64]) -> f64 {
        match scratch {
            LeafScratch::LinReg { coefficients, .. } => {
                coefficients[0] + math::dot_product(row, &coefficients[1..])
            }
            LeafScratch::Mean { .. } => {
                unreachable!("linear-regression prior paired with a foreign scratch")
            }
        }
    }
}

/// Prior on the residual variance in the scaled space.
pub trait ResidualVariancePrior {
    /// Posterior draw of sigma^2 given the weighted sum of squared
    /// residuals and the effective observation count.
    fn draw_from_posterior(
        &self,
        rng: &mut ChaCha8Rng,
        num_effective_observations: f64,
        sum_of_squared_residuals: f64,
    ) -> f64;

    fn scale(&self) -> f64;

    /// Rescales the prior; used to keep the unscaled quantile fixed across
    /// response replacements.
    fn set_scale(&mut self, scale: f64);
}

/// `sigma^2 ~ df * scale / chisq(df)`.
pub struct ChiSquaredPrior {
    pub degrees_of_freedom: f64,
    pub scale: f64,
}

impl ChiSquaredPrior {
    /// Calibrates the unit-space scale so the prior puts `quantile` of its
    /// mass below a sigma estimate of one; the fit multiplies in the scaled
    /// estimate afterwards.
    pub fn new(degrees_of_freedom: f64, quantile: f64) -> Self {
        Self {
            degrees_of_freedom,
            scale: sampling::chi_squared_quantile(1.0 - quantile, degrees_of_freedom)
                / degrees_of_freedom,
        }
    }
}

impl ResidualVariancePrior for ChiSquaredPrior {
    fn draw_from_posterior(
        &self,
        rng: &mut ChaCha8Rng,
        num_effective_observations: f64,
        sum_of_squared_residuals: f64,
    ) -> f64 {
        let posterior_df = self.degrees_of_freedom + num_effective_observations;
        let numerator = self.degrees_of_freedom * self.scale + sum_of_squared_residuals;
        numerator / sampling::draw_chi_squared(rng, posterior_df)
    }

    fn scale(&self) -> f64 {
        self.scale
    }

    fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};
    use rand::SeedableRng;

    use crate::config::Data;
    use crate::data::DataSet;

    fn toy_data() -> DataSet {
        let x = Array2::from_shape_vec((6, 1), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let y = array![0.1, 0.2, 0.3, -0.1, -0.2, -0.3];
        DataSet::prepare(Data::new(y, x), false, true, false).unwrap()
    }

    #[test]
    fn growth_probability_decays_with_depth() {
        let prior = CgmTreePrior::new(0.95, 2.0);
        assert_abs_diff_eq!(prior.growth_probability_at_depth(0, true), 0.95);
        assert_abs_diff_eq!(prior.growth_probability_at_depth(1, true), 0.95 / 4.0);
        assert_abs_diff_eq!(prior.growth_probability_at_depth(2, true), 0.95 / 9.0);
        assert_eq!(prior.growth_probability_at_depth(0, false), 0.0);
    }

    #[test]
    fn rule_probability_is_uniform_over_the_feasible_set() {
        let data = toy_data();
        let tree = Tree::new(
            6,
            LeafScratch::Mean {
                mu: 0.0,
                num_effective_observations: 0.0,
            },
        );
        let prior = CgmTreePrior::new(0.95, 2.0);

        let num_cuts = data.cut_points[0].len() as f64;
        let rule = Rule::Ordinal {
            variable: 0,
            cut_index: 2,
        };
        let log_probability = prior.log_rule_probability(&tree, tree.root(), &rule, &data);
        assert_abs_diff_eq!(log_probability, -(num_cuts.ln()), epsilon = 1e-12);
    }

    #[test]
    fn mean_normal_prepare_matches_weighted_mean() {
        let data = {
            let x = Array2::from_shape_vec((4, 1), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
            let y = array![1.0, 2.0, 3.0, 4.0];
            let mut options = Data::new(y, x);
            options.weights = Some(array![1.0, 1.0, 2.0, 2.0]);
            DataSet::prepare(options, false, true, false).unwrap()
        };
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let residuals: Vec<f64> = data.y_scaled.clone();
        let indices: Vec<u32> = vec![0, 1, 2, 3];
        let ctx = LeafContext {
            data: &data,
            pool: None,
            residuals: &residuals,
            indices: &indices,
            is_top: true,
        };

        let mut scratch = prior.initial_scratch();
        prior.prepare_scratch(&ctx, &mut scratch, 1.0);

        let LeafScratch::Mean {
            mu,
            num_effective_observations,
        } = scratch
        else {
            panic!("wrong scratch variant");
        };
        let expected = residuals
            .iter()
            .zip([1.0, 1.0, 2.0, 2.0])
            .map(|(&r, w)| r * w)
            .sum::<f64>()
            / 6.0;
        assert_abs_diff_eq!(mu, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(num_effective_observations, 6.0);
    }

    #[test]
    fn mean_normal_posterior_shrinks_toward_zero() {
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let draws: Vec<f64> = (0..4000)
            .map(|_| {
                let mut scratch = LeafScratch::Mean {
                    mu: 0.4,
                    num_effective_observations: 10.0,
                };
                prior.draw_from_posterior(&mut rng, &mut scratch, 0.01);
                match scratch {
                    LeafScratch::Mean { mu, .. } => mu,
                    _ => unreachable!(),
                }
            })
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;

        let data_precision = 10.0 / 0.01;
        let expected = data_precision * 0.4 / (prior.precision + data_precision);
        assert!((mean - expected).abs() < 0.01, "posterior mean {mean}");
        assert!(mean < 0.4);
    }

    #[test]
    fn linreg_likelihood_prefers_the_fitting_leaf() {
        let x = Array2::from_shape_vec((8, 1), (0..8).map(f64::from).collect()).unwrap();
        let y: Array1<f64> = array![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let data = DataSet::prepare(Data::new(y, x), false, true, false).unwrap();
        let prior = LinRegNormalPrior::new(vec![1.0, 1.0]);

        let linear_residuals: Vec<f64> = data.y_scaled.clone();
        let noisy_residuals: Vec<f64> = data
            .y_scaled
            .iter()
            .enumerate()
            .map(|(i, &r)| if i % 2 == 0 { r + 0.4 } else { r - 0.4 })
            .collect();
        let indices: Vec<u32> = (0..8).collect();

        let log_likelihood = |residuals: &[f64]| {
            let ctx = LeafContext {
                data: &data,
                pool: None,
                residuals,
                indices: &indices,
                is_top: true,
            };
            let mut scratch = prior.initial_scratch();
            prior.prepare_scratch(&ctx, &mut scratch, 0.04);
            prior.log_integrated_likelihood(&ctx, &scratch, 0.04)
        };

        assert!(log_likelihood(&linear_residuals) > log_likelihood(&noisy_residuals));
    }

    #[test]
    fn chi_squared_prior_matches_its_quantile_calibration() {
        let prior = ChiSquaredPrior::new(3.0, 0.9);
        // P(sigma^2 <= 1) = P(chisq >= df * scale) = 0.9 by construction
        let threshold = 3.0 * prior.scale;
        let cdf_at_threshold = 1.0 - 0.9;
        let quantile = sampling::chi_squared_quantile(cdf_at_threshold, 3.0);
        assert_abs_diff_eq!(threshold, quantile, epsilon = 1e-10);
    }

    #[test]
    fn variance_posterior_concentrates_on_the_residual_scale() {
        let prior = ChiSquaredPrior::new(3.0, 0.9);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let n = 4000.0;
        let true_sigma_sq = 0.25;
        let ssr = true_sigma_sq * n;

        let draws: Vec<f64> = (0..2000)
            .map(|_| prior.draw_from_posterior(&mut rng, n, ssr))
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!(
            (mean - true_sigma_sq).abs() < 0.01,
            "posterior mean {mean} vs {true_sigma_sq}"
        );
    }
}
