//! The fit orchestrator: owns the ensemble, the running per-observation
//! fits, the residual standard deviation, and the generator, and executes
//! the outer MCMC loop. Trees are swept strictly in order because each
//! tree's residuals depend on every other tree's current contribution.

use std::time::Instant;

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPool;

use crate::config::{CallbackInfo, Control, Data, EndNodeModel, Model};
use crate::data::DataSet;
use crate::error::BartError;
use crate::priors::{
    CgmTreePrior, ChiSquaredPrior, EndNodePrior, LinRegNormalPrior, MeanNormalPrior,
    ResidualVariancePrior, TreePrior,
};
use crate::proposals::{self, ProposalContext};
use crate::results::Results;
use crate::sampling;
use crate::tree::Tree;

/// A restorable snapshot of the sampler state: tree structure and leaf
/// parameters as strings, the fit bookkeeping, and the generator position.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub trees: Vec<String>,
    pub tree_fits: Vec<f64>,
    pub total_fits: Vec<f64>,
    pub total_test_fits: Vec<f64>,
    pub sigma: f64,
    pub residual_variance_scale: f64,
    pub rng_seed: [u8; 32],
    pub rng_word_pos: u128,
}

pub struct BartFit {
    pub control: Control,
    pub model: Model,
    pub data: DataSet,

    tree_prior: Box<dyn TreePrior>,
    end_node_prior: Box<dyn EndNodePrior>,
    residual_variance_prior: Box<dyn ResidualVariancePrior>,

    pool: Option<ThreadPool>,
    rng: ChaCha8Rng,

    trees: Vec<Tree>,
    /// Each tree's last drawn contribution, one length-n block per tree.
    tree_fits: Vec<f64>,
    /// Column sums of `tree_fits`.
    total_fits: Vec<f64>,
    total_test_fits: Vec<f64>,
    /// Residual standard deviation in the scaled space; 1 for binary y.
    sigma: f64,
    running_time: f64,

    /// Partial-residual buffer reused across tree updates.
    tree_y: Vec<f64>,
}

impl BartFit {
    pub fn new(control: Control, model: Model, data: Data) -> Result<Self, BartError> {
        control.validate()?;
        data.validate()?;
        model.validate(data.x.ncols())?;

        let dataset = DataSet::prepare(
            data,
            control.response_is_binary,
            control.use_quantiles,
            control.match_bayes_tree,
        )?;
        let num_observations = dataset.num_observations();
        let num_test_observations = dataset.num_test_observations();
        let num_trees = control.num_trees;

        let tree_prior: Box<dyn TreePrior> = Box::new(CgmTreePrior::new(
            model.tree_prior.base,
            model.tree_prior.power,
        ));
        let end_node_prior: Box<dyn EndNodePrior> = match &model.end_node_prior {
            EndNodeModel::MeanNormal { k } => Box::new(MeanNormalPrior::new(
                *k,
                num_trees,
                control.response_is_binary,
            )),
            EndNodeModel::LinRegNormal { precisions } => {
                Box::new(LinRegNormalPrior::new(precisions.clone()))
            }
        };
        let mut residual_variance_prior: Box<dyn ResidualVariancePrior> =
            Box::new(ChiSquaredPrior::new(
                model.residual_variance_prior.df,
                model.residual_variance_prior.quantile,
            ));

        let sigma = if control.response_is_binary {
            1.0
        } else {
            dataset.sigma_estimate / dataset.scale.range
        };
        let unit_scale = residual_variance_prior.scale();
        residual_variance_prior.set_scale(sigma * sigma * unit_scale);

        let pool = if control.num_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(control.num_threads)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(error) => {
                    eprintln!("Unable to multi-thread, defaulting to single: {error}");
                    None
                }
            }
        } else {
            None
        };

        let trees = (0..num_trees)
            .map(|_| Tree::new(num_observations, end_node_prior.initial_scratch()))
            .collect();

        let fit = Self {
            rng: ChaCha8Rng::seed_from_u64(control.rng_seed),
            control,
            model,
            data: dataset,
            tree_prior,
            end_node_prior,
            residual_variance_prior,
            pool,
            trees,
            tree_fits: vec![0.0; num_observations * num_trees],
            total_fits: vec![0.0; num_observations],
            total_test_fits: vec![0.0; num_test_observations],
            sigma,
            running_time: 0.0,
            tree_y: vec![0.0; num_observations],
        };

        if fit.control.verbose {
            fit.print_initial_summary();
        }
        Ok(fit)
    }

    /// Residual standard deviation in the scaled space.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Seconds spent inside `run_sampler` loops, cumulative over calls.
    pub fn running_time(&self) -> f64 {
        self.running_time
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn total_fits(&self) -> &[f64] {
        &self.total_fits
    }

    pub fn tree_fits(&self, tree: usize) -> &[f64] {
        let n = self.data.num_observations();
        &self.tree_fits[tree * n..(tree + 1) * n]
    }

    /// Runs the chain with the configured burn-in and sample counts.
    pub fn run_sampler(&mut self) -> Results {
        self.run_sampler_for(self.control.num_burn_in, self.control.num_samples)
    }

    /// Runs `(num_burn_in + num_samples) * thinning_rate` iterations and
    /// returns the collected samples.
    pub fn run_sampler_for(&mut self, num_burn_in: usize, num_samples: usize) -> Results {
        let num_observations = self.data.num_observations();
        let num_predictors = self.data.num_predictors();
        let num_test_observations = self.data.num_test_observations();
        let num_trees = self.control.num_trees;
        let thinning_rate = self.control.tree_thinning_rate;

        // at least one slot so burn-in storage has somewhere to go
        let mut results = Results::new(
            num_observations,
            num_predictors,
            num_test_observations,
            num_samples.max(1),
            self.control.keep_training_fits,
        );
        let mut current_fits = vec![0.0; num_observations];
        let mut current_test_fits = vec![0.0; num_test_observations];
        let mut variable_counts = vec![0u32; num_predictors];

        let total_iterations = (num_burn_in + num_samples) * thinning_rate;
        if self.control.verbose {
            println!("Running mcmc loop:");
        }
        let timer = Instant::now();

        for k in 0..total_iterations {
            let is_thinning_iteration = (k + 1) % thinning_rate != 0;
            let major_iteration = k / thinning_rate;

            if self.control.verbose
                && !is_thinning_iteration
                && (major_iteration + 1) % self.control.print_every == 0
            {
                println!(
                    "iteration: {} (of {})",
                    major_iteration + 1,
                    total_iterations / thinning_rate
                );
            }

            if !is_thinning_iteration && num_test_observations > 0 {
                self.total_test_fits.fill(0.0);
            }

            let sigma_sq = self.sigma * self.sigma;
            for t in 0..num_trees {
                let test_fits = if !is_thinning_iteration && num_test_observations > 0 {
                    Some(current_test_fits.as_mut_slice())
                } else {
                    None
                };
                self.update_tree(t, sigma_sq, &mut current_fits, test_fits);
            }

            if self.control.response_is_binary {
                self.sample_probit_latent_variables();
            } else {
                let (num_effective, sum_of_squared_residuals) =
                    self.weighted_residual_sum_of_squares();
                let sigma_sq = self.residual_variance_prior.draw_from_posterior(
                    &mut self.rng,
                    num_effective,
                    sum_of_squared_residuals,
                );
                self.sigma = sigma_sq.sqrt();
            }

            if !is_thinning_iteration {
                // while burning in, keep overwriting the first slot
                let is_burning_in = major_iteration < num_burn_in;
                let sample = if is_burning_in {
                    0
                } else {
                    major_iteration - num_burn_in
                };

                self.count_variable_uses(&mut variable_counts);
                self.store_samples(&mut results, sample, &variable_counts);
                self.invoke_callback(&results, sample, is_burning_in);
            }
        }

        self.running_time += timer.elapsed().as_secs_f64();
        if self.control.verbose {
            self.print_terminal_summary();
        }
        results
    }

    /// One tree's sub-iteration: residuals, structural step, leaf draws,
    /// fit bookkeeping.
    fn update_tree(
        &mut self,
        t: usize,
        sigma_sq: f64,
        current_fits: &mut [f64],
        mut current_test_fits: Option<&mut [f64]>,
    ) {
        let Self {
            trees,
            tree_y,
            data,
            pool,
            tree_prior,
            end_node_prior,
            rng,
            tree_fits,
            total_fits,
            total_test_fits,
            model,
            ..
        } = self;
        let num_observations = data.num_observations();
        let old_tree_fits = &mut tree_fits[t * num_observations..(t + 1) * num_observations];

        // residuals against the rest of the ensemble:
        // treeY = y - (totalFits - oldTreeFits)
        for i in 0..num_observations {
            tree_y[i] = data.y_scaled[i] - total_fits[i] + old_tree_fits[i];
        }

        let ctx = ProposalContext {
            data,
            pool: pool.as_ref(),
            tree_prior: tree_prior.as_ref(),
            end_node_prior: end_node_prior.as_ref(),
            residuals: tree_y.as_slice(),
            sigma_sq,
            birth_or_death_probability: model.birth_or_death_probability,
            swap_probability: model.swap_probability,
            birth_probability: model.birth_probability,
        };
        let tree = &mut trees[t];

        proposals::prepare_all_leaves(tree, &ctx);
        proposals::draw_from_tree_structure_posterior(rng, tree, &ctx);

        for leaf in tree.enumerate_leaves() {
            ctx.end_node_prior.draw_from_posterior(
                rng,
                tree.node_mut(leaf).scratch_mut(),
                sigma_sq,
            );
        }

        for leaf in tree.leaves() {
            let scratch = tree.node(leaf).scratch();
            for &i in tree.span(leaf) {
                let i = i as usize;
                current_fits[i] = ctx.end_node_prior.predict(scratch, data.xt_row(i));
            }
        }

        if let Some(test_fits) = current_test_fits.as_deref_mut() {
            for i in 0..data.num_test_observations() {
                let row = data.xt_test_row(i);
                let leaf = tree.leaf_for_row(row, data);
                test_fits[i] = ctx.end_node_prior.predict(tree.node(leaf).scratch(), row);
            }
            for (total, &value) in total_test_fits.iter_mut().zip(test_fits.iter()) {
                *total += value;
            }
        }

        // totalFits += currFits - oldTreeFits
        for i in 0..num_observations {
            total_fits[i] += current_fits[i] - old_tree_fits[i];
            old_tree_fits[i] = current_fits[i];
        }
    }

    /// Resamples the probit latents around the current total fits.
    fn sample_probit_latent_variables(&mut self) {
        let Self {
            data,
            rng,
            total_fits,
            control,
            ..
        } = self;

        for i in 0..data.num_observations() {
            let mean = total_fits[i];
            let offset = data.offset.as_ref().map_or(0.0, |offset| offset[i]);

            let z = if !control.match_bayes_tree {
                if data.y[i] > 0.0 {
                    sampling::draw_lower_truncated_standard_normal(rng, mean, -offset)
                } else {
                    sampling::draw_upper_truncated_standard_normal(rng, mean, -offset)
                }
            } else {
                let mean = mean + offset;
                let u: f64 = rng.gen();
                if data.y[i] > 0.0 {
                    let probability = u + (1.0 - u) * sampling::standard_normal_cdf(-mean);
                    mean + sampling::standard_normal_quantile(probability)
                } else {
                    let probability = u + (1.0 - u) * sampling::standard_normal_cdf(mean);
                    mean - sampling::standard_normal_quantile(probability)
                }
            };
            data.y_scaled[i] = z;
        }
    }

    fn weighted_residual_sum_of_squares(&self) -> (f64, f64) {
        let mut sum = 0.0;
        match &self.data.weights {
            Some(weights) => {
                for i in 0..self.data.num_observations() {
                    let residual = self.data.y_scaled[i] - self.total_fits[i];
                    sum += weights[i] * residual * residual;
                }
            }
            None => {
                for i in 0..self.data.num_observations() {
                    let residual = self.data.y_scaled[i] - self.total_fits[i];
                    sum += residual * residual;
                }
            }
        }
        (self.data.total_effective_observations(), sum)
    }

    fn count_variable_uses(&self, counts: &mut [u32]) {
        counts.fill(0);
        for tree in &self.trees {
            tree.count_variable_uses(counts);
        }
    }

    /// De-scales the current fits and sigma into the results buffers.
    fn store_samples(&self, results: &mut Results, sample: usize, variable_counts: &[u32]) {
        let scale = self.data.scale;
        let num_test_observations = self.data.num_test_observations();

        if self.control.response_is_binary {
            if self.control.keep_training_fits {
                let out = results.training_sample_mut(sample);
                for (i, value) in out.iter_mut().enumerate() {
                    *value = self.total_fits[i]
                        + self.data.offset.as_ref().map_or(0.0, |offset| offset[i]);
                }
            }
            if num_test_observations > 0 {
                let out = results.test_sample_mut(sample);
                for (i, value) in out.iter_mut().enumerate() {
                    *value = self.total_test_fits[i]
                        + self
                            .data
                            .test_offset
                            .as_ref()
                            .map_or(0.0, |offset| offset[i]);
                }
            }
            results.sigma_samples[sample] = 1.0;
        } else {
            if self.control.keep_training_fits {
                let out = results.training_sample_mut(sample);
                for (i, value) in out.iter_mut().enumerate() {
                    *value = scale.range * (self.total_fits[i] + 0.5)
                        + scale.min
                        + self.data.offset.as_ref().map_or(0.0, |offset| offset[i]);
                }
            }
            if num_test_observations > 0 {
                let out = results.test_sample_mut(sample);
                for (i, value) in out.iter_mut().enumerate() {
                    *value = scale.range * (self.total_test_fits[i] + 0.5)
                        + scale.min
                        + self
                            .data
                            .test_offset
                            .as_ref()
                            .map_or(0.0, |offset| offset[i]);
                }
            }
            results.sigma_samples[sample] = self.sigma * scale.range;
        }

        let out = results.variable_counts_mut(sample);
        for (value, &count) in out.iter_mut().zip(variable_counts.iter()) {
            *value = f64::from(count);
        }
    }

    fn invoke_callback(&mut self, results: &Results, sample: usize, is_burning_in: bool) {
        let sigma = if self.control.response_is_binary {
            1.0
        } else {
            self.sigma * self.data.scale.range
        };
        let keep_training_fits = self.control.keep_training_fits;
        let num_test_observations = self.data.num_test_observations();

        if let Some(callback) = self.control.callback.as_mut() {
            let info = CallbackInfo {
                is_burning_in,
                training_sample: keep_training_fits.then(|| results.training_sample(sample)),
                test_sample: (num_test_observations > 0).then(|| results.test_sample(sample)),
                sigma,
            };
            callback(&info);
        }
    }

    /// Replaces the response, preserving the residual prior's and sigma's
    /// unscaled values across the rescale. Binary fits resample their
    /// latents around the current fits instead.
    pub fn set_response(&mut self, y: &[f64]) -> Result<(), BartError> {
        if y.len() != self.data.num_observations() {
            return Err(BartError::config("length of new y does not match old"));
        }

        if !self.control.response_is_binary {
            let range = self.data.scale.range;
            let sigma_unscaled = self.sigma * range;
            let prior_scale_unscaled = self.residual_variance_prior.scale() * range * range;

            self.data.y = Array1::from(y.to_vec());
            self.data.rescale_response();

            let new_range = self.data.scale.range;
            self.sigma = sigma_unscaled / new_range;
            self.residual_variance_prior
                .set_scale(prior_scale_unscaled / (new_range * new_range));
        } else {
            self.data.y = Array1::from(y.to_vec());
            self.sample_probit_latent_variables();
        }
        Ok(())
    }

    /// Replaces the offset, with the same unscaled-prior preservation as
    /// `set_response`.
    pub fn set_offset(&mut self, offset: Option<&[f64]>) -> Result<(), BartError> {
        if let Some(offset) = offset {
            if offset.len() != self.data.num_observations() {
                return Err(BartError::config(
                    "length of offset must equal length of y",
                ));
            }
        }

        if !self.control.response_is_binary {
            let range = self.data.scale.range;
            let sigma_unscaled = self.sigma * range;
            let prior_scale_unscaled = self.residual_variance_prior.scale() * range * range;

            self.data.offset = offset.map(|offset| Array1::from(offset.to_vec()));
            self.data.rescale_response();

            let new_range = self.data.scale.range;
            self.sigma = sigma_unscaled / new_range;
            self.residual_variance_prior
                .set_scale(prior_scale_unscaled / (new_range * new_range));
        } else {
            self.data.offset = offset.map(|offset| Array1::from(offset.to_vec()));
            self.sample_probit_latent_variables();
        }
        Ok(())
    }

    /// Replaces the whole predictor matrix. Returns Ok(false) and leaves
    /// the fit untouched when some existing split becomes infeasible under
    /// the new columns.
    pub fn set_predictor(&mut self, x: &Array2<f64>) -> Result<bool, BartError> {
        if x.nrows() != self.data.num_observations() || x.ncols() != self.data.num_predictors() {
            return Err(BartError::config(
                "dimensions of new predictor matrix do not match old",
            ));
        }
        let columns: Vec<usize> = (0..self.data.num_predictors()).collect();
        self.replace_predictor_columns(x, &columns)
    }

    /// Replaces a subset of predictor columns; `x` holds one column of
    /// length n per entry of `columns`.
    pub fn update_predictors(
        &mut self,
        x: &Array2<f64>,
        columns: &[usize],
    ) -> Result<bool, BartError> {
        if x.nrows() != self.data.num_observations() || x.ncols() != columns.len() {
            return Err(BartError::config(
                "dimensions of predictor update do not match its column set",
            ));
        }
        if columns
            .iter()
            .any(|&col| col >= self.data.num_predictors())
        {
            return Err(BartError::config("predictor column index out of range"));
        }
        self.replace_predictor_columns(x, columns)
    }

    fn replace_predictor_columns(
        &mut self,
        x: &Array2<f64>,
        columns: &[usize],
    ) -> Result<bool, BartError> {
        let old_x = self.data.x.clone();
        let old_xt = self.data.xt.clone();
        let old_cut_points = self.data.cut_points.clone();
        let old_num_categories = self.data.num_categories.clone();

        for (k, &col) in columns.iter().enumerate() {
            for i in 0..self.data.num_observations() {
                self.data.x[[i, col]] = x[[i, k]];
            }
        }
        self.data.rebuild_transpose();

        if let Err(error) =
            self.data
                .set_cut_points(columns, self.control.use_quantiles, false)
        {
            self.data.x = old_x;
            self.data.xt = old_xt;
            self.data.cut_points = old_cut_points;
            self.data.num_categories = old_num_categories;
            return Err(error);
        }

        let all_trees_are_valid = {
            let Self { trees, data, .. } = self;
            let mut valid = true;
            for tree in trees.iter_mut() {
                let root = tree.root();
                if !tree.update_memberships_below(root, data) {
                    valid = false;
                    break;
                }
            }
            valid
        };

        if !all_trees_are_valid {
            self.data.x = old_x;
            self.data.xt = old_xt;
            self.data.cut_points = old_cut_points;
            self.data.num_categories = old_num_categories;
            let Self { trees, data, .. } = self;
            for tree in trees.iter_mut() {
                let root = tree.root();
                let restored = tree.update_memberships_below(root, data);
                debug_assert!(restored, "old predictor must re-partition cleanly");
            }
            return Ok(false);
        }

        self.refresh_training_fits();
        Ok(true)
    }

    /// Rewrites every tree's fits from its current leaf parameters and the
    /// current partition; used after predictor replacement.
    fn refresh_training_fits(&mut self) {
        let Self {
            trees,
            tree_fits,
            total_fits,
            data,
            end_node_prior,
            ..
        } = self;
        let num_observations = data.num_observations();

        for (t, tree) in trees.iter().enumerate() {
            let fits = &mut tree_fits[t * num_observations..(t + 1) * num_observations];
            for i in 0..num_observations {
                total_fits[i] -= fits[i];
            }
            for leaf in tree.leaves() {
                let scratch = tree.node(leaf).scratch();
                for &i in tree.span(leaf) {
                    let i = i as usize;
                    fits[i] = end_node_prior.predict(scratch, data.xt_row(i));
                }
            }
            for i in 0..num_observations {
                total_fits[i] += fits[i];
            }
        }
    }

    /// Installs (or clears) the test predictors and refreshes the
    /// aggregated test fits. Clearing also clears the test offset.
    pub fn set_test_predictor(&mut self, x_test: Option<Array2<f64>>) -> Result<(), BartError> {
        match x_test {
            None => {
                self.data.x_test = None;
                self.data.test_offset = None;
                self.data.rebuild_test_transpose();
                self.total_test_fits.clear();
            }
            Some(x_test) => {
                if x_test.ncols() != self.data.num_predictors() {
                    return Err(BartError::config(
                        "number of columns of x.test and x must be equal",
                    ));
                }
                let num_test_observations = x_test.nrows();
                if self
                    .data
                    .test_offset
                    .as_ref()
                    .is_some_and(|offset| offset.len() != num_test_observations)
                {
                    self.data.test_offset = None;
                }
                self.data.x_test = Some(x_test);
                self.data.rebuild_test_transpose();
                self.total_test_fits.resize(num_test_observations, 0.0);
                self.update_test_fits();
            }
        }
        Ok(())
    }

    pub fn set_test_offset(&mut self, test_offset: Option<&[f64]>) -> Result<(), BartError> {
        if let Some(test_offset) = test_offset {
            if test_offset.len() != self.data.num_test_observations() {
                return Err(BartError::config(
                    "length of test offset must equal number of test observations",
                ));
            }
        }
        self.data.test_offset = test_offset.map(|offset| Array1::from(offset.to_vec()));
        Ok(())
    }

    /// Sets both test inputs in one call; the distinct entry points replace
    /// the original interface's invalid-address sentinel.
    pub fn set_test_predictor_and_offset(
        &mut self,
        x_test: Option<Array2<f64>>,
        test_offset: Option<&[f64]>,
    ) -> Result<(), BartError> {
        self.set_test_predictor(x_test)?;
        self.set_test_offset(test_offset)
    }

    fn update_test_fits(&mut self) {
        let Self {
            trees,
            total_test_fits,
            data,
            end_node_prior,
            ..
        } = self;

        total_test_fits.fill(0.0);
        for tree in trees.iter() {
            for i in 0..data.num_test_observations() {
                let row = data.xt_test_row(i);
                let leaf = tree.leaf_for_row(row, data);
                total_test_fits[i] += end_node_prior.predict(tree.node(leaf).scratch(), row);
            }
        }
    }

    /// Captures the sampler state for later restoration.
    pub fn create_state(&self) -> SamplerState {
        SamplerState {
            trees: self.trees.iter().map(Tree::to_state_string).collect(),
            tree_fits: self.tree_fits.clone(),
            total_fits: self.total_fits.clone(),
            total_test_fits: self.total_test_fits.clone(),
            sigma: self.sigma,
            residual_variance_scale: self.residual_variance_prior.scale(),
            rng_seed: self.rng.get_seed(),
            rng_word_pos: self.rng.get_word_pos(),
        }
    }

    /// Overwrites an existing snapshot with the current state.
    pub fn store_state(&self, state: &mut SamplerState) {
        *state = self.create_state();
    }

    /// Restores a snapshot taken from a fit with the same shape.
    pub fn restore_state(&mut self, state: &SamplerState) -> Result<(), BartError> {
        let num_observations = self.data.num_observations();
        if state.trees.len() != self.control.num_trees
            || state.tree_fits.len() != self.tree_fits.len()
            || state.total_fits.len() != num_observations
            || state.total_test_fits.len() != self.total_test_fits.len()
        {
            return Err(BartError::config(
                "sampler state dimensions do not match the fit",
            ));
        }

        let mut trees = Vec::with_capacity(state.trees.len());
        for encoded in &state.trees {
            trees.push(Tree::from_state_string(
                encoded,
                &self.data,
                num_observations,
            )?);
        }

        self.trees = trees;
        self.tree_fits.copy_from_slice(&state.tree_fits);
        self.total_fits.copy_from_slice(&state.total_fits);
        self.total_test_fits.copy_from_slice(&state.total_test_fits);
        self.sigma = state.sigma;
        self.residual_variance_prior
            .set_scale(state.residual_variance_scale);
        self.rng = ChaCha8Rng::from_seed(state.rng_seed);
        self.rng.set_word_pos(state.rng_word_pos);
        Ok(())
    }

    fn print_initial_summary(&self) {
        if self.control.response_is_binary {
            println!("\nRunning BART with binary y\n");
        } else {
            println!("\nRunning BART with numeric y\n");
        }
        println!("number of trees: {}", self.control.num_trees);

        println!("Prior:");
        match &self.model.end_node_prior {
            EndNodeModel::MeanNormal { k } => println!("\tend node - mean w/normal; k = {k}"),
            EndNodeModel::LinRegNormal { precisions } => println!(
                "\tend node - lin reg w/normal prior; sd[0] = {:.4}",
                (1.0 / precisions[0]).sqrt()
            ),
        }
        if !self.control.response_is_binary {
            println!(
                "\tsigma^2 prior: df = {}, quantile = {}",
                self.model.residual_variance_prior.df, self.model.residual_variance_prior.quantile
            );
        }
        println!(
            "\tpower and base for tree prior: {} {}",
            self.model.tree_prior.power, self.model.tree_prior.base
        );
        println!(
            "\tuse quantiles for rule cut points: {}",
            self.control.use_quantiles
        );

        println!("data:");
        println!(
            "\tnumber of training observations: {}",
            self.data.num_observations()
        );
        println!(
            "\tnumber of test observations: {}",
            self.data.num_test_observations()
        );
        println!(
            "\tnumber of explanatory variables: {}\n",
            self.data.num_predictors()
        );
        if self.data.weights.is_some() {
            println!("\tusing observation weights");
        }

        println!("\nCutoff rules c in x<=c vs x>c");
        println!("Number of cutoffs: (var: number of possible c):");
        for (j, cuts) in self.data.cut_points.iter().enumerate() {
            print!("({}: {}) ", j + 1, cuts.len());
            if (j + 1) % 5 == 0 {
                println!();
            }
        }
        println!();

        if self.control.print_cutoffs > 0 {
            println!("cutoffs:");
            for (j, cuts) in self.data.cut_points.iter().enumerate() {
                print!("x({}) cutoffs: ", j + 1);
                for (k, cut) in cuts.iter().take(self.control.print_cutoffs).enumerate() {
                    print!("{cut}");
                    if (k + 1) % 5 == 0 {
                        print!("\n\t");
                    } else {
                        print!(" ");
                    }
                }
                if cuts.len() > self.control.print_cutoffs {
                    print!("...");
                }
                println!();
            }
        }
    }

    fn print_terminal_summary(&self) {
        println!("total seconds in loop: {}", self.running_time);

        println!("\nTree sizes, last iteration:");
        for (t, tree) in self.trees.iter().enumerate() {
            print!("{} ", tree.num_leaves());
            if (t + 1) % 20 == 0 {
                println!();
            }
        }
        println!();

        let mut variable_counts = vec![0u32; self.data.num_predictors()];
        self.count_variable_uses(&mut variable_counts);
        println!("Variable Usage, last iteration (var:count):");
        for (j, count) in variable_counts.iter().enumerate() {
            print!("({}: {}) ", j + 1, count);
            if (j + 1) % 5 == 0 {
                println!();
            }
        }
        println!("\nDONE BART\n");
    }
}
