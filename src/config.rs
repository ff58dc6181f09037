//! Sampler configuration: control options, model options, and the training
//! data bundle, with the range validation applied before a fit is built.

use ndarray::{Array1, Array2};

use crate::data::VariableType;
use crate::error::BartError;

/// Structural move probabilities applied to each tree per iteration.
pub const DEFAULT_BIRTH_OR_DEATH_PROBABILITY: f64 = 0.5;
pub const DEFAULT_SWAP_PROBABILITY: f64 = 0.1;
pub const DEFAULT_CHANGE_PROBABILITY: f64 = 0.4;
/// Conditional on being inside a birth-or-death step.
pub const DEFAULT_BIRTH_PROBABILITY: f64 = 0.5;

pub const DEFAULT_NORMAL_PRIOR_K: f64 = 2.0;
pub const DEFAULT_CHISQ_PRIOR_DF: f64 = 3.0;
pub const DEFAULT_CHISQ_PRIOR_QUANTILE: f64 = 0.9;

pub const DEFAULT_TREE_PRIOR_BASE: f64 = 0.95;
pub const DEFAULT_TREE_PRIOR_POWER: f64 = 2.0;

/// Default per-column ceiling on the number of cut points.
pub const DEFAULT_MAX_NUM_CUTS: u32 = 100;

/// Read-only view of a stored sample handed to the iteration callback.
pub struct CallbackInfo<'a> {
    /// True while the major iteration count is still inside burn-in.
    pub is_burning_in: bool,
    /// De-scaled training fits for this sample, when kept.
    pub training_sample: Option<&'a [f64]>,
    /// De-scaled test fits for this sample, when test data is present.
    pub test_sample: Option<&'a [f64]>,
    /// Residual standard deviation in the original units.
    pub sigma: f64,
}

/// Invoked synchronously on the sampler thread after a sample is stored.
pub type SampleCallback = Box<dyn FnMut(&CallbackInfo<'_>)>;

/// Options governing the run itself rather than the statistical model.
pub struct Control {
    /// Treat y as binary and run the probit latent-variable scheme.
    pub response_is_binary: bool,
    /// Print initial/terminal summaries and iteration progress.
    pub verbose: bool,
    /// Store de-scaled training fits into the results.
    pub keep_training_fits: bool,
    /// Quantile-based cut points instead of uniformly spaced ones.
    pub use_quantiles: bool,
    /// Number of posterior samples to emit.
    pub num_samples: usize,
    /// Number of (major) iterations discarded before sampling.
    pub num_burn_in: usize,
    /// Number of trees in the ensemble.
    pub num_trees: usize,
    /// Worker threads for leaf reductions; 1 disables the pool.
    pub num_threads: usize,
    /// Only every thinning-rate-th iteration emits a sample.
    pub tree_thinning_rate: usize,
    /// Progress line cadence in major iterations when verbose.
    pub print_every: usize,
    /// How many cut points per variable to echo in the initial summary.
    pub print_cutoffs: usize,
    /// Use the BayesTree-compatible probit latent scheme.
    pub match_bayes_tree: bool,
    /// Seed for the sampler-owned generator.
    pub rng_seed: u64,
    /// Optional per-sample callback.
    pub callback: Option<SampleCallback>,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            response_is_binary: false,
            verbose: false,
            keep_training_fits: true,
            use_quantiles: false,
            num_samples: 800,
            num_burn_in: 100,
            num_trees: 75,
            num_threads: 1,
            tree_thinning_rate: 1,
            print_every: 100,
            print_cutoffs: 0,
            match_bayes_tree: false,
            rng_seed: 0,
            callback: None,
        }
    }
}

impl Control {
    pub(crate) fn validate(&self) -> Result<(), BartError> {
        if self.num_samples == 0 {
            return Err(BartError::config("number of samples must be positive"));
        }
        if self.num_trees == 0 {
            return Err(BartError::config("number of trees must be positive"));
        }
        if self.num_threads == 0 {
            return Err(BartError::config("number of threads must be positive"));
        }
        if self.tree_thinning_rate == 0 {
            return Err(BartError::config("tree thinning rate must be positive"));
        }
        if self.print_every == 0 {
            return Err(BartError::config("print every must be positive"));
        }
        Ok(())
    }
}

/// Depth-decay prior on tree growth: `P(split at depth d) = base / (1 + d)^power`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreePriorOptions {
    pub base: f64,
    pub power: f64,
}

impl Default for TreePriorOptions {
    fn default() -> Self {
        Self {
            base: DEFAULT_TREE_PRIOR_BASE,
            power: DEFAULT_TREE_PRIOR_POWER,
        }
    }
}

/// Which conjugate family sits in the leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum EndNodeModel {
    /// Constant leaf mean with a normal prior scaled by `k`.
    MeanNormal { k: f64 },
    /// Per-leaf linear regression; one prior precision per coefficient,
    /// intercept first (length p + 1).
    LinRegNormal { precisions: Vec<f64> },
}

/// Scaled-inverse-chi-squared prior on the residual variance, calibrated so
/// that `quantile` of the prior mass lies below the supplied sigma estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualVariancePriorOptions {
    pub df: f64,
    pub quantile: f64,
}

impl Default for ResidualVariancePriorOptions {
    fn default() -> Self {
        Self {
            df: DEFAULT_CHISQ_PRIOR_DF,
            quantile: DEFAULT_CHISQ_PRIOR_QUANTILE,
        }
    }
}

/// The statistical model: move probabilities and the three priors.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub birth_or_death_probability: f64,
    pub swap_probability: f64,
    pub change_probability: f64,
    pub birth_probability: f64,
    pub tree_prior: TreePriorOptions,
    pub end_node_prior: EndNodeModel,
    pub residual_variance_prior: ResidualVariancePriorOptions,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            birth_or_death_probability: DEFAULT_BIRTH_OR_DEATH_PROBABILITY,
            swap_probability: DEFAULT_SWAP_PROBABILITY,
            change_probability: DEFAULT_CHANGE_PROBABILITY,
            birth_probability: DEFAULT_BIRTH_PROBABILITY,
            tree_prior: TreePriorOptions::default(),
            end_node_prior: EndNodeModel::MeanNormal {
                k: DEFAULT_NORMAL_PRIOR_K,
            },
            residual_variance_prior: ResidualVariancePriorOptions::default(),
        }
    }
}

impl Model {
    pub(crate) fn validate(&self, num_predictors: usize) -> Result<(), BartError> {
        let p_bd = self.birth_or_death_probability;
        if !p_bd.is_finite() || p_bd <= 0.0 || p_bd > 1.0 {
            return Err(BartError::config(
                "probability of birth/death rule must be in (0, 1]",
            ));
        }
        if !self.swap_probability.is_finite()
            || self.swap_probability < 0.0
            || self.swap_probability >= 1.0
        {
            return Err(BartError::config(
                "probability of swap rule must be in [0, 1)",
            ));
        }
        if !self.change_probability.is_finite()
            || self.change_probability < 0.0
            || self.change_probability >= 1.0
        {
            return Err(BartError::config(
                "probability of change rule must be in [0, 1)",
            ));
        }
        let total = p_bd + self.swap_probability + self.change_probability;
        if (total - 1.0).abs() >= 1.0e-10 {
            return Err(BartError::config(
                "rule proposal probabilities must sum to 1.0",
            ));
        }
        if !self.birth_probability.is_finite()
            || self.birth_probability <= 0.0
            || self.birth_probability >= 1.0
        {
            return Err(BartError::config(
                "probability of birth in birth/death rule must be in (0, 1)",
            ));
        }
        if !self.tree_prior.base.is_finite()
            || self.tree_prior.base <= 0.0
            || self.tree_prior.base >= 1.0
        {
            return Err(BartError::config("tree prior base must be in (0, 1)"));
        }
        if !self.tree_prior.power.is_finite() || self.tree_prior.power <= 0.0 {
            return Err(BartError::config("tree prior power must be positive"));
        }
        match &self.end_node_prior {
            EndNodeModel::MeanNormal { k } => {
                if !k.is_finite() || *k <= 0.0 {
                    return Err(BartError::config("k must be positive"));
                }
            }
            EndNodeModel::LinRegNormal { precisions } => {
                if precisions.len() != num_predictors + 1 {
                    return Err(BartError::config(
                        "linear regression prior requires one precision per coefficient",
                    ));
                }
                if precisions.iter().any(|&tau| !tau.is_finite() || tau <= 0.0) {
                    return Err(BartError::config(
                        "linear regression prior precisions must be positive",
                    ));
                }
            }
        }
        let sigma_prior = &self.residual_variance_prior;
        if !sigma_prior.df.is_finite() || sigma_prior.df <= 0.0 {
            return Err(BartError::config(
                "sigma prior degrees of freedom must be positive",
            ));
        }
        if !sigma_prior.quantile.is_finite()
            || sigma_prior.quantile <= 0.0
            || sigma_prior.quantile >= 1.0
        {
            return Err(BartError::config("sigma prior quantile must be in (0, 1)"));
        }
        Ok(())
    }
}

/// Training inputs handed to `BartFit::new`.
pub struct Data {
    pub y: Array1<f64>,
    /// Predictor matrix of shape (n, p).
    pub x: Array2<f64>,
    pub variable_types: Vec<VariableType>,
    pub x_test: Option<Array2<f64>>,
    /// Strictly positive observation weights.
    pub weights: Option<Array1<f64>>,
    pub offset: Option<Array1<f64>>,
    pub test_offset: Option<Array1<f64>>,
    /// A-priori residual standard deviation guess used to calibrate the
    /// variance prior.
    pub sigma_estimate: f64,
    pub max_num_cuts: Vec<u32>,
}

impl Data {
    /// Bundles `y` and `x` with default settings: all columns ordinal,
    /// default cut ceiling, unit sigma estimate, no weights or offsets.
    pub fn new(y: Array1<f64>, x: Array2<f64>) -> Self {
        let num_predictors = x.ncols();
        Self {
            y,
            x,
            variable_types: vec![VariableType::Ordinal; num_predictors],
            x_test: None,
            weights: None,
            offset: None,
            test_offset: None,
            sigma_estimate: 1.0,
            max_num_cuts: vec![DEFAULT_MAX_NUM_CUTS; num_predictors],
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BartError> {
        let num_observations = self.y.len();
        if num_observations == 0 {
            return Err(BartError::config("length of y must be greater than 0"));
        }
        if self.x.nrows() != num_observations {
            return Err(BartError::config(
                "number of rows of x and length of y must be equal",
            ));
        }
        let num_predictors = self.x.ncols();
        if self.variable_types.len() != num_predictors {
            return Err(BartError::config(
                "length of variable types must equal number of columns in x",
            ));
        }
        if self.max_num_cuts.len() != num_predictors {
            return Err(BartError::config(
                "length of maximum number of cuts and the number of columns of x must be equal",
            ));
        }
        if let Some(x_test) = &self.x_test {
            if x_test.ncols() != num_predictors {
                return Err(BartError::config(
                    "number of columns of x.test and x must be equal",
                ));
            }
        }
        if let Some(weights) = &self.weights {
            if weights.len() != num_observations {
                return Err(BartError::config("length of weights must equal length of y"));
            }
            if weights.iter().any(|&w| !w.is_finite() || w <= 0.0) {
                return Err(BartError::config("weights must be strictly positive"));
            }
        }
        if let Some(offset) = &self.offset {
            if offset.len() != num_observations {
                return Err(BartError::config("length of offset must equal length of y"));
            }
        }
        if let Some(test_offset) = &self.test_offset {
            let num_test = self.x_test.as_ref().map_or(0, |x| x.nrows());
            if test_offset.len() != num_test {
                return Err(BartError::config(
                    "length of test offset must equal number of test observations",
                ));
            }
        }
        if !self.sigma_estimate.is_finite() || self.sigma_estimate <= 0.0 {
            return Err(BartError::config("sigma estimate must be positive"));
        }
        Ok(())
    }
}
