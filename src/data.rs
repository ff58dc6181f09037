//! Owned training data plus the derived quantities the sampler works on:
//! the scaled response, row-major predictor transposes, and per-variable
//! cut points or category counts.

use ndarray::{Array1, Array2};

use crate::config::Data;
use crate::error::BartError;

/// How a predictor column is interpreted when drawing split rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    /// Real-valued; splits compare against a cut point.
    Ordinal,
    /// Nonnegative integer codes; splits route a subset of codes left.
    Categorical,
}

/// Category masks are machine words, which bounds the code range.
pub const MAX_NUM_CATEGORIES: u32 = 64;

/// The affine map between the response and its internal [-0.5, 0.5] scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataScale {
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

/// Training and test inputs in the layout the sampler consumes.
///
/// `x` is kept column-accessible for cut-point construction while `xt`
/// holds each observation contiguously for tree descent. The scaled
/// response doubles as the probit latent vector when y is binary.
pub struct DataSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub weights: Option<Array1<f64>>,
    pub offset: Option<Array1<f64>>,
    pub variable_types: Vec<VariableType>,
    pub max_num_cuts: Vec<u32>,
    pub sigma_estimate: f64,

    pub x_test: Option<Array2<f64>>,
    pub test_offset: Option<Array1<f64>>,

    /// Observation-contiguous transpose of `x`: entry (i, j) at `i * p + j`.
    pub xt: Vec<f64>,
    /// Observation-contiguous transpose of `x_test`.
    pub xt_test: Vec<f64>,

    /// Scaled response, or the probit latents when y is binary.
    pub y_scaled: Vec<f64>,
    pub scale: DataScale,

    /// Sorted cut points per ordinal column; empty for categorical columns.
    pub cut_points: Vec<Vec<f64>>,
    /// Category count per categorical column; 0 for ordinal columns.
    pub num_categories: Vec<u32>,
}

impl DataSet {
    /// Builds the internal layout from validated user inputs. The scaled
    /// response of a binary fit is the latent initialization; the caller
    /// resamples it properly once total fits exist.
    pub fn prepare(
        data: Data,
        response_is_binary: bool,
        use_quantiles: bool,
        match_bayes_tree: bool,
    ) -> Result<Self, BartError> {
        let num_observations = data.y.len();
        let num_predictors = data.x.ncols();

        let mut prepared = Self {
            xt: vec![0.0; num_observations * num_predictors],
            xt_test: Vec::new(),
            y_scaled: vec![0.0; num_observations],
            scale: DataScale {
                min: 0.0,
                max: 0.0,
                range: 1.0,
            },
            cut_points: vec![Vec::new(); num_predictors],
            num_categories: vec![0; num_predictors],
            x: data.x,
            y: data.y,
            weights: data.weights,
            offset: data.offset,
            variable_types: data.variable_types,
            max_num_cuts: data.max_num_cuts,
            sigma_estimate: data.sigma_estimate,
            x_test: data.x_test,
            test_offset: data.test_offset,
        };

        prepared.rebuild_transpose();
        prepared.rebuild_test_transpose();

        if response_is_binary {
            prepared.initialize_latents(match_bayes_tree);
        } else {
            prepared.rescale_response();
        }

        let columns: Vec<usize> = (0..num_predictors).collect();
        prepared.set_cut_points(&columns, use_quantiles, true)?;

        Ok(prepared)
    }

    pub fn num_observations(&self) -> usize {
        self.y.len()
    }

    pub fn num_predictors(&self) -> usize {
        self.x.ncols()
    }

    pub fn num_test_observations(&self) -> usize {
        self.x_test.as_ref().map_or(0, |x| x.nrows())
    }

    /// One training observation's predictor row.
    pub fn xt_row(&self, i: usize) -> &[f64] {
        let p = self.num_predictors();
        &self.xt[i * p..(i + 1) * p]
    }

    /// One test observation's predictor row.
    pub fn xt_test_row(&self, i: usize) -> &[f64] {
        let p = self.num_predictors();
        &self.xt_test[i * p..(i + 1) * p]
    }

    /// Sum of weights, or the observation count without weights.
    pub fn total_effective_observations(&self) -> f64 {
        match &self.weights {
            Some(weights) => weights.sum(),
            None => self.num_observations() as f64,
        }
    }

    pub(crate) fn rebuild_transpose(&mut self) {
        let p = self.num_predictors();
        for (i, row) in self.x.rows().into_iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                self.xt[i * p + j] = value;
            }
        }
    }

    pub(crate) fn rebuild_test_transpose(&mut self) {
        match &self.x_test {
            Some(x_test) => {
                let p = self.num_predictors();
                self.xt_test.resize(x_test.nrows() * p, 0.0);
                for (i, row) in x_test.rows().into_iter().enumerate() {
                    for (j, &value) in row.iter().enumerate() {
                        self.xt_test[i * p + j] = value;
                    }
                }
            }
            None => self.xt_test.clear(),
        }
    }

    /// Recomputes the scale triple from `y - offset` and maps the response
    /// onto [-0.5, 0.5].
    pub(crate) fn rescale_response(&mut self) {
        for (i, &y_i) in self.y.iter().enumerate() {
            self.y_scaled[i] = y_i - self.offset.as_ref().map_or(0.0, |offset| offset[i]);
        }

        let mut min = self.y_scaled[0];
        let mut max = self.y_scaled[0];
        for &value in self.y_scaled.iter().skip(1) {
            if value < min {
                min = value;
            }
            if value > max {
                max = value;
            }
        }
        // a constant response still needs a usable scale
        let range = if max > min { max - min } else { 1.0 };
        self.scale = DataScale { min, max, range };

        for value in self.y_scaled.iter_mut() {
            *value = (*value - min) / range - 0.5;
        }
    }

    /// Initial probit latents: `z = 2y - 1 - offset`, with the BayesTree
    /// variant shifted to `2y - 2 - offset`. The scale triple is pinned so
    /// de-scaling is a no-op on the latent scale.
    pub(crate) fn initialize_latents(&mut self, match_bayes_tree: bool) {
        let base = if match_bayes_tree { -2.0 } else { -1.0 };
        for (i, &y_i) in self.y.iter().enumerate() {
            self.y_scaled[i] =
                base + 2.0 * y_i - self.offset.as_ref().map_or(0.0, |offset| offset[i]);
        }
        self.scale = if match_bayes_tree {
            DataScale {
                min: -2.0,
                max: 0.0,
                range: 2.0,
            }
        } else {
            DataScale {
                min: -1.0,
                max: 1.0,
                range: 2.0,
            }
        };
    }

    /// Installs cut points (ordinal) or category counts (categorical) for
    /// the given columns. After initialization, a replacement column may
    /// not induce fewer cut values than before; extra ones are ignored.
    pub(crate) fn set_cut_points(
        &mut self,
        columns: &[usize],
        use_quantiles: bool,
        initial: bool,
    ) -> Result<(), BartError> {
        for &col in columns {
            match self.variable_types[col] {
                VariableType::Ordinal => {
                    let column: Vec<f64> = self.x.column(col).to_vec();
                    let new_cuts = if use_quantiles {
                        cut_points_from_quantiles(&column, self.max_num_cuts[col])
                    } else {
                        cut_points_uniformly(&column, self.max_num_cuts[col])
                    };
                    if initial {
                        self.cut_points[col] = new_cuts;
                    } else {
                        let previous = self.cut_points[col].len();
                        if new_cuts.len() < previous {
                            return Err(BartError::Compatibility(format!(
                                "number of induced cut points in new predictor column {col} \
                                 less than previous: old splits would be invalid"
                            )));
                        }
                        self.cut_points[col] = new_cuts;
                        self.cut_points[col].truncate(previous);
                    }
                }
                VariableType::Categorical => {
                    let num_categories = count_categories(self.x.column(col).iter().copied(), col)?;
                    if !initial && num_categories < self.num_categories[col] {
                        return Err(BartError::Compatibility(format!(
                            "number of categories in new predictor column {col} less than \
                             previous: old splits would be invalid"
                        )));
                    }
                    if initial {
                        self.num_categories[col] = num_categories;
                    }
                }
            }
        }
        Ok(())
    }
}

fn count_categories(
    column: impl Iterator<Item = f64>,
    col: usize,
) -> Result<u32, BartError> {
    let mut max_code: i64 = -1;
    for value in column {
        let code = value as i64;
        if code < 0 || (value - code as f64) != 0.0 {
            return Err(BartError::config(format!(
                "categorical column {col} must hold nonnegative integer codes"
            )));
        }
        if code >= i64::from(MAX_NUM_CATEGORIES) {
            return Err(BartError::config(format!(
                "categorical column {col} exceeds {MAX_NUM_CATEGORIES} categories"
            )));
        }
        max_code = max_code.max(code);
    }
    Ok((max_code + 1) as u32)
}

/// Gap midpoints of the sorted distinct values when they fit under the
/// ceiling, otherwise midpoints at evenly spaced positions in the sorted
/// distinct-value array.
fn cut_points_from_quantiles(column: &[f64], max_num_cuts: u32) -> Vec<f64> {
    let mut sorted = column.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    let num_unique = sorted.len();
    if num_unique < 2 {
        return Vec::new();
    }

    let max_num_cuts = max_num_cuts as usize;
    let (num_cuts, step, offset) = if num_unique <= max_num_cuts + 1 {
        (num_unique - 1, 1, 0)
    } else {
        let step = num_unique / max_num_cuts;
        (max_num_cuts, step, step / 2)
    };

    (0..num_cuts)
        .map(|i| {
            let index = (i * step + offset).min(num_unique - 2);
            0.5 * (sorted[index] + sorted[index + 1])
        })
        .collect()
}

/// `max_num_cuts` evenly spaced interior points of the column's range.
fn cut_points_uniformly(column: &[f64], max_num_cuts: u32) -> Vec<f64> {
    let mut x_min = column[0];
    let mut x_max = column[0];
    for &value in column.iter().skip(1) {
        if value < x_min {
            x_min = value;
        }
        if value > x_max {
            x_max = value;
        }
    }
    if x_max == x_min {
        return Vec::new();
    }

    let num_cuts = max_num_cuts as usize;
    let increment = (x_max - x_min) / (num_cuts as f64 + 1.0);
    (0..num_cuts)
        .map(|i| x_min + (i as f64 + 1.0) * increment)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn quantile_cuts_are_gap_midpoints_when_few_unique_values() {
        let cuts = cut_points_from_quantiles(&[3.0, 1.0, 2.0, 2.0, 1.0], 10);
        assert_eq!(cuts, vec![1.5, 2.5]);
    }

    #[test]
    fn quantile_cuts_are_capped_and_spread() {
        let column: Vec<f64> = (0..20).map(f64::from).collect();
        let cuts = cut_points_from_quantiles(&column, 4);
        assert_eq!(cuts.len(), 4);
        // evenly spaced indices with a half-step offset: 2, 7, 12, 17
        assert_abs_diff_eq!(cuts[0], 2.5);
        assert_abs_diff_eq!(cuts[1], 7.5);
        assert_abs_diff_eq!(cuts[2], 12.5);
        assert_abs_diff_eq!(cuts[3], 17.5);
    }

    #[test]
    fn uniform_cuts_divide_the_range() {
        let cuts = cut_points_uniformly(&[0.0, 10.0, 5.0], 4);
        assert_eq!(cuts, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn constant_column_has_no_cuts() {
        assert!(cut_points_from_quantiles(&[2.0, 2.0, 2.0], 5).is_empty());
        assert!(cut_points_uniformly(&[2.0, 2.0, 2.0], 5).is_empty());
    }

    #[test]
    fn rescaled_response_spans_the_unit_interval() {
        let data = Data::new(array![1.0, 3.0, 2.0], array![[0.0], [1.0], [2.0]]);
        let prepared = DataSet::prepare(data, false, false, false).unwrap();

        assert_abs_diff_eq!(prepared.scale.min, 1.0);
        assert_abs_diff_eq!(prepared.scale.max, 3.0);
        assert_abs_diff_eq!(prepared.scale.range, 2.0);
        assert_abs_diff_eq!(prepared.y_scaled[0], -0.5);
        assert_abs_diff_eq!(prepared.y_scaled[1], 0.5);
        assert_abs_diff_eq!(prepared.y_scaled[2], 0.0);
    }

    #[test]
    fn binary_latents_start_at_plus_minus_one() {
        let data = Data::new(array![0.0, 1.0], array![[0.0], [1.0]]);
        let prepared = DataSet::prepare(data, true, false, false).unwrap();

        assert_abs_diff_eq!(prepared.y_scaled[0], -1.0);
        assert_abs_diff_eq!(prepared.y_scaled[1], 1.0);
        assert_abs_diff_eq!(prepared.scale.range, 2.0);
    }

    #[test]
    fn offsets_shift_the_scaled_response() {
        let mut data = Data::new(array![1.0, 3.0], array![[0.0], [1.0]]);
        data.offset = Some(array![1.0, 1.0]);
        let prepared = DataSet::prepare(data, false, false, false).unwrap();

        assert_abs_diff_eq!(prepared.scale.min, 0.0);
        assert_abs_diff_eq!(prepared.scale.max, 2.0);
    }
}
