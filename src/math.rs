//! Numeric kernels shared by the leaf updates: mean and sum-of-squares
//! reductions over observation index sets, and the small dense linear
//! algebra backing the linear-regression end nodes.
//!
//! Reductions optionally dispatch across a rayon pool; each call reads a
//! shared slice and produces a single scalar, so workers never touch
//! shared mutable state.

use rayon::prelude::*;
use rayon::ThreadPool;

/// Below this many elements a parallel reduction costs more than it saves.
const MIN_PARALLEL_LEN: usize = 8192;

fn maybe_pool(pool: Option<&ThreadPool>, len: usize) -> Option<&ThreadPool> {
    match pool {
        Some(pool) if len >= MIN_PARALLEL_LEN => Some(pool),
        _ => None,
    }
}

/// Mean of `values`.
pub fn compute_mean(pool: Option<&ThreadPool>, values: &[f64]) -> f64 {
    let sum = match maybe_pool(pool, values.len()) {
        Some(pool) => pool.install(|| values.par_iter().sum::<f64>()),
        None => values.iter().sum::<f64>(),
    };
    sum / values.len() as f64
}

/// Mean of `values[indices]`.
pub fn compute_indexed_mean(pool: Option<&ThreadPool>, values: &[f64], indices: &[u32]) -> f64 {
    let sum = match maybe_pool(pool, indices.len()) {
        Some(pool) => pool.install(|| indices.par_iter().map(|&i| values[i as usize]).sum::<f64>()),
        None => indices.iter().map(|&i| values[i as usize]).sum::<f64>(),
    };
    sum / indices.len() as f64
}

/// Weighted mean of `values`; also returns the weight sum.
pub fn compute_weighted_mean(
    pool: Option<&ThreadPool>,
    values: &[f64],
    weights: &[f64],
) -> (f64, f64) {
    let (sum, weight_sum) = match maybe_pool(pool, values.len()) {
        Some(pool) => pool.install(|| {
            values
                .par_iter()
                .zip(weights.par_iter())
                .map(|(&v, &w)| (w * v, w))
                .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1))
        }),
        None => values
            .iter()
            .zip(weights.iter())
            .fold((0.0, 0.0), |acc, (&v, &w)| (acc.0 + w * v, acc.1 + w)),
    };
    (sum / weight_sum, weight_sum)
}

/// Weighted mean of `values[indices]`; also returns the weight sum.
pub fn compute_indexed_weighted_mean(
    pool: Option<&ThreadPool>,
    values: &[f64],
    indices: &[u32],
    weights: &[f64],
) -> (f64, f64) {
    let (sum, weight_sum) = match maybe_pool(pool, indices.len()) {
        Some(pool) => pool.install(|| {
            indices
                .par_iter()
                .map(|&i| {
                    let i = i as usize;
                    (weights[i] * values[i], weights[i])
                })
                .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1))
        }),
        None => indices.iter().fold((0.0, 0.0), |acc, &i| {
            let i = i as usize;
            (acc.0 + weights[i] * values[i], acc.1 + weights[i])
        }),
    };
    (sum / weight_sum, weight_sum)
}

/// Sum of squared deviations of `values` around a known mean.
pub fn compute_sum_of_squares(pool: Option<&ThreadPool>, values: &[f64], mean: f64) -> f64 {
    match maybe_pool(pool, values.len()) {
        Some(pool) => pool.install(|| {
            values
                .par_iter()
                .map(|&v| (v - mean) * (v - mean))
                .sum::<f64>()
        }),
        None => values.iter().map(|&v| (v - mean) * (v - mean)).sum(),
    }
}

/// Sum of squared deviations of `values[indices]` around a known mean.
pub fn compute_indexed_sum_of_squares(
    pool: Option<&ThreadPool>,
    values: &[f64],
    indices: &[u32],
    mean: f64,
) -> f64 {
    match maybe_pool(pool, indices.len()) {
        Some(pool) => pool.install(|| {
            indices
                .par_iter()
                .map(|&i| {
                    let dev = values[i as usize] - mean;
                    dev * dev
                })
                .sum::<f64>()
        }),
        None => indices
            .iter()
            .map(|&i| {
                let dev = values[i as usize] - mean;
                dev * dev
            })
            .sum(),
    }
}

/// Weighted sum of squared deviations around a known mean.
pub fn compute_weighted_sum_of_squares(
    pool: Option<&ThreadPool>,
    values: &[f64],
    weights: &[f64],
    mean: f64,
) -> f64 {
    match maybe_pool(pool, values.len()) {
        Some(pool) => pool.install(|| {
            values
                .par_iter()
                .zip(weights.par_iter())
                .map(|(&v, &w)| w * (v - mean) * (v - mean))
                .sum::<f64>()
        }),
        None => values
            .iter()
            .zip(weights.iter())
            .map(|(&v, &w)| w * (v - mean) * (v - mean))
            .sum(),
    }
}

/// Weighted sum of squared deviations of `values[indices]` around a known
/// mean.
pub fn compute_indexed_weighted_sum_of_squares(
    pool: Option<&ThreadPool>,
    values: &[f64],
    indices: &[u32],
    weights: &[f64],
    mean: f64,
) -> f64 {
    match maybe_pool(pool, indices.len()) {
        Some(pool) => pool.install(|| {
            indices
                .par_iter()
                .map(|&i| {
                    let i = i as usize;
                    let dev = values[i] - mean;
                    weights[i] * dev * dev
                })
                .sum::<f64>()
        }),
        None => indices
            .iter()
            .map(|&i| {
                let i = i as usize;
                let dev = values[i] - mean;
                weights[i] * dev * dev
            })
            .sum(),
    }
}

pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

// Dense kernels for the (p + 1)-dimensional leaf regressions. The design
// matrix is stored observation-contiguous: entry (row j, observation i)
// lives at xt[i * dim + j].

/// `out = X beta` where X has `out.len()` rows of length `dim`.
pub fn design_times_vector(xt: &[f64], dim: usize, beta: &[f64], out: &mut [f64]) {
    for (i, out_i) in out.iter_mut().enumerate() {
        *out_i = dot_product(&xt[i * dim..(i + 1) * dim], beta);
    }
}

/// `out = X' v` where X has `v.len()` rows of length `dim`.
pub fn design_transpose_times_vector(xt: &[f64], dim: usize, v: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for (i, &v_i) in v.iter().enumerate() {
        let row = &xt[i * dim..(i + 1) * dim];
        for (out_j, &x_ij) in out.iter_mut().zip(row.iter()) {
            *out_j += x_ij * v_i;
        }
    }
}

/// Upper triangle of `X'X` into `out` (row-major dim x dim); the strict
/// lower triangle is left untouched.
pub fn crossproduct_upper(xt: &[f64], dim: usize, num_observations: usize, out: &mut [f64]) {
    for row in 0..dim {
        for col in row..dim {
            out[row * dim + col] = 0.0;
        }
    }
    for i in 0..num_observations {
        let obs = &xt[i * dim..(i + 1) * dim];
        for row in 0..dim {
            for col in row..dim {
                out[row * dim + col] += obs[row] * obs[col];
            }
        }
    }
}

/// In-place upper-triangular Cholesky factorization of a symmetric
/// positive-definite matrix given by its upper triangle, so that on return
/// `R'R = A`. Returns false when a pivot fails to be positive.
pub fn cholesky_upper_in_place(a: &mut [f64], dim: usize) -> bool {
    for col in 0..dim {
        let mut pivot = a[col * dim + col];
        for row in 0..col {
            pivot -= a[row * dim + col] * a[row * dim + col];
        }
        if pivot <= 0.0 {
            return false;
        }
        let pivot = pivot.sqrt();
        a[col * dim + col] = pivot;

        for j in (col + 1)..dim {
            let mut value = a[col * dim + j];
            for row in 0..col {
                value -= a[row * dim + col] * a[row * dim + j];
            }
            a[col * dim + j] = value / pivot;
        }
    }
    true
}

/// Solves `R x = b` in place for upper-triangular R.
pub fn solve_upper_triangular(r: &[f64], dim: usize, x: &mut [f64]) {
    for row in (0..dim).rev() {
        let mut value = x[row];
        for col in (row + 1)..dim {
            value -= r[row * dim + col] * x[col];
        }
        x[row] = value / r[row * dim + row];
    }
}

/// Solves `R' x = b` in place for upper-triangular R.
pub fn solve_upper_triangular_transposed(r: &[f64], dim: usize, x: &mut [f64]) {
    for row in 0..dim {
        let mut value = x[row];
        for col in 0..row {
            value -= r[col * dim + row] * x[col];
        }
        x[row] = value / r[row * dim + row];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn indexed_weighted_mean_matches_direct_computation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let weights = [1.0, 2.0, 1.0, 2.0, 1.0];
        let indices = [0u32, 1, 3];

        let (mean, weight_sum) = compute_indexed_weighted_mean(None, &values, &indices, &weights);
        assert_abs_diff_eq!(weight_sum, 5.0);
        assert_abs_diff_eq!(mean, (1.0 + 4.0 + 8.0) / 5.0);
    }

    #[test]
    fn cholesky_reproduces_crossproduct() {
        // X is 3 observations of [1, x]
        let xt = [1.0, 0.5, 1.0, -1.0, 1.0, 2.0];
        let dim = 2;
        let mut a = vec![0.0; dim * dim];
        crossproduct_upper(&xt, dim, 3, &mut a);
        let expected = a.clone();

        assert!(cholesky_upper_in_place(&mut a, dim));

        for row in 0..dim {
            for col in row..dim {
                let mut value = 0.0;
                for k in 0..=row {
                    value += a[k * dim + row] * a[k * dim + col];
                }
                assert_abs_diff_eq!(value, expected[row * dim + col], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn triangular_solves_match_by_hand_solutions() {
        let r = [2.0, 1.0, 0.0, 3.0];
        let dim = 2;
        let b = [4.0, 9.0];

        let mut x = b;
        solve_upper_triangular_transposed(&r, dim, &mut x);
        assert_abs_diff_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 7.0 / 3.0, epsilon = 1e-12);

        let mut y = b;
        solve_upper_triangular(&r, dim, &mut y);
        assert_abs_diff_eq!(y[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y[0], 0.5, epsilon = 1e-12);
    }
}
