//! Alternating least squares for the PMF half of CDL.
//!
//! Each sweep solves one regularized normal-equation system per user, then
//! one per item, with the item systems anchored to the autoencoder's latent
//! prior Theta. Per-row solves are independent and run on the current rayon
//! pool; results are written back in row order so a sweep is deterministic.

use crate::config::PmfConfig;
use crate::error::{CdlError, FactorSide, Result};
use crate::models::{InteractionIndex, PmfOutcome};
use crate::utils::validation::validate_factor_matrix;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Relative likelihood change below which sweeps stop.
pub const CONVERGENCE_THRESHOLD: f64 = 1e-6;

/// Sweeps performed per call regardless of `max_iter`.
pub const MIN_SWEEPS: usize = 1;

/// Likelihood the first sweep of a fresh call is compared against (-e^20).
pub const INITIAL_LIKELIHOOD: f64 = -485_165_195.409_790_3;

#[derive(Debug, Clone)]
pub struct PmfSolver {
    a: f64,
    b: f64,
    lambda_u: f64,
    lambda_v: f64,
    max_iter: usize,
    verbose: bool,
}

impl PmfSolver {
    pub fn new(config: &PmfConfig, verbose: bool) -> Self {
        Self {
            a: config.a,
            b: config.b,
            lambda_u: config.lambda_u,
            lambda_v: config.lambda_v,
            max_iter: config.max_iter,
            verbose,
        }
    }

    /// Only the final epoch gets the full `max_iter` budget.
    pub fn sweep_limit(&self, epoch: usize, n_epochs: usize) -> usize {
        if epoch + 1 == n_epochs {
            self.max_iter
        } else {
            1
        }
    }

    /// Sweeps until the likelihood settles or `max_sweeps` is reached,
    /// always performing at least one sweep.
    pub fn estimate(
        &self,
        user_factors: &mut DMatrix<f64>,
        item_factors: &mut DMatrix<f64>,
        theta: &DMatrix<f64>,
        index: &InteractionIndex,
        max_sweeps: usize,
    ) -> Result<PmfOutcome> {
        self.estimate_from(user_factors, item_factors, theta, index, max_sweeps, INITIAL_LIKELIHOOD)
    }

    /// Same as [`estimate`](Self::estimate), but the first sweep is compared
    /// against `previous_likelihood`, e.g. the outcome of an earlier call.
    /// A drop is logged as a warning and never aborts the call.
    pub fn estimate_from(
        &self,
        user_factors: &mut DMatrix<f64>,
        item_factors: &mut DMatrix<f64>,
        theta: &DMatrix<f64>,
        index: &InteractionIndex,
        max_sweeps: usize,
        previous_likelihood: f64,
    ) -> Result<PmfOutcome> {
        let k = item_factors.ncols();
        validate_factor_matrix("user factors", user_factors, index.num_users(), k)?;
        validate_factor_matrix("item factors", item_factors, index.num_items(), k)?;
        validate_factor_matrix("theta", theta, index.num_items(), k)?;

        let mut likelihood = previous_likelihood;
        let mut converge = 1.0;
        let mut sweeps = 0;

        while (sweeps < max_sweeps && converge > CONVERGENCE_THRESHOLD) || sweeps < MIN_SWEEPS {
            let previous = likelihood;
            likelihood = self.update_users(user_factors, item_factors, index)?;
            likelihood += self.update_items(user_factors, item_factors, theta, index)?;
            sweeps += 1;
            converge = relative_change(likelihood, previous);

            if likelihood < previous {
                warn!(
                    sweep = sweeps,
                    likelihood, previous, "likelihood is decreasing"
                );
            }

            if self.verbose {
                info!(
                    "[iter={:04}], likelihood={:.5}, converge={:.10}",
                    sweeps, likelihood, converge
                );
            } else {
                debug!(sweep = sweeps, likelihood, converge, "pmf sweep");
            }
        }

        Ok(PmfOutcome {
            likelihood,
            sweeps,
            converge,
        })
    }

    /// Solves every user row with at least one interaction against the
    /// current item factors. Returns the users' prior log-likelihood.
    pub fn update_users(
        &self,
        user_factors: &mut DMatrix<f64>,
        item_factors: &DMatrix<f64>,
        index: &InteractionIndex,
    ) -> Result<f64> {
        let k = item_factors.ncols();
        let rated: Vec<usize> = (0..index.num_items())
            .filter(|&j| !index.users_of(j).is_empty())
            .collect();
        let rated_factors = item_factors.select_rows(rated.iter());
        let base = rated_factors.tr_mul(&rated_factors) * self.b + DMatrix::<f64>::identity(k, k) * self.lambda_u;
        let a_minus_b = self.a - self.b;

        let solved = (0..index.num_users())
            .into_par_iter()
            .map(|i| {
                let item_ids = index.items_of(i);
                if item_ids.is_empty() {
                    return Ok(None);
                }
                let v_i = item_factors.select_rows(item_ids.iter());
                let system = &base + v_i.tr_mul(&v_i) * a_minus_b;
                let rhs = v_i.row_sum().transpose() * self.a;
                solve_spd(system, rhs, FactorSide::User, i).map(Some)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut likelihood = 0.0;
        for (i, row) in solved.into_iter().enumerate() {
            if let Some(u_i) = row {
                likelihood += -0.5 * self.lambda_u * u_i.norm_squared();
                user_factors.set_row(i, &u_i.transpose());
            }
        }
        Ok(likelihood)
    }

    /// Solves every item row against the updated user factors and Theta.
    /// Items nobody interacted with collapse onto their Theta row.
    pub fn update_items(
        &self,
        user_factors: &DMatrix<f64>,
        item_factors: &mut DMatrix<f64>,
        theta: &DMatrix<f64>,
        index: &InteractionIndex,
    ) -> Result<f64> {
        let k = user_factors.ncols();
        let active: Vec<usize> = (0..index.num_users())
            .filter(|&i| !index.items_of(i).is_empty())
            .collect();
        let active_factors = user_factors.select_rows(active.iter());
        let base = active_factors.tr_mul(&active_factors) * self.b;
        let ridge = DMatrix::<f64>::identity(k, k) * self.lambda_v;
        let a_minus_b = self.a - self.b;

        let solved = (0..index.num_items())
            .into_par_iter()
            .map(|j| {
                let theta_j: DVector<f64> = theta.row(j).transpose();
                let user_ids = index.users_of(j);
                if user_ids.is_empty() {
                    // system is lambda_v * I, right-hand side lambda_v * theta_j
                    return Ok((theta_j, 0.0));
                }

                let u_j = user_factors.select_rows(user_ids.iter());
                let confidence = &base + u_j.tr_mul(&u_j) * a_minus_b;
                let system = &confidence + &ridge;
                let rhs = u_j.row_sum().transpose() * self.a + &theta_j * self.lambda_v;
                let v_j = solve_spd(system, rhs, FactorSide::Item, j)?;

                let m = user_ids.len() as f64;
                let mut likelihood = -0.5 * m * self.a;
                likelihood += self.a * (&u_j * &v_j).sum();
                likelihood += -0.5 * v_j.dot(&(&confidence * &v_j));
                let ep = &v_j - &theta_j;
                likelihood += -0.5 * self.lambda_v * ep.norm_squared();
                Ok((v_j, likelihood))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut likelihood = 0.0;
        for (j, (v_j, contribution)) in solved.into_iter().enumerate() {
            likelihood += contribution;
            item_factors.set_row(j, &v_j.transpose());
        }
        Ok(likelihood)
    }

    /// Joint log-likelihood of the given factors under the same bookkeeping
    /// a sweep uses, without updating anything.
    pub fn log_likelihood(
        &self,
        user_factors: &DMatrix<f64>,
        item_factors: &DMatrix<f64>,
        theta: &DMatrix<f64>,
        index: &InteractionIndex,
    ) -> f64 {
        let mut likelihood = 0.0;
        for i in 0..index.num_users() {
            if !index.items_of(i).is_empty() {
                likelihood += -0.5 * self.lambda_u * user_factors.row(i).norm_squared();
            }
        }

        let active: Vec<usize> = (0..index.num_users())
            .filter(|&i| !index.items_of(i).is_empty())
            .collect();
        let active_factors = user_factors.select_rows(active.iter());
        let base = active_factors.tr_mul(&active_factors) * self.b;

        for j in 0..index.num_items() {
            let v_j: DVector<f64> = item_factors.row(j).transpose();
            let theta_j: DVector<f64> = theta.row(j).transpose();
            let user_ids = index.users_of(j);
            if !user_ids.is_empty() {
                let u_j = user_factors.select_rows(user_ids.iter());
                let confidence = &base + u_j.tr_mul(&u_j) * (self.a - self.b);
                likelihood += -0.5 * user_ids.len() as f64 * self.a;
                likelihood += self.a * (&u_j * &v_j).sum();
                likelihood += -0.5 * v_j.dot(&(&confidence * &v_j));
            }
            likelihood += -0.5 * self.lambda_v * (&v_j - &theta_j).norm_squared();
        }
        likelihood
    }
}

/// Cholesky solve of a symmetric system; a matrix that is not positive
/// definite is reported rather than producing a degenerate row.
fn solve_spd(system: DMatrix<f64>, rhs: DVector<f64>, side: FactorSide, index: usize) -> Result<DVector<f64>> {
    let cholesky = system
        .cholesky()
        .ok_or(CdlError::NumericalSingularity { side, index })?;
    let solution = cholesky.solve(&rhs);
    if solution.iter().any(|x| !x.is_finite()) {
        return Err(CdlError::NumericalSingularity { side, index });
    }
    Ok(solution)
}

fn relative_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((current - previous) / previous).abs()
    }
}
