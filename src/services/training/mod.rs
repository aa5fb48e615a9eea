use crate::algorithms::initializer::normal_matrix;
use crate::algorithms::{Autoencoder, AutoencoderTrainer, BatchSampler, LossBreakdown, PmfSolver};
use crate::config::Config;
use crate::error::{CdlError, Result};
use crate::models::{EpochReport, InteractionIndex, PmfOutcome, TrainingPhase, TrainingReport};
use crate::services::persistence::ModelStore;
use crate::utils::metrics::{RecallEvaluator, RecallReport};
use crate::utils::validation::validate_content_matrix;
use crate::utils::{array_to_dmatrix, top_k_indices};
use nalgebra::DMatrix;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Standard deviation of the random initial U, V and Theta.
const INIT_STD: f64 = 0.1;

/// Drives CDL training: autoencoder epochs alternated with PMF sweeps.
///
/// Owns the autoencoder and the three factor matrices. U and V are only
/// written by the PMF solver; Theta is only ever replaced wholesale by a
/// fresh encode of the full content matrix.
pub struct TrainingService {
    config: Arc<Config>,
    autoencoder: Autoencoder,
    trainer: AutoencoderTrainer,
    solver: PmfSolver,
    user_factors: DMatrix<f64>,
    item_factors: DMatrix<f64>,
    theta: DMatrix<f64>,
    phase: TrainingPhase,
    rng: StdRng,
    pool: rayon::ThreadPool,
}

impl TrainingService {
    pub fn new(config: Arc<Config>, num_users: usize, num_items: usize) -> Result<Self> {
        config.validate()?;

        let mut rng = StdRng::seed_from_u64(config.training.seed);
        let k = config.model.num_factors;
        let user_factors = normal_matrix(num_users, k, INIT_STD, &mut rng);
        let item_factors = normal_matrix(num_items, k, INIT_STD, &mut rng);
        let theta = normal_matrix(num_items, k, INIT_STD, &mut rng);

        let autoencoder = Autoencoder::from_config(&config, &mut rng);
        let trainer = AutoencoderTrainer::new(&config.training);
        let solver = PmfSolver::new(&config.pmf, config.training.verbose);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.compute.num_threads)
            .build()?;

        info!(
            "CDL model initialized: {} users, {} items, {} factors, input_dim={}, hidden_dim={}",
            num_users, num_items, k, config.model.input_dim, config.model.hidden_dim
        );

        Ok(Self {
            config,
            autoencoder,
            trainer,
            solver,
            user_factors,
            item_factors,
            theta,
            phase: TrainingPhase::Init,
            rng,
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn autoencoder(&self) -> &Autoencoder {
        &self.autoencoder
    }

    pub fn user_factors(&self) -> &DMatrix<f64> {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &DMatrix<f64> {
        &self.item_factors
    }

    pub fn theta(&self) -> &DMatrix<f64> {
        &self.theta
    }

    fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    fn enter(&mut self, phase: TrainingPhase) {
        debug!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }

    /// Latent codes of every content row, all units kept.
    pub fn transform(&self, content: &Array2<f32>) -> Result<DMatrix<f64>> {
        let codes = self.autoencoder.encode(content)?;
        Ok(array_to_dmatrix(&codes))
    }

    /// Runs `num_iter` autoencoder steps against the current item factors.
    pub fn cdl_estimate(
        &mut self,
        content: &Array2<f32>,
        sampler: &mut dyn BatchSampler,
        num_iter: usize,
    ) -> Result<Option<LossBreakdown>> {
        self.trainer.fit(
            &mut self.autoencoder,
            content,
            &self.item_factors,
            sampler,
            num_iter,
            &mut self.rng,
        )
    }

    /// One PMF solver call for `epoch`, on the configured thread pool.
    pub fn pmf_estimate(&mut self, index: &InteractionIndex, epoch: usize) -> Result<PmfOutcome> {
        let max_sweeps = self.solver.sweep_limit(epoch, self.config.training.n_epochs);
        let solver = &self.solver;
        let user_factors = &mut self.user_factors;
        let item_factors = &mut self.item_factors;
        let theta = &self.theta;
        self.pool
            .install(|| solver.estimate(user_factors, item_factors, theta, index, max_sweeps))
    }

    fn check_inputs(&self, content: &Array2<f32>, index: &InteractionIndex) -> Result<()> {
        validate_content_matrix(content, self.config.model.input_dim)?;
        if content.nrows() != self.num_items() {
            return Err(CdlError::shape("content matrix rows", self.num_items(), content.nrows()));
        }
        if index.num_items() != self.num_items() {
            return Err(CdlError::shape("interaction item count", self.num_items(), index.num_items()));
        }
        if index.num_users() != self.num_users() {
            return Err(CdlError::shape("interaction user count", self.num_users(), index.num_users()));
        }
        Ok(())
    }

    /// Full training session: initial encode, then `n_epochs` rounds of
    /// autoencoder training, re-encode and PMF sweeps. The initial encode
    /// replaces V and Theta, so after `load_model` only the weights and U
    /// carry into the session.
    pub fn run(
        &mut self,
        content: &Array2<f32>,
        index: &InteractionIndex,
        sampler: &mut dyn BatchSampler,
    ) -> Result<TrainingReport> {
        self.check_inputs(content, index)?;
        self.enter(TrainingPhase::Init);

        self.theta = self.transform(content)?;
        self.item_factors = self.theta.clone();

        let n = content.nrows();
        let n_epochs = self.config.training.n_epochs;
        let lambda_r = self.config.pmf.lambda_r;
        let mut report = TrainingReport::default();

        for epoch in 0..n_epochs {
            self.enter(TrainingPhase::AutoencoderPhase);
            let num_iter = n / self.trainer.batch_size();
            let gen_loss = match self.cdl_estimate(content, sampler, num_iter)? {
                Some(loss) => loss.reconstruction as f64,
                None => {
                    debug!(epoch, "fewer items than one batch, autoencoder step skipped");
                    0.0
                }
            };
            self.theta = self.transform(content)?;

            self.enter(TrainingPhase::PmfPhase);
            let outcome = self.pmf_estimate(index, epoch)?;

            let loss = -outcome.likelihood + 0.5 * gen_loss * n as f64 * lambda_r;
            info!(
                "[#epoch={:06}], loss={:.5}, neg_likelihood={:.5}, gen_loss={:.5}",
                epoch, loss, -outcome.likelihood, gen_loss
            );
            report.epochs.push(EpochReport {
                epoch,
                loss,
                neg_likelihood: -outcome.likelihood,
                gen_loss,
                sweeps: outcome.sweeps,
            });
            self.enter(TrainingPhase::EpochDone);
        }

        Ok(report)
    }

    pub fn predict(&self, user: usize, item: usize) -> Result<f64> {
        if user >= self.num_users() || item >= self.num_items() {
            return Err(CdlError::shape(
                "prediction index",
                (self.num_users(), self.num_items()),
                (user, item),
            ));
        }
        Ok(self.user_factors.row(user).dot(&self.item_factors.row(item)))
    }

    /// Top `k` items for `user` by `u_i . v_j`, skipping `exclude`.
    /// Excluded ids that are out of range or repeated are ignored.
    pub fn recommend(&self, user: usize, k: usize, exclude: &[usize]) -> Result<Vec<usize>> {
        if user >= self.num_users() {
            return Err(CdlError::shape("user index", self.num_users(), user));
        }
        let excluded: HashSet<usize> = exclude.iter().copied().collect();
        let scores: Vec<f64> = (&self.item_factors * self.user_factors.row(user).transpose())
            .iter()
            .copied()
            .collect();
        Ok(top_k_indices(&scores, scores.len())
            .into_iter()
            .filter(|item| !excluded.contains(item))
            .take(k)
            .collect())
    }

    pub fn evaluate(&self, train: &InteractionIndex, test_users: &[Vec<usize>]) -> RecallReport {
        RecallEvaluator::new(self.config.evaluation.top_m).evaluate(
            &self.user_factors,
            &self.item_factors,
            train.users(),
            test_users,
        )
    }

    pub fn save_model(&self, weight_path: &str, pmf_path: Option<&str>) -> Result<()> {
        ModelStore::save_weights(weight_path, &self.autoencoder)?;
        if let Some(path) = pmf_path {
            ModelStore::save_factors(path, &self.user_factors, &self.item_factors, &self.theta)?;
        }
        Ok(())
    }

    /// Restores weights and, when `pmf_path` is given, U, V and Theta.
    /// Either every snapshot loads and validates, or nothing is changed.
    pub fn load_model(&mut self, weight_path: &str, pmf_path: Option<&str>) -> Result<()> {
        let mut autoencoder = self.autoencoder.clone();
        ModelStore::load_weights(weight_path, &mut autoencoder)?;

        let factors = match pmf_path {
            Some(path) => {
                let k = self.config.model.num_factors;
                Some(ModelStore::load_factors(path, self.num_users(), self.num_items(), k)?)
            }
            None => None,
        };

        self.autoencoder = autoencoder;
        if let Some((u, v, theta)) = factors {
            self.user_factors = u;
            self.item_factors = v;
            self.theta = theta;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::RandomBatchSampler;
    use crate::services::dataset::Dataset;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.model.input_dim = 12;
        config.model.hidden_dim = 6;
        config.model.num_factors = 3;
        config.training.batch_size = 4;
        config.training.n_epochs = 2;
        config.training.verbose = false;
        config.compute.num_threads = 2;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = small_config();
        config.pmf.lambda_v = 0.0;
        assert!(TrainingService::new(Arc::new(config), 2, 2).is_err());
    }

    #[test]
    fn test_run_reports_every_epoch() {
        let dataset = Dataset::synthetic(5, 10, 12, 3, 4);
        let content = dataset.content_matrix().unwrap();
        let index = dataset.interaction_index().unwrap();
        let mut service = TrainingService::new(Arc::new(small_config()), 5, 10).unwrap();

        let report = service.run(&content, &index, &mut RandomBatchSampler::new(1)).unwrap();
        assert_eq!(report.epochs.len(), 2);
        assert_eq!(report.epochs[0].sweeps, 1);
        assert!(report.epochs.iter().all(|e| e.loss.is_finite()));
        assert_eq!(service.phase(), TrainingPhase::EpochDone);
        assert_eq!(service.theta().shape(), service.item_factors().shape());
    }

    #[test]
    fn test_run_rejects_wrong_content_width() {
        let mut service = TrainingService::new(Arc::new(small_config()), 2, 3).unwrap();
        let content = Array2::zeros((3, 11));
        let index = InteractionIndex::from_user_lists(vec![vec![0], vec![1]], 3).unwrap();
        let err = service
            .run(&content, &index, &mut RandomBatchSampler::new(0))
            .unwrap_err();
        assert!(matches!(err, CdlError::ShapeMismatch { .. }));
        assert_eq!(service.phase(), TrainingPhase::Init);
    }

    #[test]
    fn test_recommend_skips_excluded_items() {
        let service = TrainingService::new(Arc::new(small_config()), 2, 5).unwrap();
        let top = service.recommend(0, 5, &[1, 3]).unwrap();
        assert_eq!(top.len(), 3);
        assert!(!top.contains(&1) && !top.contains(&3));
        assert!(service.predict(0, 4).unwrap().is_finite());
        assert!(service.predict(2, 0).is_err());
    }

    #[test]
    fn test_recommend_ignores_unknown_and_repeated_exclusions() {
        let service = TrainingService::new(Arc::new(small_config()), 2, 5).unwrap();
        assert_eq!(service.recommend(0, 5, &[99]).unwrap().len(), 5);

        let top = service.recommend(0, 5, &[2, 2, 2]).unwrap();
        assert_eq!(top.len(), 4);
        assert!(!top.contains(&2));
    }

    #[test]
    fn test_failed_load_leaves_model_untouched() {
        let dir = std::env::temp_dir().join(format!("cdlrec-training-{}", std::process::id()));
        let weight_path = dir.join("weights.json").to_string_lossy().into_owned();
        let pmf_path = dir.join("factors.json").to_string_lossy().into_owned();

        let saved = TrainingService::new(Arc::new(small_config()), 3, 6).unwrap();
        saved.save_model(&weight_path, Some(&pmf_path)).unwrap();

        let mut config = small_config();
        config.training.seed = 42;
        let mut service = TrainingService::new(Arc::new(config), 4, 6).unwrap();
        let params_before = service.autoencoder().params().clone();
        let users_before = service.user_factors().clone();
        let items_before = service.item_factors().clone();

        let err = service.load_model(&weight_path, Some(&pmf_path)).unwrap_err();
        assert!(matches!(err, CdlError::ShapeMismatch { .. }));
        assert_eq!(service.autoencoder().params(), &params_before);
        assert_eq!(service.user_factors(), &users_before);
        assert_eq!(service.item_factors(), &items_before);
    }
}
