use crate::algorithms::autoencoder::{Autoencoder, LossBreakdown};
use crate::algorithms::optimizer::Adam;
use crate::algorithms::sampler::BatchSampler;
use crate::algorithms::NoiseSpec;
use crate::config::TrainingConfig;
use crate::error::{CdlError, Result};
use crate::utils::gather_rows;
use nalgebra::DMatrix;
use ndarray::Array2;
use rand::Rng;
use tracing::{debug, info};

/// Mini-batch Adam training of the autoencoder against the current item factors.
#[derive(Debug, Clone)]
pub struct AutoencoderTrainer {
    optimizer: Adam,
    noise: NoiseSpec,
    keep_prob: f32,
    batch_size: usize,
    print_step: usize,
    verbose: bool,
}

impl AutoencoderTrainer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            optimizer: Adam::with_learning_rate(config.learning_rate),
            noise: config.noise,
            keep_prob: config.keep_prob,
            batch_size: config.batch_size,
            print_step: config.print_step.max(1),
            verbose: config.verbose,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs `num_iter` denoising steps and returns the last batch's losses,
    /// or `None` when `num_iter` is zero. `item_factors` is only read.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        model: &mut Autoencoder,
        content: &Array2<f32>,
        item_factors: &DMatrix<f64>,
        sampler: &mut dyn BatchSampler,
        num_iter: usize,
        rng: &mut R,
    ) -> Result<Option<LossBreakdown>> {
        if item_factors.nrows() != content.nrows() {
            return Err(CdlError::shape(
                "item factor rows",
                content.nrows(),
                item_factors.nrows(),
            ));
        }

        let mut last = None;
        for i in 0..num_iter {
            let (clean, ids) = sampler.get_batch(content, self.batch_size);
            let corrupted = self.noise.corrupt(&clean, rng);
            let target = gather_rows(item_factors, &ids);

            let step = model.forward_train(&corrupted, &clean, &target, self.keep_prob, rng)?;
            model.apply_gradients(&mut self.optimizer, &step.gradients);

            let loss = step.loss;
            if i % self.print_step == 0 {
                if self.verbose {
                    info!(
                        "Iter: {:04} loss={:.5} genloss={:.5} vloss={:.5}",
                        i + 1,
                        loss.total,
                        loss.reconstruction,
                        loss.alignment
                    );
                } else {
                    debug!(iter = i + 1, loss = loss.total, "autoencoder step");
                }
            }
            last = Some(loss);
        }

        Ok(last)
    }
}
