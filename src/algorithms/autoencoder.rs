use crate::algorithms::initializer::{self, xavier_uniform};
use crate::algorithms::optimizer::Optimizer;
use crate::algorithms::{Activation, LossType};
use crate::config::Config;
use crate::error::{CdlError, Result};
use crate::models::NamedTensor;
use crate::utils::{sigmoid, squared_norm};
use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, IxDyn, Zip};
use rand::Rng;

/// Scale of the weight penalty inside the total loss.
pub const REGULARIZATION_WEIGHT: f32 = 2e-4;

/// Floor applied to both log arguments of the cross-entropy loss.
pub const CROSS_ENTROPY_EPS: f32 = 1e-10;

/// Trainable tensors of the autoencoder.
///
/// The decoder's output projection is tied to the encoder's first layer:
/// it is read through [`AutoencoderParams::decoder_output_weights`] as a
/// transposed view, and its gradient is folded into `encoder_w1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoencoderParams {
    /// input_dim x hidden_dim
    pub encoder_w1: Array2<f32>,
    pub encoder_b1: Array1<f32>,
    /// hidden_dim x num_factors
    pub encoder_wz: Array2<f32>,
    pub encoder_bz: Array1<f32>,
    /// num_factors x hidden_dim
    pub decoder_w1: Array2<f32>,
    pub decoder_b1: Array1<f32>,
    pub decoder_bx: Array1<f32>,
}

/// Gradients share the parameter layout.
pub type AutoencoderGrads = AutoencoderParams;

impl AutoencoderParams {
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dim: usize,
        latent_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            encoder_w1: xavier_uniform(input_dim, hidden_dim, rng),
            encoder_b1: initializer::zeros(hidden_dim),
            encoder_wz: xavier_uniform(hidden_dim, latent_dim, rng),
            encoder_bz: initializer::zeros(latent_dim),
            decoder_w1: xavier_uniform(latent_dim, hidden_dim, rng),
            decoder_b1: initializer::zeros(hidden_dim),
            decoder_bx: initializer::zeros(input_dim),
        }
    }

    pub fn decoder_output_weights(&self) -> ArrayView2<'_, f32> {
        self.encoder_w1.t()
    }

    /// Sum of `||W||^2 / 2` over the encoder's first layer, the decoder's
    /// hidden layer and the tied output projection.
    pub fn regularization(&self) -> f32 {
        let w1 = squared_norm(&self.encoder_w1);
        0.5 * (w1 + squared_norm(&self.decoder_w1) + w1)
    }

    fn views(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("encoder.w1", self.encoder_w1.view().into_dyn()),
            ("encoder.b1", self.encoder_b1.view().into_dyn()),
            ("encoder.w_z", self.encoder_wz.view().into_dyn()),
            ("encoder.b_z", self.encoder_bz.view().into_dyn()),
            ("decoder.w1", self.decoder_w1.view().into_dyn()),
            ("decoder.b1", self.decoder_b1.view().into_dyn()),
            ("decoder.b_x", self.decoder_bx.view().into_dyn()),
        ]
    }

    fn views_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        vec![
            ("encoder.w1", self.encoder_w1.view_mut().into_dyn()),
            ("encoder.b1", self.encoder_b1.view_mut().into_dyn()),
            ("encoder.w_z", self.encoder_wz.view_mut().into_dyn()),
            ("encoder.b_z", self.encoder_bz.view_mut().into_dyn()),
            ("decoder.w1", self.decoder_w1.view_mut().into_dyn()),
            ("decoder.b1", self.decoder_b1.view_mut().into_dyn()),
            ("decoder.b_x", self.decoder_bx.view_mut().into_dyn()),
        ]
    }

    pub fn to_tensors(&self) -> Vec<NamedTensor> {
        self.views()
            .into_iter()
            .map(|(name, view)| NamedTensor {
                name: name.to_string(),
                shape: view.shape().to_vec(),
                data: view.iter().copied().collect(),
            })
            .collect()
    }

    /// Overwrites every tensor from `tensors`. Nothing is written unless
    /// all names and shapes match.
    pub fn load_tensors(&mut self, tensors: &[NamedTensor]) -> Result<()> {
        let mut sources = Vec::new();
        for (name, view) in self.views() {
            let tensor = tensors
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| CdlError::shape(format!("tensor {}", name), view.shape(), "missing"))?;
            let source = ArrayViewD::from_shape(IxDyn(&tensor.shape), &tensor.data)
                .map_err(|_| CdlError::shape(format!("tensor {} data", name), &tensor.shape, tensor.data.len()))?;
            if source.shape() != view.shape() {
                return Err(CdlError::shape(format!("tensor {}", name), view.shape(), source.shape()));
            }
            sources.push(source);
        }

        for ((_, mut target), source) in self.views_mut().into_iter().zip(sources) {
            target.assign(&source);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossBreakdown {
    pub total: f32,
    pub reconstruction: f32,
    pub alignment: f32,
    pub regularization: f32,
}

#[derive(Debug, Clone)]
pub struct TrainStep {
    pub loss: LossBreakdown,
    pub gradients: AutoencoderGrads,
}

/// Denoising autoencoder whose latent code is pulled toward the item factors.
#[derive(Debug, Clone)]
pub struct Autoencoder {
    input_dim: usize,
    hidden_dim: usize,
    latent_dim: usize,
    activation: Activation,
    loss_type: LossType,
    alignment_weight: f32,
    params: AutoencoderParams,
}

impl Autoencoder {
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dim: usize,
        latent_dim: usize,
        activation: Activation,
        loss_type: LossType,
        alignment_weight: f32,
        rng: &mut R,
    ) -> Self {
        let params = AutoencoderParams::new(input_dim, hidden_dim, latent_dim, rng);
        Self {
            input_dim,
            hidden_dim,
            latent_dim,
            activation,
            loss_type,
            alignment_weight,
            params,
        }
    }

    pub fn from_config<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Self {
        Self::new(
            config.model.input_dim,
            config.model.hidden_dim,
            config.model.num_factors,
            config.model.activation,
            config.model.loss_type,
            config.alignment_weight(),
            rng,
        )
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn loss_type(&self) -> LossType {
        self.loss_type
    }

    pub fn params(&self) -> &AutoencoderParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut AutoencoderParams {
        &mut self.params
    }

    fn check_width(&self, what: &str, batch: &Array2<f32>, width: usize) -> Result<()> {
        if batch.ncols() != width {
            return Err(CdlError::shape(what, width, batch.ncols()));
        }
        Ok(())
    }

    /// Latent code of every row, with all units kept.
    pub fn encode(&self, batch: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_width("encode input width", batch, self.input_dim)?;
        let p = &self.params;

        let mut hidden = batch.dot(&p.encoder_w1);
        hidden += &p.encoder_b1;
        let hidden = self.activation.apply(&hidden);

        let mut z = hidden.dot(&p.encoder_wz);
        z += &p.encoder_bz;
        Ok(z)
    }

    /// Loss of one denoising step and the gradients of the total loss with
    /// respect to every parameter.
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        corrupted: &Array2<f32>,
        clean: &Array2<f32>,
        target: &Array2<f32>,
        keep_prob: f32,
        rng: &mut R,
    ) -> Result<TrainStep> {
        self.check_width("corrupted batch width", corrupted, self.input_dim)?;
        if clean.dim() != corrupted.dim() {
            return Err(CdlError::shape("clean batch", corrupted.dim(), clean.dim()));
        }
        if target.dim() != (corrupted.nrows(), self.latent_dim) {
            return Err(CdlError::shape(
                "target latent batch",
                (corrupted.nrows(), self.latent_dim),
                target.dim(),
            ));
        }

        let p = &self.params;
        let act = self.activation;
        let batch = corrupted.nrows() as f32;

        // encoder
        let mut a1 = corrupted.dot(&p.encoder_w1);
        a1 += &p.encoder_b1;
        let h1 = act.apply(&a1);
        let mask1 = dropout_mask(h1.dim(), keep_prob, rng);
        let d1 = apply_mask(&h1, mask1.as_ref());

        let mut z = d1.dot(&p.encoder_wz);
        z += &p.encoder_bz;
        let mask_z = dropout_mask(z.dim(), keep_prob, rng);
        let dz = apply_mask(&z, mask_z.as_ref());

        // decoder
        let mut a2 = dz.dot(&p.decoder_w1);
        a2 += &p.decoder_b1;
        let h2 = act.apply(&a2);
        let mask2 = dropout_mask(h2.dim(), keep_prob, rng);
        let d2 = apply_mask(&h2, mask2.as_ref());

        let mut recon = d2.dot(&p.decoder_output_weights());
        recon += &p.decoder_bx;

        let (reconstruction, grad_recon) = match self.loss_type {
            LossType::MeanSquaredError => mean_squared_error(&recon, clean),
            LossType::CrossEntropy => sigmoid_cross_entropy(&recon, clean),
        };

        let diff_z = &z - target;
        let alignment = self.alignment_weight * squared_norm(&diff_z) / batch;
        let grad_alignment = diff_z * (2.0 * self.alignment_weight / batch);

        let regularization = p.regularization();
        let total = reconstruction + alignment + REGULARIZATION_WEIGHT * regularization;

        // backward through the tied output projection
        let decoder_bx = grad_recon.sum_axis(Axis(0));
        let mut encoder_w1 = grad_recon.t().dot(&d2);
        let grad_d2 = grad_recon.dot(&p.encoder_w1);
        let grad_a2 = act.backward(&a2, &h2, &apply_mask(&grad_d2, mask2.as_ref()));

        let mut decoder_w1 = dz.t().dot(&grad_a2);
        let decoder_b1 = grad_a2.sum_axis(Axis(0));
        let grad_dz = grad_a2.dot(&p.decoder_w1.t());

        let mut grad_z = apply_mask(&grad_dz, mask_z.as_ref());
        grad_z += &grad_alignment;
        let encoder_wz = d1.t().dot(&grad_z);
        let encoder_bz = grad_z.sum_axis(Axis(0));

        let grad_d1 = grad_z.dot(&p.encoder_wz.t());
        let grad_a1 = act.backward(&a1, &h1, &apply_mask(&grad_d1, mask1.as_ref()));
        encoder_w1 += &corrupted.t().dot(&grad_a1);
        let encoder_b1 = grad_a1.sum_axis(Axis(0));

        // encoder_w1 is penalized twice: once directly, once as the tied view
        encoder_w1.scaled_add(2.0 * REGULARIZATION_WEIGHT, &p.encoder_w1);
        decoder_w1.scaled_add(REGULARIZATION_WEIGHT, &p.decoder_w1);

        Ok(TrainStep {
            loss: LossBreakdown {
                total,
                reconstruction,
                alignment,
                regularization,
            },
            gradients: AutoencoderGrads {
                encoder_w1,
                encoder_b1,
                encoder_wz,
                encoder_bz,
                decoder_w1,
                decoder_b1,
                decoder_bx,
            },
        })
    }

    /// One optimizer step on every owned tensor.
    pub fn apply_gradients<O: Optimizer>(&mut self, optimizer: &mut O, grads: &AutoencoderGrads) {
        let p = &mut self.params;
        optimizer.update("encoder.w1", &mut p.encoder_w1, &grads.encoder_w1);
        optimizer.update("encoder.b1", &mut p.encoder_b1, &grads.encoder_b1);
        optimizer.update("encoder.w_z", &mut p.encoder_wz, &grads.encoder_wz);
        optimizer.update("encoder.b_z", &mut p.encoder_bz, &grads.encoder_bz);
        optimizer.update("decoder.w1", &mut p.decoder_w1, &grads.decoder_w1);
        optimizer.update("decoder.b1", &mut p.decoder_b1, &grads.decoder_b1);
        optimizer.update("decoder.b_x", &mut p.decoder_bx, &grads.decoder_bx);
    }
}

/// Inverted dropout mask, or `None` when every unit is kept.
fn dropout_mask<R: Rng + ?Sized>(shape: (usize, usize), keep_prob: f32, rng: &mut R) -> Option<Array2<f32>> {
    if keep_prob >= 1.0 {
        return None;
    }
    let scale = 1.0 / keep_prob;
    Some(Array2::from_shape_simple_fn(shape, || {
        if rng.gen::<f32>() < keep_prob {
            scale
        } else {
            0.0
        }
    }))
}

fn apply_mask(values: &Array2<f32>, mask: Option<&Array2<f32>>) -> Array2<f32> {
    match mask {
        Some(mask) => values * mask,
        None => values.clone(),
    }
}

/// Mean over every element of `(clean - recon)^2`.
fn mean_squared_error(recon: &Array2<f32>, clean: &Array2<f32>) -> (f32, Array2<f32>) {
    let diff = recon - clean;
    let n = diff.len() as f32;
    let loss = squared_norm(&diff) / n;
    (loss, diff * (2.0 / n))
}

/// Per-row summed binary cross-entropy of `sigmoid(logits)` against `clean`,
/// averaged over rows. Gradient is taken w.r.t. the logits.
fn sigmoid_cross_entropy(logits: &Array2<f32>, clean: &Array2<f32>) -> (f32, Array2<f32>) {
    let batch = logits.nrows() as f32;
    let floor_log = CROSS_ENTROPY_EPS.ln();
    let mut loss = 0.0f64;
    let mut grad = Array2::zeros(logits.dim());

    Zip::from(&mut grad)
        .and(logits)
        .and(clean)
        .for_each(|g, &logit, &x| {
            let p = sigmoid(logit);
            let q = 1.0 - p;
            let mut d = 0.0;

            let log_p = if p > CROSS_ENTROPY_EPS {
                d -= x * q;
                p.ln()
            } else {
                floor_log
            };
            let log_q = if q > CROSS_ENTROPY_EPS {
                d += (1.0 - x) * p;
                q.ln()
            } else {
                floor_log
            };

            loss -= (x * log_p + (1.0 - x) * log_q) as f64;
            *g = d / batch;
        });

    ((loss / batch as f64) as f32, grad)
}
