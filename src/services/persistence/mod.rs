use crate::algorithms::Autoencoder;
use crate::error::{CdlError, Result};
use crate::models::{FactorSnapshot, WeightSnapshot};
use crate::utils::dmatrix_to_rows;
use crate::utils::validation::validate_rows;
use chrono::Utc;
use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// User factors, item factors and Theta, in that order.
pub type FactorMatrices = (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>);

/// JSON snapshots of autoencoder weights and factor matrices.
pub struct ModelStore;

impl ModelStore {
    pub fn save_weights(path: impl AsRef<Path>, model: &Autoencoder) -> Result<()> {
        let snapshot = WeightSnapshot {
            input_dim: model.input_dim(),
            hidden_dim: model.hidden_dim(),
            num_factors: model.latent_dim(),
            activation: model.activation(),
            loss_type: model.loss_type(),
            tensors: model.params().to_tensors(),
            saved_at: Utc::now(),
        };
        write_json(path.as_ref(), &snapshot)?;
        info!("Weights saved at {}", path.as_ref().display());
        Ok(())
    }

    /// Restores weights into `model`; the architecture must match exactly.
    pub fn load_weights(path: impl AsRef<Path>, model: &mut Autoencoder) -> Result<()> {
        info!("Loading weights from {}", path.as_ref().display());
        let snapshot: WeightSnapshot = read_json(path.as_ref())?;

        let expected = (model.input_dim(), model.hidden_dim(), model.latent_dim());
        let actual = (snapshot.input_dim, snapshot.hidden_dim, snapshot.num_factors);
        if expected != actual {
            return Err(CdlError::shape("autoencoder architecture", expected, actual));
        }
        if snapshot.activation != model.activation() || snapshot.loss_type != model.loss_type() {
            return Err(CdlError::InvalidConfig(format!(
                "snapshot was trained with {}/{}, model uses {}/{}",
                snapshot.activation,
                snapshot.loss_type,
                model.activation(),
                model.loss_type()
            )));
        }

        model.params_mut().load_tensors(&snapshot.tensors)
    }

    pub fn save_factors(
        path: impl AsRef<Path>,
        user_factors: &DMatrix<f64>,
        item_factors: &DMatrix<f64>,
        theta: &DMatrix<f64>,
    ) -> Result<()> {
        let snapshot = FactorSnapshot {
            num_users: user_factors.nrows(),
            num_items: item_factors.nrows(),
            num_factors: item_factors.ncols(),
            user_factors: dmatrix_to_rows(user_factors),
            item_factors: dmatrix_to_rows(item_factors),
            theta: dmatrix_to_rows(theta),
            saved_at: Utc::now(),
        };
        write_json(path.as_ref(), &snapshot)?;
        info!("Factors saved at {}", path.as_ref().display());
        Ok(())
    }

    /// Loads U, V, Theta; every matrix must be `num_users`/`num_items` by
    /// `num_factors`.
    pub fn load_factors(
        path: impl AsRef<Path>,
        num_users: usize,
        num_items: usize,
        num_factors: usize,
    ) -> Result<FactorMatrices> {
        info!("Loading pmf data from {}", path.as_ref().display());
        let snapshot: FactorSnapshot = read_json(path.as_ref())?;

        validate_rows("user factors", &snapshot.user_factors, num_users, num_factors)?;
        validate_rows("item factors", &snapshot.item_factors, num_items, num_factors)?;
        validate_rows("theta", &snapshot.theta, num_items, num_factors)?;

        Ok((
            rows_to_dmatrix(&snapshot.user_factors, num_users, num_factors),
            rows_to_dmatrix(&snapshot.item_factors, num_items, num_factors),
            rows_to_dmatrix(&snapshot.theta, num_items, num_factors),
        ))
    }
}

fn rows_to_dmatrix(rows: &[Vec<f64>], nrows: usize, ncols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(nrows, ncols, |i, j| rows[i][j])
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::initializer::normal_matrix;
    use crate::algorithms::{Activation, LossType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cdlrec-persistence-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_factor_round_trip_is_bit_exact() {
        let mut rng = StdRng::seed_from_u64(21);
        let u = normal_matrix(3, 4, 0.1, &mut rng);
        let v = normal_matrix(5, 4, 0.1, &mut rng);
        let theta = normal_matrix(5, 4, 0.1, &mut rng);
        let path = scratch("factors.json");

        ModelStore::save_factors(&path, &u, &v, &theta).unwrap();
        let (u2, v2, theta2) = ModelStore::load_factors(&path, 3, 5, 4).unwrap();

        for (a, b) in [(&u, &u2), (&v, &v2), (&theta, &theta2)] {
            assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_factor_load_rejects_wrong_dimensions() {
        let mut rng = StdRng::seed_from_u64(22);
        let u = normal_matrix(2, 3, 0.1, &mut rng);
        let v = normal_matrix(2, 3, 0.1, &mut rng);
        let path = scratch("factors-small.json");
        ModelStore::save_factors(&path, &u, &v, &v).unwrap();

        let err = ModelStore::load_factors(&path, 2, 2, 4).unwrap_err();
        assert!(matches!(err, CdlError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_weight_round_trip() {
        let mut rng = StdRng::seed_from_u64(23);
        let model = Autoencoder::new(7, 5, 3, Activation::Tanh, LossType::MeanSquaredError, 1.0, &mut rng);
        let mut restored = Autoencoder::new(7, 5, 3, Activation::Tanh, LossType::MeanSquaredError, 1.0, &mut rng);
        let path = scratch("weights.json");

        ModelStore::save_weights(&path, &model).unwrap();
        ModelStore::load_weights(&path, &mut restored).unwrap();
        let saved = model.params().to_tensors();
        for (a, b) in saved.iter().zip(restored.params().to_tensors()) {
            assert_eq!(a.shape, b.shape);
            assert!(a.data.iter().zip(&b.data).all(|(x, y)| (x - y).abs() <= 1e-6 * x.abs().max(1.0)));
        }
    }

    #[test]
    fn test_weight_load_rejects_other_architecture() {
        let mut rng = StdRng::seed_from_u64(24);
        let model = Autoencoder::new(7, 5, 3, Activation::Tanh, LossType::MeanSquaredError, 1.0, &mut rng);
        let mut other = Autoencoder::new(7, 6, 3, Activation::Tanh, LossType::MeanSquaredError, 1.0, &mut rng);
        let path = scratch("weights-other.json");

        ModelStore::save_weights(&path, &model).unwrap();
        let err = ModelStore::load_weights(&path, &mut other).unwrap_err();
        assert!(matches!(err, CdlError::ShapeMismatch { .. }));
    }
}
