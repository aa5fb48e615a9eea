use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rand::Rng;
use std::f32::consts::PI;

/// One draw from N(0, 1) via the Box-Muller transform.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // gen() samples [0, 1); keep u1 away from zero for the log
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Glorot/Xavier uniform: U(-l, l) with l = sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array2::from_shape_simple_fn((fan_in, fan_out), || rng.gen_range(-limit..limit))
}

pub fn zeros(size: usize) -> Array1<f32> {
    Array1::zeros(size)
}

/// Dense f64 matrix of N(0, std_dev^2) draws, used for the factor matrices.
pub fn normal_matrix<R: Rng + ?Sized>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| standard_normal(rng) as f64 * std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_xavier_uniform_within_limit() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = xavier_uniform(30, 10, &mut rng);
        let limit = (6.0f32 / 40.0).sqrt();
        assert_eq!(w.dim(), (30, 10));
        assert!(w.iter().all(|x| x.abs() <= limit));
    }

    #[test]
    fn test_normal_matrix_is_seeded() {
        let a = normal_matrix(4, 3, 0.1, &mut StdRng::seed_from_u64(9));
        let b = normal_matrix(4, 3, 0.1, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        assert!(a.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let samples: Vec<f32> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f32>() / n as f32;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n as f32;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }
}
