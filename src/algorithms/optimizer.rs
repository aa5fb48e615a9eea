use ndarray::{Array, ArrayD, Dimension, IxDyn, Zip};
use std::collections::HashMap;

pub trait Optimizer: Send + Sync {
    /// Applies one update to the parameter tensor registered under `key`.
    fn update<D: Dimension>(&mut self, key: &str, params: &mut Array<f32, D>, gradients: &Array<f32, D>);
}

#[derive(Debug, Clone)]
struct Moments {
    t: i32,
    m: ArrayD<f32>,
    v: ArrayD<f32>,
}

impl Moments {
    fn zeros(shape: &[usize]) -> Self {
        Self {
            t: 0,
            m: ArrayD::zeros(IxDyn(shape)),
            v: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

/// Adam with per-tensor moment estimates and step counters.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    state: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            state: HashMap::new(),
        }
    }

    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn steps(&self, key: &str) -> i32 {
        self.state.get(key).map(|s| s.t).unwrap_or(0)
    }

    pub fn update_with_key<D: Dimension>(
        &mut self,
        key: &str,
        params: &mut Array<f32, D>,
        gradients: &Array<f32, D>,
    ) {
        let beta1 = self.beta1 as f32;
        let beta2 = self.beta2 as f32;
        let lr = self.learning_rate as f32;
        let eps = self.epsilon as f32;

        let state = self
            .state
            .entry(key.to_string())
            .or_insert_with(|| Moments::zeros(params.shape()));
        state.t += 1;

        let grads = gradients.view().into_dyn();

        // Biased first and second raw moment estimates
        Zip::from(&mut state.m)
            .and(&grads)
            .for_each(|m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        Zip::from(&mut state.v)
            .and(&grads)
            .for_each(|v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let correction1 = 1.0 - beta1.powi(state.t);
        let correction2 = 1.0 - beta2.powi(state.t);

        let mut params = params.view_mut().into_dyn();
        Zip::from(&mut params)
            .and(&state.m)
            .and(&state.v)
            .for_each(|p, &m, &v| {
                let m_hat = m / correction1;
                let v_hat = v / correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::with_learning_rate(0.001)
    }
}

impl Optimizer for Adam {
    fn update<D: Dimension>(&mut self, key: &str, params: &mut Array<f32, D>, gradients: &Array<f32, D>) {
        self.update_with_key(key, params, gradients);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::with_learning_rate(0.01);
        let mut params = array![1.0f32, 2.0, 3.0];
        let gradients = array![0.1f32, -0.2, 0.0];
        adam.update("w", &mut params, &gradients);

        // bias-corrected first step is lr * sign(g)
        assert!((params[0] - 0.99).abs() < 1e-5);
        assert!((params[1] - 2.01).abs() < 1e-5);
        assert_eq!(params[2], 3.0);
        assert_eq!(adam.steps("w"), 1);
    }

    #[test]
    fn test_keys_track_independent_steps() {
        let mut adam = Adam::default();
        let mut a = Array1::<f32>::zeros(2);
        let mut b = ndarray::Array2::<f32>::zeros((2, 2));
        adam.update("a", &mut a, &Array1::ones(2));
        adam.update("a", &mut a, &Array1::ones(2));
        adam.update("b", &mut b, &ndarray::Array2::ones((2, 2)));
        assert_eq!(adam.steps("a"), 2);
        assert_eq!(adam.steps("b"), 1);
        assert_eq!(adam.steps("c"), 0);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::with_learning_rate(0.1);
        let mut x = array![3.0f32, -4.0];
        for _ in 0..500 {
            let grad = x.mapv(|v| 2.0 * v);
            adam.update("x", &mut x, &grad);
        }
        assert!(x.iter().all(|v| v.abs() < 0.1));
    }
}
