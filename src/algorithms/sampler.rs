use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Draws training mini-batches from the content matrix.
///
/// Returned rows must be rows of `content`, and `ids[k]` must be the row
/// index of `batch.row(k)`.
pub trait BatchSampler: Send {
    fn get_batch(&mut self, content: &Array2<f32>, batch_size: usize) -> (Array2<f32>, Vec<usize>);
}

/// Uniform sampling without replacement.
#[derive(Debug, Clone)]
pub struct RandomBatchSampler {
    rng: StdRng,
}

impl RandomBatchSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl BatchSampler for RandomBatchSampler {
    fn get_batch(&mut self, content: &Array2<f32>, batch_size: usize) -> (Array2<f32>, Vec<usize>) {
        let n = content.nrows();
        let ids = rand::seq::index::sample(&mut self.rng, n, batch_size.min(n)).into_vec();
        (content.select(Axis(0), &ids), ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_batch_rows_match_ids() {
        let content = Array2::from_shape_fn((10, 3), |(i, j)| (i * 3 + j) as f32);
        let mut sampler = RandomBatchSampler::new(5);
        let (batch, ids) = sampler.get_batch(&content, 4);

        assert_eq!(batch.dim(), (4, 3));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 4);
        for (k, &id) in ids.iter().enumerate() {
            assert_eq!(batch.row(k), content.row(id));
        }
    }

    #[test]
    fn test_batch_size_capped_by_rows() {
        let content = Array2::<f32>::zeros((3, 2));
        let (batch, ids) = RandomBatchSampler::new(0).get_batch(&content, 10);
        assert_eq!(batch.nrows(), 3);
        assert_eq!(ids.len(), 3);
    }
}
