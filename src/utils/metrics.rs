use crate::utils::top_k_indices;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallReport {
    pub m: usize,
    pub recall_at_m: f64,
    pub evaluated_users: usize,
}

/// Recall@M over held-out interactions, ranking every item by `u_i . v_j`.
#[derive(Debug, Clone)]
pub struct RecallEvaluator {
    m: usize,
}

impl RecallEvaluator {
    pub fn new(m: usize) -> Self {
        Self { m }
    }

    pub fn calculate_recall_at_m(&self, recommended: &[usize], relevant: &[usize]) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let relevant_set: HashSet<_> = relevant.iter().collect();
        let hits = recommended
            .iter()
            .take(self.m)
            .filter(|item| relevant_set.contains(item))
            .count();

        hits as f64 / relevant.len() as f64
    }

    /// Averages recall@M over users with at least one held-out item.
    /// Items in `train_users[i]` are excluded from user i's ranking.
    pub fn evaluate(
        &self,
        user_factors: &DMatrix<f64>,
        item_factors: &DMatrix<f64>,
        train_users: &[Vec<usize>],
        test_users: &[Vec<usize>],
    ) -> RecallReport {
        let scores = user_factors * item_factors.transpose();
        let mut total = 0.0;
        let mut evaluated = 0usize;

        for (user, relevant) in test_users.iter().enumerate() {
            if relevant.is_empty() || user >= scores.nrows() {
                continue;
            }

            let mut row: Vec<f64> = scores.row(user).iter().copied().collect();
            if let Some(seen) = train_users.get(user) {
                for &item in seen {
                    if item < row.len() {
                        row[item] = f64::NEG_INFINITY;
                    }
                }
            }

            let recommended = top_k_indices(&row, self.m);
            total += self.calculate_recall_at_m(&recommended, relevant);
            evaluated += 1;
        }

        RecallReport {
            m: self.m,
            recall_at_m: if evaluated > 0 { total / evaluated as f64 } else { 0.0 },
            evaluated_users: evaluated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_counts_hits_within_cutoff() {
        let evaluator = RecallEvaluator::new(2);
        assert_eq!(evaluator.calculate_recall_at_m(&[3, 1, 2], &[1, 2]), 0.5);
        assert_eq!(evaluator.calculate_recall_at_m(&[3, 1], &[]), 0.0);
    }

    #[test]
    fn test_evaluate_excludes_training_items() {
        // user 0 scores item 0 highest, but it is a training item
        let u = DMatrix::from_row_slice(1, 1, &[1.0]);
        let v = DMatrix::from_row_slice(3, 1, &[3.0, 2.0, 1.0]);
        let report = RecallEvaluator::new(1).evaluate(&u, &v, &[vec![0]], &[vec![1]]);
        assert_eq!(report.evaluated_users, 1);
        assert_eq!(report.recall_at_m, 1.0);
    }
}
