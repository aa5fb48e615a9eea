use crate::algorithms::{Activation, LossType};
use crate::error::{CdlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed user-item interactions, indexed both ways.
///
/// Built once from the raw rating data and immutable afterwards. Every
/// `(user, item)` pair appears in both `users[user]` and `items[item]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionIndex {
    users: Vec<Vec<usize>>,
    items: Vec<Vec<usize>>,
}

impl InteractionIndex {
    pub fn new(users: Vec<Vec<usize>>, items: Vec<Vec<usize>>) -> Result<Self> {
        let index = Self { users, items };
        crate::utils::validation::validate_interaction_index(&index)?;
        Ok(index)
    }

    /// Derives the item→users lists from user→items lists.
    pub fn from_user_lists(users: Vec<Vec<usize>>, num_items: usize) -> Result<Self> {
        let mut items = vec![Vec::new(); num_items];
        for (user, liked) in users.iter().enumerate() {
            for &item in liked {
                let list = items.get_mut(item).ok_or_else(|| {
                    CdlError::InvalidInteractions(format!(
                        "user {} references item {} but there are only {} items",
                        user, item, num_items
                    ))
                })?;
                list.push(user);
            }
        }
        Self::new(users, items)
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn users(&self) -> &[Vec<usize>] {
        &self.users
    }

    pub fn items(&self) -> &[Vec<usize>] {
        &self.items
    }

    pub fn items_of(&self, user: usize) -> &[usize] {
        &self.users[user]
    }

    pub fn users_of(&self, item: usize) -> &[usize] {
        &self.items[item]
    }

    pub fn num_interactions(&self) -> usize {
        self.users.iter().map(Vec::len).sum()
    }
}

/// Where the orchestrator currently is within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Init,
    AutoencoderPhase,
    PmfPhase,
    EpochDone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub loss: f64,
    pub neg_likelihood: f64,
    pub gen_loss: f64,
    pub sweeps: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochReport>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

/// Outcome of one PMF solver call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmfOutcome {
    pub likelihood: f64,
    pub sweeps: usize,
    pub converge: f64,
}

/// One named autoencoder tensor, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_factors: usize,
    pub activation: Activation,
    pub loss_type: LossType,
    pub tensors: Vec<NamedTensor>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSnapshot {
    pub num_users: usize,
    pub num_items: usize,
    pub num_factors: usize,
    pub user_factors: Vec<Vec<f64>>,
    pub item_factors: Vec<Vec<f64>>,
    pub theta: Vec<Vec<f64>>,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_user_lists_is_symmetric() {
        let index = InteractionIndex::from_user_lists(vec![vec![0, 2], vec![2], vec![]], 4).unwrap();
        assert_eq!(index.num_users(), 3);
        assert_eq!(index.num_items(), 4);
        assert_eq!(index.users_of(2), &[0, 1]);
        assert!(index.users_of(3).is_empty());
        assert_eq!(index.num_interactions(), 3);
    }

    #[test]
    fn test_from_user_lists_rejects_out_of_range_item() {
        let err = InteractionIndex::from_user_lists(vec![vec![5]], 2).unwrap_err();
        assert!(matches!(err, CdlError::InvalidInteractions(_)));
    }

    #[test]
    fn test_new_rejects_asymmetric_lists() {
        let err = InteractionIndex::new(vec![vec![0]], vec![vec![]]).unwrap_err();
        assert!(matches!(err, CdlError::InvalidInteractions(_)));
    }
}
