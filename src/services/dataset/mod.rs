use crate::error::{CdlError, Result};
use crate::models::InteractionIndex;
use crate::utils::rows_to_array;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Item content rows plus per-user interaction lists, as read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub content: Vec<Vec<f32>>,
    pub users: Vec<Vec<usize>>,
    #[serde(default)]
    pub test_users: Vec<Vec<usize>>,
}

impl Dataset {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let dataset: Dataset = serde_json::from_reader(reader)?;
        info!(
            "Loaded dataset from {}: {} items, {} users",
            path.as_ref().display(),
            dataset.num_items(),
            dataset.num_users()
        );
        Ok(dataset)
    }

    pub fn num_items(&self) -> usize {
        self.content.len()
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn content_matrix(&self) -> Result<Array2<f32>> {
        let width = self.content.first().map(|r| r.len()).unwrap_or(0);
        rows_to_array(&self.content).ok_or_else(|| {
            let bad = self
                .content
                .iter()
                .map(|r| r.len())
                .find(|&len| len != width)
                .unwrap_or(width);
            CdlError::shape("content row width", width, bad)
        })
    }

    pub fn interaction_index(&self) -> Result<InteractionIndex> {
        InteractionIndex::from_user_lists(self.users.clone(), self.num_items())
    }

    /// Random binary bag-of-words content where each user's items share
    /// words with the user's preferred topic.
    pub fn synthetic(num_users: usize, num_items: usize, input_dim: usize, items_per_user: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let topics = 4.min(input_dim.max(1));
        let block = (input_dim / topics).max(1);

        let item_topic: Vec<usize> = (0..num_items).map(|_| rng.gen_range(0..topics)).collect();
        let content = item_topic
            .iter()
            .map(|&topic| {
                (0..input_dim)
                    .map(|w| {
                        let in_topic = w / block == topic;
                        let p = if in_topic { 0.5 } else { 0.05 };
                        if rng.gen::<f64>() < p {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let users = (0..num_users)
            .map(|_| {
                let topic = rng.gen_range(0..topics);
                let mut liked: Vec<usize> = (0..num_items)
                    .filter(|&j| item_topic[j] == topic)
                    .collect();
                if liked.is_empty() {
                    liked = (0..num_items).collect();
                }
                let take = items_per_user.min(liked.len());
                let mut chosen: Vec<usize> = rand::seq::index::sample(&mut rng, liked.len(), take)
                    .into_iter()
                    .map(|k| liked[k])
                    .collect();
                chosen.sort_unstable();
                chosen
            })
            .collect();

        Self {
            content,
            users,
            test_users: Vec::new(),
        }
    }

    /// Moves `fraction` of each user's items (at least one, never all) into
    /// `test_users`.
    pub fn hold_out(&mut self, fraction: f64, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut test_users = Vec::with_capacity(self.users.len());
        for items in self.users.iter_mut() {
            if items.len() < 2 {
                test_users.push(Vec::new());
                continue;
            }
            let count = ((items.len() as f64 * fraction).round() as usize).clamp(1, items.len() - 1);
            let picked: Vec<usize> = rand::seq::index::sample(&mut rng, items.len(), count).into_vec();
            let held: Vec<usize> = picked.iter().map(|&k| items[k]).collect();
            items.retain(|item| !held.contains(item));
            test_users.push(held);
        }
        self.test_users = test_users;
    }
}
