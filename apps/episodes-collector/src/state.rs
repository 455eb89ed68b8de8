//! In-memory sample store

use std::collections::{BTreeMap, VecDeque};

use tokio::sync::RwLock;

use crate::error::CollectorError;
use crate::stats::EpisodeSummary;

pub const DEFAULT_MAX_SAMPLES: usize = 1000;
pub const DEFAULT_MAX_EPISODES: usize = 256;

pub struct AppState {
    max_samples: usize,
    max_episodes: usize,
    episodes: RwLock<BTreeMap<String, VecDeque<i64>>>,
}

impl AppState {
    pub fn new(max_samples: usize, max_episodes: usize) -> Result<Self, CollectorError> {
        if max_samples == 0 {
            return Err(CollectorError::Config(
                "max samples per episode must be at least 1".to_string(),
            ));
        }
        if max_episodes == 0 {
            return Err(CollectorError::Config(
                "max episodes must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_samples,
            max_episodes,
            episodes: RwLock::new(BTreeMap::new()),
        })
    }

    /// Build from `EPISODES_COLLECTOR_MAX_SAMPLES` (default 1000) and
    /// `EPISODES_COLLECTOR_MAX_EPISODES` (default 256)
    pub fn from_env() -> Result<Self, CollectorError> {
        let max_samples = env_limit("EPISODES_COLLECTOR_MAX_SAMPLES", DEFAULT_MAX_SAMPLES)?;
        let max_episodes = env_limit("EPISODES_COLLECTOR_MAX_EPISODES", DEFAULT_MAX_EPISODES)?;
        tracing::info!(
            "Keeping up to {} samples for each of up to {} episodes",
            max_samples,
            max_episodes
        );
        Self::new(max_samples, max_episodes)
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn max_episodes(&self) -> usize {
        self.max_episodes
    }

    /// Record one beacon's worth of durations and return how many were kept.
    /// Oldest samples are dropped once an episode is at capacity; names not
    /// yet tracked are dropped once the episode table is full.
    pub async fn record(&self, durations: &[(String, i64)]) -> usize {
        let mut episodes = self.episodes.write().await;
        let mut kept = 0;
        for (name, duration) in durations {
            if !episodes.contains_key(name) && episodes.len() >= self.max_episodes {
                tracing::debug!("Episode table full, dropping {}", name);
                continue;
            }
            let samples = episodes.entry(name.clone()).or_default();
            if samples.len() == self.max_samples {
                samples.pop_front();
            }
            samples.push_back(*duration);
            kept += 1;
        }
        kept
    }

    /// Summaries for every episode seen, ordered by name
    pub async fn summaries(&self) -> Vec<EpisodeSummary> {
        let episodes = self.episodes.read().await;
        episodes
            .iter()
            .filter_map(|(name, samples)| {
                let samples: Vec<i64> = samples.iter().copied().collect();
                EpisodeSummary::from_samples(name, &samples)
            })
            .collect()
    }
}

fn env_limit(key: &str, default: usize) -> Result<usize, CollectorError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CollectorError::Config(format!("{} is not a number: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
