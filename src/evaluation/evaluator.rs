/// Offline evaluation by replaying test sessions
use candle_core::Device;
use rayon::prelude::*;

use super::metrics::{top_k_indices, HitAccumulator, MAX_K};
use super::report::EvalReport;
use crate::config::RewardConfig;
use crate::data::{EvalSample, SequenceBatch, SessionLog};
use crate::models::RecommenderNetwork;

/// Sessions replayed per forward pass
pub const SESSIONS_PER_BATCH: usize = 100;

/// Replays every event of every test session through a network's logits head
///
/// For each event the history before it is the state, and the ranking of all
/// items by logit is compared with the logged item.
pub struct Evaluator {
    sessions: SessionLog,
    state_size: usize,
    pad_item: u32,
    rewards: RewardConfig,
    sessions_per_batch: usize,
}

impl Evaluator {
    /// # Arguments
    /// * `sessions` - Test sessions
    /// * `state_size` - History length of a state
    /// * `item_num` - Number of items, also the padding id
    /// * `rewards` - Click / purchase rewards credited on hits
    ///
    /// Fails if any logged item id is not below `item_num`.
    pub fn new(
        sessions: SessionLog,
        state_size: usize,
        item_num: usize,
        rewards: RewardConfig,
    ) -> crate::Result<Self> {
        if let Some(max) = sessions.max_item_id() {
            if max as usize >= item_num {
                return Err(crate::VpqError::Data(format!(
                    "Test session item {} is not below item_num {}",
                    max, item_num
                )));
            }
        }

        Ok(Self {
            sessions,
            state_size,
            pad_item: item_num as u32,
            rewards,
            sessions_per_batch: SESSIONS_PER_BATCH,
        })
    }

    pub fn with_sessions_per_batch(mut self, sessions_per_batch: usize) -> Self {
        self.sessions_per_batch = sessions_per_batch.max(1);
        self
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.num_sessions()
    }

    /// Evaluate a network's logits head over all test sessions
    pub fn evaluate(&self, network: &RecommenderNetwork) -> crate::Result<EvalReport> {
        let start = std::time::Instant::now();
        let mut totals = HitAccumulator::new();

        let num_sessions = self.sessions.num_sessions();
        let mut begin = 0;
        while begin < num_sessions {
            let end = (begin + self.sessions_per_batch).min(num_sessions);
            let samples = self.sessions.eval_samples(begin..end, self.state_size, self.pad_item);
            totals.merge(&self.evaluate_samples(network, &samples)?);
            begin = end;
        }

        log::info!(
            "Evaluated {} sessions in {:.2?}",
            num_sessions,
            start.elapsed()
        );

        Ok(totals.report())
    }

    fn evaluate_samples(
        &self,
        network: &RecommenderNetwork,
        samples: &[EvalSample],
    ) -> crate::Result<HitAccumulator> {
        let mut acc = HitAccumulator::new();
        if samples.is_empty() {
            return Ok(acc);
        }

        let batch = self.sample_batch(samples, network.device())?;
        let scores = network.logits(&batch, false)?.to_vec2::<f32>()?;

        let rankings: Vec<Vec<u32>> = scores
            .par_iter()
            .map(|row| top_k_indices(row, MAX_K))
            .collect();

        for (sample, ranking) in samples.iter().zip(rankings.iter()) {
            acc.record(
                ranking,
                sample.action,
                sample.is_buy,
                self.rewards.reward(sample.is_buy),
            );
        }

        Ok(acc)
    }

    fn sample_batch(&self, samples: &[EvalSample], device: &Device) -> candle_core::Result<SequenceBatch> {
        let states: Vec<u32> = samples.iter().flat_map(|s| s.state.iter().copied()).collect();
        let lengths: Vec<u32> = samples.iter().map(|s| s.len_state).collect();
        SequenceBatch::new(&states, &lengths, self.state_size, self.pad_item, device)
    }
}
