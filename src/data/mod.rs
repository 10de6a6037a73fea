/// Data loading for offline training and evaluation
pub mod replay_buffer;
pub mod sessions;

pub use replay_buffer::{ReplayBuffer, TransitionBatch};
pub use sessions::{EvalSample, SessionEvent, SessionLog};

use candle_core::{Device, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Dataset statistics from data_statis.json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataStatistics {
    /// Length of the history that defines a state
    pub state_size: usize,
    /// Total number of items
    pub item_num: usize,
}

impl DataStatistics {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let stats: DataStatistics = serde_json::from_reader(reader)?;

        if stats.state_size == 0 || stats.item_num == 0 {
            return Err(crate::VpqError::Data(format!(
                "Invalid statistics in {:?}: {:?}",
                path.as_ref(),
                stats
            )));
        }

        Ok(stats)
    }

    /// Load `data_statis.json` from a data directory
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> crate::Result<Self> {
        Self::from_file(dir.as_ref().join("data_statis.json"))
    }
}

/// Pad or truncate an item history to exactly `length` entries
///
/// Long histories keep their most recent `length` items; short ones are
/// filled with `pad_item` at the end.
pub fn pad_history(history: &[u32], length: usize, pad_item: u32) -> Vec<u32> {
    if history.len() >= length {
        return history[history.len() - length..].to_vec();
    }

    let mut state = Vec::with_capacity(length);
    state.extend_from_slice(history);
    state.resize(length, pad_item);
    state
}

/// Effective state length for a history of `history_len` items
///
/// An empty history still counts as length 1 so that the encoder output is
/// read at position 0.
pub fn state_length(history_len: usize, state_size: usize) -> u32 {
    if history_len >= state_size {
        state_size as u32
    } else if history_len == 0 {
        1
    } else {
        history_len as u32
    }
}

/// A batch of padded item sequences on a device
#[derive(Debug, Clone)]
pub struct SequenceBatch {
    /// Item ids [batch, state_size]
    pub items: Tensor,
    /// 1.0 where the item is not padding [batch, state_size]
    pub mask: Tensor,
    /// Effective lengths [batch]
    pub lengths: Tensor,
}

impl SequenceBatch {
    /// Build from row-major states
    pub fn new(
        states: &[u32],
        lengths: &[u32],
        state_size: usize,
        pad_item: u32,
        device: &Device,
    ) -> Result<Self> {
        let batch_size = lengths.len();
        if states.len() != batch_size * state_size {
            return Err(candle_core::Error::Msg(format!(
                "Expected {} state entries for batch of {}, got {}",
                batch_size * state_size,
                batch_size,
                states.len()
            )));
        }

        let mask: Vec<f32> = states
            .iter()
            .map(|&item| if item == pad_item { 0.0 } else { 1.0 })
            .collect();

        let items = Tensor::from_slice(states, (batch_size, state_size), device)?;
        let mask = Tensor::from_vec(mask, (batch_size, state_size), device)?;
        let lengths = Tensor::from_slice(lengths, batch_size, device)?;

        Ok(Self {
            items,
            mask,
            lengths,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.items.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.items.dims()[1]
    }
}
