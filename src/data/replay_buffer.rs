/// Offline replay buffer stored as NumPy .npy arrays
use candle_core::{Device, Result, Tensor};
use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use rand::Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::{pad_history, state_length, SequenceBatch, SessionLog};
use crate::config::RewardConfig;

const STATE_FILE: &str = "state.npy";
const LEN_STATE_FILE: &str = "len_state.npy";
const ACTION_FILE: &str = "action.npy";
const IS_BUY_FILE: &str = "is_buy.npy";
const NEXT_STATE_FILE: &str = "next_state.npy";
const LEN_NEXT_STATE_FILE: &str = "len_next_state.npy";
const IS_DONE_FILE: &str = "is_done.npy";

/// Logged transitions `(s, a, r, s', done)` in columnar form
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    state: Array2<u32>,         // [N, state_size]
    len_state: Array1<u32>,     // [N]
    action: Array1<u32>,        // [N]
    is_buy: Array1<bool>,       // [N]
    next_state: Array2<u32>,    // [N, state_size]
    len_next_state: Array1<u32>, // [N]
    is_done: Array1<bool>,      // [N]
}

fn read_matrix(dir: &Path, name: &str) -> crate::Result<Array2<u32>> {
    // Python saves as i64
    let values = <Array2<i64> as ReadNpyExt>::read_npy(BufReader::new(File::open(dir.join(name))?))?;
    to_ids(values.iter().copied(), name)?;
    Ok(values.mapv(|x| x as u32))
}

fn read_vector(dir: &Path, name: &str) -> crate::Result<Array1<u32>> {
    let values = <Array1<i64> as ReadNpyExt>::read_npy(BufReader::new(File::open(dir.join(name))?))?;
    to_ids(values.iter().copied(), name)?;
    Ok(values.mapv(|x| x as u32))
}

fn read_flags(dir: &Path, name: &str) -> crate::Result<Array1<bool>> {
    let flags = <Array1<bool> as ReadNpyExt>::read_npy(BufReader::new(File::open(dir.join(name))?))?;
    Ok(flags)
}

fn to_ids(mut values: impl Iterator<Item = i64>, name: &str) -> crate::Result<()> {
    if let Some(bad) = values.find(|&x| x < 0 || x > u32::MAX as i64) {
        return Err(crate::VpqError::Data(format!(
            "{} contains out-of-range value {}",
            name, bad
        )));
    }
    Ok(())
}

fn write_npy<A: WriteNpyExt>(dir: &Path, name: &str, array: &A) -> crate::Result<()> {
    array.write_npy(BufWriter::new(File::create(dir.join(name))?))?;
    Ok(())
}

impl ReplayBuffer {
    /// Load from a directory containing the seven .npy columns
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading replay buffer from: {:?}", dir);

        let buffer = Self {
            state: read_matrix(dir, STATE_FILE)?,
            len_state: read_vector(dir, LEN_STATE_FILE)?,
            action: read_vector(dir, ACTION_FILE)?,
            is_buy: read_flags(dir, IS_BUY_FILE)?,
            next_state: read_matrix(dir, NEXT_STATE_FILE)?,
            len_next_state: read_vector(dir, LEN_NEXT_STATE_FILE)?,
            is_done: read_flags(dir, IS_DONE_FILE)?,
        };
        buffer.validate_shapes()?;

        log::info!(
            "Replay buffer loaded: {} transitions, state_size={}",
            buffer.len(),
            buffer.state_size()
        );

        Ok(buffer)
    }

    /// Write the buffer as .npy columns into `path`, creating it if needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let dir = path.as_ref();
        std::fs::create_dir_all(dir)?;

        write_npy(dir, STATE_FILE, &self.state.mapv(|x| x as i64))?;
        write_npy(dir, LEN_STATE_FILE, &self.len_state.mapv(|x| x as i64))?;
        write_npy(dir, ACTION_FILE, &self.action.mapv(|x| x as i64))?;
        write_npy(dir, IS_BUY_FILE, &self.is_buy)?;
        write_npy(dir, NEXT_STATE_FILE, &self.next_state.mapv(|x| x as i64))?;
        write_npy(dir, LEN_NEXT_STATE_FILE, &self.len_next_state.mapv(|x| x as i64))?;
        write_npy(dir, IS_DONE_FILE, &self.is_done)?;

        log::info!("Saved {} transitions to {:?}", self.len(), dir);
        Ok(())
    }

    /// Build transitions from training sessions
    ///
    /// Each event becomes one transition whose state is the padded history
    /// before the event and whose next state includes it. The last event of a
    /// session is terminal.
    pub fn from_sessions(
        sessions: &SessionLog,
        state_size: usize,
        item_num: usize,
    ) -> crate::Result<Self> {
        if state_size == 0 {
            return Err(crate::VpqError::Config("state_size must be > 0".to_string()));
        }

        let pad_item = item_num as u32;
        let n = sessions.num_events();

        let mut state = Vec::with_capacity(n * state_size);
        let mut next_state = Vec::with_capacity(n * state_size);
        let mut len_state = Vec::with_capacity(n);
        let mut len_next_state = Vec::with_capacity(n);
        let mut action = Vec::with_capacity(n);
        let mut is_buy = Vec::with_capacity(n);
        let mut is_done = Vec::with_capacity(n);

        for (session_id, events) in sessions.sessions() {
            let mut history: Vec<u32> = Vec::with_capacity(events.len());

            for (i, event) in events.iter().enumerate() {
                if event.item_id >= pad_item {
                    return Err(crate::VpqError::Data(format!(
                        "Session {}: item {} is not below item_num {}",
                        session_id, event.item_id, item_num
                    )));
                }

                state.extend(pad_history(&history, state_size, pad_item));
                len_state.push(state_length(history.len(), state_size));

                history.push(event.item_id);

                next_state.extend(pad_history(&history, state_size, pad_item));
                len_next_state.push(state_length(history.len(), state_size));

                action.push(event.item_id);
                is_buy.push(event.is_buy);
                is_done.push(i + 1 == events.len());
            }
        }

        let to_matrix = |data: Vec<u32>| {
            Array2::from_shape_vec((n, state_size), data)
                .map_err(|e| crate::VpqError::Data(format!("Invalid state shape: {}", e)))
        };

        let buffer = Self {
            state: to_matrix(state)?,
            len_state: Array1::from(len_state),
            action: Array1::from(action),
            is_buy: Array1::from(is_buy),
            next_state: to_matrix(next_state)?,
            len_next_state: Array1::from(len_next_state),
            is_done: Array1::from(is_done),
        };

        log::info!(
            "Built replay buffer: {} transitions from {} sessions",
            buffer.len(),
            sessions.num_sessions()
        );

        Ok(buffer)
    }

    fn validate_shapes(&self) -> crate::Result<()> {
        let n = self.state.nrows();
        let columns = [
            ("len_state", self.len_state.len()),
            ("action", self.action.len()),
            ("is_buy", self.is_buy.len()),
            ("next_state", self.next_state.nrows()),
            ("len_next_state", self.len_next_state.len()),
            ("is_done", self.is_done.len()),
        ];

        for (name, len) in columns {
            if len != n {
                return Err(crate::VpqError::Data(format!(
                    "Shape mismatch: state has {} rows but {} has {}",
                    n, name, len
                )));
            }
        }

        if self.next_state.ncols() != self.state.ncols() {
            return Err(crate::VpqError::Data(format!(
                "Shape mismatch: state width {} != next_state width {}",
                self.state.ncols(),
                self.next_state.ncols()
            )));
        }

        let state_size = self.state.ncols() as u32;
        for (name, lengths) in [("len_state", &self.len_state), ("len_next_state", &self.len_next_state)] {
            if let Some(&bad) = lengths.iter().find(|&&l| l == 0 || l > state_size) {
                return Err(crate::VpqError::Data(format!(
                    "{} value {} is outside 1..={}",
                    name, bad, state_size
                )));
            }
        }

        Ok(())
    }

    /// Check that every stored id fits a network with `item_num` items
    pub fn validate_items(&self, item_num: usize) -> crate::Result<()> {
        let pad_item = item_num as u32;

        if let Some(&bad) = self.action.iter().find(|&&a| a >= pad_item) {
            return Err(crate::VpqError::Data(format!(
                "Action {} is not below item_num {}",
                bad, item_num
            )));
        }

        let state_items = self.state.iter().chain(self.next_state.iter());
        if let Some(&bad) = state_items.into_iter().find(|&&s| s > pad_item) {
            return Err(crate::VpqError::Data(format!(
                "State item {} exceeds padding id {}",
                bad, item_num
            )));
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.state.nrows() == 0
    }

    pub fn state_size(&self) -> usize {
        self.state.ncols()
    }

    /// Batches per epoch (incomplete trailing batch dropped)
    pub fn num_batches(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            0
        } else {
            self.len() / batch_size
        }
    }

    /// Draw `batch_size` distinct transitions
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> TransitionBatch {
        let amount = batch_size.min(self.len());
        let indices = rand::seq::index::sample(rng, self.len(), amount).into_vec();
        self.gather(&indices)
    }

    /// Collect the transitions at `indices`
    pub fn gather(&self, indices: &[usize]) -> TransitionBatch {
        let state_size = self.state_size();
        let mut batch = TransitionBatch {
            state_size,
            states: Vec::with_capacity(indices.len() * state_size),
            len_states: Vec::with_capacity(indices.len()),
            actions: Vec::with_capacity(indices.len()),
            is_buy: Vec::with_capacity(indices.len()),
            next_states: Vec::with_capacity(indices.len() * state_size),
            len_next_states: Vec::with_capacity(indices.len()),
            is_done: Vec::with_capacity(indices.len()),
        };

        for &idx in indices {
            batch.states.extend(self.state.row(idx).iter());
            batch.len_states.push(self.len_state[idx]);
            batch.actions.push(self.action[idx]);
            batch.is_buy.push(self.is_buy[idx]);
            batch.next_states.extend(self.next_state.row(idx).iter());
            batch.len_next_states.push(self.len_next_state[idx]);
            batch.is_done.push(self.is_done[idx]);
        }

        batch
    }
}

/// Host-side batch of transitions
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub state_size: usize,
    pub states: Vec<u32>,
    pub len_states: Vec<u32>,
    pub actions: Vec<u32>,
    pub is_buy: Vec<bool>,
    pub next_states: Vec<u32>,
    pub len_next_states: Vec<u32>,
    pub is_done: Vec<bool>,
}

impl TransitionBatch {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn rewards(&self, rewards: &RewardConfig) -> Vec<f32> {
        self.is_buy.iter().map(|&buy| rewards.reward(buy)).collect()
    }

    pub fn state_batch(&self, pad_item: u32, device: &Device) -> Result<SequenceBatch> {
        SequenceBatch::new(&self.states, &self.len_states, self.state_size, pad_item, device)
    }

    pub fn next_state_batch(&self, pad_item: u32, device: &Device) -> Result<SequenceBatch> {
        SequenceBatch::new(
            &self.next_states,
            &self.len_next_states,
            self.state_size,
            pad_item,
            device,
        )
    }

    /// Actions as a u32 tensor [batch]
    pub fn actions_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_slice(&self.actions, self.len(), device)
    }

    /// 0.0 for terminal transitions, 1.0 otherwise [batch]
    pub fn not_done_tensor(&self, device: &Device) -> Result<Tensor> {
        let not_done: Vec<f32> = self
            .is_done
            .iter()
            .map(|&done| if done { 0.0 } else { 1.0 })
            .collect();
        Tensor::from_vec(not_done, self.len(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SessionEvent;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sessions() -> SessionLog {
        let event = |session_id, item_id, is_buy| SessionEvent {
            session_id,
            item_id,
            is_buy,
            timestamp: None,
        };
        SessionLog::from_events(vec![
            event(1, 0, false),
            event(1, 1, false),
            event(1, 2, true),
            event(2, 3, false),
            event(2, 4, false),
        ])
    }

    #[test]
    fn test_from_sessions() -> crate::Result<()> {
        let buffer = ReplayBuffer::from_sessions(&sessions(), 2, 5)?;

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.state_size(), 2);

        // First event of session 1: empty history
        assert_eq!(buffer.state.row(0).to_vec(), vec![5, 5]);
        assert_eq!(buffer.len_state[0], 1);
        assert_eq!(buffer.next_state.row(0).to_vec(), vec![0, 5]);

        // Third event keeps the last two items
        assert_eq!(buffer.state.row(2).to_vec(), vec![0, 1]);
        assert_eq!(buffer.next_state.row(2).to_vec(), vec![1, 2]);
        assert_eq!(buffer.len_next_state[2], 2);

        let done: Vec<bool> = buffer.is_done.to_vec();
        assert_eq!(done, vec![false, false, true, false, true]);
        assert!(buffer.is_buy[2]);

        Ok(())
    }

    #[test]
    fn test_rejects_unknown_items() {
        assert!(ReplayBuffer::from_sessions(&sessions(), 2, 4).is_err());
    }

    #[test]
    fn test_save_and_load() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let buffer = ReplayBuffer::from_sessions(&sessions(), 3, 5)?;
        buffer.save(dir.path())?;

        let loaded = ReplayBuffer::from_directory(dir.path())?;
        assert_eq!(loaded.len(), buffer.len());
        assert_eq!(loaded.state, buffer.state);
        assert_eq!(loaded.is_done, buffer.is_done);
        loaded.validate_items(5)?;
        assert!(loaded.validate_items(3).is_err());

        Ok(())
    }

    #[test]
    fn test_rejects_out_of_range_lengths() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let buffer = ReplayBuffer::from_sessions(&sessions(), 2, 5)?;

        let mut zero = buffer.len_state.mapv(|x| x as i64);
        zero[0] = 0;
        buffer.save(dir.path())?;
        write_npy(dir.path(), LEN_STATE_FILE, &zero)?;
        assert!(ReplayBuffer::from_directory(dir.path()).is_err());

        let mut long = buffer.len_next_state.mapv(|x| x as i64);
        long[1] = 3;
        buffer.save(dir.path())?;
        write_npy(dir.path(), LEN_NEXT_STATE_FILE, &long)?;
        assert!(ReplayBuffer::from_directory(dir.path()).is_err());

        buffer.save(dir.path())?;
        assert!(ReplayBuffer::from_directory(dir.path()).is_ok());

        Ok(())
    }

    #[test]
    fn test_sample_is_distinct() {
        let buffer = ReplayBuffer::from_sessions(&sessions(), 2, 5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let batch = buffer.sample(4, &mut rng);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.states.len(), 8);

        let mut actions = batch.actions.clone();
        actions.sort_unstable();
        actions.dedup();
        assert_eq!(actions.len(), 4);

        assert_eq!(buffer.num_batches(2), 2);
        assert_eq!(buffer.num_batches(0), 0);
    }

    #[test]
    fn test_batch_rewards() {
        let buffer = ReplayBuffer::from_sessions(&sessions(), 2, 5).unwrap();
        let batch = buffer.gather(&[0, 2]);

        let rewards = batch.rewards(&RewardConfig::default());
        assert_eq!(rewards, vec![0.2, 1.0]);

        let not_done = batch.not_done_tensor(&Device::Cpu).unwrap();
        assert_eq!(not_done.to_vec1::<f32>().unwrap(), vec![1.0, 0.0]);
    }
}
