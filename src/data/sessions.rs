/// Logged session events read from CSV
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{pad_history, state_length};

/// One logged interaction
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionEvent {
    pub session_id: u64,
    pub item_id: u32,
    /// 1 for a purchase, 0 for a click
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_buy: bool,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid is_buy flag: {}",
            other
        ))),
    }
}

/// One evaluation query: the history before an event and the event itself
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSample {
    pub state: Vec<u32>,
    pub len_state: u32,
    pub action: u32,
    pub is_buy: bool,
}

/// Events grouped by session
///
/// Sessions keep the order in which they first appear in the log. Events keep
/// file order unless every event of the session carries a timestamp, in which
/// case they are sorted by it (stable).
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    sessions: Vec<(u64, Vec<SessionEvent>)>,
}

impl SessionLog {
    /// Load from a CSV file with columns `session_id,item_id,is_buy[,timestamp]`
    pub fn from_csv<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        log::info!("Loading sessions from: {:?}", path.as_ref());

        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let events = reader
            .deserialize()
            .collect::<std::result::Result<Vec<SessionEvent>, csv::Error>>()?;

        let log = Self::from_events(events);
        log::info!(
            "Loaded {} events in {} sessions",
            log.num_events(),
            log.num_sessions()
        );

        Ok(log)
    }

    pub fn from_events(events: Vec<SessionEvent>) -> Self {
        let mut positions: HashMap<u64, usize> = HashMap::new();
        let mut sessions: Vec<(u64, Vec<SessionEvent>)> = Vec::new();

        for event in events {
            let idx = *positions.entry(event.session_id).or_insert_with(|| {
                sessions.push((event.session_id, Vec::new()));
                sessions.len() - 1
            });
            sessions[idx].1.push(event);
        }

        for (_, events) in sessions.iter_mut() {
            if events.iter().all(|e| e.timestamp.is_some()) {
                events.sort_by_key(|e| e.timestamp);
            }
        }

        Self { sessions }
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn num_events(&self) -> usize {
        self.sessions.iter().map(|(_, events)| events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over sessions as (session_id, events)
    pub fn sessions(&self) -> impl Iterator<Item = (u64, &[SessionEvent])> {
        self.sessions.iter().map(|(id, events)| (*id, events.as_slice()))
    }

    /// Largest item id in the log
    pub fn max_item_id(&self) -> Option<u32> {
        self.sessions
            .iter()
            .flat_map(|(_, events)| events.iter().map(|e| e.item_id))
            .max()
    }

    /// Replay one session into evaluation samples
    pub fn replay_session(
        events: &[SessionEvent],
        state_size: usize,
        pad_item: u32,
    ) -> Vec<EvalSample> {
        let mut history: Vec<u32> = Vec::with_capacity(events.len());
        let mut samples = Vec::with_capacity(events.len());

        for event in events {
            samples.push(EvalSample {
                state: pad_history(&history, state_size, pad_item),
                len_state: state_length(history.len(), state_size),
                action: event.item_id,
                is_buy: event.is_buy,
            });
            history.push(event.item_id);
        }

        samples
    }

    /// Evaluation samples for a contiguous range of sessions
    pub fn eval_samples(
        &self,
        sessions: std::ops::Range<usize>,
        state_size: usize,
        pad_item: u32,
    ) -> Vec<EvalSample> {
        self.sessions[sessions]
            .iter()
            .flat_map(|(_, events)| Self::replay_session(events, state_size, pad_item))
            .collect()
    }
}
