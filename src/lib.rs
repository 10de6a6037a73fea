//! Value-penalized Q-learning for sequential recommendation
//!
//! Offline reinforcement learning on logged shopping sessions. A sequence
//! encoder turns the recent item history into a state, and the crate trains it
//! either with supervised next-item cross-entropy or with double Q-learning whose
//! value head is a randomly mixed ensemble penalized by its own spread.
//!
//! # Architecture
//!
//! - **Encoders**: NextItNet (dilated causal convolutions) and SASRec
//!   (causal self-attention)
//! - **Heads**: a Q-value head (baseline, ensemble mean or REM) and a
//!   cross-entropy logits head used for ranking
//! - **Training**: supervised cross-entropy, or double Q-learning over two
//!   networks that swap the main/target roles on every step
//! - **Evaluation**: hit-rate and NDCG at 5/10/15/20 replayed from test sessions
//!
//! # Example
//!
//! ```ignore
//! use vpq_rec::{ModelConfig, data::ReplayBuffer};
//! use vpq_rec::training::{DoubleQTrainer, TrainingConfig};
//!
//! let buffer = ReplayBuffer::from_directory("data/replay_buffer")?;
//! let mut trainer = DoubleQTrainer::new(model_config, training_config, device)?;
//! trainer.train(&buffer, Some(&evaluator))?;
//! ```

pub mod config;
pub mod data;
pub mod evaluation;
pub mod layers;
pub mod models;
pub mod training;

// Re-export commonly used items
pub use config::{EncoderConfig, HeadConfig, ModelConfig, QHeadMethod, RewardConfig};
pub use models::RecommenderNetwork;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum VpqError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("NumPy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("NumPy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),
}

pub type Result<T> = std::result::Result<T, VpqError>;
