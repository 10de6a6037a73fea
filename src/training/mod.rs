/// Training infrastructure: supervised cross-entropy and double Q-learning

// Adam comes from candle-nn (AdamW with zero weight decay)
pub mod checkpoint;
pub mod double_q;
pub mod q_trainer;
pub mod rem;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use double_q::{batched_index, double_q_learning, DoubleQOutput};
pub use q_trainer::{DoubleQTrainer, StepStats, NETWORK_NAMES};
pub use trainer::{per_example_cross_entropy, SupervisedTrainer, TrainingConfig};
