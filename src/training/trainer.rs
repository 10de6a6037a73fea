/// Supervised next-item training
use std::path::PathBuf;

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{ops, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::double_q::batched_index;
use crate::config::{ModelConfig, RewardConfig};
use crate::data::{ReplayBuffer, TransitionBatch};
use crate::evaluation::{EvalReport, Evaluator, MetricsLog};
use crate::models::{save_network, RecommenderNetwork};

/// Training configuration shared by the supervised and double Q-learning trainers
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainingConfig {
    /// Number of passes; each pass draws `len / batch_size` random batches
    pub epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Discount factor for Q-learning targets
    pub discount: f32,
    /// Rewards of clicks and purchases
    pub rewards: RewardConfig,
    /// Log training statistics every N steps
    pub log_every: usize,
    /// Evaluate every N steps
    pub eval_every: usize,
    /// Seed for batch sampling and ensemble coefficients; entropy if unset
    pub seed: Option<u64>,
    /// Checkpoint directory
    pub checkpoint_dir: String,
    /// Directory for CSV logs
    pub log_dir: String,
    /// Name of the run, used for log and checkpoint file names
    pub run_name: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 256,
            learning_rate: 0.005,
            discount: 0.5,
            rewards: RewardConfig::default(),
            log_every: 100,
            eval_every: 2000,
            seed: None,
            checkpoint_dir: "checkpoints".to_string(),
            log_dir: "log_data".to_string(),
            run_name: "run".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::VpqError::Config("batch_size must be > 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(crate::VpqError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(crate::VpqError::Config(format!(
                "discount must be in [0, 1], got {}",
                self.discount
            )));
        }
        if self.log_every == 0 || self.eval_every == 0 {
            return Err(crate::VpqError::Config(
                "log_every and eval_every must be > 0".to_string(),
            ));
        }
        if self.run_name.is_empty() {
            return Err(crate::VpqError::Config("run_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub(crate) fn checkpoint_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(&self.checkpoint_dir).join(format!("{}_{}.safetensors", self.run_name, suffix))
    }
}

/// Adam as used by every trainer: AdamW without weight decay
pub(crate) fn adam(varmap: &VarMap, learning_rate: f64) -> Result<AdamW> {
    let params = ParamsAdamW {
        lr: learning_rate,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-8,
        weight_decay: 0.0,
    };
    AdamW::new(varmap.all_vars(), params)
}

/// Sparse softmax cross-entropy per example
///
/// # Arguments
/// * `logits` - [batch, num_classes]
/// * `targets` - u32 class ids [batch]
///
/// # Returns
/// [batch]
pub fn per_example_cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let log_probs = ops::log_softmax(logits, D::Minus1)?;
    batched_index(&log_probs, targets)?.neg()
}

/// Trains the cross-entropy head of a single network
pub struct SupervisedTrainer {
    network: RecommenderNetwork,
    model_config: ModelConfig,
    varmap: VarMap,
    optimizer: AdamW,
    config: TrainingConfig,
    device: Device,
    rng: StdRng,
    metrics: MetricsLog,
    step: usize,
}

impl SupervisedTrainer {
    /// Create new trainer
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let network = RecommenderNetwork::new(model_config.clone(), vb)?;

        let optimizer = adam(&varmap, training_config.learning_rate)?;
        let rng = training_config.rng();
        let metrics = MetricsLog::new(&training_config.log_dir, &training_config.run_name);

        Ok(Self {
            network,
            model_config,
            varmap,
            optimizer,
            config: training_config,
            device,
            rng,
            metrics,
            step: 0,
        })
    }

    pub fn network(&self) -> &RecommenderNetwork {
        &self.network
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn metrics(&self) -> &MetricsLog {
        &self.metrics
    }

    /// One Adam step on the mean cross-entropy of a batch
    pub fn train_step(&mut self, batch: &TransitionBatch) -> crate::Result<f32> {
        let state = batch.state_batch(self.model_config.pad_item(), &self.device)?;
        let targets = batch.actions_tensor(&self.device)?;

        let logits = self.network.logits(&state, true)?;
        let loss = per_example_cross_entropy(&logits, &targets)?.mean_all()?;
        let loss_val = loss.to_scalar::<f32>()?;

        if !loss_val.is_finite() {
            return Err(crate::VpqError::Training(format!(
                "Non-finite loss at step {}: {}",
                self.step, loss_val
            )));
        }

        self.optimizer.backward_step(&loss)?;
        self.step += 1;

        Ok(loss_val)
    }

    /// Evaluate the network and append the report to the metrics log
    pub fn evaluate(&mut self, evaluator: &Evaluator) -> crate::Result<EvalReport> {
        log::info!("Starting evaluation at step {}", self.step);
        let report = evaluator.evaluate(&self.network)?;
        report.log_summary();

        let score = self.metrics.push(&report);
        log::info!("Total score: {:.3}", score);
        log::info!("Total score record: {:?}", self.metrics.total_scores());

        Ok(report)
    }

    /// Full training loop
    pub fn train(&mut self, buffer: &ReplayBuffer, evaluator: Option<&Evaluator>) -> crate::Result<()> {
        let num_batches = buffer.num_batches(self.config.batch_size);
        if num_batches == 0 {
            return Err(crate::VpqError::Training(format!(
                "Replay buffer of {} transitions is smaller than one batch of {}",
                buffer.len(),
                self.config.batch_size
            )));
        }

        log::info!(
            "Starting supervised training: epochs={}, num_batches={}",
            self.config.epochs,
            num_batches
        );
        let start = std::time::Instant::now();
        let mut last_loss = None;

        for epoch in 0..self.config.epochs {
            log::info!("=== Epoch {}/{} ===", epoch + 1, self.config.epochs);

            for _ in 0..num_batches {
                let batch = buffer.sample(self.config.batch_size, &mut self.rng);
                let loss = self.train_step(&batch)?;
                last_loss = Some(loss as f64);

                if self.step % self.config.log_every == 0 {
                    log::info!("Step {}: loss={:.6}", self.step, loss);
                }

                if self.step % self.config.eval_every == 0 {
                    if let Some(evaluator) = evaluator {
                        self.evaluate(evaluator)?;
                    }
                }
            }
        }

        log::info!("Training complete in {:.2?}", start.elapsed());

        if !self.metrics.is_empty() {
            self.metrics.write_csv()?;
        }
        self.save_checkpoint(last_loss)?;

        Ok(())
    }

    /// Save the network to `<checkpoint_dir>/<run_name>_final.safetensors`
    pub fn save_checkpoint(&self, loss: Option<f64>) -> crate::Result<PathBuf> {
        let path = self.config.checkpoint_path("final");
        log::info!("Saving model to {}", path.display());
        save_network(
            &self.varmap,
            &self.model_config,
            None,
            &path,
            self.step,
            self.config.learning_rate,
            loss,
        )?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, SasRecConfig};
    use crate::data::{SessionEvent, SessionLog};

    fn sessions() -> SessionLog {
        let events = (0..12u64)
            .flat_map(|s| {
                (0..4u32).map(move |i| SessionEvent {
                    session_id: s,
                    item_id: (s as u32 + i) % 10,
                    is_buy: i == 3,
                    timestamp: None,
                })
            })
            .collect();
        SessionLog::from_events(events)
    }

    fn training_config(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            epochs: 2,
            batch_size: 8,
            learning_rate: 0.01,
            log_every: 1,
            eval_every: 3,
            seed: Some(3),
            checkpoint_dir: dir.join("checkpoints").to_string_lossy().into_owned(),
            log_dir: dir.join("logs").to_string_lossy().into_owned(),
            run_name: "sasrec".to_string(),
            ..TrainingConfig::default()
        }
    }

    fn model_config() -> ModelConfig {
        let encoder = EncoderConfig::SasRec(SasRecConfig {
            hidden_size: 16,
            num_heads: 2,
            num_blocks: 1,
            dropout_rate: 0.1,
        });
        ModelConfig::supervised(10, 3, encoder)
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());

        let config = TrainingConfig {
            discount: 1.5,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_example_cross_entropy() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[0.0f32, 0.0], [10.0, 0.0]], &device)?;
        let targets = Tensor::new(&[1u32, 0], &device)?;

        let ce = per_example_cross_entropy(&logits, &targets)?.to_vec1::<f32>()?;
        assert!((ce[0] - 2f32.ln()).abs() < 1e-5);
        assert!(ce[1] < 1e-3);

        Ok(())
    }

    #[test]
    fn test_loss_decreases_on_repeated_batch() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut trainer = SupervisedTrainer::new(model_config(), training_config(dir.path()), Device::Cpu)?;

        let buffer = ReplayBuffer::from_sessions(&sessions(), 3, 10)?;
        let batch = buffer.gather(&(0..16).collect::<Vec<_>>());

        let first = trainer.train_step(&batch)?;
        let mut last = first;
        for _ in 0..30 {
            last = trainer.train_step(&batch)?;
        }

        assert!(last < first, "loss did not decrease: {} -> {}", first, last);
        assert_eq!(trainer.step(), 31);

        Ok(())
    }

    #[test]
    fn test_train_writes_logs_and_checkpoint() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = training_config(dir.path());
        let mut trainer = SupervisedTrainer::new(model_config(), config.clone(), Device::Cpu)?;

        let buffer = ReplayBuffer::from_sessions(&sessions(), 3, 10)?;
        let evaluator = Evaluator::new(sessions(), 3, 10, RewardConfig::default())?;

        trainer.train(&buffer, Some(&evaluator))?;

        // 48 transitions / 8 = 6 batches per epoch, 2 epochs, eval every 3 steps
        assert_eq!(trainer.step(), 12);
        assert_eq!(trainer.metrics().len(), 4);
        assert!(trainer.metrics().path().exists());
        assert!(config.checkpoint_path("final").exists());

        Ok(())
    }

    #[test]
    fn test_buffer_smaller_than_batch_is_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = TrainingConfig {
            batch_size: 1000,
            ..training_config(dir.path())
        };
        let mut trainer = SupervisedTrainer::new(model_config(), config, Device::Cpu)?;
        let buffer = ReplayBuffer::from_sessions(&sessions(), 3, 10)?;

        assert!(trainer.train(&buffer, None).is_err());

        Ok(())
    }
}
