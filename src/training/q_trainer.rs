/// Double Q-learning over two networks with a REM value head
use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::Rng;

use super::double_q::double_q_learning;
use super::rem;
use super::trainer::{adam, per_example_cross_entropy, TrainingConfig};
use crate::config::ModelConfig;
use crate::data::{ReplayBuffer, TransitionBatch};
use crate::evaluation::{EvalReport, Evaluator, MetricsLog, ScalarSeries};
use crate::models::{save_network, RecommenderNetwork};

/// Variable prefixes of the two networks
pub const NETWORK_NAMES: [&str; 2] = ["NextRec1", "NextRec2"];

/// Statistics of one training step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    /// Index of the network that was updated
    pub main: usize,
    /// `mean(q_loss + weighted_ce)`
    pub loss: f32,
    pub q_loss: f32,
    /// Cross-entropy weighted by the (gradient-free) Q-value of the logged action
    pub weighted_ce: f32,
    pub naive_ce: f32,
    /// Mean of `Q(s, a)` over the batch
    pub q_mean: f32,
    /// Population std of `Q(s, a)` over the batch
    pub q_std: f32,
}

struct QNetwork {
    network: RecommenderNetwork,
    varmap: VarMap,
    optimizer: AdamW,
}

impl QNetwork {
    fn new(model_config: &ModelConfig, name: &str, learning_rate: f64, device: &Device) -> crate::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let network = RecommenderNetwork::new(model_config.clone(), vb.pp(name))?;
        let optimizer = adam(&varmap, learning_rate)?;

        Ok(Self {
            network,
            varmap,
            optimizer,
        })
    }
}

/// Trains two networks that swap the main/target roles at random every step
///
/// The main network selects the bootstrap action and is updated; the target
/// network evaluates it. Both heads are trained jointly: the Q-value head on
/// the TD loss and the logits head on a cross-entropy weighted by `Q(s, a)`.
pub struct DoubleQTrainer {
    networks: [QNetwork; 2],
    model_config: ModelConfig,
    config: TrainingConfig,
    device: Device,
    rng: StdRng,
    metrics: MetricsLog,
    q_mean_log: ScalarSeries,
    q_std_log: ScalarSeries,
    step: usize,
}

impl DoubleQTrainer {
    /// Create new trainer
    ///
    /// `model_config` must carry a Q-value head.
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;
        if model_config.head.is_none() {
            return Err(crate::VpqError::Config(
                "double Q-learning needs a Q-value head".to_string(),
            ));
        }

        let lr = training_config.learning_rate;
        let networks = [
            QNetwork::new(&model_config, NETWORK_NAMES[0], lr, &device)?,
            QNetwork::new(&model_config, NETWORK_NAMES[1], lr, &device)?,
        ];

        let log_dir = &training_config.log_dir;
        let run = &training_config.run_name;

        Ok(Self {
            networks,
            model_config,
            rng: training_config.rng(),
            metrics: MetricsLog::new(log_dir, run),
            q_mean_log: ScalarSeries::new(log_dir, "q_mean_log", run),
            q_std_log: ScalarSeries::new(log_dir, "q_std_log", run),
            config: training_config,
            device,
            step: 0,
        })
    }

    /// Network by index (0 is evaluated)
    pub fn network(&self, index: usize) -> &RecommenderNetwork {
        &self.networks[index % 2].network
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn metrics(&self) -> &MetricsLog {
        &self.metrics
    }

    pub fn q_mean_log(&self) -> &ScalarSeries {
        &self.q_mean_log
    }

    pub fn q_std_log(&self) -> &ScalarSeries {
        &self.q_std_log
    }

    fn num_value_heads(&self) -> usize {
        self.networks[0].network.num_value_heads().unwrap_or(1)
    }

    /// One update of a randomly chosen main network
    pub fn train_step(&mut self, batch: &TransitionBatch) -> crate::Result<StepStats> {
        let main = self.rng.gen_range(0..2);
        let target = 1 - main;

        let k = self.num_value_heads();
        let random_coef = rem::random_coefficients(k, &mut self.rng);
        let uniform_coef = rem::uniform_coefficients(k);

        let pad_item = self.model_config.pad_item();
        let next_state = batch.next_state_batch(pad_item, &self.device)?;
        let state = batch.state_batch(pad_item, &self.device)?;
        let batch_size = batch.len();

        // Bootstrap values: evaluated by the target network, selected by the main one
        let target_qs = self.networks[target]
            .network
            .q_values(&next_state, &random_coef, true, true)?
            .detach();
        let selector_qs = self.networks[main]
            .network
            .q_values(&next_state, &uniform_coef, true, true)?
            .detach();

        // Terminal transitions do not bootstrap
        let not_done = batch.not_done_tensor(&self.device)?.unsqueeze(1)?;
        let target_qs = target_qs.broadcast_mul(&not_done)?;

        let rewards = Tensor::from_vec(batch.rewards(&self.config.rewards), batch_size, &self.device)?;
        let discounts = Tensor::full(self.config.discount, batch_size, &self.device)?;
        let actions = batch.actions_tensor(&self.device)?;

        let (q, logits) = self.networks[main]
            .network
            .q_and_logits(&state, &random_coef, false, true)?;

        let td = double_q_learning(&q, &actions, &rewards, &discounts, &target_qs, &selector_qs)?;
        let q_indexed = td.q_indexed.detach();

        let naive_ce = per_example_cross_entropy(&logits, &actions)?;
        let weighted_ce = (&q_indexed * &naive_ce)?;

        let loss = (&td.loss + &weighted_ce)?.mean_all()?;
        let loss_val = loss.to_scalar::<f32>()?;
        if !loss_val.is_finite() {
            return Err(crate::VpqError::Training(format!(
                "Non-finite loss at step {}: {}",
                self.step, loss_val
            )));
        }

        self.networks[main].optimizer.backward_step(&loss)?;
        self.step += 1;

        let q_mean = q_indexed.mean_all()?.to_scalar::<f32>()?;
        let q_std = (&q_indexed - q_mean as f64)?
            .sqr()?
            .mean_all()?
            .sqrt()?
            .to_scalar::<f32>()?;

        Ok(StepStats {
            main,
            loss: loss_val,
            q_loss: td.loss.mean_all()?.to_scalar::<f32>()?,
            weighted_ce: weighted_ce.mean_all()?.to_scalar::<f32>()?,
            naive_ce: naive_ce.mean_all()?.to_scalar::<f32>()?,
            q_mean,
            q_std,
        })
    }

    /// Evaluate the first network's logits head and append to the metrics log
    pub fn evaluate(&mut self, evaluator: &Evaluator) -> crate::Result<EvalReport> {
        log::info!("Starting evaluation at step {}", self.step);
        let report = evaluator.evaluate(&self.networks[0].network)?;
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
            "Starting double Q-learning: epochs={}, num_batches={}, method={:?}",
            self.config.epochs,
            num_batches,
            self.model_config.head.as_ref().map(|h| h.method),
        );
        let start = std::time::Instant::now();
        let mut last_loss = None;

        for epoch in 0..self.config.epochs {
            log::info!("=== Epoch {}/{} ===", epoch + 1, self.config.epochs);

            for _ in 0..num_batches {
                let batch = buffer.sample(self.config.batch_size, &mut self.rng);
                let stats = self.train_step(&batch)?;
                last_loss = Some(stats.loss as f64);

                if self.step % self.config.log_every == 0 {
                    log::info!(
                        "Step {}: naive_ce={:.3} weighted_ce={:.3} q_loss={:.3}",
                        self.step,
                        stats.naive_ce,
                        stats.weighted_ce,
                        stats.q_loss
                    );
                    log::info!("q_mean={:.3} q_std={:.3}", stats.q_mean, stats.q_std);
                    self.q_mean_log.push(stats.q_mean as f64);
                    self.q_std_log.push(stats.q_std as f64);
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
        self.q_mean_log.write_csv()?;
        self.q_std_log.write_csv()?;
        self.save_checkpoints(last_loss)?;

        Ok(())
    }

    /// Save both networks as `<checkpoint_dir>/<run_name>_<NextRecN>.safetensors`
    pub fn save_checkpoints(&self, loss: Option<f64>) -> crate::Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(2);
        for (q_network, name) in self.networks.iter().zip(NETWORK_NAMES) {
            let path = self.config.checkpoint_path(name);
            log::info!("Saving {} to {}", name, path.display());
            save_network(
                &q_network.varmap,
                &self.model_config,
                Some(name),
                &path,
                self.step,
                self.config.learning_rate,
                loss,
            )?;
            paths.push(path);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, EncoderKind, HeadConfig, NextItNetConfig, QHeadMethod};
    use crate::data::{SessionEvent, SessionLog};
    use crate::models::load_network;

    fn sessions() -> SessionLog {
        let events = (0..10u64)
            .flat_map(|s| {
                (0..5u32).map(move |i| SessionEvent {
                    session_id: s,
                    item_id: (2 * s as u32 + i) % 12,
                    is_buy: i % 3 == 2,
                    timestamp: None,
                })
            })
            .collect();
        SessionLog::from_events(events)
    }

    fn model_config(method: QHeadMethod, coef: f32) -> ModelConfig {
        let encoder = EncoderConfig::NextItNet(NextItNetConfig {
            hidden_size: 16,
            dilations: vec![1, 2],
            kernel_size: 3,
        });
        ModelConfig::with_q_head(
            12,
            4,
            encoder,
            HeadConfig {
                method,
                num_multi_head: 3,
                coef,
            },
        )
    }

    fn training_config(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            epochs: 2,
            batch_size: 10,
            learning_rate: 0.005,
            log_every: 2,
            eval_every: 5,
            seed: Some(11),
            checkpoint_dir: dir.join("checkpoints").to_string_lossy().into_owned(),
            log_dir: dir.join("logs").to_string_lossy().into_owned(),
            run_name: "rem".to_string(),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_requires_value_head() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ModelConfig::supervised(12, 4, EncoderConfig::default_for(EncoderKind::NextItNet));
        assert!(DoubleQTrainer::new(config, training_config(dir.path()), Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn test_train_step_updates_only_main() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut trainer = DoubleQTrainer::new(
            model_config(QHeadMethod::Rem, 1.0),
            training_config(dir.path()),
            Device::Cpu,
        )?;
        let buffer = ReplayBuffer::from_sessions(&sessions(), 4, 12)?;
        let batch = buffer.gather(&(0..10).collect::<Vec<_>>());

        let snapshot = |trainer: &DoubleQTrainer, i: usize| -> crate::Result<f32> {
            let vars = trainer.networks[i].varmap.all_vars();
            let mut total = 0.0;
            for var in vars {
                total += var.as_tensor().abs()?.sum_all()?.to_scalar::<f32>()?;
            }
            Ok(total)
        };
        let before = [snapshot(&trainer, 0)?, snapshot(&trainer, 1)?];

        let stats = trainer.train_step(&batch)?;
        assert!(stats.loss.is_finite());
        assert!(stats.q_std >= 0.0);
        assert!((stats.loss - (stats.q_loss + stats.weighted_ce)).abs() < 1e-4);
        assert_eq!(trainer.step(), 1);

        let after = [snapshot(&trainer, 0)?, snapshot(&trainer, 1)?];
        assert_ne!(before[stats.main], after[stats.main]);
        assert_eq!(before[1 - stats.main], after[1 - stats.main]);

        Ok(())
    }

    #[test]
    fn test_terminal_transitions_regress_to_reward() -> crate::Result<()> {
        // One event per session: every transition is terminal
        let events = (0..10u64)
            .map(|s| SessionEvent {
                session_id: s,
                item_id: s as u32,
                is_buy: s % 2 == 0,
                timestamp: None,
            })
            .collect();
        let buffer = ReplayBuffer::from_sessions(&SessionLog::from_events(events), 4, 12)?;
        let batch = buffer.gather(&(0..10).collect::<Vec<_>>());
        assert!(batch.is_done.iter().all(|&d| d));

        let dir = tempfile::tempdir()?;
        let config = training_config(dir.path());
        let mut trainer = DoubleQTrainer::new(model_config(QHeadMethod::Mean, 0.0), config.clone(), Device::Cpu)?;

        // The mean head ignores mixture weights, so Q(s, a) is reproducible
        let state = batch.state_batch(trainer.model_config.pad_item(), &Device::Cpu)?;
        let coef = rem::uniform_coefficients(trainer.num_value_heads());
        let q_before = [
            trainer.network(0).q_values(&state, &coef, true, false)?.to_vec2::<f32>()?,
            trainer.network(1).q_values(&state, &coef, true, false)?.to_vec2::<f32>()?,
        ];

        let stats = trainer.train_step(&batch)?;

        let rewards = batch.rewards(&config.rewards);
        assert_eq!(rewards[0], config.rewards.buy);
        assert_eq!(rewards[1], config.rewards.click);

        let q_main: Vec<f32> = batch
            .actions
            .iter()
            .enumerate()
            .map(|(i, &a)| q_before[stats.main][i][a as usize])
            .collect();
        let expected_q_loss = q_main
            .iter()
            .zip(rewards.iter())
            .map(|(q, r)| 0.5 * (r - q) * (r - q))
            .sum::<f32>()
            / q_main.len() as f32;
        let expected_q_mean = q_main.iter().sum::<f32>() / q_main.len() as f32;

        assert!(
            (stats.q_loss - expected_q_loss).abs() < 1e-5,
            "q_loss {} != {}",
            stats.q_loss,
            expected_q_loss
        );
        assert!((stats.q_mean - expected_q_mean).abs() < 1e-5);

        Ok(())
    }

    #[test]
    fn test_every_head_method_trains() -> crate::Result<()> {
        let buffer = ReplayBuffer::from_sessions(&sessions(), 4, 12)?;

        for (method, coef) in [
            (QHeadMethod::Baseline, 0.0),
            (QHeadMethod::Mean, 0.0),
            (QHeadMethod::Rem, 0.0),
            (QHeadMethod::Rem, 0.5),
        ] {
            let dir = tempfile::tempdir()?;
            let mut trainer =
                DoubleQTrainer::new(model_config(method, coef), training_config(dir.path()), Device::Cpu)?;
            for _ in 0..3 {
                let batch = buffer.sample(10, &mut trainer.rng);
                let stats = trainer.train_step(&batch)?;
                assert!(stats.loss.is_finite(), "{:?} produced {:?}", method, stats);
            }
        }

        Ok(())
    }

    #[test]
    fn test_train_writes_logs_and_checkpoints() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = training_config(dir.path());
        let mut trainer = DoubleQTrainer::new(model_config(QHeadMethod::Rem, 0.5), config.clone(), Device::Cpu)?;

        let buffer = ReplayBuffer::from_sessions(&sessions(), 4, 12)?;
        let evaluator = Evaluator::new(sessions(), 4, 12, config.rewards)?;

        trainer.train(&buffer, Some(&evaluator))?;

        // 50 transitions / 10 = 5 batches per epoch, 2 epochs
        assert_eq!(trainer.step(), 10);
        assert_eq!(trainer.q_mean_log().values().len(), 5);
        assert_eq!(trainer.q_std_log().values().len(), 5);
        assert_eq!(trainer.metrics().len(), 2);

        assert!(trainer.metrics().path().exists());
        assert!(trainer.q_mean_log().path().exists());
        assert!(trainer.q_std_log().path().exists());

        // Checkpoints reload with their own prefix
        let reloaded = load_network(config.checkpoint_path("NextRec2"), &Device::Cpu)?;
        assert_eq!(reloaded.config(), &model_config(QHeadMethod::Rem, 0.5));

        Ok(())
    }
}
