/// Command-line training for the sequential recommenders
use std::path::{Path, PathBuf};

use candle_core::Device;
use clap::{Args, Parser, Subcommand};

use vpq_rec::config::{EncoderKind, NextItNetConfig, SasRecConfig};
use vpq_rec::data::{DataStatistics, ReplayBuffer, SessionLog};
use vpq_rec::evaluation::Evaluator;
use vpq_rec::training::{DoubleQTrainer, SupervisedTrainer, TrainingConfig};
use vpq_rec::{EncoderConfig, HeadConfig, ModelConfig, QHeadMethod, RewardConfig};

const STATISTICS_FILE: &str = "data_statis.json";
const REPLAY_BUFFER_DIR: &str = "replay_buffer";
const TEST_SESSIONS_FILE: &str = "sampled_test.csv";

#[derive(Parser, Debug)]
#[command(name = "vpq-train", version, about = "Train NextItNet / SASRec recommenders on logged sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervised next-item training with cross-entropy
    Supervised {
        #[command(flatten)]
        common: CommonArgs,

        /// Log the loss every N steps
        #[arg(long, default_value_t = 200)]
        log_every: usize,
    },

    /// Double Q-learning with a baseline, mean or REM value head
    DoubleQ {
        #[command(flatten)]
        common: CommonArgs,

        /// Value head: baseline, mean or rem
        #[arg(long, default_value = "rem", value_parser = parse_method)]
        method: QHeadMethod,

        /// Weight of the ensemble stddev penalty (rem only)
        #[arg(long, default_value_t = 0.0)]
        coef: f32,

        /// Ensemble size of the mean / rem heads
        #[arg(long, default_value_t = 15)]
        num_multi_head: usize,

        /// Discount factor
        #[arg(long, default_value_t = 0.5)]
        discount: f32,

        /// Log Q statistics every N steps
        #[arg(long, default_value_t = 100)]
        log_every: usize,
    },

    /// Turn a training session log into a replay buffer directory
    BuildReplay {
        /// CSV with session_id,item_id,is_buy[,timestamp]
        #[arg(long)]
        sessions: PathBuf,

        /// Output data directory
        #[arg(long)]
        out: PathBuf,

        /// History length of a state
        #[arg(long, default_value_t = 10)]
        state_size: usize,

        /// Number of items; defaults to the largest item id + 1
        #[arg(long)]
        item_num: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Data directory with data_statis.json, replay_buffer/ and sampled_test.csv
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Sequence encoder: nextitnet or sasrec
    #[arg(long, default_value = "nextitnet", value_parser = parse_encoder)]
    encoder: EncoderKind,

    /// Number of epochs (10 for supervised, 30 for double-q if unset)
    #[arg(long)]
    epoch: Option<usize>,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Embedding size
    #[arg(long, default_value_t = 64)]
    hidden_factor: usize,

    /// Reward of a click
    #[arg(long, default_value_t = 0.2)]
    r_click: f32,

    /// Reward of a purchase
    #[arg(long, default_value_t = 1.0)]
    r_buy: f32,

    #[arg(long, default_value_t = 0.005)]
    lr: f64,

    /// SASRec attention heads
    #[arg(long, default_value_t = 1)]
    num_heads: usize,

    /// SASRec blocks
    #[arg(long, default_value_t = 1)]
    num_blocks: usize,

    /// SASRec dropout
    #[arg(long, default_value_t = 0.1)]
    dropout_rate: f32,

    /// Evaluate every N steps
    #[arg(long, default_value_t = 2000)]
    eval_every: usize,

    /// Run name for logs and checkpoints
    #[arg(long, default_value = "run")]
    out: String,

    #[arg(long, default_value = "log_data")]
    log_dir: String,

    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: String,

    #[arg(long)]
    seed: Option<u64>,

    /// Force CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn parse_encoder(s: &str) -> Result<EncoderKind, String> {
    s.parse().map_err(|e: vpq_rec::VpqError| e.to_string())
}

fn parse_method(s: &str) -> Result<QHeadMethod, String> {
    s.parse().map_err(|e: vpq_rec::VpqError| e.to_string())
}

impl CommonArgs {
    fn encoder_config(&self) -> EncoderConfig {
        match self.encoder {
            EncoderKind::NextItNet => EncoderConfig::NextItNet(NextItNetConfig {
                hidden_size: self.hidden_factor,
                ..NextItNetConfig::default()
            }),
            EncoderKind::SasRec => EncoderConfig::SasRec(SasRecConfig {
                hidden_size: self.hidden_factor,
                num_heads: self.num_heads,
                num_blocks: self.num_blocks,
                dropout_rate: self.dropout_rate,
            }),
        }
    }

    fn training_config(&self, default_epochs: usize, log_every: usize, discount: f32) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epoch.unwrap_or(default_epochs),
            batch_size: self.batch_size,
            learning_rate: self.lr,
            discount,
            rewards: RewardConfig {
                click: self.r_click,
                buy: self.r_buy,
            },
            log_every,
            eval_every: self.eval_every,
            seed: self.seed,
            checkpoint_dir: self.checkpoint_dir.clone(),
            log_dir: self.log_dir.clone(),
            run_name: self.out.clone(),
        }
    }

    fn device(&self) -> anyhow::Result<Device> {
        // Try CUDA first, fallback to CPU
        let device = if !self.cpu && candle_core::utils::cuda_is_available() {
            Device::new_cuda(0)?
        } else {
            Device::Cpu
        };
        log::info!("Using device: {:?}", device);
        Ok(device)
    }
}

/// Statistics, replay buffer and (optional) evaluator of a data directory
struct Dataset {
    statistics: DataStatistics,
    buffer: ReplayBuffer,
    evaluator: Option<Evaluator>,
}

fn load_dataset(data: &Path, rewards: RewardConfig) -> anyhow::Result<Dataset> {
    let statistics = DataStatistics::from_directory(data)?;
    log::info!(
        "state_size={}, item_num={}",
        statistics.state_size,
        statistics.item_num
    );

    let buffer = ReplayBuffer::from_directory(data.join(REPLAY_BUFFER_DIR))?;
    buffer.validate_items(statistics.item_num)?;
    if buffer.state_size() != statistics.state_size {
        anyhow::bail!(
            "replay buffer state size {} does not match data_statis.json ({})",
            buffer.state_size(),
            statistics.state_size
        );
    }

    let test_path = data.join(TEST_SESSIONS_FILE);
    let evaluator = if test_path.exists() {
        let sessions = SessionLog::from_csv(&test_path)?;
        Some(Evaluator::new(
            sessions,
            statistics.state_size,
            statistics.item_num,
            rewards,
        )?)
    } else {
        log::warn!("{} not found, evaluation disabled", test_path.display());
        None
    };

    Ok(Dataset {
        statistics,
        buffer,
        evaluator,
    })
}

fn run_supervised(common: CommonArgs, log_every: usize) -> anyhow::Result<()> {
    let device = common.device()?;
    let training_config = common.training_config(10, log_every, 0.0);
    let dataset = load_dataset(&common.data, training_config.rewards)?;

    let model_config = ModelConfig::supervised(
        dataset.statistics.item_num,
        dataset.statistics.state_size,
        common.encoder_config(),
    );
    log::info!("Model configuration: {:#?}", model_config);

    let mut trainer = SupervisedTrainer::new(model_config, training_config, device)?;
    trainer.train(&dataset.buffer, dataset.evaluator.as_ref())?;

    Ok(())
}

fn run_double_q(common: CommonArgs, head: HeadConfig, discount: f32, log_every: usize) -> anyhow::Result<()> {
    let device = common.device()?;
    let training_config = common.training_config(30, log_every, discount);
    let dataset = load_dataset(&common.data, training_config.rewards)?;

    let model_config = ModelConfig::with_q_head(
        dataset.statistics.item_num,
        dataset.statistics.state_size,
        common.encoder_config(),
        head,
    );
    log::info!("Model configuration: {:#?}", model_config);

    let mut trainer = DoubleQTrainer::new(model_config, training_config, device)?;
    trainer.train(&dataset.buffer, dataset.evaluator.as_ref())?;

    Ok(())
}

fn run_build_replay(
    sessions: &Path,
    out: &Path,
    state_size: usize,
    item_num: Option<usize>,
) -> anyhow::Result<()> {
    let log = SessionLog::from_csv(sessions)?;
    let item_num = match item_num {
        Some(n) => n,
        None => log
            .max_item_id()
            .map(|max| max as usize + 1)
            .ok_or_else(|| anyhow::anyhow!("{} contains no events", sessions.display()))?,
    };

    let buffer = ReplayBuffer::from_sessions(&log, state_size, item_num)?;
    buffer.save(out.join(REPLAY_BUFFER_DIR))?;

    let statistics = DataStatistics {
        state_size,
        item_num,
    };
    let file = std::fs::File::create(out.join(STATISTICS_FILE))?;
    serde_json::to_writer_pretty(file, &statistics)?;

    log::info!(
        "Wrote replay buffer ({} transitions) and {} to {}",
        buffer.len(),
        STATISTICS_FILE,
        out.display()
    );

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let start = std::time::Instant::now();

    match cli.command {
        Command::Supervised { common, log_every } => run_supervised(common, log_every)?,
        Command::DoubleQ {
            common,
            method,
            coef,
            num_multi_head,
            discount,
            log_every,
        } => {
            let head = HeadConfig {
                method,
                num_multi_head,
                coef,
            };
            run_double_q(common, head, discount, log_every)?
        }
        Command::BuildReplay {
            sessions,
            out,
            state_size,
            item_num,
        } => run_build_replay(&sessions, &out, state_size, item_num)?,
    }

    log::info!("Done in {:.2?}", start.elapsed());
    Ok(())
}
