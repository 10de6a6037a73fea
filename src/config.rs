/// Model configuration for the recommender networks
///
/// Defaults follow the hyper-parameters used for the RC15 and RetailRocket runs.
use std::fmt;
use std::str::FromStr;

/// Which sequence encoder to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    NextItNet,
    SasRec,
}

impl FromStr for EncoderKind {
    type Err = crate::VpqError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nextitnet" => Ok(Self::NextItNet),
            "sasrec" => Ok(Self::SasRec),
            other => Err(crate::VpqError::Config(format!(
                "Invalid encoder: {}. Must be 'nextitnet' or 'sasrec'",
                other
            ))),
        }
    }
}

/// Dilated causal convolution encoder configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NextItNetConfig {
    /// Embedding size, also the residual channel count
    pub hidden_size: usize,

    /// Dilation of the first convolution of each residual block.
    /// The second convolution uses twice this value.
    pub dilations: Vec<usize>,

    /// Convolution kernel width
    pub kernel_size: usize,
}

impl Default for NextItNetConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            dilations: vec![1, 2, 1, 2, 1, 2],
            kernel_size: 3,
        }
    }
}

/// Self-attention encoder configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SasRecConfig {
    /// Embedding/hidden dimension
    pub hidden_size: usize,

    /// Number of attention heads
    pub num_heads: usize,

    /// Number of attention + feed-forward blocks
    pub num_blocks: usize,

    /// Dropout probability used while training
    pub dropout_rate: f32,
}

impl Default for SasRecConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_heads: 1,
            num_blocks: 1,
            dropout_rate: 0.1,
        }
    }
}

/// Encoder configuration, tagged by encoder kind
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EncoderConfig {
    NextItNet(NextItNetConfig),
    SasRec(SasRecConfig),
}

impl EncoderConfig {
    /// Default configuration for an encoder kind
    pub fn default_for(kind: EncoderKind) -> Self {
        match kind {
            EncoderKind::NextItNet => Self::NextItNet(NextItNetConfig::default()),
            EncoderKind::SasRec => Self::SasRec(SasRecConfig::default()),
        }
    }

    pub fn kind(&self) -> EncoderKind {
        match self {
            Self::NextItNet(_) => EncoderKind::NextItNet,
            Self::SasRec(_) => EncoderKind::SasRec,
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            Self::NextItNet(c) => c.hidden_size,
            Self::SasRec(c) => c.hidden_size,
        }
    }
}

/// How the Q-value head turns the encoder state into action values
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QHeadMethod {
    /// A single dense layer
    Baseline,
    /// Mean over an ensemble of heads
    Mean,
    /// Random ensemble mixture with an optional stddev penalty
    Rem,
}

impl FromStr for QHeadMethod {
    type Err = crate::VpqError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "mean" => Ok(Self::Mean),
            "rem" => Ok(Self::Rem),
            other => Err(crate::VpqError::Config(format!(
                "Invalid method: {}. Must be 'baseline', 'mean' or 'rem'",
                other
            ))),
        }
    }
}

impl fmt::Display for QHeadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Baseline => "baseline",
            Self::Mean => "mean",
            Self::Rem => "rem",
        };
        f.write_str(name)
    }
}

/// Q-value head configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HeadConfig {
    pub method: QHeadMethod,

    /// Ensemble size K for the mean and REM heads
    pub num_multi_head: usize,

    /// Weight of the ensemble stddev penalty (REM only, 0 disables it)
    pub coef: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            method: QHeadMethod::Rem,
            num_multi_head: 15,
            coef: 0.0,
        }
    }
}

/// Full network configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    /// Number of items; item id `item_num` is the padding id
    pub item_num: usize,

    /// Length of the item history that defines a state
    pub state_size: usize,

    pub encoder: EncoderConfig,

    /// Q-value head; `None` builds a supervised-only network
    pub head: Option<HeadConfig>,
}

impl ModelConfig {
    /// Supervised network (cross-entropy head only)
    pub fn supervised(item_num: usize, state_size: usize, encoder: EncoderConfig) -> Self {
        Self {
            item_num,
            state_size,
            encoder,
            head: None,
        }
    }

    /// Network with a Q-value head for double Q-learning
    pub fn with_q_head(
        item_num: usize,
        state_size: usize,
        encoder: EncoderConfig,
        head: HeadConfig,
    ) -> Self {
        Self {
            item_num,
            state_size,
            encoder,
            head: Some(head),
        }
    }

    /// Padding item id
    pub fn pad_item(&self) -> u32 {
        self.item_num as u32
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.item_num == 0 {
            return Err(crate::VpqError::Config("item_num must be > 0".to_string()));
        }

        if self.state_size == 0 {
            return Err(crate::VpqError::Config(
                "state_size must be > 0".to_string(),
            ));
        }

        match &self.encoder {
            EncoderConfig::NextItNet(c) => {
                if c.hidden_size == 0 {
                    return Err(crate::VpqError::Config(
                        "hidden_size must be > 0".to_string(),
                    ));
                }
                if c.dilations.is_empty() || c.dilations.contains(&0) {
                    return Err(crate::VpqError::Config(
                        "dilations must be non-empty and > 0".to_string(),
                    ));
                }
                if c.kernel_size == 0 {
                    return Err(crate::VpqError::Config(
                        "kernel_size must be > 0".to_string(),
                    ));
                }
            }
            EncoderConfig::SasRec(c) => {
                if c.hidden_size == 0 || c.num_heads == 0 || c.num_blocks == 0 {
                    return Err(crate::VpqError::Config(
                        "hidden_size, num_heads and num_blocks must be > 0".to_string(),
                    ));
                }
                if c.hidden_size % c.num_heads != 0 {
                    return Err(crate::VpqError::Config(
                        "hidden_size must be divisible by num_heads".to_string(),
                    ));
                }
                if !(0.0..1.0).contains(&c.dropout_rate) {
                    return Err(crate::VpqError::Config(format!(
                        "dropout_rate must be in [0, 1), got {}",
                        c.dropout_rate
                    )));
                }
            }
        }

        if let Some(head) = &self.head {
            if head.num_multi_head == 0 {
                return Err(crate::VpqError::Config(
                    "num_multi_head must be > 0".to_string(),
                ));
            }
            if head.coef < 0.0 || !head.coef.is_finite() {
                return Err(crate::VpqError::Config(format!(
                    "coef must be a finite value >= 0, got {}",
                    head.coef
                )));
            }
        }

        Ok(())
    }
}

/// Rewards assigned to logged behaviours
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RewardConfig {
    pub click: f32,
    pub buy: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            click: 0.2,
            buy: 1.0,
        }
    }
}

impl RewardConfig {
    pub fn reward(&self, is_buy: bool) -> f32 {
        if is_buy {
            self.buy
        } else {
            self.click
        }
    }
}
