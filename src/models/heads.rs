/// Q-value heads
use candle_core::{Result, Tensor, D};
use candle_nn::VarBuilder;

use crate::config::{HeadConfig, QHeadMethod};
use crate::layers::Dense;
use crate::training::rem;

/// Maps an encoder state to one Q-value per item
pub enum ValueHead {
    /// Single dense layer
    Baseline { dense: Dense },
    /// Mean over K dense heads
    Mean { ensemble: EnsembleHead },
    /// Random convex mixture of K dense heads, optionally penalized by their spread
    Rem { ensemble: EnsembleHead, coef: f64 },
}

/// K dense heads computed as a single `hidden -> item_num * K` projection
pub struct EnsembleHead {
    dense: Dense,
    item_num: usize,
    num_heads: usize,
}

impl EnsembleHead {
    pub fn new(hidden_size: usize, item_num: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: Dense::new(hidden_size, item_num * num_heads, true, vb)?,
            item_num,
            num_heads,
        })
    }

    /// [batch, hidden] -> [batch, item_num, num_heads]
    pub fn forward(&self, state: &Tensor) -> Result<Tensor> {
        let batch_size = state.dim(0)?;
        self.dense
            .forward(state)?
            .reshape((batch_size, self.item_num, self.num_heads))
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }
}

impl ValueHead {
    pub fn new(config: &HeadConfig, hidden_size: usize, item_num: usize, vb: VarBuilder) -> Result<Self> {
        let head = match config.method {
            QHeadMethod::Baseline => Self::Baseline {
                dense: Dense::new(hidden_size, item_num, true, vb.pp("q_value"))?,
            },
            QHeadMethod::Mean => Self::Mean {
                ensemble: EnsembleHead::new(
                    hidden_size,
                    item_num,
                    config.num_multi_head,
                    vb.pp("multi_head"),
                )?,
            },
            QHeadMethod::Rem => Self::Rem {
                ensemble: EnsembleHead::new(
                    hidden_size,
                    item_num,
                    config.num_multi_head,
                    vb.pp("multi_head"),
                )?,
                coef: config.coef as f64,
            },
        };
        Ok(head)
    }

    pub fn method(&self) -> QHeadMethod {
        match self {
            Self::Baseline { .. } => QHeadMethod::Baseline,
            Self::Mean { .. } => QHeadMethod::Mean,
            Self::Rem { .. } => QHeadMethod::Rem,
        }
    }

    /// Number of ensemble members (1 for the baseline head)
    pub fn num_heads(&self) -> usize {
        match self {
            Self::Baseline { .. } => 1,
            Self::Mean { ensemble } | Self::Rem { ensemble, .. } => ensemble.num_heads(),
        }
    }

    /// Q-values for every item
    ///
    /// # Arguments
    /// * `state` - Encoder output [batch, hidden]
    /// * `coefficients` - Mixture weights [num_heads], only read by the REM head
    /// * `penalty` - Subtract `coef * std` over the ensemble (REM head, coef != 0)
    ///
    /// # Returns
    /// [batch, item_num]
    pub fn forward(&self, state: &Tensor, coefficients: &Tensor, penalty: bool) -> Result<Tensor> {
        match self {
            Self::Baseline { dense } => dense.forward(state),
            Self::Mean { ensemble } => ensemble.forward(state)?.mean(D::Minus1),
            Self::Rem { ensemble, coef } => {
                let q = ensemble.forward(state)?;
                let weight = if penalty { *coef } else { 0.0 };
                rem::penalized_q(&q, coefficients, weight)
            }
        }
    }
}
