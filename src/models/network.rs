/// Recommender network: sequence encoder with a Q-value head and a ranking head
use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;

use super::{build_encoder, SequenceEncoder, ValueHead};
use crate::config::ModelConfig;
use crate::data::SequenceBatch;
use crate::layers::Dense;

/// Encoder + optional Q-value head + cross-entropy logits head
///
/// The logits head ("ce-logits") ranks items at evaluation time. The Q-value
/// head only exists for networks trained with double Q-learning.
pub struct RecommenderNetwork {
    config: ModelConfig,
    encoder: Box<dyn SequenceEncoder>,
    value_head: Option<ValueHead>,
    logits_head: Dense,
    device: Device,
}

impl RecommenderNetwork {
    /// Create a new network
    ///
    /// # Arguments
    /// * `config` - Network configuration, validated first
    /// * `vb` - VarBuilder for parameter initialization; its prefix names the network
    pub fn new(config: ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let encoder = build_encoder(&config, vb.pp("encoder"))?;
        let hidden = encoder.hidden_size();

        let value_head = match &config.head {
            Some(head) => Some(ValueHead::new(head, hidden, config.item_num, vb.pp("head"))?),
            None => None,
        };
        let logits_head = Dense::new(hidden, config.item_num, true, vb.pp("ce_logits"))?;

        log::debug!(
            "Built {:?} network: item_num={}, state_size={}, hidden={}, head={:?}",
            config.encoder.kind(),
            config.item_num,
            config.state_size,
            hidden,
            value_head.as_ref().map(|h| h.method()),
        );

        Ok(Self {
            config,
            encoder,
            value_head,
            logits_head,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Ensemble size of the Q-value head, if any
    pub fn num_value_heads(&self) -> Option<usize> {
        self.value_head.as_ref().map(|h| h.num_heads())
    }

    /// Encoder state [batch, hidden]
    pub fn hidden(&self, batch: &SequenceBatch, train: bool) -> Result<Tensor> {
        self.encoder.encode(batch, train)
    }

    /// Cross-entropy logits [batch, item_num]
    pub fn logits(&self, batch: &SequenceBatch, train: bool) -> Result<Tensor> {
        self.logits_head.forward(&self.hidden(batch, train)?)
    }

    /// Q-values [batch, item_num]
    ///
    /// # Arguments
    /// * `batch` - Input histories
    /// * `coefficients` - Ensemble mixture weights (REM head)
    /// * `penalty` - Apply the ensemble stddev penalty (REM head)
    /// * `train` - Enables dropout
    pub fn q_values(
        &self,
        batch: &SequenceBatch,
        coefficients: &[f32],
        penalty: bool,
        train: bool,
    ) -> Result<Tensor> {
        let state = self.hidden(batch, train)?;
        self.q_from_state(&state, coefficients, penalty)
    }

    /// Q-values and logits from one encoder pass
    pub fn q_and_logits(
        &self,
        batch: &SequenceBatch,
        coefficients: &[f32],
        penalty: bool,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let state = self.hidden(batch, train)?;
        let q = self.q_from_state(&state, coefficients, penalty)?;
        let logits = self.logits_head.forward(&state)?;
        Ok((q, logits))
    }

    fn q_from_state(&self, state: &Tensor, coefficients: &[f32], penalty: bool) -> Result<Tensor> {
        let head = self.value_head.as_ref().ok_or_else(|| {
            candle_core::Error::Msg("network was built without a Q-value head".to_string())
        })?;

        if coefficients.len() != head.num_heads() {
            return Err(candle_core::Error::Msg(format!(
                "expected {} mixture coefficients, got {}",
                head.num_heads(),
                coefficients.len()
            )));
        }

        let coefficients = Tensor::from_slice(coefficients, coefficients.len(), &self.device)?;
        head.forward(state, &coefficients, penalty)
    }
}
