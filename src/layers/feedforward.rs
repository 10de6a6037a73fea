/// Position-wise feed-forward block
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::linear::Dense;
use super::train_dropout;

/// Two dense layers applied independently at every position
///
/// `x + dropout(W2 · dropout(relu(W1 · x)))`
pub struct PointwiseFeedForward {
    inner: Dense,
    outer: Dense,
    dropout_rate: f32,
}

impl PointwiseFeedForward {
    /// # Arguments
    /// * `hidden_size` - Input and output dimension
    /// * `inner_size` - Width of the intermediate layer
    /// * `dropout_rate` - Dropout after each layer while training
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        hidden_size: usize,
        inner_size: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            inner: Dense::new(hidden_size, inner_size, true, vb.pp("inner"))?,
            outer: Dense::new(inner_size, hidden_size, true, vb.pp("outer"))?,
            dropout_rate,
        })
    }

    /// [batch, seq_len, hidden_size] -> [batch, seq_len, hidden_size]
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.inner.forward(x)?.relu()?;
        let h = train_dropout(&h, self.dropout_rate, train)?;
        let h = self.outer.forward(&h)?;
        let h = train_dropout(&h, self.dropout_rate, train)?;
        h + x
    }
}
