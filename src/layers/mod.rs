/// Neural network layer primitives
///
/// Building blocks for the sequence encoders:
/// - Dense projections (Glorot initialized)
/// - Dilated causal convolutions (NextItNet)
/// - Causal multi-head self-attention and point-wise feed-forward (SASRec)
/// - Layer normalization
/// - Item and positional embeddings

pub mod attention;
pub mod conv;
pub mod embeddings;
pub mod feedforward;
pub mod linear;
pub mod normalization;

pub use attention::CausalSelfAttention;
pub use conv::DilatedCausalConv1d;
pub use embeddings::{ItemEmbedding, PositionalEmbedding};
pub use feedforward::PointwiseFeedForward;
pub use linear::Dense;
pub use normalization::LayerNorm;

use candle_core::{Result, Tensor};

/// Dropout that is only active while training
pub fn train_dropout(x: &Tensor, rate: f32, train: bool) -> Result<Tensor> {
    if train && rate > 0.0 {
        candle_nn::ops::dropout(x, rate)
    } else {
        Ok(x.clone())
    }
}
