/// Causal multi-head self-attention with padding masks
use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;

use super::linear::Dense;
use super::train_dropout;

/// Additive bias for masked attention scores
const MASK_VALUE: f32 = -1e9;

/// Multi-head scaled dot-product attention used by SASRec blocks
///
/// Supports:
/// - Separate query / key / value projections, no output projection
/// - Key masking for padded positions
/// - Causal masking (a position never attends to later positions)
/// - Query masking, so padded positions produce zero attention output
/// - Residual connection to the (normalized) queries
pub struct CausalSelfAttention {
    hidden_size: usize,
    head_dim: usize,
    num_heads: usize,
    dropout_rate: f32,

    q_proj: Dense,
    k_proj: Dense,
    v_proj: Dense,
}

impl CausalSelfAttention {
    /// Create new attention layer
    ///
    /// # Arguments
    /// * `hidden_size` - Input/output dimension, split evenly across heads
    /// * `num_heads` - Number of attention heads
    /// * `dropout_rate` - Dropout on the attention weights while training
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(candle_core::Error::Msg(format!(
                "hidden_size {} is not divisible by num_heads {}",
                hidden_size, num_heads
            )));
        }

        Ok(Self {
            hidden_size,
            head_dim: hidden_size / num_heads,
            num_heads,
            dropout_rate,
            q_proj: Dense::new(hidden_size, hidden_size, true, vb.pp("q_proj"))?,
            k_proj: Dense::new(hidden_size, hidden_size, true, vb.pp("k_proj"))?,
            v_proj: Dense::new(hidden_size, hidden_size, true, vb.pp("v_proj"))?,
        })
    }

    /// [batch, seq_len, hidden] -> [batch, num_heads, seq_len, head_dim]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;
        x.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `queries` - Query input [batch, seq_len, hidden_size]
    /// * `keys` - Key/value input [batch, seq_len, hidden_size]
    /// * `mask` - 1.0 for real items, 0.0 for padding [batch, seq_len]
    /// * `train` - Enables attention dropout
    ///
    /// # Returns
    /// Output tensor [batch, seq_len, hidden_size]
    pub fn forward(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _) = queries.dims3()?;

        let query = self.split_heads(&self.q_proj.forward(queries)?)?;
        let key = self.split_heads(&self.k_proj.forward(keys)?)?;
        let value = self.split_heads(&self.v_proj.forward(keys)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();

        // Q @ K^T: [batch, num_heads, seq_len, seq_len]
        let scores = (query.matmul(&key.transpose(2, 3)?.contiguous()?)? * scale)?;

        // Padded keys: 0 where mask is 1, MASK_VALUE where mask is 0
        let key_bias = mask
            .affine(-(MASK_VALUE as f64), MASK_VALUE as f64)?
            .reshape((batch_size, 1, 1, seq_len))?;
        let scores = scores.broadcast_add(&key_bias)?;

        let causal = create_causal_mask(seq_len, scores.device())?;
        let scores = scores.broadcast_add(&causal)?;

        let weights = candle_nn::ops::softmax_last_dim(&scores)?;

        // Padded queries attend to nothing
        let query_mask = mask.reshape((batch_size, 1, seq_len, 1))?;
        let weights = weights.broadcast_mul(&query_mask)?;
        let weights = train_dropout(&weights, self.dropout_rate, train)?;

        // weights @ V: [batch, num_heads, seq_len, head_dim]
        let output = weights.matmul(&value)?;

        // Concatenate heads: [batch, seq_len, hidden_size]
        let output = output
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.hidden_size))?;

        output + queries
    }
}

/// Create causal attention mask
///
/// Returns a [seq_len, seq_len] mask with 0 on/below the diagonal and a large
/// negative value above it.
pub fn create_causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask_data: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { MASK_VALUE } else { 0.0 }))
        .collect();

    Tensor::from_vec(mask_data, (seq_len, seq_len), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn attention(hidden: usize, heads: usize) -> Result<CausalSelfAttention> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        CausalSelfAttention::new(hidden, heads, 0.0, vb)
    }

    #[test]
    fn test_attention_shape() -> Result<()> {
        let device = Device::Cpu;
        let attn = attention(32, 4)?;

        let x = Tensor::randn(0f32, 1.0, (2, 6, 32), &device)?;
        let mask = Tensor::ones((2, 6), DType::F32, &device)?;
        let out = attn.forward(&x, &x, &mask, false)?;

        assert_eq!(out.dims(), &[2, 6, 32]);

        Ok(())
    }

    #[test]
    fn test_rejects_uneven_heads() {
        assert!(attention(30, 4).is_err());
    }

    #[test]
    fn test_attention_is_causal() -> Result<()> {
        let device = Device::Cpu;
        let attn = attention(16, 2)?;

        let mask = Tensor::ones((1, 5), DType::F32, &device)?;
        let x = Tensor::randn(0f32, 1.0, (1, 5, 16), &device)?;
        let y = attn.forward(&x, &x, &mask, false)?;

        // Perturb the last position only
        let head = x.narrow(1, 0, 4)?;
        let tail = Tensor::randn(0f32, 1.0, (1, 1, 16), &device)?;
        let x2 = Tensor::cat(&[&head, &tail], 1)?;
        let y2 = attn.forward(&x2, &x2, &mask, false)?;

        let diff = (y.narrow(1, 0, 4)? - y2.narrow(1, 0, 4)?)?
            .abs()?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-5, "earlier positions saw the future: {}", diff);

        Ok(())
    }

    #[test]
    fn test_padded_queries_pass_through() -> Result<()> {
        let device = Device::Cpu;
        let attn = attention(8, 1)?;

        let mask = Tensor::new(&[[1.0f32, 1.0, 0.0]], &device)?;
        let x = Tensor::randn(0f32, 1.0, (1, 3, 8), &device)?;
        let y = attn.forward(&x, &x, &mask, false)?;

        // Attention output is zeroed for the padded query, leaving the residual
        let diff = (y.narrow(1, 2, 1)? - x.narrow(1, 2, 1)?)?
            .abs()?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);

        Ok(())
    }

    #[test]
    fn test_causal_mask() -> Result<()> {
        let device = Device::Cpu;
        let mask = create_causal_mask(4, &device)?;

        assert_eq!(mask.dims(), &[4, 4]);

        let mask_vec = mask.flatten_all()?.to_vec1::<f32>()?;

        // First row: [0, -big, -big, -big]
        assert_eq!(mask_vec[0], 0.0);
        assert_eq!(mask_vec[1], MASK_VALUE);

        // Second row: [0, 0, -big, -big]
        assert_eq!(mask_vec[4], 0.0);
        assert_eq!(mask_vec[5], 0.0);
        assert_eq!(mask_vec[6], MASK_VALUE);

        Ok(())
    }
}
