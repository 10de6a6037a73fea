/// Layer normalization over the last dimension
use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Default epsilon, as used by both encoders
pub const LAYER_NORM_EPS: f64 = 1e-8;

/// Layer normalization function without learnable parameters
///
/// Statistics are computed in f32 and the result is cast back to the
/// input dtype.
///
/// # Arguments
/// * `hidden_states` - Input tensor
/// * `eps` - Added to the variance for numerical stability
pub fn layer_norm(hidden_states: &Tensor, eps: f64) -> Result<Tensor> {
    let input_dtype = hidden_states.dtype();

    let hidden_states = if input_dtype != DType::F32 {
        hidden_states.to_dtype(DType::F32)?
    } else {
        hidden_states.clone()
    };

    let mean = hidden_states.mean_keepdim(D::Minus1)?;
    let centered = hidden_states.broadcast_sub(&mean)?;
    let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;

    let normalized = centered.broadcast_div(&(variance + eps)?.sqrt()?)?;

    if input_dtype != DType::F32 {
        normalized.to_dtype(input_dtype)
    } else {
        Ok(normalized)
    }
}

/// Layer normalization with learnable gain and bias
pub struct LayerNorm {
    gamma: Tensor,
    beta: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let gamma = vb.get_with_hints(hidden_size, "gamma", Init::Const(1.0))?;
        let beta = vb.get_with_hints(hidden_size, "beta", Init::Const(0.0))?;
        Ok(Self { gamma, beta, eps })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        layer_norm(x, self.eps)?
            .broadcast_mul(&self.gamma)?
            .broadcast_add(&self.beta)
    }
}
