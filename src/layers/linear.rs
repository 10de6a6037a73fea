/// Dense (fully connected) layer
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Affine layer `x @ W^T + b`
///
/// Weights use Glorot uniform initialization and the bias starts at zero,
/// matching the fully connected layers of the reference training scripts.
pub struct Dense {
    weight: Tensor,
    bias: Option<Tensor>,
    out_features: usize,
}

impl Dense {
    /// Create new Dense layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include bias
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let bound = (6.0 / (in_features + out_features) as f64).sqrt();
        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;

        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            out_features,
        })
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Forward pass over the last dimension of `input`
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        // weight is [out_features, in_features], so weight^T is [in_features, out_features]
        let output = input.broadcast_matmul(&self.weight.t()?)?;

        match &self.bias {
            Some(bias) => output.broadcast_add(bias),
            None => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_dense_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let dense = Dense::new(64, 128, true, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 16, 64), &device)?;
        assert_eq!(dense.forward(&x)?.dims(), &[2, 16, 128]);

        let x = Tensor::randn(0f32, 1.0, (4, 64), &device)?;
        assert_eq!(dense.forward(&x)?.dims(), &[4, 128]);

        Ok(())
    }

    #[test]
    fn test_dense_init_bounds() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let dense = Dense::new(10, 20, true, vb)?;

        let bound = (6.0f32 / 30.0).sqrt();
        let max = dense.weight.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(max <= bound + 1e-6);

        let bias_sum = dense.bias.as_ref().unwrap().abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(bias_sum, 0.0);

        Ok(())
    }
}
