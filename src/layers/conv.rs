/// Dilated causal 1-D convolution
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Convolution over the time axis that only looks backwards
///
/// The input is left-padded with `(kernel_size - 1) * dilation` zeros, so the
/// output at step t is a function of inputs at steps `<= t` only.
pub struct DilatedCausalConv1d {
    weight: Tensor, // [out_channels, in_channels, kernel_size]
    bias: Tensor,   // [out_channels]
    kernel_size: usize,
    dilation: usize,
}

impl DilatedCausalConv1d {
    /// # Arguments
    /// * `in_channels` - Input channels
    /// * `out_channels` - Output channels
    /// * `kernel_size` - Kernel width
    /// * `dilation` - Spacing between kernel taps
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;

        Ok(Self {
            weight,
            bias,
            kernel_size,
            dilation,
        })
    }

    pub fn receptive_field(&self) -> usize {
        (self.kernel_size - 1) * self.dilation + 1
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input [batch, seq_len, in_channels]
    ///
    /// # Returns
    /// Output [batch, seq_len, out_channels]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // [batch, seq_len, channels] -> [batch, channels, seq_len]
        let x = x.transpose(1, 2)?.contiguous()?;
        let x = x.pad_with_zeros(2, (self.kernel_size - 1) * self.dilation, 0)?;

        let y = x.conv1d(&self.weight, 0, 1, self.dilation, 1)?;
        let out_channels = self.bias.dim(0)?;
        let y = y.broadcast_add(&self.bias.reshape((1, out_channels, 1))?)?;

        y.transpose(1, 2)?.contiguous()
    }
}
