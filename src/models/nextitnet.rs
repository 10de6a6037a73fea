/// NextItNet: a stack of dilated causal convolution residual blocks
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::{apply_mask, gather_last, SequenceEncoder};
use crate::config::NextItNetConfig;
use crate::data::SequenceBatch;
use crate::layers::normalization::LAYER_NORM_EPS;
use crate::layers::{DilatedCausalConv1d, ItemEmbedding, LayerNorm};

/// Residual block
///
/// `x + relu(ln(conv_2d(relu(ln(conv_d(x))))))`, where the second
/// convolution uses twice the dilation of the first.
pub struct ResidualBlock {
    conv1: DilatedCausalConv1d,
    norm1: LayerNorm,
    conv2: DilatedCausalConv1d,
    norm2: LayerNorm,
}

impl ResidualBlock {
    pub fn new(channels: usize, kernel_size: usize, dilation: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: DilatedCausalConv1d::new(channels, channels, kernel_size, dilation, vb.pp("conv1"))?,
            norm1: LayerNorm::new(channels, LAYER_NORM_EPS, vb.pp("norm1"))?,
            conv2: DilatedCausalConv1d::new(
                channels,
                channels,
                kernel_size,
                2 * dilation,
                vb.pp("conv2"),
            )?,
            norm2: LayerNorm::new(channels, LAYER_NORM_EPS, vb.pp("norm2"))?,
        })
    }

    /// [batch, seq_len, channels] -> [batch, seq_len, channels]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.norm1.forward(&self.conv1.forward(x)?)?.relu()?;
        let h = self.norm2.forward(&self.conv2.forward(&h)?)?.relu()?;
        h + x
    }
}

/// Dilated convolution sequence encoder
pub struct NextItNet {
    embedding: ItemEmbedding,
    blocks: Vec<ResidualBlock>,
    hidden_size: usize,
}

impl NextItNet {
    pub fn new(config: &NextItNetConfig, item_num: usize, vb: VarBuilder) -> Result<Self> {
        let embedding = ItemEmbedding::new(item_num, config.hidden_size, vb.pp("item_embedding"))?;

        let blocks = config
            .dilations
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                ResidualBlock::new(
                    config.hidden_size,
                    config.kernel_size,
                    dilation,
                    vb.pp(format!("blocks.{}", i)),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embedding,
            blocks,
            hidden_size: config.hidden_size,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl SequenceEncoder for NextItNet {
    fn encode(&self, batch: &SequenceBatch, _train: bool) -> Result<Tensor> {
        let mut seq = apply_mask(&self.embedding.forward(&batch.items)?, &batch.mask)?;

        for block in &self.blocks {
            seq = apply_mask(&block.forward(&seq)?, &batch.mask)?;
        }

        gather_last(&seq, &batch.lengths)
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
