/// SASRec: causal self-attention sequence encoder
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::{apply_mask, gather_last, SequenceEncoder};
use crate::config::SasRecConfig;
use crate::data::SequenceBatch;
use crate::layers::normalization::LAYER_NORM_EPS;
use crate::layers::{
    train_dropout, CausalSelfAttention, ItemEmbedding, LayerNorm, PointwiseFeedForward,
    PositionalEmbedding,
};

/// Attention + feed-forward block, both fed with pre-normalized input
pub struct SasRecBlock {
    attention_norm: LayerNorm,
    attention: CausalSelfAttention,
    ffn_norm: LayerNorm,
    ffn: PointwiseFeedForward,
}

impl SasRecBlock {
    pub fn new(config: &SasRecConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            attention_norm: LayerNorm::new(hidden, LAYER_NORM_EPS, vb.pp("attention_norm"))?,
            attention: CausalSelfAttention::new(
                hidden,
                config.num_heads,
                config.dropout_rate,
                vb.pp("self_attention"),
            )?,
            ffn_norm: LayerNorm::new(hidden, LAYER_NORM_EPS, vb.pp("ffn_norm"))?,
            ffn: PointwiseFeedForward::new(hidden, hidden, config.dropout_rate, vb.pp("ffn"))?,
        })
    }

    /// Queries are the normalized sequence, keys the raw sequence
    pub fn forward(&self, seq: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let queries = self.attention_norm.forward(seq)?;
        let seq = self.attention.forward(&queries, seq, mask, train)?;

        let seq = self.ffn.forward(&self.ffn_norm.forward(&seq)?, train)?;
        apply_mask(&seq, mask)
    }
}

/// Self-attention sequence encoder
pub struct SasRec {
    item_embedding: ItemEmbedding,
    positions: PositionalEmbedding,
    blocks: Vec<SasRecBlock>,
    final_norm: LayerNorm,
    dropout_rate: f32,
    hidden_size: usize,
}

impl SasRec {
    pub fn new(
        config: &SasRecConfig,
        item_num: usize,
        state_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = config.hidden_size;

        let blocks = (0..config.num_blocks)
            .map(|i| SasRecBlock::new(config, vb.pp(format!("blocks.{}", i))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            item_embedding: ItemEmbedding::new(item_num, hidden, vb.pp("item_embedding"))?,
            positions: PositionalEmbedding::new(state_size, hidden, vb.pp("position_embedding"))?,
            blocks,
            final_norm: LayerNorm::new(hidden, LAYER_NORM_EPS, vb.pp("final_norm"))?,
            dropout_rate: config.dropout_rate,
            hidden_size: hidden,
        })
    }
}

impl SequenceEncoder for SasRec {
    fn encode(&self, batch: &SequenceBatch, train: bool) -> Result<Tensor> {
        let items = self.item_embedding.forward(&batch.items)?;
        let seq = items.broadcast_add(&self.positions.forward(batch.seq_len())?)?;

        let seq = train_dropout(&seq, self.dropout_rate, train)?;
        let mut seq = apply_mask(&seq, &batch.mask)?;

        for block in &self.blocks {
            seq = block.forward(&seq, &batch.mask, train)?;
        }

        let seq = self.final_norm.forward(&seq)?;
        gather_last(&seq, &batch.lengths)
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{pad_history, state_length};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> SasRecConfig {
        SasRecConfig {
            hidden_size: 16,
            num_heads: 2,
            num_blocks: 2,
            dropout_rate: 0.1,
        }
    }

    fn batch(histories: &[&[u32]], state_size: usize, pad: u32) -> Result<SequenceBatch> {
        let states: Vec<u32> = histories
            .iter()
            .flat_map(|h| pad_history(h, state_size, pad))
            .collect();
        let lengths: Vec<u32> = histories
            .iter()
            .map(|h| state_length(h.len(), state_size))
            .collect();
        SequenceBatch::new(&states, &lengths, state_size, pad, &Device::Cpu)
    }

    #[test]
    fn test_sasrec_output_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = SasRec::new(&config(), 30, 6, vb)?;
        let batch = batch(&[&[1, 2, 3], &[], &[4, 5, 6, 7, 8, 9, 10]], 6, 30)?;

        assert_eq!(encoder.encode(&batch, true)?.dims(), &[3, 16]);
        assert_eq!(encoder.encode(&batch, false)?.dims(), &[3, 16]);

        Ok(())
    }

    #[test]
    fn test_sasrec_eval_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = SasRec::new(&config(), 30, 5, vb)?;
        let batch = batch(&[&[3, 1, 4], &[1, 5]], 5, 30)?;

        let a = encoder.encode(&batch, false)?;
        let b = encoder.encode(&batch, false)?;
        let diff = (a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        Ok(())
    }
}
