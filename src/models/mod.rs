/// Sequence encoders and the recommender network built on top of them
use candle_core::{DType, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::{EncoderConfig, ModelConfig};
use crate::data::SequenceBatch;

pub mod heads;
pub mod loader;
pub mod network;
pub mod nextitnet;
pub mod sasrec;

pub use heads::ValueHead;
pub use loader::{load_network, save_network};
pub use network::RecommenderNetwork;
pub use nextitnet::NextItNet;
pub use sasrec::SasRec;

/// Turns a padded item history into a fixed-size state vector
pub trait SequenceEncoder: Send + Sync {
    /// Encode a batch of histories
    ///
    /// # Arguments
    /// * `batch` - Padded item ids, padding mask and effective lengths
    /// * `train` - Enables dropout
    ///
    /// # Returns
    /// State vectors [batch, hidden_size]
    fn encode(&self, batch: &SequenceBatch, train: bool) -> Result<Tensor>;

    fn hidden_size(&self) -> usize;
}

/// Select the hidden vector at position `length - 1` of every sequence
///
/// # Arguments
/// * `seq` - Per-position outputs [batch, seq_len, hidden]
/// * `lengths` - Effective lengths, each in `1..=seq_len` [batch]
///
/// # Returns
/// [batch, hidden]
pub fn gather_last(seq: &Tensor, lengths: &Tensor) -> Result<Tensor> {
    let (batch_size, _, hidden) = seq.dims3()?;

    let positions = lengths
        .to_dtype(DType::F32)?
        .affine(1.0, -1.0)?
        .to_dtype(DType::U32)?;
    let index = positions
        .reshape((batch_size, 1, 1))?
        .broadcast_as((batch_size, 1, hidden))?
        .contiguous()?;

    seq.contiguous()?.gather(&index, 1)?.squeeze(1)
}

/// Build the encoder described by `config`
pub fn build_encoder(config: &ModelConfig, vb: VarBuilder) -> Result<Box<dyn SequenceEncoder>> {
    let encoder: Box<dyn SequenceEncoder> = match &config.encoder {
        EncoderConfig::NextItNet(c) => Box::new(NextItNet::new(c, config.item_num, vb)?),
        EncoderConfig::SasRec(c) => Box::new(SasRec::new(
            c,
            config.item_num,
            config.state_size,
            vb,
        )?),
    };
    Ok(encoder)
}

/// Mask a per-position tensor [batch, seq_len, hidden] with [batch, seq_len]
pub(crate) fn apply_mask(seq: &Tensor, mask: &Tensor) -> Result<Tensor> {
    seq.broadcast_mul(&mask.unsqueeze(2)?)
}
