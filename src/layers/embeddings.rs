/// Item and positional embeddings
use candle_core::{Module, Result, Tensor};
use candle_nn::{Embedding, Init, VarBuilder};

const EMBEDDING_STDEV: f64 = 0.01;

/// Item embedding table with an extra row for the padding id
pub struct ItemEmbedding {
    embedding: Embedding,
}

impl ItemEmbedding {
    /// The table has `item_num + 1` rows; row `item_num` is the padding item.
    pub fn new(item_num: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let table = vb.get_with_hints(
            (item_num + 1, hidden_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: EMBEDDING_STDEV,
            },
        )?;
        Ok(Self {
            embedding: Embedding::new(table, hidden_size),
        })
    }

    /// [batch, seq_len] u32 ids -> [batch, seq_len, hidden_size]
    pub fn forward(&self, items: &Tensor) -> Result<Tensor> {
        self.embedding.forward(items)
    }
}

/// Learned absolute position embeddings
pub struct PositionalEmbedding {
    table: Tensor, // [max_len, hidden_size]
}

impl PositionalEmbedding {
    pub fn new(max_len: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let table = vb.get_with_hints(
            (max_len, hidden_size),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: EMBEDDING_STDEV,
            },
        )?;
        Ok(Self { table })
    }

    /// Position embeddings for the first `seq_len` positions, [1, seq_len, hidden_size]
    pub fn forward(&self, seq_len: usize) -> Result<Tensor> {
        self.table.narrow(0, 0, seq_len)?.unsqueeze(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_item_embedding_includes_padding() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let embedding = ItemEmbedding::new(10, 8, vb)?;

        // Id 10 is the padding row and must be addressable
        let ids = Tensor::new(&[[0u32, 3, 10], [10, 10, 10]], &device)?;
        let out = embedding.forward(&ids)?;

        assert_eq!(out.dims(), &[2, 3, 8]);

        Ok(())
    }

    #[test]
    fn test_positional_embedding() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let positions = PositionalEmbedding::new(10, 8, vb)?;
        assert_eq!(positions.forward(4)?.dims(), &[1, 4, 8]);
        assert!(positions.forward(11).is_err());

        Ok(())
    }
}
