/// Weight loading and saving in safetensors files
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use super::RecommenderNetwork;
use crate::config::ModelConfig;
use crate::training::checkpoint::{save_checkpoint, Checkpoint, CheckpointMetadata};

/// Load a network for inference from a checkpoint
///
/// The model configuration and the variable prefix are read from the
/// checkpoint metadata.
///
/// # Arguments
/// * `weights_path` - Path to safetensors file
/// * `device` - Device to load model on
pub fn load_network<P: AsRef<Path>>(
    weights_path: P,
    device: &Device,
) -> crate::Result<RecommenderNetwork> {
    let metadata = Checkpoint::read_metadata(weights_path.as_ref())?;
    let config_json = metadata.config.ok_or_else(|| {
        crate::VpqError::Data(format!(
            "Checkpoint {} has no model configuration",
            weights_path.as_ref().display()
        ))
    })?;
    let config: ModelConfig = serde_json::from_str(&config_json)?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
    };
    let vb = match &metadata.network {
        Some(prefix) => vb.pp(prefix),
        None => vb,
    };

    RecommenderNetwork::new(config, vb)
}

/// Save a network's variables together with its configuration
///
/// # Arguments
/// * `varmap` - Variables of the network
/// * `config` - Configuration the network was built with
/// * `prefix` - Variable prefix the network was built under, if any
/// * `path` - Output file
/// * `step` - Training step
/// * `lr` - Learning rate the network was trained with
/// * `loss` - Last loss, if known
pub fn save_network<P: AsRef<Path>>(
    varmap: &VarMap,
    config: &ModelConfig,
    prefix: Option<&str>,
    path: P,
    step: usize,
    lr: f64,
    loss: Option<f64>,
) -> crate::Result<()> {
    let metadata = CheckpointMetadata {
        step,
        lr,
        loss,
        config: Some(serde_json::to_string(config)?),
        network: prefix.map(str::to_string),
    };
    save_checkpoint(varmap, path, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, EncoderKind, HeadConfig, QHeadMethod};
    use crate::data::SequenceBatch;

    #[test]
    fn test_save_then_load_network() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("NextRec1.safetensors");

        let config = ModelConfig::with_q_head(
            7,
            3,
            EncoderConfig::default_for(EncoderKind::NextItNet),
            HeadConfig {
                method: QHeadMethod::Mean,
                num_multi_head: 2,
                coef: 0.0,
            },
        );

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let network = RecommenderNetwork::new(config.clone(), vb.pp("NextRec1"))?;

        save_network(&varmap, &config, Some("NextRec1"), &path, 42, 0.005, Some(1.5))?;

        let loaded = load_network(&path, &device)?;
        assert_eq!(loaded.config(), &config);

        let batch = SequenceBatch::new(&[1, 2, 7], &[2], 3, 7, &device)?;
        let expected = network.logits(&batch, false)?;
        let actual = loaded.logits(&batch, false)?;
        let diff = (expected - actual)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);

        let metadata = Checkpoint::read_metadata(&path)?;
        assert_eq!(metadata.step, 42);
        assert_eq!(metadata.lr, 0.005);
        assert_eq!(metadata.loss, Some(1.5));

        Ok(())
    }

    #[test]
    fn test_missing_config_is_an_error() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bare.safetensors");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _ = vb.get_with_hints(2, "x", candle_nn::Init::Const(0.0))?;
        save_checkpoint(&varmap, &path, CheckpointMetadata::default())?;

        assert!(load_network(&path, &device).is_err());

        Ok(())
    }
}
