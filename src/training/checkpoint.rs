/// Model checkpointing with safetensors
use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use safetensors::tensor::SafeTensors;

const KEY_STEP: &str = "step";
const KEY_LR: &str = "lr";
const KEY_LOSS: &str = "loss";
const KEY_CONFIG: &str = "config";
const KEY_NETWORK: &str = "network";

/// Checkpoint metadata, stored as string pairs in the safetensors header
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Training step
    pub step: usize,
    /// Learning rate at checkpoint
    pub lr: f64,
    /// Loss at checkpoint
    pub loss: Option<f64>,
    /// Model configuration (as JSON string)
    pub config: Option<String>,
    /// Variable prefix of the saved network, e.g. `NextRec1`
    pub network: Option<String>,
}

impl CheckpointMetadata {
    fn to_header(&self) -> HashMap<String, String> {
        let mut header = HashMap::new();
        header.insert(KEY_STEP.to_string(), self.step.to_string());
        header.insert(KEY_LR.to_string(), self.lr.to_string());
        if let Some(loss) = self.loss {
            header.insert(KEY_LOSS.to_string(), loss.to_string());
        }
        if let Some(config) = &self.config {
            header.insert(KEY_CONFIG.to_string(), config.clone());
        }
        if let Some(network) = &self.network {
            header.insert(KEY_NETWORK.to_string(), network.clone());
        }
        header
    }

    fn from_header(header: &HashMap<String, String>) -> crate::Result<Self> {
        fn parse<T: std::str::FromStr>(header: &HashMap<String, String>, key: &str) -> crate::Result<Option<T>> {
            header
                .get(key)
                .map(|value| {
                    value.parse::<T>().map_err(|_| {
                        crate::VpqError::Data(format!("Invalid checkpoint metadata {}: {}", key, value))
                    })
                })
                .transpose()
        }

        Ok(Self {
            step: parse(header, KEY_STEP)?.unwrap_or(0),
            lr: parse(header, KEY_LR)?.unwrap_or(0.0),
            loss: parse(header, KEY_LOSS)?,
            config: header.get(KEY_CONFIG).cloned(),
            network: header.get(KEY_NETWORK).cloned(),
        })
    }
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Snapshot every variable of a `VarMap`
    pub fn from_varmap(varmap: &VarMap, metadata: CheckpointMetadata) -> crate::Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| crate::VpqError::Training(format!("VarMap lock poisoned: {}", e)))?;

        let tensors = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();

        Ok(Self::new(tensors, metadata))
    }

    /// Save checkpoint to a safetensors file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        safetensors::serialize_to_file(
            self.tensors.iter(),
            &Some(self.metadata.to_header()),
            path.as_ref(),
        )?;

        log::debug!(
            "Saved {} tensors to {}",
            self.tensors.len(),
            path.as_ref().display()
        );

        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to checkpoint file
    /// * `device` - Device to load tensors on
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let metadata = metadata_from_bytes(&data)?;
        let tensors = candle_core::safetensors::load_buffer(&data, device)?;

        Ok(Self { tensors, metadata })
    }

    /// Read only the metadata of a checkpoint
    pub fn read_metadata<P: AsRef<Path>>(path: P) -> crate::Result<CheckpointMetadata> {
        let data = std::fs::read(path.as_ref())?;
        metadata_from_bytes(&data)
    }
}

fn metadata_from_bytes(data: &[u8]) -> crate::Result<CheckpointMetadata> {
    let (_, header) = SafeTensors::read_metadata(data)?;
    match header.metadata() {
        Some(pairs) => CheckpointMetadata::from_header(pairs),
        None => Ok(CheckpointMetadata::default()),
    }
}

/// Save a `VarMap` to checkpoint
///
/// # Arguments
/// * `varmap` - Trainable variables
/// * `path` - Path to save checkpoint
/// * `metadata` - Checkpoint metadata
pub fn save_checkpoint<P: AsRef<Path>>(
    varmap: &VarMap,
    path: P,
    metadata: CheckpointMetadata,
) -> crate::Result<()> {
    Checkpoint::from_varmap(varmap, metadata)?.save(path)
}
