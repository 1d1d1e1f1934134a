use std::{
    collections::BTreeMap,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::Result;

const DEFAULT_MAX_EPOCHS: NonZeroUsize = NonZeroUsize::new(10).unwrap();
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(64).unwrap();

/// Immutable training configuration.
///
/// Besides the options the trainer understands, any other key found when deserializing is kept
/// in an extension map. Those entries have no effect on training, they exist so that the code
/// assembling the model, datasets and optimizer can read its own settings from the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    max_epochs: NonZeroUsize,
    batch_size: NonZeroUsize,
    ckpt_path: Option<PathBuf>,
    num_workers: usize,
    seed: Option<u64>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: DEFAULT_MAX_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            ckpt_path: None,
            num_workers: 0,
            seed: None,
            extra: BTreeMap::new(),
        }
    }
}

impl TrainerConfig {
    /// Creates a configuration with every option set to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Args
    /// * `path` - Path to a JSON object; missing options take their default value.
    ///
    /// # Errors
    /// Returns `TrainerErr` if the file can't be read or isn't a valid configuration.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;

        if !config.extra.is_empty() {
            let keys: Vec<_> = config.extra.keys().map(String::as_str).collect();
            debug!("config extension keys: {}", keys.join(", "));
        }

        Ok(config)
    }

    pub fn with_max_epochs(mut self, max_epochs: NonZeroUsize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_ckpt_path<P: Into<PathBuf>>(mut self, ckpt_path: P) -> Self {
        self.ckpt_path = Some(ckpt_path.into());
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Stores an extension entry.
    pub fn with_extra<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns the amount of training epochs.
    pub fn max_epochs(&self) -> usize {
        self.max_epochs.get()
    }

    /// Returns the amount of samples per batch.
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// Returns where the final checkpoint is written, if anywhere.
    pub fn ckpt_path(&self) -> Option<&Path> {
        self.ckpt_path.as_deref()
    }

    /// Returns the amount of parallel data loading workers, `0` loads on the calling thread.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns the seed used for shuffling, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Returns every extension entry.
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// Deserializes the extension entries into `T`, as if they were a JSON object of their own.
    ///
    /// # Errors
    /// Returns `TrainerErr::Json` if the entries don't match `T`.
    pub fn extra_as<T: DeserializeOwned>(&self) -> Result<T> {
        let object = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(serde_json::from_value(Value::Object(object))?)
    }
}
