use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::errors::{WalletError, WalletResult};

const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    #[serde(with = "hex_digest")]
    checksum: [u8; 32],
    saved_at: DateTime<Utc>,
    payload: ClientConfig,
}

/// Persists [`ClientConfig`] as JSON with an integrity checksum.
///
/// The API key is never written. Loaded configs carry an empty key; set it
/// from the caller or `COSIGN_API_KEY`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> WalletResult<Option<ClientConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(WalletError::StorageError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }
        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::StorageError(
                "Config integrity verification failed".to_string(),
            ));
        }

        log::debug!(
            "Loaded client config saved at {} from {}",
            envelope.saved_at,
            self.path.display()
        );
        Ok(Some(envelope.payload))
    }

    pub fn load_or_default(&self) -> WalletResult<ClientConfig> {
        match self.load()? {
            Some(config) => Ok(config),
            None => {
                let config = ClientConfig::default();
                self.save(&config)?;
                Ok(config)
            }
        }
    }

    /// Write through a temporary file so a crash never leaves a torn config.
    pub fn save(&self, config: &ClientConfig) -> WalletResult<()> {
        config.validate()?;
        let envelope = ConfigEnvelope {
            version: ENVELOPE_VERSION,
            checksum: checksum(config)?,
            saved_at: Utc::now(),
            payload: config.clone(),
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(&self, updater: F) -> WalletResult<ClientConfig>
    where
        F: FnOnce(&mut ClientConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default()?;
        updater(&mut config)?;
        self.save(&config)?;
        Ok(config)
    }
}

fn checksum(config: &ClientConfig) -> WalletResult<[u8; 32]> {
    let encoded = serde_json::to_vec(config)?;
    let mut hasher = Blake3::new();
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("checksum must be 32 bytes"))
    }
}
