use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::models::BuiltinModel;

/// Errors from fetching or verifying embedding model files.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
}

impl From<ModelError> for crate::IntentError {
    fn from(err: ModelError) -> Self {
        crate::IntentError::EmbeddingBackend(err.to_string())
    }
}

/// Local cache of the ONNX embedding model and tokenizer files.
///
/// Files live under `<models_dir>/<model name>/{model.onnx,tokenizer.json}` and
/// are checked against their SHA-256 hashes before use.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        if let Ok(path) = env::var("FAQ_INTENT_CACHE") {
            return PathBuf::from(path).join("models");
        }

        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("faq-intent").join("models");
        }

        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("faq-intent").join("models");
        }

        env::temp_dir().join("faq-intent").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, model: BuiltinModel) -> PathBuf {
        let info = model.get_model_info();
        self.models_dir.join(info.name).join("model.onnx")
    }

    pub fn get_tokenizer_path(&self, model: BuiltinModel) -> PathBuf {
        let info = model.get_model_info();
        self.models_dir.join(info.name).join("tokenizer.json")
    }

    pub fn is_model_downloaded(&self, model: BuiltinModel) -> bool {
        let model_path = self.get_model_path(model);
        let tokenizer_path = self.get_tokenizer_path(model);
        log::debug!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        log::debug!("Tokenizer path: {:?} (exists: {})", tokenizer_path, tokenizer_path.exists());
        model_path.exists() && tokenizer_path.exists()
    }

    pub async fn download_model(&self, model: BuiltinModel) -> Result<(), ModelError> {
        let info = model.get_model_info();
        let _lock = self.download_lock.lock().await;

        let model_dir = self.models_dir.join(&info.name);
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        let model_path = self.get_model_path(model);
        let model_result = self
            .ensure_file(&info.model_url, &model_path, &info.model_hash, "model")
            .await;
        let tokenizer_path = self.get_tokenizer_path(model);
        let tokenizer_result = self
            .ensure_file(&info.tokenizer_url, &tokenizer_path, &info.tokenizer_hash, "tokenizer")
            .await;

        match (model_result, tokenizer_result) {
            (Ok(()), Ok(())) => {
                log::info!("Model and tokenizer ready to use");
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                log::error!("Failed to set up embedding model files: {}", e);
                let _ = self.remove_download(model);
                Err(e)
            }
        }
    }

    async fn ensure_file(
        &self,
        url: &str,
        path: &Path,
        expected_hash: &str,
        file_type: &str,
    ) -> Result<(), ModelError> {
        if path.exists() {
            if self.verify_file(path, expected_hash)? {
                log::info!("Existing {} file verified successfully", file_type);
                return Ok(());
            }
            log::warn!("{} file verification failed, redownloading", file_type);
        }
        self.download_and_verify_file(url, path, expected_hash, file_type).await
    }

    fn verify_file(&self, path: &Path, expected_hash: &str) -> Result<bool, ModelError> {
        let bytes = fs::read(path)?;
        let hash = sha256_hex(&bytes);
        log::debug!("Verifying {:?}: {} bytes, hash {}", path, bytes.len(), hash);
        Ok(hash == expected_hash)
    }

    pub fn verify_model(&self, model: BuiltinModel) -> Result<bool, ModelError> {
        let info = model.get_model_info();
        let model_path = self.get_model_path(model);
        let tokenizer_path = self.get_tokenizer_path(model);

        if !model_path.exists() || !tokenizer_path.exists() {
            log::info!("One or both embedding model files do not exist");
            return Ok(false);
        }

        let model_ok = self.verify_file(&model_path, &info.model_hash)?;
        let tokenizer_ok = self.verify_file(&tokenizer_path, &info.tokenizer_hash)?;
        log::info!("Model hash ok: {}, tokenizer hash ok: {}", model_ok, tokenizer_ok);

        Ok(model_ok && tokenizer_ok)
    }

    async fn download_and_verify_file(
        &self,
        url: &str,
        path: &Path,
        expected_hash: &str,
        file_type: &str,
    ) -> Result<(), ModelError> {
        log::info!("Downloading {} file from {} to {:?}", file_type, url, path);
        let response = reqwest::get(url).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        let hash = sha256_hex(&bytes);
        if hash != expected_hash {
            log::error!("{} hash mismatch: expected {}, got {}", file_type, expected_hash, hash);
            return Err(ModelError::HashMismatch {
                file_type: file_type.to_string(),
                expected: expected_hash.to_string(),
                actual: hash,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        if !self.verify_file(path, expected_hash)? {
            return Err(ModelError::VerificationFailed);
        }

        log::info!("{} file downloaded and verified successfully", file_type);
        Ok(())
    }

    pub fn remove_download(&self, model: BuiltinModel) -> Result<(), ModelError> {
        let model_path = self.get_model_path(model);
        let tokenizer_path = self.get_tokenizer_path(model);

        if model_path.exists() {
            fs::remove_file(&model_path)?;
        }
        if tokenizer_path.exists() {
            fs::remove_file(&tokenizer_path)?;
        }
        Ok(())
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, model: BuiltinModel) -> Result<(), ModelError> {
        if !self.is_model_downloaded(model) {
            log::info!("Model {:?} not found, downloading...", model);
            self.download_model(model).await?;
        } else if !self.verify_model(model)? {
            log::info!("Model {:?} verification failed, re-downloading...", model);
            self.remove_download(model)?;
            self.download_model(model).await?;
        }
        Ok(())
    }

    /// Fails with `NotDownloaded` unless both files are present.
    pub fn require_downloaded(&self, model: BuiltinModel) -> Result<(), ModelError> {
        if self.is_model_downloaded(model) {
            Ok(())
        } else {
            Err(ModelError::NotDownloaded(format!(
                "{:?} is not in {:?}; run `faq-intent download` first",
                model, self.models_dir
            )))
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
