use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use super::utils::{mean_pool, normalize_vector};
use super::TextEmbedder;
use crate::error::{IntentError, Result};
use crate::model_manager::ModelManager;
use crate::models::{BuiltinModel, ModelCharacteristics};
use crate::runtime::{create_session_builder, RuntimeConfig};

const BATCH_SIZE: usize = 32;

/// How token embeddings are reduced to one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    /// Average over the tokens selected by the attention mask
    #[default]
    Mean,
    /// The first token's embedding (the `[CLS]` position)
    FirstToken,
}

/// Sentence embedder backed by an ONNX transformer and a HuggingFace tokenizer.
///
/// The ONNX model is expected to:
/// - Accept `input_ids` and `attention_mask` (and optionally `token_type_ids`),
///   each shaped `[batch_size, sequence_length]`
/// - Output either token embeddings `[batch_size, sequence_length, hidden]` or
///   pooled embeddings `[batch_size, hidden]`
///
/// The tokenizer and session are loaded once and shared behind `Arc`, so one
/// instance can be handed to the trainer and the prediction service at the same
/// time.
#[derive(Debug)]
pub struct OnnxEmbedder {
    name: String,
    tokenizer: Arc<Tokenizer>,
    session: Arc<Session>,
    characteristics: ModelCharacteristics,
    pooling: Pooling,
    needs_token_type_ids: bool,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<OnnxEmbedder>();
    }
};

impl OnnxEmbedder {
    /// Loads a built-in model that has already been downloaded by `manager`.
    ///
    /// # Errors
    /// - `EmbeddingBackend` if the model is not downloaded
    /// - `EmbeddingBackend` if the tokenizer or ONNX session fails to load
    pub fn from_builtin(manager: &ModelManager, model: BuiltinModel, config: &RuntimeConfig) -> Result<Self> {
        manager.require_downloaded(model)?;
        let characteristics = model.characteristics();
        let tokenizer = load_tokenizer(&manager.get_tokenizer_path(model), characteristics.max_sequence_length)?;
        let session = load_session(&manager.get_model_path(model), config)?;
        let needs_token_type_ids = declares_input(&session, "token_type_ids");

        info!("Loaded built-in embedding model {:?}", model);
        Ok(Self {
            name: model.get_model_info().name,
            tokenizer: Arc::new(tokenizer),
            session: Arc::new(session),
            characteristics,
            pooling: Pooling::default(),
            needs_token_type_ids,
        })
    }

    /// Loads a custom ONNX model and tokenizer from disk.
    ///
    /// The embedding size is inferred by embedding a sample sentence.
    /// `max_sequence_length` defaults to 256 tokens.
    pub fn from_files(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        max_sequence_length: Option<usize>,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();
        if !model_path.exists() {
            return Err(IntentError::EmbeddingBackend(format!("Model file not found: {:?}", model_path)));
        }
        if !tokenizer_path.exists() {
            return Err(IntentError::EmbeddingBackend(format!("Tokenizer file not found: {:?}", tokenizer_path)));
        }

        let max_sequence_length = max_sequence_length.unwrap_or(256);
        let tokenizer = load_tokenizer(tokenizer_path, max_sequence_length)?;
        let session = load_session(model_path, config)?;
        let needs_token_type_ids = declares_input(&session, "token_type_ids");

        let name = model_path
            .parent()
            .and_then(|p| p.file_name())
            .or_else(|| model_path.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "custom".to_string());

        let mut embedder = Self {
            name,
            tokenizer: Arc::new(tokenizer),
            session: Arc::new(session),
            characteristics: ModelCharacteristics {
                embedding_size: 0,
                max_sequence_length,
                model_size_mb: 0,
            },
            pooling: Pooling::default(),
            needs_token_type_ids,
        };

        let sample = embedder.embed_chunk(&["Test input to infer embedding size"])?;
        let embedding_size = sample.first().map(|v| v.len()).unwrap_or(0);
        if embedding_size == 0 {
            return Err(IntentError::EmbeddingBackend("Model produced an empty embedding".into()));
        }
        info!("Inferred embedding size from model: {}", embedding_size);
        embedder.characteristics.embedding_size = embedding_size;
        Ok(embedder)
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn characteristics(&self) -> &ModelCharacteristics {
        &self.characteristics
    }

    /// Counts tokens (including special tokens) after truncation.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.tokenizer
            .encode(text, true)
            .map(|encoding| encoding.get_ids().len())
            .map_err(|e| IntentError::EmbeddingBackend(format!("Tokenizer error: {}", e)))
    }

    fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| IntentError::EmbeddingBackend(format!("Tokenizer error: {}", e)))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        if seq_len == 0 {
            return Err(IntentError::EmbeddingBackend("Tokenizer produced no tokens".into()));
        }

        let mut ids = vec![0i64; batch * seq_len];
        let mut mask = vec![0i64; batch * seq_len];
        let mut type_ids = vec![0i64; batch * seq_len];
        for (i, encoding) in encodings.iter().enumerate() {
            if !encoding.get_overflowing().is_empty() {
                warn!(
                    "Input {} truncated to {} tokens",
                    i, self.characteristics.max_sequence_length
                );
            }
            let offset = i * seq_len;
            for (j, ((&id, &m), &t)) in encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids())
                .enumerate()
            {
                ids[offset + j] = i64::from(id);
                mask[offset + j] = i64::from(m);
                type_ids[offset + j] = i64::from(t);
            }
        }

        let mut input_tensors = HashMap::new();
        input_tensors.insert("input_ids", Tensor::from_array(([batch, seq_len], ids))?);
        input_tensors.insert("attention_mask", Tensor::from_array(([batch, seq_len], mask.clone()))?);
        if self.needs_token_type_ids {
            input_tensors.insert("token_type_ids", Tensor::from_array(([batch, seq_len], type_ids))?);
        }

        let outputs = self
            .session
            .run(input_tensors)
            .map_err(|e| IntentError::EmbeddingBackend(format!("Failed to run model: {}", e)))?;
        let (shape, data) = outputs[0]
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| IntentError::EmbeddingBackend(format!("Failed to extract output tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        match dims.as_slice() {
            [b, hidden] if *b == batch => Ok(data
                .chunks(*hidden)
                .map(|row| normalize_vector(&Array1::from_iter(row.iter().copied())))
                .collect()),
            [b, len, hidden] if *b == batch => {
                let stride = len * hidden;
                let mut vectors = Vec::with_capacity(batch);
                for i in 0..batch {
                    let tokens = Array2::from_shape_vec((*len, *hidden), data[i * stride..(i + 1) * stride].to_vec())
                        .map_err(|e| IntentError::EmbeddingBackend(format!("Bad output layout: {}", e)))?;
                    let pooled = match self.pooling {
                        Pooling::Mean => {
                            let row_mask = ArrayView1::from(&mask[i * seq_len..(i + 1) * seq_len]);
                            mean_pool(&tokens, row_mask)
                        }
                        Pooling::FirstToken => tokens.row(0).to_owned(),
                    };
                    vectors.push(normalize_vector(&pooled));
                }
                Ok(vectors)
            }
            other => Err(IntentError::EmbeddingBackend(format!(
                "Unexpected embedding output shape {:?} for batch of {}",
                other, batch
            ))),
        }
    }
}

impl TextEmbedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.characteristics.embedding_size
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            vectors.extend(self.embed_chunk(chunk)?);
        }
        debug!("Embedded {} texts", vectors.len());
        Ok(vectors)
    }
}

fn load_tokenizer(path: &Path, max_sequence_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| IntentError::EmbeddingBackend(format!("Failed to load tokenizer: {}", e)))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_sequence_length,
            ..Default::default()
        }))
        .map_err(|e| IntentError::EmbeddingBackend(format!("Failed to configure truncation: {}", e)))?;
    tokenizer.with_padding(Some(PaddingParams::default()));
    info!("Tokenizer loaded successfully");
    Ok(tokenizer)
}

fn load_session(path: &Path, config: &RuntimeConfig) -> Result<Session> {
    let session = create_session_builder(config)?.commit_from_file(path)?;
    validate_model(&session)?;
    info!("Model structure validated successfully");
    Ok(session)
}

fn declares_input(session: &Session, name: &str) -> bool {
    session.inputs.iter().any(|input| input.name == name)
}

/// Checks that the graph has `input_ids`/`attention_mask`-style inputs and an output.
fn validate_model(session: &Session) -> Result<()> {
    let inputs = &session.inputs;
    if inputs.len() < 2 {
        return Err(IntentError::EmbeddingBackend(format!(
            "Model must have at least 2 inputs (input_ids and attention_mask), found {}",
            inputs.len()
        )));
    }
    if session.outputs.is_empty() {
        return Err(IntentError::EmbeddingBackend(
            "Model must have at least 1 output for embeddings".to_string(),
        ));
    }
    Ok(())
}
