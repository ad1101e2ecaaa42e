mod hashing;
mod onnx;
pub(crate) mod utils;

use ndarray::Array1;

use crate::error::Result;

pub use hashing::HashingEmbedder;
pub use onnx::{OnnxEmbedder, Pooling};
pub use utils::stack_rows;

/// Turns text into fixed-length, L2-normalized vectors.
///
/// Implementations are shared between training and prediction, so they must be
/// deterministic for a given model and safe to call from several threads at
/// once. A batch either embeds completely or fails; no partial results.
pub trait TextEmbedder: Send + Sync {
    /// Identifier of the underlying embedding model, recorded in model bundles
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embeds `texts` in order, one vector per input.
    ///
    /// # Errors
    /// - `EmbeddingBackend` if the backend fails for any text in the batch
    fn embed(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>>;

    /// Embeds a single text
    fn embed_one(&self, text: &str) -> Result<Array1<f32>> {
        self.embed(&[text])?
            .pop()
            .ok_or_else(|| crate::IntentError::EmbeddingBackend("Embedder returned no vector".into()))
    }
}
