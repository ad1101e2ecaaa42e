use ndarray::Array1;

use super::utils::normalize_vector;
use super::TextEmbedder;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Offline embedder built on the hashing trick.
///
/// Lower-cased word unigrams and bigrams are hashed with FNV-1a into a fixed
/// number of buckets, with a hash-derived sign to reduce collision bias, then
/// L2-normalized. No model files are needed and the output is stable across
/// runs and platforms, which makes it the embedder of choice for tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            name: format!("hashing-{}", dimension),
        }
    }

    fn vectorize(&self, text: &str) -> Array1<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut vector = Array1::<f32>::zeros(self.dimension);
        for word in &words {
            self.add_feature(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes(), 0.5);
        }
        normalize_vector(&vector)
    }

    fn add_feature(&self, vector: &mut Array1<f32>, bytes: &[u8], weight: f32) {
        let hash = fnv1a(bytes);
        let index = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl TextEmbedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_are_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed(&["How do I reset my password?"]).unwrap();
        let b = embedder.embed(&["how do i RESET my password"]).unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_order_is_preserved() {
        let embedder = HashingEmbedder::default();
        let batch = embedder.embed(&["refund policy", "reset password"]).unwrap();
        assert_eq!(batch[0], embedder.embed_one("refund policy").unwrap());
        assert_eq!(batch[1], embedder.embed_one("reset password").unwrap());
        assert_ne!(batch[0], batch[1]);
    }

    #[test]
    fn test_text_without_words_embeds_to_zero() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed_one("?!").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
        assert_eq!(embedder.model_name(), "hashing-16");
    }

    #[test]
    fn test_fnv1a_reference_value() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }
}
