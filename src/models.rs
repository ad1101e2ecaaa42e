/// Pretrained sentence-embedding models that can be downloaded on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinModel {
    /// all-MiniLM-L6-v2 exported to ONNX: 384-dimensional embeddings
    MiniLM,
}

/// Static properties of an embedding model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCharacteristics {
    pub embedding_size: usize,
    pub max_sequence_length: usize,
    pub model_size_mb: usize,
}

/// Where a model's files come from and the hashes they must match
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub model_url: String,
    pub tokenizer_url: String,
    pub model_hash: String,
    pub tokenizer_hash: String,
}

impl BuiltinModel {
    pub fn get_model_info(&self) -> ModelInfo {
        match self {
            BuiltinModel::MiniLM => ModelInfo {
                name: "minilm".to_string(),
                model_url: "https://huggingface.co/axar-ai/minilm/resolve/main/model.onnx".to_string(),
                tokenizer_url: "https://huggingface.co/axar-ai/minilm/resolve/main/tokenizer.json".to_string(),
                model_hash: "37f1ea074b7166e87295fce31299287d5fb79f76b8b7227fccc8a9f2f1ba4e16".to_string(),
                tokenizer_hash: "da0e79933b9ed51798a3ae27893d3c5fa4a201126cef75586296df9b4d2c62a0".to_string(),
            },
        }
    }

    pub fn characteristics(&self) -> ModelCharacteristics {
        match self {
            BuiltinModel::MiniLM => ModelCharacteristics {
                embedding_size: 384,
                max_sequence_length: 256,
                model_size_mb: 85,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minilm_characteristics() {
        let characteristics = BuiltinModel::MiniLM.characteristics();
        assert_eq!(characteristics.embedding_size, 384);
        assert_eq!(characteristics.max_sequence_length, 256);
    }

    #[test]
    fn test_minilm_info_points_at_onnx_files() {
        let info = BuiltinModel::MiniLM.get_model_info();
        assert_eq!(info.name, "minilm");
        assert!(info.model_url.ends_with("model.onnx"));
        assert!(info.tokenizer_url.ends_with("tokenizer.json"));
        assert_eq!(info.model_hash.len(), 64);
    }
}
