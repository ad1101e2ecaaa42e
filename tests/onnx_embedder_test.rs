mod common;

use std::sync::Arc;

use common::faq_dataset;
use faq_intent::{
    AnswerTable, BuiltinModel, ModelManager, ModelRegistry, OnnxEmbedder, PredictionService, RuntimeConfig, Strategy,
    TextEmbedder, Trainer,
};

async fn minilm() -> Result<OnnxEmbedder, Box<dyn std::error::Error>> {
    let manager = ModelManager::new_default()?;
    manager.ensure_model_downloaded(BuiltinModel::MiniLM).await?;
    Ok(OnnxEmbedder::from_builtin(&manager, BuiltinModel::MiniLM, &RuntimeConfig::default())?)
}

#[tokio::test]
#[ignore = "downloads the embedding model over the network"]
async fn test_minilm_embeddings_are_normalized() -> Result<(), Box<dyn std::error::Error>> {
    let embedder = minilm().await?;
    assert_eq!(embedder.dimension(), 384);

    let vectors = embedder.embed(&["How do I reset my password?", "Where is my package?"])?;
    assert_eq!(vectors.len(), 2);
    for v in &vectors {
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    let again = embedder.embed_one("How do I reset my password?")?;
    for (a, b) in again.iter().zip(vectors[0].iter()) {
        assert!((a - b).abs() < 1e-5);
    }
    assert!(embedder.embed(&[])?.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "downloads the embedding model over the network"]
async fn test_train_and_predict_with_minilm() -> Result<(), Box<dyn std::error::Error>> {
    let embedder: Arc<dyn TextEmbedder> = Arc::new(minilm().await?);
    let dir = tempfile::tempdir()?;
    let registry = ModelRegistry::new(dir.path());

    let outcome = Trainer::new(Arc::clone(&embedder), registry.clone()).train(&faq_dataset(), Strategy::Svm)?;
    assert_eq!(outcome.metadata.embedding_model, "minilm");

    let service = PredictionService::new(embedder, registry, AnswerTable::default());
    let prediction = service.predict("I can't remember my password", None, 0.0)?;
    assert_eq!(prediction.intent, "reset_password");
    Ok(())
}
