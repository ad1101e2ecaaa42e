mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{faq_dataset, hashing_trainer, wide_faq_dataset};
use faq_intent::{
    AnswerTable, Dataset, HashingEmbedder, IntentError, ModelRegistry, PredictionService, ProbabilisticClassifier, Strategy,
    TextEmbedder, DEFAULT_THRESHOLD, NO_ANSWER, UNKNOWN_INTENT,
};

fn answers() -> AnswerTable {
    AnswerTable::from_map(HashMap::from([
        ("reset_password".to_string(), "Use the 'Forgot password' link.".to_string()),
        ("billing".to_string(), "Invoices are under Account > Billing.".to_string()),
    ]))
}

fn trained_service(strategy: Strategy) -> (tempfile::TempDir, PredictionService, String) {
    trained_service_on(&faq_dataset(), strategy)
}

fn trained_service_on(dataset: &Dataset, strategy: Strategy) -> (tempfile::TempDir, PredictionService, String) {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    let version = hashing_trainer(registry.clone())
        .train(dataset, strategy)
        .unwrap()
        .version;
    let service = PredictionService::new(Arc::new(HashingEmbedder::default()), registry, answers());
    (dir, service, version)
}

#[test]
fn test_training_example_is_recovered() {
    let (_dir, service, version) = trained_service(Strategy::Svm);

    let prediction = service.predict("How do I reset my password?", None, 0.5).unwrap();
    assert_eq!(prediction.intent, "reset_password");
    assert_eq!(prediction.answer, "Use the 'Forgot password' link.");
    assert_eq!(prediction.version, version);
    assert!(prediction.confidence >= 0.5 && prediction.confidence <= 1.0);
}

#[test]
fn test_unmapped_intent_gets_default_answer() {
    let (_dir, service, _) = trained_service(Strategy::Svm);
    let prediction = service.predict("track my package delivery", None, 0.0).unwrap();
    assert_eq!(prediction.intent, "shipping");
    assert_eq!(prediction.answer, NO_ANSWER);
}

#[test]
fn test_zero_threshold_never_unknown() {
    for strategy in [Strategy::Svm, Strategy::CatBoost] {
        let (_dir, service, _) = trained_service(strategy);
        for query in ["xyzzy plugh", "!!!", "where is my invoice", "what time is it on mars"] {
            let prediction = service.predict(query, None, 0.0).unwrap();
            assert_ne!(prediction.intent, UNKNOWN_INTENT, "query {:?}", query);
        }
    }
}

#[test]
fn test_threshold_above_max_forces_unknown() {
    let (_dir, service, _) = trained_service(Strategy::Svm);
    let query = "invoice shows the wrong amount";
    let max = max_probability(&service, query);

    let confident = service.predict(query, None, 0.0).unwrap();
    let unknown = service.predict(query, None, max + 1e-6).unwrap();
    assert_eq!(unknown.intent, UNKNOWN_INTENT);
    assert_eq!(unknown.answer, NO_ANSWER);
    assert!((unknown.confidence - max).abs() < 1e-12);
    assert!((confident.confidence - max).abs() < 1e-12);
}

/// Highest class probability the latest bundle assigns to `query`
fn max_probability(service: &PredictionService, query: &str) -> f64 {
    let bundle = service.bundle(None).unwrap();
    let vector = HashingEmbedder::default()
        .embed_one(query)
        .unwrap()
        .insert_axis(ndarray::Axis(0));
    bundle
        .model
        .predict_proba(vector.view())
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
}

/// A one-word query whose hashed feature never occurs in `dataset`
fn unseen_word(dataset: &Dataset) -> &'static str {
    let embedder = HashingEmbedder::default();
    let (questions, _) = dataset.columns();
    let seen = embedder.embed(&questions).unwrap();
    ["asdkjhasd", "qwertzuiop", "zxcvbnm", "xyzzy", "frobnicate", "vlorptang", "grumblewix", "snorkelfax"]
        .into_iter()
        .find(|word| {
            let v = embedder.embed_one(word).unwrap();
            seen.iter().all(|s| s.iter().zip(v.iter()).all(|(a, b)| *a == 0.0 || *b == 0.0))
        })
        .expect("no candidate word is disjoint from the training features")
}

#[test]
fn test_nonsense_query_is_unknown_under_default_threshold() {
    let dataset = wide_faq_dataset();
    let query = unseen_word(&dataset);
    for strategy in [Strategy::Svm, Strategy::CatBoost] {
        let (_dir, service, _) = trained_service_on(&dataset, strategy);
        let max = max_probability(&service, query);

        let prediction = service.predict(query, None, DEFAULT_THRESHOLD).unwrap();
        assert_eq!(prediction.intent, UNKNOWN_INTENT, "{} on {:?}", strategy, query);
        assert_eq!(prediction.answer, NO_ANSWER);
        assert!(prediction.confidence < DEFAULT_THRESHOLD);
        assert!((prediction.confidence - max).abs() < 1e-12);
    }
}

#[test]
fn test_threshold_equal_to_confidence_is_a_match() {
    let dataset = wide_faq_dataset();
    let nonsense = unseen_word(&dataset);
    for strategy in [Strategy::Svm, Strategy::CatBoost] {
        let (_dir, service, _) = trained_service_on(&dataset, strategy);
        for query in [nonsense, "where is my refund"] {
            let open = service.predict(query, None, 0.0).unwrap();
            let exact = service.predict(query, None, open.confidence).unwrap();
            assert_ne!(exact.intent, UNKNOWN_INTENT, "{} on {:?}", strategy, query);
            assert_eq!(exact.intent, open.intent);
            assert_eq!(exact.confidence, open.confidence);
        }
    }
}

#[test]
fn test_empty_registry_has_no_models() {
    let dir = tempfile::tempdir().unwrap();
    let service = PredictionService::new(
        Arc::new(HashingEmbedder::default()),
        ModelRegistry::new(dir.path()),
        AnswerTable::default(),
    );
    assert!(matches!(
        service.predict_default("hello"),
        Err(IntentError::NoModelsAvailable)
    ));
    assert!(service.list_models().unwrap().is_empty());
}

#[test]
fn test_unknown_version_is_rejected() {
    let (_dir, service, version) = trained_service(Strategy::Svm);
    match service.predict("hello", Some("svm_model_19990101_0000"), 0.2) {
        Err(IntentError::UnknownModel { available, .. }) => assert_eq!(available, vec![version]),
        other => panic!("expected UnknownModel, got {:?}", other),
    }
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let (_dir, service, _) = trained_service(Strategy::Svm);
    assert!(matches!(service.predict("   ", None, 0.2), Err(IntentError::Validation(_))));
    assert!(matches!(service.predict("refund", None, f64::NAN), Err(IntentError::Validation(_))));
}

#[test]
fn test_embedder_dimension_mismatch_is_load_error() {
    let (dir, _service, _) = trained_service(Strategy::Svm);
    let service = PredictionService::new(
        Arc::new(HashingEmbedder::new(64)),
        ModelRegistry::new(dir.path()),
        AnswerTable::default(),
    );
    assert!(matches!(
        service.predict("where is my invoice", None, 0.2),
        Err(IntentError::ModelLoad { .. })
    ));
}

#[test]
fn test_concurrent_predictions_share_bundle() {
    let (_dir, service, _) = trained_service(Strategy::Svm);
    let service = Arc::new(service);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || service.predict("I forgot my password", None, 0.0).unwrap().intent)
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "reset_password");
    }
    assert!(Arc::ptr_eq(&service.bundle(None).unwrap(), &service.bundle(None).unwrap()));
}
