mod common;

use std::sync::Arc;

use common::{faq_dataset, hashing_trainer};
use faq_intent::embedding::stack_rows;
use faq_intent::{HashingEmbedder, IntentError, ModelRegistry, ProbabilisticClassifier, Strategy, TextEmbedder};

#[test]
fn test_latest_is_most_recent_training() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let registry = ModelRegistry::new(dir.path());
    let trainer = hashing_trainer(registry.clone());
    let dataset = faq_dataset();

    let mut created = Vec::new();
    for strategy in [Strategy::Svm, Strategy::CatBoost, Strategy::Svm] {
        let outcome = trainer.train(&dataset, strategy)?;
        assert_eq!(registry.resolve(None)?, outcome.version);
        created.push(outcome.version);
    }

    assert_eq!(registry.list_versions()?, created);
    assert_eq!(registry.latest()?, created[2]);
    assert_eq!(registry.resolve(Some(created[0].as_str()))?, created[0]);
    Ok(())
}

#[test]
fn test_unknown_version_lists_available() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    let version = hashing_trainer(registry.clone())
        .train(&faq_dataset(), Strategy::Svm)
        .unwrap()
        .version;

    match registry.resolve(Some("nonexistent")) {
        Err(IntentError::UnknownModel { requested, available }) => {
            assert_eq!(requested, "nonexistent");
            assert_eq!(available, vec![version]);
        }
        other => panic!("expected UnknownModel, got {:?}", other),
    }
}

#[test]
fn test_empty_registry_has_no_models() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    assert!(matches!(registry.resolve(None), Err(IntentError::NoModelsAvailable)));
}

#[test]
fn test_reload_preserves_probabilities() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    let dataset = faq_dataset();
    let embedder = HashingEmbedder::default();
    let (questions, _) = dataset.columns();
    let features = stack_rows(&embedder.embed(&questions).unwrap(), embedder.dimension());

    for strategy in [Strategy::Svm, Strategy::CatBoost] {
        let outcome = hashing_trainer(registry.clone()).train(&dataset, strategy).unwrap();
        let first = registry.load(&outcome.version).unwrap();
        let second = registry.load(&outcome.version).unwrap();

        let before = first.model.predict_proba(features.view());
        let after = second.model.predict_proba(features.view());
        assert_eq!(before.dim(), after.dim());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
        assert_eq!(first.encoder, second.encoder);
    }
}

#[test]
fn test_versions_are_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    let trainer = Arc::new(hashing_trainer(registry.clone()));

    let a = trainer.train(&faq_dataset(), Strategy::Svm).unwrap().version;
    let b = trainer.train(&faq_dataset(), Strategy::Svm).unwrap().version;
    assert_ne!(a, b);
    assert!(registry.load(&a).is_ok());
    assert!(registry.load(&b).is_ok());
}

#[test]
fn test_foreign_staging_directory_survives_training() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());

    let now = chrono::Local::now().naive_local();
    let minutes = [now, now + chrono::Duration::minutes(1)];
    let foreign: Vec<_> = minutes
        .iter()
        .map(|t| dir.path().join(format!(".svm_model_{}.partial", t.format("%Y%m%d_%H%M"))))
        .collect();
    for staging in &foreign {
        std::fs::create_dir(staging).unwrap();
        std::fs::write(staging.join("classifier.json"), "in-flight write from another trainer").unwrap();
    }

    let version = hashing_trainer(registry.clone())
        .train(&faq_dataset(), Strategy::Svm)
        .unwrap()
        .version;
    assert!(registry.load(&version).is_ok());

    for staging in &foreign {
        let content = std::fs::read_to_string(staging.join("classifier.json")).unwrap();
        assert_eq!(content, "in-flight write from another trainer");
    }
    let hidden = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(hidden, foreign.len());
}

#[test]
fn test_concurrent_training_runs_get_separate_versions() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path());
    let trainer = Arc::new(hashing_trainer(registry.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let trainer = Arc::clone(&trainer);
            std::thread::spawn(move || trainer.train(&faq_dataset(), Strategy::Svm).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut versions: Vec<String> = outcomes.iter().map(|o| o.version.clone()).collect();
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), 4);
    for outcome in &outcomes {
        let bundle = registry.load(&outcome.version).unwrap();
        assert_eq!(bundle.metadata, outcome.metadata);
    }
    assert_eq!(registry.list_versions().unwrap().len(), 4);
}
