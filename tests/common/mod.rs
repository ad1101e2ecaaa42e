#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use faq_intent::{
    Dataset, HashingEmbedder, LabeledExample, ModelRegistry, Result, TextEmbedder, Trainer, TrainerConfig,
};
use ndarray::Array1;

pub fn faq_examples() -> Vec<LabeledExample> {
    let rows = [
        ("How do I reset my password?", "reset_password"),
        ("I forgot my password", "reset_password"),
        ("password reset link is not working", "reset_password"),
        ("change my account password please", "reset_password"),
        ("my password expired what now", "reset_password"),
        ("can't log in, need a new password", "reset_password"),
        ("where do I update my password", "reset_password"),
        ("password recovery email never arrived", "reset_password"),
        ("Where is my invoice?", "billing"),
        ("download the invoice for last month", "billing"),
        ("invoice shows the wrong amount", "billing"),
        ("send a copy of my invoice", "billing"),
        ("my invoice was charged twice", "billing"),
        ("invoice address needs correcting", "billing"),
        ("can I get an invoice in euros", "billing"),
        ("the invoice total looks too high", "billing"),
        ("Where is my package?", "shipping"),
        ("track my package delivery", "shipping"),
        ("package arrived damaged", "shipping"),
        ("how long until my package ships", "shipping"),
        ("my package went to the wrong address", "shipping"),
        ("package tracking number missing", "shipping"),
        ("can I change the package delivery date", "shipping"),
        ("the package never arrived", "shipping"),
    ];
    rows.iter().map(|(q, l)| LabeledExample::new(*q, *l)).collect()
}

pub fn faq_dataset() -> Dataset {
    Dataset::from_examples(faq_examples())
}

/// Eight labels, so an uninformative query spreads below the default threshold
pub fn wide_faq_dataset() -> Dataset {
    let topics = [
        ("password", "password_intent"),
        ("invoice", "invoice_intent"),
        ("package", "package_intent"),
        ("refund", "refund_intent"),
        ("coupon", "coupon_intent"),
        ("warranty", "warranty_intent"),
        ("subscription", "subscription_intent"),
        ("newsletter", "newsletter_intent"),
    ];
    let templates = [
        "help with my {}",
        "question about the {}",
        "{} problem today",
        "where is my {}",
        "I need my {} fixed",
        "{} not working",
    ];
    let examples = topics.iter().flat_map(|&(topic, label)| {
        templates
            .iter()
            .map(move |t| LabeledExample::new(t.replace("{}", topic), label))
    });
    Dataset::from_examples(examples)
}

/// Small and fast settings so boosted-tree tests stay quick
pub fn fast_config() -> TrainerConfig {
    let mut config = TrainerConfig::default();
    config.boosting.iterations = 60;
    config.boosting.depth = 3;
    config.boosting.early_stopping_rounds = 10;
    config
}

pub fn hashing_trainer(registry: ModelRegistry) -> Trainer {
    Trainer::with_config(Arc::new(HashingEmbedder::default()), registry, fast_config())
}

/// Hashing embedder that counts how many texts it was asked to embed
#[derive(Default)]
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextEmbedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts)
    }
}
