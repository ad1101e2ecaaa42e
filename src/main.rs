use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use faq_intent::config;
use faq_intent::{
    spawn_training, AnswerTable, BuiltinModel, Dataset, HashingEmbedder, ModelManager, ModelRegistry, OnnxEmbedder,
    PredictionService, RuntimeConfig, Settings, Strategy, TextEmbedder, Trainer,
};

/// FAQ intent classifier: train models on labeled questions and answer queries
#[derive(Parser, Debug)]
#[command(name = "faq-intent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Model registry root [default: $FAQ_INTENT_MODELS_DIR or ./models]
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, value_enum, default_value = "onnx", global = true)]
    embedder: EmbedderKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedderKind {
    /// Built-in MiniLM sentence embedder (downloaded on first use)
    Onnx,
    /// Offline feature-hashing embedder
    Hashing,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a new model version from a CSV with Question and Label columns
    Train {
        #[arg(long)]
        dataset: PathBuf,
        /// svm or catboost
        #[arg(long, default_value = "svm")]
        strategy: String,
        /// Directory where the dataset is archived before training [default: $FAQ_INTENT_DATA_DIR or ./data]
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Classify a query
    Predict {
        query: String,
        /// Model version; defaults to the most recent
        #[arg(long)]
        model: Option<String>,
        /// Minimum confidence in [0, 1] [default: $FAQ_INTENT_THRESHOLD or 0.2]
        #[arg(long, value_parser = threshold_arg)]
        threshold: Option<f64>,
        /// Answers JSON file [default: $FAQ_INTENT_ANSWERS or ./answers.json]
        #[arg(long)]
        answers: Option<PathBuf>,
    },
    /// List model versions, oldest first
    Models,
    /// Download and verify the embedding model
    Download {
        /// Remove any cached copy first
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.models_dir.clone() {
        settings.models_dir = dir;
    }
    let registry = ModelRegistry::new(&settings.models_dir);

    match cli.command {
        Command::Train {
            dataset,
            strategy,
            data_dir,
        } => {
            let strategy: Strategy = strategy.parse()?;
            let data_dir = data_dir.unwrap_or_else(|| settings.data_dir.clone());
            let archived = archive_dataset(&dataset, &data_dir)?;
            let dataset = Dataset::from_csv_path(&archived)?;

            let embedder = load_embedder(cli.embedder).await?;
            let trainer = Arc::new(Trainer::new(embedder, registry));
            let outcome = spawn_training(&trainer, dataset, strategy)
                .await
                .context("training task panicked")??;

            println!("{}", outcome.report);
            if outcome.dropped_rows > 0 {
                println!("Dropped {} incomplete rows", outcome.dropped_rows);
            }
            println!("Model trained successfully: {}", outcome.version);
        }
        Command::Predict {
            query,
            model,
            threshold,
            answers,
        } => {
            if query.trim().is_empty() {
                bail!("Query cannot be empty");
            }
            let threshold = threshold.unwrap_or(settings.threshold);
            let answers = AnswerTable::from_json_file(answers.unwrap_or_else(|| settings.answers_path.clone()))?;
            let embedder = load_embedder(cli.embedder).await?;
            let service = PredictionService::new(embedder, registry, answers);

            let prediction = service.predict(&query, model.as_deref(), threshold)?;
            println!("intent:     {}", prediction.intent);
            println!("answer:     {}", prediction.answer);
            println!("confidence: {:.2}", prediction.confidence);
            println!("model:      {}", prediction.version);
        }
        Command::Models => {
            let versions = registry.list_versions()?;
            if versions.is_empty() {
                println!("No models available in {}", settings.models_dir.display());
            }
            for version in versions {
                println!("{}", version);
            }
        }
        Command::Download { fresh } => {
            let manager = ModelManager::new_default()?;
            if fresh {
                manager.remove_download(BuiltinModel::MiniLM)?;
            }
            manager.ensure_model_downloaded(BuiltinModel::MiniLM).await?;
            println!("Embedding model ready in {}", manager.models_dir().display());
        }
    }
    Ok(())
}

fn threshold_arg(raw: &str) -> Result<f64, String> {
    config::parse_threshold(raw).map_err(|e| e.to_string())
}

async fn load_embedder(kind: EmbedderKind) -> anyhow::Result<Arc<dyn TextEmbedder>> {
    match kind {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
        EmbedderKind::Onnx => {
            let manager = ModelManager::new_default()?;
            manager.ensure_model_downloaded(BuiltinModel::MiniLM).await?;
            let embedder = OnnxEmbedder::from_builtin(&manager, BuiltinModel::MiniLM, &RuntimeConfig::default())?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Copies the dataset into `data_dir` under a timestamped name.
fn archive_dataset(source: &Path, data_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string());
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "csv".to_string());
    let target = data_dir.join(format!(
        "{}_{}.{}",
        stem,
        Local::now().format("%Y%m%d_%H%M%S"),
        extension
    ));
    fs::copy(source, &target).with_context(|| format!("archiving {}", source.display()))?;
    info!("Archived dataset to {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_flag_is_range_checked() {
        let cli = Cli::try_parse_from(["faq-intent", "predict", "where is my invoice", "--threshold", "0.35"]).unwrap();
        match cli.command {
            Command::Predict { threshold, .. } => assert_eq!(threshold, Some(0.35)),
            other => panic!("unexpected command {:?}", other),
        }

        for bad in ["5", "-0.5", "high"] {
            assert!(Cli::try_parse_from(["faq-intent", "predict", "q", "--threshold", bad]).is_err());
        }
    }

    #[test]
    fn test_cli_flags_do_not_read_the_environment() {
        let cli = Cli::try_parse_from(["faq-intent", "predict", "q"]).unwrap();
        assert!(cli.models_dir.is_none());
        match cli.command {
            Command::Predict { threshold, answers, .. } => {
                assert!(threshold.is_none());
                assert!(answers.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
