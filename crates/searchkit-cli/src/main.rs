//! `searchkit` admin command line.

use clap::{Parser, Subcommand};
use searchkit_core::{LogFormat, LoggingConfig, SearchkitConfig, TaskKey};
use searchkit_embed::OpenAiCompatibleEmbedder;
use searchkit_search::{HybridSearcher, SearchRequest, TypeaheadRequest};
use searchkit_store::{ModelRegistry, SqliteStore, TaskStore};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "searchkit", about = "Hybrid search and embedding pipeline admin")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "searchkit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the store schema
    Migrate,
    /// Manage the model registry
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// List dead-lettered tasks, newest first
    DeadLetters {
        /// Maximum rows shown
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Move a dead-lettered task back into the queue
    Requeue {
        /// Entity type
        entity_type: String,
        /// Entity id
        entity_id: String,
        /// Model name
        model: String,
        /// Language code
        language: String,
    },
    /// Print store row counts
    Stats,
    /// Hybrid lexical and semantic search
    Search {
        /// Query text
        query: String,
        /// Document language
        #[arg(short, long)]
        language: String,
        /// Semantic model (defaults to the configured embedder's model)
        #[arg(short, long)]
        model: Option<String>,
        /// Maximum results
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Lexical suggestions for partial input
    Typeahead {
        /// Partial query text
        query: String,
        /// Document language
        #[arg(short, long)]
        language: String,
        /// Maximum suggestions
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ModelAction {
    /// Write the configured models and prune stale ones
    Sync,
    /// List registered models
    List,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SearchkitConfig::load(&cli.config).map_err(|e| {
        anyhow::anyhow!("Failed to load config '{}': {e}", cli.config.display())
    })?;
    init_tracing(&config.logging);

    let mut stdout = std::io::stdout().lock();
    run(cli.command, &config, &mut stdout).await
}

async fn run(
    command: Commands,
    config: &SearchkitConfig,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&config.store)?);

    match command {
        Commands::Migrate => {
            info!(path = %config.store.path.display(), fts5 = store.has_fts5(), "Store ready");
            writeln!(out, "Store at {} is up to date", config.store.path.display())?;
        }
        Commands::Models { action } => match action {
            ModelAction::Sync => {
                let report = store.upsert_models(&config.models).await?;
                writeln!(
                    out,
                    "Synced {} model(s); removed {} model(s), {} task(s), {} backfill state(s), \
                     {} dead letter(s)",
                    report.upserted,
                    report.models_removed,
                    report.tasks_removed,
                    report.backfill_states_removed,
                    report.dead_letters_removed
                )?;
            }
            ModelAction::List => {
                let models = store.active_models().await?;
                if models.is_empty() {
                    writeln!(out, "No models registered.")?;
                    writeln!(out, "Configure models under [[models]] and run `models sync`")?;
                } else {
                    for m in &models {
                        writeln!(out, "  {} ({} dims, {:?})", m.name, m.dims, m.modality)?;
                    }
                    writeln!(out, "\nTotal: {} model(s)", models.len())?;
                }
            }
        },
        Commands::DeadLetters { limit } => {
            let letters = store.list_dead_letters(limit).await?;
            if letters.is_empty() {
                writeln!(out, "No dead letters.")?;
            }
            for letter in &letters {
                writeln!(
                    out,
                    "{}  attempts={}  failed_at={}  reason={}\n    {}",
                    letter.key,
                    letter.attempts,
                    letter.failed_at.to_rfc3339(),
                    letter.reason,
                    letter.error
                )?;
            }
        }
        Commands::Requeue {
            entity_type,
            entity_id,
            model,
            language,
        } => {
            let key = TaskKey::new(entity_type, entity_id, model, language);
            if store.requeue_dead_letter(&key).await? {
                writeln!(out, "Requeued {key}")?;
            } else {
                anyhow::bail!("No dead letter for {key}");
            }
        }
        Commands::Stats => {
            let stats = store.stats()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        }
        Commands::Search {
            query,
            language,
            model,
            limit,
        } => {
            let mut searcher = HybridSearcher::new(store, config.search.clone());
            let mut default_model = None;
            if let Some(embedder) = &config.embedder {
                default_model = Some(embedder.model.clone());
                let embedder = OpenAiCompatibleEmbedder::new(embedder.clone())?;
                searcher = searcher.with_text_embedder(Arc::new(embedder));
            }
            let mut request = SearchRequest::new(query, language, limit);
            if let Some(model) = model.or(default_model) {
                request = request.with_model(model);
            }
            for hit in searcher.search(&request).await? {
                let e = &hit.entity;
                let (score, et, id, lang) = (hit.score, &e.entity_type, &e.entity_id, &e.language);
                writeln!(out, "{score:.6}  {et}/{id}/{lang}")?;
            }
        }
        Commands::Typeahead {
            query,
            language,
            limit,
        } => {
            let searcher = HybridSearcher::new(store, config.search.clone());
            let request = TypeaheadRequest::new(query, language, limit);
            for hit in searcher.typeahead(&request).await? {
                let e = &hit.entity;
                let (score, et, id, lang) = (hit.score, &e.entity_type, &e.entity_id, &e.language);
                writeln!(out, "{score:.4}  {et}/{id}/{lang}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use searchkit_core::{Modality, ModelSpec};
    use searchkit_store::DocumentStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> SearchkitConfig {
        let mut config = SearchkitConfig::default();
        config.store.path = tmp.path().join("cli.db");
        config.models = vec![ModelSpec::new("text-small", 8, Modality::Text)];
        config
    }

    async fn exec(args: &[&str], config: &SearchkitConfig) -> anyhow::Result<String> {
        let mut argv = vec!["searchkit"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        run(cli.command, config, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["searchkit", "dead-letters", "--limit", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::DeadLetters { limit: 5 }));
        assert_eq!(cli.config, PathBuf::from("searchkit.toml"));

        let cli =
            Cli::try_parse_from(["searchkit", "-c", "x.toml", "search", "red car", "-l", "en"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Search { limit: 10, .. }));

        assert!(Cli::try_parse_from(["searchkit", "search", "red"]).is_err());
        assert!(Cli::try_parse_from(["searchkit", "requeue", "a", "b"]).is_err());
    }

    #[tokio::test]
    async fn test_models_sync_then_list() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let out = exec(&["models", "sync"], &config).await.unwrap();
        assert!(out.starts_with("Synced 1 model(s)"));
        let out = exec(&["models", "list"], &config).await.unwrap();
        assert!(out.contains("text-small (8 dims"));
        let out = exec(&["stats"], &config).await.unwrap();
        assert!(out.contains("\"models\": 1"));
    }

    #[tokio::test]
    async fn test_requeue_without_dead_letter_fails() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let out = exec(&["dead-letters"], &config).await.unwrap();
        assert!(out.contains("No dead letters."));
        let err = exec(&["requeue", "gallery", "1", "text-small", "en"], &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No dead letter"));
    }

    #[tokio::test]
    async fn test_search_and_typeahead_without_embedder() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        {
            let store = SqliteStore::open(&config.store).unwrap();
            let docs: BTreeMap<String, String> =
                [("1".to_string(), "harbour sunset".to_string())].into_iter().collect();
            store.upsert_documents("gallery", "en", &docs).await.unwrap();
        }
        let out = exec(&["search", "harbour", "--language", "en"], &config)
            .await
            .unwrap();
        assert!(out.contains("gallery/1/en"));
        let out = exec(&["typeahead", "harbo", "-l", "en"], &config).await.unwrap();
        assert!(out.contains("gallery/1/en"));
    }
}
