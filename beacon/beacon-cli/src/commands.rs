//! CLI command implementations.

use crate::corpus::Corpus;
use crate::output::{self, ellipsize, format_millis, OutputFormat, TableBuilder};
use anyhow::{bail, Context, Result};
use beacon_core::{
    DiscoveryRequest, DiscoveryResult, GraphStore, HashingEmbedder, Relation, RelationshipType,
    TraversalOptions,
};
use beacon_discovery::{DictionaryExpander, DiscoveryConfig, DiscoveryEngine, ExpansionDictionary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Request overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub broad_k: Option<usize>,
    pub focus_k: Option<usize>,
    pub max_bullets: Option<usize>,
    pub max_hops: Option<usize>,
    pub no_graph: bool,
    /// Print only the assembled prompt.
    pub prompt_only: bool,
}

impl DiscoverOptions {
    /// Build a request from the configured defaults plus these overrides.
    pub fn request(&self, query: &str, config: &DiscoveryConfig) -> DiscoveryRequest {
        let mut request = config.defaults.request(query);
        if !self.include.is_empty() {
            request = request.include(self.include.iter().cloned());
        }
        if !self.exclude.is_empty() {
            request = request.exclude(self.exclude.iter().cloned());
        }
        if let Some(broad_k) = self.broad_k {
            request = request.broad_k(broad_k);
        }
        if let Some(focus_k) = self.focus_k {
            request = request.focus_k(focus_k);
        }
        if let Some(max_bullets) = self.max_bullets {
            request = request.max_bullets(max_bullets);
        }
        if let Some(max_hops) = self.max_hops {
            request = request.max_hops(max_hops);
        }
        request
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Load configuration from `path`, or defaults plus environment overrides.
pub async fn load_config(path: Option<&Path>) -> Result<DiscoveryConfig> {
    match path {
        Some(path) => DiscoveryConfig::load_from_path(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = DiscoveryConfig::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }
}

/// Write a default configuration file
pub async fn config_init(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration file {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    DiscoveryConfig::default()
        .save_to_path(&path)
        .await
        .context("Failed to write configuration")?;

    output::success(format!("Wrote default configuration to {}", path.display()));
    Ok(())
}

/// Print the effective configuration
pub async fn config_show(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path).await?;
    match format {
        OutputFormat::Json => output::output(&config)?,
        OutputFormat::Human | OutputFormat::Plain => {
            println!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}

// ============================================================================
// Discovery
// ============================================================================

/// Assemble an engine over a loaded corpus.
pub async fn build_engine(corpus: &Corpus, config: DiscoveryConfig, use_graph: bool) -> Result<DiscoveryEngine> {
    let embedder = HashingEmbedder::default();
    let store = corpus.to_store(&embedder)?;

    let mut builder = DiscoveryEngine::builder(Arc::new(store), Arc::new(embedder));

    if let Some(path) = &config.expansion.dictionary_path {
        let dictionary = ExpansionDictionary::load(path)
            .await
            .with_context(|| format!("Failed to load expansion dictionary {}", path.display()))?;
        info!("Using expansion dictionary version {}", dictionary.version);
        builder = builder.with_expander(Arc::new(
            DictionaryExpander::new(dictionary)
                .with_bounds(config.expansion.min_queries, config.expansion.max_queries),
        ));
    }

    if use_graph {
        if let Some(graph) = corpus.to_graph()? {
            builder = builder.with_graph(Arc::new(graph));
        }
    }

    Ok(builder.with_config(config).build()?)
}

/// Run discovery and return the raw result.
pub async fn run_discovery(
    corpus_path: &Path,
    query: &str,
    options: &DiscoverOptions,
    config_path: Option<&Path>,
) -> Result<DiscoveryResult> {
    let config = load_config(config_path).await?;
    let corpus = Corpus::load(corpus_path).await?;
    let request = options.request(query, &config);
    debug!(?request, "Discovery request");

    let engine = build_engine(&corpus, config, !options.no_graph).await?;
    Ok(engine.discover(request).await?)
}

/// Run discovery and print the evidence
pub async fn discover(
    corpus_path: PathBuf,
    query: String,
    options: DiscoverOptions,
    config_path: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let spinner = format.is_human().then(|| output::spinner("Discovering evidence..."));
    let result = run_discovery(&corpus_path, &query, &options, config_path.as_deref()).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let result = result?;

    if options.prompt_only {
        println!("{}", result.prompt);
        return Ok(());
    }

    match format {
        OutputFormat::Json => output::output(&result)?,
        OutputFormat::Plain => print_plain(&result),
        OutputFormat::Human => print_human(&result),
    }
    Ok(())
}

fn print_human(result: &DiscoveryResult) {
    output::header(format!("Evidence for \"{}\"", result.query));

    let mut table = TableBuilder::new().header(vec!["#", "Score", "Relation", "Source", "Snippet"]);
    for (i, evidence) in result.evidence.iter().enumerate() {
        let relation = match (&evidence.relation, &evidence.via) {
            (Relation::Related, Some(via)) => format!("related via {}", via),
            (relation, _) => relation.to_string(),
        };
        table = table.row(vec![
            (i + 1).to_string(),
            format!("{:.3}", evidence.score),
            relation,
            format!("{}/{}", evidence.collection, evidence.item_id),
            ellipsize(&evidence.snippet, 80),
        ]);
    }
    table.print();

    for warning in &result.warnings {
        output::warning(format!("[{}] {}", warning.kind, warning.message));
    }

    let metrics = &result.metrics;
    output::header("Metrics");
    output::kv("Collections searched", metrics.collections_searched);
    output::kv("Queries generated", metrics.queries_generated);
    output::kv(
        "Search calls",
        format!("{} ({} failed)", metrics.search_calls, metrics.failed_calls),
    );
    output::kv(
        "Candidates",
        format!(
            "{} found, {} after dedup, {} selected",
            metrics.candidates_found, metrics.candidates_after_dedup, metrics.selected
        ),
    );
    output::kv("Related added", metrics.related_added);
    output::kv("Prompt tokens (est.)", metrics.prompt_tokens_estimate);
    output::kv("Time", format_millis(metrics.total_time_ms));
}

fn print_plain(result: &DiscoveryResult) {
    for evidence in &result.evidence {
        println!(
            "{:.3}\t{}\t{}/{}\t{}",
            evidence.score,
            evidence.relation,
            evidence.collection,
            evidence.item_id,
            ellipsize(&evidence.snippet, 120)
        );
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning.message);
    }
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub items: usize,
}

pub fn summarize_collections(corpus: &Corpus) -> Vec<CollectionSummary> {
    corpus
        .collections
        .iter()
        .map(|(name, items)| CollectionSummary {
            name: name.clone(),
            items: items.len(),
        })
        .collect()
}

/// List the collections of a corpus
pub async fn list_collections(corpus_path: PathBuf, format: OutputFormat) -> Result<()> {
    let corpus = Corpus::load(&corpus_path).await?;
    let summaries = summarize_collections(&corpus);

    match format {
        OutputFormat::Json => output::output(&summaries)?,
        OutputFormat::Plain => {
            for summary in &summaries {
                println!("{}\t{}", summary.name, summary.items);
            }
        }
        OutputFormat::Human => {
            if summaries.is_empty() {
                output::info("Corpus has no collections");
                return Ok(());
            }
            let mut table = TableBuilder::new().header(vec!["Collection", "Items"]);
            for summary in &summaries {
                table = table.row(vec![summary.name.clone(), summary.items.to_string()]);
            }
            table.print();
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RelatedSummary {
    pub id: String,
    pub collection: String,
    pub weight: f32,
    pub hops: usize,
}

/// Walk the corpus graph from one node.
pub async fn find_related(
    corpus: &Corpus,
    node_id: &str,
    max_hops: usize,
    min_weight: f32,
    relationships: &[String],
) -> Result<Vec<RelatedSummary>> {
    let Some(graph) = corpus.to_graph()? else {
        bail!("Corpus has no graph section");
    };

    let mut options = TraversalOptions::new(max_hops).with_min_weight(min_weight);
    if !relationships.is_empty() {
        let parsed = relationships
            .iter()
            .map(|r| r.parse::<RelationshipType>())
            .collect::<beacon_core::Result<Vec<_>>>()?;
        options = options.with_relationships(parsed);
    }

    let related = graph
        .related(node_id, &options)
        .await
        .with_context(|| format!("Failed to traverse from node {}", node_id))?;

    Ok(related
        .into_iter()
        .map(|r| RelatedSummary {
            id: r.node.id,
            collection: r.node.collection,
            weight: r.cumulative_weight,
            hops: r.hop_distance,
        })
        .collect())
}

/// Print nodes related to `node_id`
pub async fn related(
    corpus_path: PathBuf,
    node_id: String,
    max_hops: usize,
    min_weight: f32,
    relationships: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let corpus = Corpus::load(&corpus_path).await?;
    let related = find_related(&corpus, &node_id, max_hops, min_weight, &relationships).await?;

    match format {
        OutputFormat::Json => output::output(&related)?,
        OutputFormat::Plain => {
            for r in &related {
                println!("{:.3}\t{}\t{}/{}", r.weight, r.hops, r.collection, r.id);
            }
        }
        OutputFormat::Human => {
            if related.is_empty() {
                output::info(format!("No nodes related to {} within {} hops", node_id, max_hops));
                return Ok(());
            }
            let mut table = TableBuilder::new().header(vec!["Node", "Collection", "Weight", "Hops"]);
            for r in &related {
                table = table.row(vec![
                    r.id.clone(),
                    r.collection.clone(),
                    format!("{:.3}", r.weight),
                    r.hops.to_string(),
                ]);
            }
            table.print();
        }
    }
    Ok(())
}
