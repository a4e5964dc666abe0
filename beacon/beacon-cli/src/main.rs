//! Beacon CLI - semantic discovery over a local corpus.
//!
//! # Usage
//!
//! ```bash
//! # Discover evidence for a question
//! beacon discover corpus.json "how do I install the database" --include 'docs*'
//!
//! # Print only the LLM prompt
//! beacon discover corpus.json "vector index tuning" --prompt-only
//!
//! # Inspect the corpus
//! beacon collections corpus.json
//! beacon related corpus.json install --max-hops 2
//!
//! # Manage configuration
//! beacon config init beacon.toml
//! beacon --config beacon.toml config show
//! ```

use anyhow::Result;
use beacon_cli::{commands, output, DiscoverOptions, OutputFormat};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Beacon - semantic discovery with graph-augmented evidence", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (human, json, plain)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Discover evidence for a natural-language query
    Discover {
        /// Corpus file (JSON)
        corpus: PathBuf,

        /// Query text
        query: String,

        /// Collection patterns to include (repeatable)
        #[arg(short, long)]
        include: Vec<String>,

        /// Collection patterns to exclude (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Candidates requested per query and collection
        #[arg(long)]
        broad_k: Option<usize>,

        /// Candidates kept after diversification
        #[arg(long)]
        focus_k: Option<usize>,

        /// Maximum evidence entries
        #[arg(long)]
        max_bullets: Option<usize>,

        /// Graph traversal depth
        #[arg(long)]
        max_hops: Option<usize>,

        /// Skip graph augmentation
        #[arg(long)]
        no_graph: bool,

        /// Print only the assembled prompt
        #[arg(long)]
        prompt_only: bool,
    },

    /// List corpus collections
    Collections {
        /// Corpus file (JSON)
        corpus: PathBuf,
    },

    /// Show nodes related to a graph node
    Related {
        /// Corpus file (JSON)
        corpus: PathBuf,

        /// Node id
        node: String,

        /// Maximum hops
        #[arg(long, default_value = "2")]
        max_hops: usize,

        /// Minimum cumulative path weight
        #[arg(long, default_value = "0.2")]
        min_weight: f32,

        /// Relationship types to follow (repeatable)
        #[arg(short, long)]
        relationship: Vec<String>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Target path
        #[arg(default_value = "beacon.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format: OutputFormat = cli.format.into();

    match cli.command {
        Commands::Discover {
            corpus,
            query,
            include,
            exclude,
            broad_k,
            focus_k,
            max_bullets,
            max_hops,
            no_graph,
            prompt_only,
        } => {
            let options = DiscoverOptions {
                include,
                exclude,
                broad_k,
                focus_k,
                max_bullets,
                max_hops,
                no_graph,
                prompt_only,
            };
            commands::discover(corpus, query, options, cli.config, format).await?;
        }

        Commands::Collections { corpus } => {
            commands::list_collections(corpus, format).await?;
        }

        Commands::Related {
            corpus,
            node,
            max_hops,
            min_weight,
            relationship,
        } => {
            commands::related(corpus, node, max_hops, min_weight, relationship, format).await?;
        }

        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init { path, force } => {
                commands::config_init(path, force).await?;
            }
            ConfigCommands::Show => {
                commands::config_show(cli.config.as_deref(), format).await?;
            }
        },
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("beacon=debug,beacon_core=debug,beacon_graph=debug,beacon_discovery=debug,beacon_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
