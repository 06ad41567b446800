//! # Lexmail CLI (`lexmail`)
//!
//! ## Usage
//!
//! ```bash
//! lexmail --config ./config/lexmail.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexmail init` | Create the SQLite database and run schema migrations |
//! | `lexmail import <file>` | Import emails from a JSONL file and build the graph |
//! | `lexmail search "<query>"` | Hybrid vector + graph retrieval |
//! | `lexmail browse` | Metadata-only listing, most recent first |
//! | `lexmail stats` | Node, edge and category counts |
//!
//! ## Examples
//!
//! ```bash
//! lexmail init
//! lexmail import ./data/emails.jsonl
//! lexmail search "rapport d'expertise médicale" --dossier 24/00123 --explain
//! lexmail browse --category court --from 2024-01-01
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lexmail::search::{FilterArgs, SearchOptions};
use lexmail::{config, import, migrate, search, stats};
use lexmail_core::expand::ExpansionBranches;

/// Lexmail CLI: context retrieval over a legal practice's email.
#[derive(Parser)]
#[command(
    name = "lexmail",
    about = "Lexmail — hybrid vector + graph retrieval over legal email",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lexmail.toml`. See
    /// `config/lexmail.example.toml` for every setting.
    #[arg(long, global = true, default_value = "./config/lexmail.toml")]
    config: PathBuf,

    /// Show debug logs on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it several times is safe.
    Init,

    /// Import emails from a JSONL file.
    ///
    /// One email per line. Missing embeddings are computed with the
    /// configured provider; thread, reply, people and case relations are
    /// rebuilt for the imported emails.
    Import {
        /// Path to the `.jsonl` file.
        file: PathBuf,
    },

    /// Hybrid retrieval: vector search, then graph expansion and ranking.
    Search {
        /// Natural-language query.
        query: String,

        /// Number of direct matches from the vector search.
        #[arg(long)]
        top_k: Option<usize>,

        /// Maximum number of results after expansion and ranking.
        #[arg(long)]
        max_results: Option<usize>,

        /// Direct matches only: skip graph expansion.
        #[arg(long)]
        no_expand: bool,

        /// Skip the thread branch of the expansion.
        #[arg(long)]
        no_threads: bool,

        /// Skip the same-case branch of the expansion.
        #[arg(long)]
        no_cases: bool,

        /// Skip the shared-participant branch of the expansion.
        #[arg(long)]
        no_people: bool,

        #[command(flatten)]
        filters: FilterArgs,

        /// Show the score breakdown of each result.
        #[arg(long)]
        explain: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List emails matching metadata filters, most recent first.
    Browse {
        #[command(flatten)]
        filters: FilterArgs,

        /// Maximum number of emails.
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warnings only, debug with --verbose.
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lexmail={0},lexmail_core={0}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Search {
            query,
            top_k,
            max_results,
            no_expand,
            no_threads,
            no_cases,
            no_people,
            filters,
            explain,
            json,
        } => {
            let options = SearchOptions {
                top_k,
                max_results,
                expand_graph: !no_expand,
                branches: ExpansionBranches {
                    threads: !no_threads,
                    cases: !no_cases,
                    people: !no_people,
                },
                filters: filters.to_filter_request()?,
                explain,
            };
            search::run_search(&cfg, &query, &options, json).await?;
        }
        Commands::Browse {
            filters,
            limit,
            json,
        } => {
            search::run_browse(&cfg, &filters.to_filter_request()?, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
