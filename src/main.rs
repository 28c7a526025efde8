//! # Repo Atlas CLI (`atlas`)
//!
//! The `atlas` binary analyzes hosted repositories and queries the stored
//! results.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and run schema migrations |
//! | `atlas analyze <repo>` | Analyze a repository unless the stored analysis is fresh |
//! | `atlas status <repo>` | Show the repository record and analysis status |
//! | `atlas subsystems <repo>` | List subsystems with file counts |
//! | `atlas describe <repo> <subsystem>` | Describe one subsystem |
//! | `atlas describe-all <repo>` | Describe every undescribed subsystem |
//! | `atlas explain <repo> <path>` | Explain one file |
//! | `atlas related <repo> <subsystem>` | Related subsystems |
//! | `atlas graph <repo>` | Architecture graph as JSON |
//! | `atlas chat <repo> "<question>"` | Ask about a repository |
//! | `atlas history <repo>` | Recent chat messages |
//! | `atlas serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_atlas::app::App;
use repo_atlas::chat::DEFAULT_CLIENT;
use repo_atlas::config::{self, Config};
use repo_atlas::describe::Enrichment;
use repo_atlas::migrate;
use repo_atlas::models::SubsystemDescription;
use repo_atlas::pipeline::AnalysisOutcome;
use repo_atlas::server;

/// Repo Atlas: structured documentation for hosted source repositories.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Repo Atlas: analyze a repository into subsystems, descriptions and an architecture graph",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Analyze a repository (`owner/name` or a GitHub URL).
    ///
    /// Skips the run when the stored analysis is at least as new as the
    /// upstream repository, unless `--force` is given.
    Analyze {
        repo: String,
        /// Re-analyze even if the stored analysis is fresh.
        #[arg(long)]
        force: bool,
    },

    /// Show the stored repository record.
    Status { repo: String },

    /// List the subsystems of the completed analysis.
    Subsystems { repo: String },

    /// Describe one subsystem, generating the description if needed.
    Describe {
        repo: String,
        subsystem: String,
        /// Regenerate even if a cached description exists.
        #[arg(long)]
        refresh: bool,
    },

    /// Describe every subsystem that has no description yet.
    DescribeAll { repo: String },

    /// Explain one file of the analysis.
    Explain {
        repo: String,
        path: String,
        #[arg(long)]
        refresh: bool,
    },

    /// List subsystems related to one subsystem.
    Related {
        repo: String,
        subsystem: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the architecture graph as JSON.
    Graph {
        repo: String,
        /// Include `related` edges.
        #[arg(long)]
        related: bool,
    },

    /// Ask a question about a repository.
    Chat {
        repo: String,
        message: String,
        /// Client context; each client has its own session.
        #[arg(long, default_value = DEFAULT_CLIENT)]
        client: String,
    },

    /// Show recent messages of the current chat session.
    History {
        repo: String,
        #[arg(long, default_value = DEFAULT_CLIENT)]
        client: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::init_database(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let app = App::from_config(&cfg).await?;
    let result = run(&app, &cfg, cli.command).await;
    app.shutdown().await;
    result
}

async fn run(app: &App, cfg: &Config, command: Commands) -> anyhow::Result<()> {
    let pipeline = &app.pipeline;

    match command {
        Commands::Init => unreachable!("handled before the app is built"),
        Commands::Analyze { repo, force } => {
            let outcome = pipeline.analyze(&repo, force).await?;
            let record = outcome.repository();
            match &outcome {
                AnalysisOutcome::Fresh(_) => println!("{} is up to date.", record.full_name),
                AnalysisOutcome::Completed(_) => println!("{} analyzed.", record.full_name),
                AnalysisOutcome::InProgress(_) => {
                    println!("{} is already being analyzed; try again shortly.", record.full_name)
                }
            }
            if !matches!(outcome, AnalysisOutcome::InProgress(_)) {
                let (_, analysis) = pipeline.analysis(&repo).await?;
                println!(
                    "Framework: {}  Files: {}  Subsystems: {}",
                    analysis.framework.display_name(),
                    analysis.file_tree.len(),
                    analysis.subsystems.len()
                );
            }
        }
        Commands::Status { repo } => {
            let record = pipeline
                .repository(&repo)
                .await?
                .with_context(|| format!("{} has never been analyzed", repo))?;
            println!("{}", record.full_name);
            println!("  url:       {}", record.url);
            println!("  status:    {}", record.analysis_status);
            println!("  stars:     {}  forks: {}", record.stars, record.forks);
            if let Some(lang) = &record.primary_language {
                println!("  language:  {}", lang);
            }
            if let Some(at) = record.last_analyzed {
                println!("  analyzed:  {}", at.to_rfc3339());
            }
            if let Some(at) = record.upstream_pushed_at {
                println!("  pushed:    {}", at.to_rfc3339());
            }
            if let Some(err) = &record.last_error {
                println!("  error:     {}", err);
            }
        }
        Commands::Subsystems { repo } => {
            let (_, analysis) = pipeline.analysis(&repo).await?;
            for subsystem in &analysis.subsystems {
                let marker = if analysis.description_for(&subsystem.name).is_some() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<20} {:>5} files  {}",
                    marker,
                    subsystem.name,
                    subsystem.files.len(),
                    subsystem.description
                );
            }
        }
        Commands::Describe {
            repo,
            subsystem,
            refresh,
        } => {
            let described = pipeline.describe(&repo, &subsystem, refresh).await?;
            print_description(&described);
        }
        Commands::DescribeAll { repo } => {
            let described = pipeline.describe_all(&repo).await?;
            if described.is_empty() {
                println!("Every subsystem already has a description.");
            }
            for (name, enrichment) in described {
                println!("{:<20} {:?}", name, enrichment.origin);
            }
        }
        Commands::Explain {
            repo,
            path,
            refresh,
        } => {
            let explained = pipeline.explain(&repo, &path, refresh).await?;
            println!("{}", explained.value.explanation);
        }
        Commands::Related {
            repo,
            subsystem,
            limit,
        } => {
            let related = pipeline.related(&repo, &subsystem, limit).await?;
            if related.is_empty() {
                println!("No related subsystems.");
            }
            for name in related {
                println!("{}", name);
            }
        }
        Commands::Graph { repo, related } => {
            let graph = pipeline.graph(&repo, related).await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Commands::Chat {
            repo,
            message,
            client,
        } => {
            let reply = pipeline.chat(&repo, &client, &message).await?;
            println!("{}", reply.answer.content);
        }
        Commands::History { repo, client } => {
            let (session, messages) = pipeline.history(&repo, &client).await?;
            println!("Session {} ({} messages shown)", session.id, messages.len());
            for message in messages {
                println!("[{}] {}: {}", message.timestamp.to_rfc3339(), message.role.as_str(), message.content);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg.server.bind, pipeline.clone()).await?;
        }
    }

    Ok(())
}

fn print_description(described: &Enrichment<SubsystemDescription>) {
    let d = &described.value;
    println!("{} ({:?})", d.name, described.origin);
    println!("{}", d.purpose);
    let lists = [
        ("Entry points", &d.entry_points),
        ("Key files", &d.key_files),
        ("Dependencies", &d.dependencies),
        ("Technologies", &d.technologies),
    ];
    for (title, items) in lists {
        if !items.is_empty() {
            println!("{}: {}", title, items.join(", "));
        }
    }
}
