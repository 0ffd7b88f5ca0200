//! Serve and inspect development guidelines from the command line.
//!
//! Custom guidance reads the API key from the `OPENROUTER_KEY` environment
//! variable; every other command works without it.
//!
//! # Examples
//!
//! ```sh
//! # Fetch a document (cache first, raw file fallback)
//! guidepost get rules
//!
//! # Ask for guidance tailored to a query
//! guidepost guidance --query "How should I structure error handling?" \
//!   --context "Rust CLI with async I/O"
//!
//! # Rebuild the compressed cache and inspect it
//! guidepost build-cache
//! guidepost cache-info
//!
//! # Usage summary for the last week, then the full analysis reports
//! guidepost summary --days 7
//! guidepost analyze
//! guidepost report
//!
//! # Rate a response
//! guidepost rate get_coding_rules 5 --comment "exactly what I needed"
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use guidepost::analytics;
use guidepost::config::Config;
use guidepost::docs::DocName;
use guidepost::server::GuidelinesServer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Serve and inspect development guidelines.
#[derive(Parser)]
#[command(name = "guidepost")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "guidepost.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one document: rules, skills, or steering
    Get {
        /// Document to fetch
        name: DocName,
    },
    /// Generate guidance tailored to a query
    Guidance {
        /// The question or task description
        #[arg(long)]
        query: String,
        /// Additional situational context
        #[arg(long)]
        context: Option<String>,
    },
    /// Rebuild the compressed document cache
    BuildCache,
    /// Show cache availability, formats, and sizes
    CacheInfo,
    /// Aggregate recent usage from the ledger
    Summary {
        /// Window in days
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Record a rating for a tool response
    Rate {
        /// Tool the rating applies to
        tool: String,
        /// Rating from 1 to 5
        rating: i32,
        /// Free-form comment
        #[arg(long)]
        comment: Option<String>,
        /// Whether the response was helpful
        #[arg(long)]
        helpful: Option<bool>,
    },
    /// Analyze collected feedback into a report
    Analyze,
    /// Generate the document token usage report
    Report,
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Get { name } => {
            let mut server = GuidelinesServer::new(config)?;
            let tool = match name {
                DocName::Rules => "get_coding_rules",
                DocName::Skills => "get_development_skills",
                DocName::Steering => "get_steering_instructions",
            };
            let response = server.handle(tool, &serde_json::json!({})).await;
            if !response.success {
                return Err(response.text);
            }
            println!("{}", response.text);
        }

        Command::Guidance { query, context } => {
            let mut server = GuidelinesServer::new(config)?.with_guidance_from_env()?;
            let mut arguments = serde_json::json!({"query": query});
            if let Some(context) = context {
                arguments["context"] = serde_json::Value::String(context);
            }
            let response = server.handle("get_custom_guidance", &arguments).await;
            if !response.success {
                return Err(response.text);
            }
            println!("{}", response.text);
        }

        Command::BuildCache => {
            let mut server = GuidelinesServer::new(config)?;
            let manifest = server.build_cache()?;
            println!("Built cache v{} at {}", manifest.version, manifest.build_time);
            for (format, size) in &manifest.sizes {
                println!("  {format}: {size} bytes");
            }
        }

        Command::CacheInfo => {
            let mut server = GuidelinesServer::new(config)?;
            let info = server.cache_info();
            let json = serde_json::to_string_pretty(&info)
                .map_err(|e| format!("failed to render cache info: {e}"))?;
            println!("{json}");
        }

        Command::Summary { days } => {
            let server = GuidelinesServer::new(config)?;
            let summary = server.usage_summary(days)?;
            let json = serde_json::to_string_pretty(&summary)
                .map_err(|e| format!("failed to render summary: {e}"))?;
            println!("{json}");
        }

        Command::Rate {
            tool,
            rating,
            comment,
            helpful,
        } => {
            let server = GuidelinesServer::new(config)?;
            server.rate(&tool, rating, comment, helpful)?;
            println!("Recorded rating {rating} for {tool}");
        }

        Command::Analyze => {
            let (analysis, path) = analytics::analyze_feedback(
                &config.storage.feedback_dir,
                &config.storage.analytics_dir,
            )?;
            match analysis {
                Some(analysis) => {
                    println!(
                        "Analyzed {} calls across {} tools",
                        analysis.total_calls,
                        analysis.tool_usage.len()
                    );
                }
                None => println!("No feedback data collected yet"),
            }
            println!("Report written to {}", path.display());
        }

        Command::Report => {
            // Token reports are always computed from the raw files on disk,
            // never from the cache.
            let mut store = guidepost::docs::DocumentStore::new();
            let docs = store.load_all(&config)?;
            let (report, path) = analytics::token_report(
                &docs,
                &config.server.version,
                &config.storage.reports_dir,
            )?;
            println!(
                "Total estimated tokens: {}",
                report.summary.total_estimated_tokens
            );
            for (name, doc) in &report.documents {
                println!("  {name}: {} tokens, {} lines", doc.estimated_tokens, doc.lines);
                for suggestion in &doc.optimization_suggestions {
                    println!("    - {suggestion}");
                }
            }
            println!("Report written to {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guidepost=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
