//! # pokefetch - Command Line Entry Point
//!
//! Fetches one or more PokeAPI documents through the cached pipeline and prints
//! them as JSON on stdout. Configuration comes from the environment, optionally
//! layered over a YAML file.
//!
//! ```text
//! pokefetch pokemon/pikachu type/13
//! pokefetch -q limit=20 -q offset=40 pokemon
//! REDIS_URL=redis://localhost:6379 pokefetch --stats item/4 item/4
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use pokefetch::observability::init_logging;
use pokefetch::{FetchConfig, FetchPipeline, FetchRequest, FetchResult};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pokefetch", version, about = "Fetch PokeAPI documents through a shared cache")]
struct Cli {
    /// YAML configuration file; environment variables override its values
    #[arg(short, long, env = "POKEFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Query parameter sent with every path, as key=value (repeatable)
    #[arg(short, long = "query", value_parser = parse_query_param)]
    query: Vec<(String, String)>,

    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,

    /// Print pipeline statistics to stderr when done
    #[arg(long)]
    stats: bool,

    /// Resource paths (pokemon/25) or absolute upstream URLs
    #[arg(required = true)]
    resources: Vec<String>,
}

fn parse_query_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FetchConfig::load_from_file(path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => FetchConfig::from_env().context("invalid configuration")?,
    };

    init_logging(&config.logging);
    info!("pokefetch {}", env!("CARGO_PKG_VERSION"));

    let pipeline = FetchPipeline::new(&config).context("failed to build fetch pipeline")?;

    let fetches = cli.resources.iter().map(|resource| fetch(&pipeline, resource, &cli.query));
    let results = join_all(fetches).await;

    let mut failed = false;
    for (resource, result) in cli.resources.iter().zip(results) {
        match result {
            Ok(document) => {
                let rendered = if cli.compact {
                    serde_json::to_string(&document)?
                } else {
                    serde_json::to_string_pretty(&document)?
                };
                println!("{}", rendered);
            }
            Err(e) => {
                error!(resource = %resource, error_type = e.error_type(), "{}", e);
                failed = true;
            }
        }
    }

    if cli.stats {
        let stats = serde_json::json!({
            "pipeline": pipeline.stats(),
            "cache_backend": pipeline.cache_kind(),
            "cache": pipeline.cache_stats().await,
        });
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn fetch(pipeline: &FetchPipeline, resource: &str, query: &[(String, String)]) -> FetchResult<Value> {
    if resource.starts_with("http://") || resource.starts_with("https://") {
        return pipeline.get_url(resource).await;
    }

    let request = FetchRequest::with_query(resource, query.iter().cloned());
    pipeline.get_request(&request).await
}
