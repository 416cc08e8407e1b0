//! CLI command implementations

use std::sync::Arc;

use anifold_core::source::SearchFilters;
use anifold_core::{AnifoldConfig, RequestOptions, SourceManager, SourceVerifier};
use anyhow::{Context, Result};
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Server {
        /// Host to bind to, overrides ANIFOLD_HOST
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to, overrides ANIFOLD_PORT
        #[arg(short, long)]
        port: Option<u16>,
        /// Register the built-in demo source
        #[arg(long)]
        demo: bool,
    },
    /// Probe every configured source once
    Health {
        #[arg(long)]
        demo: bool,
    },
    /// Run the four-stage verification against configured sources
    Verify {
        /// Only verify this source
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        demo: bool,
    },
    /// Search the selected source
    Search {
        query: String,
        /// Preferred source for this query
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long)]
        demo: bool,
    },
    /// List registered sources
    Sources {
        #[arg(long)]
        demo: bool,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands, config: AnifoldConfig) -> Result<()> {
    match command {
        Commands::Server { host, port, demo } => start_server(config, host, port, demo).await,
        Commands::Health { demo } => check_health(config, demo).await,
        Commands::Verify { source, demo } => verify(config, source, demo).await,
        Commands::Search {
            query,
            source,
            page,
            demo,
        } => search(config, &query, source.as_deref(), page, demo).await,
        Commands::Sources { demo } => list_sources(config, demo),
    }
}

/// Start the API server in the foreground
///
/// # Errors
/// - Source registration, bind or server failures
pub async fn start_server(
    mut config: AnifoldConfig,
    host: Option<String>,
    port: Option<u16>,
    demo: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    println!("Starting Anifold API server...");
    println!("URL: http://{}/api", config.server.bind_address());
    if demo {
        println!("Mode: Demo (built-in sample source)");
    }
    println!("{:-<50}", "");

    anifold_web::run_server(config, demo)
        .await
        .map_err(|e| anyhow::anyhow!("Server failed: {e}"))
}

/// Probe every source and print a status table
///
/// # Errors
/// - Source registration failed
pub async fn check_health(config: AnifoldConfig, demo: bool) -> Result<()> {
    let (manager, cancel) = build_manager(&config, demo)?;
    let report = manager.check_all_health_default(&cancel).await;
    cancel.cancel();

    println!("{:<20} {:<10} LATENCY", "SOURCE", "STATUS");
    for health in report {
        let latency = health
            .latency
            .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));
        println!(
            "{:<20} {:<10} {latency}",
            health.name,
            format!("{:?}", health.status).to_lowercase()
        );
    }
    Ok(())
}

/// Verify sources and print the report as JSON
///
/// # Errors
/// - Source registration failed or the named source is unknown
pub async fn verify(config: AnifoldConfig, source: Option<String>, demo: bool) -> Result<()> {
    let (manager, cancel) = build_manager(&config, demo)?;
    let verifier = SourceVerifier::new(&config.verifier);

    let report = match source {
        Some(name) => {
            let source = manager
                .get(&name)
                .with_context(|| format!("Unknown source: {name}"))?;
            verifier.verify_sources(&[source], &cancel).await
        }
        None => verifier.verify_all_sources(&manager, &cancel).await,
    };
    cancel.cancel();

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failed_sources.is_empty() {
        anyhow::bail!(
            "{} source(s) failed verification: {}",
            report.failed_sources.len(),
            report.failed_sources.join(", ")
        );
    }
    Ok(())
}

/// Search and print the matching titles
///
/// # Errors
/// - Source registration failed or the search was cancelled
pub async fn search(
    config: AnifoldConfig,
    query: &str,
    source: Option<&str>,
    page: u32,
    demo: bool,
) -> Result<()> {
    let (manager, cancel) = build_manager(&config, demo)?;
    let opts = RequestOptions::with_cancel(cancel.clone());
    let result = manager
        .search(query, page, &SearchFilters::default(), source, &opts)
        .await?;
    cancel.cancel();

    println!(
        "Results from {} (page {}):",
        result.source.as_deref().unwrap_or("unknown"),
        result.current_page
    );
    for anime in &result.results {
        println!("  {:<40} {}", anime.id, anime.title);
    }
    if result.results.is_empty() {
        println!("  No matches for \"{query}\"");
    }
    Ok(())
}

/// List the registry
///
/// # Errors
/// - Source registration failed
pub fn list_sources(config: AnifoldConfig, demo: bool) -> Result<()> {
    let (manager, cancel) = build_manager(&config, demo)?;
    cancel.cancel();

    let primary = manager.primary().name().to_string();
    for info in manager.list_sources() {
        let marker = if info.name == primary { "*" } else { " " };
        println!("{marker} {:<20} {}", info.name, info.base_url);
    }
    Ok(())
}

fn build_manager(
    config: &AnifoldConfig,
    demo: bool,
) -> Result<(Arc<SourceManager>, CancellationToken)> {
    let cancel = CancellationToken::new();
    let manager = SourceManager::from_config(config, demo, &cancel)
        .context("Failed to build source registry")?;
    Ok((Arc::new(manager), cancel))
}
