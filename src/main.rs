use std::sync::Arc;

use anyhow::Context;

use estimate_assist::artifacts::ArtifactStore;
use estimate_assist::config::AppConfig;
use estimate_assist::estimation::generator::EstimateGenerator;
use estimate_assist::estimation::orchestrator::Orchestrator;
use estimate_assist::estimation::runner::JobDeps;
use estimate_assist::estimation::session::{self, SessionStore};
use estimate_assist::estimation::ws::estimate_routes;
use estimate_assist::export::{ConfluenceExporter, ExportSink};
use estimate_assist::fetch::{ConfluenceFetcher, ContentFetcher};
use estimate_assist::llm::create_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let Some(atlassian) = config.atlassian.clone() else {
        eprintln!("Error: Atlassian site not configured");
        eprintln!("  export ATLASSIAN_URL=https://your-site.atlassian.net");
        eprintln!("  export ATLASSIAN_USER_EMAIL=you@example.com");
        eprintln!("  export ATLASSIAN_API_TOKEN=...");
        std::process::exit(1);
    };

    eprintln!("📐 Estimate Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Atlassian: {}", atlassian.base_url);
    eprintln!("   Submit:   POST http://0.0.0.0:{}/api/estimates", config.port);
    eprintln!("   Progress: ws://0.0.0.0:{}/ws/{{session_id}}", config.port);
    eprintln!("   Artifacts: {}\n", config.artifact_root.display());

    // ── Collaborators ───────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(ConfluenceFetcher::new(&atlassian)?);
    let export: Arc<dyn ExportSink> = Arc::new(ConfluenceExporter::new(&atlassian)?);
    let artifacts = Arc::new(ArtifactStore::new(config.artifact_root.clone()));

    // ── Orchestrator ────────────────────────────────────────────────────
    let deps = Arc::new(JobDeps {
        fetcher,
        generator: EstimateGenerator::new(llm, config.temperature),
        artifacts: Arc::clone(&artifacts),
        size_bands: config.size_bands.clone(),
        fetch_timeout: config.fetch_timeout,
        llm_timeout: config.llm_timeout,
    });
    let sessions = SessionStore::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&sessions),
        deps,
        config.max_parallel_jobs,
    );

    // Sweep finished, unobserved sessions (and their artifacts) in the
    // background.
    let _eviction_handle = session::spawn_eviction_task(
        sessions,
        Arc::clone(&artifacts),
        config.session_idle_timeout,
    );

    // ── Server ──────────────────────────────────────────────────────────
    let app = estimate_routes(orchestrator, artifacts, Some(export));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Estimation server started");
    axum::serve(listener, app).await?;

    Ok(())
}
