use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dragnet_common::{Config, SourceType};
use dragnet_engine::adapters::government::GovernmentAdapter;
use dragnet_engine::adapters::paper::PaperAdapter;
use dragnet_engine::adapters::web::{EngineConfig, HumanPacing, WebSearchAdapter};
use dragnet_engine::adapters::SourceAdapter;
use dragnet_engine::external::{InMemoryRepository, InMemoryStore, NoopExpander, TracingSink};
use dragnet_engine::job::JobTracker;
use dragnet_engine::scheduler::{SchedulerDeps, TaskScheduler};
use dragnet_engine::{DedupIndex, RateLimiter, RetryPolicy};

/// Run one keyword-collection job across the configured sources and report
/// the result.
#[derive(Parser)]
#[command(name = "dragnet", version)]
struct Cli {
    /// Keywords to collect for
    #[arg(required = true)]
    keywords: Vec<String>,

    /// Source types to fan out across: web, paper, gov
    #[arg(long, short, value_delimiter = ',', default_value = "web")]
    sources: Vec<String>,

    /// Search engine URL template with a {query} placeholder. Repeatable;
    /// required when the web source is requested.
    #[arg(long = "engine")]
    engines: Vec<String>,

    /// Academic-paper index base URL
    #[arg(long, default_value = "https://api.crossref.org")]
    paper_api: String,

    /// Government document portal base URL
    #[arg(long, default_value = "")]
    government_api: String,

    /// Job owner recorded on the snapshot
    #[arg(long, default_value = "cli")]
    owner: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dragnet=info".parse()?))
        .init();

    let cli = Cli::parse();

    info!("Dragnet starting...");
    let config = Config::from_env();
    config.log_redacted();

    let source_types = parse_sources(&cli.sources)?;
    let adapters = build_adapters(&cli, &config, &source_types)?;

    let store = Arc::new(InMemoryStore::new());
    let tracker = Arc::new(JobTracker::new(
        Arc::new(TracingSink),
        config.failure_tolerance,
    ));
    let deps = SchedulerDeps::builder()
        .tracker(tracker.clone())
        .limiter(Arc::new(RateLimiter::from_config(&config)))
        .retry(RetryPolicy::from_config(&config))
        .dedup(Arc::new(DedupIndex::new()))
        .store(store.clone() as Arc<dyn dragnet_engine::ArtifactStore>)
        .repo(Arc::new(InMemoryRepository::new()))
        .adapters(adapters.clone())
        .build();
    let mut scheduler = TaskScheduler::new(&config, deps);

    let (job_id, items) = tracker
        .create_job(
            &cli.owner,
            cli.keywords.clone(),
            source_types,
            &adapters,
            &NoopExpander,
        )
        .await;
    info!(job_id = %job_id, items = items.len(), "Job created");

    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker
        .snapshot(job_id)
        .context("job snapshot missing after run")?;
    info!(
        job_id = %snapshot.id,
        status = %snapshot.status,
        completed = snapshot.completed_items,
        failed = snapshot.failed_items,
        artifacts = store.artifact_count(),
        "Run complete"
    );

    println!("\n=== Job {} ===", snapshot.id);
    println!("Status: {}  |  Progress: {}%", snapshot.status, snapshot.progress);
    println!(
        "Items: {} completed, {} failed of {}",
        snapshot.completed_items, snapshot.failed_items, snapshot.total_items
    );
    println!("Distinct artifacts stored: {}", store.artifact_count());
    if !snapshot.error_summary.is_empty() {
        println!("Failure kinds: {}", snapshot.error_summary.join(", "));
    }

    Ok(())
}

fn parse_sources(sources: &[String]) -> Result<Vec<SourceType>> {
    let mut parsed = Vec::new();
    for s in sources {
        let source = SourceType::from_str_loose(s)
            .with_context(|| format!("unknown source type '{s}' (expected web, paper, or gov)"))?;
        if !parsed.contains(&source) {
            parsed.push(source);
        }
    }
    Ok(parsed)
}

fn build_adapters(
    cli: &Cli,
    config: &Config,
    source_types: &[SourceType],
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if source_types.contains(&SourceType::WebSearch) {
        if cli.engines.is_empty() {
            bail!("the web source requires at least one --engine URL template");
        }
        for template in &cli.engines {
            let parsed = url::Url::parse(template)
                .with_context(|| format!("invalid engine URL '{template}'"))?;
            let host = parsed
                .host_str()
                .with_context(|| format!("engine URL '{template}' has no host"))?
                .to_string();
            let engine = EngineConfig {
                name: host.clone(),
                host,
                search_url: template.clone(),
            };
            info!(engine = engine.name.as_str(), "Registered search engine");
            adapters.push(Arc::new(WebSearchAdapter::new(
                engine,
                Box::new(HumanPacing::from_config(config)),
            )));
        }
    }

    if source_types.contains(&SourceType::Paper) {
        adapters.push(Arc::new(PaperAdapter::new(
            &cli.paper_api,
            &config.paper_api_key,
        )));
    }

    if source_types.contains(&SourceType::Government) {
        if cli.government_api.is_empty() {
            bail!("the gov source requires --government-api");
        }
        adapters.push(Arc::new(GovernmentAdapter::new(
            &cli.government_api,
            &config.government_api_key,
        )));
    }

    Ok(adapters)
}
