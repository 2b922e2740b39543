use clap::Parser;
use tracing_subscriber::EnvFilter;

/// inferscale — autoscaling controller core for LLM inference workloads
#[derive(Parser)]
#[command(name = "inferscale", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "inferscale.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run one refresh and exit instead of looping
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("inferscale v{}", env!("CARGO_PKG_VERSION"));

    let config = inferscale::config::ControllerConfig::from_file(&cli.config).await?;
    config.validate()?;

    if let Some(selector) = inferscale::config::node_selector_from_env() {
        tracing::info!(selector = %selector, "node selector override active");
    }

    run(config, cli.once).await
}

#[cfg(feature = "kube")]
async fn run(config: inferscale::config::ControllerConfig, once: bool) -> anyhow::Result<()> {
    use inferscale::collector::{
        registration, KubeClusterClient, MetricSource, PodScrapingSource, RefreshSpec,
        SourceRegistry,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const POD_SOURCE_NAME: &str = "pod-scraping";

    let cluster = Arc::new(
        KubeClusterClient::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to the cluster: {e}"))?,
    );

    let source = Arc::new(PodScrapingSource::new(cluster, config.scrape.clone())?);
    let sources = SourceRegistry::new();
    sources.must_register(POD_SOURCE_NAME, source.clone() as Arc<dyn MetricSource>);
    registration::register_pod_scraping_queries(POD_SOURCE_NAME, &sources);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let interval = Duration::from_secs(config.controller.refresh_interval_secs);
    tracing::info!(
        service = %config.scrape.service_name,
        namespace = %config.scrape.service_namespace,
        interval_secs = interval.as_secs(),
        "collector started"
    );

    loop {
        match source.refresh(&cancel, RefreshSpec::default()).await {
            Ok(results) => {
                for (name, result) in &results {
                    tracing::info!(
                        metric = %name,
                        pods = result.values.len(),
                        "observation refreshed"
                    );
                }
                if results.is_empty() {
                    tracing::warn!("refresh produced no observations");
                }
            }
            Err(inferscale::Error::Cancelled) => break,
            Err(e) => tracing::error!(error = %e, "refresh failed"),
        }

        if once {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("collector stopped");
    Ok(())
}

#[cfg(not(feature = "kube"))]
async fn run(_config: inferscale::config::ControllerConfig, _once: bool) -> anyhow::Result<()> {
    anyhow::bail!("built without the `kube` feature; the collector needs a cluster client")
}
