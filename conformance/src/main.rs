use anyhow::{Context, Result};
use conformance::client::KubeObjectClient;
use conformance::config::SuiteConfig;
use conformance::manifests::DirManifestSource;
use conformance::metrics::gather_conformance_metrics;
use conformance::roundtripper::HttpRoundTripper;
use conformance::{cases, ConformanceSuite, SuiteOptions, TestRegistry, TestResultKind};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Gateway API conformance runner
///
/// Usage: gwconformance [CONFIG.toml]
/// Settings can also come from GATEWAY_CONFORMANCE_* environment variables.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("GATEWAY_CONFORMANCE_CONFIG").ok())
        .map(PathBuf::from);
    let config = SuiteConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("🦀 Gateway API conformance: GatewayClass {}", config.gateway_class_name);

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let client = Arc::new(KubeObjectClient::new(kube_client));
    let round_tripper = Arc::new(HttpRoundTripper::new(Duration::from_secs(
        config.timeouts.request_secs,
    )));
    let manifests = Arc::new(match &config.manifests_dir {
        Some(dir) => DirManifestSource::new(dir),
        None => DirManifestSource::bundled(),
    });

    let options = SuiteOptions::from_config(&config, client, round_tripper, manifests);
    let suite = ConformanceSuite::new(options)
        .await
        .context("Failed to build conformance suite")?;

    let mut registry = TestRegistry::new();
    cases::register_all(&mut registry);
    info!("   Tests registered: {}", registry.len());
    info!("   Supported features: {}", suite.supported_features().len());

    tokio::select! {
        result = suite.run_to_completion(&registry) => {
            result.context("Conformance run failed")?;
        }
        _ = signal::ctrl_c() => {
            warn!("Shutdown signal received, cleaning up");
            suite.teardown().await?;
            anyhow::bail!("Conformance run interrupted");
        }
    }

    let report = suite.report().context("Failed to compile report")?;
    for profile in &report.profiles {
        info!(profile = %profile.name, "{}", profile.summary);
    }

    if let Some(path) = &config.report_output {
        let yaml = serde_yaml::to_string(&report).context("Failed to serialize report")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("📋 Report written to {}", path.display());
    }

    match gather_conformance_metrics() {
        Ok(metrics) => debug!("Run metrics:\n{}", metrics),
        Err(e) => warn!("Failed to gather metrics: {}", e),
    }

    let failed: Vec<String> = suite
        .outcomes()
        .unwrap_or_default()
        .into_iter()
        .filter(|o| o.result == TestResultKind::Failed)
        .map(|o| o.short_name)
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} conformance tests failed: {}", failed.len(), failed.join(", "));
    }

    info!("✅ Conformance run complete");
    Ok(())
}
