use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, PipelineConfig};
use engine::{DefaultAnnotator, LogSink, Pipeline, ReplaySource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Config ───────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let pipeline_cfg = PipelineConfig::load(&cfg.pipeline_config_path)
        .with_context(|| format!("loading {}", cfg.pipeline_config_path))?;
    info!(
        symbol = %pipeline_cfg.pipeline.symbol,
        config = %cfg.pipeline_config_path,
        replay = %cfg.replay_path,
        "sigflow starting"
    );

    // ── Pipeline ─────────────────────────────────────────────────────────────
    let pipeline = Pipeline::build(&pipeline_cfg, Arc::new(DefaultAnnotator), Arc::new(LogSink))
        .context("building pipeline")?;

    let mut source = ReplaySource::new(&cfg.replay_path);
    if let Some(ms) = cfg.replay_pace_ms {
        source = source.with_pace(Duration::from_millis(ms));
    }
    let handle = pipeline.spawn(Box::new(source));

    // ── Shutdown ─────────────────────────────────────────────────────────────
    let control = handle.control();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping pipeline");
                control.stop();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    handle.join().await;
    info!("sigflow stopped");
    Ok(())
}
