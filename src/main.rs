//! Standup Digest: binary entrypoint
//! Loads settings, wires collectors/summarizer/sinks, starts the scheduler with
//! the daily digest job, and serves the control API when `http_bind` is set.
//!
//! `--once` runs a single cycle immediately, prints the report and exits.

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use standup_digest::config::settings::DAILY_DIGEST_JOB_ID;
use standup_digest::metrics::Metrics;
use standup_digest::{build_engine, digest_job, router, AppState, DigestScheduler, Settings};

/// `RUST_LOG` wins over the configured level; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log_level);

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let engine = build_engine(&settings)?.into_shared();
    tracing::info!(
        collectors = ?engine.collector_names(),
        sinks = ?engine.sink_names(),
        timezone = %settings.timezone,
        "digest engine ready"
    );

    if once {
        let report = engine.run_digest_cycle(None).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let metrics = Metrics::init()?;
    let scheduler = DigestScheduler::from_settings(&settings)?;
    scheduler.start().await;

    let default_sinks = (!settings.digest.sinks.is_empty()).then(|| settings.digest.sinks.clone());
    scheduler
        .try_schedule(
            DAILY_DIGEST_JOB_ID,
            &settings.digest_schedule,
            digest_job(engine.clone(), default_sinks),
        )
        .context("scheduling daily digest")?;

    for (id, job) in scheduler.list_jobs() {
        tracing::info!(job_id = %id, trigger = %job.trigger, next_run = ?job.next_run_time, "job armed");
    }

    match &settings.http_bind {
        Some(addr) => {
            let state = AppState {
                scheduler: scheduler.clone(),
                engine: engine.clone(),
            };
            let app = router(state, Some(&metrics));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding control API on {addr}"))?;
            tracing::info!(%addr, "control API listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("control API server")?;
        }
        None => shutdown_signal().await,
    }

    tracing::info!("shutting down");
    scheduler.stop().await;
    Ok(())
}
