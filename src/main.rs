use incident_pool::{
    dispatch_fire_and_forget,
    parse::parse_retry_budget_or_default,
    pipeline::{build_escalation_message, combined_error_budget_burn, fetch_runbook_step},
    resource::BufReadSource,
    read_lines, shutdown_and_await, Config, WorkerPool,
};
use std::{io::Cursor, time::Instant};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RUNBOOK: &str = "# payments-api\n  drain queue \n\nrestart pods\n";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let rt = Builder::new_multi_thread()
        .worker_threads(config.num_threads.clamp(2, 64))
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let now = Instant::now();
        let policy = config.shutdown_policy();
        let pool = WorkerPool::with_config(config);
        let cancel = CancellationToken::new();

        let retries = parse_retry_budget_or_default(std::env::var("INCIDENT_RETRY_BUDGET").ok().as_deref(), 3);
        let actions = read_lines(BufReadSource::new(Cursor::new(RUNBOOK)))?;
        info!(retries, actions = ?actions, "runbook loaded");

        let ids: Vec<String> = (0..1_000).map(|i| format!(" inc-{i} ")).collect();
        let sent = dispatch_fire_and_forget(&ids, &pool, |_id| Ok(()), &cancel).await?;
        info!(sent, "notifications dispatched");

        let step = fetch_runbook_step(" Payments-Api ", &pool)?.resolve().await?;
        let message = build_escalation_message(" inc-9001 ", &pool)?.resolve().await?;
        let burn = combined_error_budget_burn("payments-api", "identity-api", &pool)?.resolve().await?;
        info!(%step, %message, burn, "pipeline resolved");

        if !shutdown_and_await(&pool, policy, &cancel).await {
            error!("pool did not drain in time");
        }
        info!(elapsed = ?now.elapsed(), "done");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
