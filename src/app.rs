use crate::{
    aria2::Aria2Client,
    boost::BoostClient,
    config::Config,
    deals::DealEngine,
    lotus::LotusClient,
    rpc::build_http_client,
    single_instance::SingleInstanceLock,
    spade::SpadeClient,
};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn run(config: Config) -> anyhow::Result<()> {
    let redacted = config.redacted();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        download_path = %config.general.download_path,
        max_active = config.general.max_spade_deals_active,
        spade = %config.spade.url,
        "starting spade client"
    );
    tracing::debug!(config = ?redacted, "effective config");
    if config.general.max_spade_deals_active == 0 {
        tracing::warn!("general.max_spade_deals_active is 0; no deals will be requested");
    }

    let download_dir = PathBuf::from(&config.general.download_path);
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("failed to create download path {}", download_dir.display()))?;
    let lock = SingleInstanceLock::acquire_in(&download_dir)?;
    tracing::debug!(lock = %lock.path().display(), "acquired instance lock");

    let http = build_http_client(config.general.insecure_skip_verify, HTTP_TIMEOUT)?;

    let aria2 = Arc::new(Aria2Client::new(http.clone(), &config.aria2, &download_dir));
    aria2.connect().await.context("connecting to aria2")?;

    let lotus = Arc::new(LotusClient::new(http.clone(), &config.lotus));
    let identity = lotus.connect().await.context("connecting to lotus")?;

    let boost = Arc::new(BoostClient::new(
        http.clone(),
        &config.boost,
        config.deals.open_deals_limit,
    ));
    boost.connect().await.context("connecting to boost")?;

    let signer = Arc::new(lotus.signer(identity));
    let spade = Arc::new(SpadeClient::new(
        http,
        &config.spade.url,
        signer,
        config.spade.ignored_pieces.iter().cloned(),
    ));
    if !config.spade.ignored_pieces.is_empty() {
        tracing::info!(count = config.spade.ignored_pieces.len(), "ignoring configured pieces");
    }

    let engine = DealEngine::new(config.engine_config(), spade, boost, aria2);
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(engine.clone().run(cancel.clone()));
    tracing::info!("spade client started; press Ctrl+C to stop");

    supervise(worker, &cancel, shutdown_signal()).await?;

    let stats = engine.stats();
    tracing::info!(
        active = stats.active,
        waiting = stats.waiting,
        imported = stats.imported,
        duplicates = stats.duplicates,
        failed_pieces = stats.failures,
        "shutting down gracefully"
    );
    drop(lock);
    Ok(())
}

/// Waits for `shutdown` or for the worker to end on its own. The worker is always cancelled and
/// joined before a shutdown error is returned.
async fn supervise(
    mut worker: JoinHandle<()>,
    cancel: &CancellationToken,
    shutdown: impl Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let signal = tokio::select! {
        res = shutdown => Some(res),
        res = &mut worker => {
            res.context("deal engine task panicked")?;
            None
        }
    };
    let Some(signal) = signal else {
        tracing::warn!("deal engine stopped on its own");
        return Ok(());
    };
    cancel.cancel();
    worker.await.context("deal engine task panicked")?;
    signal
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl+C")?;
                tracing::warn!("received Ctrl+C");
            }
            _ = term.recv() => tracing::warn!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        tracing::warn!("received Ctrl+C");
    }
    Ok(())
}
