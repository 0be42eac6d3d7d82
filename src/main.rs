use anyhow::Context as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = spade_client::config_io::config_path();
    let mut cfg: spade_client::config::Config =
        spade_client::config_io::load_or_create_config(&path)
            .await
            .with_context(|| format!("unable to read or create {}", path.display()))?;
    cfg.apply_env_overrides()?;

    spade_client::config::init_tracing(&cfg);
    tracing::info!(config = %path.display(), "spade-client booted");

    spade_client::app::run(cfg).await?;
    Ok(())
}
