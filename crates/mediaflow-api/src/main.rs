use mediaflow_core::Config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let app = mediaflow_api::setup::initialize_app(&config).await?;

    mediaflow_api::setup::server::start_server(&config, app).await?;

    Ok(())
}
